use crate::command::{CommandNode, ExitCode, FlowNode, Link};
use crate::error::{ShellError, ShellResult};
use crate::fd_registry::DescriptorRegistry;
use std::os::fd::{OwnedFd, RawFd};

/// Size bounds applied while planning a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Maximum length in bytes of any intermediate form of the line.
    pub max_line: usize,
    /// Maximum number of commands in one line.
    pub max_commands: usize,
    /// Maximum number of words in one command's argument vector.
    pub max_args: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_line: 4096,
            max_commands: 32,
            max_args: 64,
        }
    }
}

impl Limits {
    /// Every command may hold stdin, stdout and stderr descriptors.
    pub fn max_descriptors(&self) -> usize {
        self.max_commands * 3 + 1
    }
}

/// One parsed input line: the execution graph plus the descriptors it owns.
///
/// `commands[i]` and `flow[i]` describe the same command. Index 0 is the
/// entry point. The arrays only grow while the planner works on the line
/// and are left untouched by the executor, apart from run-time fields
/// (`status`, `pid`) of the nodes.
#[derive(Debug)]
pub struct CommandLine {
    text: String,
    tokens: Vec<String>,
    commands: Vec<CommandNode>,
    flow: Vec<FlowNode>,
    registry: DescriptorRegistry,
    max_commands: usize,
}

impl CommandLine {
    pub fn new(limits: &Limits) -> Self {
        Self {
            text: String::new(),
            tokens: Vec::new(),
            commands: Vec::with_capacity(limits.max_commands),
            flow: Vec::with_capacity(limits.max_commands),
            registry: DescriptorRegistry::with_capacity(limits.max_descriptors()),
            max_commands: limits.max_commands,
        }
    }

    /// Append an empty command reached from the previous one through `link`
    /// and return its index.
    pub fn push_command(&mut self, link: Link) -> ShellResult<usize> {
        if self.commands.len() >= self.max_commands {
            return Err(ShellError::TooManyCommands(self.max_commands));
        }
        let index = self.commands.len();
        if let Some(previous) = self.flow.last_mut() {
            previous.set(link, index);
        }
        self.commands.push(CommandNode::default());
        self.flow.push(FlowNode::default());
        Ok(index)
    }

    /// Hand `fd` over to the line's registry.
    pub fn register_fd(&mut self, fd: OwnedFd) -> ShellResult<RawFd> {
        self.registry.add(fd)
    }

    /// Close the descriptors assigned to command `index`.
    pub fn release_command_fds(&mut self, index: usize) {
        let fds: Vec<RawFd> = self.commands[index].assigned_fds().collect();
        for fd in fds {
            self.registry.release(fd);
        }
    }

    /// Close every descriptor the line still holds.
    pub fn close_fds(&mut self) {
        if !self.registry.is_empty() {
            log::trace!("draining {} descriptor(s)", self.registry.len());
        }
        self.registry.drain();
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn commands(&self) -> &[CommandNode] {
        &self.commands
    }

    pub fn command(&self, index: usize) -> &CommandNode {
        &self.commands[index]
    }

    pub fn command_mut(&mut self, index: usize) -> &mut CommandNode {
        &mut self.commands[index]
    }

    pub fn flow(&self, index: usize) -> &FlowNode {
        &self.flow[index]
    }

    /// The command to run after command `index` finished with `status`.
    ///
    /// A command behind a conditional link that `status` does not take is
    /// skipped, together with the rest of its pipeline, and the walk goes on
    /// from the links leaving the skipped command with the same status. In
    /// `false && a || b` this reaches `b`.
    pub fn successor(&self, mut index: usize, status: ExitCode) -> Option<usize> {
        loop {
            let flow = &self.flow[index];
            if let Some(next) = flow.next(status) {
                return Some(next);
            }
            index = if status == 0 {
                flow.on_failure_next
            } else {
                flow.on_success_next
            }?;
            while self.commands[index].writes_to_pipe() {
                index = self.flow[index].unconditional_next?;
            }
        }
    }

    pub fn registry(&self) -> &DescriptorRegistry {
        &self.registry
    }

    pub(crate) fn registry_mut(&mut self) -> &mut DescriptorRegistry {
        &mut self.registry
    }

    /// The normalized text the tokens were cut from.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    pub(crate) fn set_source(&mut self, text: String, tokens: Vec<String>) {
        self.text = text;
        self.tokens = tokens;
    }
}

impl Drop for CommandLine {
    fn drop(&mut self) {
        self.registry.drain();
    }
}
