use crate::env::Environment;
use anyhow::Result;
use nix::unistd::Pid;
use std::io::Write;
use std::os::fd::RawFd;

/// Conventional process exit code type used by this crate.
///
/// A value of 0 indicates success; any non-zero value indicates failure.
/// Statuses produced by the executor always lie in `0..=255`.
pub type ExitCode = i32;

/// Where one standard stream of a command comes from or goes to.
///
/// `File` and `Pipe` carry descriptors owned by the line's
/// [`DescriptorRegistry`](crate::fd_registry::DescriptorRegistry); the node
/// only borrows the number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Stream {
    /// Use whatever the shell itself has on that slot.
    #[default]
    Inherit,
    /// A file opened by a redirection.
    File(RawFd),
    /// One end of a pipe connecting two adjacent commands.
    Pipe(RawFd),
    /// `2>&1`: duplicate the (already redirected) stdout onto stderr.
    FollowStdout,
}

impl Stream {
    /// The registry descriptor behind this stream, if any.
    pub fn fd(self) -> Option<RawFd> {
        match self {
            Stream::File(fd) | Stream::Pipe(fd) => Some(fd),
            Stream::Inherit | Stream::FollowStdout => None,
        }
    }
}

/// How a freshly appended command is reached from the one before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Link {
    /// `;`, `|`, `&`: always run next.
    Unconditional,
    /// `&&`: run next only if the previous command succeeded.
    OnSuccess,
    /// `||`: run next only if the previous command failed.
    OnFailure,
}

/// One invocation unit of a command line.
#[derive(Debug, Default)]
pub struct CommandNode {
    /// Program name followed by its arguments.
    pub argv: Vec<String>,
    pub stdin: Stream,
    pub stdout: Stream,
    pub stderr: Stream,
    /// Trailing `&`: do not wait for the process.
    pub background: bool,
    /// Leading `!`: negate the exit status.
    pub invert: bool,
    /// Set by the planner when a redirection target could not be opened,
    /// otherwise filled in once the command has run.
    pub status: Option<ExitCode>,
    /// Process id of a launched external command.
    pub pid: Option<Pid>,
}

impl CommandNode {
    pub fn name(&self) -> Option<&str> {
        self.argv.first().map(String::as_str)
    }

    /// Registry descriptors assigned to this node's standard streams.
    pub fn assigned_fds(&self) -> impl Iterator<Item = RawFd> + use<> {
        [self.stdin, self.stdout, self.stderr]
            .into_iter()
            .filter_map(Stream::fd)
    }

    /// Apply the `!` modifier to a raw status.
    pub fn apply_invert(&self, status: ExitCode) -> ExitCode {
        if self.invert {
            (status == 0) as ExitCode
        } else {
            status
        }
    }

    /// True if stdout feeds the next command through a pipe.
    pub fn writes_to_pipe(&self) -> bool {
        matches!(self.stdout, Stream::Pipe(_))
    }
}

/// Successor record attached to the command node with the same index.
///
/// Links are indices into the owning line's node arrays, which never change
/// once planning is over. Every link points strictly forward.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlowNode {
    pub unconditional_next: Option<usize>,
    pub on_success_next: Option<usize>,
    pub on_failure_next: Option<usize>,
}

impl FlowNode {
    pub(crate) fn set(&mut self, link: Link, next: usize) {
        match link {
            Link::Unconditional => self.unconditional_next = Some(next),
            Link::OnSuccess => self.on_success_next = Some(next),
            Link::OnFailure => self.on_failure_next = Some(next),
        }
    }

    /// Pick the node to run after a command that finished with `status`.
    pub fn next(&self, status: ExitCode) -> Option<usize> {
        let preferred = if status == 0 {
            self.on_success_next
        } else {
            self.on_failure_next
        };
        preferred.or(self.unconditional_next)
    }
}

/// Object-safe trait for a command executed inside the shell process.
///
/// The executor has already pointed file descriptors 0, 1 and 2 at the
/// command's assigned streams; `stdout` and `stderr` write straight to those
/// descriptors.
pub trait ExecutableCommand {
    fn execute(
        self: Box<Self>,
        stdout: &mut dyn Write,
        stderr: &mut dyn Write,
        env: &mut Environment,
    ) -> Result<ExitCode>;
}

/// Factory that tries to create a command from a name and its arguments.
///
/// Returns `None` when the factory doesn't recognize the `name`.
pub trait CommandFactory {
    /// Name the factory answers to.
    fn name(&self) -> &'static str;

    fn try_create(&self, name: &str, args: &[&str]) -> Option<Box<dyn ExecutableCommand>>;
}
