//! Planning: turning a token stream into an execution graph.

use crate::command::{CommandNode, Link, Stream};
use crate::command_line::{CommandLine, Limits};
use crate::env::Environment;
use crate::error::{ShellError, ShellResult};
use crate::lexer;
use nix::fcntl::OFlag;
use nix::unistd::pipe2;
use std::fs::{File, OpenOptions};
use std::os::fd::OwnedFd;
use std::os::unix::fs::OpenOptionsExt;

/// Which standard stream an output redirection applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputTarget {
    Stdout,
    Stderr,
}

/// Tokens that can never be a redirection operand.
fn is_operator(token: &str) -> bool {
    matches!(token, ";" | "|" | "&" | "<" | ">")
}

struct Planner<'a> {
    tokens: &'a [String],
    pos: usize,
    line: CommandLine,
    current: usize,
    max_args: usize,
}

impl<'a> Planner<'a> {
    fn new(tokens: &'a [String], line: CommandLine, limits: &Limits) -> Self {
        Planner {
            tokens,
            pos: 0,
            line,
            current: 0,
            max_args: limits.max_args,
        }
    }

    fn build(mut self) -> ShellResult<CommandLine> {
        self.current = self.line.push_command(Link::Unconditional)?;

        while let Some(token) = self.consume() {
            match token {
                ";" => self.sequence()?,
                "|" if self.peek() == Some("|") => {
                    self.consume();
                    self.chain(Link::OnFailure, "||")?;
                }
                "|" => self.pipe()?,
                "&" if self.peek() == Some("&") => {
                    self.consume();
                    self.chain(Link::OnSuccess, "&&")?;
                }
                "&" => self.background()?,
                "<" => self.redirect_input()?,
                ">" => self.redirect_output(OutputTarget::Stdout)?,
                "2" if self.peek() == Some(">") => {
                    self.consume();
                    self.redirect_output(OutputTarget::Stderr)?;
                }
                "!" if self.node().argv.is_empty() => self.node_mut().invert = true,
                word => self.push_arg(word)?,
            }
        }

        if self.line.commands().iter().any(|node| node.argv.is_empty()) {
            return Err(ShellError::Syntax("empty command".to_string()));
        }
        Ok(self.line)
    }

    fn peek(&self) -> Option<&'a str> {
        self.tokens.get(self.pos).map(String::as_str)
    }

    fn consume(&mut self) -> Option<&'a str> {
        let token = self.peek();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn node(&self) -> &CommandNode {
        self.line.command(self.current)
    }

    fn node_mut(&mut self) -> &mut CommandNode {
        self.line.command_mut(self.current)
    }

    fn append(&mut self, link: Link) -> ShellResult<()> {
        self.current = self.line.push_command(link)?;
        Ok(())
    }

    fn require_rhs(&self, op: &str) -> ShellResult<()> {
        match self.peek() {
            Some(_) => Ok(()),
            None => Err(ShellError::Syntax(format!("expected a command after `{op}`"))),
        }
    }

    /// `;`
    fn sequence(&mut self) -> ShellResult<()> {
        if self.peek().is_some() {
            self.append(Link::Unconditional)?;
        }
        Ok(())
    }

    /// `&&` and `||`
    fn chain(&mut self, link: Link, op: &str) -> ShellResult<()> {
        self.require_rhs(op)?;
        self.append(link)
    }

    /// `|`
    fn pipe(&mut self) -> ShellResult<()> {
        self.require_rhs("|")?;
        let (read, write) = pipe2(OFlag::O_CLOEXEC).map_err(ShellError::Pipe)?;
        let write = self.line.register_fd(write)?;
        self.node_mut().stdout = Stream::Pipe(write);
        // A full registry or line drops `read` here, which closes it.
        let read = self.line.register_fd(read)?;
        self.append(Link::Unconditional)?;
        self.node_mut().stdin = Stream::Pipe(read);
        Ok(())
    }

    /// `&` on its own
    fn background(&mut self) -> ShellResult<()> {
        self.node_mut().background = true;
        match self.peek() {
            Some(";") | Some("|") | None => Ok(()),
            Some(_) => self.append(Link::Unconditional),
        }
    }

    fn operand(&mut self, op: &str) -> ShellResult<&'a str> {
        match self.consume() {
            Some(token) if !is_operator(token) => Ok(token),
            _ => Err(ShellError::Syntax(format!(
                "expected a file name after `{op}`"
            ))),
        }
    }

    /// `< FILE`
    fn redirect_input(&mut self) -> ShellResult<()> {
        let path = self.operand("<")?;
        let opened = File::open(path).map(OwnedFd::from);
        self.assign_opened(path, opened, |node, fd| node.stdin = Stream::File(fd))
    }

    /// `> FILE`, `>> FILE`, `2> FILE`, `2>> FILE`, `2>&1`
    fn redirect_output(&mut self, target: OutputTarget) -> ShellResult<()> {
        let append = self.peek() == Some(">");
        if append {
            self.consume();
        }

        if target == OutputTarget::Stderr && self.peek() == Some("&") {
            self.consume();
            return match self.consume() {
                Some("1") => {
                    self.node_mut().stderr = Stream::FollowStdout;
                    Ok(())
                }
                _ => Err(ShellError::Syntax("expected `1` after `2>&`".to_string())),
            };
        }

        let op = match (target, append) {
            (OutputTarget::Stdout, false) => ">",
            (OutputTarget::Stdout, true) => ">>",
            (OutputTarget::Stderr, false) => "2>",
            (OutputTarget::Stderr, true) => "2>>",
        };
        let path = self.operand(op)?;
        let opened = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(!append)
            .append(append)
            .mode(0o644)
            .open(path)
            .map(OwnedFd::from);
        self.assign_opened(path, opened, move |node, fd| match target {
            OutputTarget::Stdout => node.stdout = Stream::File(fd),
            OutputTarget::Stderr => node.stderr = Stream::File(fd),
        })
    }

    /// Register a freshly opened redirection target, or mark the current
    /// command as failed if it could not be opened.
    fn assign_opened(
        &mut self,
        path: &str,
        opened: std::io::Result<OwnedFd>,
        assign: impl FnOnce(&mut CommandNode, std::os::fd::RawFd),
    ) -> ShellResult<()> {
        match opened {
            Ok(fd) => {
                let fd = self.line.register_fd(fd)?;
                assign(self.node_mut(), fd);
            }
            Err(e) => {
                eprintln!("{path}: {e}");
                self.node_mut().status = Some(1);
            }
        }
        Ok(())
    }

    fn push_arg(&mut self, word: &str) -> ShellResult<()> {
        let max_args = self.max_args;
        let argv = &mut self.node_mut().argv;
        if argv.len() >= max_args {
            return Err(ShellError::TooManyArguments(max_args));
        }
        argv.push(word.to_string());
        Ok(())
    }
}

/// Normalize, tokenize and plan one input line.
///
/// Opens every pipe and redirection target the line asks for; the returned
/// [`CommandLine`] owns them. On error the partially built line is dropped,
/// which closes whatever had been opened so far.
///
/// # Arguments
///
/// * `input` - The raw line, possibly with a trailing newline.
/// * `env` - Variables available to `$NAME` expansion.
/// * `limits` - Size bounds for the line, its commands and their arguments.
///
/// # Returns
///
/// * `ShellResult<CommandLine>` - The execution graph, empty for a blank
///   line, or the reason the line cannot be run.
pub fn plan(input: &str, env: &Environment, limits: &Limits) -> ShellResult<CommandLine> {
    let text = lexer::normalize(input, env, limits.max_line)?;
    let tokens = lexer::tokenize(&text);
    log::trace!("tokens: {tokens:?}");

    let mut line = if tokens.is_empty() {
        CommandLine::new(limits)
    } else {
        Planner::new(&tokens, CommandLine::new(limits), limits).build()?
    };
    log::debug!("planned {} command(s) from {text:?}", line.len());
    line.set_source(text, tokens);
    Ok(line)
}
