use nix::errno::Errno;
use thiserror::Error;

/// Errors that abort the current command line.
///
/// None of these terminate the shell itself: the caller reports the error on
/// standard error and moves on to the next line. Per-command failures (a
/// redirection target that cannot be opened, a program that cannot be
/// executed, a failed wait) are not represented here; they surface as exit
/// statuses on the affected command instead.
#[derive(Error, Debug)]
pub enum ShellError {
    /// The line grew past the configured size bound while being normalized.
    #[error("line too long")]
    LengthOverflow,

    /// An operator is missing its operand, or a command is empty.
    #[error("syntax error: {0}")]
    Syntax(String),

    /// A single command received more arguments than a node can hold.
    #[error("syntax error: too many arguments (max {0})")]
    TooManyArguments(usize),

    /// The line contains more commands than a command line can hold.
    #[error("syntax error: too many commands (max {0})")]
    TooManyCommands(usize),

    /// The descriptor registry of the line is full.
    #[error("too many open descriptors (max {0})")]
    TooManyDescriptors(usize),

    #[error("pipe: {0}")]
    Pipe(Errno),

    #[error("fork: {0}")]
    Fork(Errno),
}

pub type ShellResult<T> = Result<T, ShellError>;
