//! A small shell that turns input lines into command graphs and runs them.
//!
//! A line such as `false && echo nope || cat < in | wc -l > out &` is
//! normalized and tokenized by [`lexer`], planned by [`parser::plan`] into a
//! [`CommandLine`] (commands, the flow links between them and every descriptor
//! opened for pipes and redirections), and finally driven by the
//! [`Interpreter`], which runs built-ins in-process and everything else with
//! `fork`/`execve`.
//!
//! The public modules [`command`] and [`env`] expose the node types and the
//! shell environment for callers that want to plan or inspect lines
//! themselves.

mod builtin;
pub mod command;
pub mod command_line;
pub mod env;
pub mod error;
mod external;
pub mod fd_registry;
mod interpreter;
mod io_adapters;
pub mod lexer;
pub mod parser;

pub use builtin::Builtins;
pub use command_line::{CommandLine, Limits};
pub use error::{ShellError, ShellResult};
/// Just a convenient re-export of the interactive command runner.
///
/// See [`Interpreter`] for the high-level API and examples.
pub use interpreter::Interpreter;
pub use parser::plan;
