use crate::builtin::Builtins;
use crate::command::{ExecutableCommand, ExitCode};
use crate::command_line::{CommandLine, Limits};
use crate::env::Environment;
use crate::external;
use crate::io_adapters::{FdWriter, SavedStdio, redirect_standard_streams};
use crate::parser;
use anyhow::Context;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::io::Write;

/// A small shell that plans input lines into command graphs and runs them.
///
/// The interpreter owns the shell [`Environment`], the set of [`Builtins`]
/// and the status of the last command that completed.
///
/// Example
/// ```no_run
/// use flowsh::Interpreter;
/// let mut sh = Interpreter::default();
/// let code = sh.run_line("false || echo recovered").unwrap();
/// assert_eq!(code, 0);
/// ```
pub struct Interpreter {
    env: Environment,
    builtins: Builtins,
    limits: Limits,
    last_status: ExitCode,
}

impl Interpreter {
    /// Create a new interpreter with a custom set of builtins.
    pub fn new(env: Environment, builtins: Builtins, limits: Limits) -> Self {
        Self {
            env,
            builtins,
            limits,
            last_status: 0,
        }
    }

    /// Default builtins and the process environment, with custom size bounds.
    pub fn with_limits(limits: Limits) -> Self {
        Self::new(Environment::new(), Builtins::default(), limits)
    }

    /// Status of the most recent command that completed.
    pub fn last_status(&self) -> ExitCode {
        self.last_status
    }

    /// The code passed to `exit`, once it has been run.
    pub fn exit_code(&self) -> Option<ExitCode> {
        self.env.exit_code
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }

    pub fn env_mut(&mut self) -> &mut Environment {
        &mut self.env
    }

    /// Plan and execute one input line.
    ///
    /// Returns the last status once the line is done. A line that cannot be
    /// planned or started is reported as an error and leaves the last status
    /// untouched; every descriptor it opened is closed either way.
    pub fn run_line(&mut self, input: &str) -> anyhow::Result<ExitCode> {
        let mut line = parser::plan(input, &self.env, &self.limits)?;
        self.execute(&mut line)?;
        Ok(self.last_status)
    }

    /// Drive a planned line to completion.
    ///
    /// Starts at command 0 and follows the flow links chosen by each status
    /// (see [`CommandLine::successor`]) until no successor is left or `exit`
    /// has been called. The line's descriptors are all closed on return.
    pub fn execute(&mut self, line: &mut CommandLine) -> anyhow::Result<()> {
        log::debug!("executing {:?}", line.text());
        let mut writers = Vec::new();
        let outcome = self.walk(line, &mut writers);
        line.close_fds();
        reap_writers(line, &mut writers);
        outcome
    }

    fn walk(&mut self, line: &mut CommandLine, writers: &mut Vec<usize>) -> anyhow::Result<()> {
        let mut current = (!line.is_empty()).then_some(0);
        while let Some(index) = current {
            let status = match self.launch(line, index)? {
                Some(status) => {
                    if line.command(index).background {
                        // Whatever fed a background reader is left running with it.
                        for writer in writers.drain(..) {
                            let node = line.command_mut(writer);
                            node.status = Some(node.apply_invert(0));
                        }
                    } else {
                        reap_writers(line, writers);
                    }
                    self.last_status = status;
                    status
                }
                None => {
                    writers.push(index);
                    0
                }
            };
            if self.env.exit_code.is_some() {
                log::debug!("exit requested, leaving the line");
                break;
            }
            current = line.successor(index, status);
            log::trace!("command {index} -> {status}, next {current:?}");
        }
        Ok(())
    }

    /// Run command `index` and return its status, or `None` for an external
    /// pipe writer whose wait is deferred until its reader is running.
    fn launch(
        &mut self,
        line: &mut CommandLine,
        index: usize,
    ) -> anyhow::Result<Option<ExitCode>> {
        let node = line.command(index);
        let status = if let Some(preset) = node.status {
            log::debug!("not running {:?}, redirection failed", node.argv);
            line.release_command_fds(index);
            preset
        } else if let Some(cmd) = self.builtins.create(&node.argv) {
            let status = self.run_builtin(line, index, cmd);
            line.release_command_fds(index);
            status
        } else {
            let pid = external::spawn(line, index, &self.env)
                .with_context(|| format!("cannot start {:?}", line.command(index).argv))?;
            log::debug!("command {index} started as {pid}");
            line.command_mut(index).pid = Some(pid);
            line.release_command_fds(index);

            let node = line.command(index);
            if node.background {
                if let Err(e) = writeln!(FdWriter::stdout(), "[1] {pid}") {
                    log::warn!("cannot announce background job {pid}: {e}");
                }
                0
            } else if node.writes_to_pipe() {
                return Ok(None);
            } else {
                external::wait_for(pid)
            }
        };

        let node = line.command_mut(index);
        let status = node.apply_invert(status);
        node.status = Some(status);
        Ok(Some(status))
    }

    fn run_builtin(
        &mut self,
        line: &CommandLine,
        index: usize,
        cmd: Box<dyn ExecutableCommand>,
    ) -> ExitCode {
        let node = line.command(index);
        let name = node.name().unwrap_or_default();
        let mut saved = match SavedStdio::save() {
            Ok(saved) => saved,
            Err(e) => {
                eprintln!("{name}: cannot save standard streams: {e}");
                return 1;
            }
        };
        for fd in node.assigned_fds() {
            saved.leave_open(fd);
        }

        let result = redirect_standard_streams(node.stdin, node.stdout, node.stderr)
            .context("cannot redirect standard streams")
            .and_then(|()| {
                cmd.execute(
                    &mut FdWriter::stdout(),
                    &mut FdWriter::stderr(),
                    &mut self.env,
                )
            });
        drop(saved);

        result.unwrap_or_else(|e| {
            eprintln!("{name}: {e:#}");
            1
        })
    }

    /// Read lines with `rustyline` and run them until `exit` or end of input.
    ///
    /// Returns the code passed to `exit`, or the last status on end of input.
    pub fn repl(&mut self, prompt: &str) -> rustyline::Result<ExitCode> {
        let mut rl = DefaultEditor::new()?;

        loop {
            match rl.readline(prompt) {
                Ok(line) => {
                    if !line.trim().is_empty() {
                        rl.add_history_entry(line.as_str())?;
                    }
                    if let Err(e) = self.run_line(&line) {
                        eprintln!("flowsh: {e:#}");
                    }
                    if let Some(code) = self.env.exit_code {
                        return Ok(code);
                    }
                }
                Err(ReadlineError::Interrupted) => continue,
                Err(ReadlineError::Eof) => return Ok(self.last_status),
                Err(err) => return Err(err),
            }
        }
    }
}

impl Default for Interpreter {
    /// The process environment, the default builtins and default limits.
    fn default() -> Self {
        Self::with_limits(Limits::default())
    }
}

/// Wait for the deferred pipe writers in launch order and record their
/// statuses on their nodes.
fn reap_writers(line: &mut CommandLine, writers: &mut Vec<usize>) {
    for index in writers.drain(..) {
        if let Some(pid) = line.command(index).pid {
            let node = line.command_mut(index);
            let status = node.apply_invert(external::wait_for(pid));
            log::trace!("pipe writer {index} ({pid}) -> {status}");
            node.status = Some(status);
        }
    }
}
