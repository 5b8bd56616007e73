use crate::command::{CommandFactory, ExecutableCommand, ExitCode};
use crate::env::Environment;
use anyhow::{Context, Result, anyhow};
use argh::{EarlyExit, FromArgs};
use std::env;
use std::io::Write;
use std::path::PathBuf;

/// Built-in commands known to the shell at compile time.
///
/// Builtins are parsed using the [`argh`] crate (`FromArgs`) and executed directly
/// in-process without spawning a child process.
pub(crate) trait BuiltinCommand: Sized + FromArgs {
    /// Canonical name of the command, e.g. "cd" or "pwd".
    fn name() -> &'static str;

    /// Executes the command against the shell environment.
    ///
    /// Return value should follow shell conventions: 0 for success, non-zero for error.
    /// An `Err` is reported on the command's stderr and turned into status 1.
    fn execute(self, stdout: &mut dyn Write, env: &mut Environment) -> Result<ExitCode>;
}

impl<T: BuiltinCommand> ExecutableCommand for T {
    fn execute(
        self: Box<Self>,
        stdout: &mut dyn Write,
        stderr: &mut dyn Write,
        env: &mut Environment,
    ) -> Result<ExitCode> {
        match T::execute(*self, stdout, env) {
            Ok(x) => Ok(x),
            Err(e) => {
                writeln!(stderr, "{}: {e:#}", T::name())?;
                Ok(1)
            }
        }
    }
}

/// Stands in for a builtin whose arguments did not parse, or that was asked
/// for `--help`.
struct InvalidArgs {
    output: String,
    is_error: bool,
}

impl ExecutableCommand for InvalidArgs {
    fn execute(
        self: Box<Self>,
        stdout: &mut dyn Write,
        stderr: &mut dyn Write,
        _env: &mut Environment,
    ) -> Result<ExitCode> {
        if self.is_error {
            stderr.write_all(self.output.as_bytes())?;
            Ok(1)
        } else {
            stdout.write_all(self.output.as_bytes())?;
            Ok(0)
        }
    }
}

/// Factory allows creating instances of a [`BuiltinCommand`].
pub(crate) struct Factory<T> {
    _phantom: std::marker::PhantomData<T>,
}

impl<T> Default for Factory<T> {
    fn default() -> Self {
        Self {
            _phantom: std::marker::PhantomData,
        }
    }
}

impl<T: BuiltinCommand + 'static> CommandFactory for Factory<T> {
    fn name(&self) -> &'static str {
        T::name()
    }

    fn try_create(&self, name: &str, args: &[&str]) -> Option<Box<dyn ExecutableCommand>> {
        if name == T::name() {
            Some(match T::from_args(&[name], args) {
                Ok(cmd) => Box::new(cmd),
                Err(EarlyExit { output, status }) => Box::new(InvalidArgs {
                    output,
                    is_error: status.is_err(),
                }),
            })
        } else {
            None
        }
    }
}

/// The closed set of commands that run inside the shell process.
pub struct Builtins {
    factories: Vec<Box<dyn CommandFactory>>,
}

impl Builtins {
    pub fn new(factories: Vec<Box<dyn CommandFactory>>) -> Self {
        Self { factories }
    }

    #[cfg(test)]
    pub fn is_builtin(&self, name: &str) -> bool {
        self.factories.iter().any(|factory| factory.name() == name)
    }

    /// Build the builtin named by `argv[0]`, or `None` for external programs.
    pub fn create(&self, argv: &[String]) -> Option<Box<dyn ExecutableCommand>> {
        let (name, args) = argv.split_first()?;
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        self.factories
            .iter()
            .find_map(|factory| factory.try_create(name, &args))
    }
}

impl Default for Builtins {
    /// `cd`, `exit`, `export`, `unset` and `pwd`.
    fn default() -> Self {
        Self::new(vec![
            Box::new(Factory::<Cd>::default()),
            Box::new(Factory::<Exit>::default()),
            Box::new(Factory::<Export>::default()),
            Box::new(Factory::<Unset>::default()),
            Box::new(Factory::<Pwd>::default()),
        ])
    }
}

#[derive(FromArgs)]
/// Print the current working directory to standard output.
pub struct Pwd {}

impl BuiltinCommand for Pwd {
    fn name() -> &'static str {
        "pwd"
    }

    fn execute(self, stdout: &mut dyn Write, _env: &mut Environment) -> Result<ExitCode> {
        let cwd = env::current_dir().context("cannot read the current directory")?;
        writeln!(stdout, "{}", cwd.display())?;
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Change the current working directory.
/// If no target is provided, changes to the directory specified by the HOME variable.
pub struct Cd {
    #[argh(positional)]
    /// directory to switch to; absolute or relative to the current directory. Defaults to $HOME when omitted.
    pub target: Option<String>,
}

impl BuiltinCommand for Cd {
    fn name() -> &'static str {
        "cd"
    }

    fn execute(self, _stdout: &mut dyn Write, env: &mut Environment) -> Result<ExitCode> {
        let target = match self.target {
            Some(t) if !t.is_empty() => PathBuf::from(t),
            _ => match env.get_var("HOME") {
                Some(home) => PathBuf::from(home),
                None => return Err(anyhow!("HOME not set")),
            },
        };

        let new_dir = if target.is_absolute() {
            target
        } else {
            env.current_dir.join(target)
        };

        env::set_current_dir(&new_dir).with_context(|| new_dir.display().to_string())?;
        let cwd = env::current_dir().context("cannot read the new directory")?;
        env.set_var("PWD", cwd.to_string_lossy());
        env.current_dir = cwd;
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Exit the shell with the given status (0 when omitted).
pub struct Exit {
    #[argh(positional)]
    /// exit status; only the low 8 bits are kept
    pub code: Option<i32>,
}

impl BuiltinCommand for Exit {
    fn name() -> &'static str {
        "exit"
    }

    fn execute(self, _stdout: &mut dyn Write, env: &mut Environment) -> Result<ExitCode> {
        let code = self.code.unwrap_or(0) & 0xff;
        env.request_exit(code);
        Ok(code)
    }
}

#[derive(FromArgs)]
/// Set shell variables passed to executed programs.
/// Without arguments, print every variable as NAME=VALUE.
pub struct Export {
    #[argh(positional, greedy)]
    /// assignments in the form NAME=VALUE; a bare NAME is accepted and ignored
    pub assignments: Vec<String>,
}

impl BuiltinCommand for Export {
    fn name() -> &'static str {
        "export"
    }

    fn execute(self, stdout: &mut dyn Write, env: &mut Environment) -> Result<ExitCode> {
        if self.assignments.is_empty() {
            for (name, value) in env.sorted_vars() {
                writeln!(stdout, "{name}={value}")?;
            }
            return Ok(0);
        }

        for assignment in self.assignments {
            if let Some((name, value)) = assignment.split_once('=') {
                if name.is_empty() {
                    return Err(anyhow!("`{assignment}`: not a valid identifier"));
                }
                env.set_var(name, value);
            }
        }
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Remove shell variables.
pub struct Unset {
    #[argh(positional, greedy)]
    /// names of the variables to remove
    pub names: Vec<String>,
}

impl BuiltinCommand for Unset {
    fn name() -> &'static str {
        "unset"
    }

    fn execute(self, _stdout: &mut dyn Write, env: &mut Environment) -> Result<ExitCode> {
        if self.names.is_empty() {
            return Err(anyhow!("not enough arguments"));
        }
        for name in &self.names {
            env.remove_var(name);
        }
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;
    use std::env as stdenv;
    use std::fs;

    fn run(argv: &[&str], env: &mut Environment) -> (ExitCode, String, String) {
        let argv: Vec<String> = argv.iter().map(|s| s.to_string()).collect();
        let cmd = Builtins::default()
            .create(&argv)
            .expect("argv should name a builtin");
        let mut out = Vec::new();
        let mut err = Vec::new();
        let code = cmd.execute(&mut out, &mut err, env).unwrap();
        (
            code,
            String::from_utf8(out).unwrap(),
            String::from_utf8(err).unwrap(),
        )
    }

    #[test]
    fn test_registry_knows_only_shell_builtins() {
        let builtins = Builtins::default();
        for name in ["cd", "exit", "export", "unset", "pwd"] {
            assert!(builtins.is_builtin(name), "{name} should be a builtin");
        }
        assert!(!builtins.is_builtin("echo"));
        assert!(builtins.create(&["ls".to_string()]).is_none());
        assert!(builtins.create(&[]).is_none());
    }

    #[test]
    fn test_pwd_prints_current_dir() {
        let _lock = test_support::lock();
        let cur = stdenv::current_dir().unwrap();
        let mut env = Environment::empty();

        let (code, out, _) = run(&["pwd"], &mut env);

        assert_eq!(code, 0);
        assert_eq!(out, format!("{}\n", cur.display()));
    }

    #[test]
    fn test_cd_to_absolute_path_updates_pwd() {
        let _lock = test_support::lock();
        let temp = tempfile::tempdir().unwrap();
        let canonical_temp = fs::canonicalize(temp.path()).unwrap();
        let orig = stdenv::current_dir().unwrap();
        let mut env = Environment::empty();

        let (code, _, err) = run(&["cd", &canonical_temp.to_string_lossy()], &mut env);

        let new_cwd = stdenv::current_dir().unwrap();
        stdenv::set_current_dir(&orig).expect("failed to restore cwd");

        assert_eq!(code, 0, "unexpected error: {err}");
        assert_eq!(fs::canonicalize(new_cwd).unwrap(), canonical_temp);
        assert_eq!(env.current_dir, canonical_temp);
        assert_eq!(env.get_var("PWD"), Some(&*canonical_temp.to_string_lossy()));
    }

    #[test]
    fn test_cd_to_home_when_none() {
        let _lock = test_support::lock();
        let temp = tempfile::tempdir().unwrap();
        let canonical_temp = fs::canonicalize(temp.path()).unwrap();
        let orig = stdenv::current_dir().unwrap();
        let mut env = Environment::empty();
        env.set_var("HOME", canonical_temp.to_string_lossy());

        let (code, _, _) = run(&["cd"], &mut env);

        let new_cwd = stdenv::current_dir().unwrap();
        stdenv::set_current_dir(&orig).expect("failed to restore cwd");

        assert_eq!(code, 0);
        assert_eq!(fs::canonicalize(new_cwd).unwrap(), canonical_temp);
    }

    #[test]
    fn test_cd_without_home_fails() {
        let _lock = test_support::lock();
        let mut env = Environment::empty();

        let (code, _, err) = run(&["cd"], &mut env);

        assert_eq!(code, 1);
        assert_eq!(err, "cd: HOME not set\n");
    }

    #[test]
    fn test_cd_nonexistent_path_errors() {
        let _lock = test_support::lock();
        let orig = stdenv::current_dir().unwrap();
        let mut env = Environment::empty();
        let name = format!("nonexistent_dir_for_cd_test_{}", std::process::id());

        let (code, _, err) = run(&["cd", &name], &mut env);

        assert_eq!(code, 1);
        assert!(err.starts_with("cd: "), "unexpected message: {err}");
        assert!(err.contains(&name));
        assert_eq!(stdenv::current_dir().unwrap(), orig);
        assert_eq!(env.get_var("PWD"), None);
    }

    #[test]
    fn test_export_sets_and_lists_variables() {
        let mut env = Environment::empty();

        let (code, _, _) = run(&["export", "B=2", "A=x=y", "BARE"], &mut env);
        assert_eq!(code, 0);
        assert_eq!(env.get_var("A"), Some("x=y"));
        assert_eq!(env.get_var("B"), Some("2"));
        assert_eq!(env.get_var("BARE"), None);

        let (code, out, _) = run(&["export"], &mut env);
        assert_eq!(code, 0);
        assert_eq!(out, "A=x=y\nB=2\n");
    }

    #[test]
    fn test_export_overwrites_and_rejects_empty_name() {
        let mut env = Environment::empty();
        env.set_var("A", "old");

        run(&["export", "A=new"], &mut env);
        assert_eq!(env.get_var("A"), Some("new"));

        let (code, _, err) = run(&["export", "=oops"], &mut env);
        assert_eq!(code, 1);
        assert!(err.starts_with("export: "));
    }

    #[test]
    fn test_unset_removes_variables() {
        let mut env = Environment::empty();
        env.set_var("A", "1");
        env.set_var("B", "2");

        let (code, _, _) = run(&["unset", "A", "NEVER_SET"], &mut env);
        assert_eq!(code, 0);
        assert_eq!(env.get_var("A"), None);
        assert_eq!(env.get_var("B"), Some("2"));

        let (code, _, err) = run(&["unset"], &mut env);
        assert_eq!(code, 1);
        assert_eq!(err, "unset: not enough arguments\n");
    }

    #[test]
    fn test_exit_requests_termination() {
        let mut env = Environment::empty();
        let (code, _, _) = run(&["exit", "3"], &mut env);
        assert_eq!(code, 3);
        assert_eq!(env.exit_code, Some(3));

        let mut env = Environment::empty();
        run(&["exit"], &mut env);
        assert_eq!(env.exit_code, Some(0));

        let mut env = Environment::empty();
        run(&["exit", "256"], &mut env);
        assert_eq!(env.exit_code, Some(0));
    }

    #[test]
    fn test_invalid_arguments_report_usage() {
        let mut env = Environment::empty();
        let (code, out, err) = run(&["exit", "soon"], &mut env);
        assert_eq!(code, 1);
        assert!(out.is_empty());
        assert!(!err.is_empty());
        assert_eq!(env.exit_code, None);

        let (code, out, _) = run(&["pwd", "--help"], &mut env);
        assert_eq!(code, 0);
        assert!(out.contains("Usage"));
    }
}
