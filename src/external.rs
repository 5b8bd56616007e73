use crate::command::{CommandNode, ExitCode, Stream};
use crate::command_line::CommandLine;
use crate::env::Environment;
use crate::error::{ShellError, ShellResult};
use crate::fd_registry::DescriptorRegistry;
use crate::io_adapters::{STANDARD_FDS, redirect_standard_streams};
use nix::errno::Errno;
use nix::sys::signal::{SigHandler, Signal, signal};
use nix::sys::wait::{WaitStatus, waitpid};
use nix::unistd::{ForkResult, Pid, execve, fork};
use std::borrow::Cow;
use std::ffi::{CString, OsStr};
use std::io;
use std::os::fd::AsFd;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

/// Everything the child needs between `fork` and `execve`, built up front so
/// the child only has to issue system calls.
struct PreparedExec {
    path: Option<CString>,
    argv: Vec<CString>,
    envp: Vec<CString>,
    not_found: Vec<u8>,
    streams: [Stream; 3],
}

impl PreparedExec {
    fn new(node: &CommandNode, env: &Environment) -> Self {
        let name = node.name().unwrap_or_default();
        let search_paths = env.get_var("PATH").unwrap_or_default();
        let argv: Option<Vec<CString>> = node
            .argv
            .iter()
            .map(|arg| CString::new(arg.as_bytes()).ok())
            .collect();
        let path = argv.as_ref().and_then(|_| {
            find_command_path(OsStr::new(search_paths), Path::new(name))
                .and_then(|found| CString::new(found.as_os_str().as_bytes()).ok())
        });
        Self {
            path,
            argv: argv.unwrap_or_default(),
            envp: env.to_envp(),
            not_found: format!("{name}: command not found\n").into_bytes(),
            streams: [node.stdin, node.stdout, node.stderr],
        }
    }

    /// Runs in the forked child. Never returns.
    fn exec_child(&self, registry: &mut DescriptorRegistry) -> ! {
        // SAFETY: restoring the default disposition installs no handler code.
        // The shell ignores SIGPIPE; programs expect to be killed by it.
        let _ = unsafe { signal(Signal::SIGPIPE, SigHandler::SigDfl) };

        let [stdin, stdout, stderr] = self.streams;
        if redirect_standard_streams(stdin, stdout, stderr).is_err() {
            write_stderr(b"cannot redirect standard streams\n");
            child_exit(1);
        }
        // A descriptor already sitting on its standard slot is the stream itself.
        for (stream, target) in self.streams.iter().zip(STANDARD_FDS) {
            if stream.fd() == Some(target) {
                registry.forget(target);
            }
        }
        // Pipe readers only see EOF once every copy of the write end is gone.
        registry.drain();

        if let Some(path) = &self.path {
            let _ = execve(path.as_c_str(), self.argv.as_slice(), self.envp.as_slice());
        }
        write_stderr(&self.not_found);
        child_exit(127)
    }
}

fn write_stderr(message: &[u8]) {
    let _ = nix::unistd::write(io::stderr().as_fd(), message);
}

fn child_exit(code: ExitCode) -> ! {
    // SAFETY: `_exit` ends the forked child without running the parent's
    // atexit handlers or flushing buffers it inherited.
    unsafe { nix::libc::_exit(code) }
}

/// Fork a child running command `index` of `line`.
///
/// The program is resolved through the `PATH` of `env` before forking. The
/// child wires its standard streams, closes every descriptor of the line and
/// executes the program; if that fails it reports `command not found` and
/// exits with status 127.
pub fn spawn(line: &mut CommandLine, index: usize, env: &Environment) -> ShellResult<Pid> {
    let prepared = PreparedExec::new(line.command(index), env);
    log::debug!(
        "spawning {:?} as {:?}",
        line.command(index).argv,
        prepared.path
    );

    // SAFETY: between fork and execve the child only calls dup2, close,
    // signal, write and _exit on data prepared above.
    match unsafe { fork() }.map_err(ShellError::Fork)? {
        ForkResult::Child => prepared.exec_child(line.registry_mut()),
        ForkResult::Parent { child } => Ok(child),
    }
}

/// Block until `pid` terminates and return its status.
///
/// Normal exit yields the child's exit code; death by signal or a failed
/// wait yields 1.
pub fn wait_for(pid: Pid) -> ExitCode {
    loop {
        match waitpid(pid, None) {
            Ok(WaitStatus::Exited(_, code)) => return code,
            Ok(status) => {
                log::debug!("{pid} ended abnormally: {status:?}");
                return 1;
            }
            Err(Errno::EINTR) => continue,
            Err(e) => {
                eprintln!("wait: {e}");
                return 1;
            }
        }
    }
}

/// Find the program a command name refers to.
///
/// A name with a `/` in it (`/bin/sh`, `./run`, `bin/tool`) is taken as a
/// path and returned if something exists there. A bare name is looked up in
/// each directory of `search_paths`, a `PATH`-style list, and the first
/// regular file found wins. An empty name matches nothing.
pub fn find_command_path<'a>(search_paths: &OsStr, path: &'a Path) -> Option<Cow<'a, Path>> {
    if path.is_absolute() {
        return find_by_path(path).map(Cow::Borrowed);
    }

    if path.starts_with("./") && path.exists() {
        return Some(Cow::Borrowed(path));
    }

    let mut components = path.components();
    match (components.next(), components.next()) {
        (None, None) => None,
        (Some(x), None) => find_in_path(search_paths, x.as_os_str()).map(Cow::Owned),
        _ => find_by_path(path).map(Cow::Borrowed),
    }
}

fn find_in_path(search_paths: &OsStr, cmd: &OsStr) -> Option<PathBuf> {
    std::env::split_paths(search_paths)
        .map(|dir| dir.join(cmd))
        .find(|candidate| candidate.is_file())
}

fn find_by_path(path: &Path) -> Option<&Path> {
    if path.exists() { Some(path) } else { None }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;
    use std::fs::{self, File};

    fn osstr(s: &str) -> &OsStr {
        OsStr::new(s)
    }

    #[test]
    fn absolute_existing_true() {
        let path = Path::new("/bin/sh");
        let found = find_command_path(osstr("/bin"), path)
            .expect("Expected to find /bin/sh via absolute path");
        assert_eq!(found.as_ref(), path);
    }

    #[test]
    fn absolute_nonexisting() {
        let path = Path::new("/bin/nonexisting");
        assert!(find_command_path(osstr("/bin"), path).is_none());
    }

    #[test]
    fn single_component_found_in_path() {
        let found = find_command_path(osstr("/nonexistent_dir:/bin"), Path::new("sh"))
            .expect("Expected to find 'sh' in /bin via PATH search");
        assert_eq!(found.as_ref(), Path::new("/bin/sh"));
    }

    #[test]
    fn single_component_not_found_in_path() {
        assert!(find_command_path(osstr("/bin"), Path::new("nonexisting")).is_none());
    }

    #[test]
    fn directories_in_path_are_skipped() {
        let _lock = test_support::lock();
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("tool")).unwrap();
        let search = dir.path().as_os_str();
        assert!(find_command_path(search, Path::new("tool")).is_none());
    }

    #[test]
    fn multiple_components_relative_existing() {
        let _lock = test_support::lock();
        let cwd_before = std::env::current_dir().expect("cwd");
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir_all(tmp.path().join("bin")).expect("create temp bin dir");
        File::create(tmp.path().join("bin").join("sh")).expect("touch bin/sh");

        std::env::set_current_dir(tmp.path()).expect("set cwd");
        let res = find_command_path(osstr("/does/not/matter"), Path::new("bin/sh"))
            .map(|p| p.into_owned());
        std::env::set_current_dir(&cwd_before).ok();

        let found = res.expect("Expected to find relative 'bin/sh' in current dir");
        assert!(found.ends_with("bin/sh"));
    }

    #[test]
    fn current_dir_with_dot_prefix() {
        let _lock = test_support::lock();
        let cwd_before = std::env::current_dir().expect("cwd");
        let tmp = tempfile::tempdir().unwrap();
        File::create(tmp.path().join("foo")).expect("touch foo");

        std::env::set_current_dir(tmp.path()).expect("set cwd");
        let res = find_command_path(osstr("/bin"), Path::new("./foo")).map(|p| p.into_owned());
        std::env::set_current_dir(&cwd_before).ok();

        assert_eq!(res.as_deref(), Some(Path::new("./foo")));
    }

    #[test]
    fn empty_path_is_none() {
        assert!(find_command_path(osstr("/bin"), Path::new("")).is_none());
    }

    #[test]
    fn prepared_exec_reports_missing_program() {
        let mut env = Environment::empty();
        env.set_var("PATH", "/bin:/usr/bin");
        let node = CommandNode {
            argv: vec!["no_such_command_xyz".to_string()],
            ..CommandNode::default()
        };
        let prepared = PreparedExec::new(&node, &env);
        assert!(prepared.path.is_none());
        assert_eq!(prepared.not_found, b"no_such_command_xyz: command not found\n");

        let node = CommandNode {
            argv: vec!["sh".to_string(), "-c".to_string(), "true".to_string()],
            ..CommandNode::default()
        };
        let prepared = PreparedExec::new(&node, &env);
        assert!(prepared.path.is_some());
        assert_eq!(prepared.argv.len(), 3);
    }
}
