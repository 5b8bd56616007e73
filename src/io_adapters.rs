use crate::command::Stream;
use nix::errno::Errno;
use nix::fcntl::{FcntlArg, FdFlag, fcntl};
use nix::libc::{STDERR_FILENO, STDIN_FILENO, STDOUT_FILENO};
use nix::unistd::{close, dup2};
use std::io::{self, Result as IoResult, Write};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};

/// Unbuffered writer on a raw standard descriptor.
///
/// Builtins write through this instead of `std::io::stdout()` so that the
/// bytes land on whatever descriptor 1 (or 2) currently points to, i.e. the
/// redirection target set up by the executor, without going through Rust's
/// line buffer or the test harness output capture.
pub struct FdWriter<H: AsFd>(H);

impl FdWriter<io::Stdout> {
    pub fn stdout() -> Self {
        Self(io::stdout())
    }
}

impl FdWriter<io::Stderr> {
    pub fn stderr() -> Self {
        Self(io::stderr())
    }
}

impl<H: AsFd> Write for FdWriter<H> {
    fn write(&mut self, data: &[u8]) -> IoResult<usize> {
        loop {
            match nix::unistd::write(self.0.as_fd(), data) {
                Err(nix::errno::Errno::EINTR) => continue,
                other => return other.map_err(io::Error::from),
            }
        }
    }

    fn flush(&mut self) -> IoResult<()> {
        Ok(())
    }
}

/// Descriptors 0, 1 and 2, in that order.
pub(crate) const STANDARD_FDS: [RawFd; 3] = [STDIN_FILENO, STDOUT_FILENO, STDERR_FILENO];

/// Copies of the shell's own descriptors 0, 1 and 2, put back on drop.
///
/// A slot that was closed when saved is closed again on drop, unless it has
/// been handed over with [`leave_open`](Self::leave_open).
pub struct SavedStdio {
    saved: [Option<OwnedFd>; 3],
    leave_open: [bool; 3],
}

impl SavedStdio {
    pub fn save() -> IoResult<Self> {
        io::stdout().flush()?;
        Ok(Self {
            saved: [
                clone_slot(io::stdin().as_fd())?,
                clone_slot(io::stdout().as_fd())?,
                clone_slot(io::stderr().as_fd())?,
            ],
            leave_open: [false; 3],
        })
    }

    /// Do not close standard slot `fd` on drop even if it was closed when
    /// saved; whoever registered it closes it.
    pub fn leave_open(&mut self, fd: RawFd) {
        if let Some(keep) = usize::try_from(fd)
            .ok()
            .and_then(|slot| self.leave_open.get_mut(slot))
        {
            *keep = true;
        }
    }
}

fn clone_slot(fd: BorrowedFd<'_>) -> IoResult<Option<OwnedFd>> {
    match fd.try_clone_to_owned() {
        Ok(owned) => Ok(Some(owned)),
        Err(e) if e.raw_os_error() == Some(Errno::EBADF as i32) => Ok(None),
        Err(e) => Err(e),
    }
}

impl Drop for SavedStdio {
    fn drop(&mut self) {
        let _ = io::stdout().flush();
        for ((target, saved), keep) in STANDARD_FDS
            .into_iter()
            .zip(&self.saved)
            .zip(self.leave_open)
        {
            let restored = match saved {
                Some(saved) => dup2(saved.as_raw_fd(), target).map(drop),
                None if !keep => match close(target) {
                    Err(Errno::EBADF) => Ok(()),
                    other => other,
                },
                None => Ok(()),
            };
            if let Err(e) = restored {
                log::warn!("failed to restore fd {target}: {e}");
            }
        }
    }
}

/// Point descriptors 0, 1 and 2 at the given streams.
///
/// stdout is wired before stderr so that [`Stream::FollowStdout`] picks up the
/// redirected stdout. Only touches raw descriptors and never allocates, so it
/// is safe to call in a freshly forked child.
///
/// A descriptor that already sits on its target slot (possible when the shell
/// started with that slot closed) only loses its close-on-exec flag.
pub fn redirect_standard_streams(
    stdin: Stream,
    stdout: Stream,
    stderr: Stream,
) -> nix::Result<()> {
    redirect(stdin, STDIN_FILENO)?;
    redirect(stdout, STDOUT_FILENO)?;
    redirect(stderr, STDERR_FILENO)
}

fn redirect(stream: Stream, target: RawFd) -> nix::Result<()> {
    match stream {
        Stream::Inherit => Ok(()),
        Stream::File(fd) | Stream::Pipe(fd) if fd == target => {
            fcntl(fd, FcntlArg::F_SETFD(FdFlag::empty())).map(drop)
        }
        Stream::File(fd) | Stream::Pipe(fd) => dup2(fd, target).map(drop),
        Stream::FollowStdout => dup2(STDOUT_FILENO, target).map(drop),
    }
}
