//! Unix PTY implementation
//!
//! Allocates the pair with `posix_openpt` and friends, forks, and execs the
//! child on the slave side. Everything the child needs is prepared before the
//! fork so the child only makes raw system calls between `fork` and `execve`.
//! Exec failures are reported back to the parent over a close-on-exec pipe.

use std::ffi::{CString, OsString};
use std::fs::File;
use std::io::Read;
use std::os::fd::{AsRawFd, FromRawFd, IntoRawFd, OwnedFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::ptr;

use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, FdFlag, OFlag};
use nix::libc::{self, c_char};
use nix::pty::{grantpt, posix_openpt, unlockpt, PtyMaster};
use nix::sys::signal::{killpg, Signal};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{fork, ForkResult, Pid};

use super::{PtyError, PtyResult, WindowSize};

/// The master side of a pseudoterminal with a child process on the slave side
#[derive(Debug)]
pub struct Pty {
    master: File,
    pid: Pid,
}

impl Pty {
    /// Spawn `executable` on a new pseudoterminal
    ///
    /// * `args` - full argv including argv[0]; empty means `[executable]`
    /// * `env` - `KEY=VALUE` entries; empty inherits the current environment
    /// * `cwd` - working directory for the child, `None` keeps the current one
    ///
    /// The child becomes a session leader with the slave as its controlling
    /// terminal, so [`kill_group`] reaches everything it starts.
    pub fn spawn(
        executable: &str,
        args: &[String],
        env: &[String],
        cwd: Option<&Path>,
        size: WindowSize,
    ) -> PtyResult<Self> {
        let program = resolve_executable(executable, env).ok_or_else(|| PtyError::Exec {
            executable: executable.to_string(),
            source: Errno::ENOENT,
        })?;

        let master = posix_openpt(OFlag::O_RDWR | OFlag::O_NOCTTY).map_err(PtyError::OpenMaster)?;
        grantpt(&master).map_err(PtyError::Grant)?;
        unlockpt(&master).map_err(PtyError::Unlock)?;
        let slave_name = slave_name(&master)?;

        fcntl(master.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))
            .map_err(PtyError::Fcntl)?;
        set_window_size(master.as_raw_fd(), size)?;

        let setup = ChildSetup::new(&program, executable, args, env, cwd, &slave_name)?;
        let (status_read, status_write) = cloexec_pipe()?;

        // SAFETY: the child only calls async-signal-safe functions on memory
        // prepared before the fork, then execs or exits
        match unsafe { fork() }.map_err(PtyError::Fork)? {
            ForkResult::Child => {
                drop(master);
                drop(status_read);
                setup.exec(status_write.as_raw_fd())
            },
            ForkResult::Parent { child } => {
                drop(status_write);

                // SAFETY: the descriptor comes from posix_openpt and is owned here
                let master = unsafe { File::from_raw_fd(master.into_raw_fd()) };

                let mut report = Vec::new();
                File::from(status_read).read_to_end(&mut report)?;
                if report.len() >= 4 {
                    let errno = i32::from_ne_bytes([report[0], report[1], report[2], report[3]]);
                    let _ = wait_for_exit(child.as_raw());
                    return Err(PtyError::Exec {
                        executable: executable.to_string(),
                        source: Errno::from_i32(errno),
                    });
                }

                tracing::info!(pid = child.as_raw(), executable, "spawned child on pty {}", slave_name);
                Ok(Pty { master, pid: child })
            },
        }
    }

    /// Process id of the child
    pub fn pid(&self) -> i32 {
        self.pid.as_raw()
    }

    /// The master side of the pair
    pub fn master(&self) -> &File {
        &self.master
    }

    /// Duplicate the master descriptor for a worker thread
    pub fn try_clone_master(&self) -> PtyResult<File> {
        Ok(self.master.try_clone()?)
    }

    /// Set the window size; the kernel sends SIGWINCH to the foreground group
    pub fn resize(&self, size: WindowSize) -> PtyResult<()> {
        set_window_size(self.master.as_raw_fd(), size)
    }

    /// Current window size as seen by the kernel
    pub fn window_size(&self) -> PtyResult<WindowSize> {
        get_window_size(self.master.as_raw_fd())
    }
}

/// Send SIGKILL to the process group led by `pid`
pub fn kill_group(pid: i32) -> PtyResult<()> {
    killpg(Pid::from_raw(pid), Signal::SIGKILL).map_err(|source| PtyError::Kill { pid, source })
}

/// Block until `pid` exits
///
/// Returns the exit status for a normal exit and the negated signal number
/// when the process was killed by a signal.
pub fn wait_for_exit(pid: i32) -> PtyResult<i32> {
    let pid = Pid::from_raw(pid);
    loop {
        match waitpid(pid, None) {
            Ok(WaitStatus::Exited(_, code)) => return Ok(code),
            Ok(WaitStatus::Signaled(_, signal, _)) => return Ok(-(signal as i32)),
            Ok(_) => continue,
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(PtyError::Wait(e)),
        }
    }
}

#[cfg(target_os = "linux")]
fn slave_name(master: &PtyMaster) -> PtyResult<String> {
    nix::pty::ptsname_r(master).map_err(PtyError::SlaveName)
}

#[cfg(not(target_os = "linux"))]
fn slave_name(master: &PtyMaster) -> PtyResult<String> {
    // SAFETY: ptsname uses a static buffer; the name is copied out immediately
    unsafe { nix::pty::ptsname(master) }.map_err(PtyError::SlaveName)
}

/// Find the program to exec, searching `PATH` for bare names
fn resolve_executable(executable: &str, env: &[String]) -> Option<PathBuf> {
    if executable.is_empty() {
        return None;
    }
    if executable.contains('/') {
        return Some(PathBuf::from(executable));
    }

    let search = env
        .iter()
        .find_map(|entry| entry.strip_prefix("PATH="))
        .map(OsString::from)
        .or_else(|| std::env::var_os("PATH"))
        .unwrap_or_else(|| "/usr/local/bin:/usr/bin:/bin".into());

    std::env::split_paths(&search)
        .map(|dir| dir.join(executable))
        .find(|candidate| {
            candidate
                .metadata()
                .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
                .unwrap_or(false)
        })
}

fn to_cstring(bytes: &[u8]) -> PtyResult<CString> {
    CString::new(bytes).map_err(|_| PtyError::NulByte(String::from_utf8_lossy(bytes).into_owned()))
}

fn null_terminated(strings: &[CString]) -> Vec<*const c_char> {
    strings
        .iter()
        .map(|s| s.as_ptr())
        .chain(std::iter::once(ptr::null()))
        .collect()
}

/// Everything the child needs, allocated before the fork
struct ChildSetup {
    program: CString,
    slave: CString,
    cwd: Option<CString>,
    _argv: Vec<CString>,
    _envp: Vec<CString>,
    argv_ptrs: Vec<*const c_char>,
    envp_ptrs: Vec<*const c_char>,
}

impl ChildSetup {
    fn new(
        program: &Path,
        executable: &str,
        args: &[String],
        env: &[String],
        cwd: Option<&Path>,
        slave_name: &str,
    ) -> PtyResult<Self> {
        let argv = if args.is_empty() {
            vec![to_cstring(executable.as_bytes())?]
        } else {
            args.iter()
                .map(|a| to_cstring(a.as_bytes()))
                .collect::<PtyResult<Vec<_>>>()?
        };

        let envp = if env.is_empty() {
            std::env::vars_os()
                .filter_map(|(k, v)| {
                    let mut entry = k.as_bytes().to_vec();
                    entry.push(b'=');
                    entry.extend_from_slice(v.as_bytes());
                    CString::new(entry).ok()
                })
                .collect()
        } else {
            env.iter()
                .map(|e| to_cstring(e.as_bytes()))
                .collect::<PtyResult<Vec<_>>>()?
        };

        let argv_ptrs = null_terminated(&argv);
        let envp_ptrs = null_terminated(&envp);

        Ok(Self {
            program: to_cstring(program.as_os_str().as_bytes())?,
            slave: to_cstring(slave_name.as_bytes())?,
            cwd: cwd
                .map(|dir| to_cstring(dir.as_os_str().as_bytes()))
                .transpose()?,
            _argv: argv,
            _envp: envp,
            argv_ptrs,
            envp_ptrs,
        })
    }

    /// Runs in the forked child. Never returns.
    fn exec(&self, status_fd: RawFd) -> ! {
        // SAFETY: raw libc calls on pointers owned by `self`, which stays
        // alive until execve replaces the process image or _exit ends it
        unsafe {
            let mut set: libc::sigset_t = std::mem::zeroed();
            libc::sigemptyset(&mut set);
            libc::sigprocmask(libc::SIG_SETMASK, &set, ptr::null_mut());
            libc::signal(libc::SIGPIPE, libc::SIG_DFL);

            if libc::setsid() < 0 {
                fail(status_fd);
            }

            let slave = libc::open(self.slave.as_ptr(), libc::O_RDWR);
            if slave < 0 {
                fail(status_fd);
            }

            // macOS declares TIOCSCTTY as u32
            if libc::ioctl(slave, libc::TIOCSCTTY as _, 0) < 0 {
                fail(status_fd);
            }

            for target in [libc::STDIN_FILENO, libc::STDOUT_FILENO, libc::STDERR_FILENO] {
                if libc::dup2(slave, target) < 0 {
                    fail(status_fd);
                }
            }
            if slave > libc::STDERR_FILENO {
                libc::close(slave);
            }

            if let Some(cwd) = &self.cwd {
                if libc::chdir(cwd.as_ptr()) < 0 {
                    fail(status_fd);
                }
            }

            libc::execve(
                self.program.as_ptr(),
                self.argv_ptrs.as_ptr(),
                self.envp_ptrs.as_ptr(),
            );
            fail(status_fd)
        }
    }
}

/// Report errno to the parent and exit the child
unsafe fn fail(status_fd: RawFd) -> ! {
    let errno = Errno::last() as i32;
    let bytes = errno.to_ne_bytes();
    libc::write(status_fd, bytes.as_ptr().cast(), bytes.len());
    libc::_exit(1)
}

fn cloexec_pipe() -> PtyResult<(OwnedFd, OwnedFd)> {
    let mut fds = [0 as RawFd; 2];

    #[cfg(target_os = "linux")]
    // SAFETY: fds has room for the two descriptors pipe2 writes
    let rc = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) };

    #[cfg(not(target_os = "linux"))]
    // SAFETY: fds has room for the two descriptors pipe writes
    let rc = unsafe { libc::pipe(fds.as_mut_ptr()) };

    if rc < 0 {
        return Err(std::io::Error::last_os_error().into());
    }

    // SAFETY: both descriptors were just created and are owned by nobody else
    let (read, write) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };

    #[cfg(not(target_os = "linux"))]
    for fd in [&read, &write] {
        fcntl(fd.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC)).map_err(PtyError::Fcntl)?;
    }

    Ok((read, write))
}

/// Set the window size on a PTY file descriptor
fn set_window_size(fd: RawFd, size: WindowSize) -> PtyResult<()> {
    let winsize = libc::winsize {
        ws_row: size.rows,
        ws_col: size.cols,
        ws_xpixel: size.pixel_width,
        ws_ypixel: size.pixel_height,
    };

    // SAFETY: TIOCSWINSZ reads a winsize struct that lives for the call
    let result = unsafe { libc::ioctl(fd, libc::TIOCSWINSZ, &winsize) };

    if result < 0 {
        Err(PtyError::Winsize(Errno::last()))
    } else {
        Ok(())
    }
}

fn get_window_size(fd: RawFd) -> PtyResult<WindowSize> {
    let mut winsize = libc::winsize {
        ws_row: 0,
        ws_col: 0,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };

    // SAFETY: TIOCGWINSZ fills the winsize struct
    let result = unsafe { libc::ioctl(fd, libc::TIOCGWINSZ, &mut winsize) };

    if result < 0 {
        Err(PtyError::Winsize(Errno::last()))
    } else {
        Ok(WindowSize {
            rows: winsize.ws_row,
            cols: winsize.ws_col,
            pixel_width: winsize.ws_xpixel,
            pixel_height: winsize.ws_ypixel,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    /// Read until EOF or EIO (the slave side has been closed)
    fn read_all(mut master: &File) -> String {
        let mut out = Vec::new();
        let mut buf = [0u8; 1024];
        loop {
            match master.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => out.extend_from_slice(&buf[..n]),
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
        String::from_utf8_lossy(&out).into_owned()
    }

    #[test]
    fn test_spawn_echo() {
        let pty = Pty::spawn(
            "/bin/echo",
            &strings(&["echo", "hello"]),
            &[],
            None,
            WindowSize::default(),
        )
        .expect("Failed to spawn PTY");

        let output = read_all(pty.master());
        assert!(output.contains("hello"), "Unexpected output: {output:?}");
        assert_eq!(wait_for_exit(pty.pid()).unwrap(), 0);
    }

    #[test]
    fn test_bare_name_is_resolved_through_path() {
        let pty = Pty::spawn("sh", &strings(&["sh", "-c", "exit 3"]), &[], None, WindowSize::default())
            .expect("Failed to spawn PTY");
        let _ = read_all(pty.master());
        assert_eq!(wait_for_exit(pty.pid()).unwrap(), 3);
    }

    #[test]
    fn test_env_and_cwd() {
        let dir = tempfile::tempdir().unwrap();
        let pty = Pty::spawn(
            "/bin/sh",
            &strings(&["sh", "-c", "echo \"$GREETING\"; pwd"]),
            &strings(&["GREETING=howdy", "PATH=/usr/bin:/bin"]),
            Some(dir.path()),
            WindowSize::default(),
        )
        .expect("Failed to spawn PTY");

        let output = read_all(pty.master());
        let expected_dir = dir.path().canonicalize().unwrap();
        assert!(output.contains("howdy"), "Unexpected output: {output:?}");
        assert!(
            output.contains(expected_dir.to_str().unwrap()),
            "Unexpected output: {output:?}"
        );
        assert_eq!(wait_for_exit(pty.pid()).unwrap(), 0);
    }

    #[test]
    fn test_spawn_missing_executable() {
        let err = Pty::spawn("/nonexistent/program", &[], &[], None, WindowSize::default())
            .unwrap_err();
        assert!(matches!(err, PtyError::Exec { source: Errno::ENOENT, .. }), "{err}");

        let err = Pty::spawn("no-such-program-anywhere", &[], &[], None, WindowSize::default())
            .unwrap_err();
        assert!(matches!(err, PtyError::Exec { .. }));
    }

    #[test]
    fn test_spawn_bad_cwd() {
        let err = Pty::spawn(
            "/bin/sh",
            &[],
            &[],
            Some(Path::new("/nonexistent/dir")),
            WindowSize::default(),
        )
        .unwrap_err();
        assert!(matches!(err, PtyError::Exec { .. }));
    }

    #[test]
    fn test_nul_in_argument() {
        let err = Pty::spawn("/bin/echo", &strings(&["echo", "a\0b"]), &[], None, WindowSize::default())
            .unwrap_err();
        assert!(matches!(err, PtyError::NulByte(_)));
    }

    #[test]
    fn test_resize() {
        let pty = Pty::spawn("/bin/cat", &[], &[], None, WindowSize::new(80, 24))
            .expect("Failed to spawn PTY");
        assert_eq!(pty.window_size().unwrap(), WindowSize::new(80, 24));

        pty.resize(WindowSize::new(120, 40)).expect("Failed to resize");
        let size = pty.window_size().unwrap();
        assert_eq!((size.cols, size.rows), (120, 40));

        kill_group(pty.pid()).unwrap();
        assert_eq!(wait_for_exit(pty.pid()).unwrap(), -(Signal::SIGKILL as i32));
    }

    #[test]
    fn test_cat_echoes_input() {
        let pty = Pty::spawn("/bin/cat", &[], &[], None, WindowSize::default())
            .expect("Failed to spawn PTY");
        let mut writer = pty.try_clone_master().unwrap();
        writer.write_all(b"ping\n").unwrap();

        let mut seen = String::new();
        let mut buf = [0u8; 256];
        let mut reader = pty.master();
        while !seen.contains("ping") {
            let n = reader.read(&mut buf).unwrap();
            assert!(n > 0);
            seen.push_str(&String::from_utf8_lossy(&buf[..n]));
        }

        kill_group(pty.pid()).unwrap();
        assert!(wait_for_exit(pty.pid()).unwrap() < 0);
    }

    #[test]
    fn test_kill_group_unknown_pid() {
        // Far above pid_max on common systems
        assert!(kill_group(i32::MAX - 1).is_err());
    }
}
