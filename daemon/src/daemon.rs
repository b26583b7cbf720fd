use std::env;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use nix::libc::{STDERR_FILENO, STDIN_FILENO, STDOUT_FILENO};
use nix::sys::signal::{signal, SigHandler, Signal};
use nix::sys::stat::{umask, Mode};
use nix::unistd::{dup2, fork, getpid, setsid, ForkResult};

use crate::config::DaemonConfig;
use crate::error::Result;

/// Process state that must live as long as the daemon: the pid file is
/// removed when this is dropped.
pub struct DaemonContext {
    pid_file: Option<PidFileGuard>,
}

impl DaemonContext {
    pub fn pid_file_path_owned(&self) -> Option<PathBuf> {
        self.pid_file
            .as_ref()
            .map(|guard| guard.path().to_path_buf())
    }
}

struct PidFileGuard {
    path: PathBuf,
}

impl PidFileGuard {
    fn acquire(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .mode(0o644)
            .open(&path)?;
        writeln!(file, "{}", getpid())?;

        Ok(Self { path })
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn cleanup_silently(&self) {
        if let Err(err) = fs::remove_file(&self.path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                log::warn!("failed to remove pid file {}: {}", self.path.display(), err);
            }
        }
    }
}

impl Drop for PidFileGuard {
    fn drop(&mut self) {
        self.cleanup_silently();
    }
}

/// Detaches from the terminal when `daemonize` is set, otherwise stays in
/// the foreground. Either way the pid file is written.
pub fn prepare_process(config: &DaemonConfig) -> Result<DaemonContext> {
    if config.daemonize {
        detach(config)?;
    }

    let pid_file = match config.pid_file() {
        Some(path) => Some(PidFileGuard::acquire(path.to_path_buf())?),
        None => None,
    };

    Ok(DaemonContext { pid_file })
}

/// Signals a detached daemon must not be stopped or confused by.
const DETACHED_IGNORED: [Signal; 5] = [
    Signal::SIGHUP,
    Signal::SIGCHLD,
    Signal::SIGTTOU,
    Signal::SIGTTIN,
    Signal::SIGPIPE,
];

fn detach(config: &DaemonConfig) -> Result<()> {
    // Resolve targets before forking so a bad path fails in the foreground.
    let stdio = StdioPlan::from_config(config);
    let files = stdio.open()?;

    continue_in_child()?;
    setsid()?;
    for sig in DETACHED_IGNORED {
        // SAFETY: SigIgn installs no handler code.
        unsafe { signal(sig, SigHandler::SigIgn)? };
    }
    // The session leader forks again so it can never reacquire a terminal.
    continue_in_child()?;

    umask(Mode::from_bits_truncate(config.umask.unwrap_or(0)));
    env::set_current_dir(&config.working_directory)?;
    files.install()
}

fn continue_in_child() -> Result<()> {
    // SAFETY: called before the runtime or any other thread is started.
    match unsafe { fork()? } {
        ForkResult::Parent { .. } => std::process::exit(0),
        ForkResult::Child => Ok(()),
    }
}

/// Where the detached process sends its standard descriptors.
#[derive(Debug, Clone, PartialEq, Eq)]
struct StdioPlan {
    stdin: PathBuf,
    stdout: PathBuf,
    stderr: PathBuf,
}

impl StdioPlan {
    /// Unset targets go to `/dev/null`; stderr follows stdout.
    fn from_config(config: &DaemonConfig) -> Self {
        let null = Path::new("/dev/null");
        let stdout = config.stdout().unwrap_or(null).to_path_buf();
        Self {
            stdin: config.stdin().unwrap_or(null).to_path_buf(),
            stderr: config.stderr().map(Path::to_path_buf).unwrap_or_else(|| stdout.clone()),
            stdout,
        }
    }

    fn open(&self) -> Result<StdioFiles> {
        let stdout = open_output(&self.stdout)?;
        let stderr = if self.stderr == self.stdout {
            None
        } else {
            Some(open_output(&self.stderr)?)
        };
        Ok(StdioFiles {
            stdin: OpenOptions::new().read(true).open(&self.stdin)?,
            stdout,
            stderr,
        })
    }
}

/// Opened descriptor targets; `stderr` is `None` when it shares stdout.
struct StdioFiles {
    stdin: File,
    stdout: File,
    stderr: Option<File>,
}

impl StdioFiles {
    fn install(&self) -> Result<()> {
        let stderr = self.stderr.as_ref().unwrap_or(&self.stdout);
        dup2(self.stdin.as_raw_fd(), STDIN_FILENO)?;
        dup2(self.stdout.as_raw_fd(), STDOUT_FILENO)?;
        dup2(stderr.as_raw_fd(), STDERR_FILENO)?;
        Ok(())
    }
}

fn open_output(path: &Path) -> Result<File> {
    if path == Path::new("/dev/null") {
        return Ok(OpenOptions::new().write(true).open(path)?);
    }

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    Ok(OpenOptions::new()
        .create(true)
        .append(true)
        .mode(0o644)
        .open(path)?)
}
