//! PTY (Pseudoterminal) Management
//!
//! Allocates a pseudoterminal pair, spawns a child process on the slave side
//! and exposes the master side as a [`std::fs::File`].
//!
//! This layer only moves bytes and manages the process; it knows nothing
//! about escape sequences.

use thiserror::Error;

#[cfg(unix)]
mod unix;

#[cfg(unix)]
pub use unix::{kill_group, wait_for_exit, Pty};

#[derive(Debug, Error)]
pub enum PtyError {
    #[error("Failed to open PTY master: {0}")]
    OpenMaster(#[source] nix::Error),

    #[error("Failed to grant access to the slave side: {0}")]
    Grant(#[source] nix::Error),

    #[error("Failed to unlock the slave side: {0}")]
    Unlock(#[source] nix::Error),

    #[error("Failed to resolve the slave device path: {0}")]
    SlaveName(#[source] nix::Error),

    #[error("Failed to fork child process: {0}")]
    Fork(#[source] nix::Error),

    #[error("Failed to apply terminal size: {0}")]
    Winsize(#[source] nix::Error),

    #[error("Failed to configure master descriptor: {0}")]
    Fcntl(#[source] nix::Error),

    #[error("Failed to reap child process: {0}")]
    Wait(#[source] nix::Error),

    #[error("Failed to signal process group {pid}: {source}")]
    Kill {
        pid: i32,
        #[source]
        source: nix::Error,
    },

    #[error("Argument contains an interior NUL byte: {0:?}")]
    NulByte(String),

    #[error("Failed to execute {executable}: {source}")]
    Exec {
        executable: String,
        #[source]
        source: nix::Error,
    },

    #[error("PTY I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type PtyResult<T> = Result<T, PtyError>;

/// Size reported to the child through TIOCSWINSZ
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSize {
    pub cols: u16,
    pub rows: u16,
    /// Rarely used by programs; 0 when unknown
    pub pixel_width: u16,
    pub pixel_height: u16,
}

impl WindowSize {
    /// A character-cell size; zero dimensions become 1
    pub fn new(cols: u16, rows: u16) -> Self {
        Self::with_pixels(cols, rows, 0, 0)
    }

    pub fn with_pixels(cols: u16, rows: u16, pixel_width: u16, pixel_height: u16) -> Self {
        Self {
            cols: cols.max(1),
            rows: rows.max(1),
            pixel_width,
            pixel_height,
        }
    }
}

impl Default for WindowSize {
    fn default() -> Self {
        Self::new(80, 24)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_size_clamps_zero() {
        let size = WindowSize::new(0, 0);
        assert_eq!((size.cols, size.rows), (1, 1));
    }

    #[test]
    fn test_pixel_size_is_carried() {
        let size = WindowSize::with_pixels(0, 30, 640, 480);
        assert_eq!((size.cols, size.rows), (1, 30));
        assert_eq!((size.pixel_width, size.pixel_height), (640, 480));
        assert_eq!(WindowSize::default().cols, 80);
    }

    #[test]
    fn test_error_display() {
        let err = PtyError::Kill {
            pid: 42,
            source: nix::Error::ESRCH,
        };
        assert!(err.to_string().contains("process group 42"));
    }
}
