//! termsession
//!
//! A terminal session engine: spawn a child process on a pseudoterminal, pump
//! bytes both ways between the pty and a VT/xterm screen emulator, and give a
//! host application a thread-safe lifecycle (start, resize, write, forced
//! termination, exit notification).
//!
//! - `io`: bounded byte queues and the UTF-8 input encoder
//! - `parser`: VT/xterm escape sequence parser
//! - `core`: screen model, cells, cursor, scrollback, snapshots
//! - `emulator`: applies parsed actions to the screen
//! - `pty`: pseudoterminal allocation and child processes
//! - `session`: the lifecycle controller tying it all together
//! - `config`: session configuration

pub mod config;
pub mod core;
pub mod emulator;
pub mod io;
pub mod parser;
pub mod pty;
pub mod session;

pub use config::{ConfigError, SessionConfig};
pub use emulator::{Emulator, TerminalEvent};
pub use session::{
    exit_description, Session, SessionCallback, SessionError, SessionHandle, SessionState,
};
