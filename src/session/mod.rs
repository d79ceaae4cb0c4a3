//! Terminal Session
//!
//! A [`Session`] pairs one child process with a pseudoterminal and a screen
//! emulator. The child is spawned on the first size notification. From then
//! on three worker threads move bytes between the pty and two bounded queues
//! and report the child's exit, while all emulator and state mutation happens
//! on the host's consumer context through [`Session::process_pending`],
//! [`Session::wait_and_process`] or [`Session::run_until_finished`].
//!
//! Teardown always runs in the same order: the state becomes
//! [`SessionState::Finished`], both queues are closed (unblocking the
//! workers), and then the session's pty descriptor is released.

mod callback;
mod exit;
mod worker;

use std::fmt;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use callback::SessionCallback;
pub use exit::exit_description;
pub use worker::{READER_GRACE, READ_BUFFER_SIZE};

use crate::config::SessionConfig;
use crate::emulator::{Emulator, TerminalEvent};
use crate::io::{encode_code_point, ByteQueue, InvalidCodePoint};
use crate::pty::{self, Pty, PtyError, WindowSize};
use worker::{ChildStatus, Message};

/// Exit code recorded when the child could not be started
const SPAWN_FAILURE_EXIT_CODE: i32 = 1;

/// How often the consumer polls the reader while draining after exit
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Errors returned to the host
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    InvalidCodePoint(#[from] InvalidCodePoint),

    #[error("PTY error: {0}")]
    Pty(#[from] PtyError),
}

/// Opaque identifier assigned when a session is created
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionHandle(String);

impl SessionHandle {
    fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle of a session; transitions only move forward
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No size notification yet, so no child
    NotStarted,
    Running { pid: i32 },
    /// The child exited (or never started); the code never changes again
    Finished { exit_code: i32 },
}

/// A child process running on a pseudoterminal, with its screen
pub struct Session {
    handle: SessionHandle,
    name: Option<String>,
    config: SessionConfig,
    callback: Box<dyn SessionCallback>,
    state: SessionState,
    pty: Option<Pty>,
    /// Worker progress for the running child
    child: Option<Arc<ChildStatus>>,
    emulator: Option<Emulator>,
    /// Process output on its way to the emulator
    process_to_terminal: Arc<ByteQueue>,
    /// Host input on its way to the process
    terminal_to_process: Arc<ByteQueue>,
    messages_tx: Sender<Message>,
    messages_rx: Receiver<Message>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("handle", &self.handle)
            .field("name", &self.name)
            .field("state", &self.state)
            .field("executable", &self.config.executable)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Create a session; nothing is spawned until [`update_size`](Self::update_size)
    pub fn new(config: SessionConfig, callback: Box<dyn SessionCallback>) -> Self {
        let (messages_tx, messages_rx) = mpsc::channel();
        Self {
            handle: SessionHandle::generate(),
            name: None,
            process_to_terminal: Arc::new(ByteQueue::new(config.queue_capacity)),
            terminal_to_process: Arc::new(ByteQueue::new(config.queue_capacity)),
            config,
            callback,
            state: SessionState::NotStarted,
            pty: None,
            child: None,
            emulator: None,
            messages_tx,
            messages_rx,
        }
    }

    pub fn handle(&self) -> &SessionHandle {
        &self.handle
    }

    /// Host-assigned label, unused by the session itself
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = Some(name.into());
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, SessionState::Running { .. })
    }

    /// Process id while running
    pub fn pid(&self) -> Option<i32> {
        match self.state {
            SessionState::Running { pid } => Some(pid),
            _ => None,
        }
    }

    /// Exit code once finished
    pub fn exit_status(&self) -> Option<i32> {
        match self.state {
            SessionState::Finished { exit_code } => Some(exit_code),
            _ => None,
        }
    }

    /// The emulator, once the first size notification has arrived
    pub fn emulator(&self) -> Option<&Emulator> {
        self.emulator.as_ref()
    }

    /// Window title set by the child, empty if none
    pub fn title(&self) -> &str {
        self.emulator.as_ref().map_or("", Emulator::title)
    }

    /// Report the visible size in cells
    ///
    /// The first call creates the emulator and spawns the child. Later calls
    /// resize the pty (the child receives SIGWINCH) and reflow the emulator.
    /// Zero dimensions are treated as 1.
    pub fn update_size(&mut self, cols: u16, rows: u16) -> Result<(), SessionError> {
        let size = WindowSize::new(cols, rows);
        match self.emulator.as_mut() {
            None => {
                self.initialize(size);
                Ok(())
            },
            Some(emulator) => {
                if let Some(pty) = &self.pty {
                    pty.resize(size)?;
                }
                emulator.resize(size.cols as usize, size.rows as usize);
                Ok(())
            },
        }
    }

    fn initialize(&mut self, size: WindowSize) {
        self.emulator = Some(Emulator::new(
            size.cols as usize,
            size.rows as usize,
            self.config.transcript_rows,
        ));

        match self.spawn_child(size) {
            Ok((pty, child)) => {
                tracing::info!(
                    session = %self.handle,
                    pid = pty.pid(),
                    "session started: {}",
                    self.config.executable
                );
                self.state = SessionState::Running { pid: pty.pid() };
                self.pty = Some(pty);
                self.child = Some(child);
            },
            Err(err) => {
                tracing::warn!(session = %self.handle, "failed to start {}: {}", self.config.executable, err);
                self.cleanup(SPAWN_FAILURE_EXIT_CODE);
                self.notify(|cb, session| cb.on_session_finished(session));
                let message = format!("Failed to start {}: {}", self.config.executable, err);
                self.append_and_notify(message + &exit_description(SPAWN_FAILURE_EXIT_CODE));
            },
        }
    }

    /// Spawn the child and its workers, leaving nothing behind on failure
    fn spawn_child(&self, size: WindowSize) -> Result<(Pty, Arc<ChildStatus>), PtyError> {
        let pty = Pty::spawn(
            &self.config.executable,
            &self.config.argv(),
            &self.config.env,
            self.config.cwd.as_deref(),
            size,
        )?;

        let started = worker::start(
            pty.pid(),
            pty.master(),
            Arc::clone(&self.process_to_terminal),
            Arc::clone(&self.terminal_to_process),
            self.messages_tx.clone(),
        );
        match started {
            Ok(child) => Ok((pty, child)),
            Err(e) => {
                // Whatever did start stops once the queues close
                let _ = pty::kill_group(pty.pid());
                let _ = pty::wait_for_exit(pty.pid());
                Err(e.into())
            },
        }
    }

    /// Send bytes to the child; dropped unless the session is running
    pub fn write(&self, data: &[u8]) {
        if !self.is_running() || data.is_empty() {
            return;
        }
        if self.terminal_to_process.write(data, false).is_err() {
            tracing::debug!(session = %self.handle, "write after output queue closed");
        }
    }

    /// Send one code point as UTF-8, optionally preceded by ESC
    pub fn write_code_point(&self, prepend_escape: bool, code_point: u32) -> Result<(), SessionError> {
        let encoded = encode_code_point(prepend_escape, code_point)?;
        self.write(encoded.as_bytes());
        Ok(())
    }

    /// Kill the child's process group if it is still running
    ///
    /// The exit is reported through the usual [`Message`] path; the session
    /// stays running until the consumer processes it.
    pub fn finish_if_running(&self) {
        if let Some(pid) = self.signal_target() {
            if let Err(e) = pty::kill_group(pid) {
                tracing::warn!(session = %self.handle, "failed to kill session: {}", e);
            }
        }
    }

    /// The child's pid while it is safe to signal: running and not yet
    /// reaped, so the id cannot have been reused
    fn signal_target(&self) -> Option<i32> {
        let pid = self.pid()?;
        match &self.child {
            Some(child) if child.is_reaped() => None,
            _ => Some(pid),
        }
    }

    /// Reset the emulator to its initial state
    pub fn reset(&mut self) {
        if let Some(emulator) = self.emulator.as_mut() {
            emulator.reset();
        }
        self.dispatch_events();
        self.notify(|cb, session| cb.on_text_changed(session));
    }

    /// Handle every message already waiting, without blocking
    ///
    /// Returns the number of messages handled.
    pub fn process_pending(&mut self) -> usize {
        let mut handled = 0;
        loop {
            match self.messages_rx.try_recv() {
                Ok(message) => {
                    self.handle_message(message);
                    handled += 1;
                },
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => return handled,
            }
        }
    }

    /// Wait up to `timeout` for a message, then handle everything pending
    pub fn wait_and_process(&mut self, timeout: Duration) -> usize {
        match self.messages_rx.recv_timeout(timeout) {
            Ok(message) => {
                self.handle_message(message);
                1 + self.process_pending()
            },
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => 0,
        }
    }

    /// Pump messages until the child exits
    ///
    /// Returns the exit code, or `None` if the session was never started.
    pub fn run_until_finished(&mut self) -> Option<i32> {
        loop {
            match self.state {
                SessionState::NotStarted => return None,
                SessionState::Finished { exit_code } => return Some(exit_code),
                SessionState::Running { .. } => {},
            }
            match self.messages_rx.recv() {
                Ok(message) => self.handle_message(message),
                // The session holds a sender, so this cannot happen
                Err(_) => return self.exit_status(),
            }
        }
    }

    fn handle_message(&mut self, message: Message) {
        match message {
            Message::NewInput => {
                if self.is_running() {
                    self.process_input();
                }
            },
            Message::ProcessExited(exit_code) => {
                if !self.is_running() {
                    return;
                }
                self.drain_final_output();
                self.cleanup(exit_code);
                self.notify(|cb, session| cb.on_session_finished(session));
                self.append_and_notify(exit_description(exit_code));
            },
        }
    }

    /// Apply whatever the reader still delivers after the child exited
    ///
    /// Runs until the reader is done. A reader that makes no progress for
    /// [`READER_GRACE`] is abandoned, since a background process may hold the
    /// pty open long after the child is gone.
    fn drain_final_output(&mut self) {
        let Some(child) = self.child.clone() else {
            return;
        };

        let mut last_progress = Instant::now();
        loop {
            // Checked before draining so nothing the reader queued is missed
            let reader_done = child.is_reader_done();
            if self.process_input() > 0 {
                last_progress = Instant::now();
            }
            if reader_done {
                return;
            }
            if last_progress.elapsed() >= READER_GRACE {
                tracing::debug!(session = %self.handle, "reader idle after exit, not waiting further");
                return;
            }
            thread::sleep(DRAIN_POLL_INTERVAL);
        }
    }

    /// Apply queued process output, answer the child, tell the host
    ///
    /// Returns the number of bytes applied.
    fn process_input(&mut self) -> usize {
        let Some(emulator) = self.emulator.as_mut() else {
            return 0;
        };

        let mut buf = [0u8; READ_BUFFER_SIZE];
        let mut total = 0;
        while let Ok(n) = self.process_to_terminal.read(&mut buf, false) {
            if n == 0 {
                break;
            }
            emulator.append(&buf[..n]);
            total += n;
        }
        if total == 0 {
            return 0;
        }

        let responses = emulator.take_responses();
        self.write(&responses);

        self.dispatch_events();
        self.notify(|cb, session| cb.on_text_changed(session));
        total
    }

    fn dispatch_events(&mut self) {
        let events = match self.emulator.as_mut() {
            Some(emulator) => emulator.take_events(),
            None => return,
        };

        for event in events {
            match event {
                TerminalEvent::TitleChanged { .. } => {
                    self.notify(|cb, session| cb.on_title_changed(session));
                },
                TerminalEvent::Bell => self.notify(|cb, session| cb.on_bell(session)),
                TerminalEvent::ClipboardText(text) => {
                    self.notify(|cb, session| cb.on_clipboard_text(session, &text));
                },
                TerminalEvent::ColorsChanged => {
                    self.notify(|cb, session| cb.on_colors_changed(session));
                },
            }
        }
    }

    /// Feed text to the emulator outside the pty path
    fn append_and_notify(&mut self, text: String) {
        if let Some(emulator) = self.emulator.as_mut() {
            emulator.append(text.as_bytes());
            // Replies to injected text have nowhere to go
            emulator.take_responses();
        }
        self.dispatch_events();
        self.notify(|cb, session| cb.on_text_changed(session));
    }

    /// Finished, then close the queues, then release the descriptor
    fn cleanup(&mut self, exit_code: i32) {
        self.state = SessionState::Finished { exit_code };
        self.process_to_terminal.close();
        self.terminal_to_process.close();
        self.pty = None;
        self.child = None;
        tracing::info!(session = %self.handle, exit_code, "session finished");
    }

    fn notify(&mut self, f: impl FnOnce(&mut dyn SessionCallback, &Session)) {
        let mut callback = std::mem::replace(&mut self.callback, Box::new(()));
        f(callback.as_mut(), self);
        self.callback = callback;
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.process_to_terminal.close();
        self.terminal_to_process.close();
        if let Some(pid) = self.signal_target() {
            if let Err(e) = pty::kill_group(pid) {
                tracing::debug!(session = %self.handle, "kill on drop failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Default)]
    struct Recorder {
        events: Rc<RefCell<Vec<String>>>,
    }

    impl SessionCallback for Recorder {
        fn on_text_changed(&mut self, _session: &Session) {
            self.events.borrow_mut().push("text".into());
        }

        fn on_session_finished(&mut self, session: &Session) {
            self.events
                .borrow_mut()
                .push(format!("finished:{:?}", session.exit_status()));
        }
    }

    #[test]
    fn test_new_session_is_not_started() {
        let session = Session::new(SessionConfig::default(), Box::new(()));
        assert_eq!(session.state(), SessionState::NotStarted);
        assert_eq!(session.pid(), None);
        assert_eq!(session.exit_status(), None);
        assert!(session.emulator().is_none());
        assert_eq!(session.title(), "");
    }

    #[test]
    fn test_handles_are_unique() {
        let a = Session::new(SessionConfig::default(), Box::new(()));
        let b = Session::new(SessionConfig::default(), Box::new(()));
        assert_ne!(a.handle(), b.handle());
        assert_eq!(a.handle().as_str().len(), 36);
    }

    #[test]
    fn test_name_is_host_controlled() {
        let mut session = Session::new(SessionConfig::default(), Box::new(()));
        assert_eq!(session.name(), None);
        session.set_name("build");
        assert_eq!(session.name(), Some("build"));
    }

    #[test]
    fn test_write_before_start_is_dropped() {
        let session = Session::new(SessionConfig::default(), Box::new(()));
        session.write(b"ignored");
        assert!(session.terminal_to_process.is_empty());
        assert!(session.write_code_point(false, 'a' as u32).is_ok());
        assert!(session.terminal_to_process.is_empty());
    }

    #[test]
    fn test_invalid_code_point_is_rejected() {
        let session = Session::new(SessionConfig::default(), Box::new(()));
        let err = session.write_code_point(true, 0xD800).unwrap_err();
        assert!(matches!(err, SessionError::InvalidCodePoint(InvalidCodePoint(0xD800))));
    }

    #[test]
    fn test_spawn_failure_finishes_immediately() {
        let events = Rc::new(RefCell::new(Vec::new()));
        let recorder = Recorder {
            events: Rc::clone(&events),
        };
        let mut session = Session::new(SessionConfig::new("/nonexistent/program"), Box::new(recorder));

        session.update_size(120, 5).unwrap();

        assert_eq!(session.state(), SessionState::Finished { exit_code: 1 });
        assert!(session.terminal_to_process.is_closed());
        assert_eq!(*events.borrow(), vec!["finished:Some(1)", "text"]);

        let text = session.emulator().unwrap().screen().transcript_text();
        assert!(text.contains("Failed to start /nonexistent/program"), "{text}");
        assert!(text.contains("[Process completed (code 1) - press Enter]"), "{text}");

        // Nothing left to do
        session.finish_if_running();
        assert_eq!(session.process_pending(), 0);
        assert_eq!(session.run_until_finished(), Some(1));
    }

    #[test]
    fn test_reaped_child_is_not_signalled() {
        let mut session = Session::new(SessionConfig::new("/bin/true"), Box::new(()));
        session.update_size(80, 24).unwrap();
        let pid = session.pid().unwrap();
        assert_eq!(session.signal_target(), Some(pid));

        // The waiter reaps on its own; the state only changes once the
        // consumer sees the exit message
        let child = Arc::clone(session.child.as_ref().unwrap());
        let deadline = Instant::now() + Duration::from_secs(5);
        while !child.is_reaped() {
            assert!(Instant::now() < deadline, "child was never reaped");
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(session.state(), SessionState::Running { pid });
        assert_eq!(session.signal_target(), None);

        // Nothing is sent, and the real exit code is still reported
        session.finish_if_running();
        assert_eq!(session.run_until_finished(), Some(0));
        assert!(session.child.is_none());
    }

    #[test]
    fn test_run_until_finished_without_start() {
        let mut session = Session::new(SessionConfig::default(), Box::new(()));
        assert_eq!(session.run_until_finished(), None);
    }
}
