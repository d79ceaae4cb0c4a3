//! Worker threads
//!
//! Three threads serve each running session:
//! - the reader copies pty output into the process-to-terminal queue
//! - the writer copies the terminal-to-process queue into the pty
//! - the waiter reaps the child and reports its exit status
//!
//! Workers never touch session state. They talk to the consumer through the
//! queues and a message channel, and stop when a queue is closed or the pty
//! reports EOF or an error.

use std::fs::File;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::io::ByteQueue;
use crate::pty::wait_for_exit;

/// Size of the reader's pty buffer
pub const READ_BUFFER_SIZE: usize = 4096;

/// How long the reader may go without progress after the child exits
/// before its remaining output is abandoned
pub const READER_GRACE: Duration = Duration::from_millis(500);

/// Progress flags shared by the workers of one child and the consumer
#[derive(Debug, Default)]
pub(crate) struct ChildStatus {
    reaped: AtomicBool,
    reader_done: AtomicBool,
}

impl ChildStatus {
    /// The waiter has collected the exit status; the pid may be reused
    pub(crate) fn is_reaped(&self) -> bool {
        self.reaped.load(Ordering::Acquire)
    }

    /// The reader has returned; everything it read is in the queue
    pub(crate) fn is_reader_done(&self) -> bool {
        self.reader_done.load(Ordering::Acquire)
    }
}

/// Worker to consumer notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Message {
    /// Bytes were added to the process-to-terminal queue
    NewInput,
    /// The child exited with this code (negated signal number if killed)
    ProcessExited(i32),
}

/// Copy everything `source` produces into `queue`
///
/// `notify` runs after each chunk and returns false once nobody is
/// listening. Stops on EOF, read error, closed queue or a false `notify`.
pub(crate) fn pump_input<R: Read>(mut source: R, queue: &ByteQueue, mut notify: impl FnMut() -> bool) {
    let mut buf = [0u8; READ_BUFFER_SIZE];
    loop {
        let n = match source.read(&mut buf) {
            Ok(0) => {
                tracing::debug!("pty reached EOF");
                return;
            },
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                // EIO once the slave side is gone
                tracing::debug!("pty read ended: {}", e);
                return;
            },
        };

        if queue.write(&buf[..n], false).is_err() {
            tracing::debug!("input queue closed");
            return;
        }
        if !notify() {
            return;
        }
    }
}

/// Copy everything written to `queue` into `sink` until the queue closes
pub(crate) fn pump_output<W: Write>(queue: &ByteQueue, mut sink: W) {
    let mut buf = [0u8; READ_BUFFER_SIZE];
    loop {
        let n = match queue.read(&mut buf, true) {
            Ok(n) => n,
            Err(_) => {
                tracing::debug!("output queue closed");
                return;
            },
        };

        if let Err(e) = sink.write_all(&buf[..n]).and_then(|()| sink.flush()) {
            tracing::debug!("pty write ended: {}", e);
            return;
        }
    }
}

/// Start the reader, writer and waiter for child `pid`
///
/// `input` carries process output to the emulator, `output` carries host
/// input to the process. Each worker gets its own duplicate of the master.
pub(crate) fn start(
    pid: i32,
    master: &File,
    input: Arc<ByteQueue>,
    output: Arc<ByteQueue>,
    messages: Sender<Message>,
) -> io::Result<Arc<ChildStatus>> {
    let status = Arc::new(ChildStatus::default());
    let reader_pty = master.try_clone()?;
    let writer_pty = master.try_clone()?;

    // Disconnects when the reader returns
    let (reader_done_tx, reader_done_rx) = mpsc::channel::<()>();

    let reader_messages = messages.clone();
    let reader_status = Arc::clone(&status);
    thread::Builder::new()
        .name(format!("TermSessionInputReader[pid={pid}]"))
        .spawn(move || {
            let _done = reader_done_tx;
            pump_input(reader_pty, &input, || {
                reader_messages.send(Message::NewInput).is_ok()
            });
            reader_status.reader_done.store(true, Ordering::Release);
        })?;

    thread::Builder::new()
        .name(format!("TermSessionOutputWriter[pid={pid}]"))
        .spawn(move || pump_output(&output, writer_pty))?;

    let waiter_status = Arc::clone(&status);
    thread::Builder::new()
        .name(format!("TermSessionWaiter[pid={pid}]"))
        .spawn(move || {
            let exit_code = match wait_for_exit(pid) {
                Ok(code) => code,
                Err(e) => {
                    tracing::warn!(pid, "failed to wait for child: {}", e);
                    1
                },
            };
            // Either way the pid is no longer ours to signal
            waiter_status.reaped.store(true, Ordering::Release);
            tracing::info!(pid, exit_code, "child exited");

            // Give the reader a head start; the consumer drains the rest
            let _ = reader_done_rx.recv_timeout(READER_GRACE);
            let _ = messages.send(Message::ProcessExited(exit_code));
        })?;

    Ok(status)
}
