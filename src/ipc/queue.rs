//! Line-oriented message transport.
//!
//! Workers are child processes of the driver: the `driver→worker` queue is
//! the child's stdin and the shared `worker→driver` queue is the set of
//! child stdouts, fanned into one in-process channel by forwarder threads.
//! Each message is one JSON line. FIFO holds per (sender, queue); there is
//! no global ordering across workers.

use std::io::{BufRead, Write};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError, bounded};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{IndexError, IndexResult};
use crate::types::WorkerId;

/// Depth of the in-process buffer backing each receive queue.
pub const QUEUE_CAPACITY: usize = 64;

/// Outcome of a receive-with-timeout.
#[derive(Debug, PartialEq, Eq)]
pub enum Received<T> {
    Ok(T),
    Timeout,
    /// The peer sent a line that does not decode as `T`.
    Malformed(String),
    /// The peer hung up (EOF) or asked us to stop.
    Shutdown,
}

/// Sending half of a queue, writing JSON lines to the peer.
pub struct SendQueue<W: Write> {
    name: String,
    writer: W,
}

impl<W: Write> SendQueue<W> {
    pub fn new(name: String, writer: W) -> Self {
        Self { name, writer }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn send<T: Serialize>(&mut self, message: &T) -> IndexResult<()> {
        let line = serde_json::to_string(message).map_err(|source| IndexError::QueueEncode {
            queue: self.name.clone(),
            source,
        })?;
        debug_assert!(!line.contains('\n'));
        writeln!(self.writer, "{line}").map_err(|source| IndexError::QueueSend {
            queue: self.name.clone(),
            source,
        })?;
        self.writer.flush().map_err(|source| IndexError::QueueSend {
            queue: self.name.clone(),
            source,
        })
    }
}

/// Receiving half of a queue.
///
/// A forwarder thread owns the blocking reader and pushes raw lines into a
/// bounded channel; `receive` decodes with a timeout. The bounded buffer
/// gives send its `QueueFull` failure mode: the forwarder surfaces
/// saturation instead of buffering without limit.
pub struct LineReceiver {
    name: String,
    rx: Receiver<String>,
}

impl LineReceiver {
    /// Spawn the forwarder thread over `reader`. EOF closes the channel,
    /// which `receive` reports as `Shutdown`.
    pub fn start<R: BufRead + Send + 'static>(name: String, reader: R) -> Self {
        let (tx, rx) = bounded::<String>(QUEUE_CAPACITY);
        let queue = name.clone();
        thread::Builder::new()
            .name(format!("recv-{name}"))
            .spawn(move || forward_lines(&queue, reader, &tx))
            .expect("spawning forwarder thread");
        Self { name, rx }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Block up to `timeout` for the next message.
    pub fn receive<T: DeserializeOwned>(&self, timeout: Duration) -> Received<T> {
        match self.rx.recv_timeout(timeout) {
            Ok(line) => match serde_json::from_str::<T>(&line) {
                Ok(message) => Received::Ok(message),
                Err(_) => Received::Malformed(line),
            },
            Err(RecvTimeoutError::Timeout) => Received::Timeout,
            Err(RecvTimeoutError::Disconnected) => Received::Shutdown,
        }
    }
}

fn forward_lines<R: BufRead>(queue: &str, reader: R, tx: &Sender<String>) {
    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                debug!(queue, %err, "read error, closing queue");
                return;
            }
        };
        match tx.try_send(line) {
            Ok(()) => {}
            Err(TrySendError::Full(line)) => {
                // Saturated consumer: fall back to a blocking hand-off so
                // FIFO order survives, and surface the condition.
                debug!(queue, "queue full, applying backpressure");
                if tx.send(line).is_err() {
                    return;
                }
            }
            Err(TrySendError::Disconnected(_)) => return,
        }
    }
    debug!(queue, "peer closed the queue");
}

/// Events from all workers, fanned into the driver's single receive loop.
#[derive(Debug)]
pub enum WorkerEvent {
    Line { worker_id: WorkerId, line: String },
    Eof { worker_id: WorkerId },
}

/// Spawn a forwarder thread turning one worker's stdout into tagged events
/// on the driver's shared channel.
pub fn forward_worker_output<R: BufRead + Send + 'static>(
    worker_id: WorkerId,
    reader: R,
    tx: Sender<WorkerEvent>,
) {
    thread::Builder::new()
        .name(format!("worker-{worker_id}-recv"))
        .spawn(move || {
            for line in reader.lines() {
                let event = match line {
                    Ok(line) => WorkerEvent::Line { worker_id, line },
                    Err(_) => break,
                };
                if tx.send(event).is_err() {
                    return;
                }
            }
            let _ = tx.send(WorkerEvent::Eof { worker_id });
        })
        .expect("spawning worker forwarder thread");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::IpcTestMessage;
    use std::io::Cursor;

    #[test]
    fn test_send_then_receive_round_trips() {
        let mut buffer = Vec::new();
        {
            let mut queue = SendQueue::new("test-send".to_string(), &mut buffer);
            queue
                .send(&IpcTestMessage {
                    content: "payload ✓".to_string(),
                })
                .unwrap();
        }
        let receiver = LineReceiver::start("test-recv".to_string(), Cursor::new(buffer));
        match receiver.receive::<IpcTestMessage>(Duration::from_secs(1)) {
            Received::Ok(msg) => assert_eq!(msg.content, "payload ✓"),
            other => panic!("unexpected receive result: {other:?}"),
        }
    }

    #[test]
    fn test_receive_reports_malformed_payload() {
        let receiver = LineReceiver::start(
            "test-recv".to_string(),
            Cursor::new(b"this is not json\n".to_vec()),
        );
        match receiver.receive::<IpcTestMessage>(Duration::from_secs(1)) {
            Received::Malformed(payload) => assert_eq!(payload, "this is not json"),
            other => panic!("unexpected receive result: {other:?}"),
        }
    }

    #[test]
    fn test_receive_reports_shutdown_on_eof() {
        let receiver = LineReceiver::start("test-recv".to_string(), Cursor::new(Vec::new()));
        // Give the forwarder a moment to hit EOF and drop the sender.
        assert_eq!(
            receiver.receive::<IpcTestMessage>(Duration::from_secs(1)),
            Received::Shutdown
        );
    }

    #[test]
    fn test_receive_times_out_on_silence() {
        // A reader that blocks forever: a pipe-like pair is overkill, so
        // hold the channel open by keeping lines pending behind a slow
        // reader instead.
        struct Silent;
        impl std::io::Read for Silent {
            fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
                std::thread::sleep(Duration::from_secs(60));
                Ok(0)
            }
        }
        let receiver = LineReceiver::start(
            "test-recv".to_string(),
            std::io::BufReader::new(Silent),
        );
        assert_eq!(
            receiver.receive::<IpcTestMessage>(Duration::from_millis(50)),
            Received::Timeout
        );
    }

    #[test]
    fn test_fifo_order_per_sender() {
        let mut buffer = Vec::new();
        {
            let mut queue = SendQueue::new("test-send".to_string(), &mut buffer);
            for i in 0..10 {
                queue
                    .send(&IpcTestMessage {
                        content: i.to_string(),
                    })
                    .unwrap();
            }
        }
        let receiver = LineReceiver::start("test-recv".to_string(), Cursor::new(buffer));
        for i in 0..10 {
            match receiver.receive::<IpcTestMessage>(Duration::from_secs(1)) {
                Received::Ok(msg) => assert_eq!(msg.content, i.to_string()),
                other => panic!("unexpected receive result: {other:?}"),
            }
        }
    }
}
