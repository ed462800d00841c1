//! Broadcaster (C4): fans out MPEG-TS bytes from the current encoder handle
//! to a dynamic set of client sinks with bounded, drop-consumer queues.
//!
//! The pump never blocks on a slow sink: `try_send` either succeeds or the
//! sink is evicted. No sink ever holds the structural lock across I/O - the
//! lock protects only set membership.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use tokio::io::AsyncReadExt;
use tokio::process::ChildStdout;
use tokio::sync::mpsc;

use crate::protocol_constants::{PUMP_READ_CHUNK_SIZE, SINK_QUEUE_CAPACITY};

/// Opaque identifier for a registered sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SinkId(u64);

/// The client-facing half of a sink: receives chunks until evicted.
pub struct SinkHandle {
    pub id: SinkId,
    pub rx: mpsc::Receiver<Bytes>,
}

enum PumpCommand {
    Attach(ChildStdout),
    Detach,
}

/// Owns the client-sink set and the pump that feeds it.
pub struct Broadcaster {
    sinks: RwLock<HashMap<SinkId, mpsc::Sender<Bytes>>>,
    next_id: AtomicU64,
    attach_tx: mpsc::UnboundedSender<PumpCommand>,
}

impl Broadcaster {
    /// Creates a broadcaster and spawns its background pump task.
    pub fn new() -> Arc<Self> {
        let (attach_tx, attach_rx) = mpsc::unbounded_channel();
        let broadcaster = Arc::new(Self {
            sinks: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            attach_tx,
        });
        tokio::spawn(pump_loop(Arc::clone(&broadcaster), attach_rx));
        broadcaster
    }

    /// Switches the pump's source. Existing client queues are not drained or
    /// flushed; clients continue from the next byte produced by `stdout`.
    pub fn attach(&self, stdout: ChildStdout) {
        let _ = self.attach_tx.send(PumpCommand::Attach(stdout));
    }

    /// Stops the pump from reading; sinks remain registered but idle until a
    /// new handle is attached or they are explicitly unsubscribed.
    pub fn detach(&self) {
        let _ = self.attach_tx.send(PumpCommand::Detach);
    }

    /// Registers a new sink and returns its receiving half.
    pub fn subscribe(&self) -> SinkHandle {
        let id = SinkId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(SINK_QUEUE_CAPACITY);
        self.sinks.write().insert(id, tx);
        SinkHandle { id, rx }
    }

    /// Deregisters a sink. Safe to call more than once for the same id.
    pub fn unsubscribe(&self, id: SinkId) {
        self.sinks.write().remove(&id);
    }

    /// Number of currently registered sinks.
    pub fn count(&self) -> usize {
        self.sinks.read().len()
    }

    /// Distributes one chunk to every registered sink, evicting any sink
    /// whose queue is full or whose receiver has been dropped. Iterates a
    /// snapshot so registration/deregistration never races the distribution.
    fn distribute(&self, chunk: Bytes) {
        let snapshot: Vec<(SinkId, mpsc::Sender<Bytes>)> = self
            .sinks
            .read()
            .iter()
            .map(|(id, tx)| (*id, tx.clone()))
            .collect();

        let mut dead = Vec::new();
        for (id, tx) in snapshot {
            if tx.try_send(chunk.clone()).is_err() {
                dead.push(id);
            }
        }

        if !dead.is_empty() {
            let mut sinks = self.sinks.write();
            for id in dead {
                sinks.remove(&id);
            }
        }
    }
}

async fn pump_loop(broadcaster: Arc<Broadcaster>, mut attach_rx: mpsc::UnboundedReceiver<PumpCommand>) {
    let mut buf = vec![0u8; PUMP_READ_CHUNK_SIZE];
    let mut current: Option<ChildStdout> = None;

    loop {
        tokio::select! {
            biased;

            cmd = attach_rx.recv() => {
                match cmd {
                    Some(PumpCommand::Attach(stdout)) => current = Some(stdout),
                    Some(PumpCommand::Detach) => current = None,
                    None => return, // broadcaster dropped
                }
            }

            result = read_chunk(&mut current, &mut buf), if current.is_some() => {
                match result {
                    Some(Ok(n)) if n > 0 => {
                        broadcaster.distribute(Bytes::copy_from_slice(&buf[..n]));
                    }
                    _ => {
                        // EOF or read error: the handle is done: stop reading
                        // from it and wait for the supervisor to attach a
                        // replacement (or detach explicitly).
                        current = None;
                    }
                }
            }

            else => {
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            }
        }
    }
}

async fn read_chunk(current: &mut Option<ChildStdout>, buf: &mut [u8]) -> Option<std::io::Result<usize>> {
    let stdout = current.as_mut()?;
    Some(stdout.read(buf).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribe_and_unsubscribe_track_count() {
        let broadcaster = Broadcaster::new();
        assert_eq!(broadcaster.count(), 0);
        let sink = broadcaster.subscribe();
        assert_eq!(broadcaster.count(), 1);
        broadcaster.unsubscribe(sink.id);
        assert_eq!(broadcaster.count(), 0);
    }

    #[tokio::test]
    async fn unsubscribe_is_idempotent() {
        let broadcaster = Broadcaster::new();
        let sink = broadcaster.subscribe();
        broadcaster.unsubscribe(sink.id);
        broadcaster.unsubscribe(sink.id);
        assert_eq!(broadcaster.count(), 0);
    }

    #[tokio::test]
    async fn distribute_delivers_to_all_subscribed_sinks() {
        let broadcaster = Broadcaster::new();
        let mut a = broadcaster.subscribe();
        let mut b = broadcaster.subscribe();
        broadcaster.distribute(Bytes::from_static(b"hello"));
        assert_eq!(a.rx.recv().await.unwrap(), Bytes::from_static(b"hello"));
        assert_eq!(b.rx.recv().await.unwrap(), Bytes::from_static(b"hello"));
    }

    #[tokio::test]
    async fn full_queue_evicts_only_the_stalled_sink() {
        let broadcaster = Broadcaster::new();
        let stalled = broadcaster.subscribe(); // never drained
        let mut healthy = broadcaster.subscribe();

        for i in 0..SINK_QUEUE_CAPACITY + 5 {
            broadcaster.distribute(Bytes::from(vec![i as u8]));
            // Keep the healthy sink's queue from filling by draining it too.
            let _ = healthy.rx.try_recv();
        }

        assert_eq!(broadcaster.count(), 1, "stalled sink must be evicted, healthy sink must remain");
        drop(stalled);
    }

    #[tokio::test]
    async fn attach_switches_source_without_flushing_existing_queues() {
        let broadcaster = Broadcaster::new();
        let mut sink = broadcaster.subscribe();
        broadcaster.distribute(Bytes::from_static(b"from-old"));
        // Simulate a layout switch: attach a new (here: absent) source.
        broadcaster.detach();
        assert_eq!(sink.rx.recv().await.unwrap(), Bytes::from_static(b"from-old"));
    }
}
