//! Ready-made [`HostChannel`] implementations.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::backend::{HostChannel, InboundListener, ListenerId};
use crate::error::{BridgeError, Result};

#[derive(Default)]
struct Listeners {
    entries: Mutex<Vec<(ListenerId, InboundListener)>>,
    next: AtomicU64,
}

impl Listeners {
    fn lock(&self) -> MutexGuard<'_, Vec<(ListenerId, InboundListener)>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn add(&self, listener: InboundListener) -> ListenerId {
        let id = ListenerId(self.next.fetch_add(1, Ordering::Relaxed) + 1);
        self.lock().push((id, listener));
        id
    }

    fn remove(&self, id: ListenerId) {
        self.lock().retain(|(existing, _)| *existing != id);
    }

    fn len(&self) -> usize {
        self.lock().len()
    }

    fn broadcast(&self, value: &Value) {
        let listeners: Vec<InboundListener> = self
            .lock()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener(value);
        }
    }
}

/// In-process channel: posted frames land in an unbounded receiver and the
/// host side injects frames with [`MemoryChannel::deliver`].
pub struct MemoryChannel {
    open: AtomicBool,
    listeners: Listeners,
    outbox: mpsc::UnboundedSender<Value>,
}

impl MemoryChannel {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Value>) {
        let (outbox, rx) = mpsc::unbounded_channel();
        let channel = Arc::new(Self {
            open: AtomicBool::new(true),
            listeners: Listeners::default(),
            outbox,
        });
        (channel, rx)
    }

    /// Hands a host frame to every subscriber, synchronously.
    pub fn deliver(&self, value: &Value) {
        if self.is_open() {
            self.listeners.broadcast(value);
        }
    }

    pub fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

impl HostChannel for MemoryChannel {
    fn post(&self, message: &Value) -> Result<()> {
        if !self.is_open() {
            return Err(BridgeError::Channel("channel closed".to_string()));
        }
        self.outbox
            .send(message.clone())
            .map_err(|_| BridgeError::Channel("receiver dropped".to_string()))
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn subscribe(&self, listener: InboundListener) -> ListenerId {
        self.listeners.add(listener)
    }

    fn unsubscribe(&self, id: ListenerId) {
        self.listeners.remove(id);
    }
}

type LineWriter = Box<dyn AsyncWrite + Send + Unpin>;
type LineReader = Box<dyn AsyncRead + Send + Unpin>;

/// Newline-delimited JSON over a byte stream (pipe, socket, stdio).
pub struct LineChannel {
    writer: mpsc::UnboundedSender<String>,
    listeners: Arc<Listeners>,
    open: Arc<AtomicBool>,
    reader_task: Option<JoinHandle<()>>,
    writer_task: Option<JoinHandle<()>>,
}

impl LineChannel {
    /// Starts the reader and writer tasks on the current tokio runtime.
    pub fn spawn(reader: LineReader, writer: LineWriter) -> Self {
        let listeners = Arc::new(Listeners::default());
        let open = Arc::new(AtomicBool::new(true));
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();

        let writer_open = open.clone();
        let writer_task = tokio::spawn(async move {
            let mut writer = writer;
            while let Some(line) = rx.recv().await {
                let written = async {
                    writer.write_all(line.as_bytes()).await?;
                    writer.write_all(b"\n").await?;
                    writer.flush().await
                }
                .await;
                if let Err(err) = written {
                    tracing::warn!(error = %err, "Host channel write failed");
                    writer_open.store(false, Ordering::SeqCst);
                    break;
                }
            }
        });

        let reader_listeners = listeners.clone();
        let reader_open = open.clone();
        let reader_task = tokio::spawn(async move {
            let mut lines = BufReader::new(reader).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                match serde_json::from_str::<Value>(trimmed) {
                    Ok(value) => reader_listeners.broadcast(&value),
                    Err(err) => {
                        tracing::warn!(error = %err, line = %trimmed, "Host channel JSON parse failed");
                    }
                }
            }
            tracing::debug!("Host channel closed");
            reader_open.store(false, Ordering::SeqCst);
        });

        Self {
            writer: tx,
            listeners,
            open,
            reader_task: Some(reader_task),
            writer_task: Some(writer_task),
        }
    }
}

impl HostChannel for LineChannel {
    fn post(&self, message: &Value) -> Result<()> {
        if !self.is_open() {
            return Err(BridgeError::Channel("channel closed".to_string()));
        }
        let payload = serde_json::to_string(message)?;
        self.writer
            .send(payload)
            .map_err(|_| BridgeError::Channel("writer stopped".to_string()))
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn subscribe(&self, listener: InboundListener) -> ListenerId {
        self.listeners.add(listener)
    }

    fn unsubscribe(&self, id: ListenerId) {
        self.listeners.remove(id);
    }
}

impl Drop for LineChannel {
    fn drop(&mut self) {
        for task in [self.reader_task.take(), self.writer_task.take()]
            .into_iter()
            .flatten()
        {
            task.abort();
        }
    }
}
