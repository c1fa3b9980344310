//! Correlation table for requests that are waiting on the host.

use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;

use crate::envelope::RequestId;
use crate::error::BridgeError;

pub type Completion = oneshot::Sender<Result<Value, BridgeError>>;

#[derive(Debug)]
pub enum PendingKind {
    Handshake,
    /// Translated widget request; answered with `ui-message-response`.
    Widget { message_id: String },
    /// Request issued through `WidgetBridge::request`.
    Embedder { completion: Completion },
}

#[derive(Debug)]
pub struct PendingEntry {
    pub method: String,
    pub kind: PendingKind,
    timer: Option<AbortHandle>,
}

impl PendingEntry {
    pub fn new(method: impl Into<String>, kind: PendingKind) -> Self {
        Self {
            method: method.into(),
            kind,
            timer: None,
        }
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

/// Pending requests keyed by bridge-issued id.
///
/// Every entry owns its timeout timer. Taking an entry out of the ledger,
/// for any reason, aborts that timer.
#[derive(Debug)]
pub struct Ledger {
    next_id: i64,
    entries: HashMap<RequestId, PendingEntry>,
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new()
    }
}

impl Ledger {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            entries: HashMap::new(),
        }
    }

    /// Next request id; ids are never handed out twice.
    pub fn allocate(&mut self) -> RequestId {
        let id = RequestId::Integer(self.next_id);
        self.next_id += 1;
        id
    }

    pub fn insert(&mut self, id: RequestId, entry: PendingEntry) {
        if let Some(mut replaced) = self.entries.insert(id.clone(), entry) {
            tracing::warn!(%id, "Pending request id reused; dropping previous entry");
            replaced.cancel_timer();
        }
    }

    /// Attaches the timer for `id`. A timer for an entry that is already gone
    /// is aborted straight away.
    pub fn arm(&mut self, id: &RequestId, timer: AbortHandle) {
        match self.entries.get_mut(id) {
            Some(entry) => {
                entry.cancel_timer();
                entry.timer = Some(timer);
            }
            None => timer.abort(),
        }
    }

    /// Removes the entry for a response or timeout, cancelling its timer.
    pub fn take(&mut self, id: &RequestId) -> Option<PendingEntry> {
        let mut entry = self.entries.remove(id)?;
        entry.cancel_timer();
        Some(entry)
    }

    /// Removes every entry, timers cancelled, in id order.
    pub fn drain(&mut self) -> Vec<(RequestId, PendingEntry)> {
        let mut drained: Vec<_> = self
            .entries
            .drain()
            .map(|(id, mut entry)| {
                entry.cancel_timer();
                (id, entry)
            })
            .collect();
        drained.sort_by_key(|(id, _)| match id {
            RequestId::Integer(value) => *value,
            RequestId::String(_) => i64::MAX,
        });
        drained
    }

    #[cfg(test)]
    pub fn contains(&self, id: &RequestId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn widget(message_id: &str) -> PendingEntry {
        PendingEntry::new(
            "tools/call",
            PendingKind::Widget {
                message_id: message_id.to_string(),
            },
        )
    }

    fn sleeper() -> tokio::task::JoinHandle<()> {
        tokio::spawn(tokio::time::sleep(Duration::from_secs(3600)))
    }

    #[test]
    fn ids_are_monotonic_and_unique() {
        let mut ledger = Ledger::new();
        let ids: Vec<_> = (0..4).map(|_| ledger.allocate()).collect();
        assert_eq!(
            ids,
            vec![
                RequestId::Integer(1),
                RequestId::Integer(2),
                RequestId::Integer(3),
                RequestId::Integer(4),
            ]
        );
    }

    #[tokio::test]
    async fn take_removes_entry_and_aborts_timer() {
        let mut ledger = Ledger::new();
        let id = ledger.allocate();
        ledger.insert(id.clone(), widget("m1"));
        let timer = sleeper();
        ledger.arm(&id, timer.abort_handle());

        let entry = ledger.take(&id);
        assert!(matches!(
            entry.map(|entry| entry.kind),
            Some(PendingKind::Widget { message_id }) if message_id == "m1"
        ));
        assert!(!ledger.contains(&id));
        assert!(timer.await.is_err_and(|err| err.is_cancelled()));

        assert!(ledger.take(&id).is_none());
    }

    #[tokio::test]
    async fn arming_a_missing_entry_aborts_the_timer() {
        let mut ledger = Ledger::new();
        let timer = sleeper();
        ledger.arm(&RequestId::Integer(9), timer.abort_handle());
        assert!(timer.await.is_err_and(|err| err.is_cancelled()));
    }

    #[tokio::test]
    async fn drain_empties_in_id_order() {
        let mut ledger = Ledger::new();
        let timers: Vec<_> = ["a", "b", "c"]
            .iter()
            .map(|message_id| {
                let id = ledger.allocate();
                ledger.insert(id.clone(), widget(message_id));
                let timer = sleeper();
                ledger.arm(&id, timer.abort_handle());
                timer
            })
            .collect();

        let drained = ledger.drain();
        assert!(ledger.is_empty());
        let ids: Vec<_> = drained.iter().map(|(id, _)| id.clone()).collect();
        assert_eq!(
            ids,
            vec![
                RequestId::Integer(1),
                RequestId::Integer(2),
                RequestId::Integer(3),
            ]
        );
        for timer in timers {
            assert!(timer.await.is_err_and(|err| err.is_cancelled()));
        }
    }
}
