use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

/// Correlates a run identifier as a UI client knows it with the session the
/// run belongs to. Immutable once inserted; removal and shift only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatRunEntry {
    pub session_key: String,
    pub client_run_id: String,
}

/// Per-run-key FIFO queues of pending chat-run correlation entries.
///
/// Chat runs started on the same engine run key finalize in start order;
/// `peek`/`shift` rely on that to match a finalizing run with its entry.
#[derive(Debug, Default)]
pub struct ChatRunRegistry {
    queues: Mutex<HashMap<String, VecDeque<ChatRunEntry>>>,
}

impl ChatRunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, run_key: &str, entry: ChatRunEntry) {
        let mut queues = self.queues.lock();
        queues.entry(run_key.to_string()).or_default().push_back(entry);
    }

    /// Head entry without removing it.
    pub fn peek(&self, run_key: &str) -> Option<ChatRunEntry> {
        let queues = self.queues.lock();
        queues.get(run_key).and_then(|q| q.front().cloned())
    }

    /// Pop the head entry; the queue itself is dropped once empty.
    pub fn shift(&self, run_key: &str) -> Option<ChatRunEntry> {
        let mut queues = self.queues.lock();
        let queue = queues.get_mut(run_key)?;
        let entry = queue.pop_front();
        if queue.is_empty() {
            queues.remove(run_key);
        }
        entry
    }

    /// Remove the entry matching `client_run_id` regardless of queue position.
    /// When `session_key` is given the entry must also match it.
    pub fn remove(
        &self,
        run_key: &str,
        client_run_id: &str,
        session_key: Option<&str>,
    ) -> Option<ChatRunEntry> {
        let mut queues = self.queues.lock();
        let queue = queues.get_mut(run_key)?;
        let index = queue.iter().position(|entry| {
            entry.client_run_id == client_run_id
                && session_key.map_or(true, |key| entry.session_key == key)
        })?;
        let removed = queue.remove(index);
        if queue.is_empty() {
            queues.remove(run_key);
        }
        removed
    }

    pub fn clear(&self) {
        self.queues.lock().clear();
    }

    #[cfg(test)]
    fn queue_len(&self, run_key: &str) -> Option<usize> {
        self.queues.lock().get(run_key).map(VecDeque::len)
    }
}

/// All in-memory chat-run bookkeeping: the correlation registry plus per-run
/// output buffers, delta-throttle stamps, and abort markers.
#[derive(Debug, Default)]
pub struct ChatRunState {
    pub registry: ChatRunRegistry,
    buffers: Mutex<HashMap<String, String>>,
    delta_sent_at: Mutex<HashMap<String, Instant>>,
    aborted: Mutex<HashMap<String, Instant>>,
}

impl ChatRunState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the buffered assistant text for a run. Deltas are cumulative,
    /// so this always overwrites; broadcast throttling is decided separately
    /// by [`ChatRunState::should_send_delta`].
    pub fn set_buffer(&self, client_run_id: &str, text: impl Into<String>) {
        self.buffers
            .lock()
            .insert(client_run_id.to_string(), text.into());
    }

    pub fn take_buffer(&self, client_run_id: &str) -> Option<String> {
        self.buffers.lock().remove(client_run_id)
    }

    /// Throttle gate: true when no delta was broadcast for this run yet, or
    /// the last one is at least `min_interval` old. Records `now` as the last
    /// broadcast time when allowing.
    pub fn should_send_delta(
        &self,
        client_run_id: &str,
        now: Instant,
        min_interval: Duration,
    ) -> bool {
        let mut sent_at = self.delta_sent_at.lock();
        match sent_at.get(client_run_id) {
            Some(last) if now.duration_since(*last) < min_interval => false,
            _ => {
                sent_at.insert(client_run_id.to_string(), now);
                true
            }
        }
    }

    /// Mark a run aborted so that its late completion events are swallowed
    /// instead of finalized.
    pub fn mark_aborted(&self, id: &str) {
        self.aborted.lock().insert(id.to_string(), Instant::now());
    }

    pub fn is_aborted(&self, client_run_id: &str, run_id: &str) -> bool {
        let aborted = self.aborted.lock();
        aborted.contains_key(client_run_id) || aborted.contains_key(run_id)
    }

    /// Drop every piece of per-run state for a finalized or aborted run.
    pub fn purge(&self, client_run_id: &str, run_id: &str) {
        self.buffers.lock().remove(client_run_id);
        self.delta_sent_at.lock().remove(client_run_id);
        let mut aborted = self.aborted.lock();
        aborted.remove(client_run_id);
        aborted.remove(run_id);
    }

    /// Full lifecycle reset.
    pub fn clear(&self) {
        self.registry.clear();
        self.buffers.lock().clear();
        self.delta_sent_at.lock().clear();
        self.aborted.lock().clear();
    }
}
