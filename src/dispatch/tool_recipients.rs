use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

/// Idle eviction window for a run that never finalized.
pub const TOOL_EVENT_RECIPIENT_TTL: Duration = Duration::from_secs(10 * 60);
/// Grace window after finalization, long enough for tail events to reach the
/// viewers that watched the run.
pub const TOOL_EVENT_RECIPIENT_FINAL_GRACE: Duration = Duration::from_secs(30);

#[derive(Debug)]
struct RecipientEntry {
    conn_ids: HashSet<String>,
    updated_at: Instant,
    finalized_at: Option<Instant>,
}

/// Maps an agent run id to the UI connections entitled to its tool-telemetry
/// stream. Subscribers only accumulate; reclamation is time-based and lazy,
/// swept on every `add`/`get` rather than by a background task.
#[derive(Debug, Default)]
pub struct ToolEventRecipientRegistry {
    entries: Mutex<HashMap<String, RecipientEntry>>,
}

impl ToolEventRecipientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection's interest in a run. No-op when either id is
    /// empty.
    pub fn add(&self, run_id: &str, conn_id: &str) {
        self.add_at(run_id, conn_id, Instant::now());
    }

    /// Live connection set for a run, or `None` when absent or expired.
    /// A read counts as activity and refreshes the idle clock.
    pub fn get(&self, run_id: &str) -> Option<HashSet<String>> {
        self.get_at(run_id, Instant::now())
    }

    /// Stamp a run finalized, switching it to the short grace window.
    pub fn mark_final(&self, run_id: &str) {
        self.mark_final_at(run_id, Instant::now());
    }

    fn add_at(&self, run_id: &str, conn_id: &str, now: Instant) {
        if run_id.is_empty() || conn_id.is_empty() {
            return;
        }
        let mut entries = self.entries.lock();
        Self::sweep(&mut entries, now);
        let entry = entries
            .entry(run_id.to_string())
            .or_insert_with(|| RecipientEntry {
                conn_ids: HashSet::new(),
                updated_at: now,
                finalized_at: None,
            });
        entry.conn_ids.insert(conn_id.to_string());
        entry.updated_at = now;
    }

    fn get_at(&self, run_id: &str, now: Instant) -> Option<HashSet<String>> {
        let mut entries = self.entries.lock();
        Self::sweep(&mut entries, now);
        let entry = entries.get_mut(run_id)?;
        entry.updated_at = now;
        Some(entry.conn_ids.clone())
    }

    fn mark_final_at(&self, run_id: &str, now: Instant) {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(run_id) {
            entry.finalized_at = Some(now);
        }
    }

    fn sweep(entries: &mut HashMap<String, RecipientEntry>, now: Instant) {
        entries.retain(|_, entry| match entry.finalized_at {
            Some(finalized_at) => {
                now.duration_since(finalized_at) <= TOOL_EVENT_RECIPIENT_FINAL_GRACE
            }
            None => now.duration_since(entry.updated_at) <= TOOL_EVENT_RECIPIENT_TTL,
        });
    }
}
