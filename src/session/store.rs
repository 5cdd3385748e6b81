use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_string(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Whether the gateway may deliver replies for a session without asking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SendPolicy {
    Allow,
    Auto,
    Deny,
}

/// One session-store record. Field names match the store file on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionEntry {
    pub session_id: SessionId,
    pub updated_at: String,
    pub system_sent: bool,
    pub aborted_last_run: bool,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub label: Option<String>,
    pub origin: Option<String>,
    pub last_channel: Option<String>,
    pub last_to: Option<String>,
    pub send_policy: Option<SendPolicy>,
    pub context_tokens: u32,
    pub model: Option<String>,
    pub model_provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_file: Option<PathBuf>,
}

impl Default for SessionEntry {
    fn default() -> Self {
        Self {
            session_id: SessionId::new(),
            updated_at: String::new(),
            system_sent: false,
            aborted_last_run: false,
            input_tokens: 0,
            output_tokens: 0,
            total_tokens: 0,
            label: None,
            origin: None,
            last_channel: None,
            last_to: None,
            send_policy: None,
            context_tokens: 0,
            model: None,
            model_provider: None,
            session_file: None,
        }
    }
}

/// Session store shared across all channels: one JSON document mapping
/// session keys to entries.
///
/// Every mutation goes through [`SessionStore::update`], a serialized
/// read-modify-write; concurrent updates queue on the store lock rather than
/// clobbering each other's writes.
pub struct SessionStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl SessionStore {
    pub fn new(workspace_dir: &Path) -> Result<Self> {
        fs::create_dir_all(workspace_dir).with_context(|| {
            format!(
                "Failed to create session store directory: {}",
                workspace_dir.display()
            )
        })?;
        Ok(Self {
            path: workspace_dir.join("sessions.json"),
            lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read-modify-write under the store lock. The closure sees the current
    /// map and may mutate it freely; the result is persisted atomically
    /// (temp file + rename) before the lock is released.
    pub fn update<T>(
        &self,
        f: impl FnOnce(&mut HashMap<String, SessionEntry>) -> T,
    ) -> Result<T> {
        let _guard = self.lock.lock();
        let mut map = self.load_unlocked()?;
        let out = f(&mut map);
        self.save_unlocked(&map)?;
        Ok(out)
    }

    /// Snapshot of the store contents.
    pub fn load(&self) -> Result<HashMap<String, SessionEntry>> {
        let _guard = self.lock.lock();
        self.load_unlocked()
    }

    fn load_unlocked(&self) -> Result<HashMap<String, SessionEntry>> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }
        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read session store: {}", self.path.display()))?;
        if raw.trim().is_empty() {
            return Ok(HashMap::new());
        }
        serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse session store: {}", self.path.display()))
    }

    fn save_unlocked(&self, map: &HashMap<String, SessionEntry>) -> Result<()> {
        let tmp = self.path.with_extension("json.tmp");
        let raw = serde_json::to_string_pretty(map).context("Failed to encode session store")?;
        fs::write(&tmp, raw)
            .with_context(|| format!("Failed to write session store: {}", tmp.display()))?;
        fs::rename(&tmp, &self.path).with_context(|| {
            format!("Failed to replace session store: {}", self.path.display())
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path()).unwrap();

        let session_id = store
            .update(|map| {
                let entry = SessionEntry {
                    send_policy: Some(SendPolicy::Allow),
                    label: Some("wallet-abc".into()),
                    ..SessionEntry::default()
                };
                let id = entry.session_id.clone();
                map.insert("direct:spixi:wallet-abc".into(), entry);
                id
            })
            .unwrap();

        let reopened = SessionStore::new(dir.path()).unwrap();
        let map = reopened.load().unwrap();
        let entry = map.get("direct:spixi:wallet-abc").unwrap();
        assert_eq!(entry.session_id, session_id);
        assert_eq!(entry.send_policy, Some(SendPolicy::Allow));
        assert_eq!(entry.label.as_deref(), Some("wallet-abc"));
    }

    #[test]
    fn missing_file_loads_as_empty_map() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path()).unwrap();
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn entry_roundtrips_with_camel_case_field_names() {
        let entry = SessionEntry {
            send_policy: Some(SendPolicy::Auto),
            last_channel: Some("spixi".into()),
            ..SessionEntry::default()
        };
        let raw = serde_json::to_string(&entry).unwrap();
        assert!(raw.contains("\"sendPolicy\":\"auto\""));
        assert!(raw.contains("\"lastChannel\":\"spixi\""));
        assert!(raw.contains("\"sessionId\""));
        // sessionFile is omitted when unset
        assert!(!raw.contains("sessionFile"));

        let back: SessionEntry = serde_json::from_str(&raw).unwrap();
        assert_eq!(back.send_policy, Some(SendPolicy::Auto));
    }

    #[test]
    fn update_result_propagates_from_closure() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path()).unwrap();
        let count = store.update(|map| map.len()).unwrap();
        assert_eq!(count, 0);
    }
}
