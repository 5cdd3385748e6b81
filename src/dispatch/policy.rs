use crate::config::{Config, ToolStreamVerbosity};
use crate::dispatch::events::DispatchPolicy;
use anyhow::Result;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};

type ConfigLoader = Box<dyn Fn() -> Result<Config> + Send + Sync>;

/// Config-backed [`DispatchPolicy`] owned by the gateway process.
///
/// Per-run and per-session verbosity overrides and heartbeat markers live
/// here; the global defaults are re-read through the config loader on demand.
/// A failing loader resolves to the conservative defaults: verbosity off,
/// heartbeat output hidden.
pub struct GatewayPolicy {
    load_config: ConfigLoader,
    run_verbosity: Mutex<HashMap<String, ToolStreamVerbosity>>,
    session_verbosity: Mutex<HashMap<String, ToolStreamVerbosity>>,
    heartbeat_runs: Mutex<HashSet<String>>,
    run_session_keys: Mutex<HashMap<String, String>>,
}

impl GatewayPolicy {
    pub fn new(load_config: ConfigLoader) -> Self {
        Self {
            load_config,
            run_verbosity: Mutex::new(HashMap::new()),
            session_verbosity: Mutex::new(HashMap::new()),
            heartbeat_runs: Mutex::new(HashSet::new()),
            run_session_keys: Mutex::new(HashMap::new()),
        }
    }

    /// Policy over a fixed config snapshot.
    pub fn from_config(config: Config) -> Self {
        Self::new(Box::new(move || Ok(config.clone())))
    }

    pub fn set_run_verbosity(&self, run_id: &str, verbosity: ToolStreamVerbosity) {
        self.run_verbosity
            .lock()
            .insert(run_id.to_string(), verbosity);
    }

    pub fn set_session_verbosity(&self, session_key: &str, verbosity: ToolStreamVerbosity) {
        self.session_verbosity
            .lock()
            .insert(session_key.to_string(), verbosity);
    }

    /// Mark a run as a background heartbeat run.
    pub fn register_heartbeat_run(&self, run_id: &str) {
        self.heartbeat_runs.lock().insert(run_id.to_string());
    }

    /// Remember the session key a bare run id belongs to, used as the
    /// correlation fallback.
    pub fn bind_run_session(&self, run_id: &str, session_key: &str) {
        self.run_session_keys
            .lock()
            .insert(run_id.to_string(), session_key.to_string());
    }
}

impl DispatchPolicy for GatewayPolicy {
    fn tool_stream_verbosity(
        &self,
        run_id: &str,
        session_key: Option<&str>,
    ) -> ToolStreamVerbosity {
        if let Some(v) = self.run_verbosity.lock().get(run_id) {
            return *v;
        }
        if let Some(key) = session_key {
            if let Some(v) = self.session_verbosity.lock().get(key) {
                return *v;
            }
        }
        (self.load_config)()
            .map(|config| config.tool_stream.default_verbosity)
            .unwrap_or(ToolStreamVerbosity::Off)
    }

    fn is_heartbeat_run(&self, run_id: &str) -> bool {
        self.heartbeat_runs.lock().contains(run_id)
    }

    fn show_heartbeat_on_broadcast(&self) -> bool {
        (self.load_config)()
            .map(|config| config.heartbeat.show_ok_on_broadcast)
            .unwrap_or(false)
    }

    fn resolve_session_key(&self, run_id: &str) -> Option<String> {
        self.run_session_keys.lock().get(run_id).cloned()
    }

    fn clear_run_context(&self, run_id: &str) {
        self.run_verbosity.lock().remove(run_id);
        self.heartbeat_runs.lock().remove(run_id);
        self.run_session_keys.lock().remove(run_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ToolStreamConfig;
    use anyhow::anyhow;

    fn policy_with_default(default_verbosity: ToolStreamVerbosity) -> GatewayPolicy {
        GatewayPolicy::from_config(Config {
            tool_stream: ToolStreamConfig { default_verbosity },
            ..Config::default()
        })
    }

    #[test]
    fn verbosity_precedence_run_over_session_over_config() {
        let policy = policy_with_default(ToolStreamVerbosity::Summary);
        assert_eq!(
            policy.tool_stream_verbosity("run-1", Some("sess")),
            ToolStreamVerbosity::Summary
        );

        policy.set_session_verbosity("sess", ToolStreamVerbosity::Full);
        assert_eq!(
            policy.tool_stream_verbosity("run-1", Some("sess")),
            ToolStreamVerbosity::Full
        );

        policy.set_run_verbosity("run-1", ToolStreamVerbosity::Off);
        assert_eq!(
            policy.tool_stream_verbosity("run-1", Some("sess")),
            ToolStreamVerbosity::Off
        );
    }

    #[test]
    fn loader_failure_defaults_to_off_and_hidden_heartbeats() {
        let policy = GatewayPolicy::new(Box::new(|| Err(anyhow!("config unavailable"))));
        assert_eq!(
            policy.tool_stream_verbosity("run-1", None),
            ToolStreamVerbosity::Off
        );
        assert!(!policy.show_heartbeat_on_broadcast());
    }

    #[test]
    fn clear_run_context_drops_run_scoped_state_only() {
        let policy = policy_with_default(ToolStreamVerbosity::Off);
        policy.set_run_verbosity("run-1", ToolStreamVerbosity::Full);
        policy.set_session_verbosity("sess", ToolStreamVerbosity::Full);
        policy.register_heartbeat_run("run-1");
        policy.bind_run_session("run-1", "sess");

        policy.clear_run_context("run-1");
        assert!(!policy.is_heartbeat_run("run-1"));
        assert_eq!(policy.resolve_session_key("run-1"), None);
        // Session-scoped override survives the run.
        assert_eq!(
            policy.tool_stream_verbosity("run-1", Some("sess")),
            ToolStreamVerbosity::Full
        );
    }
}
