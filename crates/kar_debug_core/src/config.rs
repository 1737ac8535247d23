use std::time::Duration;

const DEFAULT_NODE_ADDR: &str = "127.0.0.1:3500";
const DEFAULT_SERVER_PORT: u16 = 5364;

#[derive(Debug, Clone)]
pub struct DebuggerConfig {
    /// `host:port` of the KAR node the coordinator attaches to.
    pub node_addr: String,
    /// Address debugger clients connect to.
    pub listen_addr: String,
    /// Bound on internal round trips (busy-snapshot refresh, breakpoint acks). `None` waits forever.
    pub round_trip_timeout: Option<Duration>,
    /// Bound on waiting for a single-step to land. `None` waits forever.
    pub step_timeout: Option<Duration>,
    pub debugger_id: String,
}

impl Default for DebuggerConfig {
    fn default() -> Self {
        Self {
            node_addr: DEFAULT_NODE_ADDR.to_string(),
            listen_addr: format!("0.0.0.0:{DEFAULT_SERVER_PORT}"),
            round_trip_timeout: None,
            step_timeout: None,
            debugger_id: uuid::Uuid::new_v4().to_string(),
        }
    }
}

impl DebuggerConfig {
    pub fn new(node_addr: impl Into<String>, listen_addr: impl Into<String>) -> Self {
        Self {
            node_addr: node_addr.into(),
            listen_addr: listen_addr.into(),
            ..Self::default()
        }
    }

    pub fn with_round_trip_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.round_trip_timeout = timeout;
        self
    }

    pub fn with_step_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.step_timeout = timeout;
        self
    }

    pub fn from_env() -> Self {
        let node_addr = std::env::var("KAR_DEBUG_NODE_ADDR")
            .ok()
            .filter(|v| !v.is_empty())
            .or_else(|| {
                std::env::var("KAR_RUNTIME_PORT")
                    .ok()
                    .filter(|v| !v.is_empty())
                    .map(|port| format!("127.0.0.1:{port}"))
            })
            .unwrap_or_else(|| DEFAULT_NODE_ADDR.to_string());

        let port = std::env::var("KAR_DEBUG_SERVER_PORT")
            .ok()
            .and_then(|v| v.parse::<u16>().ok())
            .unwrap_or(DEFAULT_SERVER_PORT);

        let debugger_id = std::env::var("KAR_DEBUG_ID")
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        Self {
            node_addr,
            listen_addr: format!("0.0.0.0:{port}"),
            round_trip_timeout: timeout_from_env("KAR_DEBUG_ROUND_TRIP_TIMEOUT_MS"),
            step_timeout: timeout_from_env("KAR_DEBUG_STEP_TIMEOUT_MS"),
            debugger_id,
        }
    }
}

// 0 or unparsable means unbounded
fn timeout_from_env(key: &str) -> Option<Duration> {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|ms| *ms > 0)
        .map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ENV_KEYS: [&str; 6] = [
        "KAR_DEBUG_NODE_ADDR",
        "KAR_RUNTIME_PORT",
        "KAR_DEBUG_SERVER_PORT",
        "KAR_DEBUG_ID",
        "KAR_DEBUG_ROUND_TRIP_TIMEOUT_MS",
        "KAR_DEBUG_STEP_TIMEOUT_MS",
    ];

    fn clear_env() {
        for key in ENV_KEYS {
            std::env::remove_var(key);
        }
    }

    #[test]
    fn test_default_config() {
        let config = DebuggerConfig::default();
        assert_eq!(config.node_addr, "127.0.0.1:3500");
        assert_eq!(config.listen_addr, "0.0.0.0:5364");
        assert!(config.round_trip_timeout.is_none());
        assert!(config.step_timeout.is_none());
        assert!(!config.debugger_id.is_empty());
    }

    #[test]
    fn test_new_config_with_timeouts() {
        let config = DebuggerConfig::new("node:9000", "127.0.0.1:0")
            .with_round_trip_timeout(Some(Duration::from_secs(2)))
            .with_step_timeout(Some(Duration::from_secs(30)));
        assert_eq!(config.node_addr, "node:9000");
        assert_eq!(config.listen_addr, "127.0.0.1:0");
        assert_eq!(config.round_trip_timeout, Some(Duration::from_secs(2)));
        assert_eq!(config.step_timeout, Some(Duration::from_secs(30)));
    }

    // Env-mutating cases share one test so they cannot race each other.
    #[test]
    fn test_from_env() {
        clear_env();
        let config = DebuggerConfig::from_env();
        assert_eq!(config.node_addr, "127.0.0.1:3500");
        assert_eq!(config.listen_addr, "0.0.0.0:5364");
        assert!(config.round_trip_timeout.is_none());

        std::env::set_var("KAR_RUNTIME_PORT", "31000");
        let config = DebuggerConfig::from_env();
        assert_eq!(config.node_addr, "127.0.0.1:31000");

        std::env::set_var("KAR_DEBUG_NODE_ADDR", "kar-node:32000");
        std::env::set_var("KAR_DEBUG_SERVER_PORT", "6000");
        std::env::set_var("KAR_DEBUG_ID", "debugger-1");
        std::env::set_var("KAR_DEBUG_ROUND_TRIP_TIMEOUT_MS", "1500");
        std::env::set_var("KAR_DEBUG_STEP_TIMEOUT_MS", "0");
        let config = DebuggerConfig::from_env();
        assert_eq!(config.node_addr, "kar-node:32000");
        assert_eq!(config.listen_addr, "0.0.0.0:6000");
        assert_eq!(config.debugger_id, "debugger-1");
        assert_eq!(config.round_trip_timeout, Some(Duration::from_millis(1500)));
        assert!(config.step_timeout.is_none());

        clear_env();
    }
}
