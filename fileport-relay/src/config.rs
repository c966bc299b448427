//! Load config from file and environment.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use fileport_core::RelayConfig;

/// Broker tick period; request timeouts are counted in ticks.
pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Relay configuration. File: ~/.config/fileport/config.toml or /etc/fileport/config.toml.
/// Env overrides: PORT, FILEPORT_BIND, FILEPORT_FILES_DIR, FILEPORT_REQUEST_TIMEOUT_SECS,
/// FILEPORT_MAX_PENDING, FILEPORT_NOTIFY_HOST_LOSS.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Listen port (default 3000).
    #[serde(default = "default_port")]
    pub port: u16,
    /// Listen address (default 0.0.0.0).
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Directory served by the plain HTTP endpoints (default ./files).
    #[serde(default = "default_files_dir")]
    pub files_dir: PathBuf,
    /// Seconds a forwarded request may wait for the host (default 60).
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Cap on requests awaiting the host (default 1024).
    #[serde(default = "default_max_pending")]
    pub max_pending_requests: usize,
    /// Tell waiting clients when the host drops (default false).
    #[serde(default)]
    pub notify_on_host_loss: bool,
}

fn default_port() -> u16 {
    3000
}
fn default_bind() -> String {
    "0.0.0.0".to_string()
}
fn default_files_dir() -> PathBuf {
    PathBuf::from("files")
}
fn default_request_timeout_secs() -> u64 {
    60
}
fn default_max_pending() -> usize {
    fileport_core::core::DEFAULT_MAX_PENDING_REQUESTS
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: default_bind(),
            files_dir: default_files_dir(),
            request_timeout_secs: default_request_timeout_secs(),
            max_pending_requests: default_max_pending(),
            notify_on_host_loss: false,
        }
    }
}

impl Config {
    /// Core settings; one tick per [`TICK_INTERVAL`].
    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            request_timeout_ticks: self.request_timeout_secs.max(1),
            max_pending_requests: self.max_pending_requests.max(1),
            notify_on_host_loss: self.notify_on_host_loss,
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

/// Load config: merge default, then config file (if present), then env vars.
pub fn load() -> Config {
    let mut c = load_file().unwrap_or_default();
    apply_env(&mut c, |key| std::env::var(key).ok());
    c
}

fn apply_env(c: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(p) = var("PORT").and_then(|s| s.trim().parse::<u16>().ok()) {
        c.port = p;
    }
    if let Some(b) = var("FILEPORT_BIND").filter(|s| !s.trim().is_empty()) {
        c.bind = b.trim().to_string();
    }
    if let Some(d) = var("FILEPORT_FILES_DIR").filter(|s| !s.is_empty()) {
        c.files_dir = PathBuf::from(d);
    }
    if let Some(t) = var("FILEPORT_REQUEST_TIMEOUT_SECS").and_then(|s| s.trim().parse().ok()) {
        c.request_timeout_secs = t;
    }
    if let Some(m) = var("FILEPORT_MAX_PENDING").and_then(|s| s.trim().parse().ok()) {
        c.max_pending_requests = m;
    }
    if let Some(n) = var("FILEPORT_NOTIFY_HOST_LOSS") {
        c.notify_on_host_loss = matches!(n.trim(), "1" | "true" | "yes");
    }
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/fileport/config.toml"));
    }
    out.push(PathBuf::from("/etc/fileport/config.toml"));
    out
}

fn load_file() -> Option<Config> {
    for p in config_paths() {
        if p.exists() {
            match std::fs::read_to_string(&p) {
                Ok(s) => match toml::from_str::<Config>(&s) {
                    Ok(c) => {
                        log::info!("[Config] Loaded {}", p.display());
                        return Some(c);
                    }
                    Err(e) => log::warn!("[Config] Ignoring {}: {e}", p.display()),
                },
                Err(e) => log::warn!("[Config] Cannot read {}: {e}", p.display()),
            }
            break;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let c = Config::default();
        assert_eq!(c.port, 3000);
        assert_eq!(c.listen_addr(), "0.0.0.0:3000");
        assert!(!c.notify_on_host_loss);
        assert_eq!(c.relay_config().request_timeout_ticks, 60);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let c: Config = toml::from_str("port = 8080\nnotify_on_host_loss = true\n").unwrap();
        assert_eq!(c.port, 8080);
        assert!(c.notify_on_host_loss);
        assert_eq!(c.files_dir, PathBuf::from("files"));
    }

    #[test]
    fn unknown_keys_rejected() {
        assert!(toml::from_str::<Config>("prot = 1\n").is_err());
    }

    #[test]
    fn env_overrides() {
        let mut c = Config::default();
        apply_env(
            &mut c,
            env(&[
                ("PORT", "4001"),
                ("FILEPORT_REQUEST_TIMEOUT_SECS", "5"),
                ("FILEPORT_MAX_PENDING", "10"),
                ("FILEPORT_NOTIFY_HOST_LOSS", "1"),
                ("FILEPORT_FILES_DIR", "/srv/files"),
            ]),
        );
        assert_eq!(c.port, 4001);
        assert_eq!(c.request_timeout_secs, 5);
        assert_eq!(c.max_pending_requests, 10);
        assert!(c.notify_on_host_loss);
        assert_eq!(c.files_dir, PathBuf::from("/srv/files"));
    }

    #[test]
    fn bad_env_values_ignored() {
        let mut c = Config::default();
        apply_env(&mut c, env(&[("PORT", "not-a-port"), ("FILEPORT_MAX_PENDING", "-3")]));
        assert_eq!(c, Config::default());
    }

    #[test]
    fn zero_limits_clamped() {
        let c = Config {
            request_timeout_secs: 0,
            max_pending_requests: 0,
            ..Config::default()
        };
        let rc = c.relay_config();
        assert_eq!(rc.request_timeout_ticks, 1);
        assert_eq!(rc.max_pending_requests, 1);
    }
}
