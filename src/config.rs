//! Minimal runtime configuration helpers.
//! Everything comes from the process environment (optionally seeded from a `.env` file).

use std::num::NonZeroU64;
use std::time::Duration;

use crate::client::DEFAULT_CONTROLLER_NAME;
use crate::transport::Credentials;

pub const DEFAULT_POLL_SECS: u64 = 30;

#[derive(Debug, Clone)]
pub struct Config {
    /// Board address, `host` or `host:port`. Empty only in simulation mode.
    pub host: String,
    /// Sent as Basic-Auth when both username and password are set.
    pub credentials: Option<Credentials>,
    /// Prefix of every device unique id.
    pub controller_name: String,
    pub poll_interval: Duration,
    /// Stop after this many poll ticks; run forever when unset.
    pub max_ticks: Option<NonZeroU64>,
    /// Poll an in-process simulated board instead of real hardware.
    pub simulate: bool,
    pub simulate_seed: Option<u64>,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env`, reading variables through `get`.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, String> {
        let var = |key: &str| get(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let simulate = var("VM201_SIMULATE")
            .map(|s| matches!(s.as_str(), "1" | "true" | "TRUE"))
            .unwrap_or(false);

        let host = match (var("VM201_HOST"), simulate) {
            (Some(h), _) => h,
            (None, true) => String::new(),
            (None, false) => return Err("Missing board address: set VM201_HOST (or VM201_SIMULATE=1)".to_string()),
        };
        let host = match var("VM201_PORT") {
            Some(p) if host.contains(':') => {
                return Err(format!("VM201_PORT={} given but VM201_HOST={} already names a port", p, host));
            }
            Some(p) => {
                let port = p
                    .parse::<u16>()
                    .map_err(|_| format!("VM201_PORT must be a port number, got {:?}", p))?;
                format!("{}:{}", host, port)
            }
            None => host,
        };

        let credentials = Credentials::from_parts(var("VM201_USERNAME"), var("VM201_PASSWORD"));
        let controller_name = var("VM201_CONTROLLER_NAME").unwrap_or_else(|| DEFAULT_CONTROLLER_NAME.to_string());

        let poll_secs = match var("POLL_INTERVAL_SECS") {
            Some(s) => s
                .parse::<NonZeroU64>()
                .map_err(|_| "POLL_INTERVAL_SECS must be a positive integer".to_string())?
                .get(),
            None => DEFAULT_POLL_SECS,
        };

        let max_ticks = match var("POLL_MAX_TICKS") {
            Some(s) => Some(
                s.parse::<NonZeroU64>()
                    .map_err(|_| "POLL_MAX_TICKS must be a positive integer".to_string())?,
            ),
            None => None,
        };

        let simulate_seed = match var("VM201_SIMULATE_SEED") {
            Some(s) => Some(
                s.parse::<u64>()
                    .map_err(|_| "VM201_SIMULATE_SEED must be an unsigned integer".to_string())?,
            ),
            None => None,
        };

        Ok(Config {
            host,
            credentials,
            controller_name,
            poll_interval: Duration::from_secs(poll_secs),
            max_ticks,
            simulate,
            simulate_seed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, String> {
        let map = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<BTreeMap<_, _>>();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let cfg = load(&[("VM201_HOST", "192.168.1.20")]).expect("config");
        assert_eq!(cfg.host, "192.168.1.20");
        assert!(cfg.credentials.is_none());
        assert_eq!(cfg.controller_name, "VM201");
        assert_eq!(cfg.poll_interval, Duration::from_secs(DEFAULT_POLL_SECS));
        assert!(cfg.max_ticks.is_none());
        assert!(!cfg.simulate);
    }

    #[test]
    fn full_config() {
        let cfg = load(&[
            ("VM201_HOST", "vm201.lan"),
            ("VM201_PORT", "8080"),
            ("VM201_USERNAME", "admin"),
            ("VM201_PASSWORD", "VM201"),
            ("VM201_CONTROLLER_NAME", "garage"),
            ("POLL_INTERVAL_SECS", "5"),
            ("POLL_MAX_TICKS", "3"),
        ])
        .expect("config");
        assert_eq!(cfg.host, "vm201.lan:8080");
        assert_eq!(cfg.credentials.map(|c| c.username), Some("admin".to_string()));
        assert_eq!(cfg.controller_name, "garage");
        assert_eq!(cfg.poll_interval, Duration::from_secs(5));
        assert_eq!(cfg.max_ticks.map(NonZeroU64::get), Some(3));
    }

    #[test]
    fn host_required_unless_simulating() {
        assert!(load(&[]).is_err());
        assert!(load(&[("VM201_HOST", "  ")]).is_err());
        let cfg = load(&[("VM201_SIMULATE", "true"), ("VM201_SIMULATE_SEED", "9")]).expect("config");
        assert!(cfg.simulate);
        assert_eq!(cfg.simulate_seed, Some(9));
    }

    #[test]
    fn rejects_bad_numbers() {
        assert!(load(&[("VM201_HOST", "h"), ("VM201_PORT", "http")]).is_err());
        assert!(load(&[("VM201_HOST", "h:80"), ("VM201_PORT", "8080")]).is_err());
        assert!(load(&[("VM201_HOST", "h"), ("POLL_INTERVAL_SECS", "0")]).is_err());
        assert!(load(&[("VM201_HOST", "h"), ("POLL_MAX_TICKS", "-1")]).is_err());
        assert!(load(&[("VM201_SIMULATE", "1"), ("VM201_SIMULATE_SEED", "x")]).is_err());
    }
}
