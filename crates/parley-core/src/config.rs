//! Messenger configuration loaded from environment variables.
//!
//! Every setting has a default so a node can start with zero configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Messenger configuration.
#[derive(Debug, Clone)]
pub struct MessengerConfig {
    /// Directory holding the database and identity key.
    /// Env: `PARLEY_DATA_DIR`
    /// Default: platform data directory.
    pub data_dir: Option<PathBuf>,

    /// Fallback for the contacts-only policy while no synced setting exists.
    /// Env: `PARLEY_CONTACTS_ONLY` (true/false)
    /// Default: `false`
    pub messages_from_contacts_only: bool,

    /// Enable an installation of our own identity as soon as it sends a
    /// pair-installation payload.
    /// Env: `PARLEY_TRUST_PAIRED` (true/false)
    /// Default: `false`
    pub trust_paired_installations: bool,

    /// Replay the full local state when an installation becomes enabled.
    /// Env: `PARLEY_SYNC_ON_PAIRING` (true/false)
    /// Default: `true`
    pub sync_on_pairing: bool,

    /// Name advertised to paired installations.
    /// Env: `PARLEY_DEVICE_NAME`
    pub device_name: String,

    /// Device type advertised to paired installations.
    /// Env: `PARLEY_DEVICE_TYPE`
    pub device_type: String,

    /// Attempts after which an unsent message is no longer resent.
    /// Env: `PARLEY_RESEND_MAX_COUNT`
    /// Default: `3`
    pub resend_max_count: u32,

    /// Base delay of the resend backoff.
    /// Env: `PARLEY_RESEND_MIN_DELAY_SECS`
    /// Default: 30 seconds
    pub resend_min_delay: Duration,

    /// How often the resend loop looks for expired messages.
    pub resend_interval: Duration,

    /// How often a backup payload is sent to paired installations.
    /// Env: `PARLEY_BACKUP_INTERVAL_SECS`
    /// Default: 12 hours
    pub backup_interval: Duration,

    /// How often wallet balances are refreshed.
    /// Env: `PARLEY_WALLET_REFRESH_SECS`
    /// Default: 10 minutes
    pub wallet_refresh_interval: Duration,

    /// Full-state sync period. `None` disables periodic sync.
    /// Env: `PARLEY_PERIODIC_SYNC_SECS` (0 disables)
    /// Default: 6 hours
    pub periodic_sync_interval: Option<Duration>,

    /// Quiet time after the last sync payload before subscriptions settle.
    /// Env: `PARLEY_SETTLE_QUIET_MS`
    /// Default: 2 seconds
    pub settle_quiet_period: Duration,

    /// Upper bound on how long settling may be postponed.
    /// Env: `PARLEY_SETTLE_MAX_WAIT_MS`
    /// Default: 10 seconds
    pub settle_max_wait: Duration,

    /// Tick of the settle loop.
    pub settle_tick: Duration,
}

impl Default for MessengerConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            messages_from_contacts_only: false,
            trust_paired_installations: false,
            sync_on_pairing: true,
            device_name: "parley-node".to_string(),
            device_type: std::env::consts::OS.to_string(),
            resend_max_count: 3,
            resend_min_delay: Duration::from_secs(30),
            resend_interval: Duration::from_secs(1),
            backup_interval: Duration::from_secs(12 * 60 * 60),
            wallet_refresh_interval: Duration::from_secs(10 * 60),
            periodic_sync_interval: Some(Duration::from_secs(6 * 60 * 60)),
            settle_quiet_period: Duration::from_secs(2),
            settle_max_wait: Duration::from_secs(10),
            settle_tick: Duration::from_millis(500),
        }
    }
}

impl MessengerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(dir) = lookup("PARLEY_DATA_DIR") {
            if !dir.is_empty() {
                config.data_dir = Some(PathBuf::from(dir));
            }
        }

        if let Some(val) = lookup("PARLEY_CONTACTS_ONLY") {
            config.messages_from_contacts_only = parse_flag(&val);
        }

        if let Some(val) = lookup("PARLEY_TRUST_PAIRED") {
            config.trust_paired_installations = parse_flag(&val);
        }

        if let Some(val) = lookup("PARLEY_SYNC_ON_PAIRING") {
            config.sync_on_pairing = parse_flag(&val);
        }

        if let Some(name) = lookup("PARLEY_DEVICE_NAME") {
            config.device_name = name;
        }

        if let Some(kind) = lookup("PARLEY_DEVICE_TYPE") {
            config.device_type = kind;
        }

        if let Some(val) = lookup("PARLEY_RESEND_MAX_COUNT") {
            match val.parse::<u32>() {
                Ok(n) => config.resend_max_count = n,
                Err(_) => {
                    tracing::warn!(value = %val, "Invalid PARLEY_RESEND_MAX_COUNT, using default")
                }
            }
        }

        if let Some(d) = duration_var(&lookup, "PARLEY_RESEND_MIN_DELAY_SECS", Duration::from_secs) {
            config.resend_min_delay = d;
        }

        if let Some(d) = duration_var(&lookup, "PARLEY_BACKUP_INTERVAL_SECS", Duration::from_secs) {
            config.backup_interval = d;
        }

        if let Some(d) = duration_var(&lookup, "PARLEY_WALLET_REFRESH_SECS", Duration::from_secs) {
            config.wallet_refresh_interval = d;
        }

        if let Some(d) = duration_var(&lookup, "PARLEY_PERIODIC_SYNC_SECS", Duration::from_secs) {
            config.periodic_sync_interval = (!d.is_zero()).then_some(d);
        }

        if let Some(d) = duration_var(&lookup, "PARLEY_SETTLE_QUIET_MS", Duration::from_millis) {
            config.settle_quiet_period = d;
        }

        if let Some(d) = duration_var(&lookup, "PARLEY_SETTLE_MAX_WAIT_MS", Duration::from_millis) {
            config.settle_max_wait = d;
        }

        if config.settle_max_wait < config.settle_quiet_period {
            tracing::warn!(
                quiet = ?config.settle_quiet_period,
                max_wait = ?config.settle_max_wait,
                "Settle max wait shorter than quiet period, raising it"
            );
            config.settle_max_wait = config.settle_quiet_period;
        }

        config
    }
}

fn parse_flag(val: &str) -> bool {
    val != "false" && val != "0"
}

fn duration_var(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    unit: fn(u64) -> Duration,
) -> Option<Duration> {
    let val = lookup(key)?;
    match val.parse::<u64>() {
        Ok(n) => Some(unit(n)),
        Err(_) => {
            tracing::warn!(value = %val, key, "Invalid duration, using default");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> MessengerConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        MessengerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_config() {
        let config = MessengerConfig::default();
        assert!(!config.trust_paired_installations);
        assert!(config.sync_on_pairing);
        assert_eq!(config.resend_max_count, 3);
        assert_eq!(config.wallet_refresh_interval, Duration::from_secs(600));
    }

    #[test]
    fn test_env_overrides() {
        let config = from_pairs(&[
            ("PARLEY_DATA_DIR", "/tmp/parley"),
            ("PARLEY_TRUST_PAIRED", "true"),
            ("PARLEY_PERIODIC_SYNC_SECS", "0"),
            ("PARLEY_SETTLE_QUIET_MS", "250"),
        ]);
        assert_eq!(config.data_dir, Some(PathBuf::from("/tmp/parley")));
        assert!(config.trust_paired_installations);
        assert_eq!(config.periodic_sync_interval, None);
        assert_eq!(config.settle_quiet_period, Duration::from_millis(250));
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = from_pairs(&[
            ("PARLEY_RESEND_MAX_COUNT", "lots"),
            ("PARLEY_SETTLE_QUIET_MS", "20000"),
        ]);
        assert_eq!(config.resend_max_count, 3);
        assert_eq!(config.settle_max_wait, config.settle_quiet_period);
    }
}
