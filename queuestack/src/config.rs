//! Configuration management

use anyhow::Context;
use queuestack_auth::SharedKey;
use queuestack_queue::MessageEncoding;
use serde::Deserialize;
use std::path::Path;
use tracing::warn;

/// Main configuration structure
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub account: AccountConfig,

    #[serde(default)]
    pub queue: QueueConfig,

    #[serde(default)]
    pub reclaimer: ReclaimerConfig,
}

#[derive(Debug, Deserialize)]
pub struct AccountConfig {
    #[serde(default = "default_account_name")]
    pub name: String,

    /// Base64 account key. A random key is generated when unset.
    #[serde(default)]
    pub key: Option<String>,
}

impl Default for AccountConfig {
    fn default() -> Self {
        Self {
            name: default_account_name(),
            key: None,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct QueueConfig {
    #[serde(default)]
    pub encoding: MessageEncoding,
}

#[derive(Debug, Deserialize, Default)]
pub struct ReclaimerConfig {
    /// Seconds between expiry sweeps; no background sweeps when unset
    #[serde(default)]
    pub interval_secs: Option<u64>,
}

fn default_account_name() -> String {
    "devstoreaccount1".to_string()
}

impl Config {
    /// Load configuration from an optional file and `QUEUESTACK_*` variables.
    ///
    /// Without an explicit path, `queuestack.toml` in the working directory
    /// is read if present. Nested keys use a double underscore, e.g.
    /// `QUEUESTACK_ACCOUNT__NAME`.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let file = match path {
            Some(path) => config::File::from(path).required(true),
            None => config::File::with_name("queuestack").required(false),
        };

        let config = config::Config::builder()
            .add_source(file)
            .add_source(
                config::Environment::with_prefix("QUEUESTACK")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        Ok(config.try_deserialize::<Config>()?)
    }

    /// The configured account key, or a fresh one
    pub fn shared_key(&self) -> anyhow::Result<SharedKey> {
        match &self.account.key {
            Some(key) => SharedKey::from_base64(key).context("account.key is not a valid base64 key"),
            None => {
                warn!("No account key configured, using a random key");
                Ok(SharedKey::generate())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config: Config = toml::from_str("").unwrap();

        assert_eq!(config.account.name, "devstoreaccount1");
        assert!(config.account.key.is_none());
        assert_eq!(config.queue.encoding, MessageEncoding::Text);
        assert!(config.reclaimer.interval_secs.is_none());
    }

    #[test]
    fn test_parse_all_sections() {
        let config: Config = toml::from_str(
            r#"
            [account]
            name = "myaccount"
            key = "c2VjcmV0LWtleQ=="

            [queue]
            encoding = "base64"

            [reclaimer]
            interval_secs = 15
            "#,
        )
        .unwrap();

        assert_eq!(config.account.name, "myaccount");
        assert_eq!(config.queue.encoding, MessageEncoding::Base64);
        assert_eq!(config.reclaimer.interval_secs, Some(15));
        assert_eq!(config.shared_key().unwrap().to_base64(), "c2VjcmV0LWtleQ==");
    }

    #[test]
    fn test_invalid_key() {
        let config: Config = toml::from_str(
            r#"
            [account]
            key = "not base64!"
            "#,
        )
        .unwrap();

        assert!(config.shared_key().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        writeln!(file, "[account]\nname = \"fromfile\"\n\n[reclaimer]\ninterval_secs = 5").unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.account.name, "fromfile");
        assert_eq!(config.reclaimer.interval_secs, Some(5));
    }

    #[test]
    fn test_load_missing_explicit_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.toml");

        assert!(Config::load(Some(&missing)).is_err());
    }
}
