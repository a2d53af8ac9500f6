//! Service configuration.
//!
//! A single TOML document loaded once at startup. Missing required keys
//! fail with a configuration error naming the key; no defaults mask absent
//! credentials. Private-key material is referenced by file path, never
//! inlined.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::NaiveTime;
use chrono_tz::Tz;
use serde::Deserialize;

use crate::constants::{LIVE_REALM, PAPER_REALM};
use crate::error::{Error, Result};

/// Target environment for the broker session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Live trading account.
    Live,
    /// Paper trading account.
    Paper,
}

impl Environment {
    /// Default OAuth realm for this environment.
    pub fn default_realm(self) -> &'static str {
        match self {
            Environment::Live => LIVE_REALM,
            Environment::Paper => PAPER_REALM,
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Live => write!(f, "live"),
            Environment::Paper => write!(f, "paper"),
        }
    }
}

/// OAuth credentials and key material for the broker session.
#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    /// OAuth consumer key issued for the integration.
    pub consumer_key: String,
    /// Long-lived OAuth access token.
    pub access_token: String,
    /// Access token secret as base64 RSA ciphertext.
    pub access_token_secret: String,
    /// Diffie-Hellman prime modulus as a hex string.
    pub dh_prime: String,
    /// OAuth realm. Defaults by environment when absent.
    #[serde(default)]
    pub realm: Option<String>,
    /// Path to the PEM private key used for RSA-SHA256 request signing.
    pub signature_key_path: PathBuf,
    /// Path to the PEM private key used for RSA-OAEP secret decryption.
    pub encryption_key_path: PathBuf,
    /// Brokerage account id. Discovered via the API when absent.
    #[serde(default)]
    pub account_id: Option<String>,
    /// Base URL override, for testing against a mock server.
    #[serde(default)]
    pub base_url: Option<String>,
}

/// Worksheet holding the recurring-order table.
#[derive(Debug, Clone, Deserialize)]
pub struct SheetConfig {
    /// Full spreadsheet URL (the id is extracted from it).
    pub spreadsheet_url: String,
    /// Zero-based worksheet index within the spreadsheet.
    #[serde(default)]
    pub worksheet_index: usize,
    /// Path to the service-account credentials JSON.
    pub credentials_path: PathBuf,
}

/// Webhook notification target.
#[derive(Debug, Clone, Deserialize)]
pub struct NotifierConfig {
    /// Webhook URL receiving the per-run summary.
    pub webhook_url: String,
}

/// Scheduling parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Daily fire time as `HH:MM` local to `timezone`.
    #[serde(default = "default_fire_time")]
    pub fire_time: String,
    /// Business timezone all scheduling decisions are made in.
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

fn default_fire_time() -> String {
    "09:00".to_owned()
}

fn default_timezone() -> String {
    "America/New_York".to_owned()
}

/// Local HTTP surface parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Loopback port for the local API.
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    8321
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: default_port() }
    }
}

/// Process lifecycle parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct SupervisorConfig {
    /// PID file path for the background daemon.
    #[serde(default = "default_pid_file")]
    pub pid_file: PathBuf,
    /// Directory receiving rotated log files.
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
}

fn default_pid_file() -> PathBuf {
    PathBuf::from("autoinvest.pid")
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            pid_file: default_pid_file(),
            log_dir: default_log_dir(),
        }
    }
}

/// Root configuration document.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Target environment, `live` or `paper`.
    pub environment: Environment,
    /// Broker OAuth credentials.
    pub broker: BrokerConfig,
    /// Recurring-order worksheet.
    pub sheet: SheetConfig,
    /// Webhook notification target.
    pub notifier: NotifierConfig,
    /// Scheduling parameters.
    pub scheduler: SchedulerConfig,
    /// Local HTTP surface.
    #[serde(default)]
    pub server: ServerConfig,
    /// Process lifecycle parameters.
    #[serde(default)]
    pub supervisor: SupervisorConfig,
}

impl Config {
    /// Load and validate the configuration document at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        let config: Config =
            toml::from_str(&raw).map_err(|e| Error::Config(e.message().to_owned()))?;
        config.validate()?;
        Ok(config)
    }

    /// Effective OAuth realm: explicit value or the environment default.
    pub fn realm(&self) -> &str {
        self.broker
            .realm
            .as_deref()
            .unwrap_or_else(|| self.environment.default_realm())
    }

    /// Parsed daily fire time.
    pub fn fire_time(&self) -> Result<NaiveTime> {
        NaiveTime::parse_from_str(&self.scheduler.fire_time, "%H:%M").map_err(|_| {
            Error::Config(format!(
                "scheduler.fire_time `{}` is not HH:MM",
                self.scheduler.fire_time
            ))
        })
    }

    /// Parsed business timezone.
    pub fn timezone(&self) -> Result<Tz> {
        Tz::from_str(&self.scheduler.timezone).map_err(|_| {
            Error::Config(format!(
                "scheduler.timezone `{}` is not a known timezone",
                self.scheduler.timezone
            ))
        })
    }

    fn validate(&self) -> Result<()> {
        for (key, value) in [
            ("broker.consumer_key", &self.broker.consumer_key),
            ("broker.access_token", &self.broker.access_token),
            ("broker.access_token_secret", &self.broker.access_token_secret),
            ("broker.dh_prime", &self.broker.dh_prime),
            ("sheet.spreadsheet_url", &self.sheet.spreadsheet_url),
            ("notifier.webhook_url", &self.notifier.webhook_url),
        ] {
            if value.trim().is_empty() {
                return Err(Error::Config(format!("{key} is empty")));
            }
        }
        self.fire_time()?;
        self.timezone()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_document() -> &'static str {
        r#"
            environment = "paper"

            [broker]
            consumer_key = "CK123"
            access_token = "at-token"
            access_token_secret = "c2VjcmV0"
            dh_prime = "f51d"
            signature_key_path = "keys/signing.pem"
            encryption_key_path = "keys/encryption.pem"

            [sheet]
            spreadsheet_url = "https://docs.google.com/spreadsheets/d/abc123/edit"
            worksheet_index = 1
            credentials_path = "keys/service-account.json"

            [notifier]
            webhook_url = "https://discord.com/api/webhooks/1/x"

            [scheduler]
            fire_time = "09:30"
            timezone = "America/New_York"
        "#
    }

    #[test]
    fn parses_full_document() {
        let config: Config = toml::from_str(full_document()).unwrap();
        assert_eq!(config.environment, Environment::Paper);
        assert_eq!(config.realm(), "test_realm");
        assert_eq!(config.sheet.worksheet_index, 1);
        assert_eq!(config.server.port, 8321);
        assert_eq!(config.fire_time().unwrap().format("%H:%M").to_string(), "09:30");
        assert_eq!(config.timezone().unwrap(), chrono_tz::America::New_York);
    }

    #[test]
    fn explicit_realm_wins_over_environment() {
        let doc = full_document().replace(
            "consumer_key = \"CK123\"",
            "consumer_key = \"CK123\"\nrealm = \"custom_realm\"",
        );
        let config: Config = toml::from_str(&doc).unwrap();
        assert_eq!(config.realm(), "custom_realm");
    }

    #[test]
    fn missing_key_names_the_field() {
        let doc = full_document().replace("consumer_key = \"CK123\"\n", "");
        let err = toml::from_str::<Config>(&doc).unwrap_err();
        assert!(
            err.message().contains("consumer_key"),
            "error should name the missing key: {err}"
        );
    }

    #[test]
    fn load_rejects_bad_fire_time() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("autoinvest.toml");
        std::fs::write(&path, full_document().replace("09:30", "9am")).unwrap();
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn load_rejects_unknown_timezone() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("autoinvest.toml");
        std::fs::write(
            &path,
            full_document().replace("America/New_York", "Mars/Olympus_Mons"),
        )
        .unwrap();
        assert!(Config::load(&path).is_err());
    }
}
