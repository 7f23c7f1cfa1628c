use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 8787;
pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_RETENTION_DAYS: u32 = 30; // closed delivery records kept this long

/// Top-level config (eventping.toml + EVENTPING_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventPingConfig {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub channels: ChannelsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Bearer token required on every RPC call. `None` disables auth,
    /// which is only sensible when bound to loopback.
    #[serde(default)]
    pub api_token: Option<String>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
            api_token: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Tuning for the scheduler core, dispatcher and retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Total delivery attempts per reminder before it fails terminally.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// First retry delay; doubled on every further attempt.
    #[serde(default = "default_backoff_base_secs")]
    pub backoff_base_secs: u64,
    #[serde(default = "default_backoff_max_secs")]
    pub backoff_max_secs: u64,
    /// Maximum number of concurrent adapter calls.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Upper bound on how long the engine sleeps with nothing due.
    #[serde(default = "default_max_idle_secs")]
    pub max_idle_secs: u64,
    /// Per-call timeout applied around every adapter `send`.
    #[serde(default = "default_send_timeout_secs")]
    pub send_timeout_secs: u64,
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    #[serde(default = "default_purge_interval_secs")]
    pub purge_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_base_secs: default_backoff_base_secs(),
            backoff_max_secs: default_backoff_max_secs(),
            workers: default_workers(),
            max_idle_secs: default_max_idle_secs(),
            send_timeout_secs: default_send_timeout_secs(),
            retention_days: DEFAULT_RETENTION_DAYS,
            purge_interval_secs: default_purge_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelsConfig {
    pub email: Option<EmailConfig>,
    pub sms: Option<SmsConfig>,
    pub whatsapp: Option<WhatsAppConfig>,
    pub telegram: Option<TelegramConfig>,
    pub slack: Option<SlackConfig>,
    pub discord: Option<DiscordConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SmtpTls {
    /// Implicit TLS (usually port 465).
    Wrapper,
    /// STARTTLS upgrade (usually port 587).
    #[default]
    StartTls,
    /// Plaintext; local relays and test servers only.
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    pub host: String,
    pub port: Option<u16>,
    #[serde(default)]
    pub tls: SmtpTls,
    pub username: Option<String>,
    pub password: Option<String>,
    /// RFC 5322 mailbox used as the `From:` header.
    pub from: String,
}

/// Twilio-compatible HTTP SMS gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmsConfig {
    pub account_sid: String,
    pub auth_token: String,
    pub from_number: String,
    #[serde(default = "default_sms_base_url")]
    pub base_url: String,
}

/// The WhatsApp bridge service (owns the WhatsApp Web session).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhatsAppConfig {
    #[serde(default = "default_whatsapp_bridge_url")]
    pub bridge_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlackConfig {
    pub bot_token: String,
    #[serde(default = "default_slack_base_url")]
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscordConfig {
    pub bot_token: String,
    #[serde(default = "default_discord_base_url")]
    pub base_url: String,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}
fn default_backoff_base_secs() -> u64 {
    30
}
fn default_backoff_max_secs() -> u64 {
    30 * 60
}
fn default_workers() -> usize {
    16
}
fn default_max_idle_secs() -> u64 {
    60
}
fn default_send_timeout_secs() -> u64 {
    30
}
fn default_retention_days() -> u32 {
    DEFAULT_RETENTION_DAYS
}
fn default_purge_interval_secs() -> u64 {
    24 * 60 * 60
}
fn default_sms_base_url() -> String {
    "https://api.twilio.com".to_string()
}
fn default_whatsapp_bridge_url() -> String {
    "http://localhost:3000".to_string()
}
fn default_slack_base_url() -> String {
    "https://slack.com/api".to_string()
}
fn default_discord_base_url() -> String {
    "https://discord.com/api/v10".to_string()
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.eventping/eventping.db", home)
}

impl EventPingConfig {
    /// Load config from a TOML file with EVENTPING_* env var overrides.
    ///
    /// Nested keys use a double underscore, e.g.
    /// `EVENTPING_SCHEDULER__MAX_ATTEMPTS=3`.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        Self::figment(&path)
            .extract()
            .map_err(|e| crate::error::EventPingError::Config(e.to_string()))
    }

    fn figment(path: &str) -> Figment {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("EVENTPING_").split("__"))
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.eventping/eventping.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("absent.toml");
        let cfg = EventPingConfig::load(path.to_str()).expect("load failed");
        assert_eq!(cfg.daemon.port, DEFAULT_PORT);
        assert_eq!(cfg.scheduler.max_attempts, DEFAULT_MAX_ATTEMPTS);
        assert!(cfg.channels.email.is_none());
    }

    #[test]
    fn toml_sections_are_parsed() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(
            file,
            r#"
[daemon]
port = 9000
api_token = "s3cret"

[scheduler]
max_attempts = 3
backoff_base_secs = 10

[channels.email]
host = "smtp.example.com"
tls = "wrapper"
from = "EventPing <noreply@example.com>"

[channels.telegram]
bot_token = "123:abc"
"#
        )
        .expect("write");

        let cfg = EventPingConfig::load(file.path().to_str()).expect("load failed");
        assert_eq!(cfg.daemon.port, 9000);
        assert_eq!(cfg.daemon.api_token.as_deref(), Some("s3cret"));
        assert_eq!(cfg.scheduler.max_attempts, 3);
        assert_eq!(cfg.scheduler.backoff_base_secs, 10);
        assert_eq!(cfg.scheduler.workers, 16);
        let email = cfg.channels.email.expect("email section");
        assert_eq!(email.tls, SmtpTls::Wrapper);
        assert_eq!(email.port, None);
        assert_eq!(cfg.channels.telegram.expect("telegram").bot_token, "123:abc");
        assert!(cfg.channels.whatsapp.is_none());
    }
}
