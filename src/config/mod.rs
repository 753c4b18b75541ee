use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::limiter::{Quota, RateLimitPolicy};
use crate::security;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub environment: Profile,
    pub server: ServerConfig,
    pub mail: MailConfig,
    pub rate_limit: RateLimitingConfig,
    pub security: SecurityConfig,
    pub cors: CorsConfig,
    pub metrics: MetricsConfig,
    pub contact: ContactConfig,
}

/// Deployment profile, selected with `APP_ENV`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    Development,
    #[default]
    Production,
}

impl Profile {
    pub fn as_str(&self) -> &'static str {
        match self {
            Profile::Development => "development",
            Profile::Production => "production",
        }
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Profile {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Profile::Development),
            "production" | "prod" => Ok(Profile::Production),
            other => bail!("unknown environment profile `{other}`"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub timeout_seconds: u64,
    /// Hard cap on request bodies, enforced before any parsing.
    pub max_body_bytes: usize,
    /// Cap on the serialized form, checked during validation.
    pub max_form_bytes: usize,
    /// Key rate limits on `X-Forwarded-For` instead of the TCP peer.
    pub trust_proxy_headers: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            timeout_seconds: 120,
            max_body_bytes: 64 * 1024,
            max_form_bytes: security::MAX_FORM_SIZE,
            trust_proxy_headers: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MailTransportKind {
    #[default]
    Smtp,
    /// Keep messages in memory and log them instead of delivering.
    Log,
}

impl MailTransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MailTransportKind::Smtp => "smtp",
            MailTransportKind::Log => "log",
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MailConfig {
    pub transport: MailTransportKind,
    pub server: String,
    pub port: u16,
    pub use_tls: bool,
    pub use_ssl: bool,
    pub username: String,
    pub password: String,
    pub default_sender: String,
    pub timeout_seconds: u64,
    pub send_in_background: bool,
    /// Resolve MX/A records for recipient and visitor domains.
    pub check_deliverability: bool,
    pub dns_timeout_seconds: u64,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            transport: MailTransportKind::Smtp,
            server: "smtp.gmail.com".to_string(),
            port: 587,
            use_tls: true,
            use_ssl: false,
            username: String::new(),
            password: String::new(),
            default_sender: String::new(),
            timeout_seconds: 30,
            send_in_background: false,
            check_deliverability: false,
            dns_timeout_seconds: 5,
        }
    }
}

impl MailConfig {
    /// Sender address: `default_sender`, falling back to `username`.
    pub fn sender(&self) -> Option<&str> {
        [self.default_sender.as_str(), self.username.as_str()]
            .into_iter()
            .map(str::trim)
            .find(|s| !s.is_empty())
    }
}

// Keeps the SMTP password out of logs.
impl fmt::Debug for MailConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MailConfig")
            .field("transport", &self.transport)
            .field("server", &self.server)
            .field("port", &self.port)
            .field("use_tls", &self.use_tls)
            .field("use_ssl", &self.use_ssl)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("default_sender", &self.default_sender)
            .field("timeout_seconds", &self.timeout_seconds)
            .field("send_in_background", &self.send_in_background)
            .field("check_deliverability", &self.check_deliverability)
            .field("dns_timeout_seconds", &self.dns_timeout_seconds)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitingConfig {
    pub enabled: bool,
    pub requests_per_minute: u32,
    pub requests_per_day: u32,
    /// Full policy string such as `5 per minute;100 per day`. Overrides the
    /// per-minute and per-day fields when set.
    pub policy: Option<String>,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_minute: 5,
            requests_per_day: 100,
            policy: None,
        }
    }
}

impl RateLimitingConfig {
    pub fn policy(&self) -> Result<RateLimitPolicy> {
        if let Some(raw) = self.policy.as_deref().filter(|p| !p.trim().is_empty()) {
            return raw
                .parse()
                .with_context(|| format!("invalid rate limit policy `{raw}`"));
        }
        let policy = RateLimitPolicy::new(vec![
            Quota::per_minute(self.requests_per_minute),
            Quota::per_day(self.requests_per_day),
        ])?;
        Ok(policy)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    pub force_https: bool,
    pub hsts_max_age_seconds: u64,
    pub content_security_policy: BTreeMap<String, Vec<String>>,
    pub frame_options: String,
    pub referrer_policy: String,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        let content_security_policy = ["default-src", "script-src", "style-src"]
            .into_iter()
            .map(|directive| (directive.to_string(), vec!["'self'".to_string()]))
            .collect();

        Self {
            force_https: false,
            hsts_max_age_seconds: 31_536_000,
            content_security_policy,
            frame_options: "SAMEORIGIN".to_string(),
            referrer_policy: "strict-origin-when-cross-origin".to_string(),
        }
    }
}

impl SecurityConfig {
    /// Renders the CSP map as a header value, `default-src` first.
    pub fn content_security_policy_header(&self) -> String {
        let mut directives: Vec<(&String, &Vec<String>)> =
            self.content_security_policy.iter().collect();
        directives.sort_by_key(|(name, _)| name.as_str() != "default-src");

        directives
            .into_iter()
            .map(|(name, sources)| {
                if sources.is_empty() {
                    name.clone()
                } else {
                    format!("{} {}", name, sources.join(" "))
                }
            })
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    /// Empty means any origin.
    pub allow_origins: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ContactConfig {
    /// Where `/contact` submissions go. When unset they are only logged.
    pub recipient: Option<String>,
}

/// Flat environment variables kept for compatibility with existing
/// deployments, mapped onto their config keys.
const STRING_OVERRIDES: &[(&str, &str)] = &[
    ("HOST", "server.host"),
    ("MAIL_SERVER", "mail.server"),
    ("MAIL_USERNAME", "mail.username"),
    ("MAIL_PASSWORD", "mail.password"),
    ("MAIL_DEFAULT_SENDER", "mail.default_sender"),
    ("MAIL_TRANSPORT", "mail.transport"),
    ("RATE_LIMIT", "rate_limit.policy"),
    ("CONTACT_EMAIL", "contact.recipient"),
];

const FLAG_OVERRIDES: &[(&str, &str)] = &[
    ("MAIL_USE_TLS", "mail.use_tls"),
    ("MAIL_USE_SSL", "mail.use_ssl"),
    ("MAIL_SEND_ASYNC", "mail.send_in_background"),
    ("MAIL_CHECK_DELIVERABILITY", "mail.check_deliverability"),
    ("FORCE_HTTPS", "security.force_https"),
];

/// Lenient boolean parsing for environment flags.
pub fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "t" | "yes" | "y" | "on"
    )
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("CONFIG_PATH")
            .unwrap_or_else(|_| "config/default.yaml".to_string());
        let profile = match std::env::var("APP_ENV") {
            Ok(value) => value.parse()?,
            Err(_) => Profile::default(),
        };

        let mut builder = config::Config::builder()
            .set_default("environment", profile.as_str())?
            .set_default("security.force_https", profile == Profile::Production)?
            .add_source(config::File::with_name(&config_path).required(false))
            .add_source(
                config::Environment::with_prefix("FORMSENDR")
                    .prefix_separator("_")
                    .separator("__"),
            );

        for (var, key) in STRING_OVERRIDES {
            if let Ok(value) = std::env::var(var) {
                builder = builder.set_override(*key, value)?;
            }
        }
        for (var, key) in FLAG_OVERRIDES {
            if let Ok(value) = std::env::var(var) {
                builder = builder.set_override(*key, parse_flag(&value))?;
            }
        }
        if let Ok(port) = std::env::var("PORT") {
            builder = builder.set_override("server.port", port.parse::<u16>()?)?;
        }
        if let Ok(port) = std::env::var("MAIL_PORT") {
            builder = builder.set_override("mail.port", port.parse::<u16>()?)?;
        }
        if let Ok(limit) = std::env::var("RATE_LIMIT_PER_MINUTE") {
            builder =
                builder.set_override("rate_limit.requests_per_minute", limit.parse::<u32>()?)?;
        }
        if let Ok(limit) = std::env::var("RATE_LIMIT_PER_DAY") {
            builder = builder.set_override("rate_limit.requests_per_day", limit.parse::<u32>()?)?;
        }

        let settings = builder.build()?;
        let config: AppConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Semantic checks that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.server.max_form_bytes == 0 {
            bail!("server.max_form_bytes must be greater than zero");
        }
        if self.server.timeout_seconds == 0 {
            bail!("server.timeout_seconds must be greater than zero");
        }

        self.rate_limit.policy()?;

        if self.mail.transport == MailTransportKind::Smtp {
            if self.mail.server.trim().is_empty() {
                bail!("mail.server is required for the smtp transport");
            }
            if self.mail.sender().is_none() {
                bail!("mail.default_sender or mail.username is required for the smtp transport");
            }
            if self.mail.use_tls && self.mail.use_ssl {
                bail!("mail.use_tls and mail.use_ssl are mutually exclusive");
            }
        }

        if self.mail.check_deliverability && self.mail.dns_timeout_seconds == 0 {
            bail!("mail.dns_timeout_seconds must be greater than zero");
        }

        if let Some(recipient) = &self.contact.recipient {
            security::validate_email(recipient)
                .with_context(|| format!("invalid contact.recipient `{recipient}`"))?;
        }

        Ok(())
    }
}
