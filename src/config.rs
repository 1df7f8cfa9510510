use std::net::IpAddr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub host: IpAddr,
    pub port: u16,
    pub log_level: String,
    pub api_token: Option<String>,
    pub mailchimp: MailchimpConfig,
    pub queue: QueueSettings,
}

#[derive(Debug, Clone)]
pub struct MailchimpConfig {
    pub api_key: String,
    pub base_url: String,
}

/// Tunables for the batch processor, passed in at construction.
#[derive(Debug, Clone)]
pub struct QueueSettings {
    pub enabled: bool,
    pub max_batch_size: i64,
    pub max_retries: i32,
    pub small_queue_threshold: i64,
    pub quick_dispatch_delay: Duration,
    pub dispatch_interval: Duration,
    pub poll_delay: Duration,
    pub max_poll_attempts: u32,
    pub lock_lease: Duration,
    pub audience_pause: Duration,
    pub request_timeout: Duration,
    pub retention: Duration,
    pub stale_processing: Duration,
    pub vip_sources: Vec<String>,
    pub fail_fast_on_permanent: bool,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_batch_size: 500,
            max_retries: 3,
            small_queue_threshold: 10,
            quick_dispatch_delay: Duration::from_secs(30),
            dispatch_interval: Duration::from_secs(5 * 60),
            poll_delay: Duration::from_secs(60),
            max_poll_attempts: 120,
            lock_lease: Duration::from_secs(5 * 60),
            audience_pause: Duration::from_secs(1),
            request_timeout: Duration::from_secs(30),
            retention: Duration::from_secs(30 * 24 * 60 * 60),
            stale_processing: Duration::from_secs(6 * 60 * 60),
            vip_sources: Vec::new(),
            fail_fast_on_permanent: true,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let database_url = env_required("DATABASE_URL")?;

        let host: IpAddr = env_or("LISTQUEUE_HOST", "0.0.0.0")
            .parse()
            .map_err(|e| format!("Invalid LISTQUEUE_HOST: {e}"))?;

        let port: u16 = env_or("LISTQUEUE_PORT", "3000")
            .parse()
            .map_err(|e| format!("Invalid LISTQUEUE_PORT: {e}"))?;

        let log_level = env_or("LISTQUEUE_LOG_LEVEL", "info");

        let api_token = std::env::var("LISTQUEUE_API_TOKEN")
            .ok()
            .filter(|t| !t.trim().is_empty());

        let api_key = env_required("MAILCHIMP_API_KEY")?;
        let base_url = match std::env::var("MAILCHIMP_BASE_URL") {
            Ok(url) if !url.trim().is_empty() => url.trim_end_matches('/').to_string(),
            _ => mailchimp_base_url(&api_key)?,
        };

        let queue = QueueSettings::from_env()?;

        Ok(Config {
            database_url,
            host,
            port,
            log_level,
            api_token,
            mailchimp: MailchimpConfig { api_key, base_url },
            queue,
        })
    }
}

impl QueueSettings {
    pub fn from_env() -> Result<Self, String> {
        let defaults = QueueSettings::default();

        let enabled = match env_or("LISTQUEUE_ENABLED", "true").as_str() {
            "false" | "0" | "no" | "off" => false,
            _ => true,
        };

        let fail_fast_on_permanent = match env_or("LISTQUEUE_FAIL_FAST_PERMANENT", "true").as_str()
        {
            "false" | "0" | "no" | "off" => false,
            _ => true,
        };

        let vip_sources = env_or("LISTQUEUE_VIP_SOURCES", "")
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        Ok(QueueSettings {
            enabled,
            max_batch_size: env_parse("LISTQUEUE_MAX_BATCH_SIZE", defaults.max_batch_size)?.max(1),
            max_retries: env_parse("LISTQUEUE_MAX_RETRIES", defaults.max_retries)?.max(0),
            small_queue_threshold: env_parse(
                "LISTQUEUE_SMALL_QUEUE_THRESHOLD",
                defaults.small_queue_threshold,
            )?,
            quick_dispatch_delay: env_secs(
                "LISTQUEUE_QUICK_DISPATCH_SECS",
                defaults.quick_dispatch_delay,
            )?,
            dispatch_interval: env_secs(
                "LISTQUEUE_DISPATCH_INTERVAL_SECS",
                defaults.dispatch_interval,
            )?,
            poll_delay: env_secs("LISTQUEUE_POLL_DELAY_SECS", defaults.poll_delay)?,
            max_poll_attempts: env_parse("LISTQUEUE_MAX_POLL_ATTEMPTS", defaults.max_poll_attempts)?
                .max(1),
            lock_lease: env_secs("LISTQUEUE_LOCK_LEASE_SECS", defaults.lock_lease)?,
            audience_pause: Duration::from_millis(env_parse(
                "LISTQUEUE_AUDIENCE_PAUSE_MS",
                defaults.audience_pause.as_millis() as u64,
            )?),
            request_timeout: env_secs(
                "LISTQUEUE_REQUEST_TIMEOUT_SECS",
                defaults.request_timeout,
            )?,
            retention: scaled_secs(
                "LISTQUEUE_RETENTION_DAYS",
                env_parse("LISTQUEUE_RETENTION_DAYS", 30)?,
                24 * 60 * 60,
            )?,
            stale_processing: scaled_secs(
                "LISTQUEUE_STALE_PROCESSING_MINS",
                env_parse("LISTQUEUE_STALE_PROCESSING_MINS", 360)?,
                60,
            )?,
            vip_sources,
            fail_fast_on_permanent,
        })
    }
}

/// Mailchimp keys end in `-<datacenter>`, which selects the API host.
pub fn mailchimp_base_url(api_key: &str) -> Result<String, String> {
    let dc = api_key
        .rsplit_once('-')
        .map(|(_, dc)| dc)
        .filter(|dc| !dc.is_empty() && dc.chars().all(|c| c.is_ascii_alphanumeric()))
        .ok_or_else(|| "MAILCHIMP_API_KEY has no datacenter suffix (expected key-usNN)".to_string())?;
    Ok(format!("https://{dc}.api.mailchimp.com/3.0"))
}

fn env_required(key: &str) -> Result<String, String> {
    std::env::var(key).map_err(|_| format!("Missing required environment variable: {key}"))
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T>(key: &str, default: T) -> Result<T, String>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|e| format!("Invalid {key}: {e}")),
        Err(_) => Ok(default),
    }
}

/// `value` whole units of `unit_secs` seconds each.
fn scaled_secs(key: &str, value: u64, unit_secs: u64) -> Result<Duration, String> {
    value
        .checked_mul(unit_secs)
        .map(Duration::from_secs)
        .ok_or_else(|| format!("Invalid {key}: {value} is out of range"))
}

fn env_secs(key: &str, default: Duration) -> Result<Duration, String> {
    env_parse(key, default.as_secs()).map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_uses_datacenter_suffix() {
        assert_eq!(
            mailchimp_base_url("0123456789abcdef-us21").unwrap(),
            "https://us21.api.mailchimp.com/3.0"
        );
    }

    #[test]
    fn base_url_rejects_key_without_suffix() {
        assert!(mailchimp_base_url("0123456789abcdef").is_err());
        assert!(mailchimp_base_url("0123456789abcdef-").is_err());
    }

    #[test]
    fn scaled_durations_reject_overflow() {
        assert_eq!(
            scaled_secs("LISTQUEUE_RETENTION_DAYS", 30, 86_400).unwrap(),
            Duration::from_secs(30 * 86_400)
        );
        let err = scaled_secs("LISTQUEUE_RETENTION_DAYS", u64::MAX, 86_400).unwrap_err();
        assert!(err.contains("LISTQUEUE_RETENTION_DAYS"));
        assert!(scaled_secs("LISTQUEUE_STALE_PROCESSING_MINS", u64::MAX / 2, 60).is_err());
    }

    #[test]
    fn defaults_match_documented_values() {
        let settings = QueueSettings::default();
        assert_eq!(settings.max_batch_size, 500);
        assert_eq!(settings.max_retries, 3);
        assert_eq!(settings.small_queue_threshold, 10);
        assert_eq!(settings.retention, Duration::from_secs(30 * 86_400));
        assert_eq!(settings.lock_lease, Duration::from_secs(300));
    }
}
