use std::env;
use std::str::FromStr;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub jwt_secret: String,
    pub redis_url: Option<String>,
    pub realtime_webhook_url: Option<String>,
    pub publish_timeout_ms: u64,
    pub hold_ttl_min_seconds: i64,
    pub hold_ttl_max_seconds: i64,
    pub hold_ttl_default_seconds: i64,
    pub daily_booking_limit: usize,
    pub grace_period_minutes: i64,
    pub average_minutes_per_patient: i64,
    pub clinic_utc_offset_minutes: i32,
    pub port: u16,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            redis_url: None,
            realtime_webhook_url: None,
            publish_timeout_ms: 2000,
            hold_ttl_min_seconds: 30,
            hold_ttl_max_seconds: 180,
            hold_ttl_default_seconds: 60,
            daily_booking_limit: 3,
            grace_period_minutes: 10,
            average_minutes_per_patient: 15,
            clinic_utc_offset_minutes: 0,
            port: 3000,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let config = Self {
            jwt_secret: env::var("JWT_SECRET")
                .unwrap_or_else(|_| {
                    warn!("JWT_SECRET not set, using empty value");
                    String::new()
                }),
            redis_url: optional_var("REDIS_URL"),
            realtime_webhook_url: optional_var("REALTIME_WEBHOOK_URL"),
            publish_timeout_ms: parsed_var("PUBLISH_TIMEOUT_MS", defaults.publish_timeout_ms),
            hold_ttl_min_seconds: parsed_var("HOLD_TTL_MIN_SECONDS", defaults.hold_ttl_min_seconds),
            hold_ttl_max_seconds: parsed_var("HOLD_TTL_MAX_SECONDS", defaults.hold_ttl_max_seconds),
            hold_ttl_default_seconds: parsed_var("HOLD_TTL_DEFAULT_SECONDS", defaults.hold_ttl_default_seconds),
            daily_booking_limit: parsed_var("DAILY_BOOKING_LIMIT", defaults.daily_booking_limit),
            grace_period_minutes: parsed_var("GRACE_PERIOD_MINUTES", defaults.grace_period_minutes),
            average_minutes_per_patient: parsed_var("AVERAGE_MINUTES_PER_PATIENT", defaults.average_minutes_per_patient),
            clinic_utc_offset_minutes: parsed_var("CLINIC_UTC_OFFSET_MINUTES", defaults.clinic_utc_offset_minutes),
            port: parsed_var("PORT", defaults.port),
        };

        let config = config.with_valid_hold_window();

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        if config.redis_url.is_none() {
            warn!("REDIS_URL not set, scheduling state will be kept in process memory");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.jwt_secret.is_empty()
    }

    /// Clamp a requested hold lifetime into the configured window.
    pub fn clamp_hold_ttl(&self, requested: Option<i64>) -> i64 {
        requested
            .unwrap_or(self.hold_ttl_default_seconds)
            .max(self.hold_ttl_min_seconds)
            .min(self.hold_ttl_max_seconds)
    }

    /// Fall back to the default hold window when the configured bounds are inverted.
    pub fn with_valid_hold_window(mut self) -> Self {
        if self.hold_ttl_min_seconds > self.hold_ttl_max_seconds {
            let defaults = Self::default();
            warn!(
                "HOLD_TTL_MIN_SECONDS ({}) exceeds HOLD_TTL_MAX_SECONDS ({}), using {}..{}",
                self.hold_ttl_min_seconds,
                self.hold_ttl_max_seconds,
                defaults.hold_ttl_min_seconds,
                defaults.hold_ttl_max_seconds
            );
            self.hold_ttl_min_seconds = defaults.hold_ttl_min_seconds;
            self.hold_ttl_max_seconds = defaults.hold_ttl_max_seconds;
        }
        self
    }
}

fn optional_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parsed_var<T: FromStr + Copy + std::fmt::Display>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("{} has invalid value {:?}, using default {}", key, raw, default);
            default
        }),
        Err(_) => default,
    }
}
