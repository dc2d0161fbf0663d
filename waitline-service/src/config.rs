use std::{env, fmt::Display, str::FromStr};

use tracing::info;

/// Runtime settings shared by the API server and the queue workers.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub redis_host: String,
    pub redis_port: u16,
    pub max_seats: i32,
    pub service_time_seconds: i64,
    pub checkin_expiry_seconds: i64,
    pub max_party_name_length: usize,
    pub session_key: String,
    pub cookie_max_age_seconds: i64,
}

impl Config {
    pub fn load() -> Self {
        dotenvy::dotenv().ok();

        Self {
            bind_addr: try_load("BIND_ADDR", "0.0.0.0:8100"),
            redis_host: try_load("REDIS_HOST", "127.0.0.1"),
            redis_port: try_load("REDIS_PORT", "6379"),
            max_seats: try_load("MAX_SEATS", "10"),
            service_time_seconds: try_load("SERVICE_TIME_SECONDS", "15"),
            checkin_expiry_seconds: try_load("CHECKIN_EXPIRY_SECONDS", "60"),
            max_party_name_length: try_load("MAX_PARTY_NAME_LENGTH", "30"),
            session_key: try_load(
                "SESSION_KEY",
                "waitline-development-session-key-change-me",
            ),
            cookie_max_age_seconds: try_load("COOKIE_MAX_AGE_SECONDS", "86400"),
        }
    }

    pub fn redis_url(&self) -> String {
        format!("redis://{}:{}/", self.redis_host, self.redis_port)
    }
}

/// `DATABASE_URL` wins when set; otherwise the URL is composed from the
/// individual `DB_*` variables.
pub fn database_url() -> String {
    if let Ok(url) = env::var("DATABASE_URL") {
        return url;
    }

    let host: String = try_load("DB_HOST", "127.0.0.1");
    let port: u16 = try_load("DB_PORT", "5432");
    let user: String = try_load("DB_USER", "postgres");
    let password: String = try_load("DB_PASSWORD", "postgres");
    let name: String = try_load("DB_NAME", "waitline");
    format!("postgres://{user}:{password}@{host}:{port}/{name}")
}

fn try_load<T: FromStr>(key: &str, default: &str) -> T
where
    T::Err: Display,
{
    let raw = env::var(key).unwrap_or_else(|_| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    });
    raw.parse()
        .unwrap_or_else(|e| panic!("Invalid {key} value {raw:?}: {e}"))
}
