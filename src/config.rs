use clap::{Args, Parser};
use std::time::Duration;

// ============================================================================
// Service Configuration
// ============================================================================
//
// Flags with environment fallbacks. A `.env` file in the working directory
// is loaded first (see `Config::load`), so every value can come from there.
//
// ============================================================================

const MIN_JWT_SECRET_LEN: usize = 32;

/// Identity service: authentication, session rotation, user-event outbox
#[derive(Parser, Debug, Clone)]
#[command(name = "identity-service")]
#[command(about = "HTTP identity service with session rotation and a transactional outbox")]
pub struct Config {
    /// Address the HTTP server binds to
    #[arg(long, env = "HTTP_ADDR", default_value = "0.0.0.0:8080")]
    pub http_addr: String,

    /// Per-request deadline; exceeding it yields 504
    #[arg(long, env = "REQUEST_TIMEOUT", default_value = "5s", value_parser = humantime::parse_duration)]
    pub request_timeout: Duration,

    /// How long in-flight requests may drain after a shutdown signal
    #[arg(long, env = "SHUTDOWN_TIMEOUT", default_value = "5s", value_parser = humantime::parse_duration)]
    pub shutdown_timeout: Duration,

    #[command(flatten)]
    pub database: DatabaseSettings,

    #[command(flatten)]
    pub auth: AuthSettings,

    #[command(flatten)]
    pub kafka: KafkaSettings,

    #[command(flatten)]
    pub outbox: OutboxSettings,
}

#[derive(Args, Debug, Clone)]
pub struct DatabaseSettings {
    /// Postgres connection string
    #[arg(long = "database-url", env = "DATABASE_URL")]
    pub url: String,

    #[arg(long = "db-max-connections", env = "DB_MAX_CONNECTIONS", default_value_t = 10)]
    pub max_connections: u32,

    #[arg(long = "db-min-connections", env = "DB_MIN_CONNECTIONS", default_value_t = 1)]
    pub min_connections: u32,

    #[arg(long = "db-acquire-timeout", env = "DB_ACQUIRE_TIMEOUT", default_value = "3s", value_parser = humantime::parse_duration)]
    pub acquire_timeout: Duration,
}

#[derive(Args, Clone)]
pub struct AuthSettings {
    /// Shared HMAC secret for access tokens
    #[arg(long = "jwt-secret", env = "JWT_SECRET", hide_env_values = true)]
    pub jwt_secret: String,

    /// Lifetime of issued access tokens
    #[arg(long = "access-token-ttl", env = "ACCESS_TOKEN_TTL", default_value = "15m", value_parser = humantime::parse_duration)]
    pub access_token_ttl: Duration,
}

impl std::fmt::Debug for AuthSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSettings")
            .field("jwt_secret", &"<redacted>")
            .field("access_token_ttl", &self.access_token_ttl)
            .finish()
    }
}

#[derive(Args, Debug, Clone)]
pub struct KafkaSettings {
    /// Comma-separated bootstrap servers
    #[arg(long = "kafka-brokers", env = "KAFKA_BROKERS", default_value = "127.0.0.1:9092")]
    pub brokers: String,

    /// Topic user events are published to; must already exist
    #[arg(long = "kafka-users-topic", env = "KAFKA_USERS_TOPIC", default_value = "users")]
    pub users_topic: String,

    /// Upper bound for a single delivery report
    #[arg(long = "kafka-message-timeout", env = "KAFKA_MESSAGE_TIMEOUT", default_value = "5s", value_parser = humantime::parse_duration)]
    pub message_timeout: Duration,
}

#[derive(Args, Debug, Clone)]
pub struct OutboxSettings {
    /// Delay between dispatch cycles
    #[arg(long = "outbox-interval", env = "OUTBOX_INTERVAL", default_value = "5s", value_parser = humantime::parse_duration)]
    pub interval: Duration,

    /// Maximum rows pulled per cycle
    #[arg(long = "outbox-batch-size", env = "OUTBOX_BATCH_SIZE", default_value_t = 100,
          value_parser = clap::value_parser!(i64).range(1..=10_000))]
    pub batch_size: i64,

    /// Park rows after this many failed attempts; unbounded when unset
    #[arg(long = "outbox-max-attempts", env = "OUTBOX_MAX_ATTEMPTS",
          value_parser = clap::value_parser!(i32).range(1..))]
    pub max_attempts: Option<i32>,
}

impl Config {
    /// Load `.env` (if present), then parse flags and environment.
    pub fn load() -> anyhow::Result<Self> {
        match dotenvy::dotenv() {
            Ok(path) => tracing::debug!(path = %path.display(), "Loaded .env file"),
            Err(dotenvy::Error::Io(_)) => {}
            Err(e) => return Err(e.into()),
        }

        let config = Self::parse();
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.auth.jwt_secret.len() < MIN_JWT_SECRET_LEN {
            anyhow::bail!("JWT_SECRET must be at least {} bytes", MIN_JWT_SECRET_LEN);
        }
        if self.database.min_connections > self.database.max_connections {
            anyhow::bail!(
                "DB_MIN_CONNECTIONS ({}) exceeds DB_MAX_CONNECTIONS ({})",
                self.database.min_connections,
                self.database.max_connections
            );
        }
        if self.outbox.interval.is_zero() {
            anyhow::bail!("OUTBOX_INTERVAL must be greater than zero");
        }
        Ok(())
    }
}
