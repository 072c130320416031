use dotenvy::dotenv;
use std::env;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub stripe: StripeConfig,
    pub service: ServiceConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    pub webhook_secret: Option<String>,
    pub success_url: String,
    pub cancel_url: String,
    /// Price of a license in the smallest currency unit.
    pub license_price_cents: i64,
    pub currency: String,
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub ticket_prefix: String,
    pub activation_code_lifetime_hours: i64,
    pub service_interval_days: i64,
    pub registry_base_url: String,
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        dotenv().ok();

        Ok(Self {
            server: ServerConfig {
                host: env_or("SERVER_HOST", "0.0.0.0"),
                port: env_or("SERVER_PORT", "8080").parse()?,
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL")?,
                max_connections: env_or("DATABASE_MAX_CONNECTIONS", "10").parse()?,
            },
            stripe: StripeConfig {
                secret_key: env_or("STRIPE_SECRET_KEY", ""),
                webhook_secret: env::var("STRIPE_WEBHOOK_SECRET").ok(),
                success_url: env_or(
                    "STRIPE_SUCCESS_URL",
                    "http://localhost:5173/activate?session_id={CHECKOUT_SESSION_ID}",
                ),
                cancel_url: env_or("STRIPE_CANCEL_URL", "http://localhost:5173/pricing"),
                license_price_cents: env_or("LICENSE_PRICE_CENTS", "49900").parse()?,
                currency: env_or("LICENSE_CURRENCY", "pln"),
            },
            service: ServiceConfig {
                ticket_prefix: env_or("TICKET_PREFIX", "ZGL"),
                activation_code_lifetime_hours: env_or("ACTIVATION_CODE_LIFETIME_HOURS", "48")
                    .parse()?,
                service_interval_days: env_or("SERVICE_INTERVAL_DAYS", "365").parse()?,
                registry_base_url: env_or(
                    "REGISTRY_BASE_URL",
                    "https://wl-api.mf.gov.pl/api/search/nip",
                ),
            },
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}
