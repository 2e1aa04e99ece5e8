/// Configuration management for the API server
///
/// This module loads configuration from environment variables and provides
/// a type-safe configuration struct.
///
/// # Environment Variables
///
/// - `DATABASE_URL`: PostgreSQL connection string (required)
/// - `REDIS_URL`: Redis connection string (default: redis://127.0.0.1:6379)
/// - `API_HOST`: Host to bind to (default: 0.0.0.0)
/// - `API_PORT`: Port to bind to (default: 8080)
/// - `APP_ENV`: Deployment environment (production | staging | development)
/// - `CORS_ORIGINS`: Comma-separated allowed origins (default: *)
/// - `RATE_LIMIT_PER_MINUTE`: Tenant-write limit per window (default: 60)
/// - `RATE_LIMIT_ENV_MULTIPLIER`: Limit multiplier outside production (default: 3)
/// - `LOGIN_RATE_LIMIT`: Login attempts per IP per window (default: 10)
/// - `RUST_LOG`: Log level (default: info)
///
/// # Example
///
/// ```no_run
/// use supportline_api::config::Config;
///
/// # fn example() -> anyhow::Result<()> {
/// let config = Config::from_env()?;
/// println!("Server will listen on {}:{}", config.api.host, config.api.port);
/// # Ok(())
/// # }
/// ```

use serde::{Deserialize, Serialize};
use std::env;

/// Deployment environment.
///
/// Non-production environments run with widened rate limits so load tests
/// and integration suites do not trip the limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Production: limits apply exactly as configured
    Production,

    /// Staging: limits widened by the multiplier
    Staging,

    /// Development: limits widened by the multiplier
    Development,
}

impl Environment {
    fn parse(s: &str) -> Self {
        match s {
            "production" | "prod" => Environment::Production,
            "staging" => Environment::Staging,
            _ => Environment::Development,
        }
    }
}

/// Complete application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// API server configuration
    pub api: ApiConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Redis connection URL
    pub redis_url: String,

    /// Deployment environment
    pub environment: Environment,

    /// Rate limiting configuration
    pub rate_limit: RateLimitConfig,
}

/// API server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Host to bind to
    pub host: String,

    /// Port to bind to
    pub port: u16,

    /// Allowed CORS origins; "*" means permissive (development only)
    pub cors_origins: Vec<String>,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,

    /// Maximum number of connections in pool
    pub max_connections: u32,
}

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Tenant-write requests allowed per window
    pub per_minute: u32,

    /// Multiplier applied outside production
    pub env_multiplier: u32,

    /// Login attempts allowed per IP per window
    pub login_per_window: u32,
}

impl Config {
    /// Loads configuration from environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing or
    /// have invalid values.
    pub fn from_env() -> anyhow::Result<Self> {
        // Load .env file if present (for development)
        dotenvy::dotenv().ok();

        let api_host = env::var("API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let api_port = env::var("API_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse::<u16>()?;

        let database_url = env::var("DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("DATABASE_URL environment variable is required"))?;

        let max_connections = env::var("DATABASE_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "10".to_string())
            .parse::<u32>()?;

        let redis_url =
            env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());

        let cors_origins: Vec<String> = env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "*".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let environment = Environment::parse(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let per_minute = env::var("RATE_LIMIT_PER_MINUTE")
            .unwrap_or_else(|_| "60".to_string())
            .parse::<u32>()?;

        let env_multiplier = env::var("RATE_LIMIT_ENV_MULTIPLIER")
            .unwrap_or_else(|_| "3".to_string())
            .parse::<u32>()?;

        let login_per_window = env::var("LOGIN_RATE_LIMIT")
            .unwrap_or_else(|_| "10".to_string())
            .parse::<u32>()?;

        Ok(Self {
            api: ApiConfig {
                host: api_host,
                port: api_port,
                cors_origins,
            },
            database: DatabaseConfig {
                url: database_url,
                max_connections,
            },
            redis_url,
            environment,
            rate_limit: RateLimitConfig {
                per_minute,
                env_multiplier,
                login_per_window,
            },
        })
    }

    /// Returns the server bind address
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.api.host, self.api.port)
    }

    /// Effective rate-limit multiplier for this environment.
    pub fn rate_limit_multiplier(&self) -> u32 {
        match self.environment {
            Environment::Production => 1,
            Environment::Staging | Environment::Development => self.rate_limit.env_multiplier,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(environment: Environment) -> Config {
        Config {
            api: ApiConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
                cors_origins: vec!["*".to_string()],
            },
            database: DatabaseConfig {
                url: "postgresql://localhost/test".to_string(),
                max_connections: 10,
            },
            redis_url: "redis://127.0.0.1:6379".to_string(),
            environment,
            rate_limit: RateLimitConfig {
                per_minute: 60,
                env_multiplier: 3,
                login_per_window: 10,
            },
        }
    }

    #[test]
    fn test_bind_address() {
        assert_eq!(
            test_config(Environment::Production).bind_address(),
            "127.0.0.1:8080"
        );
    }

    #[test]
    fn test_environment_parse() {
        assert_eq!(Environment::parse("production"), Environment::Production);
        assert_eq!(Environment::parse("prod"), Environment::Production);
        assert_eq!(Environment::parse("staging"), Environment::Staging);
        assert_eq!(Environment::parse("development"), Environment::Development);
        assert_eq!(Environment::parse("anything-else"), Environment::Development);
    }

    #[test]
    fn test_multiplier_only_widens_outside_production() {
        assert_eq!(test_config(Environment::Production).rate_limit_multiplier(), 1);
        assert_eq!(test_config(Environment::Staging).rate_limit_multiplier(), 3);
        assert_eq!(
            test_config(Environment::Development).rate_limit_multiplier(),
            3
        );
    }
}
