use std::env;
use std::net::SocketAddr;

use anyhow::{anyhow, Context, Result};
use dotenv::dotenv;

/// Identity every request is recorded under; there is no login.
pub const DEFAULT_USER_ID: &str = "default.user@example.com";
pub const DEFAULT_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: String,
    pub addr: SocketAddr,
    pub user_id: String,
    pub strict_validation: bool,
    pub max_connections: u32,
}

impl Settings {
    /// Reads the process environment after loading `.env`, if there is one.
    pub fn from_env() -> Result<Self> {
        dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let database_url = lookup("DATABASE_URL").context("DATABASE_URL env var must be set!")?;

        let addr = lookup("ALLOTMENT_ADDR")
            .unwrap_or_else(|| DEFAULT_ADDR.to_string())
            .parse::<SocketAddr>()
            .context("ALLOTMENT_ADDR must be a socket address like 0.0.0.0:8080")?;

        let user_id = lookup("ALLOTMENT_USER_ID")
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_USER_ID.to_string());

        let strict_validation = match lookup("ALLOTMENT_STRICT_VALIDATION") {
            Some(raw) => parse_flag(&raw).context("ALLOTMENT_STRICT_VALIDATION must be true or false")?,
            None => true,
        };

        let max_connections = match lookup("ALLOTMENT_MAX_CONNECTIONS") {
            Some(raw) => raw
                .parse::<u32>()
                .context("ALLOTMENT_MAX_CONNECTIONS must be a positive integer")?,
            None => DEFAULT_MAX_CONNECTIONS,
        };
        if max_connections == 0 {
            return Err(anyhow!("ALLOTMENT_MAX_CONNECTIONS must be at least 1"));
        }

        Ok(Settings {
            database_url,
            addr,
            user_id,
            strict_validation,
            max_connections,
        })
    }
}

fn parse_flag(raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(anyhow!("unrecognised flag value {:?}", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(vars: &[(&str, &str)]) -> Result<Settings> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() -> Result<()> {
        let settings = settings(&[("DATABASE_URL", "sqlite://allotment.db")])?;

        assert_eq!(settings.database_url, "sqlite://allotment.db");
        assert_eq!(settings.addr, "0.0.0.0:8080".parse::<SocketAddr>()?);
        assert_eq!(settings.user_id, DEFAULT_USER_ID);
        assert!(settings.strict_validation);
        assert_eq!(settings.max_connections, DEFAULT_MAX_CONNECTIONS);

        Ok(())
    }

    #[test]
    fn test_overrides() -> Result<()> {
        let settings = settings(&[
            ("DATABASE_URL", "sqlite::memory:"),
            ("ALLOTMENT_ADDR", "127.0.0.1:3333"),
            ("ALLOTMENT_USER_ID", "sam@example.com"),
            ("ALLOTMENT_STRICT_VALIDATION", "off"),
            ("ALLOTMENT_MAX_CONNECTIONS", "1"),
        ])?;

        assert_eq!(settings.addr.port(), 3333);
        assert_eq!(settings.user_id, "sam@example.com");
        assert!(!settings.strict_validation);
        assert_eq!(settings.max_connections, 1);

        Ok(())
    }

    #[test]
    fn test_missing_database_url() {
        assert!(settings(&[]).is_err());
    }

    #[test]
    fn test_bad_values() {
        assert!(settings(&[("DATABASE_URL", "x"), ("ALLOTMENT_ADDR", "nowhere")]).is_err());
        assert!(settings(&[("DATABASE_URL", "x"), ("ALLOTMENT_STRICT_VALIDATION", "maybe")]).is_err());
        assert!(settings(&[("DATABASE_URL", "x"), ("ALLOTMENT_MAX_CONNECTIONS", "0")]).is_err());
    }
}
