use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Runtime settings, read from the environment (after `.env` is loaded).
#[derive(Debug, Clone)]
pub struct Config {
    pub api_url: String,
    pub email: Option<String>,
    pub password: Option<String>,
    pub db_path: PathBuf,
    pub port: u16,
    pub http_timeout: Duration,
    pub read_only: bool,
    pub device_token: Option<String>,
    pub device_platform: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let Some(api_url) = var("PORTAL_API_URL") else {
            bail!("PORTAL_API_URL is not set");
        };

        let db_path = match var("PORTAL_DB_PATH") {
            Some(path) => PathBuf::from(path),
            None => {
                // We use ~/.employee-portal/portal.db
                let home_dir = var("HOME").unwrap_or_else(|| ".".into());
                PathBuf::from(home_dir)
                    .join(".employee-portal")
                    .join("portal.db")
            }
        };

        let port = match var("PORTAL_PORT") {
            Some(port) => port.parse().context("PORTAL_PORT must be a port number")?,
            None => 3000,
        };

        let timeout_secs: u64 = match var("PORTAL_HTTP_TIMEOUT_SECS") {
            Some(secs) => secs
                .parse()
                .context("PORTAL_HTTP_TIMEOUT_SECS must be a whole number of seconds")?,
            None => 30,
        };

        let read_only = match var("PORTAL_READ_ONLY").as_deref() {
            None | Some("0") | Some("false") | Some("no") => false,
            Some("1") | Some("true") | Some("yes") => true,
            Some(other) => bail!("PORTAL_READ_ONLY must be true or false, got {:?}", other),
        };

        Ok(Self {
            api_url,
            email: var("PORTAL_EMAIL"),
            password: lookup("PORTAL_PASSWORD").filter(|p| !p.is_empty()),
            db_path,
            port,
            http_timeout: Duration::from_secs(timeout_secs),
            read_only,
            device_token: var("PORTAL_DEVICE_TOKEN"),
            device_platform: var("PORTAL_DEVICE_PLATFORM").unwrap_or_else(|| "linux".into()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let config = config(&[("PORTAL_API_URL", "https://portal.example"), ("HOME", "/home/ada")]).unwrap();

        assert_eq!(config.api_url, "https://portal.example");
        assert_eq!(config.db_path, PathBuf::from("/home/ada/.employee-portal/portal.db"));
        assert_eq!(config.port, 3000);
        assert_eq!(config.http_timeout, Duration::from_secs(30));
        assert!(!config.read_only);
        assert_eq!(config.email, None);
        assert_eq!(config.device_platform, "linux");
    }

    #[test]
    fn overrides() {
        let config = config(&[
            ("PORTAL_API_URL", "http://localhost:8000"),
            ("PORTAL_DB_PATH", "/tmp/p.db"),
            ("PORTAL_PORT", "4100"),
            ("PORTAL_HTTP_TIMEOUT_SECS", "5"),
            ("PORTAL_READ_ONLY", "true"),
            ("PORTAL_EMAIL", "ada@corp.io"),
            ("PORTAL_PASSWORD", " spaced "),
            ("PORTAL_DEVICE_TOKEN", "dev-1"),
        ])
        .unwrap();

        assert_eq!(config.port, 4100);
        assert_eq!(config.http_timeout, Duration::from_secs(5));
        assert!(config.read_only);
        assert_eq!(config.password.as_deref(), Some(" spaced "));
        assert_eq!(config.device_token.as_deref(), Some("dev-1"));
        assert_eq!(config.db_path, PathBuf::from("/tmp/p.db"));
    }

    #[test]
    fn rejects_bad_values() {
        assert!(config(&[]).is_err());
        assert!(config(&[("PORTAL_API_URL", "x"), ("PORTAL_PORT", "port")]).is_err());
        assert!(config(&[("PORTAL_API_URL", "x"), ("PORTAL_READ_ONLY", "maybe")]).is_err());
    }
}
