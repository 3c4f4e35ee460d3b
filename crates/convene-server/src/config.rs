use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, bail};

use convene_api::geocode::DEFAULT_GEOCODER_URL;
use convene_db::DatabaseTarget;

/// Process configuration, read once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub database: DatabaseTarget,
    /// Empty means any origin.
    pub allowed_origins: Vec<String>,
    pub public_url: String,
    pub upload_dir: PathBuf,
    pub static_dir: PathBuf,
    pub geocoder_url: String,
    pub seed_dev_users: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8000,
            database: DatabaseTarget::Sqlite(PathBuf::from("social.db")),
            allowed_origins: Vec::new(),
            public_url: "http://localhost:8000".into(),
            upload_dir: PathBuf::from("./uploads"),
            static_dir: PathBuf::from("./static"),
            geocoder_url: DEFAULT_GEOCODER_URL.into(),
            seed_dev_users: false,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let port = match var("CONVENE_PORT") {
            Some(raw) => raw
                .trim()
                .parse()
                .with_context(|| format!("CONVENE_PORT is not a valid port: {raw}"))?,
            None => defaults.port,
        };

        let database_url = var("DATABASE_URL");
        if let Some(url) = &database_url {
            if !is_postgres_url(url) {
                bail!("DATABASE_URL must start with postgres:// or postgresql://");
            }
        }
        let sqlite_path = var("CONVENE_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("social.db"));

        let origins = var("FRONTEND_ORIGINS").or_else(|| var("FRONTEND_ORIGIN"));

        Ok(Self {
            host: var("CONVENE_HOST").unwrap_or(defaults.host),
            port,
            database: DatabaseTarget::select(database_url, sqlite_path),
            allowed_origins: origins.as_deref().map(parse_origins).unwrap_or_default(),
            public_url: var("BACKEND_PUBLIC_URL")
                .map(|url| url.trim().trim_end_matches('/').to_string())
                .unwrap_or_else(|| format!("http://localhost:{port}")),
            upload_dir: var("CONVENE_UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.upload_dir),
            static_dir: var("CONVENE_STATIC_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.static_dir),
            geocoder_url: var("GEOCODER_URL").unwrap_or(defaults.geocoder_url),
            seed_dev_users: var("CONVENE_SEED_DEV_USERS")
                .map(|v| parse_flag(&v))
                .unwrap_or(false),
        })
    }

    pub fn bind_addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid bind address {}:{}", self.host, self.port))
    }
}

fn is_postgres_url(url: &str) -> bool {
    let url = url.trim();
    url.starts_with("postgres://") || url.starts_with("postgresql://")
}

/// Comma-separated list; trailing slashes are dropped so values match the
/// browser's `Origin` header.
pub fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|o| o.trim().trim_end_matches('/'))
        .filter(|o| !o.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(pairs: &[(&str, &str)]) -> anyhow::Result<ServerConfig> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn empty_environment_gives_defaults() {
        assert_eq!(config(&[]).unwrap(), ServerConfig::default());
    }

    #[test]
    fn public_url_follows_port() {
        let cfg = config(&[("CONVENE_PORT", "9100")]).unwrap();
        assert_eq!(cfg.port, 9100);
        assert_eq!(cfg.public_url, "http://localhost:9100");

        let cfg = config(&[("BACKEND_PUBLIC_URL", "https://api.example.org/")]).unwrap();
        assert_eq!(cfg.public_url, "https://api.example.org");
    }

    #[test]
    fn database_url_selects_postgres() {
        let cfg = config(&[
            ("DATABASE_URL", "postgres://u:p@db/convene"),
            ("CONVENE_DB_PATH", "ignored.db"),
        ])
        .unwrap();
        assert_eq!(
            cfg.database,
            DatabaseTarget::Postgres("postgres://u:p@db/convene".into())
        );

        let cfg = config(&[("DATABASE_URL", " "), ("CONVENE_DB_PATH", "local.db")]).unwrap();
        assert_eq!(cfg.database, DatabaseTarget::Sqlite(PathBuf::from("local.db")));

        assert!(config(&[("DATABASE_URL", "mysql://db")]).is_err());
    }

    #[test]
    fn origins_prefer_the_plural_variable() {
        let cfg = config(&[
            ("FRONTEND_ORIGINS", "https://a.example, https://b.example/ ,"),
            ("FRONTEND_ORIGIN", "https://c.example"),
        ])
        .unwrap();
        assert_eq!(cfg.allowed_origins, vec!["https://a.example", "https://b.example"]);

        let cfg = config(&[("FRONTEND_ORIGIN", "https://c.example")]).unwrap();
        assert_eq!(cfg.allowed_origins, vec!["https://c.example"]);
    }

    #[test]
    fn bad_port_is_an_error() {
        assert!(config(&[("CONVENE_PORT", "eighty")]).is_err());
    }

    #[test]
    fn flags() {
        assert!(parse_flag("TRUE"));
        assert!(parse_flag(" 1 "));
        assert!(!parse_flag("no"));
        assert!(!parse_flag(""));
    }
}
