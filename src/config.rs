//! Process configuration, read once from the environment at start-up.

use std::collections::HashMap;
use std::io::Read;

use anyhow::{Context, Result, bail};

/// Upper bound on pooled connections.
pub const POOL_MAX_SIZE: usize = 10;

/// Transport the MCP service is exposed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// Streamable HTTP on `HOST:PORT`.
    Http,
    /// stdin/stdout.
    Stdio,
}

/// Connection settings for the PostgreSQL server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PgSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    /// Database the shared pool is bound to.
    pub database: String,
    /// Database that `create_database` connects to.
    pub bootstrap_database: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub pg: PgSettings,
    pub listen_host: String,
    pub listen_port: u16,
    pub transport: Transport,
}

impl Config {
    /// Load configuration from process environment variables, falling back
    /// to a `.env` file for anything the environment leaves unset.
    pub fn from_env() -> Result<Self> {
        let dotenv = load_dotenv(dotenvy::dotenv_iter())?;
        Self::from_lookup(|key| std::env::var(key).ok().or_else(|| dotenv.get(key).cloned()))
    }

    /// Build a configuration from an arbitrary key lookup, applying defaults
    /// for anything missing.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let pg = PgSettings {
            host: get("PG_HOST", "localhost"),
            port: parse_port(&get("PG_PORT", "5432")).context("Invalid PG_PORT")?,
            user: get("PG_USER", "postgres"),
            password: get("PG_PASSWORD", ""),
            database: get("PG_DATABASE", "postgres"),
            bootstrap_database: get("PG_BOOTSTRAP_DATABASE", "postgres"),
        };

        let transport = match get("MCP_TRANSPORT", "http").to_ascii_lowercase().as_str() {
            "http" | "sse" | "streamable-http" => Transport::Http,
            "stdio" => Transport::Stdio,
            other => bail!("Unknown MCP_TRANSPORT '{other}', expected 'http' or 'stdio'"),
        };

        Ok(Self {
            pg,
            listen_host: get("HOST", "::"),
            listen_port: parse_port(&get("PORT", "8054")).context("Invalid PORT")?,
            transport,
        })
    }
}

/// Pairs from a `.env` file. A missing file yields none.
fn load_dotenv<R: Read>(
    file: dotenvy::Result<dotenvy::Iter<R>>,
) -> Result<HashMap<String, String>> {
    match file {
        Ok(pairs) => pairs.collect::<Result<_, _>>().context("Malformed .env file"),
        Err(e) if e.not_found() => Ok(HashMap::new()),
        Err(e) => Err(e).context("Failed to read .env file"),
    }
}

fn parse_port(raw: &str) -> Result<u16> {
    raw.trim()
        .parse::<u16>()
        .with_context(|| format!("'{raw}' is not a valid port number"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.pg.host, "localhost");
        assert_eq!(config.pg.port, 5432);
        assert_eq!(config.pg.user, "postgres");
        assert_eq!(config.pg.password, "");
        assert_eq!(config.pg.database, "postgres");
        assert_eq!(config.pg.bootstrap_database, "postgres");
        assert_eq!(config.listen_host, "::");
        assert_eq!(config.listen_port, 8054);
        assert_eq!(config.transport, Transport::Http);
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("PG_HOST", "db.internal"),
            ("PG_PORT", "6543"),
            ("PG_DATABASE", "app"),
            ("PORT", "9000"),
            ("MCP_TRANSPORT", "STDIO"),
        ])
        .unwrap();
        assert_eq!(config.pg.host, "db.internal");
        assert_eq!(config.pg.port, 6543);
        assert_eq!(config.pg.database, "app");
        assert_eq!(config.listen_port, 9000);
        assert_eq!(config.transport, Transport::Stdio);
    }

    #[test]
    fn test_invalid_values() {
        assert!(config_from(&[("PG_PORT", "not-a-port")]).is_err());
        assert!(config_from(&[("PORT", "70000")]).is_err());
        assert!(config_from(&[("MCP_TRANSPORT", "carrier-pigeon")]).is_err());
    }

    #[test]
    fn test_dotenv_fills_unset_variables() {
        let contents = "# local overrides\nPG_HOST=db.from-file\nPORT=9001\nPG_USER=\"file user\"\n";
        let dotenv = load_dotenv(Ok(dotenvy::from_read_iter(contents.as_bytes()))).unwrap();
        assert_eq!(dotenv.len(), 3);

        // The environment wins over the file.
        let env: HashMap<&str, &str> = [("PG_HOST", "db.from-env")].into();
        let config = Config::from_lookup(|key| {
            env.get(key)
                .map(|v| v.to_string())
                .or_else(|| dotenv.get(key).cloned())
        })
        .unwrap();
        assert_eq!(config.pg.host, "db.from-env");
        assert_eq!(config.pg.user, "file user");
        assert_eq!(config.listen_port, 9001);
    }

    #[test]
    fn test_missing_dotenv_is_empty() {
        let missing = dotenvy::from_path_iter("/nonexistent/postgres-mcp/.env");
        assert!(load_dotenv(missing).unwrap().is_empty());

        let malformed = dotenvy::from_read_iter("NOT A PAIR\n".as_bytes());
        assert!(load_dotenv(Ok(malformed)).is_err());
    }
}
