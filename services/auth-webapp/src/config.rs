//! Configuration types and loading
//!
//! Config precedence: env vars > config file > defaults. The required
//! settings (`SQLITE_FILE`, `AUTH_ID`, `AUTH_SECRET`, `AUTH_REDIRECTURL`) may
//! come from either source but must be present after merging. The client
//! secret is read from `AUTH_SECRET` or from `oauth.client_secret_file`,
//! never from the TOML body itself.

use common::Secret;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_MAX_CONNECTIONS: usize = 1000;
const DEFAULT_EXCHANGE_TIMEOUT_SECS: u64 = 30;
const DEFAULT_STATE_TTL_SECS: u64 = 600;

/// Root configuration
#[derive(Debug)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub oauth: OAuthConfig,
}

/// HTTP listener settings
#[derive(Debug)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub max_connections: usize,
}

/// Credential database location
#[derive(Debug)]
pub struct StorageConfig {
    pub sqlite_file: PathBuf,
}

/// Reddit application credentials and flow tuning
#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: Secret<String>,
    pub redirect_url: String,
    pub exchange_timeout: Duration,
    pub state_ttl: Duration,
}

/// On-disk TOML layout. Every field is optional so env vars can fill gaps.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    server: FileServer,
    storage: FileStorage,
    oauth: FileOAuth,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileServer {
    listen_addr: Option<SocketAddr>,
    max_connections: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileStorage {
    sqlite_file: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileOAuth {
    client_id: Option<String>,
    /// Path to a file containing the client secret (alternative to AUTH_SECRET)
    client_secret_file: Option<PathBuf>,
    redirect_url: Option<String>,
    exchange_timeout_secs: Option<u64>,
    state_ttl_secs: Option<u64>,
}

impl Config {
    /// Load configuration from an optional TOML file, then overlay the
    /// process environment.
    pub fn load(path: Option<&Path>) -> common::Result<Self> {
        Self::load_with(path, |key| std::env::var(key).ok())
    }

    /// Same as `load` with an injectable env lookup.
    pub fn load_with(
        path: Option<&Path>,
        get: impl Fn(&str) -> Option<String>,
    ) -> common::Result<Self> {
        let file: FileConfig = match path {
            Some(path) => toml::from_str(&std::fs::read_to_string(path)?)?,
            None => FileConfig::default(),
        };
        let env = |key: &str| {
            get(key)
                .map(|v| v.trim().to_owned())
                .filter(|v| !v.is_empty())
        };

        let listen_addr = match env("LISTEN_ADDR") {
            Some(raw) => parse_setting("LISTEN_ADDR", &raw)?,
            None => match file.server.listen_addr {
                Some(addr) => addr,
                None => parse_setting("LISTEN_ADDR", DEFAULT_LISTEN_ADDR)?,
            },
        };

        let max_connections = match env("MAX_CONNECTIONS") {
            Some(raw) => parse_setting("MAX_CONNECTIONS", &raw)?,
            None => file
                .server
                .max_connections
                .unwrap_or(DEFAULT_MAX_CONNECTIONS),
        };

        let sqlite_file = env("SQLITE_FILE")
            .map(PathBuf::from)
            .or(file.storage.sqlite_file)
            .ok_or(common::Error::Missing("SQLITE_FILE"))?;

        let client_id = env("AUTH_ID")
            .or(file.oauth.client_id)
            .ok_or(common::Error::Missing("AUTH_ID"))?;

        let redirect_url = env("AUTH_REDIRECTURL")
            .or(file.oauth.redirect_url)
            .ok_or(common::Error::Missing("AUTH_REDIRECTURL"))?;

        // Secret resolution: env var takes precedence over file
        let client_secret = match env("AUTH_SECRET") {
            Some(secret) => Secret::new(secret),
            None => match file.oauth.client_secret_file {
                Some(ref secret_file) => Secret::read_from(secret_file)
                    .map_err(|e| {
                        common::Error::Config(format!(
                            "failed to read client_secret_file {}: {e}",
                            secret_file.display()
                        ))
                    })?
                    .ok_or(common::Error::Missing("AUTH_SECRET"))?,
                None => return Err(common::Error::Missing("AUTH_SECRET")),
            },
        };

        let exchange_timeout_secs = match env("EXCHANGE_TIMEOUT_SECS") {
            Some(raw) => parse_setting("EXCHANGE_TIMEOUT_SECS", &raw)?,
            None => file
                .oauth
                .exchange_timeout_secs
                .unwrap_or(DEFAULT_EXCHANGE_TIMEOUT_SECS),
        };

        let state_ttl_secs = match env("STATE_TTL_SECS") {
            Some(raw) => parse_setting("STATE_TTL_SECS", &raw)?,
            None => file.oauth.state_ttl_secs.unwrap_or(DEFAULT_STATE_TTL_SECS),
        };

        if !redirect_url.starts_with("http://") && !redirect_url.starts_with("https://") {
            return Err(common::Error::Config(format!(
                "redirect url must start with http:// or https://, got: {redirect_url}"
            )));
        }
        if max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }
        if exchange_timeout_secs == 0 {
            return Err(common::Error::Config(
                "exchange_timeout_secs must be greater than 0".into(),
            ));
        }
        if state_ttl_secs == 0 {
            return Err(common::Error::Config(
                "state_ttl_secs must be greater than 0".into(),
            ));
        }

        Ok(Config {
            server: ServerConfig {
                listen_addr,
                max_connections,
            },
            storage: StorageConfig { sqlite_file },
            oauth: OAuthConfig {
                client_id,
                client_secret,
                redirect_url,
                exchange_timeout: Duration::from_secs(exchange_timeout_secs),
                state_ttl: Duration::from_secs(state_ttl_secs),
            },
        })
    }

    /// Resolve the optional config file path from CLI arg or CONFIG_PATH.
    pub fn resolve_path(cli_path: Option<&str>) -> Option<PathBuf> {
        Self::resolve_path_with(cli_path, |key| std::env::var(key).ok())
    }

    fn resolve_path_with(
        cli_path: Option<&str>,
        get: impl Fn(&str) -> Option<String>,
    ) -> Option<PathBuf> {
        cli_path
            .map(PathBuf::from)
            .or_else(|| get("CONFIG_PATH").map(PathBuf::from))
    }
}

fn parse_setting<T>(key: &str, raw: &str) -> common::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse::<T>()
        .map_err(|e| common::Error::Config(format!("invalid {key} {raw:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn required_env() -> Vec<(&'static str, &'static str)> {
        vec![
            ("SQLITE_FILE", "/var/lib/reddit-auth/tokens.db"),
            ("AUTH_ID", "app-id"),
            ("AUTH_SECRET", "app-secret"),
            ("AUTH_REDIRECTURL", "http://localhost:8080/auth/callback"),
        ]
    }

    #[test]
    fn env_only_config_uses_defaults() {
        let config = Config::load_with(None, env_of(&required_env())).unwrap();
        assert_eq!(
            config.storage.sqlite_file,
            PathBuf::from("/var/lib/reddit-auth/tokens.db")
        );
        assert_eq!(config.oauth.client_id, "app-id");
        assert_eq!(config.oauth.client_secret.expose(), "app-secret");
        assert_eq!(
            config.oauth.redirect_url,
            "http://localhost:8080/auth/callback"
        );
        assert_eq!(config.server.listen_addr.port(), 8080);
        assert_eq!(config.server.max_connections, 1000);
        assert_eq!(config.oauth.exchange_timeout, Duration::from_secs(30));
        assert_eq!(config.oauth.state_ttl, Duration::from_secs(600));
    }

    #[test]
    fn each_required_setting_is_enforced() {
        for missing in ["SQLITE_FILE", "AUTH_ID", "AUTH_SECRET", "AUTH_REDIRECTURL"] {
            let pairs: Vec<_> = required_env()
                .into_iter()
                .filter(|(k, _)| *k != missing)
                .collect();
            let err = Config::load_with(None, env_of(&pairs)).unwrap_err();
            assert!(
                matches!(err, common::Error::Missing(key) if key == missing),
                "expected Missing({missing}), got: {err}"
            );
        }
    }

    #[test]
    fn blank_env_value_counts_as_missing() {
        let mut pairs = required_env();
        pairs.retain(|(k, _)| *k != "AUTH_ID");
        pairs.push(("AUTH_ID", "   "));
        let err = Config::load_with(None, env_of(&pairs)).unwrap_err();
        assert!(matches!(err, common::Error::Missing("AUTH_ID")));
    }

    #[test]
    fn file_values_fill_in_and_env_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let secret_path = dir.path().join("client_secret");
        std::fs::write(&secret_path, "file-secret\n").unwrap();
        let config_path = dir.path().join("config.toml");
        std::fs::write(
            &config_path,
            format!(
                r#"
[server]
listen_addr = "127.0.0.1:9000"
max_connections = 50

[storage]
sqlite_file = "/data/file.db"

[oauth]
client_id = "file-id"
client_secret_file = "{}"
redirect_url = "https://auth.example.com/auth/callback"
state_ttl_secs = 120
"#,
                secret_path.display()
            ),
        )
        .unwrap();

        let config = Config::load_with(
            Some(&config_path),
            env_of(&[("AUTH_ID", "env-id"), ("EXCHANGE_TIMEOUT_SECS", "5")]),
        )
        .unwrap();

        assert_eq!(config.server.listen_addr.to_string(), "127.0.0.1:9000");
        assert_eq!(config.server.max_connections, 50);
        assert_eq!(config.storage.sqlite_file, PathBuf::from("/data/file.db"));
        assert_eq!(config.oauth.client_id, "env-id", "env must override file");
        assert_eq!(config.oauth.client_secret.expose(), "file-secret");
        assert_eq!(config.oauth.exchange_timeout, Duration::from_secs(5));
        assert_eq!(config.oauth.state_ttl, Duration::from_secs(120));
    }

    #[test]
    fn secret_env_overrides_secret_file() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("config.toml");
        std::fs::write(
            &config_path,
            "[oauth]\nclient_secret_file = \"/nonexistent/path/client_secret\"\n",
        )
        .unwrap();

        let config = Config::load_with(Some(&config_path), env_of(&required_env())).unwrap();
        assert_eq!(config.oauth.client_secret.expose(), "app-secret");
    }

    #[test]
    fn unreadable_secret_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("config.toml");
        std::fs::write(
            &config_path,
            "[oauth]\nclient_secret_file = \"/nonexistent/path/client_secret\"\n",
        )
        .unwrap();

        let mut pairs = required_env();
        pairs.retain(|(k, _)| *k != "AUTH_SECRET");
        let err = Config::load_with(Some(&config_path), env_of(&pairs)).unwrap_err();
        assert!(
            err.to_string().contains("client_secret_file"),
            "got: {err}"
        );
    }

    #[test]
    fn blank_secret_file_counts_as_missing() {
        let dir = tempfile::tempdir().unwrap();
        let secret_path = dir.path().join("client_secret");
        std::fs::write(&secret_path, "\n").unwrap();
        let config_path = dir.path().join("config.toml");
        std::fs::write(
            &config_path,
            format!("[oauth]\nclient_secret_file = \"{}\"\n", secret_path.display()),
        )
        .unwrap();

        let mut pairs = required_env();
        pairs.retain(|(k, _)| *k != "AUTH_SECRET");
        let err = Config::load_with(Some(&config_path), env_of(&pairs)).unwrap_err();
        assert!(
            matches!(err, common::Error::Missing("AUTH_SECRET")),
            "got: {err}"
        );
    }

    #[test]
    fn secret_never_appears_in_debug() {
        let config = Config::load_with(None, env_of(&required_env())).unwrap();
        let debug = format!("{config:?}");
        assert!(!debug.contains("app-secret"), "secret leaked: {debug}");
    }

    #[test]
    fn invalid_values_rejected() {
        let cases = [
            ("AUTH_REDIRECTURL", "localhost/callback", "redirect url"),
            ("MAX_CONNECTIONS", "0", "max_connections"),
            ("EXCHANGE_TIMEOUT_SECS", "0", "exchange_timeout_secs"),
            ("STATE_TTL_SECS", "0", "state_ttl_secs"),
            ("STATE_TTL_SECS", "ten", "STATE_TTL_SECS"),
            ("LISTEN_ADDR", "not-an-addr", "LISTEN_ADDR"),
        ];
        for (key, value, expected) in cases {
            let mut pairs = required_env();
            pairs.retain(|(k, _)| *k != key);
            pairs.push((key, value));
            let err = Config::load_with(None, env_of(&pairs)).unwrap_err();
            assert!(
                err.to_string().contains(expected),
                "{key}={value}: expected error mentioning {expected}, got: {err}"
            );
        }
    }

    #[test]
    fn unknown_toml_keys_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("config.toml");
        std::fs::write(&config_path, "[oauth]\nclient_secret = \"inline\"\n").unwrap();

        let result = Config::load_with(Some(&config_path), env_of(&required_env()));
        assert!(
            matches!(result, Err(common::Error::Toml(_))),
            "inline client_secret must not be accepted"
        );
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let result = Config::load_with(
            Some(Path::new("/nonexistent/path/config.toml")),
            env_of(&required_env()),
        );
        assert!(matches!(result, Err(common::Error::Io(_))));
    }

    #[test]
    fn resolve_path_prefers_cli() {
        let env = env_of(&[("CONFIG_PATH", "/env/should-lose.toml")]);
        assert_eq!(
            Config::resolve_path_with(Some("/cli/wins.toml"), &env),
            Some(PathBuf::from("/cli/wins.toml"))
        );
        assert_eq!(
            Config::resolve_path_with(None, &env),
            Some(PathBuf::from("/env/should-lose.toml"))
        );
        assert_eq!(Config::resolve_path_with(None, env_of(&[])), None);
    }
}
