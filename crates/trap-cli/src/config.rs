//! Configuration file management.
//!
//! A TOML config file at `~/.config/trap/config.toml` with the
//! resolution chain: CLI flag > env var > config file > default.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use trap_core::config::GatewayConfig;
use trap_db::config::DbConfig;

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct ConfigFile {
    pub database: DatabaseSection,
    #[serde(default)]
    pub gateway: GatewaySection,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DatabaseSection {
    pub url: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct GatewaySection {
    pub url: Option<String>,
    pub token: Option<String>,
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// The trap config directory.
///
/// Always XDG layout: `$XDG_CONFIG_HOME/trap` or `~/.config/trap`. The
/// platform-specific config dir (`~/Library/Application Support` on
/// macOS) is deliberately not used.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("trap");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("trap")
}

pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

// -----------------------------------------------------------------------
// Read / write
// -----------------------------------------------------------------------

/// Load and parse the config file. Errors if it does not exist.
pub fn load_config() -> Result<ConfigFile> {
    let path = config_path();
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    let config: ConfigFile = toml::from_str(&contents).context("failed to parse config file")?;
    Ok(config)
}

/// Serialize and write the config file, creating parent dirs as needed.
/// Sets file permissions to 0600 on Unix (the gateway token lives here).
pub fn save_config(config: &ConfigFile) -> Result<()> {
    let path = config_path();
    let dir = config_dir();
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create config directory {}", dir.display()))?;

    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(&path, &contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(&path, perms)
            .with_context(|| format!("failed to set permissions on {}", path.display()))?;
    }

    Ok(())
}

// -----------------------------------------------------------------------
// Resolved config
// -----------------------------------------------------------------------

/// Fully resolved configuration, ready for use.
#[derive(Debug)]
pub struct TrapConfig {
    pub db_config: DbConfig,
    pub gateway_config: GatewayConfig,
}

impl TrapConfig {
    /// Resolve configuration: CLI flag > env var > config file > default.
    ///
    /// - Store URL: `cli_db_url` > `TRAP_DATABASE_URL` > file > default.
    /// - Gateway: `OPENCLAW_HTTP_URL`/`OPENCLAW_HOST`/`OPENCLAW_PORT` and
    ///   `OPENCLAW_TOKEN` > file > defaults.
    pub fn resolve(cli_db_url: Option<&str>) -> Result<Self> {
        let file_config = load_config().ok();

        let db_url = if let Some(url) = cli_db_url {
            url.to_string()
        } else if let Ok(url) = std::env::var("TRAP_DATABASE_URL") {
            url
        } else if let Some(ref cfg) = file_config {
            cfg.database.url.clone()
        } else {
            DbConfig::DEFAULT_URL.to_string()
        };
        let db_config = DbConfig::new(db_url);

        let mut gateway_config = GatewayConfig::from_env();
        if let Some(ref cfg) = file_config {
            if std::env::var("OPENCLAW_HTTP_URL").is_err() && std::env::var("OPENCLAW_HOST").is_err()
            {
                if let Some(url) = &cfg.gateway.url {
                    gateway_config.base_url = url.clone();
                }
            }
            if gateway_config.token.is_none() {
                gateway_config.token = cfg.gateway.token.clone();
            }
        }

        Ok(Self {
            db_config,
            gateway_config,
        })
    }
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_file_roundtrip() {
        let original = ConfigFile {
            database: DatabaseSection {
                url: "postgresql://testhost:5432/testdb".to_string(),
            },
            gateway: GatewaySection {
                url: Some("http://localhost:8089".to_string()),
                token: Some("secret".to_string()),
            },
        };

        let contents = toml::to_string_pretty(&original).unwrap();
        let loaded: ConfigFile = toml::from_str(&contents).unwrap();

        assert_eq!(loaded.database.url, original.database.url);
        assert_eq!(loaded.gateway.url, original.gateway.url);
        assert_eq!(loaded.gateway.token, original.gateway.token);
    }

    #[test]
    fn gateway_section_is_optional() {
        let loaded: ConfigFile =
            toml::from_str("[database]\nurl = \"postgresql://localhost:5432/trap\"\n").unwrap();
        assert!(loaded.gateway.url.is_none());
        assert!(loaded.gateway.token.is_none());
    }

    #[test]
    fn config_path_ends_with_expected_filename() {
        let path = config_path();
        assert!(
            path.ends_with("trap/config.toml"),
            "unexpected config path: {}",
            path.display()
        );
    }
}
