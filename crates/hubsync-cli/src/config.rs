use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_DIR_NAME: &str = ".hubsync";
pub const CONFIG_FILE_NAME: &str = "sync_config.json";
pub const API_KEY_VAR: &str = "NOTION_API_KEY";

/// Contents of `sync_config.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub vaults: Vec<VaultConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VaultConfig {
    pub name: String,
    /// Vault root as written in the file; may contain `~` and `$VAR`
    pub path: String,
    pub remote: RemoteConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RemoteConfig {
    Notion {
        database_id: String,
        #[serde(default)]
        properties: PropertyNames,
        /// Emoji icon for pages created by push or seed
        #[serde(default)]
        icon: Option<String>,
        /// External image URL used as cover for created pages
        #[serde(default)]
        cover: Option<String>,
    },
}

/// Database property names backing each logical field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PropertyNames {
    pub title: String,
    pub parent: String,
    pub path: String,
    pub last_synced: String,
    pub tags: String,
    pub status: String,
    pub canvas: String,
}

impl Default for PropertyNames {
    fn default() -> Self {
        Self {
            title: "Name".to_string(),
            parent: "Parent item".to_string(),
            path: "Obsidian Path".to_string(),
            last_synced: "Last Synced".to_string(),
            tags: "Tags".to_string(),
            status: "Status".to_string(),
            canvas: "Canvas".to_string(),
        }
    }
}

impl Config {
    /// Read and parse a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::Missing(path.to_path_buf())
            } else {
                ConfigError::Io(e)
            }
        })?;
        let config: Config = serde_json::from_str(&raw)?;
        if config.vaults.is_empty() {
            return Err(ConfigError::NoVaults);
        }
        Ok(config)
    }

    /// The starter config written by `hubsync init`.
    pub fn template() -> Self {
        Self {
            vaults: vec![VaultConfig {
                name: "notes".to_string(),
                path: "~/Vaults/notes".to_string(),
                remote: RemoteConfig::Notion {
                    database_id: "<database id>".to_string(),
                    properties: PropertyNames::default(),
                    icon: None,
                    cover: None,
                },
            }],
        }
    }

    /// Write the template to `path`. Returns false if a file was already there
    /// and `overwrite` is not set.
    pub fn write_template(path: &Path, overwrite: bool) -> Result<bool, ConfigError> {
        if path.exists() && !overwrite {
            return Ok(false);
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&Self::template())?;
        std::fs::write(path, json)?;
        Ok(true)
    }

    /// The named vault, or every vault when no name is given.
    pub fn select(&self, name: Option<&str>) -> Result<Vec<&VaultConfig>, ConfigError> {
        match name {
            None => Ok(self.vaults.iter().collect()),
            Some(name) => self
                .vaults
                .iter()
                .find(|vault| vault.name == name)
                .map(|vault| vec![vault])
                .ok_or_else(|| ConfigError::UnknownVault(name.to_string())),
        }
    }
}

impl VaultConfig {
    /// Vault root with `~` and environment variables expanded
    pub fn resolved_path(&self) -> PathBuf {
        expand_tilde(&expand_vars(&self.path))
    }
}

/// `~/.hubsync/sync_config.json`
pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    dirs::home_dir()
        .map(|home| home.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
        .ok_or(ConfigError::NoHomeDir)
}

/// Notion integration token from the environment.
pub fn api_key_from_env() -> Result<String, ConfigError> {
    std::env::var(API_KEY_VAR)
        .ok()
        .filter(|key| !key.trim().is_empty())
        .ok_or(ConfigError::MissingApiKey)
}

/// Expand ~ or ~/ prefix to the user's home directory.
fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" {
        dirs::home_dir().unwrap_or_else(|| PathBuf::from("~"))
    } else if let Some(rest) = path.strip_prefix("~/") {
        dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path))
    } else {
        PathBuf::from(path)
    }
}

/// Replace `$VAR` and `${VAR}` with their values; unset variables are left as written.
fn expand_vars(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        let (name, consumed) = if let Some(braced) = after.strip_prefix('{') {
            match braced.find('}') {
                Some(end) => (&braced[..end], end + 2),
                None => ("", 0),
            }
        } else {
            let end = after
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(after.len());
            (&after[..end], end)
        };

        match std::env::var(name) {
            Ok(value) if !name.is_empty() => out.push_str(&value),
            _ => out.push_str(&rest[pos..pos + 1 + consumed]),
        }
        rest = &after[consumed..];
    }

    out.push_str(rest);
    out
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{} not found; run `hubsync init` first", .0.display())]
    Missing(PathBuf),

    #[error("Config lists no vaults")]
    NoVaults,

    #[error("No vault named {0} in config")]
    UnknownVault(String),

    #[error("NOTION_API_KEY environment variable not set")]
    MissingApiKey,

    #[error("Could not determine home directory")]
    NoHomeDir,

    #[error("Invalid config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_property_names_default_when_omitted() {
        let config: Config = serde_json::from_str(
            r#"{"vaults": [{"name": "notes", "path": "/tmp/notes",
                "remote": {"type": "notion", "database_id": "db1",
                           "properties": {"status": "State"}}}]}"#,
        )
        .unwrap();

        let RemoteConfig::Notion {
            database_id,
            properties,
            icon,
            ..
        } = &config.vaults[0].remote;
        assert_eq!(database_id, "db1");
        assert_eq!(properties.status, "State");
        assert_eq!(properties.parent, "Parent item");
        assert_eq!(icon, &None);
    }

    #[test]
    fn test_template_round_trips_and_is_not_overwritten() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".hubsync").join(CONFIG_FILE_NAME);

        assert!(Config::write_template(&path, false).unwrap());
        assert_eq!(Config::load(&path).unwrap(), Config::template());

        std::fs::write(&path, r#"{"vaults": []}"#).unwrap();
        assert!(!Config::write_template(&path, false).unwrap());
        assert!(matches!(Config::load(&path), Err(ConfigError::NoVaults)));

        assert!(Config::write_template(&path, true).unwrap());
        assert!(Config::load(&path).is_ok());
    }

    #[test]
    fn test_missing_config_points_at_init() {
        let dir = TempDir::new().unwrap();
        let err = Config::load(&dir.path().join("nope.json")).unwrap_err();
        assert!(err.to_string().contains("hubsync init"));
    }

    #[test]
    fn test_select_vault() {
        let config = Config::template();
        assert_eq!(config.select(None).unwrap().len(), 1);
        assert_eq!(config.select(Some("notes")).unwrap()[0].name, "notes");
        assert!(matches!(
            config.select(Some("other")),
            Err(ConfigError::UnknownVault(_))
        ));
    }

    #[test]
    fn test_expand_vars() {
        // PATH is set in any test environment
        let path = std::env::var("PATH").unwrap();
        assert_eq!(expand_vars("$PATH/x"), format!("{}/x", path));
        assert_eq!(expand_vars("${PATH}x"), format!("{}x", path));
        assert_eq!(
            expand_vars("/a/$HUBSYNC_SURELY_UNSET_VAR/b"),
            "/a/$HUBSYNC_SURELY_UNSET_VAR/b"
        );
        assert_eq!(expand_vars("no vars"), "no vars");
        assert_eq!(expand_vars("cost$"), "cost$");
    }

    #[test]
    fn test_expand_tilde() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_tilde("~/notes"), home.join("notes"));
        }
        assert_eq!(expand_tilde("/abs"), PathBuf::from("/abs"));
    }
}
