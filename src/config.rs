use crate::error::ConfigError;
use crate::models::{KeySpec, MediaKind, RecordSchema};
use crate::store::SaveOptions;
use anyhow::Result;
use configparser::ini::Ini;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

/// How a source's response body is turned into raw records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceKind {
    /// The body is JSON; `pointer` selects the record array.
    Json,
    /// The body is HTML with a JSON payload after `marker` in an inline
    /// script, or in `__NEXT_DATA__` when no marker is given.
    Embedded,
}

/// One `[source.<name>]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    pub kind: SourceKind,
    pub url: String,
    /// JSON pointer (RFC 6901) to the records inside the payload.
    pub pointer: Option<String>,
    pub marker: Option<String>,
}

/// Configuration for one run, loaded from config.ini.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// User agent sent with every request
    pub user_agent: String,
    /// Timeout for requests (seconds)
    pub timeout_request: u64,
    /// Pause between consecutive requests (seconds)
    pub delay_between_requests: u64,
    /// Path of the persisted JSON collection
    pub collection_path: String,
    /// Whether to back up the previous collection before overwriting it
    pub backup: bool,
    /// Backups kept per collection (0 = unlimited)
    pub max_backups: usize,
    /// Optional league/flag lookup table
    pub flags_file: Option<String>,
    /// Field holding the league code used for flag lookups
    pub flag_code_field: String,
    /// Collection preset
    pub kind: MediaKind,
    /// Natural key override
    pub key: Option<KeySpec>,
    /// Whether incoming data replaces existing data
    pub force_update: bool,
    /// Sources scraped by `run`, sorted by section name
    pub sources: Vec<SourceConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout_request: 15,
            delay_between_requests: 1,
            collection_path: "./collection.json".to_string(),
            backup: true,
            max_backups: 5,
            flags_file: None,
            flag_code_field: "liga".to_string(),
            kind: MediaKind::Movies,
            key: None,
            force_update: false,
            sources: Vec::new(),
        }
    }
}

impl Config {
    /// Loads configuration from the given path (expands tilde if present).
    pub fn load(path: &str) -> Result<Self> {
        let mut ini = Ini::new_cs();
        ini.load(Self::expand_tilde(path))
            .map_err(ConfigError::Load)?;
        Self::from_ini(&ini)
    }

    /// Parses configuration from INI text.
    pub fn from_ini_str(text: &str) -> Result<Self> {
        let mut ini = Ini::new_cs();
        ini.read(text.to_string()).map_err(ConfigError::Load)?;
        Self::from_ini(&ini)
    }

    fn from_ini(ini: &Ini) -> Result<Self> {
        let defaults = Self::default();

        let user_agent = ini.get("http", "USER_AGENT").unwrap_or(defaults.user_agent);
        let timeout_request = ini
            .getuint("http", "TIMEOUT_REQUEST")
            .map_err(ConfigError::Load)?
            .unwrap_or(defaults.timeout_request);
        let delay_between_requests = ini
            .getuint("http", "DELAY_BETWEEN_REQUESTS")
            .map_err(ConfigError::Load)?
            .unwrap_or(defaults.delay_between_requests);

        let collection_path = ini
            .get("output", "COLLECTION_PATH")
            .unwrap_or(defaults.collection_path);
        let backup = ini
            .getuint("output", "BACKUP")
            .map_err(ConfigError::Load)?
            .map_or(defaults.backup, |v| v != 0);
        let max_backups = ini
            .getuint("output", "MAX_BACKUPS")
            .map_err(ConfigError::Load)?
            .map_or(defaults.max_backups, |v| v as usize);
        let flags_file = ini
            .get("output", "FLAGS_FILE")
            .filter(|s| !s.trim().is_empty());
        let flag_code_field = ini
            .get("output", "FLAG_CODE_FIELD")
            .unwrap_or(defaults.flag_code_field);

        let kind = match ini.get("merge", "KIND") {
            Some(name) => MediaKind::parse(&name).ok_or(ConfigError::UnknownKind(name))?,
            None => defaults.kind,
        };
        let key = ini.get("merge", "KEY").and_then(|k| KeySpec::parse(&k));
        let force_update = ini
            .getuint("merge", "FORCE_UPDATE")
            .map_err(ConfigError::Load)?
            .is_some_and(|v| v != 0);

        let sources = Self::sources_from_ini(ini)?;

        let config = Config {
            user_agent,
            timeout_request,
            delay_between_requests,
            collection_path,
            backup,
            max_backups,
            flags_file,
            flag_code_field,
            kind,
            key,
            force_update,
            sources,
        };

        // Validate configuration
        if config.timeout_request == 0 {
            return Err(ConfigError::NotPositive("TIMEOUT_REQUEST").into());
        }
        if config.kind == MediaKind::Custom && config.key.is_none() {
            anyhow::bail!("KEY is required when KIND = custom");
        }

        Ok(config)
    }

    fn sources_from_ini(ini: &Ini) -> Result<Vec<SourceConfig>> {
        let mut sources = Vec::new();
        // configparser hands sections back in arbitrary order
        let mut sections: Vec<String> = ini
            .sections()
            .into_iter()
            .filter(|s| s.starts_with("source."))
            .collect();
        sections.sort();

        for section in sections {
            let name = section["source.".len()..].to_string();
            let invalid = |reason: &str| ConfigError::Source {
                name: name.clone(),
                reason: reason.to_string(),
            };

            let url = ini
                .get(&section, "URL")
                .filter(|u| !u.trim().is_empty())
                .ok_or_else(|| invalid("URL is required"))?;
            let kind = match ini.get(&section, "KIND").as_deref().map(str::trim) {
                None | Some("json") => SourceKind::Json,
                Some("embedded") => SourceKind::Embedded,
                Some(_) => return Err(invalid("KIND must be json or embedded").into()),
            };
            let pointer = ini.get(&section, "POINTER").filter(|p| !p.trim().is_empty());
            if let Some(p) = &pointer {
                if !p.starts_with('/') {
                    return Err(invalid("POINTER must start with '/'").into());
                }
            }
            let marker = ini.get(&section, "MARKER").filter(|m| !m.is_empty());

            sources.push(SourceConfig {
                name,
                kind,
                url,
                pointer,
                marker,
            });
        }
        Ok(sources)
    }

    /// Loads configuration from the recommended locations, or creates a default config if not found.
    pub fn load_or_create() -> Result<(Self, PathBuf)> {
        use std::fs;

        let mut candidates = vec![PathBuf::from("config.ini")];
        if let Some(dir) = Self::user_config_dir() {
            candidates.push(dir.join("config.ini"));
        }

        for path in &candidates {
            if path.exists() {
                match Self::load(&path.to_string_lossy()) {
                    Ok(cfg) => return Ok((cfg, path.clone())),
                    Err(e) => tracing::warn!("Failed to load config from {}: {}", path.display(), e),
                }
            }
        }

        let default_path = Self::user_config_dir()
            .map(|dir| dir.join("config.ini"))
            .unwrap_or_else(|| PathBuf::from("config.ini"));

        if let Some(parent) = default_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&default_path, DEFAULT_CONFIG).map_err(|e| {
            anyhow::anyhow!("Failed to write default config at {}: {}", default_path.display(), e)
        })?;
        tracing::warn!(
            "No config.ini found. Created a default config at {}. Please edit it as needed.",
            default_path.display()
        );

        let cfg = Self::load(&default_path.to_string_lossy())?;
        Ok((cfg, default_path))
    }

    fn user_config_dir() -> Option<PathBuf> {
        #[cfg(windows)]
        let base = std::env::var_os("APPDATA").map(PathBuf::from);
        #[cfg(not(windows))]
        let base = std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config"));
        base.map(|b| b.join("catalog-sync"))
    }

    /// Expands a path that starts with ~ to the user's home directory.
    fn expand_tilde(path: &str) -> PathBuf {
        if let Some(rest) = path.strip_prefix("~/") {
            #[cfg(windows)]
            let home = std::env::var_os("USERPROFILE");
            #[cfg(not(windows))]
            let home = std::env::var_os("HOME");
            if let Some(home) = home {
                return PathBuf::from(home).join(rest);
            }
        }
        PathBuf::from(path)
    }

    /// Returns the expanded path to the persisted collection.
    pub fn collection_path(&self) -> PathBuf {
        Self::expand_tilde(&self.collection_path)
    }

    /// Returns the expanded path to the flag table, if one is configured.
    pub fn flags_path(&self) -> Option<PathBuf> {
        self.flags_file.as_deref().map(Self::expand_tilde)
    }

    /// Schema for the configured collection, with the key override applied.
    pub fn schema(&self) -> RecordSchema {
        let schema = self.kind.schema();
        match &self.key {
            Some(key) => schema.with_key(key.clone()),
            None => schema,
        }
    }

    pub fn save_options(&self) -> SaveOptions {
        SaveOptions {
            backup: self.backup,
            max_backups: self.max_backups,
        }
    }
}

const DEFAULT_CONFIG: &str = r#"[http]
USER_AGENT = Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36
TIMEOUT_REQUEST = 15
DELAY_BETWEEN_REQUESTS = 1

[output]
COLLECTION_PATH = ./peliculas.json
BACKUP = 1
MAX_BACKUPS = 5
FLAGS_FILE =
FLAG_CODE_FIELD = liga

[merge]
KIND = movies
FORCE_UPDATE = 0

; One section per source, e.g.
; [source.catalog]
; KIND = json
; URL = https://example.com/api/movies
; POINTER = /results
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_to_an_empty_file() {
        let config = Config::from_ini_str("").unwrap();
        assert_eq!(config.timeout_request, 15);
        assert!(config.backup);
        assert_eq!(config.kind, MediaKind::Movies);
        assert_eq!(config.schema().key, KeySpec::new(["tmdb_id"]));
        assert!(config.sources.is_empty());
    }

    #[test]
    fn shipped_default_config_parses() {
        let config = Config::from_ini_str(DEFAULT_CONFIG).unwrap();
        assert_eq!(config.collection_path, "./peliculas.json");
        assert!(config.flags_file.is_none());
    }

    #[test]
    fn sources_and_key_override() {
        let text = r#"
[merge]
KIND = series
KEY = tmdb_id, season
FORCE_UPDATE = 1

[output]
BACKUP = 0

[source.poseidon]
KIND = embedded
URL = https://example.com/serie/1
MARKER = "serie":

[source.api]
URL = https://example.com/api
POINTER = /data/items
"#;
        let config = Config::from_ini_str(text).unwrap();
        assert_eq!(config.kind, MediaKind::Series);
        assert!(config.force_update);
        assert!(!config.backup);
        assert_eq!(config.schema().key, KeySpec::new(["tmdb_id", "season"]));

        assert_eq!(config.sources.len(), 2);
        assert_eq!(config.sources[0].name, "api");
        assert_eq!(config.sources[0].kind, SourceKind::Json);
        assert_eq!(config.sources[0].pointer.as_deref(), Some("/data/items"));
        assert_eq!(config.sources[1].kind, SourceKind::Embedded);
        assert_eq!(config.sources[1].marker.as_deref(), Some("\"serie\":"));
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(Config::from_ini_str("[http]\nTIMEOUT_REQUEST = 0\n").is_err());
        assert!(Config::from_ini_str("[merge]\nKIND = podcasts\n").is_err());
        assert!(Config::from_ini_str("[merge]\nKIND = custom\n").is_err());
        assert!(Config::from_ini_str("[source.x]\nKIND = json\n").is_err());
        assert!(Config::from_ini_str("[source.x]\nURL = https://a\nPOINTER = data\n").is_err());
    }
}
