// Configuration loading and parsing (draft.toml, formats.toml).

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::catalog::FormatRules;
use crate::draft::model::{DraftMode, DraftSettings};
use crate::draft::room::JoinRequest;
use crate::repository::NewDraft;
use crate::session::SessionSettings;
use crate::sync::{ReconnectPolicy, SyncSettings};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("validation error for field `{field}`: {message}")]
    ValidationError { field: String, message: String },

    #[error("failed to initialize config from defaults: {message}")]
    DefaultsCopyError { message: String },
}

// ---------------------------------------------------------------------------
// Top-level assembled Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    pub draft: DraftConfig,
    pub server: ServerConfig,
    pub sync: SyncConfig,
    pub formats: Vec<FormatRules>,
}

// ---------------------------------------------------------------------------
// draft.toml structs
// ---------------------------------------------------------------------------

/// Raw deserialization target for the entire draft.toml file.
#[derive(Debug, Clone, Deserialize)]
struct DraftFile {
    draft: DraftConfig,
    server: ServerConfig,
    #[serde(default)]
    sync: SyncConfig,
}

/// Settings for the draft a host creates.
#[derive(Debug, Clone, Deserialize)]
pub struct DraftConfig {
    pub name: String,
    pub format: String,
    pub mode: DraftMode,
    pub max_teams: u32,
    pub budget_per_team: u32,
    pub roster_size: u32,
    pub pick_timer_seconds: u32,
    pub auction_timer_seconds: u32,
    pub allow_undo: bool,
    pub min_starting_bid: u32,
    #[serde(default)]
    pub password: Option<String>,
}

impl DraftConfig {
    pub fn settings(&self) -> DraftSettings {
        DraftSettings {
            pick_timer_seconds: self.pick_timer_seconds,
            auction_timer_seconds: self.auction_timer_seconds,
            roster_size: self.roster_size,
            allow_undo: self.allow_undo,
            min_starting_bid: self.min_starting_bid,
        }
    }

    /// Creation parameters for this draft, hosted by `host`.
    pub fn new_draft(&self, host: JoinRequest) -> NewDraft {
        NewDraft {
            name: self.name.clone(),
            format: self.format.clone(),
            mode: self.mode,
            budget_per_team: self.budget_per_team,
            max_teams: self.max_teams,
            settings: self.settings(),
            password: self.password.clone().filter(|p| !p.is_empty()),
            host,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub db_path: String,
    pub catalog_path: String,
}

/// Realtime, heartbeat and reconnect tuning. Every key is optional.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub heartbeat_interval_ms: u64,
    pub heartbeat_timeout_ms: u64,
    pub reconnect_base_ms: u64,
    pub reconnect_max_ms: u64,
    pub reconnect_max_attempts: u32,
    pub reconnect_jitter: f64,
    pub burst_threshold: usize,
    pub burst_window_ms: u64,
    pub refetch_debounce_ms: u64,
    pub offline_max_retries: u32,
    pub absent_after_seconds: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            heartbeat_interval_ms: 5_000,
            heartbeat_timeout_ms: 15_000,
            reconnect_base_ms: 500,
            reconnect_max_ms: 30_000,
            reconnect_max_attempts: 8,
            reconnect_jitter: 0.2,
            burst_threshold: 50,
            burst_window_ms: 500,
            refetch_debounce_ms: 250,
            offline_max_retries: 3,
            absent_after_seconds: 30,
        }
    }
}

impl SyncConfig {
    pub fn sync_settings(&self) -> SyncSettings {
        SyncSettings {
            burst_threshold: self.burst_threshold,
            burst_window: Duration::from_millis(self.burst_window_ms),
            refetch_debounce: Duration::from_millis(self.refetch_debounce_ms),
        }
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            base: Duration::from_millis(self.reconnect_base_ms),
            max: Duration::from_millis(self.reconnect_max_ms),
            max_attempts: self.reconnect_max_attempts,
            jitter: self.reconnect_jitter,
        }
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    /// How long a participant may go unseen before their turn is auto-picked.
    pub fn absent_after(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.absent_after_seconds as i64)
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            sync: self.sync_settings(),
            reconnect: self.reconnect_policy(),
            heartbeat_timeout: self.heartbeat_timeout(),
            offline_max_retries: self.offline_max_retries,
            absent_after: self.absent_after(),
        }
    }
}

// ---------------------------------------------------------------------------
// formats.toml structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
struct FormatsFile {
    #[serde(rename = "format", default)]
    formats: Vec<FormatRules>,
}

// ---------------------------------------------------------------------------
// Loading logic
// ---------------------------------------------------------------------------

/// Load and validate configuration from `config/draft.toml` and
/// `config/formats.toml`, relative to the given `base_dir`.
///
/// This is the lower-level loading primitive that does not auto-copy defaults.
/// Prefer `load_config()` which handles default initialization automatically.
pub fn load_config_from(base_dir: &Path) -> Result<Config, ConfigError> {
    let config_dir = base_dir.join("config");

    // --- draft.toml (required) ---
    let draft_path = config_dir.join("draft.toml");
    let draft_text = read_file(&draft_path)?;
    let draft_file: DraftFile =
        toml::from_str(&draft_text).map_err(|e| ConfigError::ParseError {
            path: draft_path.clone(),
            source: e,
        })?;

    // --- formats.toml (required) ---
    let formats_path = config_dir.join("formats.toml");
    let formats_text = read_file(&formats_path)?;
    let formats_file: FormatsFile =
        toml::from_str(&formats_text).map_err(|e| ConfigError::ParseError {
            path: formats_path.clone(),
            source: e,
        })?;

    let config = Config {
        draft: draft_file.draft,
        server: draft_file.server,
        sync: draft_file.sync,
        formats: formats_file.formats,
    };

    validate(&config)?;

    Ok(config)
}

/// Ensure all config files exist by copying missing ones from `defaults/`.
/// Returns the list of files that were copied. Skips `.example` files.
pub fn ensure_config_files(base_dir: &Path) -> Result<Vec<PathBuf>, ConfigError> {
    let defaults_dir = base_dir.join("defaults");
    let config_dir = base_dir.join("config");

    if !defaults_dir.exists() {
        if !config_dir.exists() {
            return Err(ConfigError::DefaultsCopyError {
                message: format!(
                    "neither defaults/ nor config/ directory found in {}; \
                     run from the project root or ensure defaults/ is present",
                    base_dir.display()
                ),
            });
        }
        return Ok(vec![]);
    }

    std::fs::create_dir_all(&config_dir).map_err(|e| ConfigError::DefaultsCopyError {
        message: format!("failed to create config directory: {e}"),
    })?;

    let mut copied = Vec::new();

    let entries = std::fs::read_dir(&defaults_dir).map_err(|e| ConfigError::DefaultsCopyError {
        message: format!("failed to read defaults directory: {e}"),
    })?;

    for entry in entries {
        let entry = entry.map_err(|e| ConfigError::DefaultsCopyError {
            message: format!("failed to read defaults entry: {e}"),
        })?;
        let path = entry.path();

        if !path.is_file() {
            continue;
        }
        let Some(file_name) = path.file_name() else {
            continue;
        };

        if file_name.to_str().is_some_and(|n| n.ends_with(".example")) {
            continue;
        }
        let target = config_dir.join(file_name);

        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&target)
        {
            Ok(mut dest) => {
                let content = std::fs::read(&path).map_err(|e| ConfigError::DefaultsCopyError {
                    message: format!("failed to read {}: {e}", path.display()),
                })?;
                std::io::Write::write_all(&mut dest, &content).map_err(|e| {
                    ConfigError::DefaultsCopyError {
                        message: format!("failed to write {}: {e}", target.display()),
                    }
                })?;
                copied.push(target);
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                // Local edits in config/ win over defaults.
            }
            Err(e) => {
                return Err(ConfigError::DefaultsCopyError {
                    message: format!("failed to create {}: {e}", target.display()),
                });
            }
        }
    }

    Ok(copied)
}

/// Convenience wrapper: loads config relative to the current working directory.
/// Ensures default config files are copied before loading.
pub fn load_config() -> Result<Config, ConfigError> {
    let cwd = std::env::current_dir().map_err(|_| ConfigError::FileNotFound {
        path: PathBuf::from("."),
    })?;
    ensure_config_files(&cwd)?;
    load_config_from(&cwd)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
        path: path.to_path_buf(),
    })
}

fn invalid(field: impl Into<String>, message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError {
        field: field.into(),
        message: message.into(),
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate(config: &Config) -> Result<(), ConfigError> {
    let draft = &config.draft;

    if draft.name.trim().is_empty() {
        return Err(invalid("draft.name", "must not be empty"));
    }
    if draft.max_teams < 2 {
        return Err(invalid(
            "draft.max_teams",
            format!("must be at least 2, got {}", draft.max_teams),
        ));
    }

    let positive: &[(&str, u32)] = &[
        ("draft.budget_per_team", draft.budget_per_team),
        ("draft.roster_size", draft.roster_size),
        ("draft.pick_timer_seconds", draft.pick_timer_seconds),
        ("draft.auction_timer_seconds", draft.auction_timer_seconds),
        ("draft.min_starting_bid", draft.min_starting_bid),
    ];
    for (name, val) in positive {
        if *val == 0 {
            return Err(invalid(*name, "must be > 0"));
        }
    }

    if draft.min_starting_bid > draft.budget_per_team {
        return Err(invalid(
            "draft.min_starting_bid",
            format!(
                "must not exceed budget_per_team ({}), got {}",
                draft.budget_per_team, draft.min_starting_bid
            ),
        ));
    }

    // Formats
    if config.formats.is_empty() {
        return Err(invalid("format", "at least one [[format]] is required"));
    }
    let mut seen = HashSet::new();
    for rules in &config.formats {
        if !seen.insert(rules.id.as_str()) {
            return Err(invalid(
                format!("format.{}", rules.id),
                "duplicate format id",
            ));
        }
        if rules.min_cost > rules.max_cost {
            return Err(invalid(
                format!("format.{}.min_cost", rules.id),
                format!(
                    "must not exceed max_cost ({}), got {}",
                    rules.max_cost, rules.min_cost
                ),
            ));
        }
    }
    if !seen.contains(draft.format.as_str()) {
        return Err(invalid(
            "draft.format",
            format!("unknown format '{}'", draft.format),
        ));
    }

    // Sync tuning
    let sync = &config.sync;
    if !(0.0..=1.0).contains(&sync.reconnect_jitter) {
        return Err(invalid(
            "sync.reconnect_jitter",
            format!(
                "must be between 0.0 and 1.0 inclusive, got {}",
                sync.reconnect_jitter
            ),
        ));
    }
    if sync.reconnect_base_ms == 0 || sync.reconnect_base_ms > sync.reconnect_max_ms {
        return Err(invalid(
            "sync.reconnect_base_ms",
            format!(
                "must be > 0 and <= reconnect_max_ms ({}), got {}",
                sync.reconnect_max_ms, sync.reconnect_base_ms
            ),
        ));
    }
    if sync.reconnect_max_attempts == 0 {
        return Err(invalid("sync.reconnect_max_attempts", "must be > 0"));
    }
    if sync.heartbeat_interval_ms == 0 || sync.heartbeat_timeout_ms <= sync.heartbeat_interval_ms {
        return Err(invalid(
            "sync.heartbeat_timeout_ms",
            "must be greater than a non-zero heartbeat_interval_ms",
        ));
    }
    if sync.burst_threshold == 0 {
        return Err(invalid("sync.burst_threshold", "must be > 0"));
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    /// Workspace root, where `defaults/` lives.
    fn project_root() -> PathBuf {
        let root = Path::new(env!("CARGO_MANIFEST_DIR")).join("../..");
        assert!(
            root.join("defaults").exists(),
            "Cannot locate defaults/ directory from {:?}",
            root
        );
        root
    }

    /// Fresh temp dir containing copies of the shipped defaults in config/.
    fn temp_config(name: &str) -> PathBuf {
        let tmp = std::env::temp_dir().join(format!("draftroom_config_{name}"));
        let config_dir = tmp.join("config");
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(&config_dir).unwrap();
        let root = project_root();
        for file in ["draft.toml", "formats.toml"] {
            fs::copy(root.join("defaults").join(file), config_dir.join(file)).unwrap();
        }
        tmp
    }

    fn rewrite(base: &Path, file: &str, from: &str, to: &str) {
        let path = base.join("config").join(file);
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains(from), "{file} does not contain {from:?}");
        fs::write(&path, text.replacen(from, to, 1)).unwrap();
    }

    #[test]
    fn load_shipped_defaults() {
        let tmp = temp_config("defaults");
        let config = load_config_from(&tmp).expect("should load valid config");

        assert_eq!(config.draft.mode, DraftMode::Snake);
        assert_eq!(config.draft.format, "gen1-ou");
        assert_eq!(config.draft.max_teams, 8);
        assert_eq!(config.draft.budget_per_team, 100);
        assert_eq!(config.draft.roster_size, 6);
        assert!(config.draft.allow_undo);
        assert!(config.draft.password.is_none());
        assert_eq!(config.server.port, 9010);
        assert_eq!(config.server.catalog_path, "data/catalog.csv");

        let ids: Vec<&str> = config.formats.iter().map(|f| f.id.as_str()).collect();
        assert!(ids.contains(&"gen1-ou"));
        assert!(ids.contains(&"national-tiers"));

        let policy = config.sync.reconnect_policy();
        assert_eq!(policy.base, Duration::from_millis(500));
        assert_eq!(policy.max_attempts, 8);
        assert_eq!(config.sync.sync_settings().burst_threshold, 50);
        assert_eq!(
            config.sync.session_settings().heartbeat_timeout,
            Duration::from_secs(15)
        );

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn missing_sync_section_uses_defaults() {
        let tmp = temp_config("no_sync");
        let path = tmp.join("config/draft.toml");
        let text = fs::read_to_string(&path).unwrap();
        let trimmed = text.split("[sync]").next().unwrap().to_string();
        fs::write(&path, trimmed).unwrap();

        let config = load_config_from(&tmp).unwrap();
        assert_eq!(config.sync.heartbeat_timeout_ms, 15_000);
        assert_eq!(config.sync.absent_after(), chrono::Duration::seconds(30));

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn missing_draft_toml_is_file_not_found() {
        let tmp = temp_config("missing");
        fs::remove_file(tmp.join("config/draft.toml")).unwrap();
        match load_config_from(&tmp) {
            Err(ConfigError::FileNotFound { path }) => assert!(path.ends_with("draft.toml")),
            other => panic!("expected FileNotFound, got {other:?}"),
        }
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn malformed_toml_is_parse_error() {
        let tmp = temp_config("malformed");
        fs::write(tmp.join("config/formats.toml"), "[[format]\nid = ").unwrap();
        assert!(matches!(
            load_config_from(&tmp),
            Err(ConfigError::ParseError { .. })
        ));
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn unknown_format_fails_validation() {
        let tmp = temp_config("unknown_format");
        rewrite(&tmp, "draft.toml", "format = \"gen1-ou\"", "format = \"gen9-vgc\"");
        match load_config_from(&tmp) {
            Err(ConfigError::ValidationError { field, .. }) => assert_eq!(field, "draft.format"),
            other => panic!("expected ValidationError, got {other:?}"),
        }
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn single_team_cap_fails_validation() {
        let tmp = temp_config("max_teams");
        rewrite(&tmp, "draft.toml", "max_teams = 8", "max_teams = 1");
        match load_config_from(&tmp) {
            Err(ConfigError::ValidationError { field, .. }) => assert_eq!(field, "draft.max_teams"),
            other => panic!("expected ValidationError, got {other:?}"),
        }
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn jitter_out_of_range_fails_validation() {
        let tmp = temp_config("jitter");
        rewrite(&tmp, "draft.toml", "reconnect_jitter = 0.2", "reconnect_jitter = 1.5");
        match load_config_from(&tmp) {
            Err(ConfigError::ValidationError { field, .. }) => {
                assert_eq!(field, "sync.reconnect_jitter")
            }
            other => panic!("expected ValidationError, got {other:?}"),
        }
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn ensure_config_files_copies_missing_only() {
        let tmp = std::env::temp_dir().join("draftroom_config_ensure");
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(tmp.join("defaults")).unwrap();
        fs::write(tmp.join("defaults/draft.toml"), "fresh").unwrap();
        fs::write(tmp.join("defaults/formats.toml"), "fresh").unwrap();
        fs::write(tmp.join("defaults/draft.toml.example"), "template").unwrap();
        fs::create_dir_all(tmp.join("config")).unwrap();
        fs::write(tmp.join("config/draft.toml"), "edited").unwrap();

        let copied = ensure_config_files(&tmp).unwrap();
        assert_eq!(copied, vec![tmp.join("config/formats.toml")]);
        assert_eq!(fs::read_to_string(tmp.join("config/draft.toml")).unwrap(), "edited");
        assert!(!tmp.join("config/draft.toml.example").exists());

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn ensure_config_files_without_any_directory_fails() {
        let tmp = std::env::temp_dir().join("draftroom_config_empty");
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(&tmp).unwrap();
        assert!(matches!(
            ensure_config_files(&tmp),
            Err(ConfigError::DefaultsCopyError { .. })
        ));
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn new_draft_carries_settings() {
        let tmp = temp_config("new_draft");
        let config = load_config_from(&tmp).unwrap();
        let host = JoinRequest {
            user_id: "u1".into(),
            display_name: "Oak".into(),
            team_name: Some("Pallet".into()),
            password: None,
        };
        let new = config.draft.new_draft(host);
        assert_eq!(new.settings.roster_size, config.draft.roster_size);
        assert_eq!(new.format, "gen1-ou");
        assert_eq!(new.host.user_id, "u1");
        let _ = fs::remove_dir_all(&tmp);
    }
}
