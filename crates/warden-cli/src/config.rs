//! Configuration Vault – reads/writes `~/.warden/config.toml`.
//!
//! Every section is optional; missing keys take the documented defaults.
//! Durations are written in (fractional) seconds.
//!
//! ```toml
//! [breaker]
//! failure_threshold = 5
//! recovery_timeout_secs = 30.0
//!
//! [breaker.overrides.llm]
//! failure_threshold = 2
//!
//! [retry]
//! max_backoff_secs = 30.0
//!
//! [retry.classes.timeout]
//! max_attempts = 5
//! backoff_base_ms = 250
//!
//! [replay]
//! cooldown_secs = 30.0
//! non_retryable = ["circuit_open", "policy_denied", "validation_failed"]
//!
//! [store]
//! path = "/var/lib/warden/warden.db"
//! ```

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use warden_kernel::{BreakerConfig, ConfirmationConfig, RecoveryConfig, RetryPolicy};
use warden_memory::{MAX_DEAD_LETTERS, ReplayConfig};
use warden_runtime::{GovernanceConfig, TelemetryConfig};
use warden_types::FailureClass;

// ─────────────────────────────────────────────────────────────────────────────
// Sections
// ─────────────────────────────────────────────────────────────────────────────

/// Breaker tuning.  Used both for the defaults and for per-dependency
/// overrides; an override starts from the built-in defaults, not from the
/// `[breaker]` values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct BreakerTuning {
    pub failure_threshold: u32,
    pub recovery_timeout_secs: f64,
    pub jitter_max_secs: f64,
    pub half_open_max_calls: u32,
    pub success_threshold: u32,
    pub event_capacity: usize,
}

impl Default for BreakerTuning {
    fn default() -> Self {
        let d = BreakerConfig::default();
        Self {
            failure_threshold: d.failure_threshold,
            recovery_timeout_secs: d.recovery_timeout.as_secs_f64(),
            jitter_max_secs: d.jitter_max.as_secs_f64(),
            half_open_max_calls: d.half_open_max_calls,
            success_threshold: d.success_threshold,
            event_capacity: d.event_capacity,
        }
    }
}

impl BreakerTuning {
    fn to_breaker_config(&self, label: &str) -> Result<BreakerConfig, String> {
        Ok(BreakerConfig {
            failure_threshold: self.failure_threshold,
            recovery_timeout: secs(&format!("{label}.recovery_timeout_secs"), self.recovery_timeout_secs)?,
            jitter_max: secs(&format!("{label}.jitter_max_secs"), self.jitter_max_secs)?,
            half_open_max_calls: self.half_open_max_calls,
            success_threshold: self.success_threshold,
            event_capacity: self.event_capacity,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct BreakerSection {
    #[serde(flatten)]
    pub defaults: BreakerTuning,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub overrides: BTreeMap<String, BreakerTuning>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RetryOverride {
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    #[serde(default = "default_true")]
    pub retryable: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct RetrySection {
    /// Cap on a single retry sleep.
    pub max_backoff_secs: f64,
    /// Keyed by failure class (`timeout`, `backpressure`, ...).
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub classes: BTreeMap<String, RetryOverride>,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_backoff_secs: 30.0,
            classes: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct RecoverySection {
    pub max_restarts: u32,
    pub restart_window_secs: f64,
    pub decision_log_capacity: usize,
}

impl Default for RecoverySection {
    fn default() -> Self {
        let d = RecoveryConfig::default();
        Self {
            max_restarts: d.max_restarts,
            restart_window_secs: d.restart_window.as_secs_f64(),
            decision_log_capacity: d.decision_log_capacity,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct DeadLetterSection {
    pub max_letters: usize,
}

impl Default for DeadLetterSection {
    fn default() -> Self {
        Self {
            max_letters: MAX_DEAD_LETTERS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ReplaySection {
    pub cooldown_secs: f64,
    pub budget_max: u32,
    pub budget_window_secs: f64,
    pub trace_capacity: usize,
    pub non_retryable: Vec<String>,
}

impl Default for ReplaySection {
    fn default() -> Self {
        let d = ReplayConfig::default();
        Self {
            cooldown_secs: d.cooldown.as_secs_f64(),
            budget_max: d.budget_max,
            budget_window_secs: d.budget_window.as_secs_f64(),
            trace_capacity: d.trace_capacity,
            non_retryable: d.non_retryable.iter().map(|c| c.as_str().to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ConfirmationSection {
    pub ttl_secs: f64,
    pub max_pending: usize,
    pub archive_capacity: usize,
}

impl Default for ConfirmationSection {
    fn default() -> Self {
        let d = ConfirmationConfig::default();
        Self {
            ttl_secs: d.default_ttl.as_secs_f64(),
            max_pending: d.max_pending,
            archive_capacity: d.archive_capacity,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct StoreSection {
    /// SQLite file.  Defaults to `~/.warden/warden.db`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    /// Keep everything in memory; nothing survives the process.
    pub in_memory: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct TelemetrySection {
    pub log_filter: String,
    pub json: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub otlp_endpoint: Option<String>,
}

impl Default for TelemetrySection {
    fn default() -> Self {
        let d = TelemetryConfig::default();
        Self {
            log_filter: d.log_filter,
            json: d.json,
            otlp_endpoint: d.otlp_endpoint,
        }
    }
}

/// Persisted configuration stored in `~/.warden/config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct Config {
    pub breaker: BreakerSection,
    pub retry: RetrySection,
    pub recovery: RecoverySection,
    pub dead_letter: DeadLetterSection,
    pub replay: ReplaySection,
    pub confirmation: ConfirmationSection,
    pub store: StoreSection,
    pub telemetry: TelemetrySection,
}

impl Config {
    /// Convert into the runtime's configuration.  `home` resolves the
    /// default store path.
    pub fn to_governance(&self, home: &Path) -> Result<GovernanceConfig, String> {
        let breaker = self.breaker.defaults.to_breaker_config("breaker")?;
        let breaker_overrides = self
            .breaker
            .overrides
            .iter()
            .map(|(name, tuning)| {
                tuning
                    .to_breaker_config(&format!("breaker.overrides.{name}"))
                    .map(|c| (name.clone(), c))
            })
            .collect::<Result<BTreeMap<_, _>, _>>()?;

        let retry_overrides = self
            .retry
            .classes
            .iter()
            .map(|(class, o)| {
                let class = parse_class(class)?;
                let policy = if o.retryable {
                    RetryPolicy::retryable(o.max_attempts, o.backoff_base_ms)
                } else {
                    RetryPolicy::terminal()
                };
                Ok((class, policy))
            })
            .collect::<Result<BTreeMap<_, _>, String>>()?;

        let non_retryable = self
            .replay
            .non_retryable
            .iter()
            .map(|c| parse_class(c))
            .collect::<Result<Vec<_>, _>>()?;

        let store_path = if self.store.in_memory {
            None
        } else {
            Some(
                self.store
                    .path
                    .clone()
                    .unwrap_or_else(|| warden_dir(home).join("warden.db")),
            )
        };

        Ok(GovernanceConfig {
            breaker,
            breaker_overrides,
            retry_overrides,
            recovery: RecoveryConfig {
                max_restarts: self.recovery.max_restarts,
                restart_window: secs("recovery.restart_window_secs", self.recovery.restart_window_secs)?,
                decision_log_capacity: self.recovery.decision_log_capacity,
            },
            max_dead_letters: self.dead_letter.max_letters,
            replay: ReplayConfig {
                cooldown: secs("replay.cooldown_secs", self.replay.cooldown_secs)?,
                budget_max: self.replay.budget_max,
                budget_window: secs("replay.budget_window_secs", self.replay.budget_window_secs)?,
                trace_capacity: self.replay.trace_capacity,
                non_retryable,
            },
            confirmation: ConfirmationConfig {
                default_ttl: secs("confirmation.ttl_secs", self.confirmation.ttl_secs)?,
                max_pending: self.confirmation.max_pending,
                archive_capacity: self.confirmation.archive_capacity,
            },
            store_path,
            max_backoff: secs("retry.max_backoff_secs", self.retry.max_backoff_secs)?,
        })
    }

    pub fn to_telemetry(&self) -> TelemetryConfig {
        TelemetryConfig {
            log_filter: self.telemetry.log_filter.clone(),
            json: self.telemetry.json,
            otlp_endpoint: self.telemetry.otlp_endpoint.clone(),
        }
    }
}

fn secs(field: &str, value: f64) -> Result<Duration, String> {
    Duration::try_from_secs_f64(value).map_err(|e| format!("{field}: {value} is not a valid duration ({e})"))
}

fn parse_class(raw: &str) -> Result<FailureClass, String> {
    raw.parse::<FailureClass>().map_err(|e| e.to_string())
}

// ─────────────────────────────────────────────────────────────────────────────
// Paths
// ─────────────────────────────────────────────────────────────────────────────

pub fn home_dir() -> PathBuf {
    PathBuf::from(
        std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn warden_dir(home: &Path) -> PathBuf {
    home.join(".warden")
}

/// `WARDEN_CONFIG` if set, otherwise `~/.warden/config.toml`.
pub fn config_path() -> PathBuf {
    match std::env::var("WARDEN_CONFIG") {
        Ok(p) if !p.trim().is_empty() => PathBuf::from(p),
        _ => config_path_for_home(&home_dir()),
    }
}

pub(crate) fn config_path_for_home(home: &Path) -> PathBuf {
    warden_dir(home).join("config.toml")
}

// ─────────────────────────────────────────────────────────────────────────────
// Load / save
// ─────────────────────────────────────────────────────────────────────────────

/// Load the config from a specific path.  Returns `None` if the file does
/// not exist.  Environment overrides are applied to a loaded file.
pub fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let mut cfg: Config =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Like [`load_from`], but a missing file yields the defaults (with
/// environment overrides applied).
pub fn load_or_default(path: &Path) -> Result<Config, String> {
    match load_from(path)? {
        Some(cfg) => Ok(cfg),
        None => {
            let mut cfg = Config::default();
            apply_env_overrides(&mut cfg);
            Ok(cfg)
        }
    }
}

/// Apply `WARDEN_*` environment variable overrides to `cfg`.  Values that do
/// not parse are ignored.
///
/// | Variable | Config field |
/// |---|---|
/// | `WARDEN_STORE_PATH` | `store.path` |
/// | `WARDEN_MAX_DEAD_LETTERS` | `dead_letter.max_letters` |
/// | `WARDEN_CONFIRMATION_TTL_SECS` | `confirmation.ttl_secs` |
/// | `WARDEN_MAX_PENDING` | `confirmation.max_pending` |
/// | `WARDEN_LOG_FORMAT` | `telemetry.json` (`json` / `compact`) |
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("WARDEN_STORE_PATH")
        && !v.trim().is_empty()
    {
        cfg.store.path = Some(PathBuf::from(v));
        cfg.store.in_memory = false;
    }
    if let Ok(v) = std::env::var("WARDEN_MAX_DEAD_LETTERS")
        && let Ok(n) = v.parse::<usize>()
    {
        cfg.dead_letter.max_letters = n;
    }
    if let Ok(v) = std::env::var("WARDEN_CONFIRMATION_TTL_SECS")
        && let Ok(ttl) = v.parse::<f64>()
        && ttl.is_finite()
        && ttl >= 0.0
    {
        cfg.confirmation.ttl_secs = ttl;
    }
    if let Ok(v) = std::env::var("WARDEN_MAX_PENDING")
        && let Ok(n) = v.parse::<usize>()
    {
        cfg.confirmation.max_pending = n;
    }
    match std::env::var("WARDEN_LOG_FORMAT").as_deref() {
        Ok("json") => cfg.telemetry.json = true,
        Ok("compact") | Ok("text") => cfg.telemetry.json = false,
        _ => {}
    }
}

/// Save the config to a specific path, creating the directory if needed.
pub fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
        // Owner only (rwx------) on Unix.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| format!("Failed to serialize config: {}", e))?;
    // Owner read/write only (rw-------) on Unix.
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| {
                use std::io::Write;
                f.write_all(raw.as_bytes())
            })
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn config_file_has_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(dir.path());

        save_to(&Config::default(), &path).expect("save");

        let file_mode = std::fs::metadata(&path).expect("file metadata").permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600, "config file must have 0o600 permissions");

        let dir_mode = std::fs::metadata(path.parent().unwrap())
            .expect("dir metadata")
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(dir_mode, 0o700, "config directory must have 0o700 permissions");
    }

    #[test]
    fn roundtrip_default_config() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(dir.path());
        save_to(&Config::default(), &path).expect("save");

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.breaker.defaults.failure_threshold, 5);
        assert_eq!(loaded.replay.cooldown_secs, 30.0);
        assert_eq!(loaded.confirmation.ttl_secs, 120.0);
        assert_eq!(loaded.replay.non_retryable, Config::default().replay.non_retryable);
    }

    #[test]
    fn defaults_convert_to_documented_governance_values() {
        let gov = Config::default().to_governance(Path::new("/home/op")).unwrap();
        assert_eq!(gov.replay.cooldown, Duration::from_secs(30));
        assert_eq!(gov.replay.budget_window, Duration::from_secs(300));
        assert_eq!(gov.replay.non_retryable, ReplayConfig::default().non_retryable);
        assert_eq!(gov.confirmation.default_ttl, Duration::from_secs(120));
        assert_eq!(gov.recovery.restart_window, Duration::from_secs(600));
        assert_eq!(gov.breaker.event_capacity, 200);
        assert_eq!(
            gov.store_path,
            Some(PathBuf::from("/home/op/.warden/warden.db"))
        );
    }

    #[test]
    fn partial_file_parses_sections_and_overrides() {
        let raw = r#"
            [breaker]
            failure_threshold = 3
            jitter_max_secs = 0.5

            [breaker.overrides.llm]
            failure_threshold = 1

            [retry.classes.timeout]
            max_attempts = 6
            backoff_base_ms = 100

            [retry.classes.backpressure]
            max_attempts = 0
            backoff_base_ms = 0
            retryable = false

            [store]
            in_memory = true
        "#;
        let cfg: Config = toml::from_str(raw).unwrap();
        let gov = cfg.to_governance(Path::new("/tmp")).unwrap();

        assert_eq!(gov.breaker.failure_threshold, 3);
        assert_eq!(gov.breaker.jitter_max, Duration::from_millis(500));
        assert_eq!(gov.breaker_overrides["llm"].failure_threshold, 1);
        assert_eq!(gov.retry_overrides[&FailureClass::Timeout].max_attempts, 6);
        assert!(!gov.retry_overrides[&FailureClass::Backpressure].retryable);
        assert_eq!(gov.store_path, None);
        assert_eq!(gov.confirmation.max_pending, 50);
    }

    #[test]
    fn unknown_failure_class_is_rejected() {
        let mut cfg = Config::default();
        cfg.replay.non_retryable.push("cosmic_rays".to_string());
        let err = cfg.to_governance(Path::new("/tmp")).unwrap_err();
        assert!(err.contains("cosmic_rays"));
    }

    #[test]
    fn negative_duration_is_rejected() {
        let mut cfg = Config::default();
        cfg.confirmation.ttl_secs = -1.0;
        let err = cfg.to_governance(Path::new("/tmp")).unwrap_err();
        assert!(err.contains("confirmation.ttl_secs"));
    }

    #[test]
    fn config_path_points_to_warden_dir() {
        let p = config_path_for_home(Path::new("/home/testuser"));
        assert_eq!(p, PathBuf::from("/home/testuser/.warden/config.toml"));
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(dir.path());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn apply_env_overrides_changes_store_and_limits() {
        // SAFETY: single test touching these env-vars.
        unsafe {
            std::env::set_var("WARDEN_STORE_PATH", "/data/warden.db");
            std::env::set_var("WARDEN_MAX_DEAD_LETTERS", "250");
            std::env::set_var("WARDEN_MAX_PENDING", "not-a-number");
        }
        let mut cfg = Config::default();
        cfg.store.in_memory = true;
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.store.path, Some(PathBuf::from("/data/warden.db")));
        assert!(!cfg.store.in_memory);
        assert_eq!(cfg.dead_letter.max_letters, 250);
        assert_eq!(cfg.confirmation.max_pending, 50);
        unsafe {
            std::env::remove_var("WARDEN_STORE_PATH");
            std::env::remove_var("WARDEN_MAX_DEAD_LETTERS");
            std::env::remove_var("WARDEN_MAX_PENDING");
        }
    }

    #[test]
    fn apply_env_overrides_ignores_negative_ttl() {
        // SAFETY: single test touching this env-var.
        unsafe { std::env::set_var("WARDEN_CONFIRMATION_TTL_SECS", "-5") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.confirmation.ttl_secs, 120.0);
        unsafe { std::env::remove_var("WARDEN_CONFIRMATION_TTL_SECS") };
    }
}
