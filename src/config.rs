//! Configuration loading for Stillpoint.
//!
//! Configuration follows a precedence chain:
//! 1. Environment variables (highest priority)
//! 2. Project config (`.stillpoint/config.toml`)
//! 3. User config (`~/.stillpoint/config.toml`)
//! 4. Defaults (lowest priority)
//!
//! Loading never fails on a missing or unreadable file; those layers are
//! skipped. Validation is separate and strict: [`Config::validate`] turns
//! malformed access windows, a zero gap and similar mistakes into
//! [`StillpointError::Config`], which callers must not ignore.

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::biometrics::{PassPolicy, TestThresholds};
use crate::core::{AccessPolicy, AccessWindow, CourseStructure};
use crate::error::{FailOpen, Result, StillpointError};

/// Main configuration struct for Stillpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Course layout.
    pub course: CourseConfig,
    /// Day and level unlock rules.
    pub progression: ProgressionConfig,
    /// Daily access windows.
    pub access: AccessConfig,
    /// Meditation test thresholds and limits.
    pub meditation: MeditationConfig,
}

/// Course layout configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CourseConfig {
    /// Levels in order.
    pub levels: Vec<LevelConfig>,
    /// Level whose entry is gated by the meditation test; 0 means the
    /// course has no meditation test.
    pub meditation_test_level: u32,
}

impl CourseConfig {
    /// The gated level, if the course has a meditation test.
    pub fn meditation_test(&self) -> Option<u32> {
        (self.meditation_test_level != NO_MEDITATION_TEST).then_some(self.meditation_test_level)
    }
}

/// One level of the course.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LevelConfig {
    /// Number of days in the level.
    pub days: u32,
    /// Optional content locator per day, in day order.
    #[serde(default)]
    pub content: Vec<String>,
}

/// Default number of days in each level.
pub const DEFAULT_DAYS_PER_LEVEL: u32 = 7;

/// Default number of levels.
pub const DEFAULT_LEVEL_COUNT: usize = 5;

/// Default level gated by the meditation test.
pub const DEFAULT_MEDITATION_TEST_LEVEL: u32 = 4;

/// `meditation_test_level` value that disables the meditation test.
pub const NO_MEDITATION_TEST: u32 = 0;

impl Default for CourseConfig {
    fn default() -> Self {
        Self {
            levels: (0..DEFAULT_LEVEL_COUNT)
                .map(|_| LevelConfig {
                    days: DEFAULT_DAYS_PER_LEVEL,
                    content: Vec::new(),
                })
                .collect(),
            meditation_test_level: DEFAULT_MEDITATION_TEST_LEVEL,
        }
    }
}

/// Largest gap that still fits a time delta.
pub const MAX_GAP_SECONDS: u64 = (i64::MAX / 1000) as u64;

/// Unlock rules.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProgressionConfig {
    /// Minimum seconds between completing a day and opening the next one.
    pub gap_seconds: u64,
    /// Months after first mastery before later levels lock again.
    /// 0 disables rewatch expiry.
    pub rewatch_expiry_months: u32,
}

impl ProgressionConfig {
    /// A zero gap would let a whole level be completed in one sitting.
    pub fn is_valid_gap_seconds(value: u64) -> bool {
        value > 0 && value <= MAX_GAP_SECONDS
    }
}

impl Default for ProgressionConfig {
    fn default() -> Self {
        Self {
            gap_seconds: 24 * 60 * 60,
            rewatch_expiry_months: 6,
        }
    }
}

/// Access window configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AccessConfig {
    /// Daily windows; empty means content is always accessible.
    pub windows: Vec<AccessWindow>,
}

/// Meditation test configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MeditationConfig {
    /// Minimum session length in minutes.
    pub min_minutes: f64,
    /// Minimum share of face frames with both eyes closed (0-100).
    pub min_eye_closed_pct: f64,
    /// Maximum head displacement per minute of session.
    pub max_head_movement_per_minute: f64,
    /// Maximum hand displacement per minute of session.
    pub max_hand_movement_per_minute: f64,
    /// Minimum hand stability score (0-1].
    pub min_hand_stability: f64,
    /// Hard session limit in minutes.
    pub max_duration_minutes: u32,
    /// Whether failed thresholds fail the test. When false, every finished
    /// session passes and threshold failures are only reported.
    pub enforce_thresholds: bool,
}

impl MeditationConfig {
    /// Thresholds for the evaluator.
    pub fn thresholds(&self) -> TestThresholds {
        TestThresholds {
            min_minutes: self.min_minutes,
            min_eye_closed_pct: self.min_eye_closed_pct,
            max_head_movement_per_minute: self.max_head_movement_per_minute,
            max_hand_movement_per_minute: self.max_hand_movement_per_minute,
            min_hand_stability: self.min_hand_stability,
        }
    }

    /// Pass-decision policy selected by `enforce_thresholds`.
    pub fn pass_policy(&self) -> PassPolicy {
        if self.enforce_thresholds {
            PassPolicy::EnforceThresholds
        } else {
            PassPolicy::AlwaysPass
        }
    }

    /// Hard session limit.
    pub fn max_duration(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.max_duration_minutes as i64)
    }

    fn validate(&self) -> Result<()> {
        let non_negative = [
            ("min_minutes", self.min_minutes),
            ("max_head_movement_per_minute", self.max_head_movement_per_minute),
            ("max_hand_movement_per_minute", self.max_hand_movement_per_minute),
        ];
        for (name, value) in non_negative {
            if !value.is_finite() || value < 0.0 {
                return Err(StillpointError::config(format!(
                    "meditation.{} must be a non-negative number, got {}",
                    name, value
                )));
            }
        }
        if !Self::is_valid_percentage(self.min_eye_closed_pct) {
            return Err(StillpointError::config(format!(
                "meditation.min_eye_closed_pct must be in [0, 100], got {}",
                self.min_eye_closed_pct
            )));
        }
        if !(self.min_hand_stability.is_finite() && (0.0..=1.0).contains(&self.min_hand_stability))
        {
            return Err(StillpointError::config(format!(
                "meditation.min_hand_stability must be in [0, 1], got {}",
                self.min_hand_stability
            )));
        }
        if self.max_duration_minutes == 0 {
            return Err(StillpointError::config(
                "meditation.max_duration_minutes must be at least 1",
            ));
        }
        Ok(())
    }

    /// Check that a percentage is finite and within [0, 100].
    pub fn is_valid_percentage(value: f64) -> bool {
        value.is_finite() && (0.0..=100.0).contains(&value)
    }
}

impl Default for MeditationConfig {
    fn default() -> Self {
        Self {
            min_minutes: 30.0,
            min_eye_closed_pct: 90.0,
            max_head_movement_per_minute: 0.5,
            max_hand_movement_per_minute: 0.5,
            min_hand_stability: 0.05,
            max_duration_minutes: 60,
            enforce_thresholds: false,
        }
    }
}

impl Config {
    /// Load configuration with full precedence chain.
    ///
    /// Precedence (highest to lowest):
    /// 1. Environment variables
    /// 2. Project config (`.stillpoint/config.toml` in cwd)
    /// 3. User config (`~/.stillpoint/config.toml`)
    /// 4. Defaults
    pub fn load() -> Self {
        match env::current_dir() {
            Ok(cwd) => Self::load_from_cwd(&cwd),
            Err(_) => {
                let mut config = Config::default();
                if let Some(user_config) = Self::load_user_config() {
                    config = config.merge(user_config);
                }
                config.apply_env_overrides();
                config
            }
        }
    }

    /// Load configuration with a specific working directory.
    pub fn load_from_cwd(cwd: &Path) -> Self {
        let mut config = Config::default();

        if let Some(user_config) = Self::load_user_config() {
            config = config.merge(user_config);
        }

        if let Some(project_config) = Self::load_project_config(cwd) {
            config = config.merge(project_config);
        }

        config.apply_env_overrides();

        config
    }

    /// Load from the precedence chain and reject malformed configuration.
    pub fn load_validated(cwd: &Path) -> Result<Self> {
        let config = Self::load_from_cwd(cwd);
        config.validate()?;
        Ok(config)
    }

    /// Load user config from `~/.stillpoint/config.toml`.
    fn load_user_config() -> Option<Config> {
        let home = stillpoint_home()?;
        let config_path = home.join("config.toml");
        Self::load_layer(&config_path)
    }

    /// Load project config from `.stillpoint/config.toml` in the given directory.
    fn load_project_config(cwd: &Path) -> Option<Config> {
        let config_path = cwd.join(".stillpoint").join("config.toml");
        Self::load_layer(&config_path)
    }

    /// Load an optional layer. A missing file is silent; a file that exists
    /// but does not parse is reported and skipped.
    fn load_layer(path: &Path) -> Option<Config> {
        if !path.exists() {
            return None;
        }
        Self::load_from_file(path)
            .map(Some)
            .fail_open_with(&format!("ignoring config layer {}", path.display()), None)
    }

    /// Load config from a specific file path.
    pub fn load_from_file(path: &Path) -> Result<Config> {
        let content = fs::read_to_string(path).map_err(|e| StillpointError::storage(path, e))?;
        toml::from_str(&content).map_err(|e| StillpointError::config(e.to_string()))
    }

    /// Check the whole configuration.
    pub fn validate(&self) -> Result<()> {
        CourseStructure::from_config(&self.course)?;
        AccessPolicy::new(self.access.windows.clone())?;
        if !ProgressionConfig::is_valid_gap_seconds(self.progression.gap_seconds) {
            return Err(StillpointError::config(format!(
                "progression.gap_seconds must be between 1 and {}, got {}",
                MAX_GAP_SECONDS, self.progression.gap_seconds
            )));
        }
        self.meditation.validate()
    }

    /// Course layout described by this configuration.
    pub fn course_structure(&self) -> Result<CourseStructure> {
        CourseStructure::from_config(&self.course)
    }

    /// Access policy described by this configuration.
    pub fn access_policy(&self) -> Result<AccessPolicy> {
        AccessPolicy::new(self.access.windows.clone())
    }

    /// Apply environment variable overrides.
    fn apply_env_overrides(&mut self) {
        // STILLPOINT_GAP_SECONDS
        if let Ok(val) = env::var("STILLPOINT_GAP_SECONDS") {
            match val.parse::<u64>() {
                Ok(n) if ProgressionConfig::is_valid_gap_seconds(n) => {
                    self.progression.gap_seconds = n;
                }
                _ => tracing::warn!(
                    "Invalid STILLPOINT_GAP_SECONDS value '{}'. \
                    Expected a positive integer. Using '{}'.",
                    val,
                    self.progression.gap_seconds
                ),
            }
        }

        // STILLPOINT_REWATCH_EXPIRY_MONTHS
        if let Ok(val) = env::var("STILLPOINT_REWATCH_EXPIRY_MONTHS") {
            match val.parse::<u32>() {
                Ok(n) => self.progression.rewatch_expiry_months = n,
                Err(_) => tracing::warn!(
                    "Invalid STILLPOINT_REWATCH_EXPIRY_MONTHS value '{}'. \
                    Expected a non-negative integer. Using '{}'.",
                    val,
                    self.progression.rewatch_expiry_months
                ),
            }
        }

        // STILLPOINT_MIN_TEST_MINUTES
        if let Ok(val) = env::var("STILLPOINT_MIN_TEST_MINUTES") {
            match val.parse::<f64>() {
                Ok(n) if n.is_finite() && n >= 0.0 => self.meditation.min_minutes = n,
                _ => tracing::warn!(
                    "Invalid STILLPOINT_MIN_TEST_MINUTES value '{}'. \
                    Expected a non-negative number. Using '{}'.",
                    val,
                    self.meditation.min_minutes
                ),
            }
        }

        // STILLPOINT_MIN_EYE_CLOSED_PCT
        if let Ok(val) = env::var("STILLPOINT_MIN_EYE_CLOSED_PCT") {
            match val.parse::<f64>() {
                Ok(n) if MeditationConfig::is_valid_percentage(n) => {
                    self.meditation.min_eye_closed_pct = n;
                }
                _ => tracing::warn!(
                    "Invalid STILLPOINT_MIN_EYE_CLOSED_PCT value '{}'. \
                    Must be in range [0, 100]. Using '{}'.",
                    val,
                    self.meditation.min_eye_closed_pct
                ),
            }
        }

        // STILLPOINT_MAX_TEST_MINUTES
        if let Ok(val) = env::var("STILLPOINT_MAX_TEST_MINUTES") {
            match val.parse::<u32>() {
                Ok(n) if n > 0 => self.meditation.max_duration_minutes = n,
                _ => tracing::warn!(
                    "Invalid STILLPOINT_MAX_TEST_MINUTES value '{}'. \
                    Expected a positive integer. Using '{}'.",
                    val,
                    self.meditation.max_duration_minutes
                ),
            }
        }

        // STILLPOINT_ENFORCE_TEST_THRESHOLDS
        if let Ok(val) = env::var("STILLPOINT_ENFORCE_TEST_THRESHOLDS") {
            self.meditation.enforce_thresholds = val == "true" || val == "1";
        }
    }

    /// Merge another config into this one.
    ///
    /// The `other` config takes precedence field by field: every value in
    /// `other` that differs from the default replaces the value in `self`.
    ///
    /// # Limitation
    ///
    /// A layer cannot set a value back to its default to undo a non-default
    /// value from a lower layer, since "unset" and "explicitly default" look
    /// the same after deserialization.
    fn merge(mut self, other: Config) -> Self {
        let default_course = CourseConfig::default();
        if other.course.levels != default_course.levels {
            self.course.levels = other.course.levels;
        }
        if other.course.meditation_test_level != default_course.meditation_test_level {
            self.course.meditation_test_level = other.course.meditation_test_level;
        }

        let default_progression = ProgressionConfig::default();
        if other.progression.gap_seconds != default_progression.gap_seconds {
            self.progression.gap_seconds = other.progression.gap_seconds;
        }
        if other.progression.rewatch_expiry_months != default_progression.rewatch_expiry_months {
            self.progression.rewatch_expiry_months = other.progression.rewatch_expiry_months;
        }

        if !other.access.windows.is_empty() {
            self.access.windows = other.access.windows;
        }

        let default_meditation = MeditationConfig::default();
        if other.meditation.min_minutes != default_meditation.min_minutes {
            self.meditation.min_minutes = other.meditation.min_minutes;
        }
        if other.meditation.min_eye_closed_pct != default_meditation.min_eye_closed_pct {
            self.meditation.min_eye_closed_pct = other.meditation.min_eye_closed_pct;
        }
        if other.meditation.max_head_movement_per_minute
            != default_meditation.max_head_movement_per_minute
        {
            self.meditation.max_head_movement_per_minute =
                other.meditation.max_head_movement_per_minute;
        }
        if other.meditation.max_hand_movement_per_minute
            != default_meditation.max_hand_movement_per_minute
        {
            self.meditation.max_hand_movement_per_minute =
                other.meditation.max_hand_movement_per_minute;
        }
        if other.meditation.min_hand_stability != default_meditation.min_hand_stability {
            self.meditation.min_hand_stability = other.meditation.min_hand_stability;
        }
        if other.meditation.max_duration_minutes != default_meditation.max_duration_minutes {
            self.meditation.max_duration_minutes = other.meditation.max_duration_minutes;
        }
        if other.meditation.enforce_thresholds != default_meditation.enforce_thresholds {
            self.meditation.enforce_thresholds = other.meditation.enforce_thresholds;
        }

        self
    }
}

/// Get the Stillpoint home directory.
///
/// Checks `STILLPOINT_HOME` first, then falls back to `~/.stillpoint`.
/// An empty `STILLPOINT_HOME` is ignored.
pub fn stillpoint_home() -> Option<PathBuf> {
    if let Ok(home) = env::var("STILLPOINT_HOME") {
        if home.is_empty() {
            tracing::warn!("STILLPOINT_HOME is empty, using default");
        } else {
            let path = PathBuf::from(&home);
            if path.is_absolute() {
                return Some(path);
            }
            if let Ok(canonical) = path.canonicalize() {
                return Some(canonical);
            }
            tracing::warn!("STILLPOINT_HOME is relative and doesn't exist, using as-is");
            return Some(path);
        }
    }

    if let Some(home) = dirs::home_dir() {
        return Some(home.join(".stillpoint"));
    }

    let fallback = env::temp_dir().join("stillpoint");
    tracing::warn!(
        "HOME not set, using fallback location: {}",
        fallback.display()
    );
    Some(fallback)
}

/// Directory holding the locally persisted progress file.
pub fn progress_dir() -> Option<PathBuf> {
    stillpoint_home().map(|home| home.join("progress"))
}
