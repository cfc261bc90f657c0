//! Store configuration.
//!
//! Every numeric knob that affects ranking or expiry lives here rather than
//! as a hidden constant. Configs load from TOML and can be overridden from
//! `CHRONICLE_*` environment variables.

use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use chronicle_state::{Category, TtlClass, SECONDS_PER_DAY};

use crate::error::{MemoryError, MemoryResult};
use crate::scorer::DecayParams;

/// How the similarity index reports closeness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityConvention {
    /// Higher is better, typically in [-1, 1]
    #[default]
    CosineSimilarity,
    /// Lower is better; converted with `1 - d` before scoring
    CosineDistance,
}

impl SimilarityConvention {
    /// Map an index-reported value onto a higher-is-better similarity.
    pub fn to_similarity(&self, raw: f64) -> f64 {
        match self {
            SimilarityConvention::CosineSimilarity => raw,
            SimilarityConvention::CosineDistance => 1.0 - raw,
        }
    }
}

/// Category → TTL mapping plus the purge grace period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetentionTable {
    pub ttl: BTreeMap<Category, TtlClass>,
    /// How long an Expired record is kept before physical purge
    #[serde(default)]
    pub purge_grace_seconds: u64,
}

impl Default for RetentionTable {
    fn default() -> Self {
        let ttl = Category::ALL
            .iter()
            .map(|c| match c {
                Category::TaskState => (*c, TtlClass::days(7)),
                _ => (*c, TtlClass::Never),
            })
            .collect();
        Self {
            ttl,
            purge_grace_seconds: 0,
        }
    }
}

impl RetentionTable {
    pub fn ttl_for(&self, category: Category) -> TtlClass {
        self.ttl.get(&category).copied().unwrap_or(TtlClass::Never)
    }

    pub fn with_ttl(mut self, category: Category, ttl: TtlClass) -> Self {
        self.ttl.insert(category, ttl);
        self
    }

    pub fn with_purge_grace(mut self, seconds: u64) -> Self {
        self.purge_grace_seconds = seconds;
        self
    }

    pub fn purge_grace(&self) -> chrono::Duration {
        chrono::Duration::try_seconds(i64::try_from(self.purge_grace_seconds).unwrap_or(i64::MAX))
            .unwrap_or(chrono::Duration::MAX)
    }
}

/// Query defaults applied when the caller leaves a field unset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryDefaults {
    pub default_top_k: usize,
    pub default_time_window_seconds: Option<u64>,
    /// Candidates requested from the index per result slot
    pub candidate_multiplier: usize,
    /// Return records that a newer version has superseded
    pub include_superseded: bool,
}

impl Default for QueryDefaults {
    fn default() -> Self {
        Self {
            default_top_k: 8,
            default_time_window_seconds: None,
            candidate_multiplier: 4,
            include_superseded: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapacityConfig {
    /// Records held (active + expired) before ingest triggers remediation
    #[serde(default)]
    pub soft_limit_records: Option<usize>,
}

/// Top-level configuration for a [`crate::MemoryStore`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub decay: DecayParams,
    pub similarity: SimilarityConvention,
    pub retention: RetentionTable,
    pub query: QueryDefaults,
    pub capacity: CapacityConfig,
}

fn env_parse<T: FromStr>(name: &str) -> MemoryResult<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| MemoryError::Config(format!("{name}={raw:?}: {e}"))),
        Err(_) => Ok(None),
    }
}

fn days_to_seconds(name: &str, days: u64) -> MemoryResult<u64> {
    days.checked_mul(SECONDS_PER_DAY)
        .ok_or_else(|| MemoryError::Config(format!("{name}={days} days overflows seconds")))
}

impl StoreConfig {
    pub fn from_toml_str(s: &str) -> MemoryResult<Self> {
        let config: StoreConfig =
            toml::from_str(s).map_err(|e| MemoryError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> MemoryResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| MemoryError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> MemoryResult<String> {
        toml::to_string_pretty(self).map_err(|e| MemoryError::Config(e.to_string()))
    }

    /// Defaults with environment overrides applied.
    pub fn from_env() -> MemoryResult<Self> {
        Self::default().with_env_overrides()
    }

    /// Apply overrides from the environment
    ///
    /// Reads:
    /// - CHRONICLE_DECAY_ALPHA, CHRONICLE_DECAY_BETA
    /// - CHRONICLE_DECAY_HALF_LIFE_HOURS
    /// - CHRONICLE_TTL_TASK_DAYS
    /// - CHRONICLE_TOP_K, CHRONICLE_TIME_WINDOW_DAYS
    /// - CHRONICLE_SOFT_LIMIT
    pub fn with_env_overrides(mut self) -> MemoryResult<Self> {
        if let Some(alpha) = env_parse::<f64>("CHRONICLE_DECAY_ALPHA")? {
            self.decay.alpha = alpha;
        }
        if let Some(beta) = env_parse::<f64>("CHRONICLE_DECAY_BETA")? {
            self.decay.beta = beta;
        }
        if let Some(hours) = env_parse::<f64>("CHRONICLE_DECAY_HALF_LIFE_HOURS")? {
            self.decay.tau_seconds = hours * 3600.0 / std::f64::consts::LN_2;
        }
        if let Some(days) = env_parse::<u64>("CHRONICLE_TTL_TASK_DAYS")? {
            let ttl = TtlClass::After {
                seconds: days_to_seconds("CHRONICLE_TTL_TASK_DAYS", days)?,
            };
            self.retention.ttl.insert(Category::TaskState, ttl);
        }
        if let Some(k) = env_parse::<usize>("CHRONICLE_TOP_K")? {
            self.query.default_top_k = k;
        }
        if let Some(days) = env_parse::<u64>("CHRONICLE_TIME_WINDOW_DAYS")? {
            self.query.default_time_window_seconds =
                Some(days_to_seconds("CHRONICLE_TIME_WINDOW_DAYS", days)?);
        }
        if let Some(limit) = env_parse::<usize>("CHRONICLE_SOFT_LIMIT")? {
            self.capacity.soft_limit_records = Some(limit);
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> MemoryResult<()> {
        self.decay
            .validate()
            .map_err(|e| MemoryError::Config(e.to_string()))?;
        if let Some(missing) = Category::ALL
            .iter()
            .find(|c| !self.retention.ttl.contains_key(*c))
        {
            return Err(MemoryError::Config(format!(
                "retention table has no entry for category {missing}"
            )));
        }
        if self.query.default_top_k == 0 {
            return Err(MemoryError::Config("default_top_k must be > 0".into()));
        }
        if self.query.candidate_multiplier == 0 {
            return Err(MemoryError::Config(
                "candidate_multiplier must be > 0".into(),
            ));
        }
        if self.capacity.soft_limit_records == Some(0) {
            return Err(MemoryError::Config("soft_limit_records must be > 0".into()));
        }
        Ok(())
    }
}
