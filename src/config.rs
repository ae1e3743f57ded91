//! Configuration
//!
//! File model for the `casket` binary and anything else that wants to build
//! caches from settings rather than code. Files are YAML unless the
//! extension is `.json`. Durations are strings such as `"15s"`, `"20m"`,
//! `"99h"` or `"250ms"`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::cache::{
    CacheLimits, EntryStore, EvictionOrder, EvictionPolicy, MemoryStore, ObjectCache,
    SqliteLocation, SqliteStore, TieredCache,
};
use crate::digest::DigestProvider;
use crate::error::{Error, Result};
use crate::router::CacheRouter;

/// Path value selecting a private in-memory SQLite database
pub const SQLITE_MEMORY_PATH: &str = ":memory:";

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CasketConfig {
    /// Provider for identifiers computed by the binary
    pub provider: DigestProvider,
    pub primary: CacheSettings,
    /// Cache the primary rolls over into when full
    pub overflow: Option<CacheSettings>,
    pub ring: RingSettings,
    /// TTL applied when a caller does not pass one
    pub default_ttl: String,
    /// Prometheus exposition bind address
    pub metrics_addr: String,
}

impl Default for CasketConfig {
    fn default() -> Self {
        Self {
            provider: DigestProvider::Sha256,
            primary: CacheSettings::default(),
            overflow: None,
            ring: RingSettings::default(),
            default_ttl: "20m".to_string(),
            metrics_addr: "0.0.0.0:9102".to_string(),
        }
    }
}

/// Storage backend for one cache
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backend {
    Memory,
    /// SQLite database at `path`, or in memory for `":memory:"`
    Sqlite { path: PathBuf },
}

/// Settings for one cache in the chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub name: String,
    pub backend: Backend,
    pub max_collection_count: u64,
    pub max_collection_size: u64,
    pub max_object_size: u64,
    pub max_expiration: String,
    /// Wall-clock management interval; `"0"` disables
    pub manage_every: String,
    /// Operations between management cycles; 0 disables
    pub manage_every_io_count: u64,
    pub eviction: EvictionOrder,
}

impl Default for CacheSettings {
    fn default() -> Self {
        let limits = CacheLimits::default();
        Self {
            name: "primary".to_string(),
            backend: Backend::Memory,
            max_collection_count: limits.max_collection_count,
            max_collection_size: limits.max_collection_size,
            max_object_size: limits.max_object_size,
            max_expiration: "1h".to_string(),
            manage_every: "30s".to_string(),
            manage_every_io_count: 10_000,
            eviction: EvictionOrder::default(),
        }
    }
}

/// Placement ring settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RingSettings {
    /// Tier names; each gets its own cache chain built from the cache settings
    pub nodes: Vec<String>,
    /// Ring entries per tier
    pub virtual_nodes: u32,
}

impl Default for RingSettings {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            virtual_nodes: 64,
        }
    }
}

impl CasketConfig {
    /// Load from `path`
    ///
    /// A missing file is an error unless `create_if_missing` is set, in which
    /// case defaults are written to `path` and returned.
    pub fn load(path: impl AsRef<Path>, create_if_missing: bool) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            if !create_if_missing {
                return Err(Error::ConfigNotFound(path.display().to_string()));
            }
            let config = Self::default();
            config.save(path)?;
            info!(path = %path.display(), "Wrote default configuration");
            return Ok(config);
        }

        let text = std::fs::read_to_string(path)?;
        let config: Self = if is_json(path) {
            serde_json::from_str(&text)?
        } else {
            serde_yaml::from_str(&text)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Write to `path`, creating parent directories
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let text = if is_json(path) {
            serde_json::to_string_pretty(self)?
        } else {
            serde_yaml::to_string(self)?
        };
        std::fs::write(path, text)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.primary.validate()?;
        if let Some(overflow) = &self.overflow {
            overflow.validate()?;
            if overflow.name == self.primary.name {
                return Err(Error::Config(format!(
                    "overflow cache reuses the primary name '{}'",
                    overflow.name
                )));
            }
        }
        parse_duration(&self.default_ttl)?;

        let mut seen = std::collections::HashSet::new();
        for node in &self.ring.nodes {
            if node.trim().is_empty() {
                return Err(Error::Config("ring node names must not be empty".to_string()));
            }
            if !seen.insert(node) {
                return Err(Error::Config(format!("duplicate ring node '{}'", node)));
            }
        }
        Ok(())
    }

    pub fn default_ttl(&self) -> Result<Duration> {
        parse_duration(&self.default_ttl)
    }

    /// Primary cache chained to the overflow cache, not yet initialized
    pub fn build_cache(&self) -> Result<Arc<dyn ObjectCache>> {
        let overflow = self.overflow.as_ref().map(|o| o.build(None)).transpose()?;
        self.primary.build(overflow)
    }

    /// Router with one cache chain per ring node, rebuilt and initialized
    ///
    /// With no ring nodes configured the primary chain becomes the only tier.
    pub fn build_router(&self) -> Result<CacheRouter> {
        let router = CacheRouter::new(self.provider);

        if self.ring.nodes.is_empty() {
            router.add_tier(self.primary.name.clone(), self.build_cache()?, self.ring.virtual_nodes)?;
        }
        for node in &self.ring.nodes {
            let overflow = self
                .overflow
                .as_ref()
                .map(|o| o.for_node(node).build(None))
                .transpose()?;
            let cache = self.primary.for_node(node).build(overflow)?;
            router.add_tier(node.clone(), cache, self.ring.virtual_nodes)?;
        }

        router.rebuild();
        router.initialize_all()?;
        Ok(router)
    }
}

impl CacheSettings {
    pub fn memory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn sqlite(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            backend: Backend::Sqlite { path: path.into() },
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Config("cache name must not be empty".to_string()));
        }
        if self.max_collection_count == 0 || self.max_collection_size == 0 {
            return Err(Error::Config(format!(
                "cache '{}' needs non-zero collection limits",
                self.name
            )));
        }
        if self.max_object_size > self.max_collection_size {
            return Err(Error::Config(format!(
                "cache '{}': max_object_size {} exceeds max_collection_size {}",
                self.name, self.max_object_size, self.max_collection_size
            )));
        }
        parse_duration(&self.max_expiration)?;
        parse_interval(&self.manage_every)?;
        Ok(())
    }

    pub fn limits(&self) -> Result<CacheLimits> {
        Ok(CacheLimits {
            max_collection_count: self.max_collection_count,
            max_collection_size: self.max_collection_size,
            max_object_size: self.max_object_size,
            max_expiration: parse_duration(&self.max_expiration)?,
        })
    }

    pub fn manage_interval(&self) -> Result<Duration> {
        parse_interval(&self.manage_every)
    }

    /// Copy for one ring node; file paths get the node name as a suffix
    pub fn for_node(&self, node: &str) -> Self {
        let backend = match &self.backend {
            Backend::Sqlite { path } if path.as_os_str() != SQLITE_MEMORY_PATH => {
                let stem = path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "casket".to_string());
                let file = match path.extension() {
                    Some(ext) => format!("{}-{}.{}", stem, node, ext.to_string_lossy()),
                    None => format!("{}-{}", stem, node),
                };
                Backend::Sqlite {
                    path: path.with_file_name(file),
                }
            }
            other => other.clone(),
        };

        Self {
            name: format!("{}/{}", node, self.name),
            backend,
            ..self.clone()
        }
    }

    /// Construct the configured cache variant, chained to `overflow`
    pub fn build(&self, overflow: Option<Arc<dyn ObjectCache>>) -> Result<Arc<dyn ObjectCache>> {
        self.validate()?;
        match &self.backend {
            Backend::Memory => self.assemble(MemoryStore::new(), overflow),
            Backend::Sqlite { path } => {
                let location = if path.as_os_str() == SQLITE_MEMORY_PATH {
                    SqliteLocation::Memory
                } else {
                    SqliteLocation::File(path.clone())
                };
                self.assemble(SqliteStore::new(location), overflow)
            }
        }
    }

    fn assemble<S: EntryStore + 'static>(
        &self,
        store: S,
        overflow: Option<Arc<dyn ObjectCache>>,
    ) -> Result<Arc<dyn ObjectCache>> {
        let mut cache = TieredCache::new(self.name.clone(), store)
            .with_limits(self.limits()?)
            .with_policy(EvictionPolicy::with_order(self.eviction))
            .with_cadence(self.manage_interval()?, self.manage_every_io_count);
        if let Some(overflow) = overflow {
            cache = cache.with_overflow(overflow);
        }
        Ok(Arc::new(cache))
    }
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
}

/// Parse a duration like "30s", "5m", "1h30m", "250ms" or "7d"
///
/// A bare number is seconds. The result must be non-zero.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let duration = parse_interval(s)?;
    if duration.is_zero() {
        return Err(Error::DurationParse(format!(
            "duration must be greater than 0: {}",
            s
        )));
    }
    Ok(duration)
}

/// Like [`parse_duration`] but `"0"` is allowed and means disabled
pub fn parse_interval(s: &str) -> Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return Err(Error::DurationParse("empty duration string".to_string()));
    }

    let overflow = || Error::DurationParse(format!("duration out of range: {}", s));
    let mut total_ms: u64 = 0;
    let mut num_buf = String::new();
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c.is_ascii_digit() {
            num_buf.push(c);
            continue;
        }

        let num: u64 = num_buf
            .parse()
            .map_err(|_| Error::DurationParse(format!("invalid number in duration: {}", s)))?;
        num_buf.clear();

        let unit_ms: u64 = match c.to_ascii_lowercase() {
            'm' if chars.peek().is_some_and(|n| n.eq_ignore_ascii_case(&'s')) => {
                chars.next();
                1
            }
            'd' => 86_400_000,
            'h' => 3_600_000,
            'm' => 60_000,
            's' => 1_000,
            other => {
                return Err(Error::DurationParse(format!(
                    "unknown duration unit: {}",
                    other
                )))
            }
        };
        total_ms = num
            .checked_mul(unit_ms)
            .and_then(|ms| total_ms.checked_add(ms))
            .ok_or_else(overflow)?;
    }

    // Trailing number is seconds
    if !num_buf.is_empty() {
        let num: u64 = num_buf
            .parse()
            .map_err(|_| Error::DurationParse(format!("invalid number in duration: {}", s)))?;
        total_ms = num
            .checked_mul(1_000)
            .and_then(|ms| total_ms.checked_add(ms))
            .ok_or_else(overflow)?;
    }

    Ok(Duration::from_millis(total_ms))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("15s").unwrap(), Duration::from_secs(15));
        assert_eq!(parse_duration("20m").unwrap(), Duration::from_secs(1200));
        assert_eq!(parse_duration("99h").unwrap(), Duration::from_secs(99 * 3600));
        assert_eq!(parse_duration("1d").unwrap(), Duration::from_secs(86_400));
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("1H").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("90").unwrap(), Duration::from_secs(90));
    }

    #[test]
    fn test_parse_duration_compound() {
        assert_eq!(parse_duration("1h30m").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration("1m500ms").unwrap(), Duration::from_millis(60_500));
    }

    #[test]
    fn test_parse_duration_errors() {
        assert_matches!(parse_duration(""), Err(Error::DurationParse(_)));
        assert_matches!(parse_duration("0"), Err(Error::DurationParse(_)));
        assert_matches!(parse_duration("5x"), Err(Error::DurationParse(_)));
        assert_matches!(parse_duration("h"), Err(Error::DurationParse(_)));
        assert_matches!(
            parse_duration("99999999999999999d"),
            Err(Error::DurationParse(_))
        );
    }

    #[test]
    fn test_interval_allows_zero() {
        assert_eq!(parse_interval("0").unwrap(), Duration::ZERO);
        assert_eq!(parse_interval("0s").unwrap(), Duration::ZERO);
    }

    #[test]
    fn test_missing_file_not_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("casket.yaml");

        assert_matches!(CasketConfig::load(&path, false), Err(Error::ConfigNotFound(_)));
        assert!(!path.exists());
    }

    #[test]
    fn test_missing_file_created_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("casket.json");

        let config = CasketConfig::load(&path, true).unwrap();
        assert_eq!(config, CasketConfig::default());
        assert!(path.exists());
        assert_eq!(CasketConfig::load(&path, false).unwrap(), config);
    }

    #[test]
    fn test_yaml_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("casket.yaml");

        let config = CasketConfig {
            provider: DigestProvider::Sha512,
            overflow: Some(CacheSettings::sqlite("overflow", dir.path().join("overflow.db"))),
            ring: RingSettings {
                nodes: vec!["east".to_string(), "west".to_string()],
                virtual_nodes: 8,
            },
            ..CasketConfig::default()
        };
        config.save(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("kind: sqlite"));
        assert_eq!(CasketConfig::load(&path, false).unwrap(), config);
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config: CasketConfig = serde_yaml::from_str(
            "provider: SHA1\nprimary:\n  max_collection_count: 10\n  eviction: largest_first\n",
        )
        .unwrap();
        assert_eq!(config.provider, DigestProvider::Sha1);
        assert_eq!(config.primary.max_collection_count, 10);
        assert_eq!(config.primary.eviction, EvictionOrder::LargestFirst);
        assert_eq!(config.primary.name, "primary");
        assert!(config.overflow.is_none());
    }

    #[test]
    fn test_validate_rejects_bad_settings() {
        let mut config = CasketConfig::default();
        config.primary.max_object_size = config.primary.max_collection_size + 1;
        assert_matches!(config.validate(), Err(Error::Config(_)));

        let mut config = CasketConfig::default();
        config.overflow = Some(CacheSettings::memory("primary"));
        assert_matches!(config.validate(), Err(Error::Config(_)));

        let mut config = CasketConfig::default();
        config.ring.nodes = vec!["a".to_string(), "a".to_string()];
        assert_matches!(config.validate(), Err(Error::Config(_)));

        let mut config = CasketConfig::default();
        config.primary.max_expiration = "soon".to_string();
        assert_matches!(config.validate(), Err(Error::DurationParse(_)));
    }

    #[test]
    fn test_build_chain() {
        let config = CasketConfig {
            primary: CacheSettings {
                max_collection_count: 10,
                ..CacheSettings::memory("fast")
            },
            overflow: Some(CacheSettings::sqlite("slow", SQLITE_MEMORY_PATH)),
            ..CasketConfig::default()
        };

        let cache = config.build_cache().unwrap();
        assert_eq!(cache.name(), "fast");
        assert_eq!(cache.backend(), "memory");
        let overflow = cache.overflow().unwrap();
        assert_eq!(overflow.name(), "slow");
        assert_eq!(overflow.backend(), "sqlite");
    }

    #[test]
    fn test_for_node_suffixes_paths() {
        let settings = CacheSettings::sqlite("overflow", "/var/lib/casket/overflow.db");
        let node = settings.for_node("east");
        assert_eq!(node.name, "east/overflow");
        assert_eq!(
            node.backend,
            Backend::Sqlite {
                path: PathBuf::from("/var/lib/casket/overflow-east.db")
            }
        );

        let memory = CacheSettings::sqlite("overflow", SQLITE_MEMORY_PATH).for_node("east");
        assert_eq!(
            memory.backend,
            Backend::Sqlite {
                path: PathBuf::from(SQLITE_MEMORY_PATH)
            }
        );
    }

    #[test]
    fn test_build_router_per_node() {
        let config = CasketConfig {
            ring: RingSettings {
                nodes: vec!["east".to_string(), "west".to_string()],
                virtual_nodes: 8,
            },
            ..CasketConfig::default()
        };
        let router = config.build_router().unwrap();
        let mut names = router.tier_names();
        names.sort();
        assert_eq!(names, vec!["east", "west"]);
        assert_eq!(router.tier("east").unwrap().name(), "east/primary");
    }
}
