//! Prometheus Exposition
//!
//! Mirrors [`CacheStats`] into a private registry, one label set per cache in
//! the overflow chain. Counter values are cumulative totals copied from the
//! cache on every refresh, so they are exported as gauges.

use prometheus::{Encoder, GaugeVec, IntGaugeVec, Opts, Registry, TextEncoder};

use crate::cache::CacheStats;
use crate::error::{Error, Result};

const NAMESPACE: &str = "casket";

pub struct CacheTelemetry {
    registry: Registry,
    objects: IntGaugeVec,
    bytes: IntGaugeVec,
    accepting: IntGaugeVec,
    reads: IntGaugeVec,
    writes: IntGaugeVec,
    hits: IntGaugeVec,
    misses: IntGaugeVec,
    overflow_hits: IntGaugeVec,
    expired: IntGaugeVec,
    evicted: IntGaugeVec,
    relocated: IntGaugeVec,
    rejected: IntGaugeVec,
    manage_runs: IntGaugeVec,
    hit_ratio: GaugeVec,
    iops: GaugeVec,
}

fn prometheus_err(e: prometheus::Error) -> Error {
    Error::Internal(format!("prometheus: {}", e))
}

fn int_gauge(registry: &Registry, name: &str, help: &str) -> Result<IntGaugeVec> {
    let gauge = IntGaugeVec::new(
        Opts::new(name, help).namespace(NAMESPACE).subsystem("cache"),
        &["cache", "backend"],
    )
    .map_err(prometheus_err)?;
    registry
        .register(Box::new(gauge.clone()))
        .map_err(prometheus_err)?;
    Ok(gauge)
}

fn float_gauge(registry: &Registry, name: &str, help: &str) -> Result<GaugeVec> {
    let gauge = GaugeVec::new(
        Opts::new(name, help).namespace(NAMESPACE).subsystem("cache"),
        &["cache", "backend"],
    )
    .map_err(prometheus_err)?;
    registry
        .register(Box::new(gauge.clone()))
        .map_err(prometheus_err)?;
    Ok(gauge)
}

impl CacheTelemetry {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();
        let r = &registry;
        Ok(Self {
            objects: int_gauge(r, "objects", "Entries currently stored")?,
            bytes: int_gauge(r, "bytes", "Value bytes currently stored")?,
            accepting: int_gauge(r, "accepting_objects", "1 while the cache admits new objects")?,
            reads: int_gauge(r, "reads", "Read operations since initialize")?,
            writes: int_gauge(r, "writes", "Write operations since initialize")?,
            hits: int_gauge(r, "hits", "Reads served by this cache")?,
            misses: int_gauge(r, "misses", "Reads not served by this cache")?,
            overflow_hits: int_gauge(r, "overflow_hits", "Misses served by the overflow cache")?,
            expired: int_gauge(r, "expired", "Entries dropped after expiry")?,
            evicted: int_gauge(r, "evicted", "Entries evicted to relieve capacity")?,
            relocated: int_gauge(r, "relocated", "Entries rolled over to the overflow cache")?,
            rejected: int_gauge(r, "rejected", "Refused admissions")?,
            manage_runs: int_gauge(r, "manage_runs", "Completed management cycles")?,
            hit_ratio: float_gauge(r, "hit_ratio", "Hits divided by reads")?,
            iops: float_gauge(r, "average_iops", "Reads plus writes per second since initialize")?,
            registry,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Copy `stats` and its overflow chain into the gauges
    pub fn observe(&self, stats: &CacheStats) {
        let labels = [stats.name.as_str(), stats.backend];
        let c = &stats.counters;

        self.objects.with_label_values(&labels).set(stats.collection_count as i64);
        self.bytes.with_label_values(&labels).set(stats.collection_size as i64);
        self.accepting
            .with_label_values(&labels)
            .set(i64::from(stats.accepting_objects));
        self.reads.with_label_values(&labels).set(c.reads as i64);
        self.writes.with_label_values(&labels).set(c.writes as i64);
        self.hits.with_label_values(&labels).set(c.hits as i64);
        self.misses.with_label_values(&labels).set(c.misses as i64);
        self.overflow_hits.with_label_values(&labels).set(c.overflow_hits as i64);
        self.expired.with_label_values(&labels).set(c.expired as i64);
        self.evicted.with_label_values(&labels).set(c.evicted as i64);
        self.relocated.with_label_values(&labels).set(c.relocated as i64);
        self.rejected.with_label_values(&labels).set(c.rejected as i64);
        self.manage_runs.with_label_values(&labels).set(c.manage_runs as i64);
        self.hit_ratio.with_label_values(&labels).set(c.hit_ratio);
        self.iops.with_label_values(&labels).set(c.average_iops);

        if let Some(overflow) = &stats.overflow {
            self.observe(overflow);
        }
    }

    /// Text exposition of every registered metric
    pub fn encode(&self) -> Result<(String, Vec<u8>)> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(prometheus_err)?;
        Ok((encoder.format_type().to_string(), buffer))
    }
}

impl std::fmt::Debug for CacheTelemetry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheTelemetry").finish_non_exhaustive()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheLimits, MemoryCache, ObjectCache, ObjectCacheExt};
    use crate::digest::{DigestProvider, HashableString};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_exports_overflow_chain() {
        let secondary: Arc<dyn ObjectCache> = Arc::new(MemoryCache::memory("secondary"));
        let primary = MemoryCache::memory("primary")
            .with_limits(CacheLimits {
                max_collection_count: 4,
                ..CacheLimits::default()
            })
            .with_overflow(secondary);
        primary.initialize().unwrap();
        for i in 0..10 {
            let item = HashableString::new(i.to_string(), DigestProvider::Sha1);
            primary.add_hashable(&item, Duration::from_secs(60)).unwrap();
        }

        let telemetry = CacheTelemetry::new().unwrap();
        telemetry.observe(&primary.stats());
        let (content_type, body) = telemetry.encode().unwrap();
        let text = String::from_utf8(body).unwrap();

        assert!(content_type.starts_with("text/plain"));
        let line = |metric: &str, cache: &str| {
            text.lines()
                .find(|l| l.starts_with(metric) && l.contains(&format!("cache=\"{}\"", cache)))
                .map(str::to_string)
        };
        assert!(line("casket_cache_objects{", "primary").is_some());
        assert!(line("casket_cache_objects{", "secondary").is_some());
        assert!(line("casket_cache_writes{", "primary").unwrap().ends_with(" 10"));
        assert!(line("casket_cache_relocated{", "primary").is_some());
    }

    #[test]
    fn test_independent_registries() {
        let cache = MemoryCache::memory("only-a");
        cache.initialize().unwrap();

        let a = CacheTelemetry::new().unwrap();
        let b = CacheTelemetry::new().unwrap();
        a.observe(&cache.stats());

        let (_, a_body) = a.encode().unwrap();
        let (_, b_body) = b.encode().unwrap();
        assert!(String::from_utf8(a_body).unwrap().contains("only-a"));
        assert!(!String::from_utf8(b_body).unwrap().contains("only-a"));
    }
}
