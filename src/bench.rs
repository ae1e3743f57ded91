//! Cache Benchmark
//!
//! Mixed add/update/lookup/remove load against any [`ObjectCache`] for a
//! fixed wall-clock duration. Every `n`th insert is followed by a lookup,
//! an update or a remove depending on the skip settings.

use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::info;

use crate::cache::{Admission, ObjectCache, ObjectCacheExt};
use crate::digest::{DigestProvider, Hashable, HashableString};
use crate::error::{Error, Result};

/// Benchmark parameters
#[derive(Debug, Clone)]
pub struct BenchmarkOptions {
    pub duration: Duration,
    /// TTL for every inserted item
    pub item_life: Duration,
    pub provider: DigestProvider,
    /// Remove every Nth insert; 0 disables
    pub delete_skip: u64,
    /// Look up every Nth insert; 0 disables
    pub lookup_skip: u64,
    /// Re-insert every Nth insert; 0 disables
    pub update_skip: u64,
}

impl Default for BenchmarkOptions {
    fn default() -> Self {
        Self {
            duration: Duration::from_secs(30),
            item_life: Duration::from_secs(30),
            provider: DigestProvider::Sha256,
            delete_skip: 50,
            lookup_skip: 50,
            update_skip: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BenchmarkReport {
    pub cache: String,
    pub adds: u64,
    pub updates: u64,
    pub lookups: u64,
    pub removes: u64,
    pub final_count: u64,
    pub elapsed_ms: u128,
    pub average_iops: f64,
}

fn every(n: u64, skip: u64) -> bool {
    skip > 0 && n % skip == 0
}

fn admitted(cache: &dyn ObjectCache, admission: Admission) -> Result<()> {
    match admission {
        Admission::Rejected(reason) => Err(Error::NotAccepting {
            cache: cache.name().to_string(),
            reason: format!(
                "{}; adjust the run length, the capacity or add an overflow cache",
                reason
            ),
        }),
        _ => Ok(()),
    }
}

/// Run the benchmark; `cache` must already be initialized
///
/// Fails as soon as the cache stops accepting objects or a removed item is
/// still reported present.
pub fn run_benchmark(cache: &dyn ObjectCache, options: &BenchmarkOptions) -> Result<BenchmarkReport> {
    let started = Instant::now();
    let deadline = started + options.duration;

    let first = HashableString::new(
        format!("first {}", chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()),
        options.provider,
    );
    admitted(cache, cache.add_hashable(&first, Duration::from_secs(99 * 3600))?)?;

    let mut report = BenchmarkReport {
        cache: cache.name().to_string(),
        adds: 0,
        updates: 0,
        lookups: 0,
        removes: 0,
        final_count: 0,
        elapsed_ms: 0,
        average_iops: 0.0,
    };
    let mut last = first.clone();

    while Instant::now() < deadline {
        report.adds += 1;
        let n = report.adds;
        let item = HashableString::new(n.to_string(), options.provider);
        admitted(cache, cache.add_hashable(&item, options.item_life)?)?;

        if every(n, options.lookup_skip) {
            cache.get(&item.digest())?;
            report.lookups += 1;
        }

        if every(n, options.update_skip) {
            admitted(cache, cache.add_hashable(&item, options.item_life)?)?;
            report.updates += 1;
        }

        if every(n, options.delete_skip) {
            cache.remove(&item.digest())?;
            report.removes += 1;
            if cache.exists(&item.digest())? {
                return Err(Error::Internal(format!(
                    "item {} still present after remove",
                    item
                )));
            }
        } else {
            last = item;
        }
    }

    for item in [&first, &last] {
        if !cache.exists(&item.digest())? {
            return Err(Error::Internal(format!("item '{}' lost during benchmark", item)));
        }
    }

    report.final_count = cache.collection_count();
    report.elapsed_ms = started.elapsed().as_millis();
    report.average_iops = cache.total_average_iops();

    info!(
        cache = %report.cache,
        adds = report.adds,
        final_count = report.final_count,
        iops = format!("{:.1}", report.average_iops),
        "Benchmark complete"
    );
    Ok(report)
}

// =============================================================================
// Tests
// =============================================================================
