//! Operation timing and cache counters
//!
//! A `Diagnostics` context is created when the engine opens and is shared
//! by every component. Nothing here is process-global: two engines in the
//! same process keep separate counters.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Optional capability that may or may not be active in this deployment
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Capability {
    pub name: String,
    pub active: bool,
    pub detail: String,
}

#[derive(Debug, Default, Clone, Copy)]
struct OpCounters {
    count: u64,
    errors: u64,
    total_micros: u64,
    max_micros: u64,
}

/// Per-operation statistics as reported by `/stats`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OperationStats {
    pub count: u64,
    pub errors: u64,
    pub avg_micros: u64,
    pub max_micros: u64,
}

/// Point-in-time copy of all counters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticsSnapshot {
    pub started_at: DateTime<Utc>,
    pub uptime_secs: i64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub hit_rate: f64,
    pub fallback_hits: u64,
    pub promotions: u64,
    pub demotions: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub operations: BTreeMap<String, OperationStats>,
    pub capabilities: Vec<Capability>,
}

/// Shared counters and timers
#[derive(Debug)]
pub struct Diagnostics {
    started_at: DateTime<Utc>,
    operations: Mutex<BTreeMap<&'static str, OpCounters>>,
    capabilities: Mutex<Vec<Capability>>,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    fallback_hits: AtomicU64,
    promotions: AtomicU64,
    demotions: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new()
    }
}

impl Diagnostics {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            operations: Mutex::new(BTreeMap::new()),
            capabilities: Mutex::new(Vec::new()),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            fallback_hits: AtomicU64::new(0),
            promotions: AtomicU64::new(0),
            demotions: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        }
    }

    /// Start timing an operation. The timer records on `finish` or on drop
    /// (a dropped timer counts as an error).
    pub fn start(&self, op: &'static str) -> OpTimer<'_> {
        OpTimer {
            diagnostics: self,
            op,
            started: Instant::now(),
            done: false,
        }
    }

    pub fn record(&self, op: &'static str, elapsed: Duration, ok: bool) {
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        let mut ops = self.operations.lock();
        let entry = ops.entry(op).or_default();
        entry.count += 1;
        if !ok {
            entry.errors += 1;
        }
        entry.total_micros = entry.total_micros.saturating_add(micros);
        entry.max_micros = entry.max_micros.max(micros);
    }

    pub fn cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn fallback_hit(&self) {
        self.fallback_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn promotion(&self) {
        self.promotions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn demotion(&self) {
        self.demotions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn expiration(&self) {
        self.expirations.fetch_add(1, Ordering::Relaxed);
    }

    /// Declare whether an optional capability is active; replaces any
    /// earlier declaration with the same name
    pub fn set_capability(&self, name: &str, active: bool, detail: impl Into<String>) {
        let mut caps = self.capabilities.lock();
        let cap = Capability {
            name: name.to_string(),
            active,
            detail: detail.into(),
        };
        match caps.iter_mut().find(|c| c.name == name) {
            Some(existing) => *existing = cap,
            None => caps.push(cap),
        }
    }

    pub fn hit_rate(&self) -> f64 {
        let hits = self.cache_hits.load(Ordering::Relaxed);
        let misses = self.cache_misses.load(Ordering::Relaxed);
        if hits + misses == 0 {
            0.0
        } else {
            hits as f64 / (hits + misses) as f64
        }
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        let operations = self
            .operations
            .lock()
            .iter()
            .map(|(name, c)| {
                let avg = if c.count == 0 {
                    0
                } else {
                    c.total_micros / c.count
                };
                (
                    (*name).to_string(),
                    OperationStats {
                        count: c.count,
                        errors: c.errors,
                        avg_micros: avg,
                        max_micros: c.max_micros,
                    },
                )
            })
            .collect();

        let now = Utc::now();
        DiagnosticsSnapshot {
            started_at: self.started_at,
            uptime_secs: (now - self.started_at).num_seconds(),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            hit_rate: self.hit_rate(),
            fallback_hits: self.fallback_hits.load(Ordering::Relaxed),
            promotions: self.promotions.load(Ordering::Relaxed),
            demotions: self.demotions.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            operations,
            capabilities: self.capabilities.lock().clone(),
        }
    }
}

/// Guard returned by [`Diagnostics::start`]
pub struct OpTimer<'a> {
    diagnostics: &'a Diagnostics,
    op: &'static str,
    started: Instant,
    done: bool,
}

impl OpTimer<'_> {
    pub fn finish(mut self, ok: bool) {
        self.done = true;
        self.diagnostics.record(self.op, self.started.elapsed(), ok);
    }

    /// Record the outcome of a result and pass it through
    pub fn observe<T, E>(self, result: Result<T, E>) -> Result<T, E> {
        self.finish(result.is_ok());
        result
    }
}

impl Drop for OpTimer<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.diagnostics
                .record(self.op, self.started.elapsed(), false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timer_records_success_and_failure() {
        let diag = Diagnostics::new();
        diag.start("put").finish(true);
        diag.start("put").finish(false);
        {
            let _abandoned = diag.start("get");
        }

        let snap = diag.snapshot();
        assert_eq!(snap.operations["put"].count, 2);
        assert_eq!(snap.operations["put"].errors, 1);
        assert_eq!(snap.operations["get"].count, 1);
        assert_eq!(snap.operations["get"].errors, 1);
    }

    #[test]
    fn test_observe_passes_result_through() {
        let diag = Diagnostics::new();
        let ok: Result<u8, String> = diag.start("op").observe(Ok(7));
        assert_eq!(ok.unwrap(), 7);
        let err: Result<u8, String> = diag.start("op").observe(Err("bad".into()));
        assert!(err.is_err());
        assert_eq!(diag.snapshot().operations["op"].errors, 1);
    }

    #[test]
    fn test_hit_rate() {
        let diag = Diagnostics::new();
        assert_eq!(diag.hit_rate(), 0.0);
        diag.cache_hit();
        diag.cache_hit();
        diag.cache_hit();
        diag.cache_miss();
        assert!((diag.hit_rate() - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn test_capability_replaced_by_name() {
        let diag = Diagnostics::new();
        diag.set_capability("auth", false, "disabled");
        diag.set_capability("auth", true, "enabled");
        let caps = diag.snapshot().capabilities;
        assert_eq!(caps.len(), 1);
        assert!(caps[0].active);
    }
}
