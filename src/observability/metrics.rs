//! Routing statistics
//!
//! Counters are plain atomics. They are updated on every routed call and
//! never influence routing.

use crate::command::CommandClass;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Atomic counter for metrics
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    /// Create a new counter
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    /// Increment the counter by 1
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment the counter by a specific amount
    pub fn inc_by(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    /// Get the current value
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    /// Reset the counter
    pub fn reset(&self) {
        self.value.store(0, Ordering::Relaxed);
    }
}

/// Counters kept by a router
#[derive(Debug, Default)]
pub struct RouterMetrics {
    /// Calls routed to a shard replica
    pub reads: Counter,
    /// Calls routed to a shard master
    pub writes: Counter,
    /// Calls routed to the default node
    pub unhashed: Counter,
    /// Replica slots served by their master since construction
    pub failovers: Counter,
    /// Calls that came back with a store error
    pub upstream_errors: Counter,
    /// Total time spent waiting on nodes, in microseconds
    pub total_duration_us: Counter,
    /// Calls per target alias; the alias set is fixed at construction
    by_alias: HashMap<String, Counter>,
}

impl RouterMetrics {
    /// Create metrics tracking the given aliases
    pub fn with_aliases<I, S>(aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            by_alias: aliases
                .into_iter()
                .map(|alias| (alias.into(), Counter::new()))
                .collect(),
            ..Self::default()
        }
    }

    /// Record one routed call
    pub fn record_call(&self, class: CommandClass, alias: &str, duration: Duration) {
        match class {
            CommandClass::Read => self.reads.inc(),
            CommandClass::Write => self.writes.inc(),
            CommandClass::Unhashed => self.unhashed.inc(),
        }
        if let Some(counter) = self.by_alias.get(alias) {
            counter.inc();
        }
        self.total_duration_us.inc_by(duration.as_micros() as u64);
    }

    pub fn record_upstream_error(&self) {
        self.upstream_errors.inc();
    }

    pub fn total_calls(&self) -> u64 {
        self.reads.get() + self.writes.get() + self.unhashed.get()
    }

    /// Calls routed to one alias
    pub fn calls_to(&self, alias: &str) -> u64 {
        self.by_alias.get(alias).map(Counter::get).unwrap_or(0)
    }

    /// Average time per call in microseconds
    pub fn avg_duration_us(&self) -> f64 {
        let total = self.total_calls();
        if total == 0 {
            return 0.0;
        }
        self.total_duration_us.get() as f64 / total as f64
    }

    /// Point-in-time copy of every counter
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            reads: self.reads.get(),
            writes: self.writes.get(),
            unhashed: self.unhashed.get(),
            failovers: self.failovers.get(),
            upstream_errors: self.upstream_errors.get(),
            avg_duration_us: self.avg_duration_us(),
            calls_by_alias: self
                .by_alias
                .iter()
                .map(|(alias, counter)| (alias.clone(), counter.get()))
                .collect(),
        }
    }

    /// Reset call counters. Failovers describe the connection table and are kept.
    pub fn reset(&self) {
        self.reads.reset();
        self.writes.reset();
        self.unhashed.reset();
        self.upstream_errors.reset();
        self.total_duration_us.reset();
        for counter in self.by_alias.values() {
            counter.reset();
        }
    }
}

/// Plain copy of [`RouterMetrics`]
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsSnapshot {
    pub reads: u64,
    pub writes: u64,
    pub unhashed: u64,
    pub failovers: u64,
    pub upstream_errors: u64,
    pub avg_duration_us: f64,
    pub calls_by_alias: BTreeMap<String, u64>,
}

impl fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "reads:{}", self.reads)?;
        writeln!(f, "writes:{}", self.writes)?;
        writeln!(f, "unhashed:{}", self.unhashed)?;
        writeln!(f, "failovers:{}", self.failovers)?;
        writeln!(f, "upstream_errors:{}", self.upstream_errors)?;
        writeln!(f, "avg_duration_us:{:.2}", self.avg_duration_us)?;
        for (alias, calls) in &self.calls_by_alias {
            writeln!(f, "calls_{}:{}", alias, calls)?;
        }
        Ok(())
    }
}
