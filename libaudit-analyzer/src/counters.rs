//! Process-wide counter service.
//!
//! Two mutex-guarded maps: labeled record counters (fed by the `Inc()` path
//! when metric export is enabled) and error counters. A cloneable handle is
//! passed through component construction instead of relying on globals.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct CounterMaps {
    records: HashMap<&'static str, u64>,
    errors: HashMap<String, u64>,
}

/// Shared handle onto the counter service.
#[derive(Clone, Default)]
pub struct CounterHandle {
    inner: Arc<Mutex<CounterMaps>>,
}

impl CounterHandle {
    pub fn new() -> CounterHandle {
        CounterHandle::default()
    }

    /// Increment the labeled counter for a record type
    pub fn inc_record(&self, label: &'static str) {
        let mut maps = self.inner.lock().unwrap();
        *maps.records.entry(label).or_insert(0) += 1;
    }

    /// Count an error by subject, logging the detail once per occurrence
    pub fn inc_error(&self, subject: &str, detail: &str) {
        debug!("error: {}: {}", subject, detail);
        let mut maps = self.inner.lock().unwrap();
        *maps.errors.entry(subject.to_string()).or_insert(0) += 1;
    }

    pub fn record_count(&self, label: &str) -> u64 {
        let maps = self.inner.lock().unwrap();
        maps.records.get(label).copied().unwrap_or(0)
    }

    pub fn error_count(&self, subject: &str) -> u64 {
        let maps = self.inner.lock().unwrap();
        maps.errors.get(subject).copied().unwrap_or(0)
    }

    pub fn num_errors(&self) -> u64 {
        let maps = self.inner.lock().unwrap();
        maps.errors.values().sum()
    }

    /// Sorted snapshot of the error map, for the teardown summary
    pub fn error_snapshot(&self) -> Vec<(String, u64)> {
        let maps = self.inner.lock().unwrap();
        let mut v: Vec<_> = maps.errors.iter().map(|(k, n)| (k.clone(), *n)).collect();
        v.sort();
        v
    }
}

#[cfg(test)]
mod tests {
    use super::CounterHandle;

    #[test]
    fn counters_accumulate() {
        let c = CounterHandle::new();
        c.inc_record("Connection");
        c.inc_record("Connection");
        c.inc_error("FSM", "rejected");
        assert_eq!(c.record_count("Connection"), 2);
        assert_eq!(c.error_count("FSM"), 1);
        assert_eq!(c.num_errors(), 1);
    }
}
