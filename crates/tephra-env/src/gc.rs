//! Garbage collection bookkeeping.
//!
//! Each commit feeds the records it superseded to the collector. A
//! reclamation pass only accounts records strictly below the oldest live
//! transaction root: anything newer could still be reachable from a live
//! snapshot. Accounting is per segment file; the resulting utilization
//! profile is persisted as JSON on close and reloaded on open, so a
//! restarted environment does not have to rediscover dead space.

use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tephra_error::Result;
use tephra_log::{ExpiredLoggable, Log};
use tephra_types::Address;
use tracing::{debug, info};

use crate::txn_set::TransactionSet;

/// Name of the persisted utilization profile at the environment location.
pub const UTILIZATION_PROFILE_FILE: &str = "tephra.gc.json";

/// Dead bytes per segment file, keyed by the segment's start address.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtilizationProfile {
    pub segments: BTreeMap<u64, u64>,
}

impl UtilizationProfile {
    fn account(&mut self, segment_max: u64, expired: &ExpiredLoggable) {
        let segment = (expired.address.get() / segment_max) * segment_max;
        *self.segments.entry(segment).or_default() += expired.length;
    }
}

#[derive(Debug, Default)]
struct GcState {
    pending: VecDeque<ExpiredLoggable>,
    utilization: UtilizationProfile,
}

/// The environment's garbage collector.
///
/// `suspend`/`resume` nest; `finish` is idempotent and safe to call from
/// several places during shutdown.
pub struct GarbageCollector {
    log: Arc<Log>,
    txns: TransactionSet,
    segment_max: u64,
    suspended: Mutex<u32>,
    finished: AtomicBool,
    state: Mutex<GcState>,
}

impl GarbageCollector {
    /// Collector for the given log, bounded by the given live-transaction
    /// set, with any previously persisted utilization profile loaded.
    #[must_use]
    pub fn new(log: Arc<Log>, txns: TransactionSet, segment_max: u64) -> Self {
        let utilization = load_profile(&profile_path(log.location()));
        Self {
            log,
            txns,
            segment_max: segment_max.max(1),
            suspended: Mutex::new(0),
            finished: AtomicBool::new(false),
            state: Mutex::new(GcState {
                pending: VecDeque::new(),
                utilization,
            }),
        }
    }

    /// Receive the records a commit superseded.
    pub fn fetch_expired_loggables(&self, expired: impl IntoIterator<Item = ExpiredLoggable>) {
        if self.finished.load(Ordering::Acquire) {
            return;
        }
        self.state.lock().pending.extend(expired);
    }

    /// Pause reclamation. Calls nest.
    pub fn suspend(&self) {
        *self.suspended.lock() += 1;
    }

    /// Undo one `suspend`.
    pub fn resume(&self) {
        let mut suspended = self.suspended.lock();
        *suspended = suspended.saturating_sub(1);
    }

    /// Run a reclamation pass unless suspended or finished.
    pub fn wake(&self) {
        if self.finished.load(Ordering::Acquire) || *self.suspended.lock() > 0 {
            return;
        }
        self.collect();
    }

    /// Account every pending expired record that no live transaction can
    /// still reach.
    fn collect(&self) {
        // No live transaction leaves everything up to the high address
        // reclaimable; a live transaction on the pristine root pins
        // everything.
        let bound: u64 = match self.txns.oldest() {
            None => self.log.high_address().get(),
            Some(entry) => entry.root.map_or(0, Address::get),
        };
        let mut state = self.state.lock();
        let mut kept = VecDeque::with_capacity(state.pending.len());
        let mut reclaimed = 0u64;
        while let Some(expired) = state.pending.pop_front() {
            if expired.address.get() < bound {
                reclaimed += expired.length;
                let segment_max = self.segment_max;
                state.utilization.account(segment_max, &expired);
            } else {
                kept.push_back(expired);
            }
        }
        state.pending = kept;
        if reclaimed > 0 {
            debug!(reclaimed, bound, "garbage collector pass");
        }
    }

    /// Stop the collector. Idempotent and re-entrant safe.
    pub fn finish(&self) {
        if !self.finished.swap(true, Ordering::AcqRel) {
            debug!("garbage collector finished");
        }
    }

    /// Persist the utilization profile next to the log files.
    pub fn save_utilization_profile(&self) -> Result<()> {
        let state = self.state.lock();
        let path = profile_path(self.log.location());
        let json = serde_json::to_string_pretty(&state.utilization)
            .expect("utilization profile always serializes");
        std::fs::write(&path, json)?;
        info!(path = %path.display(), "utilization profile saved");
        Ok(())
    }

    /// The current utilization profile.
    #[must_use]
    pub fn utilization(&self) -> UtilizationProfile {
        self.state.lock().utilization.clone()
    }

    /// Number of expired records not yet past the reclamation bound.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }
}

impl std::fmt::Debug for GarbageCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GarbageCollector")
            .field("finished", &self.finished.load(Ordering::Relaxed))
            .field("pending", &self.pending_count())
            .finish_non_exhaustive()
    }
}

fn profile_path(location: &Path) -> PathBuf {
    location.join(UTILIZATION_PROFILE_FILE)
}

fn load_profile(path: &Path) -> UtilizationProfile {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|json| serde_json::from_str(&json).ok())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::txn_set::TxnEntry;
    use std::time::Instant;
    use tempfile::tempdir;
    use tephra_log::LogConfig;

    fn open_log(dir: &Path) -> Arc<Log> {
        Arc::new(Log::open(&LogConfig::new(dir)).expect("log should open"))
    }

    fn expired(address: u64, length: u64) -> ExpiredLoggable {
        ExpiredLoggable {
            address: Address::new(address),
            length,
        }
    }

    #[test]
    fn collects_everything_without_live_transactions() {
        let dir = tempdir().expect("tempdir");
        let log = open_log(dir.path());
        log.append(9, &[0; 64]).expect("append");
        let gc = GarbageCollector::new(Arc::clone(&log), TransactionSet::new(), 1024);
        gc.fetch_expired_loggables([expired(0, 16), expired(20, 8)]);
        gc.wake();
        assert_eq!(gc.pending_count(), 0);
        assert_eq!(gc.utilization().segments.get(&0), Some(&24));
    }

    #[test]
    fn live_transaction_bounds_reclamation() {
        let dir = tempdir().expect("tempdir");
        let log = open_log(dir.path());
        log.append(9, &[0; 64]).expect("append");
        let txns = TransactionSet::new();
        txns.add(TxnEntry {
            id: 1,
            root: Some(Address::new(16)),
            started: Instant::now(),
            thread: None,
            readonly: false,
        });
        let gc = GarbageCollector::new(Arc::clone(&log), txns.clone(), 1024);
        gc.fetch_expired_loggables([expired(0, 8), expired(32, 8)]);
        gc.wake();
        assert_eq!(gc.pending_count(), 1, "record above the bound is kept");
        txns.remove(1);
        gc.wake();
        assert_eq!(gc.pending_count(), 0);
    }

    #[test]
    fn suspend_blocks_wake_until_resume() {
        let dir = tempdir().expect("tempdir");
        let log = open_log(dir.path());
        log.append(9, &[0; 64]).expect("append");
        let gc = GarbageCollector::new(Arc::clone(&log), TransactionSet::new(), 1024);
        gc.fetch_expired_loggables([expired(0, 8)]);
        gc.suspend();
        gc.wake();
        assert_eq!(gc.pending_count(), 1);
        gc.resume();
        gc.wake();
        assert_eq!(gc.pending_count(), 0);
    }

    #[test]
    fn profile_round_trips_through_disk() {
        let dir = tempdir().expect("tempdir");
        {
            let log = open_log(dir.path());
            log.append(9, &[0; 64]).expect("append");
            let gc = GarbageCollector::new(Arc::clone(&log), TransactionSet::new(), 1024);
            gc.fetch_expired_loggables([expired(0, 40)]);
            gc.wake();
            gc.save_utilization_profile().expect("save profile");
        }
        let log = open_log(dir.path());
        let gc = GarbageCollector::new(log, TransactionSet::new(), 1024);
        assert_eq!(gc.utilization().segments.get(&0), Some(&40));
    }

    #[test]
    fn finish_is_idempotent_and_stops_intake() {
        let dir = tempdir().expect("tempdir");
        let log = open_log(dir.path());
        let gc = GarbageCollector::new(Arc::clone(&log), TransactionSet::new(), 1024);
        gc.finish();
        gc.finish();
        gc.fetch_expired_loggables([expired(0, 8)]);
        assert_eq!(gc.pending_count(), 0);
    }
}
