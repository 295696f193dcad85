//! Stuck-transaction monitor.
//!
//! A background thread that periodically scans the live-transaction set
//! and reports transactions alive longer than the configured timeout. The
//! monitor never aborts anything; cancellation stays cooperative.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::warn;

use crate::txn_set::TransactionSet;

const POLL_STEP: Duration = Duration::from_millis(100);

/// Handle to the monitor thread. Stopped on environment close (and on
/// drop).
#[derive(Debug)]
pub struct StuckTransactionMonitor {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl StuckTransactionMonitor {
    /// Spawn the monitor scanning `txns` for transactions older than
    /// `timeout_ms`.
    #[must_use]
    pub fn spawn(txns: TransactionSet, timeout_ms: u64) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_in_thread = Arc::clone(&stop);
        let handle = std::thread::Builder::new()
            .name("tephra-txn-monitor".to_owned())
            .spawn(move || {
                let timeout = Duration::from_millis(timeout_ms);
                let scan_period = (timeout / 2).max(POLL_STEP);
                let mut since_scan = Duration::ZERO;
                while !stop_in_thread.load(Ordering::Acquire) {
                    std::thread::sleep(POLL_STEP);
                    since_scan += POLL_STEP;
                    if since_scan < scan_period {
                        continue;
                    }
                    since_scan = Duration::ZERO;
                    for entry in txns.snapshot() {
                        let age = entry.started.elapsed();
                        if age > timeout {
                            warn!(
                                txn = entry.id,
                                age_ms = u64::try_from(age.as_millis()).unwrap_or(u64::MAX),
                                readonly = entry.readonly,
                                thread = entry.thread.as_deref().unwrap_or("<unnamed>"),
                                "transaction exceeded the configured timeout"
                            );
                        }
                    }
                }
            })
            .expect("monitor thread should spawn");
        Self {
            stop,
            handle: Some(handle),
        }
    }

    /// Stop the monitor and wait for its thread.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for StuckTransactionMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}
