use crate::metrics::snapshot::MetricsSnapshot;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use std::time::Instant;

/// Process-wide counters. Never reset during a run.
#[derive(Clone)]
pub struct MetricsCollector {
    in_stock: Arc<AtomicU64>,
    purchases: Arc<AtomicU64>,
    captchas: Arc<AtomicU64>,
    checks_total: Arc<AtomicU64>,
    checks_failed: Arc<AtomicU64>,
    checkouts_failed: Arc<AtomicU64>,
    active_monitors: Arc<AtomicU64>,
    awaiting_solve: Arc<AtomicU64>,
    start_time: Arc<Instant>,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self {
            in_stock: Arc::new(AtomicU64::new(0)),
            purchases: Arc::new(AtomicU64::new(0)),
            captchas: Arc::new(AtomicU64::new(0)),
            checks_total: Arc::new(AtomicU64::new(0)),
            checks_failed: Arc::new(AtomicU64::new(0)),
            checkouts_failed: Arc::new(AtomicU64::new(0)),
            active_monitors: Arc::new(AtomicU64::new(0)),
            awaiting_solve: Arc::new(AtomicU64::new(0)),
            start_time: Arc::new(Instant::now()),
        }
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_in_stock(&self) -> u64 {
        self.in_stock.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn increment_purchases(&self) -> u64 {
        self.purchases.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn increment_captchas(&self) -> u64 {
        self.captchas.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn record_check(&self, ok: bool) {
        self.checks_total.fetch_add(1, Ordering::SeqCst);
        if !ok {
            self.checks_failed.fetch_add(1, Ordering::SeqCst);
        }
    }

    pub fn increment_checkouts_failed(&self) {
        self.checkouts_failed.fetch_add(1, Ordering::SeqCst);
    }

    pub fn increment_active_monitors(&self) {
        self.active_monitors.fetch_add(1, Ordering::SeqCst);
    }

    pub fn decrement_active_monitors(&self) {
        self.active_monitors.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn increment_awaiting_solve(&self) {
        self.awaiting_solve.fetch_add(1, Ordering::SeqCst);
    }

    pub fn decrement_awaiting_solve(&self) {
        self.awaiting_solve.fetch_sub(1, Ordering::SeqCst);
    }

    /// `in_stock=…, purchases=…, captchas=…` for log lines.
    pub fn summary(&self) -> String {
        format!(
            "in_stock={}, purchases={}, captchas={}",
            self.in_stock.load(Ordering::SeqCst),
            self.purchases.load(Ordering::SeqCst),
            self.captchas.load(Ordering::SeqCst)
        )
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let checks_total = self.checks_total.load(Ordering::SeqCst);
        let checks_failed = self.checks_failed.load(Ordering::SeqCst);

        let check_success_rate = if checks_total > 0 {
            ((checks_total - checks_failed) as f64 / checks_total as f64) * 100.0
        } else {
            0.0
        };

        let elapsed = self.start_time.elapsed().as_secs_f64();

        MetricsSnapshot {
            in_stock: self.in_stock.load(Ordering::SeqCst),
            purchases: self.purchases.load(Ordering::SeqCst),
            captchas: self.captchas.load(Ordering::SeqCst),
            checks_total,
            checks_failed,
            checkouts_failed: self.checkouts_failed.load(Ordering::SeqCst),
            active_monitors: self.active_monitors.load(Ordering::SeqCst),
            awaiting_solve: self.awaiting_solve.load(Ordering::SeqCst),
            check_success_rate,
            checks_per_minute: if elapsed > 0.0 {
                checks_total as f64 / elapsed * 60.0
            } else {
                0.0
            },
            elapsed_seconds: elapsed,
        }
    }
}
