use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub in_stock: u64,
    pub purchases: u64,
    pub captchas: u64,
    pub checks_total: u64,
    pub checks_failed: u64,
    pub checkouts_failed: u64,
    pub active_monitors: u64,
    pub awaiting_solve: u64,
    pub check_success_rate: f64,
    pub checks_per_minute: f64,
    pub elapsed_seconds: f64,
}
