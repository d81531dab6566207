use crate::config::schema::TargetConfig;
use crate::error::{Error, Result};
use std::sync::atomic::{AtomicU32, Ordering};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceBounds {
    pub min: f64,
    pub max: f64,
}

impl PriceBounds {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, price: f64) -> bool {
        price.is_finite() && price >= self.min && price <= self.max
    }

    pub fn ensure(&self, price: f64) -> Result<()> {
        if self.contains(price) {
            Ok(())
        } else {
            Err(Error::PriceOutOfRange {
                price,
                min: self.min,
                max: self.max,
            })
        }
    }
}

/// A monitored product. Shared by every monitor thread of the same target.
#[derive(Debug)]
pub struct Target {
    pub id: String,
    pub name: String,
    pub url: String,
    pub bounds: PriceBounds,
    pub threads: usize,
    pub proxy_count: usize,
    pub max_purchases: u32,
    pub monitor_only: bool,
    current_purchases: AtomicU32,
    pending_purchases: AtomicU32,
}

impl Target {
    pub fn new(id: impl Into<String>, name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            url: url.into(),
            bounds: PriceBounds::new(0.0, f64::MAX),
            threads: 1,
            proxy_count: 0,
            max_purchases: 0,
            monitor_only: false,
            current_purchases: AtomicU32::new(0),
            pending_purchases: AtomicU32::new(0),
        }
    }

    pub fn from_config(index: usize, config: &TargetConfig) -> Self {
        Self {
            id: config
                .id
                .clone()
                .unwrap_or_else(|| format!("target-{}", index)),
            name: config.name.clone(),
            url: config.url.clone(),
            bounds: PriceBounds::new(config.min_price, config.max_price),
            threads: config.threads.max(1),
            proxy_count: config.proxy_count,
            max_purchases: config.max_purchases,
            monitor_only: config.monitor_only,
            current_purchases: AtomicU32::new(config.current_purchases),
            pending_purchases: AtomicU32::new(0),
        }
    }

    pub fn with_bounds(mut self, min: f64, max: f64) -> Self {
        self.bounds = PriceBounds::new(min, max);
        self
    }

    pub fn with_quota(mut self, max_purchases: u32) -> Self {
        self.max_purchases = max_purchases;
        self
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads.max(1);
        self
    }

    pub fn with_proxy_count(mut self, count: usize) -> Self {
        self.proxy_count = count;
        self
    }

    pub fn monitor_only(mut self) -> Self {
        self.monitor_only = true;
        self
    }

    pub fn current_purchases(&self) -> u32 {
        self.current_purchases.load(Ordering::SeqCst)
    }

    /// Records a completed purchase and returns the new count.
    pub fn record_purchase(&self) -> u32 {
        self.current_purchases.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn quota_reached(&self) -> bool {
        self.max_purchases > 0 && self.current_purchases() >= self.max_purchases
    }

    /// Claims one purchase against the quota before checking out, so that
    /// threads of the same target never buy more than `max_purchases`.
    /// Returns `None` when completed plus in-flight purchases fill the quota.
    pub fn try_reserve_purchase(&self) -> Option<PurchaseSlot<'_>> {
        let reserved = self
            .pending_purchases
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |pending| {
                let unlimited = self.max_purchases == 0;
                (unlimited || self.current_purchases() + pending < self.max_purchases)
                    .then_some(pending + 1)
            })
            .is_ok();
        reserved.then_some(PurchaseSlot {
            target: self,
            committed: false,
        })
    }
}

/// An in-flight purchase. Dropping it without `commit` gives the slot back.
pub struct PurchaseSlot<'a> {
    target: &'a Target,
    committed: bool,
}

impl PurchaseSlot<'_> {
    /// Records the purchase and returns the new purchase count.
    pub fn commit(mut self) -> u32 {
        self.committed = true;
        let count = self.target.record_purchase();
        self.target.pending_purchases.fetch_sub(1, Ordering::SeqCst);
        count
    }
}

impl Drop for PurchaseSlot<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.target.pending_purchases.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds_are_inclusive() {
        let bounds = PriceBounds::new(10.0, 50.0);
        assert!(bounds.contains(10.0));
        assert!(bounds.contains(50.0));
        assert!(!bounds.contains(61.0));
        assert!(!bounds.contains(9.99));
        assert!(!bounds.contains(f64::NAN));
        assert!(matches!(
            bounds.ensure(61.0),
            Err(Error::PriceOutOfRange { price, .. }) if price == 61.0
        ));
    }

    #[test]
    fn quota_zero_means_unlimited() {
        let target = Target::new("t", "gpu", "https://www.amazon.com/dp/1");
        for _ in 0..5 {
            target.record_purchase();
        }
        assert!(!target.quota_reached());
    }

    #[test]
    fn quota_is_reached_at_max() {
        let target = Target::new("t", "gpu", "https://www.amazon.com/dp/1").with_quota(2);
        assert_eq!(target.record_purchase(), 1);
        assert!(!target.quota_reached());
        assert_eq!(target.record_purchase(), 2);
        assert!(target.quota_reached());
    }

    #[test]
    fn reservations_respect_quota() {
        let target = Target::new("t", "gpu", "https://www.amazon.com/dp/1").with_quota(1);
        let slot = target.try_reserve_purchase().unwrap();
        assert!(target.try_reserve_purchase().is_none());
        assert_eq!(slot.commit(), 1);
        assert!(target.quota_reached());
        assert!(target.try_reserve_purchase().is_none());
    }

    #[test]
    fn abandoned_reservation_is_returned() {
        let target = Target::new("t", "gpu", "https://www.amazon.com/dp/1").with_quota(1);
        drop(target.try_reserve_purchase().unwrap());
        assert!(target.try_reserve_purchase().is_some());
        assert_eq!(target.current_purchases(), 0);
    }
}
