//! Shared proxy list with per-shop cooldowns and exclusive leases.

use super::ProxyEndpoint;
use crate::error::{Error, Result};
use crate::shop::ShopKind;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;

/// Lifetime value that turns off cooldown-based rotation for a shop kind.
pub const ROTATION_DISABLED: i64 = -1;

#[derive(Debug)]
struct ProxySlot {
    endpoint: ProxyEndpoint,
    in_use: bool,
    last_used: HashMap<ShopKind, DateTime<Utc>>,
}

impl ProxySlot {
    fn eligible(&self, shop: ShopKind, lifetime_minutes: i64, now: DateTime<Utc>) -> bool {
        if self.in_use {
            return false;
        }
        if lifetime_minutes == ROTATION_DISABLED {
            return true;
        }
        match self.last_used.get(&shop) {
            // a cooldown past the end of the calendar never ends
            Some(last) => ChronoDuration::try_minutes(lifetime_minutes)
                .and_then(|rest| last.checked_add_signed(rest))
                .is_some_and(|ready| ready <= now),
            None => true,
        }
    }
}

/// Proxies handed out by one `acquire` call. Must go back through `release`.
#[derive(Debug, Clone, PartialEq)]
pub struct ProxyLease {
    shop: ShopKind,
    slots: Vec<usize>,
    endpoints: Vec<ProxyEndpoint>,
}

impl ProxyLease {
    pub fn empty(shop: ShopKind) -> Self {
        Self {
            shop,
            slots: Vec::new(),
            endpoints: Vec::new(),
        }
    }

    pub fn shop(&self) -> ShopKind {
        self.shop
    }

    pub fn endpoints(&self) -> &[ProxyEndpoint] {
        &self.endpoints
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

pub struct ProxyRegistry {
    slots: Mutex<Vec<ProxySlot>>,
}

impl ProxyRegistry {
    pub fn new(endpoints: Vec<ProxyEndpoint>) -> Self {
        let slots = endpoints
            .into_iter()
            .map(|endpoint| ProxySlot {
                endpoint,
                in_use: false,
                last_used: HashMap::new(),
            })
            .collect();
        Self {
            slots: Mutex::new(slots),
        }
    }

    /// Leases `count` proxies that are free and rested for `shop`, or none at all.
    pub fn acquire(&self, count: usize, shop: ShopKind, lifetime_minutes: i64) -> Result<ProxyLease> {
        self.acquire_at(count, shop, lifetime_minutes, Utc::now())
    }

    pub(crate) fn acquire_at(
        &self,
        count: usize,
        shop: ShopKind,
        lifetime_minutes: i64,
        now: DateTime<Utc>,
    ) -> Result<ProxyLease> {
        if count == 0 {
            return Ok(ProxyLease::empty(shop));
        }

        // scan and mark under the same guard
        let mut slots = self.slots.lock();
        let chosen: Vec<usize> = slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.eligible(shop, lifetime_minutes, now))
            .map(|(index, _)| index)
            .take(count)
            .collect();

        if chosen.len() < count {
            return Err(Error::InsufficientProxies {
                requested: count,
                eligible: chosen.len(),
            });
        }

        let mut endpoints = Vec::with_capacity(count);
        for &index in &chosen {
            let slot = &mut slots[index];
            slot.in_use = true;
            slot.last_used.insert(shop, now);
            endpoints.push(slot.endpoint.clone());
        }

        Ok(ProxyLease {
            shop,
            slots: chosen,
            endpoints,
        })
    }

    /// Frees the leased proxies; their cooldown restarts from now.
    pub fn release(&self, lease: ProxyLease) {
        self.release_at(lease, Utc::now())
    }

    pub(crate) fn release_at(&self, lease: ProxyLease, now: DateTime<Utc>) {
        let mut slots = self.slots.lock();
        for index in lease.slots {
            if let Some(slot) = slots.get_mut(index) {
                slot.in_use = false;
                slot.last_used.insert(lease.shop, now);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn in_use(&self) -> usize {
        self.slots.lock().iter().filter(|slot| slot.in_use).count()
    }

    pub fn eligible(&self, shop: ShopKind, lifetime_minutes: i64) -> usize {
        let now = Utc::now();
        self.slots
            .lock()
            .iter()
            .filter(|slot| slot.eligible(shop, lifetime_minutes, now))
            .count()
    }
}
