//! The per-(target, thread) polling loop.
//!
//! Each iteration checks cancellation first, runs one stock check, branches
//! into captcha solving or purchasing, rotates proxies when their lifetime is
//! up and sleeps towards a fixed cadence. Cancellation is only observed at
//! the top of the loop and during the sleep; a driver call in progress is
//! never interrupted.

use crate::captcha::CaptchaWorkflow;
use crate::config::schema::{GlobalConfig, ShopSettings};
use crate::error::Error;
use crate::metrics::MetricsCollector;
use crate::proxy::{ProxyLease, ProxyRegistry, ROTATION_DISABLED};
use crate::session::{PooledSession, SessionPool};
use crate::shop::ShopKind;
use crate::shutdown::OutstandingTask;
use crate::storefront::{ChallengeData, Storefront, StorefrontRegistry};
use crate::target::Target;
use parking_lot::Mutex;
use rand::Rng;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MonitorExit {
    Cancelled,
    QuotaReached,
    NoStorefront,
    ProxiesExhausted,
    DriverFailed,
    ProxyRotationFailed,
}

impl fmt::Display for MonitorExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            MonitorExit::Cancelled => "cancelled",
            MonitorExit::QuotaReached => "purchase quota reached",
            MonitorExit::NoStorefront => "no storefront for URL",
            MonitorExit::ProxiesExhausted => "not enough proxies",
            MonitorExit::DriverFailed => "browser session failed",
            MonitorExit::ProxyRotationFailed => "proxy rotation failed",
        };
        f.write_str(reason)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MonitorState {
    Initializing,
    Running,
    AwaitingSolve,
    Purchasing,
    RefreshingProxies,
    Terminated(MonitorExit),
}

/// Last published state of every monitor, keyed by task label.
#[derive(Default)]
pub struct StatusBoard {
    states: Mutex<BTreeMap<String, MonitorState>>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, label: &str, state: MonitorState) {
        self.states.lock().insert(label.to_string(), state);
    }

    pub fn get(&self, label: &str) -> Option<MonitorState> {
        self.states.lock().get(label).copied()
    }

    pub fn snapshot(&self) -> BTreeMap<String, MonitorState> {
        self.states.lock().clone()
    }
}

/// Everything a monitor shares with its siblings.
#[derive(Clone)]
pub struct MonitorContext {
    pub registry: Arc<ProxyRegistry>,
    pub pool: Arc<SessionPool>,
    pub storefronts: Arc<StorefrontRegistry>,
    pub captcha: Arc<CaptchaWorkflow>,
    pub metrics: Arc<MetricsCollector>,
    pub global: Arc<GlobalConfig>,
    pub cancel: CancellationToken,
    pub status: Arc<StatusBoard>,
}

/// Sleep that keeps iterations `base + jitter` apart, measured start to start.
pub fn next_delay(base: Duration, jitter: Duration, elapsed: Duration) -> Duration {
    (base + jitter).saturating_sub(elapsed)
}

fn jitter_sample(bound: Duration) -> Duration {
    let bound_ms = bound.as_millis() as u64;
    if bound_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::rng().random_range(0..=bound_ms))
}

/// Resources a running monitor holds until it terminates.
struct Held {
    lease: ProxyLease,
    session: PooledSession,
    assigned_at: Instant,
}

pub struct TargetMonitor {
    label: String,
    target: Arc<Target>,
    ctx: MonitorContext,
}

impl TargetMonitor {
    pub fn new(target: Arc<Target>, thread: usize, ctx: MonitorContext) -> Self {
        Self {
            label: format!("[{}#{}]", target.name, thread),
            target,
            ctx,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Runs until a terminal state. The outstanding-task guard is dropped
    /// only after every held resource has been handed back.
    pub async fn run(self, outstanding: OutstandingTask) -> MonitorExit {
        self.ctx.metrics.increment_active_monitors();
        self.set_state(MonitorState::Initializing);

        let exit = self.monitor().await;

        self.set_state(MonitorState::Terminated(exit));
        self.ctx.metrics.decrement_active_monitors();
        log::info!(
            "{} Monitor stopped: {} ({})",
            self.label,
            exit,
            self.ctx.metrics.summary()
        );
        drop(outstanding);
        exit
    }

    fn set_state(&self, state: MonitorState) {
        self.ctx.status.set(&self.label, state);
    }

    async fn monitor(&self) -> MonitorExit {
        let (storefront, kind) = match self.ctx.storefronts.resolve(&self.target.url) {
            Ok(resolved) => resolved,
            Err(e) => {
                log::error!("{} {}", self.label, e);
                return MonitorExit::NoStorefront;
            }
        };

        let settings = self.ctx.global.shop(kind);
        let lifetime = self.ctx.global.proxy_lifetime(kind);
        let use_proxies = settings.use_proxies && self.target.proxy_count > 0;

        let lease = if use_proxies {
            match self
                .ctx
                .registry
                .acquire(self.target.proxy_count, kind, lifetime)
            {
                Ok(lease) => lease,
                Err(e) => {
                    log::error!("{} Failed to get proxies: {}", self.label, e);
                    return MonitorExit::ProxiesExhausted;
                }
            }
        } else {
            ProxyLease::empty(kind)
        };

        let session = match self
            .ctx
            .pool
            .create_session(kind, lease.endpoints().to_vec())
            .await
        {
            Ok(session) => session,
            Err(e) => {
                log::error!("{} {}", self.label, e);
                self.ctx.registry.release(lease);
                return MonitorExit::DriverFailed;
            }
        };

        log::info!(
            "{} Monitoring {} with {} prox{}",
            self.label,
            self.target.url,
            lease.len(),
            if lease.len() == 1 { "y" } else { "ies" }
        );

        let mut held = Held {
            lease,
            session,
            assigned_at: Instant::now(),
        };
        let exit = self
            .poll(storefront.as_ref(), kind, &settings, lifetime, use_proxies, &mut held)
            .await;
        self.release(held).await;
        exit
    }

    async fn poll(
        &self,
        storefront: &dyn Storefront,
        kind: ShopKind,
        settings: &ShopSettings,
        lifetime: i64,
        use_proxies: bool,
        held: &mut Held,
    ) -> MonitorExit {
        let base = self.ctx.global.check_interval();
        let jitter = self.ctx.global.jitter();

        loop {
            if self.ctx.cancel.is_cancelled() {
                return MonitorExit::Cancelled;
            }
            if self.target.quota_reached() {
                return MonitorExit::QuotaReached;
            }
            self.set_state(MonitorState::Running);
            let started = Instant::now();

            match storefront.check_stock(&held.session, &self.target).await {
                Err(e) => {
                    self.ctx.metrics.record_check(false);
                    log::warn!(
                        "{} Failed to check stock for {}: {}",
                        self.label,
                        self.target.name,
                        e
                    );
                }
                Ok(status) => {
                    self.ctx.metrics.record_check(true);
                    if let Some(challenge) = status.challenge {
                        self.solve_challenge(storefront, &held.session, &challenge)
                            .await;
                    } else if status.in_stock {
                        if let Some(exit) = self
                            .purchase(storefront, kind, settings, &held.session, status.cart_only)
                            .await
                        {
                            return exit;
                        }
                    } else {
                        log::debug!("{} {} sold out", self.label, self.target.name);
                    }
                }
            }

            if use_proxies {
                if let Err(exit) = self.rotate_if_due(kind, lifetime, held).await {
                    return exit;
                }
            }

            let delay = next_delay(base, jitter_sample(jitter), started.elapsed());
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.ctx.cancel.cancelled() => {}
            }
        }
    }

    async fn solve_challenge(
        &self,
        storefront: &dyn Storefront,
        session: &PooledSession,
        challenge: &ChallengeData,
    ) {
        self.ctx.metrics.increment_captchas();
        log::info!(
            "{} Captcha found on session {}: {} ({})",
            self.label,
            session.handle.id,
            challenge.url,
            self.ctx.metrics.summary()
        );

        self.set_state(MonitorState::AwaitingSolve);
        self.ctx.metrics.increment_awaiting_solve();
        let solved = self
            .ctx
            .captcha
            .resolve(&session.handle.id, &challenge.url)
            .await;
        self.ctx.metrics.decrement_awaiting_solve();

        match solved {
            Ok(token) => match storefront.submit_challenge(session, &token).await {
                Ok(()) => log::info!("{} Captcha solved, continuing", self.label),
                Err(e) => log::warn!("{} Failed to enter captcha solution: {}", self.label, e),
            },
            Err(Error::MissingChallengeUrl) => {
                log::warn!("{} Captcha does not have a URL", self.label)
            }
            Err(e) => log::warn!("{} Captcha not solved: {}", self.label, e),
        }
    }

    /// Returns the terminal state when the purchase used up the quota.
    async fn purchase(
        &self,
        storefront: &dyn Storefront,
        kind: ShopKind,
        settings: &ShopSettings,
        session: &PooledSession,
        cart_only: bool,
    ) -> Option<MonitorExit> {
        self.ctx.metrics.increment_in_stock();
        log::info!(
            "{} {} is in stock! ({})",
            self.label,
            self.target.name,
            self.ctx.metrics.summary()
        );

        if self.target.monitor_only {
            return None;
        }
        let Some(slot) = self.target.try_reserve_purchase() else {
            log::info!("{} Quota already claimed by another thread", self.label);
            return None;
        };

        self.set_state(MonitorState::Purchasing);
        let result = if settings.checkout_instances > 0 {
            match self.ctx.pool.acquire_idle(kind) {
                Some(checkout) => {
                    let result = storefront.checkout(&checkout, &self.target, cart_only).await;
                    self.ctx.pool.release(&checkout);
                    result
                }
                None => {
                    log::debug!("{} No free checkout session, using own", self.label);
                    storefront.checkout(session, &self.target, cart_only).await
                }
            }
        } else {
            storefront.checkout(session, &self.target, cart_only).await
        };

        match result {
            Ok(()) => {
                let count = slot.commit();
                self.ctx.metrics.increment_purchases();
                log::info!(
                    "{} Purchased {} ({}/{}) ({})",
                    self.label,
                    self.target.name,
                    count,
                    self.target.max_purchases,
                    self.ctx.metrics.summary()
                );
                self.target.quota_reached().then_some(MonitorExit::QuotaReached)
            }
            Err(e @ Error::PriceOutOfRange { .. }) => {
                log::info!("{} Not buying: {}", self.label, e);
                None
            }
            Err(e) => {
                self.ctx.metrics.increment_checkouts_failed();
                log::warn!("{} Checkout failed: {}", self.label, e);
                None
            }
        }
    }

    /// Swaps the session onto fresh proxies once the current ones have
    /// outlived their lifetime.
    async fn rotate_if_due(
        &self,
        kind: ShopKind,
        lifetime: i64,
        held: &mut Held,
    ) -> Result<(), MonitorExit> {
        if lifetime == ROTATION_DISABLED || lifetime < 0 {
            return Ok(());
        }
        if held.assigned_at.elapsed() <= Duration::from_secs((lifetime as u64).saturating_mul(60)) {
            return Ok(());
        }

        self.set_state(MonitorState::RefreshingProxies);
        let count = held.lease.len();
        let expired = std::mem::replace(&mut held.lease, ProxyLease::empty(kind));
        self.ctx.registry.release(expired);

        let lease = match self.ctx.registry.acquire(count, kind, lifetime) {
            Ok(lease) => lease,
            Err(e) => {
                log::error!("{} Proxy rotation failed: {}", self.label, e);
                return Err(MonitorExit::ProxyRotationFailed);
            }
        };

        match self
            .ctx
            .pool
            .replace(&held.session, lease.endpoints().to_vec())
            .await
        {
            Ok(session) => {
                log::info!("{} Rotated onto {} fresh proxies", self.label, lease.len());
                held.session = session;
                held.lease = lease;
                held.assigned_at = Instant::now();
                Ok(())
            }
            Err(e) => {
                log::error!("{} {}", self.label, e);
                self.ctx.registry.release(lease);
                Err(MonitorExit::DriverFailed)
            }
        }
    }

    async fn release(&self, held: Held) {
        if !held.lease.is_empty() {
            self.ctx.registry.release(held.lease);
        }
        self.ctx.pool.discard(&held.session).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_targets_cadence() {
        let base = Duration::from_millis(1000);
        assert_eq!(
            next_delay(base, Duration::from_millis(200), Duration::from_millis(300)),
            Duration::from_millis(900)
        );
        assert_eq!(
            next_delay(base, Duration::ZERO, Duration::from_millis(300)),
            Duration::from_millis(700)
        );
        assert_eq!(
            next_delay(base, Duration::ZERO, Duration::from_millis(1500)),
            Duration::ZERO
        );
    }

    #[test]
    fn jitter_stays_in_bound() {
        let bound = Duration::from_millis(200);
        for _ in 0..100 {
            assert!(jitter_sample(bound) <= bound);
        }
        assert_eq!(jitter_sample(Duration::ZERO), Duration::ZERO);
    }

    #[test]
    fn status_board_keeps_last_state() {
        let board = StatusBoard::new();
        board.set("[gpu#0]", MonitorState::Running);
        board.set("[gpu#0]", MonitorState::AwaitingSolve);
        board.set("[gpu#1]", MonitorState::Terminated(MonitorExit::Cancelled));
        assert_eq!(board.get("[gpu#0]"), Some(MonitorState::AwaitingSolve));
        assert_eq!(board.snapshot().len(), 2);
    }
}
