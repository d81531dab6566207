#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use stockwatch::config::schema::{GlobalConfig, ShopCredentials, ShopSettings};
use stockwatch::driver::{Driver, DriverSession, ElementRef};
use stockwatch::proxy::ProxyEndpoint;
use stockwatch::session::PooledSession;
use stockwatch::storefront::{StockStatus, Storefront, StorefrontRegistry};
use stockwatch::target::Target;
use stockwatch::{Error, MonitorEngine, Result, ShopKind};
use tokio::time::Instant;

pub const SHOP_URL: &str = "https://shop.test/product/1";

/// Driver that opens numbered sessions and records what happened to them.
#[derive(Default)]
pub struct FakeDriver {
    next: AtomicUsize,
    pub fail_create: AtomicBool,
    pub fail_quit: AtomicBool,
    pub events: Mutex<Vec<String>>,
    pub created_with: Mutex<Vec<Vec<ProxyEndpoint>>>,
}

impl FakeDriver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| e.starts_with(prefix))
            .count()
    }
}

#[async_trait]
impl Driver for FakeDriver {
    async fn create_session(&self, proxies: &[ProxyEndpoint]) -> Result<DriverSession> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(Error::DriverInit("browser refused to start".into()));
        }
        let id = format!("fake-{}", self.next.fetch_add(1, Ordering::SeqCst) + 1);
        self.events.lock().push(format!("create:{}", id));
        self.created_with.lock().push(proxies.to_vec());
        Ok(DriverSession::new(id))
    }

    async fn quit(&self, session: &DriverSession) -> Result<()> {
        self.events.lock().push(format!("quit:{}", session.id));
        if self.fail_quit.load(Ordering::SeqCst) {
            return Err(Error::Driver("invalid session id".into()));
        }
        Ok(())
    }

    async fn navigate(&self, _: &DriverSession, _: &str) -> Result<()> {
        Ok(())
    }

    async fn find(&self, _: &DriverSession, _: &str) -> Result<Option<ElementRef>> {
        Ok(None)
    }

    async fn text(&self, _: &DriverSession, _: &ElementRef) -> Result<String> {
        Ok(String::new())
    }

    async fn attribute(&self, _: &DriverSession, _: &ElementRef, _: &str) -> Result<Option<String>> {
        Ok(None)
    }

    async fn click(&self, _: &DriverSession, _: &ElementRef) -> Result<()> {
        Ok(())
    }

    async fn send_keys(&self, _: &DriverSession, _: &ElementRef, _: &str) -> Result<()> {
        Ok(())
    }

    async fn screenshot(&self, _: &DriverSession) -> Result<Vec<u8>> {
        Ok(Vec::new())
    }

    async fn stop(&self) -> Result<()> {
        self.events.lock().push("stop".to_string());
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub enum Step {
    OutOfStock,
    InStock,
    CartOnly,
    Challenge(String),
    Fail,
}

/// Storefront that replays scripted stock checks, then repeats `fallback`.
pub struct FakeStorefront {
    script: Mutex<VecDeque<Step>>,
    fallback: Step,
    pub price: Mutex<Option<f64>>,
    pub check_delay: Duration,
    pub checks: Mutex<Vec<Instant>>,
    pub orders: Mutex<Vec<(String, bool)>>,
    pub solutions: Mutex<Vec<String>>,
    pub keep_alives: AtomicUsize,
    pub sign_ins: Mutex<Vec<(String, String)>>,
    pub refuse_sign_in: AtomicBool,
}

impl FakeStorefront {
    pub fn new(fallback: Step) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback,
            price: Mutex::new(Some(25.0)),
            check_delay: Duration::ZERO,
            checks: Mutex::new(Vec::new()),
            orders: Mutex::new(Vec::new()),
            solutions: Mutex::new(Vec::new()),
            keep_alives: AtomicUsize::new(0),
            sign_ins: Mutex::new(Vec::new()),
            refuse_sign_in: AtomicBool::new(false),
        }
    }

    pub fn then(self, step: Step) -> Self {
        self.script.lock().push_back(step);
        self
    }

    pub fn priced(self, price: f64) -> Self {
        *self.price.lock() = Some(price);
        self
    }

    /// The product page shows no price at all.
    pub fn unpriced(self) -> Self {
        *self.price.lock() = None;
        self
    }

    pub fn slow(mut self, delay: Duration) -> Self {
        self.check_delay = delay;
        self
    }

    pub fn check_count(&self) -> usize {
        self.checks.lock().len()
    }

    pub fn order_count(&self) -> usize {
        self.orders.lock().len()
    }
}

#[async_trait]
impl Storefront for FakeStorefront {
    fn name(&self) -> &str {
        "fake"
    }

    async fn check_stock(&self, _: &PooledSession, _: &Target) -> Result<StockStatus> {
        self.checks.lock().push(Instant::now());
        if !self.check_delay.is_zero() {
            tokio::time::sleep(self.check_delay).await;
        }
        let step = self
            .script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        match step {
            Step::OutOfStock => Ok(StockStatus::out_of_stock()),
            Step::InStock => Ok(StockStatus::in_stock()),
            Step::CartOnly => Ok(StockStatus {
                in_stock: true,
                cart_only: true,
                challenge: None,
            }),
            Step::Challenge(url) => Ok(StockStatus::challenged(url)),
            Step::Fail => Err(Error::Driver("page did not load".into())),
        }
    }

    async fn open(&self, _: &PooledSession, _: &Target) -> Result<()> {
        Ok(())
    }

    async fn read_price(&self, _: &PooledSession) -> Result<f64> {
        self.price
            .lock()
            .ok_or_else(|| Error::PriceUnreadable("'#price' not found".into()))
    }

    async fn place_order(&self, session: &PooledSession, _: &Target, use_cart: bool) -> Result<()> {
        self.orders.lock().push((session.handle.id.clone(), use_cart));
        Ok(())
    }

    async fn submit_challenge(&self, _: &PooledSession, solution: &str) -> Result<()> {
        self.solutions.lock().push(solution.to_string());
        Ok(())
    }

    async fn sign_in(&self, session: &PooledSession, credentials: &ShopCredentials) -> Result<()> {
        self.sign_ins
            .lock()
            .push((session.handle.id.clone(), credentials.username.clone()));
        if self.refuse_sign_in.load(Ordering::SeqCst) {
            return Err(Error::Storefront("wrong password".into()));
        }
        Ok(())
    }

    async fn keep_alive(&self, _: &PooledSession) -> Result<()> {
        self.keep_alives.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// One second cadence, no jitter, nothing to kill on shutdown.
pub fn global() -> GlobalConfig {
    GlobalConfig {
        check_interval_ms: 1000,
        jitter_ms: 0,
        solve_timeout_secs: 120,
        kill_processes: Vec::new(),
        ..GlobalConfig::default()
    }
}

pub fn with_shop(mut global: GlobalConfig, settings: ShopSettings) -> GlobalConfig {
    let mut shops = HashMap::new();
    shops.insert(ShopKind::Other, settings);
    global.shops = shops;
    global
}

pub fn credentials() -> ShopCredentials {
    ShopCredentials {
        username: "buyer@example.com".into(),
        password: "hunter2".into(),
    }
}

pub fn proxies(n: usize) -> Vec<ProxyEndpoint> {
    (0..n)
        .map(|i| ProxyEndpoint::new(format!("10.0.0.{}", i + 1), 8080).with_credentials("user", "pass"))
        .collect()
}

pub fn target() -> Target {
    Target::new("t1", "gpu", SHOP_URL).with_bounds(10.0, 50.0)
}

pub fn engine(
    global: GlobalConfig,
    proxies: Vec<ProxyEndpoint>,
    driver: Arc<FakeDriver>,
    storefront: Arc<FakeStorefront>,
) -> MonitorEngine {
    let storefronts = StorefrontRegistry::new().with("shop.test", storefront);
    MonitorEngine::new(global, proxies, storefronts, driver, None)
}

/// Yields to the runtime until `cond` holds. Never advances paused time.
pub async fn until(mut cond: impl FnMut() -> bool) {
    for _ in 0..10_000 {
        if cond() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition not reached");
}
