//! Browser session pool.

use crate::driver::{Driver, DriverSession};
use crate::error::Result;
use crate::proxy::ProxyEndpoint;
use crate::shop::ShopKind;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

struct SessionEntry {
    kind: ShopKind,
    handle: DriverSession,
    proxies: Vec<ProxyEndpoint>,
    busy: bool,
}

/// A session checked out of the pool. The holder owns the busy flag until it
/// calls `release`, `replace` or `discard`.
#[derive(Debug, Clone, PartialEq)]
pub struct PooledSession {
    pub id: u64,
    pub kind: ShopKind,
    pub handle: DriverSession,
    pub proxies: Vec<ProxyEndpoint>,
}

pub struct SessionPool {
    driver: Arc<dyn Driver>,
    sessions: Mutex<HashMap<u64, SessionEntry>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl SessionPool {
    pub fn new(driver: Arc<dyn Driver>) -> Self {
        Self {
            driver,
            sessions: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        }
    }

    pub fn driver(&self) -> Arc<dyn Driver> {
        self.driver.clone()
    }

    /// Opens a new browser and returns it already marked busy for the caller.
    pub async fn create_session(&self, kind: ShopKind, proxies: Vec<ProxyEndpoint>) -> Result<PooledSession> {
        self.open(kind, proxies, true).await
    }

    /// Opens a new browser and parks it idle, e.g. for checkout instances.
    pub async fn create_idle(&self, kind: ShopKind) -> Result<u64> {
        let session = self.open(kind, Vec::new(), false).await?;
        Ok(session.id)
    }

    async fn open(&self, kind: ShopKind, proxies: Vec<ProxyEndpoint>, busy: bool) -> Result<PooledSession> {
        let handle = self.driver.create_session(&proxies).await?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        self.sessions.lock().insert(
            id,
            SessionEntry {
                kind,
                handle: handle.clone(),
                proxies: proxies.clone(),
                busy,
            },
        );

        log::debug!("Session {} ({}) added to pool, busy={}", id, kind, busy);
        Ok(PooledSession {
            id,
            kind,
            handle,
            proxies,
        })
    }

    /// Claims any idle session of `kind`.
    pub fn acquire_idle(&self, kind: ShopKind) -> Option<PooledSession> {
        let mut sessions = self.sessions.lock();
        sessions
            .iter_mut()
            .find(|(_, entry)| entry.kind == kind && !entry.busy)
            .map(|(id, entry)| {
                entry.busy = true;
                PooledSession {
                    id: *id,
                    kind: entry.kind,
                    handle: entry.handle.clone(),
                    proxies: entry.proxies.clone(),
                }
            })
    }

    pub fn release(&self, session: &PooledSession) {
        if let Some(entry) = self.sessions.lock().get_mut(&session.id) {
            entry.busy = false;
        }
    }

    /// Tears the session down and opens a fresh one bound to `proxies`.
    /// The old session is gone even if the new one fails to start.
    pub async fn replace(&self, session: &PooledSession, proxies: Vec<ProxyEndpoint>) -> Result<PooledSession> {
        self.discard(session).await;
        let fresh = self.create_session(session.kind, proxies).await?;
        log::info!("Session {} replaced by session {}", session.id, fresh.id);
        Ok(fresh)
    }

    /// Removes the session from the pool and quits its browser.
    pub async fn discard(&self, session: &PooledSession) {
        let removed = self.sessions.lock().remove(&session.id);
        if let Some(entry) = removed {
            if let Err(e) = self.driver.quit(&entry.handle).await {
                log::warn!("Failed to quit session {}: {}", session.id, e);
            }
        }
    }

    /// Quits every tracked session, then stops the driver. Runs once.
    pub async fn close_all(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            log::warn!("Session pool already closed");
            return;
        }

        let entries: Vec<(u64, SessionEntry)> = self.sessions.lock().drain().collect();
        for (id, entry) in entries {
            log::info!("Closing browser session {}", id);
            if let Err(e) = self.driver.quit(&entry.handle).await {
                log::error!("Failed to quit session {}: {}", id, e);
            }
        }

        log::info!("Stopping driver service");
        if let Err(e) = self.driver.stop().await {
            log::error!("Failed to stop driver service: {}", e);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn busy_count(&self) -> usize {
        self.sessions.lock().values().filter(|e| e.busy).count()
    }

    pub fn idle_count(&self, kind: ShopKind) -> usize {
        self.sessions
            .lock()
            .values()
            .filter(|e| e.kind == kind && !e.busy)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::ElementRef;
    use crate::error::Error;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct CountingDriver {
        created: AtomicUsize,
        quit: AtomicUsize,
        stopped: AtomicUsize,
        fail_quit: bool,
    }

    #[async_trait]
    impl Driver for CountingDriver {
        async fn create_session(&self, _proxies: &[ProxyEndpoint]) -> Result<DriverSession> {
            let n = self.created.fetch_add(1, Ordering::SeqCst);
            Ok(DriverSession::new(format!("wd-{}", n)))
        }
        async fn quit(&self, _session: &DriverSession) -> Result<()> {
            self.quit.fetch_add(1, Ordering::SeqCst);
            if self.fail_quit {
                return Err(Error::Driver("already gone".into()));
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
            self.stopped.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn idle_session_has_one_holder() {
        let pool = Arc::new(SessionPool::new(Arc::new(CountingDriver::default())));
        pool.create_idle(ShopKind::Amazon).await.unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pool = pool.clone();
                tokio::spawn(async move { pool.acquire_idle(ShopKind::Amazon) })
            })
            .collect();

        let mut holders = 0;
        for handle in handles {
            if handle.await.unwrap().is_some() {
                holders += 1;
            }
        }
        assert_eq!(holders, 1);
        assert_eq!(pool.busy_count(), 1);
    }

    #[tokio::test]
    async fn release_makes_session_available_again() {
        let pool = SessionPool::new(Arc::new(CountingDriver::default()));
        pool.create_idle(ShopKind::AmazonDe).await.unwrap();

        assert!(pool.acquire_idle(ShopKind::Amazon).is_none());
        let session = pool.acquire_idle(ShopKind::AmazonDe).unwrap();
        assert!(pool.acquire_idle(ShopKind::AmazonDe).is_none());

        pool.release(&session);
        assert_eq!(pool.idle_count(ShopKind::AmazonDe), 1);
        assert!(pool.acquire_idle(ShopKind::AmazonDe).is_some());
    }

    #[tokio::test]
    async fn replace_swaps_the_underlying_session() {
        let driver = Arc::new(CountingDriver::default());
        let pool = SessionPool::new(driver.clone());

        let old = pool
            .create_session(ShopKind::Amazon, vec![ProxyEndpoint::new("1.1.1.1", 80)])
            .await
            .unwrap();
        let new = pool
            .replace(&old, vec![ProxyEndpoint::new("2.2.2.2", 80)])
            .await
            .unwrap();

        assert_ne!(old.id, new.id);
        assert_ne!(old.handle, new.handle);
        assert_eq!(new.proxies[0].ip, "2.2.2.2");
        assert_eq!(pool.len(), 1);
        assert_eq!(driver.quit.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn close_all_survives_quit_failures() {
        let driver = Arc::new(CountingDriver {
            fail_quit: true,
            ..Default::default()
        });
        let pool = SessionPool::new(driver.clone());
        for _ in 0..3 {
            pool.create_idle(ShopKind::Amazon).await.unwrap();
        }

        pool.close_all().await;
        assert_eq!(driver.quit.load(Ordering::SeqCst), 3);
        assert_eq!(driver.stopped.load(Ordering::SeqCst), 1);
        assert!(pool.is_empty());

        pool.close_all().await;
        assert_eq!(driver.stopped.load(Ordering::SeqCst), 1);
    }
}
