use crate::captcha::{CaptchaChallenge, CaptchaSolver, CaptchaWorkflow, ChallengeBoard};
use crate::config::schema::{GlobalConfig, ShopSettings};
use crate::driver::Driver;
use crate::metrics::{MetricsCollector, MetricsSnapshot};
use crate::monitor::{MonitorContext, MonitorExit, MonitorState, StatusBoard, TargetMonitor};
use crate::proxy::{ProxyEndpoint, ProxyRegistry};
use crate::session::SessionPool;
use crate::shop::ShopKind;
use crate::shutdown::{ShutdownCoordinator, TaskTracker};
use crate::storefront::{Storefront, StorefrontRegistry};
use crate::target::Target;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Owns the shared components and the monitor tasks running on them.
pub struct MonitorEngine {
    ctx: MonitorContext,
    tasks: TaskTracker,
    purchase_cancel: CancellationToken,
    coordinator: ShutdownCoordinator,
}

impl MonitorEngine {
    pub fn new(
        global: GlobalConfig,
        proxies: Vec<ProxyEndpoint>,
        storefronts: StorefrontRegistry,
        driver: Arc<dyn Driver>,
        solver: Option<Arc<dyn CaptchaSolver>>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let purchase_cancel = CancellationToken::new();
        let tasks = TaskTracker::new();
        let pool = Arc::new(SessionPool::new(driver));

        let captcha = CaptchaWorkflow::new(
            Arc::new(ChallengeBoard::new()),
            solver,
            global.solver_endpoint.clone(),
            global.solve_timeout(),
        );

        let coordinator = ShutdownCoordinator::new(
            cancel.clone(),
            purchase_cancel.clone(),
            tasks.clone(),
            pool.clone(),
            global.kill_processes.clone(),
        );

        let ctx = MonitorContext {
            registry: Arc::new(ProxyRegistry::new(proxies)),
            pool,
            storefronts: Arc::new(storefronts),
            captcha: Arc::new(captcha),
            metrics: Arc::new(MetricsCollector::new()),
            global: Arc::new(global),
            cancel,
            status: Arc::new(StatusBoard::new()),
        };

        Self {
            ctx,
            tasks,
            purchase_cancel,
            coordinator,
        }
    }

    pub fn context(&self) -> &MonitorContext {
        &self.ctx
    }

    /// Spawns one monitor. It counts as outstanding from this call on.
    pub fn start_monitor(&self, target: Arc<Target>, thread: usize) -> JoinHandle<MonitorExit> {
        let outstanding = self.tasks.register();
        let monitor = TargetMonitor::new(target, thread, self.ctx.clone());
        log::debug!("Starting monitor {}", monitor.label());
        tokio::spawn(monitor.run(outstanding))
    }

    /// Spawns `threads` monitors for every target.
    pub fn start_all(&self, targets: &[Arc<Target>]) -> Vec<JoinHandle<MonitorExit>> {
        let handles: Vec<_> = targets
            .iter()
            .flat_map(|target| {
                (0..target.threads).map(move |thread| (target.clone(), thread))
            })
            .map(|(target, thread)| self.start_monitor(target, thread))
            .collect();
        log::info!("Started {} monitor(s) for {} target(s)", handles.len(), targets.len());
        handles
    }

    /// Opens the idle checkout sessions configured per shop kind and keeps
    /// them alive until purchase work is cancelled. Returns how many opened.
    pub async fn prepare_checkout_sessions(&self, targets: &[Arc<Target>]) -> usize {
        let mut shops: HashMap<ShopKind, Arc<dyn Storefront>> = HashMap::new();
        for target in targets {
            if let Ok((storefront, kind)) = self.ctx.storefronts.resolve(&target.url) {
                shops.entry(kind).or_insert(storefront);
            }
        }

        let mut opened = 0;
        for (kind, storefront) in &shops {
            let settings = self.ctx.global.shop(*kind);
            if settings.checkout_instances > 0 && settings.credentials.is_none() {
                log::warn!("No credentials for {}, checkout sessions stay signed out", kind);
            }
            for _ in 0..settings.checkout_instances {
                if self.open_checkout_session(*kind, storefront.as_ref(), &settings).await {
                    opened += 1;
                }
            }
        }

        if opened > 0 {
            self.spawn_keep_alive(shops);
        }
        opened
    }

    /// Opens one checkout session, signs it in and parks it idle. A session
    /// that fails to sign in is quit and dropped from the pool.
    async fn open_checkout_session(
        &self,
        kind: ShopKind,
        storefront: &dyn Storefront,
        settings: &ShopSettings,
    ) -> bool {
        let session = match self.ctx.pool.create_session(kind, Vec::new()).await {
            Ok(session) => session,
            Err(e) => {
                log::error!("Failed to open checkout session for {}: {}", kind, e);
                return false;
            }
        };

        if let Some(credentials) = &settings.credentials {
            if let Err(e) = storefront.sign_in(&session, credentials).await {
                log::error!("Checkout session {} for {} failed to sign in: {}", session.id, kind, e);
                self.ctx.pool.discard(&session).await;
                return false;
            }
        }

        self.ctx.pool.release(&session);
        log::info!("Checkout session {} ready for {}", session.id, kind);
        true
    }

    fn spawn_keep_alive(&self, shops: HashMap<ShopKind, Arc<dyn Storefront>>) {
        let pool = self.ctx.pool.clone();
        let cancel = self.purchase_cancel.clone();
        let period = Duration::from_secs(self.ctx.global.checkout_keepalive_secs.max(1));

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(period) => {}
                }
                for (kind, storefront) in &shops {
                    let mut parked = Vec::new();
                    while let Some(session) = pool.acquire_idle(*kind) {
                        parked.push(session);
                    }
                    for session in &parked {
                        if let Err(e) = storefront.keep_alive(session).await {
                            log::warn!("Keep-alive for checkout session {} failed: {}", session.id, e);
                        }
                        pool.release(session);
                    }
                }
            }
            log::debug!("Checkout keep-alive stopped");
        });
    }

    /// Runs the shutdown sequence and returns once it has completed.
    pub async fn request_shutdown(&self) {
        self.coordinator.shutdown().await;
    }

    pub fn is_shut_down(&self) -> bool {
        self.coordinator.is_complete()
    }

    /// Hands a solution for the challenge pending on `session_id` to the
    /// waiting monitor. Returns false when nothing is pending there.
    pub fn submit_captcha_solution(&self, session_id: &str, solved_chars: &str) -> bool {
        let accepted = self.ctx.captcha.board().submit_solution(session_id, solved_chars);
        if !accepted {
            log::warn!("No pending captcha for session {}", session_id);
        }
        accepted
    }

    pub fn cancel_captcha(&self, session_id: &str) -> bool {
        self.ctx.captcha.board().cancel(session_id)
    }

    pub fn pending_captchas(&self) -> usize {
        self.ctx.captcha.board().len()
    }

    /// Challenges waiting for an answer. Each `session_id` is what
    /// `submit_captcha_solution` expects.
    pub fn pending_challenges(&self) -> Vec<CaptchaChallenge> {
        self.ctx.captcha.board().snapshot()
    }

    pub fn outstanding(&self) -> usize {
        self.tasks.outstanding()
    }

    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.ctx.metrics.snapshot()
    }

    pub fn monitor_states(&self) -> BTreeMap<String, MonitorState> {
        self.ctx.status.snapshot()
    }

    /// Publishes a metrics snapshot every 500ms while anyone is listening.
    pub fn watch_metrics(&self) -> watch::Receiver<MetricsSnapshot> {
        let (tx, rx) = watch::channel(self.ctx.metrics.snapshot());
        let metrics = self.ctx.metrics.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(500));
            loop {
                interval.tick().await;
                if tx.send(metrics.snapshot()).is_err() {
                    break;
                }
            }
        });
        rx
    }
}
