//! Chromium driven over the DevTools protocol, one browser process per session.

use super::{Driver, DriverSession, ElementRef};
use crate::config::schema::GlobalConfig;
use crate::error::{Error, Result};
use crate::proxy::{ProxyEndpoint, ProxyExtension};
use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::element::Element;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use parking_lot::Mutex;
use rand::seq::IndexedRandom;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::task::JoinHandle;

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.6099.130 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.6167.85 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.6261.95 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.6167.160 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.6099.224 Safari/537.36",
];

#[derive(Debug, Clone)]
pub struct ChromiumOptions {
    /// Browser executable; detected on the host when unset.
    pub chrome_path: Option<PathBuf>,
    pub headless: bool,
    /// Parent of the per-session profile directories.
    pub profile_dir: PathBuf,
    /// Parent of the per-session proxy extensions.
    pub extension_dir: PathBuf,
    pub request_timeout: Duration,
}

impl From<&GlobalConfig> for ChromiumOptions {
    fn from(global: &GlobalConfig) -> Self {
        Self {
            chrome_path: global.chrome_path.as_ref().map(PathBuf::from),
            headless: global.headless,
            profile_dir: PathBuf::from(&global.profile_dir),
            extension_dir: PathBuf::from(&global.extension_dir),
            request_timeout: Duration::from_secs(global.navigation_timeout_secs),
        }
    }
}

struct BrowserSession {
    browser: Browser,
    page: Page,
    events: JoinHandle<()>,
    extension: Option<ProxyExtension>,
    profile: PathBuf,
}

pub struct ChromiumDriver {
    options: ChromiumOptions,
    sessions: Mutex<HashMap<String, BrowserSession>>,
}

impl ChromiumDriver {
    pub fn new(options: ChromiumOptions) -> Self {
        Self {
            options,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn open_sessions(&self) -> usize {
        self.sessions.lock().len()
    }

    fn page(&self, session: &DriverSession) -> Result<Page> {
        self.sessions
            .lock()
            .get(&session.id)
            .map(|s| s.page.clone())
            .ok_or_else(|| Error::Driver(format!("unknown browser session {}", session.id)))
    }

    async fn element(&self, session: &DriverSession, element: &ElementRef) -> Result<Element> {
        self.page(session)?
            .find_element(element.0.as_str())
            .await
            .map_err(|e| Error::Driver(format!("'{}': {}", element.0, e)))
    }

    fn browser_config(&self, profile: &Path, extension: Option<&ProxyExtension>) -> Result<BrowserConfig> {
        let mut builder = BrowserConfig::builder()
            .user_data_dir(profile)
            .request_timeout(self.options.request_timeout);

        if !self.options.headless {
            builder = builder.with_head();
        }
        if let Some(path) = &self.options.chrome_path {
            builder = builder.chrome_executable(path);
        }
        for arg in launch_args(extension) {
            builder = builder.arg(arg);
        }

        builder.build().map_err(Error::DriverInit)
    }

    async fn launch(&self, id: &str, profile: &Path, extension: Option<&ProxyExtension>) -> Result<(Browser, Page, JoinHandle<()>)> {
        let config = self.browser_config(profile, extension)?;
        let (mut browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| Error::DriverInit(format!("browser launch failed: {}", e)))?;

        let session_id = id.to_string();
        let events = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    log::trace!("Browser {} event error: {}", session_id, e);
                }
            }
            log::debug!("Browser {} event loop ended", session_id);
        });

        match browser.new_page("about:blank").await {
            Ok(page) => Ok((browser, page, events)),
            Err(e) => {
                if let Err(close) = browser.close().await {
                    log::warn!("Failed to close half-started browser {}: {}", id, close);
                }
                events.abort();
                Err(Error::DriverInit(format!("failed to open a page: {}", e)))
            }
        }
    }

    async fn close(&self, id: &str, mut session: BrowserSession) -> Result<()> {
        let closed = session
            .browser
            .close()
            .await
            .map(|_| ())
            .map_err(|e| Error::Driver(format!("failed to close browser {}: {}", id, e)));
        if closed.is_ok() {
            if let Err(e) = session.browser.wait().await {
                log::warn!("Browser {} did not exit cleanly: {}", id, e);
            }
        }
        session.events.abort();
        discard_files(id, session.extension, &session.profile);
        closed
    }
}

/// Chrome flags for every session, plus the extension ones when proxied.
pub fn launch_args(extension: Option<&ProxyExtension>) -> Vec<String> {
    let mut args = vec![
        "--disable-gpu".to_string(),
        "--no-sandbox".to_string(),
        "--disable-dev-shm-usage".to_string(),
    ];
    if let Some(agent) = USER_AGENTS.choose(&mut rand::rng()) {
        args.push(format!("--user-agent={}", agent));
    }
    if let Some(extension) = extension {
        args.push(format!("--disable-extensions-except={}", extension.path().display()));
        args.push(extension.chrome_arg());
    }
    args
}

fn discard_files(id: &str, extension: Option<ProxyExtension>, profile: &Path) {
    if let Some(extension) = extension {
        if let Err(e) = extension.remove() {
            log::warn!("Failed to remove proxy extension of session {}: {}", id, e);
        }
    }
    match std::fs::remove_dir_all(profile) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => log::warn!("Failed to remove profile {}: {}", profile.display(), e),
    }
}

#[async_trait]
impl Driver for ChromiumDriver {
    async fn create_session(&self, proxies: &[ProxyEndpoint]) -> Result<DriverSession> {
        let id = uuid::Uuid::new_v4().simple().to_string();
        let extension = if proxies.is_empty() {
            None
        } else {
            if self.options.headless {
                log::warn!("Proxy extensions may not load in a headless browser");
            }
            Some(
                ProxyExtension::render(&self.options.extension_dir, &format!("ext-{}", id), proxies)
                    .map_err(|e| Error::DriverInit(e.to_string()))?,
            )
        };
        let profile = self.options.profile_dir.join(&id);

        match self.launch(&id, &profile, extension.as_ref()).await {
            Ok((browser, page, events)) => {
                log::debug!("Created browser session {} ({} proxies)", id, proxies.len());
                self.sessions.lock().insert(
                    id.clone(),
                    BrowserSession {
                        browser,
                        page,
                        events,
                        extension,
                        profile,
                    },
                );
                Ok(DriverSession::new(id))
            }
            Err(e) => {
                discard_files(&id, extension, &profile);
                Err(e)
            }
        }
    }

    async fn quit(&self, session: &DriverSession) -> Result<()> {
        let open = self.sessions.lock().remove(&session.id);
        match open {
            Some(open) => self.close(&session.id, open).await,
            None => Err(Error::Driver(format!("unknown browser session {}", session.id))),
        }
    }

    async fn navigate(&self, session: &DriverSession, url: &str) -> Result<()> {
        self.page(session)?
            .goto(url)
            .await
            .map_err(|e| Error::Driver(format!("navigation to {} failed: {}", url, e)))?;
        Ok(())
    }

    async fn find(&self, session: &DriverSession, css: &str) -> Result<Option<ElementRef>> {
        let found = self
            .page(session)?
            .find_elements(css)
            .await
            .map_err(|e| Error::Driver(format!("'{}': {}", css, e)))?;
        Ok((!found.is_empty()).then(|| ElementRef(css.to_string())))
    }

    async fn text(&self, session: &DriverSession, element: &ElementRef) -> Result<String> {
        let text = self
            .element(session, element)
            .await?
            .inner_text()
            .await
            .map_err(|e| Error::Driver(e.to_string()))?;
        Ok(text.unwrap_or_default())
    }

    async fn attribute(
        &self,
        session: &DriverSession,
        element: &ElementRef,
        name: &str,
    ) -> Result<Option<String>> {
        self.element(session, element)
            .await?
            .attribute(name)
            .await
            .map_err(|e| Error::Driver(e.to_string()))
    }

    async fn click(&self, session: &DriverSession, element: &ElementRef) -> Result<()> {
        self.element(session, element)
            .await?
            .click()
            .await
            .map_err(|e| Error::Driver(format!("click on '{}' failed: {}", element.0, e)))?;
        Ok(())
    }

    async fn send_keys(&self, session: &DriverSession, element: &ElementRef, text: &str) -> Result<()> {
        let target = self.element(session, element).await?;
        let typed = if text == "\n" {
            target.press_key("Enter").await.map(|_| ())
        } else {
            match target.focus().await {
                Ok(focused) => focused.type_str(text).await.map(|_| ()),
                Err(e) => Err(e),
            }
        };
        typed.map_err(|e| Error::Driver(format!("typing into '{}' failed: {}", element.0, e)))
    }

    async fn screenshot(&self, session: &DriverSession) -> Result<Vec<u8>> {
        self.page(session)?
            .screenshot(
                ScreenshotParams::builder()
                    .format(CaptureScreenshotFormat::Png)
                    .build(),
            )
            .await
            .map_err(|e| Error::Driver(format!("screenshot failed: {}", e)))
    }

    /// Closes browsers nobody quit.
    async fn stop(&self) -> Result<()> {
        let leftovers: Vec<(String, BrowserSession)> = self.sessions.lock().drain().collect();
        for (id, session) in leftovers {
            log::info!("Closing leftover browser {}", id);
            if let Err(e) = self.close(&id, session).await {
                log::warn!("{}", e);
            }
        }
        Ok(())
    }
}
