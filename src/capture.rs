//! Debug screenshots, written only for shop kinds with `debug_capture` on.

use crate::config::schema::ShopSettings;
use crate::driver::{Driver, DriverSession};
use crate::error::Result;
use crate::shop::ShopKind;
use rand::Rng;
use rand::distr::Alphanumeric;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub struct ScreenshotCapture {
    dir: PathBuf,
    shops: HashMap<ShopKind, ShopSettings>,
}

impl ScreenshotCapture {
    pub fn new(dir: PathBuf, shops: HashMap<ShopKind, ShopSettings>) -> Self {
        Self { dir, shops }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn enabled_for(&self, kind: ShopKind) -> bool {
        self.shops
            .get(&kind)
            .map(|settings| settings.debug_capture)
            .unwrap_or(false)
    }

    /// Saves a screenshot when capture is on for `kind`. Failures are logged
    /// and swallowed; a missing screenshot never interrupts monitoring.
    pub async fn capture(
        &self,
        kind: ShopKind,
        driver: &dyn Driver,
        session: &DriverSession,
        label: &str,
    ) -> Option<PathBuf> {
        if !self.enabled_for(kind) {
            return None;
        }
        match self.save(driver, session, label).await {
            Ok(path) => {
                log::debug!("Saved screenshot {}", path.display());
                Some(path)
            }
            Err(e) => {
                log::warn!("Screenshot '{}' failed: {}", label, e);
                None
            }
        }
    }

    /// Writes `<dir>/screenshot_<label>_<rand>.png`.
    pub async fn save(&self, driver: &dyn Driver, session: &DriverSession, label: &str) -> Result<PathBuf> {
        let png = driver.screenshot(session).await?;
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(file_name(label));
        tokio::fs::write(&path, png).await?;
        Ok(path)
    }
}

fn file_name(label: &str) -> String {
    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(5)
        .map(char::from)
        .collect();
    let label: String = label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    format!("screenshot_{}_{}.png", label, suffix)
}
