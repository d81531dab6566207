//! Browser extension that forwards traffic through a set of authenticated proxies.
//!
//! Chrome cannot take proxy credentials on the command line, so each session
//! with proxies gets an unpacked extension that sets a fixed proxy server,
//! picks a new random proxy from the set on every tab update and answers the
//! proxy's auth challenge.

use super::ProxyEndpoint;
use crate::error::{Error, Result};
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};

const MANIFEST: &str = r#"{
  "version": "1.0.0",
  "manifest_version": 2,
  "name": "Proxy Forwarder",
  "permissions": [
    "proxy",
    "tabs",
    "unlimitedStorage",
    "storage",
    "<all_urls>",
    "webRequest",
    "webRequestBlocking"
  ],
  "background": {
    "scripts": ["background.js"]
  },
  "minimum_chrome_version": "22.0.0"
}
"#;

const BACKGROUND_TEMPLATE: &str = r#"var proxies = {PROXIES};
var current = proxies[0];

function pickProxy() {
  current = proxies[Math.floor(Math.random() * proxies.length)];
  return {
    mode: "fixed_servers",
    rules: {
      singleProxy: { scheme: "http", host: current.host, port: current.port },
      bypassList: ["localhost"]
    }
  };
}

chrome.proxy.settings.set({ value: pickProxy(), scope: "regular" }, function () {});

chrome.webRequest.onAuthRequired.addListener(
  function (details) {
    return { authCredentials: { username: current.username, password: current.password } };
  },
  { urls: ["<all_urls>"] },
  ["blocking"]
);

chrome.tabs.onUpdated.addListener(function (tabId, changeInfo, tab) {
  chrome.proxy.settings.set({ value: pickProxy(), scope: "regular" }, function () {});
});
"#;

/// An extension rendered on disk; removed with [`ProxyExtension::remove`].
#[derive(Debug)]
pub struct ProxyExtension {
    dir: PathBuf,
}

impl ProxyExtension {
    pub fn render(base: &Path, name: &str, proxies: &[ProxyEndpoint]) -> Result<Self> {
        if proxies.is_empty() {
            return Err(Error::Internal(
                "proxy extension needs at least one proxy".to_string(),
            ));
        }

        let dir = base.join(name);
        fs::create_dir_all(&dir)?;
        fs::write(dir.join("manifest.json"), MANIFEST)?;
        fs::write(dir.join("background.js"), background_script(proxies))?;

        log::debug!("Rendered proxy extension for {} proxies at {}", proxies.len(), dir.display());
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Chrome argument that loads this extension.
    pub fn chrome_arg(&self) -> String {
        format!("--load-extension={}", self.dir.display())
    }

    pub fn remove(self) -> Result<()> {
        fs::remove_dir_all(&self.dir)?;
        Ok(())
    }
}

fn background_script(proxies: &[ProxyEndpoint]) -> String {
    let list: Vec<_> = proxies
        .iter()
        .map(|p| {
            json!({
                "host": p.ip,
                "port": p.port,
                "username": p.user.clone().unwrap_or_default(),
                "password": p.password.clone().unwrap_or_default(),
            })
        })
        .collect();
    BACKGROUND_TEMPLATE.replace("{PROXIES}", &serde_json::Value::Array(list).to_string())
}
