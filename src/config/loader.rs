use crate::capture::ScreenshotCapture;
use crate::config::schema::{AppConfig, GlobalConfig, TargetConfig};
use crate::driver::Driver;
use crate::error::{Error, Result};
use crate::proxy::ProxyEndpoint;
use crate::storefront::{SelectorStorefront, StorefrontRegistry};
use crate::target::Target;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use validator::Validate;

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<AppConfig> {
        let path = path.as_ref();
        let mut visited = HashSet::new();
        Self::load_with_inheritance(path, &mut visited, false)
    }

    fn load_with_inheritance(
        path: &Path,
        visited: &mut HashSet<PathBuf>,
        is_parent_load: bool,
    ) -> Result<AppConfig> {
        let path = fs::canonicalize(path).map_err(|e| {
            Error::Config(format!("{}: {}", path.display(), e))
        })?;

        if visited.contains(&path) {
            return Err(Error::Config(format!(
                "Circular inheritance detected involving {}",
                path.display()
            )));
        }
        visited.insert(path.clone());

        let config = Self::load_file(&path)?;

        let final_config = if let Some(parent_path_str) = &config.extends {
            let parent_path = path.parent()
                .ok_or_else(|| Error::Config(format!(
                    "Cannot determine parent directory for {}",
                    path.display()
                )))?
                .join(parent_path_str);

            let parent_config = Self::load_with_inheritance(&parent_path, visited, true)?;
            Self::merge_configs(parent_config, config)
        } else {
            config
        };

        if !is_parent_load {
            final_config.validate()?;
        }

        Ok(final_config)
    }

    fn load_file(path: &Path) -> Result<AppConfig> {
        let content = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => {
                let config: AppConfig = serde_json::from_str(&content)?;
                Ok(config)
            }
            Some("yaml") | Some("yml") => {
                let config: AppConfig = serde_yaml::from_str(&content)?;
                Ok(config)
            }
            Some("toml") => {
                let config: AppConfig = toml::from_str(&content)?;
                Ok(config)
            }
            _ => Err(Error::Config(format!(
                "Unsupported file extension: {}",
                path.display()
            ))),
        }
    }

    fn merge_configs(mut parent: AppConfig, child: AppConfig) -> AppConfig {
        parent.global = Self::merge_global(parent.global, child.global);

        for target in child.targets {
            match parent.targets.iter_mut().find(|t| Self::same_target(t, &target)) {
                Some(existing) => *existing = target,
                None => parent.targets.push(target),
            }
        }

        for proxy in child.proxies {
            if !parent.proxies.iter().any(|p| p.ip == proxy.ip && p.port == proxy.port) {
                parent.proxies.push(proxy);
            }
        }

        for storefront in child.storefronts {
            match parent.storefronts.iter_mut().find(|s| s.name == storefront.name) {
                Some(existing) => *existing = storefront,
                None => parent.storefronts.push(storefront),
            }
        }

        parent.extends = None;
        parent
    }

    /// Targets are the same entry when their ids match, or their URLs when
    /// either one has no id.
    fn same_target(a: &TargetConfig, b: &TargetConfig) -> bool {
        match (&a.id, &b.id) {
            (Some(x), Some(y)) => x == y,
            _ => a.url == b.url,
        }
    }

    /// Child values win wherever they differ from the defaults.
    fn merge_global(mut parent: GlobalConfig, child: GlobalConfig) -> GlobalConfig {
        let defaults = GlobalConfig::default();

        if child.check_interval_ms != defaults.check_interval_ms {
            parent.check_interval_ms = child.check_interval_ms;
        }
        if child.jitter_ms != defaults.jitter_ms {
            parent.jitter_ms = child.jitter_ms;
        }
        if child.proxy_lifetime_minutes != defaults.proxy_lifetime_minutes {
            parent.proxy_lifetime_minutes = child.proxy_lifetime_minutes;
        }
        if child.solver_endpoint.is_some() {
            parent.solver_endpoint = child.solver_endpoint;
        }
        if child.solve_timeout_secs != defaults.solve_timeout_secs {
            parent.solve_timeout_secs = child.solve_timeout_secs;
        }
        if child.chrome_path.is_some() {
            parent.chrome_path = child.chrome_path;
        }
        if child.headless {
            parent.headless = true;
        }
        if child.profile_dir != defaults.profile_dir {
            parent.profile_dir = child.profile_dir;
        }
        if child.navigation_timeout_secs != defaults.navigation_timeout_secs {
            parent.navigation_timeout_secs = child.navigation_timeout_secs;
        }
        if child.capture_dir != defaults.capture_dir {
            parent.capture_dir = child.capture_dir;
        }
        if child.extension_dir != defaults.extension_dir {
            parent.extension_dir = child.extension_dir;
        }
        if child.checkout_keepalive_secs != defaults.checkout_keepalive_secs {
            parent.checkout_keepalive_secs = child.checkout_keepalive_secs;
        }
        if child.kill_processes != defaults.kill_processes {
            parent.kill_processes = child.kill_processes;
        }

        for (shop, settings) in child.shops {
            parent.shops.insert(shop, settings);
        }

        parent
    }

    pub fn create_targets(config: &AppConfig) -> Vec<Arc<Target>> {
        config
            .targets
            .iter()
            .enumerate()
            .map(|(index, target)| Arc::new(Target::from_config(index, target)))
            .collect()
    }

    pub fn create_proxies(config: &AppConfig) -> Vec<ProxyEndpoint> {
        config.proxies.iter().map(ProxyEndpoint::from).collect()
    }

    pub fn create_storefronts(config: &AppConfig, driver: Arc<dyn Driver>) -> StorefrontRegistry {
        let capture = Arc::new(ScreenshotCapture::new(
            PathBuf::from(&config.global.capture_dir),
            config.global.shops.clone(),
        ));

        let mut registry = StorefrontRegistry::new();
        for storefront in &config.storefronts {
            registry.register(
                storefront.pattern.clone(),
                Arc::new(SelectorStorefront::new(
                    storefront.name.clone(),
                    driver.clone(),
                    storefront.selectors.clone(),
                    storefront.keepalive_url.clone(),
                    capture.clone(),
                )
                .with_sign_in_url(storefront.sign_in_url.clone())),
            );
        }
        registry
    }
}
