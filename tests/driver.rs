use std::path::Path;
use std::time::Duration;
use stockwatch::Error;
use stockwatch::driver::{ChromiumDriver, ChromiumOptions, Driver};
use stockwatch::proxy::ProxyEndpoint;

fn missing_browser(root: &Path) -> ChromiumOptions {
    ChromiumOptions {
        chrome_path: Some(root.join("bin").join("chrome-that-is-not-there")),
        headless: false,
        profile_dir: root.join("profiles"),
        extension_dir: root.join("extensions"),
        request_timeout: Duration::from_secs(2),
    }
}

fn entries(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
}

#[tokio::test]
async fn failed_launch_leaves_no_extension_behind() {
    let root = tempfile::tempdir().unwrap();
    let driver = ChromiumDriver::new(missing_browser(root.path()));
    let proxies = vec![
        ProxyEndpoint::new("10.0.0.1", 3128).with_credentials("alice", "secret"),
        ProxyEndpoint::new("10.0.0.2", 3128),
    ];

    let result = driver.create_session(&proxies).await;

    assert!(matches!(result, Err(Error::DriverInit(_))));
    assert_eq!(driver.open_sessions(), 0);
    assert_eq!(entries(&root.path().join("extensions")), 0);
    assert_eq!(entries(&root.path().join("profiles")), 0);
}

#[tokio::test]
async fn failed_launch_without_proxies_is_an_init_error() {
    let root = tempfile::tempdir().unwrap();
    let driver = ChromiumDriver::new(missing_browser(root.path()));

    assert!(matches!(driver.create_session(&[]).await, Err(Error::DriverInit(_))));
    assert!(driver.stop().await.is_ok());
}
