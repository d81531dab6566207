use crate::capture::ScreenshotCapture;
use crate::config::schema::{ShopCredentials, StorefrontSelectors};
use crate::driver::{Driver, ElementRef};
use crate::error::{Error, Result};
use crate::selector::CssSelector;
use crate::session::PooledSession;
use crate::storefront::{ChallengeData, StockStatus, Storefront, parse_price};
use crate::target::Target;
use async_trait::async_trait;
use std::sync::Arc;

/// A storefront described entirely by configured CSS selectors.
pub struct SelectorStorefront {
    name: String,
    driver: Arc<dyn Driver>,
    selectors: StorefrontSelectors,
    keepalive_url: Option<String>,
    sign_in_url: Option<String>,
    capture: Arc<ScreenshotCapture>,
}

impl SelectorStorefront {
    pub fn new(
        name: String,
        driver: Arc<dyn Driver>,
        selectors: StorefrontSelectors,
        keepalive_url: Option<String>,
        capture: Arc<ScreenshotCapture>,
    ) -> Self {
        Self {
            name,
            driver,
            selectors,
            keepalive_url,
            sign_in_url: None,
            capture,
        }
    }

    pub fn with_sign_in_url(mut self, url: Option<String>) -> Self {
        self.sign_in_url = url;
        self
    }

    async fn find(&self, session: &PooledSession, selector: &CssSelector) -> Result<Option<ElementRef>> {
        self.driver
            .find(&session.handle, &selector.to_css_string())
            .await
    }

    async fn require(
        &self,
        session: &PooledSession,
        selector: Option<&CssSelector>,
        what: &str,
    ) -> Result<ElementRef> {
        let selector = selector.ok_or_else(|| {
            Error::Storefront(format!("{}: no {} selector configured", self.name, what))
        })?;
        self.find(session, selector).await?.ok_or_else(|| {
            Error::Storefront(format!(
                "{}: {} control '{}' not found",
                self.name,
                what,
                selector.to_css_string()
            ))
        })
    }

    async fn snapshot(&self, session: &PooledSession, label: &str) {
        self.capture
            .capture(
                session.kind,
                self.driver.as_ref(),
                &session.handle,
                &format!("{}_{}", label, session.id),
            )
            .await;
    }
}

#[async_trait]
impl Storefront for SelectorStorefront {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check_stock(&self, session: &PooledSession, target: &Target) -> Result<StockStatus> {
        self.open(session, target).await?;

        if let Some(selector) = &self.selectors.captcha_image {
            if let Some(image) = self.find(session, selector).await? {
                let url = self
                    .driver
                    .attribute(&session.handle, &image, "src")
                    .await?
                    .unwrap_or_default();
                self.snapshot(session, "captcha").await;
                return Ok(StockStatus {
                    challenge: Some(ChallengeData { url }),
                    ..StockStatus::default()
                });
            }
        }

        let mut status = StockStatus::out_of_stock();
        if self.find(session, &self.selectors.buy_now).await?.is_some() {
            status.in_stock = true;
        } else if let Some(selector) = &self.selectors.add_to_cart {
            if self.find(session, selector).await?.is_some() {
                status.in_stock = true;
                status.cart_only = true;
            }
        }

        if status.in_stock {
            self.snapshot(session, "in_stock").await;
        }
        Ok(status)
    }

    async fn open(&self, session: &PooledSession, target: &Target) -> Result<()> {
        self.driver.navigate(&session.handle, &target.url).await
    }

    async fn read_price(&self, session: &PooledSession) -> Result<f64> {
        let Some(selector) = &self.selectors.price else {
            return Err(Error::PriceUnreadable(format!(
                "{}: no price selector configured",
                self.name
            )));
        };
        let element = self.find(session, selector).await?.ok_or_else(|| {
            Error::PriceUnreadable(format!("'{}' not found", selector.to_css_string()))
        })?;
        let text = self.driver.text(&session.handle, &element).await?;
        parse_price(&text).ok_or(Error::PriceUnreadable(text))
    }

    async fn place_order(&self, session: &PooledSession, target: &Target, use_cart: bool) -> Result<()> {
        let control = if use_cart {
            self.require(session, self.selectors.add_to_cart.as_ref(), "add-to-cart")
                .await?
        } else {
            self.require(session, Some(&self.selectors.buy_now), "buy-now")
                .await?
        };
        self.driver.click(&session.handle, &control).await?;

        if self.selectors.confirm.is_some() {
            let confirm = self
                .require(session, self.selectors.confirm.as_ref(), "confirm")
                .await?;
            self.driver.click(&session.handle, &confirm).await?;
        }

        self.snapshot(session, "ordered").await;
        log::info!("{}: order placed for {}", self.name, target.name);
        Ok(())
    }

    async fn submit_challenge(&self, session: &PooledSession, solution: &str) -> Result<()> {
        let input = self
            .require(session, self.selectors.captcha_input.as_ref(), "captcha input")
            .await?;
        self.driver
            .send_keys(&session.handle, &input, solution)
            .await?;

        match self.selectors.captcha_submit.as_ref() {
            Some(_) => {
                let submit = self
                    .require(session, self.selectors.captcha_submit.as_ref(), "captcha submit")
                    .await?;
                self.driver.click(&session.handle, &submit).await
            }
            None => self.driver.send_keys(&session.handle, &input, "\n").await,
        }
    }

    async fn sign_in(&self, session: &PooledSession, credentials: &ShopCredentials) -> Result<()> {
        let url = self.sign_in_url.as_ref().ok_or_else(|| {
            Error::Storefront(format!("{}: no sign-in page configured", self.name))
        })?;
        self.driver.navigate(&session.handle, url).await?;

        let email = self
            .require(session, self.selectors.sign_in_email.as_ref(), "sign-in email")
            .await?;
        self.driver
            .send_keys(&session.handle, &email, &credentials.username)
            .await?;
        if self.selectors.sign_in_continue.is_some() {
            let next = self
                .require(session, self.selectors.sign_in_continue.as_ref(), "sign-in continue")
                .await?;
            self.driver.click(&session.handle, &next).await?;
        }

        let password = self
            .require(session, self.selectors.sign_in_password.as_ref(), "sign-in password")
            .await?;
        self.driver
            .send_keys(&session.handle, &password, &credentials.password)
            .await?;
        match self.selectors.sign_in_submit.as_ref() {
            Some(_) => {
                let submit = self
                    .require(session, self.selectors.sign_in_submit.as_ref(), "sign-in submit")
                    .await?;
                self.driver.click(&session.handle, &submit).await?;
            }
            None => self.driver.send_keys(&session.handle, &password, "\n").await?,
        }

        log::info!("{}: session {} signed in as {}", self.name, session.id, credentials.username);
        Ok(())
    }

    async fn keep_alive(&self, session: &PooledSession) -> Result<()> {
        match &self.keepalive_url {
            Some(url) => self.driver.navigate(&session.handle, url).await,
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::DriverSession;
    use crate::proxy::ProxyEndpoint;
    use crate::shop::ShopKind;
    use parking_lot::Mutex;
    use std::collections::{HashMap, HashSet};
    use std::path::PathBuf;

    /// Serves a fixed page: a set of present selectors with optional text/src.
    #[derive(Default)]
    struct PageDriver {
        present: HashSet<String>,
        texts: HashMap<String, String>,
        srcs: HashMap<String, String>,
        clicks: Mutex<Vec<String>>,
        keys: Mutex<Vec<String>>,
        visits: Mutex<Vec<String>>,
    }

    impl PageDriver {
        fn with(mut self, css: &str) -> Self {
            self.present.insert(css.to_string());
            self
        }
        fn text(mut self, css: &str, text: &str) -> Self {
            self.texts.insert(css.to_string(), text.to_string());
            self.with(css)
        }
        fn src(mut self, css: &str, src: &str) -> Self {
            self.srcs.insert(css.to_string(), src.to_string());
            self.with(css)
        }
    }

    #[async_trait]
    impl Driver for PageDriver {
        async fn create_session(&self, _: &[ProxyEndpoint]) -> Result<DriverSession> {
            Ok(DriverSession::new("wd"))
        }
        async fn quit(&self, _: &DriverSession) -> Result<()> {
            Ok(())
        }
        async fn navigate(&self, _: &DriverSession, url: &str) -> Result<()> {
            self.visits.lock().push(url.to_string());
            Ok(())
        }
        async fn find(&self, _: &DriverSession, css: &str) -> Result<Option<ElementRef>> {
            Ok(self
                .present
                .contains(css)
                .then(|| ElementRef(css.to_string())))
        }
        async fn text(&self, _: &DriverSession, element: &ElementRef) -> Result<String> {
            Ok(self.texts.get(&element.0).cloned().unwrap_or_default())
        }
        async fn attribute(&self, _: &DriverSession, element: &ElementRef, _: &str) -> Result<Option<String>> {
            Ok(self.srcs.get(&element.0).cloned())
        }
        async fn click(&self, _: &DriverSession, element: &ElementRef) -> Result<()> {
            self.clicks.lock().push(element.0.clone());
            Ok(())
        }
        async fn send_keys(&self, _: &DriverSession, _: &ElementRef, text: &str) -> Result<()> {
            self.keys.lock().push(text.to_string());
            Ok(())
        }
        async fn screenshot(&self, _: &DriverSession) -> Result<Vec<u8>> {
            Ok(Vec::new())
        }
    }

    fn selectors() -> StorefrontSelectors {
        StorefrontSelectors {
            buy_now: CssSelector::Id("buy-now-button".into()),
            add_to_cart: Some(CssSelector::Id("add-to-cart-button".into())),
            price: Some(CssSelector::Class("a-price-whole".into())),
            captcha_image: Some(CssSelector::Raw("form img".into())),
            captcha_input: Some(CssSelector::Id("captchacharacters".into())),
            captcha_submit: Some(CssSelector::Raw("button[type='submit']".into())),
            confirm: Some(CssSelector::Attribute {
                key: "name".into(),
                value: Some("placeYourOrder1".into()),
            }),
            sign_in_email: Some(CssSelector::Id("ap_email".into())),
            sign_in_continue: Some(CssSelector::Id("continue".into())),
            sign_in_password: Some(CssSelector::Id("ap_password".into())),
            sign_in_submit: Some(CssSelector::Id("signInSubmit".into())),
        }
    }

    fn storefront(driver: Arc<PageDriver>) -> SelectorStorefront {
        SelectorStorefront::new(
            "amazon".into(),
            driver,
            selectors(),
            None,
            Arc::new(ScreenshotCapture::new(PathBuf::from("unused"), HashMap::new())),
        )
    }

    fn session() -> PooledSession {
        PooledSession {
            id: 7,
            kind: ShopKind::Amazon,
            handle: DriverSession::new("wd"),
            proxies: Vec::new(),
        }
    }

    fn target() -> Target {
        Target::new("t", "gpu", "https://www.amazon.com/dp/B08").with_bounds(10.0, 50.0)
    }

    #[tokio::test]
    async fn detects_stock_and_cart_only() {
        let shop = storefront(Arc::new(PageDriver::default().with("#buy-now-button")));
        let status = shop.check_stock(&session(), &target()).await.unwrap();
        assert!(status.in_stock && !status.cart_only);

        let shop = storefront(Arc::new(PageDriver::default().with("#add-to-cart-button")));
        let status = shop.check_stock(&session(), &target()).await.unwrap();
        assert!(status.in_stock && status.cart_only);

        let shop = storefront(Arc::new(PageDriver::default()));
        assert_eq!(
            shop.check_stock(&session(), &target()).await.unwrap(),
            StockStatus::out_of_stock()
        );
    }

    #[tokio::test]
    async fn challenge_takes_precedence() {
        let driver = PageDriver::default()
            .with("#buy-now-button")
            .src("form img", "https://images.example/captcha/abc.jpg");
        let status = storefront(Arc::new(driver))
            .check_stock(&session(), &target())
            .await
            .unwrap();
        assert!(!status.in_stock);
        assert_eq!(
            status.challenge.unwrap().url,
            "https://images.example/captcha/abc.jpg"
        );
    }

    #[tokio::test]
    async fn checkout_clicks_through_within_bounds() {
        let driver = Arc::new(
            PageDriver::default()
                .with("#buy-now-button")
                .with("[name='placeYourOrder1']")
                .text(".a-price-whole", "€42,00"),
        );
        storefront(driver.clone())
            .checkout(&session(), &target(), false)
            .await
            .unwrap();
        assert_eq!(
            *driver.clicks.lock(),
            vec!["#buy-now-button".to_string(), "[name='placeYourOrder1']".to_string()]
        );
    }

    #[tokio::test]
    async fn checkout_never_clicks_outside_bounds() {
        let driver = Arc::new(
            PageDriver::default()
                .with("#buy-now-button")
                .text(".a-price-whole", "€61"),
        );
        let result = storefront(driver.clone())
            .checkout(&session(), &target(), false)
            .await;
        assert!(matches!(result, Err(Error::PriceOutOfRange { .. })));
        assert!(driver.clicks.lock().is_empty());
    }

    #[tokio::test]
    async fn unreadable_price_fails_closed() {
        let driver = Arc::new(PageDriver::default().with("#buy-now-button"));
        let result = storefront(driver.clone())
            .checkout(&session(), &target(), false)
            .await;
        assert!(matches!(result, Err(Error::PriceOutOfRange { .. })));
        assert!(driver.clicks.lock().is_empty());
    }

    #[tokio::test]
    async fn submits_challenge_solution() {
        let driver = Arc::new(
            PageDriver::default()
                .with("#captchacharacters")
                .with("button[type='submit']"),
        );
        storefront(driver.clone())
            .submit_challenge(&session(), "XKCD")
            .await
            .unwrap();
        assert_eq!(*driver.keys.lock(), vec!["XKCD".to_string()]);
        assert_eq!(*driver.clicks.lock(), vec!["button[type='submit']".to_string()]);
    }

    fn credentials() -> ShopCredentials {
        ShopCredentials {
            username: "buyer@example.com".into(),
            password: "hunter2".into(),
        }
    }

    #[tokio::test]
    async fn signs_in_through_the_login_form() {
        let driver = Arc::new(
            PageDriver::default()
                .with("#ap_email")
                .with("#continue")
                .with("#ap_password")
                .with("#signInSubmit"),
        );
        storefront(driver.clone())
            .with_sign_in_url(Some("https://www.amazon.com/ap/signin".into()))
            .sign_in(&session(), &credentials())
            .await
            .unwrap();

        assert_eq!(*driver.visits.lock(), vec!["https://www.amazon.com/ap/signin".to_string()]);
        assert_eq!(
            *driver.keys.lock(),
            vec!["buyer@example.com".to_string(), "hunter2".to_string()]
        );
        assert_eq!(
            *driver.clicks.lock(),
            vec!["#continue".to_string(), "#signInSubmit".to_string()]
        );
    }

    #[tokio::test]
    async fn sign_in_needs_a_login_page() {
        let driver = Arc::new(PageDriver::default().with("#ap_email"));
        let result = storefront(driver.clone())
            .sign_in(&session(), &credentials())
            .await;
        assert!(matches!(result, Err(Error::Storefront(_))));
        assert!(driver.keys.lock().is_empty());
    }
}
