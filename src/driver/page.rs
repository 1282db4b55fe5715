//! The polymorphic Page/Element capability surface

use async_trait::async_trait;

use super::error::DriverResult;
use super::options::{
    Cookie, NavigateOptions, PageContext, ScreenshotOptions, WaitOptions, WaitState,
};
use crate::model::DriverKind;

pub type DynPage = Box<dyn Page>;
pub type DynElement = Box<dyn Element>;

/// A live page handle with the full capability set
///
/// Node executors hold a `&dyn Page` and never see the backend. Methods a
/// variant cannot perform return [`super::DriverError::NotSupported`].
#[async_trait]
pub trait Page: Send + Sync {
    async fn navigate(&self, url: &str, opts: NavigateOptions) -> DriverResult<()>;

    async fn content(&self) -> DriverResult<String>;

    async fn title(&self) -> DriverResult<String>;

    async fn url(&self) -> DriverResult<String>;

    async fn click(&self, selector: &str) -> DriverResult<()>;

    async fn type_text(&self, selector: &str, text: &str) -> DriverResult<()>;

    /// Clear the target first, then type
    async fn fill(&self, selector: &str, text: &str) -> DriverResult<()>;

    async fn hover(&self, selector: &str) -> DriverResult<()>;

    async fn wait_for_selector(&self, selector: &str, opts: WaitOptions) -> DriverResult<()>;

    /// Wait until the page URL contains the given fragment
    async fn wait_for_url(&self, fragment: &str, opts: WaitOptions) -> DriverResult<()>;

    /// Wait for an element to reach the given readiness state
    async fn wait_for_state(
        &self,
        selector: &str,
        state: WaitState,
        opts: WaitOptions,
    ) -> DriverResult<()>;

    /// Wait until a JS expression evaluates truthy
    async fn wait_for_function(&self, expression: &str, opts: WaitOptions) -> DriverResult<()>;

    async fn evaluate(&self, script: &str) -> DriverResult<serde_json::Value>;

    /// Install a script that runs before any page script on future navigations
    async fn add_init_script(&self, script: &str) -> DriverResult<()>;

    async fn query_selector(&self, selector: &str) -> DriverResult<Option<DynElement>>;

    async fn query_selector_all(&self, selector: &str) -> DriverResult<Vec<DynElement>>;

    async fn cookies(&self) -> DriverResult<Vec<Cookie>>;

    async fn set_cookies(&self, cookies: Vec<Cookie>) -> DriverResult<()>;

    async fn screenshot(&self, opts: ScreenshotOptions) -> DriverResult<Vec<u8>>;

    async fn close(&self) -> DriverResult<()>;

    /// HTTP status of the last navigation, when the backend observes one
    fn last_status(&self) -> Option<u16>;

    /// Which variant produced this page
    fn driver_kind(&self) -> DriverKind;
}

/// A handle to a single matched element
#[async_trait]
pub trait Element: Send + Sync {
    async fn text(&self) -> DriverResult<String>;

    async fn attribute(&self, name: &str) -> DriverResult<Option<String>>;

    async fn inner_html(&self) -> DriverResult<String>;

    async fn screenshot(&self) -> DriverResult<Vec<u8>>;

    async fn click(&self) -> DriverResult<()>;

    async fn type_text(&self, text: &str) -> DriverResult<()>;

    async fn fill(&self, text: &str) -> DriverResult<()>;

    async fn hover(&self) -> DriverResult<()>;

    async fn query_selector(&self, selector: &str) -> DriverResult<Option<DynElement>>;

    async fn query_selector_all(&self, selector: &str) -> DriverResult<Vec<DynElement>>;
}

/// Factory producing pages for a variant
#[async_trait]
pub trait Driver: Send + Sync {
    fn kind(&self) -> DriverKind;

    /// Open a fresh page honouring the context's proxy and fingerprint
    async fn new_page(&self, ctx: &PageContext) -> DriverResult<DynPage>;

    /// Release backend resources; pages from this driver become invalid
    async fn close(&self) -> DriverResult<()>;
}
