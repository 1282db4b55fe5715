//! Driver abstraction over browser and HTTP page access
//!
//! Every node executor talks to a [`Page`] and never to a concrete backend.
//! Three variants implement the capability surface: a full headless browser
//! with a fresh context per task, a DevTools attachment to an external
//! browser, and a static HTTP fetcher. Variants fail with
//! [`DriverError::NotSupported`] on actions they cannot perform rather than
//! silently degrading.

pub mod browser;
pub mod cdp;
pub mod chromium;
pub mod error;
pub mod http;
pub mod manager;
pub mod options;
pub mod page;

pub use browser::BrowserDriver;
pub use cdp::CdpDriver;
pub use error::{DriverError, DriverResult};
pub use http::StaticHttpDriver;
pub use manager::{DriverHandle, DriverManager, DriverManagerConfig};
pub use options::{
    Cookie, NavigateOptions, PageContext, ScreenshotOptions, WaitOptions, WaitState, WaitUntil,
};
pub use page::{Driver, DynElement, DynPage, Element, Page};
