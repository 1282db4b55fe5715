//! Static HTTP driver
//!
//! Fetches pages with reqwest and answers selector queries against the
//! parsed HTML. Supports navigation, content, selectors and cookies;
//! interactions, script evaluation and screenshots are not supported and
//! fail accordingly. The browser-family hint from the page context selects
//! the User-Agent and header profile presented to the server.

use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use tokio::sync::RwLock;
use tracing::debug;

use super::error::{DriverError, DriverResult};
use super::options::{
    Cookie, NavigateOptions, PageContext, ScreenshotOptions, WaitOptions, WaitState,
};
use super::page::{Driver, DynElement, DynPage, Element, Page};
use crate::model::{BrowserFamily, DriverKind};

/// Driver factory for plain-HTTP pages
#[derive(Debug, Default)]
pub struct StaticHttpDriver;

impl StaticHttpDriver {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Driver for StaticHttpDriver {
    fn kind(&self) -> DriverKind {
        DriverKind::Http
    }

    async fn new_page(&self, ctx: &PageContext) -> DriverResult<DynPage> {
        let family = ctx.fingerprint.unwrap_or_default();
        let user_agent = ctx
            .user_agent
            .clone()
            .unwrap_or_else(|| family.user_agent().to_string());

        let mut builder = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(std::time::Duration::from_secs(60));

        if let Some(proxy_cfg) = &ctx.proxy {
            let mut proxy = reqwest::Proxy::all(&proxy_cfg.url).map_err(DriverError::other)?;
            if let (Some(user), Some(pass)) = (&proxy_cfg.username, &proxy_cfg.password) {
                proxy = proxy.basic_auth(user, pass);
            }
            builder = builder.proxy(proxy);
        }

        let client = builder.build().map_err(DriverError::other)?;
        debug!(family = family.user_agent(), "http page created");

        Ok(Box::new(HttpPage {
            client,
            family,
            state: RwLock::new(PageState::default()),
        }))
    }

    async fn close(&self) -> DriverResult<()> {
        Ok(())
    }
}

#[derive(Debug, Default)]
struct PageState {
    url: Option<url::Url>,
    html: String,
    status: Option<u16>,
    cookies: Vec<Cookie>,
}

/// A fetched document with a manual cookie jar
pub struct HttpPage {
    client: reqwest::Client,
    family: BrowserFamily,
    state: RwLock<PageState>,
}

impl HttpPage {
    fn parse_selector(selector: &str) -> DriverResult<Selector> {
        Selector::parse(selector)
            .map_err(|e| DriverError::Other(format!("invalid selector {selector}: {e}")))
    }

    /// Cookie header value for the target host, RFC 6265 domain-matching
    fn cookie_header(cookies: &[Cookie], host: &str) -> Option<String> {
        let applicable: Vec<String> = cookies
            .iter()
            .filter(|c| domain_matches(&c.domain, host))
            .map(|c| format!("{}={}", c.name, c.value))
            .collect();
        if applicable.is_empty() {
            None
        } else {
            Some(applicable.join("; "))
        }
    }

    fn store_set_cookies(state: &mut PageState, headers: &reqwest::header::HeaderMap, host: &str) {
        for value in headers.get_all(reqwest::header::SET_COOKIE) {
            let Ok(raw) = value.to_str() else { continue };
            if let Some(cookie) = parse_set_cookie(raw, host) {
                state.cookies.retain(|c| !(c.name == cookie.name && c.domain == cookie.domain));
                state.cookies.push(cookie);
            }
        }
    }
}

#[async_trait]
impl Page for HttpPage {
    async fn navigate(&self, url: &str, opts: NavigateOptions) -> DriverResult<()> {
        let target = url::Url::parse(url)
            .map_err(|e| DriverError::Other(format!("invalid url {url}: {e}")))?;
        let host = target.host_str().unwrap_or_default().to_string();

        let mut request = self.client.get(target.clone());
        for (name, value) in self.family.default_headers() {
            request = request.header(*name, *value);
        }
        {
            let state = self.state.read().await;
            if let Some(header) = Self::cookie_header(&state.cookies, &host) {
                request = request.header(reqwest::header::COOKIE, header);
            }
        }
        if let Some(timeout) = opts.timeout {
            request = request.timeout(timeout);
        }
        // wait_until has no meaning without a renderer

        let response = request.send().await.map_err(DriverError::other)?;
        let status = response.status().as_u16();
        let final_url = response.url().clone();
        let headers = response.headers().clone();
        let body = response.text().await.map_err(DriverError::other)?;

        let mut state = self.state.write().await;
        Self::store_set_cookies(&mut state, &headers, &host);
        state.url = Some(final_url);
        state.status = Some(status);
        state.html = body;

        if status >= 400 {
            return Err(DriverError::Other(format!("HTTP {status} fetching {url}")));
        }
        Ok(())
    }

    async fn content(&self) -> DriverResult<String> {
        Ok(self.state.read().await.html.clone())
    }

    async fn title(&self) -> DriverResult<String> {
        let html = self.state.read().await.html.clone();
        let selector = Self::parse_selector("title")?;
        let document = Html::parse_document(&html);
        Ok(document
            .select(&selector)
            .next()
            .map(|t| t.text().collect::<String>().trim().to_string())
            .unwrap_or_default())
    }

    async fn url(&self) -> DriverResult<String> {
        Ok(self
            .state
            .read()
            .await
            .url
            .as_ref()
            .map(url::Url::to_string)
            .unwrap_or_default())
    }

    async fn click(&self, _selector: &str) -> DriverResult<()> {
        Err(DriverError::not_supported("click"))
    }

    async fn type_text(&self, _selector: &str, _text: &str) -> DriverResult<()> {
        Err(DriverError::not_supported("type"))
    }

    async fn fill(&self, _selector: &str, _text: &str) -> DriverResult<()> {
        Err(DriverError::not_supported("fill"))
    }

    async fn hover(&self, _selector: &str) -> DriverResult<()> {
        Err(DriverError::not_supported("hover"))
    }

    async fn wait_for_selector(&self, selector: &str, _opts: WaitOptions) -> DriverResult<()> {
        // the document is fully materialised after navigate, so a wait is a
        // plain presence check
        if self.query_selector(selector).await?.is_some() {
            Ok(())
        } else {
            Err(DriverError::element_not_found(selector))
        }
    }

    async fn wait_for_url(&self, fragment: &str, _opts: WaitOptions) -> DriverResult<()> {
        let current = self.url().await?;
        if current.contains(fragment) {
            Ok(())
        } else {
            Err(DriverError::Other(format!(
                "current url {current} does not contain {fragment}"
            )))
        }
    }

    async fn wait_for_state(
        &self,
        selector: &str,
        state: WaitState,
        opts: WaitOptions,
    ) -> DriverResult<()> {
        match state {
            WaitState::Attached | WaitState::Visible => {
                self.wait_for_selector(selector, opts).await
            }
            WaitState::Detached | WaitState::Hidden => {
                if self.query_selector(selector).await?.is_none() {
                    Ok(())
                } else {
                    Err(DriverError::Other(format!("element still present: {selector}")))
                }
            }
        }
    }

    async fn wait_for_function(&self, _expression: &str, _opts: WaitOptions) -> DriverResult<()> {
        Err(DriverError::not_supported("wait_for_function"))
    }

    async fn evaluate(&self, _script: &str) -> DriverResult<serde_json::Value> {
        Err(DriverError::not_supported("evaluate"))
    }

    async fn add_init_script(&self, _script: &str) -> DriverResult<()> {
        Err(DriverError::not_supported("add_init_script"))
    }

    async fn query_selector(&self, selector: &str) -> DriverResult<Option<DynElement>> {
        let parsed = Self::parse_selector(selector)?;
        let html = self.state.read().await.html.clone();
        let fragment = {
            let document = Html::parse_document(&html);
            document.select(&parsed).next().map(|el| el.html())
        };
        Ok(fragment.map(|outer| Box::new(HttpElement { outer }) as DynElement))
    }

    async fn query_selector_all(&self, selector: &str) -> DriverResult<Vec<DynElement>> {
        let parsed = Self::parse_selector(selector)?;
        let html = self.state.read().await.html.clone();
        let fragments: Vec<String> = {
            let document = Html::parse_document(&html);
            document.select(&parsed).map(|el| el.html()).collect()
        };
        Ok(fragments
            .into_iter()
            .map(|outer| Box::new(HttpElement { outer }) as DynElement)
            .collect())
    }

    async fn cookies(&self) -> DriverResult<Vec<Cookie>> {
        Ok(self.state.read().await.cookies.clone())
    }

    async fn set_cookies(&self, cookies: Vec<Cookie>) -> DriverResult<()> {
        let mut state = self.state.write().await;
        for cookie in cookies {
            state
                .cookies
                .retain(|c| !(c.name == cookie.name && c.domain == cookie.domain));
            state.cookies.push(cookie);
        }
        Ok(())
    }

    async fn screenshot(&self, _opts: ScreenshotOptions) -> DriverResult<Vec<u8>> {
        Err(DriverError::not_supported("screenshot"))
    }

    async fn close(&self) -> DriverResult<()> {
        Ok(())
    }

    fn last_status(&self) -> Option<u16> {
        // try_read never contends here: status is only written inside
        // navigate, which callers await before reading
        self.state.try_read().ok().and_then(|s| s.status)
    }

    fn driver_kind(&self) -> DriverKind {
        DriverKind::Http
    }
}

/// An element captured as its own HTML fragment
///
/// The fragment is re-parsed per accessor; static pages are small and this
/// keeps the element independent of the page's lifetime.
pub struct HttpElement {
    outer: String,
}

impl HttpElement {
    fn with_root<T>(&self, f: impl FnOnce(ElementRef<'_>) -> T) -> DriverResult<T> {
        let fragment = Html::parse_fragment(&self.outer);
        let root = fragment
            .root_element()
            .child_elements()
            .next()
            .ok_or_else(|| DriverError::Other("empty element fragment".to_string()))?;
        Ok(f(root))
    }
}

#[async_trait]
impl Element for HttpElement {
    async fn text(&self) -> DriverResult<String> {
        self.with_root(|root| root.text().collect::<String>().trim().to_string())
    }

    async fn attribute(&self, name: &str) -> DriverResult<Option<String>> {
        self.with_root(|root| root.value().attr(name).map(str::to_string))
    }

    async fn inner_html(&self) -> DriverResult<String> {
        self.with_root(|root| root.inner_html())
    }

    async fn screenshot(&self) -> DriverResult<Vec<u8>> {
        Err(DriverError::not_supported("element screenshot"))
    }

    async fn click(&self) -> DriverResult<()> {
        Err(DriverError::not_supported("element click"))
    }

    async fn type_text(&self, _text: &str) -> DriverResult<()> {
        Err(DriverError::not_supported("element type"))
    }

    async fn fill(&self, _text: &str) -> DriverResult<()> {
        Err(DriverError::not_supported("element fill"))
    }

    async fn hover(&self) -> DriverResult<()> {
        Err(DriverError::not_supported("element hover"))
    }

    async fn query_selector(&self, selector: &str) -> DriverResult<Option<DynElement>> {
        let parsed = Self::parse_inner_selector(selector)?;
        let fragment = Html::parse_fragment(&self.outer);
        let found = fragment.select(&parsed).next().map(|el| el.html());
        Ok(found.map(|outer| Box::new(HttpElement { outer }) as DynElement))
    }

    async fn query_selector_all(&self, selector: &str) -> DriverResult<Vec<DynElement>> {
        let parsed = Self::parse_inner_selector(selector)?;
        let fragment = Html::parse_fragment(&self.outer);
        let found: Vec<String> = fragment.select(&parsed).map(|el| el.html()).collect();
        Ok(found
            .into_iter()
            .map(|outer| Box::new(HttpElement { outer }) as DynElement)
            .collect())
    }
}

impl HttpElement {
    fn parse_inner_selector(selector: &str) -> DriverResult<Selector> {
        Selector::parse(selector)
            .map_err(|e| DriverError::Other(format!("invalid selector {selector}: {e}")))
    }
}

/// RFC 6265 domain match: exact host or a dot-boundary suffix
fn domain_matches(cookie_domain: &str, host: &str) -> bool {
    let cookie_domain = cookie_domain.trim_start_matches('.');
    if cookie_domain.is_empty() {
        return false;
    }
    host == cookie_domain || host.ends_with(&format!(".{cookie_domain}"))
}

/// Minimal Set-Cookie parse: name=value plus Domain/Path/Secure/HttpOnly
fn parse_set_cookie(raw: &str, default_domain: &str) -> Option<Cookie> {
    let mut parts = raw.split(';');
    let (name, value) = parts.next()?.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }

    let mut cookie = Cookie::new(name, value.trim(), default_domain);
    for attr in parts {
        let attr = attr.trim();
        match attr.split_once('=') {
            Some((k, v)) if k.eq_ignore_ascii_case("domain") => {
                cookie.domain = v.trim().trim_start_matches('.').to_string();
            }
            Some((k, v)) if k.eq_ignore_ascii_case("path") => {
                cookie.path = v.trim().to_string();
            }
            _ => {
                if attr.eq_ignore_ascii_case("secure") {
                    cookie.secure = true;
                } else if attr.eq_ignore_ascii_case("httponly") {
                    cookie.http_only = true;
                }
            }
        }
    }
    Some(cookie)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_cookie_parsing_extracts_attributes() {
        let cookie = parse_set_cookie(
            "session=abc123; Domain=.example.com; Path=/app; Secure; HttpOnly",
            "example.com",
        )
        .expect("cookie parses");
        assert_eq!(cookie.name, "session");
        assert_eq!(cookie.value, "abc123");
        assert_eq!(cookie.domain, "example.com");
        assert_eq!(cookie.path, "/app");
        assert!(cookie.secure);
        assert!(cookie.http_only);
    }

    #[test]
    fn domain_matching_respects_boundaries() {
        assert!(domain_matches("example.com", "example.com"));
        assert!(domain_matches("example.com", "shop.example.com"));
        assert!(!domain_matches("example.com", "badexample.com"));
        assert!(!domain_matches("", "example.com"));
    }

    #[tokio::test]
    async fn element_fragment_accessors() {
        let element = HttpElement {
            outer: r#"<a href="/p/1" class="p">First <b>item</b></a>"#.to_string(),
        };
        assert_eq!(element.text().await.expect("text"), "First item");
        assert_eq!(
            element.attribute("href").await.expect("attr"),
            Some("/p/1".to_string())
        );
        assert!(element.inner_html().await.expect("html").contains("<b>item</b>"));
        assert!(element.click().await.is_err());
    }

    #[tokio::test]
    async fn nested_queries_within_fragment() {
        let element = HttpElement {
            outer: r#"<div><span class="k">Name</span><span class="v">Widget</span></div>"#
                .to_string(),
        };
        let value = element
            .query_selector(".v")
            .await
            .expect("query ok")
            .expect("matched");
        assert_eq!(value.text().await.expect("text"), "Widget");

        let all = element.query_selector_all("span").await.expect("query all");
        assert_eq!(all.len(), 2);
    }
}
