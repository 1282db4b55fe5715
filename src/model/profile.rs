//! Browser profiles and fingerprint families
//!
//! Profiles are owned by the orchestrator; a snapshot is embedded into task
//! metadata on dispatch so workers can switch drivers without a lookup.

use serde::{Deserialize, Serialize};

use super::proxy::ProxyConfig;

/// Which driver variant a profile (or node override) targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverKind {
    /// Headless browser with a fresh context per task
    Browser,
    /// DevTools-protocol attachment to an external browser
    Cdp,
    /// Plain HTTP fetch with static HTML parsing
    Http,
}

impl DriverKind {
    /// Parse a driver name as it appears in node params and workflow config
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "browser" | "full" | "full_browser" => Some(Self::Browser),
            "cdp" | "cdp_browser" => Some(Self::Cdp),
            "http" | "static" | "static_http" => Some(Self::Http),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Browser => "browser",
            Self::Cdp => "cdp",
            Self::Http => "http",
        }
    }
}

/// Browser family used to pick a fingerprint and User-Agent profile
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrowserFamily {
    #[default]
    Chrome,
    Firefox,
    Safari,
    Edge,
}

impl BrowserFamily {
    /// Parse a family name, falling back to chrome for unknown values
    #[must_use]
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "firefox" | "gecko" => Self::Firefox,
            "safari" | "webkit" => Self::Safari,
            "edge" => Self::Edge,
            _ => Self::Chrome,
        }
    }

    /// User-Agent string matching this family's fingerprint profile
    #[must_use]
    pub fn user_agent(self) -> &'static str {
        match self {
            Self::Chrome => {
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36"
            }
            Self::Firefox => {
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:127.0) Gecko/20100101 Firefox/127.0"
            }
            Self::Safari => {
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 \
                 (KHTML, like Gecko) Version/17.5 Safari/605.1.15"
            }
            Self::Edge => {
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36 Edg/126.0.0.0"
            }
        }
    }

    /// `Accept-Language`/`Accept` header pairs matching the family
    #[must_use]
    pub fn default_headers(self) -> &'static [(&'static str, &'static str)] {
        match self {
            Self::Firefox => &[
                ("accept", "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8"),
                ("accept-language", "en-US,en;q=0.5"),
            ],
            _ => &[
                ("accept", "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/apng,*/*;q=0.8"),
                ("accept-language", "en-US,en;q=0.9"),
            ],
        }
    }
}

/// Screen dimensions advertised by a profile
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScreenSize {
    pub width: u32,
    pub height: u32,
}

impl Default for ScreenSize {
    fn default() -> Self {
        Self { width: 1920, height: 1080 }
    }
}

/// A complete browser identity: driver, family, UA, locale and
/// anti-fingerprinting knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserProfile {
    pub id: String,
    pub driver: DriverKind,
    #[serde(default)]
    pub browser: BrowserFamily,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub screen: ScreenSize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub launch_flags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<ProxyConfig>,
    /// Mask WebRTC-exposed local addresses
    #[serde(default)]
    pub disable_webrtc: bool,
    /// Add per-session noise to canvas readbacks
    #[serde(default)]
    pub canvas_noise: bool,
}

impl BrowserProfile {
    /// Effective User-Agent: explicit override or the family default
    #[must_use]
    pub fn effective_user_agent(&self) -> &str {
        self.user_agent
            .as_deref()
            .unwrap_or_else(|| self.browser.user_agent())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn driver_kind_parses_aliases() {
        assert_eq!(DriverKind::parse("browser"), Some(DriverKind::Browser));
        assert_eq!(DriverKind::parse("CDP"), Some(DriverKind::Cdp));
        assert_eq!(DriverKind::parse("static_http"), Some(DriverKind::Http));
        assert_eq!(DriverKind::parse("selenium"), None);
    }

    #[test]
    fn family_falls_back_to_chrome() {
        assert_eq!(BrowserFamily::parse("firefox"), BrowserFamily::Firefox);
        assert_eq!(BrowserFamily::parse("opera"), BrowserFamily::Chrome);
    }

    #[test]
    fn profile_user_agent_override_wins() {
        let mut profile = BrowserProfile {
            id: "p1".to_string(),
            driver: DriverKind::Http,
            browser: BrowserFamily::Firefox,
            user_agent: None,
            screen: ScreenSize::default(),
            timezone: None,
            locale: None,
            launch_flags: vec![],
            proxy: None,
            disable_webrtc: false,
            canvas_noise: false,
        };
        assert!(profile.effective_user_agent().contains("Firefox"));

        profile.user_agent = Some("custom-ua/1.0".to_string());
        assert_eq!(profile.effective_user_agent(), "custom-ua/1.0");
    }
}
