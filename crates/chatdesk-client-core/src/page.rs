use std::sync::Mutex;

use url::Url;
use url::form_urlencoded;

const RELATIVE_BASE: &str = "http://page.invalid";
const CHAT_SEGMENT: &str = "chat";

/// Host page the bootstrap runs inside (a browser tab, a webview, a headless driver).
///
/// All methods are synchronous UI operations; none of them perform network I/O.
pub trait Page: Send + Sync {
    fn location(&self) -> PageLocation;
    fn cookie(&self, name: &str) -> Option<String>;
    /// Rewrites the address bar without adding a history entry.
    fn replace_location(&self, target: &str);
    /// In-app navigation to `target`.
    fn navigate(&self, target: &str);
    /// Leaves the app for an absolute external URL.
    fn assign_external(&self, url: &str);
    fn reload(&self);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageLocation {
    origin: Option<String>,
    path: String,
    query: Vec<(String, String)>,
}

impl PageLocation {
    /// Accepts an absolute URL or an app-relative target such as `/en/login?code=x`.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        let (parsed, absolute) = match Url::parse(trimmed) {
            Ok(url) if url.has_host() => (Some(url), true),
            _ => (
                Url::parse(RELATIVE_BASE)
                    .ok()
                    .and_then(|base| base.join(trimmed).ok()),
                false,
            ),
        };
        let Some(url) = parsed else {
            return Self {
                origin: None,
                path: "/".to_string(),
                query: Vec::new(),
            };
        };
        Self {
            origin: absolute.then(|| url.origin().ascii_serialization()),
            path: url.path().to_string(),
            query: url
                .query_pairs()
                .map(|(key, value)| (key.into_owned(), value.into_owned()))
                .collect(),
        }
    }

    #[must_use]
    pub fn origin(&self) -> Option<&str> {
        self.origin.as_deref()
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// First non-empty value for `name`.
    #[must_use]
    pub fn query(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .filter(|(key, _)| key == name)
            .map(|(_, value)| value.trim())
            .find(|value| !value.is_empty())
    }

    #[must_use]
    pub fn without_query_param(&self, name: &str) -> Self {
        Self {
            origin: self.origin.clone(),
            path: self.path.clone(),
            query: self
                .query
                .iter()
                .filter(|(key, _)| key != name)
                .cloned()
                .collect(),
        }
    }

    /// Path plus query, suitable for `Page::replace_location`.
    #[must_use]
    pub fn to_relative(&self) -> String {
        if self.query.is_empty() {
            return self.path.clone();
        }
        let mut serializer = form_urlencoded::Serializer::new(String::new());
        for (key, value) in &self.query {
            serializer.append_pair(key, value);
        }
        format!("{}?{}", self.path, serializer.finish())
    }

    fn segments(&self) -> impl Iterator<Item = &str> {
        self.path.split('/').filter(|segment| !segment.is_empty())
    }

    /// Leading locale segment such as `en` or `pt-BR`.
    #[must_use]
    pub fn locale(&self) -> Option<&str> {
        self.segments().next().filter(|segment| is_locale_tag(segment))
    }

    /// Every route except the sign-in entry point requires a session.
    #[must_use]
    pub fn is_protected(&self, sign_in_path: &str) -> bool {
        let sign_in = sign_in_path.trim().trim_matches('/');
        if sign_in.is_empty() {
            return true;
        }
        let mut segments = self.segments().peekable();
        if segments.peek().is_some_and(|segment| is_locale_tag(segment)) {
            segments.next();
        }
        let remainder = segments.collect::<Vec<_>>().join("/");
        !(remainder == sign_in || remainder.starts_with(&format!("{sign_in}/")))
    }

    #[must_use]
    pub fn is_workspace_chat(&self) -> bool {
        self.segments().any(|segment| segment == CHAT_SEGMENT)
    }
}

fn is_locale_tag(segment: &str) -> bool {
    let mut parts = segment.split('-');
    let Some(language) = parts.next() else {
        return false;
    };
    if language.len() != 2 || !language.chars().all(|ch| ch.is_ascii_lowercase()) {
        return false;
    }
    match (parts.next(), parts.next()) {
        (None, _) => true,
        (Some(region), None) => {
            (2..=4).contains(&region.len()) && region.chars().all(|ch| ch.is_ascii_alphanumeric())
        }
        _ => false,
    }
}

/// Extracts one cookie value from a `Cookie` header style string.
#[must_use]
pub fn cookie_value(header: &str, name: &str) -> Option<String> {
    header.split(';').find_map(|pair| {
        let (key, value) = pair.trim().split_once('=')?;
        (key.trim() == name)
            .then(|| value.trim().to_string())
            .filter(|value| !value.is_empty())
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageEvent {
    Replaced(String),
    Navigated(String),
    External(String),
    Reloaded,
}

/// In-process page used by the harness binary and tests.
#[derive(Debug)]
pub struct HeadlessPage {
    location: Mutex<PageLocation>,
    cookie_header: String,
    events: Mutex<Vec<PageEvent>>,
}

impl HeadlessPage {
    #[must_use]
    pub fn new(url: &str) -> Self {
        Self {
            location: Mutex::new(PageLocation::parse(url)),
            cookie_header: String::new(),
            events: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn with_cookie(self, name: &str, value: &str) -> Self {
        self.with_cookie_header(&format!("{}={}", name.trim(), value.trim()))
    }

    /// Appends a `Cookie` header style string (`a=1; b=2`).
    #[must_use]
    pub fn with_cookie_header(mut self, header: &str) -> Self {
        let header = header.trim().trim_matches(';').trim();
        if header.is_empty() {
            return self;
        }
        if !self.cookie_header.is_empty() {
            self.cookie_header.push_str("; ");
        }
        self.cookie_header.push_str(header);
        self
    }

    #[must_use]
    pub fn events(&self) -> Vec<PageEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn navigations(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                PageEvent::Navigated(target) => Some(target),
                _ => None,
            })
            .collect()
    }

    fn record(&self, event: PageEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }

    fn set_location(&self, target: &str) {
        if let Ok(mut location) = self.location.lock() {
            let origin = location.origin.clone();
            *location = PageLocation::parse(target);
            if location.origin.is_none() {
                location.origin = origin;
            }
        }
    }
}

impl Page for HeadlessPage {
    fn location(&self) -> PageLocation {
        self.location
            .lock()
            .map(|location| location.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    fn cookie(&self, name: &str) -> Option<String> {
        cookie_value(&self.cookie_header, name)
    }

    fn replace_location(&self, target: &str) {
        self.set_location(target);
        self.record(PageEvent::Replaced(target.to_string()));
    }

    fn navigate(&self, target: &str) {
        self.set_location(target);
        self.record(PageEvent::Navigated(target.to_string()));
    }

    fn assign_external(&self, url: &str) {
        self.record(PageEvent::External(url.to_string()));
    }

    fn reload(&self) {
        self.record(PageEvent::Reloaded);
    }
}
