use crate::auth::BearerToken;
use crate::page::Page;
use crate::storage::{ClientStore, StorageError, StorageKey};

pub const DEFAULT_TOKEN_QUERY_PARAM: &str = "token";
pub const DEFAULT_TOKEN_COOKIE_NAME: &str = "authToken";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenSource {
    Url,
    Store,
    Cookie,
}

impl TokenSource {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Url => "url",
            Self::Store => "store",
            Self::Cookie => "cookie",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedToken {
    pub token: BearerToken,
    pub source: TokenSource,
}

/// Finds the current bearer token: URL parameter, then persisted store, then cookie.
#[derive(Debug, Clone)]
pub struct TokenSourceResolver {
    query_param: String,
    cookie_name: String,
}

impl Default for TokenSourceResolver {
    fn default() -> Self {
        Self::new(DEFAULT_TOKEN_QUERY_PARAM, DEFAULT_TOKEN_COOKIE_NAME)
    }
}

impl TokenSourceResolver {
    #[must_use]
    pub fn new(query_param: impl Into<String>, cookie_name: impl Into<String>) -> Self {
        Self {
            query_param: query_param.into(),
            cookie_name: cookie_name.into(),
        }
    }

    pub fn resolve(
        &self,
        page: &dyn Page,
        store: &dyn ClientStore,
    ) -> Result<Option<ResolvedToken>, StorageError> {
        let location = page.location();
        if let Some(token) = location
            .query(&self.query_param)
            .and_then(|raw| BearerToken::parse(raw).ok())
        {
            store.set(StorageKey::BearerToken, token.as_str())?;
            // Strip before anything else can read the address bar or send a referrer.
            page.replace_location(&location.without_query_param(&self.query_param).to_relative());
            return Ok(Some(ResolvedToken {
                token,
                source: TokenSource::Url,
            }));
        }

        if let Some(token) = store
            .get(StorageKey::BearerToken)?
            .and_then(|raw| BearerToken::parse(&raw).ok())
        {
            return Ok(Some(ResolvedToken {
                token,
                source: TokenSource::Store,
            }));
        }

        if let Some(token) = page
            .cookie(&self.cookie_name)
            .and_then(|raw| BearerToken::parse(&raw).ok())
        {
            store.set(StorageKey::BearerToken, token.as_str())?;
            return Ok(Some(ResolvedToken {
                token,
                source: TokenSource::Cookie,
            }));
        }

        Ok(None)
    }
}
