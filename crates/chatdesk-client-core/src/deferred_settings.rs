//! Chat settings carried by an external link (`?v=<base64 query string>`).
//!
//! Decoding is best-effort: anything malformed yields empty settings and a log line.

use base64::Engine as _;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};
use url::form_urlencoded;

pub const DEFAULT_LINK_QUERY_PARAM: &str = "v";
pub const REDIRECT_MODEL_PARAM: &str = "defaultModel";
pub const REDIRECT_PROMPT_PARAM: &str = "defaultPrompt";

const MODEL_KEY: &str = "model";
const PROMPT_KEY: &str = "prompt";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeferredSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
}

impl DeferredSettings {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.model.is_none() && self.prompt.is_none()
    }

    /// Query pairs appended to the chat navigation target.
    #[must_use]
    pub fn redirect_params(&self) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();
        if let Some(model) = &self.model {
            params.push((REDIRECT_MODEL_PARAM, model.clone()));
        }
        if let Some(prompt) = &self.prompt {
            params.push((REDIRECT_PROMPT_PARAM, prompt.clone()));
        }
        params
    }
}

#[derive(Debug, thiserror::Error)]
enum DecodeError {
    #[error("link parameter is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("decoded link parameter is not utf-8")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("decoded link parameter is not a query string")]
    NotQueryString,
}

#[must_use]
pub fn decode_deferred_settings(raw: &str) -> DeferredSettings {
    match try_decode(raw) {
        Ok(settings) => settings,
        Err(error) => {
            tracing::warn!(
                target: "chatdesk.client",
                error = %error,
                raw_len = raw.len(),
                "ignoring malformed deferred settings link parameter",
            );
            DeferredSettings::default()
        }
    }
}

#[must_use]
pub fn encode_deferred_settings(settings: &DeferredSettings) -> String {
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    if let Some(model) = &settings.model {
        serializer.append_pair(MODEL_KEY, model);
    }
    if let Some(prompt) = &settings.prompt {
        serializer.append_pair(PROMPT_KEY, prompt);
    }
    STANDARD.encode(serializer.finish())
}

fn try_decode(raw: &str) -> Result<DeferredSettings, DecodeError> {
    let compact = raw.split_whitespace().collect::<String>();
    if compact.is_empty() {
        return Ok(DeferredSettings::default());
    }
    let bytes = match STANDARD.decode(compact.as_bytes()) {
        Ok(bytes) => bytes,
        Err(error) => URL_SAFE_NO_PAD
            .decode(compact.trim_end_matches('='))
            .map_err(|_| error)?,
    };
    let decoded = String::from_utf8(bytes)?;
    if !decoded.is_empty() && !decoded.contains('=') {
        return Err(DecodeError::NotQueryString);
    }

    let mut settings = DeferredSettings::default();
    for (key, value) in form_urlencoded::parse(decoded.trim_start_matches('?').as_bytes()) {
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        match key.as_ref() {
            MODEL_KEY if settings.model.is_none() => settings.model = Some(value.to_string()),
            PROMPT_KEY if settings.prompt.is_none() => settings.prompt = Some(value.to_string()),
            _ => {}
        }
    }
    Ok(settings)
}
