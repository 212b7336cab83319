//! Translation client for the public Google Translate endpoint.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::relay::transport::{TranslateError, Translation, Translator};

pub const DEFAULT_ENDPOINT: &str = "https://translate.googleapis.com/translate_a/single";

pub struct GoogleTranslator {
    endpoint: String,
    http: reqwest::Client,
}

impl GoogleTranslator {
    pub fn new(endpoint: Option<String>, timeout: Duration) -> Result<Self, TranslateError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TranslateError::Http(e.to_string()))?;
        Ok(Self {
            endpoint: endpoint.unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            http,
        })
    }
}

#[async_trait]
impl Translator for GoogleTranslator {
    async fn translate(&self, text: &str, from: &str, to: &str) -> Result<Translation, TranslateError> {
        let response = self
            .http
            .get(&self.endpoint)
            .query(&[("client", "gtx"), ("sl", from), ("tl", to), ("dt", "t"), ("q", text)])
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TranslateError::Timeout
                } else {
                    TranslateError::Http(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let body: String = body.chars().take(200).collect();
            return Err(TranslateError::Api(format!("{status}: {body}")));
        }

        let json: Value = response
            .json()
            .await
            .map_err(|e| TranslateError::Parse(e.to_string()))?;

        let translation = parse_response(&json)?;
        debug!(from, to, detected = ?translation.detected_source, "Translated {} chars", text.chars().count());
        Ok(translation)
    }
}

/// Pull the translated text and detected language out of the endpoint's nested arrays.
///
/// Shape: `[[["Hola","Hello",...], ...], null, "en", ...]`. Long inputs come
/// back as several sentence segments which are concatenated.
fn parse_response(json: &Value) -> Result<Translation, TranslateError> {
    let segments = json
        .get(0)
        .and_then(Value::as_array)
        .ok_or_else(|| TranslateError::Parse("missing sentence array".into()))?;

    let text: String = segments
        .iter()
        .filter_map(|segment| segment.get(0).and_then(Value::as_str))
        .collect();

    if text.trim().is_empty() {
        return Err(TranslateError::Empty);
    }

    let detected_source = json.get(2).and_then(Value::as_str).map(str::to_string);
    Ok(Translation { text, detected_source })
}
