//! Request plumbing shared by the provider adapters.

use std::str::FromStr;
use std::time::Duration;

use offramp_types::ProviderError;
use reqwest::{Client, RequestBuilder, Response};
use rust_decimal::Decimal;
use serde_json::Value;

/// Provider bodies are cut to this many characters in errors and logs.
pub const MAX_BODY_CHARS: usize = 2000;

pub fn build_client(timeout: Duration) -> Result<Client, ProviderError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ProviderError::MissingConfig(format!("failed to build HTTP client: {e}")))
}

pub fn join(base_url: &str, path: &str) -> String {
    format!("{}{}", base_url.trim_end_matches('/'), path)
}

pub fn truncate(body: &str) -> String {
    match body.char_indices().nth(MAX_BODY_CHARS) {
        Some((idx, _)) => body[..idx].to_string(),
        None => body.to_string(),
    }
}

/// Sends `request` and returns the JSON body of a 2xx answer.
///
/// Non-2xx answers become `ProviderError::Http` carrying the (truncated)
/// body; a 2xx answer that is not JSON is kept as `{"raw": "<text>"}`.
/// Failures before the connection is up are `Transport`; anything later,
/// timeouts included, is `NoResponse`.
pub async fn send_json(request: RequestBuilder, what: &str) -> Result<Value, ProviderError> {
    let response = request.send().await.map_err(|e| send_error(what, e))?;
    read_json(response, what).await
}

fn send_error(what: &str, e: reqwest::Error) -> ProviderError {
    if e.is_connect() || e.is_builder() {
        ProviderError::Transport(format!("{what} failed: {e}"))
    } else {
        ProviderError::NoResponse(format!("{what} failed: {e}"))
    }
}

async fn read_json(response: Response, what: &str) -> Result<Value, ProviderError> {
    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| ProviderError::NoResponse(format!("{what}: reading body failed: {e}")))?;

    if !status.is_success() {
        return Err(ProviderError::Http {
            status: status.as_u16(),
            body: truncate(&text),
        });
    }
    if text.trim().is_empty() {
        return Ok(Value::Object(Default::default()));
    }
    Ok(serde_json::from_str(&text).unwrap_or_else(|_| serde_json::json!({ "raw": truncate(&text) })))
}

/// First string-or-number found at any of the JSON pointers.
pub fn find_id(value: &Value, pointers: &[&str]) -> Option<String> {
    pointers.iter().find_map(|p| match value.pointer(p)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

pub fn find_str(value: &Value, pointers: &[&str]) -> Option<String> {
    pointers
        .iter()
        .find_map(|p| value.pointer(p).and_then(Value::as_str))
        .map(|s| s.trim().to_ascii_lowercase())
        .filter(|s| !s.is_empty())
}

/// First amount found at any of the JSON pointers, given as a number or
/// a numeric string.
pub fn find_decimal(value: &Value, pointers: &[&str]) -> Option<Decimal> {
    pointers.iter().find_map(|p| {
        let raw = match value.pointer(p)? {
            Value::String(s) => s.trim().to_string(),
            Value::Number(n) => n.to_string(),
            _ => return None,
        };
        Decimal::from_str(&raw)
            .or_else(|_| Decimal::from_scientific(&raw))
            .ok()
    })
}
