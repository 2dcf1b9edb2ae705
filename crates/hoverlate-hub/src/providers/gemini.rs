//! Gemini provider — `models/{model}:generateContent` over HTTPS.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use hoverlate_core::error::UpstreamError;
use hoverlate_core::upstream::UpstreamClient;

/// Public Gemini REST endpoint for model calls.
pub const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Gemini `generateContent` client.
///
/// The key travels per call, so one client serves validation of a new key
/// and normal requests alike.
pub struct GeminiClient {
    client: Client,
    api_base: String,
}

impl GeminiClient {
    pub fn new(api_base: Option<String>) -> Self {
        let api_base = api_base
            .unwrap_or_else(|| GEMINI_API_BASE.to_string())
            .trim_end_matches('/')
            .to_string();

        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self { client, api_base }
    }

    fn endpoint(&self, model: &str) -> String {
        format!("{}/{}:generateContent", self.api_base, model)
    }
}

impl Default for GeminiClient {
    fn default() -> Self {
        Self::new(None)
    }
}

// ─── Wire types ────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct Part {
    text: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    #[serde(default)]
    message: String,
    #[serde(default)]
    details: Vec<Value>,
}

// ─── Error classification ──────────────────────────────────

/// Seconds from a protobuf duration string such as `"37s"` or `"2.5s"`,
/// rounded up.
fn parse_duration_secs(raw: &str) -> Option<u64> {
    let secs: f64 = raw.trim().trim_end_matches('s').parse().ok()?;
    (secs >= 0.0).then(|| secs.ceil() as u64)
}

/// Wait hint from a `RetryInfo` detail, or from "retry in N s" in the text.
fn retry_after_secs(message: &str, details: &[Value]) -> Option<u64> {
    let from_details = details
        .iter()
        .filter_map(|d| d.get("retryDelay").and_then(Value::as_str))
        .find_map(parse_duration_secs);
    if from_details.is_some() {
        return from_details;
    }

    let lower = message.to_ascii_lowercase();
    let start = lower.find("retry in ")? + "retry in ".len();
    let number: String = lower[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    parse_duration_secs(&number)
}

/// A daily allowance ran out, as opposed to the per-minute limit that also
/// answers 429 "Resource has been exhausted (e.g. check quota)".
fn is_daily_quota(lower: &str, details: &[Value]) -> bool {
    if lower.contains("exceeded your current quota") {
        return true;
    }
    details
        .iter()
        .filter_map(|d| d.get("violations").and_then(Value::as_array))
        .flatten()
        .filter_map(|v| v.get("quotaId").and_then(Value::as_str))
        .any(|id| id.contains("PerDay"))
}

/// Map a non-2xx Gemini response to an [`UpstreamError`].
pub fn classify_error(status: u16, body: &str) -> UpstreamError {
    let (message, details) = match serde_json::from_str::<ApiError>(body) {
        Ok(err) if !err.error.message.is_empty() => (err.error.message, err.error.details),
        _ => (format!("HTTP error! status: {}", status), Vec::new()),
    };
    let lower = message.to_ascii_lowercase();

    if lower.contains("user location is not supported") {
        UpstreamError::RegionUnsupported(message)
    } else if lower.contains("api key not valid") {
        UpstreamError::InvalidKey(message)
    } else if is_daily_quota(&lower, &details) {
        UpstreamError::QuotaExceeded(message)
    } else if status == 429 {
        let retry_after_secs = retry_after_secs(&message, &details);
        UpstreamError::RateLimited {
            message,
            retry_after_secs,
        }
    } else if status == 403 {
        UpstreamError::PermissionDenied(message)
    } else if status == 404 {
        UpstreamError::ModelNotFound(message)
    } else {
        UpstreamError::Server { status, message }
    }
}

/// Pull the answer text out of a successful response body.
fn extract_text(body: &str) -> Result<String, UpstreamError> {
    let parsed: GenerateResponse = serde_json::from_str(body).map_err(|e| {
        let preview: String = body.chars().take(200).collect();
        UpstreamError::Malformed(format!(
            "Failed to parse response: {} (body: {})",
            e, preview
        ))
    })?;

    if let Some(reason) = parsed.prompt_feedback.and_then(|f| f.block_reason) {
        return Err(UpstreamError::Blocked(reason));
    }

    let candidate = parsed
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| UpstreamError::Malformed("No candidates in response".to_string()))?;

    let text = candidate
        .content
        .and_then(|c| c.parts.into_iter().find_map(|p| p.text))
        .filter(|t| !t.trim().is_empty());

    match (text, candidate.finish_reason.as_deref()) {
        (Some(text), _) => Ok(text),
        (None, Some("MAX_TOKENS")) => Err(UpstreamError::MaxOutput),
        (None, Some(reason @ ("SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT"))) => {
            Err(UpstreamError::Blocked(reason.to_string()))
        }
        (None, reason) => Err(UpstreamError::Malformed(format!(
            "No text in response (finish reason: {})",
            reason.unwrap_or("none")
        ))),
    }
}

#[async_trait]
impl UpstreamClient for GeminiClient {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn generate(
        &self,
        api_key: &str,
        model: &str,
        prompt: &str,
    ) -> std::result::Result<String, UpstreamError> {
        debug!(model = %model, prompt_len = prompt.len(), "Calling Gemini");

        let body = json!({
            "contents": [{ "parts": [{ "text": prompt }] }]
        });

        let resp = self
            .client
            .post(self.endpoint(model))
            .query(&[("key", api_key)])
            .json(&body)
            .send()
            .await
            .map_err(|e| UpstreamError::Network(e.without_url().to_string()))?;

        let status = resp.status();
        let body_text = resp
            .text()
            .await
            .map_err(|e| UpstreamError::Network(e.without_url().to_string()))?;

        debug!(
            model = %model,
            status = status.as_u16(),
            body_len = body_text.len(),
            "Gemini response"
        );

        if !status.is_success() {
            return Err(classify_error(status.as_u16(), &body_text));
        }

        extract_text(&body_text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn ok_body(text: &str) -> Value {
        json!({
            "candidates": [{
                "content": { "parts": [{ "text": text }], "role": "model" },
                "finishReason": "STOP"
            }]
        })
    }

    fn error_body(code: u16, message: &str) -> Value {
        json!({ "error": { "code": code, "message": message, "status": "ERR" } })
    }

    async fn respond(template: ResponseTemplate) -> (MockServer, GeminiClient) {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/gemini-2.5-flash:generateContent"))
            .respond_with(template)
            .mount(&server)
            .await;
        let client = GeminiClient::new(Some(server.uri()));
        (server, client)
    }

    #[tokio::test]
    async fn test_generate_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/gemini-2.5-flash:generateContent"))
            .and(query_param("key", "test-key"))
            .and(body_partial_json(json!({
                "contents": [{ "parts": [{ "text": "Translate\n\nこんにちは" }] }]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(ok_body("Hello")))
            .expect(1)
            .mount(&server)
            .await;

        let client = GeminiClient::new(Some(format!("{}/", server.uri())));
        let text = client
            .generate("test-key", "gemini-2.5-flash", "Translate\n\nこんにちは")
            .await
            .unwrap();
        assert_eq!(text, "Hello");
    }

    #[tokio::test]
    async fn test_quota_error() {
        let (_server, client) = respond(ResponseTemplate::new(429).set_body_json(error_body(
            429,
            "You exceeded your current quota, please check your plan and billing details.",
        )))
        .await;

        let err = client.generate("k", "gemini-2.5-flash", "p").await.unwrap_err();
        assert!(err.is_quota());
    }

    #[tokio::test]
    async fn test_rate_limit_with_retry_delay() {
        let body = json!({
            "error": {
                "code": 429,
                "message": "Resource has been exhausted (e.g. check quota).",
                "details": [{
                    "@type": "type.googleapis.com/google.rpc.RetryInfo",
                    "retryDelay": "37s"
                }]
            }
        });
        let (_server, client) = respond(ResponseTemplate::new(429).set_body_json(body)).await;

        let err = client.generate("k", "gemini-2.5-flash", "p").await.unwrap_err();
        assert!(matches!(
            err,
            UpstreamError::RateLimited {
                retry_after_secs: Some(37),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_invalid_key() {
        let (_server, client) = respond(ResponseTemplate::new(400).set_body_json(error_body(
            400,
            "API key not valid. Please pass a valid API key.",
        )))
        .await;

        let err = client.generate("bad", "gemini-2.5-flash", "p").await.unwrap_err();
        assert!(matches!(err, UpstreamError::InvalidKey(_)));
        assert!(err.is_permanent());
    }

    #[tokio::test]
    async fn test_blocked_prompt() {
        let body = json!({ "promptFeedback": { "blockReason": "SAFETY" } });
        let (_server, client) = respond(ResponseTemplate::new(200).set_body_json(body)).await;

        let err = client.generate("k", "gemini-2.5-flash", "p").await.unwrap_err();
        assert_eq!(err, UpstreamError::Blocked("SAFETY".into()));
    }

    #[tokio::test]
    async fn test_max_tokens_without_text() {
        let body = json!({
            "candidates": [{ "content": { "role": "model" }, "finishReason": "MAX_TOKENS" }]
        });
        let (_server, client) = respond(ResponseTemplate::new(200).set_body_json(body)).await;

        let err = client.generate("k", "gemini-2.5-flash", "p").await.unwrap_err();
        assert_eq!(err, UpstreamError::MaxOutput);
    }

    #[tokio::test]
    async fn test_non_json_body_is_malformed() {
        let (_server, client) =
            respond(ResponseTemplate::new(200).set_body_string("<html>oops</html>")).await;

        let err = client.generate("k", "gemini-2.5-flash", "p").await.unwrap_err();
        assert!(matches!(err, UpstreamError::Malformed(_)));
    }

    #[tokio::test]
    async fn test_non_json_multibyte_body_is_malformed() {
        let body = format!("{}あいう", "x".repeat(199));
        let (_server, client) = respond(ResponseTemplate::new(200).set_body_string(body)).await;

        let err = client.generate("k", "gemini-2.5-flash", "p").await.unwrap_err();
        match err {
            UpstreamError::Malformed(message) => assert!(message.ends_with("xあ)")),
            other => panic!("expected Malformed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_per_minute_exhaustion_is_not_daily_quota() {
        let (_server, client) = respond(ResponseTemplate::new(429).set_body_json(error_body(
            429,
            "Resource has been exhausted (e.g. check quota).",
        )))
        .await;

        let err = client.generate("k", "gemini-2.5-flash", "p").await.unwrap_err();
        assert!(!err.is_quota());
        assert!(matches!(err, UpstreamError::RateLimited { .. }));
    }

    #[tokio::test]
    async fn test_connection_refused_is_network_error() {
        let client = GeminiClient::new(Some("http://127.0.0.1:1".to_string()));
        let err = client.generate("k", "gemini-2.5-flash", "p").await.unwrap_err();
        assert!(matches!(err, UpstreamError::Network(_)));
        assert!(!err.to_string().contains("key=k"));
    }

    #[test]
    fn test_classify_error() {
        assert!(matches!(
            classify_error(403, &error_body(403, "Permission denied on resource").to_string()),
            UpstreamError::PermissionDenied(_)
        ));
        assert!(matches!(
            classify_error(
                404,
                &error_body(404, "models/x is not found for API version v1beta").to_string()
            ),
            UpstreamError::ModelNotFound(_)
        ));
        assert!(matches!(
            classify_error(
                400,
                &error_body(400, "User location is not supported for the API use.").to_string()
            ),
            UpstreamError::RegionUnsupported(_)
        ));
        assert_eq!(
            classify_error(503, "upstream connect error"),
            UpstreamError::Server {
                status: 503,
                message: "HTTP error! status: 503".into()
            }
        );
    }

    #[test]
    fn test_per_day_quota_violation_is_quota() {
        let body = json!({
            "error": {
                "code": 429,
                "message": "Resource has been exhausted.",
                "details": [{
                    "@type": "type.googleapis.com/google.rpc.QuotaFailure",
                    "violations": [{
                        "quotaMetric": "generativelanguage.googleapis.com/generate_content_free_tier_requests",
                        "quotaId": "GenerateRequestsPerDayPerProjectPerModel-FreeTier"
                    }]
                }]
            }
        });
        assert!(classify_error(429, &body.to_string()).is_quota());
    }

    #[test]
    fn test_retry_hint_from_message() {
        assert_eq!(retry_after_secs("Please retry in 12.2s.", &[]), Some(13));
        assert_eq!(retry_after_secs("slow down", &[]), None);
        assert_eq!(parse_duration_secs("2s"), Some(2));
    }
}
