//! Upstream client trait — the abstraction over the remote model API.

use async_trait::async_trait;

use crate::error::UpstreamError;

/// Upstream client trait: one text-in, text-out generation call.
///
/// # Example
///
/// ```rust,ignore
/// struct Echo;
///
/// #[async_trait]
/// impl UpstreamClient for Echo {
///     fn name(&self) -> &str { "echo" }
///
///     async fn generate(&self, _key: &str, _model: &str, prompt: &str)
///         -> Result<String, UpstreamError> {
///         Ok(prompt.to_string())
///     }
/// }
/// ```
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    /// Client name for logs (e.g. "gemini").
    fn name(&self) -> &str;

    /// Send `prompt` to `model` using `api_key` and return the first text
    /// part of the response.
    async fn generate(
        &self,
        api_key: &str,
        model: &str,
        prompt: &str,
    ) -> std::result::Result<String, UpstreamError>;
}
