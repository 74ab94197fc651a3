//! Provider trait definition.

use crate::error::ProviderError;
use crate::types::{ModelInfo, Request, Response, StopReason, StreamEvent, Usage};
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;

/// Trait for LLM provider implementations.
///
/// Providers handle communication with an LLM service and normalize the
/// output into a common stream of [`StreamEvent`]s.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provider name (e.g., "echo", "anthropic").
    fn name(&self) -> &str;

    /// List of models supported by this provider.
    fn models(&self) -> Vec<ModelInfo>;

    /// Send a streaming request to the provider.
    ///
    /// Returns a stream of `StreamEvent`s as the model generates its response.
    async fn stream(
        &self,
        request: Request,
    ) -> Result<BoxStream<'static, Result<StreamEvent, ProviderError>>, ProviderError>;

    /// Send a non-streaming request to the provider.
    ///
    /// Collects the full response before returning.
    async fn complete(&self, request: Request) -> Result<Response, ProviderError> {
        let mut stream = self.stream(request).await?;
        let mut text = String::new();
        let mut usage = Usage::default();
        let mut stop_reason = StopReason::EndTurn;
        while let Some(event) = stream.next().await {
            match event? {
                StreamEvent::TextDelta { delta } => text.push_str(&delta),
                StreamEvent::Usage { input, output } => {
                    usage = Usage {
                        input_tokens: input,
                        output_tokens: output,
                    }
                }
                StreamEvent::Done { reason } => {
                    stop_reason = reason;
                    break;
                }
                StreamEvent::Error(message) => return Err(ProviderError::StreamError(message)),
            }
        }
        Ok(Response {
            text,
            stop_reason,
            usage,
        })
    }
}

// Compile-time check: Provider must be object-safe
const _: () = {
    fn _assert_object_safe(_: &dyn Provider) {}
};
