//! Offline provider that streams the last user message back word by word.
//!
//! Lets agents run end to end without network access or credentials.

use crate::error::ProviderError;
use crate::traits::Provider;
use crate::types::{ModelInfo, Request, StopReason, StreamEvent};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use tracing::debug;

pub struct EchoProvider;

#[async_trait]
impl Provider for EchoProvider {
    fn name(&self) -> &str {
        "echo"
    }

    fn models(&self) -> Vec<ModelInfo> {
        vec![ModelInfo {
            id: "echo-1".to_string(),
            name: "Echo".to_string(),
            context_window: usize::MAX,
            max_output_tokens: usize::MAX,
        }]
    }

    async fn stream(
        &self,
        request: Request,
    ) -> Result<BoxStream<'static, Result<StreamEvent, ProviderError>>, ProviderError> {
        let prompt = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map(|m| m.content.clone())
            .unwrap_or_default();

        let words: Vec<String> = prompt.split_inclusive(' ').map(str::to_string).collect();
        let (reply, stop) = match request.max_tokens {
            Some(max) if words.len() > max => (words[..max].to_vec(), StopReason::MaxTokens),
            _ => (words.clone(), StopReason::EndTurn),
        };
        debug!(model = %request.model, words = reply.len(), stop = ?stop, "echo stream");

        let mut events: Vec<Result<StreamEvent, ProviderError>> = reply
            .into_iter()
            .map(|delta| Ok(StreamEvent::TextDelta { delta }))
            .collect();
        events.push(Ok(StreamEvent::Usage {
            input: words.len(),
            output: words.len().min(request.max_tokens.unwrap_or(usize::MAX)),
        }));
        events.push(Ok(StreamEvent::Done { reason: stop }));
        Ok(stream::iter(events).boxed())
    }
}
