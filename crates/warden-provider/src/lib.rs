//! warden-provider: LLM provider abstraction used by llm-call steps.
//!
//! Wire protocols live outside this workspace; a provider here is an opaque
//! "complete a prompt, stream tokens" capability.

mod error;
pub mod providers;
pub mod registry;
pub mod traits;
pub mod types;

pub use error::ProviderError;
pub use providers::echo::EchoProvider;
pub use registry::ProviderRegistry;
pub use traits::Provider;
pub use types::{
    ModelInfo, ProviderConfig, ProviderMessage, Request, Response, StopReason, StreamEvent, Usage,
};
