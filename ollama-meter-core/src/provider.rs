use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::CoreResult;
use crate::model::{ChatRequest, ChatResponse, GenerateRequest, GenerateResponse};

/// Boxed stream of response fragments, in the order the model produced them.
pub type FragmentStream<T> = BoxStream<'static, CoreResult<T>>;

/// What a chat/generate call hands back: one aggregate response when the
/// request had `stream: false`, a lazy fragment stream when it had `stream: true`.
pub enum Completion<T> {
    Single(T),
    Stream(FragmentStream<T>),
}

impl<T> Completion<T> {
    pub fn is_stream(&self) -> bool {
        matches!(self, Self::Stream(_))
    }

    /// The aggregate response, or `None` for a stream.
    pub fn into_single(self) -> Option<T> {
        match self {
            Self::Single(r) => Some(r),
            Self::Stream(_) => None,
        }
    }

    /// The fragment stream, or `None` for an aggregate response.
    pub fn into_stream(self) -> Option<FragmentStream<T>> {
        match self {
            Self::Single(_) => None,
            Self::Stream(s) => Some(s),
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Completion<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Single(r) => f.debug_tuple("Single").field(r).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// The local model server's chat/generate surface.
#[async_trait]
pub trait OllamaApi: Send + Sync {
    fn name(&self) -> &str;
    async fn chat(&self, req: ChatRequest) -> CoreResult<Completion<ChatResponse>>;
    async fn generate(&self, req: GenerateRequest) -> CoreResult<Completion<GenerateResponse>>;
}
