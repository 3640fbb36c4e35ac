pub mod azure;
pub mod bedrock;
pub mod completion;
pub mod kendra;
pub mod promptflow;
mod sse;

pub use azure::{AzureOpenAiClient, AzureOpenAiConfig};
pub use bedrock::{BedrockChatClient, BedrockChatConfig};
pub use completion::{
    ChatCompletion, ChatCompletionChunk, ChunkChoice, ChunkDelta, CompletionChoice,
    CompletionMessage, MessageContext,
};
pub use kendra::{KendraConfig, KendraRetriever};
pub use promptflow::{PromptflowClient, PromptflowConfig};

use async_trait::async_trait;
use gw_core::{ProviderRequest, RetrievedDocument, ScopingContext};
use tokio_stream::wrappers::ReceiverStream;

pub use gw_error::{GatewayError, Result};

/// 模型提供方的流式分片序列。单次消费，顺序即提供方产出顺序。
pub type CompletionStream = ReceiverStream<Result<ChatCompletionChunk>>;

/// 逐 token 文本流
pub type TokenStream = ReceiverStream<Result<String>>;

/// 聊天补全提供方（直连模型路径）。
/// 第二个返回值是提供方请求标识（apim-request-id 响应头）。
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, request: &ProviderRequest)
        -> Result<(ChatCompletion, Option<String>)>;

    async fn stream(&self, request: &ProviderRequest)
        -> Result<(CompletionStream, Option<String>)>;
}

/// 文档检索提供方
#[async_trait]
pub trait DocumentRetriever: Send + Sync {
    async fn retrieve(
        &self,
        query: &str,
        scoping: &ScopingContext,
    ) -> Result<Vec<RetrievedDocument>>;
}

/// 逐 token 产出回复的聊天模型
#[async_trait]
pub trait TokenStreamModel: Send + Sync {
    async fn stream_reply(&self, prompt: &str) -> Result<TokenStream>;
}
