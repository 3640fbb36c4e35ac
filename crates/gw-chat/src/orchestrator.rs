use std::sync::Arc;

use futures::StreamExt;
use gw_core::{CanonicalResponse, ChatMessage, ConversationRequest, Role, ScopingContext};
use gw_error::Result;
use gw_llm::{CompletionClient, CompletionStream, PromptflowClient};
use serde_json::Value;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, instrument};

use crate::assemble::{assemble, ModelParams};
use crate::datasource::{GroupFilterGenerator, SearchConfig};
use crate::normalize::{normalize_chunk, normalize_completion, normalize_promptflow};
use crate::redact::redact;

/// 提供方路由。启动时根据配置决定一次，请求处理中只做标签分发。
pub enum ProviderRoute {
    Promptflow(Arc<PromptflowClient>),
    Direct(Arc<dyn CompletionClient>),
}

/// 单次会话的产出：完整响应，或按提供方顺序产出的分片流
pub enum ConversationOutcome {
    Complete(CanonicalResponse),
    Stream(ReceiverStream<Result<CanonicalResponse>>),
}

impl std::fmt::Debug for ConversationOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConversationOutcome::Complete(_) => f.write_str("ConversationOutcome::Complete"),
            ConversationOutcome::Stream(_) => f.write_str("ConversationOutcome::Stream"),
        }
    }
}

/// 会话编排器：过滤 → 装配 → 脱敏记日志 → 分发 → 整形。
/// 所有协作方错误在这一层之上（HTTP handler）统一转错误信封，不做重试。
pub struct ConversationOrchestrator {
    route: ProviderRoute,
    params: ModelParams,
    search: Option<SearchConfig>,
    groups: Arc<dyn GroupFilterGenerator>,
}

/// tool 角色消息是合成的引用载体，不允许进入模型输入
pub fn filter_conversation_messages(messages: &[ChatMessage]) -> Vec<ChatMessage> {
    messages
        .iter()
        .filter(|message| message.role != Role::Tool)
        .cloned()
        .collect()
}

impl ConversationOrchestrator {
    pub fn new(
        route: ProviderRoute,
        params: ModelParams,
        search: Option<SearchConfig>,
        groups: Arc<dyn GroupFilterGenerator>,
    ) -> Self {
        Self {
            route,
            params,
            search,
            groups,
        }
    }

    fn use_grounding(&self) -> bool {
        self.search.is_some()
    }

    #[instrument(skip(self, request))]
    pub async fn handle(
        &self,
        request: ConversationRequest,
        scoping: ScopingContext,
    ) -> Result<ConversationOutcome> {
        let history_metadata = request
            .history_metadata
            .unwrap_or_else(|| Value::Object(Default::default()));
        let messages = filter_conversation_messages(&request.messages);

        match &self.route {
            // promptflow 只有完整返回的形态
            ProviderRoute::Promptflow(promptflow) => {
                let reply = promptflow.call(&messages).await?;
                let response = normalize_promptflow(
                    &reply,
                    &history_metadata,
                    promptflow.response_field(),
                    promptflow.citations_field(),
                )?;
                Ok(ConversationOutcome::Complete(response))
            }
            ProviderRoute::Direct(client) => {
                let provider_request = assemble(
                    &messages,
                    &scoping,
                    self.use_grounding(),
                    &self.params,
                    self.search.as_ref(),
                    self.groups.as_ref(),
                )
                .await?;

                // 诊断输出用脱敏副本，失败时直接跳过记录
                if let Some(redacted) = redact(&provider_request) {
                    debug!(request_body = %redacted, "dispatching provider request");
                }

                if self.params.stream {
                    let (chunks, apim_request_id) = client.stream(&provider_request).await?;
                    Ok(ConversationOutcome::Stream(bridge_stream(
                        chunks,
                        history_metadata,
                        apim_request_id,
                    )))
                } else {
                    let (completion, apim_request_id) =
                        client.complete(&provider_request).await?;
                    Ok(ConversationOutcome::Complete(normalize_completion(
                        &completion,
                        &history_metadata,
                        apim_request_id.as_deref(),
                    )))
                }
            }
        }
    }
}

/// 提供方分片流整形为规范化分片流。每片之间显式让出调度权，
/// 避免单个慢会话独占执行线程；接收端掉线即停止拉取上游。
/// 通道容量为 1：除在途分片外不做缓冲，顺序即提供方产出顺序。
fn bridge_stream(
    mut chunks: CompletionStream,
    history_metadata: Value,
    apim_request_id: Option<String>,
) -> ReceiverStream<Result<CanonicalResponse>> {
    let (tx, rx) = tokio::sync::mpsc::channel(1);
    tokio::spawn(async move {
        while let Some(item) = chunks.next().await {
            let normalized = item.map(|chunk| {
                normalize_chunk(&chunk, &history_metadata, apim_request_id.as_deref())
            });
            if tx.send(normalized).await.is_err() {
                return;
            }
            tokio::task::yield_now().await;
        }
    });
    ReceiverStream::new(rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assemble::tests::model_params;
    use async_trait::async_trait;
    use gw_error::GatewayError;
    use gw_llm::{ChatCompletion, ChatCompletionChunk, ChunkChoice, ChunkDelta};
    use gw_core::ProviderRequest;

    struct ScriptedCompletionClient {
        chunks: Vec<&'static str>,
    }

    #[async_trait]
    impl CompletionClient for ScriptedCompletionClient {
        async fn complete(
            &self,
            _request: &ProviderRequest,
        ) -> Result<(ChatCompletion, Option<String>)> {
            Err(GatewayError::Provider {
                provider: "scripted".into(),
                message: "complete not scripted".into(),
            })
        }

        async fn stream(
            &self,
            _request: &ProviderRequest,
        ) -> Result<(CompletionStream, Option<String>)> {
            let (tx, rx) = tokio::sync::mpsc::channel(16);
            let chunks = self.chunks.clone();
            tokio::spawn(async move {
                for content in chunks {
                    let chunk = ChatCompletionChunk {
                        id: None,
                        model: None,
                        created: None,
                        choices: vec![ChunkChoice {
                            delta: ChunkDelta {
                                role: Some("assistant".into()),
                                content: Some(content.to_string()),
                                context: None,
                            },
                            finish_reason: None,
                        }],
                    };
                    if tx.send(Ok(chunk)).await.is_err() {
                        return;
                    }
                }
            });
            Ok((
                tokio_stream::wrappers::ReceiverStream::new(rx),
                Some("apim-7".to_string()),
            ))
        }
    }

    struct FailingClient;

    #[async_trait]
    impl CompletionClient for FailingClient {
        async fn complete(
            &self,
            _request: &ProviderRequest,
        ) -> Result<(ChatCompletion, Option<String>)> {
            Err(GatewayError::Provider {
                provider: "azure_openai".into(),
                message: "quota exceeded".into(),
            })
        }

        async fn stream(
            &self,
            _request: &ProviderRequest,
        ) -> Result<(CompletionStream, Option<String>)> {
            Err(GatewayError::Provider {
                provider: "azure_openai".into(),
                message: "quota exceeded".into(),
            })
        }
    }

    struct NoGroups;

    #[async_trait]
    impl GroupFilterGenerator for NoGroups {
        async fn generate(&self, _user_access_token: &str) -> Result<String> {
            Ok(String::new())
        }
    }

    fn request(messages: Vec<ChatMessage>) -> ConversationRequest {
        ConversationRequest {
            messages,
            history_metadata: Some(serde_json::json!({"conversation_id": "c-1"})),
        }
    }

    fn scoping() -> ScopingContext {
        ScopingContext {
            application_id: 1,
            run_id: 2,
            user_access_token: None,
        }
    }

    fn user_message(content: &str) -> ChatMessage {
        ChatMessage {
            role: Role::User,
            content: content.into(),
            id: None,
        }
    }

    #[tokio::test]
    async fn test_streaming_preserves_order_and_metadata() {
        let params = ModelParams {
            stream: true,
            ..model_params()
        };
        let orchestrator = ConversationOrchestrator::new(
            ProviderRoute::Direct(Arc::new(ScriptedCompletionClient {
                chunks: vec!["A", "B", "C"],
            })),
            params,
            None,
            Arc::new(NoGroups),
        );

        let outcome = orchestrator
            .handle(request(vec![user_message("q")]), scoping())
            .await
            .unwrap();
        let stream = match outcome {
            ConversationOutcome::Stream(stream) => stream,
            _ => panic!("expected streaming outcome"),
        };
        let collected: Vec<CanonicalResponse> = stream
            .collect::<Vec<Result<CanonicalResponse>>>()
            .await
            .into_iter()
            .map(|item| item.unwrap())
            .collect();

        let contents: Vec<&str> = collected.iter().map(|c| c.content.as_str()).collect();
        assert_eq!(contents, vec!["A", "B", "C"]);
        for chunk in &collected {
            assert_eq!(chunk.apim_request_id.as_deref(), Some("apim-7"));
            assert_eq!(chunk.history_metadata["conversation_id"], "c-1");
        }
    }

    #[tokio::test]
    async fn test_provider_failure_surfaces_once() {
        let orchestrator = ConversationOrchestrator::new(
            ProviderRoute::Direct(Arc::new(FailingClient)),
            model_params(),
            None,
            Arc::new(NoGroups),
        );

        let err = orchestrator
            .handle(request(vec![user_message("q")]), scoping())
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 500);
    }

    #[test]
    fn test_tool_messages_stripped() {
        let filtered = filter_conversation_messages(&[
            user_message("q"),
            ChatMessage {
                role: Role::Tool,
                content: "{}".into(),
                id: None,
            },
        ]);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].role, Role::User);
    }
}
