use std::sync::Arc;

use futures::StreamExt;
use gw_core::{
    CanonicalResponse, CitationDocument, CitationPayload, ConversationRequest, Role,
    ScopingContext,
};
use gw_error::{GatewayError, Result};
use gw_llm::{DocumentRetriever, TokenStreamModel};
use serde_json::Value;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, instrument};

const NO_CITATIONS_MESSAGE: &str = "No relevant citations found.";

/// Kendra/Bedrock 配对的检索增强应答器。
/// 产出约定与直连路径一致：先一个 tool 角色的引用分片，
/// 再按到达顺序逐 token 产出 assistant 分片。
pub struct RetrievalResponder {
    retriever: Arc<dyn DocumentRetriever>,
    chat: Arc<dyn TokenStreamModel>,
}

impl RetrievalResponder {
    pub fn new(retriever: Arc<dyn DocumentRetriever>, chat: Arc<dyn TokenStreamModel>) -> Self {
        Self { retriever, chat }
    }

    #[instrument(skip(self, request))]
    pub async fn respond(
        &self,
        request: ConversationRequest,
        scoping: ScopingContext,
    ) -> Result<ReceiverStream<Result<CanonicalResponse>>> {
        let history_metadata = request
            .history_metadata
            .unwrap_or_else(|| Value::Object(Default::default()));

        let query = request
            .messages
            .first()
            .map(|message| message.content.clone())
            .filter(|content| !content.is_empty())
            .ok_or_else(|| GatewayError::Caller {
                reason: "messages must contain at least one non-empty entry".to_string(),
            })?;

        let results = self.retriever.retrieve(&query, &scoping).await?;
        let citable: Vec<CitationDocument> = results
            .into_iter()
            .filter(|document| document.confidence.is_citable())
            .map(CitationDocument::from)
            .collect();
        debug!(citable = citable.len(), "retrieval results above threshold");

        let (prompt, payload) = if citable.is_empty() {
            (
                format!(
                    "Question: {}\nIt seems like your query does not relate to the specific application context. Please provide a query related to the application.",
                    query
                ),
                CitationPayload {
                    citations: Vec::new(),
                    user_query: Some(query.clone()),
                    message: Some(NO_CITATIONS_MESSAGE.to_string()),
                },
            )
        } else {
            let context = format_context(&citable);
            (
                format!("Context: {}\nQuestion: {}", context, query),
                CitationPayload {
                    citations: citable,
                    user_query: Some(query.clone()),
                    message: None,
                },
            )
        };

        let mut tokens = self.chat.stream_reply(&prompt).await?;

        // 容量 1：除在途分片外不缓冲
        let (tx, rx) = tokio::sync::mpsc::channel(1);
        tokio::spawn(async move {
            let citations_chunk = match serde_json::to_string(&payload) {
                Ok(serialized) => CanonicalResponse {
                    role: Role::Tool,
                    content: serialized,
                    citations: None,
                    history_metadata: history_metadata.clone(),
                    apim_request_id: None,
                },
                Err(e) => {
                    let _ = tx.send(Err(GatewayError::from(e))).await;
                    return;
                }
            };
            if tx.send(Ok(citations_chunk)).await.is_err() {
                return;
            }
            tokio::task::yield_now().await;

            while let Some(token) = tokens.next().await {
                let chunk = token.map(|content| CanonicalResponse {
                    role: Role::Assistant,
                    content,
                    citations: None,
                    history_metadata: history_metadata.clone(),
                    apim_request_id: None,
                });
                // 接收端掉线即停止拉取模型流
                if tx.send(chunk).await.is_err() {
                    return;
                }
                // 逐片让出调度权，慢会话不能饿死同进程的其他会话
                tokio::task::yield_now().await;
            }
        });

        Ok(ReceiverStream::new(rx))
    }
}

/// 引用记录拼为上下文串。每条记录走结构化序列化，不做手工拼接。
fn format_context(documents: &[CitationDocument]) -> String {
    documents
        .iter()
        .filter_map(|document| serde_json::to_string(document).ok())
        .collect::<Vec<_>>()
        .join(", ")
}
