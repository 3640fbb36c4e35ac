//! 把各提供方的响应整形为统一的 CanonicalResponse。
//!
//! 约定：非流式路径的引用放在 citations 字段；流式路径的引用是一个
//! tool 角色分片，content 为结构化序列化后的引用载荷，且必然先于
//! assistant 内容分片出现。

use gw_core::{CanonicalResponse, CitationPayload, Role};
use gw_error::{GatewayError, Result};
use gw_llm::{ChatCompletion, ChatCompletionChunk, MessageContext};
use serde_json::Value;
use tracing::warn;

fn serialize_citations(context: &MessageContext) -> Option<String> {
    let payload = CitationPayload {
        citations: context.citations.clone(),
        user_query: context.intent.clone(),
        message: None,
    };
    match serde_json::to_string(&payload) {
        Ok(serialized) => Some(serialized),
        Err(e) => {
            warn!(error = %e, "failed to serialize citation payload");
            None
        }
    }
}

/// 非流式：一个完整响应对象整形为一个规范化响应
pub fn normalize_completion(
    completion: &ChatCompletion,
    history_metadata: &Value,
    apim_request_id: Option<&str>,
) -> CanonicalResponse {
    let message = completion.choices.first().map(|choice| &choice.message);
    CanonicalResponse {
        role: Role::Assistant,
        content: message
            .and_then(|message| message.content.clone())
            .unwrap_or_default(),
        citations: message
            .and_then(|message| message.context.as_ref())
            .and_then(serialize_citations),
        history_metadata: history_metadata.clone(),
        apim_request_id: apim_request_id.map(str::to_string),
    }
}

/// 流式：每个输入分片产出一个输出分片，顺序保持，元数据逐片相同
pub fn normalize_chunk(
    chunk: &ChatCompletionChunk,
    history_metadata: &Value,
    apim_request_id: Option<&str>,
) -> CanonicalResponse {
    let delta = chunk.choices.first().map(|choice| &choice.delta);

    if let Some(context) = delta.and_then(|delta| delta.context.as_ref()) {
        return CanonicalResponse {
            role: Role::Tool,
            content: serialize_citations(context).unwrap_or_default(),
            citations: None,
            history_metadata: history_metadata.clone(),
            apim_request_id: apim_request_id.map(str::to_string),
        };
    }

    CanonicalResponse {
        role: Role::Assistant,
        content: delta
            .and_then(|delta| delta.content.clone())
            .unwrap_or_default(),
        citations: None,
        history_metadata: history_metadata.clone(),
        apim_request_id: apim_request_id.map(str::to_string),
    }
}

/// promptflow：JSON 回复整形为与非流式路径相同的形状，
/// 调用方无法从响应形状上区分提供方。
pub fn normalize_promptflow(
    reply: &Value,
    history_metadata: &Value,
    response_field: &str,
    citations_field: &str,
) -> Result<CanonicalResponse> {
    let content = reply
        .get(response_field)
        .and_then(Value::as_str)
        .ok_or_else(|| GatewayError::Provider {
            provider: "promptflow".to_string(),
            message: format!("response field '{}' missing from reply", response_field),
        })?;

    let citations = reply
        .get(citations_field)
        .map(|documents| serde_json::to_string(&serde_json::json!({ "citations": documents })))
        .transpose()?;

    Ok(CanonicalResponse {
        role: Role::Assistant,
        content: content.to_string(),
        citations,
        history_metadata: history_metadata.clone(),
        apim_request_id: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use gw_core::CitationDocument;
    use gw_llm::{ChunkChoice, ChunkDelta, CompletionChoice, CompletionMessage};
    use serde_json::json;

    fn content_chunk(text: &str) -> ChatCompletionChunk {
        ChatCompletionChunk {
            id: Some("c1".into()),
            model: Some("gpt-4o".into()),
            created: Some(1),
            choices: vec![ChunkChoice {
                delta: ChunkDelta {
                    role: Some("assistant".into()),
                    content: Some(text.into()),
                    context: None,
                },
                finish_reason: None,
            }],
        }
    }

    #[test]
    fn test_stream_order_and_shared_metadata() {
        let history = json!({"conversation_id": "abc"});
        let inputs = ["A", "B", "C"];
        let outputs: Vec<CanonicalResponse> = inputs
            .iter()
            .map(|text| normalize_chunk(&content_chunk(text), &history, Some("req-1")))
            .collect();

        let contents: Vec<&str> = outputs.iter().map(|out| out.content.as_str()).collect();
        assert_eq!(contents, vec!["A", "B", "C"]);
        for out in &outputs {
            assert_eq!(out.history_metadata, history);
            assert_eq!(out.apim_request_id.as_deref(), Some("req-1"));
            assert_eq!(out.role, Role::Assistant);
        }
    }

    #[test]
    fn test_context_delta_becomes_tool_chunk() {
        let chunk = ChatCompletionChunk {
            id: None,
            model: None,
            created: None,
            choices: vec![ChunkChoice {
                delta: ChunkDelta {
                    role: Some("assistant".into()),
                    content: None,
                    context: Some(MessageContext {
                        citations: vec![CitationDocument {
                            content: "doc body".into(),
                            title: Some("t".into()),
                            url: None,
                            filepath: None,
                            chunk_id: None,
                        }],
                        intent: Some("what is x".into()),
                    }),
                },
                finish_reason: None,
            }],
        };

        let out = normalize_chunk(&chunk, &json!({}), None);
        assert_eq!(out.role, Role::Tool);
        let payload: CitationPayload = serde_json::from_str(&out.content).unwrap();
        assert_eq!(payload.citations[0].content, "doc body");
        assert_eq!(payload.user_query.as_deref(), Some("what is x"));
    }

    #[test]
    fn test_normalize_completion_carries_citations_field() {
        let completion = ChatCompletion {
            id: None,
            model: None,
            created: None,
            choices: vec![CompletionChoice {
                message: CompletionMessage {
                    role: Some("assistant".into()),
                    content: Some("answer".into()),
                    context: Some(MessageContext {
                        citations: vec![CitationDocument {
                            content: "src".into(),
                            title: None,
                            url: None,
                            filepath: None,
                            chunk_id: None,
                        }],
                        intent: None,
                    }),
                },
            }],
        };

        let out = normalize_completion(&completion, &json!({}), Some("req-2"));
        assert_eq!(out.role, Role::Assistant);
        assert_eq!(out.content, "answer");
        assert!(out.citations.as_deref().unwrap().contains("src"));
    }

    #[test]
    fn test_promptflow_reply_matches_non_streaming_shape() {
        let reply = json!({
            "reply": "pf answer",
            "documents": [{"content": "d1"}],
            "id": "m-9"
        });
        let out = normalize_promptflow(&reply, &json!({}), "reply", "documents").unwrap();
        assert_eq!(out.role, Role::Assistant);
        assert_eq!(out.content, "pf answer");
        assert!(out.citations.as_deref().unwrap().contains("d1"));

        let missing = normalize_promptflow(&json!({}), &json!({}), "reply", "documents");
        assert!(matches!(missing, Err(GatewayError::Provider { .. })));
    }
}
