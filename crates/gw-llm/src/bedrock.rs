use async_trait::async_trait;
use gw_error::{GatewayError, Result};
use reqwest::Client;
use serde::Serialize;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{instrument, warn};

use crate::completion::ChatCompletionChunk;
use crate::sse::{SseLineScanner, DONE_SENTINEL};
use crate::{TokenStream, TokenStreamModel};

/// Bedrock 聊天模型，经由 OpenAI 兼容的 runtime 端点访问。
/// 原生 SigV4 签名由部署环境的凭据前置完成，这里不重复实现。
#[derive(Debug, Clone)]
pub struct BedrockChatConfig {
    pub endpoint: String, // e.g. https://bedrock-runtime.<region>.amazonaws.com/v1
    pub api_key: Option<String>,
    pub model_id: String,
    pub system_message: Option<String>,
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
}

pub struct BedrockChatClient {
    http: Client,
    cfg: BedrockChatConfig,
    chat_url: String,
}

#[derive(Serialize)]
struct StreamChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct StreamChatRequest<'a> {
    model: &'a str,
    messages: Vec<StreamChatMessage<'a>>,
    temperature: f32,
    top_p: f32,
    max_tokens: u32,
    stream: bool,
}

impl BedrockChatClient {
    pub fn new(cfg: BedrockChatConfig) -> Self {
        let chat_url = format!(
            "{}/chat/completions",
            cfg.endpoint.trim_end_matches('/')
        );
        Self {
            http: Client::new(),
            cfg,
            chat_url,
        }
    }
}

#[async_trait]
impl TokenStreamModel for BedrockChatClient {
    #[instrument(skip(self, prompt))]
    async fn stream_reply(&self, prompt: &str) -> Result<TokenStream> {
        let mut messages = Vec::new();
        if let Some(system) = self.cfg.system_message.as_deref() {
            messages.push(StreamChatMessage {
                role: "system",
                content: system,
            });
        }
        messages.push(StreamChatMessage {
            role: "user",
            content: prompt,
        });

        let body = StreamChatRequest {
            model: &self.cfg.model_id,
            messages,
            temperature: self.cfg.temperature,
            top_p: self.cfg.top_p,
            max_tokens: self.cfg.max_tokens,
            stream: true,
        };

        let mut request = self.http.post(&self.chat_url).json(&body);
        if let Some(key) = &self.cfg.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(GatewayError::Provider {
                provider: "bedrock".to_string(),
                message: format!("status={} body={}", status, text),
            });
        }

        let (tx, rx) = tokio::sync::mpsc::channel::<Result<String>>(1);
        tokio::spawn(async move {
            use futures::StreamExt;

            let mut scanner = SseLineScanner::new();
            let mut bytes = response.bytes_stream();
            while let Some(piece) = bytes.next().await {
                let piece = match piece {
                    Ok(piece) => piece,
                    Err(e) => {
                        let _ = tx.send(Err(GatewayError::from(e))).await;
                        return;
                    }
                };
                for payload in scanner.push(&piece) {
                    if payload == DONE_SENTINEL {
                        return;
                    }
                    match serde_json::from_str::<ChatCompletionChunk>(&payload) {
                        Ok(chunk) => {
                            if let Some(token) = chunk.delta_content() {
                                if tx.send(Ok(token.to_string())).await.is_err() {
                                    // 接收端掉线即停止拉取
                                    return;
                                }
                            }
                        }
                        Err(e) => {
                            warn!(error = %e, "skipping undecodable token chunk");
                        }
                    }
                }
            }
        });

        Ok(ReceiverStream::new(rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_url_from_endpoint() {
        let client = BedrockChatClient::new(BedrockChatConfig {
            endpoint: "https://bedrock-runtime.us-east-1.amazonaws.com/v1/".into(),
            api_key: None,
            model_id: "anthropic.claude-3-sonnet".into(),
            system_message: None,
            temperature: 0.0,
            top_p: 1.0,
            max_tokens: 1000,
        });
        assert_eq!(
            client.chat_url,
            "https://bedrock-runtime.us-east-1.amazonaws.com/v1/chat/completions"
        );
    }

    #[test]
    fn test_request_body_includes_system_message_first() {
        let body = StreamChatRequest {
            model: "m",
            messages: vec![
                StreamChatMessage {
                    role: "system",
                    content: "sys",
                },
                StreamChatMessage {
                    role: "user",
                    content: "q",
                },
            ],
            temperature: 0.2,
            top_p: 0.9,
            max_tokens: 256,
            stream: true,
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["messages"][0]["role"], "system");
        assert_eq!(value["stream"], true);
    }
}
