use std::time::Duration;

use gw_core::{ChatMessage, Role};
use gw_error::{GatewayError, Result};
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, instrument};

#[derive(Debug, Clone)]
pub struct PromptflowConfig {
    pub endpoint: String,
    pub api_key: String,
    pub response_timeout: Duration,
    pub request_field: String,   // default "query"
    pub response_field: String,  // default "reply"
    pub citations_field: String, // default "documents"
}

pub struct PromptflowClient {
    http: Client,
    cfg: PromptflowConfig,
}

impl PromptflowClient {
    pub fn new(cfg: PromptflowConfig) -> Result<Self> {
        debug!(timeout = ?cfg.response_timeout, "promptflow response timeout");
        let http = Client::builder()
            .timeout(cfg.response_timeout)
            .build()
            .map_err(GatewayError::from)?;
        Ok(Self { http, cfg })
    }

    pub fn response_field(&self) -> &str {
        &self.cfg.response_field
    }

    pub fn citations_field(&self) -> &str {
        &self.cfg.citations_field
    }

    /// 会话历史转成 promptflow 的轮次格式：
    /// user 消息开启一轮 inputs，紧随的 assistant 消息补上该轮 outputs。
    fn to_turns(&self, messages: &[ChatMessage]) -> Vec<Value> {
        let mut turns: Vec<Value> = Vec::new();
        for message in messages {
            match message.role {
                Role::User => {
                    turns.push(json!({
                        "inputs": { self.cfg.request_field.as_str(): message.content }
                    }));
                }
                Role::Assistant => {
                    if let Some(last) = turns.last_mut() {
                        last["outputs"] =
                            json!({ self.cfg.response_field.as_str(): message.content });
                    }
                }
                _ => {}
            }
        }
        turns
    }

    /// 只支持 question 与 chat_history 两个参数；需要更多参数时要扩展请求体。
    #[instrument(skip(self, messages))]
    pub async fn call(&self, messages: &[ChatMessage]) -> Result<Value> {
        let turns = self.to_turns(messages);
        let (current, history) = match turns.split_last() {
            Some(split) => split,
            None => {
                return Err(GatewayError::Caller {
                    reason: "messages must contain at least one user entry".to_string(),
                })
            }
        };
        let question = current["inputs"][self.cfg.request_field.as_str()].clone();

        let response = self
            .http
            .post(&self.cfg.endpoint)
            .bearer_auth(&self.cfg.api_key)
            .json(&json!({
                self.cfg.request_field.as_str(): question,
                "chat_history": history,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(GatewayError::Provider {
                provider: "promptflow".to_string(),
                message: format!("status={} body={}", status, text),
            });
        }

        let mut reply: Value = response.json().await?;
        // 回复带上最后一条调用方消息的 id，前端用它做对齐
        if let Some(id) = messages.last().and_then(|message| message.id.clone()) {
            reply["id"] = Value::String(id);
        }
        Ok(reply)
    }
}
