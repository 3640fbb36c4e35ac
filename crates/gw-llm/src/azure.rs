use async_trait::async_trait;
use gw_core::ProviderRequest;
use gw_error::{GatewayError, Result};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::Client;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{instrument, warn};

use crate::completion::{ChatCompletion, ChatCompletionChunk};
use crate::sse::{SseLineScanner, DONE_SENTINEL};
use crate::{CompletionClient, CompletionStream};

/// 当前支持的最低 Azure OpenAI preview API 版本
pub const MINIMUM_SUPPORTED_API_VERSION: &str = "2024-02-15-preview";

const USER_AGENT: &str = "RagGateway/AzureOpenAI/1.0.0";
const APIM_REQUEST_ID_HEADER: &str = "apim-request-id";

#[derive(Debug, Clone)]
pub struct AzureOpenAiConfig {
    pub endpoint: Option<String>, // full endpoint, e.g. https://my.openai.azure.com
    pub resource: Option<String>, // resource name, used when endpoint is absent
    pub deployment: String,       // chat model deployment name
    pub api_key: Option<String>,
    pub ad_token: Option<String>, // pre-acquired AD bearer token when no key is configured
    pub api_version: String,
}

#[derive(Clone)]
pub struct AzureOpenAiClient {
    http: Client,
    chat_url: String,
}

impl AzureOpenAiClient {
    pub fn new(cfg: AzureOpenAiConfig) -> Result<Self> {
        // preview 版本串按日期排序，字典序比较即可
        if cfg.api_version.as_str() < MINIMUM_SUPPORTED_API_VERSION {
            return Err(GatewayError::Configuration {
                key: "azure_openai_api_version".to_string(),
                reason: format!(
                    "the minimum supported Azure OpenAI preview API version is '{}'",
                    MINIMUM_SUPPORTED_API_VERSION
                ),
            });
        }

        let endpoint = match (&cfg.endpoint, &cfg.resource) {
            (Some(endpoint), _) => endpoint.trim_end_matches('/').to_string(),
            (None, Some(resource)) => format!("https://{}.openai.azure.com", resource),
            (None, None) => {
                return Err(GatewayError::Configuration {
                    key: "azure_openai_endpoint".to_string(),
                    reason: "endpoint or resource name is required".to_string(),
                })
            }
        };

        if cfg.deployment.is_empty() {
            return Err(GatewayError::Configuration {
                key: "azure_openai_model".to_string(),
                reason: "deployment name is required".to_string(),
            });
        }

        let mut headers = HeaderMap::new();
        headers.insert("x-ms-useragent", HeaderValue::from_static(USER_AGENT));
        match (&cfg.api_key, &cfg.ad_token) {
            (Some(key), _) => {
                headers.insert(
                    "api-key",
                    HeaderValue::from_str(key).map_err(|e| GatewayError::Configuration {
                        key: "azure_openai_key".to_string(),
                        reason: e.to_string(),
                    })?,
                );
            }
            (None, Some(token)) => {
                headers.insert(
                    "Authorization",
                    HeaderValue::from_str(&format!("Bearer {}", token)).map_err(|e| {
                        GatewayError::Configuration {
                            key: "azure_openai_ad_token".to_string(),
                            reason: e.to_string(),
                        }
                    })?,
                );
            }
            (None, None) => {
                return Err(GatewayError::Configuration {
                    key: "azure_openai_key".to_string(),
                    reason: "neither an api key nor an AD token is configured".to_string(),
                })
            }
        }

        let http = Client::builder()
            .default_headers(headers)
            .build()
            .map_err(GatewayError::from)?;

        Ok(Self {
            http,
            chat_url: format!(
                "{}/openai/deployments/{}/chat/completions?api-version={}",
                endpoint, cfg.deployment, cfg.api_version
            ),
        })
    }

    /// ProviderRequest 序列化成提供方请求体。extra_body 内容提升到顶层
    /// data_sources 字段，stream 标志以调用路径为准。
    fn wire_body(request: &ProviderRequest, stream: bool) -> Result<serde_json::Value> {
        let mut body = serde_json::to_value(request)?;
        let object = body
            .as_object_mut()
            .ok_or_else(|| GatewayError::Serialization {
                format: "json".to_string(),
                message: "provider request did not serialize to an object".to_string(),
            })?;
        object.insert("stream".to_string(), serde_json::Value::Bool(stream));
        if let Some(extra) = object.remove("extra_body") {
            if let Some(sources) = extra.get("data_sources") {
                object.insert("data_sources".to_string(), sources.clone());
            }
        }
        Ok(body)
    }

    fn apim_request_id(response: &reqwest::Response) -> Option<String> {
        response
            .headers()
            .get(APIM_REQUEST_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    }
}

#[async_trait]
impl CompletionClient for AzureOpenAiClient {
    #[instrument(skip(self, request))]
    async fn complete(
        &self,
        request: &ProviderRequest,
    ) -> Result<(ChatCompletion, Option<String>)> {
        let body = Self::wire_body(request, false)?;
        let response = self.http.post(&self.chat_url).json(&body).send().await?;
        let apim_request_id = Self::apim_request_id(&response);

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(GatewayError::Provider {
                provider: "azure_openai".to_string(),
                message: format!("status={} body={}", status, text),
            });
        }

        let completion: ChatCompletion = response.json().await?;
        Ok((completion, apim_request_id))
    }

    #[instrument(skip(self, request))]
    async fn stream(
        &self,
        request: &ProviderRequest,
    ) -> Result<(CompletionStream, Option<String>)> {
        use futures::StreamExt;

        let body = Self::wire_body(request, true)?;
        let response = self.http.post(&self.chat_url).json(&body).send().await?;
        let apim_request_id = Self::apim_request_id(&response);

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(GatewayError::Provider {
                provider: "azure_openai".to_string(),
                message: format!("status={} body={}", status, text),
            });
        }

        let (tx, rx) = tokio::sync::mpsc::channel::<Result<ChatCompletionChunk>>(1);
        tokio::spawn(async move {
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
                            // 接收端掉线即停止拉取，释放底层连接
                            if tx.send(Ok(chunk)).await.is_err() {
                                return;
                            }
                        }
                        Err(e) => {
                            warn!(error = %e, "skipping undecodable completion chunk");
                        }
                    }
                }
            }
        });

        Ok((ReceiverStream::new(rx), apim_request_id))
    }
}
