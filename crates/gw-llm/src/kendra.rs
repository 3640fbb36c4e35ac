use async_trait::async_trait;
use gw_core::{ConfidenceTier, RetrievedDocument, ScopingContext};
use gw_error::{GatewayError, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::DocumentRetriever;

const RETRIEVE_TARGET: &str = "AWSKendraFrontendService.Retrieve";

#[derive(Debug, Clone)]
pub struct KendraConfig {
    /// 区域端点或部署侧做凭据签名的前置代理
    pub endpoint: String,
    pub index_id: String,
    /// 前置代理要求的 Authorization 值；直连时签名由部署环境完成
    pub authorization: Option<String>,
    pub top_k: u32,
}

pub struct KendraRetriever {
    http: Client,
    cfg: KendraConfig,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct RetrieveRequest<'a> {
    query_text: &'a str,
    index_id: &'a str,
    page_size: u32,
    attribute_filter: AttributeFilter,
    requested_document_attributes: [&'a str; 1],
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct AttributeFilter {
    and_all_filters: Vec<EqualsFilter>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct EqualsFilter {
    equals_to: AttributeValue,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct AttributeValue {
    key: &'static str,
    value: LongValue,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct LongValue {
    long_value: i64,
}

#[derive(Deserialize)]
struct RetrieveResponse {
    #[serde(rename = "ResultItems", default)]
    result_items: Vec<RetrieveResultItem>,
}

#[derive(Deserialize)]
struct RetrieveResultItem {
    #[serde(rename = "Id", default)]
    id: Option<String>,
    #[serde(rename = "Content", default)]
    content: Option<String>,
    #[serde(rename = "DocumentTitle", default)]
    document_title: Option<String>,
    #[serde(rename = "DocumentURI", default)]
    document_uri: Option<String>,
    #[serde(rename = "DocumentId", default)]
    document_id: Option<String>,
    #[serde(rename = "ScoreAttributes", default)]
    score_attributes: Option<ScoreAttributes>,
}

#[derive(Deserialize)]
struct ScoreAttributes {
    #[serde(rename = "ScoreConfidence")]
    score_confidence: ConfidenceTier,
}

impl KendraRetriever {
    pub fn new(cfg: KendraConfig) -> Self {
        Self {
            http: Client::new(),
            cfg,
        }
    }

    fn scoping_filter(scoping: &ScopingContext) -> AttributeFilter {
        AttributeFilter {
            and_all_filters: vec![
                EqualsFilter {
                    equals_to: AttributeValue {
                        key: "ApplicationID",
                        value: LongValue {
                            long_value: scoping.application_id,
                        },
                    },
                },
                EqualsFilter {
                    equals_to: AttributeValue {
                        key: "RunID",
                        value: LongValue {
                            long_value: scoping.run_id,
                        },
                    },
                },
            ],
        }
    }
}

#[async_trait]
impl DocumentRetriever for KendraRetriever {
    #[instrument(skip(self, query))]
    async fn retrieve(
        &self,
        query: &str,
        scoping: &ScopingContext,
    ) -> Result<Vec<RetrievedDocument>> {
        let body = RetrieveRequest {
            query_text: query,
            index_id: &self.cfg.index_id,
            page_size: self.cfg.top_k,
            attribute_filter: Self::scoping_filter(scoping),
            requested_document_attributes: ["ScoreAttributes"],
        };

        let mut request = self
            .http
            .post(&self.cfg.endpoint)
            .header("X-Amz-Target", RETRIEVE_TARGET)
            .header("Content-Type", "application/x-amz-json-1.1")
            .json(&body);
        if let Some(authorization) = &self.cfg.authorization {
            request = request.header("Authorization", authorization);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(GatewayError::Provider {
                provider: "kendra".to_string(),
                message: format!("status={} body={}", status, text),
            });
        }

        let data: RetrieveResponse = response.json().await?;
        Ok(data
            .result_items
            .into_iter()
            .map(|item| RetrievedDocument {
                content: item.content.unwrap_or_default(),
                title: item.document_title,
                url: item.document_uri,
                filepath: item.document_id,
                chunk_id: item.id,
                confidence: item
                    .score_attributes
                    .map(|score| score.score_confidence)
                    .unwrap_or(ConfidenceTier::NotAvailable),
            })
            .collect())
    }
}
