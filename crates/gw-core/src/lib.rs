use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 会话消息角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// 前端与网关之间的规范化消息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

/// 单次请求的租户定位上下文
#[derive(Debug, Clone)]
pub struct ScopingContext {
    pub application_id: i64,
    pub run_id: i64,
    pub user_access_token: Option<String>,
}

/// 调用方请求体
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationRequest {
    pub messages: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history_metadata: Option<Value>,
}

/// 附加到模型请求上的检索数据源描述
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "parameters")]
pub enum DataSourceDescriptor {
    #[serde(rename = "azure_search")]
    AzureSearch(AzureSearchParameters),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AzureSearchParameters {
    pub endpoint: String,
    pub authentication: SearchAuthentication,
    pub index_name: String,
    pub fields_mapping: FieldsMapping,
    pub in_scope: bool,
    pub top_n_documents: u32,
    pub query_type: String,
    pub semantic_configuration: String,
    pub role_information: String,
    pub filter: Option<String>,
    pub strictness: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_dependency: Option<EmbeddingDependency>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SearchAuthentication {
    #[serde(rename = "api_key")]
    ApiKey { api_key: String },
    // key omitted on purpose: the model provider's own identity is trusted by the search service
    #[serde(rename = "system_assigned_managed_identity")]
    SystemAssignedManagedIdentity,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldsMapping {
    pub content_fields: Vec<String>,
    pub title_field: Option<String>,
    pub url_field: Option<String>,
    pub filepath_field: Option<String>,
    pub vector_fields: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EmbeddingDependency {
    #[serde(rename = "deployment_name")]
    DeploymentName { deployment_name: String },
    #[serde(rename = "endpoint")]
    Endpoint {
        endpoint: String,
        authentication: EmbeddingAuthentication,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EmbeddingAuthentication {
    #[serde(rename = "api_key")]
    ApiKey { key: String },
}

/// 发往模型提供方的完整请求。构造后不再修改；脱敏在序列化副本上进行。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: f32,
    #[serde(default)]
    pub stop: Option<Vec<String>>,
    pub stream: bool,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_body: Option<ExtraBody>,
}

/// data_sources 设计为序列以便未来挂接多个数据源，目前只会填充一个。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtraBody {
    pub data_sources: Vec<DataSourceDescriptor>,
}

/// 检索提供方返回的相关性分级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConfidenceTier {
    VeryHigh,
    High,
    Medium,
    Low,
    NotAvailable,
}

impl ConfidenceTier {
    /// 只有前三档可以作为引用上下文
    pub fn is_citable(self) -> bool {
        matches!(
            self,
            ConfidenceTier::VeryHigh | ConfidenceTier::High | ConfidenceTier::Medium
        )
    }
}

/// 检索提供方返回的单条文档
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedDocument {
    pub content: String,
    pub title: Option<String>,
    pub url: Option<String>,
    pub filepath: Option<String>,
    pub chunk_id: Option<String>,
    pub confidence: ConfidenceTier,
}

/// 引用记录，出现在规范化响应的 citations 载荷里
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CitationDocument {
    pub content: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub filepath: Option<String>,
    #[serde(default)]
    pub chunk_id: Option<String>,
}

impl From<RetrievedDocument> for CitationDocument {
    fn from(doc: RetrievedDocument) -> Self {
        Self {
            content: doc.content,
            title: doc.title,
            url: doc.url,
            filepath: doc.filepath,
            chunk_id: doc.chunk_id,
        }
    }
}

/// 引用载荷。始终走结构化序列化，不做字符串拼接。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CitationPayload {
    pub citations: Vec<CitationDocument>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// 返回给调用方的规范化响应单元。
/// 非流式路径返回一个；流式路径按 NDJSON 逐行返回一串。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalResponse {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub citations: Option<String>,
    pub history_metadata: Value,
    #[serde(
        default,
        rename = "apim-request-id",
        skip_serializing_if = "Option::is_none"
    )]
    pub apim_request_id: Option<String>,
}

pub use gw_error::{GatewayError as Error, Result};
