use async_trait::async_trait;
use gw_core::{
    AzureSearchParameters, DataSourceDescriptor, EmbeddingAuthentication, EmbeddingDependency,
    FieldsMapping, ScopingContext, SearchAuthentication,
};
use gw_error::{GatewayError, Result};
use tracing::debug;

pub const DATASOURCE_AZURE_SEARCH: &str = "AzureCognitiveSearch";
/// 索引托管 embedding 的变体，不需要单独的 embedding 依赖
pub const DATASOURCE_AZURE_ML_INDEX: &str = "AzureMLIndex";

/// 检索数据源的静态配置，启动时装配一次
#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub datasource_type: String,
    pub service: String,
    pub index: String,
    pub key: Option<String>,
    pub query_type: Option<String>,
    pub use_semantic_search: bool,
    pub semantic_search_config: Option<String>,
    pub top_k: u32,
    pub strictness: u32,
    pub enable_in_domain: bool,
    pub content_columns: Option<String>,
    pub filename_column: Option<String>,
    pub title_column: Option<String>,
    pub url_column: Option<String>,
    pub vector_columns: Option<String>,
    pub permitted_groups_column: Option<String>,
    pub embedding_name: Option<String>,
    pub embedding_endpoint: Option<String>,
    pub embedding_key: Option<String>,
    /// 数据源的 role_information，同时也是非检索路径的 system message
    pub system_message: String,
}

/// 把调用方的访问令牌换成文档级权限过滤子句。具体实现视目录服务而定。
#[async_trait]
pub trait GroupFilterGenerator: Send + Sync {
    async fn generate(&self, user_access_token: &str) -> Result<String>;
}

/// 列配置按分隔符拆成字段序列。优先竖线，退回逗号。
pub fn parse_multi_columns(value: &str) -> Vec<String> {
    let separator = if value.contains('|') { '|' } else { ',' };
    value
        .split(separator)
        .map(|column| column.trim().to_string())
        .filter(|column| !column.is_empty())
        .collect()
}

fn resolve_query_type(cfg: &SearchConfig) -> String {
    if let Some(query_type) = &cfg.query_type {
        if !query_type.is_empty() {
            return query_type.clone();
        }
    }
    if cfg.use_semantic_search
        && cfg
            .semantic_search_config
            .as_deref()
            .is_some_and(|name| !name.is_empty())
    {
        return "semantic".to_string();
    }
    "simple".to_string()
}

fn resolve_embedding_dependency(cfg: &SearchConfig, query_type: &str) -> Result<EmbeddingDependency> {
    if let Some(deployment_name) = cfg.embedding_name.as_deref().filter(|name| !name.is_empty()) {
        return Ok(EmbeddingDependency::DeploymentName {
            deployment_name: deployment_name.to_string(),
        });
    }
    if let (Some(endpoint), Some(key)) = (&cfg.embedding_endpoint, &cfg.embedding_key) {
        return Ok(EmbeddingDependency::Endpoint {
            endpoint: endpoint.clone(),
            authentication: EmbeddingAuthentication::ApiKey { key: key.clone() },
        });
    }
    Err(GatewayError::Configuration {
        key: "embedding_dependency".to_string(),
        reason: format!(
            "vector query type ({}) is selected for data source type {} but no embedding dependency is configured",
            query_type, cfg.datasource_type
        ),
    })
}

/// 根据租户上下文与静态配置装配数据源描述
pub async fn build_data_source(
    scoping: &ScopingContext,
    cfg: &SearchConfig,
    groups: &dyn GroupFilterGenerator,
) -> Result<DataSourceDescriptor> {
    if cfg.datasource_type != DATASOURCE_AZURE_SEARCH {
        return Err(GatewayError::Configuration {
            key: "datasource_type".to_string(),
            reason: format!("datasource type is not configured or unknown: {}", cfg.datasource_type),
        });
    }

    let query_type = resolve_query_type(cfg);

    // 定位表达式只用于诊断；实际过滤子句来自权限过滤生成器
    debug!(
        "scoping filter: ApplicationID eq {} and RunID eq {}",
        scoping.application_id, scoping.run_id
    );

    let mut filter = None;
    if cfg.permitted_groups_column.is_some() {
        let token = scoping.user_access_token.as_deref().ok_or_else(|| {
            GatewayError::Configuration {
                key: "permitted_groups_column".to_string(),
                reason: "document-level access control is enabled, but user access token could not be fetched"
                    .to_string(),
            }
        })?;
        debug!("user token is present, generating permitted groups filter");
        filter = Some(groups.generate(token).await?);
    }

    let authentication = match &cfg.key {
        Some(key) => SearchAuthentication::ApiKey {
            api_key: key.clone(),
        },
        // 未配置 key 时默认模型提供方的托管身份已被搜索服务授权
        None => SearchAuthentication::SystemAssignedManagedIdentity,
    };

    let embedding_dependency = if query_type.to_lowercase().contains("vector")
        && cfg.datasource_type != DATASOURCE_AZURE_ML_INDEX
    {
        Some(resolve_embedding_dependency(cfg, &query_type)?)
    } else {
        None
    };

    Ok(DataSourceDescriptor::AzureSearch(AzureSearchParameters {
        endpoint: format!("https://{}.search.windows.net", cfg.service),
        authentication,
        index_name: cfg.index.clone(),
        fields_mapping: FieldsMapping {
            content_fields: cfg
                .content_columns
                .as_deref()
                .map(parse_multi_columns)
                .unwrap_or_default(),
            title_field: cfg.title_column.clone(),
            url_field: cfg.url_column.clone(),
            filepath_field: cfg.filename_column.clone(),
            vector_fields: cfg
                .vector_columns
                .as_deref()
                .map(parse_multi_columns)
                .unwrap_or_default(),
        },
        in_scope: cfg.enable_in_domain,
        top_n_documents: cfg.top_k,
        query_type,
        semantic_configuration: cfg.semantic_search_config.clone().unwrap_or_default(),
        role_information: cfg.system_message.clone(),
        filter,
        strictness: cfg.strictness,
        embedding_dependency,
    }))
}
