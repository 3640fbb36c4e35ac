use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

mod groups;

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use dotenv::dotenv;
use futures::{Stream, StreamExt};
use gw_auth::{RequireRoles, TokenVerifier};
use gw_chat::{
    ConversationOrchestrator, ConversationOutcome, ModelParams, ProviderRoute,
    RetrievalResponder, SearchConfig, DATASOURCE_AZURE_SEARCH,
};
use gw_core::{CanonicalResponse, ConversationRequest, ScopingContext};
use gw_error::GatewayError;
use gw_llm::{
    azure::MINIMUM_SUPPORTED_API_VERSION, AzureOpenAiClient, AzureOpenAiConfig, BedrockChatClient,
    BedrockChatConfig, KendraConfig, KendraRetriever, PromptflowClient, PromptflowConfig,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use groups::GraphGroupFilter;

const DEFAULT_SYSTEM_MESSAGE: &str =
    "You are an AI assistant that helps people find information on software development languages. \
     When providing an answer, make sure to include all the necessary technical details and context.";

/// 调用方访问令牌的头，用于文档级权限过滤
const USER_TOKEN_HEADER: &str = "x-ms-token-aad-access-token";

#[derive(Clone)]
struct AppState {
    orchestrator: Arc<ConversationOrchestrator>,
    responder: Option<Arc<RetrievalResponder>>,
}

/// 启动期从环境装配的不可变配置。数值在这里完成解析，
/// 配置非法直接启动失败，核心逻辑不读任何环境状态。
#[derive(Debug, Clone)]
struct Settings {
    host: String,
    port: u16,
    auth_enabled: bool,
    azure_client_id: Option<String>,
    azure_tenant_id: Option<String>,
    required_roles: Vec<String>,
    system_message: String,
    openai_endpoint: Option<String>,
    openai_resource: Option<String>,
    openai_model: String,
    openai_key: Option<String>,
    openai_ad_token: Option<String>,
    openai_api_version: String,
    temperature: f32,
    top_p: f32,
    max_tokens: u32,
    stop_sequence: Option<String>,
    should_stream: bool,
    search: Option<SearchConfig>,
    promptflow: Option<PromptflowConfig>,
    kendra: Option<KendraConfig>,
    bedrock: Option<BedrockChatConfig>,
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.is_empty())
}

fn env_or(key: &str, default: &str) -> String {
    env_opt(key).unwrap_or_else(|| default.to_string())
}

fn env_flag(key: &str, default: &str) -> bool {
    env_or(key, default).to_lowercase() == "true"
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> gw_error::Result<T> {
    raw.parse().map_err(|_| GatewayError::Configuration {
        key: key.to_string(),
        reason: format!("'{}' is not a valid number", raw),
    })
}

fn env_number<T: std::str::FromStr>(key: &str, default: &str) -> gw_error::Result<T> {
    parse_number(key, &env_or(key, default))
}

impl Settings {
    fn from_env() -> gw_error::Result<Self> {
        let system_message = env_or("SYSTEM_MESSAGE", DEFAULT_SYSTEM_MESSAGE);
        let search_top_k = env_or("SEARCH_TOP_K", "5");
        let search_strictness = env_or("SEARCH_STRICTNESS", "3");
        let search_in_domain = env_or("SEARCH_ENABLE_IN_DOMAIN", "true");

        // 搜索服务与索引都配置了才算挂接了检索数据源
        let search = match (env_opt("AZURE_SEARCH_SERVICE"), env_opt("AZURE_SEARCH_INDEX")) {
            (Some(service), Some(index)) => Some(SearchConfig {
                datasource_type: env_or("DATASOURCE_TYPE", DATASOURCE_AZURE_SEARCH),
                service,
                index,
                key: env_opt("AZURE_SEARCH_KEY"),
                query_type: env_opt("AZURE_SEARCH_QUERY_TYPE"),
                use_semantic_search: env_flag("AZURE_SEARCH_USE_SEMANTIC_SEARCH", "false"),
                semantic_search_config: Some(env_or(
                    "AZURE_SEARCH_SEMANTIC_SEARCH_CONFIG",
                    "default",
                )),
                top_k: parse_number(
                    "AZURE_SEARCH_TOP_K",
                    &env_or("AZURE_SEARCH_TOP_K", &search_top_k),
                )?,
                strictness: parse_number(
                    "AZURE_SEARCH_STRICTNESS",
                    &env_or("AZURE_SEARCH_STRICTNESS", &search_strictness),
                )?,
                enable_in_domain: env_or("AZURE_SEARCH_ENABLE_IN_DOMAIN", &search_in_domain)
                    .to_lowercase()
                    == "true",
                content_columns: env_opt("AZURE_SEARCH_CONTENT_COLUMNS"),
                filename_column: env_opt("AZURE_SEARCH_FILENAME_COLUMN"),
                title_column: env_opt("AZURE_SEARCH_TITLE_COLUMN"),
                url_column: env_opt("AZURE_SEARCH_URL_COLUMN"),
                vector_columns: env_opt("AZURE_SEARCH_VECTOR_COLUMNS"),
                permitted_groups_column: env_opt("AZURE_SEARCH_PERMITTED_GROUPS_COLUMN"),
                embedding_name: env_opt("AZURE_OPENAI_EMBEDDING_NAME"),
                embedding_endpoint: env_opt("AZURE_OPENAI_EMBEDDING_ENDPOINT"),
                embedding_key: env_opt("AZURE_OPENAI_EMBEDDING_KEY"),
                system_message: system_message.clone(),
            }),
            _ => None,
        };

        let promptflow = if env_flag("USE_PROMPTFLOW", "false") {
            match (env_opt("PROMPTFLOW_ENDPOINT"), env_opt("PROMPTFLOW_API_KEY")) {
                (Some(endpoint), Some(api_key)) => Some(PromptflowConfig {
                    endpoint,
                    api_key,
                    response_timeout: Duration::from_secs_f64(env_number(
                        "PROMPTFLOW_RESPONSE_TIMEOUT",
                        "30",
                    )?),
                    request_field: env_or("PROMPTFLOW_REQUEST_FIELD_NAME", "query"),
                    response_field: env_or("PROMPTFLOW_RESPONSE_FIELD_NAME", "reply"),
                    citations_field: env_or("PROMPTFLOW_CITATIONS_FIELD_NAME", "documents"),
                }),
                _ => None,
            }
        } else {
            None
        };

        let kendra = match (env_opt("KENDRA_ENDPOINT"), env_opt("KENDRA_INDEX_ID")) {
            (Some(endpoint), Some(index_id)) => Some(KendraConfig {
                endpoint,
                index_id,
                authorization: env_opt("KENDRA_AUTHORIZATION"),
                top_k: env_number("AI_SEARCH_TOP_K", "5")?,
            }),
            _ => None,
        };

        let bedrock = match (env_opt("BEDROCK_ENDPOINT"), env_opt("MODEL_ID")) {
            (Some(endpoint), Some(model_id)) => Some(BedrockChatConfig {
                endpoint,
                api_key: env_opt("BEDROCK_API_KEY"),
                model_id,
                system_message: Some(system_message.clone()),
                temperature: env_number("AI_TEMPERATURE", "0")?,
                top_p: env_number("AI_TOP_P", "1.0")?,
                max_tokens: env_number("AI_MAX_TOKENS", "1000")?,
            }),
            _ => None,
        };

        Ok(Settings {
            host: env_or("HOST", "0.0.0.0"),
            port: env_number("PORT", "8080")?,
            auth_enabled: env_flag("AUTH_ENABLED", "true"),
            azure_client_id: env_opt("AZURE_CLIENT_ID"),
            azure_tenant_id: env_opt("AZURE_TENANT_ID"),
            required_roles: env_opt("GATEWAY_REQUIRED_ROLES")
                .as_deref()
                .map(gw_chat::parse_multi_columns)
                .unwrap_or_default(),
            system_message,
            openai_endpoint: env_opt("AZURE_OPENAI_ENDPOINT"),
            openai_resource: env_opt("AZURE_OPENAI_RESOURCE"),
            openai_model: env_or("AZURE_OPENAI_MODEL", ""),
            openai_key: env_opt("AZURE_OPENAI_KEY"),
            openai_ad_token: env_opt("AZURE_OPENAI_AD_TOKEN"),
            openai_api_version: env_or(
                "AZURE_OPENAI_PREVIEW_API_VERSION",
                MINIMUM_SUPPORTED_API_VERSION,
            ),
            temperature: env_number("AZURE_OPENAI_TEMPERATURE", "0")?,
            top_p: env_number("AZURE_OPENAI_TOP_P", "1.0")?,
            max_tokens: env_number("AZURE_OPENAI_MAX_TOKENS", "1000")?,
            stop_sequence: env_opt("AZURE_OPENAI_STOP_SEQUENCE"),
            should_stream: env_flag("AZURE_OPENAI_STREAM", "true"),
            search,
            promptflow,
            kendra,
            bedrock,
        })
    }

    fn model_params(&self) -> ModelParams {
        ModelParams {
            model: self.openai_model.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            top_p: self.top_p,
            stop: self
                .stop_sequence
                .as_deref()
                .map(gw_chat::parse_multi_columns),
            stream: self.should_stream,
            system_message: self.system_message.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    dotenv().ok();

    let settings = Settings::from_env()?;

    // 路由在启动期定死：promptflow 完整配置则走 promptflow，否则直连模型
    let route = match settings.promptflow.clone() {
        Some(cfg) => {
            info!("promptflow route enabled");
            ProviderRoute::Promptflow(Arc::new(PromptflowClient::new(cfg)?))
        }
        None => {
            let client = AzureOpenAiClient::new(AzureOpenAiConfig {
                endpoint: settings.openai_endpoint.clone(),
                resource: settings.openai_resource.clone(),
                deployment: settings.openai_model.clone(),
                api_key: settings.openai_key.clone(),
                ad_token: settings.openai_ad_token.clone(),
                api_version: settings.openai_api_version.clone(),
            })?;
            info!("direct model route enabled");
            ProviderRoute::Direct(Arc::new(client))
        }
    };

    let permitted_groups_column = settings
        .search
        .as_ref()
        .and_then(|search| search.permitted_groups_column.clone())
        .unwrap_or_default();
    let orchestrator = Arc::new(ConversationOrchestrator::new(
        route,
        settings.model_params(),
        settings.search.clone(),
        Arc::new(GraphGroupFilter::new(permitted_groups_column)),
    ));

    let responder = match (settings.kendra.clone(), settings.bedrock.clone()) {
        (Some(kendra), Some(bedrock)) => {
            info!("kendra/bedrock retrieval responder enabled");
            Some(Arc::new(RetrievalResponder::new(
                Arc::new(KendraRetriever::new(kendra)),
                Arc::new(BedrockChatClient::new(bedrock)),
            )))
        }
        _ => None,
    };

    let state = AppState {
        orchestrator,
        responder,
    };

    let mut protected = Router::new()
        .route("/conversation/:application_id/:run_id", post(conversation))
        .route("/retrieve/:application_id/:run_id", post(retrieve));
    if settings.auth_enabled {
        let client_id = settings
            .azure_client_id
            .clone()
            .ok_or_else(|| anyhow::anyhow!("AUTH_ENABLED requires AZURE_CLIENT_ID"))?;
        let tenant_id = settings
            .azure_tenant_id
            .clone()
            .ok_or_else(|| anyhow::anyhow!("AUTH_ENABLED requires AZURE_TENANT_ID"))?;
        let verifier = Arc::new(TokenVerifier::new(&client_id, &tenant_id));
        protected = protected.layer(RequireRoles::layer(
            verifier,
            settings.required_roles.clone(),
        ));
    } else {
        info!("auth disabled, protected routes are open");
    }

    let app = Router::new()
        .nest("/api", protected)
        .route("/api/health", get(health))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", settings.host, settings.port).parse()?;
    info!(%addr, "gw-api listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn init_tracing() {
    use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};
    let fmt_layer = fmt::layer().with_target(false);
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info,tower_http=info"))
        .unwrap();
    let subscriber = Registry::default().with(filter).with(fmt_layer);
    tracing::subscriber::set_global_default(subscriber).ok();
}

fn scoping_from(application_id: i64, run_id: i64, headers: &HeaderMap) -> ScopingContext {
    ScopingContext {
        application_id,
        run_id,
        user_access_token: headers
            .get(USER_TOKEN_HEADER)
            .and_then(|value| value.to_str().ok())
            .filter(|value| !value.is_empty())
            .map(str::to_string),
    }
}

async fn conversation(
    State(state): State<AppState>,
    Path((application_id, run_id)): Path<(i64, i64)>,
    headers: HeaderMap,
    Json(body): Json<ConversationRequest>,
) -> Response {
    let scoping = scoping_from(application_id, run_id, &headers);
    match state.orchestrator.handle(body, scoping).await {
        Ok(ConversationOutcome::Complete(response)) => Json(response).into_response(),
        Ok(ConversationOutcome::Stream(chunks)) => ndjson_response(chunks),
        Err(error) => error.into_response(),
    }
}

async fn retrieve(
    State(state): State<AppState>,
    Path((application_id, run_id)): Path<(i64, i64)>,
    headers: HeaderMap,
    Json(body): Json<ConversationRequest>,
) -> Response {
    let Some(responder) = state.responder.clone() else {
        return GatewayError::Configuration {
            key: "retrieval".to_string(),
            reason: "retrieval backend is not configured".to_string(),
        }
        .into_response();
    };
    let scoping = scoping_from(application_id, run_id, &headers);
    match responder.respond(body, scoping).await {
        Ok(chunks) => ndjson_response(chunks),
        Err(error) => error.into_response(),
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// 流式响应按 NDJSON 逐行写出，每行一个可独立解析的 JSON 文档。
/// 流中途的协作方错误以错误信封行的形式结束该流。
fn ndjson_response<S>(chunks: S) -> Response
where
    S: Stream<Item = gw_error::Result<CanonicalResponse>> + Send + 'static,
{
    let lines = chunks.map(|item| -> Result<Bytes, axum::Error> {
        let line = match item {
            Ok(chunk) => serde_json::to_string(&chunk),
            Err(error) => serde_json::to_string(&error.envelope()),
        };
        line.map(|mut serialized| {
            serialized.push('\n');
            Bytes::from(serialized)
        })
        .map_err(axum::Error::new)
    });

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/json-lines")
        .body(Body::from_stream(lines))
        .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_number_rejects_non_numeric_config() {
        let err = parse_number::<f32>("AZURE_OPENAI_TEMPERATURE", "warm").unwrap_err();
        assert!(matches!(err, GatewayError::Configuration { .. }));
        let temperature: f32 = parse_number("AZURE_OPENAI_TEMPERATURE", "0.5").unwrap();
        assert!((temperature - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn test_scoping_reads_user_token_header() {
        let mut headers = HeaderMap::new();
        headers.insert(USER_TOKEN_HEADER, "tok".parse().unwrap());
        let scoping = scoping_from(1, 2, &headers);
        assert_eq!(scoping.application_id, 1);
        assert_eq!(scoping.run_id, 2);
        assert_eq!(scoping.user_access_token.as_deref(), Some("tok"));

        let scoping = scoping_from(1, 2, &HeaderMap::new());
        assert!(scoping.user_access_token.is_none());
    }

    #[tokio::test]
    async fn test_ndjson_body_is_line_delimited() {
        let chunk = CanonicalResponse {
            role: gw_core::Role::Assistant,
            content: "hi".into(),
            citations: None,
            history_metadata: serde_json::json!({}),
            apim_request_id: None,
        };
        let response = ndjson_response(futures::stream::iter(vec![
            Ok(chunk.clone()),
            Ok(chunk),
            Err(GatewayError::Provider {
                provider: "azure_openai".into(),
                message: "dropped".into(),
            }),
        ]));
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/json-lines"
        );

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        for line in &lines[..2] {
            let value: serde_json::Value = serde_json::from_str(line).unwrap();
            assert_eq!(value["role"], "assistant");
        }
        let error_line: serde_json::Value = serde_json::from_str(lines[2]).unwrap();
        assert!(error_line["error"].is_string());
    }
}
