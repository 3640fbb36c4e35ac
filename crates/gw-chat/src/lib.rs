pub mod assemble;
pub mod datasource;
pub mod normalize;
pub mod orchestrator;
pub mod redact;
pub mod responder;

// 重新导出核心类型
pub use assemble::{assemble, ModelParams};
pub use datasource::{
    build_data_source, parse_multi_columns, GroupFilterGenerator, SearchConfig,
    DATASOURCE_AZURE_ML_INDEX, DATASOURCE_AZURE_SEARCH,
};
pub use normalize::{normalize_chunk, normalize_completion, normalize_promptflow};
pub use orchestrator::{
    filter_conversation_messages, ConversationOrchestrator, ConversationOutcome, ProviderRoute,
};
pub use redact::redact;
pub use responder::RetrievalResponder;

// 错误类型
pub use gw_error::{GatewayError, Result};
