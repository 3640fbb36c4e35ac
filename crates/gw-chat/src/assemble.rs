use gw_core::{ChatMessage, ExtraBody, ProviderRequest, Role, ScopingContext};
use gw_error::Result;

use crate::datasource::{build_data_source, GroupFilterGenerator, SearchConfig};

/// 模型采样参数。数值在启动期完成解析，配置非法在启动时失败而不是请求时。
#[derive(Debug, Clone)]
pub struct ModelParams {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: f32,
    pub stop: Option<Vec<String>>,
    pub stream: bool,
    pub system_message: String,
}

/// 规范化消息装配成模型请求。
///
/// - 不挂接数据源时，前置配置的 system message；
/// - 调用方消息按原顺序追加，只保留 role/content（id 等字段丢弃）；
/// - content 为空的消息显式跳过：前端会发出占位空消息，透传会触发部分提供方报错；
/// - 挂接数据源时，extra_body 填入恰好一个数据源描述。
pub async fn assemble(
    messages: &[ChatMessage],
    scoping: &ScopingContext,
    use_grounding: bool,
    params: &ModelParams,
    search: Option<&SearchConfig>,
    groups: &dyn GroupFilterGenerator,
) -> Result<ProviderRequest> {
    let mut assembled = Vec::with_capacity(messages.len() + 1);
    if !use_grounding {
        assembled.push(ChatMessage {
            role: Role::System,
            content: params.system_message.clone(),
            id: None,
        });
    }

    for message in messages {
        if message.content.is_empty() {
            continue;
        }
        assembled.push(ChatMessage {
            role: message.role,
            content: message.content.clone(),
            id: None,
        });
    }

    let extra_body = match (use_grounding, search) {
        (true, Some(cfg)) => Some(ExtraBody {
            data_sources: vec![build_data_source(scoping, cfg, groups).await?],
        }),
        _ => None,
    };

    Ok(ProviderRequest {
        messages: assembled,
        temperature: params.temperature,
        max_tokens: params.max_tokens,
        top_p: params.top_p,
        stop: params.stop.clone(),
        stream: params.stream,
        model: params.model.clone(),
        extra_body,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::datasource::tests::{search_config, StaticGroupFilter};
    use crate::orchestrator::filter_conversation_messages;

    pub(crate) fn model_params() -> ModelParams {
        ModelParams {
            model: "gpt-4o".into(),
            temperature: 0.0,
            max_tokens: 1000,
            top_p: 1.0,
            stop: None,
            stream: false,
            system_message: "You are an AI assistant that helps people find information.".into(),
        }
    }

    fn scoping() -> ScopingContext {
        ScopingContext {
            application_id: 1,
            run_id: 2,
            user_access_token: None,
        }
    }

    fn message(role: Role, content: &str) -> ChatMessage {
        ChatMessage {
            role,
            content: content.into(),
            id: Some("m-1".into()),
        }
    }

    #[tokio::test]
    async fn test_system_message_prepended_without_grounding() {
        let request = assemble(
            &[message(Role::User, "What is X?")],
            &scoping(),
            false,
            &model_params(),
            None,
            &StaticGroupFilter(""),
        )
        .await
        .unwrap();

        assert_eq!(request.messages.len(), 2);
        assert_eq!(request.messages[0].role, Role::System);
        assert_eq!(
            request.messages[0].content,
            "You are an AI assistant that helps people find information."
        );
        assert_eq!(request.messages[1].role, Role::User);
        assert_eq!(request.messages[1].content, "What is X?");
        // id 等多余字段不发给提供方
        assert!(request.messages[1].id.is_none());
        assert!(request.extra_body.is_none());
    }

    #[tokio::test]
    async fn test_tool_messages_filtered_before_assembly() {
        let inbound = vec![
            message(Role::User, "q"),
            message(Role::Tool, "{\"citations\":[]}"),
            message(Role::Assistant, "a"),
        ];
        let filtered = filter_conversation_messages(&inbound);
        let request = assemble(
            &filtered,
            &scoping(),
            true,
            &model_params(),
            Some(&search_config()),
            &StaticGroupFilter(""),
        )
        .await
        .unwrap();

        let roles: Vec<Role> = request.messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant]);
    }

    #[tokio::test]
    async fn test_empty_content_messages_are_skipped() {
        let request = assemble(
            &[message(Role::User, ""), message(Role::User, "real")],
            &scoping(),
            false,
            &model_params(),
            None,
            &StaticGroupFilter(""),
        )
        .await
        .unwrap();

        assert_eq!(request.messages.len(), 2); // system + "real"
        assert_eq!(request.messages[1].content, "real");
    }

    #[tokio::test]
    async fn test_grounding_attaches_single_data_source() {
        let request = assemble(
            &[message(Role::User, "q")],
            &scoping(),
            true,
            &model_params(),
            Some(&search_config()),
            &StaticGroupFilter(""),
        )
        .await
        .unwrap();

        // 挂接数据源时不前置 system message，由 role_information 承担
        assert_eq!(request.messages[0].role, Role::User);
        assert_eq!(request.extra_body.as_ref().unwrap().data_sources.len(), 1);
    }
}
