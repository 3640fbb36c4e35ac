use gw_core::ProviderRequest;
use serde_json::{Map, Value};
use tracing::warn;

/// 会被掩码的字段名，覆盖数据源参数顶层、authentication、
/// embedding_dependency.authentication 三个位置
const SECRET_FIELDS: [&str; 5] = [
    "key",
    "connection_string",
    "embedding_key",
    "encoded_api_key",
    "api_key",
];

const MASK: &str = "*****";

/// 产出可记日志的脱敏副本。只读原请求，失败时返回 None 并告警，
/// 绝不阻塞真实请求。
pub fn redact(request: &ProviderRequest) -> Option<Value> {
    match serde_json::to_value(request) {
        Ok(mut value) => {
            mask_data_sources(&mut value);
            Some(value)
        }
        Err(e) => {
            warn!(error = %e, "failed to build redacted request copy");
            None
        }
    }
}

fn mask_data_sources(value: &mut Value) {
    let Some(sources) = value
        .get_mut("extra_body")
        .and_then(|body| body.get_mut("data_sources"))
        .and_then(Value::as_array_mut)
    else {
        return;
    };

    for source in sources {
        let Some(parameters) = source
            .get_mut("parameters")
            .and_then(Value::as_object_mut)
        else {
            continue;
        };
        mask_fields(parameters);

        if let Some(authentication) = parameters
            .get_mut("authentication")
            .and_then(Value::as_object_mut)
        {
            mask_fields(authentication);
        }

        if let Some(embedding_authentication) = parameters
            .get_mut("embedding_dependency")
            .and_then(|dependency| dependency.get_mut("authentication"))
            .and_then(Value::as_object_mut)
        {
            mask_fields(embedding_authentication);
        }
    }
}

fn mask_fields(object: &mut Map<String, Value>) {
    for field in SECRET_FIELDS {
        if let Some(slot) = object.get_mut(field) {
            *slot = Value::String(MASK.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gw_core::{
        AzureSearchParameters, ChatMessage, DataSourceDescriptor, EmbeddingAuthentication,
        EmbeddingDependency, ExtraBody, FieldsMapping, Role, SearchAuthentication,
    };

    fn request_with_secrets() -> ProviderRequest {
        ProviderRequest {
            messages: vec![ChatMessage {
                role: Role::User,
                content: "q".into(),
                id: None,
            }],
            temperature: 0.0,
            max_tokens: 1000,
            top_p: 1.0,
            stop: None,
            stream: true,
            model: "gpt-4o".into(),
            extra_body: Some(ExtraBody {
                data_sources: vec![DataSourceDescriptor::AzureSearch(AzureSearchParameters {
                    endpoint: "https://svc.search.windows.net".into(),
                    authentication: SearchAuthentication::ApiKey {
                        api_key: "search-secret".into(),
                    },
                    index_name: "idx".into(),
                    fields_mapping: FieldsMapping {
                        content_fields: vec!["body".into()],
                        title_field: None,
                        url_field: None,
                        filepath_field: None,
                        vector_fields: vec![],
                    },
                    in_scope: true,
                    top_n_documents: 5,
                    query_type: "vector".into(),
                    semantic_configuration: String::new(),
                    role_information: "ri".into(),
                    filter: Some("clause".into()),
                    strictness: 3,
                    embedding_dependency: Some(EmbeddingDependency::Endpoint {
                        endpoint: "https://e.example.net".into(),
                        authentication: EmbeddingAuthentication::ApiKey {
                            key: "embedding-secret".into(),
                        },
                    }),
                })],
            }),
        }
    }

    #[test]
    fn test_all_secret_sites_masked_and_rest_untouched() {
        let request = request_with_secrets();
        let original = serde_json::to_value(&request).unwrap();
        let redacted = redact(&request).unwrap();

        let parameters = &redacted["extra_body"]["data_sources"][0]["parameters"];
        assert_eq!(parameters["authentication"]["api_key"], MASK);
        assert_eq!(
            parameters["embedding_dependency"]["authentication"]["key"],
            MASK
        );

        // 把掩码位写回原值后应与输入逐字节一致
        let mut restored = redacted.clone();
        restored["extra_body"]["data_sources"][0]["parameters"]["authentication"]["api_key"] =
            original["extra_body"]["data_sources"][0]["parameters"]["authentication"]["api_key"]
                .clone();
        restored["extra_body"]["data_sources"][0]["parameters"]["embedding_dependency"]
            ["authentication"]["key"] = original["extra_body"]["data_sources"][0]["parameters"]
            ["embedding_dependency"]["authentication"]["key"]
            .clone();
        assert_eq!(restored, original);
    }

    #[test]
    fn test_input_request_is_not_mutated() {
        let request = request_with_secrets();
        let before = serde_json::to_value(&request).unwrap();
        let _ = redact(&request);
        assert_eq!(serde_json::to_value(&request).unwrap(), before);
    }

    #[test]
    fn test_absent_secret_fields_skipped_silently() {
        let mut request = request_with_secrets();
        request.extra_body = None;
        let redacted = redact(&request).unwrap();
        assert!(redacted.get("extra_body").is_none());
    }
}
