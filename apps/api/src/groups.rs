use async_trait::async_trait;
use gw_chat::GroupFilterGenerator;
use gw_error::{GatewayError, Result};
use serde::Deserialize;
use tracing::{debug, instrument};

const GRAPH_MEMBER_OF_URL: &str =
    "https://graph.microsoft.com/v1.0/me/transitiveMemberOf?$select=id";

/// 文档级权限过滤：用调用方的访问令牌查 Microsoft Graph 的组成员关系，
/// 生成 permitted-groups 列上的 search.in 过滤子句。
pub struct GraphGroupFilter {
    http: reqwest::Client,
    permitted_groups_column: String,
}

#[derive(Deserialize)]
struct GroupPage {
    #[serde(default)]
    value: Vec<GroupEntry>,
    #[serde(rename = "@odata.nextLink", default)]
    next_link: Option<String>,
}

#[derive(Deserialize)]
struct GroupEntry {
    id: String,
}

impl GraphGroupFilter {
    pub fn new(permitted_groups_column: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            permitted_groups_column,
        }
    }
}

#[async_trait]
impl GroupFilterGenerator for GraphGroupFilter {
    #[instrument(skip(self, user_access_token))]
    async fn generate(&self, user_access_token: &str) -> Result<String> {
        let mut group_ids: Vec<String> = Vec::new();
        let mut url = GRAPH_MEMBER_OF_URL.to_string();
        loop {
            let response = self
                .http
                .get(&url)
                .bearer_auth(user_access_token)
                .send()
                .await?;
            if !response.status().is_success() {
                let status = response.status();
                let text = response.text().await.unwrap_or_default();
                return Err(GatewayError::Provider {
                    provider: "msgraph".to_string(),
                    message: format!("status={} body={}", status, text),
                });
            }
            let page: GroupPage = response.json().await?;
            group_ids.extend(page.value.into_iter().map(|entry| entry.id));
            match page.next_link {
                Some(next) => url = next,
                None => break,
            }
        }

        debug!(groups = group_ids.len(), "resolved caller group membership");
        Ok(format!(
            "{}/any(g:search.in(g, '{}'))",
            self.permitted_groups_column,
            group_ids.join(", ")
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_page_parses_odata_shape() {
        let page: GroupPage = serde_json::from_value(serde_json::json!({
            "value": [{"id": "g-1"}, {"id": "g-2"}],
            "@odata.nextLink": "https://graph.microsoft.com/v1.0/next"
        }))
        .unwrap();
        assert_eq!(page.value.len(), 2);
        assert!(page.next_link.is_some());
    }
}
