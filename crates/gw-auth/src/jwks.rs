use std::time::{Duration, Instant};

use gw_error::{GatewayError, Result};
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::debug;

/// 身份提供方发现端点返回的单个签名密钥
#[derive(Debug, Clone, Deserialize)]
pub struct Jwk {
    pub kid: String,
    #[serde(default)]
    pub kty: String,
    #[serde(default)]
    pub n: String,
    #[serde(default)]
    pub e: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JwkSet {
    pub keys: Vec<Jwk>,
}

impl JwkSet {
    pub fn find(&self, kid: &str) -> Option<&Jwk> {
        self.keys.iter().find(|key| key.kid == kid)
    }
}

/// JWKS 拉取与进程内缓存。密钥轮换不频繁，按 TTL 刷新即可。
pub struct JwksCache {
    url: String,
    http: reqwest::Client,
    ttl: Duration,
    cached: RwLock<Option<(Instant, JwkSet)>>,
}

impl JwksCache {
    pub fn new(tenant_id: &str) -> Self {
        Self {
            url: format!(
                "https://login.microsoftonline.com/{}/discovery/v2.0/keys",
                tenant_id
            ),
            http: reqwest::Client::new(),
            ttl: Duration::from_secs(24 * 3600),
            cached: RwLock::new(None),
        }
    }

    pub async fn get(&self) -> Result<JwkSet> {
        if let Some((fetched_at, keys)) = self.cached.read().await.as_ref() {
            if fetched_at.elapsed() < self.ttl {
                return Ok(keys.clone());
            }
        }
        self.refresh().await
    }

    async fn refresh(&self) -> Result<JwkSet> {
        debug!(url = %self.url, "refreshing signing key set");
        let response = self.http.get(&self.url).send().await?;
        if !response.status().is_success() {
            return Err(GatewayError::Network {
                operation: "jwks_fetch".to_string(),
                message: format!("status={}", response.status()),
            });
        }
        let keys: JwkSet = response.json().await?;
        *self.cached.write().await = Some((Instant::now(), keys.clone()));
        Ok(keys)
    }

    /// 测试用：预置密钥集合，绕过网络拉取
    #[cfg(test)]
    pub(crate) fn preload(&self, keys: JwkSet) {
        if let Ok(mut guard) = self.cached.try_write() {
            *guard = Some((Instant::now(), keys));
        }
    }
}
