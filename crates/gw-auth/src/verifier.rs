use gw_error::{GatewayError, Result};
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use tracing::debug;

use crate::jwks::JwksCache;
use crate::models::AuthClaims;

/// Azure AD 令牌校验器。每个进程构造一次，内部缓存签名密钥。
pub struct TokenVerifier {
    client_id: String,
    issuer: String,
    jwks: JwksCache,
}

impl TokenVerifier {
    pub fn new(client_id: &str, tenant_id: &str) -> Self {
        Self {
            client_id: client_id.to_string(),
            issuer: format!("https://login.microsoftonline.com/{}/v2.0", tenant_id),
            jwks: JwksCache::new(tenant_id),
        }
    }

    /// 从 Authorization header 中提取 token
    pub fn extract_token_from_header(authorization: &str) -> Result<&str> {
        authorization
            .strip_prefix("Bearer ")
            .ok_or_else(|| GatewayError::invalid_header("No valid Authorization header found"))
    }

    /// 验证并解码令牌
    pub async fn verify(&self, token: &str) -> Result<AuthClaims> {
        let header = decode_header(token).map_err(|e| {
            GatewayError::invalid_header(format!("Unable to parse authentication token: {}", e))
        })?;
        let kid = header
            .kid
            .ok_or_else(|| GatewayError::invalid_header("Token carries no key id"))?;

        let keys = self.jwks.get().await?;
        let jwk = keys
            .find(&kid)
            .ok_or_else(|| GatewayError::invalid_header("Unable to find appropriate key"))?;
        let decoding_key = DecodingKey::from_rsa_components(&jwk.n, &jwk.e).map_err(|e| {
            GatewayError::invalid_header(format!("Unable to build verification key: {}", e))
        })?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[&self.client_id]);
        validation.set_issuer(&[&self.issuer]);

        decode::<AuthClaims>(token, &decoding_key, &validation)
            .map(|data| {
                debug!(sub = ?data.claims.sub, "token verified");
                data.claims
            })
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature
                | jsonwebtoken::errors::ErrorKind::InvalidSignature => GatewayError::auth(
                    "invalid Signature or Token",
                    format!("Invalid Signature: {}", e),
                    401,
                ),
                jsonwebtoken::errors::ErrorKind::InvalidAudience
                | jsonwebtoken::errors::ErrorKind::InvalidIssuer => {
                    GatewayError::auth("invalid Audience or Issuer", e.to_string(), 401)
                }
                _ => GatewayError::invalid_header(format!(
                    "Unable to parse authentication token: {}",
                    e
                )),
            })
    }

    /// 测试用：预置签名密钥集合
    #[cfg(test)]
    pub(crate) fn preload_keys(&self, keys: crate::jwks::JwkSet) {
        self.jwks.preload(keys);
    }
}
