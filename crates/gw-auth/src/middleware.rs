use std::sync::Arc;

use axum::{extract::Request, response::IntoResponse, response::Response};
use gw_error::GatewayError;
use tower_http::auth::{AsyncAuthorizeRequest, AsyncRequireAuthorizationLayer};
use tracing::debug;

use crate::models::AuthClaims;
use crate::verifier::TokenVerifier;

/// 认证中间件：校验 Bearer 令牌、检查角色，并把 AuthClaims 注入 request extensions。
/// 校验失败时直接短路返回错误信封，受保护的 handler 不会被调用。
#[derive(Clone)]
pub struct RequireRoles {
    verifier: Arc<TokenVerifier>,
    roles: Vec<String>,
}

impl RequireRoles {
    pub fn new(verifier: Arc<TokenVerifier>, roles: Vec<String>) -> Self {
        Self { verifier, roles }
    }

    pub fn layer(
        verifier: Arc<TokenVerifier>,
        roles: Vec<String>,
    ) -> AsyncRequireAuthorizationLayer<Self> {
        AsyncRequireAuthorizationLayer::new(Self::new(verifier, roles))
    }

    async fn authenticate(
        &self,
        headers: &axum::http::HeaderMap,
    ) -> Result<AuthClaims, GatewayError> {
        let authorization = headers
            .get("authorization")
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| GatewayError::invalid_header("No valid Authorization header found"))?;

        let token = TokenVerifier::extract_token_from_header(authorization)?;
        let claims = self.verifier.verify(token).await?;

        if !claims.has_any_role(&self.roles) {
            return Err(GatewayError::insufficient_roles());
        }

        Ok(claims)
    }
}

impl AsyncAuthorizeRequest<axum::body::Body> for RequireRoles {
    type RequestBody = axum::body::Body;
    type ResponseBody = axum::body::Body;
    type Future = std::pin::Pin<
        Box<
            dyn std::future::Future<Output = std::result::Result<Request, Response>>
                + Send,
        >,
    >;

    fn authorize(&mut self, request: Request) -> Self::Future {
        let guard = self.clone();

        Box::pin(async move {
            match guard.authenticate(request.headers()).await {
                Ok(claims) => {
                    debug!(roles = ?claims.roles, "request authorized");
                    let mut request = request;
                    request.extensions_mut().insert(claims);
                    Ok(request)
                }
                Err(error) => Err(error.into_response()),
            }
        })
    }
}
