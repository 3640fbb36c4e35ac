use serde::{Deserialize, Serialize};

/// 解码后的 Azure AD 令牌载荷。按请求生命周期存在，通过 request extensions 传递。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthClaims {
    pub aud: String,                 // audience (the API client id)
    pub iss: String,                 // issuer
    #[serde(default)]
    pub sub: Option<String>,         // subject (object id of the caller)
    #[serde(default)]
    pub name: Option<String>,        // display name
    #[serde(default)]
    pub preferred_username: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,          // app roles granted to the caller
    pub exp: i64,                    // expiration timestamp
    #[serde(default)]
    pub iat: Option<i64>,            // issued at timestamp
}

impl AuthClaims {
    /// 要求的角色与令牌角色有交集即通过；空要求视为仅需有效令牌。
    pub fn has_any_role(&self, required: &[String]) -> bool {
        required.is_empty() || required.iter().any(|role| self.roles.contains(role))
    }
}
