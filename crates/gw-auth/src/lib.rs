pub mod jwks;
pub mod middleware;
pub mod models;
pub mod verifier;

// 重新导出核心类型
pub use jwks::{Jwk, JwkSet, JwksCache};
pub use middleware::RequireRoles;
pub use models::AuthClaims;
pub use verifier::TokenVerifier;

// 错误类型
pub use gw_error::{GatewayError, Result};
