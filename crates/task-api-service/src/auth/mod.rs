//! JWT 认证

mod jwt;

pub use jwt::{Claims, JwtConfig, JwtManager};
