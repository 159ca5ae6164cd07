//! 身份解析
//!
//! 从请求的来源地址派生不可逆的身份令牌（SHA-256），并读取上次领取时下发的
//! `claimed` Cookie 作为次要身份。Cookie 可被客户端随意清除或伪造，只作为
//! 防止简单换 IP 的弱信号，不是安全边界。

use std::convert::Infallible;
use std::fmt;
use std::net::SocketAddr;

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::HeaderMap;
use axum::http::request::Parts;
use axum_extra::extract::cookie::CookieJar;
use serde::Serialize;
use sha2::{Digest, Sha256};

/// 领取成功后下发的 Cookie 名称
pub const CLAIM_COOKIE: &str = "claimed";

const FORWARDED_FOR: &str = "x-forwarded-for";

/// 身份令牌：来源地址的 SHA-256 十六进制摘要
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct IdentityToken(String);

impl IdentityToken {
    /// 对地址求摘要；地址缺失时对空串求摘要（退化但确定）
    pub fn from_address(address: Option<&str>) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(address.unwrap_or_default().as_bytes());
        Self(format!("{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 日志中使用的截断形式
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl fmt::Display for IdentityToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 双身份查询键
///
/// `primary` 为地址哈希；`secondary` 为 Cookie 中的令牌，存在时与 primary 做 OR 匹配。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityQuery {
    pub primary: IdentityToken,
    pub secondary: Option<String>,
}

impl IdentityQuery {
    pub fn new(primary: IdentityToken, secondary: Option<String>) -> Self {
        Self { primary, secondary }
    }

    pub fn primary_only(primary: IdentityToken) -> Self {
        Self {
            primary,
            secondary: None,
        }
    }

    /// 需要匹配的全部令牌，去重且 primary 在前
    pub fn tokens(&self) -> Vec<String> {
        let mut tokens = vec![self.primary.as_str().to_string()];
        if let Some(secondary) = &self.secondary {
            if secondary != self.primary.as_str() {
                tokens.push(secondary.clone());
            }
        }
        tokens
    }

    pub fn matches(&self, claimed_by: &str) -> bool {
        claimed_by == self.primary.as_str() || self.secondary.as_deref() == Some(claimed_by)
    }
}

/// 解析客户端地址
///
/// X-Forwarded-For 可能包含多级代理，第一个非空条目是客户端地址；
/// 没有该头时使用直连对端地址。
pub fn client_address(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<String> {
    headers
        .get(FORWARDED_FOR)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
}

/// 读取 `claimed` Cookie，空值视为不存在
pub fn claim_cookie(jar: &CookieJar) -> Option<String> {
    jar.get(CLAIM_COOKIE)
        .map(|c| c.value().trim().to_string())
        .filter(|v| !v.is_empty())
}

/// 从请求中解析出的客户端身份
#[derive(Debug, Clone)]
pub struct ClientIdentity {
    pub token: IdentityToken,
    pub cookie: Option<String>,
}

impl ClientIdentity {
    pub fn resolve(headers: &HeaderMap, peer: Option<SocketAddr>) -> Self {
        let address = client_address(headers, peer);
        let jar = CookieJar::from_headers(headers);
        Self {
            token: IdentityToken::from_address(address.as_deref()),
            cookie: claim_cookie(&jar),
        }
    }

    /// 领券路径：地址哈希 OR Cookie
    pub fn claim_query(&self) -> IdentityQuery {
        IdentityQuery::new(self.token.clone(), self.cookie.clone())
    }

    /// 冷却查询路径：只看地址哈希
    pub fn cooldown_query(&self) -> IdentityQuery {
        IdentityQuery::primary_only(self.token.clone())
    }
}

impl<S> FromRequestParts<S> for ClientIdentity
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        Ok(Self::resolve(&parts.headers, peer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers_with(name: &'static str, value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(name, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_token_is_sha256_hex() {
        let token = IdentityToken::from_address(Some("203.0.113.7"));
        assert_eq!(token.as_str().len(), 64);
        assert!(token.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(token, IdentityToken::from_address(Some("203.0.113.7")));
        assert_ne!(token, IdentityToken::from_address(Some("203.0.113.8")));
    }

    #[test]
    fn test_missing_address_hashes_empty_string() {
        let token = IdentityToken::from_address(None);
        assert_eq!(
            token.as_str(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_forwarded_for_first_entry_wins() {
        let headers = headers_with(FORWARDED_FOR, " 198.51.100.1 , 10.0.0.1, 10.0.0.2");
        let peer: SocketAddr = "127.0.0.1:4000".parse().unwrap();
        assert_eq!(
            client_address(&headers, Some(peer)).as_deref(),
            Some("198.51.100.1")
        );
    }

    #[test]
    fn test_falls_back_to_peer_address() {
        let peer: SocketAddr = "192.0.2.10:55000".parse().unwrap();
        assert_eq!(
            client_address(&HeaderMap::new(), Some(peer)).as_deref(),
            Some("192.0.2.10")
        );
        assert_eq!(client_address(&HeaderMap::new(), None), None);
    }

    #[test]
    fn test_claim_cookie_parsing() {
        let headers = headers_with("cookie", "theme=dark; claimed=abc123");
        let identity = ClientIdentity::resolve(&headers, None);
        assert_eq!(identity.cookie.as_deref(), Some("abc123"));

        let empty = headers_with("cookie", "claimed=");
        assert_eq!(ClientIdentity::resolve(&empty, None).cookie, None);
    }

    #[test]
    fn test_query_tokens_dedup() {
        let token = IdentityToken::from_address(Some("1.1.1.1"));
        let same = IdentityQuery::new(token.clone(), Some(token.to_string()));
        assert_eq!(same.tokens().len(), 1);

        let dual = IdentityQuery::new(token.clone(), Some("other".to_string()));
        assert_eq!(dual.tokens(), vec![token.to_string(), "other".to_string()]);
        assert!(dual.matches("other"));
        assert!(!IdentityQuery::primary_only(token).matches("other"));
    }

    #[test]
    fn test_cooldown_query_ignores_cookie() {
        let headers = headers_with("cookie", "claimed=abc123");
        let identity = ClientIdentity::resolve(&headers, None);
        assert_eq!(identity.claim_query().secondary.as_deref(), Some("abc123"));
        assert_eq!(identity.cooldown_query().secondary, None);
    }
}
