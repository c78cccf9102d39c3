use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::{base64::Base64, key_pair::KeyAlgorithm};

/// 保護標頭中用來識別簽名者的方式。
///
/// 帳戶建立前只能嵌入公鑰（`jwk`），取得 Key ID 之後一律改用 `kid`。
#[derive(Debug, Clone, PartialEq)]
pub enum Identity {
    Jwk(JsonValue),
    Kid(String),
}

/// 用於生成保護頭（Protected Header）的結構體。
pub struct Protection {
    alg: &'static str,
    identity: Identity,
}

/// 表示 JWS 保護頭部的資料結構，可序列化為 JSON 並轉為 Base64。
#[derive(Debug, Serialize)]
pub struct ProtectedHeader {
    /// 簽章演算法
    alg: &'static str,
    /// 嵌入的 JSON Web Key，與 `kid` 互斥
    #[serde(skip_serializing_if = "Option::is_none")]
    jwk: Option<JsonValue>,
    /// 帳戶的 Key ID，與 `jwk` 互斥
    #[serde(skip_serializing_if = "Option::is_none")]
    kid: Option<String>,
    /// 伺服器核發的一次性 nonce
    nonce: String,
    /// 請求目標 URL，必須與實際送出的 URL 完全一致
    url: String,
}

impl ProtectedHeader {
    /// 序列化後轉換為 Base64。
    ///
    /// # Errors
    ///
    /// 序列化失敗時回傳 [`serde_json::Error`]。
    pub fn to_base64(&self) -> Result<Base64, serde_json::Error> {
        Ok(Base64::new(serde_json::to_vec(self)?))
    }
}

impl Protection {
    /// 建立一個新的 [`Protection`] 實例，演算法由金鑰決定。
    pub fn new(alg: KeyAlgorithm, identity: Identity) -> Self {
        Self {
            alg: alg.jws_alg(),
            identity,
        }
    }

    /// 以給定的 nonce 與目標 URL 生成 [`ProtectedHeader`]。
    ///
    /// nonce 由呼叫者自 nonce 追蹤器取出，這裡不會自行取得。
    pub fn create_header(&self, nonce: impl Into<String>, url: impl Into<String>) -> ProtectedHeader {
        let (jwk, kid) = match &self.identity {
            Identity::Jwk(value) => (Some(value.clone()), None),
            Identity::Kid(kid) => (None, Some(kid.clone())),
        };

        ProtectedHeader {
            alg: self.alg,
            jwk,
            kid,
            nonce: nonce.into(),
            url: url.into(),
        }
    }
}

impl std::fmt::Display for ProtectedHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        serde_json::to_string(self)
            .map_err(|_| std::fmt::Error)
            .and_then(|s| write!(f, "{}", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_alg_follows_key() {
        let header = Protection::new(KeyAlgorithm::Rsa(2048), Identity::Kid("k".into()))
            .create_header("n", "https://example.com");
        assert_eq!(header.alg, "RS256");

        let header = Protection::new(KeyAlgorithm::EcdsaP256, Identity::Kid("k".into()))
            .create_header("n", "https://example.com");
        assert_eq!(header.alg, "ES256");
    }

    #[test]
    fn test_jwk_handling() {
        let jwk = json!({"kty": "EC", "crv": "P-256"});
        let header = Protection::new(KeyAlgorithm::EcdsaP256, Identity::Jwk(jwk.clone()))
            .create_header("test-nonce", "https://example.com");

        assert_eq!(header.jwk, Some(jwk));
        assert!(header.kid.is_none());
    }

    #[test]
    fn test_kid_handling() {
        let header = Protection::new(
            KeyAlgorithm::EcdsaP256,
            Identity::Kid("https://example/acct/1".into()),
        )
        .create_header("test-nonce", "https://example.com");

        assert_eq!(header.kid.as_deref(), Some("https://example/acct/1"));
        assert!(header.jwk.is_none());
    }

    #[test]
    fn test_header_serialization() {
        let header = Protection::new(KeyAlgorithm::EcdsaP256, Identity::Kid("kid-1".into()))
            .create_header("test-nonce", "https://example.com");

        let json = header.to_string();
        assert!(json.contains("\"nonce\":\"test-nonce\""));
        assert!(json.contains("\"url\":\"https://example.com\""));
        assert!(json.contains("\"alg\":\"ES256\""));
        assert!(!json.contains("\"jwk\""));
    }
}
