//! JWS 信封：ACME 每個簽名請求的本體（Flattened JSON Serialization）。
//!
//! 信封包含 `protected`、`payload` 與 `signature` 三個 base64url 字串。

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    base64::Base64,
    key_pair::KeyPair,
    protection::{Identity, ProtectedHeader, Protection},
    signature::{create_signature, SignatureError},
};

/// 表示一個 JSON Web Signature (JWS) 物件。
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Jws {
    /// 對應 JWS 中的 "protected" 欄位。
    #[serde(rename = "protected")]
    header: String,
    /// 負載；POST-as-GET 時為空字串。
    payload: String,
    signature: String,
}

/// 建立 JWS 時可能發生的錯誤。
#[derive(Error, Debug)]
pub enum JwsError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Signature error: {0}")]
    Signature(#[from] SignatureError),
}

type Result<T> = std::result::Result<T, JwsError>;

impl Jws {
    /// 以已編碼的三個部分組成 `Jws`。
    pub fn new(header_b64: &Base64, payload_b64: &Base64, signature_b64: &Base64) -> Self {
        Jws {
            header: header_b64.base64_url(),
            payload: payload_b64.base64_url(),
            signature: signature_b64.base64_url(),
        }
    }

    /// 建立並簽署一個信封。
    ///
    /// `payload` 為 `None` 時代表 POST-as-GET，負載為空字串。
    /// 呼叫者負責提供一個尚未使用過的 nonce。
    pub fn sign(
        key_pair: &KeyPair,
        identity: Identity,
        nonce: String,
        url: &str,
        payload: Option<&Base64>,
    ) -> Result<Self> {
        let header: ProtectedHeader = Protection::new(key_pair.alg, identity).create_header(nonce, url);
        let header_b64 = header.to_base64()?;
        let empty = Base64::empty();
        let payload_b64 = payload.unwrap_or(&empty);
        let signature = create_signature(&header_b64, payload_b64, key_pair)?;

        Ok(Self::new(&header_b64, payload_b64, &signature))
    }

    pub fn protected(&self) -> &str {
        &self.header
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// 將 `Jws` 實例序列化為 JSON 格式的字串。
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
