use openssl::{
    bn::{BigNum, BigNumContext},
    nid::Nid,
    pkey::Id,
    sha::sha256,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::{base64::Base64, key_pair::KeyPair};

/// JWK 相關操作的錯誤類型。
#[derive(Debug, Error)]
pub enum JwkError {
    /// 不支援的金鑰類型。
    #[error("Unsupported key type: {0}")]
    UnsupportedKeyType(String),
    /// 僅支援 P-256 曲線。
    #[error("Unsupported curve")]
    UnsupportedCurve,
    /// 金鑰轉換失敗。
    #[error("Failed to convert key: {0}")]
    KeyConversion(#[from] openssl::error::ErrorStack),
    /// 序列化錯誤。
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// P-256 座標的固定位元組長度。
const P256_COORDINATE_LEN: i32 = 32;

/// JSON Web Key (JWK) 的封裝，支援 RSA 與 EC（P-256）兩種公鑰。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kty")]
pub enum Jwk {
    /// RSA 格式的 JWK。
    #[serde(rename = "RSA")]
    Rsa(RsaJwk),
    /// EC 格式的 JWK。
    #[serde(rename = "EC")]
    Ec(EcJwk),
}

/// RSA 格式的 JWK，只包含公開參數。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RsaJwk {
    n: String,
    e: String,
}

/// EC 格式的 JWK，座標補齊為曲線長度。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EcJwk {
    crv: String,
    x: String,
    y: String,
}

impl Jwk {
    /// 根據給定的金鑰對建立對應的 JWK。
    ///
    /// # 返回
    ///
    /// 成功時返回對應類型的 `Jwk`，金鑰類型不支援時返回 `JwkError`。
    pub fn new(key_pair: &KeyPair) -> Result<Self, JwkError> {
        match key_pair.pub_key.id() {
            Id::RSA => {
                let rsa = key_pair.pub_key.rsa()?;
                Ok(Jwk::Rsa(RsaJwk {
                    n: Base64::new(rsa.n().to_vec()).base64_url(),
                    e: Base64::new(rsa.e().to_vec()).base64_url(),
                }))
            }
            Id::EC => {
                let ec = key_pair.pub_key.ec_key()?;
                if ec.group().curve_name() != Some(Nid::X9_62_PRIME256V1) {
                    return Err(JwkError::UnsupportedCurve);
                }
                let mut ctx = BigNumContext::new()?;
                let mut x = BigNum::new()?;
                let mut y = BigNum::new()?;
                ec.public_key()
                    .affine_coordinates(ec.group(), &mut x, &mut y, &mut ctx)?;

                Ok(Jwk::Ec(EcJwk {
                    crv: "P-256".to_string(),
                    x: Base64::new(x.to_vec_padded(P256_COORDINATE_LEN)?).base64_url(),
                    y: Base64::new(y.to_vec_padded(P256_COORDINATE_LEN)?).base64_url(),
                }))
            }
            other => Err(JwkError::UnsupportedKeyType(format!("{:?}", other))),
        }
    }

    /// 產生 RFC 7638 規定的正規化 JSON：只含必要欄位，依字典序排列且無空白。
    pub fn to_acme_json(&self) -> Result<String, JwkError> {
        // 依賴 serde_json 的 preserve_order，插入順序即輸出順序
        let mut map = Map::new();
        match self {
            Jwk::Rsa(jwk) => {
                map.insert("e".to_string(), Value::String(jwk.e.clone()));
                map.insert("kty".to_string(), Value::String("RSA".to_string()));
                map.insert("n".to_string(), Value::String(jwk.n.clone()));
            }
            Jwk::Ec(jwk) => {
                map.insert("crv".to_string(), Value::String(jwk.crv.clone()));
                map.insert("kty".to_string(), Value::String("EC".to_string()));
                map.insert("x".to_string(), Value::String(jwk.x.clone()));
                map.insert("y".to_string(), Value::String(jwk.y.clone()));
            }
        }

        serde_json::to_string(&Value::Object(map)).map_err(JwkError::from)
    }

    /// 計算 JWK thumbprint：正規化 JSON 的 SHA-256，再以 URL-safe Base64 編碼。
    pub fn thumbprint(&self) -> Result<String, JwkError> {
        let digest = sha256(self.to_acme_json()?.as_bytes());
        Ok(Base64::new(digest).base64_url())
    }

    /// 將 JWK 轉為 JSON 值，用於嵌入保護標頭。
    pub fn to_value(&self) -> Result<Value, JwkError> {
        serde_json::to_value(self).map_err(JwkError::from)
    }
}
