use std::{fmt, str::FromStr};

use openssl::{
    ec::{EcGroup, EcKey},
    error::ErrorStack,
    nid::Nid,
    pkey::{Id, PKey, Private, Public},
    rsa::Rsa,
};
use thiserror::Error;

use crate::jwk::{Jwk, JwkError};

/// 金鑰相關操作的錯誤列舉，涵蓋 OpenSSL 與 JWK 轉換錯誤。
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("OpenSSL error: {0}")]
    OpenSSL(#[from] ErrorStack),
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),
    #[error("Unsupported elliptic curve, only P-256 is accepted")]
    UnsupportedCurve,
    #[error("RSA key too small: {0} bits")]
    RsaKeyTooSmall(u32),
    #[error("PEM is not valid UTF-8")]
    InvalidPem,
    #[error("JWK error: {0}")]
    Jwk(#[from] JwkError),
}

type Result<T> = std::result::Result<T, KeyError>;

/// 支援的金鑰演算法。
///
/// 帳戶金鑰預設使用 P-256（ES256），憑證金鑰預設使用 2048 位元 RSA。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAlgorithm {
    /// NIST P-256 曲線上的 ECDSA，JWS 演算法為 `ES256`。
    EcdsaP256,
    /// 指定位元長度的 RSA，JWS 演算法為 `RS256`。
    Rsa(u32),
}

impl KeyAlgorithm {
    const MIN_RSA_BITS: u32 = 2048;

    /// JWS 保護標頭中 `alg` 欄位的值。
    pub fn jws_alg(&self) -> &'static str {
        match self {
            Self::EcdsaP256 => "ES256",
            Self::Rsa(_) => "RS256",
        }
    }
}

impl Default for KeyAlgorithm {
    fn default() -> Self {
        Self::EcdsaP256
    }
}

impl fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EcdsaP256 => write!(f, "p256"),
            Self::Rsa(bits) => write!(f, "rsa{}", bits),
        }
    }
}

impl FromStr for KeyAlgorithm {
    type Err = KeyError;

    /// 接受 `p256`、`ec`、`ecdsa`、`es256`、`rsa`（2048 位元）與 `rsa<位元數>`，大小寫不敏感。
    fn from_str(s: &str) -> Result<Self> {
        let name = s.trim().to_lowercase();
        match name.as_str() {
            "p256" | "p-256" | "ec" | "ecdsa" | "es256" => Ok(Self::EcdsaP256),
            "rsa" | "rs256" => Ok(Self::Rsa(Self::MIN_RSA_BITS)),
            _ => {
                let bits = name
                    .strip_prefix("rsa")
                    .and_then(|bits| bits.parse::<u32>().ok())
                    .ok_or_else(|| KeyError::UnsupportedAlgorithm(s.to_string()))?;
                if bits < Self::MIN_RSA_BITS {
                    return Err(KeyError::RsaKeyTooSmall(bits));
                }
                Ok(Self::Rsa(bits))
            }
        }
    }
}

/// 表示一組非對稱加密的金鑰對。
///
/// 私鑰與由其派生的公鑰一併保存，並記錄對應的演算法，供簽名、JWK 與 CSR 使用。
#[derive(Debug, Clone)]
pub struct KeyPair {
    /// 金鑰演算法。
    pub alg: KeyAlgorithm,
    /// 私鑰，使用 OpenSSL 的 `PKey` 封裝。
    pub pri_key: PKey<Private>,
    /// 公鑰，從私鑰派生而來。
    pub pub_key: PKey<Public>,
}

impl KeyPair {
    /// 以指定演算法產生新的金鑰對。
    ///
    /// # 回傳
    ///
    /// 成功回傳建立好的 `KeyPair`，否則回傳對應的 `KeyError`。
    pub fn generate(alg: KeyAlgorithm) -> Result<Self> {
        let pri_key = match alg {
            KeyAlgorithm::EcdsaP256 => {
                let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1)?;
                PKey::from_ec_key(EcKey::generate(&group)?)?
            }
            KeyAlgorithm::Rsa(bits) => {
                if bits < KeyAlgorithm::MIN_RSA_BITS {
                    return Err(KeyError::RsaKeyTooSmall(bits));
                }
                PKey::from_rsa(Rsa::generate(bits)?)?
            }
        };
        let pub_key = Self::derive_public_key(&pri_key)?;

        Ok(Self {
            alg,
            pri_key,
            pub_key,
        })
    }

    /// 根據 PEM 格式的私鑰資料建立一組金鑰對，演算法由金鑰內容判斷。
    ///
    /// # 參數
    ///
    /// - `pri_key_pem`: 私鑰的 PEM 格式位元組切片（PKCS#8、SEC1 或 PKCS#1 皆可）。
    ///
    /// # 回傳
    ///
    /// 成功回傳建立好的 `KeyPair`；非 P-256 的 EC 金鑰或其他類型回傳錯誤。
    pub fn from_pem(pri_key_pem: &[u8]) -> Result<Self> {
        let pri_key = PKey::private_key_from_pem(pri_key_pem)?;
        let alg = match pri_key.id() {
            Id::EC => {
                let ec = pri_key.ec_key()?;
                if ec.group().curve_name() != Some(Nid::X9_62_PRIME256V1) {
                    return Err(KeyError::UnsupportedCurve);
                }
                KeyAlgorithm::EcdsaP256
            }
            Id::RSA => KeyAlgorithm::Rsa(pri_key.rsa()?.size() * 8),
            other => return Err(KeyError::UnsupportedAlgorithm(format!("{:?}", other))),
        };
        let pub_key = Self::derive_public_key(&pri_key)?;

        Ok(Self {
            alg,
            pri_key,
            pub_key,
        })
    }

    /// 以 PKCS#8 PEM 格式匯出私鑰。
    pub fn private_key_pem(&self) -> Result<String> {
        let pem = self.pri_key.private_key_to_pem_pkcs8()?;
        String::from_utf8(pem).map_err(|_| KeyError::InvalidPem)
    }

    /// 取得公鑰的 JWK 表示。
    pub fn jwk(&self) -> Result<Jwk> {
        Ok(Jwk::new(self)?)
    }

    /// 計算並回傳金鑰對的縮影（RFC 7638 thumbprint），以 URL-safe Base64 字串表示。
    pub fn thumbprint(&self) -> Result<String> {
        Ok(self.jwk()?.thumbprint()?)
    }

    /// 根據私鑰派生出對應的公鑰。
    fn derive_public_key(pri_key: &PKey<Private>) -> Result<PKey<Public>> {
        match pri_key.id() {
            Id::RSA => {
                let rsa = pri_key.rsa()?;
                let pub_rsa =
                    Rsa::from_public_components(rsa.n().to_owned()?, rsa.e().to_owned()?)?;
                Ok(PKey::from_rsa(pub_rsa)?)
            }
            Id::EC => {
                let ec = pri_key.ec_key()?;
                let pub_ec = EcKey::from_public_key(ec.group(), ec.public_key())?;
                Ok(PKey::from_ec_key(pub_ec)?)
            }
            other => Err(KeyError::UnsupportedAlgorithm(format!("{:?}", other))),
        }
    }
}
