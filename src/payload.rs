use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::base64::Base64;

/// 載荷驗證失敗。
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("Invalid payload: {0}")]
    Invalid(&'static str),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// 定義所有 API 載荷（Payload）必須實作的功能。
///
/// 實作者需提供驗證邏輯；[`PayloadT::to_base64`] 會先驗證再序列化，
/// 不合規範的載荷不會被送出。
pub trait PayloadT: Serialize {
    /// 將載荷轉換成 JSON 格式的字串。
    fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// 驗證後將載荷轉為 JSON，再以 Base64 進行編碼。
    fn to_base64(&self) -> Result<Base64, PayloadError> {
        self.validate()?;
        let json_string = self.to_json_string()?;
        Ok(Base64::new(json_string.as_bytes()))
    }

    /// 驗證載荷資料是否符合預期的規範。
    fn validate(&self) -> Result<(), PayloadError>;
}

/// 將聯絡信箱正規化為 `mailto:` URI，並去除前後空白。
pub fn normalize_contact(email: &str) -> String {
    let email = email.trim();
    if email.starts_with("mailto:") {
        email.to_string()
    } else {
        format!("mailto:{}", email)
    }
}

/// 表示建立新帳號所需的載荷資料。
#[derive(Debug, Serialize, Deserialize)]
pub struct NewAccountPayload {
    contact: Vec<String>,
    #[serde(rename = "termsOfServiceAgreed")]
    terms_of_service_agreed: bool,
}

impl NewAccountPayload {
    /// 建立新帳號載荷，每個聯絡信箱會自動補足 `mailto:` 前綴，並同意服務條款。
    pub fn new<S: AsRef<str>>(emails: &[S]) -> Self {
        NewAccountPayload {
            contact: emails
                .iter()
                .map(|email| normalize_contact(email.as_ref()))
                .collect(),
            terms_of_service_agreed: true,
        }
    }

    pub fn contact(&self) -> &[String] {
        &self.contact
    }
}

impl PayloadT for NewAccountPayload {
    /// 聯絡資訊可以為空（RFC 8555 允許），但每一項都必須是非空的信箱。
    fn validate(&self) -> Result<(), PayloadError> {
        if self.contact.iter().any(|c| c == "mailto:") {
            return Err(PayloadError::Invalid("contact email cannot be empty"));
        }
        if !self.terms_of_service_agreed {
            return Err(PayloadError::Invalid("terms of service must be agreed"));
        }
        Ok(())
    }
}

/// 表示一個識別項，用來描述證書所涵蓋的主機名稱。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identifier {
    #[serde(rename = "type")]
    pub type_: String,
    pub value: String,
}

impl Identifier {
    pub fn dns(domain: &str) -> Self {
        Identifier {
            type_: "dns".to_string(),
            value: domain.to_string(),
        }
    }
}

/// 表示建立新訂單時所需的載荷資料，每個域名對應一個 `dns` 識別項。
#[derive(Debug, Serialize, Deserialize)]
pub struct NewOrderPayload {
    pub identifiers: Vec<Identifier>,
}

impl NewOrderPayload {
    pub fn new<S: AsRef<str>>(domains: &[S]) -> Self {
        NewOrderPayload {
            identifiers: domains
                .iter()
                .map(|domain| Identifier::dns(domain.as_ref().trim()))
                .collect(),
        }
    }
}

impl PayloadT for NewOrderPayload {
    /// - 必須至少包含一個識別項。
    /// - 所有識別項的類型必須為 `"dns"` 且值不得為空。
    fn validate(&self) -> Result<(), PayloadError> {
        if self.identifiers.is_empty() {
            return Err(PayloadError::Invalid("at least one identifier is required"));
        }
        for identifier in &self.identifiers {
            if identifier.type_ != "dns" {
                return Err(PayloadError::Invalid("identifier type must be 'dns'"));
            }
            if identifier.value.is_empty() {
                return Err(PayloadError::Invalid("identifier value cannot be empty"));
            }
        }
        Ok(())
    }
}

/// 通知伺服器挑戰已就緒的載荷，固定為空物件 `{}`。
#[derive(Debug, Serialize, Deserialize, Default)]
pub struct ChallengeReadyPayload {}

impl PayloadT for ChallengeReadyPayload {
    fn validate(&self) -> Result<(), PayloadError> {
        Ok(())
    }
}

/// 最終化訂單時所需的載荷，內含 DER 編碼 CSR 的 base64url 字串。
#[derive(Debug, Serialize, Deserialize)]
pub struct FinalizeOrderPayload {
    #[serde(rename = "csr")]
    csr_b64_str: String,
}

impl FinalizeOrderPayload {
    pub fn new(csr_der: &[u8]) -> Self {
        FinalizeOrderPayload {
            csr_b64_str: Base64::new(csr_der).base64_url(),
        }
    }
}

impl PayloadT for FinalizeOrderPayload {
    fn validate(&self) -> Result<(), PayloadError> {
        if self.csr_b64_str.is_empty() {
            return Err(PayloadError::Invalid("CSR cannot be empty"));
        }
        Ok(())
    }
}
