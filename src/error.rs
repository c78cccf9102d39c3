//! 協定層級的錯誤分類。
//!
//! 目錄、nonce 與帳戶階段的錯誤會中止整個工作階段；
//! 單一訂單或挑戰的錯誤只中止該域名的申請，DNS 清理仍會執行。

use std::error::Error as StdError;

use thiserror::Error;

use crate::{
    certificate::CertificateError, csr::CsrError, dns::DnsError, jwk::JwkError, jws::JwsError,
    key_pair::KeyError, payload::PayloadError, problem::Problem, signature::SignatureError,
    store::StoreError,
};

#[derive(Debug, Error)]
pub enum AcmeError {
    /// 網路或 HTTP 層失敗，呼叫者可自行決定是否重試。
    #[error("Transport error: {0}")]
    Transport(#[source] Box<dyn StdError + Send + Sync>),
    /// 伺服器回應的格式不符預期。
    #[error("Protocol error: {0}")]
    Protocol(String),
    /// 格式正確的 ACME 問題文件。
    #[error("ACME problem: {0}")]
    Problem(Problem),
    /// 建立訂單失敗。
    #[error("Order request failed: {0}")]
    Order(#[source] Box<AcmeError>),
    /// 授權沒有提供 dns-01 挑戰，無法以本用戶端驗證。
    #[error("Challenge error: {0}")]
    Challenge(String),
    /// 挑戰、授權或訂單進入 `invalid` 終止狀態。
    #[error("Validation failed for {url}{}", .problem.as_ref().map(|p| format!(": {}", p)).unwrap_or_default())]
    ValidationFailed {
        url: String,
        problem: Option<Problem>,
    },
    /// 訂單尚未 `ready`（仍有授權未通過）就嘗試 finalize。
    #[error("Order {url} is not ready for finalization (status: {status})")]
    OrderNotReady { url: String, status: String },
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("No nonce has been obtained")]
    NoNonce,
    #[error("Key error: {0}")]
    Key(#[from] KeyError),
    #[error("JWK error: {0}")]
    Jwk(#[from] JwkError),
    #[error("Signature error: {0}")]
    Signature(#[from] SignatureError),
    #[error("JWS error: {0}")]
    Jws(#[from] JwsError),
    #[error("Payload error: {0}")]
    Payload(#[from] PayloadError),
    #[error("CSR error: {0}")]
    Csr(#[from] CsrError),
    #[error("Certificate error: {0}")]
    Certificate(#[from] CertificateError),
    #[error("DNS provider error: {0}")]
    Dns(#[from] DnsError),
    #[error("Certificate store error: {0}")]
    Store(#[from] StoreError),
    #[error("Operation cancelled")]
    Cancelled,
    #[error("Deadline exceeded")]
    DeadlineExceeded,
    #[error("Gave up polling {url} after {attempts} attempts")]
    PollExhausted { url: String, attempts: u32 },
}

pub type Result<T> = std::result::Result<T, AcmeError>;

impl AcmeError {
    /// 取得伺服器回傳的問題文件（若有），會穿透 `Order` 包裝。
    pub fn problem(&self) -> Option<&Problem> {
        match self {
            AcmeError::Problem(problem) => Some(problem),
            AcmeError::ValidationFailed { problem, .. } => problem.as_ref(),
            AcmeError::Order(inner) => inner.problem(),
            _ => None,
        }
    }

    pub fn transport<E: StdError + Send + Sync + 'static>(err: E) -> Self {
        AcmeError::Transport(Box::new(err))
    }

    /// 是否因取消或期限而中止。
    pub fn is_interrupted(&self) -> bool {
        matches!(self, AcmeError::Cancelled | AcmeError::DeadlineExceeded)
    }
}

impl From<serde_json::Error> for AcmeError {
    fn from(err: serde_json::Error) -> Self {
        AcmeError::Protocol(format!("invalid JSON: {}", err))
    }
}
