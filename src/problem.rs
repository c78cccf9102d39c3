//! ACME 問題文件（RFC 7807 / RFC 8555 第 6.7 節）。

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::payload::Identifier;

const ACME_ERROR_PREFIX: &str = "urn:ietf:params:acme:error:";

/// 伺服器回傳的問題文件。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Problem {
    #[serde(rename = "type", default)]
    pub type_: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    /// 訂單或授權層級的錯誤可能針對個別識別項附帶子問題。
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subproblems: Vec<Subproblem>,
    /// 由回應的 `Retry-After` 標頭帶入，不屬於文件本身。
    #[serde(skip)]
    pub retry_after: Option<u64>,
}

/// 針對單一識別項的子問題。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subproblem {
    #[serde(rename = "type", default)]
    pub type_: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<Identifier>,
}

/// 常見的 ACME 錯誤類型，其餘歸入 `Other`。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProblemKind {
    BadNonce,
    RateLimited,
    Unauthorized,
    Dns,
    Connection,
    IncorrectResponse,
    Malformed,
    AccountDoesNotExist,
    RejectedIdentifier,
    ServerInternal,
    Other,
}

impl Problem {
    pub fn kind(&self) -> ProblemKind {
        match self.type_.strip_prefix(ACME_ERROR_PREFIX) {
            Some("badNonce") => ProblemKind::BadNonce,
            Some("rateLimited") => ProblemKind::RateLimited,
            Some("unauthorized") => ProblemKind::Unauthorized,
            Some("dns") => ProblemKind::Dns,
            Some("connection") => ProblemKind::Connection,
            Some("incorrectResponse") => ProblemKind::IncorrectResponse,
            Some("malformed") => ProblemKind::Malformed,
            Some("accountDoesNotExist") => ProblemKind::AccountDoesNotExist,
            Some("rejectedIdentifier") => ProblemKind::RejectedIdentifier,
            Some("serverInternal") => ProblemKind::ServerInternal,
            _ => ProblemKind::Other,
        }
    }

    pub fn is_bad_nonce(&self) -> bool {
        self.kind() == ProblemKind::BadNonce
    }

    pub fn is_rate_limited(&self) -> bool {
        self.kind() == ProblemKind::RateLimited
    }
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let type_ = if self.type_.is_empty() {
            "about:blank"
        } else {
            &self.type_
        };
        write!(f, "{}", type_)?;
        if let Some(status) = self.status {
            write!(f, " ({})", status)?;
        }
        match (&self.detail, &self.title) {
            (Some(detail), _) => write!(f, ": {}", detail)?,
            (None, Some(title)) => write!(f, ": {}", title)?,
            (None, None) => {}
        }
        for sub in &self.subproblems {
            let who = sub
                .identifier
                .as_ref()
                .map(|id| id.value.as_str())
                .unwrap_or("?");
            write!(
                f,
                "; [{}] {}: {}",
                who,
                sub.type_,
                sub.detail.as_deref().unwrap_or("")
            )?;
        }
        if let Some(secs) = self.retry_after {
            write!(f, " (retry after {}s)", secs)?;
        }
        Ok(())
    }
}
