//! HTTP 傳輸層。
//!
//! 工作階段一次只透過 [`Transport`] 送出一個請求；回應中的 `Replay-Nonce`、
//! `Location` 與 `Retry-After` 標頭在這裡取出，非 2xx 的問題文件會被解碼成
//! [`AcmeError::Problem`]，而不是不透明的傳輸錯誤。

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::{
    blocking::{Client, Response},
    header::{HeaderMap, CONTENT_TYPE, LOCATION, RETRY_AFTER, USER_AGENT},
};
use serde::de::DeserializeOwned;

use crate::{
    error::{AcmeError, Result},
    problem::Problem,
};

pub const JOSE_CONTENT_TYPE: &str = "application/jose+json";
pub const PROBLEM_CONTENT_TYPE: &str = "application/problem+json";
const REPLAY_NONCE: &str = "Replay-Nonce";

/// 已完整讀取的 HTTP 回應。
#[derive(Debug, Clone, Default)]
pub struct HttpResponse {
    pub status: u16,
    pub replay_nonce: Option<String>,
    pub location: Option<String>,
    pub content_type: Option<String>,
    /// `Retry-After` 換算後的秒數。
    pub retry_after: Option<u64>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// 將回應本體解析為 JSON，失敗時回傳 [`AcmeError::Protocol`]。
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(|e| {
            AcmeError::Protocol(format!("unexpected response body ({}): {}", e, self.text()))
        })
    }

    /// 嘗試將本體解析為問題文件。
    ///
    /// 伺服器不一定會設定 `application/problem+json`，因此只要本體含有 `type` 欄位就接受。
    pub fn problem(&self) -> Option<Problem> {
        let is_problem_type = self
            .content_type
            .as_deref()
            .is_some_and(|ct| ct.starts_with(PROBLEM_CONTENT_TYPE));
        let value: serde_json::Value = serde_json::from_slice(&self.body).ok()?;
        if !is_problem_type && value.get("type").is_none() {
            return None;
        }
        let mut problem: Problem = serde_json::from_value(value).ok()?;
        if problem.status.is_none() {
            problem.status = Some(self.status);
        }
        problem.retry_after = self.retry_after;
        Some(problem)
    }

    /// 2xx 原樣回傳；其餘狀態碼轉換為結構化錯誤。
    pub fn error_for_status(self) -> Result<Self> {
        if self.is_success() {
            return Ok(self);
        }
        match self.problem() {
            Some(problem) => Err(AcmeError::Problem(problem)),
            None => Err(AcmeError::Protocol(format!(
                "HTTP {}: {}",
                self.status,
                self.text()
            ))),
        }
    }
}

/// 執行 HTTP 請求的能力。正式環境使用 [`ReqwestTransport`]，測試可替換為腳本化實作。
pub trait Transport: Send + Sync {
    /// 不需簽名的 GET（目錄取得）。
    fn get(&self, url: &str) -> Result<HttpResponse>;

    /// 不需簽名的 HEAD（取得新 nonce）。
    fn head(&self, url: &str) -> Result<HttpResponse>;

    /// 以 `application/jose+json` 送出已簽名的 JWS。
    fn post_jose(&self, url: &str, body: String) -> Result<HttpResponse>;
}

impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    fn get(&self, url: &str) -> Result<HttpResponse> {
        (**self).get(url)
    }

    fn head(&self, url: &str) -> Result<HttpResponse> {
        (**self).head(url)
    }

    fn post_jose(&self, url: &str, body: String) -> Result<HttpResponse> {
        (**self).post_jose(url, body)
    }
}

/// 以 `reqwest` 阻塞式用戶端實作的傳輸層。
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    const USER_AGENT: &'static str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

    /// 建立傳輸層，`timeout` 限制單一請求的總耗時。
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(AcmeError::transport)?;
        Ok(Self { client })
    }

    /// 使用呼叫者自行設定的 `reqwest` 用戶端（例如自訂 CA）。
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    fn read(response: Response) -> Result<HttpResponse> {
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response.bytes().map_err(AcmeError::transport)?.to_vec();

        Ok(HttpResponse {
            status,
            replay_nonce: header_string(&headers, REPLAY_NONCE),
            location: header_string(&headers, LOCATION.as_str()),
            content_type: header_string(&headers, CONTENT_TYPE.as_str()),
            retry_after: header_string(&headers, RETRY_AFTER.as_str())
                .and_then(|value| parse_retry_after(&value, Utc::now())),
            body,
        })
    }
}

impl Transport for ReqwestTransport {
    fn get(&self, url: &str) -> Result<HttpResponse> {
        let response = self
            .client
            .get(url)
            .header(USER_AGENT, Self::USER_AGENT)
            .send()
            .map_err(AcmeError::transport)?;
        Self::read(response)
    }

    fn head(&self, url: &str) -> Result<HttpResponse> {
        let response = self
            .client
            .head(url)
            .header(USER_AGENT, Self::USER_AGENT)
            .send()
            .map_err(AcmeError::transport)?;
        Self::read(response)
    }

    fn post_jose(&self, url: &str, body: String) -> Result<HttpResponse> {
        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, JOSE_CONTENT_TYPE)
            .header(USER_AGENT, Self::USER_AGENT)
            .body(body)
            .send()
            .map_err(AcmeError::transport)?;
        Self::read(response)
    }
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToString::to_string)
}

/// `Retry-After` 可以是秒數或 HTTP 日期。
pub(crate) fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<u64> {
    if let Ok(secs) = value.trim().parse::<u64>() {
        return Some(secs);
    }
    let at = DateTime::parse_from_rfc2822(value.trim()).ok()?;
    let secs = at.with_timezone(&Utc).signed_duration_since(now).num_seconds();
    Some(secs.max(0) as u64)
}
