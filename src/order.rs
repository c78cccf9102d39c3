use std::fmt;

use log::Level;
use serde::Deserialize;

use crate::{
    error::{AcmeError, Result},
    payload::{FinalizeOrderPayload, Identifier, NewOrderPayload, PayloadT},
    poll::{poll_until, PollStep},
    problem::Problem,
    session::Session,
};

/// 訂單狀態：`pending` → `ready` → `processing` → `valid`，任何階段都可能變成 `invalid`。
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Ready,
    Processing,
    Valid,
    Invalid,
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Processing => "processing",
            Self::Valid => "valid",
            Self::Invalid => "invalid",
        };
        f.write_str(s)
    }
}

/// 表示訂單資料。
#[derive(Debug, Clone, Deserialize)]
pub struct Order {
    /// 訂單當前狀態
    pub status: OrderStatus,
    /// 過期時間（RFC 3339 字串）
    #[serde(default)]
    pub expires: Option<String>,
    /// 證書主題（Domain）識別符
    pub identifiers: Vec<Identifier>,
    /// 授權 URL 列表，每個識別項一個
    pub authorizations: Vec<String>,
    /// 最終確認 URL
    pub finalize: String,
    /// 憑證 URL（僅在有效時存在）
    #[serde(default)]
    pub certificate: Option<String>,
    /// 訂單失敗時的問題文件
    #[serde(default)]
    pub error: Option<Problem>,
    /// 伺服器回傳的訂單 URL（取自 `Location`）
    #[serde(skip)]
    pub url: String,
}

impl Session {
    /// 向 `newOrder` 建立訂單，每個域名一個 DNS 識別項。
    ///
    /// 失敗（非 2xx、問題文件或缺少 `Location`）時回傳 [`AcmeError::Order`]。
    pub fn cert_apply<S: AsRef<str>>(&mut self, domains: &[S]) -> Result<Order> {
        self.new_order(domains).map_err(|err| {
            if err.is_interrupted() {
                err
            } else {
                AcmeError::Order(Box::new(err))
            }
        })
    }

    fn new_order<S: AsRef<str>>(&mut self, domains: &[S]) -> Result<Order> {
        let payload = NewOrderPayload::new(domains).to_base64()?;
        let new_order = self.directory.new_order.clone();
        let response = self.post(&new_order, &payload)?;

        let url = response
            .location
            .clone()
            .ok_or_else(|| AcmeError::Protocol("No Location header in newOrder response".into()))?;
        let mut order: Order = response.json()?;
        order.url = url;

        self.log(
            Level::Info,
            &format!(
                "order {} is {} with {} authorization(s)",
                order.url,
                order.status,
                order.authorizations.len()
            ),
        );
        Ok(order)
    }

    /// 以 POST-as-GET 重新取得訂單。
    pub fn fetch_order(&mut self, url: &str) -> Result<Order> {
        Ok(self.fetch_order_with_retry(url)?.0)
    }

    fn fetch_order_with_retry(&mut self, url: &str) -> Result<(Order, Option<u64>)> {
        let (mut order, retry_after): (Order, _) = self.fetch_resource(url)?;
        order.url = url.to_string();
        Ok((order, retry_after))
    }

    /// 輪詢訂單直到狀態等於 `target`。
    ///
    /// `invalid` 回傳 [`AcmeError::ValidationFailed`]；越過目標狀態（例如等待 `ready`
    /// 卻看到 `valid`）代表訂單已在別處完成，回傳協定錯誤。
    pub fn poll_order(&mut self, url: &str, target: OrderStatus) -> Result<Order> {
        let policy = self.config.poll.clone();
        let interrupt = self.interrupt.clone();
        poll_until(&policy, &interrupt, url, |attempt| {
            let (order, retry_after) = self.fetch_order_with_retry(url)?;
            self.log(
                Level::Debug,
                &format!("order {} is {} (check {})", url, order.status, attempt + 1),
            );
            match (order.status, target) {
                (status, target) if status == target => Ok(PollStep::Done(order)),
                (OrderStatus::Invalid, _) => Err(AcmeError::ValidationFailed {
                    url: url.to_string(),
                    problem: order.error,
                }),
                (OrderStatus::Valid, _) => Err(AcmeError::Protocol(format!(
                    "order {} became valid before it was finalized",
                    url
                ))),
                _ => Ok(PollStep::Pending { retry_after }),
            }
        })
    }

    /// 提交 CSR（DER）。只有 `ready` 的訂單可以 finalize，也就是所有授權都已 `valid`。
    pub fn finalize(&mut self, order: &Order, csr_der: &[u8]) -> Result<Order> {
        if order.status != OrderStatus::Ready {
            return Err(AcmeError::OrderNotReady {
                url: order.url.clone(),
                status: order.status.to_string(),
            });
        }
        let payload = FinalizeOrderPayload::new(csr_der).to_base64()?;
        let mut updated: Order = self.post(&order.finalize, &payload)?.json()?;
        updated.url = order.url.clone();
        self.log(Level::Info, &format!("order {} finalized, now {}", order.url, updated.status));
        Ok(updated)
    }

    /// 以 POST-as-GET 下載 PEM 憑證鏈。訂單必須已是 `valid`。
    pub fn download_certificate(&mut self, order: &Order) -> Result<String> {
        let url = match (&order.status, &order.certificate) {
            (OrderStatus::Valid, Some(url)) => url.clone(),
            _ => {
                return Err(AcmeError::Protocol(format!(
                    "order {} has no certificate to download (status: {})",
                    order.url, order.status
                )))
            }
        };
        let response = self.post_as_get(&url)?;
        Ok(response.text())
    }
}
