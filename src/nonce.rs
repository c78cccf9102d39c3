use crate::{
    error::{AcmeError, Result},
    transport::{HttpResponse, Transport},
};

/// 持有目前唯一一個尚未使用的 nonce。
///
/// 每個簽名請求以 [`NonceTracker::take`] 取走 nonce，之後不論成功或錯誤，
/// 只要回應帶有 `Replay-Nonce` 就以 [`NonceTracker::observe`] 補上。
#[derive(Debug, Default)]
pub struct NonceTracker {
    current: Option<String>,
}

impl NonceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// 回傳目前持有的 nonce；從未取得過時回傳 [`AcmeError::NoNonce`]。
    pub fn current(&self) -> Result<&str> {
        self.current.as_deref().ok_or(AcmeError::NoNonce)
    }

    pub fn has_nonce(&self) -> bool {
        self.current.is_some()
    }

    /// 取走 nonce。取走後在下一個回應補上之前，追蹤器為空。
    pub fn take(&mut self) -> Result<String> {
        self.current.take().ok_or(AcmeError::NoNonce)
    }

    pub fn replace(&mut self, nonce: impl Into<String>) {
        self.current = Some(nonce.into());
    }

    /// 若回應帶有新的 nonce 就替換，回傳是否有替換。
    pub fn observe(&mut self, response: &HttpResponse) -> bool {
        match &response.replay_nonce {
            Some(nonce) => {
                self.replace(nonce.clone());
                true
            }
            None => false,
        }
    }
}

/// 透過 HEAD 請求 `newNonce` 取得一個全新的 nonce。
pub fn fetch_nonce(transport: &dyn Transport, new_nonce_url: &str) -> Result<String> {
    let response = transport.head(new_nonce_url)?;
    if !response.is_success() {
        return Err(response
            .error_for_status()
            .err()
            .unwrap_or_else(|| AcmeError::Protocol("newNonce request failed".into())));
    }
    response
        .replay_nonce
        .ok_or_else(|| AcmeError::Protocol("No Replay-Nonce header found in response".into()))
}
