//! 模塊提供 ACME 帳戶註冊與 Key ID 取得的功能。

use log::Level;
use serde::Deserialize;

use crate::{
    error::{AcmeError, Result},
    payload::{NewAccountPayload, PayloadT},
    session::Session,
};

/// 伺服器回傳的帳戶物件。
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Account {
    /// `valid`、`deactivated` 或 `revoked`。
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub contact: Vec<String>,
    #[serde(default)]
    pub orders: Option<String>,
    /// 帳戶 URL，同時作為之後所有簽名請求的 `kid`。
    #[serde(skip)]
    pub key_id: String,
}

impl Account {
    fn is_usable(&self) -> bool {
        !matches!(self.status.as_deref(), Some("deactivated" | "revoked"))
    }
}

impl Session {
    /// 以嵌入的公鑰向 `newAccount` 註冊（或找回）帳戶，回傳 Key ID。
    ///
    /// 不論伺服器是新建帳戶（201）還是以公鑰找到既有帳戶（200），
    /// Key ID 都取自回應的 `Location` 標頭，因此重複呼叫會得到相同結果。
    /// 呼叫後所有簽名請求都改用 Key ID。
    pub fn ensure_account<S: AsRef<str>>(&mut self, contacts: &[S]) -> Result<String> {
        if self.directory.meta.as_ref().is_some_and(|m| m.external_account_required) {
            return Err(AcmeError::Configuration(
                "server requires external account binding".into(),
            ));
        }
        if let Some(tos) = self.directory.meta.as_ref().and_then(|m| m.terms_of_service.as_deref()) {
            self.log(Level::Debug, &format!("agreeing to terms of service {}", tos));
        }

        let payload = NewAccountPayload::new(contacts).to_base64()?;
        let new_account = self.directory.new_account.clone();
        let response = self.signed_request(&new_account, Some(&payload), true)?;

        let key_id = response
            .location
            .clone()
            .ok_or_else(|| AcmeError::Protocol("No Location header in newAccount response".into()))?;
        let mut account: Account = if response.body.is_empty() {
            Account::default()
        } else {
            response.json()?
        };
        account.key_id = key_id.clone();

        if !account.is_usable() {
            return Err(AcmeError::Protocol(format!(
                "account {} is {}",
                key_id,
                account.status.as_deref().unwrap_or_default()
            )));
        }

        let created = response.status == 201;
        self.log(
            Level::Info,
            &format!(
                "{} account {}",
                if created { "created" } else { "found existing" },
                key_id
            ),
        );
        self.account = Some(account);
        Ok(key_id)
    }

    /// 目前的帳戶；尚未呼叫 [`Session::ensure_account`] 時為 `None`。
    pub fn account(&self) -> Option<&Account> {
        self.account.as_ref()
    }

    pub fn key_id(&self) -> Option<&str> {
        self.account.as_ref().map(|a| a.key_id.as_str())
    }
}
