use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::{
    error::{AcmeError, Result},
    transport::Transport,
};

/// ACME 目錄：各操作名稱對應的絕對 URL，每個工作階段取得一次。
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Directory {
    /// 用於取得新的 nonce 值的 API 路徑。
    #[serde(rename = "newNonce")]
    pub new_nonce: String,
    /// 用於新帳號註冊的 API 路徑。
    #[serde(rename = "newAccount")]
    pub new_account: String,
    /// 用於建立訂單的 API 路徑。
    #[serde(rename = "newOrder")]
    pub new_order: String,
    #[serde(rename = "revokeCert", default, skip_serializing_if = "Option::is_none")]
    pub revoke_cert: Option<String>,
    #[serde(rename = "keyChange", default, skip_serializing_if = "Option::is_none")]
    pub key_change: Option<String>,
    #[serde(rename = "renewalInfo", default, skip_serializing_if = "Option::is_none")]
    pub renewal_info: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<DirectoryMeta>,
}

/// 目錄的 `meta` 區塊。
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Default)]
pub struct DirectoryMeta {
    #[serde(rename = "termsOfService", default, skip_serializing_if = "Option::is_none")]
    pub terms_of_service: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(rename = "externalAccountRequired", default)]
    pub external_account_required: bool,
}

impl Directory {
    /// 以一次未簽名的 GET 取得並解析目錄，不重試。
    ///
    /// # 回傳
    ///
    /// 網路失敗回傳 [`AcmeError::Transport`]，內容不完整回傳 [`AcmeError::Protocol`]。
    pub fn fetch(transport: &dyn Transport, url: &str) -> Result<Self> {
        let response = transport.get(url)?.error_for_status()?;
        Self::parse(&response.body)
    }

    /// 解析目錄 JSON，並確認所有 URL 都是絕對的 http(s) URL。
    pub fn parse(json: &[u8]) -> Result<Self> {
        let directory: Directory = serde_json::from_slice(json)
            .map_err(|e| AcmeError::Protocol(format!("malformed directory: {}", e)))?;

        let entries = [
            ("newNonce", Some(&directory.new_nonce)),
            ("newAccount", Some(&directory.new_account)),
            ("newOrder", Some(&directory.new_order)),
            ("revokeCert", directory.revoke_cert.as_ref()),
            ("keyChange", directory.key_change.as_ref()),
            ("renewalInfo", directory.renewal_info.as_ref()),
        ];
        for (name, url) in entries {
            if let Some(url) = url {
                check_absolute(name, url)?;
            }
        }

        Ok(directory)
    }
}

fn check_absolute(name: &str, url: &str) -> Result<()> {
    match Url::parse(url) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => Ok(()),
        _ => Err(AcmeError::Protocol(format!(
            "directory entry {} is not an absolute URL: {:?}",
            name, url
        ))),
    }
}
