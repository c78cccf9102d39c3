//! DNS-01 挑戰所需的 TXT 記錄發布介面。

use std::sync::Arc;

use log::Level;
use thiserror::Error;

use crate::logger::Logger;

/// DNS 供應商操作的錯誤。
#[derive(Debug, Error)]
pub enum DnsError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Cloudflare API error: {0}")]
    Cloudflare(String),
    #[error("No DNS zone found for {0}")]
    ZoneNotFound(String),
    #[error("Invalid domain: {0}")]
    InvalidDomain(String),
    #[error("{0}")]
    Other(String),
}

/// 發布與移除 `_acme-challenge` TXT 記錄的能力。
///
/// 實作必須容許對同一域名重複呼叫：移除一定會被嘗試，即使新增失敗。
pub trait DnsProvider: Send + Sync {
    /// 在 `_acme-challenge.<domain>` 發布 TXT 記錄，值為 `value`。
    fn add_text_record(&self, domain: &str, value: &str) -> Result<(), DnsError>;

    /// 移除同一筆記錄。
    fn remove_text_record(&self, domain: &str, value: &str) -> Result<(), DnsError>;
}

/// 挑戰記錄的完整名稱；萬用字元域名去掉開頭的 `*.`。
pub fn challenge_record_name(domain: &str) -> String {
    let domain = domain.trim().trim_end_matches('.');
    let domain = domain.strip_prefix("*.").unwrap_or(domain);
    format!("_acme-challenge.{}", domain)
}

/// 已發布的 TXT 記錄；離開作用域時保證移除恰好一次。
///
/// 正常流程呼叫 [`TxtRecordGuard::release`] 以取得移除結果，
/// 提早返回（錯誤、取消）時由 `Drop` 代為移除並記錄失敗。
pub struct TxtRecordGuard {
    provider: Arc<dyn DnsProvider>,
    logger: Option<Arc<dyn Logger>>,
    domain: String,
    value: String,
    released: bool,
}

impl TxtRecordGuard {
    /// 發布記錄。新增失敗時仍會嘗試移除一次，然後回傳新增的錯誤。
    pub fn publish(
        provider: Arc<dyn DnsProvider>,
        logger: Option<Arc<dyn Logger>>,
        domain: &str,
        value: &str,
    ) -> Result<Self, DnsError> {
        if let Err(err) = provider.add_text_record(domain, value) {
            if let Err(cleanup) = provider.remove_text_record(domain, value) {
                if let Some(logger) = &logger {
                    logger.log(
                        Level::Warn,
                        &format!("cleanup after failed publish for {} failed: {}", domain, cleanup),
                    );
                }
            }
            return Err(err);
        }

        Ok(Self {
            provider,
            logger,
            domain: domain.to_string(),
            value: value.to_string(),
            released: false,
        })
    }

    /// 移除記錄並回傳結果。
    pub fn release(mut self) -> Result<(), DnsError> {
        self.released = true;
        self.provider.remove_text_record(&self.domain, &self.value)
    }
}

impl Drop for TxtRecordGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Err(err) = self.provider.remove_text_record(&self.domain, &self.value) {
            if let Some(logger) = &self.logger {
                logger.log(
                    Level::Warn,
                    &format!("failed to remove TXT record for {}: {}", self.domain, err),
                );
            }
        }
    }
}
