//! # ACME DNS-01 Certificate Library
//!
//! 本庫透過 DNS-01 挑戰向 ACME 服務（例如 Let's Encrypt）申請與續約 TLS 憑證。
//! 協定流程集中在 [`session::Session`]，DNS 與憑證儲存是可替換的協作者：
//!
//! - **session**: 目錄、nonce、JWS 簽名與 Key ID 的管理，以及完整的申請流程。
//! - **account** / **order** / **challenge**: 帳戶註冊、訂單狀態機與 dns-01 挑戰。
//! - **dns**: [`dns::DnsProvider`] 介面與保證移除記錄的 [`dns::TxtRecordGuard`]；
//!   內建 [`cloudflare::CloudflareDns`]。
//! - **store**: [`store::CertStore`] 介面，內建檔案與記憶體兩種實作。
//!
//! ## 特性
//!
//! - 每個簽名請求使用一個全新的 nonce，`badNonce` 時自動重送一次
//! - 有上限、可退避、可取消的狀態輪詢
//! - 不論驗證成功、失敗或被取消，發布的 TXT 記錄都會被移除
//! - 伺服器的問題文件（problem document）會以結構化錯誤回傳
//!
//! ## 示例
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use acme_dns01::{
//!     cloudflare::CloudflareDns,
//!     session::{Issuance, SessionBuilder, LETS_ENCRYPT_STAGING},
//!     store::FileCertStore,
//! };
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let dns = Arc::new(CloudflareDns::new("your-cloudflare-api-token"));
//!     let store = Arc::new(FileCertStore::open("/etc/ssl/acme")?);
//!
//!     let mut session = SessionBuilder::new(dns, store)
//!         .directory_url(LETS_ENCRYPT_STAGING)
//!         .contacts(&["admin@example.com"])
//!         .build()?;
//!
//!     match session.fetch_or_renew_cert(&["example.com", "*.example.com"])? {
//!         Issuance::Issued { certificate_pem, .. } => println!("{}", certificate_pem),
//!         Issuance::Skipped { not_after } => println!("still valid until {}", not_after),
//!     }
//!     Ok(())
//! }
//! ```

pub mod account;
pub mod base64;
pub mod certificate;
pub mod challenge;
pub mod cloudflare;
pub mod csr;
pub mod directory;
pub mod dns;
pub mod error;
pub mod jwk;
pub mod jws;
pub mod key_pair;
pub mod logger;
pub mod nonce;
pub mod order;
pub mod payload;
pub mod poll;
pub mod problem;
pub mod protection;
pub mod session;
pub mod signature;
pub mod store;
pub mod transport;

#[cfg(test)]
mod testing;

pub use error::{AcmeError, Result};
pub use session::{Issuance, Session, SessionBuilder};
