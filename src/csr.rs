use std::result;

use openssl::{
    hash::MessageDigest,
    stack::Stack,
    x509::{extension::SubjectAlternativeName, X509NameBuilder, X509Req},
};
use thiserror::Error;

use crate::key_pair::KeyPair;

/// 用於描述建立 CSR（證書簽名請求）過程中可能發生的錯誤。
#[derive(Debug, Error)]
pub enum CsrError {
    #[error("Openssl error: {0}")]
    Openssl(#[from] openssl::error::ErrorStack),
    #[error("No SAN entries")]
    NoSanEntries,
}

type Result<T> = result::Result<T, CsrError>;

/// CSR 建構器，產生帶有主體替代名稱 (SAN) 擴展的證書簽名請求。
///
/// 第一個域名同時作為 CN；萬用字元域名原樣放入 SAN。
/// 超過 64 位元組的域名無法放進 CN，此時只帶 SAN。
#[derive(Debug, Default)]
pub struct CSR {
    san_entries: Vec<String>,
}

impl CSR {
    const MAX_CN_LEN: usize = 64;

    pub fn new() -> Self {
        Self::default()
    }

    /// 新增一個 DNS 主體替代名稱，重複的名稱會被忽略。
    pub fn set_san(mut self, dns_name: &str) -> Self {
        let dns_name = dns_name.trim().to_string();
        if !dns_name.is_empty() && !self.san_entries.contains(&dns_name) {
            self.san_entries.push(dns_name);
        }
        self
    }

    pub fn set_sans<S: AsRef<str>>(self, dns_names: &[S]) -> Self {
        dns_names
            .iter()
            .fold(self, |csr, name| csr.set_san(name.as_ref()))
    }

    /// 以指定的金鑰對簽署並回傳 CSR。
    ///
    /// # 錯誤
    ///
    /// 若未設定 SAN 項目回傳 `CsrError::NoSanEntries`，OpenSSL 錯誤則原樣傳回。
    pub fn build(self, key_pair: &KeyPair) -> Result<X509Req> {
        let first = self.san_entries.first().ok_or(CsrError::NoSanEntries)?;

        let mut req_builder = X509Req::builder()?;

        if first.len() <= Self::MAX_CN_LEN {
            let mut name = X509NameBuilder::new()?;
            name.append_entry_by_text("CN", first)?;
            req_builder.set_subject_name(&name.build())?;
        }

        let mut san_builder = SubjectAlternativeName::new();
        for entry in &self.san_entries {
            san_builder.dns(entry);
        }
        let san_extension = san_builder.build(&req_builder.x509v3_context(None))?;

        let mut stack = Stack::new()?;
        stack.push(san_extension)?;
        req_builder.add_extensions(&stack)?;

        req_builder.set_pubkey(&key_pair.pri_key)?;
        req_builder.sign(&key_pair.pri_key, MessageDigest::sha256())?;

        Ok(req_builder.build())
    }

    /// 建立並回傳 DER 編碼，供 finalize 載荷使用。
    pub fn build_der(self, key_pair: &KeyPair) -> Result<Vec<u8>> {
        Ok(self.build(key_pair)?.to_der()?)
    }
}
