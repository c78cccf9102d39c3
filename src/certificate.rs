use chrono::{DateTime, Duration, Utc};
use openssl::{asn1::Asn1TimeRef, nid::Nid, x509::X509};
use thiserror::Error;

/// 證書相關操作可能出現的錯誤類型
#[derive(Debug, Error)]
pub enum CertificateError {
    #[error("Failed to parse certificate: {0}")]
    Parse(#[from] openssl::error::ErrorStack),
    #[error("PEM contains no certificate")]
    Empty,
    #[error("Invalid expiration timestamp")]
    InvalidTimestamp,
}

type Result<T> = std::result::Result<T, CertificateError>;

/// X.509 證書封裝結構，提供基本的證書解析與續約檢查功能
pub struct Certificate {
    /// 憑證鏈中的第一張（葉）憑證
    pub cert: X509,
}

impl Certificate {
    /// 解析 PEM；若為憑證鏈，只取第一張。
    pub fn from_pem(pem: &str) -> Result<Self> {
        let cert = X509::stack_from_pem(pem.as_bytes())?
            .into_iter()
            .next()
            .ok_or(CertificateError::Empty)?;
        Ok(Certificate { cert })
    }

    /// 憑證到期時間。
    pub fn not_after(&self) -> Result<DateTime<Utc>> {
        asn1_to_datetime(self.cert.not_after())
    }

    /// 憑證在 `window` 內到期（或已過期）時回傳 `true`。
    pub fn expires_within(&self, window: Duration) -> Result<bool> {
        Ok(self.not_after()? - Utc::now() <= window)
    }

    /// SAN 中的 DNS 名稱；沒有 SAN 時退回 CN。
    pub fn dns_names(&self) -> Vec<String> {
        if let Some(names) = self.cert.subject_alt_names() {
            let dns: Vec<String> = names
                .iter()
                .filter_map(|name| name.dnsname().map(ToString::to_string))
                .collect();
            if !dns.is_empty() {
                return dns;
            }
        }
        self.cert
            .subject_name()
            .entries_by_nid(Nid::COMMONNAME)
            .filter_map(|entry| entry.data().as_utf8().ok().map(|s| s.to_string()))
            .collect()
    }
}

/// 以 Unix epoch 為基準計算 ASN.1 時間對應的 UTC 時間。
fn asn1_to_datetime(time: &Asn1TimeRef) -> Result<DateTime<Utc>> {
    let epoch = openssl::asn1::Asn1Time::from_unix(0)?;
    let diff = epoch.diff(time)?;
    let secs = diff.days as i64 * 86400 + diff.secs as i64;
    DateTime::from_timestamp(secs, 0).ok_or(CertificateError::InvalidTimestamp)
}
