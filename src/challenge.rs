use std::fmt;

use log::Level;
use openssl::hash::{hash, MessageDigest};
use serde::Deserialize;

use crate::{
    base64::Base64,
    dns::TxtRecordGuard,
    error::{AcmeError, Result},
    key_pair::{KeyError, KeyPair},
    payload::{ChallengeReadyPayload, Identifier, PayloadT},
    poll::{poll_until, PollStep},
    problem::Problem,
    session::Session,
};

/// 表示 ACME 挑戰的類型，可用於選擇相應的驗證策略。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(from = "String")]
pub enum ChallengeType {
    Http01,
    Dns01,
    TlsAlpn01,
    /// 本用戶端不認識的類型，原樣保留。
    Other(String),
}

impl From<String> for ChallengeType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "http-01" => Self::Http01,
            "dns-01" => Self::Dns01,
            "tls-alpn-01" => Self::TlsAlpn01,
            _ => Self::Other(s),
        }
    }
}

impl ChallengeType {
    /// 返回挑戰類型對應的字串表示。
    pub fn as_str(&self) -> &str {
        match self {
            Self::Http01 => "http-01",
            Self::Dns01 => "dns-01",
            Self::TlsAlpn01 => "tls-alpn-01",
            Self::Other(s) => s,
        }
    }
}

impl fmt::Display for ChallengeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 挑戰狀態：`pending` → `processing` → `valid` | `invalid`。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeStatus {
    Pending,
    Processing,
    Valid,
    Invalid,
}

/// 表示一個 ACME 驗證挑戰。
#[derive(Debug, Clone, Deserialize)]
pub struct Challenge {
    /// 驗證挑戰的類型
    #[serde(rename = "type")]
    pub challenge_type: ChallengeType,
    /// 驗證挑戰的 URL
    pub url: String,
    /// 挑戰 token，用於生成 key authorization
    #[serde(default)]
    pub token: String,
    pub status: ChallengeStatus,
    /// 驗證成功後可能返回的驗證時間
    #[serde(default)]
    pub validated: Option<String>,
    /// 驗證失敗時伺服器附上的問題文件
    #[serde(default)]
    pub error: Option<Problem>,
}

/// 授權狀態。只有 `pending` 會再變化，其餘都是終止狀態。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthorizationStatus {
    Pending,
    Valid,
    Invalid,
    Deactivated,
    Expired,
    Revoked,
}

/// 一個識別項的授權，列出伺服器提供的挑戰。
#[derive(Debug, Clone, Deserialize)]
pub struct Authorization {
    pub identifier: Identifier,
    pub status: AuthorizationStatus,
    #[serde(default)]
    pub expires: Option<String>,
    #[serde(default)]
    pub challenges: Vec<Challenge>,
    /// 萬用字元授權的識別項不含 `*.`，由此欄位標示。
    #[serde(default)]
    pub wildcard: bool,
    #[serde(skip)]
    pub url: String,
}

impl Authorization {
    /// 選出 dns-01 挑戰；沒有提供時本用戶端無法驗證此域名。
    pub fn dns01(&self) -> Result<&Challenge> {
        self.challenges
            .iter()
            .find(|c| c.challenge_type == ChallengeType::Dns01)
            .ok_or_else(|| {
                let offered: Vec<&str> = self.challenges.iter().map(|c| c.challenge_type.as_str()).collect();
                AcmeError::Challenge(format!(
                    "no dns-01 challenge offered for {} (offered: {})",
                    self.identifier.value,
                    offered.join(", ")
                ))
            })
    }

    /// 授權失敗時，從挑戰中找出伺服器附上的問題文件。
    fn problem(&self) -> Option<Problem> {
        self.challenges.iter().find_map(|c| c.error.clone())
    }
}

/// `token.thumbprint`，其中 thumbprint 為帳戶公鑰的 RFC 7638 縮影。
pub fn key_authorization(account_key: &KeyPair, token: &str) -> std::result::Result<String, KeyError> {
    Ok(format!("{}.{}", token, account_key.thumbprint()?))
}

/// 根據 key authorization 計算 DNS TXT 記錄值，使用 SHA-256 與 URL-safe Base64 編碼。
pub fn dns_txt_value(account_key: &KeyPair, token: &str) -> std::result::Result<String, KeyError> {
    let key_authorization = key_authorization(account_key, token)?;
    let digest = hash(MessageDigest::sha256(), key_authorization.as_bytes())?;
    Ok(Base64::new(digest).base64_url())
}

impl Session {
    /// 以 POST-as-GET 取得一個授權及其挑戰。
    pub fn fetch_authorization(&mut self, url: &str) -> Result<Authorization> {
        Ok(self.fetch_authorization_with_retry(url)?.0)
    }

    fn fetch_authorization_with_retry(&mut self, url: &str) -> Result<(Authorization, Option<u64>)> {
        let (mut authorization, retry_after): (Authorization, _) = self.fetch_resource(url)?;
        authorization.url = url.to_string();
        Ok((authorization, retry_after))
    }

    /// 通知伺服器 TXT 記錄已就緒，伺服器會非同步開始驗證。
    pub fn challenge_ready(&mut self, challenge_url: &str) -> Result<Challenge> {
        let payload = ChallengeReadyPayload::default().to_base64()?;
        Ok(self.post(challenge_url, &payload)?.json()?)
    }

    /// 輪詢授權直到 `valid`；任何其他終止狀態都是驗證失敗。
    pub fn poll_authorization(&mut self, url: &str) -> Result<Authorization> {
        let policy = self.config.poll.clone();
        let interrupt = self.interrupt.clone();
        poll_until(&policy, &interrupt, url, |attempt| {
            let (authorization, retry_after) = self.fetch_authorization_with_retry(url)?;
            self.log(
                Level::Debug,
                &format!("authorization {} is {:?} (check {})", url, authorization.status, attempt + 1),
            );
            match authorization.status {
                AuthorizationStatus::Valid => Ok(PollStep::Done(authorization)),
                AuthorizationStatus::Pending => Ok(PollStep::Pending { retry_after }),
                _ => Err(AcmeError::ValidationFailed {
                    url: url.to_string(),
                    problem: authorization.problem(),
                }),
            }
        })
    }

    /// 完成單一授權：發布 TXT 記錄、等待傳播、通知伺服器、輪詢結果。
    ///
    /// 已是 `valid` 的授權直接略過。記錄一旦發布，不論結果如何都只會移除一次。
    pub(crate) fn authorize(&mut self, url: &str) -> Result<()> {
        let authorization = self.fetch_authorization(url)?;
        let domain = authorization.identifier.value.clone();
        if authorization.status == AuthorizationStatus::Valid {
            self.log(Level::Info, &format!("{} is already authorized", domain));
            return Ok(());
        }

        let challenge = authorization.dns01()?.clone();
        let value = dns_txt_value(&self.account_key, &challenge.token)?;

        self.log(Level::Info, &format!("publishing TXT record for {}", domain));
        let guard = TxtRecordGuard::publish(self.dns.clone(), self.logger.clone(), &domain, &value)?;

        let outcome = self.await_validation(url, &challenge);

        if let Err(err) = guard.release() {
            self.log(
                Level::Warn,
                &format!("failed to remove TXT record for {}: {}", domain, err),
            );
        }
        outcome?;

        self.log(Level::Info, &format!("{} authorized", domain));
        Ok(())
    }

    fn await_validation(&mut self, url: &str, challenge: &Challenge) -> Result<Authorization> {
        self.interrupt.sleep(self.config.propagation_delay)?;
        if challenge.status == ChallengeStatus::Pending {
            self.challenge_ready(&challenge.url)?;
        }
        self.poll_authorization(url)
    }
}
