//! ACME 工作階段：持有目錄、帳戶金鑰、nonce 與 Key ID，依序送出所有簽名請求。
//!
//! 一個 [`Session`] 同一時間只能執行一個操作（所有方法都需要 `&mut self`），
//! 多個域名要並行處理時請建立多個工作階段。

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use log::Level;
use serde::de::DeserializeOwned;

use crate::{
    account::Account,
    base64::Base64,
    certificate::Certificate,
    csr::CSR,
    directory::Directory,
    dns::DnsProvider,
    error::{AcmeError, Result},
    jws::Jws,
    key_pair::{KeyAlgorithm, KeyPair},
    logger::Logger,
    nonce::{fetch_nonce, NonceTracker},
    order::OrderStatus,
    poll::{Cancellation, Interrupt, PollPolicy},
    protection::Identity,
    store::CertStore,
    transport::{HttpResponse, ReqwestTransport, Transport},
};

pub const LETS_ENCRYPT_PRODUCTION: &str = "https://acme-v02.api.letsencrypt.org/directory";
pub const LETS_ENCRYPT_STAGING: &str = "https://acme-staging-v02.api.letsencrypt.org/directory";
/// 本機 Pebble 測試伺服器的預設目錄。
pub const PEBBLE: &str = "https://localhost:14000/dir";

/// 工作階段設定。
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub directory_url: String,
    /// 帳戶聯絡信箱，會自動補上 `mailto:`。
    pub contacts: Vec<String>,
    /// 新產生的憑證金鑰所用的演算法。
    pub cert_key_alg: KeyAlgorithm,
    pub poll: PollPolicy,
    /// 發布 TXT 記錄後、通知伺服器前的等待時間。
    pub propagation_delay: Duration,
    pub http_timeout: Duration,
    /// 已儲存的憑證在此期間內不會到期時略過申請；`None` 代表每次都重新申請。
    pub renew_within: Option<chrono::Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            directory_url: SessionBuilder::DEFAULT_DIR_URL.to_string(),
            contacts: Vec::new(),
            cert_key_alg: SessionBuilder::DEFAULT_CERT_KEY_ALG,
            poll: PollPolicy::default(),
            propagation_delay: SessionBuilder::DEFAULT_PROPAGATION_DELAY,
            http_timeout: SessionBuilder::DEFAULT_HTTP_TIMEOUT,
            renew_within: None,
        }
    }
}

/// 用於構建 [`Session`] 的構造器。
///
/// DNS 供應商與憑證儲存是必要的協作者，其餘設定都有預設值。
pub struct SessionBuilder {
    config: SessionConfig,
    dns: Arc<dyn DnsProvider>,
    store: Arc<dyn CertStore>,
    account_key: Option<KeyPair>,
    transport: Option<Box<dyn Transport>>,
    logger: Option<Arc<dyn Logger>>,
    cancellation: Cancellation,
    deadline: Option<Instant>,
}

impl SessionBuilder {
    /// 預設的 ACME 目錄 URL（正式環境之外的預設值較安全）。
    pub const DEFAULT_DIR_URL: &'static str = LETS_ENCRYPT_STAGING;
    pub const DEFAULT_CERT_KEY_ALG: KeyAlgorithm = KeyAlgorithm::Rsa(2048);
    pub const DEFAULT_PROPAGATION_DELAY: Duration = Duration::from_secs(60);
    pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

    pub fn new(dns: Arc<dyn DnsProvider>, store: Arc<dyn CertStore>) -> Self {
        Self {
            config: SessionConfig::default(),
            dns,
            store,
            account_key: None,
            transport: None,
            logger: None,
            cancellation: Cancellation::new(),
            deadline: None,
        }
    }

    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn directory_url(mut self, url: &str) -> Self {
        self.config.directory_url = url.to_string();
        self
    }

    pub fn contacts<S: AsRef<str>>(mut self, contacts: &[S]) -> Self {
        self.config.contacts = contacts.iter().map(|c| c.as_ref().to_string()).collect();
        self
    }

    /// 使用既有的帳戶金鑰；未設定時產生新的 P-256 金鑰。
    pub fn account_key(mut self, key: KeyPair) -> Self {
        self.account_key = Some(key);
        self
    }

    pub fn cert_key_alg(mut self, alg: KeyAlgorithm) -> Self {
        self.config.cert_key_alg = alg;
        self
    }

    pub fn poll_policy(mut self, policy: PollPolicy) -> Self {
        self.config.poll = policy;
        self
    }

    pub fn propagation_delay(mut self, delay: Duration) -> Self {
        self.config.propagation_delay = delay;
        self
    }

    pub fn http_timeout(mut self, timeout: Duration) -> Self {
        self.config.http_timeout = timeout;
        self
    }

    pub fn renew_within(mut self, window: chrono::Duration) -> Self {
        self.config.renew_within = Some(window);
        self
    }

    pub fn logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn cancellation(mut self, cancellation: Cancellation) -> Self {
        self.cancellation = cancellation;
        self
    }

    /// 整個工作階段的絕對期限。
    pub fn deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// 替換 HTTP 傳輸層；未設定時使用 [`ReqwestTransport`]。
    pub fn transport(mut self, transport: Box<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// 取得目錄並建立工作階段。目錄取得失敗時整個工作階段無法建立。
    pub fn build(self) -> Result<Session> {
        let transport = match self.transport {
            Some(transport) => transport,
            None => Box::new(ReqwestTransport::new(self.config.http_timeout)?),
        };
        let account_key = match self.account_key {
            Some(key) => key,
            None => KeyPair::generate(KeyAlgorithm::EcdsaP256)?,
        };

        let directory = Directory::fetch(transport.as_ref(), &self.config.directory_url)?;

        let session = Session {
            transport,
            directory,
            account_key,
            nonce: NonceTracker::new(),
            account: None,
            dns: self.dns,
            store: self.store,
            logger: self.logger,
            config: self.config,
            interrupt: Interrupt::new(self.cancellation, self.deadline),
        };
        session.log(
            Level::Debug,
            &format!("directory loaded from {}", session.config.directory_url),
        );
        Ok(session)
    }
}

/// 單次申請的結果。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Issuance {
    /// 新核發的憑證鏈與對應私鑰（皆為 PEM），已交給儲存後端。
    Issued {
        certificate_pem: String,
        key_pem: String,
    },
    /// 已儲存的憑證仍在續約期限之外，沒有與伺服器連線。
    Skipped {
        not_after: chrono::DateTime<chrono::Utc>,
    },
}

/// 與一個 ACME 伺服器之間的工作階段。
pub struct Session {
    pub(crate) transport: Box<dyn Transport>,
    pub(crate) directory: Directory,
    pub(crate) account_key: KeyPair,
    pub(crate) nonce: NonceTracker,
    pub(crate) account: Option<Account>,
    pub(crate) dns: Arc<dyn DnsProvider>,
    pub(crate) store: Arc<dyn CertStore>,
    pub(crate) logger: Option<Arc<dyn Logger>>,
    pub(crate) config: SessionConfig,
    pub(crate) interrupt: Interrupt,
}

impl Session {
    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    /// 帳戶金鑰。若是由工作階段產生的，呼叫者應自行保存以便下次沿用。
    pub fn account_key(&self) -> &KeyPair {
        &self.account_key
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// 可從其他執行緒觸發的取消旗標。
    pub fn cancellation(&self) -> Cancellation {
        self.interrupt.cancellation().clone()
    }

    pub fn set_deadline(&mut self, deadline: Option<Instant>) {
        self.interrupt.set_deadline(deadline);
    }

    pub(crate) fn log(&self, level: Level, message: &str) {
        if let Some(logger) = &self.logger {
            logger.log(level, message);
        }
    }

    /// 取走目前的 nonce，沒有時先向 `newNonce` 取得一個。
    fn next_nonce(&mut self) -> Result<String> {
        if !self.nonce.has_nonce() {
            let nonce = fetch_nonce(self.transport.as_ref(), &self.directory.new_nonce)?;
            self.nonce.replace(nonce);
        }
        self.nonce.take()
    }

    fn identity(&self, embed_key: bool) -> Result<Identity> {
        match (&self.account, embed_key) {
            (Some(account), false) => Ok(Identity::Kid(account.key_id.clone())),
            _ => Ok(Identity::Jwk(self.account_key.jwk()?.to_value()?)),
        }
    }

    /// 以帳戶金鑰簽名並送出請求，`payload` 為 `None` 時是 POST-as-GET。
    ///
    /// 帳戶建立前（或 `embed_key` 為真時）嵌入公鑰，之後一律使用 Key ID。
    /// 每個回應的 nonce 都會被記下；遇到 `badNonce` 時以新 nonce 重送一次。
    pub(crate) fn signed_request(
        &mut self,
        url: &str,
        payload: Option<&Base64>,
        embed_key: bool,
    ) -> Result<HttpResponse> {
        let mut retried = false;
        loop {
            self.interrupt.check()?;
            let nonce = self.next_nonce()?;
            let jws = Jws::sign(&self.account_key, self.identity(embed_key)?, nonce, url, payload)?;
            let body = jws.to_json()?;
            self.log(Level::Trace, &format!("POST {} {}", url, body));

            let response = self.transport.post_jose(url, body)?;
            self.nonce.observe(&response);
            self.log(
                Level::Trace,
                &format!("{} <- {}: {}", url, response.status, response.text()),
            );

            match response.error_for_status() {
                Err(AcmeError::Problem(problem)) if problem.is_bad_nonce() && !retried => {
                    self.log(
                        Level::Debug,
                        &format!("server rejected nonce for {}, retrying once", url),
                    );
                    retried = true;
                }
                other => return other,
            }
        }
    }

    pub(crate) fn post(&mut self, url: &str, payload: &Base64) -> Result<HttpResponse> {
        self.signed_request(url, Some(payload), false)
    }

    pub(crate) fn post_as_get(&mut self, url: &str) -> Result<HttpResponse> {
        self.signed_request(url, None, false)
    }

    /// POST-as-GET 取得資源並解析，一併回傳 `Retry-After`。
    pub(crate) fn fetch_resource<T: DeserializeOwned>(&mut self, url: &str) -> Result<(T, Option<u64>)> {
        let response = self.post_as_get(url)?;
        Ok((response.json()?, response.retry_after))
    }

    /// 申請（或續約）涵蓋 `domains` 的單一憑證，第一個域名為主要名稱與儲存鍵。
    ///
    /// 流程：檢查儲存的憑證 → 確保帳戶 → 建立訂單 → 逐一完成授權的 dns-01 挑戰
    /// → finalize → 下載 → 儲存。每個已發布的 TXT 記錄都保證會被移除。
    pub fn fetch_or_renew_cert<S: AsRef<str>>(&mut self, domains: &[S]) -> Result<Issuance> {
        let domains: Vec<String> = domains
            .iter()
            .map(|d| d.as_ref().trim().to_string())
            .filter(|d| !d.is_empty())
            .collect();
        let primary = domains
            .first()
            .cloned()
            .ok_or_else(|| AcmeError::Configuration("no domain supplied".into()))?;

        let stored = self.store.retrieve(&primary)?;
        if let (Some(stored), Some(window)) = (&stored, self.config.renew_within) {
            let cert = Certificate::from_pem(&stored.cert_pem)?;
            let names = cert.dns_names();
            let covers_all = domains.iter().all(|d| names.contains(d));
            if covers_all && !cert.expires_within(window)? {
                let not_after = cert.not_after()?;
                self.log(
                    Level::Info,
                    &format!("certificate for {} is valid until {}, skipping", primary, not_after),
                );
                return Ok(Issuance::Skipped { not_after });
            }
        }

        let cert_key = match &stored {
            Some(stored) => KeyPair::from_pem(stored.key_pem.as_bytes())?,
            None => KeyPair::generate(self.config.cert_key_alg)?,
        };

        if self.account.is_none() {
            let contacts = self.config.contacts.clone();
            self.ensure_account(&contacts)?;
        }

        self.log(Level::Info, &format!("applying for {}", domains.join(", ")));
        let order = self.cert_apply(&domains)?;
        for authorization_url in &order.authorizations {
            self.authorize(authorization_url)?;
        }

        let order = self.poll_order(&order.url, OrderStatus::Ready)?;
        let csr = CSR::new().set_sans(&domains).build_der(&cert_key)?;
        self.finalize(&order, &csr)?;
        let order = self.poll_order(&order.url, OrderStatus::Valid)?;

        let certificate_pem = self.download_certificate(&order)?;
        let key_pem = cert_key.private_key_pem()?;
        self.store.store(&key_pem, &certificate_pem, &primary)?;
        self.log(Level::Info, &format!("certificate for {} stored", primary));

        Ok(Issuance::Issued {
            certificate_pem,
            key_pem,
        })
    }

    /// 每個域名各自申請一張憑證，單一域名失敗不影響其他域名。
    ///
    /// 帳戶錯誤、取消與期限會中止整批並回傳錯誤或停止處理剩餘域名。
    pub fn fetch_or_renew_each<S: AsRef<str>>(
        &mut self,
        domains: &[S],
    ) -> Result<Vec<(String, Result<Issuance>)>> {
        if self.account.is_none() {
            let contacts = self.config.contacts.clone();
            self.ensure_account(&contacts)?;
        }

        let mut results = Vec::with_capacity(domains.len());
        for domain in domains {
            let domain = domain.as_ref().trim().to_string();
            let result = self.fetch_or_renew_cert(&[domain.as_str()]);
            let interrupted = matches!(&result, Err(err) if err.is_interrupted());
            if let Err(err) = &result {
                self.log(Level::Error, &format!("{}: {}", domain, err));
            }
            results.push((domain, result));
            if interrupted {
                break;
            }
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use serde_json::json;

    use super::*;
    use crate::{
        challenge::dns_txt_value,
        store::MemoryCertStore,
        testing::*,
    };

    const KID: &str = "https://example/acct/1";
    const ORDER_URL: &str = "https://example/order/1";
    const AUTHZ_URL: &str = "https://example/authz/1";
    const CHALLENGE_URL: &str = "https://example/chall/1";
    const FINALIZE_URL: &str = "https://example/order/1/finalize";
    const CERT_URL: &str = "https://example/cert/1";
    const TXT_VALUE: &str = "x4XAZRxdSoDRMnB9L1VYsQ5WsY9B50i4zRpzcytKjWA";

    fn account_reply(status: u16, nonce: &str) -> HttpResponse {
        HttpResponse {
            location: Some(KID.to_string()),
            ..reply(status, nonce, json!({ "status": "valid", "contact": ["mailto:admin@example.org"] }))
        }
    }

    fn order_body(status: &str, certificate: Option<&str>) -> serde_json::Value {
        let mut body = json!({
            "status": status,
            "identifiers": [{ "type": "dns", "value": "example.org" }],
            "authorizations": [AUTHZ_URL],
            "finalize": FINALIZE_URL
        });
        if let Some(url) = certificate {
            body["certificate"] = json!(url);
        }
        body
    }

    fn authz_body(status: &str, challenge_status: &str, challenge_type: &str) -> serde_json::Value {
        json!({
            "status": status,
            "identifier": { "type": "dns", "value": "example.org" },
            "challenges": [{
                "type": challenge_type,
                "url": CHALLENGE_URL,
                "token": "abc123",
                "status": challenge_status
            }]
        })
    }

    /// 直到授權輪詢開始前的腳本：nonce、帳戶、訂單、授權、挑戰就緒。
    fn script_until_ready(transport: &ScriptedTransport) {
        transport.push_nonce("n0");
        transport.push(account_reply(201, "n1"));
        transport.push(HttpResponse {
            location: Some(ORDER_URL.to_string()),
            ..reply(201, "n2", order_body("pending", None))
        });
        transport.push(reply(200, "n3", authz_body("pending", "pending", "dns-01")));
        transport.push(reply(
            200,
            "n4",
            json!({ "type": "dns-01", "url": CHALLENGE_URL, "token": "abc123", "status": "processing" }),
        ));
    }

    #[test]
    fn test_happy_path_issues_and_stores() {
        let transport = Arc::new(ScriptedTransport::new());
        let dns = Arc::new(RecordingDns::default());
        let store = Arc::new(MemoryCertStore::new());
        let mut session = test_session(&transport, &dns, store.clone());

        let cert_pem = self_signed_pem(&["example.org"], 90);
        script_until_ready(&transport);
        transport.push(reply(200, "n5", authz_body("pending", "processing", "dns-01")));
        transport.push(reply(200, "n6", authz_body("valid", "valid", "dns-01")));
        transport.push(reply(200, "n7", order_body("ready", None)));
        transport.push(reply(200, "n8", order_body("processing", None)));
        transport.push(reply(200, "n9", order_body("valid", Some(CERT_URL))));
        transport.push(HttpResponse {
            status: 200,
            replay_nonce: Some("n10".into()),
            content_type: Some("application/pem-certificate-chain".into()),
            body: cert_pem.clone().into_bytes(),
            ..Default::default()
        });

        let issuance = session.fetch_or_renew_cert(&["example.org"]).unwrap();
        let Issuance::Issued { certificate_pem, key_pem } = issuance else {
            panic!("expected a new certificate");
        };
        assert_eq!(certificate_pem, cert_pem);
        assert_eq!(transport.remaining(), 0);

        let stored = store.retrieve("example.org").unwrap().unwrap();
        assert_eq!(stored.cert_pem, cert_pem);
        assert_eq!(stored.key_pem, key_pem);

        assert_eq!(
            dns.calls(),
            vec![
                DnsCall::Add("example.org".into(), TXT_VALUE.into()),
                DnsCall::Remove("example.org".into(), TXT_VALUE.into()),
            ]
        );

        let posts = transport.posts();
        let urls: Vec<&str> = posts.iter().map(|p| p.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                NEW_ACCOUNT_URL,
                NEW_ORDER_URL,
                AUTHZ_URL,
                CHALLENGE_URL,
                AUTHZ_URL,
                AUTHZ_URL,
                ORDER_URL,
                FINALIZE_URL,
                ORDER_URL,
                CERT_URL,
            ]
        );
        assert!(posts[0].has_jwk());
        assert!(posts[1..].iter().all(|p| p.kid() == Some(KID) && !p.has_jwk()));
        assert_eq!(posts[3].payload, Some(json!({})));
        assert!(posts[7].payload.as_ref().is_some_and(|p| p["csr"].is_string()));
        assert!(posts[9].payload.is_none());
    }

    #[test]
    fn test_every_request_uses_a_distinct_nonce() {
        let transport = Arc::new(ScriptedTransport::new());
        let dns = Arc::new(RecordingDns::default());
        let mut session = test_session(&transport, &dns, Arc::new(MemoryCertStore::new()));

        script_until_ready(&transport);
        transport.push(reply(200, "n5", authz_body("valid", "valid", "dns-01")));
        transport.push(reply(200, "n6", order_body("ready", None)));
        transport.push(reply(200, "n7", order_body("valid", Some(CERT_URL))));
        transport.push(reply(200, "n8", order_body("valid", Some(CERT_URL))));
        transport.push(reply(200, "n9", json!("certificate")));

        session.fetch_or_renew_cert(&["example.org"]).unwrap();

        let nonces: Vec<String> = transport
            .posts()
            .iter()
            .map(|p| p.nonce().unwrap().to_string())
            .collect();
        let unique: HashSet<&String> = nonces.iter().collect();
        assert_eq!(unique.len(), nonces.len());
        assert_eq!(nonces[0], "n0");
        assert_eq!(nonces[1], "n1");
    }

    #[test]
    fn test_finalize_waits_for_valid_authorization() {
        let transport = Arc::new(ScriptedTransport::new());
        let dns = Arc::new(RecordingDns::default());
        let mut session = test_session(&transport, &dns, Arc::new(MemoryCertStore::new()));

        script_until_ready(&transport);
        for nonce in ["n5", "n6", "n7", "n8", "n9"] {
            transport.push(reply(200, nonce, authz_body("pending", "processing", "dns-01")));
        }

        let err = session.fetch_or_renew_cert(&["example.org"]).unwrap_err();
        assert!(matches!(err, AcmeError::PollExhausted { attempts: 5, .. }));
        assert!(transport.posts().iter().all(|p| p.url != FINALIZE_URL));
        assert_eq!(dns.removals(), 1);
    }

    #[test]
    fn test_invalid_authorization_still_cleans_up() {
        let transport = Arc::new(ScriptedTransport::new());
        let dns = Arc::new(RecordingDns::default());
        let store = Arc::new(MemoryCertStore::new());
        let mut session = test_session(&transport, &dns, store.clone());

        script_until_ready(&transport);
        transport.push(reply(
            200,
            "n5",
            json!({
                "status": "invalid",
                "identifier": { "type": "dns", "value": "example.org" },
                "challenges": [{
                    "type": "dns-01",
                    "url": CHALLENGE_URL,
                    "token": "abc123",
                    "status": "invalid",
                    "error": {
                        "type": "urn:ietf:params:acme:error:unauthorized",
                        "detail": "No TXT record found at _acme-challenge.example.org",
                        "status": 403
                    }
                }]
            }),
        ));

        let err = session.fetch_or_renew_cert(&["example.org"]).unwrap_err();
        match &err {
            AcmeError::ValidationFailed { url, problem } => {
                assert_eq!(url, AUTHZ_URL);
                assert!(problem
                    .as_ref()
                    .and_then(|p| p.detail.as_deref())
                    .is_some_and(|d| d.contains("No TXT record")));
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(dns.additions(), 1);
        assert_eq!(dns.removals(), 1);
        assert!(store.is_empty());
    }

    #[test]
    fn test_rejected_challenge_ready_still_cleans_up() {
        let transport = Arc::new(ScriptedTransport::new());
        let dns = Arc::new(RecordingDns::default());
        let store = Arc::new(MemoryCertStore::new());
        let mut session = test_session(&transport, &dns, store.clone());

        transport.push_nonce("n0");
        transport.push(account_reply(201, "n1"));
        transport.push(HttpResponse {
            location: Some(ORDER_URL.to_string()),
            ..reply(201, "n2", order_body("pending", None))
        });
        transport.push(reply(200, "n3", authz_body("pending", "pending", "dns-01")));
        transport.push(problem_reply(400, "n4", "malformed", "unexpected challenge payload"));

        let err = session.fetch_or_renew_cert(&["example.org"]).unwrap_err();
        assert_eq!(
            err.problem().and_then(|p| p.detail.as_deref()),
            Some("unexpected challenge payload")
        );
        assert_eq!(dns.additions(), 1);
        assert_eq!(dns.removals(), 1);
        assert!(transport.posts().iter().all(|p| p.url != FINALIZE_URL));
        assert!(store.is_empty());
    }

    #[test]
    fn test_http01_only_makes_no_dns_calls() {
        let transport = Arc::new(ScriptedTransport::new());
        let dns = Arc::new(RecordingDns::default());
        let mut session = test_session(&transport, &dns, Arc::new(MemoryCertStore::new()));

        transport.push_nonce("n0");
        transport.push(account_reply(201, "n1"));
        transport.push(HttpResponse {
            location: Some(ORDER_URL.to_string()),
            ..reply(201, "n2", order_body("pending", None))
        });
        transport.push(reply(200, "n3", authz_body("pending", "pending", "http-01")));

        let err = session.fetch_or_renew_cert(&["example.org"]).unwrap_err();
        assert!(matches!(err, AcmeError::Challenge(_)));
        assert!(dns.calls().is_empty());
        assert!(transport.posts().iter().all(|p| p.url != CHALLENGE_URL));
    }

    #[test]
    fn test_cancellation_mid_poll_cleans_up() {
        let transport = Arc::new(ScriptedTransport::new());
        let dns = Arc::new(RecordingDns::default());
        let cancellation = Cancellation::new();
        let mut session = test_builder(&transport, &dns, Arc::new(MemoryCertStore::new()))
            .cancellation(cancellation.clone())
            .build()
            .unwrap();

        script_until_ready(&transport);
        transport.push(reply(200, "n5", authz_body("pending", "processing", "dns-01")));
        transport.push(reply(200, "n6", authz_body("pending", "processing", "dns-01")));
        // 目錄、HEAD、帳戶、訂單、授權、挑戰就緒，第一次輪詢時取消
        transport.cancel_after(7, cancellation);

        let err = session.fetch_or_renew_cert(&["example.org"]).unwrap_err();
        assert!(matches!(err, AcmeError::Cancelled));
        assert_eq!(dns.additions(), 1);
        assert_eq!(dns.removals(), 1);
        assert_eq!(transport.remaining(), 1);
    }

    #[test]
    fn test_already_valid_authorization_skips_dns() {
        let transport = Arc::new(ScriptedTransport::new());
        let dns = Arc::new(RecordingDns::default());
        let mut session = test_session(&transport, &dns, Arc::new(MemoryCertStore::new()));

        transport.push_nonce("n0");
        transport.push(account_reply(200, "n1"));
        transport.push(HttpResponse {
            location: Some(ORDER_URL.to_string()),
            ..reply(201, "n2", order_body("ready", None))
        });
        transport.push(reply(200, "n3", authz_body("valid", "valid", "dns-01")));
        transport.push(reply(200, "n4", order_body("ready", None)));
        transport.push(reply(200, "n5", order_body("processing", None)));
        transport.push(reply(200, "n6", order_body("valid", Some(CERT_URL))));
        transport.push(reply(200, "n7", json!("certificate")));

        assert!(matches!(
            session.fetch_or_renew_cert(&["example.org"]),
            Ok(Issuance::Issued { .. })
        ));
        assert!(dns.calls().is_empty());
    }

    #[test]
    fn test_fresh_stored_certificate_is_skipped() {
        let transport = Arc::new(ScriptedTransport::new());
        let dns = Arc::new(RecordingDns::default());
        let store = Arc::new(MemoryCertStore::new());
        store
            .store("KEY", &self_signed_pem(&["example.org"], 90), "example.org")
            .unwrap();
        let mut session = test_builder(&transport, &dns, store)
            .renew_within(chrono::Duration::days(30))
            .build()
            .unwrap();

        assert!(matches!(
            session.fetch_or_renew_cert(&["example.org"]),
            Ok(Issuance::Skipped { .. })
        ));
        assert!(transport.posts().is_empty());
        assert_eq!(transport.requests().len(), 1);
    }

    #[test]
    fn test_empty_domain_list() {
        let transport = Arc::new(ScriptedTransport::new());
        let dns = Arc::new(RecordingDns::default());
        let mut session = test_session(&transport, &dns, Arc::new(MemoryCertStore::new()));

        assert!(matches!(
            session.fetch_or_renew_cert(&["  "]),
            Err(AcmeError::Configuration(_))
        ));
        assert_eq!(transport.requests().len(), 1);
    }

    #[test]
    fn test_bad_nonce_is_retried_once() {
        let transport = Arc::new(ScriptedTransport::new());
        let dns = Arc::new(RecordingDns::default());
        let mut session = test_session(&transport, &dns, Arc::new(MemoryCertStore::new()));

        transport.push_nonce("n0");
        transport.push(problem_reply(400, "n1", "badNonce", "JWS has an invalid anti-replay nonce"));
        transport.push(account_reply(201, "n2"));

        assert_eq!(session.ensure_account(&["admin@example.org"]).unwrap(), KID);
        let nonces: Vec<String> = transport
            .posts()
            .iter()
            .map(|p| p.nonce().unwrap().to_string())
            .collect();
        assert_eq!(nonces, vec!["n0", "n1"]);
    }

    #[test]
    fn test_bad_nonce_twice_surfaces_problem() {
        let transport = Arc::new(ScriptedTransport::new());
        let dns = Arc::new(RecordingDns::default());
        let mut session = test_session(&transport, &dns, Arc::new(MemoryCertStore::new()));

        transport.push_nonce("n0");
        transport.push(problem_reply(400, "n1", "badNonce", "bad"));
        transport.push(problem_reply(400, "n2", "badNonce", "bad again"));

        let err = session.ensure_account(&["admin@example.org"]).unwrap_err();
        assert!(err.problem().is_some_and(|p| p.is_bad_nonce()));
        assert_eq!(transport.posts().len(), 2);
    }

    #[test]
    fn test_bad_nonce_without_replacement_fetches_fresh_nonce() {
        let transport = Arc::new(ScriptedTransport::new());
        let dns = Arc::new(RecordingDns::default());
        let mut session = test_session(&transport, &dns, Arc::new(MemoryCertStore::new()));

        transport.push_nonce("n0");
        transport.push(HttpResponse {
            replay_nonce: None,
            ..problem_reply(400, "unused", "badNonce", "bad")
        });
        transport.push_nonce("n1");
        transport.push(account_reply(201, "n2"));

        session.ensure_account(&["admin@example.org"]).unwrap();
        let methods: Vec<&str> = transport.requests().iter().map(|r| r.method).collect();
        assert_eq!(methods, vec!["GET", "HEAD", "POST", "HEAD", "POST"]);
    }

    #[test]
    fn test_each_domain_is_independent() {
        let transport = Arc::new(ScriptedTransport::new());
        let dns = Arc::new(RecordingDns::default());
        let mut session = test_session(&transport, &dns, Arc::new(MemoryCertStore::new()));

        transport.push_nonce("n0");
        transport.push(account_reply(201, "n1"));
        transport.push(problem_reply(400, "n2", "rejectedIdentifier", "bad.example is forbidden"));
        transport.push(problem_reply(429, "n3", "rateLimited", "too many certificates"));

        let results = session
            .fetch_or_renew_each(&["bad.example", "example.org"])
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, "bad.example");
        assert!(results[0].1.as_ref().is_err());
        assert!(results[1]
            .1
            .as_ref()
            .err()
            .and_then(AcmeError::problem)
            .is_some_and(|p| p.is_rate_limited()));
    }

    #[test]
    fn test_txt_value_matches_fixture_key() {
        assert_eq!(dns_txt_value(&rfc7515_key(), "abc123").unwrap(), TXT_VALUE);
    }

    #[test]
    fn test_logger_receives_progress() {
        let transport = Arc::new(ScriptedTransport::new());
        let dns = Arc::new(RecordingDns::default());
        let logger = Arc::new(RecordingLogger::default());
        let mut session = test_builder(&transport, &dns, Arc::new(MemoryCertStore::new()))
            .logger(logger.clone())
            .build()
            .unwrap();

        transport.push_nonce("n0");
        transport.push(account_reply(201, "n1"));
        session.ensure_account(&["admin@example.org"]).unwrap();

        assert!(logger
            .messages()
            .iter()
            .any(|(level, message)| *level == Level::Info && message.contains(KID)));
    }
}
