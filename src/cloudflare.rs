use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};

use crate::dns::{challenge_record_name, DnsError, DnsProvider};

const CF_API_BASE: &str = "https://api.cloudflare.com/client/v4";

/// 透過 Cloudflare API 管理 `_acme-challenge` TXT 記錄。
#[derive(Debug, Clone)]
pub struct CloudflareDns {
    client: Client,
    token: String,
    api_base: String,
    ttl: u32,
}

impl CloudflareDns {
    const DEFAULT_TTL: u32 = 60;

    /// 以 API token 建立供應商，token 需要 `Zone.DNS` 編輯權限。
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            token: token.into(),
            api_base: CF_API_BASE.to_string(),
            ttl: Self::DEFAULT_TTL,
        }
    }

    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    pub fn with_ttl(mut self, ttl: u32) -> Self {
        self.ttl = ttl;
        self
    }

    fn auth(&self) -> String {
        format!("Bearer {}", self.token)
    }

    /// 取得 Zone ID：從完整域名開始逐層往上查詢，直到找到已託管的 zone。
    fn zone_id(&self, domain: &str) -> Result<String, DnsError> {
        let domain = domain.trim_start_matches("*.").trim_end_matches('.');
        let labels: Vec<&str> = domain.split('.').filter(|l| !l.is_empty()).collect();
        if labels.len() < 2 {
            return Err(DnsError::InvalidDomain(domain.to_string()));
        }

        for start in 0..labels.len() - 1 {
            let candidate = labels[start..].join(".");
            let url = format!("{}/zones?name={}", self.api_base, candidate);
            let response: CloudflareResponse<Vec<CloudflareZone>> = self
                .client
                .get(&url)
                .header("Authorization", self.auth())
                .send()?
                .json()?;
            let zones = response.into_result()?;
            if let Some(zone) = zones.into_iter().next() {
                return Ok(zone.id);
            }
        }

        Err(DnsError::ZoneNotFound(domain.to_string()))
    }

    /// 列出指定名稱的 TXT 記錄。
    fn list_txt_records(&self, zone_id: &str, name: &str) -> Result<Vec<CloudflareDnsRecordItem>, DnsError> {
        let url = format!(
            "{}/zones/{}/dns_records?type=TXT&name={}",
            self.api_base, zone_id, name
        );
        let response: CloudflareResponse<Vec<CloudflareDnsRecordItem>> = self
            .client
            .get(&url)
            .header("Authorization", self.auth())
            .send()?
            .json()?;
        response.into_result()
    }

    fn delete_record(&self, zone_id: &str, record_id: &str) -> Result<(), DnsError> {
        let url = format!("{}/zones/{}/dns_records/{}", self.api_base, zone_id, record_id);
        let response: CloudflareResponse<serde_json::Value> = self
            .client
            .delete(&url)
            .header("Authorization", self.auth())
            .send()?
            .json()?;
        response.into_result().map(|_| ())
    }

    /// 刪除名稱與內容都相符的記錄，回傳刪除數量。
    fn delete_matching(&self, zone_id: &str, name: &str, value: &str) -> Result<usize, DnsError> {
        let mut deleted = 0;
        for record in self.list_txt_records(zone_id, name)? {
            if record.content.trim_matches('"') == value {
                self.delete_record(zone_id, &record.id)?;
                deleted += 1;
            }
        }
        Ok(deleted)
    }
}

impl DnsProvider for CloudflareDns {
    fn add_text_record(&self, domain: &str, value: &str) -> Result<(), DnsError> {
        let zone_id = self.zone_id(domain)?;
        let name = challenge_record_name(domain);
        // 先清掉上次殘留的同值記錄，讓新增可以重複執行
        self.delete_matching(&zone_id, &name, value)?;

        let url = format!("{}/zones/{}/dns_records", self.api_base, zone_id);
        let record = CloudflareDnsRecord {
            record_type: "TXT",
            name: &name,
            content: format!("\"{}\"", value),
            ttl: self.ttl,
        };
        let response: CloudflareResponse<serde_json::Value> = self
            .client
            .post(&url)
            .header("Authorization", self.auth())
            .json(&record)
            .send()?
            .json()?;
        response.into_result().map(|_| ())
    }

    fn remove_text_record(&self, domain: &str, value: &str) -> Result<(), DnsError> {
        let zone_id = self.zone_id(domain)?;
        let name = challenge_record_name(domain);
        self.delete_matching(&zone_id, &name, value).map(|_| ())
    }
}

/// 將 Cloudflare API 回傳的錯誤組合成單一字串。
fn format_cloudflare_errors(errors: &[CloudflareError]) -> String {
    errors
        .iter()
        .map(|e| format!("{}: {}", e.code, e.message))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Cloudflare API 的通用回應外殼。
#[derive(Debug, Deserialize)]
struct CloudflareResponse<T> {
    success: bool,
    result: Option<T>,
    #[serde(default)]
    errors: Vec<CloudflareError>,
}

impl<T> CloudflareResponse<T> {
    fn into_result(self) -> Result<T, DnsError> {
        if !self.success {
            return Err(DnsError::Cloudflare(format_cloudflare_errors(&self.errors)));
        }
        self.result
            .ok_or_else(|| DnsError::Cloudflare("response has no result".into()))
    }
}

#[derive(Debug, Serialize)]
struct CloudflareDnsRecord<'a> {
    #[serde(rename = "type")]
    record_type: &'a str,
    name: &'a str,
    content: String,
    ttl: u32,
}

#[derive(Debug, Deserialize)]
struct CloudflareDnsRecordItem {
    id: String,
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct CloudflareZone {
    id: String,
}

#[derive(Debug, Deserialize)]
struct CloudflareError {
    code: u32,
    message: String,
}
