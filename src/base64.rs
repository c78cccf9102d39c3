use base64::{engine::general_purpose::URL_SAFE_NO_PAD, DecodeError, Engine};

/// 以 URL 安全、無填充字元的 Base64 形式保存資料（JOSE 使用的 `base64url`）。
///
/// # 示例
///
/// ```
/// # use acme_dns01::base64::Base64;
/// let b64 = Base64::new("Hello, World!");
/// assert_eq!(b64.base64_url(), "SGVsbG8sIFdvcmxkIQ");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Base64 {
    encoded: String,
}

impl Base64 {
    /// 根據輸入位元組產生 `base64url` 編碼。
    pub fn new<T: AsRef<[u8]>>(input: T) -> Self {
        Self {
            encoded: URL_SAFE_NO_PAD.encode(input.as_ref()),
        }
    }

    /// 從既有的 `base64url` 字串建立實例，會先檢查能否解碼。
    ///
    /// # 錯誤
    ///
    /// 字串含有非法字元或長度不正確時回傳 [`DecodeError`]。
    pub fn from_url(encoded: &str) -> Result<Self, DecodeError> {
        URL_SAFE_NO_PAD.decode(encoded)?;
        Ok(Self {
            encoded: encoded.to_owned(),
        })
    }

    /// 空的負載，用於 POST-as-GET 請求。
    pub fn empty() -> Self {
        Self {
            encoded: String::new(),
        }
    }

    pub fn base64_url(&self) -> String {
        self.encoded.clone()
    }

    pub fn as_str(&self) -> &str {
        &self.encoded
    }

    /// 解碼回原始位元組。
    pub fn decode(&self) -> Result<Vec<u8>, DecodeError> {
        URL_SAFE_NO_PAD.decode(&self.encoded)
    }
}

impl std::fmt::Display for Base64 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.encoded)
    }
}
