//! 已核發憑證與私鑰的儲存介面與實作。

use std::{
    collections::HashMap,
    fmt, fs, io,
    path::{Path, PathBuf},
    sync::RwLock,
};

use thiserror::Error;

/// 儲存操作可能發生的錯誤類型。
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Invalid domain for storage: {0}")]
    InvalidDomain(String),
    #[error("Only one of key and certificate is stored for {0}")]
    Incomplete(String),
    #[error("Lock poisoned")]
    LockPoisoned,
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// 一組已儲存的私鑰與憑證（皆為 PEM）。
#[derive(Clone, PartialEq, Eq)]
pub struct StoredCertificate {
    pub key_pem: String,
    pub cert_pem: String,
}

impl fmt::Debug for StoredCertificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredCertificate")
            .field("key_pem", &"<redacted>")
            .field("cert_pem_len", &self.cert_pem.len())
            .finish()
    }
}

/// 憑證儲存後端。
pub trait CertStore: Send + Sync {
    /// 保存 `domain` 的私鑰與憑證，覆寫既有資料。
    fn store(&self, key_pem: &str, cert_pem: &str, domain: &str) -> Result<()>;

    /// 讀取 `domain` 的私鑰與憑證；尚未儲存過時回傳 `Ok(None)`，不是錯誤。
    fn retrieve(&self, domain: &str) -> Result<Option<StoredCertificate>>;
}

/// 以目錄保存的儲存後端：`ssl_<domain>.key`（權限 0600）與 `ssl_<domain>.crt`。
///
/// 萬用字元 `*` 會被替換為 `_`。
#[derive(Debug, Clone)]
pub struct FileCertStore {
    dir: PathBuf,
}

impl FileCertStore {
    /// 開啟（必要時建立）儲存目錄。
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        fs::create_dir_all(dir.as_ref())?;
        Ok(Self {
            dir: dir.as_ref().to_path_buf(),
        })
    }

    fn file_stem(domain: &str) -> Result<String> {
        let domain = domain.trim().trim_end_matches('.');
        if domain.is_empty()
            || domain.contains('/')
            || domain.contains('\\')
            || domain.contains("..")
            || domain.contains('\0')
        {
            return Err(StoreError::InvalidDomain(domain.to_string()));
        }
        Ok(format!("ssl_{}", domain.replacen('*', "_", 1)))
    }

    pub fn key_path(&self, domain: &str) -> Result<PathBuf> {
        Ok(self.dir.join(format!("{}.key", Self::file_stem(domain)?)))
    }

    pub fn cert_path(&self, domain: &str) -> Result<PathBuf> {
        Ok(self.dir.join(format!("{}.crt", Self::file_stem(domain)?)))
    }

    /// 先寫入暫存檔再改名，避免讀到寫一半的內容。每個目標檔有自己的暫存檔。
    fn write_atomic(path: &Path, contents: &str, private: bool) -> Result<()> {
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        {
            let mut options = fs::OpenOptions::new();
            options.write(true).create(true).truncate(true);
            #[cfg(unix)]
            {
                use std::os::unix::fs::OpenOptionsExt;
                if private {
                    options.mode(0o600);
                }
            }
            let mut file = options.open(&tmp)?;
            // 殘留的暫存檔可能帶著較寬的權限
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                if private {
                    file.set_permissions(fs::Permissions::from_mode(0o600))?;
                }
            }
            #[cfg(not(unix))]
            let _ = private;
            io::Write::write_all(&mut file, contents.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp, path)?;
        Ok(())
    }

    fn read_optional(path: &Path) -> Result<Option<String>> {
        match fs::read_to_string(path) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

impl CertStore for FileCertStore {
    fn store(&self, key_pem: &str, cert_pem: &str, domain: &str) -> Result<()> {
        Self::write_atomic(&self.key_path(domain)?, key_pem, true)?;
        Self::write_atomic(&self.cert_path(domain)?, cert_pem, false)
    }

    fn retrieve(&self, domain: &str) -> Result<Option<StoredCertificate>> {
        let key = Self::read_optional(&self.key_path(domain)?)?;
        let cert = Self::read_optional(&self.cert_path(domain)?)?;
        match (key, cert) {
            (Some(key_pem), Some(cert_pem)) => Ok(Some(StoredCertificate { key_pem, cert_pem })),
            (None, None) => Ok(None),
            _ => Err(StoreError::Incomplete(domain.to_string())),
        }
    }
}

/// 記憶體內的儲存後端，適合測試或短期程序。
#[derive(Debug, Default)]
pub struct MemoryCertStore {
    entries: RwLock<HashMap<String, StoredCertificate>>,
}

impl MemoryCertStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CertStore for MemoryCertStore {
    fn store(&self, key_pem: &str, cert_pem: &str, domain: &str) -> Result<()> {
        let mut entries = self.entries.write().map_err(|_| StoreError::LockPoisoned)?;
        entries.insert(
            domain.to_string(),
            StoredCertificate {
                key_pem: key_pem.to_string(),
                cert_pem: cert_pem.to_string(),
            },
        );
        Ok(())
    }

    fn retrieve(&self, domain: &str) -> Result<Option<StoredCertificate>> {
        let entries = self.entries.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(entries.get(domain).cloned())
    }
}
