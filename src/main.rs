use std::{
    error::Error,
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
    process::ExitCode,
    sync::Arc,
    time::Duration,
};

use acme_dns01::{
    cloudflare::CloudflareDns,
    key_pair::{KeyAlgorithm, KeyPair},
    logger::LogFacade,
    session::{Issuance, SessionBuilder, LETS_ENCRYPT_PRODUCTION, LETS_ENCRYPT_STAGING, PEBBLE},
    store::FileCertStore,
};
use clap::Parser;
use log::{error, info};

/// 透過 DNS-01 挑戰（Cloudflare）申請或續約 TLS 憑證。
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// 帳戶聯絡信箱，以逗號分隔
    #[arg(long, value_delimiter = ',', required = true)]
    contacts: Vec<String>,

    /// 要申請憑證的域名，以逗號分隔；每個域名各自一張憑證
    #[arg(long, value_delimiter = ',', required = true)]
    domains: Vec<String>,

    /// production、staging、pebble 或完整的目錄 URL
    #[arg(long, default_value = "staging")]
    directory: String,

    /// 憑證與私鑰的儲存目錄
    #[arg(long, default_value = "certs")]
    store_dir: PathBuf,

    /// 帳戶私鑰（PEM）；檔案存在時沿用，否則產生後寫入
    #[arg(long)]
    account_key: Option<PathBuf>,

    /// 憑證金鑰演算法：rsa2048、rsa4096、p256 等
    #[arg(long, default_value = "rsa2048")]
    cert_key_alg: KeyAlgorithm,

    /// 發布 TXT 記錄後等待的秒數
    #[arg(long, default_value_t = 60)]
    propagation_delay: u64,

    /// 既有憑證在這麼多天內不會到期時略過
    #[arg(long)]
    renew_within_days: Option<i64>,

    #[arg(long, env = "CLOUDFLARE_API_TOKEN", hide_env_values = true)]
    cloudflare_token: String,

    /// 輸出除錯訊息
    #[arg(short, long)]
    verbose: bool,
}

fn directory_url(name: &str) -> &str {
    match name {
        "production" => LETS_ENCRYPT_PRODUCTION,
        "staging" => LETS_ENCRYPT_STAGING,
        "pebble" => PEBBLE,
        url => url,
    }
}

fn load_account_key(path: &Path) -> Result<Option<KeyPair>, Box<dyn Error>> {
    match fs::read(path) {
        Ok(pem) => Ok(Some(KeyPair::from_pem(&pem)?)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn save_account_key(path: &Path, key: &KeyPair) -> Result<(), Box<dyn Error>> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(key.private_key_pem()?.as_bytes())?;
    Ok(())
}

fn run(args: Args) -> Result<bool, Box<dyn Error>> {
    let dns = Arc::new(CloudflareDns::new(args.cloudflare_token));
    let store = Arc::new(FileCertStore::open(&args.store_dir)?);

    let mut builder = SessionBuilder::new(dns, store)
        .directory_url(directory_url(&args.directory))
        .contacts(&args.contacts)
        .cert_key_alg(args.cert_key_alg)
        .propagation_delay(Duration::from_secs(args.propagation_delay))
        .logger(Arc::new(LogFacade));
    if let Some(days) = args.renew_within_days {
        builder = builder.renew_within(chrono::Duration::days(days));
    }

    let existing_key = match &args.account_key {
        Some(path) => load_account_key(path)?,
        None => None,
    };
    let generated = existing_key.is_none();
    if let Some(key) = existing_key {
        builder = builder.account_key(key);
    }

    let mut session = builder.build()?;
    if let (Some(path), true) = (&args.account_key, generated) {
        save_account_key(path, session.account_key())?;
        info!("account key written to {}", path.display());
    }

    let mut all_ok = true;
    for (domain, result) in session.fetch_or_renew_each(&args.domains)? {
        match result {
            Ok(Issuance::Issued { .. }) => info!("{}: certificate issued", domain),
            Ok(Issuance::Skipped { not_after }) => {
                info!("{}: still valid until {}, skipped", domain, not_after)
            }
            Err(e) => {
                error!("{}: {}", domain, e);
                all_ok = false;
            }
        }
    }
    Ok(all_ok)
}

fn main() -> ExitCode {
    let args = Args::parse();
    let level = if args.verbose {
        log::Level::Debug
    } else {
        log::Level::Info
    };
    if let Err(e) = simple_logger::init_with_level(level) {
        eprintln!("failed to initialise logger: {}", e);
    }

    match run(args) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
