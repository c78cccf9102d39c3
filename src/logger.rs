//! 可注入的日誌輸出。
//!
//! 核心流程只透過 [`Logger`] 輸出診斷訊息，沒有設定時保持沉默。

use std::io::Write;

use log::Level;

/// 診斷訊息的接收端。實作不應該失敗，也不應該阻塞太久。
pub trait Logger: Send + Sync {
    fn log(&self, level: Level, message: &str);
}

/// 轉交給 `log` crate 的巨集，由應用程式決定最終輸出位置。
#[derive(Debug, Clone, Copy, Default)]
pub struct LogFacade;

impl Logger for LogFacade {
    fn log(&self, level: Level, message: &str) {
        log::log!(target: "acme_dns01", level, "{}", message);
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StdoutLogger;

impl Logger for StdoutLogger {
    fn log(&self, level: Level, message: &str) {
        let _ = writeln!(std::io::stdout().lock(), "[{}] {}", level, message);
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StderrLogger;

impl Logger for StderrLogger {
    fn log(&self, level: Level, message: &str) {
        let _ = writeln!(std::io::stderr().lock(), "[{}] {}", level, message);
    }
}
