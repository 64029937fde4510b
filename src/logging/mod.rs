//! 命令行工具的日志初始化.
//!
//! 控制台与按日期命名的文件两路输出. 库 crate 通过 `log` 门面打点,
//! 由 tracing-subscriber 的 log 桥接一并收集.
//! 历史日志的压缩与过期清理在后台 tokio 维护任务中进行.

use anyhow::{Context, Result};
use chrono::{Datelike, Local, NaiveDate, Timelike};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tracing_subscriber::{
    EnvFilter, Registry,
    fmt::{self, FormatEvent, FormatFields, format::Writer},
    layer::{Layer, SubscriberExt},
    registry::LookupSpan,
    util::SubscriberInitExt,
};

mod maintenance;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// 文件日志过滤规则 (EnvFilter 语法)
    pub level: String,
    /// 控制台日志过滤规则
    #[serde(default = "default_console_level")]
    pub console_level: String,
    pub directory: String,
    pub file_prefix: String,
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
    #[serde(default = "default_true")]
    pub compress_history: bool,
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_seconds: u64,
}

impl LoggingConfig {
    /// 以默认参数写入 `directory`
    pub fn for_directory(directory: impl Into<String>, file_prefix: impl Into<String>) -> Self {
        Self {
            level: "debug".to_string(),
            console_level: default_console_level(),
            directory: directory.into(),
            file_prefix: file_prefix.into(),
            retention_days: default_retention_days(),
            compress_history: true,
            cleanup_interval_seconds: default_cleanup_interval(),
        }
    }
}

fn default_console_level() -> String {
    "warn".to_string()
}

fn default_true() -> bool {
    true
}

fn default_retention_days() -> i64 {
    30
}

fn default_cleanup_interval() -> u64 {
    3600
}

static LOG_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();

/// 安装全局日志订阅者并启动维护任务
///
/// 每个进程只能调用一次. 在 tokio 运行时内调用时维护任务挂在该运行时上.
pub fn init(config: LoggingConfig) -> Result<()> {
    std::fs::create_dir_all(&config.directory)
        .with_context(|| format!("创建日志目录失败, path={}", config.directory))?;

    let rotate_requested = Arc::new(AtomicBool::new(false));
    let file_appender = CurrentFileWriter::new(
        Path::new(&config.directory),
        &config.file_prefix,
        Arc::clone(&rotate_requested),
    )?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    LOG_GUARD.set(guard).ok();

    let console_layer = fmt::Layer::default()
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .event_format(ConsoleFormatter)
        .with_filter(EnvFilter::new(&config.console_level));

    let file_layer = fmt::Layer::default()
        .with_writer(non_blocking)
        .with_ansi(false)
        .event_format(FileFormatter)
        .with_filter(EnvFilter::new(&config.level));

    Registry::default()
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context("安装日志订阅者失败")?;

    maintenance::spawn(config, rotate_requested)
}

/// 始终写入当天日期文件的写入器, 跨天时由维护任务通知重新打开
struct CurrentFileWriter {
    directory: PathBuf,
    prefix: String,
    rotate_requested: Arc<AtomicBool>,
    file: File,
}

impl CurrentFileWriter {
    fn new(directory: &Path, prefix: &str, rotate_requested: Arc<AtomicBool>) -> Result<Self> {
        let today = Local::now().date_naive();
        let file = open_append_file(&build_current_log_path(directory, prefix, today))?;
        Ok(Self {
            directory: directory.to_path_buf(),
            prefix: prefix.to_string(),
            rotate_requested,
            file,
        })
    }

    fn reopen_current_file(&mut self) -> std::io::Result<()> {
        let today = Local::now().date_naive();
        let path = build_current_log_path(&self.directory, &self.prefix, today);
        self.file = open_append_file(&path).map_err(std::io::Error::other)?;
        Ok(())
    }
}

impl Write for CurrentFileWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if self.rotate_requested.swap(false, Ordering::AcqRel) {
            self.reopen_current_file()?;
        }
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.file.flush()
    }
}

fn open_append_file(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("打开日志文件失败, path={}", path.display()))
}

/// `<directory>/<prefix>.<YYYY-MM-DD>.log`
pub(crate) fn build_current_log_path(directory: &Path, prefix: &str, date: NaiveDate) -> PathBuf {
    directory.join(format!("{}.{}.log", prefix, date.format("%Y-%m-%d")))
}

fn write_timestamp(writer: &mut Writer<'_>) -> std::fmt::Result {
    let now = Local::now();
    write!(
        writer,
        "[{:02}-{:02} {:02}:{:02}:{:02}.{:03}] ",
        now.month(),
        now.day(),
        now.hour(),
        now.minute(),
        now.second(),
        now.timestamp_subsec_millis()
    )
}

struct ConsoleFormatter;

impl<S, N> FormatEvent<S, N> for ConsoleFormatter
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &fmt::FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let meta = event.metadata();
        write_timestamp(&mut writer)?;
        let color = match *meta.level() {
            tracing::Level::ERROR => "\x1b[31m",
            tracing::Level::WARN => "\x1b[33m",
            tracing::Level::INFO => "\x1b[32m",
            _ => "\x1b[34m",
        };
        write!(writer, "{}{:5}\x1b[0m ", color, meta.level().to_string())?;
        // log 桥接的事件没有源码位置
        if let (Some(file), Some(line)) = (meta.file(), meta.line()) {
            write!(writer, "{}:{} ", file, line)?;
        }
        write!(writer, "> ")?;
        ctx.format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

struct FileFormatter;

impl<S, N> FormatEvent<S, N> for FileFormatter
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &fmt::FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        write_timestamp(&mut writer)?;
        write!(writer, "{:5} > ", event.metadata().level().to_string())?;
        ctx.format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_日志文件路径() {
        let date = NaiveDate::from_ymd_opt(2026, 2, 6);
        match date {
            Some(date) => {
                let path = build_current_log_path(Path::new("logs"), "tao-dump", date);
                assert_eq!(path, PathBuf::from("logs/tao-dump.2026-02-06.log"));
            }
            None => panic!("测试日期初始化失败"),
        }
    }

    #[test]
    fn test_配置默认值() {
        let json = r#"{"level":"info","directory":"logs","file_prefix":"tao-dump"}"#;
        let config: LoggingConfig = match serde_json::from_str(json) {
            Ok(config) => config,
            Err(err) => panic!("解析日志配置失败: {}", err),
        };
        assert_eq!(config.console_level, "warn");
        assert_eq!(config.retention_days, 30);
        assert!(config.compress_history);
        assert_eq!(config.cleanup_interval_seconds, 3600);

        let defaults = LoggingConfig::for_directory("logs", "tao-dump");
        assert_eq!(defaults.retention_days, config.retention_days);
    }
}
