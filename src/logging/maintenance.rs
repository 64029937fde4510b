//! 日志维护任务: 跨天切换、历史压缩与过期清理.

use super::{LoggingConfig, build_current_log_path};
use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Local, NaiveDate, TimeZone};
use flate2::Compression;
use flate2::write::GzEncoder;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::error;

/// 启动维护任务
///
/// 调用方已处于 tokio 运行时中时挂到该运行时上,
/// 否则在独立线程里起一个单线程运行时承载.
pub(super) fn spawn(config: LoggingConfig, rotate_requested: Arc<AtomicBool>) -> Result<()> {
    if let Ok(handle) = Handle::try_current() {
        handle.spawn(run(config, rotate_requested));
        return Ok(());
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .context("创建日志维护运行时失败")?;
    thread::Builder::new()
        .name("log-maintenance".to_string())
        .spawn(move || runtime.block_on(run(config, rotate_requested)))
        .context("启动日志维护线程失败")?;
    Ok(())
}

async fn run(config: LoggingConfig, rotate_requested: Arc<AtomicBool>) {
    let mut cleanup_interval =
        tokio::time::interval(Duration::from_secs(config.cleanup_interval_seconds.max(1)));

    if let Err(err) = ensure_current_log_file(&config) {
        error!("初始化当前日志文件失败: {}", err);
    }
    if let Err(err) = cleanup_logs(&config, Local::now().date_naive()) {
        error!("启动时清理日志失败: {}", err);
    }

    let mut next_rollover_at = next_rollover_instant(Local::now());

    loop {
        tokio::select! {
            _ = cleanup_interval.tick() => {
                if let Err(err) = cleanup_logs(&config, Local::now().date_naive()) {
                    error!("清理日志失败: {}", err);
                }
            }
            _ = tokio::time::sleep_until(next_rollover_at) => {
                match ensure_current_log_file(&config) {
                    Ok(()) => rotate_requested.store(true, Ordering::Release),
                    Err(err) => error!("日志翻滚失败: {}", err),
                }
                if let Err(err) = cleanup_logs(&config, Local::now().date_naive()) {
                    error!("翻滚后清理日志失败: {}", err);
                }
                next_rollover_at = next_rollover_instant(Local::now());
            }
        }
    }
}

fn ensure_current_log_file(config: &LoggingConfig) -> Result<()> {
    let directory = Path::new(&config.directory);
    fs::create_dir_all(directory)?;
    let today = Local::now().date_naive();
    let path = build_current_log_path(directory, &config.file_prefix, today);
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("创建当前日志文件失败, path={}", path.display()))?;
    Ok(())
}

/// 删除超过保留期的日志, 压缩今天以前的未压缩日志
fn cleanup_logs(config: &LoggingConfig, today: NaiveDate) -> Result<()> {
    let directory = Path::new(&config.directory);
    if !directory.exists() {
        return Ok(());
    }
    let cutoff = today - ChronoDuration::days(config.retention_days);

    for entry in fs::read_dir(directory)? {
        let entry = entry?;
        let file_name = entry.file_name().to_string_lossy().to_string();
        let Some((date, compressed)) = parse_rotated_log_name(&file_name, &config.file_prefix)
        else {
            continue;
        };

        let path = entry.path();
        if date < cutoff {
            if let Err(err) = fs::remove_file(&path) {
                error!("删除过期日志失败, path={}: {}", path.display(), err);
            }
            continue;
        }
        if config.compress_history && !compressed && date < today {
            if let Err(err) = compress_to_gz(&path) {
                error!("{:#}", err);
            }
        }
    }
    Ok(())
}

fn compress_to_gz(path: &Path) -> Result<()> {
    let gz_path = PathBuf::from(format!("{}.gz", path.display()));
    if gz_path.exists() {
        return Ok(());
    }

    let mut input =
        File::open(path).with_context(|| format!("打开待压缩日志失败, path={}", path.display()))?;
    let output = File::create(&gz_path)
        .with_context(|| format!("创建压缩日志失败, path={}", gz_path.display()))?;
    let mut encoder = GzEncoder::new(output, Compression::default());
    std::io::copy(&mut input, &mut encoder)?;
    encoder.finish()?;

    fs::remove_file(path)
        .with_context(|| format!("删除已压缩日志失败, path={}", path.display()))?;
    Ok(())
}

/// 解析 `<prefix>.<YYYY-MM-DD>.log[.gz]`, 返回日期和是否已压缩
fn parse_rotated_log_name(file_name: &str, prefix: &str) -> Option<(NaiveDate, bool)> {
    let rest = file_name.strip_prefix(prefix)?.strip_prefix('.')?;
    let (date_part, compressed) = match rest.strip_suffix(".log.gz") {
        Some(date_part) => (date_part, true),
        None => (rest.strip_suffix(".log")?, false),
    };
    if date_part.len() != 10 {
        return None;
    }
    let date = NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()?;
    Some((date, compressed))
}

/// 下一个本地零点对应的时刻, 无法换算时一分钟后重试
fn next_rollover_instant(now: DateTime<Local>) -> tokio::time::Instant {
    let next_midnight = (now.date_naive() + ChronoDuration::days(1))
        .and_hms_opt(0, 0, 0)
        .and_then(|t| Local.from_local_datetime(&t).earliest());
    let wait = next_midnight
        .and_then(|at| (at - now).to_std().ok())
        .unwrap_or(Duration::from_secs(60));
    tokio::time::Instant::now() + wait
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;
    use tempfile::TempDir;

    fn config_in(dir: &TempDir) -> LoggingConfig {
        let mut config =
            LoggingConfig::for_directory(dir.path().to_string_lossy().to_string(), "tao-dump");
        config.retention_days = 7;
        config
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        match NaiveDate::from_ymd_opt(y, m, d) {
            Some(date) => date,
            None => panic!("测试日期无效"),
        }
    }

    #[test]
    fn test_解析日志文件名() {
        assert_eq!(
            parse_rotated_log_name("tao-dump.2026-02-06.log", "tao-dump"),
            Some((date(2026, 2, 6), false))
        );
        assert_eq!(
            parse_rotated_log_name("tao-dump.2026-02-06.log.gz", "tao-dump"),
            Some((date(2026, 2, 6), true))
        );
        assert!(parse_rotated_log_name("tao-dump.log", "tao-dump").is_none());
        assert!(parse_rotated_log_name("other.2026-02-06.log", "tao-dump").is_none());
    }

    #[test]
    fn test_清理过期并压缩历史() {
        let dir = match TempDir::new() {
            Ok(dir) => dir,
            Err(err) => panic!("创建临时目录失败: {}", err),
        };
        let config = config_in(&dir);
        let today = date(2026, 3, 20);
        let write = |name: &str| {
            if let Err(err) = fs::write(dir.path().join(name), b"line\n") {
                panic!("写入测试日志失败: {}", err);
            }
        };
        write("tao-dump.2026-03-01.log");
        write("tao-dump.2026-03-18.log");
        write("tao-dump.2026-03-20.log");
        write("unrelated.txt");

        let result = cleanup_logs(&config, today);
        assert!(result.is_ok(), "清理日志失败: {:?}", result.err());

        assert!(!dir.path().join("tao-dump.2026-03-01.log").exists());
        assert!(!dir.path().join("tao-dump.2026-03-18.log").exists());
        assert!(dir.path().join("tao-dump.2026-03-20.log").exists());
        assert!(dir.path().join("unrelated.txt").exists());

        let gz = match File::open(dir.path().join("tao-dump.2026-03-18.log.gz")) {
            Ok(file) => file,
            Err(err) => panic!("压缩日志不存在: {}", err),
        };
        let mut text = String::new();
        let read = GzDecoder::new(gz).read_to_string(&mut text);
        assert!(read.is_ok(), "解压失败: {:?}", read.err());
        assert_eq!(text, "line\n");
    }

    #[test]
    fn test_确保当前日志文件存在() {
        let dir = match TempDir::new() {
            Ok(dir) => dir,
            Err(err) => panic!("创建临时目录失败: {}", err),
        };
        let config = config_in(&dir);
        let ensured = ensure_current_log_file(&config);
        assert!(ensured.is_ok(), "创建当前日志文件失败: {:?}", ensured.err());
        let path = build_current_log_path(dir.path(), "tao-dump", Local::now().date_naive());
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_下次翻滚在一天之内() {
        let before = tokio::time::Instant::now();
        let at = next_rollover_instant(Local::now());
        assert!(at > before);
        assert!(at <= before + Duration::from_secs(25 * 3600));
    }

    #[tokio::test]
    async fn test_运行时内启动维护任务() {
        let dir = match TempDir::new() {
            Ok(dir) => dir,
            Err(err) => panic!("创建临时目录失败: {}", err),
        };
        let config = config_in(&dir);
        let old = dir.path().join("tao-dump.2000-01-01.log");
        if let Err(err) = fs::write(&old, b"old\n") {
            panic!("写入测试日志失败: {}", err);
        }

        let spawned = spawn(config, Arc::new(AtomicBool::new(false)));
        assert!(spawned.is_ok(), "启动维护任务失败: {:?}", spawned.err());

        let current = build_current_log_path(dir.path(), "tao-dump", Local::now().date_naive());
        for _ in 0..50 {
            if current.exists() && !old.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(current.exists(), "当前日志文件应被创建");
        assert!(!old.exists(), "过期日志应被删除");
    }
}
