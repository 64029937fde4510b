//! tao-dump - 多轨样本提取工具
//!
//! 打开媒体文件或 URL, 列出轨道格式, 可选地 seek, 然后按交织顺序
//! 导出样本的轨道、时间、大小与标志.

use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use serde::Serialize;
use std::path::PathBuf;
use std::process;

use tao_extract::logging::{self, LoggingConfig};
use tao_extractor::{ExtractorConfig, ExtractorError, MediaExtractor};
use tao_format::{FormatFlags, SampleFlags, SeekMode, TrackFormat, TrackParams};

/// Tao 多轨样本提取工具
#[derive(Parser, Debug)]
#[command(name = "tao-dump", version, about = "纯 Rust 多轨样本提取工具")]
struct Cli {
    /// 输入文件路径或 URL
    input: Option<String>,

    /// 选中的轨道索引, 可重复; 缺省选中全部轨道
    #[arg(short, long = "track")]
    tracks: Vec<usize>,

    /// 读取前 seek 到该时间 (微秒)
    #[arg(long)]
    seek_us: Option<i64>,

    /// seek 模式
    #[arg(long, value_enum, default_value_t = SeekModeArg::ClosestSync)]
    seek_mode: SeekModeArg,

    /// 最多导出的样本数
    #[arg(long)]
    max_samples: Option<u64>,

    /// 输出 JSON 格式
    #[arg(long)]
    json: bool,

    /// 获取扩展元数据 (会扫描整个文件)
    #[arg(long)]
    extensive: bool,

    /// HTTP 请求头, 格式为 `名称: 值`, 可重复
    #[arg(long = "header", value_parser = parse_header)]
    headers: Vec<(String, String)>,

    /// 提取配置文件 (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// 日志目录; 设置后日志同时写入按日期命名的文件
    #[arg(long)]
    log_dir: Option<String>,

    /// 输出调试日志
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SeekModeArg {
    PreviousSync,
    NextSync,
    ClosestSync,
    Closest,
}

impl From<SeekModeArg> for SeekMode {
    fn from(mode: SeekModeArg) -> Self {
        match mode {
            SeekModeArg::PreviousSync => SeekMode::PreviousSync,
            SeekModeArg::NextSync => SeekMode::NextSync,
            SeekModeArg::ClosestSync => SeekMode::ClosestSync,
            SeekModeArg::Closest => SeekMode::Closest,
        }
    }
}

fn parse_header(value: &str) -> std::result::Result<(String, String), String> {
    let (name, val) = value
        .split_once(':')
        .ok_or_else(|| format!("请求头缺少 ':' 分隔符: {value}"))?;
    Ok((name.trim().to_string(), val.trim().to_string()))
}

// ============================================================
// JSON 输出结构体
// ============================================================

#[derive(Serialize)]
struct DumpOutput {
    format: FormatInfo,
    tracks: Vec<TrackInfo>,
    samples: Vec<SampleInfo>,
    summary: Summary,
}

#[derive(Serialize)]
struct FormatInfo {
    input: String,
    format_name: String,
    mime: String,
    nb_tracks: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration_us: Option<i64>,
    metadata: Vec<(String, String)>,
}

#[derive(Serialize)]
struct TrackInfo {
    index: usize,
    codec_type: String,
    codec_name: String,
    mime: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration_us: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    bit_rate: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sample_rate: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    channels: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sample_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_sample_size: Option<usize>,
    codec_private_len: usize,
}

#[derive(Serialize)]
struct SampleInfo {
    track: usize,
    time_us: i64,
    size: usize,
    sync: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    page_samples: Option<i32>,
}

#[derive(Serialize)]
struct Summary {
    selected: Vec<usize>,
    total_samples: u64,
    total_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration_us: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    bit_rate: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

// ============================================================
// 主逻辑
// ============================================================

fn main() {
    let cli = Cli::parse();
    let Some(input) = cli.input.clone() else {
        print_banner();
        return;
    };

    if let Err(err) = init_logging(&cli) {
        eprintln!("错误: {err:#}");
        process::exit(1);
    }
    if let Err(err) = run(&cli, &input) {
        log::error!("{err:#}");
        eprintln!("错误: {err:#}");
        process::exit(1);
    }
}

fn init_logging(cli: &Cli) -> Result<()> {
    let level = if cli.verbose { "debug" } else { "warn" };
    match &cli.log_dir {
        Some(dir) => {
            let mut config = LoggingConfig::for_directory(dir.clone(), "tao-dump");
            config.console_level = level.to_string();
            logging::init(config)
        }
        None => {
            env_logger::Builder::new()
                .parse_filters(level)
                .try_init()
                .context("初始化日志失败")?;
            Ok(())
        }
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<ExtractorConfig> {
    let Some(path) = path else {
        return Ok(ExtractorConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("读取配置文件失败, path={}", path.display()))?;
    ExtractorConfig::from_json(&text)
        .with_context(|| format!("解析配置文件失败, path={}", path.display()))
}

fn run(cli: &Cli, input: &str) -> Result<()> {
    let config = load_config(cli.config.as_ref())?;
    let extractor = MediaExtractor::with_config(config);
    extractor
        .set_data_source_uri(input, &cli.headers)
        .with_context(|| format!("无法打开 '{input}'"))?;

    let file_format = extractor.file_format()?;
    let metrics = extractor.metrics()?;
    let format_info = FormatInfo {
        input: input.to_string(),
        format_name: metrics.format,
        mime: metrics.mime,
        nb_tracks: metrics.track_count,
        duration_us: file_format.duration_us,
        metadata: file_format.metadata,
    };

    let flags = if cli.extensive {
        FormatFlags::INCLUDE_EXTENSIVE_METADATA
    } else {
        FormatFlags::empty()
    };
    let mut tracks = Vec::with_capacity(format_info.nb_tracks);
    for index in 0..format_info.nb_tracks {
        let format = extractor
            .track_format(index, flags)
            .with_context(|| format!("读取轨道 #{index} 格式失败"))?;
        tracks.push(build_track_info(index, &format));
    }

    let selected: Vec<usize> = if cli.tracks.is_empty() {
        (0..format_info.nb_tracks).collect()
    } else {
        cli.tracks.clone()
    };
    if selected.is_empty() {
        bail!("没有可选中的轨道");
    }
    for &index in &selected {
        extractor
            .select_track(index)
            .with_context(|| format!("选中轨道 #{index} 失败"))?;
    }

    if let Some(time_us) = cli.seek_us {
        match extractor.seek_to(time_us, cli.seek_mode.into()) {
            Ok(()) | Err(ExtractorError::EndOfStream) => {}
            Err(err) => {
                return Err(err).with_context(|| format!("seek 到 {time_us}us 失败"));
            }
        }
    }

    let (samples, mut summary) = dump_samples(&extractor, cli)?;
    summary.selected = extractor.selected_tracks();

    if cli.json {
        let output = DumpOutput {
            format: format_info,
            tracks,
            samples,
            summary,
        };
        let json = serde_json::to_string_pretty(&output).context("序列化输出失败")?;
        println!("{json}");
    } else {
        print_format_text(&format_info);
        print_tracks_text(&tracks);
        print_samples_text(&samples);
        print_summary_text(&summary);
    }
    Ok(())
}

/// 按交织顺序读取样本, 直到流结束或达到上限
fn dump_samples(extractor: &MediaExtractor, cli: &Cli) -> Result<(Vec<SampleInfo>, Summary)> {
    let mut samples = Vec::new();
    let mut summary = Summary {
        selected: Vec::new(),
        total_samples: 0,
        total_bytes: 0,
        duration_us: extractor.duration_us(),
        bit_rate: extractor.total_bitrate(),
        error: None,
    };

    while cli.max_samples.is_none_or(|max| summary.total_samples < max) {
        let track = match extractor.sample_track_index() {
            Ok(track) => track,
            Err(ExtractorError::NoSampleBuffered) => break,
            Err(err) => return Err(err.into()),
        };
        let sample = extractor.sample()?;
        summary.total_samples += 1;
        summary.total_bytes += sample.size() as u64;
        samples.push(SampleInfo {
            track,
            time_us: sample.meta.time_us,
            size: sample.size(),
            sync: sample.meta.flags.contains(SampleFlags::SYNC),
            page_samples: sample.meta.page_samples,
        });

        match extractor.advance() {
            Ok(()) | Err(ExtractorError::EndOfStream) => {}
            Err(err) => {
                // 单条轨道出错时其余轨道仍可继续
                log::warn!("推进样本时出错: {err}");
                summary.error = Some(err.to_string());
            }
        }
    }
    Ok((samples, summary))
}

fn build_track_info(index: usize, format: &TrackFormat) -> TrackInfo {
    let mut info = TrackInfo {
        index,
        codec_type: format.media_type().to_string(),
        codec_name: format.codec_id.to_string(),
        mime: format.mime().to_string(),
        duration_us: format.duration_us,
        bit_rate: format.bit_rate,
        sample_rate: None,
        channels: None,
        width: None,
        height: None,
        sample_count: format.sample_count,
        max_sample_size: format.max_sample_size,
        codec_private_len: format.codec_private.len(),
    };
    match format.params {
        TrackParams::Audio {
            sample_rate,
            channels,
            ..
        } => {
            info.sample_rate = Some(sample_rate);
            info.channels = Some(channels);
        }
        TrackParams::Video { width, height } => {
            info.width = Some(width);
            info.height = Some(height);
        }
        TrackParams::Other => {}
    }
    info
}

/// 文本输出: 容器信息
fn print_format_text(info: &FormatInfo) {
    println!("[FORMAT]");
    println!("  输入         : {}", info.input);
    println!("  格式名称     : {} ({})", info.format_name, info.mime);
    println!("  轨道数量     : {}", info.nb_tracks);
    if let Some(dur) = info.duration_us {
        println!("  时长         : {:.3} 秒", dur as f64 / 1_000_000.0);
    }
    for (key, value) in &info.metadata {
        println!("  {key:<12} : {value}");
    }
    println!("[/FORMAT]");
    println!();
}

/// 文本输出: 轨道信息
fn print_tracks_text(tracks: &[TrackInfo]) {
    for track in tracks {
        println!("[TRACK #{}]", track.index);
        println!("  类型         : {}", track.codec_type);
        println!("  编解码器     : {} ({})", track.codec_name, track.mime);
        if let Some(dur) = track.duration_us {
            println!("  时长         : {:.3} 秒", dur as f64 / 1_000_000.0);
        }
        if let Some(br) = track.bit_rate {
            println!("  码率         : {} kbps", br / 1000);
        }
        if let Some(sr) = track.sample_rate {
            println!("  采样率       : {sr} Hz");
        }
        if let Some(ch) = track.channels {
            println!("  声道数       : {ch}");
        }
        if let (Some(w), Some(h)) = (track.width, track.height) {
            println!("  分辨率       : {w}x{h}");
        }
        if let Some(count) = track.sample_count {
            println!("  样本数       : {count}");
        }
        if let Some(max) = track.max_sample_size {
            println!("  最大样本     : {max} 字节");
        }
        if track.codec_private_len > 0 {
            println!("  初始化数据   : {} 段", track.codec_private_len);
        }
        println!("[/TRACK]");
        println!();
    }
}

/// 文本输出: 样本列表
fn print_samples_text(samples: &[SampleInfo]) {
    println!("[SAMPLES]");
    for sample in samples {
        let sync = if sample.sync { "S" } else { "-" };
        print!(
            "  #{:<3} {:>12}us {:>8} 字节 {}",
            sample.track, sample.time_us, sample.size, sync
        );
        match sample.page_samples {
            Some(count) => println!(" page_samples={count}"),
            None => println!(),
        }
    }
    println!("[/SAMPLES]");
    println!();
}

/// 文本输出: 统计
fn print_summary_text(summary: &Summary) {
    println!("[SUMMARY]");
    println!("  选中轨道     : {:?}", summary.selected);
    println!("  样本总数     : {}", summary.total_samples);
    println!(
        "  数据总量     : {} 字节 ({:.2} KB)",
        summary.total_bytes,
        summary.total_bytes as f64 / 1024.0
    );
    if let Some(dur) = summary.duration_us {
        println!("  时长         : {:.3} 秒", dur as f64 / 1_000_000.0);
    }
    if let Some(br) = summary.bit_rate {
        println!("  总码率       : {} kbps", br / 1000);
    }
    if let Some(ref err) = summary.error {
        println!("  错误         : {err}");
    }
    println!("[/SUMMARY]");
}

/// 打印版本横幅
fn print_banner() {
    println!(
        "tao-dump 版本 {} -- 纯 Rust 多轨样本提取工具",
        tao_extract::version()
    );
    println!();
    println!("用法: tao-dump [选项] <输入文件或 URL>");
    println!();
    println!("选项:");
    println!("  -t, --track <N>       选中轨道 (可重复, 缺省全部)");
    println!("  --seek-us <US>        读取前 seek 到指定时间");
    println!("  --seek-mode <MODE>    previous-sync / next-sync / closest-sync / closest");
    println!("  --max-samples <N>     最多导出的样本数");
    println!("  --json                以 JSON 格式输出");
    println!("  --log-dir <DIR>       同时写入日志文件");
    println!("  -v, --verbose         输出调试日志");
    println!();
    println!("使用 --help 查看完整用法.");
}
