//! 多轨样本提取门面.
//!
//! 典型用法:
//! 1. `set_data_source*` 打开容器
//! 2. `track_count` / `track_format` 查看轨道, `select_track` 选中
//! 3. 可选 `seek_to`
//! 4. 循环 `sample_track_index` / `read_sample_data` / `advance`, 直到 `EndOfStream`
//!
//! 所有状态由一把互斥锁保护, 每个公开方法在整个调用期间持锁.
//! 读取、seek 和格式查询都可能阻塞在底层 I/O 上.

use std::fs::File;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::debug;
use tao_format::{
    CasToken, DataSource, Demuxer, FileFormat, FileSource, FormatFlags, FormatRegistry,
    MediaSample, SampleMeta, SeekMode, TrackFormat,
};

use crate::config::ExtractorConfig;
use crate::error::{ExtractorError, ExtractorResult};
use crate::estimator::StreamEstimate;
use crate::metrics::ExtractorMetrics;
use crate::registry::{TrackRegistry, TrackStatus};
use crate::scheduler::SampleScheduler;
use crate::seek;

/// 未消费缓存对应的可播放时长
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachedDuration {
    /// 时长 (微秒)
    pub duration_us: i64,
    /// 下载是否已结束
    pub eos: bool,
}

/// 锁内状态
struct ExtractorState {
    source: Option<Arc<dyn DataSource>>,
    demuxer: Option<Box<dyn Demuxer>>,
    cas_token: Option<CasToken>,
    tracks: TrackRegistry,
    scheduler: SampleScheduler,
    estimate: StreamEstimate,
}

impl ExtractorState {
    fn demuxer(&self) -> ExtractorResult<&dyn Demuxer> {
        self.demuxer
            .as_deref()
            .ok_or_else(|| ExtractorError::InvalidState("尚未设置数据源".into()))
    }

    fn refresh_estimate(&mut self) {
        self.estimate = StreamEstimate::compute(self.tracks.iter().map(|t| t.format()));
        debug!(
            "时长/码率已更新: duration={:?}us, bitrate={:?}bps",
            self.estimate.duration_us, self.estimate.bit_rate
        );
    }

    fn check_index(&self, index: usize) -> ExtractorResult<()> {
        let count = self.demuxer()?.track_count();
        if index >= count {
            return Err(ExtractorError::OutOfRange { index, count });
        }
        Ok(())
    }
}

/// 多轨样本提取门面
pub struct MediaExtractor {
    formats: FormatRegistry,
    config: ExtractorConfig,
    state: Mutex<ExtractorState>,
}

impl MediaExtractor {
    /// 使用默认配置和全部内置容器格式创建
    pub fn new() -> Self {
        Self::with_config(ExtractorConfig::default())
    }

    /// 使用指定配置和全部内置容器格式创建
    pub fn with_config(config: ExtractorConfig) -> Self {
        let mut formats = FormatRegistry::new();
        tao_format::register_all(&mut formats);
        Self::with_registry(config, formats)
    }

    /// 使用指定配置和容器格式注册表创建
    pub fn with_registry(config: ExtractorConfig, formats: FormatRegistry) -> Self {
        let state = ExtractorState {
            source: None,
            demuxer: None,
            cas_token: None,
            tracks: TrackRegistry::new(config.max_selected_tracks),
            scheduler: SampleScheduler::new(config.interleave),
            estimate: StreamEstimate::default(),
        };
        Self {
            formats,
            config,
            state: Mutex::new(state),
        }
    }

    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, ExtractorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ========================
    // 打开容器
    // ========================

    /// 探测并打开数据源
    pub fn set_data_source(&self, source: Arc<dyn DataSource>) -> ExtractorResult<()> {
        let mut state = self.lock();
        if state.demuxer.is_some() {
            return Err(ExtractorError::InvalidState("数据源已设置".into()));
        }
        let demuxer = self.formats.open_input(Arc::clone(&source))?;
        Self::attach(&mut state, demuxer, Some(source))
    }

    /// 打开文件中 `[offset, offset + size)` 范围内的容器
    pub fn set_data_source_fd(&self, file: File, offset: u64, size: u64) -> ExtractorResult<()> {
        let source = FileSource::from_file(file, offset, size)?;
        self.set_data_source(Arc::new(source))
    }

    /// 按 URI 打开: 本地路径或 `file://` 走文件, `http(s)://` 走 HTTP
    pub fn set_data_source_uri(
        &self,
        uri: &str,
        headers: &[(String, String)],
    ) -> ExtractorResult<()> {
        if uri.starts_with("http://") || uri.starts_with("https://") {
            return self.set_data_source(Self::open_http(uri, headers)?);
        }
        if !headers.is_empty() {
            debug!("本地数据源忽略 {} 个请求头", headers.len());
        }
        let path = uri.strip_prefix("file://").unwrap_or(uri);
        self.set_data_source(Arc::new(FileSource::open(path)?))
    }

    #[cfg(feature = "http")]
    fn open_http(uri: &str, headers: &[(String, String)]) -> ExtractorResult<Arc<dyn DataSource>> {
        Ok(Arc::new(tao_format::HttpSource::open(uri, headers)?))
    }

    #[cfg(not(feature = "http"))]
    fn open_http(uri: &str, _headers: &[(String, String)]) -> ExtractorResult<Arc<dyn DataSource>> {
        Err(tao_core::TaoError::Unsupported(format!("未启用 http 特性, 无法打开 {uri}")).into())
    }

    /// 挂接一个已经打开的解封装器 (自定义容器)
    pub fn set_demuxer(&self, demuxer: Box<dyn Demuxer>) -> ExtractorResult<()> {
        let mut state = self.lock();
        if state.demuxer.is_some() {
            return Err(ExtractorError::InvalidState("数据源已设置".into()));
        }
        Self::attach(&mut state, demuxer, None)
    }

    fn attach(
        state: &mut ExtractorState,
        mut demuxer: Box<dyn Demuxer>,
        source: Option<Arc<dyn DataSource>>,
    ) -> ExtractorResult<()> {
        if let Some(token) = &state.cas_token {
            demuxer.set_media_cas(token)?;
        }
        debug!(
            "数据源已打开: {} ({} 条轨道)",
            demuxer.name(),
            demuxer.track_count()
        );
        state.demuxer = Some(demuxer);
        state.source = source;
        Ok(())
    }

    /// 设置条件访问令牌
    ///
    /// 必须在选中任何轨道之前调用. 已有容器时立即转交, 否则保存到打开容器时.
    pub fn set_media_cas(&self, token: CasToken) -> ExtractorResult<()> {
        let mut state = self.lock();
        if !state.tracks.is_empty() {
            return Err(ExtractorError::InvalidState(
                "已有轨道被选中, 不能再设置 CAS 令牌".into(),
            ));
        }
        if let Some(demuxer) = state.demuxer.as_mut() {
            demuxer.set_media_cas(&token)?;
        }
        state.cas_token = Some(token);
        Ok(())
    }

    // ========================
    // 格式查询
    // ========================

    /// 轨道数量, 未设置数据源时为 0
    pub fn track_count(&self) -> usize {
        self.lock().demuxer.as_ref().map_or(0, |d| d.track_count())
    }

    /// 获取轨道格式
    pub fn track_format(&self, index: usize, flags: FormatFlags) -> ExtractorResult<TrackFormat> {
        let mut state = self.lock();
        state.check_index(index)?;
        let demuxer = state
            .demuxer
            .as_mut()
            .ok_or_else(|| ExtractorError::InvalidState("尚未设置数据源".into()))?;
        Ok(demuxer.track_format(index, flags)?)
    }

    /// 获取容器级格式
    pub fn file_format(&self) -> ExtractorResult<FileFormat> {
        Ok(self.lock().demuxer()?.file_format())
    }

    /// 容器信息摘要
    pub fn metrics(&self) -> ExtractorResult<ExtractorMetrics> {
        Ok(ExtractorMetrics::collect(self.lock().demuxer()?))
    }

    // ========================
    // 轨道选择
    // ========================

    /// 选中轨道, 为其创建独立的读取器
    pub fn select_track(&self, index: usize) -> ExtractorResult<()> {
        let mut guard = self.lock();
        let state = &mut *guard;
        let demuxer = state
            .demuxer
            .as_mut()
            .ok_or_else(|| ExtractorError::InvalidState("尚未设置数据源".into()))?;
        let count = demuxer.track_count();
        state.tracks.select(index, count, || {
            let format = demuxer.track_format(index, FormatFlags::empty())?;
            let source = demuxer.create_track_source(index)?;
            Ok((source, format))
        })?;
        state.refresh_estimate();
        Ok(())
    }

    /// 取消选中, 释放其缓冲样本
    pub fn unselect_track(&self, index: usize) -> ExtractorResult<()> {
        let mut state = self.lock();
        state.tracks.unselect(index)?;
        if state.scheduler.last_advanced() == Some(index) {
            state.scheduler.reset();
        }
        state.refresh_estimate();
        Ok(())
    }

    /// 选中的轨道索引, 按选中顺序
    pub fn selected_tracks(&self) -> Vec<usize> {
        self.lock().tracks.indices()
    }

    /// 选中轨道的 sticky 读取状态
    pub fn track_status(&self, index: usize) -> ExtractorResult<TrackStatus> {
        self.lock()
            .tracks
            .get(index)
            .map(|t| t.status().clone())
            .ok_or(ExtractorError::NotSelected(index))
    }

    // ========================
    // 定位与读取
    // ========================

    /// 把所有选中轨道定位到 `time_us`
    ///
    /// 各轨道独立定位, 个别轨道失败只记录在该轨道上, 可通过
    /// [`track_status`](Self::track_status) 查询.
    pub fn seek_to(&self, time_us: i64, mode: SeekMode) -> ExtractorResult<()> {
        let mut guard = self.lock();
        let state = &mut *guard;
        state.demuxer()?;
        state.scheduler.reset();
        let result = seek::seek_to(&mut state.tracks, time_us, mode);
        state.refresh_estimate();
        result
    }

    /// 消费当前样本
    pub fn advance(&self) -> ExtractorResult<()> {
        let mut guard = self.lock();
        let state = &mut *guard;
        state.scheduler.advance(&mut state.tracks)
    }

    /// 把当前样本复制到 `buffer`, 返回字节数
    pub fn read_sample_data(&self, buffer: &mut [u8]) -> ExtractorResult<usize> {
        self.with_current(|sample| {
            let needed = sample.size();
            if buffer.len() < needed {
                return Err(ExtractorError::BufferTooSmall {
                    needed,
                    capacity: buffer.len(),
                });
            }
            buffer[..needed].copy_from_slice(&sample.data);
            Ok(needed)
        })
    }

    /// 当前样本 (负载为共享引用, 不复制数据)
    pub fn sample(&self) -> ExtractorResult<MediaSample> {
        self.with_current(|sample| Ok(sample.clone()))
    }

    /// 当前样本大小
    pub fn sample_size(&self) -> ExtractorResult<usize> {
        self.with_current(|sample| Ok(sample.size()))
    }

    /// 当前样本所属的轨道索引
    pub fn sample_track_index(&self) -> ExtractorResult<usize> {
        let mut guard = self.lock();
        let state = &mut *guard;
        let track = state.scheduler.current_track(&mut state.tracks)?;
        Ok(track.track_index())
    }

    /// 当前样本时间 (微秒)
    pub fn sample_time(&self) -> ExtractorResult<i64> {
        self.with_current(|sample| Ok(sample.meta.time_us))
    }

    /// 当前样本元数据
    pub fn sample_meta(&self) -> ExtractorResult<SampleMeta> {
        self.with_current(|sample| Ok(sample.meta.clone()))
    }

    fn with_current<T>(
        &self,
        f: impl FnOnce(&MediaSample) -> ExtractorResult<T>,
    ) -> ExtractorResult<T> {
        let mut guard = self.lock();
        let state = &mut *guard;
        let track = state.scheduler.current_track(&mut state.tracks)?;
        let sample = track.sample().ok_or(ExtractorError::NoSampleBuffered)?;
        f(sample)
    }

    // ========================
    // 时长与码率
    // ========================

    /// 所选轨道中最长的时长
    pub fn duration_us(&self) -> Option<i64> {
        self.lock().estimate.duration_us
    }

    /// 所选轨道码率之和, 任一未知时为 None
    pub fn total_bitrate(&self) -> Option<u64> {
        self.lock().estimate.bit_rate
    }

    /// 数据源缓存中尚未消费部分的可播放时长
    ///
    /// 需要数据源报告缓存状态且总码率已知, 否则返回 None.
    pub fn cached_duration(&self) -> Option<CachedDuration> {
        let state = self.lock();
        let status = state.source.as_ref()?.cache_status()?;
        let bit_rate = state.estimate.bit_rate.filter(|b| *b > 0)?;
        let micros = u128::from(status.remaining_bytes) * 8_000_000 / u128::from(bit_rate);
        Some(CachedDuration {
            duration_us: i64::try_from(micros).unwrap_or(i64::MAX),
            eos: status.finished,
        })
    }
}

impl Default for MediaExtractor {
    fn default() -> Self {
        Self::new()
    }
}
