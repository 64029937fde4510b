//! 脚本化的解封装器与轨道读取器, 用于门面测试.
//!
//! 样本序列预先给定, 每次 `create_track_source` 返回独立游标.
//! seek 按样本上的 SYNC 标志在内存中查找落点.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tao_core::{CodecId, TaoError, TaoResult};
use tao_format::{
    CasToken, DataSource, Demuxer, FileFormat, FormatFlags, FormatId, MediaSample, ReadOptions,
    SampleFlags, SeekMode, TrackFormat, TrackParams, TrackSource,
};

/// 创建音频轨格式
pub fn audio_format(codec_id: CodecId, duration_us: Option<i64>, bit_rate: Option<u64>) -> TrackFormat {
    let mut format = TrackFormat::new(
        codec_id,
        TrackParams::Audio {
            sample_rate: 48000,
            channels: 2,
            bits_per_sample: 0,
        },
    );
    format.duration_us = duration_us;
    format.bit_rate = bit_rate;
    format
}

/// 预先给定样本序列的轨道读取器
#[derive(Clone)]
pub struct ScriptedTrack {
    samples: Vec<MediaSample>,
    pos: usize,
    reads: usize,
    fail_at: Option<usize>,
    stopped: Arc<AtomicBool>,
}

impl ScriptedTrack {
    pub fn new(samples: Vec<MediaSample>) -> Self {
        Self {
            samples,
            pos: 0,
            reads: 0,
            fail_at: None,
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    /// 全部为同步样本, 负载为时间戳的小端字节
    pub fn with_times(times: &[i64]) -> Self {
        Self::with_sync_every(times, 1)
    }

    /// 每 `interval` 个样本一个同步点
    pub fn with_sync_every(times: &[i64], interval: usize) -> Self {
        let samples = times
            .iter()
            .enumerate()
            .map(|(i, &t)| {
                let mut sample = MediaSample::new(t.to_le_bytes().to_vec(), t);
                if i % interval.max(1) == 0 {
                    sample.meta.flags = SampleFlags::SYNC;
                }
                sample
            })
            .collect();
        Self::new(samples)
    }

    /// 第 `n` 次读取 (从 0 计) 返回错误
    pub fn fail_at(mut self, n: usize) -> Self {
        self.fail_at = Some(n);
        self
    }

    /// 读取器是否已被 stop 的观察句柄
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stopped)
    }

    fn seek_position(&self, time_us: i64, mode: SeekMode) -> Option<usize> {
        let candidates = self
            .samples
            .iter()
            .enumerate()
            .filter(|(_, s)| mode == SeekMode::Closest || s.is_sync());
        let mut before: Option<(usize, i64)> = None;
        let mut after: Option<(usize, i64)> = None;
        for (i, sample) in candidates {
            let t = sample.meta.time_us;
            if t <= time_us {
                before = Some((i, t));
            }
            if t >= time_us && after.is_none() {
                after = Some((i, t));
            }
        }
        match mode {
            SeekMode::PreviousSync => before.or(after).map(|(i, _)| i),
            SeekMode::NextSync => after.map(|(i, _)| i),
            SeekMode::ClosestSync | SeekMode::Closest => match (before, after) {
                (Some((bi, bt)), Some((ai, at))) => {
                    Some(if at - time_us < time_us - bt { ai } else { bi })
                }
                (b, a) => b.or(a).map(|(i, _)| i),
            },
        }
    }
}

impl TrackSource for ScriptedTrack {
    fn stop(&mut self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    fn read(&mut self, options: &ReadOptions) -> TaoResult<MediaSample> {
        let n = self.reads;
        self.reads += 1;
        if self.fail_at == Some(n) {
            return Err(TaoError::InvalidData(format!("脚本注入的第 {n} 次读取失败")));
        }
        if let Some(target) = options.seek {
            self.pos = self
                .seek_position(target.time_us, target.mode)
                .unwrap_or(self.samples.len());
        }
        let sample = self.samples.get(self.pos).cloned().ok_or(TaoError::Eof)?;
        self.pos += 1;
        Ok(sample)
    }
}

/// 预先给定轨道的解封装器
pub struct ScriptedDemuxer {
    tracks: Vec<(TrackFormat, ScriptedTrack)>,
    cas_tokens: Arc<Mutex<Vec<CasToken>>>,
}

impl ScriptedDemuxer {
    pub fn new() -> Self {
        Self {
            tracks: Vec::new(),
            cas_tokens: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// 追加一条轨道
    pub fn track(mut self, format: TrackFormat, track: ScriptedTrack) -> Self {
        self.tracks.push((format, track));
        self
    }

    /// 收到的 CAS 令牌
    pub fn cas_log(&self) -> Arc<Mutex<Vec<CasToken>>> {
        Arc::clone(&self.cas_tokens)
    }
}

impl Default for ScriptedDemuxer {
    fn default() -> Self {
        Self::new()
    }
}

impl Demuxer for ScriptedDemuxer {
    fn format_id(&self) -> FormatId {
        FormatId::Ogg
    }

    fn name(&self) -> &str {
        "scripted"
    }

    fn open(&mut self, _source: Arc<dyn DataSource>) -> TaoResult<()> {
        Ok(())
    }

    fn track_count(&self) -> usize {
        self.tracks.len()
    }

    fn track_format(&mut self, index: usize, _flags: FormatFlags) -> TaoResult<TrackFormat> {
        self.tracks
            .get(index)
            .map(|(format, _)| format.clone())
            .ok_or(TaoError::TrackNotFound(index))
    }

    fn file_format(&self) -> FileFormat {
        FileFormat {
            format_id: FormatId::Ogg,
            duration_us: self.tracks.iter().filter_map(|(f, _)| f.duration_us).max(),
            metadata: Vec::new(),
        }
    }

    fn create_track_source(&self, index: usize) -> TaoResult<Box<dyn TrackSource>> {
        let (_, track) = self
            .tracks
            .get(index)
            .ok_or(TaoError::TrackNotFound(index))?;
        Ok(Box::new(track.clone()))
    }

    fn set_media_cas(&mut self, token: &CasToken) -> TaoResult<()> {
        self.cas_tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(token.clone());
        Ok(())
    }
}
