//! WAV (RIFF WAVE) 解封装器.
//!
//! WAV 文件结构:
//! ```text
//! RIFF header:  "RIFF" + file_size-8 + "WAVE"
//! fmt  chunk:   "fmt " + chunk_size + audio_format + channels + sample_rate
//!              + byte_rate + block_align + bits_per_sample
//! data chunk:   "data" + data_size + PCM samples...
//! ```
//!
//! 只有一条 PCM 音频轨. 样本按固定的 [`FRAMES_PER_SAMPLE`] 帧网格切分,
//! 网格点即同步点; `SeekMode::Closest` 可落在任意帧上, 之后的第一个样本
//! 截短到下一个网格点, 再恢复网格对齐.

use std::io::SeekFrom;
use std::sync::Arc;

use bytes::Bytes;
use log::{debug, warn};
use tao_core::{CodecId, Rational, Rounding, TaoError, TaoResult};

use crate::demuxer::Demuxer;
use crate::format::{FileFormat, FormatFlags, TrackFormat, TrackParams};
use crate::format_id::FormatId;
use crate::io::{DataSource, IoContext};
use crate::probe::{FormatProbe, ProbeScore, SCORE_EXTENSION, SCORE_MAX, has_extension};
use crate::track::{MediaSample, ReadOptions, SampleFlags, SeekMode, TrackSource};

/// WAV 音频格式码
const WAV_FORMAT_PCM: u16 = 0x0001;
/// WAV IEEE 浮点格式码
const WAV_FORMAT_IEEE_FLOAT: u16 = 0x0003;

/// 每个样本包含的 PCM 帧数
pub const FRAMES_PER_SAMPLE: u64 = 1024;

/// 解析出的 WAV 头部信息
#[derive(Debug, Clone)]
struct WavInfo {
    codec_id: CodecId,
    channels: u16,
    sample_rate: u32,
    block_align: u16,
    bits_per_sample: u16,
    /// data 块在数据源中的起始偏移
    data_offset: u64,
    /// data 块大小 (字节)
    data_size: u64,
}

impl WavInfo {
    fn time_base(&self) -> Rational {
        Rational::new(1, self.sample_rate as i32)
    }

    fn total_frames(&self) -> u64 {
        self.data_size / u64::from(self.block_align)
    }

    fn bit_rate(&self) -> u64 {
        u64::from(self.sample_rate) * u64::from(self.channels) * u64::from(self.bits_per_sample)
    }
}

/// WAV 解封装器
pub struct WavDemuxer {
    source: Option<Arc<dyn DataSource>>,
    info: Option<WavInfo>,
}

impl WavDemuxer {
    /// 创建 WAV 解封装器实例 (工厂函数)
    pub fn create() -> TaoResult<Box<dyn Demuxer>> {
        Ok(Box::new(Self {
            source: None,
            info: None,
        }))
    }

    fn info(&self) -> TaoResult<&WavInfo> {
        self.info
            .as_ref()
            .ok_or_else(|| TaoError::Internal("WAV 解封装器尚未打开".into()))
    }

    /// 根据 WAV 格式码和位深确定 CodecId
    fn resolve_codec_id(audio_format: u16, bits_per_sample: u16) -> TaoResult<CodecId> {
        match (audio_format, bits_per_sample) {
            (WAV_FORMAT_PCM, 8) => Ok(CodecId::PcmU8),
            (WAV_FORMAT_PCM, 16) => Ok(CodecId::PcmS16le),
            (WAV_FORMAT_PCM, 24) => Ok(CodecId::PcmS24le),
            (WAV_FORMAT_PCM, 32) => Ok(CodecId::PcmS32le),
            (WAV_FORMAT_IEEE_FLOAT, 32) => Ok(CodecId::PcmF32le),
            _ => Err(TaoError::Unsupported(format!(
                "不支持的 WAV 格式: format=0x{:04X}, bits={}",
                audio_format, bits_per_sample
            ))),
        }
    }

    /// 解析 RIFF 头与 fmt/data 块
    fn parse_header(io: &mut IoContext) -> TaoResult<WavInfo> {
        if &io.read_tag()? != b"RIFF" {
            return Err(TaoError::InvalidData("不是有效的 RIFF 文件".into()));
        }
        let _riff_size = io.read_u32_le()?;
        if &io.read_tag()? != b"WAVE" {
            return Err(TaoError::InvalidData("不是有效的 WAVE 文件".into()));
        }

        let mut fmt: Option<(u16, u16, u32, u16, u16)> = None;
        loop {
            let chunk_id = match io.read_tag() {
                Ok(tag) => tag,
                Err(TaoError::Eof) => return Err(TaoError::InvalidData("未找到 data 块".into())),
                Err(e) => return Err(e),
            };
            let chunk_size = u64::from(io.read_u32_le()?);

            match &chunk_id {
                b"fmt " => {
                    if chunk_size < 16 {
                        return Err(TaoError::InvalidData("fmt 块大小不足 16 字节".into()));
                    }
                    let audio_format = io.read_u16_le()?;
                    let channels = io.read_u16_le()?;
                    let sample_rate = io.read_u32_le()?;
                    let _byte_rate = io.read_u32_le()?;
                    let block_align = io.read_u16_le()?;
                    let bits_per_sample = io.read_u16_le()?;
                    debug!(
                        "fmt: format={}, channels={}, rate={}, block_align={}, bits={}",
                        audio_format, channels, sample_rate, block_align, bits_per_sample,
                    );
                    io.skip(chunk_size - 16)?;
                    fmt = Some((audio_format, channels, sample_rate, block_align, bits_per_sample));
                }
                b"data" => {
                    let Some((audio_format, channels, sample_rate, block_align, bits)) = fmt else {
                        return Err(TaoError::InvalidData("data 块出现在 fmt 块之前".into()));
                    };
                    if block_align == 0 || sample_rate == 0 || sample_rate > i32::MAX as u32 {
                        return Err(TaoError::InvalidData(format!(
                            "无效的 WAV 参数: block_align={block_align}, rate={sample_rate}"
                        )));
                    }
                    let data_offset = io.position()?;
                    // 部分写入不完整的文件 data_size 会超出实际大小
                    let available = io.size().map_or(chunk_size, |s| s.saturating_sub(data_offset));
                    return Ok(WavInfo {
                        codec_id: Self::resolve_codec_id(audio_format, bits)?,
                        channels,
                        sample_rate,
                        block_align,
                        bits_per_sample: bits,
                        data_offset,
                        data_size: chunk_size.min(available),
                    });
                }
                _ => {
                    warn!(
                        "跳过未知块: '{}', 大小={}",
                        String::from_utf8_lossy(&chunk_id),
                        chunk_size
                    );
                    io.skip(chunk_size)?;
                }
            }

            // RIFF 块要求偶数对齐
            if chunk_size % 2 != 0 {
                io.skip(1)?;
            }
        }
    }
}

impl Demuxer for WavDemuxer {
    fn format_id(&self) -> FormatId {
        FormatId::Wav
    }

    fn name(&self) -> &str {
        "wav"
    }

    fn open(&mut self, source: Arc<dyn DataSource>) -> TaoResult<()> {
        let mut io = source.open_reader()?;
        let info = Self::parse_header(&mut io)?;
        debug!(
            "WAV 打开完成: {} Hz, {} 声道, {} 位, 总帧数={}",
            info.sample_rate,
            info.channels,
            info.bits_per_sample,
            info.total_frames(),
        );
        self.info = Some(info);
        self.source = Some(source);
        Ok(())
    }

    fn track_count(&self) -> usize {
        usize::from(self.info.is_some())
    }

    fn track_format(&mut self, index: usize, flags: FormatFlags) -> TaoResult<TrackFormat> {
        if index != 0 {
            return Err(TaoError::TrackNotFound(index));
        }
        let info = self.info()?;
        let mut format = TrackFormat::new(
            info.codec_id,
            TrackParams::Audio {
                sample_rate: info.sample_rate,
                channels: u32::from(info.channels),
                bits_per_sample: u32::from(info.bits_per_sample),
            },
        );
        format.duration_us = info.time_base().to_micros(info.total_frames() as i64);
        format.bit_rate = Some(info.bit_rate());
        if flags.contains(FormatFlags::INCLUDE_EXTENSIVE_METADATA) {
            format.sample_count = Some(info.total_frames().div_ceil(FRAMES_PER_SAMPLE));
            format.max_sample_size = Some((FRAMES_PER_SAMPLE * u64::from(info.block_align)) as usize);
        }
        Ok(format)
    }

    fn file_format(&self) -> FileFormat {
        let duration_us = self
            .info
            .as_ref()
            .and_then(|info| info.time_base().to_micros(info.total_frames() as i64));
        FileFormat {
            format_id: FormatId::Wav,
            duration_us,
            metadata: Vec::new(),
        }
    }

    fn create_track_source(&self, index: usize) -> TaoResult<Box<dyn TrackSource>> {
        if index != 0 {
            return Err(TaoError::TrackNotFound(index));
        }
        let info = self.info()?.clone();
        let source = self
            .source
            .as_ref()
            .ok_or_else(|| TaoError::Internal("WAV 解封装器尚未打开".into()))?;
        let mut io = source.open_reader()?;
        io.seek(SeekFrom::Start(info.data_offset))?;
        Ok(Box::new(WavTrackSource {
            io,
            info,
            frame_pos: 0,
        }))
    }
}

/// WAV 轨道读取器
struct WavTrackSource {
    io: IoContext,
    info: WavInfo,
    /// 下一个样本的起始帧
    frame_pos: u64,
}

impl WavTrackSource {
    /// 计算 seek 目标帧
    fn resolve_seek_frame(&self, time_us: i64, mode: SeekMode) -> u64 {
        let tb = self.info.time_base();
        let total = self.info.total_frames();
        let exact = (tb
            .from_micros(time_us.max(0), Rounding::Nearest)
            .unwrap_or(0)
            .max(0) as u64)
            .min(total);
        let floor_grid = (exact / FRAMES_PER_SAMPLE) * FRAMES_PER_SAMPLE;
        let ceil_grid = exact.div_ceil(FRAMES_PER_SAMPLE) * FRAMES_PER_SAMPLE;
        let frame = match mode {
            SeekMode::Closest => exact,
            SeekMode::PreviousSync => floor_grid,
            SeekMode::NextSync => ceil_grid,
            // 等距时取靠前的同步点
            SeekMode::ClosestSync => {
                if ceil_grid >= total || exact - floor_grid <= ceil_grid - exact {
                    floor_grid
                } else {
                    ceil_grid
                }
            }
        };
        frame.min(total)
    }
}

impl TrackSource for WavTrackSource {
    fn read(&mut self, options: &ReadOptions) -> TaoResult<MediaSample> {
        let block_align = u64::from(self.info.block_align);
        if let Some(target) = options.seek {
            let frame = self.resolve_seek_frame(target.time_us, target.mode);
            self.io
                .seek(SeekFrom::Start(self.info.data_offset + frame * block_align))?;
            self.frame_pos = frame;
            debug!(
                "WAV seek: 目标={}us, 模式={}, 落点帧={}",
                target.time_us,
                target.mode.name(),
                frame
            );
        }

        let total = self.info.total_frames();
        if self.frame_pos >= total {
            return Err(TaoError::Eof);
        }
        let next_grid = (self.frame_pos / FRAMES_PER_SAMPLE + 1) * FRAMES_PER_SAMPLE;
        let frames = next_grid.min(total) - self.frame_pos;
        let data = self.io.read_bytes((frames * block_align) as usize)?;

        let tb = self.info.time_base();
        let mut sample = MediaSample::new(
            Bytes::from(data),
            tb.to_micros(self.frame_pos as i64).unwrap_or(0),
        );
        sample.meta.duration_us = tb.to_micros(frames as i64);
        sample.meta.flags = SampleFlags::SYNC;
        sample.meta.byte_offset = Some(self.info.data_offset + self.frame_pos * block_align);

        self.frame_pos += frames;
        Ok(sample)
    }
}

/// WAV 格式探测器
pub struct WavProbe;

impl FormatProbe for WavProbe {
    fn probe(&self, data: &[u8], filename: Option<&str>) -> Option<ProbeScore> {
        if data.len() >= 12 && &data[0..4] == b"RIFF" && &data[8..12] == b"WAVE" {
            return Some(SCORE_MAX);
        }
        if has_extension(filename, &["wav", "wave"]) {
            return Some(SCORE_EXTENSION);
        }
        None
    }

    fn format_id(&self) -> FormatId {
        FormatId::Wav
    }
}
