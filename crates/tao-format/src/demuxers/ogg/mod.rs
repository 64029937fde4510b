//! Ogg 容器解封装器.
//!
//! Ogg 是一个开放的多媒体容器格式, 支持多种编解码器:
//! - Vorbis (音频)
//! - Opus (音频)
//! - FLAC (音频)
//! - Theora (视频)
//!
//! 每个逻辑流 (serial) 对应一条轨道. 打开时读取全部 BOS 页与编解码器头包,
//! 可定位的数据源还会扫描全部页面, 用最大 granule 估算时长.
//! 轨道读取器各自持有独立游标, 只解析属于自己 serial 的页面.

mod page;
mod track;

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use log::{debug, warn};
use tao_core::{CodecId, Rational, Rounding, TaoError, TaoResult};

use crate::demuxer::Demuxer;
use crate::format::{FileFormat, FormatFlags, TrackFormat, TrackParams};
use crate::format_id::FormatId;
use crate::io::DataSource;
use crate::probe::{FormatProbe, ProbeScore, SCORE_EXTENSION, SCORE_MAX, has_extension};
use crate::track::TrackSource;

use page::{OGG_SYNC, PacketAssembler};
use track::OggTrackSource;

/// granule 与时间的换算规则
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GranuleClock {
    /// granule 为累计采样数
    Samples {
        rate: u32,
        /// 需要从时间轴起点扣除的采样数 (Opus pre-skip)
        pre_skip: u64,
    },
    /// Theora: granule 高位为关键帧号, 低 `shift` 位为其后的帧偏移
    Frames { shift: u8, fps_num: u32, fps_den: u32 },
}

impl GranuleClock {
    /// 把 granule 展开为单调的计数单位 (采样数或帧数)
    fn units(&self, granule: i64) -> i64 {
        match *self {
            Self::Samples { .. } => granule,
            Self::Frames { shift, .. } => {
                if shift == 0 || shift >= 63 {
                    return granule;
                }
                let mask = (1i64 << shift) - 1;
                (granule >> shift) + (granule & mask)
            }
        }
    }

    fn time_base(&self) -> Rational {
        match *self {
            Self::Samples { rate, .. } => Rational::new(1, rate as i32),
            Self::Frames {
                fps_num, fps_den, ..
            } => Rational::new(fps_den as i32, fps_num as i32),
        }
    }

    fn offset(&self) -> i64 {
        match *self {
            Self::Samples { pre_skip, .. } => pre_skip as i64,
            Self::Frames { .. } => 0,
        }
    }

    /// 计数单位换算为微秒, 时间轴起点之前的位置截断为 0
    fn units_to_us(&self, units: i64) -> i64 {
        self.time_base()
            .to_micros((units - self.offset()).max(0))
            .unwrap_or(0)
    }

    /// 微秒换算为计数单位
    fn us_to_units(&self, time_us: i64) -> i64 {
        self.time_base()
            .from_micros(time_us.max(0), Rounding::Nearest)
            .unwrap_or(0)
            .saturating_add(self.offset())
    }
}

/// 逻辑流描述
#[derive(Debug, Clone)]
struct OggStreamInfo {
    serial: u32,
    codec_id: CodecId,
    params: TrackParams,
    clock: GranuleClock,
    bit_rate: Option<u64>,
    /// 编解码器头包数量
    header_count: usize,
    headers: Vec<Bytes>,
    /// 最后一个头包所在页的结束偏移, 之后的页才参与 seek
    data_offset: u64,
    max_granule: Option<i64>,
}

impl OggStreamInfo {
    fn duration_us(&self) -> Option<i64> {
        self.max_granule
            .map(|g| self.clock.units_to_us(self.clock.units(g)))
    }
}

/// 扩展元数据扫描结果
#[derive(Debug, Clone, Copy)]
struct ScanStats {
    sample_count: u64,
    max_sample_size: usize,
}

/// Ogg 解封装器
pub struct OggDemuxer {
    source: Option<Arc<dyn DataSource>>,
    streams: Vec<Arc<OggStreamInfo>>,
    scanned: HashMap<usize, ScanStats>,
}

impl OggDemuxer {
    /// 创建 Ogg 解封装器实例 (工厂函数)
    pub fn create() -> TaoResult<Box<dyn Demuxer>> {
        Ok(Box::new(Self {
            source: None,
            streams: Vec::new(),
            scanned: HashMap::new(),
        }))
    }

    /// 从 BOS 页面的第一个 packet 识别编解码器
    fn identify_codec(packet: &[u8]) -> CodecId {
        if packet.len() >= 7 && &packet[1..7] == b"vorbis" {
            return CodecId::Vorbis;
        }
        if packet.len() >= 8 && &packet[0..8] == b"OpusHead" {
            return CodecId::Opus;
        }
        if packet.len() >= 5 && &packet[0..5] == b"\x7fFLAC" {
            return CodecId::Flac;
        }
        if packet.len() >= 7 && &packet[1..7] == b"theora" {
            return CodecId::Theora;
        }
        CodecId::None
    }

    /// 解析识别头, 生成流描述 (不认识或损坏的头返回 None)
    fn parse_stream_info(serial: u32, packet: &[u8]) -> Option<OggStreamInfo> {
        let codec_id = Self::identify_codec(packet);
        let mut info = OggStreamInfo {
            serial,
            codec_id,
            params: TrackParams::Other,
            clock: GranuleClock::Samples {
                rate: 1,
                pre_skip: 0,
            },
            bit_rate: None,
            header_count: 0,
            headers: vec![Bytes::copy_from_slice(packet)],
            data_offset: 0,
            max_granule: None,
        };

        match codec_id {
            CodecId::Vorbis => {
                // type(1) "vorbis"(6) version(4) channels(1) rate(4) br_max(4) br_nom(4) br_min(4)
                if packet.len() < 30 || packet[0] != 1 {
                    return None;
                }
                let channels = u32::from(packet[11]);
                let rate = u32::from_le_bytes([packet[12], packet[13], packet[14], packet[15]]);
                let nominal = i32::from_le_bytes([packet[20], packet[21], packet[22], packet[23]]);
                info.params = audio_params(rate, channels, 0);
                info.clock = GranuleClock::Samples { rate, pre_skip: 0 };
                info.bit_rate = (nominal > 0).then_some(nominal as u64);
                info.header_count = 3;
            }
            CodecId::Opus => {
                // "OpusHead"(8) version(1) channels(1) pre_skip(2) input_rate(4)
                if packet.len() < 19 {
                    return None;
                }
                let channels = u32::from(packet[9]);
                let pre_skip = u16::from_le_bytes([packet[10], packet[11]]);
                info.params = audio_params(48000, channels, 0);
                info.clock = GranuleClock::Samples {
                    rate: 48000,
                    pre_skip: u64::from(pre_skip),
                };
                info.header_count = 2;
            }
            CodecId::Flac => {
                // "\x7fFLAC"(5) major(1) minor(1) num_headers(2, BE) "fLaC"(4) STREAMINFO 块
                if packet.len() < 51 || &packet[9..13] != b"fLaC" {
                    return None;
                }
                let extra_headers = u16::from_be_bytes([packet[7], packet[8]]);
                let si = &packet[17..];
                let rate =
                    (u32::from(si[10]) << 12) | (u32::from(si[11]) << 4) | (u32::from(si[12]) >> 4);
                let channels = u32::from((si[12] >> 1) & 0x07) + 1;
                let bits = (((u32::from(si[12]) & 0x01) << 4) | (u32::from(si[13]) >> 4)) + 1;
                info.params = audio_params(rate, channels, bits);
                info.clock = GranuleClock::Samples { rate, pre_skip: 0 };
                // num_headers 为 0 表示未知, 至少还有一个 VORBIS_COMMENT
                info.header_count = 1 + usize::from(extra_headers.max(1));
            }
            CodecId::Theora => {
                if packet.len() < 42 || packet[0] != 0x80 {
                    return None;
                }
                let be24 = |b: &[u8]| (u32::from(b[0]) << 16) | (u32::from(b[1]) << 8) | u32::from(b[2]);
                let be32 = |b: &[u8]| u32::from_be_bytes([b[0], b[1], b[2], b[3]]);
                let width = be24(&packet[14..17]);
                let height = be24(&packet[17..20]);
                let fps_num = be32(&packet[22..26]);
                let fps_den = be32(&packet[26..30]);
                let bitrate = be24(&packet[37..40]);
                let shift = ((packet[40] & 0x03) << 3) | (packet[41] >> 5);
                if fps_num == 0 || fps_den == 0 {
                    return None;
                }
                info.params = TrackParams::Video { width, height };
                info.clock = GranuleClock::Frames {
                    shift,
                    fps_num,
                    fps_den,
                };
                info.bit_rate = (bitrate > 0).then_some(u64::from(bitrate));
                info.header_count = 3;
            }
            _ => return None,
        }

        // 时间基分子分母都要放进 i32
        let fits = match info.clock {
            GranuleClock::Samples { rate, .. } => rate > 0 && rate <= i32::MAX as u32,
            GranuleClock::Frames {
                fps_num, fps_den, ..
            } => fps_num <= i32::MAX as u32 && fps_den <= i32::MAX as u32,
        };
        fits.then_some(info)
    }

    fn stream(&self, index: usize) -> TaoResult<&Arc<OggStreamInfo>> {
        self.streams
            .get(index)
            .ok_or(TaoError::TrackNotFound(index))
    }

    /// 读取整个轨道, 统计样本数和最大样本大小
    fn scan_track(&self, index: usize) -> TaoResult<ScanStats> {
        let mut source = self.create_track_source(index)?;
        let mut stats = ScanStats {
            sample_count: 0,
            max_sample_size: 0,
        };
        loop {
            match source.read(&Default::default()) {
                Ok(sample) => {
                    stats.sample_count += 1;
                    stats.max_sample_size = stats.max_sample_size.max(sample.size());
                }
                Err(TaoError::Eof) => break,
                Err(e) => return Err(e),
            }
        }
        debug!(
            "Ogg 轨道 #{} 扫描完成: {} 个样本, 最大 {} 字节",
            index, stats.sample_count, stats.max_sample_size
        );
        Ok(stats)
    }
}

fn audio_params(sample_rate: u32, channels: u32, bits_per_sample: u32) -> TrackParams {
    TrackParams::Audio {
        sample_rate,
        channels,
        bits_per_sample,
    }
}

impl Demuxer for OggDemuxer {
    fn format_id(&self) -> FormatId {
        FormatId::Ogg
    }

    fn name(&self) -> &str {
        "ogg"
    }

    fn open(&mut self, source: Arc<dyn DataSource>) -> TaoResult<()> {
        let mut io = source.open_reader()?;
        let mut streams: Vec<OggStreamInfo> = Vec::new();
        let mut assemblers: HashMap<u32, PacketAssembler> = HashMap::new();
        let scan_all = io.is_seekable() && io.size().is_some();

        loop {
            let page = match page::next_page(&mut io) {
                Ok(page) => page,
                Err(TaoError::Eof) => break,
                Err(e) => return Err(e),
            };

            let Some(pos) = streams.iter().position(|s| s.serial == page.serial_number) else {
                if !page.is_bos() {
                    continue;
                }
                let mut asm = PacketAssembler::default();
                let packets = asm.push(&page);
                let Some(first) = packets.first() else {
                    continue;
                };
                match Self::parse_stream_info(page.serial_number, first) {
                    Some(mut info) => {
                        debug!(
                            "Ogg: 发现流 #{}: {} (serial=0x{:08X})",
                            streams.len(),
                            info.codec_id,
                            page.serial_number
                        );
                        info.data_offset = page.end_offset();
                        if page.granule_position >= 0 {
                            info.max_granule = Some(page.granule_position);
                        }
                        assemblers.insert(page.serial_number, asm);
                        streams.push(info);
                    }
                    None => warn!(
                        "Ogg: 跳过无法识别的逻辑流 serial=0x{:08X}",
                        page.serial_number
                    ),
                }
                continue;
            };

            let info = &mut streams[pos];
            if info.headers.len() < info.header_count {
                if let Some(asm) = assemblers.get_mut(&page.serial_number) {
                    for packet in asm.push(&page) {
                        if info.headers.len() < info.header_count {
                            info.headers.push(Bytes::from(packet));
                        }
                    }
                }
                info.data_offset = page.end_offset();
            }
            if page.granule_position >= 0 {
                info.max_granule = Some(info.max_granule.map_or(page.granule_position, |g| {
                    g.max(page.granule_position)
                }));
            }

            let headers_done = streams.iter().all(|s| s.headers.len() >= s.header_count);
            if headers_done && !scan_all {
                break;
            }
        }

        if streams.is_empty() {
            return Err(TaoError::InvalidData("Ogg 文件中未找到任何可识别的流".into()));
        }
        for info in &mut streams {
            if info.headers.len() < info.header_count {
                warn!(
                    "Ogg: 流 serial=0x{:08X} 头包不完整 ({}/{})",
                    info.serial,
                    info.headers.len(),
                    info.header_count
                );
            }
            if !scan_all {
                info.max_granule = None;
            }
        }

        debug!("打开 Ogg: {} 个流", streams.len());
        self.streams = streams.into_iter().map(Arc::new).collect();
        self.scanned.clear();
        self.source = Some(source);
        Ok(())
    }

    fn track_count(&self) -> usize {
        self.streams.len()
    }

    fn track_format(&mut self, index: usize, flags: FormatFlags) -> TaoResult<TrackFormat> {
        let info = Arc::clone(self.stream(index)?);
        let mut format = TrackFormat::new(info.codec_id, info.params.clone());
        format.duration_us = info.duration_us();
        format.bit_rate = info.bit_rate;
        format.codec_private = info.headers.clone();

        if flags.contains(FormatFlags::INCLUDE_EXTENSIVE_METADATA) {
            let stats = match self.scanned.get(&index) {
                Some(stats) => *stats,
                None => {
                    let stats = self.scan_track(index)?;
                    self.scanned.insert(index, stats);
                    stats
                }
            };
            format.sample_count = Some(stats.sample_count);
            format.max_sample_size = Some(stats.max_sample_size);
        }
        Ok(format)
    }

    fn file_format(&self) -> FileFormat {
        FileFormat {
            format_id: FormatId::Ogg,
            duration_us: self.streams.iter().filter_map(|s| s.duration_us()).max(),
            metadata: Vec::new(),
        }
    }

    fn create_track_source(&self, index: usize) -> TaoResult<Box<dyn TrackSource>> {
        let info = Arc::clone(self.stream(index)?);
        let source = self
            .source
            .as_ref()
            .ok_or_else(|| TaoError::Internal("Ogg 解封装器尚未打开".into()))?;
        Ok(Box::new(OggTrackSource::new(source.open_reader()?, info)))
    }
}

/// Ogg 格式探测器
pub struct OggProbe;

impl FormatProbe for OggProbe {
    fn probe(&self, data: &[u8], filename: Option<&str>) -> Option<ProbeScore> {
        if data.len() >= 4 && &data[0..4] == OGG_SYNC {
            return Some(SCORE_MAX);
        }
        if has_extension(filename, &["ogg", "ogv", "oga", "ogx", "opus"]) {
            return Some(SCORE_EXTENSION);
        }
        None
    }

    fn format_id(&self) -> FormatId {
        FormatId::Ogg
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use crate::io::MemorySource;
    use crate::track::ReadOptions;

    fn open(data: Vec<u8>) -> Box<dyn Demuxer> {
        let mut demuxer = OggDemuxer::create().unwrap();
        demuxer.open(Arc::new(MemorySource::new(data))).unwrap();
        demuxer
    }

    #[test]
    fn test_探测_ogg() {
        let probe = OggProbe;
        assert_eq!(probe.probe(b"OggS\0", None), Some(SCORE_MAX));
        assert_eq!(probe.probe(b"RIFF", Some("a.opus")), Some(SCORE_EXTENSION));
        assert_eq!(probe.probe(b"RIFF", None), None);
    }

    #[test]
    fn test_识别编解码器() {
        assert_eq!(OggDemuxer::identify_codec(&vorbis_id(2, 44100, 0)), CodecId::Vorbis);
        assert_eq!(OggDemuxer::identify_codec(&opus_head(2, 312)), CodecId::Opus);
        assert_eq!(OggDemuxer::identify_codec(b"\x7fFLAC\x01\x00"), CodecId::Flac);
        assert_eq!(OggDemuxer::identify_codec(b"\x80theora"), CodecId::Theora);
        assert_eq!(OggDemuxer::identify_codec(b"garbage"), CodecId::None);
    }

    #[test]
    fn test_vorbis_轨道格式() {
        let mut demuxer = open(vorbis_stream(0x1234, 4));
        assert_eq!(demuxer.track_count(), 1);
        let format = demuxer.track_format(0, FormatFlags::empty()).unwrap();
        assert_eq!(format.codec_id, CodecId::Vorbis);
        assert_eq!(format.codec_private.len(), 3);
        assert_eq!(format.bit_rate, Some(96000));
        // 4096 采样 @ 44100Hz
        assert_eq!(format.duration_us, Some(92_879));
        assert_eq!(
            format.params,
            TrackParams::Audio {
                sample_rate: 44100,
                channels: 1,
                bits_per_sample: 0
            }
        );
        assert_eq!(format.sample_count, None);

        let extensive = demuxer
            .track_format(0, FormatFlags::INCLUDE_EXTENSIVE_METADATA)
            .unwrap();
        assert_eq!(extensive.sample_count, Some(4));
        assert_eq!(extensive.max_sample_size, Some(13));
        assert_eq!(demuxer.file_format().duration_us, Some(92_879));
    }

    #[test]
    fn test_多路复用流() {
        let vorbis = vorbis_stream(1, 2);
        let mut data = Vec::new();
        // 两个 BOS 页必须在最前面
        let opus_bos = build_page(FLAG_BOS, 0, 2, 0, &[&opus_head(2, 312)]);
        let first_page_len = 27 + 1 + vorbis_id(1, 44100, 96000).len();
        data.extend_from_slice(&vorbis[..first_page_len]);
        data.extend(opus_bos);
        data.extend(build_page(0, 0, 2, 1, &[b"OpusTags\0\0\0\0\0\0\0\0"]));
        data.extend_from_slice(&vorbis[first_page_len..]);
        data.extend(build_page(FLAG_EOS, 312 + 960, 2, 2, &[b"\x01\x02"]));

        let mut demuxer = open(data);
        assert_eq!(demuxer.track_count(), 2);
        let opus = demuxer.track_format(1, FormatFlags::empty()).unwrap();
        assert_eq!(opus.codec_id, CodecId::Opus);
        assert_eq!(opus.bit_rate, None);
        assert_eq!(opus.duration_us, Some(20_000));
        assert_eq!(opus.codec_private.len(), 2);

        let mut track = demuxer.create_track_source(1).unwrap();
        let sample = track.read(&ReadOptions::default()).unwrap();
        assert_eq!(&sample.data[..], b"\x01\x02");
        assert_eq!(sample.meta.time_us, 0);
    }

    #[test]
    fn test_无可识别流报错() {
        let data = build_page(FLAG_BOS, 0, 9, 0, &[b"unknown codec"]);
        let mut demuxer = OggDemuxer::create().unwrap();
        let err = demuxer.open(Arc::new(MemorySource::new(data))).unwrap_err();
        assert!(matches!(err, TaoError::InvalidData(_)));
    }

    #[test]
    fn test_轨道索引越界() {
        let mut demuxer = open(vorbis_stream(1, 1));
        assert!(matches!(
            demuxer.track_format(3, FormatFlags::empty()),
            Err(TaoError::TrackNotFound(3))
        ));
        assert!(demuxer.create_track_source(3).is_err());
    }
}
