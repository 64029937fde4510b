//! Ogg 单轨读取器.
//!
//! 时间戳规则: 在某页结束的 n 个包, 在上一页 granule 与本页 granule 之间
//! 线性分配时间. 首包时间即上一页 granule, 所以定位到某页之后开始读取时,
//! 第一个样本的时间就是该页的 granule.

use std::collections::VecDeque;
use std::io::SeekFrom;
use std::sync::Arc;

use bytes::Bytes;
use log::debug;
use tao_core::{CodecId, TaoError, TaoResult};

use super::OggStreamInfo;
use super::page::{self, OggPage, PacketAssembler};
use crate::io::IoContext;
use crate::track::{MediaSample, PageInfo, ReadOptions, SampleFlags, SeekMode, TrackSource};

/// 读取恢复点
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resume {
    /// 从文件头开始, 重新跳过头包
    Start,
    /// 从某页结束处开始, `units` 为该页 granule 展开值
    After { offset: u64, units: i64 },
    /// 没有满足条件的位置
    End,
}

/// `span * i / n`, 中间结果放宽到 i128, granule 接近 i64 上限时不溢出
fn interpolate(span: i64, i: i64, n: i64) -> i64 {
    (i128::from(span) * i128::from(i) / i128::from(n)) as i64
}

pub(super) struct OggTrackSource {
    io: IoContext,
    info: Arc<OggStreamInfo>,
    assembler: PacketAssembler,
    pending: VecDeque<MediaSample>,
    headers_to_skip: usize,
    /// 上一个有包结束的页的 granule 展开值
    prev_units: i64,
    eos: bool,
}

impl OggTrackSource {
    pub(super) fn new(io: IoContext, info: Arc<OggStreamInfo>) -> Self {
        let headers_to_skip = info.header_count;
        Self {
            io,
            info,
            assembler: PacketAssembler::default(),
            pending: VecDeque::new(),
            headers_to_skip,
            prev_units: 0,
            eos: false,
        }
    }

    fn is_sync(&self, packet: &[u8]) -> bool {
        match self.info.codec_id {
            // Theora 数据包首字节: bit7=0 数据包, bit6=0 关键帧
            CodecId::Theora => packet.first().is_some_and(|b| b & 0xC0 == 0),
            _ => true,
        }
    }

    /// 处理一个属于本轨的页面, 把结束在本页的数据包放入队列
    fn handle_page(&mut self, page: &OggPage) {
        let packets = self.assembler.push(page);
        let n = packets.len() as i64;
        let clock = self.info.clock;
        let cur_units = if page.granule_position >= 0 {
            clock.units(page.granule_position)
        } else {
            self.prev_units
        };
        let span = cur_units - self.prev_units;

        for (i, packet) in packets.into_iter().enumerate() {
            if self.headers_to_skip > 0 {
                self.headers_to_skip -= 1;
                continue;
            }
            let i = i as i64;
            let start = self.prev_units + interpolate(span, i, n);
            let end = self.prev_units + interpolate(span, i + 1, n);
            let time_us = clock.units_to_us(start);

            let mut flags = SampleFlags::empty();
            if self.is_sync(&packet) {
                flags |= SampleFlags::SYNC;
            }
            let mut sample = MediaSample::new(Bytes::from(packet), time_us);
            sample.meta.duration_us = Some((clock.units_to_us(end) - time_us).max(0));
            sample.meta.flags = flags;
            sample.meta.byte_offset = Some(page.offset);
            sample.meta.page = Some(PageInfo {
                sequence: page.page_sequence,
                granule_position: page.granule_position,
                ends_page: i + 1 == n,
            });
            self.pending.push_back(sample);
        }

        if n > 0 && page.granule_position >= 0 {
            self.prev_units = cur_units;
        }
        if page.is_eos() {
            self.eos = true;
        }
    }

    /// 读取下一个属于本轨的页面, 读尽时标记 EOS
    fn fill(&mut self) -> TaoResult<()> {
        loop {
            match page::next_page(&mut self.io) {
                Ok(page) if page.serial_number == self.info.serial => {
                    self.handle_page(&page);
                    return Ok(());
                }
                Ok(_) => {}
                Err(TaoError::Eof) => {
                    self.eos = true;
                    return Ok(());
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// 扫描本轨页面, 按模式选出恢复点
    fn find_resume(&mut self, time_us: i64, mode: SeekMode) -> TaoResult<Resume> {
        let clock = self.info.clock;
        let target = clock.us_to_units(time_us);
        let start_units = clock.offset();

        // 起点之前的目标直接回到开头
        if target <= start_units {
            return Ok(Resume::Start);
        }

        self.io.seek(SeekFrom::Start(self.info.data_offset))?;
        let mut before = (Resume::Start, start_units);
        let mut after: Option<(Resume, i64)> = None;
        loop {
            let page = match page::next_page(&mut self.io) {
                Ok(page) => page,
                Err(TaoError::Eof) => break,
                Err(e) => return Err(e),
            };
            if page.serial_number != self.info.serial || page.granule_position < 0 {
                continue;
            }
            let units = clock.units(page.granule_position);
            let resume = Resume::After {
                offset: page.end_offset(),
                units,
            };
            if units <= target {
                before = (resume, units);
            }
            if units >= target {
                after = Some((resume, units));
                break;
            }
            if page.is_eos() {
                break;
            }
        }

        let next = after.map_or(Resume::End, |(resume, _)| resume);
        Ok(match mode {
            SeekMode::PreviousSync | SeekMode::Closest => before.0,
            SeekMode::NextSync => next,
            SeekMode::ClosestSync => match after {
                Some((resume, units)) if units - target < target - before.1 => resume,
                _ => before.0,
            },
        })
    }

    fn seek(&mut self, time_us: i64, mode: SeekMode) -> TaoResult<()> {
        let resume = self.find_resume(time_us, mode)?;
        self.pending.clear();
        self.assembler.reset();
        self.eos = false;
        self.headers_to_skip = 0;
        match resume {
            Resume::Start => {
                self.io.seek(SeekFrom::Start(0))?;
                self.headers_to_skip = self.info.header_count;
                self.prev_units = 0;
            }
            Resume::After { offset, units } => {
                self.io.seek(SeekFrom::Start(offset))?;
                self.prev_units = units;
            }
            Resume::End => self.eos = true,
        }
        debug!(
            "Ogg seek: serial=0x{:08X}, 目标={}us, 模式={}, 恢复点={:?}",
            self.info.serial,
            time_us,
            mode.name(),
            resume
        );
        Ok(())
    }
}

impl TrackSource for OggTrackSource {
    fn read(&mut self, options: &ReadOptions) -> TaoResult<MediaSample> {
        if let Some(target) = options.seek {
            self.seek(target.time_us, target.mode)?;
        }
        loop {
            if let Some(sample) = self.pending.pop_front() {
                return Ok(sample);
            }
            if self.eos {
                return Err(TaoError::Eof);
            }
            self.fill()?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::*;
    use super::super::{Demuxer, OggDemuxer};
    use super::*;
    use crate::io::MemorySource;

    fn track_of(data: Vec<u8>, index: usize) -> Box<dyn TrackSource> {
        let mut demuxer = OggDemuxer::create().unwrap();
        demuxer.open(Arc::new(MemorySource::new(data))).unwrap();
        demuxer.create_track_source(index).unwrap()
    }

    fn read_all(track: &mut Box<dyn TrackSource>) -> Vec<MediaSample> {
        let mut out = Vec::new();
        loop {
            match track.read(&ReadOptions::default()) {
                Ok(sample) => out.push(sample),
                Err(TaoError::Eof) => return out,
                Err(e) => panic!("读取失败: {e}"),
            }
        }
    }

    #[test]
    fn test_跳过头包并按上一页_granule_计时() {
        let mut track = track_of(vorbis_stream(5, 3), 0);
        let samples = read_all(&mut track);
        assert_eq!(samples.len(), 3);
        assert_eq!(samples[0].meta.time_us, 0);
        // 1024 / 44100
        assert_eq!(samples[1].meta.time_us, 23_219);
        assert_eq!(samples[2].meta.time_us, 46_439);
        assert!(samples.iter().all(|s| s.is_sync()));

        let page = samples[1].meta.page.unwrap();
        assert_eq!(page.sequence, 4);
        assert_eq!(page.granule_position, 2048);
        assert!(page.ends_page);
    }

    #[test]
    fn test_同页多包线性分配时间() {
        let serial = 3;
        let mut data = build_page(FLAG_BOS, 0, serial, 0, &[&vorbis_id(1, 48000, 0)]);
        data.extend(build_page(0, 0, serial, 1, &[&vorbis_header(3), &vorbis_header(5)]));
        data.extend(build_page(FLAG_EOS, 4800, serial, 2, &[b"a", b"b", b"c", b"d"]));

        let mut track = track_of(data, 0);
        let samples = read_all(&mut track);
        let times: Vec<i64> = samples.iter().map(|s| s.meta.time_us).collect();
        assert_eq!(times, vec![0, 25_000, 50_000, 75_000]);
        let ends: Vec<bool> = samples
            .iter()
            .map(|s| s.meta.page.unwrap().ends_page)
            .collect();
        assert_eq!(ends, vec![false, false, false, true]);
        assert_eq!(samples[0].meta.duration_us, Some(25_000));
    }

    #[test]
    fn test_seek_按页落点() {
        // 页 granule: 1024, 2048, ..., 8192; 每页首包时间为上一页 granule
        let mut track = track_of(vorbis_stream(5, 8), 0);
        let at = |track: &mut Box<dyn TrackSource>, us: i64, mode: SeekMode| {
            track.read(&ReadOptions::seek_to(us, mode)).unwrap().data[0]
        };
        // 2500 采样 ≈ 56689us: 之前最近的页结束于 2048 -> 读到第 3 个包 (payload 2)
        assert_eq!(at(&mut track, 56_689, SeekMode::PreviousSync), 2);
        assert_eq!(at(&mut track, 56_689, SeekMode::NextSync), 3);
        assert_eq!(at(&mut track, 56_689, SeekMode::ClosestSync), 2);
        // 3000 采样更靠近 3072
        assert_eq!(at(&mut track, 68_027, SeekMode::ClosestSync), 3);
        assert_eq!(at(&mut track, 0, SeekMode::NextSync), 0);
    }

    #[test]
    fn test_seek_超出末尾() {
        let mut track = track_of(vorbis_stream(5, 2), 0);
        assert!(matches!(
            track.read(&ReadOptions::seek_to(10_000_000, SeekMode::NextSync)),
            Err(TaoError::Eof)
        ));
        // 之前最近的同步点是最后一页, 之后没有包
        assert!(matches!(
            track.read(&ReadOptions::seek_to(10_000_000, SeekMode::PreviousSync)),
            Err(TaoError::Eof)
        ));
        let sample = track
            .read(&ReadOptions::seek_to(0, SeekMode::PreviousSync))
            .unwrap();
        assert_eq!(sample.data[0], 0);
    }

    #[test]
    fn test_极大_granule_不溢出() {
        let serial = 4;
        let mut data = build_page(FLAG_BOS, 0, serial, 0, &[&vorbis_id(1, 48000, 0)]);
        data.extend(build_page(0, 0, serial, 1, &[&vorbis_header(3), &vorbis_header(5)]));
        data.extend(build_page(FLAG_EOS, i64::MAX, serial, 2, &[b"a", b"b", b"c"]));

        let mut track = track_of(data, 0);
        let samples = read_all(&mut track);
        assert_eq!(samples.len(), 3);
        assert_eq!(samples[0].meta.time_us, 0);
        let payloads: Vec<u8> = samples.iter().map(|s| s.data[0]).collect();
        assert_eq!(payloads, b"abc".to_vec());
        assert!(samples.iter().all(|s| s.meta.duration_us.is_some_and(|d| d >= 0)));
        assert!(samples[2].meta.page.unwrap().ends_page);
    }

    #[test]
    fn test_跨页包只计入结束页() {
        let serial = 8;
        let mut data = build_page(FLAG_BOS, 0, serial, 0, &[&vorbis_id(1, 44100, 0)]);
        data.extend(build_page(0, 0, serial, 1, &[&vorbis_header(3), &vorbis_header(5)]));
        // 300 字节的包分两页
        let big = vec![7u8; 300];
        let mut first = build_page(0, -1, serial, 2, &[&big[..255]]);
        first[26] = 1;
        first.remove(28);
        first[22..26].copy_from_slice(&0u32.to_le_bytes());
        let crc = page::ogg_crc32(&first);
        first[22..26].copy_from_slice(&crc.to_le_bytes());
        data.extend(first);
        data.extend(build_page(FLAG_CONTINUED | FLAG_EOS, 1024, serial, 3, &[&big[255..]]));

        let mut track = track_of(data, 0);
        let samples = read_all(&mut track);
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].size(), 300);
        assert_eq!(samples[0].meta.page.unwrap().sequence, 3);
    }
}
