//! Ogg 页解析与包重组.
//!
//! ```text
//! Capture pattern: "OggS" (4 bytes)
//! Version:         1 byte (always 0)
//! Header type:     1 byte (flags: continued=0x01, BOS=0x02, EOS=0x04)
//! Granule pos:     8 bytes (little-endian, codec-specific)
//! Serial number:   4 bytes (identifies logical stream)
//! Page seq no:     4 bytes
//! CRC checksum:    4 bytes
//! Num segments:    1 byte
//! Segment table:   N bytes (each 1 byte, packet sizes)
//! Page data:       sum(segment_table) bytes
//! ```

use log::{debug, warn};
use tao_core::TaoResult;

use crate::io::IoContext;

/// Ogg 同步字 (capture pattern)
pub(super) const OGG_SYNC: &[u8; 4] = b"OggS";
/// Ogg CRC-32 多项式
const OGG_CRC_POLY: u32 = 0x04C11DB7;

/// 页面头部标志
pub(in crate::demuxers) const FLAG_CONTINUED: u8 = 0x01;
pub(in crate::demuxers) const FLAG_BOS: u8 = 0x02;
pub(in crate::demuxers) const FLAG_EOS: u8 = 0x04;

/// 已解析的 Ogg 页面
#[derive(Debug, Clone)]
pub(super) struct OggPage {
    /// 页面在数据源中的起始偏移
    pub offset: u64,
    pub header_type: u8,
    pub granule_position: i64,
    pub serial_number: u32,
    pub page_sequence: u32,
    pub segment_table: Vec<u8>,
    pub data: Vec<u8>,
}

impl OggPage {
    pub fn is_bos(&self) -> bool {
        self.header_type & FLAG_BOS != 0
    }

    pub fn is_eos(&self) -> bool {
        self.header_type & FLAG_EOS != 0
    }

    pub fn is_continued(&self) -> bool {
        self.header_type & FLAG_CONTINUED != 0
    }

    /// 页面结束偏移
    pub fn end_offset(&self) -> u64 {
        self.offset + 27 + self.segment_table.len() as u64 + self.data.len() as u64
    }

    /// 从段表中提取 packet 边界
    ///
    /// 返回 (offset, length, is_complete) 列表, 末尾段为 255 时最后一项不完整.
    pub fn segments(&self) -> Vec<(usize, usize, bool)> {
        let mut packets = Vec::new();
        let mut offset = 0usize;
        let mut current_len = 0usize;

        for &seg_size in &self.segment_table {
            current_len += seg_size as usize;
            if seg_size < 255 {
                packets.push((offset, current_len, true));
                offset += current_len;
                current_len = 0;
            }
        }
        if current_len > 0 {
            packets.push((offset, current_len, false));
        }
        packets
    }
}

/// 计算 Ogg 页面 CRC-32
pub(super) fn ogg_crc32(data: &[u8]) -> u32 {
    let mut crc = 0u32;
    for &byte in data {
        crc ^= u32::from(byte) << 24;
        for _ in 0..8 {
            if crc & 0x8000_0000 != 0 {
                crc = (crc << 1) ^ OGG_CRC_POLY;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

/// 页面体解析结果
enum PageBody {
    Valid(OggPage),
    /// 版本号非 0, 同步字是误判
    FalseSync,
    /// CRC 不匹配, 坏页已被完整消费
    BadCrc,
}

/// 在同步字之后解析页面剩余部分
fn read_page_body(io: &mut IoContext, offset: u64) -> TaoResult<PageBody> {
    let version = io.read_u8()?;
    if version != 0 {
        return Ok(PageBody::FalseSync);
    }
    let header_type = io.read_u8()?;
    let granule_position = io.read_u64_le()? as i64;
    let serial_number = io.read_u32_le()?;
    let page_sequence = io.read_u32_le()?;
    let crc = io.read_u32_le()?;
    let num_segments = io.read_u8()? as usize;
    let segment_table = io.read_bytes(num_segments)?;
    let data_size: usize = segment_table.iter().map(|&s| s as usize).sum();
    let data = io.read_bytes(data_size)?;

    // CRC 覆盖整个页面, 其中 CRC 字段本身按 0 参与计算
    let mut crc_page = Vec::with_capacity(27 + num_segments + data_size);
    crc_page.extend_from_slice(OGG_SYNC);
    crc_page.push(version);
    crc_page.push(header_type);
    crc_page.extend_from_slice(&(granule_position as u64).to_le_bytes());
    crc_page.extend_from_slice(&serial_number.to_le_bytes());
    crc_page.extend_from_slice(&page_sequence.to_le_bytes());
    crc_page.extend_from_slice(&0u32.to_le_bytes());
    crc_page.push(num_segments as u8);
    crc_page.extend_from_slice(&segment_table);
    crc_page.extend_from_slice(&data);
    let crc_calc = ogg_crc32(&crc_page);
    if crc != crc_calc {
        warn!(
            "Ogg 页面 CRC 校验失败: 偏移={}, 读取=0x{:08X}, 计算=0x{:08X}",
            offset, crc, crc_calc
        );
        return Ok(PageBody::BadCrc);
    }

    Ok(PageBody::Valid(OggPage {
        offset,
        header_type,
        granule_position,
        serial_number,
        page_sequence,
        segment_table,
        data,
    }))
}

/// 读取下一个有效页面
///
/// 当前位置不是同步字时逐字节搜索 "OggS", CRC 错误的页面被跳过.
/// 数据源读尽时返回 `TaoError::Eof`.
pub(super) fn next_page(io: &mut IoContext) -> TaoResult<OggPage> {
    loop {
        let start = io.position()?;
        let mut window = io.read_tag()?;
        let mut skipped = 0u64;
        while &window != OGG_SYNC {
            window = [window[1], window[2], window[3], io.read_u8()?];
            skipped += 1;
        }
        if skipped > 0 {
            debug!("Ogg 重新同步: 跳过 {} 字节", skipped);
        }
        let offset = start + skipped;
        match read_page_body(io, offset)? {
            PageBody::Valid(page) => return Ok(page),
            PageBody::BadCrc => {}
            PageBody::FalseSync => {
                io.seek(std::io::SeekFrom::Start(offset + 1))?;
            }
        }
    }
}

/// 单条逻辑流的包重组状态
#[derive(Debug, Default)]
pub(super) struct PacketAssembler {
    partial: Vec<u8>,
    /// 正在丢弃缺少起始片段的续包
    discarding: bool,
    last_sequence: Option<u32>,
}

impl PacketAssembler {
    /// 清空残包状态 (seek 后调用)
    pub fn reset(&mut self) {
        self.partial.clear();
        self.discarding = false;
        self.last_sequence = None;
    }

    /// 输入一个页面, 返回在本页结束的完整包
    pub fn push(&mut self, page: &OggPage) -> Vec<Vec<u8>> {
        if let Some(prev) = self.last_sequence {
            if page.page_sequence != prev.wrapping_add(1) {
                debug!(
                    "Ogg 页序号不连续: serial={}, {} -> {}",
                    page.serial_number, prev, page.page_sequence
                );
                self.partial.clear();
                self.discarding = page.is_continued();
            }
        }
        self.last_sequence = Some(page.page_sequence);

        // 残包的后续页缺失
        if !page.is_continued() && !self.partial.is_empty() {
            self.partial.clear();
            self.discarding = false;
        }

        let mut packets = Vec::new();
        for (i, (offset, length, complete)) in page.segments().into_iter().enumerate() {
            let chunk = &page.data[offset..offset + length];
            if i == 0 && page.is_continued() {
                if self.partial.is_empty() || self.discarding {
                    // 无头续包整包丢弃
                    self.discarding = !complete;
                    continue;
                }
                self.partial.extend_from_slice(chunk);
                if complete {
                    packets.push(std::mem::take(&mut self.partial));
                }
            } else if complete {
                packets.push(chunk.to_vec());
            } else {
                self.partial.extend_from_slice(chunk);
            }
        }
        packets
    }
}

/// 构建一个 Ogg 页面 (含正确的 CRC), 每个包独立 lacing
#[cfg(test)]
pub(in crate::demuxers) fn build_page(
    header_type: u8,
    granule: i64,
    serial: u32,
    page_seq: u32,
    packets: &[&[u8]],
) -> Vec<u8> {
    let mut segments = Vec::new();
    let mut body = Vec::new();
    for packet in packets {
        let mut remaining = packet.len();
        while remaining >= 255 {
            segments.push(255u8);
            remaining -= 255;
        }
        segments.push(remaining as u8);
        body.extend_from_slice(packet);
    }

    let mut page = Vec::new();
    page.extend_from_slice(OGG_SYNC);
    page.push(0);
    page.push(header_type);
    page.extend_from_slice(&(granule as u64).to_le_bytes());
    page.extend_from_slice(&serial.to_le_bytes());
    page.extend_from_slice(&page_seq.to_le_bytes());
    let crc_offset = page.len();
    page.extend_from_slice(&0u32.to_le_bytes());
    page.push(segments.len() as u8);
    page.extend_from_slice(&segments);
    page.extend_from_slice(&body);

    let crc = ogg_crc32(&page);
    page[crc_offset..crc_offset + 4].copy_from_slice(&crc.to_le_bytes());
    page
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{DataSource, MemorySource};
    use tao_core::TaoError;

    fn reader(data: Vec<u8>) -> IoContext {
        MemorySource::new(data).open_reader().unwrap()
    }

    #[test]
    fn test_读取页面并校验_crc() {
        let bytes = build_page(FLAG_BOS, 0, 7, 0, &[b"abc"]);
        let mut io = reader(bytes.clone());
        let page = next_page(&mut io).unwrap();
        assert!(page.is_bos());
        assert_eq!(page.serial_number, 7);
        assert_eq!(page.data, b"abc");
        assert_eq!(page.end_offset(), bytes.len() as u64);
        assert!(matches!(next_page(&mut io), Err(TaoError::Eof)));
    }

    #[test]
    fn test_跳过坏页与垃圾字节() {
        let mut bad = build_page(0, 10, 1, 0, &[b"bad"]);
        let last = bad.len() - 1;
        bad[last] ^= 0xFF;
        let mut data = b"junk".to_vec();
        data.extend_from_slice(&bad);
        data.extend_from_slice(&build_page(0, 20, 1, 1, &[b"good"]));

        let mut io = reader(data);
        let page = next_page(&mut io).unwrap();
        assert_eq!(page.granule_position, 20);
        assert_eq!(page.data, b"good");
    }

    #[test]
    fn test_跨页包重组() {
        let big = vec![0xAB; 300];
        // 第一页只放前 255 字节 (段表全 255, 包未完成)
        let mut first = build_page(0, -1, 1, 0, &[&big[..255]]);
        // build_page 会补一个 0 长度段, 去掉它让包跨页
        first[26] = 1;
        first.remove(28);
        let crc_zeroed = {
            let mut p = first.clone();
            p[22..26].copy_from_slice(&0u32.to_le_bytes());
            p
        };
        let crc = ogg_crc32(&crc_zeroed);
        first[22..26].copy_from_slice(&crc.to_le_bytes());
        let second = build_page(FLAG_CONTINUED, 100, 1, 1, &[&big[255..], b"next"]);

        let mut data = first;
        data.extend_from_slice(&second);
        let mut io = reader(data);
        let mut asm = PacketAssembler::default();

        let p1 = next_page(&mut io).unwrap();
        assert!(asm.push(&p1).is_empty());
        let p2 = next_page(&mut io).unwrap();
        let packets = asm.push(&p2);
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[0].len(), 300);
        assert_eq!(packets[1], b"next");
    }

    #[test]
    fn test_无头续包被丢弃() {
        let page_bytes = build_page(FLAG_CONTINUED, 50, 1, 5, &[b"tail", b"whole"]);
        let mut io = reader(page_bytes);
        let page = next_page(&mut io).unwrap();
        let mut asm = PacketAssembler::default();
        assert_eq!(asm.push(&page), vec![b"whole".to_vec()]);
    }
}
