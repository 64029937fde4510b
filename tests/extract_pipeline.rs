//! 端到端集成测试: 从内存与文件数据源提取多轨样本.
//!
//! 测试流程: 构造 WAV / 多路复用 Ogg 码流 → 探测并打开 → 选中轨道
//! → 交织读取 / seek → 验证时间、大小与汇总信息

use std::io::Write;
use std::sync::Arc;

use tao_extract::core::{CodecId, TaoError};
use tao_extract::extractor::{ExtractorError, MediaExtractor, TrackStatus};
use tao_extract::format::{FormatFlags, MemorySource, SeekMode, TrackParams};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// ============================================================
// 码流构造
// ============================================================

/// 生成单声道 16 位 PCM WAV
fn make_wav(sample_rate: u32, frames: usize) -> Vec<u8> {
    let pcm: Vec<u8> = (0..frames).flat_map(|i| (i as i16).to_le_bytes()).collect();
    let data_size = pcm.len() as u32;

    let mut buf = Vec::new();
    buf.extend_from_slice(b"RIFF");
    buf.extend_from_slice(&(36 + data_size).to_le_bytes());
    buf.extend_from_slice(b"WAVE");
    buf.extend_from_slice(b"fmt ");
    buf.extend_from_slice(&16u32.to_le_bytes());
    buf.extend_from_slice(&1u16.to_le_bytes());
    buf.extend_from_slice(&1u16.to_le_bytes());
    buf.extend_from_slice(&sample_rate.to_le_bytes());
    buf.extend_from_slice(&(sample_rate * 2).to_le_bytes());
    buf.extend_from_slice(&2u16.to_le_bytes());
    buf.extend_from_slice(&16u16.to_le_bytes());
    buf.extend_from_slice(b"data");
    buf.extend_from_slice(&data_size.to_le_bytes());
    buf.extend_from_slice(&pcm);
    buf
}

fn ogg_crc32(data: &[u8]) -> u32 {
    let mut crc = 0u32;
    for &byte in data {
        crc ^= u32::from(byte) << 24;
        for _ in 0..8 {
            crc = if crc & 0x8000_0000 != 0 {
                (crc << 1) ^ 0x04C1_1DB7
            } else {
                crc << 1
            };
        }
    }
    crc
}

const BOS: u8 = 0x02;
const EOS: u8 = 0x04;

/// 构造一个只含单个完整包的 Ogg 页
fn ogg_page(header_type: u8, granule: i64, serial: u32, seq: u32, packet: &[u8]) -> Vec<u8> {
    let mut segments = vec![255u8; packet.len() / 255];
    segments.push((packet.len() % 255) as u8);

    let mut page = b"OggS".to_vec();
    page.push(0);
    page.push(header_type);
    page.extend_from_slice(&granule.to_le_bytes());
    page.extend_from_slice(&serial.to_le_bytes());
    page.extend_from_slice(&seq.to_le_bytes());
    page.extend_from_slice(&[0u8; 4]);
    page.push(segments.len() as u8);
    page.extend_from_slice(&segments);
    page.extend_from_slice(packet);
    let crc = ogg_crc32(&page);
    page[22..26].copy_from_slice(&crc.to_le_bytes());
    page
}

fn vorbis_id(rate: u32, nominal_bitrate: i32) -> Vec<u8> {
    let mut p = vec![1u8];
    p.extend_from_slice(b"vorbis");
    p.extend_from_slice(&0u32.to_le_bytes());
    p.push(1);
    p.extend_from_slice(&rate.to_le_bytes());
    p.extend_from_slice(&0i32.to_le_bytes());
    p.extend_from_slice(&nominal_bitrate.to_le_bytes());
    p.extend_from_slice(&0i32.to_le_bytes());
    p.push(0x88);
    p.push(1);
    p
}

fn vorbis_header(kind: u8) -> Vec<u8> {
    let mut p = vec![kind];
    p.extend_from_slice(b"vorbis");
    p.extend_from_slice(&[0u8; 8]);
    p
}

fn opus_head() -> Vec<u8> {
    let mut p = b"OpusHead".to_vec();
    p.push(1);
    p.push(2);
    p.extend_from_slice(&0u16.to_le_bytes());
    p.extend_from_slice(&48000u32.to_le_bytes());
    p.extend_from_slice(&0i16.to_le_bytes());
    p.push(0);
    p
}

const VORBIS_SERIAL: u32 = 0x1000;
const OPUS_SERIAL: u32 = 0x2000;

/// Vorbis (44.1kHz, 每页 1024 采样) 与 Opus (每页 20ms) 交错的 Ogg 文件
fn make_muxed_ogg(pages: u32) -> Vec<u8> {
    let mut data = ogg_page(BOS, 0, VORBIS_SERIAL, 0, &vorbis_id(44100, 96000));
    data.extend(ogg_page(BOS, 0, OPUS_SERIAL, 0, &opus_head()));
    data.extend(ogg_page(0, 0, VORBIS_SERIAL, 1, &vorbis_header(3)));
    data.extend(ogg_page(0, 0, OPUS_SERIAL, 1, b"OpusTags\0\0\0\0\0\0\0\0"));
    data.extend(ogg_page(0, 0, VORBIS_SERIAL, 2, &vorbis_header(5)));

    for i in 0..pages {
        let flags = if i + 1 == pages { EOS } else { 0 };
        let vorbis_packet = vec![0x10 + i as u8; 20 + i as usize];
        data.extend(ogg_page(
            flags,
            i64::from(i + 1) * 1024,
            VORBIS_SERIAL,
            3 + i,
            &vorbis_packet,
        ));
        let opus_packet = vec![0xF8, i as u8, 0xAA];
        data.extend(ogg_page(
            flags,
            i64::from(i + 1) * 960,
            OPUS_SERIAL,
            2 + i,
            &opus_packet,
        ));
    }
    data
}

fn open_memory(data: Vec<u8>) -> MediaExtractor {
    init_logger();
    let extractor = MediaExtractor::new();
    extractor
        .set_data_source(Arc::new(MemorySource::new(data)))
        .expect("打开内存数据源失败");
    extractor
}

/// 读尽全部样本, 返回 (轨道, 时间, 大小)
fn drain(extractor: &MediaExtractor) -> Vec<(usize, i64, usize)> {
    let mut out = Vec::new();
    let mut buf = vec![0u8; 4096];
    loop {
        let track = match extractor.sample_track_index() {
            Ok(track) => track,
            Err(ExtractorError::NoSampleBuffered) => break,
            Err(err) => panic!("读取样本失败: {err}"),
        };
        let size = extractor.read_sample_data(&mut buf).expect("复制样本失败");
        out.push((track, extractor.sample_time().expect("获取时间失败"), size));
        match extractor.advance() {
            Ok(()) | Err(ExtractorError::EndOfStream) => {}
            Err(err) => panic!("推进样本失败: {err}"),
        }
    }
    out
}

// ============================================================
// Ogg 多路复用
// ============================================================

#[test]
fn test_ogg_多轨交织读取() {
    let extractor = open_memory(make_muxed_ogg(4));
    assert_eq!(extractor.track_count(), 2);

    let vorbis = extractor.track_format(0, FormatFlags::empty()).unwrap();
    assert_eq!(vorbis.codec_id, CodecId::Vorbis);
    assert_eq!(vorbis.codec_private.len(), 3);
    assert_eq!(vorbis.bit_rate, Some(96_000));
    let opus = extractor.track_format(1, FormatFlags::empty()).unwrap();
    assert_eq!(opus.codec_id, CodecId::Opus);
    assert!(matches!(
        opus.params,
        TrackParams::Audio {
            sample_rate: 48000,
            channels: 2,
            ..
        }
    ));

    extractor.select_track(0).unwrap();
    extractor.select_track(1).unwrap();
    assert_eq!(extractor.duration_us(), Some(92_879));
    // Opus 不声明码率
    assert_eq!(extractor.total_bitrate(), None);

    let samples = drain(&extractor);
    let order: Vec<(usize, i64)> = samples.iter().map(|&(t, time, _)| (t, time)).collect();
    assert_eq!(
        order,
        vec![
            (0, 0),
            (1, 0),
            (1, 20_000),
            (0, 23_219),
            (1, 40_000),
            (0, 46_439),
            (1, 60_000),
            (0, 69_659),
        ]
    );
    // Vorbis 样本末尾追加了 4 字节页采样计数
    assert_eq!(samples[0].2, 20 + 4);
    assert_eq!(samples[1].2, 3);

    assert!(matches!(
        extractor.advance(),
        Err(ExtractorError::EndOfStream)
    ));
    assert!(matches!(
        extractor.track_status(0).unwrap(),
        TrackStatus::EndOfStream
    ));
}

#[test]
fn test_ogg_vorbis_页采样计数() {
    let extractor = open_memory(make_muxed_ogg(3));
    extractor.select_track(0).unwrap();

    let mut counts = Vec::new();
    let mut buf = [0u8; 64];
    while let Ok(n) = extractor.read_sample_data(&mut buf) {
        let meta = extractor.sample_meta().unwrap();
        let tail = i32::from_le_bytes([buf[n - 4], buf[n - 3], buf[n - 2], buf[n - 1]]);
        assert_eq!(Some(tail), meta.page_samples);
        counts.push(tail);
        if extractor.advance().is_err() {
            break;
        }
    }
    assert_eq!(counts, vec![-1, 1024, 1024]);
}

#[test]
fn test_ogg_seek_后各轨落在同步点() {
    let extractor = open_memory(make_muxed_ogg(4));
    extractor.select_track(0).unwrap();
    extractor.select_track(1).unwrap();
    extractor.advance().unwrap();

    extractor.seek_to(41_000, SeekMode::ClosestSync).unwrap();
    let samples = drain(&extractor);
    let first_of = |track: usize| {
        samples
            .iter()
            .find(|s| s.0 == track)
            .map(|s| s.1)
            .expect("轨道没有样本")
    };
    // Vorbis 页边界 23219/46439, Opus 页边界 40000/60000
    assert_eq!(first_of(0), 46_439);
    assert_eq!(first_of(1), 40_000);

    // seek 之后 Vorbis 第一个样本的页计数未知
    extractor.seek_to(0, SeekMode::PreviousSync).unwrap();
    assert_eq!(extractor.sample_meta().unwrap().page_samples, Some(-1));
    assert_eq!(extractor.sample_time().unwrap(), 0);
}

#[test]
fn test_ogg_扩展元数据() {
    let extractor = open_memory(make_muxed_ogg(5));
    let format = extractor
        .track_format(0, FormatFlags::INCLUDE_EXTENSIVE_METADATA)
        .unwrap();
    assert_eq!(format.sample_count, Some(5));
    assert_eq!(format.max_sample_size, Some(24));

    let metrics = extractor.metrics().unwrap();
    assert_eq!(metrics.format, "ogg");
    assert_eq!(metrics.track_count, 2);
}

// ============================================================
// WAV 与文件数据源
// ============================================================

#[test]
fn test_wav_文件路径与_uri() {
    init_logger();
    let mut file = tempfile::Builder::new()
        .suffix(".wav")
        .tempfile()
        .expect("创建临时文件失败");
    file.write_all(&make_wav(8000, 4096)).unwrap();
    file.flush().unwrap();
    let path = file.path().to_string_lossy().to_string();

    for uri in [path.clone(), format!("file://{path}")] {
        let extractor = MediaExtractor::new();
        extractor.set_data_source_uri(&uri, &[]).unwrap();
        assert_eq!(extractor.file_format().unwrap().mime(), "audio/x-wav");
        extractor.select_track(0).unwrap();
        assert_eq!(extractor.duration_us(), Some(512_000));
        assert_eq!(extractor.total_bitrate(), Some(128_000));

        let samples = drain(&extractor);
        assert_eq!(
            samples,
            vec![
                (0, 0, 2048),
                (0, 128_000, 2048),
                (0, 256_000, 2048),
                (0, 384_000, 2048)
            ]
        );
    }
}

#[test]
fn test_wav_文件区间数据源() {
    init_logger();
    let mut file = tempfile::tempfile().expect("创建临时文件失败");
    let junk = vec![0xEEu8; 100];
    let wav = make_wav(8000, 2048);
    file.write_all(&junk).unwrap();
    file.write_all(&wav).unwrap();
    file.write_all(&junk).unwrap();

    let extractor = MediaExtractor::new();
    extractor
        .set_data_source_fd(file, junk.len() as u64, wav.len() as u64)
        .unwrap();
    extractor.select_track(0).unwrap();
    extractor.seek_to(200_000, SeekMode::PreviousSync).unwrap();
    assert_eq!(extractor.sample_time().unwrap(), 128_000);

    // 文件数据源不报告缓存状态
    assert!(extractor.cached_duration().is_none());
}

#[test]
fn test_无法识别的数据源() {
    init_logger();
    let extractor = MediaExtractor::new();
    let err = extractor
        .set_data_source(Arc::new(MemorySource::new(vec![0x5Au8; 256])))
        .unwrap_err();
    match err {
        ExtractorError::Unexpected(inner) => {
            assert!(matches!(*inner, TaoError::FormatNotFound(_)))
        }
        other => panic!("意外错误: {other}"),
    }
    assert_eq!(extractor.track_count(), 0);

    // 失败后仍可设置新的数据源
    extractor
        .set_data_source(Arc::new(MemorySource::new(make_wav(8000, 1024))))
        .unwrap();
    assert_eq!(extractor.track_count(), 1);
}

#[test]
fn test_门面与底层解封装器一致() {
    init_logger();
    let registry = tao_extract::default_format_registry();
    let extractor = MediaExtractor::with_registry(Default::default(), registry);
    extractor
        .set_data_source(Arc::new(MemorySource::new(make_muxed_ogg(2))))
        .unwrap();
    assert_eq!(
        extractor.file_format().unwrap().duration_us,
        Some(46_439)
    );
    assert!(!tao_extract::version().is_empty());
}
