//! 样本提取性能基准测试.
//!
//! 覆盖单轨顺序读取、多轨交织调度与 seek 等核心路径.

use std::sync::Arc;

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use tao_extract::core::CodecId;
use tao_extract::extractor::MediaExtractor;
use tao_extract::extractor::test_support::{ScriptedDemuxer, ScriptedTrack, audio_format};
use tao_extract::format::{MemorySource, SeekMode};

/// 生成单声道 16 位 PCM WAV
fn make_wav(sample_rate: u32, frames: usize) -> Vec<u8> {
    let data_size = (frames * 2) as u32;
    let mut buf = Vec::with_capacity(44 + frames * 2);
    buf.extend_from_slice(b"RIFF");
    buf.extend_from_slice(&(36 + data_size).to_le_bytes());
    buf.extend_from_slice(b"WAVEfmt ");
    buf.extend_from_slice(&16u32.to_le_bytes());
    buf.extend_from_slice(&1u16.to_le_bytes());
    buf.extend_from_slice(&1u16.to_le_bytes());
    buf.extend_from_slice(&sample_rate.to_le_bytes());
    buf.extend_from_slice(&(sample_rate * 2).to_le_bytes());
    buf.extend_from_slice(&2u16.to_le_bytes());
    buf.extend_from_slice(&16u16.to_le_bytes());
    buf.extend_from_slice(b"data");
    buf.extend_from_slice(&data_size.to_le_bytes());
    buf.extend((0..frames).flat_map(|i| ((i % 256) as i16 * 100).to_le_bytes()));
    buf
}

fn drain(extractor: &MediaExtractor, buf: &mut [u8]) -> usize {
    let mut total = 0;
    while let Ok(n) = extractor.read_sample_data(buf) {
        total += n;
        if extractor.advance().is_err() {
            break;
        }
    }
    total
}

fn bench_wav_extract(c: &mut Criterion) {
    let wav = bytes::Bytes::from(make_wav(44100, 44100 * 10));
    c.bench_function("wav_extract_10s_mono", |b| {
        let mut buf = vec![0u8; 4096];
        b.iter(|| {
            let extractor = MediaExtractor::new();
            extractor
                .set_data_source(Arc::new(MemorySource::new(wav.clone())))
                .unwrap();
            extractor.select_track(0).unwrap();
            black_box(drain(&extractor, &mut buf));
        });
    });
}

fn scripted(tracks: usize, samples: usize) -> ScriptedDemuxer {
    let mut demuxer = ScriptedDemuxer::new();
    for t in 0..tracks {
        let times: Vec<i64> = (0..samples as i64).map(|i| i * 20_000 + t as i64).collect();
        demuxer = demuxer.track(
            audio_format(CodecId::Opus, None, None),
            ScriptedTrack::with_sync_every(&times, 4),
        );
    }
    demuxer
}

fn bench_interleave(c: &mut Criterion) {
    c.bench_function("interleave_8_tracks_x_1000", |b| {
        let mut buf = vec![0u8; 64];
        b.iter(|| {
            let extractor = MediaExtractor::new();
            extractor.set_demuxer(Box::new(scripted(8, 1000))).unwrap();
            for index in 0..8 {
                extractor.select_track(index).unwrap();
            }
            black_box(drain(&extractor, &mut buf));
        });
    });
}

fn bench_seek(c: &mut Criterion) {
    let extractor = MediaExtractor::new();
    extractor.set_demuxer(Box::new(scripted(4, 5000))).unwrap();
    for index in 0..4 {
        extractor.select_track(index).unwrap();
    }
    c.bench_function("seek_closest_sync_4_tracks", |b| {
        let mut target = 0i64;
        b.iter(|| {
            target = (target + 7_777_777) % 100_000_000;
            let _ = extractor.seek_to(black_box(target), SeekMode::ClosestSync);
        });
    });
}

criterion_group!(benches, bench_wav_extract, bench_interleave, bench_seek);
criterion_main!(benches);
