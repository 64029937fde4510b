//! 样本增强钩子.
//!
//! 样本从轨道读取器取出后、成为"已缓冲"之前, 按轨道标志执行的编解码器
//! 相关后处理. 目前只有 Vorbis 页采样计数一种.

use byteorder::{LittleEndian, WriteBytesExt};
use bytes::Bytes;
use tao_core::TaoError;
use tao_format::MediaSample;

use crate::error::{ExtractorError, ExtractorResult};
use crate::registry::TrackFlags;

/// 样本增强器
pub trait SampleAugmenter: Send {
    /// 处理一个刚取出的样本, 失败时该样本不会被缓冲
    fn augment(&mut self, sample: &mut MediaSample) -> ExtractorResult<()>;

    /// 丢弃跨样本状态 (seek 后调用)
    fn reset(&mut self);
}

/// 根据轨道标志创建增强器
pub fn augmenter_for(flags: TrackFlags) -> Option<Box<dyn SampleAugmenter>> {
    if flags.contains(TrackFlags::PAGE_SAMPLE_COUNT) {
        Some(Box::new(VorbisPageSamples::default()))
    } else {
        None
    }
}

/// Vorbis 页采样计数
///
/// 在页内最后一个完整包的负载末尾追加本页可解码采样数 (LE i32),
/// 其余包以及 seek 之后见到的第一页追加 -1.
#[derive(Debug, Default)]
pub struct VorbisPageSamples {
    last_sequence: Option<u32>,
    last_granule: Option<i64>,
}

impl VorbisPageSamples {
    fn page_samples(&mut self, sample: &MediaSample) -> ExtractorResult<i32> {
        if sample.data.is_empty() {
            return Err(ExtractorError::MalformedPage("空的 Vorbis 包".into()));
        }
        let page = sample
            .meta
            .page
            .ok_or_else(|| ExtractorError::MalformedPage("样本缺少页信息".into()))?;

        if let Some(last) = self.last_sequence {
            if page.sequence < last {
                return Err(ExtractorError::MalformedPage(format!(
                    "页序号回退: {} -> {}",
                    last, page.sequence
                )));
            }
        }
        self.last_sequence = Some(page.sequence);

        if !page.ends_page {
            return Ok(-1);
        }
        if page.granule_position < 0 {
            return Err(ExtractorError::MalformedPage(format!(
                "页 #{} 有包结束却没有 granule",
                page.sequence
            )));
        }
        let count = match self.last_granule {
            Some(prev) if page.granule_position < prev => {
                return Err(ExtractorError::MalformedPage(format!(
                    "granule 回退: {} -> {}",
                    prev, page.granule_position
                )));
            }
            Some(prev) => i32::try_from(page.granule_position - prev).map_err(|_| {
                ExtractorError::MalformedPage(format!(
                    "页 #{} 采样数溢出: {}",
                    page.sequence,
                    page.granule_position - prev
                ))
            })?,
            None => -1,
        };
        self.last_granule = Some(page.granule_position);
        Ok(count)
    }
}

impl SampleAugmenter for VorbisPageSamples {
    fn augment(&mut self, sample: &mut MediaSample) -> ExtractorResult<()> {
        let count = self.page_samples(sample)?;
        let mut data = Vec::with_capacity(sample.data.len() + 4);
        data.extend_from_slice(&sample.data);
        data.write_i32::<LittleEndian>(count)
            .map_err(TaoError::from)?;
        sample.data = Bytes::from(data);
        sample.meta.page_samples = Some(count);
        Ok(())
    }

    fn reset(&mut self) {
        self.last_sequence = None;
        self.last_granule = None;
    }
}
