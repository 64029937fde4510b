//! 选中轨道表.
//!
//! 维护按选中顺序排列的 [`SelectedTrack`] 列表. 每项独占自己的轨道读取器,
//! 最多缓冲一个样本, 并记录 sticky 的读取状态.

use bitflags::bitflags;
use log::{debug, warn};
use tao_core::CodecId;
use tao_format::{MediaSample, ReadOptions, TrackFormat, TrackSource};

use crate::augment::{SampleAugmenter, augmenter_for};
use crate::error::{ExtractorError, ExtractorResult};

bitflags! {
    /// 轨道特性标志
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TrackFlags: u32 {
        /// 样本需要追加页采样计数 (Vorbis)
        const PAGE_SAMPLE_COUNT = 1;
    }
}

impl TrackFlags {
    /// 根据轨道格式推导标志
    pub fn for_format(format: &TrackFormat) -> Self {
        match format.codec_id {
            CodecId::Vorbis => Self::PAGE_SAMPLE_COUNT,
            _ => Self::empty(),
        }
    }
}

/// 轨道读取状态
///
/// 一旦变为非 `Ok` 就保持不变, 直到下一次 seek.
#[derive(Debug, Clone, Default)]
pub enum TrackStatus {
    #[default]
    Ok,
    EndOfStream,
    Error(ExtractorError),
}

impl TrackStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }

    fn from_error(err: ExtractorError) -> Self {
        match err {
            ExtractorError::EndOfStream => Self::EndOfStream,
            other => Self::Error(other),
        }
    }
}

/// 一条选中的轨道
pub struct SelectedTrack {
    track_index: usize,
    source: Box<dyn TrackSource>,
    sample: Option<MediaSample>,
    status: TrackStatus,
    flags: TrackFlags,
    format: TrackFormat,
    augmenter: Option<Box<dyn SampleAugmenter>>,
}

impl SelectedTrack {
    fn new(track_index: usize, source: Box<dyn TrackSource>, format: TrackFormat) -> Self {
        let flags = TrackFlags::for_format(&format);
        Self {
            track_index,
            source,
            sample: None,
            status: TrackStatus::Ok,
            flags,
            format,
            augmenter: augmenter_for(flags),
        }
    }

    /// 容器中的轨道索引
    pub fn track_index(&self) -> usize {
        self.track_index
    }

    /// 当前缓冲的样本
    pub fn sample(&self) -> Option<&MediaSample> {
        self.sample.as_ref()
    }

    /// 缓冲样本的时间戳
    pub fn sample_time_us(&self) -> Option<i64> {
        self.sample.as_ref().map(|s| s.meta.time_us)
    }

    pub fn status(&self) -> &TrackStatus {
        &self.status
    }

    pub fn flags(&self) -> TrackFlags {
        self.flags
    }

    /// 选中时获取的轨道格式
    pub fn format(&self) -> &TrackFormat {
        &self.format
    }

    /// 没有缓冲样本且状态正常, 需要读取
    pub(crate) fn needs_fetch(&self) -> bool {
        self.sample.is_none() && self.status.is_ok()
    }

    pub(crate) fn take_sample(&mut self) -> Option<MediaSample> {
        self.sample.take()
    }

    /// 从读取器取一个样本并执行增强
    ///
    /// 失败时记录 sticky 状态并返回对应错误, 不缓冲任何样本.
    pub(crate) fn fetch(&mut self, options: &ReadOptions) -> ExtractorResult<()> {
        self.sample = None;
        let result = self
            .source
            .read(options)
            .map_err(ExtractorError::from)
            .and_then(|mut sample| {
                if let Some(augmenter) = self.augmenter.as_mut() {
                    augmenter.augment(&mut sample)?;
                }
                Ok(sample)
            });
        match result {
            Ok(sample) => {
                self.sample = Some(sample);
                Ok(())
            }
            Err(err) => {
                if err.is_end_of_stream() {
                    debug!("轨道 #{} 读取结束", self.track_index);
                } else {
                    warn!("轨道 #{} 读取失败: {}", self.track_index, err);
                }
                self.status = TrackStatus::from_error(err.clone());
                Err(err)
            }
        }
    }

    /// seek 前清空缓冲与状态
    pub(crate) fn reset(&mut self) {
        self.sample = None;
        self.status = TrackStatus::Ok;
        if let Some(augmenter) = self.augmenter.as_mut() {
            augmenter.reset();
        }
    }
}

impl Drop for SelectedTrack {
    fn drop(&mut self) {
        self.sample = None;
        self.source.stop();
    }
}

/// 选中轨道表
///
/// 按索引查找是对列表的线性扫描: 选中的轨道通常只有几条到几十条.
pub struct TrackRegistry {
    tracks: Vec<SelectedTrack>,
    max_tracks: usize,
}

impl TrackRegistry {
    pub fn new(max_tracks: usize) -> Self {
        Self {
            tracks: Vec::new(),
            max_tracks,
        }
    }

    /// 选中一条轨道
    ///
    /// 先检查重复、越界和数量上限, 全部通过后才调用 `open` 创建读取器.
    /// 任一步失败时表保持不变.
    pub fn select<F>(&mut self, index: usize, track_count: usize, open: F) -> ExtractorResult<()>
    where
        F: FnOnce() -> ExtractorResult<(Box<dyn TrackSource>, TrackFormat)>,
    {
        if self.contains(index) {
            return Err(ExtractorError::AlreadySelected(index));
        }
        if index >= track_count {
            return Err(ExtractorError::OutOfRange {
                index,
                count: track_count,
            });
        }
        if self.tracks.len() >= self.max_tracks {
            return Err(ExtractorError::TooManyTracks(self.max_tracks));
        }

        let (mut source, format) = open()?;
        source.start()?;
        debug!("选中轨道 #{}: {}", index, format.codec_id);
        self.tracks.push(SelectedTrack::new(index, source, format));
        Ok(())
    }

    /// 取消选中, 释放缓冲样本并停止读取器
    pub fn unselect(&mut self, index: usize) -> ExtractorResult<()> {
        let pos = self
            .position(index)
            .ok_or(ExtractorError::NotSelected(index))?;
        self.tracks.remove(pos);
        debug!("取消选中轨道 #{}", index);
        Ok(())
    }

    pub fn contains(&self, index: usize) -> bool {
        self.position(index).is_some()
    }

    /// 轨道在表中的位置 (即选中顺序)
    pub fn position(&self, index: usize) -> Option<usize> {
        self.tracks.iter().position(|t| t.track_index == index)
    }

    pub fn get(&self, index: usize) -> Option<&SelectedTrack> {
        self.tracks.iter().find(|t| t.track_index == index)
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// 按选中顺序遍历
    pub fn iter(&self) -> impl Iterator<Item = &SelectedTrack> {
        self.tracks.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut SelectedTrack> {
        self.tracks.iter_mut()
    }

    pub(crate) fn at(&self, pos: usize) -> Option<&SelectedTrack> {
        self.tracks.get(pos)
    }

    pub(crate) fn at_mut(&mut self, pos: usize) -> Option<&mut SelectedTrack> {
        self.tracks.get_mut(pos)
    }

    /// 选中的轨道索引, 按选中顺序
    pub fn indices(&self) -> Vec<usize> {
        self.tracks.iter().map(|t| t.track_index).collect()
    }

    /// 释放全部轨道
    pub fn clear(&mut self) {
        self.tracks.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedTrack;
    use tao_format::TrackParams;

    fn opener(
        track: ScriptedTrack,
    ) -> impl FnOnce() -> ExtractorResult<(Box<dyn TrackSource>, TrackFormat)> {
        move || {
            let format = TrackFormat::new(CodecId::PcmS16le, TrackParams::Other);
            Ok((Box::new(track) as Box<dyn TrackSource>, format))
        }
    }

    #[test]
    fn test_重复选中不影响原缓冲() {
        let mut registry = TrackRegistry::new(8);
        registry
            .select(0, 2, opener(ScriptedTrack::with_times(&[0, 10])))
            .unwrap();
        registry
            .iter_mut()
            .next()
            .unwrap()
            .fetch(&ReadOptions::default())
            .unwrap();

        let err = registry
            .select(0, 2, opener(ScriptedTrack::with_times(&[99])))
            .unwrap_err();
        assert!(matches!(err, ExtractorError::AlreadySelected(0)));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(0).unwrap().sample_time_us(), Some(0));
    }

    #[test]
    fn test_越界与上限() {
        let mut registry = TrackRegistry::new(1);
        assert!(matches!(
            registry.select(5, 2, opener(ScriptedTrack::with_times(&[0]))),
            Err(ExtractorError::OutOfRange { index: 5, count: 2 })
        ));
        registry
            .select(0, 2, opener(ScriptedTrack::with_times(&[0])))
            .unwrap();
        assert!(matches!(
            registry.select(1, 2, opener(ScriptedTrack::with_times(&[0]))),
            Err(ExtractorError::TooManyTracks(1))
        ));
        assert_eq!(registry.indices(), vec![0]);
    }

    #[test]
    fn test_打开失败时表不变() {
        let mut registry = TrackRegistry::new(4);
        let err = registry
            .select(1, 2, || {
                Err(ExtractorError::InvalidState("打不开".into()))
            })
            .unwrap_err();
        assert!(matches!(err, ExtractorError::InvalidState(_)));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_取消选中停止读取器() {
        let mut registry = TrackRegistry::new(4);
        let track = ScriptedTrack::with_times(&[0]);
        let stopped = track.stop_flag();
        registry.select(1, 2, opener(track)).unwrap();
        assert!(matches!(
            registry.unselect(0),
            Err(ExtractorError::NotSelected(0))
        ));
        registry.unselect(1).unwrap();
        assert!(stopped.load(std::sync::atomic::Ordering::SeqCst));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_读取失败记录_sticky_状态() {
        let mut registry = TrackRegistry::new(4);
        registry
            .select(0, 1, opener(ScriptedTrack::with_times(&[])))
            .unwrap();
        let track = registry.iter_mut().next().unwrap();
        assert!(track.fetch(&ReadOptions::default()).unwrap_err().is_end_of_stream());
        assert!(matches!(track.status(), TrackStatus::EndOfStream));
        assert!(!track.needs_fetch());
        track.reset();
        assert!(track.needs_fetch());
    }

    #[test]
    fn test_vorbis_轨道带页计数标志() {
        let format = TrackFormat::new(CodecId::Vorbis, TrackParams::Other);
        assert_eq!(TrackFlags::for_format(&format), TrackFlags::PAGE_SAMPLE_COUNT);
        let format = TrackFormat::new(CodecId::Opus, TrackParams::Other);
        assert!(TrackFlags::for_format(&format).is_empty());
    }
}
