//! 样本调度.
//!
//! 每条选中轨道最多缓冲一个样本. `fill` 为缺样本且状态正常的轨道各取一个,
//! 然后按 [`InterleaveMode`] 从缓冲样本中挑出"当前样本".

use log::debug;
use tao_format::ReadOptions;

use crate::config::InterleaveMode;
use crate::error::{ExtractorError, ExtractorResult};
use crate::registry::{SelectedTrack, TrackRegistry, TrackStatus};

/// 样本调度器
#[derive(Debug, Clone)]
pub struct SampleScheduler {
    mode: InterleaveMode,
    /// 最近一次 advance 的轨道索引
    last_advanced: Option<usize>,
}

impl SampleScheduler {
    pub fn new(mode: InterleaveMode) -> Self {
        Self {
            mode,
            last_advanced: None,
        }
    }

    pub fn mode(&self) -> InterleaveMode {
        self.mode
    }

    /// 为每条缺样本且状态正常的轨道读取一个样本
    ///
    /// 单条轨道失败只记录在该轨道上, 不影响其他轨道.
    pub fn fill(&self, registry: &mut TrackRegistry) {
        for track in registry.iter_mut() {
            if track.needs_fetch() {
                // 失败已记录为 sticky 状态
                let _ = track.fetch(&ReadOptions::default());
            }
        }
    }

    /// 当前样本所在轨道在表中的位置
    pub fn current(&self, registry: &TrackRegistry) -> Option<usize> {
        if self.mode == InterleaveMode::LastAdvanced {
            if let Some(index) = self.last_advanced {
                let pos = registry.position(index);
                if pos
                    .and_then(|p| registry.at(p))
                    .is_some_and(|t| t.sample().is_some())
                {
                    return pos;
                }
            }
        }
        earliest(registry)
    }

    /// 填充后返回当前样本所在的轨道
    pub fn current_track<'a>(
        &self,
        registry: &'a mut TrackRegistry,
    ) -> ExtractorResult<&'a SelectedTrack> {
        self.fill(registry);
        let pos = self
            .current(registry)
            .ok_or(ExtractorError::NoSampleBuffered)?;
        registry.at(pos).ok_or(ExtractorError::NoSampleBuffered)
    }

    /// 消费当前样本, 并立即为该轨道读取下一个
    ///
    /// 没有任何轨道持有样本时返回耗尽错误. 被消费轨道的补读失败
    /// (流结束除外) 在消费生效后返回.
    pub fn advance(&mut self, registry: &mut TrackRegistry) -> ExtractorResult<()> {
        self.fill(registry);
        let Some(pos) = self.current(registry) else {
            return Err(exhaustion_error(registry));
        };
        let Some(track) = registry.at_mut(pos) else {
            return Err(exhaustion_error(registry));
        };
        track.take_sample();
        self.last_advanced = Some(track.track_index());
        match track.fetch(&ReadOptions::default()) {
            Ok(()) => Ok(()),
            Err(ExtractorError::EndOfStream) => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// 最近一次 advance 的轨道索引
    pub fn last_advanced(&self) -> Option<usize> {
        self.last_advanced
    }

    /// seek 或选择变化后忘记最近 advance 的轨道
    pub fn reset(&mut self) {
        if self.last_advanced.take().is_some() {
            debug!("调度器状态已重置");
        }
    }
}

/// 时间戳最小的缓冲样本, 相同时取表中靠前 (先选中) 的轨道
fn earliest(registry: &TrackRegistry) -> Option<usize> {
    let mut best: Option<(usize, i64)> = None;
    for (pos, track) in registry.iter().enumerate() {
        let Some(time) = track.sample_time_us() else {
            continue;
        };
        if best.is_none_or(|(_, t)| time < t) {
            best = Some((pos, time));
        }
    }
    best.map(|(pos, _)| pos)
}

/// 所有轨道都没有样本时应返回的错误
///
/// 优先返回第一个非流结束的 sticky 错误, 否则为 `EndOfStream`.
pub fn exhaustion_error(registry: &TrackRegistry) -> ExtractorError {
    registry
        .iter()
        .find_map(|t| match t.status() {
            TrackStatus::Error(err) => Some(err.clone()),
            _ => None,
        })
        .unwrap_or(ExtractorError::EndOfStream)
}
