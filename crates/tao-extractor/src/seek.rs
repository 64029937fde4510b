//! 多轨 seek 协调.
//!
//! 各轨道独立定位: 清空缓冲和 sticky 状态后, 以带 seek 选项的读取取回
//! 定位后的第一个样本. 某条轨道失败只记录在它自己身上.

use log::debug;
use tao_format::{ReadOptions, SeekMode};

use crate::error::ExtractorResult;
use crate::registry::TrackRegistry;
use crate::scheduler::exhaustion_error;

/// 把所有选中轨道定位到 `time_us`
///
/// 至少一条轨道取到样本时返回 `Ok`, 否则返回耗尽错误.
/// 落点规则 (同步点取舍) 完全由各轨道读取器决定.
pub fn seek_to(registry: &mut TrackRegistry, time_us: i64, mode: SeekMode) -> ExtractorResult<()> {
    let options = ReadOptions::seek_to(time_us, mode);
    for track in registry.iter_mut() {
        track.reset();
        // 失败已记录为 sticky 状态
        let _ = track.fetch(&options);
    }

    let ready = registry.iter().filter(|t| t.sample().is_some()).count();
    debug!(
        "seek 完成: 目标={}us, 模式={}, {}/{} 条轨道就绪",
        time_us,
        mode.name(),
        ready,
        registry.len()
    );
    if ready > 0 {
        Ok(())
    } else {
        Err(exhaustion_error(registry))
    }
}
