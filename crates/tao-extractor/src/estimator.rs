//! 时长与码率汇总.

use tao_format::TrackFormat;

/// 整体时长与码率估计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamEstimate {
    /// 最长轨道的时长 (微秒)
    pub duration_us: Option<i64>,
    /// 所有轨道码率之和, 任一轨道未知时为 None
    pub bit_rate: Option<u64>,
}

impl StreamEstimate {
    /// 从选中轨道的格式计算
    ///
    /// 没有时长的轨道被跳过; 码率不做任何基于大小或时长的推算.
    /// 没有选中轨道时两项均为 None.
    pub fn compute<'a>(formats: impl IntoIterator<Item = &'a TrackFormat>) -> Self {
        let mut duration_us: Option<i64> = None;
        let mut bit_rate: Option<u64> = Some(0);
        let mut any = false;
        for format in formats {
            any = true;
            if let Some(d) = format.duration_us {
                duration_us = Some(duration_us.map_or(d, |cur| cur.max(d)));
            }
            bit_rate = match (bit_rate, format.bit_rate) {
                (Some(total), Some(b)) => total.checked_add(b),
                _ => None,
            };
        }
        if !any {
            return Self::default();
        }
        Self {
            duration_us,
            bit_rate,
        }
    }
}
