//! 容器信息摘要.

use serde::Serialize;
use tao_format::Demuxer;

/// 容器信息摘要, 可直接序列化为 JSON
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractorMetrics {
    /// 解封装器名称
    pub format: String,
    /// 容器 MIME 类型
    pub mime: String,
    /// 轨道数量
    pub track_count: usize,
}

impl ExtractorMetrics {
    pub(crate) fn collect(demuxer: &dyn Demuxer) -> Self {
        Self {
            format: demuxer.name().to_string(),
            mime: demuxer.file_format().mime().to_string(),
            track_count: demuxer.track_count(),
        }
    }
}
