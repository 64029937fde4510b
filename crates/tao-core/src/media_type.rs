//! 媒体类型定义.

use std::fmt;

/// 轨道媒体类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaType {
    /// 视频轨
    Video,
    /// 音频轨
    Audio,
    /// 字幕轨
    Subtitle,
    /// 数据轨 (如时间码)
    Data,
}

impl MediaType {
    /// MIME 顶级类型前缀
    pub const fn mime_prefix(&self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Subtitle => "text",
            Self::Data => "application",
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Video => "视频",
            Self::Audio => "音频",
            Self::Subtitle => "字幕",
            Self::Data => "数据",
        };
        write!(f, "{name}")
    }
}
