//! 编解码器标识符.
//!
//! 唯一标识轨道负载的编码算法, 与容器格式无关.
//! 提取层不做解码, 只用它推导 MIME 类型和轨道特性 (如 Vorbis 页采样计数).

use std::fmt;

use crate::media_type::MediaType;

/// 编解码器标识符
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum CodecId {
    /// 未知编解码器
    None,

    // ========================
    // 视频编解码器
    // ========================
    /// Theora
    Theora,

    // ========================
    // 音频编解码器
    // ========================
    /// Vorbis
    Vorbis,
    /// Opus
    Opus,
    /// FLAC (Free Lossless Audio Codec)
    Flac,
    /// PCM 无符号 8 位
    PcmU8,
    /// PCM 有符号 16 位小端
    PcmS16le,
    /// PCM 有符号 24 位小端
    PcmS24le,
    /// PCM 有符号 32 位小端
    PcmS32le,
    /// PCM 32 位浮点小端
    PcmF32le,
}

impl CodecId {
    /// 获取编解码器对应的媒体类型
    pub const fn media_type(&self) -> MediaType {
        match self {
            Self::None => MediaType::Data,
            Self::Theora => MediaType::Video,
            Self::Vorbis
            | Self::Opus
            | Self::Flac
            | Self::PcmU8
            | Self::PcmS16le
            | Self::PcmS24le
            | Self::PcmS32le
            | Self::PcmF32le => MediaType::Audio,
        }
    }

    /// 获取编解码器名称
    pub const fn name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Theora => "theora",
            Self::Vorbis => "vorbis",
            Self::Opus => "opus",
            Self::Flac => "flac",
            Self::PcmU8 => "pcm_u8",
            Self::PcmS16le => "pcm_s16le",
            Self::PcmS24le => "pcm_s24le",
            Self::PcmS32le => "pcm_s32le",
            Self::PcmF32le => "pcm_f32le",
        }
    }

    /// 轨道格式描述中使用的 MIME 类型
    pub const fn mime(&self) -> &'static str {
        match self {
            Self::None => "application/octet-stream",
            Self::Theora => "video/theora",
            Self::Vorbis => "audio/vorbis",
            Self::Opus => "audio/opus",
            Self::Flac => "audio/flac",
            Self::PcmU8 | Self::PcmS16le | Self::PcmS24le | Self::PcmS32le | Self::PcmF32le => {
                "audio/raw"
            }
        }
    }

    /// 是否为 PCM 原始音频
    pub const fn is_pcm(&self) -> bool {
        matches!(
            self,
            Self::PcmU8 | Self::PcmS16le | Self::PcmS24le | Self::PcmS32le | Self::PcmF32le
        )
    }
}

impl fmt::Display for CodecId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
