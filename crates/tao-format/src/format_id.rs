//! 容器格式标识符.

use std::fmt;

/// 容器格式标识符
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum FormatId {
    /// Ogg
    Ogg,
    /// WAV (RIFF WAVE)
    Wav,
}

impl FormatId {
    /// 格式名称
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Ogg => "ogg",
            Self::Wav => "wav",
        }
    }

    /// 容器 MIME 类型
    pub const fn mime(&self) -> &'static str {
        match self {
            Self::Ogg => "application/ogg",
            Self::Wav => "audio/x-wav",
        }
    }
}

impl fmt::Display for FormatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
