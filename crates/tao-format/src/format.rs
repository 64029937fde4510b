//! 轨道与容器的格式描述.

use bitflags::bitflags;
use bytes::Bytes;
use tao_core::{CodecId, MediaType};

use crate::format_id::FormatId;

bitflags! {
    /// 获取轨道格式时的选项
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FormatFlags: u32 {
        /// 包含需要扫描样本表 / 码流头的扩展元数据 (更慢, 更完整)
        const INCLUDE_EXTENSIVE_METADATA = 1;
    }
}

/// 轨道特定参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackParams {
    /// 音频轨参数
    Audio {
        /// 采样率 (Hz)
        sample_rate: u32,
        /// 声道数
        channels: u32,
        /// 位深 (仅 PCM 有意义, 0 表示未知)
        bits_per_sample: u32,
    },
    /// 视频轨参数
    Video {
        /// 宽度 (像素)
        width: u32,
        /// 高度 (像素)
        height: u32,
    },
    /// 其他
    Other,
}

/// 轨道格式描述
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackFormat {
    /// 编解码器标识
    pub codec_id: CodecId,
    /// 轨道时长 (微秒), None 表示未知
    pub duration_us: Option<i64>,
    /// 码率 (bps), None 表示轨道未声明码率
    pub bit_rate: Option<u64>,
    /// 轨道特定参数
    pub params: TrackParams,
    /// 编解码器初始化数据 (如 Vorbis 的三个头包), 按顺序排列
    pub codec_private: Vec<Bytes>,
    /// 最大样本大小 (字节), 仅扩展元数据提供
    pub max_sample_size: Option<usize>,
    /// 样本总数, 仅扩展元数据提供
    pub sample_count: Option<u64>,
    /// 元数据 (语言, 标题等)
    pub metadata: Vec<(String, String)>,
}

impl TrackFormat {
    /// 以编解码器创建, 其余字段为空
    pub fn new(codec_id: CodecId, params: TrackParams) -> Self {
        Self {
            codec_id,
            duration_us: None,
            bit_rate: None,
            params,
            codec_private: Vec::new(),
            max_sample_size: None,
            sample_count: None,
            metadata: Vec::new(),
        }
    }

    /// 媒体类型
    pub fn media_type(&self) -> MediaType {
        self.codec_id.media_type()
    }

    /// MIME 类型
    pub fn mime(&self) -> &'static str {
        self.codec_id.mime()
    }
}

/// 容器级格式描述, 与具体轨道无关
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFormat {
    /// 容器格式
    pub format_id: FormatId,
    /// 容器时长 (微秒)
    pub duration_us: Option<i64>,
    /// 容器元数据
    pub metadata: Vec<(String, String)>,
}

impl FileFormat {
    /// 容器 MIME 类型
    pub fn mime(&self) -> &'static str {
        self.format_id.mime()
    }
}
