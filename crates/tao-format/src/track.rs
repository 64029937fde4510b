//! 轨道读取接口与样本定义.
//!
//! [`TrackSource`] 是容器解析层向上暴露的唯一读取能力: 每条轨道一个实例,
//! 按需产出样本, 支持带定位选项的读取.

use bitflags::bitflags;
use bytes::Bytes;
use tao_core::TaoResult;

bitflags! {
    /// 样本标志, 取值与常见媒体框架保持一致
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SampleFlags: u32 {
        /// 同步样本 (可独立解码的随机访问点)
        const SYNC = 1;
        /// 加密样本
        const ENCRYPTED = 2;
    }
}

/// Seek 模式
///
/// 具体落点由轨道读取器决定, 提取层只负责原样传递.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SeekMode {
    /// 目标时间之前 (含) 最近的同步点
    PreviousSync,
    /// 目标时间之后 (含) 最近的同步点
    NextSync,
    /// 距离目标时间最近的同步点
    #[default]
    ClosestSync,
    /// 距离目标时间最近的可解码位置, 可以不是同步点
    Closest,
}

impl SeekMode {
    /// 模式名称
    pub const fn name(&self) -> &'static str {
        match self {
            Self::PreviousSync => "previous_sync",
            Self::NextSync => "next_sync",
            Self::ClosestSync => "closest_sync",
            Self::Closest => "closest",
        }
    }
}

impl std::str::FromStr for SeekMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "previous_sync" | "previous" => Ok(Self::PreviousSync),
            "next_sync" | "next" => Ok(Self::NextSync),
            "closest_sync" => Ok(Self::ClosestSync),
            "closest" => Ok(Self::Closest),
            other => Err(format!("未知的 seek 模式: {other}")),
        }
    }
}

/// 定位目标
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeekTarget {
    /// 目标时间 (微秒)
    pub time_us: i64,
    /// 定位模式
    pub mode: SeekMode,
}

/// 读取选项
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadOptions {
    /// 读取前先定位
    pub seek: Option<SeekTarget>,
}

impl ReadOptions {
    /// 定位后读取
    pub fn seek_to(time_us: i64, mode: SeekMode) -> Self {
        Self {
            seek: Some(SeekTarget { time_us, mode }),
        }
    }
}

/// Ogg 页信息, 由 Ogg 读取器附加在每个样本上
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageInfo {
    /// 样本所在 (结束) 页的页序号
    pub sequence: u32,
    /// 该页的 granule position (-1 表示本页没有包结束)
    pub granule_position: i64,
    /// 样本是否为本页最后一个完整包
    pub ends_page: bool,
}

/// 样本元数据
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SampleMeta {
    /// 显示时间 (微秒)
    pub time_us: i64,
    /// 样本时长 (微秒)
    pub duration_us: Option<i64>,
    /// 样本标志
    pub flags: SampleFlags,
    /// 在容器中的字节偏移
    pub byte_offset: Option<u64>,
    /// Ogg 页信息
    pub page: Option<PageInfo>,
    /// 本页可解码采样数, 由页采样计数增强写入
    pub page_samples: Option<i32>,
}

/// 容器样本 (一帧压缩数据 + 元数据)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaSample {
    /// 负载数据
    pub data: Bytes,
    /// 元数据
    pub meta: SampleMeta,
}

impl MediaSample {
    /// 创建样本
    pub fn new(data: impl Into<Bytes>, time_us: i64) -> Self {
        Self {
            data: data.into(),
            meta: SampleMeta {
                time_us,
                ..SampleMeta::default()
            },
        }
    }

    /// 数据大小 (字节)
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// 是否为同步样本
    pub fn is_sync(&self) -> bool {
        self.meta.flags.contains(SampleFlags::SYNC)
    }
}

/// 轨道读取器
///
/// 每个实例拥有独立的读取游标. 读取到末尾时返回 `TaoError::Eof`.
pub trait TrackSource: Send {
    /// 开始读取 (选中轨道时调用)
    fn start(&mut self) -> TaoResult<()> {
        Ok(())
    }

    /// 停止读取 (取消选中或门面销毁时调用)
    fn stop(&mut self) {}

    /// 读取下一个样本, `options.seek` 非空时先定位
    fn read(&mut self, options: &ReadOptions) -> TaoResult<MediaSample>;
}
