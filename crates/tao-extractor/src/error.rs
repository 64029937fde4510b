//! 提取门面的错误类型.
//!
//! 轨道的 sticky 状态需要保存错误副本, 所以 [`ExtractorError`] 实现了 `Clone`,
//! 底层的 [`TaoError`] 通过 `Arc` 共享.

use std::sync::Arc;

use tao_core::TaoError;
use thiserror::Error;

/// 提取门面统一错误类型
#[derive(Debug, Clone, Error)]
pub enum ExtractorError {
    /// 当前生命周期阶段不允许此操作
    #[error("状态无效: {0}")]
    InvalidState(String),

    /// 轨道索引越界
    #[error("轨道索引越界: {index} (共 {count} 条轨道)")]
    OutOfRange { index: usize, count: usize },

    /// 轨道已被选中
    #[error("轨道 #{0} 已被选中")]
    AlreadySelected(usize),

    /// 轨道未被选中
    #[error("轨道 #{0} 未被选中")]
    NotSelected(usize),

    /// 选中轨道数超过上限
    #[error("选中轨道数超过上限 {0}")]
    TooManyTracks(usize),

    /// 所有选中轨道均已读完
    #[error("已到达流末尾")]
    EndOfStream,

    /// 当前没有可读的样本
    #[error("没有缓冲的样本")]
    NoSampleBuffered,

    /// 调用方缓冲区不足
    #[error("缓冲区过小: 需要 {needed} 字节, 实际 {capacity} 字节")]
    BufferTooSmall { needed: usize, capacity: usize },

    /// 页结构不一致
    #[error("页结构异常: {0}")]
    MalformedPage(String),

    /// 底层数据源或容器返回的错误
    #[error("底层错误: {0}")]
    Unexpected(Arc<TaoError>),
}

impl From<TaoError> for ExtractorError {
    fn from(err: TaoError) -> Self {
        match err {
            TaoError::Eof => Self::EndOfStream,
            other => Self::Unexpected(Arc::new(other)),
        }
    }
}

impl ExtractorError {
    /// 是否为流结束信号
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, Self::EndOfStream)
    }
}

/// 提取门面 Result 类型别名
pub type ExtractorResult<T> = Result<T, ExtractorError>;
