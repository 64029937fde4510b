//! 统一错误类型定义.
//!
//! 容器层、I/O 层共用的错误类型. 提取门面 (tao-extractor) 在此之上
//! 定义自己的错误分类, 并通过 `Unexpected` 包装这里的错误.

use thiserror::Error;

/// Tao 框架统一错误类型
#[derive(Debug, Error)]
pub enum TaoError {
    /// 无效参数
    #[error("无效参数: {0}")]
    InvalidArgument(String),

    /// 不支持的操作
    #[error("不支持的操作: {0}")]
    Unsupported(String),

    /// 容器格式错误
    #[error("格式错误: {0}")]
    Format(String),

    /// I/O 错误
    #[error("I/O 错误: {0}")]
    Io(#[from] std::io::Error),

    /// 已到达流末尾
    #[error("已到达流末尾")]
    Eof,

    /// 未找到指定的容器格式
    #[error("未找到容器格式: {0}")]
    FormatNotFound(String),

    /// 未找到指定的轨道
    #[error("未找到轨道: 索引 {0}")]
    TrackNotFound(usize),

    /// 无效数据 (损坏的码流等)
    #[error("无效数据: {0}")]
    InvalidData(String),

    /// 网络错误
    #[error("网络错误: {0}")]
    Network(String),

    /// 内部错误 (不应发生)
    #[error("内部错误: {0}")]
    Internal(String),
}

impl TaoError {
    /// 是否为流末尾信号
    pub fn is_eof(&self) -> bool {
        matches!(self, Self::Eof)
    }
}

/// Tao 框架统一 Result 类型
pub type TaoResult<T> = Result<T, TaoError>;
