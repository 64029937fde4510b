//! 解封装器 (Demuxer) trait 定义.
//!
//! 解封装器负责打开容器、描述其中的轨道, 并为每条轨道创建独立的
//! [`TrackSource`]. 它本身不产出交织的数据包: 轨道之间的交织由上层的
//! 提取门面决定.

use std::sync::Arc;

use bytes::Bytes;
use tao_core::TaoResult;

use crate::format::{FileFormat, FormatFlags, TrackFormat};
use crate::format_id::FormatId;
use crate::io::DataSource;
use crate::track::TrackSource;

/// 条件访问 (CAS) 令牌
///
/// 不透明的字节串, 由上层在选择轨道之前交给解封装器, 用于受保护轨道的解密.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CasToken(pub Bytes);

/// 解封装器 trait
///
/// 使用流程:
/// 1. 调用 `open()` 打开容器并解析头部
/// 2. 调用 `track_count()` / `track_format()` 获取轨道信息
/// 3. 为需要的轨道调用 `create_track_source()`, 各自独立读取
pub trait Demuxer: Send {
    /// 获取格式标识
    fn format_id(&self) -> FormatId;

    /// 获取格式名称
    fn name(&self) -> &str;

    /// 打开容器并解析头部信息
    fn open(&mut self, source: Arc<dyn DataSource>) -> TaoResult<()>;

    /// 轨道数量
    fn track_count(&self) -> usize;

    /// 获取轨道格式
    ///
    /// `flags` 含 `INCLUDE_EXTENSIVE_METADATA` 时允许扫描整个轨道,
    /// 结果会被缓存, 所以需要 `&mut self`.
    fn track_format(&mut self, index: usize, flags: FormatFlags) -> TaoResult<TrackFormat>;

    /// 获取容器级格式
    fn file_format(&self) -> FileFormat;

    /// 为指定轨道创建新的读取器, 每次调用返回独立游标
    fn create_track_source(&self, index: usize) -> TaoResult<Box<dyn TrackSource>>;

    /// 设置条件访问令牌
    ///
    /// 默认实现适用于不含受保护轨道的容器: 记录日志后忽略.
    fn set_media_cas(&mut self, token: &CasToken) -> TaoResult<()> {
        log::debug!(
            "{}: 容器不含受保护轨道, 忽略 CAS 令牌 ({} 字节)",
            self.name(),
            token.0.len()
        );
        Ok(())
    }
}
