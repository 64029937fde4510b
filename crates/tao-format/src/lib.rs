//! # tao-format
//!
//! 容器解析层: 数据源、格式探测、解封装器与逐轨读取器.
//!
//! 解封装器只负责描述容器中的轨道, 并为每条轨道创建独立的
//! [`TrackSource`]; 多轨交织、seek 协调等由上层的提取门面完成.

pub mod demuxer;
pub mod demuxers;
pub mod format;
pub mod format_id;
pub mod io;
pub mod probe;
pub mod registry;
pub mod track;

// 重导出常用类型
pub use demuxer::{CasToken, Demuxer};
pub use format::{FileFormat, FormatFlags, TrackFormat, TrackParams};
pub use format_id::FormatId;
#[cfg(feature = "http")]
pub use io::HttpSource;
pub use io::{CacheStatus, DataSource, FileSource, IoContext, MemorySource};
pub use probe::ProbeResult;
pub use registry::FormatRegistry;
pub use track::{
    MediaSample, PageInfo, ReadOptions, SampleFlags, SampleMeta, SeekMode, SeekTarget,
    TrackSource,
};

/// 注册所有内置容器格式
pub fn register_all(registry: &mut FormatRegistry) {
    demuxers::register_all_demuxers(registry);
}
