//! # Tao Extract
//!
//! 纯 Rust 实现的多轨媒体样本提取框架.
//!
//! 打开 WAV、Ogg 等容器, 选择若干轨道, 按时间顺序交织取出压缩样本
//! 及其元数据, 并支持统一 seek.
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use tao_extract::extractor::MediaExtractor;
//!
//! let extractor = MediaExtractor::new();
//! extractor.set_data_source_uri("input.ogg", &[]).unwrap();
//! extractor.select_track(0).unwrap();
//! let mut buf = vec![0u8; 64 * 1024];
//! while let Ok(n) = extractor.read_sample_data(&mut buf) {
//!     println!("{} 字节 @ {}us", n, extractor.sample_time().unwrap());
//!     if extractor.advance().is_err() {
//!         break;
//!     }
//! }
//! ```
//!
//! # Crate 结构
//!
//! | Crate | 功能 |
//! |-------|------|
//! | `tao-core` | 核心类型与错误 |
//! | `tao-format` | 数据源、容器探测与解封装 |
//! | `tao-extractor` | 多轨样本提取门面 |

/// 核心类型与错误
pub use tao_core as core;

/// 数据源与容器解封装
pub use tao_format as format;

/// 多轨样本提取门面
pub use tao_extractor as extractor;

pub mod logging;

/// 获取版本号
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// 创建已注册所有内置容器格式的注册表
pub fn default_format_registry() -> tao_format::FormatRegistry {
    let mut registry = tao_format::FormatRegistry::new();
    tao_format::register_all(&mut registry);
    registry
}
