//! # tao-core
//!
//! Tao 媒体提取框架核心库, 提供基础类型定义与错误处理.

pub mod codec_id;
pub mod error;
pub mod media_type;
pub mod rational;

// 重导出常用类型
pub use codec_id::CodecId;
pub use error::{TaoError, TaoResult};
pub use media_type::MediaType;
pub use rational::{MICROS_PER_SECOND, Rational, Rounding};
