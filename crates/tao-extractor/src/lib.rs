//! # tao-extractor
//!
//! Tao 媒体提取框架的多轨样本提取门面.
//!
//! 在容器解封装器之上提供统一接口: 选择轨道、跨轨道按时间交织读取样本、
//! 统一 seek, 以及时长、码率和缓存时长的汇总.

pub mod augment;
pub mod config;
pub mod error;
pub mod estimator;
pub mod extractor;
pub mod metrics;
pub mod registry;
pub mod scheduler;
pub mod seek;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_support;

pub use config::{ExtractorConfig, InterleaveMode};
pub use error::{ExtractorError, ExtractorResult};
pub use estimator::StreamEstimate;
pub use extractor::{CachedDuration, MediaExtractor};
pub use metrics::ExtractorMetrics;
pub use registry::{TrackFlags, TrackStatus};
