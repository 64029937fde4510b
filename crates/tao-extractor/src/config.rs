//! 提取门面配置.

use serde::{Deserialize, Serialize};

/// 选中轨道数上限默认值
pub const DEFAULT_MAX_SELECTED_TRACKS: usize = 16384;

/// 跨轨道的当前样本选择策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InterleaveMode {
    /// 时间戳最小的缓冲样本, 相同时取最早选中的轨道
    #[default]
    Timestamp,
    /// 最近一次 advance 的轨道仍有样本时优先返回它, 否则退回 `Timestamp`
    LastAdvanced,
}

/// 提取门面配置
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ExtractorConfig {
    #[serde(default = "default_max_selected_tracks")]
    pub max_selected_tracks: usize,
    #[serde(default)]
    pub interleave: InterleaveMode,
}

fn default_max_selected_tracks() -> usize {
    DEFAULT_MAX_SELECTED_TRACKS
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            max_selected_tracks: DEFAULT_MAX_SELECTED_TRACKS,
            interleave: InterleaveMode::default(),
        }
    }
}

impl ExtractorConfig {
    /// 从 JSON 文本加载, 缺省字段取默认值
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}
