//! 格式探测.
//!
//! 通过分析数据源头部字节和文件扩展名, 自动识别容器格式.

use crate::format_id::FormatId;

/// 探测置信度, 数值越高越有把握
pub type ProbeScore = u32;

/// 最低探测分数 (仅根据扩展名)
pub const SCORE_EXTENSION: ProbeScore = 50;

/// 最高探测分数 (魔数完全匹配)
pub const SCORE_MAX: ProbeScore = 100;

/// 探测结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeResult {
    /// 识别出的格式
    pub format_id: FormatId,
    /// 置信度分数
    pub score: ProbeScore,
}

/// 格式探测器 trait
pub trait FormatProbe: Send + Sync {
    /// 根据头部数据探测格式
    ///
    /// # 参数
    /// - `data`: 数据源开头的若干字节
    /// - `filename`: 文件名或 URL (可选, 用于扩展名匹配)
    ///
    /// # 返回
    /// - `Some(score)`: 探测成功, 返回置信度
    /// - `None`: 不是此格式
    fn probe(&self, data: &[u8], filename: Option<&str>) -> Option<ProbeScore>;

    /// 获取此探测器对应的格式标识
    fn format_id(&self) -> FormatId;
}

/// 判断文件名 (或 URL 路径) 的扩展名是否在给定列表中
pub(crate) fn has_extension(filename: Option<&str>, extensions: &[&str]) -> bool {
    let Some(name) = filename else {
        return false;
    };
    let path = name.split(['?', '#']).next().unwrap_or(name);
    match path.rsplit_once('.') {
        Some((_, ext)) => {
            let ext = ext.to_ascii_lowercase();
            extensions.iter().any(|e| *e == ext)
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_扩展名匹配() {
        assert!(has_extension(Some("a/b/song.OGG"), &["ogg", "oga"]));
        assert!(has_extension(Some("http://host/x.wav?token=1"), &["wav"]));
        assert!(!has_extension(Some("noext"), &["wav"]));
        assert!(!has_extension(None, &["wav"]));
    }
}
