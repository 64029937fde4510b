//! 容器格式注册表.
//!
//! 管理所有已注册的解封装器, 支持按格式标识查找和自动探测.

use std::collections::HashMap;
use std::sync::Arc;

use tao_core::{TaoError, TaoResult};

use crate::demuxer::Demuxer;
use crate::format_id::FormatId;
use crate::io::DataSource;
use crate::probe::{FormatProbe, ProbeResult};

/// 解封装器工厂函数类型
pub type DemuxerFactory = fn() -> TaoResult<Box<dyn Demuxer>>;

/// 探测时读取的头部字节数上限
const PROBE_SIZE: usize = 8192;

/// 解封装器注册条目
struct DemuxerEntry {
    /// 格式名称
    name: String,
    /// 工厂函数
    factory: DemuxerFactory,
}

/// 容器格式注册表
pub struct FormatRegistry {
    /// 解封装器工厂映射
    demuxers: HashMap<FormatId, DemuxerEntry>,
    /// 格式探测器列表
    probes: Vec<Box<dyn FormatProbe>>,
}

impl FormatRegistry {
    /// 创建空的注册表
    pub fn new() -> Self {
        Self {
            demuxers: HashMap::new(),
            probes: Vec::new(),
        }
    }

    /// 注册一个解封装器
    pub fn register_demuxer(
        &mut self,
        format_id: FormatId,
        name: impl Into<String>,
        factory: DemuxerFactory,
    ) {
        self.demuxers.insert(
            format_id,
            DemuxerEntry {
                name: name.into(),
                factory,
            },
        );
    }

    /// 注册一个格式探测器
    pub fn register_probe(&mut self, probe: Box<dyn FormatProbe>) {
        self.probes.push(probe);
    }

    /// 创建指定格式的解封装器实例
    pub fn create_demuxer(&self, format_id: FormatId) -> TaoResult<Box<dyn Demuxer>> {
        let entry = self.demuxers.get(&format_id).ok_or_else(|| {
            TaoError::FormatNotFound(format!("未找到 {} 的解封装器", format_id))
        })?;
        (entry.factory)()
    }

    /// 探测数据的容器格式
    ///
    /// 遍历所有已注册的探测器, 返回置信度最高的结果.
    pub fn probe(&self, data: &[u8], filename: Option<&str>) -> Option<ProbeResult> {
        let mut best: Option<ProbeResult> = None;
        for probe in &self.probes {
            if let Some(score) = probe.probe(data, filename) {
                let is_better = best.as_ref().is_none_or(|b| score > b.score);
                if is_better {
                    best = Some(ProbeResult {
                        format_id: probe.format_id(),
                        score,
                    });
                }
            }
        }
        best
    }

    /// 获取所有已注册的解封装器名称
    pub fn list_demuxers(&self) -> Vec<(FormatId, &str)> {
        self.demuxers
            .iter()
            .map(|(id, entry)| (*id, entry.name.as_str()))
            .collect()
    }

    /// 探测数据源格式 (不打开解封装器)
    pub fn probe_source(&self, source: &dyn DataSource) -> TaoResult<ProbeResult> {
        let mut io = source.open_reader()?;
        let mut head = vec![0u8; PROBE_SIZE];
        let mut filled = 0;
        while filled < head.len() {
            let n = io.read_partial(&mut head[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        head.truncate(filled);

        self.probe(&head, source.uri())
            .ok_or_else(|| TaoError::FormatNotFound("无法识别输入数据的容器格式".to_string()))
    }

    /// 自动探测格式, 创建对应的解封装器并打开
    pub fn open_input(&self, source: Arc<dyn DataSource>) -> TaoResult<Box<dyn Demuxer>> {
        let result = self.probe_source(source.as_ref())?;
        log::debug!("探测结果: {} (score={})", result.format_id, result.score);
        let mut demuxer = self.create_demuxer(result.format_id)?;
        demuxer.open(source)?;
        Ok(demuxer)
    }
}

impl Default for FormatRegistry {
    fn default() -> Self {
        Self::new()
    }
}
