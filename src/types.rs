use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// 镜像源定义
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mirror {
    pub name: String, // 例如: "Aliyun"
    pub url: String,  // 例如: "http://mirrors.aliyun.com/debian/"
}

impl Mirror {
    pub fn new(name: &str, url: &str) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
        }
    }
}

/// Which apt source descriptor the base image carries.
///
/// Resolved once per run. `Modern` wins when both files exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorFormat {
    /// deb822 `.sources` file under `sources.list.d`
    Modern,
    /// one-line-per-entry `sources.list`
    Legacy,
    Absent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewriteOutcome {
    RewroteModernFormat,
    RewroteLegacyFormat,
    NoOp,
}

impl fmt::Display for RewriteOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RewriteOutcome::RewroteModernFormat => "rewrote modern (deb822) descriptor",
            RewriteOutcome::RewroteLegacyFormat => "rewrote legacy sources.list",
            RewriteOutcome::NoOp => "no descriptor found, nothing to rewrite",
        };
        f.write_str(s)
    }
}

/// 探测结果
#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub mirror: Mirror,
    /// None: 超时 / 连接失败 / 非 2xx
    pub latency: Option<Duration>,
}
