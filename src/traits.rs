use async_trait::async_trait;
use crate::error::Result;
use crate::types::Mirror;
use std::path::PathBuf;

/// SourceManager: 每个被改写的包管理器配置 (apt / pip) 必须实现的接口
#[async_trait]
pub trait SourceManager: Sync + Send {
    /// 工具名称 (如 "apt", "pip")
    fn name(&self) -> &'static str;

    /// 是否需要 Root 权限 (写 /etc 下的文件)
    fn requires_sudo(&self) -> bool;

    /// 本次要使用的镜像 (来自 settings)
    fn mirrors(&self) -> Vec<Mirror>;

    /// 实际生效的配置文件路径
    /// 返回 None: 文件不存在 (例如基础镜像没有 apt 源描述文件)
    async fn config_path(&self) -> Result<Option<PathBuf>>;

    /// 获取当前正在使用的源 URL
    /// 返回 Option: 如果未配置或无法解析，则返回 None (视为默认)
    async fn current_url(&self) -> Result<Option<String>>;

    /// 应用镜像配置，返回一行摘要用于日志
    async fn apply(&self) -> Result<String>;

    /// 恢复到上一次的备份
    async fn restore(&self) -> Result<()>;
}
