use crate::config::PipSettings;
use crate::error::{MirrorError, Result};
use crate::traits::SourceManager;
use crate::types::Mirror;
use crate::utils;
use async_trait::async_trait;
use regex::{NoExpand, Regex};
use std::ops::Range;
use std::path::PathBuf;
use tokio::fs;
use tracing::info;

/// Persists the pip index mirror in pip's global configuration file.
///
/// Every later `pip install` picks it up without extra flags.
pub struct PipManager {
    settings: PipSettings,
}

impl PipManager {
    pub fn new(settings: PipSettings) -> Self {
        Self { settings }
    }

    /// Set `index-url` and `trusted-host` under `[global]`.
    ///
    /// Existing keys are replaced in place, other content is kept. Calling
    /// this again with the same values leaves the file byte-identical.
    pub async fn configure_package_mirror(&self, index_url: &str, trusted_host: &str) -> Result<()> {
        let path = &self.settings.config_path;

        // 1. 确保目录存在
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| MirrorError::access(parent, e))?;
        }

        // 2. 读取旧内容或初始化空内容
        let content = if utils::is_regular_file(path).await? {
            fs::read_to_string(path)
                .await
                .map_err(|e| MirrorError::access(path, e))?
        } else {
            String::new()
        };

        // 3. 备份 (如果文件存在且不为空)
        if self.settings.backup && !content.is_empty() {
            utils::backup_file(path).await?;
        }

        // 4. 写入
        let new_content = set_global_keys(
            &content,
            &[("index-url", index_url), ("trusted-host", trusted_host)],
        )?;
        fs::write(path, new_content)
            .await
            .map_err(|e| MirrorError::access(path, e))?;

        info!(
            "pip configured at {:?}: index-url = {}, trusted-host = {}",
            path, index_url, trusted_host
        );
        Ok(())
    }
}

/// Byte range of the `[global]` section body: from the end of its header
/// line up to the next section header (or the end of the document).
fn global_section(content: &str) -> Result<Option<Range<usize>>> {
    let header = Regex::new(r"(?m)^\[global\][ \t]*$")?;
    let Some(m) = header.find(content) else {
        return Ok(None);
    };
    let next = Regex::new(r"(?m)^[ \t]*\[")?;
    let end = next
        .find(&content[m.end()..])
        .map_or(content.len(), |n| m.end() + n.start());
    Ok(Some(m.end()..end))
}

/// Upsert `key = value` lines in the `[global]` section of an INI document.
///
/// A key already in `[global]` is rewritten where it stands, together with
/// its indented continuation lines. Keys in other sections are left alone.
/// Missing keys go right below the `[global]` header, or into a new
/// `[global]` section.
fn set_global_keys(content: &str, pairs: &[(&str, &str)]) -> Result<String> {
    let Some(span) = global_section(content)? else {
        let mut out = content.to_string();
        if !out.is_empty() {
            if !out.ends_with('\n') {
                out.push('\n');
            }
            out.push('\n');
        }
        out.push_str("[global]\n");
        for (key, value) in pairs {
            out.push_str(&format!("{} = {}\n", key, value));
        }
        return Ok(out);
    };

    let mut section = content[span.clone()].to_string();
    let mut missing = Vec::new();

    for (key, value) in pairs {
        let line = format!("{} = {}", key, value);
        let re = Regex::new(&format!(
            r"(?m)^{}[ \t]*=.*(?:\n[ \t]+\S.*)*$",
            regex::escape(key)
        ))?;
        if re.is_match(&section) {
            section = re.replace_all(&section, NoExpand(&line)).into_owned();
        } else {
            missing.push(line);
        }
    }

    if !missing.is_empty() {
        section.insert_str(0, &format!("\n{}", missing.join("\n")));
    }

    Ok(format!(
        "{}{}{}",
        &content[..span.start],
        section,
        &content[span.end..]
    ))
}

#[async_trait]
impl SourceManager for PipManager {
    fn name(&self) -> &'static str {
        "pip"
    }

    fn requires_sudo(&self) -> bool {
        // global scope lives under /etc
        self.settings.config_path.starts_with("/etc")
    }

    fn mirrors(&self) -> Vec<Mirror> {
        vec![Mirror::new(&self.settings.trusted_host, &self.settings.index_url)]
    }

    async fn config_path(&self) -> Result<Option<PathBuf>> {
        let path = &self.settings.config_path;
        Ok(utils::is_regular_file(path)
            .await?
            .then(|| path.clone()))
    }

    async fn current_url(&self) -> Result<Option<String>> {
        let Some(path) = self.config_path().await? else {
            return Ok(None);
        };
        let content = fs::read_to_string(&path)
            .await
            .map_err(|e| MirrorError::access(&path, e))?;
        let Some(span) = global_section(&content)? else {
            return Ok(None);
        };

        // 支持 index-url = https://... 或 index-url=https://...
        let re = Regex::new(r"(?m)^index-url[ \t]*=[ \t]*(.+)$")?;
        Ok(re
            .captures(&content[span])
            .map(|caps| caps[1].trim().to_string()))
    }

    async fn apply(&self) -> Result<String> {
        self.configure_package_mirror(&self.settings.index_url, &self.settings.trusted_host)
            .await?;
        Ok(format!("index-url set to {}", self.settings.index_url))
    }

    async fn restore(&self) -> Result<()> {
        utils::restore_latest_backup(&self.settings.config_path).await?;
        Ok(())
    }
}
