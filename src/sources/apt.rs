use crate::config::AptSettings;
use crate::error::{MirrorError, Result};
use crate::traits::SourceManager;
use crate::types::{DescriptorFormat, Mirror, RewriteOutcome};
use crate::utils;
use async_trait::async_trait;
use regex::bytes::{NoExpand, Regex as BytesRegex};
use regex::Regex;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

/// Rewrites the apt source descriptor of a Debian base image to a mirror host.
pub struct AptManager {
    settings: AptSettings,
}

impl AptManager {
    pub fn new(settings: AptSettings) -> Self {
        Self { settings }
    }

    /// Decide which descriptor is in effect. The modern file is checked
    /// first; the legacy one is only consulted when it is missing.
    pub async fn detect_format(&self) -> Result<DescriptorFormat> {
        if utils::is_regular_file(&self.settings.modern_descriptor).await? {
            Ok(DescriptorFormat::Modern)
        } else if utils::is_regular_file(&self.settings.legacy_descriptor).await? {
            Ok(DescriptorFormat::Legacy)
        } else {
            Ok(DescriptorFormat::Absent)
        }
    }

    pub fn descriptor_path(&self, format: DescriptorFormat) -> Option<&Path> {
        match format {
            DescriptorFormat::Modern => Some(self.settings.modern_descriptor.as_path()),
            DescriptorFormat::Legacy => Some(self.settings.legacy_descriptor.as_path()),
            DescriptorFormat::Absent => None,
        }
    }

    /// Replace every upstream host with the mirror host in the active descriptor.
    ///
    /// A missing descriptor is a no-op. A descriptor that cannot be read or
    /// written is an error; nothing is rolled back.
    pub async fn rewrite_mirrors(&self) -> Result<RewriteOutcome> {
        let (path, outcome) = match self.detect_format().await? {
            DescriptorFormat::Modern => (
                self.settings.modern_descriptor.as_path(),
                RewriteOutcome::RewroteModernFormat,
            ),
            DescriptorFormat::Legacy => (
                self.settings.legacy_descriptor.as_path(),
                RewriteOutcome::RewroteLegacyFormat,
            ),
            DescriptorFormat::Absent => {
                info!(
                    "No apt descriptor at {:?} or {:?}, skipping rewrite",
                    self.settings.modern_descriptor, self.settings.legacy_descriptor
                );
                return Ok(RewriteOutcome::NoOp);
            }
        };

        // raw bytes: descriptors are not guaranteed to be UTF-8
        let content = fs::read(path)
            .await
            .map_err(|e| MirrorError::access(path, e))?;

        if self.settings.backup {
            utils::backup_file(path).await?;
        }

        let new_content = substitute_hosts(
            &content,
            &self.settings.upstream_hosts,
            &self.settings.mirror_host,
        )?;
        if new_content == content {
            debug!("{:?} contains no upstream host, writing back unchanged", path);
        }

        fs::write(path, new_content)
            .await
            .map_err(|e| MirrorError::access(path, e))?;

        info!("{:?}: {}", path, outcome);
        Ok(outcome)
    }
}

/// Literal, case-sensitive, global replacement of each host in order.
fn substitute_hosts(content: &[u8], upstream: &[String], mirror: &str) -> Result<Vec<u8>> {
    let mut out = content.to_vec();
    for host in upstream.iter().filter(|host| !host.is_empty()) {
        let re = BytesRegex::new(&regex::escape(host))?;
        out = re.replace_all(&out, NoExpand(mirror.as_bytes())).into_owned();
    }
    Ok(out)
}

#[async_trait]
impl SourceManager for AptManager {
    fn name(&self) -> &'static str {
        "apt"
    }

    fn requires_sudo(&self) -> bool {
        true
    }

    fn mirrors(&self) -> Vec<Mirror> {
        vec![Mirror::new(
            &self.settings.mirror_host,
            &format!("http://{}/debian/", self.settings.mirror_host),
        )]
    }

    async fn config_path(&self) -> Result<Option<PathBuf>> {
        let format = self.detect_format().await?;
        Ok(self.descriptor_path(format).map(Path::to_path_buf))
    }

    async fn current_url(&self) -> Result<Option<String>> {
        let Some(path) = self.config_path().await? else {
            return Ok(None);
        };
        let bytes = fs::read(&path)
            .await
            .map_err(|e| MirrorError::access(&path, e))?;
        let content = String::from_utf8_lossy(&bytes);

        // legacy: deb [arch=amd64] http://... suite comp
        // deb822: URIs: http://...
        let re = Regex::new(
            r"(?m)^(?:deb\s+(?:\[.*?\]\s+)?|URIs:\s*)(?P<url>https?://\S+)",
        )?;

        Ok(re.captures(&content).map(|caps| caps["url"].to_string()))
    }

    async fn apply(&self) -> Result<String> {
        Ok(self.rewrite_mirrors().await?.to_string())
    }

    async fn restore(&self) -> Result<()> {
        let Some(path) = self.config_path().await? else {
            return Err(MirrorError::Custom(
                "No apt descriptor present, nothing to restore".to_string(),
            ));
        };
        utils::restore_latest_backup(&path).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{tempdir, TempDir};

    const LEGACY: &str = "\
# deb.debian.org is the default
deb http://deb.debian.org/debian bookworm main
deb http://deb.debian.org/debian bookworm-updates main
deb http://security.debian.org/debian-security bookworm-security main
";

    const MODERN: &str = "\
Types: deb
URIs: http://deb.debian.org/debian
Suites: bookworm bookworm-updates
Components: main
Signed-By: /usr/share/keyrings/debian-archive-keyring.gpg

Types: deb
URIs: http://deb.debian.org/debian-security
Suites: bookworm-security
Components: main
Signed-By: /usr/share/keyrings/debian-archive-keyring.gpg
";

    fn manager(dir: &TempDir) -> AptManager {
        AptManager::new(AptSettings {
            modern_descriptor: dir.path().join("sources.list.d").join("debian.sources"),
            legacy_descriptor: dir.path().join("sources.list"),
            ..AptSettings::default()
        })
    }

    async fn write(path: &Path, content: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(path, content).await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_end_to_end_line() -> Result<()> {
        let dir = tempdir()?;
        let apt = manager(&dir);
        write(&apt.settings.legacy_descriptor, "deb http://deb.debian.org/debian bookworm main").await?;

        assert_eq!(apt.rewrite_mirrors().await?, RewriteOutcome::RewroteLegacyFormat);
        assert_eq!(
            fs::read_to_string(&apt.settings.legacy_descriptor).await?,
            "deb http://mirrors.aliyun.com/debian bookworm main"
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_modern_only() -> Result<()> {
        let dir = tempdir()?;
        let apt = manager(&dir);
        write(&apt.settings.modern_descriptor, MODERN).await?;

        assert_eq!(apt.detect_format().await?, DescriptorFormat::Modern);
        assert_eq!(apt.rewrite_mirrors().await?, RewriteOutcome::RewroteModernFormat);

        let content = fs::read_to_string(&apt.settings.modern_descriptor).await?;
        assert_eq!(content, MODERN.replace("deb.debian.org", "mirrors.aliyun.com"));
        assert!(!content.contains("deb.debian.org"));
        assert!(!apt.settings.legacy_descriptor.exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_legacy_only_rewrites_both_hosts_and_comments() -> Result<()> {
        let dir = tempdir()?;
        let apt = manager(&dir);
        write(&apt.settings.legacy_descriptor, LEGACY).await?;

        assert_eq!(apt.detect_format().await?, DescriptorFormat::Legacy);
        assert_eq!(apt.rewrite_mirrors().await?, RewriteOutcome::RewroteLegacyFormat);

        let content = fs::read_to_string(&apt.settings.legacy_descriptor).await?;
        assert_eq!(
            content,
            "\
# mirrors.aliyun.com is the default
deb http://mirrors.aliyun.com/debian bookworm main
deb http://mirrors.aliyun.com/debian bookworm-updates main
deb http://mirrors.aliyun.com/debian-security bookworm-security main
"
        );
        assert!(!apt.settings.modern_descriptor.exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_both_present_only_modern_touched() -> Result<()> {
        let dir = tempdir()?;
        let apt = manager(&dir);
        write(&apt.settings.modern_descriptor, MODERN).await?;
        write(&apt.settings.legacy_descriptor, LEGACY).await?;

        assert_eq!(apt.rewrite_mirrors().await?, RewriteOutcome::RewroteModernFormat);
        assert_eq!(fs::read(&apt.settings.legacy_descriptor).await?, LEGACY.as_bytes());
        assert!(fs::read_to_string(&apt.settings.modern_descriptor)
            .await?
            .contains("URIs: http://mirrors.aliyun.com/debian-security"));
        Ok(())
    }

    #[tokio::test]
    async fn test_neither_present_is_noop() -> Result<()> {
        let dir = tempdir()?;
        let apt = manager(&dir);

        assert_eq!(apt.detect_format().await?, DescriptorFormat::Absent);
        assert_eq!(apt.rewrite_mirrors().await?, RewriteOutcome::NoOp);

        let mut entries = fs::read_dir(dir.path()).await?;
        assert!(entries.next_entry().await?.is_none());
        assert!(apt.current_url().await?.is_none());
        assert!(apt.restore().await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_idempotent() -> Result<()> {
        let dir = tempdir()?;
        let apt = manager(&dir);
        write(&apt.settings.legacy_descriptor, LEGACY).await?;

        apt.rewrite_mirrors().await?;
        let once = fs::read(&apt.settings.legacy_descriptor).await?;
        assert_eq!(apt.rewrite_mirrors().await?, RewriteOutcome::RewroteLegacyFormat);
        assert_eq!(fs::read(&apt.settings.legacy_descriptor).await?, once);
        Ok(())
    }

    #[tokio::test]
    async fn test_no_upstream_host_is_success() -> Result<()> {
        let dir = tempdir()?;
        let apt = manager(&dir);
        let custom = "deb https://example.org/debian bookworm main\n";
        write(&apt.settings.legacy_descriptor, custom).await?;

        assert_eq!(apt.rewrite_mirrors().await?, RewriteOutcome::RewroteLegacyFormat);
        assert_eq!(fs::read_to_string(&apt.settings.legacy_descriptor).await?, custom);
        Ok(())
    }

    #[tokio::test]
    async fn test_case_sensitive() -> Result<()> {
        let dir = tempdir()?;
        let apt = manager(&dir);
        write(&apt.settings.legacy_descriptor, "deb http://DEB.DEBIAN.ORG/debian bookworm main\n").await?;

        apt.rewrite_mirrors().await?;
        assert!(fs::read_to_string(&apt.settings.legacy_descriptor)
            .await?
            .contains("DEB.DEBIAN.ORG"));
        Ok(())
    }

    #[tokio::test]
    async fn test_current_url_both_formats() -> Result<()> {
        let dir = tempdir()?;
        let apt = manager(&dir);

        write(&apt.settings.legacy_descriptor, LEGACY).await?;
        assert_eq!(
            apt.current_url().await?,
            Some("http://deb.debian.org/debian".to_string())
        );

        write(&apt.settings.modern_descriptor, MODERN).await?;
        apt.rewrite_mirrors().await?;
        assert_eq!(
            apt.current_url().await?,
            Some("http://mirrors.aliyun.com/debian".to_string())
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_backup_and_restore() -> Result<()> {
        let dir = tempdir()?;
        let mut apt = manager(&dir);
        apt.settings.backup = true;
        write(&apt.settings.legacy_descriptor, LEGACY).await?;

        apt.apply().await?;
        assert!(!fs::read_to_string(&apt.settings.legacy_descriptor)
            .await?
            .contains("deb.debian.org"));

        apt.restore().await?;
        assert_eq!(fs::read_to_string(&apt.settings.legacy_descriptor).await?, LEGACY);
        Ok(())
    }

    #[tokio::test]
    async fn test_non_utf8_descriptor() -> Result<()> {
        let dir = tempdir()?;
        let apt = manager(&dir);
        fs::write(
            &apt.settings.legacy_descriptor,
            b"# caf\xe9 mirror\ndeb http://deb.debian.org/debian bookworm main\n",
        )
        .await?;

        assert_eq!(apt.rewrite_mirrors().await?, RewriteOutcome::RewroteLegacyFormat);
        assert_eq!(
            fs::read(&apt.settings.legacy_descriptor).await?,
            b"# caf\xe9 mirror\ndeb http://mirrors.aliyun.com/debian bookworm main\n".to_vec()
        );
        assert_eq!(
            apt.current_url().await?,
            Some("http://mirrors.aliyun.com/debian".to_string())
        );
        Ok(())
    }

    #[test]
    fn test_substitution_is_literal() -> Result<()> {
        let hosts = vec!["deb.debian.org".to_string()];
        // '.' must not act as a wildcard, '$0' must not expand
        let out = substitute_hosts(b"debXdebianXorg deb.debian.org", &hosts, "$0.mirror")?;
        assert_eq!(out, b"debXdebianXorg $0.mirror".to_vec());
        Ok(())
    }

    #[tokio::test]
    async fn test_inaccessible_descriptor_is_fatal() -> Result<()> {
        let dir = tempdir()?;
        // a regular file where a directory is expected: stat fails with
        // ENOTDIR, for root as well
        let blocker = dir.path().join("sources.list.d");
        fs::write(&blocker, "not a directory").await?;

        let apt = manager(&dir);
        write(&apt.settings.legacy_descriptor, LEGACY).await?;

        let err = apt.rewrite_mirrors().await.unwrap_err();
        assert!(matches!(&err, MirrorError::Access { path, .. } if *path == apt.settings.modern_descriptor));
        assert_eq!(err.exit_code(), 1);
        // no fallback to the legacy file
        assert_eq!(fs::read_to_string(&apt.settings.legacy_descriptor).await?, LEGACY);
        Ok(())
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unwritable_descriptor_is_fatal() -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir()?;
        let apt = manager(&dir);
        write(&apt.settings.legacy_descriptor, LEGACY).await?;
        fs::set_permissions(&apt.settings.legacy_descriptor, std::fs::Permissions::from_mode(0o444))
            .await?;

        // root ignores file modes; covered by test_inaccessible_descriptor_is_fatal
        if fs::OpenOptions::new()
            .write(true)
            .open(&apt.settings.legacy_descriptor)
            .await
            .is_ok()
        {
            return Ok(());
        }

        let err = apt.rewrite_mirrors().await.unwrap_err();
        assert!(matches!(err, MirrorError::Access { .. }));
        assert_eq!(fs::read_to_string(&apt.settings.legacy_descriptor).await?, LEGACY);
        Ok(())
    }
}
