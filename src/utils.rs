use crate::error::{MirrorError, Result};
use crate::types::{Mirror, ProbeResult};
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::Client;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::fs;
use tracing::{debug, info};

// 单个探测请求的超时，防止慢源阻塞整个流程太久
const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

const BACKUP_SUFFIX: &str = ".bak";

/// Like `test -f`: true only for an existing regular file.
/// NotFound is `false`; any other error (e.g. permission denied on the
/// parent directory) is returned.
pub async fn is_regular_file(path: &Path) -> Result<bool> {
    match fs::metadata(path).await {
        Ok(meta) => Ok(meta.is_file()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(MirrorError::access(path, e)),
    }
}

/// 备份文件 (如果有)
/// 文件名格式: sources.list -> sources.list.TIMESTAMP.bak
/// apt 会静默忽略 sources.list.d 下以 .bak 结尾的文件
pub async fn backup_file(path: &Path) -> Result<Option<PathBuf>> {
    if !is_regular_file(path).await? {
        return Ok(None);
    }
    let timestamp = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();
    let file_name = path.file_name().unwrap_or_default().to_string_lossy();
    let backup_path = path.with_file_name(format!("{}.{}{}", file_name, timestamp, BACKUP_SUFFIX));

    fs::copy(path, &backup_path)
        .await
        .map_err(|e| MirrorError::access(&backup_path, e))?;
    info!("Backup created at {:?}", backup_path);
    Ok(Some(backup_path))
}

/// 恢复到最近的备份
pub async fn restore_latest_backup(path: &Path) -> Result<PathBuf> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let file_name = path.file_name().unwrap_or_default().to_string_lossy();
    let prefix = format!("{}.", file_name);

    if !fs::try_exists(parent).await.unwrap_or(false) {
        return Err(MirrorError::Custom(format!(
            "Directory not found: {:?}",
            parent
        )));
    }

    let mut entries = fs::read_dir(parent).await?;
    let mut latest: Option<(u64, PathBuf)> = None;

    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().to_string();
        let stamp = name
            .strip_prefix(&prefix)
            .and_then(|rest| rest.strip_suffix(BACKUP_SUFFIX))
            .and_then(|ts| ts.parse::<u64>().ok());
        if let Some(ts) = stamp {
            if latest.as_ref().map_or(true, |(best, _)| ts > *best) {
                latest = Some((ts, entry.path()));
            }
        }
    }

    let (_, backup) = latest.ok_or_else(|| {
        MirrorError::Custom(format!("No backup files found for {:?}", path))
    })?;

    info!("Restoring {:?} from {:?}", path, backup);
    fs::copy(&backup, path)
        .await
        .map_err(|e| MirrorError::access(path, e))?;
    Ok(backup)
}

/// Recursively copy `from` into `to`, creating `to` if needed.
///
/// Entries whose file name appears in `exclude` are skipped at any depth.
/// `to` is never descended into when it lives inside `from`, and nothing is
/// copied onto itself (e.g. `from` and `to` are the same directory).
/// Returns the number of files (and symlinks) copied.
pub async fn copy_tree(from: &Path, to: &Path, exclude: &[String]) -> Result<u64> {
    fs::create_dir_all(to)
        .await
        .map_err(|e| MirrorError::access(to, e))?;
    let target = fs::canonicalize(to)
        .await
        .map_err(|e| MirrorError::access(to, e))?;
    let source = fs::canonicalize(from)
        .await
        .map_err(|e| MirrorError::access(from, e))?;
    if source == target {
        info!("{:?} already is {:?}, nothing to copy", from, to);
        return Ok(0);
    }

    let mut copied = 0;
    let mut pending = vec![(from.to_path_buf(), to.to_path_buf())];

    while let Some((src_dir, dst_dir)) = pending.pop() {
        if same_path(&src_dir, &dst_dir).await? {
            debug!("Skipping {:?}, it resolves to {:?}", src_dir, dst_dir);
            continue;
        }
        let mut entries = fs::read_dir(&src_dir)
            .await
            .map_err(|e| MirrorError::access(&src_dir, e))?;

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            if exclude.iter().any(|x| name.to_str() == Some(x.as_str())) {
                debug!("Skipping excluded {:?}", entry.path());
                continue;
            }

            let src = entry.path();
            let dst = dst_dir.join(&name);
            let file_type = entry.file_type().await?;

            if file_type.is_dir() {
                if fs::canonicalize(&src).await? == target {
                    continue;
                }
                fs::create_dir_all(&dst)
                    .await
                    .map_err(|e| MirrorError::access(&dst, e))?;
                pending.push((src, dst));
            } else if file_type.is_symlink() {
                copy_symlink(&src, &dst).await?;
                copied += 1;
            } else {
                // fs::copy truncates dst before reading src
                if same_path(&src, &dst).await? {
                    debug!("Skipping {:?}, it resolves to {:?}", src, dst);
                    continue;
                }
                fs::copy(&src, &dst)
                    .await
                    .map_err(|e| MirrorError::access(&dst, e))?;
                copied += 1;
            }
        }
    }

    Ok(copied)
}

/// True when `dst` exists and resolves to the same path as `src`.
async fn same_path(src: &Path, dst: &Path) -> Result<bool> {
    match fs::canonicalize(dst).await {
        Ok(resolved) => Ok(fs::canonicalize(src)
            .await
            .map_err(|e| MirrorError::access(src, e))?
            == resolved),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(MirrorError::access(dst, e)),
    }
}

#[cfg(unix)]
async fn copy_symlink(src: &Path, dst: &Path) -> Result<()> {
    let link = fs::read_link(src).await?;
    match fs::remove_file(dst).await {
        Err(e) if e.kind() != ErrorKind::NotFound => return Err(MirrorError::access(dst, e)),
        _ => {}
    }
    fs::symlink(&link, dst)
        .await
        .map_err(|e| MirrorError::access(dst, e))
}

#[cfg(not(unix))]
async fn copy_symlink(src: &Path, dst: &Path) -> Result<()> {
    fs::copy(src, dst)
        .await
        .map_err(|e| MirrorError::access(dst, e))?;
    Ok(())
}

/// 并发探测所有镜像的可达性与延迟
///
/// 失败 (超时 / DNS / 非 2xx) 的排在最后
pub async fn probe_mirrors(mirrors: Vec<Mirror>) -> Vec<ProbeResult> {
    let client = Client::builder()
        .timeout(PROBE_TIMEOUT)
        .build()
        .unwrap_or_default();

    let pb = ProgressBar::new(mirrors.len() as u64);
    if let Ok(style) = ProgressStyle::with_template("[{bar:40.cyan/blue}] {pos}/{len} {msg}") {
        pb.set_style(style.progress_chars("|| "));
    }
    pb.set_message("Probing...");

    let tasks = mirrors.into_iter().map(|m| {
        let client = client.clone();
        let pb = pb.clone();
        async move {
            let res = probe(&client, m).await;
            pb.inc(1);
            res
        }
    });

    let mut results = futures::future::join_all(tasks).await;
    pb.finish_and_clear();

    results.sort_by_key(|r| r.latency.unwrap_or(Duration::MAX));
    results
}

async fn probe(client: &Client, mirror: Mirror) -> ProbeResult {
    let start = Instant::now();

    // HEAD 只取响应头，足够判断镜像是否在线
    let latency = match client.head(&mirror.url).send().await {
        Ok(resp) if resp.status().is_success() => Some(start.elapsed()),
        Ok(resp) => {
            debug!("{} answered {}", mirror.url, resp.status());
            None
        }
        Err(e) => {
            debug!("{} unreachable: {}", mirror.url, e);
            None
        }
    };

    ProbeResult { mirror, latency }
}
