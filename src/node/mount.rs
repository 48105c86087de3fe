//! Mount manager
//!
//! Idempotent format-and-mount, bind mounts for raw-block volumes,
//! unmount-with-cleanup, and online filesystem growth. Mount state is read
//! from the kernel mount table on every call and never cached. Host tools
//! (`mount`, `umount`, `mkfs.*`, `findmnt`, `dumpe2fs`, `resize2fs`,
//! `xfs_growfs`) are invoked with documented output grammars.

use crate::domain::Mounter;
use crate::error::{Error, Result};
use crate::node::filesystem;
use async_trait::async_trait;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

/// Filesystem used when a publish request does not name one.
pub const DEFAULT_FS_TYPE: &str = "ext4";

/// Directory mode applied to a freshly mounted target: 0777 plus setgid.
const MOUNTED_DIR_MODE: u32 = 0o2777;

pub struct MountManager;

impl MountManager {
    pub fn new() -> Self {
        Self
    }

    async fn run_tool(&self, tool: &str, args: &[&str]) -> Result<String> {
        debug!(tool, ?args, "invoking mount tool");
        let output = Command::new(tool)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| Error::Internal(format!("failed to run {tool}: {e}")))?;

        if !output.status.success() {
            return Err(Error::Internal(format!(
                "{tool} {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn format(&self, device: &Path, fs_type: &str) -> Result<()> {
        info!(device = %device.display(), fs_type, "formatting device");
        let device = device.to_string_lossy();
        let device = device.as_ref();
        let tool = format!("mkfs.{fs_type}");
        match fs_type {
            "ext2" | "ext3" | "ext4" => self.run_tool(&tool, &["-F", device]).await?,
            "xfs" | "btrfs" => self.run_tool(&tool, &["-f", device]).await?,
            _ => self.run_tool(&tool, &[device]).await?,
        };
        Ok(())
    }

    async fn mount(
        &self,
        device: &Path,
        target: &Path,
        fs_type: &str,
        options: &[String],
    ) -> Result<()> {
        let device = device.to_string_lossy();
        let target = target.to_string_lossy();
        let joined = options.join(",");
        let mut args = vec!["-t", fs_type];
        if !joined.is_empty() {
            args.push("-o");
            args.push(&joined);
        }
        args.push(&device);
        args.push(&target);
        self.run_tool("mount", &args).await?;
        Ok(())
    }
}

impl Default for MountManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Mounter for MountManager {
    async fn ensure_mounted(
        &self,
        device: &Path,
        target: &Path,
        fs_type: &str,
        options: &[String],
        read_only: bool,
    ) -> Result<()> {
        if is_mount_point(target)? {
            debug!(target = %target.display(), "target is already a mount point");
            return Ok(());
        }

        std::fs::create_dir_all(target)?;

        let detected = filesystem::detect_filesystem(device).await?;
        if needs_format(detected.as_deref(), fs_type, device)? {
            self.format(device, fs_type).await?;
        }

        let options = mount_options(fs_type, options, read_only);
        if let Err(e) = self.mount(device, target, fs_type, &options).await {
            let _ = std::fs::remove_dir(target);
            return Err(e);
        }

        if let Err(e) =
            std::fs::set_permissions(target, std::fs::Permissions::from_mode(MOUNTED_DIR_MODE))
        {
            // Partial failure: roll the mount back before surfacing.
            let target_s = target.to_string_lossy();
            let _ = self.run_tool("umount", &[target_s.as_ref()]).await;
            let _ = std::fs::remove_dir(target);
            return Err(e.into());
        }

        info!(
            device = %device.display(),
            target = %target.display(),
            fs_type,
            read_only,
            "volume mounted"
        );
        Ok(())
    }

    async fn bind_mount(&self, source: &Path, target: &Path, read_only: bool) -> Result<()> {
        if is_mount_point(target)? {
            debug!(target = %target.display(), "target is already bind-mounted");
            return Ok(());
        }

        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(target)?;
        std::fs::set_permissions(target, std::fs::Permissions::from_mode(0o755))?;

        let options = if read_only { "bind,ro" } else { "bind" };
        let source_s = source.to_string_lossy();
        let target_s = target.to_string_lossy();
        if let Err(e) = self
            .run_tool(
                "mount",
                &["-o", options, source_s.as_ref(), target_s.as_ref()],
            )
            .await
        {
            let _ = std::fs::remove_file(target);
            return Err(e);
        }

        info!(source = %source.display(), target = %target.display(), "bind mount created");
        Ok(())
    }

    async fn unmount(&self, target: &Path) -> Result<()> {
        let meta = match std::fs::symlink_metadata(target) {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(target = %target.display(), "unmount target already absent");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        if is_mount_point(target)? {
            let target_s = target.to_string_lossy();
            self.run_tool("umount", &["-R", target_s.as_ref()]).await?;
        }

        if meta.is_dir() {
            std::fs::remove_dir(target)?;
        } else {
            std::fs::remove_file(target)?;
        }
        info!(target = %target.display(), "unmounted and removed");
        Ok(())
    }

    async fn resize_if_needed(&self, device: &Path, target: &Path) -> Result<bool> {
        let device_bytes = filesystem::device_size(device)?;
        let fs_type = filesystem::detect_filesystem(device)
            .await?
            .unwrap_or_default();
        let device_s = device.to_string_lossy();
        let device_s = device_s.as_ref();
        let target_s = target.to_string_lossy();
        let target_s = target_s.as_ref();

        let fs_bytes = match fs_type.as_str() {
            "ext2" | "ext3" | "ext4" => {
                let out = self.run_tool("dumpe2fs", &["-h", device_s]).await?;
                let (blocks, block_size) = parse_dumpe2fs(&out)?;
                blocks * block_size
            }
            "xfs" => {
                let out = self.run_tool("xfs_info", &[target_s]).await?;
                let (blocks, block_size) = parse_xfs_info(&out)?;
                blocks * block_size
            }
            other => {
                debug!(fs_type = other, "online resize not supported, skipping");
                return Ok(false);
            }
        };

        if fs_bytes >= device_bytes {
            return Ok(false);
        }

        info!(
            device = %device.display(),
            target = %target.display(),
            fs_bytes,
            device_bytes,
            "growing filesystem"
        );
        match fs_type.as_str() {
            "xfs" => self.run_tool("xfs_growfs", &[target_s]).await?,
            _ => self.run_tool("resize2fs", &[device_s]).await?,
        };
        Ok(true)
    }

    async fn backing_device(&self, target: &Path) -> Result<PathBuf> {
        let target_s = target.to_string_lossy();
        let out = self
            .run_tool(
                "findmnt",
                &["-o", "source", "--noheadings", "--target", target_s.as_ref()],
            )
            .await?;
        let source = out.trim();
        if source.is_empty() {
            return Err(Error::Internal(format!(
                "no filesystem is mounted at {}",
                target.display()
            )));
        }
        Ok(PathBuf::from(source))
    }
}

// =============================================================================
// Mount Table
// =============================================================================

/// Whether `target` appears as a mount point in the kernel mount table.
pub fn is_mount_point(target: &Path) -> Result<bool> {
    let mounts = std::fs::read_to_string("/proc/mounts")?;
    Ok(mount_table_contains(&mounts, target))
}

fn mount_table_contains(mounts: &str, target: &Path) -> bool {
    mounts.lines().any(|line| {
        line.split_whitespace()
            .nth(1)
            .map(unescape_mount_path)
            .is_some_and(|p| Path::new(&p) == target)
    })
}

// The kernel escapes whitespace and backslashes octally in /proc/mounts.
fn unescape_mount_path(path: &str) -> String {
    path.replace("\\040", " ")
        .replace("\\011", "\t")
        .replace("\\012", "\n")
        .replace("\\134", "\\")
}

/// Whether the device must be formatted before mounting. A device that
/// already carries a filesystem signature is never reformatted; a signature
/// other than the requested one is a hard failure.
fn needs_format(detected: Option<&str>, requested: &str, device: &Path) -> Result<bool> {
    match detected {
        None => Ok(true),
        Some(existing) if existing == requested => Ok(false),
        Some(existing) => Err(Error::FailedPrecondition(format!(
            "device {} is already formatted with {existing}, requested {requested}",
            device.display()
        ))),
    }
}

/// Effective mount options: the read-only flag, the caller's flags, and
/// `nouuid` forced for xfs so snapshot clones mount alongside their origin.
fn mount_options(fs_type: &str, options: &[String], read_only: bool) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(options.len() + 2);
    if read_only {
        out.push("ro".to_string());
    }
    out.extend(options.iter().cloned());
    if fs_type == "xfs" && !out.iter().any(|o| o == "nouuid") {
        out.push("nouuid".to_string());
    }
    out
}

fn parse_dumpe2fs(out: &str) -> Result<(u64, u64)> {
    let mut blocks = None;
    let mut block_size = None;
    for line in out.lines() {
        if let Some(rest) = line.strip_prefix("Block count:") {
            blocks = rest.trim().parse::<u64>().ok();
        } else if let Some(rest) = line.strip_prefix("Block size:") {
            block_size = rest.trim().parse::<u64>().ok();
        }
    }
    match (blocks, block_size) {
        (Some(b), Some(s)) => Ok((b, s)),
        _ => Err(Error::Internal("malformed dumpe2fs output".into())),
    }
}

fn parse_xfs_info(out: &str) -> Result<(u64, u64)> {
    for line in out.lines() {
        if !line.starts_with("data") {
            continue;
        }
        let mut blocks = None;
        let mut block_size = None;
        for token in line.split(|c: char| c.is_whitespace() || c == ',') {
            if let Some(v) = token.strip_prefix("blocks=") {
                blocks = v.parse::<u64>().ok();
            } else if let Some(v) = token.strip_prefix("bsize=") {
                block_size = v.parse::<u64>().ok();
            }
        }
        if let (Some(b), Some(s)) = (blocks, block_size) {
            return Ok((b, s));
        }
    }
    Err(Error::Internal("malformed xfs_info output".into()))
}
