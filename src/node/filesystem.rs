//! Filesystem inspection
//!
//! Signature probing (without mounting) plus the stat helpers the volume
//! stats RPC is built on.

use crate::error::{Error, Result};
use std::io::{Seek, SeekFrom};
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

/// Identify an existing filesystem signature on a block device.
///
/// Reads the superblock region through `blkid` and never mounts. Returns
/// `None` when the device carries no recognizable signature; any other
/// probe failure is fatal to the caller.
pub async fn detect_filesystem(device: &Path) -> Result<Option<String>> {
    let output = Command::new("blkid")
        .args(["-c", "/dev/null", "-o", "export", "-s", "TYPE"])
        .arg(device)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| Error::Internal(format!("failed to run blkid: {e}")))?;

    match output.status.code() {
        Some(0) => {}
        // blkid exits 2 when nothing was detected on the device.
        Some(2) => return Ok(None),
        _ => {
            return Err(Error::Internal(format!(
                "blkid failed on {}: {}",
                device.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
    }

    Ok(parse_blkid_export(&String::from_utf8_lossy(&output.stdout)))
}

pub(crate) fn parse_blkid_export(out: &str) -> Option<String> {
    out.lines()
        .find_map(|line| line.strip_prefix("TYPE="))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

/// Size of a block device (or any seekable file) in bytes.
pub fn device_size(path: &Path) -> Result<u64> {
    let mut file = std::fs::File::open(path)?;
    Ok(file.seek(SeekFrom::End(0))?)
}

/// Filesystem usage split into bytes and inodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsUsage {
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub available_bytes: u64,
    pub total_inodes: u64,
    pub used_inodes: u64,
    pub available_inodes: u64,
}

/// statvfs the given path.
pub fn fs_usage(path: &Path) -> Result<FsUsage> {
    let st = nix::sys::statvfs::statvfs(path)
        .map_err(|e| Error::Internal(format!("statvfs on {} failed: {e}", path.display())))?;
    let frsize = st.fragment_size() as u64;

    Ok(FsUsage {
        total_bytes: st.blocks() as u64 * frsize,
        used_bytes: (st.blocks() - st.blocks_free()) as u64 * frsize,
        available_bytes: st.blocks_available() as u64 * frsize,
        total_inodes: st.files() as u64,
        used_inodes: (st.files() - st.files_free()) as u64,
        available_inodes: st.files_available() as u64,
    })
}
