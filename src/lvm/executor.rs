//! LVM command executor
//!
//! Builds an argument vector per logical operation, runs the host's `lvm`
//! binary, classifies failures from stderr, retries transient errors with
//! exponential backoff, and enforces a per-invocation timeout.

use crate::domain::{LogicalVolume, Lvm, ThinPool, VolumeGroup, VolumeSpec};
use crate::error::{Error, Result};
use crate::lvm::report::{self, ReportFormat, LV_FIELDS, VG_FIELDS};
use async_trait::async_trait;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error as ThisError;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

// =============================================================================
// Constants
// =============================================================================

/// Default location of the `lvm` binary on the host.
pub const DEFAULT_LVM_PATH: &str = "/sbin/lvm";

/// Default hard timeout per tool invocation.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

/// Transient errors are retried this many times.
const MAX_RETRIES: u32 = 3;

/// Backoff base; attempt k sleeps `base * 2^k`.
const RETRY_BASE_DELAY: Duration = Duration::from_millis(100);

/// Grace period between SIGTERM and SIGKILL when a command times out.
const TERM_GRACE: Duration = Duration::from_secs(1);

// =============================================================================
// Error Classification
// =============================================================================

/// Classified failure kind of a tool invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LvmErrorKind {
    NotFound,
    AlreadyExists,
    InsufficientSpace,
    /// The kernel reports the device open or otherwise in use.
    Busy,
    /// Temporary condition; retried inside the executor.
    Transient,
    /// The invocation exceeded the command timeout and was killed.
    Timeout,
    Fatal,
}

/// A failed tool invocation with its classified kind and captured stderr.
#[derive(Debug, Clone, ThisError)]
#[error("lvm {op} failed ({kind:?}): {stderr}")]
pub struct LvmError {
    pub kind: LvmErrorKind,
    pub op: String,
    pub stderr: String,
}

impl LvmError {
    pub fn new(kind: LvmErrorKind, op: &str, stderr: impl Into<String>) -> Self {
        Self {
            kind,
            op: op.to_string(),
            stderr: stderr.into(),
        }
    }
}

/// Map the tool's stderr onto the error taxonomy.
pub fn classify_stderr(stderr: &str) -> LvmErrorKind {
    let s = stderr.to_ascii_lowercase();
    if s.contains("not found") || s.contains("failed to find") {
        LvmErrorKind::NotFound
    } else if s.contains("already exists") {
        LvmErrorKind::AlreadyExists
    } else if s.contains("insufficient free space") || s.contains("insufficient suitable") {
        LvmErrorKind::InsufficientSpace
    } else if s.contains("in use") || s.contains("is open") {
        LvmErrorKind::Busy
    } else if s.contains("temporarily unavailable") {
        LvmErrorKind::Transient
    } else {
        LvmErrorKind::Fatal
    }
}

// =============================================================================
// Executor Configuration
// =============================================================================

/// Configuration for the command executor
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Path of the `lvm` binary.
    pub lvm_path: PathBuf,
    /// Hard timeout per invocation; the child is killed on expiry.
    pub command_timeout: Duration,
    /// Report grammar to request from the tool.
    pub report_format: ReportFormat,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            lvm_path: PathBuf::from(DEFAULT_LVM_PATH),
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            report_format: ReportFormat::default(),
        }
    }
}

// =============================================================================
// Command Executor
// =============================================================================

/// Runs LVM operations against the host tool.
pub struct CommandExecutor {
    config: ExecutorConfig,
}

impl CommandExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    /// Run one operation, retrying transient failures.
    async fn run(&self, op: &str, args: &[String]) -> Result<String, LvmError> {
        let mut attempt = 0u32;
        loop {
            match self.run_once(op, args).await {
                Err(e) if e.kind == LvmErrorKind::Transient && attempt < MAX_RETRIES => {
                    warn!(op, attempt, error = %e, "transient LVM error, retrying");
                    tokio::time::sleep(RETRY_BASE_DELAY * 2u32.pow(attempt)).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn run_once(&self, op: &str, args: &[String]) -> Result<String, LvmError> {
        debug!(op, ?args, "invoking lvm");

        let mut cmd = Command::new(&self.config.lvm_path);
        cmd.arg(op)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| LvmError::new(LvmErrorKind::Fatal, op, e.to_string()))?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| LvmError::new(LvmErrorKind::Fatal, op, "stdout not captured"))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| LvmError::new(LvmErrorKind::Fatal, op, "stderr not captured"))?;

        let mut out = Vec::new();
        let mut err = Vec::new();

        // Both pipes close when the child exits, so draining them bounds
        // the wait; the reap itself is immediate afterwards.
        let drain = async {
            let _ = tokio::join!(stdout.read_to_end(&mut out), stderr.read_to_end(&mut err));
        };

        if tokio::time::timeout(self.config.command_timeout, drain)
            .await
            .is_err()
        {
            terminate(&mut child).await;
            return Err(LvmError::new(
                LvmErrorKind::Timeout,
                op,
                format!("command timed out after {:?}", self.config.command_timeout),
            ));
        }

        let status = child
            .wait()
            .await
            .map_err(|e| LvmError::new(LvmErrorKind::Fatal, op, e.to_string()))?;

        if status.success() {
            Ok(String::from_utf8_lossy(&out).into_owned())
        } else {
            let stderr_text = String::from_utf8_lossy(&err).trim().to_string();
            Err(LvmError::new(classify_stderr(&stderr_text), op, stderr_text))
        }
    }

    fn report_args(&self, fields: &str) -> Vec<String> {
        let mut args = str_args(&["-o", fields, "--units", "b", "--nosuffix"]);
        match self.config.report_format {
            ReportFormat::Json => args.extend(str_args(&["--reportformat", "json"])),
            ReportFormat::Fields => {
                args.extend(str_args(&["--noheadings", "--separator", "|"]))
            }
        }
        args
    }
}

/// SIGTERM the child, then SIGKILL after a short grace period.
async fn terminate(child: &mut Child) {
    if let Some(pid) = child.id() {
        let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
        if tokio::time::timeout(TERM_GRACE, child.wait()).await.is_ok() {
            return;
        }
    }
    let _ = child.start_kill();
    let _ = child.wait().await;
}

fn str_args(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

/// Argument vector for `lvcreate` from a volume spec.
fn lvcreate_args(spec: &VolumeSpec) -> Vec<String> {
    let mut args = str_args(&["-n", &spec.name, "-W", "y", "-y"]);
    let size = format!("{}b", spec.size_bytes);

    match &spec.thin_pool {
        Some(pool) => {
            args.extend(str_args(&["-T", &format!("{}/{}", spec.vg_name, pool)]));
            args.extend(str_args(&["-V", &size]));
        }
        None => args.extend(str_args(&["-L", &size])),
    }

    if spec.stripe > 0 {
        args.extend(str_args(&["-i", &spec.stripe.to_string()]));
        if !spec.stripe_size.is_empty() {
            args.extend(str_args(&["-I", &spec.stripe_size]));
        }
    }
    for tag in &spec.tags {
        args.extend(str_args(&["--addtag", tag]));
    }
    args.extend(spec.extra_args.iter().cloned());

    if spec.thin_pool.is_none() {
        args.push(spec.vg_name.clone());
    }
    args
}

// =============================================================================
// Lvm Port Implementation
// =============================================================================

#[async_trait]
impl Lvm for CommandExecutor {
    async fn volume_groups(&self) -> Result<Vec<VolumeGroup>> {
        let out = self.run("vgs", &self.report_args(VG_FIELDS)).await?;
        report::parse_vg_report(self.config.report_format, &out)
    }

    async fn volume_group(&self, name: &str) -> Result<VolumeGroup> {
        self.volume_groups()
            .await?
            .into_iter()
            .find(|vg| vg.name == name)
            .ok_or_else(|| Error::NotFound(format!("volume group {name}")))
    }

    async fn logical_volumes(&self, vg: &str) -> Result<Vec<LogicalVolume>> {
        let mut args = self.report_args(LV_FIELDS);
        args.push(vg.to_string());
        let out = self.run("lvs", &args).await?;
        report::parse_lv_report(self.config.report_format, &out)
    }

    async fn thin_pool(&self, vg: &str, pool: &str) -> Result<ThinPool> {
        let lvs = self.logical_volumes(vg).await?;
        let pool_lv = lvs
            .iter()
            .find(|lv| lv.name == pool && lv.attr.starts_with('t'))
            .ok_or_else(|| Error::NotFound(format!("thin pool {vg}/{pool}")))?;
        let virtual_used_bytes = lvs
            .iter()
            .filter(|lv| lv.pool.as_deref() == Some(pool))
            .map(|lv| lv.size_bytes)
            .sum();

        Ok(ThinPool {
            vg_name: vg.to_string(),
            name: pool.to_string(),
            size_bytes: pool_lv.size_bytes,
            virtual_used_bytes,
        })
    }

    async fn create_volume(&self, spec: &VolumeSpec) -> Result<()> {
        self.run("lvcreate", &lvcreate_args(spec)).await?;
        Ok(())
    }

    async fn create_snapshot(
        &self,
        vg: &str,
        name: &str,
        source: &str,
        tags: &[String],
    ) -> Result<()> {
        let mut args = str_args(&["-s", "-n", name]);
        for tag in tags {
            args.extend(str_args(&["--addtag", tag]));
        }
        args.push(format!("{vg}/{source}"));
        self.run("lvcreate", &args).await?;

        // Thin snapshots carry the activation-skip flag; -K activates anyway.
        let activate = str_args(&["-a", "y", "-K", &format!("{vg}/{name}")]);
        self.run("lvchange", &activate).await?;
        Ok(())
    }

    async fn remove_volume(&self, vg: &str, name: &str) -> Result<()> {
        self.run("lvremove", &str_args(&["-y", &format!("{vg}/{name}")]))
            .await?;
        Ok(())
    }

    async fn resize_volume(&self, vg: &str, name: &str, size_bytes: u64) -> Result<()> {
        let args = str_args(&["-L", &format!("{size_bytes}b"), &format!("{vg}/{name}")]);
        self.run("lvresize", &args).await?;
        Ok(())
    }

    async fn rename_volume(&self, vg: &str, from: &str, to: &str) -> Result<()> {
        self.run("lvrename", &str_args(&[vg, from, to])).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_stderr() {
        let cases = [
            ("  Volume group \"myvg\" not found", LvmErrorKind::NotFound),
            ("Failed to find logical volume \"vg/lv\"", LvmErrorKind::NotFound),
            (
                "Logical Volume \"lv\" already exists in volume group \"vg\"",
                LvmErrorKind::AlreadyExists,
            ),
            (
                "Volume group \"vg\" has insufficient free space (10 extents): 20 required.",
                LvmErrorKind::InsufficientSpace,
            ),
            ("Logical volume vg/lv in use.", LvmErrorKind::Busy),
            ("device vg/lv is open", LvmErrorKind::Busy),
            (
                "/dev/mapper/control: temporarily unavailable",
                LvmErrorKind::Transient,
            ),
            ("something unexpected happened", LvmErrorKind::Fatal),
        ];

        for (stderr, kind) in cases {
            assert_eq!(classify_stderr(stderr), kind, "stderr: {stderr}");
        }
    }

    #[test]
    fn test_lvcreate_args_thick() {
        let spec = VolumeSpec {
            vg_name: "myvg1".into(),
            name: "8fe3dc2b".into(),
            size_bytes: 1 << 30,
            tags: vec!["carve".into()],
            ..Default::default()
        };
        let args = lvcreate_args(&spec);
        assert_eq!(
            args,
            vec![
                "-n",
                "8fe3dc2b",
                "-W",
                "y",
                "-y",
                "-L",
                "1073741824b",
                "--addtag",
                "carve",
                "myvg1"
            ]
        );
    }

    #[test]
    fn test_lvcreate_args_thin_striped() {
        let spec = VolumeSpec {
            vg_name: "myvg2".into(),
            name: "v".into(),
            size_bytes: 512 << 20,
            tags: vec![],
            stripe: 2,
            stripe_size: "64k".into(),
            extra_args: vec!["--type=raid1".into()],
            thin_pool: Some("pool0".into()),
        };
        let args = lvcreate_args(&spec);
        assert_eq!(
            args,
            vec![
                "-n",
                "v",
                "-W",
                "y",
                "-y",
                "-T",
                "myvg2/pool0",
                "-V",
                "536870912b",
                "-i",
                "2",
                "-I",
                "64k",
                "--type=raid1"
            ]
        );
        // Thin creations name the pool, not the bare volume group.
        assert!(!args.contains(&"myvg2".to_string()));
    }

    // The executor itself is exercised against /bin/sh: the spawn, capture,
    // classification, and timeout paths do not depend on LVM being present.

    fn sh_executor(timeout: Duration) -> CommandExecutor {
        CommandExecutor::new(ExecutorConfig {
            lvm_path: PathBuf::from("/bin/sh"),
            command_timeout: timeout,
            report_format: ReportFormat::Json,
        })
    }

    #[tokio::test]
    async fn test_run_captures_stdout() {
        let exec = sh_executor(Duration::from_secs(5));
        let out = exec
            .run("-c", &["echo carved".to_string()])
            .await
            .unwrap();
        assert_eq!(out.trim(), "carved");
    }

    #[tokio::test]
    async fn test_run_classifies_failure() {
        let exec = sh_executor(Duration::from_secs(5));
        let err = exec
            .run(
                "-c",
                &["echo 'Volume group \"x\" not found' >&2; exit 5".to_string()],
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, LvmErrorKind::NotFound);
        assert!(err.stderr.contains("not found"));
    }

    #[tokio::test]
    async fn test_rename_volume_invokes_tool() {
        // /bin/echo stands in for the lvm binary; the op and operands become
        // its arguments and it exits 0.
        let exec = CommandExecutor::new(ExecutorConfig {
            lvm_path: PathBuf::from("/bin/echo"),
            ..ExecutorConfig::default()
        });
        exec.rename_volume("myvg1", "old", "new").await.unwrap();
    }

    #[tokio::test]
    async fn test_run_times_out() {
        let exec = sh_executor(Duration::from_millis(100));
        let err = exec
            .run("-c", &["sleep 30".to_string()])
            .await
            .unwrap_err();
        assert_eq!(err.kind, LvmErrorKind::Timeout);
    }
}
