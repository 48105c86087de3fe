//! LVM report parsing
//!
//! The tool is always invoked with `--units b --nosuffix` so size fields
//! are raw byte counts. Two report grammars are supported: JSON
//! (`--reportformat json`) and the pipe-separated field format
//! (`--noheadings --separator |`) for hosts whose LVM predates JSON
//! reports.

use crate::domain::{LogicalVolume, VolumeGroup};
use crate::error::{Error, Result};
use serde::Deserialize;

/// Which output grammar the tool is asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReportFormat {
    #[default]
    Json,
    Fields,
}

/// `-o` field list for `lvs` invocations. Parsers depend on this order.
pub const LV_FIELDS: &str = "lv_name,vg_name,lv_path,lv_size,lv_tags,lv_attr,origin,pool_lv";

/// `-o` field list for `vgs` invocations.
pub const VG_FIELDS: &str = "vg_name,vg_size,vg_free";

// =============================================================================
// JSON Report Shapes
// =============================================================================

// All values in LVM JSON reports are strings, sizes included.

#[derive(Debug, Deserialize)]
struct JsonReport {
    #[serde(default)]
    report: Vec<JsonReportEntry>,
}

#[derive(Debug, Deserialize)]
struct JsonReportEntry {
    #[serde(default)]
    lv: Vec<JsonLvRecord>,
    #[serde(default)]
    vg: Vec<JsonVgRecord>,
}

#[derive(Debug, Deserialize)]
struct JsonLvRecord {
    lv_name: String,
    vg_name: String,
    lv_path: String,
    lv_size: String,
    #[serde(default)]
    lv_tags: String,
    lv_attr: String,
    #[serde(default)]
    origin: String,
    #[serde(default)]
    pool_lv: String,
}

#[derive(Debug, Deserialize)]
struct JsonVgRecord {
    vg_name: String,
    vg_size: String,
    vg_free: String,
}

// =============================================================================
// Parsers
// =============================================================================

/// Parse `lvs` output in the given grammar.
pub fn parse_lv_report(format: ReportFormat, stdout: &str) -> Result<Vec<LogicalVolume>> {
    match format {
        ReportFormat::Json => {
            let report: JsonReport = serde_json::from_str(stdout)
                .map_err(|e| Error::Internal(format!("malformed lvs JSON report: {e}")))?;
            report
                .report
                .into_iter()
                .flat_map(|entry| entry.lv)
                .map(|rec| {
                    Ok(LogicalVolume {
                        name: rec.lv_name,
                        vg_name: rec.vg_name,
                        path: rec.lv_path,
                        size_bytes: parse_bytes(&rec.lv_size)?,
                        tags: parse_tags(&rec.lv_tags),
                        attr: rec.lv_attr,
                        origin: non_empty(rec.origin),
                        pool: non_empty(rec.pool_lv),
                    })
                })
                .collect()
        }
        ReportFormat::Fields => stdout
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                let fields = split_fields(line, 8)?;
                Ok(LogicalVolume {
                    name: fields[0].clone(),
                    vg_name: fields[1].clone(),
                    path: fields[2].clone(),
                    size_bytes: parse_bytes(&fields[3])?,
                    tags: parse_tags(&fields[4]),
                    attr: fields[5].clone(),
                    origin: non_empty(fields[6].clone()),
                    pool: non_empty(fields[7].clone()),
                })
            })
            .collect(),
    }
}

/// Parse `vgs` output in the given grammar.
pub fn parse_vg_report(format: ReportFormat, stdout: &str) -> Result<Vec<VolumeGroup>> {
    match format {
        ReportFormat::Json => {
            let report: JsonReport = serde_json::from_str(stdout)
                .map_err(|e| Error::Internal(format!("malformed vgs JSON report: {e}")))?;
            report
                .report
                .into_iter()
                .flat_map(|entry| entry.vg)
                .map(|rec| {
                    Ok(VolumeGroup {
                        name: rec.vg_name,
                        size_bytes: parse_bytes(&rec.vg_size)?,
                        free_bytes: parse_bytes(&rec.vg_free)?,
                    })
                })
                .collect()
        }
        ReportFormat::Fields => stdout
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                let fields = split_fields(line, 3)?;
                Ok(VolumeGroup {
                    name: fields[0].clone(),
                    size_bytes: parse_bytes(&fields[1])?,
                    free_bytes: parse_bytes(&fields[2])?,
                })
            })
            .collect(),
    }
}

fn split_fields(line: &str, expect: usize) -> Result<Vec<String>> {
    let fields: Vec<String> = line.split('|').map(|f| f.trim().to_string()).collect();
    if fields.len() != expect {
        return Err(Error::Internal(format!(
            "malformed report line (want {expect} fields, got {}): {line:?}",
            fields.len()
        )));
    }
    Ok(fields)
}

fn parse_bytes(field: &str) -> Result<u64> {
    field
        .trim()
        .parse::<u64>()
        .map_err(|_| Error::Internal(format!("malformed size field in report: {field:?}")))
}

fn parse_tags(field: &str) -> Vec<String> {
    field
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(String::from)
        .collect()
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}
