// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Rendering of command results as `KEY=value` lines or pretty JSON.

use std::fmt::Display;
use std::io::Write;
use std::path::PathBuf;

use anyhow::Result;
use serde::Serialize;
use subvol_config::OutputFormat;
use subvol_core::SubvolumeInfo;
use subvol_ioctl::{DeviceInfo, FeatureFlags, FsInfo, SpaceInfo, SupportedFeatures};

/// What `fs-info` reports about an opened mount
#[derive(Clone, Debug, Serialize)]
pub struct FsReport {
    pub path: PathBuf,
    /// Subvolume the mount directory belongs to
    pub subvolume_id: u64,
    pub read_only: bool,
    /// Whether the mount directory is itself a subvolume root
    pub subvolume_root: bool,
    #[serde(flatten)]
    pub info: FsInfo,
    pub features: FeatureFlags,
    pub supported_features: SupportedFeatures,
    pub devices: Vec<DeviceInfo>,
    pub space: Vec<SpaceInfo>,
}

fn or_dash<T: Display>(value: Option<T>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}

/// One line per subvolume in `list`
pub fn list_line(info: &SubvolumeInfo) -> String {
    format!(
        "ID={}\tPARENT={}\tGEN={}\tRO={}\tUUID={}\tPATH={}",
        info.id,
        or_dash(info.parent_id),
        info.generation,
        info.is_read_only(),
        or_dash(info.uuid),
        or_dash(info.path.as_ref()),
    )
}

/// Everything known about a subvolume, for `show`
pub fn detail_line(info: &SubvolumeInfo) -> String {
    let fields = [
        ("ID", info.id.to_string()),
        ("PARENT", or_dash(info.parent_id)),
        ("DIR", or_dash(info.dir_id)),
        ("NAME", info.name_lossy()),
        ("PATH", or_dash(info.path.as_ref())),
        ("GEN", info.generation.to_string()),
        ("FLAGS", format!("{:#x}", info.flags.0)),
        ("RO", info.is_read_only().to_string()),
        ("BYTES_USED", info.bytes_used.to_string()),
        ("UUID", or_dash(info.uuid)),
        ("PARENT_UUID", or_dash(info.parent_uuid)),
        ("RECEIVED_UUID", or_dash(info.received_uuid)),
        ("CTRANSID", info.ctransid.to_string()),
        ("OTRANSID", info.otransid.to_string()),
        ("STRANSID", info.stransid.to_string()),
        ("RTRANSID", info.rtransid.to_string()),
        ("CTIME", or_dash(info.ctime.map(|t| t.to_rfc3339()))),
        ("OTIME", or_dash(info.otime.map(|t| t.to_rfc3339()))),
        ("STIME", or_dash(info.stime.map(|t| t.to_rfc3339()))),
        ("RTIME", or_dash(info.rtime.map(|t| t.to_rfc3339()))),
    ];
    fields
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join("\t")
}

pub fn fs_report_line(report: &FsReport) -> String {
    let features = report.features.names();
    format!(
        "PATH={}\tFSID={}\tSUBVOL_ID={}\tRO={}\tSUBVOL_ROOT={}\tDEVICES={}\tMAX_DEVID={}\tNODESIZE={}\tSECTORSIZE={}\tCLONE_ALIGN={}\tFEATURES={}",
        report.path.display(),
        report.info.fsid,
        report.subvolume_id,
        report.read_only,
        report.subvolume_root,
        report.info.num_devices,
        report.info.max_id,
        report.info.node_size,
        report.info.sector_size,
        report.info.clone_alignment,
        if features.is_empty() { "-".to_string() } else { features.join(",") },
    )
}

/// One line per member device, after the `fs-info` summary
pub fn device_line(device: &DeviceInfo) -> String {
    format!(
        "DEVID={}\tUUID={}\tSIZE={}\tUSED={}\tDEVICE={}",
        device.devid,
        device.uuid,
        device.total_bytes,
        device.bytes_used,
        if device.path.is_empty() { "-" } else { device.path.as_str() },
    )
}

/// One line per block group kind and profile, after the devices
pub fn space_line(space: &SpaceInfo) -> String {
    format!(
        "SPACE={}\tPROFILE={}\tTOTAL={}\tUSED={}",
        space.kind(),
        space.profile(),
        space.total_bytes,
        space.used_bytes,
    )
}

pub fn write_list<W: Write>(out: &mut W, listed: &[SubvolumeInfo], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => write_json(out, &listed),
        OutputFormat::Text => {
            for info in listed {
                writeln!(out, "{}", list_line(info))?;
            }
            Ok(())
        }
    }
}

pub fn write_detail<W: Write>(out: &mut W, info: &SubvolumeInfo, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => write_json(out, info),
        OutputFormat::Text => Ok(writeln!(out, "{}", detail_line(info))?),
    }
}

pub fn write_fs_report<W: Write>(out: &mut W, report: &FsReport, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => write_json(out, report),
        OutputFormat::Text => {
            writeln!(out, "{}", fs_report_line(report))?;
            for device in &report.devices {
                writeln!(out, "{}", device_line(device))?;
            }
            for space in &report.space {
                writeln!(out, "{}", space_line(space))?;
            }
            Ok(())
        }
    }
}

fn write_json<W: Write, T: Serialize + ?Sized>(out: &mut W, value: &T) -> Result<()> {
    serde_json::to_writer_pretty(&mut *out, value)?;
    writeln!(out)?;
    Ok(())
}
