// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

use chrono::{TimeZone, Utc};
use serde_json::json;
use subvol_cli::output::{detail_line, list_line, space_line, write_fs_report, write_list, FsReport};
use subvol_cli::{Cli, Commands, Parser};
use subvol_config::OutputFormat;
use subvol_core::{RootFlags, SubvolumeInfo, SubvolumePath};
use subvol_ioctl::{DeviceInfo, FeatureFlags, FsInfo, SpaceInfo, SupportedFeatures};
use subvol_logging::CliLogLevel;
use uuid::Uuid;

fn snapshot_info() -> SubvolumeInfo {
    SubvolumeInfo {
        id: 260,
        parent_id: Some(259),
        dir_id: Some(256),
        name: b"data@2024".to_vec(),
        path: Some(SubvolumePath::from_segments([&b"snapshots"[..], &b"data@2024"[..]])),
        generation: 40,
        flags: RootFlags(RootFlags::RDONLY),
        bytes_used: 16384,
        uuid: Some(Uuid::from_u128(0x260)),
        parent_uuid: Some(Uuid::from_u128(0x256)),
        received_uuid: None,
        ctransid: 40,
        otransid: 39,
        stransid: 0,
        rtransid: 0,
        ctime: None,
        otime: Some(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()),
        stime: None,
        rtime: None,
    }
}

#[test]
fn parses_list_with_filters() {
    let cli = Cli::try_parse_from([
        "subvol",
        "list",
        "/mnt",
        "--readonly-only",
        "--subtree",
        "259",
        "--json",
    ])
    .unwrap();
    match &cli.command {
        Commands::List(args) => {
            assert_eq!(args.mount.to_str(), Some("/mnt"));
            assert!(args.readonly_only);
            assert_eq!(args.subtree, Some(259));
        }
        other => panic!("unexpected command {:?}", other),
    }
    assert_eq!(cli.config_flags(), vec![("output", json!("json"))]);
}

#[test]
fn show_requires_exactly_one_target() {
    assert!(Cli::try_parse_from(["subvol", "show", "/mnt"]).is_err());
    assert!(Cli::try_parse_from(["subvol", "show", "/mnt", "--id", "256", "--path", "/mnt/x"]).is_err());
    assert!(Cli::try_parse_from(["subvol", "show", "/mnt", "--uuid", "not-a-uuid"]).is_err());

    let cli = Cli::try_parse_from([
        "subvol",
        "show",
        "/mnt",
        "--received-uuid",
        "00000000-0000-0000-0000-00000000feed",
    ])
    .unwrap();
    match cli.command {
        Commands::Show(args) => {
            assert_eq!(args.target.received_uuid, Some(Uuid::from_u128(0xfeed)));
            assert_eq!(args.target.id, None);
        }
        other => panic!("unexpected command {:?}", other),
    }
}

#[test]
fn global_options_become_config_flags() {
    let cli = Cli::try_parse_from([
        "subvol",
        "fs-info",
        "/mnt",
        "--log-level",
        "debug",
        "--search-buffer-size",
        "4096",
        "--config",
        "/etc/subvol.toml",
    ])
    .unwrap();
    assert_eq!(cli.logging.log_level, Some(CliLogLevel::Debug));
    assert_eq!(cli.config.as_deref().and_then(|p| p.to_str()), Some("/etc/subvol.toml"));
    assert_eq!(
        cli.config_flags(),
        vec![
            ("search-buffer-size", json!(4096)),
            ("log-level", json!("debug")),
        ]
    );
}

#[test]
fn list_line_has_tab_separated_fields() {
    let line = list_line(&snapshot_info());
    assert_eq!(
        line,
        "ID=260\tPARENT=259\tGEN=40\tRO=true\tUUID=00000000-0000-0000-0000-000000000260\tPATH=snapshots/data@2024"
    );

    let mut orphan = snapshot_info();
    orphan.path = None;
    orphan.uuid = None;
    assert!(list_line(&orphan).ends_with("UUID=-\tPATH=-"));
}

#[test]
fn detail_line_includes_lineage_and_times() {
    let line = detail_line(&snapshot_info());
    let fields: Vec<&str> = line.split('\t').collect();
    assert!(fields.contains(&"NAME=data@2024"));
    assert!(fields.contains(&"FLAGS=0x1"));
    assert!(fields.contains(&"PARENT_UUID=00000000-0000-0000-0000-000000000256"));
    assert!(fields.contains(&"RECEIVED_UUID=-"));
    assert!(fields.contains(&"OTIME=2024-03-01T12:00:00+00:00"));
    assert!(fields.contains(&"CTIME=-"));
}

#[test]
fn json_list_is_an_array_of_subvolumes() {
    let mut out = Vec::new();
    write_list(&mut out, &[snapshot_info()], OutputFormat::Json).unwrap();
    let value: serde_json::Value = serde_json::from_slice(&out).unwrap();
    assert_eq!(value[0]["id"], 260);
    assert_eq!(value[0]["name"], "data@2024");
    assert_eq!(value[0]["path"], "snapshots/data@2024");
    assert_eq!(value[0]["received_uuid"], serde_json::Value::Null);
}

#[test]
fn empty_text_list_prints_nothing() {
    let mut out = Vec::new();
    write_list(&mut out, &[], OutputFormat::Text).unwrap();
    assert!(out.is_empty());
}

#[test]
fn fs_report_text_and_json() {
    let report = FsReport {
        path: "/mnt".into(),
        subvolume_id: 5,
        read_only: false,
        subvolume_root: true,
        info: FsInfo {
            max_id: 1,
            num_devices: 1,
            fsid: Uuid::from_u128(1),
            node_size: 16384,
            sector_size: 4096,
            clone_alignment: 4096,
        },
        features: FeatureFlags {
            compat: 0,
            compat_ro: 0b11,
            incompat: (1 << 8) | (1 << 9),
        },
        supported_features: SupportedFeatures::default(),
        devices: vec![DeviceInfo {
            devid: 1,
            uuid: Uuid::from_u128(0xd1),
            bytes_used: 1 << 20,
            total_bytes: 1 << 30,
            path: "/dev/vdb".into(),
        }],
        space: vec![
            SpaceInfo { flags: SpaceInfo::DATA, total_bytes: 8 << 20, used_bytes: 4096 },
            SpaceInfo { flags: SpaceInfo::METADATA | (1 << 5), total_bytes: 256 << 20, used_bytes: 16384 },
        ],
    };

    let mut text = Vec::new();
    write_fs_report(&mut text, &report, OutputFormat::Text).unwrap();
    let text = String::from_utf8(text).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 4);
    assert!(lines[0].starts_with("PATH=/mnt\tFSID=00000000-0000-0000-0000-000000000001\tSUBVOL_ID=5"));
    assert!(lines[0].ends_with(
        "CLONE_ALIGN=4096\tFEATURES=free_space_tree,free_space_tree_valid,skinny_metadata,no_holes"
    ));
    assert_eq!(
        lines[1],
        "DEVID=1\tUUID=00000000-0000-0000-0000-0000000000d1\tSIZE=1073741824\tUSED=1048576\tDEVICE=/dev/vdb"
    );
    assert_eq!(lines[3], "SPACE=Metadata\tPROFILE=DUP\tTOTAL=268435456\tUSED=16384");

    let mut json = Vec::new();
    write_fs_report(&mut json, &report, OutputFormat::Json).unwrap();
    let value: serde_json::Value = serde_json::from_slice(&json).unwrap();
    assert_eq!(value["node_size"], 16384);
    assert_eq!(value["subvolume_root"], true);
    assert_eq!(value["features"]["incompat"], 768);
    assert_eq!(value["devices"][0]["path"], "/dev/vdb");
    assert_eq!(value["space"][1]["used_bytes"], 16384);
    assert_eq!(value["supported_features"]["safe_to_set"]["compat"], 0);
}

#[test]
fn global_reserve_space_line() {
    let reserve = SpaceInfo {
        flags: SpaceInfo::GLOBAL_RSV | SpaceInfo::SYSTEM,
        total_bytes: 3 << 20,
        used_bytes: 0,
    };
    assert_eq!(space_line(&reserve), "SPACE=GlobalReserve\tPROFILE=single\tTOTAL=3145728\tUSED=0");
}
