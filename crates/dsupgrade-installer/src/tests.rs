use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use dsupgrade_core::{ErrorKind, PackageFormat, UpgradeError};

use super::*;

static TEST_ROOT_COUNTER: AtomicU64 = AtomicU64::new(0);

fn test_root(label: &str) -> PathBuf {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system time")
        .as_nanos();
    let sequence = TEST_ROOT_COUNTER.fetch_add(1, Ordering::Relaxed);
    let mut path = std::env::temp_dir();
    path.push(format!(
        "dsupgrade-installer-tests-{label}-{}-{}-{}",
        std::process::id(),
        nanos,
        sequence
    ));
    fs::create_dir_all(&path).expect("must create test root");
    path
}

fn write(path: &Path, content: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("must create parent");
    }
    fs::write(path, content).expect("must write file");
}

fn buildinfo(stamp: &str) -> String {
    format!("name = \"OpenDS\"\nversion = \"2.3.0\"\nbuild = \"{stamp}\"\n")
}

fn populate_installation(root: &Path, stamp: &str, flavor: &str) {
    write(&root.join("bin/start-ds"), &format!("#!/bin/sh\n# {flavor}\n"));
    write(&root.join("lib/server.jar"), flavor);
    write(&root.join("README"), flavor);
    write(
        &root.join("config/config.ldif"),
        "dn: cn=config\nobjectClass: top\ncn: config\n",
    );
    write(&root.join("config/buildinfo"), &buildinfo(stamp));
    write(
        &root.join("config/schema/00-core.ldif"),
        "dn: cn=schema\nobjectClass: top\n",
    );
    write(
        &root.join(format!("config/upgrade/config.ldif.{stamp}")),
        "dn: cn=config\nobjectClass: top\ncn: config\n",
    );
    write(
        &root.join(format!("config/upgrade/schema.ldif.{stamp}")),
        "dn: cn=schema\nobjectClass: top\n",
    );
    write(&root.join("config/tools.properties"), &format!("flavor={flavor}\n"));
}

fn live_installation(root: &Path) {
    populate_installation(root, "20230101000000", "old");
    write(&root.join("config/keystore"), "secret");
    write(&root.join("db/userRoot/00000000.jdb"), "data");
    write(&root.join("logs/errors"), "");
    write(&root.join("lib/extensions/custom.jar"), "ext");
}

fn snapshot(root: &Path) -> BTreeMap<String, Vec<u8>> {
    fn walk(root: &Path, dir: &Path, out: &mut BTreeMap<String, Vec<u8>>) {
        for entry in fs::read_dir(dir).expect("must read dir") {
            let path = entry.expect("must read entry").path();
            if path.is_dir() {
                walk(root, &path, out);
            } else {
                let relative = path.strip_prefix(root).expect("must be under root");
                out.insert(
                    relative_key(relative),
                    fs::read(&path).expect("must read file"),
                );
            }
        }
    }
    let mut out = BTreeMap::new();
    walk(root, root, &mut out);
    out
}

struct ExitCodeTool(i32);

impl BackupTool for ExitCodeTool {
    fn backup(&mut self, target_dir: &Path) -> anyhow::Result<i32> {
        fs::create_dir_all(target_dir)?;
        Ok(self.0)
    }
}

#[test]
fn combined_filter_keeps_runtime_and_preserved_files_in_place() {
    let filter = FileFilter::new(RootSide::Combined);
    assert_eq!(filter.decide(Path::new("db")), Decision::Reject);
    assert_eq!(filter.decide(Path::new("logs/errors")), Decision::Reject);
    assert_eq!(filter.decide(Path::new("instance.loc")), Decision::Reject);
    assert_eq!(filter.decide(Path::new("config")), Decision::Descend);
    assert_eq!(
        filter.decide(Path::new("config/tools.properties")),
        Decision::Reject
    );
    assert_eq!(filter.decide(Path::new("config/config.ldif")), Decision::Accept);
    assert_eq!(filter.decide(Path::new("bin")), Decision::Accept);
    assert!(filter.accepts(Path::new("upgrade.bat")));
    assert!(!filter
        .with_launcher_exempt(true)
        .accepts(Path::new("upgrade.bat")));
}

#[test]
fn split_filters_partition_the_tree() {
    let install = FileFilter::new(RootSide::Install);
    assert_eq!(install.decide(Path::new("bin")), Decision::Accept);
    assert_eq!(install.decide(Path::new("config")), Decision::Descend);
    assert_eq!(install.decide(Path::new("config/schema")), Decision::Accept);
    assert_eq!(install.decide(Path::new("config/config.ldif")), Decision::Reject);
    assert_eq!(install.decide(Path::new("classes")), Decision::Reject);

    let instance = FileFilter::new(RootSide::Instance);
    assert_eq!(instance.decide(Path::new("bin")), Decision::Reject);
    assert_eq!(instance.decide(Path::new("config")), Decision::Descend);
    assert_eq!(instance.decide(Path::new("config/schema")), Decision::Reject);
    assert_eq!(instance.decide(Path::new("config/config.ldif")), Decision::Accept);
    assert_eq!(instance.decide(Path::new("classes")), Decision::Accept);
    assert_eq!(instance.decide(Path::new("db")), Decision::Reject);
}

#[test]
fn validate_complete_stage() {
    let root = test_root("stage-valid");
    populate_installation(&root, "20240101000000", "new");

    assert_eq!(check_stage(&root), StageValidity::Valid);
    let stage = validate_stage(&root).expect("stage must validate");
    assert_eq!(stage.candidate().stamp(), 20240101000000);
    assert_eq!(stage.build_info().name, "OpenDS");
    assert_eq!(stage.layout().stage_dir(), root.join("tmp/upgrade"));

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn stage_missing_structure_is_invalid_package() {
    let root = test_root("stage-invalid");
    populate_installation(&root, "20240101000000", "new");
    fs::remove_dir_all(root.join("lib")).expect("must remove lib");

    assert!(matches!(check_stage(&root), StageValidity::Invalid(reason) if reason.contains("lib")));
    let err = validate_stage(&root).expect_err("stage must be invalid");
    assert_eq!(UpgradeError::kind_of(&err), ErrorKind::InvalidPackage);

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn stage_without_own_baselines_is_invalid() {
    let root = test_root("stage-baseline");
    populate_installation(&root, "20240101000000", "new");
    fs::remove_file(root.join("config/upgrade/schema.ldif.20240101000000"))
        .expect("must remove baseline");

    let err = validate_stage(&root).expect_err("stage must be invalid");
    assert_eq!(UpgradeError::kind_of(&err), ErrorKind::InvalidPackage);
    assert!(err.to_string().contains("schema.ldif.20240101000000"));

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn extract_zip_flattens_wrapper_directory_and_reports_ratio() {
    let root = test_root("extract-zip");
    let archive = root.join("OpenDS-2.3.0.zip");
    {
        let file = fs::File::create(&archive).expect("must create archive");
        let mut writer = zip::ZipWriter::new(file);
        let options = zip::write::FileOptions::default();
        writer
            .add_directory("OpenDS-2.3.0/", options)
            .expect("must add dir");
        writer
            .start_file("OpenDS-2.3.0/bin/start-ds", options)
            .expect("must start file");
        writer.write_all(b"#!/bin/sh\n").expect("must write");
        writer
            .start_file("OpenDS-2.3.0/config/buildinfo", options)
            .expect("must start file");
        writer
            .write_all(buildinfo("20240101000000").as_bytes())
            .expect("must write");
        writer.finish().expect("must finish zip");
    }

    let destination = root.join("stage");
    let mut ratios = Vec::new();
    extract_package(
        &archive,
        &destination,
        PackageFormat::Zip,
        None,
        &mut |ratio| ratios.push(ratio),
    )
    .expect("zip must extract");

    assert!(destination.join("bin/start-ds").is_file());
    assert!(destination.join("config/buildinfo").is_file());
    assert!(!destination.join("OpenDS-2.3.0").exists());
    assert_eq!(ratios.last().copied(), Some(1.0));
    assert!(ratios.windows(2).all(|pair| pair[0] <= pair[1]));

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn extract_tar_gz_applies_filter() {
    let root = test_root("extract-tar");
    let archive = root.join("OpenDS-2.3.0.tar.gz");
    {
        let file = fs::File::create(&archive).expect("must create archive");
        let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (path, data) in [
            ("bin/start-ds", b"#!/bin/sh\n".as_slice()),
            ("db/userRoot/stale.jdb", b"stale".as_slice()),
            ("config/config.ldif", b"dn: cn=config\n".as_slice()),
        ] {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, path, data)
                .expect("must append entry");
        }
        builder
            .into_inner()
            .expect("must finish tar")
            .finish()
            .expect("must finish gzip");
    }

    let destination = root.join("stage");
    let filter = FileFilter::new(RootSide::Combined);
    let mut last_ratio = 0.0;
    extract_package(
        &archive,
        &destination,
        PackageFormat::TarGz,
        Some(&filter),
        &mut |ratio| last_ratio = ratio,
    )
    .expect("tar.gz must extract");

    assert!(destination.join("bin/start-ds").is_file());
    assert!(destination.join("config/config.ldif").is_file());
    assert!(!destination.join("db").exists());
    assert_eq!(last_ratio, 1.0);

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn backup_then_restore_after_upgrade_leaves_tree_as_it_was() {
    let root = test_root("restore");
    let live = root.join("live");
    live_installation(&live);
    let layout = InstallationLayout::combined(&live);
    let before = snapshot(&live);

    let backup = BackupSet::create(&layout, "1700000000000").expect("must create backup");
    let moved = backup_filesystem(&layout, &backup).expect("backup must succeed");
    assert!(!moved.is_empty());
    assert!(!live.join("bin").exists());
    assert!(live.join("db/userRoot/00000000.jdb").is_file());
    assert!(live.join("config/tools.properties").is_file());
    assert!(backup.files_dir().join("config/config.ldif").is_file());

    let stage = root.join("stage");
    populate_installation(&stage, "20240101000000", "new");
    move_into(&stage, &live, &FileFilter::new(RootSide::Combined)).expect("stage must move");
    assert_eq!(
        fs::read_to_string(live.join("README")).expect("must read README"),
        "new"
    );
    assert_eq!(
        fs::read_to_string(live.join("config/tools.properties")).expect("must read"),
        "flavor=old\n"
    );
    assert!(stage.join("config/tools.properties").is_file());

    let report = restore(&layout, &backup, true, None);
    assert!(report.is_clean(), "failures: {:?}", report.failures);
    assert!(report.purged > 0);
    assert_eq!(snapshot(&live), before);
    assert!(!backup.files_dir().exists());

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn split_layout_backs_up_each_side_separately() {
    let root = test_root("split");
    let install = root.join("install");
    let instance = root.join("instance");
    write(&install.join("bin/start-ds"), "start");
    write(&install.join("config/schema/00-core.ldif"), "dn: cn=schema\n");
    write(&instance.join("config/config.ldif"), "dn: cn=config\n");
    write(&instance.join("db/userRoot/x.jdb"), "data");
    let layout = InstallationLayout::new(&install, &instance);

    let backup = BackupSet::create(&layout, "1700000000001").expect("must create backup");
    backup_filesystem(&layout, &backup).expect("backup must succeed");

    assert!(backup.files_dir().join("install/bin/start-ds").is_file());
    assert!(backup
        .files_dir()
        .join("install/config/schema/00-core.ldif")
        .is_file());
    assert!(backup
        .files_dir()
        .join("instance/config/config.ldif")
        .is_file());
    assert!(instance.join("db/userRoot/x.jdb").is_file());

    let report = restore(&layout, &backup, false, None);
    assert!(report.is_clean());
    assert!(install.join("bin/start-ds").is_file());
    assert!(instance.join("config/config.ldif").is_file());

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn backup_root_is_never_reused() {
    let root = test_root("backup-reuse");
    let layout = InstallationLayout::combined(&root);
    BackupSet::create(&layout, "42").expect("first create succeeds");
    let err = BackupSet::create(&layout, "42").expect_err("second create fails");
    assert_eq!(UpgradeError::kind_of(&err), ErrorKind::FileSystemAccess);

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn database_backup_failure_carries_exit_code() {
    let root = test_root("db-backup");
    let layout = InstallationLayout::combined(&root);
    let backup = BackupSet::create(&layout, "7").expect("must create backup");

    backup_databases(&backup, &mut ExitCodeTool(0)).expect("zero exit succeeds");
    let err = backup_databases(&backup, &mut ExitCodeTool(3)).expect_err("non-zero exit fails");
    assert_eq!(
        UpgradeError::find_in(&err),
        Some(&UpgradeError::Tool {
            exit_code: 3,
            message: "database backup failed".to_string()
        })
    );

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn carry_over_brings_back_unshipped_config_and_extensions() {
    let root = test_root("carry-over");
    let live = root.join("live");
    live_installation(&live);
    write(&live.join("config/upgrade/old-only.ldif"), "old");
    let layout = InstallationLayout::combined(&live);
    let backup = BackupSet::create(&layout, "9").expect("must create backup");
    backup_filesystem(&layout, &backup).expect("backup must succeed");

    let stage = root.join("stage");
    populate_installation(&stage, "20240101000000", "new");
    move_into(&stage, &live, &FileFilter::new(RootSide::Combined)).expect("stage must move");

    let copied = carry_over_files(&layout, &backup).expect("carry over succeeds");
    assert_eq!(copied, 2);
    assert_eq!(
        fs::read_to_string(live.join("config/keystore")).expect("keystore"),
        "secret"
    );
    assert!(live.join("lib/extensions/custom.jar").is_file());
    assert!(!live.join("config/upgrade/old-only.ldif").exists());
    assert_eq!(
        fs::read_to_string(live.join("config/config.ldif")).expect("config"),
        "dn: cn=config\nobjectClass: top\ncn: config\n"
    );

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn discard_backup_keeps_listed_entries() {
    let root = test_root("discard");
    let layout = InstallationLayout::combined(&root);
    let backup = BackupSet::create(&layout, "11").expect("must create backup");
    write(&backup.files_dir().join("bin/start-ds"), "old");
    write(&backup.files_dir().join("config/buildinfo"), "old-build");

    discard_backup_files(&backup, &[PathBuf::from("config/buildinfo")])
        .expect("discard succeeds");
    assert!(!backup.files_dir().join("bin").exists());
    assert_eq!(
        fs::read_to_string(backup.files_dir().join("config/buildinfo")).expect("kept"),
        "old-build"
    );

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn launcher_is_copied_into_backup_on_success() {
    let root = test_root("launcher");
    write(&root.join(LAUNCHER_FILE_NAME), "@echo off\n");
    let layout = InstallationLayout::combined(&root);
    let backup = BackupSet::create(&layout, "12").expect("must create backup");

    assert!(copy_launcher_into_backup(&layout, &backup).expect("copy succeeds"));
    assert!(backup.files_dir().join(LAUNCHER_FILE_NAME).is_file());
    assert!(root.join(LAUNCHER_FILE_NAME).is_file());

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn history_records_append_and_read_back_in_order() {
    let root = test_root("history");
    let layout = InstallationLayout::combined(&root);
    assert!(read_history(&layout).expect("empty history").is_empty());

    for (id, status) in [("1", HistoryStatus::Success), ("2", HistoryStatus::Cancel)] {
        append_history_record(
            &layout,
            &HistoricalRecord {
                operation_id: id.to_string(),
                from: "20230101000000".to_string(),
                to: "20240101000000".to_string(),
                status,
                note: String::new(),
                timestamp: 1,
            },
        )
        .expect("append succeeds");
    }

    let records = read_history(&layout).expect("history reads");
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].status, HistoryStatus::Success);
    assert_eq!(records[1].operation_id, "2");
    let raw = fs::read_to_string(layout.history_log_path()).expect("raw log");
    assert!(raw.lines().next().expect("first line").contains("\"status\":\"SUCCESS\""));

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn run_marker_is_exclusive_while_owner_lives() {
    let root = test_root("marker");
    let layout = InstallationLayout::combined(&root);

    let marker = claim_run_marker(&layout, "100").expect("first claim succeeds");
    assert_eq!(marker.owner().pid, std::process::id());
    let owner = read_run_marker(&layout).expect("marker reads");
    assert_eq!(owner.map(|owner| owner.operation_id), Some("100".to_string()));

    let err = claim_run_marker(&layout, "101").expect_err("second claim fails");
    assert!(err.to_string().contains("operation 100"));

    marker.release().expect("release succeeds");
    let again = claim_run_marker(&layout, "102").expect("claim after release succeeds");
    again.release().expect("release succeeds");
    assert!(!layout.run_marker_path().exists());

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn unreadable_run_marker_is_refused_and_kept() {
    let root = test_root("unreadable-marker");
    let layout = InstallationLayout::combined(&root);
    write(&layout.run_marker_path(), "");

    let err = claim_run_marker(&layout, "3").expect_err("unreadable marker is not reclaimed");
    assert_eq!(UpgradeError::kind_of(&err), ErrorKind::Application);
    assert!(err.to_string().contains("unreadable"), "{err:#}");
    assert_eq!(
        fs::read_to_string(layout.run_marker_path()).expect("marker still present"),
        ""
    );

    write(&layout.run_marker_path(), "operation_id=4\n");
    assert!(claim_run_marker(&layout, "5").is_err());

    let _ = fs::remove_dir_all(&root);
}

#[cfg(unix)]
#[test]
fn stale_run_marker_is_reclaimed() {
    let root = test_root("stale-marker");
    let layout = InstallationLayout::combined(&root);
    write(&layout.run_marker_path(), "operation_id=1\npid=999999999\n");

    let marker = claim_run_marker(&layout, "2").expect("stale marker is reclaimed");
    assert_eq!(marker.owner().operation_id, "2");
    marker.release().expect("release succeeds");

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn sha256_helpers_match_known_digest() {
    let root = test_root("sha");
    let path = root.join("payload");
    write(&path, "abc");
    let expected = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";
    assert_eq!(sha256_hex(b"abc"), expected);
    verify_sha256_file(&path, &expected.to_uppercase()).expect("digest matches");
    let err = verify_sha256_file(&path, "00").expect_err("digest mismatch");
    assert_eq!(UpgradeError::kind_of(&err), ErrorKind::InvalidPackage);

    let _ = fs::remove_dir_all(&root);
}
