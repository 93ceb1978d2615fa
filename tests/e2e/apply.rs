//! Apply scenarios, including the full check-then-apply cycle.

use super::harness::{package_zip, sha256_hex, MemorySource, TestInstall};
use portable_updater::event::{create_event_channel, UpdateEvent};
use portable_updater::upgrade::{CheckOutcome, UpdateApplier, UpdateChecker};
use portable_updater::{resolve_current_version, Error};
use std::fs::{self, File};
use std::io::Read;
use std::sync::Arc;
use zip::ZipArchive;

fn read_backup_entry(archive: &std::path::Path, name: &str) -> Option<String> {
    let mut zip = ZipArchive::new(File::open(archive).unwrap()).unwrap();
    let mut entry = zip.by_name(name).ok()?;
    let mut content = String::new();
    entry.read_to_string(&mut content).unwrap();
    Some(content)
}

fn stage_files(install: &TestInstall, version: &str, files: &[(&str, &str)]) {
    let dir = install.store().staging_dir_for(version);
    for (name, content) in files {
        let path = dir.join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }
}

/// Test 1: Staged tree replaces the app, user data survives, backup holds v1
#[test]
fn test_apply_replaces_app_and_keeps_data() {
    let install = TestInstall::new();
    stage_files(&install, "2.0.0", &[("app.bin", "v2")]);

    let report = UpdateApplier::new(install.context("1.0.0"), &TestInstall::config())
        .apply()
        .unwrap();

    assert_eq!(report.version, "2.0.0");
    assert_eq!(install.read("app.bin"), "v2");
    assert_eq!(install.read("data/settings.json"), "keep-me");

    let backups = install.store().backups().unwrap();
    assert_eq!(backups, vec![report.backup.clone()]);
    assert!(backups[0].starts_with(install.root().join("updates").join("backup")));
    assert_eq!(
        read_backup_entry(&report.backup, "PortableApp/app.bin").as_deref(),
        Some("v1")
    );
    assert_eq!(
        read_backup_entry(&report.backup, "PortableApp/data/settings.json").as_deref(),
        Some("keep-me")
    );
}

/// Test 2: Nothing staged is a distinct outcome with its own exit code
#[test]
fn test_apply_without_staged_update() {
    let install = TestInstall::new();

    let err = UpdateApplier::new(install.context("1.0.0"), &TestInstall::config())
        .apply()
        .unwrap_err();

    assert!(matches!(err, Error::NoStagedUpdate));
    assert_eq!(err.exit_code(), 20);
    assert_eq!(install.read("app.bin"), "v1");
}

/// Test 3: Backup failure aborts before any file is removed
#[test]
fn test_backup_failure_leaves_install_untouched() {
    let install = TestInstall::new();
    stage_files(&install, "2.0.0", &[("app.bin", "v2")]);
    // A plain file where the backup directory belongs cannot be written
    // through, whatever the caller's privileges.
    let backup_dir = install.store().backup_dir();
    fs::write(&backup_dir, "not a directory").unwrap();

    let result = UpdateApplier::new(install.context("1.0.0"), &TestInstall::config()).apply();

    let err = result.unwrap_err();
    assert!(matches!(err, Error::BackupFailed(_)));
    assert_eq!(err.exit_code(), 22);
    assert_eq!(install.read("app.bin"), "v1");
    assert_eq!(install.read("data/settings.json"), "keep-me");
    assert!(install.store().staging_dir_for("2.0.0").is_dir());
    assert!(backup_dir.is_file());
}

/// Test 4: Full cycle: check stages 2.0.0, apply installs it, a second
/// check reports up to date
#[tokio::test]
async fn test_check_then_apply_cycle() {
    let install = TestInstall::new();
    let package = package_zip(&[
        ("PortableApp-2.0.0/app.bin", "v2"),
        ("PortableApp-2.0.0/version.json", "{\"version\": \"2.0.0\"}"),
        ("PortableApp-2.0.0/data/settings.json", "factory"),
    ]);
    let source = Arc::new(MemorySource::new());
    source.publish("2.0.0", package.clone(), Some(sha256_hex(&package)));

    let ctx = install.context(&resolve_current_version(None, install.root()));
    assert_eq!(ctx.current_version(), "0.0.0");

    let outcome = UpdateChecker::new(ctx.clone(), TestInstall::config(), Arc::clone(&source))
        .check()
        .await
        .unwrap();
    assert!(matches!(outcome, CheckOutcome::Staged(_)));

    let (tx, mut rx) = create_event_channel();
    let report = UpdateApplier::new(ctx, &TestInstall::config())
        .with_events(tx)
        .apply()
        .unwrap();

    assert_eq!(report.version, "2.0.0");
    assert!(report.provenance.as_ref().is_some_and(|r| r.verified));
    assert_eq!(install.read("app.bin"), "v2");
    assert_eq!(install.read("data/settings.json"), "keep-me");
    assert!(install.store().staged_versions().unwrap().is_empty());
    assert!(install.store().cache_zip_path_for("2.0.0").is_file());

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    assert_eq!(
        events.first(),
        Some(&UpdateEvent::ApplyStarted {
            version: "2.0.0".to_string()
        })
    );
    assert!(events
        .iter()
        .any(|e| matches!(e, UpdateEvent::BackupCreated { .. })));
    assert_eq!(
        events.last(),
        Some(&UpdateEvent::Applied {
            version: "2.0.0".to_string()
        })
    );

    let installed = resolve_current_version(None, install.root());
    assert_eq!(installed, "2.0.0");
    let outcome = UpdateChecker::new(install.context(&installed), TestInstall::config(), source)
        .check()
        .await
        .unwrap();
    assert!(matches!(outcome, CheckOutcome::UpToDate { .. }));
}

/// Test 5: Semantic ordering picks 0.10.0 over 0.9.0
#[test]
fn test_apply_picks_semantic_latest() {
    let install = TestInstall::new();
    stage_files(&install, "0.9.0", &[("app.bin", "v0.9")]);
    stage_files(&install, "0.10.0", &[("app.bin", "v0.10")]);

    let report = UpdateApplier::new(install.context("0.8.0"), &TestInstall::config())
        .apply()
        .unwrap();

    assert_eq!(report.version, "0.10.0");
    assert_eq!(install.read("app.bin"), "v0.10");
}
