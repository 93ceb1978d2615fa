//! Check scenarios: stage, refuse, and stay idempotent.

use super::harness::{package_zip, sha256_hex, MemorySource, TestInstall};
use portable_updater::event::{create_event_channel, UpdateEvent};
use portable_updater::upgrade::{CheckOutcome, MarkerRead, StagingStore, UpdateChecker};
use portable_updater::Error;
use std::sync::Arc;

fn checker(
    install: &TestInstall,
    current: &str,
    source: &Arc<MemorySource>,
) -> UpdateChecker<Arc<MemorySource>> {
    UpdateChecker::new(
        install.context(current),
        TestInstall::config(),
        Arc::clone(source),
    )
}

/// Test 1: A newer verified release is downloaded, extracted and marked
#[tokio::test]
async fn test_check_stages_newer_release() {
    let install = TestInstall::new();
    let package = package_zip(&[("app.bin", "v2"), ("lib/core.so", "core")]);
    let source = Arc::new(MemorySource::new());
    source.publish("9.9.9.9", package.clone(), Some(sha256_hex(&package)));

    let outcome = checker(&install, "0.3.0.0", &source).check().await.unwrap();

    let CheckOutcome::Staged(update) = outcome else {
        panic!("expected a staged update, got {outcome:?}");
    };
    assert_eq!(update.version, "9.9.9.9");
    assert!(update.verified);
    assert!(!update.already_staged);
    assert_eq!(update.changelog.as_deref(), Some("Release 9.9.9.9"));

    let store = install.store();
    let dir = store.staging_dir_for("9.9.9.9");
    assert_eq!(update.staging_dir, dir);
    assert!(dir.join("app.bin").is_file());
    assert!(dir.join("lib").join("core.so").is_file());

    let MarkerRead::Present(record) = StagingStore::read_marker(&dir) else {
        panic!("marker should be readable");
    };
    assert_eq!(record.version, "9.9.9.9");
    assert_eq!(record.release_tag, "v9.9.9.9");
    assert!(record.verified);
    assert_eq!(record.sha256.as_deref(), Some(sha256_hex(&package).as_str()));

    assert!(store.cache_zip_path_for("9.9.9.9").is_file());
    assert_eq!(install.read("app.bin"), "v1");
}

/// Test 2: A checksum mismatch aborts before anything is staged
#[tokio::test]
async fn test_checksum_mismatch_stages_nothing() {
    let install = TestInstall::new();
    let package = package_zip(&[("app.bin", "v2")]);
    let source = Arc::new(MemorySource::new());
    source.publish("9.9.9.9", package, Some("0".repeat(64)));

    let result = checker(&install, "0.3.0.0", &source).check().await;

    assert!(matches!(result, Err(Error::ChecksumMismatch { .. })));
    let store = install.store();
    assert!(!store.staging_dir_for("9.9.9.9").exists());
    assert!(store.staged_versions().unwrap().is_empty());
    assert!(!store.cache_zip_path_for("9.9.9.9").exists());
}

/// Test 3: Without a published checksum the package is staged as unverified
#[tokio::test]
async fn test_missing_checksum_stages_unverified() {
    let install = TestInstall::new();
    let source = Arc::new(MemorySource::new());
    source.publish("1.0.0", package_zip(&[("app.bin", "v2")]), None);

    let outcome = checker(&install, "0.3.0.0", &source).check().await.unwrap();

    let CheckOutcome::Staged(update) = outcome else {
        panic!("expected a staged update");
    };
    assert!(!update.verified);
    let record = StagingStore::read_marker(&update.staging_dir).record().unwrap();
    assert!(!record.verified);
}

/// Test 4: Up-to-date checks never write to staging, no matter how often they run
#[tokio::test]
async fn test_up_to_date_check_is_idempotent() {
    let install = TestInstall::new();
    let source = Arc::new(MemorySource::new());
    let package = package_zip(&[("app.bin", "v1")]);
    source.publish("0.3.0.0", package.clone(), Some(sha256_hex(&package)));

    for _ in 0..2 {
        let outcome = checker(&install, "0.3.0.0", &source).check().await.unwrap();
        assert_eq!(
            outcome,
            CheckOutcome::UpToDate {
                current: "0.3.0.0".to_string(),
                latest: "0.3.0.0".to_string(),
            }
        );
    }

    assert!(install.staging_snapshot().is_empty());
    assert_eq!(source.downloads(), 0);
}

/// Test 5: A second check for an already staged version is a no-op
#[tokio::test]
async fn test_already_staged_is_not_restaged() {
    let install = TestInstall::new();
    let package = package_zip(&[("app.bin", "v2")]);
    let source = Arc::new(MemorySource::new());
    source.publish("2.0.0", package.clone(), Some(sha256_hex(&package)));

    checker(&install, "1.0.0", &source).check().await.unwrap();
    let before = install.staging_snapshot();

    let outcome = checker(&install, "1.0.0", &source).check().await.unwrap();

    let CheckOutcome::Staged(update) = outcome else {
        panic!("expected the staged update to be reported");
    };
    assert!(update.already_staged);
    assert!(update.verified);
    assert_eq!(source.downloads(), 1);
    assert_eq!(install.staging_snapshot(), before);
}

/// Test 6: A platform missing from the manifest is reported with what is available
#[tokio::test]
async fn test_no_asset_for_platform() {
    let install = TestInstall::new();
    let source = Arc::new(MemorySource::new());
    source.set_manifest(&serde_json::json!({
        "version": "2.0.0",
        "release_tag": "v2.0.0",
        "assets": { "windows": { "url": "memory://win.zip" } },
    }));

    let result = checker(&install, "1.0.0", &source).check().await;

    match result {
        Err(Error::NoAssetForPlatform { platform, available }) => {
            assert_eq!(platform, "linux");
            assert!(available.contains("windows"));
        }
        other => panic!("expected NoAssetForPlatform, got {other:?}"),
    }
    assert!(!install.store().root().join("staging").exists());
}

/// Test 7: Unreachable and malformed manifests map to their own error kinds
#[tokio::test]
async fn test_manifest_failures() {
    let install = TestInstall::new();
    let source = Arc::new(MemorySource::new());

    let unreachable = checker(&install, "1.0.0", &source).check().await;
    assert!(matches!(unreachable, Err(Error::ManifestUnreachable(_))));

    source.set_manifest_raw("{\"version\": \"2.0.0\"");
    let malformed = checker(&install, "1.0.0", &source).check().await;
    let err = malformed.unwrap_err();
    assert!(matches!(err, Error::MalformedManifest(_)));
    assert_eq!(err.exit_code(), 10);
}

/// Test 8: A package without any file is rejected and leaves no staging directory
#[tokio::test]
async fn test_empty_package_rejected() {
    let install = TestInstall::new();
    let mut zip = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    zip.add_directory("AppV2/", zip::write::SimpleFileOptions::default())
        .unwrap();
    let package = zip.finish().unwrap().into_inner();
    let source = Arc::new(MemorySource::new());
    source.publish("2.0.0", package.clone(), Some(sha256_hex(&package)));

    let result = checker(&install, "1.0.0", &source).check().await;

    assert!(matches!(result, Err(Error::EmptyPackage(_))));
    assert!(install.store().staged_versions().unwrap().is_empty());
}

/// Test 9: Hostile entries are skipped and reported, the rest is staged
#[tokio::test]
async fn test_traversal_entry_skipped_during_check() {
    let install = TestInstall::new();
    let package = package_zip(&[("app.bin", "v2"), ("../../evil.txt", "pwned")]);
    let source = Arc::new(MemorySource::new());
    source.publish("2.0.0", package.clone(), Some(sha256_hex(&package)));
    let (tx, mut rx) = create_event_channel();

    let outcome = checker(&install, "1.0.0", &source)
        .with_events(tx)
        .check()
        .await
        .unwrap();

    let CheckOutcome::Staged(update) = outcome else {
        panic!("expected a staged update");
    };
    assert_eq!(update.skipped_entries, 1);
    let escaped = walkdir::WalkDir::new(install.root().parent().unwrap())
        .into_iter()
        .filter_map(std::result::Result::ok)
        .any(|e| e.file_name() == "evil.txt");
    assert!(!escaped);

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    assert!(matches!(events.first(), Some(UpdateEvent::CheckStarted { .. })));
    assert!(events
        .iter()
        .any(|e| matches!(e, UpdateEvent::EntrySkipped { .. })));
    assert!(events.contains(&UpdateEvent::Verified { verified: true }));
    assert_eq!(
        events.last(),
        Some(&UpdateEvent::Staged {
            version: "2.0.0".to_string()
        })
    );
}

/// Test 10: A corrupted cached package is discarded and downloaded again
#[tokio::test]
async fn test_stale_cache_replaced() {
    let install = TestInstall::new();
    let package = package_zip(&[("app.bin", "v2")]);
    let source = Arc::new(MemorySource::new());
    source.publish("2.0.0", package.clone(), Some(sha256_hex(&package)));

    let store = install.store();
    store.ensure_layout().unwrap();
    std::fs::write(store.cache_zip_path_for("2.0.0"), "truncated").unwrap();

    checker(&install, "1.0.0", &source).check().await.unwrap();

    assert_eq!(source.downloads(), 1);
    assert_eq!(
        std::fs::read(store.cache_zip_path_for("2.0.0")).unwrap(),
        package
    );
}
