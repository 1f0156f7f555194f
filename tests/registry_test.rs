//! Integration tests for mounting, scanning and the retry schedule.

mod common;

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use common::{assert_near, options, MountBehavior, PlainSecrets, ScriptedMount};
use tempfile::TempDir;
use vitrine::config::{SmbConfig, SourceConfig};
use vitrine::sources::{NewSource, RetryPolicy, ScanOutcome, ScanScheduler, SourceRegistry};
use vitrine_common::{MountStatus, SourceKind};

fn smb_source(name: &str) -> SourceConfig {
    SourceConfig {
        name: name.to_string(),
        kind: SourceKind::Smb,
        path: None,
        smb: Some(SmbConfig {
            server: "nas.local".into(),
            share: "photos".into(),
            version: "3.0".into(),
            ..Default::default()
        }),
        auto_scan: true,
        scan_interval_secs: None,
    }
}

fn registry(dir: &TempDir, configs: Vec<SourceConfig>, mount: Arc<ScriptedMount>) -> Arc<SourceRegistry> {
    Arc::new(
        SourceRegistry::new(
            configs,
            mount,
            Arc::new(PlainSecrets),
            options(&dir.path().join("mounts")),
        )
        .unwrap(),
    )
}

// ---------------------------------------------------------------------------
// Mounting
// ---------------------------------------------------------------------------

#[tokio::test]
async fn mount_receives_decrypted_credentials() {
    let dir = TempDir::new().unwrap();
    let share = dir.path().join("share");
    common::write_media(&share.join("2024"), &["a.jpg", "b.mp4", "thumbs.db"]);

    let mount = ScriptedMount::new(MountBehavior::Succeed);
    let registry = registry(&dir, Vec::new(), mount.clone());

    let added = registry
        .add(NewSource {
            name: "NAS".into(),
            path: Some(share.clone()),
            location: Some("smb://nas.local/photos/2024".into()),
            username: Some("frame".into()),
            password: Some("hunter2".into()),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(added.kind, SourceKind::Smb);
    assert_eq!(added.mount_status, MountStatus::Unmounted);

    // only ciphertext is kept
    let stored = registry.to_configs().remove(0).smb.unwrap();
    assert_eq!(stored.encrypted_password.as_deref(), Some("plain:hunter2"));

    let outcome = registry.scan("NAS").await.unwrap();
    assert_eq!(outcome, ScanOutcome::Updated { files: 2 });

    let attempts = mount.attempts();
    assert_eq!(attempts.len(), 1);
    let request = &attempts[0].1;
    assert_eq!(request.unc, "//nas.local/photos");
    assert_eq!(request.target, share);
    assert!(request.options.contains("username=frame"));
    assert!(request.options.contains("password=hunter2"));
    assert!(request.options.contains("vers=3.1.1"));
    assert!(!format!("{:?}", request).contains("hunter2"));

    let source = registry.get("NAS").unwrap();
    assert_eq!(source.mount_status, MountStatus::Mounted);
    assert_eq!(
        source.files.keys().collect::<Vec<_>>(),
        ["a.jpg", "b.mp4"]
    );

    registry.unmount_all().await;
    assert_eq!(mount.unmounts(), ["NAS"]);
}

#[tokio::test]
async fn hung_mount_times_out_as_error() {
    tokio::time::pause();
    let dir = TempDir::new().unwrap();
    let mount = ScriptedMount::new(MountBehavior::Hang);
    let registry = registry(&dir, vec![smb_source("nas")], mount);

    let outcome = registry.scan("nas").await.unwrap();
    assert_matches!(outcome, ScanOutcome::Failed { ref error } if error.contains("timed out"));

    let source = registry.get("nas").unwrap();
    assert_eq!(source.mount_status, MountStatus::Error);
    assert_eq!(source.consecutive_failures, 1);
    assert!(source.files.is_empty());
}

#[tokio::test]
async fn relocating_a_share_unmounts_and_resets() {
    let dir = TempDir::new().unwrap();
    let share = dir.path().join("share");
    common::write_media(&share, &["a.jpg"]);

    let mount = ScriptedMount::new(MountBehavior::Succeed);
    let mut config = smb_source("nas");
    config.path = Some(share.clone());
    let registry = registry(&dir, vec![config], mount.clone());

    registry.scan("nas").await.unwrap();
    assert_eq!(registry.get("nas").unwrap().file_count(), 1);

    let updated = registry
        .update(
            "nas",
            vitrine::sources::SourceUpdate {
                share: Some("archive".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.source.mount_status, MountStatus::Unmounted);
    assert_eq!(updated.source.file_count(), 0);
    assert_eq!(mount.unmounts(), ["nas"]);
}

// ---------------------------------------------------------------------------
// Scheduling
// ---------------------------------------------------------------------------

#[tokio::test]
async fn failed_mounts_back_off_exponentially() {
    tokio::time::pause();
    let dir = TempDir::new().unwrap();
    let mount = ScriptedMount::new(MountBehavior::FailAlways);
    let registry = registry(&dir, vec![smb_source("nas")], mount.clone());

    let scheduler = ScanScheduler::new(
        registry.clone(),
        RetryPolicy {
            base: Duration::from_secs(1),
            max: Duration::from_secs(300),
        },
    );
    scheduler.sync();
    assert_eq!(scheduler.active(), ["nas"]);

    tokio::time::sleep(Duration::from_secs_f64(7.5)).await;

    let times = mount.attempt_times();
    assert_eq!(times.len(), 4);
    let gaps: Vec<Duration> = times.windows(2).map(|w| w[1] - w[0]).collect();
    assert_near(gaps[0], Duration::from_secs(1));
    assert_near(gaps[1], Duration::from_secs(2));
    assert_near(gaps[2], Duration::from_secs(4));

    let source = registry.get("nas").unwrap();
    assert_eq!(source.mount_status, MountStatus::Error);
    assert_eq!(source.consecutive_failures, 4);
    assert!(source.last_error.unwrap().contains("Permission denied"));

    scheduler.shutdown().await;
    assert!(scheduler.active().is_empty());
}

#[tokio::test]
async fn share_recovers_after_failures() {
    let dir = TempDir::new().unwrap();
    let share = dir.path().join("share");
    common::write_media(&share, &["a.jpg", "b.jpg"]);

    let mount = ScriptedMount::new(MountBehavior::FailTimes(2));
    let mut config = smb_source("nas");
    config.path = Some(share);
    let registry = registry(&dir, vec![config], mount.clone());

    let scheduler = ScanScheduler::new(
        registry.clone(),
        RetryPolicy {
            base: Duration::from_millis(20),
            max: Duration::from_secs(1),
        },
    );
    scheduler.sync();

    tokio::time::timeout(Duration::from_secs(5), async {
        while registry.get("nas").unwrap().mount_status != MountStatus::Mounted {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("share never came back");

    let source = registry.get("nas").unwrap();
    assert_eq!(source.file_count(), 2);
    assert_eq!(source.consecutive_failures, 0);
    assert_eq!(source.last_error, None);
    assert_eq!(mount.attempts().len(), 3);

    scheduler.shutdown().await;
}

#[tokio::test]
async fn disabling_auto_scan_stops_the_loop() {
    let dir = TempDir::new().unwrap();
    let media = dir.path().join("media");
    common::write_media(&media, &["a.jpg"]);

    let mount = ScriptedMount::new(MountBehavior::Succeed);
    let registry = registry(
        &dir,
        vec![common::local_source("local", &media)],
        mount,
    );
    let scheduler = ScanScheduler::new(registry.clone(), RetryPolicy::default());

    scheduler.initial_scan().await;
    assert_eq!(registry.get("local").unwrap().file_count(), 1);

    scheduler.sync();
    assert_eq!(scheduler.active(), ["local"]);

    registry.set_auto_scan("local", false).unwrap();
    scheduler.sync();
    assert!(scheduler.active().is_empty());
    // the catalog survives
    assert_eq!(registry.get("local").unwrap().file_count(), 1);

    scheduler.shutdown().await;
}
