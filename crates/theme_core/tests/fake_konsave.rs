#![cfg(unix)]

use std::{fs, os::unix::fs::PermissionsExt, path::Path, time::Duration};

use konsave_interface::KonsaveInterface;
use shared::domain::ExportScope;
use theme_core::{ExportOptions, ProgressSchedule, RowDispatch, RowState, TaskCoordinator};

const SCRIPT: &str = r#"#!/bin/sh
case "$1" in
  -l)
    printf ' 1\tDark\n 2\tLight\n'
    ;;
  -e)
    touch "$2.knsv"
    if [ "$2" = "Slow" ]; then
      mkdir -p "$2/configs"
      exec sleep 30
    fi
    echo "Exported"
    ;;
  *)
    echo "unknown flag $1" >&2
    exit 2
    ;;
esac
"#;

fn install_script(dir: &Path) -> String {
    let path = dir.join("konsave");
    fs::write(&path, SCRIPT).expect("write script");
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod");
    path.to_string_lossy().into_owned()
}

// Single test per binary: writing an executable while another test thread
// forks can fail with ETXTBSY.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn exports_and_cancels_through_a_real_process() {
    let bin_dir = tempfile::tempdir().expect("bin dir");
    let export_dir = tempfile::tempdir().expect("export dir");
    let konsave = KonsaveInterface::system().with_program(install_script(bin_dir.path()));

    let profiles = konsave.list_profiles().await.expect("list");
    assert_eq!(profiles.len(), 2);
    assert!(konsave.find_profile("light").await.expect("find").is_some());

    let options = ExportOptions::new(export_dir.path())
        .with_scope(ExportScope::Isolated)
        .with_schedule(ProgressSchedule::new(Duration::from_millis(1)));
    let mut coordinator = TaskCoordinator::new(konsave, options);

    assert!(matches!(coordinator.press_export("Dark"), RowDispatch::Started(_)));
    assert!(matches!(coordinator.press_export("Slow"), RowDispatch::Started(_)));

    let mut cancel_sent = false;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(20);
    loop {
        let next = tokio::time::timeout_at(deadline, coordinator.next_event())
            .await
            .expect("exports should settle");
        let Some(event) = next else {
            break;
        };
        coordinator.apply_event(&event);
        if !cancel_sent && coordinator.progress("Slow") >= 3 {
            assert!(matches!(
                coordinator.press_export("Slow"),
                RowDispatch::CancelRequested(_)
            ));
            assert_eq!(coordinator.row_state("Slow"), RowState::Cancelling);
            cancel_sent = true;
        }
    }
    assert!(cancel_sent);
    assert!(coordinator.wait_idle(Duration::from_secs(5)).await);

    let mut names: Vec<String> = fs::read_dir(export_dir.path())
        .expect("read export dir")
        .map(|entry| entry.expect("entry").file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(names, vec!["Dark.knsv".to_string()]);
}
