//! A bare controller name must run the same file that was hashed.
//!
//! Changes the working directory and `PATH`, so this file holds a single
//! test and runs in its own process.

#![cfg(unix)]

use audio_switcher::integrity::compute_digest;
use audio_switcher::{
    ControllerClient, ControllerError, DeviceController, IntegrityRecord, TrustFailure,
};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

const NAME: &str = "EndPointController.exe";

fn write_script(path: &Path, body: &str) {
    std::fs::write(path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
}

#[test]
fn test_bare_name_runs_the_verified_file() {
    let root = TempDir::new().unwrap();
    let cwd = root.path().join("cwd");
    let bin = root.path().join("bin");
    let empty = root.path().join("empty");
    for dir in [&cwd, &bin, &empty] {
        std::fs::create_dir(dir).unwrap();
    }

    let trusted = cwd.join(NAME);
    write_script(&trusted, "printf '1|Trusted|0|1\\n'");
    write_script(&bin.join(NAME), "printf '1|Substitute|0|1\\n'");
    let digest = compute_digest(&trusted).unwrap();

    let search = std::env::var_os("PATH").unwrap_or_default();
    let search = std::env::join_paths(
        std::iter::once(bin.clone()).chain(std::env::split_paths(&search)),
    )
    .unwrap();
    std::env::set_var("PATH", search);
    std::env::set_current_dir(&cwd).unwrap();

    let client = ControllerClient::new(
        NAME,
        vec!["-f".into(), "%d|%ws|%d|%d".into()],
        Duration::from_secs(5),
    )
    .with_trust(IntegrityRecord::new(digest));

    assert_eq!(
        client.executable().unwrap(),
        std::fs::canonicalize(&trusted).unwrap()
    );
    assert_eq!(client.list_devices().unwrap()[0].name, "Trusted");

    // With nothing in the working directory the copy on PATH is not a
    // fallback.
    std::env::set_current_dir(&empty).unwrap();
    assert!(client.executable().is_none());
    assert!(matches!(
        client.list_devices(),
        Err(ControllerError::Untrusted(TrustFailure::Missing))
    ));
    assert!(matches!(
        client.activate_device(1.into()),
        Err(ControllerError::Untrusted(TrustFailure::Missing))
    ));
}
