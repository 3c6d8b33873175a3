//! A failed spawn must not leave a pseudo-terminal master open.
//!
//! Kept in its own test binary so no other test opens terminals while the
//! descriptors are being counted.

use std::fs;

use shellpool::{Session, SpawnConfig, SpawnStep};

fn open_pty_masters() -> usize {
    fs::read_dir("/proc/self/fd")
        .map(|entries| {
            entries
                .filter_map(|entry| fs::read_link(entry.ok()?.path()).ok())
                .filter(|target| target.to_string_lossy().ends_with("ptmx"))
                .count()
        })
        .unwrap_or(0)
}

#[test]
fn failed_create_leaves_no_master_open() {
    let before = open_pty_masters();

    for _ in 0..5 {
        let err = Session::create(&SpawnConfig::new("/nonexistent/program")).unwrap_err();
        assert_eq!(err.step, SpawnStep::Exec);
        assert_ne!(err.os_errno, 0);
    }

    assert_eq!(open_pty_masters(), before);
}
