//! Shutting a pool down closes every pseudo-terminal master it opened,
//! including those of shells busy with a request at the time.
//!
//! Kept in its own test binary so no other test opens terminals while the
//! descriptors are being counted.

use std::fs;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use shellpool::ShellPoolBuilder;

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
fn shutdown_closes_all_masters() {
    let _ = env_logger::builder().is_test(true).try_init();
    let before = open_pty_masters();

    let pool = ShellPoolBuilder::new(4)
        .prompt("PROMPT> ")
        .env("PATH", "/usr/bin:/bin")
        .build()
        .unwrap();
    assert_eq!(open_pty_masters(), before + 4);

    let response = pool.run_request("echo hi").unwrap();
    assert!(response.lines().any(|line| line.trim() == "hi"));

    pool.shutdown(Duration::from_secs(5));
    assert_eq!(open_pty_masters(), before);

    // A shell busy during shutdown is closed once its request finishes.
    let pool = Arc::new(
        ShellPoolBuilder::new(1)
            .prompt("PROMPT> ")
            .env("PATH", "/usr/bin:/bin")
            .build()
            .unwrap(),
    );
    let request = {
        let pool = Arc::clone(&pool);
        thread::spawn(move || pool.run_request("sleep 0.5"))
    };
    thread::sleep(Duration::from_millis(100));

    pool.shutdown(Duration::from_secs(5));
    assert_eq!(open_pty_masters(), before);
    assert!(request.join().unwrap().is_ok());
    assert_eq!(open_pty_masters(), before);
}
