//! Base spec S6: joining a sleeping ctx with a too-short timeout returns
//! empty; joining the same ctx again with a long-enough timeout returns
//! its result.

use std::sync::mpsc;
use std::time::Duration;

use weft::{CoroutineConfig, ManagerConfig};

#[test]
fn join_timeout_returns_empty_then_succeeds_once_elapsed() {
    weft::init(ManagerConfig::new().worker_threads(2).min_workers(1)).unwrap();

    let sleeper = weft::spawn(CoroutineConfig::new(), || {
        weft::this_co::sleep_for(Duration::from_millis(100));
        77i32
    })
    .unwrap();

    let (tx, rx) = mpsc::channel::<(bool, Option<i32>)>();
    let driver = weft::spawn(CoroutineConfig::new(), move || {
        let early = sleeper.join_timeout(Duration::from_millis(10));
        let early_timed_out = early.is_none();

        let late = sleeper.join_timeout(Duration::from_millis(500));
        let late_value = late.and_then(|b| b.downcast::<i32>().ok()).map(|b| *b);

        let _ = tx.send((early_timed_out, late_value));
    })
    .unwrap();
    driver.detach();

    let (early_timed_out, late_value) = rx
        .recv_timeout(Duration::from_secs(5))
        .expect("scenario did not complete in time");

    assert!(early_timed_out, "a 10ms join on a 100ms sleeper should time out");
    assert_eq!(late_value, Some(77), "a 500ms join should return the ctx's result");

    weft::uninit();
}
