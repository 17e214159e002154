//! Base spec S2: a higher-priority ctx spawned mid-flight runs to
//! completion before the lower-priority ctx that was already running gets
//! to advance again.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use weft::{CoroutineConfig, ManagerConfig};

#[test]
fn higher_priority_ctx_runs_to_completion_before_lower_priority_resumes() {
    weft::init(ManagerConfig::new().worker_threads(1).min_workers(1)).unwrap();

    let log: Arc<Mutex<Vec<char>>> = Arc::new(Mutex::new(Vec::new()));
    let l_count = Arc::new(AtomicUsize::new(0));
    let (tx, rx) = mpsc::channel::<Vec<char>>();

    let log_l = log.clone();
    let l_count_body = l_count.clone();
    let l_handle = weft::spawn(CoroutineConfig::new().priority(0), move || {
        for _ in 0..12 {
            log_l.lock().unwrap().push('L');
            l_count_body.fetch_add(1, Ordering::SeqCst);
            weft::this_co::yield_now();
        }
    })
    .unwrap();

    let log_h = log.clone();
    let l_count_driver = l_count.clone();
    let driver = weft::spawn(CoroutineConfig::new().priority(0), move || {
        while l_count_driver.load(Ordering::SeqCst) < 10 {
            weft::this_co::yield_now();
        }

        let h_handle = weft::spawn(CoroutineConfig::new().priority(3), move || {
            for _ in 0..5 {
                log_h.lock().unwrap().push('H');
            }
        })
        .unwrap();
        // Hand control to the scheduler so the just-spawned, higher-
        // priority ctx is the next one chosen, ahead of L.
        weft::this_co::yield_now();
        h_handle.join();
        l_handle.join();

        let _ = tx.send(log.lock().unwrap().clone());
    })
    .unwrap();
    driver.detach();

    let events = rx
        .recv_timeout(Duration::from_secs(5))
        .expect("scenario did not complete in time");

    let first_h = events.iter().position(|&c| c == 'H').expect("H must have run");
    let last_h = events.iter().rposition(|&c| c == 'H').unwrap();
    assert_eq!(&events[first_h..=last_h], &['H', 'H', 'H', 'H', 'H'][..]);
    assert!(
        events[last_h + 1..].contains(&'L'),
        "L should resume with at least one more increment after H finishes"
    );

    weft::uninit();
}
