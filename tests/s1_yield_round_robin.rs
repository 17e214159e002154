//! Base spec S1: three equal-priority ctxs that each append their id to a
//! shared log and yield, twice over, round-robin through in enqueue order.

use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use weft::{CoroutineConfig, ManagerConfig};

#[test]
fn three_equal_priority_ctxs_round_robin_through_two_rounds() {
    weft::init(ManagerConfig::new().worker_threads(1).min_workers(1)).unwrap();

    let order: Arc<Mutex<Vec<char>>> = Arc::new(Mutex::new(Vec::new()));
    let (tx, rx) = mpsc::channel::<Vec<char>>();

    let mut handles = Vec::new();
    for label in ['a', 'b', 'c'] {
        let order = order.clone();
        handles.push(
            weft::spawn(CoroutineConfig::new(), move || {
                for _ in 0..2 {
                    order.lock().unwrap().push(label);
                    weft::this_co::yield_now();
                }
            })
            .unwrap(),
        );
    }

    let order2 = order.clone();
    let driver = weft::spawn(CoroutineConfig::new(), move || {
        for h in handles {
            h.join();
        }
        let _ = tx.send(order2.lock().unwrap().clone());
    })
    .unwrap();
    driver.detach();

    let sequence: String = rx
        .recv_timeout(Duration::from_secs(5))
        .expect("scenario did not complete in time")
        .into_iter()
        .collect();

    assert!(
        ["abcabc", "bcabca", "cabcab"].contains(&sequence.as_str()),
        "unexpected interleaving: {sequence}"
    );

    weft::uninit();
}
