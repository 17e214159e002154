//! Base spec S5: two ctxs alternate setting a shared int to 1 then 0 under
//! a mutex with condvar notify, 1000 times each; neither side ever
//! observes a value the other side didn't just settle.

use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use weft::sync::{Condvar, Mutex};
use weft::{CoroutineConfig, ManagerConfig};

#[derive(PartialEq, Clone, Copy)]
enum Turn {
    A,
    B,
}

struct Shared {
    value: i32,
    turn: Turn,
}

#[test]
fn mutex_condvar_ping_pong_never_observes_torn_state() {
    weft::init(ManagerConfig::new().worker_threads(2).min_workers(1)).unwrap();

    let state = Arc::new(Mutex::new(Shared {
        value: 0,
        turn: Turn::A,
    }));
    let cv = Arc::new(Condvar::new());
    let (tx, rx) = mpsc::channel::<()>();

    let state_a = state.clone();
    let cv_a = cv.clone();
    let a = weft::spawn(CoroutineConfig::new(), move || {
        for _ in 0..1000 {
            let mut guard = state_a.lock();
            while guard.turn != Turn::A {
                guard = cv_a.wait(guard);
            }
            assert_eq!(guard.value, 0, "A should only ever see B's settled 0");
            guard.value = 1;
            guard.turn = Turn::B;
            drop(guard);
            cv_a.notify_all();
        }
    })
    .unwrap();
    a.detach();

    let state_b = state.clone();
    let cv_b = cv.clone();
    let b = weft::spawn(CoroutineConfig::new(), move || {
        for _ in 0..1000 {
            let mut guard = state_b.lock();
            while guard.turn != Turn::B {
                guard = cv_b.wait(guard);
            }
            assert_eq!(guard.value, 1, "B should only ever see A's settled 1");
            guard.value = 0;
            guard.turn = Turn::A;
            drop(guard);
            cv_b.notify_all();
        }
        let _ = tx.send(());
    })
    .unwrap();
    b.detach();

    rx.recv_timeout(Duration::from_secs(10))
        .expect("scenario did not complete in time");

    assert_eq!(state.lock().value, 0);

    weft::uninit();
}
