//! Base spec S4: a zero-capacity (rendezvous) channel's `send` only
//! returns once the matching `recv` has actually taken the value.

use std::sync::mpsc;
use std::time::{Duration, Instant};

use weft::sync::Rendezvous;
use weft::{CoroutineConfig, ManagerConfig};

#[test]
fn rendezvous_send_only_returns_after_recv_takes_the_value() {
    weft::init(ManagerConfig::new().worker_threads(2).min_workers(1)).unwrap();

    let chan = Rendezvous::<i32>::new();
    let (push_tx, push_rx) = mpsc::channel::<Instant>();
    let (pop_tx, pop_rx) = mpsc::channel::<Instant>();

    let send_chan = chan.clone();
    let producer = weft::spawn(CoroutineConfig::new(), move || {
        send_chan.send(42).unwrap();
        let _ = push_tx.send(Instant::now());
    })
    .unwrap();
    producer.detach();

    let recv_chan = chan.clone();
    let consumer = weft::spawn(CoroutineConfig::new(), move || {
        let value = recv_chan.recv().unwrap();
        let _ = pop_tx.send(Instant::now());
        assert_eq!(value, 42);
    })
    .unwrap();
    consumer.detach();

    let t_push_end = push_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("producer did not finish in time");
    let t_pop_start = pop_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("consumer did not finish in time");

    assert!(
        t_pop_start <= t_push_end,
        "recv must complete before send returns"
    );

    weft::uninit();
}
