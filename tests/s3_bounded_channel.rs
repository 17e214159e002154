//! Base spec S3: a capacity-2 bounded channel preserves FIFO order across
//! a producer ctx and a consumer ctx hosted on different environments.

use std::sync::mpsc;
use std::time::Duration;

use weft::sync::Channel;
use weft::{CoroutineConfig, ManagerConfig};

#[test]
fn bounded_channel_preserves_fifo_order() {
    weft::init(ManagerConfig::new().worker_threads(2).min_workers(1)).unwrap();

    let chan = Channel::<i32>::bounded(2);
    let (tx, rx) = mpsc::channel::<Vec<i32>>();

    let producer_chan = chan.clone();
    let producer = weft::spawn(CoroutineConfig::new(), move || {
        for i in 0..5 {
            producer_chan.send(i).unwrap();
        }
    })
    .unwrap();
    producer.detach();

    let consumer = weft::spawn(CoroutineConfig::new(), move || {
        let mut received = Vec::with_capacity(5);
        for _ in 0..5 {
            received.push(chan.recv().unwrap());
        }
        let _ = tx.send(received);
    })
    .unwrap();
    consumer.detach();

    let received = rx
        .recv_timeout(Duration::from_secs(5))
        .expect("scenario did not complete in time");
    assert_eq!(received, vec![0, 1, 2, 3, 4]);

    weft::uninit();
}
