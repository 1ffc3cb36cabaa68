use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use frame_shm::{ShmBuffer, Timestamp, Wake};

#[test]
fn test_wait_wakes_on_frame() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("frames");
    let producer = Arc::new(ShmBuffer::create_at(&path, 8).unwrap());
    let consumer = ShmBuffer::attach_at(&path).unwrap();

    let stop = Arc::new(AtomicBool::new(false));
    let handle = {
        let producer = producer.clone();
        let stop = stop.clone();
        thread::spawn(move || {
            let mut i = 0u8;
            // keep publishing until the consumer has seen a frame, a single notify could
            // land before the consumer starts waiting
            while !stop.load(Ordering::Acquire) {
                producer
                    .write_frame(&[i; 8], Some(Timestamp(i as i64)))
                    .unwrap();
                i = i.wrapping_add(1);
                thread::sleep(Duration::from_millis(2));
            }
        })
    };

    assert_eq!(consumer.wait().unwrap(), Wake::Frame);
    consumer.lock().unwrap();
    let data = consumer.data().to_vec();
    let ts = consumer.timestamp();
    consumer.unlock().unwrap();
    stop.store(true, Ordering::Release);
    handle.join().unwrap();

    assert!(data.iter().all(|b| *b == data[0]));
    assert_eq!(ts, Some(Timestamp(data[0] as i64)));
}

#[test]
fn test_wait_wakes_on_close() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("frames");
    let producer = ShmBuffer::create_at(&path, 8).unwrap();
    let consumer = ShmBuffer::attach_at(&path).unwrap();

    let handle = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        drop(producer);
    });

    assert_eq!(consumer.wait().unwrap(), Wake::Closed);
    assert!(!consumer.valid());
    handle.join().unwrap();
}
