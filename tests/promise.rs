#![cfg(not(loom))]

use guarded_sync::promise::{self, Broken};
use std::{
    thread,
    time::{Duration, Instant},
};

mod util;

#[test]
fn delivers_a_value() {
    util::trace_init();
    let (promise, pending) = promise::channel();
    let producer = thread::spawn(move || {
        promise.set_value(123).unwrap();
    });
    assert_eq!(pending.get(), Ok(123));
    producer.join().unwrap();
}

#[test]
fn dropping_an_empty_promise_breaks_it() {
    util::trace_init();
    let (promise, pending) = promise::channel::<i32>();
    let producer = thread::spawn(move || {
        thread::sleep(Duration::from_millis(10));
        drop(promise);
    });

    // Blocks until the promise is dropped, and must not panic or abort.
    assert_eq!(pending.get(), Err(Broken));
    producer.join().unwrap();
}

#[test]
fn broken_error_displays() {
    assert_eq!(Broken.to_string(), "promise was dropped without a value");
}

#[test]
fn is_ready_does_not_block() {
    util::trace_init();
    let (promise, pending) = promise::channel();
    assert!(!pending.is_ready());
    assert!(!pending.wait_for(Duration::from_millis(1)));

    promise.set_value(vec![1, 2, 3]).unwrap();
    assert!(pending.is_ready());
    pending.wait();
    assert_eq!(pending.get(), Ok(vec![1, 2, 3]));
}

#[test]
fn wait_until_observes_resolution() {
    util::trace_init();
    let (promise, pending) = promise::channel::<()>();
    let producer = thread::spawn(move || {
        thread::sleep(Duration::from_millis(10));
        promise.set_value(()).unwrap();
    });

    assert!(pending.wait_until(Instant::now() + Duration::from_secs(60)));
    assert!(pending.is_ready());
    producer.join().unwrap();
}

#[test]
fn abandoned_promise_returns_the_value() {
    util::trace_init();
    let (promise, pending) = promise::channel();
    drop(pending);
    assert!(promise.is_abandoned());
    let err = promise.set_value(String::from("unwanted")).unwrap_err();
    assert_eq!(err.to_string(), "the pending end of this promise was dropped");
    assert_eq!(err.0, "unwanted");
}
