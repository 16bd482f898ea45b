#![cfg(not(loom))]

use guarded_sync::{Condvar, Mutex, RwLock};
use std::{
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

mod util;

const WAITERS: usize = 10;

#[derive(Default)]
struct Counter {
    ivar: i32,
}

#[test]
fn wait_until_times_out() {
    util::trace_init();
    let mutex = Mutex::new(Counter::default());
    let cvar = Condvar::new();

    for _ in 0..2 {
        let mut guard = mutex.lock();
        let deadline = Instant::now() + Duration::from_millis(10);
        let satisfied = cvar.wait_until(&mut guard, deadline, |counter| {
            counter.ivar = 12;
            false
        });
        assert!(!satisfied);
        assert_eq!(guard.ivar, 12);
        assert!(Instant::now() >= deadline);
    }
}

#[test]
fn wait_for_times_out() {
    util::trace_init();
    let mutex = Mutex::new(Counter::default());
    let cvar = Condvar::new();

    for _ in 0..2 {
        let mut guard = mutex.lock();
        let start = Instant::now();
        let satisfied = cvar.wait_for(&mut guard, Duration::from_millis(10), |counter| {
            counter.ivar = 12;
            false
        });
        assert!(!satisfied);
        assert_eq!(guard.ivar, 12);
        assert!(start.elapsed() >= Duration::from_millis(10));
    }
}

#[test]
fn wait_returns_immediately_when_satisfied() {
    util::trace_init();
    let mutex = Mutex::new(Counter::default());
    let cvar = Condvar::new();

    for _ in 0..2 {
        let mut guard = mutex.lock();
        cvar.wait(&mut guard, |counter| {
            counter.ivar = 12;
            true
        });
        assert_eq!(guard.ivar, 12);
    }
}

/// Starts `WAITERS` threads which all wait for a start signal, and then each
/// run a critical section that sleeps while holding the lock. If the critical
/// sections overlapped, increments of `sum` would be lost.
fn critical_sections_after(wait: fn(&Condvar, &mut guarded_sync::MutexGuard<'_, Shared>)) {
    util::trace_init();
    let shared = Arc::new((Mutex::new(Shared::default()), Condvar::new()));

    let threads = (0..WAITERS)
        .map(|_| {
            let shared = shared.clone();
            thread::spawn(move || {
                let (state, cvar) = &*shared;
                let mut guard = state.lock();
                wait(cvar, &mut guard);

                let sum = guard.sum;
                thread::sleep(Duration::from_millis(100));
                guard.sum = sum + 1;
            })
        })
        .collect::<Vec<_>>();

    let (state, cvar) = &*shared;
    state.lock().start = true;
    cvar.notify_all();

    for thread in threads {
        thread.join().unwrap();
    }
    assert_eq!(state.lock().sum, WAITERS);
}

#[derive(Default)]
struct Shared {
    start: bool,
    sum: usize,
}

#[test]
fn critical_section_after_wait_for() {
    critical_sections_after(|cvar, guard| {
        // a zero timeout still evaluates the predicate under the lock, and
        // returns with the lock held.
        let _ = cvar.wait_for(guard, Duration::ZERO, |shared| shared.start);
        cvar.wait(guard, |shared| shared.start);
    });
}

#[test]
fn critical_section_after_wait() {
    critical_sections_after(|cvar, guard| cvar.wait(guard, |shared| shared.start));
}

#[test]
fn critical_section_after_wait_until() {
    critical_sections_after(|cvar, guard| {
        let deadline = Instant::now() + Duration::from_secs(60);
        assert!(cvar.wait_until(guard, deadline, |shared| shared.start));
    });
}

#[test]
fn wakes_a_writer_waiting_on_a_write_lock() {
    util::trace_init();
    let shared = Arc::new((RwLock::new(Vec::<u32>::new()), Condvar::new()));

    let consumer = thread::spawn({
        let shared = shared.clone();
        move || {
            let (items, cvar) = &*shared;
            let mut guard = items.write();
            let satisfied = cvar.wait_write_for(&mut guard, Duration::from_secs(60), |items| {
                items.len() == 3
            });
            assert!(satisfied);
            guard.drain(..).sum::<u32>()
        }
    });

    let (items, cvar) = &*shared;
    for i in 1..=3 {
        items.write().push(i);
        cvar.notify_one();
    }

    assert_eq!(consumer.join().unwrap(), 6);
    assert!(items.read().is_empty());
}

#[test]
fn predicate_rechecked_on_every_wakeup() {
    util::trace_init();
    let shared = Arc::new((Mutex::new(0usize), Condvar::new()));

    let notifier = thread::spawn({
        let shared = shared.clone();
        move || {
            let (count, cvar) = &*shared;
            for _ in 0..3 {
                thread::sleep(Duration::from_millis(20));
                *count.lock() += 1;
                cvar.notify_one();
            }
        }
    });

    let (count, cvar) = &*shared;
    let mut evals = 0;
    let mut guard = count.lock();
    cvar.wait(&mut guard, |n| {
        evals += 1;
        *n == 3
    });
    assert_eq!(*guard, 3);
    drop(guard);
    // at least the initial check and the one that saw the count reach 3.
    assert!(evals > 1, "predicate only evaluated {evals} time(s)");

    notifier.join().unwrap();
}

#[test]
fn raw_wait_on_a_leaked_guard() {
    util::trace_init();
    let shared = Arc::new((Mutex::new(false), Condvar::new()));

    let notifier = thread::spawn({
        let shared = shared.clone();
        move || {
            let (ready, cvar) = &*shared;
            *ready.lock() = true;
            cvar.notify_one();
        }
    });

    let (ready, cvar) = &*shared;
    let _ = guarded_sync::MutexGuard::leak(ready.lock());
    unsafe {
        // Safety: the mutex was locked above by this thread, and the data is
        // only read while it is held.
        cvar.wait_raw(ready.raw(), || *ready.data_ptr());
        assert!(ready.is_locked());
        ready.force_unlock();
    }

    notifier.join().unwrap();
}
