//! Checks sequences of non-blocking lock operations against a simple model of
//! which locks should be available.
#![cfg(not(loom))]

use guarded_sync::{
    spin::{RwSpinlock, Spinlock},
    Mutex, RwLock,
};
use proptest::prelude::*;

#[derive(Debug, Clone, Copy)]
enum MutexOp {
    TryLock,
    Unlock,
}

#[derive(Debug, Clone, Copy)]
enum RwOp {
    TryRead,
    TryWrite,
    ReleaseRead,
    ReleaseWrite,
}

fn mutex_op() -> impl Strategy<Value = MutexOp> {
    prop_oneof![Just(MutexOp::TryLock), Just(MutexOp::Unlock)]
}

fn rw_op() -> impl Strategy<Value = RwOp> {
    prop_oneof![
        Just(RwOp::TryRead),
        Just(RwOp::TryWrite),
        Just(RwOp::ReleaseRead),
        Just(RwOp::ReleaseWrite),
    ]
}

fn check_mutex<L: guarded_sync::blocking::RawMutex>(mutex: &Mutex<u32, L>, ops: &[MutexOp]) {
    let mut held = None;
    for op in ops {
        match op {
            MutexOp::TryLock => {
                let guard = mutex.try_lock();
                assert_eq!(guard.is_some(), held.is_none(), "try_lock while held: {held:?}");
                if let Some(mut guard) = guard {
                    *guard += 1;
                    held = Some(guard);
                }
            }
            MutexOp::Unlock => {
                held = None;
            }
        }
        assert_eq!(mutex.is_locked(), held.is_some());
    }
}

fn check_rwlock<L: guarded_sync::blocking::RawRwLock>(lock: &RwLock<u32, L>, ops: &[RwOp]) {
    let mut readers = Vec::new();
    let mut writer = None;
    for op in ops {
        match op {
            RwOp::TryRead => {
                let guard = lock.try_read();
                assert_eq!(guard.is_some(), writer.is_none());
                readers.extend(guard);
            }
            RwOp::TryWrite => {
                let guard = lock.try_write();
                assert_eq!(guard.is_some(), writer.is_none() && readers.is_empty());
                if guard.is_some() {
                    writer = guard;
                }
            }
            RwOp::ReleaseRead => {
                readers.pop();
            }
            RwOp::ReleaseWrite => {
                writer = None;
            }
        }
        assert_eq!(lock.is_locked(), writer.is_some() || !readers.is_empty());
        assert_eq!(lock.has_writer(), writer.is_some());
    }
}

proptest! {
    #[test]
    fn sleep_mutex_matches_model(ops in proptest::collection::vec(mutex_op(), 0..64)) {
        check_mutex(&Mutex::new(0), &ops);
    }

    #[test]
    fn spinlock_matches_model(ops in proptest::collection::vec(mutex_op(), 0..64)) {
        check_mutex(&Mutex::with_raw_mutex(0, Spinlock::new()), &ops);
    }

    #[test]
    fn sleep_rwlock_matches_model(ops in proptest::collection::vec(rw_op(), 0..64)) {
        check_rwlock(&RwLock::new(0), &ops);
    }

    #[test]
    fn rw_spinlock_matches_model(ops in proptest::collection::vec(rw_op(), 0..64)) {
        check_rwlock(&RwLock::with_raw_rwlock(0, RwSpinlock::new()), &ops);
    }
}
