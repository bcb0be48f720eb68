// Copyright (c) 2023 Mike Tsao. All rights reserved.

//! Named reentrant mutexes shared across scripts. `LOCK=a,b` on two
//! different scripts serialises their children through the same registry
//! entries. Locks are created on first use and never removed.

use parking_lot::lock_api::ArcReentrantMutexGuard;
use parking_lot::{Mutex, RawMutex, RawThreadId, ReentrantMutex};
use rustc_hash::FxHashMap;
use std::sync::Arc;

type NamedLock = Arc<ReentrantMutex<()>>;
type NamedLockGuard = ArcReentrantMutexGuard<RawMutex, RawThreadId, ()>;

#[derive(Debug, Default)]
pub struct LockRegistry {
    locks: Mutex<FxHashMap<String, NamedLock>>,
}
impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires every named lock in the given order and returns a guard set
    /// that releases them in reverse order on drop. Acquisition may block
    /// indefinitely; avoiding deadlocks across lock domains is the macro
    /// author's responsibility.
    pub fn acquire(&self, names: &[String]) -> LockSet {
        let mut guards = Vec::with_capacity(names.len());
        for name in names {
            let lock = {
                // The registry-wide mutex is held only for the lookup, never
                // across the acquisition below.
                let mut locks = self.locks.lock();
                Arc::clone(
                    locks
                        .entry(name.clone())
                        .or_insert_with(|| Arc::new(ReentrantMutex::new(()))),
                )
            };
            guards.push(ReentrantMutex::lock_arc(&lock));
        }
        LockSet { guards }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }
}

pub struct LockSet {
    guards: Vec<NamedLockGuard>,
}
impl Drop for LockSet {
    fn drop(&mut self) {
        while let Some(guard) = self.guards.pop() {
            drop(guard);
        }
    }
}
