//! Reference-counted read locks over an asset set, keyed by holder.
//!
//! A holder may retain the same set many times; the underlying asset locks
//! are taken once, on the first retain, and released when the last retain
//! is released.
//!
//! ```text
//!   retain ──▶ Pending{count, waiters} ──(all assets granted)──▶ Acquired{count}
//!                 │ release: count -= 1                              │ release: count -= 1
//!                 │ (entry kept until acquisition)                   │ count == 0: unlock, drop
//!                 ▼                                                  ▼
//!   acquisition with count == 0: waiters run, then unlock, drop
//! ```

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use folio_types::HolderId;
use tracing::{trace, warn};

use crate::lock::AssetLock;
use crate::lock_set;

struct ReadLockEntry {
    locks: Vec<AssetLock>,
    acquired: bool,
    count: u32,
    waiters: Vec<Box<dyn FnOnce()>>,
}

/// Read-lock bookkeeping of one controller. Clones share the table.
#[derive(Clone, Default)]
pub struct ReadLockTable {
    entries: Rc<RefCell<HashMap<HolderId, ReadLockEntry>>>,
}

impl ReadLockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Non-blocking acquisition. An already acquired holder just gains a
    /// reference; a holder still waiting on a retain gets `false`.
    pub fn try_read_lock(&self, holder: HolderId, locks: &[AssetLock]) -> bool {
        if let Some(entry) = self.entries.borrow_mut().get_mut(&holder) {
            if entry.acquired {
                entry.count += 1;
                return true;
            }
            return false;
        }

        if !lock_set::try_read_all(locks, holder) {
            trace!(holder = %holder, assets = locks.len(), "try_read_lock refused");
            return false;
        }
        self.entries.borrow_mut().insert(
            holder,
            ReadLockEntry {
                locks: locks.to_vec(),
                acquired: true,
                count: 1,
                waiters: Vec::new(),
            },
        );
        true
    }

    /// Retain a read lock, running `on_acquired` once the set is held.
    pub fn retain_read_lock(&self, holder: HolderId, locks: &[AssetLock], on_acquired: impl FnOnce() + 'static) {
        {
            let mut entries = self.entries.borrow_mut();
            if let Some(entry) = entries.get_mut(&holder) {
                entry.count += 1;
                if !entry.acquired {
                    entry.waiters.push(Box::new(on_acquired));
                    return;
                }
                drop(entries);
                on_acquired();
                return;
            }
            entries.insert(
                holder,
                ReadLockEntry {
                    locks: locks.to_vec(),
                    acquired: false,
                    count: 1,
                    waiters: vec![Box::new(on_acquired)],
                },
            );
        }

        // May complete synchronously, so no borrow is held here.
        let table = self.clone();
        lock_set::retain_read_all(locks, holder, move || table.on_acquired(holder));
    }

    pub fn release_read_lock(&self, holder: HolderId) {
        let released = {
            let mut entries = self.entries.borrow_mut();
            let Some(entry) = entries.get_mut(&holder) else {
                warn!(holder = %holder, "release_read_lock without a retained lock");
                return;
            };
            if entry.count == 0 {
                warn!(holder = %holder, "release_read_lock beyond retain count");
                return;
            }
            entry.count -= 1;
            if entry.count > 0 || !entry.acquired {
                // Pending entries are released when acquisition completes.
                return;
            }
            entries.remove(&holder)
        };
        if let Some(entry) = released {
            lock_set::release_read_all(&entry.locks, holder);
        }
    }

    fn on_acquired(&self, holder: HolderId) {
        let waiters = {
            let mut entries = self.entries.borrow_mut();
            let Some(entry) = entries.get_mut(&holder) else {
                return;
            };
            entry.acquired = true;
            std::mem::take(&mut entry.waiters)
        };
        trace!(holder = %holder, waiters = waiters.len(), "read lock acquired");
        for waiter in waiters {
            waiter();
        }

        // Every retain was released while waiting.
        let released = {
            let mut entries = self.entries.borrow_mut();
            match entries.get(&holder) {
                Some(entry) if entry.count == 0 => entries.remove(&holder),
                _ => None,
            }
        };
        if let Some(entry) = released {
            lock_set::release_read_all(&entry.locks, holder);
        }
    }

    /// Outstanding retains for `holder` (0 if it has no entry).
    pub fn count(&self, holder: HolderId) -> u32 {
        self.entries.borrow().get(&holder).map_or(0, |e| e.count)
    }

    pub fn is_acquired(&self, holder: HolderId) -> bool {
        self.entries.borrow().get(&holder).is_some_and(|e| e.acquired)
    }

    pub fn holders(&self) -> usize {
        self.entries.borrow().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn counter() -> (Rc<Cell<u32>>, impl Fn() -> Box<dyn FnOnce()>) {
        let hits = Rc::new(Cell::new(0));
        let h = hits.clone();
        (hits, move || {
            let h = h.clone();
            Box::new(move || h.set(h.get() + 1)) as Box<dyn FnOnce()>
        })
    }

    #[test]
    fn try_read_lock_twice_counts_without_reacquiring() {
        let table = ReadLockTable::new();
        let lock = AssetLock::new();
        let holder = HolderId::new();

        assert!(table.try_read_lock(holder, &[lock.clone()]));
        assert!(table.try_read_lock(holder, &[lock.clone()]));
        assert_eq!(table.count(holder), 2);
        // One underlying acquisition only.
        assert_eq!(lock.read_count(holder), 1);

        table.release_read_lock(holder);
        assert_eq!(lock.read_count(holder), 1);
        table.release_read_lock(holder);
        assert_eq!(lock.read_count(holder), 0);
        assert_eq!(table.holders(), 0);
    }

    #[test]
    fn empty_set_always_succeeds() {
        let table = ReadLockTable::new();
        let holder = HolderId::new();
        assert!(table.try_read_lock(holder, &[]));
        let (hits, cb) = counter();
        table.retain_read_lock(holder, &[], cb());
        assert_eq!(hits.get(), 1);
        assert_eq!(table.count(holder), 2);
    }

    #[test]
    fn try_read_lock_fails_while_pending() {
        let table = ReadLockTable::new();
        let lock = AssetLock::new();
        assert!(lock.try_write());
        let holder = HolderId::new();
        let (_, cb) = counter();
        table.retain_read_lock(holder, &[lock.clone()], cb());
        assert!(!table.try_read_lock(holder, &[lock.clone()]));
        assert_eq!(table.count(holder), 1);
    }

    #[test]
    fn waiters_run_once_in_order_at_acquisition() {
        let table = ReadLockTable::new();
        let lock = AssetLock::new();
        assert!(lock.try_write());
        let holder = HolderId::new();
        let order = Rc::new(RefCell::new(Vec::new()));

        for i in 0..3 {
            let o = order.clone();
            table.retain_read_lock(holder, &[lock.clone()], move || o.borrow_mut().push(i));
        }
        assert!(order.borrow().is_empty());
        assert_eq!(table.count(holder), 3);

        lock.release_write();
        assert_eq!(*order.borrow(), vec![0, 1, 2]);

        // Retain after acquisition runs immediately.
        let o = order.clone();
        table.retain_read_lock(holder, &[lock.clone()], move || o.borrow_mut().push(3));
        assert_eq!(*order.borrow(), vec![0, 1, 2, 3]);
        assert_eq!(lock.read_count(holder), 1);
    }

    #[test]
    fn release_before_acquisition_is_deferred() {
        let table = ReadLockTable::new();
        let lock = AssetLock::new();
        assert!(lock.try_write());
        let holder = HolderId::new();
        let (hits, cb) = counter();

        table.retain_read_lock(holder, &[lock.clone()], cb());
        table.release_read_lock(holder);
        assert_eq!(table.count(holder), 0);
        assert_eq!(table.holders(), 1);

        lock.release_write();
        // The callback fires exactly once, then the lock goes straight back.
        assert_eq!(hits.get(), 1);
        assert_eq!(lock.read_count(holder), 0);
        assert_eq!(table.holders(), 0);
        assert!(lock.try_write());
    }

    #[test]
    fn interleaved_retains_and_releases_fire_each_callback_once() {
        let table = ReadLockTable::new();
        let (a, b) = (AssetLock::new(), AssetLock::new());
        assert!(b.try_write());
        let holder = HolderId::new();
        let (hits, cb) = counter();
        let set = [a.clone(), b.clone()];

        table.retain_read_lock(holder, &set, cb());
        table.retain_read_lock(holder, &set, cb());
        table.release_read_lock(holder);
        assert_eq!(hits.get(), 0);

        b.release_write();
        assert_eq!(hits.get(), 2);
        assert!(table.is_acquired(holder));
        assert_eq!(table.count(holder), 1);

        table.release_read_lock(holder);
        assert_eq!(a.readers() + b.readers(), 0);
        // Extra release is a no-op.
        table.release_read_lock(holder);
        assert_eq!(table.holders(), 0);
    }
}
