//! Locking a set of assets as one unit.
//!
//! Sets are always walked in ascending [`AssetId`](folio_types::AssetId)
//! order, so two holders locking overlapping sets cannot wait on each other
//! in a cycle.

use std::rc::Rc;

use folio_types::HolderId;

use crate::lock::AssetLock;

/// Canonical acquisition order: sorted by asset id, duplicates removed.
pub fn canonical(locks: &[AssetLock]) -> Vec<AssetLock> {
    let mut sorted = locks.to_vec();
    sorted.sort_by_key(AssetLock::id);
    sorted.dedup_by_key(|lock| lock.id());
    sorted
}

/// All-or-nothing: either every lock is read-locked for `holder`, or none is.
pub fn try_read_all(locks: &[AssetLock], holder: HolderId) -> bool {
    let locks = canonical(locks);
    for (taken, lock) in locks.iter().enumerate() {
        if !lock.try_read(holder) {
            for acquired in &locks[..taken] {
                acquired.release_read(holder);
            }
            return false;
        }
    }
    true
}

/// Read-lock every asset in turn, then run `on_acquired`.
///
/// Each lock is requested only after the previous one was granted. An empty
/// set completes immediately.
pub fn retain_read_all(locks: &[AssetLock], holder: HolderId, on_acquired: impl FnOnce() + 'static) {
    let locks: Rc<[AssetLock]> = canonical(locks).into();
    acquire_from(locks, 0, holder, Box::new(on_acquired));
}

fn acquire_from(locks: Rc<[AssetLock]>, next: usize, holder: HolderId, done: Box<dyn FnOnce()>) {
    let Some(lock) = locks.get(next).cloned() else {
        done();
        return;
    };
    lock.read(holder, move || acquire_from(locks, next + 1, holder, done));
}

pub fn release_read_all(locks: &[AssetLock], holder: HolderId) {
    for lock in canonical(locks) {
        lock.release_read(holder);
    }
}
