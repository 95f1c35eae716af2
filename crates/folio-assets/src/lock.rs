//! Per-asset reader/writer lock expressed with callbacks.
//!
//! Nothing here blocks a thread. A request that cannot be granted now is
//! queued and its callback runs later, on the owner context, when the holder
//! that blocked it releases.
//!
//! # Grant rules
//!
//! ```text
//!   try_read   ok if no writer is active or queued (writer preference)
//!   try_write  ok if no readers, no writer, nothing queued
//!   release    grants queued requests front to back:
//!                reads until the first queued write,
//!                a write only once all readers are gone
//! ```
//!
//! A queued writer stops new readers, so a download commit waiting for the
//! lock cannot be starved by a stream of short reads.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use folio_types::{AssetId, HolderId};
use tracing::{trace, warn};

type Callback = Box<dyn FnOnce()>;

enum Waiter {
    Read { holder: HolderId, callback: Callback },
    Write { callback: Callback },
}

#[derive(Default)]
struct LockState {
    readers: HashMap<HolderId, u32>,
    writer: bool,
    waiting: VecDeque<Waiter>,
}

impl LockState {
    fn writer_queued(&self) -> bool {
        self.waiting.iter().any(|w| matches!(w, Waiter::Write { .. }))
    }

    fn can_read(&self) -> bool {
        !self.writer && !self.writer_queued()
    }

    fn add_reader(&mut self, holder: HolderId) {
        *self.readers.entry(holder).or_insert(0) += 1;
    }

    /// Pop every waiter that can be granted now.
    fn grant(&mut self) -> Vec<Callback> {
        let mut granted = Vec::new();
        while let Some(front) = self.waiting.front() {
            match front {
                Waiter::Read { .. } if !self.writer => {}
                Waiter::Write { .. } if !self.writer && self.readers.is_empty() => {}
                _ => break,
            }
            match self.waiting.pop_front() {
                Some(Waiter::Read { holder, callback }) => {
                    self.add_reader(holder);
                    granted.push(callback);
                }
                Some(Waiter::Write { callback }) => {
                    self.writer = true;
                    granted.push(callback);
                    break;
                }
                None => break,
            }
        }
        granted
    }
}

/// Reader/writer lock of one asset. Clones share the lock.
#[derive(Clone)]
pub struct AssetLock {
    id: AssetId,
    state: Rc<RefCell<LockState>>,
}

impl AssetLock {
    pub fn new() -> Self {
        Self::with_id(AssetId::next())
    }

    pub fn with_id(id: AssetId) -> Self {
        Self {
            id,
            state: Rc::new(RefCell::new(LockState::default())),
        }
    }

    /// Identity used to order multi-asset acquisition.
    pub fn id(&self) -> AssetId {
        self.id
    }

    pub fn try_read(&self, holder: HolderId) -> bool {
        let mut state = self.state.borrow_mut();
        if !state.can_read() {
            return false;
        }
        state.add_reader(holder);
        true
    }

    /// Acquire a read lock for `holder`, running `on_acquired` once it is held.
    pub fn read(&self, holder: HolderId, on_acquired: impl FnOnce() + 'static) {
        if self.try_read(holder) {
            on_acquired();
            return;
        }
        trace!(asset = %self.id, holder = %holder, "read lock queued");
        self.state.borrow_mut().waiting.push_back(Waiter::Read {
            holder,
            callback: Box::new(on_acquired),
        });
    }

    pub fn release_read(&self, holder: HolderId) {
        let granted = {
            let mut state = self.state.borrow_mut();
            match state.readers.get(&holder).copied().unwrap_or(0) {
                0 => {
                    warn!(asset = %self.id, holder = %holder, "release_read without a read lock");
                    return;
                }
                1 => {
                    state.readers.remove(&holder);
                }
                n => {
                    state.readers.insert(holder, n - 1);
                    return;
                }
            }
            state.grant()
        };
        run(granted);
    }

    pub fn try_write(&self) -> bool {
        let mut state = self.state.borrow_mut();
        if state.writer || !state.readers.is_empty() || !state.waiting.is_empty() {
            return false;
        }
        state.writer = true;
        true
    }

    /// Acquire the write lock, running `on_acquired` once it is held.
    pub fn write(&self, on_acquired: impl FnOnce() + 'static) {
        if self.try_write() {
            on_acquired();
            return;
        }
        trace!(asset = %self.id, "write lock queued");
        self.state.borrow_mut().waiting.push_back(Waiter::Write {
            callback: Box::new(on_acquired),
        });
    }

    pub fn release_write(&self) {
        let granted = {
            let mut state = self.state.borrow_mut();
            if !state.writer {
                warn!(asset = %self.id, "release_write without the write lock");
                return;
            }
            state.writer = false;
            state.grant()
        };
        run(granted);
    }

    /// Whether a new reader would be admitted right now.
    pub fn is_read_available(&self) -> bool {
        self.state.borrow().can_read()
    }

    pub fn is_write_locked(&self) -> bool {
        self.state.borrow().writer
    }

    /// Read locks currently held by `holder`.
    pub fn read_count(&self, holder: HolderId) -> u32 {
        self.state.borrow().readers.get(&holder).copied().unwrap_or(0)
    }

    pub fn readers(&self) -> usize {
        self.state.borrow().readers.len()
    }

    pub fn queued(&self) -> usize {
        self.state.borrow().waiting.len()
    }
}

impl Default for AssetLock {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for AssetLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("AssetLock")
            .field("id", &self.id)
            .field("readers", &state.readers.len())
            .field("writer", &state.writer)
            .field("queued", &state.waiting.len())
            .finish()
    }
}

// Callbacks run with no borrow held: they may take or release this lock.
fn run(callbacks: Vec<Callback>) {
    for callback in callbacks {
        callback();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn flag() -> (Rc<Cell<bool>>, impl FnOnce() + 'static) {
        let hit = Rc::new(Cell::new(false));
        let h = hit.clone();
        (hit, move || h.set(true))
    }

    #[test]
    fn readers_share() {
        let lock = AssetLock::new();
        let (a, b) = (HolderId::new(), HolderId::new());
        assert!(lock.try_read(a));
        assert!(lock.try_read(b));
        assert!(lock.try_read(a));
        assert_eq!(lock.read_count(a), 2);
        assert_eq!(lock.readers(), 2);
        assert!(!lock.try_write());
    }

    #[test]
    fn queued_writer_blocks_new_readers() {
        let lock = AssetLock::new();
        let reader = HolderId::new();
        assert!(lock.try_read(reader));

        let (written, on_write) = flag();
        lock.write(on_write);
        assert!(!written.get());
        assert!(!lock.try_read(HolderId::new()));
        assert!(!lock.is_read_available());

        lock.release_read(reader);
        assert!(written.get());
        assert!(lock.is_write_locked());
    }

    #[test]
    fn readers_queued_behind_writer_are_granted_together() {
        let lock = AssetLock::new();
        assert!(lock.try_write());

        let (r1, cb1) = flag();
        let (r2, cb2) = flag();
        lock.read(HolderId::new(), cb1);
        lock.read(HolderId::new(), cb2);
        assert_eq!(lock.queued(), 2);

        lock.release_write();
        assert!(r1.get() && r2.get());
        assert_eq!(lock.readers(), 2);
        assert_eq!(lock.queued(), 0);
    }

    #[test]
    fn grants_stop_at_queued_writer() {
        let lock = AssetLock::new();
        assert!(lock.try_write());

        let (r1, cb1) = flag();
        let (w, cbw) = flag();
        let (r2, cb2) = flag();
        let h1 = HolderId::new();
        lock.read(h1, cb1);
        lock.write(cbw);
        lock.read(HolderId::new(), cb2);

        lock.release_write();
        assert!(r1.get());
        assert!(!w.get());
        assert!(!r2.get());

        lock.release_read(h1);
        assert!(w.get());
        assert!(!r2.get());

        lock.release_write();
        assert!(r2.get());
    }

    #[test]
    fn callback_may_release_reentrantly() {
        let lock = AssetLock::new();
        assert!(lock.try_write());
        let holder = HolderId::new();
        let l = lock.clone();
        lock.read(holder, move || l.release_read(holder));
        lock.release_write();
        assert_eq!(lock.readers(), 0);
        assert!(lock.try_write());
    }

    #[test]
    fn stray_release_is_ignored() {
        let lock = AssetLock::new();
        lock.release_read(HolderId::new());
        lock.release_write();
        assert!(lock.try_write());
    }
}
