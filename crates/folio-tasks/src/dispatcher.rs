//! Owner-side delivery of task completions.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use folio_types::TaskId;
use tokio::sync::mpsc;
use tracing::{trace, warn};

use crate::{TaskError, TaskOutcome};

pub(crate) type AnyValue = Box<dyn Any + Send>;
pub(crate) type Completion = Box<dyn FnOnce(TaskOutcome<AnyValue>)>;

/// A finished task travelling from a worker back to the owner.
pub(crate) struct Finished {
    pub id: TaskId,
    pub result: Result<AnyValue, TaskError>,
}

/// Owner context for completions.
///
/// Every queue created from one dispatcher posts to the same result channel,
/// so a single `update()` pumps all of them. Results from one queue arrive in
/// the order its worker finished them, which is submission order.
///
/// `Dispatcher` is `!Send`: completions may capture `Rc` state of the owner.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Rc<DispatchInner>,
}

struct DispatchInner {
    results_tx: mpsc::UnboundedSender<Finished>,
    results_rx: RefCell<mpsc::UnboundedReceiver<Finished>>,
    completions: RefCell<HashMap<TaskId, Completion>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        let (results_tx, results_rx) = mpsc::unbounded_channel();
        Self {
            inner: Rc::new(DispatchInner {
                results_tx,
                results_rx: RefCell::new(results_rx),
                completions: RefCell::new(HashMap::new()),
            }),
        }
    }

    pub(crate) fn sender(&self) -> mpsc::UnboundedSender<Finished> {
        self.inner.results_tx.clone()
    }

    /// Park a completion until its result arrives.
    pub(crate) fn park(&self, id: TaskId, completion: Completion) {
        self.inner.completions.borrow_mut().insert(id, completion);
    }

    /// Deliver a result without a worker round trip (queue already closed).
    pub(crate) fn fail_now(&self, id: TaskId, err: TaskError) {
        if self.inner.results_tx.send(Finished { id, result: Err(err) }).is_err() {
            warn!(task = %id, "result channel closed");
        }
    }

    /// Tasks submitted but not yet delivered.
    pub fn pending(&self) -> usize {
        self.inner.completions.borrow().len()
    }

    /// Run the completions of every finished task. Returns how many ran.
    pub fn update(&self) -> usize {
        let mut delivered = 0;
        loop {
            let next = self.inner.results_rx.borrow_mut().try_recv();
            match next {
                Ok(finished) => {
                    self.deliver(finished);
                    delivered += 1;
                }
                Err(_) => break,
            }
        }
        delivered
    }

    /// Block until every submitted task, including ones submitted by
    /// completions that run meanwhile, has been delivered.
    pub fn wait_idle(&self) {
        loop {
            self.update();
            if self.pending() == 0 {
                return;
            }
            let next = self.inner.results_rx.borrow_mut().blocking_recv();
            match next {
                Some(finished) => self.deliver(finished),
                None => return,
            }
        }
    }

    fn deliver(&self, finished: Finished) {
        let completion = self.inner.completions.borrow_mut().remove(&finished.id);
        let Some(completion) = completion else {
            warn!(task = %finished.id, "result for unknown task dropped");
            return;
        };
        trace!(task = %finished.id, ok = finished.result.is_ok(), "delivering completion");
        completion(match finished.result {
            Ok(value) => TaskOutcome::Done(value),
            Err(err) => TaskOutcome::Failed(err),
        });
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for DispatchInner {
    fn drop(&mut self) {
        let mut parked: Vec<_> = self.completions.get_mut().drain().collect();
        if parked.is_empty() {
            return;
        }
        warn!(count = parked.len(), "dispatcher dropped with undelivered completions");
        parked.sort_by_key(|(id, _)| *id);
        for (_, completion) in parked {
            completion(TaskOutcome::Failed(TaskError::Shutdown));
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher").field("pending", &self.pending()).finish()
    }
}
