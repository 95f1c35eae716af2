//! Single-consumer work queues.

use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::thread::{self, JoinHandle};

use folio_types::TaskId;
use tokio::sync::mpsc;
use tracing::{debug, error, trace};

use crate::dispatcher::{AnyValue, Dispatcher, Finished};
use crate::worker::WorkerContext;
use crate::{TaskError, TaskOutcome};

type Work = Box<dyn FnOnce(&mut WorkerContext) -> AnyValue + Send>;

struct Job {
    id: TaskId,
    work: Work,
}

/// One worker thread consuming jobs in submission order.
///
/// Cloning shares the queue. The worker is joined when the last clone drops,
/// after it has finished every job already queued.
#[derive(Clone)]
pub struct TaskQueue {
    inner: Rc<QueueInner>,
}

struct QueueInner {
    name: String,
    dispatcher: Dispatcher,
    jobs: Option<mpsc::UnboundedSender<Job>>,
    worker: Option<JoinHandle<()>>,
}

impl TaskQueue {
    /// Queue with its own dispatcher.
    pub fn new(name: &str) -> Self {
        Self::with_dispatcher(name, &Dispatcher::new())
    }

    /// Queue whose completions are delivered through `dispatcher`.
    pub fn with_dispatcher(name: &str, dispatcher: &Dispatcher) -> Self {
        let (jobs_tx, jobs_rx) = mpsc::unbounded_channel();
        let results = dispatcher.sender();
        let thread_name = format!("folio-{name}");
        let context_name = name.to_string();

        let worker = thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || worker_loop(WorkerContext::new(context_name), jobs_rx, results));

        let (jobs, worker) = match worker {
            Ok(handle) => (Some(jobs_tx), Some(handle)),
            Err(e) => {
                // Without a worker every submission fails with Shutdown.
                error!(queue = %thread_name, error = %e, "failed to spawn worker thread");
                (None, None)
            }
        };

        Self {
            inner: Rc::new(QueueInner {
                name: name.to_string(),
                dispatcher: dispatcher.clone(),
                jobs,
                worker,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }

    /// Run `work` on the worker, then `completion` on the owner context.
    pub fn submit<T, W, C>(&self, work: W, completion: C) -> TaskId
    where
        T: Send + 'static,
        W: FnOnce(&mut WorkerContext) -> T + Send + 'static,
        C: FnOnce(TaskOutcome<T>) + 'static,
    {
        let id = TaskId::next();
        let dispatcher = &self.inner.dispatcher;

        dispatcher.park(
            id,
            Box::new(move |outcome: TaskOutcome<AnyValue>| {
                completion(match outcome {
                    TaskOutcome::Done(value) => match value.downcast::<T>() {
                        Ok(value) => TaskOutcome::Done(*value),
                        Err(_) => TaskOutcome::Failed(TaskError::ResultType),
                    },
                    TaskOutcome::Failed(err) => TaskOutcome::Failed(err),
                })
            }),
        );

        let job = Job {
            id,
            work: Box::new(move |ctx: &mut WorkerContext| Box::new(work(ctx)) as AnyValue),
        };

        let sent = match &self.inner.jobs {
            Some(jobs) => jobs.send(job).is_ok(),
            None => false,
        };
        if sent {
            trace!(queue = %self.inner.name, task = %id, "task submitted");
        } else {
            debug!(queue = %self.inner.name, task = %id, "queue closed, failing task");
            dispatcher.fail_now(id, TaskError::Shutdown);
        }
        id
    }

    /// Pump finished tasks. See [`Dispatcher::update`].
    pub fn update(&self) -> usize {
        self.inner.dispatcher.update()
    }

    /// See [`Dispatcher::wait_idle`].
    pub fn wait_idle(&self) {
        self.inner.dispatcher.wait_idle()
    }

    pub fn pending(&self) -> usize {
        self.inner.dispatcher.pending()
    }
}

impl Drop for QueueInner {
    fn drop(&mut self) {
        // Closing the job channel lets the worker drain and exit.
        self.jobs.take();
        if let Some(worker) = self.worker.take()
            && worker.join().is_err()
        {
            error!(queue = %self.name, "worker thread panicked outside a task");
        }
    }
}

impl std::fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskQueue")
            .field("name", &self.inner.name)
            .field("pending", &self.pending())
            .finish()
    }
}

fn worker_loop(
    mut ctx: WorkerContext,
    mut jobs: mpsc::UnboundedReceiver<Job>,
    results: mpsc::UnboundedSender<Finished>,
) {
    debug!(worker = %ctx.id(), name = ctx.name(), "worker started");
    while let Some(Job { id, work }) = jobs.blocking_recv() {
        let result = panic::catch_unwind(AssertUnwindSafe(|| work(&mut ctx)))
            .map_err(|payload| TaskError::Panicked(panic_message(payload.as_ref())));
        if let Err(TaskError::Panicked(msg)) = &result {
            error!(worker = %ctx.id(), task = %id, panic = %msg, "task panicked");
        }
        if results.send(Finished { id, result }).is_err() {
            debug!(worker = %ctx.id(), "owner gone, worker exiting");
            break;
        }
    }
    debug!(worker = %ctx.id(), name = ctx.name(), "worker stopped");
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::time::Duration;

    #[test]
    fn completion_runs_on_owner_with_value() {
        let queue = TaskQueue::new("test");
        let owner = thread::current().id();
        let seen = Rc::new(RefCell::new(None));

        let s = seen.clone();
        queue.submit(
            |_ctx| (thread::current().name().map(String::from), 6 * 7),
            move |outcome| {
                assert_eq!(thread::current().id(), owner);
                *s.borrow_mut() = Some(outcome);
            },
        );
        assert_eq!(queue.pending(), 1);
        queue.wait_idle();
        assert_eq!(queue.pending(), 0);

        let outcome = seen.borrow_mut().take().unwrap();
        assert_eq!(outcome, TaskOutcome::Done((Some("folio-test".to_string()), 42)));
    }

    #[test]
    fn completions_fifo_per_queue() {
        let queue = TaskQueue::new("fifo");
        let order = Rc::new(RefCell::new(Vec::new()));
        for i in 0..20u32 {
            let o = order.clone();
            queue.submit(
                move |_| {
                    // Later tasks finish faster; order must still hold.
                    thread::sleep(Duration::from_micros(u64::from(20 - i) * 50));
                    i
                },
                move |outcome| o.borrow_mut().push(outcome.into_result().unwrap()),
            );
        }
        queue.wait_idle();
        assert_eq!(*order.borrow(), (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn panic_becomes_failed_outcome() {
        let queue = TaskQueue::new("panic");
        let seen = Rc::new(RefCell::new(None));
        let s = seen.clone();
        queue.submit(
            |_| -> u32 { panic!("glyph exploded") },
            move |outcome| *s.borrow_mut() = Some(outcome),
        );
        queue.wait_idle();
        assert_eq!(
            seen.borrow_mut().take(),
            Some(TaskOutcome::Failed(TaskError::Panicked("glyph exploded".into())))
        );

        // The worker survives the panic.
        let s = seen.clone();
        queue.submit(|_| 1u32, move |outcome| *s.borrow_mut() = Some(outcome));
        queue.wait_idle();
        assert_eq!(seen.borrow_mut().take(), Some(TaskOutcome::Done(1)));
    }

    #[test]
    fn wait_idle_follows_chained_submissions() {
        let queue = TaskQueue::new("chain");
        let total = Rc::new(RefCell::new(0u32));

        let q = queue.clone();
        let t = total.clone();
        queue.submit(
            |_| 1u32,
            move |first| {
                let first = first.into_result().unwrap();
                let t = t.clone();
                q.submit(move |_| first + 1, move |second| {
                    *t.borrow_mut() = second.into_result().unwrap();
                });
            },
        );
        queue.wait_idle();
        assert_eq!(*total.borrow(), 2);
    }

    #[test]
    fn worker_context_persists_between_tasks() {
        let queue = TaskQueue::new("ctx");
        let seen = Rc::new(RefCell::new(Vec::new()));
        for _ in 0..3 {
            let s = seen.clone();
            queue.submit(
                |ctx| {
                    let id = ctx.id();
                    let hits = ctx.get_or_insert_with(|| 0u32);
                    *hits += 1;
                    (id, *hits)
                },
                move |outcome| s.borrow_mut().push(outcome.into_result().unwrap()),
            );
        }
        queue.wait_idle();
        let seen = seen.borrow();
        assert!(seen.iter().all(|(id, _)| *id == seen[0].0));
        assert_eq!(seen.iter().map(|(_, n)| *n).collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn queues_share_a_dispatcher() {
        let dispatcher = Dispatcher::new();
        let a = TaskQueue::with_dispatcher("a", &dispatcher);
        let b = TaskQueue::with_dispatcher("b", &dispatcher);
        let count = Rc::new(RefCell::new(0));
        for queue in [&a, &b] {
            let c = count.clone();
            queue.submit(|_| (), move |_| *c.borrow_mut() += 1);
        }
        assert_eq!(dispatcher.pending(), 2);
        dispatcher.wait_idle();
        assert_eq!(*count.borrow(), 2);
    }

    #[test]
    fn dropping_dispatcher_fails_parked_completions() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        {
            let queue = TaskQueue::new("drop");
            for _ in 0..2 {
                let s = seen.clone();
                queue.submit(|_| 5u8, move |outcome| s.borrow_mut().push(outcome));
            }
            // Never pumped.
        }
        assert_eq!(
            *seen.borrow(),
            vec![
                TaskOutcome::Failed(TaskError::Shutdown),
                TaskOutcome::Failed(TaskError::Shutdown)
            ]
        );
    }
}
