//! The scheduler surface: queue-insertion points for deferred watcher jobs.
//!
//! The core only decides *what* to enqueue; when queues flush belongs to
//! the host. A host integrates by installing [`SchedulerHooks`] that route
//! jobs into its own queues. Without hooks, jobs land in in-process default
//! queues drained by [`flush_jobs`] and [`flush_post_jobs`], which is what
//! the tests and any standalone embedding use.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// A schedulable unit of work.
///
/// Jobs are cheap handles; clones share the same underlying closure, and
/// the default queues deduplicate on it.
#[derive(Clone)]
pub struct Job {
    id: Option<u64>,
    pre: bool,
    allow_recurse: bool,
    run: Rc<dyn Fn()>,
}

impl Job {
    /// Creates a job. `id` is the owning instance's id, used to order the
    /// pre-flush queue; `pre` marks jobs that must run before render.
    pub fn new(id: Option<u64>, pre: bool, run: Rc<dyn Fn()>) -> Self {
        Job {
            id,
            pre,
            allow_recurse: false,
            run,
        }
    }

    /// Marks the job as allowed to re-queue itself from its own run.
    pub fn with_allow_recurse(mut self) -> Self {
        self.allow_recurse = true;
        self
    }

    /// The owning instance's id, if any.
    pub fn id(&self) -> Option<u64> {
        self.id
    }

    /// Whether this is a pre-flush job.
    pub fn pre(&self) -> bool {
        self.pre
    }

    /// Whether the job may re-queue itself from its own run.
    pub fn allow_recurse(&self) -> bool {
        self.allow_recurse
    }

    /// Runs the job.
    pub fn run(&self) {
        (self.run)();
    }

    fn same(&self, other: &Job) -> bool {
        Rc::ptr_eq(&self.run, &other.run)
    }
}

/// External queue-insertion points installed by a host.
pub struct SchedulerHooks {
    /// Receives pre-flush (and plain) jobs.
    pub queue_job: Box<dyn Fn(Job)>,
    /// Receives post-flush jobs.
    pub queue_post: Box<dyn Fn(Job)>,
}

struct SchedulerState {
    hooks: RefCell<Option<SchedulerHooks>>,
    queue: RefCell<Vec<Job>>,
    post_queue: RefCell<Vec<Job>>,
    instance: Cell<Option<u64>>,
}

thread_local! {
    static SCHEDULER: SchedulerState = SchedulerState {
        hooks: RefCell::new(None),
        queue: RefCell::new(Vec::new()),
        post_queue: RefCell::new(Vec::new()),
        instance: Cell::new(None),
    };
}

/// Installs host queue hooks. Jobs enqueued afterwards are routed to the
/// host instead of the default queues.
pub fn set_scheduler_hooks(hooks: SchedulerHooks) {
    SCHEDULER.with(|s| *s.hooks.borrow_mut() = Some(hooks));
}

/// Removes host queue hooks, falling back to the default queues.
pub fn clear_scheduler_hooks() {
    SCHEDULER.with(|s| *s.hooks.borrow_mut() = None);
}

/// Sets the id reported as the current owner instance. Pre-flush watcher
/// jobs created while set carry it so the queue can order them.
pub fn set_current_instance(id: Option<u64>) {
    SCHEDULER.with(|s| s.instance.set(id));
}

/// The id of the current owner instance, if any.
pub fn current_instance() -> Option<u64> {
    SCHEDULER.with(|s| s.instance.get())
}

/// Enqueues a job on the pre/main queue, deduplicating unless the job
/// allows recursion.
pub fn queue_job(job: Job) {
    SCHEDULER.with(|s| {
        if let Some(hooks) = &*s.hooks.borrow() {
            (hooks.queue_job)(job);
            return;
        }
        let mut queue = s.queue.borrow_mut();
        if job.allow_recurse() || !queue.iter().any(|j| j.same(&job)) {
            queue.push(job);
        }
    });
}

/// Enqueues a job on the post queue.
pub fn queue_post(job: Job) {
    SCHEDULER.with(|s| {
        if let Some(hooks) = &*s.hooks.borrow() {
            (hooks.queue_post)(job);
            return;
        }
        let mut queue = s.post_queue.borrow_mut();
        if job.allow_recurse() || !queue.iter().any(|j| j.same(&job)) {
            queue.push(job);
        }
    });
}

const MAX_FLUSH_ROUNDS: usize = 100;

fn drain(queue: &RefCell<Vec<Job>>, ordered: bool) {
    for _ in 0..MAX_FLUSH_ROUNDS {
        let mut jobs = std::mem::take(&mut *queue.borrow_mut());
        if jobs.is_empty() {
            return;
        }
        if ordered {
            // Jobs of the same owner run in id order; ownerless jobs last.
            jobs.sort_by_key(|j| j.id().unwrap_or(u64::MAX));
        }
        for job in jobs {
            job.run();
        }
    }
    tracing::warn!("job queue did not settle; giving up on this flush");
}

/// Drains the default pre/main queue in id order, repeating until no job
/// re-queues. Stands in for the host's pre-render flush.
pub fn flush_jobs() {
    SCHEDULER.with(|s| drain(&s.queue, true));
}

/// Drains the default post queue in insertion order.
pub fn flush_post_jobs() {
    SCHEDULER.with(|s| drain(&s.post_queue, false));
}
