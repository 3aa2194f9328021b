//! Job scheduler for smarthome
//!
//! The [`Scheduler`] keeps named entries (items with `crontab`/`cycle`,
//! logics, plain methods), a priority run queue and a delayed trigger
//! queue. A dedicated loop thread wakes every tick to:
//!
//! 1. grow the worker pool when the backlog exceeds the worker count,
//! 2. move due delayed triggers onto the run queue,
//! 3. enqueue active entries whose next time has passed.
//!
//! Worker threads pop the run queue in `(priority, insertion)` order and
//! run each task on their own thread. Task failures and panics are logged
//! and never affect other tasks.

mod crontab;
mod error;
mod job;
mod panics;
mod queue;
mod sun;
mod target;

pub use crontab::CronSpec;
pub use error::{SchedulerError, SchedulerResult, TaskError};
pub use job::{after_seconds, far_future, Change, Dispatch, EntryInfo, Job, DEFAULT_INIT_OFFSET, DEFAULT_PRIORITY};
pub use queue::{RunQueue, TriggerQueue};
pub use sun::{is_sun_expr, Sun, SunEvent, SunExpr, SunOffset, SunSource};
pub use target::{Invoke, MethodFn, Target, Task};

use chrono::{DateTime, Duration, Local};
use indexmap::IndexMap;
use sh_config::SchedulerSettings;
use sh_core::{callers, SharedClock, Trigger};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration as StdDuration, Instant};
use tracing::{debug, error, info, instrument, trace, warn};

use job::{cycle_rule, parse_cron, random_offset, Entry};
use panics::contain;

/// Shared scheduler handle
pub type SharedScheduler = Arc<Scheduler>;

/// How long an idle worker waits on the run queue before re-checking shutdown
const WORKER_POLL: StdDuration = StdDuration::from_secs(1);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Priority scheduler with a growing worker pool
pub struct Scheduler {
    settings: SchedulerSettings,
    clock: SharedClock,
    sun: Option<Arc<dyn SunSource>>,
    entries: Mutex<IndexMap<String, Entry>>,
    runq: RunQueue,
    triggerq: TriggerQueue,
    alive: AtomicBool,
    workers: AtomicUsize,
    busy: AtomicUsize,
    last_growth: Mutex<DateTime<Local>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    /// Create a scheduler; nothing runs until [`start`](Self::start)
    pub fn new(settings: SchedulerSettings, clock: SharedClock) -> Self {
        let now = clock.now();
        Self {
            settings,
            clock,
            sun: None,
            entries: Mutex::new(IndexMap::new()),
            runq: RunQueue::new(),
            triggerq: TriggerQueue::new(),
            alive: AtomicBool::new(false),
            workers: AtomicUsize::new(0),
            busy: AtomicUsize::new(0),
            last_growth: Mutex::new(now),
            threads: Mutex::new(Vec::new()),
        }
    }

    /// Resolve sunrise/sunset expressions with this source
    pub fn with_sun(mut self, sun: Arc<dyn SunSource>) -> Self {
        self.sun = Some(sun);
        self
    }

    pub fn now(&self) -> DateTime<Local> {
        self.clock.now()
    }

    /// Register or replace an entry
    ///
    /// An `init` crontab entry fires once shortly after registration. A
    /// cycle-only entry without an explicit offset starts after a random
    /// 10-15 s delay.
    #[instrument(skip(self, job), fields(job = %job.name))]
    pub fn add(&self, job: Job) {
        let Job {
            name,
            target,
            priority,
            cron,
            cycle,
            value,
            offset,
            next,
        } = job;
        let now = self.now();

        let parsed = parse_cron(&name, &cron);
        let mut cycle = cycle.as_ref().map(|c| cycle_rule(&name, c));
        if let Some(cycle) = cycle.as_mut() {
            if cycle.value.is_none() {
                cycle.value = value.clone();
            }
        }

        let (next, value) = match parsed.init {
            Some((init_offset, init_value)) => (
                Some(after_seconds(&name, now, init_offset)),
                init_value.or(value),
            ),
            None => (next, value),
        };
        let offset = match offset {
            None if parsed.rules.is_empty() && next.is_none() && cycle.is_some() => {
                Some(random_offset())
            }
            other => other,
        };

        let mut entry = Entry {
            target,
            priority,
            cron: parsed.rules,
            cycle,
            value,
            next,
            active: true,
        };
        if entry.next.is_none() {
            entry.compute_next(&name, now, offset, self.sun.as_deref());
        }

        debug!(kind = entry.target.kind(), priority, next = ?entry.next, "Adding scheduler entry");
        if lock(&self.entries).insert(name, entry).is_some() {
            debug!("Replaced existing scheduler entry");
        }
    }

    /// Remove an entry; returns whether it existed
    pub fn remove(&self, name: &str) -> bool {
        let removed = lock(&self.entries).shift_remove(name).is_some();
        if removed {
            debug!(job = %name, "Removed scheduler entry");
        }
        removed
    }

    /// Queue a run of an entry or of an explicit target
    ///
    /// Without [`Dispatch::at`] the task goes straight onto the run queue;
    /// with it, onto the delayed trigger queue. Triggers for deactivated
    /// entries are dropped. Returns whether the task was queued.
    pub fn trigger(&self, dispatch: Dispatch) -> bool {
        let Dispatch {
            name,
            target,
            trigger,
            priority,
            at,
        } = dispatch;

        let target = {
            let entries = lock(&self.entries);
            match (entries.get(&name), target) {
                (Some(entry), _) if !entry.active => {
                    debug!(job = %name, caller = %trigger.caller, source = ?trigger.source, "Entry deactivated, ignoring trigger");
                    return false;
                }
                (_, Some(target)) => target,
                (Some(entry), None) => entry.target.clone(),
                (None, None) => {
                    warn!(job = %name, "Trigger for unknown scheduler entry");
                    return false;
                }
            }
        };

        let task = Task {
            priority,
            name,
            target,
            trigger,
        };
        match at {
            None => {
                debug!(
                    job = %task.name,
                    caller = %task.trigger.caller,
                    source = ?task.trigger.source,
                    dest = ?task.trigger.dest,
                    value = %preview(task.trigger.value.as_ref()),
                    "Triggering"
                );
                self.runq.push(task);
            }
            Some(at) => {
                trace!(job = %task.name, at = %at, "Delaying trigger");
                self.triggerq.push(at, task);
            }
        }
        true
    }

    /// Change an entry's scheduling at runtime
    ///
    /// The next time is recomputed right away, unless the entry is being
    /// deactivated (next becomes `None`) or an explicit next is given.
    pub fn change(&self, name: &str, change: Change) -> SchedulerResult<()> {
        let now = self.now();
        let mut entries = lock(&self.entries);
        let entry = entries
            .get_mut(name)
            .ok_or_else(|| SchedulerError::UnknownEntry {
                name: name.to_string(),
            })?;

        if let Some(active) = change.active {
            if active != entry.active {
                info!(job = %name, active, "{} scheduler entry", if active { "Activating" } else { "Deactivating" });
            }
            entry.active = active;
        }
        if let Some(priority) = change.priority {
            entry.priority = priority;
        }
        let mut explicit_next = change.next;
        if let Some(cron) = change.cron {
            let parsed = parse_cron(name, &cron);
            entry.cron = parsed.rules;
            if let Some((offset, value)) = parsed.init {
                explicit_next = explicit_next.or(Some(after_seconds(name, now, offset)));
                if value.is_some() {
                    entry.value = value;
                }
            }
        }
        if let Some(cycle) = change.cycle {
            entry.cycle = cycle.as_ref().map(|c| cycle_rule(name, c));
        }
        if let Some(value) = change.value {
            entry.value = Some(value);
        }

        if !entry.active {
            entry.next = None;
        } else if let Some(next) = explicit_next {
            entry.next = Some(next);
        } else {
            entry.next = None;
            entry.compute_next(name, now, None, self.sun.as_deref());
        }
        Ok(())
    }

    /// Next fire time of an entry
    pub fn return_next(&self, name: &str) -> Option<DateTime<Local>> {
        lock(&self.entries).get(name).and_then(|e| e.next)
    }

    pub fn get(&self, name: &str) -> Option<EntryInfo> {
        lock(&self.entries)
            .get(name)
            .map(|entry| EntryInfo::from_entry(name, entry))
    }

    pub fn contains(&self, name: &str) -> bool {
        lock(&self.entries).contains_key(name)
    }

    /// Entry names in registration order
    pub fn names(&self) -> Vec<String> {
        lock(&self.entries).keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Tasks waiting on the run queue
    pub fn backlog(&self) -> usize {
        self.runq.len()
    }

    /// Tasks waiting on the delayed trigger queue
    pub fn delayed(&self) -> usize {
        self.triggerq.len()
    }

    /// Worker threads started so far
    pub fn workers(&self) -> usize {
        self.workers.load(Ordering::SeqCst)
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// One scheduler pass without the worker-growth step
    ///
    /// Moves due delayed triggers onto the run queue, enqueues active
    /// entries whose next time has passed and recomputes the next time of
    /// entries that fired on the previous pass.
    pub fn tick(&self) {
        let now = self.now();
        for task in self.triggerq.drain_due(now) {
            self.runq.push(task);
        }

        let mut entries = lock(&self.entries);
        for (name, entry) in entries.iter_mut() {
            if !entry.active {
                continue;
            }
            match entry.next {
                Some(next) if next <= now => {
                    let mut trigger = Trigger::new(callers::SCHEDULER);
                    trigger.value = entry.value.clone();
                    self.runq.push(Task {
                        priority: entry.priority,
                        name: name.clone(),
                        target: entry.target.clone(),
                        trigger,
                    });
                    entry.next = None;
                }
                Some(_) => {}
                None if entry.has_schedule() => {
                    entry.compute_next(name, now, None, self.sun.as_deref());
                }
                None => {}
            }
        }
    }

    /// Run every queued task on the calling thread, returning how many ran
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        while let Some(task) = self.runq.try_pop() {
            self.execute(task);
            ran += 1;
        }
        ran
    }

    /// Start the worker pool and the scheduler loop
    pub fn start(self: &Arc<Self>) -> SchedulerResult<()> {
        if self.alive.swap(true, Ordering::SeqCst) {
            warn!("Scheduler already running");
            return Ok(());
        }
        info!(workers = self.settings.workers, max_workers = self.settings.max_workers, "Starting scheduler");
        *lock(&self.last_growth) = self.now();

        for _ in 0..self.settings.workers {
            self.spawn_worker()?;
        }

        let scheduler = Arc::clone(self);
        let handle = thread::Builder::new()
            .name("scheduler".to_string())
            .spawn(move || scheduler.run_loop())
            .map_err(|source| SchedulerError::Spawn {
                name: "scheduler".to_string(),
                source,
            })?;
        lock(&self.threads).push(handle);
        Ok(())
    }

    /// Stop the loop and the workers, waiting up to the configured timeout
    pub fn stop(&self) {
        if !self.alive.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("Stopping scheduler");
        self.runq.wake_all();

        let current = thread::current().id();
        let now = Instant::now();
        let deadline = now
            .checked_add(StdDuration::from_secs(self.settings.stop_timeout))
            .unwrap_or(now);
        let mut pending: Vec<JoinHandle<()>> = lock(&self.threads)
            .drain(..)
            .filter(|h| h.thread().id() != current)
            .collect();

        while !pending.is_empty() && Instant::now() < deadline {
            let (finished, running): (Vec<_>, Vec<_>) =
                pending.into_iter().partition(|h| h.is_finished());
            for handle in finished {
                let name = handle.thread().name().unwrap_or("unnamed").to_string();
                if handle.join().is_err() {
                    warn!(thread = %name, "Scheduler thread panicked");
                }
            }
            pending = running;
            if !pending.is_empty() {
                thread::sleep(StdDuration::from_millis(20));
            }
        }

        if !pending.is_empty() {
            let names: Vec<&str> = pending
                .iter()
                .map(|h| h.thread().name().unwrap_or("unnamed"))
                .collect();
            warn!(threads = ?names, "Threads still busy after stop timeout, detaching them");
        }
    }

    fn run_loop(self: Arc<Self>) {
        let tick = StdDuration::from_millis(self.settings.tick_ms);
        debug!(tick_ms = self.settings.tick_ms, "Scheduler loop running");
        while self.is_alive() {
            if let Err(report) = contain(|| {
                self.grow();
                self.tick();
            }) {
                error!(
                    thread = %report.thread,
                    panic = %report.message,
                    backtrace = %report.backtrace,
                    "Scheduler pass panicked"
                );
            }
            thread::sleep(tick);
        }
        debug!("Scheduler loop exited");
    }

    /// Add one worker when the backlog exceeds the pool, at most once per
    /// growth interval and never beyond the cap
    fn grow(self: &Arc<Self>) {
        let backlog = self.runq.len();
        let workers = self.workers();
        if backlog <= workers {
            return;
        }

        let now = self.now();
        {
            let mut last = lock(&self.last_growth);
            let interval = i64::try_from(self.settings.worker_growth_interval)
                .ok()
                .and_then(Duration::try_seconds)
                .unwrap_or(Duration::MAX);
            if now - *last < interval {
                return;
            }
            *last = now;
        }

        if workers >= self.settings.max_workers {
            error!(
                max_workers = self.settings.max_workers,
                backlog, "Needing more worker threads than the configured maximum"
            );
            let busy = self.busy.load(Ordering::SeqCst);
            info!(
                workers,
                busy,
                idle = workers.saturating_sub(busy),
                backlog,
                delayed = self.triggerq.len(),
                entries = self.len(),
                "Thread accounting"
            );
            return;
        }

        info!(workers = workers + 1, backlog, "Adding worker thread");
        if let Err(e) = self.spawn_worker() {
            error!(error = %e, "Could not add worker thread");
        }
    }

    fn spawn_worker(self: &Arc<Self>) -> SchedulerResult<()> {
        let id = self.workers.fetch_add(1, Ordering::SeqCst) + 1;
        let name = format!("worker-{id}");
        let scheduler = Arc::clone(self);
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || scheduler.worker_loop())
            .map_err(|source| {
                self.workers.fetch_sub(1, Ordering::SeqCst);
                SchedulerError::Spawn { name, source }
            })?;
        lock(&self.threads).push(handle);
        Ok(())
    }

    fn worker_loop(&self) {
        while self.is_alive() {
            if let Some(task) = self.runq.pop_timeout(WORKER_POLL) {
                self.execute(task);
            }
        }
    }

    fn execute(&self, task: Task) {
        self.busy.fetch_add(1, Ordering::SeqCst);
        trace!(job = %task.name, kind = task.target.kind(), "Running task");

        match contain(|| task.run()) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(
                job = %task.name,
                caller = %task.trigger.caller,
                source = ?task.trigger.source,
                dest = ?task.trigger.dest,
                error = %e,
                "Task failed"
            ),
            Err(report) => error!(
                job = %task.name,
                caller = %task.trigger.caller,
                source = ?task.trigger.source,
                dest = ?task.trigger.dest,
                thread = %report.thread,
                panic = %report.message,
                backtrace = %report.backtrace,
                "Task panicked"
            ),
        }

        self.busy.fetch_sub(1, Ordering::SeqCst);
    }
}

fn preview(value: Option<&sh_core::Value>) -> String {
    match value {
        None => "None".to_string(),
        Some(v) => v.to_string().chars().take(40).collect(),
    }
}
