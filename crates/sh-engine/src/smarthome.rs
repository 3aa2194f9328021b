//! The runtime environment
//!
//! [`SmartHome`] owns the scheduler, the item registry, the logics and the
//! plugins. It is built once at startup and shared as `Arc<SmartHome>`;
//! items and logics keep a weak reference back to it.
//!
//! Startup order:
//!
//! 1. [`SmartHome::add_plugin`] for every plugin
//! 2. [`SmartHome::load_items`]
//! 3. [`SmartHome::load_logics`] / [`SmartHome::add_logic`]
//! 4. [`SmartHome::start`]

use chrono::{DateTime, Local};
use indexmap::IndexMap;
use sh_config::{ItemDefinition, LogicDefinition, SmartHomeConfig};
use sh_core::{callers, SharedClock, SystemClock, Trigger};
use sh_scheduler::{Dispatch, Job, Scheduler, SchedulerError, SchedulerResult, SharedScheduler, Sun, Target};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::cache::ValueCache;
use crate::error::LogicError;
use crate::item::{Dependent, EvalRun, Item};
use crate::logic::{Logic, LogicRunner, ScriptRunner};
use crate::plugin::SharedPlugin;
use crate::registry::ItemRegistry;

/// Name of the scheduler entry polling plugin transports
pub const CONNECTIONS_JOB: &str = "Connections";

/// Seconds between plugin transport checks
const CONNECTIONS_CYCLE: i64 = 10;

pub struct SmartHome {
    me: Weak<SmartHome>,
    config: SmartHomeConfig,
    clock: SharedClock,
    scheduler: SharedScheduler,
    items: ItemRegistry,
    logics: RwLock<IndexMap<String, Arc<Logic>>>,
    plugins: RwLock<Vec<SharedPlugin>>,
    plugin_threads: Mutex<Vec<JoinHandle<()>>>,
    cache: ValueCache,
}

impl SmartHome {
    /// Build an environment on the system clock
    pub fn new(config: SmartHomeConfig) -> Arc<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: SmartHomeConfig, clock: SharedClock) -> Arc<Self> {
        let mut scheduler = Scheduler::new(config.scheduler.clone(), clock.clone());
        match config.smarthome.location() {
            Some((latitude, longitude)) => {
                scheduler = scheduler.with_sun(Arc::new(Sun::new(
                    latitude,
                    longitude,
                    config.smarthome.elevation,
                )));
            }
            None => debug!("No location configured, sun expressions are disabled"),
        }
        let cache = ValueCache::new(config.smarthome.cache_dir.clone());

        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            config,
            clock,
            scheduler: Arc::new(scheduler),
            items: ItemRegistry::new(),
            logics: RwLock::new(IndexMap::new()),
            plugins: RwLock::new(Vec::new()),
            plugin_threads: Mutex::new(Vec::new()),
            cache,
        })
    }

    pub fn config(&self) -> &SmartHomeConfig {
        &self.config
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    pub fn now(&self) -> DateTime<Local> {
        self.clock.now()
    }

    pub fn scheduler(&self) -> &SharedScheduler {
        &self.scheduler
    }

    pub fn items(&self) -> &ItemRegistry {
        &self.items
    }

    pub fn cache(&self) -> &ValueCache {
        &self.cache
    }

    // ==================== Plugins ====================

    /// Register a plugin; it sees every item and logic loaded afterwards
    pub fn add_plugin(&self, plugin: SharedPlugin) {
        info!(plugin = %plugin.name(), "Adding plugin");
        self.plugins
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(plugin);
    }

    pub fn plugins(&self) -> Vec<SharedPlugin> {
        self.plugins.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    // ==================== Items ====================

    /// Build, register and wire the item tree; returns the number of items
    ///
    /// Items failing to build or duplicating a path are logged and
    /// skipped. Wiring runs after all items exist, so `eval_trigger`
    /// patterns may refer to items defined anywhere in the tree. Plugins
    /// parse items after wiring, with their `eval` compiled.
    pub fn load_items(&self, definitions: &[ItemDefinition]) -> usize {
        let mut loaded = Vec::new();
        for def in definitions {
            let root = match Item::from_definition(def, &self.me, &self.clock, &self.cache) {
                Ok(root) => root,
                Err(e) => {
                    error!(item = %def.path, error = %e, "Skipping item");
                    continue;
                }
            };
            root.walk(&mut |item| match self.items.insert(item.clone()) {
                Ok(()) => loaded.push(item.clone()),
                Err(e) => error!(item = %item.path(), error = %e, "Skipping item"),
            });
        }

        for item in &loaded {
            self.wire_item(item);
        }

        let plugins = self.plugins();
        for item in &loaded {
            for plugin in &plugins {
                if let Some(hook) = plugin.parse_item(item) {
                    debug!(item = %item.path(), plugin = %plugin.name(), "Attached method hook");
                    item.add_hook(hook);
                }
            }
        }

        for item in &loaded {
            self.init_eval(item);
        }

        info!(count = loaded.len(), "Loaded items");
        loaded.len()
    }

    fn wire_item(&self, item: &Arc<Item>) {
        let mut sources = Vec::new();
        for pattern in item.eval_trigger() {
            let matched = self.items.match_items(pattern);
            if matched.is_empty() {
                warn!(item = %item.path(), pattern = %pattern, "eval_trigger matches no items");
            }
            for source in matched {
                if Arc::ptr_eq(&source, item) {
                    continue;
                }
                if source.add_dependent(Dependent::Item(Arc::downgrade(item))) {
                    sources.push(source.path().to_string());
                }
            }
        }

        if let Some(expr) = item.prepare_eval(&sources) {
            for path in expr.item_refs() {
                if !self.items.contains(&path) {
                    warn!(item = %item.path(), reference = %path, "eval refers to an unknown item");
                }
            }
        }

        if !item.crontab().is_empty() || item.cycle().is_some() {
            let mut job = Job::new(item.path(), Target::Item(item.clone())).cron(item.crontab().to_vec());
            if let Some(cycle) = item.cycle() {
                job = job.cycle(cycle.clone());
            }
            self.scheduler.add(job);
        }
    }

    /// Queue the startup evaluation of an item with `eval` and `eval_trigger`
    fn init_eval(&self, item: &Arc<Item>) {
        if item.eval_expression().is_none() || item.eval_trigger().is_empty() {
            return;
        }
        self.scheduler.trigger(
            Dispatch::new(item.path())
                .target(Target::Item(Arc::new(EvalRun(item.clone()))))
                .by(callers::INIT)
                .value(item.get()),
        );
    }

    /// Item at `path`
    pub fn return_item(&self, path: &str) -> Option<Arc<Item>> {
        self.items.get(path)
    }

    /// All items in config order
    pub fn return_items(&self) -> Vec<Arc<Item>> {
        self.items.all()
    }

    pub fn match_items(&self, pattern: &str) -> Vec<Arc<Item>> {
        self.items.match_items(pattern)
    }

    pub fn find_items(&self, attr: &str) -> Vec<Arc<Item>> {
        self.items.find_items(attr)
    }

    pub fn find_children(&self, parent: &Item, attr: &str) -> Vec<Arc<Item>> {
        self.items.find_children(parent, attr)
    }

    // ==================== Logics ====================

    /// Register a logic with the given runner
    ///
    /// The logic becomes a dependent of every item its `watch_item`
    /// patterns match and gets a scheduler entry with its priority,
    /// crontab and cycle.
    pub fn add_logic(&self, def: LogicDefinition, runner: Arc<dyn LogicRunner>) -> Arc<Logic> {
        let logic = Logic::new(def, runner, self.me.clone(), self.clock.clone());

        for pattern in logic.watch_item() {
            let matched = self.items.match_items(pattern);
            if matched.is_empty() {
                warn!(logic = %logic.name(), pattern = %pattern, "watch_item matches no items");
            }
            for item in matched {
                item.add_dependent(Dependent::Logic(Arc::downgrade(&logic)));
            }
        }

        let mut job = Job::new(logic.name(), Target::Logic(logic.clone()))
            .priority(logic.prio())
            .cron(logic.crontab().to_vec());
        if let Some(cycle) = logic.cycle() {
            job = job.cycle(cycle.clone());
        }
        self.scheduler.add(job);

        for plugin in self.plugins() {
            plugin.parse_logic(&logic);
        }

        let previous = self
            .logics
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(logic.name().to_string(), logic.clone());
        if previous.is_some() {
            warn!(logic = %logic.name(), "Replaced logic with the same name");
        }
        debug!(logic = %logic.name(), prio = logic.prio(), "Added logic");
        logic
    }

    /// Register script logics, reading each from the logics directory
    ///
    /// Logics without a readable `filename` are logged and skipped.
    pub fn load_logics(&self, definitions: Vec<LogicDefinition>) -> usize {
        let mut loaded = 0;
        for def in definitions {
            let runner = match &def.filename {
                None => Err(LogicError::NoSource {
                    name: def.name.clone(),
                }),
                Some(filename) => ScriptRunner::load(
                    &def.name,
                    self.config.smarthome.logics_dir.join(filename),
                    def.interpreter.clone(),
                ),
            };
            match runner {
                Ok(runner) => {
                    self.add_logic(def, Arc::new(runner));
                    loaded += 1;
                }
                Err(e) => error!(logic = %def.name, error = %e, "Skipping logic"),
            }
        }
        info!(count = loaded, "Loaded logics");
        loaded
    }

    /// Re-read every logic's source; returns how many reloaded
    pub fn reload_logics(&self) -> usize {
        let mut reloaded = 0;
        for logic in self.return_logics() {
            match logic.reload() {
                Ok(()) => reloaded += 1,
                Err(e) => error!(logic = %logic.name(), error = %e, "Failed to reload logic"),
            }
        }
        reloaded
    }

    pub fn return_logic(&self, name: &str) -> Option<Arc<Logic>> {
        self.logics
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    /// All logics in registration order
    pub fn return_logics(&self) -> Vec<Arc<Logic>> {
        self.logics
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect()
    }

    /// Queue a scheduler run; see [`Scheduler::trigger`]
    pub fn trigger(&self, dispatch: Dispatch) -> bool {
        self.scheduler.trigger(dispatch)
    }

    // ==================== Lifecycle ====================

    /// Start plugin threads, the transport check and the scheduler
    pub fn start(&self) -> SchedulerResult<()> {
        let plugins = self.plugins();
        if !plugins.is_empty() {
            let checked = plugins.clone();
            self.scheduler.add(
                Job::new(
                    CONNECTIONS_JOB,
                    Target::method(move |_: &Trigger| {
                        for plugin in &checked {
                            plugin.check();
                        }
                        Ok(())
                    }),
                )
                .cycle(CONNECTIONS_CYCLE)
                .offset(0),
            );
        }

        for plugin in plugins {
            let name = format!("plugin-{}", plugin.name());
            let handle = thread::Builder::new()
                .name(name.clone())
                .spawn(move || {
                    debug!(plugin = %plugin.name(), "Plugin running");
                    plugin.run();
                })
                .map_err(|source| SchedulerError::Spawn { name, source })?;
            self.plugin_threads
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(handle);
        }

        info!(
            name = %self.config.smarthome.name,
            items = self.items.len(),
            logics = self.return_logics().len(),
            "Starting"
        );
        self.scheduler.start()
    }

    /// Stop plugins and the scheduler, joining threads with a timeout
    pub fn stop(&self) {
        info!("Stopping");
        for plugin in self.plugins() {
            plugin.stop();
        }
        self.scheduler.stop();

        let deadline = Instant::now() + Duration::from_secs(self.config.scheduler.stop_timeout);
        let mut pending: Vec<JoinHandle<()>> = self
            .plugin_threads
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        while !pending.is_empty() && Instant::now() < deadline {
            let (finished, running): (Vec<_>, Vec<_>) =
                pending.into_iter().partition(|h| h.is_finished());
            for handle in finished {
                let name = handle.thread().name().unwrap_or("plugin").to_string();
                if handle.join().is_err() {
                    warn!(thread = %name, "Plugin thread panicked");
                }
            }
            pending = running;
            if !pending.is_empty() {
                thread::sleep(Duration::from_millis(20));
            }
        }
        for handle in pending {
            warn!(thread = %handle.thread().name().unwrap_or("plugin"), "Plugin thread did not stop in time");
        }
    }
}

impl std::fmt::Debug for SmartHome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmartHome")
            .field("name", &self.config.smarthome.name)
            .field("items", &self.items.len())
            .field("scheduler", &self.scheduler.len())
            .finish()
    }
}
