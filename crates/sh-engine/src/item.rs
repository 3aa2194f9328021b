//! Items: typed value nodes of the smarthome tree
//!
//! An [`Item`] owns its children and its current value. Every update goes
//! through one path: the value is cast to the item's type, stored under the
//! item lock, and only after the lock is released are method hooks,
//! dependent items, watching logics, the value cache and the autotimer
//! processed.
//!
//! Dependent items re-evaluate asynchronously through the scheduler's run
//! queue, so a chain of `eval_trigger` items never recurses on the caller's
//! stack.

use chrono::{DateTime, Duration as ChronoDuration, Local};
use indexmap::IndexMap;
use sh_config::{string_list, ItemDefinition};
use sh_core::{callers, cast, type_default, values_equal, ItemType, SharedClock, Trigger, Value};
use sh_scheduler::{after_seconds, Dispatch, Invoke, Job, Target, TaskError};
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, RwLock, Weak};
use std::time::Duration;
use tracing::{debug, error, trace, warn};

use crate::cache::ValueCache;
use crate::error::{ItemError, ItemResult};
use crate::expression::{display_value, expand_aggregate, is_aggregate, Expression};
use crate::fade::{CancelToken, FadeSlot};
use crate::logic::Logic;
use crate::plugin::MethodHook;
use crate::smarthome::SmartHome;

/// Attributes interpreted by the engine; everything else lands in `conf`
pub const CORE_ATTRIBUTES: &[&str] = &[
    "type",
    "value",
    "name",
    "cache",
    "enforce_updates",
    "crontab",
    "cycle",
    "eval",
    "eval_trigger",
    "autotimer",
    "threshold",
];

/// Log target of item change messages
pub const CHANGES_TARGET: &str = "sh::changes";

/// Revert to a fallback value some time after every change
#[derive(Debug, Clone, PartialEq)]
pub struct AutoTimer {
    pub seconds: u64,
    pub value: Value,
}

impl AutoTimer {
    /// Parse `"<seconds>=<value>"`
    fn parse(raw: &str) -> Option<Self> {
        let (seconds, value) = raw.split_once('=')?;
        Some(Self {
            seconds: seconds.trim().parse().ok()?,
            value: Value::String(value.trim().to_string()),
        })
    }
}

/// Hysteresis band for logic notifications
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Threshold {
    pub low: f64,
    pub high: f64,
}

impl Threshold {
    /// Parse `"low:high"`, or a bare `"high"` used for both bounds
    fn parse(raw: &str) -> Option<Self> {
        let (low, high) = match raw.split_once(':') {
            Some((low, high)) => (low.trim().parse().ok()?, high.trim().parse().ok()?),
            None => {
                let bound = raw.trim().parse().ok()?;
                (bound, bound)
            }
        };
        (low <= high).then_some(Self { low, high })
    }

    /// Edge crossed when moving to `value` from the given side
    ///
    /// `Some(true)` when reaching `high` from below, `Some(false)` when
    /// reaching `low` from above.
    fn crossing(&self, above: bool, value: f64) -> Option<bool> {
        if above && value <= self.low {
            Some(false)
        } else if !above && value >= self.high {
            Some(true)
        } else {
            None
        }
    }
}

/// Something notified when an item changes
#[derive(Clone)]
pub(crate) enum Dependent {
    Item(Weak<Item>),
    Logic(Weak<Logic>),
}

impl Dependent {
    fn same(&self, other: &Dependent) -> bool {
        match (self, other) {
            (Dependent::Item(a), Dependent::Item(b)) => a.ptr_eq(b),
            (Dependent::Logic(a), Dependent::Logic(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

#[derive(Debug, Clone)]
struct ItemState {
    value: Value,
    prev_value: Value,
    last_change: DateTime<Local>,
    prev_change: DateTime<Local>,
    last_update: DateTime<Local>,
    changed_by: String,
    above_threshold: bool,
}

/// Effect of one stored update, computed under the item lock
struct Applied {
    value: Value,
    prev_value: Value,
    crossing: Option<bool>,
}

pub struct Item {
    path: String,
    name: String,
    item_type: ItemType,
    conf: IndexMap<String, Value>,
    children: IndexMap<String, Arc<Item>>,
    cache: bool,
    enforce_updates: bool,
    crontab: Vec<String>,
    cycle: Option<Value>,
    eval_source: Option<String>,
    eval_trigger: Vec<String>,
    eval: OnceLock<Option<Expression>>,
    autotimer: Option<AutoTimer>,
    threshold: Option<Threshold>,
    state: Mutex<ItemState>,
    changed: Condvar,
    hooks: RwLock<Vec<MethodHook>>,
    dependents: RwLock<Vec<Dependent>>,
    fade: FadeSlot,
    clock: SharedClock,
    sh: Weak<SmartHome>,
    me: Weak<Item>,
}

fn invalid(path: &str, attribute: &str, reason: impl Into<String>) -> ItemError {
    ItemError::InvalidAttribute {
        path: path.to_string(),
        attribute: attribute.to_string(),
        reason: reason.into(),
    }
}

fn flag(path: &str, def: &ItemDefinition, attribute: &str) -> ItemResult<bool> {
    match def.attribute(attribute) {
        None | Some(Value::Null) => Ok(false),
        Some(raw) => cast(ItemType::Bool, raw)
            .map(|v| v.as_bool() == Some(true))
            .map_err(|e| invalid(path, attribute, e.to_string())),
    }
}

fn text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl Item {
    /// Build an item and its children from a config definition
    ///
    /// Children that fail to build are logged and skipped. A cached value,
    /// when enabled and readable, replaces the configured one.
    pub fn from_definition(
        def: &ItemDefinition,
        sh: &Weak<SmartHome>,
        clock: &SharedClock,
        cache: &ValueCache,
    ) -> ItemResult<Arc<Self>> {
        let path = def.path.as_str();

        let mut children = IndexMap::new();
        for child in &def.children {
            match Item::from_definition(child, sh, clock, cache) {
                Ok(item) => {
                    children.insert(child.key().to_string(), item);
                }
                Err(e) => error!(item = %child.path, error = %e, "Skipping item"),
            }
        }

        let item_type = match def.attribute("type") {
            None | Some(Value::Null) => ItemType::Foo,
            Some(raw) => text(raw)
                .parse::<ItemType>()
                .map_err(|e| invalid(path, "type", e.to_string()))?,
        };

        let autotimer = match def.attribute("autotimer") {
            None | Some(Value::Null) => None,
            Some(raw) => {
                let raw = text(raw);
                let timer = AutoTimer::parse(&raw)
                    .ok_or_else(|| invalid(path, "autotimer", format!("expected '<seconds>=<value>', got '{raw}'")))?;
                let value = cast(item_type, &timer.value)
                    .map_err(|e| invalid(path, "autotimer", e.to_string()))?;
                Some(AutoTimer { value, ..timer })
            }
        };

        let threshold = match def.attribute("threshold") {
            None | Some(Value::Null) => None,
            Some(raw) => {
                let raw = text(raw);
                Some(
                    Threshold::parse(&raw)
                        .ok_or_else(|| invalid(path, "threshold", format!("expected 'low:high' or 'high', got '{raw}'")))?,
                )
            }
        };

        let mut value = match def.attribute("value") {
            None => type_default(item_type),
            Some(raw) => cast(item_type, raw).map_err(|e| invalid(path, "value", e.to_string()))?,
        };

        let cached = flag(path, def, "cache")?;
        let enforce_updates = flag(path, def, "enforce_updates")?;
        let now = clock.now();
        let mut last_change = now;
        if cached {
            match cache.read(path) {
                Ok(Some(restored)) => match cast(item_type, &restored.value) {
                    Ok(v) => {
                        value = v;
                        last_change = restored.changed;
                    }
                    Err(e) => warn!(item = %path, error = %e, "Ignoring cached value"),
                },
                Ok(None) => {}
                Err(e) => warn!(item = %path, error = %e, "Ignoring value cache"),
            }
        }

        let above_threshold = threshold
            .zip(value.as_f64())
            .is_some_and(|(th, v)| v >= th.high);

        let state = ItemState {
            prev_value: value.clone(),
            value,
            last_change,
            prev_change: last_change,
            last_update: last_change,
            changed_by: "Init:None".to_string(),
            above_threshold,
        };

        let conf = def
            .attributes
            .iter()
            .filter(|(k, _)| !CORE_ATTRIBUTES.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        Ok(Arc::new_cyclic(|me| Self {
            path: path.to_string(),
            name: def.attribute("name").map(text).unwrap_or_else(|| path.to_string()),
            item_type,
            conf,
            children,
            cache: cached,
            enforce_updates,
            crontab: def.attribute("crontab").map(string_list).unwrap_or_default(),
            cycle: def.attribute("cycle").filter(|v| !v.is_null()).cloned(),
            eval_source: def.attribute("eval").filter(|v| !v.is_null()).map(text),
            eval_trigger: def.attribute("eval_trigger").map(string_list).unwrap_or_default(),
            eval: OnceLock::new(),
            autotimer,
            threshold,
            state: Mutex::new(state),
            changed: Condvar::new(),
            hooks: RwLock::new(Vec::new()),
            dependents: RwLock::new(Vec::new()),
            fade: FadeSlot::default(),
            clock: clock.clone(),
            sh: sh.clone(),
            me: me.clone(),
        }))
    }

    fn lock_state(&self) -> MutexGuard<'_, ItemState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn environment(&self) -> ItemResult<Arc<SmartHome>> {
        self.sh.upgrade().ok_or_else(|| ItemError::Detached {
            path: self.path.clone(),
        })
    }

    // ==================== Accessors ====================

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Configured `name`, or the path
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn item_type(&self) -> ItemType {
        self.item_type
    }

    /// Passthrough attributes for plugins
    pub fn conf(&self) -> &IndexMap<String, Value> {
        &self.conf
    }

    /// Current value
    pub fn get(&self) -> Value {
        self.lock_state().value.clone()
    }

    pub fn prev_value(&self) -> Value {
        self.lock_state().prev_value.clone()
    }

    pub fn last_change(&self) -> DateTime<Local> {
        self.lock_state().last_change
    }

    pub fn prev_change(&self) -> DateTime<Local> {
        self.lock_state().prev_change
    }

    pub fn last_update(&self) -> DateTime<Local> {
        self.lock_state().last_update
    }

    /// `caller:source` of the last change
    pub fn changed_by(&self) -> String {
        self.lock_state().changed_by.clone()
    }

    /// Seconds since the last change
    pub fn age(&self) -> f64 {
        let last = self.last_change();
        seconds(self.clock.now() - last)
    }

    /// Seconds the previous value was held
    pub fn prev_age(&self) -> f64 {
        let state = self.lock_state();
        seconds(state.last_change - state.prev_change)
    }

    pub fn children(&self) -> impl Iterator<Item = &Arc<Item>> {
        self.children.values()
    }

    /// Direct child by its last path segment
    pub fn child(&self, name: &str) -> Option<&Arc<Item>> {
        self.children.get(name)
    }

    pub fn parent_path(&self) -> Option<&str> {
        self.path.rsplit_once('.').map(|(parent, _)| parent)
    }

    /// Visit this item and its descendants in pre-order
    pub fn walk(self: &Arc<Self>, visit: &mut impl FnMut(&Arc<Item>)) {
        visit(self);
        for child in self.children.values() {
            child.walk(visit);
        }
    }

    pub fn eval_source(&self) -> Option<&str> {
        self.eval_source.as_deref()
    }

    pub fn eval_trigger(&self) -> &[String] {
        &self.eval_trigger
    }

    /// The compiled `eval`; `None` until the item is wired
    pub fn eval_expression(&self) -> Option<&Expression> {
        self.eval.get().and_then(Option::as_ref)
    }

    pub fn crontab(&self) -> &[String] {
        &self.crontab
    }

    pub fn cycle(&self) -> Option<&Value> {
        self.cycle.as_ref()
    }

    pub fn is_cached(&self) -> bool {
        self.cache
    }

    pub fn enforces_updates(&self) -> bool {
        self.enforce_updates
    }

    pub fn autotimer(&self) -> Option<&AutoTimer> {
        self.autotimer.as_ref()
    }

    pub fn threshold(&self) -> Option<Threshold> {
        self.threshold
    }

    /// Whether a fade currently owns the item
    pub fn is_fading(&self) -> bool {
        self.fade.is_active()
    }

    // ==================== Wiring ====================

    /// Append a method hook, run inside every effective update
    pub fn add_hook(&self, hook: MethodHook) {
        self.hooks.write().unwrap_or_else(|e| e.into_inner()).push(hook);
    }

    /// Notify `dependent` on every update; self and duplicates are skipped
    pub(crate) fn add_dependent(&self, dependent: Dependent) -> bool {
        if let Dependent::Item(item) = &dependent {
            if item.ptr_eq(&self.me) {
                return false;
            }
        }
        let mut dependents = self.dependents.write().unwrap_or_else(|e| e.into_inner());
        if dependents.iter().any(|d| d.same(&dependent)) {
            return false;
        }
        dependents.push(dependent);
        true
    }

    /// Number of dependent items and logics
    pub fn dependent_count(&self) -> usize {
        self.dependents.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Compile the `eval` once the trigger items are known
    ///
    /// Aggregate keywords expand over `trigger_paths`. Compile errors are
    /// logged and leave the item without an expression.
    pub(crate) fn prepare_eval(&self, trigger_paths: &[String]) -> Option<&Expression> {
        let source = self.eval_source.as_deref()?;
        let expanded = if is_aggregate(source) {
            expand_aggregate(source, trigger_paths)
        } else {
            None
        };
        let compiled = self.compile(expanded.as_deref().unwrap_or(source));
        if self.eval.set(compiled).is_err() {
            warn!(item = %self.path, "eval already compiled, keeping the first expression");
        }
        self.eval_expression()
    }

    fn compile(&self, source: &str) -> Option<Expression> {
        match Expression::compile(source) {
            Ok(expr) => Some(expr),
            Err(e) => {
                error!(item = %self.path, eval = %source, error = %e, "Invalid eval expression");
                None
            }
        }
    }

    // ==================== Updates ====================

    /// Set the value on behalf of `caller`
    ///
    /// Returns whether the update took effect. Unchanged values are ignored
    /// unless the item enforces updates or is a scene.
    pub fn set(&self, value: impl Into<Value>, caller: &str) -> ItemResult<bool> {
        self.apply(value.into(), &Trigger::new(caller), None)
    }

    /// Set the value with a full caller/source/dest context
    pub fn set_from(&self, value: Value, by: &Trigger) -> ItemResult<bool> {
        self.apply(value, by, None)
    }

    fn apply(&self, value: Value, by: &Trigger, fade: Option<&CancelToken>) -> ItemResult<bool> {
        let value = match cast(self.item_type, &value) {
            Ok(v) => v,
            Err(source) => {
                warn!(
                    item = %self.path,
                    caller = %by.caller,
                    source = ?by.source,
                    error = %source,
                    "Discarding update"
                );
                return Err(ItemError::Cast {
                    path: self.path.clone(),
                    caller: by.caller.clone(),
                    source,
                });
            }
        };
        if fade.is_none() {
            self.fade.cancel();
        }

        let applied = {
            let mut state = self.lock_state();
            if fade.is_some_and(CancelToken::is_cancelled) {
                self.changed.notify_all();
                return Ok(false);
            }
            let now = self.clock.now();
            let changed = !values_equal(&state.value, &value);
            if !changed && !self.enforce_updates && self.item_type != ItemType::Scene {
                state.last_update = now;
                self.changed.notify_all();
                return Ok(false);
            }

            state.prev_value = std::mem::replace(&mut state.value, value.clone());
            state.prev_change = state.last_change;
            state.last_change = now;
            state.last_update = now;
            state.changed_by = by.changed_by();

            let crossing = self
                .threshold
                .zip(value.as_f64())
                .and_then(|(th, v)| th.crossing(state.above_threshold, v));
            if let Some(above) = crossing {
                state.above_threshold = above;
            }
            self.changed.notify_all();
            Applied {
                value,
                prev_value: state.prev_value.clone(),
                crossing,
            }
        };

        debug!(
            target: CHANGES_TARGET,
            item = %self.path,
            value = %display_value(&applied.value),
            prev = %display_value(&applied.prev_value),
            caller = %by.caller,
            source = ?by.source,
            dest = ?by.dest,
            "Item changed"
        );

        let update = Trigger {
            caller: by.caller.clone(),
            source: by.source.clone(),
            dest: by.dest.clone(),
            value: Some(applied.value.clone()),
        };
        self.run_hooks(&update);
        self.notify_dependents(&update, applied.crossing);

        if self.cache && by.caller != callers::FADER_STEP {
            if let Some(sh) = self.sh.upgrade() {
                if let Err(e) = sh.cache().write(&self.path, &applied.value) {
                    warn!(item = %self.path, error = %e, "Failed to cache value");
                }
            }
        }

        if let Some(autotimer) = &self.autotimer {
            let own = [callers::AUTOTIMER, callers::FADER, callers::FADER_STEP];
            if !own.contains(&by.caller.as_str()) {
                if let Err(e) = self.arm_timer(autotimer.seconds, autotimer.value.clone(), callers::AUTOTIMER) {
                    warn!(item = %self.path, error = %e, "Failed to arm autotimer");
                }
            }
        }
        Ok(true)
    }

    fn run_hooks(&self, update: &Trigger) {
        let hooks = self.hooks.read().unwrap_or_else(|e| e.into_inner()).clone();
        for hook in hooks {
            if let Err(e) = hook(self, update) {
                error!(item = %self.path, caller = %update.caller, error = %e, "Method hook failed");
            }
        }
    }

    fn notify_dependents(&self, update: &Trigger, crossing: Option<bool>) {
        let dependents = self.dependents.read().unwrap_or_else(|e| e.into_inner()).clone();
        if dependents.is_empty() {
            return;
        }
        let Some(sh) = self.sh.upgrade() else {
            return;
        };
        let notify_logics = self.threshold.is_none() || crossing.is_some();

        for dependent in dependents {
            match dependent {
                Dependent::Item(item) => {
                    let Some(item) = item.upgrade() else { continue };
                    let context = Trigger {
                        caller: update.caller.clone(),
                        source: Some(self.path.clone()),
                        dest: update.dest.clone(),
                        value: update.value.clone(),
                    };
                    sh.scheduler().trigger(
                        Dispatch::new(item.path.as_str())
                            .target(Target::Item(Arc::new(EvalRun(item))))
                            .context(context),
                    );
                }
                Dependent::Logic(logic) if notify_logics => {
                    let Some(logic) = logic.upgrade() else { continue };
                    let mut context = Trigger::new(callers::ITEM).with_source(self.path.as_str());
                    context.value = update.value.clone();
                    context.dest = update.dest.clone();
                    logic.trigger(context, None);
                }
                Dependent::Logic(_) => {}
            }
        }
    }

    /// Re-evaluate the `eval` in the given trigger context
    ///
    /// A `None` result or an evaluation error leaves the item unchanged.
    pub fn run_eval(&self, trigger: &Trigger) -> bool {
        let Some(expr) = self.eval_expression() else {
            return false;
        };
        let Some(sh) = self.sh.upgrade() else {
            return false;
        };
        match expr.eval(trigger, sh.items()) {
            Ok(Value::Null) => {
                debug!(item = %self.path, eval = %expr, "Eval returned None, not updating");
                false
            }
            Ok(value) => {
                let mut by = Trigger::new(callers::EVAL);
                by.source = trigger.source.clone();
                by.dest = trigger.dest.clone();
                self.apply(value, &by, None).unwrap_or(false)
            }
            Err(e) => {
                warn!(
                    item = %self.path,
                    eval = %expr,
                    caller = %trigger.caller,
                    source = ?trigger.source,
                    error = %e,
                    "Eval failed"
                );
                false
            }
        }
    }

    /// Block until `pred` holds for the value or `timeout` passes
    pub fn wait_for(&self, timeout: Duration, pred: impl Fn(&Value) -> bool) -> bool {
        let state = self.lock_state();
        let (state, _) = self
            .changed
            .wait_timeout_while(state, timeout, |s| !pred(&s.value))
            .unwrap_or_else(|e| e.into_inner());
        pred(&state.value)
    }

    // ==================== Timers ====================

    /// Set `value` once, `seconds` from now
    ///
    /// Re-arming replaces a pending timer.
    pub fn timer(&self, seconds: u64, value: impl Into<Value>) -> ItemResult<()> {
        self.arm_timer(seconds, value.into(), callers::TIMER)
    }

    fn arm_timer(&self, seconds: u64, value: Value, caller: &'static str) -> ItemResult<()> {
        let sh = self.environment()?;
        let item = self.me.clone();
        let name = format!("{}-Timer", self.path);
        let at = after_seconds(&name, sh.now(), i64::try_from(seconds).unwrap_or(i64::MAX));
        trace!(item = %self.path, seconds, caller, "Arming timer");

        sh.scheduler().add(
            Job::new(
                name,
                Target::method(move |_| match item.upgrade() {
                    Some(item) => item
                        .set_from(value.clone(), &Trigger::new(caller))
                        .map(|_| ())
                        .map_err(TaskError::other),
                    None => Ok(()),
                }),
            )
            .next(at),
        );
        Ok(())
    }

    // ==================== Fading ====================

    /// Ramp the value to `dest` by `step` every `delta`
    ///
    /// Runs on the scheduler's worker pool. Any later `set` or `fade`
    /// cancels the ramp; a completed ramp ends with a final `set(dest)` by
    /// `"Fader"`.
    pub fn fade(&self, dest: f64, step: f64, delta: Duration) -> ItemResult<()> {
        if self.item_type != ItemType::Num {
            return Err(ItemError::NotNumeric {
                path: self.path.clone(),
                item_type: self.item_type,
            });
        }
        if !(step.is_finite() && step > 0.0) || !dest.is_finite() {
            return Err(ItemError::InvalidFade {
                path: self.path.clone(),
                reason: format!("step must be a positive number, got {step} towards {dest}"),
            });
        }
        let sh = self.environment()?;
        let item = self.me.clone();
        let token = self.fade.begin();

        debug!(item = %self.path, dest, step, delta_ms = delta.as_millis() as u64, "Starting fade");
        sh.scheduler().trigger(
            Dispatch::new(format!("{}-Fade", self.path))
                .by(callers::FADER)
                .source(self.path.as_str())
                .target(Target::method(move |_| {
                    if let Some(item) = item.upgrade() {
                        item.run_fade(dest, step, delta, &token);
                    }
                    Ok(())
                })),
        );
        Ok(())
    }

    fn run_fade(&self, dest: f64, step: f64, delta: Duration, token: &CancelToken) {
        loop {
            if token.is_cancelled() {
                debug!(item = %self.path, "Fade cancelled");
                return;
            }
            let current = self.get().as_f64().unwrap_or(dest);
            let (next, more) = if current < dest {
                (current + step, current + step < dest)
            } else {
                (current - step, current - step > dest)
            };
            if !more {
                break;
            }
            if let Err(e) = self.apply(Value::from(next), &Trigger::new(callers::FADER_STEP), Some(token)) {
                warn!(item = %self.path, error = %e, "Fade step failed");
                return;
            }

            let state = self.lock_state();
            let _ = self
                .changed
                .wait_timeout_while(state, delta, |_| !token.is_cancelled())
                .unwrap_or_else(|e| e.into_inner());
        }

        if !token.is_cancelled() {
            if let Err(e) = self.apply(Value::from(dest), &Trigger::new(callers::FADER), Some(token)) {
                warn!(item = %self.path, error = %e, "Final fade step failed");
            }
        }
        self.fade.finish(token);
    }
}

fn seconds(delta: ChronoDuration) -> f64 {
    delta.num_milliseconds() as f64 / 1000.0
}

/// Scheduler entry point: a fired value is set, otherwise the `eval` runs
impl Invoke for Item {
    fn invoke(&self, trigger: &Trigger) -> Result<(), TaskError> {
        match &trigger.value {
            Some(value) => self
                .set_from(value.clone(), trigger)
                .map(|_| ())
                .map_err(TaskError::other),
            None => {
                self.run_eval(trigger);
                Ok(())
            }
        }
    }
}

/// Re-evaluation of a dependent item, queued by its source item
pub(crate) struct EvalRun(pub(crate) Arc<Item>);

impl Invoke for EvalRun {
    fn invoke(&self, trigger: &Trigger) -> Result<(), TaskError> {
        self.0.run_eval(trigger);
        Ok(())
    }
}

impl<'a> IntoIterator for &'a Item {
    type Item = &'a Arc<Item>;
    type IntoIter = indexmap::map::Values<'a, String, Arc<Item>>;

    fn into_iter(self) -> Self::IntoIter {
        self.children.values()
    }
}

impl fmt::Debug for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Item")
            .field("path", &self.path)
            .field("type", &self.item_type)
            .field("value", &self.get())
            .field("children", &self.children.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl fmt::Display for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}
