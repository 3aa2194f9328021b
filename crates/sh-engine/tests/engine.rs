//! End-to-end tests for item propagation, logics and plugins
//!
//! Most tests drive the scheduler by hand with a `ManualClock`:
//! `tick()` promotes due entries and `run_pending()` runs the queue on the
//! test thread. Fade and worker tests start the real thread pool.

use chrono::{Local, TimeZone};
use serde_json::json;
use sh_config::{parse_items, ItemDefinition, LogicDefinition, SmartHomeConfig};
use sh_core::{ManualClock, SharedClock, Trigger, Value};
use sh_engine::{CallbackRunner, HookError, Item, ItemError, Logic, MethodHook, Plugin, SmartHome};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

// ==================== Helpers ====================

fn config(cache_dir: &Path) -> SmartHomeConfig {
    let mut config = SmartHomeConfig::default();
    config.smarthome.cache_dir = cache_dir.to_path_buf();
    config.smarthome.logics_dir = cache_dir.to_path_buf();
    config.scheduler.workers = 2;
    config.scheduler.tick_ms = 20;
    config.scheduler.stop_timeout = 2;
    config
}

fn items(yaml: &str) -> Vec<ItemDefinition> {
    parse_items(&serde_yaml::from_str(yaml).unwrap()).unwrap()
}

fn logic_def(name: &str, attributes: Value) -> LogicDefinition {
    let conf = attributes
        .as_object()
        .cloned()
        .unwrap_or_default()
        .into_iter()
        .collect();
    LogicDefinition::from_attributes(name, conf).unwrap()
}

struct Manual {
    sh: Arc<SmartHome>,
    clock: Arc<ManualClock>,
    _dir: TempDir,
}

impl Manual {
    fn new(yaml: &str) -> Self {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::at(
            Local.with_ymd_and_hms(2024, 5, 6, 8, 0, 0).unwrap(),
        ));
        let shared: SharedClock = clock.clone();
        let sh = SmartHome::with_clock(config(dir.path()), shared);
        sh.load_items(&items(yaml));
        sh.scheduler().run_pending();
        Self {
            sh,
            clock,
            _dir: dir,
        }
    }

    fn item(&self, path: &str) -> Arc<Item> {
        self.sh.return_item(path).unwrap()
    }

    /// Advance the clock and run whatever became due
    fn advance(&self, seconds: i64) -> usize {
        self.clock.advance_seconds(seconds);
        self.sh.scheduler().tick();
        self.sh.scheduler().run_pending()
    }
}

type Runs = Arc<Mutex<Vec<Trigger>>>;

fn recording_runner() -> (Runs, Arc<CallbackRunner>) {
    let runs: Runs = Arc::new(Mutex::new(Vec::new()));
    let sink = runs.clone();
    let runner = CallbackRunner::new(move |_: &Logic, trigger: &Trigger| {
        sink.lock().unwrap().push(trigger.clone());
        Ok(())
    });
    (runs, Arc::new(runner))
}

fn wait_until(timeout: Duration, cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    cond()
}

// ==================== Propagation ====================

#[test]
fn test_eval_trigger_propagates_through_run_queue() {
    let env = Manual::new(
        r#"
A:
    type: num
B:
    type: num
    eval_trigger: A
    eval: sh.A()
"#,
    );

    env.item("A").set(42, "test").unwrap();
    assert_eq!(env.item("B").get(), json!(0), "dependents run asynchronously");

    env.sh.scheduler().run_pending();
    assert_eq!(env.item("B").get(), json!(42));
    assert_eq!(env.item("B").changed_by(), "Eval:A");
}

#[test]
fn test_eval_trigger_end_to_end_with_workers() {
    let dir = TempDir::new().unwrap();
    let sh = SmartHome::new(config(dir.path()));
    sh.load_items(&items(
        r#"
A:
    type: num
B:
    type: num
    eval_trigger: A
    eval: sh.A() * 2
"#,
    ));
    sh.start().unwrap();

    sh.return_item("A").unwrap().set(21, "test").unwrap();
    let b = sh.return_item("B").unwrap();
    assert!(b.wait_for(Duration::from_secs(5), |v| v.as_f64() == Some(42.0)));

    sh.stop();
    assert!(!sh.scheduler().is_alive());
}

#[test]
fn test_eval_uses_trigger_context() {
    let env = Manual::new(
        r#"
switch:
    type: bool
mirror:
    type: str
    eval_trigger: switch
    eval: "'on from ' + source if value else 'off'"
"#,
    );

    env.item("switch").set(true, "test").unwrap();
    env.sh.scheduler().run_pending();
    assert_eq!(env.item("mirror").get(), json!("on from switch"));

    env.item("switch").set("off", "test").unwrap();
    env.sh.scheduler().run_pending();
    assert_eq!(env.item("mirror").get(), json!("off"));
}

#[test]
fn test_aggregate_evals() {
    let env = Manual::new(
        r#"
sensors:
    s1:
        type: num
    s2:
        type: num
total:
    type: num
    eval: sum
    eval_trigger: sensors.*
average:
    type: num
    eval: avg
    eval_trigger: [sensors.s1, sensors.s2]
windows:
    w1:
        type: bool
    w2:
        type: bool
any_open:
    type: bool
    eval: or
    eval_trigger: windows.*
all_open:
    type: bool
    eval: and
    eval_trigger: windows.*
"#,
    );

    env.item("sensors.s1").set(2, "test").unwrap();
    env.item("sensors.s2").set(4, "test").unwrap();
    env.item("windows.w1").set(true, "test").unwrap();
    env.sh.scheduler().run_pending();

    assert_eq!(env.item("total").get(), json!(6));
    assert_eq!(env.item("average").get(), json!(3.0));
    assert_eq!(env.item("any_open").get(), json!(true));
    assert_eq!(env.item("all_open").get(), json!(false));

    env.item("windows.w2").set(true, "test").unwrap();
    env.sh.scheduler().run_pending();
    assert_eq!(env.item("all_open").get(), json!(true));
}

#[test]
fn test_init_eval_runs_on_load() {
    let env = Manual::new(
        r#"
base:
    type: num
    value: 20
offset:
    type: num
    eval_trigger: base
    eval: sh.base() + 1.5
"#,
    );
    assert_eq!(env.item("offset").get(), json!(21.5));
    assert_eq!(env.item("offset").changed_by(), "Eval:None");
}

#[test]
fn test_init_eval_sees_current_value() {
    let env = Manual::new(
        r#"
src:
    type: num
level:
    type: num
    value: 4
    eval_trigger: src
    eval: "value * 10 if caller == 'Init' else value"
"#,
    );
    let level = env.item("level");
    assert_eq!(level.get(), json!(40));
    assert_eq!(level.prev_value(), json!(4));

    env.item("src").set(7, "test").unwrap();
    env.sh.scheduler().run_pending();
    assert_eq!(level.get(), json!(7));
}

/// Records the `eval` each item carries when plugins parse it
#[derive(Default)]
struct EvalPlugin {
    seen: Mutex<Vec<(String, Option<String>)>>,
}

impl Plugin for EvalPlugin {
    fn name(&self) -> &str {
        "evals"
    }

    fn parse_item(&self, item: &Arc<Item>) -> Option<MethodHook> {
        let source = item.eval_expression().map(|e| e.source().to_string());
        self.seen
            .lock()
            .unwrap()
            .push((item.path().to_string(), source));
        None
    }
}

#[test]
fn test_plugins_see_expanded_aggregates() {
    let dir = TempDir::new().unwrap();
    let sh = SmartHome::new(config(dir.path()));
    let plugin = Arc::new(EvalPlugin::default());
    sh.add_plugin(plugin.clone());
    sh.load_items(&items(
        r#"
sensors:
    s1:
        type: num
        value: 2
    s2:
        type: num
        value: 3
total:
    type: num
    eval_trigger: sensors.*
    eval: sum
"#,
    ));

    let seen = plugin.seen.lock().unwrap();
    let total = seen.iter().find(|(path, _)| path == "total").unwrap();
    assert_eq!(
        total.1.as_deref(),
        Some("sh.sensors.s1() + sh.sensors.s2()")
    );
    drop(seen);

    sh.scheduler().run_pending();
    assert_eq!(sh.return_item("total").unwrap().get(), json!(5));
}

#[test]
fn test_failed_or_empty_eval_does_not_update() {
    let env = Manual::new(
        r#"
src:
    type: num
nothing:
    type: num
    value: 1
    eval_trigger: src
    eval: None
broken:
    type: num
    value: 1
    eval_trigger: src
    eval: sh.missing() + 1
wrong_type:
    type: num
    value: 1
    eval_trigger: src
    eval: "'text'"
"#,
    );

    env.item("src").set(5, "test").unwrap();
    env.sh.scheduler().run_pending();
    for path in ["nothing", "broken", "wrong_type"] {
        assert_eq!(env.item(path).get(), json!(1), "{path}");
    }
}

// ==================== Change detection ====================

struct TrackingPlugin {
    name: String,
    log: Arc<Mutex<Vec<String>>>,
    logics: AtomicUsize,
}

impl TrackingPlugin {
    fn new(name: &str, log: Arc<Mutex<Vec<String>>>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            log,
            logics: AtomicUsize::new(0),
        })
    }
}

impl Plugin for TrackingPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn parse_item(&self, item: &Arc<Item>) -> Option<MethodHook> {
        if !item.conf().contains_key("track") {
            return None;
        }
        let tag = self.name.clone();
        let log = self.log.clone();
        Some(Arc::new(move |item: &Item, update: &Trigger| {
            log.lock().unwrap().push(format!(
                "{tag}:{}={}",
                item.path(),
                update.value.clone().unwrap_or_default()
            ));
            if item.path() == "failing" {
                return Err(HookError::new("refused"));
            }
            Ok(())
        }))
    }

    fn parse_logic(&self, _logic: &Arc<Logic>) {
        self.logics.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_change_detection_and_enforce_updates() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::at(
        Local.with_ymd_and_hms(2024, 5, 6, 8, 0, 0).unwrap(),
    ));
    let shared: SharedClock = clock.clone();
    let sh = SmartHome::with_clock(config(dir.path()), shared);
    sh.add_plugin(TrackingPlugin::new("p", log.clone()));
    sh.load_items(&items(
        r#"
plain:
    type: num
    track: true
forced:
    type: num
    enforce_updates: true
    track: true
"#,
    ));

    let plain = sh.return_item("plain").unwrap();
    let forced = sh.return_item("forced").unwrap();

    assert!(plain.set(5, "test").unwrap());
    assert!(forced.set(5, "test").unwrap());
    let plain_changed = plain.last_change();
    let forced_changed = forced.last_change();

    clock.advance_seconds(10);
    assert!(!plain.set(5, "test").unwrap());
    assert!(forced.set(5.0, "test").unwrap());

    assert_eq!(plain.last_change(), plain_changed);
    assert!(plain.prev_change() <= plain_changed);
    assert!(plain.last_update() > plain_changed);

    assert!(forced.last_change() > forced_changed);
    assert_eq!(forced.prev_change(), forced_changed);
    assert_eq!(forced.prev_value(), json!(5));

    let log = log.lock().unwrap();
    assert_eq!(
        *log,
        vec!["p:plain=5", "p:forced=5", "p:forced=5.0"],
        "unchanged updates run no hooks unless enforced"
    );
}

#[test]
fn test_hooks_run_in_plugin_order_and_failures_are_contained() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let dir = TempDir::new().unwrap();
    let sh = SmartHome::new(config(dir.path()));
    sh.add_plugin(TrackingPlugin::new("first", log.clone()));
    sh.add_plugin(TrackingPlugin::new("second", log.clone()));
    sh.load_items(&items(
        r#"
failing:
    type: str
    track: yes
"#,
    ));

    let item = sh.return_item("failing").unwrap();
    assert!(item.set("x", "test").unwrap());
    assert_eq!(item.get(), json!("x"));
    assert_eq!(
        *log.lock().unwrap(),
        vec!["first:failing=\"x\"", "second:failing=\"x\""]
    );
}

#[test]
fn test_cast_rejection_leaves_items_unchanged() {
    let env = Manual::new(
        r#"
flag:
    type: bool
    value: true
level:
    type: num
    value: 3
label:
    type: str
    value: idle
"#,
    );

    for (path, bad) in [("flag", json!("maybe")), ("level", json!("abc")), ("label", json!(42))] {
        let item = env.item(path);
        let before = (item.get(), item.last_change(), item.changed_by());
        let err = item.set(bad, "external").unwrap_err();
        assert!(matches!(err, ItemError::Cast { .. }), "{path}: {err}");
        assert_eq!((item.get(), item.last_change(), item.changed_by()), before);
    }
}

// ==================== Thresholds and logics ====================

#[test]
fn test_threshold_notifies_logic_on_edges_only() {
    let env = Manual::new(
        r#"
temp:
    type: num
    threshold: "10:20"
"#,
    );
    let (runs, runner) = recording_runner();
    env.sh
        .add_logic(logic_def("heating", json!({"watch_item": "temp"})), runner);

    for value in [5, 15, 25, 15, 5] {
        env.item("temp").set(value, "test").unwrap();
        env.sh.scheduler().run_pending();
    }

    let runs = runs.lock().unwrap();
    assert_eq!(runs.len(), 2);
    assert_eq!(runs[0].value, Some(json!(25)));
    assert_eq!(runs[1].value, Some(json!(5)));
    assert_eq!(runs[0].caller, "Item");
    assert_eq!(runs[0].source.as_deref(), Some("temp"));
}

#[test]
fn test_watch_item_triggers_logic_on_every_change() {
    let env = Manual::new(
        r#"
doors:
    front:
        type: bool
    back:
        type: bool
"#,
    );
    let (runs, runner) = recording_runner();
    let logic = env
        .sh
        .add_logic(logic_def("alarm", json!({"watch_item": "doors.*"})), runner);

    env.item("doors.front").set(true, "test").unwrap();
    env.item("doors.back").set(true, "test").unwrap();
    env.item("doors.back").set(true, "test").unwrap();
    env.sh.scheduler().run_pending();
    assert_eq!(runs.lock().unwrap().len(), 2);
    assert!(logic.last_run().is_some());

    logic.disable();
    env.item("doors.front").set(false, "test").unwrap();
    env.sh.scheduler().run_pending();
    assert_eq!(runs.lock().unwrap().len(), 2, "disabled logics drop triggers");

    logic.enable();
    env.item("doors.front").set(true, "test").unwrap();
    env.sh.scheduler().run_pending();
    assert_eq!(runs.lock().unwrap().len(), 3);
}

#[test]
fn test_logic_crontab_and_explicit_trigger() {
    let env = Manual::new("{}");
    let (runs, runner) = recording_runner();
    let logic = env.sh.add_logic(
        logic_def("startup", json!({"crontab": "init = go", "prio": 1})),
        runner,
    );
    assert_eq!(logic.prio(), 1);

    assert_eq!(env.advance(6), 1);
    assert_eq!(runs.lock().unwrap()[0].caller, "Scheduler");
    assert_eq!(runs.lock().unwrap()[0].value, Some(json!("go")));

    let at = env.sh.now() + chrono::Duration::seconds(30);
    assert!(logic.trigger(Trigger::new("Test").with_value(json!(1)), Some(at)));
    assert_eq!(env.advance(10), 0);
    assert_eq!(env.advance(21), 1);
    assert_eq!(runs.lock().unwrap()[1].caller, "Test");
}

#[test]
fn test_plugins_see_logics() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let plugin = TrackingPlugin::new("p", log);
    let dir = TempDir::new().unwrap();
    let sh = SmartHome::new(config(dir.path()));
    sh.add_plugin(plugin.clone());
    let (_, runner) = recording_runner();
    sh.add_logic(logic_def("one", json!({})), runner.clone());
    sh.add_logic(logic_def("two", json!({})), runner);

    assert_eq!(plugin.logics.load(Ordering::SeqCst), 2);
    let names: Vec<String> = sh
        .return_logics()
        .iter()
        .map(|l| l.name().to_string())
        .collect();
    assert_eq!(names, vec!["one", "two"]);
    assert!(sh.return_logic("two").is_some());
    assert!(sh.return_logic("three").is_none());
}

#[cfg(unix)]
#[test]
fn test_script_logics_load_and_reload() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("ok.sh"), "exit 0\n").unwrap();
    let sh = SmartHome::new(config(dir.path()));

    let loaded = sh.load_logics(vec![
        logic_def("ok", json!({"filename": "ok.sh"})),
        logic_def("missing", json!({"filename": "missing.sh"})),
        logic_def("nofile", json!({})),
    ]);
    assert_eq!(loaded, 1);
    assert!(sh.return_logic("missing").is_none());
    assert_eq!(sh.reload_logics(), 1);
}

// ==================== Timers and schedules ====================

#[test]
fn test_timer_sets_value_once() {
    let env = Manual::new(
        r#"
light:
    type: num
"#,
    );
    let light = env.item("light");
    light.timer(30, 5).unwrap();
    assert!(env.sh.scheduler().contains("light-Timer"));

    assert_eq!(env.advance(20), 0);
    assert_eq!(env.advance(11), 1);
    assert_eq!(light.get(), json!(5));
    assert_eq!(light.changed_by(), "Timer:None");
    assert_eq!(env.advance(60), 0);
}

#[test]
fn test_rearming_timer_replaces_pending_one() {
    let env = Manual::new("light:\n    type: num\n");
    let light = env.item("light");
    light.timer(30, 5).unwrap();
    env.advance(20);
    light.timer(30, 7).unwrap();

    assert_eq!(env.advance(15), 0);
    assert_eq!(env.advance(16), 1);
    assert_eq!(light.get(), json!(7));
}

#[test]
fn test_out_of_range_timer_never_fires() {
    let env = Manual::new("light:\n    type: num\n");
    let light = env.item("light");
    light.timer(u64::MAX, 5).unwrap();
    assert!(env.sh.scheduler().contains("light-Timer"));

    assert_eq!(env.advance(86_400), 0);
    assert_eq!(light.get(), json!(0));
}

#[test]
fn test_autotimer_reverts_after_external_change() {
    let env = Manual::new(
        r#"
presence:
    type: bool
    autotimer: 60 = 0
"#,
    );
    let presence = env.item("presence");
    presence.set(true, "motion").unwrap();

    assert_eq!(env.advance(30), 0);
    assert!(!presence.set("on", "motion").unwrap());
    assert_eq!(env.advance(31), 1, "unchanged set does not re-arm");
    assert_eq!(presence.get(), json!(false));
    assert_eq!(presence.changed_by(), "Autotimer:None");

    assert_eq!(env.sh.scheduler().return_next("presence-Timer"), None);
    assert_eq!(env.advance(120), 0);
}

#[test]
fn test_item_cycle_sets_value() {
    let env = Manual::new(
        r#"
heartbeat:
    type: num
    cycle: 60 = 7
"#,
    );
    let next = env.sh.scheduler().return_next("heartbeat").unwrap();
    let delay = (next - env.sh.now()).num_seconds();
    assert!((10..=15).contains(&delay), "random start offset, got {delay}");

    env.advance(16);
    let heartbeat = env.item("heartbeat");
    assert_eq!(heartbeat.get(), json!(7));
    assert_eq!(heartbeat.changed_by(), "Scheduler:None");
}

#[test]
fn test_item_crontab_reevaluates_eval() {
    let env = Manual::new(
        r#"
counter:
    type: num
    crontab: "* * * *"
    eval: sh.counter() + 1
"#,
    );
    env.advance(60);
    assert_eq!(env.item("counter").get(), json!(1));

    // the pass after a run computes the next minute
    env.sh.scheduler().tick();
    env.advance(60);
    assert_eq!(env.item("counter").get(), json!(2));
}

// ==================== Fading ====================

#[test]
fn test_fade_is_cancelled_by_external_set() {
    let dir = TempDir::new().unwrap();
    let sh = SmartHome::new(config(dir.path()));
    sh.load_items(&items("dimmer:\n    type: num\n"));
    sh.start().unwrap();

    let dimmer = sh.return_item("dimmer").unwrap();
    dimmer.fade(100.0, 10.0, Duration::from_millis(100)).unwrap();
    assert!(dimmer.wait_for(Duration::from_secs(5), |v| v.as_f64() >= Some(10.0)));
    assert_eq!(dimmer.changed_by(), "fader:None");

    dimmer.set(999, "external").unwrap();
    thread::sleep(Duration::from_millis(400));

    assert_eq!(dimmer.get(), json!(999));
    assert_eq!(dimmer.changed_by(), "external:None");
    assert!(!dimmer.is_fading());
    sh.stop();
}

#[test]
fn test_fade_completes_with_final_set() {
    let dir = TempDir::new().unwrap();
    let sh = SmartHome::new(config(dir.path()));
    sh.load_items(&items(
        r#"
dimmer:
    type: num
    cache: true
"#,
    ));
    sh.start().unwrap();

    let dimmer = sh.return_item("dimmer").unwrap();
    dimmer.fade(30.0, 10.0, Duration::from_millis(20)).unwrap();
    assert!(dimmer.wait_for(Duration::from_secs(5), |v| v.as_f64() == Some(30.0)));
    assert_eq!(dimmer.changed_by(), "Fader:None");
    assert_eq!(dimmer.prev_value(), json!(20.0));
    assert!(wait_until(Duration::from_secs(1), || !dimmer.is_fading()));

    let cached = sh.cache().read("dimmer").unwrap().unwrap();
    assert_eq!(cached.value, json!(30.0));
    sh.stop();
}

#[test]
fn test_second_fade_supersedes_first() {
    let dir = TempDir::new().unwrap();
    let sh = SmartHome::new(config(dir.path()));
    sh.load_items(&items("dimmer:\n    type: num\n"));
    sh.start().unwrap();

    let dimmer = sh.return_item("dimmer").unwrap();
    dimmer.fade(100.0, 1.0, Duration::from_millis(50)).unwrap();
    assert!(dimmer.wait_for(Duration::from_secs(5), |v| v.as_f64() >= Some(1.0)));
    dimmer.fade(-20.0, 5.0, Duration::from_millis(10)).unwrap();

    assert!(dimmer.wait_for(Duration::from_secs(5), |v| v.as_f64() == Some(-20.0)));
    thread::sleep(Duration::from_millis(200));
    assert_eq!(dimmer.get().as_f64(), Some(-20.0));
    sh.stop();
}

// ==================== Cache ====================

#[test]
fn test_cached_value_survives_restart() {
    let dir = TempDir::new().unwrap();
    let defs = items(
        r#"
setpoint:
    type: num
    value: 18
    cache: true
"#,
    );

    let first = SmartHome::new(config(dir.path()));
    first.load_items(&defs);
    first.return_item("setpoint").unwrap().set(21.5, "test").unwrap();
    assert!(dir.path().join("setpoint").exists());

    let second = SmartHome::new(config(dir.path()));
    second.load_items(&defs);
    let restored = second.return_item("setpoint").unwrap();
    assert_eq!(restored.get(), json!(21.5));

    let cached = second.cache().read("setpoint").unwrap().unwrap();
    assert_eq!(restored.last_change(), cached.changed);
}

#[test]
fn test_corrupt_cache_falls_back_to_config() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("setpoint"), "{not json").unwrap();
    let sh = SmartHome::new(config(dir.path()));
    sh.load_items(&items(
        r#"
setpoint:
    type: num
    value: 18
    cache: true
"#,
    ));
    assert_eq!(sh.return_item("setpoint").unwrap().get(), json!(18));
}

// ==================== Registry ====================

#[test]
fn test_registry_queries() {
    let env = Manual::new(
        r#"
house:
    living:
        temp:
            type: num
            visu: yes
        light:
            type: bool
            knx_dpt: 1
    kitchen:
        temp:
            type: num
"#,
    );
    let paths = |items: Vec<Arc<Item>>| -> Vec<String> {
        items.iter().map(|i| i.path().to_string()).collect()
    };

    assert_eq!(
        paths(env.sh.return_items()),
        vec![
            "house",
            "house.living",
            "house.living.temp",
            "house.living.light",
            "house.kitchen",
            "house.kitchen.temp"
        ]
    );
    assert_eq!(
        paths(env.sh.match_items("house.*.temp")),
        vec!["house.living.temp", "house.kitchen.temp"]
    );
    assert_eq!(paths(env.sh.match_items("house.*:visu")), vec!["house.living.temp"]);
    assert_eq!(paths(env.sh.find_items("knx_dpt")), vec!["house.living.light"]);

    let house = env.item("house");
    assert_eq!(paths(env.sh.find_children(&house, "visu")), vec!["house.living.temp"]);
    assert_eq!(house.children().count(), 2);
    assert!(env.sh.return_item("house.garden").is_none());
}

#[test]
fn test_duplicate_paths_are_skipped() {
    let dir = TempDir::new().unwrap();
    let sh = SmartHome::new(config(dir.path()));
    assert_eq!(sh.load_items(&items("a:\n    type: num\n")), 1);
    assert_eq!(sh.load_items(&items("a:\n    type: str\n")), 0);
    assert_eq!(sh.items().len(), 1);
}

// ==================== Plugins ====================

#[derive(Default)]
struct LoopPlugin {
    stopped: AtomicBool,
    checks: AtomicUsize,
}

impl Plugin for LoopPlugin {
    fn name(&self) -> &str {
        "loop"
    }

    fn run(&self) {
        while !self.stopped.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(10));
        }
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    fn check(&self) {
        self.checks.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_plugin_lifecycle() {
    let dir = TempDir::new().unwrap();
    let sh = SmartHome::new(config(dir.path()));
    let plugin = Arc::new(LoopPlugin::default());
    sh.add_plugin(plugin.clone());
    sh.start().unwrap();

    assert!(sh.scheduler().contains(sh_engine::CONNECTIONS_JOB));
    assert!(wait_until(Duration::from_secs(5), || plugin.checks.load(Ordering::SeqCst) > 0));

    sh.stop();
    assert!(plugin.stopped.load(Ordering::SeqCst));
}
