//! Logics: named, triggerable units of behaviour
//!
//! A logic runs through a [`LogicRunner`], the scripting extension point.
//! [`ScriptRunner`] feeds a script file to an external interpreter and
//! [`CallbackRunner`] wraps a Rust closure.

use chrono::{DateTime, Local};
use indexmap::IndexMap;
use sh_config::LogicDefinition;
use sh_core::{SharedClock, Trigger, Value};
use sh_scheduler::{Change, Dispatch, Invoke, Target, TaskError};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::thread;
use tracing::{debug, info, trace, warn};

use crate::error::{LogicError, LogicResult};
use crate::smarthome::SmartHome;

/// Executes a logic
pub trait LogicRunner: Send + Sync {
    fn run(&self, logic: &Logic, trigger: &Trigger) -> LogicResult<()>;

    /// Re-read the logic source
    fn reload(&self, _logic: &Logic) -> LogicResult<()> {
        Ok(())
    }
}

/// Runs a script file with an external interpreter
///
/// The script source is read once on creation and on every reload, then
/// piped to the interpreter's stdin. The trigger is passed through the
/// environment as `SH_LOGIC`, `SH_CALLER`, `SH_SOURCE`, `SH_DEST` and
/// `SH_VALUE` (JSON).
pub struct ScriptRunner {
    interpreter: String,
    path: PathBuf,
    source: RwLock<String>,
}

impl ScriptRunner {
    pub const DEFAULT_INTERPRETER: &'static str = "/bin/sh";

    /// Read the script at `path`
    pub fn load(name: &str, path: impl Into<PathBuf>, interpreter: Option<String>) -> LogicResult<Self> {
        let path = path.into();
        let source = read_source(name, &path)?;
        Ok(Self {
            interpreter: interpreter.unwrap_or_else(|| Self::DEFAULT_INTERPRETER.to_string()),
            path,
            source: RwLock::new(source),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn interpreter(&self) -> &str {
        &self.interpreter
    }
}

fn read_source(name: &str, path: &Path) -> LogicResult<String> {
    std::fs::read_to_string(path).map_err(|source| LogicError::Read {
        name: name.to_string(),
        path: path.to_path_buf(),
        source,
    })
}

impl LogicRunner for ScriptRunner {
    fn run(&self, logic: &Logic, trigger: &Trigger) -> LogicResult<()> {
        let source = self
            .source
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        let spawn_err = |source| LogicError::Spawn {
            name: logic.name().to_string(),
            interpreter: self.interpreter.clone(),
            source,
        };

        let mut child = Command::new(&self.interpreter)
            .env("SH_LOGIC", logic.name())
            .env("SH_CALLER", &trigger.caller)
            .env("SH_SOURCE", trigger.source.as_deref().unwrap_or(""))
            .env("SH_DEST", trigger.dest.as_deref().unwrap_or(""))
            .env(
                "SH_VALUE",
                trigger.value.as_ref().map_or("null".to_string(), Value::to_string),
            )
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(spawn_err)?;

        // Feed stdin while the pipes drain, a chatty script would block otherwise
        let output = thread::scope(|scope| {
            let writer = child.stdin.take().map(|mut stdin| {
                let source = source.as_bytes();
                scope.spawn(move || stdin.write_all(source))
            });
            let output = child.wait_with_output();
            if let Some(Ok(Err(e))) = writer.map(|w| w.join()) {
                if e.kind() != ErrorKind::BrokenPipe {
                    warn!(logic = %logic.name(), error = %e, "Could not feed script to interpreter");
                }
            }
            output
        })
        .map_err(spawn_err)?;

        for line in String::from_utf8_lossy(&output.stdout).lines() {
            debug!(logic = %logic.name(), "{line}");
        }
        if !output.status.success() {
            return Err(LogicError::Failed {
                name: logic.name().to_string(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }

    fn reload(&self, logic: &Logic) -> LogicResult<()> {
        let source = read_source(logic.name(), &self.path)?;
        *self.source.write().unwrap_or_else(|e| e.into_inner()) = source;
        Ok(())
    }
}

type Callback = dyn Fn(&Logic, &Trigger) -> LogicResult<()> + Send + Sync;

/// Runs a Rust closure
pub struct CallbackRunner {
    callback: Box<Callback>,
}

impl CallbackRunner {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(&Logic, &Trigger) -> LogicResult<()> + Send + Sync + 'static,
    {
        Self {
            callback: Box::new(callback),
        }
    }
}

impl LogicRunner for CallbackRunner {
    fn run(&self, logic: &Logic, trigger: &Trigger) -> LogicResult<()> {
        (self.callback)(logic, trigger)
    }
}

/// A configured logic
pub struct Logic {
    name: String,
    prio: i32,
    crontab: Vec<String>,
    cycle: Option<Value>,
    watch_item: Vec<String>,
    conf: IndexMap<String, Value>,
    filename: Option<String>,
    runner: Arc<dyn LogicRunner>,
    enabled: AtomicBool,
    last_run: Mutex<Option<DateTime<Local>>>,
    clock: SharedClock,
    sh: Weak<SmartHome>,
    me: Weak<Logic>,
}

impl Logic {
    pub(crate) fn new(
        def: LogicDefinition,
        runner: Arc<dyn LogicRunner>,
        sh: Weak<SmartHome>,
        clock: SharedClock,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            name: def.name,
            prio: def.prio,
            crontab: def.crontab,
            cycle: def.cycle,
            watch_item: def.watch_item,
            conf: def.conf,
            filename: def.filename,
            runner,
            enabled: AtomicBool::new(true),
            last_run: Mutex::new(None),
            clock,
            sh,
            me: me.clone(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run-queue priority
    pub fn prio(&self) -> i32 {
        self.prio
    }

    pub fn crontab(&self) -> &[String] {
        &self.crontab
    }

    pub fn cycle(&self) -> Option<&Value> {
        self.cycle.as_ref()
    }

    pub fn watch_item(&self) -> &[String] {
        &self.watch_item
    }

    /// Every configured attribute
    pub fn conf(&self) -> &IndexMap<String, Value> {
        &self.conf
    }

    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    /// Queue a run, right away or at `at`; returns whether it was queued
    pub fn trigger(&self, trigger: Trigger, at: Option<DateTime<Local>>) -> bool {
        let (Some(sh), Some(me)) = (self.sh.upgrade(), self.me.upgrade()) else {
            warn!(logic = %self.name, "Logic is detached, ignoring trigger");
            return false;
        };
        let mut dispatch = Dispatch::new(self.name.as_str())
            .target(Target::Logic(me))
            .context(trigger)
            .priority(self.prio);
        if let Some(at) = at {
            dispatch = dispatch.at(at);
        }
        sh.scheduler().trigger(dispatch)
    }

    pub fn enable(&self) {
        self.set_enabled(true);
    }

    /// Stop running; pending and future triggers are dropped
    pub fn disable(&self) {
        self.set_enabled(false);
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
        if let Some(sh) = self.sh.upgrade() {
            if let Err(e) = sh.scheduler().change(&self.name, Change::new().active(enabled)) {
                debug!(logic = %self.name, error = %e, "No scheduler entry to update");
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Start time of the most recent run
    pub fn last_run(&self) -> Option<DateTime<Local>> {
        *self.last_run.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Re-read the logic source through its runner
    pub fn reload(&self) -> LogicResult<()> {
        self.runner.reload(self)?;
        info!(logic = %self.name, "Reloaded logic");
        Ok(())
    }
}

impl Invoke for Logic {
    fn invoke(&self, trigger: &Trigger) -> Result<(), TaskError> {
        if !self.is_enabled() {
            debug!(logic = %self.name, caller = %trigger.caller, "Logic disabled, skipping run");
            return Ok(());
        }
        *self.last_run.lock().unwrap_or_else(|e| e.into_inner()) = Some(self.clock.now());
        trace!(
            logic = %self.name,
            caller = %trigger.caller,
            source = ?trigger.source,
            dest = ?trigger.dest,
            "Running logic"
        );
        self.runner.run(self, trigger).map_err(TaskError::other)
    }
}

impl std::fmt::Debug for Logic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Logic")
            .field("name", &self.name)
            .field("prio", &self.prio)
            .field("crontab", &self.crontab)
            .field("watch_item", &self.watch_item)
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sh_core::ManualClock;
    use std::fs;
    use tempfile::TempDir;

    fn detached(name: &str, runner: Arc<dyn LogicRunner>) -> Arc<Logic> {
        let def = LogicDefinition::from_attributes(name, IndexMap::new()).unwrap();
        Logic::new(def, runner, Weak::new(), Arc::new(ManualClock::new()))
    }

    #[test]
    fn test_callback_runner_sees_trigger() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let logic = detached(
            "cb",
            Arc::new(CallbackRunner::new(move |logic, trigger| {
                sink.lock()
                    .unwrap()
                    .push((logic.name().to_string(), trigger.value.clone()));
                Ok(())
            })),
        );

        logic
            .invoke(&Trigger::new("Item").with_value(json!(3)))
            .unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![("cb".to_string(), Some(json!(3)))]);
        assert!(logic.last_run().is_some());
    }

    #[test]
    fn test_disabled_logic_does_not_run() {
        let logic = detached(
            "off",
            Arc::new(CallbackRunner::new(|_, _| panic!("must not run"))),
        );
        logic.disable();
        assert!(!logic.is_enabled());
        logic.invoke(&Trigger::new("Test")).unwrap();
        assert_eq!(logic.last_run(), None);
        logic.enable();
        assert!(logic.is_enabled());
    }

    #[test]
    fn test_detached_trigger_is_ignored() {
        let logic = detached("lonely", Arc::new(CallbackRunner::new(|_, _| Ok(()))));
        assert!(!logic.trigger(Trigger::new("Test"), None));
    }

    #[cfg(unix)]
    #[test]
    fn test_script_runner_passes_environment() {
        let dir = TempDir::new().unwrap();
        let script = dir.path().join("check.sh");
        let out = dir.path().join("out.txt");
        fs::write(
            &script,
            format!(
                "echo \"$SH_LOGIC $SH_CALLER $SH_SOURCE $SH_VALUE\" > {}\n",
                out.display()
            ),
        )
        .unwrap();

        let runner = Arc::new(ScriptRunner::load("script", &script, None).unwrap());
        let logic = detached("script", runner);
        logic
            .invoke(
                &Trigger::new("Item")
                    .with_source("house.door")
                    .with_value(json!(true)),
            )
            .unwrap();
        assert_eq!(
            fs::read_to_string(&out).unwrap().trim(),
            "script Item house.door true"
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_script_failure_and_reload() {
        let dir = TempDir::new().unwrap();
        let script = dir.path().join("fail.sh");
        fs::write(&script, "echo broken >&2\nexit 3\n").unwrap();

        let runner = Arc::new(ScriptRunner::load("fail", &script, None).unwrap());
        let logic = detached("fail", runner);
        let err = logic.invoke(&Trigger::new("Test")).unwrap_err();
        assert!(err.to_string().contains("broken"), "{err}");

        fs::write(&script, "exit 0\n").unwrap();
        assert!(logic.invoke(&Trigger::new("Test")).is_err(), "source is cached");
        logic.reload().unwrap();
        logic.invoke(&Trigger::new("Test")).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_large_chatty_script_completes() {
        let dir = TempDir::new().unwrap();
        let script = dir.path().join("chatty.sh");
        let mut source = String::from("head -c 300000 /dev/zero\n");
        let padding = format!("# {}\n", "x".repeat(98));
        while source.len() < 700_000 {
            source.push_str(&padding);
        }
        source.push_str("exit 0\n");
        fs::write(&script, source).unwrap();

        let runner = Arc::new(ScriptRunner::load("chatty", &script, None).unwrap());
        let logic = detached("chatty", runner);
        let (tx, rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            let _ = tx.send(logic.invoke(&Trigger::new("Test")).is_ok());
        });
        assert_eq!(rx.recv_timeout(std::time::Duration::from_secs(30)), Ok(true));
    }

    #[test]
    fn test_missing_script_fails_to_load() {
        let err = ScriptRunner::load("gone", "/nonexistent/logic.sh", None).err();
        assert!(matches!(err, Some(LogicError::Read { .. })));
    }
}
