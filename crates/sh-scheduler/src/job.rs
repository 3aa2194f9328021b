//! Scheduler entries and the builders used to add, trigger and change them

use chrono::{DateTime, Duration, Local};
use rand::Rng;
use sh_core::{callers, Trigger, Value};
use tracing::{error, warn};

use crate::crontab::CronSpec;
use crate::error::{SchedulerError, SchedulerResult};
use crate::sun::{is_sun_expr, SunExpr, SunSource};
use crate::target::Target;

/// Default run-queue priority
pub const DEFAULT_PRIORITY: i32 = 3;

/// Delay of a bare `init` crontab entry, in seconds
pub const DEFAULT_INIT_OFFSET: i64 = 5;

/// Days until the sentinel used for rules that can never fire
const FAR_FUTURE_DAYS: i64 = 3650;

/// Next time for rules that cannot be resolved
pub fn far_future(now: DateTime<Local>) -> DateTime<Local> {
    now + Duration::days(FAR_FUTURE_DAYS)
}

/// `seconds` after `now`, or [`far_future`] when that is not representable
pub fn after_seconds(job: &str, now: DateTime<Local>, seconds: i64) -> DateTime<Local> {
    Duration::try_seconds(seconds)
        .and_then(|delay| now.checked_add_signed(delay))
        .unwrap_or_else(|| {
            error!(job = %job, seconds, "Delay out of range, entry will never fire");
            far_future(now)
        })
}

/// A job to register with [`Scheduler::add`](crate::Scheduler::add)
#[derive(Debug, Clone)]
pub struct Job {
    pub(crate) name: String,
    pub(crate) target: Target,
    pub(crate) priority: i32,
    pub(crate) cron: Vec<String>,
    pub(crate) cycle: Option<Value>,
    pub(crate) value: Option<Value>,
    pub(crate) offset: Option<i64>,
    pub(crate) next: Option<DateTime<Local>>,
}

impl Job {
    pub fn new(name: impl Into<String>, target: Target) -> Self {
        Self {
            name: name.into(),
            target,
            priority: DEFAULT_PRIORITY,
            cron: Vec::new(),
            cycle: None,
            value: None,
            offset: None,
            next: None,
        }
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Crontab entries: `"m h d wd[=value]"`, sun expressions or `"init[+N|-N][=value]"`
    pub fn cron<I, S>(mut self, cron: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cron = cron.into_iter().map(Into::into).collect();
        self
    }

    /// Cycle in seconds, or `"seconds=value"`
    pub fn cycle(mut self, cycle: impl Into<Value>) -> Self {
        self.cycle = Some(cycle.into());
        self
    }

    /// Value passed when the entry fires from an explicit `next`
    pub fn value(mut self, value: impl Into<Value>) -> Self {
        self.value = Some(value.into());
        self
    }

    /// Seconds until the first cycle run
    pub fn offset(mut self, seconds: i64) -> Self {
        self.offset = Some(seconds);
        self
    }

    /// Explicit first fire time
    pub fn next(mut self, at: DateTime<Local>) -> Self {
        self.next = Some(at);
        self
    }
}

/// A trigger request for [`Scheduler::trigger`](crate::Scheduler::trigger)
#[derive(Debug, Clone)]
pub struct Dispatch {
    pub(crate) name: String,
    pub(crate) target: Option<Target>,
    pub(crate) trigger: Trigger,
    pub(crate) priority: i32,
    pub(crate) at: Option<DateTime<Local>>,
}

impl Dispatch {
    /// Trigger `name` by `"Logic"` at the default priority, right away
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target: None,
            trigger: Trigger::new(callers::LOGIC),
            priority: DEFAULT_PRIORITY,
            at: None,
        }
    }

    /// Run this target instead of the registered entry's
    pub fn target(mut self, target: Target) -> Self {
        self.target = Some(target);
        self
    }

    /// Replace the whole trigger context
    pub fn context(mut self, trigger: Trigger) -> Self {
        self.trigger = trigger;
        self
    }

    pub fn by(mut self, caller: impl Into<String>) -> Self {
        self.trigger.caller = caller.into();
        self
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.trigger.source = Some(source.into());
        self
    }

    pub fn dest(mut self, dest: impl Into<String>) -> Self {
        self.trigger.dest = Some(dest.into());
        self
    }

    pub fn value(mut self, value: impl Into<Value>) -> Self {
        self.trigger.value = Some(value.into());
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Delay the run until `at`
    pub fn at(mut self, at: DateTime<Local>) -> Self {
        self.at = Some(at);
        self
    }
}

/// Runtime changes for [`Scheduler::change`](crate::Scheduler::change)
#[derive(Debug, Clone, Default)]
pub struct Change {
    pub(crate) active: Option<bool>,
    pub(crate) priority: Option<i32>,
    pub(crate) cron: Option<Vec<String>>,
    pub(crate) cycle: Option<Option<Value>>,
    pub(crate) value: Option<Value>,
    pub(crate) next: Option<DateTime<Local>>,
}

impl Change {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active(mut self, active: bool) -> Self {
        self.active = Some(active);
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn cron<I, S>(mut self, cron: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cron = Some(cron.into_iter().map(Into::into).collect());
        self
    }

    /// Replace the cycle; `None` removes it
    pub fn cycle(mut self, cycle: Option<Value>) -> Self {
        self.cycle = Some(cycle);
        self
    }

    pub fn value(mut self, value: impl Into<Value>) -> Self {
        self.value = Some(value.into());
        self
    }

    /// Fire at `at` instead of the computed time
    pub fn next(mut self, at: DateTime<Local>) -> Self {
        self.next = Some(at);
        self
    }
}

/// How one rule computes its next fire time
#[derive(Debug, Clone)]
pub(crate) enum Rule {
    Calendar(CronSpec),
    Sun(SunExpr),
    /// Unparseable rule, resolves to the far-future sentinel
    Invalid,
}

#[derive(Debug, Clone)]
pub(crate) struct CronRule {
    pub(crate) source: String,
    pub(crate) rule: Rule,
    pub(crate) value: Option<Value>,
}

/// A parsed `cycle`; `seconds` is `None` for a malformed one
#[derive(Debug, Clone)]
pub(crate) struct CycleRule {
    pub(crate) seconds: Option<i64>,
    pub(crate) value: Option<Value>,
}

/// Split `"expr = value"` into the expression and its optional value
fn split_value(entry: &str) -> (&str, Option<Value>) {
    match entry.split_once('=') {
        Some((desc, value)) => {
            let value = value.trim();
            let value = (!value.is_empty()).then(|| Value::String(value.to_string()));
            (desc.trim(), value)
        }
        None => (entry.trim(), None),
    }
}

/// Result of parsing a crontab list
#[derive(Debug, Default)]
pub(crate) struct ParsedCron {
    pub(crate) rules: Vec<CronRule>,
    /// `(offset seconds, value)` of an `init` entry
    pub(crate) init: Option<(i64, Option<Value>)>,
}

pub(crate) fn parse_cron(name: &str, entries: &[String]) -> ParsedCron {
    let mut parsed = ParsedCron::default();
    for entry in entries {
        let (desc, value) = split_value(entry);
        if let Some(rest) = desc.strip_prefix("init") {
            let rest: String = rest.chars().filter(|c| !c.is_whitespace()).collect();
            let offset = if rest.is_empty() {
                Some(DEFAULT_INIT_OFFSET)
            } else {
                rest.parse::<i64>().ok().filter(|_| rest.starts_with(['+', '-']))
            };
            match offset {
                Some(offset) => parsed.init = Some((offset, value)),
                None => error!(job = %name, entry = %entry, "Invalid init offset, ignoring entry"),
            }
            continue;
        }

        let rule = if is_sun_expr(desc) {
            desc.parse::<SunExpr>().map(Rule::Sun)
        } else {
            desc.parse::<CronSpec>().map(Rule::Calendar)
        };
        let rule = rule.unwrap_or_else(|e| {
            error!(job = %name, error = %e, "Invalid crontab entry, it will never fire");
            Rule::Invalid
        });
        parsed.rules.push(CronRule {
            source: desc.to_string(),
            rule,
            value,
        });
    }
    parsed
}

/// Parse `seconds` or `"seconds = value"`
pub(crate) fn parse_cycle(cycle: &Value) -> SchedulerResult<CycleRule> {
    let (seconds, value) = match cycle {
        Value::Number(n) => (n.as_i64(), None),
        Value::String(s) => {
            let (desc, value) = split_value(s);
            (desc.parse::<i64>().ok(), value)
        }
        _ => (None, None),
    };
    match seconds {
        Some(seconds) if seconds > 0 => Ok(CycleRule {
            seconds: Some(seconds),
            value,
        }),
        _ => Err(SchedulerError::InvalidCycle {
            value: cycle.to_string(),
        }),
    }
}

/// Parse a cycle, keeping a malformed one as a rule that never fires
pub(crate) fn cycle_rule(name: &str, cycle: &Value) -> CycleRule {
    parse_cycle(cycle).unwrap_or_else(|e| {
        error!(job = %name, error = %e, "Invalid cycle, it will never fire");
        CycleRule {
            seconds: None,
            value: None,
        }
    })
}

/// Random first-run delay that spreads cycle entries over 10..=15 s
pub(crate) fn random_offset() -> i64 {
    rand::thread_rng().gen_range(10..=15)
}

/// A registered scheduler entry
#[derive(Debug, Clone)]
pub(crate) struct Entry {
    pub(crate) target: Target,
    pub(crate) priority: i32,
    pub(crate) cron: Vec<CronRule>,
    pub(crate) cycle: Option<CycleRule>,
    pub(crate) value: Option<Value>,
    pub(crate) next: Option<DateTime<Local>>,
    pub(crate) active: bool,
}

impl Entry {
    pub(crate) fn has_schedule(&self) -> bool {
        !self.cron.is_empty() || self.cycle.is_some()
    }

    /// Recompute `next` and `value` from the cycle and cron rules
    ///
    /// The earliest rule wins and contributes its value. `offset` replaces
    /// the cycle interval for this computation only.
    pub(crate) fn compute_next(
        &mut self,
        name: &str,
        now: DateTime<Local>,
        offset: Option<i64>,
        sun: Option<&dyn SunSource>,
    ) {
        if !self.has_schedule() {
            return;
        }
        let now = now - Duration::nanoseconds(i64::from(now.timestamp_subsec_nanos()));
        let mut next: Option<(DateTime<Local>, Option<Value>)> = None;

        if let Some(cycle) = &self.cycle {
            let at = match cycle.seconds {
                Some(seconds) => after_seconds(name, now, offset.unwrap_or(seconds)),
                None => far_future(now),
            };
            next = Some((at, cycle.value.clone()));
        }

        for rule in &self.cron {
            let at = match &rule.rule {
                Rule::Calendar(spec) => spec.next_after(&now),
                Rule::Sun(expr) => match sun {
                    Some(sun) => expr.next_after(now, sun),
                    None => {
                        warn!(job = %name, rule = %rule.source, "No location configured, sun expression will never fire");
                        None
                    }
                },
                Rule::Invalid => None,
            }
            .unwrap_or_else(|| far_future(now));

            if next.as_ref().map_or(true, |(current, _)| at < *current) {
                next = Some((at, rule.value.clone()));
            }
        }

        if let Some((at, value)) = next {
            self.next = Some(at);
            self.value = value;
        }
    }
}

/// Read-only view of a scheduler entry
#[derive(Debug, Clone, PartialEq)]
pub struct EntryInfo {
    pub name: String,
    pub kind: &'static str,
    pub priority: i32,
    pub active: bool,
    pub next: Option<DateTime<Local>>,
    pub value: Option<Value>,
    pub cron: Vec<String>,
    pub cycle: Option<i64>,
}

impl EntryInfo {
    pub(crate) fn from_entry(name: &str, entry: &Entry) -> Self {
        Self {
            name: name.to_string(),
            kind: entry.target.kind(),
            priority: entry.priority,
            active: entry.active,
            next: entry.next,
            value: entry.value.clone(),
            cron: entry.cron.iter().map(|r| r.source.clone()).collect(),
            cycle: entry.cycle.as_ref().and_then(|c| c.seconds),
        }
    }
}
