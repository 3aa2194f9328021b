//! Item `eval` expressions
//!
//! Expressions use the minijinja expression syntax and are evaluated
//! against the trigger context (`value`, `caller`, `source`, `dest`) and
//! the item tree, which is reachable through `sh`:
//!
//! - `sh.<path>()` - current value
//! - `sh.<path>.prev_value()` - value before the last change
//! - `sh.<path>.age()` - seconds since the last change
//! - `sh.<path>.prev_age()` - seconds between the previous and the last change
//!
//! The global functions `bool int float str abs round min max len` follow
//! Python. Any other name is rejected when the expression is compiled.

use minijinja::value::{Object, ObjectRepr, Rest, Value as JinjaValue};
use minijinja::{context, Environment, Error, ErrorKind, State, UndefinedBehavior};
use serde_json::{Number, Value};
use sh_core::Trigger;
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, OnceLock};

use crate::error::{EvalError, EvalResult};

/// Trigger context variables, plus the item tree root
const VARIABLES: [&str; 5] = ["value", "caller", "source", "dest", "sh"];

/// Item state visible to expressions
pub trait ItemScope {
    fn value(&self, path: &str) -> Option<Value>;
    fn prev_value(&self, path: &str) -> Option<Value>;
    /// Seconds since the last change
    fn age(&self, path: &str) -> Option<f64>;
    /// Seconds between the previous and the last change
    fn prev_age(&self, path: &str) -> Option<f64>;
}

/// Which property of an item a reference reads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemAttr {
    Value,
    PrevValue,
    Age,
    PrevAge,
}

impl ItemAttr {
    fn from_method(name: &str) -> Option<Self> {
        match name {
            "prev_value" => Some(ItemAttr::PrevValue),
            "age" => Some(ItemAttr::Age),
            "prev_age" => Some(ItemAttr::PrevAge),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Func {
    Bool,
    Int,
    Float,
    Str,
    Abs,
    Round,
    Min,
    Max,
    Len,
}

impl Func {
    const ALL: [Func; 9] = [
        Func::Bool,
        Func::Int,
        Func::Float,
        Func::Str,
        Func::Abs,
        Func::Round,
        Func::Min,
        Func::Max,
        Func::Len,
    ];

    fn name(self) -> &'static str {
        match self {
            Func::Bool => "bool",
            Func::Int => "int",
            Func::Float => "float",
            Func::Str => "str",
            Func::Abs => "abs",
            Func::Round => "round",
            Func::Min => "min",
            Func::Max => "max",
            Func::Len => "len",
        }
    }

    fn is_known(name: &str) -> bool {
        Func::ALL.iter().any(|f| f.name() == name)
    }
}

/// Shared environment holding the expression functions
fn environment() -> &'static Environment<'static> {
    static ENVIRONMENT: OnceLock<Environment<'static>> = OnceLock::new();
    ENVIRONMENT.get_or_init(|| {
        let mut env = Environment::empty();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        for func in Func::ALL {
            env.add_function(func.name(), move |args: Rest<JinjaValue>| call(func, &args));
        }
        env
    })
}

/// A checked `eval` expression
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    source: String,
    /// `sh.` lookup chains, without the `sh.` prefix
    chains: Vec<String>,
}

impl Expression {
    /// Parse `source` and check that it only uses known names
    pub fn compile(source: &str) -> EvalResult<Self> {
        let expr = environment().compile_expression(source)?;

        let mut unknown: Vec<String> = expr
            .undeclared_variables(false)
            .into_iter()
            .filter(|name| !VARIABLES.contains(&name.as_str()) && !Func::is_known(name))
            .collect();
        unknown.sort();
        if let Some(name) = unknown.into_iter().next() {
            return Err(EvalError::UnknownName { name });
        }

        let chains: BTreeSet<String> = expr
            .undeclared_variables(true)
            .into_iter()
            .filter_map(|name| name.strip_prefix("sh.").map(str::to_string))
            .collect();

        Ok(Self {
            source: source.to_string(),
            chains: chains.into_iter().collect(),
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Paths of the items the expression reads, sorted
    pub fn item_refs(&self) -> Vec<String> {
        let paths: BTreeSet<String> = self
            .chains
            .iter()
            .map(|chain| split_chain(chain).0.to_string())
            .collect();
        paths.into_iter().collect()
    }

    /// Evaluate against a trigger context; `Null` means "no result"
    pub fn eval(&self, trigger: &Trigger, scope: &dyn ItemScope) -> EvalResult<Value> {
        let expr = environment().compile_expression(&self.source)?;
        let items = ItemPath {
            reads: Arc::new(Reads::collect(&self.chains, scope)),
            path: String::new(),
        };
        let ctx = context! {
            value => trigger.value.clone().map_or(JinjaValue::from(()), to_jinja),
            caller => trigger.caller.as_str(),
            source => trigger.source.as_deref(),
            dest => trigger.dest.as_deref(),
            sh => JinjaValue::from_object(items),
        };
        to_json(&expr.eval(ctx)?)
    }
}

impl FromStr for Expression {
    type Err = EvalError;

    fn from_str(s: &str) -> EvalResult<Self> {
        Self::compile(s)
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Split `house.temp.age` into the item path and the property it reads
fn split_chain(chain: &str) -> (&str, ItemAttr) {
    chain
        .rsplit_once('.')
        .and_then(|(path, method)| ItemAttr::from_method(method).map(|attr| (path, attr)))
        .unwrap_or((chain, ItemAttr::Value))
}

/// Expand an aggregate `eval` keyword over the resolved trigger items
///
/// `and`/`or` join the item values with the operator, `sum` adds them and
/// `avg` divides the sum by the item count. Returns `None` for any other
/// `eval` text.
pub fn expand_aggregate(keyword: &str, paths: &[String]) -> Option<String> {
    let refs: Vec<String> = paths.iter().map(|p| format!("sh.{p}()")).collect();
    let expanded = match keyword.trim() {
        _ if refs.is_empty() && is_aggregate(keyword) => "None".to_string(),
        "and" => refs.join(" and "),
        "or" => refs.join(" or "),
        "sum" => refs.join(" + "),
        "avg" => format!("({}) / {}.0", refs.join(" + "), refs.len()),
        _ => return None,
    };
    Some(expanded)
}

/// Whether an `eval` attribute is one of the aggregate keywords
pub fn is_aggregate(keyword: &str) -> bool {
    matches!(keyword.trim(), "and" | "or" | "sum" | "avg")
}

// ==================== Item tree ====================

/// Item properties read for one evaluation
#[derive(Debug, Default)]
struct Reads(HashMap<(String, ItemAttr), Value>);

impl Reads {
    /// Read every property the chains may resolve to
    ///
    /// `house.age` is either the age of `house` or the value of an item
    /// named `house.age`; both are read when they exist.
    fn collect(chains: &[String], scope: &dyn ItemScope) -> Self {
        let mut reads = HashMap::new();
        for chain in chains {
            let (path, attr) = split_chain(chain);
            let read = match attr {
                ItemAttr::Value => scope.value(path),
                ItemAttr::PrevValue => scope.prev_value(path),
                ItemAttr::Age => scope.age(path).map(Value::from),
                ItemAttr::PrevAge => scope.prev_age(path).map(Value::from),
            };
            if let Some(value) = read {
                reads.insert((path.to_string(), attr), value);
            }
            if attr != ItemAttr::Value {
                if let Some(value) = scope.value(chain) {
                    reads.insert((chain.clone(), ItemAttr::Value), value);
                }
            }
        }
        Self(reads)
    }

    fn get(&self, path: &str, attr: ItemAttr) -> Option<&Value> {
        self.0.get(&(path.to_string(), attr))
    }
}

/// `sh` and every `sh.<path>` below it
#[derive(Debug)]
struct ItemPath {
    reads: Arc<Reads>,
    path: String,
}

impl ItemPath {
    fn join(&self, segment: &str) -> String {
        if self.path.is_empty() {
            segment.to_string()
        } else {
            format!("{}.{}", self.path, segment)
        }
    }

    fn read(&self, path: &str, attr: ItemAttr) -> Result<JinjaValue, Error> {
        self.reads
            .get(path, attr)
            .map(|value| to_jinja(value.clone()))
            .ok_or_else(|| Error::new(ErrorKind::UndefinedError, format!("unknown item: {path}")))
    }
}

fn no_args(path: &str, args: &[JinjaValue]) -> Result<(), Error> {
    if args.is_empty() {
        Ok(())
    } else {
        Err(Error::new(
            ErrorKind::TooManyArguments,
            format!("sh.{path}() takes no arguments"),
        ))
    }
}

impl Object for ItemPath {
    fn repr(self: &Arc<Self>) -> ObjectRepr {
        ObjectRepr::Plain
    }

    fn get_value(self: &Arc<Self>, key: &JinjaValue) -> Option<JinjaValue> {
        let segment = match key.as_str() {
            Some(name) => name.to_string(),
            None => key.as_i64()?.to_string(),
        };
        Some(JinjaValue::from_object(ItemPath {
            reads: self.reads.clone(),
            path: self.join(&segment),
        }))
    }

    fn call(self: &Arc<Self>, _state: &State<'_, '_>, args: &[JinjaValue]) -> Result<JinjaValue, Error> {
        no_args(&self.path, args)?;
        self.read(&self.path, ItemAttr::Value)
    }

    fn call_method(
        self: &Arc<Self>,
        _state: &State<'_, '_>,
        method: &str,
        args: &[JinjaValue],
    ) -> Result<JinjaValue, Error> {
        let child = self.join(method);
        no_args(&child, args)?;
        match ItemAttr::from_method(method) {
            Some(attr) if self.reads.get(&self.path, attr).is_some() => self.read(&self.path, attr),
            _ => self.read(&child, ItemAttr::Value),
        }
    }
}

// ==================== Values ====================

/// Convert an item value for the expression engine
fn to_jinja(json: Value) -> JinjaValue {
    match json {
        Value::Null => JinjaValue::from(()),
        Value::Bool(b) => JinjaValue::from(b),
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => JinjaValue::from(i),
            (None, Some(f)) => JinjaValue::from(f),
            (None, None) => JinjaValue::from(n.to_string()),
        },
        Value::String(s) => JinjaValue::from(s),
        Value::Array(items) => JinjaValue::from(items.into_iter().map(to_jinja).collect::<Vec<_>>()),
        Value::Object(map) => {
            let map: std::collections::BTreeMap<String, JinjaValue> =
                map.into_iter().map(|(k, v)| (k, to_jinja(v))).collect();
            JinjaValue::from_object(map)
        }
    }
}

/// Convert an expression result back into an item value
fn to_json(value: &JinjaValue) -> EvalResult<Value> {
    if value.is_undefined() || value.is_none() {
        return Ok(Value::Null);
    }
    let json = serde_json::to_value(value).map_err(|e| EvalError::type_error(e.to_string()))?;
    if json.is_null() {
        return Err(EvalError::type_error(format!("{value} is not a finite number")));
    }
    Ok(json)
}

/// Run a global function on converted arguments
fn call(func: Func, args: &[JinjaValue]) -> Result<JinjaValue, Error> {
    args.iter()
        .map(to_json)
        .collect::<EvalResult<Vec<_>>>()
        .and_then(|args| apply(func, args))
        .map(to_jinja)
        .map_err(|e| Error::new(ErrorKind::InvalidOperation, e.to_string()))
}

/// Python truthiness of a value
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Python `str()` of a value
pub fn display_value(value: &Value) -> String {
    match value {
        Value::Null => "None".to_string(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::Number(n) => match n.as_i64() {
            Some(i) => i.to_string(),
            None => {
                let f = n.as_f64().unwrap_or(f64::NAN);
                if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e16 {
                    format!("{f:.1}")
                } else {
                    f.to_string()
                }
            }
        },
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[derive(Debug, Clone, Copy)]
enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    fn of(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(Num::Int(i64::from(*b))),
            Value::Number(n) => n
                .as_i64()
                .map(Num::Int)
                .or_else(|| n.as_f64().map(Num::Float)),
            _ => None,
        }
    }

    fn as_f64(self) -> f64 {
        match self {
            Num::Int(i) => i as f64,
            Num::Float(f) => f,
        }
    }
}

fn float_value(f: f64) -> EvalResult<Value> {
    Number::from_f64(f)
        .map(Value::Number)
        .ok_or_else(|| EvalError::type_error(format!("{f} is not a finite number")))
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "None",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "int",
        Value::String(_) => "str",
        Value::Array(_) => "list",
        Value::Object(_) => "dict",
    }
}

/// Round half to even, as Python does
fn round_even(x: f64) -> f64 {
    let r = x.round();
    if (x - x.trunc()).abs() == 0.5 {
        2.0 * (x / 2.0).round()
    } else {
        r
    }
}

/// Ordering for `min()` and `max()`
fn order(left: &Value, right: &Value) -> EvalResult<Ordering> {
    match (left, right) {
        (Value::String(a), Value::String(b)) => Ok(a.cmp(b)),
        _ => match (Num::of(left), Num::of(right)) {
            (Some(a), Some(b)) => a
                .as_f64()
                .partial_cmp(&b.as_f64())
                .ok_or_else(|| EvalError::type_error("cannot order NaN")),
            _ => Err(EvalError::type_error(format!(
                "cannot order {} and {}",
                type_name(left),
                type_name(right)
            ))),
        },
    }
}

fn single(func: Func, mut args: Vec<Value>) -> EvalResult<Value> {
    if args.len() != 1 {
        return Err(EvalError::Arity {
            function: func.name(),
            expected: "1",
            found: args.len(),
        });
    }
    Ok(args.remove(0))
}

fn apply(func: Func, args: Vec<Value>) -> EvalResult<Value> {
    match func {
        Func::Bool => match args.len() {
            0 => Ok(Value::Bool(false)),
            _ => Ok(Value::Bool(truthy(&single(func, args)?))),
        },
        Func::Int => {
            let v = single(func, args)?;
            match (&v, Num::of(&v)) {
                (_, Some(Num::Int(i))) => Ok(Value::from(i)),
                (_, Some(Num::Float(f))) if f.is_finite() => Ok(Value::from(f.trunc() as i64)),
                (Value::String(s), _) => s
                    .trim()
                    .parse::<i64>()
                    .map(Value::from)
                    .map_err(|_| EvalError::type_error(format!("invalid literal for int(): {s:?}"))),
                _ => Err(EvalError::type_error(format!(
                    "int() argument must be a string or a number, not {}",
                    type_name(&v)
                ))),
            }
        }
        Func::Float => {
            let v = single(func, args)?;
            match (&v, Num::of(&v)) {
                (_, Some(n)) => float_value(n.as_f64()),
                (Value::String(s), _) => s
                    .trim()
                    .parse::<f64>()
                    .map_err(|_| {
                        EvalError::type_error(format!("could not convert string to float: {s:?}"))
                    })
                    .and_then(float_value),
                _ => Err(EvalError::type_error(format!(
                    "float() argument must be a string or a number, not {}",
                    type_name(&v)
                ))),
            }
        }
        Func::Str => Ok(Value::String(display_value(&single(func, args)?))),
        Func::Abs => {
            let v = single(func, args)?;
            match Num::of(&v) {
                Some(Num::Int(i)) => Ok(Value::from(i.saturating_abs())),
                Some(Num::Float(f)) => float_value(f.abs()),
                None => Err(EvalError::type_error(format!(
                    "bad operand type for abs(): {}",
                    type_name(&v)
                ))),
            }
        }
        Func::Round => {
            let found = args.len();
            let mut args = args.into_iter();
            let (Some(x), digits, None) = (args.next(), args.next(), args.next()) else {
                return Err(EvalError::Arity {
                    function: "round",
                    expected: "1 or 2",
                    found,
                });
            };
            let x = Num::of(&x).ok_or_else(|| {
                EvalError::type_error(format!("type {} doesn't define round()", type_name(&x)))
            })?;
            match digits {
                None => match x {
                    Num::Int(i) => Ok(Value::from(i)),
                    Num::Float(f) => Ok(Value::from(round_even(f) as i64)),
                },
                Some(d) => {
                    let Some(Num::Int(d)) = Num::of(&d) else {
                        return Err(EvalError::type_error("round() digits must be an integer"));
                    };
                    let scale = 10f64.powi(d.clamp(-308, 308) as i32);
                    float_value(round_even(x.as_f64() * scale) / scale)
                }
            }
        }
        Func::Min | Func::Max => {
            let values = match args.as_slice() {
                [Value::Array(items)] => items.clone(),
                _ => args,
            };
            let want = if func == Func::Min {
                Ordering::Less
            } else {
                Ordering::Greater
            };
            let mut iter = values.into_iter();
            let Some(mut best) = iter.next() else {
                return Err(EvalError::type_error(format!(
                    "{}() arg is an empty sequence",
                    func.name()
                )));
            };
            for v in iter {
                if order(&v, &best)? == want {
                    best = v;
                }
            }
            Ok(best)
        }
        Func::Len => {
            let v = single(func, args)?;
            let len = match &v {
                Value::String(s) => s.chars().count(),
                Value::Array(a) => a.len(),
                Value::Object(o) => o.len(),
                other => {
                    return Err(EvalError::type_error(format!(
                        "object of type {} has no len()",
                        type_name(other)
                    )))
                }
            };
            Ok(Value::from(len as u64))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Default)]
    struct Scope(HashMap<String, (Value, Value, f64, f64)>);

    impl Scope {
        fn with(mut self, path: &str, value: Value, prev: Value) -> Self {
            self.0.insert(path.to_string(), (value, prev, 12.5, 60.0));
            self
        }
    }

    impl ItemScope for Scope {
        fn value(&self, path: &str) -> Option<Value> {
            self.0.get(path).map(|e| e.0.clone())
        }
        fn prev_value(&self, path: &str) -> Option<Value> {
            self.0.get(path).map(|e| e.1.clone())
        }
        fn age(&self, path: &str) -> Option<f64> {
            self.0.get(path).map(|e| e.2)
        }
        fn prev_age(&self, path: &str) -> Option<f64> {
            self.0.get(path).map(|e| e.3)
        }
    }

    fn eval(src: &str) -> Value {
        eval_with(src, &Scope::default(), &Trigger::new("Test"))
    }

    fn eval_with(src: &str, scope: &Scope, trigger: &Trigger) -> Value {
        Expression::compile(src)
            .unwrap_or_else(|e| panic!("{src}: {e}"))
            .eval(trigger, scope)
            .unwrap_or_else(|e| panic!("{src}: {e}"))
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(eval("1 + 2 * 3"), json!(7));
        assert_eq!(eval("(1 + 2) * 3"), json!(9));
        assert_eq!(eval("7 / 2"), json!(3.5));
        assert_eq!(eval("7 // 2"), json!(3));
        assert_eq!(eval("7 % 3"), json!(1));
        assert_eq!(eval("2 - -3"), json!(5));
        assert_eq!(eval("'a' + \"b\""), json!("ab"));
    }

    #[test]
    fn test_boolean_operators_return_operands() {
        assert_eq!(eval("0 or 'x'"), json!("x"));
        assert_eq!(eval("1 and 0"), json!(0));
        assert_eq!(eval("not []"), json!(true));
        assert_eq!(eval("None or False"), json!(false));
        assert_eq!(eval("1 == 1.0"), json!(true));
        assert_eq!(eval("'on' if 5 > 3 else 'off'"), json!("on"));
        assert_eq!(eval("None"), Value::Null);
    }

    #[test]
    fn test_functions() {
        assert_eq!(eval("int('42')"), json!(42));
        assert_eq!(eval("int(3.9)"), json!(3));
        assert_eq!(eval("float('1.5')"), json!(1.5));
        assert_eq!(eval("str(2.0)"), json!("2.0"));
        assert_eq!(eval("str(True)"), json!("True"));
        assert_eq!(eval("round(2.5)"), json!(2));
        assert_eq!(eval("round(3.5)"), json!(4));
        assert_eq!(eval("round(1.256, 2)"), json!(1.26));
        assert_eq!(eval("abs(-4)"), json!(4));
        assert_eq!(eval("min(3, 1, 2)"), json!(1));
        assert_eq!(eval("max([3, 7, 2])"), json!(7));
        assert_eq!(eval("len('abc')"), json!(3));
        assert_eq!(eval("bool('')"), json!(false));
    }

    #[test]
    fn test_item_references() {
        let scope = Scope::default()
            .with("house.temp", json!(21.5), json!(20))
            .with("house.door", json!(true), json!(false));
        let trigger = Trigger::new("Test");

        assert_eq!(eval_with("sh.house.temp()", &scope, &trigger), json!(21.5));
        assert_eq!(eval_with("sh.house.temp.prev_value()", &scope, &trigger), json!(20));
        assert_eq!(eval_with("sh.house.temp.age()", &scope, &trigger), json!(12.5));
        assert_eq!(eval_with("sh.house.temp.prev_age()", &scope, &trigger), json!(60.0));
        assert_eq!(
            eval_with("sh.house.door() and sh.house.temp() > 21", &scope, &trigger),
            json!(true)
        );

        let expr = Expression::compile("sh.house.temp() + sh.house.missing()").unwrap();
        assert_eq!(expr.item_refs(), vec!["house.missing", "house.temp"]);
        assert!(matches!(
            expr.eval(&trigger, &scope),
            Err(EvalError::Runtime { .. })
        ));
    }

    #[test]
    fn test_child_named_like_a_property() {
        let scope = Scope::default().with("meter.age", json!(7), Value::Null);
        let trigger = Trigger::new("Test");
        assert_eq!(eval_with("sh.meter.age()", &scope, &trigger), json!(7));
    }

    #[test]
    fn test_unread_items_do_not_fail() {
        let scope = Scope::default().with("a", json!(1), Value::Null);
        let trigger = Trigger::new("Test");
        assert_eq!(eval_with("sh.a() or sh.missing()", &scope, &trigger), json!(1));
    }

    #[test]
    fn test_trigger_variables() {
        let trigger = Trigger::new("Logic")
            .with_source("house.a")
            .with_value(json!(4));
        let scope = Scope::default();
        assert_eq!(eval_with("value * 2", &scope, &trigger), json!(8));
        assert_eq!(eval_with("caller", &scope, &trigger), json!("Logic"));
        assert_eq!(eval_with("source", &scope, &trigger), json!("house.a"));
        assert_eq!(eval_with("dest", &scope, &trigger), Value::Null);
    }

    #[test]
    fn test_compile_errors() {
        for src in ["1 +", "(1", "'open", "1 2"] {
            assert!(
                matches!(Expression::compile(src), Err(EvalError::Syntax { .. })),
                "{src}"
            );
        }
        assert_eq!(
            Expression::compile("os.system()"),
            Err(EvalError::UnknownName {
                name: "os".to_string()
            })
        );
        assert_eq!(
            Expression::compile("exec('x')"),
            Err(EvalError::UnknownName {
                name: "exec".to_string()
            })
        );
    }

    #[test]
    fn test_runtime_errors() {
        let scope = Scope::default();
        let trigger = Trigger::new("Test");
        let run = |src: &str| Expression::compile(src).unwrap().eval(&trigger, &scope);
        assert!(run("1 / 0").is_err());
        assert!(run("'a' - 1").is_err());
        assert!(matches!(run("int('x')"), Err(EvalError::Runtime { .. })));
        assert!(matches!(run("sh.a(1)"), Err(EvalError::Runtime { .. })));
    }

    #[test]
    fn test_expand_aggregate() {
        let deps = vec!["a.x".to_string(), "a.y".to_string()];
        assert_eq!(
            expand_aggregate("and", &deps).as_deref(),
            Some("sh.a.x() and sh.a.y()")
        );
        assert_eq!(
            expand_aggregate("sum", &deps).as_deref(),
            Some("sh.a.x() + sh.a.y()")
        );
        assert_eq!(
            expand_aggregate("avg", &deps).as_deref(),
            Some("(sh.a.x() + sh.a.y()) / 2.0")
        );
        assert_eq!(expand_aggregate("or", &[]).as_deref(), Some("None"));
        assert_eq!(expand_aggregate("sh.a.x() * 2", &deps), None);

        let scope = Scope::default()
            .with("a.x", json!(3), Value::Null)
            .with("a.y", json!(4), Value::Null);
        let avg = expand_aggregate("avg", &deps).unwrap();
        assert_eq!(eval_with(&avg, &scope, &Trigger::new("Test")), json!(3.5));
    }
}
