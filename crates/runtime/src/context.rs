//! Per-invocation workflow state and expression evaluation.
//!
//! The context carries the flow's variable bindings, the current message,
//! the event sink, and the cancellation signal. Parallel branches receive
//! isolated children seeded from a snapshot of the parent table.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use sr_domain::error::{Error, Result};
use sr_dsl::ast::{BinOp, Expr, Literal, StringTemplate, TplSeg};

use crate::bus::EventBus;
use crate::cancel::CancelToken;

#[derive(Clone)]
pub struct WorkflowContext {
    pub vars: HashMap<String, Value>,
    /// The message currently being processed.
    pub message: String,
    pub bus: Arc<EventBus>,
    pub cancel: CancelToken,
}

impl WorkflowContext {
    pub fn new(bus: Arc<EventBus>, cancel: CancelToken) -> Self {
        Self { vars: HashMap::new(), message: String::new(), bus, cancel }
    }

    /// Child context for one parallel branch: a copy of the variable
    /// table sharing the same bus and cancellation signal.
    pub fn child(&self) -> Self {
        self.clone()
    }

    pub fn check_cancelled(&self) -> Result<()> {
        self.cancel.check()
    }

    // ── Name resolution ──────────────────────────────────────────

    /// Resolve a variable to its display string. Structured values render
    /// as JSON; missing names resolve to the empty string.
    pub fn resolve(&self, name: &str) -> String {
        match self.vars.get(name) {
            Some(value) => value_to_display(value),
            None => String::new(),
        }
    }

    /// Resolve a dotted property path like `$chunk.meta.title`.
    ///
    /// JSON-string intermediates are coerced back to structured values;
    /// missing properties yield empty strings, never errors.
    pub fn resolve_property(&self, name: &str, props: &[String]) -> String {
        match self.property_value(name, props) {
            Some(value) => value_to_display(&value),
            None => String::new(),
        }
    }

    fn property_value(&self, name: &str, props: &[String]) -> Option<Value> {
        let mut value = self.vars.get(name)?.clone();
        for prop in props {
            value = coerce_json(value);
            value = value.get(prop.as_str())?.clone();
        }
        Some(value)
    }

    /// `len()` of a variable: list length, string char count, object
    /// size; 0 for anything else.
    pub fn len_of(&self, name: &str) -> u64 {
        match self.vars.get(name) {
            Some(Value::Array(items)) => items.len() as u64,
            Some(Value::String(s)) => s.chars().count() as u64,
            Some(Value::Object(map)) => map.len() as u64,
            _ => 0,
        }
    }

    /// Render an interpolated template against the current bindings.
    pub fn render_template(&self, template: &StringTemplate) -> String {
        let mut out = String::new();
        for seg in &template.segments {
            match seg {
                TplSeg::Text(t) => out.push_str(t),
                TplSeg::Var(n) => out.push_str(&self.resolve(n)),
                TplSeg::Prop { base, props } => out.push_str(&self.resolve_property(base, props)),
                TplSeg::Len(n) => out.push_str(&self.len_of(n).to_string()),
            }
        }
        out
    }

    // ── Expression evaluation ────────────────────────────────────

    pub fn eval(&self, expr: &Expr) -> Result<Value> {
        match expr {
            Expr::Literal(l) => Ok(literal_to_value(l)),
            Expr::Template(t) => Ok(Value::String(self.render_template(t))),
            Expr::Var(name) => Ok(self.vars.get(name).cloned().unwrap_or(Value::Null)),
            Expr::Prop { base, props } => {
                Ok(self.property_value(base, props).unwrap_or(Value::Null))
            }
            Expr::Len(name) => Ok(Value::from(self.len_of(name))),
            Expr::List(items) => {
                let values: Result<Vec<Value>> = items.iter().map(|i| self.eval(i)).collect();
                Ok(Value::Array(values?))
            }
            Expr::Binary { op, left, right } => {
                let l = self.eval(left)?;
                let r = self.eval(right)?;
                eval_binary(*op, l, r)
            }
        }
    }

    /// Evaluate a guardrail/branch condition to a boolean.
    pub fn eval_truthy(&self, expr: &Expr) -> Result<bool> {
        Ok(truthy(&self.eval(expr)?))
    }
}

pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

pub fn literal_to_value(lit: &Literal) -> Value {
    match lit {
        Literal::Int(n) => Value::from(*n),
        Literal::Float(f) => serde_json::Number::from_f64(*f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        Literal::Bool(b) => Value::Bool(*b),
        Literal::Str(s) => Value::String(s.clone()),
    }
}

/// Structured values render as compact JSON, scalars as themselves.
pub fn value_to_display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

/// Parse a JSON-string value into its structured form, when it is one.
fn coerce_json(value: Value) -> Value {
    if let Value::String(s) = &value {
        let trimmed = s.trim_start();
        if trimmed.starts_with('{') || trimmed.starts_with('[') {
            if let Ok(parsed) = serde_json::from_str::<Value>(s) {
                return parsed;
            }
        }
    }
    value
}

fn eval_binary(op: BinOp, left: Value, right: Value) -> Result<Value> {
    match op {
        BinOp::Add => add_values(left, right),
        BinOp::Eq => Ok(Value::Bool(values_equal(&left, &right))),
        BinOp::Ne => Ok(Value::Bool(!values_equal(&left, &right))),
        BinOp::NormEq => Ok(Value::Bool(
            normalize_for_comparison(&value_to_display(&left))
                == normalize_for_comparison(&value_to_display(&right)),
        )),
        BinOp::Contains => Ok(Value::Bool(contains(&left, &right))),
    }
}

/// `+` with list coercion: list + scalar appends, scalar + list prepends,
/// numbers add, everything else concatenates as strings.
fn add_values(left: Value, right: Value) -> Result<Value> {
    match (left, right) {
        (Value::Array(mut l), Value::Array(r)) => {
            l.extend(r);
            Ok(Value::Array(l))
        }
        (Value::Array(mut l), r) => {
            if !r.is_null() {
                l.push(r);
            }
            Ok(Value::Array(l))
        }
        (l, Value::Array(mut r)) => {
            if !l.is_null() {
                r.insert(0, l);
            }
            Ok(Value::Array(r))
        }
        (Value::Number(l), Value::Number(r)) => {
            if let (Some(a), Some(b)) = (l.as_i64(), r.as_i64()) {
                Ok(Value::from(a + b))
            } else {
                let sum = l.as_f64().unwrap_or(0.0) + r.as_f64().unwrap_or(0.0);
                Ok(serde_json::Number::from_f64(sum)
                    .map(Value::Number)
                    .unwrap_or(Value::Null))
            }
        }
        (l, r) => Ok(Value::String(format!(
            "{}{}",
            value_to_display(&l),
            value_to_display(&r)
        ))),
    }
}

pub fn values_equal(left: &Value, right: &Value) -> bool {
    if left == right {
        return true;
    }
    // Cross-type comparison falls back to display strings, so a model's
    // "3" compares equal to the literal 3.
    value_to_display(left) == value_to_display(right)
}

fn contains(left: &Value, right: &Value) -> bool {
    match left {
        Value::String(s) => s.contains(&value_to_display(right)),
        Value::Array(items) => items.iter().any(|i| values_equal(i, right)),
        _ => false,
    }
}

/// Normalize text for `~` comparison: strip markdown modifiers and
/// punctuation, lowercase, collapse whitespace.
pub fn normalize_for_comparison(text: &str) -> String {
    let stripped: String = text
        .chars()
        .filter(|c| !matches!(c, '*' | '_' | '`' | '#' | '.' | '!' | '?' | ',' | ';' | ':'))
        .collect();
    stripped
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> WorkflowContext {
        WorkflowContext::new(Arc::new(EventBus::new()), CancelToken::new())
    }

    #[test]
    fn resolve_missing_is_empty_string() {
        assert_eq!(ctx().resolve("nope"), "");
    }

    #[test]
    fn resolve_renders_structured_values_as_json() {
        let mut c = ctx();
        c.vars.insert("obj".into(), json!({"a": 1}));
        assert_eq!(c.resolve("obj"), "{\"a\":1}");
    }

    #[test]
    fn property_chain_traverses_and_coerces_json_strings() {
        let mut c = ctx();
        c.vars.insert(
            "chunk".into(),
            json!({"meta": "{\"title\": \"Intro\"}"}),
        );
        assert_eq!(
            c.resolve_property("chunk", &["meta".into(), "title".into()]),
            "Intro"
        );
    }

    #[test]
    fn missing_property_is_empty_not_error() {
        let mut c = ctx();
        c.vars.insert("x".into(), json!({"a": 1}));
        assert_eq!(c.resolve_property("x", &["b".into(), "c".into()]), "");
    }

    #[test]
    fn len_of_various_shapes() {
        let mut c = ctx();
        c.vars.insert("list".into(), json!([1, 2, 3]));
        c.vars.insert("text".into(), json!("abcd"));
        c.vars.insert("map".into(), json!({"a": 1, "b": 2}));
        assert_eq!(c.len_of("list"), 3);
        assert_eq!(c.len_of("text"), 4);
        assert_eq!(c.len_of("map"), 2);
        assert_eq!(c.len_of("nope"), 0);
    }

    #[test]
    fn template_rendering() {
        let mut c = ctx();
        c.vars.insert("name".into(), json!("world"));
        c.vars.insert("items".into(), json!([1, 2]));
        let t = StringTemplate::parse("hello ${name}, ${len(items)} items");
        assert_eq!(c.render_template(&t), "hello world, 2 items");
    }

    #[test]
    fn binary_add_with_lists() {
        let c = ctx();
        let l = json!([1, 2]);
        let r = json!(3);
        assert_eq!(add_values(l, r).unwrap(), json!([1, 2, 3]));
        assert_eq!(add_values(json!(1), json!(2)).unwrap(), json!(3));
        assert_eq!(
            add_values(json!("a"), json!("b")).unwrap(),
            json!("ab")
        );
        drop(c);
    }

    #[test]
    fn normalized_equality() {
        assert_eq!(
            normalize_for_comparison("**Done!**  "),
            normalize_for_comparison("done")
        );
        let result = eval_binary(BinOp::NormEq, json!("**Done!**"), json!("done")).unwrap();
        assert_eq!(result, json!(true));
    }

    #[test]
    fn contains_on_strings_and_lists() {
        assert!(contains(&json!("hello world"), &json!("world")));
        assert!(contains(&json!(["a", "b"]), &json!("b")));
        assert!(!contains(&json!(42), &json!("4")));
    }

    #[test]
    fn cross_type_equality_via_display() {
        assert!(values_equal(&json!("3"), &json!(3)));
        assert!(!values_equal(&json!("3"), &json!(4)));
    }

    #[test]
    fn child_context_is_isolated() {
        let mut parent = ctx();
        parent.vars.insert("x".into(), json!(1));
        let mut child = parent.child();
        child.vars.insert("x".into(), json!(2));
        assert_eq!(parent.vars["x"], json!(1));
    }
}
