//! The runnable form a compile produces.
//!
//! A [`CompiledProgram`] carries everything the workflow runtime needs to
//! execute a DSL file: declared models/tools/schemas/prompts/agents, flow
//! bodies lowered to instruction sequences, event handlers, and the
//! generated listing whose line numbers anchor the source map.

use std::collections::HashMap;

use crate::ast::{
    Expr, HandlerEvent, HandlerTiming, InstructionSource, Pattern, StringTemplate, ToolBackend,
    TypeExpr,
};

#[derive(Debug, Clone)]
pub struct CompiledProgram {
    /// Derived from the source filename by CamelCase + `Workflow`.
    pub class_name: String,
    pub source_file: String,
    pub version: (u32, u32),
    pub models: HashMap<String, ModelDecl>,
    pub tools: HashMap<String, ToolDecl>,
    pub schemas: HashMap<String, SchemaDecl>,
    pub prompts: HashMap<String, PromptTemplate>,
    pub agents: HashMap<String, AgentBlueprint>,
    pub flows: HashMap<String, FlowProgram>,
    pub handlers: Vec<HandlerProgram>,
    /// Generated program listing; line numbers match `Op::generated_line`.
    pub listing: String,
}

impl CompiledProgram {
    /// A bare program carcass (used by tests and cache probes).
    pub fn empty(source_file: &str) -> Self {
        Self {
            class_name: class_name_for(source_file),
            source_file: source_file.to_owned(),
            version: (1, 0),
            models: HashMap::new(),
            tools: HashMap::new(),
            schemas: HashMap::new(),
            prompts: HashMap::new(),
            agents: HashMap::new(),
            flows: HashMap::new(),
            handlers: Vec::new(),
            listing: String::new(),
        }
    }

    /// The entry flow: `main` when present, otherwise the only flow.
    pub fn entry_flow(&self) -> Option<&FlowProgram> {
        self.flows.get("main").or_else(|| {
            if self.flows.len() == 1 {
                self.flows.values().next()
            } else {
                None
            }
        })
    }

    pub fn handlers_for(
        &self,
        timing: HandlerTiming,
        event: HandlerEvent,
    ) -> impl Iterator<Item = &HandlerProgram> {
        self.handlers
            .iter()
            .filter(move |h| h.timing == timing && h.event == event)
    }
}

/// Derive the workflow class name from a source filename:
/// `code_review.sr` → `CodeReviewWorkflow`.
pub fn class_name_for(source_file: &str) -> String {
    let stem = std::path::Path::new(source_file)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(source_file);
    let mut out = String::new();
    for part in stem.split(|c: char| !c.is_alphanumeric()) {
        let mut chars = part.chars();
        if let Some(first) = chars.next() {
            out.extend(first.to_uppercase());
            out.push_str(chars.as_str());
        }
    }
    out.push_str("Workflow");
    out
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Declarations
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub struct ModelDecl {
    pub name: String,
    /// `provider/model` identifier.
    pub id: String,
    pub max_input_tokens: Option<u64>,
    /// `summarize` or `truncate`.
    pub history: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ToolDecl {
    pub name: String,
    pub backend: ToolBackend,
    pub allow: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct FieldDecl {
    pub name: String,
    pub ty: TypeExpr,
    pub optional: bool,
}

#[derive(Debug, Clone)]
pub struct SchemaDecl {
    pub name: String,
    pub fields: Vec<FieldDecl>,
}

impl SchemaDecl {
    /// Validate a JSON value against this schema, returning field-level
    /// error messages. Empty means valid.
    pub fn validate(&self, value: &serde_json::Value) -> Vec<String> {
        let mut errors = Vec::new();
        let Some(obj) = value.as_object() else {
            errors.push(format!("expected object for schema '{}'", self.name));
            return errors;
        };
        for field in &self.fields {
            match obj.get(&field.name) {
                None | Some(serde_json::Value::Null) => {
                    if !field.optional {
                        errors.push(format!("missing required field '{}'", field.name));
                    }
                }
                Some(v) => {
                    if let Some(msg) = type_error(&field.name, &field.ty, v) {
                        errors.push(msg);
                    }
                }
            }
        }
        errors
    }
}

fn type_error(field: &str, ty: &TypeExpr, value: &serde_json::Value) -> Option<String> {
    let ok = match ty {
        TypeExpr::Str => value.is_string(),
        TypeExpr::Int => value.as_i64().is_some(),
        TypeExpr::Float => value.is_number(),
        TypeExpr::Bool => value.is_boolean(),
        TypeExpr::List(inner) => {
            if let Some(items) = value.as_array() {
                for (i, item) in items.iter().enumerate() {
                    if let Some(msg) = type_error(&format!("{field}[{i}]"), inner, item) {
                        return Some(msg);
                    }
                }
                true
            } else {
                false
            }
        }
    };
    if ok {
        None
    } else {
        Some(format!(
            "field '{field}': expected {}, got {}",
            type_name(ty),
            json_type_name(value)
        ))
    }
}

fn type_name(ty: &TypeExpr) -> String {
    match ty {
        TypeExpr::Str => "string".into(),
        TypeExpr::Int => "int".into(),
        TypeExpr::Float => "float".into(),
        TypeExpr::Bool => "bool".into(),
        TypeExpr::List(inner) => format!("list[{}]", type_name(inner)),
    }
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

#[derive(Debug, Clone)]
pub struct PromptTemplate {
    pub name: String,
    pub template: StringTemplate,
}

#[derive(Debug, Clone)]
pub struct AgentBlueprint {
    pub name: String,
    pub model: Option<String>,
    pub instruction: InstructionSource,
    pub tools: Vec<String>,
    pub output: Option<String>,
    pub delegate: Vec<String>,
    pub use_agents: Vec<String>,
    pub history: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Flow instructions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub struct FlowProgram {
    pub name: String,
    pub params: Vec<String>,
    pub body: Vec<Op>,
}

/// One executable instruction, anchored to both the generated listing and
/// the original source line.
#[derive(Debug, Clone)]
pub struct Op {
    pub kind: OpKind,
    pub generated_line: u32,
    pub source_line: u32,
}

#[derive(Debug, Clone)]
pub enum OpKind {
    Assign { var: String, expr: Expr },
    PropAssign { var: String, props: Vec<String>, expr: Expr },
    RunAgent { agent: String, input: Option<Expr>, dest: Option<String> },
    CallLlm { prompt: String, input: Option<Expr>, dest: Option<String> },
    CallTool { tool: String, function: String, input: Option<Expr>, dest: Option<String> },
    Log { template: StringTemplate },
    Notify { template: StringTemplate },
    Parallel { branches: Vec<Vec<Op>> },
    For { var: String, seq: Expr, body: Vec<Op>, fan_out: bool },
    Match { subject: Expr, arms: Vec<(Pattern, Vec<Op>)> },
    Return { value: Option<Expr> },
    Continue,
    /// Emitted for flows with no statements.
    Pass,
}

#[derive(Debug, Clone)]
pub struct HandlerProgram {
    pub timing: HandlerTiming,
    pub event: HandlerEvent,
    pub steps: Vec<HandlerStep>,
}

#[derive(Debug, Clone)]
pub enum HandlerStep {
    Mask { guardrail: String },
    Block { condition: Expr },
    Warn { message: String, condition: Option<Expr> },
    Retry { message: String, condition: Expr },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn class_name_camel_cases_the_stem() {
        assert_eq!(class_name_for("code_review.sr"), "CodeReviewWorkflow");
        assert_eq!(class_name_for("agents/multi-step.sr"), "MultiStepWorkflow");
        assert_eq!(class_name_for("main.sr"), "MainWorkflow");
    }

    fn finding_schema() -> SchemaDecl {
        SchemaDecl {
            name: "Finding".into(),
            fields: vec![
                FieldDecl { name: "title".into(), ty: TypeExpr::Str, optional: false },
                FieldDecl { name: "score".into(), ty: TypeExpr::Float, optional: false },
                FieldDecl {
                    name: "tags".into(),
                    ty: TypeExpr::List(Box::new(TypeExpr::Str)),
                    optional: false,
                },
                FieldDecl { name: "note".into(), ty: TypeExpr::Str, optional: true },
            ],
        }
    }

    #[test]
    fn schema_validates_good_value() {
        let schema = finding_schema();
        let value = json!({"title": "t", "score": 0.5, "tags": ["a", "b"]});
        assert!(schema.validate(&value).is_empty());
    }

    #[test]
    fn schema_reports_missing_and_mistyped_fields() {
        let schema = finding_schema();
        let value = json!({"title": 42, "tags": ["a", 3]});
        let errors = schema.validate(&value);
        assert!(errors.iter().any(|e| e.contains("'title'") && e.contains("string")));
        assert!(errors.iter().any(|e| e.contains("missing required field 'score'")));
        assert!(errors.iter().any(|e| e.contains("tags[1]")));
    }

    #[test]
    fn optional_field_may_be_absent() {
        let schema = finding_schema();
        let value = json!({"title": "t", "score": 1.0, "tags": []});
        assert!(schema.validate(&value).is_empty());
    }

    #[test]
    fn non_object_is_rejected() {
        let schema = finding_schema();
        assert!(!schema.validate(&json!("just a string")).is_empty());
    }
}
