//! Abstract syntax tree for the DSL.
//!
//! Every node carries the [`Span`] of its defining token so diagnostics and
//! source mappings can point back into the original file.

use serde::{Deserialize, Serialize};

use crate::token::Span;

/// A parsed source file: the mandatory version header plus top-level
/// definitions in source order.
#[derive(Debug, Clone)]
pub struct DslFile {
    pub version: VersionDecl,
    pub defs: Vec<Definition>,
}

#[derive(Debug, Clone)]
pub struct VersionDecl {
    pub major: u32,
    pub minor: u32,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum Definition {
    Model(ModelDef),
    Tool(ToolDef),
    Schema(SchemaDef),
    Prompt(PromptDef),
    Agent(AgentDef),
    Flow(FlowDef),
    Handler(EventHandler),
}

impl Definition {
    pub fn name(&self) -> Option<&str> {
        match self {
            Definition::Model(d) => Some(&d.name),
            Definition::Tool(d) => Some(&d.name),
            Definition::Schema(d) => Some(&d.name),
            Definition::Prompt(d) => Some(&d.name),
            Definition::Agent(d) => Some(&d.name),
            Definition::Flow(d) => Some(&d.name),
            Definition::Handler(_) => None,
        }
    }

    pub fn span(&self) -> Span {
        match self {
            Definition::Model(d) => d.span,
            Definition::Tool(d) => d.span,
            Definition::Schema(d) => d.span,
            Definition::Prompt(d) => d.span,
            Definition::Agent(d) => d.span,
            Definition::Flow(d) => d.span,
            Definition::Handler(d) => d.span,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level definitions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub struct ModelDef {
    pub name: String,
    /// Provider identifier (e.g. `anthropic`).
    pub provider: String,
    /// Model identifier within the provider.
    pub model: String,
    pub max_input_tokens: Option<u64>,
    /// `summarize` or `truncate`.
    pub history: Option<String>,
    pub span: Span,
}

/// Where a tool's implementation lives.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolBackend {
    /// In-process registry lookup by dotted `module.function` path.
    Builtin { path: String },
    /// Remote MCP server. `transport` is `stdio`, `http`, or `sse`.
    Mcp { transport: String, target: String },
    /// Direct callable addressed as `module.path:function`.
    Callable { import_path: String },
}

#[derive(Debug, Clone)]
pub struct ToolDef {
    pub name: String,
    pub backend: ToolBackend,
    /// Tool-name allow-list for remote servers (wildcards permitted).
    pub allow: Vec<String>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct SchemaDef {
    pub name: String,
    pub fields: Vec<SchemaField>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct SchemaField {
    pub name: String,
    pub ty: TypeExpr,
    pub optional: bool,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TypeExpr {
    Str,
    Int,
    Float,
    Bool,
    List(Box<TypeExpr>),
}

#[derive(Debug, Clone)]
pub struct PromptDef {
    pub name: String,
    /// Raw body text with interpolation markers intact.
    pub body: String,
    pub span: Span,
}

/// An agent's instruction: inline string or a reference to a prompt block.
#[derive(Debug, Clone, PartialEq)]
pub enum InstructionSource {
    Inline(String),
    PromptRef(String),
}

#[derive(Debug, Clone)]
pub struct AgentDef {
    pub name: String,
    pub model: Option<String>,
    pub instruction: Option<InstructionSource>,
    pub tools: Vec<String>,
    /// Structured-output schema name.
    pub output: Option<String>,
    pub delegate: Vec<String>,
    pub use_agents: Vec<String>,
    pub history: Option<String>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct FlowDef {
    pub name: String,
    pub params: Vec<String>,
    pub body: Vec<Stmt>,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerTiming {
    Before,
    After,
}

impl HandlerTiming {
    pub fn as_str(&self) -> &'static str {
        match self {
            HandlerTiming::Before => "before",
            HandlerTiming::After => "after",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerEvent {
    Model,
    Tool,
    Agent,
}

impl HandlerEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            HandlerEvent::Model => "model",
            HandlerEvent::Tool => "tool",
            HandlerEvent::Agent => "agent",
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventHandler {
    pub timing: HandlerTiming,
    pub event: HandlerEvent,
    pub body: Vec<HandlerStmt>,
    pub span: Span,
}

/// Guardrail actions allowed inside event handlers.
#[derive(Debug, Clone)]
pub enum HandlerStmt {
    Mask { guardrail: String, span: Span },
    Block { condition: Expr, span: Span },
    Warn { message: String, condition: Option<Expr>, span: Span },
    Retry { message: String, condition: Expr, span: Span },
}

impl HandlerStmt {
    pub fn span(&self) -> Span {
        match self {
            HandlerStmt::Mask { span, .. }
            | HandlerStmt::Block { span, .. }
            | HandlerStmt::Warn { span, .. }
            | HandlerStmt::Retry { span, .. } => *span,
        }
    }

    pub fn action_name(&self) -> &'static str {
        match self {
            HandlerStmt::Mask { .. } => "mask",
            HandlerStmt::Block { .. } => "block",
            HandlerStmt::Warn { .. } => "warn",
            HandlerStmt::Retry { .. } => "retry",
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Statements
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub enum Stmt {
    Assign { var: String, expr: Expr, span: Span },
    PropAssign { var: String, props: Vec<String>, expr: Expr, span: Span },
    Run { agent: String, input: Option<Expr>, dest: Option<String>, span: Span },
    CallLlm { prompt: String, input: Option<Expr>, dest: Option<String>, span: Span },
    CallTool { tool: String, function: String, input: Option<Expr>, dest: Option<String>, span: Span },
    Log { template: StringTemplate, span: Span },
    Notify { template: StringTemplate, span: Span },
    /// Each child statement is one concurrent branch.
    Parallel { branches: Vec<Stmt>, span: Span },
    For { var: String, seq: Expr, body: Vec<Stmt>, span: Span },
    Match { subject: Expr, arms: Vec<MatchArm>, span: Span },
    Return { value: Option<Expr>, span: Span },
    Continue { span: Span },
}

impl Stmt {
    pub fn span(&self) -> Span {
        match self {
            Stmt::Assign { span, .. }
            | Stmt::PropAssign { span, .. }
            | Stmt::Run { span, .. }
            | Stmt::CallLlm { span, .. }
            | Stmt::CallTool { span, .. }
            | Stmt::Log { span, .. }
            | Stmt::Notify { span, .. }
            | Stmt::Parallel { span, .. }
            | Stmt::For { span, .. }
            | Stmt::Match { span, .. }
            | Stmt::Return { span, .. }
            | Stmt::Continue { span } => *span,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MatchArm {
    pub pattern: Pattern,
    pub body: Vec<Stmt>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Pattern {
    Literal(Literal),
    Wildcard,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Expressions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Eq,
    Ne,
    /// `~` — equality after formatting/whitespace normalization.
    NormEq,
    Contains,
}

impl BinOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::NormEq => "~",
            BinOp::Contains => "contains",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Literal),
    /// String literal containing `${…}` substitutions.
    Template(StringTemplate),
    Var(String),
    /// `$base.prop.chain` dotted traversal.
    Prop { base: String, props: Vec<String> },
    /// `len(x)` applied to a variable.
    Len(String),
    List(Vec<Expr>),
    Binary { op: BinOp, left: Box<Expr>, right: Box<Expr> },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// String interpolation templates
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One segment of an interpolated string.
#[derive(Debug, Clone, PartialEq)]
pub enum TplSeg {
    Text(String),
    /// `$name` or `${name}` — variable lookup.
    Var(String),
    /// `${a.b.c}` — dotted property traversal.
    Prop { base: String, props: Vec<String> },
    /// `${len(name)}` — length of the resolved value.
    Len(String),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct StringTemplate {
    pub segments: Vec<TplSeg>,
}

impl StringTemplate {
    /// Split raw text into literal and substitution segments.
    ///
    /// Recognizes `${name}`, `${a.b.c}`, `${len(name)}` and bare `$name`.
    /// Anything malformed stays literal text.
    pub fn parse(raw: &str) -> Self {
        let mut segments = Vec::new();
        let mut text = String::new();
        let chars: Vec<char> = raw.chars().collect();
        let mut i = 0usize;

        while i < chars.len() {
            if chars[i] == '$' {
                if chars.get(i + 1) == Some(&'{') {
                    if let Some(close) = chars[i + 2..].iter().position(|&c| c == '}') {
                        let inner: String = chars[i + 2..i + 2 + close].iter().collect();
                        if let Some(seg) = Self::parse_subst(inner.trim()) {
                            if !text.is_empty() {
                                segments.push(TplSeg::Text(std::mem::take(&mut text)));
                            }
                            segments.push(seg);
                            i += 2 + close + 1;
                            continue;
                        }
                    }
                } else if chars.get(i + 1).is_some_and(|c| c.is_alphabetic() || *c == '_') {
                    let start = i + 1;
                    let mut end = start;
                    while end < chars.len() && (chars[end].is_alphanumeric() || chars[end] == '_') {
                        end += 1;
                    }
                    if !text.is_empty() {
                        segments.push(TplSeg::Text(std::mem::take(&mut text)));
                    }
                    segments.push(TplSeg::Var(chars[start..end].iter().collect()));
                    i = end;
                    continue;
                }
            }
            text.push(chars[i]);
            i += 1;
        }
        if !text.is_empty() {
            segments.push(TplSeg::Text(text));
        }
        Self { segments }
    }

    fn parse_subst(inner: &str) -> Option<TplSeg> {
        if let Some(rest) = inner.strip_prefix("len(") {
            let name = rest.strip_suffix(')')?.trim();
            if is_name(name) {
                return Some(TplSeg::Len(name.to_owned()));
            }
            return None;
        }
        if inner.contains('.') {
            let mut parts = inner.split('.');
            let base = parts.next()?.trim().to_owned();
            let props: Vec<String> = parts.map(|p| p.trim().to_owned()).collect();
            if is_name(&base) && props.iter().all(|p| is_name(p)) {
                return Some(TplSeg::Prop { base, props });
            }
            return None;
        }
        if is_name(inner) {
            return Some(TplSeg::Var(inner.to_owned()));
        }
        None
    }

    /// Variable names referenced by this template (including property bases
    /// and `len` arguments).
    pub fn referenced_vars(&self) -> Vec<&str> {
        self.segments
            .iter()
            .filter_map(|seg| match seg {
                TplSeg::Var(n) | TplSeg::Len(n) => Some(n.as_str()),
                TplSeg::Prop { base, .. } => Some(base.as_str()),
                TplSeg::Text(_) => None,
            })
            .collect()
    }

    /// True when the template has no substitutions at all.
    pub fn is_literal(&self) -> bool {
        self.segments.iter().all(|s| matches!(s, TplSeg::Text(_)))
    }
}

fn is_name(s: &str) -> bool {
    !s.is_empty()
        && s.chars().next().is_some_and(|c| c.is_alphabetic() || c == '_')
        && s.chars().all(|c| c.is_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_plain_text() {
        let t = StringTemplate::parse("hello world");
        assert_eq!(t.segments, vec![TplSeg::Text("hello world".into())]);
        assert!(t.is_literal());
    }

    #[test]
    fn template_braced_var() {
        let t = StringTemplate::parse("value: ${x}");
        assert_eq!(
            t.segments,
            vec![TplSeg::Text("value: ".into()), TplSeg::Var("x".into())]
        );
    }

    #[test]
    fn template_bare_var() {
        let t = StringTemplate::parse("got $result back");
        assert_eq!(
            t.segments,
            vec![
                TplSeg::Text("got ".into()),
                TplSeg::Var("result".into()),
                TplSeg::Text(" back".into()),
            ]
        );
    }

    #[test]
    fn template_len_call() {
        let t = StringTemplate::parse("${len(items)} items");
        assert_eq!(t.segments[0], TplSeg::Len("items".into()));
    }

    #[test]
    fn template_property_chain() {
        let t = StringTemplate::parse("title: ${chunk.meta.title}");
        assert_eq!(
            t.segments[1],
            TplSeg::Prop { base: "chunk".into(), props: vec!["meta".into(), "title".into()] }
        );
    }

    #[test]
    fn malformed_subst_stays_literal() {
        let t = StringTemplate::parse("cost: ${1+2}");
        assert!(t.is_literal());
    }

    #[test]
    fn referenced_vars_collects_all_kinds() {
        let t = StringTemplate::parse("${a} ${b.c} ${len(d)}");
        assert_eq!(t.referenced_vars(), vec!["a", "b", "d"]);
    }
}
