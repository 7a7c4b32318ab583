//! Lower the validated AST into a [`CompiledProgram`].
//!
//! Emission order: header, schema declarations, agent factories, flow
//! bodies, event handlers. Every statement line carries a source mapping;
//! the same generated line number is stamped onto the executable op so
//! runtime errors can be translated back through the registry.

use std::collections::HashMap;

use crate::ast::*;
use crate::codegen::emitter::CodeEmitter;
use crate::codegen::program::*;
use crate::sourcemap::SourceMapping;

pub struct CodeGenerator {
    emit_comments: bool,
}

impl Default for CodeGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl CodeGenerator {
    pub fn new() -> Self {
        Self { emit_comments: true }
    }

    pub fn without_comments() -> Self {
        Self { emit_comments: false }
    }

    /// Generate the executable program and its source mappings.
    pub fn generate(
        &self,
        ast: &DslFile,
        source_file: &str,
    ) -> (CompiledProgram, Vec<SourceMapping>) {
        let mut em = CodeEmitter::with_comments(source_file, self.emit_comments);
        let mut program = CompiledProgram::empty(source_file);
        program.version = (ast.version.major, ast.version.minor);

        em.emit_comment(&format!("generated from {source_file}"));
        em.emit(
            &format!("workflow {} (streetrace v{}.{})", program.class_name, ast.version.major, ast.version.minor),
            None,
        );
        em.emit_blank();

        // Models and tools first: they are plain declarations.
        for def in &ast.defs {
            match def {
                Definition::Model(m) => {
                    em.emit(
                        &format!("model {} = {}/{}", m.name, m.provider, m.model),
                        Some(m.span.line),
                    );
                    program.models.insert(
                        m.name.clone(),
                        ModelDecl {
                            name: m.name.clone(),
                            id: format!("{}/{}", m.provider, m.model),
                            max_input_tokens: m.max_input_tokens,
                            history: m.history.clone(),
                        },
                    );
                }
                Definition::Tool(t) => {
                    em.emit(&format!("tool {} = {}", t.name, render_backend(&t.backend)), Some(t.span.line));
                    program.tools.insert(
                        t.name.clone(),
                        ToolDecl {
                            name: t.name.clone(),
                            backend: t.backend.clone(),
                            allow: t.allow.clone(),
                        },
                    );
                }
                _ => {}
            }
        }
        em.emit_blank();

        // Schema classes.
        for def in &ast.defs {
            if let Definition::Schema(s) = def {
                self.generate_schema(&mut em, &mut program, s);
            }
        }

        // Prompts.
        for def in &ast.defs {
            if let Definition::Prompt(p) = def {
                em.emit(&format!("prompt {}:", p.name), Some(p.span.line));
                program.prompts.insert(
                    p.name.clone(),
                    PromptTemplate { name: p.name.clone(), template: StringTemplate::parse(&p.body) },
                );
            }
        }
        em.emit_blank();

        // Agent factories.
        for def in &ast.defs {
            if let Definition::Agent(a) = def {
                self.generate_agent(&mut em, &mut program, a);
            }
        }

        // Flow methods.
        for def in &ast.defs {
            if let Definition::Flow(f) = def {
                self.generate_flow(&mut em, &mut program, f);
            }
        }

        // Event handlers.
        for def in &ast.defs {
            if let Definition::Handler(h) = def {
                self.generate_handler(&mut em, &mut program, h);
            }
        }

        program.listing = em.code();
        let mappings = em.into_mappings();
        tracing::debug!(
            source_file,
            lines = program.listing.lines().count(),
            mappings = mappings.len(),
            "generated program"
        );
        (program, mappings)
    }

    fn generate_schema(&self, em: &mut CodeEmitter, program: &mut CompiledProgram, s: &SchemaDef) {
        em.emit(&format!("schema {}:", s.name), Some(s.span.line));
        em.indent();
        let mut fields = Vec::new();
        for f in &s.fields {
            let suffix = if f.optional { "?" } else { "" };
            em.emit(&format!("{}: {}{suffix}", f.name, render_type(&f.ty)), Some(f.span.line));
            fields.push(FieldDecl { name: f.name.clone(), ty: f.ty.clone(), optional: f.optional });
        }
        em.dedent();
        em.emit_blank();
        program
            .schemas
            .insert(s.name.clone(), SchemaDecl { name: s.name.clone(), fields });
    }

    fn generate_agent(&self, em: &mut CodeEmitter, program: &mut CompiledProgram, a: &AgentDef) {
        em.emit(&format!("agent {}:", a.name), Some(a.span.line));
        em.indent();
        if let Some(m) = &a.model {
            em.emit(&format!("model {m}"), None);
        }
        match &a.instruction {
            Some(InstructionSource::Inline(text)) => {
                em.emit(&format!("instruction {}", quote(text)), None);
            }
            Some(InstructionSource::PromptRef(p)) => {
                em.emit(&format!("instruction {p}"), None);
            }
            None => {}
        }
        if !a.tools.is_empty() {
            em.emit(&format!("tools {}", a.tools.join(", ")), None);
        }
        if let Some(o) = &a.output {
            em.emit(&format!("output {o}"), None);
        }
        if !a.delegate.is_empty() {
            em.emit(&format!("delegate {}", a.delegate.join(", ")), None);
        }
        if !a.use_agents.is_empty() {
            em.emit(&format!("use {}", a.use_agents.join(", ")), None);
        }
        em.dedent();
        em.emit_blank();

        program.agents.insert(
            a.name.clone(),
            AgentBlueprint {
                name: a.name.clone(),
                model: a.model.clone(),
                instruction: a
                    .instruction
                    .clone()
                    .unwrap_or(InstructionSource::Inline(String::new())),
                tools: a.tools.clone(),
                output: a.output.clone(),
                delegate: a.delegate.clone(),
                use_agents: a.use_agents.clone(),
                history: a.history.clone(),
            },
        );
    }

    fn generate_flow(&self, em: &mut CodeEmitter, program: &mut CompiledProgram, f: &FlowDef) {
        let params = if f.params.is_empty() {
            String::new()
        } else {
            format!("({})", f.params.join(", "))
        };
        em.emit(&format!("flow {}{params}:", f.name), Some(f.span.line));
        em.indent();
        let body = if f.body.is_empty() {
            em.emit("pass", Some(f.span.line));
            vec![Op {
                kind: OpKind::Pass,
                generated_line: em.line_count() as u32,
                source_line: f.span.line,
            }]
        } else {
            self.generate_block(em, &f.body)
        };
        em.dedent();
        em.emit_blank();

        program.flows.insert(
            f.name.clone(),
            FlowProgram { name: f.name.clone(), params: f.params.clone(), body },
        );
    }

    fn generate_block(&self, em: &mut CodeEmitter, stmts: &[Stmt]) -> Vec<Op> {
        stmts.iter().map(|s| self.generate_stmt(em, s)).collect()
    }

    fn generate_stmt(&self, em: &mut CodeEmitter, stmt: &Stmt) -> Op {
        let source_line = stmt.span().line;
        let (kind, generated_line) = match stmt {
            Stmt::Assign { var, expr, .. } => {
                em.emit(&format!("${var} = {}", render_expr(expr)), Some(source_line));
                (
                    OpKind::Assign { var: var.clone(), expr: expr.clone() },
                    em.line_count() as u32,
                )
            }
            Stmt::PropAssign { var, props, expr, .. } => {
                em.emit(
                    &format!("${var}.{} = {}", props.join("."), render_expr(expr)),
                    Some(source_line),
                );
                (
                    OpKind::PropAssign {
                        var: var.clone(),
                        props: props.clone(),
                        expr: expr.clone(),
                    },
                    em.line_count() as u32,
                )
            }
            Stmt::Run { agent, input, dest, .. } => {
                em.emit(&render_call("run", agent, input, dest), Some(source_line));
                (
                    OpKind::RunAgent {
                        agent: agent.clone(),
                        input: input.clone(),
                        dest: dest.clone(),
                    },
                    em.line_count() as u32,
                )
            }
            Stmt::CallLlm { prompt, input, dest, .. } => {
                em.emit(&render_call("call llm", prompt, input, dest), Some(source_line));
                (
                    OpKind::CallLlm {
                        prompt: prompt.clone(),
                        input: input.clone(),
                        dest: dest.clone(),
                    },
                    em.line_count() as u32,
                )
            }
            Stmt::CallTool { tool, function, input, dest, .. } => {
                em.emit(
                    &render_call("call tool", &format!("{tool}.{function}"), input, dest),
                    Some(source_line),
                );
                (
                    OpKind::CallTool {
                        tool: tool.clone(),
                        function: function.clone(),
                        input: input.clone(),
                        dest: dest.clone(),
                    },
                    em.line_count() as u32,
                )
            }
            Stmt::Log { template, .. } => {
                em.emit(&format!("log {}", quote(&render_template(template))), Some(source_line));
                (OpKind::Log { template: template.clone() }, em.line_count() as u32)
            }
            Stmt::Notify { template, .. } => {
                em.emit(
                    &format!("notify {}", quote(&render_template(template))),
                    Some(source_line),
                );
                (OpKind::Notify { template: template.clone() }, em.line_count() as u32)
            }
            Stmt::Parallel { branches, .. } => {
                em.emit("parallel:", Some(source_line));
                let line = em.line_count() as u32;
                em.indent();
                let branch_ops: Vec<Vec<Op>> = branches
                    .iter()
                    .map(|b| vec![self.generate_stmt(em, b)])
                    .collect();
                em.dedent();
                (OpKind::Parallel { branches: branch_ops }, line)
            }
            Stmt::For { var, seq, body, .. } => {
                em.emit(&format!("for {var} in {}:", render_expr(seq)), Some(source_line));
                let line = em.line_count() as u32;
                em.indent();
                let body_ops = self.generate_block(em, body);
                em.dedent();
                // A parallel-only body fans iterations out concurrently.
                let fan_out = body.len() == 1 && matches!(body[0], Stmt::Parallel { .. });
                (
                    OpKind::For {
                        var: var.clone(),
                        seq: seq.clone(),
                        body: body_ops,
                        fan_out,
                    },
                    line,
                )
            }
            Stmt::Match { subject, arms, .. } => {
                em.emit(&format!("match {}:", render_expr(subject)), Some(source_line));
                let line = em.line_count() as u32;
                em.indent();
                let arm_ops: Vec<(Pattern, Vec<Op>)> = arms
                    .iter()
                    .map(|arm| {
                        em.emit(&format!("{}:", render_pattern(&arm.pattern)), Some(arm.span.line));
                        em.indent();
                        let ops = self.generate_block(em, &arm.body);
                        em.dedent();
                        (arm.pattern.clone(), ops)
                    })
                    .collect();
                em.dedent();
                (OpKind::Match { subject: subject.clone(), arms: arm_ops }, line)
            }
            Stmt::Return { value, .. } => {
                match value {
                    Some(v) => em.emit(&format!("return {}", render_expr(v)), Some(source_line)),
                    None => em.emit("return", Some(source_line)),
                }
                (OpKind::Return { value: value.clone() }, em.line_count() as u32)
            }
            Stmt::Continue { .. } => {
                em.emit("continue", Some(source_line));
                (OpKind::Continue, em.line_count() as u32)
            }
        };
        Op { kind, generated_line, source_line }
    }

    fn generate_handler(&self, em: &mut CodeEmitter, program: &mut CompiledProgram, h: &EventHandler) {
        em.emit(
            &format!("on {} {}:", h.timing.as_str(), h.event.as_str()),
            Some(h.span.line),
        );
        em.indent();
        let steps = h
            .body
            .iter()
            .map(|stmt| {
                let step = match stmt {
                    HandlerStmt::Mask { guardrail, span } => {
                        em.emit(&format!("mask {guardrail}"), Some(span.line));
                        HandlerStep::Mask { guardrail: guardrail.clone() }
                    }
                    HandlerStmt::Block { condition, span } => {
                        em.emit(&format!("block {}", render_expr(condition)), Some(span.line));
                        HandlerStep::Block { condition: condition.clone() }
                    }
                    HandlerStmt::Warn { message, condition, span } => {
                        match condition {
                            Some(c) => em.emit(
                                &format!("warn {} if {}", quote(message), render_expr(c)),
                                Some(span.line),
                            ),
                            None => em.emit(&format!("warn {}", quote(message)), Some(span.line)),
                        }
                        HandlerStep::Warn { message: message.clone(), condition: condition.clone() }
                    }
                    HandlerStmt::Retry { message, condition, span } => {
                        em.emit(
                            &format!("retry {} if {}", quote(message), render_expr(condition)),
                            Some(span.line),
                        );
                        HandlerStep::Retry { message: message.clone(), condition: condition.clone() }
                    }
                };
                step
            })
            .collect();
        em.dedent();
        em.emit_blank();

        program.handlers.push(HandlerProgram { timing: h.timing, event: h.event, steps });
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Listing renderers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn render_call(verb: &str, target: &str, input: &Option<Expr>, dest: &Option<String>) -> String {
    let mut out = format!("{verb} {target}");
    if let Some(i) = input {
        out.push_str(&format!(" with {}", render_expr(i)));
    }
    if let Some(d) = dest {
        out.push_str(&format!(" -> ${d}"));
    }
    out
}

fn render_backend(backend: &ToolBackend) -> String {
    match backend {
        ToolBackend::Builtin { path } => format!("builtin {path}"),
        ToolBackend::Mcp { transport, target } => format!("mcp {transport} {}", quote(target)),
        ToolBackend::Callable { import_path } => format!("callable {}", quote(import_path)),
    }
}

fn render_type(ty: &TypeExpr) -> String {
    match ty {
        TypeExpr::Str => "string".into(),
        TypeExpr::Int => "int".into(),
        TypeExpr::Float => "float".into(),
        TypeExpr::Bool => "bool".into(),
        TypeExpr::List(inner) => format!("list[{}]", render_type(inner)),
    }
}

fn render_pattern(pattern: &Pattern) -> String {
    match pattern {
        Pattern::Wildcard => "_".into(),
        Pattern::Literal(l) => render_literal(l),
    }
}

fn render_literal(lit: &Literal) -> String {
    match lit {
        Literal::Int(n) => n.to_string(),
        Literal::Float(f) => f.to_string(),
        Literal::Bool(b) => b.to_string(),
        Literal::Str(s) => quote(s),
    }
}

pub(crate) fn render_expr(expr: &Expr) -> String {
    match expr {
        Expr::Literal(l) => render_literal(l),
        Expr::Template(t) => quote(&render_template(t)),
        Expr::Var(name) => format!("${name}"),
        Expr::Prop { base, props } => format!("${base}.{}", props.join(".")),
        Expr::Len(name) => format!("len({name})"),
        Expr::List(items) => {
            let inner: Vec<String> = items.iter().map(render_expr).collect();
            format!("[{}]", inner.join(", "))
        }
        Expr::Binary { op, left, right } => {
            format!("{} {} {}", render_expr(left), op.as_str(), render_expr(right))
        }
    }
}

fn render_template(template: &StringTemplate) -> String {
    let mut out = String::new();
    for seg in &template.segments {
        match seg {
            TplSeg::Text(t) => out.push_str(t),
            TplSeg::Var(n) => out.push_str(&format!("${{{n}}}")),
            TplSeg::Prop { base, props } => {
                out.push_str(&format!("${{{base}.{}}}", props.join(".")));
            }
            TplSeg::Len(n) => out.push_str(&format!("${{len({n})}}")),
        }
    }
    out
}

fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}
