//! The semantic analyzer.
//!
//! One pass per file:
//! 1. collect top-level definitions into the global scope (duplicates → E0003)
//! 2. agent checks: required instruction (E0010), reference resolution
//!    (E0001), delegate/use overlap (W0002), delegate cycles (E0011)
//! 3. prompt variable analysis (E0015/E0016 with did-you-mean suggestions)
//! 4. flow variable flow analysis (E0002) and statement reference checks
//! 5. guardrail action placement validation (E0009)

use std::collections::{HashMap, HashSet};

use crate::ast::*;
use crate::errors::{Diagnostic, ErrorCode};
use crate::semantic::scope::{nearest_symbol, Scope, ScopeStack, ScopeType, SymbolKind};
use crate::token::Span;

pub struct Analyzer<'a> {
    file: &'a str,
    diags: Vec<Diagnostic>,
    globals: Scope,
    /// Variables assigned anywhere in any flow; used to distinguish
    /// runtime variables from plain typos in prompt bodies.
    flow_vars: HashSet<String>,
}

/// Analyze a parsed file, producing the full diagnostic list.
pub fn analyze(ast: &DslFile, file: &str) -> Vec<Diagnostic> {
    let mut analyzer = Analyzer {
        file,
        diags: Vec::new(),
        globals: Scope::new(ScopeType::Global),
        flow_vars: HashSet::new(),
    };
    analyzer.run(ast);
    analyzer.diags
}

impl<'a> Analyzer<'a> {
    fn run(&mut self, ast: &DslFile) {
        self.collect_globals(ast);
        self.collect_flow_vars(ast);

        for def in &ast.defs {
            match def {
                Definition::Agent(agent) => self.check_agent(agent),
                Definition::Prompt(prompt) => self.check_prompt(prompt, ast),
                Definition::Flow(flow) => self.check_flow(flow),
                Definition::Handler(handler) => self.check_handler(handler),
                _ => {}
            }
        }

        self.check_delegate_cycles(ast);
    }

    fn error(&mut self, code: ErrorCode, message: String, span: Span) {
        self.diags.push(Diagnostic::new(code, message, self.file, span));
    }

    // ── Step 1: global collection ────────────────────────────────

    fn collect_globals(&mut self, ast: &DslFile) {
        for def in &ast.defs {
            let (name, kind) = match def {
                Definition::Model(d) => (&d.name, SymbolKind::Model),
                Definition::Tool(d) => (&d.name, SymbolKind::Tool),
                Definition::Schema(d) => (&d.name, SymbolKind::Schema),
                Definition::Prompt(d) => (&d.name, SymbolKind::Prompt),
                Definition::Agent(d) => (&d.name, SymbolKind::Agent),
                Definition::Flow(d) => (&d.name, SymbolKind::Flow),
                Definition::Handler(_) => continue,
            };
            if let Some(previous) = self.globals.define(name, kind, def.span()) {
                self.error(
                    ErrorCode::E0003,
                    format!("duplicate definition of {} '{}'", previous.kind.as_str(), name),
                    def.span(),
                );
            }
        }
    }

    fn collect_flow_vars(&mut self, ast: &DslFile) {
        fn walk(stmts: &[Stmt], vars: &mut HashSet<String>) {
            for stmt in stmts {
                match stmt {
                    Stmt::Assign { var, .. } | Stmt::PropAssign { var, .. } => {
                        vars.insert(var.clone());
                    }
                    Stmt::Run { dest: Some(d), .. }
                    | Stmt::CallLlm { dest: Some(d), .. }
                    | Stmt::CallTool { dest: Some(d), .. } => {
                        vars.insert(d.clone());
                    }
                    Stmt::Parallel { branches, .. } => walk(branches, vars),
                    Stmt::For { var, body, .. } => {
                        vars.insert(var.clone());
                        walk(body, vars);
                    }
                    Stmt::Match { arms, .. } => {
                        for arm in arms {
                            walk(&arm.body, vars);
                        }
                    }
                    _ => {}
                }
            }
        }
        // `input` is bound by the runtime before any flow starts.
        self.flow_vars.insert("input".to_owned());
        for def in &ast.defs {
            if let Definition::Flow(flow) = def {
                for p in &flow.params {
                    self.flow_vars.insert(p.clone());
                }
                walk(&flow.body, &mut self.flow_vars);
            }
        }
    }

    // ── Step 2: agents ───────────────────────────────────────────

    fn check_agent(&mut self, agent: &AgentDef) {
        if agent.instruction.is_none() {
            self.error(
                ErrorCode::E0010,
                format!("missing required property 'instruction' in agent '{}'", agent.name),
                agent.span,
            );
        }

        if let Some(model) = &agent.model {
            self.check_reference(model, SymbolKind::Model, agent.span);
        }
        for tool in &agent.tools {
            self.check_reference(tool, SymbolKind::Tool, agent.span);
        }
        if let Some(schema) = &agent.output {
            self.check_reference(schema, SymbolKind::Schema, agent.span);
        }
        if let Some(InstructionSource::PromptRef(prompt)) = &agent.instruction {
            self.check_reference(prompt, SymbolKind::Prompt, agent.span);
        }
        for delegate in &agent.delegate {
            self.check_reference(delegate, SymbolKind::Agent, agent.span);
        }
        for used in &agent.use_agents {
            self.check_reference(used, SymbolKind::Agent, agent.span);
        }

        if !agent.delegate.is_empty() && !agent.use_agents.is_empty() {
            self.error(
                ErrorCode::W0002,
                format!("agent '{}' has both delegate and use (unusual pattern)", agent.name),
                agent.span,
            );
        }

        // Inline instruction text is an instruction prompt: runtime
        // variables are not available at agent creation.
        if let Some(InstructionSource::Inline(text)) = &agent.instruction {
            self.check_instruction_vars(&agent.name, text, agent.span);
        }
    }

    fn check_reference(&mut self, name: &str, kind: SymbolKind, span: Span) {
        let found = self.globals.lookup_local(name).map(|sym| sym.kind);
        match found {
            Some(actual) if actual == kind => {}
            Some(actual) => {
                self.error(
                    ErrorCode::E0001,
                    format!(
                        "undefined reference to {} '{}' ('{}' is a {})",
                        kind.as_str(),
                        name,
                        name,
                        actual.as_str()
                    ),
                    span,
                );
            }
            None => {
                let suggestion = {
                    let candidates = self.globals.symbols_of_kind(kind);
                    nearest_symbol(name, candidates.iter().map(|s| s.name.as_str()))
                        .map(str::to_owned)
                };
                let mut diag = Diagnostic::new(
                    ErrorCode::E0001,
                    format!("undefined reference to {} '{}'", kind.as_str(), name),
                    self.file,
                    span,
                );
                if let Some(s) = suggestion {
                    diag = diag.with_suggestion(s);
                }
                self.diags.push(diag);
            }
        }
    }

    fn check_delegate_cycles(&mut self, ast: &DslFile) {
        let mut graph: HashMap<&str, &[String]> = HashMap::new();
        let mut spans: HashMap<&str, Span> = HashMap::new();
        for def in &ast.defs {
            if let Definition::Agent(a) = def {
                graph.insert(a.name.as_str(), &a.delegate);
                spans.insert(a.name.as_str(), a.span);
            }
        }

        #[derive(Clone, Copy, PartialEq)]
        enum State {
            Visiting,
            Done,
        }

        fn dfs<'g>(
            node: &'g str,
            graph: &HashMap<&'g str, &'g [String]>,
            state: &mut HashMap<&'g str, State>,
            stack: &mut Vec<&'g str>,
        ) -> Option<Vec<String>> {
            state.insert(node, State::Visiting);
            stack.push(node);
            if let Some(children) = graph.get(node) {
                for child in children.iter() {
                    match state.get(child.as_str()) {
                        Some(State::Visiting) => {
                            let start = stack.iter().position(|n| *n == child.as_str()).unwrap_or(0);
                            let mut cycle: Vec<String> =
                                stack[start..].iter().map(|s| (*s).to_owned()).collect();
                            cycle.push(child.clone());
                            return Some(cycle);
                        }
                        Some(State::Done) => {}
                        None => {
                            if graph.contains_key(child.as_str()) {
                                if let Some(c) = dfs(child.as_str(), graph, state, stack) {
                                    return Some(c);
                                }
                            }
                        }
                    }
                }
            }
            stack.pop();
            state.insert(node, State::Done);
            None
        }

        let mut state: HashMap<&str, State> = HashMap::new();
        let names: Vec<&str> = graph.keys().copied().collect();
        for name in names {
            if state.contains_key(name) {
                continue;
            }
            let mut stack = Vec::new();
            if let Some(cycle) = dfs(name, &graph, &mut state, &mut stack) {
                let span = spans.get(cycle[0].as_str()).copied().unwrap_or_default();
                self.error(
                    ErrorCode::E0011,
                    format!("circular agent reference detected: {}", cycle.join(" -> ")),
                    span,
                );
                return; // one cycle diagnostic per file is enough
            }
        }
    }

    // ── Step 3: prompts ──────────────────────────────────────────

    fn check_prompt(&mut self, prompt: &PromptDef, ast: &DslFile) {
        let is_instruction = ast.defs.iter().any(|d| {
            matches!(
                d,
                Definition::Agent(a)
                    if a.instruction == Some(InstructionSource::PromptRef(prompt.name.clone()))
            )
        });

        if is_instruction {
            self.check_instruction_vars(&prompt.name, &prompt.body, prompt.span);
            return;
        }

        let template = StringTemplate::parse(&prompt.body);
        for name in template.referenced_vars() {
            if self.globals.is_defined_locally(name) || self.flow_vars.contains(name) {
                continue;
            }
            let mut diag = Diagnostic::new(
                ErrorCode::E0015,
                format!("prompt '{}' references undefined variable '${}'", prompt.name, name),
                self.file,
                prompt.span,
            );
            let candidates: Vec<&str> = self
                .flow_vars
                .iter()
                .map(String::as_str)
                .chain(self.globals.names())
                .collect();
            if let Some(s) = nearest_symbol(name, candidates.into_iter()) {
                diag = diag.with_suggestion(s.to_owned());
            }
            self.diags.push(diag);
        }
    }

    /// Instruction prompts are materialized at agent creation: only global
    /// and context names are valid, runtime flow variables are not.
    fn check_instruction_vars(&mut self, label: &str, body: &str, span: Span) {
        let template = StringTemplate::parse(body);
        for name in template.referenced_vars() {
            if self.globals.is_defined_locally(name) {
                continue;
            }
            self.error(
                ErrorCode::E0016,
                format!("instruction '{label}' references runtime variable '${name}'"),
                span,
            );
        }
    }

    // ── Step 4: flows ────────────────────────────────────────────

    fn check_flow(&mut self, flow: &FlowDef) {
        let mut scopes = ScopeStack::new();
        scopes.push(ScopeType::Flow);
        // The runtime binds the incoming message before the flow starts.
        scopes.current().define("input", SymbolKind::Variable, flow.span);
        for param in &flow.params {
            scopes.current().define(param, SymbolKind::Parameter, flow.span);
        }
        self.check_block(&flow.body, &mut scopes);
    }

    fn check_block(&mut self, stmts: &[Stmt], scopes: &mut ScopeStack) {
        for stmt in stmts {
            self.check_stmt(stmt, scopes);
        }
    }

    fn check_stmt(&mut self, stmt: &Stmt, scopes: &mut ScopeStack) {
        match stmt {
            Stmt::Assign { var, expr, span } => {
                self.check_expr(expr, scopes, *span);
                scopes.current().define(var, SymbolKind::Variable, *span);
            }
            Stmt::PropAssign { var, expr, span, .. } => {
                self.check_var_use(var, scopes, *span);
                self.check_expr(expr, scopes, *span);
            }
            Stmt::Run { agent, input, dest, span } => {
                self.check_reference(agent, SymbolKind::Agent, *span);
                if let Some(e) = input {
                    self.check_expr(e, scopes, *span);
                }
                if let Some(d) = dest {
                    scopes.current().define(d, SymbolKind::Variable, *span);
                }
            }
            Stmt::CallLlm { prompt, input, dest, span } => {
                self.check_reference(prompt, SymbolKind::Prompt, *span);
                if let Some(e) = input {
                    self.check_expr(e, scopes, *span);
                }
                if let Some(d) = dest {
                    scopes.current().define(d, SymbolKind::Variable, *span);
                }
            }
            Stmt::CallTool { tool, input, dest, span, .. } => {
                self.check_reference(tool, SymbolKind::Tool, *span);
                if let Some(e) = input {
                    self.check_expr(e, scopes, *span);
                }
                if let Some(d) = dest {
                    scopes.current().define(d, SymbolKind::Variable, *span);
                }
            }
            Stmt::Log { template, span } | Stmt::Notify { template, span } => {
                for name in template.referenced_vars() {
                    self.check_var_use(name, scopes, *span);
                }
            }
            Stmt::Parallel { branches, span: _ } => {
                // Each branch sees a copy of the parent bindings; writes
                // merge back after the join.
                let mut merged: Vec<(String, Span)> = Vec::new();
                for branch in branches {
                    scopes.push(ScopeType::Block);
                    self.check_stmt(branch, scopes);
                    if let Some(scope) = scopes.pop() {
                        for name in scope.names() {
                            merged.push((name.to_owned(), branch.span()));
                        }
                    }
                }
                for (name, span) in merged {
                    scopes.current().define(&name, SymbolKind::Variable, span);
                }
            }
            Stmt::For { var, seq, body, span } => {
                self.check_expr(seq, scopes, *span);
                scopes.push(ScopeType::Block);
                scopes.current().define(var, SymbolKind::Variable, *span);
                self.check_block(body, scopes);
                scopes.pop();
            }
            Stmt::Match { subject, arms, span } => {
                self.check_expr(subject, scopes, *span);
                for arm in arms {
                    scopes.push(ScopeType::Block);
                    self.check_block(&arm.body, scopes);
                    scopes.pop();
                }
            }
            Stmt::Return { value, span } => {
                if let Some(e) = value {
                    self.check_expr(e, scopes, *span);
                }
            }
            Stmt::Continue { .. } => {}
        }
    }

    fn check_var_use(&mut self, name: &str, scopes: &ScopeStack, span: Span) {
        let found = matches!(
            scopes.lookup(name),
            Some(sym) if matches!(sym.kind, SymbolKind::Variable | SymbolKind::Parameter)
        );
        if !found {
            self.error(
                ErrorCode::E0002,
                format!("variable '${name}' used before definition"),
                span,
            );
        }
    }

    fn check_expr(&mut self, expr: &Expr, scopes: &ScopeStack, span: Span) {
        match expr {
            Expr::Var(name) | Expr::Len(name) | Expr::Prop { base: name, .. } => {
                self.check_var_use(name, scopes, span);
            }
            Expr::Template(template) => {
                for name in template.referenced_vars() {
                    self.check_var_use(name, scopes, span);
                }
            }
            Expr::List(items) => {
                for item in items {
                    self.check_expr(item, scopes, span);
                }
            }
            Expr::Binary { left, right, .. } => {
                self.check_expr(left, scopes, span);
                self.check_expr(right, scopes, span);
            }
            Expr::Literal(_) => {}
        }
    }

    // ── Step 5: handlers ─────────────────────────────────────────

    fn check_handler(&mut self, handler: &EventHandler) {
        for stmt in &handler.body {
            let valid = match stmt {
                HandlerStmt::Mask { .. } | HandlerStmt::Block { .. } => {
                    handler.timing == HandlerTiming::Before && handler.event == HandlerEvent::Model
                }
                HandlerStmt::Retry { .. } => handler.event == HandlerEvent::Model,
                HandlerStmt::Warn { .. } => true,
            };
            if !valid {
                self.error(
                    ErrorCode::E0009,
                    format!(
                        "invalid guardrail action '{}' in {} {} context",
                        stmt.action_name(),
                        handler.timing.as_str(),
                        handler.event.as_str()
                    ),
                    stmt.span(),
                );
            }
        }
    }
}
