//! Recursive-descent parser over the indentation-aware token stream.
//!
//! Grammar errors surface as E0007 diagnostics with the offending token's
//! position; indentation problems never reach here (the lexer reports
//! E0008 first).

use crate::ast::*;
use crate::errors::{Diagnostic, ErrorCode};
use crate::lexer;
use crate::token::{Span, Token, TokenKind};

pub struct Parser<'a> {
    toks: Vec<Token>,
    pos: usize,
    file: &'a str,
}

/// Parse source text into a [`DslFile`].
pub fn parse(src: &str, file: &str) -> Result<DslFile, Diagnostic> {
    let toks = lexer::lex(src, file)?;
    Parser { toks, pos: 0, file }.parse_file()
}

impl<'a> Parser<'a> {
    // ── Token plumbing ───────────────────────────────────────────

    fn peek(&self) -> &TokenKind {
        &self.toks[self.pos.min(self.toks.len() - 1)].kind
    }

    fn peek_span(&self) -> Span {
        self.toks[self.pos.min(self.toks.len() - 1)].span
    }

    fn bump(&mut self) -> Token {
        let tok = self.toks[self.pos.min(self.toks.len() - 1)].clone();
        if self.pos < self.toks.len() {
            self.pos += 1;
        }
        tok
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.peek() == kind {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token, Diagnostic> {
        if self.peek() == &kind {
            Ok(self.bump())
        } else {
            Err(self.unexpected(&kind.describe()))
        }
    }

    fn expect_ident(&mut self) -> Result<(String, Span), Diagnostic> {
        match self.peek().clone() {
            TokenKind::Ident(name) => {
                let span = self.peek_span();
                self.bump();
                Ok((name, span))
            }
            _ => Err(self.unexpected("identifier")),
        }
    }

    fn expect_keyword(&mut self, kw: &str) -> Result<Span, Diagnostic> {
        match self.peek() {
            TokenKind::Ident(name) if name == kw => Ok(self.bump().span),
            _ => Err(self.unexpected(&format!("'{kw}'"))),
        }
    }

    fn at_keyword(&self, kw: &str) -> bool {
        matches!(self.peek(), TokenKind::Ident(name) if name == kw)
    }

    fn expect_string(&mut self) -> Result<(String, Span), Diagnostic> {
        match self.peek().clone() {
            TokenKind::Str(s) => {
                let span = self.peek_span();
                self.bump();
                Ok((s, span))
            }
            _ => Err(self.unexpected("string literal")),
        }
    }

    fn expect_newline(&mut self) -> Result<(), Diagnostic> {
        self.expect(TokenKind::Newline).map(|_| ())
    }

    fn skip_newlines(&mut self) {
        while self.peek() == &TokenKind::Newline {
            self.bump();
        }
    }

    fn unexpected(&self, expected: &str) -> Diagnostic {
        Diagnostic::new(
            ErrorCode::E0007,
            format!(
                "invalid token or unexpected end of input: expected {expected}, found {}",
                self.peek().describe()
            ),
            self.file,
            self.peek_span(),
        )
    }

    // ── File structure ───────────────────────────────────────────

    fn parse_file(mut self) -> Result<DslFile, Diagnostic> {
        self.skip_newlines();
        let version = self.parse_version()?;

        let mut defs = Vec::new();
        loop {
            self.skip_newlines();
            if self.peek() == &TokenKind::Eof {
                break;
            }
            defs.push(self.parse_definition()?);
        }
        Ok(DslFile { version, defs })
    }

    fn parse_version(&mut self) -> Result<VersionDecl, Diagnostic> {
        if self.peek() == &TokenKind::Eof || !self.at_keyword("streetrace") {
            return Err(Diagnostic::new(
                ErrorCode::E0007,
                "missing version declaration (expected 'streetrace v<major>.<minor>')",
                self.file,
                self.peek_span(),
            ));
        }
        let span = self.bump().span;
        let (vtag, _) = self.expect_ident()?;
        let major: u32 = vtag
            .strip_prefix('v')
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| self.unexpected("version tag like 'v1'"))?;
        let minor = if self.eat(&TokenKind::Dot) {
            match self.peek().clone() {
                TokenKind::Int(n) if n >= 0 => {
                    self.bump();
                    n as u32
                }
                _ => return Err(self.unexpected("minor version number")),
            }
        } else {
            0
        };
        self.expect_newline()?;
        Ok(VersionDecl { major, minor, span })
    }

    fn parse_definition(&mut self) -> Result<Definition, Diagnostic> {
        match self.peek().clone() {
            TokenKind::Ident(kw) => match kw.as_str() {
                "model" => self.parse_model().map(Definition::Model),
                "tool" => self.parse_tool().map(Definition::Tool),
                "schema" => self.parse_schema().map(Definition::Schema),
                "prompt" => self.parse_prompt().map(Definition::Prompt),
                "agent" => self.parse_agent().map(Definition::Agent),
                "flow" => self.parse_flow().map(Definition::Flow),
                "on" => self.parse_handler().map(Definition::Handler),
                _ => Err(self.unexpected("a top-level definition")),
            },
            _ => Err(self.unexpected("a top-level definition")),
        }
    }

    // ── Definitions ──────────────────────────────────────────────

    fn parse_model(&mut self) -> Result<ModelDef, Diagnostic> {
        let span = self.expect_keyword("model")?;
        let (name, _) = self.expect_ident()?;
        self.expect(TokenKind::Eq)?;
        let (provider, _) = self.expect_ident()?;
        let model = self.parse_loose_name()?;
        self.expect_newline()?;

        let mut max_input_tokens = None;
        let mut history = None;
        if self.eat(&TokenKind::Indent) {
            loop {
                self.skip_newlines();
                if self.eat(&TokenKind::Dedent) {
                    break;
                }
                let (prop, _) = self.expect_ident()?;
                match prop.as_str() {
                    "max_input_tokens" => match self.peek().clone() {
                        TokenKind::Int(n) if n >= 0 => {
                            self.bump();
                            max_input_tokens = Some(n as u64);
                        }
                        _ => return Err(self.unexpected("token count")),
                    },
                    "history" => {
                        let (strategy, _) = self.expect_ident()?;
                        history = Some(strategy);
                    }
                    _ => return Err(self.unexpected("'max_input_tokens' or 'history'")),
                }
                self.expect_newline()?;
            }
        }
        Ok(ModelDef { name, provider, model, max_input_tokens, history, span })
    }

    /// A name that may contain dots and digits (model identifiers).
    fn parse_loose_name(&mut self) -> Result<String, Diagnostic> {
        let mut out = String::new();
        loop {
            match self.peek().clone() {
                TokenKind::Ident(s) => {
                    self.bump();
                    out.push_str(&s);
                }
                TokenKind::Int(n) => {
                    self.bump();
                    out.push_str(&n.to_string());
                }
                TokenKind::Float(f) => {
                    self.bump();
                    out.push_str(&f.to_string());
                }
                TokenKind::Dot => {
                    self.bump();
                    out.push('.');
                }
                _ => break,
            }
        }
        if out.is_empty() {
            return Err(self.unexpected("a name"));
        }
        Ok(out)
    }

    fn parse_tool(&mut self) -> Result<ToolDef, Diagnostic> {
        let span = self.expect_keyword("tool")?;
        let (name, _) = self.expect_ident()?;
        self.expect(TokenKind::Eq)?;
        let (kind, _) = self.expect_ident()?;
        let backend = match kind.as_str() {
            "builtin" => ToolBackend::Builtin { path: self.parse_loose_name()? },
            "mcp" => {
                let (transport, tspan) = self.expect_ident()?;
                if !matches!(transport.as_str(), "stdio" | "http" | "sse") {
                    return Err(Diagnostic::new(
                        ErrorCode::E0007,
                        format!("unknown MCP transport '{transport}' (expected stdio, http, or sse)"),
                        self.file,
                        tspan,
                    ));
                }
                let (target, _) = self.expect_string()?;
                ToolBackend::Mcp { transport, target }
            }
            "callable" => {
                let (import_path, _) = self.expect_string()?;
                ToolBackend::Callable { import_path }
            }
            _ => return Err(self.unexpected("'builtin', 'mcp', or 'callable'")),
        };
        self.expect_newline()?;

        let mut allow = Vec::new();
        if self.eat(&TokenKind::Indent) {
            loop {
                self.skip_newlines();
                if self.eat(&TokenKind::Dedent) {
                    break;
                }
                self.expect_keyword("allow")?;
                loop {
                    allow.push(self.parse_allow_entry()?);
                    if !self.eat(&TokenKind::Comma) {
                        break;
                    }
                }
                self.expect_newline()?;
            }
        }
        Ok(ToolDef { name, backend, allow, span })
    }

    /// One allow-list entry: `name`, `name*`, `"name"`, or bare `*`.
    fn parse_allow_entry(&mut self) -> Result<String, Diagnostic> {
        match self.peek().clone() {
            TokenKind::Star => {
                self.bump();
                Ok("*".into())
            }
            TokenKind::Str(s) => {
                self.bump();
                Ok(s)
            }
            TokenKind::Ident(s) => {
                self.bump();
                if self.eat(&TokenKind::Star) {
                    Ok(format!("{s}*"))
                } else {
                    Ok(s)
                }
            }
            _ => Err(self.unexpected("tool name or '*'")),
        }
    }

    fn parse_schema(&mut self) -> Result<SchemaDef, Diagnostic> {
        let span = self.expect_keyword("schema")?;
        let (name, _) = self.expect_ident()?;
        self.expect(TokenKind::Colon)?;
        self.expect_newline()?;
        self.expect(TokenKind::Indent)?;

        let mut fields = Vec::new();
        loop {
            self.skip_newlines();
            if self.eat(&TokenKind::Dedent) {
                break;
            }
            let (fname, fspan) = self.expect_ident()?;
            self.expect(TokenKind::Colon)?;
            let ty = self.parse_type()?;
            let optional = self.eat(&TokenKind::Question);
            self.expect_newline()?;
            fields.push(SchemaField { name: fname, ty, optional, span: fspan });
        }
        if fields.is_empty() {
            return Err(Diagnostic::new(
                ErrorCode::E0007,
                format!("schema '{name}' has no fields"),
                self.file,
                span,
            ));
        }
        Ok(SchemaDef { name, fields, span })
    }

    fn parse_type(&mut self) -> Result<TypeExpr, Diagnostic> {
        let (name, span) = self.expect_ident()?;
        match name.as_str() {
            "string" => Ok(TypeExpr::Str),
            "int" => Ok(TypeExpr::Int),
            "float" => Ok(TypeExpr::Float),
            "bool" => Ok(TypeExpr::Bool),
            "list" => {
                self.expect(TokenKind::LBracket)?;
                let inner = self.parse_type()?;
                self.expect(TokenKind::RBracket)?;
                Ok(TypeExpr::List(Box::new(inner)))
            }
            other => Err(Diagnostic::new(
                ErrorCode::E0007,
                format!("unknown type '{other}' (expected string, int, float, bool, or list[…])"),
                self.file,
                span,
            )),
        }
    }

    fn parse_prompt(&mut self) -> Result<PromptDef, Diagnostic> {
        let span = self.expect_keyword("prompt")?;
        let (name, _) = self.expect_ident()?;
        self.expect(TokenKind::Colon)?;
        self.expect_newline()?;
        self.expect(TokenKind::Indent)?;
        let (body, _) = self.expect_string()?;
        self.expect_newline()?;
        self.expect(TokenKind::Dedent)?;
        Ok(PromptDef { name, body, span })
    }

    fn parse_agent(&mut self) -> Result<AgentDef, Diagnostic> {
        let span = self.expect_keyword("agent")?;
        let (name, _) = self.expect_ident()?;
        self.expect(TokenKind::Colon)?;
        self.expect_newline()?;
        self.expect(TokenKind::Indent)?;

        let mut agent = AgentDef {
            name,
            model: None,
            instruction: None,
            tools: Vec::new(),
            output: None,
            delegate: Vec::new(),
            use_agents: Vec::new(),
            history: None,
            span,
        };

        loop {
            self.skip_newlines();
            if self.eat(&TokenKind::Dedent) {
                break;
            }
            let (prop, pspan) = self.expect_ident()?;
            match prop.as_str() {
                "model" => {
                    let (m, _) = self.expect_ident()?;
                    agent.model = Some(m);
                }
                "instruction" => {
                    agent.instruction = Some(match self.peek().clone() {
                        TokenKind::Str(s) => {
                            self.bump();
                            InstructionSource::Inline(s)
                        }
                        TokenKind::Ident(p) => {
                            self.bump();
                            InstructionSource::PromptRef(p)
                        }
                        _ => return Err(self.unexpected("instruction text or prompt name")),
                    });
                }
                "tools" => agent.tools = self.parse_name_list()?,
                "output" => {
                    let (s, _) = self.expect_ident()?;
                    agent.output = Some(s);
                }
                "delegate" => agent.delegate = self.parse_name_list()?,
                "use" => agent.use_agents = self.parse_name_list()?,
                "history" => {
                    let (h, _) = self.expect_ident()?;
                    agent.history = Some(h);
                }
                other => {
                    return Err(Diagnostic::new(
                        ErrorCode::E0007,
                        format!("unknown agent property '{other}'"),
                        self.file,
                        pspan,
                    ))
                }
            }
            self.expect_newline()?;
        }
        Ok(agent)
    }

    fn parse_name_list(&mut self) -> Result<Vec<String>, Diagnostic> {
        let mut names = Vec::new();
        loop {
            let (n, _) = self.expect_ident()?;
            names.push(n);
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        Ok(names)
    }

    fn parse_flow(&mut self) -> Result<FlowDef, Diagnostic> {
        let span = self.expect_keyword("flow")?;
        let (name, _) = self.expect_ident()?;
        let mut params = Vec::new();
        if self.eat(&TokenKind::LParen) {
            if self.peek() != &TokenKind::RParen {
                loop {
                    let (p, _) = self.expect_ident()?;
                    params.push(p);
                    if !self.eat(&TokenKind::Comma) {
                        break;
                    }
                }
            }
            self.expect(TokenKind::RParen)?;
        }
        self.expect(TokenKind::Colon)?;
        let body = self.parse_block()?;
        Ok(FlowDef { name, params, body, span })
    }

    fn parse_handler(&mut self) -> Result<EventHandler, Diagnostic> {
        let span = self.expect_keyword("on")?;
        let (timing_word, tspan) = self.expect_ident()?;
        let timing = match timing_word.as_str() {
            "before" => HandlerTiming::Before,
            "after" => HandlerTiming::After,
            other => {
                return Err(Diagnostic::new(
                    ErrorCode::E0007,
                    format!("expected 'before' or 'after', found '{other}'"),
                    self.file,
                    tspan,
                ))
            }
        };
        let (event_word, espan) = self.expect_ident()?;
        let event = match event_word.as_str() {
            "model" => HandlerEvent::Model,
            "tool" => HandlerEvent::Tool,
            "agent" => HandlerEvent::Agent,
            other => {
                return Err(Diagnostic::new(
                    ErrorCode::E0007,
                    format!("expected 'model', 'tool', or 'agent', found '{other}'"),
                    self.file,
                    espan,
                ))
            }
        };
        self.expect(TokenKind::Colon)?;
        self.expect_newline()?;
        self.expect(TokenKind::Indent)?;

        let mut body = Vec::new();
        loop {
            self.skip_newlines();
            if self.eat(&TokenKind::Dedent) {
                break;
            }
            body.push(self.parse_handler_stmt()?);
        }
        Ok(EventHandler { timing, event, body, span })
    }

    fn parse_handler_stmt(&mut self) -> Result<HandlerStmt, Diagnostic> {
        let (kw, span) = self.expect_ident()?;
        let stmt = match kw.as_str() {
            "mask" => {
                let (guardrail, _) = self.expect_ident()?;
                HandlerStmt::Mask { guardrail, span }
            }
            "block" => {
                let condition = self.parse_expr()?;
                HandlerStmt::Block { condition, span }
            }
            "warn" => {
                let (message, _) = self.expect_string()?;
                let condition = if self.at_keyword("if") {
                    self.bump();
                    Some(self.parse_expr()?)
                } else {
                    None
                };
                HandlerStmt::Warn { message, condition, span }
            }
            "retry" => {
                let (message, _) = self.expect_string()?;
                self.expect_keyword("if")?;
                let condition = self.parse_expr()?;
                HandlerStmt::Retry { message, condition, span }
            }
            other => {
                return Err(Diagnostic::new(
                    ErrorCode::E0007,
                    format!("unknown guardrail action '{other}'"),
                    self.file,
                    span,
                ))
            }
        };
        self.expect_newline()?;
        Ok(stmt)
    }

    // ── Statements ───────────────────────────────────────────────

    fn parse_block(&mut self) -> Result<Vec<Stmt>, Diagnostic> {
        self.expect_newline()?;
        self.expect(TokenKind::Indent)?;
        let mut body = Vec::new();
        loop {
            self.skip_newlines();
            if self.eat(&TokenKind::Dedent) {
                break;
            }
            body.push(self.parse_stmt()?);
        }
        Ok(body)
    }

    fn parse_stmt(&mut self) -> Result<Stmt, Diagnostic> {
        match self.peek().clone() {
            TokenKind::Var(_) => self.parse_assignment(),
            TokenKind::Ident(kw) => match kw.as_str() {
                "run" => {
                    let stmt = self.parse_run(None)?;
                    self.expect_newline()?;
                    Ok(stmt)
                }
                "call" => {
                    let stmt = self.parse_call(None)?;
                    self.expect_newline()?;
                    Ok(stmt)
                }
                "log" => {
                    let span = self.bump().span;
                    let (raw, _) = self.expect_string()?;
                    self.expect_newline()?;
                    Ok(Stmt::Log { template: StringTemplate::parse(&raw), span })
                }
                "notify" => {
                    let span = self.bump().span;
                    let (raw, _) = self.expect_string()?;
                    self.expect_newline()?;
                    Ok(Stmt::Notify { template: StringTemplate::parse(&raw), span })
                }
                "parallel" => self.parse_parallel(),
                "for" => self.parse_for(),
                "match" => self.parse_match(),
                "return" => {
                    let span = self.bump().span;
                    let value = if self.peek() == &TokenKind::Newline {
                        None
                    } else {
                        Some(self.parse_expr()?)
                    };
                    self.expect_newline()?;
                    Ok(Stmt::Return { value, span })
                }
                "continue" => {
                    let span = self.bump().span;
                    self.expect_newline()?;
                    Ok(Stmt::Continue { span })
                }
                _ => Err(self.unexpected("a statement")),
            },
            _ => Err(self.unexpected("a statement")),
        }
    }

    fn parse_assignment(&mut self) -> Result<Stmt, Diagnostic> {
        let span = self.peek_span();
        let var = match self.bump().kind {
            TokenKind::Var(name) => name,
            _ => unreachable!("caller checked for Var"),
        };

        let mut props = Vec::new();
        while self.eat(&TokenKind::Dot) {
            let (p, _) = self.expect_ident()?;
            props.push(p);
        }

        self.expect(TokenKind::Eq)?;

        // `$x = run agent …` / `$x = call llm …` bind the statement result.
        if self.at_keyword("run") {
            let stmt = self.parse_run(Some(var))?;
            self.expect_newline()?;
            return Ok(stmt);
        }
        if self.at_keyword("call") {
            let stmt = self.parse_call(Some(var))?;
            self.expect_newline()?;
            return Ok(stmt);
        }

        let expr = self.parse_expr()?;
        self.expect_newline()?;
        if props.is_empty() {
            Ok(Stmt::Assign { var, expr, span })
        } else {
            Ok(Stmt::PropAssign { var, props, expr, span })
        }
    }

    fn parse_run(&mut self, dest: Option<String>) -> Result<Stmt, Diagnostic> {
        let span = self.expect_keyword("run")?;
        let (agent, _) = self.expect_ident()?;
        let input = if self.at_keyword("with") {
            self.bump();
            Some(self.parse_expr()?)
        } else {
            None
        };
        let dest = match dest {
            Some(d) => Some(d),
            None if self.eat(&TokenKind::Arrow) => Some(self.expect_var()?),
            None => None,
        };
        Ok(Stmt::Run { agent, input, dest, span })
    }

    fn parse_call(&mut self, dest: Option<String>) -> Result<Stmt, Diagnostic> {
        let span = self.expect_keyword("call")?;
        let (target, _) = self.expect_ident()?;
        match target.as_str() {
            "llm" => {
                let (prompt, _) = self.expect_ident()?;
                let input = if self.at_keyword("with") {
                    self.bump();
                    Some(self.parse_expr()?)
                } else {
                    None
                };
                let dest = match dest {
                    Some(d) => Some(d),
                    None if self.eat(&TokenKind::Arrow) => Some(self.expect_var()?),
                    None => None,
                };
                Ok(Stmt::CallLlm { prompt, input, dest, span })
            }
            "tool" => {
                let (tool, _) = self.expect_ident()?;
                self.expect(TokenKind::Dot)?;
                let (function, _) = self.expect_ident()?;
                let input = if self.at_keyword("with") {
                    self.bump();
                    Some(self.parse_expr()?)
                } else {
                    None
                };
                let dest = match dest {
                    Some(d) => Some(d),
                    None if self.eat(&TokenKind::Arrow) => Some(self.expect_var()?),
                    None => None,
                };
                Ok(Stmt::CallTool { tool, function, input, dest, span })
            }
            _ => Err(self.unexpected("'llm' or 'tool'")),
        }
    }

    fn expect_var(&mut self) -> Result<String, Diagnostic> {
        match self.peek().clone() {
            TokenKind::Var(name) => {
                self.bump();
                Ok(name)
            }
            _ => Err(self.unexpected("'$variable'")),
        }
    }

    fn parse_parallel(&mut self) -> Result<Stmt, Diagnostic> {
        let span = self.expect_keyword("parallel")?;
        self.expect(TokenKind::Colon)?;
        let branches = self.parse_block()?;
        if branches.is_empty() {
            return Err(Diagnostic::new(
                ErrorCode::E0007,
                "parallel block has no branches",
                self.file,
                span,
            ));
        }
        Ok(Stmt::Parallel { branches, span })
    }

    fn parse_for(&mut self) -> Result<Stmt, Diagnostic> {
        let span = self.expect_keyword("for")?;
        let (var, _) = self.expect_ident()?;
        self.expect_keyword("in")?;
        let seq = self.parse_expr()?;
        self.expect(TokenKind::Colon)?;
        let body = self.parse_block()?;
        Ok(Stmt::For { var, seq, body, span })
    }

    fn parse_match(&mut self) -> Result<Stmt, Diagnostic> {
        let span = self.expect_keyword("match")?;
        let subject = self.parse_expr()?;
        self.expect(TokenKind::Colon)?;
        self.expect_newline()?;
        self.expect(TokenKind::Indent)?;

        let mut arms = Vec::new();
        loop {
            self.skip_newlines();
            if self.eat(&TokenKind::Dedent) {
                break;
            }
            arms.push(self.parse_match_arm()?);
        }
        if arms.is_empty() {
            return Err(Diagnostic::new(
                ErrorCode::E0007,
                "match block has no arms",
                self.file,
                span,
            ));
        }
        Ok(Stmt::Match { subject, arms, span })
    }

    fn parse_match_arm(&mut self) -> Result<MatchArm, Diagnostic> {
        let span = self.peek_span();
        let pattern = match self.peek().clone() {
            TokenKind::Ident(w) if w == "_" => {
                self.bump();
                Pattern::Wildcard
            }
            TokenKind::Str(s) => {
                self.bump();
                Pattern::Literal(Literal::Str(s))
            }
            TokenKind::Int(n) => {
                self.bump();
                Pattern::Literal(Literal::Int(n))
            }
            TokenKind::Float(f) => {
                self.bump();
                Pattern::Literal(Literal::Float(f))
            }
            TokenKind::Ident(w) if w == "true" || w == "false" => {
                self.bump();
                Pattern::Literal(Literal::Bool(w == "true"))
            }
            _ => return Err(self.unexpected("a literal pattern or '_'")),
        };

        if self.eat(&TokenKind::Arrow) {
            // Single inline statement arm.
            let stmt = self.parse_stmt()?;
            Ok(MatchArm { pattern, body: vec![stmt], span })
        } else {
            self.expect(TokenKind::Colon)?;
            let body = self.parse_block()?;
            Ok(MatchArm { pattern, body, span })
        }
    }

    // ── Expressions ──────────────────────────────────────────────

    fn parse_expr(&mut self) -> Result<Expr, Diagnostic> {
        let mut left = self.parse_primary()?;
        loop {
            let op = match self.peek() {
                TokenKind::Plus => BinOp::Add,
                TokenKind::EqEq => BinOp::Eq,
                TokenKind::NotEq => BinOp::Ne,
                TokenKind::Tilde => BinOp::NormEq,
                TokenKind::Ident(w) if w == "contains" => BinOp::Contains,
                _ => break,
            };
            self.bump();
            let right = self.parse_primary()?;
            left = Expr::Binary { op, left: Box::new(left), right: Box::new(right) };
        }
        Ok(left)
    }

    fn parse_primary(&mut self) -> Result<Expr, Diagnostic> {
        match self.peek().clone() {
            TokenKind::Int(n) => {
                self.bump();
                Ok(Expr::Literal(Literal::Int(n)))
            }
            TokenKind::Float(f) => {
                self.bump();
                Ok(Expr::Literal(Literal::Float(f)))
            }
            TokenKind::Str(s) => {
                self.bump();
                let template = StringTemplate::parse(&s);
                if template.is_literal() {
                    Ok(Expr::Literal(Literal::Str(s)))
                } else {
                    Ok(Expr::Template(template))
                }
            }
            TokenKind::Ident(w) if w == "true" || w == "false" => {
                self.bump();
                Ok(Expr::Literal(Literal::Bool(w == "true")))
            }
            TokenKind::Ident(w) if w == "len" => {
                self.bump();
                self.expect(TokenKind::LParen)?;
                let name = match self.peek().clone() {
                    TokenKind::Var(n) | TokenKind::Ident(n) => {
                        self.bump();
                        n
                    }
                    _ => return Err(self.unexpected("variable name")),
                };
                self.expect(TokenKind::RParen)?;
                Ok(Expr::Len(name))
            }
            TokenKind::Var(name) => {
                self.bump();
                let mut props = Vec::new();
                while self.eat(&TokenKind::Dot) {
                    let (p, _) = self.expect_ident()?;
                    props.push(p);
                }
                if props.is_empty() {
                    Ok(Expr::Var(name))
                } else {
                    Ok(Expr::Prop { base: name, props })
                }
            }
            TokenKind::LBracket => {
                self.bump();
                let mut items = Vec::new();
                if self.peek() != &TokenKind::RBracket {
                    loop {
                        items.push(self.parse_expr()?);
                        if !self.eat(&TokenKind::Comma) {
                            break;
                        }
                    }
                }
                self.expect(TokenKind::RBracket)?;
                Ok(Expr::List(items))
            }
            TokenKind::LParen => {
                self.bump();
                let inner = self.parse_expr()?;
                self.expect(TokenKind::RParen)?;
                Ok(inner)
            }
            _ => Err(self.unexpected("an expression")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(src: &str) -> DslFile {
        parse(src, "test.sr").unwrap()
    }

    #[test]
    fn version_header_required() {
        let err = parse("flow main:\n    log \"hi\"\n", "t.sr").unwrap_err();
        assert!(err.message.contains("version declaration"));
    }

    #[test]
    fn empty_source_reports_missing_version() {
        let err = parse("", "t.sr").unwrap_err();
        assert!(err.message.contains("version declaration"));
    }

    #[test]
    fn minimal_flow() {
        let file = parse_ok("streetrace v1\nflow main:\n    log \"hi\"\n");
        assert_eq!(file.version.major, 1);
        assert_eq!(file.defs.len(), 1);
        match &file.defs[0] {
            Definition::Flow(f) => {
                assert_eq!(f.name, "main");
                assert!(matches!(f.body[0], Stmt::Log { .. }));
            }
            other => panic!("expected flow, got {other:?}"),
        }
    }

    #[test]
    fn model_with_properties() {
        let file = parse_ok(
            "streetrace v1.2\nmodel fast = anthropic claude-3-5-haiku\n    max_input_tokens 200000\n    history summarize\n",
        );
        assert_eq!(file.version.minor, 2);
        match &file.defs[0] {
            Definition::Model(m) => {
                assert_eq!(m.provider, "anthropic");
                assert_eq!(m.model, "claude-3-5-haiku");
                assert_eq!(m.max_input_tokens, Some(200_000));
                assert_eq!(m.history.as_deref(), Some("summarize"));
            }
            other => panic!("expected model, got {other:?}"),
        }
    }

    #[test]
    fn tool_variants() {
        let file = parse_ok(
            "streetrace v1\ntool fs = builtin streetrace.fs\ntool docs = mcp stdio \"npx server\"\n    allow read_file, list_*\ntool rank = callable \"scoring.rank:score\"\n",
        );
        match &file.defs[1] {
            Definition::Tool(t) => {
                assert_eq!(
                    t.backend,
                    ToolBackend::Mcp { transport: "stdio".into(), target: "npx server".into() }
                );
                assert_eq!(t.allow, vec!["read_file".to_string(), "list_*".to_string()]);
            }
            other => panic!("expected tool, got {other:?}"),
        }
    }

    #[test]
    fn schema_fields_and_optionals() {
        let file = parse_ok(
            "streetrace v1\nschema Finding:\n    title: string\n    score: float\n    tags: list[string]\n    note: string?\n",
        );
        match &file.defs[0] {
            Definition::Schema(s) => {
                assert_eq!(s.fields.len(), 4);
                assert_eq!(s.fields[2].ty, TypeExpr::List(Box::new(TypeExpr::Str)));
                assert!(s.fields[3].optional);
                assert!(!s.fields[0].optional);
            }
            other => panic!("expected schema, got {other:?}"),
        }
    }

    #[test]
    fn agent_properties() {
        let file = parse_ok(
            "streetrace v1\nagent reviewer:\n    model fast\n    instruction \"You review code.\"\n    tools fs, docs\n    delegate helper\n",
        );
        match &file.defs[0] {
            Definition::Agent(a) => {
                assert_eq!(a.model.as_deref(), Some("fast"));
                assert_eq!(a.instruction, Some(InstructionSource::Inline("You review code.".into())));
                assert_eq!(a.tools, vec!["fs".to_string(), "docs".to_string()]);
                assert_eq!(a.delegate, vec!["helper".to_string()]);
            }
            other => panic!("expected agent, got {other:?}"),
        }
    }

    #[test]
    fn run_and_call_statements() {
        let file = parse_ok(
            "streetrace v1\nflow main:\n    run reviewer with $diff -> $finding\n    call llm summarize -> $summary\n    call tool fs.read_file with \"a.txt\" -> $content\n",
        );
        let Definition::Flow(f) = &file.defs[0] else { panic!() };
        assert!(matches!(
            &f.body[0],
            Stmt::Run { agent, dest: Some(d), .. } if agent == "reviewer" && d == "finding"
        ));
        assert!(matches!(
            &f.body[1],
            Stmt::CallLlm { prompt, dest: Some(d), .. } if prompt == "summarize" && d == "summary"
        ));
        assert!(matches!(
            &f.body[2],
            Stmt::CallTool { tool, function, .. } if tool == "fs" && function == "read_file"
        ));
    }

    #[test]
    fn assignment_rhs_run_binds_dest() {
        let file = parse_ok("streetrace v1\nflow main:\n    $a = run helper with \"task\"\n");
        let Definition::Flow(f) = &file.defs[0] else { panic!() };
        assert!(matches!(
            &f.body[0],
            Stmt::Run { dest: Some(d), .. } if d == "a"
        ));
    }

    #[test]
    fn parallel_branches() {
        let file = parse_ok("streetrace v1\nflow main:\n    parallel:\n        $a = 1\n        $b = 2\n");
        let Definition::Flow(f) = &file.defs[0] else { panic!() };
        let Stmt::Parallel { branches, .. } = &f.body[0] else { panic!() };
        assert_eq!(branches.len(), 2);
    }

    #[test]
    fn for_and_match() {
        let file = parse_ok(
            "streetrace v1\nflow main:\n    for chunk in $parts:\n        run reviewer with $chunk\n    match $status:\n        \"ok\" -> return $result\n        _ -> return \"failed\"\n",
        );
        let Definition::Flow(f) = &file.defs[0] else { panic!() };
        assert!(matches!(&f.body[0], Stmt::For { var, .. } if var == "chunk"));
        let Stmt::Match { arms, .. } = &f.body[1] else { panic!() };
        assert_eq!(arms.len(), 2);
        assert_eq!(arms[1].pattern, Pattern::Wildcard);
    }

    #[test]
    fn prompt_with_body() {
        let file = parse_ok("streetrace v1\nprompt greet:\n    Hello ${name}!\n");
        match &file.defs[0] {
            Definition::Prompt(p) => assert_eq!(p.body, "Hello ${name}!"),
            other => panic!("expected prompt, got {other:?}"),
        }
    }

    #[test]
    fn handler_with_guardrails() {
        let file = parse_ok(
            "streetrace v1\non before model:\n    mask pii\n    block $injection\n    warn \"long\" if $too_long\n    retry \"rephrase\" if $invalid\n",
        );
        match &file.defs[0] {
            Definition::Handler(h) => {
                assert_eq!(h.timing, HandlerTiming::Before);
                assert_eq!(h.event, HandlerEvent::Model);
                assert_eq!(h.body.len(), 4);
                assert!(matches!(&h.body[0], HandlerStmt::Mask { guardrail, .. } if guardrail == "pii"));
            }
            other => panic!("expected handler, got {other:?}"),
        }
    }

    #[test]
    fn binary_expression_chain() {
        let file = parse_ok("streetrace v1\nflow main:\n    $ok = $status == \"done\"\n");
        let Definition::Flow(f) = &file.defs[0] else { panic!() };
        let Stmt::Assign { expr, .. } = &f.body[0] else { panic!() };
        assert!(matches!(expr, Expr::Binary { op: BinOp::Eq, .. }));
    }

    #[test]
    fn syntax_error_is_e0007() {
        let err = parse("streetrace v1\nflow main:\n    widget\n", "t.sr").unwrap_err();
        assert_eq!(err.code, ErrorCode::E0007);
    }
}
