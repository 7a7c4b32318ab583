//! Indentation-sensitive lexer.
//!
//! Synthesizes INDENT/DEDENT tokens from leading whitespace, Python-style.
//! A tab counts as four spaces. Indentation tracking is suppressed while
//! inside `()`, `[]`, or `{}` pairs. A dedent that does not land on a
//! previously seen level is a mismatched-indentation error (E0008),
//! distinct from generic syntax errors (E0007).

use crate::errors::{Diagnostic, ErrorCode};
use crate::token::{Span, Token, TokenKind};

/// Spaces represented by one tab character.
const TAB_WIDTH: u32 = 4;

/// In-flight raw prompt body capture.
struct RawBlock {
    header_indent: u32,
    body_indent: Option<u32>,
    text: String,
    start_line: u32,
}

fn indent_width(line: &str) -> u32 {
    let mut width = 0u32;
    for ch in line.chars() {
        match ch {
            ' ' => width += 1,
            '\t' => width += TAB_WIDTH,
            _ => break,
        }
    }
    width
}

pub struct Lexer<'a> {
    src: &'a str,
    file: &'a str,
    tokens: Vec<Token>,
    indent_stack: Vec<u32>,
    paren_depth: u32,
    line_no: u32,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str, file: &'a str) -> Self {
        Self {
            src,
            file,
            tokens: Vec::new(),
            indent_stack: vec![0],
            paren_depth: 0,
            line_no: 0,
        }
    }

    /// Tokenize the whole input. Fails fast on the first lexical error.
    pub fn lex(mut self) -> Result<Vec<Token>, Diagnostic> {
        let lines: Vec<&str> = self.src.split('\n').collect();
        // When set, we are inside a prompt body: (header indent, first body
        // line indent if seen, accumulated raw text, body start line).
        let mut raw_block: Option<RawBlock> = None;

        for (idx, raw_line) in lines.iter().enumerate() {
            self.line_no = idx as u32 + 1;

            if let Some(block) = raw_block.as_mut() {
                let line = raw_line.strip_suffix('\r').unwrap_or(raw_line);
                let width = indent_width(line);
                let content = line.trim_start_matches([' ', '\t']);
                if content.is_empty() {
                    block.text.push('\n');
                    continue;
                }
                if width > block.header_indent {
                    let base = *block.body_indent.get_or_insert(width);
                    let keep = width.saturating_sub(base) as usize;
                    block.text.push_str(&" ".repeat(keep));
                    block.text.push_str(content);
                    block.text.push('\n');
                    continue;
                }
                // Dedented back out of the prompt body.
                let block = raw_block.take().unwrap();
                self.flush_raw_block(block);
            }

            let before = self.tokens.len();
            self.lex_line(raw_line)?;
            if self.starts_prompt_header(before) {
                let width = indent_width(raw_line.strip_suffix('\r').unwrap_or(raw_line));
                raw_block = Some(RawBlock {
                    header_indent: width,
                    body_indent: None,
                    text: String::new(),
                    start_line: self.line_no + 1,
                });
            }
        }

        if let Some(block) = raw_block.take() {
            self.flush_raw_block(block);
        }

        // Close any open blocks.
        while self.indent_stack.len() > 1 {
            self.indent_stack.pop();
            self.push(TokenKind::Dedent, Span::point(self.line_no, 0));
        }
        self.push(TokenKind::Eof, Span::point(self.line_no, 0));
        Ok(self.tokens)
    }

    /// Whether the tokens emitted for the current line form a
    /// `prompt <name>:` header that opens a raw text body.
    fn starts_prompt_header(&self, before: usize) -> bool {
        if self.paren_depth != 0 {
            return false;
        }
        let line = &self.tokens[before..];
        matches!(
            line,
            [
                Token { kind: TokenKind::Ident(kw), .. },
                Token { kind: TokenKind::Ident(_), .. },
                Token { kind: TokenKind::Colon, .. },
                Token { kind: TokenKind::Newline, .. },
            ] if kw == "prompt"
        )
    }

    /// Emit the captured prompt body as INDENT, STR, NEWLINE, DEDENT.
    fn flush_raw_block(&mut self, block: RawBlock) {
        let text = block.text.trim_end_matches('\n').to_owned();
        self.push(TokenKind::Indent, Span::point(block.start_line, 0));
        self.push(TokenKind::Str(text), Span::point(block.start_line, 0));
        self.push(TokenKind::Newline, Span::point(block.start_line, 0));
        self.push(TokenKind::Dedent, Span::point(self.line_no, 0));
    }

    fn push(&mut self, kind: TokenKind, span: Span) {
        self.tokens.push(Token { kind, span });
    }

    fn lex_line(&mut self, raw_line: &str) -> Result<(), Diagnostic> {
        let line = raw_line.strip_suffix('\r').unwrap_or(raw_line);

        // Measure indentation (only meaningful outside bracket groups).
        let mut width = 0u32;
        let mut content_start = 0usize;
        for (i, ch) in line.char_indices() {
            match ch {
                ' ' => width += 1,
                '\t' => width += TAB_WIDTH,
                _ => {
                    content_start = i;
                    break;
                }
            }
            content_start = i + ch.len_utf8();
        }
        let content = &line[content_start..];

        // Blank and comment-only lines never affect indentation.
        if content.is_empty() || content.starts_with('#') {
            return Ok(());
        }

        if self.paren_depth == 0 {
            self.track_indent(width)?;
        }

        self.lex_content(content, width)?;

        if self.paren_depth == 0 {
            self.push(
                TokenKind::Newline,
                Span::point(self.line_no, width + content.len() as u32),
            );
        }
        Ok(())
    }

    fn track_indent(&mut self, width: u32) -> Result<(), Diagnostic> {
        let current = *self.indent_stack.last().unwrap_or(&0);
        if width > current {
            self.indent_stack.push(width);
            self.push(TokenKind::Indent, Span::point(self.line_no, 0));
        } else if width < current {
            while let Some(&top) = self.indent_stack.last() {
                if top <= width {
                    break;
                }
                self.indent_stack.pop();
                self.push(TokenKind::Dedent, Span::point(self.line_no, 0));
            }
            if *self.indent_stack.last().unwrap_or(&0) != width {
                return Err(Diagnostic::new(
                    ErrorCode::E0008,
                    "mismatched indentation",
                    self.file,
                    Span::point(self.line_no, width),
                ));
            }
        }
        Ok(())
    }

    fn lex_content(&mut self, content: &str, indent: u32) -> Result<(), Diagnostic> {
        let chars: Vec<char> = content.chars().collect();
        let mut i = 0usize;
        while i < chars.len() {
            let ch = chars[i];
            let col = indent + i as u32;
            match ch {
                ' ' | '\t' => {
                    i += 1;
                }
                '#' => break, // trailing comment
                '(' => {
                    self.paren_depth += 1;
                    self.push(TokenKind::LParen, Span::point(self.line_no, col));
                    i += 1;
                }
                '[' => {
                    self.paren_depth += 1;
                    self.push(TokenKind::LBracket, Span::point(self.line_no, col));
                    i += 1;
                }
                '{' => {
                    self.paren_depth += 1;
                    self.push(TokenKind::LBrace, Span::point(self.line_no, col));
                    i += 1;
                }
                ')' => {
                    self.paren_depth = self.paren_depth.saturating_sub(1);
                    self.push(TokenKind::RParen, Span::point(self.line_no, col));
                    i += 1;
                }
                ']' => {
                    self.paren_depth = self.paren_depth.saturating_sub(1);
                    self.push(TokenKind::RBracket, Span::point(self.line_no, col));
                    i += 1;
                }
                '}' => {
                    self.paren_depth = self.paren_depth.saturating_sub(1);
                    self.push(TokenKind::RBrace, Span::point(self.line_no, col));
                    i += 1;
                }
                ':' => {
                    self.push(TokenKind::Colon, Span::point(self.line_no, col));
                    i += 1;
                }
                ',' => {
                    self.push(TokenKind::Comma, Span::point(self.line_no, col));
                    i += 1;
                }
                '.' => {
                    self.push(TokenKind::Dot, Span::point(self.line_no, col));
                    i += 1;
                }
                '?' => {
                    self.push(TokenKind::Question, Span::point(self.line_no, col));
                    i += 1;
                }
                '+' => {
                    self.push(TokenKind::Plus, Span::point(self.line_no, col));
                    i += 1;
                }
                '*' => {
                    self.push(TokenKind::Star, Span::point(self.line_no, col));
                    i += 1;
                }
                '~' => {
                    self.push(TokenKind::Tilde, Span::point(self.line_no, col));
                    i += 1;
                }
                '=' => {
                    if chars.get(i + 1) == Some(&'=') {
                        self.push(TokenKind::EqEq, Span::point(self.line_no, col));
                        i += 2;
                    } else {
                        self.push(TokenKind::Eq, Span::point(self.line_no, col));
                        i += 1;
                    }
                }
                '!' => {
                    if chars.get(i + 1) == Some(&'=') {
                        self.push(TokenKind::NotEq, Span::point(self.line_no, col));
                        i += 2;
                    } else {
                        return Err(self.bad_token(col, "'!'"));
                    }
                }
                '-' => {
                    if chars.get(i + 1) == Some(&'>') {
                        self.push(TokenKind::Arrow, Span::point(self.line_no, col));
                        i += 2;
                    } else if chars.get(i + 1).is_some_and(|c| c.is_ascii_digit()) {
                        i = self.lex_number(&chars, i, indent)?;
                    } else {
                        return Err(self.bad_token(col, "'-'"));
                    }
                }
                '$' => {
                    let start = i + 1;
                    let mut end = start;
                    while end < chars.len() && (chars[end].is_alphanumeric() || chars[end] == '_') {
                        end += 1;
                    }
                    if end == start {
                        return Err(self.bad_token(col, "'$'"));
                    }
                    let name: String = chars[start..end].iter().collect();
                    self.push(
                        TokenKind::Var(name),
                        Span::new(self.line_no, col, self.line_no, indent + end as u32),
                    );
                    i = end;
                }
                '"' | '\'' => {
                    i = self.lex_string(&chars, i, indent, ch)?;
                }
                c if c.is_ascii_digit() => {
                    i = self.lex_number(&chars, i, indent)?;
                }
                c if c.is_alphabetic() || c == '_' => {
                    let start = i;
                    let mut end = i;
                    while end < chars.len() && (chars[end].is_alphanumeric() || chars[end] == '_' || chars[end] == '-')
                    {
                        end += 1;
                    }
                    // A trailing '-' belongs to the next token (e.g. `->`).
                    while end > start && chars[end - 1] == '-' {
                        end -= 1;
                    }
                    let word: String = chars[start..end].iter().collect();
                    self.push(
                        TokenKind::Ident(word),
                        Span::new(self.line_no, col, self.line_no, indent + end as u32),
                    );
                    i = end;
                }
                other => {
                    return Err(self.bad_token(col, &format!("'{other}'")));
                }
            }
        }
        Ok(())
    }

    fn lex_number(&mut self, chars: &[char], start: usize, indent: u32) -> Result<usize, Diagnostic> {
        let mut end = start;
        if chars[end] == '-' {
            end += 1;
        }
        let mut is_float = false;
        while end < chars.len() {
            let c = chars[end];
            if c.is_ascii_digit() {
                end += 1;
            } else if c == '.' && !is_float && chars.get(end + 1).is_some_and(|d| d.is_ascii_digit()) {
                is_float = true;
                end += 1;
            } else {
                break;
            }
        }
        let text: String = chars[start..end].iter().collect();
        let span = Span::new(self.line_no, indent + start as u32, self.line_no, indent + end as u32);
        let kind = if is_float {
            TokenKind::Float(
                text.parse::<f64>()
                    .map_err(|_| self.bad_token(indent + start as u32, &text))?,
            )
        } else {
            TokenKind::Int(
                text.parse::<i64>()
                    .map_err(|_| self.bad_token(indent + start as u32, &text))?,
            )
        };
        self.push(kind, span);
        Ok(end)
    }

    fn lex_string(
        &mut self,
        chars: &[char],
        start: usize,
        indent: u32,
        quote: char,
    ) -> Result<usize, Diagnostic> {
        let mut out = String::new();
        let mut i = start + 1;
        while i < chars.len() {
            match chars[i] {
                c if c == quote => {
                    self.push(
                        TokenKind::Str(out),
                        Span::new(
                            self.line_no,
                            indent + start as u32,
                            self.line_no,
                            indent + i as u32 + 1,
                        ),
                    );
                    return Ok(i + 1);
                }
                '\\' => {
                    let next = chars.get(i + 1).copied().ok_or_else(|| {
                        self.bad_token(indent + i as u32, "unterminated escape")
                    })?;
                    out.push(match next {
                        'n' => '\n',
                        't' => '\t',
                        '\\' => '\\',
                        c if c == quote => c,
                        other => other,
                    });
                    i += 2;
                }
                c => {
                    out.push(c);
                    i += 1;
                }
            }
        }
        Err(Diagnostic::new(
            ErrorCode::E0007,
            "invalid token or unexpected end of input",
            self.file,
            Span::point(self.line_no, indent + start as u32),
        ))
    }

    fn bad_token(&self, col: u32, what: &str) -> Diagnostic {
        Diagnostic::new(
            ErrorCode::E0007,
            format!("invalid token or unexpected end of input: {what}"),
            self.file,
            Span::point(self.line_no, col),
        )
    }
}

/// Tokenize `src`, reporting lexical problems as diagnostics.
pub fn lex(src: &str, file: &str) -> Result<Vec<Token>, Diagnostic> {
    Lexer::new(src, file).lex()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        lex(src, "test.sr").unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn simple_line() {
        let toks = kinds("streetrace v1\n");
        assert_eq!(
            toks,
            vec![
                TokenKind::Ident("streetrace".into()),
                TokenKind::Ident("v1".into()),
                TokenKind::Newline,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn indent_and_dedent_tokens() {
        let toks = kinds("flow main:\n    log \"hi\"\nflow other:\n");
        let indents = toks.iter().filter(|k| **k == TokenKind::Indent).count();
        let dedents = toks.iter().filter(|k| **k == TokenKind::Dedent).count();
        assert_eq!(indents, 1);
        assert_eq!(dedents, 1);
    }

    #[test]
    fn dangling_indent_closed_at_eof() {
        let toks = kinds("flow main:\n    log \"hi\"\n");
        assert!(toks.contains(&TokenKind::Dedent));
        assert_eq!(*toks.last().unwrap(), TokenKind::Eof);
    }

    #[test]
    fn tab_counts_as_four_spaces() {
        // Tab-indented then 4-space-indented lines sit at the same level.
        let toks = kinds("flow main:\n\tlog \"a\"\n    log \"b\"\n");
        let indents = toks.iter().filter(|k| **k == TokenKind::Indent).count();
        assert_eq!(indents, 1);
    }

    #[test]
    fn mismatched_indentation_is_e0008() {
        let err = lex("flow main:\n    log \"a\"\n  log \"b\"\n", "t.sr").unwrap_err();
        assert_eq!(err.code, ErrorCode::E0008);
    }

    #[test]
    fn brackets_suppress_indentation() {
        let toks = kinds("$x = [1,\n    2,\n    3]\n");
        assert!(!toks.contains(&TokenKind::Indent));
        assert_eq!(toks.iter().filter(|k| **k == TokenKind::Newline).count(), 1);
    }

    #[test]
    fn comment_only_lines_are_skipped() {
        let toks = kinds("# header\nflow main:\n    # inner\n    log \"hi\"\n");
        let indents = toks.iter().filter(|k| **k == TokenKind::Indent).count();
        assert_eq!(indents, 1);
    }

    #[test]
    fn string_keeps_interpolation_markers() {
        let toks = kinds("log \"count ${len(x)}\"\n");
        assert!(toks
            .iter()
            .any(|k| matches!(k, TokenKind::Str(s) if s.contains("${len(x)}"))));
    }

    #[test]
    fn unterminated_string_is_e0007() {
        let err = lex("log \"oops\n", "t.sr").unwrap_err();
        assert_eq!(err.code, ErrorCode::E0007);
    }

    #[test]
    fn var_and_arrow_and_operators() {
        let toks = kinds("run helper with $task -> $result\n");
        assert!(toks.contains(&TokenKind::Var("task".into())));
        assert!(toks.contains(&TokenKind::Arrow));
        assert!(toks.contains(&TokenKind::Var("result".into())));
    }

    #[test]
    fn prompt_body_captured_raw() {
        let src = "prompt greet:\n    Hello ${name}! How are you?\n    Second line.\nflow main:\n    log \"x\"\n";
        let toks = kinds(src);
        let body = toks.iter().find_map(|k| match k {
            TokenKind::Str(s) if s.contains("Hello") => Some(s.clone()),
            _ => None,
        });
        assert_eq!(body.unwrap(), "Hello ${name}! How are you?\nSecond line.");
    }

    #[test]
    fn prompt_body_at_eof() {
        let toks = kinds("prompt p:\n    just text with punctuation !!\n");
        assert!(toks
            .iter()
            .any(|k| matches!(k, TokenKind::Str(s) if s.contains("punctuation !!"))));
        assert_eq!(*toks.last().unwrap(), TokenKind::Eof);
    }

    #[test]
    fn negative_and_float_numbers() {
        let toks = kinds("$x = -3\n$y = 2.5\n");
        assert!(toks.contains(&TokenKind::Int(-3)));
        assert!(toks.contains(&TokenKind::Float(2.5)));
    }
}
