// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Lexical analysis for the attest source language
//!
//! Line-level normalization and classification, plus the token stream for
//! infix expressions. The source language is line-oriented: one statement
//! per logical line, blocks delimited by braces.

use crate::error::ExprError;
use serde::{Deserialize, Serialize};
use unicode_segmentation::UnicodeSegmentation;

/// Normalize raw source text into trimmed, non-empty logical lines
///
/// Blank lines are dropped. A leading `<digits>.` prefix is stripped so that
/// numbered listings pasted from a document still parse.
pub fn normalize(text: &str) -> Vec<String> {
    text.lines()
        .map(|line| strip_numbered_prefix(line.trim()).to_string())
        .filter(|line| !line.is_empty())
        .collect()
}

/// True when every non-empty line of the buffer starts with `#`
///
/// Used by the collaborator to detect that no second program was supplied in
/// equivalence mode.
pub fn is_comment_only(text: &str) -> bool {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .all(|line| line.starts_with('#'))
}

fn strip_numbered_prefix(line: &str) -> &str {
    let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits > 0 && line[digits..].starts_with('.') {
        line[digits + 1..].trim_start()
    } else {
        line
    }
}

/// The assignment target of a statement line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssignTarget {
    /// `v := e;`
    Scalar(String),
    /// `a[i] := e;` with the index kept as raw expression text
    Element { base: String, index: String },
}

/// Classification of a single logical line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineKind {
    /// Scalar or array-element assignment; `=` is accepted as `:=`
    Assign { target: AssignTarget, rhs: String },
    /// `for (init; cond; step) {` or `while (cond) {`; carries the header
    /// substring from the keyword through the matching `)`
    LoopHeader { header: String },
    /// `if (cond) {`
    If { cond: String },
    /// `} else if (cond) {` (leading `}` optional)
    ElseIf { cond: String },
    /// `} else {` (leading `}` optional)
    Else,
    /// A bare `}`
    Close,
    /// Call-shaped statement `name(arg);`, used for `assert` and `assume`
    Call { name: String, arg: String },
    /// Anything the classifier does not recognize
    Other,
}

/// Classify one trimmed line
pub fn classify(line: &str) -> LineKind {
    let line = line.trim();
    if line == "}" {
        return LineKind::Close;
    }

    // Branch markers may carry the closer of the previous arm
    let after_close = line.strip_prefix('}').map(str::trim_start).unwrap_or(line);
    if let Some(rest) = keyword_tail(after_close, "else") {
        let rest = rest.trim_start();
        if rest == "{" {
            return LineKind::Else;
        }
        if let Some(rest) = keyword_tail(rest, "if") {
            if let Some(cond) = condition_of(rest) {
                return LineKind::ElseIf { cond };
            }
        }
        return LineKind::Other;
    }
    if !line.starts_with('}') {
        if let Some(rest) = keyword_tail(line, "if") {
            if let Some(cond) = condition_of(rest) {
                return LineKind::If { cond };
            }
            return LineKind::Other;
        }
        if let Some(header) = match_loop_header(line) {
            return LineKind::LoopHeader { header };
        }
        if let Some((name, arg)) = match_call(line) {
            return LineKind::Call { name, arg };
        }
        if let Some((target, rhs)) = match_assignment(line) {
            return LineKind::Assign { target, rhs };
        }
    }
    LineKind::Other
}

/// Strip a leading keyword, requiring a non-identifier character after it
fn keyword_tail<'a>(line: &'a str, keyword: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(keyword)?;
    match rest.chars().next() {
        Some(c) if c.is_alphanumeric() || c == '_' => None,
        _ => Some(rest),
    }
}

/// Extract the parenthesized condition of a branch marker line
///
/// The text between the first `(` and the last `)` is the condition; after
/// the `)` only whitespace and the opening brace may follow.
fn condition_of(rest: &str) -> Option<String> {
    let rest = rest.trim_start();
    let open = rest.find('(')?;
    let close = rest.rfind(')')?;
    if close < open {
        return None;
    }
    let tail = rest[close + 1..].trim();
    if tail != "{" {
        return None;
    }
    Some(rest[open + 1..close].trim().to_string())
}

/// Recognize a loop-header line and return the header substring
///
/// Matches the shape `for (…;…;…)` / `while (…)` with an optional trailing
/// `{`; anything after the closing `)` other than the brace disqualifies the
/// line.
pub fn match_loop_header(line: &str) -> Option<String> {
    let line = line.trim();
    let (keyword, want_semicolons) = if keyword_tail(line, "for").is_some() {
        ("for", 2)
    } else if keyword_tail(line, "while").is_some() {
        ("while", 0)
    } else {
        return None;
    };

    let rest = &line[keyword.len()..];
    let open_off = rest.find(|c: char| !c.is_whitespace())?;
    if !rest[open_off..].starts_with('(') {
        return None;
    }
    let open = keyword.len() + open_off;

    let mut depth = 0usize;
    let mut semicolons = 0usize;
    let mut close = None;
    for (i, c) in line.char_indices().skip_while(|(i, _)| *i < open) {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    close = Some(i);
                    break;
                }
            }
            ';' if depth == 1 => semicolons += 1,
            _ => {}
        }
    }
    let close = close?;
    if semicolons < want_semicolons {
        return None;
    }
    let tail = line[close + 1..].trim();
    if !(tail.is_empty() || tail == "{") {
        return None;
    }
    Some(line[..close + 1].to_string())
}

/// Recognize `name(arg);` where `name` directly precedes the `(`
fn match_call(line: &str) -> Option<(String, String)> {
    let mut chars = line.char_indices();
    let (_, first) = chars.next()?;
    if !(first.is_alphabetic() || first == '_') {
        return None;
    }
    let mut name_end = first.len_utf8();
    for (i, c) in chars {
        if c.is_alphanumeric() || c == '_' {
            name_end = i + c.len_utf8();
        } else {
            break;
        }
    }
    let rest = &line[name_end..];
    if !rest.starts_with('(') {
        return None;
    }
    let body = rest.strip_suffix(';')?.trim_end();
    let close = body.rfind(')')?;
    if close + 1 != body.len() {
        return None;
    }
    Some((
        line[..name_end].to_string(),
        body[1..close].trim().to_string(),
    ))
}

/// Recognize `v := e;` / `a[i] := e;` (with `=` as a synonym for `:=`)
///
/// The trailing semicolon is optional so that SSA output, which omits it, can
/// re-enter the pipeline.
fn match_assignment(line: &str) -> Option<(AssignTarget, String)> {
    let chars: Vec<char> = line.chars().collect();
    let mut i = 0;
    if !(chars.first()?.is_alphabetic() || chars[0] == '_') {
        return None;
    }
    while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
        i += 1;
    }
    let name: String = chars[..i].iter().collect();

    let mut index = None;
    let mut j = skip_ws(&chars, i);
    if j < chars.len() && chars[j] == '[' {
        let mut depth = 0usize;
        let start = j + 1;
        let mut end = None;
        while j < chars.len() {
            match chars[j] {
                '[' => depth += 1,
                ']' => {
                    depth -= 1;
                    if depth == 0 {
                        end = Some(j);
                        break;
                    }
                }
                _ => {}
            }
            j += 1;
        }
        let end = end?;
        index = Some(chars[start..end].iter().collect::<String>().trim().to_string());
        j = skip_ws(&chars, end + 1);
    }

    // `:=`, or a bare `=` that is not the head of `==`
    let op_len = if chars.get(j) == Some(&':') && chars.get(j + 1) == Some(&'=') {
        2
    } else if chars.get(j) == Some(&'=') && chars.get(j + 1) != Some(&'=') {
        1
    } else {
        return None;
    };
    let rhs_start = skip_ws(&chars, j + op_len);
    let mut rhs: String = chars[rhs_start..].iter().collect();
    if let Some(stripped) = rhs.trim_end().strip_suffix(';') {
        rhs = stripped.to_string();
    }
    let rhs = rhs.trim().to_string();
    if rhs.is_empty() {
        return None;
    }

    let target = match index {
        Some(index) => AssignTarget::Element { base: name, index },
        None => AssignTarget::Scalar(name),
    };
    Some((target, rhs))
}

fn skip_ws(chars: &[char], mut i: usize) -> usize {
    while i < chars.len() && chars[i].is_whitespace() {
        i += 1;
    }
    i
}

/// Token types for infix expressions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Token {
    Integer(i64),
    Identifier(String),
    Operator(Operator),
    LeftParen,
    RightParen,
    LeftBracket,
    RightBracket,
    Question,
    Colon,
}

/// Binary operators recognized by the tokenizer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    EqEq,
    NotEq,
    Less,
    LessEq,
    Greater,
    GreaterEq,
}

/// Tokenizer for infix expressions
pub struct Tokenizer {
    input: Vec<char>,
    position: usize,
    source: String,
}

impl Tokenizer {
    /// Create a tokenizer over the given expression text
    pub fn new(input: &str) -> Self {
        let chars: Vec<char> = input.graphemes(true).flat_map(|g| g.chars()).collect();
        Self {
            input: chars,
            position: 0,
            source: input.to_string(),
        }
    }

    /// Tokenize the whole expression
    pub fn tokenize(mut self) -> Result<Vec<Token>, ExprError> {
        let mut tokens = Vec::new();
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.position += 1;
                continue;
            }
            if c.is_ascii_digit() {
                tokens.push(self.read_integer()?);
                continue;
            }
            if c.is_alphabetic() || c == '_' {
                tokens.push(self.read_identifier());
                continue;
            }
            tokens.push(self.read_symbol(c)?);
        }
        Ok(tokens)
    }

    fn peek(&self) -> Option<char> {
        self.input.get(self.position).copied()
    }

    fn read_integer(&mut self) -> Result<Token, ExprError> {
        let start = self.position;
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.position += 1;
        }
        let text: String = self.input[start..self.position].iter().collect();
        let value = text
            .parse::<i64>()
            .map_err(|_| ExprError::UnparseableExpression {
                expr: self.source.clone(),
                reason: format!("integer literal '{}' out of range", text),
            })?;
        Ok(Token::Integer(value))
    }

    fn read_identifier(&mut self) -> Token {
        let start = self.position;
        while matches!(self.peek(), Some(c) if c.is_alphanumeric() || c == '_') {
            self.position += 1;
        }
        Token::Identifier(self.input[start..self.position].iter().collect())
    }

    fn read_symbol(&mut self, c: char) -> Result<Token, ExprError> {
        let next = self.input.get(self.position + 1).copied();
        let (token, len) = match (c, next) {
            ('=', Some('=')) => (Token::Operator(Operator::EqEq), 2),
            ('!', Some('=')) => (Token::Operator(Operator::NotEq), 2),
            ('<', Some('=')) => (Token::Operator(Operator::LessEq), 2),
            ('>', Some('=')) => (Token::Operator(Operator::GreaterEq), 2),
            ('<', _) => (Token::Operator(Operator::Less), 1),
            ('>', _) => (Token::Operator(Operator::Greater), 1),
            ('+', _) => (Token::Operator(Operator::Plus), 1),
            ('-', _) => (Token::Operator(Operator::Minus), 1),
            ('*', _) => (Token::Operator(Operator::Star), 1),
            ('/', _) => (Token::Operator(Operator::Slash), 1),
            ('%', _) => (Token::Operator(Operator::Percent), 1),
            ('(', _) => (Token::LeftParen, 1),
            (')', _) => (Token::RightParen, 1),
            ('[', _) => (Token::LeftBracket, 1),
            (']', _) => (Token::RightBracket, 1),
            ('?', _) => (Token::Question, 1),
            (':', _) => (Token::Colon, 1),
            _ => {
                return Err(ExprError::UnparseableExpression {
                    expr: self.source.clone(),
                    reason: format!("unexpected character '{}'", c),
                })
            }
        };
        self.position += len;
        Ok(token)
    }
}
