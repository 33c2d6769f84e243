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

//! Infix expression parsing
//!
//! Expressions are modeled as a tagged tree and parsed with shunting-yard
//! over the tokenizer's output. The ternary `?:` is a structural construct
//! recognized before shunting-yard runs: the token stream is split at the
//! `?` and `:` appearing at group depth zero and the three parts are parsed
//! independently. Parenthesized groups and array subscripts are parsed
//! recursively, so a ternary may appear at any depth.

use crate::error::ExprError;
use crate::lexer::{Operator, Token, Tokenizer};

/// Arithmetic operators (integer, truncating division)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// Expression tree
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Integer(i64),
    Boolean(bool),
    Variable(String),
    ArrayAccess {
        base: String,
        index: Box<Expr>,
    },
    BinaryOp {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Compare {
        op: CmpOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Ternary {
        cond: Box<Expr>,
        then_value: Box<Expr>,
        else_value: Box<Expr>,
    },
}

impl Expr {
    pub fn var(name: &str) -> Self {
        Expr::Variable(name.to_string())
    }

    /// Precedence for the infix printer; atoms bind tightest
    fn precedence(&self) -> u8 {
        match self {
            Expr::Compare { .. } => 1,
            Expr::BinaryOp { op: BinOp::Add, .. } | Expr::BinaryOp { op: BinOp::Sub, .. } => 2,
            Expr::BinaryOp { .. } => 3,
            // Ternaries always print parenthesized, so they bind like atoms
            _ => 4,
        }
    }

    /// Render the tree back to infix source text
    pub fn to_infix(&self) -> String {
        match self {
            Expr::Integer(n) => n.to_string(),
            Expr::Boolean(b) => b.to_string(),
            Expr::Variable(name) => name.clone(),
            Expr::ArrayAccess { base, index } => format!("{}[{}]", base, index.to_infix()),
            Expr::BinaryOp { op, left, right } => {
                self.render_binary(binop_text(*op), left, right)
            }
            Expr::Compare { op, left, right } => self.render_binary(cmpop_text(*op), left, right),
            Expr::Ternary {
                cond,
                then_value,
                else_value,
            } => format!(
                "({} ? {} : {})",
                cond.to_infix(),
                then_value.to_infix(),
                else_value.to_infix()
            ),
        }
    }

    fn render_binary(&self, op: &str, left: &Expr, right: &Expr) -> String {
        let prec = self.precedence();
        let lhs = if left.precedence() < prec {
            format!("({})", left.to_infix())
        } else {
            left.to_infix()
        };
        // All binaries are left-associative, so an equal-precedence right
        // child needs explicit grouping
        let rhs = if right.precedence() <= prec {
            format!("({})", right.to_infix())
        } else {
            right.to_infix()
        };
        format!("{} {} {}", lhs, op, rhs)
    }
}

fn binop_text(op: BinOp) -> &'static str {
    match op {
        BinOp::Add => "+",
        BinOp::Sub => "-",
        BinOp::Mul => "*",
        BinOp::Div => "/",
        BinOp::Mod => "%",
    }
}

fn cmpop_text(op: CmpOp) -> &'static str {
    match op {
        CmpOp::Eq => "==",
        CmpOp::Ne => "!=",
        CmpOp::Lt => "<",
        CmpOp::Le => "<=",
        CmpOp::Gt => ">",
        CmpOp::Ge => ">=",
    }
}

fn operator_precedence(op: Operator) -> u8 {
    match op {
        Operator::EqEq
        | Operator::NotEq
        | Operator::Less
        | Operator::LessEq
        | Operator::Greater
        | Operator::GreaterEq => 1,
        Operator::Plus | Operator::Minus => 2,
        Operator::Star | Operator::Slash | Operator::Percent => 3,
    }
}

/// Parse an infix expression string into a tree
pub fn parse(expr: &str) -> Result<Expr, ExprError> {
    let tokens = Tokenizer::new(expr).tokenize()?;
    let mut parser = ExprParser {
        source: expr.to_string(),
    };
    parser.parse_tokens(&tokens)
}

struct ExprParser {
    source: String,
}

impl ExprParser {
    fn parse_tokens(&mut self, tokens: &[Token]) -> Result<Expr, ExprError> {
        let tokens = self.strip_outer_parens(tokens)?;
        if tokens.is_empty() {
            return Err(self.unparseable("empty expression"));
        }

        if let Some((cond, then_part, else_part)) = self.split_ternary(tokens)? {
            let cond = self.parse_tokens(cond)?;
            let then_value = self.parse_tokens(then_part)?;
            let else_value = self.parse_tokens(else_part)?;
            return Ok(Expr::Ternary {
                cond: Box::new(cond),
                then_value: Box::new(then_value),
                else_value: Box::new(else_value),
            });
        }

        self.shunting_yard(tokens)
    }

    /// Drop parentheses that enclose the whole token stream
    fn strip_outer_parens<'a>(&mut self, mut tokens: &'a [Token]) -> Result<&'a [Token], ExprError> {
        while tokens.first() == Some(&Token::LeftParen) {
            let close = self.matching_paren(tokens, 0)?;
            if close != tokens.len() - 1 {
                break;
            }
            tokens = &tokens[1..close];
        }
        Ok(tokens)
    }

    /// Index of the `)` matching the `(` at `open`
    fn matching_paren(&self, tokens: &[Token], open: usize) -> Result<usize, ExprError> {
        let mut depth = 0usize;
        for (i, token) in tokens.iter().enumerate().skip(open) {
            match token {
                Token::LeftParen => depth += 1,
                Token::RightParen => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(i);
                    }
                }
                _ => {}
            }
        }
        Err(ExprError::ParenImbalance {
            expr: self.source.clone(),
        })
    }

    /// Split `cond ? then : else` at group depth zero
    ///
    /// Returns `None` when no top-level `?` exists. Nested ternaries in the
    /// else position are handled by the recursive parse of the third part,
    /// which gives the operator its right associativity.
    fn split_ternary<'a>(
        &mut self,
        tokens: &'a [Token],
    ) -> Result<Option<(&'a [Token], &'a [Token], &'a [Token])>, ExprError> {
        let mut depth = 0i32;
        let mut question = None;
        for (i, token) in tokens.iter().enumerate() {
            match token {
                Token::LeftParen | Token::LeftBracket => depth += 1,
                Token::RightParen | Token::RightBracket => depth -= 1,
                Token::Question if depth == 0 => {
                    question = Some(i);
                    break;
                }
                _ => {}
            }
        }
        let Some(q) = question else {
            return Ok(None);
        };

        let mut depth = 0i32;
        let mut nested = 0usize;
        for (i, token) in tokens.iter().enumerate().skip(q + 1) {
            match token {
                Token::LeftParen | Token::LeftBracket => depth += 1,
                Token::RightParen | Token::RightBracket => depth -= 1,
                Token::Question if depth == 0 => nested += 1,
                Token::Colon if depth == 0 => {
                    if nested == 0 {
                        return Ok(Some((&tokens[..q], &tokens[q + 1..i], &tokens[i + 1..])));
                    }
                    nested -= 1;
                }
                _ => {}
            }
        }
        Err(self.unparseable("ternary '?' without matching ':'"))
    }

    /// Shunting-yard over a ternary-free token stream
    ///
    /// Parenthesized groups and subscripts are parsed recursively and pushed
    /// as operands, so the operator stack holds binary operators only.
    fn shunting_yard(&mut self, tokens: &[Token]) -> Result<Expr, ExprError> {
        let mut output: Vec<Expr> = Vec::new();
        let mut operators: Vec<Operator> = Vec::new();
        let mut i = 0;

        while i < tokens.len() {
            match &tokens[i] {
                Token::Integer(n) => {
                    output.push(Expr::Integer(*n));
                    i += 1;
                }
                Token::Identifier(name) => {
                    if tokens.get(i + 1) == Some(&Token::LeftBracket) {
                        let close = self.matching_bracket(tokens, i + 1)?;
                        let index = self.parse_tokens(&tokens[i + 2..close])?;
                        output.push(Expr::ArrayAccess {
                            base: name.clone(),
                            index: Box::new(index),
                        });
                        i = close + 1;
                    } else if name.eq_ignore_ascii_case("true") {
                        output.push(Expr::Boolean(true));
                        i += 1;
                    } else if name.eq_ignore_ascii_case("false") {
                        output.push(Expr::Boolean(false));
                        i += 1;
                    } else {
                        output.push(Expr::Variable(name.clone()));
                        i += 1;
                    }
                }
                Token::Operator(op) => {
                    while let Some(&top) = operators.last() {
                        if operator_precedence(*op) <= operator_precedence(top) {
                            operators.pop();
                            self.apply(top, &mut output)?;
                        } else {
                            break;
                        }
                    }
                    operators.push(*op);
                    i += 1;
                }
                Token::LeftParen => {
                    let close = self.matching_paren(tokens, i)?;
                    let inner = self.parse_tokens(&tokens[i + 1..close])?;
                    output.push(inner);
                    i = close + 1;
                }
                Token::RightParen => {
                    return Err(ExprError::ParenImbalance {
                        expr: self.source.clone(),
                    })
                }
                Token::LeftBracket | Token::RightBracket => {
                    return Err(self.unparseable("subscript without array name"))
                }
                Token::Question | Token::Colon => {
                    return Err(self.unparseable("misplaced ternary operator"))
                }
            }
        }

        while let Some(op) = operators.pop() {
            self.apply(op, &mut output)?;
        }

        match output.len() {
            1 => Ok(output.pop().expect("length checked")),
            0 => Err(self.unparseable("empty expression")),
            _ => Err(self.unparseable("missing operator between operands")),
        }
    }

    /// Index of the `]` matching the `[` at `open`
    fn matching_bracket(&self, tokens: &[Token], open: usize) -> Result<usize, ExprError> {
        let mut depth = 0usize;
        for (i, token) in tokens.iter().enumerate().skip(open) {
            match token {
                Token::LeftBracket => depth += 1,
                Token::RightBracket => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(i);
                    }
                }
                _ => {}
            }
        }
        Err(self.unparseable("unterminated subscript"))
    }

    fn apply(&self, op: Operator, output: &mut Vec<Expr>) -> Result<(), ExprError> {
        let right = output
            .pop()
            .ok_or_else(|| self.unparseable("operator is missing its operand"))?;
        let left = output
            .pop()
            .ok_or_else(|| self.unparseable("operator is missing its operand"))?;
        let expr = match op {
            Operator::Plus => binary(BinOp::Add, left, right),
            Operator::Minus => binary(BinOp::Sub, left, right),
            Operator::Star => binary(BinOp::Mul, left, right),
            Operator::Slash => binary(BinOp::Div, left, right),
            Operator::Percent => binary(BinOp::Mod, left, right),
            Operator::EqEq => compare(CmpOp::Eq, left, right),
            Operator::NotEq => compare(CmpOp::Ne, left, right),
            Operator::Less => compare(CmpOp::Lt, left, right),
            Operator::LessEq => compare(CmpOp::Le, left, right),
            Operator::Greater => compare(CmpOp::Gt, left, right),
            Operator::GreaterEq => compare(CmpOp::Ge, left, right),
        };
        output.push(expr);
        Ok(())
    }

    fn unparseable(&self, reason: &str) -> ExprError {
        ExprError::UnparseableExpression {
            expr: self.source.clone(),
            reason: reason.to_string(),
        }
    }
}

fn binary(op: BinOp, left: Expr, right: Expr) -> Expr {
    Expr::BinaryOp {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

fn compare(op: CmpOp, left: Expr, right: Expr) -> Expr {
    Expr::Compare {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}
