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

//! SMT-LIB 2 script emission
//!
//! Targets `QF_UFLIA`, extended with an uninterpreted `IntArray` sort and
//! `select`/`store` functions when any array appears. Every SSA definition
//! becomes an equality assertion; the program's final `assert` is the goal,
//! `assume` finals are plain constraints. The Greek `φ` is transliterated to
//! the ASCII prefix `phi` throughout.

use crate::parser::{BinOp, CmpOp, Expr};
use crate::ssa::{SsaLine, SsaProgram};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Sort of a declared constant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Sort {
    Int,
    Bool,
}

impl fmt::Display for Sort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sort::Int => write!(f, "Int"),
            Sort::Bool => write!(f, "Bool"),
        }
    }
}

/// An emitted script, kept in parts so the goal can be renegotiated
#[derive(Debug, Clone, Default)]
pub struct SmtScript {
    /// Declaration lines, arrays before scalars
    pub declarations: Vec<String>,
    /// Asserted expressions in prefix form, unwrapped
    pub assertions: Vec<String>,
    /// Index into `assertions` of the goal, when the program has one
    pub goal: Option<usize>,
    /// Declared scalar constants with their sorts
    pub scalars: BTreeMap<String, Sort>,
    /// Declared array constants
    pub arrays: BTreeSet<String>,
}

impl SmtScript {
    /// The complete script text
    pub fn script(&self) -> String {
        self.render(None, &[])
    }

    /// The script with the goal negated and optional blocking constraints
    /// appended; `None` when there is no goal to negate
    pub fn negated(&self, blocks: &[String]) -> Option<String> {
        let goal = self.goal?;
        Some(self.render(Some(goal), blocks))
    }

    fn render(&self, negate: Option<usize>, blocks: &[String]) -> String {
        let mut lines = vec!["(set-logic QF_UFLIA)".to_string()];
        lines.extend(self.declarations.iter().cloned());
        for (i, assertion) in self.assertions.iter().enumerate() {
            if negate == Some(i) {
                lines.push(format!("(assert (not {}))", assertion));
            } else {
                lines.push(format!("(assert {})", assertion));
            }
        }
        for block in blocks {
            lines.push(format!("(assert {})", block));
        }
        lines.push("(check-sat)".to_string());
        lines.push("(get-model)".to_string());
        lines.join("\n")
    }
}

/// Transliterate `φ` into the ASCII symbol space
pub fn smt_name(name: &str) -> String {
    name.replace('φ', "phi")
}

fn is_guard_name(name: &str) -> bool {
    name.starts_with('φ') || name.starts_with("phi")
}

/// Emit the script for an SSA program
pub fn emit(program: &SsaProgram) -> SmtScript {
    let mut emitter = Emitter::default();
    for line in &program.lines {
        match line {
            SsaLine::Def { name, rhs } => emitter.emit_def(name, rhs),
            SsaLine::Final { call, arg } => emitter.emit_final(call, arg),
        }
    }
    emitter.finish()
}

#[derive(Default)]
struct Emitter {
    scalars: BTreeMap<String, Sort>,
    arrays: BTreeSet<String>,
    assertions: Vec<String>,
    goal: Option<usize>,
}

impl Emitter {
    fn emit_def(&mut self, name: &str, rhs: &Expr) {
        self.collect_symbols(rhs);
        let sort = if is_guard_name(name) {
            Sort::Bool
        } else {
            self.sort_of(rhs)
        };
        self.scalars.insert(smt_name(name), sort);
        self.assertions
            .push(format!("(= {} {})", smt_name(name), to_smt(rhs)));
    }

    fn emit_final(&mut self, call: &str, arg: &Expr) {
        self.collect_symbols(arg);
        self.assertions.push(to_smt(arg));
        if call == "assert" {
            self.goal = Some(self.assertions.len() - 1);
        }
    }

    /// Declare every free identifier; array bases go to the arrays set
    fn collect_symbols(&mut self, expr: &Expr) {
        match expr {
            Expr::Integer(_) | Expr::Boolean(_) => {}
            Expr::Variable(name) => {
                let sort = if is_guard_name(name) {
                    Sort::Bool
                } else {
                    Sort::Int
                };
                self.scalars.entry(smt_name(name)).or_insert(sort);
            }
            Expr::ArrayAccess { base, index } => {
                self.arrays.insert(smt_name(base));
                self.collect_symbols(index);
            }
            Expr::BinaryOp { left, right, .. } | Expr::Compare { left, right, .. } => {
                self.collect_symbols(left);
                self.collect_symbols(right);
            }
            Expr::Ternary {
                cond,
                then_value,
                else_value,
            } => {
                self.collect_symbols(cond);
                self.collect_symbols(then_value);
                self.collect_symbols(else_value);
            }
        }
    }

    /// Infer the sort of a right-hand side: boolean literals, comparisons,
    /// and ternaries with boolean branches are Bool; everything else is Int
    fn sort_of(&self, expr: &Expr) -> Sort {
        match expr {
            Expr::Boolean(_) => Sort::Bool,
            Expr::Compare { .. } => Sort::Bool,
            Expr::Ternary {
                then_value,
                else_value,
                ..
            } => {
                if self.sort_of(then_value) == Sort::Bool
                    && self.sort_of(else_value) == Sort::Bool
                {
                    Sort::Bool
                } else {
                    Sort::Int
                }
            }
            Expr::Variable(name) => {
                if is_guard_name(name) {
                    Sort::Bool
                } else {
                    self.scalars
                        .get(&smt_name(name))
                        .copied()
                        .unwrap_or(Sort::Int)
                }
            }
            _ => Sort::Int,
        }
    }

    fn finish(mut self) -> SmtScript {
        // A name used both as an array base and a scalar keeps the array
        // declaration
        for array in &self.arrays {
            self.scalars.remove(array);
        }

        let mut declarations = Vec::new();
        if !self.arrays.is_empty() {
            declarations.push("(declare-sort IntArray 0)".to_string());
            declarations.push("(declare-fun select (IntArray Int) Int)".to_string());
            declarations.push("(declare-fun store (IntArray Int Int) IntArray)".to_string());
            for array in &self.arrays {
                declarations.push(format!("(declare-const {} IntArray)", array));
            }
        }
        for (name, sort) in &self.scalars {
            declarations.push(format!("(declare-const {} {})", name, sort));
        }

        SmtScript {
            declarations,
            assertions: self.assertions,
            goal: self.goal,
            scalars: self.scalars,
            arrays: self.arrays,
        }
    }
}

/// Lift an expression tree to prefix form
pub fn to_smt(expr: &Expr) -> String {
    match expr {
        Expr::Integer(n) => {
            if *n < 0 {
                format!("(- {})", n.unsigned_abs())
            } else {
                n.to_string()
            }
        }
        Expr::Boolean(b) => b.to_string(),
        Expr::Variable(name) => smt_name(name),
        Expr::ArrayAccess { base, index } => {
            format!("(select {} {})", smt_name(base), to_smt(index))
        }
        Expr::BinaryOp { op, left, right } => {
            format!("({} {} {})", smt_binop(*op), to_smt(left), to_smt(right))
        }
        Expr::Compare { op, left, right } => {
            format!("({} {} {})", smt_cmpop(*op), to_smt(left), to_smt(right))
        }
        Expr::Ternary {
            cond,
            then_value,
            else_value,
        } => format!(
            "(ite {} {} {})",
            to_smt(cond),
            to_smt(then_value),
            to_smt(else_value)
        ),
    }
}

fn smt_binop(op: BinOp) -> &'static str {
    match op {
        BinOp::Add => "+",
        BinOp::Sub => "-",
        BinOp::Mul => "*",
        BinOp::Div => "div",
        BinOp::Mod => "mod",
    }
}

fn smt_cmpop(op: CmpOp) -> &'static str {
    match op {
        CmpOp::Eq => "=",
        CmpOp::Ne => "distinct",
        CmpOp::Lt => "<",
        CmpOp::Le => "<=",
        CmpOp::Gt => ">",
        CmpOp::Ge => ">=",
    }
}
