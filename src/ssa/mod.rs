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

//! Single-assignment conversion
//!
//! The loop-free program is parsed into a statement tree (sequence, branch
//! chain, call) and walked recursively. Every write allocates a fresh
//! version; each guarded arm gets its own snapshot of the version
//! environment, and control-flow merges reconcile the snapshots with
//! ternary selectors keyed on the φ-guard variables.
//!
//! Array cells version under the stable key `base_index` (index text with
//! `+` rewritten to `_`); a read of a never-written cell stays an array
//! access and lowers to `select` at emission time.

use crate::error::TransformError;
use crate::lexer::{classify, AssignTarget, LineKind};
use crate::parser::{self, Expr};
use std::collections::{HashMap, HashSet};

/// Key under which a name is versioned
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VarKey {
    Scalar(String),
    /// Array cell, keyed by the canonical text of its index expression
    Cell { base: String, index: String },
}

impl VarKey {
    /// Versioned SSA name, e.g. `x_2` or `arr_j_1`
    pub fn render(&self, version: u32) -> String {
        match self {
            VarKey::Scalar(name) => format!("{}_{}", name, version),
            VarKey::Cell { base, index } => format!("{}_{}_{}", base, index, version),
        }
    }
}

/// One line of SSA output
#[derive(Debug, Clone, PartialEq)]
pub enum SsaLine {
    /// `name = rhs`; `name` never repeats
    Def { name: String, rhs: Expr },
    /// A rewritten final expression, e.g. `assert(y_3 > 0);`
    Final { call: String, arg: Expr },
}

/// An SSA program in definition order
#[derive(Debug, Clone, Default)]
pub struct SsaProgram {
    pub lines: Vec<SsaLine>,
    /// Final visible version of every assigned name, in first-write order
    pub final_versions: Vec<(VarKey, String)>,
}

impl SsaProgram {
    /// Render the program the way the SSA pane shows it
    pub fn render(&self) -> String {
        self.lines
            .iter()
            .map(|line| match line {
                SsaLine::Def { name, rhs } => format!("{} = {}", name, rhs.to_infix()),
                SsaLine::Final { call, arg } => format!("{}({});", call, arg.to_infix()),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Names defined by the program, in order
    pub fn def_names(&self) -> Vec<&str> {
        self.lines
            .iter()
            .filter_map(|line| match line {
                SsaLine::Def { name, .. } => Some(name.as_str()),
                SsaLine::Final { .. } => None,
            })
            .collect()
    }

    /// Number of φ-guard definitions
    pub fn guard_count(&self) -> usize {
        self.def_names()
            .iter()
            .filter(|name| name.starts_with('φ'))
            .count()
    }
}

/// Statement tree built from the classified lines
enum Node {
    Assign {
        target: AssignTarget,
        rhs: String,
    },
    Call {
        name: String,
        arg: String,
        line: String,
    },
    Branch {
        arms: Vec<Arm>,
    },
}

struct Arm {
    /// `None` for the `else` arm
    guard: Option<String>,
    body: Vec<Node>,
}

/// Convert a loop-free program to single-assignment form
pub fn convert(lines: &[String]) -> Result<SsaProgram, TransformError> {
    let tree = build_tree(lines)?;
    let mut converter = Converter::default();
    let mut env = Env::new();
    converter.run_block(&tree, &mut env)?;
    converter.emit_finals(&env)?;

    let final_versions = converter
        .order
        .iter()
        .filter_map(|key| env.get(key).map(|v| (key.clone(), key.render(*v))))
        .collect();
    Ok(SsaProgram {
        lines: converter.out,
        final_versions,
    })
}

fn build_tree(lines: &[String]) -> Result<Vec<Node>, TransformError> {
    let mut i = 0;
    let nodes = parse_nodes(lines, &mut i, false)?;
    if i < lines.len() {
        return Err(TransformError::UnsupportedControlFlow {
            fragment: lines[i].clone(),
            reason: "'}' without a matching opener".to_string(),
        });
    }
    Ok(nodes)
}

fn parse_nodes(
    lines: &[String],
    i: &mut usize,
    inside_arm: bool,
) -> Result<Vec<Node>, TransformError> {
    let mut nodes = Vec::new();
    while *i < lines.len() {
        let line = &lines[*i];
        match classify(line) {
            LineKind::Assign { target, rhs } => {
                nodes.push(Node::Assign { target, rhs });
                *i += 1;
            }
            LineKind::Call { name, arg } => {
                nodes.push(Node::Call {
                    name,
                    arg,
                    line: line.clone(),
                });
                *i += 1;
            }
            LineKind::If { cond } => {
                nodes.push(parse_branch(lines, i, cond)?);
            }
            LineKind::Close | LineKind::ElseIf { .. } | LineKind::Else => {
                if inside_arm {
                    return Ok(nodes);
                }
                return Err(TransformError::UnsupportedControlFlow {
                    fragment: line.clone(),
                    reason: "'}' without a matching opener".to_string(),
                });
            }
            LineKind::LoopHeader { header } => {
                return Err(TransformError::UnsupportedControlFlow {
                    fragment: header,
                    reason: "loop was not unrolled".to_string(),
                });
            }
            LineKind::Other => {
                return Err(TransformError::UnsupportedControlFlow {
                    fragment: line.clone(),
                    reason: "unrecognized statement".to_string(),
                });
            }
        }
    }
    Ok(nodes)
}

fn parse_branch(
    lines: &[String],
    i: &mut usize,
    first_cond: String,
) -> Result<Node, TransformError> {
    *i += 1;
    let mut arms = Vec::new();
    let mut guard = Some(first_cond);
    loop {
        let body = parse_nodes(lines, i, true)?;
        let was_else = guard.is_none();
        if *i >= lines.len() {
            return Err(TransformError::UnsupportedControlFlow {
                fragment: lines.last().cloned().unwrap_or_default(),
                reason: "block is never closed".to_string(),
            });
        }
        let delimiter = classify(&lines[*i]);
        arms.push(Arm {
            guard: guard.take(),
            body,
        });
        match delimiter {
            LineKind::Close => {
                *i += 1;
                return Ok(Node::Branch { arms });
            }
            LineKind::ElseIf { cond } if !was_else => {
                guard = Some(cond);
                *i += 1;
            }
            LineKind::Else if !was_else => {
                *i += 1;
            }
            _ => {
                return Err(TransformError::UnsupportedControlFlow {
                    fragment: lines[*i].clone(),
                    reason: "branch arm after 'else'".to_string(),
                });
            }
        }
    }
}

type Env = HashMap<VarKey, u32>;

#[derive(Default)]
struct Converter {
    /// Highest version allocated so far, per key
    versions: HashMap<VarKey, u32>,
    /// Keys in first-allocation order
    order: Vec<VarKey>,
    /// Every allocation, in order; used to find the keys a branch wrote
    write_log: Vec<VarKey>,
    /// Raw index expression of each array cell, for virgin-read fallbacks
    cell_index: HashMap<VarKey, Expr>,
    phi_count: u32,
    out: Vec<SsaLine>,
    finals: Vec<(String, String, String)>,
}

impl Converter {
    fn run_block(&mut self, nodes: &[Node], env: &mut Env) -> Result<(), TransformError> {
        for node in nodes {
            match node {
                Node::Assign { target, rhs } => self.convert_assign(target, rhs, env)?,
                Node::Call { name, arg, line } => {
                    self.finals.push((name.clone(), arg.clone(), line.clone()));
                }
                Node::Branch { arms } => self.convert_branch(arms, env)?,
            }
        }
        Ok(())
    }

    fn convert_assign(
        &mut self,
        target: &AssignTarget,
        rhs_text: &str,
        env: &mut Env,
    ) -> Result<(), TransformError> {
        let rhs = parser::parse(rhs_text).map_err(TransformError::from)?;
        let rewritten = rewrite(&rhs, env);
        let key = self.key_of(target)?;
        let version = self.allocate(&key);
        self.out.push(SsaLine::Def {
            name: key.render(version),
            rhs: rewritten,
        });
        env.insert(key, version);
        Ok(())
    }

    fn key_of(&mut self, target: &AssignTarget) -> Result<VarKey, TransformError> {
        match target {
            AssignTarget::Scalar(name) => Ok(VarKey::Scalar(name.clone())),
            AssignTarget::Element { base, index } => {
                let index_expr = parser::parse(index).map_err(TransformError::from)?;
                let key = VarKey::Cell {
                    base: base.clone(),
                    index: cell_key_text(&index_expr),
                };
                self.cell_index.entry(key.clone()).or_insert(index_expr);
                Ok(key)
            }
        }
    }

    fn allocate(&mut self, key: &VarKey) -> u32 {
        let version = self.versions.entry(key.clone()).or_insert(0);
        if *version == 0 {
            self.order.push(key.clone());
        }
        *version += 1;
        self.write_log.push(key.clone());
        *version
    }

    fn convert_branch(&mut self, arms: &[Arm], env: &mut Env) -> Result<(), TransformError> {
        let pre_env = env.clone();
        let log_start = self.write_log.len();
        let mut arm_results: Vec<(Option<String>, Env)> = Vec::new();

        for arm in arms {
            let phi = match &arm.guard {
                Some(cond_text) => {
                    let cond = parser::parse(cond_text).map_err(TransformError::from)?;
                    let rewritten = rewrite(&cond, &pre_env);
                    self.phi_count += 1;
                    let name = format!("φ{}", self.phi_count);
                    self.out.push(SsaLine::Def {
                        name: name.clone(),
                        rhs: rewritten,
                    });
                    Some(name)
                }
                None => None,
            };
            let mut arm_env = pre_env.clone();
            self.run_block(&arm.body, &mut arm_env)?;
            arm_results.push((phi, arm_env));
        }

        for key in written_keys(&self.write_log[log_start..]) {
            self.merge_key(&key, &arm_results, &pre_env, env);
        }
        Ok(())
    }

    /// Reconcile one name across the arms of a branch chain
    ///
    /// Arm *i*'s value is selected by guard φ_i with later arms nested in the
    /// else position; the terminal value comes from the `else` arm, or the
    /// pre-branch version, or (for array cells) the original array content.
    fn merge_key(
        &mut self,
        key: &VarKey,
        arm_results: &[(Option<String>, Env)],
        pre_env: &Env,
        env: &mut Env,
    ) {
        let mut guarded: Vec<(String, u32)> = Vec::new();
        let mut else_version = None;
        for (phi, arm_env) in arm_results {
            match (phi, arm_env.get(key)) {
                (Some(name), Some(version)) => guarded.push((name.clone(), *version)),
                (None, Some(version)) => else_version = Some(*version),
                (_, None) => {}
            }
        }

        if guarded.is_empty() {
            // Written unconditionally in the else arm only
            if let Some(version) = else_version {
                env.insert(key.clone(), version);
            }
            return;
        }

        let fallback = else_version
            .map(|v| Expr::Variable(key.render(v)))
            .or_else(|| pre_env.get(key).map(|v| Expr::Variable(key.render(*v))))
            .or_else(|| self.virgin_value(key, pre_env));

        let (mut values, mut conditions): (Vec<Expr>, Vec<String>) = guarded
            .iter()
            .map(|(phi, v)| (Expr::Variable(key.render(*v)), phi.clone()))
            .unzip();
        match fallback {
            Some(value) => values.push(value),
            None => {
                if values.len() == 1 {
                    // A single conditional write with nothing to merge
                    // against keeps its version, as in a single-version
                    // table entry
                    env.insert(key.clone(), guarded[0].1);
                    return;
                }
                conditions.pop();
            }
        }

        self.build_phi_tree(&values, &conditions, key);
        let merged = self.versions[key];
        env.insert(key.clone(), merged);
    }

    /// The pre-branch content of a never-written array cell
    fn virgin_value(&self, key: &VarKey, pre_env: &Env) -> Option<Expr> {
        match key {
            VarKey::Scalar(_) => None,
            VarKey::Cell { base, .. } => {
                let index = self.cell_index.get(key)?;
                Some(Expr::ArrayAccess {
                    base: base.clone(),
                    index: Box::new(rewrite(index, pre_env)),
                })
            }
        }
    }

    /// Nested-ternary combination of `values` under `conditions`
    ///
    /// `conditions[i]` selects `values[i]`; the last value is the fallback
    /// and the first true guard must win. Three or fewer values right-fold
    /// into a single definition. Larger sets name the tail half as its own
    /// definition and fold the head guards over it, which bounds the depth
    /// of any one definition without reordering the guards.
    fn build_phi_tree(&mut self, values: &[Expr], conditions: &[String], key: &VarKey) -> Expr {
        if values.len() == 1 {
            return values[0].clone();
        }
        let rhs = if values.len() > 3 {
            let mid = values.len() / 2;
            let tail = self.build_phi_tree(&values[mid..], &conditions[mid..], key);
            fold_ternary(&values[..mid], &conditions[..mid], tail)
        } else {
            fold_ternary(
                &values[..values.len() - 1],
                conditions,
                values[values.len() - 1].clone(),
            )
        };
        let version = self.allocate(key);
        self.out.push(SsaLine::Def {
            name: key.render(version),
            rhs,
        });
        Expr::Variable(key.render(version))
    }

    /// Rewrite and emit the collected final expressions, suppressing
    /// duplicates
    fn emit_finals(&mut self, env: &Env) -> Result<(), TransformError> {
        let finals = std::mem::take(&mut self.finals);
        let mut seen = HashSet::new();
        for (name, arg, line) in finals {
            if name != "assert" && name != "assume" {
                return Err(TransformError::MalformedAssertion { fragment: line });
            }
            if arg.trim().is_empty() {
                return Err(TransformError::MalformedAssertion { fragment: line });
            }
            let expr = parser::parse(&arg).map_err(TransformError::from)?;
            let rewritten = rewrite(&expr, env);
            let rendered = format!("{}({});", name, rewritten.to_infix());
            if seen.insert(rendered) {
                self.out.push(SsaLine::Final {
                    call: name,
                    arg: rewritten,
                });
            }
        }
        Ok(())
    }
}

/// Right-fold `values` under `conditions` onto a fallback expression
fn fold_ternary(values: &[Expr], conditions: &[String], fallback: Expr) -> Expr {
    let mut acc = fallback;
    for (value, condition) in values.iter().zip(conditions).rev() {
        acc = Expr::Ternary {
            cond: Box::new(Expr::Variable(condition.clone())),
            then_value: Box::new(value.clone()),
            else_value: Box::new(acc),
        };
    }
    acc
}

/// Keys written by a branch, deduplicated in first-write order
fn written_keys(log: &[VarKey]) -> Vec<VarKey> {
    let mut seen = HashSet::new();
    log.iter()
        .filter(|key| seen.insert((*key).clone()))
        .cloned()
        .collect()
}

/// Replace every identifier and versioned array cell with its current
/// version; free inputs and never-written cells pass through
fn rewrite(expr: &Expr, env: &Env) -> Expr {
    match expr {
        Expr::Integer(_) | Expr::Boolean(_) => expr.clone(),
        Expr::Variable(name) => {
            let key = VarKey::Scalar(name.clone());
            match env.get(&key) {
                Some(version) => Expr::Variable(key.render(*version)),
                None => expr.clone(),
            }
        }
        Expr::ArrayAccess { base, index } => {
            let key = VarKey::Cell {
                base: base.clone(),
                index: cell_key_text(index),
            };
            match env.get(&key) {
                Some(version) => Expr::Variable(key.render(*version)),
                None => Expr::ArrayAccess {
                    base: base.clone(),
                    index: Box::new(rewrite(index, env)),
                },
            }
        }
        Expr::BinaryOp { op, left, right } => Expr::BinaryOp {
            op: *op,
            left: Box::new(rewrite(left, env)),
            right: Box::new(rewrite(right, env)),
        },
        Expr::Compare { op, left, right } => Expr::Compare {
            op: *op,
            left: Box::new(rewrite(left, env)),
            right: Box::new(rewrite(right, env)),
        },
        Expr::Ternary {
            cond,
            then_value,
            else_value,
        } => Expr::Ternary {
            cond: Box::new(rewrite(cond, env)),
            then_value: Box::new(rewrite(then_value, env)),
            else_value: Box::new(rewrite(else_value, env)),
        },
    }
}

/// Canonical cell-key text of an index expression: whitespace removed,
/// `+` and any other operator character rewritten to `_`
fn cell_key_text(index: &Expr) -> String {
    index
        .to_infix()
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| {
            if c.is_alphanumeric() || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::normalize;
    use crate::parser::{BinOp, CmpOp};
    use crate::unroll::{self, BoundMap};

    fn ssa_of(text: &str) -> SsaProgram {
        convert(&normalize(text)).unwrap()
    }

    /// Concrete value for the definition evaluator
    #[derive(Debug, Clone, Copy, PartialEq)]
    enum Val {
        Int(i64),
        Bool(bool),
    }

    /// Evaluate every definition in order under the given integer inputs
    fn eval_defs(program: &SsaProgram, inputs: &[(&str, i64)]) -> HashMap<String, Val> {
        let mut env: HashMap<String, Val> = inputs
            .iter()
            .map(|(name, value)| (name.to_string(), Val::Int(*value)))
            .collect();
        for line in &program.lines {
            if let SsaLine::Def { name, rhs } = line {
                let value = eval_expr(rhs, &env);
                env.insert(name.clone(), value);
            }
        }
        env
    }

    fn eval_expr(expr: &Expr, env: &HashMap<String, Val>) -> Val {
        match expr {
            Expr::Integer(n) => Val::Int(*n),
            Expr::Boolean(b) => Val::Bool(*b),
            Expr::Variable(name) => *env
                .get(name)
                .unwrap_or_else(|| panic!("unbound name '{}'", name)),
            Expr::ArrayAccess { base, .. } => panic!("array '{}' not evaluated", base),
            Expr::BinaryOp { op, left, right } => {
                let (Val::Int(l), Val::Int(r)) = (eval_expr(left, env), eval_expr(right, env))
                else {
                    panic!("arithmetic on booleans")
                };
                Val::Int(match op {
                    BinOp::Add => l + r,
                    BinOp::Sub => l - r,
                    BinOp::Mul => l * r,
                    BinOp::Div => l / r,
                    BinOp::Mod => l % r,
                })
            }
            Expr::Compare { op, left, right } => {
                let (Val::Int(l), Val::Int(r)) = (eval_expr(left, env), eval_expr(right, env))
                else {
                    panic!("comparison on booleans")
                };
                Val::Bool(match op {
                    CmpOp::Eq => l == r,
                    CmpOp::Ne => l != r,
                    CmpOp::Lt => l < r,
                    CmpOp::Le => l <= r,
                    CmpOp::Gt => l > r,
                    CmpOp::Ge => l >= r,
                })
            }
            Expr::Ternary {
                cond,
                then_value,
                else_value,
            } => {
                let Val::Bool(taken) = eval_expr(cond, env) else {
                    panic!("non-boolean selector")
                };
                if taken {
                    eval_expr(then_value, env)
                } else {
                    eval_expr(else_value, env)
                }
            }
        }
    }

    /// The final SSA name of a scalar, from the conversion's version table
    fn final_name_of(program: &SsaProgram, scalar: &str) -> String {
        program
            .final_versions
            .iter()
            .find_map(|(key, name)| match key {
                VarKey::Scalar(n) if n == scalar => Some(name.clone()),
                _ => None,
            })
            .unwrap_or_else(|| panic!("'{}' has no final version", scalar))
    }

    #[test]
    fn test_if_else_merges_with_guard() {
        let program = ssa_of(
            "x := 3;\n\
             if (x < 5) {\n\
             y := x + 1;\n\
             } else {\n\
             y := x - 1;\n\
             }\n\
             assert(y > 0);",
        );
        assert_eq!(
            program.render(),
            "x_1 = 3\n\
             φ1 = x_1 < 5\n\
             y_1 = x_1 + 1\n\
             y_2 = x_1 - 1\n\
             y_3 = (φ1 ? y_1 : y_2)\n\
             assert(y_3 > 0);"
        );
    }

    #[test]
    fn test_unrolled_while_merges_outward() {
        let lines = normalize("x := 0;\nwhile (x < 4) {\nx := x + 1;\n}\nassert(x == 4);");
        let unrolled = unroll::unroll(&lines, &BoundMap::from_counts(&[2])).unwrap();
        let program = convert(&unrolled.code_lines()).unwrap();
        assert_eq!(
            program.render(),
            "x_1 = 0\n\
             φ1 = x_1 < 4\n\
             x_2 = x_1 + 1\n\
             φ2 = x_2 < 4\n\
             x_3 = x_2 + 1\n\
             x_4 = (φ2 ? x_3 : x_2)\n\
             x_5 = (φ1 ? x_4 : x_1)\n\
             assert(x_5 == 4);"
        );
    }

    #[test]
    fn test_single_definition_invariant() {
        let lines = normalize("x := 0;\nwhile (x < 4) {\nx := x + 1;\n}\nassert(x == 4);");
        let unrolled = unroll::unroll(&lines, &BoundMap::from_counts(&[4])).unwrap();
        let program = convert(&unrolled.code_lines()).unwrap();
        let names = program.def_names();
        let unique: HashSet<&&str> = names.iter().collect();
        assert_eq!(unique.len(), names.len());
    }

    #[test]
    fn test_array_cells_version_independently() {
        let program = ssa_of(
            "temp := arr[j];\n\
             arr[j] := arr[j+1];\n\
             arr[j+1] := temp;",
        );
        assert_eq!(
            program.render(),
            "temp_1 = arr[j]\n\
             arr_j_1 = arr[j + 1]\n\
             arr_j_1_1 = temp_1"
        );
    }

    #[test]
    fn test_virgin_cell_fallback_reads_the_array() {
        let program = ssa_of(
            "if (arr[i] > max) {\n\
             arr[i] := max;\n\
             }\n\
             assert(arr[i] <= max);",
        );
        // The cell was written only under the guard, so the merge falls back
        // to the original array content
        assert_eq!(
            program.render(),
            "φ1 = arr[i] > max\n\
             arr_i_1 = max\n\
             arr_i_2 = (φ1 ? arr_i_1 : arr[i])\n\
             assert(arr_i_2 <= max);"
        );
    }

    #[test]
    fn test_scalar_written_in_one_arm_keeps_its_version() {
        let program = ssa_of(
            "if (c > 0) {\n\
             y := 1;\n\
             }\n\
             assert(y > 0);",
        );
        // No pre-branch version and no else arm: nothing to merge against
        assert_eq!(
            program.render(),
            "φ1 = c > 0\n\
             y_1 = 1\n\
             assert(y_1 > 0);"
        );
    }

    #[test]
    fn test_else_if_chain_uses_classical_guard_order() {
        let program = ssa_of(
            "x := 0;\n\
             if (a > 0) {\n\
             x := 1;\n\
             } else if (b > 0) {\n\
             x := 2;\n\
             } else {\n\
             x := 3;\n\
             }\n\
             assert(x > 0);",
        );
        assert_eq!(
            program.render(),
            "x_1 = 0\n\
             φ1 = a > 0\n\
             x_2 = 1\n\
             φ2 = b > 0\n\
             x_3 = 2\n\
             x_4 = 3\n\
             x_5 = (φ1 ? x_2 : (φ2 ? x_3 : x_4))\n\
             assert(x_5 > 0);"
        );
    }

    const WIDE_CHAIN: &str = "x := 0;\n\
                              if (a > 0) {\n\
                              x := 1;\n\
                              } else if (b > 0) {\n\
                              x := 2;\n\
                              } else if (c > 0) {\n\
                              x := 3;\n\
                              } else if (d > 0) {\n\
                              x := 4;\n\
                              }\n\
                              assert(x >= 0);";

    #[test]
    fn test_wide_chain_splits_tail_into_own_definition() {
        let program = ssa_of(WIDE_CHAIN);
        // Five candidates (four arms plus the pre-branch fallback): the tail
        // half becomes its own definition, the head guards fold over it
        let rendered = program.render();
        assert!(rendered.contains("x_6 = (φ3 ? x_4 : (φ4 ? x_5 : x_1))"));
        assert!(rendered.contains("x_7 = (φ1 ? x_2 : (φ2 ? x_3 : x_6))"));
        assert!(rendered.contains("assert(x_7 >= 0);"));
    }

    #[test]
    fn test_wide_chain_merge_evaluates_with_guard_priority() {
        let program = ssa_of(WIDE_CHAIN);
        let final_x = final_name_of(&program, "x");
        // The first true guard must win on every input combination
        for a in [0i64, 1] {
            for b in [0i64, 1] {
                for c in [0i64, 1] {
                    for d in [0i64, 1] {
                        let expected = if a > 0 {
                            1
                        } else if b > 0 {
                            2
                        } else if c > 0 {
                            3
                        } else if d > 0 {
                            4
                        } else {
                            0
                        };
                        let env = eval_defs(&program, &[("a", a), ("b", b), ("c", c), ("d", d)]);
                        assert_eq!(
                            env[&final_x],
                            Val::Int(expected),
                            "wrong merge for a={} b={} c={} d={}",
                            a,
                            b,
                            c,
                            d
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn test_nested_branches_are_supported() {
        let program = ssa_of(
            "x := 0;\n\
             if (a > 0) {\n\
             if (b > 0) {\n\
             x := 1;\n\
             }\n\
             }\n\
             assert(x >= 0);",
        );
        assert_eq!(
            program.render(),
            "x_1 = 0\n\
             φ1 = a > 0\n\
             φ2 = b > 0\n\
             x_2 = 1\n\
             x_3 = (φ2 ? x_2 : x_1)\n\
             x_4 = (φ1 ? x_3 : x_1)\n\
             assert(x_4 >= 0);"
        );
    }

    #[test]
    fn test_duplicate_finals_are_suppressed() {
        let program = ssa_of("x := 1;\nassert(x > 0);\nassert(x > 0);");
        assert_eq!(program.render(), "x_1 = 1\nassert(x_1 > 0);");
    }

    #[test]
    fn test_assume_is_kept_as_final() {
        let program = ssa_of("x := n + 1;\nassume(n > 0);\nassert(x > 1);");
        let rendered = program.render();
        assert!(rendered.contains("assume(n > 0);"));
        assert!(rendered.contains("assert(x_1 > 1);"));
    }

    #[test]
    fn test_stray_close_fails() {
        let err = convert(&normalize("x := 1;\n}")).unwrap_err();
        assert!(matches!(err, TransformError::UnsupportedControlFlow { .. }));
    }

    #[test]
    fn test_leftover_loop_fails() {
        let err = convert(&normalize("while (x < 4) {\nx := x + 1;\n}")).unwrap_err();
        assert!(matches!(err, TransformError::UnsupportedControlFlow { .. }));
    }

    #[test]
    fn test_unknown_call_is_malformed_assertion() {
        let err = convert(&normalize("x := 1;\nprint(x);")).unwrap_err();
        assert!(matches!(err, TransformError::MalformedAssertion { .. }));
    }

    #[test]
    fn test_idempotence_no_new_merges() {
        let first = ssa_of(
            "x := 3;\n\
             if (x < 5) {\n\
             y := x + 1;\n\
             } else {\n\
             y := x - 1;\n\
             }\n\
             assert(y > 0);",
        );
        let second = convert(&normalize(&first.render())).unwrap();
        // Re-versioned guard definitions survive, but no merge produces a
        // new one
        assert_eq!(second.guard_count(), first.guard_count());
        assert_eq!(second.lines.len(), first.lines.len());
    }
}
