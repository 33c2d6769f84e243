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

//! Solver driver
//!
//! Submits scripts to an external SMT decision procedure and interprets the
//! verdict. On SAT the driver also probes the negated goal to learn whether
//! the assertion is valid; on UNSAT it flips the goal and enumerates up to
//! two distinct counterexamples, blocking each model before the next query.

use crate::error::SolverError;
use crate::smt::SmtScript;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::io::Write;
use std::process::{Command, Stdio};

/// Raw satisfiability answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SatStatus {
    Sat,
    Unsat,
    Unknown,
}

/// A value bound in a solver model
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum SolverValue {
    Int(i64),
    Bool(bool),
    /// Uninterpreted values such as array witnesses, kept as text
    Opaque(String),
}

impl std::fmt::Display for SolverValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SolverValue::Int(n) => write!(f, "{}", n),
            SolverValue::Bool(b) => write!(f, "{}", b),
            SolverValue::Opaque(text) => write!(f, "{}", text),
        }
    }
}

/// Constant bindings extracted from `(get-model)`
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Model {
    pub bindings: BTreeMap<String, SolverValue>,
}

impl Model {
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// One `name = value` line per binding, sorted
    pub fn render(&self, indent: &str) -> String {
        self.bindings
            .iter()
            .map(|(name, value)| format!("{}{} = {}", indent, name, value))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// One solver answer
#[derive(Debug, Clone)]
pub struct SolverResponse {
    pub status: SatStatus,
    pub model: Option<Model>,
}

impl SolverResponse {
    pub fn sat(model: Model) -> Self {
        Self {
            status: SatStatus::Sat,
            model: Some(model),
        }
    }

    pub fn unsat() -> Self {
        Self {
            status: SatStatus::Unsat,
            model: None,
        }
    }

    pub fn unknown() -> Self {
        Self {
            status: SatStatus::Unknown,
            model: None,
        }
    }
}

/// The seam between the verifier and the decision procedure
pub trait SmtBackend {
    fn check(&mut self, script: &str) -> Result<SolverResponse, SolverError>;
}

/// Backend that drives an external `z3` binary over stdin/stdout
pub struct Z3Process {
    command: String,
}

impl Z3Process {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    /// Whether the solver binary can be launched at all
    pub fn available(&self) -> bool {
        Command::new(&self.command)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false)
    }
}

impl SmtBackend for Z3Process {
    fn check(&mut self, script: &str) -> Result<SolverResponse, SolverError> {
        let mut child = Command::new(&self.command)
            .arg("-in")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| SolverError::Launch {
                command: self.command.clone(),
                message: e.to_string(),
            })?;

        let mut stdin = child.stdin.take().ok_or_else(|| SolverError::Io {
            message: "solver stdin unavailable".to_string(),
        })?;
        stdin
            .write_all(script.as_bytes())
            .and_then(|_| stdin.write_all(b"\n"))
            .map_err(|e| SolverError::Io {
                message: e.to_string(),
            })?;
        drop(stdin);

        let output = child.wait_with_output().map_err(|e| SolverError::Io {
            message: e.to_string(),
        })?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_solver_output(&stdout).map_err(|e| match e {
            SolverError::Protocol { message } => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                SolverError::Protocol {
                    message: if stderr.trim().is_empty() {
                        message
                    } else {
                        format!("{} (stderr: {})", message, stderr.trim())
                    },
                }
            }
            other => other,
        })
    }
}

/// Deterministic backend replaying canned responses; records every script it
/// receives. Used by tests and dry runs.
#[derive(Default)]
pub struct ScriptedBackend {
    responses: VecDeque<SolverResponse>,
    pub submissions: Vec<String>,
}

impl ScriptedBackend {
    pub fn new(responses: Vec<SolverResponse>) -> Self {
        Self {
            responses: responses.into(),
            submissions: Vec::new(),
        }
    }
}

impl SmtBackend for ScriptedBackend {
    fn check(&mut self, script: &str) -> Result<SolverResponse, SolverError> {
        self.submissions.push(script.to_string());
        self.responses.pop_front().ok_or(SolverError::Protocol {
            message: "no scripted response left".to_string(),
        })
    }
}

/// Interpret the solver's textual answer
fn parse_solver_output(stdout: &str) -> Result<SolverResponse, SolverError> {
    let mut lines = stdout.lines();
    let status = loop {
        match lines.next() {
            Some(line) => match line.trim() {
                "sat" => break SatStatus::Sat,
                "unsat" => break SatStatus::Unsat,
                "unknown" => break SatStatus::Unknown,
                _ => continue,
            },
            None => {
                return Err(SolverError::Protocol {
                    message: format!(
                        "no sat/unsat/unknown answer in solver output: {}",
                        stdout.trim()
                    ),
                })
            }
        }
    };

    let model = if status == SatStatus::Sat {
        let rest: String = lines.collect::<Vec<_>>().join("\n");
        Some(parse_model(&rest)?)
    } else {
        None
    };
    Ok(SolverResponse { status, model })
}

/// S-expression shape of the model printer's output
#[derive(Debug, Clone, PartialEq)]
enum Sexpr {
    Atom(String),
    List(Vec<Sexpr>),
}

impl Sexpr {
    fn render(&self) -> String {
        match self {
            Sexpr::Atom(a) => a.clone(),
            Sexpr::List(items) => format!(
                "({})",
                items
                    .iter()
                    .map(Sexpr::render)
                    .collect::<Vec<_>>()
                    .join(" ")
            ),
        }
    }
}

fn tokenize_sexprs(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '(' | ')' => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
                tokens.push(c.to_string());
            }
            '"' => {
                // String literal, kept as one atom
                current.push(c);
                for s in chars.by_ref() {
                    current.push(s);
                    if s == '"' {
                        break;
                    }
                }
                tokens.push(std::mem::take(&mut current));
            }
            c if c.is_whitespace() => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            _ => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

fn parse_sexprs(text: &str) -> Result<Vec<Sexpr>, SolverError> {
    let tokens = tokenize_sexprs(text);
    let mut stack: Vec<Vec<Sexpr>> = vec![Vec::new()];
    for token in tokens {
        match token.as_str() {
            "(" => stack.push(Vec::new()),
            ")" => {
                let list = stack.pop().ok_or_else(|| SolverError::Protocol {
                    message: "unbalanced ')' in solver model".to_string(),
                })?;
                stack
                    .last_mut()
                    .ok_or_else(|| SolverError::Protocol {
                        message: "unbalanced ')' in solver model".to_string(),
                    })?
                    .push(Sexpr::List(list));
            }
            _ => stack
                .last_mut()
                .expect("stack is never empty here")
                .push(Sexpr::Atom(token)),
        }
    }
    if stack.len() != 1 {
        return Err(SolverError::Protocol {
            message: "unbalanced '(' in solver model".to_string(),
        });
    }
    Ok(stack.pop().expect("length checked"))
}

/// Extract nullary `define-fun` bindings from the model block
fn parse_model(text: &str) -> Result<Model, SolverError> {
    // The model printer annotates uninterpreted-sort universes with `;;`
    // comment lines
    let text: String = text
        .lines()
        .filter(|line| !line.trim_start().starts_with(';'))
        .collect::<Vec<_>>()
        .join("\n");
    let items = parse_sexprs(&text)?;
    let mut model = Model::default();
    collect_define_funs(&items, &mut model);
    Ok(model)
}

fn collect_define_funs(items: &[Sexpr], model: &mut Model) {
    for item in items {
        if let Sexpr::List(parts) = item {
            match parts.first() {
                Some(Sexpr::Atom(head)) if head == "define-fun" => {
                    if let (
                        Some(Sexpr::Atom(name)),
                        Some(Sexpr::List(params)),
                        Some(value),
                    ) = (parts.get(1), parts.get(2), parts.last())
                    {
                        // Function interpretations (e.g. select) are skipped
                        if params.is_empty() && parts.len() >= 5 {
                            model
                                .bindings
                                .insert(name.clone(), value_of(value));
                        }
                    }
                }
                // Older printers wrap the definitions in (model …)
                _ => collect_define_funs(parts, model),
            }
        }
    }
}

fn value_of(value: &Sexpr) -> SolverValue {
    match value {
        Sexpr::Atom(atom) => {
            if let Ok(n) = atom.parse::<i64>() {
                SolverValue::Int(n)
            } else if atom == "true" {
                SolverValue::Bool(true)
            } else if atom == "false" {
                SolverValue::Bool(false)
            } else {
                SolverValue::Opaque(atom.clone())
            }
        }
        Sexpr::List(parts) => {
            if let [Sexpr::Atom(minus), Sexpr::Atom(n)] = parts.as_slice() {
                if minus == "-" {
                    if let Ok(n) = n.parse::<i64>() {
                        return SolverValue::Int(-n);
                    }
                }
            }
            SolverValue::Opaque(value.render())
        }
    }
}

/// Driver outcome, before the pipeline maps it to a verdict
#[derive(Debug, Clone)]
pub enum Outcome {
    Satisfied {
        model: Model,
        /// Result of the negated-goal probe: `Some(true)` means the goal
        /// assertion holds for every input
        goal_holds: Option<bool>,
    },
    Falsifiable {
        counterexamples: Vec<Model>,
    },
    Unknown,
}

/// Runs the original and negated-goal queries against a backend
pub struct SolverDriver<'a, B: SmtBackend> {
    backend: &'a mut B,
    max_counterexamples: usize,
}

impl<'a, B: SmtBackend> SolverDriver<'a, B> {
    pub fn new(backend: &'a mut B) -> Self {
        Self {
            backend,
            max_counterexamples: 2,
        }
    }

    pub fn max_counterexamples(mut self, n: usize) -> Self {
        self.max_counterexamples = n;
        self
    }

    pub fn analyze(&mut self, script: &SmtScript) -> Result<Outcome, SolverError> {
        let response = self.backend.check(&script.script())?;
        match response.status {
            SatStatus::Sat => {
                let model = response.model.unwrap_or_default();
                let goal_holds = match script.negated(&[]) {
                    Some(negated) => {
                        Some(self.backend.check(&negated)?.status == SatStatus::Unsat)
                    }
                    None => None,
                };
                Ok(Outcome::Satisfied { model, goal_holds })
            }
            SatStatus::Unsat => {
                let mut counterexamples = Vec::new();
                if script.goal.is_some() {
                    let mut blocks: Vec<String> = Vec::new();
                    while counterexamples.len() < self.max_counterexamples {
                        let negated = script
                            .negated(&blocks)
                            .expect("goal presence checked above");
                        let response = self.backend.check(&negated)?;
                        if response.status != SatStatus::Sat {
                            break;
                        }
                        let model = response.model.unwrap_or_default();
                        let block = blocking_clause(&model);
                        counterexamples.push(model);
                        match block {
                            Some(block) => blocks.push(block),
                            // Nothing concrete to block on; a repeat query
                            // would return the same model
                            None => break,
                        }
                    }
                }
                Ok(Outcome::Falsifiable { counterexamples })
            }
            SatStatus::Unknown => Ok(Outcome::Unknown),
        }
    }
}

/// Negated conjunction of a model's scalar assignments
fn blocking_clause(model: &Model) -> Option<String> {
    let terms: Vec<String> = model
        .bindings
        .iter()
        .filter_map(|(name, value)| match value {
            SolverValue::Int(n) => {
                let literal = if *n < 0 {
                    format!("(- {})", n.unsigned_abs())
                } else {
                    n.to_string()
                };
                Some(format!("(= {} {})", name, literal))
            }
            SolverValue::Bool(b) => Some(format!("(= {} {})", name, b)),
            SolverValue::Opaque(_) => None,
        })
        .collect();
    match terms.len() {
        0 => None,
        1 => Some(format!("(not {})", terms[0])),
        _ => Some(format!("(not (and {}))", terms.join(" "))),
    }
}
