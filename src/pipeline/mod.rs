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

//! End-to-end verification pipeline
//!
//! Integrates all phases from source text to solver verdict: normalize,
//! collect loops, elicit bounds, unroll, convert to single-assignment form,
//! emit the constraint script, and drive the decision procedure. Equivalence
//! mode runs the pipeline on two programs; the legacy check compares
//! satisfiability, the strict check proves output equality on shared inputs.

use crate::error::{ErrorKind, VerifierError};
use crate::lexer;
use crate::smt::{self, SmtScript};
use crate::solver::{Model, Outcome, SatStatus, SmtBackend, SolverDriver, Z3Process};
use crate::ssa::{self, SsaLine, SsaProgram};
use crate::unroll::{self, BoundMap, CollectedLoop};
use serde::Serialize;
use std::collections::HashSet;

/// Verification options
#[derive(Debug, Clone)]
pub struct VerifyOptions {
    /// Solver binary to invoke
    pub z3_command: String,
    /// Counterexamples harvested per falsified goal
    pub max_counterexamples: usize,
    /// Run the product-program equivalence proof in addition to the
    /// satisfiability comparison
    pub strict_equivalence: bool,
    /// Print phase progress
    pub verbose: bool,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self {
            z3_command: "z3".to_string(),
            max_counterexamples: 2,
            strict_equivalence: false,
            verbose: false,
        }
    }
}

/// Supplies unroll bounds for the collected loops
///
/// The collaborator is free to prompt the user; the bound map is keyed by
/// loop occurrence.
pub trait UnrollOracle {
    fn bounds(&mut self, loops: &[CollectedLoop]) -> Result<BoundMap, VerifierError>;
}

/// A fixed bound map is its own oracle
impl UnrollOracle for BoundMap {
    fn bounds(&mut self, _loops: &[CollectedLoop]) -> Result<BoundMap, VerifierError> {
        Ok(self.clone())
    }
}

/// Verdict for a single program
#[derive(Debug, Clone, Serialize)]
pub enum Verdict {
    Satisfied { model: Model },
    Falsifiable { counterexamples: Vec<Model> },
    Unknown,
    Error { kind: ErrorKind, message: String },
}

impl Verdict {
    /// Satisfiability of the original query, when the solver decided it
    pub fn satisfiable(&self) -> Option<bool> {
        match self {
            Verdict::Satisfied { .. } => Some(true),
            Verdict::Falsifiable { .. } => Some(false),
            Verdict::Unknown | Verdict::Error { .. } => None,
        }
    }
}

/// The four output sinks of the collaborator contract
#[derive(Debug, Clone, Default, Serialize)]
pub struct Sections {
    pub unrolled: String,
    pub ssa: String,
    pub analysis: String,
    pub smt: String,
}

/// Result of verifying one program
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub verdict: Verdict,
    pub sections: Sections,
}

/// Verdict for equivalence mode
#[derive(Debug, Clone, Serialize)]
pub enum EquivVerdict {
    Equivalent,
    NotEquivalent,
    Unknown,
    Error { kind: ErrorKind, message: String },
}

/// Result of comparing two programs
#[derive(Debug, Clone, Serialize)]
pub struct EquivReport {
    pub verdict: EquivVerdict,
    pub summary: String,
    pub first: Report,
    pub second: Report,
    /// Script of the strict product check, when it ran
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_smt: Option<String>,
}

/// Main verification pipeline
pub struct VerificationPipeline<B: SmtBackend> {
    options: VerifyOptions,
    backend: B,
}

impl VerificationPipeline<Z3Process> {
    /// Pipeline over the external solver named in the options
    pub fn new(options: VerifyOptions) -> Self {
        let backend = Z3Process::new(options.z3_command.clone());
        Self { options, backend }
    }
}

impl<B: SmtBackend> VerificationPipeline<B> {
    /// Pipeline over a caller-supplied backend
    pub fn with_backend(options: VerifyOptions, backend: B) -> Self {
        Self { options, backend }
    }

    /// Verify that the program's assertion is satisfiable, reporting the
    /// model or counterexamples
    pub fn verify(&mut self, source: &str, oracle: &mut dyn UnrollOracle) -> Report {
        let mut sections = Sections::default();
        match self.run(source, oracle, &mut sections) {
            Ok(verdict) => Report { verdict, sections },
            Err(error) => {
                let kind = error.kind();
                let message = error.to_string();
                sections.analysis =
                    format!("=== Z3 ANALYSIS RESULTS ===\nError [{}]: {}", kind, message);
                Report {
                    verdict: Verdict::Error { kind, message },
                    sections,
                }
            }
        }
    }

    fn run(
        &mut self,
        source: &str,
        oracle: &mut dyn UnrollOracle,
        sections: &mut Sections,
    ) -> Result<Verdict, VerifierError> {
        let (_, script) = self.transform(source, oracle, sections)?;

        if self.options.verbose {
            println!("Phase 4: Querying the solver...");
        }
        let outcome = SolverDriver::new(&mut self.backend)
            .max_counterexamples(self.options.max_counterexamples)
            .analyze(&script)?;
        let (verdict, analysis) = describe_outcome(outcome);
        sections.analysis = format!("=== Z3 ANALYSIS RESULTS ===\n{}", analysis);
        Ok(verdict)
    }

    /// Phases A through F: text to SSA program and constraint script
    fn transform(
        &mut self,
        source: &str,
        oracle: &mut dyn UnrollOracle,
        sections: &mut Sections,
    ) -> Result<(SsaProgram, SmtScript), VerifierError> {
        if self.options.verbose {
            println!("Phase 1: Collecting and unrolling loops...");
        }
        let lines = lexer::normalize(source);
        let loops = unroll::collect_loops(&lines).map_err(VerifierError::from)?;
        let bounds = oracle.bounds(&loops)?;
        let unrolled = unroll::unroll(&lines, &bounds).map_err(VerifierError::from)?;
        sections.unrolled = format!(
            "=== CODE AFTER LOOP UNROLLING ===\n{}",
            unrolled.lines.join("\n")
        );

        if self.options.verbose {
            println!("Phase 2: Converting to single-assignment form...");
        }
        let program = ssa::convert(&unrolled.code_lines()).map_err(VerifierError::from)?;
        sections.ssa = format!("=== SSA FORM ===\n{}", program.render());

        if self.options.verbose {
            println!("Phase 3: Emitting the constraint script...");
        }
        let script = smt::emit(&program);
        sections.smt = script.script();
        Ok((program, script))
    }

    /// Legacy equivalence: both programs yield the same satisfiability
    /// result. A weak witness of semantic similarity, not a proof.
    pub fn equivalence(
        &mut self,
        first_source: &str,
        second_source: &str,
        first_oracle: &mut dyn UnrollOracle,
        second_oracle: &mut dyn UnrollOracle,
    ) -> EquivReport {
        let first = self.verify(first_source, first_oracle);
        let second = self.verify(second_source, second_oracle);

        let (verdict, mut summary) = compare_verdicts(&first.verdict, &second.verdict);
        let mut product_smt = None;

        if self.options.strict_equivalence && !matches!(verdict, EquivVerdict::Error { .. }) {
            match self.product_check(first_source, second_source, first_oracle, second_oracle)
            {
                Ok((strict_verdict, strict_summary, script_text)) => {
                    summary = format!("{}\n{}", summary, strict_summary);
                    product_smt = Some(script_text);
                    return EquivReport {
                        verdict: strict_verdict,
                        summary,
                        first,
                        second,
                        product_smt,
                    };
                }
                Err(error) => {
                    summary = format!(
                        "{}\nStrict check failed [{}]: {}",
                        summary,
                        error.kind(),
                        error
                    );
                }
            }
        }

        EquivReport {
            verdict,
            summary,
            first,
            second,
            product_smt,
        }
    }

    /// Strict equivalence: emit both SSA programs into one script with
    /// shared inputs, and ask the solver for an assignment on which their
    /// common outputs differ. Unsatisfiable means proved equivalent.
    fn product_check(
        &mut self,
        first_source: &str,
        second_source: &str,
        first_oracle: &mut dyn UnrollOracle,
        second_oracle: &mut dyn UnrollOracle,
    ) -> Result<(EquivVerdict, String, String), VerifierError> {
        let mut scratch = Sections::default();
        let (first_ssa, _) = self.transform(first_source, first_oracle, &mut scratch)?;
        let (second_ssa, _) = self.transform(second_source, second_oracle, &mut scratch)?;

        let first_tagged = tag_program(&first_ssa, "1");
        let second_tagged = tag_program(&second_ssa, "2");

        let mut combined = SsaProgram::default();
        combined.lines.extend(first_tagged.lines);
        combined.lines.extend(second_tagged.lines);

        // Common outputs, compared at their final versions
        let second_finals: std::collections::HashMap<_, _> =
            second_ssa.final_versions.iter().cloned().collect();
        let mut equalities = Vec::new();
        for (key, first_name) in &first_ssa.final_versions {
            if let Some(second_name) = second_finals.get(key) {
                equalities.push(format!(
                    "(= {} {})",
                    smt::smt_name(&tag_name(first_name, "1")),
                    smt::smt_name(&tag_name(second_name, "2")),
                ));
            }
        }

        let mut script = smt::emit(&combined);
        let goal = match equalities.len() {
            0 => "true".to_string(),
            1 => equalities[0].clone(),
            _ => format!("(and {})", equalities.join(" ")),
        };
        script.assertions.push(goal);
        script.goal = Some(script.assertions.len() - 1);

        let negated = script
            .negated(&[])
            .ok_or_else(|| VerifierError::InternalInvariantViolated {
                message: "product script lost its goal".to_string(),
            })?;
        let response = self.backend.check(&negated).map_err(VerifierError::from)?;

        let (verdict, mut summary) = match response.status {
            SatStatus::Unsat => (
                EquivVerdict::Equivalent,
                "Strict check: programs proved equivalent on all shared inputs \
                 (distinguishing query unsatisfiable)."
                    .to_string(),
            ),
            SatStatus::Sat => {
                let model = response.model.unwrap_or_default();
                let mut text = "Strict check: programs are NOT equivalent. \
                                Distinguishing assignment:"
                    .to_string();
                if !model.is_empty() {
                    text = format!("{}\n{}", text, model.render("  "));
                }
                (EquivVerdict::NotEquivalent, text)
            }
            SatStatus::Unknown => (
                EquivVerdict::Unknown,
                "Strict check: solver returned unknown.".to_string(),
            ),
        };
        if equalities.is_empty() {
            summary = format!("{}\n(The programs share no written names to compare.)", summary);
        }
        Ok((verdict, summary, negated))
    }
}

/// Map the driver outcome to a verdict and the analysis pane text
fn describe_outcome(outcome: Outcome) -> (Verdict, String) {
    match outcome {
        Outcome::Satisfied { model, goal_holds } => {
            let mut text = "Satisfiable. Model where assertions hold:".to_string();
            if !model.is_empty() {
                text = format!("{}\n{}", text, model.render("  "));
            }
            match goal_holds {
                Some(true) => {
                    text = format!(
                        "{}\nThe goal assertion holds on every input \
                         (negated goal is unsatisfiable).",
                        text
                    );
                }
                Some(false) => {
                    text = format!(
                        "{}\nThe goal assertion can fail for some inputs \
                         (negated goal is satisfiable).",
                        text
                    );
                }
                None => {}
            }
            (Verdict::Satisfied { model }, text)
        }
        Outcome::Falsifiable { counterexamples } => {
            let text = if counterexamples.is_empty() {
                "Unsatisfiable. No counterexamples found.".to_string()
            } else {
                let mut text =
                    "Unsatisfiable. Counterexamples where assertions fail:".to_string();
                for (i, model) in counterexamples.iter().enumerate() {
                    text = format!("{}\nCounterexample {}:\n{}", text, i + 1, model.render("  "));
                }
                text
            };
            (Verdict::Falsifiable { counterexamples }, text)
        }
        Outcome::Unknown => (Verdict::Unknown, "Unknown result from solver.".to_string()),
    }
}

/// The legacy same-satisfiability comparison with its summary text
fn compare_verdicts(first: &Verdict, second: &Verdict) -> (EquivVerdict, String) {
    if let Verdict::Error { kind, message } = first {
        return (
            EquivVerdict::Error {
                kind: *kind,
                message: message.clone(),
            },
            format!("=== SUMMARY ===\nProgram 1 failed [{}]: {}", kind, message),
        );
    }
    if let Verdict::Error { kind, message } = second {
        return (
            EquivVerdict::Error {
                kind: *kind,
                message: message.clone(),
            },
            format!("=== SUMMARY ===\nProgram 2 failed [{}]: {}", kind, message),
        );
    }
    match (first.satisfiable(), second.satisfiable()) {
        (Some(a), Some(b)) if a == b => (
            EquivVerdict::Equivalent,
            "=== SUMMARY ===\nPrograms may be equivalent (same satisfiability).\n\
             Note: this compares satisfiability only; it is not an equivalence proof."
                .to_string(),
        ),
        (Some(_), Some(_)) => (
            EquivVerdict::NotEquivalent,
            "=== SUMMARY ===\nPrograms are NOT equivalent (different satisfiability)."
                .to_string(),
        ),
        _ => (
            EquivVerdict::Unknown,
            "=== SUMMARY ===\nSolver returned unknown; equivalence undetermined.".to_string(),
        ),
    }
}

/// Suffix every defined name of a program so two programs can share one
/// script; free inputs keep their names and are therefore shared
fn tag_program(program: &SsaProgram, tag: &str) -> SsaProgram {
    let defined: HashSet<String> = program
        .lines
        .iter()
        .filter_map(|line| match line {
            SsaLine::Def { name, .. } => Some(name.clone()),
            SsaLine::Final { .. } => None,
        })
        .collect();

    let lines = program
        .lines
        .iter()
        .filter_map(|line| match line {
            SsaLine::Def { name, rhs } => Some(SsaLine::Def {
                name: tag_name(name, tag),
                rhs: rename_defined(rhs, &defined, tag),
            }),
            SsaLine::Final { call, arg } => {
                // Each program's own goal must not constrain the product;
                // assumptions do
                if call == "assume" {
                    Some(SsaLine::Final {
                        call: call.clone(),
                        arg: rename_defined(arg, &defined, tag),
                    })
                } else {
                    None
                }
            }
        })
        .collect();

    SsaProgram {
        lines,
        final_versions: Vec::new(),
    }
}

fn tag_name(name: &str, tag: &str) -> String {
    format!("{}!{}", name, tag)
}

fn rename_defined(
    expr: &crate::parser::Expr,
    defined: &HashSet<String>,
    tag: &str,
) -> crate::parser::Expr {
    use crate::parser::Expr;
    match expr {
        Expr::Integer(_) | Expr::Boolean(_) => expr.clone(),
        Expr::Variable(name) => {
            if defined.contains(name) {
                Expr::Variable(tag_name(name, tag))
            } else {
                expr.clone()
            }
        }
        Expr::ArrayAccess { base, index } => Expr::ArrayAccess {
            base: base.clone(),
            index: Box::new(rename_defined(index, defined, tag)),
        },
        Expr::BinaryOp { op, left, right } => Expr::BinaryOp {
            op: *op,
            left: Box::new(rename_defined(left, defined, tag)),
            right: Box::new(rename_defined(right, defined, tag)),
        },
        Expr::Compare { op, left, right } => Expr::Compare {
            op: *op,
            left: Box::new(rename_defined(left, defined, tag)),
            right: Box::new(rename_defined(right, defined, tag)),
        },
        Expr::Ternary {
            cond,
            then_value,
            else_value,
        } => Expr::Ternary {
            cond: Box::new(rename_defined(cond, defined, tag)),
            then_value: Box::new(rename_defined(then_value, defined, tag)),
            else_value: Box::new(rename_defined(else_value, defined, tag)),
        },
    }
}
