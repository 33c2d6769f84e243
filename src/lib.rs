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

//! Attest verifier library
//!
//! A bounded program verifier for a small imperative language. Programs are
//! reduced to quantifier-free constraints over integers and integer arrays
//! by loop unrolling, single-assignment conversion and SMT-LIB emission,
//! then discharged on an external decision procedure.

pub mod error;
pub mod lexer;
pub mod parser;
pub mod pipeline;
pub mod smt;
pub mod solver;
pub mod ssa;
pub mod unroll;

use crate::pipeline::{EquivReport, Report, UnrollOracle, VerificationPipeline, VerifyOptions};

/// The main verifier interface
pub struct Verifier {
    options: VerifyOptions,
}

impl Verifier {
    /// Create a verifier with default options
    pub fn new() -> Self {
        Self {
            options: VerifyOptions::default(),
        }
    }

    /// Create a verifier with custom options
    pub fn with_options(options: VerifyOptions) -> Self {
        Self { options }
    }

    /// Solver binary to invoke
    pub fn z3_command(mut self, command: impl Into<String>) -> Self {
        self.options.z3_command = command.into();
        self
    }

    /// Counterexamples harvested per falsified goal
    pub fn max_counterexamples(mut self, n: usize) -> Self {
        self.options.max_counterexamples = n;
        self
    }

    /// Run the product-program proof in equivalence mode
    pub fn strict_equivalence(mut self, enable: bool) -> Self {
        self.options.strict_equivalence = enable;
        self
    }

    /// Print phase progress
    pub fn verbose(mut self, enable: bool) -> Self {
        self.options.verbose = enable;
        self
    }

    /// Verify a single program
    pub fn verify_source(&self, source: &str, oracle: &mut dyn UnrollOracle) -> Report {
        let mut pipeline = VerificationPipeline::new(self.options.clone());
        pipeline.verify(source, oracle)
    }

    /// Check two programs for behavioral equivalence
    pub fn equivalence_sources(
        &self,
        first: &str,
        second: &str,
        first_oracle: &mut dyn UnrollOracle,
        second_oracle: &mut dyn UnrollOracle,
    ) -> EquivReport {
        let mut pipeline = VerificationPipeline::new(self.options.clone());
        pipeline.equivalence(first, second, first_oracle, second_oracle)
    }
}

impl Default for Verifier {
    fn default() -> Self {
        Self::new()
    }
}
