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

//! Error handling for the attest verifier
//!
//! Every stage fails fast with a kind and the source fragment that caused it.

use serde::Serialize;
use thiserror::Error;

/// Expression parsing errors
#[derive(Error, Debug, Clone)]
pub enum ExprError {
    #[error("Unbalanced parentheses in '{expr}'")]
    ParenImbalance { expr: String },

    #[error("Cannot parse expression '{expr}': {reason}")]
    UnparseableExpression { expr: String, reason: String },
}

/// Errors from the unroller and the SSA converter
#[derive(Error, Debug, Clone)]
pub enum TransformError {
    #[error("Malformed loop at '{fragment}': {reason}")]
    MalformedLoop { fragment: String, reason: String },

    #[error("Unsupported control flow at '{fragment}': {reason}")]
    UnsupportedControlFlow { fragment: String, reason: String },

    #[error("Malformed assertion '{fragment}'")]
    MalformedAssertion { fragment: String },

    #[error("Expression error: {source}")]
    Expr {
        #[from]
        source: ExprError,
    },
}

/// Errors from the external solver process
#[derive(Error, Debug, Clone)]
pub enum SolverError {
    #[error("Failed to launch solver '{command}': {message}")]
    Launch { command: String, message: String },

    #[error("Solver I/O failure: {message}")]
    Io { message: String },

    #[error("Unexpected solver output: {message}")]
    Protocol { message: String },
}

/// Verifier errors encompassing all stages
#[derive(Error, Debug, Clone)]
pub enum VerifierError {
    #[error("Expression error: {source}")]
    Expr {
        #[from]
        source: ExprError,
    },

    #[error("Transform error: {source}")]
    Transform {
        #[from]
        source: TransformError,
    },

    #[error("Solver error: {source}")]
    Solver {
        #[from]
        source: SolverError,
    },

    #[error("I/O error: {message}")]
    IoError { message: String },

    #[error("Internal invariant violated: {message}")]
    InternalInvariantViolated { message: String },
}

impl From<std::io::Error> for VerifierError {
    fn from(err: std::io::Error) -> Self {
        VerifierError::IoError {
            message: err.to_string(),
        }
    }
}

/// Stable error kind names surfaced to the collaborator in verdicts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    ParenImbalance,
    MalformedLoop,
    UnsupportedControlFlow,
    MalformedAssertion,
    UnparseableExpression,
    SolverError,
    InternalInvariantViolated,
    IoError,
}

impl VerifierError {
    /// Map an error to its collaborator-facing kind
    pub fn kind(&self) -> ErrorKind {
        match self {
            VerifierError::Expr { source } => source.kind(),
            VerifierError::Transform { source } => source.kind(),
            VerifierError::Solver { .. } => ErrorKind::SolverError,
            VerifierError::IoError { .. } => ErrorKind::IoError,
            VerifierError::InternalInvariantViolated { .. } => {
                ErrorKind::InternalInvariantViolated
            }
        }
    }
}

impl ExprError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExprError::ParenImbalance { .. } => ErrorKind::ParenImbalance,
            ExprError::UnparseableExpression { .. } => ErrorKind::UnparseableExpression,
        }
    }
}

impl TransformError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TransformError::MalformedLoop { .. } => ErrorKind::MalformedLoop,
            TransformError::UnsupportedControlFlow { .. } => ErrorKind::UnsupportedControlFlow,
            TransformError::MalformedAssertion { .. } => ErrorKind::MalformedAssertion,
            TransformError::Expr { source } => source.kind(),
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::ParenImbalance => "ParenImbalance",
            ErrorKind::MalformedLoop => "MalformedLoop",
            ErrorKind::UnsupportedControlFlow => "UnsupportedControlFlow",
            ErrorKind::MalformedAssertion => "MalformedAssertion",
            ErrorKind::UnparseableExpression => "UnparseableExpression",
            ErrorKind::SolverError => "SolverError",
            ErrorKind::InternalInvariantViolated => "InternalInvariantViolated",
            ErrorKind::IoError => "IoError",
        };
        write!(f, "{}", name)
    }
}
