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

//! Loop collection and bounded unrolling
//!
//! Loops are discovered in textual order (outermost first, nested loops
//! after their parent's header) and replaced by a user-bounded chain of
//! nested guarded body copies. Nesting each iteration inside the previous
//! one's guard preserves early-exit semantics without a break primitive.

use crate::lexer::match_loop_header;
use crate::error::TransformError;
use std::collections::HashMap;

/// A loop discovered by the collector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectedLoop {
    /// Position in the collector's textual-order walk
    pub occurrence: usize,
    /// Header substring from the keyword through the matching `)`
    pub header: String,
}

/// Unroll bounds keyed by loop occurrence
///
/// Occurrence keys let two loops with identical header text receive distinct
/// bounds. A loop with no entry unrolls once.
#[derive(Debug, Clone, Default)]
pub struct BoundMap {
    bounds: HashMap<usize, u32>,
}

impl BoundMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Positional construction: entry `i` bounds occurrence `i`
    pub fn from_counts(counts: &[u32]) -> Self {
        let mut map = Self::new();
        for (occurrence, &n) in counts.iter().enumerate() {
            map.set(occurrence, n);
        }
        map
    }

    pub fn set(&mut self, occurrence: usize, bound: u32) {
        self.bounds.insert(occurrence, bound);
    }

    pub fn get(&self, occurrence: usize) -> u32 {
        self.bounds.get(&occurrence).copied().unwrap_or(1)
    }

    pub fn is_empty(&self) -> bool {
        self.bounds.is_empty()
    }
}

/// Result of unrolling: the loop-free program plus any header warnings
#[derive(Debug, Clone, Default)]
pub struct Unrolled {
    /// Output lines; warnings appear inline where the loop was
    pub lines: Vec<String>,
    /// The warning messages on their own, for the collaborator
    pub warnings: Vec<String>,
}

impl Unrolled {
    /// The lines that make up actual program text (warnings filtered out)
    pub fn code_lines(&self) -> Vec<String> {
        self.lines
            .iter()
            .filter(|line| !line.trim_start().starts_with("Warning:"))
            .cloned()
            .collect()
    }
}

/// Collect every loop header in textual order, nested loops included
pub fn collect_loops(lines: &[String]) -> Result<Vec<CollectedLoop>, TransformError> {
    let mut headers = Vec::new();
    walk_loops(lines, &mut headers)?;
    Ok(headers
        .into_iter()
        .enumerate()
        .map(|(occurrence, header)| CollectedLoop { occurrence, header })
        .collect())
}

fn walk_loops(lines: &[String], out: &mut Vec<String>) -> Result<(), TransformError> {
    let mut i = 0;
    while i < lines.len() {
        if let Some(header) = match_loop_header(&lines[i]) {
            out.push(header);
            let (body, close) = loop_body(lines, i)?;
            walk_loops(&body, out)?;
            i = close + 1;
        } else {
            i += 1;
        }
    }
    Ok(())
}

/// Extract a loop body by brace counting
///
/// Returns the body lines (closing line excluded) and the index of the line
/// on which the braces balanced.
fn loop_body(lines: &[String], header_idx: usize) -> Result<(Vec<String>, usize), TransformError> {
    let header_line = &lines[header_idx];
    let mut level = brace_delta(header_line).max(0);
    let mut j = header_idx + 1;

    // Tolerate the opening brace on its own line
    if level == 0 {
        if j < lines.len() && lines[j].trim() == "{" {
            level = 1;
            j += 1;
        } else {
            return Err(TransformError::MalformedLoop {
                fragment: header_line.clone(),
                reason: "loop body has no opening brace".to_string(),
            });
        }
    }

    let body_start = j;
    while j < lines.len() {
        level += brace_delta(&lines[j]);
        if level <= 0 {
            return Ok((lines[body_start..j].to_vec(), j));
        }
        j += 1;
    }
    Err(TransformError::MalformedLoop {
        fragment: header_line.clone(),
        reason: "braces never balance".to_string(),
    })
}

fn brace_delta(line: &str) -> i32 {
    let opens = line.matches('{').count() as i32;
    let closes = line.matches('}').count() as i32;
    opens - closes
}

/// The parsed pieces of a loop header
struct LoopParts {
    init: Option<String>,
    cond: String,
    step: Option<String>,
}

/// Text between the first `(` and the last `)`
fn paren_body(header: &str) -> Option<&str> {
    let open = header.find('(')?;
    let close = header.rfind(')')?;
    (open < close).then(|| &header[open + 1..close])
}

/// Parse a header into `init`/`cond`/`step`; the error is a warning message
fn parse_header(header: &str) -> Result<LoopParts, String> {
    if header.trim_start().starts_with("for") {
        let Some(body) = paren_body(header) else {
            return Err(format!("Warning: Could not parse for loop header: {}", header));
        };
        let parts = split_top_level(body);
        if parts.len() != 3 || parts[1].is_empty() {
            return Err(format!("Warning: Could not parse for loop header: {}", header));
        }
        Ok(LoopParts {
            init: non_empty(&parts[0]),
            cond: parts[1].clone(),
            step: non_empty(&parts[2]),
        })
    } else if header.trim_start().starts_with("while") {
        let cond = paren_body(header).map(str::trim).unwrap_or_default();
        if cond.is_empty() {
            return Err(format!("Warning: Could not parse while loop header: {}", header));
        }
        Ok(LoopParts {
            init: None,
            cond: cond.to_string(),
            step: None,
        })
    } else {
        Err(format!("Warning: Unrecognized loop type: {}", header))
    }
}

/// Split at `;` outside parentheses and brackets
fn split_top_level(text: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut current = String::new();
    for c in text.chars() {
        match c {
            '(' | '[' => depth += 1,
            ')' | ']' => depth -= 1,
            ';' if depth == 0 => {
                parts.push(current.trim().to_string());
                current.clear();
                continue;
            }
            _ => {}
        }
        current.push(c);
    }
    parts.push(current.trim().to_string());
    parts
}

fn non_empty(part: &str) -> Option<String> {
    let part = part.trim();
    (!part.is_empty()).then(|| part.to_string())
}

/// Rewrite every loop into a bounded chain of nested guarded body copies
pub fn unroll(lines: &[String], bounds: &BoundMap) -> Result<Unrolled, TransformError> {
    let mut result = Unrolled::default();
    let mut occurrence = 0usize;
    let body = unroll_block(lines, bounds, &mut occurrence, &mut result.warnings)?;
    result.lines = body;
    Ok(result)
}

fn unroll_block(
    lines: &[String],
    bounds: &BoundMap,
    occurrence: &mut usize,
    warnings: &mut Vec<String>,
) -> Result<Vec<String>, TransformError> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < lines.len() {
        let line = lines[i].trim();
        if let Some(header) = match_loop_header(line) {
            let n = bounds.get(*occurrence);
            *occurrence += 1;
            let (body, close) = loop_body(lines, i)?;

            match parse_header(&header) {
                Ok(parts) => {
                    // Inner loops unroll once; the result is replicated per copy
                    let inner = unroll_block(&body, bounds, occurrence, warnings)?;
                    emit_unrolled(&parts, &inner, n, &mut out);
                }
                Err(warning) => {
                    // Recoverable: warn and pass the loop through untouched.
                    // The occurrence counter still advances past any loops in
                    // the skipped body so later bounds stay aligned with the
                    // collector's numbering.
                    let mut nested = Vec::new();
                    walk_loops(&body, &mut nested)?;
                    *occurrence += nested.len();
                    warnings.push(warning.clone());
                    out.push(warning);
                    for original in &lines[i..=close] {
                        out.push(original.clone());
                    }
                }
            }
            i = close + 1;
        } else {
            out.push(line.to_string());
            i += 1;
        }
    }
    Ok(out)
}

/// Emit `init` once, then `n` nested guarded copies with the step at the end
/// of each copy, then the closers in reverse order
fn emit_unrolled(parts: &LoopParts, body: &[String], n: u32, out: &mut Vec<String>) {
    if let Some(init) = &parts.init {
        out.push(format!("{};", init));
    }
    for k in 0..n {
        let guard_indent = indent(k as usize);
        let body_indent = indent(k as usize + 1);
        out.push(format!("{}if ({}) {{", guard_indent, parts.cond));
        for line in body {
            out.push(format!("{}{}", body_indent, line));
        }
        if let Some(step) = &parts.step {
            out.push(format!("{}{};", body_indent, step));
        }
    }
    for k in (0..n).rev() {
        out.push(format!("{}}}", indent(k as usize)));
    }
}

fn indent(level: usize) -> String {
    "    ".repeat(level)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::normalize;

    fn lines(text: &str) -> Vec<String> {
        normalize(text)
    }

    #[test]
    fn test_collect_single_loop() {
        let program = lines("x := 0;\nwhile (x < 4) {\nx := x + 1;\n}\nassert(x == 4);");
        let loops = collect_loops(&program).unwrap();
        assert_eq!(loops.len(), 1);
        assert_eq!(loops[0].occurrence, 0);
        assert_eq!(loops[0].header, "while (x < 4)");
    }

    #[test]
    fn test_collect_nested_loops_in_textual_order() {
        let program = lines(
            "for (i := 0; i < n; i := i + 1) {\n\
             for (j := 0; j < n - i - 1; j := j + 1) {\n\
             temp := arr[j];\n\
             }\n\
             }\n\
             while (k < 2) {\n\
             k := k + 1;\n\
             }",
        );
        let loops = collect_loops(&program).unwrap();
        let headers: Vec<&str> = loops.iter().map(|l| l.header.as_str()).collect();
        assert_eq!(
            headers,
            vec![
                "for (i := 0; i < n; i := i + 1)",
                "for (j := 0; j < n - i - 1; j := j + 1)",
                "while (k < 2)",
            ]
        );
        assert_eq!(loops[2].occurrence, 2);
    }

    #[test]
    fn test_collect_keeps_duplicate_headers() {
        let program = lines(
            "while (x < 4) {\nx := x + 1;\n}\nwhile (x < 4) {\nx := x + 1;\n}",
        );
        let loops = collect_loops(&program).unwrap();
        assert_eq!(loops.len(), 2);
        assert_eq!(loops[0].header, loops[1].header);
        assert_ne!(loops[0].occurrence, loops[1].occurrence);
    }

    #[test]
    fn test_collect_unbalanced_braces_fail() {
        let program = lines("while (x < 4) {\nx := x + 1;");
        let err = collect_loops(&program).unwrap_err();
        assert!(matches!(err, TransformError::MalformedLoop { .. }));
    }

    #[test]
    fn test_unroll_identity_for_loop_free_program() {
        let program = lines("x := 3;\ny := x + 1;\nassert(y > 0);");
        let unrolled = unroll(&program, &BoundMap::new()).unwrap();
        assert_eq!(unrolled.lines, program);
        assert!(unrolled.warnings.is_empty());
    }

    #[test]
    fn test_unroll_while_nests_iterations() {
        let program = lines("x := 0;\nwhile (x < 4) {\nx := x + 1;\n}\nassert(x == 4);");
        let mut bounds = BoundMap::new();
        bounds.set(0, 2);
        let unrolled = unroll(&program, &bounds).unwrap();
        assert_eq!(
            unrolled.lines,
            vec![
                "x := 0;",
                "if (x < 4) {",
                "    x := x + 1;",
                "    if (x < 4) {",
                "        x := x + 1;",
                "    }",
                "}",
                "assert(x == 4);",
            ]
        );
    }

    #[test]
    fn test_unroll_for_emits_init_and_step() {
        let program = lines("for (i := 0; i < n; i := i + 1) {\nsum := sum + arr[i];\n}");
        let mut bounds = BoundMap::new();
        bounds.set(0, 2);
        let unrolled = unroll(&program, &bounds).unwrap();
        assert_eq!(
            unrolled.lines,
            vec![
                "i := 0;",
                "if (i < n) {",
                "    sum := sum + arr[i];",
                "    i := i + 1;",
                "    if (i < n) {",
                "        sum := sum + arr[i];",
                "        i := i + 1;",
                "    }",
                "}",
            ]
        );
    }

    #[test]
    fn test_unroll_bound_zero_keeps_init_only() {
        let program = lines("for (i := 0; i < n; i := i + 1) {\nsum := sum + arr[i];\n}");
        let mut bounds = BoundMap::new();
        bounds.set(0, 0);
        let unrolled = unroll(&program, &bounds).unwrap();
        assert_eq!(unrolled.lines, vec!["i := 0;"]);
    }

    #[test]
    fn test_unroll_defaults_to_one_copy() {
        let program = lines("while (x < 4) {\nx := x + 1;\n}");
        let unrolled = unroll(&program, &BoundMap::new()).unwrap();
        assert_eq!(
            unrolled.lines,
            vec!["if (x < 4) {", "    x := x + 1;", "}"]
        );
    }

    #[test]
    fn test_unroll_nested_loops_share_occurrence_numbering() {
        let program = lines(
            "for (i := 0; i < 2; i := i + 1) {\n\
             for (j := 0; j < 2; j := j + 1) {\n\
             t := t + 1;\n\
             }\n\
             }",
        );
        let bounds = BoundMap::from_counts(&[2, 2]);
        let unrolled = unroll(&program, &bounds).unwrap();
        // Outer init once, inner init replicated per outer copy
        let inits = unrolled
            .lines
            .iter()
            .filter(|l| l.trim() == "j := 0;")
            .count();
        assert_eq!(inits, 2);
        let guards = unrolled
            .lines
            .iter()
            .filter(|l| l.trim().starts_with("if (j < 2)"))
            .count();
        assert_eq!(guards, 4);
        // Result is loop-free
        assert!(collect_loops(&unrolled.lines).unwrap().is_empty());
    }

    #[test]
    fn test_unparseable_header_warns_and_passes_through() {
        let program = lines("for (;;) {\nx := x + 1;\n}");
        let unrolled = unroll(&program, &BoundMap::new()).unwrap();
        assert_eq!(unrolled.warnings.len(), 1);
        assert!(unrolled.lines[0].starts_with("Warning:"));
        assert_eq!(&unrolled.lines[1..], &["for (;;) {", "x := x + 1;", "}"]);
        // Warnings are not program text
        assert_eq!(unrolled.code_lines().len(), 3);
    }

    #[test]
    fn test_unroll_completeness() {
        let program = lines(
            "x := 0;\nwhile (x < 4) {\nx := x + 1;\nwhile (y < 2) {\ny := y + 1;\n}\n}",
        );
        let bounds = BoundMap::from_counts(&[3, 2]);
        let unrolled = unroll(&program, &bounds).unwrap();
        assert!(collect_loops(&unrolled.lines).unwrap().is_empty());
    }
}
