//! Attest verifier CLI
//!
//! Command-line collaborator for the verification pipeline: supplies the
//! program buffers and unroll bounds, and renders the four report panes.

use anyhow::{bail, Context, Result};
use attest::error::VerifierError;
use attest::pipeline::{EquivReport, Report, UnrollOracle, Verdict, VerifyOptions};
use attest::unroll::{self, BoundMap, CollectedLoop};
use attest::{lexer, smt, ssa, Verifier};
use clap::{Parser, Subcommand};
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process;

/// Built-in sample programs, selectable by name
const EXAMPLES: &[(&str, &str, &str)] = &[
    (
        "if-else",
        "Branching with a reachable assertion",
        r#"x := 3;
if (x < 5) {
    y := x + 1;
} else {
    y := x - 1;
}
assert(y > 0);
"#,
    ),
    (
        "loop",
        "Counting loop verified against its bound",
        r#"x := 0;
while (x < 4) {
    x := x + 1;
}
assert(x == 4);
"#,
    ),
    (
        "bubble-sort",
        "Nested-loop sorting skeleton over an array",
        r#"for (i := 0; i < n; i := i + 1) {
    for (j := 0; j < n - i - 1; j := j + 1) {
        if (arr[j] > arr[j+1]) {
            temp := arr[j];
            arr[j] := arr[j+1];
            arr[j+1] := temp;
        }
    }
}
assert(arr[0] <= arr[1]);
"#,
    ),
    (
        "array-sum",
        "Summation over a symbolic array",
        r#"sum := 0;
i := 0;
while (i < n) {
    sum := sum + arr[i];
    i := i + 1;
}
assert(sum >= 0);
"#,
    ),
    (
        "max-element",
        "Maximum search with a guarded update",
        r#"max := arr[0];
i := 1;
while (i < n) {
    if (arr[i] > max) {
        max := arr[i];
    }
    i := i + 1;
}
assert(max >= arr[0]);
"#,
    ),
];

#[derive(Parser)]
#[command(name = "attest")]
#[command(about = "Bounded SMT-based verifier for a small imperative language", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Verify that a program's assertion can hold, reporting a model or
    /// counterexamples
    Verify {
        /// Input source file
        input: Option<PathBuf>,

        /// Run a built-in sample program instead of a file
        #[arg(long, conflicts_with = "input")]
        example: Option<String>,

        /// Unroll bounds by loop occurrence, e.g. 4 or 2,3 (prompts if
        /// omitted and the program has loops)
        #[arg(long, value_delimiter = ',')]
        unroll: Option<Vec<u32>>,

        /// Solver binary
        #[arg(long, default_value = "z3")]
        z3: String,

        /// Counterexamples to harvest when the assertion fails
        #[arg(long, default_value = "2")]
        max_counterexamples: usize,

        /// Report panes to print
        #[arg(long, default_value = "all", value_parser = ["all", "unrolled", "ssa", "analysis", "smt"])]
        show: String,

        /// Emit the full report as JSON
        #[arg(long)]
        json: bool,

        /// Verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Check two programs for behavioral equivalence
    Equiv {
        /// First program
        first: PathBuf,

        /// Second program
        second: PathBuf,

        /// Unroll bounds for the first program
        #[arg(long, value_delimiter = ',')]
        unroll: Option<Vec<u32>>,

        /// Unroll bounds for the second program
        #[arg(long, value_delimiter = ',')]
        unroll_b: Option<Vec<u32>>,

        /// Prove equivalence with a product program instead of comparing
        /// satisfiability only
        #[arg(long)]
        strict: bool,

        /// Solver binary
        #[arg(long, default_value = "z3")]
        z3: String,

        /// Emit the full report as JSON
        #[arg(long)]
        json: bool,

        /// Verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// List the loops a program contains, in unroll-prompt order
    Loops {
        /// Input source file
        input: PathBuf,
    },

    /// Emit the SMT script without calling the solver
    Script {
        /// Input source file
        input: PathBuf,

        /// Unroll bounds by loop occurrence
        #[arg(long, value_delimiter = ',')]
        unroll: Option<Vec<u32>>,
    },

    /// List the built-in sample programs, or print one
    Examples {
        /// Sample name
        name: Option<String>,
    },
}

fn main() {
    let cli = Cli::parse();
    let code = match run(cli) {
        Ok(code) => code,
        Err(error) => {
            eprintln!("error: {:#}", error);
            2
        }
    };
    process::exit(code);
}

fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Commands::Verify {
            input,
            example,
            unroll,
            z3,
            max_counterexamples,
            show,
            json,
            verbose,
        } => {
            let source = match (&input, &example) {
                (Some(path), None) => read_source(path)?,
                (None, Some(name)) => example_source(name)?.to_string(),
                _ => bail!("provide a source file or --example NAME"),
            };
            let mut bounds = resolve_bounds(&source, &unroll)?;
            let verifier = Verifier::with_options(VerifyOptions {
                z3_command: z3,
                max_counterexamples,
                strict_equivalence: false,
                verbose,
            });
            let report = verifier.verify_source(&source, &mut bounds);
            print_report(&report, &show, json)?;
            Ok(verdict_code(&report.verdict))
        }

        Commands::Equiv {
            first,
            second,
            unroll,
            unroll_b,
            strict,
            z3,
            json,
            verbose,
        } => {
            let first_source = read_source(&first)?;
            let second_source = read_source(&second)?;
            if lexer::is_comment_only(&second_source) {
                bail!("no second program supplied (every line is a comment)");
            }
            let mut first_bounds = resolve_bounds(&first_source, &unroll)?;
            let mut second_bounds = resolve_bounds(&second_source, &unroll_b)?;
            let verifier = Verifier::with_options(VerifyOptions {
                z3_command: z3,
                max_counterexamples: 2,
                strict_equivalence: strict,
                verbose,
            });
            let report = verifier.equivalence_sources(
                &first_source,
                &second_source,
                &mut first_bounds,
                &mut second_bounds,
            );
            print_equiv_report(&report, json)?;
            Ok(equiv_code(&report))
        }

        Commands::Loops { input } => {
            let source = read_source(&input)?;
            let lines = lexer::normalize(&source);
            let loops = unroll::collect_loops(&lines)?;
            if loops.is_empty() {
                println!("no loops");
            }
            for item in loops {
                println!("{}: {}", item.occurrence, item.header);
            }
            Ok(0)
        }

        Commands::Script { input, unroll: counts } => {
            let source = read_source(&input)?;
            let bounds = resolve_bounds(&source, &counts)?;
            let lines = lexer::normalize(&source);
            let unrolled = unroll::unroll(&lines, &bounds)?;
            let program = ssa::convert(&unrolled.code_lines())?;
            let script = smt::emit(&program);
            println!("{}", script.script());
            Ok(0)
        }

        Commands::Examples { name } => {
            match name {
                Some(name) => println!("{}", example_source(&name)?),
                None => {
                    for (name, description, _) in EXAMPLES {
                        println!("{:<12} {}", name, description);
                    }
                }
            }
            Ok(0)
        }
    }
}

fn read_source(path: &PathBuf) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

fn example_source(name: &str) -> Result<&'static str> {
    EXAMPLES
        .iter()
        .find(|(n, _, _)| *n == name)
        .map(|(_, _, source)| *source)
        .with_context(|| {
            let names: Vec<&str> = EXAMPLES.iter().map(|(n, _, _)| *n).collect();
            format!("unknown example '{}'; available: {}", name, names.join(", "))
        })
}

/// Turn `--unroll` into a bound map, or prompt for each collected loop
fn resolve_bounds(source: &str, counts: &Option<Vec<u32>>) -> Result<BoundMap> {
    if let Some(counts) = counts {
        return Ok(BoundMap::from_counts(counts));
    }
    // A malformed program is reported by the pipeline, not here
    let lines = lexer::normalize(source);
    let loops = unroll::collect_loops(&lines).unwrap_or_default();
    let mut oracle = PromptOracle;
    Ok(oracle.bounds(&loops)?)
}

/// Asks on stdin, once per loop, re-asking on invalid input
struct PromptOracle;

impl UnrollOracle for PromptOracle {
    fn bounds(&mut self, loops: &[CollectedLoop]) -> Result<BoundMap, VerifierError> {
        let mut map = BoundMap::new();
        let stdin = io::stdin();
        for item in loops {
            loop {
                print!("How many times to unroll: {} ? ", item.header);
                io::stdout().flush().map_err(VerifierError::from)?;
                let mut line = String::new();
                let read = stdin
                    .lock()
                    .read_line(&mut line)
                    .map_err(VerifierError::from)?;
                if read == 0 {
                    // End of input: remaining loops keep the default bound
                    println!();
                    return Ok(map);
                }
                match line.trim().parse::<u32>() {
                    Ok(count) => {
                        map.set(item.occurrence, count);
                        break;
                    }
                    Err(_) => println!("Please enter a non-negative integer."),
                }
            }
        }
        Ok(map)
    }
}

fn print_report(report: &Report, show: &str, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }
    let sections = &report.sections;
    let panes: Vec<&str> = match show {
        "unrolled" => vec![&sections.unrolled],
        "ssa" => vec![&sections.ssa],
        "analysis" => vec![&sections.analysis],
        "smt" => vec![&sections.smt],
        _ => vec![
            &sections.unrolled,
            &sections.ssa,
            &sections.analysis,
            &sections.smt,
        ],
    };
    for pane in panes {
        if !pane.is_empty() {
            println!("{}\n", pane);
        }
    }
    println!("{}", verdict_line(&report.verdict));
    Ok(())
}

fn print_equiv_report(report: &EquivReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }
    println!("=== Program 1 ===");
    print_report(&report.first, "all", false)?;
    println!("\n=== Program 2 ===");
    print_report(&report.second, "all", false)?;
    if let Some(product) = &report.product_smt {
        println!("\n=== PRODUCT SCRIPT ===\n{}", product);
    }
    println!("\n{}", report.summary);
    Ok(())
}

fn verdict_line(verdict: &Verdict) -> String {
    match verdict {
        Verdict::Satisfied { .. } => "VERDICT: Satisfied".to_string(),
        Verdict::Falsifiable { counterexamples } => format!(
            "VERDICT: Falsifiable ({} counterexample{})",
            counterexamples.len(),
            if counterexamples.len() == 1 { "" } else { "s" }
        ),
        Verdict::Unknown => "VERDICT: Unknown".to_string(),
        Verdict::Error { kind, message } => format!("VERDICT: Error [{}]: {}", kind, message),
    }
}

fn verdict_code(verdict: &Verdict) -> i32 {
    match verdict {
        Verdict::Satisfied { .. } | Verdict::Unknown => 0,
        Verdict::Falsifiable { .. } => 1,
        Verdict::Error { .. } => 2,
    }
}

fn equiv_code(report: &EquivReport) -> i32 {
    use attest::pipeline::EquivVerdict;
    match report.verdict {
        EquivVerdict::Equivalent | EquivVerdict::Unknown => 0,
        EquivVerdict::NotEquivalent => 1,
        EquivVerdict::Error { .. } => 2,
    }
}
