use attest::lexer::normalize;
use attest::parser::{parse, BinOp, CmpOp, Expr};
use attest::smt;
use attest::ssa::{self, SsaLine, SsaProgram, VarKey};
use attest::unroll::{self, BoundMap};
use proptest::prelude::*;
use std::collections::{HashMap, HashSet};

/// Variable names that are not keywords or boolean literals
fn var_name() -> impl Strategy<Value = String> {
    prop::sample::select(vec!["a", "b", "x", "y", "n"]).prop_map(str::to_string)
}

fn binop() -> impl Strategy<Value = BinOp> {
    prop::sample::select(vec![BinOp::Add, BinOp::Sub, BinOp::Mul, BinOp::Div, BinOp::Mod])
}

fn cmpop() -> impl Strategy<Value = CmpOp> {
    prop::sample::select(vec![
        CmpOp::Eq,
        CmpOp::Ne,
        CmpOp::Lt,
        CmpOp::Le,
        CmpOp::Gt,
        CmpOp::Ge,
    ])
}

/// Arithmetic expression trees, ternaries included
fn arith_expr() -> impl Strategy<Value = Expr> {
    let leaf = prop_oneof![
        (0i64..1000).prop_map(Expr::Integer),
        var_name().prop_map(Expr::Variable),
        (var_name(), 0i64..10).prop_map(|(base, index)| Expr::ArrayAccess {
            base,
            index: Box::new(Expr::Integer(index)),
        }),
    ];
    leaf.prop_recursive(3, 24, 3, |inner| {
        prop_oneof![
            (binop(), inner.clone(), inner.clone()).prop_map(|(op, left, right)| {
                Expr::BinaryOp {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                }
            }),
            (inner.clone(), inner.clone(), inner.clone()).prop_map(|(cond, t, e)| {
                Expr::Ternary {
                    cond: Box::new(cond),
                    then_value: Box::new(t),
                    else_value: Box::new(e),
                }
            }),
        ]
    })
}

/// A comparison over two arithmetic operands
fn compare_expr() -> impl Strategy<Value = Expr> {
    (cmpop(), arith_expr(), arith_expr()).prop_map(|(op, left, right)| Expr::Compare {
        op,
        left: Box::new(left),
        right: Box::new(right),
    })
}

/// Concrete value for evaluating a converted program
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
            let (Val::Int(l), Val::Int(r)) = (eval_expr(left, env), eval_expr(right, env)) else {
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
            let (Val::Int(l), Val::Int(r)) = (eval_expr(left, env), eval_expr(right, env)) else {
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

/// Collect every plain identifier used in an expression
fn used_vars(expr: &Expr, out: &mut Vec<String>) {
    match expr {
        Expr::Integer(_) | Expr::Boolean(_) => {}
        Expr::Variable(name) => out.push(name.clone()),
        Expr::ArrayAccess { index, .. } => used_vars(index, out),
        Expr::BinaryOp { left, right, .. } | Expr::Compare { left, right, .. } => {
            used_vars(left, out);
            used_vars(right, out);
        }
        Expr::Ternary {
            cond,
            then_value,
            else_value,
        } => {
            used_vars(cond, out);
            used_vars(then_value, out);
            used_vars(else_value, out);
        }
    }
}

/// Property: printing an expression and re-parsing it restores the tree
proptest! {
    #[test]
    fn test_expression_round_trip(expr in prop_oneof![arith_expr(), compare_expr()]) {
        let printed = expr.to_infix();
        let reparsed = parse(&printed);
        prop_assert!(reparsed.is_ok(), "failed to reparse '{}'", printed);
        prop_assert_eq!(reparsed.unwrap(), expr);
    }
}

/// Property: an unclosed parenthesis always fails with an expression error
proptest! {
    #[test]
    fn test_unclosed_paren_always_fails(expr in arith_expr()) {
        let broken = format!("({}", expr.to_infix());
        prop_assert!(parse(&broken).is_err());
    }
}

/// Property: a loop-free program unrolls to itself
proptest! {
    #[test]
    fn test_unroll_identity(
        statements in prop::collection::vec((var_name(), arith_expr()), 1..6)
    ) {
        let mut source: Vec<String> = statements
            .iter()
            .map(|(name, expr)| format!("{} := {};", name, expr.to_infix()))
            .collect();
        source.push("assert(x >= 0);".to_string());

        let unrolled = unroll::unroll(&source, &BoundMap::new()).unwrap();
        prop_assert_eq!(unrolled.lines, source);
        prop_assert!(unrolled.warnings.is_empty());
    }
}

/// Property: unrolling removes every loop the collector can find
proptest! {
    #[test]
    fn test_unroll_completeness(outer in 0u32..4, inner in 0u32..4) {
        let source = normalize(
            "k := 0;\n\
             while (k < 3) {\n\
             k := k + 1;\n\
             while (m < 2) {\n\
             m := m + 1;\n\
             }\n\
             }\n\
             assert(k >= 0);",
        );
        let bounds = BoundMap::from_counts(&[outer, inner]);
        let unrolled = unroll::unroll(&source, &bounds).unwrap();
        prop_assert!(unroll::collect_loops(&unrolled.lines).unwrap().is_empty());
    }
}

/// Property: SSA output defines every name exactly once, and every used name
/// is either defined earlier or a free input
proptest! {
    #[test]
    fn test_ssa_single_definition(
        init in arith_expr(),
        guard in compare_expr(),
        bound in 0u32..4
    ) {
        let source = format!(
            "x := {};\n\
             while (x < 4) {{\n\
             x := x + 1;\n\
             }}\n\
             if ({}) {{\n\
             y := x + 1;\n\
             }} else {{\n\
             y := x - 1;\n\
             }}\n\
             assert(y > 0);",
            init.to_infix(),
            guard.to_infix(),
        );
        let lines = normalize(&source);
        let unrolled = unroll::unroll(&lines, &BoundMap::from_counts(&[bound])).unwrap();
        let program = ssa::convert(&unrolled.code_lines()).unwrap();

        let names = program.def_names();
        let unique: HashSet<&&str> = names.iter().collect();
        prop_assert_eq!(unique.len(), names.len(), "a name was defined twice");

        let all_defined: HashSet<String> = names.iter().map(|n| n.to_string()).collect();
        let mut defined_so_far: HashSet<String> = HashSet::new();
        for line in &program.lines {
            let (rhs, def) = match line {
                SsaLine::Def { name, rhs } => (rhs, Some(name)),
                SsaLine::Final { arg, .. } => (arg, None),
            };
            let mut used = Vec::new();
            used_vars(rhs, &mut used);
            for name in used {
                prop_assert!(
                    defined_so_far.contains(&name) || !all_defined.contains(&name),
                    "'{}' used before its definition",
                    name
                );
            }
            if let Some(name) = def {
                defined_so_far.insert(name.clone());
            }
        }
    }
}

/// Property: every free symbol of every assertion is declared
proptest! {
    #[test]
    fn test_declaration_closure(
        init in arith_expr(),
        guard in compare_expr(),
        bound in 1u32..4
    ) {
        let source = format!(
            "sum := {};\n\
             i := 0;\n\
             while (i < n) {{\n\
             if ({}) {{\n\
             sum := sum + arr[i];\n\
             }}\n\
             i := i + 1;\n\
             }}\n\
             assert(sum >= 0);",
            init.to_infix(),
            guard.to_infix(),
        );
        let lines = normalize(&source);
        let unrolled = unroll::unroll(&lines, &BoundMap::from_counts(&[bound])).unwrap();
        let program = ssa::convert(&unrolled.code_lines()).unwrap();
        let script = smt::emit(&program);

        let builtin: HashSet<&str> = [
            "select", "store", "ite", "not", "and", "or", "div", "mod", "distinct",
            "true", "false",
        ]
        .into_iter()
        .collect();

        for assertion in &script.assertions {
            for token in assertion.split(|c: char| !(c.is_alphanumeric() || c == '_')) {
                if token.is_empty()
                    || builtin.contains(token)
                    || token.chars().next().unwrap().is_ascii_digit()
                {
                    continue;
                }
                prop_assert!(
                    script.scalars.contains_key(token) || script.arrays.contains(token),
                    "symbol '{}' asserted but not declared",
                    token
                );
            }
        }
    }
}

/// Property: in an `if`/`else if` chain of any width, the merged value is
/// the one selected by the first true guard
proptest! {
    #[test]
    fn test_else_if_chain_guard_priority(arms in 3usize..6, selector in 0i64..8) {
        let mut source = String::from("r := 0;\n");
        for i in 0..arms {
            if i == 0 {
                source.push_str(&format!("if (s == {}) {{\n", i));
            } else {
                source.push_str(&format!("}} else if (s == {}) {{\n", i));
            }
            source.push_str(&format!("r := {};\n", 10 + i as i64));
        }
        source.push_str("} else {\nr := 99;\n}\nassert(r >= 0);\n");

        let program = ssa::convert(&normalize(&source)).unwrap();
        let final_r = program
            .final_versions
            .iter()
            .find_map(|(key, name)| match key {
                VarKey::Scalar(n) if n == "r" => Some(name.clone()),
                _ => None,
            })
            .expect("'r' has a final version");

        let env = eval_defs(&program, &[("s", selector)]);
        let expected = if (selector as usize) < arms {
            10 + selector
        } else {
            99
        };
        prop_assert_eq!(env[&final_r], Val::Int(expected));
    }
}

/// Property: SSA output is a valid pipeline input and re-converting it adds
/// no new merges
proptest! {
    #[test]
    fn test_ssa_idempotence(guard in compare_expr()) {
        let source = format!(
            "x := 1;\n\
             if ({}) {{\n\
             y := x + 1;\n\
             }} else {{\n\
             y := x - 1;\n\
             }}\n\
             assert(y > 0);",
            guard.to_infix(),
        );
        let first = ssa::convert(&normalize(&source)).unwrap();
        let second = ssa::convert(&normalize(&first.render())).unwrap();
        prop_assert_eq!(second.guard_count(), first.guard_count());
        prop_assert_eq!(second.lines.len(), first.lines.len());
    }
}
