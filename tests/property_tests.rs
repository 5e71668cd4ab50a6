use std::collections::{BTreeMap, BTreeSet};

use proptest::prelude::*;

use rlscheck::eval::{
    evaluate, resolve_visibility, PolicyOutcome, Resolution, Row, SessionContext, Trilean,
};
use rlscheck::graph::{detect_cycles, DependencyGraph};
use rlscheck::model::{Clause, Command, Disposition, Expr, Policy, PolicySet, Value, PUBLIC_ROLE};
use rlscheck::parser::expr::parse_expression;

const TABLES: &[&str] = &["accounts", "documents", "memberships", "orders", "teams"];

fn trilean() -> impl Strategy<Value = Trilean> {
    prop_oneof![
        Just(Trilean::True),
        Just(Trilean::False),
        Just(Trilean::Unknown),
    ]
}

fn scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Int),
        "[a-z]{0,8}".prop_map(Value::Text),
    ]
}

fn outcome(disposition: Disposition) -> impl Strategy<Value = PolicyOutcome> {
    (0usize..100, trilean()).prop_map(move |(n, result)| PolicyOutcome {
        policy: format!("p{n}"),
        disposition,
        clause: Clause::Using,
        result,
    })
}

fn session_value() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        Just(Value::Text("a".to_string())),
        Just(Value::Text("b".to_string())),
    ]
}

/// Boolean filters over column `c` and session variable `u`.
fn filter() -> impl Strategy<Value = Expr> {
    let text = || prop_oneof![Just("a"), Just("b")];
    let leaf = prop_oneof![
        any::<bool>().prop_map(|b| Expr::literal(Value::Bool(b))),
        Just(Expr::literal(Value::Null)),
        Just(Expr::equals(Expr::column("c"), Expr::session_var("u"))),
        text().prop_map(|t| Expr::equals(Expr::column("c"), Expr::literal(Value::Text(t.to_string())))),
        text().prop_map(|t| Expr::equals(Expr::session_var("u"), Expr::literal(Value::Text(t.to_string())))),
    ];
    leaf.prop_recursive(4, 24, 2, |inner| {
        prop_oneof![
            (inner.clone(), inner.clone()).prop_map(|(l, r)| Expr::and(l, r)),
            (inner.clone(), inner.clone()).prop_map(|(l, r)| Expr::or(l, r)),
            inner.prop_map(Expr::negate),
        ]
    })
}

fn restrictive(index: usize, using: Expr) -> Policy {
    Policy {
        name: format!("r{index}"),
        table: "t".to_string(),
        commands: BTreeSet::from([Command::Select]),
        disposition: Disposition::Restrictive,
        roles: BTreeSet::from([PUBLIC_ROLE.to_string()]),
        using: Some(using),
        with_check: None,
    }
}

fn row(c: &str) -> Row {
    BTreeMap::from([("c".to_string(), Value::Text(c.to_string()))])
}

fn graph() -> impl Strategy<Value = DependencyGraph> {
    prop::collection::vec((0..TABLES.len(), 0..TABLES.len(), 0usize..3), 0..12).prop_map(
        |edges| {
            let mut graph = DependencyGraph::default();
            for (source, target, policy) in edges {
                graph.add_edge(TABLES[source], TABLES[target], &format!("p{policy}"));
            }
            graph
        },
    )
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        failure_persistence: None,
        ..ProptestConfig::default()
    })]

    #[test]
    fn access_is_denied_without_a_permissive_policy(
        restrictive in prop::collection::vec(outcome(Disposition::Restrictive), 0..6),
    ) {
        let resolution = Resolution::combine(restrictive);
        prop_assert_eq!(resolution.verdict, Trilean::False);
        prop_assert!(!resolution.is_granted());
    }

    #[test]
    fn restrictive_only_policy_sets_never_grant(
        filters in prop::collection::vec(filter(), 0..5),
        user in session_value(),
        column in prop_oneof![Just("a"), Just("b")],
    ) {
        let policies = filters
            .into_iter()
            .enumerate()
            .map(|(i, using)| restrictive(i, using))
            .collect();
        let set = PolicySet::new(policies);
        let ctx = SessionContext::new().with_value("u", user);
        let resolution = resolve_visibility(&set, "t", Command::Select, &ctx, &row(column))
            .expect("plain filters should evaluate");
        prop_assert!(!resolution.is_granted(), "{:?}", resolution);
    }

    #[test]
    fn settling_an_unknown_variable_keeps_definite_results(
        expr in filter(),
        column in prop_oneof![Just("a"), Just("b")],
    ) {
        let row = row(column);
        let unknown = SessionContext::new().with_unknown("u");
        let partial = evaluate(&expr, &unknown, &row).expect("plain filters should evaluate");
        for value in ["a", "b"] {
            let known = SessionContext::new().with_value("u", Value::Text(value.to_string()));
            let settled = evaluate(&expr, &known, &row).expect("plain filters should evaluate");
            if partial != Trilean::Unknown {
                prop_assert_eq!(settled, partial, "u = {} changed the result of {}", value, expr);
            }
        }
    }

    #[test]
    fn a_failing_restrictive_policy_always_denies(
        permissive in prop::collection::vec(outcome(Disposition::Permissive), 0..6),
        restrictive in prop::collection::vec(outcome(Disposition::Restrictive), 0..6),
        failing in outcome(Disposition::Restrictive),
    ) {
        let mut outcomes = permissive;
        outcomes.extend(restrictive);
        outcomes.push(PolicyOutcome { result: Trilean::False, ..failing });
        prop_assert!(!Resolution::combine(outcomes).is_granted());
    }

    #[test]
    fn unknown_never_becomes_true_through_and(value in trilean()) {
        prop_assert_ne!(Trilean::Unknown & value, Trilean::True);
        prop_assert_ne!(Trilean::Unknown | value, Trilean::False);
        prop_assert_eq!(!Trilean::Unknown, Trilean::Unknown);
    }

    #[test]
    fn comparison_with_unknown_session_variable_is_unknown(column in scalar()) {
        let expr = parse_expression("owner_id = sessionvar(user_id)").expect("expression should parse");
        let ctx = SessionContext::new().with_unknown("user_id");
        let row = BTreeMap::from([("owner_id".to_string(), column)]);
        prop_assert_eq!(evaluate(&expr, &ctx, &row), Ok(Trilean::Unknown));

        let guarded = parse_expression("owner_id = sessionvar(user_id) AND TRUE")
            .expect("expression should parse");
        prop_assert_ne!(evaluate(&guarded, &ctx, &row), Ok(Trilean::True));
    }

    #[test]
    fn cycle_detection_is_idempotent_across_export(graph in graph()) {
        let cycles = detect_cycles(&graph);
        prop_assert_eq!(&detect_cycles(&graph), &cycles);

        let reimported = DependencyGraph::from_edge_list(&graph.to_edge_list())
            .expect("exported edge list should parse");
        prop_assert_eq!(&reimported, &graph);
        prop_assert_eq!(&detect_cycles(&reimported), &cycles);
    }

    #[test]
    fn cycle_members_reach_each_other(graph in graph()) {
        let mut seen = Vec::new();
        for cycle in detect_cycles(&graph) {
            for table in &cycle.tables {
                prop_assert!(!seen.contains(table), "{} is in two cycles", table);
                seen.push(table.clone());
                let reachable = graph.reachable_from(table);
                for other in &cycle.tables {
                    prop_assert!(reachable.contains(other.as_str()), "{} does not reach {}", table, other);
                }
            }
        }
    }
}
