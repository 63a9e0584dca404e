use crate::helper::*;
use cutpoint::{LeafAnswer, MachineBuilder, Term};

#[test]
fn unification_is_symmetric() {
    let mut machine = MachineBuilder::default().build();

    let pairs = [
        (c("f", [var("X"), atom("b")]), c("f", [atom("a"), var("Y")])),
        (c("f", [var("X"), var("X")]), c("f", [atom("a"), atom("b")])),
        (c("g", [var("X")]), c("f", [var("X")])),
        (ints(&[1, 2, 3]), cons(var("H"), var("T"))),
        (Term::string("abc"), atom("abc")),
        (int(1), Term::float(1.0)),
        (c("f", [c("g", [var("X")]), var("Y")]), c("f", [var("Y"), c("g", [int(1)])])),
    ];

    for (a, b) in pairs {
        let forward = answers(&mut machine, c("=", [a.clone(), b.clone()]));
        let backward = answers(&mut machine, c("=", [b.clone(), a.clone()]));

        assert_eq!(
            forward.first() == Some(&LeafAnswer::False),
            backward.first() == Some(&LeafAnswer::False),
            "{a} = {b}",
        );
    }
}

#[test]
fn backtracking_restores_bindings() {
    let mut machine = MachineBuilder::default().build();

    let attempt = Term::conjunction([
        c("=", [var("X"), c("f", [var("Y")])]),
        c("=", [var("Y"), int(1)]),
    ]);

    let query = Term::disjunction([
        Term::conjunction([attempt.clone(), atom("fail")]),
        Term::conjunction([c("var", [var("X")]), c("var", [var("Y")]), attempt]),
    ]);

    assert_eq!(
        answers(&mut machine, query),
        [bindings([("X", c("f", [int(1)])), ("Y", int(1))])],
    );
}

#[test]
fn cut_inside_a_call_keeps_older_choices() {
    let mut program = member_program();

    program.extend([
        c("q", [int(1)]),
        c("q", [int(2)]),
        clause(atom("p"), Term::conjunction([c("q", [var("_")]), atom("!")])),
    ]);

    let mut machine = machine_with(program);

    let query = Term::conjunction([c("q", [var("X")]), atom("p")]);

    assert_eq!(
        answers(&mut machine, query),
        [bindings([("X", int(1))]), bindings([("X", int(2))])],
    );

    let query = Term::conjunction([
        c("member", [var("Y"), Term::list([atom("a"), atom("b")])]),
        c("call", [Term::conjunction([c("q", [var("X")]), atom("!")])]),
    ]);

    assert_eq!(
        answers(&mut machine, query),
        [
            bindings([("X", int(1)), ("Y", atom("a"))]),
            bindings([("X", int(1)), ("Y", atom("b"))]),
            LeafAnswer::False,
        ],
    );
}

#[test]
fn last_call_reuse_preserves_results() {
    let queries = [
        c("count", [int(0), int(1000)]),
        c("count", [int(5), int(3)]),
        c("count", [int(0), var("N")]),
    ];

    let mut runs = vec![];

    for tco in [true, false] {
        let mut machine = MachineBuilder::default().with_tco(tco).build();
        machine.consult(count_program()).unwrap();

        let mut results = vec![];

        for query in queries.clone() {
            let mut stream = machine.run_query(query);
            results.push(stream.next());
        }

        let mut deep = machine.run_query(c("count", [int(0), int(1000)]));

        assert_eq!(deep.next(), Some(Ok(LeafAnswer::True)));
        runs.push((results, deep.stats().max_frames));
    }

    let (with_tco, frames_tco) = &runs[0];
    let (without_tco, frames_plain) = &runs[1];

    assert_eq!(with_tco, without_tco);
    assert_eq!(with_tco[0], Some(Ok(LeafAnswer::True)));
    assert_eq!(with_tco[1], Some(Ok(LeafAnswer::False)));
    assert_eq!(with_tco[2], Some(Ok(bindings([("N", int(0))]))));

    assert!(frames_tco < frames_plain, "{frames_tco} >= {frames_plain}");
}

#[test]
fn asserted_clauses_stay_out_of_running_iterations() {
    let mut machine = MachineBuilder::default().build();

    machine.assertz(c("p", [int(1)])).unwrap();
    machine.assertz(c("p", [int(2)])).unwrap();

    let query = Term::conjunction([c("p", [var("X")]), c("assertz", [c("p", [int(3)])])]);

    assert_eq!(
        answers(&mut machine, query),
        [bindings([("X", int(1))]), bindings([("X", int(2))])],
    );

    assert_eq!(
        answers(&mut machine, c("p", [var("X")])),
        [
            bindings([("X", int(1))]),
            bindings([("X", int(2))]),
            bindings([("X", int(3))]),
            bindings([("X", int(3))]),
        ],
    );
}

#[test]
fn retracted_clauses_stay_in_running_iterations() {
    let mut machine = MachineBuilder::default().build();

    for n in 1..=3 {
        machine.assertz(c("s", [int(n)])).unwrap();
    }

    let query = Term::conjunction([
        c("s", [var("X")]),
        Term::disjunction([
            c("->", [c("==", [var("X"), int(1)]), c("retract", [c("s", [int(3)])])]),
            atom("true"),
        ]),
    ]);

    assert_eq!(
        answers(&mut machine, query),
        [
            bindings([("X", int(1))]),
            bindings([("X", int(2))]),
            bindings([("X", int(3))]),
        ],
    );

    assert_eq!(
        answers(&mut machine, c("s", [var("X")])),
        [bindings([("X", int(1))]), bindings([("X", int(2))])],
    );
}

#[test]
fn exhausted_queries_leave_no_trail() {
    let mut machine = machine_with(member_program());
    let mut query = machine.run_query(c("member", [var("X"), ints(&[1, 2, 3])]));

    let mut seen = vec![];

    for answer in query.by_ref() {
        seen.push(answer.unwrap());
    }

    assert_eq!(
        seen,
        [
            bindings([("X", int(1))]),
            bindings([("X", int(2))]),
            bindings([("X", int(3))]),
            LeafAnswer::False,
        ],
    );

    assert_eq!(query.stats().trail_len, 0);
}

#[test]
fn deterministic_queries_leave_no_trail() {
    let mut program = member_program();
    program.push(clause(c("det", [var("Z")]), c("=", [var("Z"), c("f", [var("_")])])));

    let mut machine = machine_with(program);
    let mut query = machine.run_query(c("det", [var("X")]));

    assert!(matches!(query.next(), Some(Ok(LeafAnswer::LeafAnswer { .. }))));
    assert_eq!(query.stats().trail_len, 0);
    assert_eq!(query.next(), None);
}

#[test]
fn deterministic_builtins_leave_no_trail() {
    let mut machine = MachineBuilder::default().build();
    machine.assertz(c("d", [int(1)])).unwrap();

    let goals = [
        c("clause", [c("d", [var("X")]), var("B")]),
        c("setup_call_cleanup", [atom("true"), c("=", [var("X"), int(1)]), atom("true")]),
        c("retract", [c("d", [var("X")])]),
    ];

    for goal in goals {
        let mut query = machine.run_query(goal);

        assert!(matches!(query.next(), Some(Ok(LeafAnswer::LeafAnswer { .. }))));
        assert_eq!(query.stats().trail_len, 0);
        assert_eq!(query.next(), None);
    }
}

#[test]
fn structural_equality_after_binding() {
    let mut machine = MachineBuilder::default().build();

    let query = |expected: i64| {
        Term::conjunction([
            c("=", [var("X"), c("f", [var("Y")])]),
            c("=", [var("Y"), int(1)]),
            c("==", [var("X"), c("f", [int(expected)])]),
        ])
    };

    assert_eq!(
        answers(&mut machine, query(1)),
        [bindings([("X", c("f", [int(1)])), ("Y", int(1))])],
    );

    assert_eq!(answers(&mut machine, query(2)), [LeafAnswer::False]);
}

#[test]
fn long_lists_are_not_mistaken_for_cycles() {
    let mut machine = MachineBuilder::default().with_max_depth(1000).build();
    let items: Vec<i64> = (0..5_000).collect();

    let query = Term::conjunction([
        c("=", [ints(&items), ints(&items)]),
        c("==", [ints(&items), ints(&items)]),
        c("=", [var("L"), ints(&items)]),
    ]);

    assert_eq!(answers(&mut machine, query), [bindings([("L", ints(&items))])]);
}
