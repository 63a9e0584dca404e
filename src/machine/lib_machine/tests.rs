use super::*;
use crate::MachineBuilder;

use maplit::btreemap;

fn var(name: &str) -> Term {
    Term::variable(name)
}

fn atom(name: &str) -> Term {
    Term::atom(name)
}

fn int(n: i64) -> Term {
    Term::integer(n)
}

fn clause(head: Term, body: Term) -> Term {
    Term::compound(":-", [head, body])
}

fn indicator(name: &str, arity: i64) -> Term {
    Term::compound("/", [atom(name), int(arity)])
}

fn answers(machine: &mut Machine, query: Term) -> Vec<LeafAnswer> {
    machine.run_query(query).collect::<Result<_, _>>().unwrap()
}

#[test]
fn programatic_query() {
    let mut machine = MachineBuilder::default().build();

    machine
        .consult([
            Term::compound("triple", [Term::string("a"), Term::string("p1"), Term::string("b")]),
            Term::compound("triple", [Term::string("a"), Term::string("p2"), Term::string("b")]),
        ])
        .unwrap();

    let query = Term::compound("triple", [Term::string("a"), var("P"), Term::string("b")]);

    assert_eq!(
        answers(&mut machine, query),
        [
            LeafAnswer::from_bindings([("P", Term::string("p1"))]),
            LeafAnswer::from_bindings([("P", Term::string("p2"))]),
        ],
    );

    // the second candidate is still tried, and fails
    let query = Term::compound("triple", [Term::string("a"), Term::string("p1"), Term::string("b")]);
    assert_eq!(answers(&mut machine, query), [LeafAnswer::True, LeafAnswer::False]);

    let query = Term::compound("triple", [Term::string("x"), Term::string("y"), Term::string("z")]);
    assert_eq!(answers(&mut machine, query), [LeafAnswer::False]);
}

#[test]
fn failing_query() {
    let mut machine = MachineBuilder::default().build();
    let query = Term::compound("triple", [Term::string("a"), var("P"), Term::string("b")]);
    let complete_answer: Result<Vec<_>, _> = machine.run_query(query).collect();

    assert_eq!(
        complete_answer,
        Err(Term::compound(
            "error",
            [
                Term::compound("existence_error", [atom("procedure"), indicator("triple", 3)]),
                indicator("triple", 3),
            ],
        ))
    );
}

#[test]
fn unknown_procedures_can_fail_quietly() {
    let mut machine = MachineBuilder::default()
        .with_unknown(crate::UnknownFlag::Fail)
        .build();

    assert_eq!(answers(&mut machine, atom("nowhere")), [LeafAnswer::False]);
}

#[test]
fn strings_are_not_atoms() {
    let mut machine = MachineBuilder::default().build();
    let query = Term::compound("=", [Term::string("abc"), atom("abc")]);

    assert_eq!(answers(&mut machine, query), [LeafAnswer::False]);

    let query = Term::compound("string", [Term::string("abc")]);
    assert_eq!(answers(&mut machine, query), [LeafAnswer::True]);
}

#[test]
fn aliased_variables_use_the_first_name() {
    let mut machine = MachineBuilder::default().build();
    let query = Term::compound("=", [var("X"), var("Y")]);

    assert_eq!(
        answers(&mut machine, query),
        [LeafAnswer::LeafAnswer {
            bindings: btreemap! {
                "X".into() => var("Y"),
            }
        }],
    );
}

#[test]
fn fresh_variables_get_letter_names() {
    let mut machine = MachineBuilder::default().build();
    let query = Term::compound(
        "=",
        [var("X"), Term::compound("f", [var("_"), var("Y"), var("_")])],
    );

    assert_eq!(
        answers(&mut machine, query),
        [LeafAnswer::LeafAnswer {
            bindings: btreemap! {
                "X".into() => Term::compound("f", [var("_A"), var("Y"), var("_B")]),
            }
        }],
    );
}

#[test]
fn cut_commits_to_the_first_solution() {
    let mut machine = MachineBuilder::default().build();

    machine
        .consult([
            Term::compound("p", [int(1)]),
            Term::compound("p", [int(2)]),
            Term::compound("p", [int(3)]),
            clause(
                Term::compound("q", [var("X")]),
                Term::conjunction([Term::compound("p", [var("X")]), atom("!")]),
            ),
        ])
        .unwrap();

    assert_eq!(
        answers(&mut machine, Term::compound("q", [var("X")])),
        [LeafAnswer::from_bindings([("X", int(1))])],
    );

    assert_eq!(
        answers(&mut machine, Term::compound("p", [var("X")])),
        [
            LeafAnswer::from_bindings([("X", int(1))]),
            LeafAnswer::from_bindings([("X", int(2))]),
            LeafAnswer::from_bindings([("X", int(3))]),
        ],
    );
}

#[test]
fn catch_and_throw() {
    let mut machine = MachineBuilder::default().build();

    let query = Term::compound(
        "catch",
        [Term::compound("throw", [atom("ball")]), var("B"), atom("true")],
    );

    assert_eq!(
        answers(&mut machine, query),
        [LeafAnswer::from_bindings([("B", atom("ball"))])],
    );

    let query = Term::compound("throw", [atom("oops")]);
    assert_eq!(answers(&mut machine, query), [LeafAnswer::Exception(atom("oops"))]);
}

#[test]
fn findall_collects_every_solution() {
    let mut machine = MachineBuilder::default().build();

    let query = Term::compound(
        "findall",
        [
            var("X"),
            Term::compound("between", [int(1), int(3), var("X")]),
            var("L"),
        ],
    );

    assert_eq!(
        answers(&mut machine, query),
        [LeafAnswer::LeafAnswer {
            bindings: btreemap! {
                "L".into() => Term::list([int(1), int(2), int(3)]),
            }
        }],
    );
}

#[test]
fn arithmetic() {
    let mut machine = MachineBuilder::default().build();

    let query = Term::compound("is", [var("X"), Term::compound("/", [int(6), int(2)])]);
    assert_eq!(
        answers(&mut machine, query),
        [LeafAnswer::from_bindings([("X", int(3))])],
    );

    let query = Term::compound("is", [var("X"), Term::compound("/", [int(7), int(2)])]);
    assert_eq!(
        answers(&mut machine, query),
        [LeafAnswer::from_bindings([("X", Term::float(3.5))])],
    );

    let query = Term::compound("is", [var("X"), Term::compound("/", [int(1), int(0)])]);
    let result: Result<Vec<_>, _> = machine.run_query(query).collect();

    assert_eq!(
        result,
        Err(Term::compound(
            "error",
            [
                Term::compound("evaluation_error", [atom("zero_divisor")]),
                indicator("is", 2),
            ],
        )),
    );
}

#[test]
fn logical_update_view() {
    let mut machine = MachineBuilder::default().build();

    machine.assertz(Term::compound("c", [int(1)])).unwrap();

    let query = Term::conjunction([
        Term::compound("c", [var("X")]),
        Term::compound("assertz", [Term::compound("c", [int(2)])]),
    ]);

    assert_eq!(
        answers(&mut machine, query),
        [LeafAnswer::from_bindings([("X", int(1))])],
    );

    assert_eq!(
        answers(&mut machine, Term::compound("c", [var("X")])),
        [
            LeafAnswer::from_bindings([("X", int(1))]),
            LeafAnswer::from_bindings([("X", int(2))]),
        ],
    );
}

#[test]
fn asserta_adds_at_the_front() {
    let mut machine = MachineBuilder::default().build();

    machine.assertz(Term::compound("d", [atom("b")])).unwrap();
    machine.asserta(Term::compound("d", [atom("a")])).unwrap();

    assert_eq!(
        answers(&mut machine, Term::compound("d", [var("X")])),
        [
            LeafAnswer::from_bindings([("X", atom("a"))]),
            LeafAnswer::from_bindings([("X", atom("b"))]),
        ],
    );
}

#[test]
fn retract_removes_the_first_match() {
    let mut machine = MachineBuilder::default().build();

    machine.assertz(Term::compound("counter", [int(0)])).unwrap();

    let query = Term::conjunction([
        Term::compound("retract", [Term::compound("counter", [var("X")])]),
        Term::compound("is", [var("Y"), Term::compound("+", [var("X"), int(1)])]),
        Term::compound("assertz", [Term::compound("counter", [var("Y")])]),
    ]);

    let first = machine.run_query(query).next();

    assert_eq!(
        first,
        Some(Ok(LeafAnswer::from_bindings([("X", int(0)), ("Y", int(1))]))),
    );

    assert_eq!(
        answers(&mut machine, Term::compound("counter", [var("Z")])),
        [LeafAnswer::from_bindings([("Z", int(1))])],
    );
}

#[test]
fn dynamic_declarations() {
    let mut machine = MachineBuilder::default().build();

    machine.declare_dynamic("d", 1).unwrap();
    assert_eq!(answers(&mut machine, Term::compound("d", [var("X")])), [LeafAnswer::False]);

    machine.consult([atom("s")]).unwrap();

    match machine.declare_dynamic("s", 0) {
        Err(Term::Compound(name, args)) => {
            assert_eq!(name, "error");
            assert_eq!(
                args[0],
                Term::compound(
                    "permission_error",
                    [atom("modify"), atom("static_procedure"), indicator("s", 0)],
                ),
            );
        }
        result => panic!("unexpected result {result:?}"),
    }

    assert!(machine.assertz(atom("s")).is_err());
}

#[test]
fn frozen_goals_run_on_binding() {
    let mut machine = MachineBuilder::default().build();

    let query = Term::conjunction([
        Term::compound("freeze", [var("X"), Term::compound("=", [var("Y"), atom("woken")])]),
        Term::compound("=", [var("X"), int(1)]),
    ]);

    assert_eq!(
        answers(&mut machine, query),
        [LeafAnswer::from_bindings([("X", int(1)), ("Y", atom("woken"))])],
    );
}

#[test]
fn halt_ends_the_stream() {
    let mut machine = MachineBuilder::default().build();

    assert_eq!(machine.halted(), None);
    assert_eq!(machine.run_query(Term::compound("halt", [int(3)])).next(), None);
    assert_eq!(machine.halted(), Some(3));
}

#[test]
fn consult_runs_directives() {
    let mut machine = MachineBuilder::default().build();

    machine
        .consult([
            Term::compound("fact", [int(1)]),
            Term::compound(":-", [Term::compound("assertz", [Term::compound("dyn", [int(2)])])]),
        ])
        .unwrap();

    assert_eq!(
        answers(&mut machine, Term::compound("dyn", [var("X")])),
        [LeafAnswer::from_bindings([("X", int(2))])],
    );
}

#[test]
fn consult_handler_loads_list_goals() {
    let mut machine = MachineBuilder::default()
        .with_consult_handler(Box::new(|name| match name {
            "lib" => Ok(vec![Term::compound("from_lib", [atom("ok")])]),
            _ => Err(format!("no source {name}")),
        }))
        .build();

    assert_eq!(answers(&mut machine, Term::list([atom("lib")])), [LeafAnswer::True]);

    assert_eq!(
        answers(&mut machine, Term::compound("from_lib", [var("X")])),
        [LeafAnswer::from_bindings([("X", atom("ok"))])],
    );

    let result: Result<Vec<_>, _> = machine.run_query(Term::list([atom("missing")])).collect();

    match result {
        Err(Term::Compound(name, args)) => {
            assert_eq!(name, "error");
            assert_eq!(
                args[0],
                Term::compound("existence_error", [atom("source_sink"), atom("missing")]),
            );
        }
        result => panic!("unexpected result {result:?}"),
    }
}

#[test]
fn non_callable_queries_are_type_errors() {
    let mut machine = MachineBuilder::default().build();
    let result: Result<Vec<_>, _> = machine.run_query(int(1)).collect();

    match result {
        Err(Term::Compound(name, args)) => {
            assert_eq!(name, "error");
            assert_eq!(args[0], Term::compound("type_error", [atom("callable"), int(1)]));
        }
        result => panic!("unexpected result {result:?}"),
    }
}

#[test]
fn terms_display_in_canonical_syntax() {
    let term = Term::compound(
        "f",
        [
            atom("a b"),
            Term::string("s\"t"),
            Term::list([int(1), atom("[]")]),
            atom("+"),
            var("X"),
        ],
    );

    assert_eq!(term.to_string(), r#"f('a b',"s\"t",[1,[]],+,X)"#);
    assert_eq!(Term::conjunction([atom("a"), atom("b")]).to_string(), "','(a,b)");
}

#[test]
fn letter_codes() {
    assert_eq!(count_to_letter_code(0), "_A");
    assert_eq!(count_to_letter_code(25), "_Z");
    assert_eq!(count_to_letter_code(26), "_BA");
}

#[test]
fn query_stats_count_goals() {
    let mut machine = MachineBuilder::default().build();

    machine
        .consult([
            Term::compound("count", [int(0)]),
            clause(
                Term::compound("count", [var("N")]),
                Term::conjunction([
                    Term::compound(">", [var("N"), int(0)]),
                    Term::compound("is", [var("M"), Term::compound("-", [var("N"), int(1)])]),
                    Term::compound("count", [var("M")]),
                ]),
            ),
        ])
        .unwrap();

    let mut query = machine.run_query(Term::compound("count", [int(100)]));

    assert_eq!(query.next(), Some(Ok(LeafAnswer::True)));

    let stats = query.stats();

    assert!(stats.goals >= 100);
    assert!(stats.tcos > 0);
}
