use crate::helper::*;
use cutpoint::{LeafAnswer, MachineBuilder, Term};

#[test]
fn clause_inspects_dynamic_predicates() {
    let mut machine = MachineBuilder::default().build();

    machine
        .assertz(clause(
            c("double", [var("X"), var("Y")]),
            c("is", [var("Y"), c("*", [var("X"), int(2)])]),
        ))
        .unwrap();

    let query = c("clause", [c("double", [int(3), var("Y")]), var("Body")]);

    assert_eq!(
        answers(&mut machine, query),
        [bindings([("Body", c("is", [var("Y"), c("*", [int(3), int(2)])]))])],
    );
}

#[test]
fn clause_refuses_static_predicates() {
    let mut machine = machine_with(member_program());

    let query = c("clause", [c("member", [var("X"), var("L")]), var("B")]);

    assert_eq!(
        error_formal(&mut machine, query),
        c(
            "permission_error",
            [atom("access"), atom("private_procedure"), indicator("member", 2)],
        ),
    );
}

#[test]
fn retract_enumerates_on_backtracking() {
    let mut machine = MachineBuilder::default().build();

    for n in 1..=3 {
        machine.assertz(c("item", [int(n)])).unwrap();
    }

    let query = c(
        "findall",
        [
            var("X"),
            Term::conjunction([
                c("retract", [c("item", [var("X")])]),
                c(">", [var("X"), int(1)]),
            ]),
            var("L"),
        ],
    );

    assert_eq!(answers(&mut machine, query), [bindings([("L", ints(&[2, 3]))])]);
    assert_eq!(answers(&mut machine, c("item", [var("X")])), [LeafAnswer::False]);
}

#[test]
fn dynamic_directives_in_a_program() {
    let mut machine = MachineBuilder::default().build();

    machine
        .consult([
            c(":-", [c("dynamic", [Term::list([indicator("seen", 1), indicator("other", 0)])])]),
        ])
        .unwrap();

    assert_eq!(answers(&mut machine, c("seen", [var("X")])), [LeafAnswer::False]);
    assert_eq!(answers(&mut machine, atom("other")), [LeafAnswer::False]);

    let query = Term::conjunction([
        c("assertz", [c("seen", [atom("a")])]),
        c("seen", [var("X")]),
    ]);

    assert_eq!(answers(&mut machine, query), [bindings([("X", atom("a"))])]);
}

#[test]
fn indexed_predicates_keep_clause_order() {
    let mut machine = MachineBuilder::default().build();

    // enough clauses to build a first-argument index
    for n in 0..20 {
        let key = if n % 2 == 0 { atom("even") } else { atom("odd") };
        machine.assertz(c("num", [key, int(n)])).unwrap();
    }

    machine.assertz(c("num", [var("_"), int(100)])).unwrap();

    let query = c(
        "findall",
        [var("N"), c("num", [atom("odd"), var("N")]), var("L")],
    );

    assert_eq!(
        answers(&mut machine, query),
        [bindings([("L", ints(&[1, 3, 5, 7, 9, 11, 13, 15, 17, 19, 100]))])],
    );

    let query = Term::conjunction([
        c("asserta", [c("num", [atom("odd"), int(-1)])]),
        c("findall", [var("N"), c("num", [atom("odd"), var("N")]), var("L")]),
    ]);

    assert_eq!(
        answers(&mut machine, query),
        [bindings([("L", ints(&[-1, 1, 3, 5, 7, 9, 11, 13, 15, 17, 19, 100]))])],
    );
}
