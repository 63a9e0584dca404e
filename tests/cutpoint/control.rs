use crate::helper::*;
use cutpoint::{LeafAnswer, Machine, MachineBuilder, Term};

#[test]
fn if_then_else() {
    let mut machine = machine_with(member_program());

    let query = Term::disjunction([
        c(
            "->",
            [
                Term::conjunction([
                    c("member", [var("X"), ints(&[1, 2, 3])]),
                    c(">", [var("X"), int(1)]),
                ]),
                c("=", [var("Y"), atom("yes")]),
            ],
        ),
        c("=", [var("Y"), atom("no")]),
    ]);

    assert_eq!(
        answers(&mut machine, query),
        [bindings([("X", int(2)), ("Y", atom("yes"))])],
    );

    let query = Term::disjunction([
        c("->", [atom("fail"), c("=", [var("Y"), atom("yes")])]),
        c("=", [var("Y"), atom("no")]),
    ]);

    assert_eq!(answers(&mut machine, query), [bindings([("Y", atom("no"))])]);
}

#[test]
fn negation_as_failure() {
    let mut machine = machine_with(member_program());

    let query = c("\\+", [c("member", [int(4), ints(&[1, 2, 3])])]);
    assert_eq!(answers(&mut machine, query), [LeafAnswer::True]);

    let query = c("\\+", [c("member", [int(2), ints(&[1, 2, 3])])]);
    assert_eq!(answers(&mut machine, query), [LeafAnswer::False]);
}

#[test]
fn soft_cut_keeps_the_condition_alternatives() {
    let mut machine = machine_with(member_program());

    let query = Term::disjunction([
        c("*->", [c("member", [var("X"), ints(&[1, 2])]), atom("true")]),
        c("=", [var("X"), atom("none")]),
    ]);

    assert_eq!(
        answers(&mut machine, query),
        [bindings([("X", int(1))]), bindings([("X", int(2))]), LeafAnswer::False],
    );

    let query = Term::disjunction([
        c("*->", [atom("fail"), atom("true")]),
        c("=", [var("X"), atom("none")]),
    ]);

    assert_eq!(answers(&mut machine, query), [bindings([("X", atom("none"))])]);
}

#[test]
fn once_ignore_and_forall() {
    let mut machine = machine_with(member_program());

    let query = c("once", [c("member", [var("X"), Term::list([atom("a"), atom("b")])])]);
    assert_eq!(answers(&mut machine, query), [bindings([("X", atom("a"))])]);

    assert_eq!(answers(&mut machine, c("ignore", [atom("fail")])), [LeafAnswer::True]);

    let query = c(
        "forall",
        [c("member", [var("X"), ints(&[1, 2])]), c(">", [var("X"), int(0)])],
    );

    assert_eq!(answers(&mut machine, query), [unbound()]);

    let query = c(
        "forall",
        [c("member", [var("X"), ints(&[1, 2])]), c(">", [var("X"), int(1)])],
    );

    assert_eq!(answers(&mut machine, query), [LeafAnswer::False]);
}

#[test]
fn call_with_extra_arguments() {
    let mut machine = machine_with(member_program());

    let query = c("call", [c("=", [var("X")]), int(5)]);
    assert_eq!(answers(&mut machine, query), [bindings([("X", int(5))])]);

    let query = Term::conjunction([
        c("=", [var("G"), c("member", [var("Y")])]),
        c("call", [var("G"), Term::list([atom("a")])]),
    ]);

    assert_eq!(
        answers(&mut machine, query)[0],
        bindings([("G", c("member", [atom("a")])), ("Y", atom("a"))]),
    );
}

#[test]
fn catch_is_transparent_after_exit() {
    let mut machine = machine_with(member_program());

    let query = Term::conjunction([
        c("catch", [c("member", [var("X"), ints(&[1, 2])]), var("_"), atom("true")]),
        c(">", [var("X"), int(1)]),
        c("throw", [c("found", [var("X")])]),
    ]);

    assert_eq!(
        answers(&mut machine, query),
        [LeafAnswer::Exception(c("found", [int(2)]))],
    );

    let query = c(
        "catch",
        [
            Term::conjunction([
                c("catch", [c("member", [var("X"), ints(&[1, 2])]), var("_"), atom("fail")]),
                c(">", [var("X"), int(1)]),
                c("throw", [c("found", [var("X")])]),
            ]),
            c("found", [var("Y")]),
            atom("true"),
        ],
    );

    assert_eq!(answers(&mut machine, query), [bindings([("Y", int(2))])]);
}

#[test]
fn unmatched_catchers_release_the_ball() {
    let mut machine = MachineBuilder::default().build();

    let heap_after = |machine: &mut Machine, ball: Term| {
        let query = c("catch", [c("throw", [ball.clone()]), atom("nomatch"), atom("true")]);
        let mut stream = machine.run_query(query);

        assert_eq!(stream.next(), Some(Ok(LeafAnswer::Exception(ball))));
        stream.stats().heap_cells
    };

    let small = heap_after(&mut machine, atom("x"));
    let large = heap_after(&mut machine, c("f", [ints(&[1, 2, 3, 4, 5, 6, 7, 8])]));

    assert_eq!(small, large);
}

#[test]
fn catch_unifies_with_a_copy_of_the_ball() {
    let mut machine = MachineBuilder::default().build();

    let query = c(
        "catch",
        [
            c("atom_length", [int(1), var("_")]),
            c("error", [var("E"), var("_")]),
            atom("true"),
        ],
    );

    assert_eq!(
        answers(&mut machine, query),
        [bindings([(
            "E",
            c("existence_error", [atom("procedure"), indicator("atom_length", 2)]),
        )])],
    );

    let query = c(
        "catch",
        [
            c("throw", [c("ball", [var("X")])]),
            c("ball", [int(1)]),
            atom("true"),
        ],
    );

    assert_eq!(answers(&mut machine, query), [unbound()]);
}

#[test]
fn setup_call_cleanup_runs_cleanup_once() {
    let mut machine = machine_with(member_program());

    machine.declare_dynamic("log", 1).unwrap();

    let cleanup = |what: &str| c("assertz", [c("log", [atom(what)])]);

    let query = c("setup_call_cleanup", [atom("true"), c("=", [var("X"), int(1)]), cleanup("exit")]);
    assert_eq!(answers(&mut machine, query), [bindings([("X", int(1))])]);

    let query = c("setup_call_cleanup", [atom("true"), atom("fail"), cleanup("fail")]);
    assert_eq!(answers(&mut machine, query), [LeafAnswer::False]);

    let query = c(
        "catch",
        [
            c("setup_call_cleanup", [atom("true"), c("throw", [atom("e")]), cleanup("error")]),
            atom("e"),
            atom("true"),
        ],
    );

    assert_eq!(answers(&mut machine, query), [LeafAnswer::True]);

    let query = Term::conjunction([
        c(
            "setup_call_cleanup",
            [atom("true"), c("member", [var("X"), ints(&[1, 2])]), cleanup("cut")],
        ),
        atom("!"),
    ]);

    assert_eq!(answers(&mut machine, query), [bindings([("X", int(1))])]);

    assert_eq!(
        answers(&mut machine, c("log", [var("L")])),
        [
            bindings([("L", atom("exit"))]),
            bindings([("L", atom("fail"))]),
            bindings([("L", atom("error"))]),
            bindings([("L", atom("cut"))]),
        ],
    );
}

#[test]
fn findall_and_between() {
    let mut machine = MachineBuilder::default().build();

    let query = c(
        "findall",
        [var("X"), c("between", [int(1), int(5), var("X")]), var("L")],
    );

    assert_eq!(answers(&mut machine, query), [bindings([("L", ints(&[1, 2, 3, 4, 5]))])]);

    let query = Term::conjunction([
        c("between", [int(1), atom("inf"), var("X")]),
        c(">", [var("X"), int(3)]),
        atom("!"),
    ]);

    assert_eq!(answers(&mut machine, query), [bindings([("X", int(4))])]);

    let query = c(
        "findall",
        [var("X"), atom("fail"), var("L")],
    );

    assert_eq!(answers(&mut machine, query), [bindings([("L", Term::list([]))])]);
}

#[test]
fn term_inspection() {
    let mut machine = MachineBuilder::default().build();

    let query = c("=..", [c("f", [atom("a"), atom("b")]), var("L")]);
    assert_eq!(
        answers(&mut machine, query),
        [bindings([("L", Term::list([atom("f"), atom("a"), atom("b")]))])],
    );

    let query = c("=..", [var("T"), Term::list([atom("g"), int(1)])]);
    assert_eq!(answers(&mut machine, query), [bindings([("T", c("g", [int(1)]))])]);

    let query = c("functor", [var("T"), atom("p"), int(2)]);
    assert_eq!(
        answers(&mut machine, query),
        [bindings([("T", c("p", [var("_A"), var("_B")]))])],
    );

    let query = c(
        "findall",
        [
            var("N"),
            c("arg", [var("N"), c("f", [atom("a"), atom("b"), atom("a")]), atom("a")]),
            var("Ns"),
        ],
    );

    assert_eq!(answers(&mut machine, query), [bindings([("Ns", ints(&[1, 3]))])]);

    let query = c("copy_term", [c("f", [var("X"), var("Y"), var("X")]), var("C")]);
    assert_eq!(
        answers(&mut machine, query),
        [bindings([("C", c("f", [var("_A"), var("_B"), var("_A")]))])],
    );
}

#[test]
fn standard_order() {
    let mut machine = MachineBuilder::default().build();

    let query = c("compare", [var("O"), int(1), atom("a")]);
    assert_eq!(answers(&mut machine, query), [bindings([("O", atom("<"))])]);

    let query = c("@<", [c("f", [atom("a")]), c("g", [atom("a")])]);
    assert_eq!(answers(&mut machine, query), [LeafAnswer::True]);

    let query = c("@<", [c("g", [atom("a")]), c("f", [atom("a"), atom("b")])]);
    assert_eq!(answers(&mut machine, query), [LeafAnswer::True]);
}

#[test]
fn frozen_goals_wait_for_their_variable() {
    let mut machine = MachineBuilder::default().build();

    let query = Term::conjunction([
        c("freeze", [var("X"), c("=", [var("Y"), atom("woken")])]),
        c("var", [var("Y")]),
        c("=", [var("X"), int(1)]),
    ]);

    assert_eq!(
        answers(&mut machine, query),
        [bindings([("X", int(1)), ("Y", atom("woken"))])],
    );

    let query = Term::conjunction([
        c("freeze", [var("X"), atom("fail")]),
        c("=", [var("X"), int(1)]),
    ]);

    assert_eq!(answers(&mut machine, query), [LeafAnswer::False]);
}
