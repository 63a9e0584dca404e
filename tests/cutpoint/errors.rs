use crate::helper::*;
use cutpoint::{MachineBuilder, Term};

#[test]
fn iso_error_terms() {
    let mut machine = MachineBuilder::default().build();

    assert_eq!(
        error_formal(&mut machine, c("call", [int(1)])),
        c("type_error", [atom("callable"), int(1)]),
    );

    assert_eq!(
        error_formal(&mut machine, c("is", [var("X"), c("+", [var("Y"), int(1)])])),
        atom("instantiation_error"),
    );

    assert_eq!(
        error_formal(&mut machine, c("is", [var("X"), c("+", [atom("foo"), int(1)])])),
        c("type_error", [atom("evaluable"), indicator("foo", 0)]),
    );

    assert_eq!(
        error_formal(&mut machine, c("assertz", [c("atom", [atom("x")])])),
        c(
            "permission_error",
            [atom("modify"), atom("static_procedure"), indicator("atom", 1)],
        ),
    );

    assert_eq!(
        error_formal(&mut machine, c("functor", [var("T"), atom("f"), int(-1)])),
        c("domain_error", [atom("not_less_than_zero"), int(-1)]),
    );
}

#[test]
fn errors_carry_the_raising_goal() {
    let mut machine = MachineBuilder::default().build();
    let result: Result<Vec<_>, _> = machine.run_query(c("atom_length", [atom("a"), var("N")])).collect();

    assert_eq!(
        result,
        Err(c(
            "error",
            [
                c("existence_error", [atom("procedure"), indicator("atom_length", 2)]),
                indicator("atom_length", 2),
            ],
        )),
    );
}

#[test]
fn stack_exhaustion_is_not_catchable() {
    let mut machine = MachineBuilder::default().with_stack_limits(200, 200).build();

    machine
        .consult([clause(atom("deep"), Term::conjunction([atom("deep"), atom("true")]))])
        .unwrap();

    let query = c("catch", [atom("deep"), var("_"), atom("true")]);
    let result: Result<Vec<_>, _> = machine.run_query(query).collect();

    assert_eq!(
        result,
        Err(c("error", [c("resource_error", [atom("frames")]), atom("engine")])),
    );
}

#[test]
fn cyclic_terms_fail_to_compare() {
    let mut machine = MachineBuilder::default().with_max_depth(64).build();

    let query = Term::conjunction([
        c("=", [var("X"), c("f", [var("X")])]),
        c("=", [var("Y"), c("f", [var("Y")])]),
        c("==", [var("X"), var("Y")]),
    ]);

    let answers: Vec<_> = machine.run_query(query).collect::<Result<_, _>>().unwrap();

    assert_eq!(answers, [cutpoint::LeafAnswer::False]);
}
