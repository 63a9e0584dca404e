use cutpoint::{LeafAnswer, Machine, MachineBuilder, Term};

pub fn var(name: &str) -> Term {
    Term::variable(name)
}

pub fn atom(name: &str) -> Term {
    Term::atom(name)
}

pub fn int(n: i64) -> Term {
    Term::integer(n)
}

pub fn c<const N: usize>(name: &str, args: [Term; N]) -> Term {
    Term::compound(name, args)
}

pub fn clause(head: Term, body: Term) -> Term {
    c(":-", [head, body])
}

pub fn cons(head: Term, tail: Term) -> Term {
    c(".", [head, tail])
}

pub fn ints(items: &[i64]) -> Term {
    Term::list(items.iter().map(|n| int(*n)))
}

pub fn indicator(name: &str, arity: i64) -> Term {
    c("/", [atom(name), int(arity)])
}

pub fn bindings<const N: usize>(pairs: [(&str, Term); N]) -> LeafAnswer {
    LeafAnswer::from_bindings(pairs)
}

/// The answer of a query whose named variables all stayed unbound.
pub fn unbound() -> LeafAnswer {
    LeafAnswer::from_bindings(Vec::<(String, Term)>::new())
}

pub fn answers(machine: &mut Machine, query: Term) -> Vec<LeafAnswer> {
    machine.run_query(query).collect::<Result<_, _>>().unwrap()
}

/// The formal part of the `error(Formal, Context)` a query raises.
pub fn error_formal(machine: &mut Machine, query: Term) -> Term {
    match machine.run_query(query).collect::<Result<Vec<_>, _>>() {
        Err(Term::Compound(name, mut args)) if name == "error" && args.len() == 2 => {
            args.swap_remove(0)
        }
        result => panic!("expected an error, got {result:?}"),
    }
}

pub fn member_program() -> Vec<Term> {
    vec![
        c("member", [var("X"), cons(var("X"), var("_"))]),
        clause(
            c("member", [var("X"), cons(var("_"), var("T"))]),
            c("member", [var("X"), var("T")]),
        ),
    ]
}

pub fn count_program() -> Vec<Term> {
    vec![
        c("count", [var("N"), var("N")]),
        clause(
            c("count", [var("I"), var("N")]),
            Term::conjunction([
                c("<", [var("I"), var("N")]),
                c("is", [var("I1"), c("+", [var("I"), int(1)])]),
                c("count", [var("I1"), var("N")]),
            ]),
        ),
    ]
}

pub fn machine_with(program: Vec<Term>) -> Machine {
    let mut machine = MachineBuilder::default().build();
    machine.consult(program).unwrap();
    machine
}
