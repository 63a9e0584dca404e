use criterion::{black_box, criterion_group, criterion_main, Criterion};

use cutpoint::{LeafAnswer, Machine, MachineBuilder, Term};

fn var(name: &str) -> Term {
    Term::variable(name)
}

fn cons(head: Term, tail: Term) -> Term {
    Term::compound(".", [head, tail])
}

fn clause(head: Term, body: Term) -> Term {
    Term::compound(":-", [head, body])
}

/// Naive reverse over an append/3 that leaves no choice points on
/// proper lists.
fn nrev_program() -> Vec<Term> {
    vec![
        Term::compound("app", [Term::list([]), var("L"), var("L")]),
        clause(
            Term::compound("app", [cons(var("H"), var("T")), var("L"), cons(var("H"), var("R"))]),
            Term::compound("app", [var("T"), var("L"), var("R")]),
        ),
        Term::compound("nrev", [Term::list([]), Term::list([])]),
        clause(
            Term::compound("nrev", [cons(var("H"), var("T")), var("R")]),
            Term::conjunction([
                Term::compound("nrev", [var("T"), var("RT")]),
                Term::compound("app", [var("RT"), Term::list([var("H")]), var("R")]),
            ]),
        ),
    ]
}

fn count_program() -> Vec<Term> {
    vec![
        Term::compound("count", [var("N"), var("N")]),
        clause(
            Term::compound("count", [var("I"), var("N")]),
            Term::conjunction([
                Term::compound("<", [var("I"), var("N")]),
                Term::compound("is", [var("I1"), Term::compound("+", [var("I"), Term::integer(1)])]),
                Term::compound("count", [var("I1"), var("N")]),
            ]),
        ),
    ]
}

fn machine(tco: bool, program: Vec<Term>) -> Machine {
    let mut machine = MachineBuilder::default().with_tco(tco).build();
    machine.consult(program).unwrap();
    machine
}

fn first_answer(machine: &mut Machine, query: Term) -> LeafAnswer {
    machine.run_query(query).next().unwrap().unwrap()
}

fn bench_criterion(c: &mut Criterion) {
    let mut nrev = machine(true, nrev_program());
    let input = Term::list((0..30).map(Term::integer));

    c.bench_function("nrev30", |b| {
        b.iter(|| {
            let query = Term::compound("nrev", [black_box(input.clone()), var("R")]);
            black_box(first_answer(&mut nrev, query))
        })
    });

    for tco in [true, false] {
        let mut count = machine(tco, count_program());
        let name = if tco { "count_tco" } else { "count_no_tco" };

        c.bench_function(name, |b| {
            b.iter(|| {
                let query = Term::compound("count", [Term::integer(0), black_box(Term::integer(10_000))]);
                black_box(first_answer(&mut count, query))
            })
        });
    }
}

criterion_group!(
    name = bench_group;
    config = Criterion::default().sample_size(10);
    targets = bench_criterion
);
criterion_main!(bench_group);
