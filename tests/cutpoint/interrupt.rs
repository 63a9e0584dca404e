use crate::helper::*;
use cutpoint::{InterruptAction, LeafAnswer, MachineBuilder, Term, INTERRUPT};
use serial_test::serial;

use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;

fn endless() -> Term {
    Term::conjunction([atom("repeat"), atom("fail")])
}

#[serial]
#[test]
fn interrupt_aborts_by_default() {
    let mut machine = MachineBuilder::default().build();

    let raiser = thread::spawn(|| {
        thread::sleep(Duration::from_millis(20));
        INTERRUPT.store(true, Ordering::Relaxed);
    });

    assert_eq!(machine.run_query(endless()).next(), None);
    raiser.join().unwrap();

    assert!(!INTERRUPT.load(Ordering::Relaxed));
    assert_eq!(answers(&mut machine, atom("true")), [LeafAnswer::True]);
}

#[serial]
#[test]
fn interrupt_callback_can_halt() {
    let mut machine = MachineBuilder::default()
        .with_interrupt_callback(Box::new(|| InterruptAction::Halt(7)))
        .build();

    INTERRUPT.store(true, Ordering::Relaxed);

    assert_eq!(machine.run_query(endless()).next(), None);
    assert_eq!(machine.halted(), Some(7));
}

#[serial]
#[test]
fn interrupt_callback_can_continue() {
    let mut machine = MachineBuilder::default()
        .with_interrupt_callback(Box::new(|| InterruptAction::Continue))
        .build();

    INTERRUPT.store(true, Ordering::Relaxed);

    let query = c("=", [var("X"), int(1)]);
    assert_eq!(answers(&mut machine, query), [bindings([("X", int(1))])]);
    assert!(!INTERRUPT.load(Ordering::Relaxed));
}

#[serial]
#[test]
fn tracing_reports_ports() {
    use std::cell::RefCell;
    use std::rc::Rc;

    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::TRACE)
        .try_init();

    let events = Rc::new(RefCell::new(vec![]));
    let sink = events.clone();

    let mut machine = MachineBuilder::default()
        .with_trace(true)
        .with_trace_callback(Box::new(move |event| {
            sink.borrow_mut().push((event.port, event.goal.to_string()));
        }))
        .build();

    machine.consult(member_program()).unwrap();

    let query = c("member", [var("X"), ints(&[1])]);
    assert_eq!(answers(&mut machine, query)[0], bindings([("X", int(1))]));

    let events = events.borrow();

    assert!(events
        .iter()
        .any(|(port, goal)| *port == cutpoint::Port::Call && goal.starts_with("member(")));
}
