use crate::machine::arithmetic_ops::*;
use crate::machine::machine_errors::*;
use crate::machine::machine_state::*;
use crate::types::*;

use std::cmp::Ordering;

/// Rank of a term class in the standard order.
fn order_class(term: &Deref) -> u8 {
    match term {
        Deref::Var(_) => 0,
        Deref::Const(cell) if cell.is_number() => 1,
        Deref::Const(cell) => match cell.val {
            Value::Str(_) => 3,
            _ => 2,
        },
        Deref::Struct(..) => 4,
    }
}

fn number_order(c1: &Cell, c2: &Cell) -> Ordering {
    let (Some(n1), Some(n2)) = (Number::from_cell(c1), Number::from_cell(c2)) else {
        return Ordering::Equal;
    };

    match num_cmp(&n1, &n2) {
        Ordering::Equal => match (&n1, &n2) {
            (Number::Float(_), Number::Float(_)) => Ordering::Equal,
            (Number::Float(_), _) => Ordering::Less,
            (_, Number::Float(_)) => Ordering::Greater,
            _ => Ordering::Equal,
        },
        ord => ord,
    }
}

impl MachineState {
    fn atom_order(&self, c1: &Cell, c2: &Cell) -> Ordering {
        match (c1.name(), c2.name()) {
            (Some(n1), Some(n2)) if n1 == n2 => Ordering::Equal,
            (Some(n1), Some(n2)) => self.db.atom_name(n1).cmp(&self.db.atom_name(n2)),
            _ => Ordering::Equal,
        }
    }

    /// Compares two terms in the standard order: variables, numbers,
    /// atoms, strings, then compounds by arity, name and arguments.
    pub(crate) fn compare_terms(&self, t1: &Deref, t2: &Deref) -> Result<Ordering, CycleError> {
        let mut pdl = vec![(t1.clone(), t2.clone(), 0usize)];

        while let Some((t1, t2, depth)) = pdl.pop() {
            if depth > self.flags.max_depth {
                return Err(CycleError);
            }

            let (t1, t2) = (self.deref(&t1), self.deref(&t2));

            let ord = match (&t1, &t2) {
                (Deref::Var(v1), Deref::Var(v2)) => v1.cmp(v2),
                (Deref::Const(c1), Deref::Const(c2)) if c1.is_number() && c2.is_number() => {
                    number_order(c1, c2)
                }
                (Deref::Const(c1), Deref::Const(c2)) => match (&c1.val, &c2.val) {
                    (Value::Str(s1), Value::Str(s2)) => s1.cmp(s2),
                    (Value::Str(_), _) | (_, Value::Str(_)) => {
                        order_class(&t1).cmp(&order_class(&t2))
                    }
                    _ if c1.is_number() || c2.is_number() => {
                        order_class(&t1).cmp(&order_class(&t2))
                    }
                    _ => self.atom_order(c1, c2),
                },
                (Deref::Struct(l1, ctx1), Deref::Struct(l2, ctx2)) => {
                    if ctx1 == ctx2 && l1 == l2 {
                        continue;
                    }

                    let (h1, h2) = (self.cell(l1), self.cell(l2));
                    let ord = h1
                        .arity
                        .cmp(&h2.arity)
                        .then_with(|| self.atom_order(h1, h2));

                    if ord == Ordering::Equal && h1.is_list_cons() {
                        let mut pairs = self.zip_lists(&t1, &t2)?;

                        if let Some((rest1, rest2)) = pairs.pop() {
                            pdl.push((rest1, rest2, depth));
                        }

                        for (a1, a2) in pairs.into_iter().rev() {
                            pdl.push((a1, a2, depth + 1));
                        }
                    } else if ord == Ordering::Equal {
                        let args1 = self.arg_locs(l1);
                        let args2 = self.arg_locs(l2);

                        for (a1, a2) in args1.iter().zip(args2.iter()).rev() {
                            pdl.push((
                                self.deref_loc(a1, *ctx1),
                                self.deref_loc(a2, *ctx2),
                                depth + 1,
                            ));
                        }
                    }

                    ord
                }
                _ => order_class(&t1).cmp(&order_class(&t2)),
            };

            if ord != Ordering::Equal {
                return Ok(ord);
            }
        }

        Ok(Ordering::Equal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forms::*;

    use std::rc::Rc;

    #[test]
    fn standard_order_of_classes() {
        let mut machine = MachineState::for_tests();
        let a = machine.db.atom("a");
        let f = machine.db.atom("f");

        let terms = Tree::Struct(
            machine.db.atom("t"),
            vec![
                Tree::Var(0),
                Tree::Literal(Literal::Float(1.0.into())),
                Tree::fixnum(1),
                Tree::fixnum(2),
                Tree::Atom(a),
                Tree::Literal(Literal::Str(Rc::from("a"))),
                Tree::Struct(f, vec![Tree::fixnum(9)]),
                Tree::Struct(a, vec![Tree::fixnum(1), Tree::fixnum(1)]),
            ],
        );

        let terms = machine.import_tree(&terms).unwrap();
        let args: Vec<Deref> = (0..8)
            .map(|n| machine.struct_arg(&terms, n).unwrap())
            .collect();

        for pair in args.windows(2) {
            assert_eq!(
                machine.compare_terms(&pair[0], &pair[1]),
                Ok(Ordering::Less),
                "{pair:?}"
            );
        }
    }

    #[test]
    fn compounds_compare_by_arity_then_name_then_args() {
        let mut machine = MachineState::for_tests();
        let (a, b) = (machine.db.atom("a"), machine.db.atom("b"));

        let terms = Tree::Struct(
            machine.db.atom("t"),
            vec![
                Tree::Struct(b, vec![Tree::fixnum(1)]),
                Tree::Struct(a, vec![Tree::fixnum(1), Tree::fixnum(0)]),
                Tree::Struct(a, vec![Tree::fixnum(1), Tree::fixnum(2)]),
            ],
        );

        let terms = machine.import_tree(&terms).unwrap();
        let t0 = machine.struct_arg(&terms, 0).unwrap();
        let t1 = machine.struct_arg(&terms, 1).unwrap();
        let t2 = machine.struct_arg(&terms, 2).unwrap();

        assert_eq!(machine.compare_terms(&t0, &t1), Ok(Ordering::Less));
        assert_eq!(machine.compare_terms(&t1, &t2), Ok(Ordering::Less));
        assert_eq!(machine.compare_terms(&t2, &t2.clone()), Ok(Ordering::Equal));
    }

    #[test]
    fn long_lists_compare_element_by_element() {
        let mut machine = MachineState::for_tests();
        machine.flags.max_depth = 100;

        let list = |last: i64| {
            let mut items: Vec<Tree> = (0..5_000).map(Tree::fixnum).collect();
            items.push(Tree::fixnum(last));
            Tree::list(items, Tree::Atom(atom!("[]")))
        };

        let l1 = machine.import_tree(&list(1)).unwrap();
        let l2 = machine.import_tree(&list(2)).unwrap();
        let l3 = machine.import_tree(&list(1)).unwrap();

        assert_eq!(machine.compare_terms(&l1, &l2), Ok(Ordering::Less));
        assert_eq!(machine.compare_terms(&l1, &l3), Ok(Ordering::Equal));
    }
}
