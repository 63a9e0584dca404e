use crate::machine::machine_state::*;
use crate::types::*;

/// Value equality of two atomic cells of the same kind. Integers are
/// normalized on construction, so a fixnum never equals a big integer.
pub(crate) fn const_eq(c1: &Cell, c2: &Cell) -> bool {
    match (&c1.val, &c2.val) {
        (Value::Atom(n1), Value::Atom(n2)) => n1 == n2 && c1.arity == c2.arity,
        (Value::Str(s1), Value::Str(s2)) => s1 == s2,
        (Value::Fixnum(n1), Value::Fixnum(n2)) => n1 == n2,
        (Value::Integer(n1), Value::Integer(n2)) => n1 == n2,
        (Value::Rational(r1), Value::Rational(r2)) => r1 == r2,
        (Value::Float(f1), Value::Float(f2)) => f1 == f2,
        _ => false,
    }
}

impl MachineState {
    /// Binds the newer of two unbound variables to the older one.
    fn bind_vars(&mut self, v1: VarRef, v2: VarRef) {
        if v1 > v2 {
            self.set_var(v1, &Deref::Var(v2));
        } else {
            self.set_var(v2, &Deref::Var(v1));
        }
    }

    /// Unifies two terms over an explicit push-down list. Bindings made
    /// before a failure are left for the caller's choice point to undo.
    pub(crate) fn unify(&mut self, t1: &Deref, t2: &Deref) -> bool {
        let mut pdl = vec![(t1.clone(), t2.clone(), 0usize)];

        while let Some((t1, t2, depth)) = pdl.pop() {
            if depth > self.flags.max_depth {
                self.cycle_error = true;
                return false;
            }

            match (self.deref(&t1), self.deref(&t2)) {
                (Deref::Var(v1), Deref::Var(v2)) => {
                    if v1 != v2 {
                        self.bind_vars(v1, v2);
                    }
                }
                (Deref::Var(var), value) | (value, Deref::Var(var)) => {
                    self.set_var(var, &value);
                }
                (Deref::Const(c1), Deref::Const(c2)) => {
                    if !const_eq(&c1, &c2) {
                        return false;
                    }
                }
                (Deref::Struct(l1, ctx1), Deref::Struct(l2, ctx2)) => {
                    if ctx1 == ctx2 && l1 == l2 {
                        continue;
                    }

                    let (h1, h2) = (self.cell(&l1), self.cell(&l2));

                    if h1.arity != h2.arity || h1.name() != h2.name() {
                        return false;
                    }

                    if h1.is_list_cons() {
                        let lists = (Deref::Struct(l1, ctx1), Deref::Struct(l2, ctx2));

                        let Ok(mut pairs) = self.zip_lists(&lists.0, &lists.1) else {
                            self.cycle_error = true;
                            return false;
                        };

                        if let Some((rest1, rest2)) = pairs.pop() {
                            pdl.push((rest1, rest2, depth));
                        }

                        for (a1, a2) in pairs.into_iter().rev() {
                            pdl.push((a1, a2, depth + 1));
                        }

                        continue;
                    }

                    let args1 = self.arg_locs(&l1);
                    let args2 = self.arg_locs(&l2);

                    for (a1, a2) in args1.iter().zip(args2.iter()).rev() {
                        pdl.push((
                            self.deref_loc(a1, ctx1),
                            self.deref_loc(a2, ctx2),
                            depth + 1,
                        ));
                    }
                }
                _ => return false,
            }
        }

        true
    }

    /// Unifies argument `n` of the current goal with `value`.
    #[inline]
    pub(crate) fn unify_arg(&mut self, n: usize, value: &Deref) -> bool {
        let arg = self.arg(n);
        self.unify(&arg, value)
    }
}
