use crate::atom_table::*;
use crate::forms::*;
use crate::machine::machine_errors::*;
use crate::machine::machine_state::*;
use crate::machine::stack::*;
use crate::types::*;

use std::mem;
use std::rc::Rc;

impl MachineState {
    fn attributed_var(&self) -> Result<VarRef, MachineError> {
        match self.arg(0) {
            Deref::Var(var) => Ok(var),
            term => Err(self.type_error(ValidType::Variable, &term)),
        }
    }

    #[inline]
    pub(crate) fn attrs_of(&self, var: VarRef) -> Option<AttrList> {
        self.slot(var).and_then(|slot| slot.attrs.clone())
    }

    /// The value module `module` attached to `var`, if any.
    pub(crate) fn get_attr_value(&self, var: VarRef, module: Atom) -> Option<Deref> {
        let attrs = self.attrs_of(var)?;

        attrs
            .iter()
            .find(|(name, _, _)| *name == module)
            .map(|(_, cell, ctx)| self.decode_value(cell, *ctx))
    }

    /// Attaches `value` under `module`, replacing any previous value.
    pub(crate) fn put_attr_value(&mut self, var: VarRef, module: Atom, value: &Deref) {
        let (cell, ctx) = self.encode_value(var.ctx, value);
        let mut attrs: Vec<_> = self
            .attrs_of(var)
            .map(|attrs| attrs.iter().cloned().collect())
            .unwrap_or_default();

        match attrs.iter_mut().find(|(name, _, _)| *name == module) {
            Some(entry) => *entry = (module, cell, ctx),
            None => attrs.push((module, cell, ctx)),
        }

        self.set_attrs(var, Some(Rc::new(attrs)));
    }

    pub(crate) fn put_attr(&mut self) -> CallResult {
        let var = self.attributed_var()?;
        let module = self.atom_value(&self.arg(1))?;
        let value = self.arg(2);

        self.put_attr_value(var, module, &value);
        Ok(true)
    }

    pub(crate) fn get_attr(&mut self) -> CallResult {
        let Deref::Var(var) = self.arg(0) else {
            return Ok(false);
        };

        let module = self.atom_value(&self.arg(1))?;

        match self.get_attr_value(var, module) {
            Some(value) => Ok(self.unify_arg(2, &value)),
            None => Ok(false),
        }
    }

    pub(crate) fn del_attr(&mut self) -> CallResult {
        let Deref::Var(var) = self.arg(0) else {
            return Ok(true);
        };

        let module = self.atom_value(&self.arg(1))?;

        let Some(attrs) = self.attrs_of(var) else {
            return Ok(true);
        };

        if attrs.iter().all(|(name, _, _)| *name != module) {
            return Ok(true);
        }

        let rest: Vec<_> = attrs
            .iter()
            .filter(|(name, _, _)| *name != module)
            .cloned()
            .collect();

        let rest = if rest.is_empty() {
            None
        } else {
            Some(Rc::new(rest))
        };

        self.set_attrs(var, rest);
        Ok(true)
    }

    /// `freeze/2`: delays a goal until its variable is bound. Goals
    /// frozen on the same variable run in the order they were frozen.
    pub(crate) fn freeze(&mut self) -> CallResult {
        let goal = self.arg(1);

        let Deref::Var(var) = self.arg(0) else {
            return self.call_goal(&goal, &[], false);
        };

        let goals = match self.get_attr_value(var, atom!("freeze")) {
            Some(frozen) => match self.build_struct(atom!(","), 2, &[frozen, goal]) {
                Some(goals) => goals,
                None => return Ok(false),
            },
            None => goal,
        };

        self.put_attr_value(var, atom!("freeze"), &goals);
        Ok(true)
    }

    /// Turns the bindings of attributed variables made by the last goal
    /// into goals run before `next`. Frozen goals are re-frozen when
    /// their variable was bound to another variable; every other module
    /// has its `attr_unify_hook/2` called.
    pub(crate) fn wake_attr_goals(&mut self, next: Loc) -> Result<Option<Loc>, MachineError> {
        let bindings = mem::take(&mut self.attr_bindings);
        let mut goals = vec![];

        for (var, attrs) in bindings {
            let value = self.deref_var(var);

            for (module, cell, ctx) in attrs.iter() {
                let attr = self.decode_value(cell, *ctx);

                let goal = if *module == atom!("freeze") {
                    self.build_struct(atom!("freeze"), 2, &[value.clone(), attr])
                } else {
                    let hook = self.build_struct(atom!("attr_unify_hook"), 2, &[attr, value.clone()]);
                    let module = Deref::Const(Cell::atom(*module));

                    hook.and_then(|hook| self.build_struct(atom!(":"), 2, &[module, hook]))
                };

                match goal {
                    Some(goal) => goals.push(goal),
                    None => return Ok(None),
                }
            }
        }

        let Some(last) = goals.len().checked_sub(1) else {
            return Ok(Some(next));
        };

        tracing::trace!(goals = goals.len(), "waking attributed variables");

        let tree = (0..last as u32)
            .rev()
            .fold(Tree::Var(last as u32), |rest, n| {
                Tree::Struct(atom!(","), vec![Tree::Var(n), rest])
            });

        self.compile_template(&tree, &goals, Cell::end(Cont::To(next), None))
    }
}
