//! Lexical scope chain used to assign local-variable slots.
//!
//! Each scope owns a name→variable map; lookup walks outward to the
//! root, which carries the enclosing declaration's type. Slot indices
//! are contiguous within a scope, start after the implicit `this`
//! slot for instance bodies, and wide types reserve two slots.

use std::collections::BTreeMap;

use crate::ir::TypeRef;

#[derive(Debug, Clone, PartialEq)]
pub struct LocalVar {
    pub name: String,
    pub slot: u16,
    pub ty: TypeRef,
}

#[derive(Debug, Default)]
struct Scope {
    vars: BTreeMap<String, LocalVar>,
    /// First slot this scope allocated, restored on exit.
    base_slot: u16,
}

#[derive(Debug)]
pub struct ScopeChain {
    /// Internal name of the enclosing type declaration.
    enclosing_type: String,
    /// Innermost scope last.
    scopes: Vec<Scope>,
    next_slot: u16,
    has_this: bool,
}

impl ScopeChain {
    /// `has_this` reserves slot 0 for the receiver of instance bodies.
    pub fn new(enclosing_type: &str, has_this: bool) -> ScopeChain {
        let next_slot = if has_this { 1 } else { 0 };
        ScopeChain {
            enclosing_type: enclosing_type.to_string(),
            scopes: vec![Scope {
                vars: BTreeMap::new(),
                base_slot: next_slot,
            }],
            next_slot,
            has_this,
        }
    }

    pub fn enclosing_type(&self) -> &str {
        &self.enclosing_type
    }

    pub fn this_slot(&self) -> Option<u16> {
        self.has_this.then_some(0)
    }

    pub fn enter(&mut self) {
        self.scopes.push(Scope {
            vars: BTreeMap::new(),
            base_slot: self.next_slot,
        });
    }

    /// Leaves the innermost scope; its slot range becomes reusable.
    /// The root scope is never popped.
    pub fn exit(&mut self) {
        if self.scopes.len() > 1 {
            if let Some(scope) = self.scopes.pop() {
                self.next_slot = scope.base_slot;
            }
        }
    }

    /// Declares a variable in the innermost scope, assigning the next
    /// contiguous slot. Returns `None` when the name already exists in
    /// this scope (a user error for the caller to report).
    pub fn declare(&mut self, name: &str, ty: TypeRef) -> Option<LocalVar> {
        let slot = self.next_slot;
        let words = ty.slot_words().max(1);
        let scope = self.scopes.last_mut()?;
        if scope.vars.contains_key(name) {
            return None;
        }
        let var = LocalVar {
            name: name.to_string(),
            slot,
            ty,
        };
        scope.vars.insert(name.to_string(), var.clone());
        self.next_slot += words;
        Some(var)
    }

    /// Walks outward from the innermost scope.
    pub fn lookup(&self, name: &str) -> Option<&LocalVar> {
        self.scopes.iter().rev().find_map(|scope| scope.vars.get(name))
    }

    /// Slots in use right now, the floor for a tracker's max_locals.
    pub fn slots_used(&self) -> u16 {
        self.next_slot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_bodies_reserve_the_this_slot() {
        let mut chain = ScopeChain::new("demo/Main", true);
        assert_eq!(chain.this_slot(), Some(0));
        let x = chain.declare("x", TypeRef::Int).unwrap();
        assert_eq!(x.slot, 1);
    }

    #[test]
    fn static_bodies_start_at_slot_zero() {
        let mut chain = ScopeChain::new("demo/Main", false);
        assert_eq!(chain.this_slot(), None);
        assert_eq!(chain.declare("x", TypeRef::Int).unwrap().slot, 0);
    }

    #[test]
    fn wide_variables_take_two_slots() {
        let mut chain = ScopeChain::new("demo/Main", false);
        chain.declare("a", TypeRef::Long).unwrap();
        let b = chain.declare("b", TypeRef::Int).unwrap();
        assert_eq!(b.slot, 2);
        assert_eq!(chain.slots_used(), 3);
    }

    #[test]
    fn lookup_walks_outward_and_inner_shadows() {
        let mut chain = ScopeChain::new("demo/Main", false);
        chain.declare("x", TypeRef::Int).unwrap();
        chain.enter();
        chain.declare("x", TypeRef::Long).unwrap();
        assert_eq!(chain.lookup("x").unwrap().ty, TypeRef::Long);
        chain.exit();
        assert_eq!(chain.lookup("x").unwrap().ty, TypeRef::Int);
    }

    #[test]
    fn duplicate_in_same_scope_is_rejected() {
        let mut chain = ScopeChain::new("demo/Main", false);
        chain.declare("x", TypeRef::Int).unwrap();
        assert!(chain.declare("x", TypeRef::Int).is_none());
    }

    #[test]
    fn exit_releases_the_scopes_slot_range() {
        let mut chain = ScopeChain::new("demo/Main", false);
        chain.declare("a", TypeRef::Int).unwrap();
        chain.enter();
        chain.declare("b", TypeRef::Int).unwrap();
        assert_eq!(chain.slots_used(), 2);
        chain.exit();
        assert_eq!(chain.slots_used(), 1);
    }
}
