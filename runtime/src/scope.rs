use crate::object::{self, ObjectData, ObjectRef};
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScopeKind {
    Globals,
    Locals,
    /// Pushed by With; expires once execution reaches `end`.
    With { end: usize },
}

#[derive(Debug)]
pub struct Scope {
    pub object: ObjectRef,
    pub kind: ScopeKind,
}

/// Name resolution chain for one activation: the globals base, an optional
/// locals frame, and any active With objects on top.
#[derive(Debug)]
pub struct ScopeChain {
    scopes: Vec<Scope>,
}

impl ScopeChain {
    pub fn new(globals: ObjectRef) -> Self {
        Self {
            scopes: vec![Scope {
                object: globals,
                kind: ScopeKind::Globals,
            }],
        }
    }

    /// Chain for a function activation: globals plus a fresh locals frame.
    pub fn for_call(globals: ObjectRef) -> Self {
        let mut chain = Self::new(globals);
        chain.scopes.push(Scope {
            object: ObjectData::new_object(),
            kind: ScopeKind::Locals,
        });
        chain
    }

    pub fn globals(&self) -> &ObjectRef {
        &self
            .scopes
            .first()
            .expect("scope chain keeps its globals base")
            .object
    }

    pub fn push_with(&mut self, object: ObjectRef, end: usize) {
        self.scopes.push(Scope {
            object,
            kind: ScopeKind::With { end },
        });
    }

    /// Drops every With scope whose region ended at or before `pc`.
    pub fn pop_expired_withs(&mut self, pc: usize) {
        while let Some(scope) = self.scopes.last() {
            match scope.kind {
                ScopeKind::With { end } if pc >= end => {
                    self.scopes.pop();
                }
                _ => break,
            }
        }
    }

    pub fn resolve(&self, name: &str) -> Option<Value> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| object::get_member(&scope.object, name))
    }

    /// Stores into the innermost scope that already knows the name, the
    /// globals otherwise.
    pub fn set(&self, name: &str, value: Value) {
        for scope in self.scopes.iter().rev() {
            if object::get_member(&scope.object, name).is_some() {
                object::set_member(&scope.object, name, value);
                return;
            }
        }
        object::set_member(self.globals(), name, value);
    }

    pub fn define_local(&self, name: &str, value: Value) {
        object::set_member(self.local_target(), name, value);
    }

    /// Declares without clobbering: an existing binding keeps its value.
    pub fn declare_local(&self, name: &str) {
        let target = self.local_target();
        if object::get_member(target, name).is_none() {
            object::set_member(target, name, Value::Undefined);
        }
    }

    /// Removes the innermost binding for `name` (Delete2). Reports whether a
    /// binding existed.
    pub fn delete(&self, name: &str) -> bool {
        for scope in self.scopes.iter().rev() {
            if object::get_member(&scope.object, name).is_some() {
                return object::delete_member(&scope.object, name);
            }
        }
        false
    }

    fn local_target(&self) -> &ObjectRef {
        self.scopes
            .iter()
            .rev()
            .find(|scope| matches!(scope.kind, ScopeKind::Locals))
            .map(|scope| &scope.object)
            .unwrap_or_else(|| self.globals())
    }
}
