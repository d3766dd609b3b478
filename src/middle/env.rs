//! Scopes: variable/function declarations and the stack of lexical frames
//! the environment analyzer and IR generator both walk.

use crate::common::{Id, Map};
use crate::front::ast::Type;

#[derive(Clone, Debug)]
pub struct Variable {
    pub name: Id,
    pub ty: Type,
}

#[derive(Clone, Debug)]
pub struct Function {
    pub name: Id,
    pub return_type: Type,
    pub params: Vec<Type>,
}

/// A single lexical frame: the set of names declared directly within it.
#[derive(Clone, Debug, Default)]
pub struct Environment {
    pub variables: Map<Id, Variable>,
    pub functions: Map<Id, Function>,
}

impl Environment {
    pub fn has_identifier(&self, name: Id) -> bool {
        self.variables.contains_key(&name) || self.functions.contains_key(&name)
    }
}

fn native_functions() -> Vec<Function> {
    use crate::front::ast::TypeKind;
    vec![Function {
        name: Id::new("write".to_string()),
        return_type: Type::con(TypeKind::None),
        params: vec![
            Type::con(TypeKind::I32),
            Type::pointer(Type::con(TypeKind::I8)),
            Type::con(TypeKind::I32),
        ],
    }]
}

/// A stack of lexical frames. The bottom frame is pre-populated with the
/// native functions available to every program.
///
/// Lookup walks from the most recently pushed frame down to the bottom, so
/// an inner declaration shadows an outer one of the same name.
#[derive(Clone, Debug)]
pub struct EnvironmentStack {
    envs: Vec<Environment>,
}

impl EnvironmentStack {
    pub fn new() -> Self {
        let mut global = Environment::default();
        for f in native_functions() {
            global.functions.insert(f.name, f);
        }
        EnvironmentStack { envs: vec![global] }
    }

    pub fn push(&mut self) {
        self.envs.push(Environment::default());
    }

    pub fn pop(&mut self) -> Environment {
        self.envs.pop().expect("environment stack underflow")
    }

    pub fn get_variable(&self, name: Id) -> Option<&Variable> {
        self.envs.iter().rev().find_map(|e| e.variables.get(&name))
    }

    pub fn get_function(&self, name: Id) -> Option<&Function> {
        self.envs.iter().rev().find_map(|e| e.functions.get(&name))
    }

    /// Whether `name` is already declared in the innermost (current) frame.
    /// Redeclaration is only rejected within the same frame; shadowing an
    /// outer declaration is fine.
    pub fn declared_in_current_frame(&self, name: Id) -> bool {
        self.envs
            .last()
            .expect("environment stack is never empty")
            .has_identifier(name)
    }

    pub fn declare_variable(&mut self, variable: Variable) {
        let frame = self.envs.last_mut().expect("environment stack is never empty");
        frame.variables.insert(variable.name, variable);
    }

    pub fn declare_function(&mut self, function: Function) {
        let frame = self.envs.last_mut().expect("environment stack is never empty");
        frame.functions.insert(function.name, function);
    }

    pub fn depth(&self) -> usize {
        self.envs.len()
    }

    /// Strips every frame but the bottom (global/native) one, returning the
    /// stripped frames so the caller can restore them later. Used when
    /// entering a function body: the body can only see globals and its own
    /// locals, never the locals of whatever block it was declared inside.
    pub fn truncate_to_global(&mut self) -> Vec<Environment> {
        self.envs.split_off(1)
    }

    pub fn restore(&mut self, frames: Vec<Environment>) {
        self.envs.extend(frames);
    }
}

impl Default for EnvironmentStack {
    fn default() -> Self {
        EnvironmentStack::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::front::ast::TypeKind;

    #[test]
    fn inner_frame_shadows_outer() {
        let mut stack = EnvironmentStack::new();
        stack.declare_variable(Variable {
            name: Id::new("x".to_string()),
            ty: Type::con(TypeKind::I32),
        });
        stack.push();
        stack.declare_variable(Variable {
            name: Id::new("x".to_string()),
            ty: Type::con(TypeKind::Bool),
        });
        let found = stack.get_variable(Id::new("x".to_string())).unwrap();
        assert_eq!(found.ty, Type::con(TypeKind::Bool));
        stack.pop();
        let found = stack.get_variable(Id::new("x".to_string())).unwrap();
        assert_eq!(found.ty, Type::con(TypeKind::I32));
    }

    #[test]
    fn native_write_is_preregistered() {
        let stack = EnvironmentStack::new();
        assert!(stack.get_function(Id::new("write".to_string())).is_some());
    }

    #[test]
    fn redeclaration_check_is_scoped_to_current_frame() {
        let mut stack = EnvironmentStack::new();
        let x = Id::new("x".to_string());
        stack.declare_variable(Variable {
            name: x,
            ty: Type::con(TypeKind::I32),
        });
        stack.push();
        assert!(!stack.declared_in_current_frame(x));
        stack.declare_variable(Variable {
            name: x,
            ty: Type::con(TypeKind::I32),
        });
        assert!(stack.declared_in_current_frame(x));
    }
}
