use crate::Framework;

use super::{Field, FieldKind};

/// Visitor over the structural hierarchy of a network.
pub trait ModuleVisitor {
    /// Called when entering a sub-module.
    fn enter_module(&mut self, _name: &str) {}

    /// Called when leaving a sub-module.
    fn exit_module(&mut self, _name: &str) {}

    /// Called for every field of the current module.
    fn visit_field(&mut self, name: &str, field: &Field);
}

/// A flat key recorded by the [`Collector`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectedKey {
    /// Flat key in the framework's spelling.
    pub key: String,
    /// Structural path of the field, including its own name.
    pub path: Vec<String>,
    /// Parameter or buffer.
    pub kind: FieldKind,
    /// Original insertion position.
    pub position: usize,
}

/// Collects the flat keys of a network in its original order.
pub struct Collector {
    framework: Framework,
    include_buffers: bool,
    path_stack: Vec<String>,
    /// Keys gathered so far.
    pub keys: Vec<CollectedKey>,
}

impl Collector {
    /// Create a collector spelling keys the way `framework` does.
    pub fn new(framework: Framework, include_buffers: bool) -> Self {
        Self {
            framework,
            include_buffers,
            path_stack: Vec::new(),
            keys: Vec::new(),
        }
    }

    /// Keys sorted by original insertion position.
    pub fn into_sorted(mut self) -> Vec<CollectedKey> {
        self.keys.sort_by_key(|collected| collected.position);
        self.keys
    }
}

impl ModuleVisitor for Collector {
    fn enter_module(&mut self, name: &str) {
        self.path_stack.push(name.to_string());
    }

    fn exit_module(&mut self, _name: &str) {
        self.path_stack.pop();
    }

    fn visit_field(&mut self, name: &str, field: &Field) {
        if field.kind == FieldKind::Buffer && !self.include_buffers {
            return;
        }

        let mut path = self.path_stack.clone();
        path.push(name.to_string());

        self.keys.push(CollectedKey {
            key: self.framework.join_key(&path),
            path,
            kind: field.kind,
            position: field.position,
        });
    }
}
