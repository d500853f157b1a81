use crate::TensorData;

use super::ModuleVisitor;

/// Whether a field is a learnable parameter or a persistent buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Learnable parameter (weight, bias, gamma, beta, ...).
    Param,
    /// Persistent state carried next to the parameters (running statistics, indices, ...).
    Buffer,
}

/// A tensor attached to a module, remembering where it appeared in the source ordering.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    /// The tensor value.
    pub data: TensorData,
    /// Parameter or buffer.
    pub kind: FieldKind,
    pub(crate) position: usize,
}

impl Field {
    /// Original insertion position inside the owning network.
    pub fn position(&self) -> usize {
        self.position
    }
}

/// One level of the structural hierarchy of a network.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModuleNode {
    children: Vec<(String, ModuleNode)>,
    fields: Vec<(String, Field)>,
}

impl ModuleNode {
    /// Sub-module named `name`.
    pub fn child(&self, name: &str) -> Option<&ModuleNode> {
        self.children
            .iter()
            .find(|(child, _)| child == name)
            .map(|(_, node)| node)
    }

    /// Mutable sub-module named `name`.
    pub fn child_mut(&mut self, name: &str) -> Option<&mut ModuleNode> {
        self.children
            .iter_mut()
            .find(|(child, _)| child == name)
            .map(|(_, node)| node)
    }

    pub(crate) fn child_or_insert(&mut self, name: &str) -> &mut ModuleNode {
        let position = match self.children.iter().position(|(child, _)| child == name) {
            Some(position) => position,
            None => {
                self.children.push((name.to_string(), ModuleNode::default()));
                self.children.len() - 1
            }
        };
        &mut self.children[position].1
    }

    /// Field named `name` held directly by this module.
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, field)| field)
    }

    /// Mutable field named `name` held directly by this module.
    pub fn field_mut(&mut self, name: &str) -> Option<&mut Field> {
        self.fields
            .iter_mut()
            .find(|(field, _)| field == name)
            .map(|(_, field)| field)
    }

    pub(crate) fn insert_field(&mut self, name: &str, field: Field) -> Option<Field> {
        match self.field_mut(name) {
            Some(existing) => Some(core::mem::replace(existing, field)),
            None => {
                self.fields.push((name.to_string(), field));
                None
            }
        }
    }

    /// Names of the sub-modules, in insertion order.
    pub fn child_names(&self) -> impl Iterator<Item = &str> {
        self.children.iter().map(|(name, _)| name.as_str())
    }

    /// Names of the fields, in insertion order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    /// Walk the fields of this module, then every sub-module depth first.
    pub fn visit<V: ModuleVisitor>(&self, visitor: &mut V) {
        for (name, field) in self.fields.iter() {
            visitor.visit_field(name, field);
        }
        for (name, child) in self.children.iter() {
            visitor.enter_module(name);
            child.visit(visitor);
            visitor.exit_module(name);
        }
    }
}
