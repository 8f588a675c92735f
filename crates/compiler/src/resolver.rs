//! Static resolution
//!
//! Resolves identifiers and dotted names against a scope chain without
//! emitting anything. Used by the emitter at call sites, by the constant
//! interpreter, and for super lookups. A `None` result means "not
//! statically known"; depending on context that is either a runtime
//! dispatch or a hard error.

use crate::ast::{Node, NodeId};
use crate::compiler::Compiler;
use crate::scope::{ScopeEntry, ScopeId};

impl<'z> Compiler<'z> {
    /// The declaration an identifier statically resolves to, if any.
    pub fn resolve_identifier(&self, node: NodeId, scope: ScopeId) -> Option<NodeId> {
        let Node::Identifier { id, .. } = self.builder.node(node) else {
            return None;
        };
        match self.scopes.lookup(scope, *id)? {
            ScopeEntry::Member(member) => self.scopes.member(member).member,
            ScopeEntry::Decl(decl) => Some(self.scopes.decl(decl).node),
            ScopeEntry::Formal { .. } | ScopeEntry::Library { .. } => None,
        }
    }

    pub fn resolve_dot(&self, node: NodeId, scope: ScopeId) -> Option<NodeId> {
        match self.resolve_dot_entry(node, scope)? {
            ScopeEntry::Member(member) => self.scopes.member(member).member,
            ScopeEntry::Decl(decl) => Some(self.scopes.decl(decl).node),
            ScopeEntry::Formal { .. } | ScopeEntry::Library { .. } => None,
        }
    }

    pub fn resolve(&self, node: NodeId, scope: ScopeId) -> Option<NodeId> {
        match self.builder.node(node) {
            Node::Identifier { .. } => self.resolve_identifier(node, scope),
            Node::Dot { .. } => self.resolve_dot(node, scope),
            _ => None,
        }
    }

    pub fn resolve_identifier_entry(&self, node: NodeId, scope: ScopeId) -> Option<ScopeEntry> {
        let Node::Identifier { id, .. } = self.builder.node(node) else {
            return None;
        };
        self.scopes.lookup(scope, *id)
    }

    pub fn resolve_dot_entry(&self, node: NodeId, scope: ScopeId) -> Option<ScopeEntry> {
        let Node::Dot { object, name } = self.builder.node(node) else {
            return None;
        };
        match self.resolve_entry(*object, scope)? {
            ScopeEntry::Member(member) => {
                let declaration = self.scopes.member(member).member?;
                match self.builder.node(declaration) {
                    Node::Class(class) => {
                        let class_scope = class.scope?;
                        self.resolve_identifier_entry(*name, class_scope)
                    }
                    _ => None,
                }
            }
            ScopeEntry::Library { library, .. } => {
                let library_scope = self.library_scope(library);
                self.resolve_identifier_entry(*name, library_scope)
            }
            ScopeEntry::Decl(_) | ScopeEntry::Formal { .. } => None,
        }
    }

    pub fn resolve_entry(&self, node: NodeId, scope: ScopeId) -> Option<ScopeEntry> {
        match self.builder.node(node) {
            Node::Identifier { .. } => self.resolve_identifier_entry(node, scope),
            Node::Dot { .. } => self.resolve_dot_entry(node, scope),
            _ => None,
        }
    }

    /// Resolve a class's `extends` clause to the superclass node.
    pub fn resolve_super_class(&self, class_node: NodeId) -> Option<NodeId> {
        let data = self.builder.class(class_node);
        let superclass = data.superclass?;
        let scope = data.scope?;
        let resolved = self.resolve(superclass, scope)?;
        match self.builder.node(resolved) {
            Node::Class(_) => Some(resolved),
            _ => None,
        }
    }

    /// Walk up the superclass chain for a member with the given name.
    pub fn resolve_super_member(&self, class_node: NodeId, name_id: i32) -> Option<NodeId> {
        let superclass = self.resolve_super_class(class_node)?;
        let scope = self.builder.class(superclass).scope?;
        match self.scopes.lookup_local(scope, name_id) {
            Some(ScopeEntry::Member(member)) => match self.scopes.member(member).member {
                Some(node) => Some(node),
                None => self.resolve_super_member(superclass, name_id),
            },
            _ => self.resolve_super_member(superclass, name_id),
        }
    }
}
