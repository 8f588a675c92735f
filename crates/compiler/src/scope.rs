//! Scopes
//!
//! A scope is a chained map from canonical identifier ids to scope
//! entries. All scopes of a compile live in one arena and are addressed
//! by `ScopeId`; entries that carry mutable resolution state (members
//! with getters/setters, local declarations with capture kinds) live in
//! side arenas so the entries themselves stay `Copy`.

use crate::ast::NodeId;
use crate::map::IdMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeclId(u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemberId(u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureKind {
    NotCaptured,
    ByValue,
    ByReference,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeEntry {
    /// A prefixed library import.
    Library { name: i32, library: NodeId },
    /// A top-level or class member (method, field, or class).
    Member(MemberId),
    /// A formal parameter at a fixed frame index.
    Formal { index: i32 },
    /// A local declaration with capture state.
    Decl(DeclId),
}

#[derive(Debug, Clone)]
pub struct MemberData {
    pub name: i32,
    pub member: Option<NodeId>,
    pub setter: Option<NodeId>,
}

#[derive(Debug, Clone)]
pub struct DeclData {
    pub node: NodeId,
    pub index: i32,
    pub capture: CaptureKind,
}

impl DeclData {
    pub fn is_captured(&self) -> bool {
        self.capture != CaptureKind::NotCaptured
    }
}

struct ScopeData {
    outer: Option<ScopeId>,
    map: IdMap<ScopeEntry>,
    locals: i32,
}

#[derive(Default)]
pub struct Scopes {
    scopes: Vec<ScopeData>,
    decls: Vec<DeclData>,
    members: Vec<MemberData>,
}

impl Scopes {
    pub fn new() -> Scopes {
        Scopes::default()
    }

    pub fn new_scope(&mut self, outer: Option<ScopeId>) -> ScopeId {
        let id = ScopeId(self.scopes.len() as u32);
        self.scopes.push(ScopeData {
            outer,
            map: IdMap::new(),
            locals: 0,
        });
        id
    }

    pub fn outer(&self, scope: ScopeId) -> Option<ScopeId> {
        self.scopes[scope.0 as usize].outer
    }

    pub fn new_decl(&mut self, node: NodeId) -> DeclId {
        let id = DeclId(self.decls.len() as u32);
        self.decls.push(DeclData {
            node,
            index: -1,
            capture: CaptureKind::NotCaptured,
        });
        id
    }

    pub fn decl(&self, id: DeclId) -> &DeclData {
        &self.decls[id.0 as usize]
    }

    pub fn decl_mut(&mut self, id: DeclId) -> &mut DeclData {
        &mut self.decls[id.0 as usize]
    }

    /// Captured-by-value never downgrades a by-reference capture.
    pub fn mark_captured(&mut self, id: DeclId, by_value: bool) {
        let decl = self.decl_mut(id);
        if by_value {
            if decl.capture == CaptureKind::NotCaptured {
                decl.capture = CaptureKind::ByValue;
            }
        } else {
            decl.capture = CaptureKind::ByReference;
        }
    }

    pub fn new_member(&mut self, name: i32) -> MemberId {
        let id = MemberId(self.members.len() as u32);
        self.members.push(MemberData {
            name,
            member: None,
            setter: None,
        });
        id
    }

    pub fn member(&self, id: MemberId) -> &MemberData {
        &self.members[id.0 as usize]
    }

    pub fn member_mut(&mut self, id: MemberId) -> &mut MemberData {
        &mut self.members[id.0 as usize]
    }

    pub fn add(&mut self, scope: ScopeId, id: i32, entry: ScopeEntry) {
        self.scopes[scope.0 as usize].map.put(id, entry);
    }

    /// Copy every entry of `from` into `into`, keeping existing entries.
    pub fn add_all(&mut self, into: ScopeId, from: ScopeId) {
        let entries: Vec<(i32, ScopeEntry)> = self.scopes[from.0 as usize]
            .map
            .iter()
            .map(|(id, entry)| (id, *entry))
            .collect();
        for (id, entry) in entries {
            if !self.scopes[into.0 as usize].map.contains(id) {
                self.scopes[into.0 as usize].map.add(id, entry);
            }
        }
    }

    /// Introduce a local variable; assigns the next frame index.
    pub fn add_local_variable(&mut self, scope: ScopeId, name: i32, decl: DeclId) {
        let index = self.total_locals(scope);
        self.decl_mut(decl).index = index;
        self.scopes[scope.0 as usize].locals += 1;
        self.add(scope, name, ScopeEntry::Decl(decl));
    }

    pub fn locals(&self, scope: ScopeId) -> i32 {
        self.scopes[scope.0 as usize].locals
    }

    /// Locals introduced by this scope and everything it chains to.
    pub fn total_locals(&self, scope: ScopeId) -> i32 {
        let mut total = 0;
        let mut current = Some(scope);
        while let Some(id) = current {
            total += self.scopes[id.0 as usize].locals;
            current = self.scopes[id.0 as usize].outer;
        }
        total
    }

    pub fn lookup_local(&self, scope: ScopeId, id: i32) -> Option<ScopeEntry> {
        self.scopes[scope.0 as usize].map.lookup(id).copied()
    }

    pub fn lookup(&self, scope: ScopeId, id: i32) -> Option<ScopeEntry> {
        let mut current = Some(scope);
        while let Some(scope) = current {
            if let Some(entry) = self.lookup_local(scope, id) {
                return Some(entry);
            }
            current = self.outer(scope);
        }
        None
    }

    pub fn entries(&self, scope: ScopeId) -> Vec<(i32, ScopeEntry)> {
        self.scopes[scope.0 as usize]
            .map
            .iter()
            .map(|(id, entry)| (id, *entry))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chained_lookup_prefers_inner() {
        let mut scopes = Scopes::new();
        let outer = scopes.new_scope(None);
        let inner = scopes.new_scope(Some(outer));
        scopes.add(outer, 1, ScopeEntry::Formal { index: 0 });
        scopes.add(inner, 1, ScopeEntry::Formal { index: 9 });
        assert_eq!(
            scopes.lookup(inner, 1),
            Some(ScopeEntry::Formal { index: 9 })
        );
        assert_eq!(
            scopes.lookup(outer, 1),
            Some(ScopeEntry::Formal { index: 0 })
        );
        assert_eq!(scopes.lookup(inner, 2), None);
    }

    #[test]
    fn local_indices_continue_across_chain() {
        let mut scopes = Scopes::new();
        let outer = scopes.new_scope(None);
        let a = scopes.new_decl(NodeId(0));
        scopes.add_local_variable(outer, 10, a);
        let inner = scopes.new_scope(Some(outer));
        let b = scopes.new_decl(NodeId(1));
        scopes.add_local_variable(inner, 11, b);
        assert_eq!(scopes.decl(a).index, 0);
        assert_eq!(scopes.decl(b).index, 1);
        assert_eq!(scopes.total_locals(inner), 2);
        assert_eq!(scopes.total_locals(outer), 1);
    }

    #[test]
    fn capture_marking_never_downgrades() {
        let mut scopes = Scopes::new();
        let decl = scopes.new_decl(NodeId(0));
        scopes.mark_captured(decl, false);
        assert_eq!(scopes.decl(decl).capture, CaptureKind::ByReference);
        scopes.mark_captured(decl, true);
        assert_eq!(scopes.decl(decl).capture, CaptureKind::ByReference);

        let other = scopes.new_decl(NodeId(1));
        scopes.mark_captured(other, true);
        assert_eq!(scopes.decl(other).capture, CaptureKind::ByValue);
    }

    #[test]
    fn add_all_keeps_existing_entries() {
        let mut scopes = Scopes::new();
        let from = scopes.new_scope(None);
        let into = scopes.new_scope(None);
        scopes.add(from, 1, ScopeEntry::Formal { index: 1 });
        scopes.add(from, 2, ScopeEntry::Formal { index: 2 });
        scopes.add(into, 1, ScopeEntry::Formal { index: 7 });
        scopes.add_all(into, from);
        assert_eq!(scopes.lookup(into, 1), Some(ScopeEntry::Formal { index: 7 }));
        assert_eq!(scopes.lookup(into, 2), Some(ScopeEntry::Formal { index: 2 }));
    }
}
