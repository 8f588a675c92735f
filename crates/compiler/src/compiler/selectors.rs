//! Selector tracking
//!
//! Methods are only compiled when a matching call-site shape exists, and
//! call sites only force compilation of methods that can answer them.
//! Three structures make that lazy rendezvous work:
//!
//! - `SelectorLink`: plain selectors (getters, setters, fields). A
//!   declaration links itself under its name; the first use drains the
//!   pending list and marks the name done.
//! - `InvokeSelector`: invocation shapes. Tracks `(arity, named-set)`
//!   pairs per name in a per-arity trie of sorted named-argument ids, in
//!   both directions (shapes seen at call sites, methods that can answer
//!   a shape).
//! - `IsSelector`: `o is T` usage. The first `is T` coins the synthetic
//!   `is@T` name and materializes an always-true test stub on every class
//!   that declared (or later declares) `T` as itself or an interface.

use crate::ast::{Node, NodeId};
use crate::error::Result;
use crate::map::IdMap;
use crate::trie::Trie;

use super::Compiler;

/// Pending declarations for a plain (non-invoke) selector.
pub enum SelectorLink {
    Pending(Vec<NodeId>),
    Done,
}

#[derive(Default)]
pub struct NamedShape {
    marked: bool,
    /// Named-argument lists (in call order) keyed by the synthetic
    /// combined name id.
    seen: IdMap<Vec<NodeId>>,
    methods: Vec<NodeId>,
}

pub struct InvokeSelector {
    /// Per-arity tries over sorted named-argument name ids.
    arities: IdMap<Trie<NamedShape>>,
}

impl InvokeSelector {
    fn new() -> InvokeSelector {
        InvokeSelector {
            arities: IdMap::new(),
        }
    }

    fn sorted_ids(compiler: &Compiler, named_arguments: &[NodeId]) -> Vec<i32> {
        let mut ids: Vec<i32> = named_arguments
            .iter()
            .map(|name| compiler.builder.identifier_id(*name))
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Register a declared method under every shape it can answer.
    /// Returns true when a matching call shape was already marked.
    fn add_method(&mut self, compiler: &Compiler, method: NodeId) -> bool {
        let data = compiler.builder.method(method);
        let mut ids = Vec::new();
        let mut optional_count = 0;
        for parameter in &data.parameters {
            let var = compiler.builder.variable(*parameter);
            if var.modifiers.is_named() {
                ids.push(compiler.builder.identifier_id(var.name));
            }
            if var.modifiers.is_named() || var.modifiers.is_positional() {
                optional_count += 1;
            }
        }
        ids.sort_unstable();

        for missing in 0..=optional_count {
            let arity = (data.parameters.len() - missing) as i32;
            if !self.arities.contains(arity) {
                self.arities.add(arity, Trie::new());
            }
            let trie = self.arities.lookup_mut(arity).unwrap();
            let root = trie.root();
            if trie.payload(root).marked {
                return true;
            }
            trie.payload_mut(root).methods.push(method);
            for i in 0..ids.len() {
                let mut node = trie.root();
                for id in &ids[i..] {
                    node = trie.child(node, *id);
                    if trie.payload(node).marked {
                        return true;
                    }
                    trie.payload_mut(node).methods.push(method);
                }
            }
        }
        false
    }

    /// Record a call shape; returns the declarations waiting on it.
    fn mark_arity(
        &mut self,
        compiler: &Compiler,
        arity: usize,
        named_id: i32,
        named_arguments: &[NodeId],
    ) -> Vec<NodeId> {
        let ids = InvokeSelector::sorted_ids(compiler, named_arguments);
        if !self.arities.contains(arity as i32) {
            self.arities.add(arity as i32, Trie::new());
        }
        let trie = self.arities.lookup_mut(arity as i32).unwrap();
        let node = trie.walk(ids.iter().copied());
        if trie.payload(node).seen.lookup(named_id).is_none() {
            trie.payload_mut(node)
                .seen
                .add(named_id, named_arguments.to_vec());
        }
        if trie.payload(node).marked {
            return Vec::new();
        }
        trie.payload_mut(node).marked = true;
        std::mem::take(&mut trie.payload_mut(node).methods)
    }

    /// All named-argument shapes seen for `arity` that a method with the
    /// given (sorted) named parameters could answer.
    fn seen_arity(&self, arity: i32, sorted_named: &[i32]) -> Vec<Vec<NodeId>> {
        let Some(trie) = self.arities.lookup(arity) else {
            return Vec::new();
        };
        let mut result = Vec::new();
        let root = trie.root();
        for (_, seen) in trie.payload(root).seen.iter() {
            result.push(seen.clone());
        }
        find_seen(trie, root, 0, sorted_named, &mut result);
        result
    }
}

fn find_seen(
    trie: &Trie<NamedShape>,
    node: crate::trie::TrieId,
    offset: usize,
    ids: &[i32],
    result: &mut Vec<Vec<NodeId>>,
) {
    for i in offset..ids.len() {
        if let Some(child) = trie.lookup_child(node, ids[i]) {
            for (_, seen) in trie.payload(child).seen.iter() {
                result.push(seen.clone());
            }
            find_seen(trie, child, i, ids, result);
        }
    }
}

/// `is` usage for one type name.
pub struct IsSelector {
    classes: Vec<i32>,
    selector: Option<i32>,
}

impl IsSelector {
    fn new() -> IsSelector {
        IsSelector {
            classes: Vec::new(),
            selector: None,
        }
    }
}

impl<'z> Compiler<'z> {
    /// Link a declaration (getter, setter, or field) under its selector;
    /// enqueue immediately when the selector has already been used.
    pub fn mark_for_selector(&mut self, node: NodeId) {
        let name_id = match self.builder.node(node) {
            Node::Method(data) => self.builder.identifier_id(data.name),
            Node::VariableDeclaration(data) => self.builder.identifier_id(data.name),
            other => unreachable!("unexpected selector target {other:?}"),
        };
        if !self.selectors.contains(name_id) {
            self.selectors
                .add(name_id, SelectorLink::Pending(vec![node]));
            return;
        }
        if matches!(self.selectors.lookup(name_id), Some(SelectorLink::Done)) {
            self.enqueue_selector_target(node);
            return;
        }
        let Some(SelectorLink::Pending(pending)) = self.selectors.lookup_mut(name_id) else {
            unreachable!()
        };
        pending.push(node);
    }

    pub fn mark_for_invoke_selector(&mut self, node: NodeId) {
        let data = self.builder.method(node);
        let name_id = self.builder.identifier_id(data.name);
        if !self.invoke_selectors.contains(name_id) {
            self.invoke_selectors.add(name_id, InvokeSelector::new());
        }
        let mut selector = std::mem::replace(
            self.invoke_selectors.lookup_mut(name_id).unwrap(),
            InvokeSelector::new(),
        );
        let enqueue = selector.add_method(self, node);
        *self.invoke_selectors.lookup_mut(name_id).unwrap() = selector;
        if enqueue {
            self.enqueue_method(node);
        }
    }

    /// Force a plain selector: everything linked under it gets enqueued,
    /// future declarations enqueue eagerly.
    pub fn enqueue_selector_id(&mut self, id: i32) {
        if !self.selectors.contains(id) {
            self.selectors.add(id, SelectorLink::Done);
            return;
        }
        let pending = {
            let link = self.selectors.lookup_mut(id).unwrap();
            match std::mem::replace(link, SelectorLink::Done) {
                SelectorLink::Pending(pending) => pending,
                SelectorLink::Done => Vec::new(),
            }
        };
        for node in pending {
            self.enqueue_selector_target(node);
        }
    }

    fn enqueue_selector_target(&mut self, node: NodeId) {
        match self.builder.node(node) {
            Node::Method(_) => {
                self.enqueue_method(node);
            }
            Node::VariableDeclaration(_) => {
                let id = self
                    .enqueue_variable(node)
                    .expect("field enqueue cannot fail after class enqueue");
                debug_assert!(id < 0);
            }
            other => unreachable!("unexpected selector target {other:?}"),
        }
    }

    /// Record an invocation shape at a call site and enqueue every
    /// declaration that can answer it.
    pub fn enqueue_invoke_selector(
        &mut self,
        name_id: i32,
        arity: usize,
        named_arguments: &[NodeId],
    ) {
        let named_id = self.named_argument_id(name_id, named_arguments);
        if !self.invoke_selectors.contains(name_id) {
            self.invoke_selectors.add(name_id, InvokeSelector::new());
        }
        let mut selector = std::mem::replace(
            self.invoke_selectors.lookup_mut(name_id).unwrap(),
            InvokeSelector::new(),
        );
        let methods = selector.mark_arity(self, arity, named_id, named_arguments);
        *self.invoke_selectors.lookup_mut(name_id).unwrap() = selector;
        for method in methods {
            self.enqueue_method(method);
        }
    }

    /// Shapes seen for `name_id` at `arity` answerable with `named`
    /// parameters; used by the trampoline pass.
    pub(crate) fn seen_invoke_shapes(
        &self,
        name_id: i32,
        arity: i32,
        named: &[NodeId],
    ) -> Vec<Vec<NodeId>> {
        let Some(selector) = self.invoke_selectors.lookup(name_id) else {
            return Vec::new();
        };
        let sorted = InvokeSelector::sorted_ids(self, named);
        selector.seen_arity(arity, &sorted)
    }

    /// A class declares it answers `is T` for `name_id`.
    pub fn mark_is_selector(&mut self, class_id: i32, name_id: i32) -> Result<()> {
        if !self.is_selectors.contains(name_id) {
            self.is_selectors.add(name_id, IsSelector::new());
        }
        let selector_name = self.is_selectors.lookup(name_id).unwrap().selector;
        match selector_name {
            Some(selector) => self.create_is_test(class_id, selector),
            None => {
                self.is_selectors
                    .lookup_mut(name_id)
                    .unwrap()
                    .classes
                    .push(class_id);
                Ok(())
            }
        }
    }

    /// An `is T` test site; coins the synthetic `is@T` selector name.
    pub fn enqueue_is_selector(&mut self, name_id: i32) -> Result<i32> {
        if !self.is_selectors.contains(name_id) {
            self.is_selectors.add(name_id, IsSelector::new());
        }
        if let Some(selector) = self.is_selectors.lookup(name_id).unwrap().selector {
            return Ok(selector);
        }
        let synthetic = format!("is@{}", self.builder.lookup_identifier(name_id));
        let selector = self.builder.canonical_id(&synthetic);
        let classes = {
            let entry = self.is_selectors.lookup_mut(name_id).unwrap();
            entry.selector = Some(selector);
            std::mem::take(&mut entry.classes)
        };
        for class_id in classes {
            self.create_is_test(class_id, selector)?;
        }
        Ok(selector)
    }

    /// Materialize the always-true `is@T` stub on `class_id`.
    pub(crate) fn create_is_test(&mut self, class_id: i32, selector: i32) -> Result<()> {
        let class_node = self.get_compiled_class(class_id).node;
        let name = self.builder.new_node(Node::Identifier {
            id: selector,
            location: crate::source::Location::invalid(),
        });
        let stub = self.builder.new_node(Node::Method(crate::ast::MethodData {
            modifiers: crate::ast::Modifiers::default(),
            name,
            parameters: Vec::new(),
            initializers: Vec::new(),
            body: None,
            id: -1,
            owner: Some(crate::ast::Owner::Class(class_node)),
            captured: Vec::new(),
        }));
        let mut emitter = crate::emitter::Emitter::new(1);
        let true_id = self.const_pool.intern_true();
        emitter.load_const(true_id);
        emitter.ret();
        let code = emitter.into_code();
        self.add_stub(stub, code);
        Ok(())
    }

    /// The canonical id for a named-argument call shape:
    /// `base:label0:label1:…`. Labels are identifiers, so they can never
    /// contain `:` themselves and the synthetic name cannot collide.
    pub fn named_argument_id(&mut self, base: i32, named_arguments: &[NodeId]) -> i32 {
        if named_arguments.is_empty() {
            return base;
        }
        let mut name = self.builder.lookup_identifier(base).to_string();
        for argument in named_arguments {
            name.push(':');
            name.push_str(
                self.builder
                    .lookup_identifier(self.builder.identifier_id(*argument)),
            );
        }
        self.builder.canonical_id(&name)
    }
}
