//! Synthesized methods
//!
//! Everything here produces small pre-compiled stub methods:
//!
//! - named-argument forwarders that reshuffle a caller's argument order
//!   into the callee's canonical parameter order,
//! - shared field getter/setter stubs keyed by field index,
//! - tear-off classes that wrap a method as a first-class `call`able,
//! - lazy static initializers with the cycle check,
//! - the `_unresolved` runtime-error helper, and
//! - per-class trampolines for call shapes with missing optionals.

use crate::ast::{Modifiers, Node, NodeId, Owner, VariableData};
use crate::emitter::Emitter;
use crate::error::Result;
use crate::map::IdMap;
use crate::scope::{ScopeEntry, ScopeId};
use crate::source::Location;
use mica_core::names::Name;
use mica_core::selector::Selector;

use super::visitor::ValueVisitor;
use super::Compiler;

impl<'z> Compiler<'z> {
    /// Stub that maps `base(a, b, x: …)` onto the canonical parameter
    /// order of `method`, folding defaults for omitted names. Returns −1
    /// when the shape cannot match the method at all.
    pub fn get_named_static_method_stub(
        &mut self,
        method: NodeId,
        stub_name: i32,
        num_arguments: usize,
        named_arguments: &[NodeId],
        scope: ScopeId,
    ) -> Result<i32> {
        let data = self.builder.method(method);
        let parameters = data.parameters.clone();
        let pos_arg_count = num_arguments - named_arguments.len();
        if pos_arg_count >= parameters.len() {
            return Ok(-1);
        }
        for (i, parameter) in parameters.iter().enumerate() {
            let modifiers = self.builder.variable(*parameter).modifiers;
            if i < pos_arg_count {
                if modifiers.is_named() || modifiers.is_positional() {
                    return Ok(-1);
                }
            } else if !modifiers.is_named() {
                return Ok(-1);
            }
        }

        let method_id = self.enqueue_method(method);
        if !self.named_static_stubs.contains(method_id) {
            self.named_static_stubs.add(method_id, IdMap::new());
        }
        if let Some(existing) = self
            .named_static_stubs
            .lookup(method_id)
            .and_then(|map| map.lookup(stub_name))
        {
            return Ok(*existing);
        }

        let with_this = self.has_this_argument(method);
        let mut emitter = Emitter::new(num_arguments + usize::from(with_this));

        let mut pos_arg_count = pos_arg_count;
        if with_this {
            pos_arg_count += 1;
        }
        for i in 0..pos_arg_count {
            emitter.load_parameter(i);
        }
        for parameter in &parameters {
            let var = self.builder.variable(*parameter);
            if !var.modifiers.is_named() {
                continue;
            }
            let param_name = self.builder.identifier_id(var.name);
            let mut found = false;
            for (j, named) in named_arguments.iter().enumerate() {
                if self.builder.identifier_id(*named) == param_name {
                    emitter.load_parameter(pos_arg_count + j);
                    found = true;
                    break;
                }
            }
            if !found {
                let mut visitor = ValueVisitor::new(self, &mut emitter, scope);
                match var.value {
                    Some(value) => visitor.load_const_node(value, Some(scope))?,
                    None => visitor.load_null()?,
                }
            }
        }
        let parameter_count = parameters.len() + usize::from(with_this);
        emitter.invoke_static(parameter_count, method_id);
        emitter.ret();

        let name = self.builder.new_node(Node::Identifier {
            id: stub_name,
            location: Location::invalid(),
        });
        let stub = self.builder.new_node(Node::Method(crate::ast::MethodData {
            modifiers: Modifiers::default(),
            name,
            parameters: Vec::new(),
            initializers: Vec::new(),
            body: None,
            id: -1,
            owner: None,
            captured: Vec::new(),
        }));
        let stub_id = self.add_stub(stub, emitter.into_code());
        self.named_static_stubs
            .lookup_mut(method_id)
            .unwrap()
            .put(stub_name, stub_id);
        Ok(stub_id)
    }

    /// Field accessors are shared across classes by field index.
    pub fn get_field_getter(&mut self, index: usize) -> i32 {
        while self.field_getters.len() <= index {
            self.field_getters.push(-1);
        }
        if self.field_getters[index] >= 0 {
            return self.field_getters[index];
        }
        let mut emitter = Emitter::new(1);
        emitter.load_this();
        emitter.load_field(index);
        emitter.ret();
        let name = self.builder.new_node(Node::Identifier {
            id: self.builder.builtin_name_id(crate::tokens::TokenKind::Get),
            location: Location::invalid(),
        });
        let stub = self.builder.new_node(Node::Method(crate::ast::MethodData {
            modifiers: Modifiers::default(),
            name,
            parameters: Vec::new(),
            initializers: Vec::new(),
            body: None,
            id: -1,
            owner: None,
            captured: Vec::new(),
        }));
        let id = self.add_stub(stub, emitter.into_code());
        self.field_getters[index] = id;
        id
    }

    pub fn get_field_setter(&mut self, index: usize) -> i32 {
        while self.field_setters.len() <= index {
            self.field_setters.push(-1);
        }
        if self.field_setters[index] >= 0 {
            return self.field_setters[index];
        }
        let mut emitter = Emitter::new(2);
        emitter.load_this();
        emitter.load_parameter(1);
        emitter.store_field(index);
        emitter.ret();
        let name = self.builder.new_node(Node::Identifier {
            id: self.builder.builtin_name_id(crate::tokens::TokenKind::Set),
            location: Location::invalid(),
        });
        let stub = self.builder.new_node(Node::Method(crate::ast::MethodData {
            modifiers: Modifiers::default(),
            name,
            parameters: Vec::new(),
            initializers: Vec::new(),
            body: None,
            id: -1,
            owner: None,
            captured: Vec::new(),
        }));
        let id = self.add_stub(stub, emitter.into_code());
        self.field_setters[index] = id;
        id
    }

    /// The runtime-error helper used for names that only fail at run
    /// time. A library-provided `_unresolved` wins; otherwise a stub
    /// that throws its argument is synthesized.
    pub fn get_unresolved_helper(&mut self) -> Result<i32> {
        if let Some(id) = self.unresolved_helper {
            return Ok(id);
        }
        if let Some(system) = self.fetch_library("mica:system") {
            let scope = self.library_scope(self.libraries[system].library);
            let unresolved = Name::Unresolved.id() as i32;
            if let Some(ScopeEntry::Member(member)) = self.scopes.lookup(scope, unresolved) {
                if let Some(node) = self.scopes.member(member).member {
                    if matches!(self.builder.node(node), Node::Method(_)) {
                        let id = self.enqueue_method(node);
                        self.unresolved_helper = Some(id);
                        return Ok(id);
                    }
                }
            }
        }
        let mut emitter = Emitter::new(1);
        emitter.load_parameter(0);
        emitter.throw();
        emitter.ret();
        let name = self.builder.new_node(Node::Identifier {
            id: Name::Unresolved.id() as i32,
            location: Location::invalid(),
        });
        let stub = self.builder.new_node(Node::Method(crate::ast::MethodData {
            modifiers: Modifiers::default(),
            name,
            parameters: Vec::new(),
            initializers: Vec::new(),
            body: None,
            id: -1,
            owner: None,
            captured: Vec::new(),
        }));
        let id = self.add_stub(stub, emitter.into_code());
        self.unresolved_helper = Some(id);
        Ok(id)
    }

    /// Compile the lazy initializer stub for static cell `index`.
    pub(crate) fn compile_static_initializer(&mut self, index: i32, node: NodeId) -> Result<i32> {
        let data = self.builder.variable(node);
        let expr = data.value.expect("initializer without value");
        let stub = self.builder.new_node(Node::Method(crate::ast::MethodData {
            modifiers: Modifiers::STATIC,
            name: data.name,
            parameters: Vec::new(),
            initializers: Vec::new(),
            body: Some(expr),
            id: -1,
            owner: data.owner,
            captured: Vec::new(),
        }));
        let scope = self.method_owner_scope(stub);

        crate::scope_resolver::ScopeResolver::new(
            &mut self.builder,
            &mut self.scopes,
            scope,
            self.this_name,
        )
        .resolve_method(stub)?;

        let mut emitter = Emitter::new(0);
        let old_method = self.current_method.replace(stub);
        let result = (|| -> Result<()> {
            let mut visitor = ValueVisitor::new(self, &mut emitter, scope);
            visitor.create_static_initializer_cycle_check(index)?;

            // The body runs under a try range: a throwing initializer
            // resets the cell to null and re-throws.
            visitor.load_null()?;
            let start = visitor.emitter.position();
            visitor.accept(expr)?;
            visitor.emitter.store_static(index);
            visitor.emitter.ret();
            let end = visitor.emitter.position();
            visitor.emitter.add_frame_range(start, end);
            visitor.load_null()?;
            visitor.emitter.store_static(index);
            visitor.emitter.pop();
            visitor.emitter.throw();
            Ok(())
        })();
        self.current_method = old_method;
        result?;
        Ok(self.add_stub(stub, emitter.into_code()))
    }

    /// Wrap `method` as a first-class value: a synthesized class whose
    /// `call` forwards to the method. Static tear-offs intern one const
    /// instance; instance tear-offs allocate with the bound receiver.
    pub(crate) fn tearoff_for_method(&mut self, method: NodeId) -> Result<(i32, bool)> {
        let data = self.builder.method(method);
        let with_this =
            matches!(data.owner, Some(Owner::Class(_))) && !data.modifiers.is_static();
        let method_id = self.enqueue_method(method);
        if let Some(tearoff_id) = self.method_tearoffs.lookup(method_id) {
            return Ok((*tearoff_id, with_this));
        }

        let name = self.identifier_name_of(data.name);
        let parameters = data.parameters.clone();
        let call_id = self.call_name;
        let call_name = self.builder.new_node(Node::Identifier {
            id: call_id,
            location: Location::invalid(),
        });
        let call_method = self.builder.new_node(Node::Method(crate::ast::MethodData {
            modifiers: Modifiers::default(),
            name: call_name,
            parameters: parameters.clone(),
            initializers: Vec::new(),
            body: None,
            id: -1,
            owner: None,
            captured: Vec::new(),
        }));

        let mut nested = Emitter::new(parameters.len() + 1);
        if with_this {
            nested.load_this();
            nested.load_field(0);
        }
        for i in 0..parameters.len() {
            nested.load_parameter(i + 1);
        }
        let parameter_count = parameters.len() + usize::from(with_this);
        nested.invoke_static(parameter_count, method_id);
        nested.ret();

        let mut declarations = vec![call_method];
        if with_this {
            let this_name = self.builder.new_node(Node::Identifier {
                id: self.this_name,
                location: Location::invalid(),
            });
            let field = self.builder.new_node(Node::VariableDeclaration(VariableData {
                name: this_name,
                value: None,
                modifiers: Modifiers::default(),
                owner: None,
                entry: None,
                index: -1,
                initializer_id: -1,
            }));
            let statement = self.builder.new_node(Node::VariableDeclarationStatement {
                modifiers: Modifiers::default(),
                declarations: vec![field],
            });
            declarations.push(statement);
        }

        let owner_scope = self.method_owner_scope(method);
        let clazz = self.builder.new_node(Node::Class(crate::ast::ClassData {
            is_abstract: false,
            name,
            superclass: None,
            mixins: Vec::new(),
            implements: Vec::new(),
            declarations,
            id: -1,
            scope: Some(owner_scope),
            library: None,
        }));
        self.builder.method_mut(call_method).owner = Some(Owner::Class(clazz));
        let class_id = self.add_class(clazz, None);
        self.add_stub(call_method, nested.into_code());

        let tearoff_id = if with_this {
            class_id
        } else {
            // Static tear-offs are const objects: one per method.
            self.const_pool.intern_instance(class_id, clazz, Vec::new())
        };
        self.method_tearoffs.add(method_id, tearoff_id);
        Ok((tearoff_id, with_this))
    }

    fn identifier_name_of(&mut self, name: NodeId) -> NodeId {
        match self.builder.node(name) {
            Node::Dot { name, .. } => *name,
            _ => name,
        }
    }

    /// Second worklist phase: for every compiled method, synthesize
    /// trampolines for call shapes that were seen but have no direct
    /// target: named-argument forwarders and positional-default fills.
    pub(crate) fn synthesize_shape_trampolines(&mut self, method_count: usize) -> Result<()> {
        for method_index in 0..method_count {
            let method = self.methods[method_index].node;
            let data = self.builder.method(method);
            if data.modifiers.is_static() {
                continue;
            }
            let Some(Owner::Class(class_node)) = data.owner else {
                continue;
            };
            let class_id = self.builder.class(class_node).id;
            if class_id < 0 {
                continue;
            }
            let name_id = self.builder.identifier_id(data.name);
            if !self.invoke_selectors.contains(name_id) {
                continue;
            }

            let parameters = data.parameters.clone();
            let named: Vec<NodeId> = parameters
                .iter()
                .filter(|parameter| self.builder.variable(**parameter).modifiers.is_named())
                .map(|parameter| self.builder.variable(*parameter).name)
                .collect();

            for arity in (0..=parameters.len()).rev() {
                let seen = self.seen_invoke_shapes(name_id, arity as i32, &named);
                for named_arguments in seen {
                    if !named.is_empty() {
                        let stub_name = self.named_argument_id(name_id, &named_arguments);
                        let scope = self.method_owner_scope(method);
                        let id = self.get_named_static_method_stub(
                            method,
                            stub_name,
                            arity,
                            &named_arguments,
                            scope,
                        )?;
                        if id >= 0 {
                            let selector = Selector::method(stub_name as u32, arity as u32);
                            self.get_compiled_class_mut(class_id)
                                .add_method_table_entry(selector.raw(), id);
                        }
                    } else {
                        if arity == parameters.len() {
                            continue;
                        }
                        let parameter = parameters[arity];
                        if !self.builder.variable(parameter).modifiers.is_positional() {
                            break;
                        }
                        self.positional_default_trampoline(
                            method,
                            class_node,
                            name_id,
                            arity,
                            &parameters,
                        )?;
                    }
                }
            }
        }
        Ok(())
    }

    /// A trampoline that fills in trailing positional defaults and
    /// forwards to the full method.
    fn positional_default_trampoline(
        &mut self,
        method: NodeId,
        class_node: NodeId,
        name_id: i32,
        arity: usize,
        parameters: &[NodeId],
    ) -> Result<()> {
        let method_id = self.builder.method(method).id;
        debug_assert!(method_id >= 0);
        let mut emitter = Emitter::new(1 + arity);
        emitter.load_this();
        for j in 0..arity {
            emitter.load_parameter(j + 1);
        }
        let scope = self.method_owner_scope(method);
        for parameter in parameters.iter().skip(arity) {
            let var = self.builder.variable(*parameter);
            let mut visitor = ValueVisitor::new(self, &mut emitter, scope);
            match var.value {
                Some(value) => visitor.load_const_node(value, Some(scope))?,
                None => visitor.load_null()?,
            }
        }
        emitter.invoke_static(parameters.len() + 1, method_id);
        emitter.ret();

        // The stub's parameter count determines its dispatch selector.
        let name = self.builder.new_node(Node::Identifier {
            id: name_id,
            location: Location::invalid(),
        });
        let mut stub_parameters = Vec::with_capacity(arity);
        for _ in 0..arity {
            let parameter_name = self.builder.new_node(Node::Identifier {
                id: name_id,
                location: Location::invalid(),
            });
            stub_parameters.push(self.builder.new_node(Node::VariableDeclaration(
                VariableData {
                    name: parameter_name,
                    value: None,
                    modifiers: Modifiers::default(),
                    owner: None,
                    entry: None,
                    index: -1,
                    initializer_id: -1,
                },
            )));
        }
        let stub = self.builder.new_node(Node::Method(crate::ast::MethodData {
            modifiers: Modifiers::default(),
            name,
            parameters: stub_parameters,
            initializers: Vec::new(),
            body: None,
            id: -1,
            owner: Some(Owner::Class(class_node)),
            captured: Vec::new(),
        }));
        self.add_stub(stub, emitter.into_code());
        Ok(())
    }
}

impl<'c, 'z> ValueVisitor<'c, 'z> {
    /// Load `method` as a value (tear-off).
    pub(crate) fn load_method_value(&mut self, method: NodeId) -> Result<()> {
        let (tearoff_id, with_this) = self.compiler.tearoff_for_method(method)?;
        if with_this {
            self.do_this()?;
            self.emitter.allocate(tearoff_id, 1);
        } else {
            self.emitter.load_const(tearoff_id);
        }
        Ok(())
    }
}
