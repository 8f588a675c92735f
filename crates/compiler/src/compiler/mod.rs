//! The worklist compiler
//!
//! Compilation is demand driven: enqueueing `main` (and the handful of
//! core classes the VM insists on) pulls in everything reachable. Every
//! enqueued method gets a dense id in enqueue order, every enqueued class
//! a dense class id, and the drain loop compiles methods until the
//! worklist is empty. A final pass synthesizes per-class trampolines for
//! argument shapes that were called but never declared, then the consumer
//! is handed classes, statics, constants, and the entry point.
//!
//! Submodules:
//! - `selectors`: lazy selector links and shape tracking
//! - `visitor`: the code-generation visitor
//! - `construct`: constructor compilation
//! - `stubs`: named-argument stubs, field accessors, tear-offs

mod construct;
mod selectors;
mod stubs;
mod visitor;

pub use construct::InitAction;
pub use selectors::{InvokeSelector, IsSelector, SelectorLink};
pub use visitor::ValueVisitor;

use crate::ast::{Modifiers, Node, NodeId, Owner, is_empty_body};
use crate::builder::Builder;
use crate::config::CompileOptions;
use crate::consts::ConstPool;
use crate::emitter::{Code, Emitter};
use crate::error::{CompileError, ErrorKind, Result};
use crate::map::IdMap;
use crate::scope::{ScopeEntry, ScopeId, Scopes};
use crate::scope_resolver::ScopeResolver;
use crate::source::Location;
use mica_core::names::Name;
use mica_core::selector::Selector;
use std::collections::HashMap;
use tracing::debug;

/// A loaded library: its node plus the scope imports land in.
pub struct LibraryElement {
    pub library: NodeId,
    pub outer_scope: ScopeId,
}

/// One entry in the per-class method table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableEntry {
    pub selector: u32,
    pub method: i32,
}

pub struct CompiledClass {
    pub node: NodeId,
    pub superclass: Option<NodeId>,
    method_table: Vec<TableEntry>,
    constructors: IdMap<NodeId>,
}

impl CompiledClass {
    fn new(node: NodeId, superclass: Option<NodeId>) -> CompiledClass {
        CompiledClass {
            node,
            superclass,
            method_table: Vec::new(),
            constructors: IdMap::new(),
        }
    }

    pub fn add_method_table_entry(&mut self, selector: u32, method: i32) {
        self.method_table.push(TableEntry { selector, method });
    }

    /// The method table, sorted by selector for the VM's binary search.
    pub fn sorted_method_table(&self) -> Vec<TableEntry> {
        let mut table = self.method_table.clone();
        table.sort_by_key(|entry| entry.selector);
        table
    }

    pub fn add_constructor(&mut self, name_id: i32, constructor: NodeId) {
        self.constructors.put(name_id, constructor);
    }

    pub fn lookup_constructor(&self, name_id: i32) -> Option<NodeId> {
        self.constructors.lookup(name_id).copied()
    }

    pub fn has_constructors(&self) -> bool {
        !self.constructors.is_empty()
    }
}

struct MethodEntry {
    node: NodeId,
    code: Option<Code>,
}

/// Consumes the compiled program in dependency-safe order.
pub trait CompilerConsumer {
    fn initialize(&mut self, object_class_id: i32) -> Result<()>;
    fn do_method(&mut self, compiler: &Compiler, method: NodeId, code: &Code) -> Result<()>;
    fn do_class(&mut self, compiler: &Compiler, class_id: i32) -> Result<()>;
    fn finalize(
        &mut self,
        compiler: &Compiler,
        statics: &[NodeId],
        main_arity: usize,
        entry_id: i32,
    ) -> Result<()>;
}

pub struct Compiler<'z> {
    pub builder: Builder<'z>,
    pub scopes: Scopes,
    options: CompileOptions,

    // Loader state (see loader.rs).
    pub(crate) libraries: Vec<LibraryElement>,
    pub(crate) library_map: IdMap<usize>,

    // Worklist state.
    methods: Vec<MethodEntry>,
    classes: Vec<CompiledClass>,
    statics: Vec<NodeId>,
    field_getters: Vec<i32>,
    field_setters: Vec<i32>,
    pub(crate) invoke_selectors: IdMap<InvokeSelector>,
    pub(crate) selectors: IdMap<SelectorLink>,
    pub(crate) is_selectors: IdMap<IsSelector>,
    named_static_stubs: IdMap<IdMap<i32>>,
    constructors: HashMap<NodeId, i32>,
    method_tearoffs: IdMap<i32>,
    pub(crate) const_pool: ConstPool,

    current_method: Option<NodeId>,
    this_name: i32,
    call_name: i32,
    unresolved_helper: Option<i32>,
    synthetic_core_classes: IdMap<NodeId>,
    synthetic_scope: Option<ScopeId>,
}

impl<'z> Compiler<'z> {
    pub fn new(builder: Builder<'z>, options: CompileOptions) -> Compiler<'z> {
        let mut builder = builder;
        let this_name = builder.canonical_id("this$");
        let call_name = Name::Call.id() as i32;
        Compiler {
            builder,
            scopes: Scopes::new(),
            options,
            libraries: Vec::new(),
            library_map: IdMap::new(),
            methods: Vec::new(),
            classes: Vec::new(),
            statics: Vec::new(),
            field_getters: Vec::new(),
            field_setters: Vec::new(),
            invoke_selectors: IdMap::new(),
            selectors: IdMap::new(),
            is_selectors: IdMap::new(),
            named_static_stubs: IdMap::new(),
            constructors: HashMap::new(),
            method_tearoffs: IdMap::new(),
            const_pool: ConstPool::new(),
            current_method: None,
            this_name,
            call_name,
            unresolved_helper: None,
            synthetic_core_classes: IdMap::new(),
            synthetic_scope: None,
        }
    }

    pub fn options(&self) -> &CompileOptions {
        &self.options
    }

    pub fn this_name(&self) -> i32 {
        self.this_name
    }

    pub fn call_name(&self) -> i32 {
        self.call_name
    }

    pub fn current_method(&self) -> Option<NodeId> {
        self.current_method
    }

    pub fn is_static_context(&self) -> bool {
        match self.current_method {
            Some(method) => !self.has_this_argument(method),
            None => true,
        }
    }

    pub fn has_this_argument(&self, method: NodeId) -> bool {
        let data = self.builder.method(method);
        match data.owner {
            Some(Owner::Class(_)) => {
                !data.modifiers.is_static() && !data.modifiers.is_factory()
            }
            _ => false,
        }
    }

    pub fn error(
        &self,
        kind: ErrorKind,
        location: Location,
        message: impl Into<String>,
    ) -> CompileError {
        CompileError::new(kind, location, message)
    }

    // ------------------------------------------------------------------
    // Whole-program compilation.

    /// Compile the program rooted at library `root`, feeding the
    /// consumer. Leaves the entry method id and main's arity with the
    /// consumer's `finalize`.
    pub fn compile_library<C: CompilerConsumer>(
        &mut self,
        root: usize,
        consumer: &mut C,
    ) -> Result<()> {
        // Load main through the system library's `_entry` when a system
        // library is present; otherwise main itself is the entry.
        let system = self.fetch_library("mica:system");
        let main_scope = match system {
            Some(system) => {
                self.add_import_of(system, root);
                let element = &self.libraries[system];
                self.library_scope(element.library)
            }
            None => {
                let element = &self.libraries[root];
                self.library_scope(element.library)
            }
        };

        let main_id = Name::Main.id() as i32;
        let Some(ScopeEntry::Member(member)) = self.scopes.lookup(main_scope, main_id) else {
            return Err(self.error(ErrorKind::Compile, Location::invalid(), "Unable to locate main"));
        };
        let member = self.scopes.member(member).clone();
        let Some(main_node) = member.member else {
            return Err(self.error(
                ErrorKind::Compile,
                Location::invalid(),
                "main can not be a setter",
            ));
        };
        let main = match self.builder.node(main_node) {
            Node::Method(data) if !data.modifiers.is_get() => main_node,
            _ => {
                return Err(self.error(
                    ErrorKind::Compile,
                    Location::invalid(),
                    "main must be a method",
                ));
            }
        };
        let main_arity = self.builder.method(main).parameters.len();

        let entry_id = match system {
            Some(system) => {
                let entry_identifier = self.builder.canonical_id("_entry");
                let scope = self.library_scope(self.libraries[system].library);
                match self.scopes.lookup(scope, entry_identifier) {
                    Some(ScopeEntry::Member(member)) => {
                        let node = self
                            .scopes
                            .member(member)
                            .member
                            .expect("system _entry must be a method");
                        self.enqueue_method(node)
                    }
                    _ => self.enqueue_method(main),
                }
            }
            None => self.enqueue_method(main),
        };

        const OBJECT_CLASS_ID: i32 = 0;
        consumer.initialize(OBJECT_CLASS_ID)?;
        let object_class_id = {
            let object = self.enqueue_core_class("Object")?;
            self.builder.class(object).id
        };
        debug_assert_eq!(object_class_id, OBJECT_CLASS_ID);

        for class_name in [
            "bool",
            "Null",
            "double",
            "_Smi",
            "_Mint",
            "List",
            "_ConstantList",
            "_ConstantMap",
            "String",
        ] {
            self.enqueue_core_class(class_name)?;
        }

        self.enqueue_selector_id(Name::NoSuchMethod.id() as i32);
        self.enqueue_selector_id(Name::NoSuchMethodTrampoline.id() as i32);
        self.enqueue_selector_id(Name::Yield.id() as i32);
        self.enqueue_selector_id(Name::CoroutineStart.id() as i32);

        self.process_queue(consumer)?;

        for class_id in 0..self.classes.len() as i32 {
            consumer.do_class(self, class_id)?;
        }

        let statics = self.statics.clone();
        consumer.finalize(self, &statics, main_arity, entry_id)
    }

    fn process_queue<C: CompilerConsumer>(&mut self, consumer: &mut C) -> Result<()> {
        let mut next = 0;
        let mut trampolines_done = false;
        loop {
            while next < self.methods.len() {
                let code = match &self.methods[next].code {
                    Some(code) => code.clone(),
                    None => {
                        let node = self.methods[next].node;
                        let code = self.compile_queued_method(node)?;
                        self.methods[next].code = Some(code.clone());
                        code
                    }
                };
                let node = self.methods[next].node;
                consumer.do_method(self, node, &code)?;
                next += 1;
            }
            if trampolines_done {
                return Ok(());
            }
            // Every directly-compiled method is known now; synthesize
            // trampolines for argument shapes seen at call sites but not
            // declared anywhere.
            self.synthesize_shape_trampolines(next)?;
            trampolines_done = true;
            if next == self.methods.len() {
                return Ok(());
            }
        }
    }

    fn compile_queued_method(&mut self, method: NodeId) -> Result<Code> {
        let data = self.builder.method(method);
        let mut argument_count = data.parameters.len();
        if self.has_this_argument(method) {
            argument_count += 1;
        }
        let mut emitter = Emitter::new(argument_count);
        self.compile_method(method, &mut emitter)?;
        Ok(emitter.into_code())
    }

    // ------------------------------------------------------------------
    // Enqueueing.

    pub fn method_count(&self) -> usize {
        self.methods.len()
    }

    pub fn class_count(&self) -> usize {
        self.classes.len()
    }

    pub fn get_method(&self, id: i32) -> NodeId {
        self.methods[id as usize].node
    }

    pub fn get_compiled_class(&self, class_id: i32) -> &CompiledClass {
        &self.classes[class_id as usize]
    }

    pub fn get_compiled_class_mut(&mut self, class_id: i32) -> &mut CompiledClass {
        &mut self.classes[class_id as usize]
    }

    pub fn enqueue_method(&mut self, node: NodeId) -> i32 {
        let id = self.builder.method(node).id;
        if id >= 0 {
            return id;
        }
        let id = self.methods.len() as i32;
        self.builder.method_mut(node).id = id;
        self.methods.push(MethodEntry { node, code: None });
        self.register_method(id, node);
        id
    }

    /// Add a pre-compiled stub method.
    pub fn add_stub(&mut self, node: NodeId, code: Code) -> i32 {
        let id = self.methods.len() as i32;
        self.builder.method_mut(node).id = id;
        self.methods.push(MethodEntry {
            node,
            code: Some(code),
        });
        self.register_method(id, node);
        id
    }

    /// Enqueue a field or global. Returns the static cell index, or −1
    /// for an instance field (whose accessors go into the method table).
    pub fn enqueue_variable(&mut self, node: NodeId) -> Result<i32> {
        let data = self.builder.variable(node);
        let owner = data.owner.expect("variable without owner");
        if matches!(owner, Owner::Library(_)) || data.modifiers.is_static() {
            let mut index = data.index;
            if index < 0 {
                index = self.statics.len() as i32;
                self.statics.push(node);
                self.builder.variable_mut(node).index = index;
                if data.has_initializer() {
                    let initializer_id = self.compile_static_initializer(index, node)?;
                    self.builder.variable_mut(node).initializer_id = initializer_id;
                }
            }
            return Ok(index);
        }

        // Instance field: surface getter/setter stubs in the class table.
        let Owner::Class(class_node) = owner else {
            unreachable!()
        };
        let class_id = self.enqueue_class(class_node)?;
        let data = self.builder.variable(node);
        let index = data.index;
        let name_id = self.builder.identifier_id(data.name);
        let getter = self.get_field_getter(index as usize);
        self.get_compiled_class_mut(class_id)
            .add_method_table_entry(Selector::getter(name_id as u32).raw(), getter);
        if !data.modifiers.is_final() {
            let setter = self.get_field_setter(index as usize);
            self.get_compiled_class_mut(class_id)
                .add_method_table_entry(Selector::setter(name_id as u32).raw(), setter);
        }
        Ok(-1)
    }

    pub fn enqueue_constructor(&mut self, class_node: NodeId, node: NodeId) -> Result<i32> {
        let class_id = self.enqueue_class(class_node)?;
        // Factory constructors are just plain static functions.
        if self.builder.method(node).modifiers.is_factory() {
            return Ok(self.enqueue_method(node));
        }
        if let Some(id) = self.constructors.get(&node) {
            return Ok(*id);
        }
        let stub_id = self.compile_constructor(class_id, node)?;
        self.constructors.insert(node, stub_id);
        Ok(stub_id)
    }

    pub fn add_class(&mut self, node: NodeId, superclass: Option<NodeId>) -> i32 {
        let id = self.classes.len() as i32;
        self.builder.class_mut(node).id = id;
        self.classes.push(CompiledClass::new(node, superclass));
        id
    }

    /// Lazily assign a class id and scan the class's declarations for
    /// selector marking and constructor collection.
    pub fn enqueue_class(&mut self, node: NodeId) -> Result<i32> {
        let id = self.builder.class(node).id;
        if id >= 0 {
            return Ok(id);
        }
        let data = self.builder.class(node);
        let superclass = self.resolve_super_class(node);
        if superclass.is_none() && data.superclass.is_some() {
            let name = data.superclass.unwrap();
            return Err(self.error(
                ErrorKind::Load,
                self.builder.identifier_location(name),
                format!(
                    "Cannot find class '{}'",
                    self.builder.lookup_identifier(self.builder.identifier_id(name))
                ),
            ));
        }
        let id = self.add_class(node, superclass);
        debug!(class = self.class_name(node), id, "enqueue class");
        let mut field_offset = 0;
        if let Some(superclass) = superclass {
            self.enqueue_class(superclass)?;
            field_offset = self.field_count(superclass, true) as i32;
        }

        // The class answers `is` tests for itself and its interfaces.
        let class_name_id = self.builder.identifier_id(data.name);
        self.mark_is_selector(id, class_name_id)?;
        for implements in &data.implements {
            let name_id = self.builder.identifier_id(*implements);
            self.mark_is_selector(id, name_id)?;
        }

        for declaration in data.declarations.clone() {
            match self.builder.node(declaration).clone() {
                Node::Method(method) => {
                    if method.modifiers.is_static() {
                        continue;
                    }
                    // Constructors live in their own map.
                    let is_dot = matches!(self.builder.node(method.name), Node::Dot { .. });
                    let name_id = self.builder.identifier_id(method.name);
                    if is_dot || name_id == class_name_id {
                        self.classes[id as usize].add_constructor(name_id, declaration);
                        continue;
                    }
                    // Abstract methods never get code.
                    if !method.modifiers.is_native()
                        && !method.modifiers.is_external()
                        && matches!(
                            method.body.map(|body| self.builder.node(body)),
                            Some(Node::EmptyStatement)
                        )
                    {
                        continue;
                    }
                    if method.modifiers.is_get() || method.modifiers.is_set() {
                        self.mark_for_selector(declaration);
                    } else {
                        self.mark_for_invoke_selector(declaration);

                        // A getter-shaped tear-off in case the method is
                        // read instead of invoked.
                        let getter_body = self.builder.new_node(Node::TearoffBody {
                            method: declaration,
                        });
                        let getter = self.builder.new_node(Node::Method(
                            crate::ast::MethodData {
                                modifiers: Modifiers::GET,
                                name: method.name,
                                parameters: Vec::new(),
                                initializers: Vec::new(),
                                body: Some(getter_body),
                                id: -1,
                                owner: Some(Owner::Class(node)),
                                captured: Vec::new(),
                            },
                        ));
                        self.mark_for_selector(getter);
                    }
                }
                Node::VariableDeclarationStatement { declarations, .. } => {
                    for var in declarations {
                        if self.builder.variable(var).modifiers.is_static() {
                            continue;
                        }
                        self.builder.variable_mut(var).index = field_offset;
                        self.mark_for_selector(var);
                        field_offset += 1;
                    }
                }
                _ => {}
            }
        }

        if !self.classes[id as usize].has_constructors() {
            let implicit = self.builder.new_node(Node::Method(crate::ast::MethodData {
                modifiers: Modifiers::default(),
                name: data.name,
                parameters: Vec::new(),
                initializers: Vec::new(),
                body: None,
                id: -1,
                owner: Some(Owner::Class(node)),
                captured: Vec::new(),
            }));
            self.classes[id as usize].add_constructor(class_name_id, implicit);
        }
        Ok(id)
    }

    /// Find a core class by name. Without a library root the class is
    /// synthesized, so self-contained programs still compile; the VM
    /// provides the real implementation through `PushBuiltinClass`.
    pub fn enqueue_core_class(&mut self, class_name: &str) -> Result<NodeId> {
        let name_id = self.builder.canonical_id(class_name);
        if let Some(core) = self.fetch_library("mica:core") {
            let scope = self.library_scope(self.libraries[core].library);
            if let Some(class) = self.lookup_class_quiet(scope, name_id) {
                self.enqueue_class(class)?;
                return Ok(class);
            }
        }
        if let Some(existing) = self.synthetic_core_classes.lookup(name_id) {
            return Ok(*existing);
        }
        let scope = match self.synthetic_scope {
            Some(scope) => scope,
            None => {
                let scope = self.scopes.new_scope(None);
                self.synthetic_scope = Some(scope);
                scope
            }
        };
        let name = self.builder.new_node(Node::Identifier {
            id: name_id,
            location: Location::invalid(),
        });
        let class = self.builder.new_node(Node::Class(crate::ast::ClassData {
            is_abstract: false,
            name,
            superclass: None,
            mixins: Vec::new(),
            implements: Vec::new(),
            declarations: Vec::new(),
            id: -1,
            scope: Some(scope),
            library: None,
        }));
        self.synthetic_core_classes.add(name_id, class);
        self.enqueue_class(class)?;
        Ok(class)
    }

    pub fn lookup_class(&self, scope: ScopeId, name: NodeId) -> Result<NodeId> {
        let name_id = self.builder.identifier_id(name);
        match self.lookup_class_quiet(scope, name_id) {
            Some(class) => Ok(class),
            None => Err(self.error(
                ErrorKind::Load,
                self.builder.identifier_location(name),
                format!(
                    "'{}' is not a class",
                    self.builder.lookup_identifier(name_id)
                ),
            )),
        }
    }

    fn lookup_class_quiet(&self, scope: ScopeId, name_id: i32) -> Option<NodeId> {
        if let Some(ScopeEntry::Member(member)) = self.scopes.lookup(scope, name_id) {
            if let Some(node) = self.scopes.member(member).member {
                if matches!(self.builder.node(node), Node::Class(_)) {
                    return Some(node);
                }
            }
        }
        None
    }

    // ------------------------------------------------------------------
    // Method compilation.

    pub fn compile_method(&mut self, method: NodeId, emitter: &mut Emitter) -> Result<()> {
        let data = self.builder.method(method);
        debug!(method = self.method_name(method), "compile method");

        if data.modifiers.is_external() {
            return self.compile_external_method(method, emitter);
        }

        let is_native = data.modifiers.is_native();
        if is_native {
            let mut arity = data.parameters.len();
            if matches!(data.owner, Some(Owner::Class(_))) && !data.modifiers.is_static() {
                arity += 1;
            }
            let name_id = self.builder.identifier_id(data.name);
            let holder_id = match data.owner {
                Some(Owner::Class(class)) => {
                    let class = self.builder.class(class);
                    self.builder.identifier_id(class.name)
                }
                _ => self.builder.canonical_id("<none>"),
            };
            let Some(native) = self.builder.lookup_native(name_id, holder_id) else {
                return Err(self.error(
                    ErrorKind::Compile,
                    self.builder.identifier_location(data.name),
                    format!(
                        "Cannot find native '{}'",
                        self.builder.lookup_identifier(name_id)
                    ),
                ));
            };
            if native.is_yielding() {
                emitter.invoke_native_yield(arity, native);
            } else {
                emitter.invoke_native(arity, native);
            }
            if matches!(
                data.body.map(|body| self.builder.node(body)),
                Some(Node::EmptyStatement)
            ) {
                // The bare `native;` form: a normal return happened in
                // the native, so reaching here means a fault.
                emitter.throw();
                return Ok(());
            }
        }

        debug_assert!(self.current_method.is_none());
        self.current_method = Some(method);
        let scope = self.method_owner_scope(method);

        ScopeResolver::new(&mut self.builder, &mut self.scopes, scope, self.this_name)
            .resolve_method(method)?;

        let has_this = !self.is_static_context();
        let result = self.compile_function(
            &data.parameters,
            data.body,
            scope,
            emitter,
            has_this,
            is_native,
        );
        self.current_method = None;
        result?;
        debug_assert_eq!(emitter.frame_size(), 0, "bad exit frame size");
        Ok(())
    }

    fn compile_external_method(&mut self, method: NodeId, emitter: &mut Emitter) -> Result<()> {
        let data = self.builder.method(method);
        let name_id = self.builder.identifier_id(data.name);
        if name_id == Name::NoSuchMethodTrampoline.id() as i32 {
            emitter.enter_no_such_method();
            let id = Name::NoSuchMethod.id() as i32;
            self.enqueue_selector_id(id);
            emitter.invoke_method(id, 1);
            emitter.exit_no_such_method();
            Ok(())
        } else if name_id == Name::Yield.id() as i32 {
            emitter.load_parameter(0);
            emitter.process_yield();
            emitter.ret();
            Ok(())
        } else if name_id == Name::Identical.id() as i32 {
            // Needed when identical is used through a tear-off.
            emitter.load_parameter(0);
            emitter.load_parameter(1);
            emitter.identical();
            emitter.ret();
            Ok(())
        } else {
            Err(self.error(
                ErrorKind::Compile,
                self.builder.identifier_location(data.name),
                format!(
                    "Cannot deal with external method '{}'",
                    self.builder.lookup_identifier(name_id)
                ),
            ))
        }
    }

    /// Compile one function body: bind parameters (boxing the ones
    /// captured by reference), run the body, and make sure every path
    /// returns.
    pub fn compile_function(
        &mut self,
        parameters: &[NodeId],
        body: Option<NodeId>,
        outer: ScopeId,
        emitter: &mut Emitter,
        has_this: bool,
        is_native: bool,
    ) -> Result<()> {
        let scope = self.scopes.new_scope(Some(outer));
        let mut stack_parameters = 0;

        // Setters stash the incoming value so it can be returned later.
        let current_is_setter = self
            .current_method
            .map(|method| self.builder.method(method).modifiers.is_set())
            .unwrap_or(false);
        if current_is_setter {
            stack_parameters += 1;
            emitter.load_parameter(if has_this { 1 } else { 0 });
        }

        for (i, parameter) in parameters.iter().enumerate() {
            let var = self.builder.variable(*parameter);
            if var.modifiers.is_this() {
                continue;
            }
            let mut index = i as i32;
            if has_this {
                index += 1;
            }
            let name_id = self.builder.identifier_id(var.name);
            let entry = var.entry.expect("parameter without entry");
            if self.scopes.decl(entry).capture == crate::scope::CaptureKind::ByReference {
                self.scopes.add(scope, name_id, ScopeEntry::Decl(entry));
                self.scopes.decl_mut(entry).index = emitter.frame_size();
                emitter.load_parameter(index as usize);
                emitter.allocate_boxed();
                stack_parameters += 1;
            } else {
                self.scopes.add(scope, name_id, ScopeEntry::Formal { index });
            }
        }

        if is_native {
            // The native fault value is already on the stack; bind it to
            // the `error` local of the catch form.
            let error_name = self.builder.canonicalize("error");
            let error_id = self.builder.identifier_id(error_name);
            let var = self.builder.new_node(Node::VariableDeclaration(
                crate::ast::VariableData {
                    name: error_name,
                    value: None,
                    modifiers: Modifiers::FINAL,
                    owner: None,
                    entry: None,
                    index: -1,
                    initializer_id: -1,
                },
            ));
            let entry = self.scopes.new_decl(var);
            self.scopes.decl_mut(entry).index = emitter.frame_size() - 1;
            self.builder.variable_mut(var).entry = Some(entry);
            self.scopes.add(scope, error_id, ScopeEntry::Decl(entry));
            stack_parameters += 1;
        }

        let mut visitor = ValueVisitor::new(self, emitter, scope);
        if is_empty_body(visitor.compiler.builder.nodes(), body) {
            visitor.load_null()?;
            visitor.emit_return()?;
        } else {
            let body = body.unwrap();
            visitor.accept(body)?;
            if visitor.compiler.builder.node(body).is_expression() {
                visitor.emit_return()?;
            } else if !visitor.emitter.ends_with_return() {
                visitor.load_null()?;
                visitor.emit_return()?;
            }
        }
        emitter.frame_size_fix(-stack_parameters);
        Ok(())
    }

    fn register_method(&mut self, id: i32, node: NodeId) {
        let data = self.builder.method(node);
        if data.modifiers.is_static() {
            return;
        }
        let Some(Owner::Class(class_node)) = data.owner else {
            return;
        };
        let class_id = self.builder.class(class_node).id;
        if class_id < 0 {
            return;
        }
        let is_dot = matches!(self.builder.node(data.name), Node::Dot { .. });
        let name_id = self.builder.identifier_id(data.name);
        let class_name_id = {
            let class = self.builder.class(class_node);
            self.builder.identifier_id(class.name)
        };
        // Constructors never go into the method table.
        if is_dot || (name_id != self.call_name && name_id == class_name_id) {
            return;
        }
        let arity = data.parameters.len() as u32;
        let selector = if data.modifiers.is_get() {
            Selector::getter(name_id as u32)
        } else if data.modifiers.is_set() {
            Selector::setter(name_id as u32)
        } else {
            Selector::method(name_id as u32, arity)
        };
        self.get_compiled_class_mut(class_id)
            .add_method_table_entry(selector.raw(), id);
    }

    // ------------------------------------------------------------------
    // Class helpers.

    /// Number of instance fields, optionally including inherited ones.
    pub fn field_count(&self, class_node: NodeId, include_super: bool) -> usize {
        let data = self.builder.class(class_node);
        let mut count = 0;
        for declaration in &data.declarations {
            if let Node::VariableDeclarationStatement { declarations, .. } =
                self.builder.node(*declaration)
            {
                for var in declarations {
                    if !self.builder.variable(*var).modifiers.is_static() {
                        count += 1;
                    }
                }
            }
        }
        if include_super {
            if let Some(superclass) = self.resolve_super_class(class_node) {
                count += self.field_count(superclass, true);
            }
        }
        count
    }

    pub fn method_owner_scope(&self, method: NodeId) -> ScopeId {
        match self.builder.method(method).owner {
            Some(Owner::Class(class)) => self
                .builder
                .class(class)
                .scope
                .expect("class scope not built"),
            Some(Owner::Library(library)) => self.library_scope(library),
            None => panic!("method without owner scope"),
        }
    }

    pub fn variable_owner_scope(&self, var: NodeId, fallback: ScopeId) -> ScopeId {
        match self.builder.variable(var).owner {
            Some(Owner::Class(class)) => self
                .builder
                .class(class)
                .scope
                .expect("class scope not built"),
            Some(Owner::Library(library)) => self.library_scope(library),
            None => fallback,
        }
    }

    pub fn library_scope(&self, library: NodeId) -> ScopeId {
        match self.builder.node(library) {
            Node::Library { scope, .. } => scope.expect("library scope not built"),
            other => unreachable!("expected library, found {other:?}"),
        }
    }

    fn class_name(&self, class: NodeId) -> &str {
        let data = self.builder.class(class);
        self.builder
            .lookup_identifier(self.builder.identifier_id(data.name))
    }

    fn method_name(&self, method: NodeId) -> &str {
        let data = self.builder.method(method);
        self.builder
            .lookup_identifier(self.builder.identifier_id(data.name))
    }
}
