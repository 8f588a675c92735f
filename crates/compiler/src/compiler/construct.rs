//! Constructor compilation
//!
//! A `new C(...)` call site invokes a synthesized constructor stub. The
//! stub evaluates every field initializer of the whole class hierarchy in
//! reverse order (root class fields first in the flat init area), walks
//! the initializer lists simulating the super-call chain, allocates the
//! instance, and finally invokes the explicit constructor bodies from the
//! root class down.
//!
//! The initializer-list walk itself is shared with the constant
//! interpreter as a flat action list.

use crate::ast::{Modifiers, Node, NodeId};
use crate::emitter::Emitter;
use crate::error::{ErrorKind, Result};
use crate::map::IdMap;
use crate::source::Location;

use super::visitor::ValueVisitor;
use super::Compiler;

/// One step of a constructor's initializer list, in execution order.
pub enum InitAction {
    /// A `this.field` parameter.
    ThisField {
        var: NodeId,
        field_index: usize,
        parameter_index: usize,
        assigned: bool,
    },
    /// An explicit `field = expr` initializer.
    ListField {
        var: NodeId,
        field_index: usize,
        assign: NodeId,
        assigned: bool,
    },
    /// The (explicit or implicit) super-constructor chain.
    Super {
        invoke: Option<NodeId>,
        parameter_count: usize,
    },
}

impl<'z> Compiler<'z> {
    /// Flatten one constructor's initializers into actions. Duplicate
    /// detection is left to the consumer via the `assigned` flags.
    pub(crate) fn constructor_init_actions(
        &self,
        class_node: NodeId,
        constructor: NodeId,
    ) -> Result<Vec<InitAction>> {
        struct Field {
            var: NodeId,
            index: usize,
            assigned: bool,
        }

        let class = self.builder.class(class_node);
        let mut fields: IdMap<Field> = IdMap::new();
        let mut count = 0;
        for declaration in &class.declarations {
            let Node::VariableDeclarationStatement { declarations, .. } =
                self.builder.node(*declaration)
            else {
                continue;
            };
            for var in declarations {
                let data = self.builder.variable(*var);
                if data.modifiers.is_static() {
                    continue;
                }
                let name_id = self.builder.identifier_id(data.name);
                fields.put(
                    name_id,
                    Field {
                        var: *var,
                        index: count,
                        assigned: false,
                    },
                );
                count += 1;
            }
        }

        let mut actions = Vec::new();
        let data = self.builder.method(constructor);

        for (i, parameter) in data.parameters.iter().enumerate() {
            let var = self.builder.variable(*parameter);
            if !var.modifiers.is_this() {
                continue;
            }
            let name_id = self.builder.identifier_id(var.name);
            let Some(field) = fields.lookup_mut(name_id) else {
                return Err(self.error(
                    ErrorKind::Compile,
                    self.builder.identifier_location(var.name),
                    "Initializing parameter does not name a field",
                ));
            };
            actions.push(InitAction::ThisField {
                var: field.var,
                field_index: field.index,
                parameter_index: i,
                assigned: field.assigned,
            });
            field.assigned = true;
        }

        let mut seen_super = false;
        for initializer in &data.initializers {
            match self.builder.node(*initializer).clone() {
                Node::Invoke { target, .. } => {
                    let target_is_super = match self.builder.node(target) {
                        Node::Super => true,
                        Node::Dot { object, .. } => {
                            matches!(self.builder.node(*object), Node::Super)
                        }
                        _ => false,
                    };
                    if !target_is_super {
                        return Err(self.error(
                            ErrorKind::Compile,
                            Location::invalid(),
                            "Only super calls are allowed in initializer lists",
                        ));
                    }
                    if seen_super {
                        return Err(self.error(
                            ErrorKind::Compile,
                            Location::invalid(),
                            "Multiple super initializers",
                        ));
                    }
                    actions.push(InitAction::Super {
                        invoke: Some(*initializer),
                        parameter_count: data.parameters.len(),
                    });
                    seen_super = true;
                }
                Node::Assign { target, .. } => {
                    let mut target = target;
                    if let Node::Dot { object, name } = self.builder.node(target) {
                        debug_assert!(matches!(self.builder.node(*object), Node::This));
                        target = *name;
                    }
                    let scope = class.scope.expect("class scope not built");
                    let Some(resolved) = self.resolve(target, scope) else {
                        return Err(self.error(
                            ErrorKind::Compile,
                            self.builder.identifier_location(target),
                            "Cannot resolve field initializer target",
                        ));
                    };
                    if !matches!(self.builder.node(resolved), Node::VariableDeclaration(_)) {
                        return Err(self.error(
                            ErrorKind::Compile,
                            self.builder.identifier_location(target),
                            "Field initializer target is not a field",
                        ));
                    }
                    let name_id = self.builder.identifier_id(target);
                    let Some(field) = fields.lookup_mut(name_id) else {
                        return Err(self.error(
                            ErrorKind::Compile,
                            self.builder.identifier_location(target),
                            "Field initializer target is not a field of this class",
                        ));
                    };
                    actions.push(InitAction::ListField {
                        var: field.var,
                        field_index: field.index,
                        assign: *initializer,
                        assigned: field.assigned,
                    });
                    field.assigned = true;
                }
                other => {
                    return Err(self.error(
                        ErrorKind::Compile,
                        Location::invalid(),
                        format!("Invalid initializer {other:?}"),
                    ));
                }
            }
        }
        if class.superclass.is_some() && !seen_super {
            actions.push(InitAction::Super {
                invoke: None,
                parameter_count: data.parameters.len(),
            });
        }
        Ok(actions)
    }

    /// Compile the factory-shaped stub for a generative constructor.
    pub(crate) fn compile_constructor(&mut self, class_id: i32, constructor: NodeId) -> Result<i32> {
        let class_node = self.get_compiled_class(class_id).node;

        // All classes in the hierarchy, subclass first.
        let mut chain = vec![class_node];
        let mut super_node = self.get_compiled_class(class_id).superclass;
        while let Some(node) = super_node {
            chain.push(node);
            let id = self.builder.class(node).id;
            super_node = self.get_compiled_class(id).superclass;
        }

        let parameters = self.builder.method(constructor).parameters.clone();
        let class_scope = self
            .builder
            .class(class_node)
            .scope
            .expect("class scope not built");

        let mut emitter = Emitter::new(parameters.len());
        let mut visitor = ValueVisitor::new(self, &mut emitter, class_scope);

        // Field initializers walk the hierarchy root class first, so
        // the fields sit in the init area in instance layout order
        // (super fields at the lower offsets). The constant interner
        // keys instance fields in this same order.
        let mut total_field_count = 0;
        for class in chain.iter().rev() {
            let declarations = visitor.compiler.builder.class(*class).declarations.clone();
            for declaration in declarations {
                let Node::VariableDeclarationStatement { declarations, .. } =
                    visitor.compiler.builder.node(declaration).clone()
                else {
                    continue;
                };
                for var in declarations {
                    let data = visitor.compiler.builder.variable(var);
                    if data.modifiers.is_static() {
                        continue;
                    }
                    total_field_count += 1;
                    match data.value {
                        Some(value) => visitor.accept(value)?,
                        None => visitor.load_null()?,
                    }
                }
            }
        }

        // The constructor parameters, as locals above the fields.
        for i in 0..parameters.len() {
            visitor.emitter.load_parameter(i);
        }

        // Walk the initializer lists and the simulated super chain.
        let mut constructors = Vec::new();
        let mut argument_counts = Vec::new();
        visitor.compile_constructor_level(
            class_node,
            constructor,
            total_field_count as i32,
            &mut constructors,
            &mut argument_counts,
        )?;

        // Allocate the instance from the initialized field slots.
        for i in 0..total_field_count {
            visitor.emitter.load_local(i as i32);
        }
        visitor.emitter.allocate(class_id, total_field_count);

        // Invoke the explicit constructor bodies, root class last pushed
        // so it runs first.
        let mut params_offset = visitor.emitter.frame_size() - 1;
        for at in (0..constructors.len()).rev() {
            let current = constructors[at];
            let current_parameters = visitor.compiler.builder.method(current).parameters.clone();
            params_offset -= current_parameters.len() as i32;

            if !crate::ast::is_empty_body(
                visitor.compiler.builder.nodes(),
                visitor.compiler.builder.method(current).body,
            ) {
                let id = visitor.compiler.enqueue_method(current);
                visitor.emitter.dup();
                for j in 0..current_parameters.len() {
                    visitor.emitter.load_local(params_offset + j as i32);
                }
                visitor
                    .emitter
                    .invoke_static(1 + current_parameters.len(), id);
                visitor.emitter.pop();
            }

            if at > 0 {
                params_offset -= argument_counts[at - 1] as i32;
            }
        }
        visitor.emitter.ret();

        let name = self.builder.method(constructor).name;
        let stub = self.builder.new_node(Node::Method(crate::ast::MethodData {
            modifiers: Modifiers::STATIC,
            name,
            parameters: Vec::new(),
            initializers: Vec::new(),
            body: None,
            id: -1,
            owner: Some(crate::ast::Owner::Class(class_node)),
            captured: Vec::new(),
        }));
        let code = emitter.into_code();
        Ok(self.add_stub(stub, code))
    }
}

impl<'c, 'z> ValueVisitor<'c, 'z> {
    /// One level of the constructor chain: bind parameters into the
    /// constructor scope, run the initializer actions, recurse into the
    /// super constructor.
    fn compile_constructor_level(
        &mut self,
        class_node: NodeId,
        constructor: NodeId,
        params_offset: i32,
        constructors: &mut Vec<NodeId>,
        argument_counts: &mut Vec<usize>,
    ) -> Result<()> {
        let class_scope = self
            .compiler
            .builder
            .class(class_node)
            .scope
            .expect("class scope not built");

        // Scope resolution introduces the parameter entries.
        let owner_scope = class_scope;
        let this_name = self.compiler.this_name();
        crate::scope_resolver::ScopeResolver::new(
            &mut self.compiler.builder,
            &mut self.compiler.scopes,
            owner_scope,
            this_name,
        )
        .resolve_method(constructor)?;

        let data = self.compiler.builder.method(constructor);
        let constructor_scope = self.compiler.scopes.new_scope(Some(class_scope));
        for (i, parameter) in data.parameters.iter().enumerate() {
            let var = self.compiler.builder.variable(*parameter);
            if var.modifiers.is_this() {
                continue;
            }
            let entry = var.entry.expect("parameter without entry");
            self.compiler.scopes.decl_mut(entry).index = params_offset + i as i32;
            let name_id = self.compiler.builder.identifier_id(var.name);
            self.compiler
                .scopes
                .add(constructor_scope, name_id, crate::scope::ScopeEntry::Decl(entry));
        }

        constructors.push(constructor);

        let actions = self
            .compiler
            .constructor_init_actions(class_node, constructor)?;
        let hierarchy_offset = (self.compiler.field_count(class_node, true)
            - self.compiler.field_count(class_node, false)) as i32;

        for action in actions {
            match action {
                InitAction::ThisField {
                    var,
                    field_index,
                    parameter_index,
                    assigned,
                } => {
                    if assigned {
                        let name = self.compiler.builder.variable(var).name;
                        return Err(self.compiler.error(
                            ErrorKind::Compile,
                            self.compiler.builder.identifier_location(name),
                            "Duplicate field initializer",
                        ));
                    }
                    let data = self.compiler.builder.variable(var);
                    if data.modifiers.is_final() && data.has_initializer() {
                        self.handle_unresolved(data.name)?;
                        continue;
                    }
                    self.emitter
                        .load_local(params_offset + parameter_index as i32);
                    self.emitter
                        .store_local(hierarchy_offset + field_index as i32);
                    self.emitter.pop();
                }
                InitAction::ListField {
                    var,
                    field_index,
                    assign,
                    assigned,
                } => {
                    if assigned {
                        let name = self.compiler.builder.variable(var).name;
                        return Err(self.compiler.error(
                            ErrorKind::Compile,
                            self.compiler.builder.identifier_location(name),
                            "Duplicate field initializer",
                        ));
                    }
                    let data = self.compiler.builder.variable(var);
                    if data.modifiers.is_final() && data.has_initializer() {
                        self.handle_unresolved(data.name)?;
                        continue;
                    }
                    let Node::Assign { value, .. } = self.compiler.builder.node(assign).clone()
                    else {
                        unreachable!("list initializer holds assign");
                    };
                    let saved = self.set_scope(constructor_scope);
                    self.accept(value)?;
                    self.set_scope(saved);
                    self.emitter
                        .store_local(hierarchy_offset + field_index as i32);
                    self.emitter.pop();
                }
                InitAction::Super {
                    invoke,
                    parameter_count,
                } => {
                    self.compile_super_initializer(
                        class_node,
                        constructor_scope,
                        invoke,
                        parameter_count,
                        params_offset,
                        constructors,
                        argument_counts,
                    )?;
                }
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn compile_super_initializer(
        &mut self,
        class_node: NodeId,
        constructor_scope: crate::scope::ScopeId,
        invoke: Option<NodeId>,
        parameter_count: usize,
        params_offset: i32,
        constructors: &mut Vec<NodeId>,
        argument_counts: &mut Vec<usize>,
    ) -> Result<()> {
        let super_node = match self.compiler.resolve_super_class(class_node) {
            Some(node) => node,
            None => {
                let class_scope = self
                    .compiler
                    .builder
                    .class(class_node)
                    .scope
                    .expect("class scope not built");
                let object = self.compiler.builder.canonicalize("Object");
                match self.compiler.lookup_class(class_scope, object) {
                    Ok(node) => node,
                    Err(_) => self.compiler.enqueue_core_class("Object")?,
                }
            }
        };
        let super_id = self.compiler.enqueue_class(super_node)?;

        let mut constructor_name_id = {
            let super_class = self.compiler.builder.class(super_node);
            self.compiler.builder.identifier_id(super_class.name)
        };
        let mut arguments = Vec::new();
        let mut named_arguments = Vec::new();
        if let Some(invoke) = invoke {
            let Node::Invoke {
                target,
                arguments: args,
                named_arguments: named,
            } = self.compiler.builder.node(invoke).clone()
            else {
                unreachable!("super initializer holds invoke");
            };
            if let Node::Dot { name, .. } = self.compiler.builder.node(target) {
                constructor_name_id = self.compiler.builder.identifier_id(*name);
            }
            arguments = args;
            named_arguments = named;
        }

        let Some(super_constructor) = self
            .compiler
            .get_compiled_class(super_id)
            .lookup_constructor(constructor_name_id)
        else {
            return Err(self.compiler.error(
                ErrorKind::Compile,
                Location::invalid(),
                format!(
                    "Cannot find constructor '{}'",
                    self.compiler.builder.lookup_identifier(constructor_name_id)
                ),
            ));
        };
        let current = *constructors.last().unwrap();
        if self.compiler.builder.method(current).modifiers.is_const()
            && !self
                .compiler
                .builder
                .method(super_constructor)
                .modifiers
                .is_const()
        {
            return Err(self.compiler.error(
                ErrorKind::Const,
                Location::invalid(),
                "Cannot call non-const constructor from const constructor",
            ));
        }

        // Push the super arguments, matched into the super constructor's
        // parameter order with defaults folded in.
        let saved = self.set_scope(constructor_scope);
        let result = self.match_constructor_parameters(
            super_constructor,
            &arguments,
            &named_arguments,
        );
        self.set_scope(saved);
        result?;
        argument_counts.push(arguments.len());

        self.compile_constructor_level(
            super_node,
            super_constructor,
            params_offset + arguments.len() as i32 + parameter_count as i32,
            constructors,
            argument_counts,
        )
    }

    /// Load `arguments` once, then push one value per super-constructor
    /// parameter: a copy of the matching argument, or the folded default.
    fn match_constructor_parameters(
        &mut self,
        constructor: NodeId,
        arguments: &[NodeId],
        named_arguments: &[NodeId],
    ) -> Result<()> {
        let parameters = self.compiler.builder.method(constructor).parameters.clone();
        if arguments.len() > parameters.len() {
            return Err(self.compiler.error(
                ErrorKind::Compile,
                Location::invalid(),
                "Invalid arguments to constructor",
            ));
        }
        let mut positions = Vec::with_capacity(arguments.len());
        for argument in arguments {
            positions.push(self.emitter.frame_size());
            self.accept(*argument)?;
        }
        let pos_arg_count = arguments.len() - named_arguments.len();
        let mut pos_index = 0;
        for parameter in &parameters {
            let var = self.compiler.builder.variable(*parameter);
            if var.modifiers.is_named() {
                let name_id = self.compiler.builder.identifier_id(var.name);
                let mut matched = false;
                for (i, named) in named_arguments.iter().enumerate() {
                    if self.compiler.builder.identifier_id(*named) == name_id {
                        let index = arguments.len() - named_arguments.len() + i;
                        self.emitter.load_local(positions[index]);
                        matched = true;
                        break;
                    }
                }
                if !matched {
                    match var.value {
                        Some(value) => self.load_const_node(value, Some(self.scope()))?,
                        None => self.load_null()?,
                    }
                }
            } else if pos_index < pos_arg_count {
                self.emitter.load_local(positions[pos_index]);
                pos_index += 1;
            } else if var.modifiers.is_positional() && pos_index >= pos_arg_count {
                match var.value {
                    Some(value) => self.load_const_node(value, Some(self.scope()))?,
                    None => self.load_null()?,
                }
            } else {
                return Err(self.compiler.error(
                    ErrorKind::Compile,
                    Location::invalid(),
                    "Invalid arguments to constructor",
                ));
            }
        }
        if pos_arg_count != pos_index {
            return Err(self.compiler.error(
                ErrorKind::Compile,
                Location::invalid(),
                "Invalid arguments to constructor",
            ));
        }
        Ok(())
    }
}
