//! The constant interpreter
//!
//! Folds `const` expressions into a deduplicated pool of tagged constant
//! objects. Interning is structural: the three singletons by identity,
//! integers/doubles/strings through hash maps (doubles by bit pattern),
//! and lists, maps, and instances through tries keyed by the sequence of
//! their element constant ids, so `intern(x) == intern(y)` exactly when
//! the two values are structurally equal.
//!
//! Const constructor invocations are evaluated by walking the same
//! initializer actions the code generator uses, recursing through the
//! super chain; every field must be `final` and receive exactly one
//! initializer.

use crate::ast::{Node, NodeId};
use crate::compiler::{Compiler, InitAction};
use crate::error::{ErrorKind, Result};
use crate::map::{IntMap, StringMap};
use crate::scope::ScopeId;
use crate::source::Location;
use crate::tokens::TokenKind;
use crate::trie::Trie;

pub const CONST_NULL_ID: i32 = 0;
pub const CONST_TRUE_ID: i32 = 1;
pub const CONST_FALSE_ID: i32 = 2;

#[derive(Debug, Clone, PartialEq)]
pub enum ConstObject {
    Null,
    True,
    False,
    Integer(i64),
    Double(f64),
    Str(String),
    /// Element ids in order.
    List(Vec<i32>),
    /// Interleaved key/value ids.
    Map(Vec<i32>),
    /// Field ids in root-class-first order, the same order the fields
    /// are laid out in the instance and streamed to the VM. Any fixed
    /// per-class enumeration is an equivalent interning key; keying in
    /// layout order keeps one field walk for interning and emission.
    Instance { class: NodeId, fields: Vec<i32> },
}

pub struct ConstPool {
    objects: Vec<ConstObject>,
    integers: IntMap<i32>,
    doubles: IntMap<i32>,
    strings: StringMap<i32>,
    lists: Trie<Option<i32>>,
    maps: Trie<Option<i32>>,
    /// Keyed by class id first, then field ids.
    instances: Trie<Option<i32>>,
}

impl ConstPool {
    pub fn new() -> ConstPool {
        ConstPool {
            objects: vec![ConstObject::Null, ConstObject::True, ConstObject::False],
            integers: IntMap::new(),
            doubles: IntMap::new(),
            strings: StringMap::new(),
            lists: Trie::new(),
            maps: Trie::new(),
            instances: Trie::new(),
        }
    }

    pub fn objects(&self) -> &[ConstObject] {
        &self.objects
    }

    pub fn get(&self, id: i32) -> &ConstObject {
        &self.objects[id as usize]
    }

    pub fn intern_null(&mut self) -> i32 {
        CONST_NULL_ID
    }

    pub fn intern_true(&mut self) -> i32 {
        CONST_TRUE_ID
    }

    pub fn intern_false(&mut self) -> i32 {
        CONST_FALSE_ID
    }

    pub fn intern_integer(&mut self, value: i64) -> i32 {
        if let Some(id) = self.integers.lookup(value) {
            return *id;
        }
        let id = self.objects.len() as i32;
        self.objects.push(ConstObject::Integer(value));
        self.integers.add(value, id);
        id
    }

    pub fn intern_double(&mut self, value: f64) -> i32 {
        let bits = value.to_bits() as i64;
        if let Some(id) = self.doubles.lookup(bits) {
            return *id;
        }
        let id = self.objects.len() as i32;
        self.objects.push(ConstObject::Double(value));
        self.doubles.add(bits, id);
        id
    }

    pub fn intern_string(&mut self, value: &str) -> i32 {
        if let Some(id) = self.strings.lookup(value) {
            return *id;
        }
        let id = self.objects.len() as i32;
        self.objects.push(ConstObject::Str(value.to_string()));
        self.strings.add(value, id);
        id
    }

    pub fn intern_list(&mut self, elements: Vec<i32>) -> i32 {
        let node = self.lists.walk(elements.iter().copied());
        if let Some(id) = *self.lists.payload(node) {
            return id;
        }
        let id = self.objects.len() as i32;
        self.objects.push(ConstObject::List(elements));
        *self.lists.payload_mut(node) = Some(id);
        id
    }

    pub fn intern_map(&mut self, elements: Vec<i32>) -> i32 {
        let node = self.maps.walk(elements.iter().copied());
        if let Some(id) = *self.maps.payload(node) {
            return id;
        }
        let id = self.objects.len() as i32;
        self.objects.push(ConstObject::Map(elements));
        *self.maps.payload_mut(node) = Some(id);
        id
    }

    pub fn intern_instance(&mut self, class_id: i32, class: NodeId, fields: Vec<i32>) -> i32 {
        let node = self
            .instances
            .walk(std::iter::once(class_id).chain(fields.iter().copied()));
        if let Some(id) = *self.instances.payload(node) {
            return id;
        }
        let id = self.objects.len() as i32;
        self.objects.push(ConstObject::Instance { class, fields });
        *self.instances.payload_mut(node) = Some(id);
        id
    }
}

impl Default for ConstPool {
    fn default() -> ConstPool {
        ConstPool::new()
    }
}

impl<'z> Compiler<'z> {
    /// Fold a const expression; failing to fold is fatal here.
    pub fn const_interpret(&mut self, node: NodeId, scope: Option<ScopeId>) -> Result<i32> {
        match self.const_resolve(node, scope)? {
            Some(id) => Ok(id),
            None => Err(self.error(
                ErrorKind::Const,
                Location::invalid(),
                "Expression is not a compile-time constant",
            )),
        }
    }

    /// A const instance of a fieldless class, for compiler-internal
    /// markers.
    pub fn const_pool_instance_of(&mut self, class: NodeId) -> Result<i32> {
        let class_id = self.enqueue_class(class)?;
        debug_assert_eq!(self.field_count(class, true), 0);
        Ok(self.const_pool.intern_instance(class_id, class, Vec::new()))
    }

    /// Evaluate to a constant id, or `None` when the expression is not
    /// constant (`const` contexts turn that into an error).
    pub(crate) fn const_resolve(&mut self, node: NodeId, scope: Option<ScopeId>) -> Result<Option<i32>> {
        match self.builder.node(node).clone() {
            Node::NullLiteral => Ok(Some(self.const_pool.intern_null())),
            Node::LiteralBoolean(value) => Ok(Some(if value {
                self.const_pool.intern_true()
            } else {
                self.const_pool.intern_false()
            })),
            Node::LiteralInteger(value) => Ok(Some(self.const_pool.intern_integer(value))),
            Node::LiteralDouble(value) => Ok(Some(self.const_pool.intern_double(value))),
            Node::LiteralString(value) => Ok(Some(self.const_pool.intern_string(&value))),
            Node::Parenthesized { expression, .. } => self.const_resolve(expression, scope),
            Node::Unary {
                token, expression, ..
            } => self.const_unary(token, expression, scope),
            Node::Binary { token, left, right } => self.const_binary(token, left, right, scope),
            Node::Conditional {
                condition,
                if_true,
                if_false,
            } => {
                let Some(condition) = self.const_resolve(condition, scope)? else {
                    return Ok(None);
                };
                match condition {
                    CONST_TRUE_ID => self.const_resolve(if_true, scope),
                    CONST_FALSE_ID => self.const_resolve(if_false, scope),
                    _ => Ok(None),
                }
            }
            Node::LiteralList { elements, .. } => {
                let mut ids = Vec::with_capacity(elements.len());
                for element in elements {
                    match self.const_resolve(element, scope)? {
                        Some(id) => ids.push(id),
                        None => return Ok(None),
                    }
                }
                Ok(Some(self.const_pool.intern_list(ids)))
            }
            Node::LiteralMap { keys, values, .. } => {
                let mut ids = Vec::with_capacity(keys.len() * 2);
                for (key, value) in keys.iter().zip(values.iter()) {
                    match self.const_resolve(*key, scope)? {
                        Some(id) => ids.push(id),
                        None => return Ok(None),
                    }
                    match self.const_resolve(*value, scope)? {
                        Some(id) => ids.push(id),
                        None => return Ok(None),
                    }
                }
                Ok(Some(self.const_pool.intern_map(ids)))
            }
            Node::Identifier { .. } | Node::Dot { .. } => self.const_lookup(node, scope),
            Node::New { is_const, invoke } => {
                if !is_const {
                    return Ok(None);
                }
                self.const_new(invoke, scope).map(Some)
            }
            _ => Ok(None),
        }
    }

    fn const_unary(
        &mut self,
        token: TokenKind,
        expression: NodeId,
        scope: Option<ScopeId>,
    ) -> Result<Option<i32>> {
        let Some(value) = self.const_resolve(expression, scope)? else {
            return Ok(None);
        };
        match (token, self.const_pool.get(value).clone()) {
            (TokenKind::BitNot, ConstObject::Integer(value)) => {
                Ok(Some(self.const_pool.intern_integer(!value)))
            }
            (TokenKind::Sub, ConstObject::Integer(value)) => {
                Ok(Some(self.const_pool.intern_integer(-value)))
            }
            (TokenKind::Sub, ConstObject::Double(value)) => {
                Ok(Some(self.const_pool.intern_double(-value)))
            }
            (TokenKind::Not, ConstObject::True) => Ok(Some(self.const_pool.intern_false())),
            (TokenKind::Not, ConstObject::False) => Ok(Some(self.const_pool.intern_true())),
            _ => Err(self.error(
                ErrorKind::Const,
                Location::invalid(),
                format!("Cannot fold unary '{}'", token.syntax()),
            )),
        }
    }

    fn const_binary(
        &mut self,
        token: TokenKind,
        left: NodeId,
        right: NodeId,
        scope: Option<ScopeId>,
    ) -> Result<Option<i32>> {
        let Some(left) = self.const_resolve(left, scope)? else {
            return Ok(None);
        };
        let Some(right) = self.const_resolve(right, scope)? else {
            return Ok(None);
        };
        let left = self.const_pool.get(left).clone();
        let right = self.const_pool.get(right).clone();
        if let (ConstObject::Integer(l), ConstObject::Integer(r)) = (&left, &right) {
            let (l, r) = (*l, *r);
            let value = match token {
                TokenKind::Shl => l << r,
                TokenKind::Shr => l >> r,
                TokenKind::Add => l + r,
                TokenKind::Sub => l - r,
                TokenKind::Mul => l * r,
                TokenKind::TruncDiv => {
                    if r == 0 {
                        return Err(self.error(
                            ErrorKind::Const,
                            Location::invalid(),
                            "Division by zero in constant expression",
                        ));
                    }
                    l / r
                }
                TokenKind::Mod => {
                    if r == 0 {
                        return Err(self.error(
                            ErrorKind::Const,
                            Location::invalid(),
                            "Division by zero in constant expression",
                        ));
                    }
                    l % r
                }
                TokenKind::BitAnd => l & r,
                TokenKind::BitOr => l | r,
                TokenKind::BitXor => l ^ r,
                _ => {
                    return Err(self.error(
                        ErrorKind::Const,
                        Location::invalid(),
                        format!("Cannot fold binary '{}'", token.syntax()),
                    ));
                }
            };
            return Ok(Some(self.const_pool.intern_integer(value)));
        }
        if let (ConstObject::Double(l), ConstObject::Double(r)) = (&left, &right) {
            let (l, r) = (*l, *r);
            let value = match token {
                TokenKind::Add => l + r,
                TokenKind::Sub => l - r,
                TokenKind::Mul => l * r,
                TokenKind::Div => l / r,
                _ => {
                    return Err(self.error(
                        ErrorKind::Const,
                        Location::invalid(),
                        format!("Cannot fold binary '{}'", token.syntax()),
                    ));
                }
            };
            return Ok(Some(self.const_pool.intern_double(value)));
        }
        if let (ConstObject::Str(l), ConstObject::Str(r)) = (&left, &right) {
            if token == TokenKind::Add {
                let combined = format!("{l}{r}");
                return Ok(Some(self.const_pool.intern_string(&combined)));
            }
        }
        Err(self.error(
            ErrorKind::Const,
            Location::invalid(),
            format!("Cannot fold binary '{}'", token.syntax()),
        ))
    }

    /// A const identifier or dotted lookup resolves through the
    /// declaration's own scope.
    fn const_lookup(&mut self, node: NodeId, scope: Option<ScopeId>) -> Result<Option<i32>> {
        let Some(scope) = scope else {
            return Err(self.error(
                ErrorKind::Resolve,
                self.builder.identifier_location(node),
                "Unresolved symbol in constant expression",
            ));
        };
        let Some(resolved) = self.resolve(node, scope) else {
            return Err(self.error(
                ErrorKind::Resolve,
                self.builder.identifier_location(node),
                format!(
                    "Unresolved symbol '{}' in constant expression",
                    self.builder
                        .lookup_identifier(self.builder.identifier_id(node))
                ),
            ));
        };
        if !matches!(self.builder.node(resolved), Node::VariableDeclaration(_)) {
            return Err(self.error(
                ErrorKind::Const,
                self.builder.identifier_location(node),
                "Constant expression expected",
            ));
        }
        let data = self.builder.variable(resolved);
        let Some(value) = data.value else {
            return Err(self.error(
                ErrorKind::Const,
                self.builder.identifier_location(node),
                "Constant expression expected",
            ));
        };
        if !data.modifiers.is_const() {
            return Ok(None);
        }
        let var_scope = self.variable_owner_scope(resolved, scope);
        self.const_resolve(value, Some(var_scope))
    }

    /// Evaluate `const C(...)`: fold every field of the hierarchy.
    fn const_new(&mut self, invoke: NodeId, scope: Option<ScopeId>) -> Result<i32> {
        let Node::Invoke {
            target, arguments, ..
        } = self.builder.node(invoke).clone()
        else {
            unreachable!("new holds invoke");
        };
        let (class_name, constructor_name) = match self.builder.node(target).clone() {
            Node::Dot { object, name } => (object, name),
            _ => (target, target),
        };
        let Some(scope) = scope else {
            return Err(self.error(
                ErrorKind::Resolve,
                Location::invalid(),
                "Unresolved constructor in constant expression",
            ));
        };
        let class_node = match self.lookup_class(scope, class_name) {
            Ok(node) => node,
            Err(error) => {
                // Compiler-internal const instances name core classes
                // that may only exist synthetically.
                let name_id = self.builder.identifier_id(class_name);
                let name = self.builder.lookup_identifier(name_id).to_string();
                match self.enqueue_core_class(&name) {
                    Ok(node) => node,
                    Err(_) => return Err(error),
                }
            }
        };
        let class_id = self.enqueue_class(class_node)?;

        // Gather the hierarchy, then fold field initializers with the
        // root class's fields first: the same layout order the
        // constructor stubs initialize and the session streams.
        let mut chain = vec![class_node];
        let mut super_node = self.get_compiled_class(class_id).superclass;
        while let Some(node) = super_node {
            chain.push(node);
            let id = self.builder.class(node).id;
            super_node = self.get_compiled_class(id).superclass;
        }

        let mut fields: Vec<Option<i32>> = Vec::new();
        for class in chain.iter().rev() {
            let class_data = self.builder.class(*class);
            let class_scope = class_data.scope;
            for declaration in class_data.declarations {
                let Node::VariableDeclarationStatement { declarations, .. } =
                    self.builder.node(declaration).clone()
                else {
                    continue;
                };
                for var in declarations {
                    let data = self.builder.variable(var);
                    if data.modifiers.is_static() {
                        continue;
                    }
                    if !data.modifiers.is_final() {
                        return Err(self.error(
                            ErrorKind::Const,
                            self.builder.identifier_location(data.name),
                            "Non-final field in const instantiation",
                        ));
                    }
                    match data.value {
                        Some(value) => {
                            let folded = self.const_interpret(value, class_scope)?;
                            fields.push(Some(folded));
                        }
                        None => fields.push(Some(CONST_NULL_ID)),
                    }
                }
            }
        }

        let constructor_name_id = self.builder.identifier_id(constructor_name);
        let Some(constructor) = self
            .get_compiled_class(class_id)
            .lookup_constructor(constructor_name_id)
        else {
            return Err(self.error(
                ErrorKind::Const,
                self.builder.identifier_location(constructor_name),
                "Constructor not found",
            ));
        };

        let field_offset = fields.len() - self.field_count(class_node, false);
        self.const_constructor(
            class_node,
            constructor,
            &arguments,
            scope,
            field_offset,
            &mut fields,
        )?;

        let fields: Vec<i32> = fields
            .into_iter()
            .map(|field| field.unwrap_or(CONST_NULL_ID))
            .collect();
        Ok(self.const_pool.intern_instance(class_id, class_node, fields))
    }

    /// Evaluate one constructor level of a const instantiation.
    fn const_constructor(
        &mut self,
        class_node: NodeId,
        constructor: NodeId,
        arguments: &[NodeId],
        caller_scope: ScopeId,
        field_offset: usize,
        fields: &mut Vec<Option<i32>>,
    ) -> Result<()> {
        let data = self.builder.method(constructor);
        if !data.modifiers.is_const() {
            return Err(self.error(
                ErrorKind::Const,
                self.builder.identifier_location(data.name),
                "Constructor is not const",
            ));
        }

        // Bind parameters to the folded argument values by building a
        // lookup of parameter name to argument expression.
        let mut parameter_values: IdMapValues = IdMapValues::new();
        for (i, parameter) in data.parameters.iter().enumerate() {
            let var = self.builder.variable(*parameter);
            let name_id = self.builder.identifier_id(var.name);
            if i < arguments.len() {
                parameter_values.add(name_id, ParameterValue::Argument(arguments[i]));
            } else if let Some(value) = var.value {
                parameter_values.add(name_id, ParameterValue::Default(value));
            } else {
                parameter_values.add(name_id, ParameterValue::Null);
            }
        }

        let class_scope = self
            .builder
            .class(class_node)
            .scope
            .expect("class scope not built");
        let actions = self.constructor_init_actions(class_node, constructor)?;
        for action in actions {
            match action {
                InitAction::ThisField {
                    var,
                    field_index,
                    parameter_index,
                    assigned,
                } => {
                    let data = self.builder.variable(var);
                    if assigned || data.has_initializer() {
                        return Err(self.error(
                            ErrorKind::Const,
                            self.builder.identifier_location(data.name),
                            "Duplicate field initializer",
                        ));
                    }
                    let argument = arguments.get(parameter_index).copied();
                    let value = match argument {
                        Some(argument) => self.const_interpret(argument, Some(caller_scope))?,
                        None => {
                            let parameters =
                                self.builder.method(constructor).parameters;
                            let default =
                                self.builder.variable(parameters[parameter_index]).value;
                            match default {
                                Some(value) => self.const_interpret(value, Some(class_scope))?,
                                None => CONST_NULL_ID,
                            }
                        }
                    };
                    fields[field_offset + field_index] = Some(value);
                }
                InitAction::ListField {
                    var,
                    field_index,
                    assign,
                    assigned,
                } => {
                    let data = self.builder.variable(var);
                    if assigned || data.has_initializer() {
                        return Err(self.error(
                            ErrorKind::Const,
                            self.builder.identifier_location(data.name),
                            "Duplicate field initializer",
                        ));
                    }
                    let Node::Assign { value, .. } = self.builder.node(assign).clone() else {
                        unreachable!("list initializer holds assign");
                    };
                    let folded = self.const_resolve_with_parameters(
                        value,
                        class_scope,
                        caller_scope,
                        &parameter_values,
                    )?;
                    fields[field_offset + field_index] = Some(folded);
                }
                InitAction::Super { invoke, .. } => {
                    let super_node = self.resolve_super_class(class_node);
                    let Some(super_node) = super_node else {
                        if invoke.is_some() {
                            return Err(self.error(
                                ErrorKind::Const,
                                Location::invalid(),
                                "Super initializer without superclass",
                            ));
                        }
                        continue;
                    };
                    let super_id = self.enqueue_class(super_node)?;
                    let mut constructor_name_id = {
                        let super_class = self.builder.class(super_node);
                        self.builder.identifier_id(super_class.name)
                    };
                    let mut super_arguments = Vec::new();
                    if let Some(invoke) = invoke {
                        let Node::Invoke {
                            target,
                            arguments: args,
                            ..
                        } = self.builder.node(invoke).clone()
                        else {
                            unreachable!("super initializer holds invoke");
                        };
                        if let Node::Dot { name, .. } = self.builder.node(target) {
                            constructor_name_id = self.builder.identifier_id(*name);
                        }
                        super_arguments = args;
                    }
                    let Some(super_constructor) = self
                        .get_compiled_class(super_id)
                        .lookup_constructor(constructor_name_id)
                    else {
                        return Err(self.error(
                            ErrorKind::Const,
                            Location::invalid(),
                            "Constructor not found",
                        ));
                    };
                    let offset = field_offset - self.field_count(super_node, false);
                    self.const_constructor(
                        super_node,
                        super_constructor,
                        &super_arguments,
                        caller_scope,
                        offset,
                        fields,
                    )?;
                }
            }
        }
        Ok(())
    }

    /// Fold an initializer-list expression, resolving constructor
    /// parameters to their (const) argument expressions.
    fn const_resolve_with_parameters(
        &mut self,
        node: NodeId,
        class_scope: ScopeId,
        caller_scope: ScopeId,
        parameters: &IdMapValues,
    ) -> Result<i32> {
        if let Node::Identifier { id, .. } = self.builder.node(node) {
            if let Some(value) = parameters.lookup(*id) {
                return match value {
                    ParameterValue::Argument(argument) => {
                        self.const_interpret(argument, Some(caller_scope))
                    }
                    ParameterValue::Default(default) => {
                        self.const_interpret(default, Some(class_scope))
                    }
                    ParameterValue::Null => Ok(CONST_NULL_ID),
                };
            }
        }
        self.const_interpret(node, Some(class_scope))
    }
}

#[derive(Clone, Copy)]
enum ParameterValue {
    Argument(NodeId),
    Default(NodeId),
    Null,
}

struct IdMapValues {
    map: crate::map::IdMap<ParameterValue>,
}

impl IdMapValues {
    fn new() -> IdMapValues {
        IdMapValues {
            map: crate::map::IdMap::new(),
        }
    }

    fn add(&mut self, id: i32, value: ParameterValue) {
        self.map.put(id, value);
    }

    fn lookup(&self, id: i32) -> Option<ParameterValue> {
        self.map.lookup(id).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn singletons_have_fixed_ids() {
        let mut pool = ConstPool::new();
        assert_eq!(pool.intern_null(), CONST_NULL_ID);
        assert_eq!(pool.intern_true(), CONST_TRUE_ID);
        assert_eq!(pool.intern_false(), CONST_FALSE_ID);
    }

    #[test]
    fn integers_dedup_by_value() {
        let mut pool = ConstPool::new();
        let a = pool.intern_integer(42);
        let b = pool.intern_integer(42);
        let c = pool.intern_integer(43);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn doubles_dedup_by_bit_pattern() {
        let mut pool = ConstPool::new();
        let a = pool.intern_double(1.5);
        let b = pool.intern_double(1.5);
        assert_eq!(a, b);
        // 0.0 and -0.0 differ bitwise and stay distinct.
        assert_ne!(pool.intern_double(0.0), pool.intern_double(-0.0));
        // NaN equals itself by bits.
        assert_eq!(pool.intern_double(f64::NAN), pool.intern_double(f64::NAN));
    }

    #[test]
    fn strings_dedup_by_content() {
        let mut pool = ConstPool::new();
        let a = pool.intern_string("hello");
        let b = pool.intern_string(&format!("hel{}", "lo"));
        let c = pool.intern_string("other");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn lists_dedup_structurally() {
        let mut pool = ConstPool::new();
        let one = pool.intern_integer(1);
        let two = pool.intern_integer(2);
        let a = pool.intern_list(vec![one, two]);
        let b = pool.intern_list(vec![one, two]);
        let c = pool.intern_list(vec![two, one]);
        let d = pool.intern_list(vec![one]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
    }

    #[test]
    fn maps_key_on_interleaved_pairs() {
        let mut pool = ConstPool::new();
        let k = pool.intern_string("k");
        let one = pool.intern_integer(1);
        let two = pool.intern_integer(2);
        let a = pool.intern_map(vec![k, one]);
        let b = pool.intern_map(vec![k, one]);
        let c = pool.intern_map(vec![k, two]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn instances_key_on_class_and_fields() {
        let mut pool = ConstPool::new();
        let one = pool.intern_integer(1);
        let a = pool.intern_instance(7, NodeId(0), vec![one]);
        let b = pool.intern_instance(7, NodeId(0), vec![one]);
        let c = pool.intern_instance(8, NodeId(1), vec![one]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn nested_structural_equality() {
        let mut pool = ConstPool::new();
        let one = pool.intern_integer(1);
        let inner_a = pool.intern_list(vec![one]);
        let inner_b = pool.intern_list(vec![one]);
        assert_eq!(inner_a, inner_b);
        let outer_a = pool.intern_list(vec![inner_a]);
        let outer_b = pool.intern_list(vec![inner_b]);
        assert_eq!(outer_a, outer_b);
    }
}
