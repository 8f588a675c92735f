//! The AST builder
//!
//! The parser never constructs nodes directly. It drives this builder,
//! whose `do_*` operations pop a fixed number of nodes off an internal
//! stack and push exactly one combined node. That keeps the grammar
//! mechanically checkable (push/pop counts) and concentrates node
//! allocation in one arena.
//!
//! The builder also owns the canonicalization state for one compile: the
//! identifier trie (pre-seeded with the predefined names and the keyword
//! table), the number trie, and the literal registries the scanner
//! indexes into.

use crate::ast::{ClassData, MethodData, Modifiers, Node, NodeId, VariableData};
use crate::error::{CompileError, ErrorKind, Result};
use crate::natives::{self, Native};
use crate::parser::Parser;
use crate::scanner::Scanner;
use crate::source::{Location, Source};
use crate::tokens::{KEYWORDS, TokenKind};
use crate::trie::{Trie, TrieId};
use crate::zone::Zone;
use mica_core::names;

/// Identifier-trie payload: terminal id plus the keyword marker.
pub struct Terminal {
    pub terminal: i32,
    pub keyword: Option<TokenKind>,
}

impl Default for Terminal {
    fn default() -> Terminal {
        Terminal {
            terminal: -1,
            keyword: None,
        }
    }
}

pub struct Builder<'z> {
    zone: &'z Zone,
    source: Source<'z>,
    nodes: Vec<Node>,
    stack: Vec<NodeId>,
    identifier_trie: Trie<Terminal>,
    number_trie: Trie<Terminal>,
    identifiers: Vec<&'z str>,
    /// Integer and double literal nodes, indexed by token payload.
    registry: Vec<NodeId>,
    /// String literal nodes, indexed by token payload.
    string_registry: Vec<NodeId>,
    /// Identifier ids for the pseudo-keywords `abstract`‥`typedef`.
    builtins: Vec<i32>,
}

impl<'z> Builder<'z> {
    pub fn new(zone: &'z Zone) -> Builder<'z> {
        let mut builder = Builder {
            zone,
            source: Source::new(zone),
            nodes: Vec::new(),
            stack: Vec::new(),
            identifier_trie: Trie::new(),
            number_trie: Trie::new(),
            identifiers: Vec::new(),
            registry: Vec::new(),
            string_registry: Vec::new(),
            builtins: Vec::new(),
        };
        for (name, syntax) in names::PREDEFINED {
            let id = builder.compute_canonical_id(syntax);
            debug_assert_eq!(id, Some(name.id() as i32));
        }
        let first_builtin = TokenKind::Abstract as usize;
        let last_builtin = TokenKind::Typedef as usize;
        builder.builtins = vec![-1; last_builtin - first_builtin + 1];
        for keyword in KEYWORDS {
            let node = builder
                .identifier_trie
                .walk(keyword.syntax().bytes().map(i32::from));
            let payload = builder.identifier_trie.payload_mut(node);
            payload.keyword = Some(*keyword);
            if keyword.is_identifier() {
                let id = {
                    let syntax = keyword.syntax();
                    let interned = builder.zone.alloc_str(syntax);
                    let id = builder.identifiers.len() as i32;
                    builder.identifiers.push(interned);
                    id
                };
                builder.identifier_trie.payload_mut(node).terminal = id;
                builder.builtins[*keyword as usize - first_builtin] = id;
            }
        }
        builder
    }

    pub fn zone(&self) -> &'z Zone {
        self.zone
    }

    pub fn source(&self) -> &Source<'z> {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut Source<'z> {
        &mut self.source
    }

    // ------------------------------------------------------------------
    // Node arena.

    pub fn new_node(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.index()]
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn method(&self, id: NodeId) -> MethodData {
        match self.node(id) {
            Node::Method(data) => data.clone(),
            other => unreachable!("expected method, found {other:?}"),
        }
    }

    pub fn method_mut(&mut self, id: NodeId) -> &mut MethodData {
        match self.node_mut(id) {
            Node::Method(data) => data,
            other => unreachable!("expected method, found {other:?}"),
        }
    }

    pub fn class(&self, id: NodeId) -> ClassData {
        match self.node(id) {
            Node::Class(data) => data.clone(),
            other => unreachable!("expected class, found {other:?}"),
        }
    }

    pub fn class_mut(&mut self, id: NodeId) -> &mut ClassData {
        match self.node_mut(id) {
            Node::Class(data) => data,
            other => unreachable!("expected class, found {other:?}"),
        }
    }

    pub fn variable(&self, id: NodeId) -> VariableData {
        match self.node(id) {
            Node::VariableDeclaration(data) => data.clone(),
            other => unreachable!("expected variable, found {other:?}"),
        }
    }

    pub fn variable_mut(&mut self, id: NodeId) -> &mut VariableData {
        match self.node_mut(id) {
            Node::VariableDeclaration(data) => data,
            other => unreachable!("expected variable, found {other:?}"),
        }
    }

    /// Canonical id of an identifier node, following qualified names to
    /// their last segment.
    pub fn identifier_id(&self, id: NodeId) -> i32 {
        match self.node(id) {
            Node::Identifier { id, .. } => *id,
            Node::Dot { name, .. } => self.identifier_id(*name),
            other => unreachable!("expected identifier, found {other:?}"),
        }
    }

    pub fn identifier_location(&self, id: NodeId) -> Location {
        match self.node(id) {
            Node::Identifier { location, .. } => *location,
            Node::Dot { name, .. } => self.identifier_location(*name),
            _ => Location::invalid(),
        }
    }

    // ------------------------------------------------------------------
    // Canonicalization and registries.

    pub fn identifier_trie_root(&self) -> TrieId {
        self.identifier_trie.root()
    }

    pub fn identifier_trie(&mut self) -> &mut Trie<Terminal> {
        &mut self.identifier_trie
    }

    pub fn number_trie(&mut self) -> &mut Trie<Terminal> {
        &mut self.number_trie
    }

    pub fn lookup_identifier(&self, id: i32) -> &'z str {
        self.identifiers[id as usize]
    }

    pub fn identifier_count(&self) -> usize {
        self.identifiers.len()
    }

    /// Canonical id for `name`; `None` when `name` is a reserved keyword.
    pub fn compute_canonical_id(&mut self, name: &str) -> Option<i32> {
        let node = self.identifier_trie.walk(name.bytes().map(i32::from));
        let payload = self.identifier_trie.payload(node);
        if payload.keyword.is_some_and(|keyword| !keyword.is_identifier()) {
            return None;
        }
        if payload.terminal >= 0 {
            return Some(payload.terminal);
        }
        let id = self.register_identifier(name);
        self.identifier_trie.payload_mut(node).terminal = id;
        Some(id)
    }

    /// Canonicalize and wrap in an identifier node. Callers never pass
    /// reserved keywords.
    pub fn canonicalize(&mut self, name: &str) -> NodeId {
        let id = self.compute_canonical_id(name).expect("reserved keyword");
        self.new_node(Node::Identifier {
            id,
            location: Location::invalid(),
        })
    }

    pub fn canonical_id(&mut self, name: &str) -> i32 {
        self.compute_canonical_id(name).expect("reserved keyword")
    }

    pub fn operator_name(&mut self, token: TokenKind) -> NodeId {
        self.canonicalize(token.syntax())
    }

    pub fn builtin_name_id(&self, token: TokenKind) -> i32 {
        debug_assert!(token.is_identifier() && token != TokenKind::Identifier);
        self.builtins[token as usize - TokenKind::Abstract as usize]
    }

    pub fn register_identifier(&mut self, value: &str) -> i32 {
        let id = self.identifiers.len() as i32;
        self.identifiers.push(self.zone.alloc_str(value));
        id
    }

    pub fn register_integer(&mut self, value: i64) -> i32 {
        let node = self.new_node(Node::LiteralInteger(value));
        let id = self.registry.len() as i32;
        self.registry.push(node);
        id
    }

    pub fn register_double(&mut self, value: f64) -> i32 {
        let node = self.new_node(Node::LiteralDouble(value));
        let id = self.registry.len() as i32;
        self.registry.push(node);
        id
    }

    pub fn register_string(&mut self, value: &str) -> i32 {
        let node = self.new_node(Node::LiteralString(value.to_string()));
        let id = self.string_registry.len() as i32;
        self.string_registry.push(node);
        id
    }

    pub fn lookup_registry(&self, id: i32) -> NodeId {
        self.registry[id as usize]
    }

    pub fn lookup_string(&self, id: i32) -> NodeId {
        self.string_registry[id as usize]
    }

    pub fn lookup_native(&mut self, name: i32, holder: i32) -> Option<Native> {
        for (native, holder_name, method_name) in natives::TABLE {
            let holder_id = self.canonical_id(holder_name);
            let name_id = self.canonical_id(method_name);
            if holder_id == holder && name_id == name {
                return Some(*native);
            }
        }
        None
    }

    // ------------------------------------------------------------------
    // Scanning and parsing entry point.

    /// Scan and parse one compilation unit starting at `location`.
    pub fn build_unit(&mut self, location: Location) -> Result<NodeId> {
        let text = self.source.get_source(location);
        let tokens = Scanner::scan(self, text, location)?;
        Parser::new(self, tokens).parse_compilation_unit()?;
        let unit = self.pop();
        debug_assert!(self.stack.is_empty());
        debug_assert!(matches!(self.node(unit), Node::CompilationUnit { .. }));
        Ok(unit)
    }

    pub fn error(&self, kind: ErrorKind, location: Location, message: impl Into<String>) -> CompileError {
        CompileError::new(kind, location, message)
    }

    /// Render `error` the way the CLI prints it: path, line/column,
    /// message, then the offending line with a caret.
    pub fn render_diagnostic(&self, error: &CompileError) -> String {
        let location = error.location;
        let path = self.source.get_file_path(location);
        let mut text = match self.source.get_line_number(location) {
            Some(line) => format!("{path}:{line}: {error}"),
            None => format!("{path}: {error}"),
        };
        if let Some((line, column)) = self.source.get_line(location) {
            text.push('\n');
            text.push_str(line);
            text.push('\n');
            text.push_str(&" ".repeat(column));
            text.push('^');
        }
        text
    }

    // ------------------------------------------------------------------
    // Stack discipline.

    pub fn push(&mut self, node: NodeId) {
        self.stack.push(node);
    }

    pub fn pop(&mut self) -> NodeId {
        self.stack.pop().expect("builder stack underflow")
    }

    pub fn stack_depth(&self) -> usize {
        self.stack.len()
    }

    fn pop_list(&mut self, n: usize) -> Vec<NodeId> {
        let at = self.stack.len() - n;
        self.stack.split_off(at)
    }

    fn push_new(&mut self, node: Node) {
        let id = self.new_node(node);
        self.push(id);
    }

    // ------------------------------------------------------------------
    // Declarations.

    pub fn do_compilation_unit(&mut self, count: usize) {
        let declarations = self.pop_list(count);
        self.push_new(Node::CompilationUnit { declarations });
    }

    pub fn do_class(
        &mut self,
        is_abstract: bool,
        has_extends: bool,
        mixins_count: usize,
        implements_count: usize,
        count: usize,
    ) {
        let declarations = self.pop_list(count);
        let implements = self.pop_list(implements_count);
        let mixins = self.pop_list(mixins_count);
        let superclass = if has_extends { Some(self.pop()) } else { None };
        let name = self.pop();
        self.push_new(Node::Class(ClassData {
            is_abstract,
            name,
            superclass,
            mixins,
            implements,
            declarations,
            id: -1,
            scope: None,
            library: None,
        }));
    }

    pub fn do_combinator(&mut self, _token: TokenKind, count: usize) {
        // Combinators are accepted and dropped.
        self.pop_list(count);
    }

    pub fn do_import(&mut self, has_prefix: bool) {
        let prefix = if has_prefix { Some(self.pop()) } else { None };
        let uri = self.pop();
        self.push_new(Node::Import { uri, prefix });
    }

    pub fn do_export(&mut self) {
        let uri = self.pop();
        self.push_new(Node::Export { uri });
    }

    pub fn do_part(&mut self) {
        let uri = self.pop();
        self.push_new(Node::Part { uri });
    }

    pub fn do_part_of(&mut self) {
        let name = self.pop();
        self.push_new(Node::PartOf { name });
    }

    pub fn do_typedef(&mut self, parameter_count: usize) {
        let parameters = self.pop_list(parameter_count);
        let name = self.pop();
        self.push_new(Node::Typedef { name, parameters });
    }

    pub fn do_method(&mut self, modifiers: Modifiers, parameter_count: usize, initializer_count: usize) {
        let body = self.pop();
        let initializers = self.pop_list(initializer_count);
        let parameters = self.pop_list(parameter_count);
        let name = self.pop();
        self.push_new(Node::Method(MethodData {
            modifiers,
            name,
            parameters,
            initializers,
            body: Some(body),
            id: -1,
            owner: None,
            captured: Vec::new(),
        }));
    }

    pub fn do_operator(&mut self, token: TokenKind, modifiers: Modifiers, parameter_count: usize) {
        let body = self.pop();
        let parameters = self.pop_list(parameter_count);
        let name = if token == TokenKind::Sub && parameter_count == 0 {
            self.canonicalize("unary-")
        } else {
            self.operator_name(token)
        };
        self.push_new(Node::Method(MethodData {
            modifiers,
            name,
            parameters,
            initializers: Vec::new(),
            body: Some(body),
            id: -1,
            owner: None,
            captured: Vec::new(),
        }));
    }

    // ------------------------------------------------------------------
    // Statements.

    pub fn do_block(&mut self, count: usize) {
        let statements = self.pop_list(count);
        self.push_new(Node::Block { statements });
    }

    pub fn do_variable_declaration_statement(&mut self, modifiers: Modifiers, count: usize) {
        let declarations = self.pop_list(count);
        self.push_new(Node::VariableDeclarationStatement {
            modifiers,
            declarations,
        });
    }

    pub fn do_variable_declaration(&mut self, modifiers: Modifiers, has_initializer: bool) {
        let value = if has_initializer { Some(self.pop()) } else { None };
        let name = self.pop();
        self.push_new(Node::VariableDeclaration(VariableData {
            name,
            value,
            modifiers,
            owner: None,
            entry: None,
            index: -1,
            initializer_id: -1,
        }));
    }

    pub fn do_if(&mut self, has_else: bool) {
        let if_false = if has_else { Some(self.pop()) } else { None };
        let if_true = self.pop();
        let condition = self.pop();
        self.push_new(Node::If {
            condition,
            if_true,
            if_false,
        });
    }

    pub fn do_for(&mut self, has_condition: bool, count: usize) {
        let body = self.pop();
        let increments = self.pop_list(count);
        let condition = if has_condition { Some(self.pop()) } else { None };
        let initializer = self.pop();
        self.push_new(Node::For {
            initializer,
            condition,
            increments,
            body,
        });
    }

    pub fn do_for_in(&mut self, token: TokenKind) {
        let body = self.pop();
        let expression = self.pop();
        let variable = self.pop();
        self.push_new(Node::ForIn {
            token,
            variable,
            expression,
            body,
        });
    }

    pub fn do_while(&mut self) {
        let body = self.pop();
        let condition = self.pop();
        self.push_new(Node::While { condition, body });
    }

    pub fn do_do_while(&mut self) {
        let condition = self.pop();
        let body = self.pop();
        self.push_new(Node::DoWhile { condition, body });
    }

    pub fn do_break(&mut self, has_identifier: bool) {
        let label = if has_identifier { Some(self.pop()) } else { None };
        self.push_new(Node::Break { label });
    }

    pub fn do_continue(&mut self, has_identifier: bool) {
        let label = if has_identifier { Some(self.pop()) } else { None };
        self.push_new(Node::Continue { label });
    }

    pub fn do_return(&mut self, has_expression: bool) {
        let value = if has_expression { Some(self.pop()) } else { None };
        self.push_new(Node::Return { value });
    }

    pub fn do_assert(&mut self) {
        let condition = self.pop();
        self.push_new(Node::Assert { condition });
    }

    pub fn do_case(&mut self, count: usize) {
        let statements = self.pop_list(count);
        let condition = self.pop();
        self.push_new(Node::Case {
            condition,
            statements,
        });
    }

    pub fn do_switch(&mut self, case_count: usize, default_statements_count: usize) {
        let default_statements = self.pop_list(default_statements_count);
        let cases = self.pop_list(case_count);
        let value = self.pop();
        self.push_new(Node::Switch {
            value,
            cases,
            default_statements,
        });
    }

    pub fn do_catch(&mut self, has_type: bool, identifiers_count: usize) {
        let block = self.pop();
        let stack_trace = if identifiers_count == 2 { Some(self.pop()) } else { None };
        let exception = if identifiers_count >= 1 { Some(self.pop()) } else { None };
        let type_name = if has_type { Some(self.pop()) } else { None };
        self.push_new(Node::Catch {
            type_name,
            exception,
            stack_trace,
            block,
        });
    }

    pub fn do_try(&mut self, catch_count: usize, has_finally: bool) {
        let finally_block = if has_finally { Some(self.pop()) } else { None };
        let catches = self.pop_list(catch_count);
        let block = self.pop();
        self.push_new(Node::Try {
            block,
            catches,
            finally_block,
        });
    }

    pub fn do_labelled_statement(&mut self) {
        let statement = self.pop();
        let name = self.pop();
        self.push_new(Node::Labelled { name, statement });
    }

    pub fn do_rethrow(&mut self) {
        self.push_new(Node::Rethrow);
    }

    pub fn do_throw(&mut self) {
        let expression = self.pop();
        self.push_new(Node::Throw { expression });
    }

    pub fn do_empty_statement(&mut self) {
        self.push_new(Node::EmptyStatement);
    }

    pub fn do_expression_statement(&mut self) {
        let expression = self.pop();
        self.push_new(Node::ExpressionStatement { expression });
    }

    // ------------------------------------------------------------------
    // Expressions.

    pub fn do_parenthesized(&mut self, location: Location) {
        let expression = self.pop();
        self.push_new(Node::Parenthesized {
            location,
            expression,
        });
    }

    pub fn do_assign(&mut self, token: TokenKind) {
        let value = self.pop();
        let target = self.pop();
        self.push_new(Node::Assign {
            token,
            target,
            value,
        });
    }

    pub fn do_binary(&mut self, token: TokenKind) {
        let right = self.pop();
        let left = self.pop();
        self.push_new(Node::Binary { token, left, right });
    }

    pub fn do_unary(&mut self, token: TokenKind, prefix: bool) {
        let expression = self.pop();
        self.push_new(Node::Unary {
            token,
            prefix,
            expression,
        });
    }

    pub fn do_dot(&mut self) {
        let name = self.pop();
        let object = self.pop();
        self.push_new(Node::Dot { object, name });
    }

    pub fn do_cascade_receiver(&mut self, token: TokenKind) {
        let object = self.pop();
        self.push_new(Node::CascadeReceiver { token, object });
    }

    pub fn do_cascade(&mut self) {
        let expression = self.pop();
        self.push_new(Node::Cascade { expression });
    }

    pub fn do_invoke(&mut self, count: usize, named_count: usize) {
        let mut arguments = vec![NodeId(0); count];
        let mut named_arguments = vec![NodeId(0); named_count];
        let unnamed_count = count - named_count;
        for i in (0..count).rev() {
            arguments[i] = self.pop();
            if i >= unnamed_count {
                named_arguments[i - unnamed_count] = self.pop();
            }
        }
        let target = self.pop();
        self.push_new(Node::Invoke {
            target,
            arguments,
            named_arguments,
        });
    }

    pub fn do_index(&mut self) {
        let key = self.pop();
        let target = self.pop();
        self.push_new(Node::IndexExpr { target, key });
    }

    pub fn do_conditional(&mut self) {
        let if_false = self.pop();
        let if_true = self.pop();
        let condition = self.pop();
        self.push_new(Node::Conditional {
            condition,
            if_true,
            if_false,
        });
    }

    pub fn do_is(&mut self, is_not: bool) {
        let type_name = self.pop();
        let object = self.pop();
        self.push_new(Node::Is {
            is_not,
            object,
            type_name,
        });
    }

    pub fn do_as(&mut self) {
        let type_name = self.pop();
        let object = self.pop();
        self.push_new(Node::As { object, type_name });
    }

    pub fn do_new(&mut self, is_const: bool) {
        let invoke = self.pop();
        self.push_new(Node::New { is_const, invoke });
    }

    pub fn do_function_expression(&mut self, parameter_count: usize) {
        let body = self.pop();
        let parameters = self.pop_list(parameter_count);
        self.push_new(Node::FunctionExpression {
            parameters,
            body,
            captured: Vec::new(),
        });
    }

    pub fn do_reference(&mut self, id: i32) {
        let node = self.lookup_registry(id);
        self.push(node);
    }

    pub fn do_identifier(&mut self, id: i32, location: Location) {
        self.push_new(Node::Identifier { id, location });
    }

    pub fn do_string_reference(&mut self, id: i32) {
        let node = self.lookup_string(id);
        self.push(node);
    }

    pub fn do_builtin(&mut self, token: TokenKind) {
        let id = self.builtin_name_id(token);
        self.do_identifier(id, Location::invalid());
    }

    pub fn do_this(&mut self) {
        self.push_new(Node::This);
    }

    pub fn do_super(&mut self) {
        self.push_new(Node::Super);
    }

    pub fn do_null(&mut self) {
        self.push_new(Node::NullLiteral);
    }

    pub fn do_boolean(&mut self, value: bool) {
        self.push_new(Node::LiteralBoolean(value));
    }

    pub fn do_list(&mut self, is_const: bool, count: usize) {
        let elements = self.pop_list(count);
        self.push_new(Node::LiteralList { is_const, elements });
    }

    pub fn do_map(&mut self, is_const: bool, count: usize) {
        let mut keys = vec![NodeId(0); count];
        let mut values = vec![NodeId(0); count];
        for i in (0..count).rev() {
            values[i] = self.pop();
            keys[i] = self.pop();
        }
        self.push_new(Node::LiteralMap {
            is_const,
            keys,
            values,
        });
    }

    /// Concatenate `count` adjacent string parts into one literal.
    pub fn do_string(&mut self, count: usize) {
        if count == 1 {
            return;
        }
        let parts = self.pop_list(count);
        let mut combined = String::new();
        for part in parts {
            match self.node(part) {
                Node::LiteralString(value) => combined.push_str(value),
                other => unreachable!("expected string part, found {other:?}"),
            }
        }
        self.push_new(Node::LiteralString(combined));
    }

    pub fn do_string_interpolation(&mut self, count: usize) {
        let mut expressions = vec![NodeId(0); count];
        let mut strings = vec![NodeId(0); count + 1];
        strings[count] = self.pop();
        for i in (0..count).rev() {
            expressions[i] = self.pop();
            strings[i] = self.pop();
        }
        self.push_new(Node::StringInterpolationExpr {
            strings,
            expressions,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predefined_names_have_fixed_ids() {
        let zone = Zone::new();
        let mut builder = Builder::new(&zone);
        assert_eq!(builder.canonical_id("=="), names::Name::Equals.id() as i32);
        assert_eq!(builder.canonical_id("call"), names::Name::Call.id() as i32);
        assert_eq!(builder.canonical_id("main"), names::Name::Main.id() as i32);
    }

    #[test]
    fn canonical_ids_are_stable() {
        let zone = Zone::new();
        let mut builder = Builder::new(&zone);
        let a = builder.canonical_id("fisk");
        let b = builder.canonical_id("hest");
        assert_ne!(a, b);
        assert_eq!(builder.canonical_id("fisk"), a);
        assert_eq!(builder.lookup_identifier(a), "fisk");
    }

    #[test]
    fn keywords_do_not_canonicalize() {
        let zone = Zone::new();
        let mut builder = Builder::new(&zone);
        assert_eq!(builder.compute_canonical_id("while"), None);
        assert_eq!(builder.compute_canonical_id("class"), None);
        // Pseudo-keywords do.
        assert!(builder.compute_canonical_id("static").is_some());
    }

    #[test]
    fn do_block_pops_count_and_pushes_one() {
        let zone = Zone::new();
        let mut builder = Builder::new(&zone);
        builder.do_empty_statement();
        builder.do_empty_statement();
        builder.do_empty_statement();
        assert_eq!(builder.stack_depth(), 3);
        builder.do_block(3);
        assert_eq!(builder.stack_depth(), 1);
        let block = builder.pop();
        match builder.node(block) {
            Node::Block { statements } => assert_eq!(statements.len(), 3),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn do_invoke_interleaves_named_arguments() {
        let zone = Zone::new();
        let mut builder = Builder::new(&zone);
        // target, positional, (name, value)
        let f = builder.canonical_id("f");
        let x = builder.canonical_id("x");
        builder.do_identifier(f, Location::invalid());
        builder.do_boolean(true);
        builder.do_identifier(x, Location::invalid());
        builder.do_boolean(false);
        builder.do_invoke(2, 1);
        let invoke = builder.pop();
        match builder.node(invoke).clone() {
            Node::Invoke {
                arguments,
                named_arguments,
                ..
            } => {
                assert_eq!(arguments.len(), 2);
                assert_eq!(named_arguments.len(), 1);
                assert!(matches!(
                    builder.node(named_arguments[0]),
                    Node::Identifier { .. }
                ));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn do_string_concatenates_parts() {
        let zone = Zone::new();
        let mut builder = Builder::new(&zone);
        let a = builder.register_string("foo");
        let b = builder.register_string("bar");
        builder.do_string_reference(a);
        builder.do_string_reference(b);
        builder.do_string(2);
        let combined = builder.pop();
        assert_eq!(
            builder.node(combined),
            &Node::LiteralString("foobar".to_string())
        );
    }
}
