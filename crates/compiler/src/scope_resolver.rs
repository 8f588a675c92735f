//! Per-method scope resolution
//!
//! Walks a method body introducing locals, parameters, and nested
//! functions, and classifies every identifier use. A variable declared in
//! function F and used in a nested function G is captured: `final`
//! variables by value, everything else by reference. The capture is
//! recorded on the declaration entry and on every function frame between
//! the declaration and the use, so each closure knows exactly which
//! variables to copy into its context class.

use crate::ast::{Modifiers, Node, NodeId, VariableData};
use crate::builder::Builder;
use crate::error::Result;
use crate::map::IdMap;
use crate::scope::{DeclId, ScopeEntry, ScopeId, Scopes};

/// Tracks which outer locals one function (closure) captures.
struct FunctionMarker {
    /// Local count at function entry; locals below this index belong to
    /// enclosing functions.
    index: i32,
    seen: IdMap<()>,
    captured: Vec<NodeId>,
}

impl FunctionMarker {
    fn new(index: i32) -> FunctionMarker {
        FunctionMarker {
            index,
            seen: IdMap::new(),
            captured: Vec::new(),
        }
    }

    fn mark_captured(&mut self, name_id: i32, var: NodeId) {
        if !self.seen.contains(name_id) {
            self.seen.add(name_id, ());
            self.captured.push(var);
        }
    }
}

pub struct ScopeResolver<'a, 'z> {
    builder: &'a mut Builder<'z>,
    scopes: &'a mut Scopes,
    scope: ScopeId,
    this_name: i32,
    functions: Vec<FunctionMarker>,
}

impl<'a, 'z> ScopeResolver<'a, 'z> {
    pub fn new(
        builder: &'a mut Builder<'z>,
        scopes: &'a mut Scopes,
        scope: ScopeId,
        this_name: i32,
    ) -> ScopeResolver<'a, 'z> {
        ScopeResolver {
            builder,
            scopes,
            scope,
            this_name,
            functions: Vec::new(),
        }
    }

    pub fn resolve_method(&mut self, method: NodeId) -> Result<()> {
        let data = self.builder.method(method);
        let body = data.body.filter(|body| {
            let node = self.builder.node(*body);
            node.is_expression() || matches!(node, Node::Block { .. })
        });

        let has_this = !data.modifiers.is_static()
            && matches!(data.owner, Some(crate::ast::Owner::Class(_)));

        let saved = self.scope;
        self.scope = self.scopes.new_scope(None);
        self.do_function(&data.parameters, body, has_this)?;
        for initializer in &data.initializers {
            if let Node::Assign { value, .. } = self.builder.node(*initializer) {
                let value = *value;
                self.scope = self.scopes.new_scope(None);
                self.do_function(&data.parameters, Some(value), has_this)?;
            }
        }
        self.scope = saved;
        Ok(())
    }

    /// Resolve one function frame: bind `this`, bind parameters, walk the
    /// body. Returns the captured-variable list for the frame.
    fn do_function(
        &mut self,
        parameters: &[NodeId],
        body: Option<NodeId>,
        has_this: bool,
    ) -> Result<Vec<NodeId>> {
        let marker = FunctionMarker::new(self.scopes.total_locals(self.scope));
        self.functions.push(marker);

        let nested = self.scopes.new_scope(Some(self.scope));
        let saved = std::mem::replace(&mut self.scope, nested);

        if has_this {
            let name = self.builder.new_node(Node::Identifier {
                id: self.this_name,
                location: crate::source::Location::invalid(),
            });
            let var = self.builder.new_node(Node::VariableDeclaration(VariableData {
                name,
                value: None,
                modifiers: Modifiers::default(),
                owner: None,
                entry: None,
                index: -1,
                initializer_id: -1,
            }));
            let entry = self.scopes.new_decl(var);
            self.builder.variable_mut(var).entry = Some(entry);
            self.scopes
                .add_local_variable(self.scope, self.this_name, entry);
            // `this` never occupies a local slot.
            self.scopes.decl_mut(entry).index = -1;
        }
        for parameter in parameters {
            let var = self.builder.variable(*parameter);
            if var.modifiers.is_this() {
                continue;
            }
            let entry = self.scopes.new_decl(*parameter);
            self.builder.variable_mut(*parameter).entry = Some(entry);
            let name_id = self.builder.identifier_id(var.name);
            self.scopes.add_local_variable(self.scope, name_id, entry);
        }
        if let Some(body) = body {
            self.accept(body)?;
        }
        self.scope = saved;

        let marker = self.functions.pop().expect("function marker");
        Ok(marker.captured)
    }

    fn accept(&mut self, node: NodeId) -> Result<()> {
        match self.builder.node(node).clone() {
            Node::Method(_) => self.do_local_function(node),
            Node::Block { statements } => {
                let nested = self.scopes.new_scope(Some(self.scope));
                let saved = std::mem::replace(&mut self.scope, nested);
                for statement in statements {
                    self.accept(statement)?;
                }
                self.scope = saved;
                Ok(())
            }
            Node::ExpressionStatement { expression } => self.accept(expression),
            Node::Labelled { statement, .. } => self.accept(statement),
            Node::If {
                condition,
                if_true,
                if_false,
            } => {
                let nested = self.scopes.new_scope(Some(self.scope));
                let saved = std::mem::replace(&mut self.scope, nested);
                self.accept(condition)?;
                self.implicit_scope_statement(if_true)?;
                if let Some(if_false) = if_false {
                    self.implicit_scope_statement(if_false)?;
                }
                self.scope = saved;
                Ok(())
            }
            Node::While { condition, body } => {
                self.accept(condition)?;
                self.implicit_scope_statement(body)
            }
            Node::For {
                initializer,
                condition,
                increments,
                body,
            } => {
                let nested = self.scopes.new_scope(Some(self.scope));
                let saved = std::mem::replace(&mut self.scope, nested);
                self.accept(initializer)?;
                if let Some(condition) = condition {
                    self.accept(condition)?;
                }
                self.implicit_scope_statement(body)?;
                for increment in increments {
                    self.accept(increment)?;
                }
                self.scope = saved;
                Ok(())
            }
            Node::ForIn {
                variable,
                expression,
                body,
                ..
            } => {
                let nested = self.scopes.new_scope(Some(self.scope));
                let saved = std::mem::replace(&mut self.scope, nested);
                self.accept(expression)?;
                self.accept(variable)?;
                self.implicit_scope_statement(body)?;
                self.scope = saved;
                Ok(())
            }
            Node::DoWhile { condition, body } => {
                self.implicit_scope_statement(body)?;
                self.accept(condition)
            }
            Node::Switch { value, cases, .. } => {
                self.accept(value)?;
                for case in cases {
                    let Node::Case {
                        condition,
                        statements,
                    } = self.builder.node(case).clone()
                    else {
                        unreachable!("switch holds cases");
                    };
                    let nested = self.scopes.new_scope(Some(self.scope));
                    let saved = std::mem::replace(&mut self.scope, nested);
                    self.accept(condition)?;
                    for statement in statements {
                        self.accept(statement)?;
                    }
                    self.scope = saved;
                }
                Ok(())
            }
            Node::Try {
                block,
                catches,
                finally_block,
            } => {
                self.accept(block)?;
                for catch in catches {
                    self.accept(catch)?;
                }
                if let Some(finally_block) = finally_block {
                    self.accept(finally_block)?;
                }
                Ok(())
            }
            Node::Catch {
                exception,
                stack_trace,
                block,
                ..
            } => {
                let nested = self.scopes.new_scope(Some(self.scope));
                let saved = std::mem::replace(&mut self.scope, nested);
                if let Some(exception) = exception {
                    self.accept(exception)?;
                }
                if let Some(stack_trace) = stack_trace {
                    self.accept(stack_trace)?;
                }
                self.accept(block)?;
                self.scope = saved;
                Ok(())
            }
            Node::Return { value } => {
                if let Some(value) = value {
                    self.accept(value)?;
                }
                Ok(())
            }
            Node::VariableDeclarationStatement { declarations, .. } => {
                for declaration in declarations {
                    self.accept(declaration)?;
                }
                Ok(())
            }
            Node::VariableDeclaration(data) => {
                if data.modifiers.is_const() {
                    return Ok(());
                }
                if let Some(value) = data.value {
                    self.accept(value)?;
                }
                let entry = self.scopes.new_decl(node);
                self.builder.variable_mut(node).entry = Some(entry);
                let name_id = self.builder.identifier_id(data.name);
                self.scopes.add_local_variable(self.scope, name_id, entry);
                Ok(())
            }
            Node::FunctionExpression {
                parameters, body, ..
            } => {
                let captured = self.do_function(&parameters, Some(body), false)?;
                let Node::FunctionExpression {
                    captured: slot, ..
                } = self.builder.node_mut(node)
                else {
                    unreachable!()
                };
                *slot = captured;
                Ok(())
            }
            Node::Identifier { id, .. } => self.do_identifier(id),
            Node::This => self.do_this(),
            Node::Parenthesized { expression, .. } => self.accept(expression),
            Node::Assign { target, value, .. } => {
                self.accept(target)?;
                self.accept(value)
            }
            Node::Unary { expression, .. } => self.accept(expression),
            Node::Binary { left, right, .. } => {
                self.accept(left)?;
                self.accept(right)
            }
            Node::Conditional {
                condition,
                if_true,
                if_false,
            } => {
                self.accept(condition)?;
                self.accept(if_true)?;
                self.accept(if_false)
            }
            Node::Dot { object, .. } => self.accept(object),
            Node::Invoke {
                target, arguments, ..
            } => {
                self.accept(target)?;
                for argument in arguments {
                    self.accept(argument)?;
                }
                Ok(())
            }
            Node::IndexExpr { target, key } => {
                self.accept(target)?;
                self.accept(key)
            }
            Node::New { invoke, .. } => self.accept(invoke),
            Node::Cascade { expression } => self.accept(expression),
            Node::CascadeReceiver { object, .. } => self.accept(object),
            Node::Throw { expression } => self.accept(expression),
            Node::LiteralList { elements, .. } => {
                for element in elements {
                    self.accept(element)?;
                }
                Ok(())
            }
            Node::LiteralMap { keys, values, .. } => {
                for (key, value) in keys.iter().zip(values.iter()) {
                    self.accept(*key)?;
                    self.accept(*value)?;
                }
                Ok(())
            }
            Node::StringInterpolationExpr { expressions, .. } => {
                for expression in expressions {
                    self.accept(expression)?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Wrap single statements that may introduce declarations in a scope
    /// of their own.
    fn implicit_scope_statement(&mut self, statement: NodeId) -> Result<()> {
        if matches!(
            self.builder.node(statement),
            Node::VariableDeclarationStatement { .. } | Node::Method(_)
        ) {
            let nested = self.scopes.new_scope(Some(self.scope));
            let saved = std::mem::replace(&mut self.scope, nested);
            self.accept(statement)?;
            self.scope = saved;
            return Ok(());
        }
        self.accept(statement)
    }

    /// A named local function declares a final binding for its own name,
    /// then resolves like a function expression.
    fn do_local_function(&mut self, node: NodeId) -> Result<()> {
        let data = self.builder.method(node);
        let name = data.name;
        let var = self.builder.new_node(Node::VariableDeclaration(VariableData {
            name,
            value: None,
            modifiers: Modifiers::FINAL,
            owner: None,
            entry: None,
            index: -1,
            initializer_id: -1,
        }));
        let entry = self.scopes.new_decl(var);
        self.builder.variable_mut(var).entry = Some(entry);
        let name_id = self.builder.identifier_id(name);
        self.scopes.add_local_variable(self.scope, name_id, entry);
        let captured = self.do_function(&data.parameters, data.body, false)?;
        self.builder.method_mut(node).captured = captured;
        Ok(())
    }

    fn do_identifier(&mut self, id: i32) -> Result<()> {
        let Some(entry) = self.scopes.lookup(self.scope, id) else {
            return self.do_this();
        };
        let ScopeEntry::Decl(decl) = entry else {
            // Parameters of enclosing frames register as declarations
            // here; members and libraries resolve later.
            return Ok(());
        };
        let var = self.scopes.decl(decl).node;
        let data = self.builder.variable(var);
        let mut by_value = false;
        if data.entry.is_none() {
            // Resolved to a field or global rather than a local.
            if data.modifiers.is_static() {
                return Ok(());
            }
            if !matches!(data.owner, Some(crate::ast::Owner::Class(_))) {
                return Ok(());
            }
            return self.do_this();
        } else if data.modifiers.is_final() {
            by_value = true;
        }
        self.mark_captured(decl, by_value);
        Ok(())
    }

    fn do_this(&mut self) -> Result<()> {
        let Some(ScopeEntry::Decl(decl)) = self.scopes.lookup(self.scope, self.this_name) else {
            return Ok(());
        };
        self.mark_captured(decl, true);
        Ok(())
    }

    /// Mark the declaration captured on every function frame between its
    /// definition and this use.
    fn mark_captured(&mut self, decl: DeclId, by_value: bool) {
        let var = self.scopes.decl(decl).node;
        let name_id = {
            let data = self.builder.variable(var);
            self.builder.identifier_id(data.name)
        };
        let index = self.scopes.decl(decl).index;
        for at in (0..self.functions.len()).rev() {
            if index >= self.functions[at].index {
                break;
            }
            self.scopes.mark_captured(decl, by_value);
            self.functions[at].mark_captured(name_id, var);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::Scanner;
    use crate::parser::Parser;
    use crate::scope::CaptureKind;
    use crate::source::Location;
    use crate::zone::Zone;

    fn resolve_first_method(input: &str, check: impl FnOnce(&Builder, &Scopes, NodeId)) {
        let zone = Zone::new();
        let mut builder = Builder::new(&zone);
        let text = zone.alloc_str(input);
        let tokens = Scanner::scan(&mut builder, text, Location::invalid()).expect("scan");
        Parser::new(&mut builder, tokens)
            .parse_compilation_unit()
            .expect("parse");
        let unit = builder.pop();
        let Node::CompilationUnit { declarations } = builder.node(unit).clone() else {
            panic!("expected unit");
        };
        let method = declarations[0];
        let mut scopes = Scopes::new();
        let scope = scopes.new_scope(None);
        let this_name = builder.canonical_id("this$");
        ScopeResolver::new(&mut builder, &mut scopes, scope, this_name)
            .resolve_method(method)
            .expect("resolve");
        check(&builder, &scopes, method);
    }

    fn first_local(builder: &Builder, body: NodeId) -> NodeId {
        let Node::Block { statements } = builder.node(body) else {
            panic!("expected block");
        };
        let Node::VariableDeclarationStatement { declarations, .. } =
            builder.node(statements[0])
        else {
            panic!("expected declaration");
        };
        declarations[0]
    }

    #[test]
    fn plain_locals_are_not_captured() {
        resolve_first_method("foo() { var x; x; }", |builder, scopes, method| {
            let body = builder.method(method).body.unwrap();
            let var = first_local(builder, body);
            let entry = builder.variable(var).entry.unwrap();
            assert_eq!(scopes.decl(entry).capture, CaptureKind::NotCaptured);
        });
    }

    #[test]
    fn closure_captures_mutable_local_by_reference() {
        resolve_first_method("foo() { var x; (){ x; }; }", |builder, scopes, method| {
            let body = builder.method(method).body.unwrap();
            let var = first_local(builder, body);
            let entry = builder.variable(var).entry.unwrap();
            assert_eq!(scopes.decl(entry).capture, CaptureKind::ByReference);
        });
    }

    #[test]
    fn closure_captures_final_local_by_value() {
        resolve_first_method(
            "foo() { final x = 2; (){ x; }; }",
            |builder, scopes, method| {
                let body = builder.method(method).body.unwrap();
                let var = first_local(builder, body);
                let entry = builder.variable(var).entry.unwrap();
                assert_eq!(scopes.decl(entry).capture, CaptureKind::ByValue);
            },
        );
    }

    #[test]
    fn capture_propagates_through_intermediate_functions() {
        resolve_first_method(
            "foo() { var x; (){ (){ x; }; }; }",
            |builder, scopes, method| {
                let body = builder.method(method).body.unwrap();
                let var = first_local(builder, body);
                let entry = builder.variable(var).entry.unwrap();
                assert_eq!(scopes.decl(entry).capture, CaptureKind::ByReference);
                // The outer closure lists x as captured too.
                let Node::Block { statements } = builder.node(body) else {
                    panic!("expected block");
                };
                let Node::ExpressionStatement { expression } = builder.node(statements[1])
                else {
                    panic!("expected expression statement");
                };
                let Node::FunctionExpression { captured, .. } = builder.node(*expression)
                else {
                    panic!("expected function expression");
                };
                assert_eq!(captured.len(), 1);
            },
        );
    }

    #[test]
    fn parameters_capture_like_locals() {
        resolve_first_method("foo(x) { (){ x; }; }", |builder, scopes, method| {
            let parameter = builder.method(method).parameters[0];
            let entry = builder.variable(parameter).entry.unwrap();
            assert_eq!(scopes.decl(entry).capture, CaptureKind::ByReference);
        });
    }
}
