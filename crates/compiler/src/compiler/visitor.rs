//! The code-generation visitor
//!
//! Walks statements and expressions of one function, keeping a virtual
//! stack in lockstep with the VM's. Control flow lowers to branches,
//! non-local exits (`return`, `break`, `continue`) unwind through the
//! restore-label stack so pending finally blocks run and the stack pops
//! to the right depth, and closures become synthesized classes carrying
//! one field per captured variable.

use crate::ast::{Modifiers, Node, NodeId, Owner, VariableData, integer_needs_const_pool};
use crate::emitter::{Emitter, Label};
use crate::error::{ErrorKind, Result};
use crate::scope::{CaptureKind, ScopeEntry, ScopeId};
use crate::source::Location;
use crate::tokens::TokenKind;
use mica_core::names::Name;

use super::Compiler;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LabelId(usize);

/// Unwind record for one enclosing statement.
struct RestoreLabel {
    break_label: Option<LabelId>,
    continue_label: Option<LabelId>,
    finally_label: Option<LabelId>,
    finally_return_label: Option<LabelId>,
    stack_size: i32,
    name_id: i32,
    /// Only reachable through an explicit label, never a bare break.
    label_only: bool,
}

pub struct ValueVisitor<'c, 'z> {
    pub(crate) compiler: &'c mut Compiler<'z>,
    pub(crate) emitter: &'c mut Emitter,
    scope: ScopeId,
    labels: Vec<Label>,
    restore_labels: Vec<RestoreLabel>,
    exception_index: i32,
    name_id: i32,
}

impl<'c, 'z> ValueVisitor<'c, 'z> {
    pub fn new(
        compiler: &'c mut Compiler<'z>,
        emitter: &'c mut Emitter,
        scope: ScopeId,
    ) -> ValueVisitor<'c, 'z> {
        ValueVisitor {
            compiler,
            emitter,
            scope,
            labels: Vec::new(),
            restore_labels: Vec::new(),
            exception_index: -1,
            name_id: -1,
        }
    }

    pub fn scope(&self) -> ScopeId {
        self.scope
    }

    pub fn set_scope(&mut self, scope: ScopeId) -> ScopeId {
        std::mem::replace(&mut self.scope, scope)
    }

    // ------------------------------------------------------------------
    // Label plumbing.

    fn new_label(&mut self) -> LabelId {
        self.labels.push(Label::new());
        LabelId(self.labels.len() - 1)
    }

    fn bind(&mut self, label: LabelId) {
        self.emitter.bind(&mut self.labels[label.0]);
    }

    fn bind_raw(&mut self, label: LabelId) {
        self.emitter.bind_raw(&mut self.labels[label.0]);
    }

    fn branch(&mut self, label: LabelId) {
        self.emitter.branch(&mut self.labels[label.0]);
    }

    fn branch_if_true(&mut self, label: LabelId) {
        self.emitter.branch_if_true(&mut self.labels[label.0]);
    }

    fn branch_if_false(&mut self, label: LabelId) {
        self.emitter.branch_if_false(&mut self.labels[label.0]);
    }

    fn subroutine_call(&mut self, label: LabelId, return_label: LabelId) {
        debug_assert_ne!(label.0, return_label.0);
        let (low, high) = if label.0 < return_label.0 {
            (label.0, return_label.0)
        } else {
            (return_label.0, label.0)
        };
        let (head, tail) = self.labels.split_at_mut(high);
        let (first, second) = if label.0 < return_label.0 {
            (&mut head[low], &mut tail[0])
        } else {
            (&mut tail[0], &mut head[low])
        };
        self.emitter.subroutine_call(first, second);
    }

    fn subroutine_return(&mut self, return_label: LabelId) {
        self.emitter
            .subroutine_return(&mut self.labels[return_label.0]);
    }

    fn push_restore_label(
        &mut self,
        break_label: Option<LabelId>,
        continue_label: Option<LabelId>,
        stack_size: i32,
        label_only: bool,
    ) {
        let name_id = self.name_id;
        self.restore_labels.push(RestoreLabel {
            break_label,
            continue_label,
            finally_label: None,
            finally_return_label: None,
            stack_size,
            name_id,
            label_only,
        });
        self.name_id = -1;
    }

    fn push_finally_restore_label(
        &mut self,
        finally_label: LabelId,
        finally_return_label: LabelId,
        stack_size: i32,
    ) {
        self.restore_labels.push(RestoreLabel {
            break_label: None,
            continue_label: None,
            finally_label: Some(finally_label),
            finally_return_label: Some(finally_return_label),
            stack_size,
            name_id: -1,
            label_only: false,
        });
    }

    fn pop_restore_label(&mut self) {
        self.restore_labels.pop();
    }

    // ------------------------------------------------------------------
    // Dispatch.

    pub fn accept(&mut self, node: NodeId) -> Result<()> {
        match self.compiler.builder.node(node).clone() {
            Node::Block { statements } => self.do_block(&statements),
            Node::VariableDeclarationStatement { declarations, .. } => {
                for declaration in declarations {
                    self.accept(declaration)?;
                }
                Ok(())
            }
            Node::VariableDeclaration(_) => self.do_variable_declaration(node),
            Node::EmptyStatement => Ok(()),
            Node::ExpressionStatement { expression } => {
                self.accept(expression)?;
                self.emitter.pop();
                Ok(())
            }
            Node::If {
                condition,
                if_true,
                if_false,
            } => self.do_if(condition, if_true, if_false),
            Node::While { condition, body } => self.do_while(condition, body),
            Node::For {
                initializer,
                condition,
                increments,
                body,
            } => self.do_for(initializer, condition, &increments, body),
            Node::ForIn {
                variable,
                expression,
                body,
                ..
            } => self.do_for_in(variable, expression, body),
            Node::DoWhile { condition, body } => self.do_do_while(condition, body),
            Node::Switch {
                value,
                cases,
                default_statements,
            } => self.do_switch(value, &cases, &default_statements),
            Node::Labelled { name, statement } => {
                let name_id = self.compiler.builder.identifier_id(name);
                self.name_id = name_id;
                self.implicit_scope_statement(statement)?;
                self.name_id = -1;
                Ok(())
            }
            Node::Try {
                block,
                catches,
                finally_block,
            } => self.do_try(block, &catches, finally_block),
            Node::Catch { .. } => self.do_catch(node),
            Node::Rethrow => self.do_rethrow(),
            Node::Return { value } => {
                match value {
                    Some(value) => self.accept(value)?,
                    None => self.load_null()?,
                }
                self.emit_return()
            }
            Node::Assert { condition } => self.do_assert(condition),
            Node::Break { label } => self.do_break(label),
            Node::Continue { label } => self.do_continue(label),
            Node::Method(_) => self.do_local_function(node),

            Node::Parenthesized { expression, .. } => self.accept(expression),
            Node::Assign {
                token,
                target,
                value,
            } => self.do_assign(token, target, value),
            Node::Unary {
                token,
                prefix,
                expression,
            } => self.do_unary(token, prefix, expression),
            Node::Binary { token, left, right } => self.do_binary(token, left, right),
            Node::Conditional {
                condition,
                if_true,
                if_false,
            } => self.do_conditional(condition, if_true, if_false),
            Node::Dot { .. } | Node::Identifier { .. } | Node::IndexExpr { .. } => {
                self.load_expression_node(node)
            }
            Node::Invoke { .. } => self.do_invoke(node),
            Node::CascadeReceiver { object, .. } => {
                self.accept(object)?;
                self.emitter.dup();
                Ok(())
            }
            Node::Cascade { expression } => {
                self.accept(expression)?;
                self.emitter.pop();
                Ok(())
            }
            Node::New { .. } => self.do_new(node),
            Node::FunctionExpression {
                parameters,
                body,
                captured,
            } => {
                let method = self
                    .compiler
                    .current_method()
                    .expect("function expression outside method");
                let name = self.compiler.builder.method(method).name;
                let name = self.identifier_of(name);
                self.do_closure(name, &captured, &parameters, Some(body))
            }
            Node::This => self.do_this(),
            Node::Super => Err(self.compiler.error(
                ErrorKind::Compile,
                Location::invalid(),
                "Super access outside method call",
            )),
            Node::NullLiteral => self.load_null(),
            Node::Throw { expression } => {
                self.accept(expression)?;
                self.emitter.throw();
                Ok(())
            }
            Node::Is {
                is_not,
                object,
                type_name,
            } => self.do_is(is_not, object, type_name),
            Node::As { object, type_name } => self.do_as(object, type_name),
            Node::StringInterpolationExpr {
                strings,
                expressions,
            } => self.do_string_interpolation(&strings, &expressions),
            Node::LiteralInteger(value) => self.do_literal_integer(node, value),
            Node::LiteralDouble(_) => self.load_const_node(node, Some(self.scope)),
            Node::LiteralString(_) => {
                self.compiler.enqueue_core_class("String")?;
                self.load_const_node(node, Some(self.scope))
            }
            Node::LiteralBoolean(_) => self.load_const_node(node, Some(self.scope)),
            Node::LiteralList { .. } => self.do_literal_list(node),
            Node::LiteralMap { .. } => self.do_literal_map(node),

            Node::AddOne {
                frame_pos,
                expression,
                negative,
            } => self.do_add_one(frame_pos, expression, negative),
            Node::CompoundAssign {
                token,
                target,
                value,
            } => self.do_compound_assign(token, target, value),
            Node::TearoffBody { method } => {
                self.load_method_value(method)?;
                self.emitter.ret();
                Ok(())
            }
            other => Err(self.compiler.error(
                ErrorKind::Compile,
                Location::invalid(),
                format!("Cannot compile {other:?}"),
            )),
        }
    }

    fn identifier_of(&self, name: NodeId) -> NodeId {
        match self.compiler.builder.node(name) {
            Node::Dot { name, .. } => *name,
            _ => name,
        }
    }

    // ------------------------------------------------------------------
    // Statements.

    fn do_block(&mut self, statements: &[NodeId]) -> Result<()> {
        let done = self.new_label();
        self.push_restore_label(Some(done), None, self.emitter.frame_size(), true);
        self.do_statements(statements)?;
        self.pop_restore_label();
        self.bind_raw(done);
        Ok(())
    }

    fn do_statements(&mut self, statements: &[NodeId]) -> Result<()> {
        let nested = self.compiler.scopes.new_scope(Some(self.scope));
        let saved = self.set_scope(nested);

        let old_size = self.emitter.frame_size();
        for statement in statements {
            self.accept(*statement)?;
        }
        while self.emitter.frame_size() > old_size {
            self.emitter.pop();
        }

        self.set_scope(saved);
        Ok(())
    }

    fn implicit_scope_statement(&mut self, statement: NodeId) -> Result<()> {
        // A single statement that introduces bindings still needs its
        // own scope and stack cleanup.
        if matches!(
            self.compiler.builder.node(statement),
            Node::VariableDeclarationStatement { .. } | Node::Method(_)
        ) {
            return self.do_statements(&[statement]);
        }
        self.accept(statement)
    }

    fn do_variable_declaration(&mut self, node: NodeId) -> Result<()> {
        let data = self.compiler.builder.variable(node);
        if data.modifiers.is_const() {
            let name_id = self.compiler.builder.identifier_id(data.name);
            let entry = self.compiler.scopes.new_decl(node);
            self.compiler
                .scopes
                .add(self.scope, name_id, ScopeEntry::Decl(entry));
            return Ok(());
        }
        match data.value {
            Some(value) => self.accept(value)?,
            None => self.load_null()?,
        }
        self.add_variable_declaration_to_scope(node)
    }

    fn add_variable_declaration_to_scope(&mut self, node: NodeId) -> Result<()> {
        let data = self.compiler.builder.variable(node);
        let entry = data.entry.expect("declaration without entry");
        self.compiler.scopes.decl_mut(entry).index = self.emitter.frame_size() - 1;
        if self.compiler.scopes.decl(entry).capture == CaptureKind::ByReference {
            self.emitter.allocate_boxed();
        }
        let name_id = self.compiler.builder.identifier_id(data.name);
        if self.compiler.scopes.lookup_local(self.scope, name_id).is_some() {
            return Err(self.compiler.error(
                ErrorKind::Compile,
                self.compiler.builder.identifier_location(data.name),
                "Declaration shadows another declaration",
            ));
        }
        self.compiler
            .scopes
            .add(self.scope, name_id, ScopeEntry::Decl(entry));
        Ok(())
    }

    fn do_if(
        &mut self,
        condition: NodeId,
        if_true: NodeId,
        if_false: Option<NodeId>,
    ) -> Result<()> {
        self.accept(condition)?;
        let done = self.new_label();
        let if_false_label = self.new_label();
        self.branch_if_false(if_false_label);
        self.push_restore_label(Some(done), None, self.emitter.frame_size(), true);
        self.implicit_scope_statement(if_true)?;
        if let Some(if_false) = if_false {
            self.branch(done);
            self.bind(if_false_label);
            self.implicit_scope_statement(if_false)?;
        } else {
            self.bind(if_false_label);
        }
        self.pop_restore_label();
        self.bind(done);
        Ok(())
    }

    fn do_while(&mut self, condition: NodeId, body: NodeId) -> Result<()> {
        let loop_label = self.new_label();
        let done = self.new_label();
        self.bind(loop_label);
        self.accept(condition)?;
        self.branch_if_false(done);
        self.push_restore_label(Some(done), Some(loop_label), self.emitter.frame_size(), false);
        self.implicit_scope_statement(body)?;
        self.pop_restore_label();
        self.branch(loop_label);
        self.bind(done);
        Ok(())
    }

    fn do_for(
        &mut self,
        initializer: NodeId,
        condition: Option<NodeId>,
        increments: &[NodeId],
        body: NodeId,
    ) -> Result<()> {
        let nested = self.compiler.scopes.new_scope(Some(self.scope));
        let saved = self.set_scope(nested);

        let loop_label = self.new_label();
        let done = self.new_label();
        let continue_label = self.new_label();
        self.accept(initializer)?;
        self.bind(loop_label);
        match condition {
            Some(condition) => self.accept(condition)?,
            None => self.load_boolean(true)?,
        }
        self.branch_if_false(done);
        self.push_restore_label(
            Some(done),
            Some(continue_label),
            self.emitter.frame_size(),
            false,
        );
        self.implicit_scope_statement(body)?;
        self.pop_restore_label();
        self.bind(continue_label);
        for increment in increments {
            self.accept(*increment)?;
            self.emitter.pop();
        }
        self.branch(loop_label);
        self.bind(done);

        self.set_scope(saved);
        Ok(())
    }

    fn do_for_in(&mut self, variable: NodeId, expression: NodeId, body: NodeId) -> Result<()> {
        let loop_label = self.new_label();
        let done = self.new_label();

        let local_scope = self.compiler.scopes.new_scope(Some(self.scope));
        let saved = self.set_scope(local_scope);

        let iterator_index = self.emitter.frame_size();

        // Keep the iterator on the stack for the whole loop.
        self.accept(expression)?;
        let iterator = self.compiler.builder.canonical_id("iterator");
        self.compiler.enqueue_selector_id(iterator);
        self.emitter.invoke_getter(iterator);

        self.bind(loop_label);

        self.emitter.load_local(iterator_index);
        let move_next = self.compiler.builder.canonical_id("moveNext");
        self.compiler.enqueue_invoke_selector(move_next, 0, &[]);
        self.emitter.invoke_method(move_next, 0);
        self.branch_if_false(done);

        let nested = self.compiler.scopes.new_scope(Some(self.scope));
        self.set_scope(nested);

        let var_offset = self.emitter.frame_size();
        self.accept(variable)?;

        self.emitter.load_local(iterator_index);
        let current = self.compiler.builder.canonical_id("current");
        self.compiler.enqueue_selector_id(current);
        self.emitter.invoke_getter(current);
        self.emitter.store_local(var_offset);
        self.emitter.pop();

        self.push_restore_label(Some(done), Some(loop_label), self.emitter.frame_size(), false);
        self.implicit_scope_statement(body)?;
        self.pop_restore_label();

        self.emitter.pop();

        self.set_scope(local_scope);

        self.branch(loop_label);
        self.bind(done);

        self.emitter.pop();

        self.set_scope(saved);
        debug_assert_eq!(self.emitter.frame_size(), iterator_index);
        Ok(())
    }

    fn do_do_while(&mut self, condition: NodeId, body: NodeId) -> Result<()> {
        let done = self.new_label();
        let skip = self.new_label();
        let loop_label = self.new_label();
        self.bind(loop_label);
        self.push_restore_label(Some(done), Some(skip), self.emitter.frame_size(), false);
        self.implicit_scope_statement(body)?;
        self.pop_restore_label();
        self.bind(skip);
        self.accept(condition)?;
        self.branch_if_true(loop_label);
        self.bind(done);
        Ok(())
    }

    fn do_switch(
        &mut self,
        value: NodeId,
        cases: &[NodeId],
        default_statements: &[NodeId],
    ) -> Result<()> {
        let start = self.new_label();
        let break_label = self.new_label();
        let done = self.new_label();

        self.accept(value)?;

        self.branch(start);
        self.bind(break_label);
        self.branch(done);
        self.bind(start);

        for case in cases {
            let Node::Case {
                condition,
                statements,
            } = self.compiler.builder.node(*case).clone()
            else {
                unreachable!("switch holds cases");
            };
            let skip = self.new_label();
            self.emitter.dup();
            self.accept(condition)?;
            self.invoke_operator(TokenKind::Eq, 1)?;
            self.branch_if_false(skip);

            self.push_restore_label(Some(break_label), None, self.emitter.frame_size(), false);
            self.do_statements(&statements)?;
            self.pop_restore_label();

            self.branch(break_label);
            self.bind(skip);
        }

        self.push_restore_label(Some(break_label), None, self.emitter.frame_size(), false);
        self.do_statements(default_statements)?;
        self.pop_restore_label();

        self.bind(done);
        self.emitter.pop();
        Ok(())
    }

    fn do_try(
        &mut self,
        block: NodeId,
        catches: &[NodeId],
        finally_block: Option<NodeId>,
    ) -> Result<()> {
        let has_finally = finally_block.is_some();
        let catch_start = self.new_label();
        let end = self.new_label();
        let finally = self.new_label();
        let finally_return_label = self.new_label();

        // An artificial local holds the in-flight exception; null while
        // nothing is being unwound.
        self.load_null()?;

        let start = self.emitter.position();

        if has_finally {
            self.push_finally_restore_label(finally, finally_return_label, self.emitter.frame_size());
        }
        self.accept(block)?;
        self.branch(end);
        let position = self.emitter.position();
        self.emitter.add_frame_range(start, position);

        let old_exception_index = self.exception_index;
        self.exception_index = self.emitter.frame_size() - 1;

        self.bind(catch_start);
        let catch_start_position = self.emitter.position();

        for catch in catches {
            let Node::Catch { type_name, .. } = self.compiler.builder.node(*catch).clone() else {
                unreachable!("try holds catches");
            };
            if let Some(type_name) = type_name {
                self.emitter.dup();
                self.is_check(type_name)?;
                let not_match = self.new_label();
                self.branch_if_false(not_match);
                self.do_catch(*catch)?;
                self.branch(end);
                self.bind(not_match);
            } else {
                self.do_catch(*catch)?;
                self.branch(end);
                // No catch clause after an untyped one is reachable.
                break;
            }
        }

        if has_finally {
            if !catches.is_empty() {
                // Make sure the finally runs for throws out of catch
                // clauses too.
                let position = self.emitter.position();
                self.emitter.add_frame_range(catch_start_position, position);
            }
            self.pop_restore_label();
            self.subroutine_call(finally, finally_return_label);
        }

        // Nothing caught the exception: re-throw it.
        self.emitter.throw();

        self.bind(end);

        if has_finally {
            let done = self.new_label();
            self.subroutine_call(finally, finally_return_label);
            self.branch(done);

            self.bind(finally);
            self.emitter.frame_size_fix(1);
            self.accept(finally_block.unwrap())?;
            self.subroutine_return(finally_return_label);

            self.bind(done);
        }

        self.emitter.pop();

        self.exception_index = old_exception_index;
        Ok(())
    }

    fn do_catch(&mut self, node: NodeId) -> Result<()> {
        let Node::Catch {
            exception,
            stack_trace,
            block,
            ..
        } = self.compiler.builder.node(node).clone()
        else {
            unreachable!("expected catch");
        };
        let nested = self.compiler.scopes.new_scope(Some(self.scope));
        let saved = self.set_scope(nested);

        if let Some(exception) = exception {
            self.emitter.load_local(self.exception_index);
            self.add_variable_declaration_to_scope(exception)?;
            if let Some(stack_trace) = stack_trace {
                self.load_null()?;
                self.add_variable_declaration_to_scope(stack_trace)?;
            }
        }

        self.accept(block)?;

        if exception.is_some() {
            self.emitter.pop();
            if stack_trace.is_some() {
                self.emitter.pop();
            }
        }

        self.set_scope(saved);
        Ok(())
    }

    fn do_rethrow(&mut self) -> Result<()> {
        if self.exception_index == -1 {
            return Err(self.compiler.error(
                ErrorKind::Compile,
                Location::invalid(),
                "Rethrow is not in catch block",
            ));
        }
        self.emitter.load_local(self.exception_index);
        self.emitter.throw();
        Ok(())
    }

    fn do_assert(&mut self, condition: NodeId) -> Result<()> {
        let done = self.new_label();
        self.accept(condition)?;
        self.branch_if_true(done);
        let message = self
            .compiler
            .builder
            .new_node(Node::LiteralString("assertion failed".to_string()));
        self.load_const_node(message, None)?;
        self.emitter.throw();
        self.emitter.pop();
        self.bind(done);
        Ok(())
    }

    pub fn emit_return(&mut self) -> Result<()> {
        let stack_size = self.emitter.frame_size();
        for at in (0..self.restore_labels.len()).rev() {
            let restore_stack_size = self.restore_labels[at].stack_size;
            let (Some(finally), Some(finally_return)) = (
                self.restore_labels[at].finally_label,
                self.restore_labels[at].finally_return_label,
            ) else {
                continue;
            };
            self.emitter.store_local(restore_stack_size - 1);
            self.pop_to(self.emitter.frame_size(), restore_stack_size, false);
            self.subroutine_call(finally, finally_return);
            self.emitter.load_stack_local(0);
        }

        // Setters return the stashed incoming value.
        let is_setter = self
            .compiler
            .current_method()
            .map(|method| self.compiler.builder.method(method).modifiers.is_set())
            .unwrap_or(false);
        if is_setter {
            self.emitter.pop();
            self.emitter.load_local(0);
        }

        self.emitter.ret();
        let frame = self.emitter.frame_size();
        self.emitter.frame_size_fix(stack_size - frame - 1);
        Ok(())
    }

    fn pop_to(&mut self, stack_size: i32, new_stack_size: i32, pop_transparent: bool) -> i32 {
        let pop_count = stack_size - new_stack_size;
        debug_assert!(pop_count >= 0);
        for _ in 0..pop_count {
            self.emitter.pop();
        }
        if pop_transparent {
            self.emitter.frame_size_fix(pop_count);
        }
        new_stack_size
    }

    fn do_break(&mut self, label: Option<NodeId>) -> Result<()> {
        let name_id = label
            .map(|label| self.compiler.builder.identifier_id(label))
            .unwrap_or(-1);
        let mut stack_size = self.emitter.frame_size();
        for at in (0..self.restore_labels.len()).rev() {
            let restore_stack_size = self.restore_labels[at].stack_size;
            if let (Some(finally), Some(finally_return)) = (
                self.restore_labels[at].finally_label,
                self.restore_labels[at].finally_return_label,
            ) {
                stack_size = self.pop_to(stack_size, restore_stack_size, true);
                self.subroutine_call(finally, finally_return);
            } else if let Some(break_label) = self.restore_labels[at].break_label {
                let matches_name = if name_id == -1 {
                    !self.restore_labels[at].label_only
                } else {
                    self.restore_labels[at].name_id == name_id
                };
                if matches_name {
                    self.pop_to(stack_size, restore_stack_size, true);
                    self.branch(break_label);
                    self.emitter.frame_size_marker();
                    return Ok(());
                }
            }
        }
        Err(self.compiler.error(
            ErrorKind::Compile,
            Location::invalid(),
            "Unmatched break statement",
        ))
    }

    fn do_continue(&mut self, label: Option<NodeId>) -> Result<()> {
        let name_id = label
            .map(|label| self.compiler.builder.identifier_id(label))
            .unwrap_or(-1);
        let mut stack_size = self.emitter.frame_size();
        for at in (0..self.restore_labels.len()).rev() {
            let restore_stack_size = self.restore_labels[at].stack_size;
            if let (Some(finally), Some(finally_return)) = (
                self.restore_labels[at].finally_label,
                self.restore_labels[at].finally_return_label,
            ) {
                stack_size = self.pop_to(stack_size, restore_stack_size, true);
                self.subroutine_call(finally, finally_return);
            } else if let Some(continue_label) = self.restore_labels[at].continue_label {
                let matches_name = if name_id == -1 {
                    !self.restore_labels[at].label_only
                } else {
                    self.restore_labels[at].name_id == name_id
                };
                if matches_name {
                    self.pop_to(stack_size, restore_stack_size, true);
                    self.branch(continue_label);
                    self.emitter.frame_size_marker();
                    return Ok(());
                }
            }
        }
        Err(self.compiler.error(
            ErrorKind::Compile,
            Location::invalid(),
            "Unmatched continue statement",
        ))
    }

    // ------------------------------------------------------------------
    // Expressions.

    pub(crate) fn do_this(&mut self) -> Result<()> {
        match self.compiler.scopes.lookup(self.scope, self.compiler.this_name()) {
            Some(entry) => self.load_scope_entry(entry),
            None => {
                self.emitter.load_this();
                Ok(())
            }
        }
    }

    pub fn load_null(&mut self) -> Result<()> {
        let id = self.compiler.const_pool.intern_null();
        self.emitter.load_const(id);
        Ok(())
    }

    pub fn load_boolean(&mut self, value: bool) -> Result<()> {
        let id = if value {
            self.compiler.const_pool.intern_true()
        } else {
            self.compiler.const_pool.intern_false()
        };
        self.emitter.load_const(id);
        Ok(())
    }

    fn do_assign(&mut self, token: TokenKind, target: NodeId, value: NodeId) -> Result<()> {
        if token == TokenKind::Assign {
            self.store_expression_node(target, value)
        } else {
            let compound = self.compiler.builder.new_node(Node::CompoundAssign {
                token,
                target,
                value,
            });
            self.store_expression_node(target, compound)
        }
    }

    fn do_conditional(&mut self, condition: NodeId, if_true: NodeId, if_false: NodeId) -> Result<()> {
        self.load_null()?;
        self.accept(condition)?;
        let if_false_label = self.new_label();
        let done = self.new_label();
        self.branch_if_false(if_false_label);
        self.emitter.pop();
        self.accept(if_true)?;
        self.branch(done);
        self.bind(if_false_label);
        self.emitter.pop();
        self.accept(if_false)?;
        self.bind(done);
        Ok(())
    }

    fn do_unary(&mut self, token: TokenKind, prefix: bool, expression: NodeId) -> Result<()> {
        if token == TokenKind::Increment || token == TokenKind::Decrement {
            let mut frame_pos = -1;
            if !prefix {
                frame_pos = self.emitter.frame_size();
                self.load_expression_node(expression)?;
            }
            let add = self.compiler.builder.new_node(Node::AddOne {
                frame_pos,
                expression,
                negative: token == TokenKind::Decrement,
            });
            self.store_expression_node(expression, add)?;
            if !prefix {
                self.emitter.pop();
            }
            return Ok(());
        }
        if token == TokenKind::Sub {
            let name = self.compiler.builder.canonicalize("unary-");
            return self.invoke_method_node(expression, name, &[], &[]);
        }
        self.accept(expression)?;
        if token == TokenKind::Not {
            self.emitter.negate();
            return Ok(());
        }
        self.invoke_operator_no_args(token)
    }

    fn invoke_operator_no_args(&mut self, token: TokenKind) -> Result<()> {
        let name = self.compiler.builder.canonical_id(token.syntax());
        self.compiler.enqueue_invoke_selector(name, 0, &[]);
        self.emitter.invoke_method(name, 0);
        Ok(())
    }

    fn do_binary(&mut self, token: TokenKind, left: NodeId, right: NodeId) -> Result<()> {
        match token {
            TokenKind::And => {
                self.load_boolean(false)?;
                let if_false = self.new_label();
                self.accept(left)?;
                self.branch_if_false(if_false);
                self.accept(right)?;
                self.branch_if_false(if_false);
                self.emitter.pop();
                self.load_boolean(true)?;
                self.bind(if_false);
                Ok(())
            }
            TokenKind::Or => {
                self.load_boolean(true)?;
                let if_true = self.new_label();
                self.accept(left)?;
                self.branch_if_true(if_true);
                self.accept(right)?;
                self.branch_if_true(if_true);
                self.emitter.pop();
                self.load_boolean(false)?;
                self.bind(if_true);
                Ok(())
            }
            TokenKind::Eq | TokenKind::Ne => {
                self.accept(left)?;
                self.accept(right)?;
                let left_is_null =
                    matches!(self.compiler.builder.node(left), Node::NullLiteral);
                let right_is_null =
                    matches!(self.compiler.builder.node(right), Node::NullLiteral);
                if left_is_null || right_is_null {
                    self.emitter.identical();
                } else {
                    let name = Name::Equals.id() as i32;
                    self.compiler.enqueue_invoke_selector(name, 1, &[]);
                    self.emitter.invoke_method(name, 1);
                }
                if token == TokenKind::Ne {
                    self.emitter.negate();
                }
                Ok(())
            }
            _ => {
                self.accept(left)?;
                self.accept(right)?;
                let name = self.compiler.builder.canonical_id(token.syntax());
                self.compiler.enqueue_invoke_selector(name, 1, &[]);
                self.emitter.invoke_method(name, 1);
                Ok(())
            }
        }
    }

    fn do_invoke(&mut self, node: NodeId) -> Result<()> {
        let Node::Invoke {
            target,
            arguments,
            named_arguments,
        } = self.compiler.builder.node(node).clone()
        else {
            unreachable!("expected invoke");
        };

        if let Node::Dot { object, name } = self.compiler.builder.node(target).clone() {
            if let Some(resolved) = self.compiler.resolve_dot(target, self.scope) {
                match self.compiler.builder.node(resolved).clone() {
                    Node::Method(method) => {
                        let is_static_callable = matches!(
                            method.owner,
                            Some(Owner::Library(_))
                        ) || method.modifiers.is_static();
                        if is_static_callable {
                            return self.invoke_static_node(
                                resolved,
                                &arguments,
                                &named_arguments,
                            );
                        }
                        return self.handle_unresolved(name);
                    }
                    Node::VariableDeclaration(var) => {
                        if var.modifiers.is_static() {
                            let call = self.call_name_node();
                            return self.invoke_method_node(
                                target,
                                call,
                                &arguments,
                                &named_arguments,
                            );
                        }
                        return self.handle_unresolved(name);
                    }
                    _ => {
                        let call = self.call_name_node();
                        return self.invoke_method_node(
                            target,
                            call,
                            &arguments,
                            &named_arguments,
                        );
                    }
                }
            }
            if matches!(self.compiler.builder.node(object), Node::Super) {
                let name_id = self.compiler.builder.identifier_id(name);
                let member = self.super_lookup(name_id, name, true)?.unwrap();
                return self.invoke_static_node(member, &arguments, &named_arguments);
            }
            let resolved_object = self.compiler.resolve(object, self.scope);
            if let Some(resolved_object) = resolved_object {
                if matches!(self.compiler.builder.node(resolved_object), Node::Class(_)) {
                    // A static lookup on the class failed above.
                    return self.handle_unresolved(name);
                }
            }
            return self.invoke_method_node(object, name, &arguments, &named_arguments);
        }

        if matches!(self.compiler.builder.node(target), Node::Identifier { .. }) {
            let entry = self.compiler.resolve_identifier_entry(target, self.scope);
            match entry {
                None => {
                    if self.compiler.is_static_context() {
                        return self.handle_unresolved(target);
                    }
                    let this_node = self.compiler.builder.new_node(Node::This);
                    return self.invoke_method_node(
                        this_node,
                        target,
                        &arguments,
                        &named_arguments,
                    );
                }
                Some(ScopeEntry::Member(member)) => {
                    let member = self.compiler.scopes.member(member).clone();
                    if let Some(member_node) = member.member {
                        if let Node::Method(method) =
                            self.compiler.builder.node(member_node).clone()
                        {
                            if !method.modifiers.is_get() {
                                let instance_method =
                                    matches!(method.owner, Some(Owner::Class(_)))
                                        && !method.modifiers.is_static();
                                if instance_method {
                                    if self.compiler.is_static_context() {
                                        return self.handle_unresolved(target);
                                    }
                                    let this_node =
                                        self.compiler.builder.new_node(Node::This);
                                    return self.invoke_method_node(
                                        this_node,
                                        target,
                                        &arguments,
                                        &named_arguments,
                                    );
                                }
                                return self.invoke_static_node(
                                    member_node,
                                    &arguments,
                                    &named_arguments,
                                );
                            }
                        }
                    }
                }
                Some(_) => {}
            }
        }

        let call = self.call_name_node();
        self.invoke_method_node(target, call, &arguments, &named_arguments)
    }

    fn call_name_node(&mut self) -> NodeId {
        let call = self.compiler.call_name();
        self.compiler.builder.new_node(Node::Identifier {
            id: call,
            location: Location::invalid(),
        })
    }

    fn do_new(&mut self, node: NodeId) -> Result<()> {
        let Node::New { is_const, invoke } = self.compiler.builder.node(node).clone() else {
            unreachable!("expected new");
        };
        if is_const {
            return self.load_const_node(node, Some(self.scope));
        }
        let Node::Invoke {
            target,
            arguments,
            named_arguments,
        } = self.compiler.builder.node(invoke).clone()
        else {
            unreachable!("new holds invoke");
        };

        let mut resolved = self.compiler.resolve(target, self.scope);
        let class_name;
        let constructor_name;
        let dot = match self.compiler.builder.node(target).clone() {
            Node::Dot { object, name } => Some((object, name)),
            _ => None,
        };
        if resolved
            .map(|node| !matches!(self.compiler.builder.node(node), Node::Class(_)))
            .unwrap_or(true)
            && dot.is_some()
        {
            let (object, name) = dot.unwrap();
            resolved = self.compiler.resolve(object, self.scope);
            constructor_name = name;
            class_name = self.identifier_of(object);
        } else {
            class_name = self.identifier_of(target);
            constructor_name = class_name;
        }
        let Some(resolved) = resolved else {
            return self.handle_unresolved(class_name);
        };
        if !matches!(self.compiler.builder.node(resolved), Node::Class(_)) {
            let name_id = self.compiler.builder.identifier_id(class_name);
            return Err(self.compiler.error(
                ErrorKind::Compile,
                self.compiler.builder.identifier_location(class_name),
                format!(
                    "'{}' is not a class",
                    self.compiler.builder.lookup_identifier(name_id)
                ),
            ));
        }
        let class_id = self.compiler.enqueue_class(resolved)?;
        let constructor_id = self.compiler.builder.identifier_id(constructor_name);
        let constructor = self
            .compiler
            .get_compiled_class(class_id)
            .lookup_constructor(constructor_id);
        let Some(constructor) = constructor else {
            self.load_arguments(&arguments)?;
            return self.handle_unresolved(constructor_name);
        };
        self.invoke_constructor(resolved, constructor, &arguments, &named_arguments)
    }

    fn do_local_function(&mut self, node: NodeId) -> Result<()> {
        let data = self.compiler.builder.method(node);
        let name = self.identifier_of(data.name);
        self.do_closure(name, &data.captured, &data.parameters, data.body)?;
        // Bind the closure object to the function's name.
        let var = self.compiler.builder.new_node(Node::VariableDeclaration(
            VariableData {
                name,
                value: None,
                modifiers: Modifiers::default(),
                owner: None,
                entry: None,
                index: -1,
                initializer_id: -1,
            },
        ));
        let entry = self.compiler.scopes.new_decl(var);
        self.compiler.builder.variable_mut(var).entry = Some(entry);
        self.add_variable_declaration_to_scope(var)
    }

    /// Lower a closure: synthesize a class with one field per captured
    /// variable and a `call` method, allocate it with the captured
    /// values, and compile the body against field-backed locals.
    fn do_closure(
        &mut self,
        name: NodeId,
        captured: &[NodeId],
        parameters: &[NodeId],
        body: Option<NodeId>,
    ) -> Result<()> {
        // The synthesized class: captured fields plus `call`.
        let statement = self.compiler.builder.new_node(
            Node::VariableDeclarationStatement {
                modifiers: Modifiers::default(),
                declarations: captured.to_vec(),
            },
        );
        let call_name = self.call_name_node();
        let call_method = self.compiler.builder.new_node(Node::Method(
            crate::ast::MethodData {
                modifiers: Modifiers::default(),
                name: call_name,
                parameters: parameters.to_vec(),
                initializers: Vec::new(),
                body: None,
                id: -1,
                owner: None,
                captured: Vec::new(),
            },
        ));
        // Flatten the current scope chain; the class outlives this frame.
        let class_scope = self.compiler.scopes.new_scope(None);
        let mut current = Some(self.scope);
        while let Some(scope) = current {
            self.compiler.scopes.add_all(class_scope, scope);
            current = self.compiler.scopes.outer(scope);
        }
        let clazz = self.compiler.builder.new_node(Node::Class(crate::ast::ClassData {
            is_abstract: false,
            name,
            superclass: None,
            mixins: Vec::new(),
            implements: Vec::new(),
            declarations: vec![statement, call_method],
            id: -1,
            scope: Some(class_scope),
            library: None,
        }));
        self.compiler.builder.method_mut(call_method).owner = Some(Owner::Class(clazz));

        // Load the captured values; a self-reference loads null now and
        // is patched with a field store after allocation.
        let mut self_field = -1;
        for (i, var) in captured.iter().enumerate() {
            let data = self.compiler.builder.variable(*var);
            if data.name == name {
                debug_assert_eq!(self_field, -1);
                self_field = i as i32;
                self.load_null()?;
                continue;
            }
            let entry = data.entry.expect("captured variable without entry");
            let index = self.compiler.scopes.decl(entry).index;
            if index < 0 {
                self.do_this()?;
            } else {
                self.emitter.load_local(index);
            }
        }
        let class_id = self.compiler.add_class(clazz, None);
        self.emitter.allocate(class_id, captured.len());

        if self_field >= 0 {
            self.emitter.dup();
            self.emitter.store_field(self_field as usize);
        }

        // Compile the call method against an inner scope where every
        // captured variable is a field-backed local.
        let owner_scope = {
            let method = self
                .compiler
                .current_method()
                .expect("closure outside method");
            self.compiler.method_owner_scope(method)
        };
        let inner_scope = self.compiler.scopes.new_scope(Some(owner_scope));
        let mut nested = Emitter::new(1 + parameters.len());
        let mut old_indices = Vec::with_capacity(captured.len());
        for (i, var) in captured.iter().enumerate() {
            let data = self.compiler.builder.variable(*var);
            let entry = data.entry.expect("captured variable without entry");
            old_indices.push(self.compiler.scopes.decl(entry).index);
            self.compiler.scopes.decl_mut(entry).index = i as i32;
            let name_id = self.compiler.builder.identifier_id(data.name);
            self.compiler
                .scopes
                .add(inner_scope, name_id, ScopeEntry::Decl(entry));
            nested.load_this();
            nested.load_field(i);
        }
        self.compiler
            .compile_function(parameters, body, inner_scope, &mut nested, true, false)?;
        debug_assert_eq!(nested.frame_size(), captured.len() as i32, "bad exit frame size");
        for (i, var) in captured.iter().enumerate() {
            let data = self.compiler.builder.variable(*var);
            let entry = data.entry.expect("captured variable without entry");
            self.compiler.scopes.decl_mut(entry).index = old_indices[i];
        }
        let code = nested.into_code();
        self.compiler.add_stub(call_method, code);
        Ok(())
    }

    fn do_is(&mut self, is_not: bool, object: NodeId, type_name: NodeId) -> Result<()> {
        self.accept(object)?;
        self.is_check(type_name)?;
        if is_not {
            self.emitter.negate();
        }
        Ok(())
    }

    fn is_check(&mut self, type_name: NodeId) -> Result<()> {
        let name_id = self.compiler.builder.identifier_id(type_name);
        let selector = self.compiler.enqueue_is_selector(name_id)?;
        self.emitter.invoke_test(selector);
        Ok(())
    }

    fn do_as(&mut self, object: NodeId, type_name: NodeId) -> Result<()> {
        let done = self.new_label();
        self.accept(object)?;
        // null casts to anything.
        self.emitter.dup();
        self.load_null()?;
        self.invoke_operator(TokenKind::Eq, 1)?;
        self.branch_if_true(done);
        // A passing is-check keeps the value.
        self.emitter.dup();
        self.is_check(type_name)?;
        self.branch_if_true(done);
        self.emitter.throw();
        self.bind(done);
        Ok(())
    }

    fn do_string_interpolation(
        &mut self,
        strings: &[NodeId],
        expressions: &[NodeId],
    ) -> Result<()> {
        let to_string = self.compiler.builder.canonical_id("toString");
        self.compiler.enqueue_invoke_selector(to_string, 0, &[]);
        let plus = Name::Add.id() as i32;
        self.compiler.enqueue_invoke_selector(plus, 1, &[]);
        self.accept(strings[0])?;
        for (i, expression) in expressions.iter().enumerate() {
            self.accept(*expression)?;
            self.emitter.invoke_method(to_string, 0);
            self.emitter.invoke_method(plus, 1);
            self.accept(strings[i + 1])?;
            self.emitter.invoke_method(plus, 1);
        }
        Ok(())
    }

    fn do_literal_integer(&mut self, node: NodeId, value: i64) -> Result<()> {
        if integer_needs_const_pool(value) {
            self.load_const_node(node, None)
        } else {
            self.emitter.load_integer(value);
            Ok(())
        }
    }

    fn do_literal_list(&mut self, node: NodeId) -> Result<()> {
        let Node::LiteralList { is_const, elements } = self.compiler.builder.node(node).clone()
        else {
            unreachable!("expected list literal");
        };
        if is_const {
            return self.load_const_node(node, Some(self.scope));
        }
        let class_node = self.compiler.enqueue_core_class("_GrowableList")?;
        let class_data = self.compiler.builder.class(class_node);
        let class_name_id = self.compiler.builder.identifier_id(class_data.name);
        let constructor = self
            .compiler
            .get_compiled_class(class_data.id)
            .lookup_constructor(class_name_id)
            .expect("growable list constructor");
        self.invoke_constructor(class_node, constructor, &[], &[])?;

        let add = self.compiler.builder.canonical_id("add");
        self.compiler.enqueue_invoke_selector(add, 1, &[]);

        for element in elements {
            self.emitter.dup();
            self.accept(element)?;
            self.emitter.invoke_method(add, 1);
            self.emitter.pop();
        }
        Ok(())
    }

    fn do_literal_map(&mut self, node: NodeId) -> Result<()> {
        let class_node = self.compiler.enqueue_core_class("Map")?;
        let Node::LiteralMap {
            is_const,
            keys,
            values,
        } = self.compiler.builder.node(node).clone()
        else {
            unreachable!("expected map literal");
        };
        if is_const {
            return self.load_const_node(node, Some(self.scope));
        }
        let class_data = self.compiler.builder.class(class_node);
        let class_name_id = self.compiler.builder.identifier_id(class_data.name);
        let constructor = self
            .compiler
            .get_compiled_class(class_data.id)
            .lookup_constructor(class_name_id)
            .expect("map constructor");
        self.invoke_constructor(class_node, constructor, &[], &[])?;

        for (key, value) in keys.iter().zip(values.iter()) {
            self.emitter.dup();
            self.accept(*key)?;
            self.accept(*value)?;
            self.invoke_operator(TokenKind::AssignIndex, 2)?;
            self.emitter.pop();
        }
        Ok(())
    }

    fn do_add_one(&mut self, frame_pos: i32, expression: NodeId, negative: bool) -> Result<()> {
        if frame_pos < 0 {
            self.load_expression_node(expression)?;
        } else {
            self.emitter.load_local(frame_pos);
        }
        let op = if negative {
            Name::Sub.id() as i32
        } else {
            Name::Add.id() as i32
        };
        self.emitter.load_integer(1);
        self.compiler.enqueue_invoke_selector(op, 1, &[]);
        self.emitter.invoke_method(op, 1);
        Ok(())
    }

    fn do_compound_assign(&mut self, token: TokenKind, target: NodeId, value: NodeId) -> Result<()> {
        let op = match token {
            TokenKind::AssignOr => TokenKind::BitOr,
            TokenKind::AssignXor => TokenKind::BitXor,
            TokenKind::AssignAnd => TokenKind::BitAnd,
            TokenKind::AssignShl => TokenKind::Shl,
            TokenKind::AssignShr => TokenKind::Shr,
            TokenKind::AssignAdd => TokenKind::Add,
            TokenKind::AssignSub => TokenKind::Sub,
            TokenKind::AssignMul => TokenKind::Mul,
            TokenKind::AssignTruncDiv => TokenKind::TruncDiv,
            TokenKind::AssignDiv => TokenKind::Div,
            TokenKind::AssignMod => TokenKind::Mod,
            _ => {
                return Err(self.compiler.error(
                    ErrorKind::Compile,
                    Location::invalid(),
                    format!("Invalid compound assignment '{}'", token.syntax()),
                ));
            }
        };
        self.load_expression_node(target)?;
        self.accept(value)?;
        self.invoke_operator(op, 1)
    }

    // ------------------------------------------------------------------
    // Loads and stores.

    fn store_expression_node(&mut self, node: NodeId, value: NodeId) -> Result<()> {
        if let Some(entry) = self.compiler.resolve_entry(node, self.scope) {
            return self.store_scope_entry(entry, value);
        }

        match self.compiler.builder.node(node).clone() {
            Node::Identifier { .. } => {
                let name_id = self.compiler.builder.identifier_id(node);
                let member = self.super_lookup(name_id, node, true)?.unwrap();
                self.store_variable_declaration(member, value)
            }
            Node::Dot { object, name } => {
                if matches!(self.compiler.builder.node(object), Node::Super) {
                    let name_id = self.compiler.builder.identifier_id(name);
                    let member = self.super_lookup(name_id, name, true)?.unwrap();
                    return self.store_variable_declaration(member, value);
                }
                self.accept(object)?;
                self.accept(value)?;
                let name_id = self.compiler.builder.identifier_id(name);
                self.compiler.enqueue_selector_id(name_id);
                self.emitter.invoke_setter(name_id);
                Ok(())
            }
            Node::IndexExpr { target, key } => {
                if matches!(self.compiler.builder.node(target), Node::Super) {
                    let name_id = Name::AssignIndex.id() as i32;
                    let name = self.compiler.builder.new_node(Node::Identifier {
                        id: name_id,
                        location: Location::invalid(),
                    });
                    let member = self.super_lookup(name_id, name, true)?.unwrap();
                    return self.invoke_static_node(member, &[key, value], &[]);
                }
                self.accept(target)?;
                self.accept(key)?;
                self.accept(value)?;
                self.invoke_operator(TokenKind::AssignIndex, 2)
            }
            other => Err(self.compiler.error(
                ErrorKind::Compile,
                Location::invalid(),
                format!("Expression is not assignable: {other:?}"),
            )),
        }
    }

    fn store_scope_entry(&mut self, entry: ScopeEntry, value: NodeId) -> Result<()> {
        match entry {
            ScopeEntry::Formal { index } => {
                self.accept(value)?;
                self.emitter.store_parameter(index as usize);
                Ok(())
            }
            ScopeEntry::Member(member) => {
                let member = self.compiler.scopes.member(member).clone();
                if let Some(setter) = member.setter {
                    let data = self.compiler.builder.method(setter);
                    let instance_setter = matches!(data.owner, Some(Owner::Class(_)))
                        && !data.modifiers.is_static();
                    if instance_setter {
                        self.compiler.enqueue_selector_id(member.name);
                        self.do_this()?;
                        self.accept(value)?;
                        self.emitter.invoke_setter(member.name);
                        Ok(())
                    } else {
                        self.invoke_static_node(setter, &[value], &[])
                    }
                } else {
                    match member.member {
                        Some(node)
                            if matches!(
                                self.compiler.builder.node(node),
                                Node::VariableDeclaration(_)
                            ) =>
                        {
                            self.store_variable_declaration(node, value)
                        }
                        _ => {
                            let name = self.compiler.builder.new_node(Node::Identifier {
                                id: member.name,
                                location: Location::invalid(),
                            });
                            self.handle_unresolved(name)
                        }
                    }
                }
            }
            ScopeEntry::Decl(decl) => {
                let index = self.compiler.scopes.decl(decl).index;
                debug_assert!(index >= 0);
                self.accept(value)?;
                if self.compiler.scopes.decl(decl).capture == CaptureKind::ByReference {
                    self.emitter.store_boxed(index);
                } else {
                    self.emitter.store_local(index);
                }
                Ok(())
            }
            ScopeEntry::Library { .. } => Err(self.compiler.error(
                ErrorKind::Compile,
                Location::invalid(),
                "Cannot assign to library",
            )),
        }
    }

    fn store_variable_declaration(&mut self, node: NodeId, value: NodeId) -> Result<()> {
        let id = self.compiler.enqueue_variable(node)?;
        if id >= 0 {
            self.accept(value)?;
            self.emitter.store_static(id);
            Ok(())
        } else if !self.compiler.is_static_context() {
            let data = self.compiler.builder.variable(node);
            let name_id = self.compiler.builder.identifier_id(data.name);
            self.compiler.enqueue_selector_id(name_id);
            self.do_this()?;
            self.accept(value)?;
            self.emitter.invoke_setter(name_id);
            Ok(())
        } else {
            let name = self.compiler.builder.variable(node).name;
            self.handle_unresolved(name)
        }
    }

    fn load_expression_node(&mut self, node: NodeId) -> Result<()> {
        if let Some(entry) = self.compiler.resolve_entry(node, self.scope) {
            return self.load_scope_entry(entry);
        }

        match self.compiler.builder.node(node).clone() {
            Node::Identifier { .. } => {
                let name_id = self.compiler.builder.identifier_id(node);
                let member = self.super_lookup(name_id, node, false)?;
                if let Some(member) = member {
                    if matches!(
                        self.compiler.builder.node(member),
                        Node::VariableDeclaration(_)
                    ) {
                        return self.load_variable_declaration(member);
                    }
                }
                if !self.compiler.is_static_context() {
                    self.do_this()?;
                    self.compiler.enqueue_selector_id(name_id);
                    self.emitter.invoke_getter(name_id);
                    Ok(())
                } else {
                    self.handle_unresolved(node)
                }
            }
            Node::Dot { object, name } => {
                if matches!(self.compiler.builder.node(object), Node::Super) {
                    let name_id = self.compiler.builder.identifier_id(name);
                    let member = self.super_lookup(name_id, name, true)?.unwrap();
                    let index = self.compiler.builder.variable(member).index;
                    self.do_this()?;
                    let method_id = self.compiler.get_field_getter(index as usize);
                    self.emitter.invoke_static(1, method_id);
                    return Ok(());
                }
                self.accept(object)?;
                let name_id = self.compiler.builder.identifier_id(name);
                self.compiler.enqueue_selector_id(name_id);
                self.emitter.invoke_getter(name_id);
                Ok(())
            }
            Node::IndexExpr { target, key } => {
                if matches!(self.compiler.builder.node(target), Node::Super) {
                    let name_id = Name::Index.id() as i32;
                    let name = self.compiler.builder.new_node(Node::Identifier {
                        id: name_id,
                        location: Location::invalid(),
                    });
                    let member = self.super_lookup(name_id, name, true)?.unwrap();
                    return self.invoke_static_node(member, &[key], &[]);
                }
                self.accept(target)?;
                self.accept(key)?;
                let name = Name::Index.id() as i32;
                self.compiler.enqueue_invoke_selector(name, 1, &[]);
                self.emitter.invoke_method(name, 1);
                Ok(())
            }
            Node::Parenthesized { expression, .. } => self.load_expression_node(expression),
            other => Err(self.compiler.error(
                ErrorKind::Compile,
                Location::invalid(),
                format!("Cannot load value of expression: {other:?}"),
            )),
        }
    }

    fn load_scope_entry(&mut self, entry: ScopeEntry) -> Result<()> {
        match entry {
            ScopeEntry::Formal { index } => {
                self.emitter.load_parameter(index as usize);
                Ok(())
            }
            ScopeEntry::Member(member) => {
                let member = self.compiler.scopes.member(member).clone();
                if let Some(node) = member.member {
                    match self.compiler.builder.node(node).clone() {
                        Node::VariableDeclaration(_) => {
                            return self.load_variable_declaration(node);
                        }
                        Node::Method(method) => {
                            if method.modifiers.is_get() {
                                let instance_getter =
                                    matches!(method.owner, Some(Owner::Class(_)))
                                        && !method.modifiers.is_static();
                                if instance_getter {
                                    let name_id =
                                        self.compiler.builder.identifier_id(method.name);
                                    self.do_this()?;
                                    self.compiler.enqueue_selector_id(name_id);
                                    self.emitter.invoke_getter(name_id);
                                } else {
                                    self.invoke_static_node(node, &[], &[])?;
                                }
                            } else if !self.compiler.is_static_context()
                                || matches!(method.owner, Some(Owner::Library(_)))
                                || method.modifiers.is_static()
                            {
                                self.load_method_value(node)?;
                            } else {
                                let name = self.compiler.builder.method(node).name;
                                return self.handle_unresolved(name);
                            }
                            return Ok(());
                        }
                        Node::Class(class) => {
                            // Loading a class yields its const type
                            // marker object.
                            self.compiler.enqueue_core_class("_Type")?;
                            let class_name_id =
                                self.compiler.builder.identifier_id(class.name);
                            let value = self
                                .compiler
                                .builder
                                .lookup_identifier(class_name_id)
                                .to_string();
                            let name_node = self
                                .compiler
                                .builder
                                .new_node(Node::LiteralString(value));
                            let type_name = self.compiler.builder.canonicalize("_Type");
                            let invoke = self.compiler.builder.new_node(Node::Invoke {
                                target: type_name,
                                arguments: vec![name_node],
                                named_arguments: Vec::new(),
                            });
                            let new_node = self.compiler.builder.new_node(Node::New {
                                is_const: true,
                                invoke,
                            });
                            return self.load_const_node(new_node, Some(self.scope));
                        }
                        _ => {}
                    }
                }
                let name = self.compiler.builder.new_node(Node::Identifier {
                    id: member.name,
                    location: Location::invalid(),
                });
                self.handle_unresolved(name)
            }
            ScopeEntry::Decl(decl) => {
                let index = self.compiler.scopes.decl(decl).index;
                if index >= 0 {
                    if self.compiler.scopes.decl(decl).capture == CaptureKind::ByReference {
                        self.emitter.load_boxed(index);
                    } else {
                        self.emitter.load_local(index);
                    }
                    Ok(())
                } else {
                    // A const local resolves through its declaration.
                    let node = self.compiler.scopes.decl(decl).node;
                    self.load_variable_declaration(node)
                }
            }
            ScopeEntry::Library { name, .. } => {
                let name = self.compiler.builder.new_node(Node::Identifier {
                    id: name,
                    location: Location::invalid(),
                });
                self.handle_unresolved(name)
            }
        }
    }

    fn load_variable_declaration(&mut self, node: NodeId) -> Result<()> {
        let data = self.compiler.builder.variable(node);
        if data.modifiers.is_const() {
            let scope = self.compiler.variable_owner_scope(node, self.scope);
            let value = data.value.expect("const without initializer");
            return self.load_const_node(value, Some(scope));
        }
        let id = self.compiler.enqueue_variable(node)?;
        if id >= 0 {
            if data.has_initializer() {
                self.emitter.load_static_init(id);
            } else {
                self.emitter.load_static(id);
            }
            Ok(())
        } else if !self.compiler.is_static_context() {
            let name_id = self.compiler.builder.identifier_id(data.name);
            self.do_this()?;
            self.emitter.invoke_getter(name_id);
            Ok(())
        } else {
            self.handle_unresolved(data.name)
        }
    }

    // ------------------------------------------------------------------
    // Invocation helpers.

    pub(crate) fn invoke_static_node(
        &mut self,
        node: NodeId,
        arguments: &[NodeId],
        named_arguments: &[NodeId],
    ) -> Result<()> {
        let data = self.compiler.builder.method(node);
        let with_this = matches!(data.owner, Some(Owner::Class(_))) && !data.modifiers.is_static();
        if with_this {
            if self.compiler.is_static_context() {
                return Err(self.compiler.error(
                    ErrorKind::Compile,
                    self.compiler.builder.identifier_location(data.name),
                    "Instance call in static context",
                ));
            }
            self.do_this()?;
        }

        if data.modifiers.is_external() {
            let name_id = self.compiler.builder.identifier_id(data.name);
            if name_id == Name::CoroutineChange.id() as i32 {
                debug_assert!(named_arguments.is_empty());
                debug_assert_eq!(arguments.len(), 2);
                self.load_positional_arguments(arguments, &data.parameters)?;
                self.emitter.coroutine_change();
                return Ok(());
            }
            if name_id == Name::Identical.id() as i32 {
                debug_assert!(named_arguments.is_empty());
                debug_assert_eq!(arguments.len(), 2);
                self.load_positional_arguments(arguments, &data.parameters)?;
                self.emitter.identical();
                return Ok(());
            }
        }

        let id = self.compiler.enqueue_method(node);
        if !named_arguments.is_empty() {
            let stub_id = self.load_named_arguments(node, arguments, named_arguments)?;
            if stub_id >= 0 {
                let mut argument_count = arguments.len();
                if with_this {
                    argument_count += 1;
                }
                self.emitter.invoke_static(argument_count, stub_id);
                return Ok(());
            }
        } else if self.load_positional_arguments(arguments, &data.parameters)? {
            let mut argument_count = data.parameters.len();
            if with_this {
                argument_count += 1;
            }
            self.emitter.invoke_static(argument_count, id);
            return Ok(());
        }
        self.handle_unresolved(data.name)
    }

    fn invoke_method_node(
        &mut self,
        object: NodeId,
        name: NodeId,
        arguments: &[NodeId],
        named_arguments: &[NodeId],
    ) -> Result<()> {
        self.accept(object)?;
        self.load_arguments(arguments)?;
        let name_id = self.compiler.builder.identifier_id(name);
        self.compiler
            .enqueue_invoke_selector(name_id, arguments.len(), named_arguments);
        let combined = self.compiler.named_argument_id(name_id, named_arguments);
        self.emitter.invoke_method(combined, arguments.len());
        Ok(())
    }

    pub(crate) fn invoke_operator(&mut self, token: TokenKind, argument_count: usize) -> Result<()> {
        let name = self.compiler.builder.canonical_id(token.syntax());
        self.compiler
            .enqueue_invoke_selector(name, argument_count, &[]);
        self.emitter.invoke_method(name, argument_count);
        Ok(())
    }

    fn invoke_constructor(
        &mut self,
        class_node: NodeId,
        constructor: NodeId,
        arguments: &[NodeId],
        named_arguments: &[NodeId],
    ) -> Result<()> {
        let id = self.compiler.enqueue_constructor(class_node, constructor)?;
        let parameters = self.compiler.builder.method(constructor).parameters;
        if !named_arguments.is_empty() {
            let target = self.compiler.get_method(id);
            let stub_id = self.load_named_arguments(target, arguments, named_arguments)?;
            if stub_id >= 0 {
                self.emitter.invoke_factory(arguments.len(), stub_id);
                return Ok(());
            }
        } else if self.load_positional_arguments(arguments, &parameters)? {
            self.emitter.invoke_factory(parameters.len(), id);
            return Ok(());
        }
        let name = self.compiler.builder.method(constructor).name;
        let name = self.identifier_of(name);
        self.handle_unresolved(name)
    }

    /// An unresolved name: compile a call to the `_unresolved` helper
    /// with the name as its argument.
    pub(crate) fn handle_unresolved(&mut self, name: NodeId) -> Result<()> {
        let helper_id = self.compiler.get_unresolved_helper()?;
        self.load_name(name)?;
        self.emitter.invoke_static(1, helper_id);
        Ok(())
    }

    /// Load positional arguments, filling omitted optionals with their
    /// defaults. False when the shape cannot match.
    fn load_positional_arguments(
        &mut self,
        arguments: &[NodeId],
        parameters: &[NodeId],
    ) -> Result<bool> {
        let mut pos_index = 0;
        for parameter in parameters {
            let var = self.compiler.builder.variable(*parameter);
            if var.modifiers.is_named() {
                match var.value {
                    Some(value) => self.load_const_node(value, Some(self.scope))?,
                    None => self.load_null()?,
                }
                continue;
            }
            if pos_index < arguments.len() {
                self.accept(arguments[pos_index])?;
                pos_index += 1;
                continue;
            }
            if var.modifiers.is_positional() && pos_index >= arguments.len() {
                match var.value {
                    Some(value) => self.load_const_node(value, Some(self.scope))?,
                    None => self.load_null()?,
                }
                continue;
            }
            return Ok(false);
        }
        Ok(arguments.len() == pos_index)
    }

    /// Load arguments for a named-argument call; returns the stub id, or
    /// −1 when the shape is invalid.
    fn load_named_arguments(
        &mut self,
        method: NodeId,
        arguments: &[NodeId],
        named_arguments: &[NodeId],
    ) -> Result<i32> {
        let name = self.compiler.builder.method(method).name;
        let name_id = self.compiler.builder.identifier_id(name);
        let stub_name = self.compiler.named_argument_id(name_id, named_arguments);
        let stub_id = self.compiler.get_named_static_method_stub(
            method,
            stub_name,
            arguments.len(),
            named_arguments,
            self.scope,
        )?;
        if stub_id < 0 {
            return Ok(-1);
        }
        self.load_arguments(arguments)?;
        Ok(stub_id)
    }

    fn load_arguments(&mut self, arguments: &[NodeId]) -> Result<()> {
        for argument in arguments {
            self.accept(*argument)?;
        }
        Ok(())
    }

    /// Look up a name along the superclass chain of the current method's
    /// class.
    fn super_lookup(&mut self, name_id: i32, name: NodeId, report: bool) -> Result<Option<NodeId>> {
        let method = self
            .compiler
            .current_method()
            .expect("super access outside method");
        let owner = self.compiler.builder.method(method).owner;
        let Some(Owner::Class(class_node)) = owner else {
            if !report {
                return Ok(None);
            }
            return Err(self.compiler.error(
                ErrorKind::Compile,
                self.compiler.builder.identifier_location(name),
                "Super access in non-class context",
            ));
        };
        match self.compiler.resolve_super_member(class_node, name_id) {
            Some(member) => Ok(Some(member)),
            None => {
                if !report {
                    return Ok(None);
                }
                Err(self.compiler.error(
                    ErrorKind::Compile,
                    self.compiler.builder.identifier_location(name),
                    "Super member not found",
                ))
            }
        }
    }

    fn load_name(&mut self, name: NodeId) -> Result<()> {
        let name_id = self.compiler.builder.identifier_id(name);
        let value = self.compiler.builder.lookup_identifier(name_id).to_string();
        let node = self.compiler.builder.new_node(Node::LiteralString(value));
        self.load_const_node(node, None)
    }

    pub fn load_const_node(&mut self, node: NodeId, scope: Option<ScopeId>) -> Result<()> {
        let id = self.compiler.const_interpret(node, scope)?;
        self.emitter.load_const(id);
        Ok(())
    }

    /// Prologue of a lazy static initializer: throw on reentry, then
    /// store the cycle marker.
    pub(crate) fn create_static_initializer_cycle_check(&mut self, index: i32) -> Result<()> {
        let marker_class = self.compiler.enqueue_core_class("_CyclicInitializationMarker")?;
        let marker_id = self.compiler.const_pool_instance_of(marker_class)?;
        self.emitter.load_const(marker_id);

        self.emitter.dup();
        self.emitter.load_static(index);
        self.invoke_operator(TokenKind::Eq, 1)?;
        let if_false = self.new_label();
        self.branch_if_false(if_false);
        let error_class = self.compiler.enqueue_core_class("CyclicInitializationError")?;
        let error_class_id = self.compiler.builder.class(error_class).id;
        self.emitter.allocate(error_class_id, 0);
        self.emitter.throw();
        self.emitter.pop();

        self.bind(if_false);
        self.emitter.store_static(index);
        self.emitter.pop();
        Ok(())
    }
}
