//! The parser
//!
//! Predictive recursive descent with one token of lookahead. Anything
//! that needs to look further uses a snapshot of the stream position that
//! is always restored, or one of the O(1) skips over bracketed regions
//! that the scanner's distance payloads make possible.
//!
//! The parser builds nothing itself; every reduction is a builder call.

use crate::builder::Builder;
use crate::error::{CompileError, ErrorKind, Result};
use crate::scanner::TokenStream;
use crate::tokens::{
    ASSIGNMENT_PRECEDENCE, CONDITIONAL_PRECEDENCE, EQUALITY_PRECEDENCE, POSTFIX_PRECEDENCE,
    RELATIONAL_PRECEDENCE, TokenKind,
};
use crate::ast::Modifiers;

pub struct Parser<'a, 'z> {
    builder: &'a mut Builder<'z>,
    stream: TokenStream,
    peek: TokenKind,
}

impl<'a, 'z> Parser<'a, 'z> {
    pub fn new(builder: &'a mut Builder<'z>, tokens: Vec<crate::tokens::TokenInfo>) -> Parser<'a, 'z> {
        let stream = TokenStream::new(tokens);
        let peek = stream.current();
        Parser {
            builder,
            stream,
            peek,
        }
    }

    fn refresh_peek(&mut self) {
        self.peek = self.stream.current();
    }

    fn advance(&mut self) {
        self.stream.advance();
        self.refresh_peek();
    }

    fn expect(&mut self, token: TokenKind) -> Result<()> {
        if self.peek != token {
            return Err(self.error(format!(
                "Expected '{}' but found '{}'.",
                token.syntax(),
                self.peek.syntax()
            )));
        }
        self.advance();
        Ok(())
    }

    fn optional(&mut self, token: TokenKind) -> bool {
        if self.peek != token {
            return false;
        }
        self.advance();
        true
    }

    fn error(&self, message: impl Into<String>) -> CompileError {
        CompileError::new(ErrorKind::Parse, self.stream.current_location(), message)
    }

    /// Run `action` on a stream snapshot, then restore the position.
    fn lookahead<T>(&mut self, action: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let saved = self.stream.position();
        let result = action(self);
        self.stream.rewind_to(saved);
        self.refresh_peek();
        result
    }

    // ------------------------------------------------------------------
    // Top level.

    pub fn parse_compilation_unit(&mut self) -> Result<()> {
        if self.optional(TokenKind::Library) {
            self.skip_fully_qualified()?;
            self.expect(TokenKind::Semicolon)?;
        }
        let mut count = 0;
        while self.peek != TokenKind::Eof {
            self.parse_toplevel_declaration()?;
            count += 1;
        }
        self.builder.do_compilation_unit(count);
        Ok(())
    }

    fn parse_toplevel_declaration(&mut self) -> Result<()> {
        while self.peek == TokenKind::At {
            self.skip_metadata()?;
        }
        match self.peek {
            TokenKind::Class | TokenKind::Abstract => self.parse_class(),
            TokenKind::Import => self.parse_import(),
            TokenKind::Export => self.parse_export(),
            TokenKind::Part => self.parse_part(),
            TokenKind::Typedef => self.parse_typedef(),
            _ => self.parse_member(),
        }
    }

    fn parse_import(&mut self) -> Result<()> {
        self.expect(TokenKind::Import)?;
        self.parse_string_no_interpolation()?;
        let has_prefix = self.optional(TokenKind::As);
        if has_prefix {
            self.parse_identifier()?;
        }
        self.parse_combinators()?;
        self.expect(TokenKind::Semicolon)?;
        self.builder.do_import(has_prefix);
        Ok(())
    }

    fn parse_export(&mut self) -> Result<()> {
        self.expect(TokenKind::Export)?;
        self.parse_string_no_interpolation()?;
        self.parse_combinators()?;
        self.expect(TokenKind::Semicolon)?;
        self.builder.do_export();
        Ok(())
    }

    fn parse_combinators(&mut self) -> Result<usize> {
        let mut combinator_count = 0;
        while self.peek == TokenKind::Show || self.peek == TokenKind::Hide {
            let token = self.peek;
            self.advance();
            let mut count = 0;
            loop {
                self.parse_identifier()?;
                count += 1;
                if !self.optional(TokenKind::Comma) {
                    break;
                }
            }
            self.builder.do_combinator(token, count);
            combinator_count += 1;
        }
        Ok(combinator_count)
    }

    fn parse_part(&mut self) -> Result<()> {
        self.expect(TokenKind::Part)?;
        if self.optional(TokenKind::Of) {
            self.parse_fully_qualified()?;
            self.expect(TokenKind::Semicolon)?;
            self.builder.do_part_of();
            return Ok(());
        }
        self.parse_string_no_interpolation()?;
        self.expect(TokenKind::Semicolon)?;
        self.builder.do_part();
        Ok(())
    }

    fn parse_class(&mut self) -> Result<()> {
        let is_abstract = self.optional(TokenKind::Abstract);
        self.expect(TokenKind::Class)?;
        if self.peek != TokenKind::Identifier {
            return Err(self.error("Class name must be an identifier"));
        }
        self.parse_identifier()?;
        self.skip_optional_type_annotation()?;
        let mut has_extends = false;
        let mut mixins_count = 0;
        let implements_count;
        let mut member_count = 0;
        if self.optional(TokenKind::Assign) {
            has_extends = true;
            mixins_count = self.parse_extends(true)?;
            implements_count = self.parse_implements()?;
            self.expect(TokenKind::Semicolon)?;
        } else {
            if self.optional(TokenKind::Extends) {
                has_extends = true;
                mixins_count = self.parse_extends(false)?;
            }
            implements_count = self.parse_implements()?;
            self.expect(TokenKind::LBrace)?;
            while !self.optional(TokenKind::RBrace) {
                self.parse_member()?;
                member_count += 1;
            }
        }
        self.builder.do_class(
            is_abstract,
            has_extends,
            mixins_count,
            implements_count,
            member_count,
        );
        Ok(())
    }

    fn parse_extends(&mut self, require_with: bool) -> Result<usize> {
        self.parse_qualified()?;
        self.skip_optional_type_annotation()?;
        let mut mixins_count = 0;
        if require_with || self.peek == TokenKind::With {
            self.expect(TokenKind::With)?;
            loop {
                self.parse_qualified()?;
                self.skip_optional_type_annotation()?;
                mixins_count += 1;
                if !self.optional(TokenKind::Comma) {
                    break;
                }
            }
        }
        Ok(mixins_count)
    }

    fn parse_implements(&mut self) -> Result<usize> {
        let mut implements_count = 0;
        if self.optional(TokenKind::Implements) {
            loop {
                self.parse_qualified()?;
                self.skip_optional_type_annotation()?;
                implements_count += 1;
                if !self.optional(TokenKind::Comma) {
                    break;
                }
            }
        }
        Ok(implements_count)
    }

    fn parse_typedef(&mut self) -> Result<()> {
        if self.peek_is_member_start()? {
            return self.parse_member();
        }
        self.expect(TokenKind::Typedef)?;
        self.skip_optional_type()?;
        self.parse_identifier()?;
        self.skip_optional_type_annotation()?;
        let parameter_count = self.parse_formal_parameters()?;
        self.expect(TokenKind::Semicolon)?;
        self.builder.do_typedef(parameter_count);
        Ok(())
    }

    fn parse_member(&mut self) -> Result<()> {
        while self.peek == TokenKind::At {
            self.skip_metadata()?;
        }

        let mut modifiers = Modifiers::default();
        if !self.peek_is_member_start()? && self.optional(TokenKind::External) {
            modifiers |= Modifiers::EXTERNAL;
        }
        while !self.peek_is_member_start()? {
            if self.optional(TokenKind::Static) {
                modifiers |= Modifiers::STATIC;
            } else if self.optional(TokenKind::Final) {
                modifiers |= Modifiers::FINAL;
            } else if self.optional(TokenKind::Const) {
                modifiers |= Modifiers::CONST;
            } else if self.optional(TokenKind::Factory) {
                modifiers |= Modifiers::FACTORY;
            } else {
                break;
            }
        }

        self.skip_optional_type()?;

        if self.peek == TokenKind::Operator && !self.peek_is_member_start()? {
            self.parse_operator(modifiers)
        } else if self.peek_is_getter()? {
            self.advance();
            modifiers |= Modifiers::GET;
            self.parse_identifier()?;
            let modifiers = self.parse_method_body(modifiers)?;
            self.builder.do_method(modifiers, 0, 0);
            Ok(())
        } else if self.peek_is_setter()? {
            self.advance();
            modifiers |= Modifiers::SET;
            self.parse_identifier()?;
            self.expect(TokenKind::LParen)?;
            self.parse_formal_parameter(TokenKind::Eof)?;
            self.expect(TokenKind::RParen)?;
            let modifiers = self.parse_method_body(modifiers)?;
            self.builder.do_method(modifiers, 1, 0);
            Ok(())
        } else if modifiers.is_factory()
            && self.peek_after_formal_parameters()? == TokenKind::Assign
        {
            // Redirecting factory constructor.
            self.parse_qualified()?;
            let count = self.parse_formal_parameters()?;
            self.expect(TokenKind::Assign)?;
            self.parse_fully_qualified()?;
            self.expect(TokenKind::Semicolon)?;
            self.builder.do_return(true);
            self.builder.do_method(modifiers, count, 0);
            Ok(())
        } else {
            if self.peek == TokenKind::Var {
                self.advance();
                return self.parse_variable_declaration_statement_rest(modifiers, false);
            }
            if self.peek.is_identifier() {
                if self.peek_after_identifier()? == TokenKind::Period {
                    self.parse_qualified()?;
                    self.parse_method(modifiers)
                } else {
                    self.parse_identifier()?;
                    if self.peek == TokenKind::LParen {
                        self.parse_method(modifiers)
                    } else {
                        self.parse_variable_declaration_statement_rest(modifiers, true)
                    }
                }
            } else {
                Err(self.error(format!("Bad declaration name '{}'.", self.peek.syntax())))
            }
        }
    }

    fn parse_method(&mut self, modifiers: Modifiers) -> Result<()> {
        let parameter_count = self.parse_formal_parameters()?;
        let mut initializer_count = 0;
        if self.peek == TokenKind::Colon {
            initializer_count = self.parse_initializers()?;
        }
        let modifiers = self.parse_method_body(modifiers)?;
        self.builder
            .do_method(modifiers, parameter_count, initializer_count);
        Ok(())
    }

    fn parse_operator(&mut self, modifiers: Modifiers) -> Result<()> {
        self.expect(TokenKind::Operator)?;
        let token;
        match self.peek {
            TokenKind::BitOr
            | TokenKind::BitXor
            | TokenKind::BitAnd
            | TokenKind::BitNot
            | TokenKind::Index
            | TokenKind::AssignIndex
            | TokenKind::Shl
            | TokenKind::Shr
            | TokenKind::Add
            | TokenKind::Sub
            | TokenKind::Mul
            | TokenKind::Div
            | TokenKind::TruncDiv
            | TokenKind::Mod
            | TokenKind::Eq
            | TokenKind::Lt
            | TokenKind::Gt
            | TokenKind::Lte
            | TokenKind::Gte => {
                token = self.peek;
                self.advance();
            }
            TokenKind::GtStart => {
                self.advance();
                self.expect(TokenKind::Gt)?;
                token = TokenKind::Shr;
            }
            _ => {
                return Err(self.error(format!("Bad operator name '{}'.", self.peek.syntax())));
            }
        }
        let parameter_count = self.parse_formal_parameters()?;
        let modifiers = self.parse_method_body(modifiers)?;
        self.builder.do_operator(token, modifiers, parameter_count);
        Ok(())
    }

    fn parse_method_body(&mut self, mut modifiers: Modifiers) -> Result<Modifiers> {
        if self.optional(TokenKind::Native) {
            // Native bodies come in two forms:
            //   (1)  foo(...) native;
            //   (2)  bar(...) native catch (error) { ... }
            modifiers |= Modifiers::NATIVE;
            if self.optional(TokenKind::Catch) {
                self.expect(TokenKind::LParen)?;
                if !self.peek.is_identifier() {
                    return Err(self.error("Expect identifier in native catch block."));
                }
                let id = self.stream.current_payload();
                if Some(id) != self.builder.compute_canonical_id("error") {
                    return Err(self.error("Identifier in native catch block must be named 'error'."));
                }
                self.advance();
                self.expect(TokenKind::RParen)?;
            } else {
                self.expect(TokenKind::Semicolon)?;
                self.builder.do_empty_statement();
                return Ok(modifiers);
            }
        }

        if self.peek == TokenKind::LBrace {
            self.parse_block()?;
        } else if self.peek == TokenKind::Arrow {
            self.advance();
            self.parse_expression()?;
            self.expect(TokenKind::Semicolon)?;
        } else {
            self.expect(TokenKind::Semicolon)?;
            self.builder.do_empty_statement();
        }
        Ok(modifiers)
    }

    fn parse_formal_parameter(&mut self, token: TokenKind) -> Result<()> {
        let mut modifiers = Modifiers::default();
        if self.peek == TokenKind::Var {
            self.advance();
        } else {
            if self.optional(TokenKind::Final) {
                modifiers |= Modifiers::FINAL;
            }
            self.skip_optional_type()?;
            if self.optional(TokenKind::This) {
                modifiers |= Modifiers::THIS;
                self.expect(TokenKind::Period)?;
            }
        }
        self.parse_identifier()?;
        // Skip function-typed parameter parentheses.
        if self.peek == TokenKind::LParen {
            let delta = self.stream.current_payload();
            debug_assert!(delta > 0);
            self.stream.skip(delta);
            self.refresh_peek();
            self.expect(TokenKind::RParen)?;
        }
        if token == TokenKind::Assign {
            modifiers |= Modifiers::POSITIONAL;
        } else if token == TokenKind::Colon {
            modifiers |= Modifiers::NAMED;
        }
        if token != TokenKind::Eof && self.optional(token) {
            self.parse_expression()?;
            self.builder.do_variable_declaration(modifiers, true);
        } else {
            self.builder.do_variable_declaration(modifiers, false);
        }
        Ok(())
    }

    fn parse_formal_parameters(&mut self) -> Result<usize> {
        let mut count = 0;
        self.expect(TokenKind::LParen)?;
        while !self.optional(TokenKind::RParen) {
            if count != 0 {
                self.expect(TokenKind::Comma)?;
            }
            if self.optional(TokenKind::LBrace) {
                loop {
                    self.parse_formal_parameter(TokenKind::Colon)?;
                    count += 1;
                    if !self.optional(TokenKind::Comma) {
                        break;
                    }
                }
                self.expect(TokenKind::RBrace)?;
            } else if self.optional(TokenKind::LBrack) {
                loop {
                    self.parse_formal_parameter(TokenKind::Assign)?;
                    count += 1;
                    if !self.optional(TokenKind::Comma) {
                        break;
                    }
                }
                self.expect(TokenKind::RBrack)?;
            } else {
                self.parse_formal_parameter(TokenKind::Eof)?;
                count += 1;
            }
        }
        Ok(count)
    }

    fn parse_initializers(&mut self) -> Result<usize> {
        self.expect(TokenKind::Colon)?;
        let mut count = 0;
        loop {
            if self.peek == TokenKind::Super {
                self.parse_expression()?;
            } else {
                if self.optional(TokenKind::This) {
                    self.builder.do_this();
                    if count == 0 && self.peek == TokenKind::LParen {
                        self.parse_invoke_rest()?;
                        return Ok(1);
                    }
                    self.expect(TokenKind::Period)?;
                    self.parse_identifier()?;
                    self.builder.do_dot();
                    if count == 0 && self.peek == TokenKind::LParen {
                        self.parse_invoke_rest()?;
                        return Ok(1);
                    }
                } else {
                    self.parse_identifier()?;
                }
                self.expect(TokenKind::Assign)?;
                self.parse_precedence(CONDITIONAL_PRECEDENCE, false, false)?;
                while self.peek == TokenKind::Cascade {
                    self.parse_cascade_rest()?;
                }
                self.builder.do_assign(TokenKind::Assign);
            }
            count += 1;
            if !self.optional(TokenKind::Comma) {
                break;
            }
        }
        Ok(count)
    }

    // ------------------------------------------------------------------
    // Statements.

    fn parse_block(&mut self) -> Result<()> {
        let mut count = 0;
        self.expect(TokenKind::LBrace)?;
        while self.peek != TokenKind::RBrace && self.peek != TokenKind::Eof {
            self.parse_statement()?;
            count += 1;
        }
        self.expect(TokenKind::RBrace)?;
        self.builder.do_block(count);
        Ok(())
    }

    fn parse_statement(&mut self) -> Result<()> {
        match self.peek {
            TokenKind::LBrace => return self.parse_block(),
            TokenKind::Break => return self.parse_break(),
            TokenKind::Continue => return self.parse_continue(),
            TokenKind::Var | TokenKind::Final => {
                return self.parse_variable_declaration_statement();
            }
            TokenKind::Return => return self.parse_return(),
            TokenKind::If => return self.parse_if(),
            TokenKind::For => return self.parse_for(),
            TokenKind::While => return self.parse_while(),
            TokenKind::Do => return self.parse_do_while(),
            TokenKind::Assert => return self.parse_assert(),
            TokenKind::Switch => return self.parse_switch(),
            TokenKind::Try => return self.parse_try(),
            TokenKind::Const => {
                // A const member start is a declaration, anything else is
                // a const expression.
                let is_member = self.lookahead(|parser| {
                    parser.advance();
                    parser.peek_is_member_start()
                })?;
                if is_member {
                    return self.parse_variable_declaration_statement();
                }
            }
            TokenKind::Semicolon => {
                self.advance();
                self.builder.do_empty_statement();
                return Ok(());
            }
            TokenKind::Rethrow => {
                self.advance();
                self.expect(TokenKind::Semicolon)?;
                self.builder.do_rethrow();
                return Ok(());
            }
            TokenKind::Void => {
                self.skip_optional_type()?;
                self.parse_identifier()?;
                return self.parse_method(Modifiers::default());
            }
            kind if kind.is_identifier() => {
                if self.is_labelled_statement()? {
                    self.parse_identifier()?;
                    self.expect(TokenKind::Colon)?;
                    self.parse_statement()?;
                    self.builder.do_labelled_statement();
                    return Ok(());
                }
                let token = self.peek_after_formal_parameters()?;
                if token == TokenKind::LBrace || token == TokenKind::Arrow {
                    // Local function.
                    self.parse_identifier()?;
                    return self.parse_method(Modifiers::default());
                }
                let token = self.peek_after_type()?;
                if token.is_identifier() {
                    self.skip_optional_type()?;
                    self.parse_identifier()?;
                    if self.peek == TokenKind::LParen {
                        return self.parse_method(Modifiers::default());
                    }
                    return self.parse_variable_declaration_statement_rest(
                        Modifiers::default(),
                        true,
                    );
                }
            }
            _ => {}
        }
        self.parse_expression()?;
        self.expect(TokenKind::Semicolon)?;
        self.builder.do_expression_statement();
        Ok(())
    }

    fn parse_variable_declaration_statement(&mut self) -> Result<()> {
        let mut modifiers = Modifiers::default();
        if self.peek == TokenKind::Var {
            self.advance();
        } else {
            if self.optional(TokenKind::Final) {
                modifiers |= Modifiers::FINAL;
            } else if self.optional(TokenKind::Const) {
                modifiers |= Modifiers::CONST;
            }
            self.skip_optional_type()?;
        }
        self.parse_variable_declaration_statement_rest(modifiers, false)
    }

    fn parse_variable_declaration_statement_rest(
        &mut self,
        modifiers: Modifiers,
        skip_first: bool,
    ) -> Result<()> {
        let mut count = 0;
        loop {
            if count > 0 || !skip_first {
                self.parse_identifier()?;
            }
            let mut has_initializer = false;
            if self.optional(TokenKind::Assign) {
                self.parse_expression()?;
                has_initializer = true;
            }
            count += 1;
            self.builder.do_variable_declaration(modifiers, has_initializer);
            if !self.optional(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::Semicolon)?;
        self.builder.do_variable_declaration_statement(modifiers, count);
        Ok(())
    }

    fn parse_if(&mut self) -> Result<()> {
        self.expect(TokenKind::If)?;
        self.expect(TokenKind::LParen)?;
        self.parse_expression()?;
        self.expect(TokenKind::RParen)?;
        self.parse_statement()?;
        let mut has_else = false;
        if self.optional(TokenKind::Else) {
            has_else = true;
            self.parse_statement()?;
        }
        self.builder.do_if(has_else);
        Ok(())
    }

    fn parse_for(&mut self) -> Result<()> {
        self.expect(TokenKind::For)?;
        self.expect(TokenKind::LParen)?;

        let mut token = self.peek;
        if token == TokenKind::Final
            || token == TokenKind::Var
            || self.peek_after_type()?.is_identifier()
        {
            if token == TokenKind::Final || token == TokenKind::Var {
                self.advance();
            }
            if token != TokenKind::Var {
                self.skip_optional_type()?;
                // Typed declarations behave like `var` unless final.
                if token != TokenKind::Final {
                    token = TokenKind::Var;
                }
            }
            if self.peek.is_identifier() && self.peek_after_identifier()? == TokenKind::In {
                self.parse_identifier()?;
                self.builder
                    .do_variable_declaration(Modifiers::default(), false);
                return self.parse_for_in_rest(token);
            }
            let mut modifiers = Modifiers::BY_VALUE;
            if token == TokenKind::Final {
                modifiers |= Modifiers::FINAL;
            }
            self.parse_variable_declaration_statement_rest(modifiers, false)?;
        } else {
            if self.peek_after_type()? == TokenKind::Identifier {
                self.skip_optional_type()?;
            }
            if self.peek.is_identifier() && self.peek_after_identifier()? == TokenKind::In {
                self.parse_identifier()?;
                self.builder
                    .do_variable_declaration(Modifiers::default(), false);
                return self.parse_for_in_rest(TokenKind::Eof);
            }
            if self.peek != TokenKind::Semicolon {
                self.parse_expression()?;
                self.builder.do_expression_statement();
            } else {
                self.builder.do_empty_statement();
            }
            self.expect(TokenKind::Semicolon)?;
        }
        let mut has_condition = false;
        if self.peek != TokenKind::Semicolon {
            has_condition = true;
            self.parse_expression()?;
        }
        self.expect(TokenKind::Semicolon)?;
        let mut count = 0;
        if self.peek != TokenKind::RParen {
            loop {
                self.parse_expression()?;
                count += 1;
                if !self.optional(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenKind::RParen)?;
        self.parse_statement()?;
        self.builder.do_for(has_condition, count);
        Ok(())
    }

    fn parse_for_in_rest(&mut self, token: TokenKind) -> Result<()> {
        self.expect(TokenKind::In)?;
        self.parse_expression()?;
        self.expect(TokenKind::RParen)?;
        self.parse_statement()?;
        self.builder.do_for_in(token);
        Ok(())
    }

    fn parse_while(&mut self) -> Result<()> {
        self.expect(TokenKind::While)?;
        self.expect(TokenKind::LParen)?;
        self.parse_expression()?;
        self.expect(TokenKind::RParen)?;
        self.parse_statement()?;
        self.builder.do_while();
        Ok(())
    }

    fn parse_do_while(&mut self) -> Result<()> {
        self.expect(TokenKind::Do)?;
        self.parse_statement()?;
        self.expect(TokenKind::While)?;
        self.expect(TokenKind::LParen)?;
        self.parse_expression()?;
        self.expect(TokenKind::RParen)?;
        self.expect(TokenKind::Semicolon)?;
        self.builder.do_do_while();
        Ok(())
    }

    fn parse_break(&mut self) -> Result<()> {
        self.expect(TokenKind::Break)?;
        let mut has_identifier = false;
        if self.peek != TokenKind::Semicolon {
            has_identifier = true;
            self.parse_identifier()?;
        }
        self.expect(TokenKind::Semicolon)?;
        self.builder.do_break(has_identifier);
        Ok(())
    }

    fn parse_continue(&mut self) -> Result<()> {
        self.expect(TokenKind::Continue)?;
        let mut has_identifier = false;
        if self.peek != TokenKind::Semicolon {
            has_identifier = true;
            self.parse_identifier()?;
        }
        self.expect(TokenKind::Semicolon)?;
        self.builder.do_continue(has_identifier);
        Ok(())
    }

    fn parse_return(&mut self) -> Result<()> {
        self.expect(TokenKind::Return)?;
        let mut has_expression = false;
        if self.peek != TokenKind::Semicolon {
            has_expression = true;
            self.parse_expression()?;
        }
        self.expect(TokenKind::Semicolon)?;
        self.builder.do_return(has_expression);
        Ok(())
    }

    fn parse_assert(&mut self) -> Result<()> {
        self.expect(TokenKind::Assert)?;
        self.expect(TokenKind::LParen)?;
        self.parse_expression()?;
        self.expect(TokenKind::RParen)?;
        self.expect(TokenKind::Semicolon)?;
        self.builder.do_assert();
        Ok(())
    }

    fn parse_switch(&mut self) -> Result<()> {
        self.expect(TokenKind::Switch)?;
        self.expect(TokenKind::LParen)?;
        self.parse_expression()?;
        self.expect(TokenKind::RParen)?;
        self.expect(TokenKind::LBrace)?;
        let mut count = 0;
        while self.optional(TokenKind::Case) {
            self.parse_expression()?;
            self.expect(TokenKind::Colon)?;
            let mut statement_count = 0;
            while self.peek != TokenKind::Case
                && self.peek != TokenKind::Default
                && self.peek != TokenKind::RBrace
                && self.peek != TokenKind::Eof
            {
                self.parse_statement()?;
                statement_count += 1;
            }
            self.builder.do_case(statement_count);
            count += 1;
        }
        let mut statement_count = 0;
        if self.optional(TokenKind::Default) {
            self.expect(TokenKind::Colon)?;
            while self.peek != TokenKind::RBrace && self.peek != TokenKind::Eof {
                self.parse_statement()?;
                statement_count += 1;
            }
        }
        self.expect(TokenKind::RBrace)?;
        self.builder.do_switch(count, statement_count);
        Ok(())
    }

    fn parse_try(&mut self) -> Result<()> {
        self.expect(TokenKind::Try)?;
        self.parse_block()?;
        let mut catch_count = 0;
        while self.peek == TokenKind::Catch || self.peek == TokenKind::On {
            let mut has_type = false;
            if self.optional(TokenKind::On) {
                self.parse_qualified()?;
                self.skip_optional_type_annotation()?;
                has_type = true;
            }
            let mut identifiers_count = 0;
            if !has_type || self.peek == TokenKind::Catch {
                self.expect(TokenKind::Catch)?;
                self.expect(TokenKind::LParen)?;
                self.parse_identifier()?;
                self.builder
                    .do_variable_declaration(Modifiers::default(), false);
                identifiers_count += 1;
                if self.optional(TokenKind::Comma) {
                    self.parse_identifier()?;
                    self.builder
                        .do_variable_declaration(Modifiers::default(), false);
                    identifiers_count += 1;
                }
                self.expect(TokenKind::RParen)?;
            }
            self.parse_block()?;
            self.builder.do_catch(has_type, identifiers_count);
            catch_count += 1;
        }
        let mut has_finally = false;
        if catch_count == 0 || self.peek == TokenKind::Finally {
            self.expect(TokenKind::Finally)?;
            self.parse_block()?;
            has_finally = true;
        }
        self.builder.do_try(catch_count, has_finally);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Expressions.

    pub fn parse_expression(&mut self) -> Result<()> {
        if self.peek == TokenKind::Throw {
            self.parse_throw()
        } else {
            self.parse_precedence(ASSIGNMENT_PRECEDENCE, true, true)
        }
    }

    fn parse_expression_without_cascade(&mut self) -> Result<()> {
        if self.peek == TokenKind::Throw {
            self.parse_throw()
        } else {
            self.parse_precedence(ASSIGNMENT_PRECEDENCE, true, false)
        }
    }

    fn parse_throw(&mut self) -> Result<()> {
        self.expect(TokenKind::Throw)?;
        self.parse_expression_without_cascade()?;
        self.builder.do_throw();
        Ok(())
    }

    fn parse_precedence(
        &mut self,
        precedence: i32,
        allow_function: bool,
        allow_cascade: bool,
    ) -> Result<()> {
        self.parse_unary(allow_function)?;
        let mut token = self.peek;
        let mut next = token.precedence();
        let mut level = next;
        while level >= precedence {
            while level == next {
                if token == TokenKind::Cascade {
                    if !allow_cascade {
                        return Ok(());
                    }
                    self.parse_cascade_rest()?;
                } else if level == ASSIGNMENT_PRECEDENCE {
                    // Right associative; recurse at the same level.
                    self.advance();
                    self.parse_precedence(level, allow_function, allow_cascade)?;
                    self.builder.do_assign(token);
                } else if level == POSTFIX_PRECEDENCE {
                    self.parse_postfix_rest()?;
                } else if token == TokenKind::Conditional {
                    self.parse_conditional_rest()?;
                } else if token == TokenKind::Is {
                    self.parse_is_rest()?;
                } else if token == TokenKind::As {
                    self.parse_as_rest()?;
                } else {
                    // A '>' that starts '>>' spans two tokens.
                    if token == TokenKind::GtStart {
                        self.advance();
                        token = TokenKind::Shr;
                    }
                    // Left associative; recurse one level higher.
                    self.advance();
                    self.parse_precedence(level + 1, true, true)?;
                    self.builder.do_binary(token);
                }
                token = self.peek;
                next = token.precedence();
                // Equality and relational operators are not chainable.
                if level == EQUALITY_PRECEDENCE || level == RELATIONAL_PRECEDENCE {
                    break;
                }
            }
            level -= 1;
        }
        Ok(())
    }

    fn parse_cascade_rest(&mut self) -> Result<()> {
        self.expect(TokenKind::Cascade)?;
        let token = self.peek;
        self.builder.do_cascade_receiver(token);
        if token.is_identifier() {
            self.parse_identifier()?;
            self.builder.do_dot();
        } else if token == TokenKind::LBrack {
            self.parse_index_rest()?;
        } else {
            return Err(self.error(format!(
                "Expected identifier or '[' in cascade but found '{}'",
                token.syntax()
            )));
        }
        let mut token = self.peek;
        while token == TokenKind::Period || token == TokenKind::LBrack || token == TokenKind::LParen
        {
            self.parse_postfix_rest()?;
            token = self.peek;
        }
        if token.precedence() == ASSIGNMENT_PRECEDENCE {
            self.advance();
            self.parse_expression_without_cascade()?;
            self.builder.do_assign(token);
        }
        self.builder.do_cascade();
        Ok(())
    }

    fn parse_postfix_rest(&mut self) -> Result<()> {
        let token = self.peek;
        debug_assert_eq!(token.precedence(), POSTFIX_PRECEDENCE);
        if token == TokenKind::LParen {
            self.parse_invoke_rest()
        } else if token == TokenKind::Period {
            self.advance();
            self.parse_identifier()?;
            self.builder.do_dot();
            Ok(())
        } else if token == TokenKind::LBrack {
            self.parse_index_rest()
        } else {
            debug_assert!(token == TokenKind::Increment || token == TokenKind::Decrement);
            self.advance();
            self.builder.do_unary(token, false);
            Ok(())
        }
    }

    fn parse_conditional_rest(&mut self) -> Result<()> {
        self.expect(TokenKind::Conditional)?;
        self.parse_expression_without_cascade()?;
        self.expect(TokenKind::Colon)?;
        self.parse_expression_without_cascade()?;
        self.builder.do_conditional();
        Ok(())
    }

    fn parse_is_rest(&mut self) -> Result<()> {
        self.expect(TokenKind::Is)?;
        let is_not = self.optional(TokenKind::Not);
        self.parse_qualified()?;
        self.skip_optional_type_annotation()?;
        self.builder.do_is(is_not);
        Ok(())
    }

    fn parse_as_rest(&mut self) -> Result<()> {
        self.expect(TokenKind::As)?;
        self.parse_qualified()?;
        self.skip_optional_type_annotation()?;
        self.builder.do_as();
        Ok(())
    }

    fn parse_invoke_rest(&mut self) -> Result<()> {
        if self.peek != TokenKind::LParen {
            return Err(self.error("Expected '('"));
        }
        let mut count = 0;
        let mut named_count = 0;
        self.expect(TokenKind::LParen)?;
        while !self.optional(TokenKind::RParen) {
            if self.peek_is_named_argument()? {
                while !self.optional(TokenKind::RParen) {
                    if count != 0 {
                        self.expect(TokenKind::Comma)?;
                    }
                    self.parse_identifier()?;
                    self.expect(TokenKind::Colon)?;
                    self.parse_expression()?;
                    count += 1;
                    named_count += 1;
                }
                break;
            }
            if count != 0 {
                self.expect(TokenKind::Comma)?;
            }
            self.parse_expression()?;
            count += 1;
        }
        self.builder.do_invoke(count, named_count);
        Ok(())
    }

    fn parse_index_rest(&mut self) -> Result<()> {
        debug_assert_eq!(self.peek, TokenKind::LBrack);
        self.advance();
        self.parse_expression()?;
        self.expect(TokenKind::RBrack)?;
        self.builder.do_index();
        Ok(())
    }

    fn parse_unary(&mut self, allow_function: bool) -> Result<()> {
        let token = self.peek;
        match token {
            TokenKind::Not
            | TokenKind::Sub
            | TokenKind::BitNot
            | TokenKind::Increment
            | TokenKind::Decrement => {
                // Right associative; recurse at the postfix level.
                self.advance();
                self.parse_precedence(POSTFIX_PRECEDENCE, true, true)?;
                self.builder.do_unary(token, true);
                Ok(())
            }
            _ => self.parse_primary(allow_function),
        }
    }

    fn parse_primary(&mut self, allow_function: bool) -> Result<()> {
        match self.peek {
            kind if kind.is_identifier() => self.parse_identifier(),
            TokenKind::Lt => {
                self.skip_optional_type_annotation()?;
                if self.peek == TokenKind::LBrace {
                    self.parse_map(false)
                } else {
                    self.parse_list(false)
                }
            }
            TokenKind::LBrace => self.parse_map(false),
            TokenKind::Index | TokenKind::LBrack => self.parse_list(false),
            TokenKind::False | TokenKind::True => {
                self.builder.do_boolean(self.peek == TokenKind::True);
                self.advance();
                Ok(())
            }
            TokenKind::Null => {
                self.builder.do_null();
                self.advance();
                Ok(())
            }
            TokenKind::This => {
                self.builder.do_this();
                self.advance();
                Ok(())
            }
            TokenKind::Super => {
                self.builder.do_super();
                self.advance();
                Ok(())
            }
            TokenKind::LParen => {
                if allow_function && self.is_function_expression()? {
                    self.parse_function_expression()
                } else {
                    let location = self.stream.current_location();
                    self.advance();
                    self.parse_expression()?;
                    self.expect(TokenKind::RParen)?;
                    self.builder.do_parenthesized(location);
                    Ok(())
                }
            }
            TokenKind::New => self.parse_new(false),
            TokenKind::Const => self.parse_new(true),
            TokenKind::Integer => {
                self.builder.do_reference(self.stream.current_payload());
                self.advance();
                Ok(())
            }
            TokenKind::Double => {
                self.builder.do_reference(self.stream.current_payload());
                self.advance();
                Ok(())
            }
            TokenKind::StringLiteral | TokenKind::StringInterpolation => self.parse_string(),
            TokenKind::Hash => self.parse_symbol_literal(),
            _ => Err(self.error(format!("Bad expression '{}'.", self.peek.syntax()))),
        }
    }

    fn parse_new(&mut self, is_const: bool) -> Result<()> {
        self.advance();

        if is_const {
            if self.peek == TokenKind::Lt {
                self.skip_optional_type_annotation()?;
            }
            if self.peek == TokenKind::LBrack || self.peek == TokenKind::Index {
                return self.parse_list(true);
            } else if self.peek == TokenKind::LBrace {
                return self.parse_map(true);
            }
        }

        self.parse_fully_qualified()?;
        self.parse_invoke_rest()?;
        self.builder.do_new(is_const);
        Ok(())
    }

    fn parse_function_expression(&mut self) -> Result<()> {
        let count = self.parse_formal_parameters()?;
        if self.peek == TokenKind::LBrace {
            self.parse_block()?;
        } else {
            self.expect(TokenKind::Arrow)?;
            self.parse_expression()?;
        }
        self.builder.do_function_expression(count);
        Ok(())
    }

    fn parse_identifier(&mut self) -> Result<()> {
        if !self.peek.is_identifier() {
            return Err(self.error(format!(
                "Expected identifier but found '{}'.",
                self.peek.syntax()
            )));
        }
        if self.peek == TokenKind::Identifier {
            self.builder.do_identifier(
                self.stream.current_payload(),
                self.stream.current_location(),
            );
        } else {
            self.builder.do_builtin(self.peek);
        }
        self.advance();
        Ok(())
    }

    fn parse_qualified(&mut self) -> Result<()> {
        self.parse_identifier()?;
        if self.optional(TokenKind::Period) {
            self.parse_identifier()?;
            self.builder.do_dot();
        }
        Ok(())
    }

    fn parse_fully_qualified(&mut self) -> Result<()> {
        self.parse_identifier()?;
        self.skip_optional_type_annotation()?;
        while self.optional(TokenKind::Period) {
            self.parse_identifier()?;
            self.skip_optional_type_annotation()?;
            self.builder.do_dot();
        }
        Ok(())
    }

    fn parse_list(&mut self, is_const: bool) -> Result<()> {
        if self.peek == TokenKind::Index {
            self.advance();
            self.builder.do_list(is_const, 0);
            return Ok(());
        }
        debug_assert_eq!(self.peek, TokenKind::LBrack);
        self.advance();
        let mut count = 0;
        loop {
            if self.peek == TokenKind::RBrack {
                break;
            }
            self.parse_expression()?;
            count += 1;
            if !self.optional(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RBrack)?;
        self.builder.do_list(is_const, count);
        Ok(())
    }

    fn parse_map(&mut self, is_const: bool) -> Result<()> {
        debug_assert_eq!(self.peek, TokenKind::LBrace);
        self.advance();
        let mut count = 0;
        loop {
            if self.peek == TokenKind::RBrace {
                break;
            }
            self.parse_expression()?;
            self.expect(TokenKind::Colon)?;
            self.parse_expression()?;
            count += 1;
            if !self.optional(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RBrace)?;
        self.builder.do_map(is_const, count);
        Ok(())
    }

    fn parse_string_no_interpolation(&mut self) -> Result<()> {
        debug_assert_eq!(self.peek, TokenKind::StringLiteral);
        let mut count = 0;
        while self.peek == TokenKind::StringLiteral {
            self.builder
                .do_string_reference(self.stream.current_payload());
            self.advance();
            count += 1;
        }
        self.builder.do_string(count);
        Ok(())
    }

    fn parse_string(&mut self) -> Result<()> {
        debug_assert!(
            self.peek == TokenKind::StringInterpolation || self.peek == TokenKind::StringLiteral
        );
        let mut string_count = 0;
        let mut count = 0;
        loop {
            if self.peek == TokenKind::StringLiteral {
                self.parse_string_no_interpolation()?;
                string_count += 1;
                continue;
            }
            if self.peek == TokenKind::StringInterpolation {
                string_count += 1;
                self.builder
                    .do_string_reference(self.stream.current_payload());
                self.advance();
                self.builder.do_string(string_count);
                string_count = 0;
                self.parse_expression()?;
                count += 1;
                continue;
            }
            if count > 0 && self.peek == TokenKind::StringInterpolationEnd {
                self.builder
                    .do_string_reference(self.stream.current_payload());
                self.advance();
                self.builder.do_string(1);
                string_count += 1;
                continue;
            }
            break;
        }
        self.builder.do_string(string_count);
        if count > 0 {
            self.builder.do_string_interpolation(count);
        }
        Ok(())
    }

    fn parse_symbol_literal(&mut self) -> Result<()> {
        self.expect(TokenKind::Hash)?;
        let symbol_class = self.builder.canonicalize("Symbol");
        self.builder.push(symbol_class);
        let mut count = 0;
        while self.peek.is_identifier() {
            let value = if self.peek == TokenKind::Identifier {
                let id = self.stream.current_payload();
                self.builder.lookup_identifier(id).to_string()
            } else {
                self.peek.syntax().to_string()
            };
            let id = self.builder.register_string(&value);
            self.builder.do_string_reference(id);
            self.advance();
            count += 1;
            if !self.optional(TokenKind::Period) {
                break;
            }
            let id = self.builder.register_string(".");
            self.builder.do_string_reference(id);
            count += 1;
        }
        self.builder.do_string(count);
        self.builder.do_invoke(1, 0);
        self.builder.do_new(true);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Type skipping.

    fn skip_optional_type(&mut self) -> Result<()> {
        if self.peek == TokenKind::Void {
            self.advance();
        } else {
            // It's a type if it's followed by an identifier, this, or
            // operator.
            let next = self.peek_after_type()?;
            if next == TokenKind::This || next == TokenKind::Operator || next.is_identifier() {
                self.skip_type()?;
            }
        }
        Ok(())
    }

    fn skip_type(&mut self) -> Result<()> {
        if self.optional(TokenKind::Void) || self.optional(TokenKind::Dynamic) {
            return Ok(());
        }
        self.skip_qualified()?;
        if self.optional(TokenKind::Lt) {
            loop {
                self.skip_type()?;
                if !self.optional(TokenKind::Comma) {
                    break;
                }
            }
            if !self.optional(TokenKind::GtStart) {
                self.expect(TokenKind::Gt)?;
            }
        }
        Ok(())
    }

    fn skip_qualified(&mut self) -> Result<()> {
        self.skip_identifier()?;
        if self.optional(TokenKind::Period) {
            self.skip_identifier()?;
        }
        Ok(())
    }

    fn skip_fully_qualified(&mut self) -> Result<()> {
        loop {
            self.skip_identifier()?;
            if !self.optional(TokenKind::Period) {
                return Ok(());
            }
        }
    }

    fn skip_identifier(&mut self) -> Result<()> {
        if self.peek.is_identifier() {
            self.advance();
            Ok(())
        } else {
            Err(self.error(format!(
                "Expected identifier but found '{}'.",
                self.peek.syntax()
            )))
        }
    }

    fn skip_optional_type_annotation(&mut self) -> Result<()> {
        if self.peek == TokenKind::Lt {
            let delta = self.stream.current_payload();
            debug_assert!(delta > 0);
            self.stream.skip(delta);
            self.refresh_peek();
            self.expect(TokenKind::Gt)?;
        }
        Ok(())
    }

    fn skip_metadata(&mut self) -> Result<()> {
        self.expect(TokenKind::At)?;
        self.skip_fully_qualified()?;
        if self.peek == TokenKind::LParen {
            self.skip_formal_parameters()?;
        }
        Ok(())
    }

    fn skip_formal_parameters(&mut self) -> Result<()> {
        debug_assert_eq!(self.peek, TokenKind::LParen);
        let delta = self.stream.current_payload();
        self.stream.skip(delta);
        self.refresh_peek();
        debug_assert_eq!(self.peek, TokenKind::RParen);
        self.advance();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Peeking.

    fn peek_after_type(&mut self) -> Result<TokenKind> {
        if self.peek != TokenKind::Identifier
            && self.peek != TokenKind::Dynamic
            && self.peek != TokenKind::Native
        {
            return Ok(TokenKind::Eof);
        }
        self.lookahead(|parser| {
            parser.advance();
            if parser.peek == TokenKind::Period {
                parser.advance();
                if parser.peek != TokenKind::Identifier {
                    return Ok(TokenKind::Eof);
                }
                parser.advance();
            }
            if parser.peek == TokenKind::Lt {
                let delta = parser.stream.current_payload();
                if delta == -1 {
                    return Ok(TokenKind::Eof);
                }
                parser.stream.skip(delta);
                parser.refresh_peek();
                if parser.peek != TokenKind::Gt {
                    return Ok(TokenKind::Eof);
                }
                parser.advance();
            }
            Ok(parser.peek)
        })
    }

    fn peek_after_formal_parameters(&mut self) -> Result<TokenKind> {
        debug_assert!(self.peek.is_identifier());
        self.lookahead(|parser| {
            parser.skip_qualified()?;
            if parser.peek != TokenKind::LParen {
                return Ok(TokenKind::Eof);
            }
            let delta = parser.stream.current_payload();
            if delta < 0 {
                return Ok(TokenKind::Eof);
            }
            parser.stream.skip(delta);
            parser.refresh_peek();
            if parser.peek != TokenKind::RParen {
                return Ok(TokenKind::Eof);
            }
            parser.advance();
            Ok(parser.peek)
        })
    }

    fn peek_after_identifier(&mut self) -> Result<TokenKind> {
        debug_assert!(self.peek.is_identifier());
        self.lookahead(|parser| {
            parser.advance();
            Ok(parser.peek)
        })
    }

    fn peek_is_named_argument(&mut self) -> Result<bool> {
        self.lookahead(|parser| {
            parser.optional(TokenKind::Comma);
            if !parser.peek.is_identifier() {
                return Ok(false);
            }
            parser.advance();
            Ok(parser.peek == TokenKind::Colon)
        })
    }

    fn peek_is_member_start(&mut self) -> Result<bool> {
        self.lookahead(|parser| {
            parser.skip_optional_type()?;
            if !parser.peek.is_identifier() {
                return Ok(false);
            }
            parser.advance();
            Ok(parser.peek == TokenKind::Semicolon
                || parser.peek == TokenKind::Assign
                || parser.peek == TokenKind::LParen)
        })
    }

    fn peek_is_getter(&mut self) -> Result<bool> {
        self.lookahead(|parser| {
            if !parser.optional(TokenKind::Get) {
                return Ok(false);
            }
            Ok(parser.peek.is_identifier())
        })
    }

    fn peek_is_setter(&mut self) -> Result<bool> {
        self.lookahead(|parser| {
            if !parser.optional(TokenKind::Set) {
                return Ok(false);
            }
            Ok(parser.peek.is_identifier())
        })
    }

    fn is_function_expression(&mut self) -> Result<bool> {
        debug_assert_eq!(self.peek, TokenKind::LParen);
        self.lookahead(|parser| {
            let delta = parser.stream.current_payload();
            if delta == -1 {
                return Ok(false);
            }
            parser.stream.skip(delta);
            parser.refresh_peek();
            if parser.peek != TokenKind::RParen {
                return Ok(false);
            }
            parser.advance();
            Ok(parser.peek == TokenKind::LBrace || parser.peek == TokenKind::Arrow)
        })
    }

    fn is_labelled_statement(&mut self) -> Result<bool> {
        debug_assert!(self.peek.is_identifier());
        self.lookahead(|parser| {
            parser.advance();
            Ok(parser.peek == TokenKind::Colon)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Node;
    use crate::scanner::Scanner;
    use crate::source::Location;
    use crate::zone::Zone;

    fn parse_unit<'z>(zone: &'z Zone, input: &str) -> (Builder<'z>, crate::ast::NodeId) {
        let mut builder = Builder::new(zone);
        let text = zone.alloc_str(input);
        let location = builder
            .source_mut()
            .load_from_buffer(zone.alloc_str("test.mica"), text);
        let source = builder.source().get_source(location);
        let tokens = Scanner::scan(&mut builder, source, location).expect("scan");
        Parser::new(&mut builder, tokens)
            .parse_compilation_unit()
            .expect("parse");
        let unit = builder.pop();
        (builder, unit)
    }

    fn parse_error(input: &str) -> CompileError {
        let zone = Zone::new();
        let mut builder = Builder::new(&zone);
        let text = zone.alloc_str(input);
        let tokens = Scanner::scan(&mut builder, text, Location::invalid()).expect("scan");
        Parser::new(&mut builder, tokens)
            .parse_compilation_unit()
            .unwrap_err()
    }

    fn unit_declarations(builder: &Builder, unit: crate::ast::NodeId) -> Vec<crate::ast::NodeId> {
        match builder.node(unit) {
            Node::CompilationUnit { declarations } => declarations.clone(),
            other => panic!("expected unit, found {other:?}"),
        }
    }

    #[test]
    fn parses_empty_main() {
        let zone = Zone::new();
        let (builder, unit) = parse_unit(&zone, "main() {}");
        let declarations = unit_declarations(&builder, unit);
        assert_eq!(declarations.len(), 1);
        let method = builder.method(declarations[0]);
        assert_eq!(
            builder.identifier_id(method.name),
            mica_core::names::Name::Main.id() as i32
        );
        assert!(method.parameters.is_empty());
    }

    #[test]
    fn parses_class_with_members() {
        let zone = Zone::new();
        let (builder, unit) = parse_unit(
            &zone,
            "class A extends B implements C { var x; foo(a, b) => a; static bar() {} }",
        );
        let declarations = unit_declarations(&builder, unit);
        let class = builder.class(declarations[0]);
        assert!(class.superclass.is_some());
        assert_eq!(class.implements.len(), 1);
        assert_eq!(class.declarations.len(), 3);
        let foo = builder.method(class.declarations[1]);
        assert_eq!(foo.parameters.len(), 2);
        let bar = builder.method(class.declarations[2]);
        assert!(bar.modifiers.is_static());
    }

    #[test]
    fn parses_optional_parameters() {
        let zone = Zone::new();
        let (builder, unit) = parse_unit(&zone, "foo(a, [b = 4]) {} bar({c: 1, d}) {}");
        let declarations = unit_declarations(&builder, unit);
        let foo = builder.method(declarations[0]);
        let b = builder.variable(foo.parameters[1]);
        assert!(b.modifiers.is_positional());
        assert!(b.has_initializer());
        let bar = builder.method(declarations[1]);
        let c = builder.variable(bar.parameters[0]);
        assert!(c.modifiers.is_named());
        assert!(c.has_initializer());
        let d = builder.variable(bar.parameters[1]);
        assert!(d.modifiers.is_named());
        assert!(!d.has_initializer());
    }

    #[test]
    fn parses_named_arguments() {
        let zone = Zone::new();
        let (builder, unit) = parse_unit(&zone, "main() { foo(1, b: 2, c: 3); }");
        let declarations = unit_declarations(&builder, unit);
        let main = builder.method(declarations[0]);
        let body = main.body.unwrap();
        let Node::Block { statements } = builder.node(body) else {
            panic!("expected block");
        };
        let Node::ExpressionStatement { expression } = builder.node(statements[0]) else {
            panic!("expected expression statement");
        };
        let Node::Invoke {
            arguments,
            named_arguments,
            ..
        } = builder.node(*expression)
        else {
            panic!("expected invoke");
        };
        assert_eq!(arguments.len(), 3);
        assert_eq!(named_arguments.len(), 2);
    }

    #[test]
    fn precedence_shapes_the_tree() {
        let zone = Zone::new();
        let (builder, unit) = parse_unit(&zone, "x() => 1 + 2 * 3;");
        let declarations = unit_declarations(&builder, unit);
        let method = builder.method(declarations[0]);
        let Node::Binary { token, left, right } = builder.node(method.body.unwrap()) else {
            panic!("expected binary body");
        };
        assert_eq!(*token, TokenKind::Add);
        assert!(matches!(builder.node(*left), Node::LiteralInteger(1)));
        let Node::Binary { token, .. } = builder.node(*right) else {
            panic!("expected nested binary");
        };
        assert_eq!(*token, TokenKind::Mul);
    }

    #[test]
    fn assignment_is_right_associative() {
        let zone = Zone::new();
        let (builder, unit) = parse_unit(&zone, "x() { a = b = 1; }");
        let declarations = unit_declarations(&builder, unit);
        let method = builder.method(declarations[0]);
        let Node::Block { statements } = builder.node(method.body.unwrap()) else {
            panic!("expected block");
        };
        let Node::ExpressionStatement { expression } = builder.node(statements[0]) else {
            panic!("expected expression statement");
        };
        let Node::Assign { target, value, .. } = builder.node(*expression) else {
            panic!("expected assign");
        };
        assert!(matches!(builder.node(*target), Node::Identifier { .. }));
        assert!(matches!(builder.node(*value), Node::Assign { .. }));
    }

    #[test]
    fn relational_operators_do_not_chain() {
        assert_eq!(parse_error("x() { return 1 < 2 < 3; }").kind, ErrorKind::Parse);
        assert_eq!(parse_error("x() { return 1 == 2 == 3; }").kind, ErrorKind::Parse);
    }

    #[test]
    fn type_annotations_are_erased() {
        let zone = Zone::new();
        let (builder, unit) = parse_unit(
            &zone,
            "List<int> xs() { Map<String, List<int>> m; return m; }",
        );
        let declarations = unit_declarations(&builder, unit);
        let method = builder.method(declarations[0]);
        let Node::Block { statements } = builder.node(method.body.unwrap()) else {
            panic!("expected block");
        };
        assert!(matches!(
            builder.node(statements[0]),
            Node::VariableDeclarationStatement { .. }
        ));
    }

    #[test]
    fn function_expressions_and_shifts_disambiguate() {
        let zone = Zone::new();
        let (builder, unit) = parse_unit(&zone, "x() { var f = (a) => a; return 1 >> 2; }");
        let declarations = unit_declarations(&builder, unit);
        let method = builder.method(declarations[0]);
        let Node::Block { statements } = builder.node(method.body.unwrap()) else {
            panic!("expected block");
        };
        assert_eq!(statements.len(), 2);
        let Node::Return { value } = builder.node(statements[1]) else {
            panic!("expected return");
        };
        let Node::Binary { token, .. } = builder.node(value.unwrap()) else {
            panic!("expected binary");
        };
        assert_eq!(*token, TokenKind::Shr);
    }

    #[test]
    fn parses_try_catch_finally() {
        let zone = Zone::new();
        let (builder, unit) = parse_unit(
            &zone,
            "x() { try { } on E catch (e) { } catch (e, s) { } finally { } }",
        );
        let declarations = unit_declarations(&builder, unit);
        let method = builder.method(declarations[0]);
        let Node::Block { statements } = builder.node(method.body.unwrap()) else {
            panic!("expected block");
        };
        let Node::Try {
            catches,
            finally_block,
            ..
        } = builder.node(statements[0])
        else {
            panic!("expected try");
        };
        assert_eq!(catches.len(), 2);
        assert!(finally_block.is_some());
        let Node::Catch {
            type_name,
            exception,
            stack_trace,
            ..
        } = builder.node(catches[0])
        else {
            panic!("expected catch");
        };
        assert!(type_name.is_some());
        assert!(exception.is_some());
        assert!(stack_trace.is_none());
    }

    #[test]
    fn parses_string_interpolation_expression() {
        let zone = Zone::new();
        let (builder, unit) = parse_unit(&zone, "x() => 'a${1 + 2}b';");
        let declarations = unit_declarations(&builder, unit);
        let method = builder.method(declarations[0]);
        let Node::StringInterpolationExpr {
            strings,
            expressions,
        } = builder.node(method.body.unwrap())
        else {
            panic!("expected interpolation");
        };
        assert_eq!(strings.len(), 2);
        assert_eq!(expressions.len(), 1);
    }

    #[test]
    fn parses_cascades() {
        let zone = Zone::new();
        let (builder, unit) = parse_unit(&zone, "x() { foo()..bar()..baz = 2; }");
        let declarations = unit_declarations(&builder, unit);
        let method = builder.method(declarations[0]);
        let Node::Block { statements } = builder.node(method.body.unwrap()) else {
            panic!("expected block");
        };
        let Node::ExpressionStatement { expression } = builder.node(statements[0]) else {
            panic!("expected expression statement");
        };
        assert!(matches!(builder.node(*expression), Node::Cascade { .. }));
    }

    #[test]
    fn parse_errors_name_expected_and_found() {
        let error = parse_error("main( {}");
        assert_eq!(error.kind, ErrorKind::Parse);
        assert!(error.message.contains("Expected"));
    }

    #[test]
    fn parses_constructor_initializers() {
        let zone = Zone::new();
        let (builder, unit) = parse_unit(
            &zone,
            "class A { var x; A(this.x); A.named() : x = 2, super(); }",
        );
        let declarations = unit_declarations(&builder, unit);
        let class = builder.class(declarations[0]);
        assert_eq!(class.declarations.len(), 3);
        let named = builder.method(class.declarations[2]);
        assert_eq!(named.initializers.len(), 2);
    }
}
