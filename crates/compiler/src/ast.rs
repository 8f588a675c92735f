//! The abstract syntax tree
//!
//! One tagged enum covers every node kind; nodes live in a flat arena
//! owned by the builder and refer to each other through `NodeId` handles.
//! Fields that are resolved after parsing (ids, owners, scopes, capture
//! entries) start out unset and are filled in by the later passes through
//! the arena.

use crate::scope::{DeclId, ScopeId};
use crate::source::Location;
use crate::tokens::TokenKind;
use bitflags::bitflags;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Who a method or field belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Owner {
    Library(NodeId),
    Class(NodeId),
}

impl Owner {
    pub fn node(self) -> NodeId {
        match self {
            Owner::Library(node) | Owner::Class(node) => node,
        }
    }

    pub fn is_class(self) -> bool {
        matches!(self, Owner::Class(_))
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Modifiers: u16 {
        const CONST       = 1 << 0;
        const FINAL       = 1 << 1;
        const STATIC      = 1 << 2;
        const EXTERNAL    = 1 << 3;
        const FACTORY     = 1 << 4;
        const GET         = 1 << 5;
        const SET         = 1 << 6;
        const THIS        = 1 << 7;
        const POSITIONAL  = 1 << 8;
        const NAMED       = 1 << 9;
        const NATIVE      = 1 << 10;
        // Internal markers.
        const CONSTRUCTOR = 1 << 11;
        const BY_VALUE    = 1 << 12;
    }
}

impl Modifiers {
    pub fn is_const(self) -> bool {
        self.contains(Modifiers::CONST)
    }
    pub fn is_final(self) -> bool {
        self.contains(Modifiers::FINAL)
    }
    pub fn is_static(self) -> bool {
        self.contains(Modifiers::STATIC)
    }
    pub fn is_external(self) -> bool {
        self.contains(Modifiers::EXTERNAL)
    }
    pub fn is_factory(self) -> bool {
        self.contains(Modifiers::FACTORY)
    }
    pub fn is_get(self) -> bool {
        self.contains(Modifiers::GET)
    }
    pub fn is_set(self) -> bool {
        self.contains(Modifiers::SET)
    }
    pub fn is_this(self) -> bool {
        self.contains(Modifiers::THIS)
    }
    pub fn is_positional(self) -> bool {
        self.contains(Modifiers::POSITIONAL)
    }
    pub fn is_named(self) -> bool {
        self.contains(Modifiers::NAMED)
    }
    pub fn is_native(self) -> bool {
        self.contains(Modifiers::NATIVE)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassData {
    pub is_abstract: bool,
    pub name: NodeId,
    pub superclass: Option<NodeId>,
    pub mixins: Vec<NodeId>,
    pub implements: Vec<NodeId>,
    pub declarations: Vec<NodeId>,
    /// Class id, assigned lazily on enqueue.
    pub id: i32,
    pub scope: Option<ScopeId>,
    pub library: Option<NodeId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MethodData {
    pub modifiers: Modifiers,
    /// Identifier, or a dot for qualified constructor names.
    pub name: NodeId,
    pub parameters: Vec<NodeId>,
    pub initializers: Vec<NodeId>,
    pub body: Option<NodeId>,
    /// Method id, assigned on enqueue.
    pub id: i32,
    pub owner: Option<Owner>,
    /// Captured variables, filled in by scope resolution.
    pub captured: Vec<NodeId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VariableData {
    pub name: NodeId,
    pub value: Option<NodeId>,
    pub modifiers: Modifiers,
    pub owner: Option<Owner>,
    /// Scope-resolution entry for locals and parameters.
    pub entry: Option<DeclId>,
    /// Field index or static cell index; −1 until assigned.
    pub index: i32,
    /// Method id of the lazy static initializer stub, if any.
    pub initializer_id: i32,
}

impl VariableData {
    pub fn has_initializer(&self) -> bool {
        self.value.is_some()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Library {
        unit: NodeId,
        parts: Vec<NodeId>,
        scope: Option<ScopeId>,
    },
    CompilationUnit {
        declarations: Vec<NodeId>,
    },
    Import {
        uri: NodeId,
        prefix: Option<NodeId>,
    },
    Export {
        uri: NodeId,
    },
    Part {
        uri: NodeId,
    },
    PartOf {
        name: NodeId,
    },
    Class(ClassData),
    Typedef {
        name: NodeId,
        parameters: Vec<NodeId>,
    },
    Method(MethodData),
    VariableDeclaration(VariableData),

    // Statements.
    Block {
        statements: Vec<NodeId>,
    },
    VariableDeclarationStatement {
        modifiers: Modifiers,
        declarations: Vec<NodeId>,
    },
    EmptyStatement,
    ExpressionStatement {
        expression: NodeId,
    },
    If {
        condition: NodeId,
        if_true: NodeId,
        if_false: Option<NodeId>,
    },
    For {
        initializer: NodeId,
        condition: Option<NodeId>,
        increments: Vec<NodeId>,
        body: NodeId,
    },
    ForIn {
        token: TokenKind,
        variable: NodeId,
        expression: NodeId,
        body: NodeId,
    },
    While {
        condition: NodeId,
        body: NodeId,
    },
    DoWhile {
        condition: NodeId,
        body: NodeId,
    },
    Break {
        label: Option<NodeId>,
    },
    Continue {
        label: Option<NodeId>,
    },
    Return {
        value: Option<NodeId>,
    },
    Assert {
        condition: NodeId,
    },
    Case {
        condition: NodeId,
        statements: Vec<NodeId>,
    },
    Switch {
        value: NodeId,
        cases: Vec<NodeId>,
        default_statements: Vec<NodeId>,
    },
    Catch {
        type_name: Option<NodeId>,
        exception: Option<NodeId>,
        stack_trace: Option<NodeId>,
        block: NodeId,
    },
    Try {
        block: NodeId,
        catches: Vec<NodeId>,
        finally_block: Option<NodeId>,
    },
    Labelled {
        name: NodeId,
        statement: NodeId,
    },
    Rethrow,

    // Expressions.
    Parenthesized {
        location: Location,
        expression: NodeId,
    },
    Assign {
        token: TokenKind,
        target: NodeId,
        value: NodeId,
    },
    Unary {
        token: TokenKind,
        prefix: bool,
        expression: NodeId,
    },
    Binary {
        token: TokenKind,
        left: NodeId,
        right: NodeId,
    },
    Dot {
        object: NodeId,
        name: NodeId,
    },
    CascadeReceiver {
        token: TokenKind,
        object: NodeId,
    },
    Cascade {
        expression: NodeId,
    },
    Invoke {
        target: NodeId,
        arguments: Vec<NodeId>,
        named_arguments: Vec<NodeId>,
    },
    IndexExpr {
        target: NodeId,
        key: NodeId,
    },
    Conditional {
        condition: NodeId,
        if_true: NodeId,
        if_false: NodeId,
    },
    Is {
        is_not: bool,
        object: NodeId,
        type_name: NodeId,
    },
    As {
        object: NodeId,
        type_name: NodeId,
    },
    New {
        is_const: bool,
        invoke: NodeId,
    },
    Identifier {
        id: i32,
        location: Location,
    },
    This,
    Super,
    NullLiteral,
    StringInterpolationExpr {
        strings: Vec<NodeId>,
        expressions: Vec<NodeId>,
    },
    FunctionExpression {
        parameters: Vec<NodeId>,
        body: NodeId,
        captured: Vec<NodeId>,
    },
    Throw {
        expression: NodeId,
    },
    LiteralInteger(i64),
    LiteralDouble(f64),
    LiteralString(String),
    LiteralBoolean(bool),
    LiteralList {
        is_const: bool,
        elements: Vec<NodeId>,
    },
    LiteralMap {
        is_const: bool,
        keys: Vec<NodeId>,
        values: Vec<NodeId>,
    },

    // Compiler-internal lowering nodes; never produced by the parser.
    AddOne {
        frame_pos: i32,
        expression: NodeId,
        negative: bool,
    },
    CompoundAssign {
        token: TokenKind,
        target: NodeId,
        value: NodeId,
    },
    TearoffBody {
        method: NodeId,
    },
}

impl Node {
    pub fn is_expression(&self) -> bool {
        use Node::*;
        matches!(
            self,
            Parenthesized { .. }
                | Assign { .. }
                | Unary { .. }
                | Binary { .. }
                | Dot { .. }
                | CascadeReceiver { .. }
                | Cascade { .. }
                | Invoke { .. }
                | IndexExpr { .. }
                | Conditional { .. }
                | Is { .. }
                | As { .. }
                | New { .. }
                | Identifier { .. }
                | This
                | Super
                | NullLiteral
                | StringInterpolationExpr { .. }
                | FunctionExpression { .. }
                | Throw { .. }
                | LiteralInteger(_)
                | LiteralDouble(_)
                | LiteralString(_)
                | LiteralBoolean(_)
                | LiteralList { .. }
                | LiteralMap { .. }
                | AddOne { .. }
                | CompoundAssign { .. }
        )
    }

    pub fn is_statement(&self) -> bool {
        use Node::*;
        matches!(
            self,
            Block { .. }
                | VariableDeclarationStatement { .. }
                | EmptyStatement
                | ExpressionStatement { .. }
                | If { .. }
                | For { .. }
                | ForIn { .. }
                | While { .. }
                | DoWhile { .. }
                | Break { .. }
                | Continue { .. }
                | Return { .. }
                | Assert { .. }
                | Case { .. }
                | Switch { .. }
                | Catch { .. }
                | Try { .. }
                | Labelled { .. }
                | Rethrow
                | Method(_)
        )
    }
}

/// True for a body that contains no statements at all.
pub fn is_empty_body(nodes: &[Node], body: Option<NodeId>) -> bool {
    match body {
        None => true,
        Some(id) => match &nodes[id.index()] {
            Node::EmptyStatement => true,
            Node::Block { statements } => statements.is_empty(),
            _ => false,
        },
    }
}

/// Whether a large integer literal must go through the constant pool
/// instead of an inline load.
pub fn integer_needs_const_pool(value: i64) -> bool {
    value < 0 || value > mica_core::bytecode::LOAD_LITERAL_WIDE_LIMIT
}
