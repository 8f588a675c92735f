//! Predefined name ids
//!
//! The compiler seeds its identifier table with this list before scanning
//! anything, so the ids below are stable constants shared with the VM.
//! Specialized invoke opcodes and the builtin-class protocol both key off
//! these ids.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Name {
    Equals = 0,
    LessThan,
    LessEqual,
    GreaterThan,
    GreaterEqual,
    Add,
    Sub,
    Mod,
    Mul,
    TruncDiv,
    Div,
    BitNot,
    BitAnd,
    BitOr,
    BitXor,
    BitShr,
    BitShl,
    Index,
    AssignIndex,
    UnaryMinus,
    Identical,
    NoSuchMethod,
    NoSuchMethodTrampoline,
    Yield,
    CoroutineChange,
    CoroutineStart,
    Unresolved,
    Call,
    Main,
    // Builtin class names; keep contiguous, the range check below
    // depends on it.
    Object,
    Bool,
    Null,
    Double,
    Smi,
    Mint,
    List,
    GrowableList,
    ConstantList,
    ConstantMap,
    StringClass,
    Function,
    MapClass,
    Symbol,
}

/// The predefined names in id order. Index equals `Name as u32`.
pub const PREDEFINED: &[(Name, &str)] = &[
    (Name::Equals, "=="),
    (Name::LessThan, "<"),
    (Name::LessEqual, "<="),
    (Name::GreaterThan, ">"),
    (Name::GreaterEqual, ">="),
    (Name::Add, "+"),
    (Name::Sub, "-"),
    (Name::Mod, "%"),
    (Name::Mul, "*"),
    (Name::TruncDiv, "~/"),
    (Name::Div, "/"),
    (Name::BitNot, "~"),
    (Name::BitAnd, "&"),
    (Name::BitOr, "|"),
    (Name::BitXor, "^"),
    (Name::BitShr, ">>"),
    (Name::BitShl, "<<"),
    (Name::Index, "[]"),
    (Name::AssignIndex, "[]="),
    (Name::UnaryMinus, "unary-"),
    (Name::Identical, "identical"),
    (Name::NoSuchMethod, "noSuchMethod"),
    (Name::NoSuchMethodTrampoline, "_noSuchMethodTrampoline"),
    (Name::Yield, "_yield"),
    (Name::CoroutineChange, "_coroutineChange"),
    (Name::CoroutineStart, "_coroutineStart"),
    (Name::Unresolved, "_unresolved"),
    (Name::Call, "call"),
    (Name::Main, "main"),
    (Name::Object, "Object"),
    (Name::Bool, "bool"),
    (Name::Null, "Null"),
    (Name::Double, "double"),
    (Name::Smi, "_Smi"),
    (Name::Mint, "_Mint"),
    (Name::List, "List"),
    (Name::GrowableList, "_GrowableList"),
    (Name::ConstantList, "_ConstantList"),
    (Name::ConstantMap, "_ConstantMap"),
    (Name::StringClass, "String"),
    (Name::Function, "Function"),
    (Name::MapClass, "Map"),
    (Name::Symbol, "Symbol"),
];

impl Name {
    pub fn id(self) -> u32 {
        self as u32
    }

    pub fn syntax(self) -> &'static str {
        PREDEFINED[self as usize].1
    }
}

/// True when `id` names a class the VM provides natively.
pub fn is_builtin_class_name(id: u32) -> bool {
    id >= Name::Object.id() && id <= Name::Symbol.id()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_index_matches_discriminant() {
        for (index, (name, _)) in PREDEFINED.iter().enumerate() {
            assert_eq!(name.id() as usize, index);
        }
    }

    #[test]
    fn builtin_class_range() {
        assert!(is_builtin_class_name(Name::Object.id()));
        assert!(is_builtin_class_name(Name::StringClass.id()));
        assert!(!is_builtin_class_name(Name::Main.id()));
        assert!(!is_builtin_class_name(Name::Equals.id()));
    }
}
