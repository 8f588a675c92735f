//! Native method table
//!
//! `native` method bodies resolve against this fixed `(holder, name)`
//! registry; the id is the index the VM uses to find the implementation.
//! Top-level natives use the `<none>` holder.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Native {
    PrintString = 0,
    IntParse,
    ObjectEquals,
    ObjectHashCode,
    ObjectToString,
    SmiAdd,
    SmiSub,
    SmiMul,
    SmiCompare,
    DoubleAdd,
    DoubleSub,
    StringLength,
    StringAdd,
    StringIndex,
    ListLength,
    ListIndexGet,
    ListIndexSet,
    ListAdd,
    PortSend,
    ProcessSpawn,
    Halt,
}

impl Native {
    /// Natives that may suspend the calling process.
    pub fn is_yielding(self) -> bool {
        matches!(self, Native::PortSend)
    }
}

/// `(native, holder class, method name)`; `<none>` for top-level methods.
pub const TABLE: &[(Native, &str, &str)] = &[
    (Native::PrintString, "<none>", "_printString"),
    (Native::IntParse, "<none>", "_intParse"),
    (Native::Halt, "<none>", "_halt"),
    (Native::ObjectEquals, "Object", "=="),
    (Native::ObjectHashCode, "Object", "hashCode"),
    (Native::ObjectToString, "Object", "toString"),
    (Native::SmiAdd, "_Smi", "+"),
    (Native::SmiSub, "_Smi", "-"),
    (Native::SmiMul, "_Smi", "*"),
    (Native::SmiCompare, "_Smi", "compareTo"),
    (Native::DoubleAdd, "double", "+"),
    (Native::DoubleSub, "double", "-"),
    (Native::StringLength, "String", "length"),
    (Native::StringAdd, "String", "+"),
    (Native::StringIndex, "String", "[]"),
    (Native::ListLength, "List", "length"),
    (Native::ListIndexGet, "List", "[]"),
    (Native::ListIndexSet, "List", "[]="),
    (Native::ListAdd, "_GrowableList", "add"),
    (Native::PortSend, "Port", "send"),
    (Native::ProcessSpawn, "Process", "spawn"),
];
