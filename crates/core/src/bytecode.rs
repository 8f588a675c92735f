//! The Mica bytecode surface
//!
//! Instructions are variable length: one opcode byte followed by a fixed
//! number of operand bytes. The VM iterates a method by decoding the first
//! byte and looking the width up in a fixed table, so every opcode except
//! the `MethodEnd` trailer must have a static width.
//!
//! Branch operands are byte deltas. Forward branches are always wide
//! (4-byte little-endian), measured from the opcode byte; back branches
//! come in a short (1-byte) and a wide form carrying the positive distance
//! back to the target.

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Frame slots every method gets without an explicit stack-overflow check.
///
/// Methods whose simulated high-water mark stays within this budget drop
/// their `StackOverflowCheck` prologue entirely.
pub const GUARANTEED_FRAME_SIZE: usize = 32;

/// Largest integer the `LoadLiteralWide` opcode can materialize.
pub const LOAD_LITERAL_WIDE_LIMIT: i64 = 0x3FFF_FFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum Opcode {
    LoadLocal0 = 0,
    LoadLocal1,
    LoadLocal2,
    LoadLocal,
    LoadLocalWide,
    LoadBoxed,
    LoadStatic,
    LoadStaticInit,
    LoadField,

    LoadLiteralNull,
    LoadLiteralTrue,
    LoadLiteralFalse,
    LoadLiteral0,
    LoadLiteral1,
    LoadLiteral,
    LoadLiteralWide,
    LoadConst,

    StoreLocal,
    StoreBoxed,
    StoreStatic,
    StoreField,

    InvokeMethod,
    InvokeTest,

    InvokeEq,
    InvokeLt,
    InvokeLe,
    InvokeGt,
    InvokeGe,

    InvokeAdd,
    InvokeSub,
    InvokeMod,
    InvokeMul,
    InvokeTruncDiv,

    InvokeBitNot,
    InvokeBitAnd,
    InvokeBitOr,
    InvokeBitXor,
    InvokeBitShr,
    InvokeBitShl,

    InvokeStatic,
    InvokeFactory,
    InvokeNative,
    InvokeNativeYield,

    Branch,
    BranchIfTrue,
    BranchIfFalse,
    BranchBack,
    BranchBackIfTrue,
    BranchBackIfFalse,
    BranchBackWide,
    BranchBackIfTrueWide,
    BranchBackIfFalseWide,

    SubroutineCall,
    SubroutineReturn,

    Pop,
    Allocate,
    AllocateBoxed,
    Negate,
    Throw,

    ProcessYield,
    CoroutineChange,
    Identical,
    IdenticalNonNumeric,

    EnterNoSuchMethod,
    ExitNoSuchMethod,

    FrameSize,
    StackOverflowCheck,
    Return,
    MethodEnd,
}

impl Opcode {
    /// Total instruction width in bytes, opcode byte included.
    ///
    /// `MethodEnd` is the one variable-width instruction (it trails the
    /// method and carries the try-range table); its base width covers the
    /// opcode byte, the method byte count and the range count.
    pub fn width(self) -> usize {
        use Opcode::*;
        match self {
            LoadLocal0 | LoadLocal1 | LoadLocal2 | LoadLiteralNull | LoadLiteralTrue
            | LoadLiteralFalse | LoadLiteral0 | LoadLiteral1 | SubroutineReturn | Pop
            | AllocateBoxed | Negate | Throw | ProcessYield | CoroutineChange | Identical
            | IdenticalNonNumeric | EnterNoSuchMethod | ExitNoSuchMethod => 1,
            LoadLocal | LoadBoxed | LoadField | LoadLiteral | StoreLocal | StoreBoxed
            | StoreField | BranchBack | BranchBackIfTrue | BranchBackIfFalse | FrameSize => 2,
            InvokeNative | InvokeNativeYield | Return => 3,
            LoadLocalWide | LoadStatic | LoadStaticInit | LoadLiteralWide | LoadConst
            | StoreStatic | InvokeMethod | InvokeTest | InvokeEq | InvokeLt | InvokeLe
            | InvokeGt | InvokeGe | InvokeAdd | InvokeSub | InvokeMod | InvokeMul
            | InvokeTruncDiv | InvokeBitNot | InvokeBitAnd | InvokeBitOr | InvokeBitXor
            | InvokeBitShr | InvokeBitShl | InvokeStatic | InvokeFactory | Branch
            | BranchIfTrue | BranchIfFalse | BranchBackWide | BranchBackIfTrueWide
            | BranchBackIfFalseWide | StackOverflowCheck | Allocate => 5,
            SubroutineCall => 9,
            MethodEnd => 9,
        }
    }

    /// Printable mnemonic, used by the disassembler and by trace tests.
    pub fn mnemonic(self) -> &'static str {
        use Opcode::*;
        match self {
            LoadLocal0 => "load-local 0",
            LoadLocal1 => "load-local 1",
            LoadLocal2 => "load-local 2",
            LoadLocal => "load-local",
            LoadLocalWide => "load-local-wide",
            LoadBoxed => "load-boxed",
            LoadStatic => "load-static",
            LoadStaticInit => "load-static-init",
            LoadField => "load-field",
            LoadLiteralNull => "load-literal-null",
            LoadLiteralTrue => "load-literal-true",
            LoadLiteralFalse => "load-literal-false",
            LoadLiteral0 => "load-literal 0",
            LoadLiteral1 => "load-literal 1",
            LoadLiteral => "load-literal",
            LoadLiteralWide => "load-literal-wide",
            LoadConst => "load-const",
            StoreLocal => "store-local",
            StoreBoxed => "store-boxed",
            StoreStatic => "store-static",
            StoreField => "store-field",
            InvokeMethod => "invoke-method",
            InvokeTest => "invoke-test",
            InvokeEq => "invoke-eq",
            InvokeLt => "invoke-lt",
            InvokeLe => "invoke-le",
            InvokeGt => "invoke-gt",
            InvokeGe => "invoke-ge",
            InvokeAdd => "invoke-add",
            InvokeSub => "invoke-sub",
            InvokeMod => "invoke-mod",
            InvokeMul => "invoke-mul",
            InvokeTruncDiv => "invoke-trunc-div",
            InvokeBitNot => "invoke-bit-not",
            InvokeBitAnd => "invoke-bit-and",
            InvokeBitOr => "invoke-bit-or",
            InvokeBitXor => "invoke-bit-xor",
            InvokeBitShr => "invoke-bit-shr",
            InvokeBitShl => "invoke-bit-shl",
            InvokeStatic => "invoke-static",
            InvokeFactory => "invoke-factory",
            InvokeNative => "invoke-native",
            InvokeNativeYield => "invoke-native-yield",
            Branch => "branch",
            BranchIfTrue => "branch-if-true",
            BranchIfFalse => "branch-if-false",
            BranchBack => "branch-back",
            BranchBackIfTrue => "branch-back-if-true",
            BranchBackIfFalse => "branch-back-if-false",
            BranchBackWide => "branch-back-wide",
            BranchBackIfTrueWide => "branch-back-if-true-wide",
            BranchBackIfFalseWide => "branch-back-if-false-wide",
            SubroutineCall => "subroutine-call",
            SubroutineReturn => "subroutine-return",
            Pop => "pop",
            Allocate => "allocate",
            AllocateBoxed => "allocate-boxed",
            Negate => "negate",
            Throw => "throw",
            ProcessYield => "process-yield",
            CoroutineChange => "coroutine-change",
            Identical => "identical",
            IdenticalNonNumeric => "identical-non-numeric",
            EnterNoSuchMethod => "enter-no-such-method",
            ExitNoSuchMethod => "exit-no-such-method",
            FrameSize => "frame-size",
            StackOverflowCheck => "stack-overflow-check",
            Return => "return",
            MethodEnd => "method-end",
        }
    }
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

/// Disassemble one instruction starting at `at`.
///
/// Returns the rendered instruction and the offset of the next one.
pub fn disassemble_at(bytes: &[u8], at: usize) -> Result<(String, usize), String> {
    use Opcode::*;
    let opcode =
        Opcode::try_from(bytes[at]).map_err(|_| format!("bad opcode {:#04x} at {at}", bytes[at]))?;
    let text = match opcode {
        LoadLocal | LoadBoxed | LoadField | LoadLiteral | StoreLocal | StoreBoxed | StoreField
        | BranchBack | BranchBackIfTrue | BranchBackIfFalse | FrameSize => {
            format!("{} {}", opcode.mnemonic(), bytes[at + 1])
        }
        InvokeNative | InvokeNativeYield => {
            format!("{} {} {}", opcode.mnemonic(), bytes[at + 1], bytes[at + 2])
        }
        Return => format!("{} {} {}", opcode.mnemonic(), bytes[at + 1], bytes[at + 2]),
        LoadLocalWide | LoadStatic | LoadStaticInit | LoadLiteralWide | StoreStatic
        | StackOverflowCheck | Branch | BranchIfTrue | BranchIfFalse | BranchBackWide
        | BranchBackIfTrueWide | BranchBackIfFalseWide => {
            format!("{} {}", opcode.mnemonic(), read_u32(bytes, at + 1))
        }
        InvokeMethod | InvokeTest | InvokeEq | InvokeLt | InvokeLe | InvokeGt | InvokeGe
        | InvokeAdd | InvokeSub | InvokeMod | InvokeMul | InvokeTruncDiv | InvokeBitNot
        | InvokeBitAnd | InvokeBitOr | InvokeBitXor | InvokeBitShr | InvokeBitShl => {
            // Specialized invokes still carry their selector so the VM can
            // fall back to a full dispatch; the trace elides it.
            opcode.mnemonic().to_string()
        }
        LoadConst | InvokeStatic | InvokeFactory | Allocate => {
            format!("{} @{}", opcode.mnemonic(), read_u32(bytes, at + 1))
        }
        SubroutineCall => format!("{} {}", opcode.mnemonic(), read_u32(bytes, at + 1)),
        MethodEnd => format!("{} {}", opcode.mnemonic(), read_u32(bytes, at + 1)),
        _ => opcode.mnemonic().to_string(),
    };
    let next = if opcode == MethodEnd {
        let ranges = read_u32(bytes, at + 5) as usize;
        at + opcode.width() + ranges * 8
    } else {
        at + opcode.width()
    };
    Ok((text, next))
}

/// Render a whole method body as a `;`-separated trace.
pub fn trace(bytes: &[u8]) -> Result<String, String> {
    let mut parts = Vec::new();
    let mut at = 0;
    while at < bytes.len() {
        let (text, next) = disassemble_at(bytes, at)?;
        parts.push(text);
        at = next;
    }
    Ok(parts.join("; "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn widths_cover_every_opcode() {
        for raw in 0..=u8::MAX {
            if let Ok(opcode) = Opcode::try_from(raw) {
                assert!(opcode.width() >= 1, "{opcode:?}");
            }
        }
    }

    #[test]
    fn roundtrip_from_byte() {
        assert_eq!(Opcode::try_from(0u8), Ok(Opcode::LoadLocal0));
        let last: u8 = Opcode::MethodEnd.into();
        assert_eq!(Opcode::try_from(last), Ok(Opcode::MethodEnd));
        assert!(Opcode::try_from(last + 1).is_err());
    }

    #[test]
    fn disassembles_simple_sequence() {
        let bytes = [
            Opcode::LoadLiteral.into(),
            2u8,
            Opcode::Return.into(),
            1,
            1,
        ];
        assert_eq!(trace(&bytes).unwrap(), "load-literal 2; return 1 1");
    }

    #[test]
    fn disassembles_method_end_with_ranges() {
        let mut bytes = vec![Opcode::Pop.into(), Opcode::MethodEnd.into()];
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.extend_from_slice(&1u32.to_le_bytes());
        assert_eq!(trace(&bytes).unwrap(), "pop; method-end 1");
    }
}
