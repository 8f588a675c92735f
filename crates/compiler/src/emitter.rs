//! The bytecode emitter
//!
//! One emitter produces the `Code` for one method. It tracks a virtual
//! stack mirroring the VM's so the recorded frame size is always the
//! simulated high-water mark, and starts every method with a
//! stack-overflow-check prologue that is retro-patched (or dropped when
//! the frame fits the guaranteed budget) once the method ends.
//!
//! External references (methods, classes, constants) go through a
//! per-method literal pool; entries are packed `(id << 2) | kind` and
//! deduplicated, and bytecodes carry the compact pool index. The pool is
//! patched up to absolute references during session finalization.

use indexmap::IndexSet;
use mica_core::bytecode::{GUARANTEED_FRAME_SIZE, Opcode};
use mica_core::names::Name;
use mica_core::selector::Selector;
use crate::natives::Native;

/// Literal pool entry kinds; low two bits of a packed literal id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum IdType {
    Method = 0,
    Class = 1,
    Constant = 2,
}

impl IdType {
    pub fn from_bits(bits: i32) -> IdType {
        match bits & 3 {
            0 => IdType::Method,
            1 => IdType::Class,
            _ => IdType::Constant,
        }
    }
}

/// Pack a literal pool entry.
pub fn pack_literal(id: i32, kind: IdType) -> i32 {
    (id << 2) | kind as i32
}

/// Unpack a literal pool entry into `(kind, id)`.
pub fn unpack_literal(encoded: i32) -> (IdType, i32) {
    (IdType::from_bits(encoded), encoded >> 2)
}

/// The compiled body of one method.
#[derive(Debug, Clone)]
pub struct Code {
    pub arity: usize,
    pub bytes: Vec<u8>,
    /// Packed literal pool entries in pool order.
    pub literal_ids: Vec<i32>,
}

/// A branch target. Forward uses are recorded in the label and patched
/// when the label is bound.
pub struct Label {
    position: i32,
    uses: Vec<usize>,
}

impl Label {
    pub fn new() -> Label {
        Label {
            position: -1,
            uses: Vec::new(),
        }
    }

    pub fn is_bound(&self) -> bool {
        self.position >= 0
    }

    pub fn position(&self) -> i32 {
        self.position
    }

    fn bind(&mut self, position: usize) {
        debug_assert!(!self.is_bound());
        self.position = position as i32;
    }

    fn add_use(&mut self, position: usize) {
        debug_assert!(!self.is_bound());
        self.uses.push(position);
    }
}

impl Default for Label {
    fn default() -> Label {
        Label::new()
    }
}

pub struct Emitter {
    arity: usize,
    bytes: Vec<u8>,
    literals: IndexSet<i32>,
    stack_size: i32,
    max_stack_size: i32,
    last_opcode: Option<Opcode>,
    ranges: Vec<(i32, i32)>,
}

impl Emitter {
    pub fn new(arity: usize) -> Emitter {
        let mut emitter = Emitter {
            arity,
            bytes: Vec::new(),
            literals: IndexSet::new(),
            stack_size: 0,
            max_stack_size: 0,
            last_opcode: None,
            ranges: Vec::new(),
        };
        // Always start with a stack-overflow check; it is dropped again
        // in `into_code` when the frame fits the guaranteed budget.
        emitter.emit_opcode(Opcode::StackOverflowCheck);
        emitter.emit_i32(0);
        emitter
    }

    pub fn arity(&self) -> usize {
        self.arity
    }

    pub fn frame_size(&self) -> i32 {
        self.stack_size
    }

    pub fn position(&self) -> usize {
        self.bytes.len()
    }

    pub fn ends_with_return(&self) -> bool {
        self.last_opcode == Some(Opcode::Return)
    }

    /// Adjust the simulated stack without emitting anything.
    pub fn frame_size_fix(&mut self, delta: i32) {
        self.stack_size_change(delta);
    }

    /// Finish the method: patch or drop the overflow prologue, append the
    /// `MethodEnd` trailer, and hand out the code record.
    pub fn into_code(mut self) -> Code {
        debug_assert!(self.last_opcode != Some(Opcode::MethodEnd));
        let literal_ids: Vec<i32> = self.literals.iter().copied().collect();
        if self.max_stack_size > GUARANTEED_FRAME_SIZE as i32 {
            let delta = self.max_stack_size - GUARANTEED_FRAME_SIZE as i32;
            self.bytes[1..5].copy_from_slice(&delta.to_le_bytes());
            self.method_end(0);
            Code {
                arity: self.arity,
                bytes: self.bytes,
                literal_ids,
            }
        } else {
            self.method_end(-5);
            Code {
                arity: self.arity,
                bytes: self.bytes.split_off(5),
                literal_ids,
            }
        }
    }

    // ------------------------------------------------------------------
    // Loads.

    pub fn load_this(&mut self) {
        self.load_parameter(0);
    }

    pub fn load_parameter(&mut self, index: usize) {
        self.load_stack_local(self.stack_size + 1 + self.arity as i32 - index as i32 - 1);
    }

    pub fn load_local(&mut self, index: i32) {
        debug_assert!(index >= 0);
        self.load_stack_local(self.stack_size - index - 1);
    }

    pub fn load_stack_local(&mut self, index: i32) {
        debug_assert!(index >= 0);
        match index {
            0 => self.emit_opcode(Opcode::LoadLocal0),
            1 => self.emit_opcode(Opcode::LoadLocal1),
            2 => self.emit_opcode(Opcode::LoadLocal2),
            _ if index <= 0xFF => {
                self.emit_opcode(Opcode::LoadLocal);
                self.bytes.push(index as u8);
            }
            _ => {
                self.emit_opcode(Opcode::LoadLocalWide);
                self.emit_i32(index);
            }
        }
        self.stack_size_change(1);
    }

    pub fn load_boxed(&mut self, index: i32) {
        debug_assert!(index >= 0);
        let slot = self.stack_size - index - 1;
        debug_assert!((0..=0xFF).contains(&slot));
        self.emit_opcode(Opcode::LoadBoxed);
        self.bytes.push(slot as u8);
        self.stack_size_change(1);
    }

    pub fn load_static(&mut self, id: i32) {
        self.emit_opcode(Opcode::LoadStatic);
        self.emit_i32(id);
        self.stack_size_change(1);
    }

    pub fn load_static_init(&mut self, id: i32) {
        self.emit_opcode(Opcode::LoadStaticInit);
        self.emit_i32(id);
        self.stack_size_change(1);
    }

    pub fn load_field(&mut self, field: usize) {
        debug_assert!(field <= 0xFF);
        self.emit_opcode(Opcode::LoadField);
        self.bytes.push(field as u8);
    }

    pub fn load_integer(&mut self, value: i64) {
        debug_assert!(value >= 0);
        match value {
            0 => self.emit_opcode(Opcode::LoadLiteral0),
            1 => self.emit_opcode(Opcode::LoadLiteral1),
            _ if value <= 0xFF => {
                self.emit_opcode(Opcode::LoadLiteral);
                self.bytes.push(value as u8);
            }
            _ => {
                self.emit_opcode(Opcode::LoadLiteralWide);
                self.emit_i32(value as i32);
            }
        }
        self.stack_size_change(1);
    }

    /// Load a constant-pool object; the three singletons use dedicated
    /// opcodes.
    pub fn load_const(&mut self, id: i32) {
        match id {
            crate::consts::CONST_NULL_ID => self.emit_opcode(Opcode::LoadLiteralNull),
            crate::consts::CONST_TRUE_ID => self.emit_opcode(Opcode::LoadLiteralTrue),
            crate::consts::CONST_FALSE_ID => self.emit_opcode(Opcode::LoadLiteralFalse),
            _ => {
                self.emit_opcode(Opcode::LoadConst);
                self.emit_literal(id, IdType::Constant);
            }
        }
        self.stack_size_change(1);
    }

    // ------------------------------------------------------------------
    // Stores.

    pub fn store_parameter(&mut self, index: usize) {
        debug_assert!(index < self.arity);
        self.store_stack_local(self.stack_size + 1 + self.arity as i32 - index as i32 - 1);
    }

    pub fn store_local(&mut self, index: i32) {
        self.store_stack_local(self.stack_size - index - 1);
    }

    pub fn store_stack_local(&mut self, index: i32) {
        debug_assert!(index >= 0);
        debug_assert!(index != self.stack_size);
        debug_assert!(index <= 0xFF);
        self.emit_opcode(Opcode::StoreLocal);
        self.bytes.push(index as u8);
    }

    pub fn store_boxed(&mut self, index: i32) {
        debug_assert!(index >= 0);
        let slot = self.stack_size - index - 1;
        debug_assert!((0..=0xFF).contains(&slot));
        self.emit_opcode(Opcode::StoreBoxed);
        self.bytes.push(slot as u8);
    }

    pub fn store_static(&mut self, id: i32) {
        self.emit_opcode(Opcode::StoreStatic);
        self.emit_i32(id);
    }

    pub fn store_field(&mut self, field: usize) {
        debug_assert!(field <= 0xFF);
        self.emit_opcode(Opcode::StoreField);
        self.bytes.push(field as u8);
        self.stack_size_change(-1);
    }

    // ------------------------------------------------------------------
    // Invokes.

    pub fn invoke_method(&mut self, name_id: i32, arity: usize) {
        let opcode = match name_id {
            id if id == Name::Equals.id() as i32 => Opcode::InvokeEq,
            id if id == Name::LessThan.id() as i32 => Opcode::InvokeLt,
            id if id == Name::LessEqual.id() as i32 => Opcode::InvokeLe,
            id if id == Name::GreaterThan.id() as i32 => Opcode::InvokeGt,
            id if id == Name::GreaterEqual.id() as i32 => Opcode::InvokeGe,
            id if id == Name::Add.id() as i32 => Opcode::InvokeAdd,
            id if id == Name::Sub.id() as i32 => Opcode::InvokeSub,
            id if id == Name::Mod.id() as i32 => Opcode::InvokeMod,
            id if id == Name::Mul.id() as i32 => Opcode::InvokeMul,
            id if id == Name::TruncDiv.id() as i32 => Opcode::InvokeTruncDiv,
            id if id == Name::BitNot.id() as i32 => Opcode::InvokeBitNot,
            id if id == Name::BitAnd.id() as i32 => Opcode::InvokeBitAnd,
            id if id == Name::BitOr.id() as i32 => Opcode::InvokeBitOr,
            id if id == Name::BitXor.id() as i32 => Opcode::InvokeBitXor,
            id if id == Name::BitShr.id() as i32 => Opcode::InvokeBitShr,
            id if id == Name::BitShl.id() as i32 => Opcode::InvokeBitShl,
            _ => Opcode::InvokeMethod,
        };
        self.emit_opcode(opcode);
        debug_assert!(Selector::is_valid_arity(arity as u32));
        debug_assert!(Selector::is_valid_id(name_id as u32));
        let selector = Selector::method(name_id as u32, arity as u32);
        self.emit_i32(selector.raw() as i32);
        self.stack_size_change(-(arity as i32));
    }

    pub fn invoke_getter(&mut self, name_id: i32) {
        self.emit_opcode(Opcode::InvokeMethod);
        self.emit_i32(Selector::getter(name_id as u32).raw() as i32);
    }

    pub fn invoke_setter(&mut self, name_id: i32) {
        self.emit_opcode(Opcode::InvokeMethod);
        self.emit_i32(Selector::setter(name_id as u32).raw() as i32);
        self.stack_size_change(-1);
    }

    pub fn invoke_static(&mut self, arity: usize, id: i32) {
        self.emit_opcode(Opcode::InvokeStatic);
        self.emit_literal(id, IdType::Method);
        self.stack_size_change(1 - arity as i32);
    }

    pub fn invoke_factory(&mut self, arity: usize, id: i32) {
        self.emit_opcode(Opcode::InvokeFactory);
        self.emit_literal(id, IdType::Method);
        self.stack_size_change(1 - arity as i32);
    }

    pub fn invoke_native(&mut self, arity: usize, native: Native) {
        debug_assert!(arity <= 0xFF);
        self.emit_opcode(Opcode::InvokeNative);
        self.bytes.push(arity as u8);
        self.bytes.push(native as u8);
        self.stack_size_change(1);
    }

    pub fn invoke_native_yield(&mut self, arity: usize, native: Native) {
        debug_assert!(arity <= 0xFF);
        self.emit_opcode(Opcode::InvokeNativeYield);
        self.bytes.push(arity as u8);
        self.bytes.push(native as u8);
        self.stack_size_change(1);
    }

    /// An `is` test through a synthetic test selector.
    pub fn invoke_test(&mut self, name_id: i32) {
        self.emit_opcode(Opcode::InvokeTest);
        self.emit_i32(Selector::method(name_id as u32, 0).raw() as i32);
    }

    // ------------------------------------------------------------------
    // Labels and branches.

    pub fn bind(&mut self, label: &mut Label) {
        self.bind_raw(label);
        self.last_opcode = None;
    }

    /// Bind without clearing the last-opcode marker; used when the bind
    /// must not interrupt a `Return`-terminated path.
    pub fn bind_raw(&mut self, label: &mut Label) {
        debug_assert!(!label.is_bound());
        let position = self.bytes.len();
        for use_at in label.uses.drain(..) {
            let stored =
                i32::from_le_bytes(self.bytes[use_at..use_at + 4].try_into().unwrap());
            let delta = position as i32 - use_at as i32 + stored;
            self.bytes[use_at..use_at + 4].copy_from_slice(&delta.to_le_bytes());
        }
        label.bind(position);
    }

    pub fn branch(&mut self, label: &mut Label) {
        if label.is_bound() {
            self.emit_back_branch(Opcode::BranchBack, Opcode::BranchBackWide, label);
        } else {
            self.emit_forward_branch(Opcode::Branch, label);
        }
    }

    pub fn branch_if_true(&mut self, label: &mut Label) {
        if label.is_bound() {
            self.emit_back_branch(
                Opcode::BranchBackIfTrue,
                Opcode::BranchBackIfTrueWide,
                label,
            );
        } else {
            self.emit_forward_branch(Opcode::BranchIfTrue, label);
        }
        self.stack_size_change(-1);
    }

    pub fn branch_if_false(&mut self, label: &mut Label) {
        if label.is_bound() {
            self.emit_back_branch(
                Opcode::BranchBackIfFalse,
                Opcode::BranchBackIfFalseWide,
                label,
            );
        } else {
            self.emit_forward_branch(Opcode::BranchIfFalse, label);
        }
        self.stack_size_change(-1);
    }

    /// A forward call into a finally subroutine. The second operand is
    /// the return-address slot patched when `return_label` is bound.
    pub fn subroutine_call(&mut self, label: &mut Label, return_label: &mut Label) {
        debug_assert!(!label.is_bound());
        self.emit_forward_branch(Opcode::SubroutineCall, label);
        return_label.add_use(self.position());
        // The return address is patched relative to the operand that
        // sits 4 bytes into the instruction.
        self.emit_i32(-4);
    }

    pub fn subroutine_return(&mut self, return_label: &mut Label) {
        self.bind_raw(return_label);
        self.emit_opcode(Opcode::SubroutineReturn);
        self.stack_size_change(-1);
    }

    // ------------------------------------------------------------------
    // The rest of the surface.

    pub fn pop(&mut self) {
        // Bypasses the last-opcode bookkeeping so trailing pops do not
        // hide a return.
        self.bytes.push(Opcode::Pop.into());
        self.stack_size_change(-1);
    }

    pub fn dup(&mut self) {
        self.load_stack_local(0);
    }

    pub fn ret(&mut self) {
        debug_assert!(self.stack_size >= 0);
        self.emit_opcode(Opcode::Return);
        self.bytes.push(self.stack_size as u8);
        self.bytes.push(self.arity as u8);
        self.stack_size_change(-1);
    }

    pub fn allocate(&mut self, class_id: i32, fields: usize) {
        self.emit_opcode(Opcode::Allocate);
        self.emit_literal(class_id, IdType::Class);
        self.stack_size_change(1 - fields as i32);
    }

    pub fn allocate_boxed(&mut self) {
        self.emit_opcode(Opcode::AllocateBoxed);
    }

    pub fn negate(&mut self) {
        self.emit_opcode(Opcode::Negate);
    }

    pub fn throw(&mut self) {
        self.emit_opcode(Opcode::Throw);
    }

    pub fn process_yield(&mut self) {
        self.emit_opcode(Opcode::ProcessYield);
    }

    pub fn coroutine_change(&mut self) {
        self.emit_opcode(Opcode::CoroutineChange);
        self.stack_size_change(-1);
    }

    pub fn identical(&mut self) {
        self.emit_opcode(Opcode::Identical);
        self.stack_size_change(-1);
    }

    pub fn identical_non_numeric(&mut self) {
        self.emit_opcode(Opcode::IdenticalNonNumeric);
        self.stack_size_change(-1);
    }

    pub fn enter_no_such_method(&mut self) {
        self.emit_opcode(Opcode::EnterNoSuchMethod);
    }

    pub fn exit_no_such_method(&mut self) {
        self.emit_opcode(Opcode::ExitNoSuchMethod);
    }

    pub fn frame_size_marker(&mut self) {
        self.emit_opcode(Opcode::FrameSize);
        self.bytes.push(self.stack_size as u8);
    }

    /// Record a try-block byte range for the exception table.
    pub fn add_frame_range(&mut self, start: usize, end: usize) {
        self.ranges.push((start as i32, end as i32));
    }

    // ------------------------------------------------------------------
    // Internals.

    fn method_end(&mut self, delta: i32) {
        let length = self.bytes.len() as i32;
        self.emit_opcode(Opcode::MethodEnd);
        self.emit_i32(length + delta);
        self.emit_i32(self.ranges.len() as i32);
        let ranges = std::mem::take(&mut self.ranges);
        for (start, end) in ranges {
            self.emit_i32(start + delta);
            self.emit_i32(end + delta);
        }
    }

    fn emit_opcode(&mut self, opcode: Opcode) {
        self.last_opcode = Some(opcode);
        self.bytes.push(opcode.into());
    }

    fn emit_forward_branch(&mut self, opcode: Opcode, label: &mut Label) {
        self.emit_opcode(opcode);
        label.add_use(self.position());
        // Offset of the opcode byte relative to this operand.
        self.emit_i32(1);
    }

    fn emit_back_branch(&mut self, short: Opcode, wide: Opcode, label: &mut Label) {
        let delta = self.position() as i32 - label.position();
        debug_assert!(delta >= 0);
        if delta > 0xFF {
            self.emit_opcode(wide);
            self.emit_i32(delta);
        } else {
            self.emit_opcode(short);
            self.bytes.push(delta as u8);
        }
    }

    fn emit_i32(&mut self, value: i32) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    fn emit_literal(&mut self, id: i32, kind: IdType) {
        let key = pack_literal(id, kind);
        let (index, _) = self.literals.insert_full(key);
        self.emit_i32(index as i32);
    }

    fn stack_size_change(&mut self, delta: i32) {
        self.stack_size += delta;
        if self.stack_size > self.max_stack_size {
            self.max_stack_size = self.stack_size;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mica_core::bytecode::trace;

    #[test]
    fn simple_return_sequence() {
        let mut emitter = Emitter::new(1);
        emitter.load_parameter(0);
        emitter.ret();
        let code = emitter.into_code();
        assert_eq!(code.arity, 1);
        assert_eq!(trace(&code.bytes).unwrap(), "load-local 1; return 1 1; method-end 4");
    }

    #[test]
    fn overflow_prologue_is_kept_for_deep_frames() {
        let mut emitter = Emitter::new(0);
        for _ in 0..40 {
            emitter.load_integer(0);
        }
        for _ in 0..39 {
            emitter.pop();
        }
        emitter.ret();
        let code = emitter.into_code();
        let rendered = trace(&code.bytes).unwrap();
        assert!(rendered.starts_with(&format!(
            "stack-overflow-check {}",
            40 - GUARANTEED_FRAME_SIZE
        )));
    }

    #[test]
    fn forward_branches_are_patched() {
        let mut emitter = Emitter::new(0);
        let mut done = Label::new();
        emitter.load_integer(1);
        emitter.branch_if_false(&mut done);
        emitter.load_integer(2);
        emitter.pop();
        emitter.bind(&mut done);
        emitter.load_integer(0);
        emitter.ret();
        let code = emitter.into_code();
        // branch-if-false operand: distance from the opcode byte to the
        // bound position.
        let rendered = trace(&code.bytes).unwrap();
        assert!(rendered.contains("branch-if-false 8"), "{rendered}");
    }

    #[test]
    fn backward_branches_use_short_form() {
        let mut emitter = Emitter::new(0);
        let mut loop_label = Label::new();
        emitter.bind(&mut loop_label);
        emitter.load_integer(1);
        emitter.branch_if_true(&mut loop_label);
        emitter.load_integer(0);
        emitter.ret();
        let code = emitter.into_code();
        let rendered = trace(&code.bytes).unwrap();
        assert!(rendered.contains("branch-back-if-true 1"), "{rendered}");
    }

    #[test]
    fn literal_pool_deduplicates() {
        let mut emitter = Emitter::new(0);
        emitter.invoke_static(0, 7);
        emitter.pop();
        emitter.invoke_static(0, 7);
        emitter.pop();
        emitter.invoke_static(0, 8);
        emitter.pop();
        emitter.load_integer(0);
        emitter.ret();
        let code = emitter.into_code();
        assert_eq!(code.literal_ids.len(), 2);
        assert_eq!(unpack_literal(code.literal_ids[0]), (IdType::Method, 7));
        assert_eq!(unpack_literal(code.literal_ids[1]), (IdType::Method, 8));
    }

    #[test]
    fn stack_discipline_at_return() {
        let mut emitter = Emitter::new(0);
        emitter.load_integer(1);
        emitter.load_integer(2);
        emitter.invoke_method(Name::Add.id() as i32, 1);
        assert_eq!(emitter.frame_size(), 1);
        emitter.ret();
        assert_eq!(emitter.frame_size(), 0);
    }

    #[test]
    fn frame_ranges_survive_prologue_stripping() {
        let mut emitter = Emitter::new(0);
        let start = emitter.position();
        emitter.load_integer(1);
        emitter.pop();
        let end = emitter.position();
        emitter.add_frame_range(start, end);
        emitter.load_integer(0);
        emitter.ret();
        let code = emitter.into_code();
        // The trailer records one range, rebased past the dropped
        // 5-byte prologue.
        let trailer_at = code.bytes.len() - 8 - Opcode::MethodEnd.width();
        assert_eq!(code.bytes[trailer_at], u8::from(Opcode::MethodEnd));
        let ranges_at = trailer_at + 5;
        let count =
            i32::from_le_bytes(code.bytes[ranges_at..ranges_at + 4].try_into().unwrap());
        assert_eq!(count, 1);
        let range_start =
            i32::from_le_bytes(code.bytes[ranges_at + 4..ranges_at + 8].try_into().unwrap());
        assert_eq!(range_start, start as i32 - 5);
    }
}
