//! Mica core: definitions shared between the compiler and the VM
//!
//! The compiler front end and the virtual machine agree on three things:
//! the bytecode surface, the packed selector layout used as method-table
//! keys, and the session protocol that reconstructs a program inside a
//! running VM. This crate holds exactly those, so the two sides can never
//! drift apart.
//!
//! # Modules
//!
//! - `bytecode`: opcode set, per-opcode widths, disassembly
//! - `selector`: bit-packed `(name, kind, arity)` method-table keys
//! - `names`: predefined name ids the VM relies on
//! - `wire`: session frame tags and the framed connection writer

pub mod bytecode;
pub mod names;
pub mod selector;
pub mod wire;

pub use bytecode::Opcode;
pub use selector::Selector;
pub use wire::{Connection, Frame, MapId, ReadBuffer, WriteBuffer};
