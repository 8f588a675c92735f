//! Bit-packed selectors
//!
//! A selector is the 32-bit key the VM uses for method-table lookups:
//!
//! ```text
//! bits  0..8   arity (positional argument slots, receiver excluded)
//! bits  8..10  kind  (method, getter, setter)
//! bits 10..32  canonical name id
//! ```
//!
//! Getters encode arity 0 and setters arity 1, so accessor selectors never
//! collide with method selectors of the same name.

const ARITY_BITS: u32 = 8;
const KIND_BITS: u32 = 2;
const KIND_SHIFT: u32 = ARITY_BITS;
const ID_SHIFT: u32 = ARITY_BITS + KIND_BITS;

/// Maximum encodable arity.
pub const MAX_ARITY: u32 = (1 << ARITY_BITS) - 1;
/// Maximum encodable name id.
pub const MAX_NAME_ID: u32 = (1 << (32 - ID_SHIFT)) - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Selector(u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SelectorKind {
    Method = 0,
    Getter = 1,
    Setter = 2,
}

impl Selector {
    pub fn encode(id: u32, kind: SelectorKind, arity: u32) -> Selector {
        debug_assert!(arity <= MAX_ARITY);
        debug_assert!(id <= MAX_NAME_ID);
        Selector((id << ID_SHIFT) | ((kind as u32) << KIND_SHIFT) | arity)
    }

    pub fn method(id: u32, arity: u32) -> Selector {
        Selector::encode(id, SelectorKind::Method, arity)
    }

    pub fn getter(id: u32) -> Selector {
        Selector::encode(id, SelectorKind::Getter, 0)
    }

    pub fn setter(id: u32) -> Selector {
        Selector::encode(id, SelectorKind::Setter, 1)
    }

    pub fn id(self) -> u32 {
        self.0 >> ID_SHIFT
    }

    pub fn kind(self) -> SelectorKind {
        match (self.0 >> KIND_SHIFT) & ((1 << KIND_BITS) - 1) {
            0 => SelectorKind::Method,
            1 => SelectorKind::Getter,
            _ => SelectorKind::Setter,
        }
    }

    pub fn arity(self) -> u32 {
        self.0 & MAX_ARITY
    }

    pub fn raw(self) -> u32 {
        self.0
    }

    pub fn from_raw(raw: u32) -> Selector {
        Selector(raw)
    }

    pub fn is_valid_arity(arity: u32) -> bool {
        arity <= MAX_ARITY
    }

    pub fn is_valid_id(id: u32) -> bool {
        id <= MAX_NAME_ID
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packs_and_unpacks() {
        let selector = Selector::method(4711, 3);
        assert_eq!(selector.id(), 4711);
        assert_eq!(selector.kind(), SelectorKind::Method);
        assert_eq!(selector.arity(), 3);
    }

    #[test]
    fn accessors_never_collide_with_methods() {
        let id = 42;
        let as_method0 = Selector::method(id, 0);
        let as_method1 = Selector::method(id, 1);
        assert_ne!(Selector::getter(id), as_method0);
        assert_ne!(Selector::setter(id), as_method1);
        assert_ne!(Selector::getter(id), Selector::setter(id));
    }

    #[test]
    fn ordering_follows_raw_value() {
        assert!(Selector::method(1, 0) < Selector::method(2, 0));
        assert!(Selector::method(7, 1) > Selector::method(7, 0));
    }
}
