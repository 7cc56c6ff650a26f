//! The grip layer: handles through which all running code refers to objects.
//!
//! A grip decouples "what code holds" from "where the object physically is",
//! which is what lets the collector relocate live objects. This crate uses
//! the *direct* scheme: a grip IS the object's origin address, so producing
//! and unwrapping grips is free and the whole relocation cost is paid at
//! collection time, when every live grip is discovered and rewritten through
//! the forwarding slots.
//!
//! Grip validity is not checked on access. A corrupt grip implies a corrupt
//! heap, which the debug cell tags and the verify action catch fatally; there
//! is no recoverable error surface here.

use std::fmt;

use crate::word::{Address, Offset, Size, WORD_BYTES};

// ============================================================================
// Grip
// ============================================================================

/// A handle to a heap object. Under the direct scheme this is the object's
/// origin address; the zero grip is the null reference.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Grip(Address);

impl Grip {
    /// The null grip.
    pub const ZERO: Self = Self(Address::ZERO);

    /// Produce the grip for an object origin. Identity under the direct
    /// scheme.
    #[inline]
    #[must_use]
    pub const fn from_origin(origin: Address) -> Self {
        Self(origin)
    }

    /// Unwrap the grip to the object origin. Identity under the direct
    /// scheme.
    #[inline]
    #[must_use]
    pub const fn to_origin(self) -> Address {
        self.0
    }

    /// The raw word value of this grip.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> usize {
        self.0.raw()
    }

    /// Whether this is the null grip.
    #[inline]
    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.0.is_zero()
    }

    // ------------------------------------------------------------------
    // Mark-bit punning
    // ------------------------------------------------------------------
    //
    // Origins are word-aligned, so the low address bit is free to carry a
    // mark for schemes that mark in place. The belt collector itself
    // forwards instead of marking, but the operations are part of the grip
    // contract.

    /// Whether the mark bit is set.
    #[inline]
    #[must_use]
    pub const fn is_marked(self) -> bool {
        self.raw() & 1 != 0
    }

    /// This grip with the mark bit set.
    #[inline]
    #[must_use]
    pub const fn marked(self) -> Self {
        Self(Address::new(self.raw() | 1))
    }

    /// This grip with the mark bit cleared.
    #[inline]
    #[must_use]
    pub const fn unmarked(self) -> Self {
        Self(Address::new(self.raw() & !1))
    }

    // ------------------------------------------------------------------
    // Field access
    // ------------------------------------------------------------------

    /// Read the word field at `offset` from the origin.
    ///
    /// # Safety
    ///
    /// The grip must refer to a live object whose layout places a word field
    /// at `offset`.
    #[inline]
    #[must_use]
    pub unsafe fn get_word(self, offset: Offset) -> usize {
        unsafe { (self.0 + offset).read_word() }
    }

    /// Write the word field at `offset` from the origin.
    ///
    /// # Safety
    ///
    /// As [`Grip::get_word`], and the field must be writable.
    #[inline]
    pub unsafe fn set_word(self, offset: Offset, value: usize) {
        unsafe { (self.0 + offset).write_word(value) };
    }

    /// Read the byte field at `offset` from the origin.
    ///
    /// # Safety
    ///
    /// The grip must refer to a live object with a byte field at `offset`.
    #[inline]
    #[must_use]
    pub unsafe fn get_u8(self, offset: Offset) -> u8 {
        unsafe { (self.0 + offset).read_u8() }
    }

    /// Write the byte field at `offset` from the origin.
    ///
    /// # Safety
    ///
    /// As [`Grip::get_u8`], and the field must be writable.
    #[inline]
    pub unsafe fn set_u8(self, offset: Offset, value: u8) {
        unsafe { (self.0 + offset).write_u8(value) };
    }

    /// Read the `u32` field at `offset` from the origin.
    ///
    /// # Safety
    ///
    /// The grip must refer to a live object with a 4-byte field at `offset`.
    #[inline]
    #[must_use]
    pub unsafe fn get_u32(self, offset: Offset) -> u32 {
        unsafe { (self.0 + offset).read_u32() }
    }

    /// Write the `u32` field at `offset` from the origin.
    ///
    /// # Safety
    ///
    /// As [`Grip::get_u32`], and the field must be writable.
    #[inline]
    pub unsafe fn set_u32(self, offset: Offset, value: u32) {
        unsafe { (self.0 + offset).write_u32(value) };
    }

    /// Read the reference field at `offset` from the origin.
    ///
    /// # Safety
    ///
    /// The grip must refer to a live object whose layout places a reference
    /// field at `offset`.
    #[inline]
    #[must_use]
    pub unsafe fn get_grip(self, offset: Offset) -> Self {
        Self(Address::new(unsafe { self.get_word(offset) }))
    }

    /// Write the reference field at `offset` from the origin.
    ///
    /// # Safety
    ///
    /// As [`Grip::get_grip`], and the field must be writable.
    #[inline]
    pub unsafe fn set_grip(self, offset: Offset, value: Self) {
        unsafe { self.set_word(offset, value.raw()) };
    }

    // ------------------------------------------------------------------
    // Indexed access (array elements)
    // ------------------------------------------------------------------

    /// Address of the word element `index` in a sequence starting at
    /// `displacement` from the origin.
    #[inline]
    #[must_use]
    fn element_address(self, displacement: Offset, index: usize) -> Address {
        self.0 + displacement + Size::from_words(index)
    }

    /// Read word element `index` of the sequence at `displacement`.
    ///
    /// # Safety
    ///
    /// The element must lie within the object's allocated cell.
    #[inline]
    #[must_use]
    pub unsafe fn get_word_indexed(self, displacement: Offset, index: usize) -> usize {
        unsafe { self.element_address(displacement, index).read_word() }
    }

    /// Write word element `index` of the sequence at `displacement`.
    ///
    /// # Safety
    ///
    /// As [`Grip::get_word_indexed`], and the element must be writable.
    #[inline]
    pub unsafe fn set_word_indexed(self, displacement: Offset, index: usize, value: usize) {
        unsafe { self.element_address(displacement, index).write_word(value) };
    }

    /// Read reference element `index` of the sequence at `displacement`.
    ///
    /// # Safety
    ///
    /// As [`Grip::get_word_indexed`].
    #[inline]
    #[must_use]
    pub unsafe fn get_grip_indexed(self, displacement: Offset, index: usize) -> Self {
        Self(Address::new(unsafe {
            self.get_word_indexed(displacement, index)
        }))
    }

    /// Write reference element `index` of the sequence at `displacement`.
    ///
    /// # Safety
    ///
    /// As [`Grip::set_word_indexed`].
    #[inline]
    pub unsafe fn set_grip_indexed(self, displacement: Offset, index: usize, value: Self) {
        unsafe { self.set_word_indexed(displacement, index, value.raw()) };
    }

    // ------------------------------------------------------------------
    // Atomic field access
    // ------------------------------------------------------------------

    /// Hardware compare-and-swap on the word field at `offset`. Returns the
    /// witnessed value; the swap took effect iff it equals `expected`.
    ///
    /// # Safety
    ///
    /// As [`Grip::get_word`], and the field must be valid for atomic access.
    #[inline]
    pub unsafe fn compare_and_swap_word(self, offset: Offset, expected: usize, new: usize) -> usize {
        unsafe { (self.0 + offset).compare_and_swap_word(expected, new) }
    }

    /// Hardware compare-and-swap on the reference field at `offset`. Returns
    /// the witnessed grip; the swap took effect iff it equals `expected`.
    ///
    /// # Safety
    ///
    /// As [`Grip::compare_and_swap_word`].
    #[inline]
    pub unsafe fn compare_and_swap_grip(self, offset: Offset, expected: Self, new: Self) -> Self {
        Self(Address::new(unsafe {
            self.compare_and_swap_word(offset, expected.raw(), new.raw())
        }))
    }
}

impl fmt::Debug for Grip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Grip({:#x})", self.raw())
    }
}

// ============================================================================
// Reference - the language-handle face of a grip
// ============================================================================

/// The handle held by language-level code.
///
/// Under the direct scheme a reference and a grip carry the same word;
/// conversion in both directions is free. Code above the collector deals in
/// references, the collector itself deals in grips.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Reference(Grip);

impl Reference {
    /// The null reference.
    pub const ZERO: Self = Self(Grip::ZERO);

    /// Wrap a grip as a language-level handle.
    #[inline]
    #[must_use]
    pub const fn from_grip(grip: Grip) -> Self {
        Self(grip)
    }

    /// Unwrap to the underlying grip.
    #[inline]
    #[must_use]
    pub const fn to_grip(self) -> Grip {
        self.0
    }

    /// Wrap an origin address directly.
    #[inline]
    #[must_use]
    pub const fn from_origin(origin: Address) -> Self {
        Self(Grip::from_origin(origin))
    }

    /// Unwrap to the origin address.
    #[inline]
    #[must_use]
    pub const fn to_origin(self) -> Address {
        self.0.to_origin()
    }

    /// Whether this is the null reference.
    #[inline]
    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.0.is_zero()
    }
}

impl fmt::Debug for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Reference({:#x})", self.0.raw())
    }
}

// Deliberately no arithmetic on Grip or Reference: address math belongs to
// Address, and a handle that drifts off its origin is a heap-corruption bug.
const _: () = assert!(WORD_BYTES >= 4);
