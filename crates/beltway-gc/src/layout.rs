//! Object layout: cells, origins, hubs, and the three object shapes.
//!
//! Every allocated object occupies a *cell*. The cell starts with a
//! two-word header and the *origin*, the address all grips carry, sits
//! immediately after it, so the header words are found at fixed negative
//! offsets from any origin, regardless of shape:
//!
//! ```text
//! [ debug tag  ]   cell - 1 word     debug builds only, outside the cell
//! [ forward    ]   origin - 2 words  forwarding slot, zero = not forwarded
//! [ hub grip   ]   origin - 1 word
//! origin:
//!   tuple      fields[0..]
//!   ref array  length, elements[0..]
//!   hybrid     tail length, fixed fields[0..], scalar tail[0..]
//! ```
//!
//! The *hub* reachable from every cell header describes the instance's
//! shape: its layout kind, its size, and the reference map (byte offsets of
//! every reference field). Hubs are ordinary heap objects with hybrid
//! layout (the reference map is their scalar tail) and the hub of hubs
//! describes hubs themselves, closing the loop.

use crate::grip::Grip;
use crate::word::{Address, Offset, Size, WORD_BYTES};

// ============================================================================
// Constants
// ============================================================================

/// Words in the cell header (forwarding slot + hub grip).
pub const CELL_HEADER_WORDS: usize = 2;

/// Byte size of the cell header.
pub const CELL_HEADER_SIZE: Size = Size::new(CELL_HEADER_WORDS * WORD_BYTES);

/// Offset of the forwarding slot from an origin.
pub const FORWARD_OFFSET: Offset = Offset::from_words(-2);

/// Offset of the hub grip from an origin.
pub const HUB_OFFSET: Offset = Offset::from_words(-1);

/// Offset of the length word (reference arrays and hybrids) from an origin.
pub const LENGTH_OFFSET: Offset = Offset::ZERO;

/// Offset of the first reference-array element from an origin.
pub const ARRAY_DATA_OFFSET: Offset = Offset::from_words(1);

/// Offset of the first fixed hybrid field from an origin.
pub const HYBRID_FIXED_OFFSET: Offset = Offset::from_words(1);

/// Sentinel word written immediately before every cell in debug builds and
/// verified by the cell visitor on every scan step.
pub const CELL_TAG_WORD: usize = 0xCE11_7A60;

/// Words occupied by the debug cell tag in front of each cell.
#[must_use]
pub const fn debug_tag_words() -> usize {
    if cfg!(debug_assertions) {
        1
    } else {
        0
    }
}

/// Byte size of the debug cell tag.
#[must_use]
pub const fn debug_tag_size() -> Size {
    Size::new(debug_tag_words() * WORD_BYTES)
}

// Hub field offsets (hubs have hybrid layout; the tail is the reference map).
const HUB_KIND_OFFSET: Offset = Offset::from_words(1);
const HUB_INSTANCE_SIZE_OFFSET: Offset = Offset::from_words(2);
const HUB_REFMAP_OFFSET: Offset = Offset::from_words(3);

/// Byte size of a hub's fixed (non-tail) field area.
pub const HUB_FIXED_SIZE: Size = Size::new(2 * WORD_BYTES);

// ============================================================================
// Layout kinds
// ============================================================================

/// The three object shapes the scanner can traverse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum LayoutKind {
    /// Fixed reference and scalar fields at fixed offsets.
    Tuple = 0,
    /// A fixed tuple part followed by a packed scalar tail; used for class
    /// metadata (hubs) proper.
    Hybrid = 1,
    /// A homogeneous sequence of references with a length prefix.
    RefArray = 2,
}

impl LayoutKind {
    /// Decode a layout kind from the word stored in a hub.
    #[must_use]
    pub const fn from_word(word: usize) -> Option<Self> {
        match word {
            0 => Some(Self::Tuple),
            1 => Some(Self::Hybrid),
            2 => Some(Self::RefArray),
            _ => None,
        }
    }
}

// ============================================================================
// Origin / cell translation
// ============================================================================

/// Translate a cell address to its object origin.
#[inline]
#[must_use]
pub fn cell_to_origin(cell: Address) -> Address {
    cell + CELL_HEADER_SIZE
}

/// Translate an object origin to its cell address.
#[inline]
#[must_use]
pub fn origin_to_cell(origin: Address) -> Address {
    origin - CELL_HEADER_SIZE
}

// ============================================================================
// Header access
// ============================================================================

/// Read the hub grip of the object at `origin`.
///
/// # Safety
///
/// `origin` must be the origin of an allocated cell.
#[inline]
#[must_use]
pub unsafe fn hub_of(origin: Address) -> Grip {
    unsafe { Grip::from_origin(Address::new((origin + HUB_OFFSET).read_word())) }
}

/// Overwrite the hub grip of the object at `origin`.
///
/// # Safety
///
/// As [`hub_of`]; `hub` must refer to a valid hub.
#[inline]
pub unsafe fn set_hub(origin: Address, hub: Grip) {
    unsafe { (origin + HUB_OFFSET).write_word(hub.raw()) };
}

/// Read the forwarding slot of the object at `origin`. Zero means the object
/// has not been evacuated this cycle; otherwise the value is the origin of
/// the object's copy.
///
/// # Safety
///
/// As [`hub_of`].
#[inline]
#[must_use]
pub unsafe fn forward_of(origin: Address) -> Address {
    unsafe { Address::new((origin + FORWARD_OFFSET).read_word()) }
}

/// Write the forwarding slot of the object at `origin`. Written exactly once
/// per object per collection, by the copy action.
///
/// # Safety
///
/// As [`hub_of`]; `target` must be the origin of the object's copy.
#[inline]
pub unsafe fn set_forward(origin: Address, target: Address) {
    unsafe { (origin + FORWARD_OFFSET).write_word(target.raw()) };
}

/// Read the length word of a reference array or hybrid at `origin`.
///
/// # Safety
///
/// `origin` must be the origin of a reference array or hybrid cell.
#[inline]
#[must_use]
pub unsafe fn read_length(origin: Address) -> usize {
    unsafe { (origin + LENGTH_OFFSET).read_word() }
}

// ============================================================================
// Reference-array element access
// ============================================================================

/// Read element `index` of the reference array at `origin`.
///
/// # Safety
///
/// `origin` must be the origin of a reference-array cell.
///
/// # Panics
///
/// Panics if `index` is out of bounds.
#[inline]
#[must_use]
pub unsafe fn ref_array_get(origin: Address, index: usize) -> Grip {
    let length = unsafe { read_length(origin) };
    assert!(index < length, "reference array index {index} out of bounds (length {length})");
    unsafe { Grip::from_origin(origin).get_grip_indexed(ARRAY_DATA_OFFSET, index) }
}

/// Write element `index` of the reference array at `origin`.
///
/// # Safety
///
/// As [`ref_array_get`]; `value` must be a valid grip or zero.
///
/// # Panics
///
/// Panics if `index` is out of bounds.
#[inline]
pub unsafe fn ref_array_set(origin: Address, index: usize, value: Grip) {
    let length = unsafe { read_length(origin) };
    assert!(index < length, "reference array index {index} out of bounds (length {length})");
    unsafe { Grip::from_origin(origin).set_grip_indexed(ARRAY_DATA_OFFSET, index, value) };
}

// ============================================================================
// Hub
// ============================================================================

/// A typed view over a hub grip.
///
/// All reads go through the grip, so a `Hub` stays usable across
/// collections as long as its grip is kept up to date (rooted, or re-read
/// from an instance header).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Hub(Grip);

impl Hub {
    /// View a grip as a hub.
    ///
    /// # Panics
    ///
    /// Debug builds panic on the zero grip.
    #[inline]
    #[must_use]
    pub fn from_grip(grip: Grip) -> Self {
        debug_assert!(!grip.is_zero(), "zero grip is not a hub");
        Self(grip)
    }

    /// The underlying grip.
    #[inline]
    #[must_use]
    pub const fn grip(self) -> Grip {
        self.0
    }

    /// The layout kind of this hub's instances.
    ///
    /// # Safety
    ///
    /// The grip must refer to a planted hub.
    ///
    /// # Panics
    ///
    /// Panics fatally if the stored kind word is not a known layout kind
    /// (heap corruption or an unimplemented case).
    #[inline]
    #[must_use]
    pub unsafe fn layout_kind(self) -> LayoutKind {
        let word = unsafe { self.0.get_word(HUB_KIND_OFFSET) };
        LayoutKind::from_word(word).unwrap_or_else(|| fatal_unknown_layout(word, self.0))
    }

    /// The instance size this hub declares: the full cell size for tuple
    /// hubs, the fixed-part size for hybrid hubs, unused (zero) for
    /// reference-array hubs.
    ///
    /// # Safety
    ///
    /// The grip must refer to a planted hub.
    #[inline]
    #[must_use]
    pub unsafe fn instance_size(self) -> Size {
        Size::new(unsafe { self.0.get_word(HUB_INSTANCE_SIZE_OFFSET) })
    }

    /// Number of entries in the reference map.
    ///
    /// # Safety
    ///
    /// The grip must refer to a planted hub.
    #[inline]
    #[must_use]
    pub unsafe fn refmap_len(self) -> usize {
        unsafe { read_length(self.0.to_origin()) }
    }

    /// Reference-map entry `index`: the byte offset, from an instance
    /// origin, of a reference field.
    ///
    /// # Safety
    ///
    /// The grip must refer to a planted hub and `index` must be below
    /// [`Hub::refmap_len`].
    #[inline]
    #[must_use]
    pub unsafe fn refmap_offset(self, index: usize) -> Offset {
        debug_assert!(index < unsafe { self.refmap_len() });
        #[allow(clippy::cast_possible_wrap)]
        Offset::new(unsafe { self.0.get_word_indexed(HUB_REFMAP_OFFSET, index) } as isize)
    }
}

// ============================================================================
// Size computation
// ============================================================================

/// Cell size of a tuple with `field_words` words of fields.
#[must_use]
pub const fn tuple_cell_size(field_words: usize) -> Size {
    Size::new((CELL_HEADER_WORDS + field_words) * WORD_BYTES)
}

/// Cell size of a reference array of `length` elements.
#[must_use]
pub const fn ref_array_cell_size(length: usize) -> Size {
    Size::new((CELL_HEADER_WORDS + 1 + length) * WORD_BYTES)
}

/// Cell size of a hybrid with a fixed part of `fixed` bytes and a scalar
/// tail of `tail_words` words.
#[must_use]
pub const fn hybrid_cell_size(fixed: Size, tail_words: usize) -> Size {
    Size::new((CELL_HEADER_WORDS + 1 + tail_words) * WORD_BYTES + fixed.bytes())
}

/// Cell size of a hub with a reference map of `refmap_len` entries.
#[must_use]
pub const fn hub_cell_size(refmap_len: usize) -> Size {
    hybrid_cell_size(HUB_FIXED_SIZE, refmap_len)
}

/// Exact cell byte extent of the object at `origin`, looked up through its
/// hub. This is what advances a linear scan from one cell to the next.
///
/// # Safety
///
/// `origin` must be the origin of an allocated cell with a valid hub.
#[inline]
#[must_use]
pub unsafe fn size_of(origin: Address) -> Size {
    let hub = Hub::from_grip(unsafe { hub_of(origin) });
    unsafe { size_with_hub(origin, hub) }
}

/// As [`size_of`], with the hub already in hand.
///
/// # Safety
///
/// As [`size_of`]; `hub` must be the hub of the object at `origin`.
#[inline]
#[must_use]
pub unsafe fn size_with_hub(origin: Address, hub: Hub) -> Size {
    match unsafe { hub.layout_kind() } {
        LayoutKind::Tuple => unsafe { hub.instance_size() },
        LayoutKind::RefArray => ref_array_cell_size(unsafe { read_length(origin) }),
        LayoutKind::Hybrid => {
            hybrid_cell_size(unsafe { hub.instance_size() }, unsafe { read_length(origin) })
        }
    }
}

// ============================================================================
// Cell planting
// ============================================================================
//
// Planting initializes a freshly allocated cell: zeroed storage, hub grip in
// the header, length word where the shape has one. The forwarding slot is
// zero by construction.

/// Plant a tuple cell. Returns the grip of the new object.
///
/// # Safety
///
/// `cell` must be freshly allocated storage of at least the hub's instance
/// size; `hub` must be a tuple hub.
pub unsafe fn plant_tuple(cell: Address, hub: Hub) -> Grip {
    let size = unsafe { hub.instance_size() };
    unsafe {
        cell.zero(size);
        set_hub(cell_to_origin(cell), hub.grip());
    }
    Grip::from_origin(cell_to_origin(cell))
}

/// Plant a reference-array cell of `length` elements, all zero.
///
/// # Safety
///
/// `cell` must be freshly allocated storage of at least
/// [`ref_array_cell_size`]`(length)`; `hub` must be a reference-array hub.
pub unsafe fn plant_ref_array(cell: Address, hub: Hub, length: usize) -> Grip {
    let origin = cell_to_origin(cell);
    unsafe {
        cell.zero(ref_array_cell_size(length));
        set_hub(origin, hub.grip());
        (origin + LENGTH_OFFSET).write_word(length);
    }
    Grip::from_origin(origin)
}

/// Plant a hybrid cell with a scalar tail of `tail_words` words.
///
/// # Safety
///
/// `cell` must be freshly allocated storage of at least
/// [`hybrid_cell_size`] for the hub's fixed size and `tail_words`; `hub`
/// must be a hybrid hub.
pub unsafe fn plant_hybrid(cell: Address, hub: Hub, tail_words: usize) -> Grip {
    let origin = cell_to_origin(cell);
    unsafe {
        cell.zero(hybrid_cell_size(hub.instance_size(), tail_words));
        set_hub(origin, hub.grip());
        (origin + LENGTH_OFFSET).write_word(tail_words);
    }
    Grip::from_origin(origin)
}

/// Plant a hub describing instances of the given shape. Returns the new hub.
///
/// `instance_size` carries the full cell size for tuple hubs, the fixed-part
/// size for hybrid hubs, and is ignored for reference-array hubs. `refmap`
/// lists the byte offsets (from an instance origin) of every reference
/// field; offsets must be word-aligned and non-negative.
///
/// # Safety
///
/// `cell` must be freshly allocated storage of at least
/// [`hub_cell_size`]`(refmap.len())`; `hubs_hub` must be the hub of hubs.
///
/// # Panics
///
/// Debug builds panic on unaligned or negative reference-map offsets.
pub unsafe fn plant_hub(
    cell: Address,
    hubs_hub: Hub,
    kind: LayoutKind,
    instance_size: Size,
    refmap: &[Offset],
) -> Hub {
    let grip = unsafe { plant_hybrid(cell, hubs_hub, refmap.len()) };
    unsafe {
        grip.set_word(HUB_KIND_OFFSET, kind as usize);
        grip.set_word(HUB_INSTANCE_SIZE_OFFSET, instance_size.bytes());
        for (index, offset) in refmap.iter().enumerate() {
            debug_assert!(offset.bytes() >= 0, "reference-map offsets are origin-relative");
            debug_assert_eq!(offset.bytes() % WORD_BYTES as isize, 0);
            #[allow(clippy::cast_sign_loss)]
            grip.set_word_indexed(HUB_REFMAP_OFFSET, index, offset.bytes() as usize);
        }
    }
    Hub::from_grip(grip)
}

/// Plant the hub of hubs: the hybrid hub that describes hubs, including
/// itself. Its hub grip points at its own origin.
///
/// # Safety
///
/// `cell` must be freshly allocated storage of at least
/// [`hub_cell_size`]`(0)`.
pub unsafe fn plant_hub_of_hubs(cell: Address) -> Hub {
    let origin = cell_to_origin(cell);
    let grip = Grip::from_origin(origin);
    unsafe {
        cell.zero(hub_cell_size(0));
        set_hub(origin, grip);
        (origin + LENGTH_OFFSET).write_word(0);
        grip.set_word(HUB_KIND_OFFSET, LayoutKind::Hybrid as usize);
        grip.set_word(HUB_INSTANCE_SIZE_OFFSET, HUB_FIXED_SIZE.bytes());
    }
    Hub::from_grip(grip)
}

// ============================================================================
// Fatal paths
// ============================================================================

/// A hub carried a layout-kind word outside the known set. This is either
/// heap corruption or an unimplemented case; neither is recoverable.
#[cold]
fn fatal_unknown_layout(word: usize, hub: Grip) -> ! {
    panic!("heap corruption: unknown layout kind word {word:#x} in hub at {:#x}", hub.raw());
}
