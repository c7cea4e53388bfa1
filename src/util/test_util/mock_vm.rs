//! A minimal binding used by tests.
//!
//! Objects have a three word header followed by their reference fields:
//!
//! ```text
//!  word 0: mark word
//!  word 1: size of the object in bytes
//!  word 2: number of wide fields | number of narrow fields << 32
//!  wide fields, one word each
//!  narrow fields, four bytes each, padded to a word
//! ```

use std::sync::atomic::AtomicUsize;

use crate::plan::g1::G1CollectedHeap;
use crate::policy::region::{HeapRegion, RegionType};
use crate::util::constants::{BYTES_IN_INT, BYTES_IN_WORD};
use crate::util::conversions::raw_align_up;
use crate::util::mark_word::set_mark_raw;
use crate::util::options::Options;
use crate::util::{Address, MarkWord, ObjectReference};
use crate::vm::slot::{AnySlot, CompressedOops, NarrowSlot, Slot, WideSlot};
use crate::vm::{ObjectModel, Scanning, SlotVisitor, VMBinding};

pub const HEADER_WORDS: usize = 3;
const SIZE_OFFSET: usize = BYTES_IN_WORD;
const COUNTS_OFFSET: usize = 2 * BYTES_IN_WORD;

#[derive(Default)]
pub struct MockVM;

impl VMBinding for MockVM {
    type VMObjectModel = MockVM;
    type VMScanning = MockVM;
}

/// The size of an object with the given number of fields.
pub fn object_size(num_wide: usize, num_narrow: usize) -> usize {
    raw_align_up(
        (HEADER_WORDS + num_wide) * BYTES_IN_WORD + num_narrow * BYTES_IN_INT,
        BYTES_IN_WORD,
    )
}

/// Write a fresh object at `start`. All fields are null.
pub fn init_object(start: Address, num_wide: usize, num_narrow: usize) -> ObjectReference {
    let size = object_size(num_wide, num_narrow);
    crate::util::memory::zero(start, size);
    let object = ObjectReference::from_raw_address(start).unwrap();
    set_mark_raw(object, MarkWord::prototype());
    unsafe {
        (start + SIZE_OFFSET).store::<usize>(size);
        (start + COUNTS_OFFSET).store::<usize>(num_wide | (num_narrow << 32));
    }
    object
}

fn counts(object: ObjectReference) -> (usize, usize) {
    let raw = unsafe { (object.to_raw_address() + COUNTS_OFFSET).load::<usize>() };
    (raw & 0xffff_ffff, raw >> 32)
}

pub fn num_wide(object: ObjectReference) -> usize {
    counts(object).0
}

pub fn num_narrow(object: ObjectReference) -> usize {
    counts(object).1
}

pub fn wide_field(object: ObjectReference, i: usize) -> WideSlot {
    assert!(i < num_wide(object));
    WideSlot::from_address(object.to_raw_address() + (HEADER_WORDS + i) * BYTES_IN_WORD)
}

pub fn narrow_field(object: ObjectReference, oops: CompressedOops, i: usize) -> NarrowSlot {
    let (wide, narrow) = counts(object);
    assert!(i < narrow);
    oops.slot(object.to_raw_address() + (HEADER_WORDS + wide) * BYTES_IN_WORD + i * BYTES_IN_INT)
}

impl ObjectModel<MockVM> for MockVM {
    fn get_current_size(object: ObjectReference) -> usize {
        unsafe { (object.to_raw_address() + SIZE_OFFSET).load::<usize>() }
    }

    fn fill_with_dummy_object(start: Address, size: usize) {
        assert!(size >= object_size(0, 0));
        let object = init_object(start, 0, 0);
        unsafe { (object.to_raw_address() + SIZE_OFFSET).store::<usize>(size) };
    }
}

impl Scanning<MockVM> for MockVM {
    fn scan_object<V: SlotVisitor>(
        object: ObjectReference,
        oops: Option<CompressedOops>,
        visitor: &mut V,
    ) {
        let (wide, narrow) = counts(object);
        for i in 0..wide {
            visitor.visit_slot(wide_field(object, i));
        }
        if let Some(oops) = oops {
            for i in 0..narrow {
                visitor.visit_slot(narrow_field(object, oops, i));
            }
        } else {
            debug_assert_eq!(narrow, 0, "{} has narrow fields without an encoding", object);
        }
    }
}

/// Small regions and two workers, so that tests run quickly and cross many region boundaries.
pub fn test_options() -> Options {
    let mut options = Options::from_defaults();
    options.heap_size = 4 << 20;
    options.region_size = 64 << 10;
    options.threads = 2;
    options.gc_drain_stack_target_size = 4;
    options
}

pub fn new_heap() -> G1CollectedHeap<MockVM> {
    new_heap_with(|_| {})
}

pub fn new_heap_with<F: FnOnce(&mut Options)>(f: F) -> G1CollectedHeap<MockVM> {
    let mut options = test_options();
    f(&mut options);
    G1CollectedHeap::new(options).unwrap()
}

/// Take a free region and give it `region_type`.
pub fn new_region(heap: &G1CollectedHeap<MockVM>, region_type: RegionType) -> &HeapRegion {
    heap.alloc_region(region_type).unwrap()
}

/// Allocate and initialize an object in `region`.
pub fn alloc_object(
    heap: &G1CollectedHeap<MockVM>,
    region: &HeapRegion,
    num_wide: usize,
    num_narrow: usize,
) -> ObjectReference {
    let start = heap
        .allocate_in(region, object_size(num_wide, num_narrow))
        .unwrap();
    init_object(start, num_wide, num_narrow)
}

/// Allocate an object spanning several regions.
pub fn alloc_humongous(
    heap: &G1CollectedHeap<MockVM>,
    num_wide: usize,
    num_narrow: usize,
) -> ObjectReference {
    let start = heap
        .allocate_humongous(object_size(num_wide, num_narrow))
        .unwrap();
    init_object(start, num_wide, num_narrow)
}

/// Root slots outside the heap, standing in for thread stacks and globals.
pub struct RootSlots {
    cells: Box<[AtomicUsize]>,
}

impl RootSlots {
    pub fn new(objects: &[ObjectReference]) -> Self {
        let roots = Self {
            cells: objects.iter().map(|_| AtomicUsize::new(0)).collect(),
        };
        for (i, object) in objects.iter().enumerate() {
            roots.slot(i).store(*object);
        }
        roots
    }

    pub fn slot(&self, i: usize) -> WideSlot {
        WideSlot::from_address(Address::from_ref(&self.cells[i]))
    }

    pub fn get(&self, i: usize) -> Option<ObjectReference> {
        self.slot(i).load()
    }

    pub fn slots(&self) -> Vec<AnySlot> {
        (0..self.cells.len()).map(|i| self.slot(i).into()).collect()
    }
}
