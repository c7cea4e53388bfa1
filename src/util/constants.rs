/// log2 of the number of bytes in a kilobyte
pub const LOG_BYTES_IN_KBYTE: u8 = 10;
/// log2 of the number of bytes in a megabyte
pub const LOG_BYTES_IN_MBYTE: u8 = 20;

/// The number of bytes in a 32-bit integer, the size of a narrow slot.
pub const BYTES_IN_INT: usize = 4;

#[cfg(target_pointer_width = "32")]
pub const LOG_BYTES_IN_WORD: u8 = 2;
#[cfg(target_pointer_width = "64")]
pub const LOG_BYTES_IN_WORD: u8 = 3;
/// The number of bytes in a word, the size of a wide slot and of the object header.
pub const BYTES_IN_WORD: usize = 1 << LOG_BYTES_IN_WORD;
pub const LOG_BITS_IN_WORD: usize = 3 + LOG_BYTES_IN_WORD as usize;
pub const BITS_IN_WORD: usize = 1 << LOG_BITS_IN_WORD;

pub const BYTES_IN_PAGE: usize = 1 << 12;

/// log2 of the object alignment in bytes. Objects start at addresses that are multiples of
/// this, which is also the shift used by narrow slots.
pub const LOG_MIN_OBJECT_ALIGNMENT: u8 = 3;
pub const MIN_OBJECT_ALIGNMENT: usize = 1 << LOG_MIN_OBJECT_ALIGNMENT;

/// log2 of the number of heap bytes covered by one mark bit.
pub const LOG_BYTES_PER_MARK_BIT: u8 = LOG_MIN_OBJECT_ALIGNMENT;

/// log2 of the number of bytes in a card.
pub const LOG_BYTES_IN_CARD: u8 = 9;
/// The number of bytes in a card.
pub const BYTES_IN_CARD: usize = 1 << LOG_BYTES_IN_CARD;

/// The smallest region size we accept.
pub const MIN_REGION_SIZE: usize = 4 << LOG_BYTES_IN_KBYTE;
/// The largest heap addressable by narrow slots: a 32-bit offset scaled by the object alignment.
pub const MAX_COMPRESSED_HEAP_SIZE: usize = (u32::MAX as usize).saturating_mul(MIN_OBJECT_ALIGNMENT);
