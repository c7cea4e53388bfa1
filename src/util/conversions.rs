pub const fn raw_align_up(val: usize, align: usize) -> usize {
    val.wrapping_add(align).wrapping_sub(1) & !align.wrapping_sub(1)
}

pub const fn raw_align_down(val: usize, align: usize) -> usize {
    val & !align.wrapping_sub(1)
}

pub const fn raw_is_aligned(val: usize, align: usize) -> bool {
    val & align.wrapping_sub(1) == 0
}

/// Log2 of a power of two, e.g. of the region size.
pub fn log2(val: usize) -> u8 {
    debug_assert!(val.is_power_of_two(), "{} is not a power of two", val);
    val.trailing_zeros() as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::constants::{BYTES_IN_CARD, BYTES_IN_PAGE};

    #[test]
    fn align_to_cards() {
        assert_eq!(raw_align_up(1, BYTES_IN_CARD), BYTES_IN_CARD);
        assert_eq!(raw_align_up(BYTES_IN_CARD, BYTES_IN_CARD), BYTES_IN_CARD);
        assert_eq!(raw_align_down(BYTES_IN_CARD + 7, BYTES_IN_CARD), BYTES_IN_CARD);
        assert!(raw_is_aligned(3 * BYTES_IN_PAGE, BYTES_IN_PAGE));
        assert!(!raw_is_aligned(BYTES_IN_PAGE + BYTES_IN_CARD, BYTES_IN_PAGE));
    }

    #[test]
    fn log2_of_region_sizes() {
        assert_eq!(log2(1), 0);
        assert_eq!(log2(BYTES_IN_CARD), 9);
        assert_eq!(log2(1 << 20), 20);
    }
}
