pub const PAGE_SIZE: usize = 1 << PAGE_SIZE_BITS;
pub const PAGE_MASK: usize = PAGE_SIZE - 1;
pub const PAGE_SIZE_BITS: usize = 12;

/// First address past the lower half of an sv39 address space. Every user
/// pointer lies below it; everything from here up belongs to the kernel.
pub const USER_SPACE_END: usize = 0x0000_0040_0000_0000;
