/// Vectors the dispatch table covers: 32 CPU exceptions plus 16 remapped IRQs.
pub const IDT_ENTRIES: usize = 48;

/// CPU exception raised on a page translation failure.
pub const PAGE_FAULT_VECTOR: u8 = 14;
