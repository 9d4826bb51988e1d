use fastcdc::v2020::{FastCDC, Normalization};

// The chunker parameters are part of the on-disk format and must never
// change, otherwise the same content no longer produces the same blocks.
pub const BLOB_MIN: u32 = 16 * 1024;
pub const BLOB_AVG: u32 = 64 * 1024;
pub const BLOB_MAX: u32 = 256 * 1024;

/// partition `data` into content-defined blocks
///
/// boundaries depend only on the bytes themselves, so an edit affects only
/// the blocks overlapping it and the concatenation of the output equals the
/// input
pub fn split(data: &[u8]) -> impl Iterator<Item = &[u8]> + '_ {
    FastCDC::with_level(data, BLOB_MIN, BLOB_AVG, BLOB_MAX, Normalization::Level1)
        .map(move |chunk| &data[chunk.offset as usize..][..chunk.length as usize])
}
