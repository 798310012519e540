//! # Block Checksum
//!
//! Every persisted block carries a 32-bit checksum in the last four bytes of
//! its trailer. The contract is verification-by-zero: sealing a block stores
//! a value chosen so that summing the *entire* block — checksum included —
//! yields exactly zero. Corruption anywhere in the block, including inside
//! the stored checksum itself, breaks the zero.
//!
//! ## Scheme
//!
//! `checksum32` is a wrapping two's-complement sum of the block interpreted
//! as big-endian u32 words. Sealing zeroes the checksum field, sums the
//! block, and stores the arithmetic negation of the sum; re-summing the
//! sealed block then folds to zero. A conventional CRC does not have this
//! sums-to-zero property (its residue over data-plus-crc is a fixed nonzero
//! magic), which is why a folded sum is used here.
//!
//! This detects torn writes and bit rot; it is not a cryptographic digest.

/// Wrapping sum of `buf` as big-endian u32 words.
///
/// `buf.len()` must be a multiple of 4; block sizes always are.
pub fn checksum32(buf: &[u8]) -> u32 {
    debug_assert_eq!(buf.len() % 4, 0);
    let mut sum = 0u32;
    for word in buf.chunks_exact(4) {
        sum = sum.wrapping_add(u32::from_be_bytes(word.try_into().unwrap())); // INVARIANT: chunks_exact(4)
    }
    sum
}

/// Computes the value to store in a checksum field that currently reads as
/// zero, such that [`verify`] passes afterwards.
pub fn seal(buf_with_zeroed_field: &[u8]) -> u32 {
    0u32.wrapping_sub(checksum32(buf_with_zeroed_field))
}

/// True iff the complete block (checksum field included) sums to zero.
pub fn verify(buf: &[u8]) -> bool {
    checksum32(buf) == 0
}
