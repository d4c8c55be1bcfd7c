//! A convenience module for hashing things with SHA-256 via [`ring`].

/// SHA-256 output length in bytes.
pub const OUTPUT_LEN: usize = 32;

/// SHA-256 digest a single input.
pub fn digest(input: &[u8]) -> [u8; OUTPUT_LEN] {
    digest_many(&[input])
}

/// SHA-256 digest several input slices concatenated together, without
/// allocating.
pub fn digest_many(inputs: &[&[u8]]) -> [u8; OUTPUT_LEN] {
    let mut ctx = ring::digest::Context::new(&ring::digest::SHA256);
    for input in inputs {
        ctx.update(input);
    }
    let digest = ctx.finish();
    let mut out = [0u8; OUTPUT_LEN];
    out.copy_from_slice(digest.as_ref());
    out
}

/// `SHA256(SHA256(input))`, the form sent to cards for PIN verification.
pub fn double(input: &[u8]) -> [u8; OUTPUT_LEN] {
    digest(&digest(input))
}
