use rand::Rng;

pub const ALPHA_NUM: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Generate a random string of `len` characters taken from `charset`.
///
/// This is not suitable for secrets, only for identifiers that need to be
/// unlikely to collide, like oneM2M request ids or temporary file names.
pub fn pseudorandom_string(charset: &[u8], len: usize) -> String {
    let mut rng = rand::rng();
    (0..len)
        .map(|_| {
            let idx = rng.random_range(0..charset.len());
            charset[idx] as char
        })
        .collect()
}
