//! Password generation from the OS entropy source.
//!
//! Characters are picked by rejection sampling over random bytes: a byte is
//! used only when it falls below the largest multiple of the charset size that
//! fits in 256, so every character is equally likely.

use crate::constants;
use crate::error::{Error, Result};
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroizing;

/// Letters and digits, always active.
pub const ALPHANUMERIC: &[u8] =
    b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Punctuation added when special characters are requested.
pub const SPECIAL: &[u8] = b"!@#$%^&*()_+-=[]{}|;:,.<>?";

const BATCH: usize = 64;

/// Active character set for the given options.
pub fn charset(use_special: bool) -> Vec<u8> {
    let mut set = ALPHANUMERIC.to_vec();
    if use_special {
        set.extend_from_slice(SPECIAL);
    }
    set
}

/// Generate a password of exactly `length` characters.
pub fn generate(length: usize, use_special: bool) -> Result<Zeroizing<String>> {
    generate_with(&mut OsRng, length, use_special)
}

pub fn generate_with<R: RngCore + ?Sized>(
    rng: &mut R,
    length: usize,
    use_special: bool,
) -> Result<Zeroizing<String>> {
    if length == 0 || length > constants::MAX_PASSWORD_LENGTH {
        return Err(Error::InvalidLength {
            length,
            max: constants::MAX_PASSWORD_LENGTH,
        });
    }

    let set = charset(use_special);
    let size = set.len();
    let limit = 256 - (256 % size);

    let mut out = Zeroizing::new(String::with_capacity(length));
    let mut buf = Zeroizing::new([0u8; BATCH]);
    while out.len() < length {
        rng.try_fill_bytes(&mut buf[..])
            .map_err(Error::RandomSource)?;
        for &b in buf.iter() {
            let b = b as usize;
            if b >= limit {
                continue;
            }
            out.push(set[b % size] as char);
            if out.len() == length {
                break;
            }
        }
    }
    Ok(out)
}
