use crate::{Error, ErrorKind, Result};

pub fn u8_to_bool(val: u8, what: &str) -> Result<bool> {
    match val {
        0 => Ok(false),
        1 => Ok(true),
        v => err!(MalformedFrame, desc: "invalid bool {:?}, {:?}", what, v),
    }
}

pub fn bool_to_u8(val: bool) -> u8 {
    match val {
        true => 1,
        false => 0,
    }
}

/// Skip `n` bytes from `stream`, a field may legitimately end exactly at the end of
/// the stream.
pub fn advance(stream: &[u8], n: usize) -> Result<&[u8]> {
    if n <= stream.len() {
        Ok(&stream[n..])
    } else {
        err!(InsufficientBytes, desc: "insufficient bytes in frame {}/{}", n, stream.len())
    }
}

/// Fold a 128-bit cityhash into 32 bits, stable across processes and platforms.
pub fn hash32<U: AsRef<[u8]>>(data: &U) -> u32 {
    let hash = cityhash_rs::cityhash_110_128(data.as_ref());
    let hash = (hash & 0xFFFFFFFFFFFFFFFF) ^ ((hash >> 64) & 0xFFFFFFFFFFFFFFFF);
    ((hash & 0xFFFFFFFF) ^ ((hash >> 32) & 0xFFFFFFFF)) as u32
}

/// Words are made up of ascii alpha-numeric characters and underscore.
pub fn is_word(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
}

#[cfg(test)]
#[path = "util_test.rs"]
mod util_test;
