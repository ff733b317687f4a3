//! Synthetic payloads of a target size.
//!
//! The filler text consists of chunks made of lowercase letters followed by digits and a trailing
//! comma, so it always matches `^([a-z]+[0-9]+,)+$`. This is the same grammar enforced by the
//! validation rule installed through [`crate::environment`], which means enlarged objects remain
//! valid when validation is enabled.

use rand::Rng;
use serde_json::Value;

use crate::error::Result;
use crate::template::{FieldPath, Template};

const LETTERS: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const DIGITS: &[u8] = b"0123456789";
const SEPARATOR: char = ',';

const MIN_CHUNK: usize = 2;
const MAX_CHUNK: usize = 20;

/// Generates filler text of approximately `size` bytes.
///
/// For `size >= 3` the result is between `size - 1` and `size` bytes long. Smaller sizes yield a
/// single minimal chunk of three bytes.
pub fn filler<R: Rng + ?Sized>(rng: &mut R, size: usize) -> String {
    let mut text = String::with_capacity(size.max(MIN_CHUNK + 1));

    if size <= MIN_CHUNK {
        push_chunk(rng, &mut text, MIN_CHUNK);
        return text;
    }

    // Each chunk occupies its length plus one separator byte.
    while size - text.len() > MIN_CHUNK {
        let budget = size - text.len() - 1;
        let mut len = rng.random_range(MIN_CHUNK..=MAX_CHUNK).min(budget);

        // Two leftover bytes cannot hold another chunk.
        if budget - len == MIN_CHUNK {
            if len < MAX_CHUNK {
                len += 1;
            } else {
                len -= 1;
            }
        }

        push_chunk(rng, &mut text, len);
    }

    text
}

fn push_chunk<R: Rng + ?Sized>(rng: &mut R, text: &mut String, len: usize) {
    let letters = len / 2;
    let digits = len - letters;

    for _ in 0..letters {
        text.push(LETTERS[rng.random_range(0..LETTERS.len())] as char);
    }
    for _ in 0..digits {
        text.push(DIGITS[rng.random_range(0..DIGITS.len())] as char);
    }
    text.push(SEPARATOR);
}

/// Returns `true` if `text` matches `^([a-z]+[0-9]+,)+$`.
pub fn is_filler(text: &str) -> bool {
    let Some(body) = text.strip_suffix(SEPARATOR) else {
        return false;
    };

    body.split(SEPARATOR).all(|chunk| {
        let digits_at = chunk
            .find(|c: char| c.is_ascii_digit())
            .unwrap_or(chunk.len());
        let (letters, digits) = chunk.split_at(digits_at);

        !letters.is_empty()
            && !digits.is_empty()
            && letters.bytes().all(|b| b.is_ascii_lowercase())
            && digits.bytes().all(|b| b.is_ascii_digit())
    })
}

/// Returns a copy of `base` with filler text of about `size` bytes stored at `path`.
///
/// Fails if an intermediate segment of `path` is missing or not an object.
pub fn generate_payload<R: Rng + ?Sized>(
    base: &Template,
    size: usize,
    path: &FieldPath,
    rng: &mut R,
) -> Result<Template> {
    let text = filler(rng, size);
    tracing::debug!(%path, len = text.len(), "generated payload");
    base.with_field(path, Value::String(text))
}
