//! Back-reference compression used by compressible text sections.
//!
//! A token is three bytes: `0xF0 | d[12:11]`, `(len - 4) << 3 | d[10:8]`, `d[7:0]`,
//! copying `len` bytes starting `d` bytes behind the write position. Every other
//! byte is a literal.

use crate::charmap::RESERVED_CODES;
use crate::{PatcherError, Result};
use std::collections::HashMap;

pub const MIN_MATCH: usize = 4;
pub const MAX_MATCH: usize = 35;
pub const MAX_DISTANCE: usize = 0x1FFF;
const MAX_CHAIN: usize = 256;

fn is_token(b: u8) -> bool {
    RESERVED_CODES.contains(&b)
}

/// Expands `input` until `entries` terminators have been produced.
///
/// Returns the literal bytes and the number of input bytes consumed. Input that
/// ends early yields whatever was decoded so far.
pub fn decompress_entries(input: &[u8], entries: usize, terminator: u8) -> Result<(Vec<u8>, usize)> {
    let mut out = Vec::with_capacity(input.len() * 2);
    let mut seen = 0usize;
    let mut pos = 0usize;

    while seen < entries && pos < input.len() {
        let b = input[pos];
        if !is_token(b) {
            out.push(b);
            pos += 1;
            if b == terminator {
                seen += 1;
            }
            continue;
        }

        if pos + 3 > input.len() {
            return Err(PatcherError::Codec(format!(
                "compression token at {pos:#X} is truncated"
            )));
        }
        let second = input[pos + 1];
        let distance =
            (((b & 0x03) as usize) << 11) | (((second & 0x07) as usize) << 8) | input[pos + 2] as usize;
        let length = (second >> 3) as usize + MIN_MATCH;
        if distance == 0 || distance > out.len() {
            return Err(PatcherError::Codec(format!(
                "compression token at {pos:#X} points {distance} bytes back into {} bytes of output",
                out.len()
            )));
        }
        pos += 3;

        let start = out.len() - distance;
        for i in 0..length {
            let copied = out[start + i];
            out.push(copied);
            if copied == terminator {
                seen += 1;
                if seen == entries {
                    break;
                }
            }
        }
    }

    Ok((out, pos))
}

fn prefix(data: &[u8], at: usize) -> Option<[u8; 4]> {
    data.get(at..at + MIN_MATCH)
        .map(|s| [s[0], s[1], s[2], s[3]])
}

/// Greedy longest-match compression of a literal byte stream.
pub fn compress(literal: &[u8]) -> Result<Vec<u8>> {
    if let Some(pos) = literal.iter().position(|&b| is_token(b)) {
        return Err(PatcherError::Codec(format!(
            "literal byte {:#04X} at {pos} collides with compression tokens",
            literal[pos]
        )));
    }

    let mut out = Vec::with_capacity(literal.len());
    let mut chains: HashMap<[u8; 4], Vec<usize>> = HashMap::new();
    let mut i = 0usize;

    while i < literal.len() {
        let mut best_len = 0usize;
        let mut best_dist = 0usize;

        if let Some(key) = prefix(literal, i) {
            if let Some(candidates) = chains.get(&key) {
                let max_len = MAX_MATCH.min(literal.len() - i);
                for &cand in candidates.iter().rev().take(MAX_CHAIN) {
                    let dist = i - cand;
                    if dist > MAX_DISTANCE {
                        break;
                    }
                    let len = (0..max_len)
                        .take_while(|&k| literal[cand + k] == literal[i + k])
                        .count();
                    if len > best_len {
                        best_len = len;
                        best_dist = dist;
                        if len == max_len {
                            break;
                        }
                    }
                }
            }
        }

        let advance = if best_len >= MIN_MATCH {
            out.push(0xF0 | ((best_dist >> 11) & 0x03) as u8);
            out.push((((best_len - MIN_MATCH) as u8) << 3) | ((best_dist >> 8) & 0x07) as u8);
            out.push((best_dist & 0xFF) as u8);
            best_len
        } else {
            out.push(literal[i]);
            1
        };

        for at in i..i + advance {
            if let Some(key) = prefix(literal, at) {
                chains.entry(key).or_default().push(at);
            }
        }
        i += advance;
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    const TERM: u8 = 0xFE;

    #[test]
    fn repeated_text_shrinks_and_expands_back() {
        let mut literal = Vec::new();
        for _ in 0..6 {
            literal.extend_from_slice(&[0x1D, 0x2B, 0x28, 0xFA, 0x10, 0x32, 0x2E, TERM]);
        }
        let packed = compress(&literal).unwrap();
        assert!(packed.len() < literal.len());
        assert!(packed.iter().any(|&b| (0xF0..=0xF3).contains(&b)));

        let (unpacked, consumed) = decompress_entries(&packed, 6, TERM).unwrap();
        assert_eq!(unpacked, literal);
        assert_eq!(consumed, packed.len());
    }

    #[test]
    fn seeded_random_text_round_trips() {
        let mut rng = StdRng::seed_from_u64(0x5EED);
        for _ in 0..20 {
            let entries = rng.gen_range(1..40);
            let mut literal = Vec::new();
            for _ in 0..entries {
                let len = rng.gen_range(0..60);
                for _ in 0..len {
                    literal.push(rng.gen_range(0x00..0x18));
                }
                literal.push(TERM);
            }
            let packed = compress(&literal).unwrap();
            let (unpacked, consumed) = decompress_entries(&packed, entries, TERM).unwrap();
            assert_eq!(unpacked, literal);
            assert_eq!(consumed, packed.len());
        }
    }

    #[test]
    fn decoding_stops_at_the_entry_count() {
        let input = [0x01, TERM, 0x02, TERM, 0x03, TERM];
        let (out, consumed) = decompress_entries(&input, 2, TERM).unwrap();
        assert_eq!(out, vec![0x01, TERM, 0x02, TERM]);
        assert_eq!(consumed, 4);
    }

    #[test]
    fn rejects_reserved_literals_and_bad_tokens() {
        assert!(compress(&[0x01, 0xF2, TERM]).is_err());
        assert!(decompress_entries(&[0x01, 0xF0, 0x00, 0x05], 1, TERM).is_err());
        assert!(decompress_entries(&[0x01, 0xF0], 1, TERM).is_err());
    }
}
