use crate::{PatcherError, Platform, Result};
use std::collections::{HashMap, HashSet};
use std::fmt::{self, Write as _};

/// Byte that ends every text entry in the built-in tables.
pub const DEFAULT_TERMINATOR: u8 = 0xFE;

/// Bytes reserved for compression back-references; no character may use them.
pub const RESERVED_CODES: std::ops::RangeInclusive<u8> = 0xF0..=0xF3;

/// Pluggable text codec used by the file variant engine.
pub trait CharMap: Send + Sync {
    fn terminator(&self) -> u8;

    /// Decodes one entry's bytes (terminator excluded).
    fn decode(&self, bytes: &[u8]) -> String;

    /// Encodes one entry's text (terminator excluded). Multi-character
    /// substitutions are used only when `allow_dte` is set.
    fn encode(&self, text: &str, allow_dte: bool) -> Result<Vec<u8>>;
}

impl fmt::Debug for dyn CharMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CharMap(terminator={:#04X})", self.terminator())
    }
}

#[derive(Debug, Clone)]
struct Code {
    bytes: Vec<u8>,
    dte: bool,
}

/// Character map built from a `HEX=text` table.
#[derive(Debug, Clone)]
pub struct TableCharMap {
    terminator: u8,
    by_code: HashMap<Vec<u8>, String>,
    by_text: HashMap<String, Code>,
    lead_bytes: HashSet<u8>,
    longest_text: usize,
}

impl TableCharMap {
    fn empty(terminator: u8) -> Self {
        Self {
            terminator,
            by_code: HashMap::new(),
            by_text: HashMap::new(),
            lead_bytes: HashSet::new(),
            longest_text: 0,
        }
    }

    fn insert(&mut self, code: Vec<u8>, text: String) -> Result<()> {
        let first = code.first().copied().unwrap_or(self.terminator);
        if code.is_empty() || code.len() > 2 || text.is_empty() {
            return Err(PatcherError::Codec(format!(
                "invalid character table entry {code:02X?}={text:?}"
            )));
        }
        if RESERVED_CODES.contains(&first) || first == self.terminator {
            return Err(PatcherError::Codec(format!(
                "code {first:02X} is reserved and cannot map to {text:?}"
            )));
        }
        if code.len() == 2 {
            self.lead_bytes.insert(first);
        }
        let chars = text.chars().count();
        let dte = code.len() == 1 && chars > 1;
        self.longest_text = self.longest_text.max(chars);
        // First mapping wins for encoding so duplicate glyphs keep a stable code.
        self.by_text
            .entry(text.clone())
            .or_insert(Code { bytes: code.clone(), dte });
        self.by_code.insert(code, text);
        Ok(())
    }

    /// Parses `HEX=text` lines. Blank lines and lines starting with `#` are skipped;
    /// `\n` in a value stands for a line break.
    pub fn parse_table(src: &str, terminator: u8) -> Result<Self> {
        let mut map = Self::empty(terminator);
        for (line_no, line) in src.lines().enumerate() {
            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() || line.starts_with('#') {
                continue;
            }
            let (hex, text) = line.split_once('=').ok_or_else(|| {
                PatcherError::Codec(format!("line {}: expected HEX=text", line_no + 1))
            })?;
            let hex = hex.trim();
            if hex.is_empty() || hex.len() % 2 != 0 || hex.len() > 4 {
                return Err(PatcherError::Codec(format!(
                    "line {}: '{hex}' is not a 1- or 2-byte code",
                    line_no + 1
                )));
            }
            let code = (0..hex.len())
                .step_by(2)
                .map(|i| u8::from_str_radix(&hex[i..i + 2], 16))
                .collect::<std::result::Result<Vec<u8>, _>>()
                .map_err(|e| PatcherError::Codec(format!("line {}: {e}", line_no + 1)))?;
            map.insert(code, text.replace("\\n", "\n"))?;
        }
        Ok(map)
    }

    /// Built-in table for `platform`.
    pub fn builtin(platform: Platform) -> Self {
        let mut rows: Vec<(Vec<u8>, String)> = Vec::new();
        for (i, c) in ('0'..='9').enumerate() {
            rows.push((vec![i as u8], c.to_string()));
        }
        for (i, c) in ('A'..='Z').enumerate() {
            rows.push((vec![0x0A + i as u8], c.to_string()));
        }
        for (i, c) in ('a'..='z').enumerate() {
            rows.push((vec![0x24 + i as u8], c.to_string()));
        }
        for (i, c) in "!?-.,':()\"/+&%".chars().enumerate() {
            rows.push((vec![0x3E + i as u8], c.to_string()));
        }
        let pairs = [
            "e ", "th", "he", " t", "s ", "in", "er", "an", "re", "on", " a", "d ", "ou", "t ",
            "en", "ll",
        ];
        for (i, pair) in pairs.iter().enumerate() {
            rows.push((vec![0x50 + i as u8], pair.to_string()));
        }
        rows.push((vec![0xF8], "\n".to_string()));

        match platform {
            Platform::Psx => rows.push((vec![0xFA], " ".to_string())),
            Platform::Psp => {
                rows.push((vec![0x95], " ".to_string()));
                for (i, c) in "àáâäçèéêë".chars().enumerate() {
                    rows.push((vec![0xD1, 0x80 + i as u8], c.to_string()));
                }
            }
        }

        let mut map = Self::empty(DEFAULT_TERMINATOR);
        for (code, text) in rows {
            if let Err(e) = map.insert(code, text) {
                log::warn!("skipping built-in character row: {e}");
            }
        }
        map
    }

    fn match_escape(text: &str) -> Option<u8> {
        let bytes = text.as_bytes();
        if bytes.len() >= 4 && bytes[0] == b'{' && bytes[3] == b'}' {
            let hex = std::str::from_utf8(&bytes[1..3]).ok()?;
            return u8::from_str_radix(hex, 16).ok();
        }
        None
    }
}

impl CharMap for TableCharMap {
    fn terminator(&self) -> u8 {
        self.terminator
    }

    fn decode(&self, bytes: &[u8]) -> String {
        let mut out = String::new();
        let mut i = 0;
        while i < bytes.len() {
            let b = bytes[i];
            if self.lead_bytes.contains(&b) && i + 1 < bytes.len() {
                if let Some(text) = self.by_code.get(&bytes[i..i + 2]) {
                    out.push_str(text);
                    i += 2;
                    continue;
                }
            }
            match self.by_code.get(&bytes[i..i + 1]) {
                Some(text) => out.push_str(text),
                None => {
                    let _ = write!(out, "{{{b:02X}}}");
                }
            }
            i += 1;
        }
        out
    }

    fn encode(&self, text: &str, allow_dte: bool) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(text.len());
        let mut rest = text;
        'outer: while !rest.is_empty() {
            if let Some(byte) = Self::match_escape(rest) {
                out.push(byte);
                rest = &rest[4..];
                continue;
            }

            let boundaries: Vec<usize> = rest
                .char_indices()
                .map(|(i, _)| i)
                .skip(1)
                .chain(std::iter::once(rest.len()))
                .take(self.longest_text)
                .collect();
            for &end in boundaries.iter().rev() {
                if let Some(code) = self.by_text.get(&rest[..end]) {
                    if code.dte && !allow_dte {
                        continue;
                    }
                    out.extend_from_slice(&code.bytes);
                    rest = &rest[end..];
                    continue 'outer;
                }
            }

            let c = rest.chars().next().unwrap_or_default();
            return Err(PatcherError::Codec(format!(
                "character {c:?} has no code in the active table"
            )));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_round_trips_plain_text() {
        let map = TableCharMap::builtin(Platform::Psx);
        let bytes = map.encode("Ramza Beoulve", false).unwrap();
        assert_eq!(bytes[0], 0x0A + 17);
        assert_eq!(bytes[5], 0xFA);
        assert_eq!(map.decode(&bytes), "Ramza Beoulve");
    }

    #[test]
    fn dte_pairs_only_used_when_allowed() {
        let map = TableCharMap::builtin(Platform::Psx);
        let plain = map.encode("the", false).unwrap();
        let packed = map.encode("the", true).unwrap();
        assert_eq!(plain.len(), 3);
        assert_eq!(packed.len(), 2);
        assert_eq!(map.decode(&packed), "the");
    }

    #[test]
    fn unknown_bytes_survive_as_escapes() {
        let map = TableCharMap::builtin(Platform::Psp);
        let raw = [0x0A, 0xE7, 0x95, 0xD1, 0x86];
        let text = map.decode(&raw);
        assert_eq!(text, "A{E7} é");
        assert_eq!(map.encode(&text, false).unwrap(), raw.to_vec());
    }

    #[test]
    fn unmapped_characters_fail() {
        let map = TableCharMap::builtin(Platform::Psx);
        assert!(matches!(map.encode("é", false), Err(PatcherError::Codec(_))));
    }

    #[test]
    fn parses_tables_and_rejects_reserved_codes() {
        let map = TableCharMap::parse_table("# demo\n00=a\n01=b\n80=ab\nD100=ß\nF8=\\n\n", 0xFE).unwrap();
        assert_eq!(map.decode(&[0x00, 0x80, 0xF8, 0xD1, 0x00]), "aab\nß");
        assert_eq!(map.encode("ab", true).unwrap(), vec![0x80]);
        assert_eq!(map.encode("ab", false).unwrap(), vec![0x00, 0x01]);

        assert!(TableCharMap::parse_table("F1=x\n", 0xFE).is_err());
        assert!(TableCharMap::parse_table("FE=x\n", 0xFE).is_err());
        assert!(TableCharMap::parse_table("zz\n", 0xFE).is_err());
    }
}
