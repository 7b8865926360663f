//! The `(listfile)` name index.
//!
//! Archives cannot be enumerated from their hash table alone, since it only
//! stores hashes. Most archives therefore carry a plain-text file named
//! `(listfile)` listing the names they contain.

use memchr::memchr3;

/// Name of the internal list file.
pub const LISTFILE_NAME: &str = "(listfile)";

/// Split list file content into names.
///
/// Names are separated by `;`, `\r` or `\n`. Surrounding ASCII whitespace is
/// trimmed and empty entries are skipped. Names are kept as raw bytes, since
/// they are hashed byte-wise and are often not UTF-8.
pub fn parse_listfile(data: &[u8]) -> Vec<Vec<u8>> {
    let mut names = Vec::new();
    let mut rest = data;

    loop {
        let (entry, next) = match memchr3(b';', b'\r', b'\n', rest) {
            Some(pos) => (&rest[..pos], Some(&rest[pos + 1..])),
            None => (rest, None),
        };

        let name = trim(entry);
        if !name.is_empty() {
            names.push(name.to_vec());
        }

        match next {
            Some(next) => rest = next,
            None => break,
        }
    }

    names
}

fn trim(entry: &[u8]) -> &[u8] {
    let start = entry
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(entry.len());
    let end = entry
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |i| i + 1);
    &entry[start..end]
}
