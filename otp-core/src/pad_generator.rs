// File:    pad_generator.rs
// Author:  apezoo
// Date:    2026-10-18
//
// Description: Writes pad files of identified pages from operating-system randomness.
//
// License:
// This project is licensed under the terms of the GNU AGPLv3 license.
// See the LICENSE.md file in the project root for full license information.

use rand::{TryRngCore, rngs::OsRng};
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::pad_store::PAGE_ID_LEN;

/// Characters page identifiers are drawn from.
pub const ID_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Characters page content is drawn from.
pub const CONTENT_ALPHABET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789!\"#$%&'()*+,-./:;<=>?@[\\]^_`{|}~";

/// Generates a new pad file of `pages` lines.
///
/// Each line is `page_length` characters: an 8-character identifier followed
/// by pad content. Characters are drawn uniformly from [`ID_ALPHABET`] and
/// [`CONTENT_ALPHABET`] by rejection sampling over OS random bytes.
/// Identifiers are unique within the file.
///
/// # Arguments
///
/// * `path` - The path where the pad file will be created.
/// * `pages` - The number of pages to write.
/// * `page_length` - Characters per page, identifier included.
///
/// # Errors
///
/// This function will return an error if `page_length` cannot hold an
/// identifier, if the OS random source fails, or if the file cannot be
/// created or written to.
pub fn generate_pad_file(path: &Path, pages: usize, page_length: usize) -> std::io::Result<()> {
    if page_length <= PAGE_ID_LEN {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("page length must exceed the {PAGE_ID_LEN}-character identifier"),
        ));
    }

    let mut sampler = AlphabetSampler::new();
    let mut out = BufWriter::new(File::create(path)?);
    let mut line = Vec::with_capacity(page_length + 1);
    let mut seen = HashSet::with_capacity(pages);
    for _ in 0..pages {
        line.clear();
        loop {
            sampler.fill(ID_ALPHABET, PAGE_ID_LEN, &mut line)?;
            if seen.insert(line.clone()) {
                break;
            }
            line.clear();
        }
        sampler.fill(CONTENT_ALPHABET, page_length - PAGE_ID_LEN, &mut line)?;
        line.push(b'\n');
        out.write_all(&line)?;
    }
    out.flush()?;
    out.into_inner().map_err(|e| e.into_error())?.sync_all()
}

/// Draws unbiased alphabet characters from buffered OS randomness.
struct AlphabetSampler {
    rng: OsRng,
    buf: Vec<u8>,
    pos: usize,
}

impl AlphabetSampler {
    fn new() -> Self {
        Self {
            rng: OsRng,
            buf: vec![0u8; 4096],
            pos: 4096,
        }
    }

    fn next_byte(&mut self) -> std::io::Result<u8> {
        if self.pos == self.buf.len() {
            // Use the failable `try_fill_bytes` and map the error to an `io::Error`.
            self.rng
                .try_fill_bytes(&mut self.buf)
                .map_err(std::io::Error::other)?;
            self.pos = 0;
        }
        let b = self.buf[self.pos];
        self.pos += 1;
        Ok(b)
    }

    fn fill(&mut self, alphabet: &[u8], count: usize, out: &mut Vec<u8>) -> std::io::Result<()> {
        // Largest multiple of the alphabet size that fits in a byte.
        let limit = 256 - 256 % alphabet.len();
        let mut written = 0;
        while written < count {
            let b = usize::from(self.next_byte()?);
            if b < limit {
                out.push(alphabet[b % alphabet.len()]);
                written += 1;
            }
        }
        Ok(())
    }
}
