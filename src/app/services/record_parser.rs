//! Multi-line detail record parsing
//!
//! Detail files are line-oriented text: blank lines delimit attribute
//! blocks, and each block line of the form `Key = "Value"` or `Key = Value`
//! contributes one attribute. The scanner is incremental so the same code
//! drives both whole-file backfill reads and tail-mode chunk reads: bytes
//! are pushed as they arrive, complete blocks are drained with the byte
//! offset just past each block, and an incomplete trailing block stays
//! buffered until more input (or end-of-file) arrives.

use crate::app::models::RawEntry;
use regex::Regex;

/// Parses `Key = Value` lines within one attribute block
#[derive(Debug, Clone)]
pub struct LineParser {
    attribute_line: Regex,
}

impl Default for LineParser {
    fn default() -> Self {
        Self::new()
    }
}

impl LineParser {
    pub fn new() -> Self {
        Self {
            // Quotes around the value are optional; unmatched lines are
            // ignored entirely.
            attribute_line: Regex::new(r#"^(\S+)\s+=\s+"?(.*?)"?$"#)
                .unwrap_or_else(|e| unreachable!("invalid attribute regex: {e}")),
        }
    }

    /// Parse one block of physical lines into a `RawEntry`
    pub fn parse_block(&self, lines: &[&str]) -> RawEntry {
        let mut entry = RawEntry::new();
        for line in lines {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            if let Some(caps) = self.attribute_line.captures(trimmed) {
                entry.push(&caps[1], &caps[2]);
            }
        }
        entry
    }
}

/// Incremental, restartable block scanner over raw detail file bytes.
///
/// `base_offset` is the absolute byte offset of the first unconsumed byte,
/// so offsets reported by [`EntryScanner::next_entry`] are valid checkpoint
/// positions in the source file. Malformed bytes are decoded lossily and
/// never abort a scan.
#[derive(Debug)]
pub struct EntryScanner {
    parser: LineParser,
    buffer: Vec<u8>,
    base_offset: u64,
}

impl EntryScanner {
    /// Create a scanner whose first pushed byte sits at `start_offset`
    pub fn new(start_offset: u64) -> Self {
        Self {
            parser: LineParser::new(),
            buffer: Vec::new(),
            base_offset: start_offset,
        }
    }

    /// Append a chunk of raw bytes from the source file
    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Absolute offset just past the last consumed block
    pub fn offset(&self) -> u64 {
        self.base_offset
    }

    /// Bytes currently buffered but not yet framed into a block
    pub fn pending_bytes(&self) -> usize {
        self.buffer.len()
    }

    /// Drain the next complete block, if one is terminated by a blank line.
    ///
    /// Returns the parsed entry together with the byte offset just past the
    /// terminating blank line. Empty blocks (runs of blank lines) are
    /// consumed silently.
    pub fn next_entry(&mut self) -> Option<(RawEntry, u64)> {
        loop {
            let (block_end, has_content) = self.find_block_end()?;
            let block: Vec<u8> = self.buffer.drain(..block_end).collect();
            self.base_offset += block_end as u64;

            if !has_content {
                continue;
            }

            let text = String::from_utf8_lossy(&block);
            let lines: Vec<&str> = text.lines().collect();
            let entry = self.parser.parse_block(&lines);
            if entry.is_empty() {
                // A block of only unmatched lines carries nothing usable
                continue;
            }
            return Some((entry, self.base_offset));
        }
    }

    /// Consume the trailing partial block at end-of-input.
    ///
    /// A detail file that ends without a trailing blank line still yields
    /// its final record. The scanner's offset advances past the consumed
    /// bytes.
    pub fn finish(&mut self) -> Option<RawEntry> {
        if self.buffer.is_empty() {
            return None;
        }
        let block: Vec<u8> = std::mem::take(&mut self.buffer);
        self.base_offset += block.len() as u64;

        let text = String::from_utf8_lossy(&block);
        let lines: Vec<&str> = text.lines().collect();
        let entry = self.parser.parse_block(&lines);
        (!entry.is_empty()).then_some(entry)
    }

    /// Find the end (exclusive, past the newline of the blank line) of the
    /// first complete block, along with whether it holds any non-blank line
    fn find_block_end(&self) -> Option<(usize, bool)> {
        let mut line_start = 0usize;
        let mut has_content = false;

        for (i, &b) in self.buffer.iter().enumerate() {
            if b != b'\n' {
                continue;
            }
            let line = &self.buffer[line_start..i];
            let blank = line.iter().all(|&c| c == b'\r' || c == b' ' || c == b'\t');
            if blank {
                return Some((i + 1, has_content));
            }
            has_content = true;
            line_start = i + 1;
        }
        None
    }
}
