//! Search over the document tree without materializing it
//!
//! Plain patterns stream through the chunk cursor; regex patterns scan a
//! sliding window of adjacent chunks.

use crate::Text;
use aho_corasick::{AhoCorasick, AhoCorasickBuilder};
use memchr::memchr_iter;
use regex::Regex;
use std::io;
use std::ops::Range;

/// Carry kept in front of each chunk so regex matches can cross chunk
/// boundaries. Matches longer than a chunk plus this carry are not found.
const REGEX_CARRY: usize = 256;

/// A match found during search
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SearchMatch {
    pub byte_range: Range<usize>,
}

impl SearchMatch {
    /// Get the actual text of this match (allocates on demand)
    pub fn text(&self, text: &Text) -> String {
        text.slice(self.byte_range.start, self.byte_range.end)
            .unwrap_or_default()
    }
}

/// Options for search operations
#[derive(Clone, Debug)]
pub struct SearchOptions {
    pub case_sensitive: bool,
    pub regex: bool,
    pub limit: Option<usize>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            case_sensitive: true,
            regex: false,
            limit: None,
        }
    }
}

impl Text {
    /// Find all occurrences of a pattern in the document
    pub fn search(&self, pattern: &str, options: &SearchOptions) -> Vec<SearchMatch> {
        if pattern.is_empty() {
            return Vec::new();
        }
        if options.regex {
            regex_search(self, pattern, options)
        } else if pattern.len() == 1 && options.case_sensitive {
            byte_search(self, pattern.as_bytes()[0], options.limit)
        } else {
            plain_search(self, pattern, options)
        }
    }

    /// Find next occurrence after given position
    pub fn search_next(
        &self,
        pattern: &str,
        start_pos: usize,
        options: &SearchOptions,
    ) -> Option<SearchMatch> {
        self.search(pattern, options)
            .into_iter()
            .find(|m| m.byte_range.start > start_pos)
    }
}

/// Single-byte fast path: memchr over each chunk.
fn byte_search(text: &Text, needle: u8, limit: Option<usize>) -> Vec<SearchMatch> {
    let mut matches = Vec::new();
    let mut chunks = text.chunks(0..text.len());
    loop {
        let at = chunks.pos();
        let Some(chunk) = chunks.next() else {
            break;
        };
        for i in memchr_iter(needle, chunk.as_bytes()) {
            matches.push(SearchMatch {
                byte_range: at + i..at + i + 1,
            });
            if limit.is_some_and(|l| matches.len() >= l) {
                return matches;
            }
        }
    }
    matches
}

/// Multi-byte plain path: aho-corasick streaming over the chunk cursor, so
/// matches spanning chunk boundaries come out with absolute offsets.
fn plain_search(text: &Text, pattern: &str, options: &SearchOptions) -> Vec<SearchMatch> {
    let ac: AhoCorasick = AhoCorasickBuilder::new()
        .ascii_case_insensitive(!options.case_sensitive)
        .build([pattern])
        .expect("single-pattern automaton");
    let reader = ChunkReader {
        chunks: text.chunks(0..text.len()),
        current: &[],
    };
    let mut matches = Vec::new();
    for m in ac.stream_find_iter(reader) {
        let m = m.expect("in-memory reader does not fail");
        matches.push(SearchMatch {
            byte_range: m.start()..m.end(),
        });
        if options.limit.is_some_and(|l| matches.len() >= l) {
            break;
        }
    }
    matches
}

/// Regex path: scan each chunk prefixed with a bounded carry of the
/// previous window, deduplicating matches already reported.
fn regex_search(text: &Text, pattern: &str, options: &SearchOptions) -> Vec<SearchMatch> {
    let mut pattern_str = pattern.to_string();
    if !options.case_sensitive {
        pattern_str = format!("(?i){pattern_str}");
    }
    let re = Regex::new(&pattern_str).unwrap_or_else(|_| {
        // Fall back to a literal match if the pattern is invalid.
        Regex::new(&regex::escape(pattern)).expect("escaped literal")
    });

    let mut matches = Vec::new();
    let mut window = String::new();
    let mut window_start = 0usize;
    let mut last_end = 0usize;
    for chunk in text.chunks(0..text.len()) {
        if window.len() > REGEX_CARRY {
            let mut cut = window.len() - REGEX_CARRY;
            while !window.is_char_boundary(cut) {
                cut += 1;
            }
            window_start += cut;
            window.drain(..cut);
        }
        let boundary = window.len();
        window.push_str(chunk);
        for m in re.find_iter(&window) {
            let start = window_start + m.start();
            let end = window_start + m.end();
            // Matches ending in the carry were reported from the previous
            // window; overlapping starts would double-report.
            if m.end() <= boundary || start < last_end {
                continue;
            }
            matches.push(SearchMatch {
                byte_range: start..end,
            });
            last_end = end;
            if options.limit.is_some_and(|l| matches.len() >= l) {
                return matches;
            }
        }
    }
    matches
}

/// Adapter feeding the chunk cursor to aho-corasick's stream search.
struct ChunkReader<'a> {
    chunks: crate::Chunks<'a>,
    current: &'a [u8],
}

impl io::Read for ChunkReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.current.is_empty() {
            match self.chunks.next() {
                Some(chunk) => self.current = chunk.as_bytes(),
                None => return Ok(0),
            }
        }
        let n = self.current.len().min(buf.len());
        buf[..n].copy_from_slice(&self.current[..n]);
        self.current = &self.current[n..];
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    fn spanning_doc() -> (Arc<Text>, String) {
        let mut s = String::new();
        for i in 0..200 {
            s.push_str(&format!("row {i:04} alpha beta gamma\n"));
        }
        (Text::create(&s), s)
    }

    #[test]
    fn finds_plain_matches() {
        let (t, s) = spanning_doc();
        let matches = t.search("alpha", &SearchOptions::default());
        assert_eq!(matches.len(), 200);
        for m in &matches {
            assert_eq!(&s[m.byte_range.clone()], "alpha");
        }
    }

    #[test]
    fn finds_matches_across_chunk_boundaries() {
        // Build a document where a known token straddles the first leaf cut.
        let mut s = "x".repeat(253);
        s.push_str("NEEDLE");
        s.push_str(&"y".repeat(600));
        let t = Text::create(&s);
        assert!(t.depth() > 0, "must span multiple leaves");
        let matches = t.search("NEEDLE", &SearchOptions::default());
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].byte_range, 253..259);
    }

    #[test]
    fn case_insensitive_search() {
        let t = Text::create("Foo foo FOO fOo");
        let matches = t.search(
            "foo",
            &SearchOptions {
                case_sensitive: false,
                ..Default::default()
            },
        );
        assert_eq!(matches.len(), 4);
    }

    #[test]
    fn single_byte_fast_path() {
        let (t, s) = spanning_doc();
        let matches = t.search("\n", &SearchOptions::default());
        assert_eq!(matches.len(), s.matches('\n').count());
    }

    #[test]
    fn limit_stops_early() {
        let (t, _) = spanning_doc();
        let matches = t.search(
            "row",
            &SearchOptions {
                limit: Some(5),
                ..Default::default()
            },
        );
        assert_eq!(matches.len(), 5);
    }

    #[test]
    fn regex_search_matches() {
        let (t, _) = spanning_doc();
        let matches = t.search(
            r"row \d+",
            &SearchOptions {
                regex: true,
                ..Default::default()
            },
        );
        assert_eq!(matches.len(), 200);
        assert_eq!(matches[0].byte_range, 0..8);
    }

    #[test]
    fn search_next_skips_earlier_matches() {
        let t = Text::create("ab ab ab");
        let m = t.search_next("ab", 0, &SearchOptions::default()).unwrap();
        assert_eq!(m.byte_range, 3..5);
    }
}
