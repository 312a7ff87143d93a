//! Structural diff between two rope versions
//!
//! Exploits structural sharing first: subtrees shared by `Arc` handle are
//! skipped in O(1), so diffing after an edit costs tree depth plus the size
//! of the changed region. Where sharing breaks down the engine falls back to
//! token-level and then character-level LCS, with hard caps that keep the
//! cost proportional to the divergent region instead of the document.

use quill_text::Text;
use std::cell::Cell as StatCell;
use std::ops::Range;
use std::sync::Arc;

/// Node-level scanning stops once the size threshold shrinks below this.
const MIN_NODE_SCAN_SIZE: usize = 256;

/// Node-level scanning bails out when a span would produce more tokens.
const MAX_NODE_SCAN_LEN: usize = 40;

/// Character-level LCS only runs when both divergent middles fit this cap;
/// larger spans are reported whole. Precision traded for bounded cost.
const MAX_FULL_TEXT_DIFF_SIZE: usize = 256;

/// Spans whose lengths differ by more than this ratio skip node scanning.
const MAX_DIFF_RATIO: usize = 10;

/// A region `[from_a, to_a)` of document A replaced by `[from_b, to_b)`
/// of document B.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChangedRange {
    pub from_a: usize,
    pub to_a: usize,
    pub from_b: usize,
    pub to_b: usize,
}

/// Work counters for one diff call. When structural sharing is effective
/// these stay proportional to the edited region, not the document.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DiffStats {
    /// Tree nodes touched by the structural walk and token collection.
    pub nodes_visited: usize,
    /// Bytes compared while trimming and matching token content.
    pub bytes_compared: usize,
    /// Dynamic-programming cells filled across all LCS tables.
    pub dp_cells: usize,
}

/// Ordered, non-overlapping changed regions describing how `b` differs
/// from `a`. Reference-identical ropes return an empty vector immediately.
pub fn changed_ranges(a: &Arc<Text>, b: &Arc<Text>) -> Vec<ChangedRange> {
    changed_ranges_with_stats(a, b).0
}

/// Like [`changed_ranges`], also returning the work counters.
pub fn changed_ranges_with_stats(a: &Arc<Text>, b: &Arc<Text>) -> (Vec<ChangedRange>, DiffStats) {
    let mut differ = Differ {
        a,
        b,
        out: Vec::new(),
        stats: DiffStats::default(),
    };
    if !Arc::ptr_eq(a, b) {
        differ.find_diff(a, b, 0, 0);
    }
    debug_assert!(differ
        .out
        .windows(2)
        .all(|w| w[0].to_a <= w[1].from_a && w[0].to_b <= w[1].from_b));
    (differ.out, differ.stats)
}

struct Differ<'a> {
    a: &'a Arc<Text>,
    b: &'a Arc<Text>,
    out: Vec<ChangedRange>,
    stats: DiffStats,
}

impl Differ<'_> {
    /// Structural phase: narrow the differing region by skipping shared
    /// children from both ends, descending while a single pair differs.
    fn find_diff(&mut self, a: &Arc<Text>, b: &Arc<Text>, mut pos_a: usize, mut pos_b: usize) {
        self.stats.nodes_visited += 2;
        if Arc::ptr_eq(a, b) {
            return;
        }
        let (Some(ca), Some(cb)) = (a.children(), b.children()) else {
            // A leaf is involved; only content comparison is left.
            return self.text_diff(
                pos_a..pos_a + a.len(),
                pos_b..pos_b + b.len(),
            );
        };

        let mut start_a = 0;
        let mut start_b = 0;
        while start_a < ca.len() && start_b < cb.len() && Arc::ptr_eq(&ca[start_a], &cb[start_b]) {
            pos_a += ca[start_a].len();
            pos_b += cb[start_b].len();
            start_a += 1;
            start_b += 1;
        }
        let mut end_a = ca.len();
        let mut end_b = cb.len();
        while end_a > start_a && end_b > start_b && Arc::ptr_eq(&ca[end_a - 1], &cb[end_b - 1]) {
            end_a -= 1;
            end_b -= 1;
        }

        if end_a - start_a == 1 && end_b - start_b == 1 {
            return self.find_diff(&ca[start_a], &cb[start_b], pos_a, pos_b);
        }

        let left_a: usize = ca[start_a..end_a].iter().map(|c| c.len()).sum();
        let left_b: usize = cb[start_b..end_b].iter().map(|c| c.len()).sum();
        if left_a == 0 && left_b == 0 {
            return;
        }
        if left_a == 0 || left_b == 0 {
            // Pure insertion or deletion between shared children.
            self.out.push(ChangedRange {
                from_a: pos_a,
                to_a: pos_a + left_a,
                from_b: pos_b,
                to_b: pos_b + left_b,
            });
            return;
        }

        let max_size = left_a.max(left_b) / 2;
        self.node_diff(&ca[start_a..end_a], &cb[start_b..end_b], pos_a, pos_b, max_size);
    }

    /// Approximate node-level diff: tokenize both spans into sub-nodes no
    /// larger than `max_size`, LCS over the tokens, recurse into changed
    /// token runs with a halved threshold.
    fn node_diff(
        &mut self,
        nodes_a: &[Arc<Text>],
        nodes_b: &[Arc<Text>],
        pos_a: usize,
        pos_b: usize,
        max_size: usize,
    ) {
        let len_a: usize = nodes_a.iter().map(|c| c.len()).sum();
        let len_b: usize = nodes_b.iter().map(|c| c.len()).sum();
        if len_a == 0 && len_b == 0 {
            return;
        }
        if len_a == 0 || len_b == 0 {
            self.out.push(ChangedRange {
                from_a: pos_a,
                to_a: pos_a + len_a,
                from_b: pos_b,
                to_b: pos_b + len_b,
            });
            return;
        }
        // Disproportionate sides make node matching unproductive.
        if len_a > MAX_DIFF_RATIO * len_b || len_b > MAX_DIFF_RATIO * len_a {
            tracing::trace!(len_a, len_b, "size ratio bailout to text diff");
            return self.text_diff(pos_a..pos_a + len_a, pos_b..pos_b + len_b);
        }
        if max_size < MIN_NODE_SCAN_SIZE {
            return self.text_diff(pos_a..pos_a + len_a, pos_b..pos_b + len_b);
        }
        let (Some(tokens_a), Some(tokens_b)) = (
            collect_tokens(nodes_a, max_size),
            collect_tokens(nodes_b, max_size),
        ) else {
            return self.text_diff(pos_a..pos_a + len_a, pos_b..pos_b + len_b);
        };
        self.stats.nodes_visited += tokens_a.len() + tokens_b.len();

        let starts_a = token_starts(&tokens_a, pos_a);
        let starts_b = token_starts(&tokens_b, pos_b);

        let bytes = StatCell::new(0usize);
        let eq = |i: usize, j: usize| token_eq(&tokens_a[i], &tokens_b[j], &bytes);
        let (regions, cells) = lcs_regions(tokens_a.len(), tokens_b.len(), eq);
        self.stats.dp_cells += cells;
        self.stats.bytes_compared += bytes.get();

        for region in regions {
            self.node_diff(
                &tokens_a[region.a.clone()],
                &tokens_b[region.b.clone()],
                starts_a[region.a.start],
                starts_b[region.b.start],
                max_size / 2,
            );
        }
    }

    /// Character-level diff of `[span_a)` in A against `[span_b)` in B.
    /// Trims the common prefix and suffix through the chunk cursors, then
    /// either runs the LCS on the divergent middles or, past the size cap,
    /// reports the whole trimmed span as changed.
    fn text_diff(&mut self, span_a: Range<usize>, span_b: Range<usize>) {
        let la = span_a.end - span_a.start;
        let lb = span_b.end - span_b.start;

        let mut pre = self.common_prefix(span_a.clone(), span_b.clone());
        while pre > 0
            && (!self.a.is_char_boundary(span_a.start + pre)
                || !self.b.is_char_boundary(span_b.start + pre))
        {
            pre -= 1;
        }
        let mut suf = self.common_suffix(span_a.clone(), span_b.clone(), la.min(lb) - pre);
        while suf > 0
            && (!self.a.is_char_boundary(span_a.end - suf)
                || !self.b.is_char_boundary(span_b.end - suf))
        {
            suf -= 1;
        }

        let da = span_a.start + pre..span_a.end - suf;
        let db = span_b.start + pre..span_b.end - suf;
        if da.is_empty() && db.is_empty() {
            return;
        }
        if da.is_empty() || db.is_empty() {
            self.out.push(ChangedRange {
                from_a: da.start,
                to_a: da.end,
                from_b: db.start,
                to_b: db.end,
            });
            return;
        }
        if da.len() > MAX_FULL_TEXT_DIFF_SIZE || db.len() > MAX_FULL_TEXT_DIFF_SIZE {
            tracing::trace!(
                len_a = da.len(),
                len_b = db.len(),
                "divergent span over cap, reported whole"
            );
            self.out.push(ChangedRange {
                from_a: da.start,
                to_a: da.end,
                from_b: db.start,
                to_b: db.end,
            });
            return;
        }

        let sa = self
            .a
            .slice(da.start, da.end)
            .expect("trimmed span is char-aligned");
        let sb = self
            .b
            .slice(db.start, db.end)
            .expect("trimmed span is char-aligned");
        let chars_a: Vec<(usize, char)> = sa.char_indices().collect();
        let chars_b: Vec<(usize, char)> = sb.char_indices().collect();
        let off_a = |i: usize| if i == chars_a.len() { sa.len() } else { chars_a[i].0 };
        let off_b = |j: usize| if j == chars_b.len() { sb.len() } else { chars_b[j].0 };

        let eq = |i: usize, j: usize| chars_a[i].1 == chars_b[j].1;
        let (regions, cells) = lcs_regions(chars_a.len(), chars_b.len(), eq);
        self.stats.dp_cells += cells;

        for region in regions {
            self.out.push(ChangedRange {
                from_a: da.start + off_a(region.a.start),
                to_a: da.start + off_a(region.a.end),
                from_b: db.start + off_b(region.b.start),
                to_b: db.start + off_b(region.b.end),
            });
        }
    }

    /// Matched byte count from the front of both spans.
    fn common_prefix(&mut self, span_a: Range<usize>, span_b: Range<usize>) -> usize {
        let mut ca = self.a.chunks(span_a);
        let mut cb = self.b.chunks(span_b);
        let mut xa: &[u8] = &[];
        let mut xb: &[u8] = &[];
        let mut matched = 0;
        loop {
            if xa.is_empty() {
                xa = ca.next().map(str::as_bytes).unwrap_or(&[]);
            }
            if xb.is_empty() {
                xb = cb.next().map(str::as_bytes).unwrap_or(&[]);
            }
            if xa.is_empty() || xb.is_empty() {
                return matched;
            }
            let n = xa.len().min(xb.len());
            let p = xa[..n]
                .iter()
                .zip(&xb[..n])
                .take_while(|(x, y)| x == y)
                .count();
            matched += p;
            self.stats.bytes_compared += p + 1;
            if p < n {
                return matched;
            }
            xa = &xa[n..];
            xb = &xb[n..];
        }
    }

    /// Matched byte count from the back of both spans, capped so it never
    /// overlaps the already-matched prefix.
    fn common_suffix(&mut self, span_a: Range<usize>, span_b: Range<usize>, cap: usize) -> usize {
        let mut ca = self.a.chunks_rev(span_a);
        let mut cb = self.b.chunks_rev(span_b);
        let mut xa: &[u8] = &[];
        let mut xb: &[u8] = &[];
        let mut matched = 0;
        loop {
            if xa.is_empty() {
                xa = ca.next().map(str::as_bytes).unwrap_or(&[]);
            }
            if xb.is_empty() {
                xb = cb.next().map(str::as_bytes).unwrap_or(&[]);
            }
            if xa.is_empty() || xb.is_empty() || matched >= cap {
                return matched;
            }
            let n = xa.len().min(xb.len()).min(cap - matched);
            let p = xa[xa.len() - n..]
                .iter()
                .rev()
                .zip(xb[xb.len() - n..].iter().rev())
                .take_while(|(x, y)| x == y)
                .count();
            matched += p;
            self.stats.bytes_compared += p + 1;
            if p < n {
                return matched;
            }
            xa = &xa[..xa.len() - n];
            xb = &xb[..xb.len() - n];
        }
    }
}

/// Flatten `nodes` into tokens no larger than `max_size` bytes (leaves stay
/// whole). `None` when the span needs more than `MAX_NODE_SCAN_LEN` tokens.
fn collect_tokens(nodes: &[Arc<Text>], max_size: usize) -> Option<Vec<Arc<Text>>> {
    fn go(node: &Arc<Text>, max_size: usize, out: &mut Vec<Arc<Text>>) -> bool {
        if node.len() > max_size {
            if let Some(children) = node.children() {
                return children.iter().all(|c| go(c, max_size, out));
            }
        }
        out.push(node.clone());
        out.len() <= MAX_NODE_SCAN_LEN
    }
    let mut out = Vec::new();
    for node in nodes {
        if !go(node, max_size, &mut out) {
            return None;
        }
    }
    Some(out)
}

/// Absolute start offset of each token, plus one past-the-end entry.
fn token_starts(tokens: &[Arc<Text>], base: usize) -> Vec<usize> {
    let mut starts = Vec::with_capacity(tokens.len() + 1);
    let mut pos = base;
    for t in tokens {
        starts.push(pos);
        pos += t.len();
    }
    starts.push(pos);
    starts
}

/// Opaque token equality: same handle, or two leaves of equal length and
/// equal text. Branches never compare by content; a false negative only
/// widens a region that deeper recursion then narrows.
fn token_eq(x: &Arc<Text>, y: &Arc<Text>, bytes: &StatCell<usize>) -> bool {
    if Arc::ptr_eq(x, y) {
        return true;
    }
    if x.len() != y.len() {
        return false;
    }
    match (x.leaf_text(), y.leaf_text()) {
        (Some(a), Some(b)) => {
            bytes.set(bytes.get() + a.len());
            a == b
        }
        _ => false,
    }
}

// === LCS core ===

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Flag {
    Del,
    Ins,
    Same,
}

/// One DP cell: the LCS length reaching it, and the run of the edit-script
/// choice that produced it. Explicit fields instead of packed bits.
#[derive(Clone, Copy)]
struct Cell {
    len: u32,
    run: u32,
    flag: Flag,
}

/// A changed run in token-index space: `a` deleted, `b` inserted.
struct Region {
    a: Range<usize>,
    b: Range<usize>,
}

/// Dense-table LCS over two token sequences of lengths `n` and `m`.
/// Returns the maximal non-Same runs in left-to-right order, plus the
/// number of cells filled. Ties prefer insertion when the insert-run
/// length is not less than the delete-run length.
fn lcs_regions(n: usize, m: usize, eq: impl Fn(usize, usize) -> bool) -> (Vec<Region>, usize) {
    let w = m + 1;
    let mut table = vec![
        Cell {
            len: 0,
            run: 0,
            flag: Flag::Same
        };
        (n + 1) * w
    ];
    for j in 1..=m {
        table[j] = Cell {
            len: 0,
            run: j as u32,
            flag: Flag::Ins,
        };
    }
    for i in 1..=n {
        table[i * w] = Cell {
            len: 0,
            run: i as u32,
            flag: Flag::Del,
        };
    }

    for i in 1..=n {
        for j in 1..=m {
            let del = table[(i - 1) * w + j];
            let ins = table[i * w + j - 1];
            let diag = table[(i - 1) * w + j - 1];
            table[i * w + j] = if eq(i - 1, j - 1) {
                Cell {
                    len: diag.len + 1,
                    run: if diag.flag == Flag::Same { diag.run + 1 } else { 1 },
                    flag: Flag::Same,
                }
            } else {
                let del_run = if del.flag == Flag::Del { del.run + 1 } else { 1 };
                let ins_run = if ins.flag == Flag::Ins { ins.run + 1 } else { 1 };
                if ins.len > del.len || (ins.len == del.len && ins_run >= del_run) {
                    Cell {
                        len: ins.len,
                        run: ins_run,
                        flag: Flag::Ins,
                    }
                } else {
                    Cell {
                        len: del.len,
                        run: del_run,
                        flag: Flag::Del,
                    }
                }
            };
        }
    }

    // Backtrack from the bottom-right corner; regions come out reversed.
    let mut regions: Vec<Region> = Vec::new();
    let mut open: Option<(usize, usize)> = None;
    let (mut i, mut j) = (n, m);
    while i > 0 || j > 0 {
        match table[i * w + j].flag {
            Flag::Same => {
                if let Some((ea, eb)) = open.take() {
                    regions.push(Region { a: i..ea, b: j..eb });
                }
                i -= 1;
                j -= 1;
            }
            Flag::Ins => {
                open.get_or_insert((i, j));
                j -= 1;
            }
            Flag::Del => {
                open.get_or_insert((i, j));
                i -= 1;
            }
        }
    }
    if let Some((ea, eb)) = open {
        regions.push(Region { a: 0..ea, b: 0..eb });
    }
    regions.reverse();
    (regions, (n + 1) * w)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn digits(len: usize) -> String {
        "0123456789".chars().cycle().take(len).collect()
    }

    #[test]
    fn lcs_reports_single_replacement() {
        let a: Vec<char> = "abcdef".chars().collect();
        let b: Vec<char> = "abXdef".chars().collect();
        let (regions, _) = lcs_regions(a.len(), b.len(), |i, j| a[i] == b[j]);
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].a, 2..3);
        assert_eq!(regions[0].b, 2..3);
    }

    #[test]
    fn lcs_reports_disjoint_runs() {
        let a: Vec<char> = "abcdefgh".chars().collect();
        let b: Vec<char> = "aXcdefYh".chars().collect();
        let (regions, _) = lcs_regions(a.len(), b.len(), |i, j| a[i] == b[j]);
        assert_eq!(regions.len(), 2);
        assert_eq!(regions[0].a, 1..2);
        assert_eq!(regions[1].a, 6..7);
    }

    #[test]
    fn lcs_pure_insertion_and_deletion() {
        let a: Vec<char> = "ac".chars().collect();
        let b: Vec<char> = "abc".chars().collect();
        let (regions, _) = lcs_regions(a.len(), b.len(), |i, j| a[i] == b[j]);
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].a, 1..1);
        assert_eq!(regions[0].b, 1..2);

        let (regions, _) = lcs_regions(b.len(), a.len(), |i, j| b[i] == a[j]);
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].a, 1..2);
        assert_eq!(regions[0].b, 1..1);
    }

    #[test]
    fn lcs_empty_inputs() {
        let (regions, cells) = lcs_regions(0, 0, |_, _| unreachable!());
        assert!(regions.is_empty());
        assert_eq!(cells, 1);
    }

    #[test]
    fn identical_reference_is_empty() {
        let t = Text::create(&digits(10_000));
        assert!(changed_ranges(&t, &t).is_empty());
    }

    #[test]
    fn value_equal_different_shape_is_empty() {
        let content = digits(4_000);
        let a = Text::create(&content);
        // Same content assembled through appends: different tree shape, no
        // shared subtrees.
        let mut b = Text::create("");
        let mut pos = 0;
        for chunk in content.as_bytes().chunks(100) {
            let s = std::str::from_utf8(chunk).unwrap();
            b = b.replace(pos, pos, s).unwrap();
            pos += s.len();
        }
        assert_eq!(*a, *b);
        assert!(changed_ranges(&a, &b).is_empty());
    }

    #[test]
    fn single_edit_reports_exact_range() {
        let a = Text::create(&digits(10_000));
        let b = a.replace(5_000, 5_020, "WXYZ").unwrap();
        assert_eq!(
            changed_ranges(&a, &b),
            vec![ChangedRange {
                from_a: 5_000,
                to_a: 5_020,
                from_b: 5_000,
                to_b: 5_004,
            }]
        );
    }

    #[test]
    fn disjoint_edits_report_shifted_ranges() {
        let a = Text::create(&digits(2_000));
        let b = a.replace(100, 101, "").unwrap();
        // Position 1800 of the original document sits at 1799 after the
        // one-byte deletion.
        let b = b.replace(1_799, 1_799, "!").unwrap();
        assert_eq!(
            changed_ranges(&a, &b),
            vec![
                ChangedRange { from_a: 100, to_a: 101, from_b: 100, to_b: 100 },
                ChangedRange { from_a: 1_800, to_a: 1_800, from_b: 1_799, to_b: 1_800 },
            ]
        );
    }

    #[test]
    fn pure_append_is_single_insertion() {
        let a = Text::create(&digits(5_000));
        let b = a.replace(5_000, 5_000, "tail").unwrap();
        assert_eq!(
            changed_ranges(&a, &b),
            vec![ChangedRange {
                from_a: 5_000,
                to_a: 5_000,
                from_b: 5_000,
                to_b: 5_004,
            }]
        );
    }

    #[test]
    fn unrelated_documents_stay_bounded() {
        let a = Text::create(&digits(120_000));
        let reversed: String = digits(120_000).chars().rev().collect();
        let b = Text::create(&reversed);
        let (ranges, stats) = changed_ranges_with_stats(&a, &b);
        assert!(!ranges.is_empty());
        let budget = 4 * (a.len() + b.len());
        assert!(
            stats.bytes_compared + stats.dp_cells < budget,
            "diff cost {} + {} exceeded budget {}",
            stats.bytes_compared,
            stats.dp_cells,
            budget
        );
    }

    #[test]
    fn ranges_cover_every_difference() {
        // Reconstruct B from A plus the reported ranges; equality proves
        // the ranges cover all differences.
        let content = digits(8_000);
        let a = Text::create(&content);
        let mut b = a.replace(200, 300, "first patch").unwrap();
        b = b.replace(4_000, 4_000, "second").unwrap();
        b = b.replace(7_000, 7_500, "").unwrap();
        let ranges = changed_ranges(&a, &b);
        assert!(!ranges.is_empty());

        let mut rebuilt = String::new();
        let mut pos_a = 0;
        for r in &ranges {
            rebuilt.push_str(&a.slice(pos_a, r.from_a).unwrap());
            rebuilt.push_str(&b.slice(r.from_b, r.to_b).unwrap());
            pos_a = r.to_a;
        }
        rebuilt.push_str(&a.slice(pos_a, a.len()).unwrap());
        assert_eq!(rebuilt, b.to_string());
    }
}
