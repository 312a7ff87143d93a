//! Persistent document rope with structural sharing and lock-free reads
//!
//! The tree is immutable: every edit produces a new root that shares all
//! untouched subtrees with the previous version by `Arc` handle. Multiple
//! versions coexist cheaply, which is what the diff engine's pointer-equality
//! fast paths rely on.

use arc_swap::ArcSwap;
use bytecount::count as bytecount_count;
use crossbeam::queue::SegQueue;
use memchr::{memchr, memrchr};
use std::fmt;
use std::ops::Range;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

mod search;
pub use search::{SearchMatch, SearchOptions};

/// Maximum bytes a leaf may hold; a leaf reaching this bound is split.
pub const MAX_LEAF: usize = 512;

/// Preferred leaf size; chunking cuts at this bound.
pub const BASE_LEAF: usize = 256;

/// Branch fan-out targets `2^TARGET_BRANCH_SHIFT` children.
pub const TARGET_BRANCH_SHIFT: usize = 3;

/// Auto-flush pending edits after this many operations.
const FLUSH_THRESHOLD: usize = 16;

// === Errors ===

/// Offset validation failure. Offsets are never clamped: a bad position
/// would silently corrupt every downstream position mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TextError {
    #[error("range {from}..{to} out of bounds for text of length {len}")]
    OutOfRange { from: usize, to: usize, len: usize },
    #[error("offset {offset} is not a char boundary")]
    NotCharBoundary { offset: usize },
}

// === Core Types ===

/// Rope node - a leaf owning a span of text, or a branch owning children.
#[derive(Debug)]
pub enum Text {
    Leaf {
        text: String,
        line_breaks: usize,
    },
    Node {
        len: usize,
        line_breaks: usize,
        children: Vec<Arc<Text>>,
    },
}

impl Text {
    /// Byte length of the subtree.
    #[inline]
    pub fn len(&self) -> usize {
        match self {
            Text::Leaf { text, .. } => text.len(),
            Text::Node { len, .. } => *len,
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of `\n` bytes in the subtree.
    #[inline]
    pub fn line_breaks(&self) -> usize {
        match self {
            Text::Leaf { line_breaks, .. } | Text::Node { line_breaks, .. } => *line_breaks,
        }
    }

    /// Line count: one more than the number of line breaks.
    #[inline]
    pub fn lines(&self) -> usize {
        self.line_breaks() + 1
    }

    /// Children of a branch, `None` for a leaf.
    #[inline]
    pub fn children(&self) -> Option<&[Arc<Text>]> {
        match self {
            Text::Node { children, .. } => Some(children),
            Text::Leaf { .. } => None,
        }
    }

    /// Backing text of a leaf, `None` for a branch.
    #[inline]
    pub fn leaf_text(&self) -> Option<&str> {
        match self {
            Text::Leaf { text, .. } => Some(text),
            Text::Node { .. } => None,
        }
    }

    /// Longest path from the root to a leaf, in edges.
    pub fn depth(&self) -> usize {
        match self {
            Text::Leaf { .. } => 0,
            Text::Node { children, .. } => {
                1 + children.iter().map(|c| c.depth()).max().unwrap_or(0)
            }
        }
    }

    fn leaf(text: String) -> Arc<Text> {
        let line_breaks = bytecount_count(text.as_bytes(), b'\n');
        Arc::new(Text::Leaf { text, line_breaks })
    }

    /// Plain branch constructor: recomputes sums, does not rebalance.
    fn node(children: Vec<Arc<Text>>) -> Arc<Text> {
        debug_assert!(children.len() > 1);
        let len = children.iter().map(|c| c.len()).sum();
        let line_breaks = children.iter().map(|c| c.line_breaks()).sum();
        Arc::new(Text::Node {
            len,
            line_breaks,
            children,
        })
    }
}

// === Construction ===

impl Text {
    /// Build a rope from a flat string.
    pub fn create(content: &str) -> Arc<Text> {
        if content.len() < MAX_LEAF {
            return Self::leaf(content.to_string());
        }
        Self::node_from(Self::chunk_leaves(content))
    }

    /// Build a rope from a raw byte buffer, validating UTF-8 first.
    pub fn from_utf8(bytes: &[u8]) -> Result<Arc<Text>, simdutf8::basic::Utf8Error> {
        simdutf8::basic::from_utf8(bytes).map(Self::create)
    }

    /// Cut a string into leaves of roughly `BASE_LEAF` bytes. Cut points
    /// snap down to char boundaries; the final leaf takes the remainder.
    fn chunk_leaves(content: &str) -> Vec<Arc<Text>> {
        if content.len() < MAX_LEAF {
            return vec![Self::leaf(content.to_string())];
        }
        let mut leaves = Vec::with_capacity(content.len() / BASE_LEAF + 1);
        let mut pos = 0;
        while content.len() - pos >= MAX_LEAF {
            let mut cut = pos + BASE_LEAF;
            while !content.is_char_boundary(cut) {
                cut -= 1;
            }
            leaves.push(Self::leaf(content[pos..cut].to_string()));
            pos = cut;
        }
        leaves.push(Self::leaf(content[pos..].to_string()));
        leaves
    }

    /// Rebalancing constructor. Groups `children` into runs of roughly
    /// `length >> TARGET_BRANCH_SHIFT` bytes, flattening oversized branches
    /// into their children and coalescing adjacent small leaves. A single
    /// resulting group is returned directly, never wrapped.
    fn node_from(children: Vec<Arc<Text>>) -> Arc<Text> {
        debug_assert!(!children.is_empty());
        if children.len() == 1 {
            return children.into_iter().next().expect("one child");
        }
        let length: usize = children.iter().map(|c| c.len()).sum();
        let mut builder = NodeBuilder {
            chunk: length >> TARGET_BRANCH_SHIFT,
            groups: Vec::new(),
            current: Vec::new(),
            current_len: 0,
        };
        for child in children {
            builder.add(child);
        }
        builder.finish(length)
    }
}

struct NodeBuilder {
    chunk: usize,
    groups: Vec<Arc<Text>>,
    current: Vec<Arc<Text>>,
    current_len: usize,
}

impl NodeBuilder {
    fn add(&mut self, child: Arc<Text>) {
        // Oversized branches dissolve into their children.
        if child.len() > 2 * self.chunk {
            if let Text::Node { children, .. } = &*child {
                for c in children {
                    self.add(c.clone());
                }
                return;
            }
        }
        // Coalesce adjacent small leaves left over from splice decomposition.
        if let (Some(last), Text::Leaf { text, .. }) = (self.current.last(), &*child) {
            if let Text::Leaf { text: prev, .. } = &**last {
                if prev.len() + text.len() <= BASE_LEAF {
                    let mut merged = String::with_capacity(prev.len() + text.len());
                    merged.push_str(prev);
                    merged.push_str(text);
                    self.current_len += text.len();
                    *self.current.last_mut().expect("nonempty") = Text::leaf(merged);
                    return;
                }
            }
        }
        if !self.current.is_empty() && self.current_len + child.len() > self.chunk {
            self.flush();
        }
        self.current_len += child.len();
        self.current.push(child);
    }

    fn flush(&mut self) {
        let group = std::mem::take(&mut self.current);
        self.current_len = 0;
        match group.len() {
            0 => {}
            1 => self.groups.push(group.into_iter().next().expect("one member")),
            _ => self.groups.push(Text::node_from(group)),
        }
    }

    fn finish(mut self, length: usize) -> Arc<Text> {
        self.flush();
        if self.groups.len() == 1 {
            return self.groups.pop().expect("one group");
        }
        let line_breaks = self.groups.iter().map(|g| g.line_breaks()).sum();
        Arc::new(Text::Node {
            len: length,
            line_breaks,
            children: self.groups,
        })
    }
}

// === Read Operations ===

impl Text {
    /// The substring covering `[from, to)`.
    pub fn slice(&self, from: usize, to: usize) -> Result<String, TextError> {
        self.check_range(from, to)?;
        let mut out = String::with_capacity(to - from);
        self.slice_into(from, to, &mut out);
        Ok(out)
    }

    fn slice_into(&self, from: usize, to: usize, out: &mut String) {
        if from >= to {
            return;
        }
        match self {
            Text::Leaf { text, .. } => out.push_str(&text[from..to]),
            Text::Node { children, .. } => {
                let mut off = 0;
                for child in children {
                    let end = off + child.len();
                    if end > from && off < to {
                        let lo = from.saturating_sub(off);
                        let hi = (to - off).min(child.len());
                        child.slice_into(lo, hi, out);
                    }
                    if end >= to {
                        break;
                    }
                    off = end;
                }
            }
        }
    }

    /// True when `offset` sits on a char boundary (or at 0 / len).
    pub fn is_char_boundary(&self, offset: usize) -> bool {
        if offset == 0 || offset == self.len() {
            return true;
        }
        if offset > self.len() {
            return false;
        }
        match self {
            Text::Leaf { text, .. } => text.is_char_boundary(offset),
            Text::Node { children, .. } => {
                let mut off = 0;
                for child in children {
                    let end = off + child.len();
                    if offset < end {
                        return child.is_char_boundary(offset - off);
                    }
                    off = end;
                }
                true
            }
        }
    }

    fn check_range(&self, from: usize, to: usize) -> Result<(), TextError> {
        if from > to || to > self.len() {
            return Err(TextError::OutOfRange {
                from,
                to,
                len: self.len(),
            });
        }
        if !self.is_char_boundary(from) {
            return Err(TextError::NotCharBoundary { offset: from });
        }
        if !self.is_char_boundary(to) {
            return Err(TextError::NotCharBoundary { offset: to });
        }
        Ok(())
    }

    /// Forward chunk cursor over `range`.
    ///
    /// Panics if the range is out of bounds; in-range iteration has no
    /// failure modes.
    pub fn chunks(&self, range: Range<usize>) -> Chunks<'_> {
        assert!(
            range.start <= range.end && range.end <= self.len(),
            "chunk range {}..{} out of bounds for text of length {}",
            range.start,
            range.end,
            self.len()
        );
        Chunks {
            root: self,
            stack: Vec::new(),
            leaf: None,
            leaf_start: 0,
            pos: range.start,
            end: range.end,
        }
    }

    /// Reverse chunk cursor: yields the same chunks as [`Text::chunks`],
    /// last chunk first. Chunk contents are in normal byte order.
    pub fn chunks_rev(&self, range: Range<usize>) -> RevChunks<'_> {
        assert!(
            range.start <= range.end && range.end <= self.len(),
            "chunk range {}..{} out of bounds for text of length {}",
            range.start,
            range.end,
            self.len()
        );
        RevChunks {
            root: self,
            stack: Vec::new(),
            leaf: None,
            leaf_start: 0,
            start: range.start,
            pos: range.end,
        }
    }

    /// Position of the first `\n` at or after `pos`.
    pub fn find_next_newline(&self, pos: usize) -> Option<usize> {
        let mut chunks = self.chunks(pos.min(self.len())..self.len());
        loop {
            let at = chunks.pos();
            let chunk = chunks.next()?;
            if let Some(i) = memchr(b'\n', chunk.as_bytes()) {
                return Some(at + i);
            }
        }
    }

    /// Position of the last `\n` strictly before `pos`.
    pub fn find_prev_newline(&self, pos: usize) -> Option<usize> {
        let mut chunks = self.chunks_rev(0..pos.min(self.len()));
        loop {
            let (chunk, start) = chunks.next_with_pos()?;
            if let Some(i) = memrchr(b'\n', chunk.as_bytes()) {
                return Some(start + i);
            }
        }
    }
}

impl fmt::Display for Text {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for chunk in self.chunks(0..self.len()) {
            f.write_str(chunk)?;
        }
        Ok(())
    }
}

impl PartialEq for Text {
    /// Content equality. Reference identity short-circuits, then length,
    /// then a chunk-by-chunk comparison tolerant of unaligned boundaries.
    fn eq(&self, other: &Self) -> bool {
        if std::ptr::eq(self, other) {
            return true;
        }
        if self.len() != other.len() || self.line_breaks() != other.line_breaks() {
            return false;
        }
        let mut a = self.chunks(0..self.len());
        let mut b = other.chunks(0..other.len());
        let mut ca: &[u8] = &[];
        let mut cb: &[u8] = &[];
        loop {
            if ca.is_empty() {
                ca = a.next().map(str::as_bytes).unwrap_or(&[]);
            }
            if cb.is_empty() {
                cb = b.next().map(str::as_bytes).unwrap_or(&[]);
            }
            if ca.is_empty() || cb.is_empty() {
                return ca.is_empty() && cb.is_empty();
            }
            let n = ca.len().min(cb.len());
            if ca[..n] != cb[..n] {
                return false;
            }
            ca = &ca[n..];
            cb = &cb[n..];
        }
    }
}

impl Eq for Text {}

// === Write Operation ===

impl Text {
    /// Replace `[from, to)` with `insert`, returning a new root.
    ///
    /// The old tree is untouched; unchanged subtrees are shared by handle
    /// between the two versions.
    pub fn replace(
        self: &Arc<Self>,
        from: usize,
        to: usize,
        insert: &str,
    ) -> Result<Arc<Text>, TextError> {
        self.check_range(from, to)?;
        Ok(Self::replace_inner(self, from, to, insert))
    }

    fn replace_inner(node: &Arc<Text>, from: usize, to: usize, insert: &str) -> Arc<Text> {
        let new_len = node.len() - (to - from) + insert.len();

        // Small-document fast path: the whole result fits in one leaf.
        if new_len <= BASE_LEAF {
            let mut s = String::with_capacity(new_len);
            node.slice_into(0, from, &mut s);
            s.push_str(insert);
            node.slice_into(to, node.len(), &mut s);
            return Self::leaf(s);
        }

        match &**node {
            Text::Leaf { text, .. } => {
                let mut s = String::with_capacity(new_len);
                s.push_str(&text[..from]);
                s.push_str(insert);
                s.push_str(&text[to..]);
                Self::node_from(Self::chunk_leaves(&s))
            }
            Text::Node { len, children, .. } => {
                let chunk = len >> TARGET_BRANCH_SHIFT;

                // Single-child fast path: edit contained in one child whose
                // new size stays inside the acceptable band. Siblings are
                // shared untouched, which the diff engine depends on.
                let mut off = 0;
                for (i, child) in children.iter().enumerate() {
                    let end = off + child.len();
                    if from >= off && to <= end {
                        let child_len = child.len() - (to - from) + insert.len();
                        if child_len <= 2 * chunk && child_len >= chunk >> TARGET_BRANCH_SHIFT {
                            let mut new_children = children.clone();
                            new_children[i] =
                                Self::replace_inner(child, from - off, to - off, insert);
                            return Self::node(new_children);
                        }
                        break;
                    }
                    if off >= to {
                        break;
                    }
                    off = end;
                }

                // General path: keep untouched children, decompose the
                // touched boundary children, splice the insert, rebalance.
                tracing::trace!(from, to, inserted = insert.len(), "structural rebuild");
                let mut parts: Vec<Arc<Text>> = Vec::with_capacity(children.len() + 2);
                let mut spliced = false;
                let mut off = 0;
                for child in children {
                    let end = off + child.len();
                    if end <= from {
                        parts.push(child.clone());
                    } else if off >= to {
                        if !spliced {
                            Self::push_insert(&mut parts, insert);
                            spliced = true;
                        }
                        parts.push(child.clone());
                    } else {
                        if from > off {
                            Self::decompose_start(child, from - off, &mut parts);
                        }
                        if !spliced {
                            Self::push_insert(&mut parts, insert);
                            spliced = true;
                        }
                        if to < end {
                            Self::decompose_end(child, to - off, &mut parts);
                        }
                    }
                    off = end;
                }
                if !spliced {
                    Self::push_insert(&mut parts, insert);
                }
                Self::node_from(parts)
            }
        }
    }

    fn push_insert(parts: &mut Vec<Arc<Text>>, insert: &str) {
        if !insert.is_empty() {
            parts.extend(Self::chunk_leaves(insert));
        }
    }

    /// Push the portion of `node` before `to` onto `target`. Only called
    /// with `0 < to`; `to == len` pushes the node handle unchanged.
    fn decompose_start(node: &Arc<Text>, to: usize, target: &mut Vec<Arc<Text>>) {
        debug_assert!(to > 0 && to <= node.len());
        if to == node.len() {
            target.push(node.clone());
            return;
        }
        match &**node {
            Text::Leaf { text, .. } => target.push(Self::leaf(text[..to].to_string())),
            Text::Node { children, .. } => {
                let mut off = 0;
                for child in children {
                    let end = off + child.len();
                    if end <= to {
                        target.push(child.clone());
                    } else {
                        if to > off {
                            Self::decompose_start(child, to - off, target);
                        }
                        break;
                    }
                    off = end;
                }
            }
        }
    }

    /// Push the portion of `node` at and after `from` onto `target`. Only
    /// called with `from < len`; `from == 0` pushes the node handle
    /// unchanged.
    fn decompose_end(node: &Arc<Text>, from: usize, target: &mut Vec<Arc<Text>>) {
        debug_assert!(from < node.len());
        if from == 0 {
            target.push(node.clone());
            return;
        }
        match &**node {
            Text::Leaf { text, .. } => target.push(Self::leaf(text[from..].to_string())),
            Text::Node { children, .. } => {
                let mut off = 0;
                for child in children {
                    let end = off + child.len();
                    if off >= from {
                        target.push(child.clone());
                    } else if end > from {
                        Self::decompose_end(child, from - off, target);
                    }
                    off = end;
                }
            }
        }
    }
}

// === Chunk Cursors ===

/// Stack frame for cursor traversal: a branch, the index of the child the
/// cursor is inside, and that child's absolute start offset.
struct Frame<'a> {
    node: &'a Text,
    idx: usize,
    child_start: usize,
}

/// Forward iterator over the leaf chunks covering a byte range.
pub struct Chunks<'a> {
    root: &'a Text,
    stack: Vec<Frame<'a>>,
    leaf: Option<&'a str>,
    leaf_start: usize,
    pos: usize,
    end: usize,
}

impl<'a> Chunks<'a> {
    /// Absolute offset of the next byte the cursor will yield.
    #[inline]
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Advance `n` bytes without touching the skipped content; the next
    /// chunk is located by tree descent.
    pub fn skip(&mut self, n: usize) {
        self.pos = (self.pos + n).min(self.end);
        self.stack.clear();
        self.leaf = None;
    }

    /// Locate the leaf containing `self.pos`, rebuilding the stack.
    fn descend(&mut self) -> Option<(&'a str, usize)> {
        self.stack.clear();
        let mut node = self.root;
        let mut start = 0;
        loop {
            match node {
                Text::Leaf { text, .. } => return Some((text.as_str(), start)),
                Text::Node { children, .. } => {
                    let mut off = start;
                    let mut found = None;
                    for (i, child) in children.iter().enumerate() {
                        let end = off + child.len();
                        if self.pos < end {
                            found = Some((i, off));
                            break;
                        }
                        off = end;
                    }
                    let (i, child_start) = found?;
                    self.stack.push(Frame {
                        node,
                        idx: i,
                        child_start,
                    });
                    node = &children[i];
                    start = child_start;
                }
            }
        }
    }

    /// Move to the leaf after the current stack position.
    fn advance(&mut self) -> Option<(&'a str, usize)> {
        while let Some(frame) = self.stack.last_mut() {
            let branch: &'a Text = frame.node;
            let children = match branch {
                Text::Node { children, .. } => children,
                Text::Leaf { .. } => unreachable!("stack holds branches only"),
            };
            if frame.idx + 1 < children.len() {
                frame.child_start += children[frame.idx].len();
                frame.idx += 1;
                let start = frame.child_start;
                let mut node: &'a Text = &children[frame.idx];
                loop {
                    match node {
                        Text::Leaf { text, .. } => return Some((text.as_str(), start)),
                        Text::Node { children, .. } => {
                            self.stack.push(Frame {
                                node,
                                idx: 0,
                                child_start: start,
                            });
                            node = &children[0];
                        }
                    }
                }
            }
            self.stack.pop();
        }
        None
    }
}

impl<'a> Iterator for Chunks<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        if self.pos >= self.end {
            return None;
        }
        let leaf = self.leaf;
        let (text, start) = match leaf {
            Some(t) if self.pos < self.leaf_start + t.len() && self.pos >= self.leaf_start => {
                (t, self.leaf_start)
            }
            Some(t) if self.pos == self.leaf_start + t.len() => self.advance()?,
            _ => self.descend()?,
        };
        self.leaf = Some(text);
        self.leaf_start = start;
        let lo = self.pos - start;
        let hi = (self.end - start).min(text.len());
        self.pos = start + hi;
        Some(&text[lo..hi])
    }
}

/// Reverse iterator over the leaf chunks covering a byte range.
pub struct RevChunks<'a> {
    root: &'a Text,
    stack: Vec<Frame<'a>>,
    leaf: Option<&'a str>,
    leaf_start: usize,
    start: usize,
    pos: usize,
}

impl<'a> RevChunks<'a> {
    /// Next chunk together with its absolute start offset.
    pub fn next_with_pos(&mut self) -> Option<(&'a str, usize)> {
        if self.pos <= self.start {
            return None;
        }
        let leaf = self.leaf;
        let (text, start) = match leaf {
            Some(t) if self.pos > self.leaf_start && self.pos <= self.leaf_start + t.len() => {
                (t, self.leaf_start)
            }
            Some(_) if self.pos == self.leaf_start => self.retreat()?,
            _ => self.descend()?,
        };
        self.leaf = Some(text);
        self.leaf_start = start;
        let hi = self.pos - start;
        let lo = self.start.saturating_sub(start).min(hi);
        self.pos = start + lo;
        Some((&text[lo..hi], start + lo))
    }

    /// Locate the leaf containing byte `self.pos - 1`, rebuilding the stack.
    fn descend(&mut self) -> Option<(&'a str, usize)> {
        self.stack.clear();
        let target = self.pos - 1;
        let mut node = self.root;
        let mut start = 0;
        loop {
            match node {
                Text::Leaf { text, .. } => return Some((text.as_str(), start)),
                Text::Node { children, .. } => {
                    let mut off = start;
                    let mut found = None;
                    for (i, child) in children.iter().enumerate() {
                        let end = off + child.len();
                        if target < end {
                            found = Some((i, off));
                            break;
                        }
                        off = end;
                    }
                    let (i, child_start) = found?;
                    self.stack.push(Frame {
                        node,
                        idx: i,
                        child_start,
                    });
                    node = &children[i];
                    start = child_start;
                }
            }
        }
    }

    /// Move to the leaf before the current stack position.
    fn retreat(&mut self) -> Option<(&'a str, usize)> {
        while let Some(frame) = self.stack.last_mut() {
            let branch: &'a Text = frame.node;
            let children = match branch {
                Text::Node { children, .. } => children,
                Text::Leaf { .. } => unreachable!("stack holds branches only"),
            };
            if frame.idx > 0 {
                frame.idx -= 1;
                frame.child_start -= children[frame.idx].len();
                let mut node: &'a Text = &children[frame.idx];
                let mut start = frame.child_start;
                loop {
                    match node {
                        Text::Leaf { text, .. } => return Some((text.as_str(), start)),
                        Text::Node { children, .. } => {
                            let last = children.len() - 1;
                            let child_start =
                                start + node.len() - children[last].len();
                            self.stack.push(Frame {
                                node,
                                idx: last,
                                child_start,
                            });
                            node = &children[last];
                            start = child_start;
                        }
                    }
                }
            }
            self.stack.pop();
        }
        None
    }
}

impl<'a> Iterator for RevChunks<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        self.next_with_pos().map(|(chunk, _)| chunk)
    }
}

// === Document Snapshot Holder ===

/// Buffered edit operations; positions address the document as it stands
/// when the edit is applied, after all earlier queued edits.
#[derive(Clone, Debug)]
pub enum Edit {
    Insert { pos: usize, text: String },
    Delete { range: Range<usize> },
    Replace { range: Range<usize>, text: String },
}

/// The document - readers get immutable snapshots, writers buffer edits.
pub struct Doc {
    /// Current immutable snapshot for readers (lock-free).
    snapshot: ArcSwap<Text>,
    /// Buffered edits waiting to be applied.
    pending: SegQueue<Edit>,
    /// Approximate count of pending edits for auto-flush.
    pending_count: AtomicUsize,
    /// Monotonic version counter.
    version: AtomicU64,
}

impl Doc {
    pub fn new() -> Self {
        Self::from_str("")
    }

    pub fn from_str(text: &str) -> Self {
        Self {
            snapshot: ArcSwap::new(Text::create(text)),
            pending: SegQueue::new(),
            pending_count: AtomicUsize::new(0),
            version: AtomicU64::new(0),
        }
    }

    /// Current snapshot; later edits never affect it.
    pub fn read(&self) -> Arc<Text> {
        self.snapshot.load_full()
    }

    /// Queue an edit, flushing automatically past the batching threshold.
    pub fn edit(&self, edit: Edit) -> Result<(), TextError> {
        self.pending.push(edit);
        let count = self.pending_count.fetch_add(1, Ordering::Relaxed) + 1;
        if count >= FLUSH_THRESHOLD {
            return self.flush();
        }
        Ok(())
    }

    /// Apply all pending edits and publish one new snapshot. An
    /// out-of-range edit aborts the whole batch: the snapshot is left
    /// unchanged and the batch is discarded, since later queued positions
    /// assumed the failed edit had applied.
    pub fn flush(&self) -> Result<(), TextError> {
        let mut edits = Vec::new();
        while let Some(edit) = self.pending.pop() {
            edits.push(edit);
        }
        if edits.is_empty() {
            return Ok(());
        }
        self.pending_count.store(0, Ordering::Relaxed);

        let mut text = self.snapshot.load_full();
        for edit in &edits {
            text = match edit {
                Edit::Insert { pos, text: s } => text.replace(*pos, *pos, s)?,
                Edit::Delete { range } => text.replace(range.start, range.end, "")?,
                Edit::Replace { range, text: s } => text.replace(range.start, range.end, s)?,
            };
        }
        tracing::debug!(edits = edits.len(), "flushed batch");
        self.snapshot.store(text);
        self.version.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Relaxed)
    }

    /// Swap in a previously captured snapshot (undo/redo support).
    pub fn replace_snapshot(&self, text: Arc<Text>) {
        self.snapshot.store(text);
        self.version.fetch_add(1, Ordering::Relaxed);
    }
}

impl Default for Doc {
    fn default() -> Self {
        Self::new()
    }
}

// === Tests ===
