//! Heap-tree nodes and their reconstruction from indented Massif lines.
//!
//! A detailed snapshot lists its allocation tree one node per line, nested by
//! leading spaces:
//!
//! ```text
//! n3: 165527 (heap allocation functions) malloc/new/new[], --alloc-fns, etc.
//!  n1: 80000 0x1091C4: allocate_block (alloc_dealloc.c:21)
//!   n0: 80000 0x109215: main (alloc_dealloc.c:34)
//!  n0: 5000 0x490D939: ??? (in /usr/lib/x86_64-linux-gnu/libc.so.6)
//!  n0: 7823 in 4 places, all below massif's threshold (1.00%)
//! ```
//!
//! Lines collapsed below Massif's threshold are dropped: they produce no node
//! and the number of hidden children is not kept.

use crate::Result;
use crate::lines::{Line, leading_spaces, parse_int};
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use tracing::trace;

/// Leading spaces Massif adds per nesting level.
pub const INDENT_PER_LEVEL: usize = 1;

/// Address label given to every tree root.
pub const ROOT_ADDRESS: &str = "root";

/// Marker text of a collapsed "N children not shown" line.
const BELOW_THRESHOLD: &str = "below massif's threshold";

/// `n<id>: <bytes> (<label>)`
static ROOT_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^n(\d+): (\d+) \(([^)]+)\)").expect("Invalid heap tree root regex")
});

/// `n<id>: <bytes> <addr>: <label> (in <file>)` or `... (<label2>)`
static CHILD_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^n(\d+): (\d+) ([0-9A-Fa-fx]+): (.*?) \((?:in ([^)]*)|([^)]*))\)")
        .expect("Invalid heap tree child regex")
});

/// One allocation site in a snapshot's heap tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeapTreeNode {
    /// Node number from the log. Only meaningful within one tree.
    pub id: u64,
    /// Bytes attributed to this node and everything below it.
    pub memory: u64,
    /// Code address, or [`ROOT_ADDRESS`] for the root.
    pub address: String,
    /// Short function label (`???` when Massif could not symbolize).
    pub func: String,
    /// Source location, object file, or the root label.
    pub func_full_desc: String,
    /// Callers, in log order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<HeapTreeNode>,
}

impl HeapTreeNode {
    /// Pre-order walk over this node and all of its descendants.
    pub fn iter(&self) -> Iter<'_> {
        Iter { stack: vec![self] }
    }

    /// Number of nodes in this subtree, including this one.
    pub fn node_count(&self) -> usize {
        self.iter().count()
    }

    /// Number of levels in this subtree. A leaf has depth 1.
    pub fn depth(&self) -> usize {
        1 + self
            .children
            .iter()
            .map(HeapTreeNode::depth)
            .max()
            .unwrap_or(0)
    }

    /// First node (pre-order) with the given address label.
    pub fn find_by_address(&self, address: &str) -> Option<&HeapTreeNode> {
        self.iter().find(|node| node.address == address)
    }

    pub fn is_root(&self) -> bool {
        self.address == ROOT_ADDRESS
    }
}

/// Pre-order iterator returned by [`HeapTreeNode::iter`].
#[derive(Debug)]
pub struct Iter<'a> {
    stack: Vec<&'a HeapTreeNode>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = &'a HeapTreeNode;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        self.stack.extend(node.children.iter().rev());
        Some(node)
    }
}

/// Rebuilds one heap tree from its body lines.
///
/// Lines are fed in log order with [`HeapTreeBuilder::push_line`]. The depth
/// context holds the most recent node at every depth that is still open; a
/// node is attached to its parent when a line at the same or a shallower
/// depth closes it, so children keep log order. A new builder is used for
/// every tree.
#[derive(Debug)]
pub struct HeapTreeBuilder {
    indent_width: usize,
    /// Open nodes indexed by depth. Index 0 is the root.
    depth_context: Vec<HeapTreeNode>,
}

impl HeapTreeBuilder {
    /// Create a builder expecting `indent_width` spaces per nesting level.
    pub fn new(indent_width: usize) -> Self {
        Self {
            indent_width: indent_width.max(1),
            depth_context: Vec::new(),
        }
    }

    /// Whether a root line has been seen.
    pub fn has_root(&self) -> bool {
        !self.depth_context.is_empty()
    }

    /// Feed one body line.
    pub fn push_line(&mut self, line: Line<'_>) -> Result<()> {
        let (text, spaces) = leading_spaces(line.text);

        if text.contains(BELOW_THRESHOLD) {
            trace!(line = line.number, "skipping below-threshold heap tree line");
            return Ok(());
        }

        if spaces % self.indent_width != 0 {
            return Err(line.format_error(format!(
                "indentation in multiples of {} space(s)",
                self.indent_width
            )));
        }
        let depth = spaces / self.indent_width;

        if depth == 0 {
            if self.has_root() {
                return Err(line.format_error("a single heap tree root per snapshot"));
            }
            let root = Self::parse_root(text, line)?;
            self.depth_context.push(root);
            return Ok(());
        }

        if !self.has_root() {
            return Err(line.format_error("heap tree root line `n<id>: <bytes> (<label>)`"));
        }
        if depth > self.depth_context.len() {
            return Err(line.format_error(format!(
                "heap tree line at most {} level(s) deep",
                self.depth_context.len()
            )));
        }

        let node = Self::parse_child(text, line)?;
        self.close_to(depth);
        self.depth_context.push(node);
        Ok(())
    }

    /// Close every open node and return the root, if one was seen.
    pub fn finish(mut self) -> Option<HeapTreeNode> {
        self.close_to(1);
        self.depth_context.pop()
    }

    /// Attach open nodes to their parents until only `depth` levels remain.
    fn close_to(&mut self, depth: usize) {
        while self.depth_context.len() > depth.max(1) {
            if let Some(node) = self.depth_context.pop() {
                if let Some(parent) = self.depth_context.last_mut() {
                    parent.children.push(node);
                }
            }
        }
    }

    fn parse_root(text: &str, line: Line<'_>) -> Result<HeapTreeNode> {
        let caps = ROOT_LINE
            .captures(text)
            .ok_or_else(|| line.format_error("heap tree root line `n<id>: <bytes> (<label>)`"))?;
        let label = caps[3].to_string();

        Ok(HeapTreeNode {
            id: Self::int_capture(&caps, 1, "node id", line)?,
            memory: Self::int_capture(&caps, 2, "node bytes", line)?,
            address: ROOT_ADDRESS.to_string(),
            func: label.clone(),
            func_full_desc: label,
            children: Vec::new(),
        })
    }

    fn parse_child(text: &str, line: Line<'_>) -> Result<HeapTreeNode> {
        let caps = CHILD_LINE.captures(text).ok_or_else(|| {
            line.format_error("heap tree line `n<id>: <bytes> <addr>: <label> (<location>)`")
        })?;
        let full_desc = caps
            .get(5)
            .or_else(|| caps.get(6))
            .map_or("", |m| m.as_str());

        Ok(HeapTreeNode {
            id: Self::int_capture(&caps, 1, "node id", line)?,
            memory: Self::int_capture(&caps, 2, "node bytes", line)?,
            address: caps[3].to_string(),
            func: caps[4].to_string(),
            func_full_desc: full_desc.to_string(),
            children: Vec::new(),
        })
    }

    fn int_capture(
        caps: &Captures<'_>,
        group: usize,
        field: &'static str,
        line: Line<'_>,
    ) -> Result<u64> {
        parse_int(&caps[group], field, line.number)
    }
}

impl Default for HeapTreeBuilder {
    fn default() -> Self {
        Self::new(INDENT_PER_LEVEL)
    }
}

/// Build a tree from a complete body, as a convenience for callers that
/// already hold the lines.
pub fn build_tree<'a, I>(lines: I, indent_width: usize) -> Result<Option<HeapTreeNode>>
where
    I: IntoIterator<Item = Line<'a>>,
{
    let mut builder = HeapTreeBuilder::new(indent_width);
    for line in lines {
        builder.push_line(line)?;
    }
    Ok(builder.finish())
}
