//! Metadata and snapshot recognizers.
//!
//! [`MassifParser`] is driven by the caller: one [`MassifParser::read_metadata`]
//! call, then [`MassifParser::read_snapshot`] until it returns
//! [`SnapshotStep::EndOfInput`]. Any error stops the parser; later calls
//! report [`ParseError::Usage`] instead of guessing where the next block is.

use crate::heap_tree::{HeapTreeBuilder, HeapTreeNode, INDENT_PER_LEVEL};
use crate::lines::LineCursor;
use crate::{Metadata, ParseError, Result, Snapshot, TimeUnit};
use std::io::BufRead;
use tracing::debug;

/// Parser settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParserConfig {
    /// Leading spaces per heap-tree nesting level.
    ///
    /// Massif itself writes one space per level. Logs laid out with two
    /// spaces per level (a child indented by two spaces directly under its
    /// root) are rejected as depth jumps unless this is set to 2.
    pub indent_width: usize,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            indent_width: INDENT_PER_LEVEL,
        }
    }
}

/// Outcome of one [`MassifParser::read_snapshot`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotStep {
    /// A complete snapshot block was parsed.
    Snapshot(Snapshot),
    /// The input ended where the next block would have started.
    EndOfInput,
}

/// Where the cursor sits between calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Position {
    /// Nothing read yet.
    Header,
    /// A delimiter was consumed; a snapshot block follows.
    BlockStart,
    /// Input is exhausted.
    Exhausted,
    /// A previous call failed.
    Failed,
}

/// Pull parser for a Massif log.
#[derive(Debug)]
pub struct MassifParser<R> {
    lines: LineCursor<R>,
    config: ParserConfig,
    position: Position,
}

impl<R: BufRead> MassifParser<R> {
    /// Create a parser with the default configuration.
    pub fn new(reader: R) -> Self {
        Self::with_config(reader, ParserConfig::default())
    }

    /// Create a parser with a custom configuration.
    pub fn with_config(reader: R, config: ParserConfig) -> Self {
        Self {
            lines: LineCursor::new(reader),
            config,
            position: Position::Header,
        }
    }

    pub fn config(&self) -> &ParserConfig {
        &self.config
    }

    /// Number of the last line consumed.
    pub fn line_num(&self) -> usize {
        self.lines.line_num()
    }

    /// Parse the `desc`, `cmd` and `time_unit` header lines.
    ///
    /// On success the cursor is past the first delimiter, or at end of input
    /// for a log without snapshots. Nothing is returned unless all three
    /// lines validate.
    pub fn read_metadata(&mut self) -> Result<Metadata> {
        match self.position {
            Position::Header => {}
            Position::Failed => return Err(ParseError::Usage("parser stopped after an error")),
            _ => return Err(ParseError::Usage("metadata header already read")),
        }

        let result = self.parse_metadata();
        if result.is_err() {
            self.position = Position::Failed;
        }
        result
    }

    /// Parse the next snapshot block.
    ///
    /// Returns [`SnapshotStep::EndOfInput`] without producing a snapshot once
    /// the input is exhausted between blocks.
    pub fn read_snapshot(&mut self) -> Result<SnapshotStep> {
        match self.position {
            Position::BlockStart => {}
            Position::Exhausted => return Ok(SnapshotStep::EndOfInput),
            Position::Header => return Err(ParseError::Usage("metadata header not read yet")),
            Position::Failed => return Err(ParseError::Usage("parser stopped after an error")),
        }

        let result = self.parse_snapshot();
        if result.is_err() {
            self.position = Position::Failed;
        }
        result.map(SnapshotStep::Snapshot)
    }

    fn parse_metadata(&mut self) -> Result<Metadata> {
        self.lines.expect_line("`desc: <description>`")?;
        let line = self.lines.current();
        let description = line
            .text
            .strip_prefix("desc: ")
            .filter(|desc| !desc.is_empty())
            .ok_or_else(|| line.format_error("`desc: <description>`"))?
            .to_string();

        self.lines.expect_line("`cmd: <command>`")?;
        let line = self.lines.current();
        let command = line
            .text
            .strip_prefix("cmd: ")
            .ok_or_else(|| line.format_error("`cmd: <command>`"))?
            .to_string();

        self.lines.expect_line("`time_unit: <unit>`")?;
        let line = self.lines.current();
        let time_unit = line
            .text
            .strip_prefix("time_unit: ")
            .and_then(TimeUnit::from_token)
            .ok_or_else(|| line.format_error("`time_unit: i|B|ms|auto`"))?;

        self.enter_next_block()?;

        debug!(
            desc = %description,
            cmd = %command,
            time_unit = %time_unit,
            "parsed massif header"
        );

        Ok(Metadata {
            description,
            command,
            time_unit,
        })
    }

    fn parse_snapshot(&mut self) -> Result<Snapshot> {
        let id = self.next_int("snapshot")?;
        self.expect_delimiter()?;
        let time = self.next_int("time")?;
        let mem_heap_b = self.next_int("mem_heap_B")?;
        let mem_heap_extra_b = self.next_int("mem_heap_extra_B")?;
        let mem_stacks_b = self.next_int("mem_stacks_B")?;

        self.lines.expect_line("`heap_tree=<kind>`")?;
        let (detailed, is_peak) = match self.lines.current().value_of("heap_tree")? {
            "detailed" => (true, false),
            "peak" => (true, true),
            _ => (false, false),
        };

        let heap_tree = if detailed {
            Some(self.parse_heap_tree()?)
        } else {
            self.enter_next_block()?;
            None
        };

        debug!(
            id,
            time,
            mem_heap_b,
            is_peak,
            nodes = heap_tree.as_ref().map_or(0, HeapTreeNode::node_count),
            "parsed snapshot"
        );

        Ok(Snapshot {
            id,
            time,
            mem_heap_b,
            mem_heap_extra_b,
            mem_stacks_b,
            is_peak,
            heap_tree,
        })
    }

    /// Consume the tree body up to the next delimiter or end of input.
    fn parse_heap_tree(&mut self) -> Result<HeapTreeNode> {
        let mut builder = HeapTreeBuilder::new(self.config.indent_width);

        loop {
            if !self.lines.advance()? {
                self.position = Position::Exhausted;
                break;
            }
            let line = self.lines.current();
            if line.is_delimiter() {
                if !builder.has_root() {
                    return Err(line.format_error("heap tree root line `n<id>: <bytes> (<label>)`"));
                }
                self.position = Position::BlockStart;
                break;
            }
            builder.push_line(line)?;
        }

        builder.finish().ok_or_else(|| ParseError::UnexpectedEof {
            line: self.lines.line_num(),
            expected: "heap tree root line".to_string(),
        })
    }

    /// Accept a delimiter (another block follows) or end of input.
    fn enter_next_block(&mut self) -> Result<()> {
        if !self.lines.advance()? {
            self.position = Position::Exhausted;
            return Ok(());
        }

        let line = self.lines.current();
        if line.is_delimiter() {
            self.position = Position::BlockStart;
            Ok(())
        } else {
            Err(line.format_error("snapshot delimiter or end of input"))
        }
    }

    fn expect_delimiter(&mut self) -> Result<()> {
        self.lines.expect_line("snapshot delimiter")?;
        let line = self.lines.current();
        if line.is_delimiter() {
            Ok(())
        } else {
            Err(line.format_error("snapshot delimiter"))
        }
    }

    fn next_int(&mut self, key: &'static str) -> Result<u64> {
        self.lines.expect_line(&format!("`{}=<value>`", key))?;
        self.lines.current().int_value_of(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use std::io::Cursor;

    const HEADER: &str = "desc: --massif.out\ncmd: ./file/path\ntime_unit: i\n";

    fn parser(input: &str) -> MassifParser<Cursor<&str>> {
        MassifParser::new(Cursor::new(input))
    }

    fn block(id: u64, heap_tree: &str) -> String {
        format!(
            "#-----------\nsnapshot={}\n#-----------\ntime={}\nmem_heap_B={}\nmem_heap_extra_B=8\nmem_stacks_B=0\nheap_tree={}\n",
            id,
            id * 1000,
            id * 100,
            heap_tree
        )
    }

    #[test]
    fn metadata_only() {
        let mut p = parser(HEADER);
        let meta = p.read_metadata().unwrap();

        assert_eq!(meta.description, "--massif.out");
        assert_eq!(meta.command, "./file/path");
        assert_eq!(meta.time_unit, TimeUnit::Instructions);
        assert_eq!(p.read_snapshot().unwrap(), SnapshotStep::EndOfInput);
        assert_eq!(p.read_snapshot().unwrap(), SnapshotStep::EndOfInput);
    }

    #[test]
    fn all_time_units() {
        for (token, expected) in [
            ("i", TimeUnit::Instructions),
            ("B", TimeUnit::Bytes),
            ("ms", TimeUnit::Milliseconds),
            ("auto", TimeUnit::Auto),
        ] {
            let input = format!("desc: --massif.out\ncmd: ./file/path\ntime_unit: {}\n", token);
            let meta = parser(&input).read_metadata().unwrap();
            assert_eq!(meta.time_unit, expected);
        }
    }

    #[test]
    fn unsupported_time_unit_is_format_error() {
        let mut p = parser("desc: --massif.out\ncmd: ./file/path\ntime_unit: weird\n");
        let err = p.read_metadata().unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Format);
        assert!(matches!(
            err,
            ParseError::Format { line: 3, found, .. } if found == "time_unit: weird"
        ));
        assert!(matches!(p.read_snapshot(), Err(ParseError::Usage(_))));
    }

    #[test]
    fn empty_description_is_rejected() {
        let err = parser("desc: \ncmd: ./a\ntime_unit: i\n").read_metadata().unwrap_err();
        assert!(matches!(err, ParseError::Format { line: 1, .. }));
    }

    #[test]
    fn wrong_header_order_is_rejected() {
        let err = parser("cmd: ./a\ndesc: x\ntime_unit: i\n").read_metadata().unwrap_err();
        assert!(matches!(err, ParseError::Format { line: 1, .. }));
    }

    #[test]
    fn truncated_header_is_unexpected_eof() {
        let err = parser("desc: x\ncmd: ./a\n").read_metadata().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnexpectedEof);
    }

    #[test]
    fn junk_after_header_is_rejected() {
        let input = format!("{}snapshot=0\n", HEADER);
        let err = parser(&input).read_metadata().unwrap_err();
        assert!(matches!(err, ParseError::Format { line: 4, .. }));
    }

    #[test]
    fn metadata_twice_is_usage_error() {
        let mut p = parser(HEADER);
        p.read_metadata().unwrap();
        assert!(matches!(p.read_metadata(), Err(ParseError::Usage(_))));
    }

    #[test]
    fn snapshot_before_metadata_is_usage_error() {
        let mut p = parser(HEADER);
        let err = p.read_snapshot().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Usage);
    }

    #[test]
    fn empty_snapshots_then_end_of_input() {
        let input = format!("{}{}{}", HEADER, block(0, "empty"), block(1, "empty"));
        let mut p = parser(&input);
        p.read_metadata().unwrap();

        let SnapshotStep::Snapshot(first) = p.read_snapshot().unwrap() else {
            panic!("expected a snapshot");
        };
        assert_eq!(first.id, 0);
        assert!(first.heap_tree.is_none());
        assert!(!first.is_peak);

        let SnapshotStep::Snapshot(second) = p.read_snapshot().unwrap() else {
            panic!("expected a snapshot");
        };
        assert_eq!(second.id, 1);
        assert_eq!(second.time, 1000);
        assert_eq!(second.mem_heap_b, 100);
        assert_eq!(second.mem_heap_extra_b, 8);
        assert_eq!(second.mem_stacks_b, 0);

        assert_eq!(p.read_snapshot().unwrap(), SnapshotStep::EndOfInput);
    }

    #[test]
    fn declared_ids_are_kept() {
        let input = format!("{}{}{}", HEADER, block(7, "empty"), block(3, "empty"));
        let mut p = parser(&input);
        p.read_metadata().unwrap();

        let mut ids = Vec::new();
        while let SnapshotStep::Snapshot(s) = p.read_snapshot().unwrap() {
            ids.push(s.id);
        }
        assert_eq!(ids, vec![7, 3]);
    }

    #[test]
    fn detailed_snapshot_reads_tree_until_delimiter() {
        let input = format!(
            "{}{}n3: 165527 (heap allocation functions)\n n0: 5000 0x490D939: ??? (in libc.so)\n{}",
            HEADER,
            block(45, "detailed"),
            block(46, "empty")
        );
        let mut p = parser(&input);
        p.read_metadata().unwrap();

        let SnapshotStep::Snapshot(detailed) = p.read_snapshot().unwrap() else {
            panic!("expected a snapshot");
        };
        assert!(!detailed.is_peak);
        let tree = detailed.heap_tree.unwrap();
        assert_eq!(tree.id, 3);
        assert_eq!(tree.children.len(), 1);
        assert_eq!(tree.children[0].address, "0x490D939");
        assert_eq!(tree.children[0].func, "???");

        let SnapshotStep::Snapshot(next) = p.read_snapshot().unwrap() else {
            panic!("expected a snapshot");
        };
        assert_eq!(next.id, 46);
        assert!(next.heap_tree.is_none());
        assert_eq!(p.read_snapshot().unwrap(), SnapshotStep::EndOfInput);
    }

    #[test]
    fn peak_snapshot_at_end_of_input() {
        let input = format!(
            "{}{}n1: 200 (heap allocation functions)\n n0: 200 0x1: f (a.c:1)",
            HEADER,
            block(2, "peak")
        );
        let mut p = parser(&input);
        p.read_metadata().unwrap();

        let SnapshotStep::Snapshot(peak) = p.read_snapshot().unwrap() else {
            panic!("expected a snapshot");
        };
        assert!(peak.is_peak);
        assert!(peak.heap_tree.is_some());
        assert_eq!(p.read_snapshot().unwrap(), SnapshotStep::EndOfInput);
    }

    #[test]
    fn trees_do_not_leak_between_snapshots() {
        let input = format!(
            "{}{}n1: 30 (heap allocation functions)\n n1: 30 0x1: a (a.c:1)\n  n0: 30 0x2: b (a.c:2)\n{}n1: 10 (heap allocation functions)\n  n0: 10 0x3: c (a.c:3)\n",
            HEADER,
            block(0, "detailed"),
            block(1, "detailed")
        );
        let mut p = parser(&input);
        p.read_metadata().unwrap();
        p.read_snapshot().unwrap();

        // depth 2 directly under a fresh root must not reuse the earlier depth-1 node
        let err = p.read_snapshot().unwrap_err();
        assert!(matches!(err, ParseError::Format { .. }));
    }

    #[test]
    fn unknown_heap_tree_kind_has_no_tree() {
        let input = format!("{}{}", HEADER, block(0, "something"));
        let mut p = parser(&input);
        p.read_metadata().unwrap();

        let SnapshotStep::Snapshot(s) = p.read_snapshot().unwrap() else {
            panic!("expected a snapshot");
        };
        assert!(s.heap_tree.is_none());
        assert!(!s.is_peak);
    }

    #[test]
    fn empty_snapshot_followed_by_junk_fails() {
        let input = format!(
            "{}{}n0: 10 (heap allocation functions)\n",
            HEADER,
            block(0, "empty")
        );
        let mut p = parser(&input);
        p.read_metadata().unwrap();

        assert!(matches!(
            p.read_snapshot(),
            Err(ParseError::Format { line: 12, .. })
        ));
        assert!(matches!(p.read_snapshot(), Err(ParseError::Usage(_))));
    }

    #[test]
    fn non_numeric_field_is_conversion_error() {
        let input = format!(
            "{}{}",
            HEADER,
            block(0, "empty").replace("mem_heap_B=0", "mem_heap_B=abc")
        );
        let mut p = parser(&input);
        p.read_metadata().unwrap();

        let err = p.read_snapshot().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conversion);
        assert!(matches!(err, ParseError::Conversion { field: "mem_heap_B", .. }));
    }

    #[test]
    fn missing_inner_delimiter_is_format_error() {
        let input = format!("{}#-----------\nsnapshot=0\ntime=0\n", HEADER);
        let mut p = parser(&input);
        p.read_metadata().unwrap();

        assert!(matches!(p.read_snapshot(), Err(ParseError::Format { line: 6, .. })));
    }

    #[test]
    fn truncated_block_is_unexpected_eof() {
        let input = format!("{}#-----------\nsnapshot=0\n#-----------\ntime=0\n", HEADER);
        let mut p = parser(&input);
        p.read_metadata().unwrap();

        let err = p.read_snapshot().unwrap_err();
        assert!(matches!(
            err,
            ParseError::UnexpectedEof { ref expected, .. } if expected == "`mem_heap_B=<value>`"
        ));
    }

    #[test]
    fn dangling_delimiter_is_unexpected_eof() {
        let input = format!("{}#-----------\n", HEADER);
        let mut p = parser(&input);
        p.read_metadata().unwrap();

        assert_eq!(p.read_snapshot().unwrap_err().kind(), ErrorKind::UnexpectedEof);
    }

    #[test]
    fn detailed_snapshot_without_tree_fails() {
        let input = format!("{}{}{}", HEADER, block(0, "detailed"), block(1, "empty"));
        let mut p = parser(&input);
        p.read_metadata().unwrap();

        assert!(matches!(
            p.read_snapshot(),
            Err(ParseError::Format { line: 12, .. })
        ));
    }

    #[test]
    fn tree_snapshot_ending_before_root_is_unexpected_eof() {
        let input = format!("{}{}", HEADER, block(0, "peak"));
        let mut p = parser(&input);
        p.read_metadata().unwrap();

        let err = p.read_snapshot().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnexpectedEof);
        assert_eq!(err.line(), Some(11));
        assert!(matches!(
            err,
            ParseError::UnexpectedEof { ref expected, .. } if expected == "heap tree root line"
        ));
        assert!(matches!(p.read_snapshot(), Err(ParseError::Usage(_))));
    }

    #[test]
    fn custom_indent_width() {
        let input = format!(
            "{}{}n1: 10 (heap allocation functions)\n  n0: 10 0x1: a (a.c:1)\n",
            HEADER,
            block(0, "detailed")
        );
        let config = ParserConfig { indent_width: 2 };
        let mut p = MassifParser::with_config(Cursor::new(input.as_str()), config);
        assert_eq!(p.config().indent_width, 2);
        p.read_metadata().unwrap();

        let SnapshotStep::Snapshot(s) = p.read_snapshot().unwrap() else {
            panic!("expected a snapshot");
        };
        assert_eq!(s.heap_tree.unwrap().children.len(), 1);
    }
}
