//! Merge-marker scanner.
//!
//! Walks the buffer once and emits a [`ConflictBlock`] for every
//! start → (base) → mid → end sequence. Markers that show up out of order are
//! ordinary content; a new start marker abandons whatever block was open.

use tracing::debug;

use crate::types::{BASE_MARKER, END_MARKER, MID_MARKER, START_MARKER, ConflictBlock};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Marker {
    Start,
    Base,
    Mid,
    End,
}

fn marker_of(line: &str) -> Option<Marker> {
    if line.starts_with(START_MARKER) {
        Some(Marker::Start)
    } else if line.starts_with(BASE_MARKER) {
        Some(Marker::Base)
    } else if line.starts_with(MID_MARKER) {
        Some(Marker::Mid)
    } else if line.starts_with(END_MARKER) {
        Some(Marker::End)
    } else {
        None
    }
}

/// Where the scanner is inside a block, with the 1-based lines seen so far.
#[derive(Debug, Clone, Copy)]
enum State {
    Outside,
    InOurs { start: usize },
    InBase { start: usize, base: usize },
    InTheirs { start: usize, base: Option<usize>, mid: usize },
}

/// Scan `lines` for conflict blocks, in document order.
pub fn parse<S: AsRef<str>>(lines: &[S]) -> Vec<ConflictBlock> {
    let mut blocks = Vec::new();
    let mut state = State::Outside;
    let mut abandoned = 0usize;

    for (idx, line) in lines.iter().enumerate() {
        let line_no = idx + 1;
        let Some(marker) = marker_of(line.as_ref()) else {
            continue;
        };

        state = match (state, marker) {
            (State::Outside, Marker::Start) => State::InOurs { start: line_no },
            (_, Marker::Start) => {
                abandoned += 1;
                State::InOurs { start: line_no }
            }
            (State::InOurs { start }, Marker::Base) => State::InBase {
                start,
                base: line_no,
            },
            (State::InOurs { start }, Marker::Mid) => State::InTheirs {
                start,
                base: None,
                mid: line_no,
            },
            (State::InBase { start, base }, Marker::Mid) => State::InTheirs {
                start,
                base: Some(base),
                mid: line_no,
            },
            (State::InTheirs { start, base, mid }, Marker::End) => {
                blocks.push(ConflictBlock {
                    our_marker_line: start,
                    base_marker_line: base,
                    their_marker_line: mid,
                    end_marker_line: line_no,
                });
                State::Outside
            }
            // anything else is content
            (state, _) => state,
        };
    }

    if !matches!(state, State::Outside) {
        abandoned += 1;
    }
    if abandoned > 0 {
        debug!(abandoned, found = blocks.len(), "dropped unterminated conflict openings");
    }

    blocks
}

/// Convenience for callers holding the whole text.
pub fn parse_text(text: &str) -> Vec<ConflictBlock> {
    let lines: Vec<&str> = text.split('\n').collect();
    parse(&lines)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_two_way_block() {
        let lines = ["a", "<<<<<<<", "x", "=======", "y", ">>>>>>>", "b"];
        let blocks = parse(&lines);
        assert_eq!(
            blocks,
            vec![ConflictBlock {
                our_marker_line: 2,
                base_marker_line: None,
                their_marker_line: 4,
                end_marker_line: 6,
            }]
        );
    }

    #[test]
    fn test_three_way_block_with_labels() {
        let text = "<<<<<<< HEAD\nours\n||||||| merged common ancestors\nbase\n=======\ntheirs\n>>>>>>> topic\n";
        let blocks = parse_text(text);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].base_marker_line, Some(3));
        assert_eq!(blocks[0].their_marker_line, 5);
        assert_eq!(blocks[0].end_marker_line, 7);
    }

    #[test]
    fn test_blocks_in_document_order() {
        let mut lines = Vec::new();
        for i in 0..5 {
            lines.push(format!("ctx {}", i));
            lines.push("<<<<<<< ours".to_string());
            lines.push(format!("left {}", i));
            lines.push("=======".to_string());
            lines.push(format!("right {}", i));
            lines.push(">>>>>>> theirs".to_string());
        }
        let blocks = parse(&lines);
        assert_eq!(blocks.len(), 5);
        assert!(blocks.windows(2).all(|w| w[0].end_marker_line < w[1].our_marker_line));
        assert_eq!(blocks[4].our_marker_line, 26);
    }

    #[test]
    fn test_restart_on_nested_start() {
        let lines = ["<<<<<<<", "x", "<<<<<<<", "y", "=======", "z", ">>>>>>>"];
        let blocks = parse(&lines);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].our_marker_line, 3);
    }

    #[test]
    fn test_unterminated_block_dropped() {
        let lines = ["<<<<<<<", "x", "=======", "y"];
        assert!(parse(&lines).is_empty());
    }

    #[test]
    fn test_out_of_order_markers_are_content() {
        // stray end and mid before any start, base after mid
        let lines = [
            ">>>>>>>", "=======", "<<<<<<<", "a", "=======", "|||||||", "b", ">>>>>>>",
        ];
        let blocks = parse(&lines);
        assert_eq!(blocks.len(), 1);
        let block = blocks[0];
        assert_eq!(block.our_marker_line, 3);
        assert_eq!(block.base_marker_line, None);
        assert_eq!(block.theirs(&lines), &["|||||||", "b"]);
    }

    #[test]
    fn test_no_markers() {
        assert!(parse(&["fn main() {}", "", "// ======"]).is_empty());
        assert!(parse::<&str>(&[]).is_empty());
    }
}
