//! Defer Stack
//!
//! Cleanup actions registered by `defer { ... }`. Records belong to the instance
//! whose stack holds them and run in reverse registration order when that
//! instance exits. Draining takes the records out, so each runs at most once.
//!
//! Each record also remembers its [`Site`]: the trail it was registered on and
//! the stack height right after the `defer` statement left it. A record with
//! height `d` lives inside the frame at position `d - 1`, so tearing down a
//! frame at position `p` drains the records above `p` on that trail. When a
//! frame completes normally its records sink to the surviving frame below.

use serde::{Deserialize, Serialize};

use super::types::ast::{Span, Stmt};
use super::types::TrailId;

/// Where a record was registered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Site {
    pub trail: TrailId,
    pub depth: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeferRecord {
    pub body: Stmt,
    pub span: Span,
    pub site: Site,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeferStack {
    records: Vec<DeferRecord>,
}

impl DeferStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, body: Stmt, span: Span, site: Site) {
        self.records.push(DeferRecord { body, span, site });
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Remove every record, last registered first
    pub fn drain_lifo(&mut self) -> Vec<DeferRecord> {
        let mut records = std::mem::take(&mut self.records);
        records.reverse();
        records
    }

    /// Remove the records registered on `trail` above stack position `floor`,
    /// last registered first
    pub fn drain_above(&mut self, trail: TrailId, floor: usize) -> Vec<DeferRecord> {
        let (mut taken, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.records)
            .into_iter()
            .partition(|r| r.site.trail == trail && r.site.depth > floor);
        self.records = kept;
        taken.reverse();
        taken
    }

    /// Lower records of `trail` to `height` once the frames above it are gone
    pub fn settle(&mut self, trail: TrailId, height: usize) {
        for record in &mut self.records {
            if record.site.trail == trail && record.site.depth > height {
                record.site.depth = height;
            }
        }
    }

    /// Hand the records of a finished trail to the frame that started it
    pub fn adopt(&mut self, from: TrailId, to: Site) {
        for record in &mut self.records {
            if record.site.trail == from {
                record.site = to;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn halt(line: usize) -> Stmt {
        Stmt::Halt {
            span: Span::new(0, 0, line, 0, line, 4),
        }
    }

    fn site(trail: TrailId, depth: usize) -> Site {
        Site { trail, depth }
    }

    fn lines(records: &[DeferRecord]) -> Vec<usize> {
        records.iter().map(|r| r.body.span().start_line).collect()
    }

    #[test]
    fn test_drain_is_lifo_and_empties_stack() {
        let mut stack = DeferStack::new();
        stack.push(halt(1), Span::default(), site(0, 2));
        stack.push(halt(2), Span::default(), site(0, 2));
        stack.push(halt(3), Span::default(), site(0, 2));

        assert_eq!(lines(&stack.drain_lifo()), vec![3, 2, 1]);
        assert!(stack.is_empty());
        assert!(stack.drain_lifo().is_empty());
    }

    #[test]
    fn test_drain_above_takes_only_the_torn_extent() {
        let mut stack = DeferStack::new();
        stack.push(halt(1), Span::default(), site(0, 2));
        stack.push(halt(2), Span::default(), site(0, 4));
        stack.push(halt(3), Span::default(), site(1, 4));
        stack.push(halt(4), Span::default(), site(0, 5));

        assert_eq!(lines(&stack.drain_above(0, 3)), vec![4, 2]);
        assert_eq!(stack.len(), 2);
        assert!(stack.drain_above(0, 3).is_empty());
        assert_eq!(lines(&stack.drain_lifo()), vec![3, 1]);
    }

    #[test]
    fn test_settled_records_leave_the_next_sibling_alone() {
        // `{ { defer A } ; when ... }`: A must not run when the `when` body is torn down
        let mut stack = DeferStack::new();
        stack.push(halt(1), Span::default(), site(0, 3));
        stack.settle(0, 2);
        assert!(stack.drain_above(0, 2).is_empty());
        assert_eq!(lines(&stack.drain_above(0, 1)), vec![1]);
    }

    #[test]
    fn test_adopted_records_follow_the_parent_trail() {
        let mut stack = DeferStack::new();
        stack.push(halt(1), Span::default(), site(7, 1));
        stack.adopt(7, site(0, 3));
        assert!(stack.drain_above(7, 0).is_empty());
        assert_eq!(lines(&stack.drain_above(0, 2)), vec![1]);
    }
}
