//! Line transition tracking.
//!
//! A method body is walked in bytecode order and every `LineNumberTable` entry is fed into a
//! [`LineTransitions`]. Only entries whose line differs from the previous one start a new
//! run and receive a probe, so a line that spans several entries is reported once per run.

use std::collections::HashSet;

use crate::classfile::attributes::LineNumber;

/// Per-method `lastLine` state.
///
/// Scoped to one method rewrite; never shared.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LineTransitions {
    last_line: Option<u16>,
}

impl LineTransitions {
    /// Start a method with no line seen yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next line; returns `true` if it starts a new run.
    pub fn observe(&mut self, line: u16) -> bool {
        if self.last_line == Some(line) {
            return false;
        }
        self.last_line = Some(line);
        true
    }

    /// The line of the current run.
    #[must_use]
    pub fn last_line(&self) -> Option<u16> {
        self.last_line
    }
}

/// A probe to insert in front of the instruction at `offset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedProbe {
    /// Original offset of the first instruction of the run
    pub offset: u32,
    /// Source line of the run
    pub line: u16,
}

/// Walk `lines` in bytecode order and return one probe per line transition.
///
/// Entries sharing a `start_pc` keep their table order. Entries whose `start_pc` is not in
/// `boundaries` can not host a probe and are returned separately, without affecting the
/// transition state.
#[must_use]
pub fn plan_probes(
    lines: &[LineNumber],
    boundaries: &HashSet<u32>,
) -> (Vec<PlannedProbe>, Vec<LineNumber>) {
    let mut ordered = lines.to_vec();
    ordered.sort_by_key(|entry| entry.start_pc);

    let mut transitions = LineTransitions::new();
    let mut probes = Vec::new();
    let mut skipped = Vec::new();
    for entry in ordered {
        let offset = u32::from(entry.start_pc);
        if !boundaries.contains(&offset) {
            skipped.push(entry);
            continue;
        }
        if transitions.observe(entry.line) {
            probes.push(PlannedProbe {
                offset,
                line: entry.line,
            });
        }
    }
    (probes, skipped)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(entries: &[(u16, u16)]) -> Vec<LineNumber> {
        entries
            .iter()
            .map(|&(start_pc, line)| LineNumber { start_pc, line })
            .collect()
    }

    #[test]
    fn state_machine() {
        let mut transitions = LineTransitions::new();
        assert_eq!(transitions.last_line(), None);
        assert!(transitions.observe(10));
        assert!(!transitions.observe(10));
        assert!(transitions.observe(11));
        assert!(transitions.observe(10));
        assert_eq!(transitions.last_line(), Some(10));
    }

    #[test]
    fn one_probe_per_run() {
        let lines = rows(&[(0, 10), (1, 10), (2, 11), (3, 11), (4, 11), (5, 12)]);
        let boundaries = (0..6).collect();
        let (probes, skipped) = plan_probes(&lines, &boundaries);
        assert_eq!(
            probes,
            [
                PlannedProbe { offset: 0, line: 10 },
                PlannedProbe { offset: 2, line: 11 },
                PlannedProbe { offset: 5, line: 12 },
            ]
        );
        assert!(skipped.is_empty());
    }

    #[test]
    fn table_order_does_not_matter() {
        let lines = rows(&[(5, 12), (0, 10), (2, 11)]);
        let boundaries = [0, 2, 5].into_iter().collect();
        let (probes, _) = plan_probes(&lines, &boundaries);
        let lines: Vec<u16> = probes.iter().map(|probe| probe.line).collect();
        assert_eq!(lines, [10, 11, 12]);
    }

    #[test]
    fn skips_entries_inside_instructions() {
        let lines = rows(&[(0, 10), (1, 11), (3, 11)]);
        let boundaries = [0, 3].into_iter().collect();
        let (probes, skipped) = plan_probes(&lines, &boundaries);
        assert_eq!(
            probes,
            [
                PlannedProbe { offset: 0, line: 10 },
                PlannedProbe { offset: 3, line: 11 },
            ]
        );
        assert_eq!(skipped, rows(&[(1, 11)]));
    }
}
