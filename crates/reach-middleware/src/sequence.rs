//! Follower-side sequence-number admission.

use reach_types::SeqNo;
use tracing::warn;

/// Outcome of presenting a command sequence number to a [`SequenceGate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Newer than anything seen; `gap` commands were skipped in between.
    Fresh { gap: u64 },
    /// Same number as the last admitted command.
    Duplicate,
    /// Older than the last admitted command.
    OutOfOrder,
}

/// Admits strictly increasing sequence numbers, one gate per command session.
#[derive(Debug, Default, Clone)]
pub struct SequenceGate {
    last: SeqNo,
}

impl SequenceGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_admitted(&self) -> SeqNo {
        self.last
    }

    pub fn admit(&mut self, seq: SeqNo) -> Admission {
        if seq == self.last {
            return Admission::Duplicate;
        }
        if seq < self.last {
            return Admission::OutOfOrder;
        }
        let gap = seq - self.last - 1;
        if gap > 0 && self.last > 0 {
            warn!(last = self.last, received = seq, gap, "command sequence gap, suspected drop");
        }
        self.last = seq;
        Admission::Fresh { gap }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn increasing_sequence_is_admitted() {
        let mut gate = SequenceGate::new();
        for seq in 1..=5 {
            assert_eq!(gate.admit(seq), Admission::Fresh { gap: 0 });
        }
        assert_eq!(gate.last_admitted(), 5);
    }

    #[test]
    fn duplicates_and_stale_numbers_are_dropped() {
        let mut gate = SequenceGate::new();
        gate.admit(1);
        gate.admit(2);
        assert_eq!(gate.admit(2), Admission::Duplicate);
        assert_eq!(gate.admit(1), Admission::OutOfOrder);
        assert_eq!(gate.last_admitted(), 2);
    }

    #[test]
    fn gaps_are_reported_but_admitted() {
        let mut gate = SequenceGate::new();
        gate.admit(1);
        assert_eq!(gate.admit(5), Admission::Fresh { gap: 3 });
        assert_eq!(gate.admit(4), Admission::OutOfOrder);
    }
}
