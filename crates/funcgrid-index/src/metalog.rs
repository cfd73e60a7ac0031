//! Per-sequencer applied metalog.

use std::collections::VecDeque;

use tracing::debug;

use crate::error::{IndexError, IndexResult};

/// One entry of a sequencer's metalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetaLogEntry {
    pub metalog_seqnum: u32,
    pub kind: MetaLogKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetaLogKind {
    /// Advances the global seqnum frontier.
    Cut {
        prev_end_seqnum: u32,
        end_seqnum: u32,
    },
    /// Carries finalization information for the view.
    Finalize,
}

/// Ordered view of one sequencer's committed metalog.
///
/// Entries must be applied in strictly increasing `metalog_seqnum`
/// with no gaps; `metalog_position` is the next seqnum expected and
/// only ever moves forward. Completed cuts queue up for the index
/// layer to consume.
#[derive(Debug)]
pub struct LogSpaceBase {
    view_id: u16,
    sequencer_id: u16,
    metalog_position: u32,
    cuts: VecDeque<(u32, u32)>,
    sealed_position: Option<u32>,
}

impl LogSpaceBase {
    pub fn new(view_id: u16, sequencer_id: u16) -> Self {
        Self {
            view_id,
            sequencer_id,
            metalog_position: 0,
            cuts: VecDeque::new(),
            sealed_position: None,
        }
    }

    pub fn view_id(&self) -> u16 {
        self.view_id
    }

    pub fn sequencer_id(&self) -> u16 {
        self.sequencer_id
    }

    /// Next metalog seqnum this space expects.
    pub fn metalog_position(&self) -> u32 {
        self.metalog_position
    }

    pub fn sealed_position(&self) -> Option<u32> {
        self.sealed_position
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed_position.is_some()
    }

    /// Apply the next metalog entry. Gaps and duplicates violate the
    /// ordering invariant and poison the view.
    pub fn on_metalog_applied(&mut self, entry: MetaLogEntry) -> IndexResult<()> {
        if let Some(sealed) = self.sealed_position {
            if entry.metalog_seqnum >= sealed {
                return Err(IndexError::Sealed {
                    sealed_position: sealed,
                    got: entry.metalog_seqnum,
                });
            }
        }
        if entry.metalog_seqnum != self.metalog_position {
            return Err(IndexError::MetalogGap {
                expected: self.metalog_position,
                got: entry.metalog_seqnum,
            });
        }
        if let MetaLogKind::Cut { end_seqnum, .. } = entry.kind {
            self.cuts.push_back((entry.metalog_seqnum, end_seqnum));
            debug!(
                sequencer_id = self.sequencer_id,
                metalog_seqnum = entry.metalog_seqnum,
                end_seqnum,
                "cut applied"
            );
        }
        self.metalog_position = entry.metalog_seqnum + 1;
        Ok(())
    }

    /// Seal the space: entries at or beyond `position` are rejected
    /// from now on.
    pub fn on_finalized(&mut self, position: u32) {
        self.sealed_position = Some(position);
        debug!(
            sequencer_id = self.sequencer_id,
            position, "log space finalized"
        );
    }

    pub fn front_cut(&self) -> Option<(u32, u32)> {
        self.cuts.front().copied()
    }

    pub fn pop_front_cut(&mut self) -> Option<(u32, u32)> {
        self.cuts.pop_front()
    }

    pub fn pending_cuts(&self) -> usize {
        self.cuts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cut(metalog_seqnum: u32, prev_end: u32, end: u32) -> MetaLogEntry {
        MetaLogEntry {
            metalog_seqnum,
            kind: MetaLogKind::Cut {
                prev_end_seqnum: prev_end,
                end_seqnum: end,
            },
        }
    }

    #[test]
    fn position_advances_per_entry() {
        let mut space = LogSpaceBase::new(1, 0);
        assert_eq!(space.metalog_position(), 0);
        space.on_metalog_applied(cut(0, 0, 10)).unwrap();
        assert_eq!(space.metalog_position(), 1);
        space.on_metalog_applied(cut(1, 10, 25)).unwrap();
        assert_eq!(space.metalog_position(), 2);
        assert_eq!(space.front_cut(), Some((0, 10)));
        assert_eq!(space.pending_cuts(), 2);
    }

    #[test]
    fn duplicate_entry_is_a_gap_error() {
        let mut space = LogSpaceBase::new(1, 0);
        space.on_metalog_applied(cut(0, 0, 10)).unwrap();
        assert_eq!(
            space.on_metalog_applied(cut(0, 0, 10)),
            Err(IndexError::MetalogGap {
                expected: 1,
                got: 0
            })
        );
    }

    #[test]
    fn skipped_entry_is_a_gap_error() {
        let mut space = LogSpaceBase::new(1, 0);
        assert_eq!(
            space.on_metalog_applied(cut(5, 0, 10)),
            Err(IndexError::MetalogGap {
                expected: 0,
                got: 5
            })
        );
    }

    #[test]
    fn sealed_space_rejects_entries_beyond_position() {
        let mut space = LogSpaceBase::new(1, 0);
        space.on_metalog_applied(cut(0, 0, 10)).unwrap();
        space.on_finalized(1);
        assert!(space.is_sealed());
        assert_eq!(
            space.on_metalog_applied(cut(1, 10, 20)),
            Err(IndexError::Sealed {
                sealed_position: 1,
                got: 1
            })
        );
    }

    #[test]
    fn finalize_entries_advance_position_without_cuts() {
        let mut space = LogSpaceBase::new(1, 0);
        space
            .on_metalog_applied(MetaLogEntry {
                metalog_seqnum: 0,
                kind: MetaLogKind::Finalize,
            })
            .unwrap();
        assert_eq!(space.metalog_position(), 1);
        assert_eq!(space.pending_cuts(), 0);
    }
}
