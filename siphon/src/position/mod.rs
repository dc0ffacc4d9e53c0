//! The resumable replication position codec.
//!
//! A position maps every source-instance id seen on a stream to the interval of
//! sequence numbers consumed from it. The canonical string form,
//! `id:start-last[,id2:start-last...]` with entries sorted by id, is the unit that is
//! persisted in the warehouse and exchanged with operators.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use uuid::Uuid;

use crate::bail;
use crate::error::{ErrorKind, SiphonError};

/// Interval of sequence numbers consumed from one source instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GnoInterval {
    /// First sequence number observed by this consumer lineage.
    pub start: u64,
    /// Most recent sequence number observed. Non-decreasing within one consumer's
    /// lifetime.
    pub last: u64,
}

impl fmt::Display for GnoInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.last)
    }
}

/// A multi-source replication position.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Position {
    entries: BTreeMap<Uuid, GnoInterval>,
}

impl Position {
    /// Returns true when no source instance has been observed yet.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the interval tracked for `sid`, if any.
    pub fn get(&self, sid: &Uuid) -> Option<GnoInterval> {
        self.entries.get(sid).copied()
    }

    /// Advances the position with a newly observed sequence number.
    ///
    /// An unknown source instance opens a fresh interval at `sequence`; a known one
    /// only moves its `last` forward.
    pub fn advance(&mut self, sid: Uuid, sequence: u64) {
        self.entries
            .entry(sid)
            .and_modify(|interval| interval.last = sequence)
            .or_insert(GnoInterval {
                start: sequence,
                last: sequence,
            });
    }

    /// Returns true when `self` is strictly earlier than `other`.
    ///
    /// Earlier is defined as: at least one source instance shared by both positions
    /// has a strictly smaller `last` in `self`.
    pub fn is_earlier_than(&self, other: &Position) -> bool {
        self.entries.iter().any(|(sid, interval)| {
            other
                .entries
                .get(sid)
                .is_some_and(|their| interval.last < their.last)
        })
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (sid, interval) in &self.entries {
            if !first {
                f.write_str(",")?;
            }
            write!(f, "{sid}:{interval}")?;
            first = false;
        }

        Ok(())
    }
}

impl FromStr for Position {
    type Err = SiphonError;

    /// Parses a position string.
    ///
    /// Accepts the canonical `id:start-last` form, bare sequence numbers (`id:7` is
    /// `7-7`), and multi-interval GTID-style input (`id:1-5:8-10` collapses to the
    /// start of the first interval and the last of the final one). The empty string
    /// is the empty position.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut entries = BTreeMap::new();

        if s.trim().is_empty() {
            return Ok(Position::default());
        }

        for part in s.split(',') {
            let part = part.trim();
            let Some((sid, intervals)) = part.split_once(':') else {
                bail!(
                    ErrorKind::InvalidPosition,
                    "position entry is missing `:`",
                    part
                );
            };

            let sid = Uuid::parse_str(sid.trim())?;

            let mut start = None;
            let mut last = 0u64;
            for interval in intervals.split(':') {
                let (lo, hi) = match interval.split_once('-') {
                    Some((lo, hi)) => (lo, hi),
                    None => (interval, interval),
                };

                let lo: u64 = lo.trim().parse()?;
                let hi: u64 = hi.trim().parse()?;
                if lo > hi {
                    bail!(
                        ErrorKind::InvalidPosition,
                        "position interval is inverted",
                        interval
                    );
                }

                if start.is_none() {
                    start = Some(lo);
                }
                last = hi;
            }

            let Some(start) = start else {
                bail!(
                    ErrorKind::InvalidPosition,
                    "position entry has no intervals",
                    part
                );
            };

            entries.insert(sid, GnoInterval { start, last });
        }

        Ok(Position { entries })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SID_A: &str = "3e11fa47-71ca-11e1-9e33-c80aa9429562";
    const SID_B: &str = "b9f4a9c0-81d4-11e1-bc16-c80aa9429562";

    fn sid(s: &str) -> Uuid {
        Uuid::parse_str(s).unwrap()
    }

    #[test]
    fn canonical_string_round_trips() {
        let canonical = format!("{SID_A}:10-20,{SID_B}:5-5");
        let position: Position = canonical.parse().unwrap();
        assert_eq!(position.to_string(), canonical);
    }

    #[test]
    fn empty_string_is_empty_position() {
        let position: Position = "".parse().unwrap();
        assert!(position.is_empty());
        assert_eq!(position.to_string(), "");
    }

    #[test]
    fn entries_are_rendered_sorted_by_id() {
        let unsorted = format!("{SID_B}:5-5,{SID_A}:10-20");
        let position: Position = unsorted.parse().unwrap();
        assert_eq!(position.to_string(), format!("{SID_A}:10-20,{SID_B}:5-5"));
    }

    #[test]
    fn multi_interval_input_collapses() {
        let position: Position = format!("{SID_A}:1-5:8-10").parse().unwrap();
        assert_eq!(
            position.get(&sid(SID_A)),
            Some(GnoInterval { start: 1, last: 10 })
        );
    }

    #[test]
    fn bare_sequence_number_is_a_point_interval() {
        let position: Position = format!("{SID_A}:7").parse().unwrap();
        assert_eq!(
            position.get(&sid(SID_A)),
            Some(GnoInterval { start: 7, last: 7 })
        );
    }

    #[test]
    fn advance_opens_interval_for_new_id() {
        let mut position = Position::default();
        position.advance(sid(SID_A), 42);
        assert_eq!(
            position.get(&sid(SID_A)),
            Some(GnoInterval {
                start: 42,
                last: 42
            })
        );
    }

    #[test]
    fn advance_moves_only_last_for_known_id() {
        let mut position: Position = format!("{SID_A}:10-20").parse().unwrap();
        position.advance(sid(SID_A), 21);
        assert_eq!(
            position.get(&sid(SID_A)),
            Some(GnoInterval {
                start: 10,
                last: 21
            })
        );
    }

    #[test]
    fn earlier_requires_a_shared_id_with_smaller_last() {
        let a: Position = format!("{SID_A}:1-5").parse().unwrap();
        let b: Position = format!("{SID_A}:1-9").parse().unwrap();
        let unrelated: Position = format!("{SID_B}:1-100").parse().unwrap();

        assert!(a.is_earlier_than(&b));
        assert!(!b.is_earlier_than(&a));
        assert!(!a.is_earlier_than(&a));
        assert!(!a.is_earlier_than(&unrelated));
    }

    #[test]
    fn rejects_malformed_input() {
        assert!("not-a-position".parse::<Position>().is_err());
        assert!(format!("{SID_A}:").parse::<Position>().is_err());
        assert!(format!("{SID_A}:9-1").parse::<Position>().is_err());
        assert!("xyz:1-2".parse::<Position>().is_err());
    }
}
