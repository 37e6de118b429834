use std::fmt;
use std::ops::{BitAnd, BitOr};

/// The kinds of state change a `submit` can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum_macros::Display)]
#[strum(serialize_all = "snake_case")]
pub enum Change {
    CurrentSampleChanged,
    BufferChanged,
}

impl Change {
    const ALL: [Change; 2] = [Change::CurrentSampleChanged, Change::BufferChanged];

    fn bit(self) -> u8 {
        match self {
            Change::CurrentSampleChanged => 0b01,
            Change::BufferChanged => 0b10,
        }
    }
}

/// A set of `Change` kinds. Used both as the payload of a notification and as
/// a subscription filter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ChangeSet(u8);

impl ChangeSet {
    pub const NONE: ChangeSet = ChangeSet(0);
    pub const ALL: ChangeSet = ChangeSet(0b11);

    pub fn contains(self, change: Change) -> bool {
        self.0 & change.bit() != 0
    }

    pub fn insert(&mut self, change: Change) {
        self.0 |= change.bit();
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn intersects(self, other: ChangeSet) -> bool {
        !(self & other).is_empty()
    }

    pub fn iter(self) -> impl Iterator<Item = Change> {
        Change::ALL.into_iter().filter(move |c| self.contains(*c))
    }
}

impl From<Change> for ChangeSet {
    fn from(change: Change) -> Self {
        ChangeSet(change.bit())
    }
}

/// `current_sample_changed|buffer_changed`, or `none`.
impl fmt::Display for ChangeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("none");
        }
        for (i, change) in self.iter().enumerate() {
            if i > 0 {
                f.write_str("|")?;
            }
            write!(f, "{}", change)?;
        }
        Ok(())
    }
}

impl BitOr for ChangeSet {
    type Output = ChangeSet;

    fn bitor(self, rhs: ChangeSet) -> ChangeSet {
        ChangeSet(self.0 | rhs.0)
    }
}

impl BitAnd for ChangeSet {
    type Output = ChangeSet;

    fn bitand(self, rhs: ChangeSet) -> ChangeSet {
        ChangeSet(self.0 & rhs.0)
    }
}

/// Emitted once per accepted `submit`, after the store lock is released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeEvent {
    pub changes: ChangeSet,
    pub revision: u64,
}

/// Receives change events from a `SampleStore`. Implementations must return
/// quickly: `publish` runs on the producer's call stack.
pub trait ChangeListener: Send + Sync {
    fn publish(&self, event: ChangeEvent);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_operations() {
        let mut set = ChangeSet::NONE;
        assert!(set.is_empty());
        set.insert(Change::BufferChanged);
        assert!(set.contains(Change::BufferChanged));
        assert!(!set.contains(Change::CurrentSampleChanged));
        assert!(set.intersects(ChangeSet::ALL));
        assert!(!set.intersects(Change::CurrentSampleChanged.into()));
        assert_eq!(set | Change::CurrentSampleChanged.into(), ChangeSet::ALL);
        assert_eq!(ChangeSet::ALL & set, set);
    }

    #[test]
    fn iterates_in_declaration_order() {
        let kinds: Vec<_> = ChangeSet::ALL.iter().collect();
        assert_eq!(
            kinds,
            vec![Change::CurrentSampleChanged, Change::BufferChanged]
        );
    }

    #[test]
    fn displays_kind_names() {
        assert_eq!(Change::BufferChanged.to_string(), "buffer_changed");
        assert_eq!(
            ChangeSet::ALL.to_string(),
            "current_sample_changed|buffer_changed"
        );
        assert_eq!(ChangeSet::NONE.to_string(), "none");
    }
}
