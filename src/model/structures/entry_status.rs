use serde_repr::{Deserialize_repr, Serialize_repr};
use std::convert::TryFrom;

/// Lifecycle of a prediction entry as written by the scoring side.
#[derive(Deserialize_repr, Serialize_repr, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum EntryStatus {
    #[default]
    Pending = 0,
    Won = 1,
    Lost = 2,
    Void = 3
}

impl EntryStatus {
    /// Terminal entries (with a score) are the only ones that participate in ratings.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, EntryStatus::Pending)
    }

    pub fn is_win(&self) -> bool {
        matches!(self, EntryStatus::Won)
    }

    /// Status codes used in `WHERE status = ANY($n)` filters.
    pub fn terminal_codes() -> Vec<i32> {
        vec![EntryStatus::Won as i32, EntryStatus::Lost as i32, EntryStatus::Void as i32]
    }
}

impl TryFrom<i32> for EntryStatus {
    type Error = ();

    fn try_from(v: i32) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(EntryStatus::Pending),
            1 => Ok(EntryStatus::Won),
            2 => Ok(EntryStatus::Lost),
            3 => Ok(EntryStatus::Void),
            _ => Err(())
        }
    }
}
