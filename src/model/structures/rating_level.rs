use serde_repr::{Deserialize_repr, Serialize_repr};
use std::convert::TryFrom;
use strum_macros::{Display, EnumIter};

use crate::model::constants::LEVEL_THRESHOLDS;

/// Rating tiers, lowest first. `Mythic` is the top tier and the only one that receives a
/// mythic rank.
#[derive(
    Deserialize_repr, Serialize_repr, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, EnumIter, Display,
)]
#[repr(u8)]
pub enum RatingLevel {
    Rookie = 0,
    Contender = 1,
    Analyst = 2,
    Expert = 3,
    Oracle = 4,
    Mythic = 5
}

impl RatingLevel {
    /// Maps all-time points onto a tier. Points below the first threshold
    /// (including negative totals) land in `Rookie`.
    pub fn from_points(total_points: i64) -> RatingLevel {
        LEVEL_THRESHOLDS
            .iter()
            .rev()
            .find(|(_, threshold)| total_points >= *threshold)
            .map(|(level, _)| *level)
            .unwrap_or(RatingLevel::Rookie)
    }

    pub fn is_top(&self) -> bool {
        matches!(self, RatingLevel::Mythic)
    }
}

impl TryFrom<i32> for RatingLevel {
    type Error = ();

    fn try_from(v: i32) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(RatingLevel::Rookie),
            1 => Ok(RatingLevel::Contender),
            2 => Ok(RatingLevel::Analyst),
            3 => Ok(RatingLevel::Expert),
            4 => Ok(RatingLevel::Oracle),
            5 => Ok(RatingLevel::Mythic),
            _ => Err(())
        }
    }
}
