use std::fmt;

use chrono::{DateTime, Utc};
use enumap::EnuMap;
use serde::{Deserialize, Serialize};

use crate::{EntityKey, ViewerId};

pub const MIN_BODY_CHARS: usize = 10;
pub const MAX_BODY_CHARS: usize = 1000;

/// A 1-5 star rating.
#[derive(
    Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize, EnuMap,
)]
#[serde(try_from = "u8", into = "u8")]
pub enum Stars {
    One,
    Two,
    Three,
    Four,
    Five,
}

impl Stars {
    pub fn value(self) -> u8 {
        match self {
            Stars::One => 1,
            Stars::Two => 2,
            Stars::Three => 3,
            Stars::Four => 4,
            Stars::Five => 5,
        }
    }
}

impl TryFrom<u8> for Stars {
    type Error = ValidationError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Stars::try_from(i64::from(value))
    }
}

impl TryFrom<i64> for Stars {
    type Error = ValidationError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Stars::One),
            2 => Ok(Stars::Two),
            3 => Ok(Stars::Three),
            4 => Ok(Stars::Four),
            5 => Ok(Stars::Five),
            _ => Err(ValidationError {
                field: ReviewField::Rating,
            }),
        }
    }
}

impl From<Stars> for u8 {
    fn from(stars: Stars) -> Self {
        stars.value()
    }
}

#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewField {
    Rating,
    Comment,
}

impl fmt::Display for ReviewField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ReviewField::Rating => "rating",
            ReviewField::Comment => "comment",
        })
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
#[error("invalid {field}")]
pub struct ValidationError {
    pub field: ReviewField,
}

/// A review as stored remotely. One per (author, entity).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReviewRecord {
    pub id: String,
    pub author_id: ViewerId,
    pub entity_key: EntityKey,
    pub rating: Stars,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub helpful_count: u32,
}

/// Review input that has passed validation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ReviewDraft {
    rating: Stars,
    body: String,
}

impl ReviewDraft {
    /// Checks the rating first, then the trimmed body length in characters.
    pub fn new(rating: i64, body: &str) -> Result<Self, ValidationError> {
        let rating = Stars::try_from(rating)?;

        let body = body.trim();
        let chars = body.chars().count();
        if !(MIN_BODY_CHARS..=MAX_BODY_CHARS).contains(&chars) {
            return Err(ValidationError {
                field: ReviewField::Comment,
            });
        }

        Ok(Self {
            rating,
            body: body.to_string(),
        })
    }

    pub fn rating(&self) -> Stars {
        self.rating
    }

    pub fn body(&self) -> &str {
        &self.body
    }
}

#[derive(
    Clone, Copy, Debug, Default, Hash, Eq, PartialEq, Serialize, Deserialize, tsify::Tsify,
)]
#[tsify(into_wasm_abi, from_wasm_abi)]
#[serde(rename_all = "snake_case")]
pub enum ReviewOrder {
    #[default]
    Newest,
    Oldest,
    HighestRated,
    LowestRated,
}
