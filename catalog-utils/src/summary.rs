use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use crate::review::{ReviewOrder, ReviewRecord, Stars, StarsMap};

/// Aggregate view of an entity's reviews. Derived on demand, never stored.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ReviewSummary {
    /// Mean rating rounded to one decimal place, 0 when there are no reviews.
    pub average_rating: f64,
    pub total_reviews: usize,
    #[serde(serialize_with = "serialize_distribution")]
    pub rating_distribution: StarsMap<usize>,
}

fn serialize_distribution<S: Serializer>(
    distribution: &StarsMap<usize>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(Stars::ALL.len()))?;
    for (stars, count) in distribution.iter() {
        map.serialize_entry(&stars.value().to_string(), count)?;
    }
    map.end()
}

pub fn summarize<'a>(reviews: impl IntoIterator<Item = &'a ReviewRecord>) -> ReviewSummary {
    let mut rating_distribution = StarsMap::<usize>::default();
    let mut total_reviews = 0;
    let mut rating_sum: u64 = 0;

    for review in reviews {
        *rating_distribution.get_mut(&review.rating) += 1;
        total_reviews += 1;
        rating_sum += u64::from(review.rating.value());
    }

    let average_rating = if total_reviews == 0 {
        0.0
    } else {
        let mean = rating_sum as f64 / total_reviews as f64;
        (mean * 10.0).round() / 10.0
    };

    ReviewSummary {
        average_rating,
        total_reviews,
        rating_distribution,
    }
}

/// Orders reviews without disturbing the relative order of ties (`sort_by` is stable).
pub fn sort_reviews(
    reviews: impl IntoIterator<Item = ReviewRecord>,
    order: ReviewOrder,
) -> Vec<ReviewRecord> {
    let mut reviews: Vec<ReviewRecord> = reviews.into_iter().collect();
    match order {
        ReviewOrder::Newest => reviews.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
        ReviewOrder::Oldest => reviews.sort_by(|a, b| a.created_at.cmp(&b.created_at)),
        ReviewOrder::HighestRated => reviews.sort_by(|a, b| b.rating.cmp(&a.rating)),
        ReviewOrder::LowestRated => reviews.sort_by(|a, b| a.rating.cmp(&b.rating)),
    }
    reviews
}
