//! Deserializers that read `null` scores back as NaN.
//!
//! serde_json writes non-finite floats as `null`, so an undefined metric
//! only survives a saved report through these.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer};

#[derive(Deserialize)]
#[serde(transparent)]
struct Score(Option<f64>);

impl From<Score> for f64 {
    fn from(score: Score) -> f64 {
        score.0.unwrap_or(f64::NAN)
    }
}

fn collect(scores: Vec<Score>) -> Vec<f64> {
    scores.into_iter().map(f64::from).collect()
}

pub fn score<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
    Score::deserialize(d).map(f64::from)
}

pub fn scores<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<f64>, D::Error> {
    Vec::<Score>::deserialize(d).map(collect)
}

pub fn optional_scores<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<f64>>, D::Error> {
    Ok(Option::<Vec<Score>>::deserialize(d)?.map(collect))
}

pub fn score_rows<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<Vec<f64>>, D::Error> {
    Ok(Vec::<Vec<Score>>::deserialize(d)?
        .into_iter()
        .map(collect)
        .collect())
}

pub fn optional_score_rows<'de, D: Deserializer<'de>>(
    d: D,
) -> Result<Option<Vec<Vec<f64>>>, D::Error> {
    Ok(Option::<Vec<Vec<Score>>>::deserialize(d)?
        .map(|rows| rows.into_iter().map(collect).collect()))
}

pub fn feature_scores<'de, D: Deserializer<'de>>(d: D) -> Result<BTreeMap<String, f64>, D::Error> {
    Ok(BTreeMap::<String, Score>::deserialize(d)?
        .into_iter()
        .map(|(feature, score)| (feature, score.into()))
        .collect())
}
