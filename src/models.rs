use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct MovieSummary {
    #[serde(rename = "imdbID")]
    pub imdb_id: String,
    #[serde(rename = "Title")]
    pub title: String,
    #[serde(rename = "Year")]
    pub year: String,
    #[serde(rename = "Poster")]
    pub poster: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct MovieDetails {
    #[serde(rename = "imdbID", default)]
    pub imdb_id: String,
    #[serde(rename = "Title", default)]
    pub title: String,
    #[serde(rename = "Year", default)]
    pub year: String,
    #[serde(rename = "Poster", default)]
    pub poster: String,
    #[serde(rename = "Runtime", default)]
    pub runtime: String,
    #[serde(rename = "imdbRating", default)]
    pub imdb_rating: String,
    #[serde(rename = "Plot", default)]
    pub plot: String,
    #[serde(rename = "Released", default)]
    pub released: String,
    #[serde(rename = "Actors", default)]
    pub actors: String,
    #[serde(rename = "Director", default)]
    pub director: String,
    #[serde(rename = "Genre", default)]
    pub genre: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WatchedMovie {
    #[serde(rename = "imdbID")]
    pub imdb_id: String,
    pub title: String,
    #[serde(default)]
    pub year: String,
    pub poster: String,
    pub imdb_rating: Option<f64>,
    pub user_rating: u8,
    pub runtime: Option<u32>,
    #[serde(default)]
    pub plot: String,
    #[serde(default)]
    pub released: String,
    #[serde(default)]
    pub actors: String,
    #[serde(default)]
    pub director: String,
    #[serde(default)]
    pub genre: String,
    #[serde(default)]
    pub count_rating_decisions: u32,
}

impl WatchedMovie {
    pub fn from_details(
        imdb_id: &str,
        details: &MovieDetails,
        user_rating: u8,
        count_rating_decisions: u32,
    ) -> Self {
        Self {
            imdb_id: imdb_id.to_string(),
            title: details.title.clone(),
            year: details.year.clone(),
            poster: details.poster.clone(),
            imdb_rating: parse_imdb_rating(&details.imdb_rating),
            user_rating,
            runtime: parse_runtime_minutes(&details.runtime),
            plot: details.plot.clone(),
            released: details.released.clone(),
            actors: details.actors.clone(),
            director: details.director.clone(),
            genre: details.genre.clone(),
            count_rating_decisions,
        }
    }
}

pub fn parse_runtime_minutes(input: &str) -> Option<u32> {
    input.split_whitespace().next()?.parse().ok()
}

pub fn parse_imdb_rating(input: &str) -> Option<f64> {
    input.trim().parse::<f64>().ok().filter(|r| r.is_finite())
}
