use serde::{Deserialize, Serialize};
use std::fmt::Display;

use crate::db::{IndexEntry, ItemKey, Record, SortValue};

/// Genres a movie can be tagged with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Genre {
    Action,
    Adventure,
    Animation,
    Biography,
    Comedy,
    Crime,
    Documentary,
    Drama,
    Family,
    Fantasy,
    #[serde(rename = "Film-Noir")]
    FilmNoir,
    #[serde(rename = "Game-Show")]
    GameShow,
    History,
    Horror,
    Music,
    Musical,
    Mystery,
    News,
    #[serde(rename = "Reality-TV")]
    RealityTv,
    Romance,
    #[serde(rename = "Sci-Fi")]
    SciFi,
    Short,
    Sport,
    #[serde(rename = "Talk-Show")]
    TalkShow,
    Thriller,
    War,
    Western,
}

impl Genre {
    pub const ALL: [Genre; 27] = [
        Genre::Action,
        Genre::Adventure,
        Genre::Animation,
        Genre::Biography,
        Genre::Comedy,
        Genre::Crime,
        Genre::Documentary,
        Genre::Drama,
        Genre::Family,
        Genre::Fantasy,
        Genre::FilmNoir,
        Genre::GameShow,
        Genre::History,
        Genre::Horror,
        Genre::Music,
        Genre::Musical,
        Genre::Mystery,
        Genre::News,
        Genre::RealityTv,
        Genre::Romance,
        Genre::SciFi,
        Genre::Short,
        Genre::Sport,
        Genre::TalkShow,
        Genre::Thriller,
        Genre::War,
        Genre::Western,
    ];

    /// Name as stored in a movie's `mostFrequentGenre`
    pub fn as_str(&self) -> &'static str {
        match self {
            Genre::Action => "Action",
            Genre::Adventure => "Adventure",
            Genre::Animation => "Animation",
            Genre::Biography => "Biography",
            Genre::Comedy => "Comedy",
            Genre::Crime => "Crime",
            Genre::Documentary => "Documentary",
            Genre::Drama => "Drama",
            Genre::Family => "Family",
            Genre::Fantasy => "Fantasy",
            Genre::FilmNoir => "Film-Noir",
            Genre::GameShow => "Game-Show",
            Genre::History => "History",
            Genre::Horror => "Horror",
            Genre::Music => "Music",
            Genre::Musical => "Musical",
            Genre::Mystery => "Mystery",
            Genre::News => "News",
            Genre::RealityTv => "Reality-TV",
            Genre::Romance => "Romance",
            Genre::SciFi => "Sci-Fi",
            Genre::Short => "Short",
            Genre::Sport => "Sport",
            Genre::TalkShow => "Talk-Show",
            Genre::Thriller => "Thriller",
            Genre::War => "War",
            Genre::Western => "Western",
        }
    }
}

impl Display for Genre {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A movie in the catalog. Seeded externally and never written by the service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Movie {
    pub imdb_id: String,
    pub title: String,
    /// 0-10 scale
    pub imdb_rating: f64,
    pub most_frequent_genre: String,
    pub most_frequent_keyword: String,
    #[serde(default)]
    pub is_adult: bool,
    pub release_year: i32,
}

impl Movie {
    /// Secondary index ordering a genre's movies by rating
    pub const GENRE_RATING_INDEX: &'static str = "mostFrequentGenre-imdbRating-index";
}

impl Record for Movie {
    const ENTITY: &'static str = "movies";

    fn key(&self) -> ItemKey {
        ItemKey::new(&self.imdb_id)
    }

    fn secondary_index(&self) -> Option<IndexEntry> {
        Some(IndexEntry {
            name: Self::GENRE_RATING_INDEX,
            partition: self.most_frequent_genre.clone(),
            sort: SortValue::Number(self.imdb_rating),
        })
    }
}

/// Snapshot of a movie held in the rotating top-movies table, keyed by
/// (`imdb_id`, `imdb_rating`)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TopMovie {
    pub imdb_id: String,
    pub title: String,
    pub imdb_rating: f64,
    pub most_frequent_genre: String,
    pub most_frequent_keyword: String,
    #[serde(default)]
    pub is_adult: bool,
    pub release_year: i32,
}

impl Record for TopMovie {
    const ENTITY: &'static str = "top_movies";

    fn key(&self) -> ItemKey {
        ItemKey::with_sort(&self.imdb_id, self.imdb_rating.to_string())
    }
}

impl From<Movie> for TopMovie {
    fn from(movie: Movie) -> Self {
        Self {
            imdb_id: movie.imdb_id,
            title: movie.title,
            imdb_rating: movie.imdb_rating,
            most_frequent_genre: movie.most_frequent_genre,
            most_frequent_keyword: movie.most_frequent_keyword,
            is_adult: movie.is_adult,
            release_year: movie.release_year,
        }
    }
}

impl From<TopMovie> for Movie {
    fn from(top: TopMovie) -> Self {
        Self {
            imdb_id: top.imdb_id,
            title: top.title,
            imdb_rating: top.imdb_rating,
            most_frequent_genre: top.most_frequent_genre,
            most_frequent_keyword: top.most_frequent_keyword,
            is_adult: top.is_adult,
            release_year: top.release_year,
        }
    }
}
