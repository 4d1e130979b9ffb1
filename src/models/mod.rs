pub mod movie;
pub mod review;
pub mod user;

pub use movie::{Genre, Movie, TopMovie};
pub use review::{DeletedReview, ListReviewsResponse, Review};
pub use user::User;
