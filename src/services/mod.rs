pub mod change_feed;
pub mod deleted_reviews;
pub mod movies;
pub mod pagination;
pub mod recommendations;
pub mod reviews;
pub mod top_movies;
pub mod users;

pub use change_feed::{ChangeFeed, ChangeFeedHandle};
pub use deleted_reviews::{ChangeRecord, DeletedReviewArchiver};
pub use movies::MovieCatalog;
pub use pagination::PaginationCursor;
pub use recommendations::{RecommendationEngine, MAX_RECOMMENDATIONS};
pub use reviews::{ReviewDraft, ReviewWorkflow};
pub use top_movies::{Rotation, TopMovieRotator, MAX_TOP_MOVIES};
pub use users::UserLookup;
