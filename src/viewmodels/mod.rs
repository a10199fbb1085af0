pub mod feed_query;
pub mod feed_viewmodel;

pub use feed_query::{DescriptionLength, FeedQuery, FeedStatistics, SortOrder};
pub use feed_viewmodel::OfflineFeed;
