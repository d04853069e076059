pub mod book_store;
pub mod snapshot;

pub use book_store::BookStore;
pub use snapshot::{SnapshotPublisher, StalenessTracker};
