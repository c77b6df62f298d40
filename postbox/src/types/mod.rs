pub mod entry;
pub mod ids;
pub mod request;
pub mod state;

pub use entry::{Entry, EntryStatus};
pub use ids::EntryId;
pub use request::EnqueueRequest;
pub use state::{OutboxState, StatusCounts};
