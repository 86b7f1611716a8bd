mod repository;
mod schema;

pub use repository::{PublishOutcome, Repository};
