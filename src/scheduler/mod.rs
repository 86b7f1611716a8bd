// Scheduled publishing: promotes due articles on a timer or on demand.

mod engine;
mod store;

pub use engine::PublishScheduler;
pub use store::PublishStore;
