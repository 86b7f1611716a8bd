mod filter;

pub use filter::ContentFilter;
