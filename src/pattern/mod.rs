pub mod store;
pub mod types;

pub use store::PatternStore;
pub use types::{DefaultPattern, Pattern, PatternFrame, PatternSource};
