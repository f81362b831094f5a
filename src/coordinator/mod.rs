pub mod manager;

pub use manager::{IasEvent, IasManager};
