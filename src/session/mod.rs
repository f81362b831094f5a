pub mod saver;
pub mod store;
