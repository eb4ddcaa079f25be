pub mod classifier;
pub mod extractor;
pub mod grid;
pub mod models;
pub mod time_slots;
