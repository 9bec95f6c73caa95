pub mod item_path;
pub mod validating_stream;
