//! Where repository content lives: local storages holding items and their attributes, and remote
//!  storages fetching from upstream repositories.

pub mod fs_local_storage;
pub mod http_remote_storage;
pub mod item;
pub mod local_storage;
pub mod path_cache;
pub mod remote_storage;
pub mod transient_local_storage;
