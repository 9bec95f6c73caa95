pub mod access;
pub mod context;
pub mod group;
pub mod hosted;
pub mod mapping;
pub mod proxy_repository;
pub mod registry;
pub mod repository;
pub mod router;
pub mod shadow;
pub mod target;
pub mod update_policy;
