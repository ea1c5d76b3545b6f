pub mod backend;
pub mod config;
pub mod domain;
pub mod id;
pub mod migration;
pub mod module;
pub mod repository;
pub mod store;
pub mod version;
