pub mod archive_store;
pub mod memory;
pub mod postgres;
