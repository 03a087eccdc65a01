pub mod audit;
pub mod entity;
pub mod error;
pub mod event;
pub mod id;
pub mod repository;
pub mod subscription;
