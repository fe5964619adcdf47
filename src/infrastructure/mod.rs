pub mod config;
pub mod error;
pub mod plan_repository;
pub mod solver_client;
pub mod storage;
