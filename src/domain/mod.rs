pub mod models;
pub mod mutations;
pub mod pool;
pub mod report;
pub mod rules;
