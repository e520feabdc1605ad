pub mod artifacts;
pub mod database;
pub mod price_repository;
