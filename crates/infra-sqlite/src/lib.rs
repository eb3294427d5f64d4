// OpsPlan Infrastructure - SQLite Adapter
// Implements: TaskStateRepository

mod connection;
mod error;
mod migration;
mod task_repository;

pub use connection::create_pool;
pub use migration::run_migrations;
pub use task_repository::SqliteTaskStateRepository;
