mod model;
mod repository;

pub use model::ExecutionStateDB;
pub use repository::SqliteExecutionStateStore;
