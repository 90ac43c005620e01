mod repository;

pub use repository::SqliteRawStore;
