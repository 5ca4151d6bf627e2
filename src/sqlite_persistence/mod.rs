mod store;
mod table;

pub use store::SqliteStore;
pub use table::{ensure_all, Column, Index, SqlType, Table};
