mod driver;

pub use driver::{SqliteDialectImpl, SqliteDriver};
