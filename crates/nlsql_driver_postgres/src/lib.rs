mod driver;

pub use driver::{PostgresDialectImpl, PostgresDriver};
