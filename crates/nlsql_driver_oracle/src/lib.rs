mod driver;

pub use driver::{OracleDialectImpl, OracleDriver};
