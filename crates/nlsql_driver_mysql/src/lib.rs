mod driver;

pub use driver::{MysqlDialectImpl, MysqlDriver};
