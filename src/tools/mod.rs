pub mod debug;
pub mod query;
pub mod schema;
