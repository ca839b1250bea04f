mod schema;
mod tokens;
mod types;

pub use schema::Database;
pub use tokens::TokenStore;
pub use types::DatabaseError;
