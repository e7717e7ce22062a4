mod directory;
mod investigations;
mod nodes;
mod sqlite_store;
mod tickets;

pub use nodes::NewNode;
pub use sqlite_store::{Repo, SqliteStore, AGORA_DB, AGORA_DIR};
