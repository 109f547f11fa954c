mod local_store;
mod meta;

pub use local_store::{is_state_path, system_time, LocalStorage, STATE_DIR};
pub use meta::{ContentHash, FileMeta};
