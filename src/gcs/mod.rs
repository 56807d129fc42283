pub mod storage;

pub use storage::{GcsError, GcsStorage, ObjectStore};
