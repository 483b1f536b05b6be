pub mod event;
pub mod file_entry;
pub mod summary;
pub mod thumbnail;
