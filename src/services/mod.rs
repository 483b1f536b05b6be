pub mod collection;
pub mod event_service;
pub mod file_service;
pub mod identity;
pub mod library;
pub mod settings_service;
pub mod thumbnail_service;
