pub mod auth_client;
pub mod config;
pub mod document_store;
pub mod error;
pub mod firestore_client;
pub mod firestore_value;
pub mod local_cache;
pub mod logging;
pub mod session_store;
pub mod storage;
