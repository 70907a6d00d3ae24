pub mod profile_storage;
pub mod session_storage;
