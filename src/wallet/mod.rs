pub mod credential_storage;
pub mod jwt;
pub mod key_management;
