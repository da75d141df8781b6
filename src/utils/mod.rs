pub mod crypto;
pub mod http;
pub mod interrupt;
pub mod serialization;
