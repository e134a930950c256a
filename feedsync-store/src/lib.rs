pub mod client;
pub mod document;
pub mod http;
pub mod memory;
pub mod query;
pub mod record;
