pub mod client;
pub mod provider;
pub mod types;
pub mod universe;
