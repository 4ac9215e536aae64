pub mod market;
pub mod ranking;
pub mod signal;
