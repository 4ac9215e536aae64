pub mod ttl;

pub use ttl::TtlCache;

/// Cache key for an operation and its input parameters.
pub fn cache_key(operation: &str, params: &[&str]) -> String {
    let mut key = operation.to_string();
    for p in params {
        key.push(':');
        key.push_str(p);
    }
    key
}
