use http::{Method, Uri};

/// Canonical identity of a cacheable request: method plus absolute URL.
/// `entry_id` is the hashed form used for on-disk file names.
#[derive(Debug, Clone)]
pub struct CacheKey {
    key_base: String,
    entry_id: String,
}

impl CacheKey {
    pub fn new(method: &Method, uri: &Uri) -> Self {
        let key_base = format!("{method}::{uri}");
        Self::from_key_base(key_base)
    }

    pub fn from_key_base(key_base: String) -> Self {
        let entry_id = Self::entry_id_for_key(&key_base);
        Self { key_base, entry_id }
    }

    pub fn key_base(&self) -> &str {
        &self.key_base
    }

    pub fn entry_id(&self) -> &str {
        &self.entry_id
    }

    pub fn entry_id_for_key(key_base: &str) -> String {
        blake3::hash(key_base.as_bytes()).to_hex().to_string()
    }

    /// Recovers the request path from a stored key base, for rule matching
    /// against persisted entries.
    pub fn request_path(key_base: &str) -> Option<String> {
        let (_, uri) = key_base.split_once("::")?;
        let uri: Uri = uri.parse().ok()?;
        Some(uri.path().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_base_includes_method_and_full_uri() {
        let uri: Uri = "https://shop.example/js/main.js".parse().unwrap();
        let key = CacheKey::new(&Method::GET, &uri);
        assert_eq!(key.key_base(), "GET::https://shop.example/js/main.js");
        assert_eq!(key.entry_id().len(), 64);
    }

    #[test]
    fn distinct_hosts_get_distinct_ids() {
        let a: Uri = "https://a.example/shared".parse().unwrap();
        let b: Uri = "https://b.example/shared".parse().unwrap();
        let key_a = CacheKey::new(&Method::GET, &a);
        let key_b = CacheKey::new(&Method::GET, &b);
        assert_ne!(key_a.entry_id(), key_b.entry_id());
    }

    #[test]
    fn request_path_round_trips() {
        let uri: Uri = "https://shop.example/api/items?page=2".parse().unwrap();
        let key = CacheKey::new(&Method::GET, &uri);
        assert_eq!(
            CacheKey::request_path(key.key_base()).as_deref(),
            Some("/api/items")
        );
        assert!(CacheKey::request_path("not a key").is_none());
    }
}
