//! Storage key layout of committed sections.
//!
//! ```text
//! idx:<name>:count                   -> u64 BE, committed sections
//! idx:<name>:pruned                  -> u64 BE, sections whose data is gone
//! idx:<name>:root:<section>          -> 32-byte section root
//! idx:<name>:meta:<section>          -> backend metadata (never pruned)
//! idx:<name>:data:<section>:<suffix> -> section data (pruned)
//! ```

fn base(name: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(8 + name.len() + 16);
    key.extend_from_slice(b"idx:");
    key.extend_from_slice(name.as_bytes());
    key.push(b':');
    key
}

pub fn count_key(name: &str) -> Vec<u8> {
    let mut key = base(name);
    key.extend_from_slice(b"count");
    key
}

pub fn pruned_key(name: &str) -> Vec<u8> {
    let mut key = base(name);
    key.extend_from_slice(b"pruned");
    key
}

pub fn root_key(name: &str, section: u64) -> Vec<u8> {
    let mut key = base(name);
    key.extend_from_slice(b"root:");
    key.extend_from_slice(&section.to_be_bytes());
    key
}

pub fn meta_key(name: &str, section: u64) -> Vec<u8> {
    let mut key = base(name);
    key.extend_from_slice(b"meta:");
    key.extend_from_slice(&section.to_be_bytes());
    key
}

pub fn data_prefix(name: &str, section: u64) -> Vec<u8> {
    let mut key = base(name);
    key.extend_from_slice(b"data:");
    key.extend_from_slice(&section.to_be_bytes());
    key.push(b':');
    key
}

pub fn data_key(name: &str, section: u64, suffix: &[u8]) -> Vec<u8> {
    let mut key = data_prefix(name, section);
    key.extend_from_slice(suffix);
    key
}

/// Decode a stored big-endian counter.
pub fn decode_u64(bytes: &[u8]) -> Option<u64> {
    let raw: [u8; 8] = bytes.try_into().ok()?;
    Some(u64::from_be_bytes(raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_keys_share_the_section_prefix() {
        let prefix = data_prefix("cht", 3);
        assert!(data_key("cht", 3, b"abc").starts_with(&prefix));
        assert!(!data_key("cht", 4, b"abc").starts_with(&prefix));
        // Another indexer whose name extends this one must not collide.
        assert!(!data_key("chtx", 3, b"abc").starts_with(&prefix));
    }

    #[test]
    fn test_root_keys_sort_by_section() {
        assert!(root_key("bloombits", 1) < root_key("bloombits", 2));
        assert!(root_key("bloombits", 255) < root_key("bloombits", 256));
    }
}
