//! Binary cache key layout for ordered key-value backends.
//!
//! Keys are grouped by namespace, then by entity type, so a single range
//! scan walks every id of one entity type in byte order.

use coherence_core::{EntityType, MAX_ENTITY_TYPE_LEN};

/// Namespace byte for (entity type, id) slots.
const NS_ENTRY: u8 = 0x01;

/// Namespace byte for named leases.
const NS_LEASE: u8 = 0x02;

/// Key of one cache slot.
///
/// # Binary Format
///
/// - Byte 0: namespace (`0x01`)
/// - Bytes 1-2: entity type length (u16, big endian)
/// - Next N bytes: entity type (UTF-8)
/// - Remaining bytes: entity id (UTF-8)
///
/// The length prefix keeps types that are prefixes of each other
/// (`post`, `posts`) in disjoint key ranges.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntryKey {
    entity_type: EntityType,
    id: String,
}

impl EntryKey {
    pub fn new(entity_type: &EntityType, id: &str) -> Self {
        Self {
            entity_type: entity_type.clone(),
            id: id.to_string(),
        }
    }

    pub fn entity_type(&self) -> &EntityType {
        &self.entity_type
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Self::type_prefix(&self.entity_type);
        bytes.extend_from_slice(self.id.as_bytes());
        bytes
    }

    /// Decode a key from bytes.
    ///
    /// Returns `None` if:
    /// - The namespace byte is not the entry namespace
    /// - The declared type length overruns the buffer
    /// - Either part is not valid UTF-8
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        let (&ns, rest) = bytes.split_first()?;
        if ns != NS_ENTRY || rest.len() < 2 {
            return None;
        }
        let type_len = u16::from_be_bytes([rest[0], rest[1]]) as usize;
        let rest = &rest[2..];
        if rest.len() < type_len {
            return None;
        }
        let entity_type = std::str::from_utf8(&rest[..type_len]).ok()?;
        let id = std::str::from_utf8(&rest[type_len..]).ok()?;
        Some(Self {
            entity_type: EntityType::from(entity_type),
            id: id.to_string(),
        })
    }

    /// Prefix shared by every key of `entity_type`.
    pub fn type_prefix(entity_type: &EntityType) -> Vec<u8> {
        let name = entity_type.as_str().as_bytes();
        // SchemaRegistry::validate rejects longer names, and the engine only
        // builds keys for registered types.
        let len = name.len().min(MAX_ENTITY_TYPE_LEN);
        let mut prefix = Vec::with_capacity(3 + len);
        prefix.push(NS_ENTRY);
        prefix.extend_from_slice(&(len as u16).to_be_bytes());
        prefix.extend_from_slice(&name[..len]);
        prefix
    }

    /// Prefix shared by every entry key, regardless of type.
    pub fn entry_namespace() -> [u8; 1] {
        [NS_ENTRY]
    }
}

/// Key of a named lease.
pub fn lease_key(name: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(1 + name.len());
    bytes.push(NS_LEASE);
    bytes.extend_from_slice(name.as_bytes());
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode() {
        let key = EntryKey::new(&EntityType::from("comment"), "c-42");
        let bytes = key.encode();
        assert_eq!(bytes[0], NS_ENTRY);
        assert_eq!(EntryKey::decode(&bytes), Some(key));
    }

    #[test]
    fn test_type_prefix_disjoint_for_prefixed_names() {
        let post = EntryKey::new(&EntityType::from("post"), "sx").encode();
        let posts_prefix = EntryKey::type_prefix(&EntityType::from("posts"));
        assert!(!post.starts_with(&posts_prefix));

        let posts = EntryKey::new(&EntityType::from("posts"), "1").encode();
        let post_prefix = EntryKey::type_prefix(&EntityType::from("post"));
        assert!(!posts.starts_with(&post_prefix));
    }

    #[test]
    fn test_keys_of_one_type_sort_by_id() {
        let t = EntityType::from("post");
        let a = EntryKey::new(&t, "a").encode();
        let b = EntryKey::new(&t, "b").encode();
        assert!(a < b);
        assert!(a.starts_with(&EntryKey::type_prefix(&t)));
    }

    #[test]
    fn test_decode_rejects_foreign_namespace() {
        assert_eq!(EntryKey::decode(&lease_key("coherence.sweep")), None);
        assert_eq!(EntryKey::decode(&[NS_ENTRY, 0, 9, b'x']), None);
        assert_eq!(EntryKey::decode(&[]), None);
    }

    #[test]
    fn test_empty_id_roundtrips() {
        let key = EntryKey::new(&EntityType::from("post"), "");
        assert_eq!(EntryKey::decode(&key.encode()), Some(key));
    }
}
