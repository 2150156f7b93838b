//! Content-addressed identities for chunks and vectors

use crate::chunk::compute_text_hash;
use uuid::Uuid;

/// Stable key of one chunk of one source
pub fn chunk_key(
    tenant_user_id: &str,
    source_type: &str,
    source_key: &str,
    segment_index: usize,
    chunk_index: usize,
    content_hash: &str,
) -> String {
    let material = format!(
        "{}|{}|{}|{}|{}|{}",
        tenant_user_id, source_type, source_key, segment_index, chunk_index, content_hash
    );
    format!("ck_{}", compute_text_hash(&material))
}

/// Vector store point id for a chunk key at a given dimension.
///
/// A UUIDv5, since the vector store only accepts UUID point ids.
pub fn vector_id(
    tenant_user_id: &str,
    source_type: &str,
    source_key: &str,
    chunk_key: &str,
    dimension: usize,
) -> String {
    let material = format!(
        "{}|{}|{}|{}|{}",
        tenant_user_id, source_type, source_key, chunk_key, dimension
    );
    Uuid::new_v5(&Uuid::NAMESPACE_OID, material.as_bytes()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_key_is_deterministic() {
        let a = chunk_key("U1", "self_profile", "U1", 0, 0, "h");
        let b = chunk_key("U1", "self_profile", "U1", 0, 0, "h");
        assert_eq!(a, b);
        assert!(a.starts_with("ck_"));
        assert_eq!(a.len(), 3 + 64);
    }

    #[test]
    fn test_chunk_key_depends_on_every_part() {
        let base = chunk_key("U1", "chat_private", "U2", 0, 0, "h");
        assert_ne!(base, chunk_key("U9", "chat_private", "U2", 0, 0, "h"));
        assert_ne!(base, chunk_key("U1", "chat_group", "U2", 0, 0, "h"));
        assert_ne!(base, chunk_key("U1", "chat_private", "U3", 0, 0, "h"));
        assert_ne!(base, chunk_key("U1", "chat_private", "U2", 1, 0, "h"));
        assert_ne!(base, chunk_key("U1", "chat_private", "U2", 0, 1, "h"));
        assert_ne!(base, chunk_key("U1", "chat_private", "U2", 0, 0, "g"));
    }

    #[test]
    fn test_vector_id_is_uuid_and_dimension_scoped() {
        let a = vector_id("U1", "self_profile", "U1", "ck_x", 384);
        assert!(Uuid::try_parse(&a).is_ok());
        assert_eq!(a, vector_id("U1", "self_profile", "U1", "ck_x", 384));
        assert_ne!(a, vector_id("U1", "self_profile", "U1", "ck_x", 768));
    }
}
