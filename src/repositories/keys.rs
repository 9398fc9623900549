//! Composite key encoding for durable regions
//!
//! Composite keys concatenate their components with a big-endian u32 length
//! prefix per component. Keys are byte-compared by the store, so every entry
//! whose first component equals `c` is reachable by a range scan over the
//! encoding of `c` alone.

/// Encode a composite key from its components.
pub fn composite_key(parts: &[&[u8]]) -> Vec<u8> {
    let total: usize = parts.iter().map(|p| 4 + p.len()).sum();
    let mut out = Vec::with_capacity(total);
    for part in parts {
        out.extend_from_slice(&(part.len() as u32).to_be_bytes());
        out.extend_from_slice(part);
    }
    out
}

/// Encode the scan prefix covering every composite key whose leading
/// components equal `parts`.
pub fn composite_prefix(parts: &[&[u8]]) -> Vec<u8> {
    composite_key(parts)
}

/// Split a composite key back into its components.
///
/// Returns `None` when the encoding is malformed (truncated length prefix or
/// component).
pub fn split_composite(key: &[u8]) -> Option<Vec<Vec<u8>>> {
    let mut parts = Vec::new();
    let mut rest = key;
    while !rest.is_empty() {
        if rest.len() < 4 {
            return None;
        }
        let len = u32::from_be_bytes([rest[0], rest[1], rest[2], rest[3]]) as usize;
        rest = &rest[4..];
        if rest.len() < len {
            return None;
        }
        parts.push(rest[..len].to_vec());
        rest = &rest[len..];
    }
    Some(parts)
}

/// Smallest byte string strictly greater than every key starting with
/// `prefix`, or `None` when no such bound exists (all bytes are 0xFF).
pub fn prefix_upper_bound(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut bound = prefix.to_vec();
    while let Some(last) = bound.last_mut() {
        if *last < 0xFF {
            *last += 1;
            return Some(bound);
        }
        bound.pop();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_composite_roundtrip() {
        let key = composite_key(&[b"c1", b"doc_0042"]);
        let parts = split_composite(&key).unwrap();
        assert_eq!(parts, vec![b"c1".to_vec(), b"doc_0042".to_vec()]);
    }

    #[test]
    fn test_prefix_covers_all_second_components() {
        let prefix = composite_prefix(&[b"c1"]);
        let a = composite_key(&[b"c1", b"a"]);
        let b = composite_key(&[b"c1", b"zzzz"]);
        let other = composite_key(&[b"c2", b"a"]);

        assert!(a.starts_with(&prefix));
        assert!(b.starts_with(&prefix));
        assert!(!other.starts_with(&prefix));
    }

    #[test]
    fn test_prefix_does_not_match_longer_first_component() {
        // "c1" must not capture entries under "c10".
        let prefix = composite_prefix(&[b"c1"]);
        let longer = composite_key(&[b"c10", b"a"]);
        assert!(!longer.starts_with(&prefix));
    }

    #[test]
    fn test_upper_bound_ordering() {
        let prefix = composite_prefix(&[b"c1"]);
        let bound = prefix_upper_bound(&prefix).unwrap();

        let inside = composite_key(&[b"c1", b"anything"]);
        assert!(inside.as_slice() >= prefix.as_slice());
        assert!(inside.as_slice() < bound.as_slice());

        let outside = composite_key(&[b"c2", b"a"]);
        assert!(outside.as_slice() >= bound.as_slice());
    }

    #[test]
    fn test_upper_bound_saturates() {
        assert_eq!(prefix_upper_bound(&[0x01, 0xFF]), Some(vec![0x02]));
        assert_eq!(prefix_upper_bound(&[0xFF, 0xFF]), None);
    }

    #[test]
    fn test_malformed_composite_rejected() {
        assert!(split_composite(&[0, 0, 0]).is_none());
        assert!(split_composite(&[0, 0, 0, 9, b'x']).is_none());
    }
}
