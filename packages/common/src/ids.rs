use crc32fast::Hasher;
use std::sync::atomic::{AtomicU64, Ordering};

/// Short stable hash of a string, hex encoded
pub fn short_hash(input: &str) -> String {
    let mut hasher = Hasher::new();
    hasher.update(input.as_bytes());
    format!("{:08x}", hasher.finalize())
}

/// Sequential ID generator scoped to one document replica.
///
/// Internal ids are `<seed>-<n>`. Semantic ids are `<type-slug>-<suffix>`
/// where the suffix is a hash of the seed and counter, so two replicas with
/// different seeds produce different suffixes for the same counter value.
#[derive(Debug)]
pub struct IdGenerator {
    seed: String,
    count: AtomicU64,
}

impl IdGenerator {
    pub fn new(replica: u64) -> Self {
        Self {
            seed: short_hash(&format!("replica://{}", replica)),
            count: AtomicU64::new(0),
        }
    }

    pub fn from_seed(seed: String) -> Self {
        Self {
            seed,
            count: AtomicU64::new(0),
        }
    }

    fn next(&self) -> u64 {
        self.count.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Generate next internal id with the given prefix (`n`, `e`, `page`, ...)
    pub fn new_id(&self, prefix: &str) -> String {
        format!("{}-{}-{}", prefix, self.seed, self.next())
    }

    /// Generate a human-addressable id for an instance of `construct_type`
    pub fn new_semantic_id(&self, construct_type: &str) -> String {
        let n = self.next();
        let suffix = short_hash(&format!("{}:{}", self.seed, n));
        format!("{}-{}", slugify(construct_type), &suffix[..6])
    }

    pub fn seed(&self) -> &str {
        &self.seed
    }
}

/// Lowercase, dash-separated, ASCII-only form of a display name.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_dash = false;

    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }

    if slug.is_empty() {
        "untitled".to_string()
    } else {
        slug
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequential_internal_ids() {
        let gen = IdGenerator::from_seed("abc".to_string());

        assert_eq!(gen.new_id("n"), "n-abc-1");
        assert_eq!(gen.new_id("e"), "e-abc-2");
    }

    #[test]
    fn test_semantic_ids_are_prefixed_and_distinct() {
        let gen = IdGenerator::new(42);
        let a = gen.new_semantic_id("Service");
        let b = gen.new_semantic_id("Service");

        assert!(a.starts_with("service-"));
        assert_eq!(a.len(), "service-".len() + 6);
        assert_ne!(a, b);
    }

    #[test]
    fn test_replicas_diverge() {
        let a = IdGenerator::new(1).new_semantic_id("task");
        let b = IdGenerator::new(2).new_semantic_id("task");
        assert_ne!(a, b);
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Main Flow"), "main-flow");
        assert_eq!(slugify("  API / Gateway!! "), "api-gateway");
        assert_eq!(slugify("???"), "untitled");
    }
}
