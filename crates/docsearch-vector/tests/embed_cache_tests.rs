use std::sync::Arc;

use docsearch_vector::{content_hash, EmbeddingCache};

#[test]
fn keyed_by_content_and_embedder() {
    let cache = EmbeddingCache::new(8);
    cache.put("bge-m3", "revenue grew", Arc::new(vec![1.0, 0.0]));

    assert!(cache.get("bge-m3", "revenue grew").is_some());
    assert!(cache.get("fake:64", "revenue grew").is_none(), "other embedder");
    assert!(cache.get("bge-m3", "revenue fell").is_none(), "other content");

    let stats = cache.stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 2);
}

#[test]
fn evicted_vectors_stay_alive_for_holders() {
    let cache = EmbeddingCache::new(1);
    cache.put("m", "first", Arc::new(vec![0.5]));
    let held = cache.get("m", "first").expect("cached");

    cache.put("m", "second", Arc::new(vec![0.25]));
    assert!(cache.get("m", "first").is_none(), "evicted by capacity");
    assert_eq!(held.as_slice(), &[0.5]);
    assert_eq!(cache.len(), 1);
}

#[test]
fn zero_capacity_disables_cache() {
    let cache = EmbeddingCache::new(0);
    cache.put("m", "text", Arc::new(vec![1.0]));
    assert!(cache.get("m", "text").is_none());
    assert!(cache.is_empty());
}

#[test]
fn content_hash_is_stable_hex() {
    let h = content_hash("revenue");
    assert_eq!(h, content_hash("revenue"));
    assert_eq!(h.len(), 64);
    assert_ne!(h, content_hash("Revenue"));
}
