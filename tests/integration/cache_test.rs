// tests/integration/cache_test.rs

//! Integration tests for the shared cache over the in-process backend
//! Tests: list, set and map operations, delete, expire, error handling

use super::test_helpers::TestContext;
use moonship::MoonshipError;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

fn entries(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

// ===== List Tests =====

#[tokio::test]
async fn test_list_push_and_read_ends() {
    let ctx = TestContext::new();
    let cache = ctx.cache().await;

    cache.list_push_tail("list", "b").await.unwrap();
    cache.list_push_tail("list", "c").await.unwrap();
    cache.list_push_head("list", "a").await.unwrap();

    assert_eq!(cache.list_get_head("list").await.unwrap().as_deref(), Some("a"));
    assert_eq!(cache.list_get_tail("list").await.unwrap().as_deref(), Some("c"));
    assert_eq!(
        cache.list_get_elements("list").await.unwrap(),
        vec!["a", "b", "c"]
    );
}

#[tokio::test]
async fn test_list_pop_both_ends() {
    let ctx = TestContext::new();
    let cache = ctx.cache().await;

    for element in ["1", "2", "3"] {
        cache.list_push_tail("list", element).await.unwrap();
    }

    assert_eq!(cache.list_pop_head("list").await.unwrap().as_deref(), Some("1"));
    assert_eq!(cache.list_pop_tail("list").await.unwrap().as_deref(), Some("3"));
    assert_eq!(cache.list_get_elements("list").await.unwrap(), vec!["2"]);
}

#[tokio::test]
async fn test_list_pop_last_element_removes_key() {
    let ctx = TestContext::new();
    let cache = ctx.cache().await;

    cache.list_push_head("list", "only").await.unwrap();
    cache.list_pop_tail("list").await.unwrap();

    assert!(!ctx.store.contains_key("list"));
    assert_eq!(cache.list_pop_head("list").await.unwrap(), None);
    assert_eq!(cache.list_get_head("list").await.unwrap(), None);
}

#[tokio::test]
async fn test_list_remove_every_occurrence() {
    let ctx = TestContext::new();
    let cache = ctx.cache().await;

    for element in ["x", "y", "x", "z", "x"] {
        cache.list_push_tail("list", element).await.unwrap();
    }
    cache.list_remove("list", "x").await.unwrap();

    assert_eq!(cache.list_get_elements("list").await.unwrap(), vec!["y", "z"]);
}

#[tokio::test]
async fn test_missing_list_reads_as_empty() {
    let ctx = TestContext::new();
    let cache = ctx.cache().await;

    assert!(cache.list_get_elements("nothing").await.unwrap().is_empty());
    cache.list_remove("nothing", "x").await.unwrap();
    assert!(!ctx.store.contains_key("nothing"));
}

// ===== Set Tests =====

#[tokio::test]
async fn test_set_members_are_unique() {
    let ctx = TestContext::new();
    let cache = ctx.cache().await;

    cache.set_add("set", "a").await.unwrap();
    cache.set_add("set", "b").await.unwrap();
    cache.set_add("set", "a").await.unwrap();

    let expected: HashSet<String> = ["a", "b"].iter().map(|s| s.to_string()).collect();
    assert_eq!(cache.set_get_elements("set").await.unwrap(), expected);
}

#[tokio::test]
async fn test_set_remove_last_member_removes_key() {
    let ctx = TestContext::new();
    let cache = ctx.cache().await;

    cache.set_add("set", "a").await.unwrap();
    cache.set_remove("set", "a").await.unwrap();
    cache.set_remove("set", "never-there").await.unwrap();

    assert!(!ctx.store.contains_key("set"));
    assert!(cache.set_get_elements("set").await.unwrap().is_empty());
}

// ===== Map Tests =====

#[tokio::test]
async fn test_map_put_replace_leaves_no_prior_fields() {
    let ctx = TestContext::new();
    let cache = ctx.cache().await;

    cache
        .map_put("map", &entries(&[("old", "1"), ("shared", "1")]), true)
        .await
        .unwrap();
    let replacement = entries(&[("shared", "2"), ("new", "2")]);
    cache.map_put("map", &replacement, false).await.unwrap();

    assert_eq!(cache.map_get_entries("map").await.unwrap(), replacement);
}

#[tokio::test]
async fn test_map_put_append_preserves_prior_fields() {
    let ctx = TestContext::new();
    let cache = ctx.cache().await;

    cache
        .map_put("map", &entries(&[("old", "1"), ("shared", "1")]), true)
        .await
        .unwrap();
    cache
        .map_put("map", &entries(&[("shared", "2")]), true)
        .await
        .unwrap();

    assert_eq!(
        cache.map_get_entries("map").await.unwrap(),
        entries(&[("old", "1"), ("shared", "2")])
    );
    assert_eq!(cache.map_get("map", "old").await.unwrap().as_deref(), Some("1"));
    assert_eq!(cache.map_get("map", "missing").await.unwrap(), None);
}

#[tokio::test]
async fn test_map_put_with_no_entries() {
    let ctx = TestContext::new();
    let cache = ctx.cache().await;
    cache.map_put("map", &entries(&[("f", "v")]), true).await.unwrap();

    cache.map_put("map", &HashMap::new(), true).await.unwrap();
    assert_eq!(cache.map_get_entries("map").await.unwrap().len(), 1);

    cache.map_put("map", &HashMap::new(), false).await.unwrap();
    assert!(!ctx.store.contains_key("map"));
}

// ===== Delete / Expire Tests =====

#[tokio::test]
async fn test_delete_removes_any_type() {
    let ctx = TestContext::new();
    let cache = ctx.cache().await;

    cache.list_push_head("list", "a").await.unwrap();
    cache.set_add("set", "a").await.unwrap();
    cache.map_put("map", &entries(&[("f", "v")]), true).await.unwrap();

    for key in ["list", "set", "map", "missing"] {
        cache.delete(key).await.unwrap();
        assert!(!ctx.store.contains_key(key));
    }
}

#[tokio::test(start_paused = true)]
async fn test_expire_removes_key_after_ttl() {
    let ctx = TestContext::new();
    let cache = ctx.cache().await;

    cache.set_add("set", "a").await.unwrap();
    cache.expire("set", 100).await.unwrap();

    tokio::time::advance(Duration::from_millis(60)).await;
    assert!(ctx.store.contains_key("set"));

    tokio::time::advance(Duration::from_millis(60)).await;
    assert!(!ctx.store.contains_key("set"));
    assert!(cache.set_get_elements("set").await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_expire_overwrites_previous_expiry() {
    let ctx = TestContext::new();
    let cache = ctx.cache().await;

    cache.set_add("set", "a").await.unwrap();
    cache.expire("set", 100).await.unwrap();
    tokio::time::advance(Duration::from_millis(80)).await;
    cache.expire("set", 100).await.unwrap();
    tokio::time::advance(Duration::from_millis(80)).await;

    assert!(ctx.store.contains_key("set"));
    assert_eq!(ctx.store.ttl("set"), Some(Duration::from_millis(20)));
}

#[tokio::test]
async fn test_key_without_expiry_is_retained() {
    let ctx = TestContext::new();
    let cache = ctx.cache().await;

    cache.set_add("set", "a").await.unwrap();
    assert_eq!(ctx.store.ttl("set"), None);

    cache.expire("missing", 100).await.unwrap();
    assert!(!ctx.store.contains_key("missing"));
}

// ===== Error Handling Tests =====

#[tokio::test]
async fn test_wrong_type_is_reported() {
    let ctx = TestContext::new();
    let cache = ctx.cache().await;

    cache.set_add("set", "a").await.unwrap();

    assert_eq!(
        cache.list_push_head("set", "x").await,
        Err(MoonshipError::WrongType)
    );
    assert_eq!(cache.map_get("set", "f").await, Err(MoonshipError::WrongType));
    assert_eq!(
        cache.map_put("set", &entries(&[("f", "v")]), true).await,
        Err(MoonshipError::WrongType)
    );
    assert_eq!(
        cache.list_get_elements("set").await,
        Err(MoonshipError::WrongType)
    );
}

#[tokio::test]
async fn test_operations_require_open_cache() {
    let ctx = TestContext::new();
    let cache = ctx.backend.shared_cache();

    assert_eq!(cache.set_add("set", "a").await, Err(MoonshipError::NotOpen));

    cache.open().await.unwrap();
    cache.set_add("set", "a").await.unwrap();
    cache.close().await.unwrap();

    assert_eq!(cache.set_add("set", "b").await, Err(MoonshipError::NotOpen));
    // Data outlives the connection.
    assert!(ctx.store.contains_key("set"));
}
