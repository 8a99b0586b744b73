// tests/property/cache_test.rs

//! Property-based tests for shared cache semantics against simple models

use crate::test_helpers::TestContext;
use proptest::prelude::*;
use std::collections::{HashMap, VecDeque};

#[derive(Debug, Clone)]
enum ListOp {
    PushHead(String),
    PushTail(String),
    PopHead,
    PopTail,
    Remove(String),
}

fn list_op() -> impl Strategy<Value = ListOp> {
    let element = "[a-c]{1,2}";
    prop_oneof![
        element.prop_map(ListOp::PushHead),
        element.prop_map(ListOp::PushTail),
        Just(ListOp::PopHead),
        Just(ListOp::PopTail),
        element.prop_map(ListOp::Remove),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        ..ProptestConfig::default()
    })]

    #[test]
    fn test_map_put_matches_model(
        puts in prop::collection::vec(
            (
                prop::collection::hash_map("[a-e]", "[a-z0-9]{0,8}", 0..=5),
                any::<bool>(),
            ),
            1..=20
        )
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let ctx = TestContext::new();
            let cache = ctx.cache().await;
            let mut model: HashMap<String, String> = HashMap::new();

            for (entries, append) in &puts {
                cache.map_put("map", entries, *append).await.unwrap();
                if *append {
                    model.extend(entries.iter().map(|(k, v)| (k.clone(), v.clone())));
                } else {
                    model = entries.clone();
                }

                assert_eq!(cache.map_get_entries("map").await.unwrap(), model);
                assert_eq!(ctx.store.contains_key("map"), !model.is_empty());
            }
        });
    }

    #[test]
    fn test_list_operations_match_model(
        operations in prop::collection::vec(list_op(), 1..=40),
        transactional in any::<bool>()
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let ctx = TestContext::new();
            let cache = ctx.cache().await;
            let mut model: VecDeque<String> = VecDeque::new();
            let mut bulk = cache.start_bulk(transactional);

            for op in &operations {
                match op {
                    ListOp::PushHead(e) => {
                        model.push_front(e.clone());
                        bulk = bulk.list_push_head("list", e);
                    }
                    ListOp::PushTail(e) => {
                        model.push_back(e.clone());
                        bulk = bulk.list_push_tail("list", e);
                    }
                    ListOp::PopHead => {
                        model.pop_front();
                        bulk = bulk.list_pop_head("list");
                    }
                    ListOp::PopTail => {
                        model.pop_back();
                        bulk = bulk.list_pop_tail("list");
                    }
                    ListOp::Remove(e) => {
                        model.retain(|m| m != e);
                        bulk = bulk.list_remove("list", e);
                    }
                }
            }
            bulk.execute().await.unwrap();

            let expected: Vec<String> = model.iter().cloned().collect();
            assert_eq!(cache.list_get_elements("list").await.unwrap(), expected);
            assert_eq!(cache.list_get_head("list").await.unwrap(), model.front().cloned());
            assert_eq!(cache.list_get_tail("list").await.unwrap(), model.back().cloned());
        });
    }
}
