// tests/integration/registry_test.rs

//! Integration tests for the strategy registry key namespace

use super::test_helpers::TestContext;
use moonship::core::registry::{
    ConfigValue, ENGINES_KEY, StrategyRecord, StrategyRegistry, strategies_key,
    strategy_config_key, strategy_key,
};
use serde_json::json;
use std::collections::HashMap;

async fn registry(ctx: &TestContext) -> StrategyRegistry {
    StrategyRegistry::new(ctx.cache().await)
}

fn arbitrage(engine: &str) -> StrategyRecord {
    StrategyRecord::new(engine, "arbitrage")
        .with_attribute("status", "running")
        .with_config(
            "markets",
            ConfigValue::List(vec!["BTC-USD".into(), "ETH-USD".into()]),
        )
        .with_config("spread", ConfigValue::Text("0.5".into()))
}

#[test]
fn test_key_layout() {
    assert_eq!(ENGINES_KEY, "moonship.engines");
    assert_eq!(strategies_key("alpha"), "moonship.alpha.strategies");
    assert_eq!(strategy_key("alpha", "arb"), "moonship.alpha.strategies.arb");
    assert_eq!(
        strategy_config_key("alpha", "arb"),
        "moonship.alpha.strategies.arb.config"
    );
}

#[tokio::test]
async fn test_register_writes_every_key() {
    let ctx = TestContext::new();
    let registry = registry(&ctx).await;

    registry.register_strategy(&arbitrage("alpha")).await.unwrap();

    assert!(ctx.store.set_members(ENGINES_KEY).unwrap().contains("alpha"));
    assert!(
        ctx.store
            .set_members(&strategies_key("alpha"))
            .unwrap()
            .contains("arbitrage")
    );
    assert_eq!(
        ctx.store
            .map_get(&strategy_key("alpha", "arbitrage"), "status")
            .unwrap()
            .as_deref(),
        Some("running")
    );
    assert_eq!(
        ctx.store
            .map_get(&strategy_config_key("alpha", "arbitrage"), "markets")
            .unwrap()
            .as_deref(),
        Some("BTC-USD,ETH-USD")
    );
}

#[tokio::test]
async fn test_markets_are_split_on_read() {
    let ctx = TestContext::new();
    let cache = ctx.cache().await;
    let registry = StrategyRegistry::new(cache.clone());

    let fields = |pairs: &[(&str, &str)]| -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    };
    cache.set_add(ENGINES_KEY, "alpha").await.unwrap();
    cache
        .set_add(&strategies_key("alpha"), "arbitrage")
        .await
        .unwrap();
    cache
        .map_put(
            &strategy_key("alpha", "arbitrage"),
            &fields(&[("status", "stopped")]),
            false,
        )
        .await
        .unwrap();
    cache
        .map_put(
            &strategy_config_key("alpha", "arbitrage"),
            &fields(&[("markets", "BTC-USD,ETH-USD"), ("spread", "0.5")]),
            false,
        )
        .await
        .unwrap();

    let strategy = registry
        .get_strategy("arbitrage", "alpha")
        .await
        .unwrap()
        .unwrap();

    assert_eq!(
        strategy.config.get("markets"),
        Some(&ConfigValue::List(vec![
            "BTC-USD".to_string(),
            "ETH-USD".to_string()
        ]))
    );
    assert_eq!(
        strategy.to_json().unwrap(),
        json!({
            "name": "arbitrage",
            "engine": "alpha",
            "status": "stopped",
            "config": {"markets": ["BTC-USD", "ETH-USD"], "spread": "0.5"}
        })
    );
}

#[tokio::test]
async fn test_register_then_get_returns_same_record() {
    let ctx = TestContext::new();
    let registry = registry(&ctx).await;
    let strategy = arbitrage("alpha");

    registry.register_strategy(&strategy).await.unwrap();

    assert_eq!(
        registry.get_strategy("arbitrage", "alpha").await.unwrap(),
        Some(strategy)
    );
    assert_eq!(registry.get_strategy("arbitrage", "beta").await.unwrap(), None);
    assert_eq!(registry.get_strategy("missing", "alpha").await.unwrap(), None);
}

#[tokio::test]
async fn test_reserved_attribute_names_are_not_duplicated() {
    let ctx = TestContext::new();
    let cache = ctx.cache().await;
    let registry = StrategyRegistry::new(cache.clone());
    let attributes = HashMap::from([
        ("name".to_string(), "spoofed".to_string()),
        ("status".to_string(), "running".to_string()),
    ]);
    cache
        .map_put(&strategy_key("alpha", "arb"), &attributes, false)
        .await
        .unwrap();

    let strategy = registry.get_strategy("arb", "alpha").await.unwrap().unwrap();

    assert_eq!(strategy.name, "arb");
    assert!(!strategy.attributes.contains_key("name"));
    assert_eq!(strategy.to_json().unwrap()["name"], json!("arb"));
}

#[tokio::test]
async fn test_list_is_ordered_by_engine_then_name() {
    let ctx = TestContext::new();
    let registry = registry(&ctx).await;

    for (engine, name) in [("beta", "b"), ("alpha", "z"), ("alpha", "a")] {
        registry
            .register_strategy(&StrategyRecord::new(engine, name).with_attribute("status", "idle"))
            .await
            .unwrap();
    }

    let listed: Vec<(String, String)> = registry
        .list_strategies()
        .await
        .unwrap()
        .into_iter()
        .map(|s| (s.engine, s.name))
        .collect();

    assert_eq!(
        listed,
        vec![
            ("alpha".to_string(), "a".to_string()),
            ("alpha".to_string(), "z".to_string()),
            ("beta".to_string(), "b".to_string()),
        ]
    );
    assert_eq!(registry.list_engines().await.unwrap(), vec!["alpha", "beta"]);
}

#[tokio::test]
async fn test_list_skips_names_without_record() {
    let ctx = TestContext::new();
    let cache = ctx.cache().await;
    let registry = StrategyRegistry::new(cache.clone());
    registry.register_strategy(&arbitrage("alpha")).await.unwrap();
    cache.set_add(&strategies_key("alpha"), "ghost").await.unwrap();

    let listed = registry.list_strategies().await.unwrap();

    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].name, "arbitrage");
}

#[tokio::test]
async fn test_register_replaces_previous_configuration() {
    let ctx = TestContext::new();
    let registry = registry(&ctx).await;
    registry.register_strategy(&arbitrage("alpha")).await.unwrap();

    let replacement = StrategyRecord::new("alpha", "arbitrage")
        .with_attribute("status", "stopped")
        .with_config("markets", ConfigValue::List(vec!["SOL-USD".into()]));
    registry.register_strategy(&replacement).await.unwrap();

    let stored = registry
        .get_strategy("arbitrage", "alpha")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored, replacement);
    assert!(!stored.config.contains_key("spread"));
}

#[tokio::test]
async fn test_update_attributes_merges() {
    let ctx = TestContext::new();
    let registry = registry(&ctx).await;
    registry
        .register_strategy(&arbitrage("alpha").with_attribute("owner", "desk-1"))
        .await
        .unwrap();

    let update = HashMap::from([("status".to_string(), "stopped".to_string())]);
    registry
        .update_attributes("alpha", "arbitrage", &update)
        .await
        .unwrap();

    let stored = registry
        .get_strategy("arbitrage", "alpha")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.attributes.get("status").map(String::as_str), Some("stopped"));
    assert_eq!(stored.attributes.get("owner").map(String::as_str), Some("desk-1"));
}

#[tokio::test]
async fn test_unregister_removes_strategy_but_keeps_engine() {
    let ctx = TestContext::new();
    let registry = registry(&ctx).await;
    registry.register_strategy(&arbitrage("alpha")).await.unwrap();

    registry
        .unregister_strategy("alpha", "arbitrage")
        .await
        .unwrap();

    assert_eq!(registry.get_strategy("arbitrage", "alpha").await.unwrap(), None);
    assert!(registry.list_strategies().await.unwrap().is_empty());
    assert_eq!(registry.list_engines().await.unwrap(), vec!["alpha"]);
    assert!(!ctx.store.contains_key(&strategy_config_key("alpha", "arbitrage")));
}
