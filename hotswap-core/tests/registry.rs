#[cfg(test)]
mod tests {
    use hotswap_core::{Registry, Strategy};
    use hotswap_tests::MockStrategy;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    #[test]
    #[should_panic(expected = "called twice")]
    fn rejects_duplicate_strategy() {
        let registry = Registry::new();
        registry.register_strategy("mock", Arc::new(MockStrategy::new("dsn-a")));
        registry.register_strategy("mock", Arc::new(MockStrategy::new("dsn-a")));
    }

    #[tokio::test]
    async fn unregister_removes_and_closes_the_strategy() {
        let registry = Registry::new();
        let strategy = Arc::new(MockStrategy::new("dsn-a"));
        registry.register_strategy("mock", strategy.clone());
        let (_, mut updates) = strategy
            .watch(&CancellationToken::new(), "/etc/app/dsn", "")
            .await
            .unwrap();

        registry.unregister_strategy("mock").await;

        assert!(registry.strategies().is_empty());
        assert!(strategy.is_closed());
        // Closing drops the update senders, ending every open watch.
        assert!(updates.recv().await.is_none());
    }
}
