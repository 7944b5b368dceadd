#[cfg(test)]
mod tests {
    use hotswap_core::{HotswapDriver, HotswapError, Registry};
    use hotswap_tests::{MockDriver, MockStrategy, RecordingObserver, init_logs};
    use std::{sync::Arc, time::Duration};

    fn wired(initial: &str) -> (HotswapDriver, Arc<MockDriver>, Arc<MockStrategy>) {
        let registry = Arc::new(Registry::new());
        let driver = Arc::new(MockDriver::default());
        let strategy = Arc::new(MockStrategy::new(initial));
        registry.register_sql_driver("db", driver.clone());
        registry.register_strategy("mock", strategy.clone());
        (HotswapDriver::new(registry), driver, strategy)
    }

    fn kind(err: &hotswap_core::Error) -> Option<HotswapError> {
        err.downcast_ref::<HotswapError>().copied()
    }

    async fn wait_until(what: &str, condition: impl Fn() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {what}"));
    }

    #[tokio::test]
    async fn malformed_connection_strings_are_rejected() {
        init_logs();
        let (hotswap, _, _) = wired("dsn-a");
        let err = hotswap.open("not a url").await.unwrap_err();
        assert_eq!(kind(&err), Some(HotswapError::MalformedConnectionString));
    }

    #[tokio::test]
    async fn unknown_scheme_and_unknown_driver_are_distinct() {
        init_logs();
        let (hotswap, _, _) = wired("dsn-a");

        let err = hotswap.open("nope://db/etc/app/dsn").await.unwrap_err();
        assert_eq!(kind(&err), Some(HotswapError::UnsupportedStrategy));

        let err = hotswap.open("mock://nope/etc/app/dsn").await.unwrap_err();
        assert_eq!(kind(&err), Some(HotswapError::UnknownDriver));
    }

    #[tokio::test]
    async fn repeated_opens_share_one_group_and_one_watch() {
        init_logs();
        let (hotswap, driver, strategy) = wired("dsn-a");

        hotswap.open("mock://db/etc/app/dsn").await.unwrap();
        hotswap.open("mock://db/etc/app/dsn").await.unwrap();

        assert_eq!(
            strategy.watches(),
            vec![("/etc/app/dsn".to_string(), "".to_string())]
        );
        assert_eq!(driver.opened_dsns(), vec!["dsn-a", "dsn-a"]);
    }

    #[tokio::test]
    async fn distinct_connection_strings_get_distinct_groups() {
        init_logs();
        let (hotswap, _, strategy) = wired("dsn-a");

        hotswap.open("mock://db/etc/app/dsn").await.unwrap();
        hotswap.open("mock://db/etc/other/dsn").await.unwrap();

        assert_eq!(strategy.watches().len(), 2);
    }

    #[tokio::test]
    async fn force_kill_flag_in_the_query_kills_on_change() {
        init_logs();
        let (hotswap, driver, strategy) = wired("dsn-a");
        let conn = hotswap
            .open("mock://db/etc/app/dsn?forceKill=true")
            .await
            .unwrap();

        strategy.push("dsn-b").await;
        wait_until("the superseded conn to be killed", || conn.get_kill()).await;
        assert!(conn.get_reset());
        assert!(driver.conn_states()[0].is_closed());
    }

    #[tokio::test]
    async fn changes_drain_gracefully_by_default() {
        init_logs();
        let (hotswap, driver, strategy) = wired("dsn-a");
        let conn = hotswap.open("mock://db/etc/app/dsn").await.unwrap();

        strategy.push("dsn-b").await;
        wait_until("the superseded conn to be marked reset", || conn.get_reset()).await;
        assert!(!conn.get_kill());
        assert!(!driver.conn_states()[0].is_closed());

        // New opens land on the new value while the old conn drains.
        hotswap.open("mock://db/etc/app/dsn").await.unwrap();
        assert_eq!(driver.opened_dsns(), vec!["dsn-a", "dsn-b"]);
    }

    #[tokio::test]
    async fn change_notifications_reach_the_observer() {
        init_logs();
        let registry = Arc::new(Registry::new());
        let driver = Arc::new(MockDriver::default());
        let strategy = Arc::new(MockStrategy::new("dsn-a"));
        registry.register_sql_driver("db", driver.clone());
        registry.register_strategy("mock", strategy.clone());
        let observer = Arc::new(RecordingObserver::new());
        let hotswap = HotswapDriver::with_observer(registry, observer.clone());

        let conn = hotswap.open("mock://db/etc/app/dsn").await.unwrap();
        strategy.push("dsn-b").await;
        wait_until("the change to be observed", || !observer.changes().is_empty()).await;
        assert_eq!(observer.changes(), vec!["mock://db/etc/app/dsn"]);
        drop(conn);
    }

    #[tokio::test]
    async fn open_failures_from_the_wrapped_driver_pass_through() {
        init_logs();
        let (hotswap, driver, _) = wired("dsn-a");
        driver.set_fail_opens(true);
        assert!(hotswap.open("mock://db/etc/app/dsn").await.is_err());
    }

    #[tokio::test]
    async fn shutdown_condemns_every_open_connection() {
        init_logs();
        let (hotswap, _, _) = wired("dsn-a");
        let conn = hotswap.open("mock://db/etc/app/dsn").await.unwrap();

        hotswap.shutdown();

        assert!(!conn.is_valid().await);
        assert!(conn.get_kill());
    }
}
