#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use hotswap_core::{Conn, ConnGroup, NoopObserver, Result, SqlDriver, Strategy};
    use hotswap_tests::{MockCaps, MockConn, MockDriver, MockStrategy, RecordingObserver, init_logs};
    use std::{collections::BTreeMap, sync::Arc, time::Duration};
    use tokio::sync::{Semaphore, mpsc};
    use tokio_util::sync::CancellationToken;

    fn group(
        initial: &str,
        driver: Arc<MockDriver>,
        force_kill: bool,
        observer: Arc<RecordingObserver>,
    ) -> ConnGroup {
        ConnGroup::new(
            "accounts",
            initial,
            CancellationToken::new(),
            driver,
            BTreeMap::new(),
            force_kill,
            observer,
        )
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
    async fn redelivering_the_current_value_changes_nothing() {
        init_logs();
        let driver = Arc::new(MockDriver::default());
        let observer = Arc::new(RecordingObserver::new());
        let group = group("dsn-a", driver.clone(), true, observer.clone());
        let conn = group.open().await.unwrap();

        group.process_new_value("dsn-a".to_string()).await;

        assert!(observer.changes().is_empty());
        assert!(!conn.get_reset());
        assert!(!conn.get_kill());
        assert_eq!(group.active_conns(), 1);
        assert_eq!(group.value(), "dsn-a");
    }

    #[tokio::test]
    async fn force_kill_closes_the_superseded_generation() {
        init_logs();
        let driver = Arc::new(MockDriver::default());
        let observer = Arc::new(RecordingObserver::new());
        let group = group("dsn-a", driver.clone(), true, observer.clone());
        let conns = [
            group.open().await.unwrap(),
            group.open().await.unwrap(),
            group.open().await.unwrap(),
        ];

        group.process_new_value("dsn-b".to_string()).await;

        assert_eq!(observer.changes(), vec!["accounts"]);
        for conn in &conns {
            assert!(conn.get_reset());
            assert!(conn.get_kill());
        }
        for state in driver.conn_states() {
            assert!(state.is_closed());
            assert_eq!(state.close_count(), 1);
        }
        assert_eq!(group.active_conns(), 0);
        assert_eq!(group.value(), "dsn-b");

        group.open().await.unwrap();
        assert_eq!(
            driver.opened_dsns(),
            vec!["dsn-a", "dsn-a", "dsn-a", "dsn-b"]
        );
        assert_eq!(group.active_conns(), 1);
    }

    #[tokio::test]
    async fn graceful_shift_drains_before_closing() {
        init_logs();
        let driver = Arc::new(MockDriver::default());
        let observer = Arc::new(RecordingObserver::new());
        let group = group("dsn-a", driver.clone(), false, observer.clone());
        let first = group.open().await.unwrap();

        group.process_new_value("dsn-b".to_string()).await;

        // Superseded connections keep serving in-flight work: marked for the
        // pool to drop on return, but not closed.
        assert!(first.get_reset());
        assert!(!first.get_kill());
        assert!(!driver.conn_states()[0].is_closed());

        let second = group.open().await.unwrap();
        assert_eq!(driver.opened_dsns(), vec!["dsn-a", "dsn-b"]);

        group.process_new_value("dsn-c".to_string()).await;

        // The oldest generation runs out of road on the second shift.
        assert!(first.get_kill());
        assert!(driver.conn_states()[0].is_closed());
        assert!(second.get_reset());
        assert!(!second.get_kill());
        assert_eq!(observer.changes(), vec!["accounts", "accounts"]);
    }

    #[tokio::test]
    async fn returning_to_an_earlier_value_is_a_change() {
        init_logs();
        let driver = Arc::new(MockDriver::default());
        let observer = Arc::new(RecordingObserver::new());
        let group = group("dsn-a", driver.clone(), true, observer.clone());
        let conn = group.open().await.unwrap();

        group.process_new_value("dsn-b".to_string()).await;
        group.process_new_value("dsn-a".to_string()).await;

        assert_eq!(observer.changes().len(), 2);
        assert!(conn.get_kill());
        assert_eq!(group.value(), "dsn-a");
    }

    #[tokio::test]
    async fn driver_options_are_merged_into_the_dsn() {
        init_logs();
        let driver = Arc::new(MockDriver::default());
        let options: BTreeMap<String, String> = [("sslmode".to_string(), "disable".to_string())]
            .into_iter()
            .collect();
        let group = ConnGroup::new(
            "accounts",
            "postgres://localhost:5432/app",
            CancellationToken::new(),
            driver.clone(),
            options,
            false,
            Arc::new(NoopObserver),
        );
        group.open().await.unwrap();
        assert_eq!(
            driver.opened_dsns(),
            vec!["postgres://localhost:5432/app?sslmode=disable"]
        );
    }

    #[tokio::test]
    async fn run_loop_applies_updates_from_the_strategy() {
        init_logs();
        let driver = Arc::new(MockDriver::default());
        let strategy = MockStrategy::new("dsn-a");
        let parent = CancellationToken::new();
        let (value, updates) = strategy.watch(&parent, "/etc/app/dsn", "").await.unwrap();
        let group = Arc::new(ConnGroup::new(
            "accounts",
            value,
            parent.clone(),
            driver.clone(),
            BTreeMap::new(),
            true,
            Arc::new(NoopObserver),
        ));
        tokio::spawn(group.clone().run_loop(updates));
        let conn = group.open().await.unwrap();

        strategy.push("dsn-b").await;
        wait_until("the update to be applied", || conn.get_kill()).await;
        assert_eq!(group.value(), "dsn-b");

        parent.cancel();
    }

    /// Driver whose opens park between snapshotting the group state and
    /// producing the connection, so a shift can be interleaved exactly there.
    struct GatedDriver {
        entered: mpsc::UnboundedSender<()>,
        release: Semaphore,
    }

    #[async_trait]
    impl SqlDriver for GatedDriver {
        async fn open(&self, _dsn: &str) -> Result<Box<dyn Conn>> {
            let _ = self.entered.send(());
            let _permit = self.release.acquire().await?;
            Ok(Box::new(MockConn::new(MockCaps::all())))
        }
    }

    #[tokio::test]
    async fn opens_that_lose_a_shift_race_start_reset() {
        init_logs();
        let (entered, mut entered_rx) = mpsc::unbounded_channel();
        let driver = Arc::new(GatedDriver {
            entered,
            release: Semaphore::new(0),
        });
        let group = Arc::new(ConnGroup::new(
            "accounts",
            "dsn-a",
            CancellationToken::new(),
            driver.clone(),
            BTreeMap::new(),
            false,
            Arc::new(NoopObserver),
        ));

        let opener = tokio::spawn({
            let group = group.clone();
            async move { group.open().await.unwrap() }
        });
        entered_rx.recv().await.unwrap();

        group.process_new_value("dsn-b".to_string()).await;
        driver.release.add_permits(1);
        let conn = opener.await.unwrap();

        // The connection joined the generation captured before the shift and
        // missed its reset pass; it must not be handed out unmarked.
        assert!(conn.get_reset());
        assert!(!conn.get_kill());
        assert_eq!(group.active_conns(), 0);
    }

    #[tokio::test]
    async fn parent_cancellation_reaches_every_generation() {
        init_logs();
        let driver = Arc::new(MockDriver::default());
        let parent = CancellationToken::new();
        let group = ConnGroup::new(
            "accounts",
            "dsn-a",
            parent.clone(),
            driver.clone(),
            BTreeMap::new(),
            false,
            Arc::new(NoopObserver),
        );
        let first = group.open().await.unwrap();
        group.process_new_value("dsn-b".to_string()).await;
        let second = group.open().await.unwrap();

        parent.cancel();

        assert!(!first.is_valid().await);
        assert!(!second.is_valid().await);
        assert!(first.get_kill());
        assert!(second.get_kill());
    }
}
