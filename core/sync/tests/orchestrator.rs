//! Orchestration: containment, run lock, statistics and hooks.

mod common;

use std::sync::Arc;
use std::time::Instant;

use omnisync_common::{EntityKind, Error, ExecutionMode, FailureScope, Secret};
use omnisync_store::{
    OrderState, PriceList, PriceListItem, RunStatus, RunSubject, Store, SyncConfiguration,
};
use omnisync_sync::{KindOutcome, RunRequest, RunSummary, ScheduleMode, Scheduler, Severity};

use common::*;

#[tokio::test]
async fn test_failed_kind_does_not_stop_later_kinds() {
    let remote = remote();
    remote_product(&remote, "A-1", "Anchor");
    remote.remove_model("sale.order");

    let store = Arc::new(Store::in_memory());
    let config = configuration(
        &store,
        "Main",
        &[EntityKind::Products, EntityKind::Sales, EntityKind::Purchases],
    );
    confirmed_order(&store, "SO001", &["A-1"]);
    let invoice = customer_invoice(&store, "INV/2024/0001", &["A-1"]);
    let mut posted = store.invoice(invoice.id).unwrap();
    posted.posted = true;
    store.update(&posted).unwrap();

    let report = orchestrator(&store, &remote)
        .run_configuration(config.id, ExecutionMode::Scheduled)
        .await
        .unwrap();

    assert!(report.aborted.is_none());
    assert_eq!(report.failed_kinds(), vec![EntityKind::Sales]);
    match report.outcome(EntityKind::Sales) {
        Some(KindOutcome::Failed { scope, error }) => {
            assert_eq!(*scope, FailureScope::EntityKind);
            assert!(error.contains("sale.order"));
        }
        other => panic!("unexpected sales outcome: {:?}", other),
    }
    assert!(matches!(
        report.outcome(EntityKind::Products),
        Some(KindOutcome::Completed { .. })
    ));
    assert!(matches!(
        report.outcome(EntityKind::Purchases),
        Some(KindOutcome::Completed { .. })
    ));
    assert_eq!(remote.records("purchase.order").len(), 1);

    let runs = store.runs(Some(config.id)).unwrap();
    let sales = runs.iter().find(|r| r.subject == RunSubject::Sales).unwrap();
    assert_eq!(sales.status, RunStatus::Failed);
    assert!(runs
        .iter()
        .filter(|r| r.subject != RunSubject::Sales)
        .all(|r| r.status == RunStatus::Completed));
}

#[tokio::test]
async fn test_kinds_run_in_fixed_order() {
    let remote = remote();
    let store = Arc::new(Store::in_memory());
    let config = configuration(
        &store,
        "Everything",
        &[
            EntityKind::Purchases,
            EntityKind::Sales,
            EntityKind::PriceLists,
            EntityKind::Images,
            EntityKind::Products,
        ],
    );

    let report = orchestrator(&store, &remote)
        .run_configuration(config.id, ExecutionMode::Manual)
        .await
        .unwrap();
    let kinds: Vec<_> = report.kinds.iter().map(|k| k.kind).collect();
    assert_eq!(kinds, EntityKind::ORDERED.to_vec());
}

#[tokio::test]
async fn test_rejected_credentials_abort_only_that_configuration() {
    let remote = remote();
    remote_product(&remote, "A-1", "Anchor");
    let store = Arc::new(Store::in_memory());

    let mut broken = SyncConfiguration::new("Broken", endpoint());
    broken.endpoint.credential = Secret::new("wrong");
    broken.flags = flags(&[EntityKind::Products]);
    let broken = store.add_configuration(broken).unwrap();
    let healthy = configuration(&store, "Healthy", &[EntityKind::Products]);

    let reports = orchestrator(&store, &remote)
        .run_all(ExecutionMode::Scheduled)
        .await
        .unwrap();
    assert_eq!(reports.len(), 2);

    let failed = reports.iter().find(|r| r.config_id == broken.id).unwrap();
    assert!(failed.kinds.is_empty());
    assert!(failed.aborted.as_deref().unwrap().contains("Authentication"));
    let connection = &store.runs(Some(broken.id)).unwrap()[0];
    assert_eq!(connection.subject, RunSubject::Connection);
    assert_eq!(connection.status, RunStatus::Failed);

    let ok = reports.iter().find(|r| r.config_id == healthy.id).unwrap();
    assert!(ok.is_success());
    assert_eq!(store.products().unwrap().len(), 1);
    assert!(!store.is_locked(broken.id).unwrap());
}

#[tokio::test]
async fn test_inactive_configurations_are_not_run() {
    let remote = remote();
    let store = Arc::new(Store::in_memory());
    let mut config = configuration(&store, "Dormant", &[EntityKind::Products]);
    config.active = false;
    store.save_configuration(&config).unwrap();

    let reports = orchestrator(&store, &remote)
        .run_all(ExecutionMode::Scheduled)
        .await
        .unwrap();
    assert!(reports.is_empty());
    assert!(remote.calls().is_empty());
}

#[tokio::test]
async fn test_run_lock_rejects_concurrent_run() {
    let remote = remote();
    let store = Arc::new(Store::in_memory());
    let config = configuration(&store, "Main", &[EntityKind::Products]);
    let orchestrator = orchestrator(&store, &remote);

    let token = store.acquire_run_lock(config.id).unwrap();
    let blocked = orchestrator
        .run_configuration(config.id, ExecutionMode::Scheduled)
        .await;
    assert!(matches!(blocked, Err(Error::AlreadyRunning(_))));
    let confirm = orchestrator
        .confirm_pending_purchase_orders(config.id)
        .await;
    assert!(matches!(confirm, Err(Error::AlreadyRunning(_))));
    assert!(remote.calls().is_empty());

    assert!(store.release_run_lock(token).unwrap());
    orchestrator
        .run_configuration(config.id, ExecutionMode::Manual)
        .await
        .unwrap();
    assert!(!store.is_locked(config.id).unwrap());
}

#[tokio::test]
async fn test_stale_lock_can_be_force_released() {
    let remote = remote();
    let store = Arc::new(Store::in_memory());
    let config = configuration(&store, "Main", &[EntityKind::Products]);

    let stale = store.acquire_run_lock(config.id).unwrap();
    assert!(store.force_release_run_lock(config.id).unwrap());
    orchestrator(&store, &remote)
        .run_configuration(config.id, ExecutionMode::Manual)
        .await
        .unwrap();
    // The previous holder no longer owns the lock.
    assert!(!store.release_run_lock(stale).unwrap());
}

#[tokio::test]
async fn test_statistics_are_computed_locally() {
    let remote = remote();
    remote_product(&remote, "A-1", "Anchor");
    remote_product(&remote, "B-1", "Bolt");
    let store = Arc::new(Store::in_memory());
    let config = configuration(
        &store,
        "Main",
        &[EntityKind::Products, EntityKind::PriceLists, EntityKind::Sales],
    );
    let mut list = PriceList::new("Retail", "USD");
    list.sync_to_remote = true;
    list.items = vec![PriceListItem::global_fixed(5.0)];
    store.insert(list).unwrap();
    confirmed_order(&store, "SO001", &["A-1"]);
    confirmed_order(&store, "SO002", &["B-1"]);

    let started = chrono::Utc::now();
    let orchestrator = orchestrator(&store, &remote);
    orchestrator
        .run_configuration(config.id, ExecutionMode::Manual)
        .await
        .unwrap();

    let stats = store.configuration(config.id).unwrap().stats;
    assert_eq!(stats.products, 2);
    assert_eq!(stats.price_lists, 1);
    assert_eq!(stats.sales, 2);
    assert_eq!(stats.purchases, 0);
    assert!(stats.last_sync_date.unwrap() >= started);

    remote.clear_calls();
    let refreshed = orchestrator.refresh_statistics(config.id).unwrap();
    assert_eq!(refreshed, stats);
    assert!(remote.calls().is_empty());

    orchestrator
        .run_configuration(config.id, ExecutionMode::Scheduled)
        .await
        .unwrap();
    let again = store.configuration(config.id).unwrap().stats;
    assert_eq!(again.products, 2);
    assert_eq!(again.price_lists, 1);
    assert_eq!(again.sales, 2);

    let sales = orchestrator.sales_stats().unwrap();
    assert_eq!(sales.total_count, 2);
    assert_eq!(sales.avg_value, 100.0);
}

#[tokio::test]
async fn test_confirmation_pushes_order() {
    let remote = remote();
    remote_product(&remote, "A-1", "Anchor");
    let store = Arc::new(Store::in_memory());
    configuration(&store, "Sales", &[EntityKind::Sales]);
    let mut order = confirmed_order(&store, "SO001", &["A-1"]);
    order.state = OrderState::Draft;
    store.update(&order).unwrap();

    let notification = orchestrator(&store, &remote)
        .handle_order_confirmed(order.id)
        .await
        .unwrap()
        .unwrap();
    assert!(notification.is_success());

    let order = store.sale_order(order.id).unwrap();
    assert!(order.is_confirmed());
    assert!(order.markers.is_synced);
}

#[tokio::test]
async fn test_confirmation_survives_push_failure() {
    let remote = remote();
    remote_product(&remote, "A-1", "Anchor");
    remote.drop_connection_on("sale.order", "create");
    let store = Arc::new(Store::in_memory());
    configuration(&store, "Sales", &[EntityKind::Sales]);
    let mut order = confirmed_order(&store, "SO001", &["A-1"]);
    order.state = OrderState::Draft;
    store.update(&order).unwrap();

    let notification = orchestrator(&store, &remote)
        .handle_order_confirmed(order.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(notification.severity, Severity::Danger);
    assert!(notification.sticky);

    let order = store.sale_order(order.id).unwrap();
    assert_eq!(order.state, OrderState::Sale);
    assert!(!order.markers.is_synced);
    assert_eq!(
        order.sync_summary.unwrap().status,
        omnisync_store::SummaryStatus::Failed
    );
}

#[tokio::test]
async fn test_confirmation_without_sales_configuration() {
    let remote = remote();
    let store = Arc::new(Store::in_memory());
    let mut order = confirmed_order(&store, "SO001", &["A-1"]);
    order.state = OrderState::Draft;
    store.update(&order).unwrap();

    let notification = orchestrator(&store, &remote)
        .handle_order_confirmed(order.id)
        .await
        .unwrap();
    assert!(notification.is_none());
    assert!(store.sale_order(order.id).unwrap().is_confirmed());
}

#[tokio::test]
async fn test_connection_test() {
    let remote = remote();
    let store = Arc::new(Store::in_memory());
    let config = configuration(&store, "Main", &[]);
    let orchestrator = orchestrator(&store, &remote);

    let ok = orchestrator.test_connection(config.id).await.unwrap();
    assert!(ok.is_success());
    assert!(ok.message.contains(DB));

    let mut wrong = store.configuration(config.id).unwrap();
    wrong.endpoint.username = "intruder".to_string();
    store.save_configuration(&wrong).unwrap();
    let failed = orchestrator.test_connection(config.id).await.unwrap();
    assert_eq!(failed.severity, Severity::Danger);
}

#[tokio::test]
async fn test_sqlite_store_keeps_records_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("omnisync.db");
    let remote = remote();
    remote_product(&remote, "A-1", "Anchor");

    let config_id = {
        let store = Arc::new(Store::open_sqlite(&path).unwrap());
        let config = configuration(&store, "Main", &[EntityKind::Products]);
        orchestrator(&store, &remote)
            .run_configuration(config.id, ExecutionMode::Manual)
            .await
            .unwrap();
        config.id
    };

    let store = Store::open_sqlite(&path).unwrap();
    assert_eq!(store.backend_name(), "sqlite");
    assert!(store.product_by_code("A-1").unwrap().is_some());
    let runs = store.runs(Some(config_id)).unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].counts.synced, 1);
    assert_eq!(store.configuration(config_id).unwrap().stats.products, 1);
    assert!(!store.is_locked(config_id).unwrap());
}

#[tokio::test]
async fn test_scheduler_dispatches_to_orchestrator() {
    let remote = remote();
    remote_product(&remote, "A-1", "Anchor");
    let store = Arc::new(Store::in_memory());
    let config = configuration(&store, "Main", &[EntityKind::Products]);
    let orchestrator = Arc::new(orchestrator(&store, &remote));

    let (scheduler, handle) = Scheduler::new(ScheduleMode::Manual);
    let worker = orchestrator.clone();
    let task = tokio::spawn(handle.run(move |request, mode| {
        let orchestrator = worker.clone();
        async move {
            let started = Instant::now();
            let reports = match request {
                RunRequest::Configuration(id) => {
                    vec![orchestrator.run_configuration(id, mode).await?]
                }
                _ => orchestrator.run_all(mode).await?,
            };
            Ok::<_, Error>(RunSummary::from_reports(&reports, started.elapsed()))
        }
    }));

    let summary = scheduler.request_configuration(config.id).await.unwrap();
    assert_eq!(summary.configurations, 1);
    assert_eq!(summary.failed_configurations, 0);
    let summary = scheduler.request_all().await.unwrap();
    assert_eq!(summary.configurations, 1);

    scheduler.shutdown().await;
    task.await.unwrap();
    assert_eq!(store.runs(Some(config.id)).unwrap().len(), 2);
}
