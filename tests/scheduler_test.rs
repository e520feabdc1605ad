mod common;

use common::harness;
use pricecast::application::scheduler::{
    refresh_job_body, retrain_job_body, RefreshScheduler, REFRESH_JOB_ID, RETRAIN_JOB_ID,
};
use pricecast::domain::ports::MarketDataSource;
use pricecast::domain::repositories::PriceRepository;
use pricecast::domain::types::{AssetClass, SymbolOutcome, TrainConfig, TriggerSpec};
use pricecast::infrastructure::mock::{synthetic_series, MockForecasterFactory};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const LOOKBACK: usize = 10;

fn tracked() -> Vec<(String, AssetClass)> {
    vec![
        ("AAA".to_string(), AssetClass::Stock),
        ("BBB".to_string(), AssetClass::Stock),
        ("CCC".to_string(), AssetClass::Crypto),
    ]
}

#[tokio::test]
async fn test_refresh_job_isolates_per_symbol_failures() {
    let h = harness("refresh-isolation", MockForecasterFactory::new()).await;
    h.source.fail_symbol("AAA").await;
    h.source
        .set_series("BBB", synthetic_series("BBB", AssetClass::Stock, 20, 40.0))
        .await;
    h.source
        .set_series("CCC", synthetic_series("CCC", AssetClass::Crypto, 20, 900.0))
        .await;

    let scheduler = RefreshScheduler::new();
    scheduler
        .register(
            REFRESH_JOB_ID,
            TriggerSpec::Interval {
                every: Duration::from_secs(3600),
            },
            refresh_job_body(
                h.source.clone() as Arc<dyn MarketDataSource>,
                h.prices.clone() as Arc<dyn PriceRepository>,
                tracked(),
                "1mo".to_string(),
            ),
        )
        .await;

    let report = scheduler.run_job_once(REFRESH_JOB_ID).await.unwrap();

    assert_eq!(report.outcomes.len(), 3);
    assert_eq!(report.failed_symbols(), vec!["AAA"]);
    assert_eq!(report.succeeded_symbols(), vec!["BBB", "CCC"]);
    let failed = report.outcomes.iter().find(|o| o.symbol == "AAA").unwrap();
    assert_eq!(failed.error_kind, Some("data_fetch"));

    // The failing symbol never blocked the others from being stored.
    let bbb = h.prices.query("BBB", AssetClass::Stock, None, None).await.unwrap();
    let ccc = h.prices.query("CCC", AssetClass::Crypto, None, None).await.unwrap();
    assert_eq!(bbb.len(), 20);
    assert_eq!(ccc.len(), 20);
}

#[tokio::test]
async fn test_retrain_job_records_training_failures_and_continues() {
    let h = harness("retrain-isolation", MockForecasterFactory::new()).await;
    // AAA has too little history to window; the others are fine.
    h.source
        .set_series("AAA", synthetic_series("AAA", AssetClass::Stock, 4, 10.0))
        .await;
    h.source
        .set_series("BBB", synthetic_series("BBB", AssetClass::Stock, 30, 40.0))
        .await;
    h.source
        .set_series("CCC", synthetic_series("CCC", AssetClass::Crypto, 30, 900.0))
        .await;

    let scheduler = RefreshScheduler::new();
    scheduler
        .register(
            RETRAIN_JOB_ID,
            TriggerSpec::Daily { hour: 2, minute: 0 },
            retrain_job_body(
                h.cache.clone(),
                tracked(),
                "6mo".to_string(),
                LOOKBACK,
                TrainConfig {
                    epochs: 5,
                    batch_size: 8,
                },
            ),
        )
        .await;

    let report = scheduler.run_job_once(RETRAIN_JOB_ID).await.unwrap();

    assert_eq!(report.failed_symbols(), vec!["AAA"]);
    assert_eq!(report.succeeded_symbols(), vec!["BBB", "CCC"]);
    let failed = report.outcomes.iter().find(|o| o.symbol == "AAA").unwrap();
    assert_eq!(failed.error_kind, Some("insufficient_data"));
    assert_eq!(h.cache.ready_count().await, 2);
}

#[tokio::test]
async fn test_refresh_fetches_short_window_when_store_is_current() {
    let h = harness("refresh-catchup", MockForecasterFactory::new()).await;
    // BBB is already stored through today; CCC has never been stored.
    h.prices
        .upsert(&synthetic_series("BBB", AssetClass::Stock, 20, 40.0))
        .await
        .unwrap();
    h.source
        .set_series("BBB", synthetic_series("BBB", AssetClass::Stock, 20, 40.0))
        .await;
    h.source
        .set_series("CCC", synthetic_series("CCC", AssetClass::Crypto, 20, 900.0))
        .await;

    let scheduler = RefreshScheduler::new();
    scheduler
        .register(
            REFRESH_JOB_ID,
            TriggerSpec::Interval {
                every: Duration::from_secs(3600),
            },
            refresh_job_body(
                h.source.clone() as Arc<dyn MarketDataSource>,
                h.prices.clone() as Arc<dyn PriceRepository>,
                vec![
                    ("BBB".to_string(), AssetClass::Stock),
                    ("CCC".to_string(), AssetClass::Crypto),
                ],
                "1mo".to_string(),
            ),
        )
        .await;
    scheduler.run_job_once(REFRESH_JOB_ID).await.unwrap();

    let requests = h.source.requests().await;
    assert!(requests.contains(&("BBB".to_string(), "5d".to_string())));
    assert!(requests.contains(&("CCC".to_string(), "1mo".to_string())));
}

fn counting_body(counter: Arc<AtomicUsize>, delay: Duration) -> pricecast::application::scheduler::JobBody {
    Arc::new(move || {
        let counter = counter.clone();
        Box::pin(async move {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(delay).await;
            vec![SymbolOutcome::ok("X")]
        })
    })
}

#[tokio::test]
async fn test_no_overlapping_runs_for_one_job_id() {
    let scheduler = Arc::new(RefreshScheduler::new());
    let runs = Arc::new(AtomicUsize::new(0));
    scheduler
        .register(
            "slow_job",
            TriggerSpec::Interval {
                every: Duration::from_secs(3600),
            },
            counting_body(runs.clone(), Duration::from_millis(300)),
        )
        .await;

    scheduler.trigger("slow_job").await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    // Second firing lands while the first run is still sleeping.
    scheduler.trigger("slow_job").await;
    tokio::time::sleep(Duration::from_millis(400)).await;

    assert_eq!(runs.load(Ordering::SeqCst), 1, "second firing must be skipped");
    assert!(scheduler.last_report("slow_job").await.is_some());

    // Once the first run finished, the next firing executes again.
    scheduler.trigger("slow_job").await;
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_reregistration_replaces_definition_only() {
    let scheduler = Arc::new(RefreshScheduler::new());
    let first_runs = Arc::new(AtomicUsize::new(0));
    let second_runs = Arc::new(AtomicUsize::new(0));

    scheduler
        .register(
            "job",
            TriggerSpec::Interval {
                every: Duration::from_secs(3600),
            },
            counting_body(first_runs.clone(), Duration::from_millis(0)),
        )
        .await;
    scheduler.run_job_once("job").await.unwrap();

    // Same id, new body: a singleton definition, not a second job.
    scheduler
        .register(
            "job",
            TriggerSpec::Interval {
                every: Duration::from_secs(60),
            },
            counting_body(second_runs.clone(), Duration::from_millis(0)),
        )
        .await;
    assert_eq!(scheduler.job_count().await, 1);

    scheduler.run_job_once("job").await.unwrap();
    assert_eq!(first_runs.load(Ordering::SeqCst), 1);
    assert_eq!(second_runs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_reregistration_does_not_touch_running_execution() {
    let scheduler = Arc::new(RefreshScheduler::new());
    let old_runs = Arc::new(AtomicUsize::new(0));
    let new_runs = Arc::new(AtomicUsize::new(0));

    scheduler
        .register(
            "job",
            TriggerSpec::Interval {
                every: Duration::from_secs(3600),
            },
            counting_body(old_runs.clone(), Duration::from_millis(300)),
        )
        .await;

    scheduler.trigger("job").await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Replace the definition mid-run; the in-flight run keeps going and
    // the overlap guard still covers it.
    scheduler
        .register(
            "job",
            TriggerSpec::Interval {
                every: Duration::from_secs(3600),
            },
            counting_body(new_runs.clone(), Duration::from_millis(0)),
        )
        .await;
    scheduler.trigger("job").await;
    tokio::time::sleep(Duration::from_millis(400)).await;

    assert_eq!(old_runs.load(Ordering::SeqCst), 1);
    assert_eq!(new_runs.load(Ordering::SeqCst), 0, "firing during the old run is skipped");

    scheduler.trigger("job").await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(new_runs.load(Ordering::SeqCst), 1);
}
