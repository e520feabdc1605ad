#![allow(dead_code)]

use pricecast::application::model_cache::ModelCache;
use pricecast::domain::ports::{ForecasterFactory, MarketDataSource};
use pricecast::domain::repositories::{ModelArtifactRepository, PriceRepository};
use pricecast::infrastructure::mock::{
    InMemoryArtifactRepository, MockForecasterFactory, MockMarketDataSource,
};
use pricecast::infrastructure::persistence::database::Database;
use pricecast::infrastructure::persistence::price_repository::SqlitePriceRepository;
use std::sync::Arc;
use std::time::Duration;

/// Fresh SQLite database in a unique temp file. The pool hands out
/// multiple connections, so `:memory:` would give each its own database.
pub async fn temp_database(tag: &str) -> Database {
    let path = std::env::temp_dir().join(format!(
        "pricecast-test-{}-{}-{}.db",
        tag,
        std::process::id(),
        chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
    ));
    let _ = std::fs::remove_file(&path);
    let url = format!("sqlite://{}", path.display());
    Database::new(&url).await.expect("test database")
}

pub async fn temp_price_repo(tag: &str) -> Arc<SqlitePriceRepository> {
    let db = temp_database(tag).await;
    Arc::new(SqlitePriceRepository::new(db.pool.clone()))
}

/// Mock-wired cache plus handles to the pieces tests assert on.
pub struct Harness {
    pub prices: Arc<SqlitePriceRepository>,
    pub source: Arc<MockMarketDataSource>,
    pub factory: Arc<MockForecasterFactory>,
    pub artifacts: Arc<InMemoryArtifactRepository>,
    pub cache: Arc<ModelCache>,
}

pub async fn harness(tag: &str, factory: MockForecasterFactory) -> Harness {
    harness_with_timeout(tag, factory, None).await
}

pub async fn harness_with_timeout(
    tag: &str,
    factory: MockForecasterFactory,
    timeout: Option<Duration>,
) -> Harness {
    let prices = temp_price_repo(tag).await;
    let source = Arc::new(MockMarketDataSource::new());
    let factory = Arc::new(factory);
    let artifacts = Arc::new(InMemoryArtifactRepository::new());

    let cache = Arc::new(ModelCache::new(
        prices.clone() as Arc<dyn PriceRepository>,
        source.clone() as Arc<dyn MarketDataSource>,
        factory.clone() as Arc<dyn ForecasterFactory>,
        artifacts.clone() as Arc<dyn ModelArtifactRepository>,
        timeout,
    ));

    Harness {
        prices,
        source,
        factory,
        artifacts,
        cache,
    }
}
