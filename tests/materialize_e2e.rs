use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};
use bazaar_lib::client::BazaarClient;
use bazaar_lib::enrichment::{ImageGenerator, OpenAiImageClient, ScriptedImageGenerator};
use bazaar_lib::entities::{Item, User};
use bazaar_lib::error::EnrichmentError;
use bazaar_lib::materializer::{EnrichmentOutcome, Materializer, Stage};
use bazaar_lib::storage::{FileStorage, InMemoryStorage, Storage};

async fn file_client(dir: &tempfile::TempDir, images: Arc<dyn ImageGenerator>) -> BazaarClient {
    let storage = FileStorage::open(dir.path().join("bazaar.db.json")).await.unwrap();
    let storage: Arc<dyn Storage> = Arc::new(storage);
    let materializer = Materializer::new(storage.clone(), images)
        .with_enrichment_timeout(Duration::from_secs(2));
    BazaarClient::new(storage, materializer)
}

#[tokio::test]
async fn vintage_lamp_is_materialized_with_generated_image() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/images/generations"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "created": 1589478378,
            "data": [{ "url": "img://abc" }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let base_url = format!("{}/v1", server.uri());
    let images = OpenAiImageClient::new(&base_url, "sk-test", Duration::from_secs(2)).unwrap();
    let client = file_client(&dir, Arc::new(images)).await;
    client.create_user(User::new("u1")).await.unwrap();

    let item = Item::new("Vintage Lamp", "Brass base", "u1");
    let created = client.create_item(item, &CancellationToken::new()).await.unwrap();
    assert_eq!(created.stage, Stage::Ready);

    let response = client.render_item(&created.item, None).await.unwrap();
    assert!(response.slug.starts_with("vintage-lamp-"));
    assert_eq!(response.image.as_deref(), Some("img://abc"));
    assert_eq!(response.favorites_count, 0);
    assert_eq!(response.seller.username, "u1");

    // the committed item survives a reopen
    drop(client);
    let reopened = file_client(&dir, Arc::new(ScriptedImageGenerator::default())).await;
    let item = reopened.get_item(&response.slug).await.unwrap();
    assert_eq!(item.image.as_deref(), Some("img://abc"));
}

#[tokio::test]
async fn failing_image_service_does_not_block_commit() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/images/generations"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "error": "unexpected" })))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let images = OpenAiImageClient::new(&server.uri(), "sk-test", Duration::from_secs(2)).unwrap();
    let client = file_client(&dir, Arc::new(images)).await;
    client.create_user(User::new("u1")).await.unwrap();

    let item = Item::new("Vintage Lamp", "Brass base", "u1");
    let created = client.create_item(item, &CancellationToken::new()).await.unwrap();
    assert_eq!(created.stage, Stage::Ready);
    assert!(matches!(
        created.enrichment,
        EnrichmentOutcome::Failed(EnrichmentError::Malformed(_))
    ));
    let slug = created.item.slug.unwrap();
    assert!(client.get_item(&slug).await.unwrap().image.is_none());
}

#[tokio::test]
async fn favorites_follow_the_relation_across_refreshes() {
    let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());
    let images = Arc::new(ScriptedImageGenerator::returning("img://x"));
    let materializer = Materializer::new(storage.clone(), images);
    let client = BazaarClient::new(storage, materializer);
    for name in ["seller", "a", "b", "c"] {
        client.create_user(User::new(name)).await.unwrap();
    }
    let slug = client.create_item(Item::new("Record X", "Vinyl", "seller"), &CancellationToken::new())
        .await.unwrap().item.slug.unwrap();

    for name in ["a", "b", "c"] {
        client.favorite(name, &slug).await.unwrap();
    }
    assert_eq!(client.get_item(&slug).await.unwrap().favorites_count, 3);

    client.unfavorite("a", &slug).await.unwrap();
    assert_eq!(client.get_item(&slug).await.unwrap().favorites_count, 2);
}

#[tokio::test]
async fn concurrent_commits_of_one_title_get_distinct_slugs() {
    let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());
    let images: Arc<dyn ImageGenerator> = Arc::new(ScriptedImageGenerator::default());
    let materializer = Arc::new(Materializer::new(storage.clone(), images));

    let mut handles = Vec::new();
    for _ in 0..32 {
        let materializer = materializer.clone();
        handles.push(tokio::spawn(async move {
            let item = Item::new("Vintage Lamp", "Brass base", "u1");
            materializer.commit(item, &CancellationToken::new()).await
        }));
    }

    let mut slugs = HashSet::new();
    for handle in handles {
        let materialized = handle.await.unwrap().unwrap();
        assert!(materialized.enrichment.is_failed());
        slugs.insert(materialized.item.slug.unwrap());
    }
    assert_eq!(slugs.len(), 32);
    assert_eq!(storage.all_items().await.unwrap().len(), 32);
}
