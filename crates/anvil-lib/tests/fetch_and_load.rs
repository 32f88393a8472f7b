use anvil_lib::instance::{resolve_constraints, PackComponent, PackProfile};
use anvil_lib::meta::{Index, LoadStatus, MetaEntity, MetaLoader, META_BASE};
use anvil_lib::modplatform::ModloaderType;
use anvil_lib::net::fetch::{CachedFetcher, FetchRequest, NetMode};
use anvil_lib::net::meta_cache::HttpMetaCache;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use url::Url;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn loader(dir: &Path, server: &MockServer) -> MetaLoader {
    let mut cache = HttpMetaCache::new(Some(dir.join("metacache")));
    cache.add_base(META_BASE, dir.join("meta"));
    cache.load();
    let fetcher = Arc::new(CachedFetcher::new(reqwest::Client::new(), cache));
    MetaLoader::new(fetcher, &server.uri()).unwrap()
}

fn list_body() -> String {
    json!({
        "formatVersion": 1,
        "uid": "net.minecraft",
        "name": "Minecraft",
        "versions": [
            {"version": "1.20.1", "releaseTime": "2023-06-12T13:25:51+00:00", "type": "release"},
            {"version": "1.20", "releaseTime": "2023-06-02T08:36:17+00:00", "type": "release"}
        ]
    })
    .to_string()
}

fn index_body(list_sha256: &str) -> String {
    json!({
        "formatVersion": 1,
        "packages": [{"uid": "net.minecraft", "name": "Minecraft", "sha256": list_sha256}]
    })
    .to_string()
}

fn sha256_hex(body: &str) -> String {
    format!("{:x}", Sha256::digest(body.as_bytes()))
}

#[tokio::test]
async fn online_load_then_offline_reads_cache() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let list = list_body();

    Mock::given(method("GET"))
        .and(path("/index.json"))
        .respond_with(ResponseTemplate::new(200).set_body_string(index_body(&sha256_hex(&list))))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/net.minecraft/index.json"))
        .respond_with(ResponseTemplate::new(200).set_body_string(list.clone()))
        .mount(&server)
        .await;

    let meta = loader(dir.path(), &server);
    let index = Index::new();
    let loaded = meta
        .load_list(&index, "net.minecraft", NetMode::Online)
        .await
        .unwrap();
    assert_eq!(loaded.count(), 2);
    assert_eq!(loaded.entity().load_status(), LoadStatus::Remote);
    assert_eq!(loaded.recommended().unwrap().version(), "1.20.1");
    assert!(dir.path().join("meta/net.minecraft/index.json").is_file());
    meta.fetcher().cache().save_now().unwrap();

    let offline = loader(dir.path(), &server);
    let fresh = Index::new();
    let cached = offline
        .load_list(&fresh, "net.minecraft", NetMode::Offline)
        .await
        .unwrap();
    assert_eq!(cached.count(), 2);
    assert_eq!(cached.entity().load_status(), LoadStatus::Local);
}

#[tokio::test]
async fn checksum_mismatch_is_not_cached() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/index.json"))
        .respond_with(ResponseTemplate::new(200).set_body_string(index_body(&"0".repeat(64))))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/net.minecraft/index.json"))
        .respond_with(ResponseTemplate::new(200).set_body_string(list_body()))
        .mount(&server)
        .await;

    let meta = loader(dir.path(), &server);
    let index = Index::new();
    let result = meta.load_list(&index, "net.minecraft", NetMode::Online).await;
    assert!(result.is_err());
    assert!(!dir.path().join("meta/net.minecraft/index.json").exists());
    assert_eq!(index.get("net.minecraft").count(), 0);
}

#[tokio::test]
async fn corrupt_local_file_is_replaced() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let local = dir.path().join("meta/index.json");
    std::fs::create_dir_all(local.parent().unwrap()).unwrap();
    std::fs::write(&local, b"{not json").unwrap();

    let body = index_body("");
    Mock::given(method("GET"))
        .and(path("/index.json"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body.clone()))
        .expect(1)
        .mount(&server)
        .await;

    let meta = loader(dir.path(), &server);
    let index = Index::new();
    meta.load_index(&index, NetMode::Online).await.unwrap();
    assert!(index.has_uid("net.minecraft"));
    assert_eq!(std::fs::read_to_string(&local).unwrap(), body);
}

#[tokio::test]
async fn offline_without_cache_loads_nothing() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let meta = loader(dir.path(), &server);
    let index = Index::new();
    meta.load_index(&index, NetMode::Offline).await.unwrap();
    assert_eq!(index.entity().load_status(), LoadStatus::NotLoaded);
    assert!(index.is_empty());
}

#[tokio::test]
async fn concurrent_loads_share_one_request() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    Mock::given(method("GET"))
        .and(path("/index.json"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(index_body(""))
                .set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let meta = loader(dir.path(), &server);
    let index = Index::new();
    let (a, b) = tokio::join!(
        meta.load_index(&index, NetMode::Online),
        meta.load_index(&index, NetMode::Online)
    );
    assert!(a.is_ok());
    assert!(b.is_ok());
    assert_eq!(index.len(), 1);
}

#[tokio::test]
async fn server_error_marks_update_failed() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    Mock::given(method("GET"))
        .and(path("/index.json"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let meta = loader(dir.path(), &server);
    let index = Index::new();
    assert!(meta.load_index(&index, NetMode::Online).await.is_err());
    assert!(!meta
        .load_with_timeout(&index, NetMode::Online, Duration::from_secs(5))
        .await);
}

fn forge_profile() -> PackProfile {
    PackProfile {
        format_version: 1,
        components: vec![PackComponent {
            uid: "net.minecraftforge".to_string(),
            version: Some("47.2.0".to_string()),
            cached_version: None,
        }],
    }
}

#[tokio::test]
async fn slow_loader_list_does_not_hold_up_constraints() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    Mock::given(method("GET"))
        .and(path("/net.minecraftforge/index.json"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(json!({"formatVersion": 1, "uid": "net.minecraftforge", "versions": []}).to_string())
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let meta = loader(dir.path(), &server);
    let index = Index::new();
    let started = Instant::now();
    let constraints = resolve_constraints(
        &forge_profile(),
        &index,
        &meta,
        NetMode::Online,
        Duration::from_millis(200),
    )
    .await;

    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(constraints.loaders, vec![ModloaderType::Forge]);
    assert!(constraints.game_versions.is_empty());
}

#[tokio::test]
async fn game_version_comes_from_the_loader_requires() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let list = json!({
        "formatVersion": 1,
        "uid": "net.minecraftforge",
        "name": "Forge",
        "versions": [
            {
                "version": "47.2.0",
                "releaseTime": "2023-09-20T10:00:00+00:00",
                "type": "release",
                "requires": [{"uid": "net.minecraft", "equals": "1.20.1"}]
            },
            {
                "version": "49.0.3",
                "releaseTime": "2023-12-10T10:00:00+00:00",
                "type": "release",
                "requires": [{"uid": "net.minecraft", "equals": "1.20.4"}]
            }
        ]
    });
    Mock::given(method("GET"))
        .and(path("/net.minecraftforge/index.json"))
        .respond_with(ResponseTemplate::new(200).set_body_string(list.to_string()))
        .expect(1)
        .mount(&server)
        .await;

    let meta = loader(dir.path(), &server);
    let index = Index::new();
    let constraints = resolve_constraints(
        &forge_profile(),
        &index,
        &meta,
        NetMode::Online,
        Duration::from_secs(5),
    )
    .await;

    assert_eq!(constraints.game_versions, vec!["1.20.1".to_string()]);
    assert_eq!(constraints.loaders, vec![ModloaderType::Forge]);
}

fn fetcher(dir: &Path) -> CachedFetcher {
    let mut cache = HttpMetaCache::new(Some(dir.join("metacache")));
    cache.add_base("assets", dir.join("assets"));
    CachedFetcher::new(reqwest::Client::new(), cache)
}

fn request<'a>(server: &MockServer) -> FetchRequest<'a> {
    FetchRequest {
        base: "assets",
        path: "objects.json",
        url: Url::parse(&format!("{}/objects.json", server.uri())).unwrap(),
        force_stale: false,
        expected_sha256: None,
    }
}

#[tokio::test]
async fn fresh_entry_is_served_from_disk() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    Mock::given(method("GET"))
        .and(path("/objects.json"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Cache-Control", "public, max-age=300")
                .set_body_string("{\"objects\":{}}"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let fetcher = fetcher(dir.path());
    let validations = AtomicUsize::new(0);
    let validate = |_: &[u8]| -> Result<(), String> {
        validations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    };

    let first = fetcher.fetch(request(&server), &validate).await.unwrap();
    let second = fetcher.fetch(request(&server), &validate).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(validations.load(Ordering::SeqCst), 2);
    assert_eq!(fetcher.resolve("assets", "objects.json").max_age, 300);
}

#[tokio::test]
async fn expired_entry_is_revalidated_with_its_etag() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    Mock::given(method("GET"))
        .and(path("/objects.json"))
        .and(header("If-None-Match", "\"v1\""))
        .respond_with(ResponseTemplate::new(304))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/objects.json"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("ETag", "\"v1\"")
                .insert_header("Cache-Control", "max-age=1")
                .insert_header("Age", "5")
                .set_body_string("first body"),
        )
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;

    let fetcher = fetcher(dir.path());
    let accept = |_: &[u8]| -> Result<(), String> { Ok(()) };
    let first = fetcher.fetch(request(&server), &accept).await.unwrap();
    assert_eq!(first, b"first body");

    let again = fetcher.fetch(request(&server), &accept).await.unwrap();
    assert_eq!(again, b"first body");
    assert_eq!(fetcher.cache().get_entry("assets", "objects.json").unwrap().etag, "\"v1\"");
}

#[tokio::test]
async fn unwritable_cache_still_returns_accepted_body() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    // The base directory is a plain file, so nothing can be written below it.
    std::fs::write(dir.path().join("assets"), b"not a directory").unwrap();
    Mock::given(method("GET"))
        .and(path("/objects.json"))
        .respond_with(ResponseTemplate::new(200).set_body_string("payload"))
        .mount(&server)
        .await;

    let fetcher = fetcher(dir.path());
    let accept = |_: &[u8]| -> Result<(), String> { Ok(()) };
    let body = fetcher.fetch(request(&server), &accept).await.unwrap();
    assert_eq!(body, b"payload");
    assert!(fetcher.cache().get_entry("assets", "objects.json").is_none());
}
