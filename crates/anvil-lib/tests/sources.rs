use anvil_lib::modplatform::curseforge::CurseForgeSource;
use anvil_lib::modplatform::modrinth::ModrinthSource;
use anvil_lib::modplatform::{
    ModloaderType, ReleaseType, ResourceSource, SourcePlatform, VersionSearchArgs,
};
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn modrinth_version(id: &str, number: &str, date: &str, files: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "project_id": "AANobbMI",
        "version_number": number,
        "game_versions": ["1.20.1"],
        "loaders": ["fabric"],
        "files": files,
        "version_type": "release",
        "date_published": date,
        "changelog": "Fixed things"
    })
}

#[tokio::test]
async fn modrinth_hash_lookup_picks_primary_file() {
    let server = MockServer::start().await;
    let files = json!([
        {"url": "https://cdn/sodium-sources.jar", "filename": "sodium-sources.jar", "hashes": {"sha1": "bbb"}, "primary": false},
        {"url": "https://cdn/sodium.jar", "filename": "sodium.jar", "hashes": {"sha1": "aaa"}, "primary": true}
    ]);
    Mock::given(method("POST"))
        .and(path("/version_files"))
        .and(body_json(json!({"hashes": ["aaa", "zzz"], "algorithm": "sha1"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "aaa": modrinth_version("v1", "0.5.0", "2023-07-01T00:00:00Z", files)
        })))
        .mount(&server)
        .await;

    let source = ModrinthSource::new(reqwest::Client::new(), &server.uri());
    let found = source
        .get_versions_by_hashes(&["aaa".to_string(), "zzz".to_string()])
        .await
        .unwrap();

    assert_eq!(found.len(), 1);
    let version = &found["aaa"];
    assert_eq!(version.file_name, "sodium.jar");
    assert_eq!(version.hash, "aaa");
    assert_eq!(version.project_id, "AANobbMI");
    assert!(version.is_downloadable());
}

#[tokio::test]
async fn modrinth_versions_send_constraints() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/project/AANobbMI/version"))
        .and(query_param("game_versions", "[\"1.20.1\"]"))
        .and(query_param("loaders", "[\"fabric\"]"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            modrinth_version("v2", "0.5.1", "2023-08-01T00:00:00Z", json!([
                {"url": "https://cdn/sodium-0.5.1.jar", "filename": "sodium-0.5.1.jar", "hashes": {"sha1": "ccc"}, "primary": true}
            ])),
            modrinth_version("v0", "0.4.0", "2023-01-01T00:00:00Z", json!([]))
        ])))
        .mount(&server)
        .await;

    let source = ModrinthSource::new(reqwest::Client::new(), &server.uri());
    let versions = source
        .get_project_versions(&VersionSearchArgs {
            project_id: "AANobbMI".into(),
            game_versions: vec!["1.20.1".into()],
            loaders: vec![ModloaderType::Fabric],
        })
        .await
        .unwrap();

    // The version without files is dropped.
    assert_eq!(versions.len(), 1);
    assert_eq!(versions[0].id, "v2");
    assert_eq!(versions[0].changelog.as_deref(), Some("Fixed things"));
}

#[tokio::test]
async fn modrinth_error_status_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/version/v9"))
        .respond_with(ResponseTemplate::new(404).set_body_string("not found"))
        .mount(&server)
        .await;

    let source = ModrinthSource::new(reqwest::Client::new(), &server.uri());
    let err = source.get_changelog("AANobbMI", "v9").await.unwrap_err();
    assert!(err.to_string().contains("404"));
}

fn cf_file(id: u32, fingerprint: u64, download_url: Option<&str>) -> serde_json::Value {
    json!({
        "id": id,
        "modId": 238222,
        "displayName": format!("jei-{}", id),
        "fileName": format!("jei-{}.jar", id),
        "releaseType": 2,
        "gameVersions": ["1.20.1", "Forge", "NeoForge"],
        "hashes": [{"value": "md5md5", "algo": 2}, {"value": "sha1sha1", "algo": 1}],
        "fileDate": "2023-09-01T10:00:00Z",
        "downloadUrl": download_url,
        "fileFingerprint": fingerprint
    })
}

#[tokio::test]
async fn curseforge_fingerprints_are_keyed_by_fingerprint() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/fingerprints"))
        .and(header("x-api-key", "secret"))
        .and(body_json(json!({"fingerprints": [3608507876u32, 42]})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"exactMatches": [{"file": cf_file(4712, 3608507876, Some("https://edge/jei.jar"))}]}
        })))
        .mount(&server)
        .await;

    let source = CurseForgeSource::new(
        reqwest::Client::new(),
        &server.uri(),
        Some("secret".to_string()),
    );
    let found = source
        .get_versions_by_hashes(&["3608507876".to_string(), "42".to_string()])
        .await
        .unwrap();

    let version = &found["3608507876"];
    assert_eq!(version.id, "4712");
    assert_eq!(version.project_id, "238222");
    assert_eq!(version.hash, "sha1sha1");
    assert_eq!(version.release_type, ReleaseType::Beta);
    assert_eq!(version.game_versions, vec!["1.20.1".to_string()]);
    assert_eq!(version.loaders, vec!["forge".to_string(), "neoforge".to_string()]);
}

#[tokio::test]
async fn curseforge_rejects_bad_fingerprints() {
    let source = CurseForgeSource::new(reqwest::Client::new(), "http://127.0.0.1:9", None);
    assert!(source
        .get_versions_by_hashes(&["not-a-number".to_string()])
        .await
        .is_err());
}

#[tokio::test]
async fn curseforge_files_without_download_url_are_not_downloadable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/mods/238222/files"))
        .and(query_param("gameVersion", "1.20.1"))
        .and(query_param("modLoaderType", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [cf_file(5000, 1, None), cf_file(4999, 2, Some("https://edge/jei-4999.jar"))],
            "pagination": {"totalCount": 2}
        })))
        .mount(&server)
        .await;

    let source = CurseForgeSource::new(reqwest::Client::new(), &server.uri(), None);
    let versions = source
        .get_project_versions(&VersionSearchArgs {
            project_id: "238222".into(),
            game_versions: vec!["1.20.1".into()],
            loaders: vec![ModloaderType::Forge],
        })
        .await
        .unwrap();

    assert_eq!(versions.len(), 2);
    assert!(!versions[0].is_downloadable());
    assert!(versions[1].is_downloadable());
    assert_eq!(SourcePlatform::CurseForge.other(), SourcePlatform::Modrinth);
}

#[tokio::test]
async fn curseforge_changelog_empty_is_none() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/mods/238222/files/4712/changelog"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": ""})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/mods/238222/files/4713/changelog"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": "<p>New</p>"})))
        .mount(&server)
        .await;

    let source = CurseForgeSource::new(reqwest::Client::new(), &server.uri(), None);
    assert_eq!(source.get_changelog("238222", "4712").await.unwrap(), None);
    assert_eq!(
        source.get_changelog("238222", "4713").await.unwrap().as_deref(),
        Some("<p>New</p>")
    );
}
