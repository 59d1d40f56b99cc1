mod common;

use bytes::Bytes;
use common::{Call, MemoryStore, StaticConfigs, bucket_config, init_tracing, registry_for};
use cos_objects::errors::{ConsistencyError, Error, StoreError};
use cos_objects::models::bucket::BucketConfig;
use cos_objects::services::etag::{self, BLOCK_SIZE};
use cos_objects::services::registry::SharedClientFactory;
use cos_objects::{AppConfig, UploadService};
use std::collections::HashMap;
use std::sync::Arc;

const HELLO_KEY: &str = "Fqr0xh3cxeii2r7eDztILNmuqUNN";
const HELLO_WORLD_KEY: &str = "FiqubDXJT8-0FdvpX0CLnOke6Ebt";

fn cdn_config(id: i64, bucket: &str) -> BucketConfig {
    BucketConfig {
        cdn: "https://cdn.example.com/".into(),
        cdn_secret: "s3cr3t".into(),
        ..bucket_config(id, bucket)
    }
}

fn service() -> (UploadService, Arc<MemoryStore>, Arc<common::StaticConfigs>) {
    init_tracing();
    let store = MemoryStore::new();
    let (registry, source) = registry_for(
        store.clone(),
        vec![cdn_config(1, "media"), bucket_config(2, "archive")],
    );
    (UploadService::new(registry, "media"), store, source)
}

#[tokio::test]
async fn bytes_are_stored_under_their_content_key() {
    let (svc, store, _) = service();

    let key = svc
        .upload_bytes("media", "/img/", "png", &b"hello"[..])
        .await
        .unwrap();

    assert_eq!(key, format!("img/{HELLO_KEY}.png"));
    assert_eq!(
        store.get("media", &key),
        Some(Bytes::from_static(b"hello"))
    );
}

#[tokio::test]
async fn empty_directory_and_extension_are_omitted() {
    let (svc, _, _) = service();

    let key = svc
        .upload_bytes("media", "", "", &b"hello world"[..])
        .await
        .unwrap();

    assert_eq!(key, HELLO_WORLD_KEY);
}

#[tokio::test]
async fn empty_bucket_name_uses_the_default_bucket() {
    let (svc, store, _) = service();

    let key = svc
        .upload_bytes("", "a", "txt", &b"hello"[..])
        .await
        .unwrap();

    assert!(store.get("media", &key).is_some());
}

#[tokio::test]
async fn identical_content_maps_to_one_key() {
    let (svc, store, _) = service();

    let first = svc.upload_bytes("media", "d", "bin", vec![7u8; 64]).await.unwrap();
    let second = svc.upload_bytes("media", "d", "bin", vec![7u8; 64]).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(store.keys("media").len(), 1);
}

#[tokio::test]
async fn empty_payloads_are_refused() {
    let (svc, store, _) = service();

    let result = svc.upload_bytes("media", "d", "txt", Bytes::new()).await;

    assert!(matches!(result, Err(Error::EmptyUpload(_))));
    assert!(store.calls().is_empty());
}

#[tokio::test]
async fn files_are_digested_and_uploaded() {
    let (svc, store, _) = service();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("note.txt");
    std::fs::write(&path, b"hello world").unwrap();

    let key = svc.upload_file("media", "docs", "txt", &path).await.unwrap();

    assert_eq!(key, format!("docs/{HELLO_WORLD_KEY}.txt"));
    assert_eq!(
        store.get("media", &key),
        Some(Bytes::from_static(b"hello world"))
    );

    let empty = dir.path().join("empty.txt");
    std::fs::write(&empty, b"").unwrap();
    assert!(matches!(
        svc.upload_file("media", "docs", "txt", &empty).await,
        Err(Error::EmptyUpload(_))
    ));
    assert!(matches!(
        svc.upload_file("media", "docs", "txt", dir.path().join("missing")).await,
        Err(Error::Io(_))
    ));
}

#[tokio::test]
async fn file_uploads_are_keyed_by_the_bytes_they_store() {
    let (svc, store, _) = service();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("large.bin");
    let data: Vec<u8> = (0..BLOCK_SIZE as usize + 5).map(|i| (i % 253) as u8).collect();
    std::fs::write(&path, &data).unwrap();

    let key = svc.upload_file("media", "", "bin", &path).await.unwrap();

    let stored = store.get("media", &key).unwrap();
    assert_eq!(stored.len(), data.len());
    assert_eq!(key, format!("{}.bin", etag::digest_bytes(&stored)));
    assert!(etag::digest_bytes(&stored).is_multi_block());
    assert!(matches!(
        svc.upload_file("media", "", "bin", dir.path()).await,
        Err(Error::Io(_))
    ));
}

fn lookup_from(vars: &[(&str, &str)]) -> AppConfig {
    let vars: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    AppConfig::from_lookup(|name| vars.get(name).cloned()).unwrap()
}

fn connected(cfg: &AppConfig) -> (UploadService, Arc<MemoryStore>, Arc<StaticConfigs>) {
    let store = MemoryStore::new();
    let source = StaticConfigs::new(vec![cdn_config(1, "media"), bucket_config(2, "archive")]);
    let svc = UploadService::connect(
        source.clone(),
        Arc::new(SharedClientFactory(store.clone())),
        cfg,
    );
    (svc, store, source)
}

#[tokio::test]
async fn connect_applies_the_environment_configuration() {
    init_tracing();
    let cfg = lookup_from(&[
        ("COS_CONFIG_TTL_SECS", "0"),
        ("COS_DEFAULT_BUCKET", "archive"),
        ("COS_DELETE_BATCH_SIZE", "1"),
    ]);
    let (svc, store, source) = connected(&cfg);

    let key = svc.upload_bytes("", "", "txt", &b"hello"[..]).await.unwrap();
    assert_eq!(store.keys("archive"), [key]);
    assert_eq!(source.lookups(), 1);

    // a zero lifetime sends every lookup to the source
    svc.url("media", "a.jpg").await.unwrap();
    svc.url("media", "a.jpg").await.unwrap();
    assert_eq!(source.lookups(), 3);

    store.seed_files("media", &["x/1", "x/2"]);
    let deleted = svc
        .delete_objects("media", &["x/1".to_string(), "x/2".to_string()])
        .await
        .unwrap();
    assert_eq!(deleted, 2);
    assert_eq!(store.delete_batches().len(), 2);
}

#[tokio::test]
async fn connect_memoizes_for_the_configured_lifetime() {
    let (svc, _, source) = connected(&lookup_from(&[]));

    for _ in 0..3 {
        svc.url("media", "a.jpg").await.unwrap();
    }

    assert_eq!(source.lookups(), 1);
}

#[tokio::test]
async fn data_uri_images_take_their_extension_from_the_header() {
    let (svc, store, _) = service();

    let key = svc
        .upload_base64_image(
            "media",
            "avatars",
            "data:image/png;base64,iVBORyBmYWtlIGltYWdlIGJ5dGVz",
        )
        .await
        .unwrap();

    assert_eq!(key, "avatars/FlwndMwMABHbU-Ee76MlRSkVZ0Z3.png");
    assert_eq!(
        store.get("media", &key),
        Some(Bytes::from_static(b"\x89PNG fake image bytes"))
    );
}

#[tokio::test]
async fn raw_base64_images_default_to_jpg() {
    let (svc, _, _) = service();

    let key = svc
        .upload_base64_image("media", "", "aGVsbG8=")
        .await
        .unwrap();

    assert_eq!(key, format!("{HELLO_KEY}.jpg"));
}

#[tokio::test]
async fn malformed_base64_images_are_decode_errors() {
    let (svc, store, _) = service();

    for bad in ["data:image/png;base64,", "data:image/x,AAAA", "not base64!"] {
        assert!(
            matches!(
                svc.upload_base64_image("media", "", bad).await,
                Err(Error::Decode(_))
            ),
            "accepted {bad}"
        );
    }
    assert!(store.calls().is_empty());
}

#[tokio::test]
async fn unknown_buckets_have_no_client() {
    let (svc, store, _) = service();

    let result = svc.upload_bytes("nowhere", "", "", &b"x"[..]).await;

    assert!(matches!(result, Err(Error::ConfigNotFound(_))));
    assert!(store.calls().is_empty());
}

#[tokio::test]
async fn configuration_is_resolved_once_per_bucket() {
    let (svc, _, source) = service();

    for i in 0..5u8 {
        svc.upload_bytes("media", "", "", vec![i + 1]).await.unwrap();
    }
    svc.url("media", "a.jpg").await.unwrap();

    assert_eq!(source.lookups(), 1);
}

#[tokio::test]
async fn registered_clients_bypass_configuration() {
    let (svc, _, _) = service();
    let adhoc = MemoryStore::new();
    svc.registry().register("adhoc", adhoc.clone());

    svc.upload_bytes("adhoc", "", "", &b"hello"[..]).await.unwrap();
    assert_eq!(adhoc.keys("adhoc"), [HELLO_KEY]);

    assert!(svc.registry().evict("adhoc"));
    assert!(!svc.registry().evict("adhoc"));
    assert!(matches!(
        svc.upload_bytes("adhoc", "", "", &b"hello"[..]).await,
        Err(Error::ConfigNotFound(_))
    ));
}

#[tokio::test]
async fn public_urls_prefer_the_cdn() {
    let (svc, _, _) = service();

    assert_eq!(
        svc.url("media", "img/a.jpg").await.unwrap(),
        "https://cdn.example.com/img/a.jpg"
    );
    assert_eq!(
        svc.url("archive", "/img/a.jpg").await.unwrap(),
        "https://archive.cos.ap-guangzhou.example.com/img/a.jpg"
    );
}

#[tokio::test]
async fn temporary_urls_are_signed_with_the_cdn_secret() {
    let (svc, _, _) = service();

    let url = svc
        .temp_url_at("media", "img/a.jpg", 1_700_000_000)
        .await
        .unwrap();

    assert_eq!(
        url,
        "https://cdn.example.com/img/a.jpg?sign=839d5c88326483640d62a3c8aabcfea2&t=1700000000"
    );
    assert!(svc.temp_url("media", "img/a.jpg").await.unwrap().contains("&t="));
    assert!(matches!(
        svc.temp_url_at("archive", "img/a.jpg", 1).await,
        Err(Error::ConfigNotFound(_))
    ));
}

#[tokio::test]
async fn copy_names_the_source_bucket() {
    let (svc, store, _) = service();
    store.seed("media", "src/a.txt", b"payload");

    svc.copy("media", "src/a.txt", "archive", "dst/a.txt")
        .await
        .unwrap();

    assert_eq!(
        store.calls(),
        [Call::Copy {
            to: "archive/dst/a.txt".into(),
            from: "media/src/a.txt".into(),
        }]
    );
    assert_eq!(
        store.get("archive", "dst/a.txt"),
        Some(Bytes::from_static(b"payload"))
    );
}

#[tokio::test]
async fn copied_reports_failure_as_false() {
    let (svc, store, _) = service();
    store.seed("media", "a", b"x");

    assert!(svc.copied("media", "a", "media", "b").await);
    store.fail_copies();
    assert!(!svc.copied("media", "a", "media", "c").await);
    assert!(!svc.copied("nowhere", "a", "media", "c").await);
}

#[tokio::test]
async fn rename_moves_the_object() {
    let (svc, store, _) = service();
    store.seed("media", "old.txt", b"x");

    assert!(svc.renamed("media", "old.txt", "media", "new.txt").await);

    assert_eq!(store.keys("media"), ["new.txt"]);
}

#[tokio::test]
async fn rename_that_cannot_remove_the_source_leaves_both_copies() {
    let (svc, store, _) = service();
    store.seed("media", "old.txt", b"x");
    store.refuse_delete("old.txt");

    let err = svc
        .rename("media", "old.txt", "archive", "new.txt")
        .await
        .unwrap_err();

    match err {
        Error::Consistency(ConsistencyError::PartialRename { from, to, source }) => {
            assert_eq!(from, "media/old.txt");
            assert_eq!(to, "archive/new.txt");
            assert!(matches!(
                *source,
                Error::Consistency(ConsistencyError::IncompleteDelete { .. })
            ));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(store.get("media", "old.txt").is_some());
    assert!(store.get("archive", "new.txt").is_some());
}

#[tokio::test]
async fn rename_with_failed_copy_deletes_nothing() {
    let (svc, store, _) = service();
    store.seed("media", "old.txt", b"x");
    store.fail_copies();

    let result = svc.rename("media", "old.txt", "media", "new.txt").await;

    assert!(matches!(
        result,
        Err(Error::Store(StoreError::Service { .. }))
    ));
    assert!(store.delete_batches().is_empty());
    assert_eq!(store.keys("media"), ["old.txt"]);
}

#[tokio::test]
async fn directories_are_zero_byte_placeholders() {
    let (svc, store, _) = service();

    let key = svc
        .create_directory("media", "/photos/2024/")
        .await
        .unwrap();

    assert_eq!(key, "photos/2024/");
    assert_eq!(store.get("media", "photos/2024/"), Some(Bytes::new()));
    assert!(matches!(
        svc.create_directory("media", "///").await,
        Err(Error::Store(StoreError::InvalidObjectKey(_)))
    ));

    let listing = svc.list("media", "photos", None).await.unwrap();
    assert!(listing.files.is_empty());
    assert_eq!(listing.directories.len(), 1);
    assert_eq!(listing.directories[0].key, "photos/2024/");
}

#[tokio::test]
async fn facade_walks_and_deletes_trees() {
    let (svc, store, _) = service();
    svc.create_directory("media", "gallery").await.unwrap();
    store.seed_files("media", &["gallery/1.jpg", "gallery/thumbs/1.jpg", "keep.txt"]);

    let tree = svc.tree("media", "gallery").await.unwrap();
    assert_eq!(tree.file_keys(), ["gallery/1.jpg", "gallery/thumbs/1.jpg"]);

    let report = svc.delete_tree("media", "gallery").await.unwrap();
    assert_eq!(report.files_deleted, 2);
    assert_eq!(store.keys("media"), ["keep.txt"]);

    assert_eq!(
        svc.delete_objects("media", &["keep.txt".to_string()])
            .await
            .unwrap(),
        1
    );
    assert!(svc.tree_deleted("media", "").await);
}
