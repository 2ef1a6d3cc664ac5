use std::sync::Arc;

use apod_service::caching::FetchError;
use apod_service::services::{LoadSummary, ResolveOptions};
use apod_test::ApodServer;

use crate::{RecordSnapshot, cache, day, metadata_uri};

#[tokio::test]
async fn test_resolve_metadata() {
    apod_test::setup();

    let server = ApodServer::new();
    let cache = cache(&server);

    let record = cache
        .resolve(day("2022-11-22"), ResolveOptions::default())
        .await
        .unwrap();

    assert_eq!(record.title(), "A Double Star Cluster in Perseus");
    assert_eq!(record.copyright(), Some("Tommy Lease"));
    assert_eq!(record.read(), (None, None));
    assert_eq!(server.accesses(), 1);
}

#[tokio::test]
async fn test_concurrent_resolve_over_http() {
    apod_test::setup();

    let server = ApodServer::new();
    let cache = cache(&server);
    let date = day("2022-11-22");
    let options = ResolveOptions::default().with_thumbnail();

    let (first, second) =
        futures::future::join(cache.resolve(date, options), cache.resolve(date, options)).await;
    let (first, second) = (first.unwrap(), second.unwrap());

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(
        server.all_hits(),
        vec![
            (metadata_uri("2022-11-22"), 1),
            ("/image/4/3/DoubleCluster_Lease_960.png".to_owned(), 1),
        ]
    );
}

#[tokio::test]
async fn test_image_after_metadata() {
    apod_test::setup();

    let server = ApodServer::new();
    let cache = cache(&server);
    let date = day("2022-11-22");

    cache.resolve(date, ResolveOptions::default()).await.unwrap();
    assert_eq!(server.accesses(), 1);

    let record = cache
        .resolve(date, ResolveOptions::default().with_image())
        .await
        .unwrap();
    assert_eq!(
        server.all_hits(),
        vec![("/image/16/12/DoubleCluster_Lease_3756.png".to_owned(), 1)]
    );

    insta::assert_debug_snapshot!(RecordSnapshot::from(&*record), @r###"
    RecordSnapshot {
        date: "2022-11-22",
        title: "A Double Star Cluster in Perseus",
        copyright: Some(
            "Tommy Lease",
        ),
        media_kind: Image,
        thumbnail_url: "http://localhost:<port>/image/4/3/DoubleCluster_Lease_960.png",
        image_url: Some(
            "http://localhost:<port>/image/16/12/DoubleCluster_Lease_3756.png",
        ),
        thumbnail: None,
        full_image: Some(
            (
                16,
                12,
            ),
        ),
    }
    "###);
}

#[tokio::test]
async fn test_load_ten_days() {
    apod_test::setup();

    let server = ApodServer::new();
    let cache = cache(&server);
    let start = day("2022-11-22");
    let options = ResolveOptions::default().with_thumbnail();

    let summary = cache.load(start, 10, options).await;
    assert_eq!(
        summary,
        LoadSummary {
            resolved: 10,
            failed: 0
        }
    );
    assert_eq!(server.accesses(), 20);
    assert_eq!(cache.cached_days().len(), 10);

    for offset in 0..10 {
        let record = cache
            .resolve(start.days_before(offset), options)
            .await
            .unwrap();
        assert!(record.has_thumbnail());
    }
    assert_eq!(server.accesses(), 0);
}

#[tokio::test]
async fn test_failed_thumbnail_is_retried_alone() {
    apod_test::setup();

    let server = ApodServer::new();
    let cache = cache(&server);
    let date = day("2022-11-02");
    let options = ResolveOptions::default().with_thumbnail();

    let err = cache.resolve(date, options).await.unwrap_err();
    assert!(matches!(err, FetchError::Network(_)), "{err:?}");
    assert!(cache.get(date).is_some());
    assert_eq!(server.accesses(), 2);

    cache.resolve(date, options).await.unwrap_err();
    assert_eq!(
        server.all_hits(),
        vec![("/respond_statuscode/404/2022-11-02.jpg".to_owned(), 1)]
    );
}

#[tokio::test]
async fn test_load_skips_broken_days() {
    apod_test::setup();

    let server = ApodServer::new();
    let cache = cache(&server);
    let options = ResolveOptions::default().with_thumbnail().with_image();

    // 2022-11-02 and 2022-11-01 have broken thumbnails, 1995-06-15 is before the first picture
    let summary = cache.load(day("2022-11-03"), 3, options).await;
    assert_eq!(
        summary,
        LoadSummary {
            resolved: 1,
            failed: 2
        }
    );

    let summary = cache.load(day("1995-06-16"), 2, options).await;
    assert_eq!(
        summary,
        LoadSummary {
            resolved: 1,
            failed: 1
        }
    );
    assert_eq!(
        cache.cached_days(),
        vec![
            day("1995-06-16"),
            day("2022-11-01"),
            day("2022-11-02"),
            day("2022-11-03")
        ]
    );
}
