use std::time::Duration;

use apod_service::caching::FetchError;
use apod_service::services::FetchClient;
use apod_service::types::{MediaKind, Record};
use apod_service::utils::http::FetchTimeouts;
use apod_test::ApodServer;

use crate::{RecordSnapshot, day, http_client, http_client_with, metadata_uri};

#[tokio::test]
async fn test_fetch_metadata() {
    apod_test::setup();

    let server = ApodServer::new();
    let client = http_client(&server);

    let record = client.fetch_metadata(day("2022-11-22")).await.unwrap();

    insta::assert_debug_snapshot!(RecordSnapshot::from(&record), @r###"
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
        full_image: None,
    }
    "###);

    assert_eq!(
        server.all_hits(),
        vec![(metadata_uri("2022-11-22"), 1)]
    );
}

#[tokio::test]
async fn test_fetch_payloads() {
    apod_test::setup();

    let server = ApodServer::new();
    let client = http_client(&server);
    let record = client.fetch_metadata(day("2022-11-08")).await.unwrap();

    let thumbnail = client.fetch_thumbnail(&record).await.unwrap();
    assert_eq!(thumbnail.dimensions(), (4, 3));
    assert_eq!(thumbnail.format(), image::ImageFormat::Png);

    let full_image = client.fetch_full_image(&record).await.unwrap();
    assert_eq!(full_image.dimensions(), (16, 12));

    // fetching never stores anything on the record
    assert_eq!(record.read(), (None, None));
    assert_eq!(server.accesses(), 3);
}

#[tokio::test]
async fn test_fetch_video() {
    apod_test::setup();

    let server = ApodServer::new();
    let client = http_client(&server);

    let record = client.fetch_metadata(day("2022-11-09")).await.unwrap();
    assert_eq!(record.media_kind(), MediaKind::Video);
    assert_eq!(record.image_url(), None);

    insta::assert_debug_snapshot!(RecordSnapshot::from(&record), @r###"
    RecordSnapshot {
        date: "2022-11-09",
        title: "Flying over Mars",
        copyright: None,
        media_kind: Video,
        thumbnail_url: "http://localhost:<port>/image/4/3/0.png",
        image_url: None,
        thumbnail: None,
        full_image: None,
    }
    "###);

    let thumbnail = client.fetch_thumbnail(&record).await.unwrap();
    assert_eq!(thumbnail.dimensions(), (4, 3));

    let err = client.fetch_full_image(&record).await.unwrap_err();
    assert_eq!(
        err,
        FetchError::Decode("record has no full-resolution image".into())
    );
}

#[tokio::test]
async fn test_bad_request() {
    apod_test::setup();

    let server = ApodServer::new();
    let client = http_client(&server);

    let err = client.fetch_metadata(day("1995-06-15")).await.unwrap_err();
    assert_eq!(
        err,
        FetchError::Network("unexpected status code 400 Bad Request fetching metadata".into())
    );
}

#[tokio::test]
async fn test_missing_thumbnail() {
    apod_test::setup();

    let server = ApodServer::new();
    let client = http_client(&server);
    let record = client.fetch_metadata(day("2022-11-02")).await.unwrap();

    let err = client.fetch_thumbnail(&record).await.unwrap_err();
    assert_eq!(
        err,
        FetchError::Network("unexpected status code 404 Not Found fetching thumbnail".into())
    );
}

#[tokio::test]
async fn test_garbage_thumbnail() {
    apod_test::setup();

    let server = ApodServer::new();
    let client = http_client(&server);
    let record = client.fetch_metadata(day("2022-11-01")).await.unwrap();

    let err = client.fetch_thumbnail(&record).await.unwrap_err();
    assert!(matches!(err, FetchError::Decode(_)), "{err:?}");
}

#[tokio::test]
async fn test_garbage_metadata() {
    apod_test::setup();

    let server = ApodServer::new();
    let client = http_client_with(server.url("garbage_data/nope"), FetchTimeouts::default());

    let err = client.fetch_metadata(day("2022-11-22")).await.unwrap_err();
    assert!(matches!(err, FetchError::Decode(_)), "{err:?}");
}

#[tokio::test]
async fn test_metadata_of_other_day() {
    apod_test::setup();

    let server = ApodServer::new();
    // the fixture is served as is, whatever date is asked for
    let client = http_client_with(
        server.url("fixtures/apod/2022-11-22.json"),
        FetchTimeouts::default(),
    );

    let err = client.fetch_metadata(day("2022-11-21")).await.unwrap_err();
    assert_eq!(
        err,
        FetchError::Decode("expected the record of 2022-11-21, got 2022-11-22".into())
    );
}

#[tokio::test]
async fn test_timeout() {
    apod_test::setup();

    let server = ApodServer::new();
    let client = http_client_with(
        server.url("delay/2s/apod"),
        FetchTimeouts {
            connect: Duration::from_secs(1),
            request: Duration::from_millis(100),
        },
    );

    let err = client.fetch_metadata(day("2022-11-22")).await.unwrap_err();
    assert_eq!(err, FetchError::Network("request timed out".into()));
}

#[test]
fn test_decode_fixture() {
    let record = Record::from_json(&apod_test::record_fixture("2022-11-22")).unwrap();
    assert_eq!(record.copyright(), Some("Tommy Lease"));
}
