//! Helpers for testing the cache against a local HTTP server.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that all console output
//!    is captured by the test runner.
//!
//!  - When using an [`ApodServer`], make sure that the server is held until all requests to
//!    the server have been made. If the server is dropped, the ports remain open and all
//!    connections to it will time out. To avoid this, assign it to a variable: `let server =
//!    ApodServer::new();`.

use std::collections::BTreeMap;
use std::io::Cursor;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use axum::extract::{self, Query, RawQuery, Request};
use axum::http::{HeaderMap, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::NaiveDate;
use image::{ImageBuffer, ImageFormat, Rgb};
use reqwest::Url;
use serde_json::{Value, json};
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::fmt;

/// The first day with a published picture.
const FIRST_DAY: &str = "1995-06-16";

/// Setup the test environment.
///
///  - Initializes logs: The logger only captures logs from the `apod_service` crate and mutes all
///    other logs (such as hyper or reqwest).
pub fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new("apod_service=trace"))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}

/// Returns the absolute path to the given fixture.
///
/// Fixtures are located in the `tests/fixtures` directory, located from the workspace root.
///
/// # Panics
///
/// Panics if the fixture path does not exist on the file system.
pub fn fixture(path: impl AsRef<Path>) -> PathBuf {
    let path = path.as_ref();
    let full_path = fixture_path(path);
    assert!(full_path.exists(), "'{}' does not exist", path.display());
    full_path
}

fn fixture_path(path: &Path) -> PathBuf {
    let mut full_path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    full_path.pop(); // to /crates/
    full_path.pop(); // to /
    full_path.push("./tests/fixtures/");
    full_path.push(path);
    full_path
}

/// Returns the contents of a fixture.
///
/// # Panics
///
/// Panics if the fixture does not exist or cannot be read.
pub fn read_fixture(path: impl AsRef<Path>) -> Vec<u8> {
    std::fs::read(fixture(path)).unwrap()
}

/// The metadata fixture of `date`, exactly as the APOD API sent it.
pub fn record_fixture(date: &str) -> Vec<u8> {
    read_fixture(format!("apod/{date}.json"))
}

/// Encodes a black PNG image of the given size.
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let buffer = ImageBuffer::<Rgb<u8>, _>::new(width, height);
    let mut data = Cursor::new(Vec::new());
    buffer.write_to(&mut data, ImageFormat::Png).unwrap();
    data.into_inner()
}

/// Helper to redact the port number from localhost URLs in snapshots.
///
/// Since the [`ApodServer`] runs on a random port, the image locators of records it serves
/// contain random port numbers. This redaction masks them out.
pub fn redact_localhost_port(url: &str) -> String {
    let re = regex::Regex::new(r"^http://localhost:[0-9]+").unwrap();
    re.replace(url, "http://localhost:<port>").into_owned()
}

/// A test server that binds to a random port and serves a web app.
///
/// This server requires a `tokio` runtime and is supposed to be run in a `tokio::test`. It
/// automatically stops serving when dropped.
#[derive(Debug)]
pub struct Server {
    pub handle: tokio::task::JoinHandle<()>,
    pub socket: SocketAddr,
}

impl Server {
    pub fn with_router(router: Router) -> Self {
        let listener = std::net::TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0))).unwrap();
        listener.set_nonblocking(true).unwrap();
        let socket = listener.local_addr().unwrap();
        let listener = tokio::net::TcpListener::from_std(listener).unwrap();

        let handle = tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self { handle, socket }
    }

    /// Returns the socket address that this server listens on.
    pub fn addr(&self) -> SocketAddr {
        self.socket
    }

    /// Returns the port that this server listens on.
    pub fn port(&self) -> u16 {
        self.addr().port()
    }

    /// Returns a full URL pointing to the given path.
    ///
    /// This URL uses `localhost` as hostname.
    pub fn url(&self, path: &str) -> Url {
        let path = path.trim_start_matches('/');
        format!("http://localhost:{}/{}", self.port(), path)
            .parse()
            .unwrap()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// A local stand-in for the APOD API that counts every request it receives.
///
/// Routes:
///
///  - `/apod?date=YYYY-MM-DD`: The metadata of a day. Days with a fixture in `tests/fixtures/apod`
///    are served from it, every other day gets a made up image record. Image locators point back
///    at this server. Two days are broken on purpose: the thumbnail of `2022-11-01` is not an
///    image, and the thumbnail of `2022-11-02` responds with `404`. Days before the first
///    published picture respond with `400`.
///  - `/image/:width/:height/*name`: A PNG image of the given size.
///  - `/delay/:time/*path`: Redirects to `path`, including the query, after waiting for `time`.
///  - `/fixtures/*path`: The raw contents of a fixture file.
///  - `/respond_statuscode/:num/*tail`: Responds with the given status code.
///  - `/garbage_data/*tail`: Responds with `tail` as the body.
pub struct ApodServer {
    server: Server,
    hits: Arc<Mutex<BTreeMap<String, usize>>>,
}

impl ApodServer {
    pub fn new() -> Self {
        let hits = Arc::new(Mutex::new(BTreeMap::new()));

        let hitcounter = {
            let hits = hits.clone();
            move |extract::OriginalUri(uri), req: Request, next: Next| {
                let hits = hits.clone();
                async move {
                    {
                        let mut hits = hits.lock().unwrap();
                        let hits = hits.entry(uri.to_string()).or_default();
                        *hits += 1;
                    }

                    next.run(req).await
                }
            }
        };

        let router = Router::new()
            .route("/apod", get(metadata))
            .route(
                "/image/:width/:height/*name",
                get(
                    |extract::Path((width, height, _)): extract::Path<(u32, u32, String)>| async move {
                        ([(header::CONTENT_TYPE, "image/png")], png_bytes(width, height))
                    },
                ),
            )
            .route(
                "/delay/:time/*path",
                get(
                    |extract::Path((time, path)): extract::Path<(String, String)>,
                     RawQuery(query): RawQuery| async move {
                        let duration = humantime::parse_duration(&time).unwrap();
                        tokio::time::sleep(duration).await;

                        let location = match query {
                            Some(query) => format!("/{path}?{query}"),
                            None => format!("/{path}"),
                        };
                        (StatusCode::FOUND, [(header::LOCATION, location)])
                    },
                ),
            )
            .route(
                "/respond_statuscode/:num/*tail",
                get(
                    |extract::Path((num, _)): extract::Path<(u16, String)>| async move {
                        StatusCode::from_u16(num).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
                    },
                ),
            )
            .route(
                "/fixtures/*path",
                get(|extract::Path(path): extract::Path<String>| async move {
                    match std::fs::read(fixture_path(Path::new(&path))) {
                        Ok(data) => data.into_response(),
                        Err(_) => StatusCode::NOT_FOUND.into_response(),
                    }
                }),
            )
            .route(
                "/garbage_data/*tail",
                get(|extract::Path(tail): extract::Path<String>| async move { tail }),
            )
            .layer(middleware::from_fn(hitcounter));

        let server = Server::with_router(router);

        Self { server, hits }
    }

    /// The URL to configure as `api_url`.
    pub fn api_url(&self) -> Url {
        self.server.url("apod")
    }

    /// Returns and resets the total number of requests.
    pub fn accesses(&self) -> usize {
        let map = std::mem::take(&mut *self.hits.lock().unwrap());
        map.into_values().sum()
    }

    /// Returns and resets the number of requests per URI, sorted by URI.
    pub fn all_hits(&self) -> Vec<(String, usize)> {
        let map = std::mem::take(&mut *self.hits.lock().unwrap());
        map.into_iter().collect()
    }

    pub fn url(&self, path: &str) -> Url {
        self.server.url(path)
    }
}

impl Default for ApodServer {
    fn default() -> Self {
        Self::new()
    }
}

async fn metadata(headers: HeaderMap, Query(params): Query<BTreeMap<String, String>>) -> Response {
    let Some(date) = params.get("date") else {
        return bad_request("missing date");
    };
    let Ok(day) = NaiveDate::parse_from_str(date, "%Y-%m-%d") else {
        return bad_request(&format!("time data '{date}' does not match format '%Y-%m-%d'"));
    };
    if day.to_string().as_str() < FIRST_DAY {
        return bad_request(&format!("Date must be between Jun 16, 1995 and today: {date}"));
    }

    let host = headers
        .get(header::HOST)
        .and_then(|host| host.to_str().ok())
        .unwrap_or("localhost");
    let base = format!("http://{host}");

    let record = match fixture_path(Path::new(&format!("apod/{day}.json"))) {
        path if path.exists() => {
            let mut record: Value = serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap();
            localize_locators(&mut record, &base);
            record
        }
        _ => made_up_record(day, &base),
    };

    Json(record).into_response()
}

fn bad_request(msg: &str) -> Response {
    let body = json!({ "code": 400, "msg": msg, "service_version": "v1" });
    (StatusCode::BAD_REQUEST, Json(body)).into_response()
}

/// Points the image locators of a fixture at this server.
fn localize_locators(record: &mut Value, base: &str) {
    let is_video = record["media_type"] == "video";
    let sizes: &[(&str, (u32, u32))] = if is_video {
        &[("thumbnail_url", (4, 3))]
    } else {
        &[("url", (4, 3)), ("hdurl", (16, 12))]
    };

    for (key, (width, height)) in sizes {
        if let Some(Value::String(locator)) = record.get_mut(*key) {
            let name = locator.rsplit('/').next().unwrap_or_default();
            let stem = name.rsplit_once('.').map_or(name, |(stem, _)| stem);
            *locator = format!("{base}/image/{width}/{height}/{stem}.png");
        }
    }
}

fn made_up_record(day: NaiveDate, base: &str) -> Value {
    let url = match day.to_string().as_str() {
        "2022-11-01" => format!("{base}/garbage_data/{day}.jpg"),
        "2022-11-02" => format!("{base}/respond_statuscode/404/{day}.jpg"),
        _ => format!("{base}/image/4/3/{day}.png"),
    };

    json!({
        "date": day.to_string(),
        "explanation": "Made up for testing.",
        "hdurl": format!("{base}/image/16/12/{day}.png"),
        "media_type": "image",
        "service_version": "v1",
        "title": format!("Picture of {day}"),
        "url": url,
    })
}
