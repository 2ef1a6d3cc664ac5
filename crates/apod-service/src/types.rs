//! The records served by the cache and the value types they are built from.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::io::Cursor;
use std::str::FromStr;

use bytes::Bytes;
use chrono::{Datelike, Days, Local, NaiveDate};
use image::{ImageFormat, ImageReader};
use parking_lot::Mutex;
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use url::Url;

use crate::caching::{FetchError, FetchResult};

/// A calendar day without any time-of-day component.
///
/// This is the key of every cache structure. It is formatted and parsed as `YYYY-MM-DD`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CalendarDay(NaiveDate);

impl CalendarDay {
    const FORMAT: &'static str = "%Y-%m-%d";

    /// Creates a day from its year, month and day of month.
    pub fn from_ymd(year: i32, month: u32, day: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, day).map(Self)
    }

    /// The current day in the local time zone.
    pub fn today() -> Self {
        Self(Local::now().date_naive())
    }

    /// Strips the time of day from a timestamp.
    pub fn from_datetime<Tz: chrono::TimeZone>(datetime: &chrono::DateTime<Tz>) -> Self {
        Self(datetime.date_naive())
    }

    /// The day `days` days before this one.
    ///
    /// Saturates at the earliest representable date.
    pub fn days_before(self, days: u64) -> Self {
        Self(self.0.checked_sub_days(Days::new(days)).unwrap_or(NaiveDate::MIN))
    }

    /// The day before this one.
    pub fn pred(self) -> Self {
        self.days_before(1)
    }

    pub fn year(&self) -> i32 {
        self.0.year()
    }

    pub fn as_naive_date(&self) -> NaiveDate {
        self.0
    }
}

impl From<NaiveDate> for CalendarDay {
    fn from(date: NaiveDate) -> Self {
        Self(date)
    }
}

impl fmt::Display for CalendarDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(Self::FORMAT))
    }
}

/// Error returned when a string is not a `YYYY-MM-DD` date.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid calendar day {0:?}, expected YYYY-MM-DD")]
pub struct ParseCalendarDayError(String);

impl FromStr for CalendarDay {
    type Err = ParseCalendarDayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NaiveDate::parse_from_str(s.trim(), Self::FORMAT)
            .map(Self)
            .map_err(|_| ParseCalendarDayError(s.to_owned()))
    }
}

impl Serialize for CalendarDay {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CalendarDay {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// The kind of media a record points at.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

/// A decoded image payload.
///
/// The raw bytes are kept as they were received, cloning is cheap.
#[derive(Clone, PartialEq, Eq)]
pub struct Image {
    data: Bytes,
    format: ImageFormat,
    width: u32,
    height: u32,
}

impl Image {
    /// Decodes `data` in full, verifying that it is a complete image in a supported format.
    ///
    /// Only the encoded bytes are kept, the decoded pixels are discarded.
    pub fn decode(data: impl Into<Bytes>) -> FetchResult<Self> {
        let data = data.into();
        let reader = ImageReader::new(Cursor::new(data.as_ref()))
            .with_guessed_format()
            .map_err(|err| FetchError::Decode(err.to_string()))?;
        let format = reader
            .format()
            .ok_or_else(|| FetchError::Decode("unrecognized image format".into()))?;
        // A truncated body still has a valid header, only decoding the pixels catches it.
        let pixels = reader.decode()?;
        let (width, height) = (pixels.width(), pixels.height());

        Ok(Self {
            data,
            format,
            width,
            height,
        })
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl fmt::Debug for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Image")
            .field("format", &self.format)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("len", &self.data.len())
            .finish()
    }
}

/// The payloads of a [`Record`] that arrive after its metadata.
#[derive(Debug, Default)]
struct Payloads {
    thumbnail: Option<Image>,
    full_image: Option<Image>,
}

/// One Astronomy Picture of the Day.
///
/// The date and metadata never change after construction. The thumbnail and full image are
/// filled in as they arrive, possibly by different concurrent tasks, and are only reachable through
/// the synchronized accessors below.
///
/// Equality and hashing consider the [`date`](Self::date) only.
pub struct Record {
    date: CalendarDay,
    title: String,
    explanation: String,
    copyright: Option<String>,
    media_kind: MediaKind,
    thumbnail_url: Url,
    image_url: Option<Url>,
    payloads: Mutex<Payloads>,
}

impl Record {
    pub fn new(
        date: CalendarDay,
        title: impl Into<String>,
        explanation: impl Into<String>,
        copyright: Option<String>,
        media_kind: MediaKind,
        thumbnail_url: Url,
        image_url: Option<Url>,
    ) -> Self {
        Self {
            date,
            title: title.into(),
            explanation: explanation.into(),
            copyright,
            media_kind,
            thumbnail_url,
            image_url,
            payloads: Mutex::new(Payloads::default()),
        }
    }

    /// Decodes a record from the JSON body of a metadata response.
    pub fn from_json(data: &[u8]) -> FetchResult<Self> {
        let raw: RawRecord = serde_json::from_slice(data)?;
        raw.try_into()
    }

    pub fn date(&self) -> CalendarDay {
        self.date
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn explanation(&self) -> &str {
        &self.explanation
    }

    pub fn copyright(&self) -> Option<&str> {
        self.copyright.as_deref()
    }

    pub fn media_kind(&self) -> MediaKind {
        self.media_kind
    }

    /// Where the thumbnail is fetched from.
    ///
    /// For videos without a preview image this points at the video itself.
    pub fn thumbnail_url(&self) -> &Url {
        &self.thumbnail_url
    }

    /// Where the full resolution image is fetched from, absent for videos.
    pub fn image_url(&self) -> Option<&Url> {
        self.image_url.as_ref()
    }

    /// Returns a consistent snapshot of `(thumbnail, full_image)`.
    pub fn read(&self) -> (Option<Image>, Option<Image>) {
        let payloads = self.payloads.lock();
        (payloads.thumbnail.clone(), payloads.full_image.clone())
    }

    pub fn thumbnail(&self) -> Option<Image> {
        self.payloads.lock().thumbnail.clone()
    }

    pub fn full_image(&self) -> Option<Image> {
        self.payloads.lock().full_image.clone()
    }

    pub fn has_thumbnail(&self) -> bool {
        self.payloads.lock().thumbnail.is_some()
    }

    pub fn has_full_image(&self) -> bool {
        self.payloads.lock().full_image.is_some()
    }

    /// Stores the thumbnail, replacing a previously stored one.
    pub fn set_thumbnail(&self, image: Image) {
        self.payloads.lock().thumbnail = Some(image);
    }

    /// Stores the full image, replacing a previously stored one.
    pub fn set_full_image(&self, image: Image) {
        self.payloads.lock().full_image = Some(image);
    }

    /// A serializable view of this record, used for output and snapshots.
    pub fn summary(&self) -> RecordSummary {
        let (thumbnail, full_image) = self.read();
        RecordSummary {
            date: self.date,
            title: self.title.clone(),
            copyright: self.copyright.clone(),
            media_kind: self.media_kind,
            thumbnail_url: self.thumbnail_url.clone(),
            image_url: self.image_url.clone(),
            thumbnail: thumbnail.as_ref().map(ImageSummary::from),
            full_image: full_image.as_ref().map(ImageSummary::from),
        }
    }
}

impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        self.date == other.date
    }
}

impl Eq for Record {}

impl Hash for Record {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.date.hash(state);
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (thumbnail, full_image) = self.read();
        f.debug_struct("Record")
            .field("date", &self.date)
            .field("title", &self.title)
            .field("copyright", &self.copyright)
            .field("media_kind", &self.media_kind)
            .field("thumbnail_url", &self.thumbnail_url.as_str())
            .field("image_url", &self.image_url.as_ref().map(Url::as_str))
            .field("thumbnail", &thumbnail)
            .field("full_image", &full_image)
            .finish_non_exhaustive()
    }
}

/// Serializable description of an [`Image`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ImageSummary {
    pub format: String,
    pub width: u32,
    pub height: u32,
    pub size: usize,
}

impl From<&Image> for ImageSummary {
    fn from(image: &Image) -> Self {
        Self {
            format: format!("{:?}", image.format()).to_lowercase(),
            width: image.width,
            height: image.height,
            size: image.len(),
        }
    }
}

/// Serializable description of a [`Record`] and the payloads it currently holds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RecordSummary {
    pub date: CalendarDay,
    pub title: String,
    pub copyright: Option<String>,
    pub media_kind: MediaKind,
    pub thumbnail_url: Url,
    pub image_url: Option<Url>,
    pub thumbnail: Option<ImageSummary>,
    pub full_image: Option<ImageSummary>,
}

/// The metadata response as sent by the APOD API.
#[derive(Debug, Deserialize)]
struct RawRecord {
    date: String,
    title: String,
    explanation: String,
    #[serde(default)]
    copyright: Option<String>,
    #[serde(default = "default_media_type")]
    media_type: String,
    url: Url,
    #[serde(default)]
    hdurl: Option<Url>,
    #[serde(default)]
    thumbnail_url: Option<Url>,
}

fn default_media_type() -> String {
    "image".to_owned()
}

impl TryFrom<RawRecord> for Record {
    type Error = FetchError;

    fn try_from(raw: RawRecord) -> Result<Self, Self::Error> {
        let date = raw
            .date
            .parse::<CalendarDay>()
            .map_err(|err| FetchError::Decode(err.to_string()))?;

        let media_kind = match raw.media_type.as_str() {
            "image" => MediaKind::Image,
            "video" => MediaKind::Video,
            other => {
                return Err(FetchError::Decode(format!(
                    "unsupported media type {other:?}"
                )));
            }
        };

        let (thumbnail_url, image_url) = match media_kind {
            MediaKind::Image => {
                let image_url = raw.hdurl.unwrap_or_else(|| raw.url.clone());
                (raw.url, Some(image_url))
            }
            MediaKind::Video => (raw.thumbnail_url.unwrap_or(raw.url), None),
        };

        // The API pads the copyright with line breaks every now and then.
        let copyright = raw
            .copyright
            .map(|c| c.trim().to_owned())
            .filter(|c| !c.is_empty());

        Ok(Record::new(
            date,
            raw.title,
            raw.explanation,
            copyright,
            media_kind,
            thumbnail_url,
            image_url,
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::test;

    use super::*;

    #[test]
    fn test_calendar_day_roundtrip() {
        let day: CalendarDay = "2022-11-22".parse().unwrap();
        assert_eq!(day, CalendarDay::from_ymd(2022, 11, 22).unwrap());
        assert_eq!(day.to_string(), "2022-11-22");
        assert_eq!(day.pred().to_string(), "2022-11-21");
        assert_eq!(day.days_before(22).to_string(), "2022-10-31");
    }

    #[test]
    fn test_calendar_day_strips_time() {
        let datetime = chrono::NaiveDate::from_ymd_opt(2022, 11, 22)
            .unwrap()
            .and_hms_opt(23, 59, 1)
            .unwrap()
            .and_utc();
        assert_eq!(
            CalendarDay::from_datetime(&datetime),
            CalendarDay::from_ymd(2022, 11, 22).unwrap()
        );
    }

    #[test]
    fn test_calendar_day_invalid() {
        assert!("20221122".parse::<CalendarDay>().is_err());
        assert!("2022-13-01".parse::<CalendarDay>().is_err());
    }

    #[test]
    fn test_decode_record() {
        let record = Record::from_json(test::SINGLE_RECORD_JSON.as_bytes()).unwrap();

        assert_eq!(record.date(), test::day(2022, 11, 22));
        assert_eq!(record.title(), "A Double Star Cluster in Perseus");
        assert_eq!(record.copyright(), Some("Tommy Lease"));
        assert_eq!(record.media_kind(), MediaKind::Image);
        assert_eq!(
            record.thumbnail_url().as_str(),
            "https://apod.nasa.gov/apod/image/2211/DoubleCluster_Lease_960.jpg"
        );
        assert_eq!(
            record.image_url().map(Url::as_str),
            Some("https://apod.nasa.gov/apod/image/2211/DoubleCluster_Lease_3756.jpg")
        );
        assert_eq!(record.read(), (None, None));
    }

    #[test]
    fn test_decode_video_record() {
        let json = r#"{
            "date": "2022-11-09",
            "explanation": "What would it look like to fly over Mars?",
            "media_type": "video",
            "service_version": "v1",
            "thumbnail_url": "https://img.youtube.com/vi/abc/0.jpg",
            "title": "Flying over Mars",
            "url": "https://www.youtube.com/embed/abc"
        }"#;
        let record = Record::from_json(json.as_bytes()).unwrap();

        assert_eq!(record.media_kind(), MediaKind::Video);
        assert_eq!(record.copyright(), None);
        assert_eq!(
            record.thumbnail_url().as_str(),
            "https://img.youtube.com/vi/abc/0.jpg"
        );
        assert_eq!(record.image_url(), None);
    }

    #[test]
    fn test_decode_invalid_date() {
        let json = test::SINGLE_RECORD_JSON.replace("2022-11-22", "20221122");
        let err = Record::from_json(json.as_bytes()).unwrap_err();
        assert!(matches!(err, FetchError::Decode(_)), "{err:?}");
    }

    #[test]
    fn test_decode_missing_title() {
        let json = r#"{"date": "2022-11-22", "explanation": "", "url": "https://example.com/a.jpg"}"#;
        let err = Record::from_json(json.as_bytes()).unwrap_err();
        assert!(matches!(err, FetchError::Decode(_)), "{err:?}");
    }

    #[test]
    fn test_record_identity_is_the_date() {
        let a = test::record(2022, 11, 22);
        let b = test::record(2022, 11, 22);
        b.set_thumbnail(test::image());
        assert_eq!(a, b);
        assert_ne!(a, test::record(2022, 11, 21));
    }

    #[test]
    fn test_image_decode() {
        let image = test::image();
        assert_eq!(image.format(), ImageFormat::Png);
        assert_eq!(image.dimensions(), (4, 3));

        let err = Image::decode(&b"definitely not an image"[..]).unwrap_err();
        assert!(matches!(err, FetchError::Decode(_)), "{err:?}");
    }

    #[test]
    fn test_image_decode_truncated() {
        let data = test::png_bytes(64, 64);
        assert!(Image::decode(data.clone()).is_ok());

        let err = Image::decode(data[..data.len() - 30].to_vec()).unwrap_err();
        assert!(matches!(err, FetchError::Decode(_)), "{err:?}");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_setters() {
        let record = Arc::new(test::record(2022, 11, 22));
        let thumbnail = test::image();
        let full_image = test::image_with_size(8, 8);

        let tasks: Vec<_> = (0..64)
            .map(|i| {
                let record = Arc::clone(&record);
                let thumbnail = thumbnail.clone();
                let full_image = full_image.clone();
                tokio::spawn(async move {
                    if i % 2 == 0 {
                        record.set_thumbnail(thumbnail);
                    } else {
                        record.set_full_image(full_image);
                    }
                    let _ = record.read();
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(record.read(), (Some(thumbnail), Some(full_image)));
    }
}
