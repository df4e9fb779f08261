use std::ffi::OsStr;
use std::path::{Component, Path};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};

use crate::error::SidecarError;

const TIMESTAMP_FIELD: &str = "photoTakenTime.timestamp";
const TITLE_FIELD: &str = "title";

/// Google's per-asset JSON metadata, as written next to each media file by Takeout.
///
/// Only `title` and `photoTakenTime` are consumed. Everything else is decoded
/// leniently so that schema drift between export vintages never fails a file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TakeoutMetadata {
    #[serde(default, deserialize_with = "lenient_string")]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub image_views: Option<String>,
    #[serde(default)]
    pub creation_time: Option<TimeField>,
    #[serde(default)]
    pub photo_taken_time: Option<TimeField>,
    #[serde(default)]
    pub geo_data: Option<GeoData>,
    #[serde(default)]
    pub geo_data_exif: Option<GeoData>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub url: Option<String>,
    #[serde(default)]
    pub google_photos_origin: Option<GooglePhotosOrigin>,
    #[serde(default)]
    pub photo_last_modified_time: Option<TimeField>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TimeField {
    /// Decimal Unix seconds. Kept raw; only `photoTakenTime` is ever interpreted.
    #[serde(default)]
    pub timestamp: Option<Value>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub formatted: Option<String>,
}

/// Older exports write degrees as floats, some newer ones as scaled integers.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoData {
    #[serde(default, deserialize_with = "lenient_f64")]
    pub latitude: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub longitude: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub altitude: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub latitude_span: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub longitude_span: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GooglePhotosOrigin {
    #[serde(default)]
    pub mobile_upload: Option<MobileUpload>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MobileUpload {
    #[serde(default, deserialize_with = "lenient_string")]
    pub device_type: Option<String>,
}

/// A decoded sidecar: which file it describes and when that file was captured.
#[derive(Debug, Clone)]
pub struct SidecarRecord {
    /// Bare file name, guaranteed to be a single normal path component.
    pub media_filename: String,
    /// Whole seconds; sub-second precision is not carried by the export.
    pub captured_at: DateTime<Utc>,
    pub metadata: TakeoutMetadata,
}

/// Decode the raw contents of one sidecar file.
pub fn decode(bytes: &[u8]) -> Result<SidecarRecord, SidecarError> {
    // Derived struct impls also take positional arrays; a sidecar is always an object.
    let object: Map<String, Value> = serde_json::from_slice(bytes)?;
    let metadata = TakeoutMetadata::deserialize(Value::Object(object))?;

    let timestamp = metadata
        .photo_taken_time
        .as_ref()
        .and_then(|t| t.timestamp.as_ref());
    let captured_at = parse_captured_at(timestamp)?;
    let media_filename = validate_title(metadata.title.as_deref())?;

    Ok(SidecarRecord {
        media_filename,
        captured_at,
        metadata,
    })
}

fn parse_captured_at(value: Option<&Value>) -> Result<DateTime<Utc>, SidecarError> {
    let value = value.ok_or_else(|| SidecarError::field(TIMESTAMP_FIELD, "missing"))?;

    let seconds = match value {
        Value::String(s) => s.parse::<i64>().map_err(|e| {
            SidecarError::field(TIMESTAMP_FIELD, format!("{s:?} is not a base-10 integer: {e}"))
        })?,
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| SidecarError::field(TIMESTAMP_FIELD, format!("{n} is not an integer")))?,
        other => {
            return Err(SidecarError::field(
                TIMESTAMP_FIELD,
                format!("unexpected value {other}"),
            ))
        }
    };

    DateTime::from_timestamp(seconds, 0).ok_or_else(|| {
        SidecarError::field(TIMESTAMP_FIELD, format!("{seconds} is out of range"))
    })
}

/// The title must name a file beside the sidecar, never a path.
fn validate_title(title: Option<&str>) -> Result<String, SidecarError> {
    let title = title
        .filter(|t| !t.is_empty())
        .ok_or_else(|| SidecarError::field(TITLE_FIELD, "missing or empty"))?;

    let mut components = Path::new(title).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(name)), None) if name == OsStr::new(title) => Ok(title.to_string()),
        _ => Err(SidecarError::field(
            TITLE_FIELD,
            format!("{title:?} is not a bare file name"),
        )),
    }
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    })
}

fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}
