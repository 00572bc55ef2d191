//! Content fingerprints binding media bytes to their claimed capture context.
//!
//! The fingerprint covers the bytes *and* the latitude, longitude and claimed
//! capture time, so the same image presented with a different place or time
//! fingerprints differently. Verification therefore answers "this exact image,
//! taken here, at this time", never just "this image exists".

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::EvidenceError;
use crate::model::hash_concat;

/// Claimed capture time: epoch milliseconds, or an opaque client string
/// (e.g. an ISO-8601 timestamp) that is hashed verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CaptureTime {
    Millis(i64),
    Text(String),
}

impl CaptureTime {
    /// Interpret a form field. Integers in canonical form become
    /// [`CaptureTime::Millis`]; anything else is kept as text so that its
    /// exact representation is what gets hashed.
    pub fn parse(raw: &str) -> Self {
        match raw.parse::<i64>() {
            Ok(ms) if ms.to_string() == raw => CaptureTime::Millis(ms),
            _ => CaptureTime::Text(raw.to_string()),
        }
    }

    fn is_blank(&self) -> bool {
        matches!(self, CaptureTime::Text(t) if t.trim().is_empty())
    }
}

impl fmt::Display for CaptureTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureTime::Millis(ms) => write!(f, "{ms}"),
            CaptureTime::Text(t) => f.write_str(t),
        }
    }
}

/// A latitude or longitude exactly as the client wrote it.
///
/// The text must parse to a finite number, but it is the text (not the
/// number) that gets hashed and stored: `"40.0"` and `"40"` are different
/// claims.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Coordinate {
    raw: String,
    value: f64,
}

impl Coordinate {
    pub fn parse(raw: &str) -> Result<Self, EvidenceError> {
        let raw = raw.trim();
        let value = raw
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| EvidenceError::invalid(format!("not a finite number: {raw:?}")))?;
        Ok(Coordinate {
            raw: raw.to_string(),
            value,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn value(&self) -> f64 {
        self.value
    }
}

impl TryFrom<String> for Coordinate {
    type Error = EvidenceError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Coordinate::parse(&raw)
    }
}

impl From<Coordinate> for String {
    fn from(c: Coordinate) -> String {
        c.raw
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Where and when the media was claimed to be captured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureMetadata {
    pub latitude: Coordinate,
    pub longitude: Coordinate,
    pub timestamp: CaptureTime,
}

impl CaptureMetadata {
    /// Build metadata from raw form fields, rejecting missing or
    /// non-numeric coordinates and an empty timestamp.
    pub fn from_fields(
        latitude: Option<&str>,
        longitude: Option<&str>,
        timestamp: Option<&str>,
    ) -> Result<Self, EvidenceError> {
        let latitude = parse_coordinate("latitude", latitude)?;
        let longitude = parse_coordinate("longitude", longitude)?;
        let timestamp = match timestamp.map(str::trim) {
            Some(t) if !t.is_empty() => CaptureTime::parse(t),
            _ => return Err(EvidenceError::invalid("missing timestamp")),
        };
        Ok(CaptureMetadata {
            latitude,
            longitude,
            timestamp,
        })
    }
}

fn parse_coordinate(name: &str, raw: Option<&str>) -> Result<Coordinate, EvidenceError> {
    match raw.map(str::trim) {
        Some(r) if !r.is_empty() => Coordinate::parse(r)
            .map_err(|_| EvidenceError::invalid(format!("{name} is not a finite number: {r:?}"))),
        _ => Err(EvidenceError::invalid(format!("missing {name}"))),
    }
}

/// SHA-256 (lowercase hex) over `bytes || latitude || longitude || timestamp`,
/// each metadata field in the exact text the client supplied.
///
/// Pure and deterministic. Fails with `InvalidInput` on empty media or a
/// blank timestamp.
pub fn fingerprint(media: &[u8], meta: &CaptureMetadata) -> Result<String, EvidenceError> {
    if media.is_empty() {
        return Err(EvidenceError::invalid("media bytes are empty"));
    }
    if meta.timestamp.is_blank() {
        return Err(EvidenceError::invalid("missing timestamp"));
    }

    let timestamp = meta.timestamp.to_string();
    Ok(hash_concat(&[
        media,
        meta.latitude.as_str().as_bytes(),
        meta.longitude.as_str().as_bytes(),
        timestamp.as_bytes(),
    ]))
}
