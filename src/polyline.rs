//! Encoded polylines for route geometries.
//!
//! Polylines travel through the projector untouched: they arrive encoded
//! from the directions backend and leave encoded in the response. Decoding
//! is only needed when a caller wants the actual coordinates.

use bitcode::{Decode, Encode};
use serde::{Deserialize, Serialize};

/// Coordinate precision of the standard polyline format (1e-5 degrees).
const PRECISION: f64 = 1e5;

/// A path segment in the precision-5 encoded polyline format.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Encode, Decode)]
#[serde(transparent)]
pub struct Polyline {
    encoded: String,
}

impl Polyline {
    /// Wraps an already encoded polyline string.
    pub fn new(encoded: impl Into<String>) -> Self {
        Self {
            encoded: encoded.into(),
        }
    }

    /// Encodes a sequence of (latitude, longitude) points.
    pub fn encode(points: &[(f64, f64)]) -> Self {
        let mut encoded = String::new();
        let mut prev = (0i64, 0i64);
        for &(lat, lng) in points {
            let lat = (lat * PRECISION).round() as i64;
            let lng = (lng * PRECISION).round() as i64;
            encode_value(lat - prev.0, &mut encoded);
            encode_value(lng - prev.1, &mut encoded);
            prev = (lat, lng);
        }
        Self { encoded }
    }

    pub fn as_str(&self) -> &str {
        &self.encoded
    }

    pub fn is_empty(&self) -> bool {
        self.encoded.is_empty()
    }

    /// Decodes into (latitude, longitude) points.
    ///
    /// Returns `None` if the string is truncated or contains bytes outside
    /// the polyline alphabet.
    pub fn decode(&self) -> Option<Vec<(f64, f64)>> {
        let bytes = self.encoded.as_bytes();
        let mut points = Vec::new();
        let mut index = 0;
        let mut lat = 0i64;
        let mut lng = 0i64;

        while index < bytes.len() {
            lat += decode_value(bytes, &mut index)?;
            lng += decode_value(bytes, &mut index)?;
            points.push((lat as f64 / PRECISION, lng as f64 / PRECISION));
        }

        Some(points)
    }
}

fn encode_value(value: i64, out: &mut String) {
    let mut value = if value < 0 { !(value << 1) } else { value << 1 };
    while value >= 0x20 {
        out.push((((value & 0x1f) | 0x20) as u8 + 63) as char);
        value >>= 5;
    }
    out.push((value as u8 + 63) as char);
}

fn decode_value(bytes: &[u8], index: &mut usize) -> Option<i64> {
    let mut result = 0i64;
    let mut shift = 0;
    loop {
        let byte = *bytes.get(*index)?;
        if !(63..=126).contains(&byte) || shift > 60 {
            return None;
        }
        *index += 1;
        let chunk = (byte - 63) as i64;
        result |= (chunk & 0x1f) << shift;
        shift += 5;
        if chunk < 0x20 {
            break;
        }
    }
    Some(if result & 1 != 0 { !(result >> 1) } else { result >> 1 })
}

#[cfg(test)]
mod tests {
    use super::*;

    const REFERENCE: &str = "_p~iF~ps|U_ulLnnqC_mqNvxq`@";

    fn assert_close(actual: &[(f64, f64)], expected: &[(f64, f64)]) {
        assert_eq!(actual.len(), expected.len());
        for (a, e) in actual.iter().zip(expected) {
            assert!((a.0 - e.0).abs() < 1e-9 && (a.1 - e.1).abs() < 1e-9, "{a:?} != {e:?}");
        }
    }

    #[test]
    fn test_decode_reference_polyline() {
        let polyline = Polyline::new(REFERENCE);
        let points = polyline.decode().expect("valid polyline");
        assert_close(&points, &[(38.5, -120.2), (40.7, -120.95), (43.252, -126.453)]);
    }

    #[test]
    fn test_encode_reference_points() {
        let polyline = Polyline::encode(&[(38.5, -120.2), (40.7, -120.95), (43.252, -126.453)]);
        assert_eq!(polyline.as_str(), REFERENCE);
    }

    #[test]
    fn test_empty_polyline() {
        let polyline = Polyline::new("");
        assert!(polyline.is_empty());
        assert_eq!(polyline.decode(), Some(vec![]));
    }

    #[test]
    fn test_truncated_polyline_fails() {
        // Drops the final longitude chunk.
        let polyline = Polyline::new("_p~iF");
        assert_eq!(polyline.decode(), None);
    }

    #[test]
    fn test_serializes_as_plain_string() {
        let polyline = Polyline::new("abc");
        assert_eq!(serde_json::to_string(&polyline).unwrap(), "\"abc\"");
    }
}
