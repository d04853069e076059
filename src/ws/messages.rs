use serde::Serialize;

use crate::error::Result;
use crate::types::Snapshot;

/// Frames pushed to viewers. The REST fallback serves the same shape.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ViewerMessage<'a> {
    /// `{"type":"snapshot","cycle":..,"timestamp":..,"stale":..,"rows":[..]}`
    Snapshot(&'a Snapshot),
}

pub fn encode_snapshot(snapshot: &Snapshot) -> Result<String> {
    Ok(serde_json::to_string(&ViewerMessage::Snapshot(snapshot))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn snapshot_frame_is_tagged_and_flat() {
        let at = Utc.with_ymd_and_hms(2026, 2, 1, 18, 30, 0).unwrap();
        let text = encode_snapshot(&Snapshot::empty(at)).unwrap();
        let v: serde_json::Value = serde_json::from_str(&text).unwrap();

        assert_eq!(v["type"], "snapshot");
        assert_eq!(v["cycle"], 0);
        assert_eq!(v["stale"], true);
        assert_eq!(v["timestamp"], "2026-02-01T18:30:00Z");
        assert!(v["rows"].as_array().unwrap().is_empty());
    }
}
