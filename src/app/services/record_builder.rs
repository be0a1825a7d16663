//! Canonical record construction and validation
//!
//! Maps a raw attribute block into a [`CanonicalRecord`], applying the
//! field-presence and format rules in order. A failed rule rejects the
//! whole entry with a typed reason; rejections are counted by the caller
//! and never abort a file.

use crate::app::models::{CanonicalRecord, RawEntry};
use crate::app::services::device_registry::DeviceRegistry;
use crate::app::services::location_decoder::LocationDecoder;
use crate::constants::{attributes, EVENT_TIMESTAMP_FORMAT, MIN_MSISDN_LEN, UNKNOWN_DEVICE};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, Utc};
use std::sync::Arc;
use tracing::{debug, warn};

/// Typed rejection reasons; each drops exactly one entry
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordRejection {
    #[error("required attribute missing: {attribute}")]
    MissingAttribute { attribute: &'static str },

    #[error("unparseable event timestamp '{raw}'")]
    BadTimestamp { raw: String },

    #[error("event dated {event_date} falls outside the run day {run_date}")]
    OutOfDay {
        event_date: NaiveDate,
        run_date: NaiveDate,
    },

    #[error("undecodable location code '{raw}'")]
    UndecodableLocation { raw: String },

    #[error("subscriber id '{msisdn}' shorter than {MIN_MSISDN_LEN} characters")]
    ShortSubscriberId { msisdn: String },
}

/// Builds canonical records from raw attribute blocks
#[derive(Debug, Clone)]
pub struct RecordBuilder {
    decoder: LocationDecoder,
    devices: Arc<DeviceRegistry>,
    offset: FixedOffset,
    same_day_only: bool,
}

impl RecordBuilder {
    pub fn new(
        decoder: LocationDecoder,
        devices: Arc<DeviceRegistry>,
        offset: FixedOffset,
        same_day_only: bool,
    ) -> Self {
        Self {
            decoder,
            devices,
            offset,
            same_day_only,
        }
    }

    /// Reload reference data that has passed its TTL.
    ///
    /// Long-running callers invoke this between polls; refresh failures
    /// keep the previous snapshot.
    pub async fn refresh_reference_data(&self) {
        if let Err(e) = self.decoder.towers().refresh_if_stale() {
            warn!("Tower index refresh failed, keeping cached data: {}", e);
        }
        if let Err(e) = self.devices.refresh_if_stale().await {
            warn!("Device registry refresh failed, keeping cached data: {}", e);
        }
    }

    /// Build a canonical record, scoped to today in the fixed offset
    pub fn build(&self, entry: &RawEntry) -> Result<CanonicalRecord, RecordRejection> {
        self.build_for_day(entry, Utc::now().with_timezone(&self.offset).date_naive())
    }

    /// Build a canonical record against an explicit run day.
    ///
    /// Rules, in order: required attributes present, timestamp parses (and
    /// matches the run day when the same-day filter is active), location
    /// decodes, subscriber id long enough.
    pub fn build_for_day(
        &self,
        entry: &RawEntry,
        run_date: NaiveDate,
    ) -> Result<CanonicalRecord, RecordRejection> {
        let msisdn = entry.get_trimmed(attributes::CALLING_STATION_ID);
        let raw_location = entry.get_trimmed(attributes::USER_LOCATION_INFO);
        let raw_timestamp = entry.get_trimmed(attributes::EVENT_TIMESTAMP);

        if msisdn.is_empty() {
            return Err(RecordRejection::MissingAttribute {
                attribute: attributes::CALLING_STATION_ID,
            });
        }
        if raw_location.is_empty() {
            return Err(RecordRejection::MissingAttribute {
                attribute: attributes::USER_LOCATION_INFO,
            });
        }
        if raw_timestamp.is_empty() {
            return Err(RecordRejection::MissingAttribute {
                attribute: attributes::EVENT_TIMESTAMP,
            });
        }

        let event_time = parse_event_timestamp(raw_timestamp, self.offset).ok_or_else(|| {
            RecordRejection::BadTimestamp {
                raw: raw_timestamp.to_string(),
            }
        })?;

        if self.same_day_only && event_time.date_naive() != run_date {
            return Err(RecordRejection::OutOfDay {
                event_date: event_time.date_naive(),
                run_date,
            });
        }

        let location = self.decoder.decode(raw_location).map_err(|e| {
            debug!("Location decode failed: {}", e);
            RecordRejection::UndecodableLocation {
                raw: raw_location.to_string(),
            }
        })?;

        if msisdn.len() < MIN_MSISDN_LEN {
            return Err(RecordRejection::ShortSubscriberId {
                msisdn: msisdn.to_string(),
            });
        }

        let imsi = {
            let primary = entry.get_trimmed(attributes::IMSI);
            let value = if primary.is_empty() {
                entry.get_trimmed(attributes::USER_NAME)
            } else {
                primary
            };
            (!value.is_empty()).then(|| value.to_string())
        };

        let device_identity = {
            let imeisv = entry.get_trimmed(attributes::IMEISV);
            if imeisv.is_empty() {
                entry.get_trimmed(attributes::IMEI)
            } else {
                imeisv
            }
        };
        let device_model = if device_identity.is_empty() {
            UNKNOWN_DEVICE.to_string()
        } else {
            self.devices.lookup(device_identity)
        };

        Ok(CanonicalRecord {
            msisdn: msisdn.to_string(),
            imsi,
            station_id: location.station_id,
            sector_id: location.sector_id,
            tower_name: location.tower_name,
            lat: location.lat,
            lon: location.lon,
            event_time,
            device_model,
        })
    }
}

/// Parse an event timestamp in either known source format.
///
/// Epoch-numeric values are seconds since the Unix epoch; textual values
/// look like `Aug 30 2025 14:15:00 UTC` with the trailing timezone token
/// naming UTC wall time. Both normalize to the configured fixed offset.
pub fn parse_event_timestamp(raw: &str, offset: FixedOffset) -> Option<DateTime<FixedOffset>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if raw.bytes().all(|b| b.is_ascii_digit()) {
        let secs: i64 = raw.parse().ok()?;
        return DateTime::<Utc>::from_timestamp(secs, 0).map(|dt| dt.with_timezone(&offset));
    }

    // Strip the trailing timezone token, e.g. "UTC" or "GMT"
    let without_tz = raw
        .rsplit_once(' ')
        .filter(|(_, tz)| tz.chars().all(|c| c.is_ascii_alphabetic()))
        .map(|(head, _)| head)
        .unwrap_or(raw);

    let naive = NaiveDateTime::parse_from_str(without_tz, EVENT_TIMESTAMP_FORMAT).ok()?;
    Some(naive.and_utc().with_timezone(&offset))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::services::location_decoder::LocationDecoder;
    use crate::app::services::tower_index::{Tower, TowerCache, TowerIndex};
    use crate::db::pool::connect_memory;
    use crate::db::schema::init_schema;
    use std::time::Duration;

    fn offset() -> FixedOffset {
        FixedOffset::east_opt(-4 * 3600).unwrap()
    }

    async fn builder(same_day_only: bool) -> RecordBuilder {
        let pool = connect_memory().await.unwrap();
        init_schema(&pool).await.unwrap();
        let devices = Arc::new(
            DeviceRegistry::load(pool, Duration::from_secs(3600))
                .await
                .unwrap(),
        );

        let mut index = TowerIndex::default();
        index.insert(
            4038,
            14,
            Tower {
                name: "GEORGETOWN_EAST".to_string(),
                lat: 6.8013,
                lon: -58.1553,
            },
        );
        let towers = Arc::new(TowerCache::from_index(index, Duration::from_secs(3600)));

        RecordBuilder::new(LocationDecoder::new(towers), devices, offset(), same_day_only)
    }

    fn full_entry() -> RawEntry {
        let mut entry = RawEntry::new();
        entry.push("Calling-Station-Id", "5926771234");
        entry.push("3GPP-IMSI", "738020123456789");
        entry.push("3GPP-User-Location-Info", "0x823708401b59370840000fc70e");
        entry.push("Event-Timestamp", "Aug 30 2025 14:15:00 UTC");
        entry
    }

    fn run_date() -> NaiveDate {
        // 14:15 UTC is 10:15 at UTC-4, same calendar day
        NaiveDate::from_ymd_opt(2025, 8, 30).unwrap()
    }

    #[tokio::test]
    async fn builds_complete_record() {
        let builder = builder(true).await;
        let record = builder.build_for_day(&full_entry(), run_date()).unwrap();

        assert_eq!(record.msisdn, "5926771234");
        assert_eq!(record.imsi.as_deref(), Some("738020123456789"));
        assert_eq!(record.station_id, 4038);
        assert_eq!(record.sector_id, 14);
        assert_eq!(record.tower_name.as_deref(), Some("GEORGETOWN_EAST"));
        assert_eq!(record.stored_event_time(), "2025-08-30 10:15:00");
        assert_eq!(record.device_model, UNKNOWN_DEVICE);
    }

    #[tokio::test]
    async fn missing_required_attributes_reject() {
        let builder = builder(true).await;

        for key in [
            "Calling-Station-Id",
            "3GPP-User-Location-Info",
            "Event-Timestamp",
        ] {
            let mut entry = RawEntry::new();
            for (k, v) in [
                ("Calling-Station-Id", "5926771234"),
                (
                    "3GPP-User-Location-Info",
                    "0x823708401b59370840000fc70e",
                ),
                ("Event-Timestamp", "Aug 30 2025 14:15:00 UTC"),
            ] {
                if k != key {
                    entry.push(k, v);
                }
            }
            assert!(matches!(
                builder.build_for_day(&entry, run_date()),
                Err(RecordRejection::MissingAttribute { .. })
            ));
        }
    }

    #[tokio::test]
    async fn imsi_falls_back_to_user_name() {
        let builder = builder(true).await;
        let mut entry = RawEntry::new();
        entry.push("Calling-Station-Id", "5926771234");
        entry.push("User-Name", "738020999999999");
        entry.push("3GPP-User-Location-Info", "0x823708401b59370840000fc70e");
        entry.push("Event-Timestamp", "Aug 30 2025 14:15:00 UTC");

        let record = builder.build_for_day(&entry, run_date()).unwrap();
        assert_eq!(record.imsi.as_deref(), Some("738020999999999"));
    }

    #[tokio::test]
    async fn bad_timestamp_rejects() {
        let builder = builder(true).await;
        let mut bad = RawEntry::new();
        bad.push("Calling-Station-Id", "5926771234");
        bad.push("3GPP-User-Location-Info", "0x823708401b59370840000fc70e");
        bad.push("Event-Timestamp", "not a timestamp");

        assert!(matches!(
            builder.build_for_day(&bad, run_date()),
            Err(RecordRejection::BadTimestamp { .. })
        ));
    }

    #[tokio::test]
    async fn epoch_timestamps_parse() {
        let builder = builder(false).await;
        let mut entry = RawEntry::new();
        entry.push("Calling-Station-Id", "5926771234");
        entry.push("3GPP-User-Location-Info", "0x823708401b59370840000fc70e");
        // 2025-08-30 14:15:00 UTC
        entry.push("Event-Timestamp", "1756563300");

        let record = builder.build_for_day(&entry, run_date()).unwrap();
        assert_eq!(record.stored_event_time(), "2025-08-30 10:15:00");
    }

    #[tokio::test]
    async fn out_of_day_events_reject_only_when_filtered() {
        let strict = builder(true).await;
        let lenient = builder(false).await;
        let other_day = NaiveDate::from_ymd_opt(2025, 8, 29).unwrap();

        assert!(matches!(
            strict.build_for_day(&full_entry(), other_day),
            Err(RecordRejection::OutOfDay { .. })
        ));
        assert!(lenient.build_for_day(&full_entry(), other_day).is_ok());
    }

    #[tokio::test]
    async fn undecodable_location_rejects() {
        let builder = builder(true).await;
        let mut entry = RawEntry::new();
        entry.push("Calling-Station-Id", "5926771234");
        entry.push("3GPP-User-Location-Info", "0xfc70e");
        entry.push("Event-Timestamp", "Aug 30 2025 14:15:00 UTC");

        assert!(matches!(
            builder.build_for_day(&entry, run_date()),
            Err(RecordRejection::UndecodableLocation { .. })
        ));
    }

    #[tokio::test]
    async fn short_subscriber_id_rejects() {
        let builder = builder(true).await;
        let mut entry = RawEntry::new();
        entry.push("Calling-Station-Id", "59267");
        entry.push("3GPP-User-Location-Info", "0x823708401b59370840000fc70e");
        entry.push("Event-Timestamp", "Aug 30 2025 14:15:00 UTC");

        assert!(matches!(
            builder.build_for_day(&entry, run_date()),
            Err(RecordRejection::ShortSubscriberId { .. })
        ));
    }

    #[test]
    fn timestamp_parser_handles_both_formats() {
        let off = offset();
        let textual = parse_event_timestamp("Aug 30 2025 14:15:00 UTC", off).unwrap();
        let epoch = parse_event_timestamp("1756563300", off).unwrap();
        assert_eq!(textual, epoch);

        assert!(parse_event_timestamp("", off).is_none());
        assert!(parse_event_timestamp("Aug 99 2025 14:15:00 UTC", off).is_none());
    }
}
