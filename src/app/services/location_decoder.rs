//! Cell location code decoding
//!
//! The gateway reports subscriber location as a hexadecimal information
//! element whose trailing 4 bytes carry the cell-global identifier. The
//! high bits identify the radio station, the low 8 bits the sector. The
//! decoder is a pure function; tower name and coordinates come from a
//! read-only reference-data lookup layered on top.

use crate::app::services::tower_index::TowerCache;
use std::sync::Arc;
use tracing::debug;

/// Hex characters forming the cell-global identifier
const ECI_HEX_LEN: usize = 8;

/// Decoded cell-global identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellGlobalId {
    /// The full 32-bit identifier
    pub eci: u32,

    /// Radio station identifier, `eci >> 8`
    pub station_id: u32,

    /// Sector identifier, `eci & 0xFF`
    pub sector_id: u8,
}

/// Typed decode failure; never surfaces as a caller-visible panic
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum LocationDecodeError {
    #[error("location code '{code}' has fewer than {ECI_HEX_LEN} usable hex characters")]
    TooShort { code: String },

    #[error("location code '{code}' has non-hex characters in its identifier")]
    InvalidHex { code: String },
}

/// Decode the cell-global identifier from a raw location code.
///
/// Strips an optional `0x`/`0X` prefix, takes the last 8 hex characters
/// and splits them into station and sector identifiers.
pub fn decode_cell_global_id(raw: &str) -> Result<CellGlobalId, LocationDecodeError> {
    let trimmed = raw.trim();
    let hex = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);

    // Lossy decoding of the input file can leave multibyte replacement
    // characters in the value; byte-indexed slicing would panic on them.
    if !hex.is_ascii() {
        return Err(LocationDecodeError::InvalidHex {
            code: raw.to_string(),
        });
    }

    if hex.len() < ECI_HEX_LEN {
        return Err(LocationDecodeError::TooShort {
            code: raw.to_string(),
        });
    }

    let eci_hex = &hex[hex.len() - ECI_HEX_LEN..];
    let eci = u32::from_str_radix(eci_hex, 16).map_err(|_| LocationDecodeError::InvalidHex {
        code: raw.to_string(),
    })?;

    Ok(CellGlobalId {
        eci,
        station_id: eci >> 8,
        sector_id: (eci & 0xFF) as u8,
    })
}

/// Fully decoded location: identifier plus resolved reference data
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedLocation {
    pub station_id: u32,
    pub sector_id: u8,
    pub tower_name: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
}

/// Location decoder coupling the pure decode with tower reference lookups.
///
/// A reference-data miss does not fail the decode; the location fields are
/// simply left empty.
#[derive(Debug, Clone)]
pub struct LocationDecoder {
    towers: Arc<TowerCache>,
}

impl LocationDecoder {
    pub fn new(towers: Arc<TowerCache>) -> Self {
        Self { towers }
    }

    /// The tower reference cache backing lookups
    pub fn towers(&self) -> &Arc<TowerCache> {
        &self.towers
    }

    /// Decode a raw location code and resolve its tower, if known
    pub fn decode(&self, raw: &str) -> Result<DecodedLocation, LocationDecodeError> {
        let cgi = decode_cell_global_id(raw)?;

        let tower = self.towers.lookup(cgi.station_id, cgi.sector_id);
        if tower.is_none() {
            debug!(
                "No tower reference data for station {} sector {}",
                cgi.station_id, cgi.sector_id
            );
        }

        Ok(DecodedLocation {
            station_id: cgi.station_id,
            sector_id: cgi.sector_id,
            tower_name: tower.as_ref().map(|t| t.name.clone()),
            lat: tower.as_ref().map(|t| t.lat),
            lon: tower.as_ref().map(|t| t.lon),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::services::tower_index::{Tower, TowerCache, TowerIndex};
    use std::time::Duration;

    #[test]
    fn decodes_vendor_sample_code() {
        let cgi = decode_cell_global_id("0x823708401b59370840000fc70e").unwrap();
        assert_eq!(cgi.eci, 0x000f_c70e);
        assert_eq!(cgi.eci, 1_033_742);
        assert_eq!(cgi.station_id, 4038);
        assert_eq!(cgi.sector_id, 14);
    }

    #[test]
    fn decodes_without_hex_prefix() {
        let cgi = decode_cell_global_id("823708401b593708400012290b").unwrap();
        assert_eq!(cgi.station_id, 0x0012290b >> 8);
        assert_eq!(cgi.sector_id, 0x0b);
    }

    #[test]
    fn decoding_is_deterministic() {
        let a = decode_cell_global_id("0x823708401b59370840000ff50c").unwrap();
        let b = decode_cell_global_id("0x823708401b59370840000ff50c").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn exactly_eight_hex_chars_decode() {
        let cgi = decode_cell_global_id("000fc70e").unwrap();
        assert_eq!(cgi.station_id, 4038);

        // With the prefix stripped the payload is still eight characters
        let prefixed = decode_cell_global_id("0x000fc70e").unwrap();
        assert_eq!(prefixed, cgi);
    }

    #[test]
    fn short_code_fails_without_panicking() {
        let result = decode_cell_global_id("0xfc70e");
        assert!(matches!(
            result,
            Err(LocationDecodeError::TooShort { .. })
        ));

        assert!(decode_cell_global_id("").is_err());
        assert!(decode_cell_global_id("0x").is_err());
    }

    #[test]
    fn non_hex_identifier_fails() {
        let result = decode_cell_global_id("0x82370840zz59zzzz");
        assert!(matches!(
            result,
            Err(LocationDecodeError::InvalidHex { .. })
        ));
    }

    #[test]
    fn multibyte_replacement_character_fails_without_panicking() {
        // Lossy decode of ISO-8859 bytes yields U+FFFD, which is three
        // bytes wide and must not trip the byte-indexed tail slice.
        let result = decode_cell_global_id("0xAB\u{FFFD}CDEF12");
        assert!(matches!(
            result,
            Err(LocationDecodeError::InvalidHex { .. })
        ));

        assert!(decode_cell_global_id("0x823708401b59370840000fc7\u{FFFD}e").is_err());
    }

    fn cache_with_tower() -> Arc<TowerCache> {
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
        Arc::new(TowerCache::from_index(index, Duration::from_secs(3600)))
    }

    #[test]
    fn lookup_hit_resolves_tower_fields() {
        let decoder = LocationDecoder::new(cache_with_tower());
        let location = decoder.decode("0x823708401b59370840000fc70e").unwrap();

        assert_eq!(location.station_id, 4038);
        assert_eq!(location.tower_name.as_deref(), Some("GEORGETOWN_EAST"));
        assert_eq!(location.lat, Some(6.8013));
    }

    #[test]
    fn lookup_miss_still_decodes() {
        let decoder = LocationDecoder::new(cache_with_tower());
        let location = decoder.decode("0x823708401b593708400012290b").unwrap();

        assert!(location.tower_name.is_none());
        assert!(location.lat.is_none());
        assert!(location.lon.is_none());
    }
}
