//! Payload codec
//!
//! Clients send the UTF-8 text `"<client_name>, <latitude>, <longitude>"`
//! encoded as hexadecimal byte pairs.

use crate::{errors::IngestError, models::GpsRecord};

/// Decode hexadecimal byte pairs into UTF-8 text.
pub fn decode(hex_text: &str) -> Result<String, IngestError> {
    let bytes = hex::decode(hex_text).map_err(|e| IngestError::Decode(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| IngestError::Decode(e.to_string()))
}

/// Encode text as lowercase hexadecimal byte pairs.
pub fn encode(text: &str) -> String {
    hex::encode(text.as_bytes())
}

/// Split decoded text into a GPS record, trimming whitespace around each field.
pub fn parse_fields(text: &str) -> Result<GpsRecord, IngestError> {
    let fields: Vec<&str> = text.split(',').map(str::trim).collect();

    match fields.as_slice() {
        [client_name, latitude, longitude] => {
            Ok(GpsRecord::new(*client_name, *latitude, *longitude))
        }
        _ => Err(IngestError::Parse {
            found: fields.len(),
        }),
    }
}

/// Decode and parse a payload in one step.
pub fn decode_record(hex_text: &str) -> Result<GpsRecord, IngestError> {
    parse_fields(&decode(hex_text)?)
}
