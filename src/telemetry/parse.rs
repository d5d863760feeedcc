//! Forgiving parsers for `mmcli -J` output.
//!
//! Field-level problems never fail a tick: a missing, non-numeric or
//! non-finite value simply becomes `None`. Only output that is empty or not
//! JSON at all is an error.

use serde_json::Value;

use crate::error::FetchError;

/// Modem fields from `mmcli -m <id> -J`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModemStatus {
    pub tech: Option<String>,
    pub signal: Option<f64>,
}

/// GPS fields from `mmcli -m <id> --location-get -J`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocationStatus {
    pub longitude: Option<f64>,
    pub latitude: Option<f64>,
    pub altitude: Option<f64>,
    pub speed: Option<f64>,
    pub satellites: Option<f64>,
    pub hdop: Option<f64>,
}

/// Parse a number out of text. Accepts a comma as decimal separator.
pub fn parse_number(text: &str) -> Option<f64> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    text.replacen(',', ".", 1)
        .parse::<f64>()
        .ok()
        .filter(|n| n.is_finite())
}

/// Parse a JSON number or numeric string.
pub fn number(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64().filter(|n| n.is_finite()),
        Value::String(s) => parse_number(s),
        _ => None,
    }
}

/// Field `index` of the first NMEA sentence starting with `prefix`.
pub fn nmea_field(sentences: &[&str], prefix: &str, index: usize) -> Option<f64> {
    sentences
        .iter()
        .find(|s| s.starts_with(prefix))
        .and_then(|s| s.split(',').nth(index))
        .and_then(parse_number)
}

fn document(text: &str) -> Result<Value, FetchError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(FetchError::Empty);
    }
    let value: Value = serde_json::from_str(text)?;
    if !value.is_object() {
        return Err(FetchError::Parse("expected a JSON object".to_string()));
    }
    Ok(value)
}

fn technology(value: Option<&Value>) -> Option<String> {
    let tech = match value? {
        Value::String(s) => s.trim().to_string(),
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(","),
        _ => return None,
    };
    if tech.is_empty() || tech == "--" {
        None
    } else {
        Some(tech)
    }
}

pub fn parse_modem_status(text: &str) -> Result<ModemStatus, FetchError> {
    let doc = document(text)?;
    let generic = doc.pointer("/modem/generic");

    Ok(ModemStatus {
        tech: technology(generic.and_then(|g| g.get("access-technologies"))),
        signal: number(generic.and_then(|g| g.pointer("/signal-quality/value"))),
    })
}

pub fn parse_location_status(text: &str) -> Result<LocationStatus, FetchError> {
    let doc = document(text)?;
    let gps = doc.pointer("/modem/location/gps");
    let field = |name: &str| number(gps.and_then(|g| g.get(name)));

    let sentences: Vec<&str> = gps
        .and_then(|g| g.get("nmea"))
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    Ok(LocationStatus {
        longitude: field("longitude"),
        latitude: field("latitude"),
        altitude: field("altitude"),
        speed: nmea_field(&sentences, "$GPVTG", 7),
        satellites: nmea_field(&sentences, "$GPGGA", 7),
        hdop: nmea_field(&sentences, "$GPGGA", 8),
    })
}
