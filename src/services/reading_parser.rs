use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::models::{Confidence, Meter, MeterKind, ReadingComponents, ReadingFormat};
use crate::services::vision::prompt_profiles::{schema_for_profile, PromptSchema};

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid json after comment stripping: {0}")]
    InvalidJson(String),
    #[error("missing or unparseable confidence field")]
    MissingConfidence,
    #[error("unparseable numeric field: {0}")]
    UnparseableNumeric(String),
    #[error("response matched neither the detailed nor the simple schema")]
    UnrecognizedSchema,
}

#[derive(Debug, Clone)]
pub struct ParsedReading {
    pub total: f64,
    pub components: Option<ReadingComponents>,
    pub confidence: Confidence,
    pub confidence_numeric: Option<f64>,
    pub notes: String,
    pub format: ReadingFormat,
}

/// Strips `//` line comments and `/* */` block comments outside of JSON
/// string literals — some vision models emit them even though they were
/// told to reply with JSON only (spec.md §4.4, §9).
pub fn strip_comments(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    let mut in_string = false;
    let mut escaped = false;

    while let Some(ch) = chars.next() {
        if in_string {
            out.push(ch);
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }

        match ch {
            '"' => {
                in_string = true;
                out.push(ch);
            }
            '/' if chars.peek() == Some(&'/') => {
                chars.next();
                for c in chars.by_ref() {
                    if c == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = None;
                for c in chars.by_ref() {
                    if prev == Some('*') && c == '/' {
                        break;
                    }
                    prev = Some(c);
                }
            }
            _ => out.push(ch),
        }
    }

    out
}

fn coerce_f64(value: &JsonValue) -> Option<f64> {
    match value {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn coerce_i64(value: &JsonValue) -> Option<i64> {
    match value {
        JsonValue::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.floor() as i64)),
        JsonValue::String(s) => s
            .trim()
            .parse::<f64>()
            .ok()
            .map(|f| f.floor() as i64),
        _ => None,
    }
}

fn parse_confidence_categorical(value: &JsonValue) -> Result<Confidence, ParseError> {
    match value.as_str() {
        Some("high") => Ok(Confidence::High),
        Some("medium") => Ok(Confidence::Medium),
        Some("low") => Ok(Confidence::Low),
        _ => Err(ParseError::MissingConfidence),
    }
}

fn parse_detailed(value: &JsonValue, meter: &Meter) -> Result<ParsedReading, ParseError> {
    let digital_int = value
        .get("digital_reading")
        .and_then(coerce_i64)
        .ok_or_else(|| ParseError::UnparseableNumeric("digital_reading".to_string()))?;
    let dial_fraction = value.get("dial_reading").and_then(coerce_f64);
    let dial_angle_deg = value.get("dial_angle_degrees").and_then(coerce_f64);
    let confidence = value
        .get("confidence")
        .ok_or(ParseError::MissingConfidence)
        .and_then(parse_confidence_categorical)?;
    let notes = value
        .get("notes")
        .and_then(JsonValue::as_str)
        .unwrap_or_default()
        .to_string();

    let total = match value.get("total_reading").and_then(coerce_f64) {
        Some(total) => total,
        None => compute_total(meter, digital_int, dial_fraction)?,
    };

    Ok(ParsedReading {
        total,
        components: Some(ReadingComponents {
            digital_int: Some(digital_int),
            dial_fraction,
            dial_angle_deg,
        }),
        confidence,
        confidence_numeric: None,
        notes,
        format: ReadingFormat::Detailed,
    })
}

fn parse_simple(value: &JsonValue, meter: &Meter) -> Result<ParsedReading, ParseError> {
    let odometer_value = value
        .get("odometer_value")
        .and_then(coerce_f64)
        .ok_or_else(|| ParseError::UnparseableNumeric("odometer_value".to_string()))?;
    let dial_value = value.get("dial_value").and_then(coerce_f64);
    let needle_angle_degrees = value.get("needle_angle_degrees").and_then(coerce_f64);
    let confidence_numeric = value
        .get("confidence")
        .and_then(coerce_f64)
        .ok_or(ParseError::MissingConfidence)?;
    let notes = value
        .get("notes")
        .and_then(JsonValue::as_str)
        .unwrap_or_default()
        .to_string();

    let digital_int = odometer_value.floor() as i64;
    let total = match value.get("total_reading").and_then(coerce_f64) {
        Some(total) => total,
        None => compute_total(meter, digital_int, dial_value)?,
    };

    Ok(ParsedReading {
        total,
        components: Some(ReadingComponents {
            digital_int: Some(digital_int),
            dial_fraction: dial_value,
            dial_angle_deg: needle_angle_degrees,
        }),
        confidence: Confidence::from_numeric(confidence_numeric),
        confidence_numeric: Some(confidence_numeric),
        notes,
        format: ReadingFormat::Simple,
    })
}

fn compute_total(meter: &Meter, digital_int: i64, dial_fraction: Option<f64>) -> Result<f64, ParseError> {
    match meter.meter_kind {
        MeterKind::DigitalPlusDial => {
            let fraction = dial_fraction
                .ok_or_else(|| ParseError::UnparseableNumeric("dial_reading".to_string()))?;
            Ok(digital_int as f64 + fraction)
        }
        MeterKind::DigitalOnly => Ok(digital_int as f64),
    }
}

/// Parses a provider's raw JSON text into a canonical reading. The prompt
/// profile names which of the two schemas (spec.md §4.4) the model was
/// asked for; an unrecognized profile falls back to detecting the schema
/// from the fields actually present, since a misconfigured profile name
/// shouldn't strand an otherwise-parseable response.
pub fn parse(json_text: &str, meter: &Meter, prompt_profile: &str) -> Result<ParsedReading, ParseError> {
    let cleaned = strip_comments(json_text);
    let value: JsonValue =
        serde_json::from_str(cleaned.trim()).map_err(|err| ParseError::InvalidJson(err.to_string()))?;

    match schema_for_profile(prompt_profile) {
        Some(PromptSchema::Detailed) => parse_detailed(&value, meter),
        Some(PromptSchema::Simple) => parse_simple(&value, meter),
        None if value.get("digital_reading").is_some() => parse_detailed(&value, meter),
        None if value.get("odometer_value").is_some() => parse_simple(&value, meter),
        None => Err(ParseError::UnrecognizedSchema),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        AuthConfig, CameraConfig, EndpointKind, MeterType, VisionConfig, VisionTarget,
    };

    fn water_meter() -> Meter {
        Meter {
            name: "water_main".to_string(),
            meter_type: MeterType::Water,
            unit: "m³".to_string(),
            location: String::new(),
            enabled: true,
            camera: CameraConfig {
                endpoint_url: "http://cam.local/still.jpg".to_string(),
                endpoint_kind: EndpointKind::Still,
                auth: AuthConfig::None,
                timeout_ms: 5000,
                rotation_deg: 0,
            },
            reading_interval_seconds: 60,
            max_change_per_reading: 10.0,
            vision: VisionConfig {
                primary: VisionTarget {
                    provider: "gemini".to_string(),
                    model: "gemini-2.5-flash".to_string(),
                    prompt_profile: "detailed_water".to_string(),
                },
                fallbacks: vec![],
            },
            meter_kind: MeterKind::DigitalPlusDial,
            dial_full_revolution_units: Some(0.10),
            dial_orientation: Some(crate::models::DialOrientation::Top),
        }
    }

    #[test]
    fn strips_line_and_block_comments() {
        let input = "{\n  // leading comment\n  \"a\": 1, /* inline */ \"b\": 2\n}";
        let cleaned = strip_comments(input);
        let value: JsonValue = serde_json::from_str(&cleaned).expect("valid json");
        assert_eq!(value["a"], 1);
        assert_eq!(value["b"], 2);
    }

    #[test]
    fn comment_stripping_ignores_slashes_inside_strings() {
        let input = "{\"notes\": \"reads 12/07 fine\"}";
        let cleaned = strip_comments(input);
        let value: JsonValue = serde_json::from_str(&cleaned).expect("valid json");
        assert_eq!(value["notes"], "reads 12/07 fine");
    }

    #[test]
    fn parses_detailed_schema_from_spec_example() {
        let json = r#"{"digital_reading":2271,"black_digit":3,"dial_reading":0.07,"dial_angle_degrees":252,"total_reading":2271.37,"confidence":"high","notes":"clear image"}"#;
        let parsed = parse(json, &water_meter(), "detailed_water").expect("parsed");
        assert_eq!(parsed.total, 2271.37);
        assert_eq!(parsed.confidence, Confidence::High);
        assert_eq!(parsed.format, ReadingFormat::Detailed);
    }

    #[test]
    fn computes_total_from_components_when_missing() {
        let json = r#"{"digital_reading":100,"dial_reading":0.25,"dial_angle_degrees":90,"confidence":"medium","notes":""}"#;
        let parsed = parse(json, &water_meter(), "detailed_water").expect("parsed");
        assert_eq!(parsed.total, 100.25);
    }

    #[test]
    fn parses_simple_schema_with_numeric_confidence() {
        let json = r#"{"odometer_value":2271,"dial_value":0.37,"total_reading":2271.37,"needle_angle_degrees":252,"confidence":0.92,"notes":""}"#;
        let parsed = parse(json, &water_meter(), "simple_water").expect("parsed");
        assert_eq!(parsed.confidence, Confidence::High);
        assert_eq!(parsed.confidence_numeric, Some(0.92));
        assert_eq!(parsed.format, ReadingFormat::Simple);
    }

    #[test]
    fn coerces_numeric_strings() {
        let json = r#"{"digital_reading":"2271","dial_reading":"0.37","dial_angle_degrees":"252","total_reading":"2271.37","confidence":"high","notes":""}"#;
        let parsed = parse(json, &water_meter(), "detailed_water").expect("parsed");
        assert_eq!(parsed.total, 2271.37);
    }

    #[test]
    fn fails_on_missing_confidence() {
        let json = r#"{"digital_reading":100,"dial_reading":0.1,"total_reading":100.1,"notes":""}"#;
        assert!(matches!(
            parse(json, &water_meter(), "detailed_water"),
            Err(ParseError::MissingConfidence)
        ));
    }

    #[test]
    fn fails_on_unrecognized_schema() {
        let json = r#"{"foo": 1}"#;
        assert!(matches!(
            parse(json, &water_meter(), "unknown_profile"),
            Err(ParseError::UnrecognizedSchema)
        ));
    }

    #[test]
    fn prompt_profile_selects_schema_ahead_of_field_sniffing() {
        // Tagged "simple_water", but shaped like the detailed schema: the
        // profile decides, so this must fail to find `odometer_value`
        // rather than silently matching the detailed parser.
        let json = r#"{"digital_reading":100,"dial_reading":0.1,"dial_angle_degrees":10,"total_reading":100.1,"confidence":"high","notes":""}"#;
        assert!(matches!(
            parse(json, &water_meter(), "simple_water"),
            Err(ParseError::UnparseableNumeric(field)) if field == "odometer_value"
        ));
    }

    #[test]
    fn unknown_profile_falls_back_to_field_detection() {
        let json = r#"{"digital_reading":2271,"dial_reading":0.07,"dial_angle_degrees":252,"total_reading":2271.37,"confidence":"high","notes":""}"#;
        let parsed = parse(json, &water_meter(), "no_such_profile").expect("parsed via fallback");
        assert_eq!(parsed.format, ReadingFormat::Detailed);
    }
}
