use thiserror::Error;

use crate::models::{DialOrientation, Meter, Reading};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("total reading {0} is negative")]
    NegativeTotal(String),
    #[error("duplicate capture at the same timestamp")]
    DuplicateCapture,
}

/// The four compass quadrants a dial needle can point into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Quadrant {
    Up,
    Right,
    Down,
    Left,
}

/// Applies the ordered rule pipeline of spec.md §4.5 to a freshly parsed
/// reading, in place, against the meter's previous accepted reading (if
/// any). Returns `Ok(())` when the reading is accepted (possibly carrying
/// warnings and a downgraded confidence), or an error when the reading must
/// be rejected outright.
pub fn validate(
    reading: &mut Reading,
    meter: &Meter,
    previous: Option<&Reading>,
) -> Result<(), ValidationError> {
    if let Some(previous) = previous {
        if reading.timestamp.timestamp() == previous.timestamp.timestamp() {
            return Err(ValidationError::DuplicateCapture);
        }
    }

    if reading.total < 0.0 {
        return Err(ValidationError::NegativeTotal(reading.total.to_string()));
    }

    if let Some(previous) = previous {
        let delta = reading.total - previous.total;
        if delta < 0.0 {
            reading.warnings.push("non_monotonic".to_string());
        }
        if delta.abs() > meter.max_change_per_reading {
            reading.warnings.push("change_cap_exceeded".to_string());
        }
    }

    check_dial_angle(reading);
    check_angle_direction_consistency(reading, meter);

    if !reading.warnings.is_empty() {
        reading.confidence = reading.confidence.downgrade();
    }

    Ok(())
}

fn check_dial_angle(reading: &mut Reading) {
    let Some(components) = reading.components.as_mut() else {
        return;
    };
    let Some(angle) = components.dial_angle_deg else {
        return;
    };

    if !(0.0..360.0).contains(&angle) {
        reading.warnings.push("angle_out_of_range".to_string());
        components.dial_angle_deg = Some(angle.rem_euclid(360.0));
    }
}

fn quadrant_for(orientation: DialOrientation, angle: f64) -> Quadrant {
    // Rotate the angle so that "up" (the zero reference) lines up with the
    // dial's physical zero-mark orientation, then bucket into quadrants.
    // 45deg exact boundaries resolve to the clockwise-next quadrant
    // (spec.md §8 boundary behavior).
    let zero_offset = match orientation {
        DialOrientation::Top => 0.0,
        DialOrientation::Right => 90.0,
        DialOrientation::Bottom => 180.0,
        DialOrientation::Left => 270.0,
    };
    let normalized = (angle - zero_offset).rem_euclid(360.0);

    if normalized < 45.0 {
        Quadrant::Up
    } else if normalized < 135.0 {
        Quadrant::Right
    } else if normalized < 225.0 {
        Quadrant::Down
    } else if normalized < 315.0 {
        Quadrant::Left
    } else {
        Quadrant::Up
    }
}

fn quadrant_tokens(quadrant: Quadrant) -> &'static [&'static str] {
    match quadrant {
        Quadrant::Up => &["up", "top"],
        Quadrant::Right => &["right"],
        Quadrant::Down => &["down", "bottom"],
        Quadrant::Left => &["left"],
    }
}

fn check_angle_direction_consistency(reading: &mut Reading, meter: &Meter) {
    let Some(orientation) = meter.dial_orientation else {
        return;
    };
    let Some(angle) = reading
        .components
        .as_ref()
        .and_then(|components| components.dial_angle_deg)
    else {
        return;
    };

    let notes_lower = reading.notes.to_lowercase();
    let mentioned: Vec<Quadrant> = [Quadrant::Up, Quadrant::Right, Quadrant::Down, Quadrant::Left]
        .into_iter()
        .filter(|quadrant| {
            quadrant_tokens(*quadrant)
                .iter()
                .any(|token| notes_lower.contains(token))
        })
        .collect();

    if mentioned.is_empty() {
        return;
    }

    let expected = quadrant_for(orientation, angle);
    if !mentioned.contains(&expected) {
        reading
            .warnings
            .push("angle_direction_mismatch".to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        AuthConfig, CameraConfig, Confidence, EndpointKind, MeterKind, MeterType,
        ReadingComponents, ReadingFormat, VisionConfig, VisionTarget,
    };
    use chrono::{TimeZone, Utc};

    fn dial_meter() -> Meter {
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
            max_change_per_reading: 5.0,
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
            dial_orientation: Some(DialOrientation::Top),
        }
    }

    fn reading_at(total: f64, angle: Option<f64>, notes: &str) -> Reading {
        Reading {
            meter_name: "water_main".to_string(),
            timestamp: Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap(),
            total,
            components: Some(ReadingComponents {
                digital_int: Some(total.floor() as i64),
                dial_fraction: Some(total.fract()),
                dial_angle_deg: angle,
            }),
            confidence: Confidence::High,
            confidence_numeric: None,
            vision_model: "gemini-2.5-flash".to_string(),
            vision_provider: "gemini".to_string(),
            prompt_profile: "detailed_water".to_string(),
            notes: notes.to_string(),
            warnings: vec![],
            snapshot_ref: "water_main_20260101T120000Z".to_string(),
            raw_response_ref: None,
            reprocessed_from: None,
            format: ReadingFormat::Detailed,
            schema_version: 1,
            ts_write_failed: false,
        }
    }

    #[test]
    fn accepts_clean_reading_with_no_warnings() {
        let meter = dial_meter();
        let mut reading = reading_at(100.0, Some(10.0), "clear image");
        validate(&mut reading, &meter, None).unwrap();
        assert!(reading.warnings.is_empty());
        assert_eq!(reading.confidence, Confidence::High);
    }

    #[test]
    fn rejects_negative_total() {
        let meter = dial_meter();
        let mut reading = reading_at(-1.0, Some(10.0), "");
        assert_eq!(
            validate(&mut reading, &meter, None),
            Err(ValidationError::NegativeTotal("-1".to_string()))
        );
    }

    #[test]
    fn rejects_duplicate_timestamp() {
        let meter = dial_meter();
        let previous = reading_at(100.0, Some(10.0), "");
        let mut reading = reading_at(100.2, Some(15.0), "");
        reading.timestamp = previous.timestamp;
        assert_eq!(
            validate(&mut reading, &meter, Some(&previous)),
            Err(ValidationError::DuplicateCapture)
        );
    }

    #[test]
    fn flags_change_cap_exceeded_and_downgrades_confidence() {
        let meter = dial_meter();
        let previous = reading_at(100.0, Some(10.0), "");
        let mut reading = reading_at(110.0, Some(10.0), "");
        reading.timestamp = previous.timestamp + chrono::Duration::seconds(60);
        validate(&mut reading, &meter, Some(&previous)).unwrap();
        assert!(reading.warnings.contains(&"change_cap_exceeded".to_string()));
        assert_eq!(reading.confidence, Confidence::Medium);
    }

    #[test]
    fn flags_non_monotonic_on_decrease() {
        let meter = dial_meter();
        let previous = reading_at(100.0, Some(10.0), "");
        let mut reading = reading_at(98.0, Some(10.0), "");
        reading.timestamp = previous.timestamp + chrono::Duration::seconds(60);
        validate(&mut reading, &meter, Some(&previous)).unwrap();
        assert!(reading.warnings.contains(&"non_monotonic".to_string()));
    }

    #[test]
    fn large_decrease_flags_both_non_monotonic_and_change_cap_exceeded() {
        let meter = dial_meter();
        let previous = reading_at(100.0, Some(10.0), "");
        let mut reading = reading_at(50.0, Some(10.0), "");
        reading.timestamp = previous.timestamp + chrono::Duration::seconds(60);
        validate(&mut reading, &meter, Some(&previous)).unwrap();
        assert!(reading.warnings.contains(&"non_monotonic".to_string()));
        assert!(reading.warnings.contains(&"change_cap_exceeded".to_string()));
    }

    #[test]
    fn snaps_out_of_range_angle_into_0_360() {
        let meter = dial_meter();
        let mut reading = reading_at(100.0, Some(370.0), "");
        validate(&mut reading, &meter, None).unwrap();
        assert!(reading.warnings.contains(&"angle_out_of_range".to_string()));
        assert_eq!(
            reading.components.as_ref().unwrap().dial_angle_deg,
            Some(10.0)
        );
    }

    #[test]
    fn flags_mismatch_between_notes_direction_and_angle_quadrant() {
        let meter = dial_meter();
        // top-oriented dial, 180deg points "down", but notes claim "up".
        let mut reading = reading_at(100.0, Some(180.0), "needle pointing up");
        validate(&mut reading, &meter, None).unwrap();
        assert!(reading
            .warnings
            .contains(&"angle_direction_mismatch".to_string()));
    }

    #[test]
    fn accepts_matching_notes_direction() {
        let meter = dial_meter();
        let mut reading = reading_at(100.0, Some(180.0), "needle pointing down");
        validate(&mut reading, &meter, None).unwrap();
        assert!(!reading
            .warnings
            .contains(&"angle_direction_mismatch".to_string()));
    }

    #[test]
    fn exact_45_degree_boundary_resolves_to_clockwise_quadrant() {
        assert_eq!(quadrant_for(DialOrientation::Top, 45.0), Quadrant::Right);
    }
}
