/// Prompt profiles are named output-schema contracts (spec.md §4.3/§4.4):
/// the same profile must yield the same JSON schema no matter which
/// provider backs it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptSchema {
    Detailed,
    Simple,
}

pub fn schema_for_profile(profile: &str) -> Option<PromptSchema> {
    match profile {
        "detailed_water" | "gas_mechanical" => Some(PromptSchema::Detailed),
        "simple_water" | "electric_digital" => Some(PromptSchema::Simple),
        _ => None,
    }
}

pub fn prompt_text(profile: &str) -> Option<&'static str> {
    match profile {
        "detailed_water" => Some(
            "Read this water meter image. Report the digital odometer digits, the \
             partial (black/sub-dial) digit, the sweep dial reading as a fraction of \
             one revolution, and the sweep dial's needle angle in degrees (0 at the \
             dial's zero mark, increasing clockwise). Reply with JSON only: \
             {\"digital_reading\":int,\"black_digit\":int,\"dial_reading\":float,\
             \"dial_angle_degrees\":number,\"total_reading\":float,\
             \"confidence\":\"high\"|\"medium\"|\"low\",\"notes\":string}.",
        ),
        "gas_mechanical" => Some(
            "Read this gas meter image. Report the digital odometer digits, the \
             partial dial digit, the sweep dial reading as a fraction of one \
             revolution, and the sweep dial's needle angle in degrees. Reply with \
             JSON only: {\"digital_reading\":int,\"black_digit\":int,\
             \"dial_reading\":float,\"dial_angle_degrees\":number,\
             \"total_reading\":float,\"confidence\":\"high\"|\"medium\"|\"low\",\
             \"notes\":string}.",
        ),
        "simple_water" => Some(
            "Read this meter image and report the odometer value, the dial needle \
             value as a fraction, the needle angle in degrees, and the combined \
             total reading. Reply with JSON only: {\"odometer_value\":float,\
             \"dial_value\":float,\"total_reading\":float,\
             \"needle_angle_degrees\":number,\"confidence\":number(0..1),\
             \"notes\":string}.",
        ),
        "electric_digital" => Some(
            "Read this electric meter's digital display and report the odometer \
             value and the combined total reading. Reply with JSON only: \
             {\"odometer_value\":float,\"dial_value\":float,\"total_reading\":float,\
             \"needle_angle_degrees\":number,\"confidence\":number(0..1),\
             \"notes\":string}.",
        ),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_profile_across_providers_is_same_schema() {
        assert_eq!(
            schema_for_profile("detailed_water"),
            schema_for_profile("detailed_water")
        );
        assert_eq!(schema_for_profile("detailed_water"), Some(PromptSchema::Detailed));
        assert_eq!(schema_for_profile("simple_water"), Some(PromptSchema::Simple));
        assert_eq!(schema_for_profile("unknown_profile"), None);
    }
}
