//! Slash-command parsing.
//!
//! Commands are matched case-insensitively in a fixed priority order.
//! Text that matches no command routes to the assistant engine instead.

/// Usage text for malformed `/nearby_hazards` invocations.
pub const NEARBY_HAZARDS_USAGE: &str = "Invalid format. Use: /nearby_hazards <latitude> <longitude> [radius_in_km]\nExample: /nearby_hazards 39.7 -86.1 5 (radius is optional, defaults to 5km)";

/// Usage text for `/nearby_hazards` with non-numeric or non-positive args.
pub const NEARBY_HAZARDS_INVALID: &str = "Invalid latitude, longitude, or radius. Please provide valid numbers.\nExample: /nearby_hazards 39.7 -86.1 5";

/// Usage text for malformed `/alerts_near` invocations.
pub const ALERTS_NEAR_USAGE: &str = "Invalid format. Use: /alerts_near <latitude> <longitude> [radius_in_km]\nExample: /alerts_near 39.7 -86.1 5 (radius is optional, defaults to 5km)";

/// Usage text for `/alerts_near` with non-numeric or non-positive args.
pub const ALERTS_NEAR_INVALID: &str = "Invalid latitude, longitude, or radius. Please provide valid numbers.\nExample: /alerts_near 39.7 -86.1 5";

/// Usage text for malformed `/map` invocations.
pub const MAP_USAGE: &str =
    "Invalid coordinates for /map. Please use format: /map <latitude> <longitude>";

/// Default search radius for proximity commands, in kilometers.
pub const DEFAULT_RADIUS_KM: f64 = 5.0;

/// A parsed slash-command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Start the hazard-reporting flow.
    ReportHazard,
    /// Generate a map centered on the device's location.
    MapHere,
    /// Generate a map centered on explicit coordinates.
    Map {
        /// Center latitude.
        latitude: f64,
        /// Center longitude.
        longitude: f64,
    },
    /// List recent reports, optionally for one category.
    ListHazards {
        /// Raw category text as typed, if any. Validated by the caller.
        category: Option<String>,
    },
    /// List reports within a radius of a point.
    NearbyHazards {
        /// Query latitude.
        latitude: f64,
        /// Query longitude.
        longitude: f64,
        /// Search radius in kilometers, always > 0.
        radius_km: f64,
    },
    /// List alerts within a radius of a point.
    AlertsNear {
        /// Query latitude.
        latitude: f64,
        /// Query longitude.
        longitude: f64,
        /// Search radius in kilometers, always > 0.
        radius_km: f64,
    },
    /// Write a synthetic critical alert.
    CreateMockAlert,
    /// List the current session's recent reports.
    MyRecentReports,
    /// Clear the transcript and all flow state.
    ResetChat,
    /// Abort the active flow.
    Cancel,
    /// A recognized command with malformed arguments.
    Invalid {
        /// The literal usage message to show.
        message: String,
    },
}

/// Parses a point-plus-optional-radius argument list.
fn parse_point_radius(
    args: &[&str],
    usage: &str,
    invalid: &str,
    build: impl FnOnce(f64, f64, f64) -> Command,
) -> Command {
    if args.len() < 2 || args.len() > 3 {
        return Command::Invalid {
            message: usage.to_string(),
        };
    }

    let latitude = args[0].parse::<f64>();
    let longitude = args[1].parse::<f64>();
    let radius_km = args
        .get(2)
        .map_or(Ok(DEFAULT_RADIUS_KM), |raw| raw.parse::<f64>());

    match (latitude, longitude, radius_km) {
        (Ok(latitude), Ok(longitude), Ok(radius_km)) if radius_km > 0.0 => {
            build(latitude, longitude, radius_km)
        }
        _ => Command::Invalid {
            message: invalid.to_string(),
        },
    }
}

/// Parses `input` as a slash-command.
///
/// Returns `None` for anything that should route to the assistant engine.
#[must_use]
pub fn parse(input: &str) -> Option<Command> {
    let trimmed = input.trim();
    let lowered = trimmed.to_lowercase();
    let parts: Vec<&str> = trimmed.split_whitespace().collect();

    if lowered == "/cancel" {
        return Some(Command::Cancel);
    }

    if lowered.starts_with("/report hazard") {
        return Some(Command::ReportHazard);
    }

    if parts.first().is_some_and(|p| p.eq_ignore_ascii_case("/map")) {
        return Some(match parts.as_slice() {
            [_] => Command::MapHere,
            [_, lat, lon] => match (lat.parse::<f64>(), lon.parse::<f64>()) {
                (Ok(latitude), Ok(longitude)) => Command::Map {
                    latitude,
                    longitude,
                },
                _ => Command::Invalid {
                    message: MAP_USAGE.to_string(),
                },
            },
            _ => Command::Invalid {
                message: MAP_USAGE.to_string(),
            },
        });
    }

    if lowered.starts_with("/list_hazards") {
        let category = trimmed
            .split_whitespace()
            .skip(1)
            .collect::<Vec<_>>()
            .join(" ");
        return Some(Command::ListHazards {
            category: if category.is_empty() {
                None
            } else {
                Some(category)
            },
        });
    }

    if lowered.starts_with("/nearby_hazards") {
        return Some(parse_point_radius(
            &parts[1..],
            NEARBY_HAZARDS_USAGE,
            NEARBY_HAZARDS_INVALID,
            |latitude, longitude, radius_km| Command::NearbyHazards {
                latitude,
                longitude,
                radius_km,
            },
        ));
    }

    if lowered.starts_with("/alerts_near") {
        return Some(parse_point_radius(
            &parts[1..],
            ALERTS_NEAR_USAGE,
            ALERTS_NEAR_INVALID,
            |latitude, longitude, radius_km| Command::AlertsNear {
                latitude,
                longitude,
                radius_km,
            },
        ));
    }

    match lowered.as_str() {
        "/create_mock_alert" => Some(Command::CreateMockAlert),
        "/my_recent_reports" => Some(Command::MyRecentReports),
        "/reset_chat" => Some(Command::ResetChat),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_match_case_insensitively() {
        assert_eq!(parse("/CANCEL"), Some(Command::Cancel));
        assert_eq!(parse("/Report Hazard"), Some(Command::ReportHazard));
        assert_eq!(parse("/RESET_CHAT"), Some(Command::ResetChat));
    }

    #[test]
    fn free_text_is_not_a_command() {
        assert_eq!(parse("is there a fire nearby?"), None);
        assert_eq!(parse("/unknown_command"), None);
    }

    #[test]
    fn map_with_no_args_requests_geolocation() {
        assert_eq!(parse("/map"), Some(Command::MapHere));
    }

    #[test]
    fn map_with_two_numeric_args_is_direct() {
        assert_eq!(
            parse("/map 39.7684 -86.1581"),
            Some(Command::Map {
                latitude: 39.7684,
                longitude: -86.1581,
            })
        );
    }

    #[test]
    fn map_with_bad_args_is_a_format_error() {
        assert_eq!(
            parse("/map here please"),
            Some(Command::Invalid {
                message: MAP_USAGE.to_string(),
            })
        );
        assert_eq!(
            parse("/map 39.7"),
            Some(Command::Invalid {
                message: MAP_USAGE.to_string(),
            })
        );
    }

    #[test]
    fn list_hazards_preserves_category_case() {
        assert_eq!(
            parse("/list_hazards Road Hazard"),
            Some(Command::ListHazards {
                category: Some("Road Hazard".to_string()),
            })
        );
        assert_eq!(
            parse("/list_hazards"),
            Some(Command::ListHazards { category: None })
        );
    }

    #[test]
    fn nearby_hazards_defaults_radius_to_five() {
        assert_eq!(
            parse("/nearby_hazards 39.7 -86.1"),
            Some(Command::NearbyHazards {
                latitude: 39.7,
                longitude: -86.1,
                radius_km: 5.0,
            })
        );
    }

    #[test]
    fn nearby_hazards_rejects_zero_radius() {
        assert_eq!(
            parse("/nearby_hazards 39.7 -86.1 0"),
            Some(Command::Invalid {
                message: NEARBY_HAZARDS_INVALID.to_string(),
            })
        );
    }

    #[test]
    fn nearby_hazards_rejects_wrong_arity() {
        assert_eq!(
            parse("/nearby_hazards 39.7"),
            Some(Command::Invalid {
                message: NEARBY_HAZARDS_USAGE.to_string(),
            })
        );
        assert_eq!(
            parse("/nearby_hazards 1 2 3 4"),
            Some(Command::Invalid {
                message: NEARBY_HAZARDS_USAGE.to_string(),
            })
        );
    }

    #[test]
    fn alerts_near_parses_explicit_radius() {
        assert_eq!(
            parse("/alerts_near 39.7 -86.1 2.5"),
            Some(Command::AlertsNear {
                latitude: 39.7,
                longitude: -86.1,
                radius_km: 2.5,
            })
        );
    }

    #[test]
    fn alerts_near_rejects_non_numeric_args() {
        assert_eq!(
            parse("/alerts_near north south"),
            Some(Command::Invalid {
                message: ALERTS_NEAR_INVALID.to_string(),
            })
        );
    }
}
