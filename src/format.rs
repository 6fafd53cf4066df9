//! Turns a structured reverse-geocoding payload into a single display line.

use crate::geo::Coordinate;
use crate::geocode::AddressPayload;

/// First non-blank candidate, trimmed
fn first_of<'a>(candidates: &[&'a Option<String>]) -> Option<&'a str> {
    candidates
        .iter()
        .filter_map(|c| Option::as_deref(*c))
        .map(str::trim)
        .find(|s| !s.is_empty())
}

fn join_non_empty(parts: &[&str], separator: &str) -> String {
    parts
        .iter()
        .filter(|p| !p.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(separator)
}

/// Format a payload as `"<poi>, <house road>, <neighbourhood>, <city>, <state postcode>"`,
/// skipping whatever is missing. Falls back to the provider's own display name.
/// Returns `None` when nothing usable is present.
pub fn format_address(payload: &AddressPayload) -> Option<String> {
    let a = &payload.address;

    let poi = first_of(&[
        &payload.name,
        &a.public_building,
        &a.building,
        &a.amenity,
        &a.shop,
    ])
    .unwrap_or_default();
    let house = first_of(&[&a.house_number, &a.block]).unwrap_or_default();
    let road = first_of(&[
        &a.road,
        &a.residential,
        &a.pedestrian,
        &a.footway,
        &a.cycleway,
        &a.path,
    ])
    .unwrap_or_default();
    let neighbourhood = first_of(&[
        &a.neighbourhood,
        &a.suburb,
        &a.quarter,
        &a.hamlet,
        &a.estate,
    ])
    .unwrap_or_default();
    let city = first_of(&[&a.city, &a.town, &a.village, &a.city_district, &a.county])
        .unwrap_or_default();
    let state = first_of(&[&a.state]).unwrap_or_default();
    let postcode = first_of(&[&a.postcode]).unwrap_or_default();

    let street = join_non_empty(&[house, road], " ");
    let tail = join_non_empty(&[state, postcode], " ");
    let full = join_non_empty(&[poi, street.as_str(), neighbourhood, city, tail.as_str()], ", ");

    if !full.is_empty() {
        return Some(full);
    }

    first_of(&[&payload.display_name]).map(str::to_string)
}

/// Raw coordinate pair to six decimal places
pub fn format_coordinates(coordinate: Coordinate) -> String {
    format!("{:.6}, {:.6}", coordinate.lat, coordinate.lng)
}

/// Append the nearby-landmarks suffix when there is one
pub fn compose_with_nearby(base: &str, nearby: &str) -> String {
    if nearby.is_empty() {
        base.to_string()
    } else {
        format!("{base} • Nearby: {nearby}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geocode::AddressDetails;

    fn s(v: &str) -> Option<String> {
        Some(v.to_string())
    }

    #[test]
    fn test_full_address() {
        let payload = AddressPayload {
            name: s("Chhatrapati Shivaji Terminus"),
            address: AddressDetails {
                house_number: s("12"),
                road: s("Dadabhai Naoroji Road"),
                neighbourhood: s("Fort"),
                city: s("Mumbai"),
                state: s("Maharashtra"),
                postcode: s("400001"),
                ..Default::default()
            },
            ..Default::default()
        };

        assert_eq!(
            format_address(&payload).unwrap(),
            "Chhatrapati Shivaji Terminus, 12 Dadabhai Naoroji Road, Fort, Mumbai, Maharashtra 400001"
        );
    }

    #[test]
    fn test_fallback_fields() {
        let payload = AddressPayload {
            name: s("   "),
            address: AddressDetails {
                amenity: s("Ward Office"),
                block: s("B-4"),
                footway: s("Station Walk"),
                suburb: s("Andheri East"),
                town: s("Thane"),
                ..Default::default()
            },
            ..Default::default()
        };

        assert_eq!(
            format_address(&payload).unwrap(),
            "Ward Office, B-4 Station Walk, Andheri East, Thane"
        );
    }

    #[test]
    fn test_only_state_and_postcode() {
        let payload = AddressPayload {
            address: AddressDetails {
                postcode: s("560001"),
                ..Default::default()
            },
            ..Default::default()
        };
        assert_eq!(format_address(&payload).unwrap(), "560001");
    }

    #[test]
    fn test_display_name_fallback() {
        let payload = AddressPayload {
            display_name: s("Somewhere, India"),
            ..Default::default()
        };
        assert_eq!(format_address(&payload).unwrap(), "Somewhere, India");
    }

    #[test]
    fn test_empty_payload() {
        assert_eq!(format_address(&AddressPayload::default()), None);

        assert_eq!(
            format_coordinates(Coordinate::new(19.076, 72.8777)),
            "19.076000, 72.877700"
        );
    }

    #[test]
    fn test_compose_with_nearby() {
        assert_eq!(compose_with_nearby("Fort, Mumbai", ""), "Fort, Mumbai");
        assert_eq!(
            compose_with_nearby("Fort, Mumbai", "Kala Ghoda Cafe (40m)"),
            "Fort, Mumbai • Nearby: Kala Ghoda Cafe (40m)"
        );
    }
}
