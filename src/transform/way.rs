//! Built-in way policy: which ways are routable and what normalized
//! attributes they carry.

use crate::model::{RoadClass, Use};

use super::{get, Tags};

/// Per-highway-type defaults: class, speed (kph) and default mode access.
struct HighwayDefaults {
    class: RoadClass,
    speed_kph: f32,
    auto: bool,
    bike: bool,
    foot: bool,
    use_kind: Use,
}

fn highway_defaults(highway: &str) -> Option<HighwayDefaults> {
    let d = |class, speed_kph, auto, bike, foot, use_kind| HighwayDefaults {
        class,
        speed_kph,
        auto,
        bike,
        foot,
        use_kind,
    };

    Some(match highway {
        "motorway" => d(RoadClass::Motorway, 105.0, true, false, false, Use::None),
        "motorway_link" => d(RoadClass::Motorway, 70.0, true, false, false, Use::None),
        "trunk" => d(RoadClass::Trunk, 90.0, true, false, false, Use::None),
        "trunk_link" => d(RoadClass::Trunk, 60.0, true, false, false, Use::None),
        "primary" => d(RoadClass::Primary, 65.0, true, true, true, Use::None),
        "primary_link" => d(RoadClass::Primary, 40.0, true, true, true, Use::None),
        "secondary" | "secondary_link" | "tertiary" | "tertiary_link" | "unclassified" => d(
            RoadClass::TertiaryUnclassified,
            50.0,
            true,
            true,
            true,
            Use::None,
        ),
        "residential" => d(RoadClass::Residential, 40.0, true, true, true, Use::None),
        "living_street" => d(RoadClass::Residential, 10.0, true, true, true, Use::None),
        "service" => d(RoadClass::Service, 20.0, true, true, true, Use::None),
        "track" => d(RoadClass::Track, 15.0, false, true, true, Use::None),
        "cycleway" => d(RoadClass::Other, 18.0, false, true, true, Use::Cycleway),
        "footway" | "path" | "pedestrian" => d(RoadClass::Other, 5.0, false, false, true, Use::None),
        "steps" => d(RoadClass::Other, 3.0, false, false, true, Use::Steps),
        _ => return None,
    })
}

fn service_use(service: &str) -> Use {
    match service {
        "parking_aisle" => Use::ParkingAisle,
        "driveway" => Use::Driveway,
        "alley" => Use::Alley,
        "emergency_access" => Use::EmergencyAccess,
        "drive-through" | "drive_through" => Use::DriveThru,
        _ => Use::Other,
    }
}

fn denied(value: Option<&str>) -> bool {
    matches!(value, Some("no") | Some("none"))
}

fn unpaved(surface: &str) -> bool {
    matches!(
        surface,
        "unpaved" | "gravel" | "fine_gravel" | "dirt" | "earth" | "ground" | "grass" | "sand"
            | "mud"
    )
}

/// Parse a maxspeed value; handles bare kph numbers and the `NN mph` form.
fn parse_speed(value: &str) -> Option<f32> {
    if let Some(mph) = value.strip_suffix("mph") {
        return mph.trim().parse::<f32>().ok().map(|v| v * 1.609_344);
    }
    value.trim().parse::<f32>().ok()
}

fn push(out: &mut Tags, key: &str, value: impl ToString) {
    out.push((key.to_string(), value.to_string()));
}

fn push_flag(out: &mut Tags, key: &str, set: bool) {
    push(out, key, if set { "true" } else { "false" });
}

/// Normalize a raw way tag set. An empty result means the way is not
/// routable.
pub fn transform(tags: &Tags) -> Tags {
    let mut out = Tags::new();

    let highway = get(tags, "highway");
    let is_ferry = get(tags, "route") == Some("ferry");
    let is_rail_ferry = get(tags, "route") == Some("shuttle_train");

    let defaults = match highway.and_then(highway_defaults) {
        Some(d) => d,
        None if is_ferry || is_rail_ferry => HighwayDefaults {
            class: RoadClass::Other,
            speed_kph: 20.0,
            auto: true,
            bike: true,
            foot: true,
            use_kind: Use::None,
        },
        None => return out,
    };

    // Blanket denials drop the way entirely.
    if denied(get(tags, "access"))
        || denied(get(tags, "motor_vehicle")) && !defaults.bike && !defaults.foot
    {
        return out;
    }

    let auto = defaults.auto && !denied(get(tags, "motor_vehicle")) && !denied(get(tags, "vehicle"));
    let mut bike = defaults.bike && !denied(get(tags, "bicycle")) && !denied(get(tags, "vehicle"));
    let foot = defaults.foot && !denied(get(tags, "foot"));
    if get(tags, "bicycle") == Some("yes") {
        bike = true;
    }
    if !auto && !bike && !foot {
        return out;
    }

    let mut use_kind = defaults.use_kind;
    if highway == Some("service") {
        if let Some(service) = get(tags, "service") {
            use_kind = service_use(service);
        }
    }

    // Orientation. A reverse oneway flips which side carries access.
    let oneway_tag = get(tags, "oneway");
    let roundabout = get(tags, "junction") == Some("roundabout");
    let mut oneway = matches!(oneway_tag, Some("yes") | Some("1") | Some("true")) || roundabout;
    let reversed = matches!(oneway_tag, Some("-1") | Some("reverse"));
    if matches!(highway, Some("motorway") | Some("motorway_link"))
        && oneway_tag != Some("no")
        && !reversed
    {
        oneway = true;
    }

    let (auto_forward, auto_backward) = if oneway {
        (auto, false)
    } else if reversed {
        (false, auto)
    } else {
        (auto, auto)
    };
    let (bike_forward, bike_backward) = if oneway {
        (bike, false)
    } else if reversed {
        (false, bike)
    } else {
        (bike, bike)
    };

    push(&mut out, "road_class", defaults.class as u8);
    push(&mut out, "use", use_kind as u8);
    push_flag(&mut out, "auto_forward", auto_forward);
    push_flag(&mut out, "auto_backward", auto_backward);
    push_flag(&mut out, "bike_forward", bike_forward);
    push_flag(&mut out, "bike_backward", bike_backward);
    push_flag(&mut out, "pedestrian", foot);
    push_flag(&mut out, "oneway", oneway || reversed);

    if roundabout {
        push_flag(&mut out, "roundabout", true);
    }
    if highway.map_or(false, |h| h.ends_with("_link")) {
        push_flag(&mut out, "link", true);
    }
    if is_ferry {
        push_flag(&mut out, "ferry", true);
    }
    if is_rail_ferry {
        push_flag(&mut out, "rail", true);
    }
    if matches!(get(tags, "tunnel"), Some("yes") | Some("true")) {
        push_flag(&mut out, "tunnel", true);
    }
    if matches!(get(tags, "bridge"), Some("yes") | Some("true")) {
        push_flag(&mut out, "bridge", true);
    }
    if matches!(get(tags, "toll"), Some("yes") | Some("true")) {
        push_flag(&mut out, "toll", true);
    }
    if get(tags, "surface").map_or(false, unpaved) {
        push_flag(&mut out, "surface", true);
    }
    if matches!(get(tags, "access"), Some("private") | Some("destination")) {
        push_flag(&mut out, "private", true);
    }
    if matches!(get(tags, "motor_vehicle"), Some("destination")) {
        push_flag(&mut out, "no_thru_traffic", true);
    }

    let speed = get(tags, "maxspeed")
        .and_then(parse_speed)
        .unwrap_or(defaults.speed_kph);
    push(&mut out, "speed", speed);

    if let Some(lanes) = get(tags, "lanes").and_then(|v| v.parse::<u8>().ok()) {
        push(&mut out, "lanes", lanes);
    }

    // Bike network membership (mask bits: national 1, regional 2, local 4).
    let mut network_mask = 0u8;
    for (tag, bit, ref_key) in [
        ("ncn", 1u8, "ncn_ref"),
        ("rcn", 2, "rcn_ref"),
        ("lcn", 4, "lcn_ref"),
    ] {
        if get(tags, tag) == Some("yes") {
            network_mask |= bit;
        }
        if let Some(r) = get(tags, ref_key) {
            network_mask |= bit;
            let out_key = match bit {
                1 => "bike_national_ref",
                2 => "bike_regional_ref",
                _ => "bike_local_ref",
            };
            push(&mut out, out_key, r);
        }
    }
    if network_mask != 0 {
        push(&mut out, "bike_network_mask", network_mask);
    }

    // Names and references pass through verbatim.
    for key in [
        "name",
        "name:en",
        "alt_name",
        "official_name",
        "ref",
        "int_ref",
        "destination",
        "destination:ref",
        "destination:ref:to",
        "junction_ref",
    ] {
        if let Some(v) = get(tags, key) {
            if !v.is_empty() {
                push(&mut out, key, v);
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(pairs: &[(&str, &str)]) -> Tags {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn value<'a>(out: &'a Tags, key: &str) -> Option<&'a str> {
        get(out, key)
    }

    #[test]
    fn test_residential_defaults() {
        let out = transform(&tags(&[("highway", "residential"), ("name", "Elm St")]));
        assert_eq!(value(&out, "road_class"), Some("4"));
        assert_eq!(value(&out, "auto_forward"), Some("true"));
        assert_eq!(value(&out, "auto_backward"), Some("true"));
        assert_eq!(value(&out, "pedestrian"), Some("true"));
        assert_eq!(value(&out, "oneway"), Some("false"));
        assert_eq!(value(&out, "name"), Some("Elm St"));
    }

    #[test]
    fn test_non_road_is_dropped() {
        assert!(transform(&tags(&[("building", "yes")])).is_empty());
        assert!(transform(&tags(&[("highway", "proposed")])).is_empty());
    }

    #[test]
    fn test_access_no_is_dropped() {
        let out = transform(&tags(&[("highway", "residential"), ("access", "no")]));
        assert!(out.is_empty());
    }

    #[test]
    fn test_oneway_clears_backward_access() {
        let out = transform(&tags(&[("highway", "residential"), ("oneway", "yes")]));
        assert_eq!(value(&out, "oneway"), Some("true"));
        assert_eq!(value(&out, "auto_forward"), Some("true"));
        assert_eq!(value(&out, "auto_backward"), Some("false"));
        // Pedestrians ignore oneway.
        assert_eq!(value(&out, "pedestrian"), Some("true"));
    }

    #[test]
    fn test_motorway_is_oneway_by_default() {
        let out = transform(&tags(&[("highway", "motorway")]));
        assert_eq!(value(&out, "oneway"), Some("true"));
        assert_eq!(value(&out, "road_class"), Some("0"));
        assert_eq!(value(&out, "pedestrian"), Some("false"));
    }

    #[test]
    fn test_parking_aisle_use() {
        let out = transform(&tags(&[("highway", "service"), ("service", "parking_aisle")]));
        assert_eq!(value(&out, "use"), Some("2"));
    }

    #[test]
    fn test_mph_speed_is_converted() {
        let out = transform(&tags(&[("highway", "primary"), ("maxspeed", "30 mph")]));
        let kph: f32 = value(&out, "speed").unwrap().parse().unwrap();
        assert!((kph - 48.28).abs() < 0.1, "got {}", kph);
    }

    #[test]
    fn test_ferry_route_without_highway() {
        let out = transform(&tags(&[("route", "ferry"), ("name", "Harbor Ferry")]));
        assert_eq!(value(&out, "ferry"), Some("true"));
        assert_eq!(value(&out, "auto_forward"), Some("true"));
    }

    #[test]
    fn test_unpaved_surface() {
        let out = transform(&tags(&[("highway", "track"), ("surface", "gravel")]));
        assert_eq!(value(&out, "surface"), Some("true"));
    }
}
