/*!
The schedule-side data model: `Stop`, `StopTime` and `Trip`. These are
plain records handed in by the (external) schedule reader — this crate
never parses a GTFS feed itself, it only consumes these typed values,
already built elsewhere by a GTFS loader.
*/

use geo::Point;

use crate::graph::Mode;

/// A scheduled stop, as handed in by the schedule reader.
#[derive(Debug, Clone, PartialEq)]
pub struct Stop {
    pub id: String,
    pub name: String,
    pub platform_code: Option<String>,
    pub lat: f64,
    pub lng: f64,
    pub parent_station: Option<String>,
}

impl Stop {
    #[must_use]
    pub fn point(&self) -> Point<f64> {
        Point::new(self.lng, self.lat)
    }
}

/// One stop visit within a trip, with its planned offsets from midnight.
#[derive(Debug, Clone, PartialEq)]
pub struct StopTime {
    pub stop: Stop,
    pub arrival_offset: u32,
    pub departure_offset: u32,
}

/// Direction of travel, as encoded by GTFS `direction_id`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Direction {
    Outbound,
    Inbound,
}

/// An ordered sequence of stops the builder matches to the road network.
#[derive(Debug, Clone, PartialEq)]
pub struct Trip {
    pub id: String,
    pub service_id: String,
    pub block_id: Option<String>,
    pub shape_id: Option<String>,
    pub headsign: Option<String>,
    pub short_name: Option<String>,
    pub route_id: String,
    pub route_mode: Mode,
    pub direction: Direction,
    pub stop_times: Vec<StopTime>,
}

impl Trip {
    /// The canonical cache-identity string: trip id,
    /// service id, block id, shape id, headsign, route id, route mode,
    /// direction, and the ordered (stopId, platformCode) list — falling
    /// back to (lat, lng, name) per stop when `stopId` is absent.
    ///
    /// Since `trip.id` alone is already unique, this string is unique
    /// per-trip too; it identifies exactly the one trip it was built
    /// from, which is what the on-disk trip cache needs as a key.
    #[must_use]
    pub fn cache_identity(&self) -> String {
        let mut out = String::new();
        out.push_str(&self.id);
        out.push('\u{1f}');
        out.push_str(&self.service_id);
        out.push('\u{1f}');
        out.push_str(self.block_id.as_deref().unwrap_or(""));
        out.push('\u{1f}');
        out.push_str(self.shape_id.as_deref().unwrap_or(""));
        out.push('\u{1f}');
        out.push_str(self.headsign.as_deref().unwrap_or(""));
        out.push('\u{1f}');
        out.push_str(&self.route_id);
        out.push('\u{1f}');
        out.push_str(&format!("{:?}", self.route_mode));
        out.push('\u{1f}');
        out.push_str(&format!("{:?}", self.direction));
        out.push('\u{1f}');
        for st in &self.stop_times {
            out.push_str(&self.stop_token(&st.stop));
            out.push(';');
        }
        out
    }

    /// The identity used to cluster trips with a *physically identical*
    /// path (the worker pool's trie key), distinct from
    /// [`Trip::cache_identity`].
    ///
    /// `cache_identity` always differs between any two trips because
    /// `trip.id` is unique by construction — keying the trie on it would
    /// never actually cluster anything, defeating the point of clustering
    /// (group identical trips so only one representative per class is
    /// routed). This identity drops `trip.id`/`service_id`/`block_id`
    /// and keeps only the route/shape/stop-sequence fields that
    /// determine the physical path the matcher will produce, so two
    /// trips running the same route over the same stops land on the
    /// same trie leaf.
    #[must_use]
    pub fn pattern_identity(&self) -> String {
        if let Some(shape_id) = &self.shape_id {
            return format!("shape:{shape_id}");
        }
        let mut out = String::new();
        out.push_str(&self.route_id);
        out.push('\u{1f}');
        out.push_str(&format!("{:?}", self.direction));
        out.push('\u{1f}');
        for st in &self.stop_times {
            out.push_str(&self.stop_token(&st.stop));
            out.push(';');
        }
        out
    }

    fn stop_token(&self, stop: &Stop) -> String {
        if !stop.id.is_empty() {
            format!("{}:{}", stop.id, stop.platform_code.as_deref().unwrap_or(""))
        } else {
            format!("{:.7}:{:.7}:{}", stop.lat, stop.lng, stop.name)
        }
    }

    #[must_use]
    pub fn is_empty_or_inconsistent(&self) -> bool {
        self.stop_times.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stop(id: &str) -> Stop {
        Stop {
            id: id.to_string(),
            name: "Main St".to_string(),
            platform_code: None,
            lat: 1.0,
            lng: 2.0,
            parent_station: None,
        }
    }

    fn base_trip(id: &str) -> Trip {
        Trip {
            id: id.to_string(),
            service_id: "wkdy".to_string(),
            block_id: None,
            shape_id: Some("shp1".to_string()),
            headsign: Some("Downtown".to_string()),
            short_name: None,
            route_id: "R1".to_string(),
            route_mode: Mode::Bus,
            direction: Direction::Outbound,
            stop_times: vec![
                StopTime { stop: stop("s1"), arrival_offset: 0, departure_offset: 0 },
                StopTime { stop: stop("s2"), arrival_offset: 60, departure_offset: 60 },
            ],
        }
    }

    #[test]
    fn cache_identity_differs_per_trip_id() {
        let a = base_trip("t1");
        let b = base_trip("t2");
        assert_ne!(a.cache_identity(), b.cache_identity());
    }

    #[test]
    fn pattern_identity_is_shared_by_same_shape_different_trip_id() {
        let a = base_trip("t1");
        let b = base_trip("t2");
        assert_eq!(a.pattern_identity(), b.pattern_identity());
    }

    #[test]
    fn pattern_identity_falls_back_to_stop_sequence_without_shape_id() {
        let mut a = base_trip("t1");
        let mut b = base_trip("t2");
        a.shape_id = None;
        b.shape_id = None;
        b.stop_times[1].stop.id = "different".to_string();
        assert_ne!(a.pattern_identity(), b.pattern_identity());
    }

    #[test]
    fn empty_stop_times_is_inconsistent() {
        let mut t = base_trip("t1");
        t.stop_times.clear();
        assert!(t.is_empty_or_inconsistent());
    }
}
