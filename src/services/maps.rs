use async_trait::async_trait;
use reqwest::Url;
use std::collections::HashMap;

use super::{MapsService, Place, Route, RouteStep};
use crate::kernel::entity::TravelMode;
use crate::kernel::error::CollaboratorError;

const EARTH_RADIUS_M: f64 = 6_371_000.0;
const MAPS_BASE: &str = "https://www.google.com/maps/";

/// `https://www.google.com/maps/search/<query>`
pub fn search_url(query: &str) -> Option<String> {
    maps_url(&["search", query], None)
}

/// `https://www.google.com/maps/dir/<from>/<to>/?travelmode=<mode>`
pub fn directions_url(from: &str, to: &str, mode: TravelMode) -> Option<String> {
    maps_url(&["dir", from, to, ""], Some(mode))
}

fn maps_url(segments: &[&str], mode: Option<TravelMode>) -> Option<String> {
    let mut url = Url::parse(MAPS_BASE).ok()?;
    url.path_segments_mut().ok()?.pop_if_empty().extend(segments);
    if let Some(mode) = mode {
        url.query_pairs_mut().append_pair("travelmode", mode.as_str());
    }
    Some(url.into())
}

#[derive(Debug, Clone)]
struct Landmark {
    place: Place,
    aliases: Vec<String>,
}

/// Fixed campus map. Course codes resolve to the building they are taught in.
#[derive(Debug, Clone)]
pub struct CampusMaps {
    landmarks: Vec<Landmark>,
    rooms: HashMap<String, String>,
}

impl Default for CampusMaps {
    fn default() -> Self {
        let mut maps = Self {
            landmarks: Vec::new(),
            rooms: HashMap::new(),
        };
        maps.add("Campus Library", "Campus Library, University Ave", 40.7589, -73.9851, &["library"]);
        maps.add("Student Cafeteria", "Student Cafeteria, Campus Center", 40.7591, -73.9849, &["cafeteria", "canteen"]);
        maps.add("Campus Gymnasium", "Campus Gymnasium, Sports Complex", 40.7587, -73.9853, &["gym"]);
        maps.add(
            "Computer Science Building",
            "Computer Science Building, Tech Campus",
            40.7593,
            -73.9847,
            &["cs building", "cs block"],
        );
        maps.add("Main Hall", "Main Hall, University Ave", 40.7590, -73.9850, &["main building"]);
        maps.add("Student Center", "Student Center, Campus Center", 40.7591, -73.9849, &["student centre"]);
        maps.add("Main Gate", "Main Gate, University Ave", 40.7585, -73.9855, &["front gate", "entrance"]);
        maps.room("CS101", "Computer Science Building");
        maps.room("MA201", "Main Hall");
        maps
    }
}

impl CampusMaps {
    pub fn add(&mut self, name: &str, address: &str, latitude: f64, longitude: f64, aliases: &[&str]) {
        self.landmarks.push(Landmark {
            place: Place {
                name: name.to_string(),
                address: address.to_string(),
                latitude,
                longitude,
                maps_url: search_url(address),
            },
            aliases: aliases.iter().map(|a| a.to_lowercase()).collect(),
        });
    }

    /// Where a course meets.
    pub fn room(&mut self, course: &str, building: &str) {
        self.rooms.insert(course.to_uppercase(), building.to_string());
    }

    fn resolve(&self, query: &str) -> Option<&Place> {
        let q = query.trim().to_lowercase();
        if q.is_empty() {
            return None;
        }
        let compact: String = q.chars().filter(|c| !c.is_whitespace()).collect();
        if let Some(building) = self.rooms.get(&compact.to_uppercase()) {
            return self.resolve(building);
        }

        let exact = self
            .landmarks
            .iter()
            .find(|l| l.place.name.to_lowercase() == q || l.aliases.iter().any(|a| *a == q));
        if let Some(l) = exact {
            return Some(&l.place);
        }
        // "the library on campus" still finds the library
        self.landmarks
            .iter()
            .find(|l| {
                q.contains(&l.place.name.to_lowercase()) || l.aliases.iter().any(|a| q.contains(a.as_str()))
            })
            .map(|l| &l.place)
    }
}

fn haversine_m(a: &Place, b: &Place) -> f64 {
    let (lat1, lat2) = (a.latitude.to_radians(), b.latitude.to_radians());
    let dlat = lat2 - lat1;
    let dlon = (b.longitude - a.longitude).to_radians();
    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().asin()
}

#[async_trait]
impl MapsService for CampusMaps {
    async fn find_location(&self, query: &str) -> Result<Place, CollaboratorError> {
        self.resolve(query)
            .cloned()
            .ok_or_else(|| CollaboratorError::NotFound(query.to_string()))
    }

    async fn directions(&self, from: &str, to: &str, mode: TravelMode) -> Result<Route, CollaboratorError> {
        let origin = self
            .resolve(from)
            .ok_or_else(|| CollaboratorError::NotFound(from.to_string()))?;
        let destination = self
            .resolve(to)
            .ok_or_else(|| CollaboratorError::NotFound(to.to_string()))?;

        let distance = haversine_m(origin, destination).round();
        let distance_m = distance as u32;
        let minutes = ((distance / mode.meters_per_minute()).ceil() as u32).max(1);

        let steps = if origin.name == destination.name {
            vec![RouteStep {
                instruction: format!("You are already at {}", destination.name),
                distance_m: 0,
                minutes: 0,
            }]
        } else {
            vec![
                RouteStep {
                    instruction: format!("Leave {} towards {}", origin.name, destination.address),
                    distance_m: distance_m / 2,
                    minutes: minutes.div_ceil(2),
                },
                RouteStep {
                    instruction: format!("Continue to {}", destination.name),
                    distance_m: distance_m - distance_m / 2,
                    minutes: minutes / 2,
                },
            ]
        };

        Ok(Route {
            origin: origin.name.clone(),
            destination: destination.name.clone(),
            distance_m,
            minutes: if steps.len() == 1 { 0 } else { minutes },
            mode,
            steps,
            maps_url: directions_url(&origin.address, &destination.address, mode),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn course_code_maps_to_its_building() {
        let maps = CampusMaps::default();
        let place = maps.find_location("cs 101").await.unwrap();
        assert_eq!(place.name, "Computer Science Building");
    }

    #[tokio::test]
    async fn unknown_place_is_not_found() {
        let maps = CampusMaps::default();
        let err = maps.find_location("observatory").await.unwrap_err();
        assert!(matches!(err, CollaboratorError::NotFound(_)));
    }

    #[tokio::test]
    async fn route_between_landmarks_has_positive_estimate() {
        let maps = CampusMaps::default();
        let route = maps.directions("Main Gate", "Campus Library", TravelMode::Walking).await.unwrap();
        assert_eq!(route.destination, "Campus Library");
        assert!(route.distance_m > 0);
        assert!(route.minutes >= 1);
        assert_eq!(route.steps.len(), 2);
    }

    #[test]
    fn links_are_percent_encoded() {
        assert_eq!(
            search_url("Main Hall, University Ave").as_deref(),
            Some("https://www.google.com/maps/search/Main%20Hall,%20University%20Ave")
        );
        assert_eq!(
            directions_url("Main Gate", "Campus Library", TravelMode::Bicycling).as_deref(),
            Some("https://www.google.com/maps/dir/Main%20Gate/Campus%20Library/?travelmode=bicycling")
        );
    }

    #[tokio::test]
    async fn faster_mode_shortens_the_estimate() {
        let maps = CampusMaps::default();
        // Far enough apart that the one-minute floor does not hide the difference
        let mut far = CampusMaps::default();
        far.add("North Field", "North Field, Ridge Rd", 40.7700, -73.9855, &[]);
        let walk = far.directions("Main Gate", "North Field", TravelMode::Walking).await.unwrap();
        let ride = far.directions("Main Gate", "North Field", TravelMode::Bicycling).await.unwrap();
        assert_eq!(walk.distance_m, ride.distance_m);
        assert!(ride.minutes < walk.minutes);
        assert_eq!(ride.mode, TravelMode::Bicycling);
        assert!(ride.maps_url.unwrap().ends_with("travelmode=bicycling"));

        let place = maps.find_location("library").await.unwrap();
        assert!(place.maps_url.unwrap().starts_with("https://www.google.com/maps/search/"));
    }
}
