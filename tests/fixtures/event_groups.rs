//! Event groups and scripted collaborators.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};

use sighting_projector::haversine::StraightLineDirections;
use sighting_projector::model::{Group, Location, Route, Sighting, Step, Subarea};
use sighting_projector::polyline::Polyline;
use sighting_projector::registry::RegistryError;
use sighting_projector::traits::{DirectionsProvider, GroupRegistry, ProviderError};

/// Builder for registry groups with sensible defaults.
#[derive(Debug, Clone)]
pub struct TestGroup {
    group: Group,
}

impl TestGroup {
    pub fn new(id: u64, subarea: Subarea, lat: f64, lng: f64) -> Self {
        Self {
            group: Group {
                id,
                name: format!("Post {id}"),
                subarea,
                location: (lat, lng),
                address: None,
                visits: 0,
            },
        }
    }

    pub fn visits(mut self, visits: u32) -> Self {
        self.group.visits = visits;
        self
    }

    pub fn named(mut self, name: &str) -> Self {
        self.group.name = name.to_string();
        self
    }

    pub fn build(self) -> Group {
        self.group
    }
}

/// Scouting posts around Utrecht, Alpha in the north, Bravo in the south.
pub fn utrecht_groups() -> Vec<Group> {
    vec![
        TestGroup::new(1, Subarea::Alpha, 52.0998, 5.1101).named("Zuilen").build(),
        TestGroup::new(2, Subarea::Alpha, 52.1050, 5.0960).named("Elinkwijk").build(),
        TestGroup::new(3, Subarea::Alpha, 52.1102, 5.1201).named("Overvecht").build(),
        TestGroup::new(4, Subarea::Alpha, 52.0931, 5.1302).named("Tuinwijk").build(),
        TestGroup::new(11, Subarea::Bravo, 52.0702, 5.1201).named("Hoograven").build(),
        TestGroup::new(12, Subarea::Bravo, 52.0650, 5.1050).named("Kanaleneiland").build(),
        TestGroup::new(13, Subarea::Bravo, 52.0601, 5.1302).named("Lunetten").build(),
    ]
}

pub fn at(now: DateTime<Utc>, seconds_ago: i64) -> DateTime<Utc> {
    now - Duration::seconds(seconds_ago)
}

pub fn sighting(subarea: Subarea, location: (f64, f64), timestamp: DateTime<Utc>) -> Sighting {
    Sighting {
        subarea,
        location: Location::Pair([location.0, location.1]),
        timestamp,
    }
}

pub fn step(duration: f64, polyline: &str) -> Step {
    Step {
        duration,
        distance: duration * 1.3,
        polyline: Polyline::new(polyline),
    }
}

fn key(point: (f64, f64)) -> String {
    format!("{:.6},{:.6}", point.0, point.1)
}

/// Directions double: scripted routes per (origin, destination), straight
/// lines everywhere else, destinations that always fail and destinations
/// with no route at all. Every call can be made to take `latency`.
pub struct ScriptedDirections {
    routes: HashMap<(String, String), Route>,
    failing: HashSet<String>,
    unroutable: HashSet<String>,
    latency: Option<StdDuration>,
    fallback: StraightLineDirections,
    calls: AtomicUsize,
    log: Mutex<Vec<((f64, f64), (f64, f64))>>,
}

impl ScriptedDirections {
    pub fn new() -> Self {
        Self {
            routes: HashMap::new(),
            failing: HashSet::new(),
            unroutable: HashSet::new(),
            latency: None,
            fallback: StraightLineDirections::default(),
            calls: AtomicUsize::new(0),
            log: Mutex::new(Vec::new()),
        }
    }

    /// Scripts a route with the given steps; distance ranks candidates.
    pub fn route(mut self, from: (f64, f64), to: (f64, f64), distance: f64, steps: Vec<Step>) -> Self {
        let mut route = Route::from_steps(steps);
        route.legs[0].distance = distance;
        self.routes.insert((key(from), key(to)), route);
        self
    }

    pub fn failing_to(mut self, destination: (f64, f64)) -> Self {
        self.failing.insert(key(destination));
        self
    }

    pub fn no_route_to(mut self, destination: (f64, f64)) -> Self {
        self.unroutable.insert(key(destination));
        self
    }

    pub fn with_latency(mut self, latency: StdDuration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn origins(&self) -> Vec<(f64, f64)> {
        self.log.lock().unwrap().iter().map(|(origin, _)| *origin).collect()
    }
}

impl DirectionsProvider for ScriptedDirections {
    fn directions(&self, origin: (f64, f64), destination: (f64, f64)) -> Result<Vec<Route>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.log.lock().unwrap().push((origin, destination));
        if let Some(latency) = self.latency {
            thread::sleep(latency);
        }
        if self.failing.contains(&key(destination)) {
            return Err(ProviderError::Status("504 Gateway Timeout".to_string()));
        }
        if self.unroutable.contains(&key(destination)) {
            return Err(ProviderError::NoRoute);
        }
        match self.routes.get(&(key(origin), key(destination))) {
            Some(route) => Ok(vec![route.clone()]),
            None => self.fallback.directions(origin, destination),
        }
    }
}

/// Registry double returning a fixed snapshot, or failing.
pub struct StaticRegistry {
    groups: Option<Vec<Group>>,
    fetches: AtomicUsize,
}

impl StaticRegistry {
    pub fn new(groups: Vec<Group>) -> Self {
        Self {
            groups: Some(groups),
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            groups: None,
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl GroupRegistry for StaticRegistry {
    fn fetch_groups(&self) -> Result<Vec<Group>, RegistryError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.groups.clone().ok_or(RegistryError::Status(503))
    }
}
