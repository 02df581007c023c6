//! Greedy projection of where sighted teams may be now.
//!
//! For each alternative rank the engine replays every sighting of a request
//! against a private copy of the registry: it walks the elapsed time towards
//! the least-visited nearest group, and on arrival counts the visit and moves
//! on to the next least-visited group of the same subarea, until the time
//! runs out mid-step.
//!
//! Only the first destination of a sighting depends on the rank (the rank-th
//! least-visited candidate); later hops always take the nearest
//! least-visited group.

use std::collections::BTreeMap;
use std::fmt;
use std::panic;
use std::sync::Arc;
use std::thread;

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use tracing::{debug, info, warn};

use crate::cache::{CandidateRoutes, DirectionsCache};
use crate::model::{Group, Route, Sighting, Step, Subarea};
use crate::polyline::Polyline;
use crate::traits::DirectionsProvider;
use crate::walk::{walk, WalkOutcome};

#[derive(Debug, Clone)]
pub struct ProjectionOptions {
    /// Number of alternative itineraries per sighting.
    pub alternatives: usize,
    /// Most arrivals simulated for one sighting; the next one is reported as
    /// [`ProjectionFailure::HopLimitExceeded`].
    pub max_hops: usize,
    /// Replaces the timestamp-derived elapsed time of every sighting.
    pub elapsed_override_secs: Option<f64>,
}

impl Default for ProjectionOptions {
    fn default() -> Self {
        Self {
            alternatives: 3,
            max_hops: 64,
            elapsed_override_secs: None,
        }
    }
}

/// Projected whereabouts of one sighted team.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Itinerary {
    /// Groups reached since the sighting, in order.
    pub waypoints: Vec<Group>,
    /// Group the team is walking towards.
    pub next_group: Group,
    pub current_step: Step,
    /// Completed fraction of `current_step`, in [0, 1].
    pub step_progress: f64,
    /// Every polyline walked since the sighting, the current step included.
    pub polylines: Vec<Polyline>,
}

/// Why a (sighting, alternative) pair has no itinerary.
#[derive(Debug, Clone, PartialEq)]
pub enum ProjectionFailure {
    /// Fewer least-visited candidates than the requested rank.
    NoEligibleCandidate { rank: usize, available: usize },
    UnresolvedLocation,
    Provider(String),
    HopLimitExceeded(usize),
}

impl fmt::Display for ProjectionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProjectionFailure::NoEligibleCandidate { rank, available } => {
                write!(f, "no candidate at rank {rank} ({available} least-visited available)")
            }
            ProjectionFailure::UnresolvedLocation => write!(f, "sighting location could not be resolved"),
            ProjectionFailure::Provider(detail) => write!(f, "{detail}"),
            ProjectionFailure::HopLimitExceeded(hops) => write!(f, "gave up after {hops} arrivals"),
        }
    }
}

pub type Outcome = Result<Itinerary, ProjectionFailure>;

/// One hypothesis: an outcome per sighted subarea.
#[derive(Debug, Clone)]
pub struct Alternative {
    pub rank: usize,
    pub entries: BTreeMap<Subarea, Outcome>,
}

impl Alternative {
    pub fn outcome(&self, subarea: Subarea) -> Option<&Outcome> {
        self.entries.get(&subarea)
    }

    pub fn itinerary(&self, subarea: Subarea) -> Option<&Itinerary> {
        self.outcome(subarea).and_then(|outcome| outcome.as_ref().ok())
    }
}

/// Failed entries go on the wire as `null`.
impl Serialize for Alternative {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (subarea, outcome) in &self.entries {
            map.serialize_entry(subarea, &outcome.as_ref().ok())?;
        }
        map.end()
    }
}

/// Alternatives in rank order.
#[derive(Debug, Clone, Serialize)]
#[serde(transparent)]
pub struct ProjectionResult {
    pub alternatives: Vec<Alternative>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WarmSummary {
    pub lookups: usize,
    pub failures: usize,
}

/// First destination candidates of a sighting.
struct Start {
    elapsed_secs: f64,
    candidates: Arc<Vec<CandidateRoutes>>,
}

pub struct Projector<'a, P: DirectionsProvider + ?Sized> {
    cache: &'a DirectionsCache,
    provider: &'a P,
    options: &'a ProjectionOptions,
}

impl<'a, P: DirectionsProvider + ?Sized> Projector<'a, P> {
    pub fn new(cache: &'a DirectionsCache, provider: &'a P, options: &'a ProjectionOptions) -> Self {
        Self {
            cache,
            provider,
            options,
        }
    }

    /// Projects every sighting for every alternative rank.
    ///
    /// `registry` is never modified; each alternative mutates its own copy,
    /// so visits made while following one sighting count for the later
    /// sightings of the same alternative only.
    ///
    /// Ranks run on scoped threads owned by the caller. Hop lookups block on
    /// the provider, so they stay off any pool shared with other requests.
    pub fn project(&self, sightings: &[Sighting], registry: &[Group], now: DateTime<Utc>) -> ProjectionResult {
        // The first lookup of a sighting ignores visit counts, so it is shared by all ranks.
        let starts: Vec<Result<Start, ProjectionFailure>> = sightings
            .iter()
            .map(|sighting| self.start(sighting, registry, now))
            .collect();
        let starts = starts.as_slice();

        let alternatives: Vec<Alternative> = thread::scope(|scope| {
            let ranks: Vec<_> = (0..self.options.alternatives)
                .map(|rank| scope.spawn(move || self.alternative(rank, sightings, starts, registry)))
                .collect();
            ranks
                .into_iter()
                .map(|rank| rank.join().unwrap_or_else(|payload| panic::resume_unwind(payload)))
                .collect()
        });

        ProjectionResult { alternatives }
    }

    /// Precomputes the lookup made on arrival at each group, for every group.
    ///
    /// Runs once at startup, before any connection is accepted.
    pub fn warm(&self, groups: &[Group]) -> WarmSummary {
        let summary = groups
            .par_iter()
            .map(|group| {
                let candidates = in_subarea(groups, group.subarea, Some(group.id));
                if candidates.is_empty() {
                    return WarmSummary::default();
                }
                match self.cache.lookup(self.provider, group.location, &candidates) {
                    Ok(_) => WarmSummary {
                        lookups: 1,
                        failures: 0,
                    },
                    Err(err) => {
                        warn!(group = group.id, error = %err, "warm-up lookup failed");
                        WarmSummary {
                            lookups: 1,
                            failures: 1,
                        }
                    }
                }
            })
            .reduce(WarmSummary::default, |a, b| WarmSummary {
                lookups: a.lookups + b.lookups,
                failures: a.failures + b.failures,
            });

        info!(lookups = summary.lookups, failures = summary.failures, "directions cache warmed");
        summary
    }

    fn start(&self, sighting: &Sighting, registry: &[Group], now: DateTime<Utc>) -> Result<Start, ProjectionFailure> {
        let origin = sighting.location.resolve().ok_or(ProjectionFailure::UnresolvedLocation)?;
        let elapsed_secs = self
            .options
            .elapsed_override_secs
            .unwrap_or_else(|| sighting.elapsed_secs(now));

        let candidates = in_subarea(registry, sighting.subarea, None);
        let candidates = if candidates.is_empty() {
            Arc::new(Vec::new())
        } else {
            self.cache
                .lookup(self.provider, origin, &candidates)
                .map_err(|err| ProjectionFailure::Provider(err.to_string()))?
        };

        debug!(subarea = %sighting.subarea, elapsed_secs, candidates = candidates.len(), "sighting resolved");
        Ok(Start {
            elapsed_secs,
            candidates,
        })
    }

    fn alternative(
        &self,
        rank: usize,
        sightings: &[Sighting],
        starts: &[Result<Start, ProjectionFailure>],
        registry: &[Group],
    ) -> Alternative {
        let mut groups = registry.to_vec();
        let mut entries = BTreeMap::new();

        for (sighting, start) in sightings.iter().zip(starts) {
            let outcome = match start {
                Ok(start) => {
                    // Visits only count once the sighting yields an itinerary.
                    let mut working = groups.clone();
                    let outcome = self.follow(rank, sighting.subarea, start, &mut working);
                    if outcome.is_ok() {
                        groups = working;
                    }
                    outcome
                }
                Err(failure) => Err(failure.clone()),
            };
            if let Err(failure) = &outcome {
                warn!(rank, subarea = %sighting.subarea, %failure, "no projection");
            }
            entries.insert(sighting.subarea, outcome);
        }

        Alternative { rank, entries }
    }

    fn follow(&self, rank: usize, subarea: Subarea, start: &Start, groups: &mut [Group]) -> Outcome {
        let mut seconds = start.elapsed_secs;
        let mut waypoints = Vec::new();
        let mut polylines = Vec::new();
        let (mut target, mut route) = select(&start.candidates, groups, rank)?;
        let mut arrivals = 0;

        loop {
            let WalkOutcome {
                current_step,
                polylines: walked,
                leftover_secs,
                step_progress,
            } = walk(&route, seconds);
            polylines.extend(walked);

            if let Some(step) = current_step {
                return Ok(Itinerary {
                    waypoints,
                    next_group: groups[target].clone(),
                    current_step: step.clone(),
                    step_progress,
                    polylines,
                });
            }

            if arrivals == self.options.max_hops {
                return Err(ProjectionFailure::HopLimitExceeded(arrivals));
            }
            arrivals += 1;

            seconds = leftover_secs;
            let arrived = &mut groups[target];
            arrived.visits += 1;
            waypoints.push(arrived.clone());
            debug!(rank, %subarea, group = arrived.id, seconds, "arrived");

            let origin = arrived.location;
            let arrived_id = arrived.id;
            let candidates = in_subarea(groups, subarea, Some(arrived_id));
            if candidates.is_empty() {
                return Err(ProjectionFailure::NoEligibleCandidate { rank: 0, available: 0 });
            }
            let lookup = self
                .cache
                .lookup(self.provider, origin, &candidates)
                .map_err(|err| ProjectionFailure::Provider(err.to_string()))?;
            (target, route) = select(&lookup, groups, 0)?;
        }
    }
}

fn in_subarea(groups: &[Group], subarea: Subarea, exclude: Option<u64>) -> Vec<&Group> {
    groups
        .iter()
        .filter(|group| group.subarea == subarea && Some(group.id) != exclude)
        .collect()
}

/// Picks the `rank`-th nearest among the least-visited reachable candidates.
///
/// Returns the index of the group in `groups` and its primary route.
/// Candidates without any route are skipped. Equal distances keep the
/// candidate order.
fn select(
    candidates: &[CandidateRoutes],
    groups: &[Group],
    rank: usize,
) -> Result<(usize, Route), ProjectionFailure> {
    let mut reachable: Vec<(usize, &Route)> = candidates
        .iter()
        .filter_map(|candidate| {
            let index = groups.iter().position(|group| group.id == candidate.group_id)?;
            Some((index, candidate.primary()?))
        })
        .collect();
    reachable.sort_by(|a, b| a.1.distance().total_cmp(&b.1.distance()));

    let least = reachable.iter().map(|(index, _)| groups[*index].visits).min();
    let eligible: Vec<(usize, &Route)> = reachable
        .into_iter()
        .filter(|(index, _)| Some(groups[*index].visits) == least)
        .collect();
    let available = eligible.len();

    eligible
        .into_iter()
        .nth(rank)
        .map(|(index, route)| (index, route.clone()))
        .ok_or(ProjectionFailure::NoEligibleCandidate { rank, available })
}
