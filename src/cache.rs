//! Memoized directions lookups.
//!
//! A lookup routes from one origin to every group of a candidate set, which
//! costs one backend call per group. Results are kept in a bounded LRU map
//! shared by all connections and persisted as a binary snapshot between
//! runs.

use std::fmt;
use std::fs::{self, File};
use std::io::{self, Write};
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use bitcode::{Decode, Encode};
use lru::LruCache;
use tracing::{debug, info};

use crate::model::{Group, GroupId, Route};
use crate::traits::{DirectionsProvider, ProviderError};

/// Bumped whenever the snapshot layout changes.
const SNAPSHOT_VERSION: u32 = 1;
const SNAPSHOT_MAGIC: &[u8; 4] = b"SPDC";

/// Coordinates in integer microdegrees so keys hash and compare exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Encode, Decode)]
pub struct Microdegrees {
    pub lat: i64,
    pub lng: i64,
}

impl From<(f64, f64)> for Microdegrees {
    fn from((lat, lng): (f64, f64)) -> Self {
        Self {
            lat: (lat * 1e6).round() as i64,
            lng: (lng * 1e6).round() as i64,
        }
    }
}

/// Identity of a lookup: the origin plus the exact candidate set.
///
/// Candidates are sorted by id, so two sets listing the same groups in a
/// different order share an entry. Positions are part of the key: a group
/// that moves in the registry invalidates every entry mentioning it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Encode, Decode)]
pub struct CacheKey {
    origin: Microdegrees,
    candidates: Vec<(GroupId, Microdegrees)>,
}

impl CacheKey {
    pub fn new(origin: (f64, f64), candidates: &[&Group]) -> Self {
        let mut candidates: Vec<_> = candidates
            .iter()
            .map(|group| (group.id, Microdegrees::from(group.location)))
            .collect();
        candidates.sort_unstable();
        candidates.dedup();
        Self {
            origin: origin.into(),
            candidates,
        }
    }
}

/// Every route alternative from the lookup origin to one group.
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct CandidateRoutes {
    pub group_id: GroupId,
    pub routes: Vec<Route>,
}

impl CandidateRoutes {
    pub fn primary(&self) -> Option<&Route> {
        self.routes.first()
    }
}

#[derive(Encode, Decode)]
struct Snapshot {
    /// Least recently used first.
    entries: Vec<(CacheKey, Vec<CandidateRoutes>)>,
}

#[derive(Debug)]
pub enum CacheError {
    Io(io::Error),
    Decode(bitcode::Error),
    UnsupportedVersion(u32),
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheError::Io(err) => write!(f, "cache snapshot I/O failed: {err}"),
            CacheError::Decode(err) => write!(f, "cache snapshot is corrupt: {err}"),
            CacheError::UnsupportedVersion(version) => {
                write!(f, "cache snapshot version {version} is not supported")
            }
        }
    }
}

impl std::error::Error for CacheError {}

impl From<io::Error> for CacheError {
    fn from(err: io::Error) -> Self {
        CacheError::Io(err)
    }
}

impl From<bitcode::Error> for CacheError {
    fn from(err: bitcode::Error) -> Self {
        CacheError::Decode(err)
    }
}

pub struct DirectionsCache {
    entries: Mutex<LruCache<CacheKey, Arc<Vec<CandidateRoutes>>>>,
}

impl DirectionsCache {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Loads a snapshot written by [`DirectionsCache::flush`].
    ///
    /// A missing file yields an empty cache. Snapshots larger than
    /// `capacity` keep their most recently used entries.
    pub fn load(path: &Path, capacity: NonZeroUsize) -> Result<Self, CacheError> {
        let cache = Self::new(capacity);
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                info!(path = %path.display(), "no cache snapshot, starting empty");
                return Ok(cache);
            }
            Err(err) => return Err(err.into()),
        };

        let snapshot = decode_snapshot(&bytes)?;
        {
            let mut entries = cache.lock();
            for (key, candidates) in snapshot.entries {
                entries.put(key, Arc::new(candidates));
            }
        }
        info!(path = %path.display(), entries = cache.len(), "loaded cache snapshot");
        Ok(cache)
    }

    /// Writes every entry to `path`, replacing any previous snapshot
    /// atomically. Returns the number of entries written.
    pub fn flush(&self, path: &Path) -> Result<usize, CacheError> {
        let snapshot = {
            let entries = self.lock();
            Snapshot {
                entries: entries
                    .iter()
                    .rev()
                    .map(|(key, candidates)| (key.clone(), candidates.as_ref().clone()))
                    .collect(),
            }
        };
        let count = snapshot.entries.len();

        let mut bytes = Vec::with_capacity(8);
        bytes.extend_from_slice(SNAPSHOT_MAGIC);
        bytes.extend_from_slice(&SNAPSHOT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&bitcode::encode(&snapshot));
        atomic_write(path, &bytes)?;

        info!(path = %path.display(), entries = count, "flushed cache snapshot");
        Ok(count)
    }

    /// Routes from `origin` to each candidate, in candidate order.
    ///
    /// On a miss the provider is called once per candidate. A candidate the
    /// provider cannot route to is stored with no routes. Any other failure
    /// fails the whole lookup and nothing is stored. Concurrent misses on the
    /// same key may both fetch; the last insert wins.
    pub fn lookup<P>(
        &self,
        provider: &P,
        origin: (f64, f64),
        candidates: &[&Group],
    ) -> Result<Arc<Vec<CandidateRoutes>>, ProviderError>
    where
        P: DirectionsProvider + ?Sized,
    {
        let key = CacheKey::new(origin, candidates);
        if let Some(hit) = self.lock().get(&key) {
            debug!(?origin, candidates = candidates.len(), "directions cache hit");
            return Ok(reorder(hit, candidates));
        }

        debug!(?origin, candidates = candidates.len(), "directions cache miss");
        let fetched = candidates
            .iter()
            .map(|group| {
                let routes = match provider.directions(origin, group.location) {
                    Ok(routes) => routes,
                    Err(ProviderError::NoRoute) => {
                        debug!(?origin, group = group.id, "no route to candidate");
                        Vec::new()
                    }
                    Err(err) => return Err(err),
                };
                Ok(CandidateRoutes {
                    group_id: group.id,
                    routes,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let fetched = Arc::new(fetched);
        self.lock().put(key, Arc::clone(&fetched));
        Ok(fetched)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<CacheKey, Arc<Vec<CandidateRoutes>>>> {
        // Entries are replaced whole, so a panic elsewhere cannot leave one half-written.
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Entries are stored in the order of the call that filled them; callers
/// expect their own candidate order back.
fn reorder(hit: &Arc<Vec<CandidateRoutes>>, candidates: &[&Group]) -> Arc<Vec<CandidateRoutes>> {
    let same_order = hit.len() == candidates.len()
        && hit.iter().zip(candidates).all(|(entry, group)| entry.group_id == group.id);
    if same_order {
        return Arc::clone(hit);
    }
    Arc::new(
        candidates
            .iter()
            .filter_map(|group| hit.iter().find(|entry| entry.group_id == group.id).cloned())
            .collect(),
    )
}

fn decode_snapshot(bytes: &[u8]) -> Result<Snapshot, CacheError> {
    if bytes.len() < 8 || &bytes[..4] != SNAPSHOT_MAGIC {
        return Err(CacheError::Io(io::Error::new(
            io::ErrorKind::InvalidData,
            "not a directions cache snapshot",
        )));
    }
    let mut version = [0u8; 4];
    version.copy_from_slice(&bytes[4..8]);
    let version = u32::from_le_bytes(version);
    if version != SNAPSHOT_VERSION {
        return Err(CacheError::UnsupportedVersion(version));
    }
    Ok(bitcode::decode(&bytes[8..])?)
}

fn atomic_write(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let tmp_path = path.with_extension("tmp");
    let mut file = File::create(&tmp_path)?;
    file.write_all(data)?;
    file.sync_all()?;
    fs::rename(&tmp_path, path)
}
