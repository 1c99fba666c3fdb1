//! The region manager.

use std::fs::{self, OpenOptions};
use std::io;
use std::path::Path;
use std::sync::Arc;

use indexmap::IndexMap;
use tether_core::BufferSpec;
use tracing::{debug, warn};

use crate::buffer::{ClientBuffer, Region, SimBuffer};
use crate::cleanup;
use crate::config::ShmConfig;
use crate::error::ShmError;
use crate::raw::Mapping;

/// Maps and owns the named regions of one environment instance.
///
/// Allocation is idempotent by name: asking twice for the same name
/// returns a handle onto the same region. A region whose backing file
/// already exists with the right size is attached rather than
/// recreated, since either side may create a region first.
///
/// An *owning* manager (from [`new`](Self::new)) unlinks its files at
/// [`release_all`](Self::release_all) or drop, and registers each file
/// with the [`cleanup`] registry so a signal-terminated host does not
/// leak them. A *peer* manager (from [`attach`](Self::attach)) maps the
/// same files without ever unlinking them.
pub struct RegionManager {
    config: ShmConfig,
    uuid: String,
    regions: IndexMap<String, Arc<Region>>,
    owning: bool,
}

impl RegionManager {
    /// Create the owning manager for environment `uuid`.
    pub fn new(config: ShmConfig, uuid: impl Into<String>) -> Result<Self, ShmError> {
        config.validate()?;
        Ok(Self {
            config,
            uuid: uuid.into(),
            regions: IndexMap::new(),
            owning: true,
        })
    }

    /// Create a non-owning peer manager over the same namespace.
    pub fn attach(config: ShmConfig, uuid: impl Into<String>) -> Result<Self, ShmError> {
        let mut m = Self::new(config, uuid)?;
        m.owning = false;
        Ok(m)
    }

    /// Environment uuid the names are scoped to.
    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    /// The configuration in use.
    pub fn config(&self) -> &ShmConfig {
        &self.config
    }

    /// Whether this manager unlinks its regions.
    pub fn is_owning(&self) -> bool {
        self.owning
    }

    /// Allocate (or re-open) a buffer this process writes.
    pub fn allocate_client(
        &mut self,
        name: &str,
        spec: BufferSpec,
    ) -> Result<ClientBuffer, ShmError> {
        self.allocate(name, spec).map(ClientBuffer)
    }

    /// Allocate (or re-open) a buffer the simulator writes.
    pub fn allocate_sim(&mut self, name: &str, spec: BufferSpec) -> Result<SimBuffer, ShmError> {
        self.allocate(name, spec).map(SimBuffer)
    }

    fn allocate(&mut self, name: &str, spec: BufferSpec) -> Result<Arc<Region>, ShmError> {
        if let Some(region) = self.regions.get(name) {
            if region.spec == spec {
                return Ok(Arc::clone(region));
            }
            if Arc::strong_count(region) > 1 {
                return Err(ShmError::ShapeMismatch {
                    name: name.to_string(),
                    existing: region.spec.clone(),
                    requested: spec,
                });
            }
            debug!(region = name, old = %region.spec, new = %spec, "replacing unused region");
            self.release(name);
        }
        if spec.is_empty() {
            return Err(ShmError::EmptyRegion {
                name: name.to_string(),
                spec,
            });
        }

        let path = self.config.region_path(&self.uuid, name);
        let expected = spec.byte_len() as u64;
        let file = open_region_file(&path).map_err(|e| ShmError::from_io(name, path.clone(), e))?;
        let found = file
            .metadata()
            .map_err(|e| ShmError::from_io(name, path.clone(), e))?
            .len();
        if found == 0 {
            file.set_len(expected)
                .map_err(|e| ShmError::from_io(name, path.clone(), e))?;
        } else if found != expected {
            return Err(ShmError::NameCollision {
                name: name.to_string(),
                path,
                found,
                expected,
            });
        } else if self.owning {
            warn!(region = name, bytes = found, path = %path.display(), "attaching stale region");
        } else {
            debug!(region = name, bytes = found, "attaching peer region");
        }

        let map = Mapping::new(&file, spec.byte_len())
            .map_err(|e| ShmError::from_io(name, path.clone(), e))?;
        let guard = self.owning.then(|| {
            let p = path.clone();
            cleanup::register(format!("region {}", p.display()), move || {
                let _ = fs::remove_file(&p);
            })
        });
        debug!(region = name, %spec, path = %path.display(), "mapped region");

        let region = Arc::new(Region {
            name: name.to_string(),
            path,
            spec,
            map,
            _cleanup: guard,
        });
        self.regions.insert(name.to_string(), Arc::clone(&region));
        Ok(region)
    }

    /// Whether a region with this name is mapped.
    pub fn contains(&self, name: &str) -> bool {
        self.regions.contains_key(name)
    }

    /// Number of mapped regions.
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    /// `true` if nothing is mapped.
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Names of mapped regions, in allocation order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.regions.keys().map(String::as_str)
    }

    /// Forget one region and, for an owning manager, unlink its file.
    /// Returns `false` if the name was not mapped.
    ///
    /// Outstanding handles stay valid until they drop; a later
    /// allocation under the same name maps a fresh file.
    pub fn release(&mut self, name: &str) -> bool {
        let Some(region) = self.regions.shift_remove(name) else {
            return false;
        };
        if self.owning {
            unlink(name, &region.path);
        }
        true
    }

    /// Release every region no handle refers to any more. Returns how
    /// many were released.
    pub fn release_unused(&mut self) -> usize {
        let unused: Vec<String> = self
            .regions
            .iter()
            .filter(|(_, r)| Arc::strong_count(r) == 1)
            .map(|(n, _)| n.clone())
            .collect();
        for name in &unused {
            self.release(name);
        }
        unused.len()
    }

    /// Forget every region and, for an owning manager, unlink its file.
    ///
    /// Outstanding handles stay valid: the mapping lives until the last
    /// handle drops, only the name disappears. Safe to call repeatedly.
    pub fn release_all(&mut self) {
        for (name, region) in self.regions.drain(..) {
            if self.owning {
                unlink(&name, &region.path);
            }
        }
    }
}

impl Drop for RegionManager {
    fn drop(&mut self) {
        self.release_all();
    }
}

impl std::fmt::Debug for RegionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegionManager")
            .field("uuid", &self.uuid)
            .field("root", &self.config.root)
            .field("regions", &self.regions.len())
            .field("owning", &self.owning)
            .finish()
    }
}

fn open_region_file(path: &Path) -> io::Result<fs::File> {
    let mut opts = OpenOptions::new();
    opts.read(true).write(true).create(true).truncate(false);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(0o600);
    }
    opts.open(path)
}

fn unlink(name: &str, path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!(region = name, "unlinked region"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(region = name, error = %e, "failed to unlink region"),
    }
}
