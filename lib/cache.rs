//! Time-bucketed metadata cache that builds the [`Tree`] from the [`Catalog`].
//!
//! There are three kinds of scope, each with its own TTL and clock: the experiment list, one
//! dataset list per experiment directory, and one datafile list per dataset directory. Scopes
//! are keyed by directory path, so a renamed experiment or dataset gets a clock of its own and
//! its listing is filled under the current name. A scope is refreshed when
//! it has never been loaded or when `now - last_refresh > ttl`. Refreshes of the same scope
//! are serialized, and a waiter that finds the scope fresh after getting the lock does not
//! call the backend again.
//!
//! Entries removed upstream are never pruned.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::catalog::{Catalog, CatalogError};
use crate::naming;
use crate::timestamps::parse_or_start;
use crate::tree::{self, DirEntry, EntryTimes, ROOT, Tree};

/// A refresh unit.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    /// The global experiment list.
    Experiments,
    /// The dataset list of one experiment, filled into `directory`.
    Datasets {
        /// Experiment id.
        experiment_id: u64,
        /// The experiment directory being listed, e.g. `/73-Beamline_Run`.
        directory: String,
    },
    /// The datafile list of one dataset, as reached through one experiment.
    Datafiles {
        /// Experiment id.
        experiment_id: u64,
        /// Dataset id.
        dataset_id: u64,
        /// The dataset directory being listed, e.g. `/73-Beamline_Run/5-Run_1`.
        directory: String,
    },
}

/// How long each kind of scope stays fresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheTtls {
    /// Experiment list.
    pub experiments: Duration,
    /// Per-experiment dataset lists.
    pub datasets: Duration,
    /// Per-dataset datafile lists.
    pub datafiles: Duration,
}

impl CacheTtls {
    /// The same TTL for every scope.
    #[must_use]
    pub fn uniform(ttl: Duration) -> Self {
        Self {
            experiments: ttl,
            datasets: ttl,
            datafiles: ttl,
        }
    }

    fn for_scope(&self, scope: &Scope) -> Duration {
        match scope {
            Scope::Experiments => self.experiments,
            Scope::Datasets { .. } => self.datasets,
            Scope::Datafiles { .. } => self.datafiles,
        }
    }
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self::uniform(Duration::from_secs(30))
    }
}

type Clock = Arc<Mutex<Option<Instant>>>;

/// Owns the [`Tree`] and keeps it populated from a [`Catalog`].
pub struct MetadataCache<C: Catalog> {
    catalog: C,
    tree: Tree,
    ttls: CacheTtls,
    clocks: scc::HashMap<Scope, Clock>,
}

impl<C: Catalog> MetadataCache<C> {
    /// An empty cache. Nothing is fetched until the first refresh.
    #[must_use]
    pub fn new(catalog: C, ttls: CacheTtls, directory_size: u64) -> Self {
        Self {
            catalog,
            tree: Tree::new(directory_size),
            ttls,
            clocks: scc::HashMap::new(),
        }
    }

    /// The tree built so far.
    #[must_use]
    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    /// The underlying catalog.
    #[must_use]
    pub fn catalog(&self) -> &C {
        &self.catalog
    }

    async fn clock(&self, scope: &Scope) -> Clock {
        Arc::clone(
            self.clocks
                .entry_async(scope.clone())
                .await
                .or_insert_with(|| Arc::new(Mutex::new(None)))
                .get(),
        )
    }

    /// Refresh the scope that owns the children of `dir`, if stale.
    ///
    /// Depth 0 maps to the experiment list, depth 1 to that experiment's datasets and
    /// anything deeper to the dataset's datafiles.
    pub async fn refresh_for(&self, dir: &str) {
        let components: Vec<&str> = dir.split('/').filter(|c| !c.is_empty()).collect();
        match components.as_slice() {
            [] => self.refresh_experiments().await,
            [experiment] => self.refresh_datasets(experiment).await,
            [experiment, dataset, ..] => self.refresh_datafiles(experiment, dataset).await,
        }
    }

    /// Refresh every scope on the way down to `path`, stopping at the first missing ancestor.
    ///
    /// Used when a lookup misses: after this returns, `path` exists if the backend has it.
    pub async fn refresh_along(&self, path: &str) {
        let components: Vec<&str> = path.split('/').filter(|c| !c.is_empty()).collect();
        if components.is_empty() {
            return;
        }

        self.refresh_experiments().await;
        if components.len() < 2 || !self.tree.contains(&tree::join(ROOT, components[0])) {
            return;
        }

        self.refresh_datasets(components[0]).await;
        let dataset_dir = format!("/{}/{}", components[0], components[1]);
        if components.len() < 3 || !self.tree.contains(&dataset_dir) {
            return;
        }

        self.refresh_datafiles(components[0], components[1]).await;
    }

    /// Refresh the experiment list if stale.
    pub async fn refresh_experiments(&self) {
        self.refresh_if_stale(Scope::Experiments).await;
    }

    async fn refresh_datasets(&self, experiment_dir: &str) {
        let Some(experiment_id) = naming::parse_entry_id(experiment_dir) else {
            debug!(experiment_dir, "not an experiment directory name");
            return;
        };
        let directory = tree::join(ROOT, experiment_dir);
        if !self.tree.contains(&directory) {
            return;
        }
        self.refresh_if_stale(Scope::Datasets {
            experiment_id,
            directory,
        })
        .await;
    }

    async fn refresh_datafiles(&self, experiment_dir: &str, dataset_dir: &str) {
        let (Some(experiment_id), Some(dataset_id)) = (
            naming::parse_entry_id(experiment_dir),
            naming::parse_entry_id(dataset_dir),
        ) else {
            debug!(experiment_dir, dataset_dir, "not a dataset directory path");
            return;
        };
        let directory = format!("/{experiment_dir}/{dataset_dir}");
        if !self.tree.contains(&directory) {
            return;
        }
        self.refresh_if_stale(Scope::Datafiles {
            experiment_id,
            dataset_id,
            directory,
        })
        .await;
    }

    /// Run the loader for `scope` unless it was refreshed within its TTL.
    ///
    /// Returns whether the backend was called. A failed load still stamps the clock so a
    /// dead backend is retried once per TTL rather than on every call.
    #[instrument(name = "MetadataCache::refresh", skip(self))]
    pub async fn refresh_if_stale(&self, scope: Scope) -> bool {
        let clock = self.clock(&scope).await;
        let mut last = clock.lock().await;
        let ttl = self.ttls.for_scope(&scope);
        if let Some(at) = *last
            && at.elapsed() <= ttl
        {
            return false;
        }

        let result = match &scope {
            Scope::Experiments => self.load_experiments().await,
            Scope::Datasets {
                experiment_id,
                directory,
            } => self.load_datasets(*experiment_id, directory).await,
            Scope::Datafiles {
                experiment_id,
                dataset_id,
                directory,
            } => {
                self.load_datafiles(*experiment_id, *dataset_id, directory)
                    .await
            }
        };
        if let Err(e) = result {
            warn!(error = %e, ?scope, "backend unavailable; serving what we already have");
        }

        *last = Some(Instant::now());
        true
    }

    async fn load_experiments(&self) -> Result<(), CatalogError> {
        let experiments = self.catalog.experiments().await?;
        info!(count = experiments.len(), "experiment record(s) found");

        let mut newest: Option<SystemTime> = None;
        for exp in experiments {
            let created = parse_or_start(exp.created_time.as_deref());
            newest = Some(newest.map_or(created, |n| n.max(created)));
            let path = tree::join(ROOT, &naming::entry_name(exp.id, &exp.title));
            self.tree.upsert_directory(&path, EntryTimes::uniform(created));
        }

        if let Some(newest) = newest {
            self.tree.set_root_times(EntryTimes::uniform(newest));
        }
        Ok(())
    }

    async fn load_datasets(
        &self,
        experiment_id: u64,
        experiment_dir: &str,
    ) -> Result<(), CatalogError> {
        let datasets = self.catalog.datasets(experiment_id).await?;
        info!(count = datasets.len(), experiment_id, "dataset record(s) found");

        for ds in datasets {
            let created = parse_or_start(ds.created_time.as_deref());
            let path = tree::join(experiment_dir, &naming::entry_name(ds.id, &ds.description));
            self.tree.upsert_directory(&path, EntryTimes::uniform(created));
        }
        Ok(())
    }

    async fn load_datafiles(
        &self,
        experiment_id: u64,
        dataset_id: u64,
        dataset_dir: &str,
    ) -> Result<(), CatalogError> {
        let datafiles = self.catalog.datafiles(experiment_id, dataset_id).await?;
        info!(count = datafiles.len(), dataset_id, "datafile record(s) found");

        for df in datafiles {
            let Some(filename) = naming::file_name(&df.filename) else {
                debug!(id = df.id, filename = %df.filename, "skipping datafile with unusable name");
                continue;
            };
            let created = parse_or_start(df.created_time.as_deref());
            let modified = parse_or_start(df.modification_time.as_deref());
            let times = EntryTimes {
                accessed: modified,
                modified,
                created,
            };

            let mut dir = dataset_dir.to_owned();
            for component in naming::subdirectory(df.directory.as_deref()) {
                dir = tree::join(&dir, &component);
                self.tree.upsert_directory(&dir, times);
            }

            self.tree.upsert(DirEntry::file(
                tree::join(&dir, &filename),
                df.size.unwrap_or(0),
                df.id,
                times,
            ));
        }
        Ok(())
    }
}
