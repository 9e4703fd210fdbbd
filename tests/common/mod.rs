#![allow(dead_code, missing_docs, clippy::unwrap_used)]

use std::collections::{HashMap, HashSet};
use std::io::Write as _;
use std::os::fd::OwnedFd;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use tardis_fs::catalog::{Catalog, CatalogError, DatafileRecord, DatasetRecord, ExperimentRecord};
use tardis_fs::exchange::{DescriptorSource, ExchangeError};
use tardis_fs::resolver::{AccessDirectory, ResolveError, UserProfile};

pub fn experiment(id: u64, title: &str, created: &str) -> ExperimentRecord {
    ExperimentRecord {
        id,
        title: title.to_owned(),
        created_time: Some(created.to_owned()),
    }
}

pub fn dataset(id: u64, description: &str) -> DatasetRecord {
    DatasetRecord {
        id,
        description: description.to_owned(),
        created_time: Some("2023-05-01T09:00:00".to_owned()),
    }
}

pub fn datafile(id: u64, directory: Option<&str>, filename: &str, size: u64) -> DatafileRecord {
    DatafileRecord {
        id,
        directory: directory.map(str::to_owned),
        filename: filename.to_owned(),
        size: Some(size),
        created_time: Some("2023-05-01T09:30:00".to_owned()),
        modification_time: Some("2023-05-02T10:00:00".to_owned()),
    }
}

/// Per-scope call counts.
#[derive(Debug, Default)]
pub struct CallCounts {
    pub experiments: AtomicUsize,
    pub datasets: AtomicUsize,
    pub datafiles: AtomicUsize,
}

impl CallCounts {
    pub fn experiments(&self) -> usize {
        self.experiments.load(Ordering::SeqCst)
    }

    pub fn datasets(&self) -> usize {
        self.datasets.load(Ordering::SeqCst)
    }

    pub fn datafiles(&self) -> usize {
        self.datafiles.load(Ordering::SeqCst)
    }
}

/// An in-memory catalog that counts calls and can be switched into failing.
#[derive(Debug, Default)]
pub struct MockCatalog {
    pub experiments: Mutex<Vec<ExperimentRecord>>,
    pub datasets: Mutex<HashMap<u64, Vec<DatasetRecord>>>,
    pub datafiles: Mutex<HashMap<u64, Vec<DatafileRecord>>>,
    pub calls: CallCounts,
    pub failing: AtomicBool,
    /// Simulated backend latency.
    pub delay: Option<std::time::Duration>,
}

impl MockCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// One experiment, one dataset, one file: `/73-Beamline_Run/5-Run_1/scan.dat`.
    pub fn beamline() -> Self {
        let catalog = Self::new();
        catalog.add_experiment(experiment(73, "Beamline Run", "2023-05-01T08:00:00"));
        catalog.add_dataset(73, dataset(5, "Run 1"));
        catalog.add_datafile(5, datafile(901, None, "scan.dat", 1024));
        catalog
    }

    pub fn with_delay(mut self, delay: std::time::Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn add_experiment(&self, record: ExperimentRecord) {
        self.experiments.lock().unwrap().push(record);
    }

    pub fn add_dataset(&self, experiment_id: u64, record: DatasetRecord) {
        self.datasets
            .lock()
            .unwrap()
            .entry(experiment_id)
            .or_default()
            .push(record);
    }

    pub fn add_datafile(&self, dataset_id: u64, record: DatafileRecord) {
        self.datafiles
            .lock()
            .unwrap()
            .entry(dataset_id)
            .or_default()
            .push(record);
    }

    pub fn fail(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    async fn backend(&self) -> Result<(), CatalogError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(CatalogError::Spawn {
                program: "mock".to_owned(),
                source: std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
            });
        }
        Ok(())
    }
}

impl Catalog for MockCatalog {
    async fn experiments(&self) -> Result<Vec<ExperimentRecord>, CatalogError> {
        self.calls.experiments.fetch_add(1, Ordering::SeqCst);
        self.backend().await?;
        Ok(self.experiments.lock().unwrap().clone())
    }

    async fn datasets(&self, experiment_id: u64) -> Result<Vec<DatasetRecord>, CatalogError> {
        self.calls.datasets.fetch_add(1, Ordering::SeqCst);
        self.backend().await?;
        Ok(self
            .datasets
            .lock()
            .unwrap()
            .get(&experiment_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn datafiles(
        &self,
        _experiment_id: u64,
        dataset_id: u64,
    ) -> Result<Vec<DatafileRecord>, CatalogError> {
        self.calls.datafiles.fetch_add(1, Ordering::SeqCst);
        self.backend().await?;
        Ok(self
            .datafiles
            .lock()
            .unwrap()
            .get(&dataset_id)
            .cloned()
            .unwrap_or_default())
    }
}

/// Opens temp files by datafile id, counting every open.
pub struct MockDescriptors {
    dir: tempfile::TempDir,
    files: Mutex<HashMap<u64, PathBuf>>,
    denied: Mutex<HashMap<u64, String>>,
    pub opens: AtomicUsize,
}

impl MockDescriptors {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
            files: Mutex::new(HashMap::new()),
            denied: Mutex::new(HashMap::new()),
            opens: AtomicUsize::new(0),
        }
    }

    pub fn with_file(self, datafile_id: u64, contents: &[u8]) -> Self {
        let path = self.dir.path().join(format!("df-{datafile_id}"));
        std::fs::File::create(&path)
            .unwrap()
            .write_all(contents)
            .unwrap();
        self.files.lock().unwrap().insert(datafile_id, path);
        self
    }

    pub fn deny(self, datafile_id: u64, message: &str) -> Self {
        self.denied
            .lock()
            .unwrap()
            .insert(datafile_id, message.to_owned());
        self
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

impl DescriptorSource for MockDescriptors {
    async fn open(&self, _experiment_id: u64, datafile_id: u64) -> Result<OwnedFd, ExchangeError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self.denied.lock().unwrap().get(&datafile_id).cloned() {
            return Err(ExchangeError::Denied { message });
        }
        let path = self.files.lock().unwrap().get(&datafile_id).cloned();
        let Some(path) = path else {
            return Err(ExchangeError::Denied {
                message: format!("no such datafile {datafile_id}"),
            });
        };
        Ok(OwnedFd::from(std::fs::File::open(path)?))
    }
}

/// Authorization facts held in memory.
#[derive(Debug, Default)]
pub struct MockDirectory {
    pub users: HashMap<String, UserProfile>,
    pub public: HashSet<u64>,
    /// (experiment, user id) pairs with ownership or a share.
    pub shared: HashSet<(u64, u64)>,
    /// (datafile, experiment) pairs.
    pub membership: HashSet<(u64, u64)>,
    pub files: HashMap<u64, PathBuf>,
    pub broken: bool,
}

impl MockDirectory {
    pub fn with_user(mut self, id: u64, username: &str, privileged: bool) -> Self {
        self.users.insert(
            username.to_owned(),
            UserProfile {
                id,
                username: username.to_owned(),
                privileged,
                group_ids: Vec::new(),
            },
        );
        self
    }

    fn check(&self) -> Result<(), ResolveError> {
        if self.broken {
            return Err(ResolveError::Io(std::io::Error::from(
                std::io::ErrorKind::ConnectionRefused,
            )));
        }
        Ok(())
    }
}

impl AccessDirectory for MockDirectory {
    async fn find_user(
        &self,
        username: &str,
        _auth_method: &str,
    ) -> Result<Option<UserProfile>, ResolveError> {
        self.check()?;
        Ok(self.users.get(username).cloned())
    }

    async fn experiment_public(&self, experiment_id: u64) -> Result<bool, ResolveError> {
        self.check()?;
        Ok(self.public.contains(&experiment_id))
    }

    async fn owned_or_shared(
        &self,
        experiment_id: u64,
        user: &UserProfile,
    ) -> Result<bool, ResolveError> {
        self.check()?;
        Ok(self.shared.contains(&(experiment_id, user.id)))
    }

    async fn datafile_in_experiment(
        &self,
        datafile_id: u64,
        experiment_id: u64,
    ) -> Result<bool, ResolveError> {
        self.check()?;
        Ok(self.membership.contains(&(datafile_id, experiment_id)))
    }

    async fn locate(&self, datafile_id: u64) -> Result<PathBuf, ResolveError> {
        self.check()?;
        self.files
            .get(&datafile_id)
            .cloned()
            .ok_or(ResolveError::NoReplica { datafile_id })
    }
}
