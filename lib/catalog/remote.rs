//! Metadata listings read from the MyTardis REST API, every page followed to the end.

use futures::TryStreamExt as _;
use tardis_api::{HttpClient, TardisClient, models};
use tracing::{debug, instrument};

use super::{Catalog, CatalogError, DatafileRecord, DatasetRecord, ExperimentRecord, HelperLister};

/// Catalog backed by the MyTardis REST API.
///
/// With a [`HelperLister`] attached, datafile listings go through the helper instead.
pub struct RemoteCatalog<C: HttpClient> {
    client: TardisClient<C>,
    helper: Option<HelperLister>,
}

impl<C: HttpClient> RemoteCatalog<C> {
    /// List everything through the API.
    #[must_use]
    pub fn new(client: TardisClient<C>) -> Self {
        Self {
            client,
            helper: None,
        }
    }

    /// Route datafile listings through `helper`.
    #[must_use]
    pub fn with_helper(mut self, helper: HelperLister) -> Self {
        self.helper = Some(helper);
        self
    }
}

impl From<models::Experiment> for ExperimentRecord {
    fn from(exp: models::Experiment) -> Self {
        Self {
            id: exp.id,
            title: exp.title,
            created_time: exp.created_time,
        }
    }
}

impl From<models::Dataset> for DatasetRecord {
    fn from(ds: models::Dataset) -> Self {
        Self {
            id: ds.id,
            description: ds.description,
            created_time: ds.created_time,
        }
    }
}

impl From<models::Datafile> for DatafileRecord {
    fn from(df: models::Datafile) -> Self {
        Self {
            id: df.id,
            directory: df.directory,
            filename: df.filename,
            size: df.size,
            created_time: df.created_time,
            modification_time: df.modification_time,
        }
    }
}

impl<C: HttpClient> Catalog for RemoteCatalog<C> {
    #[instrument(name = "RemoteCatalog::experiments", skip(self))]
    async fn experiments(&self) -> Result<Vec<ExperimentRecord>, CatalogError> {
        let experiments: Vec<ExperimentRecord> = self
            .client
            .experiments()
            .list_all()
            .into_stream()
            .map_ok(Into::into)
            .try_collect()
            .await?;
        debug!(count = experiments.len(), "experiment records found");
        Ok(experiments)
    }

    #[instrument(name = "RemoteCatalog::datasets", skip(self))]
    async fn datasets(&self, experiment_id: u64) -> Result<Vec<DatasetRecord>, CatalogError> {
        let datasets: Vec<DatasetRecord> = self
            .client
            .datasets()
            .list_for_experiment(experiment_id)
            .into_stream()
            .map_ok(Into::into)
            .try_collect()
            .await?;
        debug!(count = datasets.len(), "dataset records found");
        Ok(datasets)
    }

    #[instrument(name = "RemoteCatalog::datafiles", skip(self))]
    async fn datafiles(
        &self,
        experiment_id: u64,
        dataset_id: u64,
    ) -> Result<Vec<DatafileRecord>, CatalogError> {
        let records: Vec<DatafileRecord> = match &self.helper {
            Some(helper) => helper.datafiles(experiment_id, dataset_id).await?,
            None => self
                .client
                .datafiles()
                .list_for_dataset(dataset_id)
                .into_stream()
                .map_ok(Into::into)
                .try_collect()
                .await?,
        };
        debug!(count = records.len(), "datafile records found");
        Ok(records)
    }
}
