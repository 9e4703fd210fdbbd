//! [`AccessDirectory`] backed by the REST API, queried with a service account.

use std::path::{Component, Path, PathBuf};

use tardis_api::models::{Datafile, ObjectAcl};
use tardis_api::{HttpClient, TardisClient, TardisError};
use tracing::{debug, instrument};

use super::{AccessDirectory, ResolveError, UserProfile};

/// Answers authorization questions through the API and resolves replicas under a store root.
pub struct ApiDirectory<C: HttpClient> {
    client: TardisClient<C>,
    store_root: PathBuf,
    datafiles: scc::HashMap<u64, Datafile>,
}

impl<C: HttpClient> ApiDirectory<C> {
    /// A directory resolving replica locations under `store_root`.
    #[must_use]
    pub fn new(client: TardisClient<C>, store_root: impl Into<PathBuf>) -> Self {
        Self {
            client,
            store_root: store_root.into(),
            datafiles: scc::HashMap::new(),
        }
    }

    /// Fetch a datafile once per resolver run.
    async fn datafile(&self, datafile_id: u64) -> Result<Option<Datafile>, ResolveError> {
        if let Some(df) = self.datafiles.read_async(&datafile_id, |_, df| df.clone()).await {
            return Ok(Some(df));
        }
        match self.client.datafiles().get(datafile_id).await {
            Ok(df) => {
                let _ = self.datafiles.insert_async(datafile_id, df.clone()).await;
                Ok(Some(df))
            }
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

fn not_found_as_false(result: Result<bool, TardisError>) -> Result<bool, ResolveError> {
    match result {
        Ok(found) => Ok(found),
        Err(e) if e.is_not_found() => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Join a replica location onto the store root, refusing anything that could leave it.
pub(crate) fn resolve_under(store_root: &Path, location: &str) -> Result<PathBuf, ResolveError> {
    let relative = location
        .strip_prefix("file://")
        .unwrap_or(location)
        .trim_start_matches('/');

    let mut resolved = store_root.to_path_buf();
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(ResolveError::OutsideStore {
                    location: location.to_owned(),
                });
            }
        }
    }

    if resolved == store_root {
        return Err(ResolveError::OutsideStore {
            location: location.to_owned(),
        });
    }
    Ok(resolved)
}

impl<C: HttpClient> AccessDirectory for ApiDirectory<C> {
    #[instrument(name = "ApiDirectory::find_user", skip(self))]
    async fn find_user(
        &self,
        username: &str,
        auth_method: &str,
    ) -> Result<Option<UserProfile>, ResolveError> {
        let found = self
            .client
            .user_authentications()
            .find(username, auth_method)
            .await?;
        Ok(found.map(|ua| UserProfile {
            id: ua.user.id,
            privileged: ua.user.is_privileged(),
            group_ids: ua.user.group_ids().collect(),
            username: ua.user.username,
        }))
    }

    #[instrument(name = "ApiDirectory::experiment_public", skip(self))]
    async fn experiment_public(&self, experiment_id: u64) -> Result<bool, ResolveError> {
        not_found_as_false(
            self.client
                .experiments()
                .get(experiment_id)
                .await
                .map(|exp| exp.public_access_implies_distribution()),
        )
    }

    #[instrument(name = "ApiDirectory::owned_or_shared", skip(self, user), fields(user = %user.username))]
    async fn owned_or_shared(
        &self,
        experiment_id: u64,
        user: &UserProfile,
    ) -> Result<bool, ResolveError> {
        let acls: Vec<ObjectAcl> = self.client.acls().for_experiment(experiment_id).await?;
        let granted = acls
            .iter()
            .filter(|acl| acl.object_id == experiment_id)
            .any(|acl| acl.grants_read_to(user.id, &user.group_ids));
        debug!(entries = acls.len(), granted, "checked experiment ACL");
        Ok(granted)
    }

    #[instrument(name = "ApiDirectory::datafile_in_experiment", skip(self))]
    async fn datafile_in_experiment(
        &self,
        datafile_id: u64,
        experiment_id: u64,
    ) -> Result<bool, ResolveError> {
        let Some(df) = self.datafile(datafile_id).await? else {
            return Ok(false);
        };
        let Some(dataset_id) = df.dataset_id() else {
            return Ok(false);
        };
        not_found_as_false(
            self.client
                .datasets()
                .get(dataset_id)
                .await
                .map(|ds| ds.experiment_ids().any(|id| id == experiment_id)),
        )
    }

    #[instrument(name = "ApiDirectory::locate", skip(self))]
    async fn locate(&self, datafile_id: u64) -> Result<PathBuf, ResolveError> {
        let df = self
            .datafile(datafile_id)
            .await?
            .ok_or(ResolveError::NoReplica { datafile_id })?;

        let replica = df
            .replicas
            .iter()
            .filter(|r| !r.url.is_empty())
            .max_by_key(|r| r.verified)
            .ok_or(ResolveError::NoReplica { datafile_id })?;
        resolve_under(&self.store_root, &replica.url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replica_paths_stay_under_the_store() {
        let root = Path::new("/srv/store");
        assert_eq!(
            resolve_under(root, "73/5/scan.dat").unwrap(),
            Path::new("/srv/store/73/5/scan.dat")
        );
        assert_eq!(
            resolve_under(root, "file:///73/./scan.dat").unwrap(),
            Path::new("/srv/store/73/scan.dat")
        );
        assert!(resolve_under(root, "73/../../etc/shadow").is_err());
        assert!(resolve_under(root, "").is_err());
    }
}
