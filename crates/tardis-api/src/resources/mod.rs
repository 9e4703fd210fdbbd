//! Resource namespaces for the MyTardis API.

mod acls;
mod datafiles;
mod datasets;
mod experiments;
mod users;

pub use acls::AclsResource;
pub use datafiles::DatafilesResource;
pub use datasets::DatasetsResource;
pub use experiments::ExperimentsResource;
pub use users::UserAuthenticationsResource;
