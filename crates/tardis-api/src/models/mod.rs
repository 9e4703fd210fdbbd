//! Response models for the v1 API.

mod acl;
mod datafile;
mod dataset;
mod experiment;
mod listing;
mod user;

pub use acl::ObjectAcl;
pub use datafile::{Datafile, Replica, lenient_size};
pub use dataset::Dataset;
pub use experiment::{Experiment, PUBLIC_ACCESS_METADATA};
pub use listing::{ListMeta, Listing};
pub use user::{User, UserAuthentication};

/// Extract the trailing object id from a resource URI such as `/api/v1/experiment/73/`.
#[must_use]
pub fn id_from_uri(uri: &str) -> Option<u64> {
    uri.trim_end_matches('/').rsplit('/').next()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::id_from_uri;

    #[test]
    fn id_from_uri_reads_last_segment() {
        assert_eq!(id_from_uri("/api/v1/experiment/73/"), Some(73));
        assert_eq!(id_from_uri("/api/v1/dataset/5"), Some(5));
        assert_eq!(id_from_uri("/api/v1/dataset/"), None);
        assert_eq!(id_from_uri(""), None);
    }
}
