#![allow(clippy::unwrap_used, missing_docs)]

mod common;

use std::sync::Arc;

use common::{MockCatalog, MockDescriptors};
use tardis_fs::cache::{CacheTtls, MetadataCache};
use tardis_fs::fs::PathFs as _;
use tardis_fs::handles::HandleTable;
use tardis_fs::tree::EntryKind;
use tardis_fs::vfs::{FsError, TardisFs};

const SCAN: &str = "/73-Beamline_Run/5-Run_1/scan.dat";
const CONTENTS: &[u8] = b"0123456789abcdef";

fn beamline_fs(descriptors: MockDescriptors) -> TardisFs<MockCatalog, MockDescriptors> {
    let cache = MetadataCache::new(MockCatalog::beamline(), CacheTtls::default(), 4096);
    TardisFs::new(cache, Arc::new(HandleTable::new(descriptors)))
}

fn listed_names(listing: &[tardis_fs::fs::Listed]) -> Vec<&str> {
    listing.iter().map(|l| l.name.as_str()).collect()
}

#[tokio::test]
async fn cold_lookup_of_a_deep_file_fills_in_the_path() {
    let fs = beamline_fs(MockDescriptors::new().with_file(901, CONTENTS));

    let entry = fs.attributes(SCAN).await.unwrap();
    assert_eq!(entry.path, SCAN);
    assert_eq!(entry.kind, EntryKind::File { datafile_id: 901 });
    assert_eq!(entry.size, 1024);
    assert_eq!(entry.link_count, 1);

    let dataset = fs.attributes("/73-Beamline_Run/5-Run_1").await.unwrap();
    assert!(dataset.is_directory());
    assert_eq!(dataset.link_count, 3);
}

#[tokio::test]
async fn listings_hold_dot_entries_then_children() {
    let fs = beamline_fs(MockDescriptors::new());

    let root = fs.list_directory("/").await.unwrap();
    assert_eq!(listed_names(&root), vec![".", "..", "73-Beamline_Run"]);
    assert_eq!(root[1].entry.path, "/", "the root is its own parent");

    let experiment = fs.list_directory("/73-Beamline_Run/").await.unwrap();
    assert_eq!(listed_names(&experiment), vec![".", "..", "5-Run_1"]);
    assert_eq!(experiment[0].entry.path, "/73-Beamline_Run");
    assert_eq!(experiment[1].entry.path, "/");

    let dataset = fs.list_directory("/73-Beamline_Run/5-Run_1/*").await.unwrap();
    assert_eq!(listed_names(&dataset), vec![".", "..", "scan.dat"]);
}

#[tokio::test]
async fn missing_paths_are_not_found() {
    let fs = beamline_fs(MockDescriptors::new());

    let err = fs.attributes("/73-Beamline_Run/nope").await.unwrap_err();
    assert!(matches!(err, FsError::NotFound(ref p) if p == "/73-Beamline_Run/nope"));
    assert_eq!(i32::from(err), libc::ENOENT);

    let err = fs.attributes("/not-an-experiment/x/y").await.unwrap_err();
    assert!(matches!(err, FsError::NotFound(_)));
}

#[tokio::test]
async fn files_are_not_directories_and_directories_are_not_files() {
    let fs = beamline_fs(MockDescriptors::new().with_file(901, CONTENTS));

    let err = fs.list_directory(SCAN).await.unwrap_err();
    assert_eq!(i32::from(err), libc::ENOTDIR);

    let err = fs.read("/73-Beamline_Run", 10, 0).await.unwrap_err();
    assert_eq!(i32::from(err), libc::EISDIR);
}

#[tokio::test]
async fn reads_return_the_requested_range() {
    let descriptors = MockDescriptors::new().with_file(901, CONTENTS);
    let fs = beamline_fs(descriptors);

    assert_eq!(&fs.read(SCAN, 4, 0).await.unwrap()[..], b"0123");
    assert_eq!(&fs.read(SCAN, 4, 10).await.unwrap()[..], b"abcd");
    // Short only at end of file.
    assert_eq!(&fs.read(SCAN, 100, 12).await.unwrap()[..], b"cdef");
    assert!(fs.read(SCAN, 4, 64).await.unwrap().is_empty());

    assert_eq!(fs.handles().open_count(), 1);
}

#[tokio::test]
async fn refused_descriptor_is_access_denied() {
    let fs = beamline_fs(
        MockDescriptors::new().deny(901, "Access denied for user alice."),
    );

    let err = fs.read(SCAN, 4, 0).await.unwrap_err();
    assert!(matches!(err, FsError::AuthDenied(ref m) if m == "Access denied for user alice."));
    assert_eq!(i32::from(err), libc::EACCES);
    assert_eq!(fs.handles().open_count(), 0);
}

#[tokio::test]
async fn statfs_counts_known_entries() {
    let fs = beamline_fs(MockDescriptors::new());
    assert_eq!(fs.statfs().entries, 1);

    fs.attributes(SCAN).await.unwrap();
    // Root, experiment, dataset and file.
    assert_eq!(fs.statfs().entries, 4);
}
