mod common;

use std::fs;

use camino::Utf8PathBuf;

use cildata_util::app::{self, DownloadOptions};
use cildata_util::codec;
use cildata_util::config::Endpoints;
use cildata_util::layout::ArchiveLayout;
use cildata_util::record::DataFileRecord;

use common::{MockFetcher, MockStore, seed};

fn layout_in(temp: &tempfile::TempDir) -> ArchiveLayout {
    ArchiveLayout::new(Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap())
}

#[test]
fn download_walks_every_public_dataset() {
    let temp = tempfile::tempdir().unwrap();
    let layout = layout_in(&temp);
    let store = MockStore::new(vec![seed(5, false, Some(true)), seed(8, true, None)]);
    let fetcher = MockFetcher::new();
    let options = DownloadOptions::default();

    let summary =
        app::run_download(&store, &fetcher, &Endpoints::default(), &layout, &options).unwrap();
    assert_eq!(summary.attempted, 6);
    assert_eq!(summary.batches_written, 2);
    assert!(layout.batch_path(false, 5).as_std_path().is_file());
    assert!(layout.batch_path(true, 8).as_std_path().is_file());
}

#[test]
fn skip_if_exists_leaves_present_datasets_alone() {
    let temp = tempfile::tempdir().unwrap();
    let layout = layout_in(&temp);
    fs::create_dir_all(layout.dataset_dir(false, 5).as_std_path()).unwrap();

    let store = MockStore::new(vec![seed(5, false, None), seed(8, false, None)]);
    let fetcher = MockFetcher::new();
    let options = DownloadOptions {
        skip_if_exists: true,
        ..DownloadOptions::default()
    };

    let summary =
        app::run_download(&store, &fetcher, &Endpoints::default(), &layout, &options).unwrap();
    assert_eq!(summary.attempted, 3);
    assert!(!layout.batch_path(false, 5).as_std_path().is_file());
    assert!(layout.batch_path(false, 8).as_std_path().is_file());
}

#[test]
fn retry_failed_replays_only_unfinished_records() {
    let temp = tempfile::tempdir().unwrap();
    let layout = layout_in(&temp);

    // a persisted batch where only the jpg has succeeded
    let dir = layout.ensure_dataset_dir(false, 5).unwrap();
    let mut done = DataFileRecord::new(5);
    done.is_video = Some(false);
    done.file_name = Some("5.jpg".to_string());
    done.download_success = Some(true);
    done.checksum = Some("jpg-checksum".to_string());
    let mut pending = DataFileRecord::new(5);
    pending.is_video = Some(false);
    pending.file_name = Some("5.tif".to_string());
    pending.download_success = Some(false);
    codec::write_records(
        layout.batch_path(false, 5).as_std_path(),
        &[done, pending],
    )
    .unwrap();

    let store = MockStore::new(Vec::new());
    let fetcher = MockFetcher::new();
    let options = DownloadOptions {
        retry_failed: true,
        ..DownloadOptions::default()
    };

    let summary =
        app::run_download(&store, &fetcher, &Endpoints::default(), &layout, &options).unwrap();
    assert_eq!(summary.attempted, 1);
    assert_eq!(summary.succeeded, 1);
    assert!(dir.join("5.tif").as_std_path().is_file());
    assert!(!dir.join("5.jpg").as_std_path().is_file());

    // the successful record survives the rewrite with its metadata intact,
    // and the prior batch was backed up first
    assert!(dir.join("5.json.bk.0").as_std_path().is_file());
    let batch = codec::read_records(layout.batch_path(false, 5).as_std_path()).unwrap();
    let names: Vec<_> = batch.iter().filter_map(|r| r.file_name()).collect();
    assert_eq!(names, vec!["5.jpg", "5.tif"]);
    assert_eq!(batch[0].download_success, Some(true));
    assert_eq!(batch[0].checksum.as_deref(), Some("jpg-checksum"));
    assert_eq!(batch[1].download_success, Some(true));
    assert!(batch[1].checksum.is_some());
}

#[test]
fn check_downloads_files_missing_from_disk() {
    let temp = tempfile::tempdir().unwrap();
    let dataset_dir = temp.path().join("4");
    fs::create_dir_all(&dataset_dir).unwrap();

    let mut tif = DataFileRecord::new(4);
    tif.is_video = Some(false);
    tif.file_name = Some("4.tif".to_string());
    tif.download_success = Some(true);
    fs::write(dataset_dir.join("4.tif"), b"already here").unwrap();
    codec::write_records(&dataset_dir.join("4.json"), &[tif]).unwrap();

    let fetcher = MockFetcher::new();
    let endpoints = Endpoints::default();
    let downloads = app::run_check(&fetcher, &endpoints, &dataset_dir, false).unwrap();
    assert_eq!(downloads, 2);

    // landing page hit once, before the first download
    assert_eq!(fetcher.page_loads(), vec![endpoints.landing_url(4)]);
    assert!(dataset_dir.join("4.jpg").is_file());
    assert!(dataset_dir.join("4.raw").is_file());
    assert_eq!(fs::read(dataset_dir.join("4.tif")).unwrap(), b"already here");

    // the rewritten batch now covers every expected suffix, original backed up
    assert!(dataset_dir.join("4.json.bk.0").is_file());
    let batch = codec::read_records(&dataset_dir.join("4.json")).unwrap();
    let names: Vec<_> = batch.iter().filter_map(|r| r.file_name()).collect();
    assert_eq!(names, vec!["4.tif", "4.jpg", "4.raw"]);
}

#[test]
fn check_dry_run_changes_nothing() {
    let temp = tempfile::tempdir().unwrap();
    let dataset_dir = temp.path().join("4");
    fs::create_dir_all(&dataset_dir).unwrap();

    let mut tif = DataFileRecord::new(4);
    tif.is_video = Some(false);
    tif.file_name = Some("4.tif".to_string());
    codec::write_records(&dataset_dir.join("4.json"), &[tif]).unwrap();

    let fetcher = MockFetcher::new();
    let downloads = app::run_check(&fetcher, &Endpoints::default(), &dataset_dir, true).unwrap();
    assert_eq!(downloads, 0);
    assert!(fetcher.page_loads().is_empty());
    assert!(!dataset_dir.join("4.tif").is_file());
    assert!(!dataset_dir.join("4.json.bk.0").is_file());
    assert_eq!(codec::read_records(&dataset_dir.join("4.json")).unwrap().len(), 1);
}

#[test]
fn update_db_inserts_rows_and_skips_known_no_raw() {
    let temp = tempfile::tempdir().unwrap();
    let layout = layout_in(&temp);
    layout.ensure_dataset_dir(false, 5).unwrap();

    let mut jpg = DataFileRecord::new(5);
    jpg.is_video = Some(false);
    jpg.file_name = Some("5.jpg".to_string());
    jpg.has_raw = Some(false);
    let mut raw = DataFileRecord::new(5);
    raw.is_video = Some(false);
    raw.file_name = Some("5.raw".to_string());
    raw.has_raw = Some(false);
    codec::write_records(layout.batch_path(false, 5).as_std_path(), &[jpg, raw]).unwrap();

    let store = MockStore::new(Vec::new());
    let inserted = app::run_update_db(&store, &layout, None).unwrap();
    assert_eq!(inserted, 1);
    let rows = store.inserted_records();
    assert_eq!(rows[0].file_name(), Some("5.jpg"));
}

#[test]
fn fix_json_flattens_headers_and_fills_sizes() {
    let temp = tempfile::tempdir().unwrap();
    let json_path = temp.path().join("1.json");
    let entry = r#"{"py/object": "cildata_util.dbutil.CILDataFile", "_id": 1, "_file_name": "1.jpg", "_download_success": true, "_headers": [["Content-Type", "image/jpeg"]]}"#;
    let document = serde_json::to_string(&vec![entry]).unwrap();
    fs::write(&json_path, document).unwrap();
    fs::write(temp.path().join("1.jpg"), b"12345").unwrap();

    assert!(app::run_fix_json(&json_path).unwrap());
    assert!(temp.path().join("1.json.bk.0").is_file());

    let repaired = codec::read_records(&json_path).unwrap();
    assert_eq!(repaired[0].file_size, Some(5));
    let headers = repaired[0].headers.as_ref().unwrap();
    assert_eq!(headers.get("Content-Type").map(String::as_str), Some("image/jpeg"));

    // a second pass finds nothing left to repair
    assert!(!app::run_fix_json(&json_path).unwrap());
    assert!(!temp.path().join("1.json.bk.1").is_file());
}

#[test]
fn update_has_raw_reconciles_batches_with_the_database() {
    let temp = tempfile::tempdir().unwrap();
    let layout = layout_in(&temp);
    layout.ensure_dataset_dir(false, 5).unwrap();
    layout.ensure_dataset_dir(false, 6).unwrap();

    let mut stale = DataFileRecord::new(5);
    stale.is_video = Some(false);
    stale.file_name = Some("5.raw".to_string());
    stale.has_raw = None;
    codec::write_records(layout.batch_path(false, 5).as_std_path(), &[stale]).unwrap();

    let mut current = DataFileRecord::new(6);
    current.is_video = Some(false);
    current.file_name = Some("6.raw".to_string());
    current.has_raw = Some(true);
    codec::write_records(layout.batch_path(false, 6).as_std_path(), &[current]).unwrap();

    let store = MockStore::new(vec![seed(5, false, Some(false)), seed(6, false, Some(true))]);
    let rewritten = app::run_update_has_raw(&store, &layout, None).unwrap();
    assert_eq!(rewritten, 1);

    let batch = codec::read_records(layout.batch_path(false, 5).as_std_path()).unwrap();
    assert_eq!(batch[0].has_raw, Some(false));
    // the already-correct batch was not rewritten
    assert!(!layout
        .dataset_dir(false, 6)
        .join("6.json.bk.0")
        .as_std_path()
        .is_file());
}
