use cildata_util::db::{SqliteStatusStore, StatusStore};
use cildata_util::record::DataFileRecord;

fn store_with_data_type_rows() -> SqliteStatusStore {
    let store = SqliteStatusStore::open_in_memory().unwrap();
    store
        .connection()
        .execute_batch(
            "CREATE TABLE cil_data_type (
                 image_id  TEXT,
                 is_video  BOOLEAN,
                 has_raw   BOOLEAN,
                 is_public BOOLEAN
             );
             INSERT INTO cil_data_type VALUES ('CIL_12', 1, NULL, 1);
             INSERT INTO cil_data_type VALUES ('CIL_5',  0, 0,    1);
             INSERT INTO cil_data_type VALUES ('CIL_3',  0, 1,    1);
             INSERT INTO cil_data_type VALUES ('CIL_99', 0, 1,    0);",
        )
        .unwrap();
    store
}

#[test]
fn public_datasets_ascending_with_flags() {
    let store = store_with_data_type_rows();
    let records = store.public_datasets(None).unwrap();

    let ids: Vec<_> = records.iter().map(|r| r.id()).collect();
    assert_eq!(ids, vec![3, 5, 12]);

    assert_eq!(records[0].is_video, Some(false));
    assert_eq!(records[0].has_raw, Some(true));
    assert_eq!(records[1].has_raw, Some(false));
    assert_eq!(records[2].is_video, Some(true));
    assert_eq!(records[2].has_raw, None);
}

#[test]
fn public_datasets_scoped_to_one_id() {
    let store = store_with_data_type_rows();
    let records = store.public_datasets(Some(5)).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].id(), 5);

    // non-public ids are invisible even when asked for directly
    assert!(store.public_datasets(Some(99)).unwrap().is_empty());
}

#[test]
fn insert_status_assigns_sequential_row_ids() {
    let store = SqliteStatusStore::open_in_memory().unwrap();

    let mut first = DataFileRecord::new(42);
    first.is_video = Some(false);
    first.file_name = Some("42.tif".to_string());
    first.download_success = Some(true);
    first.download_time = Some(1445412480);
    first.checksum = Some("abc123".to_string());
    first.mime_type = Some("image/tiff".to_string());
    first.file_size = Some(2048);
    store.insert_status(&first).unwrap();

    let mut second = DataFileRecord::new(42);
    second.file_name = Some("42.jpg".to_string());
    store.insert_status(&second).unwrap();

    let rows: Vec<(i64, i64, String, bool, i64, bool, String, i64, Option<String>)> = store
        .connection()
        .prepare(
            "SELECT id, image_id, file_name, download_success, download_time,
                    checksum, mime_type, num_of_bytes, checksum_value
             FROM cil_download_status ORDER BY id",
        )
        .unwrap()
        .query_map([], |row| {
            Ok((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
                row.get(5)?,
                row.get(6)?,
                row.get(7)?,
                row.get(8)?,
            ))
        })
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();

    assert_eq!(rows.len(), 2);
    let (id, image_id, file_name, success, time, has_checksum, mime, bytes, checksum) = &rows[0];
    assert_eq!(*id, 1);
    assert_eq!(*image_id, 42);
    assert_eq!(file_name, "42.tif");
    assert!(*success);
    assert_eq!(*time, 1445412480);
    assert!(*has_checksum);
    assert_eq!(mime, "image/tiff");
    assert_eq!(*bytes, 2048);
    assert_eq!(checksum.as_deref(), Some("abc123"));

    // the sparse record falls back to the table's defaults
    let (id, _, file_name, success, _, has_checksum, mime, bytes, checksum) = &rows[1];
    assert_eq!(*id, 2);
    assert_eq!(file_name, "42.jpg");
    assert!(!*success);
    assert!(!*has_checksum);
    assert_eq!(mime, "application/octet-stream");
    assert_eq!(*bytes, 0);
    assert_eq!(checksum.as_deref(), None);
}
