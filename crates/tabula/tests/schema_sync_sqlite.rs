mod common;

use common::{Province, Town, column_names, raw_rows, session, session_with};
use tabula::prelude::*;

const MATCHING_SCHEMA: &str = "
    CREATE TABLE \"Province\"(\"id\" INTEGER PRIMARY KEY AUTOINCREMENT,\"name\" TEXT);
    CREATE TABLE \"town\"(\"id\" INTEGER PRIMARY KEY AUTOINCREMENT,\"name\" TEXT,
        \"population\" INTEGER,\"province_id\" INTEGER REFERENCES \"Province\"(\"id\"));
    INSERT INTO \"Province\"(\"name\") VALUES('Agder');
";

const TOWNS_WITHOUT_POPULATION: &str = "
    CREATE TABLE \"Province\"(\"id\" INTEGER PRIMARY KEY AUTOINCREMENT,\"name\" TEXT);
    CREATE TABLE \"town\"(\"id\" INTEGER PRIMARY KEY AUTOINCREMENT,\"name\" TEXT,
        \"province_id\" INTEGER REFERENCES \"Province\"(\"id\"));
    INSERT INTO \"Province\"(\"name\") VALUES('Agder');
    INSERT INTO \"town\"(\"name\",\"province_id\") VALUES('Arendal',1),('Grimstad',1);
";

fn assert_towns_read_back(session: &mut Session<SqliteBackend>) {
    let towns = session.read::<Town>(None).unwrap();
    assert_eq!(towns.len(), 2);
    assert_eq!(towns[0].read().name, "Arendal");
    assert_eq!(towns[1].read().name, "Grimstad");
    for town in &towns {
        assert_eq!(town.read().population, 0);
        let province = town.read().province.clone().unwrap();
        assert_eq!(province.read().name, "Agder");
    }
}

#[test]
fn recreate_drops_existing_rows() {
    let mut session = session_with(SchemaMode::Recreate, MATCHING_SCHEMA);
    assert!(session.read::<Province>(None).unwrap().is_empty());
    assert_eq!(column_names(&mut session, "Province"), ["id", "name"]);
    assert_eq!(
        column_names(&mut session, "town"),
        ["id", "name", "population", "province_id"]
    );
}

#[test]
fn bypass_never_touches_the_schema() {
    let mut session = session(SchemaMode::Bypass);
    let err = session.read::<Province>(None).err().expect("read without a table fails");
    assert_eq!(err.kind(), ErrorKind::Provider);
    assert!(err.message().contains("no such table"));
}

#[test]
fn update_keeps_matching_tables() {
    let mut session = session_with(SchemaMode::Update, MATCHING_SCHEMA);
    let provinces = session.read::<Province>(None).unwrap();
    assert_eq!(provinces.len(), 1);
    assert_eq!(provinces[0].read().name, "Agder");
}

#[test]
fn update_rebuilds_mismatched_tables_and_preserves_rows() {
    let mut session = session_with(
        SchemaMode::Update,
        "CREATE TABLE \"Province\"(\"id\" INTEGER PRIMARY KEY AUTOINCREMENT,\"name\" TEXT,\"code\" INTEGER);
         INSERT INTO \"Province\"(\"name\",\"code\") VALUES('Agder',42),('Vestland',46);",
    );

    let provinces = session.read::<Province>(None).unwrap();
    assert_eq!(provinces.len(), 2);
    assert_eq!(provinces[0].read().id, 1);
    assert_eq!(provinces[0].read().name, "Agder");
    assert_eq!(provinces[1].read().name, "Vestland");

    assert_eq!(column_names(&mut session, "Province"), ["id", "name"]);
    assert_eq!(
        column_names(&mut session, "town"),
        ["id", "name", "population", "province_id"]
    );
    let tables = raw_rows(
        &mut session,
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name LIKE 'Province_%'",
    );
    assert!(tables.is_empty(), "shadow table left behind");
}

#[test]
fn update_keeps_autoincrement_going_after_rebuild() {
    let mut session = session_with(
        SchemaMode::Update,
        "CREATE TABLE \"Province\"(\"id\" INTEGER PRIMARY KEY AUTOINCREMENT,\"name\" TEXT,\"code\" INTEGER);
         INSERT INTO \"Province\"(\"name\",\"code\") VALUES('Agder',42);",
    );
    let rogaland = entity(Province {
        name: "Rogaland".into(),
        ..Default::default()
    });
    session.merge(&rogaland).unwrap();
    assert_eq!(rogaland.read().id, 2);
    assert_eq!(session.read::<Province>(None).unwrap().len(), 2);
}

#[test]
fn update_adds_a_missing_column_and_rows_stay_readable() {
    let mut session = session_with(SchemaMode::Update, TOWNS_WITHOUT_POPULATION);
    assert_towns_read_back(&mut session);
    assert_eq!(
        column_names(&mut session, "town"),
        ["id", "name", "population", "province_id"]
    );
    let populations = raw_rows(&mut session, "SELECT \"population\" FROM \"town\"");
    assert!(populations.iter().all(|row| row.get(0) == Some(&Value::Null)));
}

#[test]
fn update_keeps_data_of_a_retyped_column() {
    let mut session = session_with(
        SchemaMode::Update,
        "CREATE TABLE \"Province\"(\"id\" INTEGER PRIMARY KEY AUTOINCREMENT,\"name\" BLOB);
         INSERT INTO \"Province\"(\"name\") VALUES('Agder');",
    );
    let provinces = session.read::<Province>(None).unwrap();
    assert_eq!(provinces.len(), 1);
    assert_eq!(provinces[0].read().name, "Agder");
    let rows = raw_rows(&mut session, "SELECT \"name\" FROM \"Province\"");
    assert_eq!(rows[0].get(0), Some(&Value::Text("Agder".into())));
}

#[test]
fn append_adds_a_missing_column_and_rows_stay_readable() {
    let mut session = session_with(SchemaMode::Append, TOWNS_WITHOUT_POPULATION);
    assert_towns_read_back(&mut session);
    assert_eq!(
        column_names(&mut session, "town"),
        ["id", "name", "province_id", "population"]
    );
}

#[test]
fn validate_reports_every_mismatch_without_writing() {
    let mut session = session_with(
        SchemaMode::Validate,
        "CREATE TABLE \"Province\"(\"id\" INTEGER PRIMARY KEY,\"title\" TEXT,\"name\" BLOB);",
    );

    let err = session.read::<Province>(None).err().expect("validation fails");
    assert_eq!(err.kind(), ErrorKind::UnsynchronizedSchema);
    let Error::UnsynchronizedSchema(details) = &err else {
        panic!("unexpected error: {err:?}");
    };
    assert_eq!(details.table, "Province");
    assert_eq!(details.mismatches.len(), 2);
    assert!(details.mismatches.iter().any(|m| m.contains("title")));
    assert!(details.mismatches.iter().any(|m| m.contains("name")));
    assert_eq!(session.last_error_kind(), ErrorKind::UnsynchronizedSchema);

    assert_eq!(column_names(&mut session, "Province"), ["id", "title", "name"]);
    assert!(column_names(&mut session, "town").is_empty());
}

#[test]
fn validate_accepts_a_matching_schema() {
    let mut session = session_with(SchemaMode::Validate, MATCHING_SCHEMA);
    assert_eq!(session.read::<Town>(None).unwrap().len(), 0);
    assert_eq!(session.read::<Province>(None).unwrap().len(), 1);
}

#[test]
fn append_only_adds() {
    let mut session = session_with(
        SchemaMode::Append,
        "CREATE TABLE \"Province\"(\"id\" INTEGER PRIMARY KEY AUTOINCREMENT,\"legacy\" TEXT);
         INSERT INTO \"Province\"(\"legacy\") VALUES('keep me');",
    );

    session.provider_mut().synchronize(Province::metadata()).unwrap();

    assert_eq!(column_names(&mut session, "Province"), ["id", "legacy", "name"]);
    assert_eq!(
        column_names(&mut session, "town"),
        ["id", "name", "population", "province_id"]
    );
    let rows = raw_rows(&mut session, "SELECT \"legacy\",\"name\" FROM \"Province\"");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get(0), Some(&Value::Text("keep me".into())));
    assert_eq!(rows[0].get(1), Some(&Value::Null));

    let provinces = session.read::<Province>(None).unwrap();
    assert_eq!(provinces.len(), 1);
    assert_eq!(provinces[0].read().name, "");
}

#[test]
fn schema_is_checked_once_per_provider() {
    let mut session = session(SchemaMode::Recreate);
    let agder = entity(Province {
        name: "Agder".into(),
        ..Default::default()
    });
    session.merge(&agder).unwrap();
    // A second Recreate pass would empty the table.
    assert_eq!(session.read::<Province>(None).unwrap().len(), 1);
    assert_eq!(session.read::<Town>(None).unwrap().len(), 0);
    assert_eq!(session.read::<Province>(None).unwrap().len(), 1);
}
