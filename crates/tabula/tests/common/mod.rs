#![allow(dead_code)]

use tabula::prelude::*;
use tabula::{Row, SqlBackend, SqliteConfig};

#[derive(Default)]
pub struct Province {
    pub id: i64,
    pub name: String,
    pub towns: Vec<EntityRef<Town>>,
}

#[derive(Default)]
pub struct Town {
    pub id: i64,
    pub name: String,
    pub population: i64,
    pub province: Option<EntityRef<Province>>,
}

static PROVINCE: LazyLock<EntityMetadata> = LazyLock::new(|| {
    EntityMetadata::builder::<Province>("Province")
        .property(
            PropertyMapping::column("id", |p: &Province| p.id, |p: &mut Province, v| p.id = v)
                .object_id()
                .autogenerated(),
        )
        .property(PropertyMapping::column(
            "name",
            |p: &Province| p.name.clone(),
            |p: &mut Province, v| p.name = v,
        ))
        .property(PropertyMapping::collection(
            "towns",
            "province",
            |p: &Province| p.towns.clone(),
            |p: &mut Province, v: Vec<EntityRef<Town>>| p.towns = v,
        ))
        .build()
        .expect("valid province metadata")
});

static TOWN: LazyLock<EntityMetadata> = LazyLock::new(|| {
    EntityMetadata::builder::<Town>("Town")
        .table("town")
        .property(
            PropertyMapping::column("id", |t: &Town| t.id, |t: &mut Town, v| t.id = v)
                .object_id()
                .autogenerated(),
        )
        .property(PropertyMapping::column(
            "name",
            |t: &Town| t.name.clone(),
            |t: &mut Town, v| t.name = v,
        ))
        .property(PropertyMapping::column(
            "population",
            |t: &Town| t.population,
            |t: &mut Town, v| t.population = v,
        ))
        .property(PropertyMapping::reference(
            "province",
            |t: &Town| t.province.clone(),
            |t: &mut Town, v| t.province = v,
        ))
        .build()
        .expect("valid town metadata")
});

impl Entity for Province {
    fn metadata() -> &'static EntityMetadata {
        &PROVINCE
    }
}

impl Entity for Town {
    fn metadata() -> &'static EntityMetadata {
        &TOWN
    }
}

pub fn province(name: &str) -> EntityRef<Province> {
    entity(Province {
        name: name.into(),
        ..Default::default()
    })
}

pub fn town(name: &str, population: i64, province: &EntityRef<Province>) -> EntityRef<Town> {
    let town = entity(Town {
        name: name.into(),
        population,
        province: Some(province.clone()),
        ..Default::default()
    });
    province.write().towns.push(town.clone());
    town
}

/// Fresh in-memory session in `mode`.
pub fn session(mode: SchemaMode) -> Session<SqliteBackend> {
    sqlite_session(ProviderConfiguration::new(":memory:").schema_mode(mode))
}

/// Open in-memory database prepared with `setup`, wrapped in a session in `mode`.
pub fn session_with(mode: SchemaMode, setup: &str) -> Session<SqliteBackend> {
    let mut backend = SqliteBackend::new(SqliteConfig::memory());
    backend.open().expect("open in-memory database");
    backend.execute_raw(setup).expect("run setup script");
    Session::with_backend(
        backend,
        ProviderConfiguration::new(":memory:").schema_mode(mode),
    )
}

/// Run `sql` straight on the session's backend.
pub fn raw_rows(session: &mut Session<SqliteBackend>, sql: &str) -> Vec<Row> {
    session
        .provider_mut()
        .backend_mut()
        .query(sql, &[])
        .expect("raw query")
}

pub fn raw_exec(session: &mut Session<SqliteBackend>, sql: &str) {
    session
        .provider_mut()
        .backend_mut()
        .execute_raw(sql)
        .expect("raw statement");
}

pub fn column_names(session: &mut Session<SqliteBackend>, table: &str) -> Vec<String> {
    session
        .provider_mut()
        .backend_mut()
        .record(table)
        .expect("table info")
        .into_iter()
        .map(|c| c.name)
        .collect()
}
