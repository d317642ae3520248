//! Province/Town entities shared by the unit tests of this crate.

use std::sync::LazyLock;
use tabula_core::{Entity, EntityMetadata, EntityRef, PropertyMapping};

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
        .expect("valid metadata")
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
        .property(PropertyMapping::reference(
            "province",
            |t: &Town| t.province.clone(),
            |t: &mut Town, v| t.province = v,
        ))
        .build()
        .expect("valid metadata")
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
