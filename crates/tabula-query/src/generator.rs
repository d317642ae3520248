//! SQL statement generation from [`Query`] values.
//!
//! Statements use named `:param` placeholders. Parameter names derive from column
//! names and are deduplicated per statement (`:name`, `:name0`, `:name1`, ...).

use crate::clause::Order;
use crate::filter::{Filter, FilterValue};
use crate::query::{Operation, Query, Relation};
use tabula_core::{
    Dialect, EntityMetadata, Instance, PropertyMapping, PropertyValue, Result, Value,
    parameter_name,
};

/// Named parameters collected while generating one statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoundParameters {
    entries: Vec<(String, Value)>,
}

impl BoundParameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `value` under a name derived from `column`, returning the chosen name.
    pub fn bind(&mut self, column: &str, value: Value) -> String {
        let base = parameter_name(column);
        let mut name = base.clone();
        let mut suffix = 0usize;
        while self.contains(&name) {
            name = format!("{}{}", base, suffix);
            suffix += 1;
        }
        self.entries.push((name.clone(), value));
        name
    }

    /// Look up a parameter, with or without its leading `:`.
    pub fn get(&self, name: &str) -> Option<&Value> {
        let name = name.strip_prefix(':').unwrap_or(name);
        self.entries.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn as_slice(&self) -> &[(String, Value)] {
        &self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }
}

/// Value persisted for `mapping` on `instance`.
///
/// A to-one reference persists the referenced object's id, or NULL.
pub fn persisted_value(mapping: &PropertyMapping, instance: &Instance) -> Result<Value> {
    match mapping.get(instance)? {
        PropertyValue::Value(v) => Ok(v),
        PropertyValue::Reference(Some(target)) => Ok(target.object_id()?.unwrap_or(Value::Null)),
        PropertyValue::Reference(None) | PropertyValue::Collection(_) => Ok(Value::Null),
    }
}

/// Compiles queries into statement text plus bound parameters.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatementGenerator {
    dialect: Dialect,
}

impl StatementGenerator {
    pub fn new(dialect: Dialect) -> Self {
        Self { dialect }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Generate the statement for `query`.
    ///
    /// # Panics
    ///
    /// Panics on malformed queries: a Merge tag, a write without an instance, or a
    /// delete with both or neither of an instance and a filter.
    pub fn generate(&self, query: &Query) -> Result<(String, BoundParameters)> {
        let mut params = BoundParameters::new();
        let sql = match query.operation() {
            Operation::Create => {
                let instance = Self::require_instance(query);
                self.generate_insert(instance, &mut params)?
            }
            Operation::Update => {
                let instance = Self::require_instance(query);
                self.generate_update(instance, &mut params)?
            }
            Operation::Read => self.generate_select(query, &mut params)?,
            Operation::Delete => self.generate_delete(query, &mut params)?,
            Operation::Merge => {
                panic!("Merge is not a statement-level operation; resolve it to Create or Update")
            }
        };

        tracing::debug!(
            dialect = self.dialect.name(),
            sql = %sql,
            params = params.len(),
            "Generated statement"
        );

        Ok((sql, params))
    }

    fn require_instance(query: &Query) -> &Instance {
        query.entity_instance().unwrap_or_else(|| {
            panic!(
                "{:?} query on {} has no entity instance",
                query.operation(),
                query.relation().entity().class_name()
            )
        })
    }

    fn require_object_id(metadata: &EntityMetadata) -> &PropertyMapping {
        metadata.object_id_mapping().unwrap_or_else(|| {
            panic!(
                "{} has no object id mapping; instance-bound statements need one",
                metadata.class_name()
            )
        })
    }

    fn quote(&self, name: &str) -> String {
        self.dialect.quote_identifier(name)
    }

    fn placeholder(&self, name: &str) -> String {
        self.dialect.placeholder(name)
    }

    /// `INSERT INTO "T"("a","b") VALUES(:a,:b)` over every persisted,
    /// non-autogenerated mapping.
    pub fn generate_insert(&self, instance: &Instance, params: &mut BoundParameters) -> Result<String> {
        let metadata = instance.metadata();
        let mut columns = Vec::new();
        let mut values = Vec::new();
        for mapping in metadata.property_mappings() {
            if mapping.is_transient() || mapping.is_autogenerated() {
                continue;
            }
            let value = persisted_value(mapping, instance)?;
            columns.push(self.quote(mapping.field_name()));
            let name = params.bind(mapping.field_name(), value);
            values.push(self.placeholder(&name));
        }

        let mut sql = if columns.is_empty() {
            format!("INSERT INTO {} DEFAULT VALUES", self.quote(metadata.table_name()))
        } else {
            format!(
                "INSERT INTO {}({}) VALUES({})",
                self.quote(metadata.table_name()),
                columns.join(","),
                values.join(",")
            )
        };

        if self.dialect.returns_generated_keys() {
            if let Some(id) = metadata.object_id_mapping().filter(|m| m.is_autogenerated()) {
                sql.push_str(&format!(" RETURNING {}", self.quote(id.field_name())));
            }
        }
        Ok(sql)
    }

    /// `UPDATE "T" SET "a" = :a,"b" = :b WHERE "id" = :id`.
    pub fn generate_update(&self, instance: &Instance, params: &mut BoundParameters) -> Result<String> {
        let metadata = instance.metadata();
        let id_mapping = Self::require_object_id(metadata);

        let mut assignments = Vec::new();
        for mapping in metadata.property_mappings() {
            if mapping.is_transient() || mapping.is_object_id() {
                continue;
            }
            let value = persisted_value(mapping, instance)?;
            let name = params.bind(mapping.field_name(), value);
            assignments.push(format!(
                "{} = {}",
                self.quote(mapping.field_name()),
                self.placeholder(&name)
            ));
        }
        if assignments.is_empty() {
            let id = self.quote(id_mapping.field_name());
            assignments.push(format!("{} = {}", id, id));
        }

        let id_value = persisted_value(id_mapping, instance)?;
        let id_name = params.bind(id_mapping.field_name(), id_value);
        Ok(format!(
            "UPDATE {} SET {} WHERE {} = {}",
            self.quote(metadata.table_name()),
            assignments.join(","),
            self.quote(id_mapping.field_name()),
            self.placeholder(&id_name)
        ))
    }

    /// `SELECT * FROM <relation>[ WHERE ...][ ORDER BY ...]`.
    pub fn generate_select(&self, query: &Query, params: &mut BoundParameters) -> Result<String> {
        let mut sql = format!("SELECT * FROM {}", self.generate_from(query.relation(), params)?);
        if let Some(filter) = query.filter() {
            sql.push_str(" WHERE ");
            sql.push_str(&self.generate_condition(filter, params)?);
        }
        if !query.order().is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&self.generate_order(query.order()));
        }
        Ok(sql)
    }

    /// `DELETE FROM "T" WHERE ...`, by bound instance or by filter.
    pub fn generate_delete(&self, query: &Query, params: &mut BoundParameters) -> Result<String> {
        let Relation::Entity(metadata) = query.relation() else {
            panic!("Delete requires an entity relation, not a subquery");
        };
        let table = self.quote(metadata.table_name());

        match (query.entity_instance(), query.filter()) {
            (Some(instance), None) => {
                let id_mapping = Self::require_object_id(metadata);
                let id_value = persisted_value(id_mapping, instance)?;
                let name = params.bind(id_mapping.field_name(), id_value);
                Ok(format!(
                    "DELETE FROM {} WHERE {} = {}",
                    table,
                    self.quote(id_mapping.field_name()),
                    self.placeholder(&name)
                ))
            }
            (None, Some(filter)) => Ok(format!(
                "DELETE FROM {} WHERE {}",
                table,
                self.generate_condition(filter, params)?
            )),
            (Some(_), Some(_)) => {
                panic!("Delete on {} has both an instance and a filter", metadata.class_name())
            }
            (None, None) => {
                panic!("Delete on {} has neither an instance nor a filter", metadata.class_name())
            }
        }
    }

    /// Table name, or a parenthesized subquery sharing the outer parameter map.
    pub fn generate_from(&self, relation: &Relation, params: &mut BoundParameters) -> Result<String> {
        match relation {
            Relation::Entity(metadata) => Ok(self.quote(metadata.table_name())),
            Relation::Query(inner) => {
                if inner.operation() != Operation::Read {
                    panic!("subquery relations must be Read queries");
                }
                Ok(format!("({})", self.generate_select(inner, params)?))
            }
        }
    }

    /// Compile a filter tree into a WHERE condition.
    pub fn generate_condition(&self, filter: &Filter, params: &mut BoundParameters) -> Result<String> {
        match filter {
            Filter::Terminal {
                mapping,
                comparison,
                value,
            } => {
                let bound = match value {
                    FilterValue::Value(v) => v.clone(),
                    FilterValue::Instance(Some(instance)) => {
                        instance.object_id()?.unwrap_or(Value::Null)
                    }
                    FilterValue::Instance(None) => Value::Null,
                };
                let name = params.bind(mapping.field_name(), bound);
                Ok(format!(
                    "{} {} {}",
                    self.quote(mapping.field_name()),
                    comparison.as_str(),
                    self.placeholder(&name)
                ))
            }
            Filter::Binary { lhs, op, rhs } => Ok(format!(
                "({}) {} ({})",
                self.generate_condition(lhs, params)?,
                op.as_str(),
                self.generate_condition(rhs, params)?
            )),
            Filter::Unary { rhs } => Ok(format!("NOT ({})", self.generate_condition(rhs, params)?)),
        }
    }

    pub fn generate_order(&self, order: &[Order]) -> String {
        order
            .iter()
            .map(|o| format!("{} {}", self.quote(o.mapping.field_name()), o.direction.as_str()))
            .collect::<Vec<_>>()
            .join(",")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clause::Order;
    use crate::query::QueryFlags;
    use std::sync::LazyLock;
    use tabula_core::{Entity, EntityRef, entity};

    #[derive(Default)]
    struct Province {
        id: i64,
        name: String,
    }

    #[derive(Default)]
    struct Town {
        id: i64,
        name: String,
        population: i64,
        province: Option<EntityRef<Province>>,
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
            .build()
            .expect("valid metadata")
    });

    static TOWN: LazyLock<EntityMetadata> = LazyLock::new(|| {
        EntityMetadata::builder::<Town>("Town")
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

    fn prop(name: &str) -> &'static PropertyMapping {
        Town::metadata().property(name).unwrap()
    }

    fn sqlite() -> StatementGenerator {
        StatementGenerator::new(Dialect::Sqlite)
    }

    fn town_in(province_id: i64) -> Instance {
        let province = entity(Province {
            id: province_id,
            name: "Vestland".into(),
        });
        Instance::new(Town {
            id: 0,
            name: "X".into(),
            population: 10,
            province: Some(province),
        })
    }

    #[test]
    fn insert_skips_autogenerated_and_binds_reference_id() {
        let (sql, params) = sqlite().generate(&Query::create(town_in(5))).unwrap();
        assert_eq!(
            sql,
            "INSERT INTO \"Town\"(\"name\",\"population\",\"province_id\") VALUES(:name,:population,:province_id)"
        );
        assert_eq!(params.get(":province_id"), Some(&Value::BigInt(5)));
        assert_eq!(params.get("name"), Some(&Value::Text("X".into())));
        assert!(!params.contains("id"));
    }

    #[test]
    fn insert_returning_for_postgres() {
        let generator = StatementGenerator::new(Dialect::Postgres);
        let (sql, _) = generator.generate(&Query::create(town_in(5))).unwrap();
        assert!(sql.ends_with(" RETURNING \"id\""));
    }

    #[test]
    fn insert_shares_parameter_map() {
        let instance = Instance::new(Province::default());
        let mut params = BoundParameters::new();
        params.bind("name", Value::Text("outer".into()));
        let sql = sqlite().generate_insert(&instance, &mut params).unwrap();
        assert_eq!(sql, "INSERT INTO \"Province\"(\"name\") VALUES(:name0)");
        assert_eq!(params.get("name0"), Some(&Value::Text(String::new())));
    }

    #[test]
    fn update_sets_everything_but_the_id() {
        let town = town_in(7);
        town.set_object_id(Value::BigInt(3)).unwrap();
        let (sql, params) = sqlite().generate(&Query::update(town)).unwrap();
        assert_eq!(
            sql,
            "UPDATE \"Town\" SET \"name\" = :name,\"population\" = :population,\"province_id\" = :province_id WHERE \"id\" = :id"
        );
        assert_eq!(params.get("id"), Some(&Value::BigInt(3)));
        assert_eq!(params.len(), 4);
    }

    #[test]
    fn single_terminal_predicate() {
        let query = Query::read(Town::metadata()).with_filter(Filter::eq(prop("name"), "X"));
        let (sql, params) = sqlite().generate(&query).unwrap();
        assert_eq!(sql, "SELECT * FROM \"Town\" WHERE \"name\" = :name");
        assert_eq!(params.len(), 1);
    }

    #[test]
    fn negated_conjunction_keeps_grouping() {
        let a = Filter::eq(prop("name"), "X");
        let b = Filter::gt(prop("population"), 100);
        let query = Query::read(Town::metadata()).with_filter(a.and(b).not());
        let (sql, _) = sqlite().generate(&query).unwrap();
        assert_eq!(
            sql,
            "SELECT * FROM \"Town\" WHERE NOT ((\"name\" = :name) AND (\"population\" > :population))"
        );
    }

    #[test]
    fn repeated_fields_get_distinct_parameters() {
        let filter = Filter::ge(prop("population"), 10)
            .and(Filter::le(prop("population"), 20))
            .or(Filter::ne(prop("population"), 15));
        let query = Query::read(Town::metadata()).with_filter(filter);
        let (sql, params) = sqlite().generate(&query).unwrap();
        assert_eq!(
            sql,
            "SELECT * FROM \"Town\" WHERE ((\"population\" >= :population) AND (\"population\" <= :population0)) OR (\"population\" <> :population1)"
        );
        assert_eq!(params.get("population0"), Some(&Value::Int(20)));
        assert_eq!(params.get("population1"), Some(&Value::Int(15)));
    }

    #[test]
    fn reference_predicate_binds_referenced_id() {
        let province = entity(Province {
            id: 42,
            name: "Nordland".into(),
        });
        let query =
            Query::read(Town::metadata()).with_filter(Filter::eq(prop("province"), &province));
        let (sql, params) = sqlite().generate(&query).unwrap();
        assert_eq!(sql, "SELECT * FROM \"Town\" WHERE \"province_id\" = :province_id");
        assert_eq!(params.get("province_id"), Some(&Value::BigInt(42)));
    }

    #[test]
    fn subquery_and_order() {
        let inner = Query::read(Town::metadata()).with_filter(Filter::lt(prop("population"), 5));
        let outer = Query::read_from(inner)
            .with_filter(Filter::eq(prop("name"), "Y"))
            .with_order(Order::asc(prop("name")))
            .with_order(Order::desc(prop("population")))
            .with_flags(QueryFlags::OVERWRITE_CACHED_INSTANCES);
        let (sql, params) = sqlite().generate(&outer).unwrap();
        assert_eq!(
            sql,
            "SELECT * FROM (SELECT * FROM \"Town\" WHERE \"population\" < :population) WHERE \"name\" = :name ORDER BY \"name\" ASC,\"population\" DESC"
        );
        assert_eq!(params.len(), 2);
        assert_eq!(outer.projection().unwrap().class_name(), "Town");
    }

    #[test]
    fn delete_by_instance_and_by_filter() {
        let town = town_in(1);
        town.set_object_id(Value::BigInt(9)).unwrap();
        let (sql, params) = sqlite().generate(&Query::delete(town)).unwrap();
        assert_eq!(sql, "DELETE FROM \"Town\" WHERE \"id\" = :id");
        assert_eq!(params.get("id"), Some(&Value::BigInt(9)));

        let query = Query::delete_where(Town::metadata(), Filter::eq(prop("name"), "Z"));
        let (sql, _) = sqlite().generate(&query).unwrap();
        assert_eq!(sql, "DELETE FROM \"Town\" WHERE \"name\" = :name");
    }

    #[test]
    #[should_panic(expected = "neither an instance nor a filter")]
    fn delete_without_target_is_fatal() {
        let query = Query::new(Operation::Delete, Relation::Entity(Town::metadata()));
        let _ = sqlite().generate(&query);
    }

    #[test]
    #[should_panic(expected = "Merge is not a statement-level operation")]
    fn merge_is_fatal() {
        let _ = sqlite().generate(&Query::merge(town_in(1)));
    }
}
