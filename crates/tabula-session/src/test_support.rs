//! Entities and a recording backend shared by the unit tests of this crate.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::rc::Rc;
use std::sync::LazyLock;
use tabula_core::{
    ColumnDescriptor, Dialect, Entity, EntityMetadata, EntityRef, Error, ExecuteOutcome, Params,
    PropertyMapping, Result, Row, SqlBackend, Value,
};

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

pub fn province_row(id: i64, name: &str) -> Row {
    Row::new(
        vec!["id".into(), "name".into()],
        vec![Value::BigInt(id), Value::Text(name.into())],
    )
}

pub fn town_row(id: i64, name: &str, province: Option<i64>) -> Row {
    Row::new(
        vec!["id".into(), "name".into(), "province_id".into()],
        vec![
            Value::BigInt(id),
            Value::Text(name.into()),
            province.map_or(Value::Null, Value::BigInt),
        ],
    )
}

#[derive(Debug, Default)]
pub struct MockState {
    pub open: bool,
    pub statements: Vec<String>,
    pub begins: usize,
    pub commits: usize,
    pub rollbacks: usize,
    /// Results handed out by `query`, front first; empty means no rows
    pub rows: VecDeque<Vec<Row>>,
    /// Results handed out by `execute`, front first; empty means one row affected
    pub outcomes: VecDeque<Result<ExecuteOutcome>>,
    pub next_id: i64,
    pub tables: BTreeMap<String, Vec<ColumnDescriptor>>,
    pub fail_begin: bool,
    pub foreign_keys: bool,
}

/// Backend that records statements and replays queued results.
#[derive(Debug, Clone, Default)]
pub struct MockBackend {
    pub state: Rc<RefCell<MockState>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_rows(&self, rows: Vec<Row>) {
        self.state.borrow_mut().rows.push_back(rows);
    }

    pub fn push_outcome(&self, outcome: Result<ExecuteOutcome>) {
        self.state.borrow_mut().outcomes.push_back(outcome);
    }

    pub fn statements(&self) -> Vec<String> {
        self.state.borrow().statements.clone()
    }

    pub fn clear_statements(&self) {
        self.state.borrow_mut().statements.clear();
    }
}

impl SqlBackend for MockBackend {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn open(&mut self) -> Result<()> {
        self.state.borrow_mut().open = true;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.state.borrow_mut().open = false;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.state.borrow().open
    }

    fn query(&mut self, sql: &str, _params: &Params) -> Result<Vec<Row>> {
        let mut state = self.state.borrow_mut();
        state.statements.push(sql.to_string());
        Ok(state.rows.pop_front().unwrap_or_default())
    }

    fn execute(&mut self, sql: &str, _params: &Params) -> Result<ExecuteOutcome> {
        let mut state = self.state.borrow_mut();
        state.statements.push(sql.to_string());
        if let Some(outcome) = state.outcomes.pop_front() {
            return outcome;
        }
        let last_insert_id = if sql.starts_with("INSERT") {
            state.next_id += 1;
            Some(Value::BigInt(state.next_id))
        } else {
            None
        };
        Ok(ExecuteOutcome {
            rows_affected: 1,
            last_insert_id,
        })
    }

    fn begin(&mut self) -> Result<()> {
        let mut state = self.state.borrow_mut();
        if state.fail_begin {
            return Err(Error::provider("cannot start a transaction"));
        }
        state.begins += 1;
        state.statements.push("BEGIN".into());
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.commits += 1;
        state.statements.push("COMMIT".into());
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.rollbacks += 1;
        state.statements.push("ROLLBACK".into());
        Ok(())
    }

    fn last_error(&self) -> Option<String> {
        None
    }

    fn tables(&mut self) -> Result<BTreeSet<String>> {
        Ok(self.state.borrow().tables.keys().cloned().collect())
    }

    fn record(&mut self, table: &str) -> Result<Vec<ColumnDescriptor>> {
        Ok(self
            .state
            .borrow()
            .tables
            .get(table)
            .cloned()
            .unwrap_or_default())
    }

    fn foreign_keys_enabled(&mut self) -> Result<bool> {
        Ok(self.state.borrow().foreign_keys)
    }

    fn set_foreign_keys_enabled(&mut self, enabled: bool) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.foreign_keys = enabled;
        state
            .statements
            .push(format!("PRAGMA foreign_keys = {}", if enabled { "ON" } else { "OFF" }));
        Ok(())
    }
}
