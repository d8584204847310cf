//! Sharding metadata consumed by the plan builder.
//!
//! The builder only needs lookups, so the capability is the [`VSchema`]
//! trait. [`StaticVSchema`] is an immutable implementation loaded from the
//! gateway's JSON vschema document.

use std::collections::BTreeMap;
use std::sync::Arc;

use meridian_common::error::{PlanError, PlanResult};
use meridian_sql_frontend::ast::{Ident, TableName};
use serde::{Deserialize, Serialize};

use crate::evalengine::decode_hex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keyspace {
    pub name: String,
    pub sharded: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VindexKind {
    Hash,
    Numeric,
    Binary,
    BinaryMd5,
    LookupHash,
    LookupHashUnique,
    Lookup,
    LookupUnique,
}

impl VindexKind {
    pub fn is_unique(&self) -> bool {
        !matches!(self, VindexKind::LookupHash | VindexKind::Lookup)
    }

    /// Relative cost of mapping a value to a keyspace id. Functional
    /// vindexes are cheap, lookups need a round trip.
    pub fn cost(&self) -> u32 {
        match self {
            VindexKind::Numeric | VindexKind::Binary => 0,
            VindexKind::Hash | VindexKind::BinaryMd5 => 1,
            VindexKind::LookupHashUnique | VindexKind::LookupUnique => 10,
            VindexKind::LookupHash | VindexKind::Lookup => 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vindex {
    pub name: String,
    pub kind: VindexKind,
}

impl Vindex {
    pub fn new(name: impl Into<String>, kind: VindexKind) -> Self {
        Vindex { name: name.into(), kind }
    }

    pub fn is_unique(&self) -> bool {
        self.kind.is_unique()
    }

    pub fn cost(&self) -> u32 {
        self.kind.cost()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableType {
    #[default]
    Normal,
    Sequence,
    Reference,
}

#[derive(Debug, Clone)]
pub struct ColumnVindex {
    pub column: Ident,
    pub vindex: Arc<Vindex>,
}

#[derive(Debug, Clone)]
pub struct TableColumn {
    pub name: Ident,
    pub typ: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Table {
    pub name: Ident,
    pub keyspace: Arc<Keyspace>,
    pub typ: TableType,
    pub column_vindexes: Vec<ColumnVindex>,
    pub columns: Vec<TableColumn>,
    pub column_list_authoritative: bool,
    /// Keyspace id every row of the table lives at.
    pub pinned: Option<Vec<u8>>,
}

impl Table {
    /// A table this vschema knows nothing about beyond its keyspace.
    pub fn ad_hoc(name: Ident, keyspace: Arc<Keyspace>) -> Self {
        Table {
            name,
            keyspace,
            typ: TableType::Normal,
            column_vindexes: Vec::new(),
            columns: Vec::new(),
            column_list_authoritative: false,
            pinned: None,
        }
    }
}

/// Explicit shard target taken from a `ks:shard` qualifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Destination {
    Shard(String),
    KeyspaceId(Vec<u8>),
}

#[derive(Debug, Clone)]
pub enum TableOrVindex {
    Table {
        table: Arc<Table>,
        destination: Option<Destination>,
    },
    Vindex(Arc<Vindex>),
}

/// Lookup capability over the sharding metadata.
pub trait VSchema: Send + Sync {
    fn find_table_or_vindex(&self, name: &TableName) -> PlanResult<TableOrVindex>;

    /// Alphabetically first keyspace; used where any fixed choice is valid.
    fn first_sorted_keyspace(&self) -> PlanResult<Arc<Keyspace>>;

    /// Any keyspace able to answer catalog queries.
    fn any_keyspace(&self) -> PlanResult<Arc<Keyspace>>;
}

// ---- JSON document ----

#[derive(Debug, Default, Deserialize)]
struct VSchemaSpec {
    #[serde(default)]
    keyspaces: BTreeMap<String, KeyspaceSpec>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct KeyspaceSpec {
    sharded: bool,
    vindexes: BTreeMap<String, VindexSpec>,
    tables: BTreeMap<String, TableSpec>,
}

#[derive(Debug, Deserialize)]
struct VindexSpec {
    #[serde(rename = "type")]
    kind: VindexKind,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TableSpec {
    #[serde(rename = "type")]
    typ: TableType,
    column_vindexes: Vec<ColumnVindexSpec>,
    columns: Vec<ColumnSpec>,
    column_list_authoritative: bool,
    pinned: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ColumnVindexSpec {
    column: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct ColumnSpec {
    name: String,
    #[serde(rename = "type")]
    typ: Option<String>,
}

#[derive(Debug)]
struct KeyspaceEntry {
    keyspace: Arc<Keyspace>,
    tables: BTreeMap<String, Arc<Table>>,
    vindexes: BTreeMap<String, Arc<Vindex>>,
}

/// Immutable vschema snapshot. Safe to share between concurrent plan builds.
#[derive(Debug)]
pub struct StaticVSchema {
    keyspaces: BTreeMap<String, KeyspaceEntry>,
}

fn vschema_err(msg: impl Into<String>) -> PlanError {
    PlanError::VSchema(msg.into())
}

impl StaticVSchema {
    pub fn from_json_str(content: &str) -> PlanResult<Self> {
        let spec: VSchemaSpec = serde_json::from_str(content)
            .map_err(|e| vschema_err(format!("invalid vschema document: {e}")))?;
        Self::build(spec)
    }

    pub fn from_json_value(value: serde_json::Value) -> PlanResult<Self> {
        let spec: VSchemaSpec = serde_json::from_value(value)
            .map_err(|e| vschema_err(format!("invalid vschema document: {e}")))?;
        Self::build(spec)
    }

    fn build(spec: VSchemaSpec) -> PlanResult<Self> {
        let mut keyspaces = BTreeMap::new();
        for (ks_name, ks_spec) in spec.keyspaces {
            let keyspace = Arc::new(Keyspace { name: ks_name.clone(), sharded: ks_spec.sharded });
            let vindexes: BTreeMap<String, Arc<Vindex>> = ks_spec
                .vindexes
                .into_iter()
                .map(|(name, v)| (name.clone(), Arc::new(Vindex::new(name, v.kind))))
                .collect();

            let mut tables = BTreeMap::new();
            for (t_name, t_spec) in ks_spec.tables {
                let mut column_vindexes = Vec::with_capacity(t_spec.column_vindexes.len());
                for cv in t_spec.column_vindexes {
                    let vindex = vindexes.get(&cv.name).cloned().ok_or_else(|| {
                        vschema_err(format!(
                            "vindex {} not found for table {ks_name}.{t_name}",
                            cv.name
                        ))
                    })?;
                    column_vindexes.push(ColumnVindex { column: Ident::new(cv.column), vindex });
                }
                if keyspace.sharded && t_spec.typ == TableType::Normal && column_vindexes.is_empty()
                    && t_spec.pinned.is_none()
                {
                    return Err(vschema_err(format!(
                        "missing primary col vindex for table {ks_name}.{t_name}"
                    )));
                }
                let pinned = match t_spec.pinned {
                    Some(hex) => Some(decode_hex(&hex).ok_or_else(|| {
                        vschema_err(format!("could not decode pinned value {hex} for {t_name}"))
                    })?),
                    None => None,
                };
                let table = Table {
                    name: Ident::new(t_name.clone()),
                    keyspace: Arc::clone(&keyspace),
                    typ: t_spec.typ,
                    column_vindexes,
                    columns: t_spec
                        .columns
                        .into_iter()
                        .map(|c| TableColumn { name: Ident::new(c.name), typ: c.typ })
                        .collect(),
                    column_list_authoritative: t_spec.column_list_authoritative,
                    pinned,
                };
                tables.insert(t_name, Arc::new(table));
            }

            // Every keyspace carries an implicit reference table `dual`.
            tables.entry("dual".to_string()).or_insert_with(|| {
                Arc::new(Table {
                    typ: TableType::Reference,
                    ..Table::ad_hoc(Ident::new("dual"), Arc::clone(&keyspace))
                })
            });

            keyspaces.insert(ks_name, KeyspaceEntry { keyspace, tables, vindexes });
        }
        Ok(StaticVSchema { keyspaces })
    }

    fn find_in_keyspace(
        &self,
        entry: &KeyspaceEntry,
        name: &Ident,
        destination: Option<Destination>,
    ) -> PlanResult<TableOrVindex> {
        if let Some(table) = entry.tables.get(name.as_str()) {
            return Ok(TableOrVindex::Table { table: Arc::clone(table), destination });
        }
        if destination.is_none() {
            if let Some(vindex) = entry.vindexes.get(name.as_str()) {
                return Ok(TableOrVindex::Vindex(Arc::clone(vindex)));
            }
        }
        if !entry.keyspace.sharded {
            let table = Table::ad_hoc(name.clone(), Arc::clone(&entry.keyspace));
            return Ok(TableOrVindex::Table { table: Arc::new(table), destination });
        }
        Err(PlanError::UnknownTable(format!("{}.{}", entry.keyspace.name, name.as_str())))
    }

    fn find_unqualified(&self, name: &Ident) -> PlanResult<TableOrVindex> {
        if name.as_str() == "dual" {
            let ks = self.first_sorted_keyspace()?;
            return self
                .keyspaces
                .get(&ks.name)
                .map(|entry| self.find_in_keyspace(entry, name, None))
                .unwrap_or(Err(PlanError::NoKeyspace));
        }

        let mut found: Option<TableOrVindex> = None;
        for entry in self.keyspaces.values() {
            let hit = if let Some(table) = entry.tables.get(name.as_str()) {
                Some(TableOrVindex::Table { table: Arc::clone(table), destination: None })
            } else {
                entry
                    .vindexes
                    .get(name.as_str())
                    .map(|v| TableOrVindex::Vindex(Arc::clone(v)))
            };
            if let Some(hit) = hit {
                if found.is_some() {
                    return Err(vschema_err(format!("ambiguous table reference: {}", name.as_str())));
                }
                found = Some(hit);
            }
        }
        if let Some(found) = found {
            return Ok(found);
        }

        // A lone unsharded keyspace accepts tables it has no entry for.
        if self.keyspaces.len() == 1 {
            if let Some(entry) = self.keyspaces.values().next() {
                if !entry.keyspace.sharded {
                    return self.find_in_keyspace(entry, name, None);
                }
            }
        }
        Err(PlanError::UnknownTable(name.as_str().to_string()))
    }
}

impl VSchema for StaticVSchema {
    fn find_table_or_vindex(&self, name: &TableName) -> PlanResult<TableOrVindex> {
        let Some(qualifier) = &name.qualifier else {
            return self.find_unqualified(&name.name);
        };
        let (ks_name, destination) = match qualifier.as_str().split_once(':') {
            Some((ks, shard)) => (ks, Some(Destination::Shard(shard.to_string()))),
            None => (qualifier.as_str(), None),
        };
        let entry = self
            .keyspaces
            .get(ks_name)
            .ok_or_else(|| PlanError::KeyspaceNotFound(ks_name.to_string()))?;
        self.find_in_keyspace(entry, &name.name, destination)
    }

    fn first_sorted_keyspace(&self) -> PlanResult<Arc<Keyspace>> {
        self.keyspaces
            .values()
            .next()
            .map(|entry| Arc::clone(&entry.keyspace))
            .ok_or(PlanError::NoKeyspace)
    }

    fn any_keyspace(&self) -> PlanResult<Arc<Keyspace>> {
        self.first_sorted_keyspace()
    }
}
