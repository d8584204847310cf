//! Scope tables: which tables and columns a clause can see, and which
//! operator each column comes from.
//!
//! Tables and columns live in arenas owned by the [`Plan`]. A table is
//! shared between the symtab that created it and every symtab it is merged
//! into, so re-homing a table only rewrites `Column::st`.

use std::collections::HashMap;
use std::sync::Arc;

use meridian_common::error::{PlanError, PlanResult};
use meridian_sql_frontend::ast::{ColName, ColumnRef, Expr, Ident, Order, TableName};
use meridian_sql_frontend::visit::{walk_expr_mut, VisitorMut};

use crate::builder::{NodeId, Plan};
use crate::vschema::{self, Vindex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct SymtabId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct TableId(pub usize);

#[derive(Debug, Clone)]
pub(crate) struct Column {
    pub origin: NodeId,
    /// Symtab the column currently belongs to. None for anonymous
    /// expression results.
    pub st: Option<SymtabId>,
    pub vindex: Option<Arc<Vindex>>,
    /// Position within the owning table; meaningful for subquery and
    /// vindex-function tables.
    pub col_number: usize,
}

impl Column {
    pub fn new(origin: NodeId, st: Option<SymtabId>) -> Self {
        Column { origin, st, vindex: None, col_number: 0 }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ResultColumn {
    /// Empty when the expression is not a plain column and has no alias.
    pub alias: Ident,
    pub column: ColumnRef,
}

#[derive(Debug, Clone)]
pub(crate) struct TableSym {
    pub alias: TableName,
    pub columns: HashMap<String, ColumnRef>,
    pub column_names: Vec<Ident>,
    pub is_authoritative: bool,
    pub origin: NodeId,
}

impl TableSym {
    pub fn new(alias: TableName, origin: NodeId) -> Self {
        TableSym {
            alias,
            columns: HashMap::new(),
            column_names: Vec::new(),
            is_authoritative: false,
            origin,
        }
    }

    fn matches(&self, qualifier: &TableName) -> bool {
        self.alias.name == qualifier.name
            && (qualifier.qualifier.is_none() || self.alias.qualifier == qualifier.qualifier)
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct Symtab {
    pub tables: Vec<TableId>,
    /// Column name -> column, or None when several tables share the name.
    pub unique_columns: HashMap<String, Option<ColumnRef>>,
    pub single_route: Option<NodeId>,
    pub result_columns: Vec<ResultColumn>,
    pub outer: Option<SymtabId>,
    /// References this scope resolved through `outer`.
    pub externs: Vec<ColName>,
}

pub(crate) fn col_ref(col: &ColName) -> PlanResult<ColumnRef> {
    col.metadata
        .ok_or_else(|| PlanError::invariant(format!("column {col} used before resolution")))
}

impl Plan<'_> {
    pub(crate) fn new_symtab(&mut self, single_route: Option<NodeId>) -> SymtabId {
        self.symtabs.push(Symtab { single_route, ..Default::default() });
        SymtabId(self.symtabs.len() - 1)
    }

    pub(crate) fn new_column(&mut self, column: Column) -> ColumnRef {
        self.columns.push(column);
        ColumnRef(self.columns.len() - 1)
    }

    pub(crate) fn new_table(&mut self, table: TableSym) -> TableId {
        self.tables.push(table);
        TableId(self.tables.len() - 1)
    }

    pub(crate) fn column(&self, c: ColumnRef) -> &Column {
        &self.columns[c.0]
    }

    pub(crate) fn column_origin(&self, c: ColumnRef) -> NodeId {
        self.resolve(self.columns[c.0].origin)
    }

    pub(crate) fn table_origin(&self, t: TableId) -> NodeId {
        self.resolve(self.tables[t.0].origin)
    }

    /// Add a column; dups are allowed but the first one wins on lookup.
    pub(crate) fn table_add_column(&mut self, t: TableId, alias: Ident, c: ColumnRef) {
        let lowered = alias.lowered();
        let table = &mut self.tables[t.0];
        if !table.columns.contains_key(&lowered) {
            self.columns[c.0].col_number = table.column_names.len();
            table.columns.insert(lowered, c);
        }
        table.column_names.push(alias);
    }

    fn table_merge_column(&mut self, t: TableId, alias: &Ident, st: SymtabId) -> PlanResult<ColumnRef> {
        if let Some(c) = self.tables[t.0].columns.get(&alias.lowered()) {
            return Ok(*c);
        }
        if self.tables[t.0].is_authoritative {
            return Err(PlanError::UnknownColumn(format!(
                "{} in {}",
                alias,
                self.tables[t.0].alias
            )));
        }
        let c = self.new_column(Column::new(self.tables[t.0].origin, Some(st)));
        self.table_add_column(t, alias.clone(), c);
        Ok(c)
    }

    pub(crate) fn add_table(&mut self, st: SymtabId, t: TableId) -> PlanResult<()> {
        let origin = self.table_origin(t);
        let is_route = self.as_route(self.tables[t.0].origin).is_some();
        if !is_route || self.symtabs[st.0].single_route.map(|r| self.resolve(r)) != Some(origin) {
            self.symtabs[st.0].single_route = None;
        }
        let alias = self.tables[t.0].alias.clone();
        if self.symtabs[st.0].tables.iter().any(|other| self.tables[other.0].alias == alias) {
            return Err(PlanError::DuplicateSymbol(alias.to_string()));
        }
        self.symtabs[st.0].tables.push(t);

        let columns: Vec<(String, ColumnRef)> =
            self.tables[t.0].columns.iter().map(|(k, v)| (k.clone(), *v)).collect();
        for (name, c) in columns {
            self.columns[c.0].st = Some(st);
            let symtab = &mut self.symtabs[st.0];
            match symtab.unique_columns.get_mut(&name) {
                // Keep the entry so that a third table cannot re-add it.
                Some(existing) => *existing = None,
                None => {
                    symtab.unique_columns.insert(name, Some(c));
                }
            }
        }
        Ok(())
    }

    /// Register a vschema table under `alias`, attaching the cheapest vindex
    /// of each column.
    pub(crate) fn add_vschema_table(
        &mut self,
        st: SymtabId,
        alias: TableName,
        table: &vschema::Table,
        rb: NodeId,
    ) -> PlanResult<()> {
        let t = self.new_table(TableSym::new(alias, rb));
        for col in &table.columns {
            let c = self.new_column(Column::new(rb, Some(st)));
            self.table_add_column(t, col.name.clone(), c);
        }
        self.tables[t.0].is_authoritative = table.column_list_authoritative;

        for cv in &table.column_vindexes {
            let c = self.table_merge_column(t, &cv.column, st)?;
            let replace = match &self.columns[c.0].vindex {
                None => true,
                Some(existing) => existing.cost() > cv.vindex.cost(),
            };
            if replace {
                self.columns[c.0].vindex = Some(Arc::clone(&cv.vindex));
            }
        }
        self.add_table(st, t)
    }

    pub(crate) fn merge_symtabs(&mut self, st: SymtabId, other: SymtabId) -> PlanResult<()> {
        let tables = self.symtabs[other.0].tables.clone();
        for t in tables {
            self.add_table(st, t)?;
        }
        Ok(())
    }

    /// Rows on the inner side of a left join may be null-extended, so their
    /// columns can no longer route.
    pub(crate) fn clear_vindexes(&mut self, st: SymtabId) {
        let tables = self.symtabs[st.0].tables.clone();
        for t in tables {
            let cols: Vec<ColumnRef> = self.tables[t.0].columns.values().copied().collect();
            for c in cols {
                self.columns[c.0].vindex = None;
            }
        }
    }

    pub(crate) fn find_table(&self, st: SymtabId, name: &TableName) -> PlanResult<TableId> {
        self.symtabs[st.0]
            .tables
            .iter()
            .copied()
            .find(|t| self.tables[t.0].matches(name))
            .ok_or_else(|| PlanError::UnknownTable(name.to_string()))
    }

    pub(crate) fn set_result_columns(&mut self, st: SymtabId, rcs: Vec<ResultColumn>) {
        for rc in &rcs {
            self.columns[rc.column.0].st = Some(st);
        }
        self.symtabs[st.0].result_columns = rcs;
    }

    /// Resolve a column reference, caching the answer on the reference.
    /// Returns the originating operator and whether the column is local to
    /// this scope.
    pub(crate) fn find(&mut self, st: SymtabId, col: &mut ColName) -> PlanResult<(NodeId, bool)> {
        if let Some(c) = col.metadata {
            return Ok((self.column_origin(c), self.columns[c.0].st == Some(st)));
        }

        if col.qualifier.is_none() {
            if let Some(c) = self.search_result_column(st, col)? {
                col.metadata = Some(c);
                return Ok((self.column_origin(c), true));
            }
        }

        if let Some(c) = self.search_tables(st, col)? {
            col.metadata = Some(c);
            return Ok((self.column_origin(c), true));
        }

        let Some(outer) = self.symtabs[st.0].outer else {
            return Err(PlanError::UnknownColumn(col.to_string()));
        };
        // Once the select list is known, names must bind here, as in MySQL.
        if !self.symtabs[st.0].result_columns.is_empty() {
            return Err(PlanError::UnknownColumn(col.to_string()));
        }
        tracing::trace!(column = %col, "resolving through outer scope");
        let (origin, _) = self.find(outer, col)?;
        self.symtabs[st.0].externs.push(col.clone());
        Ok((origin, false))
    }

    fn search_result_column(&self, st: SymtabId, col: &ColName) -> PlanResult<Option<ColumnRef>> {
        let mut found = None;
        for rc in &self.symtabs[st.0].result_columns {
            if rc.alias.equal_ci(&col.name) {
                if found.is_some() {
                    return Err(PlanError::AmbiguousColumn(col.to_string()));
                }
                found = Some(rc.column);
            }
        }
        Ok(found)
    }

    fn search_tables(&mut self, st: SymtabId, col: &ColName) -> PlanResult<Option<ColumnRef>> {
        let t = match &col.qualifier {
            None => {
                let symtab = &self.symtabs[st.0];
                let entry = symtab.unique_columns.get(&col.name.lowered()).copied();
                if let Some(Some(c)) = entry {
                    return Ok(Some(c));
                }
                if symtab.tables.len() == 1 {
                    symtab.tables[0]
                } else if let Some(route) = symtab.single_route {
                    let c = self.new_column(Column::new(route, Some(st)));
                    return Ok(Some(c));
                } else if entry.is_some() {
                    return Err(PlanError::AmbiguousColumn(col.to_string()));
                } else {
                    return Err(PlanError::UnknownColumn(col.to_string()));
                }
            }
            Some(qualifier) => match self.find_table(st, qualifier) {
                Ok(t) => t,
                Err(_) => return Ok(None),
            },
        };

        if let Some(c) = self.tables[t.0].columns.get(&col.name.lowered()) {
            return Ok(Some(*c));
        }
        if self.tables[t.0].is_authoritative {
            return Err(PlanError::UnknownColumn(col.to_string()));
        }
        let c = self.new_column(Column::new(self.tables[t.0].origin, Some(st)));
        self.table_add_column(t, col.name.clone(), c);
        Ok(Some(c))
    }

    /// Resolve every column of a GROUP BY or ORDER BY expression.
    pub(crate) fn resolve_symbols(&mut self, st: SymtabId, expr: &mut Expr) -> PlanResult<()> {
        let mut resolver = Resolver { plan: self, st, err: None };
        walk_expr_mut(&mut resolver, expr);
        resolver.err.map_or(Ok(()), Err)
    }

    pub(crate) fn resolve_order_symbols(&mut self, st: SymtabId, orders: &mut [Order]) -> PlanResult<()> {
        for order in orders {
            self.resolve_symbols(st, &mut order.expr)?;
        }
        Ok(())
    }

    /// Vindex of `expr` if it is a column that originates from `scope`.
    pub(crate) fn vindex_of(&mut self, st: SymtabId, expr: &Expr, scope: NodeId) -> Option<Arc<Vindex>> {
        let Expr::Column(col) = expr else {
            return None;
        };
        let c = match col.metadata {
            Some(c) => c,
            None => {
                let mut probe = col.clone();
                self.find(st, &mut probe).ok()?;
                probe.metadata?
            }
        };
        if self.column_origin(c) != scope {
            return None;
        }
        self.columns[c.0].vindex.clone()
    }
}

struct Resolver<'p, 'a> {
    plan: &'p mut Plan<'a>,
    st: SymtabId,
    err: Option<PlanError>,
}

impl VisitorMut for Resolver<'_, '_> {
    fn visit_expr(&mut self, expr: &mut Expr) -> bool {
        if self.err.is_some() {
            return false;
        }
        match expr {
            Expr::Column(col) => {
                if let Err(e) = self.plan.find(self.st, col) {
                    self.err = Some(e);
                }
                false
            }
            Expr::Subquery(_) | Expr::Exists(_) => {
                self.err = Some(PlanError::unsupported("subqueries disallowed in GROUP or ORDER BY"));
                false
            }
            _ => true,
        }
    }
}
