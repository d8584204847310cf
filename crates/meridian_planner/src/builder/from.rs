//! FROM clause: tables, derived tables and joins.

use std::sync::Arc;

use meridian_common::error::{PlanError, PlanResult};
use meridian_sql_frontend::ast::{
    AliasedTableExpr, JoinKind, JoinTableExpr, Select, SimpleTableExpr, TableExpr, TableName,
};
use meridian_sql_frontend::visit::split_and_expression;
use tracing::debug;

use super::route::is_system_schema;
use super::{Clause, ERoute, JoinNode, Node, NodeKind, Plan, PrimitiveBuilder};
use crate::engine::{JoinOpcode, RouteOpcode};
use crate::evalengine::{ScalarExpr, Value};
use crate::symtab::TableSym;
use crate::vschema::{ColumnVindex, Table, TableOrVindex, TableType, Vindex, VindexKind};

/// `a right join b` is planned as `b left join a`.
fn convert_to_left_join(ajoin: &mut JoinTableExpr) {
    let mut new_rhs = std::mem::replace(&mut ajoin.left, TableExpr::Paren(Vec::new()));
    if matches!(new_rhs, TableExpr::Join(_)) {
        new_rhs = TableExpr::Paren(vec![new_rhs]);
    }
    ajoin.left = std::mem::replace(&mut ajoin.right, new_rhs);
    ajoin.kind = JoinKind::Left;
}

fn route_for_table(table: &Table) -> ERoute {
    let keyspace = Arc::clone(&table.keyspace);
    match (&table.typ, &table.pinned) {
        (TableType::Sequence, _) => ERoute::new(RouteOpcode::Next, keyspace),
        (TableType::Reference, _) => ERoute::new(RouteOpcode::Reference, keyspace),
        _ if !table.keyspace.sharded => ERoute::new(RouteOpcode::Unsharded, keyspace),
        (_, Some(ksid)) => {
            // The keyspace id is already known; binary is the identity vindex.
            let mut eroute = ERoute::new(RouteOpcode::EqualUnique, keyspace);
            eroute.vindex = Some(Arc::new(Vindex::new("binary", VindexKind::Binary)));
            eroute.values = Some(vec![ScalarExpr::literal(Value::Bytes(ksid.clone()))]);
            eroute
        }
        (_, None) => ERoute::new(RouteOpcode::Scatter, keyspace),
    }
}

impl Plan<'_> {
    pub(crate) fn process_table_exprs(&mut self, from: &mut [TableExpr]) -> PlanResult<PrimitiveBuilder> {
        let Some((first, rest)) = from.split_first_mut() else {
            return Err(PlanError::invariant("select without a FROM clause"));
        };
        let mut pb = self.process_table_expr(first)?;
        if rest.is_empty() {
            return Ok(pb);
        }
        let rpb = self.process_table_exprs(rest)?;
        self.join(&mut pb, rpb, None)?;
        Ok(pb)
    }

    fn process_table_expr(&mut self, expr: &mut TableExpr) -> PlanResult<PrimitiveBuilder> {
        match expr {
            TableExpr::Aliased(ate) => self.process_aliased_table(ate),
            TableExpr::Paren(exprs) => {
                let pb = self.process_table_exprs(exprs)?;
                // Keep `from a, (b, c)` from flattening once more tables join.
                if self.kind(pb.bldr) == NodeKind::Route {
                    let select = &mut self.route_node_mut(pb.bldr)?.select;
                    let from = std::mem::take(&mut select.from);
                    select.from = vec![TableExpr::Paren(from)];
                }
                Ok(pb)
            }
            TableExpr::Join(ajoin) => {
                if ajoin.kind == JoinKind::Right {
                    convert_to_left_join(ajoin);
                }
                let mut pb = self.process_table_expr(&mut ajoin.left)?;
                let rpb = self.process_table_expr(&mut ajoin.right)?;
                self.join(&mut pb, rpb, Some(&mut **ajoin))?;
                Ok(pb)
            }
        }
    }

    fn process_aliased_table(&mut self, ate: &mut AliasedTableExpr) -> PlanResult<PrimitiveBuilder> {
        let sub = match &mut ate.expr {
            SimpleTableExpr::Table(name) => {
                let name = name.clone();
                return self.build_table_primitive(ate, name);
            }
            SimpleTableExpr::Derived(sub) => sub,
        };
        let spb = self.process_select(sub, None, "")?;
        let Some(alias) = ate.alias.clone() else {
            return Err(PlanError::Parse("every derived table must have its own alias".into()));
        };
        if self.as_route(spb.bldr).is_none() {
            let (bldr, st) = self.new_subquery(alias, spb.bldr)?;
            return Ok(PrimitiveBuilder { bldr, st });
        }

        // A route absorbs the derived table into its FROM clause and keeps
        // routing the way the inner query did. The derived table's columns
        // keep the vindexes they had inside.
        let (eroute, condition) = {
            let inner = self.route_node(spb.bldr)?;
            (inner.eroute.clone(), inner.condition.clone())
        };
        let mut vst = Table::ad_hoc(alias.clone(), Arc::clone(&eroute.keyspace));
        for rc in self.result_columns(spb.bldr) {
            let Some(vindex) = self.column(rc.column).vindex.clone() else {
                continue;
            };
            if vst.column_vindexes.iter().any(|cv| cv.column.equal_ci(&rc.alias)) {
                return Err(PlanError::InvalidArgument(format!(
                    "duplicate column aliases: {}",
                    rc.alias
                )));
            }
            vst.column_vindexes.push(ColumnVindex { column: rc.alias.clone(), vindex });
        }
        let (rb, st) = self.new_route(Select::from_tables(vec![TableExpr::Aliased(ate.clone())]), eroute);
        self.route_node_mut(rb)?.condition = condition;
        self.add_vschema_table(st, TableName { qualifier: None, name: alias }, &vst, rb)?;
        self.route_node_mut(spb.bldr)?.redirect = Some(rb);
        Ok(PrimitiveBuilder { bldr: rb, st })
    }

    fn build_table_primitive(&mut self, ate: &AliasedTableExpr, name: TableName) -> PlanResult<PrimitiveBuilder> {
        let alias = match &ate.alias {
            Some(a) => TableName { qualifier: None, name: a.clone() },
            None => name.clone(),
        };
        let sel = Select::from_tables(vec![TableExpr::Aliased(ate.clone())]);

        if is_system_schema(name.qualifier_str()) {
            let keyspace = self.vschema.any_keyspace()?;
            let (rb, st) = self.new_route(sel, ERoute::new(RouteOpcode::Dba, keyspace));
            let t = self.new_table(TableSym::new(alias, rb));
            self.add_table(st, t)?;
            return Ok(PrimitiveBuilder { bldr: rb, st });
        }

        match self.vschema.find_table_or_vindex(&name)? {
            TableOrVindex::Vindex(vindex) => {
                let (bldr, st) = self.new_vindex_func(alias, vindex)?;
                Ok(PrimitiveBuilder { bldr, st })
            }
            TableOrVindex::Table { table, destination } => {
                let mut eroute = match destination {
                    Some(dest) => {
                        let mut eroute = ERoute::new(RouteOpcode::ByDestination, Arc::clone(&table.keyspace));
                        eroute.target_destination = Some(dest);
                        eroute
                    }
                    None => route_for_table(&table),
                };
                eroute.table_name = table.name.as_str().to_string();
                let (rb, st) = self.new_route(sel, eroute);
                self.add_vschema_table(st, alias, &table, rb)?;
                Ok(PrimitiveBuilder { bldr: rb, st })
            }
        }
    }

    /// Join `rpb` onto `pb`: one route if both sides can run together,
    /// a join node otherwise.
    fn join(
        &mut self,
        pb: &mut PrimitiveBuilder,
        rpb: PrimitiveBuilder,
        ajoin: Option<&mut JoinTableExpr>,
    ) -> PlanResult<()> {
        self.merge_symtabs(pb.st, rpb.st)?;
        let (left, right) = (pb.bldr, rpb.bldr);
        let both_routes = self.as_route(left).is_some() && self.as_route(right).is_some();
        if !both_routes || !self.join_can_merge(pb.st, left, right, ajoin.as_deref())? {
            return self.new_join(pb, rpb, ajoin);
        }

        if self.route_node(left)?.eroute.opcode == RouteOpcode::Reference {
            // Route by the side that is not a reference table.
            let r = self.route_node_mut(right)?;
            let (r_eroute, r_condition) = (r.eroute.clone(), r.condition.take());
            let l = self.route_node_mut(left)?;
            let l_eroute = std::mem::replace(&mut l.eroute, r_eroute);
            let l_condition = std::mem::replace(&mut l.condition, r_condition);
            let r = self.route_node_mut(right)?;
            r.eroute = l_eroute;
            r.condition = l_condition;
        }
        self.route_node_mut(right)?.redirect = Some(left);
        debug!(left = left.0, right = right.0, "join merged into one route");

        let Some(ajoin) = ajoin else {
            let from = std::mem::take(&mut self.route_node_mut(right)?.select.from);
            self.route_node_mut(left)?.select.from.extend(from);
            self.symtabs[pb.st.0].single_route = Some(left);
            return Ok(());
        };
        if ajoin.kind == JoinKind::Left {
            self.clear_vindexes(rpb.st);
        }
        self.symtabs[pb.st.0].single_route = Some(left);

        if let Some(mut on) = ajoin.condition.on.take() {
            let (pullouts, _) = self.find_origin(*pb, &mut on)?;
            self.add_pullouts(pb, pullouts);
            ajoin.condition.on = Some(on);
        }
        self.route_node_mut(left)?.select.from = vec![TableExpr::Join(Box::new(ajoin.clone()))];
        if let Some(on) = &ajoin.condition.on {
            for filter in split_and_expression(Vec::new(), on.clone()) {
                self.update_plan(left, &filter)?;
            }
        }
        Ok(())
    }

    /// ON conditions become filters; the WHERE scope sees the same tables
    /// and the FROM clause cannot hold duplicates.
    fn new_join(
        &mut self,
        lpb: &mut PrimitiveBuilder,
        mut rpb: PrimitiveBuilder,
        ajoin: Option<&mut JoinTableExpr>,
    ) -> PlanResult<()> {
        let mut opcode = JoinOpcode::NormalJoin;
        let mut on = None;
        if let Some(ajoin) = ajoin {
            if !ajoin.condition.using.is_empty() {
                return Err(PlanError::unsupported(
                    "join with USING(column_list) clause for complex queries",
                ));
            }
            on = ajoin.condition.on.clone();
            if ajoin.kind == JoinKind::Left {
                opcode = JoinOpcode::LeftJoin;
                // The ON clause runs inside the right side. Left columns
                // resolve as outer references and become join variables.
                self.symtabs[rpb.st.0].outer = Some(lpb.st);
                if let Some(on) = on.take() {
                    self.push_filter_expr(&mut rpb, on, Clause::Where)?;
                }
            }
        }

        let id = self.add_node(Node::Join(JoinNode {
            order: 0,
            left: lpb.bldr,
            right: rpb.bldr,
            opcode,
            cols: Vec::new(),
            vars: Default::default(),
            result_columns: Vec::new(),
        }));
        self.reorder(id, 0);
        debug!(join = id.0, left = lpb.bldr.0, right = rpb.bldr.0, ?opcode, "cross-shard join");
        lpb.bldr = id;

        match on {
            Some(on) => self.push_filter_expr(lpb, on, Clause::Where).map(|_| ()),
            None => Ok(()),
        }
    }
}
