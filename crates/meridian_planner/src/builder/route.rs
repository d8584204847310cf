//! Route: a query shape sent to one or more shards of a keyspace.

use std::collections::HashMap;
use std::sync::Arc;

use meridian_common::error::{PlanError, PlanResult};
use meridian_sql_frontend::ast::{
    AliasedExpr, ColName, ColumnRef, ComparisonOp, Expr, JoinTableExpr, Literal, Order,
    OrderDirection, Select, SelectExpr, TableName,
};
use meridian_sql_frontend::format::impossible_query;
use meridian_sql_frontend::visit::{split_and_expression, walk_select, walk_select_mut, VisitorMut};
use tracing::debug;

use super::{is_special_order, result_from_number, Clause, Node, NodeId, Plan};
use crate::engine::{OrderByParams, Route, RouteOpcode};
use crate::evalengine::{decode_hex, to_scalar_expr, ScalarExpr};
use crate::symtab::{Column, ResultColumn, SymtabId};
use crate::vschema::{Destination, Keyspace, Vindex, VindexKind};

/// Bind variable the IN list of a routed query is rewritten to.
pub(crate) const LIST_VAR_NAME: &str = "__vals";

const SYSTEM_SCHEMAS: &[&str] = &["information_schema", "performance_schema", "sys", "mysql"];

pub(crate) fn is_system_schema(qualifier: &str) -> bool {
    SYSTEM_SCHEMAS.iter().any(|s| s.eq_ignore_ascii_case(qualifier))
}

/// Routing decision carried by a route while it is being built.
#[derive(Debug, Clone)]
pub(crate) struct ERoute {
    pub opcode: RouteOpcode,
    pub keyspace: Arc<Keyspace>,
    pub vindex: Option<Arc<Vindex>>,
    /// Unresolved until wire-up, except for pinned tables.
    pub values: Option<Vec<ScalarExpr>>,
    pub order_by: Vec<OrderByParams>,
    pub table_name: String,
    pub query_timeout_ms: u64,
    pub scatter_errors_as_warnings: bool,
    pub sys_table_keyspace_expr: Option<ScalarExpr>,
    pub target_destination: Option<Destination>,
    pub query: String,
    pub field_query: String,
}

impl ERoute {
    pub fn new(opcode: RouteOpcode, keyspace: Arc<Keyspace>) -> Self {
        ERoute {
            opcode,
            keyspace,
            vindex: None,
            values: None,
            order_by: Vec::new(),
            table_name: String::new(),
            query_timeout_ms: 0,
            scatter_errors_as_warnings: false,
            sys_table_keyspace_expr: None,
            target_destination: None,
            query: String::new(),
            field_query: String::new(),
        }
    }
}

#[derive(Debug)]
pub(crate) struct RouteNode {
    pub order: usize,
    /// Set once this route has been merged into another.
    pub redirect: Option<NodeId>,
    pub select: Select,
    pub result_columns: Vec<ResultColumn>,
    pub eroute: ERoute,
    /// Expression the routing values are computed from at wire-up.
    pub condition: Option<Expr>,
}

impl RouteNode {
    pub fn is_single_shard(&self) -> bool {
        matches!(
            self.eroute.opcode,
            RouteOpcode::Unsharded
                | RouteOpcode::Dba
                | RouteOpcode::Next
                | RouteOpcode::EqualUnique
                | RouteOpcode::Reference
                | RouteOpcode::None
        )
    }

    pub fn to_primitive(&self) -> Route {
        let e = &self.eroute;
        Route {
            opcode: e.opcode,
            keyspace: e.keyspace.name.clone(),
            query: e.query.clone(),
            field_query: e.field_query.clone(),
            vindex: e.vindex.as_ref().map(|v| v.name.clone()),
            values: e.values.clone().unwrap_or_default(),
            order_by: e.order_by.clone(),
            table_name: e.table_name.clone(),
            query_timeout_ms: e.query_timeout_ms,
            scatter_errors_as_warnings: e.scatter_errors_as_warnings,
            sys_table_keyspace_expr: e.sys_table_keyspace_expr.clone(),
            target_destination: e.target_destination.clone(),
        }
    }
}

type RoutePlan = (RouteOpcode, Option<Arc<Vindex>>, Option<Expr>);

const SCATTER: RoutePlan = (RouteOpcode::Scatter, None, None);

fn same_vindex(a: &Option<Arc<Vindex>>, b: &Option<Arc<Vindex>>) -> bool {
    matches!((a, b), (Some(a), Some(b)) if a == b)
}

fn is_lookup(vindex: &Vindex) -> bool {
    matches!(
        vindex.kind,
        VindexKind::LookupHash
            | VindexKind::LookupHashUnique
            | VindexKind::Lookup
            | VindexKind::LookupUnique
    )
}

fn hex_equal(hex: &str, other: &Literal) -> bool {
    match other {
        Literal::Hex(b) => hex.eq_ignore_ascii_case(b),
        Literal::Str(s) => decode_hex(hex).is_some_and(|bytes| bytes == s.as_bytes()),
        _ => false,
    }
}

/// True if both expressions are known to produce the same routing value.
pub(crate) fn val_equal(a: Option<&Expr>, b: Option<&Expr>) -> bool {
    match (a, b) {
        (Some(Expr::Column(a)), Some(Expr::Column(b))) => {
            a.metadata.is_some() && a.metadata == b.metadata
        }
        (Some(Expr::Argument(a)), Some(Expr::Argument(b))) => a == b,
        (Some(Expr::Literal(a)), Some(Expr::Literal(b))) => match (a, b) {
            (Literal::Str(x), Literal::Str(y)) => x == y,
            (Literal::Int(x), Literal::Int(y)) => x == y,
            (Literal::Hex(x), other) => hex_equal(x, other),
            (Literal::Str(_), Literal::Hex(h)) => hex_equal(h, a),
            _ => false,
        },
        _ => false,
    }
}

impl Plan<'_> {
    pub(crate) fn new_route(&mut self, select: Select, eroute: ERoute) -> (NodeId, SymtabId) {
        let rb = self.add_node(Node::Route(RouteNode {
            order: 1,
            redirect: None,
            select,
            result_columns: Vec::new(),
            eroute,
            condition: None,
        }));
        let st = self.new_symtab(Some(rb));
        (rb, st)
    }

    fn is_local(&self, id: NodeId, col: &ColName) -> bool {
        col.metadata.map_or(true, |c| self.column_origin(c) == id)
    }

    /// A value this route can be routed by: a literal, a bind argument or a
    /// column of another operator.
    fn expr_is_value(&self, id: NodeId, expr: &Expr) -> bool {
        match expr {
            Expr::Column(col) => col.metadata.is_some_and(|c| self.column_origin(c) != id),
            other => other.is_value(),
        }
    }

    pub(crate) fn resolved_vindex(&self, expr: &Expr, scope: NodeId) -> Option<Arc<Vindex>> {
        let c = expr.as_column()?.metadata?;
        if self.column_origin(c) != scope {
            return None;
        }
        self.column(c).vindex.clone()
    }

    pub(crate) fn route_push_filter(&mut self, id: NodeId, filter: Expr, clause: Clause) -> PlanResult<()> {
        let route = self.route_node_mut(id)?;
        match clause {
            Clause::Where => route.select.add_where(filter.clone()),
            Clause::Having => route.select.add_having(filter.clone()),
        }
        self.update_plan(id, &filter)
    }

    /// Narrow the route if `filter` allows a cheaper or more selective
    /// opcode.
    pub(crate) fn update_plan(&mut self, id: NodeId, filter: &Expr) -> PlanResult<()> {
        let (current, current_vindex) = {
            let route = self.route_node(id)?;
            (route.eroute.opcode, route.eroute.vindex.clone())
        };
        if matches!(
            current,
            RouteOpcode::Unsharded
                | RouteOpcode::Next
                | RouteOpcode::Dba
                | RouteOpcode::Reference
                | RouteOpcode::None
                | RouteOpcode::ByDestination
        ) {
            return Ok(());
        }
        let (opcode, vindex, condition) = self.compute_plan(id, filter);
        if opcode == RouteOpcode::Scatter {
            return Ok(());
        }
        let cheaper = match (&vindex, &current_vindex) {
            (Some(new), Some(cur)) => new.cost() < cur.cost(),
            _ => false,
        };
        let take = match current {
            RouteOpcode::EqualUnique => opcode == RouteOpcode::EqualUnique && cheaper,
            RouteOpcode::Equal => {
                opcode == RouteOpcode::EqualUnique || (opcode == RouteOpcode::Equal && cheaper)
            }
            RouteOpcode::In => {
                matches!(opcode, RouteOpcode::EqualUnique | RouteOpcode::Equal)
                    || (opcode == RouteOpcode::In && cheaper)
            }
            RouteOpcode::Scatter => matches!(
                opcode,
                RouteOpcode::EqualUnique | RouteOpcode::Equal | RouteOpcode::In | RouteOpcode::None
            ),
            _ => false,
        };
        if take {
            debug!(
                route = id.0,
                from = current.as_str(),
                to = opcode.as_str(),
                vindex = vindex.as_ref().map(|v| v.name.as_str()).unwrap_or(""),
                "route plan narrowed"
            );
            let route = self.route_node_mut(id)?;
            route.eroute.opcode = opcode;
            route.eroute.vindex = vindex;
            route.eroute.values = None;
            route.condition = condition;
        }
        Ok(())
    }

    fn compute_plan(&self, id: NodeId, filter: &Expr) -> RoutePlan {
        match filter {
            Expr::Comparison { op: ComparisonOp::Eq, left, right } => {
                self.compute_equal_plan(id, left, right)
            }
            Expr::Comparison { op: ComparisonOp::In, left, right } => {
                self.compute_in_plan(id, filter, left, right)
            }
            Expr::Comparison { op: ComparisonOp::NotIn, right, .. } => match right.as_ref() {
                Expr::Tuple(items) if items.iter().any(Expr::is_null_literal) => {
                    (RouteOpcode::None, None, None)
                }
                _ => SCATTER,
            },
            Expr::IsNull { expr, negated: false } => self.compute_is_null_plan(id, expr),
            _ => SCATTER,
        }
    }

    fn compute_equal_plan(&self, id: NodeId, left: &Expr, right: &Expr) -> RoutePlan {
        if right.is_null_literal() {
            return (RouteOpcode::None, None, None);
        }
        let (vindex, value) = match self.resolved_vindex(left, id) {
            Some(v) => (v, right),
            None => match self.resolved_vindex(right, id) {
                Some(v) => (v, left),
                None => return SCATTER,
            },
        };
        if !self.expr_is_value(id, value) {
            return SCATTER;
        }
        let opcode = if vindex.is_unique() { RouteOpcode::EqualUnique } else { RouteOpcode::Equal };
        (opcode, Some(vindex), Some(value.clone()))
    }

    fn compute_in_plan(&self, id: NodeId, filter: &Expr, left: &Expr, right: &Expr) -> RoutePlan {
        let Some(vindex) = self.resolved_vindex(left, id) else {
            return SCATTER;
        };
        match right {
            Expr::Tuple(items) => {
                if items.len() == 1 && items[0].is_null_literal() {
                    return (RouteOpcode::None, None, None);
                }
                if !items.iter().all(|item| self.expr_is_value(id, item)) {
                    return SCATTER;
                }
                (RouteOpcode::In, Some(vindex), Some(filter.clone()))
            }
            Expr::ListArg(_) => (RouteOpcode::In, Some(vindex), Some(filter.clone())),
            _ => SCATTER,
        }
    }

    fn compute_is_null_plan(&self, id: NodeId, expr: &Expr) -> RoutePlan {
        let Some(vindex) = self.resolved_vindex(expr, id) else {
            return SCATTER;
        };
        // Lookup tables are keyed by value and hold no NULL rows.
        if is_lookup(&vindex) {
            return SCATTER;
        }
        let opcode = if vindex.is_unique() { RouteOpcode::EqualUnique } else { RouteOpcode::Equal };
        (opcode, Some(vindex), Some(Expr::Literal(Literal::Null)))
    }

    pub(crate) fn route_push_select(&mut self, id: NodeId, expr: AliasedExpr) -> PlanResult<(ResultColumn, usize)> {
        let rc = self.new_result_column(&expr, id);
        let route = self.route_node_mut(id)?;
        route.select.select_exprs.push(SelectExpr::Aliased(expr));
        route.result_columns.push(rc.clone());
        Ok((rc, route.result_columns.len() - 1))
    }

    /// Result column for a pushed expression: a plain column keeps its
    /// symbol, anything else gets an anonymous one owned by `origin`.
    pub(crate) fn new_result_column(&mut self, expr: &AliasedExpr, origin: NodeId) -> ResultColumn {
        if let Expr::Column(ColName { metadata: Some(c), name, .. }) = &expr.expr {
            return ResultColumn {
                alias: expr.alias.clone().unwrap_or_else(|| name.clone()),
                column: *c,
            };
        }
        let column = self.new_column(Column::new(origin, None));
        ResultColumn { alias: expr.alias.clone().unwrap_or_default(), column }
    }

    /// Push a select expression the gateway never refers to, such as `*`.
    pub(crate) fn push_anonymous(&mut self, id: NodeId, expr: SelectExpr) -> PlanResult<ResultColumn> {
        let column = self.new_column(Column::new(id, None));
        let route = self.route_node_mut(id)?;
        route.select.select_exprs.push(expr);
        let rc = ResultColumn { alias: Default::default(), column };
        route.result_columns.push(rc.clone());
        Ok(rc)
    }

    pub(crate) fn route_supply_col(&mut self, id: NodeId, col: &ColName) -> PlanResult<(ResultColumn, usize)> {
        let c = crate::symtab::col_ref(col)?;
        let route = self.route_node_mut(id)?;
        if let Some(i) = route.result_columns.iter().position(|rc| rc.column == c) {
            return Ok((route.result_columns[i].clone(), i));
        }
        let rc = ResultColumn { alias: col.name.clone(), column: c };
        route.result_columns.push(rc.clone());
        route.select.select_exprs.push(SelectExpr::Aliased(AliasedExpr::new(Expr::Column(col.clone()))));
        Ok((rc, route.result_columns.len() - 1))
    }

    pub(crate) fn route_push_order_by(&mut self, id: NodeId, order_by: Vec<Order>) -> PlanResult<()> {
        if order_by.is_empty() {
            return Ok(());
        }
        let route = self.route_node_mut(id)?;
        if is_special_order(&order_by) || route.is_single_shard() {
            for order in order_by {
                route.select.add_order(order);
            }
            return Ok(());
        }

        // Scatter: every shard sorts, the gateway merges on select columns.
        for order in order_by {
            let col_number = match &order.expr {
                Expr::Literal(lit) => Some(result_from_number(&route.result_columns, lit)?),
                Expr::Column(col) => route
                    .result_columns
                    .iter()
                    .position(|rc| col.metadata == Some(rc.column)),
                other => {
                    return Err(PlanError::unsupported(format!(
                        "in scatter query: complex order by expression: {other}"
                    )))
                }
            };
            let Some(col) = col_number else {
                return Err(PlanError::unsupported(format!(
                    "in scatter query: order by must reference a column in the select list: {order}"
                )));
            };
            route.eroute.order_by.push(OrderByParams {
                col,
                desc: order.direction == OrderDirection::Desc,
            });
            route.select.add_order(order);
        }
        debug!(route = id.0, keys = route.eroute.order_by.len(), "scatter order by becomes merge sort");
        Ok(())
    }

    pub(crate) fn route_wireup(&mut self, id: NodeId, root: NodeId) -> PlanResult<()> {
        let order = self.order(id);
        let (needs_values, condition) = {
            let route = self.route_node(id)?;
            (route.eroute.values.is_none(), route.condition.clone())
        };
        if needs_values {
            let values = match &condition {
                Some(cond @ Expr::Comparison { right, .. }) => {
                    let value = self.procure_value(root, right, order)?;
                    let mut rewriter = ListArgRewriter { target: cond, done: false };
                    walk_select_mut(&mut rewriter, &mut self.route_node_mut(id)?.select);
                    vec![value]
                }
                Some(value) => vec![self.procure_value(root, value, order)?],
                None => Vec::new(),
            };
            self.route_node_mut(id)?.eroute.values = Some(values);
        }

        // An empty select list selects 1.
        let mut select = std::mem::take(&mut self.route_node_mut(id)?.select);
        if select.select_exprs.is_empty() {
            select.select_exprs.push(SelectExpr::Aliased(AliasedExpr::new(Expr::int(1))));
        }
        walk_select_mut(&mut EqualitySwapper { plan: self, id }, &mut select);
        self.route_node_mut(id)?.select = select;

        // Columns of other operators become join variables.
        let mut foreign = Vec::new();
        {
            let route = self.route_node(id)?;
            let mut collect = |e: &Expr| {
                if let Expr::Column(col) = e {
                    if !self.is_local(id, col) {
                        foreign.push(col.clone());
                    }
                }
                true
            };
            walk_select(&route.select, &mut collect);
        }
        let mut vars = HashMap::new();
        for col in &foreign {
            let name = self.procure(root, col, order)?;
            if let Some(c) = col.metadata {
                vars.insert(c, name);
            }
        }
        let mut shard_select = self.route_node(id)?.select.clone();
        walk_select_mut(&mut ShardQueryRewriter { vars: &vars }, &mut shard_select);

        let route = self.route_node_mut(id)?;
        route.eroute.query = shard_select.to_string();
        route.eroute.field_query = impossible_query(&shard_select);
        Ok(())
    }

    fn procure_value(&mut self, root: NodeId, value: &Expr, to: usize) -> PlanResult<ScalarExpr> {
        match value {
            Expr::Tuple(items) => Ok(ScalarExpr::Tuple {
                items: items
                    .iter()
                    .map(|item| self.procure_value(root, item, to))
                    .collect::<PlanResult<_>>()?,
            }),
            Expr::Column(col) => Ok(ScalarExpr::bind_var(self.procure(root, col, to)?)),
            other => to_scalar_expr(other).map_err(|e| PlanError::InvalidArgument(e.to_string())),
        }
    }

    /// Whether two routes can become one route running the joined query.
    pub(crate) fn join_can_merge(
        &mut self,
        st: SymtabId,
        left: NodeId,
        right: NodeId,
        ajoin: Option<&JoinTableExpr>,
    ) -> PlanResult<bool> {
        let (l, r) = (self.route_node(left)?, self.route_node(right)?);
        if l.eroute.keyspace.name != r.eroute.keyspace.name {
            return Ok(false);
        }
        if let Some(same) = same_destination(&l.eroute, &r.eroute)? {
            return Ok(same);
        }
        if r.eroute.opcode == RouteOpcode::Reference {
            return Ok(true);
        }
        match l.eroute.opcode {
            RouteOpcode::Unsharded | RouteOpcode::Dba => return Ok(l.eroute.opcode == r.eroute.opcode),
            RouteOpcode::EqualUnique => {
                if r.eroute.opcode == RouteOpcode::EqualUnique
                    && same_vindex(&l.eroute.vindex, &r.eroute.vindex)
                    && val_equal(l.condition.as_ref(), r.condition.as_ref())
                {
                    return Ok(true);
                }
            }
            RouteOpcode::Reference => return Ok(true),
            RouteOpcode::Next => return Ok(false),
            _ => {}
        }
        let Some(on) = ajoin.and_then(|j| j.condition.on.clone()) else {
            return Ok(false);
        };
        for filter in split_and_expression(Vec::new(), on) {
            if self.can_merge_on_filter(st, left, right, &filter) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// `a.unique_vindex_col = b.same_vindex_col` pins both sides to the
    /// same shard for every row.
    fn can_merge_on_filter(&mut self, st: SymtabId, left: NodeId, right: NodeId, filter: &Expr) -> bool {
        let Expr::Comparison { op: ComparisonOp::Eq, left: a, right: b } = filter else {
            return false;
        };
        let (lvindex, other) = match self.vindex_of(st, a, left) {
            Some(v) => (v, b),
            None => match self.vindex_of(st, b, left) {
                Some(v) => (v, a),
                None => return false,
            },
        };
        if !lvindex.is_unique() {
            return false;
        }
        same_vindex(&Some(lvindex), &self.vindex_of(st, other, right))
    }

    /// Whether `inner`, the plan of a subquery, can run inside `outer`.
    pub(crate) fn subquery_can_merge(&mut self, st: SymtabId, outer: NodeId, inner: NodeId) -> PlanResult<bool> {
        let (o, i) = (self.route_node(outer)?, self.route_node(inner)?);
        if o.eroute.keyspace.name != i.eroute.keyspace.name {
            return Ok(false);
        }
        if let Some(same) = same_destination(&o.eroute, &i.eroute)? {
            return Ok(same);
        }
        match o.eroute.opcode {
            RouteOpcode::Unsharded | RouteOpcode::Dba | RouteOpcode::Reference => {
                return Ok(o.eroute.opcode == i.eroute.opcode)
            }
            RouteOpcode::EqualUnique => {
                if i.eroute.opcode == RouteOpcode::EqualUnique
                    && same_vindex(&o.eroute.vindex, &i.eroute.vindex)
                    && val_equal(o.condition.as_ref(), i.condition.as_ref())
                {
                    return Ok(true);
                }
            }
            RouteOpcode::Next => return Ok(false),
            _ => {}
        }
        if i.eroute.opcode == RouteOpcode::Reference {
            return Ok(true);
        }
        // Correlated on the outer route's vindex: `where inner.vcol = outer.vcol`.
        let inner_vindex = i.eroute.vindex.clone();
        match i.condition.clone() {
            Some(cond @ Expr::Column(_)) => Ok(same_vindex(&self.vindex_of(st, &cond, outer), &inner_vindex)),
            _ => Ok(false),
        }
    }

    pub(crate) fn merge_subquery(&mut self, st: SymtabId, outer: NodeId, inner: NodeId) -> PlanResult<bool> {
        if !self.subquery_can_merge(st, outer, inner)? {
            return Ok(false);
        }
        debug!(outer = outer.0, inner = inner.0, "subquery merged into route");
        self.route_node_mut(inner)?.redirect = Some(outer);
        Ok(true)
    }
}

/// Routes with an explicit target only run together when both name the
/// same target. `None` means neither has one.
fn same_destination(a: &ERoute, b: &ERoute) -> PlanResult<Option<bool>> {
    match (&a.target_destination, &b.target_destination) {
        (None, None) => Ok(None),
        (Some(x), Some(y)) if x == y => Ok(Some(true)),
        _ => Err(PlanError::unsupported("SELECT with a target destination")),
    }
}

/// Replace the right side of the IN comparison used for routing with the
/// routing list variable.
struct ListArgRewriter<'e> {
    target: &'e Expr,
    done: bool,
}

impl VisitorMut for ListArgRewriter<'_> {
    fn visit_expr(&mut self, expr: &mut Expr) -> bool {
        if self.done {
            return false;
        }
        if &*expr == self.target {
            if let Expr::Comparison { right, .. } = expr {
                **right = Expr::ListArg(LIST_VAR_NAME.to_string());
            }
            self.done = true;
            return false;
        }
        true
    }
}

/// `value = col` becomes `col = value`.
struct EqualitySwapper<'p, 'a> {
    plan: &'p Plan<'a>,
    id: NodeId,
}

impl VisitorMut for EqualitySwapper<'_, '_> {
    fn visit_expr(&mut self, expr: &mut Expr) -> bool {
        if let Expr::Comparison { op: ComparisonOp::Eq, left, right } = expr {
            if self.plan.expr_is_value(self.id, left) && !self.plan.expr_is_value(self.id, right) {
                std::mem::swap(left, right);
            }
        }
        true
    }
}

/// Shard-facing rewrite: join variables for foreign columns, keyspace
/// qualifiers dropped from everything but system schemas.
struct ShardQueryRewriter<'v> {
    vars: &'v HashMap<ColumnRef, String>,
}

fn strip_keyspace(name: &mut TableName) {
    if !is_system_schema(name.qualifier_str()) {
        name.qualifier = None;
    }
}

impl VisitorMut for ShardQueryRewriter<'_> {
    fn visit_expr(&mut self, expr: &mut Expr) -> bool {
        if let Expr::Column(col) = expr {
            if let Some(var) = col.metadata.and_then(|c| self.vars.get(&c)) {
                *expr = Expr::Argument(var.clone());
            } else if let Some(q) = &mut col.qualifier {
                strip_keyspace(q);
            }
            return false;
        }
        true
    }

    fn visit_table_name(&mut self, name: &mut TableName) {
        strip_keyspace(name);
    }
}
