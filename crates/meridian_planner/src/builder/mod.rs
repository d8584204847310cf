//! Operator tree under construction.
//!
//! Nodes live in an arena owned by [`Plan`] and refer to each other by
//! [`NodeId`]. Every tree operation is an exhaustive match over
//! [`NodeKind`]; the per-kind behaviour lives in the submodules.

mod expr;
mod from;
pub(crate) mod join;
pub(crate) mod limit;
pub(crate) mod ordered_aggregate;
pub(crate) mod pullout;
pub(crate) mod route;
mod select;
pub(crate) mod subquery;
pub(crate) mod vindex_func;

use meridian_common::config::PlannerConfig;
use meridian_common::error::{PlanError, PlanResult};
use meridian_sql_frontend::ast::{AliasedExpr, ColName, Expr, Literal, Order, Select};

use crate::engine::Primitive;
use crate::jointab::Jointab;
use crate::symtab::{Column, ResultColumn, Symtab, SymtabId, TableSym};
use crate::vschema::VSchema;

pub(crate) use join::JoinNode;
pub(crate) use limit::LimitNode;
pub(crate) use ordered_aggregate::OrderedAggregateNode;
pub(crate) use pullout::{PendingPullout, PulloutNode};
pub(crate) use route::{ERoute, RouteNode};
pub(crate) use select::build_select_plan;
pub(crate) use subquery::SubqueryNode;
pub(crate) use vindex_func::VindexFuncNode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct NodeId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Clause {
    Where,
    Having,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NodeKind {
    Route,
    Join,
    Subquery,
    VindexFunc,
    Pullout,
    OrderedAggregate,
    Limit,
    SqlCalcFoundRows,
}

/// Two finished plans: the limited query and its row count.
#[derive(Debug)]
pub(crate) struct SqlCalcFoundRowsNode {
    pub limit: Primitive,
    pub count: Primitive,
}

#[derive(Debug)]
pub(crate) enum Node {
    Route(RouteNode),
    Join(JoinNode),
    Subquery(SubqueryNode),
    VindexFunc(VindexFuncNode),
    Pullout(PulloutNode),
    OrderedAggregate(OrderedAggregateNode),
    Limit(LimitNode),
    SqlCalcFoundRows(SqlCalcFoundRowsNode),
}

impl Node {
    fn kind(&self) -> NodeKind {
        match self {
            Node::Route(_) => NodeKind::Route,
            Node::Join(_) => NodeKind::Join,
            Node::Subquery(_) => NodeKind::Subquery,
            Node::VindexFunc(_) => NodeKind::VindexFunc,
            Node::Pullout(_) => NodeKind::Pullout,
            Node::OrderedAggregate(_) => NodeKind::OrderedAggregate,
            Node::Limit(_) => NodeKind::Limit,
            Node::SqlCalcFoundRows(_) => NodeKind::SqlCalcFoundRows,
        }
    }
}

/// Current root of a (sub)plan together with the scope it exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PrimitiveBuilder {
    pub bldr: NodeId,
    pub st: SymtabId,
}

/// All state for building one statement: the node, scope, table and
/// column arenas plus the join variable allocator.
pub(crate) struct Plan<'a> {
    pub vschema: &'a dyn VSchema,
    pub config: &'a PlannerConfig,
    pub nodes: Vec<Node>,
    pub symtabs: Vec<Symtab>,
    pub tables: Vec<TableSym>,
    pub columns: Vec<Column>,
    pub jt: Jointab,
}

macro_rules! node_accessors {
    ($($variant:ident => $ty:ty, $get:ident, $get_mut:ident;)*) => {
        impl Plan<'_> {
            $(
                #[allow(dead_code)]
                pub(crate) fn $get(&self, id: NodeId) -> PlanResult<&$ty> {
                    match &self.nodes[id.0] {
                        Node::$variant(n) => Ok(n),
                        other => Err(PlanError::invariant(format!(
                            "expected {} at node {}, found {:?}",
                            stringify!($variant),
                            id.0,
                            other.kind()
                        ))),
                    }
                }

                #[allow(dead_code)]
                pub(crate) fn $get_mut(&mut self, id: NodeId) -> PlanResult<&mut $ty> {
                    match &mut self.nodes[id.0] {
                        Node::$variant(n) => Ok(n),
                        other => Err(PlanError::invariant(format!(
                            "expected {} at node {}, found {:?}",
                            stringify!($variant),
                            id.0,
                            other.kind()
                        ))),
                    }
                }
            )*
        }
    };
}

node_accessors! {
    Route => RouteNode, route_node, route_node_mut;
    Join => JoinNode, join_node, join_node_mut;
    Subquery => SubqueryNode, subquery_node, subquery_node_mut;
    VindexFunc => VindexFuncNode, vindex_func_node, vindex_func_node_mut;
    Pullout => PulloutNode, pullout_node, pullout_node_mut;
    OrderedAggregate => OrderedAggregateNode, aggregate_node, aggregate_node_mut;
    Limit => LimitNode, limit_node, limit_node_mut;
}

impl<'a> Plan<'a> {
    pub(crate) fn new(vschema: &'a dyn VSchema, config: &'a PlannerConfig, jt: Jointab) -> Self {
        Plan {
            vschema,
            config,
            nodes: Vec::new(),
            symtabs: Vec::new(),
            tables: Vec::new(),
            columns: Vec::new(),
            jt,
        }
    }
}

impl Plan<'_> {
    pub(crate) fn add_node(&mut self, node: Node) -> NodeId {
        self.nodes.push(node);
        NodeId(self.nodes.len() - 1)
    }

    pub(crate) fn kind(&self, id: NodeId) -> NodeKind {
        self.nodes[id.0].kind()
    }

    pub(crate) fn as_route(&self, id: NodeId) -> Option<&RouteNode> {
        match &self.nodes[id.0] {
            Node::Route(r) => Some(r),
            _ => None,
        }
    }

    /// Follow merge redirects to the route that absorbed `id`.
    pub(crate) fn resolve(&self, mut id: NodeId) -> NodeId {
        while let Node::Route(RouteNode { redirect: Some(next), .. }) = &self.nodes[id.0] {
            id = *next;
        }
        id
    }

    /// Execution order of the node; a node only sees values from lower
    /// orders.
    pub(crate) fn order(&self, id: NodeId) -> usize {
        match &self.nodes[id.0] {
            Node::Route(n) => n.order,
            Node::Join(n) => n.order,
            Node::Subquery(n) => n.order,
            Node::VindexFunc(n) => n.order,
            Node::Pullout(n) => n.order,
            Node::OrderedAggregate(n) => n.order,
            Node::Limit(n) => n.order,
            Node::SqlCalcFoundRows(_) => 1,
        }
    }

    /// Renumber the subtree so that its first node gets `order + 1`.
    pub(crate) fn reorder(&mut self, id: NodeId, order: usize) {
        match self.kind(id) {
            NodeKind::Route | NodeKind::VindexFunc | NodeKind::SqlCalcFoundRows => {
                self.set_order(id, order + 1)
            }
            NodeKind::Join => self.join_reorder(id, order),
            NodeKind::Subquery => {
                if let Node::Subquery(n) = &self.nodes[id.0] {
                    let input = n.input;
                    self.reorder(input, order);
                    let next = self.order(input) + 1;
                    self.set_order(id, next);
                }
            }
            NodeKind::Pullout => self.pullout_reorder(id, order),
            NodeKind::OrderedAggregate | NodeKind::Limit => {
                if let Some(input) = self.unary_input(id) {
                    self.reorder(input, order);
                    let next = self.order(input) + 1;
                    self.set_order(id, next);
                }
            }
        }
    }

    fn set_order(&mut self, id: NodeId, order: usize) {
        match &mut self.nodes[id.0] {
            Node::Route(n) => n.order = order,
            Node::Join(n) => n.order = order,
            Node::Subquery(n) => n.order = order,
            Node::VindexFunc(n) => n.order = order,
            Node::Pullout(n) => n.order = order,
            Node::OrderedAggregate(n) => n.order = order,
            Node::Limit(n) => n.order = order,
            Node::SqlCalcFoundRows(_) => {}
        }
    }

    fn unary_input(&self, id: NodeId) -> Option<NodeId> {
        match &self.nodes[id.0] {
            Node::OrderedAggregate(n) => Some(n.input),
            Node::Limit(n) => Some(n.input),
            _ => None,
        }
    }

    /// Left-most leaf of the subtree.
    pub(crate) fn first(&self, id: NodeId) -> NodeId {
        match &self.nodes[id.0] {
            Node::Join(n) => self.first(n.left),
            Node::Pullout(n) => self.first(n.underlying),
            Node::OrderedAggregate(n) => self.first(n.input),
            Node::Limit(n) => self.first(n.input),
            Node::Route(_) | Node::Subquery(_) | Node::VindexFunc(_) | Node::SqlCalcFoundRows(_) => id,
        }
    }

    pub(crate) fn result_columns(&self, id: NodeId) -> &[ResultColumn] {
        match &self.nodes[id.0] {
            Node::Route(n) => &n.result_columns,
            Node::Join(n) => &n.result_columns,
            Node::Subquery(n) => &n.result_columns,
            Node::VindexFunc(n) => &n.result_columns,
            Node::Pullout(n) => self.result_columns(n.underlying),
            Node::OrderedAggregate(n) => &n.result_columns,
            Node::Limit(n) => self.result_columns(n.input),
            Node::SqlCalcFoundRows(_) => &[],
        }
    }

    pub(crate) fn push_filter(
        &mut self,
        id: NodeId,
        filter: Expr,
        clause: Clause,
        origin: NodeId,
    ) -> PlanResult<()> {
        match self.kind(id) {
            NodeKind::Route => self.route_push_filter(id, filter, clause),
            NodeKind::Join => self.join_push_filter(id, filter, clause, origin),
            NodeKind::Subquery => Err(PlanError::unsupported(
                "filtering on results of cross-shard subquery",
            )),
            NodeKind::VindexFunc => self.vindex_func_push_filter(id, filter),
            NodeKind::Pullout => {
                let underlying = self.pullout_node(id)?.underlying;
                self.push_filter(underlying, filter, clause, origin)
            }
            NodeKind::OrderedAggregate => {
                Err(PlanError::unsupported("filtering on results of aggregates"))
            }
            NodeKind::Limit | NodeKind::SqlCalcFoundRows => {
                Err(self.unreachable(id, "filter"))
            }
        }
    }

    /// Push a select expression to the node that owns `origin`, returning
    /// its result column and position in this node's output.
    pub(crate) fn push_select(
        &mut self,
        id: NodeId,
        expr: AliasedExpr,
        origin: NodeId,
    ) -> PlanResult<(ResultColumn, usize)> {
        match self.kind(id) {
            NodeKind::Route => self.route_push_select(id, expr),
            NodeKind::Join => self.join_push_select(id, expr, origin),
            NodeKind::Subquery => self.subquery_push_select(id, expr),
            NodeKind::VindexFunc => self.vindex_func_push_select(id, expr),
            NodeKind::Pullout => {
                let underlying = self.pullout_node(id)?.underlying;
                self.push_select(underlying, expr, origin)
            }
            NodeKind::OrderedAggregate => self.aggregate_push_select(id, expr, origin),
            NodeKind::Limit | NodeKind::SqlCalcFoundRows => Err(self.unreachable(id, "select expression")),
        }
    }

    pub(crate) fn make_distinct(&mut self, id: NodeId) -> PlanResult<()> {
        match self.kind(id) {
            NodeKind::Route => {
                self.route_node_mut(id)?.select.distinct = true;
                Ok(())
            }
            NodeKind::Join => Err(PlanError::unsupported("distinct on cross-shard join")),
            NodeKind::Subquery => Err(PlanError::unsupported("distinct on cross-shard subquery")),
            NodeKind::VindexFunc => Err(PlanError::unsupported("distinct on vindex function")),
            NodeKind::Pullout => {
                let underlying = self.pullout_node(id)?.underlying;
                self.make_distinct(underlying)
            }
            NodeKind::OrderedAggregate => self.aggregate_make_distinct(id),
            NodeKind::Limit | NodeKind::SqlCalcFoundRows => Err(self.unreachable(id, "distinct")),
        }
    }

    pub(crate) fn push_group_by(&mut self, id: NodeId, group_by: Vec<Expr>) -> PlanResult<()> {
        match self.kind(id) {
            NodeKind::Route => {
                self.route_node_mut(id)?.select.group_by = group_by;
                Ok(())
            }
            NodeKind::Join if group_by.is_empty() => Ok(()),
            NodeKind::Join => Err(PlanError::unsupported("group by on cross-shard join")),
            NodeKind::Subquery if group_by.is_empty() => Ok(()),
            NodeKind::Subquery => Err(PlanError::unsupported("group by on cross-shard subquery")),
            NodeKind::VindexFunc if group_by.is_empty() => Ok(()),
            NodeKind::VindexFunc => Err(PlanError::unsupported("group by on vindex function")),
            NodeKind::Pullout => {
                let underlying = self.pullout_node(id)?.underlying;
                self.push_group_by(underlying, group_by)
            }
            NodeKind::OrderedAggregate => self.aggregate_push_group_by(id, group_by),
            NodeKind::Limit | NodeKind::SqlCalcFoundRows => Err(self.unreachable(id, "group by")),
        }
    }

    pub(crate) fn push_order_by(&mut self, id: NodeId, order_by: Vec<Order>) -> PlanResult<()> {
        match self.kind(id) {
            NodeKind::Route => self.route_push_order_by(id, order_by),
            NodeKind::Join => self.join_push_order_by(id, order_by),
            NodeKind::Subquery if order_by.is_empty() => Ok(()),
            NodeKind::Subquery => Err(PlanError::unsupported("order by on cross-shard subquery")),
            NodeKind::VindexFunc if order_by.is_empty() => Ok(()),
            NodeKind::VindexFunc => Err(PlanError::unsupported("order by on vindex function")),
            NodeKind::Pullout => {
                let underlying = self.pullout_node(id)?.underlying;
                self.push_order_by(underlying, order_by)
            }
            NodeKind::OrderedAggregate => self.aggregate_push_order_by(id, order_by),
            NodeKind::Limit | NodeKind::SqlCalcFoundRows => Err(self.unreachable(id, "order by")),
        }
    }

    /// Bound the rows a node needs to return when a gateway LIMIT sits
    /// above it. Nodes that cannot use the bound ignore it.
    pub(crate) fn set_upper_limit(&mut self, id: NodeId, count: Expr) -> PlanResult<()> {
        match self.kind(id) {
            NodeKind::Route => {
                self.route_node_mut(id)?.select.limit =
                    Some(meridian_sql_frontend::ast::Limit { offset: None, rowcount: count });
                Ok(())
            }
            NodeKind::Join | NodeKind::Subquery | NodeKind::VindexFunc | NodeKind::SqlCalcFoundRows => {
                Ok(())
            }
            NodeKind::Pullout => {
                let underlying = self.pullout_node(id)?.underlying;
                self.set_upper_limit(underlying, count)
            }
            NodeKind::OrderedAggregate => {
                let node = self.aggregate_node(id)?;
                // Rows of one group are spread over the extra distinct key.
                if node.extra_distinct.is_some() {
                    return Ok(());
                }
                let input = node.input;
                self.set_upper_limit(input, count)
            }
            NodeKind::Limit => {
                let input = self.limit_node(id)?.input;
                self.set_upper_limit(input, count)
            }
        }
    }

    /// Comments, locking clause and INTO go to every route.
    pub(crate) fn push_misc(&mut self, id: NodeId, sel: &Select) -> PlanResult<()> {
        match self.kind(id) {
            NodeKind::Route => {
                let route = self.route_node_mut(id)?;
                route.select.comments = sel.comments.clone();
                route.select.lock = sel.lock;
                route.select.into = sel.into.clone();
                Ok(())
            }
            NodeKind::Join => {
                let (left, right) = {
                    let j = self.join_node(id)?;
                    (j.left, j.right)
                };
                self.push_misc(left, sel)?;
                self.push_misc(right, sel)
            }
            NodeKind::Subquery => {
                let input = self.subquery_node(id)?.input;
                self.push_misc(input, sel)
            }
            NodeKind::VindexFunc | NodeKind::SqlCalcFoundRows => Ok(()),
            NodeKind::Pullout => {
                let (subquery, underlying) = {
                    let p = self.pullout_node(id)?;
                    (p.subquery, p.underlying)
                };
                self.push_misc(underlying, sel)?;
                self.push_misc(subquery, sel)
            }
            NodeKind::OrderedAggregate | NodeKind::Limit => match self.unary_input(id) {
                Some(input) => self.push_misc(input, sel),
                None => Ok(()),
            },
        }
    }

    /// Final pass: generate route queries and bind join variables.
    /// `root` is the node join variables are requested through.
    pub(crate) fn wireup(&mut self, id: NodeId, root: NodeId) -> PlanResult<()> {
        match self.kind(id) {
            NodeKind::Route => self.route_wireup(id, root),
            NodeKind::Join => {
                let (left, right) = {
                    let j = self.join_node(id)?;
                    (j.left, j.right)
                };
                self.wireup(right, root)?;
                self.wireup(left, root)
            }
            NodeKind::Subquery => {
                let input = self.subquery_node(id)?.input;
                self.wireup(input, input)
            }
            NodeKind::VindexFunc | NodeKind::SqlCalcFoundRows => Ok(()),
            NodeKind::Pullout => {
                let (subquery, underlying) = {
                    let p = self.pullout_node(id)?;
                    (p.subquery, p.underlying)
                };
                self.wireup(underlying, root)?;
                self.wireup(subquery, root)
            }
            NodeKind::OrderedAggregate | NodeKind::Limit => match self.unary_input(id) {
                Some(input) => self.wireup(input, root),
                None => Ok(()),
            },
        }
    }

    /// Make `col`, produced at order `from`, available as `varname` to the
    /// node at order `to`.
    pub(crate) fn supply_var(
        &mut self,
        id: NodeId,
        from: usize,
        to: usize,
        col: &ColName,
        varname: &str,
    ) -> PlanResult<()> {
        match self.kind(id) {
            NodeKind::Join => self.join_supply_var(id, from, to, col, varname),
            NodeKind::Pullout => {
                let (subquery, underlying) = {
                    let p = self.pullout_node(id)?;
                    (p.subquery, p.underlying)
                };
                if from <= self.order(subquery) {
                    self.supply_var(subquery, from, to, col, varname)
                } else {
                    self.supply_var(underlying, from, to, col, varname)
                }
            }
            NodeKind::OrderedAggregate | NodeKind::Limit => match self.unary_input(id) {
                Some(input) => self.supply_var(input, from, to, col, varname),
                None => Ok(()),
            },
            NodeKind::Route | NodeKind::Subquery | NodeKind::VindexFunc | NodeKind::SqlCalcFoundRows => {
                Err(PlanError::invariant(format!(
                    "{:?} is atomic and cannot supply join variable {varname}",
                    self.kind(id)
                )))
            }
        }
    }

    /// Add `col` to the node's output if it is not already there.
    pub(crate) fn supply_col(&mut self, id: NodeId, col: &ColName) -> PlanResult<(ResultColumn, usize)> {
        match self.kind(id) {
            NodeKind::Route => self.route_supply_col(id, col),
            NodeKind::Join => self.join_supply_col(id, col),
            NodeKind::Subquery => self.subquery_supply_col(id, col),
            NodeKind::VindexFunc => self.vindex_func_supply_col(id, col),
            NodeKind::Pullout => {
                let underlying = self.pullout_node(id)?.underlying;
                self.supply_col(underlying, col)
            }
            NodeKind::OrderedAggregate | NodeKind::Limit | NodeKind::SqlCalcFoundRows => {
                Err(PlanError::invariant(format!(
                    "nothing should depend on the output of {:?}",
                    self.kind(id)
                )))
            }
        }
    }

    pub(crate) fn primitive(&self, id: NodeId) -> PlanResult<Primitive> {
        match &self.nodes[id.0] {
            Node::Route(n) => Ok(Primitive::Route(n.to_primitive())),
            Node::Join(n) => self.join_primitive(n),
            Node::Subquery(n) => self.subquery_primitive(n),
            Node::VindexFunc(n) => Ok(n.to_primitive()),
            Node::Pullout(n) => self.pullout_primitive(n),
            Node::OrderedAggregate(n) => self.aggregate_primitive(n),
            Node::Limit(n) => self.limit_primitive(n),
            Node::SqlCalcFoundRows(n) => Ok(Primitive::SqlCalcFoundRows(
                crate::engine::SqlCalcFoundRows {
                    limit_query: Box::new(n.limit.clone()),
                    count_query: Box::new(n.count.clone()),
                },
            )),
        }
    }

    fn unreachable(&self, id: NodeId, what: &str) -> PlanError {
        PlanError::invariant(format!("{what} pushed into {:?}", self.kind(id)))
    }
}

/// 1-based ordinal of a result column as used by ORDER BY and GROUP BY.
pub(crate) fn result_from_number(rcs: &[ResultColumn], lit: &Literal) -> PlanResult<usize> {
    let Literal::Int(text) = lit else {
        return Err(PlanError::InvalidArgument("column number is not an int".into()));
    };
    let num: i64 = text
        .parse()
        .map_err(|_| PlanError::InvalidArgument(format!("error parsing column number: {text}")))?;
    if num < 1 || num as usize > rcs.len() {
        return Err(PlanError::InvalidArgument(format!("column number out of range: {num}")));
    }
    Ok(num as usize - 1)
}

/// Reference to result column `index` by its alias.
pub(crate) fn build_col_name(rcs: &[ResultColumn], index: usize) -> PlanResult<ColName> {
    let alias = &rcs[index].alias;
    if alias.is_empty() {
        return Err(PlanError::unsupported("cannot reference a complex expression"));
    }
    if rcs.iter().enumerate().any(|(i, rc)| i != index && rc.alias.equal_ci(alias)) {
        return Err(PlanError::unsupported(format!(
            "cannot reference an ambiguous column: {alias}"
        )));
    }
    Ok(ColName {
        metadata: Some(rcs[index].column),
        qualifier: None,
        name: alias.clone(),
    })
}

/// `ORDER BY NULL` and `ORDER BY RAND()` carry no ordering the gateway
/// has to preserve.
pub(crate) fn is_special_order(order_by: &[Order]) -> bool {
    match order_by {
        [order] => {
            order.expr.is_null_literal() || order.expr.func_name().as_deref() == Some("rand")
        }
        _ => false,
    }
}
