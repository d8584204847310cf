//! Finished plan primitives handed to the execution engine.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::evalengine::ScalarExpr;
use crate::vschema::Destination;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RouteOpcode {
    Unsharded,
    EqualUnique,
    Equal,
    In,
    Scatter,
    Next,
    Dba,
    Reference,
    /// The filter can never match; no shard is contacted.
    None,
    ByDestination,
}

impl RouteOpcode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteOpcode::Unsharded => "SelectUnsharded",
            RouteOpcode::EqualUnique => "SelectEqualUnique",
            RouteOpcode::Equal => "SelectEqual",
            RouteOpcode::In => "SelectIN",
            RouteOpcode::Scatter => "SelectScatter",
            RouteOpcode::Next => "SelectNext",
            RouteOpcode::Dba => "SelectDBA",
            RouteOpcode::Reference => "SelectReference",
            RouteOpcode::None => "SelectNone",
            RouteOpcode::ByDestination => "SelectByDestination",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OrderByParams {
    pub col: usize,
    pub desc: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Route {
    pub opcode: RouteOpcode,
    pub keyspace: String,
    pub query: String,
    pub field_query: String,
    pub vindex: Option<String>,
    pub values: Vec<ScalarExpr>,
    pub order_by: Vec<OrderByParams>,
    pub table_name: String,
    pub query_timeout_ms: u64,
    pub scatter_errors_as_warnings: bool,
    pub sys_table_keyspace_expr: Option<ScalarExpr>,
    pub target_destination: Option<Destination>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum JoinOpcode {
    NormalJoin,
    LeftJoin,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Join {
    pub opcode: JoinOpcode,
    pub left: Box<Primitive>,
    pub right: Box<Primitive>,
    /// Negative entries -(n+1) take column n from the left, positive n+1
    /// from the right.
    pub cols: Vec<isize>,
    /// Join variable name -> left column that supplies it.
    pub vars: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Subquery {
    pub cols: Vec<usize>,
    pub subquery: Box<Primitive>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum VindexOpcode {
    VindexNone,
    VindexMap,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VindexFunc {
    pub opcode: VindexOpcode,
    pub fields: Vec<String>,
    pub cols: Vec<usize>,
    pub vindex: String,
    pub value: Option<ScalarExpr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PulloutOpcode {
    PulloutValue,
    PulloutIn,
    PulloutNotIn,
    PulloutExists,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PulloutSubquery {
    pub opcode: PulloutOpcode,
    pub subquery_name: String,
    pub has_values: String,
    pub subquery: Box<Primitive>,
    pub underlying: Box<Primitive>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AggregateOpcode {
    Count,
    Sum,
    Min,
    Max,
    CountDistinct,
    SumDistinct,
}

impl AggregateOpcode {
    /// Aggregates the gateway can merge across shards.
    pub fn from_func_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "count" => Some(AggregateOpcode::Count),
            "sum" => Some(AggregateOpcode::Sum),
            "min" => Some(AggregateOpcode::Min),
            "max" => Some(AggregateOpcode::Max),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AggregateParams {
    pub opcode: AggregateOpcode,
    pub col: usize,
    pub alias: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderedAggregate {
    pub has_distinct: bool,
    pub aggregates: Vec<AggregateParams>,
    pub keys: Vec<usize>,
    pub input: Box<Primitive>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Limit {
    pub count: ScalarExpr,
    pub offset: Option<ScalarExpr>,
    pub input: Box<Primitive>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Projection {
    pub cols: Vec<String>,
    pub exprs: Vec<ScalarExpr>,
    pub input: Box<Primitive>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Lock {
    pub keyspace: String,
    pub target_destination: Destination,
    pub query: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SqlCalcFoundRows {
    pub limit_query: Box<Primitive>,
    pub count_query: Box<Primitive>,
}

/// Runnable plan tree.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "operator")]
pub enum Primitive {
    Route(Route),
    Join(Join),
    Subquery(Subquery),
    VindexFunc(VindexFunc),
    PulloutSubquery(PulloutSubquery),
    OrderedAggregate(OrderedAggregate),
    Limit(Limit),
    Projection(Projection),
    SingleRow,
    Lock(Lock),
    SqlCalcFoundRows(SqlCalcFoundRows),
}

impl Primitive {
    pub fn children(&self) -> Vec<&Primitive> {
        match self {
            Primitive::Route(_)
            | Primitive::VindexFunc(_)
            | Primitive::SingleRow
            | Primitive::Lock(_) => Vec::new(),
            Primitive::Join(j) => vec![j.left.as_ref(), j.right.as_ref()],
            Primitive::Subquery(s) => vec![s.subquery.as_ref()],
            Primitive::PulloutSubquery(p) => vec![p.subquery.as_ref(), p.underlying.as_ref()],
            Primitive::OrderedAggregate(a) => vec![a.input.as_ref()],
            Primitive::Limit(l) => vec![l.input.as_ref()],
            Primitive::Projection(p) => vec![p.input.as_ref()],
            Primitive::SqlCalcFoundRows(s) => vec![s.limit_query.as_ref(), s.count_query.as_ref()],
        }
    }

    /// Every route in the tree, pre-order.
    pub fn routes(&self) -> Vec<&Route> {
        let mut out = Vec::new();
        self.collect_routes(&mut out);
        out
    }

    fn collect_routes<'a>(&'a self, out: &mut Vec<&'a Route>) {
        if let Primitive::Route(r) = self {
            out.push(r);
        }
        for child in self.children() {
            child.collect_routes(out);
        }
    }

    pub fn has_scatter(&self) -> bool {
        self.routes().iter().any(|r| r.opcode == RouteOpcode::Scatter)
    }

    pub fn as_route(&self) -> Option<&Route> {
        match self {
            Primitive::Route(r) => Some(r),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}
