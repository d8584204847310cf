use meridian_common::error::{PlanError, PlanResult};
use meridian_sql_frontend::ast::{Expr, Limit};
use tracing::debug;

use super::{Node, NodeId, Plan};
use crate::engine::{self, Primitive};
use crate::evalengine::{to_scalar_expr, ScalarExpr};

/// Gateway-side LIMIT over a plan that spans shards.
#[derive(Debug)]
pub(crate) struct LimitNode {
    pub order: usize,
    pub input: NodeId,
    pub count: ScalarExpr,
    pub offset: Option<ScalarExpr>,
}

fn limit_text(limit: &Limit) -> String {
    match &limit.offset {
        Some(offset) => format!("limit {offset}, {}", limit.rowcount),
        None => format!("limit {}", limit.rowcount),
    }
}

fn limit_value(expr: &Expr, limit: &Limit) -> PlanResult<ScalarExpr> {
    if !expr.is_value() {
        return Err(PlanError::InvalidArgument(format!(
            "unexpected expression in LIMIT: {}",
            limit_text(limit)
        )));
    }
    to_scalar_expr(expr).map_err(|e| PlanError::InvalidArgument(e.to_string()))
}

impl Plan<'_> {
    /// Put a LIMIT node above `input`. Every shard still only needs to
    /// return offset + count rows, passed down as the upper limit variable.
    pub(crate) fn new_limit(&mut self, input: NodeId, limit: &Limit) -> PlanResult<NodeId> {
        let count = limit_value(&limit.rowcount, limit)?;
        let offset = limit.offset.as_ref().map(|o| limit_value(o, limit)).transpose()?;
        let upper = Expr::Argument(self.config.upper_limit_bind_var.clone());
        self.set_upper_limit(input, upper)?;
        let id = self.add_node(Node::Limit(LimitNode { order: 0, input, count, offset }));
        self.reorder(id, 0);
        debug!(limit = id.0, input = input.0, "limit applied at the gateway");
        Ok(id)
    }

    pub(crate) fn limit_primitive(&self, l: &LimitNode) -> PlanResult<Primitive> {
        Ok(Primitive::Limit(engine::Limit {
            count: l.count.clone(),
            offset: l.offset.clone(),
            input: Box::new(self.primitive(l.input)?),
        }))
    }
}
