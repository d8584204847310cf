use std::collections::BTreeMap;

use meridian_common::error::{PlanError, PlanResult};
use meridian_sql_frontend::ast::{AliasedExpr, ColName, Expr, Literal, Order};
use meridian_sql_frontend::visit::walk_expr;

use super::{is_special_order, result_from_number, Clause, NodeId, Plan};
use crate::engine::{Join, JoinOpcode, Primitive};
use crate::symtab::{col_ref, ResultColumn};

/// Nested-loop join of two subtrees. The right side runs once per left
/// row, with left values bound as join variables.
#[derive(Debug)]
pub(crate) struct JoinNode {
    pub order: usize,
    pub left: NodeId,
    pub right: NodeId,
    pub opcode: JoinOpcode,
    pub cols: Vec<isize>,
    pub vars: BTreeMap<String, usize>,
    pub result_columns: Vec<ResultColumn>,
}

fn left_col(n: usize) -> isize {
    -(n as isize) - 1
}

fn right_col(n: usize) -> isize {
    n as isize + 1
}

impl Plan<'_> {
    fn join_parts(&self, id: NodeId) -> PlanResult<(NodeId, NodeId, JoinOpcode)> {
        let j = self.join_node(id)?;
        Ok((j.left, j.right, j.opcode))
    }

    /// Nodes with an order at or below the left side's run before the
    /// right side starts.
    fn is_on_left(&self, id: NodeId, order: usize) -> PlanResult<bool> {
        let left = self.join_node(id)?.left;
        Ok(order <= self.order(left))
    }

    pub(crate) fn join_reorder(&mut self, id: NodeId, order: usize) {
        let (left, right) = match &self.nodes[id.0] {
            super::Node::Join(j) => (j.left, j.right),
            _ => return,
        };
        self.reorder(left, order);
        let left_order = self.order(left);
        self.reorder(right, left_order);
        let next = self.order(right) + 1;
        self.set_order(id, next);
    }

    pub(crate) fn join_push_filter(
        &mut self,
        id: NodeId,
        filter: Expr,
        clause: Clause,
        origin: NodeId,
    ) -> PlanResult<()> {
        let (left, right, opcode) = self.join_parts(id)?;
        if self.is_on_left(id, self.order(origin))? {
            return self.push_filter(left, filter, clause, origin);
        }
        if opcode == JoinOpcode::LeftJoin {
            return Err(PlanError::unsupported("cross-shard left join and where clause"));
        }
        self.push_filter(right, filter, clause, origin)
    }

    pub(crate) fn join_push_select(
        &mut self,
        id: NodeId,
        expr: AliasedExpr,
        origin: NodeId,
    ) -> PlanResult<(ResultColumn, usize)> {
        let (left, right, opcode) = self.join_parts(id)?;
        let (rc, col) = if self.is_on_left(id, self.order(origin))? {
            let (rc, n) = self.push_select(left, expr, origin)?;
            (rc, left_col(n))
        } else {
            // The right side of a left join may be null-extended; only plain
            // columns survive that.
            if opcode == JoinOpcode::LeftJoin && !matches!(expr.expr, Expr::Column(_)) {
                return Err(PlanError::unsupported("cross-shard left join and column expressions"));
            }
            let (rc, n) = self.push_select(right, expr, origin)?;
            (rc, right_col(n))
        };
        let j = self.join_node_mut(id)?;
        j.cols.push(col);
        j.result_columns.push(rc.clone());
        Ok((rc, j.result_columns.len() - 1))
    }

    /// Sorting is only possible when every key comes from the left side,
    /// which then drives the output order.
    pub(crate) fn join_push_order_by(&mut self, id: NodeId, order_by: Vec<Order>) -> PlanResult<()> {
        let (left, right, _) = self.join_parts(id)?;
        if order_by.is_empty() || is_special_order(&order_by) {
            self.push_order_by(left, order_by.clone())?;
            return self.push_order_by(right, order_by);
        }

        let left_order = self.order(left);
        let mut pushed = Vec::with_capacity(order_by.len());
        for order in order_by {
            if let Expr::Literal(lit) = &order.expr {
                let j = self.join_node(id)?;
                let num = result_from_number(&j.result_columns, lit)?;
                if j.cols[num] >= 0 {
                    return Err(PlanError::unsupported("order by spans across shards"));
                }
                // Renumber against the left side's own select list.
                let ordinal = -j.cols[num];
                pushed.push(Order {
                    expr: Expr::Literal(Literal::Int(ordinal.to_string())),
                    direction: order.direction,
                });
                continue;
            }
            let mut spans = false;
            walk_expr(&order.expr, &mut |e| {
                if let Expr::Column(col) = e {
                    spans |= col
                        .metadata
                        .is_some_and(|c| self.order(self.column_origin(c)) > left_order);
                }
                !spans
            });
            if spans {
                return Err(PlanError::unsupported("order by spans across shards"));
            }
            pushed.push(order);
        }
        self.push_order_by(left, pushed)?;
        self.push_order_by(right, Vec::new())
    }

    pub(crate) fn join_supply_var(
        &mut self,
        id: NodeId,
        from: usize,
        to: usize,
        col: &ColName,
        varname: &str,
    ) -> PlanResult<()> {
        let (left, right, _) = self.join_parts(id)?;
        if !self.is_on_left(id, from)? {
            return self.supply_var(right, from, to, col, varname);
        }
        if self.is_on_left(id, to)? {
            return self.supply_var(left, from, to, col, varname);
        }
        if self.join_node(id)?.vars.contains_key(varname) {
            return Ok(());
        }
        let c = col_ref(col)?;
        let index = match self.result_columns(left).iter().position(|rc| rc.column == c) {
            Some(i) => i,
            None => self.supply_col(left, col)?.1,
        };
        self.join_node_mut(id)?.vars.insert(varname.to_string(), index);
        Ok(())
    }

    pub(crate) fn join_supply_col(&mut self, id: NodeId, col: &ColName) -> PlanResult<(ResultColumn, usize)> {
        let c = col_ref(col)?;
        let (left, right, _) = self.join_parts(id)?;
        {
            let j = self.join_node(id)?;
            if let Some(i) = j.result_columns.iter().position(|rc| rc.column == c) {
                return Ok((j.result_columns[i].clone(), i));
            }
        }
        let source_order = self.order(self.column_origin(c));
        let (rc, slot) = if self.is_on_left(id, source_order)? {
            let (rc, n) = self.supply_col(left, col)?;
            (rc, left_col(n))
        } else {
            let (rc, n) = self.supply_col(right, col)?;
            (rc, right_col(n))
        };
        let j = self.join_node_mut(id)?;
        j.cols.push(slot);
        j.result_columns.push(rc.clone());
        Ok((rc, j.result_columns.len() - 1))
    }

    pub(crate) fn join_primitive(&self, j: &JoinNode) -> PlanResult<Primitive> {
        Ok(Primitive::Join(Join {
            opcode: j.opcode,
            left: Box::new(self.primitive(j.left)?),
            right: Box::new(self.primitive(j.right)?),
            cols: j.cols.clone(),
            vars: j.vars.clone(),
        }))
    }
}
