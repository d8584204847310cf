//! Gateway-side grouping over a scatter route whose rows arrive sorted by
//! the group keys.

use meridian_common::error::{PlanError, PlanResult};
use meridian_sql_frontend::ast::{AliasedExpr, ColName, Expr, FuncArg, FuncExpr, Order, OrderDirection};
use meridian_sql_frontend::node_has_aggregates;

use super::{build_col_name, result_from_number, NodeId, Plan};
use crate::engine::{AggregateOpcode, AggregateParams, OrderedAggregate, Primitive};
use crate::symtab::ResultColumn;

#[derive(Debug)]
pub(crate) struct OrderedAggregateNode {
    pub order: usize,
    pub input: NodeId,
    /// Output columns that form the group key.
    pub keys: Vec<usize>,
    pub aggregates: Vec<AggregateParams>,
    pub has_distinct: bool,
    /// Inner column of the one `count(distinct x)` / `sum(distinct x)`;
    /// the input is grouped and sorted on it too.
    pub extra_distinct: Option<ColName>,
    pub result_columns: Vec<ResultColumn>,
}

impl Plan<'_> {
    pub(crate) fn aggregate_push_select(
        &mut self,
        id: NodeId,
        expr: AliasedExpr,
        origin: NodeId,
    ) -> PlanResult<(ResultColumn, usize)> {
        if let Expr::Func(func) = &expr.expr {
            if let Some(opcode) = AggregateOpcode::from_func_name(func.name.as_str()) {
                let func = func.clone();
                return self.push_aggr(id, expr, func, opcode, origin);
            }
        }
        if node_has_aggregates(&expr.expr) {
            return Err(PlanError::unsupported(
                "in scatter query: complex aggregate expression",
            ));
        }
        let input = self.aggregate_node(id)?.input;
        let (inner_rc, _) = self.push_select(input, expr, origin)?;
        let oa = self.aggregate_node_mut(id)?;
        oa.result_columns.push(inner_rc.clone());
        Ok((inner_rc, oa.result_columns.len() - 1))
    }

    fn push_aggr(
        &mut self,
        id: NodeId,
        expr: AliasedExpr,
        func: FuncExpr,
        mut opcode: AggregateOpcode,
        origin: NodeId,
    ) -> PlanResult<(ResultColumn, usize)> {
        if func.args.len() != 1 {
            return Err(PlanError::unsupported(format!(
                "only one expression allowed inside aggregates: {}",
                Expr::Func(func)
            )));
        }
        let input = self.aggregate_node(id)?.input;
        let distinct_arg = self.distinct_handling(input, &func, opcode)?;
        let params = match distinct_arg {
            Some(inner) => {
                if self.aggregate_node(id)?.extra_distinct.is_some() {
                    return Err(PlanError::unsupported(format!(
                        "only one distinct aggregation allowed in a select: {}",
                        Expr::Func(func)
                    )));
                }
                let (_, inner_col) = self.push_select(input, AliasedExpr::new(inner), origin)?;
                let col = build_col_name(self.result_columns(input), inner_col)?;
                let alias = match &expr.alias {
                    Some(alias) => alias.as_str().to_string(),
                    None => Expr::Func(func).to_string(),
                };
                opcode = match opcode {
                    AggregateOpcode::Count => AggregateOpcode::CountDistinct,
                    AggregateOpcode::Sum => AggregateOpcode::SumDistinct,
                    other => other,
                };
                let oa = self.aggregate_node_mut(id)?;
                oa.extra_distinct = Some(col);
                oa.has_distinct = true;
                AggregateParams { opcode, col: inner_col, alias: Some(alias) }
            }
            None => {
                let (_, inner_col) = self.push_select(input, expr.clone(), origin)?;
                AggregateParams { opcode, col: inner_col, alias: None }
            }
        };

        // The aggregate's value is produced here, not by the route.
        let rc = self.new_result_column(&expr, id);
        let oa = self.aggregate_node_mut(id)?;
        oa.aggregates.push(params);
        oa.result_columns.push(rc.clone());
        Ok((rc, oa.result_columns.len() - 1))
    }

    /// The inner expression of a distinct count or sum the gateway has to
    /// deduplicate itself. A unique vindex column is already distinct per
    /// shard.
    fn distinct_handling(
        &self,
        input: NodeId,
        func: &FuncExpr,
        opcode: AggregateOpcode,
    ) -> PlanResult<Option<Expr>> {
        if !func.distinct || !matches!(opcode, AggregateOpcode::Count | AggregateOpcode::Sum) {
            return Ok(None);
        }
        let FuncArg::Expr(inner) = &func.args[0] else {
            return Err(PlanError::Parse(Expr::Func(func.clone()).to_string()));
        };
        if self.resolved_vindex(inner, input).is_some_and(|v| v.is_unique()) {
            return Ok(None);
        }
        Ok(Some(inner.clone()))
    }

    pub(crate) fn aggregate_make_distinct(&mut self, id: NodeId) -> PlanResult<()> {
        let oa = self.aggregate_node(id)?;
        let input = oa.input;
        let mut keys = Vec::with_capacity(oa.result_columns.len());
        for (i, rc) in oa.result_columns.iter().enumerate() {
            if self.column_origin(rc.column) == id {
                return Err(PlanError::unsupported(
                    "distinct cannot be combined with aggregate functions",
                ));
            }
            keys.push(i);
        }
        self.aggregate_node_mut(id)?.keys.extend(keys);
        self.make_distinct(input)
    }

    pub(crate) fn aggregate_push_group_by(&mut self, id: NodeId, mut group_by: Vec<Expr>) -> PlanResult<()> {
        let mut keys = Vec::with_capacity(group_by.len());
        {
            let oa = self.aggregate_node(id)?;
            for expr in &group_by {
                let col_number = match expr {
                    Expr::Column(col) => {
                        let c = crate::symtab::col_ref(col)?;
                        if self.column_origin(c) == id {
                            return Err(PlanError::InvalidArgument(format!(
                                "group by expression cannot reference an aggregate function: {col}"
                            )));
                        }
                        oa.result_columns.iter().position(|rc| rc.column == c).ok_or_else(|| {
                            PlanError::unsupported(
                                "in scatter query: group by column must reference column in SELECT list",
                            )
                        })?
                    }
                    Expr::Literal(lit) => result_from_number(&oa.result_columns, lit)?,
                    _ => {
                        return Err(PlanError::unsupported(
                            "in scatter query: only simple references allowed",
                        ))
                    }
                };
                keys.push(col_number);
            }
        }
        let oa = self.aggregate_node_mut(id)?;
        oa.keys.extend(keys);
        if let Some(extra) = &oa.extra_distinct {
            group_by.push(Expr::Column(extra.clone()));
        }
        let input = oa.input;
        self.push_group_by(input, group_by)
    }

    /// The input must come sorted on every group key. The requested order
    /// may only rearrange or flip group keys.
    pub(crate) fn aggregate_push_order_by(&mut self, id: NodeId, order_by: Vec<Order>) -> PlanResult<()> {
        if matches!(order_by.as_slice(), [order] if order.expr.is_null_literal()) {
            return Ok(());
        }
        let oa = self.aggregate_node(id)?;
        let input = oa.input;
        let mut referenced = vec![false; oa.keys.len()];
        let mut pushed = Vec::with_capacity(order_by.len() + oa.keys.len() + 1);
        for order in order_by {
            let column = match &order.expr {
                Expr::Literal(lit) => oa.result_columns[result_from_number(&oa.result_columns, lit)?].column,
                Expr::Column(col) => crate::symtab::col_ref(col)?,
                other => {
                    return Err(PlanError::unsupported(format!(
                        "in scatter query: complex order by expression: {other}"
                    )))
                }
            };
            let Some(j) = oa.keys.iter().position(|&key| oa.result_columns[key].column == column) else {
                return Err(PlanError::unsupported(
                    "in scatter query: order by must reference a group by column",
                ));
            };
            referenced[j] = true;
            pushed.push(order);
        }

        for (j, &key) in oa.keys.iter().enumerate() {
            if referenced[j] {
                continue;
            }
            let col = build_col_name(self.result_columns(input), key).map_err(|e| {
                PlanError::InvalidArgument(format!("generating order by clause: {e}"))
            })?;
            pushed.push(Order { expr: Expr::Column(col), direction: OrderDirection::Asc });
        }
        if let Some(extra) = &oa.extra_distinct {
            pushed.push(Order::asc(Expr::Column(extra.clone())));
        }
        self.push_order_by(input, pushed)
    }

    pub(crate) fn aggregate_primitive(&self, oa: &OrderedAggregateNode) -> PlanResult<Primitive> {
        Ok(Primitive::OrderedAggregate(OrderedAggregate {
            has_distinct: oa.has_distinct,
            aggregates: oa.aggregates.clone(),
            keys: oa.keys.clone(),
            input: Box::new(self.primitive(oa.input)?),
        }))
    }
}
