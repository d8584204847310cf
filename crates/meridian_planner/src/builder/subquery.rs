use meridian_common::error::{PlanError, PlanResult};
use meridian_sql_frontend::ast::{AliasedExpr, ColName, Expr, Ident, TableName};

use super::{Node, NodeId, Plan};
use crate::engine::{Primitive, Subquery};
use crate::symtab::{col_ref, Column, ResultColumn, SymtabId, TableSym};

/// Derived table whose rows the gateway has to materialize because the
/// inner plan is not a single route.
#[derive(Debug)]
pub(crate) struct SubqueryNode {
    pub order: usize,
    pub input: NodeId,
    /// Input column per output column.
    pub cols: Vec<usize>,
    pub result_columns: Vec<ResultColumn>,
}

impl Plan<'_> {
    /// Wrap `input` as derived table `alias`. The table exposes exactly the
    /// input's result columns.
    pub(crate) fn new_subquery(&mut self, alias: Ident, input: NodeId) -> PlanResult<(NodeId, SymtabId)> {
        let sq = self.add_node(Node::Subquery(SubqueryNode {
            order: self.order(input) + 1,
            input,
            cols: Vec::new(),
            result_columns: Vec::new(),
        }));
        let st = self.new_symtab(None);
        let t = self.new_table(TableSym {
            is_authoritative: true,
            ..TableSym::new(TableName { qualifier: None, name: alias }, sq)
        });
        let aliases: Vec<Ident> = self.result_columns(input).iter().map(|rc| rc.alias.clone()).collect();
        for alias in aliases {
            if self.tables[t.0].columns.contains_key(&alias.lowered()) {
                return Err(PlanError::InvalidArgument(format!(
                    "duplicate column names in subquery: {alias}"
                )));
            }
            let c = self.new_column(Column::new(sq, Some(st)));
            self.table_add_column(t, alias, c);
        }
        self.add_table(st, t)?;
        Ok((sq, st))
    }

    pub(crate) fn subquery_push_select(&mut self, id: NodeId, expr: AliasedExpr) -> PlanResult<(ResultColumn, usize)> {
        let Expr::Column(col) = &expr.expr else {
            return Err(PlanError::unsupported(
                "expression on results of a cross-shard subquery",
            ));
        };
        let inner = self.column(col_ref(col)?).col_number;
        let rc = self.new_result_column(&expr, id);
        let sq = self.subquery_node_mut(id)?;
        sq.cols.push(inner);
        sq.result_columns.push(rc.clone());
        Ok((rc, sq.result_columns.len() - 1))
    }

    pub(crate) fn subquery_supply_col(&mut self, id: NodeId, col: &ColName) -> PlanResult<(ResultColumn, usize)> {
        let c = col_ref(col)?;
        let inner = self.column(c).col_number;
        let sq = self.subquery_node_mut(id)?;
        if let Some(i) = sq.result_columns.iter().position(|rc| rc.column == c) {
            return Ok((sq.result_columns[i].clone(), i));
        }
        let rc = ResultColumn { alias: Ident::default(), column: c };
        sq.cols.push(inner);
        sq.result_columns.push(rc.clone());
        Ok((rc, sq.result_columns.len() - 1))
    }

    pub(crate) fn subquery_primitive(&self, sq: &SubqueryNode) -> PlanResult<Primitive> {
        Ok(Primitive::Subquery(Subquery {
            cols: sq.cols.clone(),
            subquery: Box::new(self.primitive(sq.input)?),
        }))
    }
}
