use std::sync::Arc;

use meridian_common::error::{PlanError, PlanResult};
use meridian_sql_frontend::ast::{AliasedExpr, ColName, ComparisonOp, Expr, Ident, TableName};

use super::{Node, NodeId, Plan};
use crate::engine::{Primitive, VindexFunc, VindexOpcode};
use crate::evalengine::{to_scalar_expr, ScalarExpr};
use crate::symtab::{col_ref, Column, ResultColumn, SymtabId, TableSym};
use crate::vschema::Vindex;

const VINDEX_COLUMNS: &[&str] = &["id", "keyspace_id", "range_start", "range_end"];

/// `select ... from <vindex> where id = <val>`: map a value through the
/// vindex without touching any shard.
#[derive(Debug)]
pub(crate) struct VindexFuncNode {
    pub order: usize,
    pub vindex: Arc<Vindex>,
    pub opcode: VindexOpcode,
    pub fields: Vec<String>,
    pub cols: Vec<usize>,
    pub value: Option<ScalarExpr>,
    pub result_columns: Vec<ResultColumn>,
}

impl VindexFuncNode {
    pub fn to_primitive(&self) -> Primitive {
        Primitive::VindexFunc(VindexFunc {
            opcode: self.opcode,
            fields: self.fields.clone(),
            cols: self.cols.clone(),
            vindex: self.vindex.name.clone(),
            value: self.value.clone(),
        })
    }
}

fn filter_shape_err(detail: &str) -> PlanError {
    PlanError::unsupported(format!(
        "where clause for vindex function must be of the form id = <val> ({detail})"
    ))
}

impl Plan<'_> {
    pub(crate) fn new_vindex_func(&mut self, alias: TableName, vindex: Arc<Vindex>) -> PlanResult<(NodeId, SymtabId)> {
        let vf = self.add_node(Node::VindexFunc(VindexFuncNode {
            order: 1,
            vindex,
            opcode: VindexOpcode::VindexNone,
            fields: Vec::new(),
            cols: Vec::new(),
            value: None,
            result_columns: Vec::new(),
        }));
        let st = self.new_symtab(None);
        let t = self.new_table(TableSym { is_authoritative: true, ..TableSym::new(alias, vf) });
        for name in VINDEX_COLUMNS {
            let c = self.new_column(Column::new(vf, Some(st)));
            self.table_add_column(t, Ident::new(*name), c);
        }
        self.add_table(st, t)?;
        Ok((vf, st))
    }

    pub(crate) fn vindex_func_push_filter(&mut self, id: NodeId, filter: Expr) -> PlanResult<()> {
        if self.vindex_func_node(id)?.opcode != VindexOpcode::VindexNone {
            return Err(filter_shape_err("multiple filters"));
        }
        let Expr::Comparison { op, left, right } = &filter else {
            return Err(filter_shape_err("not a comparison"));
        };
        if *op != ComparisonOp::Eq {
            return Err(filter_shape_err("not equality"));
        }
        let Expr::Column(col) = left.as_ref() else {
            return Err(filter_shape_err("lhs is not a column"));
        };
        if !col.name.equal_str("id") {
            return Err(filter_shape_err("lhs is not id"));
        }
        if !right.is_value() {
            return Err(filter_shape_err("rhs is not a value"));
        }
        let value = to_scalar_expr(right).map_err(|e| {
            PlanError::unsupported(format!(
                "where clause for vindex function must be of the form id = <val>: {e}"
            ))
        })?;
        let vf = self.vindex_func_node_mut(id)?;
        vf.value = Some(value);
        vf.opcode = VindexOpcode::VindexMap;
        Ok(())
    }

    pub(crate) fn vindex_func_push_select(&mut self, id: NodeId, expr: AliasedExpr) -> PlanResult<(ResultColumn, usize)> {
        if self.vindex_func_node(id)?.opcode == VindexOpcode::VindexNone {
            return Err(filter_shape_err("where clause missing"));
        }
        let Expr::Column(col) = &expr.expr else {
            return Err(PlanError::unsupported("expression on results of a vindex function"));
        };
        let inner = self.column(col_ref(col)?).col_number;
        let rc = self.new_result_column(&expr, id);
        let vf = self.vindex_func_node_mut(id)?;
        vf.fields.push(rc.alias.as_str().to_string());
        vf.cols.push(inner);
        vf.result_columns.push(rc.clone());
        Ok((rc, vf.result_columns.len() - 1))
    }

    pub(crate) fn vindex_func_supply_col(&mut self, id: NodeId, col: &ColName) -> PlanResult<(ResultColumn, usize)> {
        let c = col_ref(col)?;
        let inner = self.column(c).col_number;
        let vf = self.vindex_func_node_mut(id)?;
        if let Some(i) = vf.result_columns.iter().position(|rc| rc.column == c) {
            return Ok((vf.result_columns[i].clone(), i));
        }
        let rc = ResultColumn { alias: Ident::default(), column: c };
        vf.fields.push(col.name.as_str().to_string());
        vf.cols.push(inner);
        vf.result_columns.push(rc.clone());
        Ok((rc, vf.result_columns.len() - 1))
    }
}
