//! Public entry point: SELECT text or statement in, primitive tree out.

use meridian_common::config::PlannerConfig;
use meridian_common::error::{PlanError, PlanResult};
use meridian_sql_frontend::ast::{AliasedTableExpr, Select, SelectExpr, SimpleTableExpr, TableExpr};
use meridian_sql_frontend::{is_locking_func, parse_select};
use tracing::{debug, warn};

use crate::builder::build_select_plan;
use crate::engine::{Lock, Primitive, Projection};
use crate::evalengine::to_scalar_expr;
use crate::vschema::{Destination, VSchema};

/// Plans SELECT statements against one vschema snapshot.
pub struct Planner<'v> {
    vschema: &'v dyn VSchema,
    config: PlannerConfig,
}

/// Nothing but a select list over `dual`.
fn is_only_dual(sel: &Select) -> bool {
    if sel.where_clause.is_some()
        || !sel.group_by.is_empty()
        || sel.having.is_some()
        || sel.limit.is_some()
        || !sel.order_by.is_empty()
    {
        return false;
    }
    matches!(
        sel.from.as_slice(),
        [TableExpr::Aliased(AliasedTableExpr { expr: SimpleTableExpr::Table(name), .. })]
            if name.qualifier.is_none() && name.name.equal_str("dual")
    )
}

impl<'v> Planner<'v> {
    pub fn new(vschema: &'v dyn VSchema, config: PlannerConfig) -> Self {
        Planner { vschema, config }
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    pub fn plan_sql(&self, sql: &str) -> PlanResult<Primitive> {
        let sel = parse_select(sql)?;
        self.plan_select(&sel, sql)
    }

    /// Plan `sel`; `query` is its original text. The statement is copied,
    /// never modified.
    pub fn plan_select(&self, sel: &Select, query: &str) -> PlanResult<Primitive> {
        if let Some(plan) = self.plan_dual(sel)? {
            debug!(query, "dual select evaluated at the gateway");
            return Ok(plan);
        }
        let mut sel = sel.clone();
        let plan = build_select_plan(self.vschema, &self.config, &mut sel, query)?;
        if !self.config.allow_scatter && plan.has_scatter() {
            warn!(query, "scatter plan rejected by configuration");
            return Err(PlanError::unsupported("scatter queries are disabled"));
        }
        Ok(plan)
    }

    /// Constant select lists over `dual` need no shard at all. Returns
    /// None when the statement has to take the regular path.
    fn plan_dual(&self, sel: &Select) -> PlanResult<Option<Primitive>> {
        if !is_only_dual(sel) {
            return Ok(None);
        }
        let mut exprs = Vec::with_capacity(sel.select_exprs.len());
        let mut cols = Vec::with_capacity(sel.select_exprs.len());
        for se in &sel.select_exprs {
            let SelectExpr::Aliased(ae) = se else {
                return Ok(None);
            };
            // Locks live on a tablet; send the whole statement to one shard.
            if is_locking_func(&ae.expr) {
                let keyspace = self.vschema.first_sorted_keyspace()?;
                return Ok(Some(Primitive::Lock(Lock {
                    keyspace: keyspace.name.clone(),
                    target_destination: Destination::KeyspaceId(vec![0]),
                    query: sel.to_string(),
                })));
            }
            let Ok(expr) = to_scalar_expr(&ae.expr) else {
                return Ok(None);
            };
            exprs.push(expr);
            cols.push(match &ae.alias {
                Some(alias) if !alias.is_empty() => alias.as_str().to_string(),
                _ => ae.expr.to_string(),
            });
        }
        Ok(Some(Primitive::Projection(Projection {
            cols,
            exprs,
            input: Box::new(Primitive::SingleRow),
        })))
    }
}
