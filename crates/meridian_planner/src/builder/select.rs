//! One SELECT, clause by clause, in the order MySQL evaluates them.

use meridian_common::config::PlannerConfig;
use meridian_common::error::{PlanError, PlanResult};
use meridian_sql_frontend::ast::{
    AliasedExpr, ColName, Expr, FuncArg, FuncExpr, Literal, Select, SelectExpr, TableExpr, TableName,
};
use meridian_sql_frontend::directives::DIRECTIVE_SCATTER_ERRORS_AS_WARNINGS;
use meridian_sql_frontend::visit::select_exprs_have_aggregates;
use meridian_sql_frontend::{bind_var_names, is_locking_func, CommentDirectives};
use tracing::debug;

use super::{Clause, Node, NodeId, NodeKind, OrderedAggregateNode, Plan, PrimitiveBuilder, SqlCalcFoundRowsNode};
use crate::engine::{Primitive, RouteOpcode};
use crate::jointab::Jointab;
use crate::symtab::{ResultColumn, SymtabId};
use crate::vschema::VSchema;

/// Plan `sel` as a statement of its own and finish it into a primitive.
pub(crate) fn build_select_plan(
    vschema: &dyn VSchema,
    config: &PlannerConfig,
    sel: &mut Select,
    query: &str,
) -> PlanResult<Primitive> {
    let mut plan = Plan::new(vschema, config, Jointab::new(bind_var_names(sel)));
    let pb = plan.process_select(sel, None, query)?;
    plan.wireup(pb.bldr, pb.bldr)?;
    plan.primitive(pb.bldr)
}

/// Select expression an unqualified GROUP BY name refers to, if it is an
/// alias.
fn find_alias<'s>(col: &ColName, exprs: &'s [SelectExpr]) -> Option<&'s Expr> {
    if col.qualifier.is_some() {
        return None;
    }
    exprs.iter().find_map(|se| match se {
        SelectExpr::Aliased(ae) if ae.alias.as_ref().is_some_and(|a| a.equal_ci(&col.name)) => {
            Some(&ae.expr)
        }
        _ => None,
    })
}

fn count_star() -> Vec<SelectExpr> {
    vec![SelectExpr::Aliased(AliasedExpr::new(Expr::Func(FuncExpr::new(
        "count",
        vec![FuncArg::Star],
    ))))]
}

impl Plan<'_> {
    /// Build the plan for `sel`. `outer` is the enclosing scope when `sel`
    /// is a subquery in an expression; `query` is the statement text and
    /// is empty for anything nested.
    pub(crate) fn process_select(
        &mut self,
        sel: &mut Select,
        outer: Option<SymtabId>,
        query: &str,
    ) -> PlanResult<PrimitiveBuilder> {
        for se in &sel.select_exprs {
            if let SelectExpr::Aliased(ae) = se {
                if is_locking_func(&ae.expr) {
                    return Err(PlanError::FailedPrecondition(format!("{ae} allowed only with dual")));
                }
            }
        }

        if sel.sql_calc_found_rows {
            if outer.is_some() || query.is_empty() {
                return Err(PlanError::IncorrectPlacement("SQL_CALC_FOUND_ROWS"));
            }
            sel.sql_calc_found_rows = false;
            if sel.limit.is_some() {
                return self.build_calc_found_rows(sel, query);
            }
        }

        if sel.into.is_some() && (outer.is_some() || query.is_empty()) {
            return Err(PlanError::IncorrectPlacement("INTO"));
        }

        let mut pb = self.process_table_exprs(&mut sel.from)?;
        if self.kind(pb.bldr) == NodeKind::Route {
            self.apply_directives(pb.bldr, sel)?;
        }
        self.symtabs[pb.st.0].outer = outer;

        if let Some(filter) = sel.where_clause.take() {
            sel.where_clause = self.push_filter_expr(&mut pb, filter, Clause::Where)?;
        }
        self.check_aggregates(&mut pb, sel)?;

        let rcs = self.push_select_routes(&mut pb, &mut sel.select_exprs)?;
        self.set_result_columns(pb.st, rcs);
        self.push_grouping(&pb, sel)?;

        if let Some(having) = sel.having.take() {
            sel.having = self.push_filter_expr(&mut pb, having, Clause::Having)?;
        }
        self.push_ordering(&pb, sel)?;
        self.push_limit(&mut pb, sel)?;
        self.push_misc(pb.bldr, sel)?;
        Ok(pb)
    }

    fn apply_directives(&mut self, id: NodeId, sel: &Select) -> PlanResult<()> {
        let directives = CommentDirectives::extract(&sel.comments);
        let timeout = match directives.query_timeout_ms() {
            0 => self.config.default_query_timeout_ms,
            t => t,
        };
        let eroute = &mut self.route_node_mut(id)?.eroute;
        eroute.query_timeout_ms = timeout;
        if directives.is_set(DIRECTIVE_SCATTER_ERRORS_AS_WARNINGS) {
            eroute.scatter_errors_as_warnings = true;
        }
        debug!(route = id.0, timeout, warnings = eroute.scatter_errors_as_warnings, "directives applied");
        Ok(())
    }

    /// The limited query and a count of all its rows, planned separately.
    fn build_calc_found_rows(&mut self, sel: &mut Select, query: &str) -> PlanResult<PrimitiveBuilder> {
        let mut count_sel = sel.clone();
        count_sel.order_by.clear();
        count_sel.limit = None;
        let mut count_sel = if count_sel.group_by.is_empty() && count_sel.having.is_none() {
            Select { select_exprs: count_star(), ..count_sel }
        } else {
            // select count(*) from (select id, sum(x) from t group by id) as t
            Select {
                select_exprs: count_star(),
                from: vec![TableExpr::derived(count_sel, "t")],
                ..Default::default()
            }
        };

        let limit = build_select_plan(self.vschema, self.config, sel, query)?;
        let count = build_select_plan(self.vschema, self.config, &mut count_sel, query)?;
        debug!("SQL_CALC_FOUND_ROWS split into limit and count plans");
        let id = self.add_node(Node::SqlCalcFoundRows(SqlCalcFoundRowsNode { limit, count }));
        let st = self.new_symtab(None);
        Ok(PrimitiveBuilder { bldr: id, st })
    }

    /// Put an aggregator above a scatter route when the grouping cannot
    /// be done by each shard alone.
    fn check_aggregates(&mut self, pb: &mut PrimitiveBuilder, sel: &Select) -> PlanResult<()> {
        let is_route = self.kind(pb.bldr) == NodeKind::Route;
        if self.as_route(pb.bldr).is_some_and(|r| r.is_single_shard()) {
            return Ok(());
        }
        let has_aggregates =
            sel.distinct || select_exprs_have_aggregates(&sel.select_exprs) || !sel.group_by.is_empty();
        if !has_aggregates {
            return Ok(());
        }
        if !is_route {
            return Err(PlanError::unsupported("cross-shard query with aggregates"));
        }

        // A unique vindex in the select list makes every row distinct
        // within its shard already.
        if sel.distinct {
            for se in &sel.select_exprs {
                if let SelectExpr::Aliased(ae) = se {
                    if self.vindex_of(pb.st, &ae.expr, pb.bldr).is_some_and(|v| v.is_unique()) {
                        return Ok(());
                    }
                }
            }
        }
        if self.group_by_has_unique_vindex(pb, sel) {
            return Ok(());
        }

        let id = self.add_node(Node::OrderedAggregate(OrderedAggregateNode {
            order: 0,
            input: pb.bldr,
            keys: Vec::new(),
            aggregates: Vec::new(),
            has_distinct: false,
            extra_distinct: None,
            result_columns: Vec::new(),
        }));
        self.reorder(id, 0);
        debug!(aggregate = id.0, input = pb.bldr.0, "aggregating scatter results at the gateway");
        pb.bldr = id;
        Ok(())
    }

    fn group_by_has_unique_vindex(&mut self, pb: &PrimitiveBuilder, sel: &Select) -> bool {
        for expr in &sel.group_by {
            let matched = match expr {
                Expr::Column(col) => find_alias(col, &sel.select_exprs).unwrap_or(expr),
                Expr::Literal(Literal::Int(text)) => {
                    let Ok(num) = text.parse::<usize>() else {
                        continue;
                    };
                    match num.checked_sub(1).and_then(|i| sel.select_exprs.get(i)) {
                        Some(SelectExpr::Aliased(ae)) => &ae.expr,
                        _ => continue,
                    }
                }
                _ => continue,
            };
            if self.vindex_of(pb.st, matched, pb.bldr).is_some_and(|v| v.is_unique()) {
                return true;
            }
        }
        false
    }

    fn push_select_routes(
        &mut self,
        pb: &mut PrimitiveBuilder,
        exprs: &mut [SelectExpr],
    ) -> PlanResult<Vec<ResultColumn>> {
        let mut rcs = Vec::with_capacity(exprs.len());
        for se in exprs {
            match se {
                SelectExpr::Aliased(ae) => {
                    let (pullouts, origin) = self.find_origin(*pb, &mut ae.expr)?;
                    let (rc, _) = self.push_select(pb.bldr, ae.clone(), origin)?;
                    rcs.push(rc);
                    self.add_pullouts(pb, pullouts);
                }
                SelectExpr::Star(qualifier) => {
                    if self.expand_star(pb, qualifier.as_ref(), &mut rcs)? {
                        continue;
                    }
                    if self.kind(pb.bldr) != NodeKind::Route {
                        return Err(PlanError::unsupported("'*' expression in cross-shard query"));
                    }
                    if let Some(q) = qualifier {
                        self.find_table(pb.st, q)?;
                    }
                    rcs.push(self.push_anonymous(pb.bldr, se.clone())?);
                }
                SelectExpr::Nextval(_) => {
                    let Some(route) = self.as_route(pb.bldr) else {
                        return Err(PlanError::unsupported("SELECT NEXT query in cross-shard query"));
                    };
                    if route.eroute.opcode != RouteOpcode::Next {
                        return Err(PlanError::InvalidArgument("NEXT used on a non-sequence table".into()));
                    }
                    rcs.push(self.push_anonymous(pb.bldr, se.clone())?);
                }
            }
        }
        Ok(rcs)
    }

    /// Replace `*` by the column list when every table it covers has an
    /// authoritative one. Returns false when the star has to stay.
    fn expand_star(
        &mut self,
        pb: &PrimitiveBuilder,
        qualifier: Option<&TableName>,
        rcs: &mut Vec<ResultColumn>,
    ) -> PlanResult<bool> {
        let selected = match qualifier {
            None => {
                let tables = self.symtabs[pb.st.0].tables.clone();
                if tables.is_empty() || tables.iter().any(|t| !self.tables[t.0].is_authoritative) {
                    return Ok(false);
                }
                // With several tables, `select *` over `a join b` becomes
                // `select a.id as id, b.id as id`.
                let single = tables.len() == 1;
                tables
                    .into_iter()
                    .map(|t| (t, (!single).then(|| self.tables[t.0].alias.clone())))
                    .collect::<Vec<_>>()
            }
            Some(q) => {
                let t = self.find_table(pb.st, q)?;
                if !self.tables[t.0].is_authoritative {
                    return Ok(false);
                }
                vec![(t, Some(q.clone()))]
            }
        };

        for (t, table_qualifier) in selected {
            let origin = self.table_origin(t);
            for name in self.tables[t.0].column_names.clone() {
                let c = self.tables[t.0].columns.get(&name.lowered()).copied().ok_or_else(|| {
                    PlanError::invariant(format!("column {name} listed but not registered"))
                })?;
                let col = Expr::Column(ColName { metadata: Some(c), qualifier: table_qualifier.clone(), name: name.clone() });
                let expr = match table_qualifier {
                    None => AliasedExpr::new(col),
                    Some(_) => AliasedExpr { expr: col, alias: Some(name) },
                };
                let (rc, _) = self.push_select(pb.bldr, expr, origin)?;
                rcs.push(rc);
            }
        }
        Ok(true)
    }

    fn push_grouping(&mut self, pb: &PrimitiveBuilder, sel: &mut Select) -> PlanResult<()> {
        if sel.distinct {
            self.make_distinct(pb.bldr)?;
        }
        for expr in &mut sel.group_by {
            self.resolve_symbols(pb.st, expr)?;
        }
        self.push_group_by(pb.bldr, sel.group_by.clone())
    }

    fn push_ordering(&mut self, pb: &PrimitiveBuilder, sel: &mut Select) -> PlanResult<()> {
        self.resolve_order_symbols(pb.st, &mut sel.order_by)?;
        self.push_order_by(pb.bldr, sel.order_by.clone())?;
        self.reorder(pb.bldr, 0);
        Ok(())
    }

    fn push_limit(&mut self, pb: &mut PrimitiveBuilder, sel: &Select) -> PlanResult<()> {
        let Some(limit) = &sel.limit else {
            return Ok(());
        };
        if self.as_route(pb.bldr).is_some_and(|r| r.is_single_shard()) {
            self.route_node_mut(pb.bldr)?.select.limit = Some(limit.clone());
            return Ok(());
        }
        pb.bldr = self.new_limit(pb.bldr, limit)?;
        Ok(())
    }
}
