//! Expression resolution: which operator an expression belongs to, and
//! what happens to the subqueries inside it.

use meridian_common::error::{PlanError, PlanResult};
use meridian_sql_frontend::ast::{ComparisonOp, Expr, FuncArg, Literal, Select};
use meridian_sql_frontend::visit::{has_subquery, split_and_expression};
use tracing::debug;

use super::{Clause, NodeId, PendingPullout, Plan, PrimitiveBuilder};
use crate::engine::{PulloutOpcode, RouteOpcode};
use crate::evalengine::{to_scalar_expr, ConvertError};

/// Bind variable a catalog route receives the target schema name in.
pub(crate) const SCHEMA_NAME_VAR: &str = "__vtschemaname";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SubqueryKind {
    Value,
    In,
    NotIn,
    Exists,
}

impl SubqueryKind {
    fn opcode(self) -> PulloutOpcode {
        match self {
            SubqueryKind::Value => PulloutOpcode::PulloutValue,
            SubqueryKind::In => PulloutOpcode::PulloutIn,
            SubqueryKind::NotIn => PulloutOpcode::PulloutNotIn,
            SubqueryKind::Exists => PulloutOpcode::PulloutExists,
        }
    }
}

struct SubqueryInfo {
    kind: SubqueryKind,
    root: NodeId,
    /// Highest local operator the subquery refers back to.
    correlated_with: Option<NodeId>,
}

struct OriginScan {
    highest: NodeId,
    subqueries: Vec<SubqueryInfo>,
}

type Replacement = Option<(SubqueryKind, String, String)>;

/// Direct sub-expressions. Subquery bodies are not included.
fn children_mut(expr: &mut Expr) -> Vec<&mut Expr> {
    match expr {
        Expr::Column(_)
        | Expr::Literal(_)
        | Expr::Argument(_)
        | Expr::ListArg(_)
        | Expr::Subquery(_)
        | Expr::Exists(_) => Vec::new(),
        Expr::Comparison { left, right, .. } | Expr::Binary { left, right, .. } => {
            vec![&mut **left, &mut **right]
        }
        Expr::And(l, r) | Expr::Or(l, r) => vec![&mut **l, &mut **r],
        Expr::Not(e) | Expr::Paren(e) => vec![&mut **e],
        Expr::Unary { expr, .. } | Expr::IsNull { expr, .. } => vec![&mut **expr],
        Expr::Between { expr, low, high, .. } => vec![&mut **expr, &mut **low, &mut **high],
        Expr::Tuple(items) => items.iter_mut().collect(),
        Expr::Func(func) => func
            .args
            .iter_mut()
            .filter_map(|arg| match arg {
                FuncArg::Expr(e) => Some(e),
                FuncArg::Star => None,
            })
            .collect(),
    }
}

fn is_sq_comparison(op: ComparisonOp, right: &Expr) -> bool {
    matches!(op, ComparisonOp::In | ComparisonOp::NotIn) && matches!(right, Expr::Subquery(_))
}

/// Second pass over the same shape as the scan: swap every pulled-out
/// subquery construct for its bind variable form.
fn replace_subqueries(expr: &mut Expr, reps: &[Replacement], next: &mut usize) {
    let take = |next: &mut usize| {
        let rep = reps.get(*next).cloned().flatten();
        *next += 1;
        rep
    };
    match expr {
        Expr::Comparison { op, left, right } if is_sq_comparison(*op, &**right) => {
            replace_subqueries(left, reps, next);
            let Some((kind, sq, has_values)) = take(next) else {
                return;
            };
            let left = std::mem::replace(&mut **left, Expr::Literal(Literal::Null));
            let replacement = if kind == SubqueryKind::In {
                // a in (subquery) -> (:has_values = 1 and a in ::sq)
                Expr::and(
                    Expr::cmp(ComparisonOp::Eq, Expr::arg(has_values), Expr::int(1)),
                    Expr::cmp(ComparisonOp::In, left, Expr::ListArg(sq)),
                )
            } else {
                // a not in (subquery) -> (:has_values = 0 or a not in ::sq)
                Expr::or(
                    Expr::cmp(ComparisonOp::Eq, Expr::arg(has_values), Expr::int(0)),
                    Expr::cmp(ComparisonOp::NotIn, left, Expr::ListArg(sq)),
                )
            };
            *expr = Expr::Paren(Box::new(replacement));
        }
        Expr::Exists(_) => {
            if let Some((_, _, has_values)) = take(next) {
                *expr = Expr::Argument(has_values);
            }
        }
        Expr::Subquery(_) => {
            if let Some((_, sq, _)) = take(next) {
                *expr = Expr::Argument(sq);
            }
        }
        other => {
            for child in children_mut(other) {
                replace_subqueries(child, reps, next);
            }
        }
    }
}

fn is_table_schema(expr: &Expr) -> bool {
    matches!(expr, Expr::Column(col) if col.name.equal_str("table_schema"))
}

/// `database()` and `schema()` already name the connection's schema.
fn names_current_schema(expr: &Expr) -> bool {
    matches!(expr.func_name().as_deref(), Some("database") | Some("schema"))
}

impl Plan<'_> {
    /// Resolve every column of `expr` and compile its subqueries.
    ///
    /// Returns the highest-order operator the expression depends on and the
    /// subqueries that have to run ahead of it. Subqueries that could be
    /// merged into that operator stay in the expression; the rest are
    /// replaced by bind variables.
    pub(crate) fn find_origin(
        &mut self,
        pb: PrimitiveBuilder,
        expr: &mut Expr,
    ) -> PlanResult<(Vec<PendingPullout>, NodeId)> {
        let mut scan = OriginScan { highest: self.first(pb.bldr), subqueries: Vec::new() };
        self.scan_origin(pb, expr, &mut scan)?;

        let highest = scan.highest;
        let highest_is_route = self.as_route(highest).is_some();
        let mut pullouts = Vec::new();
        let mut reps: Vec<Replacement> = Vec::with_capacity(scan.subqueries.len());
        for sqi in scan.subqueries {
            if highest_is_route
                && self.as_route(sqi.root).is_some()
                && self.merge_subquery(pb.st, highest, sqi.root)?
            {
                reps.push(None);
                continue;
            }
            if sqi.correlated_with.is_some() {
                return Err(PlanError::unsupported("cross-shard correlated subquery"));
            }
            let (sq_name, has_values) = self.jt.generate_subquery_vars();
            debug!(var = %sq_name, opcode = ?sqi.kind.opcode(), "subquery pulled out");
            pullouts.push(PendingPullout {
                opcode: sqi.kind.opcode(),
                sq_name: sq_name.clone(),
                has_values: has_values.clone(),
                subquery: sqi.root,
            });
            reps.push(Some((sqi.kind, sq_name, has_values)));
        }
        if !pullouts.is_empty() {
            let mut next = 0;
            replace_subqueries(expr, &reps, &mut next);
        }
        Ok((pullouts, highest))
    }

    fn scan_origin(&mut self, pb: PrimitiveBuilder, expr: &mut Expr, scan: &mut OriginScan) -> PlanResult<()> {
        match expr {
            Expr::Column(col) => {
                let (origin, is_local) = self.find(pb.st, col)?;
                if is_local && self.order(origin) > self.order(scan.highest) {
                    scan.highest = origin;
                }
                Ok(())
            }
            Expr::Comparison { op, left, right } if is_sq_comparison(*op, &**right) => {
                let kind = if *op == ComparisonOp::In { SubqueryKind::In } else { SubqueryKind::NotIn };
                self.scan_origin(pb, left, scan)?;
                match right.as_mut() {
                    Expr::Subquery(sel) => self.compile_subquery(pb, sel, kind, scan),
                    _ => Ok(()),
                }
            }
            Expr::Exists(sel) => self.compile_subquery(pb, sel, SubqueryKind::Exists, scan),
            Expr::Subquery(sel) => self.compile_subquery(pb, sel, SubqueryKind::Value, scan),
            other => {
                for child in children_mut(other) {
                    self.scan_origin(pb, child, scan)?;
                }
                Ok(())
            }
        }
    }

    fn compile_subquery(
        &mut self,
        pb: PrimitiveBuilder,
        sel: &mut Select,
        kind: SubqueryKind,
        scan: &mut OriginScan,
    ) -> PlanResult<()> {
        let spb = self.process_select(sel, Some(pb.st), "")?;
        let mut correlated_with: Option<NodeId> = None;
        for mut ext in self.symtabs[spb.st.0].externs.clone() {
            let (origin, is_local) = self.find(pb.st, &mut ext)?;
            // References to scopes further out are this scope's externs too.
            if !is_local {
                continue;
            }
            if self.order(origin) > self.order(scan.highest) {
                scan.highest = origin;
            }
            if correlated_with.map_or(true, |c| self.order(c) < self.order(origin)) {
                correlated_with = Some(origin);
            }
        }
        scan.subqueries.push(SubqueryInfo { kind, root: spb.bldr, correlated_with });
        Ok(())
    }

    /// Push a WHERE or HAVING expression, one conjunct at a time. Returns
    /// the resolved conjuncts joined back together.
    pub(crate) fn push_filter_expr(
        &mut self,
        pb: &mut PrimitiveBuilder,
        filter: Expr,
        clause: Clause,
    ) -> PlanResult<Option<Expr>> {
        let mut filters = split_and_expression(Vec::new(), filter);
        // Plain predicates go first; they can narrow the route a later
        // subquery then merges into.
        filters.sort_by_key(has_subquery);

        let mut resolved = Vec::with_capacity(filters.len());
        for mut filter in filters {
            let (pullouts, origin) = self.find_origin(*pb, &mut filter)?;
            let is_dba = self
                .as_route(origin)
                .is_some_and(|r| r.eroute.opcode == RouteOpcode::Dba);
            if is_dba {
                self.rewrite_table_schema(origin, &mut filter)?;
            }
            for sub in split_and_expression(Vec::new(), filter.clone()) {
                self.push_filter(pb.bldr, sub, clause, origin)?;
            }
            self.add_pullouts(pb, pullouts);
            resolved.push(filter);
        }
        Ok(resolved.into_iter().reduce(Expr::and))
    }

    /// `table_schema = <expr>` on a catalog route: route by the schema
    /// value, and let the shard see it as a bind variable.
    fn rewrite_table_schema(&mut self, route: NodeId, filter: &mut Expr) -> PlanResult<()> {
        let Expr::Comparison { op: ComparisonOp::Eq, left, right } = filter else {
            return Ok(());
        };
        let other = if is_table_schema(left) {
            right
        } else if is_table_schema(right) {
            left
        } else {
            return Ok(());
        };
        if names_current_schema(other) {
            return Ok(());
        }
        let value = match to_scalar_expr(other) {
            Ok(value) => value,
            Err(ConvertError::NotSupported(_)) => return Ok(()),
            Err(e) => return Err(PlanError::InvalidArgument(e.to_string())),
        };
        let eroute = &mut self.route_node_mut(route)?.eroute;
        if eroute.sys_table_keyspace_expr.is_some() {
            return Err(PlanError::InvalidArgument(
                "two predicates for table_schema not supported".into(),
            ));
        }
        debug!(route = route.0, schema = ?value, "catalog route keyed by table_schema");
        eroute.sys_table_keyspace_expr = Some(value);
        **other = Expr::Argument(SCHEMA_NAME_VAR.to_string());
        Ok(())
    }
}
