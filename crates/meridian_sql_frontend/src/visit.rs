//! Tree walkers and expression predicates shared by the planner.

use std::collections::HashSet;

use crate::ast::*;

/// Pre-order walk over an expression. Returning false from `f` skips the
/// node's children. Subqueries are entered through [`walk_select`].
pub fn walk_expr<'a>(expr: &'a Expr, f: &mut dyn FnMut(&'a Expr) -> bool) {
    if !f(expr) {
        return;
    }
    match expr {
        Expr::Column(_) | Expr::Literal(_) | Expr::Argument(_) | Expr::ListArg(_) => {}
        Expr::Comparison { left, right, .. } | Expr::Binary { left, right, .. } => {
            walk_expr(left, f);
            walk_expr(right, f);
        }
        Expr::And(l, r) | Expr::Or(l, r) => {
            walk_expr(l, f);
            walk_expr(r, f);
        }
        Expr::Not(e) | Expr::Paren(e) => walk_expr(e, f),
        Expr::Unary { expr, .. } | Expr::IsNull { expr, .. } => walk_expr(expr, f),
        Expr::Between { expr, low, high, .. } => {
            walk_expr(expr, f);
            walk_expr(low, f);
            walk_expr(high, f);
        }
        Expr::Tuple(items) => {
            for item in items {
                walk_expr(item, f);
            }
        }
        Expr::Func(func) => {
            for arg in &func.args {
                if let FuncArg::Expr(e) = arg {
                    walk_expr(e, f);
                }
            }
        }
        Expr::Subquery(sel) | Expr::Exists(sel) => walk_select(sel, f),
    }
}

/// Walk every expression of a select, including join conditions and
/// derived tables.
pub fn walk_select<'a>(sel: &'a Select, f: &mut dyn FnMut(&'a Expr) -> bool) {
    for se in &sel.select_exprs {
        match se {
            SelectExpr::Aliased(ae) => walk_expr(&ae.expr, f),
            SelectExpr::Nextval(e) => walk_expr(e, f),
            SelectExpr::Star(_) => {}
        }
    }
    for te in &sel.from {
        walk_table_expr(te, f);
    }
    if let Some(w) = &sel.where_clause {
        walk_expr(w, f);
    }
    for g in &sel.group_by {
        walk_expr(g, f);
    }
    if let Some(h) = &sel.having {
        walk_expr(h, f);
    }
    for o in &sel.order_by {
        walk_expr(&o.expr, f);
    }
    if let Some(limit) = &sel.limit {
        if let Some(offset) = &limit.offset {
            walk_expr(offset, f);
        }
        walk_expr(&limit.rowcount, f);
    }
}

fn walk_table_expr<'a>(te: &'a TableExpr, f: &mut dyn FnMut(&'a Expr) -> bool) {
    match te {
        TableExpr::Aliased(at) => {
            if let SimpleTableExpr::Derived(sel) = &at.expr {
                walk_select(sel, f);
            }
        }
        TableExpr::Join(j) => {
            walk_table_expr(&j.left, f);
            walk_table_expr(&j.right, f);
            if let Some(on) = &j.condition.on {
                walk_expr(on, f);
            }
        }
        TableExpr::Paren(items) => {
            for item in items {
                walk_table_expr(item, f);
            }
        }
    }
}

/// Mutable visitor. `visit_expr` runs pre-order; returning false skips the
/// children of that node.
pub trait VisitorMut {
    fn visit_expr(&mut self, expr: &mut Expr) -> bool {
        let _ = expr;
        true
    }

    fn visit_table_name(&mut self, name: &mut TableName) {
        let _ = name;
    }
}

pub fn walk_expr_mut<V: VisitorMut + ?Sized>(v: &mut V, expr: &mut Expr) {
    if !v.visit_expr(expr) {
        return;
    }
    match expr {
        Expr::Column(_) | Expr::Literal(_) | Expr::Argument(_) | Expr::ListArg(_) => {}
        Expr::Comparison { left, right, .. } | Expr::Binary { left, right, .. } => {
            walk_expr_mut(v, left);
            walk_expr_mut(v, right);
        }
        Expr::And(l, r) | Expr::Or(l, r) => {
            walk_expr_mut(v, l);
            walk_expr_mut(v, r);
        }
        Expr::Not(e) | Expr::Paren(e) => walk_expr_mut(v, e),
        Expr::Unary { expr, .. } | Expr::IsNull { expr, .. } => walk_expr_mut(v, expr),
        Expr::Between { expr, low, high, .. } => {
            walk_expr_mut(v, expr);
            walk_expr_mut(v, low);
            walk_expr_mut(v, high);
        }
        Expr::Tuple(items) => {
            for item in items {
                walk_expr_mut(v, item);
            }
        }
        Expr::Func(func) => {
            for arg in &mut func.args {
                if let FuncArg::Expr(e) = arg {
                    walk_expr_mut(v, e);
                }
            }
        }
        Expr::Subquery(sel) | Expr::Exists(sel) => walk_select_mut(v, sel),
    }
}

pub fn walk_select_mut<V: VisitorMut + ?Sized>(v: &mut V, sel: &mut Select) {
    for se in &mut sel.select_exprs {
        match se {
            SelectExpr::Aliased(ae) => walk_expr_mut(v, &mut ae.expr),
            SelectExpr::Nextval(e) => walk_expr_mut(v, e),
            SelectExpr::Star(Some(t)) => v.visit_table_name(t),
            SelectExpr::Star(None) => {}
        }
    }
    for te in &mut sel.from {
        walk_table_expr_mut(v, te);
    }
    if let Some(w) = &mut sel.where_clause {
        walk_expr_mut(v, w);
    }
    for g in &mut sel.group_by {
        walk_expr_mut(v, g);
    }
    if let Some(h) = &mut sel.having {
        walk_expr_mut(v, h);
    }
    for o in &mut sel.order_by {
        walk_expr_mut(v, &mut o.expr);
    }
    if let Some(limit) = &mut sel.limit {
        if let Some(offset) = &mut limit.offset {
            walk_expr_mut(v, offset);
        }
        walk_expr_mut(v, &mut limit.rowcount);
    }
}

fn walk_table_expr_mut<V: VisitorMut + ?Sized>(v: &mut V, te: &mut TableExpr) {
    match te {
        TableExpr::Aliased(at) => match &mut at.expr {
            SimpleTableExpr::Table(t) => v.visit_table_name(t),
            SimpleTableExpr::Derived(sel) => walk_select_mut(v, sel),
        },
        TableExpr::Join(j) => {
            walk_table_expr_mut(v, &mut j.left);
            walk_table_expr_mut(v, &mut j.right);
            if let Some(on) = &mut j.condition.on {
                walk_expr_mut(v, on);
            }
        }
        TableExpr::Paren(items) => {
            for item in items {
                walk_table_expr_mut(v, item);
            }
        }
    }
}

/// Split on top-level AND, looking through parentheses that wrap an AND.
pub fn split_and_expression(mut filters: Vec<Expr>, node: Expr) -> Vec<Expr> {
    match node {
        Expr::And(l, r) => {
            filters = split_and_expression(filters, *l);
            split_and_expression(filters, *r)
        }
        Expr::Paren(inner) if matches!(*inner, Expr::And(..)) => {
            split_and_expression(filters, *inner)
        }
        other => {
            filters.push(other);
            filters
        }
    }
}

pub fn has_subquery(expr: &Expr) -> bool {
    let mut found = false;
    walk_expr(expr, &mut |e| {
        if matches!(e, Expr::Subquery(_) | Expr::Exists(_)) {
            found = true;
        }
        !found
    });
    found
}

const AGGREGATES: &[&str] = &[
    "avg", "bit_and", "bit_or", "bit_xor", "count", "group_concat", "max", "min", "std",
    "stddev", "stddev_pop", "stddev_samp", "sum", "var_pop", "var_samp", "variance",
];

pub fn is_aggregate_func(name: &str) -> bool {
    AGGREGATES.iter().any(|a| a.eq_ignore_ascii_case(name))
}

/// True if the expression contains an aggregate call outside of subqueries.
pub fn node_has_aggregates(expr: &Expr) -> bool {
    let mut found = false;
    walk_expr(expr, &mut |e| match e {
        Expr::Func(f) if is_aggregate_func(f.name.as_str()) => {
            found = true;
            false
        }
        Expr::Subquery(_) | Expr::Exists(_) => false,
        _ => !found,
    });
    found
}

pub fn select_exprs_have_aggregates(exprs: &[SelectExpr]) -> bool {
    exprs.iter().any(|se| match se {
        SelectExpr::Aliased(ae) => node_has_aggregates(&ae.expr),
        _ => false,
    })
}

const LOCKING_FUNCS: &[&str] = &[
    "get_lock",
    "is_free_lock",
    "is_used_lock",
    "release_all_locks",
    "release_lock",
];

/// Advisory-lock functions that must run on a single fixed connection.
pub fn is_locking_func(expr: &Expr) -> bool {
    match expr {
        Expr::Func(f) => LOCKING_FUNCS.iter().any(|l| f.name.equal_str(l)),
        _ => false,
    }
}

/// Names of every bind variable the statement already uses.
pub fn bind_var_names(sel: &Select) -> HashSet<String> {
    let mut names = HashSet::new();
    walk_select(sel, &mut |e| {
        match e {
            Expr::Argument(name) | Expr::ListArg(name) => {
                names.insert(name.clone());
            }
            _ => {}
        }
        true
    });
    names
}
