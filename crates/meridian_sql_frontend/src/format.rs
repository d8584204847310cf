//! SQL text generation for the owned statement model.
//!
//! Output is lowercase-keyword MySQL. Parentheses are emitted from operator
//! precedence, so trees assembled by the planner print correctly without
//! explicit `Paren` nodes.

use std::fmt;

use crate::ast::*;

const RESERVED: &[&str] = &[
    "and", "as", "asc", "by", "desc", "distinct", "from", "group", "having", "in", "index", "into",
    "is", "join", "key", "limit", "not", "null", "on", "or", "order", "select", "table", "union",
    "values", "where",
];

fn needs_backticks(s: &str) -> bool {
    if s.starts_with("@@") {
        return false;
    }
    let mut chars = s.chars();
    let first_ok = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_');
    if !first_ok || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$') {
        return true;
    }
    RESERVED.iter().any(|r| r.eq_ignore_ascii_case(s))
}

fn precedence(expr: &Expr) -> u8 {
    match expr {
        Expr::Or(..) => 1,
        Expr::And(..) => 2,
        Expr::Not(_) => 3,
        Expr::Comparison { .. } | Expr::IsNull { .. } | Expr::Between { .. } => 4,
        Expr::Binary { op, .. } => match op {
            BinaryOp::BitOr => 5,
            BinaryOp::BitAnd => 6,
            BinaryOp::ShiftLeft | BinaryOp::ShiftRight => 7,
            BinaryOp::Plus | BinaryOp::Minus => 8,
            BinaryOp::Mult | BinaryOp::Div | BinaryOp::IntDiv | BinaryOp::Mod => 9,
            BinaryOp::BitXor => 10,
        },
        Expr::Unary { .. } => 11,
        _ => 12,
    }
}

/// Accumulates SQL text. In impossible mode every SELECT is rendered as its
/// field query: `select ... from ... where 1 != 1`, keeping only GROUP BY.
#[derive(Debug, Default)]
pub struct SqlWriter {
    buf: String,
    impossible: bool,
}

impl SqlWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn impossible() -> Self {
        SqlWriter { buf: String::new(), impossible: true }
    }

    pub fn finish(self) -> String {
        self.buf
    }

    fn push(&mut self, s: &str) {
        self.buf.push_str(s);
    }

    pub fn ident(&mut self, id: &Ident) {
        if needs_backticks(id.as_str()) {
            self.buf.push('`');
            self.push(&id.as_str().replace('`', "``"));
            self.buf.push('`');
        } else {
            self.push(id.as_str());
        }
    }

    pub fn table_name(&mut self, t: &TableName) {
        if let Some(q) = &t.qualifier {
            self.ident(q);
            self.buf.push('.');
        }
        self.ident(&t.name);
    }

    pub fn col_name(&mut self, c: &ColName) {
        if let Some(q) = &c.qualifier {
            self.table_name(q);
            self.buf.push('.');
        }
        self.ident(&c.name);
    }

    fn literal(&mut self, lit: &Literal) {
        match lit {
            Literal::Int(s) | Literal::Float(s) => self.push(s),
            Literal::Str(s) => {
                self.buf.push('\'');
                for c in s.chars() {
                    match c {
                        '\'' => self.push("\\'"),
                        '\\' => self.push("\\\\"),
                        _ => self.buf.push(c),
                    }
                }
                self.buf.push('\'');
            }
            Literal::Hex(h) => {
                self.push("X'");
                self.push(h);
                self.buf.push('\'');
            }
            Literal::Bool(true) => self.push("true"),
            Literal::Bool(false) => self.push("false"),
            Literal::Null => self.push("null"),
        }
    }

    fn child(&mut self, child: &Expr, parent: u8, strict: bool) {
        let p = precedence(child);
        if p < parent || (strict && p == parent) {
            self.buf.push('(');
            self.expr(child);
            self.buf.push(')');
        } else {
            self.expr(child);
        }
    }

    pub fn expr(&mut self, expr: &Expr) {
        let prec = precedence(expr);
        match expr {
            Expr::Column(c) => self.col_name(c),
            Expr::Literal(l) => self.literal(l),
            Expr::Argument(name) => {
                self.buf.push(':');
                self.push(name);
            }
            Expr::ListArg(name) => {
                self.push("::");
                self.push(name);
            }
            Expr::Comparison { op, left, right } => {
                self.child(left, prec, true);
                self.buf.push(' ');
                self.push(op.as_str());
                self.buf.push(' ');
                self.child(right, prec, true);
            }
            Expr::And(l, r) => {
                self.child(l, prec, false);
                self.push(" and ");
                self.child(r, prec, false);
            }
            Expr::Or(l, r) => {
                self.child(l, prec, false);
                self.push(" or ");
                self.child(r, prec, false);
            }
            Expr::Not(e) => {
                self.push("not ");
                self.child(e, prec, false);
            }
            Expr::Binary { op, left, right } => {
                self.child(left, prec, false);
                self.buf.push(' ');
                self.push(op.as_str());
                self.buf.push(' ');
                self.child(right, prec, true);
            }
            Expr::Unary { op, expr: inner } => {
                self.push(match op {
                    UnaryOp::Minus => "-",
                    UnaryOp::Plus => "+",
                    UnaryOp::BitNot => "~",
                });
                self.child(inner, prec, false);
            }
            Expr::IsNull { expr: inner, negated } => {
                self.child(inner, prec, true);
                self.push(if *negated { " is not null" } else { " is null" });
            }
            Expr::Between { expr: inner, low, high, negated } => {
                self.child(inner, prec, true);
                self.push(if *negated { " not between " } else { " between " });
                self.child(low, prec, true);
                self.push(" and ");
                self.child(high, prec, true);
            }
            Expr::Tuple(items) => {
                self.buf.push('(');
                self.comma_list(items, |w, e| w.expr(e));
                self.buf.push(')');
            }
            Expr::Func(f) => self.func(f),
            Expr::Subquery(sel) => {
                self.buf.push('(');
                self.select(sel);
                self.buf.push(')');
            }
            Expr::Exists(sel) => {
                self.push("exists (");
                self.select(sel);
                self.buf.push(')');
            }
            Expr::Paren(inner) => {
                self.buf.push('(');
                self.expr(inner);
                self.buf.push(')');
            }
        }
    }

    fn func(&mut self, f: &FuncExpr) {
        if let Some(q) = &f.qualifier {
            self.ident(q);
            self.buf.push('.');
        }
        self.push(f.name.as_str());
        self.buf.push('(');
        if f.distinct {
            self.push("distinct ");
        }
        self.comma_list(&f.args, |w, arg| match arg {
            FuncArg::Star => w.buf.push('*'),
            FuncArg::Expr(e) => w.expr(e),
        });
        self.buf.push(')');
    }

    fn comma_list<T>(&mut self, items: &[T], mut f: impl FnMut(&mut Self, &T)) {
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                self.push(", ");
            }
            f(self, item);
        }
    }

    pub fn select_expr(&mut self, se: &SelectExpr) {
        match se {
            SelectExpr::Star(None) => self.buf.push('*'),
            SelectExpr::Star(Some(t)) => {
                self.table_name(t);
                self.push(".*");
            }
            SelectExpr::Aliased(ae) => {
                self.expr(&ae.expr);
                if let Some(alias) = &ae.alias {
                    self.push(" as ");
                    self.ident(alias);
                }
            }
            SelectExpr::Nextval(e) => {
                self.push("next ");
                self.expr(e);
                self.push(" values");
            }
        }
    }

    pub fn table_expr(&mut self, te: &TableExpr) {
        match te {
            TableExpr::Aliased(at) => {
                match &at.expr {
                    SimpleTableExpr::Table(t) => self.table_name(t),
                    SimpleTableExpr::Derived(sel) => {
                        self.buf.push('(');
                        self.select(sel);
                        self.buf.push(')');
                    }
                }
                if let Some(alias) = &at.alias {
                    self.push(" as ");
                    self.ident(alias);
                }
            }
            TableExpr::Join(j) => {
                self.table_expr(&j.left);
                self.buf.push(' ');
                self.push(j.kind.as_str());
                self.buf.push(' ');
                self.table_expr(&j.right);
                if let Some(on) = &j.condition.on {
                    self.push(" on ");
                    self.expr(on);
                }
                if !j.condition.using.is_empty() {
                    self.push(" using (");
                    self.comma_list(&j.condition.using, |w, id| w.ident(id));
                    self.buf.push(')');
                }
            }
            TableExpr::Paren(items) => {
                self.buf.push('(');
                self.comma_list(items, |w, t| w.table_expr(t));
                self.buf.push(')');
            }
        }
    }

    pub fn select(&mut self, sel: &Select) {
        self.push("select ");
        if !self.impossible {
            for c in &sel.comments {
                self.push(c);
                self.buf.push(' ');
            }
            if sel.distinct {
                self.push("distinct ");
            }
            if sel.sql_calc_found_rows {
                self.push("sql_calc_found_rows ");
            }
        }
        self.comma_list(&sel.select_exprs, |w, se| w.select_expr(se));
        if !sel.from.is_empty() {
            self.push(" from ");
            self.comma_list(&sel.from, |w, te| w.table_expr(te));
        }
        if self.impossible {
            self.push(" where 1 != 1");
            self.group_by(&sel.group_by);
            return;
        }
        if let Some(w) = &sel.where_clause {
            self.push(" where ");
            self.expr(w);
        }
        self.group_by(&sel.group_by);
        if let Some(h) = &sel.having {
            self.push(" having ");
            self.expr(h);
        }
        if !sel.order_by.is_empty() {
            self.push(" order by ");
            self.comma_list(&sel.order_by, |w, o| w.order(o));
        }
        if let Some(limit) = &sel.limit {
            self.push(" limit ");
            if let Some(offset) = &limit.offset {
                self.expr(offset);
                self.push(", ");
            }
            self.expr(&limit.rowcount);
        }
        match sel.lock {
            Lock::None => {}
            Lock::ForUpdate => self.push(" for update"),
            Lock::ShareMode => self.push(" lock in share mode"),
        }
        if let Some(into) = &sel.into {
            self.push(" into ");
            self.push(into);
        }
    }

    fn group_by(&mut self, exprs: &[Expr]) {
        if !exprs.is_empty() {
            self.push(" group by ");
            self.comma_list(exprs, |w, e| w.expr(e));
        }
    }

    pub fn order(&mut self, o: &Order) {
        self.expr(&o.expr);
        self.push(match o.direction {
            OrderDirection::Asc => " asc",
            OrderDirection::Desc => " desc",
        });
    }
}

/// Field query for a select: same shape, no rows.
pub fn impossible_query(sel: &Select) -> String {
    let mut w = SqlWriter::impossible();
    w.select(sel);
    w.finish()
}

macro_rules! display_via_writer {
    ($ty:ty, $method:ident) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let mut w = SqlWriter::new();
                w.$method(self);
                f.write_str(&w.finish())
            }
        }
    };
}

display_via_writer!(Select, select);
display_via_writer!(Expr, expr);
display_via_writer!(SelectExpr, select_expr);
display_via_writer!(TableExpr, table_expr);
display_via_writer!(TableName, table_name);
display_via_writer!(ColName, col_name);
display_via_writer!(Order, order);
display_via_writer!(Ident, ident);

impl fmt::Display for AliasedExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.expr)?;
        if let Some(alias) = &self.alias {
            write!(f, " as {alias}")?;
        }
        Ok(())
    }
}
