use meridian_common::error::{PlanError, PlanResult};
use sqlparser::ast::Statement;
use sqlparser::dialect::MySqlDialect;
use sqlparser::parser::Parser;

use crate::ast::{Expr, Literal, Select, SelectExpr};
use crate::lower::Lowerer;

/// Parse a SQL string into one or more AST statements using sqlparser-rs.
pub fn parse_sql(sql: &str) -> Result<Vec<Statement>, PlanError> {
    let dialect = MySqlDialect {};
    Parser::parse_sql(&dialect, sql).map_err(|e| PlanError::Parse(e.to_string()))
}

/// Parse a single SELECT into the owned statement model.
///
/// Gateway extensions are handled before sqlparser sees the text: block
/// comments are lifted onto [`Select::comments`], `SQL_CALC_FOUND_ROWS` is
/// recorded as a flag, and `SELECT NEXT <n> VALUES FROM seq` becomes a
/// [`SelectExpr::Nextval`].
pub fn parse_select(sql: &str) -> PlanResult<Select> {
    let pre = prescan(sql);
    if pre.misplaced_calc_found_rows {
        return Err(PlanError::IncorrectPlacement("SQL_CALC_FOUND_ROWS"));
    }
    let (text, next_count) = match split_next_values(&pre.text) {
        Some((count, rest)) => (format!("select 1 {rest}"), Some(count.to_string())),
        None => (pre.text.clone(), None),
    };

    let mut statements = parse_sql(&text)?;
    if statements.len() != 1 {
        return Err(PlanError::Parse(format!(
            "expected exactly one statement, got {}",
            statements.len()
        )));
    }
    let query = match statements.remove(0) {
        Statement::Query(q) => q,
        other => {
            return Err(PlanError::unsupported(format!(
                "only SELECT statements can be planned here: {other}"
            )))
        }
    };

    let mut sel = Lowerer::default().lower_query(&query)?;
    sel.comments = pre.comments;
    sel.sql_calc_found_rows = pre.calc_found_rows;
    if let Some(count) = next_count {
        sel.select_exprs = vec![SelectExpr::Nextval(next_count_expr(&count)?)];
    }
    tracing::trace!(sql, "parsed select");
    Ok(sel)
}

fn next_count_expr(raw: &str) -> PlanResult<Expr> {
    if let Some(name) = raw.strip_prefix(':') {
        return Ok(Expr::Argument(name.to_string()));
    }
    if !raw.is_empty() && raw.chars().all(|c| c.is_ascii_digit()) {
        return Ok(Expr::Literal(Literal::Int(raw.to_string())));
    }
    Err(PlanError::Parse(format!("invalid NEXT count: {raw}")))
}

#[derive(Debug, Default, PartialEq)]
struct Prescan {
    text: String,
    comments: Vec<String>,
    calc_found_rows: bool,
    /// The modifier appeared somewhere other than right after the
    /// outermost SELECT.
    misplaced_calc_found_rows: bool,
}

/// Words that may sit between SELECT and its select list.
const SELECT_MODIFIERS: &[&str] = &[
    "all",
    "distinct",
    "distinctrow",
    "high_priority",
    "straight_join",
    "sql_small_result",
    "sql_big_result",
    "sql_buffer_result",
    "sql_cache",
    "sql_no_cache",
];

/// Lift block comments and the SQL_CALC_FOUND_ROWS modifier out of the text,
/// leaving quoted strings and identifiers untouched.
fn prescan(sql: &str) -> Prescan {
    let mut out = Prescan::default();
    let chars: Vec<char> = sql.chars().collect();
    let mut i = 0;
    let mut depth = 0usize;
    // Still inside `select [modifiers]` of the outermost statement.
    let mut lead = true;
    while i < chars.len() {
        let c = chars[i];
        match c {
            '\'' | '"' | '`' => {
                let start = i;
                i += 1;
                while i < chars.len() {
                    if chars[i] == '\\' && c != '`' {
                        i += 2;
                        continue;
                    }
                    if chars[i] == c {
                        if i + 1 < chars.len() && chars[i + 1] == c {
                            i += 2;
                            continue;
                        }
                        break;
                    }
                    i += 1;
                }
                let end = (i + 1).min(chars.len());
                out.text.extend(&chars[start..end]);
                i = end;
            }
            '/' if chars.get(i + 1) == Some(&'*') => {
                let start = i;
                let mut j = i + 2;
                while j + 1 < chars.len() && !(chars[j] == '*' && chars[j + 1] == '/') {
                    j += 1;
                }
                let end = (j + 2).min(chars.len());
                out.comments.push(chars[start..end].iter().collect());
                out.text.push(' ');
                i = end;
            }
            c if c.is_ascii_alphanumeric() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                if word.eq_ignore_ascii_case("sql_calc_found_rows") {
                    if depth == 0 && lead {
                        out.calc_found_rows = true;
                    } else {
                        out.misplaced_calc_found_rows = true;
                    }
                    continue;
                }
                if depth == 0 && lead {
                    let first = out.text.trim().is_empty();
                    lead = if first {
                        word.eq_ignore_ascii_case("select")
                    } else {
                        SELECT_MODIFIERS.iter().any(|m| word.eq_ignore_ascii_case(m))
                    };
                }
                out.text.push_str(&word);
            }
            '(' | ')' => {
                if c == '(' {
                    depth += 1;
                } else {
                    depth = depth.saturating_sub(1);
                }
                lead = false;
                out.text.push(c);
                i += 1;
            }
            _ => {
                out.text.push(c);
                i += 1;
            }
        }
    }
    out
}

fn take_word(s: &str) -> Option<(&str, &str)> {
    let s = s.trim_start();
    if s.is_empty() {
        return None;
    }
    let end = s.find(char::is_whitespace).unwrap_or(s.len());
    Some((&s[..end], &s[end..]))
}

/// `select next <n> value[s] <rest>` -> (`<n>`, `<rest>`).
fn split_next_values(sql: &str) -> Option<(&str, &str)> {
    let (select, rest) = take_word(sql)?;
    if !select.eq_ignore_ascii_case("select") {
        return None;
    }
    let (next, rest) = take_word(rest)?;
    if !next.eq_ignore_ascii_case("next") {
        return None;
    }
    let (count, rest) = take_word(rest)?;
    let (values, rest) = take_word(rest)?;
    if !(values.eq_ignore_ascii_case("value") || values.eq_ignore_ascii_case("values")) {
        return None;
    }
    Some((count, rest))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prescan_lifts_comments_and_flag() {
        let pre = prescan("select /* a */ SQL_CALC_FOUND_ROWS id from t /*vt+ X=1 */");
        assert!(pre.calc_found_rows);
        assert_eq!(pre.comments, vec!["/* a */".to_string(), "/*vt+ X=1 */".to_string()]);
        assert!(!pre.text.to_lowercase().contains("sql_calc"));
    }

    #[test]
    fn test_prescan_flag_after_select_modifiers() {
        let pre = prescan("select distinct sql_calc_found_rows id from t");
        assert!(pre.calc_found_rows);
        assert!(!pre.misplaced_calc_found_rows);
    }

    #[test]
    fn test_prescan_nested_flag_is_misplaced() {
        let pre = prescan("select id from t where id in (select sql_calc_found_rows id from u)");
        assert!(!pre.calc_found_rows);
        assert!(pre.misplaced_calc_found_rows);

        let pre = prescan("select id, sql_calc_found_rows from t");
        assert!(pre.misplaced_calc_found_rows);
    }

    #[test]
    fn test_prescan_keeps_quoted_text() {
        let pre = prescan("select 'it''s /* no */ sql_calc_found_rows' from t");
        assert!(!pre.calc_found_rows);
        assert!(pre.comments.is_empty());
        assert!(pre.text.contains("/* no */"));
    }

    #[test]
    fn test_split_next_values() {
        assert_eq!(
            split_next_values("select next 5 values from seq"),
            Some(("5", " from seq"))
        );
        assert_eq!(split_next_values("select next_id from seq"), None);
    }
}
