//! Statements the planner must refuse, and the errors it reports.

mod common;

use common::{plan, plan_err, plan_with, vschema};
use meridian_common::config::PlannerConfig;
use meridian_common::error::{ErrorCode, PlanError};
use meridian_planner::Planner;
use meridian_sql_frontend::ast::Expr;
use meridian_sql_frontend::parse_select;

#[test]
fn test_join_using_is_unsupported() {
    assert_eq!(
        plan_err("select u.col from user as u join user_extra as e using (col)"),
        "unsupported: join with USING(column_list) clause for complex queries"
    );
}

#[test]
fn test_left_join_where_on_right_side() {
    assert_eq!(
        plan_err(
            "select u.col from user as u left join user_extra as e on u.col = e.col where e.col = 1"
        ),
        "unsupported: cross-shard left join and where clause"
    );
}

#[test]
fn test_left_join_expression_on_right_side() {
    assert_eq!(
        plan_err("select e.col + 1 from user as u left join user_extra as e on u.col = e.col"),
        "unsupported: cross-shard left join and column expressions"
    );
}

#[test]
fn test_having_above_gateway_aggregate() {
    assert_eq!(
        plan_err("select col, count(*) from user group by col having count(*) > 1"),
        "unsupported: filtering on results of aggregates"
    );
}

#[test]
fn test_aggregate_over_cross_shard_join() {
    assert_eq!(
        plan_err("select count(*) from user as u join user_extra as e on u.col = e.col"),
        "unsupported: cross-shard query with aggregates"
    );
}

#[test]
fn test_distinct_with_aggregate_at_gateway() {
    assert_eq!(
        plan_err("select distinct count(*) from user"),
        "unsupported: distinct cannot be combined with aggregate functions"
    );
}

#[test]
fn test_only_one_distinct_aggregate() {
    assert_eq!(
        plan_err("select count(distinct name), count(distinct col) from user"),
        "unsupported: only one distinct aggregation allowed in a select: count(distinct col)"
    );
}

#[test]
fn test_scatter_order_by_complex_expression() {
    assert_eq!(
        plan_err("select col from user order by col + 1"),
        "unsupported: in scatter query: complex order by expression: col + 1"
    );
}

#[test]
fn test_scatter_order_by_out_of_select_list() {
    assert_eq!(
        plan_err("select col from user order by id"),
        "unsupported: in scatter query: order by must reference a column in the select list: id asc"
    );
}

#[test]
fn test_order_by_column_number_out_of_range() {
    let err = plan("select col from user order by 2").unwrap_err();
    assert_eq!(err, PlanError::InvalidArgument("column number out of range: 2".into()));
    assert_eq!(err.code(), ErrorCode::InvalidArgument);
}

#[test]
fn test_join_order_by_right_side_column() {
    assert_eq!(
        plan_err("select u.col, e.col from user as u join user_extra as e on u.col = e.col order by e.col"),
        "unsupported: order by spans across shards"
    );
}

#[test]
fn test_second_table_schema_predicate() {
    let err = plan(
        "select * from information_schema.tables where table_schema = 'a' and table_schema = 'b'",
    )
    .unwrap_err();
    assert_eq!(
        err,
        PlanError::InvalidArgument("two predicates for table_schema not supported".into())
    );
}

#[test]
fn test_lock_function_outside_dual() {
    let err = plan("select get_lock('x', 10) from user").unwrap_err();
    assert_eq!(err, PlanError::FailedPrecondition("get_lock('x', 10) allowed only with dual".into()));
}

#[test]
fn test_having_subquery_over_gateway_aggregate() {
    assert_eq!(
        plan_err("select col, count(*) from user group by col having col in (select col from music)"),
        "unsupported: filtering on results of aggregates"
    );
}

#[test]
fn test_scatter_join_with_shard_target() {
    assert_eq!(
        plan_err("select user.col from user join `user:-80`.user_extra on user.id = user_extra.user_id"),
        "unsupported: SELECT with a target destination"
    );
}

#[test]
fn test_join_across_different_shard_targets() {
    assert_eq!(
        plan_err(
            "select a.col from `user:-80`.user as a join `user:80-`.user_extra as b on a.id = b.user_id"
        ),
        "unsupported: SELECT with a target destination"
    );
}

#[test]
fn test_subquery_against_shard_target() {
    assert_eq!(
        plan_err("select col from `user:-80`.user where id in (select user_id from user_extra)"),
        "unsupported: SELECT with a target destination"
    );
}

#[test]
fn test_sql_calc_found_rows_text_inside_subquery() {
    for sql in [
        "select id from user where id = 5 and col in \
         (select sql_calc_found_rows col from user_extra where user_id = 5) limit 3",
        "select id from user where id in (select sql_calc_found_rows id from user_extra limit 1) limit 5",
    ] {
        assert_eq!(plan(sql).unwrap_err(), PlanError::IncorrectPlacement("SQL_CALC_FOUND_ROWS"));
    }
}

#[test]
fn test_into_inside_subquery() {
    let err = plan("select id from user where col in (select col into @x from music)").unwrap_err();
    assert_eq!(err, PlanError::IncorrectPlacement("INTO"));
}

#[test]
fn test_unqualified_column_shared_by_two_routes() {
    assert!(matches!(
        plan("select user_id from authoritative join user_extra"),
        Err(PlanError::AmbiguousColumn(_))
    ));
}

#[test]
fn test_sql_calc_found_rows_inside_subquery() {
    let sql = "select id from user where id in (select id from user_extra limit 1)";
    let mut sel = parse_select(sql).unwrap();
    let Some(Expr::Comparison { right, .. }) = sel.where_clause.as_mut() else {
        panic!("expected comparison");
    };
    let Expr::Subquery(inner) = right.as_mut() else {
        panic!("expected subquery");
    };
    inner.sql_calc_found_rows = true;

    let vs = vschema();
    let err = Planner::new(&vs, PlannerConfig::default()).plan_select(&sel, sql).unwrap_err();
    assert_eq!(err, PlanError::IncorrectPlacement("SQL_CALC_FOUND_ROWS"));
    assert_eq!(err.to_string(), "Incorrect usage/placement of 'SQL_CALC_FOUND_ROWS'");
}

#[test]
fn test_next_on_regular_table() {
    let err = plan("select next 1 values from user").unwrap_err();
    assert_eq!(err, PlanError::InvalidArgument("NEXT used on a non-sequence table".into()));
}

#[test]
fn test_vindex_function_without_filter() {
    assert_eq!(
        plan_err("select id from user_index"),
        "unsupported: where clause for vindex function must be of the form id = <val> (where clause missing)"
    );
}

#[test]
fn test_vindex_function_filter_shape() {
    assert_eq!(
        plan_err("select id from user_index where id > 1"),
        "unsupported: where clause for vindex function must be of the form id = <val> (not equality)"
    );
}

#[test]
fn test_cross_shard_correlated_subquery() {
    assert_eq!(
        plan_err("select id from user where id in (select id from unsharded where unsharded.id = user.col)"),
        "unsupported: cross-shard correlated subquery"
    );
}

#[test]
fn test_unknown_table() {
    assert!(matches!(plan("select * from nosuch"), Err(PlanError::UnknownTable(_))));
}

#[test]
fn test_unknown_column_in_authoritative_table() {
    assert!(matches!(plan("select foo from authoritative"), Err(PlanError::UnknownColumn(_))));
}

#[test]
fn test_unknown_qualifier() {
    assert!(matches!(plan("select x.id from user"), Err(PlanError::UnknownColumn(_))));
}

#[test]
fn test_scatter_rejected_when_disabled() {
    let config = PlannerConfig { allow_scatter: false, ..Default::default() };
    let err = plan_with(config.clone(), "select col from user").unwrap_err();
    assert_eq!(err.to_string(), "unsupported: scatter queries are disabled");

    // Single-shard and unsharded plans are still fine.
    assert!(plan_with(config.clone(), "select col from user where id = 1").is_ok());
    assert!(plan_with(config, "select * from unsharded").is_ok());
}

#[test]
fn test_scatter_inside_join_rejected_when_disabled() {
    let config = PlannerConfig { allow_scatter: false, ..Default::default() };
    let err = plan_with(
        config,
        "select u.col from user as u join user_extra as e on u.col = e.col where u.id = 1",
    )
    .unwrap_err();
    assert!(matches!(err, PlanError::Unsupported(_)));
}

#[test]
fn test_malformed_statement() {
    assert!(matches!(plan("select id from user where"), Err(PlanError::Parse(_))));
}
