//! End-to-end SELECT plans against the shared test vschema.

mod common;

use common::{plan_ok, plan_with, single_route};
use meridian_common::config::PlannerConfig;
use meridian_planner::engine::{
    AggregateOpcode, AggregateParams, JoinOpcode, OrderByParams, PulloutOpcode, RouteOpcode,
    VindexOpcode,
};
use meridian_planner::evalengine::{ScalarExpr, Value};
use meridian_planner::vschema::Destination;
use meridian_planner::Primitive;

fn int(v: i64) -> ScalarExpr {
    ScalarExpr::literal(Value::Int(v))
}

// ---- routing ----

#[test]
fn test_unique_vindex_equality_routes_to_one_shard() {
    let r = single_route("select id from user where id = 5");
    assert_eq!(r.opcode, RouteOpcode::EqualUnique);
    assert_eq!(r.keyspace, "user");
    assert_eq!(r.vindex.as_deref(), Some("user_index"));
    assert_eq!(r.values, vec![int(5)]);
    assert_eq!(r.query, "select id from user where id = 5");
    assert_eq!(r.field_query, "select id from user where 1 != 1");
    assert_eq!(r.table_name, "user");
}

#[test]
fn test_value_on_the_left_is_swapped() {
    let r = single_route("select id from user where 5 = id");
    assert_eq!(r.opcode, RouteOpcode::EqualUnique);
    assert_eq!(r.query, "select id from user where id = 5");
}

#[test]
fn test_non_unique_vindex_equality() {
    let r = single_route("select id from user where name = 'foo'");
    assert_eq!(r.opcode, RouteOpcode::Equal);
    assert_eq!(r.vindex.as_deref(), Some("name_user_map"));
    assert_eq!(r.values, vec![ScalarExpr::literal(Value::Str("foo".into()))]);
}

#[test]
fn test_unique_vindex_wins_over_lookup() {
    let r = single_route("select id from user where name = 'foo' and id = 1");
    assert_eq!(r.opcode, RouteOpcode::EqualUnique);
    assert_eq!(r.vindex.as_deref(), Some("user_index"));
    assert_eq!(r.values, vec![int(1)]);
}

#[test]
fn test_in_list_rewritten_to_list_variable() {
    let r = single_route("select id from user where id in (1, 2)");
    assert_eq!(r.opcode, RouteOpcode::In);
    assert_eq!(r.query, "select id from user where id in ::__vals");
    assert_eq!(r.values, vec![ScalarExpr::Tuple { items: vec![int(1), int(2)] }]);
    assert_eq!(r.field_query, "select id from user where 1 != 1");
}

#[test]
fn test_equality_with_null_contacts_no_shard() {
    let r = single_route("select id from user where id = null");
    assert_eq!(r.opcode, RouteOpcode::None);
    assert!(r.values.is_empty());
    assert_eq!(r.query, "select id from user where id = null");

    let r = single_route("select id from user where id in (null)");
    assert_eq!(r.opcode, RouteOpcode::None);
}

#[test]
fn test_is_null_on_hash_vindex() {
    let r = single_route("select id from user where id is null");
    assert_eq!(r.opcode, RouteOpcode::EqualUnique);
    assert_eq!(r.values, vec![ScalarExpr::literal(Value::Null)]);

    // Lookup vindexes hold no NULL rows.
    let r = single_route("select id from user where name is null");
    assert_eq!(r.opcode, RouteOpcode::Scatter);
}

#[test]
fn test_no_vindex_predicate_scatters() {
    let r = single_route("select col from user where col = 1");
    assert_eq!(r.opcode, RouteOpcode::Scatter);
    assert!(r.vindex.is_none());
    assert_eq!(r.query, "select col from user where col = 1");
}

#[test]
fn test_unsharded_table() {
    let r = single_route("select * from unsharded where a = 1");
    assert_eq!(r.opcode, RouteOpcode::Unsharded);
    assert_eq!(r.keyspace, "main");
    assert_eq!(r.query, "select * from unsharded where a = 1");
}

#[test]
fn test_reference_table() {
    let r = single_route("select col from ref");
    assert_eq!(r.opcode, RouteOpcode::Reference);
    assert_eq!(r.keyspace, "user");
}

#[test]
fn test_pinned_table_routes_by_keyspace_id() {
    let r = single_route("select * from pin_test");
    assert_eq!(r.opcode, RouteOpcode::EqualUnique);
    assert_eq!(r.vindex.as_deref(), Some("binary"));
    assert_eq!(r.values, vec![ScalarExpr::literal(Value::Bytes(vec![0x80]))]);
    assert_eq!(r.query, "select * from pin_test");
}

#[test]
fn test_keyspace_qualifier_is_stripped() {
    let r = single_route("select id from user.user where id = 3");
    assert_eq!(r.opcode, RouteOpcode::EqualUnique);
    assert_eq!(r.query, "select id from user where id = 3");
}

#[test]
fn test_shard_target_qualifier() {
    let r = single_route("select * from `user:-80`.user_extra");
    assert_eq!(r.opcode, RouteOpcode::ByDestination);
    assert_eq!(r.target_destination, Some(Destination::Shard("-80".into())));
    assert_eq!(r.query, "select * from user_extra");
}

#[test]
fn test_join_within_one_shard_target_merges() {
    let r = single_route(
        "select a.col from `user:-80`.user as a join `user:-80`.user_extra as b on a.id = b.user_id",
    );
    assert_eq!(r.opcode, RouteOpcode::ByDestination);
    assert_eq!(r.target_destination, Some(Destination::Shard("-80".into())));
    assert_eq!(r.query, "select a.col from user as a join user_extra as b on a.id = b.user_id");
}

#[test]
fn test_sequence_next_values() {
    let r = single_route("select next 2 values from seq");
    assert_eq!(r.opcode, RouteOpcode::Next);
    assert_eq!(r.query, "select next 2 values from seq");
}

// ---- joins ----

#[test]
fn test_join_on_shared_vindex_merges() {
    let r = single_route("select u.id, e.col from user as u join user_extra as e on u.id = e.user_id");
    assert_eq!(r.opcode, RouteOpcode::Scatter);
    assert_eq!(
        r.query,
        "select u.id, e.col from user as u join user_extra as e on u.id = e.user_id"
    );
}

#[test]
fn test_merged_join_keeps_where_routing() {
    let r = single_route(
        "select u.id from user as u join user_extra as e on u.id = e.user_id where u.id = 7",
    );
    assert_eq!(r.opcode, RouteOpcode::EqualUnique);
    assert_eq!(r.values, vec![int(7)]);
}

#[test]
fn test_join_with_reference_table_merges() {
    let r = single_route("select u.col from user as u join ref as r on u.col = r.col");
    assert_eq!(r.opcode, RouteOpcode::Scatter);
    assert_eq!(r.query, "select u.col from user as u join ref as r on u.col = r.col");
}

#[test]
fn test_reference_table_on_the_left_routes_by_the_right() {
    let r = single_route("select r.col from ref as r join user as u on r.col = u.col where u.id = 5");
    assert_eq!(r.opcode, RouteOpcode::EqualUnique);
    assert_eq!(r.vindex.as_deref(), Some("user_index"));
    assert_eq!(r.keyspace, "user");
}

#[test]
fn test_unsharded_tables_merge() {
    let r = single_route("select a.id from unsharded as a join unsharded_auth as b on a.id = b.id");
    assert_eq!(r.opcode, RouteOpcode::Unsharded);
    assert_eq!(r.query, "select a.id from unsharded as a join unsharded_auth as b on a.id = b.id");
}

#[test]
fn test_cross_shard_join_binds_left_values() {
    let plan = plan_ok("select u.col, e.col from user as u join user_extra as e on u.col = e.col");
    let Primitive::Join(j) = plan else {
        panic!("expected join, got {plan:?}");
    };
    assert_eq!(j.opcode, JoinOpcode::NormalJoin);
    assert_eq!(j.cols, vec![-1, 1]);
    assert_eq!(j.vars.get("u_col"), Some(&0));

    let left = j.left.as_route().expect("left route");
    assert_eq!(left.query, "select u.col from user as u");
    let right = j.right.as_route().expect("right route");
    assert_eq!(right.query, "select e.col from user_extra as e where e.col = :u_col");
    assert_eq!(right.field_query, "select e.col from user_extra as e where 1 != 1");
}

#[test]
fn test_join_across_keyspaces() {
    let plan = plan_ok("select u.id, m.id from user as u join unsharded as m on u.id = m.id");
    let Primitive::Join(j) = plan else {
        panic!("expected join, got {plan:?}");
    };
    assert_eq!(j.left.as_route().map(|r| r.opcode), Some(RouteOpcode::Scatter));
    let right = j.right.as_route().expect("right route");
    assert_eq!(right.opcode, RouteOpcode::Unsharded);
    assert_eq!(right.query, "select m.id from unsharded as m where m.id = :u_id");
}

#[test]
fn test_join_variable_routes_right_side() {
    let plan = plan_ok("select u.col, e.id from user as u join user_extra as e on e.user_id = u.col");
    let Primitive::Join(j) = plan else {
        panic!("expected join, got {plan:?}");
    };
    let right = j.right.as_route().expect("right route");
    assert_eq!(right.opcode, RouteOpcode::EqualUnique);
    assert_eq!(right.values, vec![ScalarExpr::bind_var("u_col")]);
    assert_eq!(right.query, "select e.id from user_extra as e where e.user_id = :u_col");
}

#[test]
fn test_cross_shard_left_join() {
    let plan = plan_ok("select u.col, e.col from user as u left join user_extra as e on u.col = e.col");
    let Primitive::Join(j) = plan else {
        panic!("expected join, got {plan:?}");
    };
    assert_eq!(j.opcode, JoinOpcode::LeftJoin);
    let right = j.right.as_route().expect("right route");
    assert_eq!(right.query, "select e.col from user_extra as e where e.col = :u_col");
}

#[test]
fn test_right_join_is_planned_as_left_join() {
    let r = single_route("select u.id from user as u right join user_extra as e on u.id = e.user_id");
    assert_eq!(
        r.query,
        "select u.id from user_extra as e left join user as u on u.id = e.user_id"
    );
}

// ---- select list ----

#[test]
fn test_star_expands_authoritative_table() {
    let r = single_route("select * from authoritative");
    assert_eq!(r.query, "select user_id, col1, col2 from authoritative");
}

#[test]
fn test_qualified_star_expands_with_aliases() {
    let r = single_route("select a.* from authoritative as a");
    assert_eq!(
        r.query,
        "select a.user_id as user_id, a.col1 as col1, a.col2 as col2 from authoritative as a"
    );
}

#[test]
fn test_star_over_two_authoritative_tables_aliases_every_column() {
    let expected = "select a.id as id, a.val as val, b.id as id, b.val as val \
                    from unsharded_auth as a join unsharded_auth as b on a.id = b.id";
    let r = single_route("select * from unsharded_auth as a join unsharded_auth as b on a.id = b.id");
    assert_eq!(r.query, expected);
    let r = single_route("select a.*, b.* from unsharded_auth as a join unsharded_auth as b on a.id = b.id");
    assert_eq!(r.query, expected);
}

#[test]
fn test_star_over_unknown_columns_is_pushed_as_is() {
    let r = single_route("select * from user where id = 1");
    assert_eq!(r.query, "select * from user where id = 1");
}

#[test]
fn test_empty_select_list_selects_one() {
    let plan = plan_ok("select u.col from user as u join user_extra as e on u.col = e.col");
    let Primitive::Join(j) = plan else {
        panic!("expected join, got {plan:?}");
    };
    assert_eq!(
        j.right.as_route().map(|r| r.query.as_str()),
        Some("select 1 from user_extra as e where e.col = :u_col")
    );
}

// ---- aggregates, grouping, ordering ----

#[test]
fn test_scatter_group_by_aggregates_at_gateway() {
    let plan = plan_ok("select col, count(*) from user group by col");
    let Primitive::OrderedAggregate(oa) = plan else {
        panic!("expected aggregate, got {plan:?}");
    };
    assert_eq!(oa.keys, vec![0]);
    assert!(!oa.has_distinct);
    assert_eq!(
        oa.aggregates,
        vec![AggregateParams { opcode: AggregateOpcode::Count, col: 1, alias: None }]
    );
    let r = oa.input.as_route().expect("route under aggregate");
    assert_eq!(r.query, "select col, count(*) from user group by col order by col asc");
    assert_eq!(r.field_query, "select col, count(*) from user where 1 != 1 group by col");
    assert_eq!(r.order_by, vec![OrderByParams { col: 0, desc: false }]);
}

#[test]
fn test_group_by_unique_vindex_runs_on_shards() {
    let r = single_route("select id, count(*) from user group by id");
    assert_eq!(r.opcode, RouteOpcode::Scatter);
    assert_eq!(r.query, "select id, count(*) from user group by id");
}

#[test]
fn test_single_shard_aggregate_needs_no_gateway_work() {
    let r = single_route("select count(*) from user where id = 1");
    assert_eq!(r.query, "select count(*) from user where id = 1");
}

#[test]
fn test_count_distinct_on_non_unique_column() {
    let plan = plan_ok("select col, count(distinct name) from user group by col");
    let Primitive::OrderedAggregate(oa) = plan else {
        panic!("expected aggregate, got {plan:?}");
    };
    assert!(oa.has_distinct);
    assert_eq!(
        oa.aggregates,
        vec![AggregateParams {
            opcode: AggregateOpcode::CountDistinct,
            col: 1,
            alias: Some("count(distinct name)".into()),
        }]
    );
    let r = oa.input.as_route().expect("route under aggregate");
    assert_eq!(
        r.query,
        "select col, name from user group by col, name order by col asc, name asc"
    );
}

#[test]
fn test_count_distinct_on_unique_vindex_is_plain_count() {
    let plan = plan_ok("select col, count(distinct id) from user group by col");
    let Primitive::OrderedAggregate(oa) = plan else {
        panic!("expected aggregate, got {plan:?}");
    };
    assert!(!oa.has_distinct);
    assert_eq!(oa.aggregates[0].opcode, AggregateOpcode::Count);
}

#[test]
fn test_distinct_on_unique_vindex_stays_on_route() {
    let r = single_route("select distinct id from user");
    assert_eq!(r.query, "select distinct id from user");
}

#[test]
fn test_distinct_without_vindex_groups_at_gateway() {
    let plan = plan_ok("select distinct col from user");
    let Primitive::OrderedAggregate(oa) = plan else {
        panic!("expected aggregate, got {plan:?}");
    };
    assert_eq!(oa.keys, vec![0]);
    assert!(oa.aggregates.is_empty());
    let r = oa.input.as_route().expect("route under aggregate");
    assert_eq!(r.query, "select distinct col from user order by col asc");
}

#[test]
fn test_scatter_order_by_becomes_merge_sort() {
    let r = single_route("select col, id from user order by col desc, 2");
    assert_eq!(r.query, "select col, id from user order by col desc, 2 asc");
    assert_eq!(
        r.order_by,
        vec![OrderByParams { col: 0, desc: true }, OrderByParams { col: 1, desc: false }]
    );
}

#[test]
fn test_single_shard_order_by_is_left_to_the_shard() {
    let r = single_route("select col from user where id = 1 order by col");
    assert_eq!(r.query, "select col from user where id = 1 order by col asc");
    assert!(r.order_by.is_empty());
}

#[test]
fn test_order_by_null_is_kept() {
    let r = single_route("select col from user order by null");
    assert_eq!(r.query, "select col from user order by null asc");
    assert!(r.order_by.is_empty());
}

// ---- limit ----

#[test]
fn test_scatter_limit_pushes_upper_bound() {
    let plan = plan_ok("select col from user limit 10");
    let Primitive::Limit(l) = plan else {
        panic!("expected limit, got {plan:?}");
    };
    assert_eq!(l.count, int(10));
    assert!(l.offset.is_none());
    let r = l.input.as_route().expect("route under limit");
    assert_eq!(r.query, "select col from user limit :__upper_limit");
}

#[test]
fn test_scatter_limit_with_offset() {
    let plan = plan_ok("select col from user limit 5, 10");
    let Primitive::Limit(l) = plan else {
        panic!("expected limit, got {plan:?}");
    };
    assert_eq!(l.count, int(10));
    assert_eq!(l.offset, Some(int(5)));
}

#[test]
fn test_single_shard_limit_stays_in_query() {
    let r = single_route("select col from user where id = 1 limit 10");
    assert_eq!(r.query, "select col from user where id = 1 limit 10");
}

#[test]
fn test_limit_bind_var_name_is_configurable() {
    let config = PlannerConfig { upper_limit_bind_var: "__bound".into(), ..Default::default() };
    let plan = plan_with(config, "select col from user limit 3").expect("plan");
    let Primitive::Limit(l) = plan else {
        panic!("expected limit, got {plan:?}");
    };
    assert_eq!(
        l.input.as_route().map(|r| r.query.as_str()),
        Some("select col from user limit :__bound")
    );
}

// ---- subqueries ----

#[test]
fn test_in_subquery_is_pulled_out() {
    let plan = plan_ok("select col from user where id in (select col from user_extra)");
    let Primitive::PulloutSubquery(p) = plan else {
        panic!("expected pullout, got {plan:?}");
    };
    assert_eq!(p.opcode, PulloutOpcode::PulloutIn);
    assert_eq!(p.subquery_name, "__sq1");
    assert_eq!(p.has_values, "__sq_has_values1");
    assert_eq!(
        p.subquery.as_route().map(|r| r.query.as_str()),
        Some("select col from user_extra")
    );
    let under = p.underlying.as_route().expect("underlying route");
    assert_eq!(under.opcode, RouteOpcode::In);
    assert_eq!(under.query, "select col from user where :__sq_has_values1 = 1 and id in ::__vals");
    assert_eq!(under.values, vec![ScalarExpr::ListBindVar { name: "__sq1".into() }]);
}

#[test]
fn test_not_in_subquery_is_pulled_out() {
    let plan = plan_ok("select col from user where id not in (select col from unsharded)");
    let Primitive::PulloutSubquery(p) = plan else {
        panic!("expected pullout, got {plan:?}");
    };
    assert_eq!(p.opcode, PulloutOpcode::PulloutNotIn);
    let under = p.underlying.as_route().expect("underlying route");
    assert_eq!(under.opcode, RouteOpcode::Scatter);
    assert_eq!(
        under.query,
        "select col from user where (:__sq_has_values1 = 0 or id not in ::__sq1)"
    );
}

#[test]
fn test_value_subquery_routes_outer_query() {
    let plan = plan_ok("select col from user where id = (select col from unsharded)");
    let Primitive::PulloutSubquery(p) = plan else {
        panic!("expected pullout, got {plan:?}");
    };
    assert_eq!(p.opcode, PulloutOpcode::PulloutValue);
    assert_eq!(p.subquery.as_route().map(|r| r.opcode), Some(RouteOpcode::Unsharded));
    let under = p.underlying.as_route().expect("underlying route");
    assert_eq!(under.opcode, RouteOpcode::EqualUnique);
    assert_eq!(under.values, vec![ScalarExpr::bind_var("__sq1")]);
    assert_eq!(under.query, "select col from user where id = :__sq1");
}

#[test]
fn test_exists_subquery_is_pulled_out() {
    let plan = plan_ok("select id from user where exists (select 1 from user_extra)");
    let Primitive::PulloutSubquery(p) = plan else {
        panic!("expected pullout, got {plan:?}");
    };
    assert_eq!(p.opcode, PulloutOpcode::PulloutExists);
    assert_eq!(
        p.underlying.as_route().map(|r| r.query.as_str()),
        Some("select id from user where :__sq_has_values1")
    );
}

#[test]
fn test_same_shard_subquery_merges() {
    let r = single_route(
        "select id from user where id = 5 and col in (select col from user_extra where user_id = 5)",
    );
    assert_eq!(r.opcode, RouteOpcode::EqualUnique);
    assert_eq!(
        r.query,
        "select id from user where id = 5 and col in (select col from user_extra where user_id = 5)"
    );
}

#[test]
fn test_plain_predicate_is_pushed_before_subquery_predicate() {
    let r = single_route(
        "select id from user where col in (select col from user_extra where user_id = 5) and id = 5",
    );
    assert_eq!(r.opcode, RouteOpcode::EqualUnique);
    assert_eq!(
        r.query,
        "select id from user where id = 5 and col in (select col from user_extra where user_id = 5)"
    );
}

#[test]
fn test_unsharded_subquery_merges_into_unsharded_route() {
    let r = single_route("select id from unsharded where id in (select id from unsharded_auth)");
    assert_eq!(r.opcode, RouteOpcode::Unsharded);
    assert_eq!(r.query, "select id from unsharded where id in (select id from unsharded_auth)");
}

#[test]
fn test_correlated_subquery_on_vindex_merges() {
    let r = single_route(
        "select u.col from user as u where exists (select 1 from user_extra as e where e.user_id = u.id)",
    );
    assert_eq!(r.opcode, RouteOpcode::Scatter);
    assert_eq!(
        r.query,
        "select u.col from user as u where exists (select 1 from user_extra as e where e.user_id = u.id)"
    );
}

#[test]
fn test_having_subquery_merges_into_single_shard_route() {
    let r = single_route(
        "select id, count(*) from user where id = 5 group by id \
         having count(*) > (select 1 from user_extra where user_id = 5)",
    );
    assert_eq!(r.opcode, RouteOpcode::EqualUnique);
    assert_eq!(
        r.query,
        "select id, count(*) from user where id = 5 group by id \
         having count(*) > (select 1 from user_extra where user_id = 5)"
    );
}

#[test]
fn test_having_subquery_is_pulled_out_on_scatter() {
    let plan = plan_ok("select col from user having col in (select col from music)");
    let Primitive::PulloutSubquery(p) = plan else {
        panic!("expected pullout, got {plan:?}");
    };
    assert_eq!(p.opcode, PulloutOpcode::PulloutIn);
    let under = p.underlying.as_route().expect("underlying route");
    assert_eq!(under.opcode, RouteOpcode::Scatter);
    assert_eq!(
        under.query,
        "select col from user having :__sq_has_values1 = 1 and col in ::__sq1"
    );
}

#[test]
fn test_derived_table_on_route_is_absorbed() {
    let r = single_route("select t.id from (select id, col from user where id = 5) as t");
    assert_eq!(r.opcode, RouteOpcode::EqualUnique);
    assert_eq!(r.values, vec![int(5)]);
    assert_eq!(r.query, "select t.id from (select id, col from user where id = 5) as t");
    assert_eq!(
        r.field_query,
        "select t.id from (select id, col from user where 1 != 1) as t where 1 != 1"
    );
}

#[test]
fn test_derived_table_keeps_vindex_columns() {
    let r = single_route("select t.id from (select id from user) as t where t.id = 9");
    assert_eq!(r.opcode, RouteOpcode::EqualUnique);
    assert_eq!(r.vindex.as_deref(), Some("user_index"));
}

#[test]
fn test_cross_shard_derived_table_becomes_subquery() {
    let plan = plan_ok(
        "select t.col from (select u.col from user as u join user_extra as e on u.col = e.col) as t",
    );
    let Primitive::Subquery(s) = plan else {
        panic!("expected subquery, got {plan:?}");
    };
    assert_eq!(s.cols, vec![0]);
    assert!(matches!(s.subquery.as_ref(), Primitive::Join(_)));
}

// ---- catalog queries ----

#[test]
fn test_information_schema_is_routed_by_schema_name() {
    let r = single_route(
        "select table_name from information_schema.tables where table_schema = 'user'",
    );
    assert_eq!(r.opcode, RouteOpcode::Dba);
    assert_eq!(
        r.sys_table_keyspace_expr,
        Some(ScalarExpr::literal(Value::Str("user".into())))
    );
    assert_eq!(
        r.query,
        "select table_name from information_schema.tables where table_schema = :__vtschemaname"
    );
}

#[test]
fn test_information_schema_current_database_is_left_alone() {
    let r = single_route(
        "select table_name from information_schema.tables where table_schema = database()",
    );
    assert_eq!(r.opcode, RouteOpcode::Dba);
    assert!(r.sys_table_keyspace_expr.is_none());
    assert_eq!(
        r.query,
        "select table_name from information_schema.tables where table_schema = database()"
    );
}

// ---- vindex functions ----

#[test]
fn test_vindex_function() {
    let plan = plan_ok("select id, keyspace_id from user_index where id = 1");
    let Primitive::VindexFunc(vf) = plan else {
        panic!("expected vindex func, got {plan:?}");
    };
    assert_eq!(vf.opcode, VindexOpcode::VindexMap);
    assert_eq!(vf.vindex, "user_index");
    assert_eq!(vf.fields, vec!["id".to_string(), "keyspace_id".to_string()]);
    assert_eq!(vf.cols, vec![0, 1]);
    assert_eq!(vf.value, Some(int(1)));
}

// ---- dual, locks, found rows ----

#[test]
fn test_constant_dual_select_is_evaluated_at_gateway() {
    let plan = plan_ok("select 1 + 1 as two, 'a' from dual");
    let Primitive::Projection(p) = plan else {
        panic!("expected projection, got {plan:?}");
    };
    assert_eq!(p.cols, vec!["two".to_string(), "'a'".to_string()]);
    assert_eq!(p.exprs[1], ScalarExpr::literal(Value::Str("a".into())));
    assert_eq!(*p.input, Primitive::SingleRow);
}

#[test]
fn test_lock_function_goes_to_one_shard() {
    let plan = plan_ok("select get_lock('x', 10) from dual");
    let Primitive::Lock(l) = plan else {
        panic!("expected lock, got {plan:?}");
    };
    assert_eq!(l.keyspace, "main");
    assert_eq!(l.target_destination, Destination::KeyspaceId(vec![0]));
    assert_eq!(l.query, "select get_lock('x', 10) from dual");
}

#[test]
fn test_dual_with_column_reference_takes_regular_path() {
    let r = single_route("select database() from dual");
    assert_eq!(r.opcode, RouteOpcode::Reference);
    assert_eq!(r.keyspace, "main");
}

#[test]
fn test_sql_calc_found_rows_plans_limit_and_count() {
    let plan = plan_ok("select sql_calc_found_rows col from user limit 2");
    let Primitive::SqlCalcFoundRows(s) = plan else {
        panic!("expected found rows plan, got {plan:?}");
    };
    let Primitive::Limit(l) = s.limit_query.as_ref() else {
        panic!("expected limit, got {:?}", s.limit_query);
    };
    assert_eq!(
        l.input.as_route().map(|r| r.query.as_str()),
        Some("select col from user limit :__upper_limit")
    );
    let Primitive::OrderedAggregate(oa) = s.count_query.as_ref() else {
        panic!("expected aggregate, got {:?}", s.count_query);
    };
    assert_eq!(
        oa.input.as_route().map(|r| r.query.as_str()),
        Some("select count(*) from user")
    );
}

#[test]
fn test_sql_calc_found_rows_on_one_shard() {
    let plan = plan_ok("select sql_calc_found_rows * from user where id = 1 order by col limit 2");
    let Primitive::SqlCalcFoundRows(s) = plan else {
        panic!("expected found rows plan, got {plan:?}");
    };
    assert_eq!(
        s.limit_query.as_route().map(|r| r.query.as_str()),
        Some("select * from user where id = 1 order by col asc limit 2")
    );
    assert_eq!(
        s.count_query.as_route().map(|r| r.query.as_str()),
        Some("select count(*) from user where id = 1")
    );
}

#[test]
fn test_sql_calc_found_rows_counts_over_grouped_derived_table() {
    let plan = plan_ok("select sql_calc_found_rows user_id, count(id) from music group by user_id limit 2");
    let Primitive::SqlCalcFoundRows(s) = plan else {
        panic!("expected found rows plan, got {plan:?}");
    };
    let Primitive::Limit(l) = s.limit_query.as_ref() else {
        panic!("expected limit, got {:?}", s.limit_query);
    };
    assert_eq!(
        l.input.as_route().map(|r| r.query.as_str()),
        Some("select user_id, count(id) from music group by user_id limit :__upper_limit")
    );
    let counts = s.count_query.routes();
    assert_eq!(counts.len(), 1);
    assert_eq!(
        counts[0].query,
        "select count(*) from (select user_id, count(id) from music group by user_id) as t"
    );
}

#[test]
fn test_sql_calc_found_rows_with_having_counts_over_derived_table() {
    let plan = plan_ok("select sql_calc_found_rows id from user where id = 1 having id > 0 limit 2");
    let Primitive::SqlCalcFoundRows(s) = plan else {
        panic!("expected found rows plan, got {plan:?}");
    };
    assert_eq!(
        s.count_query.as_route().map(|r| r.query.as_str()),
        Some("select count(*) from (select id from user where id = 1 having id > 0) as t")
    );
}

#[test]
fn test_top_level_into_reaches_the_route() {
    let r = single_route("select id into @x from user where id = 1");
    assert_eq!(r.opcode, RouteOpcode::EqualUnique);
    assert_eq!(r.query, "select id from user where id = 1 into @x");
}

#[test]
fn test_sql_calc_found_rows_without_limit_is_ordinary() {
    let r = single_route("select sql_calc_found_rows col from user where id = 1");
    assert_eq!(r.query, "select col from user where id = 1");
}

// ---- directives and configuration ----

#[test]
fn test_query_timeout_directive() {
    let r = single_route("select /*vt+ QUERY_TIMEOUT_MS=20 */ col from user");
    assert_eq!(r.query_timeout_ms, 20);
    assert_eq!(r.query, "select /*vt+ QUERY_TIMEOUT_MS=20 */ col from user");
}

#[test]
fn test_default_query_timeout_from_config() {
    let config = PlannerConfig { default_query_timeout_ms: 300, ..Default::default() };
    let plan = plan_with(config, "select col from user").expect("plan");
    assert_eq!(plan.as_route().map(|r| r.query_timeout_ms), Some(300));
}

#[test]
fn test_scatter_errors_as_warnings_directive() {
    let r = single_route("select /*vt+ SCATTER_ERRORS_AS_WARNINGS=1 */ col from user");
    assert!(r.scatter_errors_as_warnings);
    let r = single_route("select col from user");
    assert!(!r.scatter_errors_as_warnings);
}

#[test]
fn test_plan_serializes_with_operator_tag() {
    let plan = plan_ok("select col from user limit 1");
    let json = plan.to_json();
    assert_eq!(json["operator"], "Limit");
    assert_eq!(json["input"]["operator"], "Route");
    assert_eq!(json["input"]["opcode"], "Scatter");
}
