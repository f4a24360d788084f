use std::path::Path as FsPath;
use std::sync::Arc;

use rust_decimal::Decimal;
use strata_store::{
    ChangeBroker, Entity, EntityReadApi, EntityStore, EntityWriteApi, Filter, FilterPath, LevelId,
    Operand, OrFilter, Paging, Predicate, QueryInput, SortDirection, StrataError,
    StrataResult, Value, catalog_registry,
};
use tempfile::tempdir;

async fn open(dir: &FsPath) -> StrataResult<EntityStore> {
    EntityStore::connect_sqlite(
        &dir.join("strata.sqlite"),
        catalog_registry()?,
        Arc::new(ChangeBroker::new()),
    )
    .await
}

async fn seed(store: &EntityStore, rows: &[(&str, u32, i64)]) -> StrataResult<()> {
    for (text, small, large) in rows {
        store
            .replace_variable(
                LevelId::BASE,
                Entity::new("Test")
                    .set("str", *text)
                    .set("u32", *small)
                    .set("u64", *large),
            )
            .await?;
    }
    Ok(())
}

fn ids(entities: &[Entity]) -> Vec<i64> {
    entities
        .iter()
        .filter_map(|entity| entity.id.map(|id| id.0))
        .collect()
}

fn texts(entities: &[Entity]) -> Vec<String> {
    entities
        .iter()
        .filter_map(|entity| match entity.get("str") {
            Some(Value::Text(text)) => Some(text.clone()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn like_matches_tokens_in_order() -> StrataResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = open(dir.path()).await?;
    seed(&store, &[("STR STR STR", 1, 1), ("STRX", 2, 2), ("str and more str", 3, 3)]).await?;

    let found = store
        .get_variables(QueryInput::new("Test").with_filter(
            Filter::new().with_path(FilterPath::new("str").matching(Predicate::Like("STR STR".into()))),
        ))
        .await?;
    let mut matched = texts(&found);
    matched.sort();
    assert_eq!(matched, vec!["STR STR STR", "str and more str"]);

    let globbed = store
        .get_variables(QueryInput::new("Test").with_filter(
            Filter::new().with_path(FilterPath::new("str").matching(Predicate::Glob("STR STR".into()))),
        ))
        .await?;
    assert_eq!(texts(&globbed), vec!["STR STR STR"]);
    Ok(())
}

#[tokio::test]
async fn field_to_field_comparison() -> StrataResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = open(dir.path()).await?;
    seed(&store, &[("big", 10, 5), ("small", 1, 5), ("equal", 5, 5)]).await?;

    let greater = store
        .get_variables(QueryInput::new("Test").with_filter(
            Filter::new().with_path(
                FilterPath::new("u32").matching(Predicate::Gt(Operand::path("u64"))),
            ),
        ))
        .await?;
    assert_eq!(texts(&greater), vec!["big"]);

    let mismatched = store
        .get_variables(QueryInput::new("Test").with_filter(
            Filter::new().with_path(
                FilterPath::new("u32").matching(Predicate::Eq(Operand::path("str"))),
            ),
        ))
        .await;
    assert!(matches!(mismatched, Err(StrataError::InvalidInput { .. })));
    Ok(())
}

#[tokio::test]
async fn or_filters_union_their_branches() -> StrataResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = open(dir.path()).await?;
    seed(&store, &[("a", 1, 1), ("b", 2, 2), ("c", 3, 3)]).await?;

    let filter = OrFilter::any_of(vec![
        Filter::new().with_path(FilterPath::new("str").matching(Predicate::eq("a"))),
        Filter::new().with_id(Predicate::eq(Value::Integer(3))),
    ]);
    let found = store
        .get_variables(QueryInput::new("Test").with_filter(filter))
        .await?;
    let mut matched = texts(&found);
    matched.sort();
    assert_eq!(matched, vec!["a", "c"]);
    Ok(())
}

#[tokio::test]
async fn between_and_sorting_with_paging() -> StrataResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = open(dir.path()).await?;
    seed(
        &store,
        &[("e", 5, 0), ("b", 2, 0), ("d", 4, 0), ("a", 1, 0), ("c", 3, 0)],
    )
    .await?;

    let sorted = Filter::new().with_path(FilterPath::new("u32").sorted(1, SortDirection::Asc));
    let page = store
        .get_variables(
            QueryInput::new("Test")
                .with_filter(sorted.clone())
                .with_paging(Paging::page(2, 2)),
        )
        .await?;
    assert_eq!(texts(&page), vec!["c", "d"]);

    let ranged = Filter::new().with_path(
        FilterPath::new("u32")
            .matching(Predicate::between(2u32, 4u32))
            .sorted(1, SortDirection::Desc),
    );
    let within = store
        .get_variables(QueryInput::new("Test").with_filter(ranged))
        .await?;
    assert_eq!(texts(&within), vec!["d", "c", "b"]);

    let outside = Filter::new().with_path(
        FilterPath::new("u32")
            .matching(Predicate::NotBetween(Operand::value(2u32), Operand::value(4u32)))
            .sorted(1, SortDirection::Asc),
    );
    let rest = store
        .get_variables(QueryInput::new("Test").with_filter(outside))
        .await?;
    assert_eq!(texts(&rest), vec!["a", "e"]);
    Ok(())
}

#[tokio::test]
async fn fallback_order_is_deterministic() -> StrataResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = open(dir.path()).await?;
    seed(&store, &[("x", 1, 1), ("y", 1, 1), ("z", 1, 1)]).await?;

    let filter = Filter::new().with_path(FilterPath::new("u32").matching(Predicate::eq(1u32)));
    let first = store
        .get_variables(QueryInput::new("Test").with_filter(filter.clone()))
        .await?;
    let second = store
        .get_variables(QueryInput::new("Test").with_filter(filter))
        .await?;
    assert_eq!(ids(&first), ids(&second));
    assert_eq!(ids(&first), vec![3, 2, 1]);
    Ok(())
}

#[tokio::test]
async fn decimals_compare_numerically() -> StrataResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = open(dir.path()).await?;
    for (text, amount) in [("neg", Decimal::new(-15, 1)), ("two", Decimal::new(2, 0)), ("ten", Decimal::new(1025, 2))] {
        store
            .replace_variable(
                LevelId::BASE,
                Entity::new("Test").set("str", text).set("idecimal", amount),
            )
            .await?;
    }
    let filter = Filter::new().with_path(
        FilterPath::new("idecimal")
            .matching(Predicate::Gt(Operand::value(Decimal::ONE)))
            .sorted(1, SortDirection::Asc),
    );
    let found = store
        .get_variables(QueryInput::new("Test").with_filter(filter))
        .await?;
    assert_eq!(texts(&found), vec!["two", "ten"]);
    Ok(())
}

#[tokio::test]
async fn page_size_is_capped_and_sql_is_inspectable() -> StrataResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = open(dir.path()).await?;
    let input = QueryInput::new("Test")
        .with_filter(Filter::new().with_path(FilterPath::new("str").matching(Predicate::eq("a"))))
        .with_paging(Paging {
            limit: Some(1_000_000),
            offset: None,
        });
    let rendered = store.compile_query(&input)?;
    assert!(rendered.sql.contains("GROUP BY"));
    assert!(rendered.sql.contains("HAVING"));
    assert!(rendered.sql.contains("LIMIT 1000"));

    let missing = store.get_variables(QueryInput::new("Test").with_filter(
        Filter::new().with_id(Predicate::eq(Value::Integer(99))),
    ));
    assert!(missing.await?.is_empty());
    assert_eq!(
        store.get_variables(QueryInput::new("Test")).await?.len(),
        0,
        "fresh store holds no Test rows"
    );
    Ok(())
}
