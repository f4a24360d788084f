use std::path::Path;
use std::sync::Arc;

use strata_store::{
    ChangeBroker, Entity, EntityReadApi, EntityStore, EntityWriteApi, GetInput, Id, LevelApi,
    LevelId, QueryInput, StrataError, StrataResult, Value, catalog_registry,
};
use tempfile::tempdir;

async fn open(dir: &Path) -> StrataResult<EntityStore> {
    EntityStore::connect_sqlite(
        &dir.join("strata.sqlite"),
        catalog_registry()?,
        Arc::new(ChangeBroker::new()),
    )
    .await
}

fn test_entity(id: i64, text: &str) -> Entity {
    Entity::new("Test")
        .with_id(Id(id))
        .set("str", text)
        .set("u32", 59u32)
        .set("u64", 75)
}

async fn read_str(store: &EntityStore, level: LevelId, id: i64) -> StrataResult<Option<Value>> {
    let entity = store
        .get_variable(GetInput::new("Test", Id(id)).at_level(level))
        .await?;
    Ok(entity.get("str").cloned())
}

#[tokio::test]
async fn level_lifecycle_rules() -> StrataResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = open(dir.path()).await?;

    assert_eq!(store.next_level_id().await?, LevelId(1));
    let level = store.create_level(LevelId(1)).await?;
    assert!(level.active);
    assert!(matches!(
        store.create_level(LevelId(1)).await,
        Err(StrataError::InvalidInput { .. })
    ));
    assert!(matches!(
        store.create_level(LevelId::BASE).await,
        Err(StrataError::InvalidInput { .. })
    ));
    assert!(matches!(
        store.deactivate_level(LevelId::BASE).await,
        Err(StrataError::InvalidInput { .. })
    ));
    assert!(matches!(
        store.remove_level(LevelId::BASE).await,
        Err(StrataError::InvalidInput { .. })
    ));
    assert!(matches!(
        store.activate_level(LevelId(9)).await,
        Err(StrataError::NotFound { .. })
    ));

    store.deactivate_level(LevelId(1)).await?;
    let levels = store.list_levels().await?;
    assert_eq!(levels.len(), 2);
    assert!(!levels[1].active);
    store.activate_level(LevelId(1)).await?;
    assert!(store.list_levels().await?[1].active);
    assert_eq!(store.next_level_id().await?, LevelId(2));

    let err = store
        .replace_variable(LevelId(7), test_entity(1, "A"))
        .await
        .unwrap_err();
    assert!(matches!(err, StrataError::NotFound { .. }));
    Ok(())
}

#[tokio::test]
async fn overlay_masks_base_values_while_active() -> StrataResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = open(dir.path()).await?;
    store.replace_variable(LevelId::BASE, test_entity(1, "A")).await?;
    store.create_level(LevelId(1)).await?;

    let changes = store
        .replace_variable(LevelId(1), Entity::new("Test").with_id(Id(1)).set("str", "B"))
        .await?;
    let test_changes = changes.get("Test").expect("test changes");
    assert!(test_changes.updated.contains(&Id(1)));
    assert!(test_changes.created.is_empty());

    assert_eq!(read_str(&store, LevelId(1), 1).await?, Some(Value::from("B")));
    assert_eq!(read_str(&store, LevelId::BASE, 1).await?, Some(Value::from("A")));

    let overlaid = store
        .get_variable(GetInput::new("Test", Id(1)).at_level(LevelId(1)))
        .await?;
    assert_eq!(overlaid.get("u32"), Some(&Value::Integer(59)));
    assert_eq!(overlaid.meta.map(|meta| meta.level), Some(LevelId(1)));

    store.deactivate_level(LevelId(1)).await?;
    assert_eq!(read_str(&store, LevelId(1), 1).await?, Some(Value::from("A")));
    store.activate_level(LevelId(1)).await?;
    assert_eq!(read_str(&store, LevelId(1), 1).await?, Some(Value::from("B")));
    Ok(())
}

#[tokio::test]
async fn tombstones_hide_entities_only_at_and_above_their_level() -> StrataResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = open(dir.path()).await?;
    store.replace_variable(LevelId::BASE, test_entity(1, "A")).await?;
    store.create_level(LevelId(1)).await?;
    store.create_level(LevelId(2)).await?;

    let changes = store.remove_variables(LevelId(1), "Test", &[Id(1)]).await?;
    assert!(changes.get("Test").expect("changes").removed.contains(&Id(1)));

    let at_one = store
        .get_variables(QueryInput::new("Test").at_level(LevelId(1)))
        .await?;
    assert!(at_one.is_empty());
    let at_two = store
        .get_variables(QueryInput::new("Test").at_level(LevelId(2)))
        .await?;
    assert!(at_two.is_empty());
    assert!(matches!(
        store
            .get_variable(GetInput::new("Test", Id(1)).at_level(LevelId(1)))
            .await,
        Err(StrataError::NotFound { .. })
    ));
    let at_base = store.get_variables(QueryInput::new("Test")).await?;
    assert_eq!(at_base.len(), 1);

    let again = store.remove_variables(LevelId(1), "Test", &[Id(1)]).await?;
    assert!(again.is_empty());

    store.deactivate_level(LevelId(1)).await?;
    let unmasked = store
        .get_variables(QueryInput::new("Test").at_level(LevelId(2)))
        .await?;
    assert_eq!(unmasked.len(), 1);
    Ok(())
}

#[tokio::test]
async fn writing_over_a_tombstone_recreates_the_entity() -> StrataResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = open(dir.path()).await?;
    store.replace_variable(LevelId::BASE, test_entity(1, "A")).await?;
    store.create_level(LevelId(1)).await?;
    store.remove_variables(LevelId(1), "Test", &[Id(1)]).await?;

    let changes = store
        .replace_variable(LevelId(1), Entity::new("Test").with_id(Id(1)).set("str", "C"))
        .await?;
    assert!(changes.get("Test").expect("changes").created.contains(&Id(1)));
    assert_eq!(read_str(&store, LevelId(1), 1).await?, Some(Value::from("C")));
    assert_eq!(read_str(&store, LevelId::BASE, 1).await?, Some(Value::from("A")));
    Ok(())
}

#[tokio::test]
async fn base_removal_deletes_every_level() -> StrataResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = open(dir.path()).await?;
    store.replace_variable(LevelId::BASE, test_entity(1, "A")).await?;
    store.create_level(LevelId(1)).await?;
    store
        .replace_variable(LevelId(1), Entity::new("Test").with_id(Id(1)).set("str", "B"))
        .await?;

    store.remove_variables(LevelId::BASE, "Test", &[Id(1)]).await?;
    for level in [LevelId::BASE, LevelId(1)] {
        let rows = store
            .get_variables(QueryInput::new("Test").at_level(level))
            .await?;
        assert!(rows.is_empty(), "entity still visible at {level}");
    }
    Ok(())
}

#[tokio::test]
async fn removing_a_level_drops_its_overlay() -> StrataResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = open(dir.path()).await?;
    store.replace_variable(LevelId::BASE, test_entity(1, "A")).await?;
    store.create_level(LevelId(1)).await?;
    store
        .replace_variable(LevelId(1), Entity::new("Test").with_id(Id(1)).set("str", "B"))
        .await?;
    store
        .replace_variable(LevelId(1), test_entity(2, "only in draft"))
        .await?;
    store.remove_variables(LevelId(1), "Test", &[Id(1)]).await?;

    store.remove_level(LevelId(1)).await?;
    assert_eq!(store.list_levels().await?.len(), 1);
    assert!(matches!(
        store.remove_level(LevelId(1)).await,
        Err(StrataError::NotFound { .. })
    ));

    store.create_level(LevelId(1)).await?;
    let rows = store
        .get_variables(QueryInput::new("Test").at_level(LevelId(1)))
        .await?;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("str"), Some(&Value::from("A")));
    Ok(())
}
