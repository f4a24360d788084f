use std::path::Path as FsPath;
use std::sync::Arc;

use strata_store::{
    ChangeBroker, Entity, EntityRef, EntityReadApi, EntityStore, EntityWriteApi, Expr,
    FieldType, GetInput, Id, LevelId, LimitsConfig, Path, QueryInput, SchemaRegistry,
    StrataConfig, StrataError, StrataResult, StructDef, TriggerDef, TriggerEvent, Value,
    catalog_registry,
};
use tempfile::tempdir;

async fn open(dir: &FsPath) -> StrataResult<EntityStore> {
    open_with(dir, catalog_registry()?, None).await
}

async fn open_with(
    dir: &FsPath,
    registry: Arc<SchemaRegistry>,
    max_cascade_depth: Option<usize>,
) -> StrataResult<EntityStore> {
    let mut config =
        StrataConfig::default_sqlite(dir.join("strata.sqlite").to_string_lossy());
    config.limits = Some(LimitsConfig {
        max_cascade_depth,
        ..LimitsConfig::with_defaults()
    });
    EntityStore::connect(&config, dir, registry, Arc::new(ChangeBroker::new())).await
}

async fn field(store: &EntityStore, struct_name: &str, id: i64, name: &str) -> StrataResult<Option<Value>> {
    let entity = store.get_variable(GetInput::new(struct_name, Id(id))).await?;
    Ok(entity.get(name).cloned())
}

#[tokio::test]
async fn product_trigger_recomputes_on_every_change() -> StrataResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = open(dir.path()).await?;
    store
        .replace_variable(
            LevelId::BASE,
            Entity::new("Test").set("u32", 59u32).set("u64", 75i64),
        )
        .await?;
    assert_eq!(field(&store, "Test", 1, "i64").await?, Some(Value::Integer(4425)));

    let changes = store
        .replace_variable(
            LevelId::BASE,
            Entity::new("Test").with_id(Id(1)).set("u32", 2u32),
        )
        .await?;
    assert!(changes.get("Test").expect("changes").updated.contains(&Id(1)));
    assert_eq!(field(&store, "Test", 1, "i64").await?, Some(Value::Integer(150)));
    assert_eq!(field(&store, "Test", 1, "u64").await?, Some(Value::Integer(75)));
    Ok(())
}

#[tokio::test]
async fn failing_check_rejects_the_write_entirely() -> StrataResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = open(dir.path()).await?;
    let err = store
        .replace_variable(
            LevelId::BASE,
            Entity::new("TestEven").set("u32", 3u32).set("u64", 4i64),
        )
        .await
        .unwrap_err();
    match err {
        StrataError::CheckViolation { field, message } => {
            assert_eq!(field, "u32");
            assert_eq!(message, "u32 must be even");
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert!(err_is_not_found(
        store.get_variable(GetInput::new("TestEven", Id(1))).await
    ));

    store
        .replace_variable(
            LevelId::BASE,
            Entity::new("TestEven").set("u32", 4u32).set("u64", 5i64),
        )
        .await?;
    assert_eq!(field(&store, "TestEven", 1, "i64").await?, Some(Value::Integer(20)));

    let err = store
        .replace_variable(
            LevelId::BASE,
            Entity::new("TestEven").with_id(Id(1)).set("u32", 7u32),
        )
        .await
        .unwrap_err();
    assert!(err.is_user_facing());
    assert_eq!(field(&store, "TestEven", 1, "u32").await?, Some(Value::Integer(4)));
    assert_eq!(field(&store, "TestEven", 1, "i64").await?, Some(Value::Integer(20)));
    Ok(())
}

fn err_is_not_found<T>(result: StrataResult<T>) -> bool {
    matches!(result, Err(StrataError::NotFound { .. }))
}

#[tokio::test]
async fn check_failing_inside_a_cascade_rolls_back_the_root_write() -> StrataResult<()> {
    let registry = SchemaRegistry::new([StructDef::new("Meter")
        .field("n", FieldType::I64)
        .field("double", FieldType::I64)
        .trigger(
            "double",
            TriggerDef::new(
                vec![TriggerEvent::AfterCreation, TriggerEvent::AfterUpdate],
                vec![Path::from("n")],
            )
            .effect("double", Expr::mul(Expr::dot("n"), Expr::int(2))),
        )
        .check(
            "bounded",
            "double",
            "double must stay below 100",
            Expr::lt(Expr::dot("double"), Expr::int(100)),
        )])?;
    let dir = tempdir().expect("tempdir");
    let store = open_with(dir.path(), Arc::new(registry), None).await?;

    store
        .replace_variable(LevelId::BASE, Entity::new("Meter").set("n", 10))
        .await?;
    let err = store
        .replace_variable(LevelId::BASE, Entity::new("Meter").with_id(Id(1)).set("n", 60))
        .await
        .unwrap_err();
    assert!(matches!(err, StrataError::CheckViolation { ref field, .. } if field == "double"));
    assert_eq!(field(&store, "Meter", 1, "n").await?, Some(Value::Integer(10)));
    assert_eq!(field(&store, "Meter", 1, "double").await?, Some(Value::Integer(20)));
    Ok(())
}

#[tokio::test]
async fn unique_mobile_is_enforced_across_users() -> StrataResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = open(dir.path()).await?;
    store
        .replace_variable(
            LevelId::BASE,
            Entity::new("User").set("name", "Ann").set("mobile", "555"),
        )
        .await?;
    let err = store
        .replace_variable(
            LevelId::BASE,
            Entity::new("User").set("name", "Bob").set("mobile", "555"),
        )
        .await
        .unwrap_err();
    match err {
        StrataError::UniquenessViolation { struct_name, fields } => {
            assert_eq!(struct_name, "User");
            assert_eq!(fields, vec!["mobile".to_string()]);
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(store.get_variables(QueryInput::new("User")).await?.len(), 1);

    store
        .replace_variable(
            LevelId::BASE,
            Entity::new("User")
                .with_id(Id(1))
                .set("name", "Ann Smith")
                .set("mobile", "555"),
        )
        .await?;
    assert_eq!(
        field(&store, "User", 1, "name").await?,
        Some(Value::from("Ann Smith"))
    );
    Ok(())
}

#[tokio::test]
async fn empty_name_is_rejected_by_the_user_check() -> StrataResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = open(dir.path()).await?;
    let err = store
        .replace_variable(LevelId::BASE, Entity::new("User").set("mobile", "1"))
        .await
        .unwrap_err();
    assert!(matches!(err, StrataError::CheckViolation { ref message, .. } if message == "name cannot be empty"));
    Ok(())
}

#[tokio::test]
async fn remote_trigger_targets_follow_the_reference() -> StrataResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = open(dir.path()).await?;
    store
        .replace_variable(LevelId::BASE, Entity::new("Product").set("name", "Bolt"))
        .await?;

    let changes = store
        .replace_variable(
            LevelId::BASE,
            Entity::new("Resource")
                .set("name", "bolts")
                .set("quantity", 40u32)
                .set("product", EntityRef::new("Product", Id(1))),
        )
        .await?;
    assert!(changes.get("Resource").expect("resource").created.contains(&Id(1)));
    assert!(changes.get("Product").expect("product").updated.contains(&Id(1)));
    assert_eq!(field(&store, "Product", 1, "stock").await?, Some(Value::Integer(40)));

    store
        .replace_variable(
            LevelId::BASE,
            Entity::new("Resource").with_id(Id(1)).set("quantity", 12u32),
        )
        .await?;
    assert_eq!(field(&store, "Product", 1, "stock").await?, Some(Value::Integer(12)));

    store
        .replace_variable(
            LevelId::BASE,
            Entity::new("Resource").set("name", "loose").set("quantity", 3u32),
        )
        .await?;
    assert_eq!(field(&store, "Product", 1, "stock").await?, Some(Value::Integer(12)));
    Ok(())
}

fn ping_pong() -> Vec<StructDef> {
    let events = vec![TriggerEvent::AfterCreation, TriggerEvent::AfterUpdate];
    vec![StructDef::new("Loop")
        .field("a", FieldType::I64)
        .field("b", FieldType::I64)
        .trigger(
            "a_to_b",
            TriggerDef::new(events.clone(), vec![Path::from("a")])
                .effect("b", Expr::add(Expr::dot("a"), Expr::int(1))),
        )
        .trigger(
            "b_to_a",
            TriggerDef::new(events, vec![Path::from("b")])
                .effect("a", Expr::add(Expr::dot("b"), Expr::int(1))),
        )]
}

#[tokio::test]
async fn trigger_cycles_are_rejected_unless_allowed() -> StrataResult<()> {
    let err = SchemaRegistry::new(ping_pong()).unwrap_err();
    assert!(matches!(err, StrataError::Schema { ref message } if message.contains("trigger cycle")));

    let registry = SchemaRegistry::builder()
        .with_structs(ping_pong())
        .allow_trigger_cycles(true)
        .build()?;
    let dir = tempdir().expect("tempdir");
    let store = open_with(dir.path(), Arc::new(registry), Some(4)).await?;
    let err = store
        .replace_variable(LevelId::BASE, Entity::new("Loop").set("a", 1))
        .await
        .unwrap_err();
    assert!(matches!(err, StrataError::CascadeLimit { depth: 4 }));
    assert!(store.get_variables(QueryInput::new("Loop")).await?.is_empty());
    Ok(())
}

fn parent_and_child() -> Vec<StructDef> {
    vec![
        StructDef::new("Parent").field("count", FieldType::I64),
        StructDef::new("Child")
            .field("a", FieldType::I64)
            .field("b", FieldType::I64)
            .field("parent", FieldType::Other("Parent".to_string()))
            .trigger(
                "double",
                TriggerDef::new(vec![TriggerEvent::BeforeUpdate], vec![Path::from("a")])
                    .effect("b", Expr::mul(Expr::dot("a"), Expr::int(2))),
            )
            .trigger(
                "release",
                TriggerDef::new(vec![TriggerEvent::BeforeDeletion], vec![Path::from("parent")])
                    .effect(
                        "parent.count",
                        Expr::sub(Expr::dot("parent.count"), Expr::int(1)),
                    ),
            ),
    ]
}

#[tokio::test]
async fn before_update_effects_fold_into_the_same_write() -> StrataResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = open_with(dir.path(), Arc::new(SchemaRegistry::new(parent_and_child())?), None)
        .await?;
    store
        .replace_variable(LevelId::BASE, Entity::new("Child").set("a", 2))
        .await?;
    assert_eq!(field(&store, "Child", 1, "b").await?, None);

    let changes = store
        .replace_variable(LevelId::BASE, Entity::new("Child").with_id(Id(1)).set("a", 4))
        .await?;
    let child = changes.get("Child").expect("child changes");
    assert!(child.updated.contains(&Id(1)));
    assert!(child.created.is_empty());
    assert_eq!(field(&store, "Child", 1, "a").await?, Some(Value::Integer(4)));
    assert_eq!(field(&store, "Child", 1, "b").await?, Some(Value::Integer(8)));

    let unchanged = store
        .replace_variable(LevelId::BASE, Entity::new("Child").with_id(Id(1)).set("a", 4))
        .await?;
    assert!(unchanged.get("Child").is_none());
    Ok(())
}

#[tokio::test]
async fn before_deletion_effects_update_the_parent() -> StrataResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = open_with(dir.path(), Arc::new(SchemaRegistry::new(parent_and_child())?), None)
        .await?;
    store
        .replace_variable(LevelId::BASE, Entity::new("Parent").set("count", 5))
        .await?;
    store
        .replace_variable(
            LevelId::BASE,
            Entity::new("Child")
                .set("a", 1)
                .set("parent", EntityRef::new("Parent", Id(1))),
        )
        .await?;
    store
        .replace_variable(LevelId::BASE, Entity::new("Child").set("a", 2))
        .await?;

    let changes = store
        .remove_variables(LevelId::BASE, "Child", &[Id(1)])
        .await?;
    assert!(changes.get("Child").expect("child changes").removed.contains(&Id(1)));
    assert!(changes.get("Parent").expect("parent changes").updated.contains(&Id(1)));
    assert_eq!(field(&store, "Parent", 1, "count").await?, Some(Value::Integer(4)));

    let orphan = store
        .remove_variables(LevelId::BASE, "Child", &[Id(2)])
        .await?;
    assert!(orphan.get("Child").expect("child changes").removed.contains(&Id(2)));
    assert!(orphan.get("Parent").is_none());
    assert_eq!(field(&store, "Parent", 1, "count").await?, Some(Value::Integer(4)));
    Ok(())
}
