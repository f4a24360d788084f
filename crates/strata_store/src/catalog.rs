use std::sync::Arc;

use once_cell::sync::Lazy;

use strata_core::{SchemaRegistry, StrataError, StrataResult};

static CATALOG: Lazy<Result<Arc<SchemaRegistry>, String>> = Lazy::new(|| {
    SchemaRegistry::from_json(catalog_json())
        .map(Arc::new)
        .map_err(|err| err.to_string())
});

pub fn catalog_json() -> &'static str {
    include_str!(concat!(env!("OUT_DIR"), "/catalog.json"))
}

/// The bundled business schema, parsed and validated once per process.
pub fn catalog_registry() -> StrataResult<Arc<SchemaRegistry>> {
    CATALOG
        .as_ref()
        .map(Arc::clone)
        .map_err(|err| StrataError::schema(format!("catalog: {err}")))
}

#[cfg(test)]
mod tests {
    use strata_core::{FieldType, Path, StrataResult, TriggerEvent};

    use super::catalog_registry;

    #[test]
    fn catalog_parses_and_validates() -> StrataResult<()> {
        let registry = catalog_registry()?;
        let names: Vec<&str> = registry.get_structs().map(|def| def.name.as_str()).collect();
        for expected in ["Alliance", "Product", "Resource", "Service", "Test", "TestEven", "User"] {
            assert!(names.contains(&expected), "missing {expected}");
        }
        Ok(())
    }

    #[test]
    fn test_struct_carries_the_product_trigger() -> StrataResult<()> {
        let registry = catalog_registry()?;
        let test = registry.get_struct("Test")?;
        let trigger = &test.triggers["product"];
        assert!(trigger.fires_on(TriggerEvent::AfterCreation));
        assert!(trigger.fires_on(TriggerEvent::AfterUpdate));
        assert_eq!(trigger.effects[0].target, Path::from("i64"));
        assert!(test.checks.is_empty());
        assert_eq!(registry.get_struct("TestEven")?.checks.len(), 1);
        Ok(())
    }

    #[test]
    fn ownership_paths_resolve_through_references() -> StrataResult<()> {
        let registry = catalog_registry()?;
        let product = registry.get_struct("Product")?;
        let owner = Path::parse("alliance.owner");
        assert_eq!(product.permissions.readable_by(&owner), vec!["name", "price", "stock"]);
        assert!(product.permissions.is_public("price"));
        let resolved = registry.resolve_path("Product", &owner)?;
        assert_eq!(resolved.field_type(), &FieldType::Other("User".to_string()));
        assert_eq!(resolved.hops.len(), 1);
        Ok(())
    }
}
