use std::collections::{BTreeMap, BTreeSet};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::{
    FieldDef, FieldType, Path, PathTyper, StrataError, StrataResult, StructDef, ValueKind,
    assignable,
};

/// One reference hop of a resolved path.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hop {
    pub struct_name: String,
    pub field: String,
    pub target: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResolvedPath {
    pub path: Path,
    pub hops: Vec<Hop>,
    pub leaf_struct: String,
    pub leaf_field: String,
    pub field: FieldDef,
}

impl ResolvedPath {
    pub fn field_type(&self) -> &FieldType {
        &self.field.field_type
    }
}

/// Read-only catalog of entity types, validated once at construction.
#[derive(Clone, Debug, Default)]
pub struct SchemaRegistry {
    structs: BTreeMap<String, StructDef>,
}

#[derive(Clone, Debug, Default)]
pub struct SchemaRegistryBuilder {
    structs: Vec<StructDef>,
    allow_trigger_cycles: bool,
}

impl SchemaRegistryBuilder {
    pub fn with_struct(mut self, def: StructDef) -> Self {
        self.structs.push(def);
        self
    }

    pub fn with_structs(mut self, defs: impl IntoIterator<Item = StructDef>) -> Self {
        self.structs.extend(defs);
        self
    }

    /// Accept mutually recursive triggers; cascades are then only bounded by
    /// the store's depth limit.
    pub fn allow_trigger_cycles(mut self, allow: bool) -> Self {
        self.allow_trigger_cycles = allow;
        self
    }

    pub fn build(self) -> StrataResult<SchemaRegistry> {
        let mut structs = BTreeMap::new();
        for def in self.structs {
            check_identifier(&def.name, "struct")?;
            if structs.contains_key(&def.name) {
                return Err(StrataError::schema(format!(
                    "struct {} is defined twice",
                    def.name
                )));
            }
            structs.insert(def.name.clone(), def);
        }
        let registry = SchemaRegistry { structs };
        for def in registry.structs.values() {
            registry.validate_struct(def)?;
        }
        if !self.allow_trigger_cycles {
            registry.reject_trigger_cycles()?;
        }
        debug!("schema registry built with {} structs", registry.structs.len());
        Ok(registry)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SchemaDocument {
    Structs(Vec<StructDef>),
    Document {
        structs: Vec<StructDef>,
        #[serde(default)]
        allow_trigger_cycles: bool,
    },
}

impl SchemaRegistry {
    pub fn builder() -> SchemaRegistryBuilder {
        SchemaRegistryBuilder::default()
    }

    pub fn new(defs: impl IntoIterator<Item = StructDef>) -> StrataResult<Self> {
        Self::builder().with_structs(defs).build()
    }

    /// Accepts either an array of struct definitions or an object
    /// `{ "structs": [...], "allow_trigger_cycles": bool }`.
    pub fn from_json(raw: &str) -> StrataResult<Self> {
        let document: SchemaDocument = serde_json::from_str(raw)
            .map_err(|err| StrataError::schema(format!("invalid schema json: {err}")))?;
        match document {
            SchemaDocument::Structs(structs) => Self::new(structs),
            SchemaDocument::Document {
                structs,
                allow_trigger_cycles,
            } => Self::builder()
                .with_structs(structs)
                .allow_trigger_cycles(allow_trigger_cycles)
                .build(),
        }
    }

    pub fn get_struct(&self, name: &str) -> StrataResult<&StructDef> {
        self.structs
            .get(name)
            .ok_or_else(|| StrataError::not_found(format!("struct {name}")))
    }

    pub fn get_structs(&self) -> impl Iterator<Item = &StructDef> {
        self.structs.values()
    }

    pub fn field(&self, struct_name: &str, field: &str) -> StrataResult<&FieldDef> {
        self.get_struct(struct_name)?
            .field_def(field)
            .ok_or_else(|| StrataError::invalid(format!("unknown field {struct_name}.{field}")))
    }

    pub fn resolve_path(&self, struct_name: &str, path: &Path) -> StrataResult<ResolvedPath> {
        let segments = path.segments();
        let Some((leaf, hop_fields)) = segments.split_last() else {
            return Err(StrataError::invalid(format!("empty path on {struct_name}")));
        };
        let mut current = struct_name.to_string();
        let mut hops = Vec::with_capacity(hop_fields.len());
        for field in hop_fields {
            let def = self.field(&current, field)?;
            let Some(target) = def.field_type.target() else {
                return Err(StrataError::invalid(format!(
                    "{current}.{field} is not a reference and cannot be traversed in {path}"
                )));
            };
            hops.push(Hop {
                struct_name: current.clone(),
                field: field.clone(),
                target: target.to_string(),
            });
            current = target.to_string();
        }
        let field = self.field(&current, leaf)?.clone();
        Ok(ResolvedPath {
            path: path.clone(),
            hops,
            leaf_struct: current,
            leaf_field: leaf.clone(),
            field,
        })
    }

    /// Paths read by the struct's triggers and checks, including monitored
    /// paths and the hop prefixes of trigger targets.
    pub fn dependency_paths(&self, struct_name: &str) -> StrataResult<Vec<Path>> {
        let def = self.get_struct(struct_name)?;
        let mut paths = BTreeSet::new();
        for trigger in def.triggers.values() {
            paths.extend(trigger.monitor.iter().cloned());
            for effect in &trigger.effects {
                paths.extend(effect.expr.paths());
                if let Some(prefix) = effect.target.prefix() {
                    paths.insert(prefix);
                }
            }
        }
        for check in def.checks.values() {
            paths.extend(check.expr.paths());
        }
        Ok(paths.into_iter().collect())
    }

    pub fn typer<'a>(&'a self, struct_name: &'a str) -> StructTyper<'a> {
        StructTyper {
            registry: self,
            struct_name,
        }
    }

    fn validate_struct(&self, def: &StructDef) -> StrataResult<()> {
        let context = |err: StrataError| StrataError::schema(format!("{}: {err}", def.name));
        for (name, field) in &def.fields {
            check_identifier(name, "field")?;
            if let Some(target) = field.field_type.target() {
                if !self.structs.contains_key(target) {
                    return Err(StrataError::schema(format!(
                        "{}.{name} references unknown struct {target}",
                        def.name
                    )));
                }
                if field.default.is_some() {
                    return Err(StrataError::schema(format!(
                        "{}.{name} is a reference and cannot declare a default",
                        def.name
                    )));
                }
            }
            if let Some(default) = &field.default {
                field.field_type.coerce(default.clone()).map_err(context)?;
            }
        }
        for constraint in &def.unique {
            if constraint.paths.is_empty() {
                return Err(StrataError::schema(format!(
                    "{}: unique constraint {} has no paths",
                    def.name, constraint.name
                )));
            }
            for path in &constraint.paths {
                self.resolve_path(&def.name, path).map_err(context)?;
            }
        }
        for (owner, access) in &def.permissions.ownership {
            let resolved = self.resolve_path(&def.name, owner).map_err(context)?;
            if !resolved.field_type().is_other() {
                return Err(StrataError::schema(format!(
                    "{}: owner path {owner} does not end in a reference",
                    def.name
                )));
            }
            for field in access.read.iter().chain(&access.write) {
                self.field(&def.name, field).map_err(context)?;
            }
        }
        for field in &def.permissions.public {
            self.field(&def.name, field).map_err(context)?;
        }
        let typer = self.typer(&def.name);
        for (name, trigger) in &def.triggers {
            if trigger.events.is_empty() || trigger.effects.is_empty() {
                return Err(StrataError::schema(format!(
                    "{}: trigger {name} needs at least one event and one effect",
                    def.name
                )));
            }
            for path in &trigger.monitor {
                self.resolve_path(&def.name, path).map_err(context)?;
            }
            for effect in &trigger.effects {
                let target = self.resolve_path(&def.name, &effect.target).map_err(context)?;
                let kind = effect.expr.infer(&typer).map_err(context)?;
                if !assignable(kind, target.field_type()) {
                    return Err(StrataError::schema(format!(
                        "{}: trigger {name} assigns {kind:?} to {} of type {:?}",
                        def.name,
                        effect.target,
                        target.field_type()
                    )));
                }
            }
        }
        for (name, check) in &def.checks {
            self.field(&def.name, &check.field).map_err(context)?;
            let kind = check.expr.infer(&typer).map_err(context)?;
            if kind != ValueKind::Boolean {
                return Err(StrataError::schema(format!(
                    "{}: check {name} evaluates to {kind:?}, expected Boolean",
                    def.name
                )));
            }
        }
        Ok(())
    }

    /// Trigger `a` feeds trigger `b` when one of `a`'s effects writes a field
    /// that is the first segment of a path `b` monitors on the same struct.
    fn trigger_edges(&self) -> StrataResult<BTreeMap<TriggerNode, Vec<TriggerNode>>> {
        let mut edges = BTreeMap::new();
        for def in self.structs.values() {
            for (name, trigger) in &def.triggers {
                let mut next = Vec::new();
                for effect in &trigger.effects {
                    let target = self.resolve_path(&def.name, &effect.target)?;
                    let Some(target_def) = self.structs.get(&target.leaf_struct) else {
                        continue;
                    };
                    for (other_name, other) in &target_def.triggers {
                        let monitored = other
                            .monitor
                            .iter()
                            .any(|path| path.first() == Some(target.leaf_field.as_str()));
                        let node = (target_def.name.clone(), other_name.clone());
                        if monitored && !next.contains(&node) {
                            next.push(node);
                        }
                    }
                }
                edges.insert((def.name.clone(), name.clone()), next);
            }
        }
        Ok(edges)
    }

    fn reject_trigger_cycles(&self) -> StrataResult<()> {
        let edges = self.trigger_edges()?;
        let mut state: BTreeMap<&TriggerNode, Mark> = BTreeMap::new();
        for start in edges.keys() {
            let mut stack = Vec::new();
            if let Some(cycle) = visit(start, &edges, &mut state, &mut stack) {
                let names: Vec<String> = cycle
                    .iter()
                    .map(|(struct_name, trigger)| format!("{struct_name}.{trigger}"))
                    .collect();
                return Err(StrataError::schema(format!(
                    "trigger cycle: {}",
                    names.join(" -> ")
                )));
            }
        }
        Ok(())
    }
}

type TriggerNode = (String, String);

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

fn visit<'a>(
    node: &'a TriggerNode,
    edges: &'a BTreeMap<TriggerNode, Vec<TriggerNode>>,
    state: &mut BTreeMap<&'a TriggerNode, Mark>,
    stack: &mut Vec<&'a TriggerNode>,
) -> Option<Vec<TriggerNode>> {
    match state.get(node) {
        Some(Mark::Done) => return None,
        Some(Mark::Visiting) => {
            let start = stack.iter().position(|entry| *entry == node).unwrap_or(0);
            let mut cycle: Vec<TriggerNode> = stack[start..].iter().map(|n| (*n).clone()).collect();
            cycle.push(node.clone());
            return Some(cycle);
        }
        None => {}
    }
    state.insert(node, Mark::Visiting);
    stack.push(node);
    for next in edges.get(node).into_iter().flatten() {
        if let Some(cycle) = visit(next, edges, state, stack) {
            return Some(cycle);
        }
    }
    stack.pop();
    state.insert(node, Mark::Done);
    None
}

fn check_identifier(name: &str, what: &str) -> StrataResult<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(StrataError::schema(format!("invalid {what} name '{name}'")))
    }
}

/// Types paths relative to one struct.
pub struct StructTyper<'a> {
    registry: &'a SchemaRegistry,
    struct_name: &'a str,
}

impl PathTyper for StructTyper<'_> {
    fn path_type(&self, path: &Path) -> StrataResult<FieldType> {
        self.registry
            .resolve_path(self.struct_name, path)
            .map(|resolved| resolved.field.field_type)
    }
}

#[cfg(test)]
mod tests {
    use super::SchemaRegistry;
    use crate::{Expr, FieldType, Path, StrataError, StructDef, TriggerDef, TriggerEvent};

    fn user() -> StructDef {
        StructDef::new("User").field("mobile", FieldType::Str)
    }

    fn alliance() -> StructDef {
        StructDef::new("Alliance")
            .field("name", FieldType::Str)
            .field("owner", FieldType::Other("User".to_string()))
            .field("members", FieldType::U32)
    }

    #[test]
    fn resolves_multi_hop_paths() {
        let registry = SchemaRegistry::new([user(), alliance()]).expect("registry");
        let resolved = registry
            .resolve_path("Alliance", &Path::parse("owner.mobile"))
            .expect("resolve");
        assert_eq!(resolved.hops.len(), 1);
        assert_eq!(resolved.hops[0].target, "User");
        assert_eq!(resolved.leaf_struct, "User");
        assert_eq!(resolved.field_type(), &FieldType::Str);
        assert!(
            registry
                .resolve_path("Alliance", &Path::parse("name.mobile"))
                .is_err()
        );
    }

    #[test]
    fn rejects_dangling_references() {
        let err = SchemaRegistry::new([alliance()]).expect_err("dangling");
        assert!(matches!(err, StrataError::Schema { .. }));
    }

    #[test]
    fn rejects_ill_typed_checks() {
        let def = user().check("mobile_check", "mobile", "bad", Expr::dot("mobile"));
        let err = SchemaRegistry::new([def]).expect_err("ill typed");
        assert!(matches!(err, StrataError::Schema { .. }));
    }

    #[test]
    fn rejects_trigger_cycles_unless_allowed() {
        let looping = StructDef::new("Counter")
            .field("a", FieldType::I64)
            .field("b", FieldType::I64)
            .trigger(
                "a_to_b",
                TriggerDef::new(vec![TriggerEvent::AfterUpdate], vec![Path::parse("a")])
                    .effect("b", Expr::add(Expr::dot("a"), Expr::int(1))),
            )
            .trigger(
                "b_to_a",
                TriggerDef::new(vec![TriggerEvent::AfterUpdate], vec![Path::parse("b")])
                    .effect("a", Expr::add(Expr::dot("b"), Expr::int(1))),
            );
        let err = SchemaRegistry::new([looping.clone()]).expect_err("cycle");
        assert!(err.to_string().contains("trigger cycle"));
        let registry = SchemaRegistry::builder()
            .with_struct(looping)
            .allow_trigger_cycles(true)
            .build();
        assert!(registry.is_ok());
    }

    #[test]
    fn dependency_paths_cover_triggers_and_checks() {
        let def = alliance()
            .trigger(
                "count",
                TriggerDef::new(vec![TriggerEvent::AfterCreation], vec![Path::parse("name")])
                    .effect("members", Expr::int(1)),
            )
            .check(
                "owner_mobile",
                "owner",
                "owner needs a mobile",
                Expr::ne(Expr::dot("owner.mobile"), Expr::text("")),
            );
        let registry = SchemaRegistry::new([user(), def]).expect("registry");
        let paths = registry.dependency_paths("Alliance").expect("paths");
        assert!(paths.contains(&Path::parse("name")));
        assert!(paths.contains(&Path::parse("owner.mobile")));
    }

    #[test]
    fn loads_from_json() {
        let registry = SchemaRegistry::from_json(
            r#"[{"name":"User","fields":{"mobile":{"type":"str"}},
                 "unique":[{"name":"mobile","paths":["mobile"]}]}]"#,
        )
        .expect("registry");
        let user = registry.get_struct("User").expect("user");
        assert_eq!(user.unique[0].paths, vec![Path::parse("mobile")]);
        assert!(registry.get_struct("Nope").is_err());
    }
}
