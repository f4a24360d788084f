use std::collections::BTreeSet;

use strata_core::{
    Image, Path, ResolvedPath, SchemaRegistry, StrataError, StrataResult, StructDef, TriggerDef,
    TriggerEvent, Value,
};

/// One computed trigger assignment, ready to be written.
#[derive(Clone, Debug)]
pub(crate) struct Assignment {
    pub trigger: String,
    pub target: Path,
    pub value: Value,
}

/// Every path an image of `def` has to carry: trigger and check inputs plus
/// unique paths.
pub(crate) fn image_paths(registry: &SchemaRegistry, def: &StructDef) -> StrataResult<Vec<Path>> {
    let mut paths: BTreeSet<Path> = registry.dependency_paths(&def.name)?.into_iter().collect();
    for constraint in &def.unique {
        paths.extend(constraint.paths.iter().cloned());
    }
    Ok(paths.into_iter().collect())
}

/// Triggers of `def` fired by `event`, in name order. Deletion triggers fire
/// when a monitored path is set before the delete; the others fire when a
/// monitored path differs between the two images.
pub(crate) fn fired_triggers<'d>(
    def: &'d StructDef,
    event: TriggerEvent,
    pre: &Image,
    post: &Image,
) -> Vec<(&'d str, &'d TriggerDef)> {
    def.triggers
        .iter()
        .filter(|(_, trigger)| trigger.fires_on(event))
        .filter(|(_, trigger)| {
            trigger.monitor.iter().any(|path| match event {
                TriggerEvent::BeforeDeletion => pre.get(path).is_some(),
                _ => pre.differs(post, path),
            })
        })
        .map(|(name, trigger)| (name.as_str(), trigger))
        .collect()
}

/// Evaluates every effect of the fired triggers against `image` before any of
/// them is applied.
pub(crate) fn evaluate_effects(
    registry: &SchemaRegistry,
    def: &StructDef,
    fired: &[(&str, &TriggerDef)],
    image: &Image,
) -> StrataResult<Vec<Assignment>> {
    let mut assignments = Vec::new();
    for (name, trigger) in fired {
        for effect in &trigger.effects {
            let resolved: ResolvedPath = registry.resolve_path(&def.name, &effect.target)?;
            let value = effect
                .expr
                .eval(image)?
                .into_value(resolved.field_type())?;
            assignments.push(Assignment {
                trigger: name.to_string(),
                target: effect.target.clone(),
                value,
            });
        }
    }
    Ok(assignments)
}

/// Runs every check of `def` on the post-write image.
pub(crate) fn run_checks(def: &StructDef, image: &Image) -> StrataResult<()> {
    for check in def.checks.values() {
        if !check.expr.eval(image)?.as_bool()? {
            return Err(StrataError::check(check.field.clone(), check.message.clone()));
        }
    }
    Ok(())
}
