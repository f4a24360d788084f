use std::collections::BTreeMap;

use crate::{ExprValue, FieldDef, Path, PathLookup, StrataError, StrataResult, Value};

#[derive(Clone, Debug, PartialEq)]
struct Slot {
    field: FieldDef,
    value: Option<Value>,
}

/// Values of a fixed set of paths relative to one entity, as seen before or
/// after a write. Unset paths evaluate to the field's fallback.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Image {
    slots: BTreeMap<Path, Slot>,
}

impl Image {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: Path, field: FieldDef, value: Option<Value>) {
        self.slots.insert(path, Slot { field, value });
    }

    pub fn set(&mut self, path: &Path, value: Option<Value>) {
        if let Some(slot) = self.slots.get_mut(path) {
            slot.value = value;
        }
    }

    pub fn get(&self, path: &Path) -> Option<&Value> {
        self.slots.get(path).and_then(|slot| slot.value.as_ref())
    }

    /// Whether the value at `path` differs from `other`'s. Paths missing from
    /// either side count as unset.
    pub fn differs(&self, other: &Image, path: &Path) -> bool {
        match (self.get(path), other.get(path)) {
            (Some(left), Some(right)) => !left.same_as(right),
            (None, None) => false,
            _ => true,
        }
    }
}

impl PathLookup for Image {
    fn lookup(&self, path: &Path) -> StrataResult<ExprValue> {
        let slot = self
            .slots
            .get(path)
            .ok_or_else(|| StrataError::evaluation(format!("path {path} was not loaded")))?;
        match &slot.value {
            Some(value) => ExprValue::from_value(value),
            None => match slot.field.fallback() {
                Some(value) => ExprValue::from_value(&value),
                None => Err(StrataError::type_mismatch(format!(
                    "path {path} is a reference"
                ))),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Image;
    use crate::{ExprValue, FieldDef, FieldType, Path, PathLookup, Value};

    #[test]
    fn unset_paths_fall_back_to_defaults() {
        let mut image = Image::new();
        image.insert(Path::parse("u32"), FieldDef::new(FieldType::U32), None);
        image.insert(
            Path::parse("str"),
            FieldDef {
                field_type: FieldType::Str,
                default: Some(Value::Text("x".to_string())),
            },
            None,
        );
        assert_eq!(
            image.lookup(&Path::parse("u32")).expect("lookup"),
            ExprValue::Integer(0)
        );
        assert_eq!(
            image.lookup(&Path::parse("str")).expect("lookup"),
            ExprValue::Text("x".to_string())
        );
        assert!(image.lookup(&Path::parse("missing")).is_err());
    }

    #[test]
    fn detects_changed_paths() {
        let path = Path::parse("u32");
        let mut before = Image::new();
        before.insert(path.clone(), FieldDef::new(FieldType::U32), None);
        let mut after = before.clone();
        assert!(!before.differs(&after, &path));
        after.set(&path, Some(Value::Integer(2)));
        assert!(before.differs(&after, &path));
    }
}
