use sea_orm::DeriveIden;

#[derive(DeriveIden, Clone, Copy)]
pub enum Levels {
    Table,
    Id,
    Active,
    CreatedAt,
}

#[derive(DeriveIden, Clone, Copy)]
pub enum Vars {
    Table,
    Level,
    StructName,
    Id,
    Active,
    CreatedAt,
    UpdatedAt,
    RequestedAt,
}

#[derive(DeriveIden, Clone, Copy)]
pub enum Vals {
    Table,
    Level,
    StructName,
    VariableId,
    FieldName,
    FieldStructName,
    ValueText,
    ValueInteger,
    ValueReal,
}

#[derive(DeriveIden, Clone, Copy)]
pub enum RemovedVars {
    Table,
    Level,
    StructName,
    Id,
}

#[derive(DeriveIden, Clone, Copy)]
pub enum Params {
    Table,
    Name,
    Value,
}

#[derive(DeriveIden, Clone, Copy)]
pub enum Counters {
    Table,
    StructName,
    NextId,
}

/// Physical names used by the hand-rendered entity query.
pub mod names {
    pub const LEVELS: &str = "levels";
    pub const VARS: &str = "vars";
    pub const VALS: &str = "vals";
    pub const REMOVED_VARS: &str = "removed_vars";

    pub const LEVEL: &str = "level";
    pub const STRUCT_NAME: &str = "struct_name";
    pub const ID: &str = "id";
    pub const ACTIVE: &str = "active";
    pub const CREATED_AT: &str = "created_at";
    pub const UPDATED_AT: &str = "updated_at";
    pub const REQUESTED_AT: &str = "requested_at";
    pub const VARIABLE_ID: &str = "variable_id";
    pub const FIELD_NAME: &str = "field_name";
    pub const FIELD_STRUCT_NAME: &str = "field_struct_name";
    pub const VALUE_TEXT: &str = "value_text";
    pub const VALUE_INTEGER: &str = "value_integer";
    pub const VALUE_REAL: &str = "value_real";
}
