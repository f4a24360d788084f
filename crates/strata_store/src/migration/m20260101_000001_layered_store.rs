use sea_orm_migration::prelude::*;
use sea_orm_migration::sea_orm::{ConnectionTrait, DatabaseBackend, Statement};
use sea_orm_migration::sea_query::{
    PostgresQueryBuilder, QueryStatementWriter, SqliteQueryBuilder,
};

use crate::db::*;
use strata_core::Timestamp;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let backend = manager.get_database_backend();

        manager
            .create_table(
                Table::create()
                    .table(Levels::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Levels::Id).big_integer().not_null())
                    .col(ColumnDef::new(Levels::Active).small_integer().not_null())
                    .col(ColumnDef::new(Levels::CreatedAt).big_integer().not_null())
                    .primary_key(Index::create().name("pk_levels").col(Levels::Id))
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Vars::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Vars::Level).big_integer().not_null())
                    .col(ColumnDef::new(Vars::StructName).string().not_null())
                    .col(ColumnDef::new(Vars::Id).big_integer().not_null())
                    .col(ColumnDef::new(Vars::Active).small_integer().not_null())
                    .col(ColumnDef::new(Vars::CreatedAt).big_integer().not_null())
                    .col(ColumnDef::new(Vars::UpdatedAt).big_integer().not_null())
                    .col(ColumnDef::new(Vars::RequestedAt).big_integer().not_null())
                    .primary_key(
                        Index::create()
                            .name("pk_vars")
                            .col(Vars::Level)
                            .col(Vars::StructName)
                            .col(Vars::Id),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_vars_level")
                            .from(Vars::Table, Vars::Level)
                            .to(Levels::Table, Levels::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Vals::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Vals::Level).big_integer().not_null())
                    .col(ColumnDef::new(Vals::StructName).string().not_null())
                    .col(ColumnDef::new(Vals::VariableId).big_integer().not_null())
                    .col(ColumnDef::new(Vals::FieldName).string().not_null())
                    .col(ColumnDef::new(Vals::FieldStructName).string().null())
                    .col(ColumnDef::new(Vals::ValueText).text().null())
                    .col(ColumnDef::new(Vals::ValueInteger).big_integer().null())
                    .col(ColumnDef::new(Vals::ValueReal).double().null())
                    .primary_key(
                        Index::create()
                            .name("pk_vals")
                            .col(Vals::Level)
                            .col(Vals::StructName)
                            .col(Vals::VariableId)
                            .col(Vals::FieldName),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_vals_var")
                            .from(
                                Vals::Table,
                                (Vals::Level, Vals::StructName, Vals::VariableId),
                            )
                            .to(Vars::Table, (Vars::Level, Vars::StructName, Vars::Id))
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .check(Expr::cust(
                        "(CASE WHEN value_text IS NULL THEN 0 ELSE 1 END \
                         + CASE WHEN value_integer IS NULL THEN 0 ELSE 1 END \
                         + CASE WHEN value_real IS NULL THEN 0 ELSE 1 END) = 1",
                    ))
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(RemovedVars::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(RemovedVars::Level).big_integer().not_null())
                    .col(ColumnDef::new(RemovedVars::StructName).string().not_null())
                    .col(ColumnDef::new(RemovedVars::Id).big_integer().not_null())
                    .primary_key(
                        Index::create()
                            .name("pk_removed_vars")
                            .col(RemovedVars::Level)
                            .col(RemovedVars::StructName)
                            .col(RemovedVars::Id),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_removed_vars_level")
                            .from(RemovedVars::Table, RemovedVars::Level)
                            .to(Levels::Table, Levels::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Params::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Params::Name).string().not_null())
                    .col(ColumnDef::new(Params::Value).text().not_null())
                    .primary_key(Index::create().name("pk_params").col(Params::Name))
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Counters::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Counters::StructName).string().not_null())
                    .col(ColumnDef::new(Counters::NextId).big_integer().not_null())
                    .primary_key(
                        Index::create()
                            .name("pk_counters")
                            .col(Counters::StructName),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_vars_struct_id")
                    .table(Vars::Table)
                    .col(Vars::StructName)
                    .col(Vars::Id)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_vals_variable_field")
                    .table(Vals::Table)
                    .col(Vals::StructName)
                    .col(Vals::VariableId)
                    .col(Vals::FieldName)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_removed_vars_struct_id")
                    .table(RemovedVars::Table)
                    .col(RemovedVars::StructName)
                    .col(RemovedVars::Id)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        let seed_base_level = Query::insert()
            .into_table(Levels::Table)
            .columns([Levels::Id, Levels::Active, Levels::CreatedAt])
            .values_panic([
                0i64.into(),
                1i16.into(),
                Timestamp::now().as_millis().into(),
            ])
            .on_conflict(OnConflict::column(Levels::Id).do_nothing().to_owned())
            .to_owned();
        let (sql, values) = build_stmt(backend, &seed_base_level);
        manager
            .get_connection()
            .execute(Statement::from_sql_and_values(backend, sql, values))
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Counters::Table).if_exists().to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Params::Table).if_exists().to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(RemovedVars::Table).if_exists().to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Vals::Table).if_exists().to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Vars::Table).if_exists().to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Levels::Table).if_exists().to_owned())
            .await?;
        Ok(())
    }
}

fn build_stmt<S: QueryStatementWriter>(
    backend: DatabaseBackend,
    stmt: &S,
) -> (String, sea_orm_migration::sea_query::Values) {
    match backend {
        DatabaseBackend::Postgres => stmt.build(PostgresQueryBuilder),
        _ => stmt.build(SqliteQueryBuilder),
    }
}
