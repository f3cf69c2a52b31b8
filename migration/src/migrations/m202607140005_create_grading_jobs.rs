use sea_orm_migration::prelude::*;

pub struct Migration;

impl MigrationName for Migration {
    fn name(&self) -> &str {
        "m202607140005_create_grading_jobs"
    }
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Alias::new("grading_jobs"))
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Alias::new("id"))
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    // The at-most-once gate: concurrent deliveries of the same
                    // event race on this constraint and exactly one insert wins.
                    .col(
                        ColumnDef::new(Alias::new("event_id"))
                            .string()
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(Alias::new("provider")).string().not_null())
                    .col(ColumnDef::new(Alias::new("model")).string().not_null())
                    .col(
                        ColumnDef::new(Alias::new("attempt_id"))
                            .integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Alias::new("quiz_id")).integer().not_null())
                    .col(ColumnDef::new(Alias::new("user_id")).integer().not_null())
                    .col(
                        ColumnDef::new(Alias::new("submission_kind"))
                            .string()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Alias::new("submission_id")).integer())
                    .col(
                        ColumnDef::new(Alias::new("status"))
                            .string()
                            .not_null()
                            .default("pending"),
                    )
                    .col(
                        ColumnDef::new(Alias::new("signature_valid"))
                            .boolean()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Alias::new("raw_payload"))
                            .text()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Alias::new("reject_reason")).string())
                    .col(
                        ColumnDef::new(Alias::new("received_at"))
                            .timestamp()
                            .not_null()
                            .default(Expr::cust("CURRENT_TIMESTAMP")),
                    )
                    .col(ColumnDef::new(Alias::new("applied_at")).timestamp())
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Alias::new("grading_jobs")).to_owned())
            .await
    }
}
