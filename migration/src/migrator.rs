use sea_orm_migration::prelude::*;

use crate::migrations;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(migrations::m202607140001_create_attempts::Migration),
            Box::new(migrations::m202607140002_create_attempt_answers::Migration),
            Box::new(migrations::m202607140003_create_speaking_submissions::Migration),
            Box::new(migrations::m202607140004_create_writing_submissions::Migration),
            Box::new(migrations::m202607140005_create_grading_jobs::Migration),
        ]
    }
}
