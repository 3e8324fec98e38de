pub use sea_orm_migration::prelude::*;

mod m20261015_120000_create_identity_tables;
mod m20261015_130000_create_session_tables;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20261015_120000_create_identity_tables::Migration),
            Box::new(m20261015_130000_create_session_tables::Migration),
        ]
    }
}
