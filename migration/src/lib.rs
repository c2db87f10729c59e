pub use sea_orm_migration::prelude::*;

pub mod entities;
mod m20240301_000001_create_dataurl;
mod m20240301_000002_create_users;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240301_000001_create_dataurl::Migration),
            Box::new(m20240301_000002_create_users::Migration),
        ]
    }
}
