use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "dataurl")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub correlation_id: String,
    #[sea_orm(unique)]
    pub short_url: String,
    #[sea_orm(unique)]
    pub original_url: String,
    pub user_id: Option<String>,
    pub is_deleted: bool,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
