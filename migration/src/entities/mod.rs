pub mod data_url;
pub mod user;

pub use data_url::Entity as DataUrlEntity;
pub use user::Entity as UserEntity;
