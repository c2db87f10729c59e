use migration::entities::{data_url, user};

use crate::storage::models::{UrlRecord, UserRecord};

pub fn model_to_url_record(model: data_url::Model) -> UrlRecord {
    UrlRecord {
        id: model.correlation_id,
        short_key: model.short_url,
        original_url: model.original_url,
        owner_id: model.user_id.filter(|u| !u.is_empty()),
        deleted: model.is_deleted,
    }
}

/// 新记录的 ActiveModel，`id` 须已分配
pub fn url_record_to_active_model(record: &UrlRecord) -> data_url::ActiveModel {
    use sea_orm::ActiveValue::Set;

    data_url::ActiveModel {
        correlation_id: Set(record.id.clone()),
        short_url: Set(record.short_key.clone()),
        original_url: Set(record.original_url.clone()),
        user_id: Set(record.owner_id.clone()),
        is_deleted: Set(record.deleted),
    }
}

pub fn model_to_user_record(model: user::Model) -> UserRecord {
    UserRecord {
        id: model.id,
        email: model.email,
        password_hash: model.hash,
        display_name: model.name,
    }
}

pub fn user_record_to_active_model(record: &UserRecord) -> user::ActiveModel {
    use sea_orm::ActiveValue::Set;

    user::ActiveModel {
        id: Set(record.id.clone()),
        email: Set(record.email.clone()),
        hash: Set(record.password_hash.clone()),
        name: Set(record.display_name.clone()),
    }
}
