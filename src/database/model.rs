use chrono::Utc;
use diesel::prelude::*;
use serde::Deserialize;

use crate::controller::BaseError;
use crate::database::{get_connection, DbResult};
use crate::{db_execute, db_object};

db_object! {
    #[derive(Queryable, Selectable, Identifiable, AsChangeset)]
    #[diesel(table_name = model)]
    pub struct Model {
        pub id: i64,
        pub provider_id: i64,
        pub name: String,
        pub is_enabled: bool,
        pub created_at: i64,
        pub updated_at: i64,
        pub deleted_at: Option<i64>,
    }

    #[derive(Insertable, Deserialize, Debug)]
    #[diesel(table_name = model)]
    pub struct NewModel {
        pub id: i64,
        pub provider_id: i64,
        pub name: String,
        pub is_enabled: bool,
        pub created_at: i64,
        pub updated_at: i64,
    }
}

impl Model {
    pub fn create(new_model_data: &NewModel) -> DbResult<Model> {
        let conn = &mut get_connection();
        db_execute!(conn, {
            let db_model = diesel::insert_into(model::table)
                .values(NewModelDb::to_db(new_model_data))
                .returning(ModelDb::as_returning())
                .get_result::<ModelDb>(conn)
                .map_err(|e| BaseError::DatabaseFatal(Some(format!("Failed to insert model: {}", e))))?;
            Ok(db_model.from_db())
        })
    }

    /// Retrieves the dispatchable model for (name, provider). A disabled or
    /// soft-deleted model is a miss, exactly like a disabled provider.
    pub fn get_active_by_name(name_val: &str, provider_id_val: i64) -> DbResult<Option<Model>> {
        let conn = &mut get_connection();
        db_execute!(conn, {
            let db_model_opt = model::table
                .filter(
                    model::dsl::name
                        .eq(name_val)
                        .and(model::dsl::provider_id.eq(provider_id_val))
                        .and(model::dsl::is_enabled.eq(true))
                        .and(model::dsl::deleted_at.is_null()),
                )
                .select(ModelDb::as_select())
                .first::<ModelDb>(conn)
                .optional()
                .map_err(|e| {
                    BaseError::DatabaseFatal(Some(format!(
                        "Error fetching model '{}' for provider {}: {}",
                        name_val, provider_id_val, e
                    )))
                })?;
            Ok(db_model_opt.map(|m| m.from_db()))
        })
    }

    pub fn get_by_id(target_id: i64) -> DbResult<Model> {
        let conn = &mut get_connection();
        db_execute!(conn, {
            let db_model = model::table
                .filter(
                    model::dsl::id
                        .eq(target_id)
                        .and(model::dsl::deleted_at.is_null()),
                )
                .select(ModelDb::as_select())
                .first::<ModelDb>(conn)
                .map_err(|e| match e {
                    diesel::result::Error::NotFound => {
                        BaseError::NotFound(Some(format!("Model with id {} not found", target_id)))
                    }
                    _ => BaseError::DatabaseFatal(Some(format!(
                        "Error fetching model {}: {}",
                        target_id, e
                    ))),
                })?;
            Ok(db_model.from_db())
        })
    }

    pub fn list_all() -> DbResult<Vec<Model>> {
        let conn = &mut get_connection();
        db_execute!(conn, {
            let db_models = model::table
                .filter(model::dsl::deleted_at.is_null())
                .order(model::dsl::created_at.desc())
                .select(ModelDb::as_select())
                .load::<ModelDb>(conn)
                .map_err(|e| BaseError::DatabaseFatal(Some(format!("Failed to list models: {}", e))))?;
            Ok(db_models.into_iter().map(|m| m.from_db()).collect())
        })
    }

    pub fn list_by_provider_id(p_id: i64) -> DbResult<Vec<Model>> {
        let conn = &mut get_connection();
        db_execute!(conn, {
            let db_models = model::table
                .filter(
                    model::dsl::provider_id
                        .eq(p_id)
                        .and(model::dsl::deleted_at.is_null()),
                )
                .order(model::dsl::created_at.desc())
                .select(ModelDb::as_select())
                .load::<ModelDb>(conn)
                .map_err(|e| {
                    BaseError::DatabaseFatal(Some(format!(
                        "Failed to list models for provider {}: {}",
                        p_id, e
                    )))
                })?;
            Ok(db_models.into_iter().map(|m| m.from_db()).collect())
        })
    }

    pub fn soft_delete(target_id: i64) -> DbResult<usize> {
        let conn = &mut get_connection();
        let current_time = Utc::now().timestamp_millis();
        db_execute!(conn, {
            let affected = diesel::update(
                model::table.filter(
                    model::dsl::id
                        .eq(target_id)
                        .and(model::dsl::deleted_at.is_null()),
                ),
            )
            .set((
                model::dsl::deleted_at.eq(current_time),
                model::dsl::is_enabled.eq(false),
                model::dsl::updated_at.eq(current_time),
            ))
            .execute(conn)
            .map_err(|e| {
                BaseError::DatabaseFatal(Some(format!("Failed to delete model {}: {}", target_id, e)))
            })?;
            if affected == 0 {
                return Err(BaseError::NotFound(Some(format!(
                    "Model with id {} not found",
                    target_id
                ))));
            }
            Ok(affected)
        })
    }
}
