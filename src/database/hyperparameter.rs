use chrono::Utc;
use diesel::prelude::*;
use serde::Deserialize;

use crate::controller::BaseError;
use crate::database::{get_connection, DbResult};
use crate::{db_execute, db_object};

db_object! {
    #[derive(Queryable, Selectable, Identifiable, AsChangeset)]
    #[diesel(table_name = hyperparameter_config)]
    pub struct HyperparameterConfig {
        pub id: i64,
        pub user_id: String,
        pub model_id: i64,
        pub parameters: String,
        pub description: Option<String>,
        pub is_default: bool,
        pub created_at: i64,
        pub updated_at: i64,
        pub deleted_at: Option<i64>,
    }

    #[derive(Insertable, Deserialize, Debug)]
    #[diesel(table_name = hyperparameter_config)]
    pub struct NewHyperparameterConfig {
        pub id: i64,
        pub user_id: String,
        pub model_id: i64,
        pub parameters: String,
        pub description: Option<String>,
        pub is_default: bool,
        pub created_at: i64,
        pub updated_at: i64,
    }
}

/// Partial update payload. Absent fields are left untouched; `parameters`
/// replaces the stored mapping wholesale, it is never merged.
#[derive(Deserialize, Debug, Default)]
pub struct UpdateHyperparameterConfigData {
    pub parameters: Option<String>,
    pub description: Option<String>,
    pub is_default: Option<bool>,
}

impl HyperparameterConfig {
    /// Inserts a new config. When it is flagged as default, every other
    /// non-deleted default for the same (user, model) pair is cleared inside
    /// the same transaction, so at most one default survives.
    pub fn create(new_config_data: &NewHyperparameterConfig) -> DbResult<HyperparameterConfig> {
        let conn = &mut get_connection();
        db_execute!(conn, {
            conn.transaction::<HyperparameterConfig, BaseError, _>(|conn| {
                if new_config_data.is_default {
                    diesel::update(
                        hyperparameter_config::table.filter(
                            hyperparameter_config::dsl::user_id
                                .eq(&new_config_data.user_id)
                                .and(hyperparameter_config::dsl::model_id.eq(new_config_data.model_id))
                                .and(hyperparameter_config::dsl::is_default.eq(true))
                                .and(hyperparameter_config::dsl::deleted_at.is_null()),
                        ),
                    )
                    .set(hyperparameter_config::dsl::is_default.eq(false))
                    .execute(conn)?;
                }
                let db_config = diesel::insert_into(hyperparameter_config::table)
                    .values(NewHyperparameterConfigDb::to_db(new_config_data))
                    .returning(HyperparameterConfigDb::as_returning())
                    .get_result::<HyperparameterConfigDb>(conn)?;
                Ok(db_config.from_db())
            })
        })
    }

    pub fn list_for_user(user_id_val: &str) -> DbResult<Vec<HyperparameterConfig>> {
        let conn = &mut get_connection();
        db_execute!(conn, {
            let db_configs = hyperparameter_config::table
                .filter(
                    hyperparameter_config::dsl::user_id
                        .eq(user_id_val)
                        .and(hyperparameter_config::dsl::deleted_at.is_null()),
                )
                .order(hyperparameter_config::dsl::created_at.desc())
                .select(HyperparameterConfigDb::as_select())
                .load::<HyperparameterConfigDb>(conn)
                .map_err(|e| {
                    BaseError::DatabaseFatal(Some(format!(
                        "Failed to list configs for user {}: {}",
                        user_id_val, e
                    )))
                })?;
            Ok(db_configs.into_iter().map(|c| c.from_db()).collect())
        })
    }

    pub fn get_for_user(config_id: i64, user_id_val: &str) -> DbResult<HyperparameterConfig> {
        let conn = &mut get_connection();
        db_execute!(conn, {
            let db_config = hyperparameter_config::table
                .filter(
                    hyperparameter_config::dsl::id
                        .eq(config_id)
                        .and(hyperparameter_config::dsl::user_id.eq(user_id_val))
                        .and(hyperparameter_config::dsl::deleted_at.is_null()),
                )
                .select(HyperparameterConfigDb::as_select())
                .first::<HyperparameterConfigDb>(conn)
                .map_err(|e| match e {
                    diesel::result::Error::NotFound => {
                        BaseError::NotFound(Some(format!("Config with id {} not found", config_id)))
                    }
                    _ => BaseError::DatabaseFatal(Some(format!(
                        "Error fetching config {}: {}",
                        config_id, e
                    ))),
                })?;
            Ok(db_config.from_db())
        })
    }

    /// Looks up a config for the parameter resolver: it must belong to the
    /// user, target the requested model, and not be soft-deleted. A miss is
    /// `Ok(None)`, never an error.
    pub fn get_for_generation(
        config_id: i64,
        user_id_val: &str,
        model_id_val: i64,
    ) -> DbResult<Option<HyperparameterConfig>> {
        let conn = &mut get_connection();
        db_execute!(conn, {
            let db_config_opt = hyperparameter_config::table
                .filter(
                    hyperparameter_config::dsl::id
                        .eq(config_id)
                        .and(hyperparameter_config::dsl::user_id.eq(user_id_val))
                        .and(hyperparameter_config::dsl::model_id.eq(model_id_val))
                        .and(hyperparameter_config::dsl::deleted_at.is_null()),
                )
                .select(HyperparameterConfigDb::as_select())
                .first::<HyperparameterConfigDb>(conn)
                .optional()
                .map_err(|e| {
                    BaseError::DatabaseFatal(Some(format!(
                        "Error fetching config {}: {}",
                        config_id, e
                    )))
                })?;
            Ok(db_config_opt.map(|c| c.from_db()))
        })
    }

    /// Applies a partial update. Setting `is_default = true` clears every
    /// other default for the (user, model) pair in the same transaction.
    pub fn update(
        config_id: i64,
        user_id_val: &str,
        update_data: &UpdateHyperparameterConfigData,
    ) -> DbResult<HyperparameterConfig> {
        let conn = &mut get_connection();
        let current_time = Utc::now().timestamp_millis();
        db_execute!(conn, {
            conn.transaction::<HyperparameterConfig, BaseError, _>(|conn| {
                let existing = hyperparameter_config::table
                    .filter(
                        hyperparameter_config::dsl::id
                            .eq(config_id)
                            .and(hyperparameter_config::dsl::user_id.eq(user_id_val))
                            .and(hyperparameter_config::dsl::deleted_at.is_null()),
                    )
                    .select(HyperparameterConfigDb::as_select())
                    .first::<HyperparameterConfigDb>(conn)
                    .optional()?
                    .map(|c| c.from_db())
                    .ok_or_else(|| {
                        BaseError::NotFound(Some(format!("Config with id {} not found", config_id)))
                    })?;

                if update_data.is_default == Some(true) {
                    diesel::update(
                        hyperparameter_config::table.filter(
                            hyperparameter_config::dsl::user_id
                                .eq(user_id_val)
                                .and(hyperparameter_config::dsl::model_id.eq(existing.model_id))
                                .and(hyperparameter_config::dsl::is_default.eq(true))
                                .and(hyperparameter_config::dsl::id.ne(config_id))
                                .and(hyperparameter_config::dsl::deleted_at.is_null()),
                        ),
                    )
                    .set(hyperparameter_config::dsl::is_default.eq(false))
                    .execute(conn)?;
                }

                if let Some(parameters_val) = &update_data.parameters {
                    diesel::update(hyperparameter_config::table.find(config_id))
                        .set(hyperparameter_config::dsl::parameters.eq(parameters_val))
                        .execute(conn)?;
                }
                if let Some(description_val) = &update_data.description {
                    diesel::update(hyperparameter_config::table.find(config_id))
                        .set(hyperparameter_config::dsl::description.eq(description_val))
                        .execute(conn)?;
                }
                if let Some(is_default_val) = update_data.is_default {
                    diesel::update(hyperparameter_config::table.find(config_id))
                        .set(hyperparameter_config::dsl::is_default.eq(is_default_val))
                        .execute(conn)?;
                }

                let db_config = diesel::update(hyperparameter_config::table.find(config_id))
                    .set(hyperparameter_config::dsl::updated_at.eq(current_time))
                    .returning(HyperparameterConfigDb::as_returning())
                    .get_result::<HyperparameterConfigDb>(conn)?;
                Ok(db_config.from_db())
            })
        })
    }

    pub fn soft_delete(config_id: i64, user_id_val: &str) -> DbResult<usize> {
        let conn = &mut get_connection();
        let current_time = Utc::now().timestamp_millis();
        db_execute!(conn, {
            let affected = diesel::update(
                hyperparameter_config::table.filter(
                    hyperparameter_config::dsl::id
                        .eq(config_id)
                        .and(hyperparameter_config::dsl::user_id.eq(user_id_val))
                        .and(hyperparameter_config::dsl::deleted_at.is_null()),
                ),
            )
            .set((
                hyperparameter_config::dsl::deleted_at.eq(current_time),
                hyperparameter_config::dsl::updated_at.eq(current_time),
            ))
            .execute(conn)
            .map_err(|e| {
                BaseError::DatabaseFatal(Some(format!("Failed to delete config {}: {}", config_id, e)))
            })?;
            if affected == 0 {
                return Err(BaseError::NotFound(Some(format!(
                    "Config with id {} not found",
                    config_id
                ))));
            }
            Ok(affected)
        })
    }

    /// Counts the user's non-deleted configs for the deletion preview.
    pub fn count_active_for_user(user_id_val: &str) -> DbResult<i64> {
        let conn = &mut get_connection();
        db_execute!(conn, {
            hyperparameter_config::table
                .filter(
                    hyperparameter_config::dsl::user_id
                        .eq(user_id_val)
                        .and(hyperparameter_config::dsl::deleted_at.is_null()),
                )
                .select(diesel::dsl::count_star())
                .first::<i64>(conn)
                .map_err(|e| {
                    BaseError::DatabaseFatal(Some(format!(
                        "Failed to count configs for user {}: {}",
                        user_id_val, e
                    )))
                })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::test_support::{
        lock_test_db, seed_model_for, seed_provider, seed_provider_and_model, seed_user,
    };
    use crate::utils::ID_GENERATOR;

    fn seed_config(user_id: &str, model_id: i64, is_default: bool) -> HyperparameterConfig {
        let now = Utc::now().timestamp_millis();
        HyperparameterConfig::create(&NewHyperparameterConfig {
            id: ID_GENERATOR.generate_id(),
            user_id: user_id.to_string(),
            model_id,
            parameters: r#"{"temperature":0.5}"#.to_string(),
            description: None,
            is_default,
            created_at: now,
            updated_at: now,
        })
        .unwrap()
    }

    fn default_ids(user_id: &str) -> Vec<i64> {
        HyperparameterConfig::list_for_user(user_id)
            .unwrap()
            .into_iter()
            .filter(|c| c.is_default)
            .map(|c| c.id)
            .collect()
    }

    #[test]
    fn creating_a_default_demotes_the_previous_one() {
        let _guard = lock_test_db();
        let user_id = seed_user("hp-default").id;
        let (_, model) = seed_provider_and_model("hp-default");
        let model_id = model.id;

        let first = seed_config(&user_id, model_id, true);
        assert_eq!(default_ids(&user_id), vec![first.id]);

        let second = seed_config(&user_id, model_id, true);
        assert_eq!(default_ids(&user_id), vec![second.id]);
    }

    #[test]
    fn defaults_are_scoped_per_model() {
        let _guard = lock_test_db();
        let user_id = seed_user("hp-scope").id;
        let provider = seed_provider("hp-scope");
        let model_a = seed_model_for(&provider, "hp-scope-a").id;
        let model_b = seed_model_for(&provider, "hp-scope-b").id;

        let for_a = seed_config(&user_id, model_a, true);
        let for_b = seed_config(&user_id, model_b, true);

        let mut defaults = default_ids(&user_id);
        defaults.sort();
        let mut expected = vec![for_a.id, for_b.id];
        expected.sort();
        assert_eq!(defaults, expected);
    }

    #[test]
    fn promoting_via_update_demotes_the_previous_default() {
        let _guard = lock_test_db();
        let user_id = seed_user("hp-promote").id;
        let model_id = seed_provider_and_model("hp-promote").1.id;

        seed_config(&user_id, model_id, true);
        let challenger = seed_config(&user_id, model_id, false);

        let updated = HyperparameterConfig::update(
            challenger.id,
            &user_id,
            &UpdateHyperparameterConfigData {
                parameters: None,
                description: Some("now the default".to_string()),
                is_default: Some(true),
            },
        )
        .unwrap();
        assert!(updated.is_default);
        assert_eq!(default_ids(&user_id), vec![challenger.id]);
    }

    #[test]
    fn generation_lookup_is_scoped_to_owner_and_model() {
        let _guard = lock_test_db();
        let user_id = seed_user("hp-lookup").id;
        let model_id = seed_provider_and_model("hp-lookup").1.id;
        let config = seed_config(&user_id, model_id, false);

        assert!(
            HyperparameterConfig::get_for_generation(config.id, &user_id, model_id)
                .unwrap()
                .is_some()
        );
        assert!(
            HyperparameterConfig::get_for_generation(config.id, "someone-else", model_id)
                .unwrap()
                .is_none()
        );
        assert!(HyperparameterConfig::get_for_generation(
            config.id,
            &user_id,
            ID_GENERATOR.generate_id()
        )
        .unwrap()
        .is_none());
    }

    #[test]
    fn soft_deleted_configs_disappear_from_lookups() {
        let _guard = lock_test_db();
        let user_id = seed_user("hp-delete").id;
        let model_id = seed_provider_and_model("hp-delete").1.id;
        let config = seed_config(&user_id, model_id, false);

        HyperparameterConfig::soft_delete(config.id, &user_id).unwrap();
        assert!(HyperparameterConfig::list_for_user(&user_id)
            .unwrap()
            .is_empty());
        assert!(
            HyperparameterConfig::get_for_generation(config.id, &user_id, model_id)
                .unwrap()
                .is_none()
        );
        let err = HyperparameterConfig::soft_delete(config.id, &user_id).unwrap_err();
        assert!(matches!(err, BaseError::NotFound(_)));
    }
}
