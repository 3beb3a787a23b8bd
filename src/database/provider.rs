use chrono::Utc;
use diesel::prelude::*;
use serde::Deserialize;

use crate::controller::BaseError;
use crate::database::{get_connection, DbResult};
use crate::{db_execute, db_object};

db_object! {
    #[derive(Queryable, Selectable, Identifiable, AsChangeset)]
    #[diesel(table_name = provider)]
    pub struct Provider {
        pub id: i64,
        pub name: String,
        pub provider_type: String,
        pub endpoint: String,
        pub api_key: String,
        pub is_enabled: bool,
        pub created_at: i64,
        pub updated_at: i64,
        pub deleted_at: Option<i64>,
    }

    #[derive(Insertable, Deserialize, Debug)]
    #[diesel(table_name = provider)]
    pub struct NewProvider {
        pub id: i64,
        pub name: String,
        pub provider_type: String,
        pub endpoint: String,
        pub api_key: String,
        pub is_enabled: bool,
        pub created_at: i64,
        pub updated_at: i64,
    }
}

impl Provider {
    pub fn create(new_provider_data: &NewProvider) -> DbResult<Provider> {
        let conn = &mut get_connection();
        db_execute!(conn, {
            let db_provider = diesel::insert_into(provider::table)
                .values(NewProviderDb::to_db(new_provider_data))
                .returning(ProviderDb::as_returning())
                .get_result::<ProviderDb>(conn)
                .map_err(|e| match e {
                    diesel::result::Error::DatabaseError(
                        diesel::result::DatabaseErrorKind::UniqueViolation,
                        _,
                    ) => BaseError::Conflict(Some(format!(
                        "Provider '{}' already exists",
                        new_provider_data.name
                    ))),
                    _ => BaseError::DatabaseFatal(Some(format!("Failed to insert provider: {}", e))),
                })?;
            Ok(db_provider.from_db())
        })
    }

    /// Retrieves a non-deleted provider by name. Disabled providers are
    /// filtered here as well: a disabled vendor must not receive traffic.
    pub fn get_active_by_name(name_val: &str) -> DbResult<Option<Provider>> {
        let conn = &mut get_connection();
        db_execute!(conn, {
            let db_provider_opt = provider::table
                .filter(
                    provider::dsl::name
                        .eq(name_val)
                        .and(provider::dsl::deleted_at.is_null())
                        .and(provider::dsl::is_enabled.eq(true)),
                )
                .select(ProviderDb::as_select())
                .first::<ProviderDb>(conn)
                .optional()
                .map_err(|e| {
                    BaseError::DatabaseFatal(Some(format!(
                        "Error fetching provider by name '{}': {}",
                        name_val, e
                    )))
                })?;
            Ok(db_provider_opt.map(|p| p.from_db()))
        })
    }

    pub fn get_by_id(target_id: i64) -> DbResult<Provider> {
        let conn = &mut get_connection();
        db_execute!(conn, {
            let db_provider = provider::table
                .filter(
                    provider::dsl::id
                        .eq(target_id)
                        .and(provider::dsl::deleted_at.is_null()),
                )
                .select(ProviderDb::as_select())
                .first::<ProviderDb>(conn)
                .map_err(|e| match e {
                    diesel::result::Error::NotFound => {
                        BaseError::NotFound(Some(format!("Provider with id {} not found", target_id)))
                    }
                    _ => BaseError::DatabaseFatal(Some(format!(
                        "Error fetching provider {}: {}",
                        target_id, e
                    ))),
                })?;
            Ok(db_provider.from_db())
        })
    }

    pub fn list_all() -> DbResult<Vec<Provider>> {
        let conn = &mut get_connection();
        db_execute!(conn, {
            let db_providers = provider::table
                .filter(provider::dsl::deleted_at.is_null())
                .order(provider::dsl::created_at.desc())
                .select(ProviderDb::as_select())
                .load::<ProviderDb>(conn)
                .map_err(|e| {
                    BaseError::DatabaseFatal(Some(format!("Failed to list providers: {}", e)))
                })?;
            Ok(db_providers.into_iter().map(|p| p.from_db()).collect())
        })
    }

    /// Soft deletes a provider and cascades to its models in one transaction.
    pub fn soft_delete(target_id: i64) -> DbResult<usize> {
        let conn = &mut get_connection();
        let current_time = Utc::now().timestamp_millis();
        db_execute!(conn, {
            conn.transaction::<usize, BaseError, _>(|conn| {
                let affected = diesel::update(
                    provider::table.filter(
                        provider::dsl::id
                            .eq(target_id)
                            .and(provider::dsl::deleted_at.is_null()),
                    ),
                )
                .set((
                    provider::dsl::deleted_at.eq(current_time),
                    provider::dsl::is_enabled.eq(false),
                    provider::dsl::updated_at.eq(current_time),
                ))
                .execute(conn)?;
                if affected == 0 {
                    return Err(BaseError::NotFound(Some(format!(
                        "Provider with id {} not found",
                        target_id
                    ))));
                }
                diesel::update(
                    model::table.filter(
                        model::dsl::provider_id
                            .eq(target_id)
                            .and(model::dsl::deleted_at.is_null()),
                    ),
                )
                .set((
                    model::dsl::deleted_at.eq(current_time),
                    model::dsl::is_enabled.eq(false),
                    model::dsl::updated_at.eq(current_time),
                ))
                .execute(conn)?;
                Ok(affected)
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::model::{Model, NewModel};
    use crate::database::test_support::lock_test_db;
    use crate::utils::ID_GENERATOR;

    fn new_provider(name: &str, is_enabled: bool) -> NewProvider {
        let now = Utc::now().timestamp_millis();
        NewProvider {
            id: ID_GENERATOR.generate_id(),
            name: name.to_string(),
            provider_type: "azure".to_string(),
            endpoint: "https://example.com/v1".to_string(),
            api_key: "k".to_string(),
            is_enabled,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn duplicate_names_conflict() {
        let _guard = lock_test_db();
        Provider::create(&new_provider("prov-dup", true)).unwrap();
        let err = Provider::create(&new_provider("prov-dup", true)).unwrap_err();
        assert!(matches!(err, BaseError::Conflict(_)));
    }

    #[test]
    fn disabled_providers_are_invisible_to_dispatch() {
        let _guard = lock_test_db();
        Provider::create(&new_provider("prov-disabled", false)).unwrap();
        assert!(Provider::get_active_by_name("prov-disabled")
            .unwrap()
            .is_none());
    }

    #[test]
    fn soft_delete_cascades_to_models() {
        let _guard = lock_test_db();
        let provider = Provider::create(&new_provider("prov-cascade", true)).unwrap();
        let now = Utc::now().timestamp_millis();
        let model = Model::create(&NewModel {
            id: ID_GENERATOR.generate_id(),
            provider_id: provider.id,
            name: "cascade-model".to_string(),
            is_enabled: true,
            created_at: now,
            updated_at: now,
        })
        .unwrap();

        Provider::soft_delete(provider.id).unwrap();
        assert!(Provider::get_active_by_name("prov-cascade")
            .unwrap()
            .is_none());
        assert!(Model::get_active_by_name("cascade-model", provider.id)
            .unwrap()
            .is_none());
        assert!(Model::list_by_provider_id(provider.id).unwrap().is_empty());
        let err = Model::get_by_id(model.id).unwrap_err();
        assert!(matches!(err, BaseError::NotFound(_)));

        let err = Provider::soft_delete(provider.id).unwrap_err();
        assert!(matches!(err, BaseError::NotFound(_)));
    }
}
