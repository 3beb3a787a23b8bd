use chrono::Utc;
use diesel::prelude::*;
use serde::Deserialize;

use crate::controller::BaseError;
use crate::database::{get_connection, DbResult};
use crate::{db_execute, db_object};

db_object! {
    #[derive(Queryable, Selectable, Identifiable, AsChangeset)]
    #[diesel(table_name = users)]
    pub struct User {
        pub id: String,
        pub username: String,
        pub email: String,
        pub is_active: bool,
        pub created_at: i64,
        pub updated_at: i64,
        pub deleted_at: Option<i64>,
    }

    #[derive(Insertable, Deserialize, Debug)]
    #[diesel(table_name = users)]
    pub struct NewUser {
        pub id: String,
        pub username: String,
        pub email: String,
        pub is_active: bool,
        pub created_at: i64,
        pub updated_at: i64,
    }

    #[derive(AsChangeset, Deserialize, Debug)]
    #[diesel(table_name = users)]
    pub struct UpdateUserData {
        pub username: Option<String>,
        pub email: Option<String>,
    }
}

impl User {
    pub fn create(new_user_data: &NewUser) -> DbResult<User> {
        let conn = &mut get_connection();
        db_execute!(conn, {
            let db_user = diesel::insert_into(users::table)
                .values(NewUserDb::to_db(new_user_data))
                .returning(UserDb::as_returning())
                .get_result::<UserDb>(conn)
                .map_err(|e| match e {
                    diesel::result::Error::DatabaseError(
                        diesel::result::DatabaseErrorKind::UniqueViolation,
                        _,
                    ) => BaseError::Conflict(Some("username or email already exists".to_string())),
                    _ => BaseError::DatabaseFatal(Some(format!("Failed to insert user: {}", e))),
                })?;
            Ok(db_user.from_db())
        })
    }

    /// Retrieves a user by id, excluding soft-deleted rows.
    pub fn get_active_by_id(user_id: &str) -> DbResult<Option<User>> {
        let conn = &mut get_connection();
        db_execute!(conn, {
            let db_user_opt = users::table
                .filter(users::dsl::id.eq(user_id).and(users::dsl::deleted_at.is_null()))
                .select(UserDb::as_select())
                .first::<UserDb>(conn)
                .optional()
                .map_err(|e| {
                    BaseError::DatabaseFatal(Some(format!("Error fetching user {}: {}", user_id, e)))
                })?;
            Ok(db_user_opt.map(|u| u.from_db()))
        })
    }

    /// Retrieves a user by id regardless of deletion state (lifecycle manager use).
    pub fn get_by_id_any(user_id: &str) -> DbResult<Option<User>> {
        let conn = &mut get_connection();
        db_execute!(conn, {
            let db_user_opt = users::table
                .find(user_id)
                .select(UserDb::as_select())
                .first::<UserDb>(conn)
                .optional()
                .map_err(|e| {
                    BaseError::DatabaseFatal(Some(format!("Error fetching user {}: {}", user_id, e)))
                })?;
            Ok(db_user_opt.map(|u| u.from_db()))
        })
    }

    pub fn get_active_by_email(email_val: &str) -> DbResult<Option<User>> {
        let conn = &mut get_connection();
        db_execute!(conn, {
            let db_user_opt = users::table
                .filter(
                    users::dsl::email
                        .eq(email_val)
                        .and(users::dsl::deleted_at.is_null()),
                )
                .select(UserDb::as_select())
                .first::<UserDb>(conn)
                .optional()
                .map_err(|e| {
                    BaseError::DatabaseFatal(Some(format!(
                        "Error fetching user by email '{}': {}",
                        email_val, e
                    )))
                })?;
            Ok(db_user_opt.map(|u| u.from_db()))
        })
    }

    pub fn list_all(include_deleted: bool) -> DbResult<Vec<User>> {
        let conn = &mut get_connection();
        db_execute!(conn, {
            let mut query = users::table.into_boxed();
            if !include_deleted {
                query = query.filter(users::dsl::deleted_at.is_null());
            }
            let db_users = query
                .order(users::dsl::created_at.desc())
                .select(UserDb::as_select())
                .load::<UserDb>(conn)
                .map_err(|e| BaseError::DatabaseFatal(Some(format!("Failed to list users: {}", e))))?;
            Ok(db_users.into_iter().map(|u| u.from_db()).collect())
        })
    }

    /// Lists every soft-deleted user, for the deletion dashboard.
    pub fn list_soft_deleted() -> DbResult<Vec<User>> {
        let conn = &mut get_connection();
        db_execute!(conn, {
            let db_users = users::table
                .filter(users::dsl::deleted_at.is_not_null())
                .order(users::dsl::created_at.desc())
                .select(UserDb::as_select())
                .load::<UserDb>(conn)
                .map_err(|e| {
                    BaseError::DatabaseFatal(Some(format!("Failed to list deleted users: {}", e)))
                })?;
            Ok(db_users.into_iter().map(|u| u.from_db()).collect())
        })
    }

    /// Lists users whose soft-delete stamp is older than the cutoff.
    pub fn list_deleted_before(cutoff_millis: i64) -> DbResult<Vec<User>> {
        let conn = &mut get_connection();
        db_execute!(conn, {
            let db_users = users::table
                .filter(
                    users::dsl::deleted_at
                        .is_not_null()
                        .and(users::dsl::deleted_at.lt(cutoff_millis)),
                )
                .select(UserDb::as_select())
                .load::<UserDb>(conn)
                .map_err(|e| {
                    BaseError::DatabaseFatal(Some(format!("Failed to list expired users: {}", e)))
                })?;
            Ok(db_users.into_iter().map(|u| u.from_db()).collect())
        })
    }

    /// Applies a partial profile update to a non-deleted user.
    pub fn update_profile(user_id: &str, update_data: &UpdateUserData) -> DbResult<User> {
        let conn = &mut get_connection();
        let current_time = Utc::now().timestamp_millis();
        db_execute!(conn, {
            let db_user = diesel::update(
                users::table.filter(users::dsl::id.eq(user_id).and(users::dsl::deleted_at.is_null())),
            )
            .set((
                UpdateUserDataDb::to_db(update_data),
                users::dsl::updated_at.eq(current_time),
            ))
            .returning(UserDb::as_returning())
            .get_result::<UserDb>(conn)
            .map_err(|e| match e {
                diesel::result::Error::NotFound => {
                    BaseError::NotFound(Some(format!("User {} not found", user_id)))
                }
                diesel::result::Error::DatabaseError(
                    diesel::result::DatabaseErrorKind::UniqueViolation,
                    _,
                ) => BaseError::Conflict(Some("username or email already exists".to_string())),
                _ => BaseError::DatabaseFatal(Some(format!("Failed to update user {}: {}", user_id, e))),
            })?;
            Ok(db_user.from_db())
        })
    }

    /// Stamps the user and every non-deleted config/history row they own
    /// with the same `deleted_at` value, in one transaction. Returns the
    /// (config, history) row counts that were stamped.
    pub fn soft_delete_cascade(user_id: &str, stamp: i64) -> DbResult<(usize, usize)> {
        let conn = &mut get_connection();
        db_execute!(conn, {
            conn.transaction::<(usize, usize), BaseError, _>(|conn| {
                let affected = diesel::update(
                    users::table
                        .filter(users::dsl::id.eq(user_id).and(users::dsl::deleted_at.is_null())),
                )
                .set((
                    users::dsl::deleted_at.eq(Some(stamp)),
                    users::dsl::is_active.eq(false),
                    users::dsl::updated_at.eq(stamp),
                ))
                .execute(conn)?;
                if affected == 0 {
                    return Err(BaseError::NotFound(Some(format!(
                        "User {} not found",
                        user_id
                    ))));
                }

                let configs = diesel::update(
                    hyperparameter_config::table.filter(
                        hyperparameter_config::dsl::user_id
                            .eq(user_id)
                            .and(hyperparameter_config::dsl::deleted_at.is_null()),
                    ),
                )
                .set(hyperparameter_config::dsl::deleted_at.eq(Some(stamp)))
                .execute(conn)?;

                let history = diesel::update(
                    call_history::table.filter(
                        call_history::dsl::user_id
                            .eq(user_id)
                            .and(call_history::dsl::deleted_at.is_null()),
                    ),
                )
                .set(call_history::dsl::deleted_at.eq(Some(stamp)))
                .execute(conn)?;

                Ok((configs, history))
            })
        })
    }

    /// Clears `deleted_at` on the user and on exactly those owned rows that
    /// carry the given stamp. Rows deleted independently of the account keep
    /// their own stamps and stay deleted.
    pub fn restore_cascade(user_id: &str, stamp: i64) -> DbResult<(usize, usize)> {
        let conn = &mut get_connection();
        db_execute!(conn, {
            conn.transaction::<(usize, usize), BaseError, _>(|conn| {
                let affected = diesel::update(
                    users::table.filter(
                        users::dsl::id
                            .eq(user_id)
                            .and(users::dsl::deleted_at.eq(Some(stamp))),
                    ),
                )
                .set((
                    users::dsl::deleted_at.eq(None::<i64>),
                    users::dsl::is_active.eq(true),
                    users::dsl::updated_at.eq(Utc::now().timestamp_millis()),
                ))
                .execute(conn)?;
                if affected == 0 {
                    return Err(BaseError::NotFound(Some(format!(
                        "User {} not found",
                        user_id
                    ))));
                }

                let configs = diesel::update(
                    hyperparameter_config::table.filter(
                        hyperparameter_config::dsl::user_id
                            .eq(user_id)
                            .and(hyperparameter_config::dsl::deleted_at.eq(Some(stamp))),
                    ),
                )
                .set(hyperparameter_config::dsl::deleted_at.eq(None::<i64>))
                .execute(conn)?;

                let history = diesel::update(
                    call_history::table.filter(
                        call_history::dsl::user_id
                            .eq(user_id)
                            .and(call_history::dsl::deleted_at.eq(Some(stamp))),
                    ),
                )
                .set(call_history::dsl::deleted_at.eq(None::<i64>))
                .execute(conn)?;

                Ok((configs, history))
            })
        })
    }

    /// Physically removes the user and everything they own. One transaction
    /// per account so a failure never leaves a half-purged user.
    pub fn purge(user_id: &str) -> DbResult<()> {
        let conn = &mut get_connection();
        db_execute!(conn, {
            conn.transaction::<(), BaseError, _>(|conn| {
                diesel::delete(
                    call_history::table.filter(call_history::dsl::user_id.eq(user_id)),
                )
                .execute(conn)?;
                diesel::delete(
                    hyperparameter_config::table
                        .filter(hyperparameter_config::dsl::user_id.eq(user_id)),
                )
                .execute(conn)?;
                diesel::delete(users::table.find(user_id)).execute(conn)?;
                Ok(())
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::test_support::lock_test_db;
    use uuid::Uuid;

    fn new_user(tag: &str) -> NewUser {
        let now = Utc::now().timestamp_millis();
        NewUser {
            id: Uuid::new_v4().to_string(),
            username: format!("user-{}", tag),
            email: format!("user-{}@example.com", tag),
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn duplicate_email_conflicts() {
        let _guard = lock_test_db();
        let mut first = new_user("email-a");
        first.email = "shared@example.com".to_string();
        User::create(&first).unwrap();

        let mut second = new_user("email-b");
        second.email = "shared@example.com".to_string();
        let err = User::create(&second).unwrap_err();
        assert!(matches!(err, BaseError::Conflict(_)));
    }

    #[test]
    fn profile_update_stamps_updated_at() {
        let _guard = lock_test_db();
        let created = User::create(&new_user("stamp")).unwrap();
        let updated = User::update_profile(
            &created.id,
            &UpdateUserData {
                username: Some("user-stamp-renamed".to_string()),
                email: None,
            },
        )
        .unwrap();
        assert_eq!(updated.username, "user-stamp-renamed");
        assert_eq!(updated.email, created.email);
        assert!(updated.updated_at >= created.updated_at);
    }

    #[test]
    fn deleted_users_cannot_be_updated_or_fetched_as_active() {
        let _guard = lock_test_db();
        let created = User::create(&new_user("gone")).unwrap();
        crate::service::deletion::soft_delete_user(&created.id).unwrap();

        assert!(User::get_active_by_id(&created.id).unwrap().is_none());
        assert!(User::get_by_id_any(&created.id).unwrap().is_some());
        let err = User::update_profile(
            &created.id,
            &UpdateUserData {
                username: Some("never".to_string()),
                email: None,
            },
        )
        .unwrap_err();
        assert!(matches!(err, BaseError::NotFound(_)));
    }
}
