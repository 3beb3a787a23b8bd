use diesel::dsl::{count_star, sum};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::controller::BaseError;
use crate::database::{get_connection, DbResult};
use crate::schema::enum_def::CallStatus;
use crate::{db_execute, db_object};

db_object! {
    #[derive(Queryable, Selectable, Identifiable)]
    #[diesel(table_name = call_history)]
    pub struct CallHistory {
        pub id: i64,
        pub user_id: String,
        pub provider_id: i64,
        pub model_id: i64,
        pub prompt: String,
        pub response: String,
        pub parameters: String,
        pub status: CallStatus,
        pub error_message: Option<String>,
        pub tokens_input: Option<i32>,
        pub tokens_output: Option<i32>,
        pub total_tokens: Option<i32>,
        pub cost: Option<f64>,
        pub created_at: i64,
        pub deleted_at: Option<i64>,
    }

    #[derive(Insertable, Deserialize, Debug)]
    #[diesel(table_name = call_history)]
    pub struct NewCallHistory {
        pub id: i64,
        pub user_id: String,
        pub provider_id: i64,
        pub model_id: i64,
        pub prompt: String,
        pub response: String,
        pub parameters: String,
        pub status: CallStatus,
        pub error_message: Option<String>,
        pub tokens_input: Option<i32>,
        pub tokens_output: Option<i32>,
        pub total_tokens: Option<i32>,
        pub cost: Option<f64>,
        pub created_at: i64,
    }
}

#[derive(Serialize, Debug, Default, PartialEq)]
pub struct UserCallStats {
    pub total_calls: i64,
    pub failed_calls: i64,
    pub total_tokens: i64,
    pub total_cost: f64,
    pub success_rate: f64,
}

impl CallHistory {
    /// Appends one ledger row. Only the generation orchestrator writes here.
    pub fn insert(new_record: &NewCallHistory) -> DbResult<CallHistory> {
        let conn = &mut get_connection();
        db_execute!(conn, {
            let db_record = diesel::insert_into(call_history::table)
                .values(NewCallHistoryDb::to_db(new_record))
                .returning(CallHistoryDb::as_returning())
                .get_result::<CallHistoryDb>(conn)
                .map_err(|e| {
                    BaseError::DatabaseFatal(Some(format!("Failed to insert call history: {}", e)))
                })?;
            Ok(db_record.from_db())
        })
    }

    /// Pages through a user's calls, newest first, excluding soft-deleted rows.
    pub fn list_for_user(user_id_val: &str, limit: i64, offset: i64) -> DbResult<Vec<CallHistory>> {
        let conn = &mut get_connection();
        db_execute!(conn, {
            let db_records = call_history::table
                .filter(
                    call_history::dsl::user_id
                        .eq(user_id_val)
                        .and(call_history::dsl::deleted_at.is_null()),
                )
                .order(call_history::dsl::created_at.desc())
                .limit(limit)
                .offset(offset)
                .select(CallHistoryDb::as_select())
                .load::<CallHistoryDb>(conn)
                .map_err(|e| {
                    BaseError::DatabaseFatal(Some(format!(
                        "Failed to list history for user {}: {}",
                        user_id_val, e
                    )))
                })?;
            Ok(db_records.into_iter().map(|r| r.from_db()).collect())
        })
    }

    /// Fetches one record by id. Deliberately not user-scoped: any caller
    /// holding an id may read it.
    pub fn get_by_id(record_id: i64) -> DbResult<CallHistory> {
        let conn = &mut get_connection();
        db_execute!(conn, {
            let db_record = call_history::table
                .filter(
                    call_history::dsl::id
                        .eq(record_id)
                        .and(call_history::dsl::deleted_at.is_null()),
                )
                .select(CallHistoryDb::as_select())
                .first::<CallHistoryDb>(conn)
                .map_err(|e| match e {
                    diesel::result::Error::NotFound => BaseError::NotFound(Some(format!(
                        "History record with id {} not found",
                        record_id
                    ))),
                    _ => BaseError::DatabaseFatal(Some(format!(
                        "Error fetching history record {}: {}",
                        record_id, e
                    ))),
                })?;
            Ok(db_record.from_db())
        })
    }

    /// Aggregates usage for a user. `total_calls` counts successful calls,
    /// token/cost sums only cover those; `success_rate` is
    /// `total / (total + failed) * 100`, or 0 when the user has no calls.
    pub fn stats_for_user(user_id_val: &str) -> DbResult<UserCallStats> {
        let conn = &mut get_connection();
        db_execute!(conn, {
            let total_calls: i64 = call_history::table
                .filter(
                    call_history::dsl::user_id
                        .eq(user_id_val)
                        .and(call_history::dsl::deleted_at.is_null())
                        .and(call_history::dsl::status.eq(CallStatus::Success)),
                )
                .select(count_star())
                .first(conn)
                .map_err(|e| {
                    BaseError::DatabaseFatal(Some(format!("Failed to count calls: {}", e)))
                })?;

            let failed_calls: i64 = call_history::table
                .filter(
                    call_history::dsl::user_id
                        .eq(user_id_val)
                        .and(call_history::dsl::deleted_at.is_null())
                        .and(call_history::dsl::status.eq(CallStatus::Error)),
                )
                .select(count_star())
                .first(conn)
                .map_err(|e| {
                    BaseError::DatabaseFatal(Some(format!("Failed to count failed calls: {}", e)))
                })?;

            let total_tokens: Option<i64> = call_history::table
                .filter(
                    call_history::dsl::user_id
                        .eq(user_id_val)
                        .and(call_history::dsl::deleted_at.is_null())
                        .and(call_history::dsl::status.eq(CallStatus::Success)),
                )
                .select(sum(call_history::dsl::total_tokens))
                .first(conn)
                .map_err(|e| BaseError::DatabaseFatal(Some(format!("Failed to sum tokens: {}", e))))?;

            let total_cost: Option<f64> = call_history::table
                .filter(
                    call_history::dsl::user_id
                        .eq(user_id_val)
                        .and(call_history::dsl::deleted_at.is_null())
                        .and(call_history::dsl::status.eq(CallStatus::Success)),
                )
                .select(sum(call_history::dsl::cost))
                .first(conn)
                .map_err(|e| BaseError::DatabaseFatal(Some(format!("Failed to sum cost: {}", e))))?;

            let attempted = total_calls + failed_calls;
            let success_rate = if attempted > 0 {
                total_calls as f64 / attempted as f64 * 100.0
            } else {
                0.0
            };

            Ok(UserCallStats {
                total_calls,
                failed_calls,
                total_tokens: total_tokens.unwrap_or(0),
                total_cost: total_cost.unwrap_or(0.0),
                success_rate,
            })
        })
    }

    /// Counts the user's non-deleted records for the deletion preview.
    pub fn count_active_for_user(user_id_val: &str) -> DbResult<i64> {
        let conn = &mut get_connection();
        db_execute!(conn, {
            call_history::table
                .filter(
                    call_history::dsl::user_id
                        .eq(user_id_val)
                        .and(call_history::dsl::deleted_at.is_null()),
                )
                .select(count_star())
                .first::<i64>(conn)
                .map_err(|e| {
                    BaseError::DatabaseFatal(Some(format!(
                        "Failed to count history for user {}: {}",
                        user_id_val, e
                    )))
                })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::test_support::{lock_test_db, seed_provider_and_model, seed_user};
    use crate::utils::ID_GENERATOR;

    fn seed_record(
        user_id: &str,
        status: CallStatus,
        total_tokens: Option<i32>,
        cost: Option<f64>,
        created_at: i64,
    ) -> CallHistory {
        let (provider, model) = seed_provider_and_model("hist");
        CallHistory::insert(&NewCallHistory {
            id: ID_GENERATOR.generate_id(),
            user_id: user_id.to_string(),
            provider_id: provider.id,
            model_id: model.id,
            prompt: "p".to_string(),
            response: "r".to_string(),
            parameters: "{}".to_string(),
            status,
            error_message: None,
            tokens_input: None,
            tokens_output: None,
            total_tokens,
            cost,
            created_at,
        })
        .unwrap()
    }

    #[test]
    fn listing_pages_newest_first() {
        let _guard = lock_test_db();
        let user_id = seed_user("hist-pages").id;
        let base = chrono::Utc::now().timestamp_millis();
        for offset in 0..3 {
            seed_record(&user_id, CallStatus::Success, None, None, base + offset);
        }

        let first_page = CallHistory::list_for_user(&user_id, 2, 0).unwrap();
        assert_eq!(first_page.len(), 2);
        assert_eq!(first_page[0].created_at, base + 2);
        assert_eq!(first_page[1].created_at, base + 1);

        let second_page = CallHistory::list_for_user(&user_id, 2, 2).unwrap();
        assert_eq!(second_page.len(), 1);
        assert_eq!(second_page[0].created_at, base);
    }

    #[test]
    fn stats_sum_successes_and_count_failures() {
        let _guard = lock_test_db();
        let user_id = seed_user("hist-stats").id;
        let now = chrono::Utc::now().timestamp_millis();
        seed_record(&user_id, CallStatus::Success, Some(10), Some(0.5), now);
        seed_record(&user_id, CallStatus::Success, Some(20), Some(1.5), now);
        seed_record(&user_id, CallStatus::Success, Some(5), None, now);
        // Failed calls never carry usage, and must not feed the sums.
        seed_record(&user_id, CallStatus::Error, None, None, now);

        let stats = CallHistory::stats_for_user(&user_id).unwrap();
        assert_eq!(stats.total_calls, 3);
        assert_eq!(stats.failed_calls, 1);
        assert_eq!(stats.total_tokens, 35);
        assert!((stats.total_cost - 2.0).abs() < f64::EPSILON);
        assert!((stats.success_rate - 75.0).abs() < f64::EPSILON);
    }

    #[test]
    fn stats_for_a_user_with_no_calls_are_zero() {
        let _guard = lock_test_db();
        let stats = CallHistory::stats_for_user("nobody").unwrap();
        assert_eq!(stats, UserCallStats::default());
    }
}
