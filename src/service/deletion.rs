use chrono::Utc;
use log::{info, warn};
use serde::Serialize;

use crate::controller::BaseError;
use crate::database::history::CallHistory;
use crate::database::hyperparameter::HyperparameterConfig;
use crate::database::user::User;
use crate::database::DbResult;

pub const RETENTION_DAYS: i64 = 7;

const MILLIS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

fn retention_millis() -> i64 {
    RETENTION_DAYS * MILLIS_PER_DAY
}

#[derive(Serialize, Debug)]
pub struct DeletionPreview {
    pub user_id: String,
    pub username: String,
    pub config_count: i64,
    pub history_count: i64,
    pub retention_days: i64,
}

#[derive(Serialize, Debug)]
pub struct DeletionReceipt {
    pub user_id: String,
    pub deleted_at: i64,
    pub recovery_deadline: i64,
    pub configs_deleted: i64,
    pub history_deleted: i64,
}

#[derive(Serialize, Debug)]
pub struct RestoreReceipt {
    pub user_id: String,
    pub configs_restored: i64,
    pub history_restored: i64,
}

#[derive(Serialize, Debug)]
pub struct SoftDeletedAccount {
    pub user_id: String,
    pub username: String,
    pub email: String,
    pub deleted_at: i64,
    pub recovery_deadline: i64,
    pub is_expired: bool,
}

/// What a deletion would take with it, without touching anything.
pub fn deletion_preview(user_id: &str) -> DbResult<DeletionPreview> {
    let user = User::get_by_id_any(user_id)?
        .ok_or_else(|| BaseError::NotFound(Some(format!("User {} not found", user_id))))?;
    Ok(DeletionPreview {
        config_count: HyperparameterConfig::count_active_for_user(&user.id)?,
        history_count: CallHistory::count_active_for_user(&user.id)?,
        user_id: user.id,
        username: user.username,
        retention_days: RETENTION_DAYS,
    })
}

/// Marks the account and everything it owns with one shared deletion stamp.
/// Deleting an already-deleted account is a no-op that reports the original
/// stamp, so repeat calls never extend the recovery window.
pub fn soft_delete_user(user_id: &str) -> DbResult<DeletionReceipt> {
    let user = User::get_by_id_any(user_id)?
        .ok_or_else(|| BaseError::NotFound(Some(format!("User {} not found", user_id))))?;

    if let Some(stamp) = user.deleted_at {
        warn!("user {} is already soft-deleted, leaving stamp as-is", user_id);
        return Ok(DeletionReceipt {
            user_id: user.id,
            deleted_at: stamp,
            recovery_deadline: stamp + retention_millis(),
            configs_deleted: 0,
            history_deleted: 0,
        });
    }

    let stamp = Utc::now().timestamp_millis();
    let (configs_deleted, history_deleted) = User::soft_delete_cascade(&user.id, stamp)?;
    info!(
        "soft-deleted user {} ({} configs, {} history rows)",
        user.id, configs_deleted, history_deleted
    );
    Ok(DeletionReceipt {
        user_id: user.id,
        deleted_at: stamp,
        recovery_deadline: stamp + retention_millis(),
        configs_deleted: configs_deleted as i64,
        history_deleted: history_deleted as i64,
    })
}

/// Undoes a soft deletion inside the recovery window. Only rows that carry
/// the account's exact deletion stamp come back, so anything the user had
/// deleted on its own beforehand stays deleted.
pub fn restore_user(user_id: &str) -> DbResult<RestoreReceipt> {
    let user = User::get_by_id_any(user_id)?
        .ok_or_else(|| BaseError::NotFound(Some(format!("User {} not found", user_id))))?;

    let stamp = user.deleted_at.ok_or_else(|| {
        BaseError::NotDeleted(Some(format!("User {} is not deleted", user_id)))
    })?;

    if Utc::now().timestamp_millis() > stamp + retention_millis() {
        return Err(BaseError::RecoveryWindowExpired(Some(format!(
            "Recovery window for user {} expired {} days after deletion",
            user_id, RETENTION_DAYS
        ))));
    }

    let (configs_restored, history_restored) = User::restore_cascade(&user.id, stamp)?;
    info!(
        "restored user {} ({} configs, {} history rows)",
        user.id, configs_restored, history_restored
    );
    Ok(RestoreReceipt {
        user_id: user.id,
        configs_restored: configs_restored as i64,
        history_restored: history_restored as i64,
    })
}

/// Hard-deletes every account whose recovery window has lapsed.
pub fn purge_expired() -> DbResult<Vec<String>> {
    let cutoff = Utc::now().timestamp_millis() - retention_millis();
    let expired = User::list_deleted_before(cutoff)?;
    let mut purged = Vec::with_capacity(expired.len());
    for user in expired {
        User::purge(&user.id)?;
        info!("purged expired user {}", user.id);
        purged.push(user.id);
    }
    Ok(purged)
}

/// Every account currently in the recovery window (or past it, flagged).
pub fn list_soft_deleted() -> DbResult<Vec<SoftDeletedAccount>> {
    let now = Utc::now().timestamp_millis();
    let users = User::list_soft_deleted()?;
    Ok(users
        .into_iter()
        .filter_map(|user| {
            let deleted_at = user.deleted_at?;
            let recovery_deadline = deleted_at + retention_millis();
            Some(SoftDeletedAccount {
                user_id: user.id,
                username: user.username,
                email: user.email,
                deleted_at,
                recovery_deadline,
                is_expired: now > recovery_deadline,
            })
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::history::NewCallHistory;
    use crate::database::hyperparameter::NewHyperparameterConfig;
    use crate::database::test_support::{lock_test_db, seed_provider_and_model, seed_user};
    use crate::schema::enum_def::CallStatus;
    use crate::utils::ID_GENERATOR;

    fn seed_config(user_id: &str) -> HyperparameterConfig {
        let now = Utc::now().timestamp_millis();
        let (_, model) = seed_provider_and_model("del-config");
        HyperparameterConfig::create(&NewHyperparameterConfig {
            id: ID_GENERATOR.generate_id(),
            user_id: user_id.to_string(),
            model_id: model.id,
            parameters: r#"{"temperature":0.2}"#.to_string(),
            description: None,
            is_default: false,
            created_at: now,
            updated_at: now,
        })
        .unwrap()
    }

    fn seed_history(user_id: &str) -> CallHistory {
        let (provider, model) = seed_provider_and_model("del-history");
        CallHistory::insert(&NewCallHistory {
            id: ID_GENERATOR.generate_id(),
            user_id: user_id.to_string(),
            provider_id: provider.id,
            model_id: model.id,
            prompt: "p".to_string(),
            response: "r".to_string(),
            parameters: "{}".to_string(),
            status: CallStatus::Success,
            error_message: None,
            tokens_input: Some(1),
            tokens_output: Some(1),
            total_tokens: Some(2),
            cost: None,
            created_at: Utc::now().timestamp_millis(),
        })
        .unwrap()
    }

    fn expired_stamp() -> i64 {
        Utc::now().timestamp_millis() - retention_millis() - MILLIS_PER_DAY
    }

    #[test]
    fn delete_then_restore_round_trips_owned_data() {
        let _guard = lock_test_db();
        let user = seed_user("roundtrip");
        seed_config(&user.id);
        seed_history(&user.id);

        let receipt = soft_delete_user(&user.id).unwrap();
        assert_eq!(receipt.configs_deleted, 1);
        assert_eq!(receipt.history_deleted, 1);
        assert!(User::get_active_by_id(&user.id).unwrap().is_none());
        let dormant = User::get_by_id_any(&user.id).unwrap().unwrap();
        assert!(!dormant.is_active);
        assert_eq!(CallHistory::count_active_for_user(&user.id).unwrap(), 0);

        let restored = restore_user(&user.id).unwrap();
        assert_eq!(restored.configs_restored, 1);
        assert_eq!(restored.history_restored, 1);
        let revived = User::get_active_by_id(&user.id).unwrap().unwrap();
        assert!(revived.is_active);
        assert_eq!(CallHistory::count_active_for_user(&user.id).unwrap(), 1);
    }

    #[test]
    fn repeat_delete_keeps_the_original_stamp() {
        let _guard = lock_test_db();
        let user = seed_user("repeat");
        let first = soft_delete_user(&user.id).unwrap();
        let second = soft_delete_user(&user.id).unwrap();
        assert_eq!(second.deleted_at, first.deleted_at);
        assert_eq!(second.configs_deleted, 0);
    }

    #[test]
    fn restore_rejects_an_active_account() {
        let _guard = lock_test_db();
        let user = seed_user("active");
        let err = restore_user(&user.id).unwrap_err();
        assert!(matches!(err, BaseError::NotDeleted(_)));
    }

    #[test]
    fn restore_leaves_independently_deleted_rows_alone() {
        let _guard = lock_test_db();
        let user = seed_user("partial");
        let kept = seed_config(&user.id);
        let gone = seed_config(&user.id);
        HyperparameterConfig::soft_delete(gone.id, &user.id).unwrap();

        soft_delete_user(&user.id).unwrap();
        let restored = restore_user(&user.id).unwrap();
        assert_eq!(restored.configs_restored, 1);

        let active = HyperparameterConfig::list_for_user(&user.id).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, kept.id);
    }

    #[test]
    fn expired_accounts_cannot_be_restored_and_get_purged() {
        let _guard = lock_test_db();
        let user = seed_user("expired");
        seed_history(&user.id);
        User::soft_delete_cascade(&user.id, expired_stamp()).unwrap();

        let err = restore_user(&user.id).unwrap_err();
        assert!(matches!(err, BaseError::RecoveryWindowExpired(_)));

        let purged = purge_expired().unwrap();
        assert!(purged.contains(&user.id));
        assert!(User::get_by_id_any(&user.id).unwrap().is_none());
        let err = restore_user(&user.id).unwrap_err();
        assert!(matches!(err, BaseError::NotFound(_)));
    }

    #[test]
    fn preview_reports_zero_after_deletion() {
        let _guard = lock_test_db();
        let user = seed_user("preview");
        seed_config(&user.id);
        seed_history(&user.id);

        let before = deletion_preview(&user.id).unwrap();
        assert_eq!(before.config_count, 1);
        assert_eq!(before.history_count, 1);
        assert_eq!(before.retention_days, RETENTION_DAYS);

        soft_delete_user(&user.id).unwrap();
        let after = deletion_preview(&user.id).unwrap();
        assert_eq!(after.config_count, 0);
        assert_eq!(after.history_count, 0);

        // A bystander with no data of their own previews clean.
        let bystander = seed_user("bystander");
        let untouched = deletion_preview(&bystander.id).unwrap();
        assert_eq!(untouched.config_count, 0);
        assert_eq!(untouched.history_count, 0);
    }

    #[test]
    fn listing_flags_expired_accounts() {
        let _guard = lock_test_db();
        let user = seed_user("listing");
        User::soft_delete_cascade(&user.id, expired_stamp()).unwrap();

        let listed = list_soft_deleted().unwrap();
        let entry = listed
            .iter()
            .find(|account| account.user_id == user.id)
            .unwrap();
        assert!(entry.is_expired);
        assert_eq!(
            entry.recovery_deadline,
            entry.deleted_at + retention_millis()
        );
    }
}
