use diesel::{
    r2d2::{ConnectionManager, Pool, PooledConnection},
    Connection, PgConnection, SqliteConnection,
};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use once_cell::sync::Lazy;
use std::fs::File;
use std::path::Path;

use crate::{config::CONFIG, controller::BaseError};
use serde::Serialize;

pub mod history;
pub mod hyperparameter;
pub mod model;
pub mod provider;
pub mod user;

pub enum DbType {
    Postgres,
    Sqlite,
}

pub enum DbPool {
    Postgres(Pool<ConnectionManager<PgConnection>>),
    Sqlite(Pool<ConnectionManager<SqliteConnection>>),
}

pub enum DbConnection {
    Postgres(PooledConnection<ConnectionManager<PgConnection>>),
    Sqlite(PooledConnection<ConnectionManager<SqliteConnection>>),
}

pub fn get_connection() -> DbConnection {
    match &*DB_POOL {
        DbPool::Postgres(pool) => DbConnection::Postgres(pool.get().unwrap()),
        DbPool::Sqlite(pool) => DbConnection::Sqlite(pool.get().unwrap()),
    }
}

fn parse_db_type(db_url: &str) -> DbType {
    if db_url.starts_with("postgres") {
        DbType::Postgres
    } else {
        DbType::Sqlite
    }
}

impl DbPool {
    pub fn establish() -> Self {
        // Re-read the env var at pool-build time: a DB_URL exported after the
        // config was first loaded still has to win.
        let db_url =
            std::env::var("DB_URL").unwrap_or_else(|_| CONFIG.db_url.clone());
        match parse_db_type(&db_url) {
            DbType::Postgres => DbPool::Postgres(init_pg_pool(&db_url)),
            DbType::Sqlite => DbPool::Sqlite(init_sqlite_pool(&db_url)),
        }
    }
}

#[path = "../schema/sqlite.rs"]
pub mod _sqlite_schema;

#[path = "../schema/postgres.rs"]
pub mod _postgres_schema;

// Generates the plain domain struct plus one diesel-derived twin per backend
// (`XDb` in `_postgres_model` / `_sqlite_model`), with `from_db`/`to_db`
// conversions between them.
#[macro_export]
macro_rules! db_object {
    (
        $(
            $( #[$attr:meta] )*
            pub struct $name:ident {
                $( $( #[$field_attr:meta] )* $vis:vis $field:ident : $typ:ty ),+
                $(,)?
            }
        )+
    ) => {
        $(
            #[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
            pub struct $name { $( $vis $field : $typ, )+ }
        )+

        pub mod _postgres_model {
            $( $crate::db_object! { @expand postgres |  $( #[$attr] )* | $name |  $( $( #[$field_attr] )* $field : $typ ),+ } )+
        }
        pub mod _sqlite_model {
            $( $crate::db_object! { @expand sqlite |  $( #[$attr] )* | $name |  $( $( #[$field_attr] )* $field : $typ ),+ } )+
        }
    };
    ( @expand $db_type:ident | $( #[$attr:meta] )* | $name:ident | $( $( #[$field_attr:meta] )* $vis:vis $field:ident : $typ:ty),+) => {
        paste::paste! {
            #[allow(unused_imports)] use super::*;
            #[allow(unused_imports)] use crate::database::[<_ $db_type _schema>]::*;
            #[allow(unused_imports)] use diesel::prelude::*;

            $( #[$attr] )*
            pub struct [<$name Db>] { $(
                $( #[$field_attr] )* $vis $field : $typ,
            )+ }

            impl [<$name Db>] {
                #[inline(always)]
                pub fn from_db(self) -> super::$name {
                    super::$name { $( $field: self.$field, )+ }
                }

                #[inline(always)]
                pub fn to_db(x: &super::$name) -> Self {
                    Self {
                        $( $field: x.$field.clone(), )+
                    }
                }
            }
        }
    }
}

// Runs a block against whichever backend the pool was built for, with the
// matching schema and model twins in scope.
#[macro_export]
macro_rules! db_execute {
    ($conn:ident, $block:block) => {
        match $conn {
            crate::database::DbConnection::Postgres($conn) => {
                use crate::database::_postgres_schema::*;
                #[allow(unused_imports)]
                use _postgres_model::*;
                #[allow(unused_imports)]
                use diesel::prelude::*;

                $block
            }
            crate::database::DbConnection::Sqlite($conn) => {
                use crate::database::_sqlite_schema::*;
                #[allow(unused_imports)]
                use _sqlite_model::*;
                #[allow(unused_imports)]
                use diesel::prelude::*;

                $block
            }
        }
    };
}

static DB_POOL: Lazy<DbPool> = Lazy::new(DbPool::establish);
const SQLITE_MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations/sqlite");
const POSTGRES_MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations/postgres");

fn init_sqlite_pool(db_url: &str) -> Pool<ConnectionManager<SqliteConnection>> {
    let db_path = Path::new(db_url);
    if !db_path.exists() {
        if let Some(parent_dir) = db_path.parent() {
            if !parent_dir.exists() {
                std::fs::create_dir_all(parent_dir).expect("failed to create database directory");
            }
        }
        File::create(db_path).expect("failed to create database file");
    }

    let mut connection =
        SqliteConnection::establish(db_url).expect("failed to establish migration connection");
    connection
        .run_pending_migrations(SQLITE_MIGRATIONS)
        .expect("failed to run migrations");

    let manager = ConnectionManager::<SqliteConnection>::new(db_url);
    Pool::builder()
        .test_on_check_out(true)
        .max_size(5)
        .build(manager)
        .expect("Failed to create pool.")
}

fn init_pg_pool(db_url: &str) -> Pool<ConnectionManager<PgConnection>> {
    let mut connection =
        PgConnection::establish(db_url).expect("failed to establish migration connection");
    connection
        .run_pending_migrations(POSTGRES_MIGRATIONS)
        .expect("failed to run migrations");

    let manager = ConnectionManager::<PgConnection>::new(db_url);
    Pool::builder()
        .max_size(5)
        .build(manager)
        .expect("Failed to create pool.")
}

pub type DbResult<T> = Result<T, BaseError>;

#[derive(Serialize)]
pub struct ListResult<T> {
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
    pub list: Vec<T>,
}

#[cfg(test)]
pub mod test_support {
    use chrono::Utc;
    use once_cell::sync::Lazy;
    use std::sync::{Mutex, MutexGuard, Once};
    use uuid::Uuid;

    use crate::database::model::{Model, NewModel};
    use crate::database::provider::{NewProvider, Provider};
    use crate::database::user::{NewUser, User};
    use crate::utils::ID_GENERATOR;

    static INIT: Once = Once::new();
    // DB tests share one sqlite file and must not interleave.
    static DB_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

    /// Points the global pool at a throwaway sqlite database and serialises
    /// access to it. Must be called before the first `get_connection()`.
    pub fn lock_test_db() -> MutexGuard<'static, ()> {
        INIT.call_once(|| {
            let dir = tempfile::tempdir().expect("failed to create temp dir");
            let db_path = dir.path().join("modelgate-test.db");
            std::env::set_var("DB_URL", db_path.to_str().unwrap());
            // Leak the tempdir so the file outlives every test.
            std::mem::forget(dir);
        });
        DB_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Inserts a user row so fixtures that reference one satisfy the
    /// foreign keys the schema declares.
    pub fn seed_user(tag: &str) -> User {
        let now = Utc::now().timestamp_millis();
        let suffix = ID_GENERATOR.generate_id();
        User::create(&NewUser {
            id: Uuid::new_v4().to_string(),
            username: format!("{}-{}", tag, suffix),
            email: format!("{}-{}@example.com", tag, suffix),
            is_active: true,
            created_at: now,
            updated_at: now,
        })
        .unwrap()
    }

    /// Inserts a provider and one enabled model under it.
    pub fn seed_provider_and_model(tag: &str) -> (Provider, Model) {
        let provider = seed_provider(tag);
        let model = seed_model_for(&provider, tag);
        (provider, model)
    }

    pub fn seed_provider(tag: &str) -> Provider {
        let now = Utc::now().timestamp_millis();
        Provider::create(&NewProvider {
            id: ID_GENERATOR.generate_id(),
            name: format!("upstream-{}-{}", tag, ID_GENERATOR.generate_id()),
            provider_type: "grok".to_string(),
            endpoint: "https://example.invalid/v1".to_string(),
            api_key: "k".to_string(),
            is_enabled: true,
            created_at: now,
            updated_at: now,
        })
        .unwrap()
    }

    pub fn seed_model_for(provider: &Provider, tag: &str) -> Model {
        let now = Utc::now().timestamp_millis();
        Model::create(&NewModel {
            id: ID_GENERATOR.generate_id(),
            provider_id: provider.id,
            name: format!("model-{}-{}", tag, ID_GENERATOR.generate_id()),
            is_enabled: true,
            created_at: now,
            updated_at: now,
        })
        .unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::lock_test_db;
    use std::path::Path;

    #[test]
    fn pool_uses_the_db_url_from_the_environment() {
        let _guard = lock_test_db();
        // Unrelated tests may touch the config before any pool exists; the
        // pool must still land on the redirected DB_URL.
        let _ = &*crate::config::CONFIG;
        let _conn = super::get_connection();
        let db_url = std::env::var("DB_URL").unwrap();
        assert!(Path::new(&db_url).exists());
    }
}
