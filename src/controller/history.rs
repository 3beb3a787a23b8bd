use axum::{
    extract::{Path, Query},
    routing::get,
    Extension, Router,
};
use serde::Deserialize;

use crate::database::history::{CallHistory, UserCallStats};
use crate::database::ListResult;
use crate::utils::auth::SessionUser;
use crate::utils::HttpResult;

use super::BaseError;

const DEFAULT_PAGE_SIZE: i64 = 20;
const MAX_PAGE_SIZE: i64 = 100;

#[derive(Deserialize, Default)]
struct PageQuery {
    page: Option<i64>,
    page_size: Option<i64>,
}

async fn list_history(
    Extension(session): Extension<SessionUser>,
    Query(query): Query<PageQuery>,
) -> Result<HttpResult<ListResult<CallHistory>>, BaseError> {
    let page = query.page.unwrap_or(1).max(1);
    let page_size = query
        .page_size
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);
    let offset = (page - 1) * page_size;

    let list = CallHistory::list_for_user(&session.user_id, page_size, offset)?;
    let total = CallHistory::count_active_for_user(&session.user_id)?;
    Ok(HttpResult::new(ListResult {
        total,
        page,
        page_size,
        list,
    }))
}

async fn get_history(
    Extension(session): Extension<SessionUser>,
    Path(id): Path<i64>,
) -> Result<HttpResult<CallHistory>, BaseError> {
    let record = CallHistory::get_by_id(id)?;
    if record.user_id != session.user_id {
        return Err(BaseError::NotFound(Some(format!(
            "History record with id {} not found",
            id
        ))));
    }
    Ok(HttpResult::new(record))
}

async fn user_stats(
    Path(user_id): Path<String>,
) -> Result<HttpResult<UserCallStats>, BaseError> {
    Ok(HttpResult::new(CallHistory::stats_for_user(&user_id)?))
}

pub fn create_history_router() -> Router {
    Router::new()
        .route("/history", get(list_history))
        .route("/history/{id}", get(get_history))
        .route("/history/user/{user_id}/stats", get(user_stats))
}
