use axum::{
    Json,
    extract::State,
};
use tracing::info;

use convene_db::Store;
use convene_db::models::NewSearchRequest;
use convene_types::api::{CreatedResponse, SearchRequestBody, SearchRequestView};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

pub fn create_search_request(store: &dyn Store, body: &SearchRequestBody) -> ApiResult<i64> {
    let user_id = body.user_id.trim();
    if user_id.is_empty() {
        return Err(ApiError::invalid("userId is required"));
    }

    let id = store.create_search_request(&NewSearchRequest {
        user_id: user_id.to_string(),
        date: body.date.clone(),
        start_time: body.start.clone(),
        end_time: body.end.clone(),
        budget: body.budget,
        kind: body.kind.clone(),
        category: body.category.clone(),
        language: body.language.clone(),
    })?;
    info!("Search request {} from {}", id, user_id);
    Ok(id)
}

pub fn list_search_requests(store: &dyn Store) -> ApiResult<Vec<SearchRequestView>> {
    Ok(store
        .list_search_requests()?
        .into_iter()
        .map(|r| SearchRequestView {
            id: r.id,
            body: SearchRequestBody {
                user_id: r.user_id,
                date: r.date,
                start: r.start_time,
                end: r.end_time,
                budget: r.budget,
                kind: r.kind,
                category: r.category,
                language: r.language,
            },
        })
        .collect())
}

// -- Handlers --

pub async fn create(
    State(state): State<AppState>,
    Json(body): Json<SearchRequestBody>,
) -> ApiResult<Json<CreatedResponse>> {
    let id = state
        .run(move |store| create_search_request(store, &body))
        .await?;
    Ok(Json(CreatedResponse {
        id,
        message: "Search request created".into(),
    }))
}

pub async fn list(State(state): State<AppState>) -> ApiResult<Json<Vec<SearchRequestView>>> {
    let requests = state.run(|store| list_search_requests(store)).await?;
    Ok(Json(requests))
}
