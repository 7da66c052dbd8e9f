//! Public course metadata endpoint.

use axum::Json;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, Method};
use serde::Serialize;
use std::collections::HashMap;

use crate::access::{AccessLevel, RequiredAccess};
use crate::startup::AppState;
use service_core::error::AppError;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseInfoResponse {
    pub course: String,
    pub authenticated: bool,
    pub access: AccessSummary,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessSummary {
    pub is_owner: bool,
    pub is_admin: bool,
    pub is_regular_user: bool,
    pub has_any_access: bool,
}

/// Course metadata for the caller, anonymous visitors included on public
/// courses.
///
/// GET /courses/info
#[tracing::instrument(skip_all)]
pub async fn course_info(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Result<Json<CourseInfoResponse>, AppError> {
    let identity = state.identity.identify(&headers)?;
    let course = state
        .gate
        .authorize_public(
            &Method::GET,
            &query,
            None,
            &headers,
            &identity,
            &RequiredAccess::Always(AccessLevel::Any),
        )
        .await?;

    Ok(Json(CourseInfoResponse {
        authenticated: course.identity.is_authenticated(),
        access: AccessSummary {
            is_owner: course.facts.is_owner,
            is_admin: course.facts.is_admin,
            is_regular_user: course.facts.is_regular_user,
            has_any_access: course.facts.has_any_access,
        },
        course: course.course_name,
    }))
}
