use axum::extract::{multipart::MultipartError, Multipart, Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::analysis::{
    DeleteResponse, ListQuery, ListResponse, ResultView, StatusView, SubmitRequest,
    SubmitResponse,
};
use crate::models::job::JobStatus;
use crate::services::analysis::AnalysisError;

/// POST /api/v1/analyses: Upload a lab report PDF for analysis.
///
/// Multipart fields: `file` (required), `directive`, `submitter_id`.
#[tracing::instrument(skip(state, multipart))]
pub async fn submit_analysis(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<SubmitResponse>), AnalysisError> {
    let mut file: Option<Vec<u8>> = None;
    let mut request = SubmitRequest::default();
    let limit = state.settings.max_upload_bytes;
    let read_error = move |e| multipart_error(e, limit);

    while let Some(field) = multipart.next_field().await.map_err(read_error)? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                request.filename = field.file_name().map(str::to_string);
                let data = field.bytes().await.map_err(read_error)?;
                file = Some(data.to_vec());
            }
            Some("directive") => {
                request.directive = Some(field.text().await.map_err(read_error)?);
            }
            Some("submitter_id") => {
                let text = field.text().await.map_err(read_error)?;
                request.submitter_id = Some(text).filter(|s| !s.trim().is_empty());
            }
            _ => {}
        }
    }

    let data = file.ok_or_else(|| AnalysisError::Validation("missing 'file' field".to_string()))?;
    let response = state.analyses().submit(&data, request).await?;

    let status = match response.status {
        JobStatus::Queued => StatusCode::ACCEPTED,
        _ => StatusCode::OK,
    };
    Ok((status, Json(response)))
}

fn multipart_error(err: MultipartError, limit: usize) -> AnalysisError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return AnalysisError::TooLarge { limit };
    }
    AnalysisError::Validation(format!("malformed multipart body: {}", err.body_text()))
}

/// GET /api/v1/analyses/{id}
pub async fn get_analysis_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<StatusView>, AnalysisError> {
    Ok(Json(state.analyses().status(id).await?))
}

/// GET /api/v1/analyses/{id}/result
pub async fn get_analysis_result(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ResultView>, AnalysisError> {
    Ok(Json(state.analyses().result(id).await?))
}

/// GET /api/v1/analyses/{id}/report: download the aggregate document.
pub async fn download_report(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, AnalysisError> {
    let report = state.analyses().report(id).await?;
    Ok((
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", report.filename),
            ),
        ],
        report.content,
    )
        .into_response())
}

/// GET /api/v1/analyses?submitter_id=&offset=&limit=
pub async fn list_analyses(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ListResponse>, AnalysisError> {
    Ok(Json(state.analyses().list(query).await?))
}

/// DELETE /api/v1/analyses/{id}
pub async fn delete_analysis(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<DeleteResponse>, AnalysisError> {
    Ok(Json(state.analyses().delete(id).await?))
}
