//! `/filesystem` handlers. Each one runs its storage call on the blocking
//! pool through the configured [`StorageService`](crate::service::StorageService).

use axum::body::Bytes;
use axum::extract::rejection::{BytesRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use protocol::messages::{
    CdRequest, ChunkQuery, CompleteUploadResponse, DeleteRequest, LsRequest, LsResponse,
    MessageResponse, MkdirRequest, PathResponse, RenameRequest, StartDownloadRequest,
    StartDownloadResponse, StartUploadRequest, StateResponse, TransferRequest,
};

use super::error::{run_blocking, ApiJson, ApiResult};
use super::AppState;
use crate::files::UploadOutcome;
use crate::service::RequestContext;

fn path_response(path: String, message: &str) -> Json<PathResponse> {
    Json(PathResponse {
        path,
        message: message.to_string(),
    })
}

fn message(message: &str) -> Json<MessageResponse> {
    Json(MessageResponse {
        message: message.to_string(),
    })
}

pub async fn state(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> ApiResult<Json<StateResponse>> {
    let service = state.service.clone();
    let info = run_blocking(move || service.state(&ctx)).await?;
    Ok(Json(StateResponse { info }))
}

pub async fn ls(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    ApiJson(request): ApiJson<LsRequest>,
) -> ApiResult<Json<LsResponse>> {
    let service = state.service.clone();
    let entries = run_blocking(move || service.list(&ctx, &request.dir_path)).await?;
    Ok(Json(LsResponse {
        empty: entries.is_empty(),
        entries,
    }))
}

pub async fn cd(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    ApiJson(request): ApiJson<CdRequest>,
) -> ApiResult<Json<PathResponse>> {
    let service = state.service.clone();
    let path = run_blocking(move || service.change_dir(&ctx, &request.path)).await?;
    Ok(path_response(path, "directory changed successfully"))
}

pub async fn mkdir(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    ApiJson(request): ApiJson<MkdirRequest>,
) -> ApiResult<Json<PathResponse>> {
    let service = state.service.clone();
    let path = run_blocking(move || service.mkdir(&ctx, &request.path, &request.dir_name)).await?;
    Ok(path_response(path, "directory created successfully"))
}

pub async fn rename(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    ApiJson(request): ApiJson<RenameRequest>,
) -> ApiResult<Json<PathResponse>> {
    let service = state.service.clone();
    let path = run_blocking(move || {
        service.rename(&ctx, &request.dir_path, &request.old_name, &request.new_name)
    })
    .await?;
    Ok(path_response(path, "renamed successfully"))
}

pub async fn move_entry(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    ApiJson(request): ApiJson<TransferRequest>,
) -> ApiResult<Json<PathResponse>> {
    let service = state.service.clone();
    let path = run_blocking(move || {
        service.move_entry(
            &ctx,
            &request.src_dir_path,
            &request.file_name,
            &request.dest_dir_path,
        )
    })
    .await?;
    Ok(path_response(path, "moved successfully"))
}

pub async fn copy(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    ApiJson(request): ApiJson<TransferRequest>,
) -> ApiResult<Json<PathResponse>> {
    let service = state.service.clone();
    let path = run_blocking(move || {
        service.copy(
            &ctx,
            &request.src_dir_path,
            &request.file_name,
            &request.dest_dir_path,
        )
    })
    .await?;
    Ok(path_response(path, "copied successfully"))
}

pub async fn delete(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    ApiJson(request): ApiJson<DeleteRequest>,
) -> ApiResult<Json<PathResponse>> {
    let service = state.service.clone();
    let path =
        run_blocking(move || service.delete(&ctx, &request.dir_path, &request.file_name)).await?;
    Ok(path_response(path, "deleted successfully"))
}

pub async fn start_upload(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    ApiJson(request): ApiJson<StartUploadRequest>,
) -> ApiResult<Json<MessageResponse>> {
    let service = state.service.clone();
    run_blocking(move || {
        service.start_upload(&ctx, &request.location, &request.file_name, request.chunks_num)
    })
    .await?;
    Ok(message("upload started successfully"))
}

pub async fn upload_chunk(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    query: Result<Query<ChunkQuery>, QueryRejection>,
    body: Result<Bytes, BytesRejection>,
) -> ApiResult<Json<MessageResponse>> {
    let Query(ChunkQuery { id }) = query?;
    let body = body?;
    let service = state.service.clone();
    run_blocking(move || service.upload_chunk(&ctx, id, &body)).await?;
    Ok(message("chunk uploaded successfully"))
}

pub async fn complete_upload(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> ApiResult<Json<CompleteUploadResponse>> {
    let service = state.service.clone();
    let outcome = run_blocking(move || service.complete_upload(&ctx)).await?;
    let message = outcome.message().to_string();
    let missed_chunks = match outcome {
        UploadOutcome::Missing(missing) => missing,
        UploadOutcome::Completed(_) => Vec::new(),
    };
    Ok(Json(CompleteUploadResponse {
        missed_chunks,
        message,
    }))
}

pub async fn start_download(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    ApiJson(request): ApiJson<StartDownloadRequest>,
) -> ApiResult<Json<StartDownloadResponse>> {
    let service = state.service.clone();
    let chunks_num =
        run_blocking(move || service.start_download(&ctx, &request.location, &request.file_name))
            .await?;
    Ok(Json(StartDownloadResponse {
        chunks_num,
        message: "download started successfully".to_string(),
    }))
}

pub async fn download_chunk(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    query: Result<Query<ChunkQuery>, QueryRejection>,
) -> ApiResult<Response> {
    let Query(ChunkQuery { id }) = query?;
    let service = state.service.clone();
    let chunk = run_blocking(move || service.download_chunk(&ctx, id)).await?;
    Ok(([(CONTENT_TYPE, "application/octet-stream")], chunk).into_response())
}
