use std::sync::Arc;

use axum::{
    extract::{
        multipart::{MultipartError, MultipartRejection},
        DefaultBodyLimit, MatchedPath, Multipart, State,
    },
    http::{Request, StatusCode},
    response::{IntoResponse, Response},
    routing, Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, info_span, warn};
use utoipa::{OpenApi, ToSchema};
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    storage::{self, Storage},
    upload::{self, Rejection, UploadRequest},
};

/// Name of the multipart field carrying the image.
pub const FILE_FIELD: &str = "file";

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Invalid file upload")]
    InvalidUpload(String),
    #[error("Invalid file type or extension")]
    InvalidType(#[from] Rejection),
    #[error("File too large")]
    TooLarge(#[source] MultipartError),
    #[error("Failed to read file")]
    Read(#[source] MultipartError),
    #[error("Failed to save file locally")]
    Save(#[from] storage::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Sorts a multipart failure by who caused it: an oversized or malformed body is the
    /// client's, anything else happened while reading it on our side.
    fn multipart(err: MultipartError) -> Self {
        let status = err.status();
        if status == StatusCode::PAYLOAD_TOO_LARGE {
            Self::TooLarge(err)
        } else if status.is_client_error() {
            Self::InvalidUpload(err.body_text())
        } else {
            Self::Read(err)
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Error::InvalidUpload(_) | Error::InvalidType(_) => StatusCode::BAD_REQUEST,
            Error::TooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Error::Read(_) | Error::Save(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn detail(&self) -> String {
        match self {
            Error::InvalidUpload(reason) => reason.clone(),
            Error::InvalidType(rejection) => rejection.to_string(),
            Error::TooLarge(err) | Error::Read(err) => err.body_text(),
            Error::Save(err) => err.to_string(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(%status, error = %self, detail = %self.detail(), "request failed");
        } else {
            warn!(%status, error = %self, detail = %self.detail(), "request rejected");
        }
        let body = ErrorBody {
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct Message {
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UploadResult {
    pub message: String,
    pub file_path: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    pub error: String,
}

/// Shape of the multipart form accepted by the upload routes, for the docs only.
#[derive(ToSchema)]
#[allow(dead_code)]
pub struct UploadForm {
    #[schema(value_type = String, format = Binary)]
    file: Vec<u8>,
}

#[derive(Clone)]
struct AppState {
    storage: Arc<dyn Storage>,
}

pub fn router(storage: Arc<dyn Storage>, max_upload_size: usize) -> Router {
    let trace_layer = TraceLayer::new_for_http().make_span_with(|request: &Request<_>| {
        let matched_path = request
            .extensions()
            .get::<MatchedPath>()
            .map(MatchedPath::as_str);

        info_span!(
            "http_request",
            method = ?request.method(),
            matched_path,
        )
    });
    let cors_layer = CorsLayer::new()
        .allow_headers(tower_http::cors::Any)
        .allow_methods(tower_http::cors::Any)
        .allow_origin(tower_http::cors::Any);
    let upload_route = routing::post(upload).layer(DefaultBodyLimit::max(max_upload_size));
    Router::new()
        .route("/", routing::get(root))
        .route("/uploads", upload_route.clone())
        // the web frontend posts here
        .route("/upload", upload_route)
        .with_state(AppState { storage })
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(cors_layer)
        .layer(trace_layer)
        .layer(CompressionLayer::new().gzip(true).deflate(true))
}

#[utoipa::path(
    get,
    path = "/",
    responses(
        (status = 200, description = "Service is up", body = Message),
    )
)]
async fn root() -> Json<Message> {
    Json(Message {
        message: "Welcome to the Face Match API".to_string(),
    })
}

/// Store one image under a generated name.
///
/// Also served at `POST /upload`, the path the web frontend posts to.
#[utoipa::path(
    post,
    path = "/uploads",
    request_body(content = UploadForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Image stored under a generated name", body = UploadResult),
        (status = 400, description = "Malformed upload, or type/extension not allowed", body = ErrorBody),
        (status = 413, description = "Body exceeds the configured size limit", body = ErrorBody),
        (status = 500, description = "Image could not be read or written", body = ErrorBody),
    )
)]
async fn upload(
    State(state): State<AppState>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResult>> {
    let mut multipart = multipart.map_err(|rejection| Error::InvalidUpload(rejection.body_text()))?;
    let field = loop {
        match multipart.next_field().await {
            Ok(Some(field)) => match field.name() {
                Some(FILE_FIELD) => break field,
                _ => continue,
            },
            Ok(None) => return Err(Error::InvalidUpload(format!("no `{FILE_FIELD}` field"))),
            Err(err) => return Err(Error::multipart(err)),
        }
    };

    let request = UploadRequest {
        file_name: field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| Error::InvalidUpload(format!("`{FILE_FIELD}` field is not a file")))?,
        content_type: field.content_type().map(str::to_string),
    };
    let extension = request.validate()?;

    let data = field
        .bytes()
        .await
        .map_err(Error::multipart)?;
    let size = data.len();

    let name = upload::stored_name(&extension);
    let path = state.storage.store(&name, data).await?;
    let file_path = path.display().to_string();
    info!(%file_path, size, original_name = %request.file_name, "stored upload");

    Ok(Json(UploadResult {
        message: "File uploaded successfully!".to_string(),
        file_path,
    }))
}

#[derive(OpenApi)]
#[openapi(
    paths(
        root,
        upload,
    ),
    components(schemas(Message, UploadResult, ErrorBody, UploadForm)),
    tags(
        (name = "face-match", description = "Image upload and storage")
    )
)]
struct ApiDoc;
