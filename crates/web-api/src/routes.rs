use std::time::Duration;

use application::{AuthenticateUserRequest, ImageUpload, RegisterUserRequest};
use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        Method, StatusCode,
    },
    routing::{get, patch, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use domain::{
    Conversation, ConversationDetail, ConversationId, ConversationSummary, Message, MessageId,
    MessagePage, User, UserId,
};
use serde::{Deserialize, Serialize};
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::Level;
use uuid::Uuid;
use validator::Validate;

use crate::{
    auth::{AuthUser, LoginResponse},
    error::ApiError,
    extract::{ApiJson, ApiPath, ApiQuery},
    state::AppState,
    websocket::websocket_upgrade,
};

/// multipart 头部等额外开销
const MULTIPART_OVERHEAD: usize = 64 * 1024;

#[derive(Debug, Deserialize, Validate)]
struct RegisterPayload {
    #[validate(length(min = 1, max = 50))]
    username: String,
    #[validate(length(min = 6, max = 128))]
    password: String,
}

#[derive(Debug, Deserialize)]
struct LoginPayload {
    username: String,
    password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateConversationPayload {
    peer_id: Uuid,
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    cursor: Option<i64>,
    limit: Option<u32>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct SendMessagePayload {
    #[serde(default)]
    #[validate(length(max = 4000))]
    body: String,
    #[validate(length(max = 2048))]
    image_url: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
struct ThemePayload {
    #[validate(length(min = 1, max = 32))]
    theme: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ReadResponse {
    conversation_id: ConversationId,
    read_at: DateTime<Utc>,
    updated: u64,
}

#[derive(Debug, Serialize)]
struct UploadResponse {
    url: String,
}

pub fn router(state: AppState) -> Router {
    let uploads = ServeDir::new(&state.uploads_dir);
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
        ])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .max_age(Duration::from_secs(3600));

    Router::new()
        .route("/health", get(health))
        .nest("/api/v1", api_routes(state.upload_limit))
        .nest_service("/uploads", uploads)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors)
        .with_state(state)
}

fn api_routes(upload_limit: usize) -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register_user))
        .route("/auth/login", post(login_user))
        .route(
            "/conversations",
            get(list_conversations).post(create_conversation),
        )
        .route(
            "/conversations/{id}",
            get(get_conversation).delete(delete_conversation),
        )
        .route(
            "/conversations/{id}/messages",
            get(list_messages).post(send_message),
        )
        .route("/conversations/{id}/read", post(mark_read))
        .route("/conversations/{id}/theme", patch(update_theme))
        .route(
            "/uploads",
            post(upload_image).layer(DefaultBodyLimit::max(upload_limit + MULTIPART_OVERHEAD)),
        )
        .route("/presence/online", get(online_users))
        .route("/ws", get(websocket_upgrade))
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn register_user(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<RegisterPayload>,
) -> Result<(StatusCode, Json<User>), ApiError> {
    payload.validate()?;
    let user = state
        .user_service
        .register(RegisterUserRequest {
            username: payload.username,
            password: payload.password,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(user)))
}

async fn login_user(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<LoginPayload>,
) -> Result<Json<LoginResponse>, ApiError> {
    let user = state
        .user_service
        .authenticate(AuthenticateUserRequest {
            username: payload.username,
            password: payload.password,
        })
        .await?;
    let token = state.jwt_service.generate_token(user.id)?;

    Ok(Json(LoginResponse { user, token }))
}

async fn list_conversations(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<Vec<ConversationSummary>>, ApiError> {
    let items = state
        .conversation_service
        .list_conversations(user_id)
        .await?;
    Ok(Json(items))
}

/// 已存在时返回 200，新建时返回 201
async fn create_conversation(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    ApiJson(payload): ApiJson<CreateConversationPayload>,
) -> Result<(StatusCode, Json<ConversationDetail>), ApiError> {
    let (detail, created) = state
        .conversation_service
        .open_conversation(user_id, UserId::from(payload.peer_id))
        .await?;
    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(detail)))
}

async fn get_conversation(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<ConversationDetail>, ApiError> {
    let detail = state
        .conversation_service
        .get_conversation(user_id, ConversationId::from(id))
        .await?;
    Ok(Json(detail))
}

async fn list_messages(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    ApiPath(id): ApiPath<i64>,
    ApiQuery(query): ApiQuery<HistoryQuery>,
) -> Result<Json<MessagePage>, ApiError> {
    let page = state
        .conversation_service
        .list_messages(
            user_id,
            ConversationId::from(id),
            query.cursor.map(MessageId::from),
            query.limit,
        )
        .await?;
    Ok(Json(page))
}

async fn send_message(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(payload): ApiJson<SendMessagePayload>,
) -> Result<(StatusCode, Json<Message>), ApiError> {
    payload.validate()?;
    let conversation_id = ConversationId::from(id);
    let _turn = state.dispatcher.sequence(conversation_id).await;
    let sent = state
        .conversation_service
        .send_message(user_id, conversation_id, payload.body, payload.image_url)
        .await?;

    state
        .publish(
            "message:new",
            state
                .dispatcher
                .publish_message(&sent.message, &sent.recipients)
                .await,
        )
        .await;
    Ok((StatusCode::CREATED, Json(sent.message)))
}

async fn mark_read(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<ReadResponse>, ApiError> {
    let outcome = state
        .conversation_service
        .mark_read(user_id, ConversationId::from(id))
        .await?;

    state
        .publish("message:read", state.dispatcher.publish_read(&outcome).await)
        .await;
    Ok(Json(ReadResponse {
        conversation_id: outcome.conversation_id,
        read_at: outcome.read_at,
        updated: outcome.updated,
    }))
}

async fn update_theme(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(payload): ApiJson<ThemePayload>,
) -> Result<Json<Conversation>, ApiError> {
    payload.validate()?;
    let conversation = state
        .conversation_service
        .update_theme(user_id, ConversationId::from(id), payload.theme)
        .await?;

    state
        .publish(
            "theme:updated",
            state.dispatcher.publish_theme(&conversation).await,
        )
        .await;
    Ok(Json(conversation))
}

async fn delete_conversation(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<StatusCode, ApiError> {
    let conversation_id = ConversationId::from(id);
    let participants = state
        .conversation_service
        .delete_conversation(user_id, conversation_id)
        .await?;

    state
        .publish(
            "conversation:deleted",
            state
                .dispatcher
                .publish_deleted(conversation_id, &participants)
                .await,
        )
        .await;
    Ok(StatusCode::NO_CONTENT)
}

/// 只读取名为 `image` 的字段
async fn upload_image(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResponse>), ApiError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("image") {
            continue;
        }
        let file_name = field.file_name().map(str::to_owned);
        let content_type = field.content_type().map(str::to_owned);
        let bytes = field.bytes().await?;

        let url = state
            .image_store
            .store(ImageUpload {
                file_name,
                content_type,
                bytes: bytes.to_vec(),
            })
            .await
            .map_err(application::ApplicationError::from)?;

        tracing::info!(user_id = %user_id, url = %url, "图片上传成功");
        return Ok((StatusCode::CREATED, Json(UploadResponse { url })));
    }

    Err(ApiError::bad_request("missing multipart field `image`"))
}

async fn online_users(
    State(state): State<AppState>,
    _user: AuthUser,
) -> Result<Json<Vec<UserId>>, ApiError> {
    let users = state.dispatcher.presence().online_users().await?;
    Ok(Json(users))
}
