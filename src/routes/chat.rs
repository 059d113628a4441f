use actix_web::{delete, get, post, put, web, Error, HttpResponse};
use async_openai::config::OpenAIConfig;
use async_openai::types::{
    ChatCompletionRequestAssistantMessage, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage,
    ChatCompletionRequestUserMessageContent, CreateChatCompletionRequest,
};
use async_openai::Client;
use futures::TryStreamExt;
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

use crate::auth::RequestUser;
use crate::models::{Conversation, Message};
use crate::prompts::Prompts;
use crate::types::{AutorenameConversationRequest, UpdateConversationRequest};
use crate::upstream;
use crate::AppState;

/// Messages kept when forwarding history upstream.
const HISTORY_LIMIT: usize = 7;

/// Pass-through relay: injects the advisor system instruction, enforces the
/// server's upstream key, and returns the upstream SSE byte stream unmodified.
#[post("/chat")]
pub async fn chat(
    app_state: web::Data<Arc<AppState>>,
    user: RequestUser,
    req_body: web::Json<CreateChatCompletionRequest>,
) -> Result<HttpResponse, Error> {
    let mut request_args = req_body.into_inner();

    if request_args.messages.is_empty() {
        return Err(actix_web::error::ErrorBadRequest(
            "At least one message is required",
        ));
    }

    info!("User {} hit the chat relay", user.user_id);

    if request_args.messages.len() > HISTORY_LIMIT {
        request_args.messages = request_args
            .messages
            .split_off(request_args.messages.len() - HISTORY_LIMIT);
    }

    let has_system = request_args
        .messages
        .iter()
        .any(|message| matches!(message, ChatCompletionRequestMessage::System(_)));
    if !has_system {
        request_args.messages.insert(
            0,
            ChatCompletionRequestMessage::System(ChatCompletionRequestSystemMessage {
                content: Prompts::ADVISOR_SYSTEM.to_string(),
                ..Default::default()
            }),
        );
    }

    // Only streaming completions are supported.
    request_args.stream = Some(true);
    request_args.max_tokens = Some(2048);
    request_args.user = Some(user.user_id);
    if request_args.model.is_empty() {
        request_args.model = app_state.config.chat_model.clone();
    }

    let response =
        upstream::open_stream(&app_state.http_client, &app_state.config, &request_args).await?;

    // No buffering, no transformation: the upstream bytes go straight out.
    let stream = response
        .bytes_stream()
        .map_err(actix_web::error::ErrorInternalServerError);

    Ok(HttpResponse::Ok()
        .content_type("text/event-stream")
        .streaming(stream))
}

#[put("/{conversation_id}/autorename")]
pub async fn autorename_conversation(
    app_state: web::Data<Arc<AppState>>,
    user: RequestUser,
    conversation_id: web::Path<Uuid>,
    autorename_request: Option<web::Json<AutorenameConversationRequest>>,
) -> Result<web::Json<Conversation>, Error> {
    let client: Client<OpenAIConfig> = app_state.advisor_client.clone();
    let user_id = user.user_id;
    let conversation_id = conversation_id.into_inner();

    let message_text = if let Some(autorename_request) = autorename_request {
        autorename_request.text.clone()
    } else {
        Message::first_user_text(&app_state.pool, conversation_id, &user_id)
            .await
            .map_err(|e| {
                error!("Failed to fetch first message: {:?}", e);
                actix_web::error::ErrorInternalServerError(e)
            })?
            .ok_or_else(|| actix_web::error::ErrorNotFound("Conversation has no messages"))?
    };

    let request = CreateChatCompletionRequest {
        messages: vec![
            ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessage {
                content: ChatCompletionRequestUserMessageContent::Text(
                    Prompts::AUTORENAME_1.to_string(),
                ),
                ..Default::default()
            }),
            ChatCompletionRequestMessage::Assistant(ChatCompletionRequestAssistantMessage {
                content: Some(Prompts::AUTORENAME_2.to_string()),
                ..Default::default()
            }),
            ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessage {
                content: ChatCompletionRequestUserMessageContent::Text(
                    Prompts::AUTORENAME_3.to_string(),
                ),
                ..Default::default()
            }),
            ChatCompletionRequestMessage::Assistant(ChatCompletionRequestAssistantMessage {
                content: Some(Prompts::AUTORENAME_4.to_string()),
                ..Default::default()
            }),
            ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessage {
                content: ChatCompletionRequestUserMessageContent::Text(
                    Prompts::AUTORENAME_5.to_string(),
                ),
                ..Default::default()
            }),
            ChatCompletionRequestMessage::Assistant(ChatCompletionRequestAssistantMessage {
                content: Some(Prompts::AUTORENAME_6.to_string()),
                ..Default::default()
            }),
            ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessage {
                content: ChatCompletionRequestUserMessageContent::Text(format!(
                    "Create a concise, 3-5 word phrase as a header for the following. Please return only the 3-5 word header and no additional words or characters: \"{}\"",
                    message_text
                )),
                ..Default::default()
            }),
        ],
        model: app_state.config.chat_model.clone(),
        max_tokens: Some(64),
        ..Default::default()
    };

    let response = client.chat().create(request).await.map_err(|e| {
        error!("Failed to autorename conversation: {:?}", e);
        actix_web::error::ErrorInternalServerError(e)
    })?;

    let title = response
        .choices
        .first()
        .and_then(|choice| choice.message.content.clone())
        .unwrap_or("New Conversation".to_string());

    let conversation =
        Conversation::update_title(&app_state.pool, conversation_id, &user_id, &title)
            .await
            .map_err(|e| {
                error!("Failed to update conversation: {:?}", e);
                actix_web::error::ErrorInternalServerError(e)
            })?;
    Ok(web::Json(conversation))
}

#[put("/{conversation_id}")]
pub async fn update_conversation(
    app_state: web::Data<Arc<AppState>>,
    user: RequestUser,
    conversation_id: web::Path<Uuid>,
    web::Json(update_request): web::Json<UpdateConversationRequest>,
) -> Result<web::Json<Conversation>, Error> {
    let conversation = Conversation::update_title(
        &app_state.pool,
        conversation_id.into_inner(),
        &user.user_id,
        &update_request.title,
    )
    .await
    .map_err(|e| {
        error!("Failed to update conversation: {:?}", e);
        actix_web::error::ErrorInternalServerError(e)
    })?;
    Ok(web::Json(conversation))
}

#[delete("/{conversation_id}")]
pub async fn delete_conversation(
    app_state: web::Data<Arc<AppState>>,
    user: RequestUser,
    conversation_id: web::Path<Uuid>,
) -> Result<HttpResponse, Error> {
    Conversation::delete(&app_state.pool, conversation_id.into_inner(), &user.user_id)
        .await
        .map_err(|e| {
            error!("Failed to delete conversation: {:?}", e);
            actix_web::error::ErrorInternalServerError(e)
        })?;
    Ok(HttpResponse::NoContent().finish())
}

#[get("/{conversation_id}/messages")]
pub async fn list_messages(
    app_state: web::Data<Arc<AppState>>,
    user: RequestUser,
    conversation_id: web::Path<Uuid>,
) -> Result<web::Json<Vec<Message>>, Error> {
    let messages =
        Message::list_for_conversation(&app_state.pool, conversation_id.into_inner(), &user.user_id)
            .await
            .map_err(|e| {
                error!("Failed to fetch messages: {:?}", e);
                actix_web::error::ErrorInternalServerError(e)
            })?;
    Ok(web::Json(messages))
}
