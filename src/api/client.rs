use crate::api::error::{error_message, ApiError};
use crate::api::wire::{
    ChatListResponse, ChatMessages, ChatReply, EndSessionRequest, ForgotPasswordRequest,
    InitiateChatRequest, InitiateChatResponse, LoginRequest, LoginResponse, MessagesResponse,
    RefreshRequest, RefreshResponse, RegisterDeviceRequest, ResetPasswordRequest,
    ResetTokenValidation, ScheduledSessionsResponse, SendMessageRequest, SessionChainResponse,
    StatusMessage, UnregisterDeviceRequest,
};
use crate::chat::{ChainContext, ChatItem, Message, ScheduledSession};
use crate::entity::{AuthTokens, Credentials, Employee};
use crate::store::Store;
use crate::validation::{validate_email, validate_login, validate_new_password, validate_reset_token};
use crate::view::timeline::MessageSource;
use anyhow::Context;
use async_trait::async_trait;
use reqwest::{Method, Response, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// HTTP client for the employee portal backend.
///
/// Every authorized call goes through [`PortalClient::authorized`], which on
/// a 401 refreshes the access token once and retries the request once. If the
/// refresh fails the stored credentials are dropped and the call fails with
/// [`ApiError::SessionExpired`].
pub struct PortalClient {
    http: reqwest::Client,
    base_url: String,
    tokens: Arc<Mutex<Option<AuthTokens>>>,
    employee: Arc<Mutex<Option<Employee>>>,
    store: Option<Store>,
    refresh_lock: tokio::sync::Mutex<()>,
}

impl PortalClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            tokens: Arc::new(Mutex::new(None)),
            employee: Arc::new(Mutex::new(None)),
            store: None,
            refresh_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Persist credentials in `store` on login and refresh.
    pub fn with_store(mut self, store: Store) -> Self {
        self.store = Some(store);
        self
    }

    pub fn tokens(&self) -> Option<AuthTokens> {
        self.tokens.lock().unwrap().clone()
    }

    pub fn set_tokens(&self, tokens: Option<AuthTokens>) {
        *self.tokens.lock().unwrap() = tokens;
    }

    pub fn employee(&self) -> Option<Employee> {
        self.employee.lock().unwrap().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.tokens.lock().unwrap().is_some()
    }

    /// Load credentials saved by an earlier run. Returns false if there were none.
    pub async fn restore_session(&self) -> anyhow::Result<bool> {
        let Some(store) = &self.store else {
            return Ok(false);
        };

        match store.load_credentials().await? {
            Some(credentials) => {
                self.set_tokens(Some(credentials.tokens));
                *self.employee.lock().unwrap() = credentials.employee;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    // --- Auth ---

    pub async fn login(&self, email: &str, password: &str) -> Result<Option<Employee>, ApiError> {
        let email = validate_login(email, password)?;

        let response: LoginResponse = self
            .public(
                Method::POST,
                "/auth/login",
                Some(&LoginRequest { email, password }),
            )
            .await?;

        let tokens = AuthTokens {
            access_token: response.access_token,
            refresh_token: response.refresh_token,
        };
        self.install(tokens, response.employee.clone()).await;

        info!("Logged in as {}", email);
        Ok(response.employee)
    }

    pub async fn logout(&self) {
        self.force_logout().await;
        info!("Logged out");
    }

    pub async fn forgot_password(&self, email: &str) -> Result<Option<String>, ApiError> {
        let email = validate_email(email)?;
        let response: StatusMessage = self
            .public(
                Method::POST,
                "/auth/forgot-password",
                Some(&ForgotPasswordRequest { email }),
            )
            .await?;
        Ok(response.message)
    }

    pub async fn validate_reset_token(&self, token: &str) -> Result<bool, ApiError> {
        let token = validate_reset_token(token)?;
        let response: ResetTokenValidation = self
            .public(
                Method::GET,
                &format!("/auth/validate-reset-token/{}", token),
                None::<&()>,
            )
            .await?;
        Ok(response.valid)
    }

    pub async fn reset_password(
        &self,
        token: &str,
        password: &str,
        confirmation: &str,
    ) -> Result<Option<String>, ApiError> {
        let token = validate_reset_token(token)?;
        validate_new_password(password, confirmation)?;
        let response: StatusMessage = self
            .public(
                Method::POST,
                &format!("/auth/reset-password/{}", token),
                Some(&ResetPasswordRequest { password }),
            )
            .await?;
        Ok(response.message)
    }

    // --- Employee ---

    pub async fn get_chats(&self) -> Result<Vec<ChatItem>, ApiError> {
        let response: ChatListResponse = self
            .authorized(Method::GET, "/employee/chats", None::<&()>)
            .await?;
        Ok(response.chats)
    }

    pub async fn get_chat_messages(&self, chat_id: &str) -> Result<ChatMessages, ApiError> {
        let response: MessagesResponse = self
            .authorized(
                Method::GET,
                &format!("/employee/chats/{}/messages", chat_id),
                None::<&()>,
            )
            .await?;
        Ok(response.into())
    }

    pub async fn get_scheduled_sessions(&self) -> Result<Vec<ScheduledSession>, ApiError> {
        let response: ScheduledSessionsResponse = self
            .authorized(Method::GET, "/employee/scheduled-sessions", None::<&()>)
            .await?;
        Ok(response.sessions)
    }

    /// Id of the chain a session belongs to.
    pub async fn get_session_chain(&self, session_id: &str) -> Result<String, ApiError> {
        let response: SessionChainResponse = self
            .authorized(
                Method::GET,
                &format!("/employee/session/{}/chain", session_id),
                None::<&()>,
            )
            .await?;
        Ok(response.chain_id)
    }

    pub async fn get_chain(&self, chain_id: &str) -> Result<ChainContext, ApiError> {
        self.authorized(
            Method::GET,
            &format!("/employee/chains/{}", chain_id),
            None::<&()>,
        )
        .await
    }

    pub async fn register_device(&self, device_token: &str, platform: &str) -> Result<(), ApiError> {
        let _: StatusMessage = self
            .authorized(
                Method::POST,
                "/employee/register-device",
                Some(&RegisterDeviceRequest {
                    device_token,
                    platform,
                }),
            )
            .await?;
        Ok(())
    }

    pub async fn unregister_device(&self, device_token: &str) -> Result<(), ApiError> {
        let _: StatusMessage = self
            .authorized(
                Method::POST,
                "/employee/unregister-device",
                Some(&UnregisterDeviceRequest { device_token }),
            )
            .await?;
        Ok(())
    }

    // --- Conversational API ---

    pub async fn initiate_chat(&self, session_id: &str) -> Result<InitiateChatResponse, ApiError> {
        self.authorized(
            Method::PATCH,
            "/llm/chat/initiate-chat",
            Some(&InitiateChatRequest { session_id }),
        )
        .await
    }

    pub async fn send_message(
        &self,
        message: &str,
        chat_id: Option<&str>,
        session_id: Option<&str>,
    ) -> Result<ChatReply, ApiError> {
        self.authorized(
            Method::POST,
            "/llm/chat/message",
            Some(&SendMessageRequest {
                message,
                chat_id,
                session_id,
            }),
        )
        .await
    }

    pub async fn end_session(
        &self,
        chat_id: &str,
        session_id: Option<&str>,
    ) -> Result<Option<String>, ApiError> {
        let response: StatusMessage = self
            .authorized(
                Method::POST,
                "/llm/chat/end-session",
                Some(&EndSessionRequest {
                    chat_id,
                    session_id,
                }),
            )
            .await?;
        Ok(response.message)
    }

    // --- Transport ---

    async fn dispatch<B>(
        &self,
        method: &Method,
        path: &str,
        body: Option<&B>,
        token: Option<&str>,
    ) -> Result<Response, ApiError>
    where
        B: Serialize + ?Sized,
    {
        let mut request = self.http.request(method.clone(), self.url(path));
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        debug!("-> {} {}", method, path);
        request.send().await.map_err(|source| ApiError::Transport {
            path: path.to_string(),
            source,
        })
    }

    async fn public<T, B>(&self, method: Method, path: &str, body: Option<&B>) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let response = self.dispatch(&method, path, body, None).await?;
        decode(path, response).await
    }

    async fn authorized<T, B>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let token = self
            .tokens()
            .map(|t| t.access_token)
            .ok_or(ApiError::NotAuthenticated)?;

        let response = self.dispatch(&method, path, body, Some(&token)).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return decode(path, response).await;
        }

        warn!("{} {} was rejected, refreshing access token", method, path);
        let token = match self.refresh_after(&token).await {
            Ok(token) => token,
            Err(e) => {
                warn!("Token refresh failed: {}", e);
                self.force_logout().await;
                return Err(ApiError::SessionExpired);
            }
        };

        let retry = self.dispatch(&method, path, body, Some(&token)).await?;
        if retry.status() == StatusCode::UNAUTHORIZED {
            warn!("{} {} rejected again after refresh", method, path);
            self.force_logout().await;
            return Err(ApiError::SessionExpired);
        }
        decode(path, retry).await
    }

    /// Refresh the access token unless another request already replaced the
    /// rejected one.
    async fn refresh_after(&self, rejected: &str) -> Result<String, ApiError> {
        let _guard = self.refresh_lock.lock().await;

        let current = self.tokens().ok_or(ApiError::NotAuthenticated)?;
        if current.access_token != rejected {
            return Ok(current.access_token);
        }
        let refresh_token = current.refresh_token.ok_or(ApiError::SessionExpired)?;

        let response: RefreshResponse = self
            .public(
                Method::POST,
                "/auth/refresh-token",
                Some(&RefreshRequest {
                    refresh_token: &refresh_token,
                }),
            )
            .await?;

        let access_token = response.access_token;
        let tokens = AuthTokens {
            access_token: access_token.clone(),
            refresh_token: response.refresh_token.or(Some(refresh_token)),
        };
        self.install(tokens, None).await;

        info!("Access token refreshed");
        Ok(access_token)
    }

    async fn install(&self, tokens: AuthTokens, employee: Option<Employee>) {
        self.set_tokens(Some(tokens.clone()));
        if employee.is_some() {
            *self.employee.lock().unwrap() = employee.clone();
        }

        if let Some(store) = &self.store {
            let credentials = Credentials { tokens, employee };
            if let Err(e) = store.save_credentials(&credentials).await {
                error!("Failed to persist credentials: {:#}", e);
            }
        }
    }

    async fn force_logout(&self) {
        self.set_tokens(None);
        *self.employee.lock().unwrap() = None;

        if let Some(store) = &self.store {
            if let Err(e) = store.clear_credentials().await {
                error!("Failed to clear stored credentials: {:#}", e);
            }
        }
    }
}

async fn decode<T: DeserializeOwned>(path: &str, response: Response) -> Result<T, ApiError> {
    let status = response.status();
    let body = response.text().await.map_err(|source| ApiError::Transport {
        path: path.to_string(),
        source,
    })?;

    if !status.is_success() {
        return Err(ApiError::Status {
            path: path.to_string(),
            status,
            message: error_message(&body),
        });
    }

    // Some endpoints answer with an empty body.
    let body = if body.trim().is_empty() { "{}" } else { body.as_str() };
    serde_json::from_str(body).map_err(|source| ApiError::Decode {
        path: path.to_string(),
        source,
    })
}

#[async_trait]
impl MessageSource for PortalClient {
    async fn fetch_messages(&self, chat_id: &str) -> anyhow::Result<Vec<Message>> {
        Ok(self.get_chat_messages(chat_id).await?.messages)
    }
}
