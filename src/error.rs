use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("Session expired. Please login again.")]
    SessionExpired,
    #[error("Request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("Malformed response: {0}")]
    Decode(String),
}

#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("Failed to connect to {endpoint}: {reason}")]
    Connect { endpoint: String, reason: String },
    #[error("Connection closed")]
    Closed,
    #[error("Failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum TokenStoreError {
    #[error("Token storage failed: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Please fill in all fields")]
    MissingFields,
    #[error("Password must be at least {0} characters long")]
    PasswordTooShort(usize),
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Store(#[from] TokenStoreError),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConversationError {
    #[error("Message is empty")]
    EmptyMessage,
}

#[derive(Error, Debug)]
pub enum ClientError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Conversation(#[from] ConversationError),
    #[error("Permission to access {0} is required")]
    Permission(String),
    #[error("Not authenticated")]
    NotAuthenticated,
    #[error("Result discarded: session changed while the request was in flight")]
    Stale,
}

impl From<ValidationError> for ClientError {
    fn from(err: ValidationError) -> Self {
        ClientError::Session(SessionError::Validation(err))
    }
}

impl From<TokenStoreError> for ClientError {
    fn from(err: TokenStoreError) -> Self {
        ClientError::Session(SessionError::Store(err))
    }
}

impl ClientError {
    pub fn is_session_expired(&self) -> bool {
        matches!(self, ClientError::Api(ApiError::SessionExpired))
    }
}
