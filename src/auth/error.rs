use thiserror::Error;

/// Errors produced by the authentication collaborator and the session manager.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Invalid username or password")]
    InvalidCredentials,

    #[error("Username and password are required")]
    MissingCredentials,

    #[error("A login attempt is already in progress")]
    LoginInProgress,

    #[error("Unable to reach the authentication service: {0}")]
    Network(String),

    #[error("Malformed authentication response: {0}")]
    InvalidResponse(String),

    #[error("Session storage error: {0}")]
    Storage(String),
}

impl AuthError {
    /// Map a transport-level failure to the auth taxonomy.
    /// A 401 from the token endpoint means bad credentials; everything else
    /// that reqwest reports (connect, timeout, body) is a network failure.
    pub fn from_transport(err: reqwest::Error) -> Self {
        if err.status().map(|s| s.as_u16()) == Some(401) {
            AuthError::InvalidCredentials
        } else if err.is_decode() {
            AuthError::InvalidResponse(err.to_string())
        } else {
            AuthError::Network(err.to_string())
        }
    }
}
