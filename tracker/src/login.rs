//! Local callback listener for the GitHub login flow.
//!
//! The user opens `<api>/auth/github` in a browser; after authenticating, the
//! service redirects to `http://127.0.0.1:<port>/auth/<token>`. The listener
//! answers that one request, hands the token back and shuts down.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::extract::{Path, State};
use axum::routing::get;
use axum::Router;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::store::LocalStore;
use crate::sync::SyncClient;
use crate::types::{AuthToken, TokenType, User};

const SUCCESS_BODY: &str = "Authenticated successfully! You can close the window.";
const ALREADY_DONE_BODY: &str = "Login already completed.";

/// Errors from the login flow.
#[derive(Error, Debug)]
pub enum LoginError {
    /// Binding or serving the callback listener failed.
    #[error("login listener error: {0}")]
    Io(#[from] std::io::Error),

    /// The listener stopped before a token arrived.
    #[error("login cancelled before a token was received")]
    Cancelled,

    /// The received token could not be stored.
    #[error("failed to store token: {0}")]
    Store(#[from] crate::store::StoreError),
}

/// URL the user opens to start the GitHub flow.
#[must_use]
pub fn github_login_url(api_url: &str) -> String {
    format!("{}/auth/github", api_url.trim_end_matches('/'))
}

#[derive(Clone)]
struct CallbackState {
    token_tx: Arc<Mutex<Option<oneshot::Sender<String>>>>,
}

async fn auth_callback(
    State(state): State<CallbackState>,
    Path(token): Path<String>,
) -> &'static str {
    let sender = state
        .token_tx
        .lock()
        .ok()
        .and_then(|mut guard| guard.take());
    match sender {
        Some(tx) => {
            if tx.send(token).is_err() {
                warn!("Login waiter dropped before token arrived");
            }
            SUCCESS_BODY
        }
        None => ALREADY_DONE_BODY,
    }
}

/// A bound callback listener.
#[derive(Debug)]
pub struct LoginListener {
    listener: TcpListener,
}

impl LoginListener {
    /// Binds `127.0.0.1:<port>`. Port 0 picks a free port.
    ///
    /// # Errors
    ///
    /// Returns an error if the port is taken.
    pub async fn bind(port: u16) -> Result<Self, LoginError> {
        let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], port))).await?;
        info!(port, "Login callback listener bound");
        Ok(Self { listener })
    }

    /// Address the listener is bound to.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket address cannot be read.
    pub fn local_addr(&self) -> Result<SocketAddr, LoginError> {
        Ok(self.listener.local_addr()?)
    }

    /// Serves `GET /auth/{token}` until one token arrives and returns it.
    ///
    /// # Errors
    ///
    /// Returns `Cancelled` if the server stops first.
    pub async fn wait_for_token(self) -> Result<String, LoginError> {
        let (token_tx, token_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();

        let state = CallbackState {
            token_tx: Arc::new(Mutex::new(Some(token_tx))),
        };
        let app = Router::new()
            .route("/auth/{token}", get(auth_callback))
            .with_state(state);

        let server = tokio::spawn(async move {
            axum::serve(self.listener, app)
                .with_graceful_shutdown(async {
                    let _ = stop_rx.await;
                })
                .await
        });

        let token = token_rx.await.map_err(|_| LoginError::Cancelled);
        let _ = stop_tx.send(());

        match server.await {
            Ok(Ok(())) => debug!("Login callback listener stopped"),
            Ok(Err(e)) => warn!(error = %e, "Login callback listener failed"),
            Err(e) => warn!(error = %e, "Login callback task failed"),
        }
        token
    }
}

/// Stores `token` and refreshes the cached user profile.
///
/// Returns the profile, or `None` if the service did not accept the token.
///
/// # Errors
///
/// Returns an error if the token cannot be written to the store.
pub async fn complete_login(
    store: &LocalStore,
    sync: &SyncClient,
    token: String,
    token_type: TokenType,
) -> Result<Option<User>, LoginError> {
    store.set_auth_token(Some(&AuthToken { token_type, token }))?;
    info!(token_type = ?token_type, "Stored auth token");
    Ok(sync.fetch_user().await)
}

/// Clears the stored token and cached profile.
///
/// # Errors
///
/// Returns an error if either key cannot be removed.
pub fn logout(store: &LocalStore) -> Result<(), LoginError> {
    store.set_auth_token(None)?;
    store.set_user_info(None)?;
    info!("Logged out");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_github_login_url() {
        assert_eq!(
            github_login_url("https://api.dev-boost.com/"),
            "https://api.dev-boost.com/auth/github"
        );
    }

    #[tokio::test]
    async fn test_callback_delivers_token() {
        let listener = LoginListener::bind(0).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let waiter = tokio::spawn(listener.wait_for_token());

        let body = reqwest::get(format!("http://{addr}/auth/abc123"))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();

        assert_eq!(body, SUCCESS_BODY);
        assert_eq!(waiter.await.unwrap().unwrap(), "abc123");
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let listener = LoginListener::bind(0).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let waiter = tokio::spawn(listener.wait_for_token());

        let response = reqwest::get(format!("http://{addr}/callback")).await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);

        waiter.abort();
    }

    #[test]
    fn test_logout_clears_token_and_user() {
        let dir = TempDir::new().unwrap();
        let store = LocalStore::open(dir.path()).unwrap();
        store
            .set_auth_token(Some(&AuthToken {
                token_type: TokenType::Github,
                token: "t".to_string(),
            }))
            .unwrap();
        store.set_user_info(Some(&User::default())).unwrap();

        logout(&store).unwrap();

        assert!(store.auth_token().is_none());
        assert!(store.user_info().is_none());
    }
}
