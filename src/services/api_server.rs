// src/services/api_server.rs
//! API Server for the Kriti credential platform
//!
//! REST interface consumed by the UI layer. Built on Axum, with endpoints for:
//! - Credential issuance, lookup, listing and revocation
//! - Verification by id and by scanned QR code
//! - Issuer onboarding and key generation
//! - Ledger status and pending-anchor retry
//!
//! Verification endpoints always answer 200 with a structured result, even
//! when the ledger or the document store is down.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use log::{error, info};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;

use crate::blockchain::registry_client::{NetworkStatus, RegistryClient};
use crate::error::{KritiError, LedgerError};
use crate::models::credential::NewCredential;
use crate::services::credential_issuer::CredentialIssuer;
use crate::services::verifier::Verifier;
use crate::storage::credential_store::CredentialFilter;
use crate::wallet::key_management::generate_issuer_keys;

// API request and response structures

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VerifyQrRequest {
    qr_data: String,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterIssuerRequest {
    did: String,
    public_key: String,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterIssuerResponse {
    did: String,
    tx_ref: String,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateKeysRequest {
    issuer_name: String,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LedgerStatusResponse {
    reachable: bool,
    network: Option<NetworkStatus>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    credential_id: Option<String>,
}

/// A [`KritiError`] rendered as an HTTP response.
struct ApiError(KritiError);

impl From<KritiError> for ApiError {
    fn from(e: KritiError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            // Persisted, not yet anchored. The id is usable.
            KritiError::AnchorPending { .. } => StatusCode::ACCEPTED,
            KritiError::Encoding(_) => StatusCode::UNPROCESSABLE_ENTITY,
            KritiError::InvalidInput(_) | KritiError::UnknownSigningKey(_) => {
                StatusCode::BAD_REQUEST
            }
            KritiError::CredentialNotFound(_) => StatusCode::NOT_FOUND,
            KritiError::Store(_) => StatusCode::BAD_GATEWAY,
            KritiError::Ledger(LedgerError::Connectivity(_)) => StatusCode::SERVICE_UNAVAILABLE,
            KritiError::Ledger(LedgerError::Rejected(_)) => StatusCode::CONFLICT,
            KritiError::Signing(_) | KritiError::Config(_) | KritiError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        if status.is_server_error() {
            error!("request failed: {}", self.0);
        }

        let credential_id = match &self.0 {
            KritiError::AnchorPending { credential_id, .. } => Some(credential_id.clone()),
            _ => None,
        };
        let body = ErrorResponse {
            error: self.0.to_string(),
            credential_id,
        };
        (status, Json(body)).into_response()
    }
}

/// API server state containing all service dependencies
#[derive(Clone)]
pub struct ApiServer {
    credential_issuer: CredentialIssuer,
    verifier: Verifier,
    registry: Arc<dyn RegistryClient>,
}

impl ApiServer {
    pub fn new(
        credential_issuer: CredentialIssuer,
        verifier: Verifier,
        registry: Arc<dyn RegistryClient>,
    ) -> Self {
        Self {
            credential_issuer,
            verifier,
            registry,
        }
    }

    /// All API routes, with shared state attached.
    pub fn router(&self) -> Router {
        Router::new()
            .route(
                "/credentials",
                post(Self::issue_credential_handler).get(Self::list_credentials_handler),
            )
            .route("/credentials/:id", get(Self::get_credential_handler))
            .route("/credentials/:id/revoke", post(Self::revoke_credential_handler))
            .route("/verify/:id", get(Self::verify_credential_handler))
            .route("/verify/qr", post(Self::verify_qr_handler))
            .route("/issuers", post(Self::register_issuer_handler))
            .route("/issuers/keys", post(Self::generate_keys_handler))
            .route("/ledger/status", get(Self::ledger_status_handler))
            .route("/anchors/retry", post(Self::retry_anchors_handler))
            .layer(CorsLayer::permissive())
            .with_state(Arc::new(self.clone()))
    }

    /// Binds `addr` and serves until the process is stopped.
    pub async fn run(&self, addr: SocketAddr) -> Result<(), KritiError> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("API server running at http://{addr}");
        axum::serve(listener, self.router()).await?;
        Ok(())
    }

    /// POST /credentials
    ///
    /// - 201 Created: credential persisted and anchored
    /// - 202 Accepted: persisted, anchoring pending (body carries the id)
    /// - 422: credential data is not an object
    /// - 502: document store unavailable
    async fn issue_credential_handler(
        State(state): State<Arc<ApiServer>>,
        Json(request): Json<NewCredential>,
    ) -> Result<impl IntoResponse, ApiError> {
        let receipt = state.credential_issuer.issue_credential(request).await?;
        Ok((StatusCode::CREATED, Json(receipt)))
    }

    /// GET /credentials/:id
    async fn get_credential_handler(
        State(state): State<Arc<ApiServer>>,
        Path(id): Path<String>,
    ) -> Result<Response, ApiError> {
        Ok(match state.credential_issuer.get_credential(&id).await? {
            Some(credential) => (StatusCode::OK, Json(credential)).into_response(),
            None => (
                StatusCode::NOT_FOUND,
                Json(ErrorResponse {
                    error: format!("credential {id} not found"),
                    credential_id: None,
                }),
            )
                .into_response(),
        })
    }

    /// POST /credentials/:id/revoke
    async fn revoke_credential_handler(
        State(state): State<Arc<ApiServer>>,
        Path(id): Path<String>,
    ) -> Result<impl IntoResponse, ApiError> {
        Ok(Json(state.credential_issuer.revoke_credential(&id).await?))
    }

    /// GET /credentials?student=<id> or ?issuer=<id>, newest first
    async fn list_credentials_handler(
        State(state): State<Arc<ApiServer>>,
        Query(filter): Query<CredentialFilter>,
    ) -> Result<impl IntoResponse, ApiError> {
        if filter.student_subject_id.is_none() && filter.issuer_id.is_none() {
            return Err(KritiError::InvalidInput("pass student or issuer".into()).into());
        }
        let credentials = state.credential_issuer.query_credentials(&filter).await?;
        Ok(Json(credentials))
    }

    /// GET /verify/:id
    async fn verify_credential_handler(
        State(state): State<Arc<ApiServer>>,
        Path(id): Path<String>,
    ) -> impl IntoResponse {
        Json(state.verifier.verify_credential_by_id(&id).await)
    }

    /// POST /verify/qr
    async fn verify_qr_handler(
        State(state): State<Arc<ApiServer>>,
        Json(request): Json<VerifyQrRequest>,
    ) -> impl IntoResponse {
        Json(state.verifier.verify_from_qr(&request.qr_data).await)
    }

    /// POST /issuers
    async fn register_issuer_handler(
        State(state): State<Arc<ApiServer>>,
        Json(request): Json<RegisterIssuerRequest>,
    ) -> Result<impl IntoResponse, ApiError> {
        let tx_ref = state
            .credential_issuer
            .register_issuer(&request.did, &request.public_key)
            .await?;
        Ok(Json(RegisterIssuerResponse {
            did: request.did,
            tx_ref,
        }))
    }

    /// POST /issuers/keys
    ///
    /// The private key in the response is not kept anywhere.
    async fn generate_keys_handler(
        Json(request): Json<GenerateKeysRequest>,
    ) -> Result<impl IntoResponse, ApiError> {
        Ok(Json(generate_issuer_keys(&request.issuer_name)?))
    }

    /// GET /ledger/status
    async fn ledger_status_handler(State(state): State<Arc<ApiServer>>) -> impl IntoResponse {
        let (reachable, network) = tokio::join!(
            state.registry.check_ledger_reachable(),
            state.registry.network_status(),
        );
        Json(LedgerStatusResponse {
            reachable,
            network: network.ok(),
        })
    }

    /// POST /anchors/retry
    async fn retry_anchors_handler(
        State(state): State<Arc<ApiServer>>,
    ) -> Result<impl IntoResponse, ApiError> {
        Ok(Json(state.credential_issuer.retry_pending_anchors().await?))
    }
}
