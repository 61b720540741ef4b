//! Raw TypeDB HTTP API calls
//!
//! Thin typed wrapper over the TypeDB 3.x HTTP endpoints the gateway
//! needs: sign-in, database management, and transaction-scoped queries.
//! No retries and no interpretation happen here; server errors come back
//! with their status and body intact.

use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use url::Url;

use super::answer::QueryResponse;

#[derive(Debug, Error)]
pub enum HttpApiError {
    #[error("invalid TypeDB endpoint: {0}")]
    InvalidEndpoint(#[from] url::ParseError),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("server responded {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
}

/// An authenticated session against one TypeDB server.
///
/// Cheap to clone; clones share the underlying HTTP connection pool and
/// the bearer token obtained at sign-in.
#[derive(Debug, Clone)]
pub struct TypeDbHttp {
    client: reqwest::Client,
    base: Url,
    token: String,
}

impl TypeDbHttp {
    /// Sign in with username and password, returning an authenticated
    /// session handle.
    pub async fn sign_in(
        client: reqwest::Client,
        base: Url,
        username: &str,
        password: &str,
    ) -> Result<Self, HttpApiError> {
        #[derive(Deserialize)]
        struct SignInResponse {
            token: String,
        }

        let response = client
            .post(endpoint(&base, "v1/signin")?)
            .json(&json!({ "username": username, "password": password }))
            .send()
            .await?;
        let SignInResponse { token } = success(response).await?.json().await?;

        Ok(Self {
            client,
            base,
            token,
        })
    }

    /// Names of the databases present on the server.
    pub async fn database_names(&self) -> Result<Vec<String>, HttpApiError> {
        #[derive(Deserialize)]
        struct DatabasesResponse {
            databases: Vec<DatabaseEntry>,
        }
        #[derive(Deserialize)]
        struct DatabaseEntry {
            name: String,
        }

        let response = self
            .client
            .get(endpoint(&self.base, "v1/databases")?)
            .bearer_auth(&self.token)
            .send()
            .await?;
        let DatabasesResponse { databases } = success(response).await?.json().await?;

        Ok(databases.into_iter().map(|database| database.name).collect())
    }

    /// Create a database. Fails if it already exists.
    pub async fn create_database(&self, name: &str) -> Result<(), HttpApiError> {
        let response = self
            .client
            .post(endpoint(&self.base, &format!("v1/databases/{}", name))?)
            .bearer_auth(&self.token)
            .send()
            .await?;
        success(response).await?;
        Ok(())
    }

    /// Open a transaction on a database and return its id.
    pub async fn open_transaction(
        &self,
        database: &str,
        transaction_type: &str,
    ) -> Result<String, HttpApiError> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct OpenResponse {
            transaction_id: String,
        }

        let response = self
            .client
            .post(endpoint(&self.base, "v1/transactions/open")?)
            .bearer_auth(&self.token)
            .json(&json!({
                "databaseName": database,
                "transactionType": transaction_type,
            }))
            .send()
            .await?;
        let OpenResponse { transaction_id } = success(response).await?.json().await?;

        Ok(transaction_id)
    }

    /// Run one query inside an open transaction.
    pub async fn transaction_query(
        &self,
        transaction_id: &str,
        query: &str,
    ) -> Result<QueryResponse, HttpApiError> {
        let response = self
            .client
            .post(endpoint(
                &self.base,
                &format!("v1/transactions/{}/query", transaction_id),
            )?)
            .bearer_auth(&self.token)
            .json(&json!({ "query": query }))
            .send()
            .await?;

        Ok(success(response).await?.json().await?)
    }

    /// Close an open transaction, discarding any uncommitted state.
    pub async fn close_transaction(&self, transaction_id: &str) -> Result<(), HttpApiError> {
        let response = self
            .client
            .post(endpoint(
                &self.base,
                &format!("v1/transactions/{}/close", transaction_id),
            )?)
            .bearer_auth(&self.token)
            .send()
            .await?;
        success(response).await?;
        Ok(())
    }
}

fn endpoint(base: &Url, path: &str) -> Result<Url, HttpApiError> {
    Ok(base.join(path)?)
}

/// Bubble non-2xx responses up with the server's message preserved.
async fn success(response: reqwest::Response) -> Result<reqwest::Response, HttpApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(HttpApiError::Status { status, body })
}
