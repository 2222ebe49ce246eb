//! HTTP client for the spa booking API.
//!
//! Implements [`RemoteStore`] over the service's REST endpoints. Routing is
//! driven by the query key's segments; the JWT from the auth context rides
//! along as a bearer token.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use serde_json::{json, Value};
use url::Url;

use crate::cache::{CacheKey, Segment};
use crate::remote::{AuthContext, EntityRef, RemoteError, RemoteStore};

use super::types::User;

#[derive(Clone)]
pub struct SpaClient {
  http: reqwest::Client,
  base_url: Url,
}

impl SpaClient {
  pub fn new(base_url: &str) -> Result<Self> {
    // A trailing slash keeps Url::join from replacing the last path segment
    let normalized = if base_url.ends_with('/') {
      base_url.to_string()
    } else {
      format!("{}/", base_url)
    };
    let base_url =
      Url::parse(&normalized).map_err(|e| eyre!("Invalid API base URL {}: {}", base_url, e))?;

    Ok(Self {
      http: reqwest::Client::new(),
      base_url,
    })
  }

  /// Exchange credentials for a user profile with a JWT attached.
  pub async fn sign_in(&self, email: &str, password: &str) -> Result<User, RemoteError> {
    let url = self.url("signin")?;
    let response = self
      .http
      .post(url)
      .json(&json!({"email": email, "password": password}))
      .send()
      .await
      .map_err(|e| RemoteError::Network(e.to_string()))?;

    let value = Self::into_json(response).await?;
    serde_json::from_value(unwrap_field(value, "user"))
      .map_err(|e| RemoteError::Network(format!("malformed sign-in response: {}", e)))
  }

  async fn get(&self, path: &str, auth: Option<&AuthContext>) -> Result<Value, RemoteError> {
    let url = self.url(path)?;
    let mut request = self.http.get(url);
    if let Some(auth) = auth {
      request = request.bearer_auth(&auth.token);
    }
    let response = request
      .send()
      .await
      .map_err(|e| RemoteError::Network(e.to_string()))?;
    Self::into_json(response).await
  }

  async fn patch(
    &self,
    path: &str,
    body: Value,
    auth: Option<&AuthContext>,
  ) -> Result<Value, RemoteError> {
    let url = self.url(path)?;
    let mut request = self.http.patch(url).json(&body);
    if let Some(auth) = auth {
      request = request.bearer_auth(&auth.token);
    }
    let response = request
      .send()
      .await
      .map_err(|e| RemoteError::Network(e.to_string()))?;
    Self::into_json(response).await
  }

  fn url(&self, path: &str) -> Result<Url, RemoteError> {
    self
      .base_url
      .join(path)
      .map_err(|e| RemoteError::Validation(format!("invalid path {}: {}", path, e)))
  }

  async fn into_json(response: reqwest::Response) -> Result<Value, RemoteError> {
    let status = response.status();
    if !status.is_success() {
      let body = response.text().await.unwrap_or_default();
      return Err(RemoteError::from_status(status.as_u16(), &body));
    }
    response
      .json()
      .await
      .map_err(|e| RemoteError::Network(format!("malformed response body: {}", e)))
  }
}

#[async_trait]
impl RemoteStore for SpaClient {
  async fn fetch_entity(
    &self,
    key: &CacheKey,
    auth: Option<&AuthContext>,
  ) -> Result<Value, RemoteError> {
    match key.segments() {
      [Segment::Text(root)] if root == "user" => {
        let auth = auth.ok_or_else(|| RemoteError::Auth("no user signed in".into()))?;
        let value = self.get(&format!("user/{}", auth.user_id), Some(auth)).await?;
        Ok(unwrap_field(value, "user"))
      }
      [Segment::Text(root)] if root == "staff" => self.get("staff", None).await,
      [Segment::Text(root)] if root == "treatments" => self.get("treatments", None).await,
      [Segment::Text(root), Segment::Text(scope)] if root == "appointments" && scope == "user" => {
        let auth = auth.ok_or_else(|| RemoteError::Auth("no user signed in".into()))?;
        let value = self
          .get(&format!("user/{}/appointments", auth.user_id), Some(auth))
          .await?;
        Ok(unwrap_field(value, "appointments"))
      }
      [Segment::Text(root), Segment::Id(year), Segment::Id(month)] if root == "appointments" => {
        let value = self
          .get(&format!("appointments/{}/{}", year, month), auth)
          .await?;
        Ok(unwrap_field(value, "appointments"))
      }
      [Segment::Text(root), Segment::Id(id)] if root == "appointment" => {
        let value = self.get(&format!("appointment/{}", id), auth).await?;
        Ok(unwrap_field(value, "appointment"))
      }
      _ => Err(RemoteError::NotFound(format!("no route for query key {}", key))),
    }
  }

  async fn write_entity(
    &self,
    entity: &EntityRef,
    patch: Value,
    auth: Option<&AuthContext>,
  ) -> Result<Value, RemoteError> {
    match entity.kind.as_str() {
      "user" => {
        let value = self
          .patch(&format!("user/{}", entity.id), json!({"patch": patch}), auth)
          .await?;
        Ok(unwrap_field(value, "user"))
      }
      "appointment" => {
        let value = self
          .patch(
            &format!("appointment/{}", entity.id),
            json!({"data": patch}),
            auth,
          )
          .await?;
        Ok(unwrap_field(value, "appointment"))
      }
      other => Err(RemoteError::Validation(format!("unknown entity kind: {}", other))),
    }
  }
}

/// Servers wrap some payloads in an envelope object; take the named field
/// when present, otherwise the value as-is.
fn unwrap_field(value: Value, field: &str) -> Value {
  match value {
    Value::Object(mut map) if map.contains_key(field) => map.remove(field).unwrap_or(Value::Null),
    other => other,
  }
}
