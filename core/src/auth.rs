//! Request builder and response parser for the auth service.
//!
//! Same split as [`TodoClient`](crate::client::TodoClient): `build_*`
//! returns plain request data, `parse_*` interprets the response.

use serde::Serialize;

use crate::config::ClientConfig;
use crate::error::ApiError;
use crate::http::{HttpMethod, HttpRequest, HttpResponse};
use crate::types::{AuthResponse, Session, User};

#[derive(Serialize)]
struct Credentials<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Clone)]
pub struct AuthClient {
    auth_url: String,
    api_key: String,
}

impl AuthClient {
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            auth_url: config.auth_url(),
            api_key: config.anon_key().to_string(),
        }
    }

    pub fn build_sign_up(&self, email: &str, password: &str) -> Result<HttpRequest, ApiError> {
        self.credentials_request(format!("{}/signup", self.auth_url), email, password)
    }

    pub fn build_sign_in(&self, email: &str, password: &str) -> Result<HttpRequest, ApiError> {
        self.credentials_request(
            format!("{}/token?grant_type=password", self.auth_url),
            email,
            password,
        )
    }

    pub fn build_sign_out(&self, access_token: &str) -> HttpRequest {
        HttpRequest {
            method: HttpMethod::Post,
            path: format!("{}/logout", self.auth_url),
            headers: self.headers(access_token, false),
            body: None,
        }
    }

    pub fn build_get_user(&self, access_token: &str) -> HttpRequest {
        HttpRequest {
            method: HttpMethod::Get,
            path: format!("{}/user", self.auth_url),
            headers: self.headers(access_token, false),
            body: None,
        }
    }

    /// A sign-up answers with a session when the account is usable right
    /// away, or with the bare user when it still needs email confirmation.
    pub fn parse_sign_up(&self, response: HttpResponse) -> Result<AuthResponse, ApiError> {
        check_status(&response)?;
        let value: serde_json::Value = serde_json::from_str(&response.body)
            .map_err(|e| ApiError::DeserializationError(e.to_string()))?;

        if value.get("access_token").is_some() {
            let session: Session = serde_json::from_value(value)
                .map_err(|e| ApiError::DeserializationError(e.to_string()))?;
            Ok(AuthResponse {
                user: Some(session.user.clone()),
                session: Some(session),
            })
        } else {
            let user: User = serde_json::from_value(value)
                .map_err(|e| ApiError::DeserializationError(e.to_string()))?;
            Ok(AuthResponse {
                user: Some(user),
                session: None,
            })
        }
    }

    pub fn parse_sign_in(&self, response: HttpResponse) -> Result<Session, ApiError> {
        check_status(&response)?;
        serde_json::from_str(&response.body).map_err(|e| ApiError::DeserializationError(e.to_string()))
    }

    pub fn parse_sign_out(&self, response: HttpResponse) -> Result<(), ApiError> {
        check_status(&response)
    }

    pub fn parse_get_user(&self, response: HttpResponse) -> Result<User, ApiError> {
        check_status(&response)?;
        serde_json::from_str(&response.body).map_err(|e| ApiError::DeserializationError(e.to_string()))
    }

    fn credentials_request(&self, path: String, email: &str, password: &str) -> Result<HttpRequest, ApiError> {
        let body = serde_json::to_string(&Credentials { email, password })
            .map_err(|e| ApiError::SerializationError(e.to_string()))?;
        Ok(HttpRequest {
            method: HttpMethod::Post,
            path,
            headers: self.headers(&self.api_key, true),
            body: Some(body),
        })
    }

    fn headers(&self, bearer: &str, json_body: bool) -> Vec<(String, String)> {
        let mut headers = vec![
            ("apikey".to_string(), self.api_key.clone()),
            ("authorization".to_string(), format!("Bearer {bearer}")),
        ];
        if json_body {
            headers.push(("content-type".to_string(), "application/json".to_string()));
        }
        headers
    }
}

/// The auth service never signals "not found" for these endpoints, so every
/// non-2xx status is a `Backend` error carrying the service's message.
fn check_status(response: &HttpResponse) -> Result<(), ApiError> {
    if response.is_success() {
        return Ok(());
    }
    Err(ApiError::from_body(response.status, &response.body))
}
