use super::{Credential, DriveDownload, DriveFileInfo, DriveProvider, ProviderError, ProviderTokens};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use futures::StreamExt;
use serde::Deserialize;

const AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const REVOKE_URL: &str = "https://oauth2.googleapis.com/revoke";
const API_BASE: &str = "https://www.googleapis.com/drive/v3";
const SCOPES: &str = "https://www.googleapis.com/auth/drive.readonly https://www.googleapis.com/auth/userinfo.email";

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
    refresh_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileResource {
    id: String,
    name: String,
    mime_type: String,
    size: Option<String>,
    modified_time: Option<DateTime<Utc>>,
}

pub struct GoogleDriveProvider {
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    http: reqwest::Client,
}

impl GoogleDriveProvider {
    pub fn new(client_id: String, client_secret: String, redirect_uri: String) -> Self {
        Self {
            client_id,
            client_secret,
            redirect_uri,
            http: reqwest::Client::builder()
                .connect_timeout(std::time::Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
        }
    }

    async fn token_request(&self, form: &[(&str, &str)]) -> Result<ProviderTokens, ProviderError> {
        let response = self.http.post(TOKEN_URL).form(form).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status, &body));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Unexpected(e.to_string()))?;

        tracing::debug!("Drive token issued, expires in {} seconds", token.expires_in);

        Ok(ProviderTokens {
            access_token: token.access_token,
            refresh_token: token.refresh_token.filter(|t| !t.is_empty()),
            expires_at: Utc::now() + Duration::seconds(token.expires_in),
            email: None,
        })
    }
}

#[async_trait]
impl DriveProvider for GoogleDriveProvider {
    fn provider_id(&self) -> &'static str {
        "google_drive"
    }

    fn display_name(&self) -> &'static str {
        "Google Drive"
    }

    fn consent_url(&self, state: &str) -> String {
        let params = [
            ("client_id", self.client_id.as_str()),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("response_type", "code"),
            ("scope", SCOPES),
            ("access_type", "offline"),
            ("prompt", "consent"),
            ("state", state),
        ];
        match url::Url::parse_with_params(AUTH_URL, &params) {
            Ok(url) => url.to_string(),
            Err(_) => AUTH_URL.to_string(),
        }
    }

    async fn exchange_code(&self, code: &str) -> Result<ProviderTokens, ProviderError> {
        self.token_request(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("redirect_uri", self.redirect_uri.as_str()),
        ])
        .await
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<ProviderTokens, ProviderError> {
        self.token_request(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ])
        .await
    }

    async fn revoke_token(&self, token: &str) -> Result<(), ProviderError> {
        let response = self
            .http
            .post(REVOKE_URL)
            .form(&[("token", token)])
            .send()
            .await?;
        let status = response.status();
        // Already-invalid tokens come back as 400; nothing left to revoke.
        if status.is_success() || status == reqwest::StatusCode::BAD_REQUEST {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(ProviderError::from_status(status, &body))
    }

    async fn file_info(
        &self,
        credential: &Credential,
        file_id: &str,
    ) -> Result<DriveFileInfo, ProviderError> {
        let response = self
            .http
            .get(format!("{}/files/{}", API_BASE, file_id))
            .bearer_auth(credential.access_token())
            .query(&[
                ("fields", "id,name,mimeType,size,modifiedTime"),
                ("supportsAllDrives", "true"),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status, &body));
        }

        let file: FileResource = response
            .json()
            .await
            .map_err(|e| ProviderError::Unexpected(e.to_string()))?;

        Ok(DriveFileInfo {
            id: file.id,
            name: file.name,
            mime_type: file.mime_type,
            size: file.size.and_then(|s| s.parse().ok()),
            modified_at: file.modified_time,
        })
    }

    async fn download_file(
        &self,
        credential: &Credential,
        file_id: &str,
    ) -> Result<DriveDownload, ProviderError> {
        let info = self.file_info(credential, file_id).await?;

        let response = self
            .http
            .get(format!("{}/files/{}", API_BASE, file_id))
            .bearer_auth(credential.access_token())
            .query(&[("alt", "media"), ("supportsAllDrives", "true")])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status, &body));
        }

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(ProviderError::from))
            .boxed();

        Ok(DriveDownload {
            filename: info.name,
            mime_type: info.mime_type,
            size: info.size,
            body,
        })
    }
}
