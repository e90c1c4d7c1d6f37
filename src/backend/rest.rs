//! REST [`Backend`]: a JSON-over-HTTP client for the notes API.
//!
//! The bearer token lives in the local key/value store under
//! `noteapp_token` and is attached to every request when present. Any non-2xx
//! response (or an envelope with `success: false`) becomes a backend error
//! carrying the server's `error` text, or `HTTP <status>` when there is none.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use super::{Backend, DataSource};
use crate::api::{
    AuthPayload, AuthUser, CreateCategoryRequest, CreateSubcategoryRequest, Envelope,
    GlobalSearchParams, GlobalSearchResults, ImageUrl, LoginRequest, MePayload, NoteFilter,
    RegisterRequest, SearchType, SubcategoryFilter, TagCount,
};
use crate::config::RestConfig;
use crate::error::{NoteError, Result};
use crate::images::ImageUpload;
use crate::kv::{keys, LocalKv};
use crate::models::{
    Category, CategoryPatch, NewNote, Note, NotePatch, SearchQuery, Subcategory, SubcategoryPatch,
};

pub struct RestBackend {
    client: Client,
    base_url: String,
    kv: LocalKv,
}

impl RestBackend {
    pub fn new(config: &RestConfig, kv: LocalKv) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            kv,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn token(&self) -> Result<Option<String>> {
        self.kv.get(keys::TOKEN)
    }

    pub fn set_token(&self, token: Option<&str>) -> Result<()> {
        match token {
            Some(t) => self.kv.set(keys::TOKEN, t),
            None => self.kv.remove(keys::TOKEN),
        }
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder> {
        let url = format!("{}{}", self.base_url, path);
        let mut req = self.client.request(method, url);
        if let Some(token) = self.token()? {
            req = req.bearer_auth(token);
        }
        Ok(req)
    }

    async fn send_raw(&self, req: RequestBuilder) -> Result<Option<serde_json::Value>> {
        let response = req.send().await?;
        let status = response.status();
        let text = response.text().await?;
        let envelope: Option<Envelope<serde_json::Value>> = serde_json::from_str(&text).ok();

        let failed = !status.is_success() || envelope.as_ref().map(|e| !e.success).unwrap_or(false);
        if failed {
            let message = envelope
                .and_then(|e| e.error)
                .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
            debug!(status = status.as_u16(), error = %message, "rest: request failed");
            return Err(NoteError::backend(message));
        }
        Ok(envelope.and_then(|e| e.data))
    }

    /// Send and decode the envelope's `data`.
    async fn send<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T> {
        let data = self.send_raw(req).await?.unwrap_or(serde_json::Value::Null);
        Ok(serde_json::from_value(data)?)
    }

    /// Send and ignore whatever `data` comes back.
    async fn send_unit(&self, req: RequestBuilder) -> Result<()> {
        self.send_raw(req).await.map(|_| ())
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.send(self.request(Method::GET, path)?).await
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        self.send(self.request(Method::POST, path)?.json(body)).await
    }

    async fn put<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<()> {
        self.send_unit(self.request(Method::PUT, path)?.json(body)).await
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.send_unit(self.request(Method::DELETE, path)?).await
    }

    // ── REST-only extras ──

    pub async fn register(&self, username: &str, email: &str, password: &str) -> Result<AuthPayload> {
        let body = RegisterRequest {
            username: username.to_string(),
            email: email.to_string(),
            password: password.to_string(),
        };
        let payload: AuthPayload = self.post("/auth/register", &body).await?;
        self.set_token(Some(&payload.token))?;
        Ok(payload)
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<AuthPayload> {
        let body = LoginRequest {
            username: username.to_string(),
            password: password.to_string(),
        };
        let payload: AuthPayload = self.post("/auth/login", &body).await?;
        self.set_token(Some(&payload.token))?;
        Ok(payload)
    }

    /// Tell the server to end the session. The stored token is cleared even
    /// when the server call fails.
    pub async fn logout(&self) -> Result<()> {
        let result = self
            .send_unit(self.request(Method::POST, "/auth/logout")?)
            .await;
        self.set_token(None)?;
        result
    }

    pub async fn me(&self) -> Result<AuthUser> {
        let payload: MePayload = self.get("/auth/me").await?;
        Ok(payload.user)
    }

    pub async fn list_subcategories(&self, category_id: Option<&str>) -> Result<Vec<Subcategory>> {
        let filter = SubcategoryFilter {
            category_id: category_id.map(str::to_string),
        };
        self.send(self.request(Method::GET, "/subcategories")?.query(&filter))
            .await
    }

    pub async fn list_notes_filtered(&self, filter: &NoteFilter) -> Result<Vec<Note>> {
        self.send(self.request(Method::GET, "/notes")?.query(filter))
            .await
    }

    pub async fn get_note(&self, id: &str) -> Result<Note> {
        self.get(&format!("/notes/{}", id)).await
    }

    pub async fn global_search(
        &self,
        q: &str,
        kind: SearchType,
        limit: Option<u32>,
    ) -> Result<GlobalSearchResults> {
        let params = GlobalSearchParams {
            q: q.to_string(),
            kind,
            limit,
        };
        self.send(self.request(Method::GET, "/search")?.query(&params))
            .await
    }

    pub async fn tag_counts(&self) -> Result<Vec<TagCount>> {
        self.get("/tags").await
    }
}

#[async_trait]
impl Backend for RestBackend {
    fn kind(&self) -> DataSource {
        DataSource::Rest
    }

    async fn list_categories(&self) -> Result<Vec<Category>> {
        self.get("/categories").await
    }

    async fn create_category(&self, name: &str, color: &str) -> Result<Category> {
        let body = CreateCategoryRequest {
            name: name.to_string(),
            color: color.to_string(),
        };
        self.post("/categories", &body).await
    }

    async fn update_category(&self, id: &str, patch: &CategoryPatch) -> Result<()> {
        self.put(&format!("/categories/{}", id), patch).await
    }

    async fn delete_category(&self, id: &str) -> Result<()> {
        self.delete(&format!("/categories/{}", id)).await
    }

    async fn create_subcategory(&self, category_id: &str, name: &str) -> Result<Subcategory> {
        let body = CreateSubcategoryRequest {
            name: name.to_string(),
            category_id: category_id.to_string(),
        };
        self.post("/subcategories", &body).await
    }

    async fn update_subcategory(&self, id: &str, patch: &SubcategoryPatch) -> Result<()> {
        self.put(&format!("/subcategories/{}", id), patch).await
    }

    async fn delete_subcategory(&self, id: &str) -> Result<()> {
        self.delete(&format!("/subcategories/{}", id)).await
    }

    async fn list_notes(&self) -> Result<Vec<Note>> {
        self.get("/notes").await
    }

    async fn create_note(&self, note: &NewNote) -> Result<Note> {
        self.post("/notes", note).await
    }

    async fn update_note(&self, id: &str, patch: &NotePatch) -> Result<()> {
        self.put(&format!("/notes/{}", id), patch).await
    }

    async fn delete_note(&self, id: &str) -> Result<()> {
        self.delete(&format!("/notes/{}", id)).await
    }

    async fn upload_image(&self, image: &ImageUpload) -> Result<String> {
        let part = reqwest::multipart::Part::bytes(image.bytes.clone())
            .file_name(image.file_name.clone())
            .mime_str(&image.content_type)?;
        let form = reqwest::multipart::Form::new().part("file", part);
        let uploaded: ImageUrl = self
            .send(self.request(Method::POST, "/upload/image")?.multipart(form))
            .await?;
        Ok(uploaded.url)
    }

    async fn delete_image(&self, reference: &str) -> Result<()> {
        let body = ImageUrl {
            url: reference.to_string(),
        };
        self.send_unit(self.request(Method::DELETE, "/upload/image")?.json(&body))
            .await
    }

    async fn search_notes(&self, query: &SearchQuery) -> Result<Vec<Note>> {
        let filter = NoteFilter {
            category_id: query.category_id.clone(),
            search: Some(query.text.clone()),
            limit: query.limit,
            offset: query.offset,
            ..Default::default()
        };
        self.list_notes_filtered(&filter).await
    }
}
