//! HTTP adapter for a hosted PostgREST backend (`{base}/rest/v1/{table}`).

pub mod mapper;
pub mod rows;

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use reqwest::{header, Method, RequestBuilder, StatusCode};
use runtime::{AreaUnit, ConfigError, GatewayConfig};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, instrument, warn};
use url::Url;

use crate::contract::{
    error::GatewayError,
    gateway::{AccessTokenSink, Entity, EntityGateway, UsersGateway},
    model::{Field, FieldDraft, FieldPatch, Job, JobDraft, JobPatch, NewUser, User, UserPatch},
};
use rows::{FieldRow, JobRow, PostgrestErrorBody, UserRow};

const FIELDS: &str = "fields";
const JOBS: &str = "jobs";
const USERS: &str = "users";

const ALL_COLUMNS: &str = "*";
/// Jobs embed their assignee through the `assigned_to_id` foreign key.
const JOB_COLUMNS: &str = "*,assigned_to:users!assigned_to_id(id,name,email)";

/// PostgREST code for "the result contains 0 rows" on single-object requests.
const NO_ROWS_CODE: &str = "PGRST116";

pub struct PostgrestGateway {
    client: reqwest::Client,
    base: Url,
    anon_key: String,
    access_token: RwLock<Option<String>>,
    area_unit: AreaUnit,
}

impl PostgrestGateway {
    pub fn new(
        client: reqwest::Client,
        base: Url,
        anon_key: impl Into<String>,
        area_unit: AreaUnit,
    ) -> Self {
        Self {
            client,
            base,
            anon_key: anon_key.into(),
            access_token: RwLock::new(None),
            area_unit,
        }
    }

    /// Validate the gateway section and build a client honoring its timeout.
    pub fn from_config(cfg: &GatewayConfig) -> Result<Self, ConfigError> {
        let base = cfg.validate()?;

        let mut builder = reqwest::Client::builder();
        if cfg.timeout_sec > 0 {
            builder = builder.timeout(Duration::from_secs(cfg.timeout_sec));
        }
        let client = builder.build().map_err(|e| ConfigError::Invalid {
            key: "gateway",
            reason: format!("cannot build HTTP client: {e}"),
        })?;

        Ok(Self::new(client, base, cfg.anon_key.trim(), cfg.area_unit))
    }

    fn table_url(&self, table: &str) -> Result<Url, GatewayError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| {
                GatewayError::transport(format!("base URL '{}' cannot carry a path", self.base))
            })?
            .pop_if_empty()
            .extend(["rest", "v1", table]);
        Ok(url)
    }

    fn request(
        &self,
        method: Method,
        table: &str,
        query: &[(&str, &str)],
    ) -> Result<RequestBuilder, GatewayError> {
        let mut url = self.table_url(table)?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }

        let bearer = self
            .access_token
            .read()
            .clone()
            .unwrap_or_else(|| self.anon_key.clone());

        let builder = self
            .client
            .request(method.clone(), url)
            .header("apikey", &self.anon_key)
            .bearer_auth(bearer)
            .header(header::ACCEPT, "application/json");

        Ok(if method == Method::GET {
            builder
        } else {
            builder.header("Prefer", "return=representation")
        })
    }

    /// Send and decode a JSON array of rows.
    async fn fetch<R: DeserializeOwned>(
        &self,
        builder: RequestBuilder,
        kind: &'static str,
        id: &str,
    ) -> Result<Vec<R>, GatewayError> {
        let response = self.send(builder, kind, id).await?;
        response
            .json::<Vec<R>>()
            .await
            .map_err(|e| GatewayError::transport(format!("undecodable {kind} response: {e}")))
    }

    async fn send(
        &self,
        builder: RequestBuilder,
        kind: &'static str,
        id: &str,
    ) -> Result<reqwest::Response, GatewayError> {
        let response = builder
            .send()
            .await
            .map_err(|e| GatewayError::transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = response.text().await.unwrap_or_default();
        let body: PostgrestErrorBody = serde_json::from_str(&text).unwrap_or_default();
        let err = classify(status, &body, &text, kind, id);
        warn!(
            %status,
            code = body.code.as_deref().unwrap_or(""),
            error = %err,
            "PostgREST request failed"
        );
        Err(err)
    }

    async fn insert_one<B: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        table: &str,
        columns: &str,
        kind: &'static str,
        body: &B,
    ) -> Result<R, GatewayError> {
        let builder = self
            .request(Method::POST, table, &[("select", columns)])?
            .json(body);
        let rows: Vec<R> = self.fetch(builder, kind, "").await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| {
                GatewayError::transport(format!("{kind} insert returned no representation"))
            })
    }

    async fn update_one<B: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        table: &str,
        columns: &str,
        kind: &'static str,
        id: &str,
        body: &B,
    ) -> Result<R, GatewayError> {
        let filter = format!("eq.{id}");
        let builder = self
            .request(
                Method::PATCH,
                table,
                &[("select", columns), ("id", filter.as_str())],
            )?
            .json(body);
        let rows: Vec<R> = self.fetch(builder, kind, id).await?;
        // PATCH matching no row answers 200 with an empty array
        rows.into_iter()
            .next()
            .ok_or_else(|| GatewayError::not_found(kind, id))
    }

    async fn delete_by_id(
        &self,
        table: &str,
        kind: &'static str,
        id: &str,
    ) -> Result<(), GatewayError> {
        let filter = format!("eq.{id}");
        let builder = self.request(Method::DELETE, table, &[("id", filter.as_str())])?;
        self.send(builder, kind, id).await?;
        Ok(())
    }

    async fn list_owned<R: DeserializeOwned>(
        &self,
        table: &str,
        columns: &str,
        kind: &'static str,
        owner_id: &str,
    ) -> Result<Vec<R>, GatewayError> {
        let filter = format!("eq.{owner_id}");
        let builder = self.request(
            Method::GET,
            table,
            &[
                ("select", columns),
                ("user_id", filter.as_str()),
                ("order", "created_at.desc"),
            ],
        )?;
        self.fetch(builder, kind, owner_id).await
    }
}

/// Map an HTTP failure onto the gateway error taxonomy.
fn classify(
    status: StatusCode,
    body: &PostgrestErrorBody,
    raw: &str,
    kind: &'static str,
    id: &str,
) -> GatewayError {
    if body.code.as_deref() == Some(NO_ROWS_CODE) || status == StatusCode::NOT_FOUND {
        return GatewayError::not_found(kind, id);
    }

    let message = body.describe().unwrap_or_else(|| {
        let raw = raw.trim();
        if raw.is_empty() {
            format!("HTTP {status}")
        } else {
            raw.to_string()
        }
    });

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => GatewayError::auth(message),
        StatusCode::BAD_REQUEST | StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY => {
            GatewayError::validation(message)
        }
        _ => GatewayError::transport(format!("HTTP {status}: {message}")),
    }
}

impl AccessTokenSink for PostgrestGateway {
    fn set_access_token(&self, token: Option<String>) {
        debug!(present = token.is_some(), "Access token replaced");
        *self.access_token.write() = token;
    }
}

#[async_trait]
impl EntityGateway<Field> for PostgrestGateway {
    #[instrument(name = "farm_sync.postgrest.fields.list", skip(self))]
    async fn list(&self, owner_id: &str) -> Result<Vec<Field>, GatewayError> {
        let rows: Vec<FieldRow> = self.list_owned(FIELDS, ALL_COLUMNS, Field::KIND, owner_id).await?;
        debug!(count = rows.len(), "Fetched fields");
        Ok(rows
            .into_iter()
            .map(|r| mapper::field_from_row(r, self.area_unit))
            .collect())
    }

    #[instrument(name = "farm_sync.postgrest.fields.create", skip(self, draft))]
    async fn create(
        &self,
        owner_id: Option<&str>,
        draft: FieldDraft,
    ) -> Result<Field, GatewayError> {
        let body = [mapper::field_insert(owner_id, draft, self.area_unit)];
        let row: FieldRow = self.insert_one(FIELDS, ALL_COLUMNS, Field::KIND, &body).await?;
        Ok(mapper::field_from_row(row, self.area_unit))
    }

    #[instrument(name = "farm_sync.postgrest.fields.update", skip(self, patch))]
    async fn update(&self, id: &str, patch: FieldPatch) -> Result<Field, GatewayError> {
        let body = mapper::field_update(patch, self.area_unit, Utc::now());
        let row: FieldRow = self.update_one(FIELDS, ALL_COLUMNS, Field::KIND, id, &body).await?;
        Ok(mapper::field_from_row(row, self.area_unit))
    }

    #[instrument(name = "farm_sync.postgrest.fields.delete", skip(self))]
    async fn delete(&self, id: &str) -> Result<(), GatewayError> {
        self.delete_by_id(FIELDS, Field::KIND, id).await
    }
}

#[async_trait]
impl EntityGateway<Job> for PostgrestGateway {
    #[instrument(name = "farm_sync.postgrest.jobs.list", skip(self))]
    async fn list(&self, owner_id: &str) -> Result<Vec<Job>, GatewayError> {
        let rows: Vec<JobRow> = self.list_owned(JOBS, JOB_COLUMNS, Job::KIND, owner_id).await?;
        debug!(count = rows.len(), "Fetched jobs");
        rows.into_iter().map(mapper::job_from_row).collect()
    }

    #[instrument(name = "farm_sync.postgrest.jobs.create", skip(self, draft))]
    async fn create(&self, owner_id: Option<&str>, draft: JobDraft) -> Result<Job, GatewayError> {
        let body = [mapper::job_insert(owner_id, draft)];
        let row: JobRow = self.insert_one(JOBS, JOB_COLUMNS, Job::KIND, &body).await?;
        mapper::job_from_row(row)
    }

    #[instrument(name = "farm_sync.postgrest.jobs.update", skip(self, patch))]
    async fn update(&self, id: &str, patch: JobPatch) -> Result<Job, GatewayError> {
        let body = mapper::job_update(patch, Utc::now());
        let row: JobRow = self.update_one(JOBS, JOB_COLUMNS, Job::KIND, id, &body).await?;
        mapper::job_from_row(row)
    }

    #[instrument(name = "farm_sync.postgrest.jobs.delete", skip(self))]
    async fn delete(&self, id: &str) -> Result<(), GatewayError> {
        self.delete_by_id(JOBS, Job::KIND, id).await
    }
}

#[async_trait]
impl UsersGateway for PostgrestGateway {
    #[instrument(name = "farm_sync.postgrest.users.list", skip(self))]
    async fn list(&self) -> Result<Vec<User>, GatewayError> {
        let builder = self.request(
            Method::GET,
            USERS,
            &[("select", ALL_COLUMNS), ("order", "created_at.desc")],
        )?;
        let rows: Vec<UserRow> = self.fetch(builder, "user", "").await?;
        Ok(rows.into_iter().map(mapper::user_from_row).collect())
    }

    #[instrument(name = "farm_sync.postgrest.users.find", skip(self))]
    async fn find(&self, id: &str) -> Result<Option<User>, GatewayError> {
        let filter = format!("eq.{id}");
        let builder = self.request(
            Method::GET,
            USERS,
            &[("select", ALL_COLUMNS), ("id", filter.as_str())],
        )?;
        match self.fetch::<UserRow>(builder, "user", id).await {
            Ok(rows) => Ok(rows.into_iter().next().map(mapper::user_from_row)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    #[instrument(
        name = "farm_sync.postgrest.users.create",
        skip(self, new_user),
        fields(user_id = %new_user.id)
    )]
    async fn create(&self, new_user: NewUser) -> Result<User, GatewayError> {
        let body = [mapper::user_insert(new_user)];
        let row: UserRow = self.insert_one(USERS, ALL_COLUMNS, "user", &body).await?;
        Ok(mapper::user_from_row(row))
    }

    #[instrument(name = "farm_sync.postgrest.users.update", skip(self, patch))]
    async fn update(&self, id: &str, patch: UserPatch) -> Result<User, GatewayError> {
        let body = mapper::user_update(patch);
        let row: UserRow = self.update_one(USERS, ALL_COLUMNS, "user", id, &body).await?;
        Ok(mapper::user_from_row(row))
    }

    #[instrument(name = "farm_sync.postgrest.users.delete", skip(self))]
    async fn delete(&self, id: &str) -> Result<(), GatewayError> {
        self.delete_by_id(USERS, "user", id).await
    }
}
