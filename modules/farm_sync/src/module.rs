use std::sync::Arc;

use runtime::{AppConfig, ConfigError};
use tracing::info;

use crate::contract::{
    gateway::{AccessTokenSink, EntityGateway, UsersGateway},
    model::{Field, Job},
};
use crate::domain::{
    assignees::AssigneeDirectory,
    session::SessionController,
    store::{FieldStore, JobStore, ManagedStore},
    weather::WeatherStore,
};
use crate::infra::{InMemoryGateway, PostgrestGateway};

/// Fully wired synchronization core: one store per entity family plus the
/// controller that binds them to the auth signal.
#[derive(Clone)]
pub struct FarmSync {
    pub fields: Arc<FieldStore>,
    pub jobs: Arc<JobStore>,
    /// Users a job can be assigned to.
    pub assignees: Arc<AssigneeDirectory>,
    pub weather: Arc<WeatherStore>,
    pub session: Arc<SessionController>,
}

impl FarmSync {
    /// Build against the hosted backend, or the in-process simulation when `mock` is set.
    /// A missing or malformed gateway section is fatal unless `mock` is set.
    pub fn from_config(config: &AppConfig, mock: bool) -> Result<Self, ConfigError> {
        if mock {
            info!("Using in-memory gateway");
            return Ok(Self::with_backend(Arc::new(InMemoryGateway::new())));
        }

        let (gateway, url) = config.require_gateway()?;
        let backend = PostgrestGateway::from_config(gateway)?;
        info!(
            host = url.host_str().unwrap_or(""),
            area_unit = ?gateway.area_unit,
            "Using PostgREST gateway"
        );
        Ok(Self::with_backend(Arc::new(backend)))
    }

    /// Wire every store and the controller to a single backend implementation.
    pub fn with_backend<B>(backend: Arc<B>) -> Self
    where
        B: EntityGateway<Field> + EntityGateway<Job> + UsersGateway + AccessTokenSink + 'static,
    {
        let fields = Arc::new(FieldStore::new(backend.clone()));
        let jobs = Arc::new(JobStore::new(backend.clone()));
        let assignees = Arc::new(AssigneeDirectory::new(backend.clone()));
        let stores: Vec<Arc<dyn ManagedStore>> =
            vec![fields.clone(), jobs.clone(), assignees.clone()];

        let credentials: Arc<dyn AccessTokenSink> = backend.clone();
        let session = SessionController::new(backend, Some(credentials), stores);

        Self {
            fields,
            jobs,
            assignees,
            weather: Arc::new(WeatherStore::default()),
            session: Arc::new(session),
        }
    }
}
