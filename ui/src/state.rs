use rocket::request::{FromRequest, Outcome, Request};
use std::convert::Infallible;
use std::sync::Arc;
use tracing::debug;

use crate::aggregate::{inputs_from_sources, PlatformInput};
use crate::config::AppConfig;
use crate::db::LocalStore;
use crate::error::Result;
use crate::gateway::ScanGateway;
use crate::jobs::JobRegistry;
use crate::normalize::ScanSource;

const USER_ID_HEADER: &str = "X-User-Id";
const USER_EMAIL_HEADER: &str = "X-User-Email";

/// Shared application state managed by Rocket
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub gateway: Arc<dyn ScanGateway>,
    pub store: LocalStore,
    pub jobs: Arc<JobRegistry>,
}

impl AppState {
    pub fn new(config: AppConfig, gateway: Arc<dyn ScanGateway>) -> Result<Self> {
        let store = LocalStore::open(&config.db_path)?;
        Ok(Self {
            config: Arc::new(config),
            gateway,
            store,
            jobs: Arc::new(JobRegistry::new()),
        })
    }

    /// Fetches all four scan sources at once and regroups them per platform.
    /// A failing source never fails the whole load.
    pub async fn load_inputs(&self, user_id: &str) -> (Vec<PlatformInput>, Vec<String>) {
        let gateway = &self.gateway;
        let (tools, extension, mode, overview) = tokio::join!(
            gateway.fetch_source(ScanSource::ToolIntegrations, user_id),
            gateway.fetch_source(ScanSource::ExtensionChatgpt, user_id),
            gateway.fetch_source(ScanSource::GoogleAiMode, user_id),
            gateway.fetch_source(ScanSource::GoogleAiOverview, user_id),
        );
        debug!(user_id, "Loaded scan sources");

        inputs_from_sources(vec![
            (ScanSource::ToolIntegrations, tools),
            (ScanSource::ExtensionChatgpt, extension),
            (ScanSource::GoogleAiMode, mode),
            (ScanSource::GoogleAiOverview, overview),
        ])
    }
}

/// Who is asking. Authentication happens upstream; the proxy forwards identity headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserContext {
    pub user_id: String,
    pub email: Option<String>,
    pub is_admin: bool,
}

impl UserContext {
    pub fn resolve(config: &AppConfig, user_id: Option<&str>, email: Option<&str>) -> Self {
        let clean = |v: Option<&str>| v.map(str::trim).filter(|v| !v.is_empty()).map(str::to_string);
        let email = clean(email);
        Self {
            user_id: clean(user_id).unwrap_or_else(|| config.default_user_id.clone()),
            is_admin: config.is_admin(email.as_deref()),
            email,
        }
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for UserContext {
    type Error = Infallible;

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let headers = req.headers();
        let user_id = headers.get_one(USER_ID_HEADER);
        let email = headers.get_one(USER_EMAIL_HEADER);
        let user = match req.rocket().state::<AppState>() {
            Some(state) => UserContext::resolve(&state.config, user_id, email),
            None => UserContext::resolve(&AppConfig::default(), user_id, email),
        };
        Outcome::Success(user)
    }
}
