//! Wires the gateway, the pollers and the push channel around one
//! [`DashboardState`].

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use cemai_gateway::{ApiClient, PushClient, SessionStore};
use cemai_protocol::{Origin, Role};
use cemai_state::{DashboardState, NoticeVariant};

use crate::config::ConsoleConfig;
use crate::events;
use crate::log_stream;
use crate::oracle::Oracle;
use crate::pollers::{self, run_periodic};
use crate::workflow::{note_gateway_error, DecisionWorkflow};

const PUSH_CHANNEL_CAPACITY: usize = 256;
const SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

/// A running Control Tower session.
pub struct ControlTower {
    config: ConsoleConfig,
    api: ApiClient,
    state: Arc<DashboardState>,
    workflow: DecisionWorkflow<ApiClient>,
    oracle: Oracle,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl ControlTower {
    pub fn new(config: ConsoleConfig, session: Arc<SessionStore>) -> anyhow::Result<Self> {
        let api = ApiClient::new(config.client_config(), session.clone())?;
        let state = Arc::new(DashboardState::new(config.operator.role.unwrap_or_default()));
        state
            .prefs
            .update(|prefs| prefs.side_panel_collapsed = session.side_panel_collapsed());

        let workflow = DecisionWorkflow::new(Arc::new(api.clone()), state.clone());
        let oracle = Oracle::new(api.clone(), state.clone());
        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            config,
            api,
            state,
            workflow,
            oracle,
            shutdown,
            tasks: Vec::new(),
        })
    }

    pub fn config(&self) -> &ConsoleConfig {
        &self.config
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn state(&self) -> &Arc<DashboardState> {
        &self.state
    }

    pub fn workflow(&self) -> &DecisionWorkflow<ApiClient> {
        &self.workflow
    }

    pub fn oracle(&self) -> &Oracle {
        &self.oracle
    }

    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Resolve the current user and backfill the log pane.
    ///
    /// Returns the origin of the backfilled log entries.
    pub async fn bootstrap(&self) -> Option<Origin> {
        match self.api.me().await {
            Ok(fetched) => {
                let demo = fetched.is_demo();
                let user = fetched.into_value();
                let role = self.config.operator.role.unwrap_or(user.role);
                tracing::info!(user = %user.email, %role, demo, "session user resolved");
                self.state.role.set(role);
                self.state.user.set(Some(user));
            }
            Err(e) => {
                tracing::warn!(error = %e, "could not resolve session user");
                note_gateway_error(&self.state, &e);
            }
        }
        log_stream::backfill(&self.api, &self.state, self.config.log_feed.backfill).await
    }

    /// Bootstrap, then spawn every background task.
    pub async fn start(&mut self) {
        let backfill = self.bootstrap().await;

        let workflow = self.workflow.clone();
        self.spawn_periodic("decisions", self.config.decision_interval(), move || {
            let workflow = workflow.clone();
            async move {
                workflow.tick().await;
            }
        });

        let (api, state) = (self.api.clone(), self.state.clone());
        self.spawn_periodic("kpis", self.config.kpi_interval(), move || {
            let (api, state) = (api.clone(), state.clone());
            async move { pollers::refresh_kpis(&api, &state).await }
        });

        let (api, state) = (self.api.clone(), self.state.clone());
        self.spawn_periodic("health", self.config.health_interval(), move || {
            let (api, state) = (api.clone(), state.clone());
            async move { pollers::refresh_health(&api, &state).await }
        });

        let (api, state) = (self.api.clone(), self.state.clone());
        self.spawn_periodic("ping", self.config.ping_interval(), move || {
            let (api, state) = (api.clone(), state.clone());
            async move { pollers::ping(&api, &state).await }
        });

        if self.config.log_feed.simulated || backfill == Some(Origin::Demo) {
            tracing::info!("starting simulated master-control feed");
            self.tasks.push(tokio::spawn(log_stream::run_simulated_feed(
                self.state.clone(),
                self.config.log_feed_interval(),
                self.shutdown.subscribe(),
            )));
        }

        if self.config.push.enabled {
            self.start_push();
        }
    }

    fn spawn_periodic<F, Fut>(&mut self, name: &'static str, period: Duration, tick: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let shutdown = self.shutdown.subscribe();
        self.tasks
            .push(tokio::spawn(run_periodic(name, period, shutdown, tick)));
    }

    fn start_push(&mut self) {
        let config = match self.config.push_config() {
            Ok(config) => config,
            Err(e) => {
                tracing::error!(error = %e, "push channel disabled");
                return;
            }
        };
        let (tx, mut rx) = mpsc::channel(PUSH_CHANNEL_CAPACITY);
        self.tasks.push(tokio::spawn(
            PushClient::new(config, tx).run(self.shutdown.subscribe()),
        ));

        let state = self.state.clone();
        self.tasks.push(tokio::spawn(async move {
            while let Some(signal) = rx.recv().await {
                events::apply_signal(&state, signal);
            }
        }));
    }

    /// Cycle operator → manager → engineer for this session.
    pub fn cycle_role(&self) -> Role {
        let role = self.state.role.update(|role| {
            *role = role.next();
            *role
        });
        self.state.notify(NoticeVariant::Info, format!("Role switched to {role}"));
        role
    }

    pub fn set_role(&self, role: Role) {
        self.state.role.set(role);
        self.state.notify(NoticeVariant::Info, format!("Role switched to {role}"));
    }

    /// Collapse or expand the side panel and persist the choice.
    pub fn toggle_side_panel(&self) -> bool {
        let collapsed = self.state.prefs.update(|prefs| {
            prefs.side_panel_collapsed = !prefs.side_panel_collapsed;
            prefs.side_panel_collapsed
        });
        if let Err(e) = self.api.session().set_side_panel_collapsed(collapsed) {
            tracing::warn!(error = %e, "failed to persist side panel flag");
        }
        collapsed
    }

    /// Signal every task and wait briefly for them to finish. Requests in
    /// flight are not aborted; tasks that outlive the grace period are.
    pub async fn shutdown(&mut self) {
        self.shutdown.send_replace(true);
        for task in self.tasks.drain(..) {
            let abort = task.abort_handle();
            if tokio::time::timeout(SHUTDOWN_GRACE, task).await.is_err() {
                tracing::warn!("background task did not stop in time");
                abort.abort();
            }
        }
        tracing::info!("control tower stopped");
    }
}
