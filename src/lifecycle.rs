//! Host side of the agent lifecycle.
//!
//! `Host` plays the part of the platform that runs the agent: it installs a
//! new agent, activates it once the install succeeded (right away when the
//! agent skips waiting, otherwise once the previous generation controls no
//! page), keeps track of open clients and which generation controls them, and
//! routes fetches to the active agent only.

use async_trait::async_trait;
use color_eyre::Result;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::agent::{ActivateReport, AgentError, OfflineCacheAgent};
use crate::fetch::{Request, Response};

#[derive(Error, Debug)]
pub enum HostError {
  #[error("No active worker to handle the request")]
  NoActiveWorker,

  #[error("Invalid state: {0}")]
  InvalidState(String),

  #[error("Registration error: {0}")]
  Registration(color_eyre::Report),
}

/// Operations the agent may request from its host while handling an event.
#[async_trait]
pub trait WorkerScope: Send + Sync {
  /// Activate as soon as installation completes instead of waiting for the
  /// previous worker's clients to go away.
  async fn skip_waiting(&self);

  /// Make the activating worker the controller of every open client.
  /// Returns the number of clients now controlled.
  async fn claim_clients(&self) -> Result<usize, HostError>;
}

/// Persists which cache generation is live between runs.
pub trait RegistrationStore: Send + Sync {
  fn active_generation(&self) -> Result<Option<String>>;
  fn set_active_generation(&self, name: &str) -> Result<()>;
}

/// Worker lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
  Installing,
  Installed,
  Activating,
  Activated,
  /// Install failed or a newer worker replaced this one
  Redundant,
}

impl fmt::Display for WorkerState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      WorkerState::Installing => "installing",
      WorkerState::Installed => "installed",
      WorkerState::Activating => "activating",
      WorkerState::Activated => "activated",
      WorkerState::Redundant => "redundant",
    };
    f.write_str(s)
  }
}

/// An open page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Client {
  pub id: u64,
  pub url: Url,
  /// Generation of the worker controlling this client
  pub controller: Option<String>,
}

/// Open clients and their controllers.
#[derive(Debug, Default)]
pub struct ClientRegistry {
  clients: Mutex<Vec<Client>>,
  next_id: AtomicU64,
}

impl ClientRegistry {
  fn lock(&self) -> MutexGuard<'_, Vec<Client>> {
    self.clients.lock().unwrap_or_else(|e| e.into_inner())
  }

  /// Register a page load, controlled by `controller` if one is active.
  pub fn open(&self, url: Url, controller: Option<String>) -> u64 {
    let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
    self.lock().push(Client {
      id,
      url,
      controller,
    });
    id
  }

  pub fn close(&self, id: u64) -> bool {
    let mut clients = self.lock();
    let before = clients.len();
    clients.retain(|c| c.id != id);
    clients.len() != before
  }

  pub fn get(&self, id: u64) -> Option<Client> {
    self.lock().iter().find(|c| c.id == id).cloned()
  }

  pub fn list(&self) -> Vec<Client> {
    self.lock().clone()
  }

  pub fn len(&self) -> usize {
    self.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.lock().is_empty()
  }

  /// Whether any open client is controlled by `generation`.
  pub fn controls_any(&self, generation: &str) -> bool {
    self
      .lock()
      .iter()
      .any(|c| c.controller.as_deref() == Some(generation))
  }

  /// Set every client's controller to `generation`.
  pub fn claim(&self, generation: &str) -> usize {
    let mut clients = self.lock();
    for client in clients.iter_mut() {
      client.controller = Some(generation.to_string());
    }
    clients.len()
  }
}

/// Scope handed to the agent for one install or activate event.
struct EventScope<'a> {
  generation: &'a str,
  clients: &'a ClientRegistry,
  skip_waiting: AtomicBool,
  activating: bool,
}

impl<'a> EventScope<'a> {
  fn new(generation: &'a str, clients: &'a ClientRegistry, activating: bool) -> Self {
    Self {
      generation,
      clients,
      skip_waiting: AtomicBool::new(false),
      activating,
    }
  }
}

#[async_trait]
impl WorkerScope for EventScope<'_> {
  async fn skip_waiting(&self) {
    self.skip_waiting.store(true, Ordering::SeqCst);
  }

  async fn claim_clients(&self) -> Result<usize, HostError> {
    if !self.activating {
      return Err(HostError::InvalidState(format!(
        "worker {} is not activating",
        self.generation
      )));
    }
    Ok(self.clients.claim(self.generation))
  }
}

/// Result of registering a new agent.
#[derive(Debug)]
pub enum InstallOutcome {
  /// Installed and activated
  Activated(ActivateReport),
  /// Installed; waits for the pages of the active generation to close
  Waiting,
  /// Install failed; the previous worker (if any) stays active
  Failed(AgentError),
}

pub struct Host {
  registry: Arc<dyn RegistrationStore>,
  clients: ClientRegistry,
  active: Mutex<Option<Arc<OfflineCacheAgent>>>,
  waiting: Mutex<Option<Arc<OfflineCacheAgent>>>,
}

impl Host {
  pub fn new(registry: Arc<dyn RegistrationStore>) -> Self {
    Self {
      registry,
      clients: ClientRegistry::default(),
      active: Mutex::new(None),
      waiting: Mutex::new(None),
    }
  }

  pub fn clients(&self) -> &ClientRegistry {
    &self.clients
  }

  /// Generation of the active worker, falling back to the persisted record.
  pub fn active_generation(&self) -> Result<Option<String>> {
    if let Some(agent) = lock(&self.active).as_ref() {
      return Ok(Some(agent.generation().to_string()));
    }
    self.registry.active_generation()
  }

  pub fn active_state(&self) -> Option<WorkerState> {
    lock(&self.active).as_ref().map(|_| WorkerState::Activated)
  }

  /// Generation installed but not yet activated.
  pub fn waiting_generation(&self) -> Option<String> {
    lock(&self.waiting)
      .as_ref()
      .map(|agent| agent.generation().to_string())
  }

  /// State of the worker owning `generation`, if the host knows it.
  pub fn state_of(&self, generation: &str) -> Option<WorkerState> {
    let is = |slot: &Mutex<Option<Arc<OfflineCacheAgent>>>| {
      lock(slot)
        .as_ref()
        .is_some_and(|agent| agent.generation() == generation)
    };
    if is(&self.active) {
      Some(WorkerState::Activated)
    } else if is(&self.waiting) {
      Some(WorkerState::Installed)
    } else {
      None
    }
  }

  /// Open a page; it is controlled by the active worker, if any.
  pub fn open_client(&self, url: Url) -> u64 {
    let controller = lock(&self.active)
      .as_ref()
      .map(|agent| agent.generation().to_string());
    self.clients.open(url, controller)
  }

  /// Close a page. When it was the last page of the active generation and a
  /// worker is waiting, that worker is activated.
  pub async fn close_client(&self, id: u64) -> Option<ActivateReport> {
    if !self.clients.close(id) {
      return None;
    }
    if self.previous_controls_clients() {
      return None;
    }
    let waiting = lock(&self.waiting).take()?;
    Some(self.activate(waiting).await)
  }

  /// Install `agent` and activate it if the install succeeded.
  pub async fn register(&self, agent: Arc<OfflineCacheAgent>) -> InstallOutcome {
    let generation = agent.generation().to_string();
    info!(generation = %generation, state = %WorkerState::Installing, "Worker state");

    let scope = EventScope::new(&generation, &self.clients, false);
    if let Err(e) = agent.on_install(&scope).await {
      error!(
        generation = %generation,
        state = %WorkerState::Redundant,
        error = %e,
        "Install failed"
      );
      return InstallOutcome::Failed(e);
    }

    let skip_waiting = scope.skip_waiting.load(Ordering::SeqCst);
    debug!(
      generation = %generation,
      skip_waiting,
      state = %WorkerState::Installed,
      "Worker state"
    );

    if !skip_waiting && self.previous_controls_clients() {
      let replaced = lock(&self.waiting).replace(agent);
      if let Some(replaced) = replaced {
        info!(
          generation = %replaced.generation(),
          state = %WorkerState::Redundant,
          "Waiting worker replaced"
        );
      }
      info!(generation = %generation, "Waiting for clients of the active worker to close");
      return InstallOutcome::Waiting;
    }

    // A worker that was waiting is superseded by this one
    lock(&self.waiting).take();
    InstallOutcome::Activated(self.activate(agent).await)
  }

  /// Adopt an agent whose generation is already recorded as active, without
  /// installing it again.
  pub fn resume(&self, agent: Arc<OfflineCacheAgent>) -> Result<(), HostError> {
    let recorded = self
      .registry
      .active_generation()
      .map_err(HostError::Registration)?;

    match recorded {
      Some(name) if name == agent.generation() => {
        *lock(&self.active) = Some(agent);
        Ok(())
      }
      Some(name) => Err(HostError::InvalidState(format!(
        "active generation is {}, not {}",
        name,
        agent.generation()
      ))),
      None => Err(HostError::NoActiveWorker),
    }
  }

  /// Run the activate event again for the active worker.
  pub async fn reactivate(&self) -> Result<ActivateReport, HostError> {
    let agent = self.active_agent().ok_or(HostError::NoActiveWorker)?;
    let generation = agent.generation().to_string();
    let scope = EventScope::new(&generation, &self.clients, true);
    Ok(agent.on_activate(&scope).await)
  }

  /// Route a request from a controlled page to the active worker.
  pub async fn dispatch_fetch(&self, request: Request) -> Result<Response, HostError> {
    let agent = self.active_agent().ok_or(HostError::NoActiveWorker)?;
    Ok(agent.on_fetch(request).await)
  }

  /// Wait for the active worker's background cache writes.
  pub async fn settle(&self) {
    if let Some(agent) = self.active_agent() {
      agent.settle().await;
    }
  }

  fn previous_controls_clients(&self) -> bool {
    match self.active_agent() {
      Some(active) => self.clients.controls_any(active.generation()),
      None => false,
    }
  }

  fn active_agent(&self) -> Option<Arc<OfflineCacheAgent>> {
    lock(&self.active).as_ref().map(Arc::clone)
  }

  async fn activate(&self, agent: Arc<OfflineCacheAgent>) -> ActivateReport {
    let generation = agent.generation().to_string();
    info!(generation = %generation, state = %WorkerState::Activating, "Worker state");

    let scope = EventScope::new(&generation, &self.clients, true);
    let report = agent.on_activate(&scope).await;

    if let Err(e) = self.registry.set_active_generation(&generation) {
      warn!(generation = %generation, error = %e, "Failed to record active generation");
    }

    let previous = lock(&self.active).replace(agent);
    if let Some(previous) = previous {
      info!(
        generation = %previous.generation(),
        state = %WorkerState::Redundant,
        "Previous worker replaced"
      );
    }
    info!(generation = %generation, state = %WorkerState::Activated, "Worker state");

    report
  }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(|e| e.into_inner())
}
