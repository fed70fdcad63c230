//! Bounded pools of management agents.
//!
//! # Responsibilities
//! - Reuse idle agents per router endpoint
//! - Bound the number of idle connections kept open
//! - Never hand out an agent that has seen a transport failure
//!
//! # Design Decisions
//! - `get` never waits: it pops an idle agent or opens a new one
//! - `put` closes whatever it cannot keep
//! - `PooledAgent` releases on drop, so error paths cannot leak agents

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use dashmap::DashMap;

use crate::management::agent::Agent;
use crate::management::transport::Connect;
use crate::management::types::ManagementResult;
use crate::observability::metrics;

/// Default number of idle agents kept per endpoint.
pub const DEFAULT_CAPACITY: usize = 10;

/// Idle agents for one management endpoint.
pub struct AgentPool {
    connector: Arc<dyn Connect>,
    idle: Mutex<Vec<Agent>>,
    capacity: usize,
    timeout: Duration,
}

impl AgentPool {
    pub fn new(connector: Arc<dyn Connect>, capacity: usize, timeout: Duration) -> Self {
        Self {
            connector,
            idle: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
            timeout,
        }
    }

    pub fn endpoint(&self) -> &str {
        self.connector.endpoint()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Agent>> {
        self.idle.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn idle_count(&self) -> usize {
        self.lock().len()
    }

    /// Take an idle agent, or connect a new one.
    pub async fn get(&self) -> ManagementResult<Agent> {
        let pooled = self.lock().pop();
        if let Some(agent) = pooled {
            metrics::record_pool_idle(self.endpoint(), self.idle_count());
            return Ok(agent);
        }
        Agent::connect(self.connector.as_ref(), self.timeout).await
    }

    /// Return an agent. Closed agents are dropped and excess ones closed.
    pub fn put(&self, mut agent: Agent) {
        if agent.is_closed() {
            tracing::debug!(endpoint = %self.endpoint(), "Discarding closed management agent");
            return;
        }
        let mut idle = self.lock();
        if idle.len() < self.capacity {
            idle.push(agent);
            let count = idle.len();
            drop(idle);
            metrics::record_pool_idle(self.endpoint(), count);
        } else {
            drop(idle);
            tracing::debug!(endpoint = %self.endpoint(), "Agent pool full, closing agent");
            agent.close();
        }
    }

    /// Get an agent wrapped in a guard that puts it back on drop.
    pub async fn acquire(self: &Arc<Self>) -> ManagementResult<PooledAgent> {
        let agent = self.get().await?;
        Ok(PooledAgent {
            agent: Some(agent),
            pool: Arc::clone(self),
        })
    }

    /// Close every idle agent.
    pub fn drain(&self) {
        let agents: Vec<Agent> = self.lock().drain(..).collect();
        for mut agent in agents {
            agent.close();
        }
        metrics::record_pool_idle(self.endpoint(), 0);
    }
}

/// An agent on loan from a pool.
pub struct PooledAgent {
    agent: Option<Agent>,
    pool: Arc<AgentPool>,
}

impl Deref for PooledAgent {
    type Target = Agent;

    fn deref(&self) -> &Agent {
        // Only `drop` takes the agent out.
        self.agent.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl DerefMut for PooledAgent {
    fn deref_mut(&mut self) -> &mut Agent {
        self.agent.as_mut().unwrap_or_else(|| unreachable!())
    }
}

impl Drop for PooledAgent {
    fn drop(&mut self) {
        if let Some(agent) = self.agent.take() {
            self.pool.put(agent);
        }
    }
}

type ConnectorFactory = dyn Fn(&str) -> ManagementResult<Arc<dyn Connect>> + Send + Sync;

/// One pool per router endpoint URL.
pub struct AgentPools {
    pools: DashMap<String, Arc<AgentPool>>,
    factory: Box<ConnectorFactory>,
    capacity: usize,
    timeout: Duration,
}

impl AgentPools {
    pub fn new<F>(factory: F, capacity: usize, timeout: Duration) -> Self
    where
        F: Fn(&str) -> ManagementResult<Arc<dyn Connect>> + Send + Sync + 'static,
    {
        Self {
            pools: DashMap::new(),
            factory: Box::new(factory),
            capacity,
            timeout,
        }
    }

    /// The pool for `endpoint`, created on first use.
    pub fn pool(&self, endpoint: &str) -> ManagementResult<Arc<AgentPool>> {
        if let Some(pool) = self.pools.get(endpoint) {
            return Ok(Arc::clone(pool.value()));
        }
        let connector = (self.factory)(endpoint)?;
        let pool = self
            .pools
            .entry(endpoint.to_string())
            .or_insert_with(|| Arc::new(AgentPool::new(connector, self.capacity, self.timeout)));
        Ok(Arc::clone(pool.value()))
    }

    /// Forget an endpoint, closing its idle agents.
    pub fn remove(&self, endpoint: &str) {
        if let Some((_, pool)) = self.pools.remove(endpoint) {
            pool.drain();
        }
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }
}
