//! Concurrency gate tracking in-flight generation tasks per scope and process-wide

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{AppError, Result};

#[derive(Debug, Default)]
struct GateState {
    scopes: DashMap<String, HashSet<String>>,
    global: DashSet<String>,
    /// Zero means unlimited
    max_per_scope: AtomicUsize,
}

impl GateState {
    fn remove(&self, scope: &str, id: &str) {
        if let Some(mut tasks) = self.scopes.get_mut(scope) {
            tasks.remove(id);
        }
        self.scopes.remove_if(scope, |_, tasks| tasks.is_empty());
        self.global.remove(id);
    }
}

/// Per-scope and global in-flight bookkeeping
#[derive(Debug, Clone, Default)]
pub struct ConcurrencyGate {
    state: Arc<GateState>,
}

impl ConcurrencyGate {
    pub fn new(max_per_scope: usize) -> Self {
        let gate = Self::default();
        gate.set_max_per_scope(max_per_scope);
        gate
    }

    pub fn set_max_per_scope(&self, max_per_scope: usize) {
        self.state.max_per_scope.store(max_per_scope, Ordering::Relaxed);
    }

    pub fn max_per_scope(&self) -> usize {
        self.state.max_per_scope.load(Ordering::Relaxed)
    }

    /// Admit a task for `scope`, or reject when the scope is at its ceiling.
    ///
    /// The global count never rejects; it is only reported as queue depth.
    pub fn try_admit(&self, scope: &str) -> Result<TaskGuard> {
        let queue_depth = self.state.global.len();
        let max = self.max_per_scope();
        let id = Uuid::new_v4().to_string();

        {
            let mut tasks = self.state.scopes.entry(scope.to_string()).or_default();
            if max > 0 && tasks.len() >= max {
                warn!(scope = %scope, in_flight = tasks.len(), "Rejected task over scope ceiling");
                return Err(AppError::AdmissionRejected { queue_depth });
            }
            tasks.insert(id.clone());
        }
        self.state.global.insert(id.clone());

        debug!(scope = %scope, task = %id, queue_depth = queue_depth, "Task admitted");
        Ok(TaskGuard {
            id,
            scope: scope.to_string(),
            queue_depth,
            state: self.state.clone(),
            released: AtomicBool::new(false),
        })
    }

    /// Tasks in flight across all scopes
    pub fn in_flight(&self) -> usize {
        self.state.global.len()
    }

    pub fn scope_in_flight(&self, scope: &str) -> usize {
        self.state.scopes.get(scope).map_or(0, |tasks| tasks.len())
    }
}

/// Admitted task; its slot is released exactly once, explicitly or on drop
#[derive(Debug)]
pub struct TaskGuard {
    id: String,
    scope: String,
    queue_depth: usize,
    state: Arc<GateState>,
    released: AtomicBool,
}

impl TaskGuard {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Global in-flight count observed at admission
    pub fn queue_depth(&self) -> usize {
        self.queue_depth
    }

    pub fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        self.state.remove(&self.scope, &self.id);
        debug!(scope = %self.scope, task = %self.id, "Task released");
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.release();
    }
}
