//! Fan-out dispatcher.
//!
//! Runs one task per address, bounded by a process-wide semaphore. Each
//! task owns a single connection and walks the command list in order.
//! The dispatcher waits for every task before returning, so the caller
//! always gets exactly one entry per requested address.

use std::any::Any;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::backend::{Backend, BackendConnection, CommandKind};
use crate::error::BackendError;
use crate::request::{AddressResult, CmdResult, QueryRequest};

/// What to do with the rest of an address's commands after one fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorPolicy {
    /// Record the failure and skip the remaining commands.
    Stop,
    /// Record the failure and carry on with the next command.
    Continue,
}

impl ErrorPolicy {
    pub fn from_force(force: bool) -> Self {
        if force {
            ErrorPolicy::Continue
        } else {
            ErrorPolicy::Stop
        }
    }
}

/// Per-dispatch settings handed to every address task.
#[derive(Debug, Clone, Copy)]
struct TaskSettings {
    policy: ErrorPolicy,
    connect_timeout: Duration,
    query_timeout: Duration,
}

/// Results an address task has finished so far. Shared with the
/// dispatcher so they survive a panic later in the task.
type Journal = Arc<Mutex<Vec<CmdResult>>>;

fn lock(journal: &Mutex<Vec<CmdResult>>) -> MutexGuard<'_, Vec<CmdResult>> {
    journal.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Binds one backend to the shared concurrency limit.
pub struct Dispatcher<B: Backend> {
    backend: Arc<B>,
    limiter: Arc<Semaphore>,
}

impl<B: Backend> Dispatcher<B> {
    /// `limiter` is shared across every in-flight request in the process;
    /// each address task holds one permit for its whole lifetime.
    pub fn new(backend: Arc<B>, limiter: Arc<Semaphore>) -> Self {
        Self { backend, limiter }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Runs every command against every address and collects the results
    /// in the same order as `req.addresses`.
    ///
    /// The request is assumed to have passed [`QueryRequest::validate`].
    pub async fn run(&self, req: &QueryRequest) -> Vec<AddressResult> {
        let settings = TaskSettings {
            policy: req.policy(),
            connect_timeout: req.connect_timeout(),
            query_timeout: req.query_timeout(),
        };
        let cmds: Arc<[String]> = req.cmds.iter().cloned().collect();

        let mut handles: Vec<(String, Option<(JoinHandle<AddressResult>, Journal)>)> =
            Vec::with_capacity(req.addresses.len());

        for address in &req.addresses {
            let address = address.trim().to_string();
            // blocks here once the limit is reached
            let permit = match Arc::clone(&self.limiter).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    handles.push((address, None));
                    continue;
                }
            };
            let journal = Journal::default();
            let handle = self.spawn_address(
                address.clone(),
                Arc::clone(&cmds),
                settings,
                permit,
                Arc::clone(&journal),
            );
            handles.push((address, Some((handle, journal))));
        }

        let mut results = Vec::with_capacity(handles.len());
        for (address, handle) in handles {
            let result = match handle {
                Some((handle, journal)) => match handle.await {
                    Ok(result) => result,
                    Err(e) if e.is_panic() => {
                        let msg = panic_message(e.into_panic());
                        error!(backend = self.backend.name(), %address, "address task panicked: {msg}");
                        AddressResult {
                            address,
                            cmd_results: std::mem::take(&mut *lock(&journal)),
                            error_msg: format!("task panicked: {msg}"),
                        }
                    }
                    Err(e) => AddressResult::unreachable(&address, format!("task aborted: {e}")),
                },
                None => AddressResult::unreachable(&address, "dispatcher is shutting down"),
            };
            results.push(result);
        }
        results
    }

    fn spawn_address(
        &self,
        address: String,
        cmds: Arc<[String]>,
        settings: TaskSettings,
        permit: OwnedSemaphorePermit,
        journal: Journal,
    ) -> JoinHandle<AddressResult> {
        let backend = Arc::clone(&self.backend);
        tokio::spawn(async move {
            let result = run_address(&*backend, &address, &cmds, settings, &journal).await;
            // the permit also goes back if the task unwinds
            drop(permit);
            result
        })
    }
}

async fn run_address<B: Backend>(
    backend: &B,
    address: &str,
    cmds: &[String],
    settings: TaskSettings,
    journal: &Mutex<Vec<CmdResult>>,
) -> AddressResult {
    let mut conn = match backend
        .make_connection(address, settings.connect_timeout)
        .await
    {
        Ok(conn) => conn,
        Err(e) => {
            warn!(backend = backend.name(), %address, "connect failed: {e}");
            return AddressResult::unreachable(address, e);
        }
    };

    let mut lost: Option<String> = None;
    for raw in cmds {
        let result = match lost {
            Some(ref reason) => CmdResult::failed(raw, reason),
            None => {
                let (result, timed_out) =
                    run_command(backend, &mut conn, raw, settings.query_timeout).await;
                if timed_out {
                    // a late reply would be taken as the next command's answer
                    match backend.make_connection(address, settings.connect_timeout).await {
                        Ok(fresh) => conn = fresh,
                        Err(e) => {
                            warn!(backend = backend.name(), %address, "reconnect failed: {e}");
                            lost = Some(format!("connection lost after timeout: {e}"));
                        }
                    }
                }
                result
            }
        };
        let failed = result.is_error();
        lock(journal).push(result);
        if failed && settings.policy == ErrorPolicy::Stop {
            break;
        }
    }
    if tokio::time::timeout(settings.connect_timeout, conn.close())
        .await
        .is_err()
    {
        debug!(backend = backend.name(), %address, "close timed out");
    }

    AddressResult {
        address: address.to_string(),
        cmd_results: std::mem::take(&mut *lock(journal)),
        error_msg: String::new(),
    }
}

/// Runs one command. The flag is set when the command hit the query
/// timeout, after which the connection can't be trusted.
async fn run_command<B: Backend>(
    backend: &B,
    conn: &mut B::Connection,
    raw: &str,
    query_timeout: Duration,
) -> (CmdResult, bool) {
    let (cmd, kind) = backend.classify(raw);
    debug!(backend = backend.name(), cmd = %cmd.raw, ?kind, "running command");

    let outcome = match kind {
        CommandKind::Query => with_timeout(query_timeout, conn.query(&cmd))
            .await
            .map(|rows| CmdResult::rows(raw, rows)),
        CommandKind::Execute => with_timeout(query_timeout, conn.execute(&cmd))
            .await
            .map(|n| CmdResult::affected(raw, n)),
        CommandKind::Unsupported => Err(BackendError::Unsupported(cmd.raw.clone())),
    };

    match outcome {
        Ok(result) => (result, false),
        Err(e) => {
            warn!(backend = backend.name(), cmd = %cmd.raw, "command failed: {e}");
            let timed_out = matches!(e, BackendError::Timeout(_));
            (CmdResult::from_error(raw, &e), timed_out)
        }
    }
}

async fn with_timeout<T>(
    limit: Duration,
    fut: impl std::future::Future<Output = Result<T, BackendError>>,
) -> Result<T, BackendError> {
    tokio::time::timeout(limit, fut)
        .await
        .unwrap_or(Err(BackendError::Timeout(limit)))
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".into()
    }
}
