//! Pool of pre-forked shells serving command requests.

use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use super::builder::ShellPoolConfig;
use super::pool::SessionPool;
use super::response::Response;
use super::Session;
use crate::error::{PoolError, Result};
use crate::process::{self, SpawnConfig};

/// Log progress every this many shells while configuring.
const PROGRESS_INTERVAL: usize = 10;

/// A fixed set of interactive shells, each running on its own
/// pseudo-terminal, shared by concurrent callers.
///
/// Every request runs on whichever shell is free: the command line is
/// written to the shell and its output is collected up to the next prompt
/// marker.
///
/// # Example
///
/// ```rust,no_run
/// use shellpool::{ShellPool, ShellPoolConfig};
///
/// # fn example() -> Result<(), shellpool::Error> {
/// let pool = ShellPool::configure(ShellPoolConfig::new(2))?;
///
/// for response in pool.run_requests(&["hostname", "id -u"])? {
///     println!("{} => {}", response.command, response.result);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ShellPool {
    /// Sessions, each already sitting at a prompt.
    pool: SessionPool<Session>,

    /// Configuration the pool was built from.
    config: ShellPoolConfig,

    /// Spawn parameters shared by every shell, kept for replacements.
    spawn: SpawnConfig,

    /// Set once shutdown has run.
    shut_down: AtomicBool,
}

impl ShellPool {
    /// Spawn `config.num_shells` shells and wait for each to show its prompt.
    ///
    /// Fails on the first shell that cannot be created; shells created up to
    /// that point are destroyed.
    pub fn configure(config: ShellPoolConfig) -> Result<Self> {
        config.validate()?;
        let spawn = config.spawn_config();

        info!(
            "starting {} shells ({})",
            config.num_shells,
            config.shell.display()
        );

        let mut sessions = Vec::with_capacity(config.num_shells);
        for started in 1..=config.num_shells {
            match spawn_primed(&spawn, &config.prompt) {
                Ok(session) => sessions.push(session),
                Err(e) => {
                    warn!(
                        "shell {} of {} failed to start: {}",
                        started, config.num_shells, e
                    );
                    for session in sessions {
                        session.destroy();
                    }
                    return Err(e);
                }
            }
            if started % PROGRESS_INTERVAL == 0 {
                info!("started {} of {} shells", started, config.num_shells);
            }
        }
        info!("shell pool ready with {} shells", sessions.len());

        Ok(Self {
            pool: SessionPool::new(sessions),
            config,
            spawn,
            shut_down: AtomicBool::new(false),
        })
    }

    /// Run one command on a free shell, blocking until one is available and
    /// the command's prompt comes back.
    ///
    /// A shell whose terminal fails mid-request is destroyed and replaced
    /// with a fresh one before the error is returned.
    pub fn run_request(&self, command: &str) -> Result<Response> {
        let mut session = self.pool.acquire()?;
        let start = Instant::now();

        let outcome = session
            .send_line(command)
            .and_then(|()| session.expect_output(&self.config.prompt));

        match outcome {
            Ok(raw) => {
                self.pool.release(session);
                let response = Response::from_output(
                    command,
                    &raw,
                    &self.config.prompt,
                    start.elapsed(),
                    &self.config.failed_when_contains,
                );
                if let Some(ref pattern) = response.failure_message {
                    debug!("request {:?} matched failure pattern {:?}", command, pattern);
                }
                Ok(response)
            }
            Err(e) => {
                warn!(
                    "shell pid {} failed during {:?}: {}",
                    session.pid(),
                    command,
                    e
                );
                self.replace(session);
                Err(e.into())
            }
        }
    }

    /// Run several commands one after the other.
    pub fn run_requests(&self, commands: &[&str]) -> Result<Vec<Response>> {
        let mut responses = Vec::with_capacity(commands.len());
        for command in commands {
            responses.push(self.run_request(command)?);
        }
        Ok(responses)
    }

    /// Run a command on tokio's blocking pool.
    ///
    /// Bounded by the configured request timeout, which covers the wait for
    /// a free shell too. A request that times out keeps running in the
    /// background and hands its shell back when it finishes.
    pub async fn run_request_async(self: &Arc<Self>, command: impl Into<String>) -> Result<Response> {
        let pool = Arc::clone(self);
        let command = command.into();
        let task = tokio::task::spawn_blocking(move || pool.run_request(&command));

        let joined = match self.config.request_timeout {
            Some(limit) => tokio::time::timeout(limit, task)
                .await
                .map_err(|_| PoolError::Timeout(limit))?,
            None => task.await,
        };

        joined.map_err(|e| PoolError::TaskFailed {
            message: e.to_string(),
        })?
    }

    /// Destroy `broken` and put a fresh shell in its slot.
    fn replace(&self, broken: Session) {
        // Shutting down: the teardown callback destroys it, no respawn.
        if self.pool.is_torn_down() {
            self.pool.release(broken);
            return;
        }
        broken.destroy();

        match spawn_primed(&self.spawn, &self.config.prompt) {
            Ok(fresh) => {
                debug!("replacement shell pid {} ready", fresh.pid());
                self.pool.release(fresh);
            }
            Err(e) => {
                warn!("could not replace failed shell, pool shrinks: {}", e);
                self.pool.forfeit();
            }
        }
    }

    /// Number of shells the pool was built with.
    pub fn size(&self) -> usize {
        self.pool.size()
    }

    /// Shells idle right now.
    pub fn available(&self) -> usize {
        self.pool.available()
    }

    /// The prompt marker the shells print.
    pub fn prompt(&self) -> &str {
        &self.config.prompt
    }

    /// Get the configuration.
    pub fn config(&self) -> &ShellPoolConfig {
        &self.config
    }

    /// Destroy every shell and wait up to `grace` for the children to exit.
    ///
    /// Idle shells are destroyed right away; shells busy with a request are
    /// destroyed as soon as that request finishes, and the wait covers them
    /// too. Requests issued afterwards fail with [`PoolError::TornDown`].
    /// Calling it again does nothing.
    pub fn shutdown(&self, grace: Duration) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        let deadline = Instant::now() + grace;

        let pids = Arc::new(Mutex::new(Vec::with_capacity(self.pool.size())));
        let destroyed = Arc::clone(&pids);
        self.pool.teardown(move |session: Session| {
            destroyed
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(session.pid());
            session.destroy();
        });

        if !self.pool.wait_released(deadline.saturating_duration_since(Instant::now())) {
            debug!("requests still running after shutdown grace period");
        }

        let pids: Vec<libc::pid_t> = pids.lock().unwrap_or_else(|e| e.into_inner()).clone();
        let lingering = pids
            .into_iter()
            .filter(|&pid| {
                let remaining = deadline.saturating_duration_since(Instant::now());
                !process::wait_for_exit(pid, remaining)
            })
            .count();

        if lingering > 0 {
            debug!("{} shells still running after shutdown", lingering);
        }
        info!("shell pool shut down");
    }
}

impl Drop for ShellPool {
    fn drop(&mut self) {
        self.shutdown(Duration::ZERO);
    }
}

/// Create a session and wait for its first prompt.
fn spawn_primed(spawn: &SpawnConfig, prompt: &str) -> Result<Session> {
    let mut session = Session::create(spawn)?;
    if let Err(e) = session.expect(prompt) {
        session.destroy();
        return Err(e.into());
    }
    Ok(session)
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::error::{ChannelError, Error, SpawnStep};
    use crate::session::ShellPoolBuilder;

    const MARKER: &str = "PROMPT> ";

    fn builder(num_shells: usize) -> ShellPoolBuilder {
        ShellPoolBuilder::new(num_shells)
            .prompt(MARKER)
            .env("PATH", "/usr/bin:/bin")
    }

    #[test]
    fn test_concurrent_echo_requests() {
        let pool = Arc::new(builder(2).build().unwrap());
        assert_eq!(pool.size(), 2);
        assert_eq!(pool.available(), 2);
        assert_eq!(pool.prompt(), MARKER);

        let workers: Vec<_> = [2, 1]
            .into_iter()
            .map(|requests| {
                let pool = Arc::clone(&pool);
                thread::spawn(move || {
                    (0..requests)
                        .map(|_| pool.run_request("echo hi").unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let responses: Vec<Response> = workers
            .into_iter()
            .flat_map(|w| w.join().unwrap())
            .collect();

        assert_eq!(responses.len(), 3);
        for response in &responses {
            assert!(response.is_success());
            assert!(response.raw_result.contains("hi\r\n"));
            assert!(response.lines().any(|line| line.trim() == "hi"));
        }
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn test_run_requests_sequential() {
        let pool = builder(1).build().unwrap();
        let responses = pool.run_requests(&["echo one", "echo two"]).unwrap();
        assert!(responses[0].lines().any(|line| line.trim() == "one"));
        assert!(responses[1].lines().any(|line| line.trim() == "two"));
    }

    #[test]
    fn test_failure_pattern_marks_response() {
        // dash says "not found", bash says "command not found".
        let pool = builder(1).failure_pattern("not found").build().unwrap();
        let response = pool.run_request("definitely_not_a_command_123").unwrap();
        assert!(!response.is_success());
        assert!(
            response
                .failure_message
                .as_deref()
                .is_some_and(|m| m.contains("not found"))
        );
    }

    #[test]
    fn test_invalid_config_rejected() {
        let err = builder(0).build().unwrap_err();
        assert!(matches!(err, Error::Pool(PoolError::InvalidConfig { .. })));
    }

    #[test]
    fn test_missing_shell_fails_configure() {
        let err = builder(3).shell("/no/such/shell").build().unwrap_err();
        match err {
            Error::Creation(e) => assert_eq!(e.step, SpawnStep::Exec),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_dead_shell_is_replaced() {
        let pool = builder(1).build().unwrap();

        let err = pool.run_request("exit").unwrap_err();
        assert!(matches!(
            err,
            Error::Channel(ChannelError::Io(_) | ChannelError::Closed)
        ));
        assert_eq!(pool.available(), 1);

        let response = pool.run_request("echo back").unwrap();
        assert!(response.lines().any(|line| line.trim() == "back"));
    }

    #[test]
    fn test_shutdown_refuses_requests() {
        let pool = builder(2).build().unwrap();
        pool.shutdown(Duration::from_secs(5));
        pool.shutdown(Duration::from_secs(5));

        let err = pool.run_request("echo late").unwrap_err();
        assert!(matches!(err, Error::Pool(PoolError::TornDown)));
    }

    #[test]
    fn test_shutdown_waits_for_request_in_flight() {
        let pool = Arc::new(builder(1).build().unwrap());

        let request = {
            let pool = Arc::clone(&pool);
            thread::spawn(move || pool.run_request("sleep 0.3; echo done"))
        };
        thread::sleep(Duration::from_millis(100));

        pool.shutdown(Duration::from_secs(5));
        let response = request.join().unwrap().unwrap();
        assert!(response.lines().any(|line| line.trim() == "done"));
        assert_eq!(pool.available(), 0);
    }

    #[test]
    fn test_no_respawn_after_shutdown() {
        let pool = Arc::new(builder(1).build().unwrap());

        let request = {
            let pool = Arc::clone(&pool);
            thread::spawn(move || pool.run_request("sleep 0.3; exit"))
        };
        thread::sleep(Duration::from_millis(100));

        pool.shutdown(Duration::from_secs(5));
        let err = request.join().unwrap().unwrap_err();
        assert!(matches!(err, Error::Channel(_)));
        assert_eq!(pool.available(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_run_request_async() {
        let pool = Arc::new(builder(1).build().unwrap());
        let response = pool.run_request_async("echo async").await.unwrap();
        assert!(response.lines().any(|line| line.trim() == "async"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_run_request_async_timeout() {
        let pool = Arc::new(
            builder(1)
                .request_timeout(Duration::from_millis(50))
                .build()
                .unwrap(),
        );
        let err = pool.run_request_async("sleep 1").await.unwrap_err();
        assert!(matches!(err, Error::Pool(PoolError::Timeout(_))));
    }
}
