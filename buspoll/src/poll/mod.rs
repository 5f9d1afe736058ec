//! Poll scheduler
//!
//! The [`Scheduler`] sweeps every device of a [`Project`] on a fixed interval and asks the
//! owning backend to check it. Writes requested through a [`PollHandle`] are coalesced in a
//! cache and flushed to the backends after a short debounce.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use buspoll::config::{ProjectConfig, Settings};
//! use buspoll::model::Project;
//! use buspoll::modbus::ModbusBackend;
//!
//! #[tokio::main(flavor = "multi_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let settings = Settings::default();
//!     let project = Arc::new(Project::from_config(&ProjectConfig::default())?);
//!     let handle = buspoll::poll::spawn(&settings, project, vec![ModbusBackend::new().into()]);
//!     handle.stop().await?;
//!     Ok(())
//! }
//! ```

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::Instrument;

use crate::capability::{Backend, BackendKind, Capability};
use crate::config::Settings;
use crate::constants::poll::MIN_POLL_INTERVAL;
use crate::error::Shutdown;
use crate::model::{Device, DeviceId, ItemId, PendingWrite, Project};
use crate::types::Value;

use cache::WriteCache;

mod cache;

#[derive(Debug)]
enum Request {
    Start,
    Stop,
    Write {
        item: ItemId,
        value: Value,
        user_id: u32,
        priority: bool,
    },
}

/// Handle used to control a running [`Scheduler`]
///
/// The scheduler shuts down once every handle is dropped.
#[derive(Clone, Debug)]
pub struct PollHandle {
    tx: mpsc::Sender<Request>,
}

impl PollHandle {
    /// Resume polling, a cycle starts right away
    pub async fn start(&self) -> Result<(), Shutdown> {
        self.send(Request::Start).await
    }

    /// Stop polling and cancel the cycle in progress
    ///
    /// Pending writes are held back until polling resumes.
    pub async fn stop(&self) -> Result<(), Shutdown> {
        self.send(Request::Stop).await
    }

    /// Write a value after the routine debounce
    pub async fn write(&self, item: ItemId, value: Value, user_id: u32) -> Result<(), Shutdown> {
        self.send(Request::Write {
            item,
            value,
            user_id,
            priority: false,
        })
        .await
    }

    /// Write a value after the shorter priority debounce
    pub async fn write_now(
        &self,
        item: ItemId,
        value: Value,
        user_id: u32,
    ) -> Result<(), Shutdown> {
        self.send(Request::Write {
            item,
            value,
            user_id,
            priority: true,
        })
        .await
    }

    async fn send(&self, request: Request) -> Result<(), Shutdown> {
        self.tx.send(request).await.map_err(|_| Shutdown)
    }
}

/// Spawn a scheduler on the current runtime and return its handle
///
/// Polling starts immediately.
pub fn spawn(settings: &Settings, project: Arc<Project>, backends: Vec<Backend>) -> PollHandle {
    let (mut scheduler, handle) = Scheduler::new(settings, project, backends);
    tokio::spawn(
        async move {
            let _ = scheduler.run().await;
        }
        .instrument(tracing::info_span!("poll")),
    );
    handle
}

/// Periodically checks every device and flushes pending writes
pub struct Scheduler {
    rx: crate::channel::Receiver<Request>,
    project: Arc<Project>,
    backends: Vec<Backend>,
    interval: Duration,
    write_debounce: Duration,
    priority_write_debounce: Duration,
    cache: WriteCache,
    /// when the next cycle starts, `None` while none is scheduled
    next_poll: Option<Instant>,
    stopped: bool,
    first_cycle: bool,
    failed: HashSet<DeviceId>,
    missing_backend: HashSet<DeviceId>,
    local_writes: HashSet<DeviceId>,
}

impl Scheduler {
    /// Create a scheduler and configure each backend against the project
    ///
    /// Must be called from within a Tokio runtime since backends may spawn tasks.
    pub fn new(
        settings: &Settings,
        project: Arc<Project>,
        mut backends: Vec<Backend>,
    ) -> (Self, PollHandle) {
        for backend in backends.iter_mut() {
            backend.configure(settings, &project);
        }

        let interval = settings.poll.interval();
        if interval < MIN_POLL_INTERVAL {
            tracing::info!(
                "poll interval of {:?} is below {:?}, devices are checked once",
                interval,
                MIN_POLL_INTERVAL
            );
        }

        let (tx, rx) = mpsc::channel(settings.poll.max_queued_requests.max(1));
        let scheduler = Self {
            rx: rx.into(),
            project,
            backends,
            interval,
            write_debounce: settings.poll.write_debounce(),
            priority_write_debounce: settings.poll.priority_write_debounce(),
            cache: WriteCache::default(),
            next_poll: Some(Instant::now()),
            stopped: false,
            first_cycle: true,
            failed: HashSet::new(),
            missing_backend: HashSet::new(),
            local_writes: HashSet::new(),
        };
        (scheduler, PollHandle { tx })
    }

    /// Run until every [`PollHandle`] is dropped
    pub async fn run(&mut self) -> Shutdown {
        loop {
            tokio::select! {
                _ = sleep_until(self.next_poll) => {
                    self.next_poll = None;
                    if let Err(Shutdown) = self.run_cycle().await {
                        return Shutdown;
                    }
                }
                _ = sleep_until(self.cache.deadline()) => {
                    self.flush().await;
                }
                request = self.rx.recv() => match request {
                    Ok(request) => self.handle(request),
                    Err(Shutdown) => {
                        tracing::info!("poll scheduler shutdown");
                        return Shutdown;
                    }
                }
            }
        }
    }

    fn handle(&mut self, request: Request) {
        match request {
            Request::Start => {
                if self.stopped {
                    tracing::debug!("polling resumed");
                }
                self.stopped = false;
                if self.next_poll.is_none() {
                    self.next_poll = Some(Instant::now());
                }
            }
            Request::Stop => {
                if !self.stopped {
                    tracing::debug!("polling stopped");
                }
                self.stopped = true;
                self.next_poll = None;
                for backend in self.backends.iter_mut() {
                    backend.stop();
                }
            }
            Request::Write {
                item,
                value,
                user_id,
                priority,
            } => {
                let Some(item) = self.project.item(item).cloned() else {
                    tracing::warn!("write of {} to unknown item {}", value, item);
                    return;
                };
                let debounce = if priority {
                    self.priority_write_debounce
                } else {
                    self.write_debounce
                };
                self.cache.queue(item, value, user_id, debounce, priority);
            }
        }
    }

    /// Check every device once
    async fn run_cycle(&mut self) -> Result<(), Shutdown> {
        let project = self.project.clone();
        for device in project.devices() {
            // a stop between two devices cancels the rest of the sweep
            while let Some(request) = self.rx.try_recv()? {
                self.handle(request);
            }
            if self.stopped {
                tracing::debug!("cycle cancelled");
                return Ok(());
            }
            if device.items().is_empty() {
                continue;
            }

            let ok = self.check_device(device).await;
            if ok {
                if self.failed.remove(&device.id()) {
                    tracing::info!("check of {} succeeded again", device);
                }
            } else if self.failed.insert(device.id()) {
                tracing::warn!("check of {} failed", device);
            }
        }
        self.first_cycle = false;

        if self.interval >= MIN_POLL_INTERVAL && self.next_poll.is_none() {
            self.next_poll = Some(Instant::now() + self.interval);
        }

        if !self.cache.is_empty() && !self.cache.is_armed() {
            self.flush().await;
        }
        Ok(())
    }

    async fn check_device(&mut self, device: &Device) -> bool {
        let Some(kind) = device.backend() else {
            // software-only items start from zero
            if self.first_cycle {
                for item in device.items() {
                    if item.raw_value().is_none() {
                        item.set_raw_value(Some(Value::Int(0)));
                    }
                }
            }
            return true;
        };

        match self.backend_mut(kind) {
            Some(backend) => backend.check(device).await,
            None => {
                if self.missing_backend.insert(device.id()) {
                    tracing::warn!("no {} backend for {}, items are disconnected", kind, device);
                }
                for item in device.items() {
                    item.set_raw_value(None);
                }
                true
            }
        }
    }

    fn backend_mut(&mut self, kind: BackendKind) -> Option<&mut Backend> {
        self.backends.iter_mut().find(|b| b.kind() == kind)
    }

    fn can_flush(&self) -> bool {
        self.next_poll.is_some() || (self.interval < MIN_POLL_INTERVAL && !self.stopped)
    }

    /// Hand every pending write to the backend of its device
    async fn flush(&mut self) {
        if !self.can_flush() {
            tracing::debug!(
                "polling is stopped, holding back {} writes",
                self.cache.len()
            );
            self.cache.disarm();
            return;
        }

        let writes = self.cache.take();
        tracing::debug!("flushing {} writes", writes.len());

        let mut groups: Vec<(BackendKind, Vec<PendingWrite>)> = Vec::new();
        for write in writes {
            let device = self.project.device(write.item.device());
            let kind = device
                .and_then(|d| d.backend())
                .filter(|kind| self.backends.iter().any(|b| b.kind() == *kind));

            match kind {
                Some(kind) => match groups.iter_mut().find(|(k, _)| *k == kind) {
                    Some((_, writes)) => writes.push(write),
                    None => groups.push((kind, vec![write])),
                },
                None => {
                    if self.local_writes.insert(write.item.device()) {
                        tracing::warn!(
                            "device {} has no backend, writes are applied locally",
                            write.item.device()
                        );
                    }
                    write
                        .item
                        .set_raw_value_from(Some(write.value), Some(write.user_id));
                }
            }
        }

        let mut written = false;
        for (kind, writes) in groups {
            if let Some(backend) = self.backend_mut(kind) {
                backend.write(writes).await;
                written = true;
            }
        }

        // read the written values back without waiting a full interval
        if written {
            if let Some(next_poll) = self.next_poll {
                self.next_poll = Some(next_poll.min(Instant::now() + MIN_POLL_INTERVAL));
            }
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
