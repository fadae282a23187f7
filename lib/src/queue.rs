// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Single-flight task queue
//!
//! Tasks run strictly in FIFO order, exactly one at a time, over an
//! [ApduChannel]. Device events are routed to the running task only.
//! Status words are checked here before a task sees a response, so tasks
//! handle their success path plus any statuses they explicitly accept.

use std::{collections::VecDeque, sync::Arc, time::Duration};

use async_trait::async_trait;
use log::{debug, error, warn};
use tokio::{sync::oneshot, time::Instant};

use remote_dongle_apdu::ApduResponse;

use crate::{
    tasks::{Step, Task, TaskKind, TaskOutput},
    ConnectionState, Error,
};

/// APDU transfer channel used by the queue
#[async_trait]
pub trait ApduChannel: Send + Sync {
    async fn connection_state(&self) -> ConnectionState;

    /// Start an APDU transfer, results are delivered as [DeviceEvent]s
    async fn send(&self, apdu: Vec<u8>) -> Result<(), Error>;

    /// Abort the in-flight transfer
    async fn cancel_transfer(&self);
}

/// Device events routed to the running task
#[derive(Clone, Debug, PartialEq)]
pub enum DeviceEvent {
    ApduSent,
    ApduReceived(Vec<u8>),
    SendFailed(Error),
    ReceiveFailed(Error),
    Disconnected(Option<Error>),
}

/// Task completion result
pub type TaskResult = Result<TaskOutput, Error>;

/// A task waiting in (or running on) the queue
#[derive(Debug)]
pub struct QueuedTask {
    task: Task,
    /// Zero disables the timeout
    timeout: Duration,
    completion: oneshot::Sender<TaskResult>,
}

impl QueuedTask {
    /// Create a queued task and the receiver for its result
    pub fn new(task: Task, timeout: Duration) -> (Self, oneshot::Receiver<TaskResult>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                task,
                timeout,
                completion: tx,
            },
            rx,
        )
    }

    pub fn kind(&self) -> TaskKind {
        self.task.kind()
    }

    /// Complete the task, consuming it so completion happens exactly once
    fn complete(self, r: TaskResult) {
        match &r {
            Ok(_) => debug!("Task {} complete", self.task.kind()),
            Err(e) => warn!("Task {} failed: {e}", self.task.kind()),
        }

        // Caller may have stopped waiting
        let _ = self.completion.send(r);
    }
}

struct Running {
    queued: QueuedTask,
    deadline: Option<Instant>,
}

/// FIFO task executor, owned by the device API task
pub struct TaskQueue {
    channel: Arc<dyn ApduChannel>,
    pending: VecDeque<QueuedTask>,
    current: Option<Running>,
}

impl TaskQueue {
    pub fn new(channel: Arc<dyn ApduChannel>) -> Self {
        Self {
            channel,
            pending: VecDeque::new(),
            current: None,
        }
    }

    /// Kind of the running task
    pub fn active_task(&self) -> Option<TaskKind> {
        self.current.as_ref().map(|r| r.queued.kind())
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Deadline of the running task, if it has a timeout
    pub fn deadline(&self) -> Option<Instant> {
        self.current.as_ref().and_then(|r| r.deadline)
    }

    /// Append a task, starting it immediately if the queue is idle
    pub async fn enqueue(&mut self, task: QueuedTask) {
        debug!("Enqueue task {}", task.kind());

        self.pending.push_back(task);

        if self.current.is_none() {
            self.process_next().await;
        }
    }

    /// Drop all pending tasks, completing them with [Error::CancelledTask]
    /// if `cancel_pending` is set (otherwise their result channels close)
    pub fn cancel_all(&mut self, cancel_pending: bool) {
        if !self.pending.is_empty() {
            debug!("Cancelling {} pending tasks", self.pending.len());
        }

        for t in self.pending.drain(..) {
            if cancel_pending {
                t.complete(Err(Error::CancelledTask));
            }
        }
    }

    /// Start the next runnable pending task
    async fn process_next(&mut self) {
        while let Some(mut q) = self.pending.pop_front() {
            debug!("Running task {}", q.kind());

            if self.channel.connection_state().await != ConnectionState::Connected {
                q.complete(Err(Error::CancelledTask));
                continue;
            }

            let Some(apdu) = q.task.main() else {
                q.complete(Err(Error::CancelledTask));
                continue;
            };

            let deadline = match q.timeout.is_zero() {
                true => None,
                false => Some(Instant::now() + q.timeout),
            };

            if let Err(e) = self.channel.send(apdu.to_bytes()).await {
                q.complete(Err(e));
                continue;
            }

            self.current = Some(Running { queued: q, deadline });
            return;
        }
    }

    /// Complete the running task and advance the queue
    async fn finish(&mut self, r: TaskResult) {
        if let Some(c) = self.current.take() {
            c.queued.complete(r);
        }
        self.process_next().await;
    }

    /// Handle an event for the running task
    pub async fn handle_event(&mut self, evt: DeviceEvent) {
        match evt {
            DeviceEvent::Disconnected(e) => {
                self.cancel_all(true);
                if let Some(c) = self.current.take() {
                    c.queued.complete(Err(e.unwrap_or(Error::CancelledTask)));
                }
            }
            _ if self.current.is_none() => {
                debug!("Ignoring device event with no active task: {evt:?}");
            }
            DeviceEvent::ApduSent => (),
            DeviceEvent::SendFailed(e) | DeviceEvent::ReceiveFailed(e) => self.finish(Err(e)).await,
            DeviceEvent::ApduReceived(data) => self.received(data).await,
        }
    }

    async fn received(&mut self, data: Vec<u8>) {
        let resp = match ApduResponse::parse(&data) {
            Ok(r) => r,
            Err(_) => {
                error!("Invalid response APDU: {}", hex::encode(&data));
                self.finish(Err(Error::InvalidResponse)).await;
                return;
            }
        };

        let Some(c) = self.current.as_mut() else {
            return;
        };

        let status = resp.status();
        if !status.is_success() && !c.queued.task.accepts_status(&status) {
            debug!("Task {} received status {}", c.queued.kind(), resp.status);
            self.finish(Err(Error::from(status))).await;
            return;
        }

        match c.queued.task.did_receive(resp) {
            Step::Send(apdu) => {
                if let Err(e) = self.channel.send(apdu.to_bytes()).await {
                    self.finish(Err(e)).await;
                }
            }
            Step::Complete(r) => self.finish(r).await,
        }
    }

    /// Fail the running task if its deadline has passed
    pub async fn handle_timeout(&mut self, now: Instant) {
        match self.deadline() {
            Some(d) if d <= now => (),
            _ => return,
        }

        if let Some(k) = self.active_task() {
            error!("Task {k} timed out");
        }

        // Next task needs an idle channel
        self.channel.cancel_transfer().await;
        self.finish(Err(Error::TransferTimeout)).await;
    }
}

impl Drop for TaskQueue {
    fn drop(&mut self) {
        self.cancel_all(true);
        if let Some(c) = self.current.take() {
            c.queued.complete(Err(Error::CancelledTask));
        }
    }
}
