// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The command server's contract with its connection: a serialized inbound
//! event queue, an outbound queue toward the MQTT transport, an application
//! callback channel, and pipeline-owned timers.
//!
//! The dispatch loop that drains [`EventPipeline::next_event`] and feeds each
//! event into the attached policy is owned by the connection, not by this
//! crate; tests drive it directly.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;
use vehicle_operations_mqtt::control_packet::{Publish, QoS, Subscribe};

use crate::event::{ApplicationEvent, Event, OutboundEvent, TimerToken};

/// The receiving half of a channel was dropped; the pipeline is shutting
/// down and can no longer accept events.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("the event pipeline is closed")]
pub struct PipelineClosed;

/// Shared id allocators for packet ids and timer tokens.
#[derive(Debug, Default)]
struct PipelineIds {
    // Packet ids start at 1; 0 means "no request in flight"
    next_packet_id: AtomicU32,
    next_timer_token: AtomicU64,
}

/// The connection-owned side of the event pipeline.
///
/// Owns the receiving halves of the three channels. The transport drains
/// [`EventPipeline::next_outbound`], the application drains
/// [`EventPipeline::next_application_event`], and the dispatch loop drains
/// [`EventPipeline::next_event`] into the attached policy.
#[derive(Debug)]
pub struct EventPipeline {
    events: UnboundedReceiver<Event>,
    outbound: UnboundedReceiver<OutboundEvent>,
    application: UnboundedReceiver<ApplicationEvent>,
    handle: PipelineHandle,
}

impl EventPipeline {
    /// Create a pipeline with empty queues.
    #[must_use]
    pub fn new() -> Self {
        let (event_tx, events) = mpsc::unbounded_channel();
        let (outbound_tx, outbound) = mpsc::unbounded_channel();
        let (application_tx, application) = mpsc::unbounded_channel();
        EventPipeline {
            events,
            outbound,
            application,
            handle: PipelineHandle {
                event_tx,
                outbound_tx,
                application_tx,
                ids: Arc::new(PipelineIds::default()),
            },
        }
    }

    /// A cheap, clonable handle for policies and application threads.
    #[must_use]
    pub fn handle(&self) -> PipelineHandle {
        self.handle.clone()
    }

    /// Wait for the next posted event.
    pub async fn next_event(&mut self) -> Option<Event> {
        self.events.recv().await
    }

    /// Take the next posted event if one is already queued.
    pub fn try_next_event(&mut self) -> Option<Event> {
        self.events.try_recv().ok()
    }

    /// Wait for the next outbound request toward the transport.
    pub async fn next_outbound(&mut self) -> Option<OutboundEvent> {
        self.outbound.recv().await
    }

    /// Take the next outbound request if one is already queued.
    pub fn try_next_outbound(&mut self) -> Option<OutboundEvent> {
        self.outbound.try_recv().ok()
    }

    /// Wait for the next event addressed to the application.
    pub async fn next_application_event(&mut self) -> Option<ApplicationEvent> {
        self.application.recv().await
    }

    /// Take the next application event if one is already queued.
    pub fn try_next_application_event(&mut self) -> Option<ApplicationEvent> {
        self.application.try_recv().ok()
    }
}

impl Default for EventPipeline {
    fn default() -> Self {
        Self::new()
    }
}

/// Non-owning reference to a connection's pipeline.
///
/// `Clone + Send`: [`PipelineHandle::post_event`] is the only enqueue path
/// that may be used from outside the dispatch thread.
#[derive(Debug, Clone)]
pub struct PipelineHandle {
    event_tx: UnboundedSender<Event>,
    outbound_tx: UnboundedSender<OutboundEvent>,
    application_tx: UnboundedSender<ApplicationEvent>,
    ids: Arc<PipelineIds>,
}

impl PipelineHandle {
    /// Post an event for serialized delivery to the attached policy.
    ///
    /// # Errors
    /// [`PipelineClosed`] if the pipeline has been dropped.
    pub fn post_event(&self, event: Event) -> Result<(), PipelineClosed> {
        self.event_tx.send(event).map_err(|_| PipelineClosed)
    }

    /// Emit a subscribe request and return its assigned packet id.
    ///
    /// # Errors
    /// [`PipelineClosed`] if the pipeline has been dropped.
    pub fn send_subscribe(&self, topic_filter: String, qos: QoS) -> Result<u32, PipelineClosed> {
        let id = self.ids.next_packet_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.outbound_tx
            .send(OutboundEvent::Subscribe(Subscribe {
                topic_filter,
                qos,
                id,
            }))
            .map_err(|_| PipelineClosed)?;
        Ok(id)
    }

    /// Emit a publish request toward the transport.
    ///
    /// # Errors
    /// [`PipelineClosed`] if the pipeline has been dropped.
    pub fn send_publish(&self, publish: Publish) -> Result<(), PipelineClosed> {
        self.outbound_tx
            .send(OutboundEvent::Publish(publish))
            .map_err(|_| PipelineClosed)
    }

    /// Deliver an event to the application through the inbound callback
    /// channel.
    ///
    /// # Errors
    /// [`PipelineClosed`] if the application side has been dropped.
    pub fn notify_application(&self, event: ApplicationEvent) -> Result<(), PipelineClosed> {
        self.application_tx.send(event).map_err(|_| PipelineClosed)
    }

    /// Allocate a timer owned by this pipeline. The timer is created
    /// disarmed; arm it with [`PipelineTimer::start`].
    #[must_use]
    pub fn create_timer(&self) -> PipelineTimer {
        PipelineTimer {
            token: TimerToken(self.ids.next_timer_token.fetch_add(1, Ordering::Relaxed) + 1),
            event_tx: self.event_tx.clone(),
            cancel: None,
        }
    }
}

/// A cancellable one-shot timer that posts [`Event::Timeout`] with its token
/// into the pipeline when it elapses.
#[derive(Debug)]
pub struct PipelineTimer {
    token: TimerToken,
    event_tx: UnboundedSender<Event>,
    cancel: Option<CancellationToken>,
}

impl PipelineTimer {
    /// The token carried by this timer's timeout events.
    #[must_use]
    pub fn token(&self) -> TimerToken {
        self.token
    }

    /// Arm the timer. Re-arming replaces any previous deadline.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&mut self, delay: Duration) {
        self.stop();
        let cancel = CancellationToken::new();
        let guard = cancel.clone();
        let event_tx = self.event_tx.clone();
        let token = self.token;
        tokio::spawn(async move {
            tokio::select! {
                () = guard.cancelled() => {}
                () = tokio::time::sleep(delay) => {
                    // The pipeline may already be gone on shutdown
                    let _ = event_tx.send(Event::Timeout(token));
                }
            }
        });
        self.cancel = Some(cancel);
    }

    /// Disarm the timer. A timeout that already fired may still be queued.
    pub fn stop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
    }

    /// True if the timer is currently armed.
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.cancel.is_some()
    }
}

impl Drop for PipelineTimer {
    fn drop(&mut self) {
        self.stop();
    }
}
