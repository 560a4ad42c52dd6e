// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The RPC command server policy.
//!
//! One [`CommandServer`] serves one command topic filter. After
//! [`CommandServer::register`] it waits for the broker to acknowledge the
//! subscription, turns matching PUBLISH packets into [`CommandRequest`]s for
//! the application, and publishes each [`ExecutionResult`] back to the
//! request's response topic with the MQTT5 response properties set.
//!
//! The policy is a small hierarchical state machine: the `waiting` and
//! `faulted` leaves share a `root` superstate that absorbs connection
//! lifecycle noise. Events a leaf does not handle bubble to its parent. A
//! subscription that is never acknowledged faults the instance permanently;
//! a faulted instance rejects every event and must be recreated.

use std::time::Duration;

use bytes::Bytes;
use vehicle_operations_mqtt::control_packet::{Publish, QoS};
use vehicle_operations_mqtt::properties::{MissingProperty, PropertyBag};
use vehicle_operations_mqtt::topic::{TopicFilter, TopicName};

use crate::error::CommandServerError;
use crate::event::{ApplicationEvent, Event};
use crate::pipeline::{PipelineHandle, PipelineTimer};

/// User property key carrying the numeric status of a response.
const STATUS_PROPERTY: &str = "status";
/// User property key carrying the error message of a failed response.
const STATUS_MESSAGE_PROPERTY: &str = "statusMessage";

/// Configuration for a [`CommandServer`] instance.
#[derive(Builder, Clone, Debug)]
#[builder(setter(into))]
pub struct CommandServerOptions {
    /// Vehicle model identifier used in the subscription topic.
    model_id: String,
    /// Client identifier used in the subscription topic.
    client_id: String,
    /// Command served by this instance. When empty, the instance serves
    /// every command for its client via the single-level wildcard.
    #[builder(default)]
    command_name: String,
    /// QoS for the command subscription.
    #[builder(default = "QoS::AtLeastOnce")]
    subscribe_qos: QoS,
    /// QoS for response publishes.
    #[builder(default = "QoS::AtLeastOnce")]
    response_qos: QoS,
    /// How long to wait for the broker to acknowledge the subscription
    /// before the instance faults.
    #[builder(default = "Duration::from_secs(10)")]
    subscribe_timeout: Duration,
}

/// A parsed command request, handed to the application for execution.
///
/// Payload and correlation data are cheap views into the received packet's
/// buffers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRequest {
    /// Opaque bytes to echo back on the response.
    pub correlation_data: Bytes,
    /// Topic the response must be published to.
    pub response_topic: String,
    /// Content type of the request payload.
    pub content_type: String,
    /// Topic the request arrived on.
    pub topic: String,
    /// Opaque request payload.
    pub payload: Bytes,
}

/// The application's verdict on one command execution, turned into the
/// response publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    /// HTTP-style status code; `200..300` is a success.
    pub status: i32,
    /// Human-readable failure description. Required when `status` is not a
    /// success.
    pub error_message: Option<String>,
    /// Response payload. Required (possibly zero-length) on success.
    pub payload: Option<Bytes>,
    /// Content type of the response payload. Required on success.
    pub content_type: Option<String>,
    /// Correlation data from the originating request.
    pub correlation_data: Bytes,
    /// Response topic from the originating request.
    pub response_topic: String,
    /// Topic the originating request arrived on; used to route the result
    /// to the right server instance.
    pub request_topic: String,
}

/// States of the command server's hierarchical state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Superstate absorbing events handled identically in every child.
    Root,
    /// Operational state: awaiting the subscription ack, incoming requests,
    /// and execution results.
    Waiting,
    /// Terminal state entered when the subscription times out. Every event
    /// is rejected; the instance must be recreated to recover.
    Faulted,
}

impl State {
    /// The state an unhandled event bubbles to.
    #[must_use]
    pub fn parent(self) -> Option<State> {
        match self {
            State::Root => None,
            State::Waiting | State::Faulted => Some(State::Root),
        }
    }
}

/// Outcome of a state handler: the event was consumed, or it is handed back
/// for the parent state to try.
enum Handled {
    Yes,
    BySuperstate(Event),
}

/// Build the subscription topic filter for one `(model, client, command)`
/// triple: `vehicles/{model_id}/commands/{client_id}/{command_name}`.
///
/// An empty command name subscribes to every command for the client via the
/// single-level wildcard.
///
/// # Errors
/// [`CommandServerError::InvalidArgument`] when `model_id` or `client_id` is
/// empty, or when any segment contains `/`, `+`, or `#`.
pub fn command_topic_filter(
    model_id: &str,
    client_id: &str,
    command_name: &str,
) -> Result<TopicFilter, CommandServerError> {
    check_segment("model_id", model_id, true)?;
    check_segment("client_id", client_id, true)?;
    check_segment("command_name", command_name, false)?;
    let command = if command_name.is_empty() {
        "+"
    } else {
        command_name
    };
    TopicFilter::from_string(format!("vehicles/{model_id}/commands/{client_id}/{command}"))
        .map_err(|e| CommandServerError::invalid_argument("subscription_topic", e.to_string()))
}

fn check_segment(
    name: &'static str,
    value: &str,
    required: bool,
) -> Result<(), CommandServerError> {
    if value.is_empty() {
        if required {
            return Err(CommandServerError::invalid_argument(
                name,
                "must not be empty",
            ));
        }
        return Ok(());
    }
    if value.contains(['/', '+', '#']) {
        return Err(CommandServerError::invalid_argument(
            name,
            "must not contain '/', '+', or '#'",
        ));
    }
    Ok(())
}

/// One RPC server policy instance.
///
/// # Example
/// ```
/// # use tokio_test::block_on;
/// use vehicle_operations_rpc::command_server::{CommandServer, CommandServerOptionsBuilder};
/// use vehicle_operations_rpc::pipeline::EventPipeline;
///
/// let pipeline = EventPipeline::new();
/// let options = CommandServerOptionsBuilder::default()
///     .model_id("model-x")
///     .client_id("vehicle-7")
///     .command_name("unlock")
///     .build()
///     .unwrap();
/// # block_on(async {
/// let mut server = CommandServer::new(Some(pipeline.handle()), options).unwrap();
/// server.register().unwrap();
/// # });
/// ```
pub struct CommandServer {
    subscription_topic: TopicFilter,
    options: CommandServerOptions,
    // Reused across responses; empty except while a response is being built
    property_bag: PropertyBag,
    // 0 when no subscribe is in flight
    pending_subscription_id: u32,
    subscribe_timer: Option<PipelineTimer>,
    connection: Option<PipelineHandle>,
    state: State,
}

impl CommandServer {
    /// Create a server and perform its initial transition into
    /// [`State::Waiting`].
    ///
    /// A server created without a connection handle can build its topic but
    /// rejects [`CommandServer::register`] and
    /// [`CommandServer::execution_finish`] with
    /// [`CommandServerError::NotSupported`].
    ///
    /// # Errors
    /// [`CommandServerError::InvalidArgument`] if the identity material in
    /// `options` cannot form a valid topic filter.
    pub fn new(
        connection: Option<PipelineHandle>,
        options: CommandServerOptions,
    ) -> Result<Self, CommandServerError> {
        let subscription_topic =
            command_topic_filter(&options.model_id, &options.client_id, &options.command_name)?;
        Ok(CommandServer {
            subscription_topic,
            options,
            property_bag: PropertyBag::new(),
            pending_subscription_id: 0,
            subscribe_timer: None,
            connection,
            state: State::Waiting,
        })
    }

    /// Subscribe to the command topic filter and arm the subscribe timer.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    /// [`CommandServerError::NotSupported`] if the server is not attached to
    /// a connection; [`CommandServerError::Send`] if the pipeline rejected
    /// the subscribe request.
    pub fn register(&mut self) -> Result<(), CommandServerError> {
        let Some(connection) = self.connection.as_ref() else {
            return Err(CommandServerError::NotSupported);
        };
        let id = connection.send_subscribe(
            self.subscription_topic.as_str().to_owned(),
            self.options.subscribe_qos,
        )?;
        let mut timer = connection.create_timer();
        timer.start(self.options.subscribe_timeout);
        self.pending_subscription_id = id;
        self.subscribe_timer = Some(timer);
        log::info!(
            "[{}] subscribe sent (packet id {id})",
            self.subscription_topic
        );
        Ok(())
    }

    /// Report a finished command execution.
    ///
    /// Posts the result through the pipeline's thread-safe entry point; the
    /// response publish happens when the posted event is dispatched back to
    /// this server. An application thread that does not hold the server can
    /// post [`Event::CommandCompleted`] through a [`PipelineHandle`] clone
    /// instead.
    ///
    /// # Errors
    /// [`CommandServerError::NotSupported`] if the server is not attached to
    /// a connection; [`CommandServerError::InvalidArgument`] if the result
    /// lacks correlation data or a response topic;
    /// [`CommandServerError::Send`] if the pipeline rejected the post.
    pub fn execution_finish(&self, result: ExecutionResult) -> Result<(), CommandServerError> {
        let Some(connection) = self.connection.as_ref() else {
            return Err(CommandServerError::NotSupported);
        };
        if result.correlation_data.is_empty() {
            return Err(CommandServerError::invalid_argument(
                "correlation_data",
                "must not be empty",
            ));
        }
        if result.response_topic.is_empty() {
            return Err(CommandServerError::invalid_argument(
                "response_topic",
                "must not be empty",
            ));
        }
        connection.post_event(Event::CommandCompleted(result))?;
        Ok(())
    }

    /// Dispatch one pipeline event through the state machine.
    ///
    /// The leaf state handles the event first; events it leaves unhandled
    /// bubble to the parent state, and events unhandled at the root are
    /// dropped.
    ///
    /// # Errors
    /// [`CommandServerError::InvalidState`] once the server has faulted;
    /// otherwise whatever the state handlers surface (send failures,
    /// malformed execution results, internal logic errors).
    pub fn handle_event(&mut self, event: Event) -> Result<(), CommandServerError> {
        log::trace!(
            "[{}] {event:?} in {:?}",
            self.subscription_topic,
            self.state
        );
        let mut state = self.state;
        let mut event = event;
        loop {
            let outcome = match state {
                State::Root => self.root(event)?,
                State::Waiting => self.waiting(event)?,
                State::Faulted => Self::faulted()?,
            };
            match outcome {
                Handled::Yes => return Ok(()),
                Handled::BySuperstate(unhandled) => match state.parent() {
                    Some(parent) => {
                        state = parent;
                        event = unhandled;
                    }
                    None => {
                        log::debug!("[{}] unhandled event dropped", self.subscription_topic);
                        return Ok(());
                    }
                },
            }
        }
    }

    /// Current state machine leaf.
    #[must_use]
    pub fn state(&self) -> State {
        self.state
    }

    /// The topic filter this instance subscribes to and matches requests
    /// against.
    #[must_use]
    pub fn subscription_topic(&self) -> &TopicFilter {
        &self.subscription_topic
    }

    /// True while a subscribe is in flight (sent but not yet confirmed by a
    /// suback or a matching publish).
    #[must_use]
    pub fn subscription_pending(&self) -> bool {
        self.pending_subscription_id != 0
    }

    fn root(&mut self, event: Event) -> Result<Handled, CommandServerError> {
        match event {
            Event::Error(error) => {
                if self
                    .notify_application(ApplicationEvent::Error(error))
                    .is_err()
                {
                    log::error!(
                        "[{}] failed to forward an error event to the application",
                        self.subscription_topic
                    );
                    return Err(CommandServerError::InternalLogic(
                        "error event could not be forwarded to the application",
                    ));
                }
                Ok(Handled::Yes)
            }
            Event::PubAck(_)
            | Event::ConnectionOpenRequest
            | Event::Connected
            | Event::ConnectionCloseRequest
            | Event::Disconnected => Ok(Handled::Yes),
            other => Ok(Handled::BySuperstate(other)),
        }
    }

    fn waiting(&mut self, event: Event) -> Result<Handled, CommandServerError> {
        match event {
            Event::SubAck(ack) => {
                if ack.id == self.pending_subscription_id {
                    log::info!("[{}] subscription acknowledged", self.subscription_topic);
                    self.clear_pending_subscription();
                }
                // an ack for a different instance keeps our timer running
                Ok(Handled::Yes)
            }
            Event::Timeout(token) => {
                if self
                    .subscribe_timer
                    .as_ref()
                    .is_some_and(|timer| timer.token() == token)
                {
                    log::error!(
                        "[{}] subscribe was not acknowledged in time, faulting",
                        self.subscription_topic
                    );
                    // the timer has already fired; drop it so the pending
                    // id / armed timer pair stays in sync
                    self.subscribe_timer = None;
                    self.pending_subscription_id = 0;
                    self.transition_peer(State::Waiting, State::Faulted)?;
                }
                Ok(Handled::Yes)
            }
            Event::PublishReceived(publish) => {
                self.on_request(publish)?;
                Ok(Handled::Yes)
            }
            Event::CommandCompleted(result) => {
                self.on_command_completed(&result)?;
                Ok(Handled::Yes)
            }
            Event::PubAck(_) | Event::ConnectionOpenRequest | Event::Connected => Ok(Handled::Yes),
            other => Ok(Handled::BySuperstate(other)),
        }
    }

    fn faulted() -> Result<Handled, CommandServerError> {
        Err(CommandServerError::InvalidState)
    }

    fn transition_peer(&mut self, from: State, to: State) -> Result<(), CommandServerError> {
        debug_assert_eq!(from.parent(), to.parent());
        self.on_exit(from)?;
        self.state = to;
        // entries are no-ops for every state
        Ok(())
    }

    fn on_exit(&mut self, state: State) -> Result<(), CommandServerError> {
        if state == State::Root {
            log::error!("[{}] asked to exit the root state", self.subscription_topic);
            return Err(CommandServerError::InternalLogic(
                "the root state can never be exited",
            ));
        }
        Ok(())
    }

    /// Handle an incoming publish: filter by topic, parse the required
    /// response-routing properties, and hand the request to the application.
    fn on_request(&mut self, publish: Publish) -> Result<(), CommandServerError> {
        let Ok(topic) = TopicName::from_string(publish.topic.clone()) else {
            log::warn!(
                "[{}] received publish with an invalid topic, ignoring",
                self.subscription_topic
            );
            return Ok(());
        };
        if !self.subscription_topic.matches(&topic) {
            return Ok(());
        }
        // A matching publish implies the broker accepted our subscribe even
        // if the suback has not arrived yet
        if self.pending_subscription_id != 0 {
            self.clear_pending_subscription();
        }
        match parse_request(&publish) {
            Ok(request) => self.notify_application(ApplicationEvent::CommandReceived(request)),
            Err(missing) => {
                // malformed traffic from the broker or a misbehaving peer;
                // never fatal for this instance
                log::warn!("[{}] dropping request: {missing}", self.subscription_topic);
                Ok(())
            }
        }
    }

    /// Handle a finished execution: route by request topic, build the
    /// response publish, and emit it.
    fn on_command_completed(&mut self, result: &ExecutionResult) -> Result<(), CommandServerError> {
        let matches = TopicName::from_string(result.request_topic.clone())
            .is_ok_and(|topic| self.subscription_topic.matches(&topic));
        if !matches {
            // probably meant for a different instance sharing the pipeline
            log::debug!(
                "[{}] request topic '{}' does not match the subscription, ignoring",
                self.subscription_topic,
                result.request_topic
            );
            return Ok(());
        }
        let outcome = match self.build_response(result) {
            Ok(publish) => self.send_publish(publish),
            Err(error) => Err(error),
        };
        // emptied on every path so a partial failure cannot leak stale
        // properties into the next response
        self.property_bag.clear();
        outcome
    }

    /// Populate the property bag and assemble the response publish.
    ///
    /// Failure responses (`status` outside `200..300`) carry a
    /// `statusMessage` user property and an empty payload; success responses
    /// carry the content type and the execution payload. Both carry the
    /// `status` user property and the request's correlation data.
    fn build_response(&mut self, result: &ExecutionResult) -> Result<Publish, CommandServerError> {
        let payload = if (200..300).contains(&result.status) {
            let content_type = result.content_type.as_deref().ok_or_else(|| {
                CommandServerError::invalid_argument(
                    "content_type",
                    "required on a success response",
                )
            })?;
            let payload = result.payload.clone().ok_or_else(|| {
                CommandServerError::invalid_argument("payload", "required on a success response")
            })?;
            self.property_bag.append_content_type(content_type);
            payload
        } else {
            let message = result.error_message.as_deref().ok_or_else(|| {
                CommandServerError::invalid_argument(
                    "error_message",
                    "required when the status is not a success",
                )
            })?;
            self.property_bag
                .append_user_property(STATUS_MESSAGE_PROPERTY, message);
            Bytes::new()
        };
        self.property_bag
            .append_user_property(STATUS_PROPERTY, result.status.to_string());
        self.property_bag
            .append_correlation_data(result.correlation_data.clone());
        Ok(Publish {
            topic: result.response_topic.clone(),
            qos: self.options.response_qos,
            payload,
            // taking the contents leaves the bag empty for the next response
            properties: self.property_bag.take(),
        })
    }

    fn send_publish(&self, publish: Publish) -> Result<(), CommandServerError> {
        match self.connection.as_ref() {
            Some(connection) => {
                connection.send_publish(publish)?;
                Ok(())
            }
            None => Err(CommandServerError::NotSupported),
        }
    }

    fn notify_application(&self, event: ApplicationEvent) -> Result<(), CommandServerError> {
        match self.connection.as_ref() {
            Some(connection) => {
                connection.notify_application(event)?;
                Ok(())
            }
            None => Err(CommandServerError::NotSupported),
        }
    }

    fn clear_pending_subscription(&mut self) {
        if let Some(mut timer) = self.subscribe_timer.take() {
            timer.stop();
        }
        self.pending_subscription_id = 0;
    }
}

/// Extract the response-routing properties from a received publish.
fn parse_request(publish: &Publish) -> Result<CommandRequest, MissingProperty> {
    let response_topic = publish.properties.response_topic()?.to_owned();
    let correlation_data = publish.properties.correlation_data()?.clone();
    // the application needs the content type to deserialize the payload
    let content_type = publish.properties.content_type()?.to_owned();
    Ok(CommandRequest {
        correlation_data,
        response_topic,
        content_type,
        topic: publish.topic.clone(),
        payload: publish.payload.clone(),
    })
}
