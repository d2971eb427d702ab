//! MQTT over WebSocket sessions to the device shadow broker.
//!
//! A [`Transport`] opens a [`Session`]: a stream of [`SessionEvent`]s plus a
//! [`Link`] for requests. Sessions are single use. Once a session reports
//! [`SessionEvent::Disconnected`] it is dead and the caller opens a new one
//! with fresh credentials; the underlying event loop never reconnects on its
//! own.
//!
//! The broker authenticates the WebSocket upgrade through a custom
//! authorizer, so credentials travel as HTTP headers rather than as MQTT
//! username and password.

use std::{ops::ControlFlow, time::Duration};

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions, Outgoing,
    Packet, QoS,
};
use tokio::{sync::mpsc, task::JoinHandle};
use url::Url;
use veil::Redact;

use crate::error::{Error, Result};

/// Parameters of one broker connection.
#[derive(Clone, Redact)]
pub struct SessionOptions {
    pub client_id: String,
    pub broker_url: Url,

    /// Headers added to the WebSocket upgrade request.
    #[redact]
    pub headers: Vec<(&'static str, String)>,

    pub keep_alive: Duration,
}

/// What the I/O side of a session reports.
#[derive(Debug)]
pub enum SessionEvent {
    /// The broker accepted the connection.
    Connected,

    /// The session is gone, and why.
    Disconnected(Error),

    MessageReceived { topic: String, payload: Vec<u8> },
}

/// Request side of a session.
#[async_trait]
pub trait Link: Send + Sync {
    async fn subscribe(&self, topic: &str) -> Result<()>;

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()>;

    /// Disconnects and waits for the I/O side to stop.
    async fn close(self: Box<Self>);
}

pub struct Session {
    pub events: mpsc::Receiver<SessionEvent>,
    pub link: Box<dyn Link>,
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Starts connecting. Completion is reported as an event.
    async fn open(&self, options: SessionOptions) -> Result<Session>;
}

/// [`Transport`] backed by `rumqttc` with TLS WebSockets.
#[derive(Clone, Copy, Debug, Default)]
pub struct MqttTransport;

impl MqttTransport {
    /// Requests that may be queued before the event loop picks them up.
    const REQUEST_CAPACITY: usize = 16;

    const EVENT_CAPACITY: usize = 32;

    fn mqtt_options(options: SessionOptions) -> MqttOptions {
        let port = options.broker_url.port_or_known_default().unwrap_or(443);

        // With WebSockets the "host" is the full endpoint URL.
        let mut mqtt_options =
            MqttOptions::new(options.client_id, options.broker_url.as_str(), port);
        mqtt_options
            .set_transport(rumqttc::Transport::wss_with_default_config())
            .set_keep_alive(options.keep_alive)
            .set_clean_session(true);

        let headers = options.headers;
        mqtt_options.set_request_modifier(move |mut request| {
            let headers = headers.clone();
            async move {
                for (name, value) in headers {
                    match value.parse() {
                        Ok(value) => {
                            request.headers_mut().insert(name, value);
                        }
                        Err(e) => error!("cannot set {name} header: {e}"),
                    }
                }
                request
            }
        });

        mqtt_options
    }
}

#[async_trait]
impl Transport for MqttTransport {
    async fn open(&self, options: SessionOptions) -> Result<Session> {
        debug!(
            "connecting to {} as {}",
            options.broker_url, options.client_id
        );

        let (client, event_loop) =
            AsyncClient::new(Self::mqtt_options(options), Self::REQUEST_CAPACITY);
        let (tx, rx) = mpsc::channel(Self::EVENT_CAPACITY);
        let task = tokio::spawn(run_event_loop(event_loop, tx));

        Ok(Session {
            events: rx,
            link: Box::new(MqttLink { client, task }),
        })
    }
}

/// Forwards event loop notifications until the session ends.
async fn run_event_loop(mut event_loop: EventLoop, events: mpsc::Sender<SessionEvent>) {
    loop {
        let (event, done) = match translate(event_loop.poll().await) {
            ControlFlow::Continue(event) => (event, false),
            ControlFlow::Break(event) => (event, true),
        };

        if let Some(event) = event {
            if events.send(event).await.is_err() {
                // Nobody is listening anymore.
                break;
            }
        }

        if done {
            break;
        }
    }
}

/// Maps one event loop notification to the event to forward, if any.
/// `Break` ends the session.
fn translate(
    notification: std::result::Result<Event, ConnectionError>,
) -> ControlFlow<Option<SessionEvent>, Option<SessionEvent>> {
    match notification {
        Ok(Event::Incoming(Packet::ConnAck(ack))) => {
            if ack.code == ConnectReturnCode::Success {
                ControlFlow::Continue(Some(SessionEvent::Connected))
            } else {
                let error = Error::permission_denied(format!(
                    "broker refused connection: {:?}",
                    ack.code
                ));
                ControlFlow::Break(Some(SessionEvent::Disconnected(error)))
            }
        }
        Ok(Event::Incoming(Packet::Publish(publish))) => {
            ControlFlow::Continue(Some(SessionEvent::MessageReceived {
                topic: publish.topic,
                payload: publish.payload.to_vec(),
            }))
        }
        Ok(Event::Incoming(Packet::Disconnect)) => {
            let error = Error::unavailable("broker closed the session");
            ControlFlow::Break(Some(SessionEvent::Disconnected(error)))
        }
        // Our own disconnect: the link is closing and nobody waits for events.
        Ok(Event::Outgoing(Outgoing::Disconnect)) => ControlFlow::Break(None),
        Ok(event) => {
            trace!("{event:?}");
            ControlFlow::Continue(None)
        }
        Err(e) => ControlFlow::Break(Some(SessionEvent::Disconnected(e.into()))),
    }
}

struct MqttLink {
    client: AsyncClient,
    task: JoinHandle<()>,
}

impl MqttLink {
    /// Time allowed for a clean disconnect before the I/O task is aborted.
    const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);
}

#[async_trait]
impl Link for MqttLink {
    async fn subscribe(&self, topic: &str) -> Result<()> {
        self.client
            .subscribe(topic, QoS::AtLeastOnce)
            .await
            .map_err(Into::into)
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await
            .map_err(Into::into)
    }

    async fn close(self: Box<Self>) {
        let Self { client, mut task } = *self;
        if let Err(e) = client.try_disconnect() {
            trace!("disconnect request not queued: {e}");
        }

        if tokio::time::timeout(Self::CLOSE_TIMEOUT, &mut task)
            .await
            .is_err()
        {
            debug!("session did not close in time; aborting");
            task.abort();
        }
    }
}
