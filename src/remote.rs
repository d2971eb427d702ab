//! Supervised connection to an appliance's device shadow.
//!
//! [`Remote::connect`] spawns one supervising task that owns the broker
//! session for its whole life. The task runs the attempt loop:
//!
//! 1. fetch session credentials (valid token, fresh signature)
//! 2. open a session and wait for the broker to accept it
//! 3. subscribe to shadow reports and serve commands until the session drops
//! 4. tear the session down and back off before the next attempt
//!
//! Nothing but [`Remote::disconnect`] ends the loop. Failures at any step
//! are logged and retried with [`Backoff`].
//!
//! The [`Remote`] handle talks to the task over channels: commands go in
//! with a reply channel, state comes out through watch channels.

use std::{fmt, future::Future, ops::ControlFlow, sync::Arc, time::Duration};

use time::OffsetDateTime;
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

use crate::{
    appliance::{Command, State},
    backoff::Backoff,
    config::Config,
    directory::{CredentialProvider, DeviceIdentity, SessionCredentials},
    error::{Error, Result},
    mqtt::{Link, Session, SessionEvent, SessionOptions, Transport},
    protocol::shadow::{ControlCommand, PresetMode, ShadowDocument, Topics},
    util,
};

/// Lifecycle of the broker connection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Connected,
    Disconnecting,
    Disconnected,
    Stopped,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnecting => "disconnecting",
            Self::Disconnected => "disconnected",
            Self::Stopped => "stopped",
        };
        f.write_str(state)
    }
}

struct Request {
    command: Command,
    reply: oneshot::Sender<Result<()>>,
}

/// Handle to a supervised appliance connection.
///
/// Dropping the handle stops the supervisor without waiting for it; use
/// [`Remote::disconnect`] for an orderly shutdown.
pub struct Remote {
    commands: mpsc::Sender<Request>,
    state: watch::Receiver<State>,
    connection: watch::Receiver<ConnectionState>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl Remote {
    const COMMAND_CAPACITY: usize = 8;

    /// Starts supervising the connection to `device`.
    ///
    /// Returns immediately; the first attempt starts right away on a
    /// spawned task.
    #[must_use]
    pub fn connect(
        config: Arc<Config>,
        device: DeviceIdentity,
        provider: Arc<dyn CredentialProvider>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let (commands_tx, commands_rx) = mpsc::channel(Self::COMMAND_CAPACITY);
        let (state_tx, state_rx) = watch::channel(State::default());
        let (connection_tx, connection_rx) = watch::channel(ConnectionState::Idle);
        let cancel = CancellationToken::new();

        let supervisor = Supervisor {
            topics: Topics::new(&device.thing_name),
            config,
            device,
            provider,
            transport,
            commands: commands_rx,
            state: state_tx,
            connection: connection_tx,
            cancel: cancel.clone(),
            backoff: Backoff::new(),
        };

        Self {
            commands: commands_tx,
            state: state_rx,
            connection: connection_rx,
            cancel,
            task: Some(tokio::spawn(supervisor.run())),
        }
    }

    /// Switches the appliance on, then selects `mode` if given.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` when not connected, or the publish error.
    pub async fn turn_on(&self, mode: Option<PresetMode>) -> Result<()> {
        self.send(Command::TurnOn(mode)).await
    }

    /// # Errors
    ///
    /// Returns `Unavailable` when not connected, or the publish error.
    pub async fn turn_off(&self) -> Result<()> {
        self.send(Command::TurnOff).await
    }

    /// # Errors
    ///
    /// Returns `Unavailable` when not connected, or the publish error.
    pub async fn set_preset_mode(&self, mode: PresetMode) -> Result<()> {
        self.send(Command::SetPresetMode(mode)).await
    }

    #[must_use]
    pub fn state(&self) -> State {
        *self.state.borrow()
    }

    /// Receiver that is notified whenever the appliance state changes.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<State> {
        self.state.clone()
    }

    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        *self.connection.borrow()
    }

    #[must_use]
    pub fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.connection.clone()
    }

    /// Waits until the session is up.
    ///
    /// # Errors
    ///
    /// Returns `DeadlineExceeded` if not connected within `timeout`, or
    /// `Cancelled` if the supervisor is gone.
    pub async fn wait_until_connected(&self, timeout: Duration) -> Result<()> {
        let mut connection = self.connection.clone();
        let connected = tokio::time::timeout(
            timeout,
            connection.wait_for(|state| *state == ConnectionState::Connected),
        )
        .await?;
        connected
            .map(|_| ())
            .map_err(|e| Error::cancelled(e.to_string()))
    }

    /// Stops the supervisor and waits until the session is torn down.
    pub async fn disconnect(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!("supervisor failed: {e}");
            }
        }
    }

    async fn send(&self, command: Command) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Request { command, reply })
            .await
            .map_err(|_| Error::unavailable(format!("cannot {command}: remote is stopped")))?;
        response.await?
    }
}

impl Drop for Remote {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Sole owner of the live session.
struct Supervisor {
    config: Arc<Config>,
    device: DeviceIdentity,
    topics: Topics,

    provider: Arc<dyn CredentialProvider>,
    transport: Arc<dyn Transport>,

    commands: mpsc::Receiver<Request>,
    state: watch::Sender<State>,
    connection: watch::Sender<ConnectionState>,
    cancel: CancellationToken,

    backoff: Backoff,
}

impl Supervisor {
    async fn run(mut self) {
        let name = self
            .device
            .friendly_name
            .clone()
            .unwrap_or_else(|| self.device.thing_name.clone());
        info!("supervising connection to {name}");

        while self.attempt().await.is_continue() {
            self.connection.send_replace(ConnectionState::Disconnected);

            let delay = self.backoff.next_delay();
            info!("reconnecting in {}s", delay.as_secs());
            if self.wait(tokio::time::sleep(delay)).await.is_none() {
                break;
            }
        }

        self.connection.send_replace(ConnectionState::Stopped);
        info!("stopped supervising connection to {name}");
    }

    /// One connection attempt, from credentials to teardown. Breaks when
    /// stopped.
    async fn attempt(&mut self) -> ControlFlow<()> {
        self.connection.send_replace(ConnectionState::Connecting);

        let provider = Arc::clone(&self.provider);
        let credentials = match self.wait(provider.session_credentials()).await {
            None => return ControlFlow::Break(()),
            Some(Ok(credentials)) => credentials,
            Some(Err(e)) => {
                error!("cannot obtain session credentials: {e}");
                return ControlFlow::Continue(());
            }
        };

        let transport = Arc::clone(&self.transport);
        let options = self.session_options(credentials);
        let Session { mut events, link } = match self.wait(transport.open(options)).await {
            None => return ControlFlow::Break(()),
            Some(Ok(session)) => session,
            Some(Err(e)) => {
                error!("cannot open session: {e}");
                return ControlFlow::Continue(());
            }
        };

        let connect_timeout = self.config.connect_timeout;
        let handshake = tokio::time::timeout(connect_timeout, until_connected(&mut events));
        let result = match self.wait(handshake).await {
            None => {
                self.teardown(link).await;
                return ControlFlow::Break(());
            }
            Some(Ok(result)) => result,
            Some(Err(_)) => Err(Error::deadline_exceeded(format!(
                "broker did not accept the connection within {}s",
                connect_timeout.as_secs()
            ))),
        };

        if let Err(e) = result {
            error!("connecting to {} failed: {e}", self.config.broker_host());
            self.teardown(link).await;
            return ControlFlow::Continue(());
        }

        self.backoff.reset();

        if let Err(e) = link.subscribe(&self.topics.shadow_accepted).await {
            error!("cannot subscribe to shadow reports: {e}");
            self.teardown(link).await;
            return ControlFlow::Continue(());
        }

        self.connection.send_replace(ConnectionState::Connected);
        info!("connected to {}", self.config.broker_host());

        let reason = loop {
            tokio::select! {
                biased;

                () = self.cancel.cancelled() => {
                    self.teardown(link).await;
                    return ControlFlow::Break(());
                }

                event = events.recv() => match event {
                    Some(SessionEvent::MessageReceived { topic, payload }) => {
                        self.handle_message(&topic, &payload);
                    }
                    Some(SessionEvent::Connected) => trace!("session acknowledged twice"),
                    Some(SessionEvent::Disconnected(reason)) => break reason,
                    None => break Error::unavailable("session ended"),
                },

                Some(request) = self.commands.recv() => {
                    debug!("executing {}", request.command);
                    let result = self.execute(link.as_ref(), request.command).await;
                    if let Err(e) = &result {
                        error!("{} failed: {e}", request.command);
                    }
                    let _ = request.reply.send(result);
                }
            }
        };

        warn!("connection lost: {reason}");
        self.teardown(link).await;
        ControlFlow::Continue(())
    }

    fn session_options(&self, credentials: SessionCredentials) -> SessionOptions {
        SessionOptions {
            client_id: format!("{}_{}", credentials.user_id, util::hex_id()),
            broker_url: self.config.broker_url.clone(),
            headers: vec![
                (
                    "token-header",
                    format!("Bearer {}", credentials.access_token),
                ),
                ("x-amz-customauthorizer-signature", credentials.signature),
                (
                    "x-amz-customauthorizer-name",
                    self.config.authorizer_name.clone(),
                ),
                ("tenant", self.config.tenant.clone()),
            ],
            keep_alive: self.config.keep_alive,
        }
    }

    async fn teardown(&mut self, link: Box<dyn Link>) {
        self.connection.send_replace(ConnectionState::Disconnecting);
        link.close().await;
    }

    /// Awaits `future` while rejecting commands, or returns `None` when
    /// stopped first.
    async fn wait<F>(&mut self, future: F) -> Option<F::Output>
    where
        F: Future,
    {
        tokio::pin!(future);
        loop {
            tokio::select! {
                biased;

                () = self.cancel.cancelled() => return None,
                output = &mut future => return Some(output),
                Some(request) = self.commands.recv() => {
                    let error = Error::unavailable(format!(
                        "cannot {}: not connected",
                        request.command
                    ));
                    let _ = request.reply.send(Err(error));
                }
            }
        }
    }

    async fn execute(&mut self, link: &dyn Link, command: Command) -> Result<()> {
        match command {
            Command::TurnOn(mode) => {
                self.publish_power(link, true).await?;
                if let Some(mode) = mode {
                    self.publish_mode(link, mode).await?;
                }
                Ok(())
            }
            Command::TurnOff => self.publish_power(link, false).await,
            Command::SetPresetMode(mode) => self.publish_mode(link, mode).await,
        }
    }

    async fn publish_power(&mut self, link: &dyn Link, power_on: bool) -> Result<()> {
        let payload = serde_json::to_vec(&ShadowDocument::desired_power(power_on))?;
        link.publish(&self.topics.shadow_update, payload).await?;

        let command = if power_on {
            Command::TurnOn(None)
        } else {
            Command::TurnOff
        };
        self.state.send_modify(|state| state.apply(command));
        Ok(())
    }

    async fn publish_mode(&mut self, link: &dyn Link, mode: PresetMode) -> Result<()> {
        let command = ControlCommand::set_preset_mode(mode, OffsetDateTime::now_utc())?;
        let payload = serde_json::to_vec(&command)?;
        link.publish(&self.topics.control, payload).await?;

        self.state
            .send_modify(|state| state.apply(Command::SetPresetMode(mode)));
        Ok(())
    }

    fn handle_message(&mut self, topic: &str, payload: &[u8]) {
        if topic != self.topics.shadow_accepted {
            trace!("ignoring message on {topic}");
            return;
        }

        match serde_json::from_slice::<ShadowDocument>(payload) {
            Ok(report) => {
                if self.state.send_if_modified(|state| state.reconcile(&report)) {
                    info!("appliance is {}", *self.state.borrow());
                }
            }
            Err(e) => warn!("dropping malformed shadow report: {e}"),
        }
    }
}

/// Waits for the broker to accept the session.
async fn until_connected(events: &mut mpsc::Receiver<SessionEvent>) -> Result<()> {
    loop {
        match events.recv().await {
            Some(SessionEvent::Connected) => return Ok(()),
            Some(SessionEvent::Disconnected(reason)) => return Err(reason),
            Some(SessionEvent::MessageReceived { topic, .. }) => {
                trace!("ignoring early message on {topic}");
            }
            None => return Err(Error::unavailable("session ended before connecting")),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    };

    use async_trait::async_trait;
    use tokio::time::Instant;

    use super::*;
    use crate::error::ErrorKind;

    /// Hands out credentials with a numbered signature, failing the first
    /// `failures` calls.
    #[derive(Default)]
    struct FakeProvider {
        failures: usize,
        calls: Mutex<Vec<Instant>>,
    }

    impl FakeProvider {
        fn failing(failures: usize) -> Arc<Self> {
            Arc::new(Self {
                failures,
                ..Default::default()
            })
        }

        fn calls(&self) -> Vec<Instant> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CredentialProvider for FakeProvider {
        async fn session_credentials(&self) -> Result<SessionCredentials> {
            let call = {
                let mut calls = self.calls.lock().unwrap();
                calls.push(Instant::now());
                calls.len()
            };

            if call <= self.failures {
                return Err(Error::permission_denied("no signature today"));
            }

            Ok(SessionCredentials {
                user_id: "user-1".to_owned(),
                access_token: "access".to_owned(),
                signature: format!("sig-{call}"),
            })
        }
    }

    /// Records sessions and lets the test drive their events.
    #[derive(Default)]
    struct FakeTransport {
        auto_connect: bool,
        opened: Mutex<Vec<(SessionOptions, mpsc::Sender<SessionEvent>)>>,
        published: Arc<Mutex<Vec<(String, Vec<u8>)>>>,
        subscribed: Arc<Mutex<Vec<String>>>,
        closed: Arc<AtomicUsize>,
    }

    impl FakeTransport {
        fn new(auto_connect: bool) -> Arc<Self> {
            Arc::new(Self {
                auto_connect,
                ..Default::default()
            })
        }

        fn opened(&self) -> usize {
            self.opened.lock().unwrap().len()
        }

        fn options(&self, session: usize) -> SessionOptions {
            self.opened.lock().unwrap()[session].0.clone()
        }

        fn events(&self, session: usize) -> mpsc::Sender<SessionEvent> {
            self.opened.lock().unwrap()[session].1.clone()
        }

        fn published(&self) -> Vec<(String, serde_json::Value)> {
            self.published
                .lock()
                .unwrap()
                .iter()
                .map(|(topic, payload)| (topic.clone(), serde_json::from_slice(payload).unwrap()))
                .collect()
        }
    }

    struct FakeLink {
        published: Arc<Mutex<Vec<(String, Vec<u8>)>>>,
        subscribed: Arc<Mutex<Vec<String>>>,
        closed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Link for FakeLink {
        async fn subscribe(&self, topic: &str) -> Result<()> {
            self.subscribed.lock().unwrap().push(topic.to_owned());
            Ok(())
        }

        async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
            self.published
                .lock()
                .unwrap()
                .push((topic.to_owned(), payload));
            Ok(())
        }

        async fn close(self: Box<Self>) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn open(&self, options: SessionOptions) -> Result<Session> {
            let (tx, rx) = mpsc::channel(8);
            if self.auto_connect {
                tx.send(SessionEvent::Connected).await.unwrap();
            }
            self.opened.lock().unwrap().push((options, tx));

            Ok(Session {
                events: rx,
                link: Box::new(FakeLink {
                    published: Arc::clone(&self.published),
                    subscribed: Arc::clone(&self.subscribed),
                    closed: Arc::clone(&self.closed),
                }),
            })
        }
    }

    fn device() -> DeviceIdentity {
        DeviceIdentity {
            user_id: "user-1".to_owned(),
            thing_name: "da-0123".to_owned(),
            friendly_name: Some("Bedroom".to_owned()),
        }
    }

    fn remote(provider: &Arc<FakeProvider>, transport: &Arc<FakeTransport>) -> Remote {
        let config = Arc::new(Config::new("client-id", "client-secret").unwrap());
        Remote::connect(config, device(), provider.clone(), transport.clone())
    }

    async fn until<F>(mut condition: F)
    where
        F: FnMut() -> bool,
    {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    async fn until_state(remote: &Remote, wanted: ConnectionState) {
        let mut connection = remote.watch_connection();
        connection
            .wait_for(|state| *state == wanted)
            .await
            .unwrap();
    }

    fn assert_gap(earlier: Instant, later: Instant, secs: u64) {
        let gap = later - earlier;
        let expected = Duration::from_secs(secs);
        assert!(
            gap >= expected && gap < expected + Duration::from_millis(50),
            "expected {secs}s between attempts, got {gap:?}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn backs_off_exponentially() {
        let provider = FakeProvider::failing(usize::MAX);
        let transport = FakeTransport::new(true);
        let remote = remote(&provider, &transport);

        until(|| provider.calls().len() >= 6).await;

        let calls = provider.calls();
        for (pair, secs) in calls.windows(2).zip([5, 10, 20, 40, 80]) {
            assert_gap(pair[0], pair[1], secs);
        }
        assert_eq!(transport.opened(), 0);

        remote.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn connecting_resets_backoff() {
        let provider = FakeProvider::failing(2);
        let transport = FakeTransport::new(true);
        let remote = remote(&provider, &transport);

        until_state(&remote, ConnectionState::Connected).await;
        let calls = provider.calls();
        assert_gap(calls[0], calls[1], 5);
        assert_gap(calls[1], calls[2], 10);

        let lost_at = Instant::now();
        transport
            .events(0)
            .send(SessionEvent::Disconnected(Error::aborted("socket closed")))
            .await
            .unwrap();

        until(|| provider.calls().len() >= 4).await;
        assert_gap(lost_at, provider.calls()[3], 5);

        remote.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn reconnects_once_with_fresh_signature() {
        let provider = FakeProvider::failing(0);
        let transport = FakeTransport::new(true);
        let remote = remote(&provider, &transport);

        until_state(&remote, ConnectionState::Connected).await;
        let first = transport.options(0);
        assert!(first.client_id.starts_with("user-1_"));
        assert_eq!(first.client_id.len(), "user-1_".len() + 8);
        assert!(first
            .headers
            .contains(&("x-amz-customauthorizer-signature", "sig-1".to_owned())));
        assert!(first
            .headers
            .contains(&("token-header", "Bearer access".to_owned())));
        assert!(first
            .headers
            .contains(&("x-amz-customauthorizer-name", "CustomAuthorizer".to_owned())));
        assert!(first.headers.contains(&("tenant", "da".to_owned())));
        assert_eq!(first.keep_alive, Duration::from_secs(30));

        transport
            .events(0)
            .send(SessionEvent::Disconnected(Error::aborted("socket closed")))
            .await
            .unwrap();

        until(|| transport.opened() >= 2).await;
        until_state(&remote, ConnectionState::Connected).await;
        tokio::time::sleep(Duration::from_secs(600)).await;

        assert_eq!(transport.opened(), 2);
        assert_eq!(provider.calls().len(), 2);
        assert!(transport
            .options(1)
            .headers
            .contains(&("x-amz-customauthorizer-signature", "sig-2".to_owned())));
        assert_eq!(transport.closed.load(Ordering::SeqCst), 1);
        assert_eq!(
            *transport.subscribed.lock().unwrap(),
            vec![
                "$aws/things/da-0123/shadow/update/accepted".to_owned(),
                "$aws/things/da-0123/shadow/update/accepted".to_owned(),
            ]
        );

        remote.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn unacknowledged_connect_times_out() {
        let provider = FakeProvider::failing(0);
        let transport = FakeTransport::new(false);
        let remote = remote(&provider, &transport);

        until(|| provider.calls().len() >= 2).await;
        let calls = provider.calls();
        assert_gap(calls[0], calls[1], 20 + 5);
        assert_eq!(transport.closed.load(Ordering::SeqCst), 1);
        assert_ne!(remote.connection_state(), ConnectionState::Connected);

        remote.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn refused_connect_is_retried() {
        let provider = FakeProvider::failing(0);
        let transport = FakeTransport::new(false);
        let remote = remote(&provider, &transport);

        until(|| transport.opened() >= 1).await;
        transport
            .events(0)
            .send(SessionEvent::Disconnected(Error::permission_denied("connection refused")))
            .await
            .unwrap();

        until(|| provider.calls().len() >= 2).await;
        assert_gap(provider.calls()[0], provider.calls()[1], 5);

        remote.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn commands_fail_while_disconnected() {
        let provider = FakeProvider::failing(usize::MAX);
        let transport = FakeTransport::new(true);
        let remote = remote(&provider, &transport);

        until(|| !provider.calls().is_empty()).await;

        let err = remote.turn_on(None).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unavailable);
        let err = remote.set_preset_mode(PresetMode::High).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unavailable);

        assert_eq!(remote.state(), State::default());
        assert!(transport.published().is_empty());

        remote.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn publishes_power_then_mode() {
        let provider = FakeProvider::failing(0);
        let transport = FakeTransport::new(true);
        let remote = remote(&provider, &transport);

        until_state(&remote, ConnectionState::Connected).await;
        remote.turn_on(Some(PresetMode::High)).await.unwrap();

        let published = transport.published();
        assert_eq!(published.len(), 2);

        let (topic, power) = &published[0];
        assert_eq!(topic, "$aws/things/da-0123/shadow/update");
        assert_eq!(power["state"]["desired"]["powerOn"], true);

        let (topic, mode) = &published[1];
        assert_eq!(topic, "da_ctrl/da-0123/to_ncp");
        assert_eq!(mode["data"]["properties"]["D0310C"], 18);
        assert_eq!(mode["cn"], "setPort");

        assert_eq!(
            remote.state(),
            State {
                power_on: true,
                preset_mode: Some(PresetMode::High)
            }
        );

        remote.set_preset_mode(PresetMode::Auto).await.unwrap();
        assert_eq!(transport.published()[2].1["data"]["properties"]["D0310C"], 0);

        remote.turn_off().await.unwrap();
        assert_eq!(transport.published()[3].1["state"]["desired"]["powerOn"], false);
        assert!(!remote.state().power_on);

        remote.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn reports_update_power_state() {
        let provider = FakeProvider::failing(0);
        let transport = FakeTransport::new(true);
        let remote = remote(&provider, &transport);
        let mut state = remote.watch_state();

        until_state(&remote, ConnectionState::Connected).await;
        let events = transport.events(0);

        for payload in [
            b"not json".to_vec(),
            br#"{"state":{"reported":{"powerOn":"yes"}}}"#.to_vec(),
        ] {
            events
                .send(SessionEvent::MessageReceived {
                    topic: "$aws/things/da-0123/shadow/update/accepted".to_owned(),
                    payload,
                })
                .await
                .unwrap();
        }
        events
            .send(SessionEvent::MessageReceived {
                topic: "$aws/things/other/shadow/update/accepted".to_owned(),
                payload: br#"{"state":{"reported":{"powerOn":true}}}"#.to_vec(),
            })
            .await
            .unwrap();
        events
            .send(SessionEvent::MessageReceived {
                topic: "$aws/things/da-0123/shadow/update/accepted".to_owned(),
                payload: br#"{"state":{"reported":{"powerOn":true,"D0310C":17}},"version":7}"#
                    .to_vec(),
            })
            .await
            .unwrap();

        state.wait_for(|state| state.power_on).await.unwrap();
        assert_eq!(remote.state().preset_mode, None);
        assert_eq!(remote.connection_state(), ConnectionState::Connected);

        remote.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_tears_down_session() {
        let provider = FakeProvider::failing(0);
        let transport = FakeTransport::new(true);
        let remote = remote(&provider, &transport);
        let connection = remote.watch_connection();

        until_state(&remote, ConnectionState::Connected).await;
        remote.disconnect().await;

        assert_eq!(*connection.borrow(), ConnectionState::Stopped);
        assert_eq!(transport.closed.load(Ordering::SeqCst), 1);
        assert_eq!(transport.opened(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_cancels_backoff() {
        let provider = FakeProvider::failing(usize::MAX);
        let transport = FakeTransport::new(true);
        let remote = remote(&provider, &transport);
        let connection = remote.watch_connection();

        until(|| !provider.calls().is_empty()).await;
        let started = Instant::now();
        remote.disconnect().await;

        assert!(Instant::now() - started < Duration::from_secs(1));
        assert_eq!(*connection.borrow(), ConnectionState::Stopped);
        assert_eq!(provider.calls().len(), 1);
    }
}
