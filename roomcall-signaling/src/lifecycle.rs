use crate::admission::AdmissionController;
use crate::config::{SESSION_EVENTS_CAPACITY, SessionConfig};
use crate::error::SessionError;
use crate::negotiation::{Negotiation, Phase, SessionEvent};
use crate::publisher::{Publisher, RelayWriter};
use crate::store::{AdmissionStore, RelayChannel};
use crate::subscription::RelaySubscription;
use roomcall_protocol::{Role, RoomDocument, SignalingMessage};
use roomcall_webrtc::{MediaPipeline, OnPeerEventCb, PeerEvent, PeerTransport, TransportEngine};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{Instrument, instrument};

/// A single step of releasing a session, in the order they are executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseStep {
    StopMediaSinks,
    DisposePeer,
    DisposeEngine,
    ReleaseRenderContext,
    StopRelaySubscription,
    DeleteRoomDocument,
    ReleaseWorker,
}

/// The steps actually executed while releasing a session.
///
/// Resources that were never acquired are skipped, so a session that failed halfway through
/// acquisition reports fewer steps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReleaseReport {
    pub steps: Vec<ReleaseStep>,
}

#[derive(Debug)]
enum Command {
    Start,
    Relay(RoomDocument),
    Peer(PeerEvent),
    Teardown(Option<oneshot::Sender<ReleaseReport>>),
}

/// Everything a session holds on to, released in reverse dependency order.
struct SessionResources<E: TransportEngine, M, R: ?Sized> {
    room_id: String,
    relay: Arc<R>,
    engine: Option<E>,
    peer: Option<Arc<E::Peer>>,
    media: Option<M>,
    subscription: Option<RelaySubscription>,
    writer: Option<RelayWriter>,
}

impl<E, M, R> SessionResources<E, M, R>
where
    E: TransportEngine,
    M: MediaPipeline,
    R: RelayChannel + ?Sized,
{
    fn new(room_id: &str, relay: Arc<R>) -> Self {
        Self {
            room_id: room_id.to_string(),
            relay,
            engine: None,
            peer: None,
            media: None,
            subscription: None,
            writer: None,
        }
    }

    #[instrument(level = "debug", skip_all, err)]
    async fn acquire(
        &mut self,
        engine: E,
        media: M,
        published_rx: mpsc::UnboundedReceiver<SignalingMessage>,
        commands_tx: &mpsc::UnboundedSender<Command>,
    ) -> Result<Arc<E::Peer>, SessionError> {
        self.media = Some(media);

        tracing::trace!("Initializing transport engine");
        let engine = self.engine.insert(engine);
        engine.init().await?;

        tracing::trace!("Creating peer");
        let tx = commands_tx.clone();
        let on_event: OnPeerEventCb = Arc::new(move |event: PeerEvent| {
            if tx.send(Command::Peer(event)).is_err() {
                tracing::trace!("Session worker gone, dropping peer event");
            }
        });
        let peer = Arc::new(engine.create_peer(on_event).await?);
        self.peer = Some(Arc::clone(&peer));

        tracing::trace!("Attaching local stream");
        if let Some(media) = self.media.as_mut() {
            peer.add_stream(media.local_stream()?);
        }

        tracing::trace!("Starting relay writer and subscription");
        self.writer = Some(RelayWriter::spawn(
            Arc::clone(&self.relay),
            self.room_id.clone(),
            published_rx,
        ));
        let tx = commands_tx.clone();
        self.subscription = Some(
            RelaySubscription::start(self.relay.as_ref(), &self.room_id, move |doc| {
                if tx.send(Command::Relay(doc)).is_err() {
                    tracing::trace!("Session worker gone, dropping relay document");
                }
            })
            .await?,
        );

        Ok(peer)
    }

    #[instrument(level = "debug", skip_all)]
    async fn release(&mut self) -> ReleaseReport {
        let mut report = ReleaseReport::default();

        if let Some(media) = self.media.as_mut() {
            media.stop_sinks().await;
            report.steps.push(ReleaseStep::StopMediaSinks);
        }

        if let Some(peer) = self.peer.take() {
            peer.dispose().await;
            report.steps.push(ReleaseStep::DisposePeer);
        }

        if let Some(mut engine) = self.engine.take() {
            engine.dispose().await;
            report.steps.push(ReleaseStep::DisposeEngine);
        }

        if let Some(mut media) = self.media.take() {
            media.release_render_context().await;
            report.steps.push(ReleaseStep::ReleaseRenderContext);
        }

        let subscription = self.subscription.take();
        let writer = self.writer.take();
        if subscription.is_some() || writer.is_some() {
            if let Some(subscription) = subscription {
                subscription.stop().await;
            }
            if let Some(writer) = writer {
                writer.stop().await;
            }
            report.steps.push(ReleaseStep::StopRelaySubscription);
        }

        if let Err(err) = self.relay.delete(&self.room_id).await {
            tracing::warn!(?err, "Failed to delete room document");
        }
        report.steps.push(ReleaseStep::DeleteRoomDocument);

        tracing::debug!(?report, "Released session resources");
        report
    }
}

async fn run_worker<E, M, R>(
    mut negotiation: Negotiation<Arc<E::Peer>>,
    mut resources: SessionResources<E, M, R>,
    mut commands: mpsc::UnboundedReceiver<Command>,
) where
    E: TransportEngine,
    M: MediaPipeline,
    R: RelayChannel + ?Sized,
{
    tracing::debug!("Starting session worker");

    let reply = loop {
        match commands.recv().await {
            Some(Command::Start) => negotiation.start(),
            Some(Command::Relay(doc)) => negotiation.handle_relay_document(&doc),
            Some(Command::Peer(event)) => negotiation.handle_peer_event(event),
            Some(Command::Teardown(reply)) => break reply,
            None => {
                tracing::debug!("All session handles dropped, releasing session");
                break None;
            }
        }
    };

    negotiation.begin_disposing();
    let mut report = resources.release().await;
    commands.close();
    negotiation.close();
    report.steps.push(ReleaseStep::ReleaseWorker);

    tracing::info!(steps = report.steps.len(), "Session released");
    if let Some(reply) = reply
        && reply.send(report).is_err()
    {
        tracing::debug!("Release requester gone, dropping release report");
    }
}

/// Handle to a running session.
///
/// Dropping the handle releases the session in the background, [`ActiveSession::release`] does
/// the same and waits for it to finish.
#[derive(Debug)]
pub struct ActiveSession {
    room_id: String,
    role: Role,
    commands_tx: Option<mpsc::UnboundedSender<Command>>,
    phase_rx: watch::Receiver<Phase>,
    events_tx: broadcast::Sender<SessionEvent>,
    worker: Option<JoinHandle<()>>,
}

impl ActiveSession {
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn phase(&self) -> Phase {
        *self.phase_rx.borrow()
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<Phase> {
        self.phase_rx.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events_tx.subscribe()
    }

    /// Tears the session down and waits until all of its resources are released.
    #[instrument(level = "info", skip(self), fields(room_id = %self.room_id, role = %self.role))]
    pub async fn release(mut self) -> ReleaseReport {
        let (reply_tx, reply_rx) = oneshot::channel();
        if let Some(commands_tx) = self.commands_tx.take()
            && commands_tx.send(Command::Teardown(Some(reply_tx))).is_err()
        {
            tracing::warn!("Session worker already stopped");
        }

        let report = reply_rx.await.unwrap_or_else(|_| {
            tracing::warn!("Session worker stopped without a release report");
            ReleaseReport::default()
        });

        if let Some(worker) = self.worker.take()
            && let Err(err) = worker.await
        {
            tracing::warn!(?err, "Session worker failed");
        }

        report
    }
}

impl Drop for ActiveSession {
    fn drop(&mut self) {
        if let Some(commands_tx) = self.commands_tx.take() {
            tracing::debug!(room_id = %self.room_id, "Session handle dropped, releasing session");
            commands_tx.send(Command::Teardown(None)).ok();
        }
    }
}

/// Admits participants into rooms and runs their sessions.
#[derive(Debug)]
pub struct SessionManager<S: ?Sized> {
    store: Arc<S>,
    config: SessionConfig,
}

impl<S: AdmissionStore + RelayChannel> SessionManager<S> {
    pub fn new(store: Arc<S>, config: SessionConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Joins `room_id` and starts negotiating with whoever else is in it.
    ///
    /// Acquisition order is admission, engine, peer, local stream, relay. If any step fails the
    /// steps already taken are released again before the error is returned. No phase channel
    /// outlives a failed acquisition, [`SessionError::phase`] gives the terminal phase instead.
    #[instrument(level = "info", skip(self, engine, media), err)]
    pub async fn acquire<E, M>(
        &self,
        room_id: &str,
        engine: E,
        media: M,
    ) -> Result<ActiveSession, SessionError>
    where
        E: TransportEngine,
        M: MediaPipeline,
    {
        let (phase_tx, phase_rx) = watch::channel(Phase::Idle);
        phase_tx.send_replace(Phase::Admitting);

        let controller =
            AdmissionController::new(Arc::clone(&self.store), self.config.admission.clone());
        let admission = match controller.admit(room_id).await {
            Ok(admission) => admission,
            Err(err) => {
                let err = SessionError::from(err);
                tracing::info!(phase = ?err.phase(), "Admission failed");
                return Err(err);
            }
        };
        tracing::info!(role = %admission.role, "Admitted to room");

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, _) = broadcast::channel(SESSION_EVENTS_CAPACITY);
        let (publisher, published_rx) = Publisher::channel();

        let mut resources = SessionResources::new(room_id, Arc::clone(&self.store));
        let peer = match resources
            .acquire(engine, media, published_rx, &commands_tx)
            .await
        {
            Ok(peer) => peer,
            Err(err) => {
                let report = resources.release().await;
                tracing::warn!(
                    ?err,
                    ?report,
                    "Failed to acquire session, released partial resources"
                );
                return Err(err);
            }
        };

        let negotiation = Negotiation::new(
            room_id,
            admission,
            peer,
            publisher,
            phase_tx,
            events_tx.clone(),
        );
        let worker = tokio::spawn(
            run_worker(negotiation, resources, commands_rx).instrument(tracing::Span::current()),
        );

        if commands_tx.send(Command::Start).is_err() {
            tracing::warn!("Session worker stopped before negotiation started");
        }

        Ok(ActiveSession {
            room_id: room_id.to_string(),
            role: admission.role,
            commands_tx: Some(commands_tx),
            phase_rx,
            events_tx,
            worker: Some(worker),
        })
    }

    pub async fn release(&self, session: ActiveSession) -> ReleaseReport {
        session.release().await
    }
}
