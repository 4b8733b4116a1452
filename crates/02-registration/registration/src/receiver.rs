//! Registration receiver: ingestion loops, classification and routing.
//!
//! Samples arrive from two independent loops (UDP and the local broadcast
//! domain), each running on its own thread and calling
//! [`RegistrationReceiver::apply_sample`]. Gates and callbacks live in
//! atomically swappable slots so they can be changed while samples flow.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use arc_swap::ArcSwapOption;
use crossbeam_channel::{bounded, select, tick, Receiver, Sender, TryRecvError};
use log::{debug, warn};
use parking_lot::Mutex;
use transport::{BroadcastDomain, ProcessIdentity};

use crate::callback::{ApplySampleCallback, CallbackSlots, RegistrationCallback, RegistrationEvent};
use crate::codec::encode_sample;
use crate::compat::normalize;
use crate::config::Config;
use crate::gate::{PublisherGate, ServiceClientRegistry, SubscriberGate};
use crate::local::RegistrationTransportLocal;
use crate::network::{NetworkAttr, RegistrationTransportNetwork, RECEIVE_POLL};
use crate::sample::{Command, RegistrationSample, TopicInfo};
use crate::{RegistrationError, RegistrationResult};

type GateSlot<T> = ArcSwapOption<Arc<T>>;

/// Where a topic registration is delivered.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Locality {
    /// Same host: the gate's `loc` methods.
    Local,
    /// Another host: the gate's `ext` methods.
    External,
}

/// Assembles a [`RegistrationReceiver`].
#[derive(Default)]
pub struct RegistrationReceiverBuilder {
    identity: Option<ProcessIdentity>,
    config: Option<Config>,
    publisher_gate: Option<Arc<dyn PublisherGate>>,
    subscriber_gate: Option<Arc<dyn SubscriberGate>>,
    service_registry: Option<Arc<dyn ServiceClientRegistry>>,
}

impl RegistrationReceiverBuilder {
    /// Identity used for locality and loop-back decisions. Defaults to this process.
    pub fn identity(mut self, identity: ProcessIdentity) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    pub fn publisher_gate(mut self, gate: Arc<dyn PublisherGate>) -> Self {
        self.publisher_gate = Some(gate);
        self
    }

    pub fn subscriber_gate(mut self, gate: Arc<dyn SubscriberGate>) -> Self {
        self.subscriber_gate = Some(gate);
        self
    }

    pub fn service_registry(mut self, registry: Arc<dyn ServiceClientRegistry>) -> Self {
        self.service_registry = Some(registry);
        self
    }

    pub fn build(self) -> RegistrationReceiver {
        let config = self.config.unwrap_or_default();
        let shared = Shared {
            identity: self.identity.unwrap_or_else(ProcessIdentity::current),
            network: AtomicBool::new(config.network_enabled),
            loopback: AtomicBool::new(config.loopback),
            config,
            created: AtomicBool::new(false),
            callbacks: CallbackSlots::new(),
            publisher_gate: ArcSwapOption::new(self.publisher_gate.map(Arc::new)),
            subscriber_gate: ArcSwapOption::new(self.subscriber_gate.map(Arc::new)),
            service_registry: ArcSwapOption::new(self.service_registry.map(Arc::new)),
        };
        RegistrationReceiver {
            shared: Arc::new(shared),
            loops: Mutex::new(None),
        }
    }
}

struct Shared {
    identity: ProcessIdentity,
    config: Config,
    created: AtomicBool,
    network: AtomicBool,
    loopback: AtomicBool,
    callbacks: CallbackSlots,
    publisher_gate: GateSlot<dyn PublisherGate>,
    subscriber_gate: GateSlot<dyn SubscriberGate>,
    service_registry: GateSlot<dyn ServiceClientRegistry>,
}

impl Shared {
    fn apply_sample(&self, sample: &RegistrationSample) -> RegistrationResult<()> {
        if !self.created.load(Ordering::Acquire) {
            return Err(RegistrationError::NotCreated);
        }

        let sample = normalize(sample);
        self.callbacks.observe(&sample);

        // Encoding is skipped unless somebody will read the bytes.
        let encoded = if self.callbacks.any() {
            match encode_sample(&sample) {
                Ok(bytes) => Some(bytes),
                Err(err) => {
                    debug!("registration callbacks skipped: {err}");
                    None
                }
            }
        } else {
            None
        };
        let notify = |event| {
            if let Some(bytes) = &encoded {
                self.callbacks.notify(event, bytes);
            }
        };

        match sample.command() {
            Command::None | Command::SetSample => {}
            Command::RegisterProcess | Command::UnregisterProcess => {
                notify(RegistrationEvent::Process);
            }
            Command::RegisterService => {
                if let Some(registry) = self.service_registry.load_full() {
                    registry.apply_service_registration(&sample);
                }
                notify(RegistrationEvent::Service);
            }
            Command::UnregisterService => notify(RegistrationEvent::Service),
            Command::RegisterClient | Command::UnregisterClient => {
                notify(RegistrationEvent::Client);
            }
            Command::RegisterSubscriber | Command::UnregisterSubscriber => {
                self.apply_subscriber_registration(&sample);
                notify(RegistrationEvent::Subscriber);
            }
            Command::RegisterPublisher | Command::UnregisterPublisher => {
                self.apply_publisher_registration(&sample);
                notify(RegistrationEvent::Publisher);
            }
            Command::Unknown(raw) => debug!("ignoring registration sample with command {raw}"),
        }
        Ok(())
    }

    fn locality(&self, topic: &TopicInfo) -> Option<Locality> {
        if self.identity.same_host(&topic.origin()) {
            let foreign = topic.process_id != self.identity.process_id;
            (self.loopback.load(Ordering::Relaxed) || foreign).then_some(Locality::Local)
        } else {
            self.network.load(Ordering::Relaxed).then_some(Locality::External)
        }
    }

    /// Subscriber news goes to the publisher gate.
    fn apply_subscriber_registration(&self, sample: &RegistrationSample) {
        let Some(locality) = self.locality(&sample.topic) else {
            return;
        };
        let Some(gate) = self.publisher_gate.load_full() else {
            return;
        };
        match (locality, sample.command()) {
            (Locality::Local, Command::RegisterSubscriber) => gate.apply_loc_sub_registration(sample),
            (Locality::Local, Command::UnregisterSubscriber) => {
                gate.apply_loc_sub_unregistration(sample)
            }
            (Locality::External, Command::RegisterSubscriber) => {
                gate.apply_ext_sub_registration(sample)
            }
            (Locality::External, Command::UnregisterSubscriber) => {
                gate.apply_ext_sub_unregistration(sample)
            }
            _ => {}
        }
    }

    /// Publisher news goes to the subscriber gate.
    fn apply_publisher_registration(&self, sample: &RegistrationSample) {
        let Some(locality) = self.locality(&sample.topic) else {
            return;
        };
        let Some(gate) = self.subscriber_gate.load_full() else {
            return;
        };
        match (locality, sample.command()) {
            (Locality::Local, Command::RegisterPublisher) => gate.apply_loc_pub_registration(sample),
            (Locality::Local, Command::UnregisterPublisher) => {
                gate.apply_loc_pub_unregistration(sample)
            }
            (Locality::External, Command::RegisterPublisher) => {
                gate.apply_ext_pub_registration(sample)
            }
            (Locality::External, Command::UnregisterPublisher) => {
                gate.apply_ext_pub_unregistration(sample)
            }
            _ => {}
        }
    }
}

fn open_network(
    config: &Config,
) -> RegistrationResult<(RegistrationTransportNetwork, SocketAddr)> {
    let transport = RegistrationTransportNetwork::create(&NetworkAttr::from_config(config))?;
    let addr = transport.local_addr()?;
    Ok((transport, addr))
}

fn open_local(config: &Config) -> RegistrationResult<(BroadcastDomain, RegistrationTransportLocal)> {
    let shm = &config.shm_monitoring;
    let domain = BroadcastDomain::open_or_create(
        &config.channel.shm_dir(),
        &shm.domain,
        shm.queue_size,
        shm.message_size,
        config.channel.channel_attr().open_timeout,
    )?;
    let local = RegistrationTransportLocal::bind(&domain)?;
    Ok((domain, local))
}

/// Background ingestion started by `create`.
struct Loops {
    // Dropping the sender disconnects the channel, which stops both loops.
    stop: Sender<()>,
    handles: Vec<JoinHandle<()>>,
    network_addr: Option<SocketAddr>,
    domain: Option<BroadcastDomain>,
}

/// Receives registration samples and routes them to gates and observers.
pub struct RegistrationReceiver {
    shared: Arc<Shared>,
    loops: Mutex<Option<Loops>>,
}

impl RegistrationReceiver {
    pub fn builder() -> RegistrationReceiverBuilder {
        RegistrationReceiverBuilder::default()
    }

    /// Starts the ingestion loops enabled by the configuration. Idempotent.
    pub fn create(&self) -> RegistrationResult<()> {
        let mut loops = self.loops.lock();
        if loops.is_some() {
            return Ok(());
        }
        let config = &self.shared.config;

        // Each transport starts on its own; one that fails is skipped.
        let network = if config.network_monitoring() {
            open_network(config)
                .map_err(|err| warn!("network registration disabled: {err}"))
                .ok()
        } else {
            None
        };
        let (network, network_addr) = network.unzip();

        let (domain, local) = if config.shm_monitoring.enabled {
            match open_local(config) {
                Ok((domain, local)) => (Some(domain), Some(local)),
                Err(err) => {
                    warn!("local registration disabled: {err}");
                    (None, None)
                }
            }
        } else {
            (None, None)
        };

        let (stop, stopped) = bounded::<()>(0);
        self.shared.created.store(true, Ordering::Release);

        let mut handles = Vec::with_capacity(2);
        let spawned = network
            .map(|transport| self.spawn_network_loop(transport, stopped.clone()))
            .into_iter()
            .chain(local.map(|transport| self.spawn_local_loop(transport, stopped.clone())))
            .try_for_each(|handle| handle.map(|handle| handles.push(handle)));
        if let Err(err) = spawned {
            self.shared.created.store(false, Ordering::Release);
            drop(stop);
            join_all(handles);
            return Err(err);
        }

        debug!(
            "registration receiver created for {} (network loop: {}, local loop: {})",
            self.shared.identity,
            network_addr.is_some(),
            domain.is_some()
        );
        *loops = Some(Loops {
            stop,
            handles,
            network_addr,
            domain,
        });
        Ok(())
    }

    fn spawn_network_loop(
        &self,
        mut transport: RegistrationTransportNetwork,
        stopped: Receiver<()>,
    ) -> RegistrationResult<JoinHandle<()>> {
        let shared = Arc::clone(&self.shared);
        thread::Builder::new()
            .name("registration-udp".to_string())
            .spawn(move || loop {
                match stopped.try_recv() {
                    Err(TryRecvError::Empty) => {}
                    Ok(()) | Err(TryRecvError::Disconnected) => break,
                }
                match transport.receive() {
                    Ok(Some(sample)) => {
                        if let Err(err) = shared.apply_sample(&sample) {
                            debug!("registration sample not applied: {err}");
                        }
                    }
                    Ok(None) => {}
                    Err(RegistrationError::Decode(err)) => {
                        debug!("dropping registration datagram: {err}");
                    }
                    Err(err) => {
                        warn!("registration receive failed: {err}");
                        select! {
                            recv(stopped) -> _ => break,
                            default(RECEIVE_POLL) => {}
                        }
                    }
                }
            })
            .map_err(|err| RegistrationError::io("spawn registration-udp", err))
    }

    fn spawn_local_loop(
        &self,
        mut transport: RegistrationTransportLocal,
        stopped: Receiver<()>,
    ) -> RegistrationResult<JoinHandle<()>> {
        let shared = Arc::clone(&self.shared);
        let ticker = tick(self.shared.config.local_poll_period());
        thread::Builder::new()
            .name("registration-shm".to_string())
            .spawn(move || loop {
                select! {
                    recv(stopped) -> _ => break,
                    recv(ticker) -> _ => {
                        let polled = transport.receive(|sample| shared.apply_sample(sample));
                        if let Err(err) = polled {
                            debug!("local registration poll failed: {err}");
                        }
                    }
                }
            })
            .map_err(|err| RegistrationError::io("spawn registration-shm", err))
    }

    /// Stops and joins the loops, releases the broadcast reader and clears
    /// the registration callbacks. Idempotent.
    pub fn destroy(&self) {
        let Some(loops) = self.loops.lock().take() else {
            return;
        };
        self.shared.created.store(false, Ordering::Release);

        let Loops {
            stop,
            handles,
            domain,
            ..
        } = loops;
        drop(stop);
        join_all(handles);
        drop(domain);

        self.shared.callbacks.clear_all();
        debug!("registration receiver destroyed for {}", self.shared.identity);
    }

    pub fn is_created(&self) -> bool {
        self.shared.created.load(Ordering::Acquire)
    }

    pub fn identity(&self) -> &ProcessIdentity {
        &self.shared.identity
    }

    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    /// Address of the UDP socket, while the network loop runs.
    pub fn network_addr(&self) -> Option<SocketAddr> {
        self.loops.lock().as_ref().and_then(|loops| loops.network_addr)
    }

    /// Applies one sample as if it had been received.
    pub fn apply_sample(&self, sample: &RegistrationSample) -> RegistrationResult<()> {
        self.shared.apply_sample(sample)
    }

    /// Lets registrations from this very process reach the local gates.
    pub fn enable_loopback(&self, enabled: bool) {
        self.shared.loopback.store(enabled, Ordering::Relaxed);
    }

    pub fn is_loopback_enabled(&self) -> bool {
        self.shared.loopback.load(Ordering::Relaxed)
    }

    pub fn is_network_enabled(&self) -> bool {
        self.shared.network.load(Ordering::Relaxed)
    }

    /// Locality decision for `topic` under the current flags.
    pub fn locality(&self, topic: &TopicInfo) -> Option<Locality> {
        self.shared.locality(topic)
    }

    pub fn add_registration_callback(
        &self,
        event: RegistrationEvent,
        callback: RegistrationCallback,
    ) -> RegistrationResult<()> {
        if !self.is_created() {
            return Err(RegistrationError::NotCreated);
        }
        self.shared.callbacks.set(event, callback);
        Ok(())
    }

    pub fn rem_registration_callback(&self, event: RegistrationEvent) -> RegistrationResult<()> {
        if !self.is_created() {
            return Err(RegistrationError::NotCreated);
        }
        self.shared.callbacks.clear(event);
        Ok(())
    }

    pub fn set_custom_apply_sample_callback(&self, callback: ApplySampleCallback) {
        self.shared.callbacks.set_custom(callback);
    }

    pub fn rem_custom_apply_sample_callback(&self) {
        self.shared.callbacks.reset_custom();
    }

    pub fn set_publisher_gate(&self, gate: Option<Arc<dyn PublisherGate>>) {
        self.shared.publisher_gate.store(gate.map(Arc::new));
    }

    pub fn set_subscriber_gate(&self, gate: Option<Arc<dyn SubscriberGate>>) {
        self.shared.subscriber_gate.store(gate.map(Arc::new));
    }

    pub fn set_service_registry(&self, registry: Option<Arc<dyn ServiceClientRegistry>>) {
        self.shared.service_registry.store(registry.map(Arc::new));
    }
}

impl Drop for RegistrationReceiver {
    fn drop(&mut self) {
        self.destroy();
    }
}

fn join_all(handles: Vec<JoinHandle<()>>) {
    for handle in handles {
        if handle.join().is_err() {
            warn!("registration loop panicked");
        }
    }
}
