//! Registration samples travelling through the real ingestion loops.

use std::net::{Ipv4Addr, UdpSocket};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use registration::codec::{encode_batch, encode_sample, encode_sample_batch};
use registration::{
    Command, Config, PublisherGate, RegistrationEvent, RegistrationReceiver, RegistrationSample,
    SampleBatch, ShmMonitoringConfig, SubscriberGate, TopicInfo,
};
use transport::{BroadcastDomain, ProcessIdentity};

use crate::support::{eventually, init_logging, scratch_dir, RecordingGates};

const HOST: &str = "node-a";
const PID: i32 = 31;
const WAIT: Duration = Duration::from_secs(3);

fn topic(command: Command, host: &str, pid: i32, name: &str) -> RegistrationSample {
    RegistrationSample::for_topic(
        command,
        TopicInfo {
            host_name: host.to_string(),
            process_id: pid,
            entity_name: name.to_string(),
            ..TopicInfo::default()
        },
    )
}

fn shm_config(tag: &str) -> Config {
    let mut config = Config {
        network_monitoring_disabled: true,
        registration_refresh_ms: 20,
        shm_monitoring: ShmMonitoringConfig {
            enabled: true,
            domain: format!("reg-{tag}"),
            queue_size: 16,
            message_size: 16 * 1024,
        },
        ..Config::default()
    };
    config.channel.shm_dir = Some(scratch_dir(tag));
    config
}

fn receiver_with_gates(config: Config) -> (RegistrationReceiver, Arc<RecordingGates>) {
    let gates = Arc::new(RecordingGates::default());
    let receiver = RegistrationReceiver::builder()
        .identity(ProcessIdentity::new(HOST, PID))
        .config(config)
        .publisher_gate(Arc::clone(&gates) as Arc<dyn PublisherGate>)
        .subscriber_gate(Arc::clone(&gates) as Arc<dyn SubscriberGate>)
        .build();
    receiver.create().expect("create receiver");
    (receiver, gates)
}

fn peer_domain(config: &Config) -> BroadcastDomain {
    let shm = &config.shm_monitoring;
    BroadcastDomain::open_or_create(
        &config.channel.shm_dir(),
        &shm.domain,
        shm.queue_size,
        shm.message_size,
        Duration::from_millis(100),
    )
    .expect("peer joins the domain")
}

#[test]
fn local_batches_reach_the_gates() {
    init_logging();
    let config = shm_config("local-batch");
    let (receiver, gates) = receiver_with_gates(config.clone());
    let domain = peer_domain(&config);

    let batch = encode_batch(&[
        topic(Command::RegisterPublisher, HOST, 77, "camera"),
        topic(Command::RegisterSubscriber, HOST, 78, "camera"),
        topic(Command::RegisterSubscriber, HOST, PID, "own"),
    ])
    .expect("encode batch");
    domain.writer().write(&batch).expect("publish batch");

    assert!(
        eventually(WAIT, || gates.calls.lock().len() >= 2),
        "batch was not applied"
    );
    let mut names = gates.names();
    names.sort();
    assert_eq!(names, vec!["loc_pub_reg", "loc_sub_reg"], "own subscriber is filtered");

    receiver.destroy();
    domain.unlink().expect("unlink domain");
}

#[test]
fn failed_network_endpoint_leaves_the_local_loop_running() {
    init_logging();
    let mut config = shm_config("no-network");
    config.network_enabled = true;
    config.network_monitoring_disabled = false;
    // Not a multicast address, so joining the group fails.
    config.multicast.group = Ipv4Addr::new(10, 1, 2, 3);
    config.multicast.port = 0;
    let (receiver, gates) = receiver_with_gates(config.clone());
    assert!(receiver.is_created());
    assert!(receiver.network_addr().is_none());

    let domain = peer_domain(&config);
    let batch = encode_batch(&[topic(Command::RegisterPublisher, HOST, 77, "camera")])
        .expect("encode batch");
    domain.writer().write(&batch).expect("publish batch");
    assert!(eventually(WAIT, || gates.names() == vec!["loc_pub_reg"]));

    receiver
        .add_registration_callback(RegistrationEvent::Publisher, Box::new(|_| {}))
        .expect("callbacks accepted");
    receiver
        .apply_sample(&topic(Command::RegisterPublisher, HOST, 78, "lidar"))
        .expect("direct apply");

    receiver.destroy();
    domain.unlink().expect("unlink domain");
}

#[test]
fn unparseable_element_does_not_block_its_neighbours() {
    init_logging();
    let config = shm_config("bad-element");
    let (receiver, gates) = receiver_with_gates(config.clone());
    let domain = peer_domain(&config);

    let good = |name: &str| {
        encode_sample(&topic(Command::RegisterPublisher, HOST, 90, name)).expect("encode")
    };
    let batch = SampleBatch {
        samples: vec![good("first"), b"not a sample".to_vec(), good("second")],
    };
    let bytes = encode_sample_batch(&batch).expect("encode batch");
    domain.writer().write(&bytes).expect("publish");
    domain.writer().write(b"garbage batch").expect("publish garbage");

    assert!(eventually(WAIT, || gates.calls.lock().len() >= 2));
    let names: Vec<String> = gates
        .calls
        .lock()
        .iter()
        .map(|(_, sample)| sample.topic.entity_name.clone())
        .collect();
    assert_eq!(names, vec!["first".to_string(), "second".to_string()]);

    // The loop keeps running after the failed cycle.
    let later = encode_batch(&[topic(Command::UnregisterPublisher, HOST, 90, "first")])
        .expect("encode");
    domain.writer().write(&later).expect("publish");
    assert!(eventually(WAIT, || gates.calls.lock().len() == 3));

    receiver.destroy();
    domain.unlink().expect("unlink domain");
}

#[test]
fn udp_datagrams_are_applied_and_observed() {
    init_logging();
    let mut config = Config {
        network_enabled: false,
        ..Config::default()
    };
    config.multicast.port = 0;
    let (receiver, gates) = receiver_with_gates(config);
    let port = receiver.network_addr().expect("network loop running").port();

    let processes = Arc::new(Mutex::new(0usize));
    let counter = Arc::clone(&processes);
    receiver
        .add_registration_callback(
            RegistrationEvent::Process,
            Box::new(move |_| *counter.lock() += 1),
        )
        .expect("add callback");

    let sender = UdpSocket::bind("127.0.0.1:0").expect("sender socket");
    let send = |sample: &RegistrationSample| {
        sender
            .send_to(&encode_sample(sample).expect("encode"), ("127.0.0.1", port))
            .expect("send datagram");
    };
    send(&RegistrationSample::new(Command::RegisterProcess));
    send(&topic(Command::RegisterSubscriber, HOST, 5, "imu"));
    send(&topic(Command::RegisterSubscriber, "node-far", 5, "imu"));
    sender
        .send_to(b"\x01\x02", ("127.0.0.1", port))
        .expect("send junk");

    assert!(eventually(WAIT, || *processes.lock() == 1));
    assert!(eventually(WAIT, || gates.names() == vec!["loc_sub_reg"]));

    receiver.destroy();
    assert!(receiver.network_addr().is_none());
}
