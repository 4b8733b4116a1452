//! Publisher and subscriber meeting through registration, then exchanging
//! payloads over a memory channel.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use registration::{
    Command, Config, RegistrationReceiver, RegistrationSample, SubscriberGate, TopicInfo,
};
use transport::{
    ChannelAttr, ChannelReader, MemoryChannel, ProcessIdentity, WriteAttr, WriteOutcome,
};

use crate::support::{eventually, init_logging, scratch_dir, RecordingGates};

const HOST: &str = "node-a";
const PUBLISHER_PID: i32 = 10;
const SUBSCRIBER_PID: i32 = 20;

fn announce(channel: &MemoryChannel) -> RegistrationSample {
    RegistrationSample::for_topic(
        Command::RegisterPublisher,
        TopicInfo {
            host_name: HOST.to_string(),
            process_id: PUBLISHER_PID,
            topic_id: channel.instance_name().expect("channel created"),
            entity_name: channel.base_name().to_string(),
            type_encoding: "raw".to_string(),
            type_name: "bytes".to_string(),
            topic_size: channel.capacity() as u64,
            ..TopicInfo::default()
        },
    )
}

fn subscriber_side() -> (RegistrationReceiver, Arc<RecordingGates>) {
    let gates = Arc::new(RecordingGates::default());
    let receiver = RegistrationReceiver::builder()
        .identity(ProcessIdentity::new(HOST, SUBSCRIBER_PID))
        .config(Config {
            network_monitoring_disabled: true,
            ..Config::default()
        })
        .subscriber_gate(Arc::clone(&gates) as Arc<dyn SubscriberGate>)
        .build();
    receiver.create().expect("create receiver");
    (receiver, gates)
}

fn latest_instance(gates: &RecordingGates) -> String {
    let calls = gates.calls.lock();
    let (name, sample) = calls.last().expect("publisher announced");
    assert_eq!(*name, "loc_pub_reg");
    sample.topic.topic_id.clone()
}

#[test]
fn acknowledged_stream_and_growth() {
    init_logging();
    let attr = ChannelAttr {
        min_size: 512,
        open_timeout: Duration::from_millis(200),
        shm_dir: scratch_dir("stream"),
        ..ChannelAttr::default()
    };
    let dir = attr.shm_dir.clone();
    let channel = MemoryChannel::new("telemetry", 0, attr).expect("channel");
    let subscriber = ProcessIdentity::new(HOST, SUBSCRIBER_PID);
    channel.connect(&subscriber).expect("connect subscriber");

    let (receiver, gates) = subscriber_side();
    receiver.apply_sample(&announce(&channel)).expect("announce");
    let instance = latest_instance(&gates);

    const MESSAGES: u64 = 20;
    let reader = {
        let dir = dir.clone();
        let subscriber = subscriber.clone();
        thread::spawn(move || {
            let reader = ChannelReader::open(&dir, &instance, subscriber, Duration::from_millis(200))
                .expect("open reader");
            let mut ids = Vec::new();
            while ids.len() < MESSAGES as usize {
                if let Some(sample) = reader.receive(Duration::from_secs(2)).expect("receive") {
                    assert_eq!(sample.payload.len(), sample.header.data_size as usize);
                    assert_eq!(sample.payload, sample.header.id.to_le_bytes().repeat(4));
                    ids.push(sample.header.id);
                } else {
                    break;
                }
            }
            ids
        })
    };

    for id in 0..MESSAGES {
        let attr = WriteAttr {
            id,
            clock: id,
            ack_timeout_ms: 1000,
            ..WriteAttr::default()
        };
        let outcome = channel
            .write(&id.to_le_bytes().repeat(4), &attr)
            .expect("write");
        assert_eq!(outcome, WriteOutcome::Written);
        assert!(channel.ack_is_valid(&subscriber), "message {id} was acknowledged");
    }
    assert_eq!(reader.join().expect("reader thread"), (0..MESSAGES).collect::<Vec<_>>());

    // Growth moves the channel to a new instance; the publisher re-announces.
    let big = vec![0x5a; 4096];
    let outcome = channel.write(&big, &WriteAttr::default()).expect("grow");
    assert_eq!(outcome, WriteOutcome::Recreated);
    receiver.apply_sample(&announce(&channel)).expect("re-announce");
    assert!(eventually(Duration::from_secs(1), || gates.calls.lock().len() == 2));

    let moved = latest_instance(&gates);
    assert_eq!(Some(moved.clone()), channel.instance_name());
    let reader = ChannelReader::open(&dir, &moved, subscriber.clone(), Duration::from_millis(200))
        .expect("reopen on new instance");
    let sample = reader
        .receive(Duration::from_millis(500))
        .expect("receive")
        .expect("signal carried over to the new instance");
    assert_eq!(sample.payload, big);

    channel.destroy().expect("destroy");
    receiver.destroy();
}
