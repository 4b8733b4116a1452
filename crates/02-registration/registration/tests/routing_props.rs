//! Property coverage for locality and loop-back routing of topic registrations.

use std::sync::Arc;

use parking_lot::Mutex;
use proptest::prelude::*;
use registration::{
    Command, Config, PublisherGate, RegistrationReceiver, RegistrationSample, SubscriberGate,
    TopicInfo,
};
use transport::ProcessIdentity;

const HOST: &str = "node-a";
const PID: i32 = 4242;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Call {
    LocSub(bool),
    ExtSub(bool),
    LocPub(bool),
    ExtPub(bool),
}

#[derive(Default)]
struct Gates {
    calls: Mutex<Vec<Call>>,
}

impl PublisherGate for Gates {
    fn apply_loc_sub_registration(&self, _: &RegistrationSample) {
        self.calls.lock().push(Call::LocSub(true));
    }
    fn apply_loc_sub_unregistration(&self, _: &RegistrationSample) {
        self.calls.lock().push(Call::LocSub(false));
    }
    fn apply_ext_sub_registration(&self, _: &RegistrationSample) {
        self.calls.lock().push(Call::ExtSub(true));
    }
    fn apply_ext_sub_unregistration(&self, _: &RegistrationSample) {
        self.calls.lock().push(Call::ExtSub(false));
    }
}

impl SubscriberGate for Gates {
    fn apply_loc_pub_registration(&self, _: &RegistrationSample) {
        self.calls.lock().push(Call::LocPub(true));
    }
    fn apply_loc_pub_unregistration(&self, _: &RegistrationSample) {
        self.calls.lock().push(Call::LocPub(false));
    }
    fn apply_ext_pub_registration(&self, _: &RegistrationSample) {
        self.calls.lock().push(Call::ExtPub(true));
    }
    fn apply_ext_pub_unregistration(&self, _: &RegistrationSample) {
        self.calls.lock().push(Call::ExtPub(false));
    }
}

fn receiver(network_enabled: bool, loopback: bool) -> (RegistrationReceiver, Arc<Gates>) {
    let gates = Arc::new(Gates::default());
    let receiver = RegistrationReceiver::builder()
        .identity(ProcessIdentity::new(HOST, PID))
        .config(Config {
            network_enabled,
            loopback,
            network_monitoring_disabled: true,
            ..Config::default()
        })
        .publisher_gate(Arc::clone(&gates) as Arc<dyn PublisherGate>)
        .subscriber_gate(Arc::clone(&gates) as Arc<dyn SubscriberGate>)
        .build();
    receiver.create().expect("create receiver");
    (receiver, gates)
}

fn sample(command: Command, host: &str, pid: i32) -> RegistrationSample {
    RegistrationSample::for_topic(
        command,
        TopicInfo {
            host_name: host.to_string(),
            process_id: pid,
            entity_name: "topic".to_string(),
            ..TopicInfo::default()
        },
    )
}

fn arb_topic_command() -> impl Strategy<Value = Command> {
    prop_oneof![
        Just(Command::RegisterPublisher),
        Just(Command::UnregisterPublisher),
        Just(Command::RegisterSubscriber),
        Just(Command::UnregisterSubscriber),
    ]
}

fn expected_call(command: Command, local: bool) -> Call {
    match (command, local) {
        (Command::RegisterSubscriber, true) => Call::LocSub(true),
        (Command::UnregisterSubscriber, true) => Call::LocSub(false),
        (Command::RegisterSubscriber, false) => Call::ExtSub(true),
        (Command::UnregisterSubscriber, false) => Call::ExtSub(false),
        (Command::RegisterPublisher, true) => Call::LocPub(true),
        (Command::UnregisterPublisher, true) => Call::LocPub(false),
        (Command::RegisterPublisher, false) => Call::ExtPub(true),
        (Command::UnregisterPublisher, false) => Call::ExtPub(false),
        (other, _) => panic!("not a topic command: {other:?}"),
    }
}

/// Registering a subscriber from this very process reaches the publisher gate
/// exactly when loop-back is on.
#[test]
fn own_subscriber_follows_loopback() {
    let (receiver, gates) = receiver(false, false);
    receiver
        .apply_sample(&sample(Command::RegisterSubscriber, HOST, PID))
        .expect("apply");
    assert!(gates.calls.lock().is_empty(), "loop-back off drops own samples");

    receiver.enable_loopback(true);
    receiver
        .apply_sample(&sample(Command::RegisterSubscriber, HOST, PID))
        .expect("apply");
    assert_eq!(*gates.calls.lock(), vec![Call::LocSub(true)]);
}

/// A publisher on another host reaches `apply_ext_pub_registration` only in network mode.
#[test]
fn foreign_publisher_follows_network_mode() {
    for network in [false, true] {
        let (receiver, gates) = receiver(network, false);
        receiver
            .apply_sample(&sample(Command::RegisterPublisher, "node-b", 1))
            .expect("apply");
        let expected = if network { vec![Call::ExtPub(true)] } else { vec![] };
        assert_eq!(*gates.calls.lock(), expected, "network_enabled = {network}");
    }
}

proptest! {
    #[test]
    fn routing_matches_locality_policy(
        command in arb_topic_command(),
        same_host in any::<bool>(),
        same_pid in any::<bool>(),
        empty_host in any::<bool>(),
        network in any::<bool>(),
        loopback in any::<bool>(),
    ) {
        let (receiver, gates) = receiver(network, loopback);
        let host = match (empty_host, same_host) {
            (true, _) => "",
            (false, true) => HOST,
            (false, false) => "node-z",
        };
        let pid = if same_pid { PID } else { PID + 1 };
        receiver.apply_sample(&sample(command, host, pid)).expect("apply");

        let local = !empty_host && same_host;
        let delivered = if local { loopback || !same_pid } else { network };
        let expected = if delivered { vec![expected_call(command, local)] } else { vec![] };
        prop_assert_eq!(gates.calls.lock().clone(), expected);
    }
}
