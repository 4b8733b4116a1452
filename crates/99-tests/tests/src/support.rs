use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use registration::{PublisherGate, RegistrationSample, SubscriberGate};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn scratch_dir(tag: &str) -> PathBuf {
    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    let dir = std::env::temp_dir().join(format!(
        "e2e-{tag}-{}-{}",
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::Relaxed)
    ));
    std::fs::create_dir_all(&dir).expect("create scratch dir");
    dir
}

/// Polls `done` every few milliseconds until it holds or `timeout` passes.
pub fn eventually(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    done()
}

/// Gate that records every sample it is handed, tagged by method.
#[derive(Default)]
pub struct RecordingGates {
    pub calls: Mutex<Vec<(&'static str, RegistrationSample)>>,
}

impl RecordingGates {
    pub fn names(&self) -> Vec<&'static str> {
        self.calls.lock().iter().map(|(name, _)| *name).collect()
    }

    fn record(&self, name: &'static str, sample: &RegistrationSample) {
        self.calls.lock().push((name, sample.clone()));
    }
}

impl PublisherGate for RecordingGates {
    fn apply_loc_sub_registration(&self, sample: &RegistrationSample) {
        self.record("loc_sub_reg", sample);
    }
    fn apply_loc_sub_unregistration(&self, sample: &RegistrationSample) {
        self.record("loc_sub_unreg", sample);
    }
    fn apply_ext_sub_registration(&self, sample: &RegistrationSample) {
        self.record("ext_sub_reg", sample);
    }
    fn apply_ext_sub_unregistration(&self, sample: &RegistrationSample) {
        self.record("ext_sub_unreg", sample);
    }
}

impl SubscriberGate for RecordingGates {
    fn apply_loc_pub_registration(&self, sample: &RegistrationSample) {
        self.record("loc_pub_reg", sample);
    }
    fn apply_loc_pub_unregistration(&self, sample: &RegistrationSample) {
        self.record("loc_pub_unreg", sample);
    }
    fn apply_ext_pub_registration(&self, sample: &RegistrationSample) {
        self.record("ext_pub_reg", sample);
    }
    fn apply_ext_pub_unregistration(&self, sample: &RegistrationSample) {
        self.record("ext_pub_unreg", sample);
    }
}
