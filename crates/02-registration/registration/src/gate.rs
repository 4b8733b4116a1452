//! Subsystems the receiver forwards registrations to.
//!
//! Gates own the topic and service tables of this process. The receiver only
//! decides which method to call; an absent gate means nobody is interested.

use crate::sample::RegistrationSample;

/// Owner of this process's publishers; learns about subscribers.
pub trait PublisherGate: Send + Sync {
    fn apply_loc_sub_registration(&self, sample: &RegistrationSample);
    fn apply_loc_sub_unregistration(&self, sample: &RegistrationSample);
    fn apply_ext_sub_registration(&self, sample: &RegistrationSample);
    fn apply_ext_sub_unregistration(&self, sample: &RegistrationSample);
}

/// Owner of this process's subscribers; learns about publishers.
pub trait SubscriberGate: Send + Sync {
    fn apply_loc_pub_registration(&self, sample: &RegistrationSample);
    fn apply_loc_pub_unregistration(&self, sample: &RegistrationSample);
    fn apply_ext_pub_registration(&self, sample: &RegistrationSample);
    fn apply_ext_pub_unregistration(&self, sample: &RegistrationSample);
}

/// Owner of this process's service clients; learns about services.
pub trait ServiceClientRegistry: Send + Sync {
    fn apply_service_registration(&self, sample: &RegistrationSample);
}
