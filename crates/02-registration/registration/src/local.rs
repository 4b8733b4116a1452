//! Host-local ingestion of sample batches from the broadcast domain.

use log::{debug, trace};
use transport::{BroadcastDomain, BroadcastReader};

use crate::codec::{decode_batch, decode_sample};
use crate::sample::RegistrationSample;
use crate::{RegistrationError, RegistrationResult};

/// Drains the broadcast domain and hands every decoded sample to a sink.
pub struct RegistrationTransportLocal {
    reader: BroadcastReader,
}

impl RegistrationTransportLocal {
    /// Binds at the current end of the queue, so older traffic is skipped.
    pub fn bind(domain: &BroadcastDomain) -> RegistrationResult<Self> {
        Ok(Self {
            reader: domain.bind_reader()?,
        })
    }

    /// Decodes every pending batch and passes each sample to `apply`.
    ///
    /// Returns the number of applied samples. When any batch or element
    /// failed to decode, or `apply` rejected a sample, the remaining samples
    /// are still applied and [`RegistrationError::MalformedBatch`] reports
    /// both counts.
    pub fn receive(
        &mut self,
        mut apply: impl FnMut(&RegistrationSample) -> RegistrationResult<()>,
    ) -> RegistrationResult<usize> {
        let messages = self.reader.read()?;
        let mut applied = 0;
        let mut rejected = 0;

        for message in &messages {
            let batch = match decode_batch(message) {
                Ok(batch) => batch,
                Err(err) => {
                    debug!("dropping registration batch: {err}");
                    rejected += 1;
                    continue;
                }
            };
            for element in &batch.samples {
                match decode_sample(element) {
                    Ok(sample) => match apply(&sample) {
                        Ok(()) => applied += 1,
                        Err(err) => {
                            debug!("registration sample not applied: {err}");
                            rejected += 1;
                        }
                    },
                    Err(err) => {
                        debug!("dropping registration sample: {err}");
                        rejected += 1;
                    }
                }
            }
        }

        trace!("local registration poll: {applied} applied, {rejected} rejected");
        if rejected > 0 {
            return Err(RegistrationError::MalformedBatch { applied, rejected });
        }
        Ok(applied)
    }
}
