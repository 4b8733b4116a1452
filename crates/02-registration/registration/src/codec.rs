//! rkyv encoding of samples and batches.
//!
//! Incoming bytes come straight off a socket or a broadcast slot with no
//! alignment guarantee, so they are copied into an aligned buffer before the
//! archive is validated.

use rkyv::{rancor::Error, util::AlignedVec};

use crate::sample::{RegistrationSample, SampleBatch};
use crate::{RegistrationError, RegistrationResult};

const ARCHIVE_ALIGN: usize = 16;

pub fn encode_sample(sample: &RegistrationSample) -> RegistrationResult<Vec<u8>> {
    rkyv::to_bytes::<Error>(sample)
        .map(|aligned| aligned.into_vec())
        .map_err(|err| RegistrationError::Encode(err.to_string()))
}

pub fn decode_sample(bytes: &[u8]) -> RegistrationResult<RegistrationSample> {
    let aligned = realign(bytes);
    rkyv::from_bytes::<RegistrationSample, Error>(&aligned)
        .map_err(|err| RegistrationError::Decode(err.to_string()))
}

/// Encodes every sample separately and wraps them into one batch.
pub fn encode_batch(samples: &[RegistrationSample]) -> RegistrationResult<Vec<u8>> {
    let batch = SampleBatch {
        samples: samples
            .iter()
            .map(encode_sample)
            .collect::<RegistrationResult<_>>()?,
    };
    encode_sample_batch(&batch)
}

/// Encodes an already assembled batch; its elements are shipped as they are.
pub fn encode_sample_batch(batch: &SampleBatch) -> RegistrationResult<Vec<u8>> {
    rkyv::to_bytes::<Error>(batch)
        .map(|aligned| aligned.into_vec())
        .map_err(|err| RegistrationError::Encode(err.to_string()))
}

/// Decodes the batch envelope only; elements are decoded by the caller.
pub fn decode_batch(bytes: &[u8]) -> RegistrationResult<SampleBatch> {
    let aligned = realign(bytes);
    rkyv::from_bytes::<SampleBatch, Error>(&aligned)
        .map_err(|err| RegistrationError::Decode(err.to_string()))
}

fn realign(bytes: &[u8]) -> AlignedVec<ARCHIVE_ALIGN> {
    let mut aligned = AlignedVec::<ARCHIVE_ALIGN>::with_capacity(bytes.len());
    aligned.extend_from_slice(bytes);
    aligned
}
