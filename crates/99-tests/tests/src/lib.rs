//! End-to-end suites spanning the transport and registration crates.

#[cfg(test)]
mod support;

#[cfg(test)]
mod channel_e2e;

#[cfg(test)]
mod registration_e2e;
