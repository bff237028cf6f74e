//! Best-sample selection (spec.md §4.8): a pure, stateless function over
//! completed [`Sample`]s. Grounded in the Fuchsia `HttpsSampler`'s pattern of
//! combining several polls into one estimate, generalized here into the
//! spec's two-stage reduction: per-host minimum delay, then cross-host
//! median by offset.

use std::net::SocketAddr;

use crate::domain::Sample;

/// Select the best sample from a round's accepted samples.
///
/// For each distinct host address, keep only the sample with the lowest
/// `delay_ms` (the measurement least perturbed by network jitter). Then
/// return the sample whose `offset_ms` is the median among those per-host
/// winners. Returns `None` if `samples` is empty.
#[must_use]
pub fn select_best(samples: &[Sample]) -> Option<Sample> {
    let mut best_per_host: Vec<(SocketAddr, Sample)> = Vec::new();
    for sample in samples {
        match best_per_host.iter_mut().find(|(addr, _)| *addr == sample.address) {
            Some((_, existing)) if sample.delay_ms < existing.delay_ms => {
                *existing = *sample;
            }
            Some(_) => {}
            None => best_per_host.push((sample.address, *sample)),
        }
    }

    if best_per_host.is_empty() {
        return None;
    }

    best_per_host.sort_by_key(|(_, s)| s.offset_ms);
    let median_index = best_per_host.len() / 2;
    Some(best_per_host[median_index].1)
}
