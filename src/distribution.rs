//! Fan-out of shares to the computing parties.
//!
//! All parties are contacted concurrently and every request is awaited
//! before returning. A single failure fails the whole distribution. Shares
//! already accepted by other parties stay there; they cannot reconstruct
//! the secret on their own, but the session is spent and a retry must start
//! over with a new session and fresh shares.

use crate::error::{Error, Result};
use crate::field::to_decimal_string;
use crate::session::SessionId;
use crate::transport::{PartyTransport, SharesRequest};
use crate::types::{Party, PartyId, ShareSet};
use futures::future::join_all;
use log::{debug, info, warn};
use std::collections::BTreeMap;

/// Per-party payload: input name to decimal share.
pub type PartyPayload = BTreeMap<String, String>;

/// Regroups `input -> party -> share` into `party -> input -> decimal`.
pub fn group_by_party(shares: &BTreeMap<String, ShareSet>) -> BTreeMap<PartyId, PartyPayload> {
    let mut payloads: BTreeMap<PartyId, PartyPayload> = BTreeMap::new();
    for (input_name, input_shares) in shares {
        for share in input_shares.values() {
            payloads
                .entry(share.party_id)
                .or_default()
                .insert(input_name.clone(), to_decimal_string(&share.value));
        }
    }
    payloads
}

/// Sends each party its payload for `session_id`, one attempt per party.
///
/// # Errors
///
/// [`Error::Transport`] naming the first failing party if any request fails.
pub async fn distribute<T: PartyTransport + ?Sized>(
    transport: &T,
    session_id: &SessionId,
    shares: &BTreeMap<String, ShareSet>,
    parties: &[Party],
) -> Result<()> {
    let mut payloads = group_by_party(shares);

    let requests: Vec<(&Party, SharesRequest)> = parties
        .iter()
        .filter_map(|party| match payloads.remove(&party.id) {
            Some(payload) => Some((
                party,
                SharesRequest {
                    session_id: session_id.clone(),
                    shares: payload,
                },
            )),
            None => {
                debug!("No shares for party {}, skipping", party.id);
                None
            }
        })
        .collect();

    if let Some(orphan) = payloads.keys().next() {
        return Err(Error::validation(format!(
            "shares addressed to party {orphan}, which is not in the party list"
        )));
    }

    let sends = requests
        .iter()
        .map(|(party, request)| transport.send_shares(party, request));
    let results = join_all(sends).await;

    let mut first_error = None;
    for ((party, _), result) in requests.iter().zip(results) {
        if let Err(e) = result {
            warn!("Share delivery to party {} failed: {}", party.id, e);
            first_error.get_or_insert(e);
        }
    }

    match first_error {
        Some(Error::Transport(msg)) => Err(Error::Transport(msg)),
        Some(other) => Err(Error::Transport(other.to_string())),
        None => {
            info!(
                "Shares for session {} distributed to {} parties",
                session_id,
                requests.len()
            );
            Ok(())
        }
    }
}
