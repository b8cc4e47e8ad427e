//! The bundler: turns pending messages into sealed bundles, one
//! (origin, destination) pair at a time.
//!
//! A bundle forms when a pair has a full load of pending messages, or when
//! the oldest pending message has waited past the configured bound. Members
//! are always the ordered prefix of the pair's pending set, so hub-side
//! execution order matches emission order.

use std::sync::Arc;

use prometheus::IntCounterVec;
use tracing::{info_span, instrument::Instrumented, Instrument};

use courier_base::settings::BundlerConf;
use courier_core::{bundle_commitment, Bundle, BundleState, Message, StoreError};

use crate::store::{unix_now, MessageStore, Pair};

#[derive(Debug)]
pub(crate) struct Bundler {
    store: Arc<MessageStore>,
    conf: BundlerConf,
    bundles_formed: IntCounterVec,
}

impl Bundler {
    pub(crate) fn new(store: Arc<MessageStore>, conf: BundlerConf, bundles_formed: IntCounterVec) -> Self {
        Self {
            store,
            conf,
            bundles_formed,
        }
    }

    /// Assemble a bundle from an ordered run of pending messages.
    fn assemble(messages: &[Message], now: u64) -> Bundle {
        let leaves: Vec<_> = messages.iter().map(|m| m.to_leaf()).collect();
        let commitment = bundle_commitment(&leaves);
        let first = &messages[0];
        Bundle {
            id: Bundle::derive_id(first.origin, first.destination, commitment, first.sequence, 0),
            origin: first.origin,
            destination: first.destination,
            message_ids: messages.iter().map(|m| m.id()).collect(),
            commitment,
            created_at: now,
            state: BundleState::Open,
        }
    }

    /// Form a bundle for the pair if either trigger fires. The size trigger
    /// takes precedence: a full bundle forms even when the wait bound has
    /// also elapsed.
    fn maybe_form(&self, pair: Pair, now: u64) -> Result<Option<Bundle>, StoreError> {
        let pending = self
            .store
            .peek_pending(pair, self.conf.max_bundle_messages)?;
        if pending.is_empty() {
            return Ok(None);
        }

        let full = pending.len() >= self.conf.max_bundle_messages;
        let overdue = match self.store.oldest_pending_enqueued_at(pair)? {
            Some(enqueued_at) => now.saturating_sub(enqueued_at) >= self.conf.max_wait_secs,
            None => false,
        };
        if !full && !overdue {
            return Ok(None);
        }

        let bundle = self.store.seal_bundle(Self::assemble(&pending, now))?;
        self.bundles_formed
            .with_label_values(&[&pair.0.to_string(), &pair.1.to_string()])
            .inc();
        Ok(Some(bundle))
    }

    /// One pass over every pair with pending messages. Returns the bundles
    /// formed this tick.
    pub(crate) fn tick(&self, now: u64) -> Result<Vec<Bundle>, StoreError> {
        let mut formed = vec![];
        for pair in self.store.pairs_with_pending() {
            // a pair may hold more than a full bundle of backlog
            while let Some(bundle) = self.maybe_form(pair, now)? {
                let done = bundle.message_ids.len() < self.conf.max_bundle_messages;
                formed.push(bundle);
                if done {
                    break;
                }
            }
        }
        Ok(formed)
    }

    pub(crate) fn spawn(self: Arc<Self>) -> Instrumented<tokio::task::JoinHandle<color_eyre::Result<()>>> {
        let span = info_span!("Bundler");
        let interval = self.conf.interval();
        tokio::spawn(async move {
            loop {
                self.tick(unix_now())?;
                // a full pair forms immediately instead of waiting out the
                // interval
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = self.store.bundle_ready().notified() => {}
                }
            }
        })
        .instrument(span)
    }
}
