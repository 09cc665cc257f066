//! The event serializer at the heart of the witness.
//!
//! A single dedicated thread drains the event queue and fully handles one
//! event before the next: sign an attestation, persist it, queue it for
//! submission, or reconcile a destination-side result. Listener callbacks
//! run concurrently on the I/O runtime and only touch the queue.
//!
//! The main loop stays parked behind a startup gate until
//! [`Federator::unlock_main_loop`] is called, so bootstrap (store open,
//! backfill subscriptions) finishes before any event is dispatched.

use std::{
    mem,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Condvar, Mutex, OnceLock,
    },
    thread,
    time::Duration,
};

use anyhow::{Context, Result};
use serde_json::{json, Value};
use tracing::{debug, error, info, trace, warn};

use crate::{
    attestation::{AttestationBatch, ClaimAttestation, CreateAccountAttestation},
    chain_listener::{ChainListener, ChainSide},
    crypto::{PublicKey, SecretKey},
    db::{ClaimRow, CreateAccountRow, Db},
    events::{
        Direction, FederatorEvent, XChainAccountCreateCommitDetected, XChainCommitDetected,
        XChainTransferResult,
    },
    ser,
    types::{AccountId, Bridge},
};

/// The chain accepts at most this many attestations per transaction.
pub const MAX_ATTESTATION_BATCH: usize = 8;

struct Listeners {
    locking: Arc<ChainListener>,
    issuing: Arc<ChainListener>,
}

/// Per-destination accumulators for signed attestations awaiting submission.
/// Only the federator thread touches these between flushes.
#[derive(Default)]
struct BatchBuffers {
    to_locking_claims: Vec<ClaimAttestation>,
    to_issuing_claims: Vec<ClaimAttestation>,
    to_locking_creates: Vec<CreateAccountAttestation>,
    to_issuing_creates: Vec<CreateAccountAttestation>,
}

impl BatchBuffers {
    fn pending(&self, from_locking_chain: bool) -> usize {
        if from_locking_chain {
            self.to_issuing_claims.len() + self.to_issuing_creates.len()
        } else {
            self.to_locking_claims.len() + self.to_locking_creates.len()
        }
    }
}

pub struct Federator {
    bridge: Bridge,
    signing_key: SecretKey,
    signing_pk: PublicKey,
    locking_chain_reward_account: AccountId,
    issuing_chain_reward_account: AccountId,
    witness_submit: bool,
    submit_account: AccountId,
    db: Arc<Db>,
    listeners: OnceLock<Listeners>,

    queue: Mutex<Vec<FederatorEvent>>,
    queue_cv: Condvar,
    stop_requested: AtomicBool,

    // Startup gate: true until the bootstrap explicitly opens it.
    gate: Mutex<bool>,
    gate_cv: Condvar,

    batches: Mutex<BatchBuffers>,
    thread: Mutex<Option<thread::JoinHandle<()>>>,
    events_processed: AtomicU64,
    signing_failures: AtomicU64,
}

/// Build a federator and its two chain listeners. The listeners hold weak
/// back-references, so the federator must exist first; network transports
/// are attached later via `ChainListener::init`.
pub fn make_federator(
    db: Arc<Db>,
    bridge: Bridge,
    signing_key: SecretKey,
    locking_chain_reward_account: AccountId,
    issuing_chain_reward_account: AccountId,
    witness_submit: bool,
) -> Arc<Federator> {
    let federator = Federator::new(
        db,
        bridge.clone(),
        signing_key,
        locking_chain_reward_account,
        issuing_chain_reward_account,
        witness_submit,
    );
    let locking = ChainListener::new(
        ChainSide::Locking,
        bridge.clone(),
        Arc::downgrade(&federator),
    );
    let issuing = ChainListener::new(ChainSide::Issuing, bridge, Arc::downgrade(&federator));
    federator.init(locking, issuing);
    federator
}

impl Federator {
    pub fn new(
        db: Arc<Db>,
        bridge: Bridge,
        signing_key: SecretKey,
        locking_chain_reward_account: AccountId,
        issuing_chain_reward_account: AccountId,
        witness_submit: bool,
    ) -> Arc<Federator> {
        let signing_pk = signing_key.public_key();
        let submit_account = signing_pk.account_id();
        Arc::new(Federator {
            bridge,
            signing_key,
            signing_pk,
            locking_chain_reward_account,
            issuing_chain_reward_account,
            witness_submit,
            submit_account,
            db,
            listeners: OnceLock::new(),
            queue: Mutex::new(Vec::with_capacity(16)),
            queue_cv: Condvar::new(),
            stop_requested: AtomicBool::new(false),
            gate: Mutex::new(true),
            gate_cv: Condvar::new(),
            batches: Mutex::new(BatchBuffers::default()),
            thread: Mutex::new(None),
            events_processed: AtomicU64::new(0),
            signing_failures: AtomicU64::new(0),
        })
    }

    pub fn init(&self, locking: Arc<ChainListener>, issuing: Arc<ChainListener>) {
        let _ = self.listeners.set(Listeners { locking, issuing });
    }

    pub fn bridge(&self) -> &Bridge {
        &self.bridge
    }

    pub fn signing_public_key(&self) -> PublicKey {
        self.signing_pk
    }

    pub fn listener(&self, side: ChainSide) -> Option<Arc<ChainListener>> {
        self.listeners.get().map(|l| match side {
            ChainSide::Locking => Arc::clone(&l.locking),
            ChainSide::Issuing => Arc::clone(&l.issuing),
        })
    }

    pub fn start(self: &Arc<Self>) -> Result<()> {
        let mut handle = self.thread.lock().unwrap();
        if handle.is_some() {
            return Ok(());
        }
        self.stop_requested.store(false, Ordering::SeqCst);
        let federator = Arc::clone(self);
        *handle = Some(
            thread::Builder::new()
                .name("federator".into())
                .spawn(move || federator.main_loop())
                .context("spawning federator thread")?,
        );
        Ok(())
    }

    /// Stop the loop thread (flushing pending batches on the way out) and
    /// shut down both listeners.
    pub fn stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
        {
            let _queue = self.queue.lock().unwrap();
            self.queue_cv.notify_all();
        }
        {
            let _gate = self.gate.lock().unwrap();
            self.gate_cv.notify_all();
        }
        if let Some(handle) = self.thread.lock().unwrap().take() {
            if handle.join().is_err() {
                error!("federator thread panicked");
            }
        }
        if let Some(listeners) = self.listeners.get() {
            listeners.locking.shutdown();
            listeners.issuing.shutdown();
        }
    }

    /// Thread-safe enqueue; wakes the loop when the queue was empty.
    pub fn push(&self, event: FederatorEvent) {
        let mut queue = self.queue.lock().unwrap();
        let notify = queue.is_empty();
        queue.push(event);
        drop(queue);
        if notify {
            self.queue_cv.notify_one();
        }
    }

    /// Open the startup gate. Until this is called the loop dispatches
    /// nothing, so bootstrap work observes a quiescent store.
    pub fn unlock_main_loop(&self) {
        let mut locked = self.gate.lock().unwrap();
        *locked = false;
        self.gate_cv.notify_one();
    }

    pub fn get_info(&self) -> Value {
        let batches = self.batches.lock().unwrap();
        json!({
            "queued_events": self.queue.lock().unwrap().len(),
            "events_processed": self.events_processed.load(Ordering::SeqCst),
            "signing_failures": self.signing_failures.load(Ordering::SeqCst),
            "witness_submit": self.witness_submit,
            "pending_attestations": {
                "to_locking": batches.pending(false),
                "to_issuing": batches.pending(true),
            },
        })
    }

    fn main_loop(&self) {
        {
            let mut locked = self.gate.lock().unwrap();
            while *locked {
                if self.stop_requested.load(Ordering::SeqCst) {
                    return;
                }
                let (guard, _) = self
                    .gate_cv
                    .wait_timeout(locked, Duration::from_secs(1))
                    .unwrap();
                locked = guard;
            }
        }
        info!("federator loop started");

        let mut local = Vec::with_capacity(16);
        while !self.stop_requested.load(Ordering::SeqCst) {
            {
                let mut queue = self.queue.lock().unwrap();
                mem::swap(&mut local, &mut *queue);
            }
            if local.is_empty() {
                let queue = self.queue.lock().unwrap();
                if queue.is_empty() {
                    // An event can land between the swap above and this
                    // wait; the bounded timeout covers that race and any
                    // spurious wakeup.
                    let _ = self
                        .queue_cv
                        .wait_timeout(queue, Duration::from_secs(1))
                        .unwrap();
                }
                continue;
            }
            for event in local.drain(..) {
                self.on_event(event);
                self.events_processed.fetch_add(1, Ordering::SeqCst);
            }
        }
        self.flush_pending_batches();
        info!("federator loop stopped");
    }

    fn on_event(&self, event: FederatorEvent) {
        trace!(event = event.name(), detail = %event.to_json(), "dispatching event");
        let result = match event {
            FederatorEvent::Commit(e) => self.on_commit(e),
            FederatorEvent::AccountCreate(e) => self.on_account_create(e),
            FederatorEvent::TransferResult(e) => self.on_transfer_result(e),
            FederatorEvent::Heartbeat => self.on_heartbeat(),
        };
        // A transient store failure must not take down the live stream; the
        // operator reconciles on the next restart.
        if let Err(e) = result {
            error!(error = ?e, "event handler failed; continuing");
        }
    }

    fn source_listener(&self, direction: Direction) -> Option<Arc<ChainListener>> {
        let side = match direction {
            Direction::LockingToIssuing => ChainSide::Locking,
            Direction::IssuingToLocking => ChainSide::Issuing,
        };
        self.listener(side)
    }

    fn reward_account(&self, was_locking_chain_send: bool) -> AccountId {
        // The reward is paid on the destination chain.
        if was_locking_chain_send {
            self.issuing_chain_reward_account
        } else {
            self.locking_chain_reward_account
        }
    }

    fn on_commit(&self, e: XChainCommitDetected) -> Result<()> {
        debug!(
            claim_id = e.claim_id,
            direction = %e.direction,
            tx = %e.txn_hash,
            "commit detected"
        );
        let was_locking_chain_send = e.direction.was_locking_chain_send();

        if self.db.claim_exists(e.direction, e.claim_id)? {
            debug!(claim_id = e.claim_id, "claim already recorded; ignoring");
            if e.rpc_order < 0 {
                // Backfill reached territory we already hold.
                if let Some(listener) = self.source_listener(e.direction) {
                    listener.stop_historical_txns();
                }
            }
            return Ok(());
        }

        let reward_account = self.reward_account(was_locking_chain_send);
        let attestation = if e.status.is_success() {
            match &e.delivered_amount {
                None => {
                    error!(
                        event = %e.txn_hash,
                        "missing delivered amount in successful transfer"
                    );
                    None
                }
                Some(amount) => {
                    match ClaimAttestation::sign(
                        &self.signing_key,
                        &self.bridge,
                        e.source,
                        amount.clone(),
                        reward_account,
                        was_locking_chain_send,
                        e.claim_id,
                        e.other_chain_account,
                    ) {
                        Ok(attestation) => {
                            debug_assert!(attestation.verify(&self.bridge));
                            Some(attestation)
                        }
                        Err(err) => {
                            self.signing_failures.fetch_add(1, Ordering::SeqCst);
                            error!(error = ?err, claim_id = e.claim_id, "signing failed; dropping event");
                            return Ok(());
                        }
                    }
                }
            }
        } else {
            None
        };

        let row = ClaimRow {
            claim_id: e.claim_id,
            txn_id: e.txn_hash.to_string(),
            ledger_seq: e.ledger_seq,
            success: e.status.is_success(),
            delivered_amount: e.delivered_amount.as_ref().map(ser::encode_amount),
            bridge: ser::encode_bridge(&self.bridge),
            sending_account: e.source.as_bytes().to_vec(),
            reward_account: reward_account.as_bytes().to_vec(),
            other_chain_account: e.other_chain_account.map(|a| a.as_bytes().to_vec()),
            public_key: self.signing_pk.as_bytes().to_vec(),
            signature: attestation.as_ref().map(|a| a.signature.0.clone()),
        };
        self.db.insert_claim(e.direction, &row)?;
        info!(
            claim_id = e.claim_id,
            direction = %e.direction,
            success = row.success,
            "recorded claim attestation"
        );

        if self.witness_submit {
            if let Some(attestation) = attestation {
                let pending = {
                    let mut batches = self.batches.lock().unwrap();
                    if was_locking_chain_send {
                        batches.to_issuing_claims.push(attestation);
                    } else {
                        batches.to_locking_claims.push(attestation);
                    }
                    batches.pending(was_locking_chain_send)
                };
                if e.ledger_boundary || pending >= MAX_ATTESTATION_BATCH {
                    self.submit(was_locking_chain_send, e.ledger_boundary);
                }
            }
        }
        Ok(())
    }

    fn on_account_create(&self, e: XChainAccountCreateCommitDetected) -> Result<()> {
        debug!(
            create_count = e.create_count,
            direction = %e.direction,
            tx = %e.txn_hash,
            "account create detected"
        );
        let was_locking_chain_send = e.direction.was_locking_chain_send();

        if self.db.create_account_exists(e.direction, e.create_count)? {
            debug!(create_count = e.create_count, "create already recorded; ignoring");
            if e.rpc_order < 0 {
                if let Some(listener) = self.source_listener(e.direction) {
                    listener.stop_historical_txns();
                }
            }
            return Ok(());
        }

        let reward_account = self.reward_account(was_locking_chain_send);
        let attestation = if e.status.is_success() {
            match &e.delivered_amount {
                None => {
                    error!(
                        event = %e.txn_hash,
                        "missing delivered amount in successful account create"
                    );
                    None
                }
                Some(amount) => {
                    match CreateAccountAttestation::sign(
                        &self.signing_key,
                        &self.bridge,
                        e.source,
                        amount.clone(),
                        e.reward_amount.clone(),
                        reward_account,
                        was_locking_chain_send,
                        e.create_count,
                        e.destination,
                    ) {
                        Ok(attestation) => {
                            debug_assert!(attestation.verify(&self.bridge));
                            Some(attestation)
                        }
                        Err(err) => {
                            self.signing_failures.fetch_add(1, Ordering::SeqCst);
                            error!(error = ?err, create_count = e.create_count, "signing failed; dropping event");
                            return Ok(());
                        }
                    }
                }
            }
        } else {
            None
        };

        let row = CreateAccountRow {
            create_count: e.create_count,
            txn_id: e.txn_hash.to_string(),
            ledger_seq: e.ledger_seq,
            success: e.status.is_success(),
            delivered_amount: e.delivered_amount.as_ref().map(ser::encode_amount),
            reward_amount: ser::encode_amount(&e.reward_amount),
            bridge: ser::encode_bridge(&self.bridge),
            sending_account: e.source.as_bytes().to_vec(),
            reward_account: reward_account.as_bytes().to_vec(),
            other_chain_account: e.destination.as_bytes().to_vec(),
            public_key: self.signing_pk.as_bytes().to_vec(),
            signature: attestation.as_ref().map(|a| a.signature.0.clone()),
        };
        self.db.insert_create_account(e.direction, &row)?;
        info!(
            create_count = e.create_count,
            direction = %e.direction,
            success = row.success,
            "recorded create-account attestation"
        );

        if self.witness_submit {
            if let Some(attestation) = attestation {
                let pending = {
                    let mut batches = self.batches.lock().unwrap();
                    if was_locking_chain_send {
                        batches.to_issuing_creates.push(attestation);
                    } else {
                        batches.to_locking_creates.push(attestation);
                    }
                    batches.pending(was_locking_chain_send)
                };
                if e.ledger_boundary || pending >= MAX_ATTESTATION_BATCH {
                    self.submit(was_locking_chain_send, e.ledger_boundary);
                }
            }
        }
        Ok(())
    }

    fn on_transfer_result(&self, e: XChainTransferResult) -> Result<()> {
        if e.status.is_success() {
            if self.db.delete_claim(e.direction, e.claim_id)? {
                info!(
                    claim_id = e.claim_id,
                    direction = %e.direction,
                    "transfer complete; attestation purged"
                );
            } else {
                debug!(
                    claim_id = e.claim_id,
                    direction = %e.direction,
                    "transfer result for a claim we do not hold"
                );
            }
        } else {
            // Keep the row: a later retry on the destination chain can
            // reuse the stored signature.
            warn!(
                claim_id = e.claim_id,
                direction = %e.direction,
                status = %e.status,
                "transfer failed on destination chain; keeping attestation"
            );
        }
        Ok(())
    }

    fn on_heartbeat(&self) -> Result<()> {
        trace!("heartbeat");
        for from_locking_chain in [true, false] {
            if self.batches.lock().unwrap().pending(from_locking_chain) > 0 {
                self.submit(from_locking_chain, false);
            }
        }
        Ok(())
    }

    /// Drain one direction's buffers and send the attestations to the
    /// destination chain. At a ledger boundary an oversized batch is split
    /// across per-ledger chunks.
    fn submit(&self, from_locking_chain: bool, ledger_boundary: bool) {
        let (claims, creates) = {
            let mut batches = self.batches.lock().unwrap();
            if from_locking_chain {
                (
                    mem::take(&mut batches.to_issuing_claims),
                    mem::take(&mut batches.to_issuing_creates),
                )
            } else {
                (
                    mem::take(&mut batches.to_locking_claims),
                    mem::take(&mut batches.to_locking_creates),
                )
            }
        };
        if claims.is_empty() && creates.is_empty() {
            return;
        }

        let destination = if from_locking_chain {
            ChainSide::Issuing
        } else {
            ChainSide::Locking
        };
        let Some(listener) = self.listener(destination) else {
            warn!("no destination listener; dropping attestation batch");
            return;
        };

        let chunk_size = if ledger_boundary {
            MAX_ATTESTATION_BATCH
        } else {
            usize::MAX
        };
        for batch in chunk_batches(&self.bridge, claims, creates, chunk_size) {
            let count = batch.len();
            let txn = json!({
                "Account": self.submit_account.to_base58(),
                "TransactionType": "XChainAddAttestation",
                "XChainAttestationBatch": batch.to_json(),
            });
            let params = json!({
                "tx_json": txn,
                "secret": self.signing_key.to_hex(),
            });
            let chain = destination.name();
            let result = listener.send_with_callback(
                "submit",
                params,
                Box::new(move |reply| {
                    debug!(chain, reply = %reply, "attestation batch submission reply");
                }),
            );
            match result {
                Ok(request_id) => {
                    info!(request_id, attestations = count, chain, "submitted attestation batch");
                }
                Err(e) => {
                    // The rows are already durable; RPC clients can still
                    // harvest them and a transfer result decides their fate.
                    warn!(error = %e, chain, "attestation batch submission failed");
                }
            }
        }
    }

    fn flush_pending_batches(&self) {
        self.submit(true, false);
        self.submit(false, false);
    }

    #[cfg(test)]
    pub(crate) fn drain_events_for_test(&self) -> Vec<FederatorEvent> {
        mem::take(&mut *self.queue.lock().unwrap())
    }

    #[cfg(test)]
    pub(crate) fn handle_event_for_test(&self, event: FederatorEvent) {
        self.on_event(event);
    }
}

fn chunk_batches(
    bridge: &Bridge,
    claims: Vec<ClaimAttestation>,
    creates: Vec<CreateAccountAttestation>,
    chunk_size: usize,
) -> Vec<AttestationBatch> {
    let empty = |bridge: &Bridge| AttestationBatch {
        bridge: bridge.clone(),
        claims: Vec::new(),
        creates: Vec::new(),
    };
    let mut out = Vec::new();
    let mut current = empty(bridge);
    for claim in claims {
        if current.len() == chunk_size {
            out.push(mem::replace(&mut current, empty(bridge)));
        }
        current.claims.push(claim);
    }
    for create in creates {
        if current.len() == chunk_size {
            out.push(mem::replace(&mut current, empty(bridge)));
        }
        current.creates.push(create);
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}
