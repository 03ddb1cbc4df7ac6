/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Block assembly and application.
//!
//! Both run the same execution: a producer runs it to learn the context hash it must put in the header,
//! a validator runs it to check that hash. Each transaction goes through the same phases:
//! 1. Admission: chain id, signer, then replay protection by sequence or by hash and time window.
//! 2. Charge: the transaction fee is moved into the main token's fee pool.
//! 3. Execution: the method call, in its own layer.
//!
//! A transaction failing admission or charge leaves no trace in the state. A transaction failing in
//! execution keeps its admission and charge. Neither aborts the block.

use tracing::{debug, info, warn};

use crate::codec::{Decode, Encode, Value};
use crate::context::loader::{prune_tx_hashes, write_consensus, write_context_data, write_head};
use crate::context::{Context, ContextData, StateLoader, StoreLoader};
use crate::contract::event::{Event, EventKind, RewardEvent};
use crate::contract::registry::reward_hooks;
use crate::contract::{interactor, GeneratorCounts};
use crate::error::TransitionError;
use crate::params::ForkFlag;
use crate::types::{Address, Hash};

use super::block::{Block, BlockLog, ExitStatus, Header, Receipt, SignedTx};
use super::verify::check_signer;
use super::{Chain, ChainAdmin, BLOCK_VERSION};

/// Account data key of the chain account counting blocks per generator in the open reward window.
pub const REWARD_COUNTS_KEY: &[u8] = b"reward_counts";

/// Result of executing a block body.
struct Executed {
    data: ContextData,
    context_hash: Hash,
    receipts: Vec<Receipt>,
    events: Vec<Event>,
}

impl Chain {
    /// Builds the next block from `body`. The header carries the resulting context hash and the
    /// generator selected by `timeout_count`; the signature is left to the generator.
    pub fn assemble_block(
        &self,
        timestamp: u64,
        timeout_count: u32,
        body: Vec<SignedTx>,
    ) -> Result<Block, TransitionError> {
        let _apply = self.apply_lock.lock();
        let loader = StoreLoader::new(self.store.read_tx()?);
        if !loader.is_initialized() {
            return Err(TransitionError::NotInitialized);
        }

        let mut header = Header {
            chain_id: self.config.chain_id,
            version: BLOCK_VERSION,
            height: loader.height() + 1,
            prev_hash: loader.last_hash(),
            timeout_count,
            timestamp,
            generator: self.consensus.top_rank(timeout_count)?.address,
            body_hash: Block::body_hash(&body)?,
            ..Default::default()
        };
        self.check_timestamp(&loader, &header)?;

        let executed = self.execute(&loader, &header, &body)?;
        header.context_hash = executed.context_hash;
        debug!(height = header.height, txs = body.len(), generator = %header.generator, "block assembled");
        Ok(Block { header, body })
    }

    /// Validates and executes `block`, then commits its state, the new head and the new rank table.
    /// On error nothing is committed.
    pub fn apply_block(&self, block: &Block) -> Result<BlockLog, TransitionError> {
        let _apply = self.apply_lock.lock();
        let header = &block.header;

        let executed = {
            let loader = StoreLoader::new(self.store.read_tx()?);
            self.check_header(&loader, block)?;
            let executed = self.execute(&loader, header, &block.body)?;
            if executed.context_hash != header.context_hash {
                return Err(TransitionError::InvalidContextHash {
                    expected: header.context_hash,
                    computed: executed.context_hash,
                });
            }
            executed
        };

        let header_hash = header.hash()?;
        let next = self.consensus.next_state(
            header,
            header_hash,
            &executed.data.created_generators(),
            &executed.data.deleted_generators(),
        )?;
        let blob = next.to_bytes()?;

        let cutoff = header.timestamp.saturating_sub(self.config.tx_time_window);
        self.store.update(|tx| -> Result<(), TransitionError> {
            let pruned = prune_tx_hashes(tx, cutoff)?;
            if pruned > 0 {
                debug!(height = header.height, pruned, "expired transaction hashes pruned");
            }
            write_context_data(tx, &executed.data);
            write_head(tx, header.height, &header_hash, header.timestamp, header.to_bytes()?);
            write_consensus(tx, blob);
            Ok(())
        })?;
        self.consensus.commit(next);

        info!(
            height = header.height,
            hash = %header_hash,
            generator = %header.generator,
            txs = block.body.len(),
            events = executed.events.len(),
            "block applied"
        );
        let log = BlockLog {
            height: header.height,
            hash: header_hash,
            receipts: executed.receipts,
            events: executed.events,
        };
        self.publish(&log);
        Ok(log)
    }

    fn check_timestamp(&self, loader: &StoreLoader, header: &Header) -> Result<(), TransitionError> {
        let last = loader.last_timestamp();
        let ok = if self.config.fork_rules.is_active(ForkFlag::StrictTimestamp, header.height) {
            header.timestamp > last
        } else {
            header.timestamp >= last
        };
        if ok {
            Ok(())
        } else {
            Err(TransitionError::InvalidTimestamp)
        }
    }

    fn check_header(&self, loader: &StoreLoader, block: &Block) -> Result<(), TransitionError> {
        let header = &block.header;
        if !loader.is_initialized() {
            return Err(TransitionError::NotInitialized);
        }
        if header.chain_id != self.config.chain_id {
            return Err(TransitionError::InvalidChainId);
        }
        let expected = loader.height() + 1;
        if header.height != expected {
            return Err(TransitionError::InvalidHeight { expected, actual: header.height });
        }
        let last_hash = loader.last_hash();
        if header.prev_hash != last_hash {
            return Err(TransitionError::InvalidPrevHash { expected: last_hash, actual: header.prev_hash });
        }
        self.check_timestamp(loader, header)?;
        if self.consensus.top_rank(header.timeout_count)?.address != header.generator {
            return Err(TransitionError::InvalidGenerator(header.generator));
        }
        if Block::body_hash(&block.body)? != header.body_hash {
            return Err(TransitionError::InvalidBodyHash);
        }
        Ok(())
    }

    fn execute(&self, loader: &StoreLoader, header: &Header, body: &[SignedTx]) -> Result<Executed, TransitionError> {
        let mut ctx = Context::new(loader);
        ctx.set_fork_rules(self.config.fork_rules.clone());
        ctx.next_context(header.prev_hash, header.timestamp);

        let mut receipts = Vec::with_capacity(body.len());
        for (tx_index, stx) in (0u32..).zip(body) {
            receipts.push(self.execute_tx(&mut ctx, header, tx_index, stx)?);
        }
        self.close_reward_window(&mut ctx, header)?;

        let context_hash = ctx.hash()?;
        let events = ctx.events_since(0);
        Ok(Executed { data: ctx.into_data(), context_hash, receipts, events })
    }

    fn execute_tx(
        &self,
        ctx: &mut Context,
        header: &Header,
        tx_index: u32,
        stx: &SignedTx,
    ) -> Result<Receipt, TransitionError> {
        let tx_hash = stx.hash()?;
        let start = ctx.event_count();
        let sn = ctx.snapshot();

        if let Err(e) = self.admit(ctx, header, stx, &tx_hash).and_then(|_| self.charge(ctx, stx)) {
            ctx.revert(sn);
            debug!(%tx_hash, error = %e, "transaction rejected");
            return Ok(Receipt {
                tx_index,
                tx_hash,
                status: ExitStatus::Rejected,
                returns: vec![],
                events: vec![],
                error: Some(e.to_string()),
            });
        }

        let result = if stx.tx.to == Address::ZERO {
            ChainAdmin::call(ctx, &self.registry, stx.signer, &stx.tx.method, &stx.tx.args)
        } else {
            interactor::exec(ctx, &self.registry, stx.signer, stx.tx.to, &stx.tx.method, &stx.tx.args)
        };
        ctx.commit(sn);

        let (status, returns, error) = match result {
            Ok(returns) => (ExitStatus::Success, returns, None),
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => (ExitStatus::Failed, vec![], Some(e.to_string())),
        };
        Ok(Receipt { tx_index, tx_hash, status, returns, events: ctx.events_since(start), error })
    }

    /// Replay protection. Marks the transaction as consumed.
    fn admit(&self, ctx: &mut Context, header: &Header, stx: &SignedTx, tx_hash: &Hash) -> Result<(), TransitionError> {
        let tx = &stx.tx;
        if tx.chain_id != self.config.chain_id {
            return Err(TransitionError::InvalidChainId);
        }
        check_signer(self.verifier.as_ref(), stx, tx_hash)?;
        if tx.use_seq {
            let expected = ctx.account_seq(&stx.signer) + 1;
            if tx.seq != expected {
                return Err(TransitionError::WrongSequence { expected, actual: tx.seq });
            }
            ctx.set_account_seq(&stx.signer, expected);
        } else {
            if tx.timestamp.abs_diff(header.timestamp) > self.config.tx_time_window {
                return Err(TransitionError::TransactionTimestampOutOfRange);
            }
            if ctx.tx_seen(tx_hash) {
                return Err(TransitionError::DuplicateTransaction(*tx_hash));
            }
            ctx.mark_tx(tx_hash, tx.timestamp);
        }
        Ok(())
    }

    fn charge(&self, ctx: &mut Context, stx: &SignedTx) -> Result<(), TransitionError> {
        if self.config.tx_fee.is_zero() {
            return Ok(());
        }
        let Some(token) = ctx.main_token() else {
            return Ok(());
        };
        let args = [Value::Address(stx.signer), Value::Amount(self.config.tx_fee.clone())];
        interactor::exec(ctx, &self.registry, Address::ZERO, token, "ChargeFee", &args)?;
        Ok(())
    }

    /// Counts the block for its generator. At the end of a reward window, runs every reward hook in
    /// deployment order and emits the minted amounts as one reward event.
    fn close_reward_window(&self, ctx: &mut Context, header: &Header) -> Result<(), TransitionError> {
        let mut counts = match ctx.account_data(&Address::ZERO, REWARD_COUNTS_KEY) {
            Some(bytes) => GeneratorCounts::from_bytes(&bytes)?,
            None => GeneratorCounts::new(),
        };
        *counts.entry(header.generator).or_default() += 1;

        if header.height % self.config.reward_interval_blocks.max(1) != 0 {
            ctx.set_account_data(&Address::ZERO, REWARD_COUNTS_KEY, counts.to_bytes()?);
            return Ok(());
        }

        let mut event = RewardEvent { height: header.height, ..Default::default() };
        for hook in reward_hooks(ctx)? {
            match interactor::reward(ctx, &self.registry, hook, header, &counts) {
                Ok(minted) => {
                    for (receiver, amount) in minted {
                        *event.minted.entry(receiver).or_default() += &amount;
                    }
                }
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(e) => warn!(height = header.height, %hook, error = %e, "reward hook failed"),
            }
        }
        ctx.set_account_data(&Address::ZERO, REWARD_COUNTS_KEY, Vec::new());
        debug!(height = header.height, receivers = event.minted.len(), total = %event.total(), "reward window closed");
        ctx.emit_event(EventKind::Reward, event.to_bytes()?)?;
        Ok(())
    }
}
