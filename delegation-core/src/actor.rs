//! Actor-based concurrency for the ledger
//!
//! One tokio task owns the store, the engine and the current block height.
//! Every request arrives through a bounded mailbox and runs on a fresh
//! [`Context`]; the context is committed only when the operation succeeds,
//! so a failed request leaves the store untouched.
//!
//! ```text
//! ┌──────────────────────────────────────┐
//! │        LedgerHandle (Clone)          │
//! └──────────────────┬───────────────────┘
//!                    │ mpsc::channel (bounded)
//!                    ▼
//! ┌──────────────────────────────────────┐
//! │       LedgerActor (single task)      │
//! │  Context -> DelegationEngine -> commit│
//! └──────────────────┬───────────────────┘
//!                    ▼
//!           KvStore::write_batch()
//! ```

use rust_decimal::Decimal;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::{
    context::Context,
    engine::DelegationEngine,
    genesis::{self, GenesisState},
    keys,
    storage::{self, KvStore},
    types::{
        AssetId, BlockInfo, DelegationInfo, DelegationParams, OperatorAddress, OperatorAssetInfo,
        RecordKey, SingleDelegationInfo, SlashOutcome, StakerAssetDelta, StakerAssetInfo,
        StakerId, SweepReport, UndelegationFilter, UndelegationRecord,
    },
    Error, Result,
};

type Reply<T> = oneshot::Sender<Result<T>>;

/// Message sent to the ledger actor
pub enum LedgerMessage {
    /// DelegateTo
    Delegate {
        params: DelegationParams,
        response: Reply<Decimal>,
    },

    /// UndelegateFrom
    Undelegate {
        params: DelegationParams,
        response: Reply<RecordKey>,
    },

    /// Credit or slash a natively restaked balance
    UpdateNativeRestakingBalance {
        staker: StakerId,
        asset: AssetId,
        amount: Decimal,
        response: Reply<SlashOutcome>,
    },

    /// Credit a deposit to the staker's withdrawable balance
    Deposit {
        staker: StakerId,
        asset: AssetId,
        amount: Decimal,
        response: Reply<StakerAssetInfo>,
    },

    /// Associate a staker with an operator
    Associate {
        staker: StakerId,
        operator: OperatorAddress,
        response: Reply<()>,
    },

    /// Remove a staker's association
    Dissociate {
        staker: StakerId,
        response: Reply<OperatorAddress>,
    },

    /// Place a hold on an undelegation
    IncrementHold {
        key: RecordKey,
        response: Reply<u64>,
    },

    /// Release a hold on an undelegation
    DecrementHold {
        key: RecordKey,
        response: Reply<u64>,
    },

    /// Enter or leave replay mode
    SetReplay {
        replay: bool,
        response: Reply<()>,
    },

    /// Sweep matured undelegations, persist the height and advance it
    EndBlock { response: Reply<SweepReport> },

    /// One delegation
    SingleDelegationInfo {
        staker: StakerId,
        asset: AssetId,
        operator: OperatorAddress,
        response: Reply<SingleDelegationInfo>,
    },

    /// All delegations of a staker's asset
    DelegationInfo {
        staker: StakerId,
        asset: AssetId,
        response: Reply<DelegationInfo>,
    },

    /// Undelegation records of a staker's asset
    StakerUndelegations {
        staker: StakerId,
        asset: AssetId,
        filter: UndelegationFilter,
        response: Reply<Vec<UndelegationRecord>>,
    },

    /// One undelegation record
    UndelegationRecord {
        key: RecordKey,
        response: Reply<Option<UndelegationRecord>>,
    },

    /// Records maturing at a height
    UndelegationsAtHeight {
        height: u64,
        response: Reply<Vec<UndelegationRecord>>,
    },

    /// Associated operator of a staker
    AssociatedOperator {
        staker: StakerId,
        response: Reply<Option<OperatorAddress>>,
    },

    /// Stakers delegating an asset to an operator
    StakersByOperator {
        operator: OperatorAddress,
        asset: AssetId,
        response: Reply<Vec<StakerId>>,
    },

    /// Hold count of a record
    HoldCount {
        key: RecordKey,
        response: Reply<u64>,
    },

    /// Staker balance
    StakerBalance {
        staker: StakerId,
        asset: AssetId,
        response: Reply<StakerAssetInfo>,
    },

    /// Operator pool
    OperatorBalance {
        operator: OperatorAddress,
        asset: AssetId,
        response: Reply<OperatorAssetInfo>,
    },

    /// Height the next request executes at
    CurrentHeight { response: Reply<u64> },

    /// Snapshot the state
    ExportGenesis { response: Reply<GenesisState> },

    /// Digest of the state
    AppHash { response: Reply<[u8; 32]> },

    /// Shutdown actor
    Shutdown,
}

impl std::fmt::Debug for LedgerMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LedgerMessage::Delegate { .. } => "Delegate",
            LedgerMessage::Undelegate { .. } => "Undelegate",
            LedgerMessage::UpdateNativeRestakingBalance { .. } => "UpdateNativeRestakingBalance",
            LedgerMessage::Deposit { .. } => "Deposit",
            LedgerMessage::Associate { .. } => "Associate",
            LedgerMessage::Dissociate { .. } => "Dissociate",
            LedgerMessage::IncrementHold { .. } => "IncrementHold",
            LedgerMessage::DecrementHold { .. } => "DecrementHold",
            LedgerMessage::SetReplay { .. } => "SetReplay",
            LedgerMessage::EndBlock { .. } => "EndBlock",
            LedgerMessage::SingleDelegationInfo { .. } => "SingleDelegationInfo",
            LedgerMessage::DelegationInfo { .. } => "DelegationInfo",
            LedgerMessage::StakerUndelegations { .. } => "StakerUndelegations",
            LedgerMessage::UndelegationRecord { .. } => "UndelegationRecord",
            LedgerMessage::UndelegationsAtHeight { .. } => "UndelegationsAtHeight",
            LedgerMessage::AssociatedOperator { .. } => "AssociatedOperator",
            LedgerMessage::StakersByOperator { .. } => "StakersByOperator",
            LedgerMessage::HoldCount { .. } => "HoldCount",
            LedgerMessage::StakerBalance { .. } => "StakerBalance",
            LedgerMessage::OperatorBalance { .. } => "OperatorBalance",
            LedgerMessage::CurrentHeight { .. } => "CurrentHeight",
            LedgerMessage::ExportGenesis { .. } => "ExportGenesis",
            LedgerMessage::AppHash { .. } => "AppHash",
            LedgerMessage::Shutdown => "Shutdown",
        };
        f.write_str(name)
    }
}

/// Actor that processes ledger messages
pub struct LedgerActor {
    store: Box<dyn KvStore>,
    engine: DelegationEngine,
    mailbox: mpsc::Receiver<LedgerMessage>,
    height: u64,
    replay: bool,
}

impl LedgerActor {
    /// Create new actor, resuming after the last persisted height
    pub fn new(
        store: Box<dyn KvStore>,
        engine: DelegationEngine,
        mailbox: mpsc::Receiver<LedgerMessage>,
        initial_height: u64,
    ) -> Result<Self> {
        let height = match store.get(keys::LAST_HEIGHT_KEY)? {
            Some(bytes) => {
                let last: u64 = bincode::deserialize(&bytes)?;
                last.checked_add(1)
                    .ok_or_else(|| Error::ArithmeticOverflow(format!("height {} + 1", last)))?
            }
            None => initial_height,
        };

        Ok(Self {
            store,
            engine,
            mailbox,
            height,
            replay: false,
        })
    }

    /// Run the actor event loop
    pub async fn run(mut self) {
        info!(height = self.height, "Ledger actor started");

        while let Some(msg) = self.mailbox.recv().await {
            if let LedgerMessage::Shutdown = msg {
                break;
            }
            self.handle_message(msg);
        }

        info!(height = self.height, "Ledger actor stopped");
    }

    fn block(&self) -> BlockInfo {
        BlockInfo {
            height: self.height,
            is_replay: self.replay,
        }
    }

    /// Run a mutating operation, committing only on success
    fn execute<T>(
        &mut self,
        op: impl FnOnce(&DelegationEngine, &mut Context<'_>) -> Result<T>,
    ) -> Result<T> {
        let block = self.block();
        let mut ctx = Context::new(&mut *self.store, block);
        let value = op(&self.engine, &mut ctx)?;
        ctx.commit()?;
        Ok(value)
    }

    fn query<T>(&mut self, op: impl FnOnce(&DelegationEngine, &Context<'_>) -> Result<T>) -> Result<T> {
        let block = self.block();
        let ctx = Context::new(&mut *self.store, block);
        op(&self.engine, &ctx)
    }

    fn end_block(&mut self) -> Result<SweepReport> {
        let block = self.block();
        let next = block
            .height
            .checked_add(1)
            .ok_or_else(|| Error::ArithmeticOverflow(format!("height {} + 1", block.height)))?;

        let mut ctx = Context::new(&mut *self.store, block);
        let report = self.engine.end_block(&mut ctx)?;
        ctx.set(keys::LAST_HEIGHT_KEY.to_vec(), &block.height)?;
        ctx.commit()?;

        self.height = next;
        Ok(report)
    }

    /// Handle a single message
    fn handle_message(&mut self, msg: LedgerMessage) {
        match msg {
            LedgerMessage::Delegate { params, response } => {
                let result = self.execute(|engine, ctx| engine.delegate_to(ctx, &params));
                reply(response, result, "delegate");
            }

            LedgerMessage::Undelegate { params, response } => {
                let result = self.execute(|engine, ctx| engine.undelegate_from(ctx, &params));
                reply(response, result, "undelegate");
            }

            LedgerMessage::UpdateNativeRestakingBalance {
                staker,
                asset,
                amount,
                response,
            } => {
                let result = self.execute(|engine, ctx| {
                    engine.update_native_restaking_balance(ctx, &staker, &asset, amount)
                });
                reply(response, result, "update_native_restaking_balance");
            }

            LedgerMessage::Deposit {
                staker,
                asset,
                amount,
                response,
            } => {
                let result = self.execute(|engine, ctx| {
                    crate::engine::validate_amount(amount)?;
                    engine.assets().apply_staker_delta(
                        ctx,
                        &staker,
                        &asset,
                        &StakerAssetDelta {
                            total_deposit_amount: amount,
                            withdrawable_amount: amount,
                            ..Default::default()
                        },
                    )
                });
                reply(response, result, "deposit");
            }

            LedgerMessage::Associate {
                staker,
                operator,
                response,
            } => {
                let result = self.execute(|engine, ctx| {
                    engine.associate_operator_with_staker(ctx, &staker, &operator)
                });
                reply(response, result, "associate");
            }

            LedgerMessage::Dissociate { staker, response } => {
                let result = self
                    .execute(|engine, ctx| engine.dissociate_operator_from_staker(ctx, &staker));
                reply(response, result, "dissociate");
            }

            LedgerMessage::IncrementHold { key, response } => {
                let result = self
                    .execute(|engine, ctx| engine.increment_undelegation_hold_count(ctx, &key));
                reply(response, result, "increment_hold");
            }

            LedgerMessage::DecrementHold { key, response } => {
                let result = self
                    .execute(|engine, ctx| engine.decrement_undelegation_hold_count(ctx, &key));
                reply(response, result, "decrement_hold");
            }

            LedgerMessage::SetReplay { replay, response } => {
                self.replay = replay;
                info!(replay, height = self.height, "Replay mode changed");
                let _ = response.send(Ok(()));
            }

            LedgerMessage::EndBlock { response } => {
                let result = self.end_block();
                reply(response, result, "end_block");
            }

            LedgerMessage::SingleDelegationInfo {
                staker,
                asset,
                operator,
                response,
            } => {
                let result = self.query(|engine, ctx| {
                    engine.single_delegation_info(ctx, &staker, &asset, &operator)
                });
                let _ = response.send(result);
            }

            LedgerMessage::DelegationInfo {
                staker,
                asset,
                response,
            } => {
                let result = self.query(|engine, ctx| engine.delegation_info(ctx, &staker, &asset));
                let _ = response.send(result);
            }

            LedgerMessage::StakerUndelegations {
                staker,
                asset,
                filter,
                response,
            } => {
                let result = self.query(|engine, ctx| {
                    engine.staker_undelegation_records(ctx, &staker, &asset, filter)
                });
                let _ = response.send(result);
            }

            LedgerMessage::UndelegationRecord { key, response } => {
                let result = self.query(|engine, ctx| engine.undelegation_record(ctx, &key));
                let _ = response.send(result);
            }

            LedgerMessage::UndelegationsAtHeight { height, response } => {
                let result = self.query(|engine, ctx| engine.undelegations_at_height(ctx, height));
                let _ = response.send(result);
            }

            LedgerMessage::AssociatedOperator { staker, response } => {
                let result = self.query(|engine, ctx| engine.associated_operator(ctx, &staker));
                let _ = response.send(result);
            }

            LedgerMessage::StakersByOperator {
                operator,
                asset,
                response,
            } => {
                let result =
                    self.query(|engine, ctx| engine.stakers_by_operator(ctx, &operator, &asset));
                let _ = response.send(result);
            }

            LedgerMessage::HoldCount { key, response } => {
                let result = self.query(|engine, ctx| engine.undelegation_hold_count(ctx, &key));
                let _ = response.send(result);
            }

            LedgerMessage::StakerBalance {
                staker,
                asset,
                response,
            } => {
                let result =
                    self.query(|engine, ctx| engine.assets().staker_balance(ctx, &staker, &asset));
                let _ = response.send(result);
            }

            LedgerMessage::OperatorBalance {
                operator,
                asset,
                response,
            } => {
                let result = self
                    .query(|engine, ctx| engine.assets().operator_balance(ctx, &operator, &asset));
                let _ = response.send(result);
            }

            LedgerMessage::CurrentHeight { response } => {
                let _ = response.send(Ok(self.height));
            }

            LedgerMessage::ExportGenesis { response } => {
                let result = self.query(|_, ctx| genesis::export_genesis(ctx));
                let _ = response.send(result);
            }

            LedgerMessage::AppHash { response } => {
                let _ = response.send(storage::app_hash(self.store.as_ref()));
            }

            LedgerMessage::Shutdown => {
                // Handled in run loop
            }
        }
    }
}

fn reply<T>(response: Reply<T>, result: Result<T>, operation: &'static str) {
    if let Err(e) = &result {
        if e.is_validation() {
            tracing::debug!(operation, error = %e, "Request rejected");
        } else {
            error!(operation, error = %e, "Request failed");
        }
    }
    let _ = response.send(result);
}

impl std::fmt::Debug for LedgerActor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerActor")
            .field("engine", &self.engine)
            .field("height", &self.height)
            .field("replay", &self.replay)
            .finish_non_exhaustive()
    }
}

/// Handle for sending messages to the actor
#[derive(Clone, Debug)]
pub struct LedgerHandle {
    sender: mpsc::Sender<LedgerMessage>,
}

impl LedgerHandle {
    /// Create new handle
    pub fn new(sender: mpsc::Sender<LedgerMessage>) -> Self {
        Self { sender }
    }

    async fn request<T>(&self, build: impl FnOnce(Reply<T>) -> LedgerMessage) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;

        rx.await
            .map_err(|_| Error::Concurrency("Response channel closed".to_string()))?
    }

    /// Delegate tokens to an operator
    pub async fn delegate(&self, params: DelegationParams) -> Result<Decimal> {
        self.request(|response| LedgerMessage::Delegate { params, response })
            .await
    }

    /// Undelegate tokens from an operator
    pub async fn undelegate(&self, params: DelegationParams) -> Result<RecordKey> {
        self.request(|response| LedgerMessage::Undelegate { params, response })
            .await
    }

    /// Credit or slash a natively restaked balance
    pub async fn update_native_restaking_balance(
        &self,
        staker: StakerId,
        asset: AssetId,
        amount: Decimal,
    ) -> Result<SlashOutcome> {
        self.request(|response| LedgerMessage::UpdateNativeRestakingBalance {
            staker,
            asset,
            amount,
            response,
        })
        .await
    }

    /// Credit a deposit
    pub async fn deposit(
        &self,
        staker: StakerId,
        asset: AssetId,
        amount: Decimal,
    ) -> Result<StakerAssetInfo> {
        self.request(|response| LedgerMessage::Deposit {
            staker,
            asset,
            amount,
            response,
        })
        .await
    }

    /// Associate a staker with an operator
    pub async fn associate(&self, staker: StakerId, operator: OperatorAddress) -> Result<()> {
        self.request(|response| LedgerMessage::Associate {
            staker,
            operator,
            response,
        })
        .await
    }

    /// Remove a staker's association
    pub async fn dissociate(&self, staker: StakerId) -> Result<OperatorAddress> {
        self.request(|response| LedgerMessage::Dissociate { staker, response })
            .await
    }

    /// Place a hold on an undelegation
    pub async fn increment_hold(&self, key: RecordKey) -> Result<u64> {
        self.request(|response| LedgerMessage::IncrementHold { key, response })
            .await
    }

    /// Release a hold on an undelegation
    pub async fn decrement_hold(&self, key: RecordKey) -> Result<u64> {
        self.request(|response| LedgerMessage::DecrementHold { key, response })
            .await
    }

    /// Enter or leave replay mode
    pub async fn set_replay(&self, replay: bool) -> Result<()> {
        self.request(|response| LedgerMessage::SetReplay { replay, response })
            .await
    }

    /// Close the current block
    pub async fn end_block(&self) -> Result<SweepReport> {
        self.request(|response| LedgerMessage::EndBlock { response })
            .await
    }

    /// One delegation
    pub async fn single_delegation_info(
        &self,
        staker: StakerId,
        asset: AssetId,
        operator: OperatorAddress,
    ) -> Result<SingleDelegationInfo> {
        self.request(|response| LedgerMessage::SingleDelegationInfo {
            staker,
            asset,
            operator,
            response,
        })
        .await
    }

    /// All delegations of a staker's asset
    pub async fn delegation_info(&self, staker: StakerId, asset: AssetId) -> Result<DelegationInfo> {
        self.request(|response| LedgerMessage::DelegationInfo {
            staker,
            asset,
            response,
        })
        .await
    }

    /// Undelegation records of a staker's asset
    pub async fn staker_undelegations(
        &self,
        staker: StakerId,
        asset: AssetId,
        filter: UndelegationFilter,
    ) -> Result<Vec<UndelegationRecord>> {
        self.request(|response| LedgerMessage::StakerUndelegations {
            staker,
            asset,
            filter,
            response,
        })
        .await
    }

    /// One undelegation record
    pub async fn undelegation_record(&self, key: RecordKey) -> Result<Option<UndelegationRecord>> {
        self.request(|response| LedgerMessage::UndelegationRecord { key, response })
            .await
    }

    /// Records maturing at a height
    pub async fn undelegations_at_height(&self, height: u64) -> Result<Vec<UndelegationRecord>> {
        self.request(|response| LedgerMessage::UndelegationsAtHeight { height, response })
            .await
    }

    /// Associated operator of a staker
    pub async fn associated_operator(&self, staker: StakerId) -> Result<Option<OperatorAddress>> {
        self.request(|response| LedgerMessage::AssociatedOperator { staker, response })
            .await
    }

    /// Stakers delegating an asset to an operator
    pub async fn stakers_by_operator(
        &self,
        operator: OperatorAddress,
        asset: AssetId,
    ) -> Result<Vec<StakerId>> {
        self.request(|response| LedgerMessage::StakersByOperator {
            operator,
            asset,
            response,
        })
        .await
    }

    /// Hold count of a record
    pub async fn hold_count(&self, key: RecordKey) -> Result<u64> {
        self.request(|response| LedgerMessage::HoldCount { key, response })
            .await
    }

    /// Staker balance
    pub async fn staker_balance(&self, staker: StakerId, asset: AssetId) -> Result<StakerAssetInfo> {
        self.request(|response| LedgerMessage::StakerBalance {
            staker,
            asset,
            response,
        })
        .await
    }

    /// Operator pool
    pub async fn operator_balance(
        &self,
        operator: OperatorAddress,
        asset: AssetId,
    ) -> Result<OperatorAssetInfo> {
        self.request(|response| LedgerMessage::OperatorBalance {
            operator,
            asset,
            response,
        })
        .await
    }

    /// Height the next request executes at
    pub async fn current_height(&self) -> Result<u64> {
        self.request(|response| LedgerMessage::CurrentHeight { response })
            .await
    }

    /// Snapshot the state
    pub async fn export_genesis(&self) -> Result<GenesisState> {
        self.request(|response| LedgerMessage::ExportGenesis { response })
            .await
    }

    /// Digest of the state
    pub async fn app_hash(&self) -> Result<[u8; 32]> {
        self.request(|response| LedgerMessage::AppHash { response })
            .await
    }

    /// Shutdown actor
    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(LedgerMessage::Shutdown)
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;
        Ok(())
    }
}

/// Spawn the ledger actor. The join handle resolves once the actor has
/// stopped and released the store.
pub fn spawn_ledger_actor(
    store: Box<dyn KvStore>,
    engine: DelegationEngine,
    mailbox_capacity: usize,
    initial_height: u64,
) -> Result<(LedgerHandle, JoinHandle<()>)> {
    let (tx, rx) = mpsc::channel(mailbox_capacity.max(1));
    let actor = LedgerActor::new(store, engine, rx, initial_height)?;

    let task = tokio::spawn(async move {
        actor.run().await;
    });

    Ok((LedgerHandle::new(tx), task))
}
