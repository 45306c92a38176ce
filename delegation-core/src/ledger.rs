//! Main ledger orchestration layer
//!
//! This module ties together storage, genesis import and the actor into a
//! high-level async API.
//!
//! # Example
//!
//! ```no_run
//! use delegation_core::{operators::OperatorSet, Config, HookSet, Ledger};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> delegation_core::Result<()> {
//!     let config = Config::default();
//!     let operators = Arc::new(OperatorSet::new());
//!     let ledger = Ledger::open(config, operators, HookSet::new()).await?;
//!
//!     // let minted = ledger.delegate_to(params).await?;
//!
//!     ledger.shutdown().await
//! }
//! ```

use rust_decimal::Decimal;
use std::path::Path;
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::{
    actor::{spawn_ledger_actor, LedgerHandle},
    assets::{AssetRegistry, AssetStore},
    context::Context,
    engine::DelegationEngine,
    genesis::{self, GenesisState},
    hooks::HookSet,
    metrics::Metrics,
    operators::OperatorRegistry,
    storage::{self, KvStore},
    types::{
        AssetId, BlockInfo, DelegationInfo, DelegationParams, OperatorAddress, OperatorAssetInfo,
        RecordKey, SingleDelegationInfo, SlashOutcome, StakerAssetInfo, StakerId, SweepReport,
        UndelegationFilter, UndelegationRecord,
    },
    Config, Error, Result,
};

/// Main ledger interface
#[derive(Debug)]
pub struct Ledger {
    /// Actor handle for async operations
    handle: LedgerHandle,

    /// Actor task
    task: JoinHandle<()>,

    /// Metrics shared with the engine
    metrics: Metrics,

    /// Configuration
    config: Config,
}

impl Ledger {
    /// Open ledger with the in-crate asset store
    pub async fn open(
        config: Config,
        operators: Arc<dyn OperatorRegistry>,
        hooks: HookSet,
    ) -> Result<Self> {
        Self::open_with_assets(config, operators, Arc::new(AssetStore::new()), hooks).await
    }

    /// Open ledger over an external asset registry
    pub async fn open_with_assets(
        config: Config,
        operators: Arc<dyn OperatorRegistry>,
        assets: Arc<dyn AssetRegistry>,
        hooks: HookSet,
    ) -> Result<Self> {
        let mut store = storage::open_store(&config)?;

        if let Some(path) = &config.genesis.import_path {
            import_genesis_if_empty(store.as_mut(), path, config.actor.initial_height)?;
        }

        let metrics =
            Metrics::new().map_err(|e| Error::Config(format!("Failed to create metrics: {}", e)))?;
        let engine = DelegationEngine::new(operators, assets)
            .with_hooks(hooks)
            .with_metrics(metrics.clone());

        let (handle, task) = spawn_ledger_actor(
            store,
            engine,
            config.actor.mailbox_capacity,
            config.actor.initial_height,
        )?;

        tracing::info!(
            service = %config.service_name,
            backend = ?config.storage.backend,
            "Ledger opened"
        );

        Ok(Self {
            handle,
            task,
            metrics,
            config,
        })
    }

    /// Actor handle, for callers that want to share it
    pub fn handle(&self) -> &LedgerHandle {
        &self.handle
    }

    /// Metrics collector
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Delegate tokens to an operator; returns the shares minted
    pub async fn delegate_to(&self, params: DelegationParams) -> Result<Decimal> {
        self.handle.delegate(params).await
    }

    /// Start an undelegation; returns the record key
    pub async fn undelegate_from(&self, params: DelegationParams) -> Result<RecordKey> {
        self.handle.undelegate(params).await
    }

    /// Credit or slash a natively restaked balance
    pub async fn update_native_restaking_balance(
        &self,
        staker: StakerId,
        asset: AssetId,
        amount: Decimal,
    ) -> Result<SlashOutcome> {
        self.handle
            .update_native_restaking_balance(staker, asset, amount)
            .await
    }

    /// Credit a deposit to a staker's withdrawable balance
    pub async fn deposit(
        &self,
        staker: StakerId,
        asset: AssetId,
        amount: Decimal,
    ) -> Result<StakerAssetInfo> {
        self.handle.deposit(staker, asset, amount).await
    }

    /// Associate a staker with an operator
    pub async fn associate_operator_with_staker(
        &self,
        staker: StakerId,
        operator: OperatorAddress,
    ) -> Result<()> {
        self.handle.associate(staker, operator).await
    }

    /// Remove a staker's association
    pub async fn dissociate_operator_from_staker(&self, staker: StakerId) -> Result<OperatorAddress> {
        self.handle.dissociate(staker).await
    }

    /// Place a hold on an undelegation
    pub async fn increment_undelegation_hold_count(&self, key: RecordKey) -> Result<u64> {
        self.handle.increment_hold(key).await
    }

    /// Release a hold on an undelegation
    pub async fn decrement_undelegation_hold_count(&self, key: RecordKey) -> Result<u64> {
        self.handle.decrement_hold(key).await
    }

    /// Outstanding holds on an undelegation
    pub async fn undelegation_hold_count(&self, key: RecordKey) -> Result<u64> {
        self.handle.hold_count(key).await
    }

    /// Enter or leave replay mode (frozen-operator checks are skipped)
    pub async fn set_replay(&self, replay: bool) -> Result<()> {
        self.handle.set_replay(replay).await
    }

    /// Close the current block
    pub async fn end_block(&self) -> Result<SweepReport> {
        self.handle.end_block().await
    }

    /// Height the next request executes at
    pub async fn current_height(&self) -> Result<u64> {
        self.handle.current_height().await
    }

    /// One delegation
    pub async fn single_delegation_info(
        &self,
        staker: StakerId,
        asset: AssetId,
        operator: OperatorAddress,
    ) -> Result<SingleDelegationInfo> {
        self.handle
            .single_delegation_info(staker, asset, operator)
            .await
    }

    /// All delegations of a staker's asset
    pub async fn delegation_info(&self, staker: StakerId, asset: AssetId) -> Result<DelegationInfo> {
        self.handle.delegation_info(staker, asset).await
    }

    /// Undelegation records of a staker's asset
    pub async fn staker_undelegation_records(
        &self,
        staker: StakerId,
        asset: AssetId,
        filter: UndelegationFilter,
    ) -> Result<Vec<UndelegationRecord>> {
        self.handle.staker_undelegations(staker, asset, filter).await
    }

    /// One undelegation record
    pub async fn undelegation_record(&self, key: RecordKey) -> Result<Option<UndelegationRecord>> {
        self.handle.undelegation_record(key).await
    }

    /// Records waiting to mature at a height
    pub async fn undelegations_at_height(&self, height: u64) -> Result<Vec<UndelegationRecord>> {
        self.handle.undelegations_at_height(height).await
    }

    /// Associated operator of a staker
    pub async fn associated_operator(&self, staker: StakerId) -> Result<Option<OperatorAddress>> {
        self.handle.associated_operator(staker).await
    }

    /// Stakers delegating an asset to an operator
    pub async fn stakers_by_operator(
        &self,
        operator: OperatorAddress,
        asset: AssetId,
    ) -> Result<Vec<StakerId>> {
        self.handle.stakers_by_operator(operator, asset).await
    }

    /// Staker balance
    pub async fn staker_balance(&self, staker: StakerId, asset: AssetId) -> Result<StakerAssetInfo> {
        self.handle.staker_balance(staker, asset).await
    }

    /// Operator pool
    pub async fn operator_balance(
        &self,
        operator: OperatorAddress,
        asset: AssetId,
    ) -> Result<OperatorAssetInfo> {
        self.handle.operator_balance(operator, asset).await
    }

    /// Snapshot the state
    pub async fn export_genesis(&self) -> Result<GenesisState> {
        self.handle.export_genesis().await
    }

    /// Snapshot the state into a JSON file
    pub async fn export_genesis_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let state = self.handle.export_genesis().await?;
        state.to_file(path.as_ref())?;
        tracing::info!(path = %path.as_ref().display(), "Genesis exported");
        Ok(())
    }

    /// SHA-256 digest of the state
    pub async fn app_hash(&self) -> Result<[u8; 32]> {
        self.handle.app_hash().await
    }

    /// Stop the actor and wait for it to release the store
    pub async fn shutdown(self) -> Result<()> {
        self.handle.shutdown().await?;
        self.task
            .await
            .map_err(|e| Error::Concurrency(format!("Ledger actor panicked: {}", e)))
    }
}

fn import_genesis_if_empty(store: &mut dyn KvStore, path: &Path, height: u64) -> Result<()> {
    if !store.scan_prefix(&[])?.is_empty() {
        tracing::info!(path = %path.display(), "Store not empty, genesis import skipped");
        return Ok(());
    }

    let state = GenesisState::from_file(path)?;
    let mut ctx = Context::new(store, BlockInfo::at(height));
    genesis::init_genesis(&mut ctx, &state)?;
    ctx.commit()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::StorageBackend,
        operators::OperatorSet,
        types::TxHash,
    };
    use rust_decimal_macros::dec;

    fn memory_config() -> Config {
        let mut config = Config::default();
        config.storage.backend = StorageBackend::Memory;
        config
    }

    fn operators() -> Arc<OperatorSet> {
        let operators = Arc::new(OperatorSet::new());
        operators.register(OperatorAddress::new("op1").unwrap(), 1);
        operators
    }

    fn params(amount: Decimal, nonce: u64) -> DelegationParams {
        DelegationParams {
            client_chain_id: 1,
            asset_address: vec![0xaa; 20],
            staker_address: vec![0x01; 20],
            operator: OperatorAddress::new("op1").unwrap(),
            amount,
            tx_hash: TxHash([nonce as u8; 32]),
            tx_nonce: nonce,
        }
    }

    #[tokio::test]
    async fn test_ledger_open_memory() {
        let ledger = Ledger::open(memory_config(), operators(), HookSet::new())
            .await
            .unwrap();
        assert_eq!(ledger.current_height().await.unwrap(), 1);
        ledger.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_delegate_and_query() {
        let ledger = Ledger::open(memory_config(), operators(), HookSet::new())
            .await
            .unwrap();
        let p = params(dec!(25), 1);
        let staker = p.staker_id().unwrap();
        let asset = p.asset_id().unwrap();

        ledger
            .deposit(staker.clone(), asset.clone(), dec!(25))
            .await
            .unwrap();
        assert_eq!(ledger.delegate_to(p.clone()).await.unwrap(), dec!(25));

        let info = ledger
            .delegation_info(staker.clone(), asset.clone())
            .await
            .unwrap();
        assert_eq!(info.total_delegated_amount, dec!(25));
        assert_eq!(
            ledger
                .stakers_by_operator(p.operator.clone(), asset)
                .await
                .unwrap(),
            vec![staker]
        );
        assert_eq!(ledger.metrics().delegations_total.get(), 1);

        ledger.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_rocksdb_state_survives_restart() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();

        let p = params(dec!(10), 1);
        let staker = p.staker_id().unwrap();
        let asset = p.asset_id().unwrap();

        let hash = {
            let ledger = Ledger::open(config.clone(), operators(), HookSet::new())
                .await
                .unwrap();
            ledger
                .deposit(staker.clone(), asset.clone(), dec!(10))
                .await
                .unwrap();
            ledger.delegate_to(p.clone()).await.unwrap();
            ledger.end_block().await.unwrap();
            let hash = ledger.app_hash().await.unwrap();
            ledger.shutdown().await.unwrap();
            hash
        };

        let ledger = Ledger::open(config, operators(), HookSet::new())
            .await
            .unwrap();
        assert_eq!(ledger.current_height().await.unwrap(), 2);
        assert_eq!(ledger.app_hash().await.unwrap(), hash);
        let info = ledger
            .single_delegation_info(staker, asset, p.operator)
            .await
            .unwrap();
        assert_eq!(info.undelegatable_share, dec!(10));
        ledger.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_genesis_import_on_open() {
        let temp_dir = tempfile::tempdir().unwrap();
        let genesis_path = temp_dir.path().join("genesis.json");

        let p = params(dec!(10), 1);
        let staker = p.staker_id().unwrap();
        let asset = p.asset_id().unwrap();

        let source = Ledger::open(memory_config(), operators(), HookSet::new())
            .await
            .unwrap();
        source
            .deposit(staker.clone(), asset.clone(), dec!(10))
            .await
            .unwrap();
        source.delegate_to(p.clone()).await.unwrap();
        source.export_genesis_to(&genesis_path).await.unwrap();
        let expected = source.app_hash().await.unwrap();
        source.shutdown().await.unwrap();

        let mut config = memory_config();
        config.genesis.import_path = Some(genesis_path);
        let imported = Ledger::open(config, operators(), HookSet::new())
            .await
            .unwrap();
        assert_eq!(imported.app_hash().await.unwrap(), expected);
        assert_eq!(
            imported
                .staker_balance(staker, asset)
                .await
                .unwrap()
                .withdrawable_amount,
            dec!(0)
        );
        imported.shutdown().await.unwrap();
    }
}
