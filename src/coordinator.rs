//! Orchestration context
//!
//! `Network` exposes one entry point per business operation. Each operation
//! builds the ledger-appropriate transaction, runs it through the submission
//! pipeline with the hooks currently registered, and returns the receipt.
//! `Ok(None)` means a hook vetoed the run.
//!
//! Operations for the same sender race on nonce and output selection when run
//! concurrently. Either serialize them in the caller or enable
//! `serialize_per_identity`, which holds a per-address lock for each leg.

use crate::builder::{AccountTxBuilder, UtxoTxBuilder};
use crate::chain::LedgerClient;
use crate::config::CoordinatorConfig;
use crate::contracts::{
    self, encode, ContractRegistry, IDistributionToDelegators, IGovernanceVotePower, IRNat,
    IRewardManager, IValidatorRewardManager, IWNat, NamedContract, StakeLimits,
};
use crate::fee::{AccountFees, FeeEstimator};
use crate::lifecycle::{
    AfterConfirmation, AfterSubmission, BeforeSignature, BeforeSubmission, LifecycleHooks, TxKind,
};
use crate::multisig::{created_address, GroupAccount, MultisigCoordinator, TargetCall};
use crate::poller::ConfirmationPoller;
use crate::signer::SigningIdentity;
use crate::submission::{system_time_ms, SubmissionPipeline, TimeFn};
use crate::transfer::{CrossLedgerTransferCoordinator, CrossLedgerTransferPlan, TransferReport};
use crate::types::{LedgerKind, NodeId, TxReceipt, UtxoAddress, UtxoTx};
use crate::units::{to_nano, to_wei};
use crate::{Error, Result};
use alloy_primitives::{Address, Bytes, U256};
use alloy_sol_types::SolCall;
use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

/// Reward owner, recipient and wrapping of a claim. Owner and recipient
/// default to the acting account.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClaimOptions {
    /// Account whose rewards are claimed
    pub reward_owner: Option<Address>,
    /// Account receiving the claimed rewards
    pub recipient: Option<Address>,
    /// Pay out as wrapped tokens
    pub wrap: bool,
}

/// Holdings of one identity across both ledgers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Balance {
    /// Wei
    pub account: U256,
    /// Wrapped native token, wei
    pub wrapped: U256,
    /// Spendable U-ledger outputs, nano units
    pub utxo: u64,
    /// Stake locked on the U-ledger, nano units
    pub staked: u64,
    /// Exported from the A-ledger, not yet imported on the U-ledger
    pub unimported_to_utxo: u64,
    /// Exported from the U-ledger, not yet imported on the A-ledger
    pub unimported_to_account: u64,
}

/// Orchestration context for one network
pub struct Network<C> {
    client: Arc<C>,

    config: CoordinatorConfig,

    hooks: LifecycleHooks,

    /// Per-sender serialization points, used when enabled in the config.
    /// Locks nobody holds or waits on are dropped on the next acquisition.
    identity_locks: DashMap<Address, Arc<Mutex<()>>>,

    current_time_fn: TimeFn,
}

impl<C: LedgerClient> Network<C> {
    /// Validates `config` and builds a context without hooks
    pub fn new(client: Arc<C>, config: CoordinatorConfig) -> Result<Self> {
        config.validate()?;
        info!("Coordinator ready for network {}", config.network);
        Ok(Self {
            client,
            config,
            hooks: LifecycleHooks::new(),
            identity_locks: DashMap::new(),
            current_time_fn: Arc::new(system_time_ms),
        })
    }

    /// Set the current time function (for testing)
    pub fn with_time_fn(mut self, f: TimeFn) -> Self {
        self.current_time_fn = f;
        self
    }

    /// Get the configuration
    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Get the chain client
    pub fn client(&self) -> &C {
        &self.client
    }

    /// Get the registered hooks
    pub fn hooks(&self) -> &LifecycleHooks {
        &self.hooks
    }

    /// Registers the veto point run before signing
    pub fn set_before_signature<F, Fut>(&mut self, hook: F)
    where
        F: Fn(BeforeSignature) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        self.hooks.set_before_signature(hook);
    }

    /// Registers the veto point run before broadcasting
    pub fn set_before_submission<F, Fut>(&mut self, hook: F)
    where
        F: Fn(BeforeSubmission) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        self.hooks.set_before_submission(hook);
    }

    /// Registers the notification fired once the node returns an id
    pub fn set_after_submission<F, Fut>(&mut self, hook: F)
    where
        F: Fn(AfterSubmission) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.hooks.set_after_submission(hook);
    }

    /// Registers the notification fired on a final status
    pub fn set_after_confirmation<F, Fut>(&mut self, hook: F)
    where
        F: Fn(AfterConfirmation) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.hooks.set_after_confirmation(hook);
    }

    /// Removes the before-signature hook
    pub fn clear_before_signature(&mut self) {
        self.hooks.clear_before_signature();
    }

    /// Removes the before-submission hook
    pub fn clear_before_submission(&mut self) {
        self.hooks.clear_before_submission();
    }

    /// Removes the after-submission hook
    pub fn clear_after_submission(&mut self) {
        self.hooks.clear_after_submission();
    }

    /// Removes the after-confirmation hook
    pub fn clear_after_confirmation(&mut self) {
        self.hooks.clear_after_confirmation();
    }

    /// Pipeline over a snapshot of the current hooks
    pub fn pipeline(&self) -> SubmissionPipeline<'_, C> {
        let poller = ConfirmationPoller::new(
            self.config.confirmation_interval(),
            self.config.confirmation_timeout(),
        );
        SubmissionPipeline::new(self.client.as_ref(), self.hooks.clone(), poller)
            .with_time_fn(self.current_time_fn.clone())
    }

    fn now_secs(&self) -> u64 {
        (self.current_time_fn)() / 1_000
    }

    async fn serialize(&self, sender: Address) -> Option<OwnedMutexGuard<()>> {
        if !self.config.serialize_per_identity {
            return None;
        }
        self.identity_locks
            .retain(|_, lock| Arc::strong_count(lock) > 1);
        let lock = self.identity_locks.entry(sender).or_default().value().clone();
        Some(lock.lock_owned().await)
    }

    /// The group account if the identity acts through one, its own address otherwise
    pub fn acting_address(identity: &dyn SigningIdentity) -> Address {
        identity
            .group_account()
            .unwrap_or_else(|| identity.key().account_address())
    }

    fn multisig(&self) -> MultisigCoordinator<'_, C> {
        MultisigCoordinator::new(self.client.as_ref(), &self.config.safe)
    }

    async fn utxo_builder(&self) -> Result<UtxoTxBuilder<'_, C>> {
        let ids = self.client.ledger_ids().await?;
        Ok(UtxoTxBuilder::new(self.client.as_ref(), &self.config, ids, self.now_secs()))
    }

    // ----- reads -----

    /// Registry address of the contract called `name`
    pub async fn contract_address(&self, name: &str) -> Result<Address> {
        ContractRegistry::new(self.client.as_ref(), self.config.contract_registry)
            .address_of(name)
            .await
    }

    /// Every contract the registry lists
    pub async fn contracts(&self) -> Result<Vec<NamedContract>> {
        ContractRegistry::new(self.client.as_ref(), self.config.contract_registry)
            .all_contracts()
            .await
    }

    /// Read-only call of any contract
    pub async fn read_contract<Call: SolCall + Send>(&self, to: Address, call: Call) -> Result<Call::Return> {
        contracts::read(self.client.as_ref(), to, call).await
    }

    /// Current EIP-1559 fee values
    pub async fn account_fees(&self) -> Result<AccountFees> {
        FeeEstimator::new(self.client.as_ref(), &self.config)
            .account_fees()
            .await
    }

    /// Base fee in wei for atomic transactions
    pub async fn atomic_base_fee(&self) -> Result<u128> {
        FeeEstimator::new(self.client.as_ref(), &self.config).base_fee().await
    }

    /// Native balance in wei
    pub async fn account_balance(&self, address: Address) -> Result<U256> {
        Ok(self.client.account_balance(address).await?)
    }

    /// Wrapped native balance in wei
    pub async fn wrapped_balance(&self, address: Address) -> Result<U256> {
        let wnat = self.contract_address(contracts::WNAT).await?;
        self.read_contract(wnat, IWNat::balanceOfCall { account: address })
            .await
    }

    /// Outputs `owner` can spend alone right now, nano units
    pub async fn utxo_balance(&self, owner: UtxoAddress) -> Result<u64> {
        self.utxo_builder().await?.spendable_balance(owner).await
    }

    /// Stake locked by `owner`, nano units
    pub async fn staked_balance(&self, owner: UtxoAddress) -> Result<u64> {
        Ok(self.client.staked_balance(owner).await?)
    }

    /// Exported from the A-ledger, waiting for import on the U-ledger
    pub async fn unimported_to_utxo(&self, owner: UtxoAddress) -> Result<u64> {
        let ids = self.client.ledger_ids().await?;
        let pending = self
            .client
            .utxos(LedgerKind::Utxo, owner, Some(ids.account_ledger))
            .await?;
        Ok(pending.iter().map(|u| u.amount).sum())
    }

    /// Exported from the U-ledger, waiting for import on the A-ledger
    pub async fn unimported_to_account(&self, owner: UtxoAddress) -> Result<u64> {
        let ids = self.client.ledger_ids().await?;
        let pending = self
            .client
            .utxos(LedgerKind::Account, owner, Some(ids.utxo_ledger))
            .await?;
        Ok(pending.iter().map(|u| u.amount).sum())
    }

    /// U-ledger fields stay zero for identities without a public key
    pub async fn balance(&self, identity: &dyn SigningIdentity) -> Result<Balance> {
        let address = identity.key().account_address();
        let mut balance = Balance {
            account: self.account_balance(address).await?,
            wrapped: self.wrapped_balance(address).await?,
            ..Default::default()
        };
        if let Ok(owner) = identity.key().utxo_address() {
            balance.utxo = self.utxo_balance(owner).await?;
            balance.staked = self.staked_balance(owner).await?;
            balance.unimported_to_utxo = self.unimported_to_utxo(owner).await?;
            balance.unimported_to_account = self.unimported_to_account(owner).await?;
        }
        Ok(balance)
    }

    /// Sum over the months from the next claimable one to the last open one
    pub async fn claimable_flaredrop(&self, owner: Address) -> Result<U256> {
        let distribution = self.contract_address(contracts::DISTRIBUTION_TO_DELEGATORS).await?;
        let months = self
            .read_contract(distribution, IDistributionToDelegators::getClaimableMonthsCall {})
            .await?;
        let next = self
            .read_contract(
                distribution,
                IDistributionToDelegators::nextClaimableMonthCall {
                    _rewardOwner: owner,
                },
            )
            .await?;

        let mut total = U256::ZERO;
        let mut month = next;
        while month <= months._endMonth {
            total += self
                .read_contract(
                    distribution,
                    IDistributionToDelegators::getClaimableAmountOfCall {
                        _account: owner,
                        _month: month,
                    },
                )
                .await?;
            month += U256::from(1u64);
        }
        Ok(total)
    }

    /// Total minus already claimed validator rewards
    pub async fn claimable_staking_reward(&self, owner: Address) -> Result<U256> {
        let manager = self.contract_address(contracts::VALIDATOR_REWARD_MANAGER).await?;
        let state = self
            .read_contract(
                manager,
                IValidatorRewardManager::getStateOfRewardsCall {
                    _beneficiary: owner,
                },
            )
            .await?;
        Ok(state._totalReward.saturating_sub(state._claimedReward))
    }

    /// Sum of the initialised reward states
    pub async fn claimable_ftso_reward(&self, owner: Address) -> Result<U256> {
        let states = self.ftso_reward_states(owner).await?;
        Ok(states
            .iter()
            .filter(|s| s.initialised)
            .map(|s| U256::from(s.amount))
            .fold(U256::ZERO, |acc, amount| acc + amount))
    }

    async fn ftso_reward_states(&self, owner: Address) -> Result<Vec<IRewardManager::RewardState>> {
        let manager = self.contract_address(contracts::REWARD_MANAGER).await?;
        let states = self
            .read_contract(
                manager,
                IRewardManager::getStateOfRewardsCall {
                    _rewardOwner: owner,
                },
            )
            .await?;
        Ok(states.into_iter().flatten().collect())
    }

    /// Claimable RNat rewards over every project
    pub async fn claimable_rnat_reward(&self, owner: Address) -> Result<U256> {
        let rnat = self.contract_address(contracts::RNAT).await?;
        let mut total = U256::ZERO;
        for project in self.rnat_projects(rnat).await? {
            let claimable = self
                .read_contract(
                    rnat,
                    IRNat::getClaimableRewardsCall {
                        _projectId: project,
                        _owner: owner,
                    },
                )
                .await?;
            total += U256::from(claimable);
        }
        Ok(total)
    }

    async fn rnat_projects(&self, rnat: Address) -> Result<Vec<U256>> {
        let info = self
            .read_contract(rnat, IRNat::getProjectsBasicInfoCall {})
            .await?;
        Ok((0..info._names.len() as u64).map(U256::from).collect())
    }

    /// Current FTSO delegations as (delegatee, bips)
    pub async fn ftso_delegates(&self, owner: Address) -> Result<Vec<(Address, U256)>> {
        let wnat = self.contract_address(contracts::WNAT).await?;
        let delegates = self
            .read_contract(wnat, IWNat::delegatesOfCall { _owner: owner })
            .await?;
        Ok(delegates
            ._delegateAddresses
            .into_iter()
            .zip(delegates._bips)
            .collect())
    }

    /// Account `owner` delegates governance vote power to. Zero when none.
    pub async fn governance_delegate(&self, owner: Address) -> Result<Address> {
        let vote_power = self.governance_vote_power().await?;
        self.read_contract(vote_power, IGovernanceVotePower::getDelegateOfAtNowCall { _who: owner })
            .await
    }

    async fn governance_vote_power(&self) -> Result<Address> {
        let wnat = self.contract_address(contracts::WNAT).await?;
        self.read_contract(wnat, IWNat::governanceVotePowerCall {}).await
    }

    /// Staking bounds read from the stake verifier
    pub async fn stake_limits(&self) -> Result<StakeLimits> {
        let verifier = self.contract_address(contracts::STAKE_VERIFIER).await?;
        StakeLimits::fetch(self.client.as_ref(), verifier).await
    }

    /// Owners, threshold and nonce of a group account
    pub async fn group_account(&self, address: Address) -> Result<GroupAccount> {
        self.multisig().inspect(address).await
    }

    // ----- A-ledger runs -----

    /// Builds and runs a call, routed through the identity's group account if it has one
    async fn run_call(
        &self,
        kind: TxKind,
        identity: &dyn SigningIdentity,
        to: Address,
        value: U256,
        data: Bytes,
    ) -> Result<Option<TxReceipt>> {
        let sender = identity.key().account_address();
        let call = match identity.group_account() {
            Some(group) => {
                let proposal = self
                    .multisig()
                    .propose(group, sender, TargetCall { to, value, data })
                    .await?;
                info!(
                    "Routing {} through group {} ({} of {} approvals)",
                    kind,
                    group,
                    proposal.approval_count(),
                    proposal.group.threshold
                );
                proposal.group_call()
            }
            None => TargetCall { to, value, data },
        };

        let _guard = self.serialize(sender).await;
        let tx = AccountTxBuilder::new(self.client.as_ref(), &self.config)
            .build(sender, call.to, call.value, call.data)
            .await?;
        self.pipeline().run_account(kind, identity, tx).await
    }

    async fn run_utxo_tx(
        &self,
        kind: TxKind,
        identity: &dyn SigningIdentity,
        tx: UtxoTx,
        ledger: LedgerKind,
    ) -> Result<Option<TxReceipt>> {
        info!("Submitting {} on {}", kind, ledger);
        self.pipeline().run_utxo(kind, identity, tx, ledger).await
    }

    /// Sends `amount` wei with a fixed gas limit, or through the group account
    pub async fn transfer_native(
        &self,
        identity: &dyn SigningIdentity,
        to: Address,
        amount: U256,
    ) -> Result<Option<TxReceipt>> {
        if identity.group_account().is_some() {
            return self
                .run_call(TxKind::TransferNative, identity, to, amount, Bytes::new())
                .await;
        }
        let sender = identity.key().account_address();
        let _guard = self.serialize(sender).await;
        let tx = AccountTxBuilder::new(self.client.as_ref(), &self.config)
            .transfer(sender, to, amount)
            .await?;
        self.pipeline()
            .run_account(TxKind::TransferNative, identity, tx)
            .await
    }

    /// Sends the whole balance; gas comes out of it unless a group account pays
    pub async fn wipe_native(&self, identity: &dyn SigningIdentity, to: Address) -> Result<Option<TxReceipt>> {
        if let Some(group) = identity.group_account() {
            let balance = self.client.account_balance(group).await?;
            return self
                .run_call(TxKind::TransferNative, identity, to, balance, Bytes::new())
                .await;
        }
        let sender = identity.key().account_address();
        let _guard = self.serialize(sender).await;
        let tx = AccountTxBuilder::new(self.client.as_ref(), &self.config)
            .wipe(sender, to)
            .await?;
        self.pipeline()
            .run_account(TxKind::TransferNative, identity, tx)
            .await
    }

    /// Transfers wrapped tokens to `to`
    pub async fn transfer_wrapped(
        &self,
        identity: &dyn SigningIdentity,
        to: Address,
        amount: U256,
    ) -> Result<Option<TxReceipt>> {
        let wnat = self.contract_address(contracts::WNAT).await?;
        let data = encode(IWNat::transferCall {
            recipient: to,
            amount,
        });
        self.run_call(TxKind::TransferWrapped, identity, wnat, U256::ZERO, data)
            .await
    }

    /// Deposits `amount` wei into the wrapped token
    pub async fn wrap(&self, identity: &dyn SigningIdentity, amount: U256) -> Result<Option<TxReceipt>> {
        let wnat = self.contract_address(contracts::WNAT).await?;
        self.run_call(TxKind::Wrap, identity, wnat, amount, encode(IWNat::depositCall {}))
            .await
    }

    /// Withdraws `amount` of wrapped tokens back to native
    pub async fn unwrap(&self, identity: &dyn SigningIdentity, amount: U256) -> Result<Option<TxReceipt>> {
        let wnat = self.contract_address(contracts::WNAT).await?;
        let data = encode(IWNat::withdrawCall { amount });
        self.run_call(TxKind::Unwrap, identity, wnat, U256::ZERO, data)
            .await
    }

    /// Claims every open FlareDrop month. Runs even when nothing is claimable.
    pub async fn claim_flaredrop(
        &self,
        identity: &dyn SigningIdentity,
        options: ClaimOptions,
    ) -> Result<Option<TxReceipt>> {
        let (owner, recipient) = self.claim_parties(identity, &options);
        let distribution = self.contract_address(contracts::DISTRIBUTION_TO_DELEGATORS).await?;
        let months = self
            .read_contract(distribution, IDistributionToDelegators::getClaimableMonthsCall {})
            .await?;
        debug!("Claiming FlareDrop for {} up to month {}", owner, months._endMonth);
        let data = encode(IDistributionToDelegators::claimCall {
            _rewardOwner: owner,
            _recipient: recipient,
            _month: months._endMonth,
            _wrap: options.wrap,
        });
        self.run_call(TxKind::ClaimFlareDropReward, identity, distribution, U256::ZERO, data)
            .await
    }

    /// Claims the unclaimed validator rewards. Runs even when nothing is claimable.
    pub async fn claim_staking_reward(
        &self,
        identity: &dyn SigningIdentity,
        options: ClaimOptions,
    ) -> Result<Option<TxReceipt>> {
        let (owner, recipient) = self.claim_parties(identity, &options);
        let manager = self.contract_address(contracts::VALIDATOR_REWARD_MANAGER).await?;
        let amount = self.claimable_staking_reward(owner).await?;
        if amount.is_zero() {
            warn!("No staking rewards to claim for {}", owner);
        }
        let data = encode(IValidatorRewardManager::claimCall {
            _rewardOwner: owner,
            _recipient: recipient,
            _rewardAmount: amount,
            _wrap: options.wrap,
        });
        self.run_call(TxKind::ClaimStakingReward, identity, manager, U256::ZERO, data)
            .await
    }

    /// Claims FTSO rewards up to the latest epoch with a reward state
    pub async fn claim_ftso_reward(
        &self,
        identity: &dyn SigningIdentity,
        options: ClaimOptions,
        proofs: Vec<IRewardManager::RewardClaimWithProof>,
    ) -> Result<Option<TxReceipt>> {
        let (owner, recipient) = self.claim_parties(identity, &options);
        let manager = self.contract_address(contracts::REWARD_MANAGER).await?;
        let epoch = self
            .ftso_reward_states(owner)
            .await?
            .into_iter()
            .map(|s| s.rewardEpochId)
            .max()
            .ok_or_else(|| {
                Error::InvalidParameter(format!("no FTSO reward epochs recorded for {owner}"))
            })?;
        let data = encode(IRewardManager::claimCall {
            _rewardOwner: owner,
            _recipient: recipient,
            _rewardEpochId: epoch,
            _wrap: options.wrap,
            _proofs: proofs,
        });
        self.run_call(TxKind::ClaimFtsoReward, identity, manager, U256::ZERO, data)
            .await
    }

    /// Claims RNat rewards of the given projects, or of all projects when empty
    pub async fn claim_rnat_reward(
        &self,
        identity: &dyn SigningIdentity,
        project_ids: &[u64],
    ) -> Result<Option<TxReceipt>> {
        let rnat = self.contract_address(contracts::RNAT).await?;
        let projects = if project_ids.is_empty() {
            self.rnat_projects(rnat).await?
        } else {
            project_ids.iter().copied().map(U256::from).collect()
        };
        let month = self
            .read_contract(rnat, IRNat::getCurrentMonthCall {})
            .await?;
        let data = encode(IRNat::claimRewardsCall {
            _projectIds: projects,
            _month: month,
        });
        self.run_call(TxKind::ClaimRNatReward, identity, rnat, U256::ZERO, data)
            .await
    }

    /// Withdraws unlocked funds from the RNat account; defaults to everything unlocked
    pub async fn withdraw_from_rnat(
        &self,
        identity: &dyn SigningIdentity,
        amount: Option<U256>,
        wrap: bool,
    ) -> Result<Option<TxReceipt>> {
        let rnat = self.contract_address(contracts::RNAT).await?;
        let amount = match amount {
            Some(amount) => amount,
            None => {
                let owner = Self::acting_address(identity);
                let balances = self
                    .read_contract(rnat, IRNat::getBalancesOfCall { _owner: owner })
                    .await?;
                balances._wNatBalance.saturating_sub(balances._lockedBalance)
            }
        };
        let amount = u128::try_from(amount)
            .map_err(|_| Error::InvalidParameter(format!("withdrawal {amount} out of range")))?;
        let data = encode(IRNat::withdrawCall {
            _amount: amount,
            _wrap: wrap,
        });
        self.run_call(TxKind::WithdrawFromRNatAccount, identity, rnat, U256::ZERO, data)
            .await
    }

    /// Withdraws everything, locked funds included
    pub async fn withdraw_all_from_rnat(&self, identity: &dyn SigningIdentity, wrap: bool) -> Result<Option<TxReceipt>> {
        let rnat = self.contract_address(contracts::RNAT).await?;
        let data = encode(IRNat::withdrawAllCall { _wrap: wrap });
        self.run_call(TxKind::WithdrawFromRNatAccount, identity, rnat, U256::ZERO, data)
            .await
    }

    /// Replaces the FTSO delegations with `delegations` (delegatee, bips)
    pub async fn delegate_ftso(
        &self,
        identity: &dyn SigningIdentity,
        delegations: &[(Address, u64)],
    ) -> Result<Option<TxReceipt>> {
        if delegations.is_empty() {
            return Err(Error::InvalidParameter("no FTSO delegatees given".to_string()));
        }
        let total: u64 = delegations.iter().map(|(_, bips)| bips).sum();
        if total > 10_000 {
            return Err(Error::InvalidParameter(format!(
                "delegations add up to {total} bips"
            )));
        }
        let wnat = self.contract_address(contracts::WNAT).await?;

        if self.config.batch_ftso_delegation {
            let data = encode(IWNat::batchDelegateCall {
                _delegatees: delegations.iter().map(|(to, _)| *to).collect(),
                _bips: delegations.iter().map(|(_, bips)| U256::from(*bips)).collect(),
            });
            return self
                .run_call(TxKind::DelegateFtso, identity, wnat, U256::ZERO, data)
                .await;
        }

        if self
            .run_call(
                TxKind::UndelegateFtso,
                identity,
                wnat,
                U256::ZERO,
                encode(IWNat::undelegateAllCall {}),
            )
            .await?
            .is_none()
        {
            return Ok(None);
        }
        let mut last = None;
        for (to, bips) in delegations {
            let data = encode(IWNat::delegateCall {
                _to: *to,
                _bips: U256::from(*bips),
            });
            last = self
                .run_call(TxKind::DelegateFtso, identity, wnat, U256::ZERO, data)
                .await?;
            if last.is_none() {
                return Ok(None);
            }
        }
        Ok(last)
    }

    /// Revokes every FTSO delegation
    pub async fn undelegate_ftso(&self, identity: &dyn SigningIdentity) -> Result<Option<TxReceipt>> {
        let wnat = self.contract_address(contracts::WNAT).await?;
        self.run_call(
            TxKind::UndelegateFtso,
            identity,
            wnat,
            U256::ZERO,
            encode(IWNat::undelegateAllCall {}),
        )
        .await
    }

    /// Delegates all governance vote power to `to`
    pub async fn delegate_governance(&self, identity: &dyn SigningIdentity, to: Address) -> Result<Option<TxReceipt>> {
        let vote_power = self.governance_vote_power().await?;
        let data = encode(IGovernanceVotePower::delegateCall { _to: to });
        self.run_call(TxKind::DelegateGovernance, identity, vote_power, U256::ZERO, data)
            .await
    }

    /// Revokes the governance delegation
    pub async fn undelegate_governance(&self, identity: &dyn SigningIdentity) -> Result<Option<TxReceipt>> {
        let vote_power = self.governance_vote_power().await?;
        let data = encode(IGovernanceVotePower::undelegateCall {});
        self.run_call(TxKind::UndelegateGovernance, identity, vote_power, U256::ZERO, data)
            .await
    }

    /// Any state-changing contract call
    pub async fn call_contract(
        &self,
        identity: &dyn SigningIdentity,
        to: Address,
        value: U256,
        data: Bytes,
    ) -> Result<Option<TxReceipt>> {
        self.run_call(TxKind::CustomContractCall, identity, to, value, data)
            .await
    }

    /// Deploys a group account and returns its address
    pub async fn create_group_account(
        &self,
        identity: &dyn SigningIdentity,
        owners: &[Address],
        threshold: u64,
        salt: U256,
    ) -> Result<Option<Address>> {
        let call = self.multisig().creation_call(owners, threshold, salt)?;
        let sender = identity.key().account_address();
        let receipt = {
            let _guard = self.serialize(sender).await;
            let tx = AccountTxBuilder::new(self.client.as_ref(), &self.config)
                .build(sender, call.to, call.value, call.data)
                .await?;
            self.pipeline()
                .run_account(TxKind::CreateGroupAccount, identity, tx)
                .await?
        };
        let Some(receipt) = receipt else {
            return Ok(None);
        };
        let address = created_address(receipt.logs(), self.config.safe.proxy_factory)?;
        info!("Group account {} created with {} owners", address, owners.len());
        Ok(Some(address))
    }

    fn claim_parties(&self, identity: &dyn SigningIdentity, options: &ClaimOptions) -> (Address, Address) {
        let acting = Self::acting_address(identity);
        (
            options.reward_owner.unwrap_or(acting),
            options.recipient.unwrap_or(acting),
        )
    }

    // ----- cross-ledger legs -----

    /// Atomic export from the A-ledger into the U-ledger's atomic memory
    pub async fn export_from_account(&self, identity: &dyn SigningIdentity, amount: U256) -> Result<Option<TxReceipt>> {
        let nano = to_nano(amount)?;
        self.export_nano_from_account(identity, nano).await
    }

    pub(crate) async fn export_nano_from_account(
        &self,
        identity: &dyn SigningIdentity,
        amount: u64,
    ) -> Result<Option<TxReceipt>> {
        let owner = identity.key().utxo_address()?;
        let from = identity.key().account_address();
        let _guard = self.serialize(from).await;
        let base_fee = self.atomic_base_fee().await?;
        let tx = self
            .utxo_builder()
            .await?
            .atomic_export(from, owner, amount, base_fee)
            .await?;
        self.run_utxo_tx(TxKind::ExportFromAccount, identity, tx, LedgerKind::Account)
            .await
    }

    /// Imports everything exported to the U-ledger
    pub async fn import_to_utxo(&self, identity: &dyn SigningIdentity) -> Result<Option<TxReceipt>> {
        let owner = identity.key().utxo_address()?;
        let _guard = self.serialize(identity.key().account_address()).await;
        let tx = self.utxo_builder().await?.import(owner).await?;
        self.run_utxo_tx(TxKind::ImportToUtxo, identity, tx, LedgerKind::Utxo)
            .await
    }

    /// Export from the U-ledger into the A-ledger's atomic memory
    pub async fn export_from_utxo(&self, identity: &dyn SigningIdentity, amount: U256) -> Result<Option<TxReceipt>> {
        let nano = to_nano(amount)?;
        self.export_nano_from_utxo(identity, nano).await
    }

    pub(crate) async fn export_nano_from_utxo(
        &self,
        identity: &dyn SigningIdentity,
        amount: u64,
    ) -> Result<Option<TxReceipt>> {
        let owner = identity.key().utxo_address()?;
        let _guard = self.serialize(identity.key().account_address()).await;
        let tx = self.utxo_builder().await?.export(owner, amount).await?;
        self.run_utxo_tx(TxKind::ExportFromUtxo, identity, tx, LedgerKind::Utxo)
            .await
    }

    /// Imports everything exported to the A-ledger, crediting the identity's address
    pub async fn import_to_account(&self, identity: &dyn SigningIdentity) -> Result<Option<TxReceipt>> {
        let owner = identity.key().utxo_address()?;
        let to = identity.key().account_address();
        let _guard = self.serialize(to).await;
        let base_fee = self.atomic_base_fee().await?;
        let tx = self
            .utxo_builder()
            .await?
            .atomic_import(owner, to, base_fee)
            .await?;
        self.run_utxo_tx(TxKind::ImportToAccount, identity, tx, LedgerKind::Account)
            .await
    }

    fn transfers(&self) -> CrossLedgerTransferCoordinator<'_, C> {
        CrossLedgerTransferCoordinator::new(self)
    }

    /// Steps needed to move `amount` wei onto the U-ledger
    pub async fn plan_to_utxo(&self, identity: &dyn SigningIdentity, amount: U256) -> Result<CrossLedgerTransferPlan> {
        self.transfers().plan_to_utxo(identity, amount).await
    }

    /// Steps needed to move funds back to the A-ledger
    pub async fn plan_to_account(
        &self,
        identity: &dyn SigningIdentity,
        amount: Option<U256>,
    ) -> Result<CrossLedgerTransferPlan> {
        self.transfers().plan_to_account(identity, amount).await
    }

    /// Moves `amount` from the A-ledger to the U-ledger, exporting only the shortfall
    pub async fn transfer_to_utxo(&self, identity: &dyn SigningIdentity, amount: U256) -> Result<TransferReport> {
        self.transfers().transfer_to_utxo(identity, amount).await
    }

    /// Moves `amount` (or everything spendable) from the U-ledger to the A-ledger
    pub async fn transfer_to_account(
        &self,
        identity: &dyn SigningIdentity,
        amount: Option<U256>,
    ) -> Result<TransferReport> {
        self.transfers().transfer_to_account(identity, amount).await
    }

    /// Imports whatever the A-ledger exported to the U-ledger.
    /// `None` when nothing is pending.
    pub async fn import_pending_to_utxo(&self, identity: &dyn SigningIdentity) -> Result<Option<TxReceipt>> {
        self.transfers().import_pending_to_utxo(identity).await
    }

    /// Imports whatever the U-ledger exported to the A-ledger.
    /// `None` when nothing is pending.
    pub async fn import_pending_to_account(&self, identity: &dyn SigningIdentity) -> Result<Option<TxReceipt>> {
        self.transfers().import_pending_to_account(identity).await
    }

    // ----- U-ledger operations -----

    /// Spends U-ledger outputs to `to`, change back to the sender
    pub async fn transfer_on_utxo(
        &self,
        identity: &dyn SigningIdentity,
        to: UtxoAddress,
        amount: U256,
    ) -> Result<Option<TxReceipt>> {
        let nano = to_nano(amount)?;
        let owner = identity.key().utxo_address()?;
        let _guard = self.serialize(identity.key().account_address()).await;
        let tx = self.utxo_builder().await?.transfer(owner, to, nano).await?;
        self.run_utxo_tx(TxKind::TransferOnUtxo, identity, tx, LedgerKind::Utxo)
            .await
    }

    /// Stakes `amount` to a validator, topping up the U-ledger from the A-ledger
    /// when short. Without `end_time` the stake ends with the validator's period.
    pub async fn delegate_on_utxo(
        &self,
        identity: &dyn SigningIdentity,
        node_id: NodeId,
        amount: U256,
        start_time: u64,
        end_time: Option<u64>,
    ) -> Result<Option<TxReceipt>> {
        let Some((owner, weight, end_time)) = self
            .prepare_stake(identity, node_id, amount, start_time, end_time)
            .await?
        else {
            return Ok(None);
        };
        let _guard = self.serialize(identity.key().account_address()).await;
        let tx = self
            .utxo_builder()
            .await?
            .add_delegator(owner, node_id, weight, start_time, end_time)
            .await?;
        self.run_utxo_tx(TxKind::AddDelegator, identity, tx, LedgerKind::Utxo)
            .await
    }

    /// Registers `node_id` as a validator staking `amount`, topping up the
    /// U-ledger like [`Self::delegate_on_utxo`]
    pub async fn add_validator(
        &self,
        identity: &dyn SigningIdentity,
        node_id: NodeId,
        amount: U256,
        start_time: u64,
        end_time: u64,
        delegation_fee_bips: u32,
    ) -> Result<Option<TxReceipt>> {
        let Some((owner, weight, end_time)) = self
            .prepare_stake(identity, node_id, amount, start_time, Some(end_time))
            .await?
        else {
            return Ok(None);
        };
        let _guard = self.serialize(identity.key().account_address()).await;
        let tx = self
            .utxo_builder()
            .await?
            .add_validator(owner, node_id, weight, start_time, end_time, delegation_fee_bips)
            .await?;
        self.run_utxo_tx(TxKind::AddValidator, identity, tx, LedgerKind::Utxo)
            .await
    }

    /// Checks the stake against the mirror's limits and funds the U-ledger.
    /// `None` when the funding transfer was vetoed.
    async fn prepare_stake(
        &self,
        identity: &dyn SigningIdentity,
        node_id: NodeId,
        amount: U256,
        start_time: u64,
        end_time: Option<u64>,
    ) -> Result<Option<(UtxoAddress, u64, u64)>> {
        let weight = to_nano(amount)?;
        let owner = identity.key().utxo_address()?;
        let end_time = match end_time {
            Some(end_time) => end_time,
            None => self
                .client
                .validator_end_time(node_id)
                .await?
                .ok_or_else(|| {
                    Error::InvalidParameter(format!("no staking period known for {node_id}"))
                })?,
        };
        self.stake_limits().await?.check(weight, start_time, end_time)?;

        let needed = weight.saturating_add(self.config.utxo_default_fee);
        let balance = self.utxo_balance(owner).await?;
        if balance < needed {
            let shortfall = needed - balance;
            info!(
                "U-ledger balance {} short of {} for staking, moving {} over",
                balance, needed, shortfall
            );
            let report = self.transfer_to_utxo(identity, to_wei(shortfall)).await?;
            if report.is_vetoed() {
                return Ok(None);
            }
        }
        Ok(Some((owner, weight, end_time)))
    }
}
