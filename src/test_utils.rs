//! In-memory ledger used by the unit tests

use crate::chain::{
    Broadcaster, CallRequest, ChainError, ChainStateReader, ContractCallSimulator, FeeData,
    LedgerIds, SimulationError,
};
use crate::config::CoordinatorConfig;
use crate::contracts::IFlareContractRegistry;
use crate::signer::LocalKeySigner;
use crate::types::{
    AccountReceipt, AccountTx, LedgerId, LedgerKind, NodeId, ReceiptLog, TxId, Utxo, UtxoAddress,
    UtxoOutput, UtxoOwners, UtxoTx, UtxoTxKind, UtxoTxStatus,
};
use crate::units::to_wei;
use alloy_primitives::{Address, Bytes, B256, U256};
use alloy_sol_types::SolCall;
use async_trait::async_trait;
use borsh::BorshDeserialize;
use std::collections::HashMap;
use std::sync::Mutex;

type CallHandler = Box<dyn Fn(&[u8]) -> Result<Bytes, ChainError> + Send + Sync>;

pub(crate) fn test_signer(byte: u8) -> LocalKeySigner {
    LocalKeySigner::from_slice(&[byte; 32]).unwrap()
}

pub(crate) struct FakeState {
    pub chain_id: u64,
    pub ids: LedgerIds,
    pub fee_data: FeeData,
    pub nonces: HashMap<Address, u64>,
    pub balances: HashMap<Address, U256>,
    /// (ledger holding the output, ledger it was exported from, output)
    pub utxos: Vec<(LedgerKind, Option<LedgerId>, Utxo)>,
    pub staked: HashMap<UtxoAddress, u64>,
    pub validator_end_times: HashMap<NodeId, u64>,
    pub gas_estimate: u64,
    pub reverts: HashMap<Address, String>,
    pub registry: Address,
    pub contracts: Vec<(String, Address)>,
    pub call_handlers: HashMap<(Address, [u8; 4]), CallHandler>,
    pub estimates: Vec<CallRequest>,
    pub broadcast: Vec<Bytes>,
    pub issued: Vec<(LedgerKind, Bytes)>,
    pub receipt_success: bool,
    pub receipt_logs: Vec<ReceiptLog>,
    pub withhold_receipts: bool,
    pub receipt_queries: u32,
    /// Status reported for issued transactions; `None` reports the
    /// ledger's success status
    pub utxo_status: Option<UtxoTxStatus>,
    /// Whether issued transactions move funds in the fake's state
    pub settle_issued: bool,
    next_output: u8,
}

pub(crate) struct FakeLedger {
    state: Mutex<FakeState>,
}

impl FakeLedger {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState {
                chain_id: 14,
                ids: LedgerIds {
                    network_id: 14,
                    account_ledger: B256::repeat_byte(0xcc),
                    utxo_ledger: B256::repeat_byte(0xdd),
                    asset_id: B256::repeat_byte(0xee),
                },
                fee_data: FeeData {
                    gas_price: Some(25_000_000_000),
                    max_fee_per_gas: Some(50_000_000_000),
                    max_priority_fee_per_gas: Some(0),
                },
                nonces: HashMap::new(),
                balances: HashMap::new(),
                utxos: Vec::new(),
                staked: HashMap::new(),
                validator_end_times: HashMap::new(),
                gas_estimate: 50_000,
                reverts: HashMap::new(),
                registry: CoordinatorConfig::default().contract_registry,
                contracts: Vec::new(),
                call_handlers: HashMap::new(),
                estimates: Vec::new(),
                broadcast: Vec::new(),
                issued: Vec::new(),
                receipt_success: true,
                receipt_logs: Vec::new(),
                withhold_receipts: false,
                receipt_queries: 0,
                utxo_status: None,
                settle_issued: true,
                next_output: 0,
            }),
        }
    }

    pub fn update<R>(&self, f: impl FnOnce(&mut FakeState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    pub fn ids(&self) -> LedgerIds {
        self.update(|s| s.ids)
    }

    pub fn fund_account(&self, address: Address, wei: U256) {
        self.update(|s| s.balances.insert(address, wei));
    }

    /// Adds a single-owner output of the native asset
    pub fn add_utxo(
        &self,
        ledger: LedgerKind,
        source: Option<LedgerId>,
        owner: UtxoAddress,
        amount: u64,
    ) -> Utxo {
        self.update(|s| add_utxo(s, ledger, source, owner, amount))
    }

    pub fn register_contract(&self, name: &str, address: Address) {
        self.update(|s| s.contracts.push((name.to_string(), address)));
    }

    /// Answers calls of type `C` sent to `to`
    pub fn on_call<C, F>(&self, to: Address, handler: F)
    where
        C: SolCall + 'static,
        F: Fn(C) -> C::Return + Send + Sync + 'static,
    {
        let handler: CallHandler = Box::new(move |data| {
            let call = C::abi_decode(data).map_err(|e| ChainError::Rejected(e.to_string()))?;
            Ok(Bytes::from(C::abi_encode_returns(&handler(call))))
        });
        self.update(|s| s.call_handlers.insert((to, C::SELECTOR), handler));
    }

    pub fn broadcast(&self) -> Vec<Bytes> {
        self.update(|s| s.broadcast.clone())
    }

    pub fn issued(&self) -> Vec<(LedgerKind, Bytes)> {
        self.update(|s| s.issued.clone())
    }

    /// Issued transactions, decoded
    pub fn issued_txs(&self) -> Vec<(LedgerKind, UtxoTx)> {
        self.issued()
            .into_iter()
            .map(|(ledger, raw)| (ledger, decode_issued(&raw)))
            .collect()
    }

    pub fn estimates(&self) -> Vec<CallRequest> {
        self.update(|s| s.estimates.clone())
    }

    pub fn receipt_queries(&self) -> u32 {
        self.update(|s| s.receipt_queries)
    }
}

/// Unsigned transaction in front of the credentials of a signed one
pub(crate) fn decode_issued(raw: &[u8]) -> UtxoTx {
    let mut body = &raw[2..];
    UtxoTx::deserialize(&mut body).unwrap()
}

/// Applies an issued transaction: spends its inputs, creates its outputs and
/// moves exported funds into the destination's atomic memory
fn settle(state: &mut FakeState, tx_id: TxId, tx: &UtxoTx) {
    let ids = state.ids;
    let mut spent: Vec<(TxId, u32)> = tx.inputs.iter().map(Utxo::outpoint).collect();
    if let UtxoTxKind::Import { imported, .. } | UtxoTxKind::AtomicImport { imported, .. } = &tx.kind {
        spent.extend(imported.iter().map(Utxo::outpoint));
    }
    state.utxos.retain(|(_, _, u)| !spent.contains(&u.outpoint()));

    let mut created: Vec<(LedgerKind, Option<LedgerId>, &UtxoOutput)> = tx
        .outputs
        .iter()
        .map(|o| (LedgerKind::Utxo, None, o))
        .collect();
    match &tx.kind {
        UtxoTxKind::Export { exported, .. } => {
            created.extend(exported.iter().map(|o| (LedgerKind::Account, Some(ids.utxo_ledger), o)));
        }
        UtxoTxKind::AtomicExport { debits, exported, .. } => {
            for debit in debits {
                let balance = state.balances.entry(debit.address).or_default();
                *balance -= to_wei(debit.amount);
                *state.nonces.entry(debit.address).or_default() += 1;
            }
            created.extend(exported.iter().map(|o| (LedgerKind::Utxo, Some(ids.account_ledger), o)));
        }
        UtxoTxKind::AtomicImport { credits, .. } => {
            for credit in credits {
                *state.balances.entry(credit.address).or_default() += to_wei(credit.amount);
            }
        }
        UtxoTxKind::AddDelegator { staked, .. } | UtxoTxKind::AddValidator { staked, .. } => {
            for output in staked {
                for owner in &output.owners.addresses {
                    *state.staked.entry(*owner).or_default() += output.amount;
                }
            }
        }
        UtxoTxKind::Base | UtxoTxKind::Import { .. } => {}
    }

    for (index, (ledger, source, output)) in created.into_iter().enumerate() {
        let utxo = Utxo {
            tx_id,
            output_index: index as u32,
            asset_id: output.asset_id,
            amount: output.amount,
            owners: output.owners.clone(),
        };
        state.utxos.push((ledger, source, utxo));
    }
}

fn add_utxo(
    state: &mut FakeState,
    ledger: LedgerKind,
    source: Option<LedgerId>,
    owner: UtxoAddress,
    amount: u64,
) -> Utxo {
    state.next_output = state.next_output.wrapping_add(1);
    let utxo = Utxo {
        tx_id: B256::repeat_byte(state.next_output),
        output_index: 0,
        asset_id: state.ids.asset_id,
        amount,
        owners: UtxoOwners::single(owner),
    };
    state.utxos.push((ledger, source, utxo.clone()));
    utxo
}

#[async_trait]
impl ChainStateReader for FakeLedger {
    async fn chain_id(&self) -> Result<u64, ChainError> {
        Ok(self.update(|s| s.chain_id))
    }

    async fn ledger_ids(&self) -> Result<LedgerIds, ChainError> {
        Ok(self.ids())
    }

    async fn fee_data(&self) -> Result<FeeData, ChainError> {
        Ok(self.update(|s| s.fee_data))
    }

    async fn nonce(&self, address: Address) -> Result<u64, ChainError> {
        Ok(self.update(|s| s.nonces.get(&address).copied().unwrap_or_default()))
    }

    async fn account_balance(&self, address: Address) -> Result<U256, ChainError> {
        Ok(self.update(|s| s.balances.get(&address).copied().unwrap_or_default()))
    }

    async fn utxos(
        &self,
        ledger: LedgerKind,
        owner: UtxoAddress,
        source: Option<LedgerId>,
    ) -> Result<Vec<Utxo>, ChainError> {
        Ok(self.update(|s| {
            s.utxos
                .iter()
                .filter(|(l, src, u)| {
                    *l == ledger && *src == source && u.owners.addresses.contains(&owner)
                })
                .map(|(_, _, u)| u.clone())
                .collect()
        }))
    }

    async fn staked_balance(&self, owner: UtxoAddress) -> Result<u64, ChainError> {
        Ok(self.update(|s| s.staked.get(&owner).copied().unwrap_or_default()))
    }

    async fn validator_end_time(&self, node_id: NodeId) -> Result<Option<u64>, ChainError> {
        Ok(self.update(|s| s.validator_end_times.get(&node_id).copied()))
    }

    async fn account_receipt(&self, tx_id: TxId) -> Result<Option<AccountReceipt>, ChainError> {
        Ok(self.update(|s| {
            s.receipt_queries += 1;
            (!s.withhold_receipts).then(|| AccountReceipt {
                tx_id,
                success: s.receipt_success,
                block_number: 1,
                gas_used: 21_000,
                logs: s.receipt_logs.clone(),
            })
        }))
    }

    async fn utxo_tx_status(
        &self,
        ledger: LedgerKind,
        _tx_id: TxId,
    ) -> Result<UtxoTxStatus, ChainError> {
        Ok(self.update(|s| s.utxo_status.unwrap_or(success_status(ledger))))
    }
}

#[async_trait]
impl ContractCallSimulator for FakeLedger {
    async fn estimate_gas(&self, request: &CallRequest) -> Result<u64, SimulationError> {
        self.update(|s| {
            s.estimates.push(request.clone());
            match s.reverts.get(&request.to) {
                Some(reason) => Err(SimulationError::Reverted(reason.clone())),
                None => Ok(s.gas_estimate),
            }
        })
    }

    async fn call(&self, request: &CallRequest) -> Result<Bytes, ChainError> {
        self.update(|s| {
            if request.to == s.registry {
                return registry_call(s, &request.data);
            }
            let selector: [u8; 4] = request
                .data
                .get(..4)
                .and_then(|b| b.try_into().ok())
                .ok_or_else(|| ChainError::Rejected("missing selector".into()))?;
            let handler = s
                .call_handlers
                .get(&(request.to, selector))
                .ok_or_else(|| ChainError::NotFound(format!("no handler at {}", request.to)))?;
            handler(&request.data)
        })
    }
}

fn success_status(ledger: LedgerKind) -> UtxoTxStatus {
    match ledger {
        LedgerKind::Utxo => UtxoTxStatus::Committed,
        LedgerKind::Account => UtxoTxStatus::Accepted,
    }
}

fn registry_call(state: &FakeState, data: &[u8]) -> Result<Bytes, ChainError> {
    if let Ok(call) = IFlareContractRegistry::getContractAddressByNameCall::abi_decode(data) {
        let address = state
            .contracts
            .iter()
            .find(|(name, _)| *name == call._name)
            .map(|(_, address)| *address)
            .unwrap_or_default();
        return Ok(Bytes::from(
            IFlareContractRegistry::getContractAddressByNameCall::abi_encode_returns(&address),
        ));
    }
    if IFlareContractRegistry::getAllContractsCall::abi_decode(data).is_ok() {
        let ret = IFlareContractRegistry::getAllContractsReturn {
            _names: state.contracts.iter().map(|(n, _)| n.clone()).collect(),
            _addresses: state.contracts.iter().map(|(_, a)| *a).collect(),
        };
        return Ok(Bytes::from(
            IFlareContractRegistry::getAllContractsCall::abi_encode_returns(&ret),
        ));
    }
    Err(ChainError::Rejected("unknown registry call".into()))
}

#[async_trait]
impl Broadcaster for FakeLedger {
    async fn broadcast_account_tx(&self, raw: Bytes) -> Result<TxId, ChainError> {
        let tx_id = AccountTx::tx_id(&raw);
        self.update(|s| s.broadcast.push(raw));
        Ok(tx_id)
    }

    async fn issue_utxo_tx(&self, ledger: LedgerKind, raw: Bytes) -> Result<TxId, ChainError> {
        let tx_id = UtxoTx::tx_id(&raw);
        self.update(|s| {
            let settles = s.settle_issued
                && s.utxo_status
                    .map_or(true, |status| status.is_successful(ledger));
            if settles {
                settle(s, tx_id, &decode_issued(&raw));
            }
            s.issued.push((ledger, raw));
        });
        Ok(tx_id)
    }
}
