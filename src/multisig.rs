//! Threshold group accounts
//!
//! A group account executes a call once enough of its owners approved the
//! call hash. Approvals are either the initiator's own presence or an
//! `approveHash` recorded on chain; execution passes one pre-validated
//! signature entry per approving owner.

use crate::chain::ContractCallSimulator;
use crate::config::SafeDeployment;
use crate::contracts::{encode, read, IGnosisSafe, ISafeProxyFactory};
use crate::types::ReceiptLog;
use crate::{Error, Result};
use alloy_primitives::{Address, Bytes, B256, U256};
use alloy_sol_types::SolEvent;
use tracing::debug;

/// On-chain state of a group account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupAccount {
    pub address: Address,
    pub owners: Vec<Address>,
    pub threshold: u64,
    /// Replay counter
    pub nonce: U256,
}

impl GroupAccount {
    pub fn is_owner(&self, address: &Address) -> bool {
        self.owners.contains(address)
    }
}

/// Call a group account is asked to make
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetCall {
    pub to: Address,
    pub value: U256,
    pub data: Bytes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalStatus {
    /// The owner submitting the current transaction
    Initiator,
    ApprovedOnChain,
    Pending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OwnerApproval {
    pub owner: Address,
    pub status: ApprovalStatus,
}

impl OwnerApproval {
    pub fn is_approved(&self) -> bool {
        self.status != ApprovalStatus::Pending
    }
}

/// What the initiator sends to the group account next
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MultisigAction {
    Approve { call_hash: B256 },
    Execute { signatures: Bytes },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultisigProposal {
    pub group: GroupAccount,
    pub call: TargetCall,
    pub call_hash: B256,
    /// One entry per owner, in the group's owner order
    pub approvals: Vec<OwnerApproval>,
}

impl MultisigProposal {
    pub fn approval_count(&self) -> u64 {
        self.approvals.iter().filter(|a| a.is_approved()).count() as u64
    }

    /// Approving owners, ascending by address value
    pub fn approving_owners(&self) -> Vec<Address> {
        let mut owners: Vec<Address> = self
            .approvals
            .iter()
            .filter(|a| a.is_approved())
            .map(|a| a.owner)
            .collect();
        owners.sort();
        owners
    }

    pub fn next_action(&self) -> MultisigAction {
        if self.approval_count() >= self.group.threshold {
            MultisigAction::Execute {
                signatures: execution_signatures(&self.approving_owners()),
            }
        } else {
            MultisigAction::Approve {
                call_hash: self.call_hash,
            }
        }
    }

    /// Transaction payload for the group account carrying out `next_action`
    pub fn group_call(&self) -> TargetCall {
        let data = match self.next_action() {
            MultisigAction::Approve { call_hash } => encode(IGnosisSafe::approveHashCall {
                hashToApprove: call_hash,
            }),
            MultisigAction::Execute { signatures } => encode(IGnosisSafe::execTransactionCall {
                to: self.call.to,
                value: self.call.value,
                data: self.call.data.clone(),
                operation: 0,
                safeTxGas: U256::ZERO,
                baseGas: U256::ZERO,
                gasPrice: U256::ZERO,
                gasToken: Address::ZERO,
                refundReceiver: Address::ZERO,
                signatures,
            }),
        };
        TargetCall {
            to: self.group.address,
            value: U256::ZERO,
            data,
        }
    }
}

/// Pre-validated signature entries: `12 zero bytes || owner || 32 zero bytes || 0x01`
/// per owner, owners ascending
pub fn execution_signatures(owners: &[Address]) -> Bytes {
    let mut sorted = owners.to_vec();
    sorted.sort();
    let mut out = Vec::with_capacity(sorted.len() * 65);
    for owner in sorted {
        out.extend_from_slice(&[0u8; 12]);
        out.extend_from_slice(owner.as_slice());
        out.extend_from_slice(&[0u8; 32]);
        out.push(1);
    }
    Bytes::from(out)
}

/// Reads group accounts and prepares their calls
pub struct MultisigCoordinator<'a, S: ?Sized> {
    client: &'a S,
    deployment: &'a SafeDeployment,
}

impl<'a, S: ContractCallSimulator + ?Sized> MultisigCoordinator<'a, S> {
    pub fn new(client: &'a S, deployment: &'a SafeDeployment) -> Self {
        Self { client, deployment }
    }

    pub async fn inspect(&self, group: Address) -> Result<GroupAccount> {
        let owners = read(self.client, group, IGnosisSafe::getOwnersCall {}).await?;
        let threshold = read(self.client, group, IGnosisSafe::getThresholdCall {}).await?;
        let nonce = read(self.client, group, IGnosisSafe::nonceCall {}).await?;
        let threshold = u64::try_from(threshold)
            .map_err(|_| Error::InvalidParameter(format!("group threshold {threshold}")))?;
        Ok(GroupAccount {
            address: group,
            owners,
            threshold,
            nonce,
        })
    }

    /// Hashes the call at the current replay counter and collects approvals
    pub async fn propose(&self, group: Address, initiator: Address, call: TargetCall) -> Result<MultisigProposal> {
        let group = self.inspect(group).await?;
        let call_hash = read(
            self.client,
            group.address,
            IGnosisSafe::getTransactionHashCall {
                to: call.to,
                value: call.value,
                data: call.data.clone(),
                operation: 0,
                safeTxGas: U256::ZERO,
                baseGas: U256::ZERO,
                gasPrice: U256::ZERO,
                gasToken: Address::ZERO,
                refundReceiver: Address::ZERO,
                _nonce: group.nonce,
            },
        )
        .await?;

        let mut approvals = Vec::with_capacity(group.owners.len());
        for owner in &group.owners {
            let status = if *owner == initiator {
                ApprovalStatus::Initiator
            } else {
                let approved = read(
                    self.client,
                    group.address,
                    IGnosisSafe::approvedHashesCall {
                        owner: *owner,
                        hash: call_hash,
                    },
                )
                .await?;
                if approved.is_zero() {
                    ApprovalStatus::Pending
                } else {
                    ApprovalStatus::ApprovedOnChain
                }
            };
            approvals.push(OwnerApproval {
                owner: *owner,
                status,
            });
        }

        let proposal = MultisigProposal {
            group,
            call,
            call_hash,
            approvals,
        };
        debug!(
            "Group {} call {} has {} of {} approvals",
            proposal.group.address,
            call_hash,
            proposal.approval_count(),
            proposal.group.threshold
        );
        Ok(proposal)
    }

    /// Factory call deploying a new group account
    pub fn creation_call(&self, owners: &[Address], threshold: u64, salt: U256) -> Result<TargetCall> {
        if owners.is_empty() {
            return Err(Error::InvalidParameter("group account needs owners".to_string()));
        }
        if threshold == 0 || threshold > owners.len() as u64 {
            return Err(Error::InvalidParameter(format!(
                "threshold {} out of range for {} owners",
                threshold,
                owners.len()
            )));
        }
        let mut distinct = owners.to_vec();
        distinct.sort();
        distinct.dedup();
        if distinct.len() != owners.len() {
            return Err(Error::InvalidParameter("duplicate group owner".to_string()));
        }

        let initializer = encode(IGnosisSafe::setupCall {
            _owners: owners.to_vec(),
            _threshold: U256::from(threshold),
            to: Address::ZERO,
            data: Bytes::new(),
            fallbackHandler: self.deployment.fallback_handler,
            paymentToken: Address::ZERO,
            payment: U256::ZERO,
            paymentReceiver: Address::ZERO,
        });
        Ok(TargetCall {
            to: self.deployment.proxy_factory,
            value: U256::ZERO,
            data: encode(ISafeProxyFactory::createProxyWithNonceCall {
                _singleton: self.deployment.singleton,
                initializer,
                saltNonce: salt,
            }),
        })
    }
}

/// Address of the proxy announced by the factory's creation event
pub fn created_address(logs: &[ReceiptLog], factory: Address) -> Result<Address> {
    let log = logs
        .iter()
        .find(|log| {
            log.address == factory
                && log.topics.first() == Some(&ISafeProxyFactory::ProxyCreation::SIGNATURE_HASH)
        })
        .ok_or_else(|| Error::TransactionFailed("no proxy creation event in receipt".to_string()))?;

    // indexed on newer factories, in the data on older ones
    if let Some(topic) = log.topics.get(1) {
        return Ok(Address::from_word(*topic));
    }
    log.data
        .get(12..32)
        .map(Address::from_slice)
        .ok_or_else(|| Error::TransactionFailed("malformed proxy creation event".to_string()))
}
