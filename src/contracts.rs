//! ABI bindings and the contract registry

use crate::chain::{CallRequest, ContractCallSimulator};
use crate::{Error, Result};
use alloy_primitives::{Address, Bytes, U256};
use alloy_sol_types::{sol, SolCall};
use tracing::debug;

sol! {
    interface IFlareContractRegistry {
        function getContractAddressByName(string calldata _name) external view returns (address);
        function getAllContracts() external view returns (string[] memory _names, address[] memory _addresses);
    }

    interface IWNat {
        function balanceOf(address account) external view returns (uint256);
        function transfer(address recipient, uint256 amount) external returns (bool);
        function deposit() external payable;
        function withdraw(uint256 amount) external;
        function delegate(address _to, uint256 _bips) external;
        function batchDelegate(address[] memory _delegatees, uint256[] memory _bips) external;
        function undelegateAll() external;
        function delegatesOf(address _owner) external view returns (address[] memory _delegateAddresses, uint256[] memory _bips, uint256 _count, uint256 _delegationMode);
        function governanceVotePower() external view returns (address);
    }

    interface IGovernanceVotePower {
        function getVotes(address _who) external view returns (uint256);
        function getDelegateOfAtNow(address _who) external view returns (address);
        function delegate(address _to) external;
        function undelegate() external;
    }

    interface IDistributionToDelegators {
        function getClaimableMonths() external view returns (uint256 _startMonth, uint256 _endMonth);
        function nextClaimableMonth(address _rewardOwner) external view returns (uint256);
        function getClaimableAmountOf(address _account, uint256 _month) external view returns (uint256 _amountWei);
        function claim(address _rewardOwner, address _recipient, uint256 _month, bool _wrap) external returns (uint256 _rewardAmount);
    }

    interface IValidatorRewardManager {
        function getStateOfRewards(address _beneficiary) external view returns (uint256 _totalReward, uint256 _claimedReward);
        function claim(address _rewardOwner, address _recipient, uint256 _rewardAmount, bool _wrap) external;
    }

    interface IRewardManager {
        struct RewardState {
            uint24 rewardEpochId;
            bytes20 beneficiary;
            uint120 amount;
            uint8 claimType;
            bool initialised;
        }

        struct RewardClaim {
            uint24 rewardEpochId;
            bytes20 beneficiary;
            uint120 amount;
            uint8 claimType;
        }

        struct RewardClaimWithProof {
            bytes32[] merkleProof;
            RewardClaim body;
        }

        function getStateOfRewards(address _rewardOwner) external view returns (RewardState[][] memory _rewardStates);
        function claim(address _rewardOwner, address _recipient, uint24 _rewardEpochId, bool _wrap, RewardClaimWithProof[] calldata _proofs) external returns (uint256 _rewardAmountWei);
    }

    interface IRNat {
        function getBalancesOf(address _owner) external view returns (uint256 _wNatBalance, uint256 _rNatBalance, uint256 _lockedBalance);
        function getRNatAccount(address _owner) external view returns (address);
        function getCurrentMonth() external view returns (uint256);
        function getClaimableRewards(uint256 _projectId, address _owner) external view returns (uint128);
        function getProjectsBasicInfo() external view returns (string[] memory _names, bool[] memory _claimingDisabled);
        function claimRewards(uint256[] calldata _projectIds, uint256 _month) external returns (uint128 _claimedRewardsWei);
        function withdraw(uint128 _amount, bool _wrap) external;
        function withdrawAll(bool _wrap) external;
    }

    interface IPChainStakeMirrorVerifier {
        function minStakeAmountGwei() external view returns (uint256);
        function maxStakeAmountGwei() external view returns (uint256);
        function minStakeDurationSeconds() external view returns (uint256);
        function maxStakeDurationSeconds() external view returns (uint256);
    }

    interface IGnosisSafe {
        function nonce() external view returns (uint256);
        function getOwners() external view returns (address[] memory);
        function getThreshold() external view returns (uint256);
        function approvedHashes(address owner, bytes32 hash) external view returns (uint256);
        function getTransactionHash(address to, uint256 value, bytes calldata data, uint8 operation, uint256 safeTxGas, uint256 baseGas, uint256 gasPrice, address gasToken, address refundReceiver, uint256 _nonce) external view returns (bytes32);
        function approveHash(bytes32 hashToApprove) external;
        function execTransaction(address to, uint256 value, bytes calldata data, uint8 operation, uint256 safeTxGas, uint256 baseGas, uint256 gasPrice, address gasToken, address refundReceiver, bytes memory signatures) external payable returns (bool success);
        function setup(address[] calldata _owners, uint256 _threshold, address to, bytes calldata data, address fallbackHandler, address paymentToken, uint256 payment, address paymentReceiver) external;
    }

    interface ISafeProxyFactory {
        event ProxyCreation(address proxy, address singleton);
        function createProxyWithNonce(address _singleton, bytes memory initializer, uint256 saltNonce) external returns (address proxy);
    }
}

pub const WNAT: &str = "WNat";
pub const DISTRIBUTION_TO_DELEGATORS: &str = "DistributionToDelegators";
pub const VALIDATOR_REWARD_MANAGER: &str = "ValidatorRewardManager";
pub const REWARD_MANAGER: &str = "RewardManager";
pub const RNAT: &str = "RNat";
pub const STAKE_VERIFIER: &str = "PChainStakeMirrorVerifier";

/// Performs a read-only call and decodes its return value
pub async fn read<C, S>(client: &S, to: Address, call: C) -> Result<C::Return>
where
    C: SolCall + Send,
    S: ContractCallSimulator + ?Sized,
{
    let request = CallRequest {
        to,
        data: Bytes::from(call.abi_encode()),
        ..Default::default()
    };
    let output = client.call(&request).await?;
    Ok(C::abi_decode_returns(&output)?)
}

pub fn encode<C: SolCall>(call: C) -> Bytes {
    Bytes::from(call.abi_encode())
}

/// A named entry of the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedContract {
    pub name: String,
    pub address: Address,
}

/// Resolves system contract addresses by name
pub struct ContractRegistry<'a, S: ?Sized> {
    client: &'a S,
    address: Address,
}

impl<'a, S: ContractCallSimulator + ?Sized> ContractRegistry<'a, S> {
    pub fn new(client: &'a S, address: Address) -> Self {
        Self { client, address }
    }

    /// Direct lookup first, then a case-insensitive scan of all entries
    pub async fn address_of(&self, name: &str) -> Result<Address> {
        let address = read(
            self.client,
            self.address,
            IFlareContractRegistry::getContractAddressByNameCall {
                _name: name.to_string(),
            },
        )
        .await?;
        if !address.is_zero() {
            return Ok(address);
        }

        debug!("Registry has no exact entry for {}, scanning all contracts", name);
        self.all_contracts()
            .await?
            .into_iter()
            .find(|c| c.name.eq_ignore_ascii_case(name) && !c.address.is_zero())
            .map(|c| c.address)
            .ok_or_else(|| Error::UnknownContract(name.to_string()))
    }

    pub async fn all_contracts(&self) -> Result<Vec<NamedContract>> {
        let all = read(
            self.client,
            self.address,
            IFlareContractRegistry::getAllContractsCall {},
        )
        .await?;
        Ok(all
            ._names
            .into_iter()
            .zip(all._addresses)
            .map(|(name, address)| NamedContract { name, address })
            .collect())
    }
}

/// Staking bounds enforced by the stake mirror
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StakeLimits {
    /// Nano units
    pub min_stake_amount: u64,
    pub max_stake_amount: u64,
    /// Seconds
    pub min_stake_duration: u64,
    pub max_stake_duration: u64,
}

impl StakeLimits {
    pub async fn fetch<S: ContractCallSimulator + ?Sized>(client: &S, verifier: Address) -> Result<Self> {
        let to_u64 = |v: U256, what: &str| {
            u64::try_from(v).map_err(|_| Error::InvalidParameter(format!("{what} out of range: {v}")))
        };
        Ok(Self {
            min_stake_amount: to_u64(
                read(client, verifier, IPChainStakeMirrorVerifier::minStakeAmountGweiCall {}).await?,
                "minimum stake",
            )?,
            max_stake_amount: to_u64(
                read(client, verifier, IPChainStakeMirrorVerifier::maxStakeAmountGweiCall {}).await?,
                "maximum stake",
            )?,
            min_stake_duration: to_u64(
                read(client, verifier, IPChainStakeMirrorVerifier::minStakeDurationSecondsCall {})
                    .await?,
                "minimum duration",
            )?,
            max_stake_duration: to_u64(
                read(client, verifier, IPChainStakeMirrorVerifier::maxStakeDurationSecondsCall {})
                    .await?,
                "maximum duration",
            )?,
        })
    }

    pub fn check(&self, amount: u64, start_time: u64, end_time: u64) -> Result<()> {
        if amount < self.min_stake_amount || amount > self.max_stake_amount {
            return Err(Error::InvalidParameter(format!(
                "stake amount {} outside [{}, {}]",
                amount, self.min_stake_amount, self.max_stake_amount
            )));
        }
        let duration = end_time.checked_sub(start_time).ok_or_else(|| {
            Error::InvalidParameter(format!("end time {end_time} precedes start time {start_time}"))
        })?;
        if duration < self.min_stake_duration || duration > self.max_stake_duration {
            return Err(Error::InvalidParameter(format!(
                "stake duration {} outside [{}, {}]",
                duration, self.min_stake_duration, self.max_stake_duration
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::FakeLedger;
    use crate::config::CoordinatorConfig;

    #[tokio::test]
    async fn test_registry_lookup_falls_back_to_scan() {
        let ledger = FakeLedger::new();
        let registry_address = CoordinatorConfig::default().contract_registry;
        ledger.register_contract("WNat", Address::repeat_byte(1));
        ledger.register_contract("RewardManager", Address::repeat_byte(2));
        let registry = ContractRegistry::new(&ledger, registry_address);

        assert_eq!(registry.address_of("WNat").await.unwrap(), Address::repeat_byte(1));
        assert_eq!(registry.address_of("wnat").await.unwrap(), Address::repeat_byte(1));
        assert!(matches!(
            registry.address_of("FtsoManager").await,
            Err(Error::UnknownContract(_))
        ));
        assert_eq!(registry.all_contracts().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_read_decodes_return() {
        let ledger = FakeLedger::new();
        let wnat = Address::repeat_byte(9);
        ledger.on_call::<IWNat::balanceOfCall, _>(wnat, |call| {
            U256::from(call.account.as_slice()[19])
        });

        let balance = read(
            &ledger,
            wnat,
            IWNat::balanceOfCall {
                account: Address::with_last_byte(42),
            },
        )
        .await
        .unwrap();
        assert_eq!(balance, U256::from(42u64));
    }

    #[test]
    fn test_stake_limits() {
        let limits = StakeLimits {
            min_stake_amount: 50_000_000_000_000,
            max_stake_amount: 200_000_000_000_000_000,
            min_stake_duration: 14 * 86_400,
            max_stake_duration: 365 * 86_400,
        };
        assert!(limits.check(50_000_000_000_000, 0, 14 * 86_400).is_ok());
        assert!(limits.check(1, 0, 14 * 86_400).is_err());
        assert!(limits.check(50_000_000_000_000, 0, 86_400).is_err());
        assert!(limits.check(50_000_000_000_000, 10, 5).is_err());
    }
}
