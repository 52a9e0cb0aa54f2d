//! Protocol Events for the Tranche Protocol
//!
//! Every state transition of the perp and the vault is recorded as an
//! event. Each ledger owns an [`EventLog`]; events emitted inside a failed
//! operation are discarded together with the rest of its effects.

use crate::types::{Address, BondId, TokenId};
use crate::Vec;
use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

/// Event types for indexing and filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
#[borsh(use_discriminant = true)]
#[repr(u8)]
pub enum EventType {
    // Perp Events (0x01 - 0x1F)
    DepositBondUpdated = 0x01,
    ReserveSynced = 0x02,
    TrancheMatured = 0x03,
    PerpMinted = 0x04,
    PerpBurned = 0x05,
    Rollover = 0x06,
    PerpRetired = 0x07,
    Redenominated = 0x08,
    FeeSettled = 0x09,
    ProtocolFeesCollected = 0x0A,

    // Vault Events (0x20 - 0x3F)
    VaultDeposited = 0x20,
    VaultRedeemed = 0x21,
    VaultDeployed = 0x22,
    AssetSynced = 0x23,
    VaultRecovered = 0x24,
    UnderlyingSwapped = 0x25,
    PerpsSwapped = 0x26,
    Rebalanced = 0x27,

    // Admin Events (0x80 - 0x9F)
    ParameterUpdated = 0x80,
}

/// Configuration values an admin can change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
#[borsh(use_discriminant = true)]
#[repr(u8)]
pub enum ConfigParam {
    Owner = 0x01,
    Keeper = 0x02,
    TargetSubscriptionRatio = 0x10,
    DeviationBounds = 0x11,
    RebalanceBand = 0x12,
    PerpFees = 0x13,
    VaultFees = 0x14,
    FlashFees = 0x15,
    RebalanceCaps = 0x16,
    ProtocolShare = 0x17,
    RolloverFee = 0x18,
    Roller = 0x20,
    PricingStrategy = 0x21,
    YieldStrategy = 0x22,
    SupplyCaps = 0x23,
    TolerableMaturity = 0x24,
    SkimPerc = 0x25,
    FeeToken = 0x26,
    LiquidityFloor = 0x30,
    MinDeployment = 0x31,
    RebalanceFreq = 0x32,
    FeeCollector = 0x33,
}

/// Main event enum containing all possible protocol events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub enum ProtocolEvent {
    // ============ Perp Events ============

    /// The perp adopted a newly issued bond for deposits
    DepositBondUpdated {
        bond: BondId,
        maturity_date: u64,
        timestamp: u64,
    },

    /// A reserve token balance changed; `balance == 0` means it left the reserve
    ReserveSynced {
        token: TokenId,
        balance: u64,
        timestamp: u64,
    },

    /// A reserve tranche matured and was redeemed into the mature balance
    TrancheMatured {
        tranche: TokenId,
        bond: BondId,
        collateral_redeemed: u64,
        std_amount: u64,
        timestamp: u64,
    },

    /// Perps minted against a deposit tranche
    PerpMinted {
        depositor: Address,
        tranche: TokenId,
        tranche_amt: u64,
        perp_amt: u64,
        timestamp: u64,
    },

    /// Perps burned for a pro-rata share of the reserve
    PerpBurned {
        holder: Address,
        perp_amt: u64,
        supply_before: u64,
        timestamp: u64,
    },

    /// Deposit tranche swapped for an older reserve token
    Rollover {
        roller: Address,
        tranche_in: TokenId,
        token_out: TokenId,
        tranche_in_amt: u64,
        token_out_amt: u64,
        timestamp: u64,
    },

    /// Perps burned without a reserve claim
    PerpRetired {
        from: Address,
        amount: u64,
        timestamp: u64,
    },

    /// Standardized basis reset by the admin
    Redenominated {
        std_total: u64,
        std_mature: u64,
        timestamp: u64,
    },

    /// Mint or burn fee paid into the perp
    FeeSettled {
        account: Address,
        fee: u64,
        timestamp: u64,
    },

    /// Perps held by the protocol sent to a collector
    ProtocolFeesCollected {
        to: Address,
        amount: u64,
        timestamp: u64,
    },

    // ============ Vault Events ============

    /// Underlying deposited for notes
    VaultDeposited {
        depositor: Address,
        underlying_amt: u64,
        notes_minted: u64,
        timestamp: u64,
    },

    /// Notes redeemed for a pro-rata share of the vault
    VaultRedeemed {
        holder: Address,
        notes_burned: u64,
        assets_out: u64,
        timestamp: u64,
    },

    /// Underlying tranched and rolled into the perp
    VaultDeployed {
        underlying_deployed: u64,
        rollovers: u64,
        timestamp: u64,
    },

    /// A vault asset balance changed; `balance == 0` means it was dropped
    AssetSynced {
        token: TokenId,
        balance: u64,
        timestamp: u64,
    },

    /// Deployed tranches redeemed back into underlying
    VaultRecovered {
        underlying_balance: u64,
        deployed_count: u64,
        timestamp: u64,
    },

    /// Underlying swapped for perps
    UnderlyingSwapped {
        account: Address,
        underlying_in: u64,
        perp_out: u64,
        timestamp: u64,
    },

    /// Perps swapped for underlying
    PerpsSwapped {
        account: Address,
        perp_in: u64,
        underlying_out: u64,
        timestamp: u64,
    },

    /// Daily rebalance between the pools
    Rebalanced {
        underlying_into_perp: i128,
        protocol_fee: u64,
        timestamp: u64,
    },

    // ============ Admin Events ============

    /// An admin changed a configuration value
    ParameterUpdated {
        param: ConfigParam,
        by: Address,
        timestamp: u64,
    },
}

impl ProtocolEvent {
    /// Get the event type for filtering
    pub fn event_type(&self) -> EventType {
        match self {
            Self::DepositBondUpdated { .. } => EventType::DepositBondUpdated,
            Self::ReserveSynced { .. } => EventType::ReserveSynced,
            Self::TrancheMatured { .. } => EventType::TrancheMatured,
            Self::PerpMinted { .. } => EventType::PerpMinted,
            Self::PerpBurned { .. } => EventType::PerpBurned,
            Self::Rollover { .. } => EventType::Rollover,
            Self::PerpRetired { .. } => EventType::PerpRetired,
            Self::Redenominated { .. } => EventType::Redenominated,
            Self::FeeSettled { .. } => EventType::FeeSettled,
            Self::ProtocolFeesCollected { .. } => EventType::ProtocolFeesCollected,
            Self::VaultDeposited { .. } => EventType::VaultDeposited,
            Self::VaultRedeemed { .. } => EventType::VaultRedeemed,
            Self::VaultDeployed { .. } => EventType::VaultDeployed,
            Self::AssetSynced { .. } => EventType::AssetSynced,
            Self::VaultRecovered { .. } => EventType::VaultRecovered,
            Self::UnderlyingSwapped { .. } => EventType::UnderlyingSwapped,
            Self::PerpsSwapped { .. } => EventType::PerpsSwapped,
            Self::Rebalanced { .. } => EventType::Rebalanced,
            Self::ParameterUpdated { .. } => EventType::ParameterUpdated,
        }
    }

    /// Get the chain time when the event occurred
    pub fn timestamp(&self) -> u64 {
        match self {
            Self::DepositBondUpdated { timestamp, .. }
            | Self::ReserveSynced { timestamp, .. }
            | Self::TrancheMatured { timestamp, .. }
            | Self::PerpMinted { timestamp, .. }
            | Self::PerpBurned { timestamp, .. }
            | Self::Rollover { timestamp, .. }
            | Self::PerpRetired { timestamp, .. }
            | Self::Redenominated { timestamp, .. }
            | Self::FeeSettled { timestamp, .. }
            | Self::ProtocolFeesCollected { timestamp, .. }
            | Self::VaultDeposited { timestamp, .. }
            | Self::VaultRedeemed { timestamp, .. }
            | Self::VaultDeployed { timestamp, .. }
            | Self::AssetSynced { timestamp, .. }
            | Self::VaultRecovered { timestamp, .. }
            | Self::UnderlyingSwapped { timestamp, .. }
            | Self::PerpsSwapped { timestamp, .. }
            | Self::Rebalanced { timestamp, .. }
            | Self::ParameterUpdated { timestamp, .. } => *timestamp,
        }
    }

    /// Serialize event to bytes for storage/transmission
    pub fn to_bytes(&self) -> Vec<u8> {
        borsh::to_vec(self).unwrap_or_default()
    }

    /// Deserialize event from bytes
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        borsh::from_slice(bytes).ok()
    }
}

/// Event log for collecting events during execution
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct EventLog {
    events: Vec<ProtocolEvent>,
}

impl EventLog {
    /// Create a new empty event log
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    /// Emit an event (add to log)
    pub fn emit(&mut self, event: ProtocolEvent) {
        self.events.push(event);
    }

    /// Get all events
    pub fn events(&self) -> &[ProtocolEvent] {
        &self.events
    }

    /// Filter events by type
    pub fn filter_by_type(&self, event_type: EventType) -> Vec<&ProtocolEvent> {
        self.events
            .iter()
            .filter(|e| e.event_type() == event_type)
            .collect()
    }

    /// Most recent event, if any
    pub fn last(&self) -> Option<&ProtocolEvent> {
        self.events.last()
    }

    /// Check if any events were emitted
    pub fn has_events(&self) -> bool {
        !self.events.is_empty()
    }

    /// Get number of events
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Check if the log is empty
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Clear all events
    pub fn clear(&mut self) {
        self.events.clear();
    }
}
