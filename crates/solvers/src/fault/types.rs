//! The types module contains all of the types relevant to the fault dispute game.

use super::Position;
use crate::trace::PreimageOracleData;
use ethers::types::{Bytes, H256};

/// The [ClaimData] struct represents a commitment at a [Position] within the game tree. Two claims
/// with equal [ClaimData] are the same claim for the purposes of the game graph.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClaimData {
    /// The hash committed to at the position.
    pub value: H256,
    /// The position of the claim within the game tree.
    pub position: Position,
}

impl ClaimData {
    /// Creates a new [ClaimData].
    pub fn new(value: H256, position: Position) -> Self {
        Self { value, position }
    }

    pub fn depth(&self) -> u32 {
        self.position.depth()
    }

    pub fn index_at_depth(&self) -> u64 {
        self.position.index_at_depth()
    }
}

/// The [Clock] struct represents a clock that is used to track the duration and timestamp of a
/// given [Claim] within the game.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Clock {
    /// The duration elapsed on the chess clock.
    pub duration: u64,
    /// The timestamp at which the clock was last updated.
    pub timestamp: u64,
}

impl From<u128> for Clock {
    fn from(packed: u128) -> Self {
        Self {
            duration: (packed >> 64) as u64,
            timestamp: packed as u64,
        }
    }
}

/// A [Claim] made by a participant in a dispute game, along with its link to the parent claim.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Claim {
    pub claim_data: ClaimData,
    /// The [ClaimData] of the parent claim. Zero-valued for the root claim.
    pub parent: ClaimData,
    /// Whether or not the current claim has ever been countered.
    pub countered: bool,
    /// The clock that is used to track the duration elapsed and timestamp of the claim.
    pub clock: Clock,
    /// The index of the claim in the on-chain claim array.
    pub contract_index: u32,
    /// The on-chain index of the parent claim.
    pub parent_contract_index: u32,
}

impl Claim {
    /// Creates a root [Claim] at the given value.
    pub fn root(value: H256) -> Self {
        Self {
            claim_data: ClaimData::new(value, Position::ROOT),
            parent_contract_index: u32::MAX,
            ..Default::default()
        }
    }

    pub fn value(&self) -> H256 {
        self.claim_data.value
    }

    pub fn position(&self) -> Position {
        self.claim_data.position
    }

    pub fn depth(&self) -> u32 {
        self.claim_data.depth()
    }

    pub fn is_root(&self) -> bool {
        self.claim_data.position.is_root()
    }

    /// Returns `true` if the claim defends its parent rather than attacking it, i.e. it is not a
    /// child of the parent's own position.
    pub fn defends_parent(&self) -> bool {
        (self.claim_data.index_at_depth() >> 1) != self.parent.index_at_depth()
    }
}

/// The arguments of a `step` call on the dispute game contract.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StepCallData {
    pub claim_index: u32,
    pub is_attack: bool,
    pub state_data: Bytes,
    pub proof: Bytes,
}

/// The data needed to execute a single VM step against a leaf claim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepData {
    /// The leaf claim being countered.
    pub leaf_claim: Claim,
    pub is_attack: bool,
    /// The encoded VM state the step starts from.
    pub pre_state: Bytes,
    pub proof: Bytes,
    /// Preimage data that must be loaded into the oracle before the step can execute.
    pub oracle_data: Option<PreimageOracleData>,
}

impl From<&StepData> for StepCallData {
    fn from(data: &StepData) -> Self {
        Self {
            claim_index: data.leaf_claim.contract_index,
            is_attack: data.is_attack,
            state_data: data.pre_state.clone(),
            proof: data.proof.clone(),
        }
    }
}

/// A [Response] is an action taken by a participant in the dispute game in response to
/// a claim made by another participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Post a counter claim against its parent.
    Move(Claim),
    /// Perform a VM step against a leaf claim.
    Step(StepData),
}
