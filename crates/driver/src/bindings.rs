//! Contract bindings used by the driver.

use ethers::prelude::abigen;

// Generates the bindings for the `DisputeGameFactory` contract.
abigen!(
    DisputeGameFactory,
    r"[
        function gameCount() external view returns (uint256)
        function gameAtIndex(uint256 index) external view returns (address proxy, uint256 timestamp)
    ]"
);

// Generates the bindings for the `FaultDisputeGame` contract.
abigen!(
    FaultDisputeGame,
    r"[
        function status() external view returns (uint8)
        function claimDataLen() external view returns (uint256)
        function claimData(uint256 index) external view returns (uint32 parentIndex, bool countered, bytes32 claim, uint128 position, uint128 clock)
        function maxGameDepth() external view returns (uint256)
        function absolutePrestate() external view returns (bytes32)
        function attack(uint256 parentIndex, bytes32 claim) external payable
        function defend(uint256 parentIndex, bytes32 claim) external payable
        function step(uint256 claimIndex, bool isAttack, bytes stateData, bytes proof) external
        function resolve() external returns (uint8)
        function l1Head() external view returns (bytes32)
        function proposals() external view returns ((uint128,uint128,bytes32), (uint128,uint128,bytes32))
        function addLocalData(uint256 ident, uint256 partOffset) external
        function vm() external view returns (address)
    ]"
);

// Generates the bindings for the `MIPS` VM contract.
abigen!(
    Mips,
    r"[
        function oracle() external view returns (address)
    ]"
);
