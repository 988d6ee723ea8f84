//! The VM state as written by cannon, and its onchain witness encoding.

use ethers::{
    types::{Bytes, H256},
    utils::keccak256,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::trace::TraceError;

/// Size in bytes of an encoded [VmState] witness.
pub const STATE_WITNESS_SIZE: usize = 226;

/// A snapshot of the MIPS VM. The memory itself is merkleized by the VM, only its root is read.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VmState {
    pub mem_root: H256,
    pub preimage_key: H256,
    pub preimage_offset: u32,
    pub pc: u32,
    #[serde(rename = "nextPC")]
    pub next_pc: u32,
    pub lo: u32,
    pub hi: u32,
    pub heap: u32,
    #[serde(rename = "exit")]
    pub exit_code: u8,
    pub exited: bool,
    pub step: u64,
    pub registers: [u32; 32],
}

impl VmState {
    /// Reads a [VmState] from a JSON file.
    pub async fn read(path: impl AsRef<Path>) -> Result<Self, TraceError> {
        let raw = tokio::fs::read(path).await?;
        Ok(serde_json::from_slice(&raw)?)
    }

    /// Encodes the state in the layout the onchain VM expects:
    /// `memRoot ‖ preimageKey ‖ preimageOffset ‖ pc ‖ nextPC ‖ lo ‖ hi ‖ heap ‖ exitCode ‖ exited
    /// ‖ step ‖ registers`, with every integer big-endian.
    pub fn encode_witness(&self) -> Bytes {
        let mut out = Vec::with_capacity(STATE_WITNESS_SIZE);
        out.extend_from_slice(self.mem_root.as_bytes());
        out.extend_from_slice(self.preimage_key.as_bytes());
        for word in [
            self.preimage_offset,
            self.pc,
            self.next_pc,
            self.lo,
            self.hi,
            self.heap,
        ] {
            out.extend_from_slice(&word.to_be_bytes());
        }
        out.push(self.exit_code);
        out.push(self.exited as u8);
        out.extend_from_slice(&self.step.to_be_bytes());
        for register in self.registers {
            out.extend_from_slice(&register.to_be_bytes());
        }
        out.into()
    }

    /// The commitment to the state used as a claim value.
    pub fn hash(&self) -> H256 {
        H256::from(keccak256(self.encode_witness()))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn witness_layout() {
        let mut registers = [0u32; 32];
        registers[31] = 0xdeadbeef;
        let state = VmState {
            mem_root: H256::repeat_byte(0x11),
            preimage_key: H256::repeat_byte(0x22),
            preimage_offset: 1,
            pc: 2,
            next_pc: 3,
            lo: 4,
            hi: 5,
            heap: 6,
            exit_code: 7,
            exited: true,
            step: 8,
            registers,
        };
        let witness = state.encode_witness();
        assert_eq!(witness.len(), STATE_WITNESS_SIZE);
        assert_eq!(&witness[..32], &[0x11; 32]);
        assert_eq!(&witness[32..64], &[0x22; 32]);
        assert_eq!(&witness[64..68], &1u32.to_be_bytes());
        assert_eq!(&witness[84..88], &6u32.to_be_bytes());
        assert_eq!(witness[88], 7);
        assert_eq!(witness[89], 1);
        assert_eq!(&witness[90..98], &8u64.to_be_bytes());
        assert_eq!(&witness[222..226], &0xdeadbeefu32.to_be_bytes());
    }

    #[test]
    fn parses_vm_json() {
        let json = format!(
            r#"{{"memRoot":"{:?}","preimageKey":"{:?}","preimageOffset":0,"pc":4,"nextPC":8,"lo":0,"hi":0,"heap":1073741824,"exit":1,"exited":true,"step":42,"registers":{:?}}}"#,
            H256::repeat_byte(1),
            H256::zero(),
            [0u32; 32]
        );
        let state: VmState = serde_json::from_str(&json).unwrap();
        assert_eq!(state.next_pc, 8);
        assert_eq!(state.exit_code, 1);
        assert!(state.exited);
        assert_eq!(state.step, 42);
    }
}
