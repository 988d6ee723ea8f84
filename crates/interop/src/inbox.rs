//! The `inbox` module encodes and decodes calls to the cross-chain inbox's `executeMessage`.

use crate::{ExecutingMessage, MessageIdentifier};
use anyhow::{anyhow, Result};
use ethers::{
    abi::{self, ParamType, Token},
    types::{Address, Bytes, Transaction, U256},
    utils::id,
};

/// The signature of the inbox function that executes a cross-chain message.
pub const EXECUTE_MESSAGE_SIGNATURE: &str =
    "executeMessage((address,uint256,uint64,uint64,uint256),address,bytes)";

fn param_types() -> [ParamType; 3] {
    [
        ParamType::Tuple(vec![
            ParamType::Address,
            ParamType::Uint(256),
            ParamType::Uint(64),
            ParamType::Uint(64),
            ParamType::Uint(256),
        ]),
        ParamType::Address,
        ParamType::Bytes,
    ]
}

/// Packs the calldata of an `executeMessage` call.
pub fn encode_execute_message(message: &ExecutingMessage) -> Bytes {
    let ident = &message.id;
    let mut calldata = id(EXECUTE_MESSAGE_SIGNATURE).to_vec();
    calldata.extend(abi::encode(&[
        Token::Tuple(vec![
            Token::Address(ident.origin),
            Token::Uint(ident.block_number),
            Token::Uint(U256::from(ident.log_index)),
            Token::Uint(U256::from(ident.timestamp)),
            Token::Uint(ident.chain_id),
        ]),
        Token::Address(message.target),
        Token::Bytes(message.payload.to_vec()),
    ]));
    calldata.into()
}

/// Unpacks the calldata of an `executeMessage` call.
///
/// ### Takes
/// - `calldata`: The full calldata, including the function selector.
///
/// ### Returns
/// - `Ok(ExecutingMessage)`: The decoded message.
/// - `Err(anyhow::Error)`: The selector does not match or the arguments are malformed.
pub fn parse_execute_message(calldata: &[u8]) -> Result<ExecutingMessage> {
    if calldata.len() < 4 {
        return Err(anyhow!("Calldata is shorter than a function selector"));
    }
    let (selector, args) = calldata.split_at(4);
    if selector != id(EXECUTE_MESSAGE_SIGNATURE) {
        anyhow::bail!("Calldata is not an executeMessage call");
    }

    let mut tokens = abi::decode(&param_types(), args)?.into_iter();
    let (Some(Token::Tuple(fields)), Some(Token::Address(target)), Some(Token::Bytes(payload))) =
        (tokens.next(), tokens.next(), tokens.next())
    else {
        anyhow::bail!("Unexpected executeMessage arguments");
    };
    let [Token::Address(origin), Token::Uint(block_number), Token::Uint(log_index), Token::Uint(timestamp), Token::Uint(chain_id)] =
        fields.as_slice()
    else {
        anyhow::bail!("Unexpected message identifier fields");
    };
    let log_index = narrow_u64(log_index, "log index")?;
    let timestamp = narrow_u64(timestamp, "timestamp")?;

    Ok(ExecutingMessage {
        id: MessageIdentifier {
            origin: *origin,
            block_number: *block_number,
            log_index,
            timestamp,
            chain_id: *chain_id,
        },
        target,
        payload: payload.into(),
    })
}

/// ABI decoding does not range check `uint64` words.
fn narrow_u64(word: &U256, field: &str) -> Result<u64> {
    if *word > U256::from(u64::MAX) {
        anyhow::bail!("Message identifier {} {} does not fit in a uint64", field, word);
    }
    Ok(word.as_u64())
}

/// Returns the executing message carried by `tx`, or `None` when the transaction is not a
/// well-formed call to the `inbox`.
pub fn parse_transaction(tx: &Transaction, inbox: Address) -> Option<ExecutingMessage> {
    if tx.to != Some(inbox) {
        return None;
    }
    match parse_execute_message(&tx.input) {
        Ok(message) => Some(message),
        Err(e) => {
            tracing::debug!(target: "inbox", "Ignoring inbox transaction {:?}: {}", tx.hash, e);
            None
        }
    }
}
