//! Multicall3 batching.
//!
//! Calls are grouped into chunks and each chunk travels as one
//! `aggregate3` call with `allowFailure = true`, so one reverting call does
//! not sink the rest of its chunk.

use alloy::hex;
use alloy::primitives::{address, Address, Bytes};
use alloy::sol;
use alloy::sol_types::{decode_revert_reason, SolCall};

use crate::query::types::{CallOutput, ContractCall, QueryError, QueryResult};

/// Canonical Multicall3 deployment, identical on most EVM chains.
pub const MULTICALL3_ADDRESS: Address = address!("cA11bde05977b3631167028862bE2a173976CA11");

sol! {
    #[derive(Debug)]
    interface IMulticall3 {
        struct Call3 {
            address target;
            bool allowFailure;
            bytes callData;
        }

        struct CallResult {
            bool success;
            bytes returnData;
        }

        function aggregate3(Call3[] calldata calls) external payable returns (CallResult[] memory returnData);
    }
}

/// Ordered chunk of a read request, sent as one round trip.
#[derive(Debug, Clone)]
pub struct BatchCallGroup {
    /// Position of the first call within the whole request.
    pub offset: usize,
    pub calls: Vec<ContractCall>,
}

impl BatchCallGroup {
    /// Split `calls` into consecutive groups of at most `batch_size`.
    pub fn partition(calls: Vec<ContractCall>, batch_size: usize) -> Vec<BatchCallGroup> {
        let batch_size = batch_size.max(1);
        let mut groups = Vec::with_capacity(calls.len().div_ceil(batch_size));
        let mut calls = calls.into_iter().peekable();
        let mut offset = 0;

        while calls.peek().is_some() {
            let chunk: Vec<ContractCall> = calls.by_ref().take(batch_size).collect();
            let len = chunk.len();
            groups.push(BatchCallGroup {
                offset,
                calls: chunk,
            });
            offset += len;
        }
        groups
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Calldata for `aggregate3` over this group.
    pub fn encode(&self) -> Bytes {
        let calls = self
            .calls
            .iter()
            .map(|call| IMulticall3::Call3 {
                target: call.target,
                allowFailure: true,
                callData: call.calldata.clone(),
            })
            .collect();
        IMulticall3::aggregate3Call { calls }.abi_encode().into()
    }

    /// Split an `aggregate3` return value into per-call results.
    ///
    /// Fails as a whole only when the payload itself is malformed.
    pub fn decode(&self, raw: &[u8]) -> QueryResult<Vec<QueryResult<CallOutput>>> {
        let results = IMulticall3::aggregate3Call::abi_decode_returns(raw)
            .map_err(|e| QueryError::Decode(format!("aggregate3 response: {}", e)))?;

        if results.len() != self.calls.len() {
            return Err(QueryError::Decode(format!(
                "aggregate3 returned {} results for {} calls",
                results.len(),
                self.calls.len()
            )));
        }

        Ok(self
            .calls
            .iter()
            .zip(results)
            .map(|(call, result)| {
                if result.success {
                    Ok(CallOutput {
                        target: call.target,
                        data: result.returnData,
                    })
                } else {
                    Err(QueryError::CallReverted {
                        target: call.target,
                        reason: revert_reason(&result.returnData),
                    })
                }
            })
            .collect())
    }
}

fn revert_reason(data: &[u8]) -> String {
    if data.is_empty() {
        return "execution reverted".to_string();
    }
    decode_revert_reason(data).unwrap_or_else(|| format!("0x{}", hex::encode(data)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::sol_types::{Revert, SolError};

    fn calls(n: usize) -> Vec<ContractCall> {
        (0..n)
            .map(|i| ContractCall::new(Address::with_last_byte(i as u8), vec![i as u8; 4]))
            .collect()
    }

    #[test]
    fn test_partition_preserves_order() {
        let groups = BatchCallGroup::partition(calls(250), 100);
        assert_eq!(groups.len(), 3);
        assert_eq!(groups[0].offset, 0);
        assert_eq!(groups[1].offset, 100);
        assert_eq!(groups[2].offset, 200);
        assert_eq!(groups[2].len(), 50);
        assert_eq!(groups[1].calls[0].target, Address::with_last_byte(100));
    }

    #[test]
    fn test_partition_empty() {
        assert!(BatchCallGroup::partition(Vec::new(), 100).is_empty());
    }

    #[test]
    fn test_encode_targets_aggregate3() {
        let group = &BatchCallGroup::partition(calls(2), 10)[0];
        let encoded = group.encode();
        assert_eq!(&encoded[..4], IMulticall3::aggregate3Call::SELECTOR.as_slice());

        let decoded = IMulticall3::aggregate3Call::abi_decode(&encoded).unwrap();
        assert_eq!(decoded.calls.len(), 2);
        assert!(decoded.calls.iter().all(|c| c.allowFailure));
    }

    #[test]
    fn test_decode_mixed_results() {
        let group = &BatchCallGroup::partition(calls(2), 10)[0];
        let revert = Revert::from("insufficient balance").abi_encode();
        let returned = vec![
            IMulticall3::CallResult {
                success: true,
                returnData: Bytes::from_static(&[0xaa]),
            },
            IMulticall3::CallResult {
                success: false,
                returnData: revert.into(),
            },
        ];
        let raw = IMulticall3::aggregate3Call::abi_encode_returns(&returned);

        let results = group.decode(&raw).unwrap();
        assert_eq!(results[0].as_ref().unwrap().data, Bytes::from_static(&[0xaa]));
        match &results[1] {
            Err(QueryError::CallReverted { reason, .. }) => assert!(reason.contains("insufficient balance")),
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn test_decode_length_mismatch() {
        let group = &BatchCallGroup::partition(calls(3), 10)[0];
        let raw = IMulticall3::aggregate3Call::abi_encode_returns(&Vec::<IMulticall3::CallResult>::new());
        assert!(matches!(group.decode(&raw), Err(QueryError::Decode(_))));
    }
}
