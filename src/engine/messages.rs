//! Live-session protocol messages.
//!
//! Tagged serde enums; the transport (WebSocket or otherwise) is outside
//! this crate, which only defines the shapes and the topic routing.

use serde::{Deserialize, Serialize};

use crate::core::{Address, Amount, StreamId, TxHash, UnixSeconds};

use super::hub::Topic;

/// Client -> server subscription requests.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    SubscribeToStreams { stream_ids: Vec<StreamId> },
    SubscribeToDashboard { address: Address },
    SubscribeToWithdrawals { address: Address },
}

impl ClientMessage {
    /// Hub topics this request subscribes to.
    pub fn topics(&self) -> Vec<Topic> {
        match self {
            ClientMessage::SubscribeToStreams { stream_ids } => {
                stream_ids.iter().cloned().map(Topic::Stream).collect()
            }
            ClientMessage::SubscribeToDashboard { address } => {
                vec![Topic::Dashboard(address.clone())]
            }
            ClientMessage::SubscribeToWithdrawals { address } => {
                vec![Topic::Withdrawals(address.clone())]
            }
        }
    }
}

/// Server -> client pushes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    StreamBalanceUpdate {
        stream_id: StreamId,
        claimable_amount: Amount,
        total_earned: Amount,
        streaming_progress: u8,
        timestamp: UnixSeconds,
    },
    WithdrawalProcessed {
        stream_id: StreamId,
        recipient_address: Address,
        amount: Amount,
        transaction_hash: TxHash,
        timestamp: UnixSeconds,
    },
    StreamCompletionAlert {
        stream_id: StreamId,
        payer_address: Address,
        recipient_address: Address,
        completion_time: UnixSeconds,
        time_remaining: u64,
    },
    WithdrawalLimitWarning {
        user_address: Address,
        withdrawals_today: u32,
        max_withdrawals_per_day: u32,
        remaining_withdrawals: u32,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(n: u8) -> Address {
        Address::parse(&format!("0x{:040x}", n)).unwrap()
    }

    #[test]
    fn client_messages_route_to_topics() {
        let msg = ClientMessage::SubscribeToStreams {
            stream_ids: vec![StreamId::from_onchain(1), StreamId::from_onchain(2)],
        };
        assert_eq!(msg.topics().len(), 2);

        let msg = ClientMessage::SubscribeToDashboard { address: addr(5) };
        assert_eq!(msg.topics(), vec![Topic::Dashboard(addr(5))]);
    }

    #[test]
    fn wire_shape_is_snake_case_tagged() {
        let msg = ServerMessage::StreamBalanceUpdate {
            stream_id: StreamId::from_onchain(7),
            claimable_amount: Amount(123),
            total_earned: Amount(456),
            streaming_progress: 42,
            timestamp: UnixSeconds(1_700_000_000),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "stream_balance_update");
        assert_eq!(json["stream_id"], "7");
        assert_eq!(json["claimable_amount"], "123");
        assert_eq!(json["streaming_progress"], 42);

        let raw = r#"{"type":"subscribe_to_dashboard","address":"0x0000000000000000000000000000000000000005"}"#;
        let parsed: ClientMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed, ClientMessage::SubscribeToDashboard { address: addr(5) });
    }
}
