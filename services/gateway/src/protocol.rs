//! Wire protocol for the real-time channel
//!
//! Message names and payload shapes are part of the client contract:
//! camelCase fields, money as two-decimal strings, ISO-8601 UTC times on
//! broadcasts, and epoch-millis on `SERVER_TIME`. Rejection details keep
//! their snake_case keys.

use bidding::{AcceptedBid, AdmissionError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use types::prelude::*;

/// Messages a client may send
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    #[serde(rename = "auction:join")]
    Join { auction_id: AuctionId },

    #[serde(rename = "auction:leave")]
    Leave { auction_id: AuctionId },

    #[serde(rename = "BID_PLACED")]
    BidPlaced { auction_id: AuctionId, amount: Money },
}

impl ClientMessage {
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

/// Bid summary as it appears on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireBid {
    pub amount: Money,
    pub bidder_id: UserId,
    pub bidder_username: String,
    pub timestamp: DateTime<Utc>,
    pub total_bids: u64,
}

impl From<&BidBroadcast> for WireBid {
    fn from(bid: &BidBroadcast) -> Self {
        Self {
            amount: bid.amount,
            bidder_id: bid.bidder_id,
            bidder_username: bid.bidder_username.clone(),
            timestamp: bid.timestamp,
            total_bids: bid.total_bids,
        }
    }
}

/// Structured rejection as it appears on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Messages the server may send
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    #[serde(rename = "SERVER_TIME")]
    ServerTime { server_time: i64 },

    #[serde(rename = "auction:joined")]
    Joined { auction_id: AuctionId },

    #[serde(rename = "error")]
    Error { code: String, message: String },

    #[serde(rename = "BID_ACCEPTED")]
    BidAccepted { auction_id: AuctionId, bid: WireBid },

    #[serde(rename = "BID_REJECTED")]
    BidRejected {
        auction_id: AuctionId,
        error: WireError,
    },

    #[serde(rename = "UPDATE_BID")]
    UpdateBid { auction_id: AuctionId, bid: WireBid },

    #[serde(rename = "AUCTION_EXTENDED")]
    AuctionExtended {
        auction_id: AuctionId,
        old_end_time: DateTime<Utc>,
        new_end_time: DateTime<Utc>,
        extended_by: i64,
    },

    #[serde(rename = "AUCTION_ENDED")]
    AuctionEnded {
        auction_id: AuctionId,
        winner_id: Option<UserId>,
        winning_bid: Option<Money>,
        total_bids: u64,
        end_time: DateTime<Utc>,
    },
}

impl ServerMessage {
    /// Clock-sync message carrying the server wall clock in epoch millis
    pub fn server_time(now: DateTime<Utc>) -> Self {
        ServerMessage::ServerTime {
            server_time: now.timestamp_millis(),
        }
    }

    pub fn error(code: &str, message: impl Into<String>) -> Self {
        ServerMessage::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }

    pub fn bid_accepted(accepted: &AcceptedBid) -> Self {
        ServerMessage::BidAccepted {
            auction_id: accepted.auction_id,
            bid: WireBid {
                amount: accepted.amount,
                bidder_id: accepted.bidder_id,
                bidder_username: accepted.bidder_username.clone(),
                timestamp: accepted.timestamp,
                total_bids: accepted.total_bids,
            },
        }
    }

    pub fn bid_rejected(auction_id: AuctionId, err: &AdmissionError) -> Self {
        ServerMessage::BidRejected {
            auction_id,
            error: WireError {
                code: err.code().to_string(),
                message: err.to_string(),
                details: err.details(),
            },
        }
    }

    pub fn update_bid(auction_id: AuctionId, bid: &BidBroadcast) -> Self {
        ServerMessage::UpdateBid {
            auction_id,
            bid: bid.into(),
        }
    }

    pub fn auction_extended(auction_id: AuctionId, info: &ExtensionInfo) -> Self {
        ServerMessage::AuctionExtended {
            auction_id,
            old_end_time: info.old_end_time,
            new_end_time: info.new_end_time,
            extended_by: info.extended_by_secs,
        }
    }

    /// Serialize for the socket; the shapes are stable, failure here is
    /// a programming error surfaced as a close
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            "{\"type\":\"error\",\"code\":\"INTERNAL_ERROR\",\"message\":\"encoding\"}".to_string()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_parse_join() {
        let auction_id = AuctionId::new();
        let raw = format!(r#"{{"type":"auction:join","auctionId":"{}"}}"#, auction_id);
        assert_eq!(
            ClientMessage::parse(&raw).unwrap(),
            ClientMessage::Join { auction_id }
        );
    }

    #[test]
    fn test_parse_bid_placed_accepts_number_amounts() {
        let auction_id = AuctionId::new();
        let raw = format!(
            r#"{{"type":"BID_PLACED","auctionId":"{}","amount":105.00}}"#,
            auction_id
        );
        match ClientMessage::parse(&raw).unwrap() {
            ClientMessage::BidPlaced { amount, .. } => {
                assert_eq!(amount, Money::from_str("105.00").unwrap())
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_parse_rejects_unknown_type() {
        assert!(ClientMessage::parse(r#"{"type":"shutdown"}"#).is_err());
        assert!(ClientMessage::parse("not json").is_err());
    }

    #[test]
    fn test_server_time_shape() {
        let now = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let value = serde_json::to_value(ServerMessage::server_time(now)).unwrap();
        assert_eq!(
            value,
            json!({"type": "SERVER_TIME", "serverTime": 1_700_000_000_000i64})
        );
    }

    #[test]
    fn test_update_bid_shape() {
        let auction_id = AuctionId::new();
        let bidder_id = UserId::new();
        let message = ServerMessage::update_bid(
            auction_id,
            &BidBroadcast {
                amount: Money::from_str("105.00").unwrap(),
                bidder_id,
                bidder_username: "alice".to_string(),
                timestamp: Utc.timestamp_opt(910, 0).unwrap(),
                total_bids: 2,
            },
        );

        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["type"], "UPDATE_BID");
        assert_eq!(value["auctionId"], auction_id.to_string());
        assert_eq!(value["bid"]["amount"], "105.00");
        assert_eq!(value["bid"]["bidderId"], bidder_id.to_string());
        assert_eq!(value["bid"]["bidderUsername"], "alice");
        assert_eq!(value["bid"]["totalBids"], 2);
    }

    #[test]
    fn test_bid_rejected_keeps_snake_case_details() {
        let auction_id = AuctionId::new();
        let err = AdmissionError::Rejected(BidRejection::TooLow {
            current_bid: Money::from_str("105.00").unwrap(),
            minimum_bid: Money::from_str("110.00").unwrap(),
            your_bid: Money::from_str("105.00").unwrap(),
            is_first_bid: false,
        });

        let value = serde_json::to_value(ServerMessage::bid_rejected(auction_id, &err)).unwrap();
        assert_eq!(value["type"], "BID_REJECTED");
        assert_eq!(value["error"]["code"], "BID_TOO_LOW");
        assert_eq!(value["error"]["details"]["current_bid"], "105.00");
        assert_eq!(value["error"]["details"]["minimum_bid"], "110.00");
        assert_eq!(value["error"]["details"]["your_bid"], "105.00");
        assert_eq!(value["error"]["details"]["is_first_bid"], false);
    }

    #[test]
    fn test_rejections_without_details_omit_the_field() {
        let err = AdmissionError::Rejected(BidRejection::SellerCannotBid);
        let value = serde_json::to_value(ServerMessage::bid_rejected(AuctionId::new(), &err)).unwrap();
        assert!(value["error"].get("details").is_none());
    }

    #[test]
    fn test_auction_extended_uses_iso_times() {
        let auction_id = AuctionId::new();
        let message = ServerMessage::auction_extended(
            auction_id,
            &ExtensionInfo {
                old_end_time: Utc.timestamp_opt(1000, 0).unwrap(),
                new_end_time: Utc.timestamp_opt(1030, 0).unwrap(),
                extended_by_secs: 30,
            },
        );

        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["oldEndTime"], "1970-01-01T00:16:40Z");
        assert_eq!(value["newEndTime"], "1970-01-01T00:17:10Z");
        assert_eq!(value["extendedBy"], 30);
    }

    #[test]
    fn test_auction_ended_null_winner() {
        let message = ServerMessage::AuctionEnded {
            auction_id: AuctionId::new(),
            winner_id: None,
            winning_bid: None,
            total_bids: 0,
            end_time: Utc.timestamp_opt(1000, 0).unwrap(),
        };
        let value = serde_json::to_value(&message).unwrap();
        assert!(value["winnerId"].is_null());
        assert!(value["winningBid"].is_null());
    }
}
