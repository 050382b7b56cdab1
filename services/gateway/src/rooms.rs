//! Room membership and per-connection outbound queues
//!
//! Each connection gets one bounded queue drained by its writer task, so
//! a room broadcast never awaits a slow socket. A connection that lets
//! its queue overflow is disconnected (the drop policy) because a
//! reconnecting client resynchronizes through the catalogue anyway.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use types::prelude::{AuctionEvent, AuctionId, UserId};

use crate::protocol::ServerMessage;
use fanout::BusSubscriber;

/// Gateway-local connection identifier
pub type ConnId = u64;

/// Outbound queue capacity per connection before the drop policy fires
pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;

struct ConnectionHandle {
    sender: mpsc::Sender<ServerMessage>,
    #[allow(dead_code)]
    user_id: UserId,
    username: String,
}

/// Tracks connections, their rooms, and their outbound queues
#[derive(Default)]
pub struct RoomRegistry {
    connections: DashMap<ConnId, ConnectionHandle>,
    rooms: DashMap<AuctionId, HashSet<ConnId>>,
    memberships: DashMap<ConnId, HashSet<AuctionId>>,
    next_id: AtomicU64,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection; returns its id and the queue receiver for
    /// the writer task
    pub fn register(
        &self,
        user_id: UserId,
        username: &str,
    ) -> (ConnId, mpsc::Receiver<ServerMessage>) {
        let conn_id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (sender, receiver) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        self.connections.insert(
            conn_id,
            ConnectionHandle {
                sender,
                user_id,
                username: username.to_string(),
            },
        );
        self.memberships.insert(conn_id, HashSet::new());
        debug!(conn_id, username, "connection registered");
        (conn_id, receiver)
    }

    /// Remove a connection and leave all of its rooms
    pub fn disconnect(&self, conn_id: ConnId) {
        self.connections.remove(&conn_id);
        if let Some((_, joined)) = self.memberships.remove(&conn_id) {
            for auction_id in joined {
                if let Some(mut members) = self.rooms.get_mut(&auction_id) {
                    members.remove(&conn_id);
                }
            }
        }
        debug!(conn_id, "connection removed");
    }

    /// Join a connection to an auction room
    pub fn join(&self, conn_id: ConnId, auction_id: AuctionId) {
        self.rooms.entry(auction_id).or_default().insert(conn_id);
        if let Some(mut joined) = self.memberships.get_mut(&conn_id) {
            joined.insert(auction_id);
        }
    }

    /// Leave one room
    pub fn leave(&self, conn_id: ConnId, auction_id: AuctionId) {
        if let Some(mut members) = self.rooms.get_mut(&auction_id) {
            members.remove(&conn_id);
        }
        if let Some(mut joined) = self.memberships.get_mut(&conn_id) {
            joined.remove(&auction_id);
        }
    }

    /// Queue a message to one connection
    ///
    /// Overflow disconnects the client rather than blocking the caller.
    pub fn send_to(&self, conn_id: ConnId, message: ServerMessage) -> bool {
        let Some(connection) = self.connections.get(&conn_id) else {
            return false;
        };
        match connection.sender.try_send(message) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                let username = connection.username.clone();
                drop(connection);
                warn!(conn_id, username = %username, "outbound queue overflow, disconnecting");
                self.disconnect(conn_id);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                drop(connection);
                self.disconnect(conn_id);
                false
            }
        }
    }

    /// Queue a message to every member of a room (originator included)
    pub fn broadcast(&self, auction_id: AuctionId, message: ServerMessage) -> usize {
        let members: Vec<ConnId> = match self.rooms.get(&auction_id) {
            Some(members) => members.iter().copied().collect(),
            None => return 0,
        };
        let mut delivered = 0;
        for conn_id in members {
            if self.send_to(conn_id, message.clone()) {
                delivered += 1;
            }
        }
        delivered
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn room_members(&self, auction_id: AuctionId) -> usize {
        self.rooms
            .get(&auction_id)
            .map(|members| members.len())
            .unwrap_or(0)
    }
}

/// Re-emit bus events into the matching rooms
///
/// Every gateway instance runs one forwarder; room fan-out stays local
/// to the instance while the bus carries the cross-instance hop.
pub fn spawn_bus_forwarder(
    mut subscriber: BusSubscriber,
    rooms: Arc<RoomRegistry>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = subscriber.recv().await {
            match event {
                AuctionEvent::BidPlaced {
                    auction_id,
                    bid,
                    extension,
                } => {
                    rooms.broadcast(auction_id, ServerMessage::update_bid(auction_id, &bid));
                    if let Some(info) = extension {
                        rooms.broadcast(
                            auction_id,
                            ServerMessage::auction_extended(auction_id, &info),
                        );
                    }
                }
                AuctionEvent::AuctionEnded {
                    auction_id,
                    winner_id,
                    winning_bid,
                    total_bids,
                    end_time,
                } => {
                    rooms.broadcast(
                        auction_id,
                        ServerMessage::AuctionEnded {
                            auction_id,
                            winner_id,
                            winning_bid,
                            total_bids,
                            end_time,
                        },
                    );
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use fanout::FanoutBus;
    use types::prelude::*;

    fn message() -> ServerMessage {
        ServerMessage::server_time(Utc::now())
    }

    #[test]
    fn test_join_leave_membership() {
        let rooms = RoomRegistry::new();
        let (conn, _rx) = rooms.register(UserId::new(), "alice");
        let auction_id = AuctionId::new();

        rooms.join(conn, auction_id);
        assert_eq!(rooms.room_members(auction_id), 1);

        rooms.leave(conn, auction_id);
        assert_eq!(rooms.room_members(auction_id), 0);
    }

    #[test]
    fn test_disconnect_leaves_all_rooms() {
        let rooms = RoomRegistry::new();
        let (conn, _rx) = rooms.register(UserId::new(), "alice");
        let first = AuctionId::new();
        let second = AuctionId::new();

        rooms.join(conn, first);
        rooms.join(conn, second);
        rooms.disconnect(conn);

        assert_eq!(rooms.room_members(first), 0);
        assert_eq!(rooms.room_members(second), 0);
        assert_eq!(rooms.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_broadcast_reaches_members_only() {
        let rooms = RoomRegistry::new();
        let (member, mut member_rx) = rooms.register(UserId::new(), "alice");
        let (_other, mut other_rx) = rooms.register(UserId::new(), "bob");
        let auction_id = AuctionId::new();

        rooms.join(member, auction_id);
        let delivered = rooms.broadcast(auction_id, message());

        assert_eq!(delivered, 1);
        assert!(member_rx.try_recv().is_ok());
        assert!(other_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_overflow_disconnects_lagging_client() {
        let rooms = RoomRegistry::new();
        let (conn, _rx) = rooms.register(UserId::new(), "slow");
        let auction_id = AuctionId::new();
        rooms.join(conn, auction_id);

        // The writer task never drains _rx, so the queue fills
        for _ in 0..OUTBOUND_QUEUE_CAPACITY {
            assert!(rooms.send_to(conn, message()));
        }
        assert!(!rooms.send_to(conn, message()));
        assert_eq!(rooms.connection_count(), 0, "drop policy removed the client");
    }

    #[tokio::test]
    async fn test_forwarder_routes_events_into_rooms() {
        let rooms = Arc::new(RoomRegistry::new());
        let bus = FanoutBus::with_defaults();
        let handle = spawn_bus_forwarder(bus.subscribe(), Arc::clone(&rooms));

        let (conn, mut rx) = rooms.register(UserId::new(), "alice");
        let auction_id = AuctionId::new();
        rooms.join(conn, auction_id);

        bus.publish(AuctionEvent::BidPlaced {
            auction_id,
            bid: BidBroadcast {
                amount: Money::from_str("105.00").unwrap(),
                bidder_id: UserId::new(),
                bidder_username: "bob".to_string(),
                timestamp: Utc::now(),
                total_bids: 2,
            },
            extension: Some(ExtensionInfo {
                old_end_time: Utc::now(),
                new_end_time: Utc::now() + chrono::Duration::seconds(30),
                extended_by_secs: 30,
            }),
        });

        let first = tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(first, ServerMessage::UpdateBid { .. }));

        let second = tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(second, ServerMessage::AuctionExtended { .. }));

        handle.abort();
    }
}
