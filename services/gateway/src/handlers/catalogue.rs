use crate::auth::AuthenticatedUser;
use crate::error::AppError;
use crate::state::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use cold_store::AuctionRow;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;
use types::prelude::*;
use uuid::Uuid;

/// Auction projection returned by the catalogue surface
///
/// While an auction is active the hot record overrides the mirrored
/// fields, so a reconnecting client that re-reads an item always
/// converges on the authoritative state.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemProjection {
    pub id: AuctionId,
    pub seller_id: UserId,
    pub title: String,
    pub description: String,
    pub category: Option<String>,
    pub starting_price: Money,
    pub reserve_price: Option<Money>,
    pub current_bid: Money,
    pub bid_increment: Money,
    pub highest_bidder_id: Option<UserId>,
    pub total_bids: u64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub original_end_time: DateTime<Utc>,
    pub status: AuctionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ItemProjection {
    fn build(row: AuctionRow, state: &AppState) -> Result<Self, AppError> {
        let title = row.title.clone();
        let description = row.description.clone();
        let category = row.category.clone();
        let created_at = row.created_at;
        let updated_at = row.updated_at;
        let row_id = AuctionId::from_uuid(row.id);

        let live = match state.hot.get(row_id) {
            Some(live) => live,
            None => row.into_live()?,
        };

        Ok(Self {
            id: live.id,
            seller_id: live.seller_id,
            title,
            description,
            category,
            starting_price: live.starting_price,
            reserve_price: live.reserve_price,
            current_bid: live.current_bid,
            bid_increment: live.bid_increment,
            highest_bidder_id: live.highest_bidder_id,
            total_bids: live.total_bids,
            start_time: live.start_time,
            end_time: live.end_time,
            original_end_time: live.original_end_time,
            status: live.status,
            created_at,
            updated_at,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub status: Option<String>,
    pub category: Option<String>,
}

pub async fn list_items(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<ItemProjection>>, AppError> {
    let limit = query.limit.unwrap_or(20).clamp(1, 100);
    let page = query.page.unwrap_or(1).max(1);
    let offset = (page - 1) * limit;

    let rows = state
        .cold
        .list_auctions(
            query.status.as_deref(),
            query.category.as_deref(),
            limit,
            offset,
        )
        .await?;

    let mut items = Vec::with_capacity(rows.len());
    for row in rows {
        items.push(ItemProjection::build(row, &state)?);
    }
    Ok(Json(items))
}

pub async fn get_item(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ItemProjection>, AppError> {
    let row = state
        .cold
        .load_auction_row(AuctionId::from_uuid(id))
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Auction {} not found", id)))?;
    Ok(Json(ItemProjection::build(row, &state)?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateItemRequest {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub category: Option<String>,
    pub starting_price: Money,
    pub bid_increment: Money,
    pub reserve_price: Option<Money>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: DateTime<Utc>,
}

pub async fn create_item(
    State(state): State<AppState>,
    AuthenticatedUser(identity): AuthenticatedUser,
    Json(request): Json<CreateItemRequest>,
) -> Result<(StatusCode, Json<ItemProjection>), AppError> {
    let now = Utc::now();
    let start_time = request.start_time.unwrap_or(now);

    // Validate before constructing; the domain type asserts these
    if request.title.trim().is_empty() {
        return Err(AppError::BadRequest("Title must not be empty".into()));
    }
    if !request.starting_price.is_positive() {
        return Err(AppError::BadRequest("Starting price must be positive".into()));
    }
    if !request.bid_increment.is_positive() {
        return Err(AppError::BadRequest("Bid increment must be positive".into()));
    }
    if let Some(reserve) = request.reserve_price {
        if reserve < request.starting_price {
            return Err(AppError::BadRequest(
                "Reserve price must not be below the starting price".into(),
            ));
        }
    }
    if request.end_time <= start_time || request.end_time <= now {
        return Err(AppError::BadRequest("End time must be in the future".into()));
    }

    let status = if start_time <= now {
        AuctionStatus::Active
    } else {
        AuctionStatus::Scheduled
    };

    let auction = LiveAuction::new(
        AuctionId::new(),
        identity.user_id,
        request.starting_price,
        request.bid_increment,
        request.reserve_price,
        start_time,
        request.end_time,
        status,
    );

    state
        .cold
        .ensure_user(identity.user_id, &identity.username)
        .await?;
    state
        .cold
        .create_auction(
            &auction,
            &request.title,
            &request.description,
            request.category.as_deref(),
        )
        .await?;

    // Active auctions go live immediately: hot record + finalize timer
    if status == AuctionStatus::Active {
        state.hot.install(auction.clone());
        state.scheduler.schedule(auction.id, auction.end_time);
    }

    info!(
        auction_id = %auction.id,
        seller = %identity.username,
        status = status.as_str(),
        "auction created"
    );

    let row = state
        .cold
        .load_auction_row(auction.id)
        .await?
        .ok_or_else(|| AppError::NotFound("Auction row vanished after insert".into()))?;
    Ok((StatusCode::CREATED, Json(ItemProjection::build(row, &state)?)))
}

/// Liveness plus a coarse state snapshot
pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let cold_ok = state.cold.health_check().await.is_ok();
    let jobs = state.jobs.stats();
    Json(json!({
        "status": if cold_ok { "ok" } else { "degraded" },
        "coldStore": cold_ok,
        "activeAuctions": state.hot.active_count(),
        "connections": state.rooms.connection_count(),
        "jobs": {
            "processed": jobs.processed,
            "retried": jobs.retried,
            "dead": jobs.dead,
            "pending": jobs.pending,
        },
    }))
}
