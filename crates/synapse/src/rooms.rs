//! Room listing, inspection and deletion.

use std::{fmt, str::FromStr};

use {
    reqwest::Method,
    serde::{Deserialize, Serialize},
    tokio_util::sync::CancellationToken,
    tracing::info,
};

use crate::{
    client::{AdminClient, cancellable},
    error::{Result, decode, ensure_not_error},
};

const ROOMS_V1: &str = "/_synapse/admin/v1/rooms";
const ROOMS_V2: &str = "/_synapse/admin/v2/rooms";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Room {
    pub room_id: String,
    pub name: Option<String>,
    pub canonical_alias: Option<String>,
    pub joined_members: u64,
    pub joined_local_members: u64,
    pub version: String,
    pub creator: String,
    pub encryption: Option<String>,
    pub federatable: bool,
    pub public: bool,
    pub join_rules: Option<String>,
    pub guest_access: Option<String>,
    pub history_visibility: Option<String>,
    pub state_events: u64,
    pub room_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RoomDetail {
    pub room_id: String,
    pub name: Option<String>,
    pub topic: Option<String>,
    pub avatar: Option<String>,
    pub canonical_alias: Option<String>,
    pub joined_members: u64,
    pub joined_local_members: u64,
    pub joined_local_devices: u64,
    pub version: String,
    pub creator: String,
    pub encryption: Option<String>,
    pub federatable: bool,
    pub public: bool,
    pub join_rules: Option<String>,
    pub guest_access: Option<String>,
    pub history_visibility: Option<String>,
    pub state_events: u64,
    pub room_type: Option<String>,
    pub forgotten: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RoomMembers {
    pub members: Vec<String>,
    pub total: u64,
}

/// Pagination cursor. Synapse sends a number, other deployments a string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(untagged)]
pub enum BatchToken {
    Number(u64),
    Text(String),
}

impl fmt::Display for BatchToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

/// One page of the room list. A single malformed room rejects the page.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RoomsListResponse {
    pub rooms: Vec<Room>,
    pub offset: u64,
    pub total_rooms: u64,
    #[serde(default)]
    pub next_batch: Option<BatchToken>,
    #[serde(default)]
    pub prev_batch: Option<BatchToken>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderBy {
    Alphabetical,
    Size,
    Name,
    CanonicalAlias,
    JoinedMembers,
    JoinedLocalMembers,
    Version,
    Creator,
    Encryption,
    Federatable,
    Public,
    JoinRules,
    GuestAccess,
    HistoryVisibility,
    StateEvents,
}

impl OrderBy {
    pub const ALL: [Self; 15] = [
        Self::Alphabetical,
        Self::Size,
        Self::Name,
        Self::CanonicalAlias,
        Self::JoinedMembers,
        Self::JoinedLocalMembers,
        Self::Version,
        Self::Creator,
        Self::Encryption,
        Self::Federatable,
        Self::Public,
        Self::JoinRules,
        Self::GuestAccess,
        Self::HistoryVisibility,
        Self::StateEvents,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Alphabetical => "alphabetical",
            Self::Size => "size",
            Self::Name => "name",
            Self::CanonicalAlias => "canonical_alias",
            Self::JoinedMembers => "joined_members",
            Self::JoinedLocalMembers => "joined_local_members",
            Self::Version => "version",
            Self::Creator => "creator",
            Self::Encryption => "encryption",
            Self::Federatable => "federatable",
            Self::Public => "public",
            Self::JoinRules => "join_rules",
            Self::GuestAccess => "guest_access",
            Self::HistoryVisibility => "history_visibility",
            Self::StateEvents => "state_events",
        }
    }
}

impl FromStr for OrderBy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|o| o.as_str() == s)
            .ok_or_else(|| format!("unknown room ordering: {s}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Forward,
    Backward,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Forward => "f",
            Self::Backward => "b",
        }
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "f" | "forward" => Ok(Self::Forward),
            "b" | "backward" => Ok(Self::Backward),
            other => Err(format!("unknown direction: {other}")),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct RoomListFilters {
    pub order_by: Option<OrderBy>,
    pub dir: Option<Direction>,
    pub search_term: Option<String>,
    pub public_rooms: Option<bool>,
    pub empty_rooms: Option<bool>,
}

impl RoomListFilters {
    /// Query parameters for the set filters, in a stable order. An empty
    /// search term is omitted.
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(order_by) = self.order_by {
            pairs.push(("order_by", order_by.as_str().to_string()));
        }
        if let Some(dir) = self.dir {
            pairs.push(("dir", dir.as_str().to_string()));
        }
        if let Some(term) = self.search_term.as_deref().filter(|t| !t.is_empty()) {
            pairs.push(("search_term", term.to_string()));
        }
        if let Some(public) = self.public_rooms {
            pairs.push(("public_rooms", public.to_string()));
        }
        if let Some(empty) = self.empty_rooms {
            pairs.push(("empty_rooms", empty.to_string()));
        }
        pairs
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeleteRoomParams {
    pub block: bool,
}

#[derive(Serialize)]
struct DeleteRoomBody {
    block: bool,
    purge: bool,
}

#[derive(Deserialize)]
struct DeleteRoomResponse {
    delete_id: String,
}

impl AdminClient {
    /// Fetch one page of rooms starting at `from` (first page when `None`).
    pub async fn list_rooms(
        &self,
        filters: &RoomListFilters,
        from: Option<&BatchToken>,
        limit: u32,
        cancel: &CancellationToken,
    ) -> Result<RoomsListResponse> {
        let mut url = self.endpoint(ROOMS_V1)?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("limit", &limit.to_string());
            if let Some(from) = from {
                query.append_pair("from", &from.to_string());
            }
            for (name, value) in filters.query_pairs() {
                query.append_pair(name, &value);
            }
        }
        self.get_json(url, false, cancel).await
    }

    pub async fn count_rooms(&self, cancel: &CancellationToken) -> Result<u64> {
        let mut url = self.endpoint(ROOMS_V1)?;
        url.query_pairs_mut().append_pair("limit", "0");
        let page: RoomsListResponse = self.get_json(url, false, cancel).await?;
        Ok(page.total_rooms)
    }

    pub async fn room_detail(&self, room_id: &str, cancel: &CancellationToken) -> Result<RoomDetail> {
        let url = self.room_endpoint(ROOMS_V1, room_id, "")?;
        self.get_json(url, true, cancel).await
    }

    pub async fn room_members(
        &self,
        room_id: &str,
        cancel: &CancellationToken,
    ) -> Result<RoomMembers> {
        let url = self.room_endpoint(ROOMS_V1, room_id, "/members")?;
        self.get_json(url, true, cancel).await
    }

    /// Schedule a purge of the room. Returns the id of the deletion task; the
    /// task itself is observed through the scheduled-tasks endpoint.
    pub async fn delete_room(
        &self,
        room_id: &str,
        params: DeleteRoomParams,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let url = self.room_endpoint(ROOMS_V2, room_id, "")?;
        let req = self.request(Method::DELETE, url).json(&DeleteRoomBody {
            block: params.block,
            purge: true,
        });
        let delete_id = cancellable(cancel, async {
            let resp = req.send().await?;
            let resp = ensure_not_error(resp, false).await?;
            let body: DeleteRoomResponse = decode(resp).await?;
            Ok(body.delete_id)
        })
        .await?;
        info!(room_id, %delete_id, block = params.block, "room deletion scheduled");
        Ok(delete_id)
    }

    pub fn room_pager(&self, filters: RoomListFilters, page_size: u32) -> RoomPager<'_> {
        RoomPager {
            client: self,
            filters,
            page_size,
            next: None,
            done: false,
        }
    }
}

/// Walks the room list page by page, following `next_batch`.
pub struct RoomPager<'a> {
    client: &'a AdminClient,
    filters: RoomListFilters,
    page_size: u32,
    next: Option<BatchToken>,
    done: bool,
}

impl RoomPager<'_> {
    pub fn has_more(&self) -> bool {
        !self.done
    }

    /// Fetch the next page, or `None` once the server stopped sending a
    /// `next_batch`. A failed fetch can be retried.
    pub async fn next_page(&mut self, cancel: &CancellationToken) -> Result<Option<RoomsListResponse>> {
        if self.done {
            return Ok(None);
        }
        let page = self
            .client
            .list_rooms(&self.filters, self.next.as_ref(), self.page_size, cancel)
            .await?;
        self.next = page.next_batch.clone();
        self.done = self.next.is_none();
        Ok(Some(page))
    }
}
