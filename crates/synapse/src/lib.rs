//! Typed client for the Synapse admin API and the ESS endpoints, plus the
//! scheduled-task poller built on it.

pub mod client;
pub mod error;
pub mod ess;
pub mod features;
pub mod keys;
pub mod poller;
pub mod rooms;
pub mod server;
pub mod tasks;

pub use {
    client::AdminClient,
    error::AdminError,
    ess::{Adminbot, Edition, EssVersion},
    features::FeatureStatus,
    poller::{PollOutcome, RetryPolicy, TaskApi, TaskPoller, TaskSnapshot, TaskSubscription},
    rooms::{
        BatchToken, DeleteRoomParams, Direction, OrderBy, Room, RoomDetail, RoomListFilters,
        RoomMembers, RoomPager, RoomsListResponse,
    },
    server::ServerVersion,
    tasks::{ScheduledTask, TaskStatus, deletion_allowed},
};
