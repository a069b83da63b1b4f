use std::sync::Arc;

use {
    anyhow::{Result, bail},
    clap::{Args, Subcommand},
    synadmin_synapse::{
        AdminClient, AdminError, BatchToken, DeleteRoomParams, Direction, OrderBy, PollOutcome,
        Room, RoomDetail, RoomListFilters, RoomMembers, RoomsListResponse, ScheduledTask,
        TaskPoller, TaskSnapshot, deletion_allowed, keys,
    },
    tracing::info,
};

use crate::context::{Context, Session};

#[derive(Subcommand)]
pub enum RoomAction {
    /// List rooms.
    List(ListArgs),
    /// Count rooms on the server.
    Count,
    /// Show one room.
    Show { room_id: String },
    /// List the members of a room.
    Members { room_id: String },
    /// Delete and purge a room.
    Delete {
        room_id: String,
        /// Prevent users from rejoining the room afterwards.
        #[arg(long, default_value_t = false)]
        block: bool,
        /// Return right after scheduling instead of following the task.
        #[arg(long, default_value_t = false)]
        no_wait: bool,
    },
    /// Show the scheduled tasks of a room.
    Tasks {
        room_id: String,
        /// Keep polling until every task has finished.
        #[arg(long, default_value_t = false)]
        watch: bool,
    },
}

#[derive(Args)]
pub struct ListArgs {
    /// Filter by room name, alias or id.
    #[arg(long)]
    search: Option<String>,
    #[arg(long)]
    order_by: Option<OrderBy>,
    /// `f` (forward) or `b` (backward).
    #[arg(long)]
    dir: Option<Direction>,
    /// Only public (true) or only non-public (false) rooms.
    #[arg(long)]
    public: Option<bool>,
    /// Only empty (true) or only non-empty (false) rooms.
    #[arg(long)]
    empty: Option<bool>,
    /// Page size. Defaults to `rooms.page_size`.
    #[arg(long)]
    limit: Option<u32>,
    /// Resume from a `next_batch` token.
    #[arg(long)]
    from: Option<String>,
    /// Follow `next_batch` until the last page.
    #[arg(long, default_value_t = false)]
    all: bool,
}

impl ListArgs {
    fn filters(&self) -> RoomListFilters {
        RoomListFilters {
            order_by: self.order_by,
            dir: self.dir,
            search_term: self.search.clone(),
            public_rooms: self.public,
            empty_rooms: self.empty,
        }
    }
}

/// Numeric tokens are sent back as numbers, anything else verbatim.
fn parse_batch_token(raw: &str) -> BatchToken {
    raw.parse()
        .map(BatchToken::Number)
        .unwrap_or_else(|_| BatchToken::Text(raw.to_string()))
}

pub async fn handle_rooms(ctx: &Context, action: RoomAction) -> Result<()> {
    let session = ctx.session().await?;
    match action {
        RoomAction::List(args) => list(ctx, &session, args).await,
        RoomAction::Count => count(ctx, &session).await,
        RoomAction::Show { room_id } => show(ctx, &session, &room_id).await,
        RoomAction::Members { room_id } => members(ctx, &session, &room_id).await,
        RoomAction::Delete {
            room_id,
            block,
            no_wait,
        } => delete(ctx, &session, &room_id, block, no_wait).await,
        RoomAction::Tasks { room_id, watch } => tasks(ctx, &session, &room_id, watch).await,
    }
}

fn print_room(room: &Room) {
    println!(
        "{}  {}  members={} ({} local)  public={}  encryption={}",
        room.room_id,
        room.name.as_deref().unwrap_or("-"),
        room.joined_members,
        room.joined_local_members,
        room.public,
        room.encryption.as_deref().unwrap_or("none"),
    );
}

async fn fetch_page(
    ctx: &Context,
    client: &AdminClient,
    filters: &RoomListFilters,
    from: Option<&BatchToken>,
    limit: u32,
) -> Result<RoomsListResponse> {
    let key = keys::rooms_page(&client.root_key(), filters, from, limit);
    Ok(ctx
        .cache
        .get_or_fetch(key, || client.list_rooms(filters, from, limit, &ctx.cancel))
        .await?)
}

async fn list(ctx: &Context, session: &Session, args: ListArgs) -> Result<()> {
    let client = &session.client;
    let filters = args.filters();
    let limit = args.limit.unwrap_or(ctx.config.rooms.page_size);
    let mut from = args.from.as_deref().map(parse_batch_token);
    let mut rooms = Vec::new();

    let next = loop {
        let page = fetch_page(ctx, client, &filters, from.as_ref(), limit).await?;
        info!(count = page.rooms.len(), total = page.total_rooms, "room page fetched");
        rooms.extend(page.rooms);
        match page.next_batch {
            Some(next) if args.all => from = Some(next),
            next => break (next, page.total_rooms),
        }
    };
    let (next_batch, total) = next;

    if ctx.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "rooms": rooms,
                "total_rooms": total,
                "next_batch": next_batch,
            }))?
        );
        return Ok(());
    }
    for room in &rooms {
        print_room(room);
    }
    println!("{} of {total} room(s)", rooms.len());
    if let Some(next) = next_batch {
        println!("more: --from {next}");
    }
    Ok(())
}

async fn count(ctx: &Context, session: &Session) -> Result<()> {
    let client = &session.client;
    let total = ctx
        .cache
        .get_or_fetch(keys::rooms_count(&client.root_key()), || {
            client.count_rooms(&ctx.cancel)
        })
        .await?;
    ctx.emit(&total, |t| println!("{t}"))
}

/// Map the not-found outcome to a friendly message.
fn not_found_as_message(room_id: &str, err: AdminError) -> anyhow::Error {
    if err.is_not_found() {
        anyhow::anyhow!("room {room_id} not found")
    } else {
        err.into()
    }
}

async fn show(ctx: &Context, session: &Session, room_id: &str) -> Result<()> {
    let client = &session.client;
    let detail: RoomDetail = ctx
        .cache
        .get_or_fetch(keys::room(&client.root_key(), room_id), || {
            client.room_detail(room_id, &ctx.cancel)
        })
        .await
        .map_err(|e| not_found_as_message(room_id, e))?;
    ctx.emit(&detail, |d| {
        println!("room:        {}", d.room_id);
        println!("name:        {}", d.name.as_deref().unwrap_or("-"));
        println!("topic:       {}", d.topic.as_deref().unwrap_or("-"));
        println!("alias:       {}", d.canonical_alias.as_deref().unwrap_or("-"));
        println!("creator:     {}", d.creator);
        println!("version:     {}", d.version);
        println!(
            "members:     {} joined, {} local, {} local devices",
            d.joined_members, d.joined_local_members, d.joined_local_devices
        );
        println!("public:      {}", d.public);
        println!("federatable: {}", d.federatable);
        println!("join rules:  {}", d.join_rules.as_deref().unwrap_or("-"));
        println!("encryption:  {}", d.encryption.as_deref().unwrap_or("none"));
        println!("forgotten:   {}", d.forgotten);
    })
}

async fn members(ctx: &Context, session: &Session, room_id: &str) -> Result<()> {
    let client = &session.client;
    let members: RoomMembers = ctx
        .cache
        .get_or_fetch(keys::room_members(&client.root_key(), room_id), || {
            client.room_members(room_id, &ctx.cancel)
        })
        .await
        .map_err(|e| not_found_as_message(room_id, e))?;
    ctx.emit(&members, |m| {
        for member in &m.members {
            println!("{member}");
        }
        println!("{} member(s)", m.total);
    })
}

fn print_task(task: &ScheduledTask) {
    let error = task
        .error
        .as_deref()
        .map(|e| format!("  error: {e}"))
        .unwrap_or_default();
    println!(
        "{}  {}  {:?}  at {}{error}",
        task.id, task.action, task.status, task.timestamp_ms
    );
}

fn print_snapshot(snapshot: &TaskSnapshot) {
    if let Some(tasks) = &snapshot.tasks {
        if tasks.is_empty() {
            println!("no scheduled tasks");
        }
        for task in tasks {
            print_task(task);
        }
    }
    if let Some(error) = &snapshot.last_error {
        println!("(last poll failed: {error}, retrying)");
    }
}

async fn follow(ctx: &Context, session: &Session, room_id: &str) -> Result<()> {
    let poller = TaskPoller::new(
        Arc::new(session.client.clone()),
        ctx.config.poll.interval(),
        ctx.retry_policy(),
    );
    let mut sub = poller.subscribe(room_id, &ctx.cancel);
    while sub.changed().await {
        let snapshot = sub.snapshot();
        if !ctx.json {
            print_snapshot(&snapshot);
        }
        if snapshot.is_settled() {
            break;
        }
    }
    let last = sub.snapshot();
    match sub.finished().await {
        PollOutcome::AllTerminal => {
            let tasks = last.tasks.unwrap_or_default();
            ctx.cache.insert(
                keys::scheduled_tasks(&session.client.root_key(), room_id),
                tasks.clone(),
            );
            if ctx.json {
                println!("{}", serde_json::to_string_pretty(&tasks)?);
            }
            Ok(())
        },
        PollOutcome::Unsubscribed => bail!("stopped following tasks for {room_id}"),
    }
}

async fn tasks(ctx: &Context, session: &Session, room_id: &str, watch: bool) -> Result<()> {
    if watch {
        return follow(ctx, session, room_id).await;
    }
    let client = &session.client;
    let tasks: Vec<ScheduledTask> = ctx
        .cache
        .get_or_fetch(keys::scheduled_tasks(&client.root_key(), room_id), || {
            client.scheduled_tasks_for_resource(room_id, &ctx.cancel)
        })
        .await?;
    ctx.emit(&tasks, |tasks| {
        if tasks.is_empty() {
            println!("no scheduled tasks");
        }
        for task in tasks {
            print_task(task);
        }
        println!("deletion allowed: {}", deletion_allowed(tasks));
    })
}

async fn delete(
    ctx: &Context,
    session: &Session,
    room_id: &str,
    block: bool,
    no_wait: bool,
) -> Result<()> {
    let client = &session.client;
    let root = client.root_key();
    let existing: Vec<ScheduledTask> = ctx
        .cache
        .get_or_fetch(keys::scheduled_tasks(&root, room_id), || {
            client.scheduled_tasks_for_resource(room_id, &ctx.cancel)
        })
        .await?;
    if !deletion_allowed(&existing) {
        bail!("room {room_id} already has a deletion scheduled, running or completed");
    }

    let poller = TaskPoller::new(
        Arc::new(client.clone()),
        ctx.config.poll.interval(),
        ctx.retry_policy(),
    );
    let delete_id = poller
        .trigger_deletion(room_id, DeleteRoomParams { block }, &ctx.cancel)
        .await?;
    for key in keys::after_room_deletion(&root, room_id) {
        ctx.cache.invalidate_prefix(&key);
    }
    if !ctx.json {
        println!("Deletion scheduled: {delete_id}");
    }

    if no_wait {
        if ctx.json {
            println!("{}", serde_json::json!({ "delete_id": delete_id }));
        }
        return Ok(());
    }
    follow(ctx, session, room_id).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_batch_token() {
        assert_eq!(parse_batch_token("100"), BatchToken::Number(100));
        assert_eq!(parse_batch_token("s12_3"), BatchToken::Text("s12_3".into()));
    }

    #[test]
    fn test_list_args_to_filters() {
        let args = ListArgs {
            search: Some("test".into()),
            order_by: Some(OrderBy::Size),
            dir: Some(Direction::Backward),
            public: None,
            empty: Some(true),
            limit: None,
            from: None,
            all: false,
        };
        let filters = args.filters();
        assert_eq!(filters.search_term.as_deref(), Some("test"));
        assert_eq!(filters.empty_rooms, Some(true));
        assert_eq!(filters.public_rooms, None);
    }
}
