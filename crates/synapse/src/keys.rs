//! Cache keys for admin API queries.
//!
//! Keys start with the API family, then the resource type, then the root
//! URL and the identifying parameters, so everything about one room can be
//! dropped with a single prefix.

use synadmin_common::QueryKey;

use crate::rooms::{BatchToken, RoomListFilters};

fn synapse(kind: &str, root: &str) -> QueryKey {
    QueryKey::new("synapse").with(kind).with(root)
}

pub fn server_version(root: &str) -> QueryKey {
    synapse("server_version", root)
}

/// Prefix covering every cached room list page for `root`.
pub fn rooms(root: &str) -> QueryKey {
    synapse("rooms", root)
}

pub fn rooms_page(
    root: &str,
    filters: &RoomListFilters,
    from: Option<&BatchToken>,
    limit: u32,
) -> QueryKey {
    let params = filters
        .query_pairs()
        .into_iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");
    rooms(root)
        .with(params)
        .with(from.map(ToString::to_string).unwrap_or_default())
        .with(limit.to_string())
}

pub fn rooms_count(root: &str) -> QueryKey {
    synapse("rooms_count", root)
}

pub fn room(root: &str, room_id: &str) -> QueryKey {
    synapse("room", root).with(room_id)
}

pub fn room_members(root: &str, room_id: &str) -> QueryKey {
    synapse("room_members", root).with(room_id)
}

pub fn scheduled_tasks(root: &str, resource_id: &str) -> QueryKey {
    synapse("scheduled_tasks", root).with(resource_id)
}

pub fn ess_version(root: &str) -> QueryKey {
    QueryKey::new("ess").with("version").with(root)
}

pub fn adminbot(root: &str) -> QueryKey {
    QueryKey::new("ess").with("adminbot").with(root)
}

pub fn auth_server_version(issuer: &str) -> QueryKey {
    QueryKey::new("mas").with("version").with(issuer)
}

/// Keys to drop after a deletion of `room_id` was scheduled.
pub fn after_room_deletion(root: &str, room_id: &str) -> [QueryKey; 4] {
    [
        scheduled_tasks(root, room_id),
        room(root, room_id),
        rooms(root),
        rooms_count(root),
    ]
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::rooms::{Direction, OrderBy},
    };

    const ROOT: &str = "https://matrix.example.org";

    #[test]
    fn test_room_key_layout() {
        assert_eq!(
            room(ROOT, "!a:example.org").to_string(),
            "synapse/room/https://matrix.example.org/!a:example.org"
        );
    }

    #[test]
    fn test_pages_share_the_rooms_prefix() {
        let filters = RoomListFilters {
            order_by: Some(OrderBy::Size),
            dir: Some(Direction::Backward),
            ..Default::default()
        };
        let first = rooms_page(ROOT, &filters, None, 100);
        let second = rooms_page(ROOT, &filters, Some(&BatchToken::Number(100)), 100);
        assert_ne!(first, second);
        assert!(first.starts_with(&rooms(ROOT)));
        assert!(second.starts_with(&rooms(ROOT)));
        assert!(!rooms_count(ROOT).starts_with(&rooms(ROOT)));
    }

    #[test]
    fn test_different_filters_different_keys() {
        let a = rooms_page(ROOT, &RoomListFilters::default(), None, 100);
        let b = rooms_page(
            ROOT,
            &RoomListFilters {
                search_term: Some("ops".into()),
                ..Default::default()
            },
            None,
            100,
        );
        assert_ne!(a, b);
    }
}
