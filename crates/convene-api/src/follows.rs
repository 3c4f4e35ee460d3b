use std::collections::BTreeSet;

use axum::{
    Json,
    extract::{Path, State},
};
use tracing::info;

use convene_db::Store;
use convene_types::api::{FollowRequest, MessageResponse};
use convene_types::models::FollowEdge;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// The directed follow relation. `user1` follows `user2`; each direction
/// is an independent row.
pub struct FollowGraph<'a> {
    store: &'a dyn Store,
}

impl<'a> FollowGraph<'a> {
    pub fn new(store: &'a dyn Store) -> Self {
        Self { store }
    }

    /// Idempotent. Following yourself is allowed.
    pub fn follow(&self, follower: &str, followed: &str) -> ApiResult<bool> {
        let (follower, followed) = edge(follower, followed)?;
        let added = self.store.add_follow(follower, followed)?;
        if added {
            info!("{} now follows {}", follower, followed);
        }
        Ok(added)
    }

    /// Removes only `follower -> followed`; the reverse edge is untouched.
    pub fn unfollow(&self, follower: &str, followed: &str) -> ApiResult<bool> {
        let (follower, followed) = edge(follower, followed)?;
        Ok(self.store.remove_follow(follower, followed)?)
    }

    pub fn following(&self, username: &str) -> ApiResult<Vec<String>> {
        Ok(self.store.following(username.trim())?)
    }

    pub fn followers(&self, username: &str) -> ApiResult<Vec<String>> {
        Ok(self.store.followers(username.trim())?)
    }

    /// Legacy symmetric view: everyone linked to the user in either
    /// direction, sorted and deduplicated.
    pub fn friends(&self, username: &str) -> ApiResult<Vec<String>> {
        let mut names: BTreeSet<String> = self.following(username)?.into_iter().collect();
        names.extend(self.followers(username)?);
        Ok(names.into_iter().collect())
    }

    pub fn edges(&self) -> ApiResult<Vec<FollowEdge>> {
        Ok(self
            .store
            .list_follows()?
            .into_iter()
            .map(|f| FollowEdge {
                user1: f.user1,
                user2: f.user2,
                created_at: f.created_at,
            })
            .collect())
    }
}

fn edge<'s>(follower: &'s str, followed: &'s str) -> ApiResult<(&'s str, &'s str)> {
    let (follower, followed) = (follower.trim(), followed.trim());
    if follower.is_empty() || followed.is_empty() {
        return Err(ApiError::invalid("Both user1 and user2 are required"));
    }
    Ok((follower, followed))
}

// -- Handlers --

pub async fn add_follow(
    State(state): State<AppState>,
    Json(req): Json<FollowRequest>,
) -> ApiResult<Json<MessageResponse>> {
    state
        .run(move |store| FollowGraph::new(store).follow(&req.user1, &req.user2))
        .await?;
    Ok(Json(MessageResponse::new("Follow added")))
}

pub async fn remove_follow(
    State(state): State<AppState>,
    Json(req): Json<FollowRequest>,
) -> ApiResult<Json<MessageResponse>> {
    state
        .run(move |store| FollowGraph::new(store).unfollow(&req.user1, &req.user2))
        .await?;
    Ok(Json(MessageResponse::new("Follow removed")))
}

pub async fn list_follows(State(state): State<AppState>) -> ApiResult<Json<Vec<FollowEdge>>> {
    let edges = state.run(|store| FollowGraph::new(store).edges()).await?;
    Ok(Json(edges))
}

pub async fn get_following(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> ApiResult<Json<Vec<String>>> {
    let names = state
        .run(move |store| FollowGraph::new(store).following(&username))
        .await?;
    Ok(Json(names))
}

pub async fn get_followers(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> ApiResult<Json<Vec<String>>> {
    let names = state
        .run(move |store| FollowGraph::new(store).followers(&username))
        .await?;
    Ok(Json(names))
}

pub async fn get_friends(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> ApiResult<Json<Vec<String>>> {
    let names = state
        .run(move |store| FollowGraph::new(store).friends(&username))
        .await?;
    Ok(Json(names))
}

#[cfg(test)]
mod tests {
    use super::*;
    use convene_db::SqliteStore;

    #[test]
    fn unfollow_is_directional() {
        let store = SqliteStore::open_in_memory().unwrap();
        let graph = FollowGraph::new(&store);
        graph.follow("Mitsu", "Zine").unwrap();
        graph.follow("Zine", "Mitsu").unwrap();
        assert_eq!(graph.following("Mitsu").unwrap(), vec!["Zine"]);
        assert_eq!(graph.following("Zine").unwrap(), vec!["Mitsu"]);

        graph.unfollow("Zine", "Mitsu").unwrap();
        assert!(graph.following("Zine").unwrap().is_empty());
        assert_eq!(graph.following("Mitsu").unwrap(), vec!["Zine"]);
        assert_eq!(graph.followers("Zine").unwrap(), vec!["Mitsu"]);
    }

    #[test]
    fn follow_is_idempotent() {
        let store = SqliteStore::open_in_memory().unwrap();
        let graph = FollowGraph::new(&store);
        assert!(graph.follow("Kat", "Zine").unwrap());
        assert!(!graph.follow("Kat", "Zine").unwrap());
        assert_eq!(graph.edges().unwrap().len(), 1);
    }

    #[test]
    fn self_follow_is_accepted() {
        let store = SqliteStore::open_in_memory().unwrap();
        let graph = FollowGraph::new(&store);
        assert!(graph.follow("Kat", "Kat").unwrap());
        assert_eq!(graph.followers("Kat").unwrap(), vec!["Kat"]);
    }

    #[test]
    fn friends_is_the_sorted_union() {
        let store = SqliteStore::open_in_memory().unwrap();
        let graph = FollowGraph::new(&store);
        graph.follow("Mitsu", "Zine").unwrap();
        graph.follow("Kat", "Mitsu").unwrap();
        graph.follow("Zine", "Mitsu").unwrap();

        assert_eq!(graph.friends("Mitsu").unwrap(), vec!["Kat", "Zine"]);
    }

    #[test]
    fn blank_users_are_rejected() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(matches!(
            FollowGraph::new(&store).follow("", "Zine").unwrap_err(),
            ApiError::InvalidInput(_)
        ));
    }
}
