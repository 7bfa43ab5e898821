// LMDB-backed follower graph
use anyhow::Result;
use followgraph_core::{EdgeOutcome, FollowEdge, UserId};
use heed::byteorder::BE;
use heed::types::{Bytes, Unit, I64};
use heed::{Database, Env, EnvOpenOptions};
use std::path::Path;

const DB_USERS: &str = "users";
const DB_FOLLOWS_OUT: &str = "follows_out";
const DB_FOLLOWS_IN: &str = "follows_in";

/// Edge keys are two big-endian ids, so all edges of one user share an 8-byte prefix.
type EdgeKey = [u8; 16];

#[inline]
fn edge_key(first: UserId, second: UserId) -> EdgeKey {
    let mut key = [0u8; 16];
    key[..8].copy_from_slice(&first.to_be_bytes());
    key[8..].copy_from_slice(&second.to_be_bytes());
    key
}

#[inline]
fn first_endpoint(key: &[u8]) -> Option<UserId> {
    let head: [u8; 8] = key.get(..8)?.try_into().ok()?;
    Some(UserId::from_be_bytes(head))
}

#[inline]
fn other_endpoint(key: &[u8]) -> Option<UserId> {
    let tail: [u8; 8] = key.get(8..16)?.try_into().ok()?;
    Some(UserId::from_be_bytes(tail))
}

/// Synchronous graph over three LMDB databases:
///
/// - `users`: user id -> ()
/// - `follows_out`: follower ‖ followed -> ()
/// - `follows_in`: followed ‖ follower -> ()
///
/// Every method runs in exactly one transaction. LMDB admits a single writer
/// at a time, so each write method is atomic with respect to every other.
pub struct LmdbGraph {
    env: Env,
    users_db: Database<I64<BE>, Unit>,
    out_db: Database<Bytes, Unit>,
    in_db: Database<Bytes, Unit>,
}

impl LmdbGraph {
    pub fn open<P: AsRef<Path>>(path: P, map_size: usize) -> Result<Self> {
        std::fs::create_dir_all(&path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(map_size)
                .max_dbs(3)
                .open(path)?
        };

        let mut wtxn = env.write_txn()?;
        let users_db = env.create_database(&mut wtxn, Some(DB_USERS))?;
        let out_db = env.create_database(&mut wtxn, Some(DB_FOLLOWS_OUT))?;
        let in_db = env.create_database(&mut wtxn, Some(DB_FOLLOWS_IN))?;
        wtxn.commit()?;

        Ok(Self {
            env,
            users_db,
            out_db,
            in_db,
        })
    }

    pub fn node_exists(&self, user: UserId) -> Result<bool> {
        let rtxn = self.env.read_txn()?;
        Ok(self.users_db.get(&rtxn, &user)?.is_some())
    }

    pub fn upsert_node(&self, user: UserId) -> Result<()> {
        let mut wtxn = self.env.write_txn()?;
        self.users_db.put(&mut wtxn, &user, &())?;
        wtxn.commit()?;
        Ok(())
    }

    /// Detach-delete: the node and every incident edge go in one commit.
    pub fn delete_node(&self, user: UserId) -> Result<bool> {
        let mut wtxn = self.env.write_txn()?;
        if !self.users_db.delete(&mut wtxn, &user)? {
            // Edges never outlive their endpoints, so there is nothing to detach.
            wtxn.abort();
            return Ok(false);
        }

        let prefix = user.to_be_bytes();
        let following = collect_endpoints(self.out_db.prefix_iter(&wtxn, &prefix[..])?)?;
        let followers = collect_endpoints(self.in_db.prefix_iter(&wtxn, &prefix[..])?)?;
        for followed in following {
            self.out_db.delete(&mut wtxn, &edge_key(user, followed)[..])?;
            self.in_db.delete(&mut wtxn, &edge_key(followed, user)[..])?;
        }
        for follower in followers {
            self.in_db.delete(&mut wtxn, &edge_key(user, follower)[..])?;
            self.out_db.delete(&mut wtxn, &edge_key(follower, user)[..])?;
        }

        wtxn.commit()?;
        Ok(true)
    }

    /// Match both endpoints, then merge the edge, inside one write transaction.
    pub fn upsert_edge(&self, follower: UserId, followed: UserId) -> Result<EdgeOutcome> {
        let mut wtxn = self.env.write_txn()?;

        if self.users_db.get(&wtxn, &follower)?.is_none() {
            wtxn.abort();
            return Ok(EdgeOutcome::MissingFollower);
        }
        if self.users_db.get(&wtxn, &followed)?.is_none() {
            wtxn.abort();
            return Ok(EdgeOutcome::MissingFollowed);
        }

        let out_key = edge_key(follower, followed);
        if self.out_db.get(&wtxn, &out_key[..])?.is_some() {
            wtxn.abort();
            return Ok(EdgeOutcome::AlreadyExists);
        }

        self.out_db.put(&mut wtxn, &out_key[..], &())?;
        self.in_db.put(&mut wtxn, &edge_key(followed, follower)[..], &())?;
        wtxn.commit()?;
        Ok(EdgeOutcome::Created)
    }

    pub fn edge_exists(&self, follower: UserId, followed: UserId) -> Result<bool> {
        let rtxn = self.env.read_txn()?;
        Ok(self
            .out_db
            .get(&rtxn, &edge_key(follower, followed)[..])?
            .is_some())
    }

    pub fn following(&self, user: UserId) -> Result<Vec<UserId>> {
        let rtxn = self.env.read_txn()?;
        let prefix = user.to_be_bytes();
        let ids = collect_endpoints(self.out_db.prefix_iter(&rtxn, &prefix[..])?)?;
        Ok(ids)
    }

    pub fn followers(&self, user: UserId) -> Result<Vec<UserId>> {
        let rtxn = self.env.read_txn()?;
        let prefix = user.to_be_bytes();
        let ids = collect_endpoints(self.in_db.prefix_iter(&rtxn, &prefix[..])?)?;
        Ok(ids)
    }

    pub fn node_count(&self) -> Result<u64> {
        let rtxn = self.env.read_txn()?;
        Ok(self.users_db.len(&rtxn)?)
    }

    pub fn edge_count(&self) -> Result<u64> {
        let rtxn = self.env.read_txn()?;
        Ok(self.out_db.len(&rtxn)?)
    }

    pub fn edges(&self) -> Result<Vec<FollowEdge>> {
        let rtxn = self.env.read_txn()?;
        let mut edges = Vec::new();
        for result in self.out_db.iter(&rtxn)? {
            let (key, _) = result?;
            if let (Some(follower), Some(followed)) = (first_endpoint(key), other_endpoint(key)) {
                edges.push(FollowEdge::new(follower, followed));
            }
        }
        Ok(edges)
    }

    /// Flush and release the environment.
    pub fn close(self) {
        let Self { env, .. } = self;
        env.prepare_for_closing().wait();
    }
}

/// Second id of every `first ‖ second` key yielded by a prefix scan.
fn collect_endpoints<'txn>(
    entries: impl Iterator<Item = heed::Result<(&'txn [u8], ())>>,
) -> Result<Vec<UserId>> {
    let mut ids = Vec::new();
    for entry in entries {
        let (key, ()) = entry?;
        if let Some(id) = other_endpoint(key) {
            ids.push(id);
        }
    }
    Ok(ids)
}
