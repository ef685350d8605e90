//! Tracker registry
//!
//! All tracker state lives in one [`Tables`] value behind one lock. Every
//! operation validates its preconditions in a fixed order and mutates only
//! when all of them hold, returning the response text on success.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info};

use crate::error::ShareError;
use crate::protocol::DownloadListing;
use crate::tracker::file_meta::FileMeta;
use crate::tracker::group::{Group, OwnerChange};
use crate::tracker::user::User;

type Reply = Result<String, ShareError>;

/// Users, groups and advertised files
#[derive(Debug, Default)]
pub struct Tables {
    users: HashMap<String, User>,
    groups: BTreeMap<String, Group>,
    files: HashMap<(String, String), FileMeta>,
    group_files: HashMap<String, BTreeSet<String>>,
}

fn no_user(id: &str) -> ShareError {
    ShareError::not_found_with_entity(format!("No such user ID: {}", id), "user")
}

fn no_group(gid: &str) -> ShareError {
    ShareError::not_found_with_entity(format!("No such group ID: {}", gid), "group")
}

fn not_member(gid: &str, user: &str) -> ShareError {
    ShareError::authorization_error_with_user(format!("Not a participant of group {}", gid), user)
}

fn not_owner(gid: &str, user: &str) -> ShareError {
    ShareError::authorization_error_with_user(format!("Not the owner of group {}", gid), user)
}

fn no_file(gid: &str, name: &str) -> ShareError {
    ShareError::not_found_with_entity(format!("No file {} in group {}", name, gid), "file")
}

impl Tables {
    pub fn new() -> Self {
        Self::default()
    }

    fn user(&self, id: &str) -> Result<&User, ShareError> {
        self.users.get(id).ok_or_else(|| no_user(id))
    }

    fn group(&self, gid: &str) -> Result<&Group, ShareError> {
        self.groups.get(gid).ok_or_else(|| no_group(gid))
    }

    fn group_mut(&mut self, gid: &str) -> Result<&mut Group, ShareError> {
        self.groups.get_mut(gid).ok_or_else(|| no_group(gid))
    }

    fn participant_of(&self, gid: &str, user: &str) -> Result<&Group, ShareError> {
        let group = self.group(gid)?;
        if !group.is_participant(user) {
            return Err(not_member(gid, user));
        }
        Ok(group)
    }

    fn is_advertised(&self, gid: &str, name: &str) -> bool {
        self.group_files.get(gid).map_or(false, |names| names.contains(name))
    }

    fn advertised_meta_mut(&mut self, gid: &str, name: &str) -> Result<&mut FileMeta, ShareError> {
        if !self.is_advertised(gid, name) {
            return Err(no_file(gid, name));
        }
        self.files
            .get_mut(&(gid.to_string(), name.to_string()))
            .ok_or_else(|| no_file(gid, name))
    }

    pub fn create_user(&mut self, name: &str, passcode: &str) -> Reply {
        if self.users.contains_key(name) {
            return Err(ShareError::argument_error_with_field(format!("User ID {} is already in use", name), "user"));
        }
        self.users.insert(name.to_string(), User::new(name, passcode));
        info!("Registered user {}", name);
        Ok(format!("User {} registered", name))
    }

    pub fn login(&mut self, name: &str, passcode: &str, address: &str, port: &str) -> Reply {
        let port: u16 = port
            .parse()
            .map_err(|_| ShareError::argument_error_with_field(format!("Invalid port: {}", port), "port"))?;

        let user = self.users.get_mut(name).ok_or_else(|| no_user(name))?;
        if !user.check_passcode(passcode) {
            return Err(ShareError::authorization_error_with_user("Incorrect passcode", name));
        }

        user.login(address, port);
        info!("User {} logged in, serving pieces at {}:{}", name, address, port);
        Ok(format!("Login successful for {}", name))
    }

    pub fn logout(&mut self, name: &str) -> Reply {
        let user = self.users.get_mut(name).ok_or_else(|| no_user(name))?;
        user.logout();
        info!("User {} logged out", name);
        Ok(format!("User {} logged out", name))
    }

    pub fn create_group(&mut self, gid: &str, owner: &str) -> Reply {
        self.user(owner)?;
        if self.groups.contains_key(gid) {
            return Err(ShareError::argument_error_with_field(format!("Group ID {} is already taken", gid), "group"));
        }
        self.groups.insert(gid.to_string(), Group::new(gid, owner));
        info!("Group {} created by {}", gid, owner);
        Ok(format!("Group {} created", gid))
    }

    pub fn join_group(&mut self, gid: &str, user: &str) -> Reply {
        self.user(user)?;
        let group = self.group_mut(gid)?;
        if group.is_participant(user) {
            return Err(ShareError::argument_error(format!("Already a participant of group {}", gid)));
        }
        group.apply(user);
        debug!("{} asked to join {}", user, gid);
        Ok(format!("Request to join group {} sent", gid))
    }

    pub fn leave_group(&mut self, gid: &str, user: &str) -> Reply {
        self.user(user)?;
        let group = self.group_mut(gid)?;
        if !group.is_participant(user) {
            return Err(not_member(gid, user));
        }
        Self::log_owner_change(gid, group.leave(user));
        Ok(format!("Left group {}", gid))
    }

    fn log_owner_change(gid: &str, change: OwnerChange) {
        match change {
            OwnerChange::Unchanged => {}
            OwnerChange::Transferred(owner) => info!("Group {} new owner is {}", gid, owner),
            OwnerChange::Cleared => info!("Group {} has no participants left", gid),
        }
    }

    pub fn list_requests(&self, gid: &str, requester: &str) -> Reply {
        self.user(requester)?;
        let group = self.group(gid)?;
        if !group.is_owner(requester) {
            return Err(not_owner(gid, requester));
        }

        let applicants: Vec<&str> = group.applicants().map(String::as_str).collect();
        if applicants.is_empty() {
            return Ok(format!("No pending join requests for group {}", gid));
        }
        Ok(applicants.join("\n"))
    }

    pub fn accept_request(&mut self, gid: &str, applicant: &str, requester: &str) -> Reply {
        self.user(applicant)?;
        let group = self.group_mut(gid)?;
        if !group.is_owner(requester) {
            return Err(not_owner(gid, requester));
        }
        if !group.accept(applicant) {
            return Err(ShareError::not_found_with_entity(
                format!("{} has no pending request for group {}", applicant, gid),
                "request",
            ));
        }
        info!("{} accepted into {}", applicant, gid);
        Ok(format!("{} is now a participant of group {}", applicant, gid))
    }

    pub fn list_groups(&self) -> Reply {
        if self.groups.is_empty() {
            return Ok("No groups available".to_string());
        }
        Ok(self.groups.keys().cloned().collect::<Vec<_>>().join("\n"))
    }

    /// Store or overwrite the metadata of a file and seed it from the uploader
    #[allow(clippy::too_many_arguments)]
    pub fn upload(&mut self, gid: &str, name: &str, uploader: &str, size: &str, full_hash: &str, count: &str, hashes: &[&str]) -> Reply {
        self.group(gid)?;
        self.user(uploader)?;
        self.participant_of(gid, uploader)?;

        let size: u64 = size
            .parse()
            .map_err(|_| ShareError::argument_error_with_field(format!("Invalid size: {}", size), "size"))?;
        let count: usize = count
            .parse()
            .map_err(|_| ShareError::argument_error_with_field(format!("Invalid piece count: {}", count), "pieces"))?;

        let mut meta = FileMeta::new(name, size, full_hash, hashes.iter().map(|h| h.to_string()).collect())?;
        if meta.piece_count() != count {
            return Err(ShareError::argument_error_with_field(
                format!("Declared {} pieces, a {} byte file has {}", count, size, meta.piece_count()),
                "pieces",
            ));
        }
        meta.add_seeder(uploader);

        let key = (gid.to_string(), name.to_string());
        if self.files.insert(key, meta).is_some() {
            info!("Overwrote metadata of {} in {}", name, gid);
        }
        self.group_files.entry(gid.to_string()).or_default().insert(name.to_string());
        info!("Registered file {} in {} ({} bytes, {} pieces)", name, gid, size, count);
        Ok(format!("File {} uploaded to group {}", name, gid))
    }

    pub fn list_files(&self, gid: &str, requester: &str) -> Reply {
        self.participant_of(gid, requester)?;

        let lines: Vec<String> = self
            .group_files
            .get(gid)
            .into_iter()
            .flatten()
            .filter_map(|name| self.files.get(&(gid.to_string(), name.clone())))
            .map(|meta| meta.entry().to_string())
            .collect();

        if lines.is_empty() {
            return Ok(format!("No files shared in group {}", gid));
        }
        Ok(lines.join("\n"))
    }

    /// Metadata plus the currently connected seeders of a file
    pub fn download_listing(&self, gid: &str, name: &str, requester: &str) -> Result<DownloadListing, ShareError> {
        self.participant_of(gid, requester)?;
        if !self.is_advertised(gid, name) {
            return Err(no_file(gid, name));
        }
        let meta = self
            .files
            .get(&(gid.to_string(), name.to_string()))
            .ok_or_else(|| no_file(gid, name))?;

        let peers = meta
            .seeders()
            .filter_map(|seeder| self.users.get(seeder))
            .filter_map(User::endpoint)
            .collect();

        Ok(DownloadListing {
            name: meta.name.clone(),
            size: meta.size,
            full_hash: meta.full_hash.clone(),
            piece_hashes: meta.piece_hashes.clone(),
            peers,
        })
    }

    pub fn download_file(&self, gid: &str, name: &str, requester: &str) -> Reply {
        self.download_listing(gid, name, requester).map(|listing| listing.render())
    }

    pub fn file_downloaded(&mut self, gid: &str, name: &str, peer: &str) -> Reply {
        self.participant_of(gid, peer)?;
        if !self.is_advertised(gid, name) {
            return Err(no_file(gid, name));
        }
        self.user(peer)?;

        self.advertised_meta_mut(gid, name)?.add_seeder(peer);
        info!("{} is now seeding {} in {}", peer, name, gid);
        Ok(format!("{} registered as seeder for {}", peer, name))
    }

    pub fn stop_share(&mut self, gid: &str, name: &str, peer: &str) -> Reply {
        self.group(gid)?;
        self.user(peer)?;
        self.participant_of(gid, peer)?;

        self.advertised_meta_mut(gid, name)?.remove_seeder(peer);
        info!("{} stopped sharing {} in {}", peer, name, gid);
        Ok(format!("{} stopped sharing {} in group {}", peer, name, gid))
    }

    /// Tear down a session: disconnect the user and leave every group it owns
    pub fn disconnect(&mut self, name: &str) {
        if let Some(user) = self.users.get_mut(name) {
            user.logout();
        }

        for group in self.groups.values_mut() {
            if group.is_owner(name) {
                let gid = group.id.clone();
                Self::log_owner_change(&gid, group.leave(name));
            }
        }
        info!("Session of {} closed", name);
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    #[cfg(test)]
    pub(crate) fn group_ref(&self, gid: &str) -> Option<&Group> {
        self.groups.get(gid)
    }

    #[cfg(test)]
    pub(crate) fn user_ref(&self, id: &str) -> Option<&User> {
        self.users.get(id)
    }
}

/// Tables behind the lock shared by every connection
#[derive(Debug, Default)]
pub struct Registry {
    tables: RwLock<Tables>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn read(&self) -> RwLockReadGuard<'_, Tables> {
        self.tables.read().await
    }

    pub async fn write(&self) -> RwLockWriteGuard<'_, Tables> {
        self.tables.write().await
    }
}
